//! Conversion to and from the `image` crate.
//!
//! | Bitmap | `DynamicImage` |
//! |---|---|
//! | 8-bit greyscale (min-is-black) | `ImageLuma8` |
//! | 1/4/8-bit palette, 16-bit, 24-bit | `ImageRgb8` |
//! | 32-bit | `ImageRgba8` |
//!
//! Pixel rows are exported top-down through `FreeImage_ConvertToRawBits`
//! and reordered from FreeImage's BGR(A) layout to RGB(A). Going the other
//! way, luma images become 8-bit greyscale bitmaps, RGB 24-bit and
//! everything else 32-bit.

use crate::bitmap::{Bitmap, BitmapOps};
use crate::error::{Error, Result};
use crate::library::{self, Library};
use crate::types::ColorType;
use image::{DynamicImage, GrayImage, RgbImage, RgbaImage};

/// Row-major pixel bytes without pitch padding, `channels` bytes per pixel.
fn packed_rows<B: BitmapOps + ?Sized>(bitmap: &B, channels: usize) -> Result<Vec<u8>> {
    let width = bitmap.width()? as usize;
    let pitch = bitmap.pitch()? as usize;
    let raw = bitmap.raw_bits(true)?;
    let row_bytes = width * channels;
    let mut packed = Vec::with_capacity(row_bytes * bitmap.height()? as usize);
    for row in raw.chunks_exact(pitch) {
        packed.extend_from_slice(&row[..row_bytes]);
    }
    Ok(packed)
}

fn swap_red_blue(pixels: &mut [u8], channels: usize) {
    for pixel in pixels.chunks_exact_mut(channels) {
        pixel.swap(0, 2);
    }
}

fn buffer_mismatch() -> Error {
    Error::InvalidArgument("pixel buffer does not match image size".into())
}

/// Copy a bitmap into a `DynamicImage`.
pub fn to_dynamic_image<B: BitmapOps + ?Sized>(bitmap: &B) -> Result<DynamicImage> {
    let (width, height) = (bitmap.width()?, bitmap.height()?);
    match bitmap.bpp()? {
        8 if bitmap.color_type()? == ColorType::MinIsBlack => {
            let luma = packed_rows(bitmap, 1)?;
            GrayImage::from_raw(width, height, luma)
                .map(DynamicImage::ImageLuma8)
                .ok_or_else(buffer_mismatch)
        }
        24 => {
            let mut rgb = packed_rows(bitmap, 3)?;
            swap_red_blue(&mut rgb, 3);
            RgbImage::from_raw(width, height, rgb)
                .map(DynamicImage::ImageRgb8)
                .ok_or_else(buffer_mismatch)
        }
        32 => {
            let mut rgba = packed_rows(bitmap, 4)?;
            swap_red_blue(&mut rgba, 4);
            RgbaImage::from_raw(width, height, rgba)
                .map(DynamicImage::ImageRgba8)
                .ok_or_else(buffer_mismatch)
        }
        _ => to_dynamic_image(&bitmap.convert_to_24bits()?),
    }
}

impl Library {
    /// Copy a `DynamicImage` into a new bitmap.
    pub fn from_dynamic_image(&self, image: &DynamicImage) -> Result<Bitmap> {
        let (width, height) = (image.width(), image.height());
        let (bpp, channels, mut pixels) = match image {
            DynamicImage::ImageLuma8(luma) => (8, 1, luma.as_raw().clone()),
            DynamicImage::ImageRgb8(rgb) => (24, 3, rgb.as_raw().clone()),
            other => (32, 4, other.to_rgba8().into_raw()),
        };
        if channels > 1 {
            swap_red_blue(&mut pixels, channels);
        }
        let bitmap = self.allocate(width, height, bpp)?;
        let get_scan_line = self.api().get_scan_line()?;
        let row_bytes = width as usize * channels;
        for (top, row) in pixels.chunks_exact(row_bytes).enumerate() {
            // Scan line 0 is the bottom row.
            let line = height as usize - 1 - top;
            let line = libc::c_int::try_from(line).map_err(|_| buffer_mismatch())?;
            let target = unsafe { get_scan_line(bitmap.raw(), line) };
            if target.is_null() {
                return Err(library::native_error("FreeImage_GetScanLine"));
            }
            unsafe { std::ptr::copy_nonoverlapping(row.as_ptr(), target, row_bytes) };
        }
        Ok(bitmap)
    }
}
