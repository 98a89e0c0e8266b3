//! Bitmaps and the operations on them.
//!
//! [`Bitmap`] owns one `FIBITMAP*` and unloads it on drop. Pages locked out
//! of a multi-page container ([`LockedPage`](crate::multipage::LockedPage))
//! are views instead: they are unlocked, never unloaded. Both implement
//! [`BitmapOps`], which carries every operation, so the rest of the crate is
//! agnostic about which one it holds.
//!
//! Operations that produce a new image return a new owned [`Bitmap`] and
//! leave the source untouched. Operations that change pixels in place take
//! `&self` like the native calls do, and flag locked pages as modified so
//! the change is written back on unlock.
//!
//! Depth-restricted operations check the bitmap against the sets in
//! [`depth`] first and fail with [`Error::WrongDepth`].

pub mod depth;

use crate::error::{Error, Result};
use crate::ffi::{
    BOOL, FALSE, FI_RGBA_BLUE_MASK, FI_RGBA_GREEN_MASK, FI_RGBA_RED_MASK, FI16_555_BLUE_MASK, FI16_555_GREEN_MASK,
    FI16_555_RED_MASK, FIBITMAP, RGBQUAD, TRUE,
};
use crate::format::ImageFormat;
use crate::library::{self, Library};
use crate::stream::ImageStream;
use crate::types::{ColorChannel, ColorType, Dither, Dpi, Filter, ImageType, Pixel, Quantize, Rgba, Size};
use depth::{
    COL_1TO8, COL_1TO32, COL_1TO48, COL_8, COL_8_24_32, COL_8_32, COL_16TO32, COL_24, COL_24_32, require_depth,
};
use libc::c_int;
use log::debug;
use std::fmt;
use std::io::Cursor;
use std::path::Path;
use std::ptr::{self, NonNull};

pub(crate) mod sealed {
    pub trait Sealed {}
}

/// An owned FreeImage bitmap.
pub struct Bitmap {
    library: Library,
    raw: NonNull<FIBITMAP>,
}

impl Bitmap {
    /// Take ownership of a bitmap handle.
    ///
    /// # Safety
    /// `raw` must be a live bitmap allocated by `library` and not owned by
    /// anything else: it is unloaded when the returned value drops.
    pub unsafe fn from_raw(library: &Library, raw: NonNull<FIBITMAP>) -> Self {
        Self {
            library: library.clone(),
            raw,
        }
    }

    /// Wrap the result of a native call, turning null into the native error.
    pub(crate) unsafe fn wrap(library: &Library, raw: *mut FIBITMAP, operation: &'static str) -> Result<Self> {
        match NonNull::new(raw) {
            Some(raw) => Ok(unsafe { Self::from_raw(library, raw) }),
            None => Err(library::native_error(operation)),
        }
    }

    /// Give up ownership without unloading.
    pub fn into_raw(self) -> NonNull<FIBITMAP> {
        let raw = self.raw;
        std::mem::forget(self);
        raw
    }
}

impl Drop for Bitmap {
    fn drop(&mut self) {
        match self.library.api().unload() {
            Ok(unload) => unsafe { unload(self.raw.as_ptr()) },
            Err(err) => log::warn!("leaking bitmap: {err}"),
        }
    }
}

impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bitmap")
            .field("raw", &self.raw)
            .field("size", &self.size().ok())
            .field("bpp", &self.bpp().ok())
            .finish()
    }
}

impl sealed::Sealed for Bitmap {}

impl BitmapOps for Bitmap {
    fn library(&self) -> &Library {
        &self.library
    }

    fn raw(&self) -> *mut FIBITMAP {
        self.raw.as_ptr()
    }
}

/// Run a native call that returns a new bitmap.
fn produce<B>(source: &B, operation: &'static str, call: impl FnOnce() -> *mut FIBITMAP) -> Result<Bitmap>
where
    B: BitmapOps + ?Sized,
{
    library::clear_last_message();
    let raw = call();
    unsafe { Bitmap::wrap(source.library(), raw, operation) }
}

/// Run a native call that reports success as a `BOOL`.
fn succeed(operation: &'static str, call: impl FnOnce() -> BOOL) -> Result<()> {
    library::clear_last_message();
    if call() == FALSE {
        Err(library::native_error(operation))
    } else {
        Ok(())
    }
}

fn coordinate(value: u32, limit: u32, axis: &str) -> Result<u32> {
    if value < limit {
        Ok(value)
    } else {
        Err(Error::InvalidArgument(format!("{axis} {value} outside 0..{limit}")))
    }
}

fn int(value: u32, what: &str) -> Result<c_int> {
    c_int::try_from(value).map_err(|_| Error::InvalidArgument(format!("{what} {value} too large")))
}

/// Operations available on any bitmap, owned or locked.
///
/// Implemented by [`Bitmap`] and
/// [`LockedPage`](crate::multipage::LockedPage) only.
pub trait BitmapOps: sealed::Sealed {
    fn library(&self) -> &Library;

    /// The native handle. Valid for as long as `self` is.
    fn raw(&self) -> *mut FIBITMAP;

    /// Record that the pixels were changed in place.
    fn mark_modified(&self) {}

    // -- Information ------------------------------------------------------

    fn width(&self) -> Result<u32> {
        let get_width = self.library().api().get_width()?;
        Ok(unsafe { get_width(self.raw()) })
    }

    fn height(&self) -> Result<u32> {
        let get_height = self.library().api().get_height()?;
        Ok(unsafe { get_height(self.raw()) })
    }

    fn size(&self) -> Result<Size> {
        Ok(Size::new(self.width()?, self.height()?))
    }

    /// Bits per pixel.
    fn bpp(&self) -> Result<u32> {
        let get_bpp = self.library().api().get_bpp()?;
        Ok(unsafe { get_bpp(self.raw()) })
    }

    /// Bytes per scan line, without padding.
    fn line(&self) -> Result<u32> {
        let get_line = self.library().api().get_line()?;
        Ok(unsafe { get_line(self.raw()) })
    }

    /// Bytes per scan line, including padding to a 32-bit boundary.
    fn pitch(&self) -> Result<u32> {
        let get_pitch = self.library().api().get_pitch()?;
        Ok(unsafe { get_pitch(self.raw()) })
    }

    fn dib_size(&self) -> Result<u32> {
        let get_dib_size = self.library().api().get_dib_size()?;
        Ok(unsafe { get_dib_size(self.raw()) })
    }

    fn image_type(&self) -> Result<ImageType> {
        let get_image_type = self.library().api().get_image_type()?;
        let code = unsafe { get_image_type(self.raw()) };
        Ok(ImageType::from_code(code).unwrap_or(ImageType::Unknown))
    }

    fn colors_used(&self) -> Result<u32> {
        require_depth(self, "FreeImage_GetColorsUsed", COL_1TO32)?;
        let get_colors_used = self.library().api().get_colors_used()?;
        Ok(unsafe { get_colors_used(self.raw()) })
    }

    /// Palette entries; empty for bitmaps without a palette.
    fn palette(&self) -> Result<Vec<Rgba>> {
        require_depth(self, "FreeImage_GetPalette", COL_1TO32)?;
        let get_palette = self.library().api().get_palette()?;
        let colors = self.colors_used()? as usize;
        let palette = unsafe { get_palette(self.raw()) };
        if palette.is_null() {
            return Ok(Vec::new());
        }
        let entries = unsafe { std::slice::from_raw_parts(palette, colors) };
        Ok(entries.iter().copied().map(Rgba::from).collect())
    }

    fn color_type(&self) -> Result<ColorType> {
        require_depth(self, "FreeImage_GetColorType", COL_1TO32)?;
        let get_color_type = self.library().api().get_color_type()?;
        let code = unsafe { get_color_type(self.raw()) };
        ColorType::from_code(code)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown color type {code}")))
    }

    fn transparency_count(&self) -> Result<u32> {
        require_depth(self, "FreeImage_GetTransparencyCount", COL_1TO32)?;
        let get_transparency_count = self.library().api().get_transparency_count()?;
        Ok(unsafe { get_transparency_count(self.raw()) })
    }

    fn is_transparent(&self) -> Result<bool> {
        require_depth(self, "FreeImage_IsTransparent", COL_1TO32)?;
        let is_transparent = self.library().api().is_transparent()?;
        Ok(unsafe { is_transparent(self.raw()) } != FALSE)
    }

    /// Alpha value per palette entry; empty when the bitmap has none.
    fn transparency_table(&self) -> Result<Vec<u8>> {
        require_depth(self, "FreeImage_GetTransparencyTable", COL_8)?;
        let get_transparency_table = self.library().api().get_transparency_table()?;
        let count = self.transparency_count()? as usize;
        let table = unsafe { get_transparency_table(self.raw()) };
        if table.is_null() || count == 0 {
            return Ok(Vec::new());
        }
        Ok(unsafe { std::slice::from_raw_parts(table, count) }.to_vec())
    }

    /// Set the alpha of the first `table.len()` palette entries. An empty
    /// table clears transparency.
    fn set_transparency_table(&self, table: &[u8]) -> Result<()> {
        require_depth(self, "FreeImage_SetTransparencyTable", COL_8)?;
        if table.len() > 256 {
            return Err(Error::InvalidArgument(format!(
                "transparency table has {} entries, at most 256 allowed",
                table.len()
            )));
        }
        let set_transparency_table = self.library().api().set_transparency_table()?;
        let mut table = table.to_vec();
        let count = table.len() as c_int;
        unsafe { set_transparency_table(self.raw(), table.as_mut_ptr(), count) };
        self.mark_modified();
        Ok(())
    }

    fn set_transparent(&self, enabled: bool) -> Result<()> {
        require_depth(self, "FreeImage_SetTransparent", COL_8_32)?;
        let set_transparent = self.library().api().set_transparent()?;
        unsafe { set_transparent(self.raw(), if enabled { TRUE } else { FALSE }) };
        self.mark_modified();
        Ok(())
    }

    /// Bit masks of the red, green and blue channels. Zero for palettised
    /// bitmaps.
    fn color_masks(&self) -> Result<(u32, u32, u32)> {
        require_depth(self, "FreeImage_GetRedMask", COL_1TO32)?;
        let api = self.library().api();
        let (red, green, blue) = (api.get_red_mask()?, api.get_green_mask()?, api.get_blue_mask()?);
        Ok(unsafe { (red(self.raw()), green(self.raw()), blue(self.raw())) })
    }

    fn background_color(&self) -> Result<Option<Rgba>> {
        require_depth(self, "FreeImage_GetBackgroundColor", COL_8_24_32)?;
        let api = self.library().api();
        let has_background_color = api.has_background_color()?;
        if unsafe { has_background_color(self.raw()) } == FALSE {
            return Ok(None);
        }
        let get_background_color = api.get_background_color()?;
        let mut quad = RGBQUAD::default();
        succeed("FreeImage_GetBackgroundColor", || unsafe {
            get_background_color(self.raw(), &mut quad)
        })?;
        Ok(Some(quad.into()))
    }

    fn set_background_color(&self, color: Rgba) -> Result<()> {
        require_depth(self, "FreeImage_SetBackgroundColor", COL_8_24_32)?;
        let set_background_color = self.library().api().set_background_color()?;
        let mut quad = RGBQUAD::from(color);
        succeed("FreeImage_SetBackgroundColor", || unsafe {
            set_background_color(self.raw(), &mut quad)
        })?;
        self.mark_modified();
        Ok(())
    }

    /// Resolution, rounded to whole dots per inch.
    fn dpi(&self) -> Result<Dpi> {
        let api = self.library().api();
        let (get_x, get_y) = (api.get_dots_per_meter_x()?, api.get_dots_per_meter_y()?);
        let (x, y) = unsafe { (get_x(self.raw()), get_y(self.raw())) };
        Ok(Dpi::from_dots_per_meter(x, y))
    }

    fn set_dpi(&self, dpi: Dpi) -> Result<()> {
        let api = self.library().api();
        let (set_x, set_y) = (api.set_dots_per_meter_x()?, api.set_dots_per_meter_y()?);
        let (x, y) = dpi.to_dots_per_meter();
        unsafe {
            set_x(self.raw(), x);
            set_y(self.raw(), y);
        }
        self.mark_modified();
        Ok(())
    }

    // -- Pixel access -----------------------------------------------------

    fn pixel_index(&self, x: u32, y: u32) -> Result<u8> {
        require_depth(self, "FreeImage_GetPixelIndex", COL_1TO8)?;
        let get_pixel_index = self.library().api().get_pixel_index()?;
        let mut value = 0u8;
        succeed("FreeImage_GetPixelIndex", || unsafe {
            get_pixel_index(self.raw(), x, y, &mut value)
        })?;
        Ok(value)
    }

    fn set_pixel_index(&self, x: u32, y: u32, value: u8) -> Result<()> {
        require_depth(self, "FreeImage_SetPixelIndex", COL_1TO8)?;
        let set_pixel_index = self.library().api().set_pixel_index()?;
        let mut value = value;
        succeed("FreeImage_SetPixelIndex", || unsafe {
            set_pixel_index(self.raw(), x, y, &mut value)
        })?;
        self.mark_modified();
        Ok(())
    }

    fn pixel_color(&self, x: u32, y: u32) -> Result<Rgba> {
        require_depth(self, "FreeImage_GetPixelColor", COL_16TO32)?;
        let get_pixel_color = self.library().api().get_pixel_color()?;
        let mut quad = RGBQUAD::default();
        succeed("FreeImage_GetPixelColor", || unsafe {
            get_pixel_color(self.raw(), x, y, &mut quad)
        })?;
        Ok(quad.into())
    }

    fn set_pixel_color(&self, x: u32, y: u32, color: Rgba) -> Result<()> {
        require_depth(self, "FreeImage_SetPixelColor", COL_16TO32)?;
        let set_pixel_color = self.library().api().set_pixel_color()?;
        let mut quad = RGBQUAD::from(color);
        succeed("FreeImage_SetPixelColor", || unsafe {
            set_pixel_color(self.raw(), x, y, &mut quad)
        })?;
        self.mark_modified();
        Ok(())
    }

    /// Palette index for 1/4/8-bit bitmaps, color otherwise.
    fn pixel(&self, x: u32, y: u32) -> Result<Pixel> {
        if COL_1TO8.contains(&self.bpp()?) {
            self.pixel_index(x, y).map(Pixel::Index)
        } else {
            self.pixel_color(x, y).map(Pixel::Color)
        }
    }

    /// One scan line, bottom-up order (line 0 is the bottom of the image).
    fn scan_line(&self, y: u32) -> Result<Vec<u8>> {
        let y = coordinate(y, self.height()?, "scan line")?;
        let get_scan_line = self.library().api().get_scan_line()?;
        let length = self.line()? as usize;
        let line = unsafe { get_scan_line(self.raw(), int(y, "scan line")?) };
        if line.is_null() {
            return Err(library::native_error("FreeImage_GetScanLine"));
        }
        Ok(unsafe { std::slice::from_raw_parts(line, length) }.to_vec())
    }

    /// Pixel data as one buffer of `pitch * height` bytes in 8-8-8 RGB
    /// mask order.
    fn raw_bits(&self, topdown: bool) -> Result<Vec<u8>> {
        let bpp = require_depth(self, "FreeImage_ConvertToRawBits", COL_1TO32)?;
        let convert_to_raw_bits = self.library().api().convert_to_raw_bits()?;
        let pitch = self.pitch()?;
        let mut bits = vec![0u8; pitch as usize * self.height()? as usize];
        unsafe {
            convert_to_raw_bits(
                bits.as_mut_ptr(),
                self.raw(),
                int(pitch, "pitch")?,
                bpp,
                FI_RGBA_RED_MASK,
                FI_RGBA_GREEN_MASK,
                FI_RGBA_BLUE_MASK,
                if topdown { TRUE } else { FALSE },
            )
        };
        Ok(bits)
    }

    // -- Conversion -------------------------------------------------------

    fn try_clone(&self) -> Result<Bitmap> {
        let clone_bitmap = self.library().api().clone_bitmap()?;
        produce(self, "FreeImage_Clone", || unsafe { clone_bitmap(self.raw()) })
    }

    fn convert_to_4bits(&self) -> Result<Bitmap> {
        require_depth(self, "FreeImage_ConvertTo4Bits", COL_1TO32)?;
        let convert = self.library().api().convert_to_4bits()?;
        produce(self, "FreeImage_ConvertTo4Bits", || unsafe { convert(self.raw()) })
    }

    fn convert_to_8bits(&self) -> Result<Bitmap> {
        require_depth(self, "FreeImage_ConvertTo8Bits", COL_1TO32)?;
        let convert = self.library().api().convert_to_8bits()?;
        produce(self, "FreeImage_ConvertTo8Bits", || unsafe { convert(self.raw()) })
    }

    fn convert_to_greyscale(&self) -> Result<Bitmap> {
        require_depth(self, "FreeImage_ConvertToGreyscale", COL_1TO32)?;
        let convert = self.library().api().convert_to_greyscale()?;
        produce(self, "FreeImage_ConvertToGreyscale", || unsafe { convert(self.raw()) })
    }

    fn convert_to_16bits_555(&self) -> Result<Bitmap> {
        require_depth(self, "FreeImage_ConvertTo16Bits555", COL_1TO32)?;
        let convert = self.library().api().convert_to_16bits_555()?;
        produce(self, "FreeImage_ConvertTo16Bits555", || unsafe { convert(self.raw()) })
    }

    fn convert_to_16bits_565(&self) -> Result<Bitmap> {
        require_depth(self, "FreeImage_ConvertTo16Bits565", COL_1TO32)?;
        let convert = self.library().api().convert_to_16bits_565()?;
        produce(self, "FreeImage_ConvertTo16Bits565", || unsafe { convert(self.raw()) })
    }

    fn convert_to_24bits(&self) -> Result<Bitmap> {
        require_depth(self, "FreeImage_ConvertTo24Bits", COL_1TO48)?;
        let convert = self.library().api().convert_to_24bits()?;
        produce(self, "FreeImage_ConvertTo24Bits", || unsafe { convert(self.raw()) })
    }

    fn convert_to_32bits(&self) -> Result<Bitmap> {
        require_depth(self, "FreeImage_ConvertTo32Bits", COL_1TO32)?;
        let convert = self.library().api().convert_to_32bits()?;
        produce(self, "FreeImage_ConvertTo32Bits", || unsafe { convert(self.raw()) })
    }

    fn color_quantize(&self, quantize: Quantize) -> Result<Bitmap> {
        require_depth(self, "FreeImage_ColorQuantize", COL_24)?;
        let color_quantize = self.library().api().color_quantize()?;
        produce(self, "FreeImage_ColorQuantize", || unsafe {
            color_quantize(self.raw(), quantize.code())
        })
    }

    /// Quantize to a palette of `palette_size` colors whose first entries
    /// are `reserved`.
    fn color_quantize_ex(&self, quantize: Quantize, palette_size: u32, reserved: &[Rgba]) -> Result<Bitmap> {
        require_depth(self, "FreeImage_ColorQuantizeEx", COL_24)?;
        if !(2..=256).contains(&palette_size) || reserved.len() > palette_size as usize {
            return Err(Error::InvalidArgument(format!(
                "palette of {palette_size} colors with {} reserved",
                reserved.len()
            )));
        }
        let color_quantize_ex = self.library().api().color_quantize_ex()?;
        let mut reserve: Vec<RGBQUAD> = reserved.iter().copied().map(RGBQUAD::from).collect();
        let reserve_size = reserve.len() as c_int;
        let reserve_palette = if reserve.is_empty() {
            ptr::null_mut()
        } else {
            reserve.as_mut_ptr()
        };
        produce(self, "FreeImage_ColorQuantizeEx", || unsafe {
            color_quantize_ex(self.raw(), quantize.code(), palette_size as c_int, reserve_size, reserve_palette)
        })
    }

    /// 1-bit image: pixels above `threshold` become white.
    fn threshold(&self, threshold: u8) -> Result<Bitmap> {
        require_depth(self, "FreeImage_Threshold", COL_1TO32)?;
        let threshold_fn = self.library().api().threshold()?;
        produce(self, "FreeImage_Threshold", || unsafe { threshold_fn(self.raw(), threshold) })
    }

    /// 1-bit image by dithering.
    fn dither(&self, algorithm: Dither) -> Result<Bitmap> {
        require_depth(self, "FreeImage_Dither", COL_1TO32)?;
        let dither = self.library().api().dither()?;
        produce(self, "FreeImage_Dither", || unsafe { dither(self.raw(), algorithm.code()) })
    }

    fn convert_to_standard_type(&self, scale_linear: bool) -> Result<Bitmap> {
        let convert = self.library().api().convert_to_standard_type()?;
        let scale = if scale_linear { TRUE } else { FALSE };
        produce(self, "FreeImage_ConvertToStandardType", || unsafe {
            convert(self.raw(), scale)
        })
    }

    fn convert_to_type(&self, image_type: ImageType, scale_linear: bool) -> Result<Bitmap> {
        let convert = self.library().api().convert_to_type()?;
        let scale = if scale_linear { TRUE } else { FALSE };
        produce(self, "FreeImage_ConvertToType", || unsafe {
            convert(self.raw(), image_type.code(), scale)
        })
    }

    /// 96-bit floating point RGB copy, channels scaled to `0.0..=1.0`.
    fn convert_to_rgbf(&self) -> Result<Bitmap> {
        require_depth(self, "FreeImage_ConvertToRGBF", COL_24_32)?;
        let convert = self.library().api().convert_to_rgbf()?;
        produce(self, "FreeImage_ConvertToRGBF", || unsafe { convert(self.raw()) })
    }

    /// Copy converted to `bpp` bits per pixel, keeping the resolution.
    ///
    /// 1 dithers, 16 uses the 5-5-5 layout. A bitmap already at `bpp` is
    /// cloned.
    fn with_bpp(&self, bpp: u32) -> Result<Bitmap> {
        if self.bpp()? == bpp {
            return self.try_clone();
        }
        let dpi = self.dpi()?;
        let converted = match bpp {
            1 => self.dither(Dither::FloydSteinberg)?,
            4 => self.convert_to_4bits()?,
            8 => self.convert_to_8bits()?,
            16 => self.convert_to_16bits_555()?,
            24 => self.convert_to_24bits()?,
            32 => self.convert_to_32bits()?,
            other => return Err(Error::InvalidArgument(format!("cannot convert to {other} bits per pixel"))),
        };
        converted.set_dpi(dpi)?;
        debug!("converted bitmap to {bpp} bpp");
        Ok(converted)
    }

    /// Turn a min-is-black bitmap into min-is-white by inverting the
    /// pixels (when `invert` is set) and the palette.
    ///
    /// Returns `false` when the bitmap was not min-is-black.
    fn convert_to_min_is_white(&self, invert: bool) -> Result<bool> {
        if self.color_type()? != ColorType::MinIsBlack {
            return Ok(false);
        }
        if invert {
            self.invert()?;
        }
        let get_palette = self.library().api().get_palette()?;
        let colors = self.colors_used()? as usize;
        let palette = unsafe { get_palette(self.raw()) };
        if !palette.is_null() {
            let entries = unsafe { std::slice::from_raw_parts_mut(palette, colors) };
            for entry in entries {
                entry.rgbRed = 255 - entry.rgbRed;
                entry.rgbGreen = 255 - entry.rgbGreen;
                entry.rgbBlue = 255 - entry.rgbBlue;
            }
        }
        self.mark_modified();
        Ok(true)
    }

    // -- Copy / paste -----------------------------------------------------

    /// Sub-image `[left, right) x [top, bottom)`.
    fn copy(&self, left: u32, top: u32, right: u32, bottom: u32) -> Result<Bitmap> {
        if right <= left || bottom <= top {
            return Err(Error::InvalidArgument(format!(
                "empty copy rectangle ({left}, {top}, {right}, {bottom})"
            )));
        }
        let copy = self.library().api().copy()?;
        let (l, t, r, b) = (int(left, "left")?, int(top, "top")?, int(right, "right")?, int(bottom, "bottom")?);
        produce(self, "FreeImage_Copy", || unsafe { copy(self.raw(), l, t, r, b) })
    }

    /// Paste `source` at `(left, top)`. `alpha` 0..=255 blends, above 255
    /// uses the source's own alpha.
    fn paste(&self, source: &dyn BitmapOps, left: u32, top: u32, alpha: u32) -> Result<()> {
        require_depth(self, "FreeImage_Paste", COL_1TO32)?;
        let paste = self.library().api().paste()?;
        let (l, t, a) = (int(left, "left")?, int(top, "top")?, int(alpha, "alpha")?);
        succeed("FreeImage_Paste", || unsafe { paste(self.raw(), source.raw(), l, t, a) })?;
        self.mark_modified();
        Ok(())
    }

    // -- Resampling -------------------------------------------------------

    fn rescale(&self, size: Size, filter: Filter) -> Result<Bitmap> {
        require_depth(self, "FreeImage_Rescale", COL_1TO32)?;
        if size.width == 0 || size.height == 0 {
            return Err(Error::InvalidArgument(format!(
                "cannot rescale to {}x{}",
                size.width, size.height
            )));
        }
        let rescale = self.library().api().rescale()?;
        let (w, h) = (int(size.width, "width")?, int(size.height, "height")?);
        produce(self, "FreeImage_Rescale", || unsafe { rescale(self.raw(), w, h, filter.code()) })
    }

    /// Scaled copy whose longer side is `max_pixel_size`.
    fn thumbnail(&self, max_pixel_size: u32, convert: bool) -> Result<Bitmap> {
        require_depth(self, "FreeImage_MakeThumbnail", COL_8_24_32)?;
        let make_thumbnail = self.library().api().make_thumbnail()?;
        let max = int(max_pixel_size, "thumbnail size")?;
        let convert = if convert { TRUE } else { FALSE };
        produce(self, "FreeImage_MakeThumbnail", || unsafe {
            make_thumbnail(self.raw(), max, convert)
        })
    }

    // -- Rotation and flipping --------------------------------------------

    /// Rotated copy; `angle` in degrees, counter-clockwise.
    fn rotate(&self, angle: f64) -> Result<Bitmap> {
        require_depth(self, "FreeImage_RotateClassic", COL_1TO32)?;
        let rotate_classic = self.library().api().rotate_classic()?;
        produce(self, "FreeImage_RotateClassic", || unsafe { rotate_classic(self.raw(), angle) })
    }

    /// Rotate by `angle` degrees around `origin`, then translate by `shift`.
    /// The size is kept; with `use_mask` the uncovered area is black,
    /// otherwise it repeats the image.
    fn rotate_ex(&self, angle: f64, shift: (f64, f64), origin: (f64, f64), use_mask: bool) -> Result<Bitmap> {
        require_depth(self, "FreeImage_RotateEx", COL_8_24_32)?;
        let rotate_ex = self.library().api().rotate_ex()?;
        let use_mask = if use_mask { TRUE } else { FALSE };
        produce(self, "FreeImage_RotateEx", || unsafe {
            rotate_ex(self.raw(), angle, shift.0, shift.1, origin.0, origin.1, use_mask)
        })
    }

    fn flip_horizontal(&self) -> Result<()> {
        let flip = self.library().api().flip_horizontal()?;
        succeed("FreeImage_FlipHorizontal", || unsafe { flip(self.raw()) })?;
        self.mark_modified();
        Ok(())
    }

    fn flip_vertical(&self) -> Result<()> {
        let flip = self.library().api().flip_vertical()?;
        succeed("FreeImage_FlipVertical", || unsafe { flip(self.raw()) })?;
        self.mark_modified();
        Ok(())
    }

    // -- Color ------------------------------------------------------------

    fn invert(&self) -> Result<()> {
        require_depth(self, "FreeImage_Invert", COL_1TO32)?;
        let invert = self.library().api().invert()?;
        succeed("FreeImage_Invert", || unsafe { invert(self.raw()) })?;
        self.mark_modified();
        Ok(())
    }

    /// `percentage` in -100..=100.
    fn adjust_brightness(&self, percentage: f64) -> Result<()> {
        require_depth(self, "FreeImage_AdjustBrightness", COL_8_24_32)?;
        let adjust = self.library().api().adjust_brightness()?;
        succeed("FreeImage_AdjustBrightness", || unsafe { adjust(self.raw(), percentage) })?;
        self.mark_modified();
        Ok(())
    }

    /// `percentage` in -100..=100.
    fn adjust_contrast(&self, percentage: f64) -> Result<()> {
        require_depth(self, "FreeImage_AdjustContrast", COL_8_24_32)?;
        let adjust = self.library().api().adjust_contrast()?;
        succeed("FreeImage_AdjustContrast", || unsafe { adjust(self.raw(), percentage) })?;
        self.mark_modified();
        Ok(())
    }

    /// `gamma` > 0; 1.0 leaves the image unchanged.
    fn adjust_gamma(&self, gamma: f64) -> Result<()> {
        require_depth(self, "FreeImage_AdjustGamma", COL_8_24_32)?;
        if gamma <= 0.0 {
            return Err(Error::InvalidArgument(format!("gamma must be positive, got {gamma}")));
        }
        let adjust = self.library().api().adjust_gamma()?;
        succeed("FreeImage_AdjustGamma", || unsafe { adjust(self.raw(), gamma) })?;
        self.mark_modified();
        Ok(())
    }

    /// Map the levels of `channel` through `lut`. 8-bit bitmaps map their
    /// grey levels whatever the channel.
    fn adjust_curve(&self, lut: &[u8; 256], channel: ColorChannel) -> Result<()> {
        require_depth(self, "FreeImage_AdjustCurve", COL_8_24_32)?;
        let adjust_curve = self.library().api().adjust_curve()?;
        let mut lut = *lut;
        succeed("FreeImage_AdjustCurve", || unsafe {
            adjust_curve(self.raw(), lut.as_mut_ptr(), channel.code())
        })?;
        self.mark_modified();
        Ok(())
    }

    fn histogram(&self, channel: ColorChannel) -> Result<[u32; 256]> {
        require_depth(self, "FreeImage_GetHistogram", COL_8_24_32)?;
        let get_histogram = self.library().api().get_histogram()?;
        let mut bins = [0u32; 256];
        succeed("FreeImage_GetHistogram", || unsafe {
            get_histogram(self.raw(), bins.as_mut_ptr(), channel.code())
        })?;
        Ok(bins)
    }

    /// One channel as an 8-bit bitmap.
    fn channel(&self, channel: ColorChannel) -> Result<Bitmap> {
        require_depth(self, "FreeImage_GetChannel", COL_24_32)?;
        let get_channel = self.library().api().get_channel()?;
        produce(self, "FreeImage_GetChannel", || unsafe {
            get_channel(self.raw(), channel.code())
        })
    }

    /// Replace one channel with the 8-bit `source`.
    fn set_channel(&self, source: &dyn BitmapOps, channel: ColorChannel) -> Result<()> {
        require_depth(self, "FreeImage_SetChannel", COL_24_32)?;
        let set_channel = self.library().api().set_channel()?;
        succeed("FreeImage_SetChannel", || unsafe {
            set_channel(self.raw(), source.raw(), channel.code())
        })?;
        self.mark_modified();
        Ok(())
    }

    /// Real, imaginary, magnitude or phase part of a complex bitmap, as a
    /// `Double` bitmap.
    fn complex_channel(&self, channel: ColorChannel) -> Result<Bitmap> {
        let get_complex_channel = self.library().api().get_complex_channel()?;
        produce(self, "FreeImage_GetComplexChannel", || unsafe {
            get_complex_channel(self.raw(), channel.code())
        })
    }

    /// Replace the real or imaginary part with the `Double` bitmap `source`.
    fn set_complex_channel(&self, source: &dyn BitmapOps, channel: ColorChannel) -> Result<()> {
        let set_complex_channel = self.library().api().set_complex_channel()?;
        succeed("FreeImage_SetComplexChannel", || unsafe {
            set_complex_channel(self.raw(), source.raw(), channel.code())
        })?;
        self.mark_modified();
        Ok(())
    }

    // -- Saving -----------------------------------------------------------

    fn save(&self, format: ImageFormat, path: &Path, flags: i32) -> Result<()> {
        let save = self.library().api().save()?;
        let filename = library::path_cstring(path)?;
        succeed("FreeImage_Save", || unsafe {
            save(format.code(), self.raw(), filename.as_ptr(), flags)
        })?;
        debug!("saved {} as {format}", path.display());
        Ok(())
    }

    fn save_to_stream(&self, format: ImageFormat, stream: &mut dyn ImageStream, flags: i32) -> Result<()> {
        crate::stream::save_to_stream(self, format, stream, flags)
    }

    /// Encode into a new buffer.
    fn save_to_vec(&self, format: ImageFormat, flags: i32) -> Result<Vec<u8>> {
        let mut buffer = Cursor::new(Vec::new());
        self.save_to_stream(format, &mut buffer, flags)?;
        Ok(buffer.into_inner())
    }
}

impl Library {
    /// New bitmap; masks are only used for 16-bit images.
    pub fn allocate(&self, width: u32, height: u32, bpp: u32) -> Result<Bitmap> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidArgument(format!("cannot allocate {width}x{height} bitmap")));
        }
        let allocate = self.api().allocate()?;
        let (w, h, b) = (int(width, "width")?, int(height, "height")?, int(bpp, "bpp")?);
        library::clear_last_message();
        let raw = unsafe { allocate(w, h, b, 0, 0, 0) };
        unsafe { Bitmap::wrap(self, raw, "FreeImage_Allocate") }
    }

    /// New bitmap of a non-standard pixel type. `bpp` only matters for
    /// [`ImageType::Bitmap`]; the other types have a fixed depth.
    pub fn allocate_typed(&self, image_type: ImageType, width: u32, height: u32, bpp: u32) -> Result<Bitmap> {
        let allocate_t = self.api().allocate_t()?;
        let (w, h, b) = (int(width, "width")?, int(height, "height")?, int(bpp, "bpp")?);
        library::clear_last_message();
        let raw = unsafe { allocate_t(image_type.code(), w, h, b, 0, 0, 0) };
        unsafe { Bitmap::wrap(self, raw, "FreeImage_AllocateT") }
    }

    /// Bitmap from `size.height` rows of `pitch` bytes each, laid out like
    /// [`BitmapOps::raw_bits`] returns them. 16-bit data is read as 5-5-5.
    pub fn convert_from_raw_bits(&self, bits: &[u8], size: Size, pitch: u32, bpp: u32, topdown: bool) -> Result<Bitmap> {
        if !COL_1TO32.contains(&bpp) {
            return Err(Error::WrongDepth {
                depth: bpp,
                operation: "FreeImage_ConvertFromRawBits",
                allowed: COL_1TO32,
            });
        }
        if size.width == 0 || size.height == 0 || (pitch as usize) < (size.width as usize * bpp as usize).div_ceil(8) {
            return Err(Error::InvalidArgument(format!(
                "cannot read {}x{} pixels of {bpp} bits from rows of {pitch} bytes",
                size.width, size.height
            )));
        }
        if bits.len() < pitch as usize * size.height as usize {
            return Err(Error::InvalidArgument(format!(
                "raw buffer holds {} bytes, {} needed",
                bits.len(),
                pitch as usize * size.height as usize
            )));
        }
        let convert = self.api().convert_from_raw_bits()?;
        let (red, green, blue) = if bpp == 16 {
            (FI16_555_RED_MASK, FI16_555_GREEN_MASK, FI16_555_BLUE_MASK)
        } else {
            (FI_RGBA_RED_MASK, FI_RGBA_GREEN_MASK, FI_RGBA_BLUE_MASK)
        };
        let (w, h, p) = (int(size.width, "width")?, int(size.height, "height")?, int(pitch, "pitch")?);
        library::clear_last_message();
        // FreeImage only reads from `bits`.
        let raw = unsafe {
            convert(
                bits.as_ptr().cast_mut(),
                w,
                h,
                p,
                bpp,
                red,
                green,
                blue,
                if topdown { TRUE } else { FALSE },
            )
        };
        unsafe { Bitmap::wrap(self, raw, "FreeImage_ConvertFromRawBits") }
    }

    pub fn load(&self, format: ImageFormat, path: &Path, flags: i32) -> Result<Bitmap> {
        let load = self.api().load()?;
        let filename = library::path_cstring(path)?;
        library::clear_last_message();
        let raw = unsafe { load(format.code(), filename.as_ptr(), flags) };
        let bitmap = unsafe { Bitmap::wrap(self, raw, "FreeImage_Load") }?;
        debug!("loaded {} as {format}", path.display());
        Ok(bitmap)
    }
}
