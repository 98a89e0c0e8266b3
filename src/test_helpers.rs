//! Shared test utilities: an in-memory FreeImage.
//!
//! [`fake_api`] fills the function table with entry points that behave like
//! the native library for everything the crate calls. Bitmaps are plain
//! pixel buffers laid out the way FreeImage lays them out (bottom-up scan
//! lines, padded to 32 bits, BGR(A) byte order), and "files" use a tiny
//! private container so tests can write fixtures without real codecs.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let library = fake_library();
//! let before = fake_live_bitmaps();
//! let bitmap = library.allocate(4, 4, 8).unwrap();
//! assert_eq!(fake_live_bitmaps(), before + 1);
//!
//! drop(bitmap);
//! assert_eq!(fake_calls().unload, 1);
//! ```
//!
//! Bookkeeping (call counters, live bitmaps, the message callback, disabled
//! plugins) is thread-local. The counters restart with every [`fake_api`],
//! so a test that builds one fake library sees only its own calls.

use crate::bitmap::BitmapOps;
use crate::ffi::{
    Api, BOOL, BYTE, DWORD, FALSE, FI_InitProc, FIBITMAP, FIF, FIMETADATA, FIMULTIBITMAP, FITAG, FreeImageIO,
    OutputMessageFunction, Plugin as PluginTable, RGBQUAD, SEEK_SET, TRUE, WORD, fi_handle,
};
use crate::format::ImageFormat;
use crate::library::Library;
use crate::types::{ColorChannel, ColorType, ImageType, MetadataModel, TagType};
use libc::{c_char, c_int, c_uint};
use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::ffi::{CStr, CString};
use std::fs;
use std::path::Path;
use std::ptr;

// =========================================================================
// Call counters
// =========================================================================

/// How often the counted entry points ran on this thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FakeCalls {
    pub initialise: usize,
    pub deinitialise: usize,
    pub unload: usize,
    pub lock: usize,
    pub unlock: usize,
    /// Unlocks that passed `changed = TRUE`.
    pub unlock_changed: usize,
    pub close_multi: usize,
    pub find_close: usize,
}

thread_local! {
    static CALLS: RefCell<FakeCalls> = RefCell::new(FakeCalls::default());
    static LIVE: Cell<usize> = const { Cell::new(0) };
    static OUTPUT: Cell<Option<OutputMessageFunction>> = const { Cell::new(None) };
    static DISABLED: RefCell<HashSet<FIF>> = RefCell::new(HashSet::new());
    static LOCAL_PLUGINS: RefCell<Vec<CString>> = const { RefCell::new(Vec::new()) };
}

fn bump(update: impl FnOnce(&mut FakeCalls)) {
    CALLS.with(|calls| update(&mut calls.borrow_mut()));
}

/// Snapshot of the call counters.
pub fn fake_calls() -> FakeCalls {
    CALLS.with(|calls| *calls.borrow())
}

/// Bitmaps allocated and not yet unloaded, locked pages included.
pub fn fake_live_bitmaps() -> usize {
    LIVE.with(Cell::get)
}

/// Send a message through the callback installed with
/// `FreeImage_SetOutputMessageStdCall`, like a failing plugin would.
pub fn emit_native_message(fif: FIF, message: &str) {
    let text = CString::new(message).unwrap();
    if let Some(output) = OUTPUT.with(Cell::get) {
        unsafe { output(fif, text.as_ptr()) };
    }
}

// =========================================================================
// Library construction
// =========================================================================

/// A library handle backed by the fake table.
pub fn fake_library() -> Library {
    unsafe { Library::from_api(fake_api()) }
}

/// Function table with every entry point the crate uses bound to the fake.
/// The call counters restart from zero.
pub fn fake_api() -> Api {
    CALLS.with(|calls| *calls.borrow_mut() = FakeCalls::default());
    Api {
        initialise: Some(initialise),
        deinitialise: Some(deinitialise),
        get_version: Some(get_version),
        get_copyright_message: Some(get_copyright_message),
        set_output_message: Some(set_output_message),
        is_little_endian: Some(is_little_endian),

        allocate: Some(allocate),
        allocate_t: Some(allocate_t),
        load: Some(load),
        load_from_handle: Some(load_from_handle),
        save: Some(save),
        save_to_handle: Some(save_to_handle),
        clone_bitmap: Some(clone_bitmap),
        unload: Some(unload),

        get_image_type: Some(get_image_type),
        get_colors_used: Some(get_colors_used),
        get_bpp: Some(get_bpp),
        get_width: Some(get_width),
        get_height: Some(get_height),
        get_line: Some(get_line),
        get_pitch: Some(get_pitch),
        get_dib_size: Some(get_dib_size),
        get_palette: Some(get_palette),
        get_dots_per_meter_x: Some(get_dots_per_meter_x),
        get_dots_per_meter_y: Some(get_dots_per_meter_y),
        set_dots_per_meter_x: Some(set_dots_per_meter_x),
        set_dots_per_meter_y: Some(set_dots_per_meter_y),
        get_color_type: Some(get_color_type),
        get_transparency_count: Some(get_transparency_count),
        is_transparent: Some(is_transparent),
        has_background_color: Some(has_background_color),
        get_background_color: Some(get_background_color),
        set_background_color: Some(set_background_color),
        get_red_mask: Some(get_red_mask),
        get_green_mask: Some(get_green_mask),
        get_blue_mask: Some(get_blue_mask),
        get_transparency_table: Some(get_transparency_table),
        set_transparency_table: Some(set_transparency_table),
        set_transparent: Some(set_transparent),

        get_file_type: Some(get_file_type),
        get_file_type_from_handle: Some(get_file_type_from_handle),
        get_fif_count: Some(get_fif_count),
        set_plugin_enabled: Some(set_plugin_enabled),
        is_plugin_enabled: Some(is_plugin_enabled),
        get_fif_from_format: Some(get_fif_from_format),
        get_fif_from_mime: Some(get_fif_from_mime),
        get_format_from_fif: Some(get_format_from_fif),
        get_fif_extension_list: Some(get_fif_extension_list),
        get_fif_description: Some(get_fif_description),
        get_fif_mime_type: Some(get_fif_mime_type),
        get_fif_from_filename: Some(get_fif_from_filename),
        fif_supports_reading: Some(fif_supports_reading),
        fif_supports_writing: Some(fif_supports_writing),
        fif_supports_export_bpp: Some(fif_supports_export_bpp),
        fif_supports_export_type: Some(fif_supports_export_type),
        fif_supports_icc_profiles: Some(fif_supports_icc_profiles),
        get_fif_regexpr: Some(get_fif_regexpr),
        register_local_plugin: Some(register_local_plugin),
        register_external_plugin: Some(register_external_plugin),

        open_multi_bitmap: Some(open_multi_bitmap),
        close_multi_bitmap: Some(close_multi_bitmap),
        get_page_count: Some(get_page_count),
        append_page: Some(append_page),
        insert_page: Some(insert_page),
        delete_page: Some(delete_page),
        lock_page: Some(lock_page),
        unlock_page: Some(unlock_page),
        move_page: Some(move_page),
        get_locked_page_numbers: Some(get_locked_page_numbers),

        get_bits: Some(get_bits),
        get_scan_line: Some(get_scan_line),
        get_pixel_index: Some(get_pixel_index),
        set_pixel_index: Some(set_pixel_index),
        get_pixel_color: Some(get_pixel_color),
        set_pixel_color: Some(set_pixel_color),

        convert_to_4bits: Some(convert_to_4bits),
        convert_to_8bits: Some(convert_to_8bits),
        convert_to_greyscale: Some(convert_to_greyscale),
        convert_to_16bits_555: Some(convert_to_16bits_555),
        convert_to_16bits_565: Some(convert_to_16bits_565),
        convert_to_24bits: Some(convert_to_24bits),
        convert_to_32bits: Some(convert_to_32bits),
        color_quantize: Some(color_quantize),
        color_quantize_ex: Some(color_quantize_ex),
        threshold: Some(threshold),
        dither: Some(dither),
        convert_to_raw_bits: Some(convert_to_raw_bits),
        convert_from_raw_bits: Some(convert_from_raw_bits),
        convert_to_standard_type: Some(convert_to_standard_type),
        convert_to_type: Some(convert_to_type),
        convert_to_rgbf: Some(convert_to_rgbf),

        copy: Some(copy),
        paste: Some(paste),
        rescale: Some(rescale),
        make_thumbnail: Some(make_thumbnail),
        rotate_classic: Some(rotate_classic),
        rotate_ex: Some(rotate_ex),
        flip_horizontal: Some(flip_horizontal),
        flip_vertical: Some(flip_vertical),

        adjust_brightness: Some(adjust_brightness),
        adjust_contrast: Some(adjust_contrast),
        adjust_gamma: Some(adjust_gamma),
        adjust_curve: Some(adjust_curve),
        invert: Some(invert),
        get_histogram: Some(get_histogram),
        get_channel: Some(get_channel),
        set_channel: Some(set_channel),
        get_complex_channel: Some(get_complex_channel),
        set_complex_channel: Some(set_complex_channel),

        get_metadata_count: Some(get_metadata_count),
        find_first_metadata: Some(find_first_metadata),
        find_next_metadata: Some(find_next_metadata),
        find_close_metadata: Some(find_close_metadata),
        get_metadata: Some(get_metadata),
        get_tag_key: Some(get_tag_key),
        get_tag_description: Some(get_tag_description),
        get_tag_id: Some(get_tag_id),
        get_tag_type: Some(get_tag_type),
        get_tag_count: Some(get_tag_count),
        tag_to_string: Some(tag_to_string),

        ..Api::default()
    }
}

// =========================================================================
// Fixture files
// =========================================================================

/// Encoded single image, signed as PNG.
pub fn fake_image_bytes(width: u32, height: u32, bpp: u32) -> Vec<u8> {
    encode(&FakeBitmap::new(width, height, bpp), ImageFormat::PNG.code())
}

/// Write a single image signed as PNG, whatever the file is called.
pub fn write_fake_image(path: &Path, width: u32, height: u32, bpp: u32) {
    fs::write(path, fake_image_bytes(width, height, bpp)).unwrap();
}

/// Write a multi-page file with one blank page per `(width, height, bpp)`.
pub fn write_fake_multipage(path: &Path, format: ImageFormat, pages: &[(u32, u32, u32)]) {
    let pages: Vec<Vec<u8>> = pages
        .iter()
        .map(|&(width, height, bpp)| encode(&FakeBitmap::new(width, height, bpp), format.code()))
        .collect();
    fs::write(path, encode_pages(format.code(), &pages)).unwrap();
}

/// Attach an ASCII tag to a bitmap, the way a plugin does on load.
pub fn fake_add_tag<B: BitmapOps + ?Sized>(bitmap: &B, model: MetadataModel, key: &str, value: &str) {
    let target = unsafe { fake(bitmap.raw()) };
    let id = u16::try_from(target.metadata.len()).unwrap();
    target.metadata.push(FakeTag {
        model: model.code(),
        key: CString::new(key).unwrap(),
        id,
        tag_type: TagType::Ascii.code(),
        count: u32::try_from(value.len()).unwrap() + 1,
        value: CString::new(value).unwrap(),
    });
}

// =========================================================================
// Bitmap model
// =========================================================================

const DEFAULT_DOTS_PER_METER: u32 = 2835;

#[derive(Clone)]
struct FakeTag {
    model: c_int,
    key: CString,
    id: u16,
    tag_type: c_int,
    count: u32,
    value: CString,
}

#[derive(Clone)]
struct FakeBitmap {
    width: u32,
    height: u32,
    bpp: u32,
    image_type: ImageType,
    rgb565: bool,
    pixels: Vec<u8>,
    palette: Vec<RGBQUAD>,
    dpm_x: u32,
    dpm_y: u32,
    background: Option<RGBQUAD>,
    transparent: bool,
    transparency: Vec<u8>,
    metadata: Vec<FakeTag>,
}

fn grey(value: u8) -> RGBQUAD {
    RGBQUAD {
        rgbBlue: value,
        rgbGreen: value,
        rgbRed: value,
        rgbReserved: 0,
    }
}

fn grey_ramp(bpp: u32) -> Vec<RGBQUAD> {
    let colors = 1usize << bpp;
    (0..colors).map(|index| grey((index * 255 / (colors - 1)) as u8)).collect()
}

fn luma(color: RGBQUAD) -> u8 {
    let weighted =
        u32::from(color.rgbRed) * 299 + u32::from(color.rgbGreen) * 587 + u32::from(color.rgbBlue) * 114;
    ((weighted + 500) / 1000) as u8
}

fn widen(value: u16, bits: u32) -> u8 {
    let max = (1u16 << bits) - 1;
    (u32::from(value & max) * 255 / u32::from(max)) as u8
}

fn decode16(value: u16, rgb565: bool) -> RGBQUAD {
    let (green_bits, red_shift) = if rgb565 { (6, 11) } else { (5, 10) };
    RGBQUAD {
        rgbBlue: widen(value, 5),
        rgbGreen: widen(value >> 5, green_bits),
        rgbRed: widen(value >> red_shift, 5),
        rgbReserved: 0,
    }
}

fn encode16(color: RGBQUAD, rgb565: bool) -> u16 {
    let (red, green, blue) = (u16::from(color.rgbRed), u16::from(color.rgbGreen), u16::from(color.rgbBlue));
    if rgb565 {
        ((red >> 3) << 11) | ((green >> 2) << 5) | (blue >> 3)
    } else {
        ((red >> 3) << 10) | ((green >> 3) << 5) | (blue >> 3)
    }
}

fn type_bits(image_type: ImageType) -> u32 {
    match image_type {
        ImageType::Uint16 | ImageType::Int16 => 16,
        ImageType::Uint32 | ImageType::Int32 | ImageType::Float => 32,
        ImageType::Rgb16 => 48,
        ImageType::Double | ImageType::Rgba16 => 64,
        ImageType::Rgbf => 96,
        ImageType::Complex | ImageType::Rgbaf => 128,
        ImageType::Bitmap | ImageType::Unknown => 0,
    }
}

impl FakeBitmap {
    fn new(width: u32, height: u32, bpp: u32) -> Self {
        Self::typed(ImageType::Bitmap, width, height, bpp)
    }

    fn typed(image_type: ImageType, width: u32, height: u32, bpp: u32) -> Self {
        let palette = if image_type == ImageType::Bitmap && bpp <= 8 {
            grey_ramp(bpp)
        } else {
            Vec::new()
        };
        let pitch = (width as usize * bpp as usize).div_ceil(32) * 4;
        Self {
            width,
            height,
            bpp,
            image_type,
            rgb565: false,
            pixels: vec![0; pitch * height as usize],
            palette,
            dpm_x: DEFAULT_DOTS_PER_METER,
            dpm_y: DEFAULT_DOTS_PER_METER,
            background: None,
            transparent: false,
            transparency: Vec::new(),
            metadata: Vec::new(),
        }
    }

    /// Same size and resolution, different depth.
    fn sibling(&self, width: u32, height: u32, bpp: u32) -> Self {
        let mut target = Self::new(width, height, bpp);
        target.dpm_x = self.dpm_x;
        target.dpm_y = self.dpm_y;
        target.metadata = self.metadata.clone();
        if bpp == self.bpp {
            target.palette = self.palette.clone();
            target.rgb565 = self.rgb565;
        }
        target
    }

    fn pitch(&self) -> usize {
        (self.width as usize * self.bpp as usize).div_ceil(32) * 4
    }

    fn line(&self) -> usize {
        (self.width as usize * self.bpp as usize).div_ceil(8)
    }

    fn contains(&self, x: u32, y: u32) -> bool {
        x < self.width && y < self.height
    }

    /// Raw pixel value at scan line `y`.
    fn raw(&self, x: usize, y: usize) -> u32 {
        let row = &self.pixels[y * self.pitch()..];
        match self.bpp {
            1 => u32::from((row[x / 8] >> (7 - x % 8)) & 1),
            4 => u32::from(if x % 2 == 0 { row[x / 2] >> 4 } else { row[x / 2] & 0x0F }),
            8 => u32::from(row[x]),
            16 => u32::from(u16::from_le_bytes([row[2 * x], row[2 * x + 1]])),
            24 => u32::from_le_bytes([row[3 * x], row[3 * x + 1], row[3 * x + 2], 0]),
            32 => u32::from_le_bytes([row[4 * x], row[4 * x + 1], row[4 * x + 2], row[4 * x + 3]]),
            _ => 0,
        }
    }

    fn set_raw(&mut self, x: usize, y: usize, value: u32) {
        let pitch = self.pitch();
        let row = &mut self.pixels[y * pitch..];
        let bytes = value.to_le_bytes();
        match self.bpp {
            1 => {
                let mask = 0x80u8 >> (x % 8);
                if value & 1 == 1 {
                    row[x / 8] |= mask;
                } else {
                    row[x / 8] &= !mask;
                }
            }
            4 => {
                let nibble = (value & 0x0F) as u8;
                let byte = &mut row[x / 2];
                *byte = if x % 2 == 0 {
                    (*byte & 0x0F) | (nibble << 4)
                } else {
                    (*byte & 0xF0) | nibble
                };
            }
            8 => row[x] = bytes[0],
            16 => row[2 * x..2 * x + 2].copy_from_slice(&bytes[..2]),
            24 => row[3 * x..3 * x + 3].copy_from_slice(&bytes[..3]),
            32 => row[4 * x..4 * x + 4].copy_from_slice(&bytes),
            _ => {}
        }
    }

    fn color(&self, x: usize, y: usize) -> RGBQUAD {
        let value = self.raw(x, y);
        match self.bpp {
            1 | 4 | 8 => self.palette.get(value as usize).copied().unwrap_or_default(),
            16 => decode16(value as u16, self.rgb565),
            _ => {
                let [blue, green, red, alpha] = value.to_le_bytes();
                RGBQUAD {
                    rgbBlue: blue,
                    rgbGreen: green,
                    rgbRed: red,
                    rgbReserved: if self.bpp == 32 { alpha } else { 0 },
                }
            }
        }
    }

    fn set_color(&mut self, x: usize, y: usize, color: RGBQUAD) {
        let value = match self.bpp {
            16 => u32::from(encode16(color, self.rgb565)),
            _ => u32::from_le_bytes([color.rgbBlue, color.rgbGreen, color.rgbRed, color.rgbReserved]),
        };
        self.set_raw(x, y, value);
    }

    fn color_type(&self) -> ColorType {
        match self.bpp {
            1 | 4 | 8 => {
                let ramp = grey_ramp(self.bpp);
                let same = |a: &RGBQUAD, b: &RGBQUAD| {
                    a.rgbRed == b.rgbRed && a.rgbGreen == b.rgbGreen && a.rgbBlue == b.rgbBlue
                };
                if self.palette.iter().zip(&ramp).all(|(a, b)| same(a, b)) {
                    ColorType::MinIsBlack
                } else if self.palette.iter().zip(ramp.iter().rev()).all(|(a, b)| same(a, b)) {
                    ColorType::MinIsWhite
                } else {
                    ColorType::Palette
                }
            }
            32 => ColorType::RgbAlpha,
            _ => ColorType::Rgb,
        }
    }

    /// `n`-th double of the pixel at `(x, y)`, for `Double` and `Complex`.
    fn sample(&self, x: usize, y: usize, n: usize) -> f64 {
        let at = y * self.pitch() + x * (self.bpp / 8) as usize + n * 8;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.pixels[at..at + 8]);
        f64::from_le_bytes(bytes)
    }

    fn set_sample(&mut self, x: usize, y: usize, n: usize, value: f64) {
        let at = y * self.pitch() + x * (self.bpp / 8) as usize + n * 8;
        self.pixels[at..at + 8].copy_from_slice(&value.to_le_bytes());
    }

    fn pixels_xy(&self) -> impl Iterator<Item = (usize, usize)> + use<> {
        let (width, height) = (self.width as usize, self.height as usize);
        (0..height).flat_map(move |y| (0..width).map(move |x| (x, y)))
    }

    /// Apply `lut` to grey pixels or to the color bytes.
    fn apply_lut(&mut self, lut: &[u8; 256]) -> bool {
        let (pitch, line) = (self.pitch(), self.line());
        let stride = match self.bpp {
            8 | 24 => 1,
            32 => 4,
            _ => return false,
        };
        for row in self.pixels.chunks_exact_mut(pitch) {
            for (at, byte) in row[..line].iter_mut().enumerate() {
                if stride == 4 && at % 4 == 3 {
                    continue;
                }
                *byte = lut[usize::from(*byte)];
            }
        }
        true
    }
}

fn into_raw(bitmap: FakeBitmap) -> *mut FIBITMAP {
    LIVE.with(|live| live.set(live.get() + 1));
    Box::into_raw(Box::new(bitmap)).cast()
}

unsafe fn release(dib: *mut FIBITMAP) {
    LIVE.with(|live| live.set(live.get().saturating_sub(1)));
    drop(unsafe { Box::from_raw(dib.cast::<FakeBitmap>()) });
}

unsafe fn fake<'a>(dib: *mut FIBITMAP) -> &'a mut FakeBitmap {
    unsafe { &mut *dib.cast::<FakeBitmap>() }
}

fn emit(fif: FIF, message: &str) {
    emit_native_message(fif, message);
}

unsafe fn text(ptr: *const c_char) -> String {
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}

// =========================================================================
// File container
// =========================================================================

const SINGLE: &[u8] = b"FAKE";
const MULTI: &[u8] = b"FAKM";

fn le_u32(bytes: &[u8]) -> Option<u32> {
    Some(u32::from_le_bytes(bytes.try_into().ok()?))
}

fn encode(bitmap: &FakeBitmap, fif: FIF) -> Vec<u8> {
    let mut out = SINGLE.to_vec();
    out.extend(fif.to_le_bytes());
    let header = [
        bitmap.width,
        bitmap.height,
        bitmap.bpp,
        bitmap.image_type.code() as u32,
        bitmap.dpm_x,
        bitmap.dpm_y,
        bitmap.palette.len() as u32,
    ];
    for value in header {
        out.extend(value.to_le_bytes());
    }
    for entry in &bitmap.palette {
        out.extend([entry.rgbBlue, entry.rgbGreen, entry.rgbRed, entry.rgbReserved]);
    }
    out.extend((bitmap.pixels.len() as u32).to_le_bytes());
    out.extend(&bitmap.pixels);
    out
}

fn encode_pages(fif: FIF, pages: &[Vec<u8>]) -> Vec<u8> {
    let mut out = MULTI.to_vec();
    out.extend(fif.to_le_bytes());
    out.extend((pages.len() as u32).to_le_bytes());
    for page in pages {
        out.extend((page.len() as u32).to_le_bytes());
        out.extend(page);
    }
    out
}

type Reader<'r> = dyn FnMut(usize) -> Option<Vec<u8>> + 'r;

fn slice_reader(bytes: &[u8]) -> impl FnMut(usize) -> Option<Vec<u8>> + '_ {
    let mut position = 0;
    move |count| {
        let chunk = bytes.get(position..position + count)?.to_vec();
        position += count;
        Some(chunk)
    }
}

/// Decode one image, reading piecewise. Multi-page data yields its first page.
fn decode_image(read: &mut Reader<'_>) -> Option<(FIF, FakeBitmap)> {
    let magic = read(4)?;
    let fif = le_u32(&read(4)?)? as FIF;
    if magic == MULTI {
        let _pages = read(4)?;
        let _length = read(4)?;
        return decode_image(read).map(|(_, bitmap)| (fif, bitmap));
    }
    if magic != SINGLE {
        return None;
    }
    let header = read(28)?;
    let field = |index: usize| le_u32(&header[index * 4..index * 4 + 4]);
    let (width, height, bpp) = (field(0)?, field(1)?, field(2)?);
    let image_type = ImageType::from_code(field(3)? as c_int)?;
    let mut bitmap = FakeBitmap::typed(image_type, width, height, bpp);
    bitmap.dpm_x = field(4)?;
    bitmap.dpm_y = field(5)?;
    let palette = read(field(6)? as usize * 4)?;
    bitmap.palette = palette
        .chunks_exact(4)
        .map(|entry| RGBQUAD {
            rgbBlue: entry[0],
            rgbGreen: entry[1],
            rgbRed: entry[2],
            rgbReserved: entry[3],
        })
        .collect();
    let length = le_u32(&read(4)?)? as usize;
    bitmap.pixels = read(length)?;
    Some((fif, bitmap))
}

fn decode_pages(bytes: &[u8]) -> Option<(FIF, Vec<Vec<u8>>)> {
    let mut read = slice_reader(bytes);
    let magic = read(4)?;
    let fif = le_u32(&read(4)?)? as FIF;
    if magic == SINGLE {
        return Some((fif, vec![bytes.to_vec()]));
    }
    if magic != MULTI {
        return None;
    }
    let count = le_u32(&read(4)?)?;
    let mut pages = Vec::new();
    for _ in 0..count {
        let length = le_u32(&read(4)?)? as usize;
        pages.push(read(length)?);
    }
    Some((fif, pages))
}

fn signature(header: &[u8]) -> FIF {
    match header.get(..8) {
        Some(head) if &head[..4] == SINGLE || &head[..4] == MULTI => {
            le_u32(&head[4..8]).map_or(-1, |fif| fif as FIF)
        }
        _ => -1,
    }
}

fn io_read(io: &FreeImageIO, handle: fi_handle, count: usize) -> Option<Vec<u8>> {
    let mut buffer = vec![0u8; count];
    if count == 0 {
        return Some(buffer);
    }
    let read = io.read_proc?;
    let got = unsafe { read(buffer.as_mut_ptr().cast(), 1, count as c_uint, handle) };
    (got as usize == count).then_some(buffer)
}

// =========================================================================
// General
// =========================================================================

unsafe extern "system" fn initialise(_load_local_plugins_only: BOOL) {
    bump(|calls| calls.initialise += 1);
}

unsafe extern "system" fn deinitialise() {
    bump(|calls| calls.deinitialise += 1);
}

unsafe extern "system" fn get_version() -> *const c_char {
    c"3.18.0".as_ptr()
}

unsafe extern "system" fn get_copyright_message() -> *const c_char {
    c"in-memory FreeImage for tests".as_ptr()
}

unsafe extern "system" fn set_output_message(output: Option<OutputMessageFunction>) {
    OUTPUT.with(|slot| slot.set(output));
}

unsafe extern "system" fn is_little_endian() -> BOOL {
    BOOL::from(cfg!(target_endian = "little"))
}

// =========================================================================
// Bitmap management
// =========================================================================

unsafe extern "system" fn allocate(
    width: c_int,
    height: c_int,
    bpp: c_int,
    _red_mask: c_uint,
    _green_mask: c_uint,
    _blue_mask: c_uint,
) -> *mut FIBITMAP {
    match (u32::try_from(width), u32::try_from(height), u32::try_from(bpp)) {
        (Ok(w), Ok(h), Ok(b)) if w > 0 && h > 0 && matches!(b, 1 | 4 | 8 | 16 | 24 | 32) => {
            into_raw(FakeBitmap::new(w, h, b))
        }
        _ => ptr::null_mut(),
    }
}

unsafe extern "system" fn allocate_t(
    image_type: c_int,
    width: c_int,
    height: c_int,
    bpp: c_int,
    red_mask: c_uint,
    green_mask: c_uint,
    blue_mask: c_uint,
) -> *mut FIBITMAP {
    let (Some(image_type), Ok(w), Ok(h)) =
        (ImageType::from_code(image_type), u32::try_from(width), u32::try_from(height))
    else {
        return ptr::null_mut();
    };
    match image_type {
        ImageType::Bitmap => unsafe { allocate(width, height, bpp, red_mask, green_mask, blue_mask) },
        ImageType::Unknown => ptr::null_mut(),
        other if w > 0 && h > 0 => into_raw(FakeBitmap::typed(other, w, h, type_bits(other))),
        _ => ptr::null_mut(),
    }
}

unsafe extern "system" fn load(fif: FIF, filename: *const c_char, _flags: c_int) -> *mut FIBITMAP {
    let name = unsafe { text(filename) };
    let Ok(bytes) = fs::read(&name) else {
        emit(fif, &format!("cannot open {name}"));
        return ptr::null_mut();
    };
    match decode_image(&mut slice_reader(&bytes)) {
        Some((found, bitmap)) if found == fif => into_raw(bitmap),
        Some(_) => {
            emit(fif, &format!("{name} is not a {} file", ImageFormat::from_code(fif)));
            ptr::null_mut()
        }
        None => {
            emit(fif, &format!("{name}: unrecognised data"));
            ptr::null_mut()
        }
    }
}

unsafe extern "system" fn load_from_handle(
    fif: FIF,
    io: *mut FreeImageIO,
    handle: fi_handle,
    _flags: c_int,
) -> *mut FIBITMAP {
    let io = unsafe { &*io };
    let mut read = |count: usize| io_read(io, handle, count);
    match decode_image(&mut read) {
        Some((found, bitmap)) if found == fif => {
            // Plugins check where they stopped.
            if let Some(tell) = io.tell_proc {
                unsafe { tell(handle) };
            }
            into_raw(bitmap)
        }
        Some(_) => {
            emit(fif, "stream holds another format");
            ptr::null_mut()
        }
        None => {
            emit(fif, "unexpected end of stream");
            ptr::null_mut()
        }
    }
}

unsafe extern "system" fn save(fif: FIF, dib: *mut FIBITMAP, filename: *const c_char, _flags: c_int) -> BOOL {
    let name = unsafe { text(filename) };
    let bytes = encode(unsafe { fake(dib) }, fif);
    match fs::write(&name, bytes) {
        Ok(()) => TRUE,
        Err(err) => {
            emit(fif, &format!("cannot write {name}: {err}"));
            FALSE
        }
    }
}

unsafe extern "system" fn save_to_handle(
    fif: FIF,
    dib: *mut FIBITMAP,
    io: *mut FreeImageIO,
    handle: fi_handle,
    _flags: c_int,
) -> BOOL {
    let io = unsafe { &*io };
    let bytes = encode(unsafe { fake(dib) }, fif);
    let Some(write) = io.write_proc else {
        return FALSE;
    };
    let written = unsafe { write(bytes.as_ptr().cast_mut().cast(), 1, bytes.len() as c_uint, handle) };
    if written as usize == bytes.len() {
        TRUE
    } else {
        emit(fif, "short write");
        FALSE
    }
}

unsafe extern "system" fn clone_bitmap(dib: *mut FIBITMAP) -> *mut FIBITMAP {
    into_raw(unsafe { fake(dib) }.clone())
}

unsafe extern "system" fn unload(dib: *mut FIBITMAP) {
    bump(|calls| calls.unload += 1);
    if !dib.is_null() {
        unsafe { release(dib) };
    }
}

// =========================================================================
// Bitmap information
// =========================================================================

unsafe extern "system" fn get_image_type(dib: *mut FIBITMAP) -> c_int {
    unsafe { fake(dib) }.image_type.code()
}

unsafe extern "system" fn get_colors_used(dib: *mut FIBITMAP) -> c_uint {
    unsafe { fake(dib) }.palette.len() as c_uint
}

unsafe extern "system" fn get_bpp(dib: *mut FIBITMAP) -> c_uint {
    unsafe { fake(dib) }.bpp
}

unsafe extern "system" fn get_width(dib: *mut FIBITMAP) -> c_uint {
    unsafe { fake(dib) }.width
}

unsafe extern "system" fn get_height(dib: *mut FIBITMAP) -> c_uint {
    unsafe { fake(dib) }.height
}

unsafe extern "system" fn get_line(dib: *mut FIBITMAP) -> c_uint {
    unsafe { fake(dib) }.line() as c_uint
}

unsafe extern "system" fn get_pitch(dib: *mut FIBITMAP) -> c_uint {
    unsafe { fake(dib) }.pitch() as c_uint
}

unsafe extern "system" fn get_dib_size(dib: *mut FIBITMAP) -> c_uint {
    let bitmap = unsafe { fake(dib) };
    (40 + bitmap.palette.len() * 4 + bitmap.pixels.len()) as c_uint
}

unsafe extern "system" fn get_palette(dib: *mut FIBITMAP) -> *mut RGBQUAD {
    let bitmap = unsafe { fake(dib) };
    if bitmap.palette.is_empty() {
        ptr::null_mut()
    } else {
        bitmap.palette.as_mut_ptr()
    }
}

unsafe extern "system" fn get_dots_per_meter_x(dib: *mut FIBITMAP) -> c_uint {
    unsafe { fake(dib) }.dpm_x
}

unsafe extern "system" fn get_dots_per_meter_y(dib: *mut FIBITMAP) -> c_uint {
    unsafe { fake(dib) }.dpm_y
}

unsafe extern "system" fn set_dots_per_meter_x(dib: *mut FIBITMAP, res: c_uint) {
    unsafe { fake(dib) }.dpm_x = res;
}

unsafe extern "system" fn set_dots_per_meter_y(dib: *mut FIBITMAP, res: c_uint) {
    unsafe { fake(dib) }.dpm_y = res;
}

unsafe extern "system" fn get_color_type(dib: *mut FIBITMAP) -> c_int {
    unsafe { fake(dib) }.color_type().code()
}

unsafe extern "system" fn get_transparency_count(dib: *mut FIBITMAP) -> c_uint {
    unsafe { fake(dib) }.transparency.len() as c_uint
}

unsafe extern "system" fn is_transparent(dib: *mut FIBITMAP) -> BOOL {
    let bitmap = unsafe { fake(dib) };
    BOOL::from(bitmap.bpp == 32 || bitmap.transparent)
}

unsafe extern "system" fn get_transparency_table(dib: *mut FIBITMAP) -> *mut BYTE {
    let bitmap = unsafe { fake(dib) };
    if bitmap.transparency.is_empty() {
        ptr::null_mut()
    } else {
        bitmap.transparency.as_mut_ptr()
    }
}

unsafe extern "system" fn set_transparency_table(dib: *mut FIBITMAP, table: *mut BYTE, count: c_int) {
    let bitmap = unsafe { fake(dib) };
    let count = usize::try_from(count).unwrap_or(0).min(256);
    bitmap.transparency = if table.is_null() {
        Vec::new()
    } else {
        unsafe { std::slice::from_raw_parts(table, count) }.to_vec()
    };
    bitmap.transparent = !bitmap.transparency.is_empty();
}

unsafe extern "system" fn set_transparent(dib: *mut FIBITMAP, enabled: BOOL) {
    let bitmap = unsafe { fake(dib) };
    if matches!(bitmap.bpp, 8 | 32) {
        bitmap.transparent = enabled != FALSE;
    }
}

fn channel_mask(dib: *mut FIBITMAP, rgb555: u32, rgb565: u32, rgb888: u32) -> c_uint {
    let bitmap = unsafe { fake(dib) };
    match bitmap.bpp {
        16 if bitmap.rgb565 => rgb565,
        16 => rgb555,
        24 | 32 => rgb888,
        _ => 0,
    }
}

unsafe extern "system" fn get_red_mask(dib: *mut FIBITMAP) -> c_uint {
    channel_mask(dib, 0x7C00, 0xF800, 0x00FF_0000)
}

unsafe extern "system" fn get_green_mask(dib: *mut FIBITMAP) -> c_uint {
    channel_mask(dib, 0x03E0, 0x07E0, 0x0000_FF00)
}

unsafe extern "system" fn get_blue_mask(dib: *mut FIBITMAP) -> c_uint {
    channel_mask(dib, 0x001F, 0x001F, 0x0000_00FF)
}

unsafe extern "system" fn has_background_color(dib: *mut FIBITMAP) -> BOOL {
    BOOL::from(unsafe { fake(dib) }.background.is_some())
}

unsafe extern "system" fn get_background_color(dib: *mut FIBITMAP, color: *mut RGBQUAD) -> BOOL {
    match unsafe { fake(dib) }.background {
        Some(background) if !color.is_null() => {
            unsafe { *color = background };
            TRUE
        }
        _ => FALSE,
    }
}

unsafe extern "system" fn set_background_color(dib: *mut FIBITMAP, color: *mut RGBQUAD) -> BOOL {
    let bitmap = unsafe { fake(dib) };
    bitmap.background = if color.is_null() { None } else { Some(unsafe { *color }) };
    TRUE
}

// =========================================================================
// File type and plugins
// =========================================================================

struct Plugin {
    format: ImageFormat,
    name: &'static CStr,
    description: &'static CStr,
    extensions: &'static CStr,
    mime: &'static CStr,
    writes: bool,
    export: &'static [c_int],
}

const PLUGINS: &[Plugin] = &[
    Plugin {
        format: ImageFormat::BMP,
        name: c"BMP",
        description: c"Windows or OS/2 Bitmap",
        extensions: c"bmp",
        mime: c"image/bmp",
        writes: true,
        export: &[1, 4, 8, 16, 24, 32],
    },
    Plugin {
        format: ImageFormat::ICO,
        name: c"ICO",
        description: c"Windows Icon",
        extensions: c"ico",
        mime: c"image/vnd.microsoft.icon",
        writes: true,
        export: &[1, 4, 8, 24, 32],
    },
    Plugin {
        format: ImageFormat::JPEG,
        name: c"JPEG",
        description: c"JPEG - JFIF Compliant",
        extensions: c"jpg,jif,jpeg,jpe",
        mime: c"image/jpeg",
        writes: true,
        export: &[8, 24],
    },
    Plugin {
        format: ImageFormat::PBM,
        name: c"PBM",
        description: c"Portable Bitmap (ASCII)",
        extensions: c"pbm",
        mime: c"image/freeimage-pnm",
        writes: true,
        export: &[1],
    },
    Plugin {
        format: ImageFormat::PNG,
        name: c"PNG",
        description: c"Portable Network Graphics",
        extensions: c"png",
        mime: c"image/png",
        writes: true,
        export: &[1, 4, 8, 24, 32],
    },
    Plugin {
        format: ImageFormat::PPM,
        name: c"PPM",
        description: c"Portable Pixelmap (ASCII)",
        extensions: c"ppm,pnm",
        mime: c"image/freeimage-pnm",
        writes: true,
        export: &[24],
    },
    Plugin {
        format: ImageFormat::TIFF,
        name: c"TIFF",
        description: c"Tagged Image File Format",
        extensions: c"tif,tiff",
        mime: c"image/tiff",
        writes: true,
        export: &[1, 4, 8, 24, 32],
    },
    Plugin {
        format: ImageFormat::GIF,
        name: c"GIF",
        description: c"Graphics Interchange Format",
        extensions: c"gif",
        mime: c"image/gif",
        writes: true,
        export: &[8],
    },
    Plugin {
        format: ImageFormat::RAW,
        name: c"RAW",
        description: c"RAW camera image",
        extensions: c"3fr,arw,cr2,dng,nef",
        mime: c"image/x-dcraw",
        writes: false,
        export: &[],
    },
];

fn plugin(fif: FIF) -> Option<&'static Plugin> {
    PLUGINS.iter().find(|plugin| plugin.format.code() == fif)
}

fn plugin_text(fif: FIF, field: impl FnOnce(&Plugin) -> &'static CStr) -> *const c_char {
    plugin(fif).map_or(ptr::null(), |plugin| field(plugin).as_ptr())
}

unsafe extern "system" fn get_file_type(filename: *const c_char, _size: c_int) -> FIF {
    let name = unsafe { text(filename) };
    fs::read(name).map_or(-1, |bytes| signature(&bytes))
}

unsafe extern "system" fn get_file_type_from_handle(io: *mut FreeImageIO, handle: fi_handle, _size: c_int) -> FIF {
    let io = unsafe { &*io };
    let (Some(tell), Some(seek)) = (io.tell_proc, io.seek_proc) else {
        return -1;
    };
    let start = unsafe { tell(handle) };
    if start < 0 {
        return -1;
    }
    let header = io_read(io, handle, 8);
    unsafe { seek(handle, start, SEEK_SET) };
    header.map_or(-1, |header| signature(&header))
}

const BUILT_IN_FORMATS: FIF = 37;

unsafe extern "system" fn get_fif_count() -> c_int {
    BUILT_IN_FORMATS + LOCAL_PLUGINS.with(|local| local.borrow().len() as c_int)
}

unsafe extern "system" fn set_plugin_enabled(fif: FIF, enable: BOOL) -> c_int {
    if plugin(fif).is_none() {
        return -1;
    }
    DISABLED.with(|disabled| {
        let mut disabled = disabled.borrow_mut();
        let was_enabled = !disabled.contains(&fif);
        if enable == FALSE {
            disabled.insert(fif);
        } else {
            disabled.remove(&fif);
        }
        c_int::from(was_enabled)
    })
}

unsafe extern "system" fn is_plugin_enabled(fif: FIF) -> c_int {
    if plugin(fif).is_none() {
        return -1;
    }
    DISABLED.with(|disabled| c_int::from(!disabled.borrow().contains(&fif)))
}

unsafe extern "system" fn get_fif_from_format(format: *const c_char) -> FIF {
    let name = unsafe { text(format) };
    let local = LOCAL_PLUGINS.with(|local| {
        local
            .borrow()
            .iter()
            .position(|registered| registered.to_string_lossy().eq_ignore_ascii_case(&name))
    });
    if let Some(index) = local {
        return BUILT_IN_FORMATS + index as FIF;
    }
    PLUGINS
        .iter()
        .find(|plugin| plugin.name.to_string_lossy().eq_ignore_ascii_case(&name))
        .map_or(-1, |plugin| plugin.format.code())
}

unsafe extern "system" fn get_fif_from_mime(mime: *const c_char) -> FIF {
    let mime = unsafe { text(mime) };
    PLUGINS
        .iter()
        .find(|plugin| plugin.mime.to_string_lossy() == mime)
        .map_or(-1, |plugin| plugin.format.code())
}

unsafe extern "system" fn get_format_from_fif(fif: FIF) -> *const c_char {
    plugin_text(fif, |plugin| plugin.name)
}

unsafe extern "system" fn get_fif_extension_list(fif: FIF) -> *const c_char {
    plugin_text(fif, |plugin| plugin.extensions)
}

unsafe extern "system" fn get_fif_description(fif: FIF) -> *const c_char {
    plugin_text(fif, |plugin| plugin.description)
}

unsafe extern "system" fn get_fif_mime_type(fif: FIF) -> *const c_char {
    plugin_text(fif, |plugin| plugin.mime)
}

unsafe extern "system" fn get_fif_from_filename(filename: *const c_char) -> FIF {
    let name = unsafe { text(filename) };
    let Some(extension) = Path::new(&name).extension().and_then(|ext| ext.to_str()) else {
        return -1;
    };
    let extension = extension.to_ascii_lowercase();
    PLUGINS
        .iter()
        .find(|plugin| plugin.extensions.to_string_lossy().split(',').any(|ext| ext == extension))
        .map_or(-1, |plugin| plugin.format.code())
}

unsafe extern "system" fn fif_supports_reading(fif: FIF) -> BOOL {
    BOOL::from(plugin(fif).is_some())
}

unsafe extern "system" fn fif_supports_writing(fif: FIF) -> BOOL {
    BOOL::from(plugin(fif).is_some_and(|plugin| plugin.writes))
}

unsafe extern "system" fn fif_supports_export_bpp(fif: FIF, bpp: c_int) -> BOOL {
    BOOL::from(plugin(fif).is_some_and(|plugin| plugin.export.contains(&bpp)))
}

unsafe extern "system" fn fif_supports_export_type(fif: FIF, image_type: c_int) -> BOOL {
    let Some(plugin) = plugin(fif).filter(|plugin| plugin.writes) else {
        return FALSE;
    };
    let supported = match ImageType::from_code(image_type) {
        Some(ImageType::Bitmap) => true,
        Some(ImageType::Uint16 | ImageType::Rgb16 | ImageType::Rgba16) => {
            matches!(plugin.format, ImageFormat::PNG | ImageFormat::TIFF)
        }
        Some(ImageType::Float | ImageType::Double | ImageType::Complex | ImageType::Rgbf) => {
            plugin.format == ImageFormat::TIFF
        }
        _ => false,
    };
    BOOL::from(supported)
}

unsafe extern "system" fn fif_supports_icc_profiles(fif: FIF) -> BOOL {
    BOOL::from(matches!(
        ImageFormat::from_code(fif),
        ImageFormat::JPEG | ImageFormat::PNG | ImageFormat::TIFF
    ))
}

unsafe extern "system" fn get_fif_regexpr(fif: FIF) -> *const c_char {
    match ImageFormat::from_code(fif) {
        ImageFormat::PNG => c"^.PNG\r".as_ptr(),
        ImageFormat::BMP => c"^BM".as_ptr(),
        _ => ptr::null(),
    }
}

unsafe extern "system" fn register_local_plugin(
    proc_address: FI_InitProc,
    format: *const c_char,
    _description: *const c_char,
    _extension: *const c_char,
    _regexpr: *const c_char,
) -> FIF {
    let id = unsafe { get_fif_count() };
    let mut table = PluginTable::default();
    unsafe { proc_address(&mut table, id) };
    let name = if !format.is_null() {
        unsafe { CStr::from_ptr(format) }.to_owned()
    } else if let Some(format_proc) = table.format_proc {
        let name = unsafe { format_proc() };
        if name.is_null() {
            return -1;
        }
        unsafe { CStr::from_ptr(name) }.to_owned()
    } else {
        return -1;
    };
    LOCAL_PLUGINS.with(|local| local.borrow_mut().push(name));
    id
}

unsafe extern "system" fn register_external_plugin(
    path: *const c_char,
    _format: *const c_char,
    _description: *const c_char,
    _extension: *const c_char,
    _regexpr: *const c_char,
) -> FIF {
    let path = unsafe { text(path) };
    emit(-1, &format!("no plugin entry point in {path}"));
    -1
}

// =========================================================================
// Multi-page
// =========================================================================

struct FakeMulti {
    path: String,
    fif: FIF,
    pages: Vec<Vec<u8>>,
    read_only: bool,
    locked: Vec<(usize, *mut FIBITMAP)>,
    changed: bool,
}

impl FakeMulti {
    /// The library drops page-list edits silently in these cases.
    fn frozen(&self) -> bool {
        self.read_only || !self.locked.is_empty()
    }
}

unsafe fn multi<'a>(raw: *mut FIMULTIBITMAP) -> &'a mut FakeMulti {
    unsafe { &mut *raw.cast::<FakeMulti>() }
}

unsafe extern "system" fn open_multi_bitmap(
    fif: FIF,
    filename: *const c_char,
    create_new: BOOL,
    read_only: BOOL,
    _keep_cache_in_memory: BOOL,
    _flags: c_int,
) -> *mut FIMULTIBITMAP {
    let path = unsafe { text(filename) };
    if !ImageFormat::from_code(fif).is_multipage() {
        emit(fif, "format has no multi-page support");
        return ptr::null_mut();
    }
    let pages = if create_new != FALSE {
        Vec::new()
    } else {
        let Ok(bytes) = fs::read(&path) else {
            emit(fif, &format!("cannot open {path}"));
            return ptr::null_mut();
        };
        match decode_pages(&bytes) {
            Some((found, pages)) if found == fif => pages,
            _ => {
                emit(fif, &format!("{path} is not a {} file", ImageFormat::from_code(fif)));
                return ptr::null_mut();
            }
        }
    };
    let container = FakeMulti {
        path,
        fif,
        pages,
        read_only: read_only != FALSE,
        locked: Vec::new(),
        changed: create_new != FALSE,
    };
    Box::into_raw(Box::new(container)).cast()
}

unsafe extern "system" fn close_multi_bitmap(bitmap: *mut FIMULTIBITMAP, _flags: c_int) -> BOOL {
    bump(|calls| calls.close_multi += 1);
    let container = unsafe { Box::from_raw(bitmap.cast::<FakeMulti>()) };
    for &(_, page) in &container.locked {
        unsafe { release(page) };
    }
    if container.changed && !container.read_only {
        if let Err(err) = fs::write(&container.path, encode_pages(container.fif, &container.pages)) {
            emit(container.fif, &format!("cannot write {}: {err}", container.path));
            return FALSE;
        }
    }
    TRUE
}

unsafe extern "system" fn get_page_count(bitmap: *mut FIMULTIBITMAP) -> c_int {
    unsafe { multi(bitmap) }.pages.len() as c_int
}

unsafe extern "system" fn append_page(bitmap: *mut FIMULTIBITMAP, data: *mut FIBITMAP) {
    let container = unsafe { multi(bitmap) };
    if container.frozen() {
        return;
    }
    container.pages.push(encode(unsafe { fake(data) }, container.fif));
    container.changed = true;
}

unsafe extern "system" fn insert_page(bitmap: *mut FIMULTIBITMAP, page: c_int, data: *mut FIBITMAP) {
    let container = unsafe { multi(bitmap) };
    match usize::try_from(page) {
        Ok(index) if !container.frozen() && index <= container.pages.len() => {
            container.pages.insert(index, encode(unsafe { fake(data) }, container.fif));
            container.changed = true;
        }
        _ => {}
    }
}

unsafe extern "system" fn delete_page(bitmap: *mut FIMULTIBITMAP, page: c_int) {
    let container = unsafe { multi(bitmap) };
    match usize::try_from(page) {
        Ok(index) if !container.frozen() && index < container.pages.len() => {
            container.pages.remove(index);
            container.changed = true;
        }
        _ => {}
    }
}

unsafe extern "system" fn lock_page(bitmap: *mut FIMULTIBITMAP, page: c_int) -> *mut FIBITMAP {
    let container = unsafe { multi(bitmap) };
    let Ok(index) = usize::try_from(page) else {
        return ptr::null_mut();
    };
    if container.locked.iter().any(|&(locked, _)| locked == index) {
        return ptr::null_mut();
    }
    let Some((_, bitmap)) = container.pages.get(index).and_then(|bytes| decode_image(&mut slice_reader(bytes)))
    else {
        return ptr::null_mut();
    };
    let raw = into_raw(bitmap);
    container.locked.push((index, raw));
    bump(|calls| calls.lock += 1);
    raw
}

unsafe extern "system" fn unlock_page(bitmap: *mut FIMULTIBITMAP, data: *mut FIBITMAP, changed: BOOL) {
    let container = unsafe { multi(bitmap) };
    let Some(position) = container.locked.iter().position(|&(_, raw)| raw == data) else {
        return;
    };
    let (index, raw) = container.locked.remove(position);
    if changed != FALSE {
        if !container.read_only {
            container.pages[index] = encode(unsafe { fake(raw) }, container.fif);
            container.changed = true;
        }
        bump(|calls| calls.unlock_changed += 1);
    }
    bump(|calls| calls.unlock += 1);
    unsafe { release(raw) };
}

unsafe extern "system" fn move_page(bitmap: *mut FIMULTIBITMAP, target: c_int, source: c_int) -> BOOL {
    let container = unsafe { multi(bitmap) };
    let count = container.pages.len();
    match (usize::try_from(target), usize::try_from(source)) {
        (Ok(target), Ok(source)) if !container.frozen() && target < count && source < count => {
            let page = container.pages.remove(source);
            container.pages.insert(target, page);
            container.changed = true;
            TRUE
        }
        _ => FALSE,
    }
}

unsafe extern "system" fn get_locked_page_numbers(
    bitmap: *mut FIMULTIBITMAP,
    pages: *mut c_int,
    count: *mut c_int,
) -> BOOL {
    if count.is_null() {
        return FALSE;
    }
    let container = unsafe { multi(bitmap) };
    let mut locked: Vec<c_int> = container.locked.iter().map(|&(page, _)| page as c_int).collect();
    locked.sort_unstable();
    if pages.is_null() {
        unsafe { *count = locked.len() as c_int };
        return TRUE;
    }
    let room = usize::try_from(unsafe { *count }).unwrap_or(0).min(locked.len());
    unsafe {
        ptr::copy_nonoverlapping(locked.as_ptr(), pages, room);
        *count = room as c_int;
    }
    TRUE
}

// =========================================================================
// Pixel access
// =========================================================================

unsafe extern "system" fn get_bits(dib: *mut FIBITMAP) -> *mut BYTE {
    unsafe { fake(dib) }.pixels.as_mut_ptr()
}

unsafe extern "system" fn get_scan_line(dib: *mut FIBITMAP, scanline: c_int) -> *mut BYTE {
    let bitmap = unsafe { fake(dib) };
    match u32::try_from(scanline) {
        Ok(line) if line < bitmap.height => {
            let offset = line as usize * bitmap.pitch();
            unsafe { bitmap.pixels.as_mut_ptr().add(offset) }
        }
        _ => ptr::null_mut(),
    }
}

unsafe extern "system" fn get_pixel_index(dib: *mut FIBITMAP, x: c_uint, y: c_uint, value: *mut BYTE) -> BOOL {
    let bitmap = unsafe { fake(dib) };
    if bitmap.bpp > 8 || !bitmap.contains(x, y) {
        return FALSE;
    }
    unsafe { *value = bitmap.raw(x as usize, y as usize) as u8 };
    TRUE
}

unsafe extern "system" fn set_pixel_index(dib: *mut FIBITMAP, x: c_uint, y: c_uint, value: *mut BYTE) -> BOOL {
    let bitmap = unsafe { fake(dib) };
    if bitmap.bpp > 8 || !bitmap.contains(x, y) {
        return FALSE;
    }
    bitmap.set_raw(x as usize, y as usize, u32::from(unsafe { *value }));
    TRUE
}

unsafe extern "system" fn get_pixel_color(dib: *mut FIBITMAP, x: c_uint, y: c_uint, value: *mut RGBQUAD) -> BOOL {
    let bitmap = unsafe { fake(dib) };
    if bitmap.bpp < 16 || !bitmap.contains(x, y) {
        return FALSE;
    }
    unsafe { *value = bitmap.color(x as usize, y as usize) };
    TRUE
}

unsafe extern "system" fn set_pixel_color(dib: *mut FIBITMAP, x: c_uint, y: c_uint, value: *mut RGBQUAD) -> BOOL {
    let bitmap = unsafe { fake(dib) };
    if bitmap.bpp < 16 || !bitmap.contains(x, y) {
        return FALSE;
    }
    bitmap.set_color(x as usize, y as usize, unsafe { *value });
    TRUE
}

// =========================================================================
// Conversion
// =========================================================================

/// Grey levels for palette targets, cut at `threshold` for 1 bit.
fn converted(source: &FakeBitmap, bpp: u32, rgb565: bool, threshold: u8) -> FakeBitmap {
    if source.bpp == bpp && bpp <= 8 {
        return source.clone();
    }
    let mut target = source.sibling(source.width, source.height, bpp);
    target.rgb565 = rgb565;
    for (x, y) in source.pixels_xy() {
        let mut color = source.color(x, y);
        match bpp {
            1 => target.set_raw(x, y, u32::from(luma(color) >= threshold)),
            4 => target.set_raw(x, y, u32::from(luma(color) >> 4)),
            8 => target.set_raw(x, y, u32::from(luma(color))),
            _ => {
                if bpp == 32 && source.bpp != 32 {
                    color.rgbReserved = 255;
                }
                target.set_color(x, y, color);
            }
        }
    }
    target
}

unsafe fn convert(dib: *mut FIBITMAP, bpp: u32, rgb565: bool, threshold: u8) -> *mut FIBITMAP {
    into_raw(converted(unsafe { fake(dib) }, bpp, rgb565, threshold))
}

unsafe extern "system" fn convert_to_4bits(dib: *mut FIBITMAP) -> *mut FIBITMAP {
    unsafe { convert(dib, 4, false, 128) }
}

unsafe extern "system" fn convert_to_8bits(dib: *mut FIBITMAP) -> *mut FIBITMAP {
    unsafe { convert(dib, 8, false, 128) }
}

unsafe extern "system" fn convert_to_greyscale(dib: *mut FIBITMAP) -> *mut FIBITMAP {
    unsafe { convert(dib, 8, false, 128) }
}

unsafe extern "system" fn convert_to_16bits_555(dib: *mut FIBITMAP) -> *mut FIBITMAP {
    unsafe { convert(dib, 16, false, 128) }
}

unsafe extern "system" fn convert_to_16bits_565(dib: *mut FIBITMAP) -> *mut FIBITMAP {
    unsafe { convert(dib, 16, true, 128) }
}

unsafe extern "system" fn convert_to_24bits(dib: *mut FIBITMAP) -> *mut FIBITMAP {
    unsafe { convert(dib, 24, false, 128) }
}

unsafe extern "system" fn convert_to_32bits(dib: *mut FIBITMAP) -> *mut FIBITMAP {
    unsafe { convert(dib, 32, false, 128) }
}

unsafe extern "system" fn color_quantize(dib: *mut FIBITMAP, _quantize: c_int) -> *mut FIBITMAP {
    if unsafe { fake(dib) }.bpp != 24 {
        emit(-1, "quantization needs a 24-bit image");
        return ptr::null_mut();
    }
    unsafe { convert(dib, 8, false, 128) }
}

unsafe extern "system" fn color_quantize_ex(
    dib: *mut FIBITMAP,
    _quantize: c_int,
    palette_size: c_int,
    reserve_size: c_int,
    reserve_palette: *mut RGBQUAD,
) -> *mut FIBITMAP {
    let source = unsafe { fake(dib) };
    let (Ok(colors), Ok(reserved)) = (usize::try_from(palette_size), usize::try_from(reserve_size)) else {
        return ptr::null_mut();
    };
    if source.bpp != 24 || !(2..=256).contains(&colors) || reserved > colors {
        return ptr::null_mut();
    }
    let mut target = converted(source, 8, false, 128);
    target.palette.truncate(colors);
    if reserved > 0 && !reserve_palette.is_null() {
        let reserve = unsafe { std::slice::from_raw_parts(reserve_palette, reserved) };
        target.palette[..reserved].copy_from_slice(reserve);
    }
    for (x, y) in target.pixels_xy() {
        let index = target.raw(x, y).min(colors as u32 - 1);
        target.set_raw(x, y, index);
    }
    into_raw(target)
}

unsafe extern "system" fn threshold(dib: *mut FIBITMAP, t: BYTE) -> *mut FIBITMAP {
    unsafe { convert(dib, 1, false, t) }
}

unsafe extern "system" fn dither(dib: *mut FIBITMAP, _algorithm: c_int) -> *mut FIBITMAP {
    unsafe { convert(dib, 1, false, 128) }
}

unsafe extern "system" fn convert_to_raw_bits(
    bits: *mut BYTE,
    dib: *mut FIBITMAP,
    pitch: c_int,
    _bpp: c_uint,
    _red_mask: c_uint,
    _green_mask: c_uint,
    _blue_mask: c_uint,
    topdown: BOOL,
) {
    let bitmap = unsafe { fake(dib) };
    let Ok(pitch) = usize::try_from(pitch) else {
        return;
    };
    let source_pitch = bitmap.pitch();
    let length = source_pitch.min(pitch);
    let height = bitmap.height as usize;
    for row in 0..height {
        let from = if topdown != FALSE { height - 1 - row } else { row };
        let source = &bitmap.pixels[from * source_pitch..from * source_pitch + length];
        unsafe { ptr::copy_nonoverlapping(source.as_ptr(), bits.add(row * pitch), length) };
    }
}

unsafe extern "system" fn convert_from_raw_bits(
    bits: *mut BYTE,
    width: c_int,
    height: c_int,
    pitch: c_int,
    bpp: c_uint,
    red_mask: c_uint,
    _green_mask: c_uint,
    _blue_mask: c_uint,
    topdown: BOOL,
) -> *mut FIBITMAP {
    let raw = unsafe { allocate(width, height, bpp as c_int, red_mask, 0, 0) };
    let Ok(pitch) = usize::try_from(pitch) else {
        return raw;
    };
    if raw.is_null() {
        return raw;
    }
    let bitmap = unsafe { fake(raw) };
    bitmap.rgb565 = bpp == 16 && red_mask == 0xF800;
    let target_pitch = bitmap.pitch();
    let length = target_pitch.min(pitch);
    let rows = bitmap.height as usize;
    for row in 0..rows {
        let to = if topdown != FALSE { rows - 1 - row } else { row };
        let source = unsafe { std::slice::from_raw_parts(bits.add(row * pitch), length) };
        bitmap.pixels[to * target_pitch..to * target_pitch + length].copy_from_slice(source);
    }
    raw
}

unsafe extern "system" fn convert_to_rgbf(dib: *mut FIBITMAP) -> *mut FIBITMAP {
    let source = unsafe { fake(dib) };
    if source.image_type != ImageType::Bitmap || !matches!(source.bpp, 24 | 32) {
        emit(-1, "RGBF conversion needs a 24 or 32-bit image");
        return ptr::null_mut();
    }
    let mut target = FakeBitmap::typed(ImageType::Rgbf, source.width, source.height, 96);
    let pitch = target.pitch();
    for (x, y) in source.pixels_xy() {
        let color = source.color(x, y);
        let at = y * pitch + x * 12;
        for (n, level) in [color.rgbRed, color.rgbGreen, color.rgbBlue].into_iter().enumerate() {
            let value = f32::from(level) / 255.0;
            target.pixels[at + 4 * n..at + 4 * n + 4].copy_from_slice(&value.to_le_bytes());
        }
    }
    into_raw(target)
}

fn standard(source: &FakeBitmap) -> FakeBitmap {
    if source.image_type == ImageType::Bitmap {
        return source.clone();
    }
    let mut target = source.sibling(source.width, source.height, 8);
    let bytes = (source.bpp / 8) as usize;
    let pitch = source.pitch();
    for (x, y) in source.pixels_xy() {
        let value = match source.image_type {
            ImageType::Uint16 => source.pixels[y * pitch + x * bytes + 1],
            _ => 0,
        };
        target.set_raw(x, y, u32::from(value));
    }
    target
}

unsafe extern "system" fn convert_to_standard_type(src: *mut FIBITMAP, _scale_linear: BOOL) -> *mut FIBITMAP {
    into_raw(standard(unsafe { fake(src) }))
}

unsafe extern "system" fn convert_to_type(src: *mut FIBITMAP, dst_type: c_int, _scale_linear: BOOL) -> *mut FIBITMAP {
    let source = unsafe { fake(src) };
    match ImageType::from_code(dst_type) {
        Some(ImageType::Bitmap) => into_raw(standard(source)),
        Some(same) if same == source.image_type => into_raw(source.clone()),
        Some(ImageType::Double) if source.bpp == 8 => {
            let mut target = FakeBitmap::typed(ImageType::Double, source.width, source.height, 64);
            for (x, y) in source.pixels_xy() {
                target.set_sample(x, y, 0, f64::from(luma(source.color(x, y))));
            }
            into_raw(target)
        }
        Some(ImageType::Uint16) if source.bpp == 8 => {
            let mut target = FakeBitmap::typed(ImageType::Uint16, source.width, source.height, 16);
            let pitch = target.pitch();
            for (x, y) in source.pixels_xy() {
                let wide = u16::from(luma(source.color(x, y))) * 257;
                target.pixels[y * pitch + 2 * x..y * pitch + 2 * x + 2].copy_from_slice(&wide.to_le_bytes());
            }
            into_raw(target)
        }
        _ => {
            emit(-1, "conversion not supported");
            ptr::null_mut()
        }
    }
}

// =========================================================================
// Copy / paste, resampling, rotation
// =========================================================================

unsafe extern "system" fn copy(dib: *mut FIBITMAP, left: c_int, top: c_int, right: c_int, bottom: c_int) -> *mut FIBITMAP {
    let source = unsafe { fake(dib) };
    let bounds = [left, top, right, bottom].map(|value| u32::try_from(value).ok());
    let [Some(left), Some(top), Some(right), Some(bottom)] = bounds else {
        return ptr::null_mut();
    };
    if left >= right || top >= bottom || right > source.width || bottom > source.height {
        return ptr::null_mut();
    }
    let (width, height) = (right - left, bottom - top);
    let mut target = source.sibling(width, height, source.bpp);
    for row in 0..height as usize {
        // Rectangle rows count from the top.
        let from = (source.height - 1 - top) as usize - row;
        let to = height as usize - 1 - row;
        for column in 0..width as usize {
            target.set_raw(column, to, source.raw(left as usize + column, from));
        }
    }
    into_raw(target)
}

fn blend(over: u32, under: u32, alpha: u32, bytes: u32) -> u32 {
    (0..bytes).fold(0, |blended, byte| {
        let shift = byte * 8;
        let (o, u) = ((over >> shift) & 0xFF, (under >> shift) & 0xFF);
        blended | (((o * alpha + u * (255 - alpha)) / 255) << shift)
    })
}

unsafe extern "system" fn paste(dst: *mut FIBITMAP, src: *mut FIBITMAP, left: c_int, top: c_int, alpha: c_int) -> BOOL {
    let source = unsafe { fake(src) }.clone();
    let target = unsafe { fake(dst) };
    let (Ok(left), Ok(top), Ok(alpha)) = (u32::try_from(left), u32::try_from(top), u32::try_from(alpha)) else {
        return FALSE;
    };
    if source.bpp != target.bpp || left + source.width > target.width || top + source.height > target.height {
        return FALSE;
    }
    let blends = alpha <= 255 && matches!(target.bpp, 8 | 24 | 32);
    for row in 0..source.height as usize {
        let from = source.height as usize - 1 - row;
        let to = (target.height - 1 - top) as usize - row;
        for column in 0..source.width as usize {
            let x = left as usize + column;
            let over = source.raw(column, from);
            let value = if blends {
                blend(over, target.raw(x, to), alpha, target.bpp / 8)
            } else {
                over
            };
            target.set_raw(x, to, value);
        }
    }
    TRUE
}

fn resampled(source: &FakeBitmap, width: u32, height: u32) -> FakeBitmap {
    let mut target = source.sibling(width, height, source.bpp);
    for (x, y) in target.pixels_xy() {
        let sx = x * source.width as usize / width as usize;
        let sy = y * source.height as usize / height as usize;
        target.set_raw(x, y, source.raw(sx, sy));
    }
    target
}

unsafe extern "system" fn rescale(dib: *mut FIBITMAP, dst_width: c_int, dst_height: c_int, _filter: c_int) -> *mut FIBITMAP {
    match (u32::try_from(dst_width), u32::try_from(dst_height)) {
        (Ok(width), Ok(height)) if width > 0 && height > 0 => into_raw(resampled(unsafe { fake(dib) }, width, height)),
        _ => ptr::null_mut(),
    }
}

unsafe extern "system" fn make_thumbnail(dib: *mut FIBITMAP, max_pixel_size: c_int, _convert: BOOL) -> *mut FIBITMAP {
    let source = unsafe { fake(dib) };
    let Ok(max) = u32::try_from(max_pixel_size) else {
        return ptr::null_mut();
    };
    if max == 0 {
        return ptr::null_mut();
    }
    if source.width <= max && source.height <= max {
        return into_raw(source.clone());
    }
    let (width, height) = if source.width >= source.height {
        (max, (source.height * max / source.width).max(1))
    } else {
        ((source.width * max / source.height).max(1), max)
    };
    into_raw(resampled(source, width, height))
}

/// Like the library, 1-bit results come back with a min-is-black palette.
fn rotation_target(source: &FakeBitmap, width: u32, height: u32) -> FakeBitmap {
    let mut target = source.sibling(width, height, source.bpp);
    if source.bpp == 1 {
        target.palette = grey_ramp(1);
    }
    target
}

unsafe extern "system" fn rotate_classic(dib: *mut FIBITMAP, angle: f64) -> *mut FIBITMAP {
    let source = unsafe { fake(dib) };
    let (w, h) = (source.width as usize, source.height as usize);
    let turn = angle.rem_euclid(360.0);
    let quarter = |degrees: f64| (turn - degrees).abs() < 1e-9;
    let exact = if quarter(0.0) {
        Some((w, h, 0))
    } else if quarter(90.0) {
        Some((h, w, 1))
    } else if quarter(180.0) {
        Some((w, h, 2))
    } else if quarter(270.0) {
        Some((h, w, 3))
    } else {
        None
    };
    if let Some((width, height, turns)) = exact {
        let mut target = rotation_target(source, width as u32, height as u32);
        for (x, y) in source.pixels_xy() {
            let (tx, ty) = match turns {
                1 => (h - 1 - y, x),
                2 => (w - 1 - x, h - 1 - y),
                3 => (y, w - 1 - x),
                _ => (x, y),
            };
            target.set_raw(tx, ty, source.raw(x, y));
        }
        return into_raw(target);
    }

    let (sin, cos) = angle.to_radians().sin_cos();
    let width = (w as f64 * cos.abs() + h as f64 * sin.abs()).round().max(1.0) as u32;
    let height = (w as f64 * sin.abs() + h as f64 * cos.abs()).round().max(1.0) as u32;
    let mut target = rotation_target(source, width, height);
    let (cx, cy) = (w as f64 / 2.0, h as f64 / 2.0);
    let (tcx, tcy) = (f64::from(width) / 2.0, f64::from(height) / 2.0);
    for (x, y) in target.pixels_xy() {
        let (dx, dy) = (x as f64 + 0.5 - tcx, y as f64 + 0.5 - tcy);
        let sx = (cos * dx + sin * dy + cx).floor();
        let sy = (-sin * dx + cos * dy + cy).floor();
        if sx >= 0.0 && sy >= 0.0 && (sx as usize) < w && (sy as usize) < h {
            target.set_raw(x, y, source.raw(sx as usize, sy as usize));
        }
    }
    into_raw(target)
}

unsafe extern "system" fn rotate_ex(
    dib: *mut FIBITMAP,
    angle: f64,
    x_shift: f64,
    y_shift: f64,
    x_origin: f64,
    y_origin: f64,
    _use_mask: BOOL,
) -> *mut FIBITMAP {
    let source = unsafe { fake(dib) };
    let (w, h) = (source.width as usize, source.height as usize);
    let mut target = source.sibling(source.width, source.height, source.bpp);
    let (sin, cos) = angle.to_radians().sin_cos();
    for (x, y) in target.pixels_xy() {
        let (dx, dy) = (x as f64 - x_shift - x_origin, y as f64 - y_shift - y_origin);
        let sx = (cos * dx + sin * dy + x_origin).round();
        let sy = (-sin * dx + cos * dy + y_origin).round();
        if sx >= 0.0 && sy >= 0.0 && (sx as usize) < w && (sy as usize) < h {
            target.set_raw(x, y, source.raw(sx as usize, sy as usize));
        }
    }
    into_raw(target)
}

unsafe extern "system" fn flip_horizontal(dib: *mut FIBITMAP) -> BOOL {
    let bitmap = unsafe { fake(dib) };
    let width = bitmap.width as usize;
    for y in 0..bitmap.height as usize {
        let row: Vec<u32> = (0..width).map(|x| bitmap.raw(x, y)).collect();
        for (x, value) in row.into_iter().rev().enumerate() {
            bitmap.set_raw(x, y, value);
        }
    }
    TRUE
}

unsafe extern "system" fn flip_vertical(dib: *mut FIBITMAP) -> BOOL {
    let bitmap = unsafe { fake(dib) };
    let pitch = bitmap.pitch();
    let rows: Vec<Vec<u8>> = bitmap.pixels.chunks_exact(pitch).rev().map(<[u8]>::to_vec).collect();
    bitmap.pixels = rows.concat();
    TRUE
}

// =========================================================================
// Color manipulation
// =========================================================================

fn lut(map: impl Fn(f64) -> f64) -> [u8; 256] {
    std::array::from_fn(|level| map(level as f64).round().clamp(0.0, 255.0) as u8)
}

unsafe extern "system" fn adjust_brightness(dib: *mut FIBITMAP, percentage: f64) -> BOOL {
    let table = lut(|level| level * (100.0 + percentage) / 100.0);
    BOOL::from(unsafe { fake(dib) }.apply_lut(&table))
}

unsafe extern "system" fn adjust_contrast(dib: *mut FIBITMAP, percentage: f64) -> BOOL {
    let table = lut(|level| (level - 128.0) * (100.0 + percentage) / 100.0 + 128.0);
    BOOL::from(unsafe { fake(dib) }.apply_lut(&table))
}

unsafe extern "system" fn adjust_gamma(dib: *mut FIBITMAP, gamma: f64) -> BOOL {
    if gamma <= 0.0 {
        return FALSE;
    }
    let table = lut(|level| 255.0 * (level / 255.0).powf(1.0 / gamma));
    BOOL::from(unsafe { fake(dib) }.apply_lut(&table))
}

unsafe extern "system" fn adjust_curve(dib: *mut FIBITMAP, lut: *mut BYTE, channel: c_int) -> BOOL {
    let bitmap = unsafe { fake(dib) };
    if lut.is_null() {
        return FALSE;
    }
    let table = unsafe { *lut.cast::<[u8; 256]>() };
    if bitmap.bpp == 8 || ColorChannel::from_code(channel) == Some(ColorChannel::Rgb) {
        return BOOL::from(bitmap.apply_lut(&table));
    }
    let Some(byte) = channel_byte(bitmap.bpp, channel) else {
        return FALSE;
    };
    let shift = byte * 8;
    for (x, y) in bitmap.pixels_xy() {
        let value = bitmap.raw(x, y);
        let level = table[((value >> shift) & 0xFF) as usize];
        bitmap.set_raw(x, y, (value & !(0xFF << shift)) | (u32::from(level) << shift));
    }
    TRUE
}

unsafe extern "system" fn invert(dib: *mut FIBITMAP) -> BOOL {
    let bitmap = unsafe { fake(dib) };
    let (pitch, line, bpp) = (bitmap.pitch(), bitmap.line(), bitmap.bpp);
    if !matches!(bpp, 1 | 4 | 8 | 16 | 24 | 32) {
        return FALSE;
    }
    for row in bitmap.pixels.chunks_exact_mut(pitch) {
        for (at, byte) in row[..line].iter_mut().enumerate() {
            if bpp == 32 && at % 4 == 3 {
                continue;
            }
            *byte = !*byte;
        }
    }
    TRUE
}

unsafe extern "system" fn get_histogram(dib: *mut FIBITMAP, histo: *mut DWORD, channel: c_int) -> BOOL {
    let bitmap = unsafe { fake(dib) };
    if histo.is_null() {
        return FALSE;
    }
    let channel = ColorChannel::from_code(channel);
    let mut bins = [0u32; 256];
    for (x, y) in bitmap.pixels_xy() {
        let level = match (bitmap.bpp, channel) {
            (8, _) => bitmap.raw(x, y) as u8,
            (24 | 32, Some(ColorChannel::Red)) => bitmap.color(x, y).rgbRed,
            (24 | 32, Some(ColorChannel::Green)) => bitmap.color(x, y).rgbGreen,
            (24 | 32, Some(ColorChannel::Blue)) => bitmap.color(x, y).rgbBlue,
            (24 | 32, Some(ColorChannel::Black)) => luma(bitmap.color(x, y)),
            _ => return FALSE,
        };
        bins[usize::from(level)] += 1;
    }
    unsafe { ptr::copy_nonoverlapping(bins.as_ptr(), histo, bins.len()) };
    TRUE
}

fn channel_byte(bpp: u32, channel: c_int) -> Option<u32> {
    match (bpp, ColorChannel::from_code(channel)?) {
        (24 | 32, ColorChannel::Blue) => Some(0),
        (24 | 32, ColorChannel::Green) => Some(1),
        (24 | 32, ColorChannel::Red) => Some(2),
        (32, ColorChannel::Alpha) => Some(3),
        _ => None,
    }
}

unsafe extern "system" fn get_channel(dib: *mut FIBITMAP, channel: c_int) -> *mut FIBITMAP {
    let source = unsafe { fake(dib) };
    let Some(byte) = channel_byte(source.bpp, channel) else {
        return ptr::null_mut();
    };
    let mut target = source.sibling(source.width, source.height, 8);
    for (x, y) in source.pixels_xy() {
        target.set_raw(x, y, (source.raw(x, y) >> (byte * 8)) & 0xFF);
    }
    into_raw(target)
}

unsafe extern "system" fn set_channel(dst: *mut FIBITMAP, src: *mut FIBITMAP, channel: c_int) -> BOOL {
    let source = unsafe { fake(src) }.clone();
    let target = unsafe { fake(dst) };
    let Some(byte) = channel_byte(target.bpp, channel) else {
        return FALSE;
    };
    if source.bpp != 8 || source.width != target.width || source.height != target.height {
        return FALSE;
    }
    let shift = byte * 8;
    for (x, y) in source.pixels_xy() {
        let value = (target.raw(x, y) & !(0xFF << shift)) | (source.raw(x, y) << shift);
        target.set_raw(x, y, value);
    }
    TRUE
}

unsafe extern "system" fn get_complex_channel(src: *mut FIBITMAP, channel: c_int) -> *mut FIBITMAP {
    let source = unsafe { fake(src) };
    if source.image_type != ImageType::Complex {
        emit(-1, "complex channels need a complex image");
        return ptr::null_mut();
    }
    let Some(channel) = ColorChannel::from_code(channel) else {
        return ptr::null_mut();
    };
    let mut target = FakeBitmap::typed(ImageType::Double, source.width, source.height, 64);
    for (x, y) in source.pixels_xy() {
        let (real, imag) = (source.sample(x, y, 0), source.sample(x, y, 1));
        let value = match channel {
            ColorChannel::Real => real,
            ColorChannel::Imag => imag,
            ColorChannel::Mag => real.hypot(imag),
            ColorChannel::Phase => imag.atan2(real),
            _ => return ptr::null_mut(),
        };
        target.set_sample(x, y, 0, value);
    }
    into_raw(target)
}

unsafe extern "system" fn set_complex_channel(dst: *mut FIBITMAP, src: *mut FIBITMAP, channel: c_int) -> BOOL {
    let source = unsafe { fake(src) }.clone();
    let target = unsafe { fake(dst) };
    let part = match ColorChannel::from_code(channel) {
        Some(ColorChannel::Real) => 0,
        Some(ColorChannel::Imag) => 1,
        _ => return FALSE,
    };
    if target.image_type != ImageType::Complex
        || source.image_type != ImageType::Double
        || source.width != target.width
        || source.height != target.height
    {
        return FALSE;
    }
    for (x, y) in source.pixels_xy() {
        target.set_sample(x, y, part, source.sample(x, y, 0));
    }
    TRUE
}

// =========================================================================
// Metadata
// =========================================================================

struct FakeFind {
    dib: *mut FIBITMAP,
    model: c_int,
    next: usize,
}

unsafe fn nth_tag(dib: *mut FIBITMAP, model: c_int, n: usize) -> *mut FITAG {
    unsafe { fake(dib) }
        .metadata
        .iter()
        .filter(|tag| tag.model == model)
        .nth(n)
        .map_or(ptr::null_mut(), |tag| ptr::from_ref(tag).cast_mut().cast())
}

unsafe fn tag<'a>(tag: *mut FITAG) -> &'a FakeTag {
    unsafe { &*tag.cast::<FakeTag>() }
}

unsafe extern "system" fn get_metadata_count(model: c_int, dib: *mut FIBITMAP) -> c_uint {
    let bitmap = unsafe { fake(dib) };
    bitmap.metadata.iter().filter(|tag| tag.model == model).count() as c_uint
}

unsafe extern "system" fn find_first_metadata(model: c_int, dib: *mut FIBITMAP, tag: *mut *mut FITAG) -> *mut FIMETADATA {
    let first = unsafe { nth_tag(dib, model, 0) };
    if first.is_null() {
        return ptr::null_mut();
    }
    unsafe { *tag = first };
    Box::into_raw(Box::new(FakeFind { dib, model, next: 1 })).cast()
}

unsafe extern "system" fn find_next_metadata(mdhandle: *mut FIMETADATA, tag: *mut *mut FITAG) -> BOOL {
    let find = unsafe { &mut *mdhandle.cast::<FakeFind>() };
    let next = unsafe { nth_tag(find.dib, find.model, find.next) };
    if next.is_null() {
        return FALSE;
    }
    unsafe { *tag = next };
    find.next += 1;
    TRUE
}

unsafe extern "system" fn find_close_metadata(mdhandle: *mut FIMETADATA) {
    bump(|calls| calls.find_close += 1);
    if !mdhandle.is_null() {
        drop(unsafe { Box::from_raw(mdhandle.cast::<FakeFind>()) });
    }
}

unsafe extern "system" fn get_metadata(model: c_int, dib: *mut FIBITMAP, key: *const c_char, tag: *mut *mut FITAG) -> BOOL {
    let key = unsafe { CStr::from_ptr(key) };
    let found = unsafe { fake(dib) }
        .metadata
        .iter()
        .find(|candidate| candidate.model == model && candidate.key.as_c_str() == key);
    match found {
        Some(found) => {
            unsafe { *tag = ptr::from_ref(found).cast_mut().cast() };
            TRUE
        }
        None => FALSE,
    }
}

unsafe extern "system" fn get_tag_key(tag_ptr: *mut FITAG) -> *const c_char {
    unsafe { tag(tag_ptr) }.key.as_ptr()
}

unsafe extern "system" fn get_tag_description(_tag: *mut FITAG) -> *const c_char {
    ptr::null()
}

unsafe extern "system" fn get_tag_id(tag_ptr: *mut FITAG) -> WORD {
    unsafe { tag(tag_ptr) }.id
}

unsafe extern "system" fn get_tag_type(tag_ptr: *mut FITAG) -> c_int {
    unsafe { tag(tag_ptr) }.tag_type
}

unsafe extern "system" fn get_tag_count(tag_ptr: *mut FITAG) -> DWORD {
    unsafe { tag(tag_ptr) }.count
}

unsafe extern "system" fn tag_to_string(_model: c_int, tag_ptr: *mut FITAG, _make: *mut c_char) -> *const c_char {
    unsafe { tag(tag_ptr) }.value.as_ptr()
}
