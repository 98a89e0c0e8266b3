//! Typed FreeImage function table.
//!
//! [`Api`] has one `Option<fn>` field per bound entry point. The table is
//! declared once, from `FreeImage.h`, by the [`freeimage_api!`] macro below:
//! each line carries the exported name, the stdcall argument-byte suffix
//! (`@N`, only meaningful on 32-bit Windows) and the C signature.
//!
//! | Source | How the table is filled |
//! |---|---|
//! | Shared library | [`Api::resolve`] via `libloading`, once per load |
//! | Static link / test double | assign the public fields directly |
//!
//! A symbol the library does not export is left `None`. Binding carries on;
//! the gap only surfaces when the entry point is called, as
//! [`Error::SymbolUnavailable`].

use super::{
    BOOL, BYTE, DWORD, FI_InitProc, FIBITMAP, FIF, FIMETADATA, FIMULTIBITMAP, FITAG, FreeImageIO,
    OutputMessageFunction, RGBQUAD, WORD, fi_handle,
};
use crate::error::{Error, Result};
use libc::{c_char, c_int, c_uint};
use std::fmt;

/// Name under which `symbol` is exported.
///
/// 32-bit Windows builds of FreeImage export stdcall-decorated names
/// (`_FreeImage_Load@12`); everything else exports the plain name.
pub(crate) fn exported_name(symbol: &str, stack: u32) -> String {
    if cfg!(all(windows, target_arch = "x86")) {
        format!("_{symbol}@{stack}")
    } else {
        symbol.to_owned()
    }
}

macro_rules! freeimage_api {
    (
        $(
            $field:ident = $symbol:literal @ $stack:literal
                fn($($arg:ident: $ty:ty),* $(,)?) $(-> $ret:ty)?;
        )*
    ) => {
        /// Typed table of FreeImage entry points. See the [module docs](self).
        #[derive(Default)]
        pub struct Api {
            $(
                pub $field: Option<unsafe extern "system" fn($($arg: $ty),*) $(-> $ret)?>,
            )*
        }

        impl Api {
            /// Every entry point with its stdcall suffix, in declaration order.
            pub const SYMBOLS: &'static [(&'static str, u32)] = &[$(($symbol, $stack)),*];

            /// Resolve every entry point against a loaded library.
            ///
            /// Returns the table and the names that could not be resolved.
            ///
            /// # Safety
            /// `lib` must be a FreeImage build whose exports match the
            /// signatures declared here.
            pub unsafe fn resolve(lib: &libloading::Library) -> (Self, Vec<&'static str>) {
                let mut missing = Vec::new();
                let api = Self {
                    $(
                        $field: {
                            let name = exported_name($symbol, $stack);
                            match unsafe {
                                lib.get::<unsafe extern "system" fn($($ty),*) $(-> $ret)?>(name.as_bytes())
                            } {
                                Ok(symbol) => Some(*symbol),
                                Err(_) => {
                                    missing.push($symbol);
                                    None
                                }
                            }
                        },
                    )*
                };
                (api, missing)
            }

            $(
                #[inline]
                pub fn $field(&self) -> Result<unsafe extern "system" fn($($ty),*) $(-> $ret)?> {
                    self.$field.ok_or(Error::SymbolUnavailable($symbol))
                }
            )*

            /// Number of resolved entry points.
            pub fn bound(&self) -> usize {
                [$(self.$field.is_some()),*].iter().filter(|bound| **bound).count()
            }
        }
    };
}

freeimage_api! {
    // General
    initialise = "FreeImage_Initialise" @ 4 fn(load_local_plugins_only: BOOL);
    deinitialise = "FreeImage_DeInitialise" @ 0 fn();
    get_version = "FreeImage_GetVersion" @ 0 fn() -> *const c_char;
    get_copyright_message = "FreeImage_GetCopyrightMessage" @ 0 fn() -> *const c_char;
    set_output_message = "FreeImage_SetOutputMessageStdCall" @ 4 fn(omf: Option<OutputMessageFunction>);
    is_little_endian = "FreeImage_IsLittleEndian" @ 0 fn() -> BOOL;

    // Bitmap management
    allocate = "FreeImage_Allocate" @ 24
        fn(width: c_int, height: c_int, bpp: c_int, red_mask: c_uint, green_mask: c_uint, blue_mask: c_uint) -> *mut FIBITMAP;
    allocate_t = "FreeImage_AllocateT" @ 28
        fn(image_type: c_int, width: c_int, height: c_int, bpp: c_int, red_mask: c_uint, green_mask: c_uint, blue_mask: c_uint) -> *mut FIBITMAP;
    load = "FreeImage_Load" @ 12 fn(fif: FIF, filename: *const c_char, flags: c_int) -> *mut FIBITMAP;
    load_from_handle = "FreeImage_LoadFromHandle" @ 16
        fn(fif: FIF, io: *mut FreeImageIO, handle: fi_handle, flags: c_int) -> *mut FIBITMAP;
    save = "FreeImage_Save" @ 16 fn(fif: FIF, dib: *mut FIBITMAP, filename: *const c_char, flags: c_int) -> BOOL;
    save_to_handle = "FreeImage_SaveToHandle" @ 20
        fn(fif: FIF, dib: *mut FIBITMAP, io: *mut FreeImageIO, handle: fi_handle, flags: c_int) -> BOOL;
    clone_bitmap = "FreeImage_Clone" @ 4 fn(dib: *mut FIBITMAP) -> *mut FIBITMAP;
    unload = "FreeImage_Unload" @ 4 fn(dib: *mut FIBITMAP);

    // Bitmap information
    get_image_type = "FreeImage_GetImageType" @ 4 fn(dib: *mut FIBITMAP) -> c_int;
    get_colors_used = "FreeImage_GetColorsUsed" @ 4 fn(dib: *mut FIBITMAP) -> c_uint;
    get_bpp = "FreeImage_GetBPP" @ 4 fn(dib: *mut FIBITMAP) -> c_uint;
    get_width = "FreeImage_GetWidth" @ 4 fn(dib: *mut FIBITMAP) -> c_uint;
    get_height = "FreeImage_GetHeight" @ 4 fn(dib: *mut FIBITMAP) -> c_uint;
    get_line = "FreeImage_GetLine" @ 4 fn(dib: *mut FIBITMAP) -> c_uint;
    get_pitch = "FreeImage_GetPitch" @ 4 fn(dib: *mut FIBITMAP) -> c_uint;
    get_dib_size = "FreeImage_GetDIBSize" @ 4 fn(dib: *mut FIBITMAP) -> c_uint;
    get_palette = "FreeImage_GetPalette" @ 4 fn(dib: *mut FIBITMAP) -> *mut RGBQUAD;
    get_dots_per_meter_x = "FreeImage_GetDotsPerMeterX" @ 4 fn(dib: *mut FIBITMAP) -> c_uint;
    get_dots_per_meter_y = "FreeImage_GetDotsPerMeterY" @ 4 fn(dib: *mut FIBITMAP) -> c_uint;
    set_dots_per_meter_x = "FreeImage_SetDotsPerMeterX" @ 8 fn(dib: *mut FIBITMAP, res: c_uint);
    set_dots_per_meter_y = "FreeImage_SetDotsPerMeterY" @ 8 fn(dib: *mut FIBITMAP, res: c_uint);
    get_color_type = "FreeImage_GetColorType" @ 4 fn(dib: *mut FIBITMAP) -> c_int;
    get_transparency_count = "FreeImage_GetTransparencyCount" @ 4 fn(dib: *mut FIBITMAP) -> c_uint;
    is_transparent = "FreeImage_IsTransparent" @ 4 fn(dib: *mut FIBITMAP) -> BOOL;
    has_background_color = "FreeImage_HasBackgroundColor" @ 4 fn(dib: *mut FIBITMAP) -> BOOL;
    get_background_color = "FreeImage_GetBackgroundColor" @ 8 fn(dib: *mut FIBITMAP, color: *mut RGBQUAD) -> BOOL;
    set_background_color = "FreeImage_SetBackgroundColor" @ 8 fn(dib: *mut FIBITMAP, color: *mut RGBQUAD) -> BOOL;
    get_red_mask = "FreeImage_GetRedMask" @ 4 fn(dib: *mut FIBITMAP) -> c_uint;
    get_green_mask = "FreeImage_GetGreenMask" @ 4 fn(dib: *mut FIBITMAP) -> c_uint;
    get_blue_mask = "FreeImage_GetBlueMask" @ 4 fn(dib: *mut FIBITMAP) -> c_uint;
    get_transparency_table = "FreeImage_GetTransparencyTable" @ 4 fn(dib: *mut FIBITMAP) -> *mut BYTE;
    set_transparency_table = "FreeImage_SetTransparencyTable" @ 12 fn(dib: *mut FIBITMAP, table: *mut BYTE, count: c_int);
    set_transparent = "FreeImage_SetTransparent" @ 8 fn(dib: *mut FIBITMAP, enabled: BOOL);

    // File type and plugins
    get_file_type = "FreeImage_GetFileType" @ 8 fn(filename: *const c_char, size: c_int) -> FIF;
    get_file_type_from_handle = "FreeImage_GetFileTypeFromHandle" @ 12
        fn(io: *mut FreeImageIO, handle: fi_handle, size: c_int) -> FIF;
    get_fif_count = "FreeImage_GetFIFCount" @ 0 fn() -> c_int;
    set_plugin_enabled = "FreeImage_SetPluginEnabled" @ 8 fn(fif: FIF, enable: BOOL) -> c_int;
    is_plugin_enabled = "FreeImage_IsPluginEnabled" @ 4 fn(fif: FIF) -> c_int;
    get_fif_from_format = "FreeImage_GetFIFFromFormat" @ 4 fn(format: *const c_char) -> FIF;
    get_fif_from_mime = "FreeImage_GetFIFFromMime" @ 4 fn(mime: *const c_char) -> FIF;
    get_format_from_fif = "FreeImage_GetFormatFromFIF" @ 4 fn(fif: FIF) -> *const c_char;
    get_fif_extension_list = "FreeImage_GetFIFExtensionList" @ 4 fn(fif: FIF) -> *const c_char;
    get_fif_description = "FreeImage_GetFIFDescription" @ 4 fn(fif: FIF) -> *const c_char;
    get_fif_mime_type = "FreeImage_GetFIFMimeType" @ 4 fn(fif: FIF) -> *const c_char;
    get_fif_from_filename = "FreeImage_GetFIFFromFilename" @ 4 fn(filename: *const c_char) -> FIF;
    fif_supports_reading = "FreeImage_FIFSupportsReading" @ 4 fn(fif: FIF) -> BOOL;
    fif_supports_writing = "FreeImage_FIFSupportsWriting" @ 4 fn(fif: FIF) -> BOOL;
    fif_supports_export_bpp = "FreeImage_FIFSupportsExportBPP" @ 8 fn(fif: FIF, bpp: c_int) -> BOOL;
    fif_supports_export_type = "FreeImage_FIFSupportsExportType" @ 8 fn(fif: FIF, image_type: c_int) -> BOOL;
    fif_supports_icc_profiles = "FreeImage_FIFSupportsICCProfiles" @ 4 fn(fif: FIF) -> BOOL;
    get_fif_regexpr = "FreeImage_GetFIFRegExpr" @ 4 fn(fif: FIF) -> *const c_char;
    register_local_plugin = "FreeImage_RegisterLocalPlugin" @ 20
        fn(proc_address: FI_InitProc, format: *const c_char, description: *const c_char, extension: *const c_char, regexpr: *const c_char) -> FIF;
    register_external_plugin = "FreeImage_RegisterExternalPlugin" @ 20
        fn(path: *const c_char, format: *const c_char, description: *const c_char, extension: *const c_char, regexpr: *const c_char) -> FIF;

    // Multi-page
    open_multi_bitmap = "FreeImage_OpenMultiBitmap" @ 24
        fn(fif: FIF, filename: *const c_char, create_new: BOOL, read_only: BOOL, keep_cache_in_memory: BOOL, flags: c_int) -> *mut FIMULTIBITMAP;
    close_multi_bitmap = "FreeImage_CloseMultiBitmap" @ 8 fn(bitmap: *mut FIMULTIBITMAP, flags: c_int) -> BOOL;
    get_page_count = "FreeImage_GetPageCount" @ 4 fn(bitmap: *mut FIMULTIBITMAP) -> c_int;
    append_page = "FreeImage_AppendPage" @ 8 fn(bitmap: *mut FIMULTIBITMAP, data: *mut FIBITMAP);
    insert_page = "FreeImage_InsertPage" @ 12 fn(bitmap: *mut FIMULTIBITMAP, page: c_int, data: *mut FIBITMAP);
    delete_page = "FreeImage_DeletePage" @ 8 fn(bitmap: *mut FIMULTIBITMAP, page: c_int);
    lock_page = "FreeImage_LockPage" @ 8 fn(bitmap: *mut FIMULTIBITMAP, page: c_int) -> *mut FIBITMAP;
    unlock_page = "FreeImage_UnlockPage" @ 12 fn(bitmap: *mut FIMULTIBITMAP, data: *mut FIBITMAP, changed: BOOL);
    move_page = "FreeImage_MovePage" @ 12 fn(bitmap: *mut FIMULTIBITMAP, target: c_int, source: c_int) -> BOOL;
    get_locked_page_numbers = "FreeImage_GetLockedPageNumbers" @ 12
        fn(bitmap: *mut FIMULTIBITMAP, pages: *mut c_int, count: *mut c_int) -> BOOL;

    // Pixel access
    get_bits = "FreeImage_GetBits" @ 4 fn(dib: *mut FIBITMAP) -> *mut BYTE;
    get_scan_line = "FreeImage_GetScanLine" @ 8 fn(dib: *mut FIBITMAP, scanline: c_int) -> *mut BYTE;
    get_pixel_index = "FreeImage_GetPixelIndex" @ 16 fn(dib: *mut FIBITMAP, x: c_uint, y: c_uint, value: *mut BYTE) -> BOOL;
    set_pixel_index = "FreeImage_SetPixelIndex" @ 16 fn(dib: *mut FIBITMAP, x: c_uint, y: c_uint, value: *mut BYTE) -> BOOL;
    get_pixel_color = "FreeImage_GetPixelColor" @ 16 fn(dib: *mut FIBITMAP, x: c_uint, y: c_uint, value: *mut RGBQUAD) -> BOOL;
    set_pixel_color = "FreeImage_SetPixelColor" @ 16 fn(dib: *mut FIBITMAP, x: c_uint, y: c_uint, value: *mut RGBQUAD) -> BOOL;

    // Conversion
    convert_to_4bits = "FreeImage_ConvertTo4Bits" @ 4 fn(dib: *mut FIBITMAP) -> *mut FIBITMAP;
    convert_to_8bits = "FreeImage_ConvertTo8Bits" @ 4 fn(dib: *mut FIBITMAP) -> *mut FIBITMAP;
    convert_to_greyscale = "FreeImage_ConvertToGreyscale" @ 4 fn(dib: *mut FIBITMAP) -> *mut FIBITMAP;
    convert_to_16bits_555 = "FreeImage_ConvertTo16Bits555" @ 4 fn(dib: *mut FIBITMAP) -> *mut FIBITMAP;
    convert_to_16bits_565 = "FreeImage_ConvertTo16Bits565" @ 4 fn(dib: *mut FIBITMAP) -> *mut FIBITMAP;
    convert_to_24bits = "FreeImage_ConvertTo24Bits" @ 4 fn(dib: *mut FIBITMAP) -> *mut FIBITMAP;
    convert_to_32bits = "FreeImage_ConvertTo32Bits" @ 4 fn(dib: *mut FIBITMAP) -> *mut FIBITMAP;
    color_quantize = "FreeImage_ColorQuantize" @ 8 fn(dib: *mut FIBITMAP, quantize: c_int) -> *mut FIBITMAP;
    color_quantize_ex = "FreeImage_ColorQuantizeEx" @ 20
        fn(dib: *mut FIBITMAP, quantize: c_int, palette_size: c_int, reserve_size: c_int, reserve_palette: *mut RGBQUAD) -> *mut FIBITMAP;
    threshold = "FreeImage_Threshold" @ 8 fn(dib: *mut FIBITMAP, t: BYTE) -> *mut FIBITMAP;
    dither = "FreeImage_Dither" @ 8 fn(dib: *mut FIBITMAP, algorithm: c_int) -> *mut FIBITMAP;
    convert_to_raw_bits = "FreeImage_ConvertToRawBits" @ 32
        fn(bits: *mut BYTE, dib: *mut FIBITMAP, pitch: c_int, bpp: c_uint, red_mask: c_uint, green_mask: c_uint, blue_mask: c_uint, topdown: BOOL);
    convert_from_raw_bits = "FreeImage_ConvertFromRawBits" @ 36
        fn(bits: *mut BYTE, width: c_int, height: c_int, pitch: c_int, bpp: c_uint, red_mask: c_uint, green_mask: c_uint, blue_mask: c_uint, topdown: BOOL) -> *mut FIBITMAP;
    convert_to_standard_type = "FreeImage_ConvertToStandardType" @ 8 fn(src: *mut FIBITMAP, scale_linear: BOOL) -> *mut FIBITMAP;
    convert_to_type = "FreeImage_ConvertToType" @ 12
        fn(src: *mut FIBITMAP, dst_type: c_int, scale_linear: BOOL) -> *mut FIBITMAP;
    convert_to_rgbf = "FreeImage_ConvertToRGBF" @ 4 fn(dib: *mut FIBITMAP) -> *mut FIBITMAP;

    // Copy / paste
    copy = "FreeImage_Copy" @ 20
        fn(dib: *mut FIBITMAP, left: c_int, top: c_int, right: c_int, bottom: c_int) -> *mut FIBITMAP;
    paste = "FreeImage_Paste" @ 20
        fn(dst: *mut FIBITMAP, src: *mut FIBITMAP, left: c_int, top: c_int, alpha: c_int) -> BOOL;

    // Resampling
    rescale = "FreeImage_Rescale" @ 16
        fn(dib: *mut FIBITMAP, dst_width: c_int, dst_height: c_int, filter: c_int) -> *mut FIBITMAP;
    make_thumbnail = "FreeImage_MakeThumbnail" @ 12
        fn(dib: *mut FIBITMAP, max_pixel_size: c_int, convert: BOOL) -> *mut FIBITMAP;

    // Rotation and flipping
    rotate_classic = "FreeImage_RotateClassic" @ 12 fn(dib: *mut FIBITMAP, angle: f64) -> *mut FIBITMAP;
    rotate_ex = "FreeImage_RotateEx" @ 48
        fn(dib: *mut FIBITMAP, angle: f64, x_shift: f64, y_shift: f64, x_origin: f64, y_origin: f64, use_mask: BOOL) -> *mut FIBITMAP;
    flip_horizontal = "FreeImage_FlipHorizontal" @ 4 fn(dib: *mut FIBITMAP) -> BOOL;
    flip_vertical = "FreeImage_FlipVertical" @ 4 fn(dib: *mut FIBITMAP) -> BOOL;

    // Color manipulation
    adjust_brightness = "FreeImage_AdjustBrightness" @ 12 fn(dib: *mut FIBITMAP, percentage: f64) -> BOOL;
    adjust_contrast = "FreeImage_AdjustContrast" @ 12 fn(dib: *mut FIBITMAP, percentage: f64) -> BOOL;
    adjust_gamma = "FreeImage_AdjustGamma" @ 12 fn(dib: *mut FIBITMAP, gamma: f64) -> BOOL;
    adjust_curve = "FreeImage_AdjustCurve" @ 12 fn(dib: *mut FIBITMAP, lut: *mut BYTE, channel: c_int) -> BOOL;
    invert = "FreeImage_Invert" @ 4 fn(dib: *mut FIBITMAP) -> BOOL;
    get_histogram = "FreeImage_GetHistogram" @ 12 fn(dib: *mut FIBITMAP, histo: *mut DWORD, channel: c_int) -> BOOL;
    get_channel = "FreeImage_GetChannel" @ 8 fn(dib: *mut FIBITMAP, channel: c_int) -> *mut FIBITMAP;
    set_channel = "FreeImage_SetChannel" @ 12 fn(dst: *mut FIBITMAP, src: *mut FIBITMAP, channel: c_int) -> BOOL;
    get_complex_channel = "FreeImage_GetComplexChannel" @ 8 fn(src: *mut FIBITMAP, channel: c_int) -> *mut FIBITMAP;
    set_complex_channel = "FreeImage_SetComplexChannel" @ 12
        fn(dst: *mut FIBITMAP, src: *mut FIBITMAP, channel: c_int) -> BOOL;

    // Metadata
    get_metadata_count = "FreeImage_GetMetadataCount" @ 8 fn(model: c_int, dib: *mut FIBITMAP) -> c_uint;
    find_first_metadata = "FreeImage_FindFirstMetadata" @ 12
        fn(model: c_int, dib: *mut FIBITMAP, tag: *mut *mut FITAG) -> *mut FIMETADATA;
    find_next_metadata = "FreeImage_FindNextMetadata" @ 8 fn(mdhandle: *mut FIMETADATA, tag: *mut *mut FITAG) -> BOOL;
    find_close_metadata = "FreeImage_FindCloseMetadata" @ 4 fn(mdhandle: *mut FIMETADATA);
    get_metadata = "FreeImage_GetMetadata" @ 16
        fn(model: c_int, dib: *mut FIBITMAP, key: *const c_char, tag: *mut *mut FITAG) -> BOOL;
    get_tag_key = "FreeImage_GetTagKey" @ 4 fn(tag: *mut FITAG) -> *const c_char;
    get_tag_description = "FreeImage_GetTagDescription" @ 4 fn(tag: *mut FITAG) -> *const c_char;
    get_tag_id = "FreeImage_GetTagID" @ 4 fn(tag: *mut FITAG) -> WORD;
    get_tag_type = "FreeImage_GetTagType" @ 4 fn(tag: *mut FITAG) -> c_int;
    get_tag_count = "FreeImage_GetTagCount" @ 4 fn(tag: *mut FITAG) -> DWORD;
    tag_to_string = "FreeImage_TagToString" @ 12 fn(model: c_int, tag: *mut FITAG, make: *mut c_char) -> *const c_char;
}

impl Api {
    /// A table with nothing bound.
    pub fn empty() -> Self {
        Self::default()
    }
}

impl fmt::Debug for Api {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Api")
            .field("bound", &self.bound())
            .field("declared", &Self::SYMBOLS.len())
            .finish()
    }
}
