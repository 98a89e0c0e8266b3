//! Raw FreeImage ABI: opaque handles, C structs and callback typedefs.
//!
//! Everything here mirrors `FreeImage.h` one-to-one. Nothing in this module
//! is safe to use directly; the typed function table lives in [`api`] and
//! the safe wrappers live in the rest of the crate.
//!
//! ## Calling convention
//!
//! FreeImage exports its API with `DLL_CALLCONV`, which is `__stdcall` on
//! Windows and the platform C convention everywhere else. Rust's
//! `extern "system"` resolves to exactly that pair, so every function
//! pointer and every callback handed to the library uses it.

#![allow(non_camel_case_types, non_snake_case, clippy::upper_case_acronyms)]

pub mod api;

pub use api::Api;

use libc::{c_char, c_int, c_long, c_uint, c_void};
use std::ffi::CStr;

pub type BOOL = i32;
pub type BYTE = u8;
pub type WORD = u16;
pub type DWORD = u32;

pub const TRUE: BOOL = 1;
pub const FALSE: BOOL = 0;

/// Opaque pointer handed back to the I/O callbacks untouched.
pub type fi_handle = *mut c_void;

/// `FREE_IMAGE_FORMAT`
pub type FIF = c_int;

macro_rules! opaque {
    ($($name:ident),* $(,)?) => {
        $(
            #[repr(C)]
            pub struct $name {
                _opaque: [u8; 0],
            }
        )*
    };
}

opaque!(FIBITMAP, FIMULTIBITMAP, FITAG, FIMETADATA);

/// `RGBQUAD`: little-endian BGR(A) order, as FreeImage stores it.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RGBQUAD {
    pub rgbBlue: BYTE,
    pub rgbGreen: BYTE,
    pub rgbRed: BYTE,
    pub rgbReserved: BYTE,
}

pub type FI_ReadProc =
    unsafe extern "system" fn(buffer: *mut c_void, size: c_uint, count: c_uint, handle: fi_handle) -> c_uint;
pub type FI_WriteProc =
    unsafe extern "system" fn(buffer: *mut c_void, size: c_uint, count: c_uint, handle: fi_handle) -> c_uint;
pub type FI_SeekProc = unsafe extern "system" fn(handle: fi_handle, offset: c_long, origin: c_int) -> c_int;
pub type FI_TellProc = unsafe extern "system" fn(handle: fi_handle) -> c_long;

/// `FreeImageIO`: the four callbacks behind every `*FromHandle` entry point.
#[repr(C)]
pub struct FreeImageIO {
    pub read_proc: Option<FI_ReadProc>,
    pub write_proc: Option<FI_WriteProc>,
    pub seek_proc: Option<FI_SeekProc>,
    pub tell_proc: Option<FI_TellProc>,
}

/// `FreeImage_OutputMessageFunctionStdCall`
pub type OutputMessageFunction = unsafe extern "system" fn(fif: FIF, msg: *const c_char);

pub type FI_FormatProc = unsafe extern "system" fn() -> *const c_char;
pub type FI_DescriptionProc = unsafe extern "system" fn() -> *const c_char;
pub type FI_ExtensionListProc = unsafe extern "system" fn() -> *const c_char;
pub type FI_RegExprProc = unsafe extern "system" fn() -> *const c_char;
pub type FI_OpenProc = unsafe extern "system" fn(io: *mut FreeImageIO, handle: fi_handle, read: BOOL) -> *mut c_void;
pub type FI_CloseProc = unsafe extern "system" fn(io: *mut FreeImageIO, handle: fi_handle, data: *mut c_void);
pub type FI_PageCountProc = unsafe extern "system" fn(io: *mut FreeImageIO, handle: fi_handle, data: *mut c_void) -> c_int;
pub type FI_PageCapabilityProc =
    unsafe extern "system" fn(io: *mut FreeImageIO, handle: fi_handle, data: *mut c_void) -> c_int;
pub type FI_LoadProc = unsafe extern "system" fn(
    io: *mut FreeImageIO,
    handle: fi_handle,
    page: c_int,
    flags: c_int,
    data: *mut c_void,
) -> *mut FIBITMAP;
pub type FI_SaveProc = unsafe extern "system" fn(
    io: *mut FreeImageIO,
    dib: *mut FIBITMAP,
    handle: fi_handle,
    page: c_int,
    flags: c_int,
    data: *mut c_void,
) -> BOOL;
pub type FI_ValidateProc = unsafe extern "system" fn(io: *mut FreeImageIO, handle: fi_handle) -> BOOL;
pub type FI_MimeProc = unsafe extern "system" fn() -> *const c_char;
pub type FI_SupportsExportBPPProc = unsafe extern "system" fn(bpp: c_int) -> BOOL;
pub type FI_SupportsExportTypeProc = unsafe extern "system" fn(image_type: c_int) -> BOOL;
pub type FI_SupportsICCProfilesProc = unsafe extern "system" fn() -> BOOL;
pub type FI_SupportsNoPixelsProc = unsafe extern "system" fn() -> BOOL;

/// `Plugin`: the table a plugin's init procedure fills in.
#[repr(C)]
#[derive(Default)]
pub struct Plugin {
    pub format_proc: Option<FI_FormatProc>,
    pub description_proc: Option<FI_DescriptionProc>,
    pub extension_proc: Option<FI_ExtensionListProc>,
    pub regexpr_proc: Option<FI_RegExprProc>,
    pub open_proc: Option<FI_OpenProc>,
    pub close_proc: Option<FI_CloseProc>,
    pub pagecount_proc: Option<FI_PageCountProc>,
    pub pagecapability_proc: Option<FI_PageCapabilityProc>,
    pub load_proc: Option<FI_LoadProc>,
    pub save_proc: Option<FI_SaveProc>,
    pub validate_proc: Option<FI_ValidateProc>,
    pub mime_proc: Option<FI_MimeProc>,
    pub supports_export_bpp_proc: Option<FI_SupportsExportBPPProc>,
    pub supports_export_type_proc: Option<FI_SupportsExportTypeProc>,
    pub supports_icc_profiles_proc: Option<FI_SupportsICCProfilesProc>,
    pub supports_no_pixels_proc: Option<FI_SupportsNoPixelsProc>,
}

/// `FI_InitProc`: called once with the plugin table and the format id the
/// library assigned.
pub type FI_InitProc = unsafe extern "system" fn(plugin: *mut Plugin, format_id: c_int);

// Masks for 24/32-bit little-endian layouts.
pub const FI_RGBA_RED_MASK: u32 = 0x00FF_0000;
pub const FI_RGBA_GREEN_MASK: u32 = 0x0000_FF00;
pub const FI_RGBA_BLUE_MASK: u32 = 0x0000_00FF;

// Masks for the 16-bit 5-5-5 layout.
pub const FI16_555_RED_MASK: u32 = 0x7C00;
pub const FI16_555_GREEN_MASK: u32 = 0x03E0;
pub const FI16_555_BLUE_MASK: u32 = 0x001F;

pub const SEEK_SET: c_int = 0;
pub const SEEK_CUR: c_int = 1;
pub const SEEK_END: c_int = 2;

/// Copy a C string owned by the library.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string that stays valid
/// for the duration of the call.
pub(crate) unsafe fn string_from(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        None
    } else {
        Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
    }
}
