//! Format plugins: detection and capability queries.
//!
//! Each image format is handled by a FreeImage plugin identified by its
//! [`ImageFormat`] code. This module asks the library which plugin fits a
//! file, what each plugin can do, and switches plugins on and off.
//!
//! ## Detection order
//!
//! [`Library::deduce_format`] reads the file signature first and only falls
//! back to the file name when the signature is not recognised. Loading
//! through [`Library::load_any`] additionally requires the plugin to support
//! reading.
//!
//! ## Extra plugins
//!
//! [`Library::register_local_plugin`] adds a plugin implemented in this
//! process, [`Library::register_external_plugin`] one from a shared object.
//! Both get the next free format code.

use crate::bitmap::Bitmap;
use crate::error::{Error, Result};
use crate::ffi::{self, FALSE, FI_InitProc, TRUE};
use crate::format::ImageFormat;
use crate::library::{self, Library};
use crate::multipage::MultiBitmap;
use crate::types::ImageType;
use libc::{c_char, c_int};
use log::{debug, info};
use std::ffi::CString;
use std::path::Path;
use std::ptr;

/// What one plugin reports about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginInfo {
    pub format: ImageFormat,
    /// Short name, e.g. `PNG`.
    pub name: String,
    pub description: Option<String>,
    /// Extensions without dots, first one preferred.
    pub extensions: Vec<String>,
    pub mime_type: Option<String>,
    pub reads: bool,
    pub writes: bool,
}

/// Names handed to the library when registering a plugin. A `None` field
/// makes the library ask the plugin itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PluginNames<'a> {
    pub format: Option<&'a str>,
    pub description: Option<&'a str>,
    /// Comma-separated, without dots.
    pub extension: Option<&'a str>,
    pub regexpr: Option<&'a str>,
}

/// Owned C strings for [`PluginNames`], alive across the registration call.
struct NameArgs([Option<CString>; 4]);

impl NameArgs {
    fn new(names: &PluginNames) -> Result<Self> {
        let arg = |value: Option<&str>, what| value.map(|value| text_arg(value, what)).transpose();
        Ok(Self([
            arg(names.format, "plugin format")?,
            arg(names.description, "plugin description")?,
            arg(names.extension, "plugin extension")?,
            arg(names.regexpr, "plugin regexpr")?,
        ]))
    }

    fn ptr(&self, n: usize) -> *const c_char {
        self.0[n].as_ref().map_or(ptr::null(), |value| value.as_ptr())
    }
}

fn text_arg(value: &str, what: &str) -> Result<CString> {
    CString::new(value).map_err(|_| Error::InvalidArgument(format!("{what} contains a NUL byte: {value:?}")))
}

impl Library {
    /// Number of registered plugins.
    pub fn format_count(&self) -> Result<usize> {
        let get_fif_count = self.api().get_fif_count()?;
        Ok(usize::try_from(unsafe { get_fif_count() }).unwrap_or(0))
    }

    /// Format from the file's signature; [`ImageFormat::UNKNOWN`] when no
    /// plugin recognises it.
    pub fn file_type(&self, path: &Path) -> Result<ImageFormat> {
        let get_file_type = self.api().get_file_type()?;
        let filename = library::path_cstring(path)?;
        Ok(ImageFormat::from_code(unsafe { get_file_type(filename.as_ptr(), 0) }))
    }

    /// Format from the file name's extension.
    pub fn format_from_filename(&self, path: &Path) -> Result<ImageFormat> {
        let get_fif_from_filename = self.api().get_fif_from_filename()?;
        let filename = library::path_cstring(path)?;
        Ok(ImageFormat::from_code(unsafe { get_fif_from_filename(filename.as_ptr()) }))
    }

    /// Format from a short name such as `"PNG"` or `"TIFF"`.
    pub fn format_from_name(&self, name: &str) -> Result<ImageFormat> {
        let get_fif_from_format = self.api().get_fif_from_format()?;
        let name = text_arg(name, "format name")?;
        Ok(ImageFormat::from_code(unsafe { get_fif_from_format(name.as_ptr()) }))
    }

    pub fn format_from_mime(&self, mime: &str) -> Result<ImageFormat> {
        let get_fif_from_mime = self.api().get_fif_from_mime()?;
        let mime = text_arg(mime, "MIME type")?;
        Ok(ImageFormat::from_code(unsafe { get_fif_from_mime(mime.as_ptr()) }))
    }

    /// Signature first, then file name.
    pub fn deduce_format(&self, path: &Path) -> Result<ImageFormat> {
        let format = self.file_type(path)?;
        if format.is_known() {
            return Ok(format);
        }
        let format = self.format_from_filename(path)?;
        debug!("{} has no known signature, name says {format}", path.display());
        Ok(format)
    }

    pub fn format_name(&self, format: ImageFormat) -> Result<Option<String>> {
        let get_format_from_fif = self.api().get_format_from_fif()?;
        Ok(unsafe { ffi::string_from(get_format_from_fif(format.code())) })
    }

    pub fn format_description(&self, format: ImageFormat) -> Result<Option<String>> {
        let get_fif_description = self.api().get_fif_description()?;
        Ok(unsafe { ffi::string_from(get_fif_description(format.code())) })
    }

    /// Extensions the plugin claims, without dots.
    pub fn format_extensions(&self, format: ImageFormat) -> Result<Vec<String>> {
        let get_fif_extension_list = self.api().get_fif_extension_list()?;
        let list = unsafe { ffi::string_from(get_fif_extension_list(format.code())) }.unwrap_or_default();
        Ok(list
            .split(',')
            .map(str::trim)
            .filter(|ext| !ext.is_empty())
            .map(str::to_owned)
            .collect())
    }

    /// Regular expression the plugin matches signatures with, if it has one.
    pub fn format_regexpr(&self, format: ImageFormat) -> Result<Option<String>> {
        let get_fif_regexpr = self.api().get_fif_regexpr()?;
        Ok(unsafe { ffi::string_from(get_fif_regexpr(format.code())) })
    }

    pub fn format_mime_type(&self, format: ImageFormat) -> Result<Option<String>> {
        let get_fif_mime_type = self.api().get_fif_mime_type()?;
        Ok(unsafe { ffi::string_from(get_fif_mime_type(format.code())) })
    }

    pub fn supports_reading(&self, format: ImageFormat) -> Result<bool> {
        let supports = self.api().fif_supports_reading()?;
        Ok(unsafe { supports(format.code()) } != FALSE)
    }

    pub fn supports_writing(&self, format: ImageFormat) -> Result<bool> {
        let supports = self.api().fif_supports_writing()?;
        Ok(unsafe { supports(format.code()) } != FALSE)
    }

    /// Whether the plugin can save bitmaps of `bpp` bits per pixel.
    pub fn supports_export_bpp(&self, format: ImageFormat, bpp: u32) -> Result<bool> {
        let supports = self.api().fif_supports_export_bpp()?;
        let bpp = c_int::try_from(bpp).map_err(|_| Error::InvalidArgument(format!("bpp {bpp} too large")))?;
        Ok(unsafe { supports(format.code(), bpp) } != FALSE)
    }

    /// Whether the plugin can save bitmaps of `image_type`.
    pub fn supports_export_type(&self, format: ImageFormat, image_type: ImageType) -> Result<bool> {
        let supports = self.api().fif_supports_export_type()?;
        Ok(unsafe { supports(format.code(), image_type.code()) } != FALSE)
    }

    pub fn supports_icc_profiles(&self, format: ImageFormat) -> Result<bool> {
        let supports = self.api().fif_supports_icc_profiles()?;
        Ok(unsafe { supports(format.code()) } != FALSE)
    }

    /// Register a plugin whose callbacks live in this process. `init` fills
    /// in the plugin table and receives the new format code.
    ///
    /// # Safety
    ///
    /// `init` and every callback it installs must follow the FreeImage
    /// plugin contract for as long as the library stays loaded.
    pub unsafe fn register_local_plugin(&self, init: FI_InitProc, names: &PluginNames) -> Result<ImageFormat> {
        let register = self.api().register_local_plugin()?;
        let args = NameArgs::new(names)?;
        library::clear_last_message();
        match unsafe { register(init, args.ptr(0), args.ptr(1), args.ptr(2), args.ptr(3)) } {
            -1 => Err(library::native_error("FreeImage_RegisterLocalPlugin")),
            code => {
                info!("registered local plugin {code}");
                Ok(ImageFormat::from_code(code))
            }
        }
    }

    /// Register a plugin from the shared object at `path`.
    ///
    /// # Safety
    ///
    /// The library loads `path` and runs its `Init` export.
    pub unsafe fn register_external_plugin(&self, path: &Path, names: &PluginNames) -> Result<ImageFormat> {
        let register = self.api().register_external_plugin()?;
        let filename = library::path_cstring(path)?;
        let args = NameArgs::new(names)?;
        library::clear_last_message();
        match unsafe { register(filename.as_ptr(), args.ptr(0), args.ptr(1), args.ptr(2), args.ptr(3)) } {
            -1 => Err(library::native_error("FreeImage_RegisterExternalPlugin")),
            code => {
                info!("registered plugin {code} from {}", path.display());
                Ok(ImageFormat::from_code(code))
            }
        }
    }

    /// `None` when `format` has no plugin.
    pub fn is_plugin_enabled(&self, format: ImageFormat) -> Result<Option<bool>> {
        let is_plugin_enabled = self.api().is_plugin_enabled()?;
        Ok(match unsafe { is_plugin_enabled(format.code()) } {
            -1 => None,
            state => Some(state != 0),
        })
    }

    /// Enable or disable a plugin, returning its previous state.
    pub fn set_plugin_enabled(&self, format: ImageFormat, enabled: bool) -> Result<bool> {
        let set_plugin_enabled = self.api().set_plugin_enabled()?;
        match unsafe { set_plugin_enabled(format.code(), if enabled { TRUE } else { FALSE }) } {
            -1 => Err(Error::UnknownFormat(format!("no plugin for {format}"))),
            previous => {
                debug!("plugin {format} {}", if enabled { "enabled" } else { "disabled" });
                Ok(previous != 0)
            }
        }
    }

    pub fn plugin_info(&self, format: ImageFormat) -> Result<Option<PluginInfo>> {
        let Some(name) = self.format_name(format)? else {
            return Ok(None);
        };
        Ok(Some(PluginInfo {
            format,
            name,
            description: self.format_description(format)?,
            extensions: self.format_extensions(format)?,
            mime_type: self.format_mime_type(format)?,
            reads: self.supports_reading(format)?,
            writes: self.supports_writing(format)?,
        }))
    }

    /// Every registered plugin, by format code.
    pub fn plugins(&self) -> Result<Vec<PluginInfo>> {
        let mut plugins = Vec::new();
        for code in 0..self.format_count()? {
            let code = c_int::try_from(code).map_err(|_| Error::InvalidArgument("too many plugins".into()))?;
            if let Some(info) = self.plugin_info(ImageFormat::from_code(code))? {
                plugins.push(info);
            }
        }
        Ok(plugins)
    }

    /// Deduce the format of `path` and load it.
    pub fn load_any(&self, path: &Path, flags: i32) -> Result<Bitmap> {
        let format = self.deduce_format(path)?;
        if !format.is_known() {
            return Err(Error::UnknownFormat(path.display().to_string()));
        }
        if !self.supports_reading(format)? {
            return Err(Error::UnknownFormat(format!("{format} cannot be read")));
        }
        self.load(format, path, flags)
    }

    /// Page count of a multi-page file, or `None` when its format is not a
    /// multi-page one. A TIFF with one page is still multi-page.
    pub fn multipage_count(&self, path: &Path) -> Result<Option<usize>> {
        let format = self.deduce_format(path)?;
        if !format.is_known() {
            return Err(Error::UnknownFormat(path.display().to_string()));
        }
        if !format.is_multipage() {
            return Ok(None);
        }
        let multi = MultiBitmap::open(self, format, path, true)?;
        let count = multi.page_count()?;
        multi.close()?;
        Ok(Some(count))
    }

    pub fn is_multipage(&self, path: &Path) -> Result<bool> {
        Ok(self.multipage_count(path)?.is_some())
    }
}
