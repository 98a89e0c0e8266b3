//! Settings module.
//!
//! Loads and validates the TOML file that tells the crate where FreeImage
//! lives and which defaults the [`Image`](crate::image::Image) façade uses.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [library]
//! # path = "/usr/lib/libfreeimage.so.3"  # omit to search the platform names
//!
//! [image]
//! resize_filter = "bspline"      # box|bicubic|bilinear|bspline|catmullrom|lanczos3
//! automatic_color_change = true  # resize odd depths through 24 bits
//! try_multipage = true           # open TIFF/GIF/ICO as page containers
//! default_save_format = "png"    # tag used when a file name has no extension
//! ```
//!
//! ## Partial Configuration
//!
//! Files are sparse, override just the values you want:
//!
//! ```toml
//! [image]
//! resize_filter = "lanczos3"
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::format;
use crate::types::Filter;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Settings loaded from a TOML file.
///
/// All fields have defaults; files need only the values they override.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Where to load FreeImage from.
    pub library: LibrarySettings,
    /// Defaults for the image façade.
    pub image: ImageSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LibrarySettings {
    /// Explicit library file. `None` searches the platform names.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImageSettings {
    /// Filter used by `resize` when none is given.
    pub resize_filter: Filter,
    /// Convert depths the rescaler cannot handle to 24 bits and back.
    pub automatic_color_change: bool,
    /// Open multi-page formats as a page container.
    pub try_multipage: bool,
    /// Save-format tag for file names without an extension.
    pub default_save_format: String,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            resize_filter: Filter::default(),
            automatic_color_change: true,
            try_multipage: true,
            default_save_format: "png".to_string(),
        }
    }
}

impl Settings {
    /// Validate values that the type system cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if format::save_format(&self.image.default_save_format).is_none() {
            return Err(ConfigError::Validation(format!(
                "image.default_save_format: unknown format tag {:?}",
                self.image.default_save_format
            )));
        }
        if self.library.path.as_ref().is_some_and(|path| path.as_os_str().is_empty()) {
            return Err(ConfigError::Validation("library.path must not be empty".into()));
        }
        Ok(())
    }

    /// Parse and validate settings from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Read settings from a file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Read settings from a file, or use the defaults when it does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(path)
    }
}

/// Returns a fully-commented settings file with all keys and their defaults.
pub fn stock_config_toml() -> &'static str {
    r##"# FreeImage binding settings
# ==========================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Native library
# ---------------------------------------------------------------------------
[library]
# Path to the FreeImage shared library. When omitted the platform names are
# tried in order: libfreeimage.so, libfreeimage.so.3 (Linux),
# libfreeimage.dylib (macOS), freeimage.dll (Windows).
# path = "/usr/lib/libfreeimage.so.3"

# ---------------------------------------------------------------------------
# Image defaults
# ---------------------------------------------------------------------------
[image]
# Resampling filter: box, bicubic, bilinear, bspline, catmullrom, lanczos3.
resize_filter = "bspline"

# Resize images whose depth the rescaler rejects by converting them to
# 24 bits, rescaling, and converting back.
automatic_color_change = true

# Open TIFF, GIF and ICO files as page containers with page 0 current.
try_multipage = true

# Format tag used to save when the file name has no extension:
# tiff, tiffg3, tiffg4, tiffno, jpeg, jpegfa, jpegac, jpegsu, jpeggo,
# jpegav, jpegba, png, bmp, ico, gif, pbm, pnm, ppm.
default_save_format = "png"
"##
}
