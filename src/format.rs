//! Image format codes, plugin flags and the save-format table.
//!
//! ## Save formats
//!
//! A short tag selects the format, flags and extension used to save:
//!
//! | Tag | Format | Flags | Extension |
//! |---|---|---|---|
//! | `tiff` / `tiffg3` / `tiffg4` / `tiffno` | TIFF | default / CCITT fax 3 / CCITT fax 4 / no compression | `.tif` |
//! | `jpeg` / `jpegfa` / `jpegac` | JPEG | default / fast / accurate | `.jpg` |
//! | `jpegsu` / `jpeggo` / `jpegav` / `jpegba` | JPEG | superb / good / average / bad quality | `.jpg` |
//! | `png`, `bmp`, `ico`, `gif`, `pbm` | as named | default | as named |
//! | `pnm`, `ppm` | PPM | default | `.pnm`, `.ppm` |
//!
//! File extensions go through the same table after normalisation:
//! `tif*` reads as `tiff*` and `jpg*` as `jpeg*`, so `scan.tifg4` saves as
//! CCITT fax 4 TIFF.

use crate::error::{Error, Result};
use crate::ffi::FIF;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

/// `FREE_IMAGE_FORMAT`. Codes the library reports that are unknown here
/// are kept as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageFormat(FIF);

impl ImageFormat {
    pub const UNKNOWN: Self = Self(-1);
    pub const BMP: Self = Self(0);
    pub const ICO: Self = Self(1);
    pub const JPEG: Self = Self(2);
    pub const JNG: Self = Self(3);
    pub const KOALA: Self = Self(4);
    pub const LBM: Self = Self(5);
    pub const IFF: Self = Self::LBM;
    pub const MNG: Self = Self(6);
    pub const PBM: Self = Self(7);
    pub const PBMRAW: Self = Self(8);
    pub const PCD: Self = Self(9);
    pub const PCX: Self = Self(10);
    pub const PGM: Self = Self(11);
    pub const PGMRAW: Self = Self(12);
    pub const PNG: Self = Self(13);
    pub const PPM: Self = Self(14);
    pub const PPMRAW: Self = Self(15);
    pub const RAS: Self = Self(16);
    pub const TARGA: Self = Self(17);
    pub const TIFF: Self = Self(18);
    pub const WBMP: Self = Self(19);
    pub const PSD: Self = Self(20);
    pub const CUT: Self = Self(21);
    pub const XBM: Self = Self(22);
    pub const XPM: Self = Self(23);
    pub const DDS: Self = Self(24);
    pub const GIF: Self = Self(25);
    pub const HDR: Self = Self(26);
    pub const FAXG3: Self = Self(27);
    pub const SGI: Self = Self(28);
    pub const EXR: Self = Self(29);
    pub const J2K: Self = Self(30);
    pub const JP2: Self = Self(31);
    pub const PFM: Self = Self(32);
    pub const PICT: Self = Self(33);
    pub const RAW: Self = Self(34);
    pub const WEBP: Self = Self(35);
    pub const JXR: Self = Self(36);

    pub const fn from_code(code: FIF) -> Self {
        Self(code)
    }

    pub const fn code(self) -> FIF {
        self.0
    }

    pub fn is_known(self) -> bool {
        self.0 >= 0
    }

    /// TIFF, ICO and GIF hold several pages and open as a container.
    pub fn is_multipage(self) -> bool {
        matches!(self, Self::TIFF | Self::ICO | Self::GIF)
    }

    /// Short upper-case name, as FreeImage spells it.
    pub fn name(self) -> &'static str {
        const NAMES: [&str; 37] = [
            "BMP", "ICO", "JPEG", "JNG", "KOALA", "IFF", "MNG", "PBM", "PBMRAW", "PCD", "PCX", "PGM", "PGMRAW",
            "PNG", "PPM", "PPMRAW", "RAS", "TARGA", "TIFF", "WBMP", "PSD", "CUT", "XBM", "XPM", "DDS", "GIF",
            "HDR", "G3", "SGI", "EXR", "J2K", "JP2", "PFM", "PICT", "RAW", "WEBP", "JXR",
        ];
        usize::try_from(self.0)
            .ok()
            .and_then(|index| NAMES.get(index).copied())
            .unwrap_or("UNKNOWN")
    }
}

impl Default for ImageFormat {
    fn default() -> Self {
        Self::UNKNOWN
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Load and save flags, per plugin.
pub mod flags {
    pub const DEFAULT: i32 = 0;

    pub const BMP_SAVE_RLE: i32 = 1;

    pub const GIF_LOAD256: i32 = 1;
    pub const GIF_PLAYBACK: i32 = 2;

    pub const ICO_MAKEALPHA: i32 = 1;

    pub const JPEG_FAST: i32 = 0x0001;
    pub const JPEG_ACCURATE: i32 = 0x0002;
    pub const JPEG_CMYK: i32 = 0x1000;
    pub const JPEG_QUALITYSUPERB: i32 = 0x80;
    pub const JPEG_QUALITYGOOD: i32 = 0x0100;
    pub const JPEG_QUALITYNORMAL: i32 = 0x0200;
    pub const JPEG_QUALITYAVERAGE: i32 = 0x0400;
    pub const JPEG_QUALITYBAD: i32 = 0x0800;
    pub const JPEG_PROGRESSIVE: i32 = 0x2000;

    pub const PNG_IGNOREGAMMA: i32 = 1;

    pub const PNM_SAVE_RAW: i32 = 0;
    pub const PNM_SAVE_ASCII: i32 = 1;

    pub const TIFF_CMYK: i32 = 0x0001;
    pub const TIFF_PACKBITS: i32 = 0x0100;
    pub const TIFF_DEFLATE: i32 = 0x0200;
    pub const TIFF_ADOBE_DEFLATE: i32 = 0x0400;
    pub const TIFF_NONE: i32 = 0x0800;
    pub const TIFF_CCITTFAX3: i32 = 0x1000;
    pub const TIFF_CCITTFAX4: i32 = 0x2000;
    pub const TIFF_LZW: i32 = 0x4000;
    pub const TIFF_JPEG: i32 = 0x8000;
}

/// One row of the save-format table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveFormat {
    pub tag: &'static str,
    pub format: ImageFormat,
    pub flags: i32,
    /// Extension without the leading dot.
    pub extension: &'static str,
}

const fn row(tag: &'static str, format: ImageFormat, flags: i32, extension: &'static str) -> SaveFormat {
    SaveFormat {
        tag,
        format,
        flags,
        extension,
    }
}

pub const SAVE_FORMATS: &[SaveFormat] = &[
    row("tiff", ImageFormat::TIFF, flags::DEFAULT, "tif"),
    row("tiffg3", ImageFormat::TIFF, flags::TIFF_CCITTFAX3, "tif"),
    row("tiffg4", ImageFormat::TIFF, flags::TIFF_CCITTFAX4, "tif"),
    row("tiffno", ImageFormat::TIFF, flags::TIFF_NONE, "tif"),
    row("jpeg", ImageFormat::JPEG, flags::DEFAULT, "jpg"),
    row("jpegfa", ImageFormat::JPEG, flags::JPEG_FAST, "jpg"),
    row("jpegac", ImageFormat::JPEG, flags::JPEG_ACCURATE, "jpg"),
    row("jpegsu", ImageFormat::JPEG, flags::JPEG_QUALITYSUPERB, "jpg"),
    row("jpeggo", ImageFormat::JPEG, flags::JPEG_QUALITYGOOD, "jpg"),
    row("jpegav", ImageFormat::JPEG, flags::JPEG_QUALITYAVERAGE, "jpg"),
    row("jpegba", ImageFormat::JPEG, flags::JPEG_QUALITYBAD, "jpg"),
    row("png", ImageFormat::PNG, flags::DEFAULT, "png"),
    row("bmp", ImageFormat::BMP, flags::DEFAULT, "bmp"),
    row("ico", ImageFormat::ICO, flags::DEFAULT, "ico"),
    row("gif", ImageFormat::GIF, flags::DEFAULT, "gif"),
    row("pbm", ImageFormat::PBM, flags::DEFAULT, "pbm"),
    row("pnm", ImageFormat::PPM, flags::DEFAULT, "pnm"),
    row("ppm", ImageFormat::PPM, flags::DEFAULT, "ppm"),
];

/// Table row for a tag, after `tif`/`jpg` normalisation.
pub fn save_format(tag: &str) -> Option<&'static SaveFormat> {
    let tag = normalize_tag(tag);
    SAVE_FORMATS.iter().find(|format| format.tag == tag)
}

/// First table row saving as `format`.
pub fn save_format_for(format: ImageFormat) -> Option<&'static SaveFormat> {
    SAVE_FORMATS.iter().find(|row| row.format == format)
}

/// `tif*` → `tiff*`, `jpg*` → `jpeg*`, lower-cased.
pub fn normalize_tag(tag: &str) -> String {
    let tag = tag.trim_start_matches('.').to_ascii_lowercase();
    if tag.starts_with("tif") && !tag.starts_with("tiff") {
        format!("tiff{}", &tag[3..])
    } else if let Some(rest) = tag.strip_prefix("jpg") {
        format!("jpeg{rest}")
    } else {
        tag
    }
}

/// How [`save_parameters`] picks a format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveTarget<'a> {
    /// From the file's extension.
    Extension,
    /// From a table tag; the table's extension is appended when missing.
    Tag(&'a str),
    /// From a format code, using the first table row for it. The path is
    /// left as given.
    Format(ImageFormat),
}

/// Resolved arguments for a save call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveParameters {
    pub format: ImageFormat,
    pub flags: i32,
    pub extension: &'static str,
    pub path: PathBuf,
}

/// Work out format, flags and final path for saving to `path`.
pub fn save_parameters(path: &Path, target: SaveTarget<'_>) -> Result<SaveParameters> {
    match target {
        SaveTarget::Extension => {
            let extension = path
                .extension()
                .and_then(|ext| ext.to_str())
                .ok_or_else(|| Error::UnknownFormat(format!("no extension on {}", path.display())))?;
            let row = save_format(extension).ok_or_else(|| Error::UnknownFormat(extension.to_owned()))?;
            Ok(row.parameters(path.with_extension(row.extension)))
        }
        SaveTarget::Tag(tag) => {
            let row = save_format(tag).ok_or_else(|| Error::UnknownFormat(tag.to_owned()))?;
            let has_extension = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(row.extension));
            let path = if has_extension {
                path.to_path_buf()
            } else {
                let mut name = OsString::from(path.as_os_str());
                name.push(".");
                name.push(row.extension);
                PathBuf::from(name)
            };
            Ok(row.parameters(path))
        }
        SaveTarget::Format(format) => {
            let row = save_format_for(format).ok_or_else(|| Error::UnknownFormat(format.to_string()))?;
            Ok(row.parameters(path.to_path_buf()))
        }
    }
}

impl SaveFormat {
    fn parameters(&self, path: PathBuf) -> SaveParameters {
        SaveParameters {
            format: self.format,
            flags: self.flags,
            extension: self.extension,
            path,
        }
    }
}
