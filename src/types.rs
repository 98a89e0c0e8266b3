//! Enumerations shared across the crate.
//!
//! Each mirrors a `FREE_IMAGE_*` enum from the library header and converts
//! to and from its raw C value with `code()` / `from_code()`.

use libc::c_int;
use serde::{Deserialize, Serialize};

macro_rules! c_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $value:literal, )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $value, )*
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),*];

            pub const fn code(self) -> c_int {
                self as c_int
            }

            pub fn from_code(code: c_int) -> Option<Self> {
                match code {
                    $( $value => Some($name::$variant), )*
                    _ => None,
                }
            }
        }
    };
}

c_enum! {
    /// `FREE_IMAGE_COLOR_TYPE`
    pub enum ColorType {
        MinIsWhite = 0,
        MinIsBlack = 1,
        Rgb = 2,
        Palette = 3,
        RgbAlpha = 4,
        Cmyk = 5,
    }
}

c_enum! {
    /// `FREE_IMAGE_TYPE`: pixel storage type.
    pub enum ImageType {
        Unknown = 0,
        Bitmap = 1,
        Uint16 = 2,
        Int16 = 3,
        Uint32 = 4,
        Int32 = 5,
        Float = 6,
        Double = 7,
        Complex = 8,
        Rgb16 = 9,
        Rgba16 = 10,
        Rgbf = 11,
        Rgbaf = 12,
    }
}

c_enum! {
    /// `FREE_IMAGE_FILTER`: resampling kernel for rescaling.
    #[derive(Default, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum Filter {
        Box = 0,
        Bicubic = 1,
        Bilinear = 2,
        #[default]
        BSpline = 3,
        CatmullRom = 4,
        Lanczos3 = 5,
    }
}

c_enum! {
    /// `FREE_IMAGE_COLOR_CHANNEL`
    pub enum ColorChannel {
        Rgb = 0,
        Red = 1,
        Green = 2,
        Blue = 3,
        Alpha = 4,
        Black = 5,
        Real = 6,
        Imag = 7,
        Mag = 8,
        Phase = 9,
    }
}

c_enum! {
    /// `FREE_IMAGE_DITHER`
    #[derive(Default)]
    pub enum Dither {
        #[default]
        FloydSteinberg = 0,
        Bayer4x4 = 1,
        Bayer8x8 = 2,
        Cluster6x6 = 3,
        Cluster8x8 = 4,
        Cluster16x16 = 5,
    }
}

c_enum! {
    /// `FREE_IMAGE_QUANTIZE`
    #[derive(Default)]
    pub enum Quantize {
        #[default]
        WuQuant = 0,
        NnQuant = 1,
    }
}

c_enum! {
    /// `FREE_IMAGE_MDMODEL`: metadata groups, in the order they are read.
    pub enum MetadataModel {
        Comments = 0,
        ExifMain = 1,
        ExifExif = 2,
        ExifGps = 3,
        ExifMakerNote = 4,
        ExifInterop = 5,
        Iptc = 6,
        Xmp = 7,
        GeoTiff = 8,
        Animation = 9,
        Custom = 10,
    }
}

c_enum! {
    /// `FREE_IMAGE_MDTYPE`: storage type of a metadata tag value.
    pub enum TagType {
        NoType = 0,
        Byte = 1,
        Ascii = 2,
        Short = 3,
        Long = 4,
        Rational = 5,
        SByte = 6,
        Undefined = 7,
        SShort = 8,
        SLong = 9,
        SRational = 10,
        Float = 11,
        Double = 12,
        Ifd = 13,
        Palette = 14,
    }
}

impl MetadataModel {
    /// Header spelling, e.g. `FIMD_EXIF_GPS`.
    pub fn name(self) -> &'static str {
        match self {
            MetadataModel::Comments => "FIMD_COMMENTS",
            MetadataModel::ExifMain => "FIMD_EXIF_MAIN",
            MetadataModel::ExifExif => "FIMD_EXIF_EXIF",
            MetadataModel::ExifGps => "FIMD_EXIF_GPS",
            MetadataModel::ExifMakerNote => "FIMD_EXIF_MAKERNOTE",
            MetadataModel::ExifInterop => "FIMD_EXIF_INTEROP",
            MetadataModel::Iptc => "FIMD_IPTC",
            MetadataModel::Xmp => "FIMD_XMP",
            MetadataModel::GeoTiff => "FIMD_GEOTIFF",
            MetadataModel::Animation => "FIMD_ANIMATION",
            MetadataModel::Custom => "FIMD_CUSTOM",
        }
    }
}

/// Dots per meter in one inch.
pub const DOTS_PER_METER_PER_DPI: f64 = 39.37;

/// Horizontal and vertical resolution in dots per inch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Dpi {
    pub x: u32,
    pub y: u32,
}

impl Dpi {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    pub fn from_dots_per_meter(x: u32, y: u32) -> Self {
        let to_dpi = |dpm: u32| (f64::from(dpm) / DOTS_PER_METER_PER_DPI).round() as u32;
        Self {
            x: to_dpi(x),
            y: to_dpi(y),
        }
    }

    /// `(x, y)` in dots per meter.
    pub fn to_dots_per_meter(self) -> (u32, u32) {
        let to_dpm = |dpi: u32| (f64::from(dpi) * DOTS_PER_METER_PER_DPI).round() as u32;
        (to_dpm(self.x), to_dpm(self.y))
    }
}

/// Width and height in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl From<(u32, u32)> for Size {
    fn from((width, height): (u32, u32)) -> Self {
        Self { width, height }
    }
}

/// Pixel value: a palette index for 1/4/8-bit bitmaps, a color otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pixel {
    Index(u8),
    Color(Rgba),
}

/// Color with 8 bits per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgba {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub alpha: u8,
}

impl Rgba {
    pub const fn new(red: u8, green: u8, blue: u8, alpha: u8) -> Self {
        Self {
            red,
            green,
            blue,
            alpha,
        }
    }
}

impl From<crate::ffi::RGBQUAD> for Rgba {
    fn from(quad: crate::ffi::RGBQUAD) -> Self {
        Self::new(quad.rgbRed, quad.rgbGreen, quad.rgbBlue, quad.rgbReserved)
    }
}

impl From<Rgba> for crate::ffi::RGBQUAD {
    fn from(color: Rgba) -> Self {
        Self {
            rgbBlue: color.blue,
            rgbGreen: color.green,
            rgbRed: color.red,
            rgbReserved: color.alpha,
        }
    }
}
