//! Stateful image façade.
//!
//! [`Image`] holds one image session: either an owned [`Bitmap`] or a
//! multi-page container with its current page locked. Every operation
//! forwards to [`BitmapOps`] on whichever of the two is current, so a page
//! of a TIFF behaves like a single image.
//!
//! ```text
//! Image ─┬─ library   (Library, shared)
//!        ├─ session ──┬─ Single(Bitmap)
//!        │            └─ Multi(Pages) ── LockedPage + MultiBitmap
//!        └─ settings  (ImageSettings)
//! ```
//!
//! ## Session lifecycle
//!
//! | Call | Session | Library |
//! |---|---|---|
//! | [`Image::close`] | released | kept, [`Image::load`] works again |
//! | [`Image::exit`] | released | released |
//! | depth violation | released | released |
//!
//! Once the session is gone every operation fails with
//! [`Error::SessionClosed`].
//!
//! ## Replacing pixels
//!
//! Operations that produce a new bitmap (`resize`, `set_bpp`, `thumbnail`,
//! `rotate_in_place`, ...) swap it in. On a multi-page image that means
//! deleting the current page, inserting the new one in its place and
//! flushing the container, see [`pages`].

mod pages;

use crate::bitmap::{Bitmap, BitmapOps};
use crate::config::{ImageSettings, Settings};
use crate::convert;
use crate::error::{Error, Result};
use crate::format::{self, ImageFormat, SaveTarget};
use crate::library::Library;
use crate::metadata::{self, Metadata};
use crate::multipage::MultiBitmap;
use crate::stream::Source;
use crate::types::{ColorChannel, ColorType, Dpi, Filter, MetadataModel, Pixel, Size};
use image::DynamicImage;
use log::{debug, info, warn};
use pages::Pages;
use std::collections::BTreeMap;
use std::fmt;
use std::io::Cursor;
use std::path::{Path, PathBuf};

/// A position, counted from the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

impl Point {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// `[left, right) x [top, bottom)`, rows counted from the top.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl Rect {
    pub fn new(left: u32, top: u32, right: u32, bottom: u32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn size(&self) -> Size {
        Size::new(self.right.saturating_sub(self.left), self.bottom.saturating_sub(self.top))
    }
}

/// Where [`Image::paste`] puts the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasteBox {
    /// Top-left corner, source at its own size.
    At(Point),
    /// Fill the rectangle, resizing a copy of the source when needed.
    Into(Rect),
}

/// What [`Image::format`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    pub format: ImageFormat,
    pub color_type: ColorType,
    pub dpi: Dpi,
}

/// 256-bin histograms per channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Histogram {
    pub black: [u32; 256],
    pub red: [u32; 256],
    pub green: [u32; 256],
    pub blue: [u32; 256],
}

enum Content {
    Single(Bitmap),
    Multi(Pages),
}

struct Session {
    content: Content,
    filename: Option<PathBuf>,
    format: ImageFormat,
}

/// One image, or one page of a multi-page file, and the library it came from.
pub struct Image {
    library: Option<Library>,
    session: Option<Session>,
    settings: ImageSettings,
}

impl Image {
    // -- Construction -----------------------------------------------------

    /// Open `path` with the default library and settings.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let library = Library::open_default()?;
        Self::open_with(&library, ImageSettings::default(), path)
    }

    /// Open `path` with the library and image defaults named in `settings`.
    pub fn from_settings(settings: &Settings, path: impl AsRef<Path>) -> Result<Self> {
        let library = Library::from_settings(&settings.library)?;
        Self::open_with(&library, settings.image.clone(), path)
    }

    pub fn open_with(library: &Library, settings: ImageSettings, path: impl AsRef<Path>) -> Result<Self> {
        let mut image = Self::empty(library, settings);
        image.load(path.as_ref())?;
        Ok(image)
    }

    /// Wrap a bitmap. The image has no file name and an unknown format.
    pub fn from_bitmap(bitmap: Bitmap) -> Self {
        let library = bitmap.library().clone();
        Self::single(library, ImageSettings::default(), bitmap, ImageFormat::UNKNOWN)
    }

    /// New image of `size` at `bpp` bits per pixel, black or white.
    pub fn blank(library: &Library, size: Size, bpp: u32, white: bool) -> Result<Self> {
        let bitmap = blank_bitmap(library, size, bpp, white)?;
        Ok(Self::single(library.clone(), ImageSettings::default(), bitmap, ImageFormat::UNKNOWN))
    }

    /// Create the multi-page file `path` holding one blank page and open it.
    pub fn blank_multipage(
        library: &Library,
        path: impl AsRef<Path>,
        format: ImageFormat,
        size: Size,
        bpp: u32,
        white: bool,
    ) -> Result<Self> {
        let path = path.as_ref();
        let bitmap = blank_bitmap(library, size, bpp, white)?;
        let container = MultiBitmap::create(library, format, path, 0)?;
        container.append_page(&bitmap)?;
        container.close()?;
        let pages = Pages::open(library, format, path, 0)?;
        info!("created {format} multi-page {}", path.display());
        Ok(Self {
            library: Some(library.clone()),
            session: Some(Session {
                content: Content::Multi(pages),
                filename: Some(path.to_path_buf()),
                format,
            }),
            settings: ImageSettings::default(),
        })
    }

    /// Decode an in-memory file. `None` detects the format.
    pub fn from_buffer(library: &Library, bytes: &[u8], format: Option<ImageFormat>) -> Result<Self> {
        let format = match format {
            Some(format) => format,
            None => library.file_type_from_stream(&mut Source(Cursor::new(bytes)))?,
        };
        let bitmap = library.load_from_memory(bytes, Some(format))?;
        Ok(Self::single(library.clone(), ImageSettings::default(), bitmap, format))
    }

    pub fn with_settings(mut self, settings: ImageSettings) -> Self {
        self.settings = settings;
        self
    }

    fn empty(library: &Library, settings: ImageSettings) -> Self {
        Self {
            library: Some(library.clone()),
            session: None,
            settings,
        }
    }

    fn single(library: Library, settings: ImageSettings, bitmap: Bitmap, format: ImageFormat) -> Self {
        Self {
            library: Some(library),
            session: Some(Session {
                content: Content::Single(bitmap),
                filename: None,
                format,
            }),
            settings,
        }
    }

    /// New image around `bitmap`, sharing this one's settings and format.
    fn derive(&self, bitmap: Bitmap) -> Image {
        let format = self.session.as_ref().map_or(ImageFormat::UNKNOWN, |session| session.format);
        Self::single(bitmap.library().clone(), self.settings.clone(), bitmap, format)
    }

    // -- Session ----------------------------------------------------------

    /// Load `path` into this image, replacing the current session.
    ///
    /// The format comes from the file's signature, then from its name.
    /// Multi-page formats open as a page container with page 0 current,
    /// unless `try_multipage` is off.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let library = self.library()?.clone();
        let format = library.deduce_format(path)?;
        if !format.is_known() {
            return Err(Error::UnknownFormat(path.display().to_string()));
        }
        let content = if format.is_multipage() && self.settings.try_multipage {
            Content::Multi(Pages::open(&library, format, path, 0)?)
        } else {
            if !library.supports_reading(format)? {
                return Err(Error::UnknownFormat(format!("{format} cannot be read")));
            }
            Content::Single(library.load(format, path, 0)?)
        };
        self.session = Some(Session {
            content,
            filename: Some(path.to_path_buf()),
            format,
        });
        debug!("opened {} as {format}", path.display());
        Ok(())
    }

    /// Release the image. The library stays, so [`Image::load`] still works.
    pub fn close(&mut self) {
        self.session = None;
    }

    /// Release the image and the library reference.
    pub fn exit(&mut self) {
        self.session = None;
        self.library = None;
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    pub fn library(&self) -> Result<&Library> {
        self.library.as_ref().ok_or(Error::SessionClosed)
    }

    pub fn settings(&self) -> &ImageSettings {
        &self.settings
    }

    fn session(&self) -> Result<&Session> {
        self.session.as_ref().ok_or(Error::SessionClosed)
    }

    /// The current bitmap: the image itself or the current page.
    pub fn bitmap(&self) -> Result<&dyn BitmapOps> {
        let bitmap: &dyn BitmapOps = match &self.session()?.content {
            Content::Single(bitmap) => bitmap,
            Content::Multi(pages) => pages.page(),
        };
        Ok(bitmap)
    }

    /// Run `op` on the current bitmap. A depth violation ends the session
    /// and releases the library.
    fn with_bitmap<T>(&mut self, op: impl FnOnce(&dyn BitmapOps) -> Result<T>) -> Result<T> {
        let outcome = op(self.bitmap()?);
        match outcome {
            Err(err) if err.is_wrong_depth() => {
                warn!("{err}; closing the image");
                self.exit();
                Err(err)
            }
            outcome => outcome,
        }
    }

    /// Swap in a new bitmap for the current image or page.
    fn replace_current(&mut self, bitmap: Bitmap) -> Result<()> {
        if let Content::Single(current) = &mut self.session.as_mut().ok_or(Error::SessionClosed)?.content {
            *current = bitmap;
            return Ok(());
        }
        self.edit_pages(move |container, current| {
            container.delete_page(current)?;
            container.insert_page(current, &bitmap)?;
            Ok(current)
        })
    }

    // -- Saving -----------------------------------------------------------

    /// Save the current image or page and return the path written.
    ///
    /// `tag` picks a row of [`format::SAVE_FORMATS`] and appends its
    /// extension when the path lacks it. Without a tag the path's extension
    /// decides, and a path with no extension gets `default_save_format`.
    /// `flags` overrides the row's flags.
    pub fn save(&mut self, path: impl AsRef<Path>, tag: Option<&str>, flags: Option<i32>) -> Result<PathBuf> {
        let path = path.as_ref();
        let default_tag = self.settings.default_save_format.clone();
        let target = match tag {
            Some(tag) => SaveTarget::Tag(tag),
            None if path.extension().is_some() => SaveTarget::Extension,
            None => SaveTarget::Tag(&default_tag),
        };
        let parameters = format::save_parameters(path, target)?;
        let flags = flags.unwrap_or(parameters.flags);
        self.with_bitmap(|bitmap| bitmap.save(parameters.format, &parameters.path, flags))?;
        info!("saved {} as {}", parameters.path.display(), parameters.format);
        Ok(parameters.path)
    }

    // -- Size -------------------------------------------------------------

    pub fn size(&self) -> Result<Size> {
        self.bitmap()?.size()
    }

    pub fn width(&self) -> Result<u32> {
        self.bitmap()?.width()
    }

    pub fn height(&self) -> Result<u32> {
        self.bitmap()?.height()
    }

    /// Resize with the configured filter.
    pub fn set_size(&mut self, size: Size) -> Result<()> {
        self.resize(size, None)
    }

    /// Resize in place. With `automatic_color_change`, depths other than
    /// 8, 24 and 32 go through 24 bits and come back.
    pub fn resize(&mut self, size: Size, filter: Option<Filter>) -> Result<()> {
        let resized = self.rescaled(size, filter)?;
        self.replace_current(resized)
    }

    /// Resized copy as a new image.
    pub fn resized(&mut self, size: Size, filter: Option<Filter>) -> Result<Image> {
        let resized = self.rescaled(size, filter)?;
        Ok(self.derive(resized))
    }

    fn rescaled(&mut self, size: Size, filter: Option<Filter>) -> Result<Bitmap> {
        if size.width == 0 || size.height == 0 {
            return Err(Error::InvalidArgument(format!(
                "cannot resize to {}x{}",
                size.width, size.height
            )));
        }
        let filter = filter.unwrap_or(self.settings.resize_filter);
        let automatic = self.settings.automatic_color_change;
        self.with_bitmap(|bitmap| {
            let bpp = bitmap.bpp()?;
            if automatic && !matches!(bpp, 8 | 24 | 32) {
                debug!("resizing {bpp} bpp through 24 bpp");
                bitmap.with_bpp(24)?.rescale(size, filter)?.with_bpp(bpp)
            } else {
                bitmap.rescale(size, filter)
            }
        })
    }

    /// Shrink the current image or page to a thumbnail whose longer side is
    /// `max_pixel_size`. Use [`resized`](Self::resized) to keep the original.
    pub fn thumbnail(&mut self, max_pixel_size: u32, convert: bool) -> Result<()> {
        let thumbnail = self.with_bitmap(|bitmap| bitmap.thumbnail(max_pixel_size, convert))?;
        self.replace_current(thumbnail)
    }

    // -- Depth ------------------------------------------------------------

    pub fn bpp(&self) -> Result<u32> {
        self.bitmap()?.bpp()
    }

    /// Convert to 1, 4, 8, 16 (5-5-5), 24 or 32 bits, keeping the DPI.
    pub fn set_bpp(&mut self, bpp: u32) -> Result<()> {
        let converted = self.with_bitmap(|bitmap| bitmap.with_bpp(bpp))?;
        self.replace_current(converted)
    }

    pub fn colors_used(&mut self) -> Result<u32> {
        self.with_bitmap(|bitmap| bitmap.colors_used())
    }

    /// See [`BitmapOps::convert_to_min_is_white`].
    pub fn convert_to_min_is_white(&mut self, invert: bool) -> Result<bool> {
        self.with_bitmap(|bitmap| bitmap.convert_to_min_is_white(invert))
    }

    // -- Info -------------------------------------------------------------

    pub fn format(&mut self) -> Result<ImageInfo> {
        let format = self.session()?.format;
        self.with_bitmap(|bitmap| {
            Ok(ImageInfo {
                format,
                color_type: bitmap.color_type()?,
                dpi: bitmap.dpi()?,
            })
        })
    }

    pub fn dpi(&self) -> Result<Dpi> {
        self.bitmap()?.dpi()
    }

    pub fn set_dpi(&mut self, dpi: Dpi) -> Result<()> {
        self.with_bitmap(|bitmap| bitmap.set_dpi(dpi))
    }

    /// File the image was loaded from, if any.
    pub fn filename(&self) -> Option<&Path> {
        self.session.as_ref().and_then(|session| session.filename.as_deref())
    }

    // -- Pixels -----------------------------------------------------------

    /// Palette index for 1/4/8-bit images, color otherwise. `y` counts
    /// from the bottom row.
    pub fn pixel(&mut self, x: u32, y: u32) -> Result<Pixel> {
        self.with_bitmap(|bitmap| bitmap.pixel(x, y))
    }

    /// All pixel bytes, `pitch` bytes per row.
    pub fn buffer(&mut self, topdown: bool) -> Result<Vec<u8>> {
        self.with_bitmap(|bitmap| bitmap.raw_bits(topdown))
    }

    // -- Copy / paste -----------------------------------------------------

    /// Independent copy of the current image or page.
    pub fn try_clone(&self) -> Result<Image> {
        let bitmap = self.bitmap()?.try_clone()?;
        Ok(self.derive(bitmap))
    }

    pub fn copy(&mut self, rect: Rect) -> Result<Image> {
        let piece = self.with_bitmap(|bitmap| bitmap.copy(rect.left, rect.top, rect.right, rect.bottom))?;
        Ok(self.derive(piece))
    }

    /// Paste `source` into this image. `alpha` 0..=255 blends, above 255
    /// copies.
    pub fn paste(&mut self, source: &Image, at: PasteBox, alpha: u32) -> Result<()> {
        let filter = self.settings.resize_filter;
        let original = source.bitmap()?;
        let (corner, resized) = match at {
            PasteBox::At(point) => (point, None),
            PasteBox::Into(rect) if original.size()? == rect.size() => (Point::new(rect.left, rect.top), None),
            PasteBox::Into(rect) => (Point::new(rect.left, rect.top), Some(original.rescale(rect.size(), filter)?)),
        };
        let patch: &dyn BitmapOps = match &resized {
            Some(bitmap) => bitmap,
            None => original,
        };
        self.with_bitmap(|bitmap| bitmap.paste(patch, corner.x, corner.y, alpha))
    }

    // -- Color ------------------------------------------------------------

    pub fn invert(&mut self) -> Result<()> {
        self.with_bitmap(|bitmap| bitmap.invert())
    }

    /// Histograms for 8, 24 and 32-bit images.
    pub fn histogram(&mut self) -> Result<Histogram> {
        self.with_bitmap(|bitmap| {
            Ok(Histogram {
                black: bitmap.histogram(ColorChannel::Black)?,
                red: bitmap.histogram(ColorChannel::Red)?,
                green: bitmap.histogram(ColorChannel::Green)?,
                blue: bitmap.histogram(ColorChannel::Blue)?,
            })
        })
    }

    pub fn adjust_brightness(&mut self, percentage: f64) -> Result<()> {
        self.with_bitmap(|bitmap| bitmap.adjust_brightness(percentage))
    }

    pub fn adjust_contrast(&mut self, percentage: f64) -> Result<()> {
        self.with_bitmap(|bitmap| bitmap.adjust_contrast(percentage))
    }

    pub fn adjust_gamma(&mut self, gamma: f64) -> Result<()> {
        self.with_bitmap(|bitmap| bitmap.adjust_gamma(gamma))
    }

    // -- Rotation ---------------------------------------------------------

    /// Rotated copy, `angle` degrees counter-clockwise.
    ///
    /// FreeImage hands back rotated 1-bit bitmaps with a min-is-black
    /// palette; a min-is-white source gets its palette flipped back.
    pub fn rotate(&mut self, angle: f64) -> Result<Image> {
        let rotated = self.with_bitmap(|bitmap| rotate_keeping_palette(bitmap, angle))?;
        Ok(self.derive(rotated))
    }

    pub fn rotate_in_place(&mut self, angle: f64) -> Result<()> {
        let rotated = self.with_bitmap(|bitmap| rotate_keeping_palette(bitmap, angle))?;
        self.replace_current(rotated)
    }

    pub fn flip_horizontal(&mut self) -> Result<()> {
        self.with_bitmap(|bitmap| bitmap.flip_horizontal())
    }

    pub fn flip_vertical(&mut self) -> Result<()> {
        self.with_bitmap(|bitmap| bitmap.flip_vertical())
    }

    // -- Metadata and interop ---------------------------------------------

    /// Tag count for every model, empty ones included.
    pub fn metadata_count(&self) -> Result<BTreeMap<MetadataModel, u32>> {
        Ok(metadata::counts(self.bitmap()?)?.into_iter().collect())
    }

    pub fn metadata(&self) -> Result<Metadata> {
        metadata::collect(self.bitmap()?)
    }

    pub fn to_dynamic_image(&mut self) -> Result<DynamicImage> {
        self.with_bitmap(|bitmap| convert::to_dynamic_image(bitmap))
    }
}

fn rotate_keeping_palette(bitmap: &dyn BitmapOps, angle: f64) -> Result<Bitmap> {
    let min_is_white = bitmap.color_type()? == ColorType::MinIsWhite;
    let rotated = bitmap.rotate(angle)?;
    if min_is_white && rotated.convert_to_min_is_white(false)? {
        debug!("restored the min-is-white palette after rotating");
    }
    Ok(rotated)
}

fn blank_bitmap(library: &Library, size: Size, bpp: u32, white: bool) -> Result<Bitmap> {
    let bitmap = library.allocate(size.width, size.height, bpp)?;
    if white {
        bitmap.invert()?;
    }
    Ok(bitmap)
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("Image");
        match &self.session {
            Some(session) => {
                out.field("format", &session.format)
                    .field("filename", &session.filename)
                    .field("size", &self.size().ok())
                    .field("multipage", &matches!(session.content, Content::Multi(_)));
            }
            None => {
                out.field("session", &"closed");
            }
        }
        out.finish()
    }
}
