//! # freeimage
//!
//! Safe bindings to the [FreeImage](https://freeimage.sourceforge.io/) image
//! library, loaded at runtime, plus a stateful [`Image`] façade that treats a
//! single picture and one page of a multi-page TIFF the same way.
//!
//! # Architecture: Three Layers
//!
//! ```text
//! 1. Binder    libfreeimage.so  →  Api        (dlopen + one typed fn pointer per entry point)
//! 2. Handles   Api              →  Bitmap     (owned FIBITMAP*, LockedPage, MultiBitmap)
//! 3. Façade    Bitmap / pages   →  Image      (session state, save-format table, paging)
//! ```
//!
//! Each layer only talks to the one below it. Everything above the binder
//! goes through [`ffi::Api`], so the unit tests swap the native library for
//! an in-process fake and never need FreeImage installed.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`ffi`] | C types, constants and the `Api` function table |
//! | [`library`] | Loading, the shared-load registry, the native message bridge |
//! | [`plugins`] | Format detection, plugin queries, deduce-and-load |
//! | [`bitmap`] | Owned bitmaps and the `BitmapOps` trait; depth preconditions |
//! | [`stream`] | Loading from and saving to Rust readers and writers |
//! | [`multipage`] | Multi-page containers and locked pages |
//! | [`metadata`] | Tag enumeration per metadata model |
//! | [`format`] | Format codes, save flags, the save-format table |
//! | [`image`](self::image) | The `Image` façade |
//! | [`tools`] | Split, combine, fax conversion, load-and-save |
//! | [`convert`] | Bridges to the `image` crate |
//! | [`config`] | `freeimage.toml` settings |
//! | [`types`] | Enums and small value types shared by all of the above |
//! | [`error`] | The crate `Error` |
//!
//! # Design Decisions
//!
//! ## Runtime Loading
//!
//! The library is opened with `libloading` rather than linked. Entry points
//! are looked up one by one; a missing one is logged and left empty, and
//! only calling it fails ([`Error::SymbolUnavailable`]). Older FreeImage
//! builds stay usable for everything they do export.
//!
//! ## Depth Preconditions Are Checked Up Front
//!
//! Many FreeImage calls quietly return NULL for bit depths they do not
//! handle. [`bitmap::depth`] lists the accepted depths per operation and the
//! check runs before the native call, giving [`Error::WrongDepth`] with the
//! operation name, the depth found and the depths allowed. The [`Image`]
//! façade treats a depth violation as fatal for its session.
//!
//! ## One Reference-Counted Library
//!
//! [`Library`] is an `Arc` around the loaded object. Bitmaps, containers and
//! images each hold a clone, so the library cannot be unloaded under a live
//! handle, and opening the same path twice returns the same load.
//!
//! ## Stream Faults Are Latched
//!
//! Callbacks handed to FreeImage cannot unwind. Stream errors are stored in
//! the I/O session and the callback reports failure; once the native call
//! returns, the stored error is handed back unchanged.

pub mod bitmap;
pub mod config;
pub mod convert;
pub mod error;
pub mod ffi;
pub mod format;
pub mod image;
pub mod library;
pub mod metadata;
pub mod multipage;
pub mod plugins;
pub mod stream;
pub mod tools;
pub mod types;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use self::bitmap::{Bitmap, BitmapOps};
pub use self::config::{ImageSettings, LibrarySettings, Settings};
pub use self::error::{Error, Result};
pub use self::format::{ImageFormat, SaveTarget};
pub use self::image::{Histogram, Image, ImageInfo, PasteBox, Point, Rect};
pub use self::library::Library;
pub use self::multipage::{LockedPage, MultiBitmap};
pub use self::stream::{ImageStream, Sink, Source};
pub use self::types::{ColorChannel, ColorType, Dpi, Filter, ImageType, MetadataModel, Pixel, Rgba, Size};
