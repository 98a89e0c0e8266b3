//! Batch helpers: splitting and combining multi-page files, fax pages,
//! one-shot format conversion.
//!
//! These work on plain [`Bitmap`]s and containers rather than on an
//! [`Image`](crate::Image), so they can be run over many files without
//! holding a session open.

use crate::bitmap::{Bitmap, BitmapOps};
use crate::error::{Error, Result};
use crate::format::{self, ImageFormat, SaveTarget, flags};
use crate::library::Library;
use crate::multipage::MultiBitmap;
use crate::types::{Dpi, Filter, Size};
use log::{debug, info};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// A4 at fax resolution, in pixels.
pub const FAX_SIZE: Size = Size {
    width: 1728,
    height: 2210,
};

/// Fine fax resolution.
pub const FAX_DPI: Dpi = Dpi { x: 204, y: 196 };

/// How [`combine_pages`] conforms pages to each other.
///
/// Reference indices count pages across all inputs, after multi-page inputs
/// have been split.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CombineOptions {
    /// Resize every page to the size of page `size_from`.
    pub same_size: bool,
    pub size_from: usize,
    /// Convert every page to the depth of page `depth_from`.
    pub same_depth: bool,
    pub depth_from: usize,
    /// Override the save flags the output extension implies.
    pub flags: Option<i32>,
    /// Turn every page into an A4 fax page and write a CCITT G4 TIFF. The
    /// size and depth options are ignored.
    pub fax: bool,
}

/// `dir/page.png`, 2 → `dir/page2.png`.
pub(crate) fn numbered_path(path: &Path, number: usize) -> PathBuf {
    let mut name = path.file_stem().map(OsString::from).unwrap_or_default();
    name.push(number.to_string());
    if let Some(extension) = path.extension() {
        name.push(".");
        name.push(extension);
    }
    path.with_file_name(name)
}

/// Write each page of the multi-page file `input` to its own file.
///
/// `output` and `target` resolve through [`format::save_parameters`]; page
/// `n` goes to `{stem}{n}.{ext}`. Returns the files in page order.
pub fn split_pages(library: &Library, input: &Path, output: &Path, target: SaveTarget<'_>) -> Result<Vec<PathBuf>> {
    let format = library.deduce_format(input)?;
    if !format.is_known() {
        return Err(Error::UnknownFormat(input.display().to_string()));
    }
    if !format.is_multipage() {
        return Err(Error::NotMultipage);
    }
    let parameters = format::save_parameters(output, target)?;
    let container = MultiBitmap::open(library, format, input, true)?;
    let mut written = Vec::new();
    for number in 0..container.page_count()? {
        let path = numbered_path(&parameters.path, number);
        container
            .lock_page(number)?
            .save(parameters.format, &path, parameters.flags)?;
        written.push(path);
    }
    container.close()?;
    info!("split {} into {} pages", input.display(), written.len());
    Ok(written)
}

/// Every page of `path` as an owned bitmap; a single image gives one.
fn load_pages(library: &Library, path: &Path) -> Result<Vec<Bitmap>> {
    let format = library.deduce_format(path)?;
    if !format.is_multipage() {
        return Ok(vec![library.load_any(path, 0)?]);
    }
    let container = MultiBitmap::open(library, format, path, true)?;
    let pages = (0..container.page_count()?)
        .map(|number| container.lock_page(number)?.try_clone())
        .collect::<Result<Vec<_>>>()?;
    container.close()?;
    debug!("read {} pages from {}", pages.len(), path.display());
    Ok(pages)
}

/// Write the pages of all `inputs`, in order, into the multi-page file
/// `output`. The format and flags follow `output`'s extension unless
/// `options.fax` is set. Returns the number of pages written.
pub fn combine_pages<P: AsRef<Path>>(
    library: &Library,
    inputs: &[P],
    output: &Path,
    options: &CombineOptions,
) -> Result<usize> {
    let (format, default_flags) = if options.fax {
        (ImageFormat::TIFF, flags::TIFF_CCITTFAX4)
    } else {
        let parameters = format::save_parameters(output, SaveTarget::Extension)?;
        (parameters.format, parameters.flags)
    };
    let save_flags = options.flags.unwrap_or(default_flags);

    let mut pages = Vec::new();
    for input in inputs {
        pages.extend(load_pages(library, input.as_ref())?);
    }
    let count = pages.len();
    let reference = |page: usize| pages.get(page).ok_or(Error::PageOutOfRange { page, count });
    let size = if options.same_size && !options.fax {
        Some(reference(options.size_from)?.size()?)
    } else {
        None
    };
    let bpp = if options.same_depth && !options.fax {
        Some(reference(options.depth_from)?.bpp()?)
    } else {
        None
    };

    let container = MultiBitmap::create(library, format, output, save_flags)?;
    for (number, page) in pages.into_iter().enumerate() {
        let page = if options.fax {
            to_a4_fax(&page)?
        } else {
            let page = match size {
                Some(size) if number != options.size_from => page.rescale(size, Filter::default())?,
                _ => page,
            };
            match bpp {
                Some(bpp) if number != options.depth_from => page.with_bpp(bpp)?,
                _ => page,
            }
        };
        container.append_page(&page)?;
    }
    container.close()?;
    info!("combined {count} pages into {}", output.display());
    Ok(count)
}

/// A copy of `page` ready for a G4 fax: A4 at 204x196 DPI, 1 bit per pixel,
/// min-is-white.
///
/// Portrait pages that already carry the fax resolution keep their size.
pub fn to_a4_fax<B: BitmapOps + ?Sized>(page: &B) -> Result<Bitmap> {
    let fax_ready = page.dpi()? == FAX_DPI && page.height()? > page.width()?;
    let sized = if fax_ready {
        page.try_clone()?
    } else {
        page.with_bpp(8)?.rescale(FAX_SIZE, Filter::Bilinear)?
    };
    let fax = sized.convert_to_standard_type(true)?.with_bpp(1)?;
    fax.convert_to_min_is_white(true)?;
    fax.set_dpi(FAX_DPI)?;
    Ok(fax)
}

/// Load any readable file and save it in the format `tag` names.
///
/// When `output` is a directory the file keeps `input`'s stem there. The
/// tag's extension is appended when missing. CCITT TIFF tags convert the
/// image to 1 bit first. Returns the path written.
pub fn load_and_save(library: &Library, input: &Path, output: &Path, tag: &str) -> Result<PathBuf> {
    let target = if output.is_dir() {
        let stem = input
            .file_stem()
            .ok_or_else(|| Error::InvalidArgument(format!("{} has no file name", input.display())))?;
        output.join(stem)
    } else {
        output.to_path_buf()
    };
    let parameters = format::save_parameters(&target, SaveTarget::Tag(tag))?;
    let bitmap = library.load_any(input, 0)?;
    let ccitt = parameters.format == ImageFormat::TIFF
        && parameters.flags & (flags::TIFF_CCITTFAX3 | flags::TIFF_CCITTFAX4) != 0;
    let bitmap = if ccitt { bitmap.with_bpp(1)? } else { bitmap };
    bitmap.save(parameters.format, &parameters.path, parameters.flags)?;
    info!("converted {} to {}", input.display(), parameters.path.display());
    Ok(parameters.path)
}
