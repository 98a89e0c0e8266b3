//! Page handling for multi-page images.
//!
//! A multi-page [`Image`] keeps its container open writable with exactly one
//! page locked. Moving to another page locks the new one before the old one
//! is released, and the old page is written back only when it was changed.
//!
//! Changing the page list needs no page to be locked, so every edit goes
//! through [`Pages::rewrite`]: release the page, edit, close the container
//! to flush it, reopen and lock the page the edit points at. A failed edit
//! still reopens, at the page that was current before.

use super::{Content, Image, Session};
use crate::bitmap::BitmapOps;
use crate::error::{Error, Result};
use crate::format::{self, ImageFormat, SaveTarget};
use crate::library::Library;
use crate::multipage::{LockedPage, MultiBitmap};
use crate::tools::numbered_path;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};

pub(super) struct Pages {
    page: LockedPage,
    container: MultiBitmap,
    current: usize,
}

impl Pages {
    /// Open `path` writable and lock `page`, or the last page when the file
    /// has fewer.
    pub(super) fn open(library: &Library, format: ImageFormat, path: &Path, page: usize) -> Result<Self> {
        let container = MultiBitmap::open(library, format, path, false)?;
        let count = container.page_count()?;
        if count == 0 {
            return Err(Error::PageOutOfRange { page, count });
        }
        let current = page.min(count - 1);
        let page = container.lock_page(current)?;
        Ok(Self {
            page,
            container,
            current,
        })
    }

    pub(super) fn page(&self) -> &LockedPage {
        &self.page
    }

    fn count(&self) -> Result<usize> {
        self.container.page_count()
    }

    fn select(&mut self, page: usize) -> Result<()> {
        if page == self.current {
            return Ok(());
        }
        self.page = self.container.lock_page(page)?;
        self.current = page;
        debug!("page {page} of {} is current", self.container.path().display());
        Ok(())
    }

    /// Run a page-list edit. `edit` gets the container and the current page
    /// and returns the page to make current.
    ///
    /// The outer error means the container could not be reopened; the inner
    /// one is the edit's own outcome.
    fn rewrite(self, edit: impl FnOnce(&MultiBitmap, usize) -> Result<usize>) -> Result<(Pages, Result<()>)> {
        let Pages {
            page,
            container,
            current,
        } = self;
        drop(page);
        let outcome = edit(&container, current);
        let library = container.library().clone();
        let (format, path) = (container.format(), container.path().to_path_buf());
        container.close()?;
        let target = outcome.as_ref().map_or(current, |&target| target);
        let pages = Pages::open(&library, format, &path, target)?;
        Ok((pages, outcome.map(|_| ())))
    }
}

impl Image {
    /// Run `edit` against the page container, see [`Pages::rewrite`].
    pub(super) fn edit_pages(&mut self, edit: impl FnOnce(&MultiBitmap, usize) -> Result<usize>) -> Result<()> {
        let Session {
            content,
            filename,
            format,
        } = self.session.take().ok_or(Error::SessionClosed)?;
        let pages = match content {
            Content::Multi(pages) => pages,
            single => {
                self.session = Some(Session {
                    content: single,
                    filename,
                    format,
                });
                return Err(Error::NotMultipage);
            }
        };
        let (pages, outcome) = pages
            .rewrite(edit)
            .inspect_err(|err| warn!("{format} container could not be reopened: {err}"))?;
        self.session = Some(Session {
            content: Content::Multi(pages),
            filename,
            format,
        });
        outcome
    }

    pub fn is_multipage(&self) -> bool {
        matches!(
            self.session.as_ref().map(|session| &session.content),
            Some(Content::Multi(_))
        )
    }

    /// Pages in the file; 1 for a single image.
    pub fn page_count(&self) -> Result<usize> {
        match &self.session()?.content {
            Content::Single(_) => Ok(1),
            Content::Multi(pages) => pages.count(),
        }
    }

    /// Zero-based current page; 0 for a single image.
    pub fn current_page(&self) -> Result<usize> {
        match &self.session()?.content {
            Content::Single(_) => Ok(0),
            Content::Multi(pages) => Ok(pages.current),
        }
    }

    pub fn set_current_page(&mut self, page: usize) -> Result<()> {
        match &mut self.session.as_mut().ok_or(Error::SessionClosed)?.content {
            Content::Single(_) if page == 0 => Ok(()),
            Content::Single(_) => Err(Error::PageOutOfRange { page, count: 1 }),
            Content::Multi(pages) => pages.select(page),
        }
    }

    /// Add `page` at the end and make it current.
    pub fn append_page(&mut self, page: &dyn BitmapOps) -> Result<()> {
        self.edit_pages(|container, _| {
            container.append_page(page)?;
            Ok(container.page_count()?.saturating_sub(1))
        })
    }

    /// Load any readable file and append it.
    pub fn append_page_from_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let bitmap = self.library()?.load_any(path.as_ref(), 0)?;
        self.append_page(&bitmap)
    }

    /// Insert `page` before `index` and make it current. Inserting at the
    /// page count appends.
    pub fn insert_page(&mut self, index: usize, page: &dyn BitmapOps) -> Result<()> {
        self.edit_pages(|container, _| {
            container.insert_page(index, page)?;
            Ok(index)
        })
    }

    /// Remove page `index`. The current page stays current when it
    /// survives; otherwise its successor, or the new last page, takes over.
    pub fn delete_page(&mut self, index: usize) -> Result<()> {
        self.edit_pages(|container, current| {
            let count = container.page_count()?;
            if count <= 1 {
                return Err(Error::InvalidArgument("cannot delete the only page".to_owned()));
            }
            container.delete_page(index)?;
            Ok(if index < current {
                current - 1
            } else {
                current.min(count - 2)
            })
        })
    }

    /// Save every page to its own file, named `{stem}{page}.{ext}` after the
    /// path `target` resolves to. Returns the files written, in page order.
    pub fn convert_to_pages(&self, path: impl AsRef<Path>, target: SaveTarget<'_>) -> Result<Vec<PathBuf>> {
        let Content::Multi(pages) = &self.session()?.content else {
            return Err(Error::NotMultipage);
        };
        let parameters = format::save_parameters(path.as_ref(), target)?;
        let mut written = Vec::new();
        for number in 0..pages.count()? {
            let output = numbered_path(&parameters.path, number);
            if number == pages.current {
                pages.page().save(parameters.format, &output, parameters.flags)?;
            } else {
                pages
                    .container
                    .lock_page(number)?
                    .save(parameters.format, &output, parameters.flags)?;
            }
            written.push(output);
        }
        info!(
            "split {} into {} {} files",
            pages.container.path().display(),
            written.len(),
            parameters.format
        );
        Ok(written)
    }
}
