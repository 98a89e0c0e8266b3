//! Multi-page containers (TIFF, GIF, ICO).
//!
//! [`MultiBitmap`] owns one `FIMULTIBITMAP*`. Pages are accessed by locking
//! them, which yields a [`LockedPage`]: a view onto the page's bitmap that is
//! unlocked (never unloaded) when dropped. A page that was changed in place
//! is written back on unlock.
//!
//! ```text
//! MultiBitmap ──Rc──▶ container ◀──Rc── LockedPage (page 0)
//!                         ▲
//!                         └──────Rc── LockedPage (page 3)
//! ```
//!
//! Every locked page keeps the container alive, so the native container is
//! closed only after the last page has been unlocked. [`MultiBitmap::close`]
//! flushes explicitly and refuses while pages are still locked.
//!
//! FreeImage ignores page insertion, deletion and moves while any page is
//! locked, and on read-only containers. Those cases are reported as errors
//! here instead of silently doing nothing.

use crate::bitmap::{BitmapOps, sealed};
use crate::error::{Error, Result};
use crate::ffi::{FALSE, FIBITMAP, FIMULTIBITMAP, TRUE};
use crate::format::ImageFormat;
use crate::library::{self, Library};
use libc::c_int;
use log::{debug, warn};
use std::cell::Cell;
use std::fmt;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::rc::Rc;

struct Container {
    library: Library,
    raw: NonNull<FIMULTIBITMAP>,
    format: ImageFormat,
    path: PathBuf,
    read_only: bool,
    /// Flags passed to the plugin when the container is written back.
    save_flags: i32,
    locked: Cell<usize>,
    closed: Cell<bool>,
}

impl Container {
    /// Close the native container once. Returns false when the library
    /// reported a failure.
    fn close_native(&self) -> Result<bool> {
        if self.closed.replace(true) {
            return Ok(true);
        }
        let close = self.library.api().close_multi_bitmap()?;
        library::clear_last_message();
        let ok = unsafe { close(self.raw.as_ptr(), self.save_flags) } != FALSE;
        debug!("closed multi-page {}", self.path.display());
        Ok(ok)
    }
}

impl Drop for Container {
    fn drop(&mut self) {
        match self.close_native() {
            Ok(true) => {}
            Ok(false) => warn!("closing {} failed", self.path.display()),
            Err(err) => warn!("leaking multi-page {}: {err}", self.path.display()),
        }
    }
}

/// An open multi-page file.
pub struct MultiBitmap {
    inner: Rc<Container>,
}

fn page_index(page: usize) -> Result<c_int> {
    c_int::try_from(page).map_err(|_| Error::InvalidArgument(format!("page {page} too large")))
}

impl MultiBitmap {
    /// Open an existing multi-page file.
    pub fn open(library: &Library, format: ImageFormat, path: &Path, read_only: bool) -> Result<Self> {
        Self::open_native(library, format, path, false, read_only, 0)
    }

    /// Create a new, empty multi-page file. It is written when the container
    /// closes, using `flags` (e.g. [`TIFF_CCITTFAX4`](crate::format::flags::TIFF_CCITTFAX4)).
    pub fn create(library: &Library, format: ImageFormat, path: &Path, flags: i32) -> Result<Self> {
        Self::open_native(library, format, path, true, false, flags)
    }

    fn open_native(
        library: &Library,
        format: ImageFormat,
        path: &Path,
        create: bool,
        read_only: bool,
        flags: i32,
    ) -> Result<Self> {
        if !format.is_multipage() {
            return Err(Error::UnknownFormat(format!("{format} has no multi-page support")));
        }
        let open = library.api().open_multi_bitmap()?;
        let filename = library::path_cstring(path)?;
        let bool_of = |value: bool| if value { TRUE } else { FALSE };
        library::clear_last_message();
        let raw = unsafe {
            open(
                format.code(),
                filename.as_ptr(),
                bool_of(create),
                bool_of(read_only),
                FALSE,
                flags,
            )
        };
        let raw = NonNull::new(raw).ok_or_else(|| library::native_error("FreeImage_OpenMultiBitmap"))?;
        debug!(
            "{} multi-page {} as {format}",
            if create { "created" } else { "opened" },
            path.display()
        );
        Ok(Self {
            inner: Rc::new(Container {
                library: library.clone(),
                raw,
                format,
                path: path.to_path_buf(),
                read_only,
                save_flags: flags,
                locked: Cell::new(0),
                closed: Cell::new(false),
            }),
        })
    }

    pub fn library(&self) -> &Library {
        &self.inner.library
    }

    pub fn format(&self) -> ImageFormat {
        self.inner.format
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn is_read_only(&self) -> bool {
        self.inner.read_only
    }

    /// Pages currently locked through this container.
    pub fn locked_count(&self) -> usize {
        self.inner.locked.get()
    }

    pub fn page_count(&self) -> Result<usize> {
        let get_page_count = self.library().api().get_page_count()?;
        let count = unsafe { get_page_count(self.inner.raw.as_ptr()) };
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn check_page(&self, page: usize) -> Result<()> {
        let count = self.page_count()?;
        if page < count {
            Ok(())
        } else {
            Err(Error::PageOutOfRange { page, count })
        }
    }

    /// Changes to the page list need an unlocked, writable container.
    fn check_editable(&self) -> Result<()> {
        if self.inner.read_only {
            return Err(Error::InvalidArgument(format!(
                "{} was opened read-only",
                self.inner.path.display()
            )));
        }
        match self.locked_count() {
            0 => Ok(()),
            locked => Err(Error::PagesLocked(locked)),
        }
    }

    /// Lock one page for access.
    pub fn lock_page(&self, page: usize) -> Result<LockedPage> {
        self.check_page(page)?;
        let lock_page = self.library().api().lock_page()?;
        library::clear_last_message();
        let raw = unsafe { lock_page(self.inner.raw.as_ptr(), page_index(page)?) };
        let raw = NonNull::new(raw).ok_or_else(|| library::native_error("FreeImage_LockPage"))?;
        self.inner.locked.set(self.inner.locked.get() + 1);
        Ok(LockedPage {
            container: Rc::clone(&self.inner),
            raw,
            page,
            modified: Cell::new(false),
        })
    }

    /// Page numbers the library reports as locked.
    pub fn locked_page_numbers(&self) -> Result<Vec<usize>> {
        let get_locked = self.library().api().get_locked_page_numbers()?;
        let raw = self.inner.raw.as_ptr();
        let mut count: c_int = 0;
        if unsafe { get_locked(raw, std::ptr::null_mut(), &mut count) } == FALSE {
            return Err(library::native_error("FreeImage_GetLockedPageNumbers"));
        }
        let mut pages = vec![0 as c_int; usize::try_from(count).unwrap_or(0)];
        if !pages.is_empty()
            && unsafe { get_locked(raw, pages.as_mut_ptr(), &mut count) } == FALSE
        {
            return Err(library::native_error("FreeImage_GetLockedPageNumbers"));
        }
        pages.truncate(usize::try_from(count).unwrap_or(0));
        Ok(pages.into_iter().filter_map(|page| usize::try_from(page).ok()).collect())
    }

    pub fn append_page(&self, page: &dyn BitmapOps) -> Result<()> {
        self.check_editable()?;
        let append = self.library().api().append_page()?;
        unsafe { append(self.inner.raw.as_ptr(), page.raw()) };
        debug!("appended page to {}", self.inner.path.display());
        Ok(())
    }

    /// Insert before `index`. Inserting at the page count appends.
    pub fn insert_page(&self, index: usize, page: &dyn BitmapOps) -> Result<()> {
        self.check_editable()?;
        let count = self.page_count()?;
        if index == count {
            return self.append_page(page);
        }
        self.check_page(index)?;
        let insert = self.library().api().insert_page()?;
        unsafe { insert(self.inner.raw.as_ptr(), page_index(index)?, page.raw()) };
        Ok(())
    }

    pub fn delete_page(&self, index: usize) -> Result<()> {
        self.check_editable()?;
        self.check_page(index)?;
        let delete = self.library().api().delete_page()?;
        unsafe { delete(self.inner.raw.as_ptr(), page_index(index)?) };
        Ok(())
    }

    /// Move page `source` so that it ends up at `target`.
    pub fn move_page(&self, target: usize, source: usize) -> Result<()> {
        self.check_editable()?;
        self.check_page(source)?;
        self.check_page(target)?;
        let move_page = self.library().api().move_page()?;
        library::clear_last_message();
        let ok = unsafe { move_page(self.inner.raw.as_ptr(), page_index(target)?, page_index(source)?) };
        if ok == FALSE {
            return Err(library::native_error("FreeImage_MovePage"));
        }
        Ok(())
    }

    /// Write changes back and close.
    ///
    /// Fails with [`Error::PagesLocked`] while pages are locked; the
    /// container then closes after the last of them is unlocked.
    pub fn close(self) -> Result<()> {
        match self.locked_count() {
            0 => {}
            locked => return Err(Error::PagesLocked(locked)),
        }
        if self.inner.close_native()? {
            Ok(())
        } else {
            Err(library::native_error("FreeImage_CloseMultiBitmap"))
        }
    }
}

impl fmt::Debug for MultiBitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiBitmap")
            .field("path", &self.inner.path)
            .field("format", &self.inner.format)
            .field("locked", &self.inner.locked.get())
            .finish()
    }
}

/// One page locked out of a [`MultiBitmap`].
///
/// Unlocked on drop. In-place changes made through [`BitmapOps`] mark the
/// page modified, and a modified page is written back to the container.
pub struct LockedPage {
    container: Rc<Container>,
    raw: NonNull<FIBITMAP>,
    page: usize,
    modified: Cell<bool>,
}

impl LockedPage {
    pub fn page(&self) -> usize {
        self.page
    }

    pub fn is_modified(&self) -> bool {
        self.modified.get()
    }
}

impl Drop for LockedPage {
    fn drop(&mut self) {
        let container = &self.container;
        match container.library.api().unlock_page() {
            Ok(unlock) => {
                let changed = if self.modified.get() { TRUE } else { FALSE };
                unsafe { unlock(container.raw.as_ptr(), self.raw.as_ptr(), changed) };
            }
            Err(err) => warn!("page {} stays locked: {err}", self.page),
        }
        container.locked.set(container.locked.get().saturating_sub(1));
    }
}

impl fmt::Debug for LockedPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockedPage")
            .field("page", &self.page)
            .field("modified", &self.modified.get())
            .finish()
    }
}

impl sealed::Sealed for LockedPage {}

impl BitmapOps for LockedPage {
    fn library(&self) -> &Library {
        &self.container.library
    }

    fn raw(&self) -> *mut FIBITMAP {
        self.raw.as_ptr()
    }

    fn mark_modified(&self) {
        self.modified.set(true);
    }
}
