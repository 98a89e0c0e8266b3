//! The loaded FreeImage library.
//!
//! [`Library`] is a cheap, cloneable handle to one loaded copy of the native
//! library. Clones share the same load; the last one to drop runs
//! `FreeImage_DeInitialise` (on platforms where the library does not do it
//! itself) and unloads the shared object.
//!
//! ## Loading
//!
//! | Constructor | Source |
//! |---|---|
//! | [`Library::open_default`] | platform file name (`libfreeimage.so`, `freeimage.dll`, ...) |
//! | [`Library::open`] | explicit path |
//! | [`Library::from_settings`] | `[library] path` from the config file, else the default search |
//! | [`Library::from_api`] | a function table assembled by hand (static linking, test doubles) |
//!
//! Opens of the same path go through a process-wide registry, so loading a
//! library that is already loaded hands back another reference to it. Paths
//! are compared after canonicalisation: a symlink or a relative path to the
//! same file shares the load. Bare names (`libfreeimage.so`) are left to the
//! platform loader's search and compared as written.
//!
//! ## Native messages
//!
//! FreeImage reports failures through a message callback rather than return
//! codes. Every loaded library gets a bridge installed that:
//!
//! 1. records the message as the calling thread's last native message, which
//!    the next [`Error::Native`] picks up;
//! 2. forwards `(format, message)` to the process-wide handler. The default
//!    handler logs it with `log::error!`; [`set_message_handler`] replaces it.

use crate::config::LibrarySettings;
use crate::error::{Error, Result};
use crate::ffi::{self, Api, FALSE, FIF};
use crate::format::ImageFormat;
use libc::c_char;
use log::{debug, error, info, warn};
use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::fmt;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex, PoisonError, Weak};

/// Whether the library must be initialised by hand after loading.
/// Windows builds do it from `DllMain`.
const INITIALISE_ON_LOAD: bool = !cfg!(windows);

/// Process-wide handler for native messages.
pub type MessageHandler = dyn Fn(ImageFormat, &str) + Send + Sync;

static REGISTRY: LazyLock<Mutex<HashMap<PathBuf, Weak<Shared>>>> = LazyLock::new(Default::default);

static HANDLER: LazyLock<Mutex<Option<Arc<MessageHandler>>>> = LazyLock::new(Default::default);

thread_local! {
    static LAST_MESSAGE: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Reference-counted handle to a loaded FreeImage.
#[derive(Clone)]
pub struct Library {
    shared: Arc<Shared>,
}

struct Shared {
    api: Api,
    path: Option<PathBuf>,
    initialised: bool,
    // Dropped after `Shared::drop` has run DeInitialise.
    _lib: Option<libloading::Library>,
}

impl Shared {
    /// # Safety
    /// Every bound function in `api` must match its declared signature.
    unsafe fn new(api: Api, lib: Option<libloading::Library>, path: Option<PathBuf>) -> Self {
        if let Some(set_output_message) = api.set_output_message {
            unsafe { set_output_message(Some(message_bridge)) };
        }
        let initialised = match api.initialise {
            Some(initialise) if INITIALISE_ON_LOAD => {
                unsafe { initialise(FALSE) };
                true
            }
            _ => false,
        };
        debug!(
            "FreeImage bound: {} of {} entry points, initialised={}",
            api.bound(),
            Api::SYMBOLS.len(),
            initialised
        );
        Self {
            api,
            path,
            initialised,
            _lib: lib,
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        if self.initialised {
            if let Some(deinitialise) = self.api.deinitialise {
                unsafe { deinitialise() };
            }
        }
        match &self.path {
            Some(path) => info!("FreeImage released: {}", path.display()),
            None => debug!("FreeImage function table released"),
        }
    }
}

impl Library {
    /// Load FreeImage from the platform's default library names.
    pub fn open_default() -> Result<Self> {
        let candidates = default_candidates();
        let mut last_error = None;
        for name in &candidates {
            match Self::open(name) {
                Ok(library) => return Ok(library),
                Err(Error::LibraryNotFound { source, .. }) => {
                    debug!("FreeImage not found as {name}: {source}");
                    last_error = Some(source);
                }
                Err(other) => return Err(other),
            }
        }
        match last_error {
            Some(source) => Err(Error::LibraryNotFound {
                name: candidates.join(", "),
                source,
            }),
            None => Err(Error::InvalidArgument("no FreeImage library candidates".into())),
        }
    }

    /// Load FreeImage from `path`, or share the load already registered for it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        // SAFETY: the table is declared from FreeImage.h.
        unsafe { Self::open_registered(path.as_ref(), load_shared_object) }
    }

    /// Registry lookup around `load`, which only runs when `path` has no
    /// live load yet.
    ///
    /// # Safety
    /// The table returned by `load` must satisfy [`Library::from_api`].
    unsafe fn open_registered<F>(path: &Path, load: F) -> Result<Self>
    where
        F: FnOnce(&Path) -> Result<(Api, Option<libloading::Library>)>,
    {
        let key = registry_key(path);
        let mut registry = REGISTRY.lock().unwrap_or_else(PoisonError::into_inner);
        registry.retain(|_, shared| shared.strong_count() > 0);

        if let Some(shared) = registry.get(&key).and_then(Weak::upgrade) {
            debug!("FreeImage already loaded from {}", key.display());
            return Ok(Self { shared });
        }

        let (api, lib) = load(path)?;
        let shared = Arc::new(unsafe { Shared::new(api, lib, Some(path.to_path_buf())) });
        registry.insert(key, Arc::downgrade(&shared));
        info!("FreeImage loaded from {}", path.display());
        Ok(Self { shared })
    }

    /// Load the library named in the settings, or the default one.
    pub fn from_settings(settings: &LibrarySettings) -> Result<Self> {
        match &settings.path {
            Some(path) => Self::open(path),
            None => Self::open_default(),
        }
    }

    /// Wrap a hand-assembled function table.
    ///
    /// The table does not go through the registry: every call makes a new,
    /// independent library handle.
    ///
    /// # Safety
    /// Every `Some` entry must point to a function with the signature
    /// declared for it, following FreeImage's documented behaviour.
    pub unsafe fn from_api(api: Api) -> Self {
        Self {
            shared: Arc::new(unsafe { Shared::new(api, None, None) }),
        }
    }

    pub fn api(&self) -> &Api {
        &self.shared.api
    }

    /// Path this library was loaded from, if it came from a file.
    pub fn path(&self) -> Option<&Path> {
        self.shared.path.as_deref()
    }

    /// Live references to this load, including this one.
    pub fn instances(&self) -> usize {
        Arc::strong_count(&self.shared)
    }

    /// True when both handles refer to the same load.
    pub fn same_as(&self, other: &Library) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    pub fn version(&self) -> Result<String> {
        let get_version = self.api().get_version()?;
        Ok(unsafe { ffi::string_from(get_version()) }.unwrap_or_default())
    }

    pub fn copyright(&self) -> Result<String> {
        let get_copyright = self.api().get_copyright_message()?;
        Ok(unsafe { ffi::string_from(get_copyright()) }.unwrap_or_default())
    }

    pub fn is_little_endian(&self) -> Result<bool> {
        let is_little_endian = self.api().is_little_endian()?;
        Ok(unsafe { is_little_endian() } != FALSE)
    }
}

impl fmt::Debug for Library {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Library")
            .field("path", &self.shared.path)
            .field("instances", &self.instances())
            .field("api", &self.shared.api)
            .finish()
    }
}

fn load_shared_object(path: &Path) -> Result<(Api, Option<libloading::Library>)> {
    // SAFETY: loading FreeImage runs no initialisers beyond its own.
    let lib = unsafe { libloading::Library::new(path) }.map_err(|source| Error::LibraryNotFound {
        name: path.display().to_string(),
        source,
    })?;
    let (api, missing) = unsafe { Api::resolve(&lib) };
    for symbol in &missing {
        warn!("{symbol} not exported by {}", path.display());
    }
    Ok((api, Some(lib)))
}

/// Canonical form of `path` for the registry. Bare names and paths that do
/// not resolve are kept as written.
fn registry_key(path: &Path) -> PathBuf {
    if path.components().count() < 2 {
        return path.to_path_buf();
    }
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// File names tried by [`Library::open_default`], in order.
pub fn default_candidates() -> Vec<String> {
    let mut names = vec![libloading::library_filename("freeimage").to_string_lossy().into_owned()];
    if cfg!(target_os = "linux") {
        names.push("libfreeimage.so.3".into());
    }
    if cfg!(windows) {
        names.push("FreeImage.dll".into());
    }
    names
}

/// Install the process-wide native message handler.
pub fn set_message_handler<F>(handler: F)
where
    F: Fn(ImageFormat, &str) + Send + Sync + 'static,
{
    *HANDLER.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(handler));
}

/// Go back to logging native messages.
pub fn reset_message_handler() {
    *HANDLER.lock().unwrap_or_else(PoisonError::into_inner) = None;
}

/// Last message FreeImage emitted on this thread, without consuming it.
pub fn last_message() -> Option<String> {
    LAST_MESSAGE.with(|last| last.borrow().clone())
}

pub(crate) fn clear_last_message() {
    LAST_MESSAGE.with(|last| last.borrow_mut().take());
}

/// Failure of a native call, carrying the message it emitted if any.
pub(crate) fn native_error(operation: &'static str) -> Error {
    Error::Native {
        operation,
        message: LAST_MESSAGE.with(|last| last.borrow_mut().take()),
    }
}

pub(crate) fn path_cstring(path: &Path) -> Result<CString> {
    let text = path
        .to_str()
        .ok_or_else(|| Error::InvalidArgument(format!("path is not valid UTF-8: {}", path.display())))?;
    CString::new(text).map_err(|_| Error::InvalidArgument(format!("path contains a NUL byte: {text}")))
}

fn default_handler(format: ImageFormat, message: &str) {
    error!("Error returned. {} {}", format.name(), message);
}

unsafe extern "system" fn message_bridge(fif: FIF, message: *const c_char) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let text = if message.is_null() {
            String::new()
        } else {
            unsafe { CStr::from_ptr(message) }.to_string_lossy().into_owned()
        };
        LAST_MESSAGE.with(|last| *last.borrow_mut() = Some(text.clone()));

        let handler = HANDLER.lock().unwrap_or_else(PoisonError::into_inner).clone();
        let format = ImageFormat::from_code(fif);
        match handler {
            Some(handler) => handler(format, &text),
            None => default_handler(format, &text),
        }
    }));
    if outcome.is_err() {
        error!("native message handler panicked");
    }
}
