//! Loading and saving through arbitrary byte streams.
//!
//! FreeImage's `*FromHandle` / `*ToHandle` entry points read and write
//! through four C callbacks (`FreeImageIO`). This module bridges them to an
//! [`ImageStream`]:
//!
//! | Callback | Contract | Failure sentinel |
//! |---|---|---|
//! | `read(buffer, size, count)` | items read | `0` |
//! | `write(buffer, size, count)` | items written | `0` |
//! | `seek(offset, origin)` | `0` on success | `1` |
//! | `tell()` | position | `-1` |
//!
//! ## Fault capture
//!
//! Neither errors nor panics can cross the native frames. Each native call
//! runs with an [`IoSession`] holding the stream and a fault latch:
//!
//! 1. The first callback that fails (returns an error or panics) stores the
//!    fault and latches. It returns its sentinel.
//! 2. While latched, every further callback returns its sentinel without
//!    touching the stream.
//! 3. When the native call returns, the fault is taken out, clearing the
//!    latch. Errors are returned unchanged as [`Error::Stream`] (or
//!    [`Error::UnsupportedStreamOperation`]); panics resume with their
//!    original payload. A bitmap produced by a faulted load is unloaded.
//!
//! Out-of-memory errors are latched without logging so the failure path
//! does not allocate.

use crate::bitmap::{Bitmap, BitmapOps};
use crate::error::{Error, Result};
use crate::ffi::{FALSE, SEEK_CUR, SEEK_END, SEEK_SET, FreeImageIO, fi_handle};
use crate::format::ImageFormat;
use crate::library::{self, Library};
use libc::{c_int, c_long, c_uint, c_void};
use log::debug;
use std::any::Any;
use std::fmt;
use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;

/// One of the four stream capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamOp {
    Read,
    Write,
    Seek,
    Tell,
}

impl fmt::Display for StreamOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StreamOp::Read => "read",
            StreamOp::Write => "write",
            StreamOp::Seek => "seek",
            StreamOp::Tell => "tell",
        })
    }
}

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Unsupported file operation {0}")]
    Unsupported(StreamOp),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<StreamError> for Error {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::Unsupported(op) => Error::UnsupportedStreamOperation(op),
            StreamError::Io(err) => Error::Stream(err),
        }
    }
}

/// A byte source and/or sink FreeImage can load from or save to.
///
/// Every method defaults to [`StreamError::Unsupported`]; implement the ones
/// the stream can do.
pub trait ImageStream {
    /// Read up to `buf.len()` bytes. Fewer (including zero) means end of
    /// stream.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
        let _ = buf;
        Err(StreamError::Unsupported(StreamOp::Read))
    }

    /// Write all of `buf`.
    fn write(&mut self, buf: &[u8]) -> Result<(), StreamError> {
        let _ = buf;
        Err(StreamError::Unsupported(StreamOp::Write))
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64, StreamError> {
        let _ = pos;
        Err(StreamError::Unsupported(StreamOp::Seek))
    }

    fn tell(&mut self) -> Result<u64, StreamError> {
        Err(StreamError::Unsupported(StreamOp::Tell))
    }
}

impl<T: ImageStream + ?Sized> ImageStream for &mut T {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
        (**self).read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> Result<(), StreamError> {
        (**self).write(buf)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64, StreamError> {
        (**self).seek(pos)
    }

    fn tell(&mut self) -> Result<u64, StreamError> {
        (**self).tell()
    }
}

macro_rules! read_write_seek_stream {
    ($($ty:ty),*) => {
        $(
            impl ImageStream for $ty {
                fn read(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
                    Ok(Read::read(self, buf)?)
                }

                fn write(&mut self, buf: &[u8]) -> Result<(), StreamError> {
                    Ok(Write::write_all(self, buf)?)
                }

                fn seek(&mut self, pos: SeekFrom) -> Result<u64, StreamError> {
                    Ok(Seek::seek(self, pos)?)
                }

                fn tell(&mut self) -> Result<u64, StreamError> {
                    Ok(Seek::stream_position(self)?)
                }
            }
        )*
    };
}

read_write_seek_stream!(File, Cursor<Vec<u8>>);

/// Read-only stream over any `Read + Seek`.
#[derive(Debug)]
pub struct Source<R>(pub R);

impl<R: Read + Seek> ImageStream for Source<R> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
        Ok(self.0.read(buf)?)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64, StreamError> {
        Ok(self.0.seek(pos)?)
    }

    fn tell(&mut self) -> Result<u64, StreamError> {
        Ok(self.0.stream_position()?)
    }
}

/// Write-only stream over any `Write + Seek`.
#[derive(Debug)]
pub struct Sink<W>(pub W);

impl<W: Write + Seek> ImageStream for Sink<W> {
    fn write(&mut self, buf: &[u8]) -> Result<(), StreamError> {
        Ok(self.0.write_all(buf)?)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64, StreamError> {
        Ok(self.0.seek(pos)?)
    }

    fn tell(&mut self) -> Result<u64, StreamError> {
        Ok(self.0.stream_position()?)
    }
}

/// What stopped a stream callback.
enum Fault {
    Error(StreamError),
    Panic(Box<dyn Any + Send + 'static>),
}

/// State behind the `fi_handle` for the duration of one native call.
pub(crate) struct IoSession<'a> {
    stream: &'a mut dyn ImageStream,
    fault: Option<Fault>,
}

impl<'a> IoSession<'a> {
    fn new(stream: &'a mut dyn ImageStream) -> Self {
        Self { stream, fault: None }
    }

    fn is_faulted(&self) -> bool {
        self.fault.is_some()
    }

    /// Run one stream operation, latching the first failure.
    fn run<T>(&mut self, op: impl FnOnce(&mut dyn ImageStream) -> Result<T, StreamError>) -> Option<T> {
        if self.is_faulted() {
            return None;
        }
        let stream = &mut *self.stream;
        match panic::catch_unwind(AssertUnwindSafe(|| op(stream))) {
            Ok(Ok(value)) => Some(value),
            Ok(Err(err)) => {
                let out_of_memory = matches!(&err, StreamError::Io(io) if io.kind() == io::ErrorKind::OutOfMemory);
                if !out_of_memory {
                    debug!("stream callback failed: {err}");
                }
                self.fault = Some(Fault::Error(err));
                None
            }
            Err(payload) => {
                debug!("stream callback panicked");
                self.fault = Some(Fault::Panic(payload));
                None
            }
        }
    }

    /// Take the fault out, resuming a captured panic.
    fn settle(&mut self) -> Result<()> {
        match self.fault.take() {
            None => Ok(()),
            Some(Fault::Error(err)) => Err(err.into()),
            Some(Fault::Panic(payload)) => panic::resume_unwind(payload),
        }
    }
}

unsafe fn session<'s>(handle: fi_handle) -> Option<&'s mut IoSession<'s>> {
    unsafe { handle.cast::<IoSession<'s>>().as_mut() }
}

fn read_fully(stream: &mut dyn ImageStream, buf: &mut [u8]) -> Result<usize, StreamError> {
    let mut filled = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(StreamError::Io(err)) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

unsafe extern "system" fn read_proc(buffer: *mut c_void, size: c_uint, count: c_uint, handle: fi_handle) -> c_uint {
    let Some(session) = (unsafe { session(handle) }) else {
        return 0;
    };
    let total = size as usize * count as usize;
    if total == 0 || buffer.is_null() || session.is_faulted() {
        return 0;
    }
    let buf = unsafe { std::slice::from_raw_parts_mut(buffer.cast::<u8>(), total) };
    match session.run(|stream| read_fully(stream, buf)) {
        Some(read) => (read / size as usize) as c_uint,
        None => 0,
    }
}

unsafe extern "system" fn write_proc(buffer: *mut c_void, size: c_uint, count: c_uint, handle: fi_handle) -> c_uint {
    let Some(session) = (unsafe { session(handle) }) else {
        return 0;
    };
    let total = size as usize * count as usize;
    if total == 0 || buffer.is_null() || session.is_faulted() {
        return 0;
    }
    let buf = unsafe { std::slice::from_raw_parts(buffer.cast::<u8>(), total) };
    match session.run(|stream| stream.write(buf)) {
        Some(()) => count,
        None => 0,
    }
}

unsafe extern "system" fn seek_proc(handle: fi_handle, offset: c_long, origin: c_int) -> c_int {
    let Some(session) = (unsafe { session(handle) }) else {
        return 1;
    };
    let offset = i64::from(offset);
    let target = match origin {
        SEEK_SET => u64::try_from(offset).map(SeekFrom::Start).ok(),
        SEEK_CUR => Some(SeekFrom::Current(offset)),
        SEEK_END => Some(SeekFrom::End(offset)),
        _ => None,
    };
    let outcome = session.run(|stream| match target {
        Some(pos) => stream.seek(pos),
        None => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid seek: offset {offset}, origin {origin}"),
        )
        .into()),
    });
    match outcome {
        Some(_) => 0,
        None => 1,
    }
}

unsafe extern "system" fn tell_proc(handle: fi_handle) -> c_long {
    let Some(session) = (unsafe { session(handle) }) else {
        return -1;
    };
    match session.run(|stream| stream.tell()) {
        Some(position) => c_long::try_from(position).unwrap_or(-1),
        None => -1,
    }
}

fn io_callbacks() -> FreeImageIO {
    FreeImageIO {
        read_proc: Some(read_proc),
        write_proc: Some(write_proc),
        seek_proc: Some(seek_proc),
        tell_proc: Some(tell_proc),
    }
}

/// Run one native call against `stream`, then settle any latched fault.
///
/// `finish` turns the raw result into the caller's value before the fault
/// is looked at, so a bitmap produced by a faulted load is unloaded.
fn drive<R, T>(
    stream: &mut dyn ImageStream,
    call: impl FnOnce(*mut FreeImageIO, fi_handle) -> R,
    finish: impl FnOnce(R) -> T,
) -> Result<T> {
    let mut io = io_callbacks();
    let mut session = IoSession::new(stream);
    library::clear_last_message();
    let raw = call(&mut io, (&mut session as *mut IoSession<'_>).cast::<c_void>());
    let value = finish(raw);
    session.settle()?;
    Ok(value)
}

impl Library {
    /// Detect the format from the stream's signature.
    ///
    /// The stream is left where it was.
    pub fn file_type_from_stream(&self, stream: &mut dyn ImageStream) -> Result<ImageFormat> {
        let get_file_type = self.api().get_file_type_from_handle()?;
        drive(
            stream,
            |io, handle| unsafe { get_file_type(io, handle, 0) },
            ImageFormat::from_code,
        )
    }

    /// Load from a stream. An unknown `format` is detected from the
    /// signature first.
    pub fn load_from_stream(&self, format: ImageFormat, stream: &mut dyn ImageStream, flags: i32) -> Result<Bitmap> {
        let format = if format.is_known() {
            format
        } else {
            let detected = self.file_type_from_stream(stream)?;
            if !detected.is_known() {
                return Err(Error::UnknownFormat("stream signature not recognised".into()));
            }
            detected
        };
        let load = self.api().load_from_handle()?;
        let bitmap = drive(
            stream,
            |io, handle| unsafe { load(format.code(), io, handle, flags) },
            |raw| unsafe { Bitmap::wrap(self, raw, "FreeImage_LoadFromHandle") },
        )??;
        debug!("loaded {format} bitmap from stream");
        Ok(bitmap)
    }

    /// Load from an in-memory buffer. `None` detects the format.
    pub fn load_from_memory(&self, bytes: &[u8], format: Option<ImageFormat>) -> Result<Bitmap> {
        let mut source = Source(Cursor::new(bytes));
        self.load_from_stream(format.unwrap_or(ImageFormat::UNKNOWN), &mut source, 0)
    }
}

pub(crate) fn save_to_stream<B>(bitmap: &B, format: ImageFormat, stream: &mut dyn ImageStream, flags: i32) -> Result<()>
where
    B: BitmapOps + ?Sized,
{
    let save = bitmap.library().api().save_to_handle()?;
    let ok = drive(
        stream,
        |io, handle| unsafe { save(format.code(), bitmap.raw(), io, handle, flags) },
        |ok| ok,
    )?;
    if ok == FALSE {
        return Err(library::native_error("FreeImage_SaveToHandle"));
    }
    Ok(())
}
