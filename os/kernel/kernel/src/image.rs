//! Program images for `exec`.
//!
//! The file systems live outside the kernel core; all `exec` needs from them is
//! the byte-stream view in [`ImageSource`]. [`RamDisk`] serves images from
//! memory, for images linked into the boot image and for hosted runs.

use alloc::string::String;
use alloc::vec::Vec;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ImageError {
    #[error("no such file")]
    NotFound,
    #[error("bad file handle")]
    BadHandle,
    #[error("seek past end of file")]
    BadSeek,
}

/// Byte-oriented open/seek/read/close over program images.
pub trait ImageSource {
    type Handle: Copy;

    /// Open the image at `path`.
    ///
    /// # Errors
    /// [`ImageError::NotFound`] if there is no such image.
    fn open(&mut self, path: &str) -> Result<Self::Handle, ImageError>;

    /// Move the read position to `offset` bytes from the start.
    ///
    /// # Errors
    /// [`ImageError::BadSeek`] past the end of the image.
    fn seek(&mut self, handle: Self::Handle, offset: u32) -> Result<(), ImageError>;

    /// Read up to `buf.len()` bytes; `Ok(0)` at end of file.
    ///
    /// # Errors
    /// [`ImageError::BadHandle`] for a closed or unknown handle.
    fn read(&mut self, handle: Self::Handle, buf: &mut [u8]) -> Result<usize, ImageError>;

    fn close(&mut self, handle: Self::Handle);
}

/// Read exactly `buf.len()` bytes, or report how far we got.
pub(crate) fn read_exact<S: ImageSource>(
    src: &mut S,
    handle: S::Handle,
    buf: &mut [u8],
) -> Result<bool, ImageError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = src.read(handle, &mut buf[filled..])?;
        if n == 0 {
            return Ok(false);
        }
        filled += n;
    }
    Ok(true)
}

/// In-memory image store.
#[derive(Debug, Default)]
pub struct RamDisk {
    files: Vec<(String, Vec<u8>)>,
    open: Vec<Option<Cursor>>,
}

#[derive(Debug, Copy, Clone)]
struct Cursor {
    file: usize,
    pos: usize,
}

impl RamDisk {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            files: Vec::new(),
            open: Vec::new(),
        }
    }

    /// Add (or replace) the image at `path`.
    pub fn insert(&mut self, path: &str, bytes: Vec<u8>) {
        if let Some(entry) = self.files.iter_mut().find(|(p, _)| p == path) {
            entry.1 = bytes;
        } else {
            self.files.push((String::from(path), bytes));
        }
    }

    /// Builder form of [`insert`](Self::insert).
    #[must_use]
    pub fn with(mut self, path: &str, bytes: Vec<u8>) -> Self {
        self.insert(path, bytes);
        self
    }

    /// Handles currently open.
    #[must_use]
    pub fn open_handles(&self) -> usize {
        self.open.iter().flatten().count()
    }

    fn cursor(&mut self, handle: usize) -> Result<&mut Cursor, ImageError> {
        self.open
            .get_mut(handle)
            .and_then(Option::as_mut)
            .ok_or(ImageError::BadHandle)
    }
}

impl ImageSource for RamDisk {
    type Handle = usize;

    fn open(&mut self, path: &str) -> Result<usize, ImageError> {
        let file = self
            .files
            .iter()
            .position(|(p, _)| p == path)
            .ok_or(ImageError::NotFound)?;
        let cursor = Some(Cursor { file, pos: 0 });
        if let Some(slot) = self.open.iter().position(Option::is_none) {
            self.open[slot] = cursor;
            Ok(slot)
        } else {
            self.open.push(cursor);
            Ok(self.open.len() - 1)
        }
    }

    fn seek(&mut self, handle: usize, offset: u32) -> Result<(), ImageError> {
        let offset = offset as usize;
        let cursor = *self.cursor(handle)?;
        if offset > self.files[cursor.file].1.len() {
            return Err(ImageError::BadSeek);
        }
        self.cursor(handle)?.pos = offset;
        Ok(())
    }

    fn read(&mut self, handle: usize, buf: &mut [u8]) -> Result<usize, ImageError> {
        let cursor = *self.cursor(handle)?;
        let data = &self.files[cursor.file].1;
        let n = buf.len().min(data.len() - cursor.pos);
        buf[..n].copy_from_slice(&data[cursor.pos..cursor.pos + n]);
        self.cursor(handle)?.pos += n;
        Ok(n)
    }

    fn close(&mut self, handle: usize) {
        if let Some(slot) = self.open.get_mut(handle) {
            *slot = None;
        }
    }
}
