//! Reference-counted open files.
//!
//! The file systems own what a file *is*; the kernel core only tracks how many
//! descriptors (across all tasks) refer to each open-file slot, so `fork` and
//! `exit` can keep the counts right.

use crate::KernelError;
use alloc::vec;
use alloc::vec::Vec;

/// Index into the system-wide [`FileTable`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct FileId(usize);

impl FileId {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// System-wide open-file table.
#[derive(Debug)]
pub struct FileTable {
    refs: Vec<u32>,
}

impl FileTable {
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            refs: vec![0; size],
        }
    }

    /// Claim a free slot with one reference.
    ///
    /// # Errors
    /// [`KernelError::FileTableFull`].
    pub fn alloc(&mut self) -> Result<FileId, KernelError> {
        let index = self
            .refs
            .iter()
            .position(|&r| r == 0)
            .ok_or(KernelError::FileTableFull)?;
        self.refs[index] = 1;
        Ok(FileId(index))
    }

    pub fn inc_ref(&mut self, file: FileId) {
        self.refs[file.0] += 1;
    }

    /// Drop one reference; `true` if that was the last one.
    pub fn release(&mut self, file: FileId) -> bool {
        let r = &mut self.refs[file.0];
        if *r == 0 {
            return false;
        }
        *r -= 1;
        *r == 0
    }

    #[must_use]
    pub fn ref_count(&self, file: FileId) -> u32 {
        self.refs[file.0]
    }

    #[must_use]
    pub fn open_count(&self) -> usize {
        self.refs.iter().filter(|&&r| r > 0).count()
    }
}

/// Per-task descriptor array.
#[derive(Debug, Clone, Default)]
pub struct FdTable {
    fds: Vec<Option<FileId>>,
}

impl FdTable {
    #[must_use]
    pub fn new(slots: usize) -> Self {
        Self {
            fds: vec![None; slots],
        }
    }

    /// Lowest free descriptor, now referring to `file`.
    pub fn alloc_fd(&mut self, file: FileId) -> Option<usize> {
        let fd = self.fds.iter().position(Option::is_none)?;
        self.fds[fd] = Some(file);
        Some(fd)
    }

    #[must_use]
    pub fn file(&self, fd: usize) -> Option<FileId> {
        self.fds.get(fd).copied().flatten()
    }

    pub fn remove_fd(&mut self, fd: usize) -> Option<FileId> {
        self.fds.get_mut(fd).and_then(Option::take)
    }

    /// All open files, in descriptor order.
    pub fn files(&self) -> impl Iterator<Item = FileId> + '_ {
        self.fds.iter().flatten().copied()
    }

    /// Close everything, yielding each file that was open.
    pub fn drain(&mut self) -> impl Iterator<Item = FileId> + '_ {
        self.fds.iter_mut().filter_map(Option::take)
    }
}
