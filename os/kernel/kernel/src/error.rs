use crate::elf::ElfError;
use crate::image::ImageError;
use kernel_alloc::frame_alloc::AllocError;
use kernel_alloc::vmm::VmmError;
use kernel_memory_addresses::VirtualAddress;

/// Recoverable kernel failures. Every operation returning one of these has
/// already released whatever it allocated; syscalls report them as `-1`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum KernelError {
    #[error("out of memory")]
    OutOfMemory,
    #[error("task table full")]
    TaskTableFull,
    #[error("descriptor table full")]
    DescriptorTableFull,
    #[error("file table full")]
    FileTableFull,
    #[error("no free file descriptor")]
    FdTableFull,
    #[error("bad file descriptor {0}")]
    BadFd(usize),
    #[error("image: {0}")]
    Image(#[from] ImageError),
    #[error("invalid executable: {0}")]
    Elf(#[from] ElfError),
    #[error("argument list too long")]
    ArgumentsTooLarge,
    #[error("bad user address {0}")]
    BadAddress(VirtualAddress),
    #[error("invalid argument")]
    InvalidArgument,
}

impl From<AllocError> for KernelError {
    fn from(_: AllocError) -> Self {
        Self::OutOfMemory
    }
}

impl From<VmmError> for KernelError {
    fn from(value: VmmError) -> Self {
        match value {
            VmmError::OutOfMemory => Self::OutOfMemory,
            VmmError::Unmapped(va) | VmmError::Denied(va) => Self::BadAddress(va),
            VmmError::InvalidRange => Self::InvalidArgument,
        }
    }
}
