use std::fmt;

use kernarg_channel::IpcHandle;

use crate::error::Result;

/// A device address valid in this process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DevicePtr(pub u64);

impl fmt::LowerHex for DevicePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// Device-memory runtime operations needed to read another process's allocations.
pub trait DeviceBackend {
    fn name(&self) -> &'static str;

    /// Maps a handle exported by another process into this process's address space.
    ///
    /// A handle must not be opened twice while it is still open.
    fn open_ipc_handle(&self, handle: &IpcHandle) -> Result<DevicePtr>;

    /// Synchronous device-to-host copy of `dst.len()` bytes starting at `src`.
    fn copy_to_host(&self, src: DevicePtr, dst: &mut [u8]) -> Result<()>;

    fn close_ipc_handle(&self, ptr: DevicePtr) -> Result<()>;
}

impl<B: DeviceBackend + ?Sized> DeviceBackend for Box<B> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn open_ipc_handle(&self, handle: &IpcHandle) -> Result<DevicePtr> {
        (**self).open_ipc_handle(handle)
    }

    fn copy_to_host(&self, src: DevicePtr, dst: &mut [u8]) -> Result<()> {
        (**self).copy_to_host(src, dst)
    }

    fn close_ipc_handle(&self, ptr: DevicePtr) -> Result<()> {
        (**self).close_ipc_handle(ptr)
    }
}
