use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use kernarg_channel::IpcHandle;

use crate::backend::{DeviceBackend, DevicePtr};
use crate::error::{DeviceError, Result};

/// Base of the fake address range handed out by [`HostMemoryBackend`].
const HOST_MEMORY_BASE: u64 = 0x7f00_0000_0000;
const HOST_MEMORY_STRIDE: u64 = 0x1_0000_0000;

/// In-process stand-in for a device runtime: handles map to byte vectors registered up front.
///
/// Mirrors the runtime rules that matter to the resolver: unknown handles fail to open, a handle
/// cannot be opened twice at once, and copies are bounds-checked against the allocation.
#[derive(Debug, Default)]
pub struct HostMemoryBackend {
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    allocations: HashMap<IpcHandle, Vec<u8>>,
    open: HashMap<DevicePtr, IpcHandle>,
    next_slot: u64,
    opens: usize,
}

impl HostMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handle: IpcHandle, bytes: Vec<u8>) {
        self.lock().allocations.insert(handle, bytes);
    }

    pub fn register_slice<T: bytemuck::NoUninit>(&self, handle: IpcHandle, values: &[T]) {
        self.register(handle, bytemuck::cast_slice(values).to_vec());
    }

    /// Handles currently open.
    pub fn open_handles(&self) -> usize {
        self.lock().open.len()
    }

    /// Total successful opens since creation.
    pub fn total_opens(&self) -> usize {
        self.lock().opens
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DeviceBackend for HostMemoryBackend {
    fn name(&self) -> &'static str {
        "host-memory"
    }

    fn open_ipc_handle(&self, handle: &IpcHandle) -> Result<DevicePtr> {
        let mut state = self.lock();
        if !state.allocations.contains_key(handle) {
            return Err(DeviceError::InvalidHandle);
        }
        if state.open.values().any(|open| open == handle) {
            return Err(DeviceError::AlreadyOpen);
        }
        let ptr = DevicePtr(HOST_MEMORY_BASE + state.next_slot * HOST_MEMORY_STRIDE);
        state.next_slot += 1;
        state.opens += 1;
        state.open.insert(ptr, *handle);
        Ok(ptr)
    }

    fn copy_to_host(&self, src: DevicePtr, dst: &mut [u8]) -> Result<()> {
        let state = self.lock();
        let handle = state.open.get(&src).ok_or(DeviceError::NotOpen(src.0))?;
        let bytes = state
            .allocations
            .get(handle)
            .ok_or(DeviceError::InvalidHandle)?;
        if dst.len() > bytes.len() {
            return Err(DeviceError::OutOfBounds {
                len: dst.len(),
                capacity: bytes.len(),
            });
        }
        dst.copy_from_slice(&bytes[..dst.len()]);
        Ok(())
    }

    fn close_ipc_handle(&self, ptr: DevicePtr) -> Result<()> {
        self.lock()
            .open
            .remove(&ptr)
            .map(|_| ())
            .ok_or(DeviceError::NotOpen(ptr.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernarg_channel::format::IPC_HANDLE_SIZE;

    #[test]
    fn open_copy_close_cycle() {
        let backend = HostMemoryBackend::new();
        let handle = IpcHandle::from_bytes([1; IPC_HANDLE_SIZE]);
        backend.register(handle, vec![1, 2, 3, 4]);

        let ptr = backend.open_ipc_handle(&handle).unwrap();
        assert!(matches!(
            backend.open_ipc_handle(&handle),
            Err(DeviceError::AlreadyOpen)
        ));

        let mut dst = [0u8; 3];
        backend.copy_to_host(ptr, &mut dst).unwrap();
        assert_eq!(dst, [1, 2, 3]);

        let mut too_big = [0u8; 5];
        assert!(matches!(
            backend.copy_to_host(ptr, &mut too_big),
            Err(DeviceError::OutOfBounds { len: 5, capacity: 4 })
        ));

        backend.close_ipc_handle(ptr).unwrap();
        assert_eq!(backend.open_handles(), 0);
        assert!(matches!(
            backend.close_ipc_handle(ptr),
            Err(DeviceError::NotOpen(_))
        ));
    }

    #[test]
    fn unknown_handle_fails_to_open() {
        let backend = HostMemoryBackend::new();
        let handle = IpcHandle::from_bytes([9; IPC_HANDLE_SIZE]);
        assert!(matches!(
            backend.open_ipc_handle(&handle),
            Err(DeviceError::InvalidHandle)
        ));
    }
}
