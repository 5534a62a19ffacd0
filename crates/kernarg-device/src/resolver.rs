use kernarg_channel::{ExchangeRecord, IpcHandle};

use crate::backend::{DeviceBackend, DevicePtr};
use crate::buffer::HostBuffer;
use crate::error::{DeviceError, Result};
use crate::signature::{ElementType, PointerArg};

/// Number of `element`s in an allocation of `size` bytes. A size that does not divide evenly
/// means the producer and the signature disagree about the type.
pub fn element_count(size: u64, element: ElementType) -> Result<usize> {
    let width = element.width();
    if size % width as u64 != 0 {
        return Err(DeviceError::SizeMismatch { size, width });
    }
    usize::try_from(size / width as u64).map_err(|_| DeviceError::TooLarge(size))
}

/// Opens IPC handles and copies their allocations into typed host buffers.
pub struct DevicePointerResolver<'a> {
    backend: &'a dyn DeviceBackend,
}

impl<'a> DevicePointerResolver<'a> {
    pub fn new(backend: &'a dyn DeviceBackend) -> Self {
        Self { backend }
    }

    pub fn open(&self, handle: &IpcHandle) -> Result<DevicePtr> {
        let ptr = self.backend.open_ipc_handle(handle)?;
        tracing::debug!("opened IPC ptr: 0x{ptr:x}");
        Ok(ptr)
    }

    /// Blocking copy of `count` elements starting at `ptr`.
    pub fn copy(&self, ptr: DevicePtr, count: usize, element: ElementType) -> Result<HostBuffer> {
        let len = count
            .checked_mul(element.width())
            .ok_or(DeviceError::TooLarge(u64::MAX))?;
        // The size comes from the producer; refuse it rather than abort on allocation failure.
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(len)
            .map_err(|_| DeviceError::TooLarge(len as u64))?;
        bytes.resize(len, 0);
        self.backend.copy_to_host(ptr, &mut bytes)?;
        HostBuffer::decode(element, &bytes)
    }

    /// Opens, copies and closes one record's allocation as `arg`'s element type.
    ///
    /// The size is validated before the handle is opened. The handle is closed even when the
    /// copy fails.
    pub fn resolve(&self, record: &ExchangeRecord, arg: &PointerArg) -> Result<HostBuffer> {
        let count = element_count(record.size, arg.element)?;
        let ptr = self.open(&record.handle)?;
        let copied = self.copy(ptr, count, arg.element);
        let closed = self.backend.close_ipc_handle(ptr);

        let buffer = match (copied, closed) {
            (Ok(buffer), Ok(())) => buffer,
            (Ok(_), Err(err)) => return Err(err),
            (Err(err), closed) => {
                if let Err(close_err) = closed {
                    tracing::warn!("failed to close IPC ptr 0x{ptr:x} after copy error: {close_err}");
                }
                return Err(err);
            }
        };

        tracing::debug!(
            "received data from IPC ({}/{count}) for argument {}",
            arg.decl,
            arg.position
        );
        Ok(buffer)
    }

    /// Pairs records with pointer arguments by position: the k-th distinct handle published by
    /// the producer belongs to the k-th captured pointer argument.
    pub fn resolve_all(
        &self,
        records: &[ExchangeRecord],
        args: &[PointerArg],
    ) -> Result<Vec<HostBuffer>> {
        if records.len() != args.len() {
            return Err(DeviceError::ArityMismatch {
                records: records.len(),
                args: args.len(),
            });
        }
        // Fail on any size/type disagreement before touching the device.
        for (record, arg) in records.iter().zip(args) {
            element_count(record.size, arg.element)?;
        }
        records
            .iter()
            .zip(args)
            .map(|(record, arg)| self.resolve(record, arg))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_counts_follow_widths() {
        assert_eq!(element_count(4096, ElementType::F32).unwrap(), 1024);
        assert_eq!(element_count(400, ElementType::I32).unwrap(), 100);
        assert_eq!(element_count(64, ElementType::F64).unwrap(), 8);
        assert_eq!(element_count(0, ElementType::F64).unwrap(), 0);
        let word = std::mem::size_of::<usize>() as u64;
        assert_eq!(element_count(word * 5, ElementType::Usize).unwrap(), 5);
    }

    #[test]
    fn remainder_is_a_size_mismatch() {
        let err = element_count(10, ElementType::F32).unwrap_err();
        assert!(matches!(err, DeviceError::SizeMismatch { size: 10, width: 4 }));
    }
}
