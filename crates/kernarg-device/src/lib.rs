//! Turns IPC handles published by the traced process into typed host buffers.
//!
//! The signature model ([`ArgSignature`]) decides which kernel parameters are captured and how
//! their bytes are decoded. The device side sits behind [`DeviceBackend`] so the resolver can be
//! driven by the HIP runtime in production and by [`HostMemoryBackend`] in tests.

mod backend;
mod buffer;
mod error;
#[cfg(feature = "hip")]
mod hip;
mod host_memory;
mod resolver;
mod signature;

pub use backend::{DeviceBackend, DevicePtr};
pub use buffer::HostBuffer;
pub use error::{DeviceError, Result};
#[cfg(feature = "hip")]
pub use hip::HipRuntime;
pub use host_memory::HostMemoryBackend;
pub use resolver::{element_count, DevicePointerResolver};
pub use signature::{is_captured_pointer, ArgSignature, ElementType, PointerArg};
