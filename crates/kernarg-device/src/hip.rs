use std::ffi::{c_char, c_int, c_uint, c_void, CStr};
use std::path::Path;

use kernarg_channel::format::IPC_HANDLE_SIZE;
use kernarg_channel::IpcHandle;
use libloading::Library;

use crate::backend::{DeviceBackend, DevicePtr};
use crate::error::{DeviceError, Result};

type HipError = c_int;

const HIP_SUCCESS: HipError = 0;
const HIP_MEMCPY_DEVICE_TO_HOST: c_int = 2;
const HIP_IPC_MEM_LAZY_ENABLE_PEER_ACCESS: c_uint = 0x1;

/// `hipIpcMemHandle_t`, passed by value.
#[repr(C)]
#[derive(Clone, Copy)]
struct HipIpcMemHandle {
    reserved: [c_char; IPC_HANDLE_SIZE],
}

type HipIpcOpenMemHandleFn =
    unsafe extern "C" fn(dev_ptr: *mut *mut c_void, handle: HipIpcMemHandle, flags: c_uint) -> HipError;
type HipIpcCloseMemHandleFn = unsafe extern "C" fn(dev_ptr: *mut c_void) -> HipError;
type HipMemcpyFn = unsafe extern "C" fn(
    dst: *mut c_void,
    src: *const c_void,
    size_bytes: usize,
    kind: c_int,
) -> HipError;
type HipGetErrorStringFn = unsafe extern "C" fn(error: HipError) -> *const c_char;

struct HipFns {
    ipc_open: HipIpcOpenMemHandleFn,
    ipc_close: HipIpcCloseMemHandleFn,
    memcpy: HipMemcpyFn,
    error_string: HipGetErrorStringFn,
}

/// HIP runtime loaded with `dlopen`.
pub struct HipRuntime {
    _lib: Library,
    fns: HipFns,
}

impl std::fmt::Debug for HipRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HipRuntime").finish_non_exhaustive()
    }
}

impl HipRuntime {
    /// Tries the usual sonames of the ROCm HIP runtime in turn.
    pub fn load() -> Result<Self> {
        let candidates = ["libamdhip64.so", "libamdhip64.so.6", "libamdhip64.so.5"];
        for candidate in candidates {
            // SAFETY: only loads the library; no symbols are resolved here.
            if let Ok(lib) = unsafe { Library::new(candidate) } {
                tracing::debug!("loaded HIP runtime from {candidate}");
                return Self::from_library(lib);
            }
        }
        Err(DeviceError::Load(format!(
            "HIP runtime not found (tried {})",
            candidates.join(", ")
        )))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        // SAFETY: loading a user-specified runtime library; its initializers are trusted.
        let lib = unsafe { Library::new(path) }
            .map_err(|err| DeviceError::Load(format!("{}: {err}", path.display())))?;
        Self::from_library(lib)
    }

    fn from_library(lib: Library) -> Result<Self> {
        let fns = HipFns {
            ipc_open: load_symbol(&lib, b"hipIpcOpenMemHandle\0")?,
            ipc_close: load_symbol(&lib, b"hipIpcCloseMemHandle\0")?,
            memcpy: load_symbol(&lib, b"hipMemcpy\0")?,
            error_string: load_symbol(&lib, b"hipGetErrorString\0")?,
        };
        Ok(Self { _lib: lib, fns })
    }

    fn check(&self, status: HipError, call: &'static str) -> Result<()> {
        if status == HIP_SUCCESS {
            return Ok(());
        }
        // SAFETY: hipGetErrorString returns a static NUL-terminated string (or null).
        let message = unsafe {
            let ptr = (self.fns.error_string)(status);
            if ptr.is_null() {
                String::from("unknown error")
            } else {
                CStr::from_ptr(ptr).to_string_lossy().into_owned()
            }
        };
        Err(DeviceError::Runtime {
            call,
            status,
            message,
        })
    }
}

fn load_symbol<T: Copy>(lib: &Library, name: &'static [u8]) -> Result<T> {
    // SAFETY: symbol type is expected to match the HIP API.
    let symbol = unsafe { lib.get::<T>(name) }.map_err(|err| {
        DeviceError::Load(format!(
            "failed to resolve HIP symbol {}: {err}",
            String::from_utf8_lossy(&name[..name.len() - 1])
        ))
    })?;
    Ok(*symbol)
}

impl DeviceBackend for HipRuntime {
    fn name(&self) -> &'static str {
        "hip"
    }

    fn open_ipc_handle(&self, handle: &IpcHandle) -> Result<DevicePtr> {
        let raw = HipIpcMemHandle {
            reserved: handle.as_bytes().map(|b| b as c_char),
        };
        let mut dev_ptr: *mut c_void = std::ptr::null_mut();
        // SAFETY: `dev_ptr` is a valid out-pointer; the handle is passed by value.
        let status = unsafe {
            (self.fns.ipc_open)(&mut dev_ptr, raw, HIP_IPC_MEM_LAZY_ENABLE_PEER_ACCESS)
        };
        self.check(status, "hipIpcOpenMemHandle")?;
        Ok(DevicePtr(dev_ptr as u64))
    }

    fn copy_to_host(&self, src: DevicePtr, dst: &mut [u8]) -> Result<()> {
        if dst.is_empty() {
            return Ok(());
        }
        // SAFETY: `dst` is a live host buffer of `dst.len()` bytes; `src` was returned by
        // hipIpcOpenMemHandle for an allocation at least that large.
        let status = unsafe {
            (self.fns.memcpy)(
                dst.as_mut_ptr().cast(),
                src.0 as usize as *const c_void,
                dst.len(),
                HIP_MEMCPY_DEVICE_TO_HOST,
            )
        };
        self.check(status, "hipMemcpy")
    }

    fn close_ipc_handle(&self, ptr: DevicePtr) -> Result<()> {
        // SAFETY: `ptr` was returned by hipIpcOpenMemHandle and is closed once.
        let status = unsafe { (self.fns.ipc_close)(ptr.0 as usize as *mut c_void) };
        self.check(status, "hipIpcCloseMemHandle")
    }
}
