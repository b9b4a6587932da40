//! Raw NVML entry points
//!
//! Clock enumeration and clock locking are called through the C API
//! directly, bypassing nvml-wrapper's high-level types.

use crate::error::HardwareError;

use libloading::{Library, Symbol};
use nvml_wrapper_sys::bindings::{nvmlDevice_t, nvmlReturn_enum, nvmlReturn_enum_NVML_SUCCESS};
use std::os::raw::c_uint;

const NVML_ERROR_INVALID_ARGUMENT: nvmlReturn_enum = 2;
const NVML_ERROR_NOT_SUPPORTED: nvmlReturn_enum = 3;
const NVML_ERROR_NO_PERMISSION: nvmlReturn_enum = 4;
const NVML_ERROR_INSUFFICIENT_SIZE: nvmlReturn_enum = 7;
const NVML_ERROR_GPU_IS_LOST: nvmlReturn_enum = 15;

/// Convert a high-level NVML error to our error type
pub(crate) fn convert_error(err: nvml_wrapper::error::NvmlError) -> HardwareError {
    use nvml_wrapper::error::NvmlError as NE;
    match err {
        NE::NotSupported => {
            HardwareError::NotSupported("Operation not supported by this GPU".to_string())
        }
        NE::NoPermission => {
            HardwareError::InsufficientPermissions("Insufficient permissions".to_string())
        }
        NE::GpuLost => HardwareError::GpuLost,
        NE::InvalidArg => HardwareError::InvalidArgument("Invalid argument".to_string()),
        _ => HardwareError::Unknown(err.to_string()),
    }
}

fn check(result: nvmlReturn_enum, call: &str) -> Result<(), HardwareError> {
    match result {
        x if x == nvmlReturn_enum_NVML_SUCCESS => Ok(()),
        NVML_ERROR_INVALID_ARGUMENT => Err(HardwareError::InvalidArgument(call.to_string())),
        NVML_ERROR_NOT_SUPPORTED => Err(HardwareError::NotSupported(call.to_string())),
        NVML_ERROR_NO_PERMISSION => Err(HardwareError::InsufficientPermissions(call.to_string())),
        NVML_ERROR_GPU_IS_LOST => Err(HardwareError::GpuLost),
        code => Err(HardwareError::Unknown(format!("{}: NVML error code {}", call, code))),
    }
}

fn load_library() -> Result<Library, HardwareError> {
    // SAFETY: Loading NVML library
    unsafe { Library::new("libnvidia-ml.so.1") }
        .or_else(|_| unsafe { Library::new("libnvidia-ml.so") })
        .map_err(|_| HardwareError::LibraryNotFound)
}

type GetClocksFn = unsafe extern "C" fn(nvmlDevice_t, *mut c_uint, *mut c_uint) -> nvmlReturn_enum;
type GetGraphicsClocksFn =
    unsafe extern "C" fn(nvmlDevice_t, c_uint, *mut c_uint, *mut c_uint) -> nvmlReturn_enum;

/// Call a count/array style query, growing the buffer on INSUFFICIENT_SIZE
fn query_clock_list(
    call: &str,
    mut query: impl FnMut(*mut c_uint, *mut c_uint) -> nvmlReturn_enum,
) -> Result<Vec<u32>, HardwareError> {
    let mut count: c_uint = 0;
    let result = query(&mut count, std::ptr::null_mut());
    if result == nvmlReturn_enum_NVML_SUCCESS && count == 0 {
        return Ok(Vec::new());
    }
    if result != NVML_ERROR_INSUFFICIENT_SIZE && result != nvmlReturn_enum_NVML_SUCCESS {
        check(result, call)?;
    }
    let mut clocks: Vec<c_uint> = vec![0; count as usize];
    check(query(&mut count, clocks.as_mut_ptr()), call)?;
    clocks.truncate(count as usize);
    Ok(clocks)
}

/// Supported core clocks (MHz) at the highest supported memory clock
pub(crate) fn supported_graphics_clocks_raw(handle: nvmlDevice_t) -> Result<Vec<u32>, HardwareError> {
    let lib = load_library()?;

    // SAFETY: Loading function symbols from library
    let mem_func: Symbol<GetClocksFn> = unsafe { lib.get(b"nvmlDeviceGetSupportedMemoryClocks\0") }
        .map_err(|e| HardwareError::NotSupported(format!("Function not available: {}", e)))?;
    let gfx_func: Symbol<GetGraphicsClocksFn> =
        unsafe { lib.get(b"nvmlDeviceGetSupportedGraphicsClocks\0") }
            .map_err(|e| HardwareError::NotSupported(format!("Function not available: {}", e)))?;

    let memory = query_clock_list("nvmlDeviceGetSupportedMemoryClocks", |count, clocks| unsafe {
        mem_func(handle, count, clocks)
    })?;
    let Some(&mem_mhz) = memory.iter().max() else {
        return Ok(Vec::new());
    };
    query_clock_list("nvmlDeviceGetSupportedGraphicsClocks", |count, clocks| unsafe {
        gfx_func(handle, mem_mhz, count, clocks)
    })
}

/// Lock the core clock into `[min_mhz, max_mhz]`
pub(crate) fn set_gpu_locked_clocks_raw(
    handle: nvmlDevice_t,
    min_mhz: u32,
    max_mhz: u32,
) -> Result<(), HardwareError> {
    type SetLockedFn = unsafe extern "C" fn(nvmlDevice_t, c_uint, c_uint) -> nvmlReturn_enum;

    let lib = load_library()?;
    // SAFETY: Loading function symbol from library
    let func: Symbol<SetLockedFn> = unsafe { lib.get(b"nvmlDeviceSetGpuLockedClocks\0") }
        .map_err(|e| HardwareError::NotSupported(format!("Function not available: {}", e)))?;
    let result = unsafe { func(handle, min_mhz, max_mhz) };
    check(result, "nvmlDeviceSetGpuLockedClocks")
}

/// Release a core clock lock
pub(crate) fn reset_gpu_locked_clocks_raw(handle: nvmlDevice_t) -> Result<(), HardwareError> {
    type ResetLockedFn = unsafe extern "C" fn(nvmlDevice_t) -> nvmlReturn_enum;

    let lib = load_library()?;
    // SAFETY: Loading function symbol from library
    let func: Symbol<ResetLockedFn> = unsafe { lib.get(b"nvmlDeviceResetGpuLockedClocks\0") }
        .map_err(|e| HardwareError::NotSupported(format!("Function not available: {}", e)))?;
    let result = unsafe { func(handle) };
    check(result, "nvmlDeviceResetGpuLockedClocks")
}
