//! COM apartment setup for capture threads.

use windows::Win32::Foundation::{RPC_E_CHANGED_MODE, S_FALSE};
use windows::Win32::System::Com::{CoInitializeEx, COINIT_MULTITHREADED};

use crate::error::CaptureError;
use crate::CaptureResult;

/// Join the multithreaded apartment on the current thread.
///
/// A thread that is already initialized, in either apartment model, is
/// accepted as is.
pub fn ensure_com_initialized() -> CaptureResult<()> {
    let result = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) };
    if result.is_ok() || result == S_FALSE || result == RPC_E_CHANGED_MODE {
        return Ok(());
    }

    Err(CaptureError::WindowsApi {
        message: "Failed to initialize COM".to_string(),
        source: Some(result.into()),
    })
}
