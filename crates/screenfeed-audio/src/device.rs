//! Default render endpoint lookup.

use tracing::{debug, instrument};
use windows::core::GUID;
use windows::Win32::Media::Audio::{eConsole, eRender, IMMDevice, IMMDeviceEnumerator, MMDeviceEnumerator};
use windows::Win32::System::Com::{CoCreateInstance, CLSCTX_ALL, STGM_READ};
use windows::Win32::UI::Shell::PropertiesSystem::{IPropertyStore, PROPERTYKEY};

use screenfeed_core::{ensure_com_initialized, CaptureError, CaptureResult};

/// PKEY_Device_FriendlyName
const DEVICE_FRIENDLY_NAME: PROPERTYKEY = PROPERTYKEY {
    fmtid: GUID::from_u128(0xa45c254e_df1c_4efd_8020_67d146a850e0),
    pid: 14,
};

/// The default render endpoint, whose mix is what loopback captures.
#[instrument(name = "audio_default_render_device")]
pub fn default_render_device() -> CaptureResult<IMMDevice> {
    ensure_com_initialized()?;

    let enumerator: IMMDeviceEnumerator =
        unsafe { CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)? };

    let device = unsafe {
        enumerator
            .GetDefaultAudioEndpoint(eRender, eConsole)
            .map_err(|e| CaptureError::WindowsApi {
                message: "No default audio render device".to_string(),
                source: Some(e),
            })?
    };

    debug!(name = %friendly_name(&device), "Resolved default render device");
    Ok(device)
}

/// Human-readable endpoint name, for logging only.
pub fn friendly_name(device: &IMMDevice) -> String {
    let name = unsafe {
        device
            .OpenPropertyStore(STGM_READ)
            .and_then(|store: IPropertyStore| store.GetValue(&DEVICE_FRIENDLY_NAME))
            .map(|value| value.to_string())
    };

    match name {
        Ok(name) if !name.is_empty() => name,
        _ => "Unknown".to_string(),
    }
}
