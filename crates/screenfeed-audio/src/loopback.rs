//! WASAPI loopback capture of the system mix.

use std::ptr;
use std::slice;
use std::thread::{self, JoinHandle};

use tracing::{info, instrument, warn};
use windows::core::GUID;
use windows::Win32::Media::Audio::{
    IAudioCaptureClient, IAudioClient, AUDCLNT_BUFFERFLAGS_SILENT, AUDCLNT_SHAREMODE_SHARED,
    AUDCLNT_STREAMFLAGS_LOOPBACK, WAVEFORMATEX, WAVEFORMATEXTENSIBLE,
};
use windows::Win32::System::Com::{CoTaskMemFree, CLSCTX_ALL};

use screenfeed_core::{
    ensure_com_initialized, AudioSourceFormat, CaptureConfig, CaptureError, CaptureResult,
    CaptureSession, Clock, Lifecycle, MediaSink, RunState, SourceKind, SourceSelector,
    StopBehavior, WAVE_FORMAT_EXTENSIBLE,
};

use crate::device::{default_render_device, friendly_name};
use crate::pump::{AudioPump, PacketSource, RawPacket};

/// Shared-mode buffer duration: 20 ms in 100 ns units.
const BUFFER_DURATION_HNS: i64 = 200_000;

/// KSDATAFORMAT_SUBTYPE_IEEE_FLOAT
const SUBTYPE_IEEE_FLOAT: GUID = GUID::from_u128(0x00000003_0000_0010_8000_00aa00389b71);

/// Size of the extension that follows a `WAVEFORMATEX` in a
/// `WAVEFORMATEXTENSIBLE`.
const EXTENSIBLE_EXTRA_BYTES: u16 = 22;

/// Mix format returned by `GetMixFormat`, freed on drop.
struct MixFormat(*mut WAVEFORMATEX);

impl MixFormat {
    fn as_ptr(&self) -> *const WAVEFORMATEX {
        self.0
    }

    fn describe(&self) -> AudioSourceFormat {
        // SAFETY: the pointer came from GetMixFormat and stays valid until
        // drop. Both structs are packed, so fields are copied out.
        let wave = unsafe { ptr::read_unaligned(self.0) };
        let format_tag = wave.wFormatTag;
        let extensible_is_float = format_tag == WAVE_FORMAT_EXTENSIBLE
            && wave.cbSize >= EXTENSIBLE_EXTRA_BYTES
            && {
                let ext = unsafe { ptr::read_unaligned(self.0 as *const WAVEFORMATEXTENSIBLE) };
                let sub_format = ext.SubFormat;
                sub_format == SUBTYPE_IEEE_FLOAT
            };

        AudioSourceFormat::from_wave_format(
            format_tag,
            wave.nChannels,
            wave.nSamplesPerSec,
            wave.wBitsPerSample,
            extensible_is_float,
        )
    }
}

impl Drop for MixFormat {
    fn drop(&mut self) {
        unsafe { CoTaskMemFree(Some(self.0 as *const _)) };
    }
}

/// An initialized loopback stream.
struct WasapiStream {
    client: IAudioClient,
    capture: IAudioCaptureClient,
    block_align: usize,
}

// SAFETY: the interfaces are created in the multithreaded apartment and the
// stream is only used by one thread at a time, moving to the capture thread
// on start.
unsafe impl Send for WasapiStream {}

impl PacketSource for WasapiStream {
    fn next_packet_size(&mut self) -> CaptureResult<u32> {
        Ok(unsafe { self.capture.GetNextPacketSize()? })
    }

    fn with_next_packet<R>(&mut self, f: impl FnOnce(RawPacket<'_>) -> R) -> CaptureResult<R> {
        let mut data = ptr::null_mut();
        let mut frames = 0u32;
        let mut flags = 0u32;

        unsafe {
            self.capture
                .GetBuffer(&mut data, &mut frames, &mut flags, None, None)?;
        }

        let silent = flags & AUDCLNT_BUFFERFLAGS_SILENT.0 as u32 != 0;
        let bytes: &[u8] = if silent || data.is_null() {
            &[]
        } else {
            // SAFETY: GetBuffer returned `frames` frames of `block_align`
            // bytes, valid until ReleaseBuffer below.
            unsafe { slice::from_raw_parts(data, frames as usize * self.block_align) }
        };

        let result = f(RawPacket {
            data: bytes,
            frames,
            silent,
        });

        unsafe { self.capture.ReleaseBuffer(frames)? };
        Ok(result)
    }
}

/// Handle used by the owner thread to stop a stream the capture thread
/// is reading.
struct StreamControl(IAudioClient);

// SAFETY: see `WasapiStream`.
unsafe impl Send for StreamControl {}

struct Prepared {
    stream: WasapiStream,
    format: AudioSourceFormat,
}

/// Captures what the default render device plays.
///
/// Packets are normalized to 48 kHz stereo `i16` with an `MCAP` header and
/// timestamped in milliseconds since `start`.
pub struct LoopbackCapturer {
    lifecycle: Lifecycle,
    prepared: Option<Prepared>,
    control: Option<StreamControl>,
    worker: Option<JoinHandle<()>>,
}

impl Default for LoopbackCapturer {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackCapturer {
    pub fn new() -> Self {
        Self {
            lifecycle: Lifecycle::new(),
            prepared: None,
            control: None,
            worker: None,
        }
    }

    fn open_stream() -> CaptureResult<Prepared> {
        let device = default_render_device()?;
        let client: IAudioClient = unsafe { device.Activate(CLSCTX_ALL, None)? };

        let mix = MixFormat(unsafe { client.GetMixFormat()? });
        let format = mix.describe();
        let layout = format.layout()?;

        unsafe {
            client.Initialize(
                AUDCLNT_SHAREMODE_SHARED,
                AUDCLNT_STREAMFLAGS_LOOPBACK,
                BUFFER_DURATION_HNS,
                0,
                mix.as_ptr(),
                None,
            )?;
        }

        let capture: IAudioCaptureClient = unsafe { client.GetService()? };

        info!(
            device = %friendly_name(&device),
            sample_rate = format.sample_rate,
            channels = format.channels,
            bits = format.bits_per_sample,
            layout = ?layout,
            "Loopback stream initialized"
        );

        Ok(Prepared {
            stream: WasapiStream {
                client,
                capture,
                block_align: format.bytes_per_frame(),
            },
            format,
        })
    }

    fn spawn(&mut self, prepared: Prepared, mut sink: MediaSink) -> CaptureResult<()> {
        let Prepared { stream, format } = prepared;
        let control = StreamControl(stream.client.clone());
        let clock = Clock::starting_now();
        info!(
            process_offset_ms = Clock::process().ms_at(clock.epoch()),
            "Audio clock started"
        );
        let mut pump = AudioPump::new(stream, format, clock)?;

        unsafe { control.0.Start()? };

        let lifecycle = self.lifecycle.clone();
        let spawned = thread::Builder::new()
            .name("screenfeed-audio".to_string())
            .spawn(move || {
                if let Err(e) = ensure_com_initialized() {
                    warn!("Audio capture thread could not join COM: {}", e);
                    lifecycle.fail();
                    return;
                }
                pump.run(&lifecycle, &mut sink);
            });

        match spawned {
            Ok(worker) => {
                self.control = Some(control);
                self.worker = Some(worker);
                Ok(())
            }
            Err(e) => {
                unsafe {
                    let _ = control.0.Stop();
                }
                Err(e.into())
            }
        }
    }
}

impl CaptureSession for LoopbackCapturer {
    fn kind(&self) -> SourceKind {
        SourceKind::SystemAudio
    }

    fn stop_behavior(&self) -> StopBehavior {
        StopBehavior::Quiescent
    }

    #[instrument(name = "audio_capture_initialize", skip(self, config))]
    fn initialize(&mut self, config: &CaptureConfig) -> CaptureResult<()> {
        drop(self.lifecycle.begin_reinitialize(&mut self.prepared)?);
        if config.source != SourceSelector::SystemAudio {
            return Err(CaptureError::InvalidConfig(format!(
                "loopback capture cannot open {:?}",
                config.source
            )));
        }

        self.prepared = Some(Self::open_stream()?);
        self.lifecycle.mark_initialized();
        Ok(())
    }

    #[instrument(name = "audio_capture_start", skip(self, sink))]
    fn start(&mut self, sink: MediaSink) -> CaptureResult<()> {
        self.lifecycle.begin_start()?;

        let Some(prepared) = self.prepared.take() else {
            self.lifecycle.abort_start();
            return Err(CaptureError::NotInitialized);
        };

        if let Err(e) = self.spawn(prepared, sink) {
            // The stream was consumed; a new initialize is required.
            self.lifecycle.stop();
            return Err(e);
        }

        info!("Audio capture started");
        Ok(())
    }

    #[instrument(name = "audio_capture_stop", skip(self))]
    fn stop(&mut self) -> CaptureResult<()> {
        if self.lifecycle.stop() == RunState::Uninitialized {
            return Ok(());
        }

        if let Some(control) = self.control.take() {
            unsafe {
                let _ = control.0.Stop();
            }
        }

        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Audio capture thread panicked");
            }
            info!("Audio capture stopped");
        }

        self.prepared = None;
        Ok(())
    }

    fn state(&self) -> RunState {
        self.lifecycle.state()
    }
}

impl Drop for LoopbackCapturer {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
