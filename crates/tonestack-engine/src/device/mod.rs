//! Duplex audio device transports.
//!
//! The realtime loop drives one capture and one playback endpoint through the
//! [`AudioDevice`] trait. The production transport speaks ALSA; a dummy
//! transport paces silence for hardware-less operation, and tests script
//! their own implementations to inject faults.

#[cfg(all(target_os = "linux", feature = "alsa-backend"))]
pub mod alsa;
pub mod dummy;

use crate::config::{DeviceConfig, DeviceConfigRequest};
use crate::error::DriverError;

/// Which recovery path to run after a transport error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryKind {
    XrunCapture,
    XrunPlayback,
    Suspended,
}

/// A full-duplex period-oriented audio transport.
///
/// Lifecycle: `open` negotiates the configuration and leaves both endpoints
/// prepared; `start` pre-fills playback with silence and starts capture;
/// `read_capture`/`write_playback` move whole periods, resuming partial
/// transfers internally; `recover` resynchronises after an XRUN or suspend;
/// `close` is idempotent and safe at any point.
pub trait AudioDevice: Send {
    fn open(&mut self, request: &DeviceConfigRequest) -> Result<DeviceConfig, DriverError>;

    fn start(&mut self) -> Result<(), DriverError>;

    /// Blocks until `frames` frames are delivered into `raw` or an error
    /// occurs.
    fn read_capture(&mut self, raw: &mut [u8], frames: u32) -> Result<(), DriverError>;

    /// Blocks until all `frames` frames from `raw` are queued for playback.
    fn write_playback(&mut self, raw: &[u8], frames: u32) -> Result<(), DriverError>;

    /// Returns the device to a running, resynchronised state with playback
    /// pre-filled.
    fn recover(&mut self, kind: RecoveryKind) -> Result<(), DriverError>;

    fn close(&mut self);

    fn config(&self) -> Option<&DeviceConfig>;

    /// One-line human-readable summary of the negotiated configuration.
    fn description(&self) -> String;
}

/// Opens the transport named by `request.device` and negotiates its
/// configuration.
///
/// `dummy` (optionally `dummy:<channels>`) selects the silence transport;
/// anything else is handed to the ALSA transport where available.
pub fn open_device(
    request: &DeviceConfigRequest,
) -> Result<(Box<dyn AudioDevice>, DeviceConfig), DriverError> {
    request.validate()?;
    let mut device: Box<dyn AudioDevice> = if request.device.starts_with("dummy") {
        Box::new(dummy::DummyDevice::from_device_name(&request.device))
    } else {
        #[cfg(all(target_os = "linux", feature = "alsa-backend"))]
        {
            Box::new(alsa::AlsaDevice::new())
        }
        #[cfg(not(all(target_os = "linux", feature = "alsa-backend")))]
        {
            return Err(DriverError::ConfigRejected(format!(
                "no audio backend available for device '{}'",
                request.device
            )));
        }
    };
    let config = device.open(request)?;
    Ok((device, config))
}
