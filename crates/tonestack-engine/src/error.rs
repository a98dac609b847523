use thiserror::Error;

use crate::device::RecoveryKind;

/// Errors crossing the driver boundary.
///
/// The recoverable kinds (`XrunCapture`, `XrunPlayback`, `Suspended`) never
/// leave the audio thread: the realtime loop feeds them straight back into
/// [`AudioDevice::recover`](crate::device::AudioDevice::recover). Everything
/// else is fatal for the current session.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("{0}")]
    ConfigRejected(String),
    #[error("{0}")]
    DeviceBusy(String),
    #[error("permission denied opening device '{0}'")]
    PermissionDenied(String),
    #[error("no supported audio formats ({0})")]
    NoSupportedFormat(String),
    #[error("capture overrun")]
    XrunCapture,
    #[error("playback underrun")]
    XrunPlayback,
    #[error("device suspended")]
    Suspended,
    #[error("{0}")]
    Unrecoverable(String),
    #[error("device not open")]
    NotOpen,
    #[error("{0}")]
    InvalidState(String),
    #[error("audio I/O failed: {0}")]
    Io(String),
}

impl DriverError {
    /// The recovery path to take, if this error has one.
    pub fn recovery_kind(&self) -> Option<RecoveryKind> {
        match self {
            DriverError::XrunCapture => Some(RecoveryKind::XrunCapture),
            DriverError::XrunPlayback => Some(RecoveryKind::XrunPlayback),
            DriverError::Suspended => Some(RecoveryKind::Suspended),
            _ => None,
        }
    }
}
