//! Device configuration records exchanged between the control plane and the
//! driver.

use serde::{Deserialize, Serialize};

use crate::error::DriverError;

/// One of the PCM sample encodings the codec can translate.
///
/// `S24*` carries 24 significant bits in a 4-byte word; `S24P3*` packs them
/// into 3 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PcmFormat {
    F32Le,
    F32Be,
    S32Le,
    S32Be,
    S24Le,
    S24Be,
    S24P3Le,
    S24P3Be,
    S16Le,
    S16Be,
}

impl PcmFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            PcmFormat::F32Le | PcmFormat::F32Be => 4,
            PcmFormat::S32Le | PcmFormat::S32Be => 4,
            PcmFormat::S24Le | PcmFormat::S24Be => 4,
            PcmFormat::S24P3Le | PcmFormat::S24P3Be => 3,
            PcmFormat::S16Le | PcmFormat::S16Be => 2,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            PcmFormat::F32Le => "32-bit float little-endian",
            PcmFormat::F32Be => "32-bit float big-endian",
            PcmFormat::S32Le => "32-bit integer little-endian",
            PcmFormat::S32Be => "32-bit integer big-endian",
            PcmFormat::S24Le => "24-bit little-endian",
            PcmFormat::S24Be => "24-bit big-endian",
            PcmFormat::S24P3Le => "24-bit little-endian in 3-byte format",
            PcmFormat::S24P3Be => "24-bit big-endian in 3-byte format",
            PcmFormat::S16Le => "16-bit little-endian",
            PcmFormat::S16Be => "16-bit big-endian",
        }
    }

    /// Negotiation preference, best first: float before integer, wide before
    /// narrow, native endianness before foreign.
    pub fn preference_order() -> [PcmFormat; 10] {
        const LE: [PcmFormat; 5] = [
            PcmFormat::F32Le,
            PcmFormat::S32Le,
            PcmFormat::S24Le,
            PcmFormat::S24P3Le,
            PcmFormat::S16Le,
        ];
        const BE: [PcmFormat; 5] = [
            PcmFormat::F32Be,
            PcmFormat::S32Be,
            PcmFormat::S24Be,
            PcmFormat::S24P3Be,
            PcmFormat::S16Be,
        ];
        let (first, second) = if cfg!(target_endian = "big") {
            (BE, LE)
        } else {
            (LE, BE)
        };
        [
            first[0], first[1], first[2], first[3], first[4], second[0], second[1], second[2],
            second[3], second[4],
        ]
    }
}

/// What the control plane asks the driver to open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfigRequest {
    /// Opaque device name, `hw:<card>` or `dummy`.
    pub device: String,
    /// Requested sample rate; the device answers with "nearest".
    pub sample_rate: u32,
    /// Requested period size in frames; "nearest" semantics.
    pub period_frames: u32,
    /// Minimum periods per hardware buffer; fewer is a configuration error.
    pub periods: u32,
}

impl DeviceConfigRequest {
    pub fn validate(&self) -> Result<(), DriverError> {
        if self.sample_rate == 0 || self.period_frames == 0 || self.periods == 0 {
            return Err(DriverError::ConfigRejected(
                "sample rate, period size, and period count must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// What the device actually negotiated. Built during `open()`; all fields are
/// non-zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub sample_rate: u32,
    pub period_frames: u32,
    pub periods: u32,
    pub capture_channels: u32,
    pub playback_channels: u32,
    pub capture_format: PcmFormat,
    pub playback_format: PcmFormat,
}

impl DeviceConfig {
    pub fn capture_frame_bytes(&self) -> usize {
        self.capture_format.bytes_per_sample() * self.capture_channels as usize
    }

    pub fn playback_frame_bytes(&self) -> usize {
        self.playback_format.bytes_per_sample() * self.playback_channels as usize
    }

    /// Size of one period's raw capture buffer.
    pub fn raw_capture_bytes(&self) -> usize {
        self.capture_frame_bytes() * self.period_frames as usize
    }

    /// Size of one period's raw playback buffer.
    pub fn raw_playback_bytes(&self) -> usize {
        self.playback_frame_bytes() * self.period_frames as usize
    }

    pub fn period_duration(&self) -> std::time::Duration {
        std::time::Duration::from_nanos(
            self.period_frames as u64 * 1_000_000_000 / self.sample_rate as u64,
        )
    }
}

/// Names of the device channels and MIDI endpoints the effect graph binds to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSelection {
    /// `system::capture_N` port names, in graph input order.
    pub input_ports: Vec<String>,
    /// `system::playback_N` port names, in graph output order.
    pub output_ports: Vec<String>,
    /// MIDI input endpoints to open.
    pub midi_inputs: Vec<tonestack_midi::MidiEndpointInfo>,
}

impl ChannelSelection {
    /// Binds the first `inputs`/`outputs` device channels.
    pub fn first_channels(inputs: u32, outputs: u32) -> Self {
        Self {
            input_ports: (0..inputs).map(capture_port_name).collect(),
            output_ports: (0..outputs).map(playback_port_name).collect(),
            midi_inputs: Vec::new(),
        }
    }
}

pub fn capture_port_name(channel: u32) -> String {
    format!("system::capture_{channel}")
}

pub fn playback_port_name(channel: u32) -> String {
    format!("system::playback_{channel}")
}

/// Extracts the zero-based channel index from a `system::capture_N` /
/// `system::playback_N` port name.
pub fn port_channel_index(port: &str) -> Option<usize> {
    let (_, index) = port.rsplit_once('_')?;
    index.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_names_round_trip() {
        assert_eq!(port_channel_index(&capture_port_name(0)), Some(0));
        assert_eq!(port_channel_index(&playback_port_name(11)), Some(11));
        assert_eq!(port_channel_index("system::capture"), None);
        assert_eq!(port_channel_index("system::capture_x"), None);
    }

    #[test]
    fn preference_order_starts_native() {
        let order = PcmFormat::preference_order();
        if cfg!(target_endian = "little") {
            assert_eq!(order[0], PcmFormat::F32Le);
            assert_eq!(order[5], PcmFormat::F32Be);
        } else {
            assert_eq!(order[0], PcmFormat::F32Be);
        }
        assert_eq!(order.len(), 10);
    }

    #[test]
    fn zero_fields_are_rejected() {
        let request = DeviceConfigRequest {
            device: "hw:0".into(),
            sample_rate: 48_000,
            period_frames: 0,
            periods: 3,
        };
        assert!(request.validate().is_err());
    }
}
