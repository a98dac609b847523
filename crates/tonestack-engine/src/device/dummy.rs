//! Silence-generating transport used when no audio hardware is present.
//!
//! Capture delivers zeroed periods paced to the configured sample rate so
//! the realtime loop and everything above it behave exactly as with real
//! hardware; playback accepts and discards all frames.

use std::time::{Duration, Instant};

use crate::config::{DeviceConfig, DeviceConfigRequest, PcmFormat};
use crate::device::{AudioDevice, RecoveryKind};
use crate::error::DriverError;

const DEFAULT_CHANNELS: u32 = 2;

pub struct DummyDevice {
    channels: u32,
    config: Option<DeviceConfig>,
    next_period: Option<Instant>,
}

impl DummyDevice {
    pub fn new(channels: u32) -> Self {
        Self {
            channels: channels.max(1),
            config: None,
            next_period: None,
        }
    }

    /// Parses `dummy` or `dummy:<channels>`.
    pub fn from_device_name(name: &str) -> Self {
        let channels = name
            .split_once(':')
            .and_then(|(_, n)| n.parse().ok())
            .unwrap_or(DEFAULT_CHANNELS);
        Self::new(channels)
    }

    fn native_format() -> PcmFormat {
        if cfg!(target_endian = "big") {
            PcmFormat::F32Be
        } else {
            PcmFormat::F32Le
        }
    }
}

impl AudioDevice for DummyDevice {
    fn open(&mut self, request: &DeviceConfigRequest) -> Result<DeviceConfig, DriverError> {
        request.validate()?;
        let config = DeviceConfig {
            sample_rate: request.sample_rate,
            period_frames: request.period_frames,
            periods: request.periods,
            capture_channels: self.channels,
            playback_channels: self.channels,
            capture_format: Self::native_format(),
            playback_format: Self::native_format(),
        };
        self.config = Some(config.clone());
        self.next_period = None;
        Ok(config)
    }

    fn start(&mut self) -> Result<(), DriverError> {
        let config = self.config.as_ref().ok_or(DriverError::NotOpen)?;
        self.next_period = Some(Instant::now() + config.period_duration());
        Ok(())
    }

    fn read_capture(&mut self, raw: &mut [u8], frames: u32) -> Result<(), DriverError> {
        let config = self.config.as_ref().ok_or(DriverError::NotOpen)?;
        let deadline = self.next_period.ok_or(DriverError::NotOpen)?;

        let now = Instant::now();
        if deadline > now {
            std::thread::sleep(deadline - now);
        }
        let period = Duration::from_nanos(
            frames as u64 * 1_000_000_000 / config.sample_rate as u64,
        );
        self.next_period = Some(deadline + period);

        let bytes = frames as usize * config.capture_frame_bytes();
        raw[..bytes].fill(0);
        Ok(())
    }

    fn write_playback(&mut self, _raw: &[u8], _frames: u32) -> Result<(), DriverError> {
        if self.config.is_none() {
            return Err(DriverError::NotOpen);
        }
        Ok(())
    }

    fn recover(&mut self, _kind: RecoveryKind) -> Result<(), DriverError> {
        self.start()
    }

    fn close(&mut self) {
        self.config = None;
        self.next_period = None;
    }

    fn config(&self) -> Option<&DeviceConfig> {
        self.config.as_ref()
    }

    fn description(&self) -> String {
        match &self.config {
            Some(config) => format!(
                "Dummy, {} Hz, {}x{}, {} channels",
                config.sample_rate, config.period_frames, config.periods, self.channels
            ),
            None => "Dummy (closed)".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> DeviceConfigRequest {
        DeviceConfigRequest {
            device: "dummy".into(),
            sample_rate: 48_000,
            period_frames: 48,
            periods: 3,
        }
    }

    #[test]
    fn delivers_paced_silent_periods() {
        let mut device = DummyDevice::new(2);
        let config = device.open(&request()).unwrap();
        device.start().unwrap();

        let mut raw = vec![0xAAu8; config.raw_capture_bytes()];
        let started = Instant::now();
        for _ in 0..4 {
            device.read_capture(&mut raw, config.period_frames).unwrap();
        }
        // 4 periods of 1 ms each, allowing generous scheduler slack.
        assert!(started.elapsed() >= Duration::from_millis(3));
        assert!(raw.iter().all(|&b| b == 0));
        device
            .write_playback(&raw, config.period_frames)
            .unwrap();
    }

    #[test]
    fn close_then_reopen() {
        let mut device = DummyDevice::from_device_name("dummy:4");
        let config = device.open(&request()).unwrap();
        assert_eq!(config.capture_channels, 4);
        device.close();
        device.close();
        let mut raw = [0u8; 16];
        assert!(matches!(
            device.read_capture(&mut raw, 1),
            Err(DriverError::NotOpen)
        ));
        assert!(device.open(&request()).is_ok());
    }
}
