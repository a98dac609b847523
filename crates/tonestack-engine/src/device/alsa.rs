//! ALSA transport: one linked capture + playback PCM pair on the same card.
//!
//! Negotiation follows the device's preferences only where ours run out:
//! formats are tried best-first (float, then wide integers, native
//! endianness first), rate and period size use "nearest" semantics, and the
//! period count may grow but never shrink below the requested minimum.

use std::time::Duration;

use alsa::pcm::{Access, Format, Frames, HwParams, PCM};
use alsa::{Direction, ValueOr};

use crate::config::{DeviceConfig, DeviceConfigRequest, PcmFormat};
use crate::device::{AudioDevice, RecoveryKind};
use crate::error::DriverError;

/// Bounded retry for the playback pre-fill loop.
const PREFILL_RETRIES: u32 = 5;
const PREFILL_RETRY_DELAY: Duration = Duration::from_millis(100);
const RESUME_RETRY_DELAY: Duration = Duration::from_secs(1);

pub struct AlsaDevice {
    device_name: String,
    capture: Option<PCM>,
    playback: Option<PCM>,
    config: Option<DeviceConfig>,
    linked: bool,
    silence: Vec<u8>,
}

impl AlsaDevice {
    pub fn new() -> Self {
        Self {
            device_name: String::new(),
            capture: None,
            playback: None,
            config: None,
            linked: false,
            silence: Vec::new(),
        }
    }

    fn handles(&self) -> Result<(&PCM, &PCM, &DeviceConfig), DriverError> {
        match (&self.capture, &self.playback, &self.config) {
            (Some(capture), Some(playback), Some(config)) => Ok((capture, playback, config)),
            _ => Err(DriverError::NotOpen),
        }
    }

    /// Writes silence until the playback buffer reports no free space, so a
    /// start or recovery begins with a full buffer of headroom.
    fn fill_playback(&self) -> Result<(), DriverError> {
        let (_, playback, config) = self.handles()?;
        let frame_bytes = config.playback_frame_bytes();
        let mut retry = 0;
        loop {
            let avail = match playback.avail() {
                Ok(avail) => avail,
                Err(_) => {
                    retry += 1;
                    if retry >= PREFILL_RETRIES {
                        return Err(DriverError::Unrecoverable(
                            "timed out trying to fill the audio output buffer".into(),
                        ));
                    }
                    playback.prepare().map_err(|err| {
                        DriverError::Unrecoverable(format!("audio playback failed: {err}"))
                    })?;
                    std::thread::sleep(PREFILL_RETRY_DELAY);
                    continue;
                }
            };
            if avail <= 0 {
                break;
            }
            let frames = (avail as u64).min(config.period_frames as u64) as usize;
            write_frames(playback, &self.silence[..frames * frame_bytes], frame_bytes)
                .map_err(|err| {
                    DriverError::Unrecoverable(format!("audio playback failed: {err}"))
                })?;
        }
        Ok(())
    }
}

impl Default for AlsaDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioDevice for AlsaDevice {
    fn open(&mut self, request: &DeviceConfigRequest) -> Result<DeviceConfig, DriverError> {
        request.validate()?;
        self.close();
        self.device_name = request.device.clone();

        let playback = open_pcm(&request.device, Direction::Playback)?;
        let capture = open_pcm(&request.device, Direction::Capture)?;

        let mut rate = request.sample_rate;
        let mut period_frames = request.period_frames;
        let mut periods = request.periods;

        let (capture_format, capture_channels) = configure_stream(
            &capture,
            &request.device,
            "capture",
            Direction::Capture,
            &mut rate,
            &mut period_frames,
            &mut periods,
            request.periods,
        )?;
        let (playback_format, playback_channels) = configure_stream(
            &playback,
            &request.device,
            "playback",
            Direction::Playback,
            &mut rate,
            &mut period_frames,
            &mut periods,
            request.periods,
        )?;

        self.linked = playback.link(&capture).is_ok();
        if !self.linked {
            tracing::warn!(
                device = %request.device,
                "capture and playback endpoints could not be linked; streams run unsynchronised"
            );
        }

        let config = DeviceConfig {
            sample_rate: rate,
            period_frames,
            periods,
            capture_channels,
            playback_channels,
            capture_format,
            playback_format,
        };
        self.silence = vec![0; config.raw_playback_bytes()];
        self.capture = Some(capture);
        self.playback = Some(playback);
        self.config = Some(config.clone());
        Ok(config)
    }

    fn start(&mut self) -> Result<(), DriverError> {
        self.fill_playback()?;
        let (capture, _, _) = self.handles()?;
        capture
            .start()
            .map_err(|err| DriverError::Io(format!("unable to start capture: {err}")))
    }

    fn read_capture(&mut self, raw: &mut [u8], frames: u32) -> Result<(), DriverError> {
        let (capture, _, config) = self.handles()?;
        let frame_bytes = config.capture_frame_bytes();
        let total = frames as usize * frame_bytes;
        let io = capture.io_bytes();
        let mut offset = 0;
        while offset < total {
            match io.readi(&mut raw[offset..total]) {
                Ok(0) => {
                    let _ = capture.wait(Some(1));
                }
                Ok(read) => offset += read * frame_bytes,
                Err(err) => return Err(map_stream_error(err, Direction::Capture)),
            }
        }
        Ok(())
    }

    fn write_playback(&mut self, raw: &[u8], frames: u32) -> Result<(), DriverError> {
        let (_, playback, config) = self.handles()?;
        let frame_bytes = config.playback_frame_bytes();
        let total = frames as usize * frame_bytes;
        write_frames(playback, &raw[..total], frame_bytes)
            .map_err(|err| map_stream_error(err, Direction::Playback))
    }

    fn recover(&mut self, kind: RecoveryKind) -> Result<(), DriverError> {
        let unrecoverable =
            |what: &str, err: alsa::Error| DriverError::Unrecoverable(format!("{what}: {err}"));
        match kind {
            RecoveryKind::XrunCapture => {
                {
                    let (capture, playback, _) = self.handles()?;
                    let _ = capture.unlink();
                    capture
                        .drop()
                        .map_err(|e| unrecoverable("cannot drop capture stream", e))?;
                    playback
                        .drop()
                        .map_err(|e| unrecoverable("cannot drop playback stream", e))?;
                    playback
                        .prepare()
                        .map_err(|e| unrecoverable("cannot prepare playback stream", e))?;
                    capture
                        .prepare()
                        .map_err(|e| unrecoverable("cannot prepare capture stream", e))?;
                }
                self.fill_playback()?;
                let relink_failed = {
                    let (capture, playback, _) = self.handles()?;
                    self.linked && capture.link(playback).is_err()
                };
                if relink_failed {
                    tracing::warn!(device = %self.device_name, "could not relink streams after xrun");
                    self.linked = false;
                }
                let (capture, _, _) = self.handles()?;
                capture
                    .start()
                    .map_err(|e| unrecoverable("cannot restart capture stream", e))
            }
            RecoveryKind::XrunPlayback => {
                {
                    let (_, playback, _) = self.handles()?;
                    playback
                        .prepare()
                        .map_err(|e| unrecoverable("cannot recover from playback underrun", e))?;
                }
                self.fill_playback()
            }
            RecoveryKind::Suspended => {
                let (capture, _, _) = self.handles()?;
                loop {
                    match capture.resume() {
                        Ok(()) => break,
                        Err(err) if err.errno() == libc::EAGAIN => {
                            std::thread::sleep(RESUME_RETRY_DELAY);
                        }
                        Err(_) => {
                            capture
                                .prepare()
                                .map_err(|e| unrecoverable("cannot recover from suspend", e))?;
                            break;
                        }
                    }
                }
                Ok(())
            }
        }
    }

    fn close(&mut self) {
        self.capture = None;
        self.playback = None;
        self.config = None;
        self.linked = false;
        self.silence.clear();
    }

    fn config(&self) -> Option<&DeviceConfig> {
        self.config.as_ref()
    }

    fn description(&self) -> String {
        match &self.config {
            Some(config) => format!(
                "ALSA, {}, {}, {}, {}x{}, in: {}, out: {}",
                self.device_name,
                config.capture_format.description(),
                config.sample_rate,
                config.period_frames,
                config.periods,
                config.capture_channels,
                config.playback_channels
            ),
            None => format!("ALSA, {} (closed)", self.device_name),
        }
    }
}

fn open_pcm(name: &str, direction: Direction) -> Result<PCM, DriverError> {
    PCM::new(name, direction, false).map_err(|err| match err.errno() {
        libc::EBUSY => DriverError::DeviceBusy(format!(
            "Device {name} is in use. Stop the application using it and try again."
        )),
        libc::EPERM | libc::EACCES => DriverError::PermissionDenied(name.to_string()),
        _ => DriverError::Io(format!("unexpected error opening device '{name}': {err}")),
    })
}

#[allow(clippy::too_many_arguments)]
fn configure_stream(
    pcm: &PCM,
    device: &str,
    stream: &str,
    direction: Direction,
    rate: &mut u32,
    period_frames: &mut u32,
    periods: &mut u32,
    min_periods: u32,
) -> Result<(PcmFormat, u32), DriverError> {
    let rejected = |what: String| DriverError::ConfigRejected(what);

    let hwp = HwParams::any(pcm)
        .map_err(|e| rejected(format!("no {stream} configurations available ({device}): {e}")))?;
    hwp.set_access(Access::RWInterleaved)
        .map_err(|e| rejected(format!("interleaved access rejected ({device}/{stream}): {e}")))?;

    let format = set_preferred_format(&hwp, device, stream)?;

    hwp.set_rate(*rate, ValueOr::Nearest).map_err(|e| {
        rejected(format!(
            "can't set sample rate to {rate} ({device}/{stream}): {e}"
        ))
    })?;
    *rate = hwp
        .get_rate()
        .map_err(|e| rejected(format!("can't read negotiated rate ({device}): {e}")))?;

    let channels_max = hwp
        .get_channels_max()
        .map_err(|e| rejected(format!("can't get channels_max ({device}): {e}")))?;
    let channels_min = hwp.get_channels_min().unwrap_or(1);
    let mut channels = channels_max;
    if channels_max > 2 && (1..=2).contains(&channels_min) && hwp.set_channels(2).is_ok() {
        channels = 2;
    } else {
        if channels > 1024 {
            // The default PCM device reports effectively unlimited channels.
            channels = 2;
        }
        hwp.set_channels(channels).map_err(|e| {
            rejected(format!(
                "can't set channel count to {channels} ({device}/{stream}): {e}"
            ))
        })?;
    }

    let chosen = hwp
        .set_period_size_near(*period_frames as Frames, ValueOr::Nearest)
        .map_err(|e| {
            rejected(format!(
                "can't set period size to {period_frames} ({device}/{stream}): {e}"
            ))
        })?;
    *period_frames = chosen as u32;

    hwp.set_periods(*periods, ValueOr::Nearest).map_err(|e| {
        rejected(format!(
            "can't set number of periods to {periods} ({device}/{stream}): {e}"
        ))
    })?;
    let negotiated_periods = hwp
        .get_periods()
        .map_err(|e| rejected(format!("can't read negotiated periods ({device}): {e}")))?;
    if negotiated_periods < min_periods {
        return Err(rejected(format!(
            "got smaller periods {negotiated_periods} than {min_periods} ({device}/{stream})"
        )));
    }
    *periods = negotiated_periods;

    pcm.hw_params(&hwp)
        .map_err(|e| rejected(format!("cannot set hardware parameters for {device}: {e}")))?;

    let swp = pcm
        .sw_params_current()
        .map_err(|e| DriverError::Io(format!("cannot read software parameters: {e}")))?;
    let start_threshold: Frames = match direction {
        // Capture starts explicitly; playback is started by the link (or by
        // the first write) only once pre-filled.
        Direction::Capture => 0,
        Direction::Playback => 0x7fff_ffff,
    };
    swp.set_start_threshold(start_threshold)
        .map_err(|e| rejected(format!("cannot set start mode for {device}: {e}")))?;
    swp.set_stop_threshold(*periods as Frames * *period_frames as Frames)
        .map_err(|e| rejected(format!("cannot set stop mode for {device}: {e}")))?;
    let avail_min: Frames = match direction {
        Direction::Playback => {
            *period_frames as Frames * (*periods - min_periods + 1) as Frames
        }
        Direction::Capture => *period_frames as Frames,
    };
    swp.set_avail_min(avail_min)
        .map_err(|e| rejected(format!("cannot set avail min for {device}: {e}")))?;
    pcm.sw_params(&swp)
        .map_err(|e| rejected(format!("cannot set software parameters for {device}: {e}")))?;

    pcm.prepare()
        .map_err(|e| DriverError::Io(format!("ALSA prepare failed: {e}")))?;

    Ok((format, channels))
}

/// Tries formats best-first; a failed set leaves the parameter space
/// untouched, so the next candidate can be tried directly.
fn set_preferred_format(
    hwp: &HwParams,
    device: &str,
    stream: &str,
) -> Result<PcmFormat, DriverError> {
    for format in PcmFormat::preference_order() {
        if hwp.set_format(alsa_format(format)).is_ok() {
            return Ok(format);
        }
    }
    Err(DriverError::NoSupportedFormat(format!("{device}/{stream}")))
}

fn alsa_format(format: PcmFormat) -> Format {
    match format {
        PcmFormat::F32Le => Format::FloatLE,
        PcmFormat::F32Be => Format::FloatBE,
        PcmFormat::S32Le => Format::S32LE,
        PcmFormat::S32Be => Format::S32BE,
        PcmFormat::S24Le => Format::S24LE,
        PcmFormat::S24Be => Format::S24BE,
        PcmFormat::S24P3Le => Format::S243LE,
        PcmFormat::S24P3Be => Format::S243BE,
        PcmFormat::S16Le => Format::S16LE,
        PcmFormat::S16Be => Format::S16BE,
    }
}

fn write_frames(pcm: &PCM, mut buf: &[u8], frame_bytes: usize) -> Result<(), alsa::Error> {
    let io = pcm.io_bytes();
    while !buf.is_empty() {
        match io.writei(buf) {
            Ok(written) => buf = &buf[written * frame_bytes..],
            Err(err) if err.errno() == libc::EAGAIN => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

fn map_stream_error(err: alsa::Error, direction: Direction) -> DriverError {
    match err.errno() {
        libc::EPIPE => match direction {
            Direction::Capture => DriverError::XrunCapture,
            Direction::Playback => DriverError::XrunPlayback,
        },
        libc::ESTRPIPE => DriverError::Suspended,
        _ => DriverError::Io(format!("audio {direction:?} failed: {err}")),
    }
}
