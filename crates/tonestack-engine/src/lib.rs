//! Tonestack Engine
//! ================
//! Realtime audio core for the tonestack guitar-effects appliance. This
//! crate bridges a duplex audio device with an externally owned pedalboard:
//! it negotiates the device configuration, translates between the device's
//! PCM encoding and planar floats, decodes raw MIDI streams into per-period
//! events, and sustains the hard realtime period loop with automatic XRUN
//! recovery — while a non-realtime control bridge reconfigures everything
//! without ever blocking the audio path.

pub mod codec;
pub mod config;
pub mod cpu;
pub mod device;
pub mod devices;
pub mod error;
pub mod graph;
pub mod host;
mod rt_loop;
pub mod telemetry;

pub use codec::SampleCodec;
pub use config::{
    capture_port_name, playback_port_name, port_channel_index, ChannelSelection, DeviceConfig,
    DeviceConfigRequest, PcmFormat,
};
pub use device::{AudioDevice, RecoveryKind};
pub use devices::AudioDeviceInfo;
pub use error::DriverError;
pub use graph::{EffectGraph, GraphSlot, PatchOp, PatchRequest, ProcessContext};
pub use host::AudioHost;
pub use rt_loop::{DriverHost, RT_PRIORITY};
pub use telemetry::{EngineStatus, Telemetry};
