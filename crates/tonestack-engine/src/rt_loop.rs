//! The audio thread: one long-running period loop at elevated priority.
//!
//! Per period: drain control commands, drain MIDI endpoints, block on
//! capture, decode, run the effect graph, encode, write playback. XRUNs are
//! recovered in place; anything unrecoverable ends the loop, after which the
//! thread keeps feeding the graph silence until the control plane asks it to
//! terminate, so downstream consumers hear continuous output instead of a
//! stall.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tonestack_midi::{MidiInputPort, MidiMap};
use tonestack_rt::EventQueue;

use crate::codec::SampleCodec;
use crate::config::DeviceConfig;
use crate::cpu::{Checkpoint, CpuMeter};
use crate::device::AudioDevice;
use crate::error::DriverError;
use crate::graph::{GraphCell, GraphSlot, ProcessContext};
use crate::host::{EngineCommand, PatchEnvelope};
use crate::telemetry::Telemetry;

/// Round-robin priority requested for the audio thread.
pub const RT_PRIORITY: i32 = 70;

/// Cycle time of the silence pump after an abnormal loop exit.
const ZOMBIE_PUMP_INTERVAL: Duration = Duration::from_millis(10);

/// Lifecycle and telemetry callbacks from the audio thread to the
/// application. None of these may block.
pub trait DriverHost: Send + Sync {
    /// One call per XRUN occurrence.
    fn on_underrun(&self) {}
    /// The period loop has exited (error or terminate request).
    fn on_audio_stopped(&self) {}
    /// The audio thread is about to exit.
    fn on_audio_terminated(&self) {}
}

/// Everything the audio thread owns. Built by the control bridge at `open`,
/// moved into the spawned thread at `activate`.
pub(crate) struct EngineRuntime {
    pub device: Box<dyn AudioDevice>,
    pub config: DeviceConfig,
    pub capture_codec: SampleCodec,
    pub playback_codec: SampleCodec,
    pub raw_capture: Vec<u8>,
    pub raw_playback: Vec<u8>,
    pub capture: Vec<Vec<f32>>,
    pub playback: Vec<Vec<f32>>,
    pub input_map: Vec<usize>,
    pub output_map: Vec<usize>,
    pub midi_ports: Vec<MidiInputPort>,
    pub midi_map: MidiMap,
    pub graph: Arc<GraphSlot>,
    pub commands: EventQueue<EngineCommand>,
    pub completions: crossbeam_channel::Sender<PatchEnvelope>,
    pub telemetry: Arc<Telemetry>,
    pub terminate: Arc<AtomicBool>,
    pub host: Arc<dyn DriverHost>,
}

/// Audio thread entry point.
pub(crate) fn run(mut rt: EngineRuntime) {
    tonestack_rt::enable_ftz_daz();
    if let Err(err) = tonestack_rt::lock_memory() {
        tracing::warn!(error = %err, "could not lock memory for the audio thread");
    }
    match tonestack_rt::promote_to_realtime(RT_PRIORITY) {
        Ok(()) => tracing::debug!("audio thread priority boosted"),
        Err(err) => {
            tracing::warn!(
                error = %err,
                "failed to acquire realtime scheduling; continuing at default priority"
            );
        }
    }

    rt.telemetry.set_running(true);
    let result = run_periods(&mut rt);
    rt.telemetry.set_running(false);
    if let Err(err) = &result {
        tracing::error!(error = %err, "audio thread terminated abnormally");
    }
    rt.host.on_audio_stopped();

    if !rt.terminate.load(Ordering::Acquire) {
        pump_silence(&mut rt);
    }
    rt.device.close();
    rt.host.on_audio_terminated();
}

fn run_periods(rt: &mut EngineRuntime) -> Result<(), DriverError> {
    rt.device.start()?;
    let frames = rt.config.period_frames;
    let mut cpu = CpuMeter::new(Arc::clone(&rt.telemetry));

    loop {
        if rt.terminate.load(Ordering::Acquire) {
            return Ok(());
        }
        cpu.begin_period();

        let graph = rt.graph.load();
        drain_commands(rt, graph.as_deref());

        rt.midi_map.clear();
        for port in rt.midi_ports.iter_mut() {
            // All of a period's events carry frame offset 0: the bytes
            // arrived before any of this period's capture frames were read.
            port.drain(&mut rt.midi_map, 0);
        }

        if let Err(err) = rt.device.read_capture(&mut rt.raw_capture, frames) {
            match err.recovery_kind() {
                Some(kind) => {
                    rt.host.on_underrun();
                    rt.telemetry.record_xrun();
                    rt.device.recover(kind)?;
                    continue;
                }
                None => return Err(err),
            }
        }
        cpu.checkpoint(Checkpoint::Read);

        rt.capture_codec
            .decode(&rt.raw_capture, &mut rt.capture, frames as usize);
        cpu.checkpoint(Checkpoint::DriverIn);

        process_graph(rt, graph.as_deref());
        cpu.checkpoint(Checkpoint::Execute);

        rt.playback_codec
            .encode(&rt.playback, &mut rt.raw_playback, frames as usize);
        cpu.checkpoint(Checkpoint::DriverOut);

        if let Err(err) = rt.device.write_playback(&rt.raw_playback, frames) {
            match err.recovery_kind() {
                Some(kind) => {
                    rt.host.on_underrun();
                    rt.telemetry.record_xrun();
                    rt.device.recover(kind)?;
                }
                None => return Err(err),
            }
        }
        cpu.checkpoint(Checkpoint::Write);

        // The graph handle must be released before the period is published:
        // the control plane takes an advanced period counter to mean the
        // audio thread no longer holds a swapped-out graph.
        drop(graph);
        rt.telemetry.period_complete();
        cpu.end_period();
    }
}

/// Keeps consumers fed with silence at roughly the configured period rate
/// until the control plane sets `terminate`.
fn pump_silence(rt: &mut EngineRuntime) {
    for channel in rt.capture.iter_mut() {
        channel.fill(0.0);
    }
    while !rt.terminate.load(Ordering::Acquire) {
        std::thread::sleep(ZOMBIE_PUMP_INTERVAL);
        let graph = rt.graph.load();
        drain_commands(rt, graph.as_deref());
        rt.midi_map.clear();
        process_graph(rt, graph.as_deref());
        drop(graph);
        rt.telemetry.period_complete();
    }
}

fn drain_commands(rt: &mut EngineRuntime, graph: Option<&GraphCell>) {
    while let Ok(command) = rt.commands.try_pop() {
        match command {
            EngineCommand::SetControl {
                instance,
                symbol,
                value,
            } => {
                if let Some(cell) = graph {
                    cell.with_graph(|g| g.set_control(instance, &symbol, value));
                }
            }
            EngineCommand::SetBypass { instance, enabled } => {
                if let Some(cell) = graph {
                    cell.with_graph(|g| g.set_bypass(instance, enabled));
                }
            }
            EngineCommand::SetInputVolume(db) => {
                if let Some(cell) = graph {
                    cell.with_graph(|g| g.set_input_volume(db));
                }
            }
            EngineCommand::SetOutputVolume(db) => {
                if let Some(cell) = graph {
                    cell.with_graph(|g| g.set_output_volume(db));
                }
            }
            EngineCommand::Patch(mut envelope) => {
                match graph {
                    Some(cell) => cell.with_graph(|g| g.patch(&mut envelope.request)),
                    None => {
                        envelope.request.result =
                            Some(Err("no effect graph installed".into()));
                    }
                }
                if rt.completions.try_send(envelope).is_err() {
                    tracing::warn!("patch completion queue full; dropping reply");
                }
            }
        }
    }
}

fn process_graph(rt: &mut EngineRuntime, graph: Option<&GraphCell>) {
    match graph {
        Some(cell) => {
            let mut ctx = ProcessContext::new(
                &rt.capture,
                &mut rt.playback,
                &rt.input_map,
                &rt.output_map,
                rt.config.period_frames as usize,
                rt.midi_map.events(),
            );
            cell.with_graph(|g| g.process(&mut ctx));
        }
        None => {
            for channel in rt.playback.iter_mut() {
                channel.fill(0.0);
            }
        }
    }
}
