//! Non-realtime control bridge.
//!
//! [`AudioHost`] is the only surface the rest of the application talks to:
//! it opens and closes the device session, owns the audio thread handle and
//! the terminate flag, swaps the active effect graph, and forwards parameter
//! changes to the audio thread through a bounded lock-free queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use tonestack_midi::{MidiEndpointInfo, MidiInputPort, MidiMap};
use tonestack_rt::{EventQueue, QueueError};

use crate::codec::SampleCodec;
use crate::config::{port_channel_index, ChannelSelection, DeviceConfig, DeviceConfigRequest};
use crate::device::{self, AudioDevice};
use crate::error::DriverError;
use crate::graph::{EffectGraph, GraphSlot, PatchOp, PatchRequest};
use crate::rt_loop::{self, DriverHost, EngineRuntime};
use crate::telemetry::{EngineStatus, Telemetry};

const COMMAND_QUEUE_DEPTH: usize = 256;
const PATCH_COMPLETION_DEPTH: usize = 64;

/// How long to wait for the audio thread to advance past a graph swap before
/// giving up on dropping the old graph here.
const GRAPH_DROP_TIMEOUT: Duration = Duration::from_secs(1);

/// A control command in flight to the audio thread.
pub(crate) enum EngineCommand {
    SetControl {
        instance: u64,
        symbol: String,
        value: f32,
    },
    SetBypass {
        instance: u64,
        enabled: bool,
    },
    SetInputVolume(f32),
    SetOutputVolume(f32),
    Patch(PatchEnvelope),
}

/// A patch request travelling to the audio thread and back; the completion
/// callback runs on a non-realtime worker.
pub struct PatchEnvelope {
    pub(crate) request: PatchRequest,
    pub(crate) on_complete: Box<dyn FnOnce(PatchRequest) + Send>,
}

enum Stage {
    Closed,
    Open(Box<OpenSession>),
    Active(ActiveSession),
}

struct OpenSession {
    runtime: EngineRuntime,
    completions_rx: crossbeam_channel::Receiver<PatchEnvelope>,
    config: DeviceConfig,
    description: String,
}

struct ActiveSession {
    audio_thread: JoinHandle<()>,
    patch_worker: JoinHandle<()>,
    config: DeviceConfig,
    description: String,
}

pub struct AudioHost {
    callbacks: Arc<dyn DriverHost>,
    graph: Arc<GraphSlot>,
    commands: EventQueue<EngineCommand>,
    telemetry: Arc<Telemetry>,
    terminate: Arc<AtomicBool>,
    stage: Mutex<Stage>,
}

impl AudioHost {
    pub fn new(callbacks: Arc<dyn DriverHost>) -> Self {
        Self {
            callbacks,
            graph: Arc::new(GraphSlot::new()),
            commands: EventQueue::new(COMMAND_QUEUE_DEPTH),
            telemetry: Telemetry::new(),
            terminate: Arc::new(AtomicBool::new(false)),
            stage: Mutex::new(Stage::Closed),
        }
    }

    /// Opens the session: MIDI endpoints first (individual failures are
    /// logged and tolerated), then the audio device, then all per-period
    /// buffers. On failure everything already acquired is released.
    pub fn open(
        &self,
        request: &DeviceConfigRequest,
        selection: &ChannelSelection,
    ) -> Result<DeviceConfig, DriverError> {
        self.open_inner(request, selection, None)
    }

    /// Opens the session over a caller-supplied transport. This is the seam
    /// alternative transports (and fault-injecting tests) plug into.
    pub fn open_with_device(
        &self,
        device: Box<dyn AudioDevice>,
        request: &DeviceConfigRequest,
        selection: &ChannelSelection,
    ) -> Result<DeviceConfig, DriverError> {
        self.open_inner(request, selection, Some(device))
    }

    fn open_inner(
        &self,
        request: &DeviceConfigRequest,
        selection: &ChannelSelection,
        device: Option<Box<dyn AudioDevice>>,
    ) -> Result<DeviceConfig, DriverError> {
        let mut stage = self.stage.lock();
        if !matches!(*stage, Stage::Closed) {
            return Err(DriverError::InvalidState("already open".into()));
        }

        let mut midi_ports = Vec::new();
        for info in &selection.midi_inputs {
            match open_midi_port(info) {
                Ok(port) => midi_ports.push(port),
                Err(err) => {
                    tracing::error!(endpoint = %info.name, error = %err, "can't open MIDI device");
                }
            }
        }

        let (device, config) = match device {
            Some(mut device) => {
                let config = device.open(request)?;
                (device, config)
            }
            None => device::open_device(request)?,
        };
        let description = device.description();
        tracing::info!(configuration = %description, "audio device open");

        let (completions_tx, completions_rx) = crossbeam_channel::bounded(PATCH_COMPLETION_DEPTH);
        let runtime = build_runtime(
            device,
            config.clone(),
            selection,
            midi_ports,
            Arc::clone(&self.graph),
            self.commands.clone(),
            completions_tx,
            Arc::clone(&self.telemetry),
            Arc::clone(&self.terminate),
            Arc::clone(&self.callbacks),
        );
        *stage = Stage::Open(Box::new(OpenSession {
            runtime,
            completions_rx,
            config: config.clone(),
            description,
        }));
        Ok(config)
    }

    /// Spawns the audio thread. Errors unless the session is open and not
    /// yet active.
    pub fn activate(&self) -> Result<(), DriverError> {
        let mut stage = self.stage.lock();
        match std::mem::replace(&mut *stage, Stage::Closed) {
            Stage::Open(session) => {
                let OpenSession {
                    runtime,
                    completions_rx,
                    config,
                    description,
                } = *session;
                self.terminate.store(false, Ordering::Release);

                let audio_thread = thread::Builder::new()
                    .name("tonestack-audio".into())
                    .spawn(move || rt_loop::run(runtime))
                    .map_err(|err| {
                        DriverError::Io(format!("failed to spawn audio thread: {err}"))
                    })?;

                let patch_worker = thread::Builder::new()
                    .name("tonestack-patch".into())
                    .spawn(move || {
                        while let Ok(envelope) = completions_rx.recv() {
                            let PatchEnvelope {
                                request,
                                on_complete,
                            } = envelope;
                            on_complete(request);
                        }
                    })
                    .map_err(|err| {
                        self.terminate.store(true, Ordering::Release);
                        DriverError::Io(format!("failed to spawn patch worker: {err}"))
                    })?;

                *stage = Stage::Active(ActiveSession {
                    audio_thread,
                    patch_worker,
                    config,
                    description,
                });
                Ok(())
            }
            other @ Stage::Active(_) => {
                *stage = other;
                Err(DriverError::InvalidState("already activated".into()))
            }
            Stage::Closed => Err(DriverError::InvalidState("not open".into())),
        }
    }

    /// Sets `terminate` and joins the audio thread. Idempotent; the session
    /// must be reopened before activating again.
    pub fn deactivate(&self) {
        let mut stage = self.stage.lock();
        match std::mem::replace(&mut *stage, Stage::Closed) {
            Stage::Active(session) => {
                self.terminate.store(true, Ordering::Release);
                if session.audio_thread.join().is_err() {
                    tracing::error!("audio thread panicked");
                }
                if session.patch_worker.join().is_err() {
                    tracing::error!("patch completion worker panicked");
                }
                tracing::debug!("audio thread joined");
            }
            other => *stage = other,
        }
    }

    /// Deactivates and releases the device and all buffers. Idempotent and
    /// safe after a failed `open`.
    pub fn close(&self) {
        self.deactivate();
        let mut stage = self.stage.lock();
        *stage = Stage::Closed;
    }

    /// Publishes a new effect graph (or none) to the audio thread.
    ///
    /// The previous graph is dropped here, on the control thread, once the
    /// audio thread has observably advanced past the swap.
    pub fn set_graph(&self, graph: Option<Box<dyn EffectGraph>>) {
        let old = match graph {
            Some(graph) => self.graph.publish(graph),
            None => self.graph.clear(),
        };
        if let Some(old) = old {
            if self.is_active() {
                self.wait_for_period_advance();
            }
            drop(old);
        }
    }

    pub fn set_control(&self, instance: u64, symbol: &str, value: f32) {
        self.send_command(EngineCommand::SetControl {
            instance,
            symbol: symbol.to_string(),
            value,
        });
    }

    pub fn set_bypass(&self, instance: u64, enabled: bool) {
        self.send_command(EngineCommand::SetBypass { instance, enabled });
    }

    pub fn set_input_volume(&self, db: f32) {
        self.send_command(EngineCommand::SetInputVolume(db));
    }

    pub fn set_output_volume(&self, db: f32) {
        self.send_command(EngineCommand::SetOutputVolume(db));
    }

    /// Enqueues a patch get/set for one effect instance. The completion
    /// callback runs on a non-realtime worker thread; when the engine is not
    /// active it runs immediately on this thread with an error result.
    pub fn send_patch_request(
        &self,
        instance: u64,
        property: &str,
        op: PatchOp,
        on_complete: impl FnOnce(PatchRequest) + Send + 'static,
    ) {
        let mut request = PatchRequest {
            instance,
            property: property.to_string(),
            op,
            result: None,
        };
        if !self.is_active() {
            request.result = Some(Err("audio engine is not active".into()));
            on_complete(request);
            return;
        }
        let envelope = PatchEnvelope {
            request,
            on_complete: Box::new(on_complete),
        };
        if let Err(EngineCommand::Patch(envelope)) =
            self.commands.push(EngineCommand::Patch(envelope))
        {
            let PatchEnvelope {
                mut request,
                on_complete,
            } = envelope;
            request.result = Some(Err("command queue full".into()));
            on_complete(request);
        }
    }

    pub fn status(&self) -> EngineStatus {
        self.telemetry.status()
    }

    pub fn is_open(&self) -> bool {
        !matches!(*self.stage.lock(), Stage::Closed)
    }

    pub fn is_active(&self) -> bool {
        matches!(*self.stage.lock(), Stage::Active(_))
    }

    pub fn config(&self) -> Option<DeviceConfig> {
        match &*self.stage.lock() {
            Stage::Open(session) => Some(session.config.clone()),
            Stage::Active(session) => Some(session.config.clone()),
            Stage::Closed => None,
        }
    }

    /// One-line summary of the negotiated device configuration.
    pub fn configuration_description(&self) -> Option<String> {
        match &*self.stage.lock() {
            Stage::Open(session) => Some(session.description.clone()),
            Stage::Active(session) => Some(session.description.clone()),
            Stage::Closed => None,
        }
    }

    fn send_command(&self, command: EngineCommand) {
        if matches!(self.commands.try_push(command), Err(QueueError::Full)) {
            tracing::warn!("engine command queue full; command dropped");
        }
    }

    fn wait_for_period_advance(&self) {
        let start = self.telemetry.periods();
        let deadline = Instant::now() + GRAPH_DROP_TIMEOUT;
        while self.telemetry.periods() == start {
            if Instant::now() >= deadline {
                tracing::warn!("audio thread did not advance past graph swap");
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }
}

impl Drop for AudioHost {
    fn drop(&mut self) {
        self.close();
    }
}

fn open_midi_port(info: &MidiEndpointInfo) -> anyhow::Result<MidiInputPort> {
    #[cfg(all(target_os = "linux", feature = "alsa-backend"))]
    {
        MidiInputPort::open(info.clone())
    }
    #[cfg(not(all(target_os = "linux", feature = "alsa-backend")))]
    {
        anyhow::bail!("no MIDI backend available for endpoint '{}'", info.name)
    }
}

#[allow(clippy::too_many_arguments)]
fn build_runtime(
    device: Box<dyn AudioDevice>,
    config: DeviceConfig,
    selection: &ChannelSelection,
    midi_ports: Vec<MidiInputPort>,
    graph: Arc<GraphSlot>,
    commands: EventQueue<EngineCommand>,
    completions: crossbeam_channel::Sender<PatchEnvelope>,
    telemetry: Arc<Telemetry>,
    terminate: Arc<AtomicBool>,
    host: Arc<dyn DriverHost>,
) -> EngineRuntime {
    let frames = config.period_frames as usize;
    let input_map = bind_ports(&selection.input_ports, config.capture_channels);
    let output_map = bind_ports(&selection.output_ports, config.playback_channels);

    EngineRuntime {
        capture_codec: SampleCodec::new(config.capture_format),
        playback_codec: SampleCodec::new(config.playback_format),
        raw_capture: vec![0; config.raw_capture_bytes()],
        raw_playback: vec![0; config.raw_playback_bytes()],
        capture: vec![vec![0.0; frames]; config.capture_channels as usize],
        playback: vec![vec![0.0; frames]; config.playback_channels as usize],
        input_map,
        output_map,
        midi_ports,
        midi_map: MidiMap::default(),
        device,
        config,
        graph,
        commands,
        completions,
        telemetry,
        terminate,
        host,
    }
}

/// Resolves `system::capture_N` / `system::playback_N` names to channel
/// indices; names that don't parse or exceed the device's channel count are
/// logged and skipped.
fn bind_ports(ports: &[String], channels: u32) -> Vec<usize> {
    let mut map = Vec::with_capacity(ports.len());
    for port in ports {
        match port_channel_index(port).filter(|index| *index < channels as usize) {
            Some(index) => map.push(index),
            None => tracing::error!(port = %port, "invalid audio port"),
        }
    }
    map
}
