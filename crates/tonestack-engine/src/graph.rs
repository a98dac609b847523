//! The effect-graph seam: the externally owned pedalboard the engine drives
//! once per period, and the slot through which the control plane swaps it
//! while audio runs.

use std::cell::UnsafeCell;
use std::sync::Arc;

use arc_swap::ArcSwapOption;

use tonestack_midi::MidiEvent;

/// A patch property get or set addressed to one effect instance.
#[derive(Debug)]
pub struct PatchRequest {
    pub instance: u64,
    pub property: String,
    pub op: PatchOp,
    /// Filled in by the graph on the audio thread.
    pub result: Option<Result<String, String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOp {
    Get,
    Set(String),
}

/// One period's worth of audio and MIDI, bound to the selected device
/// channels.
pub struct ProcessContext<'a> {
    inputs: &'a [Vec<f32>],
    outputs: &'a mut [Vec<f32>],
    input_map: &'a [usize],
    output_map: &'a [usize],
    frames: usize,
    events: &'a [MidiEvent],
}

impl<'a> ProcessContext<'a> {
    pub(crate) fn new(
        inputs: &'a [Vec<f32>],
        outputs: &'a mut [Vec<f32>],
        input_map: &'a [usize],
        output_map: &'a [usize],
        frames: usize,
        events: &'a [MidiEvent],
    ) -> Self {
        Self {
            inputs,
            outputs,
            input_map,
            output_map,
            frames,
            events,
        }
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    /// MIDI events received since the previous period, in arrival order.
    pub fn events(&self) -> &[MidiEvent] {
        self.events
    }

    pub fn input_count(&self) -> usize {
        self.input_map.len()
    }

    pub fn output_count(&self) -> usize {
        self.output_map.len()
    }

    /// Planar capture samples for the graph input `port`.
    pub fn input(&self, port: usize) -> &[f32] {
        &self.inputs[self.input_map[port]][..self.frames]
    }

    /// Planar playback buffer for the graph output `port`.
    pub fn output(&mut self, port: usize) -> &mut [f32] {
        &mut self.outputs[self.output_map[port]][..self.frames]
    }
}

/// The pedalboard contract.
///
/// `process` runs on the audio thread every period and must not block,
/// allocate, or take locks. The remaining methods are invoked on the audio
/// thread in response to control commands drained at the top of a period.
pub trait EffectGraph: Send {
    /// Consume the period's inputs and events, fill every output.
    fn process(&mut self, ctx: &mut ProcessContext<'_>);

    fn set_control(&mut self, _instance: u64, _symbol: &str, _value: f32) {}

    fn set_bypass(&mut self, _instance: u64, _enabled: bool) {}

    /// Input trim in dB, applied ahead of the graph.
    fn set_input_volume(&mut self, _db: f32) {}

    /// Output trim in dB, applied behind the graph.
    fn set_output_volume(&mut self, _db: f32) {}

    /// Answer a patch get/set by filling `request.result`.
    fn patch(&mut self, request: &mut PatchRequest) {
        request.result = Some(Err("patch requests not supported".into()));
    }
}

/// Shared-ownership cell around a graph.
///
/// The graph needs `&mut` access but is owned through an `Arc` so the control
/// plane can keep the old instance alive across a swap. Only the audio thread
/// ever calls into the cell, which makes the interior mutability sound.
pub struct GraphCell {
    graph: UnsafeCell<Box<dyn EffectGraph>>,
}

// Exclusive access is guaranteed by the handoff discipline: the audio thread
// is the only caller of `with_graph`, and it holds no reference across
// periods.
unsafe impl Send for GraphCell {}
unsafe impl Sync for GraphCell {}

impl GraphCell {
    fn new(graph: Box<dyn EffectGraph>) -> Self {
        Self {
            graph: UnsafeCell::new(graph),
        }
    }

    pub(crate) fn with_graph<R>(&self, f: impl FnOnce(&mut dyn EffectGraph) -> R) -> R {
        // Safety: called from the audio thread only; see type-level comment.
        let graph = unsafe { &mut *self.graph.get() };
        f(graph.as_mut())
    }
}

/// Release/acquire publication point for the active graph.
///
/// The control thread stores, the audio thread loads once at the top of each
/// period. Swapping returns the previous handle so the caller controls where
/// it is dropped.
pub struct GraphSlot {
    slot: ArcSwapOption<GraphCell>,
}

impl GraphSlot {
    pub fn new() -> Self {
        Self {
            slot: ArcSwapOption::const_empty(),
        }
    }

    pub fn publish(&self, graph: Box<dyn EffectGraph>) -> Option<Arc<GraphCell>> {
        self.slot.swap(Some(Arc::new(GraphCell::new(graph))))
    }

    pub fn clear(&self) -> Option<Arc<GraphCell>> {
        self.slot.swap(None)
    }

    pub(crate) fn load(&self) -> Option<Arc<GraphCell>> {
        self.slot.load_full()
    }
}

impl Default for GraphSlot {
    fn default() -> Self {
        Self::new()
    }
}
