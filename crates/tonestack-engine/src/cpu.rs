//! Per-period CPU accounting for the audio thread.
//!
//! The loop stamps five checkpoints per period: blocking capture read,
//! decode, effect-graph execution, encode, playback write. Accumulated
//! figures are published once a second so the checkpoint calls themselves
//! stay cheap.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::telemetry::Telemetry;

const PUBLISH_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    /// Blocking wait on capture; idle time, not CPU load.
    Read,
    /// Capture decode into planar floats.
    DriverIn,
    /// Effect-graph execution.
    Execute,
    /// Playback encode from planar floats.
    DriverOut,
    /// Playback write.
    Write,
}

impl Checkpoint {
    fn index(self) -> usize {
        match self {
            Checkpoint::Read => 0,
            Checkpoint::DriverIn => 1,
            Checkpoint::Execute => 2,
            Checkpoint::DriverOut => 3,
            Checkpoint::Write => 4,
        }
    }
}

/// Owned by the audio thread; publishes into [`Telemetry`].
pub struct CpuMeter {
    telemetry: Arc<Telemetry>,
    last: Instant,
    window_start: Instant,
    accumulated: [Duration; 5],
}

impl CpuMeter {
    pub fn new(telemetry: Arc<Telemetry>) -> Self {
        let now = Instant::now();
        Self {
            telemetry,
            last: now,
            window_start: now,
            accumulated: [Duration::ZERO; 5],
        }
    }

    /// Starts timing a new period.
    pub fn begin_period(&mut self) {
        self.last = Instant::now();
    }

    /// Charges the time since the previous checkpoint to `checkpoint`.
    pub fn checkpoint(&mut self, checkpoint: Checkpoint) {
        let now = Instant::now();
        self.accumulated[checkpoint.index()] += now - self.last;
        self.last = now;
    }

    /// Publishes and resets the window when enough wall time has passed.
    pub fn end_period(&mut self) {
        let wall = self.window_start.elapsed();
        if wall < PUBLISH_INTERVAL {
            return;
        }
        let wall_secs = wall.as_secs_f32();
        if wall_secs > 0.0 {
            let busy: Duration = self
                .accumulated
                .iter()
                .enumerate()
                .filter(|(index, _)| *index != Checkpoint::Read.index())
                .map(|(_, d)| *d)
                .sum();
            let execute = self.accumulated[Checkpoint::Execute.index()];
            let cpu_use = busy.as_secs_f32() / wall_secs;
            let cpu_overhead = busy.saturating_sub(execute).as_secs_f32() / wall_secs;
            self.telemetry.publish_cpu(cpu_use, cpu_overhead);
        }
        self.accumulated = [Duration::ZERO; 5];
        self.window_start = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attributes_time_to_checkpoints() {
        let telemetry = Telemetry::new();
        let mut meter = CpuMeter::new(Arc::clone(&telemetry));

        // Synthesize a window longer than the publish interval.
        meter.window_start = Instant::now() - Duration::from_secs(2);
        meter.begin_period();
        meter.accumulated[Checkpoint::Read.index()] = Duration::from_millis(1_500);
        meter.accumulated[Checkpoint::Execute.index()] = Duration::from_millis(400);
        meter.accumulated[Checkpoint::DriverIn.index()] = Duration::from_millis(100);
        meter.end_period();

        let status = telemetry.status();
        // busy = 500 ms of a 2 s window.
        assert!((status.cpu_use - 0.25).abs() < 0.05);
        // overhead = 100 ms of a 2 s window.
        assert!((status.cpu_overhead - 0.05).abs() < 0.02);
    }
}
