//! Engine status shared between the audio thread and the control plane.
//!
//! Single writer (the audio thread), any number of readers. Everything is a
//! relaxed atomic; readers accept slight staleness.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

const NEVER: u64 = u64::MAX;

/// Point-in-time engine status snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EngineStatus {
    pub running: bool,
    /// Share of wall time the audio thread spends busy, 0..=1.
    pub cpu_use: f32,
    /// Busy share spent outside the effect graph (codec + device I/O).
    pub cpu_overhead: f32,
    pub xrun_count: u64,
    pub ms_since_last_xrun: u64,
}

pub struct Telemetry {
    started: Instant,
    running: AtomicBool,
    xruns: AtomicU64,
    last_xrun_ms: AtomicU64,
    periods: AtomicU64,
    cpu_use_bits: AtomicU32,
    cpu_overhead_bits: AtomicU32,
}

impl Telemetry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            started: Instant::now(),
            running: AtomicBool::new(false),
            xruns: AtomicU64::new(0),
            last_xrun_ms: AtomicU64::new(NEVER),
            periods: AtomicU64::new(0),
            cpu_use_bits: AtomicU32::new(0),
            cpu_overhead_bits: AtomicU32::new(0),
        })
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    pub fn record_xrun(&self) {
        self.xruns.fetch_add(1, Ordering::Relaxed);
        self.last_xrun_ms.store(self.elapsed_ms(), Ordering::Relaxed);
    }

    /// Marks the end of one audio period; the control plane watches this to
    /// tell that the audio thread has advanced.
    pub fn period_complete(&self) {
        self.periods.fetch_add(1, Ordering::Release);
    }

    pub fn periods(&self) -> u64 {
        self.periods.load(Ordering::Acquire)
    }

    pub fn publish_cpu(&self, cpu_use: f32, cpu_overhead: f32) {
        self.cpu_use_bits
            .store(cpu_use.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
        self.cpu_overhead_bits
            .store(cpu_overhead.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn status(&self) -> EngineStatus {
        let last_xrun = self.last_xrun_ms.load(Ordering::Relaxed);
        let ms_since_last_xrun = match last_xrun {
            NEVER => self.elapsed_ms(),
            at => self.elapsed_ms().saturating_sub(at),
        };
        EngineStatus {
            running: self.running.load(Ordering::Acquire),
            cpu_use: f32::from_bits(self.cpu_use_bits.load(Ordering::Relaxed)),
            cpu_overhead: f32::from_bits(self.cpu_overhead_bits.load(Ordering::Relaxed)),
            xrun_count: self.xruns.load(Ordering::Relaxed),
            ms_since_last_xrun,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xruns_accumulate() {
        let telemetry = Telemetry::new();
        assert_eq!(telemetry.status().xrun_count, 0);
        telemetry.record_xrun();
        telemetry.record_xrun();
        let status = telemetry.status();
        assert_eq!(status.xrun_count, 2);
        assert!(status.ms_since_last_xrun < 1_000);
    }

    #[test]
    fn cpu_figures_are_clamped() {
        let telemetry = Telemetry::new();
        telemetry.publish_cpu(1.7, -0.2);
        let status = telemetry.status();
        assert_eq!(status.cpu_use, 1.0);
        assert_eq!(status.cpu_overhead, 0.0);
    }
}
