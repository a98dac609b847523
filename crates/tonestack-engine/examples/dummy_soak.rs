//! Soaks the engine against the dummy transport for a second and prints the
//! resulting telemetry. Useful for eyeballing scheduling behaviour on a
//! machine without audio hardware:
//!
//! ```sh
//! cargo run --example dummy_soak
//! ```

use std::sync::Arc;
use std::time::Duration;

use tonestack_engine::{
    AudioHost, ChannelSelection, DeviceConfigRequest, DriverHost, EffectGraph, ProcessContext,
};

struct QuietHost;

impl DriverHost for QuietHost {
    fn on_underrun(&self) {
        eprintln!("xrun");
    }
}

/// Passes capture through with a fixed gain.
struct GainGraph {
    gain: f32,
}

impl EffectGraph for GainGraph {
    fn process(&mut self, ctx: &mut ProcessContext<'_>) {
        for port in 0..ctx.output_count() {
            let source = port.min(ctx.input_count().saturating_sub(1));
            for frame in 0..ctx.frames() {
                let sample = ctx.input(source)[frame] * self.gain;
                ctx.output(port)[frame] = sample;
            }
        }
    }
}

fn main() {
    let host = AudioHost::new(Arc::new(QuietHost));
    let request = DeviceConfigRequest {
        device: "dummy".into(),
        sample_rate: 48_000,
        period_frames: 128,
        periods: 3,
    };
    let config = host
        .open(&request, &ChannelSelection::first_channels(2, 2))
        .expect("open dummy device");
    println!(
        "open: {}",
        host.configuration_description().unwrap_or_default()
    );

    host.set_graph(Some(Box::new(GainGraph { gain: 0.5 })));
    host.activate().expect("activate");

    std::thread::sleep(Duration::from_secs(1));
    let status = host.status();
    println!(
        "running={} cpu_use={:.4} cpu_overhead={:.4} xruns={} period={}x{}",
        status.running,
        status.cpu_use,
        status.cpu_overhead,
        status.xrun_count,
        config.period_frames,
        config.periods
    );
    host.close();
}
