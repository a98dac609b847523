use tonestack_engine::{PcmFormat, SampleCodec};

const FRAMES: usize = 64;
const CHANNELS: usize = 2;

fn is_sixteen_bit(format: PcmFormat) -> bool {
    matches!(format, PcmFormat::S16Le | PcmFormat::S16Be)
}

/// Deterministic ramp with a rich set of low bits and slight inter-channel
/// variation (only as much as the narrower formats can carry).
fn ramp(format: PcmFormat) -> Vec<Vec<f32>> {
    let mut planar = vec![vec![0.0f32; FRAMES]; CHANNELS];
    for frame in 0..FRAMES {
        for (channel, data) in planar.iter_mut().enumerate() {
            let mut value =
                frame as f32 / FRAMES as f32 + frame as f32 / (128.0 * 256.0);
            if !is_sixteen_bit(format) {
                value += channel as f32 / (128.0 * 256.0 * 256.0);
            }
            data[frame] = value;
        }
    }
    planar
}

fn round_trip(format: PcmFormat) {
    let codec = SampleCodec::new(format);
    let planar = ramp(format);
    let mut raw = vec![0u8; FRAMES * CHANNELS * format.bytes_per_sample()];
    codec.encode(&planar, &mut raw, FRAMES);

    let mut decoded = vec![vec![0.0f32; FRAMES]; CHANNELS];
    codec.decode(&raw, &mut decoded, FRAMES);

    let tolerance = if is_sixteen_bit(format) {
        // One LSB of the 16-bit quantiser.
        1.0 / 32_768.0
    } else {
        4e-5
    };
    for channel in 0..CHANNELS {
        for frame in 0..FRAMES {
            let error = (decoded[channel][frame] - planar[channel][frame]).abs();
            assert!(
                error <= tolerance,
                "{format:?} channel {channel} frame {frame}: error {error}"
            );
        }
    }
}

#[test]
fn round_trip_f32_le() {
    round_trip(PcmFormat::F32Le);
}

#[test]
fn round_trip_f32_be() {
    round_trip(PcmFormat::F32Be);
}

#[test]
fn round_trip_s32_le() {
    round_trip(PcmFormat::S32Le);
}

#[test]
fn round_trip_s32_be() {
    round_trip(PcmFormat::S32Be);
}

#[test]
fn round_trip_s24_le() {
    round_trip(PcmFormat::S24Le);
}

#[test]
fn round_trip_s24_be() {
    round_trip(PcmFormat::S24Be);
}

#[test]
fn round_trip_s24_packed_le() {
    round_trip(PcmFormat::S24P3Le);
}

#[test]
fn round_trip_s24_packed_be() {
    round_trip(PcmFormat::S24P3Be);
}

#[test]
fn round_trip_s16_le() {
    round_trip(PcmFormat::S16Le);
}

#[test]
fn round_trip_s16_be() {
    round_trip(PcmFormat::S16Be);
}

#[test]
fn saturation_hits_format_extremes() {
    for format in PcmFormat::preference_order() {
        let codec = SampleCodec::new(format);
        let planar = vec![vec![1.5f32, -1.5f32]; 1];
        let bytes = format.bytes_per_sample();
        let mut raw = vec![0u8; 2 * bytes];
        codec.encode(&planar, &mut raw, 2);

        let mut decoded = vec![vec![0.0f32; 2]; 1];
        codec.decode(&raw, &mut decoded, 2);
        assert!(
            (decoded[0][0] - 1.0).abs() < 1e-3,
            "{format:?} positive saturation decoded to {}",
            decoded[0][0]
        );
        assert!(
            (decoded[0][1] + 1.0).abs() < 1e-3,
            "{format:?} negative saturation decoded to {}",
            decoded[0][1]
        );
    }
}
