//! Audio device enumeration for the control plane.
//!
//! Probing a card requires opening it, which fails while another process (or
//! our own running engine) holds it. Successful probes are memoised in a
//! process-wide cache so a transiently busy device still shows up in the
//! list with its last known capabilities.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Sample rates offered to clients, intersected with the device's range.
pub const CANDIDATE_RATES: [u32; 8] = [
    22_050, 24_000, 44_100, 48_000, 88_200, 96_000, 176_400, 192_000,
];

/// Devices report absurdly small minimum buffers; clamp to something usable.
const MIN_USABLE_PERIOD: u32 = 16;

/// Capabilities of one duplex-capable sound card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioDeviceInfo {
    pub card_id: i32,
    /// Stable device id, `hw:<card-id>` form.
    pub id: String,
    pub name: String,
    pub long_name: String,
    pub sample_rates: Vec<u32>,
    pub min_period_frames: u32,
    pub max_period_frames: u32,
}

static PROBE_CACHE: Mutex<BTreeMap<String, AudioDeviceInfo>> = Mutex::new(BTreeMap::new());

/// Folds one probe attempt into the cache: a fresh result replaces the cached
/// entry, a failed probe falls back to it.
fn merge_probe(
    cache: &mut BTreeMap<String, AudioDeviceInfo>,
    name: &str,
    probed: Option<AudioDeviceInfo>,
) -> Option<AudioDeviceInfo> {
    match probed {
        Some(info) => {
            cache.insert(name.to_string(), info.clone());
            Some(info)
        }
        None => cache.get(name).cloned(),
    }
}

/// Intersects the candidate rate table with a device's min/max range and
/// clamps its period bounds.
fn capabilities(
    min_rate: u32,
    max_rate: u32,
    min_period: u32,
    max_period: u32,
) -> (Vec<u32>, u32, u32) {
    let rates = CANDIDATE_RATES
        .iter()
        .copied()
        .filter(|rate| (min_rate..=max_rate).contains(rate))
        .collect();
    (rates, min_period.max(MIN_USABLE_PERIOD), max_period)
}

/// Enumerates duplex-capable sound cards. Cards that fail to probe but have
/// been seen before are reported from the cache.
#[cfg(all(target_os = "linux", feature = "alsa-backend"))]
pub fn list_audio_devices() -> Vec<AudioDeviceInfo> {
    let mut cache = PROBE_CACHE.lock();
    let mut result = Vec::new();
    for card in alsa::card::Iter::new() {
        let Ok(card) = card else {
            tracing::error!("unexpected error enumerating sound cards");
            break;
        };
        let Ok(name) = card.get_name() else { continue };
        if let Some(info) = merge_probe(&mut cache, &name, probe_card(&card)) {
            result.push(info);
        }
    }
    for device in &result {
        tracing::debug!(id = %device.id, name = %device.name, "enumerated audio device");
    }
    result
}

#[cfg(all(target_os = "linux", feature = "alsa-backend"))]
fn probe_card(card: &alsa::card::Card) -> Option<AudioDeviceInfo> {
    use alsa::pcm::{HwParams, PCM};
    use alsa::Direction;

    let card_id = card.get_index();
    let device = format!("hw:{card_id}");

    // A usable appliance device must support capture and playback.
    drop(PCM::new(&device, Direction::Capture, false).ok()?);
    let playback = PCM::new(&device, Direction::Playback, false).ok()?;
    let hwp = HwParams::any(&playback).ok()?;
    let min_rate = hwp.get_rate_min().ok()?;
    let max_rate = hwp.get_rate_max().ok()?;
    let min_period = hwp.get_buffer_size_min().ok()? as u32;
    let max_period = hwp.get_buffer_size_max().ok()? as u32;

    let (sample_rates, min_period_frames, max_period_frames) =
        capabilities(min_rate, max_rate, min_period, max_period);

    Some(AudioDeviceInfo {
        card_id,
        id: device,
        name: card.get_name().ok()?,
        long_name: card.get_longname().unwrap_or_default(),
        sample_rates,
        min_period_frames,
        max_period_frames,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(name: &str, max_rate: u32) -> AudioDeviceInfo {
        let (sample_rates, min_period, max_period) = capabilities(8_000, max_rate, 4, 8_192);
        AudioDeviceInfo {
            card_id: 1,
            id: "hw:1".into(),
            name: name.into(),
            long_name: format!("{name} (long)"),
            sample_rates,
            min_period_frames: min_period,
            max_period_frames: max_period,
        }
    }

    #[test]
    fn rates_intersect_device_range() {
        let (rates, min_period, _) = capabilities(44_100, 96_000, 4, 8_192);
        assert_eq!(rates, vec![44_100, 48_000, 88_200, 96_000]);
        assert_eq!(min_period, MIN_USABLE_PERIOD);
    }

    #[test]
    fn busy_probe_falls_back_to_cache() {
        let mut cache = BTreeMap::new();
        let probed = merge_probe(&mut cache, "UMC204HD", Some(info("UMC204HD", 192_000)));
        assert!(probed.is_some());

        // Device now busy: no probe result, cached record survives.
        let cached = merge_probe(&mut cache, "UMC204HD", None).unwrap();
        assert_eq!(cached.name, "UMC204HD");

        // An unknown busy device stays invisible.
        assert!(merge_probe(&mut cache, "Other", None).is_none());
    }

    #[test]
    fn fresh_probe_replaces_cache() {
        let mut cache = BTreeMap::new();
        merge_probe(&mut cache, "Card", Some(info("Card", 48_000)));
        let updated = merge_probe(&mut cache, "Card", Some(info("Card", 192_000))).unwrap();
        assert!(updated.sample_rates.contains(&192_000));
    }
}
