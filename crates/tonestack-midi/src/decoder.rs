//! Byte-stream decoder for one MIDI endpoint.
//!
//! The decoder is fed whatever chunk of bytes the endpoint had buffered and
//! reconstructs complete messages across chunk boundaries. It implements the
//! wire-level conventions that raw hardware streams actually use:
//!
//! - running status: consecutive Voice messages may omit the status byte;
//! - System Realtime bytes (`0xF8..=0xFF`) may interleave anywhere and must
//!   not disturb any other decoding state — they are discarded;
//! - SysEx may span any number of chunks and is consumed but never emitted.

use crate::{MidiEvent, MidiMap};

/// Scratch capacity for an in-flight SysEx body; longer messages truncate.
const SYSEX_SCRATCH_BYTES: usize = 1024;

/// Stateful decoder, one per endpoint. Feed it raw bytes; it appends complete
/// messages to the period's [`MidiMap`]. Never fails: malformed sequences
/// flush the in-progress message and decoding begins fresh.
pub struct MidiDecoder {
    running_status: Option<u8>,
    /// Expected data bytes for the current message: 0, 1, 2, or -1 while
    /// consuming an indefinite-length SysEx body.
    expected_data_len: i32,
    data_index: i32,
    data0: u8,
    data1: u8,
    in_sysex: bool,
    sysex: Vec<u8>,
}

impl MidiDecoder {
    pub fn new() -> Self {
        Self {
            running_status: None,
            expected_data_len: 0,
            data_index: 0,
            data0: 0,
            data1: 0,
            in_sysex: false,
            sysex: Vec::with_capacity(SYSEX_SCRATCH_BYTES),
        }
    }

    /// Clears all decoding state; called when an endpoint is (re)opened.
    pub fn reset(&mut self) {
        self.running_status = None;
        self.expected_data_len = 0;
        self.data_index = 0;
        self.in_sysex = false;
        self.sysex.clear();
    }

    /// Decodes `bytes`, appending each completed message to `out` tagged with
    /// `frame`.
    pub fn feed(&mut self, bytes: &[u8], out: &mut MidiMap, frame: u32) {
        for &byte in bytes {
            if byte >= 0x80 {
                if byte >= 0xF0 {
                    match byte {
                        0xF0 => self.begin_sysex(),
                        // System Realtime: invisible to every other state.
                        0xF8..=0xFF => continue,
                        // EOX terminates (and discards) any open SysEx and
                        // emits nothing of its own.
                        0xF7 => {
                            self.flush_sysex();
                            self.running_status = None;
                            self.expected_data_len = 0;
                            self.data_index = 0;
                            continue;
                        }
                        _ => {
                            self.flush_sysex();
                            let Some(len) = system_common_data_len(byte) else {
                                // Undefined System Common (F4/F5): skip.
                                continue;
                            };
                            self.running_status = Some(byte);
                            self.expected_data_len = len;
                            self.data_index = 0;
                        }
                    }
                } else {
                    self.flush_sysex();
                    self.running_status = Some(byte);
                    self.expected_data_len = voice_data_len(byte);
                    self.data_index = 0;
                }
            } else if self.in_sysex {
                if self.sysex.len() < SYSEX_SCRATCH_BYTES {
                    self.sysex.push(byte);
                }
            } else {
                match self.data_index {
                    0 => {
                        self.data0 = byte;
                        self.data_index = 1;
                    }
                    1 => {
                        self.data1 = byte;
                        self.data_index = 2;
                    }
                    // Stray data with no message in progress: discard.
                    _ => {}
                }
            }

            if let Some(status) = self.running_status {
                if self.expected_data_len >= 0 && self.data_index == self.expected_data_len {
                    out.push(MidiEvent {
                        time: frame,
                        size: (self.expected_data_len + 1) as u8,
                        bytes: [status, self.data0, self.data1],
                    });
                    // Keep the status so running-status data bytes continue
                    // to emit.
                    self.data_index = 0;
                }
            }
        }
    }

    fn begin_sysex(&mut self) {
        self.in_sysex = true;
        self.sysex.clear();
        self.sysex.push(0xF0);
        self.running_status = None;
        self.expected_data_len = -1;
        self.data_index = -1;
    }

    fn flush_sysex(&mut self) {
        // SysEx is consumed but deliberately dropped; the scratch buffer is
        // the extension point if it is ever needed downstream.
        self.in_sysex = false;
    }
}

impl Default for MidiDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn voice_data_len(status: u8) -> i32 {
    match status >> 4 {
        0x8 | 0x9 | 0xA | 0xB | 0xE => 2,
        0xC | 0xD => 1,
        _ => unreachable!("voice status nibble"),
    }
}

fn system_common_data_len(status: u8) -> Option<i32> {
    match status {
        0xF1 | 0xF3 => Some(1),
        0xF2 => Some(2),
        0xF6 => Some(0),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(decoder: &mut MidiDecoder, bytes: &[u8]) -> Vec<MidiEvent> {
        let mut map = MidiMap::new(64);
        decoder.feed(bytes, &mut map, 0);
        map.events().to_vec()
    }

    fn assert_event(event: &MidiEvent, bytes: &[u8]) {
        assert_eq!(event.data(), bytes);
    }

    #[test]
    fn running_status_emits_repeated_events() {
        let mut decoder = MidiDecoder::new();
        let events = decode(&mut decoder, &[0x80, 0x01, 0x02, 0x03, 0x04, 0x05]);
        assert_eq!(events.len(), 2);
        assert_event(&events[0], &[0x80, 0x01, 0x02]);
        assert_event(&events[1], &[0x80, 0x03, 0x04]);

        // The residual 0x05 pairs with the next data byte; a fresh status
        // then switches the running status over.
        let events = decode(&mut decoder, &[0x06, 0xC0, 0x01, 0x02]);
        assert_eq!(events.len(), 3);
        assert_event(&events[0], &[0x80, 0x05, 0x06]);
        assert_event(&events[1], &[0xC0, 0x01]);
        assert_event(&events[2], &[0xC0, 0x02]);
    }

    #[test]
    fn system_realtime_is_transparent() {
        let mut decoder = MidiDecoder::new();
        let events = decode(&mut decoder, &[0x90, 0xF8, 0x3C, 0xFA, 0x7F]);
        assert_eq!(events.len(), 1);
        assert_event(&events[0], &[0x90, 0x3C, 0x7F]);
    }

    #[test]
    fn sysex_is_consumed_across_chunks_and_dropped() {
        let mut decoder = MidiDecoder::new();
        assert!(decode(&mut decoder, &[0xF0, 0x76, 0x3B]).is_empty());
        let events = decode(&mut decoder, &[0x77, 0xF7, 0x90, 0x40, 0x50]);
        assert_eq!(events.len(), 1);
        assert_event(&events[0], &[0x90, 0x40, 0x50]);
    }

    #[test]
    fn sysex_interrupted_by_voice_status_is_discarded() {
        let mut decoder = MidiDecoder::new();
        let events = decode(&mut decoder, &[0xF0, 0x11, 0x22, 0x90, 0x40, 0x50]);
        assert_eq!(events.len(), 1);
        assert_event(&events[0], &[0x90, 0x40, 0x50]);
    }

    #[test]
    fn realtime_inside_sysex_does_not_break_it() {
        let mut decoder = MidiDecoder::new();
        let events = decode(&mut decoder, &[0xF0, 0x11, 0xF8, 0x22, 0xF7, 0xC0, 0x05]);
        assert_eq!(events.len(), 1);
        assert_event(&events[0], &[0xC0, 0x05]);
    }

    #[test]
    fn tune_request_emits_single_byte_event() {
        let mut decoder = MidiDecoder::new();
        let events = decode(&mut decoder, &[0xF6]);
        assert_eq!(events.len(), 1);
        assert_event(&events[0], &[0xF6]);
    }

    #[test]
    fn song_position_decodes_with_two_data_bytes() {
        let mut decoder = MidiDecoder::new();
        let events = decode(&mut decoder, &[0xF2, 0x10, 0x20]);
        assert_eq!(events.len(), 1);
        assert_event(&events[0], &[0xF2, 0x10, 0x20]);
    }

    #[test]
    fn undefined_system_common_is_skipped() {
        let mut decoder = MidiDecoder::new();
        let events = decode(&mut decoder, &[0xF4, 0x90, 0x40, 0x50]);
        assert_eq!(events.len(), 1);
        assert_event(&events[0], &[0x90, 0x40, 0x50]);
    }

    #[test]
    fn status_mid_data_restarts_message() {
        let mut decoder = MidiDecoder::new();
        let events = decode(&mut decoder, &[0x90, 0x40, 0x91, 0x41, 0x51]);
        assert_eq!(events.len(), 1);
        assert_event(&events[0], &[0x91, 0x41, 0x51]);
    }

    #[test]
    fn stray_data_bytes_without_status_are_discarded() {
        let mut decoder = MidiDecoder::new();
        assert!(decode(&mut decoder, &[0x01, 0x02, 0x03]).is_empty());
    }

    #[test]
    fn oversized_sysex_truncates_silently() {
        let mut decoder = MidiDecoder::new();
        let mut bytes = vec![0xF0];
        bytes.extend(std::iter::repeat(0x55).take(4096));
        bytes.extend_from_slice(&[0xF7, 0x90, 0x40, 0x50]);
        let events = decode(&mut decoder, &bytes);
        assert_eq!(events.len(), 1);
        assert_event(&events[0], &[0x90, 0x40, 0x50]);
    }

    #[test]
    fn events_carry_the_period_frame() {
        let mut decoder = MidiDecoder::new();
        let mut map = MidiMap::new(4);
        decoder.feed(&[0x90, 0x40, 0x50], &mut map, 17);
        assert_eq!(map.events()[0].time, 17);
    }
}
