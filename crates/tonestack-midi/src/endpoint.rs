//! MIDI endpoint transport.
//!
//! An endpoint is a raw byte source read with non-blocking chunks from the
//! audio thread; `WouldBlock` ends the current drain. The production source
//! is an ALSA rawmidi handle; tests substitute scripted sources.

use std::io;

use serde::{Deserialize, Serialize};

use crate::{MidiDecoder, MidiMap};

/// Bytes requested per non-blocking read.
pub const READ_CHUNK_BYTES: usize = 1024;

/// Identity of a MIDI input endpoint as presented to the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MidiEndpointInfo {
    /// Opaque device name handed to the transport (e.g. `hw:1,0,0`).
    pub name: String,
    /// Human-readable display name.
    pub description: String,
}

/// Non-blocking raw byte source behind an endpoint.
pub trait MidiByteSource: Send {
    /// Reads up to `buf.len()` bytes. Returns `WouldBlock` when the stream is
    /// drained.
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// One open MIDI input: the byte source plus its decoder state.
///
/// Owned by the audio thread after activation; `drain` is called once per
/// period per endpoint.
pub struct MidiInputPort {
    info: MidiEndpointInfo,
    source: Box<dyn MidiByteSource>,
    decoder: MidiDecoder,
    chunk: [u8; READ_CHUNK_BYTES],
    failed: bool,
}

impl MidiInputPort {
    pub fn new(info: MidiEndpointInfo, source: Box<dyn MidiByteSource>) -> Self {
        Self {
            info,
            source,
            decoder: MidiDecoder::new(),
            chunk: [0; READ_CHUNK_BYTES],
            failed: false,
        }
    }

    /// Opens the endpoint over ALSA rawmidi.
    #[cfg(all(target_os = "linux", feature = "alsa-backend"))]
    pub fn open(info: MidiEndpointInfo) -> anyhow::Result<Self> {
        let source = alsa_backend::AlsaRawMidiInput::open(&info.name)?;
        Ok(Self::new(info, Box::new(source)))
    }

    pub fn info(&self) -> &MidiEndpointInfo {
        &self.info
    }

    /// Reads everything the endpoint has buffered and appends the decoded
    /// messages to `out`, tagged with `frame`.
    ///
    /// A transport error disables the endpoint for the rest of the session;
    /// audio keeps running without it.
    pub fn drain(&mut self, out: &mut MidiMap, frame: u32) {
        if self.failed {
            return;
        }
        loop {
            match self.source.read_chunk(&mut self.chunk) {
                Ok(0) => break,
                Ok(n) => self.decoder.feed(&self.chunk[..n], out, frame),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    tracing::warn!(
                        endpoint = %self.info.name,
                        error = %err,
                        "MIDI endpoint read failed; disabling endpoint"
                    );
                    self.failed = true;
                    break;
                }
            }
        }
    }
}

/// Extracts the display name from a rawmidi hint description.
///
/// Descriptions come back as e.g. `"M2, M2\nM2 Raw Midi"`; only the leading
/// segment is presentable.
pub fn display_name(description: &str) -> &str {
    let end = description
        .find([',', '\n'])
        .unwrap_or(description.len());
    if end == 0 {
        description
    } else {
        &description[..end]
    }
}

#[cfg(all(target_os = "linux", feature = "alsa-backend"))]
mod alsa_backend {
    use std::io::{self, Read};

    use alsa::rawmidi::Rawmidi;
    use alsa::Direction;
    use anyhow::Context;

    use super::MidiByteSource;

    /// Non-blocking ALSA rawmidi capture handle. The handle closes on drop.
    pub struct AlsaRawMidiInput {
        handle: Rawmidi,
    }

    impl AlsaRawMidiInput {
        pub fn open(device: &str) -> anyhow::Result<Self> {
            let handle = Rawmidi::new(device, Direction::Capture, true)
                .with_context(|| format!("failed to open MIDI device {device}"))?;
            Ok(Self { handle })
        }
    }

    impl MidiByteSource for AlsaRawMidiInput {
        fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.handle.io().read(buf)
        }
    }
}

/// Enumerates rawmidi input endpoints.
#[cfg(all(target_os = "linux", feature = "alsa-backend"))]
pub fn list_midi_inputs() -> Vec<MidiEndpointInfo> {
    use alsa::device_name::HintIter;
    use alsa::Direction;

    let Ok(hints) = HintIter::new_str(None, "rawmidi") else {
        return Vec::new();
    };
    hints
        .filter_map(|hint| {
            let name = hint.name?;
            let desc = hint.desc?;
            match hint.direction {
                None | Some(Direction::Capture) => Some(MidiEndpointInfo {
                    description: display_name(&desc).to_string(),
                    name,
                }),
                _ => None,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Returns scripted chunks, then `WouldBlock` forever.
    struct ScriptedSource {
        chunks: Vec<Vec<u8>>,
    }

    impl MidiByteSource for ScriptedSource {
        fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.chunks.is_empty() {
                return Err(io::Error::from(io::ErrorKind::WouldBlock));
            }
            let chunk = self.chunks.remove(0);
            buf[..chunk.len()].copy_from_slice(&chunk);
            Ok(chunk.len())
        }
    }

    fn port_with(chunks: Vec<Vec<u8>>) -> MidiInputPort {
        MidiInputPort::new(
            MidiEndpointInfo {
                name: "test".into(),
                description: "Test".into(),
            },
            Box::new(ScriptedSource { chunks }),
        )
    }

    #[test]
    fn drains_until_would_block() {
        let mut port = port_with(vec![vec![0x90, 0x40], vec![0x50, 0x80, 0x40, 0x00]]);
        let mut map = MidiMap::new(16);
        port.drain(&mut map, 0);
        assert_eq!(map.len(), 2);
        assert_eq!(map.events()[0].data(), &[0x90, 0x40, 0x50]);
        assert_eq!(map.events()[1].data(), &[0x80, 0x40, 0x00]);

        map.clear();
        port.drain(&mut map, 0);
        assert!(map.is_empty());
    }

    #[test]
    fn transport_error_disables_endpoint() {
        struct FailingSource;
        impl MidiByteSource for FailingSource {
            fn read_chunk(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::from(io::ErrorKind::BrokenPipe))
            }
        }

        let mut port = MidiInputPort::new(
            MidiEndpointInfo {
                name: "broken".into(),
                description: "Broken".into(),
            },
            Box::new(FailingSource),
        );
        let mut map = MidiMap::new(16);
        port.drain(&mut map, 0);
        port.drain(&mut map, 0);
        assert!(map.is_empty());
    }

    #[test]
    fn display_name_takes_leading_segment() {
        assert_eq!(display_name("M2, M2\nM2 Raw Midi"), "M2");
        assert_eq!(display_name("UMC204HD\nUSB Midi"), "UMC204HD");
        assert_eq!(display_name("Plain"), "Plain");
    }
}
