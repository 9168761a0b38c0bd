//! Length-prefix frame codec.
//!
//! Wire format:
//! ```text
//! ┌────────────┬──────────────────────────┐
//! │ Length (4B)│ postcard payload (N B)   │
//! │ LE u32     │                          │
//! └────────────┴──────────────────────────┘
//! ```
//!
//! The codec accumulates incoming bytes and yields complete frames. A
//! single read may carry part of a header, part of a payload, or several
//! frames back to back; every completed frame is handed out.

use log::warn;

/// Maximum frame payload size.
pub const MAX_FRAME_SIZE: usize = 4096;

/// Frame header size (4-byte little-endian length).
pub const HEADER_SIZE: usize = 4;

enum DecoderState {
    ReadingHeader { collected: usize },
    ReadingPayload { expected: usize, collected: usize },
}

/// Streaming frame decoder, one per connected client.
pub struct FrameDecoder {
    state: DecoderState,
    header_buf: [u8; HEADER_SIZE],
    payload_buf: Box<[u8; MAX_FRAME_SIZE]>,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            state: DecoderState::ReadingHeader { collected: 0 },
            header_buf: [0; HEADER_SIZE],
            payload_buf: Box::new([0; MAX_FRAME_SIZE]),
        }
    }

    /// Feed bytes into the decoder, calling `on_frame` for every complete
    /// payload. Returns the number of frames produced.
    ///
    /// A zero or oversized length resets the decoder to header reading.
    pub fn feed(&mut self, data: &[u8], mut on_frame: impl FnMut(&[u8])) -> usize {
        let mut offset = 0;
        let mut frames = 0;

        while offset < data.len() {
            match &mut self.state {
                DecoderState::ReadingHeader { collected } => {
                    let needed = HEADER_SIZE - *collected;
                    let to_copy = needed.min(data.len() - offset);

                    self.header_buf[*collected..*collected + to_copy].copy_from_slice(&data[offset..offset + to_copy]);
                    *collected += to_copy;
                    offset += to_copy;

                    if *collected == HEADER_SIZE {
                        let expected = u32::from_le_bytes(self.header_buf) as usize;
                        if expected == 0 || expected > MAX_FRAME_SIZE {
                            warn!("IO: dropping frame header with length {}", expected);
                            self.state = DecoderState::ReadingHeader { collected: 0 };
                            continue;
                        }
                        self.state = DecoderState::ReadingPayload { expected, collected: 0 };
                    }
                }

                DecoderState::ReadingPayload { expected, collected } => {
                    let needed = *expected - *collected;
                    let to_copy = needed.min(data.len() - offset);

                    self.payload_buf[*collected..*collected + to_copy].copy_from_slice(&data[offset..offset + to_copy]);
                    *collected += to_copy;
                    offset += to_copy;

                    if *collected == *expected {
                        let len = *expected;
                        self.state = DecoderState::ReadingHeader { collected: 0 };
                        on_frame(&self.payload_buf[..len]);
                        frames += 1;
                    }
                }
            }
        }

        frames
    }

    /// Whether a frame is partially received.
    pub fn is_mid_frame(&self) -> bool {
        !matches!(self.state, DecoderState::ReadingHeader { collected: 0 })
    }

    /// Reset decoder state (e.g. after the client reconnects).
    pub fn reset(&mut self) {
        self.state = DecoderState::ReadingHeader { collected: 0 };
    }
}

/// Encode a payload into a length-prefixed frame.
///
/// Writes `[LE-u32 length][payload]` into `out_buf`.
/// Returns the total number of bytes written.
pub fn encode_frame(payload: &[u8], out_buf: &mut [u8]) -> Option<usize> {
    let total = HEADER_SIZE + payload.len();
    if total > out_buf.len() || payload.is_empty() || payload.len() > MAX_FRAME_SIZE {
        return None;
    }

    let len_bytes = (payload.len() as u32).to_le_bytes();
    out_buf[..HEADER_SIZE].copy_from_slice(&len_bytes);
    out_buf[HEADER_SIZE..total].copy_from_slice(payload);

    Some(total)
}

/// Allocate and encode a frame in one go.
pub fn frame_to_vec(payload: &[u8]) -> Option<Vec<u8>> {
    let mut out = vec![0u8; HEADER_SIZE + payload.len()];
    let n = encode_frame(payload, &mut out)?;
    out.truncate(n);
    Some(out)
}
