//! Fixed-format framing: a leading header declares the total length and how
//! many length-prefixed sub-records follow. One envelope frequently packs
//! several records.
//!
//! ```text
//! u16 BE  total length, header included
//! u8      sub-record count
//! u8      reserved
//! then per sub-record: u16 BE body length, body bytes
//! ```

use tracing::trace;

use super::{FramingError, PayloadBlock, Unwrapped};
use crate::channel::RawFrame;

pub const HEADER_LEN: usize = 4;

#[derive(Debug, Default)]
pub struct FixedDecoder {
    buf: Vec<u8>,
}

impl FixedDecoder {
    pub(crate) fn unwrap(&mut self, frame: &RawFrame, cursor: u64) -> Unwrapped {
        self.buf.extend_from_slice(&frame.data);
        let mut out = Unwrapped::default();

        loop {
            if self.buf.len() < HEADER_LEN {
                break;
            }
            let total = usize::from(u16::from_be_bytes([self.buf[0], self.buf[1]]));
            let count = self.buf[2];
            if total < HEADER_LEN {
                out.faults.push(FramingError::BadBlockHeader(format!(
                    "declared length {total} shorter than header"
                )));
                self.buf.clear();
                break;
            }
            if self.buf.len() < total {
                break;
            }

            let region = &self.buf[HEADER_LEN..total];
            let mut pos = 0usize;
            for i in 0..count {
                if pos + 2 > region.len() {
                    out.faults.push(FramingError::TruncatedBlock {
                        needed: pos + 2,
                        have: region.len(),
                    });
                    break;
                }
                let len = usize::from(u16::from_be_bytes([region[pos], region[pos + 1]]));
                if pos + 2 + len > region.len() {
                    out.faults.push(FramingError::TruncatedBlock {
                        needed: pos + 2 + len,
                        have: region.len(),
                    });
                    break;
                }
                trace!(sub_record = i, len, "fixed-format block");
                out.blocks.push(PayloadBlock {
                    data: region[pos + 2..pos + 2 + len].to_vec(),
                    timestamp: frame.timestamp,
                    resync_offset: cursor,
                });
                pos += 2 + len;
            }
            self.buf.drain(..total);
        }

        out
    }

    pub(crate) fn flush(&mut self, _cursor: u64) -> Unwrapped {
        if self.buf.is_empty() {
            return Unwrapped::default();
        }
        let needed = if self.buf.len() >= 2 {
            usize::from(u16::from_be_bytes([self.buf[0], self.buf[1]]))
        } else {
            HEADER_LEN
        };
        let have = self.buf.len();
        self.buf.clear();
        Unwrapped::fault(FramingError::TruncatedBlock { needed, have })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Encapsulation;

    fn frame(data: &[u8]) -> RawFrame {
        RawFrame {
            data: data.to_vec(),
            timestamp: None,
            encap: Encapsulation::Fixed,
        }
    }

    fn envelope(bodies: &[&[u8]]) -> Vec<u8> {
        let payload: usize = bodies.iter().map(|b| 2 + b.len()).sum();
        let mut out = Vec::new();
        out.extend_from_slice(&((HEADER_LEN + payload) as u16).to_be_bytes());
        out.push(bodies.len() as u8);
        out.push(0);
        for body in bodies {
            out.extend_from_slice(&(body.len() as u16).to_be_bytes());
            out.extend_from_slice(body);
        }
        out
    }

    #[test]
    fn yields_one_block_per_declared_sub_record() {
        let stream = envelope(&[b"one", b"two", b"three"]);
        let mut dec = FixedDecoder::default();
        let out = dec.unwrap(&frame(&stream), stream.len() as u64);
        assert!(out.faults.is_empty());
        let bodies: Vec<&[u8]> = out.blocks.iter().map(|b| b.data.as_slice()).collect();
        assert_eq!(bodies, vec![&b"one"[..], b"two", b"three"]);
    }

    #[test]
    fn truncated_trailing_block_is_reported() {
        let mut stream = envelope(&[b"one", b"two"]);
        // Shorten the declared region so the second sub-record runs past it.
        let total = stream.len() as u16 - 2;
        stream.truncate(total as usize);
        stream[0..2].copy_from_slice(&total.to_be_bytes());

        let mut dec = FixedDecoder::default();
        let out = dec.unwrap(&frame(&stream), stream.len() as u64);
        assert_eq!(out.blocks.len(), 1, "leading complete block still yielded");
        assert_eq!(out.blocks[0].data, b"one");
        assert!(matches!(
            out.faults.as_slice(),
            [FramingError::TruncatedBlock { .. }]
        ));
    }

    #[test]
    fn envelope_split_across_frames() {
        let stream = envelope(&[b"payload"]);
        let (a, b) = stream.split_at(3);
        let mut dec = FixedDecoder::default();
        assert!(dec.unwrap(&frame(a), a.len() as u64).blocks.is_empty());
        let out = dec.unwrap(&frame(b), stream.len() as u64);
        assert_eq!(out.blocks.len(), 1);
        assert_eq!(out.blocks[0].data, b"payload");
    }

    #[test]
    fn empty_envelope_yields_nothing() {
        let stream = envelope(&[]);
        let mut dec = FixedDecoder::default();
        let out = dec.unwrap(&frame(&stream), stream.len() as u64);
        assert!(out.blocks.is_empty());
        assert!(out.faults.is_empty());
    }
}
