//! Length-prefixed wrapper framing.
//!
//! Each wrapper is a 6 byte header followed by the payload:
//!
//! ```text
//! u16 BE  total length, header included
//! u16 BE  sequence number
//! u16 BE  CRC-16 of the payload (CRC_16_IBM_SDLC)
//! ```
//!
//! A checksum mismatch discards exactly the one wrapper; the trusted length
//! prefix still advances past it.

use tracing::trace;

use super::{FramingError, PayloadBlock, Unwrapped};
use crate::channel::RawFrame;

pub const HEADER_LEN: usize = 6;

#[derive(Debug, Default)]
pub struct WrapperDecoder {
    buf: Vec<u8>,
}

impl WrapperDecoder {
    pub(crate) fn unwrap(&mut self, frame: &RawFrame, cursor: u64) -> Unwrapped {
        self.buf.extend_from_slice(&frame.data);
        let mut out = Unwrapped::default();

        loop {
            if self.buf.len() < HEADER_LEN {
                break;
            }
            let total = usize::from(u16::from_be_bytes([self.buf[0], self.buf[1]]));
            if total < HEADER_LEN {
                out.faults
                    .push(FramingError::BadWrapperLength(total as u16));
                // Length prefix is the only delimiter; without it the rest of
                // the buffered bytes cannot be walked.
                self.buf.clear();
                break;
            }
            if self.buf.len() < total {
                break;
            }

            let seq = u16::from_be_bytes([self.buf[2], self.buf[3]]);
            let expected = u16::from_be_bytes([self.buf[4], self.buf[5]]);
            let payload = &self.buf[HEADER_LEN..total];
            let csum = crc::Crc::<u16>::new(&crc::CRC_16_IBM_SDLC);
            let computed = csum.checksum(payload);
            if computed == expected {
                trace!(seq, len = payload.len(), "wrapper");
                out.blocks.push(PayloadBlock {
                    data: payload.to_vec(),
                    timestamp: frame.timestamp,
                    resync_offset: cursor,
                });
            } else {
                out.faults.push(FramingError::WrapperChecksumMismatch {
                    expected,
                    computed,
                });
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
