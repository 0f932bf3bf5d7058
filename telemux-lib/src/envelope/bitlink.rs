//! Flag-delimited link framing with byte stuffing.
//!
//! Frames are bounded by 0x7e flags. Inside a frame, 0x7d escapes the next
//! byte (XOR 0x20), so flags and escapes never appear in frame content. The
//! last two unstuffed bytes are a BE CRC-16 (CRC_16_IBM_SDLC) over the
//! payload. Any framing damage discards bytes up to the next flag.

use tracing::trace;

use super::{FramingError, PayloadBlock, Unwrapped};
use crate::channel::RawFrame;

pub const FLAG: u8 = 0x7e;
pub const ESCAPE: u8 = 0x7d;
const ESCAPE_XOR: u8 = 0x20;
/// Smallest frame: one payload byte plus the two FCS bytes.
const MIN_FRAME_LEN: usize = 3;

#[derive(Debug, Default)]
pub struct BitLinkDecoder {
    acc: Vec<u8>,
    escaping: bool,
    synced: bool,
}

impl BitLinkDecoder {
    pub(crate) fn unwrap(&mut self, frame: &RawFrame, cursor: u64) -> Unwrapped {
        let mut out = Unwrapped::default();

        for &b in &frame.data {
            if b == FLAG {
                if !self.synced {
                    // Bytes before the first flag are line noise.
                    self.synced = true;
                    continue;
                }
                if self.escaping {
                    out.faults
                        .push(FramingError::BadLinkFrame("escape before flag".into()));
                    self.acc.clear();
                    self.escaping = false;
                    continue;
                }
                if self.acc.is_empty() {
                    // Back-to-back flags between frames.
                    continue;
                }
                self.complete(&mut out, frame, cursor);
                continue;
            }

            if !self.synced {
                continue;
            }
            if self.escaping {
                self.acc.push(b ^ ESCAPE_XOR);
                self.escaping = false;
            } else if b == ESCAPE {
                self.escaping = true;
            } else {
                self.acc.push(b);
            }
        }

        out
    }

    fn complete(&mut self, out: &mut Unwrapped, frame: &RawFrame, cursor: u64) {
        if self.acc.len() < MIN_FRAME_LEN {
            out.faults.push(FramingError::BadLinkFrame(format!(
                "runt frame of {} bytes",
                self.acc.len()
            )));
            self.acc.clear();
            return;
        }

        let split = self.acc.len() - 2;
        let expected = u16::from_be_bytes([self.acc[split], self.acc[split + 1]]);
        let csum = crc::Crc::<u16>::new(&crc::CRC_16_IBM_SDLC);
        let computed = csum.checksum(&self.acc[..split]);
        if computed == expected {
            trace!(len = split, "link frame");
            out.blocks.push(PayloadBlock {
                data: self.acc[..split].to_vec(),
                timestamp: frame.timestamp,
                resync_offset: cursor,
            });
        } else {
            out.faults
                .push(FramingError::BadLinkFrame("fcs mismatch".into()));
        }
        self.acc.clear();
    }

    pub(crate) fn flush(&mut self, _cursor: u64) -> Unwrapped {
        if !self.synced || (self.acc.is_empty() && !self.escaping) {
            return Unwrapped::default();
        }
        let have = self.acc.len();
        self.acc.clear();
        self.escaping = false;
        Unwrapped::fault(FramingError::TruncatedBlock {
            needed: have.max(MIN_FRAME_LEN) + 1,
            have,
        })
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
            encap: Encapsulation::BitLink,
        }
    }

    /// Stuff `payload` + FCS into a flagged link frame.
    fn stuff(payload: &[u8]) -> Vec<u8> {
        let csum = crc::Crc::<u16>::new(&crc::CRC_16_IBM_SDLC);
        let fcs = csum.checksum(payload);
        let mut content = payload.to_vec();
        content.extend_from_slice(&fcs.to_be_bytes());

        let mut out = vec![FLAG];
        for b in content {
            if b == FLAG || b == ESCAPE {
                out.push(ESCAPE);
                out.push(b ^ 0x20);
            } else {
                out.push(b);
            }
        }
        out.push(FLAG);
        out
    }

    #[test]
    fn unstuffs_payload_and_checks_fcs() {
        // Payload deliberately contains both reserved bytes.
        let payload = [0x01, FLAG, 0x02, ESCAPE, 0x03];
        let stream = stuff(&payload);

        let mut dec = BitLinkDecoder::default();
        let out = dec.unwrap(&frame(&stream), stream.len() as u64);
        assert!(out.faults.is_empty(), "{:?}", out.faults);
        assert_eq!(out.blocks.len(), 1);
        assert_eq!(out.blocks[0].data, payload);
    }

    #[test]
    fn fcs_mismatch_resyncs_to_next_frame() {
        let mut bad = stuff(b"bad");
        bad[1] ^= 0x01; // first payload byte, stays clear of flag and escape
        let mut stream = bad;
        stream.extend_from_slice(&stuff(b"good"));

        let mut dec = BitLinkDecoder::default();
        let out = dec.unwrap(&frame(&stream), stream.len() as u64);
        assert_eq!(out.blocks.len(), 1);
        assert_eq!(out.blocks[0].data, b"good");
        assert!(matches!(
            out.faults.as_slice(),
            [FramingError::BadLinkFrame(_)]
        ));
    }

    #[test]
    fn noise_before_first_flag_is_discarded() {
        let mut stream = vec![0xaa, 0xbb, 0xcc];
        stream.extend_from_slice(&stuff(b"payload"));

        let mut dec = BitLinkDecoder::default();
        let out = dec.unwrap(&frame(&stream), stream.len() as u64);
        assert!(out.faults.is_empty());
        assert_eq!(out.blocks.len(), 1);
        assert_eq!(out.blocks[0].data, b"payload");
    }

    #[test]
    fn frame_split_across_reads() {
        let stream = stuff(b"split");
        let (a, b) = stream.split_at(3);
        let mut dec = BitLinkDecoder::default();
        assert!(dec.unwrap(&frame(a), a.len() as u64).blocks.is_empty());
        let out = dec.unwrap(&frame(b), stream.len() as u64);
        assert_eq!(out.blocks.len(), 1);
        assert_eq!(out.blocks[0].data, b"split");
    }

    #[test]
    fn flush_reports_open_frame() {
        let stream = stuff(b"unterminated");
        let mut dec = BitLinkDecoder::default();
        dec.unwrap(&frame(&stream[..stream.len() - 1]), 8);
        let out = dec.flush(8);
        assert!(matches!(
            out.faults.as_slice(),
            [FramingError::TruncatedBlock { .. }]
        ));
    }
}
