//! pcap capture-file framing.
//!
//! The stream opens with a 24 byte global header, then repeats 16 byte
//! record headers each followed by a captured link-layer frame. Only the
//! UDP payload of Ethernet/IPv4/UDP records is surfaced; records carrying
//! anything else yield no blocks.

use chrono::DateTime;
use tracing::{debug, trace};

use super::{FramingError, PayloadBlock, Unwrapped};
use crate::channel::RawFrame;

const GLOBAL_HEADER_LEN: usize = 24;
const RECORD_HEADER_LEN: usize = 16;
const MAGIC: u32 = 0xa1b2_c3d4;
const MAGIC_SWAPPED: u32 = 0xd4c3_b2a1;
/// Upper bound on one captured record, used when the stream's snap length
/// field is zero.
const MAX_RECORD_LEN: u32 = 256 * 1024;

#[derive(Debug, Clone, Copy)]
struct StreamHeader {
    big_endian: bool,
    snap_len: u32,
}

#[derive(Debug, Default)]
pub struct CaptureDecoder {
    buf: Vec<u8>,
    header: Option<StreamHeader>,
}

impl CaptureDecoder {
    pub(crate) fn unwrap(&mut self, frame: &RawFrame, cursor: u64) -> Unwrapped {
        self.buf.extend_from_slice(&frame.data);
        let mut out = Unwrapped::default();

        if self.header.is_none() {
            if self.buf.len() < GLOBAL_HEADER_LEN {
                return out;
            }
            let magic = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
            let big_endian = match magic {
                MAGIC => true,
                MAGIC_SWAPPED => false,
                _ => {
                    out.faults.push(FramingError::BadCaptureHeader(format!(
                        "bad magic {magic:#010x}"
                    )));
                    self.buf.clear();
                    return out;
                }
            };
            let snap_len = read_u32(&self.buf[16..20], big_endian);
            trace!(big_endian, snap_len, "capture stream header");
            self.header = Some(StreamHeader {
                big_endian,
                snap_len,
            });
            self.buf.drain(..GLOBAL_HEADER_LEN);
        }

        let header = self.header.expect("stream header parsed above");
        loop {
            if self.buf.len() < RECORD_HEADER_LEN {
                break;
            }
            let ts_sec = read_u32(&self.buf[0..4], header.big_endian);
            let ts_usec = read_u32(&self.buf[4..8], header.big_endian);
            let incl_len = read_u32(&self.buf[8..12], header.big_endian);

            let limit = if header.snap_len > 0 {
                header.snap_len
            } else {
                MAX_RECORD_LEN
            };
            if incl_len == 0 || incl_len > limit {
                out.faults.push(FramingError::BadCaptureHeader(format!(
                    "record length {incl_len} out of range (limit {limit})"
                )));
                // No sync marker to hunt for; drop the buffered remainder and
                // realign at the next transport frame.
                self.buf.clear();
                break;
            }

            let total = RECORD_HEADER_LEN + incl_len as usize;
            if self.buf.len() < total {
                break;
            }

            let record = &self.buf[RECORD_HEADER_LEN..total];
            if let Some(payload) = udp_payload(record) {
                if !payload.is_empty() {
                    let nsec = ts_usec.checked_mul(1000);
                    let timestamp =
                        nsec.and_then(|n| DateTime::from_timestamp(i64::from(ts_sec), n));
                    out.blocks.push(PayloadBlock {
                        data: payload.to_vec(),
                        timestamp,
                        resync_offset: cursor,
                    });
                }
            } else {
                debug!(incl_len, "skipping non-udp capture record");
            }
            self.buf.drain(..total);
        }

        out
    }

    pub(crate) fn flush(&mut self, _cursor: u64) -> Unwrapped {
        if self.buf.is_empty() {
            return Unwrapped::default();
        }
        let needed = if self.header.is_none() {
            GLOBAL_HEADER_LEN
        } else if self.buf.len() >= RECORD_HEADER_LEN {
            let header = self.header.expect("checked above");
            RECORD_HEADER_LEN + read_u32(&self.buf[8..12], header.big_endian) as usize
        } else {
            RECORD_HEADER_LEN
        };
        let have = self.buf.len();
        self.buf.clear();
        Unwrapped::fault(FramingError::TruncatedBlock { needed, have })
    }
}

fn read_u32(b: &[u8], big_endian: bool) -> u32 {
    let bytes = [b[0], b[1], b[2], b[3]];
    if big_endian {
        u32::from_be_bytes(bytes)
    } else {
        u32::from_le_bytes(bytes)
    }
}

/// Walk Ethernet II, IPv4, UDP headers and return the UDP payload, or `None`
/// for any record that is not an IPv4/UDP datagram.
fn udp_payload(record: &[u8]) -> Option<&[u8]> {
    if record.len() < 14 {
        return None;
    }
    let ethertype = u16::from_be_bytes([record[12], record[13]]);
    if ethertype != 0x0800 {
        return None;
    }
    let ip = &record[14..];
    if ip.len() < 20 || ip[0] >> 4 != 4 {
        return None;
    }
    let ihl = usize::from(ip[0] & 0x0f) * 4;
    if ihl < 20 || ip.len() < ihl + 8 {
        return None;
    }
    if ip[9] != 17 {
        return None;
    }
    let udp = &ip[ihl..];
    let udp_len = usize::from(u16::from_be_bytes([udp[4], udp[5]]));
    if udp_len < 8 {
        return None;
    }
    Some(&udp[8..udp_len.min(udp.len())])
}
