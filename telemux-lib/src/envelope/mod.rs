//! Encapsulation stripping.
//!
//! Frames arrive wrapped in whatever envelope the link or capture put around
//! them. The decoders here peel that envelope off and yield bare payload
//! blocks. Decoders are stateful: framings that span transport reads carry
//! partial bytes over to the next call, so one frame may legitimately yield
//! zero, one, or many blocks.
//!
//! A framing fault discards the offending frame or sub-block, realigns the
//! decoder, and decoding continues. Faults never propagate as errors.

mod bitlink;
mod capture;
mod fixed;
mod wrapper;

pub use bitlink::BitLinkDecoder;
pub use capture::CaptureDecoder;
pub use fixed::FixedDecoder;
pub use wrapper::WrapperDecoder;

use chrono::{DateTime, Utc};

use crate::channel::RawFrame;
use crate::descriptor::Encapsulation;

/// A bare protocol payload extracted from a [RawFrame].
#[derive(Debug, Clone, PartialEq)]
pub struct PayloadBlock {
    pub data: Vec<u8>,
    /// Origin timestamp, when the envelope or transport supplies one.
    pub timestamp: Option<DateTime<Utc>>,
    /// Input-stream byte offset just past the transport frame this block
    /// came from. Reported alongside decode failures so the operator can
    /// find the spot in a replayed stream.
    pub resync_offset: u64,
}

/// A recoverable framing fault. Never fatal: the engine counts and logs
/// these and the decoder has already realigned past the bad bytes.
#[derive(thiserror::Error, Debug)]
pub enum FramingError {
    #[error("bad capture header: {0}")]
    BadCaptureHeader(String),
    #[error("wrapper checksum mismatch: expected {expected:#06x}, computed {computed:#06x}")]
    WrapperChecksumMismatch { expected: u16, computed: u16 },
    #[error("bad wrapper length {0}")]
    BadWrapperLength(u16),
    #[error("bad block header: {0}")]
    BadBlockHeader(String),
    #[error("truncated block: need {needed} bytes, have {have}")]
    TruncatedBlock { needed: usize, have: usize },
    #[error("bad link frame: {0}")]
    BadLinkFrame(String),
}

/// Result of unwrapping one frame: the payload blocks recovered plus any
/// framing faults encountered along the way.
#[derive(Debug, Default)]
pub struct Unwrapped {
    pub blocks: Vec<PayloadBlock>,
    pub faults: Vec<FramingError>,
}

impl Unwrapped {
    pub(crate) fn fault(err: FramingError) -> Self {
        Unwrapped {
            blocks: Vec::new(),
            faults: vec![err],
        }
    }
}

/// Envelope decoder, dispatched on the encapsulation tag carried by the
/// owning input channel.
pub enum EnvelopeDecoder {
    Raw,
    Capture(CaptureDecoder),
    Wrapper(WrapperDecoder),
    Fixed(FixedDecoder),
    BitLink(BitLinkDecoder),
}

impl EnvelopeDecoder {
    pub fn new(tag: Encapsulation) -> Self {
        match tag {
            Encapsulation::Raw => EnvelopeDecoder::Raw,
            Encapsulation::Capture => EnvelopeDecoder::Capture(CaptureDecoder::default()),
            Encapsulation::Wrapper => EnvelopeDecoder::Wrapper(WrapperDecoder::default()),
            Encapsulation::Fixed => EnvelopeDecoder::Fixed(FixedDecoder::default()),
            Encapsulation::BitLink => EnvelopeDecoder::BitLink(BitLinkDecoder::default()),
        }
    }

    /// Strip the envelope from `frame`. `cursor` is the input channel's byte
    /// cursor after the frame was read; it becomes the resync offset of every
    /// block recovered from the frame.
    pub fn unwrap(&mut self, frame: &RawFrame, cursor: u64) -> Unwrapped {
        match self {
            EnvelopeDecoder::Raw => {
                let mut out = Unwrapped::default();
                if !frame.data.is_empty() {
                    out.blocks.push(PayloadBlock {
                        data: frame.data.clone(),
                        timestamp: frame.timestamp,
                        resync_offset: cursor,
                    });
                }
                out
            }
            EnvelopeDecoder::Capture(d) => d.unwrap(frame, cursor),
            EnvelopeDecoder::Wrapper(d) => d.unwrap(frame, cursor),
            EnvelopeDecoder::Fixed(d) => d.unwrap(frame, cursor),
            EnvelopeDecoder::BitLink(d) => d.unwrap(frame, cursor),
        }
    }

    /// End of stream: stateful decoders report any partial remainder they
    /// were still waiting to complete.
    pub fn flush(&mut self, cursor: u64) -> Unwrapped {
        match self {
            EnvelopeDecoder::Raw => Unwrapped::default(),
            EnvelopeDecoder::Capture(d) => d.flush(cursor),
            EnvelopeDecoder::Wrapper(d) => d.flush(cursor),
            EnvelopeDecoder::Fixed(d) => d.flush(cursor),
            EnvelopeDecoder::BitLink(d) => d.flush(cursor),
        }
    }
}
