use std::io::Write;
use std::path::Path;

use telemux::envelope::PayloadBlock;
use telemux::record::{DecodeError, DecodedRecord, FieldValue, RecordDecoder};

/// Decoder that maps every payload block to one record carrying the block
/// length and leading byte.
pub struct BlockDecoder;

impl RecordDecoder for BlockDecoder {
    fn decode(&self, block: &PayloadBlock) -> Result<DecodedRecord, DecodeError> {
        let mut rec = DecodedRecord::new("block", block.timestamp);
        rec.push_field("length", FieldValue::Integer(block.data.len() as i64));
        rec.push_field(
            "first",
            FieldValue::Integer(i64::from(*block.data.first().unwrap_or(&0))),
        );
        rec.push_field("data", FieldValue::Text(hex::encode(&block.data)));
        Ok(rec)
    }
}

/// Write `count` frames of `frame_len` bytes, each filled with its index.
pub fn write_frames(path: &Path, count: u8, frame_len: usize) {
    let mut file = std::fs::File::create(path).unwrap();
    for i in 0..count {
        file.write_all(&vec![i; frame_len]).unwrap();
    }
}

pub fn read_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(String::from)
        .collect()
}
