use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use telemux::envelope::PayloadBlock;
use telemux::record::{DecodeError, DecodedRecord, FieldValue, RecordDecoder};

/// Record decoder backed by the category definitions table.
///
/// Surveillance payloads lead with a category octet; the table maps that
/// octet to a display name, one `id=name` pair per line with `#` comments.
/// Payload content past the category octet is carried as hex without
/// interpretation.
pub struct CategoryDecoder {
    names: HashMap<u8, String>,
}

impl CategoryDecoder {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading definitions {}", path.display()))?;
        let mut names = HashMap::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (id, name) = line
                .split_once('=')
                .with_context(|| format!("definitions line {}: expected id=name", lineno + 1))?;
            let id: u8 = id
                .trim()
                .parse()
                .with_context(|| format!("definitions line {}: bad category id", lineno + 1))?;
            names.insert(id, name.trim().to_string());
        }
        Ok(CategoryDecoder { names })
    }
}

impl RecordDecoder for CategoryDecoder {
    fn decode(&self, block: &PayloadBlock) -> Result<DecodedRecord, DecodeError> {
        let Some(&cat) = block.data.first() else {
            return Err(DecodeError::new("empty payload"));
        };
        let category = self
            .names
            .get(&cat)
            .cloned()
            .unwrap_or_else(|| format!("cat-{cat:03}"));
        let mut rec = DecodedRecord::new(category, block.timestamp);
        rec.push_field("category-id", FieldValue::Integer(i64::from(cat)));
        rec.push_field("length", FieldValue::Integer(block.data.len() as i64));
        let hex: String = block.data[1..].iter().map(|b| format!("{b:02x}")).collect();
        rec.push_field("data", FieldValue::Text(hex));
        Ok(rec)
    }
}
