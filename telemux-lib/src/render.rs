//! Format renderers for decoded records.
//!
//! Renderers are stateless between records; the markup formats additionally
//! contribute an opening and closing document envelope, written when the
//! owning output channel opens and drains.

use std::fmt::Write;

use crate::descriptor::RenderFormat;
use crate::record::DecodedRecord;

pub enum Renderer {
    CompactLine,
    VerboseText,
    StructuredMarkup,
    GeospatialMarkup,
}

impl Renderer {
    pub fn new(format: RenderFormat) -> Self {
        match format {
            RenderFormat::CompactLine => Renderer::CompactLine,
            RenderFormat::VerboseText => Renderer::VerboseText,
            RenderFormat::StructuredMarkup => Renderer::StructuredMarkup,
            RenderFormat::GeospatialMarkup => Renderer::GeospatialMarkup,
        }
    }

    /// Opening document envelope, for formats that have one.
    pub fn prologue(&self) -> Option<String> {
        match self {
            Renderer::CompactLine | Renderer::VerboseText => None,
            Renderer::StructuredMarkup => {
                Some("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<records>\n".to_string())
            }
            Renderer::GeospatialMarkup => Some(
                "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
                 <kml xmlns=\"http://www.opengis.net/kml/2.2\">\n<Document>\n"
                    .to_string(),
            ),
        }
    }

    /// Closing document envelope, written at drain time.
    pub fn epilogue(&self) -> Option<String> {
        match self {
            Renderer::CompactLine | Renderer::VerboseText => None,
            Renderer::StructuredMarkup => Some("</records>\n".to_string()),
            Renderer::GeospatialMarkup => Some("</Document>\n</kml>\n".to_string()),
        }
    }

    pub fn render(&self, record: &DecodedRecord) -> String {
        match self {
            Renderer::CompactLine => render_compact(record),
            Renderer::VerboseText => render_verbose(record),
            Renderer::StructuredMarkup => render_xml(record),
            Renderer::GeospatialMarkup => render_kml(record),
        }
    }
}

fn timestamp(record: &DecodedRecord) -> Option<String> {
    record.timestamp.map(|t| t.to_rfc3339())
}

fn render_compact(record: &DecodedRecord) -> String {
    let mut out = format!("category={}", record.category);
    let _ = write!(
        out,
        " time={}",
        timestamp(record).unwrap_or_else(|| "-".to_string())
    );
    for field in &record.fields {
        let _ = write!(out, " {}={}", field.name, field.value);
    }
    out.push('\n');
    out
}

fn render_verbose(record: &DecodedRecord) -> String {
    let mut out = format!("--- {}", record.category);
    if let Some(t) = timestamp(record) {
        let _ = write!(out, " at {t}");
    }
    out.push('\n');
    for field in &record.fields {
        let _ = writeln!(out, "  {:<16}: {}", field.name, field.value);
    }
    out.push('\n');
    out
}

fn render_xml(record: &DecodedRecord) -> String {
    let mut out = format!("  <record category=\"{}\"", xml_escape(&record.category));
    if let Some(t) = timestamp(record) {
        let _ = write!(out, " time=\"{t}\"");
    }
    out.push_str(">\n");
    for field in &record.fields {
        let _ = writeln!(
            out,
            "    <field name=\"{}\">{}</field>",
            xml_escape(&field.name),
            xml_escape(&field.value.to_string())
        );
    }
    out.push_str("  </record>\n");
    out
}

fn render_kml(record: &DecodedRecord) -> String {
    // Records with no position contribute nothing to the overlay.
    let Some((lat, lon)) = record.position() else {
        return String::new();
    };
    let mut out = String::from("<Placemark>\n");
    let _ = writeln!(out, "  <name>{}</name>", xml_escape(&record.category));
    if let Some(t) = timestamp(record) {
        let _ = writeln!(out, "  <TimeStamp><when>{t}</when></TimeStamp>");
    }
    let mut description = String::new();
    for field in &record.fields {
        let _ = write!(description, "{}={} ", field.name, field.value);
    }
    let _ = writeln!(
        out,
        "  <description>{}</description>",
        xml_escape(description.trim_end())
    );
    let _ = writeln!(
        out,
        "  <Point><coordinates>{lon},{lat},0</coordinates></Point>"
    );
    out.push_str("</Placemark>\n");
    out
}

fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{DecodedRecord, FieldValue};
    use chrono::DateTime;

    fn plot() -> DecodedRecord {
        let mut rec =
            DecodedRecord::new("plot", DateTime::from_timestamp(1_700_000_000, 0));
        rec.push_field("track", FieldValue::Integer(42));
        rec.push_field("latitude", FieldValue::Float(45.8));
        rec.push_field("longitude", FieldValue::Float(16.0));
        rec
    }

    #[test]
    fn compact_is_one_line() {
        let line = render_compact(&plot());
        assert_eq!(
            line,
            "category=plot time=2023-11-14T22:13:20+00:00 track=42 latitude=45.8 longitude=16\n"
        );
    }

    #[test]
    fn compact_without_timestamp_uses_dash() {
        let rec = DecodedRecord::new("status", None);
        assert_eq!(render_compact(&rec), "category=status time=-\n");
    }

    #[test]
    fn verbose_lists_fields() {
        let text = render_verbose(&plot());
        assert!(text.starts_with("--- plot at "));
        assert!(text.contains("  track           : 42\n"));
        assert!(text.ends_with("\n\n"));
    }

    #[test]
    fn xml_escapes_content() {
        let mut rec = DecodedRecord::new("a<b", None);
        rec.push_field("note", FieldValue::Text("x & y".into()));
        let xml = render_xml(&rec);
        assert!(xml.contains("category=\"a&lt;b\""));
        assert!(xml.contains("<field name=\"note\">x &amp; y</field>"));
    }

    #[test]
    fn kml_renders_placemark_with_coordinates() {
        let kml = render_kml(&plot());
        assert!(kml.contains("<Placemark>"));
        assert!(kml.contains("<coordinates>16,45.8,0</coordinates>"));
    }

    #[test]
    fn kml_skips_records_without_position() {
        let rec = DecodedRecord::new("status", None);
        assert_eq!(render_kml(&rec), "");
    }

    #[test]
    fn markup_envelopes_pair_up() {
        for format in [RenderFormat::StructuredMarkup, RenderFormat::GeospatialMarkup] {
            let r = Renderer::new(format);
            assert!(r.prologue().is_some());
            assert!(r.epilogue().is_some());
        }
        for format in [RenderFormat::CompactLine, RenderFormat::VerboseText] {
            let r = Renderer::new(format);
            assert!(r.prologue().is_none());
            assert!(r.epilogue().is_none());
        }
    }
}
