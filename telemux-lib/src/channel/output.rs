//! Output channel implementation.

use std::io::Write;

use crate::descriptor::ChannelDescriptor;
use crate::record::DecodedRecord;
use crate::render::Renderer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteState {
    Open,
    Closed,
    Errored,
}

/// An output channel: a sink plus the renderer bound to it.
///
/// Writes go straight to the sink, one blocking write per record. A sink
/// failure therefore surfaces on the record that hit it, and a sink that
/// blocks (full pipe) blocks the whole fan-out step until the write
/// completes or fails. Callers that cannot accept that should put the slow
/// sink behind a pipe with its own drain.
pub struct OutputChannel {
    descriptor: ChannelDescriptor,
    renderer: Renderer,
    state: WriteState,
    sink: Box<dyn Write + Send>,
    delivered: u64,
    last_error: Option<String>,
}

impl OutputChannel {
    /// Wrap a sink. Writes the renderer's prologue, if the format has one,
    /// so a construction failure surfaces before the engine starts.
    pub(crate) fn new(
        descriptor: ChannelDescriptor,
        renderer: Renderer,
        mut sink: Box<dyn Write + Send>,
    ) -> std::io::Result<Self> {
        if let Some(prologue) = renderer.prologue() {
            sink.write_all(prologue.as_bytes())?;
        }
        Ok(OutputChannel {
            descriptor,
            renderer,
            state: WriteState::Open,
            sink,
            delivered: 0,
            last_error: None,
        })
    }

    pub fn descriptor(&self) -> &ChannelDescriptor {
        &self.descriptor
    }

    pub fn state(&self) -> WriteState {
        self.state
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Render and write one record. A failed write marks the channel
    /// [WriteState::Errored]; the caller decides what to do with the rest of
    /// its channels.
    pub fn write_record(&mut self, record: &DecodedRecord) -> std::io::Result<()> {
        if self.state != WriteState::Open {
            return Ok(());
        }
        let text = self.renderer.render(record);
        match self.sink.write_all(text.as_bytes()) {
            Ok(()) => {
                self.delivered += 1;
                Ok(())
            }
            Err(err) => {
                self.last_error = Some(err.to_string());
                self.state = WriteState::Errored;
                Err(err)
            }
        }
    }

    /// Write the renderer's closing envelope, flush, and close. Errored
    /// channels are left alone; their failure is already recorded.
    pub fn finish(&mut self) -> std::io::Result<()> {
        if self.state != WriteState::Open {
            return Ok(());
        }
        let zult = self
            .renderer
            .epilogue()
            .map_or(Ok(()), |e| self.sink.write_all(e.as_bytes()))
            .and_then(|()| self.sink.flush());
        match zult {
            Ok(()) => {
                self.state = WriteState::Closed;
                Ok(())
            }
            Err(err) => {
                self.last_error = Some(err.to_string());
                self.state = WriteState::Errored;
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{ChannelDescriptor, RenderFormat};
    use crate::record::{DecodedRecord, FieldValue};
    use std::io;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct FailAfter(usize);

    impl Write for FailAfter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.0 == 0 {
                return Err(io::Error::new(io::ErrorKind::Other, "sink failed"));
            }
            self.0 -= 1;
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn record(n: i64) -> DecodedRecord {
        let mut rec = DecodedRecord::new("test", None);
        rec.push_field("n", FieldValue::Integer(n));
        rec
    }

    fn descriptor() -> ChannelDescriptor {
        ChannelDescriptor::parse("std - structured-markup").unwrap()
    }

    #[test]
    fn envelope_wraps_the_record_stream() {
        let buf = SharedBuf::default();
        let mut ch = OutputChannel::new(
            descriptor(),
            Renderer::new(RenderFormat::StructuredMarkup),
            Box::new(buf.clone()),
        )
        .unwrap();
        ch.write_record(&record(1)).unwrap();
        ch.finish().unwrap();
        assert_eq!(ch.state(), WriteState::Closed);
        assert_eq!(ch.delivered(), 1);

        let out = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert!(out.starts_with("<?xml"));
        assert!(out.trim_end().ends_with("</records>"));
    }

    #[test]
    fn failed_write_marks_channel_errored() {
        let mut ch = OutputChannel::new(
            descriptor(),
            Renderer::new(RenderFormat::StructuredMarkup),
            Box::new(FailAfter(2)), // prologue and one record succeed
        )
        .unwrap();
        ch.write_record(&record(1)).unwrap();
        assert!(ch.write_record(&record(2)).is_err());
        assert_eq!(ch.state(), WriteState::Errored);
        assert_eq!(ch.delivered(), 1);
        assert!(ch.last_error().is_some());

        // Errored channels ignore further traffic and skip the epilogue.
        ch.write_record(&record(3)).unwrap();
        ch.finish().unwrap();
        assert_eq!(ch.state(), WriteState::Errored);
        assert_eq!(ch.delivered(), 1);
    }
}
