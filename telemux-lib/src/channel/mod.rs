//! Channel construction and shared channel types.
//!
//! A channel is a typed endpoint bound to one transport and one format tag.
//! The factory here is the only place channels come from: it maps a parsed
//! descriptor to the matching implementation and acquires the underlying
//! resource (file handle, socket, std stream). Acquisition is scoped: if
//! construction fails partway, whatever was opened is released before the
//! error returns.

mod input;
mod output;

pub use input::{InputChannel, Poll};
pub use output::{OutputChannel, WriteState};

use std::io;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::descriptor::{ChannelDescriptor, Encapsulation, FormatTag, TransportParams};
use crate::render::Renderer;
use crate::{Error, Result};

/// Upper bound on the number of output channels one engine drives.
pub const MAX_OUTPUT_CHANNELS: usize = 16;

/// One transport-level frame as produced by an input channel, before any
/// encapsulation has been stripped.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    pub data: Vec<u8>,
    /// Origin timestamp, when the transport supplies one (receive time for
    /// datagrams; capture framings carry their own record times instead).
    pub timestamp: Option<DateTime<Utc>>,
    /// Encapsulation tag inherited from the owning input channel.
    pub encap: Encapsulation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Open,
    Closed,
}

/// Build the input channel a descriptor names.
///
/// # Errors
/// [Error::UnknownFormat] if the descriptor carries a rendering tag,
/// [Error::ResourceUnavailable] if the file or socket cannot be acquired.
pub fn build_input(descriptor: &ChannelDescriptor) -> Result<InputChannel> {
    let encap = match descriptor.format {
        FormatTag::Encap(e) => e,
        FormatTag::Render(r) => {
            return Err(Error::UnknownFormat(format!(
                "{} is an output rendering, not an input encapsulation",
                r.tag()
            )))
        }
    };

    debug!(%descriptor, "building input channel");
    match descriptor.params.clone() {
        TransportParams::Std => Ok(InputChannel::from_stdin(descriptor.clone(), encap)),
        TransportParams::Disk {
            offset,
            repeat,
            frame_len,
        } => InputChannel::open_file(descriptor.clone(), encap, offset, repeat, frame_len),
        TransportParams::Udp {
            group,
            iface,
            port,
            restrict_source,
        } => InputChannel::open_udp(descriptor.clone(), encap, group, iface, port, restrict_source),
    }
}

/// Build the output channel a descriptor names. The renderer's prologue, if
/// the format has one, is written as part of construction.
///
/// # Errors
/// [Error::UnknownFormat] if the descriptor carries an encapsulation tag,
/// [Error::UnknownTransport] for transports with no output implementation,
/// [Error::ResourceUnavailable] if the sink cannot be acquired.
pub fn build_output(descriptor: &ChannelDescriptor) -> Result<OutputChannel> {
    let render = match descriptor.format {
        FormatTag::Render(r) => r,
        FormatTag::Encap(e) => {
            return Err(Error::UnknownFormat(format!(
                "{} is an input encapsulation, not an output rendering",
                e.tag()
            )))
        }
    };

    debug!(%descriptor, "building output channel");
    let sink: Box<dyn io::Write + Send> = match &descriptor.params {
        TransportParams::Std => Box::new(io::stdout()),
        TransportParams::Disk { .. } => {
            let file = std::fs::File::create(&descriptor.address).map_err(|err| {
                Error::ResourceUnavailable(format!("{}: {err}", descriptor.address))
            })?;
            Box::new(file)
        }
        TransportParams::Udp { .. } => {
            return Err(Error::UnknownTransport(
                "udp has no output implementation".into(),
            ))
        }
    };

    OutputChannel::new(descriptor.clone(), Renderer::new(render), sink).map_err(Error::Io)
}
