//! Channel descriptor parsing.
//!
//! A descriptor is a short textual description of one channel endpoint:
//!
//! ```text
//! <transport> <address-or-path>[:<param>]* <format-tag>
//! ```
//!
//! Tokens are whitespace separated, transport parameters colon separated.
//! Examples:
//!
//! ```text
//! std - verbose-text
//! disk replay.pcap:0:inf capture-file
//! udp 232.1.1.12:10.17.58.37:21112:S raw
//! ```

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::Serialize;

use crate::{Error, Result};

/// Default element length for chunked stream reads (std and disk transports).
pub const DEFAULT_FRAME_LEN: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Transport {
    Std,
    Disk,
    Udp,
}

impl Transport {
    pub fn tag(&self) -> &'static str {
        match self {
            Transport::Std => "std",
            Transport::Disk => "disk",
            Transport::Udp => "udp",
        }
    }

    fn from_tag(s: &str) -> Option<Self> {
        match s {
            "std" => Some(Transport::Std),
            "disk" => Some(Transport::Disk),
            "udp" => Some(Transport::Udp),
            _ => None,
        }
    }
}

/// Input-side encapsulation carried by a frame before the payload is usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Encapsulation {
    /// Frame body is the payload.
    Raw,
    /// pcap capture file records with link/transport headers to skip.
    Capture,
    /// Length-prefixed wrapper with a payload checksum.
    Wrapper,
    /// Fixed header declaring length and sub-record count.
    Fixed,
    /// Flag-delimited link framing with byte stuffing and a trailing FCS.
    BitLink,
}

impl Encapsulation {
    pub fn tag(&self) -> &'static str {
        match self {
            Encapsulation::Raw => "raw",
            Encapsulation::Capture => "capture-file",
            Encapsulation::Wrapper => "wrapper-protocol",
            Encapsulation::Fixed => "fixed-format",
            Encapsulation::BitLink => "bit-oriented-link",
        }
    }

    fn from_tag(s: &str) -> Option<Self> {
        match s {
            "raw" => Some(Encapsulation::Raw),
            "capture-file" => Some(Encapsulation::Capture),
            "wrapper-protocol" => Some(Encapsulation::Wrapper),
            "fixed-format" => Some(Encapsulation::Fixed),
            "bit-oriented-link" => Some(Encapsulation::BitLink),
            _ => None,
        }
    }
}

/// Output-side rendering applied to each decoded record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RenderFormat {
    CompactLine,
    VerboseText,
    StructuredMarkup,
    GeospatialMarkup,
}

impl RenderFormat {
    pub fn tag(&self) -> &'static str {
        match self {
            RenderFormat::CompactLine => "compact-line",
            RenderFormat::VerboseText => "verbose-text",
            RenderFormat::StructuredMarkup => "structured-markup",
            RenderFormat::GeospatialMarkup => "geospatial-markup",
        }
    }

    fn from_tag(s: &str) -> Option<Self> {
        match s {
            "compact-line" => Some(RenderFormat::CompactLine),
            "verbose-text" => Some(RenderFormat::VerboseText),
            "structured-markup" => Some(RenderFormat::StructuredMarkup),
            "geospatial-markup" => Some(RenderFormat::GeospatialMarkup),
            _ => None,
        }
    }
}

/// Either side's format tag. Inputs must carry an [Encapsulation] tag,
/// outputs a [RenderFormat] tag; the channel factory enforces the side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FormatTag {
    Encap(Encapsulation),
    Render(RenderFormat),
}

impl FormatTag {
    fn from_tag(s: &str) -> Option<Self> {
        Encapsulation::from_tag(s)
            .map(FormatTag::Encap)
            .or_else(|| RenderFormat::from_tag(s).map(FormatTag::Render))
    }

    pub fn tag(&self) -> &'static str {
        match self {
            FormatTag::Encap(e) => e.tag(),
            FormatTag::Render(r) => r.tag(),
        }
    }
}

/// Replay count for the disk transport.
///
/// `Times(0)` is normalized to a single pass; `inf` in the grammar selects
/// `Forever`. Negative numerals are rejected at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Repeat {
    Times(u32),
    Forever,
}

impl Repeat {
    /// Total number of passes over the file, where `Times(0)` means one.
    pub fn passes(&self) -> Option<u32> {
        match self {
            Repeat::Times(n) => Some((*n).max(1)),
            Repeat::Forever => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TransportParams {
    Std,
    Disk {
        offset: u64,
        repeat: Repeat,
        frame_len: usize,
    },
    Udp {
        group: Ipv4Addr,
        iface: Ipv4Addr,
        port: u16,
        restrict_source: bool,
    },
}

/// Parsed form of one channel descriptor. Immutable once constructed;
/// reconfiguring a channel means parsing a new descriptor and rebuilding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelDescriptor {
    pub transport: Transport,
    pub address: String,
    pub params: TransportParams,
    pub format: FormatTag,
    pub failover_group: Option<u32>,
}

impl ChannelDescriptor {
    /// Parse a descriptor string.
    ///
    /// # Errors
    /// [Error::MalformedDescriptor] naming the offending token,
    /// [Error::UnknownTransport], or [Error::UnknownFormat]. No channel is
    /// ever constructed from a descriptor that fails here.
    pub fn parse(s: &str) -> Result<ChannelDescriptor> {
        let tokens: Vec<&str> = s.split_whitespace().collect();
        if tokens.len() != 3 {
            return Err(Error::malformed(
                s.trim(),
                format!("expected 3 tokens, found {}", tokens.len()),
            ));
        }

        let transport = Transport::from_tag(tokens[0])
            .ok_or_else(|| Error::UnknownTransport(tokens[0].to_string()))?;
        let format = FormatTag::from_tag(tokens[2])
            .ok_or_else(|| Error::UnknownFormat(tokens[2].to_string()))?;

        let (address, params) = match transport {
            Transport::Std => parse_std(tokens[1])?,
            Transport::Disk => parse_disk(tokens[1])?,
            Transport::Udp => parse_udp(tokens[1])?,
        };

        Ok(ChannelDescriptor {
            transport,
            address,
            params,
            format,
            failover_group: None,
        })
    }
}

impl FromStr for ChannelDescriptor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ChannelDescriptor::parse(s)
    }
}

impl fmt::Display for ChannelDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ", self.transport.tag())?;
        match &self.params {
            TransportParams::Std => write!(f, "-")?,
            TransportParams::Disk {
                offset,
                repeat,
                frame_len,
            } => {
                write!(f, "{}:{offset}", self.address)?;
                match repeat {
                    Repeat::Times(n) => write!(f, ":{n}")?,
                    Repeat::Forever => write!(f, ":inf")?,
                }
                write!(f, ":{frame_len}")?;
            }
            TransportParams::Udp {
                group,
                iface,
                port,
                restrict_source,
            } => {
                write!(f, "{group}:{iface}:{port}")?;
                if *restrict_source {
                    write!(f, ":S")?;
                }
            }
        }
        write!(f, " {}", self.format.tag())
    }
}

fn parse_std(spec: &str) -> Result<(String, TransportParams)> {
    // The address token is a placeholder for the std transport; accept any
    // single token so `std 0 ...` and `std - ...` both work.
    if spec.contains(':') {
        return Err(Error::malformed(spec, "std transport takes no parameters"));
    }
    Ok((spec.to_string(), TransportParams::Std))
}

fn parse_disk(spec: &str) -> Result<(String, TransportParams)> {
    let mut parts = spec.split(':');
    let path = parts.next().unwrap_or_default();
    if path.is_empty() {
        return Err(Error::malformed(spec, "missing file path"));
    }
    let rest: Vec<&str> = parts.collect();
    if rest.is_empty() || rest.len() > 3 {
        return Err(Error::malformed(
            spec,
            "expected <path>:<offset>[:<repeat>[:<frame-len>]]",
        ));
    }

    let offset = parse_num::<u64>(rest[0], "offset")?;
    let repeat = match rest.get(1) {
        None => Repeat::Times(0),
        Some(&"inf") => Repeat::Forever,
        Some(tok) => Repeat::Times(parse_num::<u32>(tok, "repeat count")?),
    };
    let frame_len = match rest.get(2) {
        None => DEFAULT_FRAME_LEN,
        Some(tok) => {
            let n = parse_num::<usize>(tok, "frame length")?;
            if n == 0 {
                return Err(Error::malformed(*tok, "frame length must be non-zero"));
            }
            n
        }
    };

    Ok((
        path.to_string(),
        TransportParams::Disk {
            offset,
            repeat,
            frame_len,
        },
    ))
}

fn parse_udp(spec: &str) -> Result<(String, TransportParams)> {
    let parts: Vec<&str> = spec.split(':').collect();
    if parts.len() < 3 || parts.len() > 4 {
        return Err(Error::malformed(
            spec,
            "expected <group>:<iface>:<port>[:S]",
        ));
    }

    let group = parse_ipv4(parts[0], "group address")?;
    let iface = parse_ipv4(parts[1], "interface address")?;
    let port = parse_num::<u16>(parts[2], "port")?;
    if port == 0 {
        return Err(Error::malformed(parts[2], "port must be non-zero"));
    }
    let restrict_source = match parts.get(3) {
        None => false,
        Some(&"S") => true,
        Some(tok) => return Err(Error::malformed(*tok, "expected trailing S")),
    };

    Ok((
        parts[0].to_string(),
        TransportParams::Udp {
            group,
            iface,
            port,
            restrict_source,
        },
    ))
}

fn parse_num<T: FromStr>(token: &str, what: &str) -> Result<T> {
    token
        .parse::<T>()
        .map_err(|_| Error::malformed(token, format!("invalid {what}")))
}

fn parse_ipv4(token: &str, what: &str) -> Result<Ipv4Addr> {
    token
        .parse::<Ipv4Addr>()
        .map_err(|_| Error::malformed(token, format!("invalid {what}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn std_placeholder() {
        let d = ChannelDescriptor::parse("std 0 raw").unwrap();
        assert_eq!(d.transport, Transport::Std);
        assert_eq!(d.params, TransportParams::Std);
        assert_eq!(d.format, FormatTag::Encap(Encapsulation::Raw));
    }

    #[test]
    fn disk_full_params() {
        let d = ChannelDescriptor::parse("disk replay.dat:16:2:512 capture-file").unwrap();
        assert_eq!(d.transport, Transport::Disk);
        assert_eq!(d.address, "replay.dat");
        assert_eq!(
            d.params,
            TransportParams::Disk {
                offset: 16,
                repeat: Repeat::Times(2),
                frame_len: 512,
            }
        );
    }

    #[test]
    fn disk_defaults() {
        let d = ChannelDescriptor::parse("disk replay.dat:0 raw").unwrap();
        assert_eq!(
            d.params,
            TransportParams::Disk {
                offset: 0,
                repeat: Repeat::Times(0),
                frame_len: DEFAULT_FRAME_LEN,
            }
        );
    }

    #[test]
    fn disk_repeat_forever() {
        let d = ChannelDescriptor::parse("disk replay.dat:0:inf raw").unwrap();
        match d.params {
            TransportParams::Disk { repeat, .. } => assert_eq!(repeat, Repeat::Forever),
            _ => panic!("expected disk params"),
        }
    }

    #[test]
    fn udp_with_source_restriction() {
        let d = ChannelDescriptor::parse("udp 232.1.1.12:10.17.58.37:21112:S raw").unwrap();
        assert_eq!(
            d.params,
            TransportParams::Udp {
                group: "232.1.1.12".parse().unwrap(),
                iface: "10.17.58.37".parse().unwrap(),
                port: 21112,
                restrict_source: true,
            }
        );
    }

    #[test]
    fn output_render_tag() {
        let d = ChannelDescriptor::parse("std - geospatial-markup").unwrap();
        assert_eq!(
            d.format,
            FormatTag::Render(RenderFormat::GeospatialMarkup)
        );
    }

    #[test]
    fn display_round_trips() {
        for s in [
            "disk replay.dat:16:2:512 capture-file",
            "udp 232.1.1.12:10.17.58.37:21112:S raw",
            "disk replay.dat:0:inf:4096 wrapper-protocol",
        ] {
            let d = ChannelDescriptor::parse(s).unwrap();
            let again = ChannelDescriptor::parse(&d.to_string()).unwrap();
            assert_eq!(d, again, "{s}");
        }
    }

    #[test_case("tcp foo:0 raw"; "unknown transport")]
    #[test_case("disk foo:0 shiny-format"; "unknown format")]
    #[test_case("disk foo raw"; "disk missing offset")]
    #[test_case("disk foo:-1 raw"; "negative offset")]
    #[test_case("disk foo:0:-2 raw"; "negative repeat")]
    #[test_case("disk foo:0:1:0 raw"; "zero frame length")]
    #[test_case("disk foo:0:1:2:3 raw"; "too many disk params")]
    #[test_case("udp 232.1.1.1:10.0.0.1 raw"; "udp missing port")]
    #[test_case("udp 232.1.1.1:10.0.0.1:0 raw"; "udp zero port")]
    #[test_case("udp 232.1.1.1:10.0.0.1:99999 raw"; "udp port out of range")]
    #[test_case("udp not-an-ip:10.0.0.1:4000 raw"; "bad group address")]
    #[test_case("udp 232.1.1.1:10.0.0.1:4000:X raw"; "bad trailing flag")]
    #[test_case("std -:0 raw"; "std with params")]
    #[test_case("std - raw extra"; "too many tokens")]
    #[test_case("std -"; "too few tokens")]
    #[test_case(""; "empty")]
    fn rejects(s: &str) {
        assert!(ChannelDescriptor::parse(s).is_err(), "{s:?} should not parse");
    }

    #[test]
    fn parse_is_deterministic() {
        let a = ChannelDescriptor::parse("udp 232.1.1.12:10.17.58.37:21112 fixed-format").unwrap();
        let b = ChannelDescriptor::parse("udp 232.1.1.12:10.17.58.37:21112 fixed-format").unwrap();
        assert_eq!(a, b);
    }
}
