//! Input channel implementations.

use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::time::Duration;

use chrono::Utc;
use tracing::debug;

use super::{ChannelState, RawFrame};
use crate::descriptor::{ChannelDescriptor, Encapsulation, Repeat, DEFAULT_FRAME_LEN};
use crate::{Error, Result};

/// Socket read timeout. Keeps the read loop interruptible so a shutdown
/// request is never deferred past one timeout interval.
pub const READ_TIMEOUT: Duration = Duration::from_millis(500);

const MAX_DATAGRAM: usize = 65536;

/// Outcome of one read attempt.
#[derive(Debug)]
pub enum Poll {
    Frame(RawFrame),
    /// Nothing arrived within the transport's bounded wait; try again.
    Idle,
    /// The sequence is finished. Deliberate, not an error.
    End,
}

enum Kind {
    Std {
        reader: std::io::Stdin,
        frame_len: usize,
    },
    Disk {
        file: File,
        offset: u64,
        frame_len: usize,
        /// Passes left over the file; `None` repeats forever.
        passes_left: Option<u32>,
    },
    Udp {
        socket: UdpSocket,
        restrict_source: bool,
        locked_source: Option<IpAddr>,
    },
}

/// An input channel: exclusive owner of one transport resource, producing a
/// lazy sequence of raw frames.
pub struct InputChannel {
    descriptor: ChannelDescriptor,
    encap: Encapsulation,
    state: ChannelState,
    cursor: u64,
    kind: Kind,
}

impl InputChannel {
    pub(crate) fn from_stdin(descriptor: ChannelDescriptor, encap: Encapsulation) -> Self {
        InputChannel {
            descriptor,
            encap,
            state: ChannelState::Open,
            cursor: 0,
            kind: Kind::Std {
                reader: std::io::stdin(),
                frame_len: DEFAULT_FRAME_LEN,
            },
        }
    }

    pub(crate) fn open_file(
        descriptor: ChannelDescriptor,
        encap: Encapsulation,
        offset: u64,
        repeat: Repeat,
        frame_len: usize,
    ) -> Result<Self> {
        let mut file = File::open(&descriptor.address)
            .map_err(|err| Error::ResourceUnavailable(format!("{}: {err}", descriptor.address)))?;
        file.seek(SeekFrom::Start(offset))
            .map_err(|err| Error::ResourceUnavailable(format!("{}: {err}", descriptor.address)))?;
        Ok(InputChannel {
            descriptor,
            encap,
            state: ChannelState::Open,
            cursor: 0,
            kind: Kind::Disk {
                file,
                offset,
                frame_len,
                passes_left: repeat.passes(),
            },
        })
    }

    pub(crate) fn open_udp(
        descriptor: ChannelDescriptor,
        encap: Encapsulation,
        group: Ipv4Addr,
        iface: Ipv4Addr,
        port: u16,
        restrict_source: bool,
    ) -> Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))
            .map_err(|err| Error::ResourceUnavailable(format!("bind port {port}: {err}")))?;
        if group.is_multicast() {
            socket
                .join_multicast_v4(&group, &iface)
                .map_err(|err| Error::ResourceUnavailable(format!("join {group}: {err}")))?;
        }
        socket.set_read_timeout(Some(READ_TIMEOUT))?;
        Ok(InputChannel {
            descriptor,
            encap,
            state: ChannelState::Open,
            cursor: 0,
            kind: Kind::Udp {
                socket,
                restrict_source,
                locked_source: None,
            },
        })
    }

    pub fn descriptor(&self) -> &ChannelDescriptor {
        &self.descriptor
    }

    pub fn encap(&self) -> Encapsulation {
        self.encap
    }

    /// Bytes consumed from the transport so far. Strictly increases with
    /// every frame surfaced.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Close the channel. The underlying resource is released when the
    /// channel is dropped; a closed channel only ever reports [Poll::End].
    pub fn close(&mut self) {
        self.state = ChannelState::Closed;
    }

    /// Pull the next frame.
    ///
    /// # Errors
    /// Transport-level read failures are returned to the caller undecided;
    /// the engine chooses between failover and termination.
    pub fn next_frame(&mut self) -> Result<Poll> {
        if self.state == ChannelState::Closed {
            return Ok(Poll::End);
        }

        match &mut self.kind {
            Kind::Std { reader, frame_len } => {
                let mut buf = vec![0u8; *frame_len];
                let n = reader.read(&mut buf)?;
                if n == 0 {
                    self.state = ChannelState::Closed;
                    return Ok(Poll::End);
                }
                buf.truncate(n);
                self.cursor += n as u64;
                Ok(Poll::Frame(RawFrame {
                    data: buf,
                    timestamp: None,
                    encap: self.encap,
                }))
            }

            Kind::Disk {
                file,
                offset,
                frame_len,
                passes_left,
            } => {
                let mut buf = vec![0u8; *frame_len];
                let mut n = file.read(&mut buf)?;
                if n == 0 {
                    let rewind = match passes_left {
                        None => true,
                        Some(p) if *p > 1 => {
                            *p -= 1;
                            true
                        }
                        Some(_) => false,
                    };
                    if !rewind {
                        self.state = ChannelState::Closed;
                        return Ok(Poll::End);
                    }
                    file.seek(SeekFrom::Start(*offset))?;
                    n = file.read(&mut buf)?;
                    if n == 0 {
                        // Nothing past the start offset; a rewind loop here
                        // would never advance the cursor.
                        self.state = ChannelState::Closed;
                        return Ok(Poll::End);
                    }
                }
                buf.truncate(n);
                self.cursor += n as u64;
                Ok(Poll::Frame(RawFrame {
                    data: buf,
                    timestamp: None,
                    encap: self.encap,
                }))
            }

            Kind::Udp {
                socket,
                restrict_source,
                locked_source,
            } => loop {
                let mut buf = vec![0u8; MAX_DATAGRAM];
                match socket.recv_from(&mut buf) {
                    Ok((n, src)) => {
                        if *restrict_source {
                            match locked_source {
                                None => *locked_source = Some(src.ip()),
                                Some(ip) if *ip == src.ip() => {}
                                Some(ip) => {
                                    debug!(%src, expected = %ip, "discarding datagram from unexpected sender");
                                    continue;
                                }
                            }
                        }
                        if n == 0 {
                            continue;
                        }
                        buf.truncate(n);
                        self.cursor += n as u64;
                        return Ok(Poll::Frame(RawFrame {
                            data: buf,
                            timestamp: Some(Utc::now()),
                            encap: self.encap,
                        }));
                    }
                    Err(err)
                        if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
                    {
                        return Ok(Poll::Idle)
                    }
                    Err(err) => return Err(Error::Io(err)),
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::build_input;
    use crate::descriptor::ChannelDescriptor;
    use std::io::Write;

    fn disk_channel(path: &std::path::Path, params: &str) -> InputChannel {
        let desc =
            ChannelDescriptor::parse(&format!("disk {}:{params} raw", path.display())).unwrap();
        build_input(&desc).unwrap()
    }

    fn expect_frame(ch: &mut InputChannel) -> RawFrame {
        match ch.next_frame().unwrap() {
            Poll::Frame(f) => f,
            other => panic!("expected frame, got {other:?}"),
        }
    }

    fn expect_end(ch: &mut InputChannel) {
        assert!(matches!(ch.next_frame().unwrap(), Poll::End));
    }

    #[test]
    fn disk_reads_chunks_from_offset() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(&[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]).unwrap();

        let mut ch = disk_channel(f.path(), "2:0:4");
        assert_eq!(expect_frame(&mut ch).data, vec![2, 3, 4, 5]);
        assert_eq!(expect_frame(&mut ch).data, vec![6, 7, 8, 9]);
        expect_end(&mut ch);
        assert_eq!(ch.cursor(), 8);
    }

    #[test]
    fn disk_repeat_replays_from_offset() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"abcd").unwrap();

        let mut ch = disk_channel(f.path(), "0:2:4");
        assert_eq!(expect_frame(&mut ch).data, b"abcd");
        assert_eq!(expect_frame(&mut ch).data, b"abcd");
        expect_end(&mut ch);
        assert_eq!(ch.cursor(), 8);
    }

    #[test]
    fn disk_repeat_forever_keeps_rewinding() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"xy").unwrap();

        let mut ch = disk_channel(f.path(), "0:inf:2");
        for _ in 0..5 {
            assert_eq!(expect_frame(&mut ch).data, b"xy");
        }
    }

    #[test]
    fn disk_offset_past_eof_ends_immediately() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"ab").unwrap();

        let mut ch = disk_channel(f.path(), "10:inf:4");
        expect_end(&mut ch);
        assert_eq!(ch.cursor(), 0);
    }

    #[test]
    fn closed_channel_reports_end() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"abcd").unwrap();

        let mut ch = disk_channel(f.path(), "0:0:4");
        ch.close();
        expect_end(&mut ch);
    }

    #[test]
    fn udp_receives_and_locks_onto_first_sender() {
        let desc =
            ChannelDescriptor::parse("udp 127.0.0.1:127.0.0.1:47313:S raw").unwrap();
        let mut ch = build_input(&desc).unwrap();

        let a = UdpSocket::bind("127.0.0.1:0").unwrap();
        let b = UdpSocket::bind("127.0.0.2:0").unwrap();
        let dest = "127.0.0.1:47313";

        a.send_to(b"from-a", dest).unwrap();
        let frame = expect_frame(&mut ch);
        assert_eq!(frame.data, b"from-a");
        assert!(frame.timestamp.is_some());

        // A datagram from a second socket is discarded once the source lock
        // is in place; the next frame surfaced is the first sender's.
        b.send_to(b"from-b", dest).unwrap();
        a.send_to(b"from-a-again", dest).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        let frame = expect_frame(&mut ch);
        assert_eq!(frame.data, b"from-a-again");

        assert!(matches!(ch.next_frame().unwrap(), Poll::Idle));
    }
}
