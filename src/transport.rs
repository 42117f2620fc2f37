// Tidal Bridge
// Copyright (C) 2021  Wesley Merkel
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! OSC over UDP.
//!
//! A [`Connection`] is a UDP socket bound to a local address and paired with a single remote
//! peer. It sends OSC [`Message`]s to that peer and yields every OSC packet it receives, from
//! any sender, through [`Connection::incoming`]. Bundles are flattened into their messages before
//! they are handed out, so callers only ever see messages.
//!
//! Errors from the socket are returned to the caller as they happen. Nothing is retried, but a
//! reader that keeps failing to receive waits a little longer before each new attempt.

mod message;

pub use message::Message;

use rosc::{decoder::decode, encoder::encode, OscError, OscMessage, OscPacket};
use std::{
    io,
    net::{SocketAddr, ToSocketAddrs, UdpSocket},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};
use thiserror::Error;

const MTU: usize = 65536;

// How often a blocked reader wakes up to check whether its connection was closed.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

// Consecutive receive failures beyond this don't lengthen the wait any further.
const MAX_BACKOFF_STEPS: u32 = 5;

/// A specialized [`Result`] type for transport operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type returned by [`Connection`] operations.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct Error(ErrorInner);

#[derive(Debug, Error)]
enum ErrorInner {
    #[error("binding to UDP socket {addr}: {source}")]
    UdpBind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("configuring UDP socket: {0}")]
    UdpConfigure(#[source] io::Error),
    #[error("resolving remote address {addr}: {source}")]
    Resolve {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("remote address {0} did not resolve to any socket address")]
    NoAddress(String),
    #[error("sending message to {remote}: {source}")]
    Send {
        remote: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("receiving message: {0}")]
    Recv(#[source] io::Error),
    #[error("decoding OSC packet from {from}: {error:?}")]
    OscDecode { from: SocketAddr, error: OscError },
    #[error("encoding OSC packet: {0:?}")]
    OscEncode(OscError),
}

/// The local and remote halves of a [`Connection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    local: (String, u16),
    remote: (String, u16),
    broadcast: bool,
}

impl Endpoint {
    /// Creates an endpoint that binds to `local` and sends to `remote`. Both are given as a host
    /// and a port.
    pub fn new(local: (String, u16), remote: (String, u16)) -> Endpoint {
        Endpoint {
            local,
            remote,
            broadcast: false,
        }
    }

    /// Allows sending to broadcast addresses. Defaults to `false`.
    pub fn broadcast(mut self, enabled: bool) -> Endpoint {
        self.broadcast = enabled;
        self
    }

    pub fn local(&self) -> &(String, u16) {
        &self.local
    }

    pub fn remote(&self) -> &(String, u16) {
        &self.remote
    }
}

/// An open UDP connection.
///
/// `Connection` is cheap to clone. All clones share the same socket; closing one closes them all.
#[derive(Debug, Clone)]
pub struct Connection(Arc<ConnectionInner>);

#[derive(Debug)]
struct ConnectionInner {
    socket: UdpSocket,
    remote: SocketAddr,
    closed: AtomicBool,
}

impl Connection {
    /// Binds a UDP socket to the endpoint's local address.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be bound or configured, or if the remote address
    /// cannot be resolved.
    pub fn open(endpoint: &Endpoint) -> Result<Connection> {
        let (local_host, local_port) = &endpoint.local;
        let socket = UdpSocket::bind((local_host.as_str(), *local_port)).map_err(|source| {
            Error(ErrorInner::UdpBind {
                addr: format!("{}:{}", local_host, local_port),
                source,
            })
        })?;
        if endpoint.broadcast {
            socket
                .set_broadcast(true)
                .map_err(|err| Error(ErrorInner::UdpConfigure(err)))?;
        }
        socket
            .set_read_timeout(Some(POLL_INTERVAL))
            .map_err(|err| Error(ErrorInner::UdpConfigure(err)))?;

        let remote = resolve(&endpoint.remote)?;
        log::debug!(
            "opened connection on {}:{} to {}",
            local_host,
            local_port,
            remote
        );

        Ok(Connection(Arc::new(ConnectionInner {
            socket,
            remote,
            closed: AtomicBool::new(false),
        })))
    }

    /// Returns the address that the socket is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.0
            .socket
            .local_addr()
            .map_err(|err| Error(ErrorInner::UdpConfigure(err)))
    }

    /// Sends a message to the remote peer.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be encoded or the datagram cannot be sent.
    pub fn send(&self, message: Message) -> Result<()> {
        log::debug!("send: {:?}", message);
        let bytes =
            encode(&message.into_packet()).map_err(|err| Error(ErrorInner::OscEncode(err)))?;
        self.0
            .socket
            .send_to(&bytes, self.0.remote)
            .map_err(|source| {
                Error(ErrorInner::Send {
                    remote: self.0.remote,
                    source,
                })
            })?;
        Ok(())
    }

    /// Returns an iterator over the datagrams received by this connection.
    ///
    /// The iterator blocks until a datagram arrives and only ends after [`Connection::close`] is
    /// called.
    pub fn incoming(&self) -> Incoming {
        Incoming {
            connection: self.clone(),
            buffer: vec![0; MTU],
            failures: 0,
        }
    }

    /// Closes the connection. Readers blocked in [`Incoming`] return shortly after.
    pub fn close(&self) {
        self.0.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.0.closed.load(Ordering::SeqCst)
    }
}

fn resolve((host, port): &(String, u16)) -> Result<SocketAddr> {
    let addr = format!("{}:{}", host, port);
    (host.as_str(), *port)
        .to_socket_addrs()
        .map_err(|source| {
            Error(ErrorInner::Resolve {
                addr: addr.clone(),
                source,
            })
        })?
        .next()
        .ok_or(Error(ErrorInner::NoAddress(addr)))
}

/// The messages contained in a single received datagram.
#[derive(Debug, Clone, PartialEq)]
pub struct Received {
    /// The messages of the datagram, in their original order. A datagram holding a single message
    /// yields a single element; a bundle yields all of its messages, including those of nested
    /// bundles.
    pub messages: Vec<OscMessage>,

    /// When the datagram was read from the socket.
    pub received_at: Instant,

    /// Who sent the datagram.
    pub from: SocketAddr,
}

/// An iterator over the datagrams received by a [`Connection`].
///
/// Returned by [`Connection::incoming`].
#[derive(Debug)]
pub struct Incoming {
    connection: Connection,
    buffer: Vec<u8>,
    failures: u32,
}

impl Incoming {
    // Sleeps in slices of POLL_INTERVAL so that closing the connection still ends the wait early.
    // Returns false if the connection was closed.
    fn wait(&self, delay: Duration) -> bool {
        let mut waited = Duration::from_secs(0);
        while waited < delay {
            if self.connection.is_closed() {
                return false;
            }
            thread::sleep(POLL_INTERVAL);
            waited += POLL_INTERVAL;
        }
        true
    }
}

fn backoff(failures: u32) -> Duration {
    match failures {
        0 => Duration::from_secs(0),
        n => POLL_INTERVAL * 2u32.pow(n.min(MAX_BACKOFF_STEPS) - 1),
    }
}

impl Iterator for Incoming {
    type Item = Result<Received>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.wait(backoff(self.failures)) {
            return None;
        }
        loop {
            if self.connection.is_closed() {
                return None;
            }
            match self.connection.0.socket.recv_from(&mut self.buffer) {
                Ok((len, from)) => {
                    let received_at = Instant::now();
                    self.failures = 0;
                    return Some(
                        decode(&self.buffer[..len])
                            .map_err(|error| Error(ErrorInner::OscDecode { from, error }))
                            .map(|packet| {
                                log::debug!("recv: {:?}", packet);
                                let mut messages = Vec::new();
                                flatten(packet, &mut messages);
                                Received {
                                    messages,
                                    received_at,
                                    from,
                                }
                            }),
                    );
                }
                Err(err)
                    if err.kind() == io::ErrorKind::WouldBlock
                        || err.kind() == io::ErrorKind::TimedOut =>
                {
                    continue
                }
                Err(err) => {
                    self.failures = self.failures.saturating_add(1);
                    return Some(Err(Error(ErrorInner::Recv(err))));
                }
            }
        }
    }
}

fn flatten(packet: OscPacket, messages: &mut Vec<OscMessage>) {
    match packet {
        OscPacket::Message(message) => messages.push(message),
        OscPacket::Bundle(bundle) => {
            for packet in bundle.content {
                flatten(packet, messages);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rosc::{OscBundle, OscType};

    #[test]
    fn test_flatten_nested_bundles_in_order() {
        let packet = OscPacket::Bundle(OscBundle {
            timetag: (0, 1).into(),
            content: vec![
                message_packet("/a"),
                OscPacket::Bundle(OscBundle {
                    timetag: (0, 1).into(),
                    content: vec![message_packet("/b"), message_packet("/c")],
                }),
                message_packet("/d"),
            ],
        });

        let mut messages = Vec::new();
        flatten(packet, &mut messages);

        let addrs: Vec<&str> = messages.iter().map(|m| m.addr.as_str()).collect();
        assert_eq!(addrs, vec!["/a", "/b", "/c", "/d"]);
    }

    #[test]
    fn test_send_and_receive_over_loopback() {
        let receiver = Connection::open(&endpoint(0, 9)).unwrap();
        let receiver_port = receiver.local_addr().unwrap().port();
        let sender = Connection::open(&endpoint(0, receiver_port)).unwrap();

        sender
            .send(Message::addr("/hello").arg(1).arg("two"))
            .unwrap();

        let received = receiver.incoming().next().unwrap().unwrap();
        assert_eq!(
            received.messages,
            vec![OscMessage {
                addr: "/hello".to_owned(),
                args: vec![OscType::Int(1), OscType::String("two".to_owned())],
            }]
        );
        assert_eq!(received.from.port(), sender.local_addr().unwrap().port());
    }

    #[test]
    fn test_garbage_datagram_is_an_error() {
        let receiver = Connection::open(&endpoint(0, 9)).unwrap();
        let receiver_port = receiver.local_addr().unwrap().port();
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .send_to(b"not osc", ("127.0.0.1", receiver_port))
            .unwrap();

        assert!(receiver.incoming().next().unwrap().is_err());
    }

    #[test]
    fn test_incoming_ends_after_close() {
        let connection = Connection::open(&endpoint(0, 9)).unwrap();
        let mut incoming = connection.incoming();
        connection.close();
        assert!(incoming.next().is_none());
    }

    #[test]
    fn test_backoff_grows_with_failures_and_is_capped() {
        let delays: Vec<u64> = (0..8).map(|n| backoff(n).as_millis() as u64).collect();
        assert_eq!(delays, vec![0, 50, 100, 200, 400, 800, 800, 800]);
    }

    #[test]
    fn test_failing_reader_waits_before_receiving_again() {
        let receiver = Connection::open(&endpoint(0, 9)).unwrap();
        let receiver_port = receiver.local_addr().unwrap().port();
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut incoming = receiver.incoming();
        incoming.failures = 3;

        let started = Instant::now();
        socket
            .send_to(&encode(&message_packet("/a")).unwrap(), ("127.0.0.1", receiver_port))
            .unwrap();
        let received = incoming.next().unwrap().unwrap();
        assert!(started.elapsed() >= backoff(3));
        assert_eq!(received.messages[0].addr, "/a");
        assert_eq!(incoming.failures, 0);
    }

    #[test]
    fn test_close_interrupts_backoff() {
        let connection = Connection::open(&endpoint(0, 9)).unwrap();
        let mut incoming = connection.incoming();
        incoming.failures = MAX_BACKOFF_STEPS;
        connection.close();

        let started = Instant::now();
        assert!(incoming.next().is_none());
        assert!(started.elapsed() < backoff(MAX_BACKOFF_STEPS));
    }

    fn endpoint(local_port: u16, remote_port: u16) -> Endpoint {
        Endpoint::new(
            ("127.0.0.1".to_owned(), local_port),
            ("127.0.0.1".to_owned(), remote_port),
        )
    }

    fn message_packet(addr: &str) -> OscPacket {
        OscPacket::Message(OscMessage {
            addr: addr.to_owned(),
            args: Vec::new(),
        })
    }
}
