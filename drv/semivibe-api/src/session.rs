// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Blocking TCP session to a device.
//!
//! Owns the socket for exactly one request/response exchange at a time.
//! Connect consumes the raw 3-byte `ACK` greeting before the first frame
//! (the greeting is not six-character aligned). Teardown sends the
//! best-effort `exit` sentinel and shuts the socket down regardless of
//! whether the sentinel went out; dropping a session tears it down.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use semivibe_protocol::{EXIT_SENTINEL, HANDSHAKE};

use crate::error::Error;

/// A classified session failure: the taxonomy entry plus the detail that
/// goes into the instance's last-error slot.
pub(crate) struct Fault {
    pub kind: Error,
    pub detail: String,
}

impl Fault {
    fn new(kind: Error, detail: impl Into<String>) -> Self {
        Fault {
            kind,
            detail: detail.into(),
        }
    }
}

pub(crate) struct Session {
    stream: TcpStream,
}

impl Session {
    /// Connects, applies the timeout to the socket, and consumes the
    /// greeting. Every failure in here — resolve, connect, socket
    /// configuration, or a wrong greeting — is a connection failure.
    pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<Session, Fault> {
        let addrs: Vec<_> = (host, port)
            .to_socket_addrs()
            .map_err(|e| {
                Fault::new(
                    Error::ConnectionFailed,
                    format!("failed to resolve {host}: {e}"),
                )
            })?
            .collect();
        // The device speaks IPv4; prefer an A record when the name has
        // both.
        let addr = addrs
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| {
                Fault::new(
                    Error::ConnectionFailed,
                    format!("{host} resolved to no addresses"),
                )
            })?;

        let stream = TcpStream::connect_timeout(&addr, timeout).map_err(|e| {
            Fault::new(
                Error::ConnectionFailed,
                format!("failed to connect to {addr}: {e}"),
            )
        })?;

        let session = Session { stream };
        session
            .set_timeout(timeout)
            .map_err(|f| Fault::new(Error::ConnectionFailed, f.detail))?;

        let mut greeting = [0u8; 16];
        let n = session.read_some(&mut greeting).map_err(|f| {
            Fault::new(
                Error::ConnectionFailed,
                format!("no greeting from device: {}", f.detail),
            )
        })?;
        if &greeting[..n] != HANDSHAKE {
            return Err(Fault::new(
                Error::ConnectionFailed,
                format!("unexpected greeting {:?}", &greeting[..n]),
            ));
        }

        Ok(session)
    }

    /// Applies a deadline to both directions of the socket.
    pub fn set_timeout(&self, timeout: Duration) -> Result<(), Fault> {
        self.stream
            .set_read_timeout(Some(timeout))
            .and_then(|()| self.stream.set_write_timeout(Some(timeout)))
            .map_err(|e| {
                Fault::new(
                    Error::Communication,
                    format!("failed to set socket timeout: {e}"),
                )
            })
    }

    /// Sends one request and receives one response. The protocol is
    /// strictly half-duplex, so whatever arrives next is this request's
    /// answer.
    pub fn exchange(&mut self, request: &str) -> Result<String, Fault> {
        self.stream
            .write_all(request.as_bytes())
            .map_err(|e| io_fault(&e, format!("failed to send {request:?}")))?;

        let mut buf = [0u8; 64];
        let n = self.read_some(&mut buf)?;
        String::from_utf8(buf[..n].to_vec()).map_err(|_| {
            Fault::new(
                Error::Protocol,
                format!("response is not UTF-8: {:?}", &buf[..n]),
            )
        })
    }

    fn read_some(&self, buf: &mut [u8]) -> Result<usize, Fault> {
        let n = (&self.stream)
            .read(buf)
            .map_err(|e| io_fault(&e, "failed to receive".to_string()))?;
        if n == 0 {
            return Err(Fault::new(
                Error::Communication,
                "connection closed by device",
            ));
        }
        Ok(n)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Best effort on both: the socket is going away either way.
        let _ = self.stream.write_all(EXIT_SENTINEL.as_bytes());
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

fn io_fault(e: &std::io::Error, context: String) -> Fault {
    let kind = match e.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut => Error::Timeout,
        _ => Error::Communication,
    };
    Fault::new(kind, format!("{context}: {e}"))
}
