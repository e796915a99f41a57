// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! TCP session handling.
//!
//! One client at a time: the loop accepts, greets with the raw `ACK`
//! bytes, then exchanges one frame per recv/send until the client
//! disconnects or sends the `exit` sentinel, and goes back to accepting.
//! Responses are produced in request order; the protocol has no
//! correlation ids.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use semivibe_protocol::{EXIT_SENTINEL, HANDSHAKE};

use crate::{lock, Device};

/// Idle sleep between accept polls.
const ACCEPT_POLL: Duration = Duration::from_millis(25);
/// Read timeout on client sockets, so a session notices `stop`.
const CLIENT_POLL: Duration = Duration::from_millis(250);

pub(crate) fn serve(device: Arc<Device>, listener: TcpListener) {
    info!("server thread started, waiting for connection");
    while device.is_running() {
        match listener.accept() {
            Ok((stream, peer)) => serve_session(&device, stream, peer),
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL);
            }
            Err(e) => {
                if device.is_running() {
                    warn!("accept failed: {e}");
                }
            }
        }
    }
    info!("server thread stopped");
}

fn serve_session(device: &Arc<Device>, mut stream: TcpStream, peer: SocketAddr) {
    info!("client connected: {peer}");

    // The listener is non-blocking; the session socket must not be. The
    // short read timeout only exists so the loop re-checks the running
    // flag.
    let configured = stream
        .set_nonblocking(false)
        .and_then(|()| stream.set_read_timeout(Some(CLIENT_POLL)));
    if let Err(e) = configured {
        warn!("failed to configure client socket: {e}");
        return;
    }
    if let Err(e) = stream.write_all(HANDSHAKE) {
        warn!("failed to greet client: {e}");
        return;
    }
    *lock(&device.active_client) = stream.try_clone().ok();

    let mut buf = [0u8; 256];
    while device.is_running() {
        let n = match stream.read(&mut buf) {
            Ok(0) => {
                info!("client disconnected");
                break;
            }
            Ok(n) => n,
            Err(e)
                if e.kind() == ErrorKind::WouldBlock
                    || e.kind() == ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(e) => {
                warn!("recv failed: {e}");
                break;
            }
        };

        // Non-UTF-8 input falls through to the codec, which rejects it
        // like any other malformed frame.
        let request = String::from_utf8_lossy(&buf[..n]);
        debug!("received: {request}");
        if request == EXIT_SENTINEL {
            info!("exit requested");
            break;
        }

        let response = device.process_command(&request);
        debug!("sent response: {response}");
        if let Err(e) = stream.write_all(response.as_bytes()) {
            warn!("send failed: {e}");
            break;
        }
    }

    lock(&device.active_client).take();
    let _ = stream.shutdown(Shutdown::Both);
}
