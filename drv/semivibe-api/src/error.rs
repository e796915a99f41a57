// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Driver-facing error taxonomy.

use core::fmt;

use semivibe_protocol::ErrorCode;

/// What went wrong with a driver operation.
///
/// Multi-step operations return the first failure observed and abort
/// their remaining steps; nothing is retried silently. A device error
/// (`Device`) does not close the session — the caller may simply try
/// again.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// Caller-supplied argument was out of range or malformed.
    InvalidParameter,
    /// The operation needs a connected session.
    NotConnected,
    /// Socket create/resolve/connect failed, or the device greeted with
    /// something other than `ACK`.
    ConnectionFailed,
    /// Transport failure mid-exchange (peer reset, short read, ...).
    Communication,
    /// A send or receive exceeded the configured deadline. The session
    /// is left open but its state is ambiguous; disconnect and
    /// reconnect to resynchronize.
    Timeout,
    /// The response failed to parse or was syntactically impossible.
    Protocol,
    /// The device answered with an error frame; the code is preserved.
    Device(ErrorCode),
    /// A write echoed different bytes than were requested.
    Verification,
    /// Invariant violation inside the driver.
    Internal,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidParameter => f.write_str("invalid parameter"),
            Error::NotConnected => f.write_str("not connected"),
            Error::ConnectionFailed => f.write_str("connection failed"),
            Error::Communication => f.write_str("communication failure"),
            Error::Timeout => f.write_str("operation timed out"),
            Error::Protocol => f.write_str("protocol violation"),
            Error::Device(code) => write!(f, "device error: {code}"),
            Error::Verification => f.write_str("write verification failed"),
            Error::Internal => f.write_str("internal driver error"),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = core::result::Result<T, Error>;

/// The most recent failure recorded on a driver instance.
#[derive(Clone, Debug)]
pub struct LastError {
    pub error: Error,
    pub message: String,
}
