// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Wire protocol for the Semi-Vibe device.
//!
//! Every request and every non-error response is exactly six ASCII hex
//! characters:
//!
//! ```text
//!     B OO R DD
//!     │ │  │ │
//!     │ │  │ └── data   : 2 hex digits
//!     │ │  └──── rw     : 1 hex digit, 0 = read, 1 = write
//!     │ └─────── offset : 2 hex digits
//!     └────────── base  : 1 hex digit
//! ```
//!
//! An error response replaces the last five characters with the literal
//! `FFFFF`, leaving the first as the error code (`1FFFFF`, `2FFFFF`,
//! `3FFFFF`). Parsing accepts either case; rendering always produces
//! uppercase, and is the left inverse of parsing for well-formed frames.
//!
//! Two out-of-band literals round out the session vocabulary: the device
//! greets an accepted client with the three raw bytes [`HANDSHAKE`] (not a
//! padded frame), and a client may request a clean shutdown with the
//! case-sensitive [`EXIT_SENTINEL`]. Neither is a frame and the codec never
//! parses them; the session layers match them before any frame handling.

use core::fmt;

use num_derive::FromPrimitive;
use num_traits::FromPrimitive as _;

pub mod map;

pub use map::{Actuator, Door, Sensor};

/// Greeting the device sends immediately after accepting a connection.
/// Three raw bytes; a client must consume it before its first exchange and
/// must not assume six-character alignment until it has.
pub const HANDSHAKE: &[u8] = b"ACK";

/// Session terminator a client may send in place of a frame.
pub const EXIT_SENTINEL: &str = "exit";

/// Wire length of every request and response.
pub const FRAME_LEN: usize = 6;

/// Value of the `rw` digit for a read command.
pub const RW_READ: u8 = 0x0;
/// Value of the `rw` digit for a write command.
pub const RW_WRITE: u8 = 0x1;

/// One decoded frame.
///
/// `base` and `rw` are single hex digits (0..=15); the codec does not
/// judge whether they are meaningful, only that they are hex. In
/// particular an `EFFFFF` error response parses like any other frame —
/// callers that care ask [`Frame::error_code`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub base: u8,
    pub offset: u8,
    pub rw: u8,
    pub data: u8,
}

/// Device-reported error codes, carried in the first digit of an `EFFFFF`
/// response.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum ErrorCode {
    /// Reserved base, write to a read-only cell, or malformed frame.
    Forbidden = 1,
    /// Unknown offset or out-of-range `rw` digit.
    Invalid = 2,
    /// Reserved. The device never emits this.
    General = 3,
}

impl ErrorCode {
    /// Encodes the error response for this code.
    pub fn render(self) -> String {
        format!("{:X}FFFFF", self as u8)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Forbidden => f.write_str("forbidden"),
            ErrorCode::Invalid => f.write_str("invalid"),
            ErrorCode::General => f.write_str("general"),
        }
    }
}

/// Reasons an input can fail to decode as a frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FrameError {
    /// Input is not exactly six bytes long.
    Length(usize),
    /// Input carries a non-hex byte at the given position.
    NotHex(usize),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::Length(n) => {
                write!(f, "expected {} characters, got {}", FRAME_LEN, n)
            }
            FrameError::NotHex(i) => {
                write!(f, "non-hex character at position {}", i)
            }
        }
    }
}

impl std::error::Error for FrameError {}

impl Frame {
    /// Builds a read command for the given cell.
    pub fn read(base: u8, offset: u8) -> Self {
        Frame {
            base,
            offset,
            rw: RW_READ,
            data: 0,
        }
    }

    /// Builds a write command for the given cell.
    pub fn write(base: u8, offset: u8, data: u8) -> Self {
        Frame {
            base,
            offset,
            rw: RW_WRITE,
            data,
        }
    }

    /// Decodes a six-character command or response.
    ///
    /// The input must be exactly six bytes and every byte a hex digit
    /// (either case); anything else is rejected. No shape checks beyond
    /// that — an error response decodes like any other frame.
    pub fn parse(input: &str) -> Result<Self, FrameError> {
        let bytes = input.as_bytes();
        if bytes.len() != FRAME_LEN {
            return Err(FrameError::Length(bytes.len()));
        }
        let mut digits = [0u8; FRAME_LEN];
        for (i, &b) in bytes.iter().enumerate() {
            digits[i] = hex_digit(b).ok_or(FrameError::NotHex(i))?;
        }
        Ok(Frame {
            base: digits[0],
            offset: digits[1] << 4 | digits[2],
            rw: digits[3],
            data: digits[4] << 4 | digits[5],
        })
    }

    /// Encodes as exactly six uppercase hex characters.
    pub fn render(&self) -> String {
        format!(
            "{:X}{:02X}{:X}{:02X}",
            self.base & 0xF,
            self.offset,
            self.rw & 0xF,
            self.data
        )
    }

    /// Detects the `EFFFFF` error-response shape, returning the code if
    /// this frame has it.
    pub fn error_code(&self) -> Option<ErrorCode> {
        if self.offset == 0xFF && self.rw == 0xF && self.data == 0xFF {
            ErrorCode::from_u8(self.base)
        } else {
            None
        }
    }
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'A'..=b'F' => Some(b - b'A' + 10),
        b'a'..=b'f' => Some(b - b'a' + 10),
        _ => None,
    }
}

/// Builds a byte whose bit `p` is set iff the corresponding flag is true.
///
/// ```
/// use semivibe_protocol::bitmask;
/// assert_eq!(bitmask(&[(true, 0), (false, 2), (true, 4)]), 0x11);
/// ```
pub fn bitmask(bits: &[(bool, u8)]) -> u8 {
    bits.iter().fold(
        0,
        |acc, &(value, pos)| {
            if value {
                acc | 1 << pos
            } else {
                acc
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parse_basic() {
        let f = Frame::parse("2100A1").unwrap();
        assert_eq!(
            f,
            Frame {
                base: 0x2,
                offset: 0x10,
                rw: 0x0,
                data: 0xA1
            }
        );
    }

    #[test]
    fn parse_accepts_lowercase() {
        assert_eq!(Frame::parse("4fb111"), Frame::parse("4FB111"));
    }

    #[test]
    fn parse_rejects_length() {
        assert_eq!(Frame::parse(""), Err(FrameError::Length(0)));
        assert_eq!(Frame::parse("12345"), Err(FrameError::Length(5)));
        assert_eq!(Frame::parse("1234567"), Err(FrameError::Length(7)));
    }

    #[test]
    fn parse_rejects_non_hex() {
        assert_eq!(Frame::parse("31018G"), Err(FrameError::NotHex(5)));
        assert_eq!(Frame::parse("z10180"), Err(FrameError::NotHex(0)));
        // The sentinel is not a frame.
        assert_eq!(Frame::parse(EXIT_SENTINEL), Err(FrameError::Length(4)));
    }

    #[test]
    fn render_is_six_uppercase_chars() {
        assert_eq!(Frame::write(0x3, 0x10, 0xab).render(), "3101AB");
        assert_eq!(Frame::read(0x2, 0x21).render(), "221000");
    }

    #[test]
    fn error_shape() {
        let f = Frame::parse("2FFFFF").unwrap();
        assert_eq!(f.error_code(), Some(ErrorCode::Invalid));
        assert_eq!(Frame::parse("1FFFFF").unwrap().error_code(), Some(ErrorCode::Forbidden));
        // Code 0 and codes above 3 are not error responses.
        assert_eq!(Frame::parse("0FFFFF").unwrap().error_code(), None);
        assert_eq!(Frame::parse("4FFFFF").unwrap().error_code(), None);
        // Near misses are data frames.
        assert_eq!(Frame::parse("1FFFFE").unwrap().error_code(), None);
        assert_eq!(Frame::parse("1FF0FF").unwrap().error_code(), None);
    }

    #[test]
    fn error_render() {
        assert_eq!(ErrorCode::Forbidden.render(), "1FFFFF");
        assert_eq!(ErrorCode::Invalid.render(), "2FFFFF");
        assert_eq!(ErrorCode::General.render(), "3FFFFF");
    }

    #[test]
    fn bitmask_builder() {
        assert_eq!(bitmask(&[]), 0);
        assert_eq!(bitmask(&[(true, 0), (true, 4)]), 0x11);
        assert_eq!(
            bitmask(&[(true, 0), (true, 2), (true, 4), (true, 6)]),
            0x55
        );
        assert_eq!(bitmask(&[(false, 0), (true, 6)]), 0x40);
    }

    proptest! {
        #[test]
        fn parse_render_roundtrip(
            base in 0u8..16,
            offset in 0u8..=255,
            rw in 0u8..16,
            data in 0u8..=255,
        ) {
            let f = Frame { base, offset, rw, data };
            prop_assert_eq!(Frame::parse(&f.render()).unwrap(), f);
        }

        #[test]
        fn render_parse_roundtrip(s in "[0-9a-fA-F]{6}") {
            let f = Frame::parse(&s).unwrap();
            prop_assert_eq!(f.render(), s.to_uppercase());
        }

        #[test]
        fn junk_is_rejected(s in "[^0-9a-fA-F]{6}") {
            prop_assert!(Frame::parse(&s).is_err());
        }
    }
}
