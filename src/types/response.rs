//! implements a parser for server response lines.
//!
//! A response is one line of space-separated tokens, led by a status word.
//! Data-bearing statuses (`RESERVED`, `FOUND`, `OK`) declare a byte count;
//! the body is read from the transport separately by the caller.

use crate::error::{CommandError, Error, Result};
use crate::util::bytes_to_human_str;

/// The decoded leading line of a server response.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ResponseHead {
    /// `INSERTED <id>`
    Inserted { id: u64 },
    /// `BURIED` (bury/release success) or `BURIED <id>` (put under memory
    /// pressure).
    Buried { id: Option<u64> },
    /// `EXPECTED_CRLF`
    ExpectedCrlf,
    /// `JOB_TOO_BIG`
    JobTooBig,
    /// `DRAINING`
    Draining,
    /// `USING <tube>`
    Using { tube: String },
    /// `DEADLINE_SOON`
    DeadlineSoon,
    /// `TIMED_OUT`
    TimedOut,
    /// `RESERVED <id> <n_bytes>`, body follows
    Reserved { id: u64, n_bytes: u32 },
    /// `NOT_FOUND`
    NotFound,
    /// `NOT_TOUCHED`
    NotTouched,
    /// `DELETED`
    Deleted,
    /// `RELEASED`
    Released,
    /// `TOUCHED`
    Touched,
    /// `WATCHING <count>`
    Watching { count: u32 },
    /// `NOT_IGNORED`
    NotIgnored,
    /// `FOUND <id> <n_bytes>`, body follows
    Found { id: u64, n_bytes: u32 },
    /// `KICKED <count>`
    Kicked { count: u64 },
    /// `OK <n_bytes>`, stats blob follows
    Ok { n_bytes: u32 },
    /// `PAUSED`
    Paused,
    /// `OUT_OF_MEMORY`
    OutOfMemory,
    /// `INTERNAL_ERROR`
    InternalError,
    /// `BAD_FORMAT`
    BadFormat,
    /// `UNKNOWN_COMMAND`
    UnknownCommand,
}

/// Provides a custom, minimal, zero-copy parser of byte slices.
struct ParseState<'a> {
    from: &'a [u8],
}

impl ParseState<'_> {
    /// Asserts there's no more input to take, returning `result` if so and
    /// None otherwise.
    fn expect_done_and(&self, result: ResponseHead) -> Option<ResponseHead> {
        if self.from.is_empty() {
            Some(result)
        } else {
            None
        }
    }

    /// Consumes from the input, expecting a token of non-zero length.
    fn expect_next_token(&mut self) -> Option<&[u8]> {
        let token = self.next_token()?;

        if token.is_empty() {
            None
        } else {
            Some(token)
        }
    }

    /// Consumes from the input, expecting a space then a u32.
    fn expect_next_u32(&mut self) -> Option<u32> {
        self.expect_space()?;

        let token = self.expect_next_token()?;

        let mut r = 0u32;
        for v in token {
            match v {
                b'0'..=b'9' => {
                    r = r.checked_mul(10)?.checked_add((*v - b'0') as u32)?
                },
                _ => return None,
            };
        }

        Some(r)
    }

    /// Consumes from the input, expecting a space then a u64.
    fn expect_next_u64(&mut self) -> Option<u64> {
        self.expect_space()?;

        let token = self.expect_next_token()?;

        let mut r = 0u64;
        for v in token {
            match v {
                b'0'..=b'9' => {
                    r = r.checked_mul(10)?.checked_add((*v - b'0') as u64)?
                },
                _ => return None,
            };
        }

        Some(r)
    }

    /// As `expect_next_u64`, but the token is optional: returns None at the
    /// end of the input without consuming anything.
    fn maybe_next_u64(&mut self) -> Option<Option<u64>> {
        if self.from.is_empty() {
            return Some(None);
        }

        self.expect_next_u64().map(Some)
    }

    /// Consumes from the input, expecting a space then a UTF-8 name token.
    fn expect_next_name(&mut self) -> Option<String> {
        self.expect_space()?;

        let token = self.expect_next_token()?;

        String::from_utf8(token.to_vec()).ok()
    }

    /// Consumes a space.
    fn expect_space(&mut self) -> Option<()> {
        match self.from.first() {
            Some(b' ') => {
                self.from = &self.from[1..];
                Some(())
            },
            _ => None,
        }
    }

    /// Consumes from this ParseState until reaching a space byte or the end
    /// of the input. It returns None at the end of the input. On consecutive
    /// space bytes, it returns a zero-length slice.
    fn next_token(&mut self) -> Option<&[u8]> {
        if self.from.is_empty() {
            return None;
        }

        let idx = self
            .from
            .iter()
            .position(|c| *c == b' ')
            .unwrap_or(self.from.len());

        let token = &self.from[..idx];
        self.from = &self.from[idx..];

        Some(token)
    }
}

impl<'a> From<&'a [u8]> for ParseState<'a> {
    fn from(from: &'a [u8]) -> Self {
        ParseState { from }
    }
}

fn parse(value: &[u8]) -> Option<ResponseHead> {
    use ResponseHead::*;

    let mut ps: ParseState = value.into();

    let head = match ps.expect_next_token()? {
        // <status>
        b"EXPECTED_CRLF" => ExpectedCrlf,
        b"JOB_TOO_BIG" => JobTooBig,
        b"DRAINING" => Draining,
        b"DEADLINE_SOON" => DeadlineSoon,
        b"TIMED_OUT" => TimedOut,
        b"NOT_FOUND" => NotFound,
        b"NOT_TOUCHED" => NotTouched,
        b"DELETED" => Deleted,
        b"RELEASED" => Released,
        b"TOUCHED" => Touched,
        b"NOT_IGNORED" => NotIgnored,
        b"PAUSED" => Paused,
        b"OUT_OF_MEMORY" => OutOfMemory,
        b"INTERNAL_ERROR" => InternalError,
        b"BAD_FORMAT" => BadFormat,
        b"UNKNOWN_COMMAND" => UnknownCommand,

        // <status> <n>
        b"INSERTED" => Inserted {
            id: ps.expect_next_u64()?,
        },
        b"WATCHING" => Watching {
            count: ps.expect_next_u32()?,
        },
        b"KICKED" => Kicked {
            count: ps.expect_next_u64()?,
        },
        b"OK" => Ok {
            n_bytes: ps.expect_next_u32()?,
        },

        // <status> [<id>]
        b"BURIED" => Buried {
            id: ps.maybe_next_u64()?,
        },

        // <status> <tube>
        b"USING" => Using {
            tube: ps.expect_next_name()?,
        },

        // <status> <id> <n_bytes>
        b"RESERVED" => Reserved {
            id: ps.expect_next_u64()?,
            n_bytes: ps.expect_next_u32()?,
        },
        b"FOUND" => Found {
            id: ps.expect_next_u64()?,
            n_bytes: ps.expect_next_u32()?,
        },

        _ => return None,
    };

    ps.expect_done_and(head)
}

// Parsing is implemented to fulfil the TryFrom trait. An unrecognised or
// garbled line decodes to a typed failure carrying the raw response.
impl TryFrom<&[u8]> for ResponseHead {
    type Error = Error;

    fn try_from(value: &[u8]) -> Result<Self> {
        parse(value).ok_or_else(|| {
            Error::Command(CommandError::Unexpected {
                line: bytes_to_human_str(value),
            })
        })
    }
}
