//! Error taxonomy for the client.
//!
//! Only [`Error::Io`] counts as a connectivity failure: it is the one class
//! that trips a pool member's retry delay and forces tube-state replay on
//! the next attempt. Everything else is surfaced to the caller untouched.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed input rejected before any I/O was attempted.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The server reported the addressed job or tube does not exist
    /// (`NOT_FOUND`, `NOT_TOUCHED`). Semantic absence, not a failure of the
    /// connection.
    #[error("not found")]
    NotFound,

    /// A protocol-level failure status, or a response the client could not
    /// recognise.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// Transport-level failure: connect, read, or write.
    #[error("connection failure: {0}")]
    Io(#[from] io::Error),

    /// The job-body codec rejected a payload.
    #[error("body codec: {0}")]
    Codec(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// True for the transport-level failures that mark a pool member
    /// unavailable.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Error::Io(_))
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }
}

/// Erroneous or unrecognised response statuses.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    /// The server did not find a CRLF terminator after a job body.
    #[error("server expected CRLF after job body")]
    ExpectedCrlf,

    /// The job body exceeded the server's configured maximum.
    #[error("job body exceeds the server's maximum job size")]
    JobTooBig,

    /// The server is in drain mode and refusing new jobs.
    #[error("server is draining and not accepting jobs")]
    Draining,

    /// Ignoring the tube would have emptied the server-side watch list.
    #[error("cannot ignore the only watched tube")]
    NotIgnored,

    /// The server buried the job under memory pressure.
    #[error("job {id} was buried by the server under memory pressure")]
    Buried { id: u64 },

    /// The server ran out of memory handling the command.
    #[error("server out of memory")]
    OutOfMemory,

    /// The server reported an internal error.
    #[error("internal server error")]
    InternalError,

    /// The server rejected the command line as malformed.
    #[error("server rejected the command as badly formatted")]
    BadFormat,

    /// The server did not recognise the command.
    #[error("server did not recognise the command")]
    UnknownCommand,

    /// A response the client could not interpret, kept verbatim for
    /// diagnostics.
    #[error("unexpected response: {line}")]
    Unexpected { line: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
