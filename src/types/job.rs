//! Job identities at the connection and pool layers.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// A job as seen by a single connection: the server-issued id plus the
/// decoded body.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Job<V> {
    pub id: u64,
    pub body: V,
}

/// A pool-scoped job identity: the member key that issued the job plus the
/// member's native id, rendered as `"<key>.<native>"`.
///
/// Splitting takes the first `.` as the delimiter; the remainder, dots and
/// all, is preserved verbatim as the native id.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct PooledId {
    pub key: String,
    pub native: String,
}

impl PooledId {
    pub fn new(key: impl Into<String>, native: impl Into<String>) -> Self {
        PooledId {
            key: key.into(),
            native: native.into(),
        }
    }

    /// The native id as a protocol job id. Fails before any I/O when the
    /// native part is not a number.
    pub fn native_id(&self) -> Result<u64> {
        self.native.parse().map_err(|_| {
            Error::invalid(format!(
                "job id {:?} has a non-numeric native part",
                self.to_string()
            ))
        })
    }
}

impl fmt::Display for PooledId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.key, self.native)
    }
}

impl FromStr for PooledId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (key, native) = s.split_once('.').ok_or_else(|| {
            Error::invalid(format!("job id {s:?} is missing a pool member key"))
        })?;

        Ok(PooledId::new(key, native))
    }
}

/// A job as seen through the pool: identified by member key and native id.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PooledJob<V> {
    pub id: PooledId,
    pub body: V,
}
