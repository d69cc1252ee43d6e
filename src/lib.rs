//! A pooled client for beanstalkd-compatible work queues.
//!
//! The crate is layered: [`types`] encodes commands and decodes response
//! lines, [`Connection`] drives one transport and tracks its tube
//! selection, [`ManagedConnection`] adds failure tracking with
//! tube-state replay after a reconnect, and [`Pool`] coordinates many
//! keyed connections as one logical client, with pluggable
//! [selection strategies](strategy) and job ids namespaced by member key.

pub mod codec;
pub mod connection;
pub mod error;
pub mod managed;
pub mod pool;
pub mod stats;
pub mod strategy;
pub mod transport;
pub mod types;
pub mod util;

#[cfg(test)]
pub(crate) mod test_support;

pub use codec::{BodyCodec, JsonCodec, RawCodec};
pub use connection::{
    Connection, IgnoreOutcome, PutOptions, TubeState, DEFAULT_PRIORITY,
    DEFAULT_TTR,
};
pub use error::{CommandError, Error, Result};
pub use managed::{ManagedConnection, DEFAULT_RETRY_DELAY};
pub use pool::Pool;
pub use stats::{StatValue, Stats};
pub use strategy::{Random, RoundRobin, SelectionStrategy};
pub use transport::{TcpTransport, Transport};
pub use types::command::{TubeName, DEFAULT_TUBE};
pub use types::job::{Job, PooledId, PooledJob};
