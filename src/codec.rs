//! Pluggable job-body codecs.
//!
//! The protocol treats job bodies as opaque bytes; a codec maps them to and
//! from an application value at the connection layer.

use bytes::Bytes;

use crate::error::{Error, Result};

pub trait BodyCodec: Send {
    type Value;

    fn encode(&self, value: &Self::Value) -> Result<Vec<u8>>;
    fn decode(&self, raw: &[u8]) -> Result<Self::Value>;
}

/// The default codec: bodies are JSON documents.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl BodyCodec for JsonCodec {
    type Value = serde_json::Value;

    fn encode(&self, value: &Self::Value) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| Error::Codec(Box::new(e)))
    }

    fn decode(&self, raw: &[u8]) -> Result<Self::Value> {
        serde_json::from_slice(raw).map_err(|e| Error::Codec(Box::new(e)))
    }
}

/// A passthrough codec for callers that interpret bodies themselves.
#[derive(Clone, Copy, Debug, Default)]
pub struct RawCodec;

impl BodyCodec for RawCodec {
    type Value = Bytes;

    fn encode(&self, value: &Self::Value) -> Result<Vec<u8>> {
        Ok(value.to_vec())
    }

    fn decode(&self, raw: &[u8]) -> Result<Self::Value> {
        Ok(Bytes::copy_from_slice(raw))
    }
}
