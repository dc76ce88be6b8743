//! Single-vs-batch classification of an inbound request body.

use bytes::Bytes;
use serde::de::IgnoredAny;
use serde_json::value::RawValue;

use crate::rpc::Call;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Why a body could not be routed.
pub enum MalformedInput {
    /// Not syntactically valid JSON.
    InvalidJson,
    /// Valid JSON, but not a call record.
    InvalidCall,
    /// A JSON array with at least one element that is not a call record.
    InvalidBatch,
}

impl MalformedInput {
    pub fn message(self) -> &'static str {
        match self {
            Self::InvalidJson => "invalid JSON",
            Self::InvalidCall => "invalid JSON-RPC request",
            Self::InvalidBatch => "invalid JSON-RPC batch request",
        }
    }
}

#[derive(Debug)]
pub enum Classified {
    Single(Call),
    Batch(Vec<Call>),
    Malformed(MalformedInput),
}

/// Classify `body` as one call, a batch of calls, or malformed input.
///
/// A body whose first non-whitespace byte is `[` is a batch. Batch parsing is all-or-nothing:
/// one bad element rejects the whole request.
pub fn classify(body: &Bytes) -> Classified {
    if serde_json::from_slice::<IgnoredAny>(body).is_err() {
        return Classified::Malformed(MalformedInput::InvalidJson);
    }

    if body.trim_ascii_start().first() == Some(&b'[') {
        return match parse_batch(body) {
            Some(calls) => Classified::Batch(calls),
            None => Classified::Malformed(MalformedInput::InvalidBatch),
        };
    }

    match Call::parse(body.clone()) {
        Ok(call) => Classified::Single(call),
        Err(_) => Classified::Malformed(MalformedInput::InvalidCall),
    }
}

fn parse_batch(body: &[u8]) -> Option<Vec<Call>> {
    let elements: Vec<&RawValue> = serde_json::from_slice(body).ok()?;
    elements
        .into_iter()
        .map(|raw| Call::parse(Bytes::copy_from_slice(raw.get().as_bytes())).ok())
        .collect()
}
