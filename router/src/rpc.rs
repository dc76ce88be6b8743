//! Minimal JSON-RPC call model.
//!
//! Only the fields needed for routing are typed. `params` stays raw JSON text and `id` is a
//! closed tagged union so a call can be re-emitted without renormalizing either.

use std::fmt;

use bytes::Bytes;
use serde::{
    de::{self, Deserializer, IgnoredAny, MapAccess, Visitor},
    Deserialize, Serialize, Serializer,
};
use serde_json::{value::RawValue, Number};

/// JSON-RPC "internal error" code used for synthesized failure records.
pub const INTERNAL_ERROR_CODE: i64 = -32603;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
/// Request identifier as it appeared on the wire.
pub enum RpcId {
    /// Explicit `"id": null`.
    Null,
    /// Any JSON number, kept at full `u64`/`i64` range.
    Number(Number),
    String(String),
}

impl fmt::Display for RpcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
        }
    }
}

impl Serialize for RpcId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Number(n) => n.serialize(serializer),
            Self::String(s) => serializer.serialize_str(s),
        }
    }
}

impl<'de> Deserialize<'de> for RpcId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct V;

        impl<'de> Visitor<'de> for V {
            type Value = RpcId;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a number, a string, or null")
            }

            fn visit_unit<E>(self) -> Result<Self::Value, E> {
                Ok(RpcId::Null)
            }

            fn visit_none<E>(self) -> Result<Self::Value, E> {
                Ok(RpcId::Null)
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
                Ok(RpcId::Number(v.into()))
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
                Ok(RpcId::Number(v.into()))
            }

            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Number::from_f64(v)
                    .map(RpcId::Number)
                    .ok_or_else(|| E::custom("id is not a finite number"))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E> {
                Ok(RpcId::String(v.to_string()))
            }

            fn visit_string<E>(self, v: String) -> Result<Self::Value, E> {
                Ok(RpcId::String(v))
            }
        }

        deserializer.deserialize_any(V)
    }
}

#[derive(Debug, Clone, Serialize)]
/// Typed view of one call record. Unknown fields are not retained.
///
/// A present `"id": null` or `"params": null` stays `Some`, so re-encoding never drops a
/// field the caller sent. Repeated keys are accepted and the last occurrence wins.
pub struct RpcRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jsonrpc: Option<String>,

    pub method: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Box<RawValue>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RpcId>,
}

impl<'de> Deserialize<'de> for RpcRequest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(field_identifier, rename_all = "lowercase")]
        enum Field {
            Jsonrpc,
            Method,
            Params,
            Id,
            #[serde(other)]
            Other,
        }

        struct V;

        impl<'de> Visitor<'de> for V {
            type Value = RpcRequest;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a JSON-RPC call object")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut req = RpcRequest {
                    jsonrpc: None,
                    method: String::new(),
                    params: None,
                    id: None,
                };
                while let Some(field) = map.next_key::<Field>()? {
                    match field {
                        Field::Jsonrpc => req.jsonrpc = map.next_value()?,
                        Field::Method => req.method = map.next_value()?,
                        Field::Params => req.params = Some(map.next_value()?),
                        Field::Id => req.id = Some(map.next_value()?),
                        Field::Other => {
                            map.next_value::<IgnoredAny>()?;
                        }
                    }
                }
                Ok(req)
            }
        }

        deserializer.deserialize_map(V)
    }
}

#[derive(Debug, Clone)]
/// One inbound call: the typed view plus the exact bytes it was parsed from.
pub struct Call {
    pub request: RpcRequest,
    pub raw: Bytes,
}

impl Call {
    pub fn parse(raw: Bytes) -> serde_json::Result<Self> {
        let request = serde_json::from_slice(&raw)?;
        Ok(Self { request, raw })
    }

    pub fn method(&self) -> &str {
        &self.request.method
    }

    pub fn id(&self) -> Option<&RpcId> {
        self.request.id.as_ref()
    }

    /// Re-serialize from the typed view (`jsonrpc`, `method`, `params`, `id`).
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&self.request)
    }
}

/// Build a JSON-RPC error record for `id`.
pub fn error_record(id: &RpcId, code: i64, message: &str) -> serde_json::Result<Box<RawValue>> {
    #[derive(Serialize)]
    struct ErrorBody<'a> {
        code: i64,
        message: &'a str,
    }

    #[derive(Serialize)]
    struct ErrorRecord<'a> {
        jsonrpc: &'static str,
        id: &'a RpcId,
        error: ErrorBody<'a>,
    }

    serde_json::value::to_raw_value(&ErrorRecord {
        jsonrpc: "2.0",
        id,
        error: ErrorBody { code, message },
    })
}
