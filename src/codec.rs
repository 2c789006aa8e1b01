//! Per-user-type encode/decode capability.
//!
//! The core never interprets payload bytes directly; every type used as a
//! topic payload or an RPC request/response goes through a `Codec` facet.
//! A blanket implementation covers any `Serialize + DeserializeOwned` type
//! using `bincode`, the wire format already used elsewhere in this codebase.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encode/decode/name capability for a single wire type `T`.
pub trait Codec<T> {
    /// Stable name for `T` on the wire; must agree between peers.
    fn name(&self) -> &str;

    /// True only for types internal to the engine (e.g. the subscription
    /// announcement payload); never true for user-registered types.
    fn is_builtin(&self) -> bool {
        false
    }

    fn encode(&self, value: &T) -> Result<Vec<u8>, String>;

    fn decode(&self, bytes: &[u8]) -> Result<T, String>;
}

/// The default facet: bincode over any serde-derived type.
pub struct BincodeCodec {
    name: String,
    builtin: bool,
}

impl BincodeCodec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            builtin: false,
        }
    }

    pub fn builtin(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            builtin: true,
        }
    }
}

impl<T> Codec<T> for BincodeCodec
where
    T: Serialize + DeserializeOwned,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn is_builtin(&self) -> bool {
        self.builtin
    }

    fn encode(&self, value: &T) -> Result<Vec<u8>, String> {
        bincode::serialize(value).map_err(|e| e.to_string())
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, String> {
        bincode::deserialize(bytes).map_err(|e| e.to_string())
    }
}

/// Convenience constructor: a bincode codec named after `T`'s Rust type name.
///
/// Type names are stable within one build but are not a cross-language wire
/// contract; callers that need a stable cross-peer name should construct
/// `BincodeCodec::new("...")` explicitly instead.
pub fn default_codec<T>() -> BincodeCodec {
    BincodeCodec::new(std::any::type_name::<T>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Hello {
        msg: String,
        seq: u32,
    }

    #[test]
    fn round_trips() {
        let codec = default_codec::<Hello>();
        let value = Hello {
            msg: "hello".into(),
            seq: 1,
        };
        let bytes = codec.encode(&value).unwrap();
        let decoded: Hello = codec.decode(&bytes).unwrap();
        assert_eq!(value, decoded);
    }

    #[test]
    fn decode_failure_surfaces_as_err() {
        let codec = default_codec::<Hello>();
        assert!(codec.decode(&[0xff, 0xff]).is_err());
    }
}
