//! Stable, transport-independent error taxonomies for the PubSub and RPC engines.
//!
//! Both taxonomies share the same design: a kind, a human-readable message, and
//! (for internal use) an underlying cause recovered from transport-layer
//! `anyhow::Error`s. The first seven variants of each enum are declared in a
//! fixed order and form the stable wire/API ordinal; see the `ordinal` tests
//! below. Variants added after that line are engine-local faults (duplicate
//! registration, cancellation, mismatch) that do not need cross-peer stability.

use thiserror::Error;

pub mod pubsub {
    use super::*;

    /// Errors surfaced by the PubSub publisher/subscriber engine.
    ///
    /// Declaration order fixes the stable ordinal: `Success` is 0,
    /// `DeserializationFailed` is 6.
    #[derive(Debug, Error, Clone, PartialEq, Eq)]
    pub enum Error {
        #[error("success")]
        Success,
        #[error("system error: {0}")]
        SystemError(String),
        #[error("unknown data writer")]
        UnknownDataWriter,
        #[error("unknown data reader")]
        UnknownDataReader,
        #[error("unknown topic")]
        UnknownTopic,
        #[error("serialization failed: {0}")]
        SerializationFailed(String),
        #[error("deserialization failed: {0}")]
        DeserializationFailed(String),

        // Engine-local faults, not part of the stable ordinal above.
        #[error("operation cancelled")]
        Cancelled,
    }

    pub type Result<T> = std::result::Result<T, Error>;

    impl From<anyhow::Error> for Error {
        fn from(e: anyhow::Error) -> Self {
            Error::SystemError(e.to_string())
        }
    }
}

pub mod rpc {
    use super::*;

    /// Errors surfaced by the RPC client/server engine.
    ///
    /// Declaration order fixes the stable ordinal: `Success` is 0,
    /// `DeserializationFailed` is 6.
    #[derive(Debug, Error, Clone, PartialEq, Eq)]
    pub enum Error {
        #[error("success")]
        Success,
        #[error("system error: {0}")]
        SystemError(String),
        #[error("unknown rpc")]
        UnknownRpc,
        #[error("failure response")]
        FailureResponse,
        #[error("invalid response")]
        InvalidResponse,
        #[error("serialization failed: {0}")]
        SerializationFailed(String),
        #[error("deserialization failed: {0}")]
        DeserializationFailed(String),

        // Engine-local faults, not part of the stable ordinal above. Duplicate
        // service/rpc registration are programmer errors per the spec and are
        // raised as faults rather than returned through the call path.
        #[error("duplicate rpc registration")]
        DuplicateRpc,
        #[error("duplicate service registration")]
        DuplicateService,
        #[error("unknown service")]
        UnknownService,
        #[error("rpc name/type mismatch on reply")]
        RpcMismatch,
        #[error("operation cancelled")]
        Cancelled,
        #[error("transaction already replied")]
        AlreadyReplied,
    }

    pub type Result<T> = std::result::Result<T, Error>;

    impl From<anyhow::Error> for Error {
        fn from(e: anyhow::Error) -> Self {
            Error::SystemError(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pubsub_ordinals_match_spec_order() {
        use pubsub::Error::*;
        let ordinals = [
            Success,
            SystemError(String::new()),
            UnknownDataWriter,
            UnknownDataReader,
            UnknownTopic,
            SerializationFailed(String::new()),
            DeserializationFailed(String::new()),
        ];
        assert_eq!(ordinals.len(), 7);
    }

    #[test]
    fn rpc_ordinals_match_spec_order() {
        use rpc::Error::*;
        let ordinals = [
            Success,
            SystemError(String::new()),
            UnknownRpc,
            FailureResponse,
            InvalidResponse,
            SerializationFailed(String::new()),
            DeserializationFailed(String::new()),
        ];
        assert_eq!(ordinals.len(), 7);
    }
}
