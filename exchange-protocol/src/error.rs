use thiserror::Error;

use crate::envelope::MessageKind;

/// Failures raised while packing or unpacking envelopes.
#[derive(Error, Debug)]
pub enum CodecError {
    /// The outer envelope could not be serialized or parsed.
    #[error("Envelope codec error: {0}")]
    Envelope(#[source] bincode::Error),

    /// A payload value could not be serialized.
    #[error("Failed to encode {kind:?} payload: {source}")]
    Payload {
        kind: MessageKind,
        #[source]
        source: bincode::Error,
    },

    /// The payload bytes do not match the wire format selected for `kind`.
    #[error("Malformed {kind:?} payload: {source}")]
    MalformedPayload {
        kind: MessageKind,
        #[source]
        source: bincode::Error,
    },

    /// The envelope carries a message kind this build does not know.
    #[error("Unknown message kind: {0}")]
    UnknownKind(u32),
}

pub type Result<T> = std::result::Result<T, CodecError>;
