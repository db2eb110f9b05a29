//! Outer wire envelope.
//!
//! Every frame exchanged with the gateway is an [`Envelope`]: a message class, a
//! message kind and an opaque payload whose layout is selected by the kind alone.
//! Class and kind travel as raw integers so that frames carrying values unknown
//! to this build still parse at the envelope level.

use bincode::Options;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;

use crate::error::{CodecError, Result};

/// Direction of a message, agreed with the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageClass {
    Request = 1,
    Response = 2,
}

impl TryFrom<u32> for MessageClass {
    type Error = u32;

    fn try_from(value: u32) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(MessageClass::Request),
            2 => Ok(MessageClass::Response),
            other => Err(other),
        }
    }
}

/// One value per distinct operation or report.
///
/// Requests are odd, their acknowledgements use the next even value. The values
/// are fixed with the gateway and never negotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageKind {
    RegisterReq = 1,
    RegisterAck = 2,
    LoginReq = 3,
    LoginAck = 4,
    LogoutReq = 5,
    UserInfoQryReq = 7,
    UserInfoQryAck = 8,
    AccDepositReq = 9,
    AccDepositAck = 10,
    TradingAccQryReq = 11,
    TradingAccQryAck = 12,
    QueryOrdersReq = 13,
    QueryOrdersAck = 14,
    QueryTradesReq = 15,
    QueryTradesAck = 16,
    QueryPositionsReq = 17,
    QueryPositionsAck = 18,
    QueryHistoryOrdersReq = 19,
    QueryHistoryOrdersAck = 20,
    QueryHistoryTradesReq = 21,
    QueryHistoryTradesAck = 22,
    PlaceOrder = 23,
    OrderReport = 24,
    CancelOrder = 25,
    TradeReport = 26,
    CancelOrderReject = 28,
}

impl MessageKind {
    pub const ALL: [MessageKind; 26] = [
        MessageKind::RegisterReq,
        MessageKind::RegisterAck,
        MessageKind::LoginReq,
        MessageKind::LoginAck,
        MessageKind::LogoutReq,
        MessageKind::UserInfoQryReq,
        MessageKind::UserInfoQryAck,
        MessageKind::AccDepositReq,
        MessageKind::AccDepositAck,
        MessageKind::TradingAccQryReq,
        MessageKind::TradingAccQryAck,
        MessageKind::QueryOrdersReq,
        MessageKind::QueryOrdersAck,
        MessageKind::QueryTradesReq,
        MessageKind::QueryTradesAck,
        MessageKind::QueryPositionsReq,
        MessageKind::QueryPositionsAck,
        MessageKind::QueryHistoryOrdersReq,
        MessageKind::QueryHistoryOrdersAck,
        MessageKind::QueryHistoryTradesReq,
        MessageKind::QueryHistoryTradesAck,
        MessageKind::PlaceOrder,
        MessageKind::OrderReport,
        MessageKind::CancelOrder,
        MessageKind::TradeReport,
        MessageKind::CancelOrderReject,
    ];

    /// The wire value of this kind.
    pub fn code(self) -> u32 {
        self as u32
    }

    /// The class a well-formed message of this kind travels with.
    pub fn class(self) -> MessageClass {
        if self.code() % 2 == 1 {
            MessageClass::Request
        } else {
            MessageClass::Response
        }
    }
}

impl TryFrom<u32> for MessageKind {
    type Error = CodecError;

    fn try_from(value: u32) -> Result<Self> {
        MessageKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.code() == value)
            .ok_or(CodecError::UnknownKind(value))
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}

/// A value that travels as the payload of exactly one message kind.
pub trait Payload: Serialize + DeserializeOwned {
    const KIND: MessageKind;
}

// Fixed-width integers, no version header, nothing allowed after the value.
fn wire() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

/// The framed unit exchanged with the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    class: u32,
    kind: u32,
    payload: Vec<u8>,
}

impl Envelope {
    /// Builds an envelope from an already serialized payload.
    pub fn new(class: MessageClass, kind: MessageKind, payload: Vec<u8>) -> Self {
        Self::raw(class as u32, kind.code(), payload)
    }

    /// Builds an envelope from raw wire values, known or not.
    pub fn raw(class: u32, kind: u32, payload: Vec<u8>) -> Self {
        Self {
            class,
            kind,
            payload,
        }
    }

    /// Serializes `value` as the payload of a `class` envelope of kind `kind`.
    pub fn pack<T: Serialize>(class: MessageClass, kind: MessageKind, value: &T) -> Result<Self> {
        let payload = wire()
            .serialize(value)
            .map_err(|source| CodecError::Payload { kind, source })?;
        Ok(Self::new(class, kind, payload))
    }

    /// Wraps an outgoing request.
    pub fn request<P: Payload>(value: &P) -> Result<Self> {
        Self::pack(MessageClass::Request, P::KIND, value)
    }

    /// Wraps a gateway response.
    pub fn response<P: Payload>(value: &P) -> Result<Self> {
        Self::pack(MessageClass::Response, P::KIND, value)
    }

    pub fn message_class(&self) -> Option<MessageClass> {
        MessageClass::try_from(self.class).ok()
    }

    pub fn message_kind(&self) -> Option<MessageKind> {
        MessageKind::try_from(self.kind).ok()
    }

    pub fn raw_class(&self) -> u32 {
        self.class
    }

    pub fn raw_kind(&self) -> u32 {
        self.kind
    }

    pub fn is_response(&self) -> bool {
        self.message_class() == Some(MessageClass::Response)
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Serializes the whole envelope into one frame.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        wire().serialize(self).map_err(CodecError::Envelope)
    }

    /// Parses the outer envelope only. The payload stays opaque.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        wire().deserialize(bytes).map_err(CodecError::Envelope)
    }

    /// Unpacks the payload as `T`, the concrete type chosen for this kind.
    ///
    /// # Errors
    ///
    /// * `UnknownKind` if the envelope kind is not part of this build.
    /// * `MalformedPayload` if the bytes are not a complete `T`.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T> {
        let kind = MessageKind::try_from(self.kind)?;
        wire()
            .deserialize(&self.payload)
            .map_err(|source| CodecError::MalformedPayload { kind, source })
    }
}

/// Builds a request envelope for `kind` around `value` and serializes it.
pub fn encode<T: Serialize>(kind: MessageKind, value: &T) -> Result<Vec<u8>> {
    Envelope::pack(MessageClass::Request, kind, value)?.to_bytes()
}

/// Parses one frame into its outer envelope.
pub fn decode(bytes: &[u8]) -> Result<Envelope> {
    Envelope::from_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_codes_are_unique_and_reversible() {
        for kind in MessageKind::ALL {
            assert_eq!(MessageKind::try_from(kind.code()).unwrap(), kind);
        }
        assert!(matches!(
            MessageKind::try_from(999),
            Err(CodecError::UnknownKind(999))
        ));
    }

    #[test]
    fn test_kind_class_follows_parity() {
        assert_eq!(MessageKind::LoginReq.class(), MessageClass::Request);
        assert_eq!(MessageKind::LoginAck.class(), MessageClass::Response);
        assert_eq!(MessageKind::CancelOrderReject.class(), MessageClass::Response);
    }

    #[test]
    fn test_unknown_kind_still_parses_as_envelope() {
        let frame = Envelope::raw(2, 4242, vec![1, 2, 3]).to_bytes().unwrap();
        let envelope = decode(&frame).unwrap();

        assert!(envelope.is_response());
        assert_eq!(envelope.message_kind(), None);
        assert_eq!(envelope.raw_kind(), 4242);
        assert!(matches!(
            envelope.decode_payload::<u64>(),
            Err(CodecError::UnknownKind(4242))
        ));
    }

    #[test]
    fn test_truncated_payload_is_malformed() {
        let envelope = Envelope::new(MessageClass::Response, MessageKind::LoginAck, vec![7]);
        let err = envelope.decode_payload::<u64>().unwrap_err();
        assert!(matches!(
            err,
            CodecError::MalformedPayload {
                kind: MessageKind::LoginAck,
                ..
            }
        ));
        let source = std::error::Error::source(&err).expect("bincode cause is kept");
        assert!(err.to_string().ends_with(&source.to_string()));
    }

    #[test]
    fn test_trailing_bytes_are_malformed() {
        let mut payload = wire().serialize(&7u32).unwrap();
        payload.push(0);
        let envelope = Envelope::new(MessageClass::Response, MessageKind::LoginAck, payload);
        assert!(envelope.decode_payload::<u32>().is_err());
    }

    #[test]
    fn test_garbage_frame_is_rejected() {
        assert!(matches!(decode(&[1, 2]), Err(CodecError::Envelope(_))));
    }
}
