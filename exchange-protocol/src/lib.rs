//! # Exchange Protocol
//!
//! Wire types shared by the trader client and the exchange gateway.
//!
//! ## Modules
//! - `envelope`: The framed envelope (class + kind + opaque payload) and its codec.
//! - `messages`: One payload type per request, acknowledgement and report.
//! - `model`: Orders, trades and positions carried inside payloads.

pub mod envelope;
pub mod error;
pub mod messages;
pub mod model;

pub use envelope::{decode, encode, Envelope, MessageClass, MessageKind, Payload};
pub use error::CodecError;
pub use messages::*;
pub use model::{Order, OrderSide, OrderStatus, OrderType, Position, Trade};
