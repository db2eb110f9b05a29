//! # Exchange Client Library
//!
//! Client side of the exchange gateway wire protocol: one DEALER connection,
//! a background receive loop dispatching responses to a callback set, and
//! optional synchronous waits on individual responses.
//!
//! ## Modules
//! - `client`: The [`TraderClient`] facade and its builder.
//! - `connection`: Owns the transport and the receive thread.
//! - `receiver`: The receive loop and its state machine.
//! - `dispatch`: Inbound events and the kind-to-event routing table.
//! - `registry`: Event-name keyed slots for synchronous calls.
//! - `spi`: The callback interface.
//! - `policy`: Preconditions checked before a request is sent.
//! - `comms`: Addresses and the ZMQ transport.
//! - `config` / `logging`: Connect-time configuration and the injectable logger.

pub mod client;
pub mod comms;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod policy;
pub mod receiver;
pub mod registry;
pub mod session;
pub mod spi;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use client::{Call, ClientBuilder, Query, TraderClient};
pub use comms::Address;
pub use config::ClientConfig;
pub use dispatch::{DispatchTable, Event, FromEvent};
pub use error::{ClientError, Result, TransportError};
pub use logging::{LogConfig, Logger};
pub use policy::{AllowAll, LoginRequired, ReadOnly, RequestPolicy};
pub use receiver::LoopState;
pub use registry::{CorrelationRegistry, Delivery};
pub use session::Session;
pub use spi::{NoopSpi, TraderSpi};
