//! Transport plumbing between the client and the gateway.
//!
//! - `address`: endpoint normalization.
//! - `transport`: the input/output seam the receive loop and the facade use.
//! - `transports`: ZMQ DEALER implementation, plus an in-memory one for tests.

pub mod address;
pub mod transport;
pub mod transports;

pub use address::Address;
pub use transport::{Inbound, TransportInput, TransportOutput, TransportPair};
