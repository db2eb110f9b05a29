#[cfg(any(test, feature = "test-utils"))]
pub mod memory;
pub(crate) mod zmq;

#[cfg(any(test, feature = "test-utils"))]
pub use memory::{memory_pair, MemoryGateway};
