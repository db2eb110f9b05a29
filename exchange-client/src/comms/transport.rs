use crate::error::TransportError;

/// What the receive side woke up with.
#[derive(Debug, PartialEq, Eq)]
pub enum Inbound {
    /// One complete frame from the gateway.
    Frame(Vec<u8>),
    /// The output side asked the receive loop to re-check its state.
    Interrupted,
    /// An outbound frame of this many bytes was discarded because the
    /// gateway side queue was full.
    Dropped(usize),
}

/// Abstraction for the incoming transport layer (reading raw frames).
///
/// Owned by the receive loop thread. Implementation details (ZMQ, Memory)
/// are hidden behind this trait.
pub trait TransportInput: Send {
    /// Blocks, with no timeout, until a frame arrives or the output side
    /// interrupts.
    fn recv_frame(&mut self) -> Result<Inbound, TransportError>;
}

/// Abstraction for the outgoing transport layer, shared by caller threads.
pub trait TransportOutput: Send + Sync {
    /// Queue one full frame for the gateway.
    fn send_bytes(&self, data: &[u8]) -> Result<(), TransportError>;

    /// Wake a blocked [`TransportInput::recv_frame`] with [`Inbound::Interrupted`].
    fn interrupt(&self) -> Result<(), TransportError>;
}

/// Both halves of one connection.
pub struct TransportPair {
    pub input: Box<dyn TransportInput>,
    pub output: Box<dyn TransportOutput>,
}
