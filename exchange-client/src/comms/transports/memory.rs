use crate::comms::transport::{Inbound, TransportInput, TransportOutput, TransportPair};
use crate::error::{ClientError, TransportError};
use exchange_protocol::Envelope;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

enum Signal {
    Frame(Vec<u8>),
    Interrupt,
    Broken,
}

/// In-process transport for tests: the client side of a channel pair.
///
/// Implements `TransportInput` using std MPSC channels.
pub struct MemoryTransportInput {
    inbound: Receiver<Signal>,
}

impl TransportInput for MemoryTransportInput {
    fn recv_frame(&mut self) -> Result<Inbound, TransportError> {
        match self.inbound.recv() {
            Ok(Signal::Frame(bytes)) => Ok(Inbound::Frame(bytes)),
            Ok(Signal::Interrupt) => Ok(Inbound::Interrupted),
            Ok(Signal::Broken) | Err(_) => Err(TransportError::Disconnected),
        }
    }
}

/// Implements `TransportOutput` using std MPSC channels.
pub struct MemoryTransportOutput {
    outbound: Sender<Vec<u8>>,
    wake: Sender<Signal>,
}

impl TransportOutput for MemoryTransportOutput {
    fn send_bytes(&self, data: &[u8]) -> Result<(), TransportError> {
        if data.is_empty() {
            return Err(TransportError::EmptyFrame);
        }
        self.outbound
            .send(data.to_vec())
            .map_err(|_| TransportError::Disconnected)
    }

    fn interrupt(&self) -> Result<(), TransportError> {
        self.wake
            .send(Signal::Interrupt)
            .map_err(|_| TransportError::Disconnected)
    }
}

/// The far end of a memory transport, standing in for the gateway.
pub struct MemoryGateway {
    inbound: Sender<Signal>,
    outbound: Receiver<Vec<u8>>,
}

impl MemoryGateway {
    /// Delivers a raw frame to the client.
    pub fn push_bytes(&self, bytes: Vec<u8>) -> Result<(), TransportError> {
        self.inbound
            .send(Signal::Frame(bytes))
            .map_err(|_| TransportError::Disconnected)
    }

    /// Serializes and delivers an envelope to the client.
    pub fn push(&self, envelope: &Envelope) -> Result<(), ClientError> {
        self.push_bytes(envelope.to_bytes()?)?;
        Ok(())
    }

    /// Makes the client's next receive fail as a broken transport would.
    pub fn break_transport(&self) {
        let _ = self.inbound.send(Signal::Broken);
    }

    /// Next frame the client sent, decoded as an envelope.
    pub fn next_request(&self, timeout: Duration) -> Option<Envelope> {
        match self.outbound.recv_timeout(timeout) {
            Ok(bytes) => Envelope::from_bytes(&bytes).ok(),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }
}

/// Creates a connected client transport and its gateway end.
pub fn memory_pair() -> (TransportPair, MemoryGateway) {
    let (inbound_tx, inbound_rx) = mpsc::channel();
    let (outbound_tx, outbound_rx) = mpsc::channel();

    let pair = TransportPair {
        input: Box::new(MemoryTransportInput {
            inbound: inbound_rx,
        }),
        output: Box::new(MemoryTransportOutput {
            outbound: outbound_tx,
            wake: inbound_tx.clone(),
        }),
    };
    let gateway = MemoryGateway {
        inbound: inbound_tx,
        outbound: outbound_rx,
    };
    (pair, gateway)
}
