use crate::comms::address::Address;
use crate::comms::transport::{Inbound, TransportInput, TransportOutput, TransportPair};
use crate::error::TransportError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use zmq::{Context as ZmqContext, Socket, SocketType};

static PIPE_SEQ: AtomicU64 = AtomicU64::new(0);

/// libzmq's default high-water mark.
const DEFAULT_HWM: i32 = 1000;

/// Opens a DEALER connection to `address`.
///
/// ZMQ sockets are not thread-safe, so the DEALER socket lives on the receive
/// thread only. Callers hand outbound frames to it through an `inproc` PAIR
/// pipe, which the receive thread polls alongside the DEALER. An empty pipe
/// frame is the interrupt signal.
pub(crate) fn connect_dealer(address: &Address) -> Result<TransportPair, zmq::Error> {
    connect_dealer_with_hwm(address, DEFAULT_HWM)
}

/// Like [`connect_dealer`], with the DEALER's queue limits set to `hwm` frames.
pub(crate) fn connect_dealer_with_hwm(
    address: &Address,
    hwm: i32,
) -> Result<TransportPair, zmq::Error> {
    let context = ZmqContext::new();

    let dealer = context.socket(SocketType::DEALER)?;
    dealer.set_linger(0)?;
    dealer.set_sndhwm(hwm)?;
    dealer.set_rcvhwm(hwm)?;
    dealer.connect(address.endpoint())?;

    let pipe = format!(
        "inproc://exchange-client-outbox-{}",
        PIPE_SEQ.fetch_add(1, Ordering::Relaxed)
    );
    let outbox_rx = context.socket(SocketType::PAIR)?;
    outbox_rx.set_linger(0)?;
    outbox_rx.bind(&pipe)?;
    let outbox_tx = context.socket(SocketType::PAIR)?;
    outbox_tx.set_linger(0)?;
    outbox_tx.connect(&pipe)?;

    Ok(TransportPair {
        input: Box::new(ZmqDealerInput {
            dealer,
            outbox: outbox_rx,
        }),
        output: Box::new(ZmqDealerOutput {
            outbox: Mutex::new(outbox_tx),
        }),
    })
}

pub(crate) struct ZmqDealerInput {
    dealer: Socket,
    outbox: Socket,
}

impl TransportInput for ZmqDealerInput {
    fn recv_frame(&mut self) -> Result<Inbound, TransportError> {
        loop {
            let (inbound_ready, outbound_ready) = {
                let mut items = [
                    self.dealer.as_poll_item(zmq::POLLIN),
                    self.outbox.as_poll_item(zmq::POLLIN),
                ];
                zmq::poll(&mut items, -1)?;
                (items[0].is_readable(), items[1].is_readable())
            };

            if outbound_ready {
                let frame = self.outbox.recv_bytes(0)?;
                if frame.is_empty() {
                    return Ok(Inbound::Interrupted);
                }
                // The receive thread must never block here: an unreachable
                // gateway fills the DEALER queue.
                match self.dealer.send(frame.as_slice(), zmq::DONTWAIT) {
                    Ok(()) => {}
                    Err(zmq::Error::EAGAIN) => return Ok(Inbound::Dropped(frame.len())),
                    Err(err) => return Err(err.into()),
                }
            }

            if inbound_ready {
                return Ok(Inbound::Frame(self.dealer.recv_bytes(0)?));
            }
        }
    }
}

pub(crate) struct ZmqDealerOutput {
    outbox: Mutex<Socket>,
}

impl ZmqDealerOutput {
    fn push(&self, data: &[u8]) -> Result<(), TransportError> {
        let outbox = self.outbox.lock().unwrap_or_else(PoisonError::into_inner);
        outbox.send(data, zmq::DONTWAIT).map_err(|err| match err {
            zmq::Error::EAGAIN => TransportError::Backpressure,
            other => TransportError::Zmq(other),
        })
    }
}

impl TransportOutput for ZmqDealerOutput {
    fn send_bytes(&self, data: &[u8]) -> Result<(), TransportError> {
        if data.is_empty() {
            return Err(TransportError::EmptyFrame);
        }
        self.push(data)
    }

    fn interrupt(&self) -> Result<(), TransportError> {
        self.push(&[])
    }
}
