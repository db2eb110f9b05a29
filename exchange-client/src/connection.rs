//! Connection manager: owns the transport and the receive thread.

use log::Level;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use exchange_protocol::Envelope;

use crate::comms::address::Address;
use crate::comms::transport::{TransportOutput, TransportPair};
use crate::comms::transports::zmq::connect_dealer;
use crate::error::{ClientError, Result, TransportError};
use crate::logging::{emit, Logger};
use crate::receiver::{LoopState, ReceiveLoop, StateCell};
use crate::registry::CorrelationRegistry;
use crate::session::Session;
use crate::spi::TraderSpi;

/// How long `close()` keeps retrying the interrupt while the outbox is full.
const INTERRUPT_GRACE: Duration = Duration::from_secs(1);

/// One live link to the gateway.
///
/// Closing is one-way: a closed connection cannot be reopened.
pub struct Connection {
    session: Arc<Session>,
    registry: Arc<CorrelationRegistry>,
    state: Arc<StateCell>,
    output: Mutex<Option<Box<dyn TransportOutput>>>,
    receiver: Mutex<Option<JoinHandle<Result<()>>>>,
    logger: Logger,
}

impl Connection {
    /// Connects a DEALER socket to `address` and starts the receive loop.
    pub fn open(address: &Address, spi: Arc<dyn TraderSpi>, logger: Logger) -> Result<Self> {
        let transport = connect_dealer(address).map_err(|source| ClientError::Connection {
            address: address.to_string(),
            source,
        })?;
        Self::with_transport(address.endpoint(), transport, spi, logger)
    }

    /// Starts the receive loop over an already connected transport.
    pub fn with_transport(
        server_address: &str,
        transport: TransportPair,
        spi: Arc<dyn TraderSpi>,
        logger: Logger,
    ) -> Result<Self> {
        let session = Arc::new(Session::new(server_address));
        let target = format!("{}::{}", logger.target(), session.client_ref());
        let logger = logger.with_target(target);
        let registry = Arc::new(CorrelationRegistry::new(logger.clone()));
        let state = Arc::new(StateCell::new());

        let TransportPair { input, output } = transport;
        let receive_loop = ReceiveLoop::new(
            input,
            spi,
            registry.clone(),
            session.clone(),
            state.clone(),
            logger.clone(),
        );
        let receiver = thread::Builder::new()
            .name(format!("exchange-recv-{}", session.client_ref().simple()))
            .spawn(move || receive_loop.run())?;

        emit!(logger, Level::Info, "Connected to {}", server_address);

        Ok(Self {
            session,
            registry,
            state,
            output: Mutex::new(Some(output)),
            receiver: Mutex::new(Some(receiver)),
            logger,
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn registry(&self) -> &CorrelationRegistry {
        &self.registry
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn state(&self) -> LoopState {
        self.state.get()
    }

    /// Serializes `envelope` and queues it for the gateway.
    pub fn send(&self, envelope: &Envelope) -> Result<()> {
        if self.session.is_closed() {
            return Err(ClientError::Closed);
        }
        if self.state.get() == LoopState::Stopped {
            return Err(TransportError::Disconnected.into());
        }
        let bytes = envelope.to_bytes()?;
        let output = self.output.lock().unwrap_or_else(PoisonError::into_inner);
        match output.as_ref() {
            Some(output) => {
                output.send_bytes(&bytes)?;
                emit!(
                    self.logger,
                    Level::Trace,
                    "Sent {} ({} bytes)",
                    envelope.raw_kind(),
                    bytes.len()
                );
                Ok(())
            }
            None => Err(ClientError::Closed),
        }
    }

    /// Blocks until the receive loop has stopped, or `timeout` elapses.
    pub fn wait_stopped(&self, timeout: Duration) -> bool {
        self.state.wait_stopped(timeout)
    }

    /// Stops the receive loop and releases the transport.
    ///
    /// Only the first call does any work; later calls return `Ok(())`. If the
    /// transport had already failed while connected, that error is returned
    /// here.
    pub fn close(&self) -> Result<()> {
        if self.session.mark_closed() {
            return Ok(());
        }

        let output = self
            .output
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let woken = match &output {
            Some(output) => self.interrupt_receiver(output.as_ref()),
            None => true,
        };

        let receiver = self
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let outcome = match receiver {
            // Closing from inside a callback: the loop exits on its own once
            // the callback returns.
            Some(handle) if handle.thread().id() == thread::current().id() => Ok(()),
            Some(_) if !woken => {
                emit!(
                    self.logger,
                    Level::Warn,
                    "Receive loop could not be interrupted, detaching it"
                );
                Ok(())
            }
            Some(handle) => handle.join().unwrap_or(Err(ClientError::ReceiverPanicked)),
            None => Ok(()),
        };
        drop(output);

        match &outcome {
            Ok(()) => emit!(self.logger, Level::Info, "Connection closed"),
            Err(err) => emit!(
                self.logger,
                Level::Warn,
                "Connection closed after failure: {}",
                err
            ),
        }
        outcome
    }

    /// Wakes the receive loop so it sees `closed`. Returns `false` if the loop
    /// may still be blocked, in which case it must not be joined.
    fn interrupt_receiver(&self, output: &dyn TransportOutput) -> bool {
        let deadline = Instant::now() + INTERRUPT_GRACE;
        loop {
            match output.interrupt() {
                Ok(()) => return true,
                // The loop drains the outbox without blocking, so a slot frees up.
                Err(TransportError::Backpressure) if Instant::now() < deadline => {
                    if self.state.wait_stopped(Duration::from_millis(5)) {
                        return true;
                    }
                }
                Err(err) => {
                    emit!(
                        self.logger,
                        Level::Debug,
                        "Receive loop did not take the interrupt: {}",
                        err
                    );
                    return self.state.get() == LoopState::Stopped;
                }
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
