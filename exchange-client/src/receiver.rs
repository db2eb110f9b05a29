//! The receive loop.
//!
//! Runs on its own thread for the lifetime of a connection, reading one frame
//! at a time and dispatching it before reading the next, so callbacks observe
//! responses in wire order.

use log::Level;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use exchange_protocol::{CodecError, Envelope, MessageKind};

use crate::comms::transport::{Inbound, TransportInput};
use crate::dispatch::{DispatchTable, Event};
use crate::error::Result;
use crate::logging::{emit, Logger};
use crate::registry::{CorrelationRegistry, Delivery};
use crate::session::Session;
use crate::spi::TraderSpi;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Polling,
    Dispatching,
    /// Terminal.
    Stopped,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoopState::Idle => "idle",
            LoopState::Polling => "polling",
            LoopState::Dispatching => "dispatching",
            LoopState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Loop state shared with the connection, which can block until it changes.
#[derive(Debug)]
pub(crate) struct StateCell {
    state: Mutex<LoopState>,
    changed: Condvar,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(LoopState::Idle),
            changed: Condvar::new(),
        }
    }

    pub(crate) fn get(&self) -> LoopState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, next: LoopState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != LoopState::Stopped {
            *state = next;
            self.changed.notify_all();
        }
    }

    /// `true` once the loop reached `Stopped`, `false` if `timeout` ran out first.
    pub(crate) fn wait_stopped(&self, timeout: Duration) -> bool {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let (state, _) = self
            .changed
            .wait_timeout_while(state, timeout, |state| *state != LoopState::Stopped)
            .unwrap_or_else(PoisonError::into_inner);
        *state == LoopState::Stopped
    }
}

/// What one frame turned into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Not an envelope at all.
    Garbage,
    /// Request-class (or unknown-class) traffic this client never expects.
    NotResponse,
    /// No route for the kind.
    Unroutable(u32),
    /// The payload did not match the routed type.
    Malformed(MessageKind),
    Dispatched {
        event: &'static str,
        /// `None` for events synchronous callers cannot wait on.
        delivery: Option<Delivery>,
    },
}

pub struct ReceiveLoop {
    input: Box<dyn TransportInput>,
    table: DispatchTable,
    spi: Arc<dyn TraderSpi>,
    registry: Arc<CorrelationRegistry>,
    session: Arc<Session>,
    state: Arc<StateCell>,
    logger: Logger,
}

impl ReceiveLoop {
    pub(crate) fn new(
        input: Box<dyn TransportInput>,
        spi: Arc<dyn TraderSpi>,
        registry: Arc<CorrelationRegistry>,
        session: Arc<Session>,
        state: Arc<StateCell>,
        logger: Logger,
    ) -> Self {
        Self {
            input,
            table: DispatchTable::standard(),
            spi,
            registry,
            session,
            state,
            logger,
        }
    }

    /// Runs until the session is closed or the transport fails.
    ///
    /// A transport failure after `close()` is the expected way out and ends
    /// with `Ok`. One while the session is still open is returned as an error.
    pub fn run(mut self) -> Result<()> {
        emit!(self.logger, Level::Debug, "Receive loop started");
        let outcome = loop {
            if self.session.is_closed() {
                break Ok(());
            }
            self.state.set(LoopState::Polling);
            match self.input.recv_frame() {
                Ok(Inbound::Frame(bytes)) => {
                    self.state.set(LoopState::Dispatching);
                    self.dispatch(&bytes);
                }
                Ok(Inbound::Interrupted) => continue,
                Ok(Inbound::Dropped(len)) => {
                    emit!(
                        self.logger,
                        Level::Warn,
                        "Dropped outbound frame ({} bytes): gateway queue is full",
                        len
                    );
                }
                Err(err) if self.session.is_closed() => {
                    emit!(
                        self.logger,
                        Level::Debug,
                        "Transport ended after close: {}",
                        err
                    );
                    break Ok(());
                }
                Err(err) => {
                    emit!(
                        self.logger,
                        Level::Error,
                        "Transport failed while connected: {}",
                        err
                    );
                    break Err(err.into());
                }
            }
        };
        self.state.set(LoopState::Stopped);
        emit!(self.logger, Level::Debug, "Receive loop stopped");
        outcome
    }

    /// Handles one frame. Bad frames are logged and dropped.
    pub fn dispatch(&self, bytes: &[u8]) -> FrameOutcome {
        let envelope = match Envelope::from_bytes(bytes) {
            Ok(envelope) => envelope,
            Err(err) => {
                emit!(
                    self.logger,
                    Level::Error,
                    "Dropping undecodable frame ({} bytes): {}",
                    bytes.len(),
                    err
                );
                return FrameOutcome::Garbage;
            }
        };

        if !envelope.is_response() {
            emit!(
                self.logger,
                Level::Debug,
                "Ignoring non-response frame (class {}, kind {})",
                envelope.raw_class(),
                envelope.raw_kind()
            );
            return FrameOutcome::NotResponse;
        }

        let Some(route) = envelope
            .message_kind()
            .and_then(|kind| self.table.route(kind))
        else {
            emit!(
                self.logger,
                Level::Warn,
                "Dropping frame of unknown message kind {}",
                envelope.raw_kind()
            );
            return FrameOutcome::Unroutable(envelope.raw_kind());
        };

        let event = match (route.decode)(&envelope) {
            Ok(event) => event,
            Err(CodecError::MalformedPayload { kind, source }) => {
                emit!(
                    self.logger,
                    Level::Error,
                    "Dropping malformed {} payload: {}",
                    kind,
                    source
                );
                return FrameOutcome::Malformed(kind);
            }
            Err(err) => {
                emit!(self.logger, Level::Error, "Dropping frame: {}", err);
                return FrameOutcome::Unroutable(envelope.raw_kind());
            }
        };

        if let Event::Login(ack) = &event {
            self.session.mark_logged_in(&ack.account_id);
            emit!(
                self.logger,
                Level::Info,
                "Logged in as {} for trading day {}",
                ack.account_id,
                ack.trading_day
            );
        }

        event.notify(self.spi.as_ref());

        let delivery = route.correlated.then(|| self.registry.deliver(event));
        FrameOutcome::Dispatched {
            event: route.event,
            delivery,
        }
    }
}
