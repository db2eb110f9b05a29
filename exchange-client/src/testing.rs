//! Test doubles: a scripted ZMQ gateway, a capturing logger and a capturing
//! callback set.

use log::{Level, Log, Metadata, Record};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use zmq::{Context as ZmqContext, SocketType};

use exchange_protocol::{
    AccDepositAck, AccMargin, CancelOrderReject, Envelope, LoginAck, OrderReport,
    QueryHistoryOrdersAck, QueryHistoryTradesAck, QueryOrdersAck, QueryPositionsAck,
    QueryTradesAck, RegisterAck, TradeReport, UserRegisterInfo,
};

use crate::dispatch::Event;
use crate::spi::TraderSpi;

pub use crate::comms::transports::memory::{memory_pair, MemoryGateway};

/// A growing list that other threads can block on.
struct Journal<T> {
    items: Mutex<Vec<T>>,
    grew: Condvar,
}

impl<T: Clone> Journal<T> {
    fn new() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            grew: Condvar::new(),
        }
    }

    fn push(&self, item: T) {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(item);
        self.grew.notify_all();
    }

    fn snapshot(&self) -> Vec<T> {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        let (items, _) = self
            .grew
            .wait_timeout_while(items, timeout, |items| items.len() < count)
            .unwrap_or_else(PoisonError::into_inner);
        items.len() >= count
    }
}

/// A ROUTER socket on a random local port answering requests through a
/// handler closure. Each returned envelope is sent back to the requesting
/// peer, in order.
pub struct MockGateway {
    endpoint: String,
    running: Arc<AtomicBool>,
    received: Arc<Journal<Envelope>>,
    worker: Option<JoinHandle<()>>,
}

impl MockGateway {
    pub fn start<F>(mut handler: F) -> Result<Self, zmq::Error>
    where
        F: FnMut(&Envelope) -> Vec<Envelope> + Send + 'static,
    {
        let context = ZmqContext::new();
        let router = context.socket(SocketType::ROUTER)?;
        router.set_linger(0)?;
        router.bind("tcp://127.0.0.1:*")?;
        let endpoint = router
            .get_last_endpoint()?
            .map_err(|_| zmq::Error::EINVAL)?;

        let running = Arc::new(AtomicBool::new(true));
        let received = Arc::new(Journal::new());

        let worker = {
            let running = running.clone();
            let received = received.clone();
            thread::Builder::new()
                .name("mock-gateway".into())
                .spawn(move || {
                    while running.load(Ordering::SeqCst) {
                        let readable = {
                            let mut items = [router.as_poll_item(zmq::POLLIN)];
                            match zmq::poll(&mut items, 50) {
                                Ok(_) => items[0].is_readable(),
                                Err(_) => break,
                            }
                        };
                        if !readable {
                            continue;
                        }
                        let Ok(parts) = router.recv_multipart(0) else {
                            break;
                        };
                        let (Some(identity), Some(frame)) = (parts.first(), parts.last()) else {
                            continue;
                        };
                        let Ok(request) = Envelope::from_bytes(frame) else {
                            continue;
                        };
                        let replies = handler(&request);
                        received.push(request);
                        for reply in replies {
                            let Ok(bytes) = reply.to_bytes() else {
                                continue;
                            };
                            if router
                                .send_multipart([identity.as_slice(), bytes.as_slice()], 0)
                                .is_err()
                            {
                                break;
                            }
                        }
                    }
                })
                .map_err(|_| zmq::Error::EFAULT)?
        };

        Ok(Self {
            endpoint,
            running,
            received,
            worker: Some(worker),
        })
    }

    /// Full endpoint, e.g. `tcp://127.0.0.1:41234`.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Endpoint without the scheme, as a user would type it.
    pub fn host_port(&self) -> &str {
        self.endpoint.trim_start_matches("tcp://")
    }

    /// Requests seen so far, in arrival order.
    pub fn received(&self) -> Vec<Envelope> {
        self.received.snapshot()
    }

    pub fn wait_for_requests(&self, count: usize, timeout: Duration) -> bool {
        self.received.wait_for(count, timeout)
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for MockGateway {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedLine {
    pub level: Level,
    pub target: String,
    pub message: String,
}

/// Keeps every record it is given.
#[derive(Default)]
pub struct RecordingLog {
    lines: Mutex<Vec<RecordedLine>>,
}

impl RecordingLog {
    pub fn records(&self) -> Vec<RecordedLine> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.records()
            .iter()
            .any(|line| line.level == level && line.message.contains(needle))
    }
}

impl Log for RecordingLog {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedLine {
                level: record.level(),
                target: record.target().to_string(),
                message: record.args().to_string(),
            });
    }

    fn flush(&self) {}
}

/// Callback set that keeps every event, in dispatch order.
pub struct RecordingSpi {
    events: Journal<Event>,
}

impl Default for RecordingSpi {
    fn default() -> Self {
        Self {
            events: Journal::new(),
        }
    }
}

impl RecordingSpi {
    pub fn events(&self) -> Vec<Event> {
        self.events.snapshot()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(Event::name).collect()
    }

    pub fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        self.events.wait_for(count, timeout)
    }
}

impl TraderSpi for RecordingSpi {
    fn on_register(&self, ack: &RegisterAck) {
        self.events.push(ack.clone().into());
    }

    fn on_login(&self, ack: &LoginAck) {
        self.events.push(ack.clone().into());
    }

    fn on_user_info(&self, info: &UserRegisterInfo) {
        self.events.push(info.clone().into());
    }

    fn on_deposit(&self, ack: &AccDepositAck) {
        self.events.push(ack.clone().into());
    }

    fn on_trading_account(&self, margin: &AccMargin) {
        self.events.push(margin.clone().into());
    }

    fn on_query_orders(&self, ack: &QueryOrdersAck) {
        self.events.push(ack.clone().into());
    }

    fn on_query_trades(&self, ack: &QueryTradesAck) {
        self.events.push(ack.clone().into());
    }

    fn on_query_positions(&self, ack: &QueryPositionsAck) {
        self.events.push(ack.clone().into());
    }

    fn on_query_history_orders(&self, ack: &QueryHistoryOrdersAck) {
        self.events.push(ack.clone().into());
    }

    fn on_query_history_trades(&self, ack: &QueryHistoryTradesAck) {
        self.events.push(ack.clone().into());
    }

    fn on_order_report(&self, report: &OrderReport) {
        self.events.push(report.clone().into());
    }

    fn on_trade_report(&self, report: &TradeReport) {
        self.events.push(report.clone().into());
    }

    fn on_cancel_reject(&self, reject: &CancelOrderReject) {
        self.events.push(reject.clone().into());
    }
}
