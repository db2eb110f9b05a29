//! Trader client facade.
//!
//! One method per gateway operation. Query-style operations take a [`Call`]
//! mode: fire-and-forget, with the answer only reaching the callbacks, or
//! synchronous, blocking the calling thread until the matching response
//! arrives or the timeout elapses.

use log::Level;
use std::sync::Arc;
use std::time::Duration;

use exchange_protocol::{
    AccDepositAck, AccDepositReq, AccMargin, CancelOrder, Envelope, LoginAck, LoginReq,
    LogoutReq, Payload, PlaceOrder, QueryHistoryOrdersAck, QueryHistoryOrdersReq,
    QueryHistoryTradesAck, QueryHistoryTradesReq, QueryOrdersAck, QueryOrdersReq,
    QueryPositionsAck, QueryPositionsReq, QueryTradesAck, QueryTradesReq, RegisterAck,
    RegisterReq, TradingAccQryReq, UserInfoQryReq, UserRegisterInfo,
};

use crate::comms::address::Address;
use crate::comms::transport::TransportPair;
use crate::config::{ClientConfig, DEFAULT_SYNC_TIMEOUT_MS};
use crate::connection::Connection;
use crate::dispatch::FromEvent;
use crate::error::{ClientError, Result};
use crate::logging::{emit, Logger};
use crate::policy::{AllowAll, LoginRequired, RequestPolicy};
use crate::receiver::LoopState;
use crate::spi::{NoopSpi, TraderSpi};

/// How a query waits for its answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    /// Send and return `Ok(None)` at once. The answer only reaches the callbacks.
    Async,
    /// Block up to the given duration for the answer.
    Sync(Duration),
    /// Block up to the client's configured timeout.
    SyncDefault,
}

/// A request answered by exactly one acknowledgement kind.
pub trait Query: Payload {
    type Ack: Payload + FromEvent;
}

macro_rules! queries {
    ($($request:ty => $ack:ty),* $(,)?) => {
        $(
            impl Query for $request {
                type Ack = $ack;
            }
        )*
    };
}

queries! {
    RegisterReq => RegisterAck,
    LoginReq => LoginAck,
    UserInfoQryReq => UserRegisterInfo,
    AccDepositReq => AccDepositAck,
    TradingAccQryReq => AccMargin,
    QueryOrdersReq => QueryOrdersAck,
    QueryTradesReq => QueryTradesAck,
    QueryPositionsReq => QueryPositionsAck,
    QueryHistoryOrdersReq => QueryHistoryOrdersAck,
    QueryHistoryTradesReq => QueryHistoryTradesAck,
}

/// Collects callbacks, policy and logging before connecting.
///
/// The callback set cannot be changed once connected.
pub struct ClientBuilder {
    spi: Arc<dyn TraderSpi>,
    policy: Option<Box<dyn RequestPolicy>>,
    logger: Option<Logger>,
    sync_timeout: Option<Duration>,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self {
            spi: Arc::new(NoopSpi),
            policy: None,
            logger: None,
            sync_timeout: None,
        }
    }
}

impl ClientBuilder {
    pub fn spi(mut self, spi: impl TraderSpi + 'static) -> Self {
        self.spi = Arc::new(spi);
        self
    }

    pub fn shared_spi(mut self, spi: Arc<dyn TraderSpi>) -> Self {
        self.spi = spi;
        self
    }

    pub fn policy(mut self, policy: impl RequestPolicy + 'static) -> Self {
        self.policy = Some(Box::new(policy));
        self
    }

    pub fn logger(mut self, logger: Logger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Timeout used by [`Call::SyncDefault`].
    pub fn sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = Some(timeout);
        self
    }

    /// Connects to the gateway at `address` (`host:port` or a full endpoint).
    ///
    /// # Returns
    ///
    /// * `Err(InvalidAddress)` if the address cannot be normalized.
    /// * `Err(Connection)` if the socket cannot be set up.
    pub fn connect(self, address: &str) -> Result<TraderClient> {
        let address = Address::parse(address)?;
        let logger = self.logger.clone().unwrap_or_default();
        let connection = Connection::open(&address, self.spi.clone(), logger)?;
        Ok(self.finish(connection))
    }

    /// Applies a loaded configuration. Values already set on the builder win
    /// over the configuration.
    pub fn configure(mut self, config: &ClientConfig) -> Result<Self> {
        if self.policy.is_none() && !config.enforce_login {
            self.policy = Some(Box::new(AllowAll));
        }
        if self.sync_timeout.is_none() {
            self.sync_timeout = Some(config.sync_timeout());
        }
        if self.logger.is_none() {
            if let Some(log) = &config.log {
                self.logger = Some(log.logger()?);
            }
        }
        Ok(self)
    }

    /// Connects to `config.server_address` with the configuration applied.
    pub fn connect_config(self, config: &ClientConfig) -> Result<TraderClient> {
        self.configure(config)?.connect(&config.server_address)
    }

    /// Runs the client over a caller-supplied transport.
    pub fn connect_transport(self, label: &str, transport: TransportPair) -> Result<TraderClient> {
        let logger = self.logger.clone().unwrap_or_default();
        let connection = Connection::with_transport(label, transport, self.spi.clone(), logger)?;
        Ok(self.finish(connection))
    }

    fn finish(self, connection: Connection) -> TraderClient {
        TraderClient {
            connection,
            policy: self.policy.unwrap_or_else(|| Box::new(LoginRequired)),
            sync_timeout: self
                .sync_timeout
                .unwrap_or(Duration::from_millis(DEFAULT_SYNC_TIMEOUT_MS)),
        }
    }
}

/// A connected trader session.
pub struct TraderClient {
    connection: Connection,
    policy: Box<dyn RequestPolicy>,
    sync_timeout: Duration,
}

impl TraderClient {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// Connects with no callbacks and the default policy.
    pub fn connect(address: &str) -> Result<Self> {
        Self::builder().connect(address)
    }

    // ---------------------------------------------------------------------
    // Account lifecycle
    // ---------------------------------------------------------------------

    pub fn register(
        &self,
        user_name: &str,
        check_code: &str,
        call: Call,
    ) -> Result<Option<RegisterAck>> {
        self.call(
            &RegisterReq {
                user_name: user_name.to_string(),
                check_code: check_code.to_string(),
            },
            call,
        )
    }

    /// Logs in. The session counts as logged in once the gateway's
    /// acknowledgement has been received, whatever the call mode.
    pub fn login(&self, account_id: &str, password: &str, call: Call) -> Result<Option<LoginAck>> {
        self.call(
            &LoginReq {
                account_id: account_id.to_string(),
                password: password.to_string(),
            },
            call,
        )
    }

    /// The gateway does not acknowledge a logout.
    pub fn logout(&self, account_id: &str) -> Result<()> {
        self.send(&LogoutReq {
            account_id: account_id.to_string(),
        })
    }

    pub fn user_info(&self, account_id: &str, call: Call) -> Result<Option<UserRegisterInfo>> {
        self.call(
            &UserInfoQryReq {
                account_id: account_id.to_string(),
            },
            call,
        )
    }

    pub fn deposit(
        &self,
        account_id: &str,
        currency: &str,
        amount: f64,
        call: Call,
    ) -> Result<Option<AccDepositAck>> {
        self.call(
            &AccDepositReq {
                account_id: account_id.to_string(),
                currency: currency.to_string(),
                amount,
            },
            call,
        )
    }

    pub fn trading_account(&self, account_id: &str, call: Call) -> Result<Option<AccMargin>> {
        self.call(
            &TradingAccQryReq {
                account_id: account_id.to_string(),
            },
            call,
        )
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    pub fn query_orders(
        &self,
        request: &QueryOrdersReq,
        call: Call,
    ) -> Result<Option<QueryOrdersAck>> {
        self.call(request, call)
    }

    pub fn query_trades(
        &self,
        request: &QueryTradesReq,
        call: Call,
    ) -> Result<Option<QueryTradesAck>> {
        self.call(request, call)
    }

    pub fn query_positions(
        &self,
        request: &QueryPositionsReq,
        call: Call,
    ) -> Result<Option<QueryPositionsAck>> {
        self.call(request, call)
    }

    pub fn query_history_orders(
        &self,
        request: &QueryHistoryOrdersReq,
        call: Call,
    ) -> Result<Option<QueryHistoryOrdersAck>> {
        self.call(request, call)
    }

    pub fn query_history_trades(
        &self,
        request: &QueryHistoryTradesReq,
        call: Call,
    ) -> Result<Option<QueryHistoryTradesAck>> {
        self.call(request, call)
    }

    // ---------------------------------------------------------------------
    // Trading
    // ---------------------------------------------------------------------

    /// Results arrive through `on_order_report` and `on_trade_report`.
    pub fn place_order(&self, order: &PlaceOrder) -> Result<()> {
        self.send(order)
    }

    /// A refused cancel arrives through `on_cancel_reject`.
    pub fn cancel_order(&self, account_id: &str, order_id: &str) -> Result<()> {
        self.send(&CancelOrder {
            account_id: account_id.to_string(),
            order_id: order_id.to_string(),
        })
    }

    // ---------------------------------------------------------------------
    // Generic paths
    // ---------------------------------------------------------------------

    /// Sends `request` and, for synchronous modes, waits for its acknowledgement.
    ///
    /// # Returns
    ///
    /// * `Ok(Some(ack))` if the acknowledgement arrived in time.
    /// * `Ok(None)` for [`Call::Async`], or when the wait timed out.
    /// * `Err` if the policy refused the request or it could not be sent.
    pub fn call<Q: Query>(&self, request: &Q, call: Call) -> Result<Option<Q::Ack>> {
        self.check(Q::KIND)?;
        let envelope = Envelope::request(request)?;

        let timeout = match call {
            Call::Async => {
                self.connection.send(&envelope)?;
                return Ok(None);
            }
            Call::Sync(timeout) => timeout,
            Call::SyncDefault => self.sync_timeout,
        };

        let event = <Q::Ack as FromEvent>::EVENT;
        let registry = self.connection.registry();
        registry.subscribe(event);
        let reply = self
            .connection
            .send(&envelope)
            .map(|()| registry.wait(event, timeout));
        registry.unsubscribe(event);

        Ok(reply?.and_then(<Q::Ack as FromEvent>::from_event))
    }

    /// Sends a request that has no acknowledgement.
    pub fn send<P: Payload>(&self, request: &P) -> Result<()> {
        self.check(P::KIND)?;
        self.connection.send(&Envelope::request(request)?)
    }

    fn check(&self, kind: exchange_protocol::MessageKind) -> Result<()> {
        let session = self.connection.session();
        if session.is_closed() {
            return Err(ClientError::Closed);
        }
        self.policy.check(kind, session).map_err(|err| {
            emit!(
                self.connection.logger(),
                Level::Debug,
                "{} refused {}: {}",
                self.policy.name(),
                kind,
                err
            );
            err
        })
    }

    // ---------------------------------------------------------------------
    // State
    // ---------------------------------------------------------------------

    pub fn is_logged_in(&self) -> bool {
        self.connection.session().is_logged_in()
    }

    pub fn is_closed(&self) -> bool {
        self.connection.session().is_closed()
    }

    pub fn client_ref(&self) -> uuid::Uuid {
        self.connection.session().client_ref()
    }

    /// Account acknowledged by the last login.
    pub fn sender_identity(&self) -> Option<String> {
        self.connection.session().sender_identity()
    }

    pub fn server_address(&self) -> &str {
        self.connection.session().server_address()
    }

    pub fn loop_state(&self) -> LoopState {
        self.connection.state()
    }

    pub fn sync_timeout(&self) -> Duration {
        self.sync_timeout
    }

    /// Closes the connection. Safe to call more than once.
    pub fn close(&self) -> Result<()> {
        self.connection.close()
    }

    /// Blocks until the receive loop has stopped, whether through `close()`
    /// or a transport failure. `false` if `timeout` elapsed first.
    pub fn wait_closed(&self, timeout: Duration) -> bool {
        self.connection.wait_stopped(timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comms::transports::memory::{memory_pair, MemoryGateway};
    use crate::testing::RecordingSpi;
    use chrono::{NaiveDate, Utc};
    use exchange_protocol::{MessageKind, OrderSide};
    use std::thread::{self, JoinHandle};

    fn login_ack(account_id: &str) -> LoginAck {
        LoginAck {
            account_id: account_id.into(),
            trading_day: NaiveDate::from_ymd_opt(2024, 6, 3).unwrap(),
            login_time: Utc::now(),
        }
    }

    /// Answers each request through `handler` until the client goes away.
    fn serve<F>(gateway: MemoryGateway, mut handler: F) -> JoinHandle<Vec<MessageKind>>
    where
        F: FnMut(&Envelope) -> Vec<Envelope> + Send + 'static,
    {
        thread::spawn(move || {
            let mut seen = Vec::new();
            while let Some(request) = gateway.next_request(Duration::from_secs(2)) {
                seen.extend(request.message_kind());
                for reply in handler(&request) {
                    gateway.push(&reply).unwrap();
                }
            }
            seen
        })
    }

    fn login_handler(request: &Envelope) -> Vec<Envelope> {
        match request.message_kind() {
            Some(MessageKind::LoginReq) => {
                let req: LoginReq = request.decode_payload().unwrap();
                vec![Envelope::response(&login_ack(&req.account_id)).unwrap()]
            }
            _ => vec![],
        }
    }

    #[test]
    fn test_sync_login_returns_ack_and_marks_session() {
        let (pair, gateway) = memory_pair();
        let spi = Arc::new(RecordingSpi::default());
        let client = TraderClient::builder()
            .shared_spi(spi.clone())
            .connect_transport("memory", pair)
            .unwrap();
        let server = serve(gateway, login_handler);

        let ack = client
            .login("acc-9", "secret", Call::Sync(Duration::from_secs(2)))
            .unwrap()
            .unwrap();

        assert_eq!(ack.account_id, "acc-9");
        assert!(client.is_logged_in());
        assert_eq!(client.sender_identity().as_deref(), Some("acc-9"));
        assert_eq!(spi.names(), vec!["Login"]);
        assert!(!client.connection.registry().is_subscribed("Login"));

        client.close().unwrap();
        assert_eq!(server.join().unwrap(), vec![MessageKind::LoginReq]);
    }

    #[test]
    fn test_async_call_returns_none_and_reaches_callback() {
        let (pair, gateway) = memory_pair();
        let spi = Arc::new(RecordingSpi::default());
        let client = TraderClient::builder()
            .shared_spi(spi.clone())
            .connect_transport("memory", pair)
            .unwrap();
        let _server = serve(gateway, login_handler);

        assert_eq!(client.login("acc-9", "pw", Call::Async).unwrap(), None);
        assert!(spi.wait_for(1, Duration::from_secs(2)));
        assert!(client.is_logged_in());
    }

    #[test]
    fn test_sync_call_times_out_with_none() {
        let (pair, gateway) = memory_pair();
        let client = TraderClient::builder()
            .policy(AllowAll)
            .sync_timeout(Duration::from_millis(50))
            .connect_transport("memory", pair)
            .unwrap();
        let _server = serve(gateway, |_| vec![]);

        let reply = client
            .query_orders(&QueryOrdersReq::all("acc-1"), Call::SyncDefault)
            .unwrap();
        assert_eq!(reply, None);
        assert!(client.connection.registry().is_empty());
    }

    #[test]
    fn test_requests_before_login_are_refused() {
        let (pair, gateway) = memory_pair();
        let client = TraderClient::builder()
            .connect_transport("memory", pair)
            .unwrap();

        let order = PlaceOrder::limit("acc-1", "c-1", "SH600000", OrderSide::Buy, 10.0, 100.0);
        assert!(matches!(
            client.place_order(&order),
            Err(ClientError::NotLoggedIn)
        ));
        assert!(matches!(
            client.trading_account("acc-1", Call::Async),
            Err(ClientError::NotLoggedIn)
        ));
        assert!(gateway.next_request(Duration::from_millis(50)).is_none());
    }

    #[test]
    fn test_closed_client_refuses_requests() {
        let (pair, _gateway) = memory_pair();
        let client = TraderClient::builder()
            .connect_transport("memory", pair)
            .unwrap();

        client.close().unwrap();
        client.close().unwrap();
        assert!(client.is_closed());
        assert!(client.wait_closed(Duration::from_secs(1)));
        assert!(matches!(
            client.login("acc-1", "pw", Call::Async),
            Err(ClientError::Closed)
        ));
    }

    #[test]
    fn test_builder_defaults() {
        let (pair, _gateway) = memory_pair();
        let client = TraderClient::builder()
            .connect_transport("memory", pair)
            .unwrap();

        assert_eq!(
            client.sync_timeout(),
            Duration::from_millis(DEFAULT_SYNC_TIMEOUT_MS)
        );
        assert_eq!(client.server_address(), "memory");
        assert!(!client.is_logged_in());
    }

    #[test]
    fn test_config_relaxes_login_policy() {
        let (pair, gateway) = memory_pair();
        let config = ClientConfig {
            enforce_login: false,
            sync_timeout_ms: 250,
            ..ClientConfig::default()
        };
        let client = TraderClient::builder()
            .configure(&config)
            .unwrap()
            .connect_transport("memory", pair)
            .unwrap();

        client.cancel_order("acc-1", "o-1").unwrap();
        let seen = gateway.next_request(Duration::from_secs(1)).unwrap();
        assert_eq!(seen.message_kind(), Some(MessageKind::CancelOrder));
        assert_eq!(client.sync_timeout(), Duration::from_millis(250));
    }
}
