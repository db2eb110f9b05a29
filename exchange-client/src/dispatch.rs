//! Inbound events and the table routing message kinds to them.
//!
//! The whole inbound surface is declared once in the `events!` invocation at
//! the bottom of this file. Each row names the payload, the event name used
//! for correlation, the callback it triggers and whether synchronous callers
//! may wait on it. Supporting a new response is one more row.

use std::collections::HashMap;
use std::fmt;

use exchange_protocol::{
    AccDepositAck, AccMargin, CancelOrderReject, CodecError, Envelope, LoginAck, MessageKind,
    OrderReport, Payload, QueryHistoryOrdersAck, QueryHistoryTradesAck, QueryOrdersAck,
    QueryPositionsAck, QueryTradesAck, RegisterAck, TradeReport, UserRegisterInfo,
};

use crate::spi::TraderSpi;

/// Converts an [`Event`] back into the payload it carries.
pub trait FromEvent: Sized {
    /// Name the event is registered under.
    const EVENT: &'static str;

    fn from_event(event: Event) -> Option<Self>;
}

/// Where a message kind goes once its envelope is parsed.
#[derive(Clone, Copy)]
pub struct Route {
    pub event: &'static str,
    /// `false` for unsolicited reports, which only reach the callbacks.
    pub correlated: bool,
    pub decode: fn(&Envelope) -> Result<Event, CodecError>,
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("event", &self.event)
            .field("correlated", &self.correlated)
            .finish_non_exhaustive()
    }
}

/// Read-only map from message kind to [`Route`].
#[derive(Debug, Clone, Default)]
pub struct DispatchTable {
    routes: HashMap<MessageKind, Route>,
}

impl DispatchTable {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kind: MessageKind, route: Route) {
        self.routes.insert(kind, route);
    }

    pub fn route(&self, kind: MessageKind) -> Option<&Route> {
        self.routes.get(&kind)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

fn decode_as<P>(envelope: &Envelope) -> Result<Event, CodecError>
where
    P: Payload + Into<Event>,
{
    Ok(envelope.decode_payload::<P>()?.into())
}

macro_rules! events {
    ($( $variant:ident($payload:ty) => $name:literal, $callback:ident, correlated: $correlated:literal; )*) => {
        /// A decoded inbound payload.
        #[derive(Debug, Clone, PartialEq)]
        pub enum Event {
            $( $variant($payload), )*
        }

        impl Event {
            /// Correlation name, e.g. `"Login"`.
            pub fn name(&self) -> &'static str {
                match self {
                    $( Event::$variant(_) => $name, )*
                }
            }

            pub fn kind(&self) -> MessageKind {
                match self {
                    $( Event::$variant(_) => <$payload as Payload>::KIND, )*
                }
            }

            /// Hands the payload to its callback.
            pub fn notify(&self, spi: &dyn TraderSpi) {
                match self {
                    $( Event::$variant(value) => spi.$callback(value), )*
                }
            }
        }

        $(
            impl From<$payload> for Event {
                fn from(value: $payload) -> Self {
                    Event::$variant(value)
                }
            }

            impl FromEvent for $payload {
                const EVENT: &'static str = $name;

                fn from_event(event: Event) -> Option<Self> {
                    match event {
                        Event::$variant(value) => Some(value),
                        _ => None,
                    }
                }
            }
        )*

        impl DispatchTable {
            /// Every response and report this client understands.
            pub fn standard() -> Self {
                let mut table = Self::empty();
                $(
                    table.insert(
                        <$payload as Payload>::KIND,
                        Route {
                            event: $name,
                            correlated: $correlated,
                            decode: decode_as::<$payload>,
                        },
                    );
                )*
                table
            }
        }
    };
}

events! {
    Register(RegisterAck) => "Register", on_register, correlated: true;
    Login(LoginAck) => "Login", on_login, correlated: true;
    UserInfo(UserRegisterInfo) => "UserInfoQuery", on_user_info, correlated: true;
    Deposit(AccDepositAck) => "AccountDeposit", on_deposit, correlated: true;
    TradingAccount(AccMargin) => "TradingAccountQuery", on_trading_account, correlated: true;
    Orders(QueryOrdersAck) => "QueryOrders", on_query_orders, correlated: true;
    Trades(QueryTradesAck) => "QueryTrades", on_query_trades, correlated: true;
    Positions(QueryPositionsAck) => "QueryPositions", on_query_positions, correlated: true;
    HistoryOrders(QueryHistoryOrdersAck) => "QueryHistoryOrders", on_query_history_orders, correlated: true;
    HistoryTrades(QueryHistoryTradesAck) => "QueryHistoryTrades", on_query_history_trades, correlated: true;
    OrderReport(OrderReport) => "OrderReport", on_order_report, correlated: false;
    TradeReport(TradeReport) => "TradeReport", on_trade_report, correlated: false;
    CancelReject(CancelOrderReject) => "CancelReject", on_cancel_reject, correlated: false;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};
    use exchange_protocol::{MessageClass, MessageKind};
    use std::sync::Mutex;

    fn login_ack() -> LoginAck {
        LoginAck {
            account_id: "acc-1".into(),
            trading_day: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            login_time: Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_standard_table_covers_every_response_kind() {
        let table = DispatchTable::standard();
        let responses: Vec<MessageKind> = MessageKind::ALL
            .iter()
            .copied()
            .filter(|kind| kind.class() == MessageClass::Response)
            .collect();

        assert_eq!(table.len(), responses.len());
        for kind in responses {
            assert!(table.route(kind).is_some(), "no route for {kind}");
        }
        assert!(table.route(MessageKind::LoginReq).is_none());
    }

    #[test]
    fn test_reports_are_not_correlated() {
        let table = DispatchTable::standard();
        for kind in [
            MessageKind::OrderReport,
            MessageKind::TradeReport,
            MessageKind::CancelOrderReject,
        ] {
            assert!(!table.route(kind).unwrap().correlated);
        }
        let login = table.route(MessageKind::LoginAck).unwrap();
        assert!(login.correlated);
        assert_eq!(login.event, "Login");
    }

    #[test]
    fn test_route_decodes_into_matching_event() {
        let table = DispatchTable::standard();
        let envelope = Envelope::response(&login_ack()).unwrap();

        let event = (table.route(MessageKind::LoginAck).unwrap().decode)(&envelope).unwrap();
        assert_eq!(event.name(), "Login");
        assert_eq!(event.kind(), MessageKind::LoginAck);
        assert_eq!(LoginAck::from_event(event.clone()), Some(login_ack()));
        assert_eq!(RegisterAck::from_event(event), None);
    }

    #[test]
    fn test_route_rejects_foreign_payload() {
        let table = DispatchTable::standard();
        let envelope = Envelope::new(MessageClass::Response, MessageKind::LoginAck, vec![1, 2]);

        let err = (table.route(MessageKind::LoginAck).unwrap().decode)(&envelope).unwrap_err();
        assert!(matches!(
            err,
            CodecError::MalformedPayload {
                kind: MessageKind::LoginAck,
                ..
            }
        ));
    }

    #[derive(Default)]
    struct LoginCounter {
        seen: Mutex<Vec<String>>,
    }

    impl TraderSpi for LoginCounter {
        fn on_login(&self, ack: &LoginAck) {
            self.seen.lock().unwrap().push(ack.account_id.clone());
        }
    }

    #[test]
    fn test_notify_calls_the_matching_callback_only() {
        let spi = LoginCounter::default();
        Event::from(login_ack()).notify(&spi);
        Event::from(TradeReport {
            trade: exchange_protocol::Trade {
                trade_id: "t-1".into(),
                order_id: "o-1".into(),
                account_id: "acc-1".into(),
                instrument: "SH600000".into(),
                side: exchange_protocol::OrderSide::Buy,
                price: 10.0,
                quantity: 100.0,
                fee: 0.5,
                executed_at: Utc::now(),
            },
        })
        .notify(&spi);

        assert_eq!(*spi.seen.lock().unwrap(), vec!["acc-1".to_string()]);
    }
}
