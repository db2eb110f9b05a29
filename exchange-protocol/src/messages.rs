//! Request and response payloads, one type per message kind.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::envelope::{MessageKind, Payload};
use crate::model::{Order, OrderSide, OrderType, Position, Trade};

macro_rules! payload {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(
            impl Payload for $ty {
                const KIND: MessageKind = MessageKind::$kind;
            }
        )*
    };
}

payload! {
    RegisterReq => RegisterReq,
    RegisterAck => RegisterAck,
    LoginReq => LoginReq,
    LoginAck => LoginAck,
    LogoutReq => LogoutReq,
    UserInfoQryReq => UserInfoQryReq,
    UserRegisterInfo => UserInfoQryAck,
    AccDepositReq => AccDepositReq,
    AccDepositAck => AccDepositAck,
    TradingAccQryReq => TradingAccQryReq,
    AccMargin => TradingAccQryAck,
    QueryOrdersReq => QueryOrdersReq,
    QueryOrdersAck => QueryOrdersAck,
    QueryTradesReq => QueryTradesReq,
    QueryTradesAck => QueryTradesAck,
    QueryPositionsReq => QueryPositionsReq,
    QueryPositionsAck => QueryPositionsAck,
    QueryHistoryOrdersReq => QueryHistoryOrdersReq,
    QueryHistoryOrdersAck => QueryHistoryOrdersAck,
    QueryHistoryTradesReq => QueryHistoryTradesReq,
    QueryHistoryTradesAck => QueryHistoryTradesAck,
    PlaceOrder => PlaceOrder,
    CancelOrder => CancelOrder,
    OrderReport => OrderReport,
    TradeReport => TradeReport,
    CancelOrderReject => CancelOrderReject,
}

// ---------------------------------------------------------------------------
// Account lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterReq {
    pub user_name: String,
    pub check_code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterAck {
    pub account_id: String,
    pub registered_at: DateTime<Utc>,
    /// Set when the gateway refused the registration.
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginReq {
    pub account_id: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginAck {
    pub account_id: String,
    pub trading_day: NaiveDate,
    pub login_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogoutReq {
    pub account_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInfoQryReq {
    pub account_id: String,
}

/// Reply to [`UserInfoQryReq`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRegisterInfo {
    pub account_id: String,
    pub user_name: String,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccDepositReq {
    pub account_id: String,
    pub currency: String,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccDepositAck {
    pub account_id: String,
    pub currency: String,
    pub amount: f64,
    /// Cash balance after the deposit.
    pub balance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingAccQryReq {
    pub account_id: String,
}

/// Reply to [`TradingAccQryReq`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccMargin {
    pub account_id: String,
    pub currency: String,
    pub balance: f64,
    pub available: f64,
    pub frozen_margin: f64,
    pub market_value: f64,
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryOrdersReq {
    pub account_id: String,
    pub order_id: Option<String>,
    pub instrument: Option<String>,
}

impl QueryOrdersReq {
    pub fn all(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            order_id: None,
            instrument: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryOrdersAck {
    pub account_id: String,
    pub orders: Vec<Order>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryTradesReq {
    pub account_id: String,
    pub order_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryTradesAck {
    pub account_id: String,
    pub trades: Vec<Trade>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPositionsReq {
    pub account_id: String,
    pub instrument: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPositionsAck {
    pub account_id: String,
    pub positions: Vec<Position>,
}

/// Orders closed between `start` and `end`, both inclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryHistoryOrdersReq {
    pub account_id: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryHistoryOrdersAck {
    pub account_id: String,
    pub orders: Vec<Order>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryHistoryTradesReq {
    pub account_id: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryHistoryTradesAck {
    pub account_id: String,
    pub trades: Vec<Trade>,
}

// ---------------------------------------------------------------------------
// Trading and asynchronous reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub account_id: String,
    pub client_order_id: String,
    pub instrument: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    /// Ignored by the gateway for market orders.
    pub price: f64,
    pub quantity: f64,
    pub sent_at: DateTime<Utc>,
}

impl PlaceOrder {
    pub fn limit(
        account_id: impl Into<String>,
        client_order_id: impl Into<String>,
        instrument: impl Into<String>,
        side: OrderSide,
        price: f64,
        quantity: f64,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            client_order_id: client_order_id.into(),
            instrument: instrument.into(),
            side,
            order_type: OrderType::Limit,
            price,
            quantity,
            sent_at: Utc::now(),
        }
    }

    pub fn market(
        account_id: impl Into<String>,
        client_order_id: impl Into<String>,
        instrument: impl Into<String>,
        side: OrderSide,
        quantity: f64,
    ) -> Self {
        Self {
            order_type: OrderType::Market,
            ..Self::limit(account_id, client_order_id, instrument, side, 0.0, quantity)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelOrder {
    pub account_id: String,
    pub order_id: String,
}

/// Order status change pushed by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderReport {
    pub order: Order,
    pub message: Option<String>,
    pub reported_at: DateTime<Utc>,
}

/// Execution pushed by the gateway for each fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeReport {
    pub trade: Trade,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelOrderReject {
    pub account_id: String,
    pub order_id: String,
    pub reason: String,
    pub rejected_at: DateTime<Utc>,
}
