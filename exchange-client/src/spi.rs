//! Callback interface invoked by the receive loop.

use std::sync::Arc;

use exchange_protocol::{
    AccDepositAck, AccMargin, CancelOrderReject, LoginAck, OrderReport, QueryHistoryOrdersAck,
    QueryHistoryTradesAck, QueryOrdersAck, QueryPositionsAck, QueryTradesAck, RegisterAck,
    TradeReport, UserRegisterInfo,
};

/// Receives every decoded response, on the receive loop thread.
///
/// All methods default to doing nothing, so implementors only override the
/// events they care about. Callbacks run inline: a slow callback delays every
/// frame behind it.
pub trait TraderSpi: Send + Sync {
    fn on_register(&self, _ack: &RegisterAck) {}

    fn on_login(&self, _ack: &LoginAck) {}

    fn on_user_info(&self, _info: &UserRegisterInfo) {}

    fn on_deposit(&self, _ack: &AccDepositAck) {}

    fn on_trading_account(&self, _margin: &AccMargin) {}

    fn on_query_orders(&self, _ack: &QueryOrdersAck) {}

    fn on_query_trades(&self, _ack: &QueryTradesAck) {}

    fn on_query_positions(&self, _ack: &QueryPositionsAck) {}

    fn on_query_history_orders(&self, _ack: &QueryHistoryOrdersAck) {}

    fn on_query_history_trades(&self, _ack: &QueryHistoryTradesAck) {}

    /// Order state changed (accepted, filled, cancelled, rejected).
    fn on_order_report(&self, _report: &OrderReport) {}

    fn on_trade_report(&self, _report: &TradeReport) {}

    fn on_cancel_reject(&self, _reject: &CancelOrderReject) {}
}

/// The default callback set: ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSpi;

impl TraderSpi for NoopSpi {}

impl<T: TraderSpi + ?Sized> TraderSpi for Arc<T> {
    fn on_register(&self, ack: &RegisterAck) {
        (**self).on_register(ack)
    }

    fn on_login(&self, ack: &LoginAck) {
        (**self).on_login(ack)
    }

    fn on_user_info(&self, info: &UserRegisterInfo) {
        (**self).on_user_info(info)
    }

    fn on_deposit(&self, ack: &AccDepositAck) {
        (**self).on_deposit(ack)
    }

    fn on_trading_account(&self, margin: &AccMargin) {
        (**self).on_trading_account(margin)
    }

    fn on_query_orders(&self, ack: &QueryOrdersAck) {
        (**self).on_query_orders(ack)
    }

    fn on_query_trades(&self, ack: &QueryTradesAck) {
        (**self).on_query_trades(ack)
    }

    fn on_query_positions(&self, ack: &QueryPositionsAck) {
        (**self).on_query_positions(ack)
    }

    fn on_query_history_orders(&self, ack: &QueryHistoryOrdersAck) {
        (**self).on_query_history_orders(ack)
    }

    fn on_query_history_trades(&self, ack: &QueryHistoryTradesAck) {
        (**self).on_query_history_trades(ack)
    }

    fn on_order_report(&self, report: &OrderReport) {
        (**self).on_order_report(report)
    }

    fn on_trade_report(&self, report: &TradeReport) {
        (**self).on_trade_report(report)
    }

    fn on_cancel_reject(&self, reject: &CancelOrderReject) {
        (**self).on_cancel_reject(reject)
    }
}
