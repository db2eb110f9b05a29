//! In-memory paper exchange.
//!
//! Accounts hold one cash balance. Market orders and marketable limit orders
//! fill in full at the reference price; other limit orders rest until
//! cancelled. There is no order book and no matching between clients.

use chrono::{DateTime, NaiveDate, Utc};
use exchange_protocol::{
    AccDepositAck, AccDepositReq, AccMargin, CancelOrder, CancelOrderReject, CodecError,
    Envelope, LoginAck, LoginReq, LogoutReq, MessageKind, Order, OrderReport, OrderSide,
    OrderStatus, OrderType, Payload, PlaceOrder, Position, QueryHistoryOrdersAck,
    QueryHistoryOrdersReq, QueryHistoryTradesAck, QueryHistoryTradesReq, QueryOrdersAck,
    QueryOrdersReq, QueryPositionsAck, QueryPositionsReq, QueryTradesAck, QueryTradesReq,
    RegisterAck, RegisterReq, Trade, TradeReport, TradingAccQryReq, UserInfoQryReq,
    UserRegisterInfo,
};
use log::{debug, info, warn};
use std::collections::HashMap;
use uuid::Uuid;

struct Account {
    user_name: String,
    check_code: String,
    registered_at: DateTime<Utc>,
    cash: f64,
    /// Cash held by resting buy orders.
    frozen: f64,
    positions: HashMap<String, Position>,
}

pub struct PaperExchange {
    reference_price: f64,
    fee_rate: f64,
    currency: String,
    accounts: HashMap<String, Account>,
    orders: Vec<Order>,
    trades: Vec<Trade>,
}

impl PaperExchange {
    pub fn new(reference_price: f64, fee_rate: f64, currency: impl Into<String>) -> Self {
        Self {
            reference_price,
            fee_rate,
            currency: currency.into(),
            accounts: HashMap::new(),
            orders: Vec::new(),
            trades: Vec::new(),
        }
    }

    /// Handles one request envelope and returns the responses to send back,
    /// in order.
    pub fn handle(&mut self, request: &Envelope) -> Result<Vec<Envelope>, CodecError> {
        let Some(kind) = request.message_kind() else {
            warn!("Ignoring unknown message kind {}", request.raw_kind());
            return Ok(Vec::new());
        };
        debug!("Handling {}", kind);

        match kind {
            MessageKind::RegisterReq => reply(self.register(request.decode_payload()?)),
            MessageKind::LoginReq => reply_opt(self.login(request.decode_payload()?)),
            MessageKind::LogoutReq => {
                let req: LogoutReq = request.decode_payload()?;
                info!("Account {} logged out", req.account_id);
                Ok(Vec::new())
            }
            MessageKind::UserInfoQryReq => reply_opt(self.user_info(request.decode_payload()?)),
            MessageKind::AccDepositReq => reply_opt(self.deposit(request.decode_payload()?)),
            MessageKind::TradingAccQryReq => {
                reply_opt(self.trading_account(request.decode_payload()?))
            }
            MessageKind::QueryOrdersReq => reply(self.query_orders(request.decode_payload()?)),
            MessageKind::QueryTradesReq => reply(self.query_trades(request.decode_payload()?)),
            MessageKind::QueryPositionsReq => {
                reply(self.query_positions(request.decode_payload()?))
            }
            MessageKind::QueryHistoryOrdersReq => {
                reply(self.query_history_orders(request.decode_payload()?))
            }
            MessageKind::QueryHistoryTradesReq => {
                reply(self.query_history_trades(request.decode_payload()?))
            }
            MessageKind::PlaceOrder => self.place_order(request.decode_payload()?),
            MessageKind::CancelOrder => match self.cancel_order(request.decode_payload()?) {
                Ok(report) => reply(report),
                Err(reject) => reply(reject),
            },
            other => {
                warn!("Ignoring {} sent as a request", other);
                Ok(Vec::new())
            }
        }
    }

    fn register(&mut self, req: RegisterReq) -> RegisterAck {
        let now = Utc::now();
        if self.accounts.values().any(|a| a.user_name == req.user_name) {
            return RegisterAck {
                account_id: String::new(),
                registered_at: now,
                error: Some(format!("user {} already registered", req.user_name)),
            };
        }
        let account_id = format!("paper-{:04}", self.accounts.len() + 1);
        info!("Registered {} as {}", req.user_name, account_id);
        self.accounts.insert(
            account_id.clone(),
            Account {
                user_name: req.user_name,
                check_code: req.check_code,
                registered_at: now,
                cash: 0.0,
                frozen: 0.0,
                positions: HashMap::new(),
            },
        );
        RegisterAck {
            account_id,
            registered_at: now,
            error: None,
        }
    }

    fn login(&self, req: LoginReq) -> Option<LoginAck> {
        match self.accounts.get(&req.account_id) {
            Some(account) if account.check_code == req.password => {
                let now = Utc::now();
                info!("Account {} logged in", req.account_id);
                Some(LoginAck {
                    account_id: req.account_id,
                    trading_day: now.date_naive(),
                    login_time: now,
                })
            }
            Some(_) => {
                warn!("Wrong password for {}", req.account_id);
                None
            }
            None => {
                warn!("Login for unknown account {}", req.account_id);
                None
            }
        }
    }

    fn user_info(&self, req: UserInfoQryReq) -> Option<UserRegisterInfo> {
        let account = self.account(&req.account_id)?;
        Some(UserRegisterInfo {
            account_id: req.account_id,
            user_name: account.user_name.clone(),
            registered_at: account.registered_at,
        })
    }

    fn deposit(&mut self, req: AccDepositReq) -> Option<AccDepositAck> {
        if req.currency != self.currency {
            warn!(
                "Deposit in {} refused, only {} is held",
                req.currency, self.currency
            );
            return None;
        }
        let account = self.account_mut(&req.account_id)?;
        account.cash += req.amount;
        Some(AccDepositAck {
            balance: account.cash,
            account_id: req.account_id,
            currency: req.currency,
            amount: req.amount,
        })
    }

    fn trading_account(&self, req: TradingAccQryReq) -> Option<AccMargin> {
        let account = self.account(&req.account_id)?;
        let market_value: f64 = account
            .positions
            .values()
            .map(|p| p.quantity * self.reference_price)
            .sum();
        Some(AccMargin {
            account_id: req.account_id,
            currency: self.currency.clone(),
            balance: account.cash,
            available: account.cash - account.frozen,
            frozen_margin: account.frozen,
            market_value,
        })
    }

    fn query_orders(&self, req: QueryOrdersReq) -> QueryOrdersAck {
        let orders = self
            .orders
            .iter()
            .filter(|o| o.account_id == req.account_id)
            .filter(|o| req.order_id.as_ref().map_or(true, |id| &o.order_id == id))
            .filter(|o| req.instrument.as_ref().map_or(true, |i| &o.instrument == i))
            .cloned()
            .collect();
        QueryOrdersAck {
            account_id: req.account_id,
            orders,
        }
    }

    fn query_trades(&self, req: QueryTradesReq) -> QueryTradesAck {
        let trades = self
            .trades
            .iter()
            .filter(|t| t.account_id == req.account_id)
            .filter(|t| req.order_id.as_ref().map_or(true, |id| &t.order_id == id))
            .cloned()
            .collect();
        QueryTradesAck {
            account_id: req.account_id,
            trades,
        }
    }

    fn query_positions(&self, req: QueryPositionsReq) -> QueryPositionsAck {
        let positions = self
            .account(&req.account_id)
            .map(|account| {
                account
                    .positions
                    .values()
                    .filter(|p| req.instrument.as_ref().map_or(true, |i| &p.instrument == i))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        QueryPositionsAck {
            account_id: req.account_id,
            positions,
        }
    }

    fn query_history_orders(&self, req: QueryHistoryOrdersReq) -> QueryHistoryOrdersAck {
        let orders = self
            .orders
            .iter()
            .filter(|o| o.account_id == req.account_id && !o.status.is_open())
            .filter(|o| within(o.created_at, req.start, req.end))
            .cloned()
            .collect();
        QueryHistoryOrdersAck {
            account_id: req.account_id,
            orders,
        }
    }

    fn query_history_trades(&self, req: QueryHistoryTradesReq) -> QueryHistoryTradesAck {
        let trades = self
            .trades
            .iter()
            .filter(|t| t.account_id == req.account_id)
            .filter(|t| within(t.executed_at, req.start, req.end))
            .cloned()
            .collect();
        QueryHistoryTradesAck {
            account_id: req.account_id,
            trades,
        }
    }

    fn place_order(&mut self, req: PlaceOrder) -> Result<Vec<Envelope>, CodecError> {
        let mut order = Order {
            order_id: Uuid::new_v4().to_string(),
            client_order_id: req.client_order_id,
            account_id: req.account_id,
            instrument: req.instrument,
            side: req.side,
            order_type: req.order_type,
            price: req.price,
            quantity: req.quantity,
            filled_quantity: 0.0,
            status: OrderStatus::New,
            created_at: Utc::now(),
        };

        if let Err(reason) = self.check_order(&order) {
            warn!("Rejecting order {}: {}", order.client_order_id, reason);
            order.status = OrderStatus::Rejected;
            self.orders.push(order.clone());
            return reply(report(order, Some(reason)));
        }

        let marketable = match (order.order_type, order.side) {
            (OrderType::Market, _) => true,
            (OrderType::Limit, OrderSide::Buy) => order.price >= self.reference_price,
            (OrderType::Limit, OrderSide::Sell) => order.price <= self.reference_price,
        };

        if !marketable {
            if order.side == OrderSide::Buy {
                if let Some(account) = self.accounts.get_mut(&order.account_id) {
                    account.frozen += order.price * order.quantity;
                }
            }
            info!(
                "Resting {:?} {} {} @ {}",
                order.side, order.quantity, order.instrument, order.price
            );
            self.orders.push(order.clone());
            return reply(report(order, None));
        }

        let trade = self.fill(&mut order);
        self.orders.push(order.clone());
        Ok(vec![
            Envelope::response(&report(order, None))?,
            Envelope::response(&TradeReport { trade })?,
        ])
    }

    fn check_order(&self, order: &Order) -> Result<(), String> {
        if order.quantity <= 0.0 {
            return Err("quantity must be positive".into());
        }
        if order.order_type == OrderType::Limit && order.price <= 0.0 {
            return Err("limit price must be positive".into());
        }
        let account = self
            .account(&order.account_id)
            .ok_or_else(|| format!("unknown account {}", order.account_id))?;
        match order.side {
            OrderSide::Buy => {
                let price = match order.order_type {
                    OrderType::Market => self.reference_price,
                    OrderType::Limit => order.price,
                };
                let needed = price * order.quantity * (1.0 + self.fee_rate);
                let available = account.cash - account.frozen;
                if needed > available {
                    return Err(format!(
                        "insufficient cash: need {:.2}, available {:.2}",
                        needed, available
                    ));
                }
            }
            OrderSide::Sell => {
                let held = account
                    .positions
                    .get(&order.instrument)
                    .map_or(0.0, |p| p.available);
                if order.quantity > held {
                    return Err(format!(
                        "insufficient position: selling {}, holding {}",
                        order.quantity, held
                    ));
                }
            }
        }
        Ok(())
    }

    /// Fills `order` in full at the reference price and books the trade.
    fn fill(&mut self, order: &mut Order) -> Trade {
        let price = self.reference_price;
        let qty = order.quantity;
        let fee = price * qty * self.fee_rate;

        order.filled_quantity = qty;
        order.status = OrderStatus::Filled;

        if let Some(account) = self.accounts.get_mut(&order.account_id) {
            let position = account
                .positions
                .entry(order.instrument.clone())
                .or_insert_with(|| Position {
                    account_id: order.account_id.clone(),
                    instrument: order.instrument.clone(),
                    quantity: 0.0,
                    available: 0.0,
                    average_price: 0.0,
                });
            match order.side {
                OrderSide::Buy => {
                    let cost = position.average_price * position.quantity + price * qty;
                    position.quantity += qty;
                    position.available += qty;
                    position.average_price = cost / position.quantity;
                    account.cash -= price * qty + fee;
                }
                OrderSide::Sell => {
                    position.quantity -= qty;
                    position.available -= qty;
                    if position.quantity <= 0.0 {
                        position.average_price = 0.0;
                    }
                    account.cash += price * qty - fee;
                }
            }
        }

        let trade = Trade {
            trade_id: Uuid::new_v4().to_string(),
            order_id: order.order_id.clone(),
            account_id: order.account_id.clone(),
            instrument: order.instrument.clone(),
            side: order.side,
            price,
            quantity: qty,
            fee,
            executed_at: Utc::now(),
        };
        info!(
            "Filled {:?} {} {} @ {} (fee {:.2})",
            trade.side, trade.quantity, trade.instrument, trade.price, trade.fee
        );
        self.trades.push(trade.clone());
        trade
    }

    fn cancel_order(&mut self, req: CancelOrder) -> Result<OrderReport, CancelOrderReject> {
        let reject = |reason: &str| CancelOrderReject {
            account_id: req.account_id.clone(),
            order_id: req.order_id.clone(),
            reason: reason.to_string(),
            rejected_at: Utc::now(),
        };

        let Some(order) = self
            .orders
            .iter_mut()
            .find(|o| o.order_id == req.order_id && o.account_id == req.account_id)
        else {
            return Err(reject("unknown order"));
        };
        if !order.status.is_open() {
            return Err(reject("order is no longer open"));
        }

        order.status = OrderStatus::Cancelled;
        let cancelled = order.clone();
        if cancelled.side == OrderSide::Buy {
            if let Some(account) = self.accounts.get_mut(&cancelled.account_id) {
                account.frozen -= cancelled.price * cancelled.remaining_quantity();
            }
        }
        info!("Cancelled {}", cancelled.order_id);
        Ok(report(cancelled, None))
    }

    fn account(&self, account_id: &str) -> Option<&Account> {
        let account = self.accounts.get(account_id);
        if account.is_none() {
            warn!("Unknown account {}", account_id);
        }
        account
    }

    fn account_mut(&mut self, account_id: &str) -> Option<&mut Account> {
        let account = self.accounts.get_mut(account_id);
        if account.is_none() {
            warn!("Unknown account {}", account_id);
        }
        account
    }
}

fn within(at: DateTime<Utc>, start: NaiveDate, end: NaiveDate) -> bool {
    let day = at.date_naive();
    start <= day && day <= end
}

fn report(order: Order, message: Option<String>) -> OrderReport {
    OrderReport {
        order,
        message,
        reported_at: Utc::now(),
    }
}

fn reply<P: Payload>(payload: P) -> Result<Vec<Envelope>, CodecError> {
    Ok(vec![Envelope::response(&payload)?])
}

fn reply_opt<P: Payload>(payload: Option<P>) -> Result<Vec<Envelope>, CodecError> {
    payload.map_or(Ok(Vec::new()), reply)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange_with_account() -> (PaperExchange, String) {
        let mut exchange = PaperExchange::new(100.0, 0.001, "CNY");
        let ack = exchange.register(RegisterReq {
            user_name: "alice".into(),
            check_code: "1234".into(),
        });
        exchange
            .deposit(AccDepositReq {
                account_id: ack.account_id.clone(),
                currency: "CNY".into(),
                amount: 100_000.0,
            })
            .unwrap();
        (exchange, ack.account_id)
    }

    fn send<P: Payload>(exchange: &mut PaperExchange, payload: &P) -> Vec<Envelope> {
        exchange.handle(&Envelope::request(payload).unwrap()).unwrap()
    }

    fn kinds(replies: &[Envelope]) -> Vec<MessageKind> {
        replies.iter().filter_map(Envelope::message_kind).collect()
    }

    #[test]
    fn test_register_and_login() {
        let (mut exchange, account_id) = exchange_with_account();
        assert_eq!(account_id, "paper-0001");

        let duplicate = exchange.register(RegisterReq {
            user_name: "alice".into(),
            check_code: "x".into(),
        });
        assert!(duplicate.error.is_some());

        let replies = send(
            &mut exchange,
            &LoginReq {
                account_id: account_id.clone(),
                password: "1234".into(),
            },
        );
        let ack: LoginAck = replies[0].decode_payload().unwrap();
        assert_eq!(ack.account_id, account_id);

        let wrong = send(
            &mut exchange,
            &LoginReq {
                account_id,
                password: "nope".into(),
            },
        );
        assert!(wrong.is_empty());
    }

    #[test]
    fn test_market_buy_fills_at_reference_price() {
        let (mut exchange, account_id) = exchange_with_account();
        let replies = send(
            &mut exchange,
            &PlaceOrder::market(&account_id, "c-1", "SH600000", OrderSide::Buy, 10.0),
        );

        assert_eq!(
            kinds(&replies),
            vec![MessageKind::OrderReport, MessageKind::TradeReport]
        );
        let report: OrderReport = replies[0].decode_payload().unwrap();
        assert_eq!(report.order.status, OrderStatus::Filled);
        let trade: TradeReport = replies[1].decode_payload().unwrap();
        assert_eq!(trade.trade.price, 100.0);
        assert!((trade.trade.fee - 1.0).abs() < 1e-9);

        let margin = exchange
            .trading_account(TradingAccQryReq {
                account_id: account_id.clone(),
            })
            .unwrap();
        assert!((margin.balance - (100_000.0 - 1_000.0 - 1.0)).abs() < 1e-9);
        assert_eq!(margin.market_value, 1_000.0);

        let positions = exchange.query_positions(QueryPositionsReq {
            account_id,
            instrument: None,
        });
        assert_eq!(positions.positions[0].quantity, 10.0);
    }

    #[test]
    fn test_resting_limit_can_be_cancelled_once() {
        let (mut exchange, account_id) = exchange_with_account();
        let replies = send(
            &mut exchange,
            &PlaceOrder::limit(&account_id, "c-2", "SH600000", OrderSide::Buy, 90.0, 100.0),
        );
        let resting: OrderReport = replies[0].decode_payload().unwrap();
        assert_eq!(resting.order.status, OrderStatus::New);

        let frozen = exchange
            .trading_account(TradingAccQryReq {
                account_id: account_id.clone(),
            })
            .unwrap()
            .frozen_margin;
        assert_eq!(frozen, 9_000.0);

        let cancel = CancelOrder {
            account_id: account_id.clone(),
            order_id: resting.order.order_id.clone(),
        };
        let replies = send(&mut exchange, &cancel);
        let cancelled: OrderReport = replies[0].decode_payload().unwrap();
        assert_eq!(cancelled.order.status, OrderStatus::Cancelled);

        let replies = send(&mut exchange, &cancel);
        assert_eq!(kinds(&replies), vec![MessageKind::CancelOrderReject]);

        let margin = exchange
            .trading_account(TradingAccQryReq { account_id })
            .unwrap();
        assert_eq!(margin.frozen_margin, 0.0);
    }

    #[test]
    fn test_unfunded_orders_are_rejected() {
        let (mut exchange, account_id) = exchange_with_account();
        let replies = send(
            &mut exchange,
            &PlaceOrder::market(&account_id, "c-3", "SH600000", OrderSide::Sell, 1.0),
        );
        let report: OrderReport = replies[0].decode_payload().unwrap();
        assert_eq!(report.order.status, OrderStatus::Rejected);
        assert!(report.message.unwrap().contains("insufficient position"));

        let history = exchange.query_history_orders(QueryHistoryOrdersReq {
            account_id,
            start: Utc::now().date_naive(),
            end: Utc::now().date_naive(),
        });
        assert_eq!(history.orders.len(), 1);
    }
}
