use anyhow::Result;
use chrono::{NaiveDate, Utc};
use exchange_client::testing::{MockGateway, RecordingSpi};
use exchange_client::{
    AllowAll, Call, ClientConfig, ClientError, Event, LogConfig, LoopState, TraderClient,
};
use exchange_protocol::{
    AccDepositAck, AccDepositReq, AccMargin, Envelope, LoginAck, LoginReq, MessageClass,
    MessageKind, Order, OrderReport, OrderSide, OrderStatus, OrderType, PlaceOrder,
    QueryHistoryOrdersAck, QueryHistoryOrdersReq, QueryHistoryTradesAck, QueryHistoryTradesReq,
    QueryOrdersAck, QueryOrdersReq, QueryPositionsAck, QueryPositionsReq, QueryTradesAck,
    QueryTradesReq, RegisterAck, RegisterReq, Trade, TradeReport, TradingAccQryReq,
    UserInfoQryReq, UserRegisterInfo,
};
use log::LevelFilter;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(3);

fn trading_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 3).unwrap()
}

fn order(account_id: &str, client_order_id: &str) -> Order {
    Order {
        order_id: format!("o-{client_order_id}"),
        client_order_id: client_order_id.into(),
        account_id: account_id.into(),
        instrument: "SH600000".into(),
        side: OrderSide::Buy,
        order_type: OrderType::Limit,
        price: 10.0,
        quantity: 100.0,
        filled_quantity: 100.0,
        status: OrderStatus::Filled,
        created_at: Utc::now(),
    }
}

/// Answers every query the way a well-behaved gateway would.
fn answer(request: &Envelope) -> Vec<Envelope> {
    let reply = match request.message_kind() {
        Some(MessageKind::RegisterReq) => {
            let req: RegisterReq = request.decode_payload().unwrap();
            Envelope::response(&RegisterAck {
                account_id: format!("acc-{}", req.user_name),
                registered_at: Utc::now(),
                error: None,
            })
        }
        Some(MessageKind::LoginReq) => {
            let req: LoginReq = request.decode_payload().unwrap();
            Envelope::response(&LoginAck {
                account_id: req.account_id,
                trading_day: trading_day(),
                login_time: Utc::now(),
            })
        }
        Some(MessageKind::UserInfoQryReq) => {
            let req: UserInfoQryReq = request.decode_payload().unwrap();
            Envelope::response(&UserRegisterInfo {
                account_id: req.account_id,
                user_name: "alice".into(),
                registered_at: Utc::now(),
            })
        }
        Some(MessageKind::AccDepositReq) => {
            let req: AccDepositReq = request.decode_payload().unwrap();
            Envelope::response(&AccDepositAck {
                account_id: req.account_id,
                currency: req.currency,
                amount: req.amount,
                balance: req.amount,
            })
        }
        Some(MessageKind::TradingAccQryReq) => {
            let req: TradingAccQryReq = request.decode_payload().unwrap();
            Envelope::response(&AccMargin {
                account_id: req.account_id,
                currency: "CNY".into(),
                balance: 1_000.0,
                available: 900.0,
                frozen_margin: 100.0,
                market_value: 0.0,
            })
        }
        Some(MessageKind::QueryOrdersReq) => {
            let req: QueryOrdersReq = request.decode_payload().unwrap();
            Envelope::response(&QueryOrdersAck {
                orders: vec![order(&req.account_id, "c-1")],
                account_id: req.account_id,
            })
        }
        Some(MessageKind::QueryTradesReq) => {
            let req: QueryTradesReq = request.decode_payload().unwrap();
            Envelope::response(&QueryTradesAck {
                account_id: req.account_id,
                trades: vec![],
            })
        }
        Some(MessageKind::QueryPositionsReq) => {
            let req: QueryPositionsReq = request.decode_payload().unwrap();
            Envelope::response(&QueryPositionsAck {
                account_id: req.account_id,
                positions: vec![],
            })
        }
        Some(MessageKind::QueryHistoryOrdersReq) => {
            let req: QueryHistoryOrdersReq = request.decode_payload().unwrap();
            Envelope::response(&QueryHistoryOrdersAck {
                account_id: req.account_id,
                orders: vec![],
            })
        }
        Some(MessageKind::QueryHistoryTradesReq) => {
            let req: QueryHistoryTradesReq = request.decode_payload().unwrap();
            Envelope::response(&QueryHistoryTradesAck {
                account_id: req.account_id,
                trades: vec![],
            })
        }
        _ => return vec![],
    };
    vec![reply.unwrap()]
}

// Connect to a mock gateway that answers the login straight away, then check
// the acknowledgement comes back unchanged and flips the session state.
#[test]
fn test_sync_login_against_mock_gateway() -> Result<()> {
    let gateway = MockGateway::start(answer)?;
    let spi = Arc::new(RecordingSpi::default());
    let client = TraderClient::builder()
        .shared_spi(spi.clone())
        .connect(gateway.host_port())?;

    assert_eq!(client.server_address(), gateway.endpoint());
    assert!(!client.is_logged_in());

    let ack = client.login("acc-1", "secret", Call::Sync(WAIT))?;
    let ack = ack.expect("login acknowledgement");

    assert_eq!(ack.account_id, "acc-1");
    assert_eq!(ack.trading_day, trading_day());
    assert!(client.is_logged_in());
    assert_eq!(client.sender_identity().as_deref(), Some("acc-1"));
    assert_eq!(spi.names(), vec!["Login"]);

    client.close()?;
    Ok(())
}

// Every acknowledgement kind reaches its own callback exactly once.
#[test]
fn test_each_ack_fires_its_callback_once() -> Result<()> {
    let gateway = MockGateway::start(answer)?;
    let spi = Arc::new(RecordingSpi::default());
    let client = TraderClient::builder()
        .shared_spi(spi.clone())
        .policy(AllowAll)
        .connect(gateway.host_port())?;

    client.register("alice", "0000", Call::Async)?;
    client.login("acc-1", "pw", Call::Async)?;
    client.user_info("acc-1", Call::Async)?;
    client.deposit("acc-1", "CNY", 500.0, Call::Async)?;
    client.trading_account("acc-1", Call::Async)?;
    client.query_orders(&QueryOrdersReq::all("acc-1"), Call::Async)?;
    client.query_trades(
        &QueryTradesReq {
            account_id: "acc-1".into(),
            order_id: None,
        },
        Call::Async,
    )?;
    client.query_positions(
        &QueryPositionsReq {
            account_id: "acc-1".into(),
            instrument: None,
        },
        Call::Async,
    )?;
    client.query_history_orders(
        &QueryHistoryOrdersReq {
            account_id: "acc-1".into(),
            start: trading_day(),
            end: trading_day(),
        },
        Call::Async,
    )?;
    client.query_history_trades(
        &QueryHistoryTradesReq {
            account_id: "acc-1".into(),
            start: trading_day(),
            end: trading_day(),
        },
        Call::Async,
    )?;

    assert!(spi.wait_for(10, WAIT));
    thread::sleep(Duration::from_millis(100));

    let mut names = spi.names();
    names.sort_unstable();
    assert_eq!(
        names,
        vec![
            "AccountDeposit",
            "Login",
            "QueryHistoryOrders",
            "QueryHistoryTrades",
            "QueryOrders",
            "QueryPositions",
            "QueryTrades",
            "Register",
            "TradingAccountQuery",
            "UserInfoQuery",
        ]
    );

    let deposit = spi
        .events()
        .into_iter()
        .find_map(|event| match event {
            Event::Deposit(ack) => Some(ack),
            _ => None,
        })
        .expect("deposit ack");
    assert_eq!(deposit.amount, 500.0);

    client.close()?;
    Ok(())
}

#[test]
fn test_sync_call_without_reply_returns_none() -> Result<()> {
    let gateway = MockGateway::start(|_| vec![])?;
    let client = TraderClient::builder()
        .policy(AllowAll)
        .connect(gateway.host_port())?;

    let reply = client.trading_account("acc-1", Call::Sync(Duration::from_millis(200)))?;
    assert!(reply.is_none());
    assert!(gateway.wait_for_requests(1, WAIT));

    client.close()?;
    Ok(())
}

// Reports arrive with no synchronous waiter: only the callbacks see them.
#[test]
fn test_order_report_without_waiter_only_reaches_callbacks() -> Result<()> {
    let gateway = MockGateway::start(|request| match request.message_kind() {
        Some(MessageKind::PlaceOrder) => {
            let placed: PlaceOrder = request.decode_payload().unwrap();
            let filled = order(&placed.account_id, &placed.client_order_id);
            vec![
                Envelope::response(&OrderReport {
                    order: filled.clone(),
                    message: None,
                    reported_at: Utc::now(),
                })
                .unwrap(),
                Envelope::response(&TradeReport {
                    trade: Trade {
                        trade_id: "t-1".into(),
                        order_id: filled.order_id,
                        account_id: filled.account_id,
                        instrument: filled.instrument,
                        side: filled.side,
                        price: filled.price,
                        quantity: filled.quantity,
                        fee: 0.0,
                        executed_at: Utc::now(),
                    },
                })
                .unwrap(),
            ]
        }
        _ => answer(request),
    })?;
    let spi = Arc::new(RecordingSpi::default());
    let client = TraderClient::builder()
        .shared_spi(spi.clone())
        .connect(gateway.host_port())?;

    client.login("acc-1", "pw", Call::Sync(WAIT))?;
    client.place_order(&PlaceOrder::limit(
        "acc-1",
        "c-42",
        "SH600000",
        OrderSide::Buy,
        10.0,
        100.0,
    ))?;

    assert!(spi.wait_for(3, WAIT));
    assert_eq!(spi.names(), vec!["Login", "OrderReport", "TradeReport"]);
    match &spi.events()[1] {
        Event::OrderReport(report) => assert_eq!(report.order.client_order_id, "c-42"),
        other => panic!("unexpected event {other:?}"),
    }

    client.close()?;
    Ok(())
}

// Junk ahead of a valid frame must not stop the receive loop.
#[test]
fn test_unknown_and_malformed_frames_are_skipped() -> Result<()> {
    let gateway = MockGateway::start(|request| {
        let mut replies = vec![
            Envelope::raw(MessageClass::Response as u32, 999, vec![1, 2, 3]),
            Envelope::new(MessageClass::Response, MessageKind::QueryOrdersAck, vec![0]),
            Envelope::raw(MessageClass::Request as u32, MessageKind::LoginReq.code(), vec![]),
        ];
        replies.extend(answer(request));
        replies
    })?;
    let spi = Arc::new(RecordingSpi::default());
    let client = TraderClient::builder()
        .shared_spi(spi.clone())
        .policy(AllowAll)
        .connect(gateway.host_port())?;

    let ack = client.query_orders(&QueryOrdersReq::all("acc-1"), Call::Sync(WAIT))?;
    assert_eq!(ack.map(|ack| ack.orders.len()), Some(1));
    assert_eq!(spi.names(), vec!["QueryOrders"]);

    client.close()?;
    Ok(())
}

#[test]
fn test_close_twice_is_harmless() -> Result<()> {
    let gateway = MockGateway::start(answer)?;
    let client = TraderClient::connect(gateway.host_port())?;

    client.close()?;
    assert!(client.wait_closed(WAIT));
    assert_eq!(client.loop_state(), LoopState::Stopped);

    client.close()?;
    assert!(client.is_closed());
    assert_eq!(client.loop_state(), LoopState::Stopped);
    assert!(matches!(
        client.login("acc-1", "pw", Call::Async),
        Err(ClientError::Closed)
    ));
    Ok(())
}

// Correlation is by event name: when two calls of the same operation are in
// flight, the earlier caller's slot is replaced by the later one, so the
// earlier caller never sees its answer.
#[test]
fn test_concurrent_same_operation_calls_share_one_slot() -> Result<()> {
    let pending: Arc<Mutex<Vec<Envelope>>> = Arc::new(Mutex::new(Vec::new()));
    let gateway = {
        let pending = pending.clone();
        MockGateway::start(move |request| {
            let mut pending = pending.lock().unwrap();
            pending.push(request.clone());
            if pending.len() < 2 {
                return vec![];
            }
            // answer the later request first
            pending.drain(..).rev().flat_map(|req| answer(&req)).collect()
        })?
    };
    let client = Arc::new(
        TraderClient::builder()
            .policy(AllowAll)
            .connect(gateway.host_port())?,
    );

    let first = {
        let client = client.clone();
        thread::spawn(move || {
            client.query_orders(
                &QueryOrdersReq::all("acc-first"),
                Call::Sync(Duration::from_millis(800)),
            )
        })
    };
    assert!(gateway.wait_for_requests(1, WAIT));
    thread::sleep(Duration::from_millis(100));

    let second = client.query_orders(&QueryOrdersReq::all("acc-second"), Call::Sync(WAIT))?;
    let first = first.join().unwrap()?;

    assert_eq!(
        second.map(|ack| ack.account_id),
        Some("acc-second".to_string())
    );
    assert!(first.is_none());

    client.close()?;
    Ok(())
}

#[test]
fn test_bad_addresses_are_reported() {
    assert!(matches!(
        TraderClient::connect("http://127.0.0.1:80"),
        Err(ClientError::InvalidAddress(_))
    ));
    assert!(matches!(
        TraderClient::connect(""),
        Err(ClientError::InvalidAddress(_))
    ));
    assert!(matches!(
        TraderClient::connect("tcp://127.0.0.1"),
        Err(ClientError::Connection { .. })
    ));
}

#[test]
fn test_connect_with_config_writes_private_log() -> Result<()> {
    let gateway = MockGateway::start(answer)?;
    let dir = tempfile::tempdir()?;
    let log_path = dir.path().join("client.log");
    let config = ClientConfig::new(gateway.host_port())
        .with_log(LogConfig::file(&log_path, LevelFilter::Debug))
        .with_sync_timeout(Duration::from_millis(1500));

    let client = TraderClient::builder().connect_config(&config)?;
    assert_eq!(client.sync_timeout(), Duration::from_millis(1500));

    client.login("acc-1", "pw", Call::SyncDefault)?;
    client.close()?;

    let contents = std::fs::read_to_string(&log_path)?;
    assert!(contents.contains("Connected to"));
    assert!(contents.contains("Logged in as acc-1"));
    assert!(contents.contains(&client.client_ref().to_string()));
    Ok(())
}
