use std::sync::Arc;

use parking_lot::Mutex as PLMutex;
use tickline_broker::{Broker, BrokerServer, Operation, Order, Reactor, Trade};
use tickline_io::line::LineFactory;
use tickline_io::FactoryRegistry;
use tickline_proto::{Decimal, Message, MessageProtocol, MessageType};

fn connect(address: &str) -> Box<dyn tickline_io::Line> {
    let factory = tickline_io::line::inproc::InprocLineFactory::new();
    factory.create_client(address).unwrap()
}

/// A test-double broker adapter that records every submitted/cancelled
/// order and lets the test drive `on_order`/`on_trade` callbacks directly.
struct RecordingBroker {
    account: String,
    reactors: PLMutex<Vec<Arc<dyn Reactor>>>,
    submitted: PLMutex<Vec<Order>>,
    cancelled: PLMutex<Vec<u64>>,
}

impl RecordingBroker {
    fn new(account: &str) -> Arc<Self> {
        Arc::new(Self {
            account: account.to_string(),
            reactors: PLMutex::new(Vec::new()),
            submitted: PLMutex::new(Vec::new()),
            cancelled: PLMutex::new(Vec::new()),
        })
    }

    fn notify_order(&self, order: &Order) {
        for reactor in self.reactors.lock().iter() {
            reactor.on_order(order);
        }
    }

    fn notify_trade(&self, trade: &Trade) {
        for reactor in self.reactors.lock().iter() {
            reactor.on_trade(trade);
        }
    }
}

impl Broker for RecordingBroker {
    // Real adapters accept on their own thread and fire `on_order`
    // asynchronously later from the adapter thread; this double only
    // records the submission here so tests can drive the resulting state
    // transition explicitly and deterministically via
    // `notify_order`/`notify_trade`.
    fn submit_order(&self, order: &Order) {
        self.submitted.lock().push(order.clone());
    }

    fn cancel_order(&self, order: &Order) {
        self.cancelled.lock().push(order.local_id);
    }

    fn register_reactor(&self, reactor: Arc<dyn Reactor>) {
        self.reactors.lock().push(reactor);
    }

    fn unregister_reactor(&self, reactor: &Arc<dyn Reactor>) {
        self.reactors.lock().retain(|r| !Arc::ptr_eq(r, reactor));
    }

    fn order(&self, local_id: u64) -> Option<Order> {
        self.submitted.lock().iter().find(|o| o.local_id == local_id).cloned()
    }

    fn accounts(&self) -> Vec<String> {
        vec![self.account.clone()]
    }

    fn has_account(&self, name: &str) -> bool {
        name == self.account
    }

    fn positions(&self) -> Vec<(String, i64)> {
        Vec::new()
    }
}

fn read_json(line: &dyn tickline_io::Line) -> serde_json::Value {
    let msg = MessageProtocol::read(line).unwrap();
    assert_eq!(msg.message_type(), Some(MessageType::Control));
    let body = std::str::from_utf8(msg.frame(1).unwrap().as_bytes()).unwrap();
    serde_json::from_str(body).unwrap()
}

fn send_json(line: &dyn tickline_io::Line, json: &str) {
    MessageProtocol::send(line, &Message::control(json)).unwrap();
}

#[test]
fn order_before_identity_is_rejected_and_never_reaches_adapter() {
    let address = "inproc://broker-identity-required";
    let registry = FactoryRegistry::with_defaults();
    let server = Arc::new(
        BrokerServer::bind(address, &registry, None, FactoryRegistry::with_defaults()).unwrap(),
    );
    let broker = RecordingBroker::new("A");
    server.register_adapter(broker.clone());
    server.start();

    let line = connect(address);
    send_json(
        &*line,
        r#"{"command":"order","id":1,"account":"A","security":"S","type":"market","operation":"buy","quantity":1}"#,
    );
    let response = read_json(&*line);
    assert_eq!(response["result"], "error");
    assert!(broker.submitted.lock().is_empty());

    server.stop();
}

#[test]
fn duplicate_client_assigned_id_is_rejected_on_second_submission() {
    let address = "inproc://broker-duplicate-id";
    let registry = FactoryRegistry::with_defaults();
    let server = Arc::new(
        BrokerServer::bind(address, &registry, None, FactoryRegistry::with_defaults()).unwrap(),
    );
    let broker = RecordingBroker::new("A");
    server.register_adapter(broker.clone());
    server.start();

    let line = connect(address);
    send_json(&*line, r#"{"command":"get-identity"}"#);
    read_json(&*line);

    let order_json = r#"{"command":"order","id":1,"account":"A","security":"S","type":"market","operation":"buy","quantity":1}"#;
    send_json(&*line, order_json);
    assert_eq!(read_json(&*line)["result"], "success");

    send_json(&*line, order_json);
    assert_eq!(read_json(&*line)["result"], "error");

    assert_eq!(broker.submitted.lock().len(), 1);

    server.stop();
}

#[test]
fn limit_order_submit_trade_partial_then_full_fill() {
    let address = "inproc://broker-fill-sequence";
    let registry = FactoryRegistry::with_defaults();
    let server = Arc::new(
        BrokerServer::bind(address, &registry, None, FactoryRegistry::with_defaults()).unwrap(),
    );
    let broker = RecordingBroker::new("A");
    server.register_adapter(broker.clone());
    server.start();

    let line = connect(address);
    send_json(&*line, r#"{"command":"get-identity"}"#);
    read_json(&*line);

    send_json(
        &*line,
        r#"{"command":"order","id":1,"account":"A","security":"S","type":"limit","operation":"buy","quantity":2,"price":19.73}"#,
    );
    assert_eq!(read_json(&*line)["result"], "success");

    let mut order = broker.submitted.lock()[0].clone();
    order.submit();
    broker.notify_order(&order);

    let submitted_update = read_json(&*line);
    assert_eq!(submitted_update["order"]["new-state"], "submitted");

    let first_trade = Trade {
        order_id: order.local_id,
        price: Decimal::new(19, 73_000_000),
        quantity: 1,
        volume: Decimal::new(19, 73_000_000),
        volume_currency: "BRL".into(),
        operation: Operation::Buy,
        account: "A".into(),
        security: "S".into(),
        timestamp: 1_700_000_000,
        useconds: 0,
        signal_id: None,
    };
    broker.notify_trade(&first_trade);

    let trade_msg_1 = read_json(&*line);
    assert_eq!(trade_msg_1["trade"]["order-id"], 1);
    assert_eq!(trade_msg_1["trade"]["quantity"], 1);

    let update_1 = read_json(&*line);
    assert_eq!(update_1["order"]["id"], 1);
    assert_eq!(update_1["order"]["new-state"], "partially-executed");

    let second_trade = Trade {
        quantity: 1,
        ..first_trade
    };
    broker.notify_trade(&second_trade);

    let trade_msg_2 = read_json(&*line);
    assert_eq!(trade_msg_2["trade"]["order-id"], 1);

    let update_2 = read_json(&*line);
    assert_eq!(update_2["order"]["id"], 1);
    assert_eq!(update_2["order"]["new-state"], "executed");

    server.stop();
}

#[test]
fn cancel_with_no_matching_active_order_is_an_error() {
    let address = "inproc://broker-cancel-unknown";
    let registry = FactoryRegistry::with_defaults();
    let server = Arc::new(
        BrokerServer::bind(address, &registry, None, FactoryRegistry::with_defaults()).unwrap(),
    );
    let broker = RecordingBroker::new("A");
    server.register_adapter(broker.clone());
    server.start();

    let line = connect(address);
    send_json(&*line, r#"{"command":"get-identity"}"#);
    read_json(&*line);

    send_json(&*line, r#"{"command":"cancel-order","id":999,"account":"A"}"#);
    assert_eq!(read_json(&*line)["result"], "error");

    server.stop();
}

#[test]
fn exactly_one_account_matched_adapter_receives_the_order() {
    let address = "inproc://broker-account-routing";
    let registry = FactoryRegistry::with_defaults();
    let server = Arc::new(
        BrokerServer::bind(address, &registry, None, FactoryRegistry::with_defaults()).unwrap(),
    );
    let broker_a = RecordingBroker::new("A");
    let broker_b = RecordingBroker::new("B");
    server.register_adapter(broker_a.clone());
    server.register_adapter(broker_b.clone());
    server.start();

    let line = connect(address);
    send_json(&*line, r#"{"command":"get-identity"}"#);
    read_json(&*line);

    send_json(
        &*line,
        r#"{"command":"order","id":1,"account":"A","security":"S","type":"market","operation":"sell","quantity":1}"#,
    );
    assert_eq!(read_json(&*line)["result"], "success");

    assert_eq!(broker_a.submitted.lock().len(), 1);
    assert!(broker_b.submitted.lock().is_empty());

    server.stop();
}
