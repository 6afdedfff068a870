use std::sync::Arc;
use std::time::Duration;

use tickline_io::line::LineFactory;
use tickline_io::FactoryRegistry;
use tickline_proto::{Decimal, Message, MessageProtocol, MessageType, Tick};
use tickline_quotesource::QuoteSourceServer;

fn connect(address: &str) -> Box<dyn tickline_io::Line> {
    let factory = tickline_io::line::inproc::InprocLineFactory::new();
    factory.create_client(address).unwrap()
}

#[test]
fn capabilities_handshake_returns_node_type_and_protocol_version() {
    let address = "inproc://qs-capabilities";
    let registry = FactoryRegistry::with_defaults();
    let server = Arc::new(QuoteSourceServer::bind(address, &registry).unwrap());
    server.start();

    let line = connect(address);
    MessageProtocol::send(
        line.as_ref(),
        &Message::control(r#"{"command":"request-capabilities"}"#),
    )
    .unwrap();
    let response = MessageProtocol::read(line.as_ref()).unwrap();
    assert_eq!(response.message_type(), Some(MessageType::Control));
    let body = std::str::from_utf8(response.frame(1).unwrap().as_bytes()).unwrap();
    let json: serde_json::Value = serde_json::from_str(body).unwrap();
    assert_eq!(json["node-type"], "quotesource");
    assert_eq!(json["protocol-version"], 2);

    server.stop();
}

#[test]
fn wildcard_subscription_receives_published_tick_byte_for_byte() {
    let address = "inproc://qs-wildcard";
    let registry = FactoryRegistry::with_defaults();
    let server = Arc::new(QuoteSourceServer::bind(address, &registry).unwrap());
    server.start();

    let line = connect(address);
    MessageProtocol::send(
        line.as_ref(),
        &Message::control(r#"{"command":"start-stream","tickers":["t:*"]}"#),
    )
    .unwrap();
    let ack = MessageProtocol::read(line.as_ref()).unwrap();
    let body = std::str::from_utf8(ack.frame(1).unwrap().as_bytes()).unwrap();
    assert!(body.contains("success"));

    // Give the session thread a moment to install the filter before
    // publishing, since the subscribe ack races the filter assignment.
    std::thread::sleep(Duration::from_millis(50));

    let tick = Tick::price(1_700_000_000, 0, Decimal::new(42, 0), 10);
    server.publish("FOO", tick);

    let data = MessageProtocol::read(line.as_ref()).unwrap();
    assert_eq!(data.message_type(), Some(MessageType::Data));
    assert_eq!(data.frame(1).unwrap().as_bytes(), b"FOO");
    assert_eq!(Tick::decode(data.frame(2).unwrap().as_bytes()).unwrap(), tick);

    server.stop();
}

#[test]
fn pull_mode_delivers_at_most_one_tick_per_credit() {
    let address = "inproc://qs-pull";
    let registry = FactoryRegistry::with_defaults();
    let server = Arc::new(QuoteSourceServer::bind(address, &registry).unwrap());
    server.start();

    let line = connect(address);
    MessageProtocol::send(
        line.as_ref(),
        &Message::control(
            r#"{"command":"start-stream","tickers":["t:*"],"manual-mode":true}"#,
        ),
    )
    .unwrap();
    MessageProtocol::read(line.as_ref()).unwrap();
    std::thread::sleep(Duration::from_millis(50));

    for i in 0..5 {
        let tick = Tick::price(1_700_000_000 + i, 0, Decimal::new(i as i64, 0), 1);
        server.publish("FOO", tick);
    }

    // No credit has been granted yet: set a short receive timeout and
    // confirm no data message arrives.
    line.set_option(tickline_io::LineOption::ReceiveTimeout, Duration::from_millis(200))
        .unwrap();
    let mut buf = [0u8; 1];
    let starved = line.read(&mut buf);
    assert!(matches!(starved, Ok(0)) || starved.is_err());

    line.set_option(tickline_io::LineOption::ReceiveTimeout, Duration::from_secs(2))
        .unwrap();
    MessageProtocol::send(line.as_ref(), &Message::service(2)).unwrap();
    let delivered = MessageProtocol::read(line.as_ref()).unwrap();
    assert_eq!(delivered.message_type(), Some(MessageType::Data));

    server.stop();
}
