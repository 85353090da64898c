//! Integration tests for combined-stream frame decoding and routing.
//!
//! Feeds exchange-shaped text frames through `InboundMessage` and the
//! router the same way the read loop does.

use klmon_core::{StreamId, Symbol, Timeframe};
use klmon_ws::{DispatchOutcome, InboundMessage, StreamRouter, SubscribeRequest};

const KLINE_FRAME: &str = r#"{
    "stream": "ethusdt@kline_4h",
    "data": {
        "e": "kline", "E": 1700000001000, "s": "ETHUSDT",
        "k": {"t": 1699999200000, "T": 1700013599999, "s": "ETHUSDT", "i": "4h",
              "o": "2050.1", "c": "2061.4", "h": "2070.0", "l": "2041.9",
              "v": "1200.5", "n": 5400, "x": false, "q": "2470000.0",
              "V": "600.1", "Q": "1235000.0", "B": "0"}
    }
}"#;

#[test]
fn test_kline_frame_routes_to_subscriber() {
    let router = StreamRouter::new();
    let stream = StreamId::kline(&Symbol::new("ETHUSDT").unwrap(), Timeframe::H4);
    let mut rx = router.add_subscriber(stream, 4);

    let InboundMessage::Envelope(envelope) = serde_json::from_str(KLINE_FRAME).unwrap() else {
        panic!("Expected envelope");
    };
    let parsed = envelope.stream.parse().unwrap();
    assert_eq!(parsed.symbol.as_str(), "ETHUSDT");
    assert_eq!(parsed.timeframe, Timeframe::H4);

    assert_eq!(
        router.dispatch(envelope.stream.as_str(), envelope.data),
        DispatchOutcome::Delivered
    );
    let data = rx.try_recv().unwrap();
    assert_eq!(data["k"]["c"], "2061.4");
}

#[test]
fn test_ack_and_error_frames() {
    let ack: InboundMessage = serde_json::from_str(r#"{"result":null,"id":7}"#).unwrap();
    assert!(matches!(ack, InboundMessage::Response { result: None, id: 7 }));

    let err: InboundMessage = serde_json::from_str(
        r#"{"error":{"code":2,"msg":"Invalid request: unknown property"},"id":8}"#,
    )
    .unwrap();
    match err {
        InboundMessage::Error { error, id } => {
            assert_eq!(id, Some(8));
            assert_eq!(error["code"], 2);
        }
        other => panic!("Expected error frame, got {other:?}"),
    }
}

#[test]
fn test_request_wire_format() {
    let streams = vec![
        StreamId::kline(&Symbol::new("BTCUSDT").unwrap(), Timeframe::M3),
        StreamId::kline(&Symbol::new("ETHUSDT").unwrap(), Timeframe::M3),
    ];
    let json = serde_json::to_value(SubscribeRequest::subscribe(streams, 42)).unwrap();
    assert_eq!(
        json,
        serde_json::json!({
            "method": "SUBSCRIBE",
            "params": ["btcusdt@kline_3m", "ethusdt@kline_3m"],
            "id": 42
        })
    );
}

#[test]
fn test_unrouted_frame_is_discarded() {
    let router = StreamRouter::new();
    let InboundMessage::Envelope(envelope) = serde_json::from_str(KLINE_FRAME).unwrap() else {
        panic!("Expected envelope");
    };
    assert_eq!(
        router.dispatch(envelope.stream.as_str(), envelope.data),
        DispatchOutcome::Unrouted
    );
    assert_eq!(router.unrouted_count(), 1);
}
