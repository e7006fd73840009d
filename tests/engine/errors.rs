use crate::mock::{MockFactory, Step};
use crate::payload::json_record;
use crate::{eventually, fast_config, registry, registry_with, within};
use kafka_verify::engine::{Error, NoSchemaRegistry, PollError};
use kafka_verify::{ReaderKey, ReaderMode, TestBundle, TopicSpec};
use serde_json::json;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn order_bundle(name: &str) -> TestBundle {
    TestBundle::new(name)
        .expect_key("tenant", "42")
        .expect_logical_key("EventType", "CREATED")
        .expect_value("Status", "OK")
}

fn order_record() -> kafka_verify::Record {
    json_record(
        "orders",
        json!({"tenant": "42"}),
        json!({"EventType": "CREATED", "Status": "OK"}),
    )
}

#[tokio::test]
async fn test_connection_reset_recreates_client_once() {
    let factory = MockFactory::new();
    factory.push(
        "orders",
        Step::Error(PollError::Io(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "read: connection reset by peer",
        ))),
    );
    factory.push("orders", Step::Records(vec![order_record()]));

    let registry = registry(&factory);
    let reader = registry.new_test_reader(&TopicSpec::json("orders"), None).unwrap();
    reader.register_test("T1");
    let (errors, mut error_rx) = mpsc::unbounded_channel();
    registry.start_all_engines(errors, None);

    let bundle = reader.test_expected(order_bundle("T1")).await;
    assert_eq!(within("bundle", bundle.wait()).await, Ok(()));
    eventually("reader closed", || reader.is_closed()).await;

    assert_eq!(factory.creates(), 2);
    let groups = factory.group_ids();
    assert_eq!(groups[0], groups[1]);
    assert!(groups[0].starts_with("kafka-verify-"));
    // the recreated client commits its own starting offset
    assert_eq!(factory.commits(), 1);
    assert!(error_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_authorization_failure_is_fatal() {
    let factory = MockFactory::new();
    factory.push(
        "restricted",
        Step::Error(PollError::Other(
            "fetch: TOPIC_AUTHORIZATION_FAILED: not authorized".to_string(),
        )),
    );

    let registry = registry(&factory);
    let reader = registry
        .new_test_reader(&TopicSpec::json("restricted"), None)
        .unwrap();
    reader.register_test("T1");
    let (errors, mut error_rx) = mpsc::unbounded_channel();
    registry.start_all_engines(errors, None);
    let _bundle = reader.test_expected(order_bundle("T1")).await;

    let report = within("error report", error_rx.recv()).await.unwrap();
    assert_eq!(report.key, ReaderKey::new("restricted", ReaderMode::Test));
    assert!(matches!(report.error, Error::Poll(PollError::Other(_))));

    eventually("reader closed", || reader.is_closed()).await;
    assert!(registry
        .get(&ReaderKey::new("restricted", ReaderMode::Test))
        .is_none());
    assert_eq!(factory.creates(), 1);
    assert!(error_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_connection_refused_is_fatal() {
    let factory = MockFactory::new();
    factory.push(
        "orders",
        Step::Error(PollError::Io(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            "dial tcp 10.0.0.1:9092",
        ))),
    );

    let registry = registry(&factory);
    let reader = registry.new_test_reader(&TopicSpec::json("orders"), None).unwrap();
    reader.register_test("T1");
    let (errors, mut error_rx) = mpsc::unbounded_channel();
    registry.start_all_engines(errors, None);
    let _bundle = reader.test_expected(order_bundle("T1")).await;

    let report = within("error report", error_rx.recv()).await.unwrap();
    assert!(matches!(report.error, Error::Poll(PollError::Io(_))));
    eventually("reader closed", || reader.is_closed()).await;
    assert_eq!(factory.creates(), 1);
}

#[tokio::test]
async fn test_reconnect_cap_turns_into_fatal_error() {
    let factory = MockFactory::new();
    for _ in 0..2 {
        factory.push(
            "orders",
            Step::Error(PollError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "write: broken pipe",
            ))),
        );
    }

    let mut config = fast_config();
    config.max_reconnects = Some(1);
    let registry = registry_with(&factory, Arc::new(NoSchemaRegistry), config);
    let reader = registry.new_test_reader(&TopicSpec::json("orders"), None).unwrap();
    reader.register_test("T1");
    let (errors, mut error_rx) = mpsc::unbounded_channel();
    registry.start_all_engines(errors, None);
    let _bundle = reader.test_expected(order_bundle("T1")).await;

    let report = within("error report", error_rx.recv()).await.unwrap();
    assert!(matches!(report.error, Error::Reconnect { .. }));
    eventually("reader closed", || reader.is_closed()).await;
    assert_eq!(factory.creates(), 2);
}

#[tokio::test]
async fn test_other_errors_and_timeouts_are_retried() {
    let factory = MockFactory::new();
    factory.push(
        "orders",
        Step::Error(PollError::Other("NOT_LEADER_FOR_PARTITION".to_string())),
    );
    factory.push("orders", Step::Error(PollError::DeadlineExceeded));
    factory.push("orders", Step::Error(PollError::Canceled));
    factory.push("orders", Step::Records(vec![order_record()]));

    let registry = registry(&factory);
    let reader = registry.new_test_reader(&TopicSpec::json("orders"), None).unwrap();
    reader.register_test("T1");
    let (errors, mut error_rx) = mpsc::unbounded_channel();
    registry.start_all_engines(errors, None);

    let bundle = reader.test_expected(order_bundle("T1")).await;
    assert_eq!(within("bundle", bundle.wait()).await, Ok(()));
    eventually("reader closed", || reader.is_closed()).await;
    assert_eq!(factory.creates(), 1);
    assert!(error_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_unexpected_client_close_is_reported() {
    let factory = MockFactory::new();
    factory.push("orders", Step::Error(PollError::ClientClosed));

    let registry = registry(&factory);
    let reader = registry.new_test_reader(&TopicSpec::json("orders"), None).unwrap();
    reader.register_test("T1");
    let (errors, mut error_rx) = mpsc::unbounded_channel();
    registry.start_all_engines(errors, None);
    let _bundle = reader.test_expected(order_bundle("T1")).await;

    let report = within("error report", error_rx.recv()).await.unwrap();
    assert!(matches!(report.error, Error::Poll(PollError::ClientClosed)));
    eventually("reader closed", || reader.is_closed()).await;
}

#[tokio::test]
async fn test_requested_close_is_not_reported() {
    let factory = MockFactory::new();
    let registry = registry(&factory);
    let reader = registry.new_test_reader(&TopicSpec::json("orders"), None).unwrap();
    reader.register_test("T1");
    let (errors, mut error_rx) = mpsc::unbounded_channel();
    registry.start_all_engines(errors, None);
    let _bundle = reader.test_expected(order_bundle("T1")).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    within("close", reader.close()).await;
    assert!(reader.is_closed());
    assert_eq!(factory.closes(), 1);
    assert!(error_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_preseed_reconnects_on_transient_error() {
    let factory = MockFactory::new();
    factory.push(
        "orders",
        Step::Error(PollError::Io(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "read: connection reset by peer",
        ))),
    );
    factory.push("orders", Step::Records(vec![order_record()]));

    let registry = registry(&factory);
    let reader = registry.new_test_reader(&TopicSpec::json("orders"), None).unwrap();
    within("pre-seed", reader.pre_seed()).await.unwrap();
    assert_eq!(factory.creates(), 2);
    let groups = factory.group_ids();
    assert_eq!(groups[0], groups[1]);

    // the record caught during pre-seed is matched once the engine runs
    reader.register_test("T1");
    let (errors, mut error_rx) = mpsc::unbounded_channel();
    registry.start_all_engines(errors, None);
    let bundle = reader.test_expected(order_bundle("T1")).await;
    assert_eq!(within("bundle", bundle.wait()).await, Ok(()));
    assert!(error_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_preseed_reconnect_cap_is_an_error() {
    let factory = MockFactory::new();
    factory.push(
        "orders",
        Step::Error(PollError::Io(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "read: connection reset by peer",
        ))),
    );
    let config = kafka_verify::EngineConfig {
        max_reconnects: Some(0),
        ..fast_config()
    };
    let registry = registry_with(&factory, Arc::new(NoSchemaRegistry), config);
    let reader = registry.new_test_reader(&TopicSpec::json("orders"), None).unwrap();
    assert!(matches!(
        within("pre-seed", reader.pre_seed()).await,
        Err(Error::Reconnect { .. })
    ));
    assert_eq!(factory.creates(), 1);
}
