use crate::mock::{MockFactory, Step};
use crate::payload::{at, json_record};
use crate::{eventually, registry, within};
use chrono::{Duration as ChronoDuration, Utc};
use kafka_verify::{MatchError, ReaderKey, ReaderMode, TestBundle, TopicSpec};
use rust_decimal::Decimal;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};

#[tokio::test]
async fn test_json_bundle_resolves_and_reader_closes() {
    let factory = MockFactory::new();
    factory.push(
        "orders",
        Step::Records(vec![json_record(
            "orders",
            json!({"tenant": "42"}),
            json!({"EventType": "CREATED", "Status": "OK"}),
        )]),
    );
    let registry = registry(&factory);

    let reader = registry
        .new_test_reader(&TopicSpec::json("orders"), None)
        .unwrap();
    reader.register_test("T1");
    assert_eq!(reader.count_test(), 1);

    let (errors, mut error_rx) = mpsc::unbounded_channel();
    assert_eq!(registry.start_all_engines(errors, None), 1);

    let (tx, rx) = oneshot::channel();
    let bundle = reader
        .test_expected(
            TestBundle::new("T1")
                .expect_key("tenant", "42")
                .expect_logical_key("EventType", "CREATED")
                .expect_value("Status", "OK")
                .on_complete(move |result| {
                    let _ = tx.send(result);
                }),
        )
        .await;

    assert_eq!(within("callback", rx).await.unwrap(), Ok(()));
    assert_eq!(within("bundle wait", bundle.wait()).await, Ok(()));

    eventually("reader closed", || reader.is_closed()).await;
    assert_eq!(reader.count_test(), 0);
    assert!(registry
        .get(&ReaderKey::new("orders", ReaderMode::Test))
        .is_none());
    assert!(registry.is_empty());
    assert_eq!(factory.commits(), 1);
    assert_eq!(factory.closes(), 1);
    assert!(error_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_noise_is_ignored_until_match() {
    let factory = MockFactory::new();
    factory.push(
        "orders",
        Step::Records(vec![
            // other tenant sharing the topic
            json_record(
                "orders",
                json!({"tenant": "7"}),
                json!({"EventType": "CREATED", "Status": "WRONG"}),
            ),
            // right tenant, different event
            json_record(
                "orders",
                json!({"tenant": "42"}),
                json!({"EventType": "DELETED", "Status": "WRONG"}),
            ),
        ]),
    );
    factory.push(
        "orders",
        Step::Records(vec![json_record(
            "orders",
            json!({"tenant": 42}),
            json!({
                "EventType": "CREATED",
                "Payload": "{\"OrderId\":\"A-1\"}",
                "Amount": 1.5,
                "Status": "OK"
            }),
        )]),
    );
    let registry = registry(&factory);
    let reader = registry.new_test_reader(&TopicSpec::json("orders"), None).unwrap();
    reader.register_test("T1");
    let (errors, _error_rx) = mpsc::unbounded_channel();
    registry.start_all_engines(errors, None);

    let bundle = reader
        .test_expected(
            TestBundle::new("T1")
                .expect_key("tenant", "42")
                .expect_logical_key("EventType", "CREATED")
                .expect_logical_key("Payload.OrderId", "A-1")
                .expect_value("Amount", Decimal::new(150, 2))
                .expect_value("Status", " OK "),
        )
        .await;

    assert_eq!(within("bundle", bundle.wait()).await, Ok(()));
    eventually("reader closed", || reader.is_closed()).await;
}

#[tokio::test]
async fn test_value_mismatch_is_reported_through_callback() {
    let factory = MockFactory::new();
    factory.push(
        "customers",
        Step::Records(vec![json_record(
            "customers",
            json!({"tenant": "1"}),
            json!({"EventType": "RENAMED", "Name": "acme"}),
        )]),
    );
    let registry = registry(&factory);
    let reader = registry
        .new_test_reader(&TopicSpec::json("customers"), None)
        .unwrap();
    reader.register_test("rename");
    let (errors, mut error_rx) = mpsc::unbounded_channel();
    registry.start_all_engines(errors, None);

    let bundle = reader
        .test_expected(
            TestBundle::new("rename")
                .expect_key("tenant", "1")
                .expect_logical_key("EventType", "RENAMED")
                .expect_value("Name", "Acme"),
        )
        .await;

    assert_eq!(
        within("bundle", bundle.wait()).await,
        Err(MatchError::StringMismatch {
            key: "Name".to_string(),
            expected: "Acme".to_string(),
            actual: "acme".to_string(),
        })
    );
    // a failed match still resolves the bundle, so the reader closes
    eventually("reader closed", || reader.is_closed()).await;
    assert!(error_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_unregistered_bundle_fails_immediately() {
    let factory = MockFactory::new();
    let registry = registry(&factory);
    let reader = registry.new_test_reader(&TopicSpec::json("orders"), None).unwrap();
    reader.register_test("known");

    let bundle = reader.test_expected(TestBundle::new("typo")).await;
    assert!(bundle.is_completed());
    assert_eq!(
        bundle.wait().await,
        Err(MatchError::UnregisteredTest("typo".to_string()))
    );
    assert_eq!(reader.count_test(), 1);
}

#[tokio::test]
async fn test_preseed_skips_stale_records_and_keeps_current() {
    let factory = MockFactory::new();
    let stale = at(
        json_record(
            "orders",
            json!({"tenant": "42"}),
            json!({"EventType": "CREATED", "Status": "STALE"}),
        ),
        Utc::now() - ChronoDuration::hours(1),
    );
    let current = at(
        json_record(
            "orders",
            json!({"tenant": "42"}),
            json!({"EventType": "CREATED", "Status": "OK"}),
        ),
        Utc::now() + ChronoDuration::seconds(30),
    );
    factory.push("orders", Step::Records(vec![stale]));
    factory.push("orders", Step::Records(vec![current]));

    let registry = registry(&factory);
    let reader = registry.new_test_reader(&TopicSpec::json("orders"), None).unwrap();
    within("pre-seed", reader.pre_seed()).await.unwrap();

    reader.register_test("T1");
    let (errors, _error_rx) = mpsc::unbounded_channel();
    registry.start_all_engines(errors, None);
    let bundle = reader
        .test_expected(
            TestBundle::new("T1")
                .expect_key("tenant", "42")
                .expect_logical_key("EventType", "CREATED")
                .expect_value("Status", "OK"),
        )
        .await;

    assert_eq!(within("bundle", bundle.wait()).await, Ok(()));
}

#[tokio::test]
async fn test_preseed_returns_at_deadline_without_records() {
    let factory = MockFactory::new();
    let registry = registry(&factory);
    let reader = registry.new_test_reader(&TopicSpec::json("quiet"), None).unwrap();
    let started = tokio::time::Instant::now();
    within("pre-seed", reader.pre_seed()).await.unwrap();
    assert!(started.elapsed() >= std::time::Duration::from_millis(300));
}
