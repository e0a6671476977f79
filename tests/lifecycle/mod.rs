//! Worker lifecycle: closing, administrative closes and fatal errors
//!
//! Expected Result:
//!
//! - `close` is idempotent and releases the connection exactly once
//! - resetting progress replays matching documents to a running worker
//! - drop, disable and delete end a run with `Ok(())`
//! - missing subscriptions, unknown databases, denied access and
//!   undecodable documents stop the worker without a reconnect attempt

use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use docsub::DocumentSubscriptions;
use docsub::Error;
use docsub::ProtocolError;
use docsub::SubscriptionBatch;
use docsub::SubscriptionError;
use docsub::SubscriptionOpeningStrategy;
use docsub::SubscriptionStartPosition;
use docsub::SubscriptionUpdateOptions;
use docsub::SubscriptionWorkerOptions;
use docsub::SubscriptionsConfig;
use docsub::WorkerState;
use serde_json::json;
use serde_json::Value;

use crate::commons::finished;
use crate::commons::options;
use crate::commons::receive;
use crate::commons::run_collecting;
use crate::commons::seed_orders;
use crate::commons::setup;
use crate::commons::wait_for_state;
use crate::commons::Order;

#[tokio::test]
async fn test_close_is_idempotent_and_releases_once() {
    let (server, subscriptions) = setup();
    let name = subscriptions.create_for_collection("Orders").await.unwrap();

    let worker = subscriptions.get_subscription_worker::<Value>(SubscriptionWorkerOptions::new(&name));
    let (handle, _rx) = run_collecting(&worker);
    wait_for_state(&worker, WorkerState::Streaming).await;
    assert_eq!(server.active_connections(&name), 1);

    worker.close().await;
    worker.close().await;

    finished(handle).await.unwrap();
    assert_eq!(worker.state(), WorkerState::Closed);
    assert_eq!(server.active_connections(&name), 0);
    assert_eq!(server.released_connections(&name), 1);
}

#[tokio::test]
async fn test_second_run_is_rejected() {
    let (_server, subscriptions) = setup();
    let name = subscriptions.create_for_collection("Orders").await.unwrap();

    let worker = subscriptions.get_subscription_worker::<Value>(SubscriptionWorkerOptions::new(&name));
    let (handle, _rx) = run_collecting(&worker);

    let again = worker.run(|_: &SubscriptionBatch<Value>| Ok::<(), std::convert::Infallible>(()));
    assert!(matches!(
        again,
        Err(Error::Subscription(SubscriptionError::AlreadyRunning { .. }))
    ));

    worker.close().await;
    finished(handle).await.unwrap();
}

#[tokio::test]
async fn test_reset_progress_replays_documents_to_a_running_worker() {
    let (server, subscriptions) = setup();
    seed_orders(&server);
    let name = subscriptions.create_for_collection("Orders").await.unwrap();

    let worker = subscriptions.get_subscription_worker::<Value>(options(&name, SubscriptionOpeningStrategy::OpenIfFree));
    let (handle, mut rx) = run_collecting(&worker);
    assert_eq!(receive(&mut rx, 3).await, vec!["orders/1", "orders/2", "orders/3"]);

    subscriptions
        .update(SubscriptionUpdateOptions::by_name(&name).reset_to(SubscriptionStartPosition::BeginningOfTime))
        .await
        .unwrap();
    assert_eq!(receive(&mut rx, 3).await, vec!["orders/1", "orders/2", "orders/3"]);

    server.store("orders/4", "Orders", json!({ "Company": "companies/11" }));
    assert_eq!(receive(&mut rx, 1).await, vec!["orders/4"]);

    worker.close().await;
    finished(handle).await.unwrap();
    assert_eq!(server.released_connections(&name), 1);
}

#[tokio::test]
async fn test_drop_connection_ends_the_run_cleanly() {
    let (server, subscriptions) = setup();
    let name = subscriptions.create_for_collection("Orders").await.unwrap();

    let worker = subscriptions.get_subscription_worker::<Value>(options(&name, SubscriptionOpeningStrategy::OpenIfFree));
    let (handle, _rx) = run_collecting(&worker);
    wait_for_state(&worker, WorkerState::Streaming).await;

    subscriptions.drop_connection(&name).await.unwrap();

    finished(handle).await.unwrap();
    assert_eq!(worker.state(), WorkerState::Closed);
    // The subscription itself survives
    let state = subscriptions.get_state(&name).await.unwrap();
    assert_eq!(state.connection_status, docsub::ConnectionStatus::Closed);
    assert_eq!(server.released_connections(&name), 1);
}

#[tokio::test]
async fn test_disable_ends_the_run_and_refuses_new_workers() {
    let (server, subscriptions) = setup();
    seed_orders(&server);
    let name = subscriptions.create_for_collection("Orders").await.unwrap();

    let worker = subscriptions.get_subscription_worker::<Value>(options(&name, SubscriptionOpeningStrategy::OpenIfFree));
    let (handle, _rx) = run_collecting(&worker);
    wait_for_state(&worker, WorkerState::Streaming).await;

    subscriptions.disable(&name).await.unwrap();
    finished(handle).await.unwrap();

    let late = subscriptions.get_subscription_worker::<Value>(options(&name, SubscriptionOpeningStrategy::OpenIfFree));
    let (late_handle, mut late_rx) = run_collecting(&late);
    finished(late_handle).await.unwrap();
    assert!(late_rx.try_recv().is_err());

    subscriptions.enable(&name).await.unwrap();
    server.store("orders/4", "Orders", json!({ "Company": "companies/11" }));
    let resumed = subscriptions.get_subscription_worker::<Value>(
        SubscriptionWorkerOptions::builder(&name)
            .close_when_no_docs_left(true)
            .build()
            .unwrap(),
    );
    let (resumed_handle, mut resumed_rx) = run_collecting(&resumed);
    finished(resumed_handle).await.unwrap();
    assert_eq!(resumed_rx.recv().await.as_deref(), Some("orders/4"));
}

#[tokio::test]
async fn test_delete_ends_the_run_cleanly() {
    let (_server, subscriptions) = setup();
    let name = subscriptions.create_for_collection("Orders").await.unwrap();

    let worker = subscriptions.get_subscription_worker::<Value>(options(&name, SubscriptionOpeningStrategy::OpenIfFree));
    let (handle, _rx) = run_collecting(&worker);
    wait_for_state(&worker, WorkerState::Streaming).await;

    subscriptions.delete(&name).await.unwrap();

    finished(handle).await.unwrap();
    assert!(matches!(
        subscriptions.get_state(&name).await,
        Err(Error::Subscription(SubscriptionError::SubscriptionDoesNotExist { .. }))
    ));
}

async fn run_without_retries(
    subscriptions: &DocumentSubscriptions,
    name: &str,
) -> (docsub::Result<()>, usize) {
    let worker = subscriptions.get_subscription_worker::<Value>(options(name, SubscriptionOpeningStrategy::OpenIfFree));
    let retries = Arc::new(AtomicUsize::new(0));
    let counter = retries.clone();
    worker.add_on_connection_retry(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let (handle, _rx) = run_collecting(&worker);
    let result = finished(handle).await;
    assert_eq!(worker.state(), WorkerState::Faulted);
    (result, retries.load(Ordering::SeqCst))
}

#[tokio::test]
async fn test_fatal_errors_are_not_retried() {
    let (server, subscriptions) = setup();
    let name = subscriptions.create_for_collection("Orders").await.unwrap();

    let (missing, retries) = run_without_retries(&subscriptions, "no-such-subscription").await;
    assert!(matches!(
        missing,
        Err(Error::Subscription(SubscriptionError::SubscriptionDoesNotExist { .. }))
    ));
    assert_eq!(retries, 0);

    let elsewhere = DocumentSubscriptions::new(
        "southwind",
        Arc::new(server.clone()),
        Arc::new(server.clone()),
        SubscriptionsConfig::default(),
    );
    let (wrong_db, retries) = run_without_retries(&elsewhere, &name).await;
    assert!(matches!(
        wrong_db,
        Err(Error::Subscription(SubscriptionError::DatabaseDoesNotExist { .. }))
    ));
    assert_eq!(retries, 0);

    server.set_authorized(false);
    let (denied, retries) = run_without_retries(&subscriptions, &name).await;
    assert!(matches!(
        denied,
        Err(Error::Subscription(SubscriptionError::Authorization(_)))
    ));
    assert_eq!(retries, 0);
}

#[tokio::test]
async fn test_undecodable_document_is_fatal() {
    let (server, subscriptions) = setup();
    server.store("orders/1", "Orders", json!({ "Lines": [] }));
    let name = subscriptions.create_for_collection("Orders").await.unwrap();

    let worker = subscriptions.get_subscription_worker::<Order>(options(&name, SubscriptionOpeningStrategy::OpenIfFree));
    let handle = worker
        .run(|_: &SubscriptionBatch<Order>| Ok::<(), std::convert::Infallible>(()))
        .unwrap();

    let result = finished(handle).await;

    assert!(matches!(
        result,
        Err(Error::Protocol(ProtocolError::DocumentDecode { ref key, .. })) if key == "orders/1"
    ));
    assert_eq!(worker.state(), WorkerState::Faulted);
    assert_eq!(server.released_connections(&name), 1);
}
