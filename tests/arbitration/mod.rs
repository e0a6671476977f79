//! Connection arbitration between workers of one subscription
//!
//! Scenario:
//!
//! 1. A first worker holds the subscription.
//! 2. Further workers connect with each opening strategy.
//!
//! Expected Result:
//!
//! - OpenIfFree keeps retrying on "in use" and gives up after its erroneous period
//! - WaitForFree workers take turns in arrival order
//! - TakeOver displaces the holder, which stops with a `TakenOver` close
//! - Concurrent workers share the subscription and each see new documents

use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use docsub::CloseReason;
use docsub::Error;
use docsub::ErrorKind;
use docsub::SubscriptionError;
use docsub::SubscriptionOpeningStrategy;
use docsub::WorkerState;
use serde_json::json;
use serde_json::Value;
use tokio::time::sleep;

use crate::commons::finished;
use crate::commons::options;
use crate::commons::receive;
use crate::commons::run_collecting;
use crate::commons::seed_orders;
use crate::commons::setup;
use crate::commons::wait_for_state;
use crate::commons::wait_until;

#[tokio::test(start_paused = true)]
async fn test_open_if_free_worker_gets_no_batch_while_subscription_is_held() {
    crate::enable_logger();
    let (server, subscriptions) = setup();
    seed_orders(&server);
    let name = subscriptions.create_for_collection("Orders").await.unwrap();

    let holder = subscriptions.get_subscription_worker::<Value>(options(&name, SubscriptionOpeningStrategy::OpenIfFree));
    let (holder_handle, mut holder_rx) = run_collecting(&holder);
    assert_eq!(receive(&mut holder_rx, 3).await.len(), 3);

    server.store("orders/4", "Orders", json!({ "Company": "companies/11" }));
    let second = subscriptions.get_subscription_worker::<Value>(options(&name, SubscriptionOpeningStrategy::OpenIfFree));
    let retries = Arc::new(AtomicUsize::new(0));
    let counter = retries.clone();
    second.add_on_connection_retry(move |e| {
        if e.kind() == ErrorKind::ConnectionInUse {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });
    let (second_handle, mut second_rx) = run_collecting(&second);

    let result = finished(second_handle).await;

    assert!(matches!(
        result,
        Err(Error::Subscription(SubscriptionError::ErroneousPeriodExceeded { .. }))
    ));
    assert!(retries.load(Ordering::SeqCst) > 1);
    assert!(second_rx.try_recv().is_err());
    assert_eq!(second.state(), WorkerState::Faulted);
    assert_eq!(server.active_connections(&name), 1);

    holder.close().await;
    finished(holder_handle).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_free_workers_are_served_in_arrival_order() {
    let (server, subscriptions) = setup();
    let name = subscriptions.create_for_collection("Orders").await.unwrap();

    let holder = subscriptions.get_subscription_worker::<Value>(options(&name, SubscriptionOpeningStrategy::OpenIfFree));
    let (holder_handle, _holder_rx) = run_collecting(&holder);
    wait_for_state(&holder, WorkerState::Streaming).await;

    let first = subscriptions.get_subscription_worker::<Value>(options(&name, SubscriptionOpeningStrategy::WaitForFree));
    let (first_handle, _first_rx) = run_collecting(&first);
    sleep(Duration::from_millis(50)).await;
    let second = subscriptions.get_subscription_worker::<Value>(options(&name, SubscriptionOpeningStrategy::WaitForFree));
    let (second_handle, mut second_rx) = run_collecting(&second);
    sleep(Duration::from_millis(50)).await;

    assert_eq!(first.state(), WorkerState::Connecting);
    assert_eq!(second.state(), WorkerState::Connecting);

    holder.close().await;
    finished(holder_handle).await.unwrap();
    wait_for_state(&first, WorkerState::Streaming).await;
    assert_eq!(second.state(), WorkerState::Connecting);

    first.close().await;
    finished(first_handle).await.unwrap();
    wait_for_state(&second, WorkerState::Streaming).await;

    server.store("orders/1", "Orders", json!({ "Company": "companies/11" }));
    assert_eq!(receive(&mut second_rx, 1).await, vec!["orders/1"]);

    second.close().await;
    finished(second_handle).await.unwrap();
    assert_eq!(server.released_connections(&name), 3);
}

#[tokio::test]
async fn test_take_over_displaces_the_current_holder() {
    let (server, subscriptions) = setup();
    let name = subscriptions.create_for_collection("Orders").await.unwrap();

    let holder = subscriptions.get_subscription_worker::<Value>(options(&name, SubscriptionOpeningStrategy::OpenIfFree));
    let (holder_handle, _holder_rx) = run_collecting(&holder);
    wait_for_state(&holder, WorkerState::Streaming).await;

    let taker = subscriptions.get_subscription_worker::<Value>(options(&name, SubscriptionOpeningStrategy::TakeOver));
    let (taker_handle, mut taker_rx) = run_collecting(&taker);

    let result = finished(holder_handle).await;
    assert!(matches!(
        result,
        Err(Error::Subscription(SubscriptionError::Closed {
            reason: CloseReason::TakenOver,
            ..
        }))
    ));
    assert_eq!(holder.state(), WorkerState::Closed);

    wait_for_state(&taker, WorkerState::Streaming).await;
    server.store("orders/1", "Orders", json!({ "Company": "companies/11" }));
    assert_eq!(receive(&mut taker_rx, 1).await, vec!["orders/1"]);
    assert_eq!(server.active_connections(&name), 1);

    taker.close().await;
    finished(taker_handle).await.unwrap();
}

#[tokio::test]
async fn test_concurrent_workers_share_the_subscription() {
    let (server, subscriptions) = setup();
    let name = subscriptions.create_for_collection("Orders").await.unwrap();

    let a = subscriptions.get_subscription_worker::<Value>(options(&name, SubscriptionOpeningStrategy::Concurrent));
    let b = subscriptions.get_subscription_worker::<Value>(options(&name, SubscriptionOpeningStrategy::Concurrent));
    let (a_handle, mut a_rx) = run_collecting(&a);
    let (b_handle, mut b_rx) = run_collecting(&b);
    wait_until(|| server.active_connections(&name) == 2).await;

    server.store("orders/1", "Orders", json!({ "Company": "companies/11" }));
    server.store("orders/2", "Orders", json!({ "Company": "companies/12" }));

    let mut a_keys = receive(&mut a_rx, 2).await;
    let mut b_keys = receive(&mut b_rx, 2).await;
    a_keys.sort();
    b_keys.sort();
    assert_eq!(a_keys, vec!["orders/1", "orders/2"]);
    assert_eq!(a_keys, b_keys);

    let state = subscriptions.get_state(&name).await.unwrap();
    assert_eq!(state.connection_status, docsub::ConnectionStatus::Open);

    a.close().await;
    b.close().await;
    finished(a_handle).await.unwrap();
    finished(b_handle).await.unwrap();
    assert_eq!(server.active_connections(&name), 0);
}
