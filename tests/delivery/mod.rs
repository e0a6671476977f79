//! Batch delivery against the embedded server
//!
//! Scenario:
//!
//! 1. Seed companies/11 and orders placed by companies/11 and companies/12.
//! 2. Subscribe to the orders of companies/11, including the company.
//! 3. Drain the subscription with `close_when_no_docs_left`.
//!
//! Expected Result:
//!
//! - only the matching orders are delivered, in store order
//! - the included company travels with the batch
//! - acknowledged progress survives into the next worker

use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use docsub::AckInfo;
use docsub::Error;
use docsub::SubscriberError;
use docsub::SubscriptionBatch;
use docsub::SubscriptionCreationOptions;
use docsub::SubscriptionIncludes;
use docsub::SubscriptionWorkerOptions;
use docsub::WorkerState;
use parking_lot::Mutex;
use serde_json::json;
use serde_json::Value;

use crate::commons::drain_options;
use crate::commons::finished;
use crate::commons::receive;
use crate::commons::run_collecting;
use crate::commons::seed_orders;
use crate::commons::setup;
use crate::commons::Order;

#[tokio::test]
async fn test_filtered_subscription_delivers_matching_orders_with_includes() {
    crate::enable_logger();
    let (server, subscriptions) = setup();
    seed_orders(&server);

    let name = subscriptions
        .create(
            SubscriptionCreationOptions::with_query("from Orders where Company = 'companies/11'")
                .name("acme-orders")
                .includes(SubscriptionIncludes::new().include_documents("Company")),
        )
        .await
        .unwrap();

    let companies = Arc::new(Mutex::new(Vec::<String>::new()));
    let seen = companies.clone();
    let worker = subscriptions.get_subscription_worker::<Order>(drain_options(&name));
    let handle = worker
        .run(move |batch: &SubscriptionBatch<Order>| -> Result<(), docsub::BoxError> {
            for item in batch.items() {
                let company: Option<Value> = batch.included_document(&item.result.company)?;
                let company = company.ok_or("company not included")?;
                seen.lock().push(format!("{}:{}", item.key, company["Name"].as_str().unwrap_or_default()));
            }
            Ok(())
        })
        .unwrap();

    finished(handle).await.unwrap();

    assert_eq!(*companies.lock(), vec!["orders/1:Acme", "orders/3:Acme"]);
    assert_eq!(worker.state(), WorkerState::Closed);

    let state = subscriptions.get_state(&name).await.unwrap();
    assert_eq!(
        state.change_vector_for_next_batch_starting_point,
        server.document("orders/3").map(|d| d.change_vector)
    );
}

#[tokio::test]
async fn test_next_worker_resumes_after_the_checkpoint() {
    let (server, subscriptions) = setup();
    seed_orders(&server);
    let name = subscriptions.create_for_collection("Orders").await.unwrap();

    let first = subscriptions.get_subscription_worker::<Value>(drain_options(&name));
    let (handle, mut rx) = run_collecting(&first);
    assert_eq!(receive(&mut rx, 3).await, vec!["orders/1", "orders/2", "orders/3"]);
    finished(handle).await.unwrap();

    server.store("orders/4", "Orders", json!({ "Company": "companies/11" }));

    let second = subscriptions.get_subscription_worker::<Value>(drain_options(&name));
    let (handle, mut rx) = run_collecting(&second);
    finished(handle).await.unwrap();

    assert_eq!(receive(&mut rx, 1).await, vec!["orders/4"]);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_batches_respect_max_docs_and_notify_acknowledgments() {
    let (server, subscriptions) = setup();
    seed_orders(&server);
    let name = subscriptions.create_for_collection("Orders").await.unwrap();

    let options = SubscriptionWorkerOptions::builder(&name)
        .max_docs_per_batch(1)
        .close_when_no_docs_left(true)
        .build()
        .unwrap();
    let worker = subscriptions.get_subscription_worker::<Value>(options);
    let acks = Arc::new(Mutex::new(Vec::<AckInfo>::new()));
    let recorded = acks.clone();
    worker.add_after_acknowledgment(move |info| recorded.lock().push(info.clone()));

    let (handle, _rx) = run_collecting(&worker);
    finished(handle).await.unwrap();

    let acks = acks.lock();
    assert_eq!(acks.len(), 3);
    assert!(acks.iter().all(|ack| ack.items == 1));
    assert_eq!(
        Some(&acks[2].change_vector),
        server.document("orders/3").map(|d| d.change_vector).as_ref()
    );
}

#[tokio::test]
async fn test_new_documents_wake_an_idle_worker() {
    let (server, subscriptions) = setup();
    let name = subscriptions.create_for_collection("Orders").await.unwrap();

    let worker = subscriptions.get_subscription_worker::<Value>(SubscriptionWorkerOptions::new(&name));
    let (handle, mut rx) = run_collecting(&worker);
    crate::commons::wait_for_state(&worker, WorkerState::Streaming).await;

    server.store("orders/9", "Orders", json!({ "Company": "companies/1" }));
    assert_eq!(receive(&mut rx, 1).await, vec!["orders/9"]);

    worker.close().await;
    finished(handle).await.unwrap();
}

#[tokio::test]
async fn test_ignored_subscriber_errors_still_acknowledge() {
    let (server, subscriptions) = setup();
    seed_orders(&server);
    let name = subscriptions.create_for_collection("Orders").await.unwrap();

    let options = SubscriptionWorkerOptions::builder(&name)
        .max_docs_per_batch(1)
        .ignore_subscriber_errors(true)
        .close_when_no_docs_left(true)
        .build()
        .unwrap();
    let worker = subscriptions.get_subscription_worker::<Value>(options);
    let swallowed = Arc::new(AtomicUsize::new(0));
    let counter = swallowed.clone();
    worker.add_on_unexpected_subscription_error(move |_: &SubscriberError| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let handle = worker
        .run(|batch: &SubscriptionBatch<Value>| {
            if batch.items()[0].key == "orders/2" {
                return Err("cannot ship to companies/12");
            }
            Ok(())
        })
        .unwrap();
    finished(handle).await.unwrap();

    assert_eq!(swallowed.load(Ordering::SeqCst), 1);
    let state = subscriptions.get_state(&name).await.unwrap();
    assert_eq!(
        state.change_vector_for_next_batch_starting_point,
        server.document("orders/3").map(|d| d.change_vector)
    );
}

#[tokio::test]
async fn test_subscriber_error_stops_the_worker_without_acknowledging() {
    let (server, subscriptions) = setup();
    seed_orders(&server);
    let name = subscriptions.create_for_collection("Orders").await.unwrap();

    let worker = subscriptions.get_subscription_worker::<Value>(drain_options(&name));
    let handle = worker
        .run(|_: &SubscriptionBatch<Value>| Err::<(), _>("processing failed"))
        .unwrap();

    let result = finished(handle).await;

    assert!(matches!(result, Err(Error::Subscriber(_))));
    assert_eq!(worker.state(), WorkerState::Faulted);
    let state = subscriptions.get_state(&name).await.unwrap();
    assert!(state.change_vector_for_next_batch_starting_point.is_none());
    assert_eq!(server.released_connections(&name), 1);
}
