use std::future::Future;
use std::time::Duration;

use docsub::DocumentSubscriptions;
use docsub::EmbeddedServer;
use docsub::SubscriptionBatch;
use docsub::SubscriptionOpeningStrategy;
use docsub::SubscriptionWorker;
use docsub::SubscriptionWorkerOptions;
use docsub::WorkerState;
use serde::Deserialize;
use serde_json::json;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio::time::timeout;

pub const DATABASE: &str = "northwind";

// Upper bound for anything a scenario waits on
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Deserialize)]
pub struct Order {
    #[serde(rename = "Company")]
    pub company: String,
}

pub fn setup() -> (EmbeddedServer, DocumentSubscriptions) {
    let server = EmbeddedServer::new(DATABASE);
    let subscriptions = DocumentSubscriptions::embedded(&server);
    (server, subscriptions)
}

/// companies/11 plus three orders, two of them placed by companies/11
pub fn seed_orders(server: &EmbeddedServer) {
    server.store("companies/11", "Companies", json!({ "Name": "Acme" }));
    server.store("orders/1", "Orders", json!({ "Company": "companies/11" }));
    server.store("orders/2", "Orders", json!({ "Company": "companies/12" }));
    server.store("orders/3", "Orders", json!({ "Company": "companies/11" }));
}

pub fn options(
    name: &str,
    strategy: SubscriptionOpeningStrategy,
) -> SubscriptionWorkerOptions {
    SubscriptionWorkerOptions::builder(name)
        .strategy(strategy)
        .time_to_wait_before_connection_retry(Duration::from_millis(100))
        .max_erroneous_period(Duration::from_secs(2))
        .build()
        .unwrap()
}

pub fn drain_options(name: &str) -> SubscriptionWorkerOptions {
    SubscriptionWorkerOptions::builder(name)
        .close_when_no_docs_left(true)
        .build()
        .unwrap()
}

/// Start `worker` with a processor forwarding every item key to the receiver
pub fn run_collecting(
    worker: &SubscriptionWorker<Value>
) -> (docsub::SubscriptionRunHandle, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = worker
        .run(move |batch: &SubscriptionBatch<Value>| {
            for item in batch.items() {
                let _ = tx.send(item.key.clone());
            }
            Ok::<(), std::convert::Infallible>(())
        })
        .unwrap();
    (handle, rx)
}

pub async fn wait_for_state<T>(
    worker: &SubscriptionWorker<T>,
    state: WorkerState,
) {
    let mut rx = worker.subscribe_state();
    timeout(WAIT_TIMEOUT, rx.wait_for(|s| *s == state))
        .await
        .expect("worker state not reached")
        .expect("state channel closed");
}

pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    timeout(WAIT_TIMEOUT, async {
        while !condition() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

pub async fn receive(
    rx: &mut mpsc::UnboundedReceiver<String>,
    count: usize,
) -> Vec<String> {
    let mut keys = Vec::with_capacity(count);
    while keys.len() < count {
        let key = timeout(WAIT_TIMEOUT, rx.recv())
            .await
            .expect("no item delivered in time")
            .expect("processor dropped");
        keys.push(key);
    }
    keys
}

pub async fn finished<F: Future>(handle: F) -> F::Output {
    timeout(WAIT_TIMEOUT, handle).await.expect("worker did not stop in time")
}
