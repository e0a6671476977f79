//! Test doubles: a scripted transport driving the worker state machine and
//! a scripted gRPC subscription service.

mod mock_subscription_service;

pub(crate) use mock_subscription_service::*;

use std::collections::VecDeque;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;
use tonic::async_trait;

use crate::ChangeVector;
use crate::ConnectionRequest;
use crate::Error;
use crate::NetworkError;
use crate::RawBatch;
use crate::RawBatchItem;
use crate::Result;
use crate::ServerMessage;
use crate::SubscriptionConnection;
use crate::SubscriptionTransport;

/// What one `connect` call produces
pub(crate) enum ScriptedSession {
    Fail(Error),
    Connect {
        frames: Vec<Result<ServerMessage>>,
        ack_results: Vec<Result<()>>,
    },
}

impl ScriptedSession {
    pub(crate) fn frames(frames: Vec<ServerMessage>) -> Self {
        ScriptedSession::Connect {
            frames: frames.into_iter().map(Ok).collect(),
            ack_results: Vec::new(),
        }
    }
}

#[derive(Default)]
struct Recorder {
    requests: Mutex<Vec<ConnectionRequest>>,
    acks: Mutex<Vec<ChangeVector>>,
    releases: AtomicUsize,
}

/// Plays back [`ScriptedSession`]s in order
///
/// Once the script is exhausted every `connect` fails with a transient
/// error. A connection whose frames are exhausted stays silent forever.
#[derive(Clone)]
pub(crate) struct ScriptedTransport {
    sessions: Arc<Mutex<VecDeque<ScriptedSession>>>,
    recorder: Arc<Recorder>,
}

impl ScriptedTransport {
    pub(crate) fn new(sessions: Vec<ScriptedSession>) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(sessions.into())),
            recorder: Arc::new(Recorder::default()),
        }
    }

    pub(crate) fn acks(&self) -> Vec<ChangeVector> {
        self.recorder.acks.lock().clone()
    }

    pub(crate) fn connect_attempts(&self) -> usize {
        self.recorder.requests.lock().len()
    }

    pub(crate) fn requests(&self) -> Vec<ConnectionRequest> {
        self.recorder.requests.lock().clone()
    }

    /// Connections dropped so far
    pub(crate) fn releases(&self) -> usize {
        self.recorder.releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SubscriptionTransport for ScriptedTransport {
    async fn connect(
        &self,
        request: ConnectionRequest,
    ) -> Result<Box<dyn SubscriptionConnection>> {
        self.recorder.requests.lock().push(request);
        let next = self.sessions.lock().pop_front();
        match next {
            Some(ScriptedSession::Fail(e)) => Err(e),
            Some(ScriptedSession::Connect { frames, ack_results }) => Ok(Box::new(ScriptedConnection {
                frames: frames.into(),
                ack_results: ack_results.into(),
                recorder: self.recorder.clone(),
            })),
            None => Err(NetworkError::ServiceUnavailable("script exhausted".into()).into()),
        }
    }
}

struct ScriptedConnection {
    frames: VecDeque<Result<ServerMessage>>,
    ack_results: VecDeque<Result<()>>,
    recorder: Arc<Recorder>,
}

#[async_trait]
impl SubscriptionConnection for ScriptedConnection {
    async fn next_message(&mut self) -> Result<ServerMessage> {
        match self.frames.pop_front() {
            Some(frame) => frame,
            None => std::future::pending().await,
        }
    }

    async fn acknowledge(
        &mut self,
        change_vector: &ChangeVector,
    ) -> Result<()> {
        let result = self.ack_results.pop_front().unwrap_or(Ok(()));
        if result.is_ok() {
            self.recorder.acks.lock().push(change_vector.clone());
        }
        result
    }
}

impl Drop for ScriptedConnection {
    fn drop(&mut self) {
        self.recorder.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// Batch of `orders/<etag>` documents with etags taken from `etags`
pub(crate) fn order_batch(etags: &[u64]) -> ServerMessage {
    ServerMessage::Batch(RawBatch {
        items: etags
            .iter()
            .map(|etag| RawBatchItem {
                key: format!("orders/{etag}"),
                change_vector: ChangeVector::from_entry("A", *etag, "db"),
                data: json!({ "Company": format!("companies/{etag}") }),
                metadata: json!({ "@collection": "Orders" }),
            })
            .collect(),
        ..Default::default()
    })
}
