//! In-process `docsub.SubscriptionService` playing scripted subscription
//! streams, served over a real tonic server on an ephemeral port.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::time::sleep;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::codec::CompressionEncoding;
use tonic::codec::ProstCodec;
use tonic::codec::Streaming;
use tonic::codegen::http;
use tonic::codegen::Body;
use tonic::codegen::BoxFuture;
use tonic::codegen::Service;
use tonic::codegen::StdError;
use tonic::server::Grpc;
use tonic::server::NamedService;
use tonic::server::StreamingService;
use tonic::server::UnaryService;
use tonic::Status;
use tonic_health::server::health_reporter;
use tonic_health::ServingStatus;
use tracing::debug;

use crate::proto;
use crate::proto::client_frame;
use crate::proto::server_frame::Frame;
use crate::proto::SERVICE_NAME;
use crate::Client;
use crate::CloseReason;

/// One server action on a subscription stream
pub(crate) enum StreamStep {
    Send(proto::ServerFrame),
    /// Wait for the next client frame, which must be an `Ack`
    ExpectAck,
    Delay(Duration),
    /// Keep the stream open until the client goes away
    Hold,
}

#[derive(Default)]
struct MockState {
    streams: Mutex<VecDeque<Vec<StreamStep>>>,
    handshakes: Mutex<Vec<proto::Handshake>>,
    acks: Mutex<Vec<String>>,
    released_streams: AtomicUsize,
    created: Mutex<Vec<proto::CreateSubscriptionRequest>>,
    states: Mutex<Vec<proto::SubscriptionStateMessage>>,
}

/// Scripted subscription service
///
/// Every `Subscribe` call reads the handshake and then plays the next
/// script in order. The response stream ends when the script does, unless
/// the script ends with [`StreamStep::Hold`]. Calls past the last script
/// are refused with `Unavailable`.
#[derive(Clone, Default)]
pub(crate) struct MockSubscriptionService {
    state: Arc<MockState>,
}

impl MockSubscriptionService {
    pub(crate) fn new(streams: Vec<Vec<StreamStep>>) -> Self {
        let service = Self::default();
        *service.state.streams.lock() = streams.into();
        service
    }

    pub(crate) fn with_state(
        self,
        state: proto::SubscriptionStateMessage,
    ) -> Self {
        self.state.states.lock().push(state);
        self
    }

    pub(crate) fn handshakes(&self) -> Vec<proto::Handshake> {
        self.state.handshakes.lock().clone()
    }

    pub(crate) fn acks(&self) -> Vec<String> {
        self.state.acks.lock().clone()
    }

    /// Held streams the client has gone away from
    pub(crate) fn released_streams(&self) -> usize {
        self.state.released_streams.load(Ordering::SeqCst)
    }

    pub(crate) fn created(&self) -> Vec<proto::CreateSubscriptionRequest> {
        self.state.created.lock().clone()
    }

    /// Serve on `127.0.0.1:0` until `shutdown` fires
    ///
    /// The health service reports the subscription service as serving only
    /// when `serving` is set.
    pub(crate) async fn serve(
        self,
        serving: bool,
        shutdown: oneshot::Receiver<()>,
    ) -> SocketAddr {
        let (mut reporter, health_service) = health_reporter();
        let status = if serving {
            ServingStatus::Serving
        } else {
            ServingStatus::NotServing
        };
        reporter.set_service_status(SERVICE_NAME, status).await;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        debug!(%addr, "starting mock subscription service");

        tokio::spawn(async move {
            tonic::transport::Server::builder()
                .add_service(health_service)
                .add_service(self)
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async {
                    shutdown.await.ok();
                })
                .await
                .unwrap();
        });
        addr
    }

    /// Client connected to a freshly served mock
    pub(crate) async fn client(
        self,
        shutdown: oneshot::Receiver<()>,
    ) -> Client {
        let addr = self.serve(true, shutdown).await;
        Client::builder(vec![format!("http://{addr}")])
            .database("northwind")
            .build()
            .await
            .unwrap()
    }
}

impl NamedService for MockSubscriptionService {
    const NAME: &'static str = SERVICE_NAME;
}

fn grpc<T, U>() -> Grpc<ProstCodec<T, U>>
where
    T: prost::Message + Send + 'static,
    U: prost::Message + Default + Send + 'static,
{
    Grpc::new(ProstCodec::default())
        .accept_compressed(CompressionEncoding::Gzip)
        .send_compressed(CompressionEncoding::Gzip)
}

impl<B> Service<http::Request<B>> for MockSubscriptionService
where
    B: Body + Send + 'static,
    B::Error: Into<StdError> + Send + 'static,
{
    type Response = http::Response<tonic::body::BoxBody>;
    type Error = std::convert::Infallible;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(
        &mut self,
        _cx: &mut Context<'_>,
    ) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(
        &mut self,
        req: http::Request<B>,
    ) -> Self::Future {
        let state = self.state.clone();
        match req.uri().path() {
            "/docsub.SubscriptionService/Subscribe" => Box::pin(async move {
                let mut grpc = grpc::<proto::ServerFrame, proto::ClientFrame>();
                Ok(grpc.streaming(SubscribeSvc(state), req).await)
            }),
            "/docsub.SubscriptionService/Create" => Box::pin(async move {
                let mut grpc = grpc::<proto::SubscriptionNameResponse, proto::CreateSubscriptionRequest>();
                Ok(grpc.unary(CreateSvc(state), req).await)
            }),
            "/docsub.SubscriptionService/GetState" => Box::pin(async move {
                let mut grpc = grpc::<proto::SubscriptionStateMessage, proto::SubscriptionRequest>();
                Ok(grpc.unary(GetStateSvc(state), req).await)
            }),
            _ => Box::pin(async move {
                let response = http::Response::builder()
                    .status(200)
                    .header("grpc-status", (tonic::Code::Unimplemented as i32).to_string())
                    .header("content-type", "application/grpc")
                    .body(tonic::body::empty_body())
                    .unwrap();
                Ok(response)
            }),
        }
    }
}

struct SubscribeSvc(Arc<MockState>);

impl StreamingService<proto::ClientFrame> for SubscribeSvc {
    type Response = proto::ServerFrame;
    type ResponseStream = ReceiverStream<Result<proto::ServerFrame, Status>>;
    type Future = BoxFuture<tonic::Response<Self::ResponseStream>, Status>;

    fn call(
        &mut self,
        request: tonic::Request<Streaming<proto::ClientFrame>>,
    ) -> Self::Future {
        let state = self.0.clone();
        Box::pin(async move {
            let steps = state
                .streams
                .lock()
                .pop_front()
                .ok_or_else(|| Status::unavailable("no scripted stream left"))?;
            let (tx, rx) = mpsc::channel(8);
            tokio::spawn(play(state, request.into_inner(), steps, tx));
            Ok(tonic::Response::new(ReceiverStream::new(rx)))
        })
    }
}

async fn play(
    state: Arc<MockState>,
    mut inbound: Streaming<proto::ClientFrame>,
    steps: Vec<StreamStep>,
    tx: mpsc::Sender<Result<proto::ServerFrame, Status>>,
) {
    match inbound.message().await {
        Ok(Some(proto::ClientFrame {
            frame: Some(client_frame::Frame::Handshake(handshake)),
        })) => state.handshakes.lock().push(handshake),
        other => {
            let _ = tx
                .send(Err(Status::invalid_argument(format!("expected a handshake, got {other:?}"))))
                .await;
            return;
        }
    }

    for step in steps {
        match step {
            StreamStep::Send(frame) => {
                if tx.send(Ok(frame)).await.is_err() {
                    return;
                }
            }
            StreamStep::ExpectAck => match inbound.message().await {
                Ok(Some(proto::ClientFrame {
                    frame: Some(client_frame::Frame::Ack(ack)),
                })) => state.acks.lock().push(ack.change_vector),
                other => {
                    debug!(?other, "expected an ack");
                    return;
                }
            },
            StreamStep::Delay(delay) => sleep(delay).await,
            StreamStep::Hold => {
                while let Ok(Some(_)) = inbound.message().await {}
                state.released_streams.fetch_add(1, Ordering::SeqCst);
                return;
            }
        }
    }
}

struct CreateSvc(Arc<MockState>);

impl UnaryService<proto::CreateSubscriptionRequest> for CreateSvc {
    type Response = proto::SubscriptionNameResponse;
    type Future = BoxFuture<tonic::Response<Self::Response>, Status>;

    fn call(
        &mut self,
        request: tonic::Request<proto::CreateSubscriptionRequest>,
    ) -> Self::Future {
        let state = self.0.clone();
        Box::pin(async move {
            let request = request.into_inner();
            let name = request
                .definition
                .as_ref()
                .and_then(|d| d.name.clone())
                .ok_or_else(|| Status::invalid_argument("a name is required"))?;
            state.created.lock().push(request);
            Ok(tonic::Response::new(proto::SubscriptionNameResponse { name }))
        })
    }
}

struct GetStateSvc(Arc<MockState>);

impl UnaryService<proto::SubscriptionRequest> for GetStateSvc {
    type Response = proto::SubscriptionStateMessage;
    type Future = BoxFuture<tonic::Response<Self::Response>, Status>;

    fn call(
        &mut self,
        request: tonic::Request<proto::SubscriptionRequest>,
    ) -> Self::Future {
        let state = self.0.clone();
        Box::pin(async move {
            let name = request.into_inner().name;
            let found = state
                .states
                .lock()
                .iter()
                .find(|s| s.subscription_name == name)
                .cloned();
            found.map(tonic::Response::new).ok_or_else(|| Status::not_found(name))
        })
    }
}

pub(crate) fn status_frame(code: proto::ConnectionStatusCode) -> StreamStep {
    StreamStep::Send(proto::ServerFrame {
        frame: Some(Frame::Status(proto::ConnectionStatus {
            code: code as i32,
            ..Default::default()
        })),
    })
}

/// Batch of `orders/<etag>` documents
pub(crate) fn batch_frame(etags: &[u64]) -> StreamStep {
    let items = etags
        .iter()
        .map(|etag| proto::BatchItem {
            key: format!("orders/{etag}"),
            change_vector: format!("A:{etag}-db"),
            data_json: format!(r#"{{"Company":"companies/{etag}"}}"#),
            metadata_json: String::new(),
        })
        .collect();
    StreamStep::Send(proto::ServerFrame {
        frame: Some(Frame::Batch(proto::Batch {
            items,
            ..Default::default()
        })),
    })
}

pub(crate) fn ack_confirmed(
    change_vector: &str,
    accepted: bool,
) -> StreamStep {
    StreamStep::Send(proto::ServerFrame {
        frame: Some(Frame::AckConfirmed(proto::AckConfirmed {
            change_vector: change_vector.to_string(),
            accepted,
            reason: if accepted { String::new() } else { "stale ack".to_string() },
        })),
    })
}

pub(crate) fn heartbeat_frame() -> StreamStep {
    StreamStep::Send(proto::ServerFrame {
        frame: Some(Frame::Heartbeat(proto::Heartbeat {})),
    })
}

pub(crate) fn closed_frame(reason: CloseReason) -> StreamStep {
    StreamStep::Send(proto::ServerFrame {
        frame: Some(Frame::Closed(proto::Closed {
            reason: proto::CloseReasonCode::from(reason) as i32,
        })),
    })
}
