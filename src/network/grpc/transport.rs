use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::async_trait;
use tonic::codec::Streaming;
use tracing::debug;
use tracing::info;

use super::convert::close_reason;
use crate::proto;
use crate::proto::server_frame::Frame;
use crate::ChangeVector;
use crate::ClientInner;
use crate::ConnectionRequest;
use crate::NetworkError;
use crate::ProtocolError;
use crate::RawBatch;
use crate::Result;
use crate::ServerMessage;
use crate::SubscriptionConnection;
use crate::SubscriptionError;
use crate::SubscriptionTransport;

/// Outbound frames buffered per connection; only one ack is ever in flight
const OUTBOUND_BUFFER: usize = 4;

/// Opens subscription streams on `docsub.SubscriptionService/Subscribe`
#[derive(Clone)]
pub struct GrpcSubscriptionTransport {
    client_inner: Arc<ArcSwap<ClientInner>>,
}

impl GrpcSubscriptionTransport {
    pub(crate) fn new(client_inner: Arc<ArcSwap<ClientInner>>) -> Self {
        Self { client_inner }
    }
}

#[async_trait]
impl SubscriptionTransport for GrpcSubscriptionTransport {
    async fn connect(
        &self,
        request: ConnectionRequest,
    ) -> Result<Box<dyn SubscriptionConnection>> {
        let mut client = self.client_inner.load().service_client();

        let (outbound, rx) = mpsc::channel(OUTBOUND_BUFFER);
        outbound
            .send(proto::ClientFrame::handshake(&request))
            .await
            .map_err(|_| NetworkError::ConnectionLost("outbound stream closed before handshake".into()))?;

        let mut inbound = client.subscribe(ReceiverStream::new(rx)).await?.into_inner();

        // Under WaitForFree the status only arrives once the slot is granted
        match inbound.message().await? {
            Some(proto::ServerFrame {
                frame: Some(Frame::Status(status)),
            }) => status.into_result(&request)?,
            Some(other) => {
                return Err(ProtocolError::UnexpectedFrame {
                    expected: "ConnectionStatus",
                    actual: frame_name(&other).to_string(),
                }
                .into())
            }
            None => return Err(NetworkError::ConnectionLost("stream closed during handshake".into()).into()),
        }
        info!(subscription = %request.subscription_name, worker_id = %request.worker_id, "subscription stream opened");

        Ok(Box::new(GrpcSubscriptionConnection {
            subscription_name: request.subscription_name,
            outbound,
            inbound,
        }))
    }
}

/// Client end of one subscription stream
///
/// Dropping it ends the outbound stream and cancels the call, which makes
/// the server release the subscription.
struct GrpcSubscriptionConnection {
    subscription_name: String,
    outbound: mpsc::Sender<proto::ClientFrame>,
    inbound: Streaming<proto::ServerFrame>,
}

impl GrpcSubscriptionConnection {
    async fn next_frame(&mut self) -> Result<Frame> {
        loop {
            match self.inbound.message().await? {
                Some(proto::ServerFrame { frame: Some(frame) }) => return Ok(frame),
                Some(proto::ServerFrame { frame: None }) => {
                    debug!(subscription = %self.subscription_name, "empty frame skipped");
                }
                None => return Err(NetworkError::ConnectionLost("subscription stream ended".into()).into()),
            }
        }
    }
}

#[async_trait]
impl SubscriptionConnection for GrpcSubscriptionConnection {
    async fn next_message(&mut self) -> Result<ServerMessage> {
        match self.next_frame().await? {
            Frame::Batch(batch) => Ok(ServerMessage::Batch(RawBatch::try_from(batch)?)),
            Frame::Heartbeat(_) => Ok(ServerMessage::Heartbeat),
            Frame::Closed(closed) => Ok(ServerMessage::Closed(close_reason(closed.reason)?)),
            other => Err(ProtocolError::UnexpectedFrame {
                expected: "Batch",
                actual: frame_name(&proto::ServerFrame { frame: Some(other) }).to_string(),
            }
            .into()),
        }
    }

    async fn acknowledge(
        &mut self,
        change_vector: &ChangeVector,
    ) -> Result<()> {
        self.outbound
            .send(proto::ClientFrame::ack(change_vector))
            .await
            .map_err(|_| NetworkError::ConnectionLost("outbound stream closed".into()))?;

        loop {
            match self.next_frame().await? {
                Frame::AckConfirmed(confirmed) if confirmed.accepted => return Ok(()),
                Frame::AckConfirmed(confirmed) => {
                    return Err(NetworkError::AckRejected {
                        change_vector: confirmed.change_vector,
                        reason: confirmed.reason,
                    }
                    .into())
                }
                Frame::Heartbeat(_) => continue,
                Frame::Closed(closed) => {
                    return Err(SubscriptionError::Closed {
                        name: self.subscription_name.clone(),
                        reason: close_reason(closed.reason)?,
                    }
                    .into())
                }
                other => {
                    return Err(ProtocolError::UnexpectedFrame {
                        expected: "AckConfirmed",
                        actual: frame_name(&proto::ServerFrame { frame: Some(other) }).to_string(),
                    }
                    .into())
                }
            }
        }
    }
}

fn frame_name(frame: &proto::ServerFrame) -> &'static str {
    match &frame.frame {
        Some(Frame::Status(_)) => "ConnectionStatus",
        Some(Frame::Batch(_)) => "Batch",
        Some(Frame::AckConfirmed(_)) => "AckConfirmed",
        Some(Frame::Heartbeat(_)) => "Heartbeat",
        Some(Frame::Closed(_)) => "Closed",
        None => "empty frame",
    }
}
