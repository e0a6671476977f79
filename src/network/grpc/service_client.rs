use tokio_stream::Stream;
use tonic::codec::CompressionEncoding;
use tonic::codec::ProstCodec;
use tonic::codec::Streaming;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::Channel;
use tonic::GrpcMethod;
use tonic::Request;
use tonic::Response;
use tonic::Status;

use crate::proto;
use crate::proto::SERVICE_NAME;

/// Typed client for `docsub.SubscriptionService`
#[derive(Debug, Clone)]
pub(crate) struct SubscriptionServiceClient {
    inner: tonic::client::Grpc<Channel>,
}

impl SubscriptionServiceClient {
    pub(crate) fn new(
        channel: Channel,
        enable_compression: bool,
    ) -> Self {
        let mut inner = tonic::client::Grpc::new(channel);
        if enable_compression {
            inner = inner
                .send_compressed(CompressionEncoding::Gzip)
                .accept_compressed(CompressionEncoding::Gzip);
        }
        Self { inner }
    }

    async fn ready(&mut self) -> Result<(), Status> {
        self.inner
            .ready()
            .await
            .map_err(|e| Status::unavailable(format!("service not ready: {e}")))
    }

    async fn unary<Req, Resp>(
        &mut self,
        method: &'static str,
        path: &'static str,
        message: Req,
    ) -> Result<Response<Resp>, Status>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        self.ready().await?;
        let mut request = Request::new(message);
        request
            .extensions_mut()
            .insert(GrpcMethod::new(SERVICE_NAME, method));
        self.inner
            .unary(request, PathAndQuery::from_static(path), ProstCodec::default())
            .await
    }

    /// Open the bidirectional subscription stream
    pub(crate) async fn subscribe<S>(
        &mut self,
        outbound: S,
    ) -> Result<Response<Streaming<proto::ServerFrame>>, Status>
    where
        S: Stream<Item = proto::ClientFrame> + Send + 'static,
    {
        self.ready().await?;
        let mut request = Request::new(outbound);
        request
            .extensions_mut()
            .insert(GrpcMethod::new(SERVICE_NAME, "Subscribe"));
        self.inner
            .streaming(
                request,
                PathAndQuery::from_static("/docsub.SubscriptionService/Subscribe"),
                ProstCodec::default(),
            )
            .await
    }

    pub(crate) async fn create(
        &mut self,
        request: proto::CreateSubscriptionRequest,
    ) -> Result<Response<proto::SubscriptionNameResponse>, Status> {
        self.unary("Create", "/docsub.SubscriptionService/Create", request)
            .await
    }

    pub(crate) async fn update(
        &mut self,
        request: proto::UpdateSubscriptionRequest,
    ) -> Result<Response<proto::SubscriptionNameResponse>, Status> {
        self.unary("Update", "/docsub.SubscriptionService/Update", request)
            .await
    }

    pub(crate) async fn delete(
        &mut self,
        request: proto::SubscriptionRequest,
    ) -> Result<Response<proto::Empty>, Status> {
        self.unary("Delete", "/docsub.SubscriptionService/Delete", request)
            .await
    }

    pub(crate) async fn enable(
        &mut self,
        request: proto::SubscriptionRequest,
    ) -> Result<Response<proto::Empty>, Status> {
        self.unary("Enable", "/docsub.SubscriptionService/Enable", request)
            .await
    }

    pub(crate) async fn disable(
        &mut self,
        request: proto::SubscriptionRequest,
    ) -> Result<Response<proto::Empty>, Status> {
        self.unary("Disable", "/docsub.SubscriptionService/Disable", request)
            .await
    }

    pub(crate) async fn get_state(
        &mut self,
        request: proto::SubscriptionRequest,
    ) -> Result<Response<proto::SubscriptionStateMessage>, Status> {
        self.unary("GetState", "/docsub.SubscriptionService/GetState", request)
            .await
    }

    pub(crate) async fn get_subscriptions(
        &mut self,
        request: proto::GetSubscriptionsRequest,
    ) -> Result<Response<proto::GetSubscriptionsResponse>, Status> {
        self.unary(
            "GetSubscriptions",
            "/docsub.SubscriptionService/GetSubscriptions",
            request,
        )
        .await
    }

    pub(crate) async fn drop_connection(
        &mut self,
        request: proto::SubscriptionRequest,
    ) -> Result<Response<proto::Empty>, Status> {
        self.unary(
            "DropConnection",
            "/docsub.SubscriptionService/DropConnection",
            request,
        )
        .await
    }
}
