use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use tonic::transport::Certificate;
use tonic::transport::Channel;
use tonic::transport::ClientTlsConfig;
use tonic::transport::Endpoint;
use tonic::transport::Identity;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::ConnectionConfig;
use crate::Error;
use crate::NetworkError;
use crate::Result;
use crate::SubscriptionsConfig;
use crate::TlsConfig;

/// gRPC channels to the configured subscription server endpoints
///
/// Channels are reference-counted and safe to share; each call picks one at
/// random.
#[derive(Clone, Debug)]
pub struct ConnectionPool {
    pub(super) channels: Vec<Channel>,
    pub(super) endpoints: Vec<String>,
}

impl ConnectionPool {
    /// Connect to every endpoint in parallel, keeping the reachable ones
    ///
    /// Fails only when no endpoint could be reached.
    pub(crate) async fn create(
        endpoints: Vec<String>,
        config: &SubscriptionsConfig,
    ) -> Result<Self> {
        let tls = Self::tls_config(&config.tls)?;
        let attempts = endpoints
            .iter()
            .map(|addr| Self::create_channel(addr.clone(), &config.connection, tls.clone()));
        let results = futures::future::join_all(attempts).await;

        let mut channels = Vec::with_capacity(endpoints.len());
        for (addr, result) in endpoints.iter().zip(results) {
            match result {
                Ok(channel) => channels.push(channel),
                Err(e) => warn!(%addr, error = %e, "endpoint unreachable"),
            }
        }
        if channels.is_empty() {
            return Err(NetworkError::ConnectError(format!("no reachable endpoint among {endpoints:?}")).into());
        }
        info!(connected = channels.len(), total = endpoints.len(), "connection pool ready");

        Ok(Self { channels, endpoints })
    }

    pub(super) async fn create_channel(
        addr: String,
        config: &ConnectionConfig,
        tls: Option<ClientTlsConfig>,
    ) -> Result<Channel> {
        debug!("create_channel, addr = {:?}", &addr);
        let mut endpoint = Endpoint::try_from(addr.clone())
            .map_err(|_| NetworkError::InvalidURI(addr.clone()))?
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .tcp_keepalive(Some(config.tcp_keepalive()))
            .http2_keep_alive_interval(config.http2_keep_alive_interval())
            .keep_alive_timeout(config.http2_keep_alive_timeout());
        if let Some(tls) = tls {
            endpoint = endpoint.tls_config(tls)?;
        }
        Ok(endpoint.connect().await?)
    }

    pub(super) fn tls_config(tls: &TlsConfig) -> Result<Option<ClientTlsConfig>> {
        if !tls.enable_tls {
            return Ok(None);
        }
        let ca = read_pem(&tls.certificate_authority_root_path)?;
        let mut config = ClientTlsConfig::new().ca_certificate(Certificate::from_pem(ca));
        if !tls.domain_name.is_empty() {
            config = config.domain_name(tls.domain_name.clone());
        }
        if tls.enable_mtls {
            let cert = read_pem(&tls.client_certificate_path)?;
            let key = read_pem(&tls.client_private_key_path)?;
            config = config.identity(Identity::from_pem(cert, key));
        }
        Ok(Some(config))
    }

    /// A channel picked at random
    pub(crate) fn channel(&self) -> Channel {
        let mut rng = StdRng::from_entropy();
        let i = rng.gen_range(0..self.channels.len());
        self.channels[i].clone()
    }

    pub(crate) fn endpoints(&self) -> &[String] {
        &self.endpoints
    }
}

fn read_pem(path: &str) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| Error::Fatal(format!("failed to read '{path}': {e}")))
}
