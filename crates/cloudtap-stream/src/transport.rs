//! Byte-stream transports
//!
//! A [`Connector`] opens one bidirectional byte stream to the remote
//! endpoint. The production connector wraps TCP in rustls; the plain TCP
//! connector serves local relays and test servers.

use crate::error::{StreamError, StreamResult};
use async_trait::async_trait;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

/// Any stream the connection can read from and write to
pub trait ByteStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ByteStream for T {}

/// Boxed byte stream handed out by connectors
pub type BoxedStream = Box<dyn ByteStream>;

/// Opens byte streams to a remote endpoint
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a new stream to `host:port`
    async fn connect(&self, host: &str, port: u16) -> io::Result<BoxedStream>;
}

/// Plain TCP connector
#[derive(Debug, Clone, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, host: &str, port: u16) -> io::Result<BoxedStream> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}

/// TLS connector using rustls with the webpki root store
#[derive(Clone)]
pub struct TlsConnector {
    inner: tokio_rustls::TlsConnector,
}

impl TlsConnector {
    /// Create a connector trusting the bundled webpki roots
    pub fn new() -> StreamResult<Self> {
        let mut root_store = RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        Self::with_roots(root_store)
    }

    /// Create a connector trusting the given roots
    pub fn with_roots(root_store: RootCertStore) -> StreamResult<Self> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| StreamError::Tls(e.to_string()))?
            .with_root_certificates(root_store)
            .with_no_client_auth();

        Ok(Self {
            inner: tokio_rustls::TlsConnector::from(Arc::new(config)),
        })
    }
}

#[async_trait]
impl Connector for TlsConnector {
    async fn connect(&self, host: &str, port: u16) -> io::Result<BoxedStream> {
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let tcp = TcpStream::connect((host, port)).await?;
        tcp.set_nodelay(true)?;

        let tls = self.inner.connect(server_name, tcp).await?;
        debug!("TLS handshake complete for {}", host);

        Ok(Box::new(tls))
    }
}

/// Pick the connector matching the `tls` setting
pub fn default_connector(tls: bool) -> StreamResult<Arc<dyn Connector>> {
    if tls {
        Ok(Arc::new(TlsConnector::new()?))
    } else {
        Ok(Arc::new(TcpConnector))
    }
}
