//! Transports for monitor sessions and node streams.
//!
//! Two seams keep the connector independent of sockets:
//!
//! - [`MonitorTransport`] opens a short-lived [`MonitorSession`] to a monitor and exchanges RESP
//!   commands over it.
//! - [`StreamFactory`] opens the final byte stream to the resolved node.
//!
//! [`RespTransport`] and [`TcpStreamFactory`] are the TCP implementations,
//! both optionally wrapped in TLS through `tokio-rustls`.

use std::{future::Future, io, net::SocketAddr, sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::BytesMut;
use rustls::{
    ClientConfig, RootCertStore,
    pki_types::{CertificateDer, ServerName},
};
use snafu::ResultExt;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
};
use tokio_rustls::TlsConnector;

use crate::{
    config::{CertificateData, Credentials, TlsConfig},
    endpoint::{AddressFamily, MonitorEndpoint, NodeAddress},
    error::{
        ConfigSnafu, ErrorReplySnafu, IoSnafu, ProtocolSnafu, Result, SentinelError, TimeoutSnafu,
        TlsSnafu,
    },
    resp::{self, Value},
};

/// A bidirectional byte stream usable as a connection.
pub trait DuplexStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> DuplexStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Type-erased connection stream, plain or TLS.
pub type BoxedStream = Box<dyn DuplexStream>;

/// Opens byte streams to resolved nodes.
#[async_trait]
pub trait StreamFactory: Send + Sync {
    /// Connects to `address`.
    async fn open(&self, address: &NodeAddress) -> Result<BoxedStream>;
}

/// Opens query sessions to monitors.
#[async_trait]
pub trait MonitorTransport: Send + Sync {
    /// Connects and authenticates to a monitor.
    async fn open(&self, endpoint: &MonitorEndpoint) -> Result<Box<dyn MonitorSession>>;
}

/// An open conversation with one monitor.
///
/// Dropping a session closes its socket; [`close`](Self::close) additionally
/// performs an orderly shutdown.
#[async_trait]
pub trait MonitorSession: Send {
    /// Sends one command and waits for its reply.
    ///
    /// Error replies are returned as
    /// [`SentinelError::ErrorReply`](crate::SentinelError::ErrorReply).
    async fn query(&mut self, args: &[&str]) -> Result<Value>;

    /// Waits for the next value pushed by the monitor, such as a pub/sub message.
    async fn receive(&mut self) -> Result<Value>;

    /// Shuts the session down.
    async fn close(self: Box<Self>);
}

/// TCP stream factory with optional TLS.
#[derive(Clone)]
pub struct TcpStreamFactory {
    connect_timeout: Duration,
    tls: Option<TlsSettings>,
}

#[derive(Clone)]
struct TlsSettings {
    connector: TlsConnector,
    domain_name: Option<String>,
}

impl TcpStreamFactory {
    /// Creates a factory; TLS material is parsed here, once.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the TLS certificates or key cannot be
    /// parsed.
    pub fn new(connect_timeout: Duration, tls: Option<&TlsConfig>) -> Result<Self> {
        let tls = tls
            .map(|tls| {
                Ok::<_, SentinelError>(TlsSettings {
                    connector: TlsConnector::from(Arc::new(build_client_config(tls)?)),
                    domain_name: tls.domain_name().map(str::to_owned),
                })
            })
            .transpose()?;
        Ok(Self { connect_timeout, tls })
    }

    /// Returns true if streams are wrapped in TLS.
    #[must_use]
    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// Connects to `address`, only trying resolved addresses of `family` when set.
    ///
    /// The connect timeout covers resolution, the TCP handshake, and the TLS
    /// handshake together.
    pub async fn connect(
        &self,
        address: &NodeAddress,
        family: Option<AddressFamily>,
    ) -> Result<BoxedStream> {
        let target = address.to_string();
        with_timeout(Some(self.connect_timeout), &target, async {
            let tcp = connect_tcp(address, family).await?;
            let _ = tcp.set_nodelay(true);

            match self.tls {
                None => Ok(Box::new(tcp) as BoxedStream),
                Some(ref tls) => {
                    let name = tls.domain_name.clone().unwrap_or_else(|| address.host.clone());
                    let server_name = ServerName::try_from(name.clone()).map_err(|_| {
                        let message = format!("invalid server name {name}");
                        TlsSnafu { address: target.clone(), message }.build()
                    })?;
                    let stream = tls.connector.connect(server_name, tcp).await.map_err(|e| {
                        TlsSnafu { address: target.clone(), message: e.to_string() }.build()
                    })?;
                    Ok(Box::new(stream) as BoxedStream)
                },
            }
        })
        .await
    }
}

#[async_trait]
impl StreamFactory for TcpStreamFactory {
    async fn open(&self, address: &NodeAddress) -> Result<BoxedStream> {
        self.connect(address, None).await
    }
}

async fn connect_tcp(address: &NodeAddress, family: Option<AddressFamily>) -> Result<TcpStream> {
    let target = address.to_string();
    let Some(family) = family else {
        return TcpStream::connect(address.socket_string()).await.context(IoSnafu { address: target });
    };

    let candidates: Vec<SocketAddr> = tokio::net::lookup_host(address.socket_string())
        .await
        .context(IoSnafu { address: target.clone() })?
        .filter(|addr| match family {
            AddressFamily::Ipv4 => addr.is_ipv4(),
            AddressFamily::Ipv6 => addr.is_ipv6(),
        })
        .collect();

    let mut last_error =
        io::Error::new(io::ErrorKind::AddrNotAvailable, format!("no {family:?} address for host"));
    for candidate in candidates {
        match TcpStream::connect(candidate).await {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = e,
        }
    }
    Err(last_error).context(IoSnafu { address: target })
}

/// Builds a rustls client configuration from a [`TlsConfig`].
pub(crate) fn build_client_config(tls: &TlsConfig) -> Result<ClientConfig> {
    let mut roots = RootCertStore::empty();
    if let Some(ca) = tls.ca_cert() {
        for cert in parse_certificates(ca)? {
            roots.add(cert).map_err(|e| {
                ConfigSnafu { message: format!("failed to add CA certificate: {e}") }.build()
            })?;
        }
    }
    if tls.use_native_roots() {
        let native = rustls_native_certs::load_native_certs();
        for error in &native.errors {
            tracing::warn!(error = %error, "failed to load a native root certificate");
        }
        for cert in native.certs {
            let _ = roots.add(cert);
        }
    }

    let builder = ClientConfig::builder().with_root_certificates(roots);
    match (tls.client_cert(), tls.client_key()) {
        (Some(cert), Some(key)) => {
            let chain = parse_certificates(cert)?;
            let key = rustls_pemfile::private_key(&mut &key[..])
                .map_err(|e| {
                    ConfigSnafu { message: format!("failed to parse client key: {e}") }.build()
                })?
                .ok_or_else(|| ConfigSnafu { message: "no private key found in PEM data" }.build())?;
            builder.with_client_auth_cert(chain, key).map_err(|e| {
                ConfigSnafu { message: format!("invalid client certificate or key: {e}") }.build()
            })
        },
        _ => Ok(builder.with_no_client_auth()),
    }
}

fn parse_certificates(data: &CertificateData) -> Result<Vec<CertificateDer<'static>>> {
    match data {
        CertificateData::Der(der) => Ok(vec![CertificateDer::from(der.clone())]),
        CertificateData::Pem(pem) => {
            let certs = rustls_pemfile::certs(&mut &pem[..])
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| {
                    ConfigSnafu { message: format!("failed to parse PEM certificate: {e}") }.build()
                })?;
            if certs.is_empty() {
                return ConfigSnafu { message: "no certificates found in PEM data" }.fail();
            }
            Ok(certs)
        },
    }
}

/// Monitor transport speaking RESP over TCP or TLS.
#[derive(Clone)]
pub struct RespTransport {
    factory: TcpStreamFactory,
    auth: Option<Credentials>,
    command_timeout: Option<Duration>,
}

impl RespTransport {
    /// Creates a transport.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the TLS material cannot be parsed.
    pub fn new(
        connect_timeout: Duration,
        tls: Option<&TlsConfig>,
        auth: Option<Credentials>,
        command_timeout: Option<Duration>,
    ) -> Result<Self> {
        Ok(Self { factory: TcpStreamFactory::new(connect_timeout, tls)?, auth, command_timeout })
    }
}

#[async_trait]
impl MonitorTransport for RespTransport {
    async fn open(&self, endpoint: &MonitorEndpoint) -> Result<Box<dyn MonitorSession>> {
        let stream = self.factory.connect(&endpoint.address(), endpoint.family).await?;
        let mut session = RespSession::new(stream, endpoint.identity(), self.command_timeout);

        if let Some(ref auth) = self.auth {
            let mut args = vec!["AUTH"];
            if let Some(ref username) = auth.username {
                args.push(username);
            }
            args.push(&auth.password);
            session.query(&args).await?;
        }

        Ok(Box::new(session))
    }
}

/// A RESP conversation over any duplex stream.
pub struct RespSession {
    stream: BoxedStream,
    buf: BytesMut,
    address: String,
    command_timeout: Option<Duration>,
}

impl RespSession {
    /// Wraps an established stream.
    pub fn new(stream: BoxedStream, address: String, command_timeout: Option<Duration>) -> Self {
        Self { stream, buf: BytesMut::with_capacity(512), address, command_timeout }
    }
}

#[async_trait]
impl MonitorSession for RespSession {
    async fn query(&mut self, args: &[&str]) -> Result<Value> {
        let address = self.address.clone();
        with_timeout(
            self.command_timeout,
            &address,
            round_trip(&mut self.stream, &mut self.buf, args, &self.address),
        )
        .await
    }

    async fn receive(&mut self) -> Result<Value> {
        let value = read_value(&mut self.stream, &mut self.buf, &self.address).await?;
        reject_error(value, &self.address)
    }

    async fn close(mut self: Box<Self>) {
        let _ = self.stream.shutdown().await;
    }
}

/// Writes one command and reads one reply.
pub(crate) async fn round_trip<S>(
    stream: &mut S,
    buf: &mut BytesMut,
    args: &[&str],
    address: &str,
) -> Result<Value>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let mut out = BytesMut::new();
    resp::encode_command(args, &mut out);
    stream.write_all(&out).await.context(IoSnafu { address })?;
    stream.flush().await.context(IoSnafu { address })?;

    let value = read_value(stream, buf, address).await?;
    reject_error(value, address)
}

async fn read_value<S>(stream: &mut S, buf: &mut BytesMut, address: &str) -> Result<Value>
where
    S: AsyncRead + Unpin + ?Sized,
{
    loop {
        if let Some(value) = resp::decode(buf).context(ProtocolSnafu { address })? {
            return Ok(value);
        }
        let read = stream.read_buf(buf).await.context(IoSnafu { address })?;
        if read == 0 {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof))
                .context(IoSnafu { address });
        }
    }
}

fn reject_error(value: Value, address: &str) -> Result<Value> {
    match value {
        Value::Error(message) => ErrorReplySnafu { address, message }.fail(),
        value => Ok(value),
    }
}

/// Applies an optional deadline to a fallible future.
pub(crate) async fn with_timeout<T>(
    timeout: Option<Duration>,
    address: &str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match timeout {
        None => fut.await,
        Some(duration) => match tokio::time::timeout(duration, fut).await {
            Ok(result) => result,
            Err(_) => TimeoutSnafu { address, duration_ms: duration.as_millis() as u64 }.fail(),
        },
    }
}
