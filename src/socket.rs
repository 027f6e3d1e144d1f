//! Socket construction: optional bind address, IPv6 selection, TLS wrapping.
//!
//! The core consumes a [`SocketFactory`] rather than opening sockets
//! directly, so TLS negotiation policy stays a caller concern (explicit
//! Non-goal). Keepalive configuration follows the teacher's
//! `transport.rs::enable_keepalive`, built on `socket2`.

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::CoreError;

/// Parameters a caller supplies when asking the factory to connect.
#[derive(Clone, Debug, Default)]
pub struct ConnectSpec {
    pub host: String,
    pub port: u16,
    /// Force IPv6 resolution when `true`; otherwise the factory picks
    /// whichever family the resolver returns first.
    pub use_ipv6: bool,
    /// Local address to bind before connecting, if any.
    pub bind: Option<SocketAddr>,
}

/// Either a plain stream or one already wrapped by a TLS layer. The core
/// only ever reads/writes through [`tokio::io::AsyncRead`]/[`tokio::io::AsyncWrite`],
/// so it never needs to branch on which variant it holds.
pub enum Socket {
    Tcp(tokio::net::TcpStream),
    #[cfg(feature = "tls")]
    Tls(Box<tokio_rustls::client::TlsStream<tokio::net::TcpStream>>),
}

impl Socket {
    pub fn peer_addr(&self) -> std::io::Result<SocketAddr> {
        match self {
            Socket::Tcp(s) => s.peer_addr(),
            #[cfg(feature = "tls")]
            Socket::Tls(s) => s.get_ref().0.peer_addr(),
        }
    }

    pub fn split(
        self,
    ) -> (
        Box<dyn tokio::io::AsyncRead + Send + Unpin>,
        Box<dyn tokio::io::AsyncWrite + Send + Unpin>,
    ) {
        match self {
            Socket::Tcp(s) => {
                let (r, w) = s.into_split();
                (Box::new(r), Box::new(w))
            }
            #[cfg(feature = "tls")]
            Socket::Tls(s) => {
                let (r, w) = tokio::io::split(*s);
                (Box::new(r), Box::new(w))
            }
        }
    }
}

/// A function that wraps a raw TCP stream with TLS, returning the wrapped
/// stream. Injected by the caller; the core never decides TLS policy.
#[cfg(feature = "tls")]
pub type TlsWrap = std::sync::Arc<
    dyn Fn(
            tokio::net::TcpStream,
            String,
        ) -> std::pin::Pin<
            Box<
                dyn std::future::Future<
                        Output = std::io::Result<tokio_rustls::client::TlsStream<tokio::net::TcpStream>>,
                    > + Send,
            >,
        > + Send
        + Sync,
>;

/// Builds a [`TlsWrap`] backed by the platform's native certificate store,
/// for callers who just want "normal" TLS without assembling a
/// `rustls::ClientConfig` by hand.
#[cfg(feature = "tls")]
pub fn native_tls_wrap() -> Result<TlsWrap, CoreError> {
    let mut roots = tokio_rustls::rustls::RootCertStore::empty();
    for cert in rustls_native_certs::load_native_certs().map_err(|e| CoreError::ConnectFailed(e.to_string()))? {
        let _ = roots.add(cert);
    }
    let config = tokio_rustls::rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = tokio_rustls::TlsConnector::from(std::sync::Arc::new(config));
    Ok(std::sync::Arc::new(move |stream, host: String| {
        let connector = connector.clone();
        Box::pin(async move {
            let name = tokio_rustls::rustls::pki_types::ServerName::try_from(host)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
            connector.connect(name, stream).await
        }) as std::pin::Pin<Box<dyn std::future::Future<Output = std::io::Result<tokio_rustls::client::TlsStream<tokio::net::TcpStream>>> + Send>>
    }))
}

/// Constructs sockets for server and DCC connections.
pub struct SocketFactory {
    #[cfg(feature = "tls")]
    tls_wrap: Option<TlsWrap>,
    keepalive: Option<(Duration, Duration)>,
}

impl Default for SocketFactory {
    fn default() -> Self {
        Self {
            #[cfg(feature = "tls")]
            tls_wrap: None,
            keepalive: Some((Duration::from_secs(120), Duration::from_secs(30))),
        }
    }
}

impl SocketFactory {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(feature = "tls")]
    pub fn with_tls(mut self, wrap: TlsWrap) -> Self {
        self.tls_wrap = Some(wrap);
        self
    }

    pub fn with_keepalive(mut self, time: Duration, interval: Duration) -> Self {
        self.keepalive = Some((time, interval));
        self
    }

    pub fn without_keepalive(mut self) -> Self {
        self.keepalive = None;
        self
    }

    /// Open a TCP connection per `spec`, wrapping with TLS if configured.
    pub async fn connect(&self, spec: &ConnectSpec) -> Result<Socket, CoreError> {
        let addrs = tokio::net::lookup_host((spec.host.as_str(), spec.port))
            .await
            .map_err(|e| CoreError::ConnectFailed(e.to_string()))?;
        let mut addrs: Vec<SocketAddr> = addrs
            .filter(|a| a.is_ipv6() == spec.use_ipv6 || !spec.use_ipv6)
            .collect();
        if addrs.is_empty() {
            return Err(CoreError::ConnectFailed(format!(
                "no addresses resolved for {}:{}",
                spec.host, spec.port
            )));
        }
        addrs.sort_by_key(|a| a.is_ipv6() != spec.use_ipv6);
        let addr = addrs[0];

        let stream = if let Some(bind) = spec.bind {
            let socket = if addr.is_ipv6() {
                tokio::net::TcpSocket::new_v6()
            } else {
                tokio::net::TcpSocket::new_v4()
            }
            .map_err(|e| CoreError::ConnectFailed(e.to_string()))?;
            socket
                .bind(bind)
                .map_err(|e| CoreError::ConnectFailed(e.to_string()))?;
            socket
                .connect(addr)
                .await
                .map_err(|e| CoreError::ConnectFailed(e.to_string()))?
        } else {
            tokio::net::TcpStream::connect(addr)
                .await
                .map_err(|e| CoreError::ConnectFailed(e.to_string()))?
        };

        if let Some((time, interval)) = self.keepalive {
            if let Err(e) = enable_keepalive(&stream, time, interval) {
                tracing::warn!("failed to enable TCP keepalive: {e}");
            }
        }

        #[cfg(feature = "tls")]
        if let Some(wrap) = &self.tls_wrap {
            let tls = wrap(stream, spec.host.clone())
                .await
                .map_err(|e| CoreError::ConnectFailed(e.to_string()))?;
            return Ok(Socket::Tls(Box::new(tls)));
        }

        Ok(Socket::Tcp(stream))
    }
}

fn enable_keepalive(stream: &tokio::net::TcpStream, time: Duration, interval: Duration) -> std::io::Result<()> {
    use socket2::{SockRef, TcpKeepalive};
    let sock = SockRef::from(stream);
    let ka = TcpKeepalive::new().with_time(time).with_interval(interval);
    sock.set_tcp_keepalive(&ka)
}
