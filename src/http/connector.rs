use crate::http::resolver::TracingResolver;
use crate::trace::{ClientTrace, TraceHandle};
use anyhow::Context as _;
use hyper_util::client::legacy::connect::dns::Name;
use rustls::ClientConfig;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tower_service::Service;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
}

/// Where a request goes: one pool key per target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
}

impl Target {
    pub fn from_uri(uri: &hyper::Uri) -> Result<Self, anyhow::Error> {
        let scheme = match uri.scheme_str() {
            Some("https") => Scheme::Https,
            Some("http") | None => Scheme::Http,
            Some(other) => return Err(anyhow!("Unsupported scheme: {}", other)),
        };
        let host = uri
            .host()
            .ok_or(anyhow!("Can not find host in the uri:{}.", uri))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let default_port = match scheme {
            Scheme::Https => 443,
            Scheme::Http => 80,
        };
        let port = uri.port_u16().unwrap_or(default_port);
        Ok(Self { scheme, host, port })
    }

    pub fn pool_key(&self) -> String {
        let scheme = match self.scheme {
            Scheme::Http => "http",
            Scheme::Https => "https",
        };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}

/// A dialed connection, TLS-wrapped for `https`.
#[derive(Debug)]
pub enum MaybeTlsStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl MaybeTlsStream {
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        match self {
            MaybeTlsStream::Plain(s) => s.peer_addr(),
            MaybeTlsStream::Tls(s) => s.get_ref().0.peer_addr(),
        }
    }
}

impl AsyncRead for MaybeTlsStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeTlsStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_write_vectored(cx, bufs),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_write_vectored(cx, bufs),
        }
    }

    fn is_write_vectored(&self) -> bool {
        match self {
            MaybeTlsStream::Plain(s) => s.is_write_vectored(),
            MaybeTlsStream::Tls(s) => s.is_write_vectored(),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_flush(cx),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Dials targets, reporting DNS, connect and TLS boundaries to the trace.
#[derive(Clone)]
pub struct Connector {
    tls: Arc<ClientConfig>,
    connect_timeout: Duration,
}

impl Connector {
    pub fn new(tls: Arc<ClientConfig>, connect_timeout: Duration) -> Self {
        Self {
            tls,
            connect_timeout,
        }
    }

    pub async fn connect(
        &self,
        target: &Target,
        trace: &TraceHandle,
    ) -> Result<MaybeTlsStream, anyhow::Error> {
        let addrs = self.resolve(target, trace).await?;
        let stream = self.dial(target, &addrs, trace).await?;
        if target.scheme == Scheme::Http {
            return Ok(MaybeTlsStream::Plain(stream));
        }

        let domain = pki_types::ServerName::try_from(target.host.clone())
            .map_err(|e| anyhow!("{}", e))?;
        trace.tls_handshake_start();
        let handshake = TlsConnector::from(self.tls.clone())
            .connect(domain, stream)
            .await;
        trace.tls_handshake_done(handshake.as_ref().err());
        let tls_stream =
            handshake.with_context(|| format!("TLS handshake with {} failed", target.host))?;
        Ok(MaybeTlsStream::Tls(Box::new(tls_stream)))
    }

    /// IP literals skip name resolution and fire no DNS hooks.
    async fn resolve(
        &self,
        target: &Target,
        trace: &TraceHandle,
    ) -> Result<Vec<SocketAddr>, anyhow::Error> {
        if let Ok(ip) = target.host.parse::<IpAddr>() {
            return Ok(vec![SocketAddr::new(ip, target.port)]);
        }

        let mut resolver = TracingResolver::new(trace.clone());
        let name = Name::from_str(&target.host)?;
        std::future::poll_fn(|cx| resolver.poll_ready(cx)).await?;
        let addrs = resolver
            .call(name)
            .await?
            .map(|mut addr| {
                addr.set_port(target.port);
                addr
            })
            .collect();
        Ok(addrs)
    }

    async fn dial(
        &self,
        target: &Target,
        addrs: &[SocketAddr],
        trace: &TraceHandle,
    ) -> Result<TcpStream, anyhow::Error> {
        let mut last_err = None;
        for &addr in addrs {
            trace.connect_start(addr);
            let attempt = match timeout(self.connect_timeout, TcpStream::connect(addr)).await {
                Ok(res) => res,
                Err(_) => Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect to {} timed out", addr),
                )),
            };
            trace.connect_done(addr, attempt.as_ref().err());

            match attempt {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    debug!("Connected to {} ({})", target.host, addr);
                    return Ok(stream);
                }
                Err(e) => {
                    debug!("Connect to {} failed: {}", addr, e);
                    last_err = Some(e);
                }
            }
        }

        Err(match last_err {
            Some(e) => anyhow::Error::new(e).context(format!("Failed to connect to {}", target.host)),
            None => anyhow!("No addresses to connect to for {}", target.host),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_defaults() {
        let t = Target::from_uri(&"https://example.com/a".parse().unwrap()).unwrap();
        assert_eq!(t.scheme, Scheme::Https);
        assert_eq!(t.port, 443);
        assert_eq!(t.pool_key(), "https://example.com:443");

        let t = Target::from_uri(&"http://[::1]:8080/".parse().unwrap()).unwrap();
        assert_eq!(t.host, "::1");
        assert_eq!(t.pool_key(), "http://::1:8080");
    }

    #[test]
    fn test_target_rejects_unknown_scheme() {
        assert!(Target::from_uri(&"ftp://example.com/".parse().unwrap()).is_err());
        assert!(Target::from_uri(&"/relative".parse().unwrap()).is_err());
    }
}
