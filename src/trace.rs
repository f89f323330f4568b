//! Lifecycle hooks dispatched by the transport, and the attachment of
//! observers to a request.

use crate::timing::RequestTimings;
use http::{Extensions, Request};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct DnsStartInfo<'a> {
    pub host: &'a str,
}

#[derive(Debug, Clone, Copy)]
pub struct DnsDoneInfo<'a> {
    pub addrs: &'a [SocketAddr],
    pub err: Option<&'a anyhow::Error>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GotConnInfo {
    /// The connection came from the idle pool.
    pub reused: bool,
    pub was_idle: bool,
    pub idle_time: Duration,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WroteRequestInfo<'a> {
    pub err: Option<&'a io::Error>,
}

/// Observer of one request's transport lifecycle.
///
/// Hooks are called from whichever task drives that part of the request and
/// must not block. Error values are informational; the transport reports
/// failures through its own return values.
pub trait ClientTrace: Send + Sync {
    fn dns_start(&self, _info: &DnsStartInfo<'_>) {}

    fn dns_done(&self, _info: &DnsDoneInfo<'_>) {}

    /// Called before each dial attempt.
    fn connect_start(&self, _addr: SocketAddr) {}

    fn connect_done(&self, _addr: SocketAddr, _err: Option<&io::Error>) {}

    fn tls_handshake_start(&self) {}

    fn tls_handshake_done(&self, _err: Option<&io::Error>) {}

    fn got_conn(&self, _info: &GotConnInfo) {}

    fn wrote_request(&self, _info: &WroteRequestInfo<'_>) {}

    fn got_first_response_byte(&self) {}
}

/// The observers attached to a request, stored in its extensions.
///
/// Dispatches every hook to each member, most recently attached first.
#[derive(Clone, Default)]
pub struct TraceHandle {
    hooks: Arc<Vec<Arc<dyn ClientTrace>>>,
}

impl TraceHandle {
    pub fn new(trace: Arc<dyn ClientTrace>) -> Self {
        Self {
            hooks: Arc::new(vec![trace]),
        }
    }

    fn compose(&self, trace: Arc<dyn ClientTrace>) -> Self {
        let mut hooks = Vec::with_capacity(self.hooks.len() + 1);
        hooks.push(trace);
        hooks.extend(self.hooks.iter().cloned());
        Self {
            hooks: Arc::new(hooks),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

impl fmt::Debug for TraceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceHandle")
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

impl ClientTrace for TraceHandle {
    fn dns_start(&self, info: &DnsStartInfo<'_>) {
        self.hooks.iter().for_each(|h| h.dns_start(info));
    }

    fn dns_done(&self, info: &DnsDoneInfo<'_>) {
        self.hooks.iter().for_each(|h| h.dns_done(info));
    }

    fn connect_start(&self, addr: SocketAddr) {
        self.hooks.iter().for_each(|h| h.connect_start(addr));
    }

    fn connect_done(&self, addr: SocketAddr, err: Option<&io::Error>) {
        self.hooks.iter().for_each(|h| h.connect_done(addr, err));
    }

    fn tls_handshake_start(&self) {
        self.hooks.iter().for_each(|h| h.tls_handshake_start());
    }

    fn tls_handshake_done(&self, err: Option<&io::Error>) {
        self.hooks.iter().for_each(|h| h.tls_handshake_done(err));
    }

    fn got_conn(&self, info: &GotConnInfo) {
        self.hooks.iter().for_each(|h| h.got_conn(info));
    }

    fn wrote_request(&self, info: &WroteRequestInfo<'_>) {
        self.hooks.iter().for_each(|h| h.wrote_request(info));
    }

    fn got_first_response_byte(&self) {
        self.hooks.iter().for_each(|h| h.got_first_response_byte());
    }
}

/// Attaches `trace` to `request` so the transport dispatches hooks to it.
///
/// Observers already attached keep firing, after `trace`.
pub fn with_client_trace<B>(mut request: Request<B>, trace: Arc<dyn ClientTrace>) -> Request<B> {
    let handle = match request.extensions_mut().remove::<TraceHandle>() {
        Some(existing) => existing.compose(trace),
        None => TraceHandle::new(trace),
    };
    request.extensions_mut().insert(handle);
    request
}

/// Attaches `timings` to `request`.
pub fn with_timings<B>(request: Request<B>, timings: &Arc<RequestTimings>) -> Request<B> {
    with_client_trace(request, timings.clone())
}

pub fn client_trace(extensions: &Extensions) -> Option<TraceHandle> {
    extensions.get::<TraceHandle>().cloned()
}
