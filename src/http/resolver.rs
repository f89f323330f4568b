use crate::trace::{ClientTrace, DnsDoneInfo, DnsStartInfo, TraceHandle};
use futures::future::BoxFuture;
use hyper_util::client::legacy::connect::dns::Name;
use std::net::SocketAddr;
use std::net::ToSocketAddrs;
use std::task::{Context, Poll};
use std::vec;
use tower_service::Service;

/// System resolver that reports each lookup to the request's trace.
///
/// Resolved addresses carry port 0.
#[derive(Clone, Debug)]
pub struct TracingResolver {
    trace: TraceHandle,
}

impl TracingResolver {
    pub fn new(trace: TraceHandle) -> Self {
        Self { trace }
    }
}

impl Service<Name> for TracingResolver {
    type Response = vec::IntoIter<SocketAddr>;
    type Error = anyhow::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, name: Name) -> Self::Future {
        let trace = self.trace.clone();
        Box::pin(async move {
            let host = name.as_str().to_string();
            trace.dns_start(&DnsStartInfo { host: &host });
            debug!("Resolving DNS for: {}", &host);

            let resolved = lookup(host.clone()).await;
            match &resolved {
                Ok(addresses) => {
                    debug!("Resolved DNS for {}: {:?}", &host, addresses);
                    trace.dns_done(&DnsDoneInfo {
                        addrs: addresses,
                        err: None,
                    });
                }
                Err(e) => {
                    error!("DNS resolution for {} failed: {:#}", &host, e);
                    trace.dns_done(&DnsDoneInfo {
                        addrs: &[],
                        err: Some(e),
                    });
                }
            }

            resolved.map(Vec::into_iter)
        })
    }
}

async fn lookup(host: String) -> Result<Vec<SocketAddr>, anyhow::Error> {
    let lookup_host = host.clone();
    let addresses: Vec<_> =
        tokio::task::spawn_blocking(move || (lookup_host.as_str(), 0).to_socket_addrs())
            .await??
            .collect();

    if addresses.is_empty() {
        return Err(anyhow!("No IP addresses found for host {}", host));
    }
    Ok(addresses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::{Mark, RequestTimings};
    use std::str::FromStr;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_resolve_localhost_fires_dns_hooks() {
        let timings = Arc::new(RequestTimings::new());
        let mut resolver = TracingResolver::new(TraceHandle::new(timings.clone()));

        let addrs: Vec<_> = resolver
            .call(Name::from_str("localhost").unwrap())
            .await
            .unwrap()
            .collect();

        assert!(!addrs.is_empty());
        assert!(addrs.iter().all(|a| a.port() == 0));
        assert!(timings.mark(Mark::DnsStart).is_some());
        assert!(timings.mark(Mark::DnsDone).is_some());
    }

    #[tokio::test]
    async fn test_failed_lookup_still_fires_dns_done() {
        let timings = Arc::new(RequestTimings::new());
        let mut resolver = TracingResolver::new(TraceHandle::new(timings.clone()));

        let res = resolver
            .call(Name::from_str("does-not-exist.invalid").unwrap())
            .await;

        assert!(res.is_err());
        assert!(timings.mark(Mark::DnsDone).is_some());
    }
}
