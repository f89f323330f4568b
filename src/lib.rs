//! Timing breakdown of a single outgoing HTTP request.
//!
//! Attach a [`RequestTimings`] to a request with [`with_timings`], send it
//! through a transport that dispatches [`ClientTrace`] hooks (the bundled
//! [`Client`] does), read the response body, then call
//! [`RequestTimings::done`]:
//!
//! ```no_run
//! # async fn run() -> anyhow::Result<()> {
//! use bytes::Bytes;
//! use http_body_util::{BodyExt, Full};
//! use httpstat::{with_timings, Client, RequestTimings, TransportConfig};
//! use std::sync::Arc;
//! use std::time::Instant;
//!
//! let client = Client::new(TransportConfig::default())?;
//! let timings = Arc::new(RequestTimings::new());
//! let request = hyper::Request::get("https://example.com/").body(Full::new(Bytes::new()))?;
//! let response = client.send(with_timings(request, &timings)).await?;
//! response.into_body().collect().await?;
//! timings.done(Instant::now());
//! println!("{}", timings);
//! # Ok(())
//! # }
//! ```
#[macro_use]
extern crate anyhow;
#[macro_use]
extern crate tracing;

pub mod config;
pub mod http;
pub mod timing;
pub mod tls;
pub mod trace;

pub use crate::config::TransportConfig;
pub use crate::http::client::Client;
pub use crate::timing::{Durations, Event, Mark, RequestTimings, Skip};
pub use crate::trace::{
    client_trace, with_client_trace, with_timings, ClientTrace, DnsDoneInfo, DnsStartInfo,
    GotConnInfo, TraceHandle, WroteRequestInfo,
};
