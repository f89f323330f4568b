//! Phase timestamps of a single request attempt and the durations derived
//! from them.
//!
//! A [`RequestTimings`] is written by transport hooks (see [`ClientTrace`])
//! and read by the caller once the response body has been consumed. When the
//! transport skips a phase (dialing an IP literal, reusing a pooled
//! connection, or firing no connection hooks at all) the skipped marks are
//! backfilled to the instant of the next observed boundary, so the skipped
//! phase reads as zero and cumulative durations stay anchored.

use crate::trace::{ClientTrace, DnsDoneInfo, DnsStartInfo, GotConnInfo, WroteRequestInfo};
use serde::{Serialize, Serializer};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

/// A raw timestamp slot, in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mark {
    DnsStart,
    DnsDone,
    TcpStart,
    TcpDone,
    TlsStart,
    TlsDone,
    ServerStart,
    ServerDone,
    TransferStart,
    TransferDone,
}

impl Mark {
    pub const ALL: [Mark; 10] = [
        Mark::DnsStart,
        Mark::DnsDone,
        Mark::TcpStart,
        Mark::TcpDone,
        Mark::TlsStart,
        Mark::TlsDone,
        Mark::ServerStart,
        Mark::ServerDone,
        Mark::TransferStart,
        Mark::TransferDone,
    ];
}

/// A transport lifecycle boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    DnsStart,
    DnsDone,
    ConnectStart,
    ConnectDone,
    TlsHandshakeStart,
    TlsHandshakeDone,
    GotConn { reused: bool },
    WroteRequest,
    GotFirstResponseByte,
}

impl Event {
    /// Skips checked, in order, when this event fires.
    pub const fn skips(self) -> &'static [Skip] {
        match self {
            Event::ConnectStart => &[Skip::DirectDial],
            Event::WroteRequest => &[Skip::Uninstrumented, Skip::ReusedConnection],
            _ => &[],
        }
    }
}

/// A phase the transport may skip without firing its hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    /// Dialing an IP literal: no name resolution happened.
    DirectDial,
    /// The transport fired no DNS or connect hooks at all.
    Uninstrumented,
    /// The connection came from a pool; setup predates this request.
    ReusedConnection,
}

impl Skip {
    /// Marks pulled forward to the current instant when this skip is detected.
    pub const fn backfilled(self) -> &'static [Mark] {
        match self {
            Skip::DirectDial => &[Mark::DnsStart, Mark::DnsDone],
            Skip::Uninstrumented => &[
                Mark::DnsStart,
                Mark::DnsDone,
                Mark::TcpStart,
                Mark::TcpDone,
            ],
            Skip::ReusedConnection => &[
                Mark::DnsStart,
                Mark::DnsDone,
                Mark::TcpStart,
                Mark::TcpDone,
                Mark::TlsStart,
                Mark::TlsDone,
            ],
        }
    }

    fn detected(self, state: &State) -> bool {
        match self {
            Skip::DirectDial => !state.marks.is_set(Mark::DnsStart),
            Skip::Uninstrumented => {
                !state.marks.is_set(Mark::DnsStart) && !state.marks.is_set(Mark::TcpStart)
            }
            Skip::ReusedConnection => state.is_reused,
        }
    }
}

/// Derived durations of one request attempt.
///
/// The first five are intervals of a single phase; the rest are cumulative
/// from the start of the request.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Durations {
    #[serde(serialize_with = "millis")]
    pub dns_lookup: Duration,
    #[serde(serialize_with = "millis")]
    pub tcp_connection: Duration,
    #[serde(serialize_with = "millis")]
    pub tls_handshake: Duration,
    #[serde(serialize_with = "millis")]
    pub server_processing: Duration,
    #[serde(serialize_with = "millis")]
    pub content_transfer: Duration,

    #[serde(serialize_with = "millis")]
    pub name_lookup: Duration,
    #[serde(serialize_with = "millis")]
    pub connect: Duration,
    #[serde(serialize_with = "millis")]
    pub pretransfer: Duration,
    #[serde(serialize_with = "millis")]
    pub start_transfer: Duration,
    #[serde(serialize_with = "millis")]
    pub total: Duration,
}

fn millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64() * 1000.0)
}

impl fmt::Display for Durations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rows = [
            ("DNS lookup:", self.dns_lookup),
            ("TCP connection:", self.tcp_connection),
            ("TLS handshake:", self.tls_handshake),
            ("Server processing:", self.server_processing),
            ("Content transfer:", self.content_transfer),
        ];
        for (label, d) in rows {
            writeln!(f, "  {:<19}{:>8} ms", label, d.as_millis())?;
        }
        writeln!(f)?;

        let rows = [
            ("Name lookup:", self.name_lookup),
            ("Connect:", self.connect),
            ("Pre transfer:", self.pretransfer),
            ("Start transfer:", self.start_transfer),
            ("Total:", self.total),
        ];
        for (label, d) in rows {
            writeln!(f, "  {:<19}{:>8} ms", label, d.as_millis())?;
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Marks([Option<Instant>; 10]);

impl Marks {
    fn get(&self, mark: Mark) -> Option<Instant> {
        self.0[mark as usize]
    }

    fn set(&mut self, mark: Mark, at: Instant) {
        self.0[mark as usize] = Some(at);
    }

    fn is_set(&self, mark: Mark) -> bool {
        self.get(mark).is_some()
    }

    fn between(&self, earlier: Mark, later: Mark) -> Duration {
        elapsed(self.get(earlier), self.get(later))
    }
}

/// Zero unless both ends are set.
fn elapsed(earlier: Option<Instant>, later: Option<Instant>) -> Duration {
    match (earlier, later) {
        (Some(earlier), Some(later)) => later.saturating_duration_since(earlier),
        _ => Duration::ZERO,
    }
}

#[derive(Debug, Default)]
struct State {
    marks: Marks,
    is_tls: bool,
    is_reused: bool,
    durations: Durations,
}

impl State {
    fn apply(&mut self, event: Event, at: Instant) {
        match event {
            Event::DnsStart => {
                if !self.marks.is_set(Mark::DnsStart) {
                    self.marks.set(Mark::DnsStart, at);
                }
            }
            Event::DnsDone => {
                self.marks.set(Mark::DnsDone, at);
                let lookup = self.marks.between(Mark::DnsStart, Mark::DnsDone);
                self.durations.dns_lookup = lookup;
                self.durations.name_lookup = lookup;
            }
            Event::ConnectStart => {
                self.marks.set(Mark::TcpStart, at);
                self.backfill(event, at);
            }
            Event::ConnectDone => {
                self.marks.set(Mark::TcpDone, at);
                self.durations.tcp_connection = self.marks.between(Mark::TcpStart, Mark::TcpDone);
                self.durations.connect = self.marks.between(Mark::DnsStart, Mark::TcpDone);
            }
            Event::TlsHandshakeStart => {
                self.is_tls = true;
                self.marks.set(Mark::TlsStart, at);
            }
            Event::TlsHandshakeDone => {
                self.marks.set(Mark::TlsDone, at);
                self.durations.tls_handshake = self.marks.between(Mark::TlsStart, Mark::TlsDone);
                self.durations.pretransfer = self.marks.between(Mark::DnsStart, Mark::TlsDone);
            }
            Event::GotConn { reused } => {
                if reused {
                    self.is_reused = true;
                }
            }
            Event::WroteRequest => {
                self.marks.set(Mark::ServerStart, at);
                self.backfill(event, at);
                if !self.is_tls {
                    self.durations.tls_handshake = Duration::ZERO;
                    self.durations.pretransfer = self.durations.connect;
                }
            }
            Event::GotFirstResponseByte => {
                self.marks.set(Mark::ServerDone, at);
                self.durations.server_processing =
                    self.marks.between(Mark::ServerStart, Mark::ServerDone);
                self.durations.start_transfer =
                    self.marks.between(Mark::DnsStart, Mark::ServerDone);
                self.marks.set(Mark::TransferStart, at);
            }
        }
    }

    fn backfill(&mut self, event: Event, at: Instant) {
        for &skip in event.skips() {
            if skip.detected(self) {
                trace!(?event, ?skip, "backfilling skipped phase");
                for &mark in skip.backfilled() {
                    self.marks.set(mark, at);
                }
            }
        }
    }
}

/// Timing state of one request attempt.
///
/// Hooks may fire from any task the transport runs; every access goes
/// through a single reader/writer lock. Do not share one instance between
/// requests.
#[derive(Debug, Default)]
pub struct RequestTimings {
    state: RwLock<State>,
}

impl RequestTimings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies `event` as if it fired at `at`.
    pub fn record(&self, event: Event, at: Instant) {
        self.write().apply(event, at);
    }

    /// Closes the content transfer phase. Call once, after the response body
    /// has been read.
    ///
    /// If no lifecycle event was ever observed, only the mark is stored and
    /// `content_transfer` and `total` stay zero.
    pub fn done(&self, at: Instant) {
        let mut state = self.write();
        state.marks.set(Mark::TransferDone, at);

        if !state.marks.is_set(Mark::DnsStart) {
            debug!("no lifecycle event observed before done");
            return;
        }

        state.durations.content_transfer =
            state.marks.between(Mark::TransferStart, Mark::TransferDone);
        state.durations.total = state.marks.between(Mark::DnsStart, Mark::TransferDone);
    }

    /// Time from the first response byte to `at`, without finalizing.
    pub fn content_transfer_at(&self, at: Instant) -> Duration {
        elapsed(self.read().marks.get(Mark::ServerDone), Some(at))
    }

    /// Time from the start of the request to `at`, without finalizing.
    pub fn total_at(&self, at: Instant) -> Duration {
        elapsed(self.read().marks.get(Mark::DnsStart), Some(at))
    }

    pub fn durations(&self) -> Durations {
        self.read().durations
    }

    pub fn mark(&self, mark: Mark) -> Option<Instant> {
        self.read().marks.get(mark)
    }

    pub fn is_tls(&self) -> bool {
        self.read().is_tls
    }

    pub fn is_reused(&self) -> bool {
        self.read().is_reused
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Display for RequestTimings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\nTime breakdown:")?;
        write!(f, "{}", self.durations())
    }
}

impl ClientTrace for RequestTimings {
    fn dns_start(&self, info: &DnsStartInfo<'_>) {
        trace!(host = info.host, "dns start");
        self.record(Event::DnsStart, Instant::now());
    }

    fn dns_done(&self, info: &DnsDoneInfo<'_>) {
        if let Some(err) = info.err {
            debug!("dns lookup failed: {err:#}");
        }
        self.record(Event::DnsDone, Instant::now());
    }

    fn connect_start(&self, _addr: SocketAddr) {
        self.record(Event::ConnectStart, Instant::now());
    }

    fn connect_done(&self, addr: SocketAddr, err: Option<&io::Error>) {
        if let Some(err) = err {
            debug!(%addr, "connect failed: {err}");
        }
        self.record(Event::ConnectDone, Instant::now());
    }

    fn tls_handshake_start(&self) {
        self.record(Event::TlsHandshakeStart, Instant::now());
    }

    fn tls_handshake_done(&self, err: Option<&io::Error>) {
        if let Some(err) = err {
            debug!("tls handshake failed: {err}");
        }
        self.record(Event::TlsHandshakeDone, Instant::now());
    }

    fn got_conn(&self, info: &GotConnInfo) {
        self.record(
            Event::GotConn {
                reused: info.reused,
            },
            Instant::now(),
        );
    }

    fn wrote_request(&self, info: &WroteRequestInfo<'_>) {
        if let Some(err) = info.err {
            debug!("writing request failed: {err}");
        }
        self.record(Event::WroteRequest, Instant::now());
    }

    fn got_first_response_byte(&self) {
        self.record(Event::GotFirstResponseByte, Instant::now());
    }
}
