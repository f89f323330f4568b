use crate::http::traced_io::TraceSlot;
use bytes::Bytes;
use http_body_util::Full;
use hyper::client::conn::http1::SendRequest;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// An HTTP/1 connection and the slot its IO reports to.
pub struct PooledConn {
    pub sender: SendRequest<Full<Bytes>>,
    pub slot: Arc<TraceSlot>,
}

struct Idle {
    conn: PooledConn,
    since: Instant,
}

/// Idle connections keyed by `scheme://host:port`.
#[derive(Clone)]
pub struct Pool {
    idle: Arc<Mutex<HashMap<String, Vec<Idle>>>>,
    max_idle_per_host: usize,
    idle_timeout: Duration,
}

impl Pool {
    pub fn new(max_idle_per_host: usize, idle_timeout: Duration) -> Self {
        Self {
            idle: Arc::default(),
            max_idle_per_host,
            idle_timeout,
        }
    }

    /// Takes the most recently returned connection able to accept a request,
    /// with how long it sat idle. Closed and expired entries are dropped;
    /// entries that are merely busy stay pooled.
    pub fn checkout(&self, key: &str) -> Option<(PooledConn, Duration)> {
        let mut idle = self.lock();
        let entries = idle.get_mut(key)?;
        self.prune(key, entries);
        let found = entries
            .iter()
            .rposition(|entry| entry.conn.sender.is_ready())
            .map(|i| entries.remove(i))
            .map(|entry| (entry.conn, entry.since.elapsed()));
        if entries.is_empty() {
            idle.remove(key);
        }
        found
    }

    /// Returns `conn` to the pool once it can take another request, i.e. after
    /// the caller has consumed the response body.
    pub fn release(&self, key: String, mut conn: PooledConn) {
        if self.max_idle_per_host == 0 {
            return;
        }
        let pool = self.clone();
        tokio::spawn(async move {
            match conn.sender.ready().await {
                Ok(()) => pool.insert(key, conn),
                Err(e) => debug!("Connection to {} not reusable: {}", key, e),
            }
        });
    }

    fn insert(&self, key: String, conn: PooledConn) {
        let mut idle = self.lock();
        idle.retain(|host, entries| {
            self.prune(host, entries);
            !entries.is_empty()
        });
        let entries = idle.entry(key).or_default();
        if entries.len() >= self.max_idle_per_host {
            entries.remove(0);
        }
        entries.push(Idle {
            conn,
            since: Instant::now(),
        });
    }

    fn prune(&self, key: &str, entries: &mut Vec<Idle>) {
        entries.retain(|entry| {
            if entry.conn.sender.is_closed() {
                trace!("dropping closed connection to {}", key);
                false
            } else if entry.since.elapsed() >= self.idle_timeout {
                trace!("dropping expired connection to {}", key);
                false
            } else {
                true
            }
        });
    }

    pub fn idle_count(&self, key: &str) -> usize {
        self.lock().get(key).map_or(0, Vec::len)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<Idle>>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
