use crate::trace::{ClientTrace, TraceHandle, WroteRequestInfo};
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Per-connection hook target, re-armed with the trace of each request sent
/// on the connection.
#[derive(Debug, Default)]
pub struct TraceSlot {
    state: Mutex<SlotState>,
}

#[derive(Debug, Default)]
struct SlotState {
    trace: Option<TraceHandle>,
    wrote_pending: bool,
    wrote_request: bool,
    first_byte: bool,
}

impl TraceSlot {
    pub fn arm(&self, trace: TraceHandle) {
        *self.lock() = SlotState {
            trace: Some(trace),
            ..Default::default()
        };
    }

    fn on_write(&self) {
        let mut state = self.lock();
        if state.trace.is_some() && !state.wrote_request {
            state.wrote_pending = true;
        }
    }

    fn on_write_error(&self, err: &io::Error) {
        let trace = {
            let mut state = self.lock();
            if state.wrote_request {
                return;
            }
            state.wrote_request = true;
            state.trace.clone()
        };
        if let Some(trace) = trace {
            trace.wrote_request(&WroteRequestInfo { err: Some(err) });
        }
    }

    fn on_flush(&self) {
        let trace = {
            let mut state = self.lock();
            if !state.wrote_pending || state.wrote_request {
                return;
            }
            state.wrote_request = true;
            state.trace.clone()
        };
        if let Some(trace) = trace {
            trace.wrote_request(&WroteRequestInfo::default());
        }
    }

    fn on_read(&self) {
        let (trace, wrote) = {
            let mut state = self.lock();
            if state.first_byte || state.trace.is_none() {
                return;
            }
            state.first_byte = true;
            let wrote = !state.wrote_request;
            state.wrote_request = true;
            (state.trace.clone(), wrote)
        };
        if let Some(trace) = trace {
            // A response can only follow a request that went out.
            if wrote {
                trace.wrote_request(&WroteRequestInfo::default());
            }
            trace.got_first_response_byte();
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// IO wrapper reporting request write completion and the first response
/// byte to the armed [`TraceSlot`].
#[derive(Debug)]
pub struct TracedStream<T> {
    inner: T,
    slot: Arc<TraceSlot>,
}

impl<T> TracedStream<T> {
    pub fn new(inner: T, slot: Arc<TraceSlot>) -> Self {
        Self { inner, slot }
    }
}

impl<T: AsyncRead + Unpin> AsyncRead for TracedStream<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let polled = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = polled {
            if buf.filled().len() > before {
                this.slot.on_read();
            }
        }
        polled
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for TracedStream<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_write(cx, buf);
        this.observe_write(&polled);
        polled
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_write_vectored(cx, bufs);
        this.observe_write(&polled);
        polled
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_flush(cx);
        match &polled {
            Poll::Ready(Ok(())) => this.slot.on_flush(),
            Poll::Ready(Err(e)) => this.slot.on_write_error(e),
            Poll::Pending => {}
        }
        polled
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

impl<T> TracedStream<T> {
    fn observe_write(&self, polled: &Poll<io::Result<usize>>) {
        match polled {
            Poll::Ready(Ok(n)) if *n > 0 => self.slot.on_write(),
            Poll::Ready(Err(e)) => self.slot.on_write_error(e),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::{Mark, RequestTimings};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[derive(Default)]
    struct Recorder {
        hooks: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn hooks(&self) -> Vec<String> {
            self.hooks.lock().unwrap().clone()
        }
    }

    impl ClientTrace for Recorder {
        fn wrote_request(&self, info: &WroteRequestInfo<'_>) {
            let hook = match info.err {
                Some(_) => "wrote_request(err)",
                None => "wrote_request",
            };
            self.hooks.lock().unwrap().push(hook.to_string());
        }

        fn got_first_response_byte(&self) {
            self.hooks.lock().unwrap().push("first_byte".to_string());
        }
    }

    #[tokio::test]
    async fn test_unarmed_slot_fires_nothing() {
        let (client, mut server) = tokio::io::duplex(64);
        let slot = Arc::new(TraceSlot::default());
        let mut stream = TracedStream::new(client, slot);

        stream.write_all(b"ping").await.unwrap();
        stream.flush().await.unwrap();
        server.write_all(b"pong").await.unwrap();
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[tokio::test]
    async fn test_write_then_read_fires_in_order() {
        let (client, mut server) = tokio::io::duplex(64);
        let slot = Arc::new(TraceSlot::default());
        let timings = Arc::new(RequestTimings::new());
        slot.arm(TraceHandle::new(timings.clone()));
        let mut stream = TracedStream::new(client, slot);

        stream.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
        assert!(timings.mark(Mark::ServerStart).is_none());
        stream.flush().await.unwrap();
        assert!(timings.mark(Mark::ServerStart).is_some());

        let mut req = [0u8; 18];
        server.read_exact(&mut req).await.unwrap();
        server.write_all(b"HTTP/1.1 200 OK\r\n").await.unwrap();
        let mut buf = [0u8; 8];
        stream.read_exact(&mut buf).await.unwrap();

        let server_start = timings.mark(Mark::ServerStart).unwrap();
        let server_done = timings.mark(Mark::ServerDone).unwrap();
        assert!(server_done >= server_start);
        assert_eq!(timings.mark(Mark::TransferStart), Some(server_done));
    }

    #[tokio::test]
    async fn test_rearm_resets_per_request_state() {
        let (client, mut server) = tokio::io::duplex(64);
        let slot = Arc::new(TraceSlot::default());
        let first = Arc::new(RequestTimings::new());
        slot.arm(TraceHandle::new(first.clone()));
        let mut stream = TracedStream::new(client, slot.clone());

        stream.write_all(b"a").await.unwrap();
        stream.flush().await.unwrap();
        server.write_all(b"b").await.unwrap();
        let mut buf = [0u8; 1];
        stream.read_exact(&mut buf).await.unwrap();
        let first_done = first.mark(Mark::ServerDone);

        let second = Arc::new(RequestTimings::new());
        slot.arm(TraceHandle::new(second.clone()));
        stream.write_all(b"c").await.unwrap();
        stream.flush().await.unwrap();
        server.write_all(b"d").await.unwrap();
        stream.read_exact(&mut buf).await.unwrap();

        assert_eq!(first.mark(Mark::ServerDone), first_done);
        assert!(second.mark(Mark::ServerStart).is_some());
        assert!(second.mark(Mark::ServerDone).is_some());
    }

    #[tokio::test]
    async fn test_write_error_fires_wrote_request_once() {
        let (client, server) = tokio::io::duplex(64);
        drop(server);
        let slot = Arc::new(TraceSlot::default());
        let recorder = Arc::new(Recorder::default());
        slot.arm(TraceHandle::new(recorder.clone()));
        let mut stream = TracedStream::new(client, slot);

        assert!(stream.write_all(b"GET / HTTP/1.1\r\n").await.is_err());
        assert!(stream.write_all(b"\r\n").await.is_err());
        assert_eq!(recorder.hooks(), vec!["wrote_request(err)"]);
    }

    #[tokio::test]
    async fn test_read_before_flush_fires_wrote_request_first() {
        let (client, mut server) = tokio::io::duplex(64);
        let slot = Arc::new(TraceSlot::default());
        let recorder = Arc::new(Recorder::default());
        slot.arm(TraceHandle::new(recorder.clone()));
        let mut stream = TracedStream::new(client, slot);

        stream.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
        assert!(recorder.hooks().is_empty());
        server.write_all(b"HTTP/1.1 200 OK\r\n").await.unwrap();
        let mut buf = [0u8; 8];
        stream.read_exact(&mut buf).await.unwrap();
        stream.flush().await.unwrap();

        assert_eq!(recorder.hooks(), vec!["wrote_request", "first_byte"]);
    }

    #[tokio::test]
    async fn test_read_without_write_still_orders_hooks() {
        let (client, mut server) = tokio::io::duplex(64);
        let slot = Arc::new(TraceSlot::default());
        let timings = Arc::new(RequestTimings::new());
        slot.arm(TraceHandle::new(timings.clone()));
        let mut stream = TracedStream::new(client, slot);

        server.write_all(b"HTTP/1.1 200 OK\r\n").await.unwrap();
        let mut buf = [0u8; 8];
        stream.read_exact(&mut buf).await.unwrap();

        let server_start = timings.mark(Mark::ServerStart).unwrap();
        let server_done = timings.mark(Mark::ServerDone).unwrap();
        assert!(server_done >= server_start);
    }
}
