//! HTTP server and graceful shutdown.
//!
//! # Shutdown sequence
//!
//! When the [`CancellationToken`] passed to [`Server::serve`] is cancelled:
//! 1. The accept loop stops and the listening socket is closed, so no new
//!    connections are made.
//! 2. Every open connection is told to shut down gracefully. Requests already
//!    in flight run to completion; idle keep-alive connections close at once.
//! 3. The server waits for the connection tasks, but no longer than
//!    [`ServerConfig::shutdown_timeout`]. Whatever is still running then is
//!    aborted and [`Error::DrainTimeout`] is returned.
//!
//! # Connection timeouts
//!
//! Between requests only the idle timeout applies. Once the first byte of a
//! new HTTP/1 request arrives, its head must be complete within the read
//! timeout or the connection is dropped. The same bound then applies to
//! reading the body, and a late body gets `408`. How long the handler may
//! take is a route concern, see [`middleware::Timeout`](crate::middleware::Timeout).

use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::task::{Context as TaskContext, Poll};
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::StatusCode;
use http::header::HeaderValue;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::app::App;
use crate::context::Context;
use crate::error::{Error, HandlerError};
use crate::request::Request;

/// Response header carrying the request's trace id.
pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// Timeouts applied by [`Server`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    /// Limit for reading the request head (from its first byte) and the
    /// request body.
    pub read_timeout: Duration,
    /// A keep-alive connection with nothing in flight for this long is closed.
    pub idle_timeout: Duration,
    /// Upper bound on draining connections after shutdown starts.
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(120),
            shutdown_timeout: Duration::from_secs(20),
        }
    }
}

/// The HTTP server.
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    config: ServerConfig,
}

impl Server {
    /// Binds `addr` now, so a port collision is reported before serving.
    pub async fn bind(addr: SocketAddr, config: ServerConfig) -> Result<Self, Error> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, config })
    }

    pub fn from_listener(listener: TcpListener, config: ServerConfig) -> Self {
        Self { listener, config }
    }

    /// The bound address; useful when binding port `0`.
    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections and dispatches them through `app` until `shutdown`
    /// is cancelled, then drains.
    pub async fn serve(self, app: App, shutdown: CancellationToken) -> Result<(), Error> {
        let Self { listener, config } = self;
        let addr = listener.local_addr()?;
        let app = Arc::new(app);

        info!(%addr, "listening");

        // Every connection task lives here so shutdown can wait for them.
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                // Check shutdown first so cancellation stops accepting even if
                // more connections are queued.
                biased;

                () = shutdown.cancelled() => {
                    info!(%addr, in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!(%addr, "accept error: {e}");
                            continue;
                        }
                    };

                    tasks.spawn(serve_connection(
                        stream,
                        remote_addr,
                        Arc::clone(&app),
                        config,
                        shutdown.clone(),
                    ));
                }

                // Reap finished connection tasks so the JoinSet does not grow
                // without bound on long-running servers.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        drop(listener);

        let drain = async {
            while tasks.join_next().await.is_some() {}
        };
        if tokio::time::timeout(config.shutdown_timeout, drain).await.is_err() {
            let remaining = tasks.len();
            tasks.abort_all();
            warn!(%addr, remaining, timeout = ?config.shutdown_timeout, "drain timed out, aborting connections");
            return Err(Error::DrainTimeout { timeout: config.shutdown_timeout, remaining });
        }

        info!(%addr, "server stopped");
        Ok(())
    }
}

// ── Connections ───────────────────────────────────────────────────────────────

async fn serve_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    app: Arc<App>,
    config: ServerConfig,
    shutdown: CancellationToken,
) {
    let activity = Arc::new(Activity::new());

    // Called once per request on the connection, not once per connection.
    let svc = {
        let activity = Arc::clone(&activity);
        service_fn(move |req| {
            let app = Arc::clone(&app);
            let activity = Arc::clone(&activity);
            async move {
                let _busy = activity.begin();
                Ok::<_, Infallible>(dispatch(&app, req, remote_addr, config).await)
            }
        })
    };

    // `auto::Builder` handles both HTTP/1.1 and HTTP/2, whatever the client
    // negotiates. No hyper timer: its header timeout also runs while a
    // keep-alive connection waits for the next request.
    let builder = ConnBuilder::new(TokioExecutor::new());
    let io = TokioIo::new(Tracked::new(stream, Arc::clone(&activity)));
    let conn = builder.serve_connection(io, svc);
    tokio::pin!(conn);

    let mut closing = false;
    loop {
        tokio::select! {
            res = conn.as_mut() => {
                if let Err(e) = res {
                    debug!(peer = %remote_addr, "connection error: {e}");
                }
                break;
            }
            () = activity.head_stalled(config.read_timeout) => {
                debug!(peer = %remote_addr, timeout = ?config.read_timeout, "request head not received in time");
                break;
            }
            () = shutdown.cancelled(), if !closing => {
                closing = true;
                conn.as_mut().graceful_shutdown();
            }
            () = activity.idle(config.idle_timeout), if !closing => {
                closing = true;
                debug!(peer = %remote_addr, "closing idle connection");
                conn.as_mut().graceful_shutdown();
            }
        }
    }
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// Core hot path: reads one request, routes it, and produces one response.
///
/// Never fails; every problem becomes a JSON error response.
async fn dispatch(
    app: &App,
    req: hyper::Request<Incoming>,
    remote_addr: SocketAddr,
    config: ServerConfig,
) -> http::Response<Full<Bytes>> {
    let ctx = Context::new(remote_addr);
    let trace_id = ctx.trace_id();
    let (parts, body) = req.into_parts();

    let response = match tokio::time::timeout(config.read_timeout, body.collect()).await {
        Ok(Ok(collected)) => app.call(ctx, Request::new(parts, collected.to_bytes())).await,
        Ok(Err(e)) => {
            debug!(%trace_id, "reading request body: {e}");
            HandlerError::request(StatusCode::BAD_REQUEST, "unable to read request body").to_response()
        }
        Err(_) => {
            warn!(%trace_id, timeout = ?config.read_timeout, "request body not received in time");
            HandlerError::request(StatusCode::REQUEST_TIMEOUT, "timed out reading request body").to_response()
        }
    };

    let mut response = response.into_inner();
    if let Ok(value) = HeaderValue::from_str(&trace_id.to_string()) {
        response.headers_mut().insert(TRACE_ID_HEADER, value);
    }
    response
}

// ── Connection activity ───────────────────────────────────────────────────────────────────────────────────────────────────────────────────

/// Per-connection activity: requests in flight, when the last one ended,
/// and whether a request head is on its way.
#[derive(Debug)]
struct Activity {
    origin: Instant,
    last_ms: AtomicU64,
    in_flight: AtomicUsize,
    /// Millis since `origin` plus one when the first byte of a pending head
    /// arrived; zero when no head is pending.
    head_ms: AtomicU64,
    head_armed: Notify,
    /// HTTP/2 reads frames between requests, so heads are not timed there.
    multiplexed: AtomicBool,
}

impl Activity {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_ms: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            head_ms: AtomicU64::new(0),
            head_armed: Notify::new(),
            multiplexed: AtomicBool::new(false),
        }
    }

    fn now_ms(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX - 1)
    }

    fn begin(self: &Arc<Self>) -> Busy {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.head_ms.store(0, Ordering::SeqCst);
        self.touch();
        Busy(Arc::clone(self))
    }

    fn touch(&self) {
        self.last_ms.store(self.now_ms(), Ordering::SeqCst);
    }

    /// Bytes arrived on the connection.
    fn received(&self) {
        if self.multiplexed.load(Ordering::SeqCst) || self.in_flight.load(Ordering::SeqCst) > 0 {
            return;
        }
        let armed = self
            .head_ms
            .compare_exchange(0, self.now_ms() + 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if armed {
            self.head_armed.notify_one();
        }
    }

    fn head_pending(&self) -> bool {
        self.head_ms.load(Ordering::SeqCst) != 0
    }

    /// Resolves once a request head has been arriving for longer than
    /// `timeout` without completing.
    async fn head_stalled(&self, timeout: Duration) {
        loop {
            let started = self.head_ms.load(Ordering::SeqCst);
            if started == 0 {
                self.head_armed.notified().await;
                continue;
            }
            let waited = Duration::from_millis(self.now_ms().saturating_sub(started - 1));
            match timeout.checked_sub(waited) {
                Some(remaining) if !remaining.is_zero() => tokio::time::sleep(remaining).await,
                _ => return,
            }
        }
    }

    /// Resolves once nothing has been in flight for `timeout`.
    async fn idle(&self, timeout: Duration) {
        loop {
            let wait = if self.in_flight.load(Ordering::SeqCst) > 0 || self.head_pending() {
                timeout
            } else {
                let last = Duration::from_millis(self.last_ms.load(Ordering::SeqCst));
                let quiet = self.origin.elapsed().saturating_sub(last);
                match timeout.checked_sub(quiet) {
                    Some(remaining) if !remaining.is_zero() => remaining,
                    _ => return,
                }
            };
            tokio::time::sleep(wait).await;
        }
    }
}

/// Marks one request in flight on a connection.
struct Busy(Arc<Activity>);

impl Drop for Busy {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.0.touch();
    }
}

const H2_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// A stream that reports reads to the connection's [`Activity`].
struct Tracked<S> {
    inner: S,
    activity: Arc<Activity>,
    sniffed: bool,
}

impl<S> Tracked<S> {
    fn new(inner: S, activity: Arc<Activity>) -> Self {
        Self { inner, activity, sniffed: false }
    }

    fn on_read(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        if !self.sniffed {
            self.sniffed = true;
            let n = bytes.len().min(H2_PREFACE.len());
            if bytes[..n] == H2_PREFACE[..n] {
                self.activity.multiplexed.store(true, Ordering::SeqCst);
            }
        }
        self.activity.received();
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Tracked<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let res = Pin::new(&mut self.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = res {
            self.on_read(&buf.filled()[before..]);
        }
        res
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Tracked<S> {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
