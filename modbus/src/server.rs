//! Per-device TCP listener and connection handlers.
//!
//! One listener per device; each accepted connection gets its own handler
//! thread and is the sole owner of its socket. Requests are self-contained
//! (there is no per-connection session state), so the only cross-handler
//! coupling is the point store.
//!
//! # Cancellation
//!
//! The accept loop and every connection poll a shared cancellation flag.
//! The listener socket is nonblocking and polled on a short interval;
//! connections use a short read timeout as their poll point. After the
//! device's stop grace period, anything still running is abandoned
//! (threads are detached and exit at their next poll).

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::engine::RequestHandler;
use crate::exception::ExceptionCode;
use crate::frame::{self, FrameError};
use crate::pdu;

/// Poll interval of the nonblocking accept loop.
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Read timeout of connection sockets; doubles as the cancellation poll
/// interval.
const READ_POLL: Duration = Duration::from_millis(200);

/// A connection with no complete request within this window is closed.
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// A running per-device listener.
pub struct SlaveListener {
    local_addr: SocketAddr,
    thread: JoinHandle<()>,
}

impl SlaveListener {
    /// Bind `addr` and start accepting.
    ///
    /// Binding to port 0 picks an ephemeral port; the actual address is
    /// reported by [`local_addr`](Self::local_addr).
    pub fn spawn(
        addr: SocketAddr,
        handler: Arc<RequestHandler>,
        cancel: Arc<AtomicBool>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let device = handler.device();
        let thread = thread::Builder::new()
            .name(format!("modsim-accept-{}", local_addr.port()))
            .spawn(move || accept_loop(listener, handler, cancel))?;

        log::info!("{device}: listening on {local_addr}");
        Ok(Self { local_addr, thread })
    }

    /// The actually bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait up to `grace` for the accept loop to finish after
    /// cancellation. Returns `false` if it had to be abandoned.
    pub fn join(self, grace: Duration) -> bool {
        let deadline = Instant::now() + grace;
        while !self.thread.is_finished() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(10));
        }
        self.thread.join().is_ok()
    }
}

fn accept_loop(listener: TcpListener, handler: Arc<RequestHandler>, cancel: Arc<AtomicBool>) {
    let device = handler.device();
    while !cancel.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(e) = prepare_stream(&stream) {
                    log::warn!("{device}: failed to prepare connection from {peer}: {e}");
                    continue;
                }
                let handler = handler.clone();
                let cancel = cancel.clone();
                let spawned = thread::Builder::new()
                    .name(format!("modsim-conn-{peer}"))
                    .spawn(move || connection_loop(stream, peer, handler, cancel));
                if let Err(e) = spawned {
                    log::warn!("{device}: could not spawn handler for {peer}: {e}");
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL);
            }
            Err(e) => {
                log::error!("{device}: accept failed: {e}");
                thread::sleep(ACCEPT_POLL);
            }
        }
    }
    log::debug!("{device}: accept loop exited");
}

fn prepare_stream(stream: &TcpStream) -> io::Result<()> {
    stream.set_read_timeout(Some(READ_POLL))?;
    stream.set_nodelay(true)
}

fn connection_loop(
    mut stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<RequestHandler>,
    cancel: Arc<AtomicBool>,
) {
    let device = handler.device();
    log::debug!("{device}: client {peer} connected");
    loop {
        match frame::read_request(&mut stream, &cancel, IDLE_TIMEOUT) {
            Ok((header, request)) => {
                let fc = request.first().copied().unwrap_or(0);
                // A panicking handler answers exception 4 and keeps the
                // connection; the next request starts clean.
                let response =
                    panic::catch_unwind(AssertUnwindSafe(|| handler.handle_pdu(&request)))
                        .unwrap_or_else(|_| {
                            log::error!("{device}: request handler panicked on fc {fc:#04x}");
                            pdu::exception_response(fc, ExceptionCode::ServerDeviceFailure)
                        });
                if let Err(e) = frame::write_response(&mut stream, &header, &response) {
                    log::debug!("{device}: write to {peer} failed: {e}");
                    break;
                }
            }
            Err(FrameError::Closed) => {
                log::debug!("{device}: client {peer} disconnected");
                break;
            }
            Err(FrameError::Cancelled) => break,
            Err(FrameError::IdleTimeout) => {
                log::debug!("{device}: closing idle connection from {peer}");
                break;
            }
            Err(e @ (FrameError::BadProtocolId(_) | FrameError::BadLength(_))) => {
                // Malformed framing is unanswerable: close without a response.
                log::debug!("{device}: malformed frame from {peer}: {e}");
                break;
            }
            Err(FrameError::Io(e)) => {
                log::debug!("{device}: read from {peer} failed: {e}");
                break;
            }
        }
    }
}
