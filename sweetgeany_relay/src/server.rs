// TCP command listener.
//
// Architecture: one accept thread plus one short-lived worker thread per
// connection.
//
// - **Accept thread** (`AcceptLoop::run`): waits for the listening socket to
//   become readable with a bounded timeout (`poll_interval`, 0.5 s by
//   default), accepts, and hands each connection to a new worker. Between
//   waits it checks `keep_running`, so a stop request is seen within one
//   poll interval. Accept errors are logged and the loop pauses one poll
//   interval before carrying on.
// - **Workers** (`handle_connection`): read one line before a
//   whole-connection deadline, parse it, dispatch it, close the socket.
//   Every failure stays inside the worker and ends up in the log; nothing is
//   written back to the client.
//
// Shutdown: `CommandListener::stop` clears `keep_running` and joins the
// accept thread. The accept thread drops the listening socket first (so the
// port is free as soon as `stop` returns) and then joins the workers still in
// flight, each of which ends by its connection deadline. Accepted connections
// are therefore always served, never cut off.
//
// The listening socket is built with `socket2` so the small fixed backlog can
// be set. On Unix readiness is awaited with a single `poll(2)` call; elsewhere
// a non-blocking accept after a short sleep stands in.

use std::io::{self, BufReader, Read};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Socket, Type};
use sweetgeany_protocol::{RelayCommand, parse_command, read_line};
use tracing::{debug, error, info, warn};

use crate::config::RelayConfig;
use crate::correlate::{Delivery, ReplyCorrelator};
use crate::dispatch::Dispatcher;
use crate::error::{ConnectionError, ListenerError};
use crate::outbound::OutboundReply;
use crate::registry::SessionRegistry;

/// Lifecycle of a `CommandListener`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListenerState {
    Stopped,
    Binding,
    Serving,
    ShuttingDown,
}

/// Per-connection limits handed to each worker.
#[derive(Clone, Copy, Debug)]
struct ConnectionSettings {
    /// Total time a client gets to deliver its line.
    read_timeout: Duration,
    max_line_len: usize,
}

/// Single-port TCP server feeding relay commands to a `Dispatcher`.
pub struct CommandListener {
    config: RelayConfig,
    dispatcher: Arc<Dispatcher>,
    state: ListenerState,
    keep_running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl CommandListener {
    pub fn new(config: RelayConfig, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            config,
            dispatcher,
            state: ListenerState::Stopped,
            keep_running: Arc::new(AtomicBool::new(false)),
            thread: None,
            local_addr: None,
        }
    }

    pub fn state(&self) -> ListenerState {
        self.state
    }

    /// Address actually bound while serving (useful with port 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Bind the listening socket and start the accept thread. On failure the
    /// listener stays `Stopped` and may be started again later.
    pub fn start(&mut self) -> Result<SocketAddr, ListenerError> {
        if self.state != ListenerState::Stopped {
            return Err(ListenerError::AlreadyRunning);
        }
        self.state = ListenerState::Binding;
        match self.bind_and_spawn() {
            Ok(addr) => {
                self.state = ListenerState::Serving;
                Ok(addr)
            }
            Err(e) => {
                self.state = ListenerState::Stopped;
                Err(e)
            }
        }
    }

    fn bind_and_spawn(&mut self) -> Result<SocketAddr, ListenerError> {
        self.config.validate()?;
        let addr = self.config.bind_addr();
        let bind_error = |source| ListenerError::Bind {
            addr: addr.clone(),
            source,
        };

        let listener = resolve_and_bind(&addr, self.config.backlog).map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;
        listener.set_nonblocking(true).map_err(bind_error)?;

        let keep_running = Arc::new(AtomicBool::new(true));
        let accept_loop = AcceptLoop {
            listener,
            dispatcher: Arc::clone(&self.dispatcher),
            keep_running: Arc::clone(&keep_running),
            poll_interval: self.config.poll_interval(),
            settings: ConnectionSettings {
                read_timeout: self.config.read_timeout(),
                max_line_len: self.config.max_line_len,
            },
        };
        let thread = thread::Builder::new()
            .name("relay-accept".into())
            .spawn(move || accept_loop.run())
            .map_err(ListenerError::Spawn)?;

        info!(addr = %local_addr, "command listener serving");
        self.keep_running = keep_running;
        self.thread = Some(thread);
        self.local_addr = Some(local_addr);
        Ok(local_addr)
    }

    /// Stop accepting and block until the accept thread has exited, the port
    /// is released, and in-flight connections are done. No-op unless serving.
    pub fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.state = ListenerState::ShuttingDown;
        info!("command listener shutting down");
        self.keep_running.store(false, Ordering::SeqCst);
        if thread.join().is_err() {
            error!("command listener accept thread panicked");
        }
        self.local_addr = None;
        self.state = ListenerState::Stopped;
    }
}

impl Drop for CommandListener {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Handle returned by `start_relay`: the running listener plus the reply
/// correlator the host consults before delivering replies.
pub struct RelayHandle {
    listener: CommandListener,
    correlator: Option<Arc<ReplyCorrelator>>,
}

impl RelayHandle {
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn correlator(&self) -> Option<&Arc<ReplyCorrelator>> {
        self.correlator.as_ref()
    }

    /// Route a reply the host is about to deliver. Always `Passthrough` when
    /// correlation is disabled.
    pub fn maybe_redirect(&self, reply: &OutboundReply) -> Delivery {
        match &self.correlator {
            Some(correlator) => correlator.maybe_redirect(reply),
            None => Delivery::Passthrough,
        }
    }

    /// Signal the listener to stop and wait for it to shut down.
    pub fn stop(mut self) {
        self.listener.stop();
    }
}

/// Wire up a dispatcher (and a correlator, if `reply_mode` is set) over
/// `registry` and start listening. Returns the handle and the bound address.
pub fn start_relay(
    config: RelayConfig,
    registry: Arc<dyn SessionRegistry>,
) -> Result<(RelayHandle, SocketAddr), ListenerError> {
    config.validate()?;
    let mut dispatcher = Dispatcher::new(registry);
    let mut correlator = None;
    if let Some(reply_kind) = config.reply_mode {
        let shared = Arc::new(ReplyCorrelator::new(config.correlation_ttl()));
        dispatcher = dispatcher.with_correlation(Arc::clone(&shared), reply_kind);
        correlator = Some(shared);
    }

    let mut listener = CommandListener::new(config, Arc::new(dispatcher));
    let addr = listener.start()?;
    Ok((
        RelayHandle {
            listener,
            correlator,
        },
        addr,
    ))
}

/// State owned by the accept thread.
struct AcceptLoop {
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    keep_running: Arc<AtomicBool>,
    poll_interval: Duration,
    settings: ConnectionSettings,
}

impl AcceptLoop {
    fn run(self) {
        let AcceptLoop {
            listener,
            dispatcher,
            keep_running,
            poll_interval,
            settings,
        } = self;
        let mut workers: Vec<JoinHandle<()>> = Vec::new();

        while keep_running.load(Ordering::SeqCst) {
            let accepted = wait_readable(&listener, poll_interval).and_then(|ready| {
                if ready {
                    accept_one(&listener, &dispatcher, settings, &mut workers)
                } else {
                    Ok(())
                }
            });
            if let Err(e) = accepted {
                // Persistent failures (EMFILE) keep the socket readable.
                warn!(error = %e, "failed to accept command connection");
                thread::sleep(poll_interval);
            }
            workers = reap_finished(workers);
        }

        drop(listener);
        if !workers.is_empty() {
            debug!(count = workers.len(), "waiting for in-flight connections");
        }
        for worker in workers {
            if worker.join().is_err() {
                warn!("connection worker panicked");
            }
        }
        info!("command listener stopped");
    }
}

/// Accept one pending connection and start its worker. A spurious wakeup is
/// not an error; any other accept failure is returned.
fn accept_one(
    listener: &TcpListener,
    dispatcher: &Arc<Dispatcher>,
    settings: ConnectionSettings,
    workers: &mut Vec<JoinHandle<()>>,
) -> io::Result<()> {
    let (stream, peer) = match listener.accept() {
        Ok(accepted) => accepted,
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
        Err(e) => return Err(e),
    };

    let dispatcher = Arc::clone(dispatcher);
    let spawned = thread::Builder::new()
        .name("relay-conn".into())
        .spawn(move || handle_connection(stream, peer, &dispatcher, settings));
    match spawned {
        Ok(worker) => workers.push(worker),
        Err(e) => warn!(%peer, error = %e, "failed to spawn connection worker"),
    }
    Ok(())
}

/// Join finished workers (logging panics) and keep the rest.
fn reap_finished(workers: Vec<JoinHandle<()>>) -> Vec<JoinHandle<()>> {
    let (finished, running): (Vec<_>, Vec<_>) =
        workers.into_iter().partition(|worker| worker.is_finished());
    for worker in finished {
        if worker.join().is_err() {
            warn!("connection worker panicked");
        }
    }
    running
}

/// Serve one connection: one command, then close. Runs on a worker thread.
fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    dispatcher: &Dispatcher,
    settings: ConnectionSettings,
) {
    match serve_command(stream, dispatcher, settings) {
        Ok(command) => debug!(
            %peer,
            network = %command.network,
            destination = %command.destination,
            "socket command relayed"
        ),
        Err(ConnectionError::NoCommand) => {
            debug!(%peer, "connection closed without a command");
        }
        Err(e @ ConnectionError::Relay(_)) => {
            warn!(%peer, error = %e, "dropped socket command");
        }
        Err(e) => warn!(%peer, error = %e, "rejected socket connection"),
    }
}

fn serve_command(
    stream: TcpStream,
    dispatcher: &Dispatcher,
    settings: ConnectionSettings,
) -> Result<RelayCommand, ConnectionError> {
    // Accepted sockets inherit the listener's non-blocking flag on some
    // platforms.
    stream.set_nonblocking(false)?;

    let mut reader = BufReader::new(DeadlineStream::new(stream, settings.read_timeout));
    let line = read_line(&mut reader, settings.max_line_len)?.ok_or(ConnectionError::NoCommand)?;
    debug!(line = %String::from_utf8_lossy(&line), "got data from socket");

    let command = parse_command(&line)?;
    dispatcher.relay_command(&command)?;
    Ok(command)
}

/// Socket reader with a deadline for the whole connection rather than for
/// each `read`, so a client trickling bytes cannot hold a worker open.
struct DeadlineStream {
    stream: TcpStream,
    deadline: Instant,
}

impl DeadlineStream {
    fn new(stream: TcpStream, budget: Duration) -> Self {
        Self {
            stream,
            deadline: Instant::now() + budget,
        }
    }
}

impl Read for DeadlineStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "client did not send a complete command in time",
            ));
        }
        self.stream.set_read_timeout(Some(remaining))?;
        self.stream.read(buf)
    }
}

fn resolve_and_bind(addr: &str, backlog: u32) -> io::Result<TcpListener> {
    let mut last_err = None;
    for candidate in addr.to_socket_addrs()? {
        match bind_listener(candidate, backlog) {
            Ok(listener) => return Ok(listener),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            "address resolved to nothing",
        )
    }))
}

fn bind_listener(addr: SocketAddr, backlog: u32) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    // On Windows SO_REUSEADDR lets another process steal the port.
    #[cfg(unix)]
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(i32::try_from(backlog).unwrap_or(i32::MAX))?;
    Ok(socket.into())
}

/// Wait until the listener has a pending connection or `timeout` elapses.
#[cfg(unix)]
fn wait_readable(listener: &TcpListener, timeout: Duration) -> io::Result<bool> {
    use std::os::fd::AsRawFd;

    let mut pollfd = libc::pollfd {
        fd: listener.as_raw_fd(),
        events: libc::POLLIN,
        revents: 0,
    };
    let timeout_ms = libc::c_int::try_from(timeout.as_millis()).unwrap_or(libc::c_int::MAX);
    // SAFETY: a single valid `pollfd` that lives for the whole call.
    let ready = unsafe { libc::poll(&raw mut pollfd, 1, timeout_ms) };
    if ready < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(err);
    }
    Ok(ready > 0)
}

#[cfg(not(unix))]
fn wait_readable(_listener: &TcpListener, timeout: Duration) -> io::Result<bool> {
    // No portable readiness wait in std; the accept is non-blocking, so just
    // try it after a short nap.
    thread::sleep(timeout.min(Duration::from_millis(50)));
    Ok(true)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::registry::SessionTable;
    use crate::test_support::RecordingSession;

    fn test_config(port: u16) -> RelayConfig {
        RelayConfig {
            port,
            poll_interval_ms: 50,
            read_timeout_ms: 1000,
            ..RelayConfig::default()
        }
    }

    fn listener_with(session: Arc<RecordingSession>, port: u16) -> CommandListener {
        let table = Arc::new(SessionTable::new());
        table.insert(session);
        CommandListener::new(test_config(port), Arc::new(Dispatcher::new(table)))
    }

    fn wait_for(mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn start_then_stop_walks_the_states() {
        let mut listener = listener_with(RecordingSession::new("Freenode", &[]), 0);
        assert_eq!(listener.state(), ListenerState::Stopped);

        let addr = listener.start().unwrap();
        assert_eq!(listener.state(), ListenerState::Serving);
        assert_eq!(listener.local_addr(), Some(addr));

        let started = Instant::now();
        listener.stop();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(listener.state(), ListenerState::Stopped);
        assert_eq!(listener.local_addr(), None);
    }

    #[test]
    fn second_start_is_rejected_while_serving() {
        let mut listener = listener_with(RecordingSession::new("Freenode", &[]), 0);
        listener.start().unwrap();
        assert!(matches!(listener.start(), Err(ListenerError::AlreadyRunning)));
        listener.stop();
    }

    #[test]
    fn port_is_released_after_stop() {
        let mut listener = listener_with(RecordingSession::new("Freenode", &[]), 0);
        let addr = listener.start().unwrap();
        listener.stop();

        let mut again = listener_with(RecordingSession::new("Freenode", &[]), addr.port());
        assert_eq!(again.start().unwrap().port(), addr.port());
        again.stop();
    }

    #[test]
    fn bind_failure_leaves_listener_stopped() {
        let occupied = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = occupied.local_addr().unwrap().port();

        let mut listener = listener_with(RecordingSession::new("Freenode", &[]), port);
        assert!(matches!(listener.start(), Err(ListenerError::Bind { .. })));
        assert_eq!(listener.state(), ListenerState::Stopped);

        drop(occupied);
        listener.start().unwrap();
        listener.stop();
    }

    #[test]
    fn invalid_config_is_rejected_before_binding() {
        let table = Arc::new(SessionTable::new());
        let config = RelayConfig {
            port: 0,
            backlog: 0,
            ..RelayConfig::default()
        };
        let mut listener = CommandListener::new(config, Arc::new(Dispatcher::new(table)));
        assert!(matches!(listener.start(), Err(ListenerError::Config(_))));
        assert_eq!(listener.state(), ListenerState::Stopped);
    }

    #[test]
    fn relays_one_command_per_connection() {
        let session = RecordingSession::new("Freenode", &["#geany"]);
        let mut listener = listener_with(session.clone(), 0);
        let addr = listener.start().unwrap();

        let mut client = TcpStream::connect(addr).unwrap();
        client
            .write_all(b"Freenode #geany first\nFreenode #geany second\n")
            .unwrap();
        drop(client);

        assert!(wait_for(|| !session.sent().is_empty()));
        listener.stop();
        let sent = session.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].text, "first");
    }

    #[test]
    fn stop_waits_for_in_flight_connection() {
        let session = RecordingSession::new("Freenode", &["#geany"]);
        let mut listener = listener_with(session.clone(), 0);
        let addr = listener.start().unwrap();

        // Connected but the command is only half written when stop begins.
        let mut client = TcpStream::connect(addr).unwrap();
        client.write_all(b"Freenode #geany late").unwrap();
        thread::sleep(Duration::from_millis(200));

        let writer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            client.write_all(b" arrival\n").unwrap();
        });
        listener.stop();
        writer.join().unwrap();

        let sent = session.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].text, "late arrival");
    }

    #[test]
    fn silent_client_times_out_without_dispatch() {
        let session = RecordingSession::new("Freenode", &["#geany"]);
        let mut listener = listener_with(session.clone(), 0);
        let addr = listener.start().unwrap();

        let _client = TcpStream::connect(addr).unwrap();
        thread::sleep(Duration::from_millis(100));
        let started = Instant::now();
        listener.stop();

        // Bounded by the 1 s connection deadline in `test_config`.
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(session.sent().is_empty());
    }

    #[test]
    fn trickling_client_cannot_hold_stop_open() {
        let session = RecordingSession::new("Freenode", &["#geany"]);
        let mut listener = listener_with(session.clone(), 0);
        let addr = listener.start().unwrap();

        // Each byte arrives well inside a single read timeout.
        let mut client = TcpStream::connect(addr).unwrap();
        let trickler = thread::spawn(move || {
            for _ in 0..30 {
                if client.write_all(b"x").is_err() {
                    break;
                }
                thread::sleep(Duration::from_millis(300));
            }
        });
        thread::sleep(Duration::from_millis(100));

        let started = Instant::now();
        listener.stop();
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(session.sent().is_empty());
        trickler.join().unwrap();
    }

    #[test]
    fn panicking_worker_does_not_stop_the_listener() {
        let session = RecordingSession::new("Freenode", &["#geany"]);
        let mut listener = listener_with(session.clone(), 0);
        let addr = listener.start().unwrap();

        session.set_panicking(true);
        TcpStream::connect(addr)
            .unwrap()
            .write_all(b"Freenode #geany boom\n")
            .unwrap();
        assert!(wait_for(|| session.panic_count() == 1));
        session.set_panicking(false);

        TcpStream::connect(addr)
            .unwrap()
            .write_all(b"Freenode #geany still serving\n")
            .unwrap();
        assert!(wait_for(|| !session.sent().is_empty()));
        assert_eq!(listener.state(), ListenerState::Serving);
        listener.stop();
        assert_eq!(session.sent()[0].text, "still serving");
    }

    fn failing_worker() {
        panic!("worker failed");
    }

    #[test]
    fn reaping_a_panicked_worker_keeps_running_ones() {
        let panicked = thread::spawn(failing_worker);
        let (release, released) = std::sync::mpsc::channel::<()>();
        let running = thread::spawn(move || {
            let _ = released.recv();
        });
        assert!(wait_for(|| panicked.is_finished()));

        let remaining = reap_finished(vec![panicked, running]);
        assert_eq!(remaining.len(), 1);
        release.send(()).unwrap();
        for worker in remaining {
            worker.join().unwrap();
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn accept_failure_is_returned_for_backoff() {
        // Bound but never listening: accept fails with EINVAL every time.
        let socket = Socket::new(Domain::IPV4, Type::STREAM, None).unwrap();
        let local: SocketAddr = "127.0.0.1:0".parse().unwrap();
        socket.bind(&local.into()).unwrap();
        let not_listening: TcpListener = socket.into();
        not_listening.set_nonblocking(true).unwrap();

        let dispatcher = Arc::new(Dispatcher::new(Arc::new(SessionTable::new())));
        let settings = ConnectionSettings {
            read_timeout: Duration::from_secs(1),
            max_line_len: 64,
        };
        let mut workers = Vec::new();
        let err = accept_one(&not_listening, &dispatcher, settings, &mut workers).unwrap_err();
        assert_ne!(err.kind(), io::ErrorKind::WouldBlock);
        assert!(workers.is_empty());
    }

    #[test]
    fn start_relay_wires_correlation_from_config() {
        let table = Arc::new(SessionTable::new());
        let (handle, _addr) = start_relay(test_config(0), table.clone()).unwrap();
        assert!(handle.correlator().is_some());
        handle.stop();

        let config = RelayConfig {
            reply_mode: None,
            ..test_config(0)
        };
        let (handle, _addr) = start_relay(config, table).unwrap();
        assert!(handle.correlator().is_none());
        let reply = OutboundReply {
            target: "#geany".into(),
            text: "x".into(),
            in_reply_to: None,
        };
        assert_eq!(handle.maybe_redirect(&reply), Delivery::Passthrough);
        handle.stop();
    }
}
