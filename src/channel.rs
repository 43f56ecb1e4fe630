use std::io::{BufRead, BufReader, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

/// How long a broadcast write may block on one client before that client is
/// dropped; keeps a stalled peer from wedging the whole channel.
const CLIENT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Transport seam between the controller and whatever carries the protocol
/// strings. The controller only ever broadcasts replies and closes the
/// channel; inbound delivery is wired up separately by subscribing a
/// handler, which lets tests drive the controller with no transport at all.
pub trait MessagingChannel: Send + Sync {
    /// Send a message to all connected parties.
    fn broadcast(&self, message: &str);
    /// Stop accepting new messages and release underlying resources.
    /// Idempotent.
    fn close(&self);
}

type MessageHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Line-oriented TCP broadcast server: every newline-terminated message from
/// any client is handed to the subscribed handler, and every broadcast goes
/// to all live clients.
pub struct TcpServerChannel {
    shared: Arc<Shared>,
    local_addr: SocketAddr,
}

struct Shared {
    clients: Mutex<Vec<TcpStream>>,
    handler: Mutex<Option<MessageHandler>>,
    // Held around every handler invocation: the controller expects one
    // command at a time no matter how many clients are connected.
    dispatch: Mutex<()>,
    closed: AtomicBool,
}

impl TcpServerChannel {
    pub fn bind(port: u16) -> Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port))
            .with_context(|| format!("binding command socket on port {port}"))?;
        let local_addr = listener
            .local_addr()
            .context("resolving command socket address")?;
        info!("listening for commands on {local_addr}");

        let shared = Arc::new(Shared {
            clients: Mutex::new(Vec::new()),
            handler: Mutex::new(None),
            dispatch: Mutex::new(()),
            closed: AtomicBool::new(false),
        });

        let accept_shared = shared.clone();
        thread::spawn(move || accept_loop(listener, accept_shared));

        Ok(Self { shared, local_addr })
    }

    /// Register the handler invoked for each complete inbound message.
    /// Messages arriving before subscription are dropped.
    pub fn subscribe(&self, handler: impl Fn(&str) + Send + Sync + 'static) {
        *self.shared.handler.lock().unwrap() = Some(Arc::new(handler));
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }
}

impl MessagingChannel for TcpServerChannel {
    fn broadcast(&self, message: &str) {
        let mut clients = self.shared.clients.lock().unwrap();
        clients.retain_mut(|stream| {
            let ok = stream
                .write_all(message.as_bytes())
                .and_then(|()| stream.write_all(b"\n"))
                .is_ok();
            if !ok {
                debug!("dropping client after failed write");
            }
            ok
        });
    }

    fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // Poke the accept loop so it observes the flag and exits.
        let _ = TcpStream::connect(("127.0.0.1", self.local_addr.port()));
        for stream in self.shared.clients.lock().unwrap().drain(..) {
            let _ = stream.shutdown(Shutdown::Both);
        }
        info!("command channel closed");
    }
}

impl Drop for TcpServerChannel {
    fn drop(&mut self) {
        self.close();
    }
}

fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    for stream in listener.incoming() {
        if shared.closed.load(Ordering::SeqCst) {
            break;
        }
        match stream {
            Ok(stream) => {
                let peer = stream
                    .peer_addr()
                    .map(|a| a.to_string())
                    .unwrap_or_else(|_| "<unknown>".into());
                info!("client connected: {peer}");
                if let Ok(writer) = stream.try_clone() {
                    let _ = writer.set_write_timeout(Some(CLIENT_WRITE_TIMEOUT));
                    shared.clients.lock().unwrap().push(writer);
                }
                let reader_shared = shared.clone();
                thread::spawn(move || read_loop(stream, peer, reader_shared));
            }
            Err(err) => warn!("accept failed: {err}"),
        }
    }
}

fn read_loop(stream: TcpStream, peer: String, shared: Arc<Shared>) {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break, // disconnected
            Ok(_) => {
                let message = line.trim_end_matches(['\r', '\n']);
                if message.is_empty() {
                    continue;
                }
                let handler = shared.handler.lock().unwrap().clone();
                match handler {
                    Some(handler) => {
                        // One command at a time across all connections.
                        let _dispatch = shared.dispatch.lock().unwrap();
                        handler(message);
                    }
                    None => debug!("no handler subscribed, dropping: {message}"),
                }
            }
            Err(err) => {
                debug!("read from {peer} failed: {err}");
                break;
            }
        }
    }
    info!("client disconnected: {peer}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn delivers_lines_and_broadcasts_replies() {
        let channel = TcpServerChannel::bind(0).unwrap();
        let seen = Arc::new(Mutex::new(Vec::<String>::new()));
        {
            let seen = seen.clone();
            channel.subscribe(move |msg| seen.lock().unwrap().push(msg.to_string()));
        }

        let mut client = TcpStream::connect(("127.0.0.1", channel.port())).unwrap();
        client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        client.write_all(b"STOP\r\n").unwrap();

        assert!(wait_until(Duration::from_secs(5), || {
            !seen.lock().unwrap().is_empty()
        }));
        assert_eq!(seen.lock().unwrap().as_slice(), ["STOP".to_string()]);

        channel.broadcast("ACK|STOP");
        let mut reply = String::new();
        BufReader::new(client).read_line(&mut reply).unwrap();
        assert_eq!(reply, "ACK|STOP\n");

        channel.close();
        channel.close(); // idempotent
    }

    #[test]
    fn concurrent_clients_are_dispatched_one_at_a_time() {
        let channel = TcpServerChannel::bind(0).unwrap();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let overlapped = Arc::new(AtomicBool::new(false));
        let handled = Arc::new(AtomicUsize::new(0));
        {
            let in_flight = in_flight.clone();
            let overlapped = overlapped.clone();
            let handled = handled.clone();
            channel.subscribe(move |_message| {
                if in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
                    overlapped.store(true, Ordering::SeqCst);
                }
                // Dwell long enough that simultaneous sends would overlap
                // if dispatch were not serialized.
                thread::sleep(Duration::from_millis(50));
                in_flight.fetch_sub(1, Ordering::SeqCst);
                handled.fetch_add(1, Ordering::SeqCst);
            });
        }

        let mut first = TcpStream::connect(("127.0.0.1", channel.port())).unwrap();
        let mut second = TcpStream::connect(("127.0.0.1", channel.port())).unwrap();
        first.write_all(b"STOP\n").unwrap();
        second.write_all(b"FLUSH\n").unwrap();

        assert!(wait_until(Duration::from_secs(5), || {
            handled.load(Ordering::SeqCst) == 2
        }));
        assert!(
            !overlapped.load(Ordering::SeqCst),
            "handler ran for two clients at once"
        );
        channel.close();
    }

    #[test]
    fn unwritable_clients_are_dropped_on_broadcast() {
        let channel = TcpServerChannel::bind(0).unwrap();
        let client = TcpStream::connect(("127.0.0.1", channel.port())).unwrap();
        assert!(wait_until(Duration::from_secs(5), || {
            channel.shared.clients.lock().unwrap().len() == 1
        }));

        drop(client);
        // Writes to the closed peer fail once the reset lands; keep
        // broadcasting until the dead client is pruned.
        assert!(wait_until(Duration::from_secs(5), || {
            channel.broadcast("SAMPLING_DONE");
            channel.shared.clients.lock().unwrap().is_empty()
        }));
        channel.close();
    }
}
