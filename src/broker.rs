//! Process-wide demultiplexer (§4.5): one raw socket, one reader thread,
//! one registry mutex mapping (remote, local) to connections and local
//! addresses to listeners.
//!
//! Grounded on `au_stream_socket_impl.h`'s `messages_broker` singleton and
//! its `process_packet` dispatch order (connection lookup, then listener
//! lookup on SYN, then drop-with-log).

use crate::codec::{decode, Flags};
use crate::connection::Connection;
use crate::endpoint::Endpoint;
use crate::error::{AuError, AuResult};
use crate::listener::Listener;
use crate::raw::RawSocket;
use crate::retry::RetryScheduler;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, Once, OnceLock};
use std::thread;

struct Registry {
    listeners: HashMap<Endpoint, Arc<Listener>>,
    connections: HashMap<Endpoint, HashMap<Endpoint, Arc<Connection>>>,
}

/// The process-wide singleton: registry plus the shared retry scheduler
/// every connection's retransmission timers run on.
pub struct Broker {
    registry: Mutex<Registry>,
    retry: Arc<RetryScheduler>,
}

static BROKER: OnceLock<Broker> = OnceLock::new();
static READER_STARTED: Once = Once::new();

/// Returns the process-wide broker, starting its reader thread on first use.
///
/// The registry is fully initialized (via `OnceLock::get_or_init`) before
/// the reader thread is spawned, so `run_reader` can call `global()` itself
/// without racing its own initialization.
pub fn global() -> &'static Broker {
    let broker = BROKER.get_or_init(Broker::new);
    READER_STARTED.call_once(|| {
        thread::spawn(run_reader);
    });
    broker
}

impl Broker {
    fn new() -> Self {
        Broker {
            registry: Mutex::new(Registry {
                listeners: HashMap::new(),
                connections: HashMap::new(),
            }),
            retry: Arc::new(RetryScheduler::new()),
        }
    }

    pub fn retry_scheduler(&self) -> Arc<RetryScheduler> {
        Arc::clone(&self.retry)
    }

    pub fn start_listen(&self, listener: Arc<Listener>) -> AuResult<()> {
        let mut guard = self.registry.lock().unwrap();
        if guard.listeners.contains_key(&listener.addr()) {
            return Err(AuError::SocketError(
                "someone already listens on this local port".into(),
            ));
        }
        info!("listening on {}", listener.addr());
        guard.listeners.insert(listener.addr(), listener);
        Ok(())
    }

    pub fn stop_listen(&self, addr: Endpoint) {
        let mut guard = self.registry.lock().unwrap();
        if let Some(listener) = guard.listeners.remove(&addr) {
            drop(guard);
            listener.shutdown();
            info!("stopped listening on {addr}");
        }
    }

    pub fn add_connection(&self, conn: Arc<Connection>) -> AuResult<()> {
        let mut guard = self.registry.lock().unwrap();
        self.add_connection_lock_held(&mut guard, conn)
    }

    fn add_connection_lock_held(&self, guard: &mut Registry, conn: Arc<Connection>) -> AuResult<()> {
        let peers = guard.connections.entry(conn.remote()).or_default();
        if peers.contains_key(&conn.local()) {
            return Err(AuError::SocketError("there is already a similar connection".into()));
        }
        peers.insert(conn.local(), conn);
        Ok(())
    }

    pub fn remove_connection(&self, local: Endpoint, remote: Endpoint) {
        let mut guard = self.registry.lock().unwrap();
        self.remove_connection_lock_held(&mut guard, local, remote);
    }

    fn remove_connection_lock_held(&self, guard: &mut Registry, local: Endpoint, remote: Endpoint) {
        if let Some(peers) = guard.connections.get_mut(&remote) {
            peers.remove(&local);
            if peers.is_empty() {
                guard.connections.remove(&remote);
            }
        }
    }

    /// Looks up the connection/listener for an inbound datagram and
    /// dispatches it, matching `process_packet`'s lookup order.
    fn dispatch(&self, source: Ipv4Addr, dest: Ipv4Addr, payload: &[u8]) {
        let packet = match decode(source, dest, payload) {
            Ok(p) => p,
            Err(err) => {
                warn!("dropping malformed datagram from {source}: {err}");
                return;
            }
        };

        let mut guard = self.registry.lock().unwrap();
        if let Some(conn) = guard
            .connections
            .get(&packet.source)
            .and_then(|peers| peers.get(&packet.dest))
            .cloned()
        {
            drop(guard);
            conn.on_packet(packet);
            return;
        }

        if packet.flags == Flags::SYN {
            let listener = guard
                .listeners
                .iter()
                .find(|(addr, _)| addr.matches(&packet.dest))
                .map(|(_, listener)| Arc::clone(listener));
            if let Some(listener) = listener {
                match Connection::new(packet.dest, packet.source, self.retry_scheduler()) {
                    Ok(conn) => {
                        if self.add_connection_lock_held(&mut guard, Arc::clone(&conn)).is_ok() {
                            drop(guard);
                            debug!("{} accepting connection from {}", packet.dest, packet.source);
                            conn.on_packet(packet);
                            listener.add_client(conn);
                        }
                    }
                    Err(err) => warn!("failed to accept connection from {}: {err}", packet.source),
                }
                return;
            }
        }

        drop(guard);
        warn!("no destination for datagram from {} to {}", packet.source, packet.dest);
    }
}

fn run_reader() {
    let socket = match RawSocket::bind(Ipv4Addr::UNSPECIFIED) {
        Ok(socket) => socket,
        Err(err) => {
            warn!("broker failed to open its raw socket: {err}");
            return;
        }
    };
    loop {
        match socket.recv_from() {
            Ok(received) => {
                global().dispatch(received.source_addr, received.dest_addr, &received.payload)
            }
            Err(err) => warn!("broker recv failed: {err}"),
        }
    }
}
