//! Accept queue for inbound connections (§4.7).
//!
//! Grounded on `au_stream_socket_impl.h`'s `listener_impl`: a FIFO of
//! accepted-but-not-yet-claimed connections guarded by one mutex and a
//! condition variable, plus a shutdown flag `accept_one_client` observes.

use crate::connection::Connection;
use crate::endpoint::Endpoint;
use crate::error::{AuError, AuResult};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

struct State {
    clients: VecDeque<Arc<Connection>>,
    shut_down: bool,
}

pub struct Listener {
    addr: Endpoint,
    state: Mutex<State>,
    wakeup: Condvar,
}

impl Listener {
    pub fn new(addr: Endpoint) -> Self {
        Listener {
            addr,
            state: Mutex::new(State {
                clients: VecDeque::new(),
                shut_down: false,
            }),
            wakeup: Condvar::new(),
        }
    }

    pub fn addr(&self) -> Endpoint {
        self.addr
    }

    /// Queues a freshly handshaking connection for a future `accept_one_client`.
    pub fn add_client(&self, conn: Arc<Connection>) {
        let mut guard = self.state.lock().unwrap();
        guard.clients.push_back(conn);
        self.wakeup.notify_one();
    }

    /// Blocks until a client is available or the listener is shut down.
    pub fn accept_one_client(&self) -> AuResult<Arc<Connection>> {
        let mut guard = self.state.lock().unwrap();
        guard = self
            .wakeup
            .wait_while(guard, |s| s.clients.is_empty() && !s.shut_down)
            .unwrap();
        match guard.clients.pop_front() {
            Some(conn) => Ok(conn),
            None => Err(AuError::SocketError("listening socket was shut down".into())),
        }
    }

    pub fn shutdown(&self) {
        let mut guard = self.state.lock().unwrap();
        guard.shut_down = true;
        self.wakeup.notify_all();
    }
}
