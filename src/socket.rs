//! The public stream façade (§4.8, §6): `AuClientSocket`, `AuServerSocket`,
//! `AuConnectionSocket`.
//!
//! Grounded on `au_stream_socket.h`'s client/server/connection trio; unlike
//! the original's exception-throwing constructors, resolution and
//! registration failures are returned as `AuResult`.

use crate::connection::Connection;
use crate::endpoint::Endpoint;
use crate::error::{AuError, AuResult};
use crate::listener::Listener;
use std::net::{Ipv4Addr, ToSocketAddrs};
use std::sync::Arc;

fn resolve_ipv4(host: &str) -> AuResult<Ipv4Addr> {
    (host, 0u16)
        .to_socket_addrs()
        .map_err(|e| AuError::HostResolveError(e.to_string()))?
        .find_map(|addr| match addr.ip() {
            std::net::IpAddr::V4(v4) => Some(v4),
            std::net::IpAddr::V6(_) => None,
        })
        .ok_or_else(|| AuError::HostResolveError(format!("no IPv4 address for {host}")))
}

/// One established connection, handed to the application by either the
/// client or the server façade.
pub struct AuConnectionSocket {
    conn: Arc<Connection>,
}

impl AuConnectionSocket {
    fn new(conn: Arc<Connection>) -> Self {
        AuConnectionSocket { conn }
    }

    pub fn send(&self, buf: &[u8]) -> AuResult<()> {
        self.conn.send(buf)
    }

    pub fn recv(&self, buf: &mut [u8]) -> AuResult<()> {
        self.conn.recv(buf)
    }
}

impl Drop for AuConnectionSocket {
    fn drop(&mut self) {
        let _ = self.conn.shutdown();
    }
}

/// A client-side façade: resolves a host, opens a connection to it.
pub struct AuClientSocket {
    client_port: u16,
    remote: Endpoint,
    conn: Option<Arc<Connection>>,
}

impl AuClientSocket {
    pub fn new(host: &str, client_port: u16, server_port: u16) -> AuResult<Self> {
        let addr = resolve_ipv4(host)?;
        Ok(AuClientSocket {
            client_port,
            remote: Endpoint::new(addr, server_port),
            conn: None,
        })
    }

    pub fn connect(&mut self) -> AuResult<AuConnectionSocket> {
        let local = Endpoint::new(Ipv4Addr::UNSPECIFIED, self.client_port);
        let broker = crate::broker::global();
        let conn = Connection::new(local, self.remote, broker.retry_scheduler())?;
        broker.add_connection(Arc::clone(&conn))?;
        conn.start_connection()?;
        self.conn = Some(Arc::clone(&conn));
        Ok(AuConnectionSocket::new(conn))
    }
}

/// A server-side façade: listens on a fixed local port, accepting clients
/// one at a time.
pub struct AuServerSocket {
    listener: Arc<Listener>,
}

impl AuServerSocket {
    pub fn new(host: &str, port: u16) -> AuResult<Self> {
        let addr = resolve_ipv4(host)?;
        let local = Endpoint::new(addr, port);
        let listener = Arc::new(Listener::new(local));
        crate::broker::global().start_listen(Arc::clone(&listener))?;
        Ok(AuServerSocket { listener })
    }

    pub fn accept_one_client(&self) -> AuResult<AuConnectionSocket> {
        let conn = self.listener.accept_one_client()?;
        Ok(AuConnectionSocket::new(conn))
    }
}

impl Drop for AuServerSocket {
    fn drop(&mut self) {
        crate::broker::global().stop_listen(self.listener.addr());
    }
}
