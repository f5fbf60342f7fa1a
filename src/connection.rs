//! Per-connection state machine (§4.6): handshake, sliding-window send,
//! in-order receive, and teardown, all serialized by one mutex per
//! connection that the send window, receive queue, and state share.
//!
//! Grounded on `au_stream_socket_impl.h`'s `connection_impl` for the shape
//! (one mutex, the connection's own raw socket, `process_packet` dispatch),
//! though the original's `connection_impl::send`/`recv`/`process_packet`
//! are stubs (`for(;;);`/`// TODO`) — the handshake, ACK, and retransmission
//! logic below follows the written protocol description rather than any
//! completed reference implementation.

use crate::codec::{encode, Flags, Packet};
use crate::config::{MAX_PACKET_SIZE, MAX_SEGMENT_SIZE, SEND_ACK_TIMEOUT, WINDOW_BYTES};
use crate::endpoint::Endpoint;
use crate::error::{AuError, AuResult};
use crate::queue::locking::QueueCore;
use crate::raw::{PacketSocket, RawSocket};
use crate::retry::RetryScheduler;
use log::{debug, trace, warn};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, Weak};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Closed,
    SynSent,
    SynRecv,
    Established,
    FinSent,
    FinRecv,
    Terminated,
}

struct Inner {
    state: State,
    ack_sn: u32,
    send_window: QueueCore<u8>,
    recv_queue: QueueCore<u8>,
    /// Set once a raw-socket send has failed; every later `send`/`recv`
    /// observes it and fails with `AuError::SocketIoError` (§4.6, §7).
    io_error: bool,
}

/// A single AU connection: handshake state, one sliding send window, one
/// receive queue, and the raw socket this connection transmits on.
pub struct Connection {
    local: Endpoint,
    remote: Endpoint,
    socket: Box<dyn PacketSocket>,
    retry: Arc<RetryScheduler>,
    inner: Mutex<Inner>,
    send_space_cond: Condvar,
    recv_data_cond: Condvar,
    /// A handle back to this connection's own `Arc`, set once in `new`, so
    /// methods taking only `&self` can still hand an owned `Arc<Connection>`
    /// to a `'static` retry closure.
    self_ref: OnceLock<Weak<Connection>>,
}

/// Wrap-aware "does `target` lie strictly before `reference`". Differences
/// are interpreted as a signed 32-bit offset, matching the half-range
/// convention used for TCP-style sequence comparisons.
fn seq_lt(target: u32, reference: u32) -> bool {
    (target.wrapping_sub(reference) as i32) < 0
}

/// Wrap-aware "`ack_sn` lies in `(begin_id, begin_id + size]`".
fn ack_in_window(ack_sn: u32, begin_id: u32, size: usize) -> bool {
    let offset = ack_sn.wrapping_sub(begin_id);
    offset != 0 && (offset as usize) <= size
}

/// Drops the prefix of `payload` (whose first byte has sequence id `sn`)
/// that the receiver already has, given its next-expected id `ack_sn`.
/// Returns `None` if `sn` is ahead of `ack_sn` (a gap we can't bridge).
fn trim_duplicate_prefix(sn: u32, ack_sn: u32, payload: &[u8]) -> Option<&[u8]> {
    if seq_lt(ack_sn, sn) {
        return None;
    }
    let skip = (ack_sn.wrapping_sub(sn) as usize).min(payload.len());
    Some(&payload[skip..])
}

impl Connection {
    pub fn new(local: Endpoint, remote: Endpoint, retry: Arc<RetryScheduler>) -> AuResult<Arc<Self>> {
        let socket = RawSocket::bind(local.addr)?;
        Self::with_socket(local, remote, retry, Box::new(socket))
    }

    /// Builds a connection around an already-constructed [`PacketSocket`].
    /// `new` is the production entry point (it binds a real raw socket);
    /// this seam is what lets the state machine be driven in tests without
    /// `CAP_NET_RAW`.
    pub fn with_socket(
        local: Endpoint,
        remote: Endpoint,
        retry: Arc<RetryScheduler>,
        socket: Box<dyn PacketSocket>,
    ) -> AuResult<Arc<Self>> {
        let iss = loop {
            let candidate: u32 = rand::random();
            if candidate != 0 {
                break candidate;
            }
        };
        let inner = Inner {
            state: State::Closed,
            ack_sn: 0,
            send_window: QueueCore::new(WINDOW_BYTES, iss),
            recv_queue: QueueCore::new(WINDOW_BYTES, 0),
            io_error: false,
        };
        let conn = Arc::new(Connection {
            local,
            remote,
            socket,
            retry,
            inner: Mutex::new(inner),
            send_space_cond: Condvar::new(),
            recv_data_cond: Condvar::new(),
            self_ref: OnceLock::new(),
        });
        let _ = conn.self_ref.set(Arc::downgrade(&conn));
        Ok(conn)
    }

    /// An owned handle to this same connection, for handing to `'static`
    /// retry-scheduler callbacks.
    fn arc(&self) -> Arc<Connection> {
        self.self_ref
            .get()
            .and_then(Weak::upgrade)
            .expect("Connection::arc called before construction finished")
    }

    /// Marks the connection poisoned, waking any blocked `send`/`recv` so
    /// they observe it and fail with `AuError::SocketIoError`.
    fn mark_io_error_lock_held(&self, guard: &mut Inner) {
        if guard.io_error {
            return;
        }
        guard.io_error = true;
        self.send_space_cond.notify_all();
        self.recv_data_cond.notify_all();
    }

    fn mark_io_error(&self) {
        let mut guard = self.inner.lock().unwrap();
        self.mark_io_error_lock_held(&mut guard);
    }

    pub fn local(&self) -> Endpoint {
        self.local
    }

    pub fn remote(&self) -> Endpoint {
        self.remote
    }

    fn send_packet(&self, packet: &Packet) -> AuResult<()> {
        let mut buf = [0u8; MAX_PACKET_SIZE];
        let len = encode(packet, &mut buf)?;
        trace!("{} -> {}: {:?} sn={} ack={}", self.local, self.remote, packet.flags, packet.sn, packet.ack_sn);
        self.socket.send_to(self.remote.addr, &buf[..len])
    }

    fn control_packet(&self, guard: &Inner, flags: Flags, sn: u32) -> Packet {
        Packet {
            source: self.local,
            dest: self.remote,
            sn,
            ack_sn: guard.ack_sn,
            flags,
            payload: Vec::new(),
        }
    }

    /// Resends `packet` every `SEND_ACK_TIMEOUT` until the connection
    /// leaves `expected_state`.
    fn arm_handshake_retry(&self, packet: Packet, expected_state: State) {
        let conn = self.arc();
        self.retry.retry_after(SEND_ACK_TIMEOUT, move || {
            let mut guard = conn.inner.lock().unwrap();
            if guard.state != expected_state {
                return true;
            }
            if let Err(err) = conn.send_packet(&packet) {
                warn!("{}: handshake retransmit failed, poisoning connection: {err}", conn.local);
                conn.mark_io_error_lock_held(&mut guard);
                return true;
            }
            false
        });
    }

    /// Sliding-window emission: copies up to one segment's worth of bytes
    /// starting at the window's begin id, sends it, and arms a
    /// retransmission guarded by "has the window moved past this segment".
    fn send_some_data(&self, guard: &mut MutexGuard<'_, Inner>, flags: Flags) {
        let begin = guard.send_window.queue.begin_id();
        let n = guard.send_window.queue.len().min(MAX_SEGMENT_SIZE);
        let mut payload = Vec::with_capacity(n);
        for i in 0..n {
            payload.push(*guard.send_window.queue.get(begin.wrapping_add(i as u32)));
        }
        let packet = Packet {
            source: self.local,
            dest: self.remote,
            sn: begin,
            ack_sn: guard.ack_sn,
            flags,
            payload,
        };
        if let Err(err) = self.send_packet(&packet) {
            warn!("{}: send failed, poisoning connection: {err}", self.local);
            self.mark_io_error_lock_held(guard);
            return;
        }
        if n == 0 {
            return;
        }

        let conn = self.arc();
        self.retry.retry_after(SEND_ACK_TIMEOUT, move || {
            let mut guard = conn.inner.lock().unwrap();
            if guard.send_window.queue.begin_id() != begin {
                return true;
            }
            if let Err(err) = conn.send_packet(&packet) {
                warn!("{}: retransmit failed, poisoning connection: {err}", conn.local);
                conn.mark_io_error_lock_held(&mut guard);
                return true;
            }
            false
        });
    }

    fn terminate_lock_held(&self, guard: &mut Inner) {
        guard.state = State::Terminated;
        guard
            .send_window
            .shutdown_lock_held(&self.send_space_cond, &self.recv_data_cond);
        guard
            .recv_queue
            .shutdown_lock_held(&self.send_space_cond, &self.recv_data_cond);
    }

    pub fn start_connection(&self) -> AuResult<()> {
        let mut guard = self.inner.lock().unwrap();
        if guard.state != State::Closed {
            return Err(AuError::SocketError("connection already started".into()));
        }
        let begin = guard.send_window.queue.begin_id();
        guard.state = State::SynSent;
        let syn = self.control_packet(&guard, Flags::SYN, begin.wrapping_sub(1));
        drop(guard);
        debug!("{}: CLOSED -> SYN_SENT", self.local);
        if let Err(err) = self.send_packet(&syn) {
            self.mark_io_error();
            return Err(err);
        }
        self.arm_handshake_retry(syn, State::SynSent);
        Ok(())
    }

    pub fn on_packet(&self, packet: Packet) {
        let mut guard = self.inner.lock().unwrap();

        if packet.flags.contains(Flags::FIN)
            && !packet.flags.contains(Flags::ACK)
            && !matches!(guard.state, State::FinRecv | State::Terminated)
        {
            let begin = guard.send_window.queue.begin_id();
            let finack = self.control_packet(&guard, Flags::FIN | Flags::ACK, begin);
            guard.state = State::FinRecv;
            drop(guard);
            debug!("{}: -> FIN_RECV", self.local);
            if let Err(err) = self.send_packet(&finack) {
                warn!("{}: FIN|ACK send failed, poisoning connection: {err}", self.local);
                self.mark_io_error();
            }
            self.arm_handshake_retry(finack, State::FinRecv);
            return;
        }

        match guard.state {
            State::Closed => {
                if packet.flags == Flags::SYN && packet.payload.is_empty() {
                    guard.ack_sn = packet.sn.wrapping_add(1);
                    let begin = guard.send_window.queue.begin_id();
                    let synack = self.control_packet(&guard, Flags::SYN | Flags::ACK, begin.wrapping_sub(1));
                    guard.state = State::SynRecv;
                    drop(guard);
                    debug!("{}: CLOSED -> SYN_RECV", self.local);
                    if let Err(err) = self.send_packet(&synack) {
                        warn!("{}: SYN|ACK send failed, poisoning connection: {err}", self.local);
                        self.mark_io_error();
                    }
                    self.arm_handshake_retry(synack, State::SynRecv);
                }
            }
            State::SynSent => {
                let begin = guard.send_window.queue.begin_id();
                if packet.flags == (Flags::SYN | Flags::ACK)
                    && packet.ack_sn == begin
                    && packet.payload.is_empty()
                {
                    guard.ack_sn = packet.sn.wrapping_add(1);
                    guard.state = State::Established;
                    let ack = self.control_packet(&guard, Flags::ACK, begin);
                    drop(guard);
                    debug!("{}: SYN_SENT -> ESTABLISHED", self.local);
                    if let Err(err) = self.send_packet(&ack) {
                        warn!("{}: ACK send failed, poisoning connection: {err}", self.local);
                        self.mark_io_error();
                    }
                }
            }
            State::SynRecv => {
                let begin = guard.send_window.queue.begin_id();
                if packet.flags == Flags::ACK
                    && packet.ack_sn == begin
                    && packet.sn == guard.ack_sn
                    && packet.payload.is_empty()
                {
                    guard.state = State::Established;
                    debug!("{}: SYN_RECV -> ESTABLISHED", self.local);
                }
            }
            State::Established => self.handle_established(&mut guard, packet),
            State::FinSent => {
                if packet.flags == (Flags::FIN | Flags::ACK) {
                    let begin = guard.send_window.queue.begin_id();
                    let ack = self.control_packet(&guard, Flags::ACK, begin);
                    self.terminate_lock_held(&mut guard);
                    drop(guard);
                    debug!("{}: FIN_SENT -> TERMINATED", self.local);
                    if let Err(err) = self.send_packet(&ack) {
                        warn!("{}: final ACK send failed: {err}", self.local);
                    }
                    crate::broker::global().remove_connection(self.local, self.remote);
                }
            }
            State::FinRecv => {
                if packet.flags == Flags::ACK {
                    self.terminate_lock_held(&mut guard);
                    drop(guard);
                    debug!("{}: FIN_RECV -> TERMINATED", self.local);
                    crate::broker::global().remove_connection(self.local, self.remote);
                }
            }
            State::Terminated => {}
        }
    }

    fn handle_established(&self, guard: &mut MutexGuard<'_, Inner>, packet: Packet) {
        let mut acked = false;
        let mut accepted = false;

        if packet.flags.contains(Flags::ACK) {
            let begin = guard.send_window.queue.begin_id();
            let size = guard.send_window.queue.len();
            if ack_in_window(packet.ack_sn, begin, size) {
                guard
                    .send_window
                    .advance_begin_lock_held(packet.ack_sn, &self.send_space_cond);
                acked = true;
            }
        }

        if !packet.payload.is_empty() {
            if let Some(remainder) = trim_duplicate_prefix(packet.sn, guard.ack_sn, &packet.payload) {
                if !remainder.is_empty() {
                    let n = guard
                        .recv_queue
                        .try_send_lock_held(remainder, &self.recv_data_cond)
                        .unwrap_or(0);
                    if n > 0 {
                        guard.ack_sn = guard.ack_sn.wrapping_add(n as u32);
                        accepted = true;
                    }
                }
            }
        }

        if accepted || acked {
            let flags = if accepted { Flags::ACK } else { Flags::empty() };
            self.send_some_data(guard, flags);
        }
    }

    /// Blocks until all of `buf` has entered the send window, emitting
    /// segments as room allows.
    pub fn send(&self, buf: &[u8]) -> AuResult<()> {
        let mut sent = 0;
        while sent < buf.len() {
            let mut guard = self.inner.lock().unwrap();
            guard = self
                .send_space_cond
                .wait_while(guard, |inner| {
                    !inner.io_error && !inner.send_window.is_shut_down() && inner.send_window.queue.full()
                })
                .unwrap();
            if guard.io_error {
                return Err(AuError::connection_poisoned());
            }
            let n = guard
                .send_window
                .try_send_lock_held(&buf[sent..], &self.send_space_cond)?;
            sent += n;
            if n > 0 {
                self.send_some_data(&mut guard, Flags::empty());
                if guard.io_error {
                    return Err(AuError::connection_poisoned());
                }
            }
        }
        Ok(())
    }

    /// Blocks until `buf` has been filled from the receive queue.
    pub fn recv(&self, buf: &mut [u8]) -> AuResult<()> {
        let mut received = 0;
        let mut guard = self.inner.lock().unwrap();
        while received < buf.len() {
            guard = self
                .recv_data_cond
                .wait_while(guard, |inner| {
                    !inner.io_error && !inner.recv_queue.is_shut_down() && inner.recv_queue.queue.empty()
                })
                .unwrap();
            if guard.io_error {
                return Err(AuError::connection_poisoned());
            }
            let n = guard
                .recv_queue
                .try_recv_lock_held(&mut buf[received..], &self.send_space_cond)?;
            received += n;
        }
        Ok(())
    }

    pub fn shutdown(&self) -> AuResult<()> {
        {
            let mut guard = self.inner.lock().unwrap();
            if matches!(
                guard.state,
                State::Closed | State::SynSent | State::SynRecv | State::Established
            ) {
                let begin = guard.send_window.queue.begin_id();
                let fin = self.control_packet(&guard, Flags::FIN, begin);
                guard.state = State::FinSent;
                drop(guard);
                debug!("{}: -> FIN_SENT", self.local);
                if let Err(err) = self.send_packet(&fin) {
                    self.mark_io_error();
                    return Err(err);
                }
                self.arm_handshake_retry(fin, State::FinSent);
            }
        }
        let guard = self.inner.lock().unwrap();
        let guard = self
            .recv_data_cond
            .wait_while(guard, |inner| !inner.io_error && !inner.recv_queue.is_shut_down())
            .unwrap();
        if guard.io_error && !guard.recv_queue.is_shut_down() {
            return Err(AuError::connection_poisoned());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn seq_lt_handles_wraparound() {
        assert!(seq_lt(u32::MAX, 0));
        assert!(!seq_lt(0, u32::MAX));
        assert!(seq_lt(5, 10));
        assert!(!seq_lt(10, 5));
    }

    #[test]
    fn ack_window_is_half_open_on_begin_and_closed_on_end() {
        assert!(!ack_in_window(100, 100, 50));
        assert!(ack_in_window(101, 100, 50));
        assert!(ack_in_window(150, 100, 50));
        assert!(!ack_in_window(151, 100, 50));
    }

    #[test]
    fn ack_window_wraps_past_u32_max() {
        let begin = u32::MAX - 2;
        assert!(ack_in_window(0, begin, 10));
        assert!(!ack_in_window(begin, begin, 10));
    }

    #[test]
    fn trims_fully_duplicate_segment_to_empty() {
        let payload = [1, 2, 3, 4];
        let remainder = trim_duplicate_prefix(100, 104, &payload).unwrap();
        assert!(remainder.is_empty());
    }

    #[test]
    fn trims_partially_overlapping_segment() {
        let payload = [1, 2, 3, 4, 5];
        let remainder = trim_duplicate_prefix(100, 102, &payload).unwrap();
        assert_eq!(remainder, &[3, 4, 5]);
    }

    #[test]
    fn rejects_segment_that_would_leave_a_gap() {
        let payload = [1, 2, 3];
        assert!(trim_duplicate_prefix(105, 100, &payload).is_none());
    }

    #[test]
    fn accepts_exact_next_expected_segment_unchanged() {
        let payload = [9, 9, 9];
        let remainder = trim_duplicate_prefix(100, 100, &payload).unwrap();
        assert_eq!(remainder, &payload);
    }

    // The tests below drive the state machine through `Connection::with_socket`
    // and a plain in-memory `PacketSocket`, so none of them touch a real raw
    // socket and none need CAP_NET_RAW.

    #[derive(Clone, Default)]
    struct RecordingSocket {
        sent: Arc<Mutex<Vec<(Ipv4Addr, Vec<u8>)>>>,
    }

    impl RecordingSocket {
        fn decoded(&self, local_addr: Ipv4Addr) -> Vec<Packet> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|(dest, bytes)| crate::codec::decode(local_addr, *dest, bytes).unwrap())
                .collect()
        }
    }

    impl PacketSocket for RecordingSocket {
        fn send_to(&self, dest: Ipv4Addr, bytes: &[u8]) -> AuResult<()> {
            self.sent.lock().unwrap().push((dest, bytes.to_vec()));
            Ok(())
        }
    }

    struct FailingSocket;

    impl PacketSocket for FailingSocket {
        fn send_to(&self, _dest: Ipv4Addr, _bytes: &[u8]) -> AuResult<()> {
            Err(AuError::SocketIoError(std::io::Error::new(
                std::io::ErrorKind::Other,
                "simulated send failure",
            )))
        }
    }

    fn endpoints() -> (Endpoint, Endpoint) {
        (
            Endpoint::new(Ipv4Addr::new(127, 0, 0, 1), 9000),
            Endpoint::new(Ipv4Addr::new(127, 0, 0, 1), 9001),
        )
    }

    #[test]
    fn inbound_syn_moves_closed_to_syn_recv_and_sends_synack() {
        let (local, remote) = endpoints();
        let retry = Arc::new(RetryScheduler::new());
        let socket = RecordingSocket::default();
        let conn = Connection::with_socket(local, remote, retry, Box::new(socket.clone())).unwrap();

        let syn = Packet {
            source: remote,
            dest: local,
            sn: 500,
            ack_sn: 0,
            flags: Flags::SYN,
            payload: Vec::new(),
        };
        conn.on_packet(syn);

        assert_eq!(conn.inner.lock().unwrap().state, State::SynRecv);
        let sent = socket.decoded(local.addr);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].flags, Flags::SYN | Flags::ACK);
        assert_eq!(sent[0].ack_sn, 501);
    }

    #[test]
    fn client_handshake_reaches_established_on_synack() {
        let (local, remote) = endpoints();
        let retry = Arc::new(RetryScheduler::new());
        let socket = RecordingSocket::default();
        let conn = Connection::with_socket(local, remote, retry, Box::new(socket.clone())).unwrap();

        conn.start_connection().unwrap();
        assert_eq!(conn.inner.lock().unwrap().state, State::SynSent);

        let begin = conn.inner.lock().unwrap().send_window.queue.begin_id();
        let synack = Packet {
            source: remote,
            dest: local,
            sn: 900,
            ack_sn: begin,
            flags: Flags::SYN | Flags::ACK,
            payload: Vec::new(),
        };
        conn.on_packet(synack);

        assert_eq!(conn.inner.lock().unwrap().state, State::Established);
        assert_eq!(conn.inner.lock().unwrap().ack_sn, 901);
        let sent = socket.decoded(local.addr);
        assert_eq!(sent.last().unwrap().flags, Flags::ACK);
    }

    #[test]
    fn established_payload_is_delivered_and_acked() {
        let (local, remote) = endpoints();
        let retry = Arc::new(RetryScheduler::new());
        let socket = RecordingSocket::default();
        let conn = Connection::with_socket(local, remote, retry, Box::new(socket.clone())).unwrap();

        {
            let mut guard = conn.inner.lock().unwrap();
            guard.state = State::Established;
            guard.ack_sn = 100;
        }

        let data = Packet {
            source: remote,
            dest: local,
            sn: 100,
            ack_sn: 0,
            flags: Flags::empty(),
            payload: b"hello".to_vec(),
        };
        conn.on_packet(data);

        assert_eq!(conn.inner.lock().unwrap().ack_sn, 105);
        let mut buf = [0u8; 5];
        conn.recv(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        let sent = socket.decoded(local.addr);
        assert_eq!(sent.last().unwrap().flags, Flags::ACK);
    }

    #[test]
    fn duplicate_prefix_in_established_is_trimmed_and_not_redelivered() {
        let (local, remote) = endpoints();
        let retry = Arc::new(RetryScheduler::new());
        let socket = RecordingSocket::default();
        let conn = Connection::with_socket(local, remote, retry, Box::new(socket)).unwrap();

        {
            let mut guard = conn.inner.lock().unwrap();
            guard.state = State::Established;
            guard.ack_sn = 105;
        }

        let overlapping = Packet {
            source: remote,
            dest: local,
            sn: 100,
            ack_sn: 0,
            flags: Flags::empty(),
            payload: b"helloworld".to_vec(),
        };
        conn.on_packet(overlapping);

        assert_eq!(conn.inner.lock().unwrap().ack_sn, 110);
        let mut buf = [0u8; 5];
        conn.recv(&mut buf).unwrap();
        assert_eq!(&buf, b"world");
    }

    #[test]
    fn fin_in_established_moves_to_fin_recv_and_sends_finack() {
        let (local, remote) = endpoints();
        let retry = Arc::new(RetryScheduler::new());
        let socket = RecordingSocket::default();
        let conn = Connection::with_socket(local, remote, retry, Box::new(socket.clone())).unwrap();

        {
            let mut guard = conn.inner.lock().unwrap();
            guard.state = State::Established;
        }

        let fin = Packet {
            source: remote,
            dest: local,
            sn: 100,
            ack_sn: 0,
            flags: Flags::FIN,
            payload: Vec::new(),
        };
        conn.on_packet(fin);

        assert_eq!(conn.inner.lock().unwrap().state, State::FinRecv);
        let sent = socket.decoded(local.addr);
        assert_eq!(sent.last().unwrap().flags, Flags::FIN | Flags::ACK);
    }

    #[test]
    fn raw_socket_failure_poisons_connection_and_fails_send() {
        let (local, remote) = endpoints();
        let retry = Arc::new(RetryScheduler::new());
        let conn = Connection::with_socket(local, remote, retry, Box::new(FailingSocket)).unwrap();
        conn.inner.lock().unwrap().state = State::Established;

        assert!(conn.send(b"hi").is_err());
        assert!(conn.inner.lock().unwrap().io_error);
        // Once poisoned, later calls fail immediately without touching the socket again.
        assert!(conn.send(b"more").is_err());
        assert!(conn.recv(&mut [0u8; 1]).is_err());
    }
}
