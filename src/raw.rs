//! A raw `AF_INET`/`SOCK_RAW` socket bound to [`IPPROTO_AU`] (§4.1, §6).
//!
//! `nix::sys::socket::SockProtocol` only names a fixed set of well-known
//! protocols (`Tcp`, `Udp`, `Icmp`, ...) and has no variant for an arbitrary
//! custom number, so the socket lifecycle is driven directly through `libc`
//! instead, the same way the `runtime` crate reaches past a safe wrapper for
//! raw `libc::recv`/`libc::send` calls it needs exact control over.
//!
//! Every datagram a raw IPv4 socket hands back still carries the kernel-built
//! IP header in front of the payload; [`RawSocket::recv_from`] strips it with
//! `etherparse::Ipv4HeaderSlice`, the same parser the original TUN-frame loop
//! used, and returns the AU header/payload alongside the addresses read out
//! of that IP header.

use crate::config::{IPPROTO_AU, READ_BUFFER_SIZE};
use crate::error::{AuError, AuResult};
use etherparse::Ipv4HeaderSlice;
use std::mem;
use std::net::Ipv4Addr;
use std::os::unix::io::RawFd;

/// An inbound AU datagram together with the IP-header addresses it arrived
/// under.
pub struct Received {
    pub source_addr: Ipv4Addr,
    pub dest_addr: Ipv4Addr,
    pub payload: Vec<u8>,
}

/// The seam a [`crate::connection::Connection`] sends packets through. The
/// only real implementation is [`RawSocket`]; tests substitute a plain
/// in-memory double so the state machine can be driven without `CAP_NET_RAW`.
pub trait PacketSocket: Send + Sync {
    fn send_to(&self, dest: Ipv4Addr, bytes: &[u8]) -> AuResult<()>;
}

/// A raw IPv4 socket speaking protocol 151 directly.
pub struct RawSocket {
    fd: RawFd,
}

impl RawSocket {
    /// Opens the socket and binds it to `bind_addr` (use
    /// `Ipv4Addr::UNSPECIFIED` to receive datagrams for any local address).
    pub fn bind(bind_addr: Ipv4Addr) -> AuResult<Self> {
        // SAFETY: libc::socket with well-formed, constant arguments.
        let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_RAW, IPPROTO_AU) };
        if fd < 0 {
            return Err(AuError::SocketIoError(std::io::Error::last_os_error()));
        }
        let socket = RawSocket { fd };

        let mut addr: libc::sockaddr_in = unsafe { mem::zeroed() };
        addr.sin_family = libc::AF_INET as libc::sa_family_t;
        addr.sin_addr.s_addr = u32::from_ne_bytes(bind_addr.octets());

        // SAFETY: addr is a valid, fully-initialized sockaddr_in of the
        // correct length for fd.
        let rc = unsafe {
            libc::bind(
                fd,
                &addr as *const libc::sockaddr_in as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(AuError::SocketIoError(std::io::Error::last_os_error()));
        }
        Ok(socket)
    }

    /// Sends a fully-encoded AU packet (header + payload) to `dest`.
    pub fn send_to(&self, dest: Ipv4Addr, bytes: &[u8]) -> AuResult<()> {
        let mut addr: libc::sockaddr_in = unsafe { mem::zeroed() };
        addr.sin_family = libc::AF_INET as libc::sa_family_t;
        addr.sin_addr.s_addr = u32::from_ne_bytes(dest.octets());

        // SAFETY: bytes/addr are valid for the lengths passed.
        let rc = unsafe {
            libc::sendto(
                self.fd,
                bytes.as_ptr() as *const libc::c_void,
                bytes.len(),
                0,
                &addr as *const libc::sockaddr_in as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(AuError::SocketIoError(std::io::Error::last_os_error()));
        }
        if rc as usize != bytes.len() {
            return Err(AuError::SocketError(format!(
                "short write: sent {rc} of {} bytes",
                bytes.len()
            )));
        }
        Ok(())
    }

    /// Blocks for the next datagram addressed to protocol 151, strips the
    /// kernel-supplied IP header, and returns the AU header/payload plus the
    /// addresses read out of that header.
    pub fn recv_from(&self) -> AuResult<Received> {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        // SAFETY: buf is valid for buf.len() bytes; recvfrom writes at most that many.
        let n = unsafe {
            libc::recvfrom(
                self.fd,
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
                0,
                std::ptr::null_mut(),
                std::ptr::null_mut(),
            )
        };
        if n < 0 {
            return Err(AuError::SocketIoError(std::io::Error::last_os_error()));
        }
        let n = n as usize;

        let ip = Ipv4HeaderSlice::from_slice(&buf[..n])
            .map_err(|e| AuError::SocketError(format!("malformed IP header: {e}")))?;
        let source_addr = ip.source_addr();
        let dest_addr = ip.destination_addr();
        let ip_len = ip.slice().len();
        let payload = buf[ip_len..n].to_vec();

        Ok(Received {
            source_addr,
            dest_addr,
            payload,
        })
    }
}

impl Drop for RawSocket {
    fn drop(&mut self) {
        // SAFETY: fd was opened by this struct and not shared.
        unsafe {
            libc::close(self.fd);
        }
    }
}

impl PacketSocket for RawSocket {
    fn send_to(&self, dest: Ipv4Addr, bytes: &[u8]) -> AuResult<()> {
        RawSocket::send_to(self, dest, bytes)
    }
}

// A raw fd is plain data once opened; the socket is used from a single
// reader thread at a time in this crate (broker owns one, each connection
// owns its own).
unsafe impl Send for RawSocket {}
unsafe impl Sync for RawSocket {}
