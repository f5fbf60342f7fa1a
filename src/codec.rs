//! AU packet header codec (§4.1).
//!
//! Fixed 20-byte header: source port, destination port, `sn`, `ack_sn`, a
//! one-byte flag set, three reserved zero bytes, and a four-lane XOR
//! checksum. Byte-for-byte port of `au_stream_socket_protocol.cpp`'s
//! `serialize`/`deserialize`.

use crate::config::{AU_HEADER_SIZE, MAX_PACKET_SIZE};
use crate::endpoint::Endpoint;
use crate::error::{AuError, AuResult};
use std::net::Ipv4Addr;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Flags: u8 {
        const SYN = 0b001;
        const ACK = 0b010;
        const FIN = 0b100;
    }
}

/// A single AU segment, reconstructed with IP-layer source/destination
/// addresses and AU-header source/destination ports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub source: Endpoint,
    pub dest: Endpoint,
    pub sn: u32,
    pub ack_sn: u32,
    pub flags: Flags,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn len_on_wire(&self) -> usize {
        AU_HEADER_SIZE + self.payload.len()
    }
}

/// Serializes `packet` into `buf`, returning the number of bytes written.
///
/// `buf` must be at least `AU_HEADER_SIZE + packet.payload.len()` long, and
/// no larger a packet than `MAX_PACKET_SIZE` will ever be produced.
pub fn encode(packet: &Packet, buf: &mut [u8]) -> AuResult<usize> {
    let len = packet.len_on_wire();
    if len > MAX_PACKET_SIZE {
        return Err(AuError::SocketError(format!(
            "packet of {len} bytes exceeds MAX_PACKET_SIZE"
        )));
    }
    if buf.len() < len {
        return Err(AuError::SocketError(
            "encode buffer too small for packet".into(),
        ));
    }

    buf[..AU_HEADER_SIZE].fill(0);
    buf[0..2].copy_from_slice(&packet.source.port.to_be_bytes());
    buf[2..4].copy_from_slice(&packet.dest.port.to_be_bytes());
    buf[4..8].copy_from_slice(&packet.sn.to_be_bytes());
    buf[8..12].copy_from_slice(&packet.ack_sn.to_be_bytes());
    buf[12] = packet.flags.bits();
    buf[AU_HEADER_SIZE..len].copy_from_slice(&packet.payload);

    for lane in 0..4 {
        let mut parity = 0u8;
        let mut i = lane;
        while i < len {
            parity ^= buf[i];
            i += 4;
        }
        buf[16 + lane] = parity;
    }
    Ok(len)
}

/// Parses an AU packet out of `buf`, using `source_addr`/`dest_addr` taken
/// from the enclosing IP header (the AU header itself carries only ports).
pub fn decode(source_addr: Ipv4Addr, dest_addr: Ipv4Addr, buf: &[u8]) -> AuResult<Packet> {
    if buf.len() < AU_HEADER_SIZE {
        return Err(AuError::InvalidPacket("shorter than the AU header"));
    }

    for lane in 0..4 {
        let mut parity = 0u8;
        let mut i = lane;
        while i < buf.len() {
            parity ^= buf[i];
            i += 4;
        }
        if parity != 0 {
            return Err(AuError::InvalidPacket("checksum lane mismatch"));
        }
    }

    let source_port = u16::from_be_bytes([buf[0], buf[1]]);
    let dest_port = u16::from_be_bytes([buf[2], buf[3]]);
    let sn = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
    let ack_sn = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);
    let flags = Flags::from_bits_truncate(buf[12]);
    let payload = buf[AU_HEADER_SIZE..].to_vec();

    Ok(Packet {
        source: Endpoint::new(source_addr, source_port),
        dest: Endpoint::new(dest_addr, dest_port),
        sn,
        ack_sn,
        flags,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Packet {
        Packet {
            source: Endpoint::new(Ipv4Addr::new(10, 0, 0, 1), 4000),
            dest: Endpoint::new(Ipv4Addr::new(10, 0, 0, 2), 301),
            sn: 0xdead_beef,
            ack_sn: 0x1234_5678,
            flags: Flags::SYN | Flags::ACK,
            payload: b"hello au".to_vec(),
        }
    }

    #[test]
    fn round_trips_header_and_payload() {
        let packet = sample();
        let mut buf = [0u8; 64];
        let len = encode(&packet, &mut buf).unwrap();
        let decoded = decode(packet.source.addr, packet.dest.addr, &buf[..len]).unwrap();

        assert_eq!(decoded.source.port, packet.source.port);
        assert_eq!(decoded.dest.port, packet.dest.port);
        assert_eq!(decoded.sn, packet.sn);
        assert_eq!(decoded.ack_sn, packet.ack_sn);
        assert_eq!(decoded.flags, packet.flags);
        assert_eq!(decoded.payload, packet.payload);
    }

    #[test]
    fn empty_payload_round_trips() {
        let mut packet = sample();
        packet.payload.clear();
        let mut buf = [0u8; 32];
        let len = encode(&packet, &mut buf).unwrap();
        assert_eq!(len, AU_HEADER_SIZE);
        let decoded = decode(packet.source.addr, packet.dest.addr, &buf[..len]).unwrap();
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn rejects_short_buffers() {
        let buf = [0u8; 10];
        let err = decode(Ipv4Addr::UNSPECIFIED, Ipv4Addr::UNSPECIFIED, &buf).unwrap_err();
        assert!(matches!(err, AuError::InvalidPacket(_)));
    }

    #[test]
    fn rejects_corrupted_checksum() {
        let packet = sample();
        let mut buf = [0u8; 64];
        let len = encode(&packet, &mut buf).unwrap();
        buf[3] ^= 0xFF; // flip a header byte outside the checksum lanes' cancellation
        let err = decode(packet.source.addr, packet.dest.addr, &buf[..len]).unwrap_err();
        assert!(matches!(err, AuError::InvalidPacket(_)));
    }

    #[test]
    fn a_corrupted_datagram_is_dropped_and_the_next_is_accepted() {
        let packet = sample();
        let mut buf = [0u8; 64];
        let len = encode(&packet, &mut buf).unwrap();

        let mut corrupted = buf;
        corrupted[5] ^= 0x01;
        assert!(decode(packet.source.addr, packet.dest.addr, &corrupted[..len]).is_err());

        let good = decode(packet.source.addr, packet.dest.addr, &buf[..len]).unwrap();
        assert_eq!(good.sn, packet.sn);
    }
}
