//! Raw IPv4/UDP/DNS packet handling.
//!
//! Extracts the first question from a DNS query datagram read off the tunnel
//! and builds the datagrams written back to it: synthetic NXDOMAIN answers and
//! wrapped upstream answers. Only the fields needed for filtering are decoded;
//! everything else in the query is carried as raw bytes.

// Header lengths are bounded by 60 bytes and datagram sizes are checked
// against u16::MAX before narrowing.
#![allow(clippy::cast_possible_truncation)]

use std::net::Ipv4Addr;

use pnet::packet::Packet;
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::{Ipv4Packet, MutableIpv4Packet};
use pnet::packet::udp::{MutableUdpPacket, UdpPacket};

/// IPv4 header size without options.
pub const IPV4_MIN_HEADER_LEN: usize = 20;
/// UDP header size in bytes.
pub const UDP_HEADER_LEN: usize = 8;
/// DNS message header size in bytes.
pub const DNS_HEADER_LEN: usize = 12;
/// Well-known DNS port.
pub const DNS_PORT: u16 = 53;
/// Compression pointers followed before a name is rejected.
pub const MAX_POINTER_HOPS: usize = 10;
/// Longest encoded domain name allowed by RFC 1035.
pub const MAX_NAME_LEN: usize = 255;

/// QR, RD, RA set and RCODE 3 (NXDOMAIN).
const NXDOMAIN_FLAGS: u16 = 0x8183;

const POINTER_MASK: u8 = 0xC0;

/// Error type for response construction.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    /// The response would not fit in a single IPv4 datagram.
    #[error("response datagram of {size} bytes exceeds the IPv4 limit")]
    PayloadTooLarge { size: usize },

    /// The stored IP header is too short to rewrite.
    #[error("stored IPv4 header is malformed")]
    MalformedHeader,
}

/// A DNS query extracted from a captured IPv4/UDP datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsQuery {
    /// Original IPv4 header, options included.
    pub ip_header: Vec<u8>,
    /// Original UDP header.
    pub udp_header: [u8; UDP_HEADER_LEN],
    /// Complete DNS message as sent by the client.
    pub dns_payload: Vec<u8>,
    pub transaction_id: u16,
    /// First question name, lowercase and dot-joined.
    pub domain: String,
    pub qtype: u16,
    pub qclass: u16,
    /// Question section bytes, reused verbatim in synthetic responses.
    pub question_raw: Vec<u8>,
}

impl DnsQuery {
    /// Address of the client that sent the query.
    #[must_use]
    pub fn source(&self) -> Ipv4Addr {
        Ipv4Addr::new(
            self.ip_header[12],
            self.ip_header[13],
            self.ip_header[14],
            self.ip_header[15],
        )
    }

    /// Address the query was sent to.
    #[must_use]
    pub fn destination(&self) -> Ipv4Addr {
        Ipv4Addr::new(
            self.ip_header[16],
            self.ip_header[17],
            self.ip_header[18],
            self.ip_header[19],
        )
    }

    #[must_use]
    pub const fn source_port(&self) -> u16 {
        u16::from_be_bytes([self.udp_header[0], self.udp_header[1]])
    }

    #[must_use]
    pub const fn destination_port(&self) -> u16 {
        u16::from_be_bytes([self.udp_header[2], self.udp_header[3]])
    }
}

/// Extract a DNS query from a raw IPv4 datagram.
///
/// Returns `None` for anything that is not a well-formed IPv4/UDP datagram
/// addressed to port 53 carrying at least one question. This is the normal
/// path for non-DNS traffic and is not an error.
#[must_use]
pub fn parse(packet: &[u8]) -> Option<DnsQuery> {
    let ip = Ipv4Packet::new(packet)?;
    if ip.get_version() != 4 {
        return None;
    }

    let header_len = usize::from(ip.get_header_length()) * 4;
    if header_len < IPV4_MIN_HEADER_LEN {
        return None;
    }
    if ip.get_next_level_protocol() != IpNextHeaderProtocols::Udp {
        return None;
    }

    let min_len = header_len + UDP_HEADER_LEN + DNS_HEADER_LEN;
    if packet.len() < min_len {
        return None;
    }

    // Trust the total length field only when it is consistent with the capture.
    let total_len = usize::from(ip.get_total_length());
    let end = if (min_len..=packet.len()).contains(&total_len) {
        total_len
    } else {
        packet.len()
    };
    let datagram = &packet[..end];

    let udp = UdpPacket::new(&datagram[header_len..])?;
    if udp.get_destination() != DNS_PORT {
        return None;
    }

    let dns = &datagram[header_len + UDP_HEADER_LEN..];
    let question_count = u16::from_be_bytes([dns[4], dns[5]]);
    if question_count == 0 {
        return None;
    }

    let (domain, after_name) = read_name(dns, DNS_HEADER_LEN)?;
    let question_end = after_name + 4;
    let fixed = dns.get(after_name..question_end)?;

    let mut udp_header = [0u8; UDP_HEADER_LEN];
    udp_header.copy_from_slice(&datagram[header_len..header_len + UDP_HEADER_LEN]);

    Some(DnsQuery {
        ip_header: datagram[..header_len].to_vec(),
        udp_header,
        dns_payload: dns.to_vec(),
        transaction_id: u16::from_be_bytes([dns[0], dns[1]]),
        domain,
        qtype: u16::from_be_bytes([fixed[0], fixed[1]]),
        qclass: u16::from_be_bytes([fixed[2], fixed[3]]),
        question_raw: dns[DNS_HEADER_LEN..question_end].to_vec(),
    })
}

/// Decode a possibly compressed domain name starting at `start`.
///
/// Returns the lowercase dot-joined name and the offset right after the name
/// in the original position: past the terminating zero byte, or past the
/// first compression pointer when one was followed.
fn read_name(message: &[u8], start: usize) -> Option<(String, usize)> {
    let mut labels: Vec<String> = Vec::new();
    let mut pos = start;
    let mut resume_at = None;
    let mut hops = 0;
    let mut encoded_len = 1;

    loop {
        let len_byte = *message.get(pos)?;
        match len_byte & POINTER_MASK {
            POINTER_MASK => {
                hops += 1;
                if hops > MAX_POINTER_HOPS {
                    return None;
                }
                let low = *message.get(pos + 1)?;
                if resume_at.is_none() {
                    resume_at = Some(pos + 2);
                }
                pos = usize::from(u16::from_be_bytes([len_byte & !POINTER_MASK, low]));
            }
            0 => {
                let len = usize::from(len_byte);
                if len == 0 {
                    return Some((labels.join("."), resume_at.unwrap_or(pos + 1)));
                }
                encoded_len += len + 1;
                if encoded_len > MAX_NAME_LEN {
                    return None;
                }
                let label = message.get(pos + 1..pos + 1 + len)?;
                labels.push(String::from_utf8_lossy(label).to_ascii_lowercase());
                pos += len + 1;
            }
            // 0x40 and 0x80 label types are reserved
            _ => return None,
        }
    }
}

/// Build the NXDOMAIN datagram answering `query`.
///
/// # Errors
///
/// Fails only when the stored IP header cannot be rewritten.
pub fn build_negative_response(query: &DnsQuery) -> Result<Vec<u8>, CodecError> {
    let mut payload = Vec::with_capacity(DNS_HEADER_LEN + query.question_raw.len());
    payload.extend_from_slice(&query.transaction_id.to_be_bytes());
    payload.extend_from_slice(&NXDOMAIN_FLAGS.to_be_bytes());
    // QDCOUNT 1, ANCOUNT/NSCOUNT/ARCOUNT 0
    payload.extend_from_slice(&[0, 1, 0, 0, 0, 0, 0, 0]);
    payload.extend_from_slice(&query.question_raw);
    wrap(query, &payload)
}

/// Wrap a DNS message into a datagram travelling back to the query's sender.
///
/// The original IP header is reused with addresses swapped, the total length
/// updated and the checksum recomputed. UDP ports are swapped and the UDP
/// checksum is left at zero.
///
/// # Errors
///
/// Returns [`CodecError::PayloadTooLarge`] when the datagram would exceed
/// 65535 bytes.
pub fn wrap(query: &DnsQuery, dns_payload: &[u8]) -> Result<Vec<u8>, CodecError> {
    let header_len = query.ip_header.len();
    if header_len < IPV4_MIN_HEADER_LEN {
        return Err(CodecError::MalformedHeader);
    }

    let udp_len = UDP_HEADER_LEN + dns_payload.len();
    let total_len = header_len + udp_len;
    if total_len > usize::from(u16::MAX) {
        return Err(CodecError::PayloadTooLarge { size: total_len });
    }

    let mut packet = vec![0u8; total_len];
    packet[..header_len].copy_from_slice(&query.ip_header);

    {
        let mut ip = MutableIpv4Packet::new(&mut packet[..header_len])
            .ok_or(CodecError::MalformedHeader)?;
        ip.set_source(query.destination());
        ip.set_destination(query.source());
        ip.set_total_length(total_len as u16);
        ip.set_next_level_protocol(IpNextHeaderProtocols::Udp);
        ip.set_checksum(0);
        let checksum = ipv4_checksum(ip.packet());
        ip.set_checksum(checksum);
    }

    {
        let mut udp = MutableUdpPacket::new(&mut packet[header_len..])
            .ok_or(CodecError::MalformedHeader)?;
        udp.set_source(query.destination_port());
        udp.set_destination(query.source_port());
        udp.set_length(udp_len as u16);
        udp.set_checksum(0);
        udp.set_payload(dns_payload);
    }

    Ok(packet)
}

/// Internet checksum over an IPv4 header whose checksum field is zeroed.
#[must_use]
pub fn ipv4_checksum(header: &[u8]) -> u16 {
    let mut sum: u64 = header
        .chunks(2)
        .map(|word| u64::from(u16::from_be_bytes([word[0], word.get(1).copied().unwrap_or(0)])))
        .sum();
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

/// Response code of a DNS message, if it has a complete header.
#[must_use]
pub fn response_code(dns_payload: &[u8]) -> Option<u8> {
    if dns_payload.len() < DNS_HEADER_LEN {
        return None;
    }
    Some(dns_payload[3] & 0x0F)
}
