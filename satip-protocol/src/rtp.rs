//! RTP framing for the media data path.
//!
//! Only what is needed to get at the transport stream payload is decoded;
//! sequence and timestamp tracking is left to the consumer.

use crate::error::ProtocolError;

/// Size of the fixed RTP header.
pub const RTP_HEADER_SIZE: usize = 12;

/// Payload type used for MPEG-2 transport streams.
pub const PAYLOAD_TYPE_MP2T: u8 = 33;

/// Fixed header fields of an RTP packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    pub marker: bool,
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

/// Parse an RTP packet and return its header and payload slice.
pub fn parse_rtp(packet: &[u8]) -> Result<(RtpHeader, &[u8]), ProtocolError> {
    if packet.len() < RTP_HEADER_SIZE {
        return Err(ProtocolError::PacketTooShort {
            expected: RTP_HEADER_SIZE,
            actual: packet.len(),
        });
    }

    let version = packet[0] >> 6;
    if version != 2 {
        return Err(ProtocolError::UnsupportedVersion(version));
    }

    let padding = packet[0] & 0x20 != 0;
    let extension = packet[0] & 0x10 != 0;
    let csrc_count = (packet[0] & 0x0F) as usize;

    let header = RtpHeader {
        marker: packet[1] & 0x80 != 0,
        payload_type: packet[1] & 0x7F,
        sequence: u16::from_be_bytes([packet[2], packet[3]]),
        timestamp: u32::from_be_bytes([packet[4], packet[5], packet[6], packet[7]]),
        ssrc: u32::from_be_bytes([packet[8], packet[9], packet[10], packet[11]]),
    };

    let mut start = RTP_HEADER_SIZE + csrc_count * 4;
    if extension {
        if packet.len() < start + 4 {
            return Err(ProtocolError::PacketTooShort {
                expected: start + 4,
                actual: packet.len(),
            });
        }
        let words = u16::from_be_bytes([packet[start + 2], packet[start + 3]]) as usize;
        start += 4 + words * 4;
    }

    let mut end = packet.len();
    if padding && end > start {
        end = end.saturating_sub(packet[end - 1] as usize);
    }

    if start > end {
        return Err(ProtocolError::PacketTooShort {
            expected: start,
            actual: packet.len(),
        });
    }

    Ok((header, &packet[start..end]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(first: u8, extra: &[u8], payload: &[u8]) -> Vec<u8> {
        let mut p = vec![first, PAYLOAD_TYPE_MP2T, 0x00, 0x2A, 0, 0, 0, 1, 0xDE, 0xAD, 0xBE, 0xEF];
        p.extend_from_slice(extra);
        p.extend_from_slice(payload);
        p
    }

    #[test]
    fn test_plain_payload() {
        let ts = [0x47u8; 188];
        let raw = packet(0x80, &[], &ts);
        let (header, payload) = parse_rtp(&raw).unwrap();
        assert_eq!(header.payload_type, PAYLOAD_TYPE_MP2T);
        assert_eq!(header.sequence, 42);
        assert_eq!(header.ssrc, 0xDEADBEEF);
        assert_eq!(payload.len(), 188);
    }

    #[test]
    fn test_csrc_extension_and_padding() {
        // one CSRC, one extension word, two bytes of padding
        let extra = [0, 0, 0, 9, 0xBE, 0xDE, 0x00, 0x01, 1, 2, 3, 4];
        let mut raw = packet(0x80 | 0x20 | 0x10 | 0x01, &extra, &[0x47; 188]);
        raw.extend_from_slice(&[0, 2]);
        let (_, payload) = parse_rtp(&raw).unwrap();
        assert_eq!(payload.len(), 188);
        assert!(payload.iter().all(|&b| b == 0x47));
    }

    #[test]
    fn test_rejects_bad_packets() {
        assert!(matches!(
            parse_rtp(&[0x80, 33]),
            Err(ProtocolError::PacketTooShort { .. })
        ));
        let raw = packet(0x40, &[], &[0x47; 4]);
        assert_eq!(parse_rtp(&raw), Err(ProtocolError::UnsupportedVersion(1)));
    }
}
