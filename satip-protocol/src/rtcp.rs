//! RTCP framing for the status data path.
//!
//! SAT>IP servers piggy-back reception reports on RTCP `APP` packets named
//! `SES1`. Layout of such a packet:
//! ```text
//! +----+----+--------+--------+--------+------+--------+---------------+
//! |V/P/| PT | length |  SSRC  |  name  |  id  | strlen |   string      |
//! |sub |204 | u16 BE | 4 bytes| "SES1" | u16  | u16 BE | strlen bytes  |
//! +----+----+--------+--------+--------+------+--------+---------------+
//! ```

use crate::error::ProtocolError;
use crate::types::SATIP_APP_NAME;

/// RTCP packet type for application-defined packets.
pub const RTCP_PT_APP: u8 = 204;

/// Offset of the string payload inside a SAT>IP APP packet.
const APP_STRING_OFFSET: usize = 16;

/// Collect the string payloads of all `SES1` APP packets in a compound packet.
pub fn satip_app_payloads(compound: &[u8]) -> Result<Vec<&[u8]>, ProtocolError> {
    let mut payloads = Vec::new();
    let mut offset = 0;

    while offset + 4 <= compound.len() {
        let version = compound[offset] >> 6;
        if version != 2 {
            return Err(ProtocolError::UnsupportedVersion(version));
        }

        let packet_type = compound[offset + 1];
        let words = u16::from_be_bytes([compound[offset + 2], compound[offset + 3]]) as usize;
        let packet_len = (words + 1) * 4;
        if offset + packet_len > compound.len() {
            return Err(ProtocolError::PacketTooShort {
                expected: offset + packet_len,
                actual: compound.len(),
            });
        }

        let packet = &compound[offset..offset + packet_len];
        if packet_type == RTCP_PT_APP && packet.len() >= APP_STRING_OFFSET && packet[8..12] == SATIP_APP_NAME {
            let str_len = u16::from_be_bytes([packet[14], packet[15]]) as usize;
            let end = (APP_STRING_OFFSET + str_len).min(packet.len());
            payloads.push(&packet[APP_STRING_OFFSET..end]);
        }

        offset += packet_len;
    }

    Ok(payloads)
}
