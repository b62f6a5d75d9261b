//! Shared type definitions for the SAT>IP client.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Highest valid elementary stream identifier (13 bits).
pub const MAX_PID: u16 = 8191;

/// Default RTSP control port.
pub const DEFAULT_RTSP_PORT: u16 = 554;

/// Session timeout assumed when the server does not announce one (RTSP default).
pub const DEFAULT_SESSION_TIMEOUT_MS: u32 = 60_000;

/// RTSP protocol version string used on the request line.
pub const RTSP_VERSION: &str = "RTSP/1.0";

/// RTCP APP packet name used by SAT>IP servers for reception reports.
pub const SATIP_APP_NAME: [u8; 4] = *b"SES1";

/// A SAT>IP server a tuner can bind to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SatipServer {
    /// Host name or IP address.
    pub address: String,
    /// RTSP port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Capability string, e.g. `DVBS2-2`.
    #[serde(default)]
    pub model: String,
    /// Friendly name reported by the server.
    #[serde(default)]
    pub description: String,
}

fn default_port() -> u16 {
    DEFAULT_RTSP_PORT
}

impl SatipServer {
    /// Create a server entry on the default RTSP port.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            port: DEFAULT_RTSP_PORT,
            model: String::new(),
            description: String::new(),
        }
    }

    /// Builder-style port override.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Builder-style model/description.
    pub fn with_model(mut self, model: impl Into<String>, description: impl Into<String>) -> Self {
        self.model = model.into();
        self.description = description.into();
        self
    }

    /// Delivery systems and frontend counts announced in the model, e.g.
    /// `DVBS2-2,DVBT-1` gives `[("DVBS2", 2), ("DVBT", 1)]`.
    pub fn systems(&self) -> Vec<(&str, u32)> {
        self.model
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(|item| match item.rsplit_once('-') {
                Some((system, count)) => (system, count.trim().parse::<u32>().unwrap_or(1)),
                None => (item, 1),
            })
            .collect()
    }

    /// Does the server have a frontend for `system` (case-insensitive)?
    pub fn provides(&self, system: &str) -> bool {
        self.systems()
            .iter()
            .any(|(s, count)| *count > 0 && s.eq_ignore_ascii_case(system))
    }

    /// `host:port` for opening the control connection.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// Base RTSP URI, always ending in `/`.
    pub fn base_uri(&self) -> String {
        if self.port == DEFAULT_RTSP_PORT {
            format!("rtsp://{}/", self.address)
        } else {
            format!("rtsp://{}:{}/", self.address, self.port)
        }
    }
}

impl fmt::Display for SatipServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.address, self.model, self.description)
    }
}

/// RTP delivery mode requested in the SETUP transport header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    #[default]
    Unicast,
    Multicast,
}

impl TransportMode {
    /// Render the `Transport:` header value for the given port pair.
    pub fn transport_header(self, rtp_port: u16, rtcp_port: u16) -> String {
        match self {
            TransportMode::Unicast => {
                format!("RTP/AVP;unicast;client_port={}-{}", rtp_port, rtcp_port)
            }
            TransportMode::Multicast => {
                format!("RTP/AVP;multicast;port={}-{}", rtp_port, rtcp_port)
            }
        }
    }
}

impl std::str::FromStr for TransportMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unicast" | "0" => Ok(TransportMode::Unicast),
            "multicast" | "1" => Ok(TransportMode::Multicast),
            other => Err(format!("unknown transport mode: {}", other)),
        }
    }
}

/// Kind of elementary stream a component id refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PidType {
    Video,
    Audio,
    Teletext,
    Subtitle,
    /// Program map table of the selected service.
    Pmt,
    Other,
}

/// Undo percent-escaping in a SAT>IP query string, keeping `&`/`=` structure.
pub fn unescape_params(params: &str) -> String {
    url::form_urlencoded::parse(params.as_bytes())
        .map(|(key, value)| {
            if value.is_empty() {
                key.into_owned()
            } else {
                format!("{}={}", key, value)
            }
        })
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_uri() {
        let server = SatipServer::new("192.168.0.10");
        assert_eq!(server.base_uri(), "rtsp://192.168.0.10/");
        assert_eq!(server.socket_addr(), "192.168.0.10:554");

        let server = server.with_port(8554);
        assert_eq!(server.base_uri(), "rtsp://192.168.0.10:8554/");
    }

    #[test]
    fn test_systems() {
        let server = SatipServer::new("10.0.0.1").with_model("DVBS2-2, DVBT-1,DVBC", "box");
        assert_eq!(server.systems(), vec![("DVBS2", 2), ("DVBT", 1), ("DVBC", 1)]);
        assert!(server.provides("dvbs2"));
        assert!(server.provides("DVBC"));
        assert!(!server.provides("DVBT2"));
        assert!(SatipServer::new("10.0.0.1").systems().is_empty());
    }

    #[test]
    fn test_transport_header() {
        assert_eq!(
            TransportMode::Unicast.transport_header(45000, 45001),
            "RTP/AVP;unicast;client_port=45000-45001"
        );
        assert_eq!(
            TransportMode::Multicast.transport_header(45000, 45001),
            "RTP/AVP;multicast;port=45000-45001"
        );
        assert_eq!("Multicast".parse::<TransportMode>(), Ok(TransportMode::Multicast));
        assert!("broadcast".parse::<TransportMode>().is_err());
    }

    #[test]
    fn test_unescape_params() {
        assert_eq!(
            unescape_params("src=1&freq=12402&pol=v&msys=dvbs2"),
            "src=1&freq=12402&pol=v&msys=dvbs2"
        );
        assert_eq!(unescape_params("src%3D1%26freq=11494"), "src=1&freq=11494");
        assert_eq!(unescape_params("x_pmt=100%2C200"), "x_pmt=100,200");
    }
}
