//! Error types for the SAT>IP protocol layer.

use std::time::Duration;

use thiserror::Error;

/// Framing and parsing errors for control and data path messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// RTSP status line could not be parsed.
    #[error("Invalid status line: {0:?}")]
    InvalidStatusLine(String),

    /// A header line had no `:` separator.
    #[error("Malformed header line: {0:?}")]
    MalformedHeader(String),

    /// Response head is larger than we are willing to buffer.
    #[error("Response head too large: {0} bytes (max: {1})")]
    HeadTooLarge(usize, usize),

    /// Announced body length exceeds the accepted maximum.
    #[error("Response body too large: {0} bytes (max: {1})")]
    BodyTooLarge(usize, usize),

    /// Datagram is shorter than its fixed header.
    #[error("Packet too short: expected at least {expected} bytes, got {actual}")]
    PacketTooShort { expected: usize, actual: usize },

    /// RTP/RTCP version field is not 2.
    #[error("Unsupported RTP version: {0}")]
    UnsupportedVersion(u8),

    /// Server description document could not be parsed.
    #[error("Invalid server description: {0}")]
    InvalidDescription(String),

    /// Reception report did not contain a usable `tuner=` section.
    #[error("Invalid reception report: {0}")]
    InvalidReport(String),
}

/// Failures of a control-session exchange with a server.
#[derive(Error, Debug)]
pub enum RtspError {
    /// Socket level failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Request did not complete in time.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Server answered with a non-200 status code.
    #[error("Server rejected {method} with status {code} {reason}")]
    Status {
        method: &'static str,
        code: u16,
        reason: String,
    },

    /// Server closed the control connection.
    #[error("Connection closed by server")]
    ConnectionClosed,

    /// Response could not be decoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// SETUP succeeded but no session header was returned.
    #[error("Server did not assign a session")]
    MissingSession,

    /// Operation needs an established session.
    #[error("No active session")]
    NoSession,
}

impl RtspError {
    /// Returns true if the server explicitly refused the request.
    pub fn is_rejection(&self) -> bool {
        matches!(self, RtspError::Status { .. })
    }
}

/// Reception status poll failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StatusError {
    /// No report has arrived since the previous poll.
    #[error("No reception report available")]
    NoData,

    /// The last received report could not be parsed.
    #[error("Unusable reception report: {0}")]
    Invalid(#[from] ProtocolError),
}
