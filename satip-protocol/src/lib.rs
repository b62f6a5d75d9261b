//! Protocol definitions for the SAT>IP tuner client.
//!
//! A SAT>IP session is split into a control channel and a data path:
//!
//! - [`rtsp`]: RTSP requests (`SETUP`, `PLAY`, `OPTIONS`, `TEARDOWN`) and
//!   incremental response decoding, including the `Session` and
//!   `com.ses.streamID` headers.
//! - [`rtp`]: media datagrams carrying the transport stream.
//! - [`rtcp`]: status datagrams; `APP`/`SES1` packets carry reception reports.
//! - [`status`]: parsing of those reports into signal metrics.
//! - [`description`]: the server's UPnP `description.xml`.
//!
//! # Example
//!
//! ```rust
//! use bytes::BytesMut;
//! use satip_protocol::rtsp::{decode_response, RtspMethod, RtspRequest};
//!
//! let request = RtspRequest::new(RtspMethod::Options, "rtsp://10.0.0.1/", 2)
//!     .session(Some("0D8E5A3B"));
//! assert!(request.encode().starts_with(b"OPTIONS rtsp://10.0.0.1/ RTSP/1.0\r\n"));
//!
//! let mut buf = BytesMut::from(&b"RTSP/1.0 200 OK\r\nCSeq: 2\r\nSession: 0D8E5A3B;timeout=60\r\n\r\n"[..]);
//! let response = decode_response(&mut buf).unwrap().unwrap();
//! assert_eq!(response.session().unwrap().timeout_ms, Some(60_000));
//! ```

pub mod description;
pub mod error;
pub mod rtcp;
pub mod rtp;
pub mod rtsp;
pub mod status;
pub mod types;

pub use description::{parse_description, ServerDescription};
pub use error::{ProtocolError, RtspError, StatusError};
pub use rtsp::{decode_response, RtspMethod, RtspRequest, RtspResponse, SessionHeader};
pub use status::{parse_reception_report, ReceptionReport};
pub use types::{
    unescape_params, PidType, SatipServer, TransportMode, DEFAULT_RTSP_PORT,
    DEFAULT_SESSION_TIMEOUT_MS, MAX_PID,
};
