//! RTSP request encoding and response decoding for the SAT>IP control session.
//!
//! Request layout:
//! ```text
//! SETUP rtsp://192.168.0.10/?src=1&freq=12402&pol=v RTSP/1.0\r\n
//! CSeq: 1\r\n
//! Transport: RTP/AVP;unicast;client_port=45000-45001\r\n
//! \r\n
//! ```
//!
//! Responses are decoded incrementally from a [`BytesMut`]; a partial
//! response yields `Ok(None)` so the caller can keep reading.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::types::{SatipServer, RTSP_VERSION};

/// Largest response head (status line + headers) accepted.
pub const MAX_HEAD_SIZE: usize = 16 * 1024;

/// Largest response body accepted.
pub const MAX_BODY_SIZE: usize = 64 * 1024;

/// Header carrying the server assigned stream handle.
pub const STREAM_ID_HEADER: &str = "com.ses.streamID";

/// RTSP methods used by a SAT>IP client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtspMethod {
    Options,
    Setup,
    Play,
    Teardown,
}

impl RtspMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            RtspMethod::Options => "OPTIONS",
            RtspMethod::Setup => "SETUP",
            RtspMethod::Play => "PLAY",
            RtspMethod::Teardown => "TEARDOWN",
        }
    }
}

/// An outgoing RTSP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtspRequest {
    pub method: RtspMethod,
    pub uri: String,
    pub cseq: u32,
    pub headers: Vec<(String, String)>,
}

impl RtspRequest {
    pub fn new(method: RtspMethod, uri: impl Into<String>, cseq: u32) -> Self {
        Self {
            method,
            uri: uri.into(),
            cseq,
            headers: Vec::new(),
        }
    }

    /// Append a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Append a `Session` header if a session is known.
    pub fn session(self, session: Option<&str>) -> Self {
        match session {
            Some(id) if !id.is_empty() => self.header("Session", id),
            _ => self,
        }
    }

    /// Serialize to wire format.
    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(256);
        out.put_slice(self.method.as_str().as_bytes());
        out.put_u8(b' ');
        out.put_slice(self.uri.as_bytes());
        out.put_u8(b' ');
        out.put_slice(RTSP_VERSION.as_bytes());
        out.put_slice(b"\r\n");
        out.put_slice(format!("CSeq: {}\r\n", self.cseq).as_bytes());
        for (name, value) in &self.headers {
            out.put_slice(name.as_bytes());
            out.put_slice(b": ");
            out.put_slice(value.as_bytes());
            out.put_slice(b"\r\n");
        }
        out.put_slice(b"\r\n");
        out.freeze()
    }
}

/// Parsed `Session:` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHeader {
    pub id: String,
    /// Timeout in milliseconds, if announced.
    pub timeout_ms: Option<u32>,
}

/// Parse `12345678;timeout=60` into a session id and timeout.
pub fn parse_session_header(value: &str) -> Option<SessionHeader> {
    let mut parts = value.split(';');
    let id = parts.next()?.trim();
    if id.is_empty() {
        return None;
    }

    let timeout_ms = parts
        .filter_map(|p| p.trim().strip_prefix("timeout="))
        .filter_map(|t| t.trim().parse::<u32>().ok())
        .next()
        .map(|secs| secs.saturating_mul(1000));

    Some(SessionHeader {
        id: id.to_string(),
        timeout_ms,
    })
}

/// A decoded RTSP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtspResponse {
    pub code: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl RtspResponse {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_success(&self) -> bool {
        self.code == 200
    }

    pub fn cseq(&self) -> Option<u32> {
        self.header("CSeq").and_then(|v| v.trim().parse().ok())
    }

    pub fn session(&self) -> Option<SessionHeader> {
        self.header("Session").and_then(parse_session_header)
    }

    pub fn stream_id(&self) -> Option<i32> {
        self.header(STREAM_ID_HEADER).and_then(|v| v.trim().parse().ok())
    }
}

/// Try to decode one complete response from the front of `buf`.
///
/// Consumes the response bytes on success and leaves any trailing data in
/// place. Returns `Ok(None)` when more data is needed.
pub fn decode_response(buf: &mut BytesMut) -> Result<Option<RtspResponse>, ProtocolError> {
    let head_end = match find_head_end(buf) {
        Some(pos) => pos,
        None => {
            if buf.len() > MAX_HEAD_SIZE {
                return Err(ProtocolError::HeadTooLarge(buf.len(), MAX_HEAD_SIZE));
            }
            return Ok(None);
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let mut lines = head.split("\r\n");

    let status_line = lines.next().unwrap_or_default();
    let (code, reason) = parse_status_line(status_line)?;

    let mut headers = Vec::new();
    for line in lines.filter(|l| !l.is_empty()) {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| ProtocolError::MalformedHeader(line.to_string()))?;
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    let content_length = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("Content-Length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);

    if content_length > MAX_BODY_SIZE {
        return Err(ProtocolError::BodyTooLarge(content_length, MAX_BODY_SIZE));
    }
    let total = (head_end + 4)
        .checked_add(content_length)
        .ok_or(ProtocolError::BodyTooLarge(content_length, MAX_BODY_SIZE))?;
    if buf.len() < total {
        return Ok(None);
    }

    buf.advance(head_end + 4);
    let body = buf.split_to(content_length).freeze();

    Ok(Some(RtspResponse {
        code,
        reason,
        headers,
        body,
    }))
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn parse_status_line(line: &str) -> Result<(u16, String), ProtocolError> {
    let invalid = || ProtocolError::InvalidStatusLine(line.to_string());

    let mut parts = line.splitn(3, ' ');
    let version = parts.next().ok_or_else(invalid)?;
    if !version.starts_with("RTSP/") {
        return Err(invalid());
    }
    let code = parts
        .next()
        .and_then(|c| c.parse::<u16>().ok())
        .ok_or_else(invalid)?;
    let reason = parts.next().unwrap_or_default().to_string();
    Ok((code, reason))
}

/// URI for an initial SETUP: `rtsp://host/?<params>`.
pub fn setup_uri(server: &SatipServer, params: &str) -> String {
    format!("{}?{}", server.base_uri(), params)
}

/// URI addressing an existing stream, optionally with a query.
pub fn stream_uri(server: &SatipServer, stream_id: i32, query: Option<&str>) -> String {
    match query {
        Some(q) if !q.is_empty() => format!("{}stream={}?{}", server.base_uri(), stream_id, q),
        _ => format!("{}stream={}", server.base_uri(), stream_id),
    }
}

/// Build the `addpids=..&delpids=..` query for a component update.
pub fn pid_query(added: &[u16], removed: &[u16]) -> String {
    let join = |pids: &[u16]| {
        pids.iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(",")
    };

    let mut parts = Vec::with_capacity(2);
    if !added.is_empty() {
        parts.push(format!("addpids={}", join(added)));
    }
    if !removed.is_empty() {
        parts.push(format!("delpids={}", join(removed)));
    }
    parts.join("&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_setup() {
        let req = RtspRequest::new(RtspMethod::Setup, "rtsp://10.0.0.1/?src=1&freq=12402", 1)
            .header("Transport", "RTP/AVP;unicast;client_port=45000-45001")
            .session(None);
        let encoded = req.encode();
        let text = std::str::from_utf8(&encoded).unwrap();
        assert!(text.starts_with("SETUP rtsp://10.0.0.1/?src=1&freq=12402 RTSP/1.0\r\n"));
        assert!(text.contains("CSeq: 1\r\n"));
        assert!(text.contains("Transport: RTP/AVP;unicast;client_port=45000-45001\r\n"));
        assert!(!text.contains("Session"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_decode_setup_response() {
        let mut buf = BytesMut::from(
            &b"RTSP/1.0 200 OK\r\nCSeq: 1\r\nSession: 0D8E5A3B;timeout=30\r\ncom.ses.streamID: 7\r\n\r\n"[..],
        );
        let resp = decode_response(&mut buf).unwrap().unwrap();
        assert!(resp.is_success());
        assert_eq!(resp.cseq(), Some(1));
        assert_eq!(
            resp.session(),
            Some(SessionHeader {
                id: "0D8E5A3B".to_string(),
                timeout_ms: Some(30_000),
            })
        );
        assert_eq!(resp.stream_id(), Some(7));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_partial_and_body() {
        let raw = b"RTSP/1.0 200 OK\r\nCSeq: 2\r\nContent-Length: 5\r\n\r\nhello";
        let mut buf = BytesMut::from(&raw[..raw.len() - 3]);
        assert_eq!(decode_response(&mut buf).unwrap(), None);

        buf.extend_from_slice(&raw[raw.len() - 3..]);
        let resp = decode_response(&mut buf).unwrap().unwrap();
        assert_eq!(&resp.body[..], b"hello");
    }

    #[test]
    fn test_oversized_body_is_rejected() {
        let mut buf = BytesMut::from(
            &b"RTSP/1.0 200 OK\r\nCSeq: 1\r\nContent-Length: 18446744073709551615\r\n\r\n"[..],
        );
        assert!(matches!(
            decode_response(&mut buf),
            Err(ProtocolError::BodyTooLarge(_, MAX_BODY_SIZE))
        ));

        let head = format!("RTSP/1.0 200 OK\r\nContent-Length: {}\r\n\r\n", MAX_BODY_SIZE + 1);
        let mut buf = BytesMut::from(head.as_bytes());
        assert!(matches!(
            decode_response(&mut buf),
            Err(ProtocolError::BodyTooLarge(_, MAX_BODY_SIZE))
        ));
    }

    #[test]
    fn test_decode_rejection() {
        let mut buf = BytesMut::from(&b"RTSP/1.0 503 Service Unavailable\r\nCSeq: 3\r\n\r\n"[..]);
        let resp = decode_response(&mut buf).unwrap().unwrap();
        assert_eq!(resp.code, 503);
        assert_eq!(resp.reason, "Service Unavailable");
        assert!(!resp.is_success());
    }

    #[test]
    fn test_invalid_status_line() {
        let mut buf = BytesMut::from(&b"HTTP/1.1 200 OK\r\n\r\n"[..]);
        assert!(matches!(
            decode_response(&mut buf),
            Err(ProtocolError::InvalidStatusLine(_))
        ));
    }

    #[test]
    fn test_session_without_timeout() {
        let header = parse_session_header(" 12345678 ").unwrap();
        assert_eq!(header.id, "12345678");
        assert_eq!(header.timeout_ms, None);
        assert_eq!(parse_session_header(";timeout=60"), None);
    }

    #[test]
    fn test_pid_query_and_uris() {
        assert_eq!(pid_query(&[103], &[101]), "addpids=103&delpids=101");
        assert_eq!(pid_query(&[0, 16, 17], &[]), "addpids=0,16,17");
        assert_eq!(pid_query(&[], &[]), "");

        let server = SatipServer::new("10.0.0.1");
        assert_eq!(stream_uri(&server, 3, None), "rtsp://10.0.0.1/stream=3");
        assert_eq!(
            stream_uri(&server, 3, Some("delpids=5")),
            "rtsp://10.0.0.1/stream=3?delpids=5"
        );
        assert_eq!(setup_uri(&server, "src=1"), "rtsp://10.0.0.1/?src=1");
    }
}
