//! RTSP control session against a SAT>IP server.
//!
//! The worker thread calls into [`RtspControl`] synchronously; each exchange
//! runs on a private current-thread tokio runtime and is bounded by the
//! connect timeout.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use log::{error, trace, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use satip_protocol::rtsp::{pid_query, setup_uri, stream_uri};
use satip_protocol::{
    decode_response, RtspError, RtspMethod, RtspRequest, RtspResponse, SatipServer,
    TransportMode, DEFAULT_SESSION_TIMEOUT_MS,
};

use crate::config::TunerConfig;
use crate::device_log;
use crate::interface::{ControlSession, SessionInfo};
use crate::pid::PidSet;

/// RTSP implementation of [`ControlSession`].
pub struct RtspControl {
    device_id: i32,
    runtime: tokio::runtime::Runtime,
    stream: Option<TcpStream>,
    read_buf: BytesMut,
    /// Server the current session lives on.
    server: Option<SatipServer>,
    stream_id: i32,
    cseq: u32,
    ports: (u16, u16),
    transport: TransportMode,
    timeout: Duration,
    user_agent: String,
}

impl RtspControl {
    /// Create a control client advertising the given RTP/RTCP port pair.
    pub fn new(device_id: i32, ports: (u16, u16), config: &TunerConfig) -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        Ok(Self {
            device_id,
            runtime,
            stream: None,
            read_buf: BytesMut::with_capacity(4096),
            server: None,
            stream_id: -1,
            cseq: 1,
            ports,
            transport: config.transport,
            timeout: config.connect_timeout,
            user_agent: format!("{} (device {})", config.user_agent, device_id),
        })
    }

    /// Send one request and wait for its response.
    fn exchange(&mut self, server: &SatipServer, request: RtspRequest) -> Result<RtspResponse, RtspError> {
        let method = request.method;
        let cseq = request.cseq;
        let encoded = request.header("User-Agent", self.user_agent.clone()).encode();
        trace!("RTSP >>> {}", String::from_utf8_lossy(&encoded));

        let addr = server.socket_addr();
        let timeout = self.timeout;
        let stream = &mut self.stream;
        let read_buf = &mut self.read_buf;
        let result = self.runtime.block_on(async move {
            match tokio::time::timeout(timeout, roundtrip(stream, read_buf, &addr, encoded)).await {
                Ok(result) => result,
                Err(_) => Err(RtspError::Timeout(timeout)),
            }
        });
        self.cseq = self.cseq.wrapping_add(1);

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                // The connection is in an unknown state; start over next time.
                self.stream = None;
                self.read_buf.clear();
                return Err(e);
            }
        };

        trace!("RTSP <<< {} {}", response.code, response.reason);
        if let Some(echo) = response.cseq() {
            if echo != cseq {
                warn!("CSeq mismatch: sent {}, got {} [device {}]", cseq, echo, self.device_id);
            }
        }

        if !response.is_success() {
            error!(
                "Detected invalid status code {} for {} [device {}]",
                response.code,
                method.as_str(),
                self.device_id
            );
            return Err(RtspError::Status {
                method: method.as_str(),
                code: response.code,
                reason: response.reason,
            });
        }

        Ok(response)
    }

    fn current_server(&self) -> Result<SatipServer, RtspError> {
        self.server.clone().ok_or(RtspError::NoSession)
    }

    /// Best-effort TEARDOWN of a session that never became usable.
    fn abandon(&mut self, server: &SatipServer, session: &str) {
        let request = RtspRequest::new(
            RtspMethod::Teardown,
            stream_uri(server, self.stream_id, None),
            self.cseq,
        )
        .session(Some(session));
        if let Err(e) = self.exchange(server, request) {
            warn!("Teardown of session {} failed: {} [device {}]", session, e, self.device_id);
        }
        self.reset_session();
    }

    fn reset_session(&mut self) {
        self.server = None;
        self.stream_id = -1;
        self.cseq = 1;
        self.stream = None;
        self.read_buf.clear();
    }
}

async fn roundtrip(
    stream: &mut Option<TcpStream>,
    buf: &mut BytesMut,
    addr: &str,
    request: Bytes,
) -> Result<RtspResponse, RtspError> {
    if stream.is_none() {
        let s = TcpStream::connect(addr).await?;
        s.set_nodelay(true)?;
        *stream = Some(s);
        buf.clear();
    }
    let s = stream.as_mut().ok_or(RtspError::ConnectionClosed)?;

    s.write_all(&request).await?;

    loop {
        if let Some(response) = decode_response(buf)? {
            return Ok(response);
        }
        if s.read_buf(buf).await? == 0 {
            return Err(RtspError::ConnectionClosed);
        }
    }
}

impl ControlSession for RtspControl {
    fn setup(
        &mut self,
        server: &SatipServer,
        params: &str,
        current: Option<&SessionInfo>,
    ) -> Result<SessionInfo, RtspError> {
        let in_session = current.filter(|_| self.server.as_ref() == Some(server));
        if in_session.is_none() && self.server.as_ref() != Some(server) {
            self.reset_session();
        }

        let uri = match in_session {
            Some(info) => stream_uri(server, info.stream_id, Some(params)),
            None => setup_uri(server, params),
        };
        device_log!(debug, self.device_id, "SETUP {}", uri);

        let (rtp_port, rtcp_port) = self.ports;
        let request = RtspRequest::new(RtspMethod::Setup, uri, self.cseq)
            .header("Transport", self.transport.transport_header(rtp_port, rtcp_port))
            .session(in_session.map(|info| info.session.as_str()));
        let response = self.exchange(server, request)?;

        let session = response.session().ok_or(RtspError::MissingSession)?;
        let stream_id = response
            .stream_id()
            .or(in_session.map(|info| info.stream_id))
            .unwrap_or(-1);

        self.server = Some(server.clone());
        self.stream_id = stream_id;

        let play = RtspRequest::new(RtspMethod::Play, stream_uri(server, stream_id, None), self.cseq)
            .session(Some(&session.id));
        if let Err(e) = self.exchange(server, play) {
            if in_session.is_none() {
                // Nobody else knows this session yet; drop it on the server.
                self.abandon(server, &session.id);
            }
            return Err(e);
        }

        Ok(SessionInfo {
            session: session.id,
            stream_id,
            timeout_ms: session.timeout_ms.unwrap_or(DEFAULT_SESSION_TIMEOUT_MS),
        })
    }

    fn teardown(&mut self, session: &str) -> Result<(), RtspError> {
        let server = self.current_server()?;
        let request = RtspRequest::new(
            RtspMethod::Teardown,
            stream_uri(&server, self.stream_id, None),
            self.cseq,
        )
        .session(Some(session));

        let result = self.exchange(&server, request).map(|_| ());
        self.reset_session();
        result
    }

    fn refresh(&mut self, session: &str) -> Result<(), RtspError> {
        let server = self.current_server()?;
        let request = RtspRequest::new(RtspMethod::Options, server.base_uri(), self.cseq)
            .session(Some(session));
        self.exchange(&server, request).map(|_| ())
    }

    fn update_components(
        &mut self,
        session: &str,
        added: &PidSet,
        removed: &PidSet,
    ) -> Result<(), RtspError> {
        let server = self.current_server()?;
        let query = pid_query(added.as_slice(), removed.as_slice());
        let uri = stream_uri(&server, self.stream_id, Some(&query));
        device_log!(debug, self.device_id, "PLAY {}", uri);

        let request = RtspRequest::new(RtspMethod::Play, uri, self.cseq).session(Some(session));
        self.exchange(&server, request).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::thread;

    /// Minimal scripted RTSP server: answers each request with the next
    /// canned response and returns the request lines it saw.
    fn spawn_server(responses: Vec<&'static str>) -> (u16, thread::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (socket, _) = listener.accept().unwrap();
            let mut writer = socket.try_clone().unwrap();
            let mut reader = BufReader::new(socket);
            let mut seen = Vec::new();
            for response in responses {
                let mut first = String::new();
                reader.read_line(&mut first).unwrap();
                loop {
                    let mut line = String::new();
                    reader.read_line(&mut line).unwrap();
                    if line == "\r\n" || line.is_empty() {
                        break;
                    }
                    first.push_str(&line);
                }
                seen.push(first);
                writer.write_all(response.as_bytes()).unwrap();
            }
            let mut rest = Vec::new();
            let _ = reader.read_to_end(&mut rest);
            seen
        });
        (port, handle)
    }

    fn config() -> TunerConfig {
        TunerConfig {
            connect_timeout: Duration::from_secs(2),
            ..TunerConfig::default()
        }
    }

    #[test]
    fn test_setup_update_refresh_teardown() {
        let (port, server_thread) = spawn_server(vec![
            "RTSP/1.0 200 OK\r\nCSeq: 1\r\nSession: ABCD;timeout=30\r\ncom.ses.streamID: 4\r\n\r\n",
            "RTSP/1.0 200 OK\r\nCSeq: 2\r\nSession: ABCD\r\n\r\n",
            "RTSP/1.0 200 OK\r\nCSeq: 3\r\n\r\n",
            "RTSP/1.0 200 OK\r\nCSeq: 4\r\n\r\n",
            "RTSP/1.0 200 OK\r\nCSeq: 5\r\n\r\n",
        ]);
        let server = SatipServer::new("127.0.0.1").with_port(port);
        let mut control = RtspControl::new(1, (45000, 45001), &config()).unwrap();

        let info = control.setup(&server, "src=1&freq=12402", None).unwrap();
        assert_eq!(
            info,
            SessionInfo {
                session: "ABCD".to_string(),
                stream_id: 4,
                timeout_ms: 30_000,
            }
        );

        let added: PidSet = [0, 16].into_iter().collect();
        control.update_components("ABCD", &added, &PidSet::new()).unwrap();
        control.refresh("ABCD").unwrap();
        control.teardown("ABCD").unwrap();

        let seen = server_thread.join().unwrap();
        let base = format!("rtsp://127.0.0.1:{}/", port);
        assert!(seen[0].starts_with(&format!("SETUP {}?src=1&freq=12402 RTSP/1.0", base)));
        assert!(seen[0].contains("Transport: RTP/AVP;unicast;client_port=45000-45001"));
        assert!(seen[1].starts_with(&format!("PLAY {}stream=4 RTSP/1.0", base)));
        assert!(seen[1].contains("Session: ABCD"));
        assert!(seen[2].starts_with(&format!("PLAY {}stream=4?addpids=0,16 RTSP/1.0", base)));
        assert!(seen[3].starts_with(&format!("OPTIONS {} RTSP/1.0", base)));
        assert!(seen[4].starts_with(&format!("TEARDOWN {}stream=4 RTSP/1.0", base)));
    }

    #[test]
    fn test_failed_play_tears_down_new_session() {
        let (port, server_thread) = spawn_server(vec![
            "RTSP/1.0 200 OK\r\nCSeq: 1\r\nSession: LEAK;timeout=30\r\ncom.ses.streamID: 4\r\n\r\n",
            "RTSP/1.0 503 Service Unavailable\r\nCSeq: 2\r\n\r\n",
            "RTSP/1.0 200 OK\r\nCSeq: 3\r\n\r\n",
        ]);
        let server = SatipServer::new("127.0.0.1").with_port(port);
        let mut control = RtspControl::new(1, (45000, 45001), &config()).unwrap();

        let err = control.setup(&server, "src=1", None).unwrap_err();
        assert!(err.is_rejection());
        assert!(matches!(control.refresh("LEAK"), Err(RtspError::NoSession)));
        drop(control);

        let seen = server_thread.join().unwrap();
        let base = format!("rtsp://127.0.0.1:{}/", port);
        assert_eq!(seen.len(), 3);
        assert!(seen[1].starts_with(&format!("PLAY {}stream=4 RTSP/1.0", base)));
        assert!(seen[2].starts_with(&format!("TEARDOWN {}stream=4 RTSP/1.0", base)));
        assert!(seen[2].contains("Session: LEAK"));
    }

    #[test]
    fn test_rejection_is_reported() {
        let (port, server_thread) =
            spawn_server(vec!["RTSP/1.0 404 Not Found\r\nCSeq: 1\r\n\r\n"]);
        let server = SatipServer::new("127.0.0.1").with_port(port);
        let mut control = RtspControl::new(1, (45000, 45001), &config()).unwrap();

        let err = control.setup(&server, "src=1", None).unwrap_err();
        assert!(err.is_rejection());
        drop(control);
        server_thread.join().unwrap();
    }

    #[test]
    fn test_requires_session() {
        let mut control = RtspControl::new(1, (45000, 45001), &config()).unwrap();
        assert!(matches!(control.refresh("x"), Err(RtspError::NoSession)));
        assert!(matches!(control.teardown("x"), Err(RtspError::NoSession)));
    }
}
