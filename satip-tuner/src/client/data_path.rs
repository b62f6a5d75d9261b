//! UDP receivers for the media (RTP) and status (RTCP) channels.

use std::net::UdpSocket as StdUdpSocket;
use std::sync::Arc;

use log::{debug, info, trace, warn};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use satip_protocol::rtcp::satip_app_payloads;
use satip_protocol::rtp::parse_rtp;

use crate::config::TunerConfig;
use crate::interface::{DataPath, TunerIf};

/// Largest datagram accepted on either channel.
const MAX_DATAGRAM_SIZE: usize = 65536;

/// Attempts at finding a free even/odd port pair.
const PORT_PAIR_ATTEMPTS: usize = 16;

/// [`DataPath`] receiving unicast RTP/RTCP on a fixed local port pair.
///
/// Sockets are bound at construction so the ports can be advertised before
/// the session is set up. Receive tasks only run while attached.
pub struct UdpDataPath {
    device_id: i32,
    runtime: tokio::runtime::Runtime,
    rtp: Arc<UdpSocket>,
    rtcp: Arc<UdpSocket>,
    tasks: Vec<JoinHandle<()>>,
}

impl UdpDataPath {
    pub fn new(device_id: i32, config: &TunerConfig) -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name(format!("satip-rx-{}", device_id))
            .enable_all()
            .build()?;

        let (rtp, rtcp) = bind_port_pair(config.rtp_port)?;
        let (rtp, rtcp) = {
            let _guard = runtime.enter();
            (UdpSocket::from_std(rtp)?, UdpSocket::from_std(rtcp)?)
        };

        let path = Self {
            device_id,
            runtime,
            rtp: Arc::new(rtp),
            rtcp: Arc::new(rtcp),
            tasks: Vec::new(),
        };
        let (rtp_port, rtcp_port) = path.ports();
        info!(
            "Data path bound to ports {}-{} [device {}]",
            rtp_port, rtcp_port, device_id
        );
        Ok(path)
    }
}

/// Bind an even RTP port and the RTCP port right above it.
fn bind_port_pair(base: u16) -> std::io::Result<(StdUdpSocket, StdUdpSocket)> {
    if base != 0 {
        let rtp = bind_nonblocking(base)?;
        let rtcp = bind_nonblocking(base.wrapping_add(1))?;
        return Ok((rtp, rtcp));
    }

    let mut last_err = None;
    for _ in 0..PORT_PAIR_ATTEMPTS {
        let rtp = bind_nonblocking(0)?;
        let port = rtp.local_addr()?.port();
        if port % 2 != 0 || port == u16::MAX {
            continue;
        }
        match bind_nonblocking(port + 1) {
            Ok(rtcp) => return Ok((rtp, rtcp)),
            Err(e) => last_err = Some(e),
        }
    }

    Err(last_err.unwrap_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::AddrInUse, "no free RTP/RTCP port pair")
    }))
}

fn bind_nonblocking(port: u16) -> std::io::Result<StdUdpSocket> {
    let socket = StdUdpSocket::bind(("0.0.0.0", port))?;
    socket.set_nonblocking(true)?;
    Ok(socket)
}

async fn media_task(device_id: i32, socket: Arc<UdpSocket>, sink: Arc<dyn TunerIf>) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        let len = match socket.recv_from(&mut buf).await {
            Ok((len, _)) => len,
            Err(e) => {
                warn!("RTP receive failed: {} [device {}]", e, device_id);
                continue;
            }
        };
        match parse_rtp(&buf[..len]) {
            Ok((_, payload)) if !payload.is_empty() => sink.process_video_data(payload),
            Ok(_) => {}
            Err(e) => trace!("Dropping RTP datagram: {} [device {}]", e, device_id),
        }
    }
}

async fn status_task(device_id: i32, socket: Arc<UdpSocket>, sink: Arc<dyn TunerIf>) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        let len = match socket.recv_from(&mut buf).await {
            Ok((len, _)) => len,
            Err(e) => {
                warn!("RTCP receive failed: {} [device {}]", e, device_id);
                continue;
            }
        };
        match satip_app_payloads(&buf[..len]) {
            Ok(payloads) => {
                for payload in payloads {
                    sink.process_application_data(payload);
                }
            }
            Err(e) => trace!("Dropping RTCP datagram: {} [device {}]", e, device_id),
        }
    }
}

impl DataPath for UdpDataPath {
    fn ports(&self) -> (u16, u16) {
        let port = |s: &UdpSocket| s.local_addr().map(|a| a.port()).unwrap_or(0);
        (port(&self.rtp), port(&self.rtcp))
    }

    fn attach(&mut self, sink: Arc<dyn TunerIf>) -> std::io::Result<()> {
        self.detach();
        debug!("Attaching data path [device {}]", self.device_id);

        self.tasks.push(self.runtime.spawn(media_task(
            self.device_id,
            Arc::clone(&self.rtp),
            Arc::clone(&sink),
        )));
        self.tasks.push(self.runtime.spawn(status_task(
            self.device_id,
            Arc::clone(&self.rtcp),
            sink,
        )));
        Ok(())
    }

    fn detach(&mut self) {
        if self.tasks.is_empty() {
            return;
        }
        debug!("Detaching data path [device {}]", self.device_id);
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }

    fn is_attached(&self) -> bool {
        !self.tasks.is_empty()
    }
}

impl Drop for UdpDataPath {
    fn drop(&mut self) {
        self.detach();
    }
}
