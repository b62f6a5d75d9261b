//! Collaborator interfaces of the tuner core.
//!
//! The core never talks to sockets directly. It drives these traits from its
//! worker thread; [`crate::client`] provides the network implementations and
//! tests substitute in-memory ones.

use std::sync::Arc;

use satip_protocol::{ReceptionReport, RtspError, SatipServer, StatusError};

use crate::pid::PidSet;

/// Session identity returned by a successful setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Opaque session token.
    pub session: String,
    /// Server assigned stream handle.
    pub stream_id: i32,
    /// Negotiated session timeout in milliseconds.
    pub timeout_ms: u32,
}

/// Control channel of a tuner session.
///
/// Every call blocks the worker thread and must be bounded by a timeout.
pub trait ControlSession: Send {
    /// Establish (or, when `current` is given for the same server, re-tune)
    /// a session for `params` on `server`.
    fn setup(
        &mut self,
        server: &SatipServer,
        params: &str,
        current: Option<&SessionInfo>,
    ) -> Result<SessionInfo, RtspError>;

    /// End the session.
    fn teardown(&mut self, session: &str) -> Result<(), RtspError>;

    /// Keep the session from expiring.
    fn refresh(&mut self, session: &str) -> Result<(), RtspError>;

    /// Change the component selection of the session.
    fn update_components(
        &mut self,
        session: &str,
        added: &PidSet,
        removed: &PidSet,
    ) -> Result<(), RtspError>;
}

/// Receivers delivering media and application data for a session.
pub trait DataPath: Send {
    /// Local RTP and RTCP ports to advertise in the setup request.
    fn ports(&self) -> (u16, u16);

    /// Start delivering data to `sink`.
    fn attach(&mut self, sink: Arc<dyn TunerIf>) -> std::io::Result<()>;

    /// Stop delivering data. Safe to call when detached.
    fn detach(&mut self);

    fn is_attached(&self) -> bool;
}

/// Source of reception status reports.
pub trait ReceptionStatus: Send {
    /// Most recent signal report.
    fn poll(&mut self) -> Result<ReceptionReport, StatusError>;
}

/// Callbacks into a tuner from its collaborators.
pub trait TunerIf: Send + Sync {
    /// Transport stream payload from the media channel.
    fn process_video_data(&self, data: &[u8]);
    /// Application payload from the status channel.
    fn process_application_data(&self, data: &[u8]);
    fn set_stream_id(&self, stream_id: i32);
    fn set_session_timeout(&self, session: &str, timeout_ms: u32);
    fn get_id(&self) -> i32;
}

/// The device that owns a tuner and consumes its stream.
pub trait DeviceIf: Send + Sync {
    /// Identifier of this tuner slot, used in log messages.
    fn get_id(&self) -> i32;

    /// Receive transport stream data.
    fn write_data(&self, data: &[u8]);

    fn set_stream_id(&self, _stream_id: i32) {}

    fn set_session_timeout(&self, _session: &str, _timeout_ms: u32) {}
}
