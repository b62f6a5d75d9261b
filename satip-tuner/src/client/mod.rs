//! Network collaborators of the tuner: RTSP control, UDP data path and the
//! reception status feed.

pub mod data_path;
pub mod rtsp;
pub mod status;

pub use data_path::UdpDataPath;
pub use rtsp::RtspControl;
pub use status::{AppDataStatus, StatusMailbox};
