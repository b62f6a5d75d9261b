//! SAT>IP network tuner client.
//!
//! A [`Tuner`] acquires and maintains a live transport stream from a SAT>IP
//! server. Callers select a source and components; a per-tuner worker thread
//! sets up the RTSP session, keeps it alive, follows the reception reports
//! and batches component changes into as few requests as possible.
//! Servers can be looked up from their description documents with
//! [`DescriptionFetcher`] and kept in a [`ServerList`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use satip_protocol::{PidType, SatipServer};
//! use satip_tuner::{BufferedDevice, Tuner, TunerConfig};
//!
//! satip_tuner::logging::init_logger();
//! let device = Arc::new(BufferedDevice::new(0));
//! let tuner = Tuner::new(device.clone(), TunerConfig::default()).unwrap();
//! tuner.open().unwrap();
//! tuner.set_pid(0, PidType::Other, true).unwrap();
//! tuner
//!     .set_source(Some(&SatipServer::new("192.168.0.10")), "src=1&freq=12402&pol=v", 0)
//!     .unwrap();
//! ```

#[macro_use]
pub mod logging;

pub mod client;
pub mod config;
pub mod device;
pub mod discover;
pub mod error;
pub mod interface;
pub mod pid;
pub mod state;
pub mod timer;
pub mod tuner;

pub use config::{load_config, TunerConfig};
pub use device::{BufferedDevice, TsRingBuffer};
pub use discover::{required_system, DescriptionFetcher, ServerList};
pub use error::{DiscoveryError, TunerError};
pub use interface::{ControlSession, DataPath, DeviceIf, ReceptionStatus, SessionInfo, TunerIf};
pub use pid::PidSet;
pub use state::{StateMode, TunerState};
pub use tuner::{keepalive_interval, Tuner};
