//! The tuner: caller-facing API over a background maintenance worker.
//!
//! Callers only record intents (source, component selection, close) under
//! the tuner lock and return immediately. All network I/O and every state
//! transition happens on the worker thread, see [`worker`].

mod worker;


use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use log::warn;
use parking_lot::{Condvar, Mutex};

use satip_protocol::{unescape_params, PidType, SatipServer, MAX_PID};

use crate::client::{AppDataStatus, RtspControl, StatusMailbox, UdpDataPath};
use crate::config::TunerConfig;
use crate::device_log;
use crate::error::TunerError;
use crate::interface::{ControlSession, DataPath, DeviceIf, ReceptionStatus, SessionInfo, TunerIf};
use crate::pid::PidSet;
use crate::state::{StateLedger, StateMode, TunerState};
use crate::timer::{Stopwatch, Wakeup};

pub use worker::keepalive_interval;
use worker::Worker;

/// Mutable tuner state, guarded by [`Shared::data`].
pub(crate) struct TunerData {
    pub(crate) current_state: TunerState,
    pub(crate) ledger: StateLedger,
    /// Pending target, committed at the next connect.
    pub(crate) next_server: Option<SatipServer>,
    pub(crate) next_params: Option<String>,
    pub(crate) current_server: Option<SatipServer>,
    pub(crate) stream_params: String,
    pub(crate) session: Option<SessionInfo>,
    pub(crate) pmt_pid: Option<u16>,
    /// Components the server currently delivers.
    pub(crate) pids: PidSet,
    pub(crate) add_pids: PidSet,
    pub(crate) del_pids: PidSet,
    /// The placeholder component is selected on the server.
    pub(crate) dummy_active: bool,
    /// Re-armed by every component change.
    pub(crate) pid_update: Stopwatch,
    pub(crate) has_lock: bool,
    pub(crate) signal_strength: Option<i32>,
    pub(crate) signal_quality: Option<i32>,
}

impl TunerData {
    fn new(config: &TunerConfig) -> Self {
        Self {
            current_state: TunerState::Idle,
            ledger: StateLedger::new(),
            next_server: None,
            next_params: None,
            current_server: None,
            stream_params: String::new(),
            session: None,
            pmt_pid: None,
            pids: PidSet::new(),
            add_pids: PidSet::new(),
            del_pids: PidSet::new(),
            dummy_active: false,
            pid_update: Stopwatch::expired("pid-update", config.pid_update_interval),
            has_lock: false,
            signal_strength: None,
            signal_quality: None,
        }
    }
}

/// State shared between the tuner handle, its worker and the data path.
pub(crate) struct Shared {
    pub(crate) device: Arc<dyn DeviceIf>,
    pub(crate) config: TunerConfig,
    pub(crate) data: Mutex<TunerData>,
    /// Notified whenever the worker writes `current_state`.
    pub(crate) state_changed: Condvar,
    pub(crate) wakeup: Wakeup,
    pub(crate) running: AtomicBool,
    pub(crate) mailbox: Arc<StatusMailbox>,
    pub(crate) bytes_received: AtomicU64,
}

impl Shared {
    pub(crate) fn id(&self) -> i32 {
        self.device.get_id()
    }

    /// Record a state request and wake the worker.
    pub(crate) fn request_state(&self, state: TunerState, mode: StateMode) -> bool {
        let accepted = self.data.lock().ledger.request(state, mode);
        if accepted {
            device_log!(debug, self.id(), "Requested state {} ({})", state, mode);
            self.wakeup.signal();
        }
        accepted
    }

    pub(crate) fn set_state(&self, state: TunerState) {
        let mut data = self.data.lock();
        if data.current_state != state {
            device_log!(info, self.id(), "State {} -> {}", data.current_state, state);
            data.current_state = state;
        }
        self.state_changed.notify_all();
    }
}

impl TunerIf for Shared {
    fn process_video_data(&self, data: &[u8]) {
        self.bytes_received
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        self.device.write_data(data);
    }

    fn process_application_data(&self, data: &[u8]) {
        self.mailbox.post(&String::from_utf8_lossy(data));
    }

    fn set_stream_id(&self, stream_id: i32) {
        self.device.set_stream_id(stream_id);
    }

    fn set_session_timeout(&self, session: &str, timeout_ms: u32) {
        self.device.set_session_timeout(session, timeout_ms);
    }

    fn get_id(&self) -> i32 {
        self.id()
    }
}

enum WorkerSlot {
    /// Not running; ready to be spawned by `open`.
    Parked(Worker),
    /// Spawned. After `close` the thread may still be finishing.
    Running(JoinHandle<Worker>),
    /// Lost to a failed spawn or a worker panic.
    Gone,
}

/// A SAT>IP tuner slot.
pub struct Tuner {
    shared: Arc<Shared>,
    worker: Mutex<WorkerSlot>,
}

impl Tuner {
    /// Create a tuner using the RTSP/UDP network collaborators.
    pub fn new(device: Arc<dyn DeviceIf>, config: TunerConfig) -> Result<Self, TunerError> {
        let id = device.get_id();
        let data_path = UdpDataPath::new(id, &config).map_err(TunerError::DataPath)?;
        let control =
            RtspControl::new(id, data_path.ports(), &config).map_err(TunerError::Runtime)?;
        let mailbox = Arc::new(StatusMailbox::new());
        let status = AppDataStatus::new(Arc::clone(&mailbox));

        Ok(Self::build(
            device,
            config,
            mailbox,
            Box::new(control),
            Box::new(status),
            Box::new(data_path),
        ))
    }

    /// Create a tuner with caller supplied collaborators.
    pub fn with_collaborators(
        device: Arc<dyn DeviceIf>,
        config: TunerConfig,
        control: Box<dyn ControlSession>,
        status: Box<dyn ReceptionStatus>,
        data_path: Box<dyn DataPath>,
    ) -> Self {
        let mailbox = Arc::new(StatusMailbox::new());
        Self::build(device, config, mailbox, control, status, data_path)
    }

    fn build(
        device: Arc<dyn DeviceIf>,
        config: TunerConfig,
        mailbox: Arc<StatusMailbox>,
        control: Box<dyn ControlSession>,
        status: Box<dyn ReceptionStatus>,
        data_path: Box<dyn DataPath>,
    ) -> Self {
        let shared = Arc::new(Shared {
            data: Mutex::new(TunerData::new(&config)),
            device,
            config,
            state_changed: Condvar::new(),
            wakeup: Wakeup::new(),
            running: AtomicBool::new(false),
            mailbox,
            bytes_received: AtomicU64::new(0),
        });
        let worker = Worker::new(Arc::clone(&shared), control, status, data_path);

        Self {
            shared,
            worker: Mutex::new(WorkerSlot::Parked(worker)),
        }
    }

    pub fn id(&self) -> i32 {
        self.shared.id()
    }

    /// Start the worker thread.
    pub fn open(&self) -> Result<(), TunerError> {
        let mut slot = self.worker.lock();
        let worker = match std::mem::replace(&mut *slot, WorkerSlot::Gone) {
            WorkerSlot::Parked(worker) => worker,
            WorkerSlot::Running(handle) => {
                if self.shared.running.load(Ordering::Acquire) {
                    *slot = WorkerSlot::Running(handle);
                    return Err(TunerError::AlreadyOpen);
                }
                if !handle.is_finished() {
                    // Closed, but the worker is still inside a network call.
                    *slot = WorkerSlot::Running(handle);
                    return Err(TunerError::Busy);
                }
                match handle.join() {
                    Ok(worker) => worker,
                    Err(_) => return Err(TunerError::Closed),
                }
            }
            WorkerSlot::Gone => return Err(TunerError::Closed),
        };

        self.shared.data.lock().ledger.reopen();
        self.shared.running.store(true, Ordering::Release);

        let id = self.id();
        let spawned = thread::Builder::new()
            .name(format!("satip-tuner-{}", id))
            .spawn(move || worker.run());
        match spawned {
            Ok(handle) => {
                *slot = WorkerSlot::Running(handle);
                device_log!(info, id, "Tuner opened");
                Ok(())
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::Release);
                self.shared.data.lock().ledger.close();
                Err(TunerError::Spawn(e))
            }
        }
    }

    /// Release the session and stop the worker.
    ///
    /// Waits at most one sleep interval for the worker to reach `Idle`. A
    /// worker stuck in a network call is left to finish on its own; it
    /// tears the session down once the call returns.
    pub fn close(&self) {
        let mut slot = self.worker.lock();
        let id = self.id();

        if !self.shared.running.load(Ordering::Acquire) {
            self.shared.data.lock().ledger.close();
            return;
        }

        let deadline = Instant::now() + self.shared.config.sleep_timeout;
        let reached_idle = {
            let mut data = self.shared.data.lock();
            data.ledger.request(TunerState::Release, StateMode::External);
            self.shared.wakeup.signal();
            while data.current_state != TunerState::Idle {
                if self
                    .shared
                    .state_changed
                    .wait_until(&mut data, deadline)
                    .timed_out()
                {
                    break;
                }
            }
            data.ledger.close();
            let idle = data.current_state == TunerState::Idle;
            if !idle {
                // The ledger is closed, so the worker can no longer move
                // the state anywhere but Idle.
                data.current_state = TunerState::Idle;
                self.shared.state_changed.notify_all();
            }
            idle
        };

        self.shared.running.store(false, Ordering::Release);
        self.shared.wakeup.signal();

        if reached_idle {
            if let WorkerSlot::Running(handle) = std::mem::replace(&mut *slot, WorkerSlot::Gone) {
                match handle.join() {
                    Ok(worker) => *slot = WorkerSlot::Parked(worker),
                    Err(_) => warn!("Tuner worker panicked [device {}]", id),
                }
            }
        } else {
            warn!("Tuner worker busy, closing without waiting [device {}]", id);
        }
        device_log!(info, id, "Tuner closed");
    }

    /// Select a server and tuning parameters. `index` > 0 picks a frontend.
    pub fn set_source(
        &self,
        server: Option<&SatipServer>,
        parameter: &str,
        index: i32,
    ) -> Result<(), TunerError> {
        let server = server.ok_or(TunerError::NoServer)?;

        let mut params = unescape_params(parameter);
        if index > 0 {
            params.push_str(&format!("&fe={}", index));
        }

        {
            let mut data = self.shared.data.lock();
            if data.ledger.is_closed() {
                return Err(TunerError::Closed);
            }
            device_log!(info, self.id(), "Set source {} ({})", server, params);
            data.next_server = Some(server.clone());
            data.next_params = Some(params);
        }

        if self.shared.request_state(TunerState::Set, StateMode::External) {
            Ok(())
        } else {
            Err(TunerError::Closed)
        }
    }

    /// Add (`on`) or remove a component from the selection.
    ///
    /// The change is sent with the next component update, once changes have
    /// stopped arriving for the update interval. Wakes the worker so the
    /// interval is measured from this call.
    pub fn set_pid(&self, pid: i32, pid_type: PidType, on: bool) -> Result<(), TunerError> {
        let pid = u16::try_from(pid)
            .ok()
            .filter(|p| *p <= MAX_PID)
            .ok_or(TunerError::InvalidPid(pid))?;

        let mut data = self.shared.data.lock();
        if on {
            data.add_pids.add(pid);
            data.del_pids.remove(pid);
        } else {
            data.del_pids.add(pid);
            data.add_pids.remove(pid);
        }
        if pid_type == PidType::Pmt {
            if on {
                data.pmt_pid = Some(pid);
            } else if data.pmt_pid == Some(pid) {
                data.pmt_pid = None;
            }
        }
        data.pid_update.reset();
        drop(data);
        self.shared.wakeup.signal();
        Ok(())
    }

    /// Request a state directly. Returns false once closed.
    pub fn request_state(&self, state: TunerState, mode: StateMode) -> bool {
        self.shared.request_state(state, mode)
    }

    /// Any state request pending?
    pub fn state_requested(&self) -> bool {
        self.shared.data.lock().ledger.is_requested()
    }

    pub fn state(&self) -> TunerState {
        self.shared.data.lock().current_state
    }

    pub fn is_tuned(&self) -> bool {
        self.state().is_usable()
    }

    pub fn has_lock(&self) -> bool {
        let data = self.shared.data.lock();
        data.current_state.is_usable() && data.has_lock
    }

    /// Last reported signal level, or the default before any report.
    pub fn signal_strength(&self) -> i32 {
        let data = self.shared.data.lock();
        data.signal_strength
            .unwrap_or(self.shared.config.default_signal_strength)
            .max(0)
    }

    /// Last reported signal quality, or the default before any report.
    pub fn signal_quality(&self) -> i32 {
        let data = self.shared.data.lock();
        data.signal_quality
            .unwrap_or(self.shared.config.default_signal_quality)
            .max(0)
    }

    /// One-line signal summary.
    pub fn signal_status(&self) -> String {
        format!(
            "lock={} strength={} quality={}",
            u8::from(self.has_lock()),
            self.signal_strength(),
            self.signal_quality()
        )
    }

    /// Multi-line snapshot of the tuner.
    pub fn information(&self) -> String {
        let signal = self.signal_status();
        let data = self.shared.data.lock();
        let server = data
            .current_server
            .as_ref()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        let (session, stream_id, timeout_ms) = match &data.session {
            Some(info) => (info.session.as_str(), info.stream_id, info.timeout_ms),
            None => ("-", -1, 0),
        };
        let pmt = data
            .pmt_pid
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());

        format!(
            "Device: {}\nState: {}\nServer: {}\nParameters: {}\nSession: {}\nStream id: {}\n\
             Timeout: {} ms\nPids: {}\nPmt pid: {}\nSignal: {}\nReceived: {} bytes\n",
            self.id(),
            data.current_state,
            server,
            data.stream_params,
            session,
            stream_id,
            timeout_ms,
            data.pids.list(),
            pmt,
            signal,
            self.shared.bytes_received.load(Ordering::Relaxed)
        )
    }

    /// Comma separated list of the components the server delivers.
    pub fn pids(&self) -> String {
        self.shared.data.lock().pids.list()
    }

    pub fn pmt_pid(&self) -> Option<u16> {
        self.shared.data.lock().pmt_pid
    }

    pub fn session(&self) -> Option<SessionInfo> {
        self.shared.data.lock().session.clone()
    }

    pub fn current_server(&self) -> Option<SatipServer> {
        self.shared.data.lock().current_server.clone()
    }

    /// Transport stream bytes delivered to the device.
    pub fn bytes_received(&self) -> u64 {
        self.shared.bytes_received.load(Ordering::Relaxed)
    }
}

impl Drop for Tuner {
    fn drop(&mut self) {
        self.close();
    }
}
