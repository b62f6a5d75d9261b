//! Maintenance loop of a tuner.
//!
//! One thread per tuner. Each iteration sleeps until the sleep timeout or a
//! wakeup, folds pending state requests into the current state, and then
//! performs the duty of that state:
//!
//! | state            | duty                                                  |
//! |------------------|-------------------------------------------------------|
//! | `Release`        | disconnect, become `Idle`                             |
//! | `Set`            | connect, escalate to `Release` after connect timeout  |
//! | `Tuned`/`Locked` | keepalive, reception status, component updates        |

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use log::debug;

use satip_protocol::{SatipServer, StatusError};

use crate::device_log;
use crate::interface::{ControlSession, DataPath, ReceptionStatus, TunerIf};
use crate::pid::PidSet;
use crate::state::{StateMode, TunerState};
use crate::timer::Stopwatch;

use super::Shared;

/// Keepalive interval for a session timeout: half the timeout, but never
/// below `min`.
pub fn keepalive_interval(timeout_ms: u32, min: Duration) -> Duration {
    Duration::from_millis(u64::from(timeout_ms / 2)).max(min)
}

/// Shortest sleep between two passes.
const MIN_WAIT: Duration = Duration::from_millis(10);

pub(crate) struct Worker {
    shared: Arc<Shared>,
    control: Box<dyn ControlSession>,
    status: Box<dyn ReceptionStatus>,
    data_path: Box<dyn DataPath>,
    /// Server the live session was set up on.
    bound_server: Option<SatipServer>,
    reconnect: Stopwatch,
    keepalive: Stopwatch,
    status_update: Stopwatch,
    /// Time since the last reception report.
    report_silence: Stopwatch,
}

impl Worker {
    pub(crate) fn new(
        shared: Arc<Shared>,
        control: Box<dyn ControlSession>,
        status: Box<dyn ReceptionStatus>,
        data_path: Box<dyn DataPath>,
    ) -> Self {
        let config = &shared.config;
        let reconnect = Stopwatch::new("reconnect", config.connect_timeout);
        let keepalive = Stopwatch::new("keepalive", config.min_keepalive_interval);
        let status_update = Stopwatch::expired("status-update", config.status_update_interval);
        let report_silence = Stopwatch::new("report-silence", config.connect_timeout);

        Self {
            shared,
            control,
            status,
            data_path,
            bound_server: None,
            reconnect,
            keepalive,
            status_update,
            report_silence,
        }
    }

    fn id(&self) -> i32 {
        self.shared.id()
    }

    /// Loop until the tuner is closed. Hands the worker back for reuse.
    pub(crate) fn run(mut self) -> Self {
        device_log!(debug, self.id(), "Worker started");

        while self.shared.running.load(Ordering::Acquire) {
            self.shared.wakeup.wait(self.next_wait());
            if !self.shared.running.load(Ordering::Acquire) {
                break;
            }
            self.tick();
        }

        self.disconnect();
        self.shared.set_state(TunerState::Idle);
        device_log!(debug, self.id(), "Worker stopped");
        self
    }

    /// Sleep timeout, cut short when a pending component update falls due
    /// before it.
    fn next_wait(&self) -> Duration {
        let sleep = self.shared.config.sleep_timeout;
        let data = self.shared.data.lock();
        let pending = !data.add_pids.is_empty() || !data.del_pids.is_empty();
        if pending && data.session.is_some() && data.current_state.is_usable() {
            sleep.min(data.pid_update.remaining().max(MIN_WAIT))
        } else {
            sleep
        }
    }

    /// One scheduler pass.
    fn tick(&mut self) {
        let state = {
            let mut data = self.shared.data.lock();
            if let Some(next) = data.ledger.resolve() {
                if next == TunerState::Set {
                    self.reconnect.reset();
                }
                if next != data.current_state {
                    device_log!(info, self.id(), "State {} -> {}", data.current_state, next);
                    data.current_state = next;
                }
                self.shared.state_changed.notify_all();
            }
            data.current_state
        };

        match state {
            TunerState::Idle => {}
            TunerState::Release => {
                self.disconnect();
                self.shared.set_state(TunerState::Idle);
            }
            TunerState::Set => {
                if !self.connect() && self.reconnect.is_due() {
                    device_log!(
                        error,
                        self.id(),
                        "Connect failed for {:?}, releasing",
                        self.reconnect.elapsed()
                    );
                    self.request_internal(TunerState::Release);
                }
            }
            TunerState::Tuned | TunerState::Locked => {
                let alive = self.keep_alive();
                if alive {
                    self.read_reception_status();
                }
                if alive && self.update_pids(false) {
                    self.reconnect.reset();
                } else if self.reconnect.is_due() {
                    device_log!(error, self.id(), "Session unresponsive, releasing");
                    self.request_internal(TunerState::Release);
                }
            }
        }
    }

    fn request_internal(&self, state: TunerState) {
        self.shared.request_state(state, StateMode::Internal);
    }

    /// Set up (or re-tune) the session for the pending source.
    fn connect(&mut self) -> bool {
        let (server, params, mut current) = {
            let mut data = self.shared.data.lock();
            if let Some(server) = data.next_server.take() {
                data.current_server = Some(server);
            }
            if let Some(params) = data.next_params.take() {
                data.stream_params = params;
            }
            let Some(server) = data.current_server.clone() else {
                device_log!(warn, self.id(), "No server to connect to");
                return false;
            };
            (server, data.stream_params.clone(), data.session.clone())
        };

        if current.is_some() && self.bound_server.as_ref() != Some(&server) {
            device_log!(info, self.id(), "Switching to server {}", server);
            self.disconnect();
            current = None;
        }

        let info = match self.control.setup(&server, &params, current.as_ref()) {
            Ok(info) => info,
            Err(e) => {
                device_log!(warn, self.id(), "Setup on {} failed: {}", server.address, e);
                return false;
            }
        };

        self.shared.set_session_timeout(&info.session, info.timeout_ms);
        self.shared.set_stream_id(info.stream_id);

        if !self.data_path.is_attached() {
            let sink: Arc<dyn TunerIf> = self.shared.clone();
            if let Err(e) = self.data_path.attach(sink) {
                device_log!(error, self.id(), "Failed to attach data path: {}", e);
                if let Err(e) = self.control.teardown(&info.session) {
                    device_log!(warn, self.id(), "Teardown failed: {}", e);
                }
                return false;
            }
        }

        {
            let mut data = self.shared.data.lock();
            // A new session starts without components; send them all again.
            let pids = std::mem::take(&mut data.pids);
            for &pid in pids.iter() {
                if !data.del_pids.contains(pid) {
                    data.add_pids.add(pid);
                }
            }
            data.dummy_active = false;
            data.has_lock = false;
            data.session = Some(info.clone());
        }

        self.bound_server = Some(server);
        self.keepalive.set_interval(keepalive_interval(
            info.timeout_ms,
            self.shared.config.min_keepalive_interval,
        ));
        self.keepalive.reset();
        self.status_update = Stopwatch::expired(
            self.status_update.name(),
            self.shared.config.status_update_interval,
        );
        self.report_silence.reset();
        self.reconnect.reset();

        device_log!(
            info,
            self.id(),
            "Tuned: session {} stream {} timeout {} ms",
            info.session,
            info.stream_id,
            info.timeout_ms
        );
        self.request_internal(TunerState::Tuned);
        self.update_pids(true);
        true
    }

    /// Tear the session down. Safe to call without a session.
    fn disconnect(&mut self) {
        self.data_path.detach();

        let session = {
            let mut data = self.shared.data.lock();
            data.has_lock = false;
            data.signal_strength = None;
            data.signal_quality = None;
            data.session.take()
        };

        if let Some(session) = session {
            device_log!(info, self.id(), "Tearing down session {}", session.session);
            if let Err(e) = self.control.teardown(&session.session) {
                device_log!(warn, self.id(), "Teardown failed: {}", e);
            }
            self.shared.set_stream_id(-1);
        }
        self.bound_server = None;
    }

    /// Refresh the session when the keepalive interval has passed.
    fn keep_alive(&mut self) -> bool {
        let Some(session) = self.session_token() else {
            return false;
        };
        if !self.keepalive.is_due() {
            return true;
        }

        match self.control.refresh(&session) {
            Ok(()) => {
                debug!("Keepalive sent [device {}]", self.id());
                self.keepalive.reset();
                true
            }
            Err(e) => {
                device_log!(warn, self.id(), "Keepalive failed: {}", e);
                false
            }
        }
    }

    fn read_reception_status(&mut self) {
        if !self.status_update.is_due() {
            return;
        }
        self.status_update.reset();

        match self.status.poll() {
            Ok(report) => {
                self.report_silence.reset();
                let state = {
                    let mut data = self.shared.data.lock();
                    data.signal_strength = Some(report.strength);
                    data.signal_quality = Some(report.quality);
                    data.has_lock = report.locked;
                    data.current_state
                };
                if report.locked && state == TunerState::Tuned {
                    self.request_internal(TunerState::Locked);
                } else if !report.locked && state == TunerState::Locked {
                    device_log!(warn, self.id(), "Signal lock lost");
                    self.request_internal(TunerState::Tuned);
                }
            }
            Err(StatusError::NoData) => {
                if !self.report_silence.is_due() {
                    return;
                }
                let was_locked = {
                    let mut data = self.shared.data.lock();
                    let locked = data.current_state == TunerState::Locked;
                    if locked {
                        data.has_lock = false;
                    }
                    locked
                };
                if was_locked {
                    device_log!(
                        warn,
                        self.id(),
                        "No reception report for {:?}",
                        self.report_silence.elapsed()
                    );
                    self.request_internal(TunerState::Tuned);
                }
            }
            Err(e) => device_log!(debug, self.id(), "Ignoring reception status: {}", e),
        }
    }

    /// Send pending component changes once the update interval has passed
    /// since the last change.
    fn update_pids(&mut self, force: bool) -> bool {
        let dummy = self.shared.config.dummy_pid;

        let (session, added, removed, applied_add, applied_del, dummy_active) = {
            let mut data = self.shared.data.lock();
            let Some(session) = data.session.as_ref().map(|s| s.session.clone()) else {
                return false;
            };
            if !force && !data.pid_update.is_due() {
                return true;
            }

            let mut added = data.add_pids.difference(&data.pids);
            let mut removed = data.del_pids.intersection(&data.pids);
            if added.is_empty() && removed.is_empty() {
                data.add_pids.clear();
                data.del_pids.clear();
                return true;
            }

            // Keep the server from delivering everything when nothing is selected.
            let empty_after = data.pids.len() + added.len() == removed.len();
            let mut dummy_active = data.dummy_active;
            if empty_after && !dummy_active {
                if removed.contains(dummy) {
                    removed.remove(dummy);
                } else {
                    added.add(dummy);
                }
                dummy_active = true;
            } else if !empty_after && dummy_active {
                if added.contains(dummy) {
                    added.remove(dummy);
                } else {
                    removed.add(dummy);
                }
                dummy_active = false;
            }

            (
                session,
                added,
                removed,
                data.add_pids.clone(),
                data.del_pids.clone(),
                dummy_active,
            )
        };

        if !added.is_empty() || !removed.is_empty() {
            if let Err(e) = self.control.update_components(&session, &added, &removed) {
                device_log!(warn, self.id(), "Component update failed: {}", e);
                // Retry after another full interval.
                self.shared.data.lock().pid_update.reset();
                return false;
            }
        }

        let mut data = self.shared.data.lock();
        apply_delta(&mut data.pids, &applied_add, &applied_del);
        for &pid in applied_add.iter() {
            data.add_pids.remove(pid);
        }
        for &pid in applied_del.iter() {
            data.del_pids.remove(pid);
        }
        data.dummy_active = dummy_active;
        device_log!(debug, self.id(), "Components: {}", data.pids.list());
        true
    }

    fn session_token(&self) -> Option<String> {
        self.shared
            .data
            .lock()
            .session
            .as_ref()
            .map(|s| s.session.clone())
    }
}

fn apply_delta(pids: &mut PidSet, added: &PidSet, removed: &PidSet) {
    for &pid in added.iter() {
        pids.add(pid);
    }
    for &pid in removed.iter() {
        pids.remove(pid);
    }
}
