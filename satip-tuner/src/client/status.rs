//! Reception status fed from application data.

use std::sync::Arc;

use parking_lot::Mutex;
use satip_protocol::{parse_reception_report, ReceptionReport, StatusError};

use crate::interface::ReceptionStatus;

/// Holds the newest application data string received on the status channel.
#[derive(Debug, Default)]
pub struct StatusMailbox {
    latest: Mutex<Option<String>>,
}

impl StatusMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored report.
    pub fn post(&self, data: &str) {
        *self.latest.lock() = Some(data.to_string());
    }

    /// Take the stored report, leaving the mailbox empty.
    pub fn take(&self) -> Option<String> {
        self.latest.lock().take()
    }
}

/// [`ReceptionStatus`] backed by a [`StatusMailbox`].
pub struct AppDataStatus {
    mailbox: Arc<StatusMailbox>,
}

impl AppDataStatus {
    pub fn new(mailbox: Arc<StatusMailbox>) -> Self {
        Self { mailbox }
    }
}

impl ReceptionStatus for AppDataStatus {
    fn poll(&mut self) -> Result<ReceptionReport, StatusError> {
        let data = self.mailbox.take().ok_or(StatusError::NoData)?;
        Ok(parse_reception_report(&data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_takes_latest_report() {
        let mailbox = Arc::new(StatusMailbox::new());
        let mut status = AppDataStatus::new(Arc::clone(&mailbox));
        assert_eq!(status.poll(), Err(StatusError::NoData));

        mailbox.post("ver=1.0;src=1;tuner=1,100,0,5,12402,v;pids=0");
        mailbox.post("ver=1.0;src=1;tuner=1,200,1,12,12402,v;pids=0");
        let report = status.poll().unwrap();
        assert_eq!(report.strength, 200);
        assert_eq!(report.quality, 12);
        assert!(report.locked);

        assert_eq!(status.poll(), Err(StatusError::NoData));
    }

    #[test]
    fn test_poll_reports_garbage() {
        let mailbox = Arc::new(StatusMailbox::new());
        let mut status = AppDataStatus::new(Arc::clone(&mailbox));
        mailbox.post("ver=1.0;src=1");
        assert!(matches!(status.poll(), Err(StatusError::Invalid(_))));
    }
}
