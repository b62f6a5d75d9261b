//! SAT>IP reception report parsing.
//!
//! Reports look like
//! `ver=1.0;src=1;tuner=1,240,1,15,12402,v,dvbs2,8psk,off,0.35,27500,34;pids=0,16`
//! where the `tuner=` fields are frontend id, level (0-255), lock (0/1) and
//! quality (0-15) followed by the tuning parameters.

use crate::error::ProtocolError;

/// Signal metrics reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceptionReport {
    /// Signal level, 0..=255.
    pub strength: i32,
    /// Signal quality, 0..=15.
    pub quality: i32,
    pub locked: bool,
}

/// Parse the `tuner=` section of an application data string.
pub fn parse_reception_report(data: &str) -> Result<ReceptionReport, ProtocolError> {
    let tuner = data
        .split(';')
        .find_map(|part| part.trim().strip_prefix("tuner="))
        .ok_or_else(|| ProtocolError::InvalidReport("missing tuner section".to_string()))?;

    let fields: Vec<&str> = tuner.split(',').collect();
    if fields.len() < 4 {
        return Err(ProtocolError::InvalidReport(format!("short tuner section: {}", tuner)));
    }

    let number = |idx: usize, max: i32| -> Result<i32, ProtocolError> {
        fields[idx]
            .trim()
            .parse::<i32>()
            .map(|v| v.clamp(0, max))
            .map_err(|_| ProtocolError::InvalidReport(format!("bad field {}: {:?}", idx, fields[idx])))
    };

    Ok(ReceptionReport {
        strength: number(1, 255)?,
        locked: number(2, 1)? == 1,
        quality: number(3, 15)?,
    })
}
