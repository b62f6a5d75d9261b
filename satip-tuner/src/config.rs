//! Tuner configuration.
//!
//! Timing constants default to the values SAT>IP servers are known to cope
//! with. They can be overridden from an INI file (`satip-tuner.ini`, section
//! `[Tuner]`) or from `SATIP_TUNER_*` environment variables.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, error, info};
use satip_protocol::TransportMode;

/// INI file looked up in the working directory.
pub const INI_FILE_NAME: &str = "satip-tuner.ini";

/// Tuner timing and transport settings.
#[derive(Debug, Clone)]
pub struct TunerConfig {
    /// Component sent when the selection would otherwise be empty.
    pub dummy_pid: u16,
    /// Strength reported before the first reception report.
    pub default_signal_strength: i32,
    /// Quality reported before the first reception report.
    pub default_signal_quality: i32,
    /// Maximum worker sleep between loop iterations.
    pub sleep_timeout: Duration,
    /// Minimum spacing between reception status polls.
    pub status_update_interval: Duration,
    /// Quiet period after the last component change before an update is sent.
    pub pid_update_interval: Duration,
    /// Bound for every network exchange and for connect retries.
    pub connect_timeout: Duration,
    /// Floor for the keepalive interval.
    pub min_keepalive_interval: Duration,
    /// RTP delivery mode requested in SETUP.
    pub transport: TransportMode,
    /// Base RTP port (even); 0 picks a free pair.
    pub rtp_port: u16,
    /// User-Agent header sent with RTSP and description requests.
    pub user_agent: String,
    /// List each capability of a discovered server as its own entry.
    pub single_model_servers: bool,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            dummy_pid: 100,
            default_signal_strength: 15,
            default_signal_quality: 224,
            sleep_timeout: Duration::from_millis(250),
            status_update_interval: Duration::from_millis(1000),
            pid_update_interval: Duration::from_millis(250),
            connect_timeout: Duration::from_millis(5000),
            min_keepalive_interval: Duration::from_millis(30000),
            transport: TransportMode::Unicast,
            rtp_port: 0,
            user_agent: format!("satip-tuner/{}", env!("CARGO_PKG_VERSION")),
            single_model_servers: false,
        }
    }
}

/// Load configuration.
///
/// Searches in the following order:
/// 1. `satip-tuner.ini` in the current directory
/// 2. Environment variables (`SATIP_TUNER_*`)
/// 3. Default values
pub fn load_config() -> TunerConfig {
    if let Some(ini_path) = find_ini_file() {
        info!("Loading tuner configuration from {:?}", ini_path);
        if let Some(config) = load_from_ini(&ini_path) {
            return config;
        }
    }

    load_from_env()
}

fn find_ini_file() -> Option<PathBuf> {
    let ini_path = std::env::current_dir().ok()?.join(INI_FILE_NAME);
    ini_path.exists().then_some(ini_path)
}

/// Simple INI section parser.
fn parse_ini(content: &str) -> HashMap<String, HashMap<String, String>> {
    let mut sections: HashMap<String, HashMap<String, String>> = HashMap::new();
    let mut current_section = String::new();

    for line in content.lines() {
        let line = line.trim();

        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }

        if line.starts_with('[') && line.ends_with(']') {
            current_section = line[1..line.len() - 1].to_string();
            sections.entry(current_section.clone()).or_default();
            continue;
        }

        if let Some((key, value)) = line.split_once('=') {
            sections
                .entry(current_section.clone())
                .or_default()
                .insert(key.trim().to_string(), value.trim().to_string());
        }
    }

    sections
}

/// Overlay key/value settings on top of the defaults.
///
/// `lookup` maps a setting name (INI key spelling) to its raw value.
fn apply_settings<F>(mut config: TunerConfig, lookup: F) -> TunerConfig
where
    F: Fn(&str) -> Option<String>,
{
    let millis = |key: &str| {
        lookup(key)
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_millis)
    };

    if let Some(v) = millis("SleepTimeout") {
        config.sleep_timeout = v;
    }
    if let Some(v) = millis("StatusUpdateInterval") {
        config.status_update_interval = v;
    }
    if let Some(v) = millis("PidUpdateInterval") {
        config.pid_update_interval = v;
    }
    if let Some(v) = millis("ConnectTimeout") {
        config.connect_timeout = v;
    }
    if let Some(v) = millis("MinKeepAliveInterval") {
        config.min_keepalive_interval = v;
    }
    if let Some(v) = lookup("DummyPid").and_then(|s| s.trim().parse().ok()) {
        config.dummy_pid = v;
    }
    if let Some(v) = lookup("RtpPort").and_then(|s| s.trim().parse::<u16>().ok()) {
        config.rtp_port = v & !1;
    }
    if let Some(v) = lookup("Transport").and_then(|s| s.parse().ok()) {
        config.transport = v;
    }
    if let Some(v) = lookup("UserAgent").filter(|s| !s.is_empty()) {
        config.user_agent = v;
    }
    if let Some(v) = lookup("SingleModelServers") {
        config.single_model_servers = matches!(v.trim(), "1" | "true" | "yes");
    }

    config
}

fn load_from_ini(path: &Path) -> Option<TunerConfig> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to read INI file: {}", e);
            return None;
        }
    };

    let sections = parse_ini(&content);
    let section = sections.get("Tuner")?;
    let config = apply_settings(TunerConfig::default(), |key| section.get(key).cloned());

    debug!("Tuner configuration loaded: {:?}", config);
    Some(config)
}

/// Environment variable name for an INI key, e.g. `ConnectTimeout` ->
/// `SATIP_TUNER_CONNECT_TIMEOUT`.
fn env_key(key: &str) -> String {
    let mut name = String::from("SATIP_TUNER");
    for (i, c) in key.chars().enumerate() {
        if i == 0 || c.is_ascii_uppercase() {
            name.push('_');
        }
        name.push(c.to_ascii_uppercase());
    }
    name
}

fn load_from_env() -> TunerConfig {
    let config = apply_settings(TunerConfig::default(), |key| std::env::var(env_key(key)).ok());
    debug!("Using environment/default tuner config: {:?}", config);
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TunerConfig::default();
        assert_eq!(config.dummy_pid, 100);
        assert_eq!(config.default_signal_strength, 15);
        assert_eq!(config.default_signal_quality, 224);
        assert_eq!(config.sleep_timeout, Duration::from_millis(250));
        assert_eq!(config.status_update_interval, Duration::from_millis(1000));
        assert_eq!(config.pid_update_interval, Duration::from_millis(250));
        assert_eq!(config.connect_timeout, Duration::from_millis(5000));
        assert_eq!(config.min_keepalive_interval, Duration::from_millis(30000));
        assert!(!config.single_model_servers);
    }

    #[test]
    fn test_parse_ini() {
        let content = r#"
; Comment
[Tuner]
ConnectTimeout = 2000
Transport = multicast
RtpPort = 45001
SingleModelServers = yes

[Other]
Key = Value
"#;
        let sections = parse_ini(content);
        let tuner = sections.get("Tuner").unwrap();
        assert_eq!(tuner.get("ConnectTimeout").unwrap(), "2000");

        let config = apply_settings(TunerConfig::default(), |key| tuner.get(key).cloned());
        assert_eq!(config.connect_timeout, Duration::from_millis(2000));
        assert_eq!(config.transport, TransportMode::Multicast);
        assert_eq!(config.rtp_port, 45000);
        assert!(config.single_model_servers);
        assert_eq!(config.sleep_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_env_key() {
        assert_eq!(env_key("ConnectTimeout"), "SATIP_TUNER_CONNECT_TIMEOUT");
        assert_eq!(env_key("RtpPort"), "SATIP_TUNER_RTP_PORT");
        assert_eq!(env_key("MinKeepAliveInterval"), "SATIP_TUNER_MIN_KEEP_ALIVE_INTERVAL");
    }

    #[test]
    fn test_load_from_env() {
        let config = load_from_env();
        assert!(!config.user_agent.is_empty());
    }
}
