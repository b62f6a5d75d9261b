//! satip-tune: tune a SAT>IP server and record the transport stream.
//!
//! The stream is written to a file, or to stdout when no output is given.
//! Instead of naming a server directly, `--describe` fetches server
//! description documents and picks a server able to tune the parameters.
//! Signal status is logged once per second until Ctrl-C or the optional
//! duration elapses.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use log::{error, info, warn};
use parking_lot::Mutex;

use satip_protocol::{PidType, SatipServer, TransportMode, DEFAULT_RTSP_PORT};
use satip_tuner::{
    load_config, required_system, DescriptionFetcher, DeviceIf, ServerList, Tuner, TunerConfig,
};

mod logging;

/// satip-tune - record a transport stream from a SAT>IP server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address, optionally with `:port`
    #[arg(short, long)]
    server: Option<String>,

    /// URL of a server description document (repeatable)
    #[arg(long = "describe", value_name = "URL")]
    describe: Vec<String>,

    /// Print the servers found with `--describe` and exit
    #[arg(long)]
    list_servers: bool,

    /// List each capability of a multi-system server as its own entry
    #[arg(long)]
    single_model: bool,

    /// Tuning parameters, e.g. `src=1&freq=12402&pol=v&msys=dvbs2&sr=27500&fec=34`
    #[arg(short, long)]
    params: Option<String>,

    /// Component id to select (repeatable)
    #[arg(long = "pid")]
    pids: Vec<i32>,

    /// Frontend index on the server (0 lets the server choose)
    #[arg(long, default_value = "0")]
    frontend: i32,

    /// Output file; stdout when omitted or `-`
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Stop after this many seconds
    #[arg(short, long)]
    duration: Option<u64>,

    /// RTP transport: unicast or multicast
    #[arg(long)]
    transport: Option<TransportMode>,

    /// Configuration file path
    #[arg(short = 'f', long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Directory where log files are stored
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,

    /// Number of days to keep log files
    #[arg(long, default_value = "7")]
    log_retention_days: u64,
}

/// Configuration file format.
#[derive(Debug, serde::Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    source: SourceSection,
    #[serde(default)]
    tuner: TunerSection,
    #[serde(default)]
    logging: LoggingSection,
}

#[derive(Debug, serde::Deserialize, Default)]
struct SourceSection {
    server: Option<String>,
    describe: Option<Vec<String>>,
    params: Option<String>,
    pids: Option<Vec<i32>>,
    frontend: Option<i32>,
}

#[derive(Debug, serde::Deserialize, Default)]
struct TunerSection {
    connect_timeout_ms: Option<u64>,
    rtp_port: Option<u16>,
    transport: Option<TransportMode>,
}

#[derive(Debug, serde::Deserialize, Default)]
struct LoggingSection {
    log_dir: Option<String>,
    retention_days: Option<u64>,
    level: Option<String>,
}

fn load_config_file(path: &Path) -> Result<ConfigFile, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&contents)?)
}

/// Parse `host` or `host:port`.
fn parse_server(value: &str) -> Result<SatipServer, String> {
    let value = value.trim();
    if value.is_empty() {
        return Err("empty server address".to_string());
    }
    match value.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => {
            let port = port
                .parse::<u16>()
                .map_err(|_| format!("invalid port in {:?}", value))?;
            Ok(SatipServer::new(host).with_port(port))
        }
        _ => Ok(SatipServer::new(value).with_port(DEFAULT_RTSP_PORT)),
    }
}

/// Fetch every description URL into a server list. Failures are logged
/// and skipped.
fn discover_servers(
    urls: &[String],
    config: &TunerConfig,
) -> Result<ServerList, Box<dyn std::error::Error>> {
    let mut list = ServerList::new(config.single_model_servers);
    if urls.is_empty() {
        return Ok(list);
    }

    let fetcher = DescriptionFetcher::new(config)?;
    for url in urls {
        match fetcher.fetch_into(url, &mut list) {
            Ok(added) => info!("{} server(s) added from {}", added, url),
            Err(e) => warn!("Failed to fetch {}: {}", url, e),
        }
    }
    Ok(list)
}

/// Device that writes the stream to a file or stdout.
struct FileDevice {
    writer: Mutex<Box<dyn Write + Send>>,
    written: AtomicU64,
    failed: AtomicBool,
}

impl FileDevice {
    fn open(output: Option<&Path>) -> io::Result<Self> {
        let writer: Box<dyn Write + Send> = match output {
            Some(path) if path != Path::new("-") => Box::new(BufWriter::new(File::create(path)?)),
            _ => Box::new(BufWriter::new(io::stdout())),
        };
        Ok(Self {
            writer: Mutex::new(writer),
            written: AtomicU64::new(0),
            failed: AtomicBool::new(false),
        })
    }

    fn flush(&self) -> io::Result<()> {
        self.writer.lock().flush()
    }
}

impl DeviceIf for FileDevice {
    fn get_id(&self) -> i32 {
        0
    }

    fn write_data(&self, data: &[u8]) {
        match self.writer.lock().write_all(data) {
            Ok(()) => {
                self.written.fetch_add(data.len() as u64, Ordering::Relaxed);
            }
            Err(e) => {
                if !self.failed.swap(true, Ordering::Relaxed) {
                    error!("Failed to write stream: {}", e);
                }
            }
        }
    }

    fn set_session_timeout(&self, session: &str, timeout_ms: u32) {
        info!("Session {} timeout {} ms", session, timeout_ms);
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let file_config = match &args.config {
        Some(path) => load_config_file(path).map_err(|e| {
            eprintln!("Failed to load config file {}: {}", path.display(), e);
            e
        })?,
        None => ConfigFile::default(),
    };

    let log_dir = if args.log_dir != Path::new("logs") {
        args.log_dir.clone()
    } else {
        PathBuf::from(file_config.logging.log_dir.as_deref().unwrap_or("logs"))
    };
    let retention_days = if args.log_retention_days != 7 {
        args.log_retention_days
    } else {
        file_config.logging.retention_days.unwrap_or(7)
    };
    logging::init_logging(
        &log_dir,
        retention_days,
        args.verbose,
        file_config.logging.level.as_deref(),
    )?;
    std::panic::set_hook(Box::new(|info| satip_tuner::logging::log_panic(info)));

    let mut config: TunerConfig = load_config();
    if let Some(ms) = file_config.tuner.connect_timeout_ms {
        config.connect_timeout = Duration::from_millis(ms);
    }
    if let Some(port) = file_config.tuner.rtp_port {
        config.rtp_port = port;
    }
    if let Some(transport) = args.transport.or(file_config.tuner.transport) {
        config.transport = transport;
    }
    if args.single_model {
        config.single_model_servers = true;
    }

    let describe = if args.describe.is_empty() {
        file_config.source.describe.unwrap_or_default()
    } else {
        args.describe
    };
    let servers = discover_servers(&describe, &config)?;
    if args.list_servers {
        print!("{}", servers.list());
        return Ok(());
    }

    let params = args
        .params
        .or(file_config.source.params)
        .ok_or("no tuning parameters given (use --params)")?;
    let server = match args.server.or(file_config.source.server) {
        Some(server) => parse_server(&server)?,
        None => servers
            .assign(required_system(&params))
            .cloned()
            .ok_or("no server given (use --server or --describe)")?,
    };
    let pids = if args.pids.is_empty() {
        file_config.source.pids.unwrap_or_default()
    } else {
        args.pids
    };
    let frontend = if args.frontend != 0 {
        args.frontend
    } else {
        file_config.source.frontend.unwrap_or(0)
    };

    let device = Arc::new(FileDevice::open(args.output.as_deref())?);
    let tuner = Tuner::new(device.clone(), config)?;

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst))?;
    }

    tuner.open()?;
    for pid in &pids {
        tuner.set_pid(*pid, PidType::Other, true)?;
    }
    tuner.set_source(Some(&server), &params, frontend)?;
    info!("Tuning {} with {}", server, params);

    let deadline = args
        .duration
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    let mut last_report = Instant::now();
    while !stop.load(Ordering::SeqCst) {
        if deadline.map_or(false, |d| Instant::now() >= d) {
            break;
        }
        thread::sleep(Duration::from_millis(100));
        if last_report.elapsed() >= Duration::from_secs(1) {
            last_report = Instant::now();
            info!(
                "{} state={} received={} bytes",
                tuner.signal_status(),
                tuner.state(),
                device.written.load(Ordering::Relaxed)
            );
        }
    }

    info!("Stopping\n{}", tuner.information());
    tuner.close();
    if let Err(e) = device.flush() {
        warn!("Failed to flush output: {}", e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_server() {
        let server = parse_server("192.168.0.10").unwrap();
        assert_eq!(server.address, "192.168.0.10");
        assert_eq!(server.port, DEFAULT_RTSP_PORT);

        let server = parse_server("10.0.0.2:8554").unwrap();
        assert_eq!(server.address, "10.0.0.2");
        assert_eq!(server.port, 8554);

        assert!(parse_server("10.0.0.2:x").is_err());
        assert!(parse_server(" ").is_err());
    }

    #[test]
    fn test_config_file() {
        let config: ConfigFile = toml::from_str(
            r#"
            [source]
            server = "192.168.0.10"
            params = "src=1&freq=12402&pol=v"
            pids = [0, 16, 17]
            describe = ["http://192.168.0.10:8080/description.xml"]

            [tuner]
            connect_timeout_ms = 3000
            transport = "multicast"
            "#,
        )
        .unwrap();
        assert_eq!(config.source.pids, Some(vec![0, 16, 17]));
        assert_eq!(config.source.describe.map(|urls| urls.len()), Some(1));
        assert_eq!(config.tuner.connect_timeout_ms, Some(3000));
        assert_eq!(config.tuner.transport, Some(TransportMode::Multicast));
        assert!(config.logging.level.is_none());
    }

    #[test]
    fn test_args() {
        let args = Args::parse_from([
            "satip-tune",
            "--server",
            "192.168.0.10",
            "--params",
            "src=1&freq=12402",
            "--pid",
            "0",
            "--pid",
            "16",
            "--transport",
            "multicast",
            "--describe",
            "http://192.168.0.10:8080/description.xml",
        ]);
        assert_eq!(args.pids, vec![0, 16]);
        assert_eq!(args.transport, Some(TransportMode::Multicast));
        assert!(args.output.is_none());
        assert_eq!(args.describe, vec!["http://192.168.0.10:8080/description.xml".to_string()]);
        assert!(!args.list_servers);
    }

    #[test]
    fn test_no_description_urls() {
        let servers = discover_servers(&[], &TunerConfig::default()).unwrap();
        assert!(servers.is_empty());
    }
}
