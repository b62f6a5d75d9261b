//! Known SAT>IP servers and description fetching.
//!
//! Servers are added by fetching their UPnP `description.xml` (the URL a
//! server announces in its SSDP `LOCATION` header) or by hand. A tuner is
//! then pointed at one of them with [`ServerList::assign`].

use std::time::Duration;

use log::{error, info};

use satip_protocol::{parse_description, SatipServer, ServerDescription};

use crate::config::TunerConfig;
use crate::error::DiscoveryError;

/// Delivery system a tuning string asks for, from its `msys=` parameter.
///
/// The result is spelled like the capabilities in a server description.
pub fn required_system(params: &str) -> Option<&'static str> {
    let msys = params
        .split('&')
        .filter_map(|kv| kv.split_once('='))
        .find(|(key, _)| key.eq_ignore_ascii_case("msys"))
        .map(|(_, value)| value.to_ascii_lowercase())?;

    match msys.as_str() {
        "dvbs" | "dvbs2" => Some("DVBS2"),
        "dvbt" => Some("DVBT"),
        "dvbt2" => Some("DVBT2"),
        "dvbc" => Some("DVBC"),
        "dvbc2" => Some("DVBC2"),
        "atsc" => Some("ATSC"),
        _ => None,
    }
}

/// Servers known to this client.
#[derive(Debug, Default)]
pub struct ServerList {
    servers: Vec<SatipServer>,
    single_model: bool,
}

impl ServerList {
    /// `single_model` lists each capability of a multi-system server as a
    /// separate entry.
    pub fn new(single_model: bool) -> Self {
        Self {
            servers: Vec::new(),
            single_model,
        }
    }

    /// Add a server. An entry with the same address, port and model is
    /// updated in place; returns true only for new entries.
    pub fn add(&mut self, server: SatipServer) -> bool {
        let existing = self.servers.iter_mut().find(|s| {
            s.address == server.address && s.port == server.port && s.model == server.model
        });
        match existing {
            Some(entry) => {
                entry.description = server.description;
                false
            }
            None => {
                info!("Adding server '{}'", server);
                self.servers.push(server);
                true
            }
        }
    }

    /// Add the entries described by a device description found at
    /// `address`. Returns the number of new entries.
    pub fn add_description(&mut self, address: &str, description: &ServerDescription) -> usize {
        description
            .servers(address, self.single_model)
            .into_iter()
            .filter(|server| self.add(server.clone()))
            .count()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn servers(&self) -> &[SatipServer] {
        &self.servers
    }

    /// First entry at `address`.
    pub fn find(&self, address: &str) -> Option<&SatipServer> {
        self.servers.iter().find(|s| s.address == address)
    }

    /// First server with a frontend for `system`, or the first server at
    /// all when no system is given.
    pub fn assign(&self, system: Option<&str>) -> Option<&SatipServer> {
        match system {
            Some(system) => self.servers.iter().find(|s| s.provides(system)),
            None => self.servers.first(),
        }
    }

    /// One `address|model|description` line per server.
    pub fn list(&self) -> String {
        self.servers
            .iter()
            .map(|s| format!("{}\n", s))
            .collect()
    }
}

/// Fetches server descriptions over HTTP.
pub struct DescriptionFetcher {
    runtime: tokio::runtime::Runtime,
    client: reqwest::Client,
}

impl DescriptionFetcher {
    pub fn new(config: &TunerConfig) -> Result<Self, DiscoveryError> {
        Self::with_timeout(config.connect_timeout, &config.user_agent)
    }

    pub fn with_timeout(timeout: Duration, user_agent: &str) -> Result<Self, DiscoveryError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(DiscoveryError::Runtime)?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(user_agent)
            .no_proxy()
            .build()?;
        Ok(Self { runtime, client })
    }

    /// Fetch and parse the description at `url`. Returns the server address
    /// taken from the URL together with the description.
    pub fn fetch(&self, url: &str) -> Result<(String, ServerDescription), DiscoveryError> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| DiscoveryError::InvalidUrl(format!("{}: {}", url, e)))?;
        let address = parsed
            .host_str()
            .ok_or_else(|| DiscoveryError::InvalidUrl(format!("{}: no host", url)))?
            .to_string();

        let body = self.runtime.block_on(async {
            let response = self.client.get(parsed).send().await?;
            let status = response.status();
            if !status.is_success() {
                error!("Discovery detected invalid status code: {}", status.as_u16());
                return Err(DiscoveryError::Status(status.as_u16()));
            }
            Ok::<_, DiscoveryError>(response.text().await?)
        })?;

        let description = parse_description(&body)?;
        Ok((address, description))
    }

    /// Fetch the description at `url` into `list`. Returns the number of new
    /// entries.
    pub fn fetch_into(&self, url: &str, list: &mut ServerList) -> Result<usize, DiscoveryError> {
        let (address, description) = self.fetch(url)?;
        Ok(list.add_description(&address, &description))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    const DESCRIPTION: &str = "<?xml version=\"1.0\"?>\
<root><device><friendlyName>Attic</friendlyName>\
<satip:X_SATIPCAP xmlns:satip=\"urn:ses-com:satip\">DVBS2-2,DVBT2-1</satip:X_SATIPCAP>\
</device></root>";

    /// Serve one HTTP response and return the request head.
    fn spawn_http(status: &'static str, body: &'static str) -> (u16, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut head = Vec::new();
            let mut byte = [0u8; 1];
            while !head.ends_with(b"\r\n\r\n") {
                if socket.read(&mut byte).unwrap() == 0 {
                    break;
                }
                head.push(byte[0]);
            }
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: text/xml\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).unwrap();
            String::from_utf8_lossy(&head).into_owned()
        });
        (port, handle)
    }

    fn fetcher() -> DescriptionFetcher {
        DescriptionFetcher::with_timeout(Duration::from_secs(2), "satip-tuner-test").unwrap()
    }

    #[test]
    fn test_fetch_description() {
        let (port, server) = spawn_http("200 OK", DESCRIPTION);
        let url = format!("http://127.0.0.1:{}/description.xml", port);

        let mut list = ServerList::new(true);
        assert_eq!(fetcher().fetch_into(&url, &mut list).unwrap(), 2);

        let head = server.join().unwrap();
        assert!(head.starts_with("GET /description.xml HTTP/1.1\r\n"));
        assert!(head.to_ascii_lowercase().contains("user-agent: satip-tuner-test"));

        assert_eq!(list.len(), 2);
        assert_eq!(list.list(), "127.0.0.1|DVBS2-2|Attic #0\n127.0.0.1|DVBT2-1|Attic #1\n");
        assert_eq!(list.assign(Some("DVBT2")).unwrap().description, "Attic #1");
    }

    #[test]
    fn test_fetch_failures() {
        let (port, server) = spawn_http("404 Not Found", "");
        let url = format!("http://127.0.0.1:{}/description.xml", port);
        assert!(matches!(fetcher().fetch(&url), Err(DiscoveryError::Status(404))));
        server.join().unwrap();

        let (port, server) = spawn_http("200 OK", "<root><device>");
        let url = format!("http://127.0.0.1:{}/description.xml", port);
        assert!(matches!(fetcher().fetch(&url), Err(DiscoveryError::Description(_))));
        server.join().unwrap();

        assert!(matches!(fetcher().fetch("not a url"), Err(DiscoveryError::InvalidUrl(_))));
    }

    #[test]
    fn test_server_list() {
        let mut list = ServerList::new(false);
        assert!(list.is_empty());
        assert!(list.assign(None).is_none());

        assert!(list.add(SatipServer::new("10.0.0.1").with_model("DVBS2-4", "Roof")));
        assert!(list.add(SatipServer::new("10.0.0.2").with_model("DVBC-2", "Cable")));
        // Same server seen again: description refreshed, no new entry.
        assert!(!list.add(SatipServer::new("10.0.0.1").with_model("DVBS2-4", "Roof dish")));

        assert_eq!(list.len(), 2);
        assert_eq!(list.find("10.0.0.1").unwrap().description, "Roof dish");
        assert_eq!(list.assign(Some("DVBC")).unwrap().address, "10.0.0.2");
        assert_eq!(list.assign(None).unwrap().address, "10.0.0.1");
        assert!(list.assign(Some("DVBT2")).is_none());
        assert_eq!(list.list(), "10.0.0.1|DVBS2-4|Roof dish\n10.0.0.2|DVBC-2|Cable\n");
    }

    #[test]
    fn test_required_system() {
        assert_eq!(required_system("src=1&freq=12402&msys=dvbs2&sr=27500"), Some("DVBS2"));
        assert_eq!(required_system("freq=506&msys=DVBT2&bw=8"), Some("DVBT2"));
        assert_eq!(required_system("msys=dvbs"), Some("DVBS2"));
        assert_eq!(required_system("freq=506"), None);
        assert_eq!(required_system("msys=isdbt"), None);
    }
}
