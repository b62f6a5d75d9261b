//! UPnP device description of a SAT>IP server (`description.xml`).
//!
//! Only two elements matter to a client:
//!
//! ```text
//! <root>
//!   <device>
//!     <friendlyName>Living room</friendlyName>
//!     <satip:X_SATIPCAP>DVBS2-2,DVBT-2</satip:X_SATIPCAP>
//!   </device>
//! </root>
//! ```

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::ProtocolError;
use crate::types::SatipServer;

/// Name used when `friendlyName` is present but empty.
pub const DEFAULT_FRIENDLY_NAME: &str = "MyBrokenHardware";

/// Capabilities used when `X_SATIPCAP` is present but empty.
pub const DEFAULT_CAPABILITIES: &str = "DVBS2-1";

const FRIENDLY_NAME_PATH: [&str; 3] = ["root", "device", "friendlyName"];
const CAPABILITIES_PATH: [&str; 3] = ["root", "device", "satip:X_SATIPCAP"];

/// Fields of a device description.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerDescription {
    pub friendly_name: Option<String>,
    /// Comma separated `<system>-<frontends>` list.
    pub capabilities: Option<String>,
}

impl ServerDescription {
    /// Server entries for a device found at `address`.
    ///
    /// With `single_model` every capability becomes its own entry, named
    /// `<friendly name> #<n>`.
    pub fn servers(&self, address: &str, single_model: bool) -> Vec<SatipServer> {
        let name = self.friendly_name.as_deref().unwrap_or_default();
        let model = self.capabilities.as_deref().unwrap_or_default();

        if single_model && !model.is_empty() {
            let name = if name.is_empty() { DEFAULT_FRIENDLY_NAME } else { name };
            model
                .split(',')
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .enumerate()
                .map(|(n, m)| SatipServer::new(address).with_model(m, format!("{} #{}", name, n)))
                .collect()
        } else {
            vec![SatipServer::new(address).with_model(model, name)]
        }
    }
}

/// Parse a device description document.
pub fn parse_description(xml: &str) -> Result<ServerDescription, ProtocolError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut path: Vec<String> = Vec::new();
    let mut description = ServerDescription::default();

    loop {
        let event = reader.read_event().map_err(|e| {
            ProtocolError::InvalidDescription(format!(
                "at byte {}: {}",
                reader.buffer_position(),
                e
            ))
        })?;
        match event {
            Event::Start(e) => {
                path.push(String::from_utf8_lossy(e.name().as_ref()).into_owned());
                mark_present(&path, &mut description);
            }
            Event::Empty(e) => {
                path.push(String::from_utf8_lossy(e.name().as_ref()).into_owned());
                mark_present(&path, &mut description);
                path.pop();
            }
            Event::End(_) => {
                path.pop();
            }
            Event::Text(e) => {
                let text = e
                    .unescape()
                    .map_err(|e| ProtocolError::InvalidDescription(e.to_string()))?;
                let text = text.trim();
                if text.is_empty() {
                    continue;
                }
                if path == &FRIENDLY_NAME_PATH[..] {
                    description.friendly_name = Some(text.to_string());
                } else if path == &CAPABILITIES_PATH[..] {
                    description.capabilities = Some(text.to_string());
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !path.is_empty() {
        return Err(ProtocolError::InvalidDescription(format!(
            "unclosed element <{}>",
            path.join("/")
        )));
    }
    Ok(description)
}

/// Element seen: fill in the default until its text arrives.
fn mark_present(path: &[String], description: &mut ServerDescription) {
    if path == &FRIENDLY_NAME_PATH[..] {
        description
            .friendly_name
            .get_or_insert_with(|| DEFAULT_FRIENDLY_NAME.to_string());
    } else if path == &CAPABILITIES_PATH[..] {
        description
            .capabilities
            .get_or_insert_with(|| DEFAULT_CAPABILITIES.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESCRIPTION: &str = r#"<?xml version="1.0"?>
<root xmlns="urn:schemas-upnp-org:device-1-0" configId="0">
  <specVersion><major>1</major><minor>1</minor></specVersion>
  <device>
    <deviceType>urn:ses-com:device:SatIPServer:1</deviceType>
    <friendlyName>Octopus &amp; Co</friendlyName>
    <manufacturer>Digital Devices</manufacturer>
    <satip:X_SATIPCAP xmlns:satip="urn:ses-com:satip">DVBS2-4, DVBT2-2</satip:X_SATIPCAP>
  </device>
</root>"#;

    #[test]
    fn test_parse_description() {
        let desc = parse_description(DESCRIPTION).unwrap();
        assert_eq!(desc.friendly_name.as_deref(), Some("Octopus & Co"));
        assert_eq!(desc.capabilities.as_deref(), Some("DVBS2-4, DVBT2-2"));
    }

    #[test]
    fn test_empty_elements_get_defaults() {
        let xml = "<root><device><friendlyName/><satip:X_SATIPCAP></satip:X_SATIPCAP></device></root>";
        let desc = parse_description(xml).unwrap();
        assert_eq!(desc.friendly_name.as_deref(), Some(DEFAULT_FRIENDLY_NAME));
        assert_eq!(desc.capabilities.as_deref(), Some(DEFAULT_CAPABILITIES));

        let desc = parse_description("<root><device/></root>").unwrap();
        assert_eq!(desc, ServerDescription::default());
    }

    #[test]
    fn test_malformed_description() {
        assert!(matches!(
            parse_description("<root><device><friendlyName>x</device></root>"),
            Err(ProtocolError::InvalidDescription(_))
        ));
        assert!(matches!(
            parse_description("<root><device>"),
            Err(ProtocolError::InvalidDescription(_))
        ));
    }

    #[test]
    fn test_servers_from_description() {
        let desc = parse_description(DESCRIPTION).unwrap();

        let servers = desc.servers("192.168.0.10", false);
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].model, "DVBS2-4, DVBT2-2");
        assert_eq!(servers[0].description, "Octopus & Co");

        let servers = desc.servers("192.168.0.10", true);
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].model, "DVBS2-4");
        assert_eq!(servers[0].description, "Octopus & Co #0");
        assert_eq!(servers[1].model, "DVBT2-2");
        assert_eq!(servers[1].description, "Octopus & Co #1");
    }
}
