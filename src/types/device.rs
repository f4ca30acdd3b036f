use std::collections::HashMap;

/// A Companion-capable device as reported by discovery
///
/// Discovery itself lives outside this crate; embedders hand over one of
/// these records (host, Companion port, AirPlay port) and the library does
/// the rest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    /// Human-readable device name (e.g., "Living Room")
    pub name: String,

    /// Host address (IP or resolvable name)
    pub address: String,

    /// Companion service port
    pub companion_port: u16,

    /// AirPlay service port (used for HTTP pair-setup)
    pub airplay_port: u16,

    /// Unique device identifier from the discovery record
    pub identifier: String,

    /// Device model identifier (e.g., "AppleTV6,2")
    pub model: Option<String>,

    /// Raw TXT record data, kept for protocol use
    pub properties: HashMap<String, String>,
}

impl DeviceRecord {
    /// Create a record with the fields the core actually requires
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        address: impl Into<String>,
        companion_port: u16,
        airplay_port: u16,
    ) -> Self {
        let name = name.into();
        Self {
            identifier: name.clone(),
            name,
            address: address.into(),
            companion_port,
            airplay_port,
            model: None,
            properties: HashMap::new(),
        }
    }

    /// Set the discovery identifier
    #[must_use]
    pub fn identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = identifier.into();
        self
    }

    /// Set the model string
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Socket address string for the Companion service
    #[must_use]
    pub fn companion_addr(&self) -> String {
        format!("{}:{}", self.address, self.companion_port)
    }

    /// Socket address string for the AirPlay service
    #[must_use]
    pub fn airplay_addr(&self) -> String {
        format!("{}:{}", self.address, self.airplay_port)
    }
}
