use serde::Deserialize;

use streamgate_core::{GateError, Result};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    pub version: u32,

    #[serde(default)]
    pub gateway: GatewaySection,

    pub tls: TlsSection,
}

impl GatewayConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(GateError::Config(format!(
                "unsupported config version {}",
                self.version
            )));
        }
        self.gateway.validate()?;
        self.tls.validate()?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewaySection {
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Serve the HTTP/1.1 lane next to native HTTP/2. Forced on when
    /// `use_websockets` is set, since the upgrade rides that lane.
    #[serde(default = "default_true")]
    pub allow_http1: bool,

    #[serde(default = "default_true")]
    pub use_websockets: bool,

    /// Request header naming the target service when no `:path` is present.
    #[serde(default = "default_service_header")]
    pub service_header: String,

    /// Request header carrying reserved gateway commands.
    #[serde(default = "default_command_header")]
    pub command_header: String,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            allow_http1: default_true(),
            use_websockets: default_true(),
            service_header: default_service_header(),
            command_header: default_command_header(),
        }
    }
}

impl GatewaySection {
    pub fn validate(&self) -> Result<()> {
        if self.listen.is_empty() {
            return Err(GateError::Config("gateway.listen must not be empty".into()));
        }
        if self.service_header.is_empty() {
            return Err(GateError::Config(
                "gateway.service_header must not be empty".into(),
            ));
        }
        if self.command_header.is_empty() {
            return Err(GateError::Config(
                "gateway.command_header must not be empty".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsSection {
    pub cert_path: String,
    pub key_path: String,
}

impl TlsSection {
    pub fn validate(&self) -> Result<()> {
        if self.cert_path.is_empty() {
            return Err(GateError::Config("tls.cert_path must not be empty".into()));
        }
        if self.key_path.is_empty() {
            return Err(GateError::Config("tls.key_path must not be empty".into()));
        }
        Ok(())
    }
}

fn default_listen() -> String {
    "localhost:5000".into()
}
fn default_true() -> bool {
    true
}
fn default_service_header() -> String {
    "service".into()
}
fn default_command_header() -> String {
    "command".into()
}
