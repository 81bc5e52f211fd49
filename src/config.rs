//! Configuration module for Netsock
//!
//! JSON configuration for the demo binary: one server, one client and the
//! log level. Each section validates itself and builds the matching object.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::client::{self, Client};
use crate::common::{NetworkProtocol, UpdateConn};
use crate::context::Handler;
use crate::error::{Error, Result};
use crate::server::{DatagramServer, Server, StreamServer};
use crate::transport::{TcpTransport, TlsConfig, UdpTransport, UnixPermissions, DEFAULT_UNIX_PERMISSIONS};
#[cfg(unix)]
use crate::transport::{UnixGramTransport, UnixTransport};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Log configuration
    #[serde(default)]
    pub log: LogConfig,

    /// Server section
    #[serde(default)]
    pub server: Option<ServerConfig>,

    /// Client section
    #[serde(default)]
    pub client: Option<ClientConfig>,
}

impl Config {
    /// Load configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_json(&content)
    }

    /// Parse configuration from JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(server) = &self.server {
            server.validate()?;
        }
        if let Some(client) = &self.client {
            client.validate()?;
        }
        Ok(())
    }

    /// Create a default server configuration
    pub fn default_server() -> Self {
        Config {
            log: LogConfig::default(),
            server: Some(ServerConfig {
                network: NetworkProtocol::Tcp,
                address: "0.0.0.0:9000".to_string(),
                perm_file: None,
                group_perm: None,
                idle_timeout_secs: Some(300),
                read_buffer_size: 0,
                tls: Some(TlsSettings {
                    enabled: false,
                    server_name: None,
                    allow_insecure: false,
                    certificate_file: Some("/path/to/cert.pem".to_string()),
                    key_file: Some("/path/to/key.pem".to_string()),
                    ca_file: None,
                }),
            }),
            client: None,
        }
    }

    /// Create a default client configuration
    pub fn default_client() -> Self {
        Config {
            log: LogConfig::default(),
            server: None,
            client: Some(ClientConfig {
                network: NetworkProtocol::Tcp,
                address: "127.0.0.1:9000".to_string(),
                tls: None,
            }),
        }
    }
}

/// Log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl LogConfig {
    /// Filter from `RUST_LOG` when set and valid, otherwise from `level`
    pub fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| self.level_filter())
    }

    /// Filter for the configured level; an unknown level means `info`
    pub fn level_filter(&self) -> EnvFilter {
        match self.level.trim().parse::<LevelFilter>() {
            Ok(level) => EnvFilter::new(level.to_string()),
            Err(_) => EnvFilter::new("info"),
        }
    }
}

/// Server section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Network protocol: tcp, tcp4, tcp6, udp, udp4, udp6, unix, unixgram
    pub network: NetworkProtocol,

    /// Listen address, or socket path for unix networks
    pub address: String,

    /// Socket file mode for unix networks (default 0o770)
    #[serde(default)]
    pub perm_file: Option<u32>,

    /// Owning group id of the socket file for unix networks
    #[serde(default)]
    pub group_perm: Option<i32>,

    /// Close stream connections idle for this many seconds
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,

    /// Largest datagram accepted by datagram servers (0 = default)
    #[serde(default)]
    pub read_buffer_size: usize,

    /// TLS settings (tcp only)
    #[serde(default)]
    pub tls: Option<TlsSettings>,
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        crate::common::validate(self.network, &self.address)?;

        if self.network.is_unix() {
            self.permissions()?;
        } else if self.perm_file.is_some() || self.group_perm.is_some() {
            return Err(Error::Config(format!(
                "perm_file and group_perm only apply to unix networks, not {}",
                self.network
            )));
        }

        if self.tls_enabled() && (self.network.is_datagram() || self.network.is_unix()) {
            return Err(Error::Config(format!("TLS is not available over {}", self.network)));
        }
        Ok(())
    }

    fn tls_enabled(&self) -> bool {
        self.tls.as_ref().is_some_and(|t| t.enabled)
    }

    fn permissions(&self) -> Result<UnixPermissions> {
        UnixPermissions::new(self.perm_file.unwrap_or(DEFAULT_UNIX_PERMISSIONS), self.group_perm)
    }

    fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs.unwrap_or(0))
    }

    /// Build the configured server with its address registered
    pub fn build(&self, update: Option<UpdateConn>, handler: Handler) -> Result<Box<dyn Server>> {
        use NetworkProtocol::*;

        self.validate()?;
        let handler = Some(handler);

        let server: Box<dyn Server> = match self.network {
            Tcp | Tcp4 | Tcp6 => {
                let server = StreamServer::new(TcpTransport::new(self.network)?, update, handler);
                server.set_idle_timeout(self.idle_timeout());
                if let Some(tls) = self.tls.as_ref().filter(|t| t.enabled) {
                    server.set_tls(true, &tls.to_tls_config())?;
                }
                server.register_server(&self.address)?;
                Box::new(server)
            }
            #[cfg(unix)]
            Unix => {
                let server = StreamServer::new(UnixTransport, update, handler);
                server.set_idle_timeout(self.idle_timeout());
                let p = self.permissions()?;
                server.register_socket(&self.address, p.mode(), self.group_perm)?;
                Box::new(server)
            }
            Udp | Udp4 | Udp6 => {
                let server = DatagramServer::new(
                    UdpTransport::new(self.network)?,
                    update,
                    handler,
                    self.read_buffer_size,
                );
                server.register_server(&self.address)?;
                Box::new(server)
            }
            #[cfg(unix)]
            UnixGram => {
                let server = DatagramServer::new(UnixGramTransport, update, handler, self.read_buffer_size);
                let p = self.permissions()?;
                server.register_socket(&self.address, p.mode(), self.group_perm)?;
                Box::new(server)
            }
            #[cfg(not(unix))]
            other => return crate::server::new(update, handler, other, self.read_buffer_size, &self.address, None),
        };

        Ok(server)
    }
}

/// Client section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Network protocol
    pub network: NetworkProtocol,

    /// Target address, or socket path for unix networks
    pub address: String,

    /// TLS settings (stream networks only; ignored for datagram networks)
    #[serde(default)]
    pub tls: Option<TlsSettings>,
}

impl ClientConfig {
    pub fn validate(&self) -> Result<()> {
        crate::common::validate(self.network, &self.address)
    }

    /// Build the configured client, TLS applied
    pub fn build(&self) -> Result<Box<dyn Client>> {
        self.validate()?;
        let client = client::new(self.network, &self.address)?;

        if let Some(tls) = self.tls.as_ref().filter(|t| t.enabled) {
            let server_name = tls.server_name.clone().unwrap_or_default();
            client.set_tls(true, &tls.to_tls_config(), &server_name)?;
        }
        Ok(client)
    }
}

/// TLS settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsSettings {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub server_name: Option<String>,

    #[serde(default)]
    pub allow_insecure: bool,

    pub certificate_file: Option<String>,

    pub key_file: Option<String>,

    /// Extra CA bundle trusted by clients
    #[serde(default)]
    pub ca_file: Option<String>,
}

impl TlsSettings {
    pub fn to_tls_config(&self) -> TlsConfig {
        TlsConfig {
            server_name: self.server_name.clone(),
            allow_insecure: self.allow_insecure,
            alpn: Vec::new(),
            certificate_file: self.certificate_file.clone(),
            key_file: self.key_file.clone(),
            ca_file: self.ca_file.clone(),
        }
    }
}
