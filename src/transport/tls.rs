//! TLS material for stream transports
//!
//! Certificates are loaded from PEM files. Servers get a `TlsAcceptor`,
//! clients a `TlsConnectorConfig` (connector + verified server name).

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use tokio_rustls::rustls::{self, ClientConfig, RootCertStore, ServerConfig};
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::common::{Error, Result, Stream};

/// TLS configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Server name for SNI and certificate verification
    #[serde(default)]
    pub server_name: Option<String>,
    /// Allow insecure certificates
    #[serde(default)]
    pub allow_insecure: bool,
    /// ALPN protocols
    #[serde(default)]
    pub alpn: Vec<String>,
    /// Certificate file path (for server)
    #[serde(default)]
    pub certificate_file: Option<String>,
    /// Private key file path (for server)
    #[serde(default)]
    pub key_file: Option<String>,
    /// Extra trusted CA bundle (for client)
    #[serde(default)]
    pub ca_file: Option<String>,
}

/// Client side TLS state: connector plus the name to verify
#[derive(Clone)]
pub struct TlsConnectorConfig {
    connector: TlsConnector,
    server_name: ServerName<'static>,
}

impl TlsConnectorConfig {
    /// Run the client handshake over a dialed stream
    pub async fn connect(&self, stream: Stream) -> Result<Stream> {
        let tls = self
            .connector
            .connect(self.server_name.clone(), stream)
            .await
            .map_err(|e| Error::Tls(format!("handshake with {:?} failed: {}", self.server_name, e)))?;
        Ok(Box::new(tls))
    }
}

impl std::fmt::Debug for TlsConnectorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConnectorConfig")
            .field("server_name", &self.server_name)
            .finish()
    }
}

/// Build the client connector. `server_name` falls back to `config.server_name`.
pub(crate) fn build_connector(config: &TlsConfig, server_name: &str) -> Result<TlsConnectorConfig> {
    let name = if server_name.is_empty() {
        config
            .server_name
            .clone()
            .ok_or_else(|| Error::InvalidTls("TLS server name required".into()))?
    } else {
        server_name.to_string()
    };

    let server_name = ServerName::try_from(name.clone())
        .map_err(|_| Error::InvalidTls(format!("Invalid server name: {}", name)))?;

    let mut root_store = RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    if let Some(ca_file) = &config.ca_file {
        for cert in load_certs(ca_file)? {
            root_store
                .add(cert)
                .map_err(|e| Error::InvalidTls(format!("Invalid CA certificate in {}: {}", ca_file, e)))?;
        }
    }

    let mut tls_config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    if !config.alpn.is_empty() {
        tls_config.alpn_protocols = config.alpn.iter().map(|s| s.as_bytes().to_vec()).collect();
    }

    if config.allow_insecure {
        tls_config
            .dangerous()
            .set_certificate_verifier(Arc::new(InsecureVerifier));
    }

    Ok(TlsConnectorConfig {
        connector: TlsConnector::from(Arc::new(tls_config)),
        server_name,
    })
}

/// Build the server acceptor; requires a certificate and key pair
pub(crate) fn build_acceptor(config: &TlsConfig) -> Result<TlsAcceptor> {
    let cert_file = config
        .certificate_file
        .as_ref()
        .ok_or_else(|| Error::InvalidTls("TLS server requires certificate_file".into()))?;
    let key_file = config
        .key_file
        .as_ref()
        .ok_or_else(|| Error::InvalidTls("TLS server requires key_file".into()))?;

    let certs = load_certs(cert_file)?;
    if certs.is_empty() {
        return Err(Error::InvalidTls(format!("No certificate found in {}", cert_file)));
    }
    let key = load_private_key(key_file)?;

    let mut server_config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| Error::InvalidTls(format!("Invalid certificate pair: {}", e)))?;

    if !config.alpn.is_empty() {
        server_config.alpn_protocols = config.alpn.iter().map(|s| s.as_bytes().to_vec()).collect();
    }

    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path)
        .map_err(|e| Error::InvalidTls(format!("Failed to open certificate file {}: {}", path, e)))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::InvalidTls(format!("Failed to parse certificates: {}", e)))
}

fn load_private_key(path: &str) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path)
        .map_err(|e| Error::InvalidTls(format!("Failed to open key file {}: {}", path, e)))?;
    let mut reader = BufReader::new(file);

    let keys = rustls_pemfile::read_all(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::InvalidTls(format!("Failed to parse private key: {}", e)))?;

    for item in keys {
        match item {
            rustls_pemfile::Item::Pkcs8Key(key) => return Ok(PrivateKeyDer::Pkcs8(key)),
            rustls_pemfile::Item::Pkcs1Key(key) => return Ok(PrivateKeyDer::Pkcs1(key)),
            rustls_pemfile::Item::Sec1Key(key) => return Ok(PrivateKeyDer::Sec1(key)),
            _ => continue,
        }
    }

    Err(Error::InvalidTls("No valid private key found in file".into()))
}

/// Insecure certificate verifier for testing
#[derive(Debug)]
struct InsecureVerifier;

impl rustls::client::danger::ServerCertVerifier for InsecureVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connector_requires_server_name() {
        let result = build_connector(&TlsConfig::default(), "");
        assert!(matches!(result, Err(Error::InvalidTls(_))));
    }

    #[test]
    fn test_connector_uses_explicit_name() {
        let config = TlsConfig {
            server_name: Some("ignored.example".into()),
            ..Default::default()
        };
        let tls = build_connector(&config, "localhost").unwrap();
        assert!(format!("{:?}", tls).contains("localhost"));
    }

    #[test]
    fn test_acceptor_requires_pair() {
        assert!(matches!(build_acceptor(&TlsConfig::default()), Err(Error::InvalidTls(_))));

        let config = TlsConfig {
            certificate_file: Some("/nonexistent/cert.pem".into()),
            key_file: Some("/nonexistent/key.pem".into()),
            ..Default::default()
        };
        assert!(matches!(build_acceptor(&config), Err(Error::InvalidTls(_))));
    }

    #[test]
    fn test_acceptor_from_generated_pair() {
        let dir = tempfile::tempdir().unwrap();
        let rcgen::CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(vec!["localhost".into()]).unwrap();
        let cert_path = dir.path().join("cert.pem");
        let key_path = dir.path().join("key.pem");
        std::fs::write(&cert_path, cert.pem()).unwrap();
        std::fs::write(&key_path, key_pair.serialize_pem()).unwrap();

        let config = TlsConfig {
            certificate_file: Some(cert_path.to_string_lossy().into_owned()),
            key_file: Some(key_path.to_string_lossy().into_owned()),
            ..Default::default()
        };
        assert!(build_acceptor(&config).is_ok());
    }
}
