//! TLS material loading for store connections.

use crate::config::TlsConfig;
use crate::error::{ConnectError, ConnectResult};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_rustls::TlsConnector;

/// Builds a TLS connector from the configured PEM files.
///
/// All three paths are required. The certificate chain and key are
/// presented to the store; the CA bundle is the only trust root.
pub(crate) fn connector(config: &TlsConfig) -> ConnectResult<TlsConnector> {
    let cert_path = required(&config.cert_path, "certificate")?;
    let key_path = required(&config.key_path, "key")?;
    let ca_path = required(&config.trusted_ca_path, "trusted CA")?;

    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;
    let roots = load_root_certs(ca_path)?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let client_config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ConnectError::Tls(e.to_string()))?
        .with_root_certificates(roots)
        .with_client_auth_cert(certs, key)
        .map_err(|e| ConnectError::Tls(e.to_string()))?;

    Ok(TlsConnector::from(Arc::new(client_config)))
}

/// Extracts the host part of a `host:port` endpoint for SNI and
/// certificate verification.
pub(crate) fn server_name(endpoint: &str) -> ConnectResult<ServerName<'static>> {
    let host = match endpoint.rsplit_once(':') {
        Some((host, _port)) => host,
        None => endpoint,
    };
    let host = host.trim_start_matches('[').trim_end_matches(']');

    ServerName::try_from(host.to_string()).map_err(|e| ConnectError::Handshake {
        endpoint: endpoint.to_string(),
        reason: format!("invalid server name: {e}"),
    })
}

fn required<'a>(path: &'a Option<PathBuf>, material: &'static str) -> ConnectResult<&'a Path> {
    path.as_deref()
        .ok_or(ConnectError::TlsPathMissing { material })
}

fn open(path: &Path) -> ConnectResult<BufReader<File>> {
    let file = File::open(path).map_err(|e| ConnectError::TlsMaterial {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(BufReader::new(file))
}

fn load_certs(path: &Path) -> ConnectResult<Vec<CertificateDer<'static>>> {
    let mut reader = open(path)?;

    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ConnectError::TlsMaterial {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    if certs.is_empty() {
        return Err(ConnectError::TlsMaterial {
            path: path.to_path_buf(),
            reason: "no certificates found".into(),
        });
    }

    Ok(certs)
}

fn load_private_key(path: &Path) -> ConnectResult<PrivateKeyDer<'static>> {
    let mut reader = open(path)?;

    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| ConnectError::TlsMaterial {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?
        .ok_or_else(|| ConnectError::TlsMaterial {
            path: path.to_path_buf(),
            reason: "no private key found".into(),
        })
}

fn load_root_certs(path: &Path) -> ConnectResult<RootCertStore> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(path)? {
        roots.add(cert).map_err(|e| ConnectError::TlsMaterial {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    }
    Ok(roots)
}
