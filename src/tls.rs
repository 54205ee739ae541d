//! TLS acceptor construction.
//!
//! Listeners only ever see a ready [`TlsAcceptor`]; this module turns a PEM
//! certificate chain and private key into one. Accepted formats for the key
//! are PKCS#8, PKCS#1 (RSA) and SEC1 (EC).

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_rustls::rustls::crypto::ring;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::{self, ServerConfig};
use tokio_rustls::TlsAcceptor;

/// Load a certificate chain and key from PEM files and build an acceptor.
pub fn load_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor, TlsError> {
    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;
    acceptor_from_der(certs, key)
}

/// Build an acceptor from already decoded certificate material.
pub fn acceptor_from_der(
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> Result<TlsAcceptor, TlsError> {
    let config = ServerConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_safe_default_protocol_versions()
        .map_err(TlsError::Config)?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(TlsError::Config)?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let file = File::open(path).map_err(|e| TlsError::FileRead(path.to_path_buf(), e))?;
    let mut reader = BufReader::new(file);

    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::FileRead(path.to_path_buf(), e))?;

    if certs.is_empty() {
        return Err(TlsError::NoCertificate(path.to_path_buf()));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let file = File::open(path).map_err(|e| TlsError::FileRead(path.to_path_buf(), e))?;
    let mut reader = BufReader::new(file);

    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| TlsError::FileRead(path.to_path_buf(), e))?
        .ok_or_else(|| TlsError::NoPrivateKey(path.to_path_buf()))
}

/// TLS setup errors
#[derive(Debug)]
pub enum TlsError {
    FileRead(PathBuf, std::io::Error),
    NoCertificate(PathBuf),
    NoPrivateKey(PathBuf),
    Config(rustls::Error),
}

impl std::fmt::Display for TlsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TlsError::FileRead(path, e) => {
                write!(f, "Failed to read '{}': {}", path.display(), e)
            }
            TlsError::NoCertificate(path) => {
                write!(f, "No certificate found in '{}'", path.display())
            }
            TlsError::NoPrivateKey(path) => {
                write!(f, "No private key found in '{}'", path.display())
            }
            TlsError::Config(e) => write!(f, "Invalid TLS configuration: {}", e),
        }
    }
}

impl std::error::Error for TlsError {}
