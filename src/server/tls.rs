//! TLS termination for the HTTPS listener

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;

use crate::types::{Result, VestibuleError};

fn open(path: &Path) -> Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| VestibuleError::Config(format!("Cannot open {}: {}", path.display(), e)))
}

/// Read a PEM certificate chain
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let certs = rustls_pemfile::certs(&mut open(path)?)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| VestibuleError::Config(format!("Bad certificate in {}: {}", path.display(), e)))?;

    if certs.is_empty() {
        return Err(VestibuleError::Config(format!(
            "No certificate found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

/// Read the first PEM private key (PKCS#8, PKCS#1 or SEC1)
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut open(path)?)
        .map_err(|e| VestibuleError::Config(format!("Bad private key in {}: {}", path.display(), e)))?
        .ok_or_else(|| VestibuleError::Config(format!("No private key found in {}", path.display())))
}

/// Build the acceptor used by the HTTPS listener
pub fn load_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor> {
    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;

    let mut config = ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| VestibuleError::Config(format!("TLS setup failed: {}", e)))?
    .with_no_client_auth()
    .with_single_cert(certs, key)
    .map_err(|e| VestibuleError::Config(format!("TLS certificate rejected: {}", e)))?;

    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(config)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file(contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("vestibule-tls-{}.pem", uuid::Uuid::new_v4()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let result = load_certs(Path::new("/nonexistent/vestibule/cert.pem"));
        assert!(matches!(result, Err(VestibuleError::Config(_))));
    }

    #[test]
    fn test_pem_without_blocks_rejected() {
        let path = temp_file("not a pem file\n");
        assert!(matches!(load_certs(&path), Err(VestibuleError::Config(_))));
        assert!(matches!(load_private_key(&path), Err(VestibuleError::Config(_))));
        let _ = std::fs::remove_file(path);
    }
}
