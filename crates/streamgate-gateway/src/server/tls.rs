//! TLS acceptor construction.
//!
//! Legacy protocol versions never come into play: rustls only implements
//! TLS 1.2 and 1.3, so there is nothing to disable.

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

use streamgate_core::{GateError, Result};

use crate::config::TlsSection;

pub fn build_tls_acceptor(tls: &TlsSection, allow_http1: bool) -> Result<TlsAcceptor> {
    let certs = load_certs(&tls.cert_path)?;
    let key = load_private_key(&tls.key_path)?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| GateError::Config(format!("invalid tls key material: {e}")))?;

    config.alpn_protocols = vec![b"h2".to_vec()];
    if allow_http1 {
        config.alpn_protocols.push(b"http/1.1".to_vec());
    }

    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path)
        .map_err(|e| GateError::Config(format!("cannot open cert {path}: {e}")))?;
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<std::io::Result<_>>()
        .map_err(|e| GateError::Config(format!("cannot parse cert {path}: {e}")))?;
    if certs.is_empty() {
        return Err(GateError::Config(format!("no certificates in {path}")));
    }
    Ok(certs)
}

fn load_private_key(path: &str) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path)
        .map_err(|e| GateError::Config(format!("cannot open key {path}: {e}")))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| GateError::Config(format!("cannot parse key {path}: {e}")))?
        .ok_or_else(|| GateError::Config(format!("no private key in {path}")))
}
