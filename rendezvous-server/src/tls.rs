//! TLS front end (out of scope except as a thin interface).
//!
//! The real deployment terminates TLS with an ACME-managed
//! certificate; that manager lives outside this crate. What remains
//! in-tree is the fallback path: a self-signed certificate generated
//! at startup, enough to run the server locally over HTTPS without an
//! ACME account.

use rcgen::{CertifiedKey, generate_simple_self_signed};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to generate self-signed certificate: {0}")]
    Generate(#[from] rcgen::Error),
}

/// PEM-encoded certificate and private key.
pub struct TlsMaterial {
    pub cert_pem: String,
    pub key_pem: String,
}

/// Supplies TLS material. The ACME-backed implementation is provided
/// by the deployment environment; [`SelfSigned`] is the only
/// implementation carried in this crate.
pub trait TlsProvider {
    fn material(&self) -> Result<TlsMaterial, TlsError>;
}

pub struct SelfSigned {
    pub hostnames: Vec<String>,
}

impl SelfSigned {
    pub fn new(hostnames: Vec<String>) -> Self {
        Self { hostnames }
    }
}

impl TlsProvider for SelfSigned {
    fn material(&self) -> Result<TlsMaterial, TlsError> {
        let CertifiedKey { cert, key_pair } = generate_simple_self_signed(self.hostnames.clone())?;
        Ok(TlsMaterial {
            cert_pem: cert.pem(),
            key_pem: key_pair.serialize_pem(),
        })
    }
}
