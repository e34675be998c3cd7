//! Attestation seam.
//!
//! The engine hashes the exact bytes it returns and asks an [`Attester`] for a
//! report bound to that digest. Reports travel base64-encoded.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use sha2::{Digest, Sha256};

use crate::error::Error;

/// SHA-256 digest of response content.
pub type ContentDigest = [u8; 32];

/// Produces a signed report over a content digest.
pub trait Attester: Send + Sync {
    /// Returns an opaque report bound to `digest`.
    fn attest(&self, digest: &ContentDigest) -> Result<Vec<u8>, Error>;
}

impl<F> Attester for F
where
    F: Fn(&ContentDigest) -> Result<Vec<u8>, Error> + Send + Sync,
{
    fn attest(&self, digest: &ContentDigest) -> Result<Vec<u8>, Error> {
        self(digest)
    }
}

/// Attester for non-TEE mode. The report is `simulated:<hex digest>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedAttester;

impl Attester for SimulatedAttester {
    fn attest(&self, digest: &ContentDigest) -> Result<Vec<u8>, Error> {
        Ok(format!("simulated:{}", hex::encode(digest)).into_bytes())
    }
}

/// Hashes `bytes` with SHA-256.
pub fn content_digest(bytes: &[u8]) -> ContentDigest {
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&Sha256::digest(bytes));
    digest
}

/// Encodes a report with the standard base64 alphabet.
pub fn encode_report(report: &[u8]) -> String {
    STANDARD.encode(report)
}

/// Hashes `bytes`, attests the digest and returns the encoded report.
pub(crate) fn sign(attester: &dyn Attester, bytes: &[u8]) -> Result<String, Error> {
    let digest = content_digest(bytes);
    let report = attester.attest(&digest)?;
    Ok(encode_report(&report))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_sha256() {
        assert_eq!(
            hex::encode(content_digest(b"abc")),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn simulated_report_names_digest() {
        let report = SimulatedAttester.attest(&content_digest(b"abc")).unwrap();
        assert_eq!(
            String::from_utf8(report).unwrap(),
            "simulated:ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn sign_encodes_report() {
        let attester = |d: &ContentDigest| -> Result<Vec<u8>, Error> { Ok(d[..2].to_vec()) };
        assert_eq!(sign(&attester, b"abc").unwrap(), STANDARD.encode([0xba, 0x78]));
    }

    #[test]
    fn attester_errors_propagate() {
        let attester =
            |_: &ContentDigest| -> Result<Vec<u8>, Error> { Err(Error::Attestation("offline".into())) };
        assert!(matches!(sign(&attester, b"x"), Err(Error::Attestation(_))));
    }
}
