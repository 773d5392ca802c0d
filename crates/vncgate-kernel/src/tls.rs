//! Self-signed certificate bootstrap.
//!
//! [`ensure_certificate`] guarantees that a private key and a matching
//! self-signed certificate for `hostname` exist at the given paths. An existing
//! key is never touched. A certificate that is missing, does not parse, or was
//! issued for some other key is reissued from the existing key. A missing key
//! forces a new certificate as well, since no existing certificate can match a
//! freshly generated key.

use chrono::{Datelike, Utc};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use std::io::Write;
use std::path::Path;
use tracing::{info, warn};
use vncgate_types::error::{GatewayError, GatewayResult};

/// Certificate validity in years.
pub const CERT_VALIDITY_YEARS: i32 = 10;

/// What [`ensure_certificate`] had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertAction {
    /// Both files were already present and the certificate matches the key.
    Existing,
    /// The key was kept and a new certificate was issued for it, replacing a
    /// missing or unusable one.
    IssuedCertificate,
    /// A new key and certificate were generated.
    GeneratedBoth,
}

/// Make sure `cert_path` / `key_path` hold a usable key pair for `hostname`.
pub fn ensure_certificate(
    hostname: &str,
    cert_path: &Path,
    key_path: &Path,
) -> GatewayResult<CertAction> {
    let key_pem = match std::fs::read_to_string(key_path) {
        Ok(pem) => Some(pem),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => return Err(e.into()),
    };

    match key_pem {
        Some(pem) => {
            let key = KeyPair::from_pem(&pem)
                .map_err(|e| GatewayError::Tls(format!("{}: {e}", key_path.display())))?;
            match check_certificate(cert_path, &key)? {
                CertCheck::Matches => return Ok(CertAction::Existing),
                CertCheck::Missing => {
                    info!(cert = %cert_path.display(), "Issuing certificate for existing key");
                }
                CertCheck::Unusable(reason) => {
                    warn!(
                        cert = %cert_path.display(),
                        reason = %reason,
                        "Replacing unusable certificate"
                    );
                }
            }
            write_private(cert_path, &self_signed(hostname, &key)?)?;
            Ok(CertAction::IssuedCertificate)
        }
        None => {
            if cert_path.exists() {
                warn!(
                    cert = %cert_path.display(),
                    "Key missing, replacing certificate that can no longer match"
                );
            }
            info!(cert = %cert_path.display(), key = %key_path.display(), "Generating certificate");
            let key = KeyPair::generate().map_err(|e| GatewayError::Tls(e.to_string()))?;
            write_private(key_path, &key.serialize_pem())?;
            write_private(cert_path, &self_signed(hostname, &key)?)?;
            Ok(CertAction::GeneratedBoth)
        }
    }
}

enum CertCheck {
    Missing,
    Matches,
    Unusable(String),
}

/// The first PEM certificate in `cert_path` must carry `key`'s public key.
fn check_certificate(cert_path: &Path, key: &KeyPair) -> GatewayResult<CertCheck> {
    let pem = match std::fs::read(cert_path) {
        Ok(pem) => pem,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(CertCheck::Missing),
        Err(e) => return Err(e.into()),
    };

    let der = match rustls_pemfile::certs(&mut pem.as_slice()).next() {
        Some(Ok(der)) => der,
        Some(Err(e)) => return Ok(CertCheck::Unusable(e.to_string())),
        None => return Ok(CertCheck::Unusable("no certificate found".into())),
    };

    // The public key bits are embedded verbatim in the certificate's SubjectPublicKeyInfo.
    let public = key.public_key_raw();
    let cert: &[u8] = der.as_ref();
    if !public.is_empty() && cert.windows(public.len()).any(|w| w == public) {
        Ok(CertCheck::Matches)
    } else {
        Ok(CertCheck::Unusable("certificate was issued for a different key".into()))
    }
}

fn self_signed(hostname: &str, key: &KeyPair) -> GatewayResult<String> {
    let mut params = CertificateParams::new(vec![hostname.to_string()])
        .map_err(|e| GatewayError::Tls(e.to_string()))?;

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, hostname);
    dn.push(DnType::OrganizationName, "vncgate");
    params.distinguished_name = dn;

    let today = Utc::now().date_naive();
    let (month, day) = (today.month() as u8, today.day().min(28) as u8);
    params.not_before = rcgen::date_time_ymd(today.year(), month, day);
    params.not_after = rcgen::date_time_ymd(today.year() + CERT_VALIDITY_YEARS, month, day);

    let cert = params
        .self_signed(key)
        .map_err(|e| GatewayError::Tls(e.to_string()))?;
    Ok(cert.pem())
}

fn write_private(path: &Path, contents: &str) -> GatewayResult<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(contents.as_bytes())?;
    Ok(())
}
