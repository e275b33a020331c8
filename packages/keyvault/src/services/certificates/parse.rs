//! X.509 inspection with x509-cert

use crate::error::{VaultError, VaultResult};
use crate::model::SubjectAlternativeNames;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use der::asn1::{Ia5StringRef, PrintableStringRef, Utf8StringRef};
use der::{Decode, Encode};
use rsa::pkcs8::DecodePublicKey;
use rsa::RsaPublicKey;
use sha1::{Digest, Sha1};
use x509_cert::ext::pkix::name::GeneralName;
use x509_cert::ext::pkix::SubjectAltName;
use x509_cert::name::Name;
use x509_cert::Certificate;

const OID_COMMON_NAME: &str = "2.5.4.3";
const OID_SUBJECT_ALT_NAME: &str = "2.5.29.17";
const OID_UPN: &str = "1.3.6.1.4.1.311.20.2.3";

/// Fields the vault reads from a certificate
#[derive(Debug, Clone)]
pub struct ParsedCertificate {
    pub der: Vec<u8>,
    /// `CN=...`, empty when the subject has no common name
    pub subject: String,
    pub public_key: RsaPublicKey,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub subject_alternative_names: SubjectAlternativeNames,
}

/// Base64url SHA-1 of the DER encoding
pub fn thumbprint(der: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(Sha1::digest(der))
}

fn common_name(name: &Name) -> Option<String> {
    for rdn in &name.0 {
        for atv in rdn.0.iter() {
            if atv.oid.to_string() != OID_COMMON_NAME {
                continue;
            }
            if let Ok(s) = Utf8StringRef::try_from(&atv.value) {
                return Some(s.to_string());
            }
            if let Ok(s) = PrintableStringRef::try_from(&atv.value) {
                return Some(s.to_string());
            }
            if let Ok(s) = Ia5StringRef::try_from(&atv.value) {
                return Some(s.to_string());
            }
        }
    }
    None
}

fn subject_alternative_names(cert: &Certificate) -> VaultResult<SubjectAlternativeNames> {
    let mut names = SubjectAlternativeNames::default();
    let Some(extensions) = &cert.tbs_certificate.extensions else {
        return Ok(names);
    };
    for ext in extensions {
        if ext.extn_id.to_string() != OID_SUBJECT_ALT_NAME {
            continue;
        }
        let san = SubjectAltName::from_der(ext.extn_value.as_bytes()).map_err(|e| {
            VaultError::Validation(format!("Malformed subject alternative names: {}", e))
        })?;
        for general in san.0 {
            match general {
                GeneralName::DnsName(dns) => names.dns_names.push(dns.to_string()),
                GeneralName::Rfc822Name(email) => names.emails.push(email.to_string()),
                GeneralName::OtherName(other) if other.type_id.to_string() == OID_UPN => {
                    if let Ok(upn) = Utf8StringRef::try_from(&other.value) {
                        names.upns.push(upn.to_string());
                    }
                }
                _ => {}
            }
        }
    }
    Ok(names)
}

/// Decode a DER certificate holding an RSA public key
pub fn parse_certificate(der: &[u8]) -> VaultResult<ParsedCertificate> {
    let cert = Certificate::from_der(der)
        .map_err(|e| VaultError::Validation(format!("Invalid X.509 certificate: {}", e)))?;
    let tbs = &cert.tbs_certificate;

    let spki = tbs
        .subject_public_key_info
        .to_der()
        .map_err(|e| VaultError::Validation(format!("Invalid certificate public key: {}", e)))?;
    let public_key = RsaPublicKey::from_public_key_der(&spki)
        .map_err(|_| VaultError::validation("Only RSA certificates are supported"))?;

    Ok(ParsedCertificate {
        der: der.to_vec(),
        subject: common_name(&tbs.subject)
            .map(|cn| format!("CN={}", cn))
            .unwrap_or_default(),
        public_key,
        not_before: DateTime::<Utc>::from(tbs.validity.not_before.to_system_time()),
        not_after: DateTime::<Utc>::from(tbs.validity.not_after.to_system_time()),
        subject_alternative_names: subject_alternative_names(&cert)?,
    })
}
