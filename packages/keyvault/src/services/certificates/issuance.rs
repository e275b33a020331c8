//! Self-signed certificates and signing requests

use crate::crypto::{random_bytes, RsaKeyMaterial};
use crate::error::{VaultError, VaultResult};
use crate::model::{CertificatePolicy, KeyUsage, SubjectAlternativeNames};
use chrono::{DateTime, Months, Utc};
use rcgen::{
    CertificateParams, DistinguishedName, DnType, KeyPair, KeyUsagePurpose, OtherNameValue,
    SanType, SerialNumber,
};
use std::time::SystemTime;

/// Microsoft user principal name, `1.3.6.1.4.1.311.20.2.3`
const OID_UPN: [u64; 10] = [1, 3, 6, 1, 4, 1, 311, 20, 2, 3];

const SERIAL_LEN: usize = 16;

fn rcgen_error(context: &str) -> impl Fn(rcgen::Error) -> VaultError + '_ {
    move |e| VaultError::Validation(format!("{}: {}", context, e))
}

/// Signing key for rcgen built from the vault's PKCS#8 material
fn signing_key(material: &RsaKeyMaterial) -> VaultResult<KeyPair> {
    let pem = material.private_pkcs8_pem()?;
    KeyPair::from_pem_and_sign_algo(&pem, &rcgen::PKCS_RSA_SHA256)
        .map_err(|e| VaultError::Internal(format!("Failed to load certificate signing key: {}", e)))
}

fn key_usage_purpose(usage: KeyUsage) -> KeyUsagePurpose {
    match usage {
        KeyUsage::DigitalSignature => KeyUsagePurpose::DigitalSignature,
        KeyUsage::NonRepudiation => KeyUsagePurpose::ContentCommitment,
        KeyUsage::KeyEncipherment => KeyUsagePurpose::KeyEncipherment,
        KeyUsage::DataEncipherment => KeyUsagePurpose::DataEncipherment,
        KeyUsage::KeyAgreement => KeyUsagePurpose::KeyAgreement,
        KeyUsage::KeyCertSign => KeyUsagePurpose::KeyCertSign,
        KeyUsage::CrlSign => KeyUsagePurpose::CrlSign,
        KeyUsage::EncipherOnly => KeyUsagePurpose::EncipherOnly,
        KeyUsage::DecipherOnly => KeyUsagePurpose::DecipherOnly,
    }
}

fn san_entries(names: &SubjectAlternativeNames) -> VaultResult<Vec<SanType>> {
    let mut entries = Vec::new();
    for dns in &names.dns_names {
        let value = dns
            .clone()
            .try_into()
            .map_err(rcgen_error("Invalid DNS subject alternative name"))?;
        entries.push(SanType::DnsName(value));
    }
    for email in &names.emails {
        let value = email
            .clone()
            .try_into()
            .map_err(rcgen_error("Invalid email subject alternative name"))?;
        entries.push(SanType::Rfc822Name(value));
    }
    for upn in &names.upns {
        entries.push(SanType::OtherName((
            OID_UPN.to_vec(),
            OtherNameValue::Utf8String(upn.clone()),
        )));
    }
    Ok(entries)
}

/// Positive random serial number
fn serial_number() -> VaultResult<SerialNumber> {
    let mut serial = random_bytes(SERIAL_LEN)?;
    serial[0] &= 0x7f;
    serial[0] |= 0x01;
    Ok(SerialNumber::from(serial))
}

/// End of the validity window starting at `now`
pub fn validity_end(
    policy: &CertificatePolicy,
    now: DateTime<Utc>,
    default_days: u32,
) -> VaultResult<DateTime<Utc>> {
    let end = match policy.x509_props.validity_in_months {
        Some(months) => now.checked_add_months(Months::new(months)),
        None => now.checked_add_signed(chrono::Duration::days(i64::from(default_days))),
    };
    end.ok_or_else(|| VaultError::validation("Certificate validity is out of range"))
}

fn params(name: &str, policy: &CertificatePolicy) -> VaultResult<CertificateParams> {
    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, name);
    params.distinguished_name = dn;
    params.key_usages = policy
        .key_usages()
        .into_iter()
        .map(key_usage_purpose)
        .collect();
    params.subject_alt_names = san_entries(&policy.x509_props.subject_alternative_names)?;
    Ok(params)
}

/// Build a self-signed `CN={name}` certificate for `material`, valid `[now, not_after]`
pub fn self_signed(
    name: &str,
    policy: &CertificatePolicy,
    material: &RsaKeyMaterial,
    now: DateTime<Utc>,
    not_after: DateTime<Utc>,
) -> VaultResult<Vec<u8>> {
    let key_pair = signing_key(material)?;
    let mut params = params(name, policy)?;
    params.serial_number = Some(serial_number()?);
    params.not_before = SystemTime::from(now).into();
    params.not_after = SystemTime::from(not_after).into();

    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| VaultError::Internal(format!("Failed to sign certificate: {}", e)))?;
    Ok(cert.der().to_vec())
}

/// DER PKCS#10 request for an externally issued certificate
pub fn signing_request(
    name: &str,
    policy: &CertificatePolicy,
    material: &RsaKeyMaterial,
) -> VaultResult<Vec<u8>> {
    let key_pair = signing_key(material)?;
    let request = params(name, policy)?
        .serialize_request(&key_pair)
        .map_err(|e| VaultError::Internal(format!("Failed to build signing request: {}", e)))?;
    Ok(request.der().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::certificates::parse::parse_certificate;
    use once_cell::sync::Lazy;

    static MATERIAL: Lazy<RsaKeyMaterial> =
        Lazy::new(|| RsaKeyMaterial::generate(2048).expect("keygen"));

    #[test]
    fn self_signed_carries_subject_and_names() {
        let mut policy = CertificatePolicy::with_dns_names(["a.example.com", "b.example.com"]);
        policy.x509_props.subject_alternative_names.emails = vec!["ops@example.com".to_string()];
        policy.x509_props.subject_alternative_names.upns = vec!["svc@example.com".to_string()];

        let now = Utc::now();
        let end = validity_end(&policy, now, 365).expect("validity");
        let der = self_signed("c1", &policy, &MATERIAL, now, end).expect("issue");
        let parsed = parse_certificate(&der).expect("parse");

        assert_eq!(parsed.subject, "CN=c1");
        assert!(MATERIAL.same_public_key(&parsed.public_key));
        let names = parsed.subject_alternative_names;
        assert_eq!(names.dns_names, vec!["a.example.com", "b.example.com"]);
        assert_eq!(names.emails, vec!["ops@example.com"]);
        assert_eq!(names.upns, vec!["svc@example.com"]);
        assert_eq!((parsed.not_after - parsed.not_before).num_days(), 365);
    }

    #[test]
    fn validity_in_months_overrides_days() {
        let mut policy = CertificatePolicy::default();
        policy.x509_props.validity_in_months = Some(12);
        let now = Utc::now();
        let end = validity_end(&policy, now, 30).expect("validity");
        assert!((end - now).num_days() >= 365);
    }

    #[test]
    fn request_is_der() {
        let csr = signing_request("c1", &CertificatePolicy::default(), &MATERIAL).expect("csr");
        assert_eq!(csr.first(), Some(&0x30));
    }

    #[test]
    fn bad_dns_name_is_rejected() {
        let policy = CertificatePolicy::with_dns_names(["bücher.example"]);
        let now = Utc::now();
        let err = self_signed("c1", &policy, &MATERIAL, now, now + chrono::Duration::days(1))
            .expect_err("non-ascii");
        assert!(matches!(err, VaultError::Validation(_)));
    }
}
