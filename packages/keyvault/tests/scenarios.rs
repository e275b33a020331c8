//! End-to-end flows across the secret, key and certificate services

mod common;

use chrono::Utc;
use cryypt_keyvault::services::certificates::parse_certificate;
use cryypt_keyvault::{
    CertificatePolicy, CreateKeyOptions, ErrorKind, KeyBundle, PageRequest, PropertiesPatch,
};
use sha2::{Digest, Sha256};

#[tokio::test(flavor = "multi_thread")]
async fn key_signs_and_verifies() {
    let vault = common::vault();
    let keys = vault.keys();

    let k1 = keys
        .create_key("k1", CreateKeyOptions::rsa(2048))
        .await
        .expect("create k1");
    assert_eq!(k1.key_size, 2048);
    let version = Some(k1.properties.version);

    let digest = Sha256::digest(b"scenario A");
    let signed = keys
        .sign("k1", version, &digest, Utc::now())
        .await
        .expect("sign");
    assert!(signed.kid.starts_with("https://vault.test/keys/k1/"));
    let verified = keys
        .verify("k1", version, &digest, &signed.value, Utc::now())
        .await
        .expect("verify");
    assert!(verified);

    let mut tampered = signed.value.clone();
    tampered[0] ^= 0xff;
    assert!(!keys
        .verify("k1", version, &digest, &tampered, Utc::now())
        .await
        .expect("verify"));
}

#[tokio::test(flavor = "multi_thread")]
async fn secret_soft_delete_and_recover() {
    let vault = common::vault();
    let secrets = vault.secrets();

    secrets
        .set_secret("s1", "hello", None, PropertiesPatch::default())
        .await
        .expect("set");
    let deleted = secrets.delete_secret("s1").await.expect("soft delete");
    assert!(deleted.properties.deleted);
    assert!(deleted.properties.scheduled_purge_at.is_some());

    let err = secrets.get_secret("s1", None).await.expect_err("deleted");
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let held = secrets.get_deleted_secret("s1").await.expect("deleted view");
    assert_eq!(held.value, "hello");

    secrets.recover_deleted_secret("s1").await.expect("recover");
    let back = secrets.get_secret("s1", None).await.expect("recovered");
    assert_eq!(back.value, "hello");
    assert!(!back.properties.deleted);
}

#[tokio::test(flavor = "multi_thread")]
async fn certificate_with_dns_name() {
    let vault = common::vault();
    vault
        .certificates()
        .create_certificate(
            "c1",
            CertificatePolicy::with_dns_names(["a.example.com"]),
            PropertiesPatch::default(),
        )
        .await
        .expect("create c1");

    let cert = vault
        .certificates()
        .get_certificate("c1", None)
        .await
        .expect("get c1");
    let parsed = parse_certificate(&cert.cer).expect("parse");
    assert!(parsed
        .subject_alternative_names
        .dns_names
        .contains(&"a.example.com".to_string()));
    assert_eq!(parsed.subject, "CN=c1");

    let key = vault.keys().get_key("c1", None).await.expect("backing key");
    let secret = vault
        .secrets()
        .get_secret("c1", None)
        .await
        .expect("backing secret");
    assert!(key.properties.managed);
    assert!(secret.properties.managed);
}

#[tokio::test(flavor = "multi_thread")]
async fn key_backup_purge_restore() {
    let vault = common::vault();
    let keys = vault.keys();

    keys.create_key("k1", CreateKeyOptions::rsa(2048))
        .await
        .expect("v1");
    keys.rotate_key("k1").await.expect("v2");
    let before: Vec<KeyBundle> = keys
        .list_key_versions("k1", &PageRequest::default())
        .await
        .expect("versions")
        .items;
    assert_eq!(before.len(), 2);

    let token = keys.backup_key("k1").await.expect("backup");
    keys.delete_key("k1").await.expect("delete");
    keys.purge_deleted_key("k1").await.expect("purge");
    assert_eq!(
        keys.get_key("k1", None).await.expect_err("purged").kind(),
        ErrorKind::NotFound
    );

    keys.restore_key(&token).await.expect("restore");
    let after: Vec<KeyBundle> = keys
        .list_key_versions("k1", &PageRequest::default())
        .await
        .expect("versions")
        .items;
    assert_eq!(after.len(), before.len());
    for (restored, original) in after.iter().zip(&before) {
        assert_eq!(restored.properties.version, original.properties.version);
        assert_eq!(restored.material, original.material);
    }

    let next = keys.rotate_key("k1").await.expect("v3");
    assert!(before
        .iter()
        .all(|k| k.properties.version < next.properties.version));
}
