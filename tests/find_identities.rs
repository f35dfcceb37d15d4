//! Scans a directory tree with keys and certificates spread over several
//! files and checks what gets paired up.

use std::fs;
use std::path::Path;

use base64::Engine;
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::symm::Cipher;
use openssl::x509::{X509, X509NameBuilder};
use pemscout::cache::{IdentityIndexer, IndexCache, KeyIndexer};
use pemscout::matcher::ScanItem;
use pemscout::scanner::{ScanOptions, Scanner};
use tokio_util::sync::CancellationToken;

fn new_key() -> PKey<Private> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
}

fn cert(pkey: &PKey<Private>, cn: &str) -> X509 {
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_nid(Nid::COMMONNAME, cn).unwrap();
    let name = name.build();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    builder
        .set_serial_number(&BigNum::from_u32(7).unwrap().to_asn1_integer().unwrap())
        .unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(pkey).unwrap();
    builder.set_not_before(&Asn1Time::days_from_now(0).unwrap()).unwrap();
    builder.set_not_after(&Asn1Time::days_from_now(30).unwrap()).unwrap();
    builder.sign(pkey, MessageDigest::sha256()).unwrap();
    builder.build()
}

fn armor(label: &str, headers: &[(&str, &str)], der: &[u8]) -> String {
    let mut res = format!("-----BEGIN {label}-----\n");
    for (name, value) in headers {
        res.push_str(&format!("{name}: {value}\n"));
    }
    if !headers.is_empty() {
        res.push('\n');
    }
    let body = base64::engine::general_purpose::STANDARD.encode(der);
    for line in body.as_bytes().chunks(64) {
        res.push_str(std::str::from_utf8(line).unwrap());
        res.push('\n');
    }
    res.push_str(&format!("-----END {label}-----\n"));
    res
}

fn save(dir: &Path, name: &str, content: &str) {
    let path = dir.join(name);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

/// Lays out a tree with:
///
/// * `secure/web.key`: an encrypted key, its public half in
///   `public/web.pub` declaring the key through a `Key-Id` header and its
///   certificate in `certs/web.crt`,
/// * `api.pem`: a plain key with its certificate in the same file,
/// * `.hidden/ops.pem`: a key and certificate that are skipped by default,
/// * `orphan.crt`: a certificate without a key.
///
/// Returns the identifier of the web key.
fn populate(dir: &Path) -> String {
    let web = new_key();
    let ciphertext = web
        .private_key_to_pkcs8_passphrase(Cipher::aes_256_cbc(), b"secret")
        .unwrap();
    let web_id = hex::encode(openssl::sha::sha256(&ciphertext));
    save(dir, "secure/web.key", &armor("ENCRYPTED PRIVATE KEY", &[], &ciphertext));
    save(
        dir,
        "public/web.pub",
        &armor(
            "PUBLIC KEY",
            &[("Key-Id", &web_id)],
            &web.public_key_to_der().unwrap(),
        ),
    );
    save(
        dir,
        "certs/web.crt",
        &String::from_utf8(cert(&web, "web").to_pem().unwrap()).unwrap(),
    );

    let api = new_key();
    let mut api_pem =
        String::from_utf8(api.private_key_to_pem_pkcs8().unwrap()).unwrap();
    api_pem.push_str(
        &String::from_utf8(cert(&api, "api").to_pem().unwrap()).unwrap(),
    );
    save(dir, "api.pem", &api_pem);

    let ops = new_key();
    let mut ops_pem =
        String::from_utf8(ops.private_key_to_pem_pkcs8().unwrap()).unwrap();
    ops_pem.push_str(
        &String::from_utf8(cert(&ops, "ops").to_pem().unwrap()).unwrap(),
    );
    save(dir, ".hidden/ops.pem", &ops_pem);

    save(
        dir,
        "orphan.crt",
        &String::from_utf8(cert(&new_key(), "orphan").to_pem().unwrap())
            .unwrap(),
    );

    hex::encode(openssl::sha::sha256(&web.public_key_to_der().unwrap()))
}

#[tokio::test(flavor = "multi_thread")]
async fn find_identities_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    populate(dir.path());

    let scanner = Scanner::new(ScanOptions::default());
    let items = scanner
        .find_identities(CancellationToken::new(), vec![dir.path().into()])
        .collect()
        .await;

    let mut subjects = items
        .iter()
        .filter_map(|item| match item {
            ScanItem::Identity(identity) => {
                Some(identity.certificate().subject().to_string())
            }
            _ => None,
        })
        .collect::<Vec<_>>();
    subjects.sort();
    assert_eq!(subjects, ["CN=api", "CN=web"]);

    let web = items
        .iter()
        .find_map(|item| match item {
            ScanItem::Identity(identity)
                if identity.certificate().subject() == "CN=web" =>
            {
                Some(identity)
            }
            _ => None,
        })
        .unwrap();
    assert!(web.key().is_encrypted());
    assert!(web.key().location().ends_with("web.key"));

    let orphans = items
        .iter()
        .filter(|item| matches!(item, ScanItem::UnmatchedCertificate(_)))
        .count();
    assert_eq!(orphans, 1);
    assert!(!items.iter().any(|item| matches!(item, ScanItem::UnmatchedKey(_))));
}

#[tokio::test(flavor = "multi_thread")]
async fn cache_answers_lookups() {
    let dir = tempfile::tempdir().unwrap();
    let web_id = populate(dir.path());

    let identities = IndexCache::new(
        Scanner::new(ScanOptions::default()),
        IdentityIndexer,
    );
    identities.refresh(vec![dir.path().into()]);
    let api = identities.get("CN=api").await.unwrap();
    assert!(api.value().key().location().ends_with("api.pem"));
    assert!(identities.get("CN=ops").await.is_none());
    assert_eq!(identities.get_all().await.len(), 2);
    assert!(identities.is_passive());

    let keys = IndexCache::new(
        Scanner::new(ScanOptions::default()),
        KeyIndexer,
    );
    keys.refresh(vec![dir.path().into()]);
    let web = keys.get(&web_id).await.unwrap();
    assert!(web.value().is_encrypted());
    assert_eq!(web.key(), web_id);
}
