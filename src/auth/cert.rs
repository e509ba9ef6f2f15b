use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use openssl::nid::Nid;
use openssl::x509::X509;

const PEM_MARKERS: &[&str] = &["-----BEGIN CERTIFICATE-----", "-----END CERTIFICATE-----"];

/// Subject Common Name of a client certificate blob as forwarded by the
/// fronting proxy: PEM markers optional, whitespace insignificant, body
/// base64. Anything unparseable resolves to no identity.
pub fn subject_common_name(blob: &str) -> Option<String> {
    let blob = blob.trim();
    if blob.is_empty() || blob == "null" {
        return None;
    }

    let mut body = blob.to_string();
    for marker in PEM_MARKERS {
        body = body.replace(marker, "");
    }
    body.retain(|c| !c.is_whitespace());

    let der = STANDARD.decode(body).ok()?;
    let cert = X509::from_der(&der).ok()?;
    let cn = cert
        .subject_name()
        .entries_by_nid(Nid::COMMONNAME)
        .next()?
        .data()
        .as_utf8()
        .ok()?
        .to_string();

    if cn.is_empty() { None } else { Some(cn) }
}

/// Test helper: a throwaway self-signed certificate with the given CN.
#[cfg(test)]
pub(crate) fn self_signed(cn: &str) -> String {
    use openssl::asn1::Asn1Time;
    use openssl::hash::MessageDigest;
    use openssl::pkey::PKey;
    use openssl::rsa::Rsa;
    use openssl::x509::X509NameBuilder;

    let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_nid(Nid::COMMONNAME, cn).unwrap();
    let name = name.build();

    let mut builder = X509::builder().unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&key).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(1).unwrap())
        .unwrap();
    builder.sign(&key, MessageDigest::sha256()).unwrap();
    String::from_utf8(builder.build().to_pem().unwrap()).unwrap()
}
