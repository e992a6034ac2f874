//! Key generation, CSR building and PKCS#12 bundles
//!
//! Issued certificates are kept as password-protected PKCS#12 (PFX)
//! bundles holding the private key, the leaf certificate and the rest of
//! the chain. The leaf is always the first certificate bag.

use chrono::{DateTime, Utc};
use p12::PFX;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, SignatureAlgorithm};
use tracing::debug;

use certwright_config::KeyAlgorithm;

use crate::error::AcmeError;
use crate::model::{IssuedCertificate, OrderDescriptor};

fn signature_algorithm(algorithm: KeyAlgorithm) -> &'static SignatureAlgorithm {
    match algorithm {
        KeyAlgorithm::RS256 => &rcgen::PKCS_RSA_SHA256,
        KeyAlgorithm::ES256 => &rcgen::PKCS_ECDSA_P256_SHA256,
        KeyAlgorithm::ES384 => &rcgen::PKCS_ECDSA_P384_SHA384,
        KeyAlgorithm::ES512 => &rcgen::PKCS_ECDSA_P521_SHA512,
    }
}

/// Fresh private key for a certificate
pub fn generate_key(algorithm: KeyAlgorithm) -> Result<KeyPair, AcmeError> {
    KeyPair::generate_for(signature_algorithm(algorithm)).map_err(|e| {
        AcmeError::Certificate(format!("failed to generate {} key: {}", algorithm, e))
    })
}

/// DER-encoded CSR for every domain of the order.
///
/// The subject carries the common name plus whichever of the organization
/// fields are configured.
pub fn build_csr(descriptor: &OrderDescriptor, key: &KeyPair) -> Result<Vec<u8>, AcmeError> {
    let mut params = CertificateParams::new(descriptor.domains.clone())
        .map_err(|e| AcmeError::Certificate(format!("invalid CSR names: {}", e)))?;

    let csr = &descriptor.csr;
    let mut name = DistinguishedName::new();
    if let Some(common_name) = descriptor.common_name() {
        name.push(DnType::CommonName, common_name);
    }
    let optional = [
        (DnType::OrganizationName, &csr.organization),
        (DnType::OrganizationalUnitName, &csr.organization_unit),
        (DnType::LocalityName, &csr.locality),
        (DnType::StateOrProvinceName, &csr.state),
        (DnType::CountryName, &csr.country),
    ];
    for (dn_type, value) in optional {
        if let Some(value) = value {
            name.push(dn_type, value.as_str());
        }
    }
    params.distinguished_name = name;

    let request = params
        .serialize_request(key)
        .map_err(|e| AcmeError::Certificate(format!("failed to build CSR: {}", e)))?;
    Ok(request.der().to_vec())
}

/// DER certificates of a PEM chain, leaf first
pub fn parse_chain(chain_pem: &str) -> Result<Vec<Vec<u8>>, AcmeError> {
    let blocks = pem::parse_many(chain_pem)
        .map_err(|e| AcmeError::Certificate(format!("invalid PEM chain: {}", e)))?;

    let chain: Vec<Vec<u8>> = blocks
        .into_iter()
        .filter(|block| block.tag() == "CERTIFICATE")
        .map(|block| block.contents().to_vec())
        .collect();

    if chain.is_empty() {
        return Err(AcmeError::Certificate(
            "chain contains no certificate".to_string(),
        ));
    }
    Ok(chain)
}

/// Not-after and subject common name of a DER certificate.
///
/// Falls back to the whole subject when there is no common name.
pub fn describe(der: &[u8]) -> Result<(DateTime<Utc>, String), AcmeError> {
    let (_, certificate) = x509_parser::parse_x509_certificate(der)
        .map_err(|e| AcmeError::Certificate(format!("invalid certificate: {}", e)))?;

    let timestamp = certificate.validity().not_after.timestamp();
    let not_after = DateTime::from_timestamp(timestamp, 0).ok_or_else(|| {
        AcmeError::Certificate(format!("not-after {} out of range", timestamp))
    })?;

    let subject = certificate
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| certificate.subject().to_string());

    Ok((not_after, subject))
}

/// Bundle the key and the full chain into a password-protected PFX
pub fn bundle(
    chain_pem: &str,
    key: &KeyPair,
    password: &str,
    friendly_name: &str,
) -> Result<Vec<u8>, AcmeError> {
    let chain = parse_chain(chain_pem)?;
    let Some((leaf, rest)) = chain.split_first() else {
        return Err(AcmeError::Certificate("empty chain".to_string()));
    };
    let intermediates: Vec<&[u8]> = rest.iter().map(Vec::as_slice).collect();

    let pfx = PFX::new_with_cas(leaf, &key.serialize_der(), &intermediates, password, friendly_name)
        .ok_or_else(|| AcmeError::Certificate("failed to build PKCS#12 bundle".to_string()))?;

    debug!(
        friendly_name = %friendly_name,
        chain_len = chain.len(),
        "Built PKCS#12 bundle"
    );
    Ok(pfx.to_der())
}

/// DER certificates inside a bundle, leaf first
pub fn certificates(data: &[u8], password: &str) -> Result<Vec<Vec<u8>>, AcmeError> {
    let pfx = PFX::parse(data)
        .map_err(|e| AcmeError::Certificate(format!("invalid PKCS#12 bundle: {:?}", e)))?;

    if !pfx.verify_mac(password) {
        return Err(AcmeError::Certificate(
            "PKCS#12 integrity check failed (wrong password?)".to_string(),
        ));
    }

    pfx.cert_x509_bags(password)
        .map_err(|e| AcmeError::Certificate(format!("unreadable certificate bags: {:?}", e)))
}

/// Open a bundle and describe its leaf certificate
pub fn open(data: &[u8], password: &str) -> Result<IssuedCertificate, AcmeError> {
    let certificates = certificates(data, password)?;
    let leaf = certificates
        .first()
        .ok_or_else(|| AcmeError::Certificate("bundle holds no certificate".to_string()))?;
    let (not_after, subject) = describe(leaf)?;

    Ok(IssuedCertificate {
        pfx: data.to_vec(),
        not_after,
        subject,
    })
}
