//! Secret taxonomy and validation.

mod store;

#[cfg(test)]
mod tests;

pub use self::store::SecretStore;
use anyhow::{anyhow, bail, ensure, Result};
use nginx_ingress_controller_k8s_api::Secret;
use rustls_pemfile::Item;
use std::collections::BTreeSet;
use x509_parser::{
    certificate::X509Certificate,
    der_parser::{
        ber::{BerObject, BerObjectContent},
        der::parse_der,
    },
    public_key::PublicKey,
};

pub const TLS: &str = "kubernetes.io/tls";
pub const CA: &str = "nginx.org/ca";
pub const JWK: &str = "nginx.org/jwk";
pub const HTPASSWD: &str = "nginx.org/htpasswd";
pub const OIDC: &str = "nginx.org/oidc";
pub const API_KEY: &str = "nginx.org/apikey";
pub const LICENSE: &str = "nginx.com/license";

pub const TLS_CERT_KEY: &str = "tls.crt";
pub const TLS_KEY_KEY: &str = "tls.key";
pub const CA_KEY: &str = "ca.crt";
pub const CRL_KEY: &str = "ca.crl";
pub const JWK_KEY: &str = "jwk";
pub const HTPASSWD_KEY: &str = "htpasswd";
pub const CLIENT_SECRET_KEY: &str = "client-secret";
pub const LICENSE_KEY: &str = "license.jwt";

const SUPPORTED: [&str; 7] = [TLS, CA, JWK, HTPASSWD, OIDC, API_KEY, LICENSE];

/// The `type` of a secret; untyped secrets are `Opaque`.
pub fn secret_type(secret: &Secret) -> &str {
    secret.type_.as_deref().unwrap_or("Opaque")
}

pub fn is_supported_type(type_: &str) -> bool {
    SUPPORTED.contains(&type_)
}

/// Validates a secret according to its type.
pub fn validate(secret: &Secret) -> Result<()> {
    match secret_type(secret) {
        TLS => validate_tls(secret),
        CA => validate_ca(secret),
        JWK => validate_jwk(secret),
        HTPASSWD => validate_htpasswd(secret),
        OIDC => validate_oidc(secret),
        API_KEY => validate_api_key(secret),
        LICENSE => validate_license(secret),
        other => bail!("secret is of the unsupported type {}", other),
    }
}

pub fn validate_tls(secret: &Secret) -> Result<()> {
    ensure!(
        secret_type(secret) == TLS,
        "TLS Secret must be of the type {}",
        TLS
    );
    let cert = data(secret, TLS_CERT_KEY)
        .ok_or_else(|| anyhow!("TLS secret must have the data field {}", TLS_CERT_KEY))?;
    let key = data(secret, TLS_KEY_KEY)
        .ok_or_else(|| anyhow!("TLS secret must have the data field {}", TLS_KEY_KEY))?;
    validate_keypair(cert, key).map_err(|e| anyhow!("failed to validate TLS cert and key: {}", e))
}

pub fn validate_ca(secret: &Secret) -> Result<()> {
    let ca = data(secret, CA_KEY)
        .ok_or_else(|| anyhow!("CA secret must have the data field {}", CA_KEY))?;
    let der = match rustls_pemfile::read_one(&mut &*ca) {
        Ok(Some(Item::X509Certificate(der))) => der,
        _ => bail!(
            "the data field {} must hold a valid CERTIFICATE PEM block",
            CA_KEY
        ),
    };
    x509_parser::parse_x509_certificate(&der)
        .map_err(|e| anyhow!("failed to validate certificate: {}", e))?;
    Ok(())
}

pub fn validate_jwk(secret: &Secret) -> Result<()> {
    ensure!(
        data(secret, JWK_KEY).is_some(),
        "JWK secret must have the data field {}",
        JWK_KEY
    );
    Ok(())
}

pub fn validate_htpasswd(secret: &Secret) -> Result<()> {
    ensure!(
        data(secret, HTPASSWD_KEY).is_some(),
        "Htpasswd secret must have the data field {}",
        HTPASSWD_KEY
    );
    Ok(())
}

pub fn validate_oidc(secret: &Secret) -> Result<()> {
    let client_secret = data(secret, CLIENT_SECRET_KEY)
        .ok_or_else(|| anyhow!("OIDC secret must have the data field {}", CLIENT_SECRET_KEY))?;
    let client_secret = std::str::from_utf8(client_secret).unwrap_or_default();
    ensure!(
        is_valid_client_secret(client_secret),
        "OIDC client secret is invalid: It must contain valid ASCII characters, must have all '\"' \
         escaped and must not contain any '$' or whitespaces ('\\n', '\\t' etc.) or end with an \
         unescaped '\\'"
    );
    Ok(())
}

pub fn validate_api_key(secret: &Secret) -> Result<()> {
    let mut seen = BTreeSet::new();
    for value in secret.data.iter().flat_map(|d| d.values()) {
        ensure!(seen.insert(&value.0), "API Keys cannot be repeated");
    }
    Ok(())
}

pub fn validate_license(secret: &Secret) -> Result<()> {
    ensure!(
        data(secret, LICENSE_KEY).is_some(),
        "License secret must have the data field {}",
        LICENSE_KEY
    );
    Ok(())
}

fn data<'s>(secret: &'s Secret, key: &str) -> Option<&'s [u8]> {
    secret
        .data
        .as_ref()?
        .get(key)
        .map(|v| v.0.as_slice())
        .filter(|v| !v.is_empty())
}

fn validate_keypair(cert: &[u8], key: &[u8]) -> Result<()> {
    let der = match rustls_pemfile::certs(&mut &*cert).next() {
        Some(der) => der?,
        None => bail!("no certificate PEM block found"),
    };
    let (_, cert) =
        x509_parser::parse_x509_certificate(&der).map_err(|e| anyhow!("{}", e))?;

    let mut rd = key;
    loop {
        match rustls_pemfile::read_one(&mut rd)? {
            Some(Item::Pkcs8Key(pkcs8)) => {
                let pair = rcgen::KeyPair::try_from(pkcs8.secret_pkcs8_der())
                    .map_err(|e| anyhow!("{}", e))?;
                ensure!(
                    pair.public_key_der() == cert.public_key().raw,
                    "private key does not match public key"
                );
                return Ok(());
            }
            Some(Item::Pkcs1Key(pkcs1)) => return check_rsa_key(&cert, pkcs1.secret_pkcs1_der()),
            Some(Item::Sec1Key(sec1)) => return check_ec_key(&cert, sec1.secret_sec1_der()),
            Some(_) => continue,
            None => bail!("no private key PEM block found"),
        }
    }
}

/// Matches an `RSAPrivateKey` (PKCS#1) against the certificate's public key
/// by its modulus and public exponent.
fn check_rsa_key(cert: &X509Certificate<'_>, der: &[u8]) -> Result<()> {
    let (_, key) = parse_der(der).map_err(|e| anyhow!("invalid RSA private key: {}", e))?;
    let fields = key
        .as_sequence()
        .map_err(|e| anyhow!("invalid RSA private key: {}", e))?;
    let (modulus, exponent) = match &fields[..] {
        [_version, n, e, ..] => (
            n.as_slice().map_err(|e| anyhow!("invalid RSA modulus: {}", e))?,
            e.as_slice().map_err(|e| anyhow!("invalid RSA exponent: {}", e))?,
        ),
        _ => bail!("invalid RSA private key: missing fields"),
    };

    let public = cert.public_key().parsed().map_err(|e| anyhow!("{}", e))?;
    let PublicKey::RSA(public) = public else {
        bail!("private key type does not match public key type");
    };
    ensure!(
        unsigned(modulus) == unsigned(public.modulus)
            && unsigned(exponent) == unsigned(public.exponent),
        "private key does not match public key"
    );
    Ok(())
}

/// Matches an `ECPrivateKey` (SEC1) against the certificate's public key. The
/// key must carry its public point.
fn check_ec_key(cert: &X509Certificate<'_>, der: &[u8]) -> Result<()> {
    let (_, key) = parse_der(der).map_err(|e| anyhow!("invalid EC private key: {}", e))?;
    let fields = key
        .as_sequence()
        .map_err(|e| anyhow!("invalid EC private key: {}", e))?;
    let point = fields
        .iter()
        .skip(2)
        .find_map(ec_public_point)
        .ok_or_else(|| anyhow!("EC private key does not include its public key"))?;
    ensure!(
        point == &*cert.public_key().subject_public_key.data,
        "private key does not match public key"
    );
    Ok(())
}

/// The bits of the explicitly tagged `publicKey` field of an `ECPrivateKey`.
fn ec_public_point<'a>(field: &BerObject<'a>) -> Option<&'a [u8]> {
    match &field.content {
        BerObjectContent::BitString(_, bits) => Some(bits.data),
        BerObjectContent::Tagged(_, _, inner) => ec_public_point(inner),
        BerObjectContent::Unknown(_) => ec_public_point(&parse_der(field.as_slice().ok()?).ok()?.1),
        _ => None,
    }
}

/// Strips the sign padding of a DER integer.
fn unsigned(int: &[u8]) -> &[u8] {
    let start = int.iter().position(|b| *b != 0).unwrap_or(int.len());
    &int[start..]
}

fn is_valid_client_secret(s: &str) -> bool {
    regex::Regex::new(r#"^([^"$\\\s]|\\[^$])*$"#)
        .map(|re| re.is_match(s))
        .unwrap_or(false)
}
