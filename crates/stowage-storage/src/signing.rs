//! Request-signing primitives.
//!
//! Two independent schemes live here: Azure Blob Shared Key / service SAS
//! (HMAC-SHA256) and the Upyun REST signature (HMAC-SHA1 over an MD5-derived
//! key). Everything is a pure function of its inputs so signatures are
//! reproducible in tests.

use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use stowage_core::{StorageError, StorageResult};

/// `x-ms-version` sent with every Azure request.
pub const AZURE_API_VERSION: &str = "2021-08-06";
/// Service version used for SAS tokens; its string-to-sign has 13 fields.
pub const AZURE_SAS_VERSION: &str = "2018-03-28";
pub const UPYUN_AUTH_SCHEME: &str = "UPYUN";

fn base64_encode(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

pub fn hmac_sha256(key: &[u8], message: &str) -> StorageResult<Vec<u8>> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key)
        .map_err(|_| StorageError::internal("invalid HMAC-SHA256 key"))?;
    mac.update(message.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

pub fn hmac_sha1(key: &[u8], message: &str) -> StorageResult<Vec<u8>> {
    let mut mac = Hmac::<Sha1>::new_from_slice(key)
        .map_err(|_| StorageError::internal("invalid HMAC-SHA1 key"))?;
    mac.update(message.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Lowercase hex SHA-256.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Lowercase hex MD5.
pub fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

/// RFC 1123 date in GMT, as used by `Date` and `x-ms-date`.
pub fn http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

// ---------------------------------------------------------------------------
// Azure Blob
// ---------------------------------------------------------------------------

/// `CanonicalizedHeaders`: every `x-ms-*` header, lower-cased, sorted, one
/// `name:value\n` line each.
pub fn azure_canonicalized_headers(headers: &[(&str, &str)]) -> String {
    let mut ms_headers: Vec<(String, String)> = headers
        .iter()
        .map(|(name, value)| (name.trim().to_lowercase(), value.trim().to_string()))
        .filter(|(name, _)| name.starts_with("x-ms-"))
        .collect();
    ms_headers.sort();
    ms_headers
        .into_iter()
        .map(|(name, value)| format!("{}:{}\n", name, value))
        .collect()
}

/// `CanonicalizedResource`: `/account/container/blob` followed by sorted,
/// lower-cased query parameters on their own lines.
pub fn azure_canonicalized_resource(account: &str, path: &str, query: &[(&str, &str)]) -> String {
    let mut resource = format!("/{}/{}", account, path.trim_start_matches('/'));
    let mut params: Vec<(String, &str)> = query
        .iter()
        .map(|(name, value)| (name.to_lowercase(), *value))
        .collect();
    params.sort();
    for (name, value) in params {
        resource.push('\n');
        resource.push_str(&name);
        resource.push(':');
        resource.push_str(value);
    }
    resource
}

/// Shared Key string-to-sign. `Date` is always empty because `x-ms-date`
/// is sent instead; a zero content length is encoded as an empty field.
pub fn azure_string_to_sign(
    method: &str,
    content_length: u64,
    content_type: &str,
    canonicalized_headers: &str,
    canonicalized_resource: &str,
) -> String {
    let length = if content_length == 0 {
        String::new()
    } else {
        content_length.to_string()
    };
    format!(
        "{verb}\n\n\n{length}\n\n{content_type}\n\n\n\n\n\n\n{headers}{resource}",
        verb = method.to_uppercase(),
        length = length,
        content_type = content_type,
        headers = canonicalized_headers,
        resource = canonicalized_resource,
    )
}

/// HMAC-SHA256 keyed by the base64-decoded account key, base64-encoded.
pub fn azure_signature(account_key: &str, string_to_sign: &str) -> StorageResult<String> {
    let key = base64::engine::general_purpose::STANDARD
        .decode(account_key.trim())
        .map_err(|e| StorageError::internal("account_key is not valid base64").with_source(e))?;
    Ok(base64_encode(&hmac_sha256(&key, string_to_sign)?))
}

/// `Authorization` header value for a Shared Key request.
pub fn azure_authorization(account: &str, signature: &str) -> String {
    format!("SharedKey {}:{}", account, signature)
}

/// Parameters of a read-only blob service SAS.
#[derive(Debug, Clone)]
pub struct SasParams<'a> {
    pub account: &'a str,
    pub container: &'a str,
    pub blob: &'a str,
    pub permissions: &'a str,
    pub expiry: DateTime<Utc>,
    /// `https` or `https,http`.
    pub protocol: &'a str,
}

fn sas_time(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

pub fn azure_sas_string_to_sign(params: &SasParams<'_>) -> String {
    let canonical = format!(
        "/blob/{}/{}/{}",
        params.account,
        params.container,
        params.blob.trim_start_matches('/')
    );
    // sp, st, se, resource, si, sip, spr, sv, rscc, rscd, rsce, rscl, rsct
    [
        params.permissions,
        "",
        &sas_time(params.expiry),
        &canonical,
        "",
        "",
        params.protocol,
        AZURE_SAS_VERSION,
        "",
        "",
        "",
        "",
        "",
    ]
    .join("\n")
}

/// SAS query string (without the leading `?`).
pub fn azure_sas_query(params: &SasParams<'_>, account_key: &str) -> StorageResult<String> {
    let signature = azure_signature(account_key, &azure_sas_string_to_sign(params))?;
    Ok(format!(
        "sv={}&spr={}&se={}&sr=b&sp={}&sig={}",
        AZURE_SAS_VERSION,
        urlencoding::encode(params.protocol),
        urlencoding::encode(&sas_time(params.expiry)),
        params.permissions,
        urlencoding::encode(&signature),
    ))
}

// ---------------------------------------------------------------------------
// Upyun
// ---------------------------------------------------------------------------

/// Signing key derived from the operator password.
///
/// A password that already is 32 hex characters is taken as its MD5 digest;
/// anything else is hashed. Both forms converge on the same key.
pub fn upyun_signing_key(password: &str) -> String {
    let looks_hashed = password.len() == 32 && password.chars().all(|c| c.is_ascii_hexdigit());
    if looks_hashed {
        password.to_lowercase()
    } else {
        md5_hex(password.as_bytes())
    }
}

/// Base64 HMAC-SHA1 over `METHOD&URI&Date[&Content-MD5]`.
pub fn upyun_signature(
    signing_key: &str,
    method: &str,
    uri: &str,
    date: &str,
    content_md5: Option<&str>,
) -> StorageResult<String> {
    let mut parts = vec![method.to_uppercase(), uri.to_string(), date.to_string()];
    if let Some(md5) = content_md5.filter(|m| !m.is_empty()) {
        parts.push(md5.to_string());
    }
    Ok(base64_encode(&hmac_sha1(signing_key.as_bytes(), &parts.join("&"))?))
}

pub fn upyun_authorization(operator: &str, signature: &str) -> String {
    format!("{} {}:{}", UPYUN_AUTH_SCHEME, operator, signature)
}

/// Anti-leech `_upt` token: eight characters of `md5(secret&etime&uri)`
/// followed by the expiry timestamp.
pub fn upyun_url_token(secret: &str, expires_at: i64, uri: &str) -> String {
    let digest = md5_hex(format!("{}&{}&{}", secret, expires_at, uri).as_bytes());
    format!("{}{}", &digest[12..20], expires_at)
}
