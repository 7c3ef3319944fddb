//! URL policy shared by every adapter.
//!
//! Local backends always resolve to a filesystem path. Private backends hand
//! out signed, expiring URLs. Public backends return a direct URL on the
//! configured custom domain, or on the backend's default host otherwise.

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use stowage_core::{BackendType, Capabilities, ObjectAcl};

/// Characters escaped inside a single path segment.
pub const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'[')
    .add(b']')
    .add(b'\\')
    .add(b'^')
    .add(b'|');

/// How `get_url` should answer for one adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlPolicy {
    LocalPath,
    Signed,
    Direct,
    /// Private backend without signing support: no direct URL may be exposed.
    Unavailable,
}

impl UrlPolicy {
    pub fn decide(backend: BackendType, access: ObjectAcl, capabilities: &Capabilities) -> Self {
        if backend.is_local() {
            UrlPolicy::LocalPath
        } else if access.is_private() {
            if capabilities.supports_signed_url {
                UrlPolicy::Signed
            } else {
                UrlPolicy::Unavailable
            }
        } else {
            UrlPolicy::Direct
        }
    }
}

/// Percent-encode each `/`-separated segment independently.
pub fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|segment| utf8_percent_encode(segment, PATH_SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// Prefix a bare host with a scheme.
pub fn normalize_base(base: &str, use_https: bool) -> String {
    let base = base.trim().trim_end_matches('/');
    if base.starts_with("http://") || base.starts_with("https://") {
        base.to_string()
    } else if use_https {
        format!("https://{}", base)
    } else {
        format!("http://{}", base)
    }
}

/// Direct URL builder: custom domain first, backend default host otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectUrl {
    base: String,
}

impl DirectUrl {
    pub fn new(custom_domain: Option<&str>, default_base: &str, use_https: bool) -> Self {
        let base = match custom_domain {
            Some(domain) => normalize_base(domain, use_https),
            None => normalize_base(default_base, use_https),
        };
        Self { base }
    }

    /// Base kept verbatim, for non-HTTP schemes such as `ftp://`.
    pub fn from_base(base: impl Into<String>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn url(&self, key: &str) -> String {
        format!("{}/{}", self.base, encode_key(key.trim_start_matches('/')))
    }
}

/// Default S3-style base URL.
///
/// Path-style puts the bucket in the path (`endpoint/bucket`); virtual-hosted
/// puts it in the host (`bucket.endpoint`).
pub fn s3_default_base(
    endpoint: Option<&str>,
    bucket: &str,
    region: &str,
    path_style: bool,
    use_https: bool,
) -> String {
    match endpoint {
        Some(endpoint) => {
            let endpoint = normalize_base(endpoint, use_https);
            if path_style {
                format!("{}/{}", endpoint, bucket)
            } else {
                match endpoint.split_once("://") {
                    Some((scheme, host)) => format!("{}://{}.{}", scheme, bucket, host),
                    None => format!("{}.{}", bucket, endpoint),
                }
            }
        }
        None => {
            let scheme = if use_https { "https" } else { "http" };
            if path_style {
                format!("{}://s3.{}.amazonaws.com/{}", scheme, region, bucket)
            } else {
                format!("{}://{}.s3.{}.amazonaws.com", scheme, bucket, region)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_decisions() {
        let signed = Capabilities {
            supports_signed_url: true,
            ..Capabilities::basic(0)
        };
        let unsigned = Capabilities::basic(0);

        assert_eq!(
            UrlPolicy::decide(BackendType::Local, ObjectAcl::Private, &signed),
            UrlPolicy::LocalPath
        );
        assert_eq!(
            UrlPolicy::decide(BackendType::S3, ObjectAcl::Private, &signed),
            UrlPolicy::Signed
        );
        assert_eq!(
            UrlPolicy::decide(BackendType::S3, ObjectAcl::PublicRead, &signed),
            UrlPolicy::Direct
        );
        assert_eq!(
            UrlPolicy::decide(BackendType::Ftp, ObjectAcl::Private, &unsigned),
            UrlPolicy::Unavailable
        );
    }

    #[test]
    fn test_encode_key_per_segment() {
        assert_eq!(encode_key("files/00/1/my photo.jpg"), "files/00/1/my%20photo.jpg");
        assert_eq!(encode_key("a/照片.png"), "a/%E7%85%A7%E7%89%87.png");
        assert_eq!(encode_key("a/50%.png"), "a/50%25.png");
    }

    #[test]
    fn test_direct_url_prefers_custom_domain() {
        let url = DirectUrl::new(Some("cdn.example.com/"), "https://bucket.s3.amazonaws.com", true);
        assert_eq!(url.url("files/a.jpg"), "https://cdn.example.com/files/a.jpg");

        let url = DirectUrl::new(None, "http://localhost:9000/bucket", true);
        assert_eq!(url.url("/files/a.jpg"), "http://localhost:9000/bucket/files/a.jpg");
    }

    #[test]
    fn test_s3_default_base() {
        assert_eq!(
            s3_default_base(None, "b", "eu-west-1", false, true),
            "https://b.s3.eu-west-1.amazonaws.com"
        );
        assert_eq!(
            s3_default_base(None, "b", "eu-west-1", true, true),
            "https://s3.eu-west-1.amazonaws.com/b"
        );
        assert_eq!(
            s3_default_base(Some("http://minio:9000"), "b", "us-east-1", true, true),
            "http://minio:9000/b"
        );
        assert_eq!(
            s3_default_base(Some("oss-cn-hangzhou.aliyuncs.com"), "b", "", false, true),
            "https://b.oss-cn-hangzhou.aliyuncs.com"
        );
    }
}
