//! Edge-layer URL recovery
//!
//! When the gateway runs behind the edge proxy, the client-facing URL has
//! been rewritten: the requester's identity is appended as the final path
//! segment and the true path travels percent-encoded in a `path` query
//! parameter. [`EdgeUrlCodec::decode`] undoes that rewrite.

use http::uri::Uri;
use std::borrow::Cow;

/// Result of decoding an edge-rewritten URL
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedUrl {
    /// Client identity taken from the last path segment, when present.
    pub client_identity: Option<String>,
    /// The recovered URL; the input unchanged when no `path` parameter
    /// was present.
    pub url: Uri,
}

/// Translates between the gateway's external URL shape and the edge
/// layer's encoded shape
pub struct EdgeUrlCodec;

impl EdgeUrlCodec {
    /// Recover the true request URL and client identity from an
    /// edge-rewritten URL.
    ///
    /// Pure and infallible: malformed input yields the original URL and no
    /// identity rather than an error.
    pub fn decode(rewritten: &Uri) -> DecodedUrl {
        let client_identity = rewritten
            .path()
            .rsplit('/')
            .next()
            .filter(|segment| !segment.is_empty())
            .map(str::to_string);

        let Some(query) = rewritten.query() else {
            return DecodedUrl {
                client_identity,
                url: rewritten.clone(),
            };
        };

        let mut encoded_path = None;
        let mut remaining = Vec::new();
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            match pair.split_once('=') {
                Some(("path", value)) => encoded_path = Some(value),
                _ => remaining.push(pair),
            }
        }

        let Some(encoded_path) = encoded_path else {
            return DecodedUrl {
                client_identity,
                url: rewritten.clone(),
            };
        };

        let decoded_path = percent_decode(encoded_path);
        let path = if decoded_path.starts_with('/') {
            decoded_path.into_owned()
        } else {
            format!("/{decoded_path}")
        };

        let path_and_query = if remaining.is_empty() {
            path
        } else {
            format!("{path}?{}", remaining.join("&"))
        };

        let url = rebuild(rewritten, &path_and_query).unwrap_or_else(|| rewritten.clone());

        DecodedUrl {
            client_identity,
            url,
        }
    }
}

fn percent_decode(value: &str) -> Cow<'_, str> {
    // '+' is not a space in a path; only percent escapes are decoded.
    urlencoding::decode(value).unwrap_or(Cow::Borrowed(value))
}

fn rebuild(original: &Uri, path_and_query: &str) -> Option<Uri> {
    let mut builder = Uri::builder();
    if let Some(scheme) = original.scheme() {
        builder = builder.scheme(scheme.clone());
    }
    if let Some(authority) = original.authority() {
        builder = builder.authority(authority.clone());
    }
    builder.path_and_query(path_and_query).build().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovers_path_and_identity() {
        let rewritten: Uri = "https://gw.example.com/t/203.0.113.7?path=%2Fapi%2Fusers"
            .parse()
            .unwrap();

        let decoded = EdgeUrlCodec::decode(&rewritten);
        assert_eq!(decoded.client_identity.as_deref(), Some("203.0.113.7"));
        assert_eq!(decoded.url.to_string(), "https://gw.example.com/api/users");
    }

    #[test]
    fn strips_only_the_path_parameter() {
        let rewritten: Uri = "https://gw.example.com/t/10.0.0.1?a=1&path=%2Fsearch&b=2"
            .parse()
            .unwrap();

        let decoded = EdgeUrlCodec::decode(&rewritten);
        assert_eq!(
            decoded.url.to_string(),
            "https://gw.example.com/search?a=1&b=2"
        );
    }

    #[test]
    fn percent_decodes_reserved_characters() {
        let rewritten: Uri = "https://gw.example.com/9.9.9.9?path=%2Fdocs%2Fa%3Db%2Fc%40d"
            .parse()
            .unwrap();

        let decoded = EdgeUrlCodec::decode(&rewritten);
        assert_eq!(decoded.url.path(), "/docs/a=b/c@d");
    }

    #[test]
    fn absent_path_parameter_leaves_the_url_unchanged() {
        let rewritten: Uri = "https://gw.example.com/t/172.16.0.4?q=term".parse().unwrap();

        let decoded = EdgeUrlCodec::decode(&rewritten);
        assert_eq!(decoded.url, rewritten);
        assert_eq!(decoded.client_identity.as_deref(), Some("172.16.0.4"));
    }

    #[test]
    fn root_path_yields_no_identity() {
        let rewritten: Uri = "https://gw.example.com/".parse().unwrap();

        let decoded = EdgeUrlCodec::decode(&rewritten);
        assert_eq!(decoded.client_identity, None);
        assert_eq!(decoded.url, rewritten);
    }

    #[test]
    fn relative_urls_decode_without_panicking() {
        let rewritten: Uri = "/t/192.0.2.1?path=%2Fping".parse().unwrap();

        let decoded = EdgeUrlCodec::decode(&rewritten);
        assert_eq!(decoded.client_identity.as_deref(), Some("192.0.2.1"));
        assert_eq!(decoded.url.to_string(), "/ping");
    }
}
