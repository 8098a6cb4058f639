use http::{HeaderMap, HeaderValue, header};

use crate::codec::Algorithm;
use crate::future::RequestContext;

/// Appends the algorithm token to a strong `ETag`.
///
/// Two encodings of the same resource are different byte sequences, so a
/// strong validator must not collide across them: `"tag"` becomes
/// `"tag:gzip"`. A weak validator already tolerates byte-level differences
/// and is left alone, as is anything that is not a quoted tag.
pub(crate) fn rewrite_etag(headers: &mut HeaderMap, algorithm: Algorithm) {
    let Some(tag) = headers.get(header::ETAG).and_then(|v| v.to_str().ok()) else {
        return;
    };
    if tag.starts_with("W/") {
        return;
    }
    let Some(opaque) = tag.strip_prefix('"').and_then(|t| t.strip_suffix('"')) else {
        return;
    };
    let rewritten = format!("\"{}:{}\"", opaque, algorithm.token());
    if let Ok(value) = HeaderValue::from_str(&rewritten) {
        headers.insert(header::ETAG, value);
    }
}

/// Evaluates the request's validators against the finished response headers.
///
/// `If-None-Match` takes precedence over `If-Modified-Since` when both are
/// present (RFC 9110 §13.1.3).
pub(crate) fn is_not_modified(context: &RequestContext, headers: &HeaderMap) -> bool {
    if let Some(if_none_match) = context.if_none_match.as_ref().and_then(|v| v.to_str().ok()) {
        let Some(etag) = headers.get(header::ETAG).and_then(|v| v.to_str().ok()) else {
            return false;
        };
        return etag_matches(if_none_match, etag);
    }

    if let Some(since) = context
        .if_modified_since
        .as_ref()
        .and_then(|v| v.to_str().ok())
    {
        let modified = headers
            .get(header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| httpdate::parse_http_date(v).ok());
        if let (Some(modified), Ok(since)) = (modified, httpdate::parse_http_date(since)) {
            return modified <= since;
        }
    }

    false
}

/// Weak comparison of an `If-None-Match` list against one entity tag.
fn etag_matches(if_none_match: &str, etag: &str) -> bool {
    let target = opaque_tag(etag);
    if_none_match.split(',').any(|candidate| {
        let candidate = candidate.trim();
        candidate == "*" || opaque_tag(candidate) == target
    })
}

fn opaque_tag(tag: &str) -> &str {
    tag.trim().strip_prefix("W/").unwrap_or(tag).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    fn context(
        if_none_match: Option<&'static str>,
        if_modified_since: Option<&'static str>,
    ) -> RequestContext {
        RequestContext {
            accept_encoding: String::new(),
            method: Method::GET,
            if_none_match: if_none_match.map(HeaderValue::from_static),
            if_modified_since: if_modified_since.map(HeaderValue::from_static),
            cache_key: None,
        }
    }

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(*name, HeaderValue::from_static(value));
        }
        headers
    }

    #[test]
    fn test_rewrite_strong_etag() {
        let mut headers = headers(&[("etag", "\"123456789\"")]);
        rewrite_etag(&mut headers, Algorithm::Gzip);
        assert_eq!(headers.get(header::ETAG).unwrap(), "\"123456789:gzip\"");
    }

    #[test]
    fn test_weak_etag_untouched() {
        let mut headers = headers(&[("etag", "W/\"123456789\"")]);
        rewrite_etag(&mut headers, Algorithm::Gzip);
        assert_eq!(headers.get(header::ETAG).unwrap(), "W/\"123456789\"");
    }

    #[test]
    fn test_unquoted_etag_untouched() {
        let mut headers = headers(&[("etag", "123456789")]);
        rewrite_etag(&mut headers, Algorithm::Brotli);
        assert_eq!(headers.get(header::ETAG).unwrap(), "123456789");
    }

    #[test]
    fn test_missing_etag_untouched() {
        let mut headers = HeaderMap::new();
        rewrite_etag(&mut headers, Algorithm::Zstd);
        assert!(headers.get(header::ETAG).is_none());
    }

    #[test]
    fn test_if_none_match_exact() {
        let headers = headers(&[("etag", "\"abc:gzip\"")]);
        assert!(is_not_modified(&context(Some("\"abc:gzip\""), None), &headers));
        assert!(!is_not_modified(&context(Some("\"abc:br\""), None), &headers));
    }

    #[test]
    fn test_if_none_match_list() {
        let headers = headers(&[("etag", "\"abc:gzip\"")]);
        let ctx = context(Some("\"xyz\", \"abc:gzip\""), None);
        assert!(is_not_modified(&ctx, &headers));
    }

    #[test]
    fn test_if_none_match_star() {
        let headers = headers(&[("etag", "\"anything\"")]);
        assert!(is_not_modified(&context(Some("*"), None), &headers));
    }

    #[test]
    fn test_if_none_match_weak_comparison() {
        let headers = headers(&[("etag", "\"abc\"")]);
        assert!(is_not_modified(&context(Some("W/\"abc\""), None), &headers));
    }

    #[test]
    fn test_if_none_match_without_etag() {
        let headers = HeaderMap::new();
        assert!(!is_not_modified(&context(Some("\"abc\""), None), &headers));
    }

    #[test]
    fn test_if_modified_since() {
        let headers = headers(&[("last-modified", "Sat, 01 Jan 2022 00:00:00 GMT")]);

        // Not modified since a later or equal date.
        let ctx = context(None, Some("Sat, 01 Jan 2022 00:00:00 GMT"));
        assert!(is_not_modified(&ctx, &headers));
        let ctx = context(None, Some("Sun, 02 Jan 2022 00:00:00 GMT"));
        assert!(is_not_modified(&ctx, &headers));

        // Modified after the client's snapshot.
        let ctx = context(None, Some("Fri, 31 Dec 2021 00:00:00 GMT"));
        assert!(!is_not_modified(&ctx, &headers));
    }

    #[test]
    fn test_if_none_match_takes_precedence() {
        let headers = headers(&[
            ("etag", "\"abc\""),
            ("last-modified", "Sat, 01 Jan 2022 00:00:00 GMT"),
        ]);
        // The etag mismatch decides even though the date would match.
        let ctx = context(
            Some("\"other\""),
            Some("Sun, 02 Jan 2022 00:00:00 GMT"),
        );
        assert!(!is_not_modified(&ctx, &headers));
    }

    #[test]
    fn test_no_validators() {
        let headers = headers(&[("etag", "\"abc\"")]);
        assert!(!is_not_modified(&context(None, None), &headers));
    }
}
