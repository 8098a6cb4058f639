use moka::sync::Cache;

use crate::codec::Algorithm;

/// Bounded capacity of the negotiation memo.
const MEMO_CAPACITY: u64 = 128;

/// A memoized `Accept-Encoding` negotiator.
///
/// Negotiation is deterministic in `(enabled algorithms, header)`, so results
/// are kept in a bounded concurrent cache. Clones share the same memo; the
/// layer creates one and every service cloned from it reuses it.
#[derive(Clone)]
pub(crate) struct NegotiationCache {
    memo: Cache<(Vec<Algorithm>, String), Option<Algorithm>>,
}

impl NegotiationCache {
    pub(crate) fn new() -> Self {
        Self {
            memo: Cache::new(MEMO_CAPACITY),
        }
    }

    /// Negotiates an algorithm for the given enabled sequence and raw
    /// `Accept-Encoding` header, consulting the memo first.
    pub(crate) fn choose(&self, enabled: &[Algorithm], accept_encoding: &str) -> Option<Algorithm> {
        let key = (enabled.to_vec(), accept_encoding.to_ascii_lowercase());
        if let Some(memoized) = self.memo.get(&key) {
            return memoized;
        }
        let result = negotiate(&key.0, &key.1);
        self.memo.insert(key, result);
        result
    }
}

/// Client encoding preferences extracted from one `Accept-Encoding` header.
///
/// Entries pair a quality factor with a candidate, where `None` stands for
/// the `identity` token (an explicit request for no compression). Tokens the
/// server does not enable never become candidates.
struct Preferences {
    entries: Vec<(f32, Option<Algorithm>)>,
    /// Whether `*` was requested with a quality above zero.
    wildcard: bool,
}

fn parse_accept_encoding(enabled: &[Algorithm], accept_encoding: &str) -> Preferences {
    let mut entries = Vec::new();
    let mut wildcard = false;

    for part in accept_encoding.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (token, quality) = parse_quality(part);

        if token == "*" {
            if quality > 0.0 {
                wildcard = true;
            }
        } else if token == "identity" {
            entries.push((quality, None));
        } else if let Some(algorithm) = Algorithm::from_token(token) {
            if enabled.contains(&algorithm) {
                entries.push((quality, Some(algorithm)));
            }
        }
    }

    Preferences { entries, wildcard }
}

/// Splits one header entry into its token and quality factor.
///
/// A missing `;q=` suffix, and a suffix whose float fails to parse, both mean
/// the token is fully accepted (quality 1.0).
fn parse_quality(part: &str) -> (&str, f32) {
    let mut pieces = part.splitn(2, ';');
    let token = pieces.next().unwrap_or("").trim();
    let quality = pieces
        .next()
        .and_then(|attribute| {
            attribute
                .trim()
                .strip_prefix("q=")
                .map(|value| value.trim().parse().unwrap_or(1.0))
        })
        .unwrap_or(1.0);
    (token, quality)
}

/// Picks a compression algorithm for the client, or `None` when the client
/// and server do not agree on one.
///
/// Quality levels are visited from highest to lowest. A level with a single
/// candidate decides immediately (possibly deciding *against* compression
/// when that candidate is `identity`); ties go to the algorithm listed first
/// in the server's `enabled` sequence. A wildcard with positive quality
/// falls back to the server's first choice.
pub(crate) fn negotiate(enabled: &[Algorithm], accept_encoding: &str) -> Option<Algorithm> {
    let accept_encoding = accept_encoding.to_ascii_lowercase();
    let preferences = parse_accept_encoding(enabled, &accept_encoding);

    let mut levels: Vec<f32> = preferences.entries.iter().map(|(quality, _)| *quality).collect();
    levels.sort_by(|a, b| b.total_cmp(a));
    levels.dedup();

    for level in levels {
        let mut candidates: Vec<Option<Algorithm>> = preferences
            .entries
            .iter()
            .filter(|(quality, _)| *quality == level)
            .map(|(_, candidate)| *candidate)
            .collect();
        candidates.sort();
        candidates.dedup();

        if let [only] = candidates.as_slice() {
            return *only;
        }
        for algorithm in enabled {
            if candidates.contains(&Some(*algorithm)) {
                return Some(*algorithm);
            }
        }
    }

    if preferences.wildcard {
        return enabled.first().copied();
    }
    None
}
