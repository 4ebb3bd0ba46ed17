//! `Cache-Control` response directive parsing.
//!
//! Only the directives that influence a shared cache's store decision are
//! kept. Unknown tokens and malformed values are dropped silently so a bad
//! header never fails the request.

use axum::http::header::CACHE_CONTROL;
use axum::http::HeaderMap;

/// Directives relevant to a shared cache, parsed from `Cache-Control`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectiveSet {
    /// `max-age` in seconds.
    pub max_age: Option<u64>,
    /// `s-maxage` in seconds; overrides `max_age` for shared caches.
    pub s_maxage: Option<u64>,
    pub no_store: bool,
    pub no_cache: bool,
    pub private: bool,
}

impl DirectiveSet {
    /// Parse a single header value.
    ///
    /// Directives may be separated by commas, whitespace, or both
    /// (`max-age=0 s-maxage=10` and `max-age=0, s-maxage=10` are equivalent).
    /// The first valid occurrence of a numeric directive wins.
    pub fn parse(value: &str) -> Self {
        let mut set = Self::default();
        set.merge(value);
        set
    }

    /// Parse every `Cache-Control` line in `headers`.
    ///
    /// Returns `None` when the header is absent. Lines that are not valid
    /// visible ASCII are skipped.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let mut values = headers.get_all(CACHE_CONTROL).iter().peekable();
        values.peek()?;
        let mut set = Self::default();
        for value in values {
            if let Ok(text) = value.to_str() {
                set.merge(text);
            }
        }
        Some(set)
    }

    /// True when a freshness lifetime (`max-age` or `s-maxage`) was found.
    pub fn has_freshness(&self) -> bool {
        self.max_age.is_some() || self.s_maxage.is_some()
    }

    /// True when a directive forbids shared storage outright.
    pub fn forbids_storage(&self) -> bool {
        self.no_store || self.no_cache || self.private
    }

    fn merge(&mut self, value: &str) {
        for token in value
            .split(|c: char| c == ',' || c.is_ascii_whitespace())
            .filter(|t| !t.is_empty())
        {
            let (name, arg) = match token.split_once('=') {
                Some((name, arg)) => (name, Some(arg)),
                None => (token, None),
            };
            match name.to_ascii_lowercase().as_str() {
                "max-age" => {
                    if self.max_age.is_none() {
                        self.max_age = arg.and_then(parse_seconds);
                    }
                }
                "s-maxage" => {
                    if self.s_maxage.is_none() {
                        self.s_maxage = arg.and_then(parse_seconds);
                    }
                }
                // no-cache / private may carry a field list; a shared cache
                // treats both forms as "do not store".
                "no-store" => self.no_store = true,
                "no-cache" => self.no_cache = true,
                "private" => self.private = true,
                _ => {}
            }
        }
    }
}

/// Parse a delta-seconds value, tolerating surrounding double quotes.
fn parse_seconds(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    let raw = raw
        .strip_prefix('"')
        .and_then(|r| r.strip_suffix('"'))
        .unwrap_or(raw);
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    // Oversized values saturate rather than being rejected.
    Some(raw.parse().unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_parse_max_age() {
        let set = DirectiveSet::parse("max-age=10");
        assert_eq!(set.max_age, Some(10));
        assert_eq!(set.s_maxage, None);
        assert!(set.has_freshness());
    }

    #[test]
    fn test_parse_space_separated() {
        let set = DirectiveSet::parse("max-age=0 s-maxage=10");
        assert_eq!(set.max_age, Some(0));
        assert_eq!(set.s_maxage, Some(10));
    }

    #[test]
    fn test_parse_comma_separated_mixed_case() {
        let set = DirectiveSet::parse("Public, MAX-AGE=300,  S-MaxAge=600");
        assert_eq!(set.max_age, Some(300));
        assert_eq!(set.s_maxage, Some(600));
        assert!(!set.forbids_storage());
    }

    #[test]
    fn test_parse_quoted_value() {
        let set = DirectiveSet::parse(r#"max-age="60""#);
        assert_eq!(set.max_age, Some(60));
    }

    #[test]
    fn test_malformed_values_ignored() {
        let set = DirectiveSet::parse("max-age=abc, s-maxage=-1, max-age=");
        assert_eq!(set.max_age, None);
        assert_eq!(set.s_maxage, None);
        assert!(!set.has_freshness());
    }

    #[test]
    fn test_first_valid_occurrence_wins() {
        let set = DirectiveSet::parse("max-age=bogus, max-age=5, max-age=9");
        assert_eq!(set.max_age, Some(5));
    }

    #[test]
    fn test_oversized_value_saturates() {
        let set = DirectiveSet::parse("max-age=99999999999999999999999");
        assert_eq!(set.max_age, Some(u64::MAX));
    }

    #[test]
    fn test_storage_flags() {
        assert!(DirectiveSet::parse("no-store").forbids_storage());
        assert!(DirectiveSet::parse("no-cache=\"set-cookie\"").forbids_storage());
        assert!(DirectiveSet::parse("private, max-age=300").forbids_storage());
    }

    #[test]
    fn test_from_headers_absent() {
        let headers = HeaderMap::new();
        assert_eq!(DirectiveSet::from_headers(&headers), None);
    }

    #[test]
    fn test_from_headers_merges_lines() {
        let mut headers = HeaderMap::new();
        headers.append(CACHE_CONTROL, HeaderValue::from_static("max-age=10"));
        headers.append(CACHE_CONTROL, HeaderValue::from_static("s-maxage=0"));
        let set = DirectiveSet::from_headers(&headers).unwrap();
        assert_eq!(set.max_age, Some(10));
        assert_eq!(set.s_maxage, Some(0));
    }

    #[test]
    fn test_from_headers_unknown_only() {
        let mut headers = HeaderMap::new();
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("public"));
        let set = DirectiveSet::from_headers(&headers).unwrap();
        assert!(!set.has_freshness());
        assert!(!set.forbids_storage());
    }
}
