use std::time::{Duration, SystemTime};

use http::{HeaderMap, Method, StatusCode};

use super::CacheEntry;

#[derive(Debug, Clone, Default)]
pub struct CacheControl {
    pub public: bool,
    pub private: bool,
    pub no_cache: bool,
    pub no_store: bool,
    pub max_age: Option<Duration>,
    pub s_maxage: Option<Duration>,
    pub must_revalidate: bool,
}

pub fn parse_cache_control(headers: &HeaderMap) -> CacheControl {
    let mut cc = CacheControl::default();

    for value in headers.get_all(http::header::CACHE_CONTROL) {
        if let Ok(s) = value.to_str() {
            for part in s.split(',') {
                let part = part.trim();
                let lower = part.to_ascii_lowercase();
                if lower == "public" {
                    cc.public = true;
                } else if lower == "private" {
                    cc.private = true;
                } else if lower == "no-cache" || lower.starts_with("no-cache=") {
                    cc.no_cache = true;
                } else if lower == "no-store" {
                    cc.no_store = true;
                } else if lower == "must-revalidate" || lower == "proxy-revalidate" {
                    cc.must_revalidate = true;
                } else if let Some(stripped) = lower.strip_prefix("max-age=") {
                    if let Some(secs) = parse_delta_seconds(stripped) {
                        cc.max_age = Some(Duration::from_secs(secs));
                    }
                } else if let Some(stripped) = lower.strip_prefix("s-maxage=")
                    && let Some(secs) = parse_delta_seconds(stripped)
                {
                    cc.s_maxage = Some(Duration::from_secs(secs));
                }
            }
        }
    }
    cc
}

fn parse_delta_seconds(value: &str) -> Option<u64> {
    value.trim().trim_matches('"').parse().ok()
}

/// Which rule established an entry's freshness lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreshnessRule {
    Expires,
    ForcedTtl,
    SMaxAge,
    MaxAge,
    /// 10% of the time between Last-Modified and storage.
    Heuristic,
}

/// First applicable rule wins. `must-revalidate` only rules out the heuristic.
pub fn freshness_lifetime(entry: &CacheEntry) -> Option<(FreshnessRule, Duration)> {
    if let Some(expires) = entry.expires {
        let lifetime = expires.saturating_sub(entry.stored_at);
        return Some((FreshnessRule::Expires, Duration::from_secs(lifetime)));
    }
    if let Some(ttl) = entry.ttl {
        return Some((FreshnessRule::ForcedTtl, Duration::from_secs(ttl)));
    }
    if let Some(s_maxage) = entry.s_maxage {
        return Some((FreshnessRule::SMaxAge, Duration::from_secs(s_maxage)));
    }
    if let Some(max_age) = entry.max_age {
        return Some((FreshnessRule::MaxAge, Duration::from_secs(max_age)));
    }
    if entry.must_revalidate {
        return None;
    }
    let last_modified = entry
        .last_modified
        .as_deref()
        .and_then(|value| httpdate::parse_http_date(value).ok())?;
    let age_at_storage = entry
        .stored_at_time()
        .duration_since(last_modified)
        .unwrap_or_default();
    Some((FreshnessRule::Heuristic, age_at_storage / 10))
}

pub fn is_fresh(entry: &CacheEntry, now: SystemTime) -> bool {
    if entry.no_cache {
        return false;
    }
    let Some((_, lifetime)) = freshness_lifetime(entry) else {
        return false;
    };
    let age = now
        .duration_since(entry.stored_at_time())
        .unwrap_or_default();
    age < lifetime
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSkipReason {
    Method,
    Status,
    NoStore,
    VaryAll,
    SetCookie,
    NoFreshnessOrValidator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheWritePlan {
    Skip(CacheSkipReason),
    Store,
}

pub fn plan_cache_write(
    method: &Method,
    status: StatusCode,
    headers: &HeaderMap,
    forced_ttl: Option<Duration>,
    now: SystemTime,
) -> CacheWritePlan {
    if method != Method::GET {
        return CacheWritePlan::Skip(CacheSkipReason::Method);
    }
    if !(status.is_success() || status.is_redirection()) || status == StatusCode::NOT_MODIFIED {
        return CacheWritePlan::Skip(CacheSkipReason::Status);
    }

    let cc = parse_cache_control(headers);
    if cc.no_store {
        return CacheWritePlan::Skip(CacheSkipReason::NoStore);
    }
    if super::key::vary_header_names(headers).is_none() {
        return CacheWritePlan::Skip(CacheSkipReason::VaryAll);
    }
    if headers.contains_key(http::header::SET_COOKIE) {
        return CacheWritePlan::Skip(CacheSkipReason::SetCookie);
    }

    let positive = |age: Option<Duration>| age.is_some_and(|age| age > Duration::ZERO);
    let unexpired = headers
        .get(http::header::EXPIRES)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| httpdate::parse_http_date(value).ok())
        .is_some_and(|expires| expires > now);
    let has_validator = headers.contains_key(http::header::ETAG)
        || headers.contains_key(http::header::LAST_MODIFIED);

    if positive(cc.max_age)
        || positive(cc.s_maxage)
        || unexpired
        || has_validator
        || forced_ttl.is_some()
    {
        CacheWritePlan::Store
    } else {
        CacheWritePlan::Skip(CacheSkipReason::NoFreshnessOrValidator)
    }
}

/// How a request's own cache directives affect lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestCacheMode {
    Normal,
    /// `no-cache`: a stored entry may only be used after revalidation.
    Revalidate,
    /// `no-store`: neither read nor write the cache.
    Bypass,
}

pub fn request_cache_mode(headers: &HeaderMap) -> RequestCacheMode {
    let cc = parse_cache_control(headers);
    if cc.no_store {
        return RequestCacheMode::Bypass;
    }
    let pragma_no_cache = headers
        .get_all(http::header::PRAGMA)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|value| value.to_ascii_lowercase().contains("no-cache"));
    if cc.no_cache || pragma_no_cache {
        return RequestCacheMode::Revalidate;
    }
    RequestCacheMode::Normal
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    const T: u64 = 1_700_000_000;

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, HeaderValue::from_static(value));
        }
        map
    }

    fn entry(pairs: &[(&'static str, &'static str)]) -> CacheEntry {
        CacheEntry::from_response(
            "http://example.test/",
            StatusCode::OK,
            &headers(pairs),
            Vec::new(),
            None,
            at(T),
        )
    }

    #[test]
    fn parses_directives() {
        let cc = parse_cache_control(&headers(&[(
            "cache-control",
            "Public, max-age=3600, S-MaxAge=\"60\", must-revalidate",
        )]));
        assert!(cc.public);
        assert!(cc.must_revalidate);
        assert_eq!(cc.max_age, Some(Duration::from_secs(3600)));
        assert_eq!(cc.s_maxage, Some(Duration::from_secs(60)));
        assert!(!cc.private);
    }

    #[test]
    fn max_age_sixty_is_fresh_at_thirty_and_stale_at_ninety() {
        let entry = entry(&[("cache-control", "max-age=60")]);
        assert!(is_fresh(&entry, at(T + 30)));
        assert!(!is_fresh(&entry, at(T + 90)));
    }

    #[test]
    fn must_revalidate_without_expiry_is_never_fresh() {
        let entry = entry(&[
            ("cache-control", "must-revalidate"),
            ("last-modified", "Mon, 01 Jan 2001 00:00:00 GMT"),
        ]);
        assert_eq!(freshness_lifetime(&entry), None);
        assert!(!is_fresh(&entry, at(T)));
        assert!(!is_fresh(&entry, at(T + 1)));
    }

    #[test]
    fn must_revalidate_keeps_explicit_lifetimes() {
        let entry = entry(&[("cache-control", "must-revalidate, max-age=10")]);
        assert!(is_fresh(&entry, at(T + 5)));
        assert!(!is_fresh(&entry, at(T + 11)));
    }

    #[test]
    fn precedence_prefers_expires_then_s_maxage_then_max_age() {
        let expires = httpdate::fmt_http_date(at(T + 500));
        let mut map = headers(&[("cache-control", "max-age=5, s-maxage=50")]);
        map.insert(
            http::header::EXPIRES,
            HeaderValue::from_str(&expires).unwrap(),
        );
        let with_expires = CacheEntry::from_response(
            "http://example.test/",
            StatusCode::OK,
            &map,
            Vec::new(),
            None,
            at(T),
        );
        assert_eq!(
            freshness_lifetime(&with_expires),
            Some((FreshnessRule::Expires, Duration::from_secs(500)))
        );

        let shared = entry(&[("cache-control", "max-age=5, s-maxage=50")]);
        assert_eq!(
            freshness_lifetime(&shared),
            Some((FreshnessRule::SMaxAge, Duration::from_secs(50)))
        );
    }

    #[test]
    fn forced_ttl_outranks_origin_max_age() {
        let forced = CacheEntry::from_response(
            "http://example.test/",
            StatusCode::OK,
            &headers(&[("cache-control", "max-age=5")]),
            Vec::new(),
            Some(Duration::from_secs(300)),
            at(T),
        );
        assert_eq!(
            freshness_lifetime(&forced),
            Some((FreshnessRule::ForcedTtl, Duration::from_secs(300)))
        );
    }

    #[test]
    fn heuristic_is_a_tenth_of_last_modified_age() {
        let last_modified = httpdate::fmt_http_date(at(T - 1000));
        let mut map = HeaderMap::new();
        map.insert(
            http::header::LAST_MODIFIED,
            HeaderValue::from_str(&last_modified).unwrap(),
        );
        let entry = CacheEntry::from_response(
            "http://example.test/",
            StatusCode::OK,
            &map,
            Vec::new(),
            None,
            at(T),
        );
        assert_eq!(
            freshness_lifetime(&entry),
            Some((FreshnessRule::Heuristic, Duration::from_secs(100)))
        );
        assert!(is_fresh(&entry, at(T + 99)));
        assert!(!is_fresh(&entry, at(T + 100)));
    }

    #[test]
    fn no_cache_is_stored_but_never_fresh() {
        let map = headers(&[("cache-control", "no-cache, max-age=600")]);
        assert_eq!(
            plan_cache_write(&Method::GET, StatusCode::OK, &map, None, at(T)),
            CacheWritePlan::Store
        );
        let entry = entry(&[("cache-control", "no-cache, max-age=600")]);
        assert!(!is_fresh(&entry, at(T + 1)));
    }

    #[test]
    fn write_plan_rejections() {
        let fresh = headers(&[("cache-control", "max-age=60")]);
        let now = at(T);
        assert_eq!(
            plan_cache_write(&Method::POST, StatusCode::OK, &fresh, None, now),
            CacheWritePlan::Skip(CacheSkipReason::Method)
        );
        assert_eq!(
            plan_cache_write(&Method::GET, StatusCode::NOT_FOUND, &fresh, None, now),
            CacheWritePlan::Skip(CacheSkipReason::Status)
        );
        assert_eq!(
            plan_cache_write(&Method::GET, StatusCode::NOT_MODIFIED, &fresh, None, now),
            CacheWritePlan::Skip(CacheSkipReason::Status)
        );
        assert_eq!(
            plan_cache_write(
                &Method::GET,
                StatusCode::OK,
                &headers(&[("cache-control", "no-store, max-age=60")]),
                None,
                now
            ),
            CacheWritePlan::Skip(CacheSkipReason::NoStore)
        );
        assert_eq!(
            plan_cache_write(
                &Method::GET,
                StatusCode::OK,
                &headers(&[("cache-control", "max-age=60"), ("vary", "*")]),
                None,
                now
            ),
            CacheWritePlan::Skip(CacheSkipReason::VaryAll)
        );
        assert_eq!(
            plan_cache_write(
                &Method::GET,
                StatusCode::OK,
                &headers(&[("cache-control", "max-age=60"), ("set-cookie", "a=b")]),
                None,
                now
            ),
            CacheWritePlan::Skip(CacheSkipReason::SetCookie)
        );
        assert_eq!(
            plan_cache_write(
                &Method::GET,
                StatusCode::OK,
                &headers(&[("cache-control", "max-age=0")]),
                None,
                now
            ),
            CacheWritePlan::Skip(CacheSkipReason::NoFreshnessOrValidator)
        );
    }

    #[test]
    fn validators_and_redirects_are_storable() {
        let now = at(T);
        assert_eq!(
            plan_cache_write(
                &Method::GET,
                StatusCode::OK,
                &headers(&[("etag", "\"abc\"")]),
                None,
                now
            ),
            CacheWritePlan::Store
        );
        assert_eq!(
            plan_cache_write(
                &Method::GET,
                StatusCode::MOVED_PERMANENTLY,
                &headers(&[("cache-control", "max-age=60"), ("location", "/b")]),
                None,
                now
            ),
            CacheWritePlan::Store
        );
        assert_eq!(
            plan_cache_write(
                &Method::GET,
                StatusCode::OK,
                &HeaderMap::new(),
                Some(Duration::from_secs(30)),
                now
            ),
            CacheWritePlan::Store
        );
    }

    #[test]
    fn request_directives_select_mode() {
        assert_eq!(
            request_cache_mode(&HeaderMap::new()),
            RequestCacheMode::Normal
        );
        assert_eq!(
            request_cache_mode(&headers(&[("cache-control", "no-cache")])),
            RequestCacheMode::Revalidate
        );
        assert_eq!(
            request_cache_mode(&headers(&[("pragma", "no-cache")])),
            RequestCacheMode::Revalidate
        );
        assert_eq!(
            request_cache_mode(&headers(&[("cache-control", "no-store")])),
            RequestCacheMode::Bypass
        );
    }
}
