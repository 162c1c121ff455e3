use std::time::{Duration, SystemTime};

use http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};

use super::cache_control::parse_cache_control;

/// Headers a 304 must not overwrite on the stored entry.
const NOT_REFRESHED: [http::HeaderName; 3] = [
    http::header::CONTENT_LENGTH,
    http::header::TRANSFER_ENCODING,
    http::header::CONTENT_ENCODING,
];

/// Metadata persisted next to each cached body. Times are unix seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub url: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub stored_at: u64,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    #[serde(default)]
    pub vary: Vec<String>,
    /// Forced lifetime configured on the client, if any.
    pub ttl: Option<u64>,
    pub max_age: Option<u64>,
    pub s_maxage: Option<u64>,
    pub expires: Option<u64>,
    #[serde(default)]
    pub must_revalidate: bool,
    #[serde(default)]
    pub no_cache: bool,
    pub content_length: u64,
    pub content_hash: String,
}

impl CacheEntry {
    /// Body fields stay empty until the writer commits.
    pub fn from_response(
        url: &str,
        status: StatusCode,
        headers: &HeaderMap,
        vary: Vec<String>,
        forced_ttl: Option<Duration>,
        stored_at: SystemTime,
    ) -> Self {
        let mut entry = Self {
            url: url.to_string(),
            status: status.as_u16(),
            headers: headermap_to_vec(headers),
            stored_at: unix_secs(stored_at),
            etag: None,
            last_modified: None,
            vary,
            ttl: forced_ttl.map(|ttl| ttl.as_secs()),
            max_age: None,
            s_maxage: None,
            expires: None,
            must_revalidate: false,
            no_cache: false,
            content_length: 0,
            content_hash: String::new(),
        };
        entry.apply_directives(headers);
        entry
    }

    fn apply_directives(&mut self, headers: &HeaderMap) {
        let header = |name: http::HeaderName| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        };
        let cc = parse_cache_control(headers);
        self.etag = header(http::header::ETAG);
        self.last_modified = header(http::header::LAST_MODIFIED);
        self.max_age = cc.max_age.map(|age| age.as_secs());
        self.s_maxage = cc.s_maxage.map(|age| age.as_secs());
        self.must_revalidate = cc.must_revalidate;
        self.no_cache = cc.no_cache;
        self.expires = header(http::header::EXPIRES)
            .and_then(|value| httpdate::parse_http_date(&value).ok())
            .map(unix_secs);
    }

    pub fn header_map(&self) -> HeaderMap {
        to_headermap(&self.headers)
    }

    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK)
    }

    pub fn stored_at_time(&self) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(self.stored_at)
    }

    /// Entry after a successful revalidation: headers carried by the 304
    /// replace stored ones, directives are re-derived and the age restarts.
    pub fn refreshed(&self, not_modified: &HeaderMap, now: SystemTime) -> Self {
        let mut headers = self.header_map();
        for name in not_modified.keys() {
            if NOT_REFRESHED.contains(name) {
                continue;
            }
            headers.remove(name);
            for value in not_modified.get_all(name) {
                headers.append(name.clone(), value.clone());
            }
        }

        let mut entry = self.clone();
        entry.headers = headermap_to_vec(&headers);
        entry.stored_at = unix_secs(now);
        entry.apply_directives(&headers);
        entry
    }
}

fn unix_secs(time: SystemTime) -> u64 {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn to_headermap(items: &[(String, String)]) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in items {
        if let (Ok(name), Ok(value)) = (
            http::header::HeaderName::try_from(name.as_str()),
            http::HeaderValue::from_str(value),
        ) {
            map.append(name, value);
        }
    }
    map
}

fn headermap_to_vec(map: &HeaderMap) -> Vec<(String, String)> {
    let mut items = Vec::new();
    for (name, value) in map.iter() {
        if let Ok(value_str) = value.to_str() {
            items.push((name.as_str().to_string(), value_str.to_string()));
        }
    }
    items
}
