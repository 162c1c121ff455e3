use http::HeaderMap;

use crate::util::sha1_hex;

pub const MAX_VARY_HEADERS: usize = 32;

/// Hash shared by every stored variant of one URL.
pub fn url_hash(url: &str) -> String {
    sha1_hex(url)
}

/// Lowercased, de-duplicated, sorted header names from a response's `Vary`.
/// `None` when the response varies on `*` or names too many headers.
pub fn vary_header_names(headers: &HeaderMap) -> Option<Vec<String>> {
    let mut names = Vec::new();
    for value in headers.get_all(http::header::VARY) {
        let value = value.to_str().ok()?;
        for token in value.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            if token == "*" {
                return None;
            }
            names.push(token.to_ascii_lowercase());
        }
    }
    names.sort();
    names.dedup();
    if names.len() > MAX_VARY_HEADERS {
        return None;
    }
    Some(names)
}

/// Digest of the URL and the request's values for the varying headers.
pub fn vary_key(url: &str, vary_names: &[String], request_headers: &HeaderMap) -> String {
    let mut material = String::from(url);
    for name in vary_names {
        material.push('|');
        material.push_str(name);
        material.push(':');
        let values: Vec<&str> = request_headers
            .get_all(name.as_str())
            .iter()
            .filter_map(|value| value.to_str().ok())
            .map(str::trim)
            .collect();
        material.push_str(&values.join(","));
    }
    sha1_hex(material)
}

/// File stem of an entry: `{url_hash}_{vary_key}`.
pub fn cache_key(url: &str, vary_names: &[String], request_headers: &HeaderMap) -> String {
    format!(
        "{}_{}",
        url_hash(url),
        vary_key(url, vary_names, request_headers)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    const URL: &str = "http://example.test/page";

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn vary_names_are_normalized() {
        let names = vary_header_names(&headers(&[
            ("vary", "Accept-Language, accept-encoding"),
            ("vary", "ACCEPT-LANGUAGE"),
        ]));
        assert_eq!(
            names,
            Some(vec![
                "accept-encoding".to_string(),
                "accept-language".to_string()
            ])
        );
        assert_eq!(vary_header_names(&HeaderMap::new()), Some(Vec::new()));
    }

    #[test]
    fn vary_star_is_uncacheable() {
        assert_eq!(vary_header_names(&headers(&[("vary", "accept, *")])), None);
    }

    #[test]
    fn key_distinguishes_varied_values() {
        let names = vec!["accept-language".to_string()];
        let en = cache_key(URL, &names, &headers(&[("accept-language", "en")]));
        let de = cache_key(URL, &names, &headers(&[("accept-language", "de")]));
        let en_again = cache_key(
            URL,
            &names,
            &headers(&[("accept-language", "en"), ("user-agent", "x")]),
        );
        assert_ne!(en, de);
        assert_eq!(en, en_again);
        assert!(en.starts_with(&format!("{}_", url_hash(URL))));
    }

    #[test]
    fn unvaried_key_ignores_request_headers() {
        let plain = cache_key(URL, &[], &HeaderMap::new());
        let with_headers = cache_key(URL, &[], &headers(&[("accept-language", "en")]));
        assert_eq!(plain, with_headers);
        assert_eq!(plain.len(), 40 + 1 + 40);
    }
}
