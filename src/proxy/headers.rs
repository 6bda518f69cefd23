// knitmesh - mesh-replicated caching HTTP reverse proxy
// Copyright (C) 2026  knitmesh contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

// knitmesh - header rewriting and Cache-Control TTL parsing (part of C5)

/// The standard hop-by-hop set (RFC 7230 §6.1), stripped from both
/// forwarded requests and returned responses.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// `content-type` -> `Content-Type`. Headers arrive from both `hyper`
/// (lowercase) and `reqwest` (lowercase) already split on hyphens, so this
/// only needs to capitalize each segment — the original's `HTTP_CONTENT_TYPE
/// -> Content-Type` transform collapses to the same title-casing once the
/// WSGI `HTTP_` prefix and underscore-for-hyphen encoding are gone.
pub fn title_case_header(name: &str) -> String {
    name.split('-')
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// Drop hop-by-hop headers and title-case the remainder. Used identically
/// for outbound request headers and returned response headers (the original
/// shares `is_hop_by_hop` between `__assembleRequestHeaders` and
/// `__assembleResponseHeaders`).
pub fn rewrite_headers(headers: &[(String, String)]) -> Vec<(String, String)> {
    headers
        .iter()
        .filter(|(name, _)| !is_hop_by_hop(name))
        .map(|(name, value)| (title_case_header(name), value.clone()))
        .collect()
}

const PREVENT_CACHING: &[&str] = &[
    "private",
    "no-cache",
    "no-store",
    "must-revalidate",
    "proxy-revalidate",
];

/// TTL in seconds derived from a `Cache-Control` header value, or `-1` if
/// the response must not be cached. Mirrors
/// `HTTPProxyServer.__calculateCacheTimeout` directive-for-directive,
/// including its documented looseness: any `name=number` directive (not
/// just `max-age`) can set the TTL, and the *last* one wins.
pub fn cache_control_ttl(value: Option<&str>) -> i64 {
    let value = match value {
        Some(v) => v,
        None => return -1,
    };

    let directives: Vec<&str> = value.split(',').map(|d| d.trim()).collect();

    if !directives.iter().any(|d| d.eq_ignore_ascii_case("public")) {
        return -1;
    }

    let mut max_age: i64 = -1;

    for directive in &directives {
        if PREVENT_CACHING
            .iter()
            .any(|p| directive.eq_ignore_ascii_case(p))
        {
            return -1;
        }

        if let Some((_, number)) = directive.split_once('=') {
            match number.trim().parse::<i64>() {
                Ok(n) => max_age = n,
                Err(_) => return -1,
            }
        }
    }

    max_age
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hop_by_hop_headers_are_dropped() {
        let headers = vec![
            ("connection".to_string(), "close".to_string()),
            ("content-type".to_string(), "text/plain".to_string()),
        ];

        let rewritten = rewrite_headers(&headers);
        assert_eq!(rewritten, vec![("Content-Type".to_string(), "text/plain".to_string())]);
    }

    #[test]
    fn title_case_handles_multi_segment_names() {
        assert_eq!(title_case_header("content-type"), "Content-Type");
        assert_eq!(title_case_header("x-request-id"), "X-Request-Id");
        assert_eq!(title_case_header("etag"), "Etag");
    }

    #[test]
    fn missing_public_prevents_caching() {
        assert_eq!(cache_control_ttl(Some("max-age=60")), -1);
        assert_eq!(cache_control_ttl(None), -1);
    }

    #[test]
    fn public_with_max_age_is_cacheable() {
        assert_eq!(cache_control_ttl(Some("public, max-age=60")), 60);
    }

    #[test]
    fn prevent_caching_directives_force_negative_one() {
        assert_eq!(cache_control_ttl(Some("public, private, max-age=60")), -1);
        assert_eq!(cache_control_ttl(Some("public, no-store")), -1);
    }

    #[test]
    fn last_name_equals_number_directive_wins() {
        assert_eq!(cache_control_ttl(Some("public, max-age=60, s-maxage=120")), 120);
    }

    #[test]
    fn malformed_number_forces_negative_one() {
        assert_eq!(cache_control_ttl(Some("public, max-age=soon")), -1);
    }
}
