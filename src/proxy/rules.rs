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

// knitmesh - cache method/rule configuration surface (C6, installed on C5)

use regex::Regex;

use crate::error::KnitResult;

use super::environ::{substitute, RequestEnvironment};

/// A compiled `(pattern, key-template)` rule, tried in order against the
/// assembled backend URL; the first match produces the cache key.
pub struct CacheRule {
    pattern: Regex,
    template: String,
}

impl CacheRule {
    fn compile(pattern: &str, template: &str) -> KnitResult<Self> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            template: template.to_string(),
        })
    }

    /// Python's `re.match` (what the original's `__generateCacheKey` calls)
    /// only succeeds if the pattern matches starting at position 0;
    /// `Regex::is_match` searches anywhere in the string. Anchor the search
    /// manually so an unanchored `cache.rules` pattern keeps the original's
    /// semantics instead of matching arbitrary substrings.
    fn matches_from_start(&self, url: &str) -> bool {
        self.pattern.find(url).map_or(false, |m| m.start() == 0)
    }
}

pub fn default_methods() -> Vec<String> {
    vec!["GET".to_string(), "HEAD".to_string()]
}

pub fn default_rules() -> KnitResult<Vec<CacheRule>> {
    compile_rules(&[(
        ".*".to_string(),
        "%(REQUEST_METHOD)s %(PATH_INFO)s?%(QUERY_STRING)s %(HTTP_COOKIE)s".to_string(),
    )])
}

/// Compile `(pattern, template)` pairs eagerly, matching
/// `setCacheRules`'s `re.compile` at install time. A bad regex is a
/// configuration error, not a per-request one.
pub fn compile_rules(rules: &[(String, String)]) -> KnitResult<Vec<CacheRule>> {
    rules
        .iter()
        .map(|(pattern, template)| CacheRule::compile(pattern, template))
        .collect()
}

/// First-match cache key derivation against `rules`, `None` if nothing
/// matches `backend_url`. A rule matches only if its pattern matches
/// starting at position 0 of `backend_url` (mirroring `re.match`, not an
/// unanchored search) — an unanchored `cache.rules` pattern is expected to
/// reject a URL it merely contains as a substring.
pub fn derive_key(rules: &[CacheRule], env: &RequestEnvironment, backend_url: &str) -> Option<String> {
    rules
        .iter()
        .find(|rule| rule.matches_from_start(backend_url))
        .map(|rule| substitute(&rule.template, env))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn env(method: &str) -> RequestEnvironment {
        RequestEnvironment {
            method: method.to_string(),
            path: "/widgets".to_string(),
            query: String::new(),
            scheme: "http".to_string(),
            headers: vec![],
        }
    }

    #[test]
    fn default_rule_matches_everything() {
        let rules = default_rules().unwrap();
        let key = derive_key(&rules, &env("GET"), "http://backend/widgets").unwrap();
        assert_eq!(key, "GET /widgets? ");
    }

    #[test]
    fn no_rule_matches_yields_no_key() {
        let rules = compile_rules(&[("^/special$".to_string(), "k".to_string())]).unwrap();
        assert!(derive_key(&rules, &env("GET"), "http://backend/widgets").is_none());
    }

    #[test]
    fn invalid_pattern_is_rejected_at_install_time() {
        let result = compile_rules(&[("(".to_string(), "k".to_string())]);
        assert!(matches!(result, Err(Error::Regex(_))));
    }

    #[test]
    fn unanchored_pattern_does_not_match_a_later_substring() {
        // "backend" occurs inside the URL but not at position 0 — a
        // `re.match`-style rule must reject it even though `is_match` (an
        // unanchored search) would accept it.
        let rules = compile_rules(&[("backend".to_string(), "k".to_string())]).unwrap();
        assert!(derive_key(&rules, &env("GET"), "http://backend/widgets").is_none());
    }

    #[test]
    fn unanchored_pattern_matches_when_present_at_the_start() {
        let rules = compile_rules(&[("http".to_string(), "k".to_string())]).unwrap();
        assert!(derive_key(&rules, &env("GET"), "http://backend/widgets").is_some());
    }
}
