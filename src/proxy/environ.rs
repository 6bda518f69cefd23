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

// knitmesh - request environment and cache-key template substitution (C5)
//
// Stands in for the original's WSGI `environ` dict: a flat view of the
// downstream request that cache-key templates and header rewriting read
// from. `%(NAME)s` substitution mirrors Python's `"%(NAME)s" % environ`.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

/// A downstream HTTP request, reduced to the fields the proxy pipeline
/// needs. Header names are expected already lower-cased (as both `hyper`
/// and `reqwest` hand them back); casing is restored on the way out by
/// `headers::rewrite_headers`.
#[derive(Debug, Clone)]
pub struct RequestEnvironment {
    pub method: String,
    pub path: String,
    pub query: String,
    pub scheme: String,
    pub headers: Vec<(String, String)>,
}

impl RequestEnvironment {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn cookie(&self) -> &str {
        self.header("cookie").unwrap_or("")
    }

    /// Build the `%(NAME)s`-keyed lookup table a cache-key template
    /// substitutes against: `REQUEST_METHOD`, `PATH_INFO`, `QUERY_STRING`,
    /// and `HTTP_<HEADER>` for every incoming header (WSGI's `environ`
    /// shape, without actually wiring up WSGI).
    fn template_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();

        for (name, value) in &self.headers {
            let key = format!("HTTP_{}", name.to_uppercase().replace('-', "_"));
            map.insert(key, value.clone());
        }

        map.entry("HTTP_COOKIE".to_string())
            .or_insert_with(String::new);

        map.insert("REQUEST_METHOD".to_string(), self.method.clone());
        map.insert("PATH_INFO".to_string(), self.path.clone());
        map.insert("QUERY_STRING".to_string(), self.query.clone());

        map
    }
}

static TEMPLATE_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"%\(([A-Za-z0-9_]+)\)s").expect("static regex is valid"));

/// Substitute every `%(NAME)s` token in `template` with the environment's
/// value for `NAME`, or the empty string if absent.
pub fn substitute(template: &str, env: &RequestEnvironment) -> String {
    let map = env.template_map();

    TEMPLATE_TOKEN
        .replace_all(template, |caps: &regex::Captures| {
            map.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> RequestEnvironment {
        RequestEnvironment {
            method: "GET".to_string(),
            path: "/widgets".to_string(),
            query: "id=1".to_string(),
            scheme: "http".to_string(),
            headers: vec![("cookie".to_string(), "session=abc".to_string())],
        }
    }

    #[test]
    fn default_rule_template_substitutes_all_fields() {
        let rendered = substitute(
            "%(REQUEST_METHOD)s %(PATH_INFO)s?%(QUERY_STRING)s %(HTTP_COOKIE)s",
            &env(),
        );
        assert_eq!(rendered, "GET /widgets?id=1 session=abc");
    }

    #[test]
    fn missing_header_substitutes_empty_string() {
        let mut e = env();
        e.headers.clear();
        let rendered = substitute("%(HTTP_COOKIE)s|%(HTTP_X_MISSING)s", &e);
        assert_eq!(rendered, "|");
    }
}
