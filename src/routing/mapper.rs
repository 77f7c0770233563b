/*
Copyright 2025 The gatewaylb-controller Authors.

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

use gateway_api::apis::standard::httproutes::{
    HTTPRouteRulesMatches, HTTPRouteRulesMatchesHeadersType, HTTPRouteRulesMatchesMethod, HTTPRouteRulesMatchesPathType,
    HTTPRouteRulesMatchesQueryParamsType,
};

/// Builds the condition expression for one routing rule out of an
/// `HTTPRouteRule`'s `matches`. Matches within one rule are ANDed; a rule
/// with no matches at all matches everything (an unconditional forward).
pub fn map_matches(matches: &[HTTPRouteRulesMatches]) -> String {
    if matches.is_empty() {
        return "any(true)".to_string();
    }
    // Per the Gateway API, multiple match sets within one rule are OR'd;
    // within one match set every field present is AND'd.
    let clauses: Vec<String> = matches.iter().map(map_match_set).collect();
    if clauses.len() == 1 {
        clauses.into_iter().next().unwrap()
    } else {
        clauses.into_iter().map(|c| format!("({c})")).collect::<Vec<_>>().join(" || ")
    }
}

fn map_match_set(m: &HTTPRouteRulesMatches) -> String {
    let mut terms = Vec::new();

    if let Some(path) = &m.path {
        let value = path.value.clone().unwrap_or_default();
        let expr = match path.r#type {
            Some(HTTPRouteRulesMatchesPathType::Exact) | None => format!("http.request.url.path eq '{value}'"),
            Some(HTTPRouteRulesMatchesPathType::PathPrefix) => format!("http.request.url.path pr '{value}'"),
            Some(HTTPRouteRulesMatchesPathType::RegularExpression) => format!("http.request.url.path rx '{value}'"),
        };
        terms.push(expr);
    }

    if let Some(method) = &m.method {
        let verb = match method {
            HTTPRouteRulesMatchesMethod::Get => "GET",
            HTTPRouteRulesMatchesMethod::Head => "HEAD",
            HTTPRouteRulesMatchesMethod::Post => "POST",
            HTTPRouteRulesMatchesMethod::Put => "PUT",
            HTTPRouteRulesMatchesMethod::Delete => "DELETE",
            HTTPRouteRulesMatchesMethod::Connect => "CONNECT",
            HTTPRouteRulesMatchesMethod::Options => "OPTIONS",
            HTTPRouteRulesMatchesMethod::Trace => "TRACE",
            HTTPRouteRulesMatchesMethod::Patch => "PATCH",
        };
        terms.push(format!("http.request.method eq '{verb}'"));
    }

    for header in m.headers.iter().flatten() {
        let field = format!("http.request.headers['{}'][0]", header.name);
        let expr = match header.r#type {
            Some(HTTPRouteRulesMatchesHeadersType::RegularExpression) => format!("{field} rx '{}'", header.value),
            Some(HTTPRouteRulesMatchesHeadersType::Exact) | None => format!("{field} eq '{}'", header.value),
        };
        terms.push(expr);
    }

    for param in m.query_params.iter().flatten() {
        let field = format!("http.request.url.query['{}']", param.name);
        let expr = match param.r#type {
            Some(HTTPRouteRulesMatchesQueryParamsType::RegularExpression) => format!("{field} rx '{}'", param.value),
            Some(HTTPRouteRulesMatchesQueryParamsType::Exact) | None => format!("{field} eq '{}'", param.value),
        };
        terms.push(expr);
    }

    if terms.is_empty() {
        "any(true)".to_string()
    } else {
        terms.join(" && ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_api::apis::standard::httproutes::HTTPRouteRulesMatchesPath;

    #[test]
    fn empty_matches_yields_unconditional_rule() {
        assert_eq!(map_matches(&[]), "any(true)");
    }

    #[test]
    fn exact_path_match() {
        let matches = vec![HTTPRouteRulesMatches {
            path: Some(HTTPRouteRulesMatchesPath {
                r#type: Some(HTTPRouteRulesMatchesPathType::Exact),
                value: Some("/healthz".to_string()),
            }),
            headers: None,
            query_params: None,
            method: None,
        }];
        assert_eq!(map_matches(&matches), "http.request.url.path eq '/healthz'");
    }

    #[test]
    fn prefix_path_match() {
        let matches = vec![HTTPRouteRulesMatches {
            path: Some(HTTPRouteRulesMatchesPath {
                r#type: Some(HTTPRouteRulesMatchesPathType::PathPrefix),
                value: Some("/api".to_string()),
            }),
            headers: None,
            query_params: None,
            method: None,
        }];
        assert_eq!(map_matches(&matches), "http.request.url.path pr '/api'");
    }

    #[test]
    fn multiple_match_sets_are_ored() {
        let matches = vec![
            HTTPRouteRulesMatches {
                path: Some(HTTPRouteRulesMatchesPath {
                    r#type: Some(HTTPRouteRulesMatchesPathType::Exact),
                    value: Some("/a".to_string()),
                }),
                headers: None,
                query_params: None,
                method: None,
            },
            HTTPRouteRulesMatches {
                path: Some(HTTPRouteRulesMatchesPath {
                    r#type: Some(HTTPRouteRulesMatchesPathType::Exact),
                    value: Some("/b".to_string()),
                }),
                headers: None,
                query_params: None,
                method: None,
            },
        ];
        assert_eq!(
            map_matches(&matches),
            "(http.request.url.path eq '/a') || (http.request.url.path eq '/b')"
        );
    }
}
