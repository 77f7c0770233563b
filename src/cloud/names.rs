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

//! Cloud resource naming (invariants 3-4 in the data model): names must be
//! stable across reconciles, derived only from Kubernetes identity, and fit
//! the cloud API's length and character-set limits.

use regex::Regex;
use std::sync::OnceLock;

use crate::consts::MAX_CLOUD_NAME_LEN;

fn disallowed_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-zA-Z0-9_]").expect("static regex"))
}

fn disallowed_chars_keep_hyphen() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-zA-Z0-9-]").expect("static regex"))
}

/// Builds a cloud-safe resource name from namespaced Kubernetes identity.
/// Joins `parts` with `_`, replaces any character outside `[a-zA-Z0-9_]`
/// with `_`, and truncates to [`MAX_CLOUD_NAME_LEN`] by hashing the tail
/// when the joined name would otherwise be ambiguous after truncation.
pub fn construct_cloud_resource_name(parts: &[&str]) -> String {
    let joined = parts.join("_");
    let sanitized = disallowed_chars().replace_all(&joined, "_").to_string();
    truncate_with_suffix(&sanitized, MAX_CLOUD_NAME_LEN)
}

/// Truncates `name` to `max_len`, replacing the last 8 characters with a
/// short hash of the full name when truncation would otherwise occur, so
/// that two names differing only past the truncation point don't collide.
fn truncate_with_suffix(name: &str, max_len: usize) -> String {
    if name.len() <= max_len {
        return name.to_string();
    }
    let hash = format!("{:08x}", fnv1a(name.as_bytes()));
    let keep = max_len.saturating_sub(hash.len() + 1);
    format!("{}_{}", &name[..keep], hash)
}

fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c9dc5;
    for b in bytes {
        hash ^= *b as u32;
        hash = hash.wrapping_mul(0x01000193);
    }
    hash
}

/// Joins `parts` with `-` and sanitizes/truncates the same way
/// [`construct_cloud_resource_name`] does, but keeps hyphens intact instead
/// of folding them to underscores. Used for the two naming schemes that the
/// data model spells out with hyphens (invariants 1 and 3).
fn hyphen_join_and_sanitize(parts: &[&str]) -> String {
    let joined = parts.join("-");
    let sanitized = disallowed_chars_keep_hyphen().replace_all(&joined, "-").to_string();
    truncate_with_suffix(&sanitized, MAX_CLOUD_NAME_LEN)
}

/// Name of the default backend set a Gateway's listeners route unmatched
/// traffic to: `<gateway-name>-default` (invariant 1).
pub fn default_backend_set_name(gateway_name: &str) -> String {
    hyphen_join_and_sanitize(&[gateway_name, "default"])
}

/// Name of the backend set a referenced service owns, `<ns>-<name>`
/// (invariant 3: the backend-ref-derived and service-derived naming schemes
/// must agree, so this takes only the service's namespaced name).
pub fn backend_set_name(service_namespace: &str, service_name: &str) -> String {
    hyphen_join_and_sanitize(&[service_namespace, service_name])
}

/// Name of a routing rule owned by a specific HTTPRoute, unique within the
/// shared per-listener policy. `rule_name` is the optional
/// `HTTPRouteRule.name` field; `None` falls back to the positional index.
/// Truncated to [`MAX_CLOUD_NAME_LEN`] (invariant 4); the `p<index>_` prefix
/// that `is_owned_rule_name` keys off of is always preserved since it sits
/// well within the truncation budget.
pub fn routing_rule_name(rule_index: usize, route_name: &str, rule_name: Option<&str>) -> String {
    let raw = match rule_name {
        Some(name) => format!("p{:04}_{}_{}", rule_index, sanitize_fragment(route_name), sanitize_fragment(name)),
        None => format!("p{:04}_{}", rule_index, sanitize_fragment(route_name)),
    };
    truncate_with_suffix(&raw, MAX_CLOUD_NAME_LEN)
}

/// True iff `rule_name` was produced by [`routing_rule_name`] for this
/// `rule_index`, identifying it as owned by the calling route (invariant 4).
pub fn is_owned_rule_name(rule_name: &str, rule_index: usize) -> bool {
    rule_name.starts_with(&format!("p{:04}_", rule_index))
}

fn sanitize_fragment(fragment: &str) -> String {
    disallowed_chars().replace_all(fragment, "_").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_and_joins() {
        let name = construct_cloud_resource_name(&["gw", "my-ns", "my.gateway"]);
        assert_eq!(name, "gw_my_ns_my_gateway");
    }

    #[test]
    fn truncates_long_names_deterministically() {
        let long_ns = "a".repeat(40);
        let first = construct_cloud_resource_name(&["route", &long_ns, "svc"]);
        let second = construct_cloud_resource_name(&["route", &long_ns, "svc"]);
        assert_eq!(first, second);
        assert!(first.len() <= MAX_CLOUD_NAME_LEN);
    }

    #[test]
    fn truncation_disambiguates_names_differing_only_after_the_cut() {
        let long_ns = "a".repeat(40);
        let first = construct_cloud_resource_name(&["route", &long_ns, "svc-one"]);
        let second = construct_cloud_resource_name(&["route", &long_ns, "svc-two"]);
        assert_ne!(first, second);
    }

    #[test]
    fn default_backend_set_name_matches_the_gateway_name_default_scheme() {
        assert_eq!(default_backend_set_name("gw1"), "gw1-default");
    }

    #[test]
    fn backend_set_name_agrees_across_the_two_derivation_schemes() {
        // invariant 3: a backend-ref-derived name and a service-derived name
        // for the same namespaced service must be identical.
        assert_eq!(backend_set_name("default", "my-svc"), "default-my-svc");
    }

    #[test]
    fn routing_rule_name_falls_back_to_index_without_a_rule_name() {
        assert_eq!(routing_rule_name(3, "my-route", None), "p0003_my_route");
        assert_eq!(routing_rule_name(3, "my-route", Some("canary")), "p0003_my_route_canary");
    }

    #[rstest::rstest]
    #[case(0, "my-route", None, "p0000_my_route")]
    #[case(9, "my-route", None, "p0009_my_route")]
    #[case(42, "my-route", None, "p0042_my_route")]
    #[case(0, "my-route", Some("canary"), "p0000_my_route_canary")]
    #[case(0, "my.route", Some("a b"), "p0000_my_route_a_b")]
    fn routing_rule_name_pads_the_index_to_four_digits_and_sanitizes_fragments(
        #[case] index: usize,
        #[case] route_name: &str,
        #[case] rule_name: Option<&str>,
        #[case] expected: &str,
    ) {
        assert_eq!(routing_rule_name(index, route_name, rule_name), expected);
    }

    #[test]
    fn routing_rule_name_truncates_long_names_but_keeps_the_owned_prefix() {
        let long_route = "a".repeat(60);
        let name = routing_rule_name(7, &long_route, Some("a-very-long-rule-name"));
        assert!(name.len() <= MAX_CLOUD_NAME_LEN);
        assert!(is_owned_rule_name(&name, 7));
    }

    #[test]
    fn is_owned_rule_name_checks_index_and_prefix() {
        assert!(is_owned_rule_name("p0003_my_route", 3));
        assert!(!is_owned_rule_name("p0003_my_route", 4));
        assert!(!is_owned_rule_name("default_catch_all", 3));
    }
}
