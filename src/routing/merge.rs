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

use std::collections::HashSet;

use tokio_util::sync::CancellationToken;

use crate::cloud::{LoadBalancerAdapter, RoutingPolicy, RoutingRule};
use crate::consts::DEFAULT_CATCH_ALL_RULE;
use crate::errors::{Error, ReconcileError};

/// Pure merge step of `commitRoutingPolicy` (§4.5): folds `policy_rules`
/// (what the caller wants present now) into `current`, removing whatever
/// the caller previously owned (`prev_policy_rules`) and no longer wants,
/// then sorts with `default_catch_all` pinned last.
///
/// Idempotent: calling this twice with the same arguments (including a
/// `current` that already reflects the first call's output) yields the same
/// sequence.
pub fn merge_routing_rules(current: &[RoutingRule], policy_rules: &[RoutingRule], prev_policy_rules: &[String]) -> Vec<RoutingRule> {
    let wanted_names: HashSet<&str> = policy_rules.iter().map(|r| r.name.as_str()).collect();
    let prev_names: HashSet<&str> = prev_policy_rules.iter().map(String::as_str).collect();

    let mut merged: Vec<RoutingRule> = current
        .iter()
        .filter(|r| !(prev_names.contains(r.name.as_str()) && !wanted_names.contains(r.name.as_str())))
        .cloned()
        .collect();

    for rule in policy_rules {
        if let Some(existing) = merged.iter_mut().find(|r| r.name == rule.name) {
            *existing = rule.clone();
        } else {
            merged.push(rule.clone());
        }
    }

    merged.sort_by(|a, b| rule_sort_key(a).cmp(&rule_sort_key(b)));
    merged
}

fn rule_sort_key(rule: &RoutingRule) -> (u8, &str) {
    if rule.name == DEFAULT_CATCH_ALL_RULE {
        (1, rule.name.as_str())
    } else {
        (0, rule.name.as_str())
    }
}

/// Reads the listener's routing policy, merges in `policy_rules`, and
/// commits the result, awaiting the resulting work request. `listener_name`
/// identifies the policy by the `<listener>_policy` naming convention
/// (invariant 2).
pub async fn commit_routing_policy(
    cloud: &dyn LoadBalancerAdapter,
    cancel: &CancellationToken,
    lb_id: &str,
    listener_name: &str,
    policy_rules: &[RoutingRule],
    prev_policy_rules: &[String],
) -> Result<(), Error> {
    let policy_name = format!("{listener_name}_policy");
    let current = cloud
        .get_routing_policy(lb_id, listener_name)
        .await
        .map_err(ReconcileError::from)?
        .unwrap_or_else(|| RoutingPolicy {
            name: policy_name.clone(),
            rules: Vec::new(),
        });

    let merged = merge_routing_rules(&current.rules, policy_rules, prev_policy_rules);
    if merged == current.rules {
        return Ok(());
    }

    let updated = RoutingPolicy {
        name: policy_name,
        rules: merged,
    };
    let work_request = cloud
        .update_routing_policy(lb_id, listener_name, &updated)
        .await
        .map_err(ReconcileError::from)?;
    cloud.wait_for(&work_request, cancel).await.map_err(ReconcileError::from)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use mockall::predicate::eq;

    use super::*;
    use crate::cloud::{MockLoadBalancerAdapter, RuleAction, WorkRequestId};

    fn rule(name: &str, backend_set: &str) -> RoutingRule {
        RoutingRule {
            name: name.to_string(),
            condition: "any(true)".to_string(),
            actions: vec![RuleAction {
                backend_set_name: backend_set.to_string(),
            }],
        }
    }

    #[test]
    fn default_catch_all_always_sorts_last() {
        let current = vec![rule(DEFAULT_CATCH_ALL_RULE, "gw-default"), rule("p0000_a", "a")];
        let merged = merge_routing_rules(&current, &[rule("p0001_b", "b")], &[]);
        assert_eq!(merged.last().unwrap().name, DEFAULT_CATCH_ALL_RULE);
        assert_eq!(merged.iter().map(|r| r.name.clone()).collect::<Vec<_>>(), vec![
            "p0000_a".to_string(),
            "p0001_b".to_string(),
            DEFAULT_CATCH_ALL_RULE.to_string(),
        ]);
    }

    #[test]
    fn merge_is_idempotent() {
        let current = vec![rule(DEFAULT_CATCH_ALL_RULE, "gw-default")];
        let policy_rules = vec![rule("p0000_r1", "svc-a"), rule("p0001_r1", "svc-b")];

        let once = merge_routing_rules(&current, &policy_rules, &[]);
        let twice = merge_routing_rules(&once, &policy_rules, &[]);
        assert_eq!(once, twice);
    }

    #[test]
    fn owned_rules_no_longer_wanted_are_removed() {
        let current = vec![
            rule(DEFAULT_CATCH_ALL_RULE, "gw-default"),
            rule("p0000_r1", "svc-a"),
            rule("p0001_r1", "svc-b"),
        ];
        // caller previously owned p0000_r1 and p0001_r1, now only wants p0000_r1
        let merged = merge_routing_rules(&current, &[rule("p0000_r1", "svc-a")], &[
            "p0000_r1".to_string(),
            "p0001_r1".to_string(),
        ]);
        let names: Vec<_> = merged.iter().map(|r| r.name.clone()).collect();
        assert_eq!(names, vec!["p0000_r1".to_string(), DEFAULT_CATCH_ALL_RULE.to_string()]);
    }

    #[test]
    fn rules_owned_by_other_routes_are_left_alone() {
        let current = vec![rule(DEFAULT_CATCH_ALL_RULE, "gw-default"), rule("p0000_other_route", "svc-z")];
        let merged = merge_routing_rules(&current, &[rule("p0000_my_route", "svc-a")], &["p0000_my_route".to_string()]);
        let names: Vec<_> = merged.iter().map(|r| r.name.clone()).collect();
        assert!(names.contains(&"p0000_other_route".to_string()));
        assert!(names.contains(&"p0000_my_route".to_string()));
    }

    #[test]
    fn empty_new_rules_with_prev_removes_exactly_those_rules() {
        let current = vec![
            rule(DEFAULT_CATCH_ALL_RULE, "gw-default"),
            rule("p0000_r1", "svc-a"),
            rule("p0001_r1", "svc-b"),
        ];
        let merged = merge_routing_rules(&current, &[], &["p0000_r1".to_string(), "p0001_r1".to_string()]);
        assert_eq!(merged, vec![rule(DEFAULT_CATCH_ALL_RULE, "gw-default")]);
    }

    #[tokio::test]
    async fn commit_routing_policy_updates_when_the_merge_changes_anything() {
        let mut mock = MockLoadBalancerAdapter::new();
        mock.expect_get_routing_policy().with(eq("lb-1"), eq("http")).times(1).returning(|_, _| {
            Ok(Some(RoutingPolicy {
                name: "http_policy".to_string(),
                rules: vec![rule(DEFAULT_CATCH_ALL_RULE, "gw-default")],
            }))
        });
        mock.expect_update_routing_policy()
            .withf(|lb_id, listener_name, policy: &RoutingPolicy| {
                lb_id == "lb-1" && listener_name == "http" && policy.rules.last().unwrap().name == DEFAULT_CATCH_ALL_RULE
            })
            .times(1)
            .returning(|_, _, _| Ok(WorkRequestId("wr-1".to_string())));
        mock.expect_wait_for()
            .with(eq(WorkRequestId("wr-1".to_string())), mockall::predicate::always())
            .times(1)
            .returning(|_, _| Ok(()));

        commit_routing_policy(&mock, &CancellationToken::new(), "lb-1", "http", &[rule("p0000_r1", "svc-a")], &[])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn commit_routing_policy_is_a_noop_when_the_merge_changes_nothing() {
        let mut mock = MockLoadBalancerAdapter::new();
        mock.expect_get_routing_policy().returning(|_, _| {
            Ok(Some(RoutingPolicy {
                name: "http_policy".to_string(),
                rules: vec![rule("p0000_r1", "svc-a"), rule(DEFAULT_CATCH_ALL_RULE, "gw-default")],
            }))
        });
        // No `expect_update_routing_policy`/`expect_wait_for`: either call would panic the mock.

        commit_routing_policy(&mock, &CancellationToken::new(), "lb-1", "http", &[rule("p0000_r1", "svc-a")], &[])
            .await
            .unwrap();
    }
}
