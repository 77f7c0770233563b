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

use std::collections::{BTreeMap, HashSet};

use gateway_api::apis::standard::httproutes::{HTTPRoute, HTTPRouteStatusParents, HTTPRouteStatusParentsParentRef};
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::api::{Patch, PatchParams};
use kube::{Api, Resource, ResourceExt};

use crate::cloud::names::{backend_set_name, routing_rule_name};
use crate::cloud::{BackendSet, HealthChecker, LoadBalancerAdapter, RuleAction, RoutingRule};
use crate::consts::{
    controller_class_name, programmed_policy_rules_annotation, programming_revision_annotation, BACKEND_SET_POLICY,
    HEALTH_CHECK_PROTOCOL, PROGRAMMING_REVISION, REASON_ACCEPTED, REASON_NO_MATCHING_PARENT, REASON_RESOLVED_REFS,
    ROUTE_CONDITION_ACCEPTED, ROUTE_CONDITION_RESOLVED_REFS,
};
use crate::errors::{Error, ReconcileError, ResourceStatusError};
use crate::httproute::resolver::ResolvedRouteDetails;
use crate::resources::{is_condition_set, set_condition, CONDITION_TRUE};
use crate::routing::{commit_routing_policy, map_matches};
use crate::{Context, TargetOnlyParentRef};

/// Finds or appends the parent-status entry keyed by `(ourController,
/// target_ref)` and persists `Accepted=True` on it, idempotently (§4.4
/// `acceptRoute`).
pub async fn accept_route(ctx: &Context, namespace: &str, name: &str, target_ref: &TargetOnlyParentRef, generation: i64) -> Result<(), Error> {
    let routes: Api<HTTPRoute> = Api::namespaced(ctx.client.clone(), namespace);
    let mut route = routes.get(name).await?;
    let status = route.status.get_or_insert_with(Default::default);

    let entry = find_or_insert_parent(&mut status.parents, target_ref);
    let conditions = entry.conditions.get_or_insert_with(Vec::new);

    if is_condition_set(conditions, ROUTE_CONDITION_ACCEPTED, CONDITION_TRUE, REASON_ACCEPTED, generation, None) {
        return Ok(());
    }

    set_condition(conditions, ROUTE_CONDITION_ACCEPTED, CONDITION_TRUE, REASON_ACCEPTED, "route accepted by this controller", generation);

    let patch = serde_json::json!({ "status": { "parents": status.parents } });
    routes.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
    Ok(())
}

/// A `parentRef` whose `sectionName` names no listener on the target Gateway
/// is rejected with `Accepted=False, reason=NoMatchingParent` rather than
/// silently accepted-but-never-programmed (the Gateway API's own reason for
/// exactly this case).
pub async fn reject_no_matching_parent(ctx: &Context, namespace: &str, name: &str, target_ref: &TargetOnlyParentRef, generation: i64) -> Result<(), Error> {
    let routes: Api<HTTPRoute> = Api::namespaced(ctx.client.clone(), namespace);
    let mut route = routes.get(name).await?;
    let status = route.status.get_or_insert_with(Default::default);

    let entry = find_or_insert_parent(&mut status.parents, target_ref);
    let conditions = entry.conditions.get_or_insert_with(Vec::new);

    set_condition(
        conditions,
        ROUTE_CONDITION_ACCEPTED,
        crate::resources::CONDITION_FALSE,
        REASON_NO_MATCHING_PARENT,
        "sectionName does not match any listener on the referenced Gateway",
        generation,
    );

    let patch = serde_json::json!({ "status": { "parents": status.parents } });
    routes.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
    Ok(())
}

fn find_or_insert_parent<'a>(
    parents: &'a mut Vec<HTTPRouteStatusParents>,
    target_ref: &TargetOnlyParentRef,
) -> &'a mut HTTPRouteStatusParents {
    let position = parents.iter().position(|p| parent_matches(p, target_ref));
    let index = position.unwrap_or_else(|| {
        parents.push(HTTPRouteStatusParents {
            parent_ref: HTTPRouteStatusParentsParentRef {
                group: Some(target_ref.group.clone()),
                kind: Some(target_ref.kind.clone()),
                namespace: Some(target_ref.namespace.clone()),
                name: target_ref.name.clone(),
                section_name: None,
                port: None,
            },
            controller_name: controller_class_name(),
            conditions: Some(Vec::new()),
        });
        parents.len() - 1
    });
    &mut parents[index]
}

fn parent_matches(parent: &HTTPRouteStatusParents, target_ref: &TargetOnlyParentRef) -> bool {
    parent.controller_name == controller_class_name()
        && parent.parent_ref.name == target_ref.name
        && parent.parent_ref.namespace.as_deref() == Some(target_ref.namespace.as_str())
        && parent.parent_ref.kind.as_deref().unwrap_or("Gateway") == target_ref.kind
        && parent.parent_ref.group.as_deref().unwrap_or("gateway.networking.k8s.io") == target_ref.group
}

/// Ensures every service referenced by a backend-ref exists; returns a
/// `"ns/name" -> Service` mapping (§4.4 `resolveBackendRefs`).
pub async fn resolve_backend_refs(client: &kube::Client, route: &HTTPRoute) -> Result<BTreeMap<String, Service>, Error> {
    let mut services = BTreeMap::new();
    for rule in route.spec.rules.iter().flatten() {
        for backend_ref in rule.backend_refs.iter().flatten() {
            let namespace = backend_ref.namespace.clone().unwrap_or_else(|| route.namespace().unwrap_or_default());
            let key = format!("{namespace}/{}", backend_ref.name);
            if services.contains_key(&key) {
                continue;
            }
            let api: Api<Service> = Api::namespaced(client.clone(), &namespace);
            let service = api.get(&backend_ref.name).await.map_err(|err| {
                if crate::resources::is_not_found(&err) {
                    Error::from(ResourceStatusError::new(
                        ROUTE_CONDITION_RESOLVED_REFS,
                        crate::consts::REASON_INVALID_BACKEND,
                        format!("backend service {key} not found"),
                    ))
                } else {
                    Error::from(err)
                }
            })?;
            services.insert(key, service);
        }
    }
    Ok(services)
}

/// Every `"ns/name"` a backend-ref in this route points at, read straight
/// off the spec. Used on the deprovision path, where the referenced
/// service may already be gone and `resolve_backend_refs` would fail.
pub fn backend_ref_keys(route: &HTTPRoute) -> HashSet<String> {
    let mut keys = HashSet::new();
    for rule in route.spec.rules.iter().flatten() {
        for backend_ref in rule.backend_refs.iter().flatten() {
            let namespace = backend_ref.namespace.clone().unwrap_or_else(|| route.namespace().unwrap_or_default());
            keys.insert(format!("{namespace}/{}", backend_ref.name));
        }
    }
    keys
}

/// True iff the route hasn't yet been programmed for this parent, or the
/// programming algorithm has moved on since it last was (§4.4
/// `isProgrammingRequired`).
pub fn is_programming_required(route: &HTTPRoute, target_ref: &TargetOnlyParentRef) -> bool {
    let annotations = route.annotations();
    if annotations.get(&programming_revision_annotation()).map(String::as_str) != Some(PROGRAMMING_REVISION) {
        return true;
    }
    let Some(status) = &route.status else {
        return true;
    };
    let Some(parent) = status.parents.iter().find(|p| parent_matches(p, target_ref)) else {
        return true;
    };
    let conditions: &[Condition] = parent.conditions.as_deref().unwrap_or_default();
    conditions.iter().find(|c| c.type_ == ROUTE_CONDITION_RESOLVED_REFS).is_none()
}

pub struct ProgramRouteInput<'a> {
    pub details: &'a ResolvedRouteDetails,
    pub known_backends: &'a BTreeMap<String, Service>,
}

/// Programs one matched parent of a route (§4.4 `programRoute`): a
/// backend-set per referenced service, a routing rule per rule index,
/// committed into every matched listener's shared policy.
///
/// Returns the rule names this route now owns, for the caller to persist as
/// the `programmed-policy-rules` annotation.
pub async fn program_route(ctx: &Context, input: &ProgramRouteInput<'_>) -> Result<Vec<String>, Error> {
    let route = &input.details.http_route;
    let lb_id = &input.details.gateway_details.config.spec.load_balancer_id;
    let route_name = route.name_any();

    let mut backend_set_names = BTreeMap::new();
    for (key, service) in input.known_backends {
        let (namespace, name) = key.split_once('/').unwrap_or(("", key.as_str()));
        let derived_name = backend_set_name(namespace, name);
        ensure_backend_set(ctx, lb_id, &derived_name, service).await?;
        backend_set_names.insert(key.clone(), derived_name);
    }

    let mut new_rules = Vec::new();
    for (rule_index, rule) in route.spec.rules.iter().flatten().enumerate() {
        let matches = rule.matches.clone().unwrap_or_default();
        let condition = map_matches(&matches);
        let mut actions = Vec::new();
        for backend_ref in rule.backend_refs.iter().flatten() {
            let namespace = backend_ref.namespace.clone().unwrap_or_else(|| route.namespace().unwrap_or_default());
            let key = format!("{namespace}/{}", backend_ref.name);
            if let Some(backend_set_name) = backend_set_names.get(&key) {
                actions.push(RuleAction {
                    backend_set_name: backend_set_name.clone(),
                });
            }
        }
        if actions.is_empty() {
            continue;
        }
        new_rules.push(RoutingRule {
            name: routing_rule_name(rule_index, &route_name, rule.name.as_deref()),
            condition,
            actions,
        });
    }

    let previously_programmed = previously_programmed_rule_names(route);

    for listener in &input.details.matched_listeners {
        commit_routing_policy(ctx.cloud.as_ref(), &ctx.cancellation, lb_id, &listener.name, &new_rules, &previously_programmed)
            .await?;
    }

    Ok(new_rules.into_iter().map(|r| r.name).collect())
}

fn previously_programmed_rule_names(route: &HTTPRoute) -> Vec<String> {
    route
        .annotations()
        .get(&programmed_policy_rules_annotation())
        .map(|v| v.split(',').filter(|s| !s.is_empty()).map(str::to_string).collect())
        .unwrap_or_default()
}

async fn ensure_backend_set(ctx: &Context, lb_id: &str, name: &str, service: &Service) -> Result<(), Error> {
    ensure_backend_set_with(ctx.cloud.as_ref(), &ctx.cancellation, lb_id, name, service).await
}

async fn ensure_backend_set_with(
    cloud: &dyn LoadBalancerAdapter,
    cancel: &tokio_util::sync::CancellationToken,
    lb_id: &str,
    name: &str,
    service: &Service,
) -> Result<(), Error> {
    if cloud.get_backend_set(lb_id, name).await.map_err(ReconcileError::from)?.is_some() {
        return Ok(());
    }
    let port = service
        .spec
        .as_ref()
        .and_then(|s| s.ports.as_ref())
        .and_then(|ports| ports.first())
        .map(|p| p.port)
        .unwrap_or(80);

    let spec = BackendSet {
        name: name.to_string(),
        policy: BACKEND_SET_POLICY.to_string(),
        health_checker: HealthChecker {
            protocol: HEALTH_CHECK_PROTOCOL.to_string(),
            port,
        },
        backends: Vec::new(),
        ssl_config: None,
        session_persistence_config: None,
    };
    let work_request = cloud.create_backend_set(lb_id, &spec).await.map_err(ReconcileError::from)?;
    cloud.wait_for(&work_request, cancel).await.map_err(ReconcileError::from)?;
    Ok(())
}

/// Runs the finalizer-gated deprovision path (§4.4 `deprovisionRoute`):
/// retracts exactly this route's owned rules from every matched listener's
/// policy and deletes the backend-sets it created.
pub async fn deprovision_route(ctx: &Context, details: &ResolvedRouteDetails) -> Result<(), Error> {
    let lb_id = &details.gateway_details.config.spec.load_balancer_id;
    let previously_programmed = previously_programmed_rule_names(&details.http_route);

    for listener in &details.matched_listeners {
        commit_routing_policy(ctx.cloud.as_ref(), &ctx.cancellation, lb_id, &listener.name, &[], &previously_programmed).await?;
    }

    let mut owned_backend_sets = HashSet::new();
    for key in backend_ref_keys(&details.http_route) {
        let (namespace, name) = key.split_once('/').unwrap_or(("", key.as_str()));
        owned_backend_sets.insert(backend_set_name(namespace, name));
    }
    for derived_name in owned_backend_sets {
        if ctx.cloud.get_backend_set(lb_id, &derived_name).await.map_err(ReconcileError::from)?.is_some() {
            let work_request = ctx
                .cloud
                .delete_backend_set(lb_id, &derived_name)
                .await
                .map_err(ReconcileError::from)?;
            ctx.cloud.wait_for(&work_request, &ctx.cancellation).await.map_err(ReconcileError::from)?;
        }
    }
    Ok(())
}

/// Writes `ResolvedRefs=True` plus the programming-revision annotation and
/// the `programmed-policy-rules` annotation listing `rule_names` (§4.4
/// `setProgrammed`).
pub async fn set_programmed(ctx: &Context, namespace: &str, name: &str, target_ref: &TargetOnlyParentRef, generation: i64, rule_names: &[String]) -> Result<(), Error> {
    let routes: Api<HTTPRoute> = Api::namespaced(ctx.client.clone(), namespace);
    let mut route = routes.get(name).await?;
    let status = route.status.get_or_insert_with(Default::default);
    let entry = find_or_insert_parent(&mut status.parents, target_ref);
    let conditions = entry.conditions.get_or_insert_with(Vec::new);
    set_condition(
        conditions,
        ROUTE_CONDITION_RESOLVED_REFS,
        CONDITION_TRUE,
        REASON_RESOLVED_REFS,
        "all backend refs resolved and programmed",
        generation,
    );

    let mut annotations = route.annotations().clone();
    annotations.insert(programming_revision_annotation(), PROGRAMMING_REVISION.to_string());
    annotations.insert(programmed_policy_rules_annotation(), rule_names.join(","));
    let mut finalizers = route.finalizers().to_vec();
    let finalizer = crate::consts::programmed_finalizer();
    if !finalizers.contains(&finalizer) {
        finalizers.push(finalizer);
    }

    let metadata_patch = serde_json::json!({ "metadata": { "annotations": annotations, "finalizers": finalizers } });
    routes.patch(name, &PatchParams::apply(crate::consts::FIELD_MANAGER), &kube::api::Patch::Merge(&metadata_patch)).await?;

    let status_patch = serde_json::json!({ "status": { "parents": status.parents } });
    routes.patch_status(name, &PatchParams::default(), &Patch::Merge(&status_patch)).await?;
    Ok(())
}

/// Writes `ResolvedRefs=False` on the matching parent-status with the
/// reason/message from a [`ResourceStatusError`] (§4.8: the failure branch
/// of the state machine). Does not touch the finalizer or the
/// programming-revision annotation.
pub async fn fail_resolved_refs(
    ctx: &Context,
    namespace: &str,
    name: &str,
    target_ref: &TargetOnlyParentRef,
    generation: i64,
    err: &ResourceStatusError,
) -> Result<(), Error> {
    let routes: Api<HTTPRoute> = Api::namespaced(ctx.client.clone(), namespace);
    let mut route = routes.get(name).await?;
    let status = route.status.get_or_insert_with(Default::default);
    let entry = find_or_insert_parent(&mut status.parents, target_ref);
    let conditions = entry.conditions.get_or_insert_with(Vec::new);
    set_condition(conditions, ROUTE_CONDITION_RESOLVED_REFS, crate::resources::CONDITION_FALSE, &err.reason, &err.message, generation);

    let status_patch = serde_json::json!({ "status": { "parents": status.parents } });
    routes.patch_status(name, &PatchParams::default(), &Patch::Merge(&status_patch)).await?;
    Ok(())
}

#[cfg(test)]
mod programming_tests {
    use mockall::predicate::eq;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::cloud::{MockLoadBalancerAdapter, WorkRequestId};

    fn service_with_port(port: i32) -> Service {
        serde_json::from_value(serde_json::json!({
            "spec": { "ports": [{ "port": port }] }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn ensure_backend_set_is_a_noop_when_already_present() {
        let mut mock = MockLoadBalancerAdapter::new();
        mock.expect_get_backend_set().returning(|_, _| {
            Ok(Some(BackendSet {
                name: "default-svc-a".to_string(),
                policy: BACKEND_SET_POLICY.to_string(),
                health_checker: HealthChecker {
                    protocol: HEALTH_CHECK_PROTOCOL.to_string(),
                    port: 8080,
                },
                backends: Vec::new(),
                ssl_config: None,
                session_persistence_config: None,
            }))
        });
        // No `expect_create_backend_set`/`expect_wait_for`: either call would panic the mock.

        ensure_backend_set_with(&mock, &CancellationToken::new(), "lb-1", "default-svc-a", &service_with_port(8080))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn ensure_backend_set_creates_with_the_services_first_port_when_absent() {
        let mut mock = MockLoadBalancerAdapter::new();
        mock.expect_get_backend_set().returning(|_, _| Ok(None));
        mock.expect_create_backend_set()
            .with(
                eq("lb-1"),
                mockall::predicate::function(|spec: &BackendSet| spec.name == "default-svc-a" && spec.health_checker.port == 8080),
            )
            .times(1)
            .returning(|_, _| Ok(WorkRequestId("wr-1".to_string())));
        mock.expect_wait_for()
            .with(eq(WorkRequestId("wr-1".to_string())), mockall::predicate::always())
            .times(1)
            .returning(|_, _| Ok(()));

        ensure_backend_set_with(&mock, &CancellationToken::new(), "lb-1", "default-svc-a", &service_with_port(8080))
            .await
            .unwrap();
    }
}
