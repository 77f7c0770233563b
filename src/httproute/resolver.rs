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

use std::collections::BTreeMap;

use gateway_api::apis::standard::gateways::GatewaySpecListeners;
use gateway_api::apis::standard::httproutes::{HTTPRoute, HTTPRouteParentRefs};
use kube::Api;

use crate::gateway::resolver::{resolve_reconcile_request, ResolvedGatewayDetails};
use crate::resources::get_opt;
use crate::{Context, Error, TargetOnlyParentRef};

const DEFAULT_GROUP: &str = "gateway.networking.k8s.io";
const DEFAULT_KIND: &str = "Gateway";

#[derive(Clone)]
pub struct ResolvedRouteDetails {
    pub http_route: HTTPRoute,
    pub gateway_details: ResolvedGatewayDetails,
    pub matched_ref: HTTPRouteParentRefs,
    pub matched_listeners: Vec<GatewaySpecListeners>,
}

pub fn target_only_ref(parent_ref: &HTTPRouteParentRefs, route_namespace: &str) -> TargetOnlyParentRef {
    TargetOnlyParentRef {
        group: parent_ref.group.clone().unwrap_or_else(|| DEFAULT_GROUP.to_string()),
        kind: parent_ref.kind.clone().unwrap_or_else(|| DEFAULT_KIND.to_string()),
        namespace: parent_ref.namespace.clone().unwrap_or_else(|| route_namespace.to_string()),
        name: parent_ref.name.clone(),
    }
}

/// Resolves an HTTPRoute reconcile request into a per-target-parent mapping
/// of fully-joined details (§4.4 `resolveRequest`). A not-found route maps
/// to an empty mapping; a parent-ref whose gateway isn't ours is simply
/// absent from the result, not an error.
pub async fn resolve_request(ctx: &Context, namespace: &str, name: &str) -> Result<BTreeMap<TargetOnlyParentRef, ResolvedRouteDetails>, Error> {
    let routes: Api<HTTPRoute> = Api::namespaced(ctx.client.clone(), namespace);
    let Some(route) = get_opt(&routes, name).await? else {
        return Ok(BTreeMap::new());
    };

    let mut by_target: BTreeMap<TargetOnlyParentRef, ResolvedRouteDetails> = BTreeMap::new();
    let parent_refs = route.spec.parent_refs.clone().unwrap_or_default();

    for parent_ref in &parent_refs {
        let kind = parent_ref.kind.as_deref().unwrap_or(DEFAULT_KIND);
        if kind != DEFAULT_KIND {
            continue;
        }
        let gateway_namespace = parent_ref.namespace.clone().unwrap_or_else(|| namespace.to_string());

        let Some(gateway_details) = resolve_reconcile_request(ctx, &gateway_namespace, &parent_ref.name).await? else {
            continue;
        };

        let listeners: Vec<GatewaySpecListeners> = match &parent_ref.section_name {
            Some(section_name) => gateway_details
                .gateway
                .spec
                .listeners
                .iter()
                .filter(|l| &l.name == section_name)
                .cloned()
                .collect(),
            None => gateway_details.gateway.spec.listeners.clone(),
        };

        let target = target_only_ref(parent_ref, namespace);
        by_target
            .entry(target)
            .and_modify(|details: &mut ResolvedRouteDetails| {
                for listener in &listeners {
                    if !details.matched_listeners.iter().any(|l| l.name == listener.name) {
                        details.matched_listeners.push(listener.clone());
                    }
                }
            })
            .or_insert_with(|| ResolvedRouteDetails {
                http_route: route.clone(),
                gateway_details: gateway_details.clone(),
                matched_ref: parent_ref.clone(),
                matched_listeners: listeners.clone(),
            });
    }

    Ok(by_target)
}

#[cfg(test)]
mod tests {
    use super::*;

    // `port` is left unset here: the property under test is that it and
    // `sectionName` don't affect the target-only key, so varying
    // `sectionName` alone is enough to demonstrate it.
    fn parent_ref(section_name: Option<&str>) -> HTTPRouteParentRefs {
        HTTPRouteParentRefs {
            group: None,
            kind: None,
            name: "gw1".to_string(),
            namespace: None,
            port: None,
            section_name: section_name.map(str::to_string),
        }
    }

    #[test]
    fn target_only_ref_ignores_section_name() {
        let a = target_only_ref(&parent_ref(Some("http")), "ns1");
        let b = target_only_ref(&parent_ref(Some("https")), "ns1");
        let c = target_only_ref(&parent_ref(None), "ns1");
        assert_eq!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn target_only_ref_defaults_group_kind_and_namespace() {
        let target = target_only_ref(&parent_ref(None), "route-ns");
        assert_eq!(target.group, DEFAULT_GROUP);
        assert_eq!(target.kind, DEFAULT_KIND);
        assert_eq!(target.namespace, "route-ns");
    }
}
