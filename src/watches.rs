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

//! Cross-resource fan-out (§4.7). Kubernetes informers don't give us a
//! field-indexed cache the way controller-runtime does, so the two
//! indexers described in the spec are a pair of small in-memory maps kept
//! current by the reconcilers themselves, plus the `.watches()`
//! map-functions built on top of them.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use gateway_api::apis::standard::gateways::Gateway;
use gateway_api::apis::standard::httproutes::HTTPRoute;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::api::discovery::v1::EndpointSlice;
use kube::runtime::reflector::ObjectRef;
use kube::ResourceExt;

use crate::consts::ENDPOINTSLICE_SERVICE_NAME_LABEL;
use crate::NamespacedName;

/// `HTTPRoute[backendRefs.serviceName] -> routes`. A route only appears here
/// once it carries a parent-status entry from this controller with
/// `ResolvedRefs=True`; deleted routes are removed, never indexed.
#[derive(Clone, Default)]
pub struct RouteIndex {
    by_service: Arc<DashMap<String, HashSet<NamespacedName>>>,
}

impl RouteIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces whatever `route` previously indexed with `service_keys`
    /// (each a `"ns/name"` string). Call after a successful `programRoute`.
    pub fn reindex(&self, route: &NamespacedName, service_keys: impl IntoIterator<Item = String>) {
        self.remove(route);
        for key in service_keys {
            self.by_service.entry(key).or_default().insert(route.clone());
        }
    }

    /// Drops every index entry naming `route`. Call on deprovision and on
    /// any reconcile that finds the route no longer relevant to us.
    pub fn remove(&self, route: &NamespacedName) {
        self.by_service.retain(|_, routes| {
            routes.remove(route);
            !routes.is_empty()
        });
    }

    fn routes_for_service(&self, service_key: &str) -> Vec<NamespacedName> {
        self.by_service
            .get(service_key)
            .map(|routes| routes.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// `Gateway[certificateSecret] -> gateways`. A gateway only appears here
/// once it carries the `{controllerClassName: "true"}` annotation.
#[derive(Clone, Default)]
pub struct GatewayIndex {
    by_secret: Arc<DashMap<String, HashSet<NamespacedName>>>,
}

impl GatewayIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reindex(&self, gateway: &NamespacedName, secret_keys: impl IntoIterator<Item = String>) {
        self.remove(gateway);
        for key in secret_keys {
            self.by_secret.entry(key).or_default().insert(gateway.clone());
        }
    }

    pub fn remove(&self, gateway: &NamespacedName) {
        self.by_secret.retain(|_, gateways| {
            gateways.remove(gateway);
            !gateways.is_empty()
        });
    }

    fn gateways_for_secret(&self, secret_key: &str) -> Vec<NamespacedName> {
        self.by_secret
            .get(secret_key)
            .map(|gateways| gateways.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// Extracts the `kubernetes.io/service-name` label from an `EndpointSlice`
/// and yields one reconcile request per route known to reference that
/// service (§4.7 `MapEndpointSliceToHTTPRoute`).
pub fn map_endpointslice_to_httproute(index: RouteIndex) -> impl Fn(EndpointSlice) -> Vec<ObjectRef<HTTPRoute>> + Send + Sync + Clone + 'static {
    move |slice: EndpointSlice| {
        let Some(namespace) = slice.namespace() else {
            return Vec::new();
        };
        let Some(service_name) = slice.labels().get(ENDPOINTSLICE_SERVICE_NAME_LABEL) else {
            return Vec::new();
        };
        let key = format!("{namespace}/{service_name}");
        index
            .routes_for_service(&key)
            .into_iter()
            .map(|r| ObjectRef::new(&r.name).within(&r.namespace))
            .collect()
    }
}

/// Only fans out for `type=TLS` secrets carrying both `tls.crt` and
/// `tls.key` (§4.7 `MapSecretToGateway`).
pub fn map_secret_to_gateway(index: GatewayIndex) -> impl Fn(Secret) -> Vec<ObjectRef<Gateway>> + Send + Sync + Clone + 'static {
    move |secret: Secret| {
        if secret.type_.as_deref() != Some("kubernetes.io/tls") {
            return Vec::new();
        }
        let data = secret.data.as_ref();
        let carries_cert_material = data.is_some_and(|d| d.contains_key("tls.crt") && d.contains_key("tls.key"));
        if !carries_cert_material {
            return Vec::new();
        }
        let Some(namespace) = secret.namespace() else {
            return Vec::new();
        };
        let key = format!("{namespace}/{}", secret.name_any());
        index
            .gateways_for_secret(&key)
            .into_iter()
            .map(|g| ObjectRef::new(&g.name).within(&g.namespace))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_index_reindex_replaces_prior_entries() {
        let index = RouteIndex::new();
        let route = NamespacedName::new("ns", "r1");
        index.reindex(&route, vec!["ns/svc-a".to_string()]);
        assert_eq!(index.routes_for_service("ns/svc-a"), vec![route.clone()]);

        index.reindex(&route, vec!["ns/svc-b".to_string()]);
        assert!(index.routes_for_service("ns/svc-a").is_empty());
        assert_eq!(index.routes_for_service("ns/svc-b"), vec![route]);
    }

    #[test]
    fn route_index_remove_drops_all_entries_for_a_route() {
        let index = RouteIndex::new();
        let route = NamespacedName::new("ns", "r1");
        index.reindex(&route, vec!["ns/svc-a".to_string(), "ns/svc-b".to_string()]);
        index.remove(&route);
        assert!(index.routes_for_service("ns/svc-a").is_empty());
        assert!(index.routes_for_service("ns/svc-b").is_empty());
    }

    #[test]
    fn route_index_keeps_other_routes_on_the_same_service() {
        let index = RouteIndex::new();
        let r1 = NamespacedName::new("ns", "r1");
        let r2 = NamespacedName::new("ns", "r2");
        index.reindex(&r1, vec!["ns/svc-a".to_string()]);
        index.reindex(&r2, vec!["ns/svc-a".to_string()]);
        index.remove(&r1);
        assert_eq!(index.routes_for_service("ns/svc-a"), vec![r2]);
    }

    #[test]
    fn gateway_index_tracks_certificate_secrets() {
        let index = GatewayIndex::new();
        let gw = NamespacedName::new("ns", "gw1");
        index.reindex(&gw, vec!["ns/tls-secret".to_string()]);
        assert_eq!(index.gateways_for_secret("ns/tls-secret"), vec![gw]);
    }
}
