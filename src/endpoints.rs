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

//! The endpoint synchronizer (§4.6): keeps each referenced backend-set's live
//! backend list in step with the `EndpointSlice`s of the Kubernetes service
//! it fronts, draining terminating endpoints rather than dropping them.

use std::collections::BTreeMap;

use k8s_openapi::api::discovery::v1::EndpointSlice;
use kube::api::ListParams;
use kube::{Api, Client};
use tokio_util::sync::CancellationToken;

use crate::cloud::{Backend, LoadBalancerAdapter};
use crate::consts::ENDPOINTSLICE_SERVICE_NAME_LABEL;
use crate::errors::{Error, ReconcileError};

/// One backend-ref's worth of work for the synchronizer: the backend-set it
/// owns, the service it watches, and the port backends should forward to.
pub struct BackendSetEndpoints<'a> {
    pub backend_set_name: &'a str,
    pub service_namespace: &'a str,
    pub service_name: &'a str,
    pub port: i32,
}

/// Computes the desired backend list from `endpoint_slices` and reports
/// whether it differs from `current`. Pure; the caller does the I/O.
///
/// - An endpoint is included iff `ready != Some(false)`.
/// - It is drained iff `terminating == Some(true)`.
/// - Only the first address of each endpoint is used.
/// - An endpoint with no addresses is skipped silently.
pub fn identify_backends_to_update(port: i32, current: &[Backend], endpoint_slices: &[EndpointSlice]) -> (Vec<Backend>, bool) {
    let mut desired: BTreeMap<String, Backend> = BTreeMap::new();

    for slice in endpoint_slices {
        for endpoint in &slice.endpoints {
            let Some(ip) = endpoint.addresses.first() else {
                continue;
            };
            let ready = endpoint.conditions.as_ref().and_then(|c| c.ready).unwrap_or(true);
            if !ready {
                continue;
            }
            let drain = endpoint.conditions.as_ref().and_then(|c| c.terminating).unwrap_or(false);
            desired.insert(
                ip.clone(),
                Backend {
                    ip: ip.clone(),
                    port,
                    drain,
                },
            );
        }
    }

    let current_by_ip: BTreeMap<&str, &Backend> = current.iter().map(|b| (b.ip.as_str(), b)).collect();
    let update_required = desired.len() != current_by_ip.len()
        || desired.iter().any(|(ip, backend)| match current_by_ip.get(ip.as_str()) {
            Some(existing) => existing.drain != backend.drain || existing.port != backend.port,
            None => true,
        });

    (desired.into_values().collect(), update_required)
}

/// Lists the `EndpointSlice`s for one service, diffs them against the
/// backend-set's current backends, and issues a single `UpdateBackendSet`
/// when a diff is found (§4.6 steps 1-4).
pub async fn sync_route_endpoints(
    client: &Client,
    cloud: &dyn LoadBalancerAdapter,
    cancel: &CancellationToken,
    lb_id: &str,
    target: &BackendSetEndpoints<'_>,
) -> Result<(), Error> {
    let backend_set = cloud
        .get_backend_set(lb_id, target.backend_set_name)
        .await
        .map_err(ReconcileError::from)?;
    let Some(backend_set) = backend_set else {
        // Backend-set not programmed yet; the programmer creates it before
        // the synchronizer ever runs for this ref. Nothing to sync against.
        return Ok(());
    };

    let slices_api: Api<EndpointSlice> = Api::namespaced(client.clone(), target.service_namespace);
    let list_params = ListParams::default().labels(&format!("{ENDPOINTSLICE_SERVICE_NAME_LABEL}={}", target.service_name));
    let slices = slices_api.list(&list_params).await?;

    let (desired_backends, update_required) = identify_backends_to_update(target.port, &backend_set.backends, &slices.items);
    if !update_required {
        return Ok(());
    }

    let updated = crate::cloud::BackendSet {
        backends: desired_backends,
        ..backend_set
    };
    let work_request = cloud.update_backend_set(lb_id, &updated).await.map_err(ReconcileError::from)?;
    cloud.wait_for(&work_request, cancel).await.map_err(ReconcileError::from)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::discovery::v1::{Endpoint, EndpointConditions};

    fn endpoint(ip: &str, ready: Option<bool>, terminating: Option<bool>) -> Endpoint {
        Endpoint {
            addresses: vec![ip.to_string()],
            conditions: Some(EndpointConditions {
                ready,
                terminating,
                serving: None,
            }),
            ..Default::default()
        }
    }

    fn slice(endpoints: Vec<Endpoint>) -> EndpointSlice {
        EndpointSlice {
            metadata: Default::default(),
            address_type: "IPv4".to_string(),
            endpoints,
            ports: None,
        }
    }

    #[test]
    fn empty_addresses_are_skipped_silently() {
        let mut ep = endpoint("", Some(true), None);
        ep.addresses.clear();
        let (backends, update_required) = identify_backends_to_update(80, &[], std::slice::from_ref(&slice(vec![ep])));
        assert!(backends.is_empty());
        assert!(!update_required);
    }

    #[test]
    fn not_ready_endpoint_excluded_even_if_terminating() {
        let ep = endpoint("1.1.1.1", Some(false), Some(true));
        let (backends, _) = identify_backends_to_update(80, &[], &[slice(vec![ep])]);
        assert!(backends.is_empty());
    }

    #[test]
    fn unset_ready_and_terminating_is_included_undrained() {
        let ep = endpoint("1.1.1.1", None, None);
        let (backends, update_required) = identify_backends_to_update(80, &[], &[slice(vec![ep])]);
        assert_eq!(backends, vec![Backend { ip: "1.1.1.1".into(), port: 80, drain: false }]);
        assert!(update_required);
    }

    #[test]
    fn terminating_ready_endpoint_is_drained_not_removed() {
        let current = vec![
            Backend { ip: "1.1.1.1".into(), port: 80, drain: false },
        ];
        let slices = [slice(vec![
            endpoint("1.1.1.1", Some(true), Some(true)),
            endpoint("2.2.2.2", Some(true), None),
        ])];
        let (backends, update_required) = identify_backends_to_update(80, &current, &slices);
        assert!(update_required);
        assert!(backends.iter().any(|b| b.ip == "1.1.1.1" && b.drain));
        assert!(backends.iter().any(|b| b.ip == "2.2.2.2" && !b.drain));
    }

    #[test]
    fn round_trip_is_stable() {
        let slices = [slice(vec![
            endpoint("1.1.1.1", Some(true), Some(true)),
            endpoint("2.2.2.2", Some(true), None),
        ])];
        let (first, first_update) = identify_backends_to_update(80, &[], &slices);
        assert!(first_update);
        let (_, second_update) = identify_backends_to_update(80, &first, &slices);
        assert!(!second_update);
    }
}
