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

//! The HTTPRoute reconciler loop (§4.4, §4.8): resolves parent refs, accepts
//! the route per-parent, programs routing rules and backend-sets, runs the
//! endpoint synchronizer, and gates deletion on the `…/programmed`
//! finalizer.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use gateway_api::apis::standard::httproutes::HTTPRoute;
use kube::api::{Patch, PatchParams};
use kube::runtime::{controller::Action, watcher::Config, Controller};
use kube::{Api, Resource, ResourceExt};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::api::discovery::v1::EndpointSlice;
use tracing::{info, warn};

use crate::cloud::names::backend_set_name;
use crate::consts::FIELD_MANAGER;
use crate::endpoints::{sync_route_endpoints, BackendSetEndpoints};
use crate::errors::Error;
use crate::httproute::programmer::{
    accept_route, backend_ref_keys, deprovision_route, fail_resolved_refs, is_programming_required, program_route,
    reject_no_matching_parent, resolve_backend_refs, set_programmed, ProgramRouteInput,
};
use crate::httproute::resolver::resolve_request;
use crate::resources::get_opt;
use crate::watches::map_endpointslice_to_httproute;
use crate::{Context, NamespacedName};

pub async fn reconcile(route: Arc<HTTPRoute>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = route.name_any();
    let namespace = route.namespace().ok_or(Error::MissingResourceNamespace)?;
    let generation = route.meta().generation.unwrap_or(0);
    let route_key = NamespacedName::new(&namespace, &name);

    if route.meta().deletion_timestamp.is_some() {
        return handle_deletion(&ctx, &namespace, &name, &route_key).await;
    }

    let by_target = resolve_request(&ctx, &namespace, &name).await?;
    if by_target.is_empty() {
        return Ok(Action::await_change());
    }

    for (target_ref, details) in &by_target {
        if details.matched_listeners.is_empty() {
            reject_no_matching_parent(&ctx, &namespace, &name, target_ref, generation).await?;
        } else {
            accept_route(&ctx, &namespace, &name, target_ref, generation).await?;
        }
    }

    let known_backends = match resolve_backend_refs(&ctx.client, &route).await {
        Ok(backends) => backends,
        Err(Error::Status(status_err)) => {
            for target_ref in by_target.keys() {
                fail_resolved_refs(&ctx, &namespace, &name, target_ref, generation, &status_err).await?;
            }
            return Ok(Action::requeue(Duration::from_secs(30)));
        }
        Err(err) => return Err(err),
    };

    let mut first_error = None;
    for (target_ref, details) in &by_target {
        if details.matched_listeners.is_empty() {
            continue;
        }
        if !is_programming_required(&details.http_route, target_ref) {
            continue;
        }

        let input = ProgramRouteInput {
            details,
            known_backends: &known_backends,
        };
        match program_route(&ctx, &input).await {
            Ok(rule_names) => {
                let lb_id = &details.gateway_details.config.spec.load_balancer_id;
                for (key, service) in &known_backends {
                    let (svc_namespace, svc_name) = key.split_once('/').unwrap_or(("", key.as_str()));
                    let derived_name = backend_set_name(svc_namespace, svc_name);
                    let port = first_service_port(service);
                    let target = BackendSetEndpoints {
                        backend_set_name: &derived_name,
                        service_namespace: svc_namespace,
                        service_name: svc_name,
                        port,
                    };
                    sync_route_endpoints(&ctx.client, ctx.cloud.as_ref(), &ctx.cancellation, lb_id, &target).await?;
                }
                set_programmed(&ctx, &namespace, &name, target_ref, generation, &rule_names).await?;
                ctx.route_index.reindex(&route_key, known_backends.keys().cloned());
            }
            Err(Error::Status(status_err)) => {
                fail_resolved_refs(&ctx, &namespace, &name, target_ref, generation, &status_err).await?;
            }
            Err(err) => {
                first_error.get_or_insert(err);
            }
        }
    }

    if let Some(err) = first_error {
        return Err(err);
    }

    info!(route = %name, "reconciled HTTPRoute");
    Ok(Action::requeue(Duration::from_secs(300)))
}

fn first_service_port(service: &k8s_openapi::api::core::v1::Service) -> i32 {
    service
        .spec
        .as_ref()
        .and_then(|s| s.ports.as_ref())
        .and_then(|ports| ports.first())
        .map(|p| p.port)
        .unwrap_or(80)
}

/// Runs the finalizer-gated deprovision pipeline (§3 ownership/lifecycle,
/// §4.4 `deprovisionRoute`, §8 scenario 7): retracts this route's owned
/// rules and backend-sets before letting the finalizer go.
async fn handle_deletion(ctx: &Context, namespace: &str, name: &str, route_key: &NamespacedName) -> Result<Action, Error> {
    let routes: Api<HTTPRoute> = Api::namespaced(ctx.client.clone(), namespace);
    let Some(route) = get_opt(&routes, name).await? else {
        ctx.route_index.remove(route_key);
        return Ok(Action::await_change());
    };

    let finalizer = crate::consts::programmed_finalizer();
    if !route.finalizers().contains(&finalizer) {
        ctx.route_index.remove(route_key);
        return Ok(Action::await_change());
    }

    let by_target = resolve_request(ctx, namespace, name).await?;
    for details in by_target.values() {
        deprovision_route(ctx, details).await?;
    }
    // A route whose gateway is already gone still needs its backend-sets
    // retracted on whatever load balancer it was last programmed against;
    // that bookkeeping lives on the annotation/status, not on a live
    // gateway, so nothing further is needed when `by_target` is empty.

    ctx.route_index.remove(route_key);

    let mut finalizers = route.finalizers().to_vec();
    finalizers.retain(|f| f != &finalizer);
    let patch = serde_json::json!({ "metadata": { "finalizers": finalizers } });
    routes.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch)).await?;

    info!(route = %name, "deprovisioned HTTPRoute ahead of deletion");
    Ok(Action::await_change())
}

fn error_policy(_route: Arc<HTTPRoute>, error: &Error, _ctx: Arc<Context>) -> Action {
    warn!(error = %error, "httproute reconcile failed");
    if error.is_retriable() {
        Action::requeue(Duration::from_secs(5))
    } else {
        // Non-retriable: hammering the cloud API every 5s won't help. Fall
        // back to the steady-state cadence so an external fix still gets
        // picked up eventually.
        Action::requeue(Duration::from_secs(300))
    }
}

pub async fn run(ctx: Context) -> Result<(), Error> {
    let routes = Api::<HTTPRoute>::all(ctx.client.clone());
    routes.list(&Default::default()).await.map_err(Error::CrdNotFoundError)?;

    let endpoint_slices = Api::<EndpointSlice>::all(ctx.client.clone());
    let secrets = Api::<Secret>::all(ctx.client.clone());
    let route_index = ctx.route_index.clone();

    Controller::new(routes, Config::default())
        .shutdown_on_signal()
        .watches(endpoint_slices, Config::default(), map_endpointslice_to_httproute(route_index))
        .watches(secrets, Config::default(), |_: Secret| {
            // Secret changes matter to Gateways (certificate material), not
            // routes directly; HTTPRoutes re-reconcile once the Gateway they
            // depend on re-programs and bumps its own state. Kept as an
            // explicit no-op watch rather than silently dropped, so the
            // intent is visible next to the Gateway-side watch in §4.7.
            Vec::<kube::runtime::reflector::ObjectRef<HTTPRoute>>::new()
        })
        .run(reconcile, error_policy, Arc::new(ctx))
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}
