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

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use gateway_api::apis::standard::gateways::{Gateway, GatewaySpecListenersProtocol};
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Patch, PatchParams};
use kube::runtime::{controller::Action, watcher::Config, Controller};
use kube::{Api, Resource, ResourceExt};
use tracing::{info, warn};

use crate::consts::{
    controller_class_name, programming_revision_annotation, GATEWAY_CONDITION_ACCEPTED, GATEWAY_CONDITION_PROGRAMMED,
    PROGRAMMING_REVISION, REASON_ACCEPTED, REASON_PROGRAMMED,
};
use crate::errors::{Error, ResourceStatusError};
use crate::gateway::resolver::ResolvedGatewayDetails;
use crate::gateway::{programmer::program_gateway, resolver::resolve_reconcile_request};
use crate::resources::{is_condition_set, set_condition, CONDITION_FALSE, CONDITION_TRUE};
use crate::watches::map_secret_to_gateway;
use crate::{Context, NamespacedName};

pub async fn reconcile(gateway: Arc<Gateway>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = gateway.name_any();
    let namespace = gateway.namespace().ok_or(Error::MissingResourceNamespace)?;
    let generation = gateway.meta().generation.unwrap_or(0);

    let details = match resolve_reconcile_request(&ctx, &namespace, &name).await {
        Ok(Some(details)) => details,
        Ok(None) => return Ok(Action::await_change()),
        Err(Error::Status(status_err)) => {
            write_accepted_condition(&ctx, &namespace, &name, generation, Some(&status_err)).await?;
            return Ok(Action::await_change());
        }
        Err(err) => return Err(err),
    };

    let gateways: Api<Gateway> = Api::namespaced(ctx.client.clone(), &namespace);
    let mut annotations = details.gateway.annotations().clone();
    if annotations.get(&controller_class_name()).map(String::as_str) != Some("true") {
        annotations.insert(controller_class_name(), "true".to_string());
        patch_annotations(&gateways, &name, &annotations).await?;
    }

    // Only index a gateway once it carries the `{controllerClassName: "true"}`
    // annotation (§4.7): a gateway this controller doesn't own never fans out.
    let gateway_key = NamespacedName::new(&namespace, &name);
    ctx.gateway_index.reindex(&gateway_key, certificate_secret_keys(&details));

    let current_conditions = details
        .gateway
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_deref())
        .unwrap_or_default();
    if !is_condition_set(current_conditions, GATEWAY_CONDITION_ACCEPTED, CONDITION_TRUE, REASON_ACCEPTED, generation, None) {
        write_accepted_condition(&ctx, &namespace, &name, generation, None).await?;
    }

    if !is_programming_required(current_conditions, &details.gateway, generation) {
        return Ok(Action::requeue(Duration::from_secs(300)));
    }

    match program_gateway(&ctx, &details).await {
        Ok(()) => {
            write_programmed_condition(&ctx, &namespace, &name, generation, None).await?;
            info!(gateway = %name, "programmed gateway");
        }
        Err(Error::Status(status_err)) => {
            write_programmed_condition(&ctx, &namespace, &name, generation, Some(&status_err)).await?;
        }
        Err(err) => return Err(err),
    }

    Ok(Action::requeue(Duration::from_secs(300)))
}

/// True iff the gateway hasn't been programmed at its current generation, or
/// the programming-revision annotation doesn't match this binary's constant
/// (§4.3: `observedGeneration` and the revision token are both required to
/// skip re-programming).
fn is_programming_required(current_conditions: &[k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition], gateway: &Gateway, generation: i64) -> bool {
    let revision_annotation = programming_revision_annotation();
    !is_condition_set(
        current_conditions,
        GATEWAY_CONDITION_PROGRAMMED,
        CONDITION_TRUE,
        REASON_PROGRAMMED,
        generation,
        Some((gateway.annotations(), &revision_annotation, PROGRAMMING_REVISION)),
    )
}

/// `"<ns>/<name>"` for every certificate reference across all HTTPS
/// listeners (§4.7 `Gateway[certificateSecret]` indexer).
fn certificate_secret_keys(details: &ResolvedGatewayDetails) -> Vec<String> {
    let namespace = details.gateway.namespace().unwrap_or_default();
    details
        .gateway
        .spec
        .listeners
        .iter()
        .filter(|listener| listener.protocol == GatewaySpecListenersProtocol::Https)
        .filter_map(|listener| listener.tls.as_ref())
        .flat_map(|tls| tls.certificate_refs.clone().unwrap_or_default())
        .map(|certificate_ref| format!("{namespace}/{}", certificate_ref.name))
        .collect()
}

async fn patch_annotations(api: &Api<Gateway>, name: &str, annotations: &std::collections::BTreeMap<String, String>) -> Result<(), Error> {
    let patch = serde_json::json!({ "metadata": { "annotations": annotations } });
    api.patch(name, &PatchParams::apply(crate::consts::FIELD_MANAGER), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

async fn write_accepted_condition(
    ctx: &Context,
    namespace: &str,
    name: &str,
    generation: i64,
    status_err: Option<&ResourceStatusError>,
) -> Result<(), Error> {
    let gateways: Api<Gateway> = Api::namespaced(ctx.client.clone(), namespace);
    let mut gateway = gateways.get(name).await?;
    let status = gateway.status.get_or_insert_with(Default::default);
    let conditions = status.conditions.get_or_insert_with(Vec::new);

    let (condition_status, reason, message) = match status_err {
        Some(err) => (CONDITION_FALSE, err.reason.as_str(), err.message.as_str()),
        None => (CONDITION_TRUE, REASON_ACCEPTED, "gateway accepted by this controller"),
    };
    set_condition(conditions, GATEWAY_CONDITION_ACCEPTED, condition_status, reason, message, generation);

    let patch = serde_json::json!({ "status": { "conditions": conditions } });
    gateways
        .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

async fn write_programmed_condition(
    ctx: &Context,
    namespace: &str,
    name: &str,
    generation: i64,
    status_err: Option<&ResourceStatusError>,
) -> Result<(), Error> {
    let gateways: Api<Gateway> = Api::namespaced(ctx.client.clone(), namespace);
    let mut gateway = gateways.get(name).await?;
    let status = gateway.status.get_or_insert_with(Default::default);
    let conditions = status.conditions.get_or_insert_with(Vec::new);

    let (condition_status, reason, message) = match status_err {
        Some(err) => (CONDITION_FALSE, err.reason.as_str(), err.message.as_str()),
        None => (CONDITION_TRUE, REASON_PROGRAMMED, "load balancer programmed"),
    };
    set_condition(conditions, GATEWAY_CONDITION_PROGRAMMED, condition_status, reason, message, generation);

    if status_err.is_none() {
        let mut annotations = gateway.annotations().clone();
        annotations.insert(programming_revision_annotation(), PROGRAMMING_REVISION.to_string());
        let annotations_patch = serde_json::json!({ "metadata": { "annotations": annotations } });
        gateways
            .patch(name, &PatchParams::apply(crate::consts::FIELD_MANAGER), &Patch::Merge(&annotations_patch))
            .await?;
    }

    let status_patch = serde_json::json!({ "status": { "conditions": conditions } });
    gateways
        .patch_status(name, &PatchParams::default(), &Patch::Merge(&status_patch))
        .await?;
    Ok(())
}

fn error_policy(_gateway: Arc<Gateway>, error: &Error, _ctx: Arc<Context>) -> Action {
    warn!(error = %error, "gateway reconcile failed");
    if error.is_retriable() {
        Action::requeue(Duration::from_secs(5))
    } else {
        // A non-retriable failure won't clear on its own; retrying it every
        // 5s just hammers the cloud API for nothing. Fall back to the
        // steady-state cadence so a later external fix is still picked up.
        Action::requeue(Duration::from_secs(300))
    }
}

pub async fn run(ctx: Context) -> Result<(), Error> {
    let gateways = Api::<Gateway>::all(ctx.client.clone());
    gateways.list(&Default::default()).await.map_err(Error::CrdNotFoundError)?;

    let secrets = Api::<Secret>::all(ctx.client.clone());
    let gateway_index = ctx.gateway_index.clone();

    Controller::new(gateways, Config::default())
        .shutdown_on_signal()
        .watches(secrets, Config::default(), map_secret_to_gateway(gateway_index))
        .run(reconcile, error_policy, Arc::new(ctx))
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}
