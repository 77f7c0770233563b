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

//! GatewayClass reconciler: accepts, once, every class naming this binary's
//! controller, and otherwise leaves no trace (§8 scenario 1-2).

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use gateway_api::apis::standard::gatewayclasses::GatewayClass;
use kube::api::{Patch, PatchParams};
use kube::runtime::{controller::Action, watcher::Config, Controller};
use kube::{Api, Resource, ResourceExt};
use tracing::warn;

use crate::consts::{controller_class_name, GATEWAY_CONDITION_ACCEPTED, REASON_ACCEPTED};
use crate::errors::Error;
use crate::resources::{is_condition_set, set_condition, CONDITION_TRUE};
use crate::Context;

async fn reconcile(gateway_class: Arc<GatewayClass>, ctx: Arc<Context>) -> Result<Action, Error> {
    if gateway_class.spec.controller_name != controller_class_name() {
        return Ok(Action::await_change());
    }

    let name = gateway_class.name_any();
    let generation = gateway_class.meta().generation.unwrap_or(0);
    let current_conditions = gateway_class
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_deref())
        .unwrap_or_default();

    if is_condition_set(current_conditions, GATEWAY_CONDITION_ACCEPTED, CONDITION_TRUE, REASON_ACCEPTED, generation, None) {
        return Ok(Action::requeue(Duration::from_secs(300)));
    }

    let api: Api<GatewayClass> = Api::all(ctx.client.clone());
    let mut live = api.get(&name).await?;
    let status = live.status.get_or_insert_with(Default::default);
    let conditions = status.conditions.get_or_insert_with(Vec::new);
    set_condition(
        conditions,
        GATEWAY_CONDITION_ACCEPTED,
        CONDITION_TRUE,
        REASON_ACCEPTED,
        "controller accepts this GatewayClass",
        generation,
    );

    let patch = serde_json::json!({ "status": { "conditions": conditions } });
    api.patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch)).await?;

    Ok(Action::requeue(Duration::from_secs(300)))
}

fn error_policy(_gateway_class: Arc<GatewayClass>, error: &Error, _ctx: Arc<Context>) -> Action {
    warn!(error = %error, "gatewayclass reconcile failed");
    if error.is_retriable() {
        Action::requeue(Duration::from_secs(5))
    } else {
        // Non-retriable: hammering the API server every 5s won't help. Fall
        // back to the steady-state cadence so an external fix still gets
        // picked up eventually.
        Action::requeue(Duration::from_secs(300))
    }
}

pub async fn run(ctx: Context) -> Result<(), Error> {
    let gateway_classes = Api::<GatewayClass>::all(ctx.client.clone());
    gateway_classes.list(&Default::default()).await.map_err(Error::CrdNotFoundError)?;

    Controller::new(gateway_classes, Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, Arc::new(ctx))
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}
