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

use gateway_api::apis::standard::gatewayclasses::GatewayClass;
use gateway_api::apis::standard::gateways::Gateway;
use kube::{Api, ResourceExt};

use crate::consts::{controller_class_name, GATEWAY_CONDITION_ACCEPTED, REASON_INVALID_PARAMETERS};
use crate::crd::GatewayConfig;
use crate::errors::{Error, ResourceStatusError};
use crate::resources::get_opt;
use crate::{Context, NamespaceName};

#[derive(Clone)]
pub struct ResolvedGatewayDetails {
    pub gateway: Gateway,
    pub gateway_class: GatewayClass,
    pub config: GatewayConfig,
}

/// Resolves a Gateway reconcile request down to the fully-joined record the
/// programmer needs (§4.3 step 1-5). `Ok(None)` means the request is not
/// relevant to this controller (the object is gone, or its class belongs to
/// someone else) and the caller should return cleanly without writing
/// anything.
pub async fn resolve_reconcile_request(ctx: &Context, namespace: &str, name: &str) -> Result<Option<ResolvedGatewayDetails>, Error> {
    let gateways: Api<Gateway> = Api::namespaced(ctx.client.clone(), namespace);
    let Some(gateway) = get_opt(&gateways, name).await? else {
        return Ok(None);
    };

    let class_name = gateway.spec.gateway_class_name.clone();
    let gateway_classes: Api<GatewayClass> = Api::all(ctx.client.clone());
    let Some(gateway_class) = get_opt(&gateway_classes, &class_name).await? else {
        return Ok(None);
    };
    if gateway_class.spec.controller_name != controller_class_name() {
        return Ok(None);
    }

    let Some(infra) = gateway.spec.infrastructure.as_ref() else {
        return Err(ResourceStatusError::new(
            GATEWAY_CONDITION_ACCEPTED,
            REASON_INVALID_PARAMETERS,
            "spec.infrastructure.parametersRef is required",
        )
        .into());
    };
    let Some(parameters_ref) = infra.parameters_ref.as_ref() else {
        return Err(ResourceStatusError::new(
            GATEWAY_CONDITION_ACCEPTED,
            REASON_INVALID_PARAMETERS,
            "spec.infrastructure.parametersRef is required",
        )
        .into());
    };

    let configs: Api<GatewayConfig> = Api::namespaced(ctx.client.clone(), gateway.namespace().unwrap_or(namespace));
    let config = configs.get(&parameters_ref.name).await?;

    Ok(Some(ResolvedGatewayDetails { gateway, gateway_class, config }))
}
