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

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Project-specific CRD resolved from a Gateway's
/// `spec.infrastructure.parametersRef`. Holds the single piece of
/// cloud-provider-specific configuration this controller needs: the id of the
/// pre-existing load balancer to program.
#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, PartialEq, JsonSchema)]
#[kube(
    group = "gatewaylb.io",
    version = "v1alpha1",
    kind = "GatewayConfig",
    namespaced,
    derive = "PartialEq"
)]
pub struct GatewayConfigSpec {
    /// Opaque id of the pre-existing cloud load balancer this Gateway programs.
    pub load_balancer_id: String,
}
