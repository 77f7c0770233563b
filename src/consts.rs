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

/// Annotation/finalizer domain this binary claims.
pub const DOMAIN: &str = "gatewaylb.io";

/// This binary's controller name, joined with `DOMAIN` to form the
/// `controllerName` string GatewayClasses must carry to be reconciled.
pub const CONTROLLER_NAME: &str = "controller";

/// Full `"<domain>/<controller-name>"` literal. Case-sensitive, exact match
/// against `GatewayClass.spec.controllerName`.
pub fn controller_class_name() -> String {
    format!("{DOMAIN}/{CONTROLLER_NAME}")
}

/// Field manager used for all server-side apply patches.
pub const FIELD_MANAGER: &str = "gatewaylb-controller";

/// Opaque version token bumped whenever the programming algorithm changes in a
/// way that requires re-programming already-`Programmed` objects.
pub const PROGRAMMING_REVISION: &str = "v1";

pub fn programming_revision_annotation() -> String {
    format!("{DOMAIN}/programming-revision")
}

pub fn programmed_policy_rules_annotation() -> String {
    format!("{DOMAIN}/programmed-policy-rules")
}

pub fn programmed_finalizer() -> String {
    format!("{DOMAIN}/programmed")
}

/// Label EndpointSlices carry pointing back at the Service they belong to.
pub const ENDPOINTSLICE_SERVICE_NAME_LABEL: &str = "kubernetes.io/service-name";

/// Reserved routing-rule name that always sorts last in a policy.
pub const DEFAULT_CATCH_ALL_RULE: &str = "default_catch_all";

/// Health check protocol used for every backend-set this controller creates.
pub const HEALTH_CHECK_PROTOCOL: &str = "TCP";

/// Load balancing policy used for every backend-set this controller creates.
pub const BACKEND_SET_POLICY: &str = "ROUND_ROBIN";

/// Cloud naming limits: backend-set, listener and routing-policy names share
/// this ceiling (derived from the target cloud API's resource name limit).
pub const MAX_CLOUD_NAME_LEN: usize = 32;

pub const GATEWAY_CONDITION_ACCEPTED: &str = "Accepted";
pub const GATEWAY_CONDITION_PROGRAMMED: &str = "Programmed";

pub const ROUTE_CONDITION_ACCEPTED: &str = "Accepted";
pub const ROUTE_CONDITION_RESOLVED_REFS: &str = "ResolvedRefs";

pub const REASON_ACCEPTED: &str = "Accepted";
pub const REASON_PROGRAMMED: &str = "Programmed";
pub const REASON_INVALID_PARAMETERS: &str = "InvalidParameters";
pub const REASON_RESOLVED_REFS: &str = "ResolvedRefs";
pub const REASON_INVALID_BACKEND: &str = "InvalidBackendRef";
pub const REASON_NO_MATCHING_PARENT: &str = "NoMatchingParent";
