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

pub mod cloud;
pub mod config;
pub mod consts;
pub mod crd;
pub mod endpoints;
pub mod errors;
pub mod gateway;
pub mod gatewayclass_controller;
pub mod httproute;
pub mod resources;
pub mod routing;
pub mod telemetry;
pub mod watches;

use std::fmt::{Debug, Display, Formatter};

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Client;
use tokio_util::sync::CancellationToken;

pub use errors::{Error, ReconcileError, Result};
use watches::{GatewayIndex, RouteIndex};

/// Context threaded through every reconciler. Cheap to clone: `Client`, the
/// cloud adapter and the watch indexes are themselves handles over shared
/// state.
#[derive(Clone)]
pub struct Context {
    pub client: Client,
    pub cloud: std::sync::Arc<dyn cloud::LoadBalancerAdapter>,
    pub cancellation: CancellationToken,
    /// `HTTPRoute[backendRefs.serviceName] -> routes` (§4.7).
    pub route_index: RouteIndex,
    /// `Gateway[certificateSecret] -> gateways` (§4.7).
    pub gateway_index: GatewayIndex,
}

impl Context {
    pub fn new(client: Client, cloud: std::sync::Arc<dyn cloud::LoadBalancerAdapter>, cancellation: CancellationToken) -> Self {
        Self {
            client,
            cloud,
            cancellation,
            route_index: RouteIndex::new(),
            gateway_index: GatewayIndex::new(),
        }
    }
}

#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

impl NamespacedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl Display for NamespacedName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl Debug for NamespacedName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

pub trait NamespaceName {
    fn namespace(&self) -> Result<&str>;
    fn name(&self) -> Result<&str>;
    fn namespaced_name(&self) -> Result<NamespacedName>;
}

impl NamespaceName for ObjectMeta {
    fn namespace(&self) -> Result<&str> {
        self.namespace.as_deref().ok_or(Error::MissingResourceNamespace)
    }

    fn name(&self) -> Result<&str> {
        self.name.as_deref().ok_or(Error::MissingResourceName)
    }

    fn namespaced_name(&self) -> Result<NamespacedName> {
        Ok(NamespacedName::new(self.namespace()?, self.name()?))
    }
}

/// A `parentRef` stripped of `sectionName` and `port`: the key HTTPRoute per-parent
/// status is addressed by (invariant 5 in the data model).
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct TargetOnlyParentRef {
    pub group: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}
