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

use std::collections::HashSet;

use gateway_api::apis::standard::gateways::{GatewaySpecListeners, GatewaySpecListenersProtocol};
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cloud::{BackendSet, CertificateRef, HealthChecker, Listener, LoadBalancerAdapter, RoutingPolicy};
use crate::cloud::names::default_backend_set_name;
use crate::consts::{
    BACKEND_SET_POLICY, DEFAULT_CATCH_ALL_RULE, GATEWAY_CONDITION_PROGRAMMED, HEALTH_CHECK_PROTOCOL, REASON_INVALID_PARAMETERS,
};
use crate::errors::{Error, ReconcileError, ResourceStatusError};
use crate::gateway::resolver::ResolvedGatewayDetails;
use crate::resources::get_opt;
use crate::Context;

/// Programs a Gateway's load balancer state (§4.3 `programGateway`): the
/// default backend-set, one cloud listener + dedicated routing policy per
/// spec listener, and prunes cloud listeners no longer in spec.
pub async fn program_gateway(ctx: &Context, details: &ResolvedGatewayDetails) -> Result<(), Error> {
    let lb_id = &details.config.spec.load_balancer_id;
    let gateway_name = details.gateway.name_any();
    let gateway_namespace = details.gateway.namespace().unwrap_or_default();
    let cloud = ctx.cloud.as_ref();

    let current = cloud.get_load_balancer(lb_id).await.map_err(ReconcileError::from)?;

    let default_backend_set = default_backend_set_name(&gateway_name);
    ensure_default_backend_set(cloud, &ctx.cancellation, lb_id, &default_backend_set, &current).await?;

    let mut errors = Vec::new();
    let spec_listener_names: HashSet<String> = details.gateway.spec.listeners.iter().map(|l| l.name.clone()).collect();

    for listener in &details.gateway.spec.listeners {
        if current.listeners.iter().any(|l| l.name == listener.name) {
            continue;
        }
        let certificates = match listener.protocol {
            GatewaySpecListenersProtocol::Https => resolve_certificates(ctx, &gateway_namespace, listener).await,
            _ => Ok(Vec::new()),
        };
        let certificates = match certificates {
            Ok(certificates) => certificates,
            Err(err) => {
                errors.push(err);
                continue;
            }
        };
        if let Err(err) = ensure_listener(cloud, &ctx.cancellation, lb_id, &default_backend_set, listener, certificates).await {
            errors.push(err);
        }
    }

    for cloud_listener in &current.listeners {
        if !spec_listener_names.contains(&cloud_listener.name) {
            if let Err(err) = prune_listener(cloud, &ctx.cancellation, lb_id, cloud_listener).await {
                errors.push(err);
            }
        }
    }

    if let Some(first) = errors.into_iter().next() {
        return Err(first);
    }
    Ok(())
}

async fn ensure_default_backend_set(
    cloud: &dyn LoadBalancerAdapter,
    cancel: &CancellationToken,
    lb_id: &str,
    name: &str,
    current: &crate::cloud::LoadBalancer,
) -> Result<(), Error> {
    if current.backend_sets.iter().any(|b| b.name == name) {
        return Ok(());
    }
    let spec = BackendSet {
        name: name.to_string(),
        policy: BACKEND_SET_POLICY.to_string(),
        health_checker: HealthChecker {
            protocol: HEALTH_CHECK_PROTOCOL.to_string(),
            port: 80,
        },
        backends: Vec::new(),
        ssl_config: None,
        session_persistence_config: None,
    };
    let work_request = cloud.create_backend_set(lb_id, &spec).await.map_err(ReconcileError::from)?;
    cloud.wait_for(&work_request, cancel).await.map_err(ReconcileError::from)?;
    Ok(())
}

async fn ensure_listener(
    cloud: &dyn LoadBalancerAdapter,
    cancel: &CancellationToken,
    lb_id: &str,
    default_backend_set: &str,
    listener: &GatewaySpecListeners,
    certificates: Vec<CertificateRef>,
) -> Result<(), Error> {
    let policy_name = format!("{}_policy", listener.name);
    let policy = RoutingPolicy {
        name: policy_name.clone(),
        rules: vec![crate::cloud::RoutingRule {
            name: DEFAULT_CATCH_ALL_RULE.to_string(),
            condition: "any(true)".to_string(),
            actions: vec![crate::cloud::RuleAction {
                backend_set_name: default_backend_set.to_string(),
            }],
        }],
    };
    let work_request = cloud
        .create_routing_policy(lb_id, &listener.name, &policy)
        .await
        .map_err(ReconcileError::from)?;
    cloud.wait_for(&work_request, cancel).await.map_err(ReconcileError::from)?;

    let spec = Listener {
        name: listener.name.clone(),
        port: listener.port,
        protocol: protocol_name(listener.protocol).to_string(),
        default_backend_set_name: default_backend_set.to_string(),
        routing_policy_name: Some(policy_name),
        certificates,
    };
    let work_request = cloud.create_listener(lb_id, &spec).await.map_err(ReconcileError::from)?;
    cloud.wait_for(&work_request, cancel).await.map_err(ReconcileError::from)?;
    info!(listener = %listener.name, "created cloud listener");
    Ok(())
}

fn protocol_name(protocol: GatewaySpecListenersProtocol) -> &'static str {
    match protocol {
        GatewaySpecListenersProtocol::Http => "HTTP",
        GatewaySpecListenersProtocol::Https => "HTTPS",
        _ => "HTTP",
    }
}

async fn resolve_certificates(
    ctx: &Context,
    gateway_namespace: &str,
    listener: &gateway_api::apis::standard::gateways::GatewaySpecListeners,
) -> Result<Vec<CertificateRef>, Error> {
    let Some(tls) = &listener.tls else {
        return Err(ResourceStatusError::new(
            GATEWAY_CONDITION_PROGRAMMED,
            REASON_INVALID_PARAMETERS,
            format!("listener {} is HTTPS but carries no tls block", listener.name),
        )
        .into());
    };
    let refs = tls.certificate_refs.clone().unwrap_or_default();
    if refs.is_empty() {
        return Err(ResourceStatusError::new(
            GATEWAY_CONDITION_PROGRAMMED,
            REASON_INVALID_PARAMETERS,
            format!("listener {} is HTTPS but references no certificates", listener.name),
        )
        .into());
    }

    let secrets: Api<Secret> = Api::namespaced(ctx.client.clone(), gateway_namespace);
    let mut certificates = Vec::with_capacity(refs.len());
    for certificate_ref in refs {
        let secret = get_opt(&secrets, &certificate_ref.name)
            .await?
            .ok_or_else(|| {
                Error::from(ResourceStatusError::new(
                    GATEWAY_CONDITION_PROGRAMMED,
                    REASON_INVALID_PARAMETERS,
                    format!("certificate secret {} not found", certificate_ref.name),
                ))
            })?;
        let data = secret.data.unwrap_or_default();
        let cert = data.get("tls.crt").ok_or_else(|| {
            Error::from(ResourceStatusError::new(GATEWAY_CONDITION_PROGRAMMED, REASON_INVALID_PARAMETERS, "secret missing tls.crt"))
        })?;
        let key = data.get("tls.key").ok_or_else(|| {
            Error::from(ResourceStatusError::new(GATEWAY_CONDITION_PROGRAMMED, REASON_INVALID_PARAMETERS, "secret missing tls.key"))
        })?;
        certificates.push(CertificateRef {
            name: certificate_ref.name.clone(),
            certificate_pem: String::from_utf8_lossy(&cert.0).to_string(),
            private_key_pem: String::from_utf8_lossy(&key.0).to_string(),
        });
    }
    Ok(certificates)
}

async fn prune_listener(cloud: &dyn LoadBalancerAdapter, cancel: &CancellationToken, lb_id: &str, cloud_listener: &Listener) -> Result<(), Error> {
    warn!(listener = %cloud_listener.name, "pruning listener no longer present in spec");
    let work_request = cloud.delete_listener(lb_id, &cloud_listener.name).await.map_err(ReconcileError::from)?;
    cloud.wait_for(&work_request, cancel).await.map_err(ReconcileError::from)?;

    if let Some(policy_name) = &cloud_listener.routing_policy_name {
        let listener_name = policy_name.trim_end_matches("_policy");
        if get_routing_policy_exists(cloud, lb_id, listener_name).await? {
            let work_request = cloud.delete_routing_policy(lb_id, listener_name).await.map_err(ReconcileError::from)?;
            cloud.wait_for(&work_request, cancel).await.map_err(ReconcileError::from)?;
        }
    }
    Ok(())
}

async fn get_routing_policy_exists(cloud: &dyn LoadBalancerAdapter, lb_id: &str, listener_name: &str) -> Result<bool, Error> {
    let name = listener_name.trim_end_matches("_policy");
    Ok(cloud.get_routing_policy(lb_id, name).await.map_err(ReconcileError::from)?.is_some())
}

#[cfg(test)]
mod tests {
    use mockall::predicate::eq;

    use super::*;
    use crate::cloud::{LoadBalancer, MockLoadBalancerAdapter, WorkRequestId};

    fn empty_load_balancer() -> LoadBalancer {
        LoadBalancer {
            id: "lb-1".to_string(),
            backend_sets: Vec::new(),
            listeners: Vec::new(),
            routing_policies: Vec::new(),
        }
    }

    #[tokio::test]
    async fn ensure_default_backend_set_is_a_noop_when_already_present() {
        let mut mock = MockLoadBalancerAdapter::new();
        // No `expect_*` calls set up: any cloud call would panic the mock.
        let mut current = empty_load_balancer();
        current.backend_sets.push(BackendSet {
            name: "gw1-default".to_string(),
            policy: BACKEND_SET_POLICY.to_string(),
            health_checker: HealthChecker {
                protocol: HEALTH_CHECK_PROTOCOL.to_string(),
                port: 80,
            },
            backends: Vec::new(),
            ssl_config: None,
            session_persistence_config: None,
        });

        ensure_default_backend_set(&mock, &CancellationToken::new(), "lb-1", "gw1-default", &current)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn ensure_default_backend_set_creates_and_awaits_when_absent() {
        let mut mock = MockLoadBalancerAdapter::new();
        mock.expect_create_backend_set()
            .with(eq("lb-1"), mockall::predicate::function(|spec: &BackendSet| spec.name == "gw1-default"))
            .times(1)
            .returning(|_, _| Ok(WorkRequestId("wr-1".to_string())));
        mock.expect_wait_for()
            .with(eq(WorkRequestId("wr-1".to_string())), mockall::predicate::always())
            .times(1)
            .returning(|_, _| Ok(()));

        ensure_default_backend_set(&mock, &CancellationToken::new(), "lb-1", "gw1-default", &empty_load_balancer())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn prune_listener_deletes_listener_and_its_policy_when_both_exist() {
        let mut mock = MockLoadBalancerAdapter::new();
        mock.expect_delete_listener()
            .with(eq("lb-1"), eq("stale"))
            .times(1)
            .returning(|_, _| Ok(WorkRequestId("wr-listener".to_string())));
        mock.expect_get_routing_policy()
            .with(eq("lb-1"), eq("stale"))
            .times(1)
            .returning(|_, _| {
                Ok(Some(RoutingPolicy {
                    name: "stale_policy".to_string(),
                    rules: Vec::new(),
                }))
            });
        mock.expect_delete_routing_policy()
            .with(eq("lb-1"), eq("stale"))
            .times(1)
            .returning(|_, _| Ok(WorkRequestId("wr-policy".to_string())));
        mock.expect_wait_for().times(2).returning(|_, _| Ok(()));

        let cloud_listener = Listener {
            name: "stale".to_string(),
            port: 8080,
            protocol: "HTTP".to_string(),
            default_backend_set_name: "gw1-default".to_string(),
            routing_policy_name: Some("stale_policy".to_string()),
            certificates: Vec::new(),
        };
        prune_listener(&mock, &CancellationToken::new(), "lb-1", &cloud_listener).await.unwrap();
    }

    #[tokio::test]
    async fn prune_listener_skips_policy_delete_when_already_gone() {
        let mut mock = MockLoadBalancerAdapter::new();
        mock.expect_delete_listener().returning(|_, _| Ok(WorkRequestId("wr-listener".to_string())));
        mock.expect_get_routing_policy().returning(|_, _| Ok(None));
        mock.expect_wait_for().times(1).returning(|_, _| Ok(()));
        // No `expect_delete_routing_policy`: a second policy delete would panic the mock.

        let cloud_listener = Listener {
            name: "stale".to_string(),
            port: 8080,
            protocol: "HTTP".to_string(),
            default_backend_set_name: "gw1-default".to_string(),
            routing_policy_name: Some("stale_policy".to_string()),
            certificates: Vec::new(),
        };
        prune_listener(&mock, &CancellationToken::new(), "lb-1", &cloud_listener).await.unwrap();
    }
}
