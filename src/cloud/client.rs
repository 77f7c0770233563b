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

//! The one real [`LoadBalancerAdapter`]: a REST client over the cloud load
//! balancer's control plane, built on `reqwest`/`reqwest-middleware` so every
//! request is traced the same way the rest of the controller's I/O is.

use std::time::Duration;

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use reqwest::StatusCode;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_tracing::TracingMiddleware;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::{
    BackendSet, CloudError, CloudResult, Listener, LoadBalancer, LoadBalancerAdapter, RoutingPolicy, WorkRequestId,
    WorkRequestState,
};

pub struct HttpLoadBalancerAdapter {
    client: ClientWithMiddleware,
    base_url: String,
    work_request_timeout: Duration,
}

impl HttpLoadBalancerAdapter {
    pub fn new(base_url: impl Into<String>, bearer_token: Option<&str>, work_request_timeout: Duration) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(30));
        if let Some(token) = bearer_token {
            let mut headers = reqwest::header::HeaderMap::new();
            let mut value = reqwest::header::HeaderValue::from_str(&format!("Bearer {token}"))?;
            value.set_sensitive(true);
            headers.insert(reqwest::header::AUTHORIZATION, value);
            builder = builder.default_headers(headers);
        }
        let inner = builder.build()?;
        let client = ClientBuilder::new(inner).with(TracingMiddleware::default()).build();
        Ok(Self {
            client,
            base_url: base_url.into(),
            work_request_timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> CloudResult<Option<T>> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| CloudError::Transport(e.to_string()))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = error_for_status(response).await?;
        response
            .json::<T>()
            .await
            .map(Some)
            .map_err(|e| CloudError::Transport(e.to_string()))
    }

    async fn mutate<B: Serialize + ?Sized>(&self, method: reqwest::Method, path: &str, body: &B) -> CloudResult<WorkRequestId> {
        let response = self
            .client
            .request(method, self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| CloudError::Transport(e.to_string()))?;
        let response = error_for_status(response).await?;
        let work_request_id = response
            .headers()
            .get("opc-work-request-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| CloudError::Transport("response carried no work request id".into()))?;
        Ok(WorkRequestId(work_request_id))
    }

    async fn delete(&self, path: &str) -> CloudResult<WorkRequestId> {
        self.mutate(reqwest::Method::DELETE, path, &json!({})).await
    }
}

async fn error_for_status(response: reqwest::Response) -> CloudResult<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(CloudError::Transport(format!("cloud API returned {status}: {body}")))
}

#[derive(serde::Deserialize)]
struct WorkRequestStatusResponse {
    status: String,
}

fn parse_state(status: &str) -> WorkRequestState {
    match status {
        "ACCEPTED" => WorkRequestState::Accepted,
        "IN_PROGRESS" => WorkRequestState::InProgress,
        "SUCCEEDED" => WorkRequestState::Succeeded,
        _ => WorkRequestState::Failed,
    }
}

#[async_trait]
impl LoadBalancerAdapter for HttpLoadBalancerAdapter {
    async fn get_load_balancer(&self, id: &str) -> CloudResult<LoadBalancer> {
        self.get(&format!("/loadBalancers/{id}"))
            .await?
            .ok_or(CloudError::NotFound)
    }

    async fn get_backend_set(&self, lb_id: &str, name: &str) -> CloudResult<Option<BackendSet>> {
        self.get(&format!("/loadBalancers/{lb_id}/backendSets/{name}")).await
    }

    async fn create_backend_set(&self, lb_id: &str, spec: &BackendSet) -> CloudResult<WorkRequestId> {
        self.mutate(reqwest::Method::POST, &format!("/loadBalancers/{lb_id}/backendSets"), spec)
            .await
    }

    async fn update_backend_set(&self, lb_id: &str, spec: &BackendSet) -> CloudResult<WorkRequestId> {
        self.mutate(
            reqwest::Method::PUT,
            &format!("/loadBalancers/{lb_id}/backendSets/{}", spec.name),
            spec,
        )
        .await
    }

    async fn delete_backend_set(&self, lb_id: &str, name: &str) -> CloudResult<WorkRequestId> {
        self.delete(&format!("/loadBalancers/{lb_id}/backendSets/{name}")).await
    }

    async fn create_listener(&self, lb_id: &str, spec: &Listener) -> CloudResult<WorkRequestId> {
        self.mutate(reqwest::Method::POST, &format!("/loadBalancers/{lb_id}/listeners"), spec)
            .await
    }

    async fn delete_listener(&self, lb_id: &str, name: &str) -> CloudResult<WorkRequestId> {
        self.delete(&format!("/loadBalancers/{lb_id}/listeners/{name}")).await
    }

    async fn get_routing_policy(&self, lb_id: &str, listener_name: &str) -> CloudResult<Option<RoutingPolicy>> {
        self.get(&format!("/loadBalancers/{lb_id}/routingPolicies/{listener_name}")).await
    }

    async fn create_routing_policy(&self, lb_id: &str, listener_name: &str, spec: &RoutingPolicy) -> CloudResult<WorkRequestId> {
        self.mutate(
            reqwest::Method::POST,
            &format!("/loadBalancers/{lb_id}/routingPolicies/{listener_name}"),
            spec,
        )
        .await
    }

    async fn update_routing_policy(&self, lb_id: &str, listener_name: &str, spec: &RoutingPolicy) -> CloudResult<WorkRequestId> {
        self.mutate(
            reqwest::Method::PUT,
            &format!("/loadBalancers/{lb_id}/routingPolicies/{listener_name}"),
            spec,
        )
        .await
    }

    async fn delete_routing_policy(&self, lb_id: &str, listener_name: &str) -> CloudResult<WorkRequestId> {
        self.delete(&format!("/loadBalancers/{lb_id}/routingPolicies/{listener_name}")).await
    }

    async fn wait_for(&self, id: &WorkRequestId, cancel: &CancellationToken) -> CloudResult<()> {
        let mut backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(500))
            .with_max_interval(Duration::from_secs(10))
            .with_max_elapsed_time(Some(self.work_request_timeout))
            .build();

        loop {
            if cancel.is_cancelled() {
                return Err(CloudError::Cancelled);
            }

            let status: Option<WorkRequestStatusResponse> = self.get(&format!("/workRequests/{}", id.0)).await?;
            let state = status.map(|s| parse_state(&s.status)).unwrap_or(WorkRequestState::InProgress);

            match state {
                WorkRequestState::Succeeded => return Ok(()),
                WorkRequestState::Failed => return Err(CloudError::WorkRequestFailed(id.0.clone())),
                WorkRequestState::Accepted | WorkRequestState::InProgress => {}
            }

            let delay = backoff
                .next_backoff()
                .ok_or_else(|| CloudError::WorkRequestFailed(format!("{} timed out waiting for completion", id.0)))?;

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(CloudError::Cancelled),
            }
        }
    }
}
