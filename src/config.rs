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

/// Process-level configuration. The CLI launcher and dependency wiring are out
/// of scope for the reconciliation engine, but this struct is the contract
/// between them: it's the only thing `main` needs to build a [`crate::Context`].
#[derive(clap::Parser, Debug, Clone)]
#[command(version, about = "Gateway API controller for a pre-existing cloud load balancer")]
pub struct Args {
    /// Base URL of the cloud load balancer API. Carries the OCI-style work
    /// request semantics described in the adapter contract.
    #[arg(long, env = "GATEWAYLB_CLOUD_ENDPOINT")]
    pub cloud_endpoint: String,

    /// Bearer token used to authenticate to the cloud load balancer API.
    #[arg(long, env = "GATEWAYLB_CLOUD_TOKEN")]
    pub cloud_token: Option<String>,

    /// Log level for the controller process.
    #[arg(long, env = "GATEWAYLB_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Upper bound on a single `WaitFor` poll loop before giving up with a
    /// retriable error.
    #[arg(long, env = "GATEWAYLB_WORK_REQUEST_TIMEOUT_SECS", default_value_t = 300)]
    pub work_request_timeout_secs: u64,
}

impl Args {
    pub fn parse_from_env() -> Self {
        <Self as clap::Parser>::parse()
    }
}
