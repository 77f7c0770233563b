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

use clap::Parser;
use gatewaylb_controller::cloud::client::HttpLoadBalancerAdapter;
use gatewaylb_controller::{config::Args, gateway, gatewayclass_controller, httproute, telemetry, Context};
use kube::Client;
use tokio::try_join;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse_from_env();
    telemetry::init(&args.log_level);

    let client = Client::try_default().await?;
    let cloud = Arc::new(HttpLoadBalancerAdapter::new(
        &args.cloud_endpoint,
        args.cloud_token.as_deref(),
        Duration::from_secs(args.work_request_timeout_secs),
    )?);

    let cancellation = CancellationToken::new();
    let ctx = Context::new(client, cloud, cancellation.clone());

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received, cancelling in-flight reconciles");
            cancellation.cancel();
        }
    });

    info!(controller = %gatewaylb_controller::consts::controller_class_name(), "starting gatewaylb-controller");

    if let Err(error) = try_join!(
        gatewayclass_controller::run(ctx.clone()),
        gateway::run(ctx.clone()),
        httproute::run(ctx),
    ) {
        error!(%error, "controller exited with error");
        std::process::exit(1);
    }

    Ok(())
}
