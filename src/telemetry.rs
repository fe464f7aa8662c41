/*
 *  Copyright (C) 2025 Michael Bachmann
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU Affero General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU Affero General Public License for more details.
 *
 *  You should have received a copy of the GNU Affero General Public License
 *  along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! Tracing setup shared by all four binaries: a `fmt` layer filtered by
//! `RUST_LOG`/`REYNARD_LOG`, plus an optional OTLP exporter when the service
//! config carries a [`TelemetryConfig`].

use crate::{
    config::{EndpointConfig, TelemetryConfig},
    error::ReynardResult,
};
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, runtime};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the global tracing subscriber. `service_name` and
/// `instance_name` are attached to every OTLP span as resource attributes.
pub async fn init(
    telemetry: Option<&TelemetryConfig>,
    service_name: &str,
    instance_name: &str,
) -> ReynardResult<()> {
    let filter = EnvFilter::try_from_env("REYNARD_LOG")
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| crate::error::ReynardError::TracingFilter(e))?;

    let registry = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter);

    match telemetry {
        Some(telemetry) => {
            let resource = Resource::new(vec![
                KeyValue::new("service.name", service_name.to_owned()),
                KeyValue::new("service.instance.id", instance_name.to_owned()),
            ]);

            let EndpointConfig::Grpc(endpoint) = &telemetry.endpoint;
            let exporter = opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint);

            let tracer = opentelemetry_otlp::new_pipeline()
                .tracing()
                .with_exporter(exporter)
                .with_trace_config(opentelemetry_sdk::trace::config().with_resource(resource))
                .install_batch(runtime::Tokio)
                .map_err(|e| crate::error::ReynardError::Invariant(e.to_string()))?;

            registry
                .with(tracing_opentelemetry::layer().with_tracer(tracer))
                .try_init()?;
        }
        None => registry.try_init()?,
    }

    Ok(())
}
