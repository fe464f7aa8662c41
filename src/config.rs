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

use crate::error::{ConfigError, ConfigResult};
use clap::Parser;
use gethostname::gethostname;
use serde::{Deserialize, Serialize};
use std::{
    net::{IpAddr, Ipv4Addr},
    path::{Path, PathBuf},
};
use tokio::fs;
use tracing::{info, instrument, warn};

/// Root of the on-disk config store: `nodes/<set>.json`,
/// `pipelines/defaults/<receiver>/<tag>.json`,
/// `pipelines/<project>/<receiver>/<tag>.json`.
#[derive(Parser)]
#[command(author, version, about, long_about)]
pub struct Args {
    /// Path to this service's own config file
    #[arg(short, long, env = "REYNARD_CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Root of the node-manifest/pipeline-template store
    #[arg(long, env = "REYNARD_CONFIG")]
    pub config_store: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SocketConfig {
    pub bind_address: IpAddr,
    pub port: u16,
}

impl SocketConfig {
    pub fn default_with_port(port: u16) -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryConfig {
    pub endpoint: EndpointConfig,
    pub credentials: Option<Credentials>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EndpointConfig {
    Grpc(String),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub user: String,
    pub token: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    pub name: String,
    pub instance: InstanceConfig,
}

impl AppConfig {
    fn default_named(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            instance: InstanceConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceConfig {
    pub name: String,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            name: gethostname().to_string_lossy().to_string(),
        }
    }
}

/// Multicast ingest parameters for the telescope state aggregator.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MulticastConfig {
    pub group: Ipv4Addr,
    pub port: u16,
    #[serde(default)]
    pub interface: Option<IpAddr>,
}

impl Default for MulticastConfig {
    fn default() -> Self {
        Self {
            group: Ipv4Addr::new(224, 168, 2, 132),
            port: 1602,
            interface: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatorConfig {
    #[serde(default = "default_app_aggregator")]
    pub app: AppConfig,
    #[serde(default)]
    pub telemetry: Option<TelemetryConfig>,
    #[serde(default = "default_aggregator_socket")]
    pub socket: SocketConfig,
    #[serde(default)]
    pub multicast: MulticastConfig,
}

fn default_app_aggregator() -> AppConfig {
    AppConfig::default_named("reynard-aggregator")
}

fn default_aggregator_socket() -> SocketConfig {
    SocketConfig::default_with_port(5000)
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            app: default_app_aggregator(),
            telemetry: None,
            socket: default_aggregator_socket(),
            multicast: MulticastConfig::default(),
        }
    }
}

/// Host-monitoring volumes for [`crate::ubn::monitor`].
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UbnConfig {
    #[serde(default = "default_app_ubn")]
    pub app: AppConfig,
    #[serde(default)]
    pub telemetry: Option<TelemetryConfig>,
    #[serde(default = "default_ubn_socket")]
    pub socket: SocketConfig,
    #[serde(default = "default_volumes")]
    pub monitored_volumes: Vec<PathBuf>,
}

fn default_app_ubn() -> AppConfig {
    AppConfig::default_named("reynard-ubn")
}

fn default_ubn_socket() -> SocketConfig {
    SocketConfig::default_with_port(5100)
}

fn default_volumes() -> Vec<PathBuf> {
    vec![PathBuf::from("/")]
}

impl Default for UbnConfig {
    fn default() -> Self {
        Self {
            app: default_app_ubn(),
            telemetry: None,
            socket: default_ubn_socket(),
            monitored_volumes: default_volumes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UbiConfig {
    #[serde(default = "default_app_ubi")]
    pub app: AppConfig,
    #[serde(default)]
    pub telemetry: Option<TelemetryConfig>,
    #[serde(default = "default_ubi_socket")]
    pub socket: SocketConfig,
    /// Node-set name resolved against `<REYNARD_CONFIG>/nodes/<name>.json`.
    pub node_set: String,
}

fn default_app_ubi() -> AppConfig {
    AppConfig::default_named("reynard-ubi")
}

fn default_ubi_socket() -> SocketConfig {
    SocketConfig::default_with_port(5200)
}

impl Default for UbiConfig {
    fn default() -> Self {
        Self {
            app: default_app_ubi(),
            telemetry: None,
            socket: default_ubi_socket(),
            node_set: "default".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CamConfig {
    #[serde(default = "default_app_cam")]
    pub app: AppConfig,
    #[serde(default)]
    pub telemetry: Option<TelemetryConfig>,
    #[serde(default = "default_cam_socket")]
    pub socket: SocketConfig,
    pub telescope: String,
    pub default_project: String,
    pub aggregator_address: SocketConfig,
    pub ubi_address: SocketConfig,
    /// Node-set name resolved against `<REYNARD_CONFIG>/nodes/<name>.json`,
    /// used to build the [`crate::node_pool::NodePool`] the
    /// Observation Controller allocates capture nodes from.
    #[serde(default = "default_node_set")]
    pub node_set: String,
}

fn default_node_set() -> String {
    "default".to_owned()
}

fn default_app_cam() -> AppConfig {
    AppConfig::default_named("reynard-cam")
}

fn default_cam_socket() -> SocketConfig {
    SocketConfig::default_with_port(5300)
}

impl Default for CamConfig {
    fn default() -> Self {
        Self {
            app: default_app_cam(),
            telemetry: None,
            socket: default_cam_socket(),
            telescope: "effelsberg".to_owned(),
            default_project: "default".to_owned(),
            aggregator_address: SocketConfig::default_with_port(5000),
            ubi_address: SocketConfig::default_with_port(5200),
            node_set: default_node_set(),
        }
    }
}

/// Load a service config of type `C`: parse `Args`, read the YAML at
/// `--config`/`$REYNARD_CONFIG_FILE`, or fall back to a dev/prod default
/// path, or to `C::default()` if that too is missing.
#[instrument(skip_all)]
pub async fn load<C>(default_file_stem: &str) -> ConfigResult<(C, Args)>
where
    C: Default + for<'de> Deserialize<'de>,
{
    let args = Args::parse();
    info!("Loading config …");
    let config = load_from_file(args.config.as_deref(), default_file_stem).await?;
    Ok((config, args))
}

async fn load_from_file<C>(path: Option<&Path>, default_file_stem: &str) -> ConfigResult<C>
where
    C: Default + for<'de> Deserialize<'de>,
{
    match path {
        Some(path) => {
            let content = fs::read_to_string(path).await?;
            let config = serde_yaml::from_str(&content)?;
            info!("Config loaded from {}", path.to_string_lossy());
            Ok(config)
        }
        None => {
            let path = if cfg!(debug_assertions) {
                format!("./config-dev/{default_file_stem}.yaml")
            } else {
                format!("/etc/reynard/{default_file_stem}.yaml")
            };
            match fs::read_to_string(&path).await {
                Ok(it) => {
                    let config = serde_yaml::from_str(&it)?;
                    info!("Config loaded from {path}");
                    Ok(config)
                }
                Err(_) => {
                    warn!("Could not read config file {path}, using default config.");
                    Ok(C::default())
                }
            }
        }
    }
}

impl AggregatorConfig {
    pub fn instance_name(&self) -> String {
        format!("{}/{}", self.app.name, self.app.instance.name)
    }
}

impl UbnConfig {
    pub fn instance_name(&self) -> String {
        format!("{}/{}", self.app.name, self.app.instance.name)
    }
}

impl UbiConfig {
    pub fn instance_name(&self) -> String {
        format!("{}/{}", self.app.name, self.app.instance.name)
    }
}

impl CamConfig {
    pub fn instance_name(&self) -> String {
        format!("{}/{}", self.app.name, self.app.instance.name)
    }
}

/// Read access to `$REYNARD_CONFIG`: node manifests and pipeline config
/// templates.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    root: PathBuf,
}

impl ConfigStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn from_args(args: &Args) -> ConfigResult<Self> {
        let root = args
            .config_store
            .clone()
            .ok_or_else(|| ConfigError::Missing("REYNARD_CONFIG not set".to_owned()))?;
        Ok(Self::new(root))
    }

    #[instrument(skip(self))]
    pub async fn load_node_manifest(&self, node_set: &str) -> ConfigResult<String> {
        let path = self.root.join("nodes").join(format!("{node_set}.json"));
        fs::read_to_string(&path)
            .await
            .map_err(|_| ConfigError::Missing(path.to_string_lossy().into_owned()))
    }

    /// `(project, receiver, tag)` with fallback to `(defaults, receiver, tag)`.
    #[instrument(skip(self))]
    pub async fn load_pipeline_template(
        &self,
        project: &str,
        receiver: &str,
        tag: &str,
    ) -> ConfigResult<String> {
        let specific = self
            .root
            .join("pipelines")
            .join(project)
            .join(receiver)
            .join(format!("{tag}.json"));
        if let Ok(content) = fs::read_to_string(&specific).await {
            return Ok(content);
        }
        let default = self
            .root
            .join("pipelines")
            .join("defaults")
            .join(receiver)
            .join(format!("{tag}.json"));
        fs::read_to_string(&default).await.map_err(|_| {
            ConfigError::NoTemplate {
                project: project.to_owned(),
                receiver: receiver.to_owned(),
                tag: tag.to_owned(),
            }
        })
    }
}
