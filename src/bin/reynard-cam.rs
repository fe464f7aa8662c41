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

use miette::Result;
use reynard::{config, config::ConfigStore, controller};
use std::time::Duration;
use tokio_graceful_shutdown::{SubsystemBuilder, Toplevel};
use tracing::info;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let (config, args) = config::load("reynard-cam").await?;
    let config_store = ConfigStore::from_args(&args)?;

    reynard::telemetry::init(config.telemetry.as_ref(), &config.app.name, &config.app.instance.name).await?;

    info!("Starting {} instance '{}'", config.app.name, config.app.instance.name);

    Toplevel::new(|s| async move {
        s.start(SubsystemBuilder::new("reynard-cam", |s| async move {
            controller::run(config, config_store, s).await
        }));
    })
    .catch_signals()
    .handle_shutdown_requests(Duration::from_secs(1))
    .await?;

    Ok(())
}
