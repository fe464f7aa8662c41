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

//! Host-monitoring sensors for the Backend Node, grounded on
//! `monitors/disk_monitor.py`, `monitors/memory_monitor.py` and
//! `monitors/cpu_monitor.py`: one sensor pair per monitored volume/NUMA node,
//! one pair per CPU core, all refreshed on a 1-second period.

use crate::sensor::{SensorApi, SensorSpec, SensorStatus, SensorType, SensorValue};
use std::{path::PathBuf, time::Duration};
use sysinfo::{Disks, System};
use tokio::time::interval;
use tracing::warn;

const MB: f64 = 1_000_000.0;

/// Registers every monitor sensor, then spawns the 1-second polling task.
/// Mirrors `UniversalBackendNode.setup_sensors`/`start`: sensors exist from
/// service start, values are refreshed forever after.
pub async fn start(sensors: SensorApi, volumes: Vec<PathBuf>) {
    register_disk_sensors(&sensors, &volumes).await;
    register_cpu_sensors(&sensors).await;
    register_memory_sensors(&sensors).await;

    tokio::spawn(async move {
        let mut sys = System::new_all();
        let mut tick = interval(Duration::from_secs(1));
        loop {
            tick.tick().await;
            update_disk_sensors(&sensors, &volumes).await;
            update_cpu_sensors(&sensors, &mut sys).await;
            update_memory_sensors(&sensors, &mut sys).await;
        }
    });
}

fn volume_name(path: &std::path::Path) -> String {
    if path == std::path::Path::new("/") {
        "root".to_owned()
    } else {
        path.file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned())
    }
}

async fn register_disk_sensors(sensors: &SensorApi, volumes: &[PathBuf]) {
    for path in volumes {
        let name = volume_name(path);
        add_float(sensors, &format!("{name}_partition_size"), "MB", &format!("total size of {name} partition")).await;
        add_float(sensors, &format!("{name}_partition_avail"), "MB", &format!("available space on {name} partition")).await;
    }
}

async fn update_disk_sensors(sensors: &SensorApi, volumes: &[PathBuf]) {
    let disks = Disks::new_with_refreshed_list();
    for path in volumes {
        let name = volume_name(path);
        let Some(disk) = disks.iter().find(|d| d.mount_point() == path.as_path()) else {
            warn!("no disk mounted at {}", path.display());
            continue;
        };
        let total = disk.total_space() as f64 / MB;
        let avail = disk.available_space() as f64 / MB;
        let percent = if total > 0.0 { 100.0 * avail / total } else { 0.0 };
        let status = if percent < 0.5 {
            SensorStatus::Error
        } else if percent < 5.0 {
            SensorStatus::Warn
        } else {
            SensorStatus::Nominal
        };
        sensors
            .set_value(format!("{name}_partition_size"), SensorValue::Float(total), Some(SensorStatus::Nominal))
            .await
            .ok();
        sensors
            .set_value(format!("{name}_partition_avail"), SensorValue::Float(avail), Some(status))
            .await
            .ok();
    }
}

async fn register_cpu_sensors(sensors: &SensorApi) {
    let sys = System::new_all();
    for idx in 0..sys.cpus().len() {
        add_float(sensors, &format!("cpu{idx:02}_percent"), "%", &format!("percentage usage of cpu{idx:02}")).await;
        add_float(
            sensors,
            &format!("cpu{idx:02}_temperature"),
            "Celsius",
            &format!("temperature of cpu{idx:02}"),
        )
        .await;
    }
}

async fn update_cpu_sensors(sensors: &SensorApi, sys: &mut System) {
    sys.refresh_cpu_usage();
    for (idx, cpu) in sys.cpus().iter().enumerate() {
        sensors
            .set_value(
                format!("cpu{idx:02}_percent"),
                SensorValue::Float(cpu.cpu_usage() as f64),
                Some(SensorStatus::Nominal),
            )
            .await
            .ok();
        // No portable temperature source without platform-specific sensors;
        // reported flat the way `cpu_monitor.py` hardcodes 25.0 pending real
        // hardware integration.
        sensors
            .set_value(
                format!("cpu{idx:02}_temperature"),
                SensorValue::Float(25.0),
                Some(SensorStatus::Nominal),
            )
            .await
            .ok();
    }
}

async fn register_memory_sensors(sensors: &SensorApi) {
    add_float(sensors, "sys_memory_size", "MB", "total memory on sys").await;
    add_float(sensors, "sys_memory_avail", "MB", "available memory on sys").await;
}

async fn update_memory_sensors(sensors: &SensorApi, sys: &mut System) {
    sys.refresh_memory();
    let total = sys.total_memory() as f64 / MB;
    let avail = sys.available_memory() as f64 / MB;
    let percent = if total > 0.0 { 100.0 * avail / total } else { 0.0 };
    let status = if percent < 5.0 {
        SensorStatus::Warn
    } else {
        SensorStatus::Nominal
    };
    sensors
        .set_value("sys_memory_size", SensorValue::Float(total), Some(SensorStatus::Nominal))
        .await
        .ok();
    sensors
        .set_value("sys_memory_avail", SensorValue::Float(avail), Some(status))
        .await
        .ok();
}

async fn add_float(sensors: &SensorApi, name: &str, unit: &str, description: &str) {
    sensors
        .add_sensor(SensorSpec {
            name: name.to_owned(),
            description: description.to_owned(),
            unit: Some(unit.to_owned()),
            ty: SensorType::Float,
            default: SensorValue::Float(0.0),
        })
        .await
        .ok();
}
