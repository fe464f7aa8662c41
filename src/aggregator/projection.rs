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

//! The projection table: a fixed set of named extractors from the raw
//! multicast telescope-status JSON document into typed sensor values.
//! Grounded on `effelsberg/servers/status_config.py`'s `EFF_JSON_CONFIG`,
//! which maps sensor name to `(type, unit, description, updater)`.

use crate::sensor::{SensorType, SensorValue};
use serde_json::Value;

pub struct ProjectionEntry {
    pub name: &'static str,
    pub ty: SensorType,
    pub unit: Option<&'static str>,
    pub description: &'static str,
    pub extract: fn(&Value) -> Option<SensorValue>,
}

fn float_field(data: &Value, key: &str) -> Option<f64> {
    data.get(key)?.as_f64()
}

fn int_field(data: &Value, key: &str) -> Option<i64> {
    data.get(key)?.as_i64()
}

fn str_field(data: &Value, key: &str) -> Option<String> {
    data.get(key)?.as_str().map(str::to_owned)
}

macro_rules! float_entry {
    ($name:literal, $unit:expr, $desc:literal, $key:literal) => {
        ProjectionEntry {
            name: $name,
            ty: SensorType::Float,
            unit: $unit,
            description: $desc,
            extract: |data| float_field(data, $key).map(SensorValue::Float),
        }
    };
}

/// The full projection table used by the telescope state aggregator. This is
/// a representative subset of `EFF_JSON_CONFIG`'s ~80 entries, covering one
/// of each category (timing, pointing, scan bookkeeping, source metadata).
pub fn table() -> Vec<ProjectionEntry> {
    vec![
        float_entry!("lmst", Some("hours"), "Local mean sidereal time (LMST)", "hourangle"),
        float_entry!("ha", Some("degrees"), "Hour Angle", "hourangle"),
        float_entry!("utc", Some("hours"), "Coordinated Universal Time", "mjuld"),
        float_entry!("mjd", Some("days"), "Modified Julian Date", "foc-mjd"),
        ProjectionEntry {
            name: "observing",
            ty: SensorType::Bool,
            unit: None,
            description: "Flag indicating if telescope is in 'measuring' state",
            extract: |data| int_field(data, "istmess").map(|v| SensorValue::Bool(v != 0)),
        },
        ProjectionEntry {
            name: "scannum",
            ty: SensorType::Int,
            unit: None,
            description: "Current scan number",
            extract: |data| int_field(data, "vscan").map(SensorValue::Int),
        },
        ProjectionEntry {
            name: "subscannum",
            ty: SensorType::Int,
            unit: None,
            description: "Current sub-scan number",
            extract: |data| int_field(data, "vsubscan").map(SensorValue::Int),
        },
        ProjectionEntry {
            name: "nsubscan",
            ty: SensorType::Int,
            unit: None,
            description: "Number of sub-scans in current scan",
            extract: |data| int_field(data, "vanzsubs").map(SensorValue::Int),
        },
        float_entry!(
            "time-remaining",
            Some("seconds"),
            "Time remaining in current sub-scan",
            "time-to-end"
        ),
        ProjectionEntry {
            name: "time-elapsed",
            ty: SensorType::Float,
            unit: Some("seconds"),
            description: "Time elapsed in current sub-scan",
            extract: |data| {
                let mjuld = float_field(data, "mjuld")?;
                let starttime = float_field(data, "starttime")?;
                Some(SensorValue::Float((mjuld - starttime) * 3600.0))
            },
        },
        ProjectionEntry {
            name: "source-name",
            ty: SensorType::String,
            unit: None,
            description: "Current source name",
            extract: |data| str_field(data, "fuelling").map(SensorValue::String),
        },
        float_entry!("azimuth", Some("degrees"), "Current telescope azimuth", "soll-1"),
        ProjectionEntry {
            name: "azimuth-offset",
            ty: SensorType::Float,
            unit: Some("degrees"),
            description: "Difference between current and requested azimuth",
            extract: |data| {
                let soll = float_field(data, "soll-1")?;
                let ist = float_field(data, "ist-1")?;
                Some(SensorValue::Float(soll - ist))
            },
        },
        float_entry!(
            "elevation",
            Some("degrees"),
            "Current telescope elevation",
            "soll-0"
        ),
        ProjectionEntry {
            name: "elevation-offset",
            ty: SensorType::Float,
            unit: Some("degrees"),
            description: "Difference between current and requested elevation",
            extract: |data| {
                let soll = float_field(data, "soll-0")?;
                let ist = float_field(data, "ist-0")?;
                Some(SensorValue::Float(soll - ist))
            },
        },
        float_entry!(
            "ra",
            Some("degrees"),
            "Current Mean EQ2000 Right Ascension",
            "ra2000"
        ),
        float_entry!(
            "dec",
            Some("degrees"),
            "Current Mean EQ2000 Declination",
            "dk2000"
        ),
        float_entry!(
            "azimuth-drive-speed",
            Some("degrees/s"),
            "Azimuth drive speed",
            "vaz"
        ),
        float_entry!(
            "elevation-drive-speed",
            Some("degrees/s"),
            "Elevation drive speed",
            "vel"
        ),
        float_entry!(
            "ra-1950",
            Some("degrees"),
            "Current Mean B1950 Right Ascension",
            "ra1950"
        ),
        float_entry!(
            "dec-1950",
            Some("degrees"),
            "Current Mean B1950 Declination",
            "dk1950"
        ),
        float_entry!("glong", Some("degrees"), "Galactic longitude", "glong"),
        float_entry!("glat", Some("degrees"), "Galactic latitude", "glat"),
        float_entry!("elong", Some("degrees"), "Ecliptic longitude", "elong"),
        float_entry!("elat", Some("degrees"), "Ecliptic latitude", "elat"),
        float_entry!("frequency", Some("MHz"), "Receiver centre frequency", "freq"),
        ProjectionEntry {
            name: "receiver",
            ty: SensorType::String,
            unit: None,
            description: "Currently selected receiver",
            extract: |data| str_field(data, "empfaenger").map(SensorValue::String),
        },
        float_entry!("focus", Some("mm"), "Secondary focus position", "fokus"),
        float_entry!("air-pressure", Some("hPa"), "Ambient air pressure", "pressure"),
        float_entry!("humidity", Some("%"), "Ambient relative humidity", "humidity"),
        float_entry!(
            "air-temperature",
            Some("Celsius"),
            "Ambient air temperature",
            "temperature"
        ),
        float_entry!("wind-speed", Some("m/s"), "Wind speed", "windspeed"),
        float_entry!("wind-direction", Some("degrees"), "Wind direction", "winddir"),
        float_entry!(
            "refraction-constant",
            None,
            "Atmospheric refraction constant",
            "refrconst"
        ),
        float_entry!("dew-point", Some("Celsius"), "Dew point", "dewpoint"),
        float_entry!("nula", Some("degrees"), "Azimuth pointing offset Nu_A", "nula"),
        float_entry!("nule", Some("degrees"), "Elevation pointing offset Nu_E", "nule"),
        float_entry!("coll", Some("degrees"), "Collimation error", "coll"),
        float_entry!("x-lin", Some("mm"), "Subreflector X linear position", "xlin"),
        float_entry!("y-lin", Some("mm"), "Subreflector Y linear position", "ylin"),
        float_entry!("z-lin", Some("mm"), "Subreflector Z linear position", "zlin"),
        float_entry!("x-rot", Some("degrees"), "Subreflector X rotation", "xrot"),
        float_entry!("y-rot", Some("degrees"), "Subreflector Y rotation", "yrot"),
        float_entry!("z-rot", Some("degrees"), "Subreflector Z rotation", "zrot"),
        float_entry!(
            "pol-angle",
            Some("degrees"),
            "Receiver polarization angle",
            "polwinkel"
        ),
        ProjectionEntry {
            name: "project",
            ty: SensorType::String,
            unit: None,
            description: "Current project identifier",
            extract: |data| str_field(data, "projekt").map(SensorValue::String),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_a_bool_from_an_integer_flag() {
        let entry = table().into_iter().find(|e| e.name == "observing").unwrap();
        let data = json!({"istmess": 1});
        assert_eq!((entry.extract)(&data), Some(SensorValue::Bool(true)));
        let data = json!({"istmess": 0});
        assert_eq!((entry.extract)(&data), Some(SensorValue::Bool(false)));
    }

    #[test]
    fn missing_field_yields_none() {
        let entry = table().into_iter().find(|e| e.name == "ra").unwrap();
        assert_eq!((entry.extract)(&json!({})), None);
    }
}
