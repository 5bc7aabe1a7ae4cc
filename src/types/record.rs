//! Decoded telemetry record and its field schema

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// How a telemetry field is parsed from the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    Float,
}

/// One column of the telemetry line, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    TeamId,
    MissionTime,
    PacketCount,
    Altitude,
    Pressure,
    Temperature,
    Voltage,
    GpsTime,
    GpsLat,
    GpsLon,
    GpsAlt,
    GpsSats,
    AirSpeed,
    ParticleCount,
    Pitch,
    Roll,
    Yaw,
}

impl Field {
    /// Number of fields in a telemetry line.
    pub const COUNT: usize = 17;

    /// All fields in wire order.
    pub const ALL: [Field; Field::COUNT] = [
        Field::TeamId,
        Field::MissionTime,
        Field::PacketCount,
        Field::Altitude,
        Field::Pressure,
        Field::Temperature,
        Field::Voltage,
        Field::GpsTime,
        Field::GpsLat,
        Field::GpsLon,
        Field::GpsAlt,
        Field::GpsSats,
        Field::AirSpeed,
        Field::ParticleCount,
        Field::Pitch,
        Field::Roll,
        Field::Yaw,
    ];

    /// Lowercase field name.
    pub fn name(self) -> &'static str {
        match self {
            Field::TeamId => "team_id",
            Field::MissionTime => "mission_time",
            Field::PacketCount => "packet_count",
            Field::Altitude => "altitude",
            Field::Pressure => "pressure",
            Field::Temperature => "temperature",
            Field::Voltage => "voltage",
            Field::GpsTime => "gps_time",
            Field::GpsLat => "gps_lat",
            Field::GpsLon => "gps_lon",
            Field::GpsAlt => "gps_alt",
            Field::GpsSats => "gps_sats",
            Field::AirSpeed => "air_speed",
            Field::ParticleCount => "particle_count",
            Field::Pitch => "pitch",
            Field::Roll => "roll",
            Field::Yaw => "yaw",
        }
    }

    /// Column title used in the log file header (`TEAM_ID`, `MISSION_TIME`, ...).
    pub fn header(self) -> String {
        self.name().to_ascii_uppercase()
    }

    pub fn kind(self) -> FieldKind {
        match self {
            Field::TeamId | Field::MissionTime | Field::GpsTime => FieldKind::Text,
            Field::PacketCount | Field::GpsSats => FieldKind::Integer,
            _ => FieldKind::Float,
        }
    }

    /// Decimal places used when the field is written to the log.
    ///
    /// `None` for text and integer fields, which are written as-is.
    pub fn precision(self) -> Option<usize> {
        match self {
            Field::GpsLat | Field::GpsLon => Some(6),
            Field::Pitch | Field::Roll | Field::Yaw => Some(3),
            f if f.kind() == FieldKind::Float => Some(2),
            _ => None,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A fully decoded, validated telemetry sample.
///
/// Units: altitude and GPS altitude in meters, pressure in Pa, temperature in °C,
/// voltage in V, air speed in m/s, angles in degrees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub team_id: String,
    pub mission_time: String,
    pub packet_count: u64,
    pub altitude: f64,
    pub pressure: f64,
    pub temperature: f64,
    pub voltage: f64,
    pub gps_time: String,
    pub gps_lat: f64,
    pub gps_lon: f64,
    pub gps_alt: f64,
    pub gps_sats: u32,
    pub air_speed: f64,
    pub particle_count: f64,
    pub pitch: f64,
    pub roll: f64,
    pub yaw: f64,
}

impl Record {
    /// Numeric value of a float field, `None` for text and integer fields.
    pub fn float(&self, field: Field) -> Option<f64> {
        let value = match field {
            Field::Altitude => self.altitude,
            Field::Pressure => self.pressure,
            Field::Temperature => self.temperature,
            Field::Voltage => self.voltage,
            Field::GpsLat => self.gps_lat,
            Field::GpsLon => self.gps_lon,
            Field::GpsAlt => self.gps_alt,
            Field::AirSpeed => self.air_speed,
            Field::ParticleCount => self.particle_count,
            Field::Pitch => self.pitch,
            Field::Roll => self.roll,
            Field::Yaw => self.yaw,
            _ => return None,
        };
        Some(value)
    }

    /// Format a single field the way the log writes it.
    pub fn format_field(&self, field: Field) -> String {
        match field {
            Field::TeamId => self.team_id.clone(),
            Field::MissionTime => self.mission_time.clone(),
            Field::GpsTime => self.gps_time.clone(),
            Field::PacketCount => self.packet_count.to_string(),
            Field::GpsSats => self.gps_sats.to_string(),
            other => {
                let value = self.float(other).unwrap_or_default();
                let precision = other.precision().unwrap_or(2);
                format!("{value:.precision$}")
            }
        }
    }

    /// All fields formatted for the log, in wire order.
    pub fn log_fields(&self) -> Vec<String> {
        Field::ALL.iter().map(|&field| self.format_field(field)).collect()
    }

    /// Comma-separated log row (no trailing newline).
    ///
    /// Text fields holding a delimiter, quote or line break are quoted with
    /// inner quotes doubled, so one record is always one CSV row.
    pub fn log_row(&self) -> String {
        self.log_fields().iter().map(|field| quote_field(field)).collect::<Vec<_>>().join(",")
    }

    /// Comma-separated header row matching [`Record::log_row`].
    pub fn log_header() -> String {
        Field::ALL.iter().map(|field| field.header()).collect::<Vec<_>>().join(",")
    }
}

fn quote_field(field: &str) -> Cow<'_, str> {
    if field.contains(['"', ',', '\r', '\n']) {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}
