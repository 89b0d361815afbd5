// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#![deny(
  clippy::expect_used,
  clippy::panic,
  clippy::todo,
  clippy::unimplemented,
  clippy::unreachable,
  clippy::unwrap_used
)]

#[cfg(test)]
#[path = "./lib_test.rs"]
mod tests;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(thiserror::Error, Debug)]
pub enum PayloadError {
  #[error("unknown payload type tag '{0}'")]
  UnknownTag(String),
  #[error("payload serialization failed: {0}")]
  Json(#[from] serde_json::Error),
}

//
// SensorKind
//

// Identifies the sensor device a sample originates from. The string form is what gets persisted
// and transmitted, so it must stay stable across releases.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SensorKind {
  Accelerometer,
  Gyroscope,
  Light,
  MagneticField,
  Pressure,
  Proximity,
  Temperature,
  Gps,
  Gsm,
  Wifi,
  Bluetooth,
  TimeSync,
}

impl SensorKind {
  #[must_use]
  pub const fn as_str(self) -> &'static str {
    match self {
      Self::Accelerometer => "accelerometer",
      Self::Gyroscope => "gyroscope",
      Self::Light => "light",
      Self::MagneticField => "magnetic_field",
      Self::Pressure => "pressure",
      Self::Proximity => "proximity",
      Self::Temperature => "temperature",
      Self::Gps => "gps",
      Self::Gsm => "gsm",
      Self::Wifi => "wifi",
      Self::Bluetooth => "bluetooth",
      Self::TimeSync => "time_sync",
    }
  }

  #[must_use]
  pub fn parse(value: &str) -> Option<Self> {
    match value {
      "accelerometer" => Some(Self::Accelerometer),
      "gyroscope" => Some(Self::Gyroscope),
      "light" => Some(Self::Light),
      "magnetic_field" => Some(Self::MagneticField),
      "pressure" => Some(Self::Pressure),
      "proximity" => Some(Self::Proximity),
      "temperature" => Some(Self::Temperature),
      "gps" => Some(Self::Gps),
      "gsm" => Some(Self::Gsm),
      "wifi" => Some(Self::Wifi),
      "bluetooth" => Some(Self::Bluetooth),
      "time_sync" => Some(Self::TimeSync),
      _ => None,
    }
  }
}

impl std::fmt::Display for SensorKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

//
// Priority
//

// Sample priority level. Lower ordinal means higher priority; the persistent store uses the
// ordinal to pick eviction victims under storage pressure.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
  Level0,
  Level1,
  #[default]
  Level2,
  Level3,
  Level4,
}

impl Priority {
  #[must_use]
  pub const fn ordinal(self) -> i64 {
    self as i64
  }

  #[must_use]
  pub const fn from_ordinal(ordinal: i64) -> Option<Self> {
    match ordinal {
      0 => Some(Self::Level0),
      1 => Some(Self::Level1),
      2 => Some(Self::Level2),
      3 => Some(Self::Level3),
      4 => Some(Self::Level4),
      _ => None,
    }
  }
}

//
// GeoLocation
//

// Optional geolocation attached to a sample at creation time.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
  pub latitude: f64,
  pub longitude: f64,
}

//
// SamplePayload
//

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MotionAxes {
  pub x: f64,
  pub y: f64,
  pub z: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScalarReading {
  pub value: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GpsFix {
  pub latitude: f64,
  pub longitude: f64,
  pub altitude: Option<f64>,
  pub speed: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GsmCell {
  pub operator: String,
  pub cell_id: i32,
  pub location_area: i32,
  pub signal_strength: i32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiScan {
  pub ssid: String,
  pub bssid: String,
  pub frequency: i32,
  pub level: i32,
  pub connected: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BluetoothScan {
  pub address: String,
  pub name: Option<String>,
  pub device_class: i32,
  pub rssi: i16,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
  pub text: String,
}

// The device specific part of a sample. Each variant serializes its body to a JSON string and
// carries a stable type tag so the persisted form can be decoded back into the right variant
// without runtime type inspection.
#[derive(Clone, Debug, PartialEq)]
pub enum SamplePayload {
  Motion(MotionAxes),
  Scalar(ScalarReading),
  Gps(GpsFix),
  Gsm(GsmCell),
  Wifi(WifiScan),
  Bluetooth(BluetoothScan),
  Marker(Marker),
}

impl SamplePayload {
  #[must_use]
  pub const fn type_tag(&self) -> &'static str {
    match self {
      Self::Motion(_) => "motion",
      Self::Scalar(_) => "scalar",
      Self::Gps(_) => "gps",
      Self::Gsm(_) => "gsm",
      Self::Wifi(_) => "wifi",
      Self::Bluetooth(_) => "bluetooth",
      Self::Marker(_) => "marker",
    }
  }

  /// Serializes the payload body (tag excluded) to its string form.
  pub fn to_json(&self) -> Result<String, PayloadError> {
    let json = match self {
      Self::Motion(body) => serde_json::to_string(body)?,
      Self::Scalar(body) => serde_json::to_string(body)?,
      Self::Gps(body) => serde_json::to_string(body)?,
      Self::Gsm(body) => serde_json::to_string(body)?,
      Self::Wifi(body) => serde_json::to_string(body)?,
      Self::Bluetooth(body) => serde_json::to_string(body)?,
      Self::Marker(body) => serde_json::to_string(body)?,
    };
    Ok(json)
  }

  /// Reconstructs a payload from its type tag and serialized body.
  pub fn from_json(tag: &str, body: &str) -> Result<Self, PayloadError> {
    let payload = match tag {
      "motion" => Self::Motion(serde_json::from_str(body)?),
      "scalar" => Self::Scalar(serde_json::from_str(body)?),
      "gps" => Self::Gps(serde_json::from_str(body)?),
      "gsm" => Self::Gsm(serde_json::from_str(body)?),
      "wifi" => Self::Wifi(serde_json::from_str(body)?),
      "bluetooth" => Self::Bluetooth(serde_json::from_str(body)?),
      "marker" => Self::Marker(serde_json::from_str(body)?),
      unknown => return Err(PayloadError::UnknownTag(unknown.to_string())),
    };
    Ok(payload)
  }
}

//
// Sample
//

// A single timestamped, prioritized sensor reading. Immutable once created; producers hand
// samples to the persistent storage observer which owns them from there on.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
  pub sensor: SensorKind,
  pub timestamp_ms: i64,
  pub priority: Priority,
  pub time_synced: bool,
  pub payload: SamplePayload,
  pub location: Option<GeoLocation>,
}

impl Sample {
  #[must_use]
  pub fn new(
    sensor: SensorKind,
    timestamp_ms: i64,
    priority: Priority,
    payload: SamplePayload,
  ) -> Self {
    Self {
      sensor,
      timestamp_ms,
      priority,
      time_synced: false,
      payload,
      location: None,
    }
  }

  /// Creates a sample stamped with the current wall clock time.
  #[must_use]
  pub fn now(sensor: SensorKind, priority: Priority, payload: SamplePayload) -> Self {
    let timestamp_ms =
      i64::try_from(OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000).unwrap_or(0);
    Self::new(sensor, timestamp_ms, priority, payload)
  }

  #[must_use]
  pub const fn with_location(mut self, location: GeoLocation) -> Self {
    self.location = Some(location);
    self
  }

  #[must_use]
  pub const fn with_time_synced(mut self, time_synced: bool) -> Self {
    self.time_synced = time_synced;
    self
  }
}
