// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./record_test.rs"]
mod tests;

use crate::{Error, Result};
use bd_sample::{GeoLocation, Priority, Sample, SamplePayload, SensorKind};

//
// StorageRecord
//

// The at-rest shape of a sample: everything flattened to plain columns, with the payload body
// serialized to a string and tagged with its payload type so the original variant can be
// reconstructed on the way out.
#[derive(Clone, Debug, PartialEq)]
pub struct StorageRecord {
  pub sensor: String,
  pub timestamp_ms: i64,
  pub priority: i64,
  pub synced: bool,
  pub payload_tag: String,
  pub payload: String,
  pub location: Option<String>,
}

impl StorageRecord {
  /// Encodes a sample into its persisted form. Fails only if payload or location serialization
  /// fails.
  pub fn from_sample(sample: &Sample) -> Result<Self> {
    let payload = sample
      .payload
      .to_json()
      .map_err(|e| Error::Decode(e.to_string()))?;
    let location = sample
      .location
      .as_ref()
      .map(serde_json::to_string)
      .transpose()
      .map_err(|e| Error::Decode(e.to_string()))?;

    Ok(Self {
      sensor: sample.sensor.as_str().to_string(),
      timestamp_ms: sample.timestamp_ms,
      priority: sample.priority.ordinal(),
      synced: sample.time_synced,
      payload_tag: sample.payload.type_tag().to_string(),
      payload,
      location,
    })
  }

  /// Reconstructs the original sample. Fails with `Error::Decode` when the payload type tag
  /// cannot be resolved or any of the serialized fields no longer parse; callers skip and report
  /// the offending record rather than failing the whole batch.
  pub fn to_sample(&self) -> Result<Sample> {
    let sensor = SensorKind::parse(&self.sensor)
      .ok_or_else(|| Error::Decode(format!("unknown sensor id '{}'", self.sensor)))?;
    let priority = Priority::from_ordinal(self.priority)
      .ok_or_else(|| Error::Decode(format!("priority ordinal {} out of range", self.priority)))?;
    let payload = SamplePayload::from_json(&self.payload_tag, &self.payload)
      .map_err(|e| Error::Decode(e.to_string()))?;
    let location: Option<GeoLocation> = self
      .location
      .as_deref()
      .map(serde_json::from_str)
      .transpose()
      .map_err(|e| Error::Decode(e.to_string()))?;

    let mut sample = Sample::new(sensor, self.timestamp_ms, priority, payload)
      .with_time_synced(self.synced);
    if let Some(location) = location {
      sample = sample.with_location(location);
    }
    Ok(sample)
  }

  /// Rough per-row footprint, string content plus fixed column overhead. Only used to size test
  /// fixtures against the byte cap.
  #[must_use]
  pub fn encoded_size(&self) -> usize {
    self.sensor.len()
      + self.payload_tag.len()
      + self.payload.len()
      + self.location.as_ref().map_or(0, String::len)
      + 32
  }
}
