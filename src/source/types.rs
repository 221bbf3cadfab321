//! Motion sample types consumed by the detection pipeline.
//!
//! Acceleration is expressed in m/s² in the device frame, angular rate in rad/s.
//! The device Z axis is aligned with gravity while the wearer stands upright.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Standard gravity in m/s².
pub const STANDARD_GRAVITY: f64 = 9.80665;

/// Identifier of a monitored subject.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(String);

impl SubjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubjectId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SubjectId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A single timestamped reading from the body-worn IMU.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorSample {
    /// Time the reading was taken
    pub timestamp: DateTime<Utc>,
    /// Linear acceleration, m/s²
    pub ax: f64,
    pub ay: f64,
    pub az: f64,
    /// Angular rate, rad/s
    pub gx: f64,
    pub gy: f64,
    pub gz: f64,
}

impl SensorSample {
    pub fn new(timestamp: DateTime<Utc>, accel: [f64; 3], gyro: [f64; 3]) -> Self {
        Self {
            timestamp,
            ax: accel[0],
            ay: accel[1],
            az: accel[2],
            gx: gyro[0],
            gy: gyro[1],
            gz: gyro[2],
        }
    }

    /// Euclidean norm of the acceleration vector.
    pub fn magnitude(&self) -> f64 {
        (self.ax * self.ax + self.ay * self.ay + self.az * self.az).sqrt()
    }

    /// Euclidean norm of the angular rate vector.
    pub fn gyro_magnitude(&self) -> f64 {
        (self.gx * self.gx + self.gy * self.gy + self.gz * self.gz).sqrt()
    }

    pub fn accel(&self) -> [f64; 3] {
        [self.ax, self.ay, self.az]
    }

    /// True when every channel holds a finite value.
    pub fn is_finite(&self) -> bool {
        [self.ax, self.ay, self.az, self.gx, self.gy, self.gz]
            .iter()
            .all(|v| v.is_finite())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magnitude() {
        let sample = SensorSample::new(Utc::now(), [3.0, 4.0, 0.0], [0.0, 0.0, 0.0]);
        assert!((sample.magnitude() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_non_finite_detection() {
        let sample = SensorSample::new(Utc::now(), [f64::NAN, 0.0, 9.8], [0.0; 3]);
        assert!(!sample.is_finite());
    }

    #[test]
    fn test_subject_id_display() {
        let id = SubjectId::from("room-12");
        assert_eq!(id.to_string(), "room-12");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"room-12\"");
    }
}
