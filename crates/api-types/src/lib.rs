//! Types shared between the trace generator, its storage and its HTTP clients.
//!
//! Field names and order are part of the wire format: every event on the
//! stream and every row returned by the read-back endpoint serializes as
//! `{"coords":{"latitude":..,"longitude":..},"distance":..}`.

use serde::{Deserialize, Serialize};

/// A point on the globe in decimal degrees.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoPosition {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPosition {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// One tick's output: the settled position and the distance (km) to the
/// position the walker will settle on next.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoSample {
    pub coords: GeoPosition,
    pub distance: f64,
}

/// Running totals of a trace since the server started.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceStats {
    pub ticks: u64,
    pub total_distance_km: f64,
    pub subscribers: usize,
    pub dropped_deliveries: u64,
    pub last_sample: Option<GeoSample>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_wire_shape() {
        let sample = GeoSample {
            coords: GeoPosition::new(55.75, 37.62),
            distance: 0.5,
        };

        let json = serde_json::to_string(&sample).unwrap();
        assert_eq!(
            json,
            r#"{"coords":{"latitude":55.75,"longitude":37.62},"distance":0.5}"#
        );
    }

    #[test]
    fn test_sample_from_stored_json() {
        let json = r#"[{"coords":{"latitude":1.0,"longitude":2.0},"distance":0.0}]"#;
        let samples: Vec<GeoSample> = serde_json::from_str(json).unwrap();

        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].coords, GeoPosition::new(1.0, 2.0));
    }
}
