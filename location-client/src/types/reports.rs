//! Report payloads delivered to client callbacks.
//!
//! These mirror what the positioning engine produces. Only the fields the
//! coordination core or its consumers look at are modelled; the numerical
//! content is opaque to this crate.

use std::fmt;

use serde::Serialize;

use super::masks::{EngineKind, LocationFlags};

/// Processing outcome of a client call, delivered through a response callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LocationResponse {
    /// The call was processed successfully.
    Success,
    /// The call failed.
    UnknownFailure,
    /// The call is not supported by the positioning service.
    NotSupported,
}

impl LocationResponse {
    /// True for [`LocationResponse::Success`].
    pub fn is_success(self) -> bool {
        self == LocationResponse::Success
    }
}

impl fmt::Display for LocationResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            LocationResponse::Success => "success",
            LocationResponse::UnknownFailure => "unknown failure",
            LocationResponse::NotSupported => "not supported",
        };
        f.write_str(text)
    }
}

/// State of a batching session reported alongside batched locations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BatchingStatus {
    /// The engine is unable to compute positions for batching.
    Inactive,
    /// Positions are being batched.
    Active,
    /// The trip distance has been traversed; the trip session is over.
    Done,
}

/// Basic position fix.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Location {
    /// Which of the fields below are valid.
    pub flags: LocationFlags,
    /// UTC milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Degrees, [-90, 90].
    pub latitude: f64,
    /// Degrees, [-180, 180].
    pub longitude: f64,
    /// Meters above the WGS 84 ellipsoid.
    pub altitude: f64,
    /// Meters per second.
    pub speed: f32,
    /// Degrees, [0, 360).
    pub bearing: f32,
    /// Meters.
    pub horizontal_accuracy: f32,
    /// Meters.
    pub vertical_accuracy: f32,
}

impl Location {
    /// Create a fix with a valid position and timestamp.
    pub fn new(latitude: f64, longitude: f64, timestamp: u64) -> Self {
        Self {
            flags: LocationFlags::LAT_LONG | LocationFlags::TIMESTAMP,
            timestamp,
            latitude,
            longitude,
            ..Default::default()
        }
    }

    /// Attach a horizontal accuracy.
    pub fn with_accuracy(mut self, meters: f32) -> Self {
        self.horizontal_accuracy = meters;
        self.flags.insert(LocationFlags::ACCURACY);
        self
    }

    /// Attach speed and bearing.
    pub fn with_motion(mut self, speed: f32, bearing: f32) -> Self {
        self.speed = speed;
        self.bearing = bearing;
        self.flags
            .insert(LocationFlags::SPEED | LocationFlags::BEARING);
        self
    }

    /// Great-circle distance to another fix in meters (haversine).
    pub fn distance_to(&self, latitude: f64, longitude: f64) -> f64 {
        const EARTH_RADIUS_M: f64 = 6_371_000.0;

        let lat1 = self.latitude.to_radians();
        let lat2 = latitude.to_radians();
        let dlat = lat2 - lat1;
        let dlon = (longitude - self.longitude).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().asin()
    }
}

/// Rich position report from one engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GnssLocation {
    /// The basic fix.
    pub location: Location,
    /// Engine that produced this report.
    pub engine: EngineKind,
    /// Altitude above mean sea level, meters.
    pub altitude_mean_sea_level: f32,
    /// Position dilution of precision.
    pub pdop: f32,
    /// Horizontal dilution of precision.
    pub hdop: f32,
    /// Vertical dilution of precision.
    pub vdop: f32,
    /// Satellites used in the fix.
    pub num_sv_used: u16,
}

impl GnssLocation {
    /// Wrap a basic fix as a report from `engine`.
    pub fn new(location: Location, engine: EngineKind) -> Self {
        Self {
            location,
            engine,
            ..Default::default()
        }
    }
}

/// Satellite constellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum Constellation {
    /// Unknown constellation.
    #[default]
    Unknown,
    /// GPS.
    Gps,
    /// SBAS.
    Sbas,
    /// GLONASS.
    Glonass,
    /// QZSS.
    Qzss,
    /// BeiDou.
    Beidou,
    /// Galileo.
    Galileo,
    /// NavIC.
    Navic,
}

/// One satellite vehicle in an SV status report.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GnssSv {
    /// Satellite identifier within its constellation.
    pub sv_id: u16,
    /// Constellation.
    pub constellation: Constellation,
    /// Carrier-to-noise density, dB-Hz.
    pub cn0_dbhz: f32,
    /// Elevation, degrees.
    pub elevation: f32,
    /// Azimuth, degrees.
    pub azimuth: f32,
    /// Whether the SV contributed to the current fix.
    pub used_in_fix: bool,
}

/// NMEA sentence with its generation timestamp.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NmeaSentence {
    /// UTC milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Sentence text as produced by the engine layer.
    pub sentence: String,
}

/// Jammer and AGC information.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GnssData {
    /// Jammer indicator per signal type.
    pub jammer_indicator: Vec<f64>,
    /// Automatic gain control per signal type.
    pub agc: Vec<f64>,
}

/// One raw measurement.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GnssMeasurement {
    /// Satellite identifier.
    pub sv_id: u16,
    /// Constellation.
    pub constellation: Constellation,
    /// Carrier-to-noise density, dB-Hz.
    pub cn0_dbhz: f64,
    /// Pseudorange rate, meters per second.
    pub pseudorange_rate_mps: f64,
}

/// Raw measurement report.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GnssMeasurements {
    /// Receiver clock time, nanoseconds.
    pub clock_time_ns: i64,
    /// Per-satellite measurements.
    pub measurements: Vec<GnssMeasurement>,
}

/// Satellite orbit polynomial.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GnssSvPoly {
    /// Satellite identifier.
    pub sv_id: u16,
    /// Constellation.
    pub constellation: Constellation,
    /// Reference time of the polynomial, seconds.
    pub t0: f64,
    /// Polynomial coefficients.
    pub coefficients: Vec<f64>,
}

/// Energy consumed by the standard GNSS engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GnssEnergyConsumed {
    /// Since first boot, in 0.1 milli-watt-seconds. `None` if unknown.
    pub total_since_first_boot: Option<u64>,
}

/// Upcoming leap second information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LeapSecondInfo {
    /// Current GPS-UTC leap seconds.
    pub current: u8,
    /// UTC milliseconds of the next leap second change, if scheduled.
    pub next_change_utc_ms: Option<u64>,
}

/// Rarely occurring system information not tied to a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LocationSystemInfo {
    /// Leap second information, if the update carries it.
    pub leap_second: Option<LeapSecondInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_new_sets_flags() {
        let loc = Location::new(37.4, -122.1, 1_000);
        assert!(loc.flags.contains(LocationFlags::LAT_LONG));
        assert!(loc.flags.contains(LocationFlags::TIMESTAMP));
        assert!(!loc.flags.contains(LocationFlags::ACCURACY));

        let loc = loc.with_accuracy(4.5).with_motion(12.0, 90.0);
        assert!(loc.flags.contains(LocationFlags::ACCURACY | LocationFlags::SPEED));
        assert_eq!(loc.horizontal_accuracy, 4.5);
    }

    #[test]
    fn test_distance_to_known_points() {
        let here = Location::new(0.0, 0.0, 0);
        // One degree of latitude is ~111.2 km.
        let d = here.distance_to(1.0, 0.0);
        assert!((d - 111_195.0).abs() < 100.0, "distance was {}", d);
        assert!(here.distance_to(0.0, 0.0) < f64::EPSILON);
    }

    #[test]
    fn test_response_display_and_success() {
        assert!(LocationResponse::Success.is_success());
        assert!(!LocationResponse::NotSupported.is_success());
        assert_eq!(LocationResponse::UnknownFailure.to_string(), "unknown failure");
    }

    #[test]
    fn test_location_serializes_with_flag_bits() {
        let value = serde_json::to_value(Location::new(1.5, 2.5, 42)).unwrap();
        assert_eq!(value["latitude"], 1.5);
        assert_eq!(value["timestamp"], 42);
        assert_eq!(
            value["flags"],
            (LocationFlags::LAT_LONG | LocationFlags::TIMESTAMP).bits()
        );
    }
}
