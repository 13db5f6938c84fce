//! Observation and report types entering hazard fusion.
//!
//! Producers (gauge pollers, weather clients, crowdsource pipelines) are out
//! of process scope; they hand these values to the simulation bus. Validation
//! lives here so every entry path applies the same rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use masfro_core::geo::valid_coordinates;

/// Plausibility caps for gauge and rain readings. Values outside are dropped
/// as sensor glitches rather than clamped.
const MAX_WATER_LEVEL_M: f64 = 50.0;
const MAX_RAINFALL_MM: f64 = 500.0;

/// PAGASA-style rainfall intensity classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RainfallIntensity {
    Light,
    Moderate,
    Heavy,
    Intense,
    Torrential,
}

impl RainfallIntensity {
    /// Severity contribution of the class on a [0, 1] scale.
    pub fn severity(&self) -> f64 {
        match self {
            RainfallIntensity::Light => 0.2,
            RainfallIntensity::Moderate => 0.4,
            RainfallIntensity::Heavy => 0.6,
            RainfallIntensity::Intense => 0.8,
            RainfallIntensity::Torrential => 1.0,
        }
    }
}

/// A gauge or weather datum: station-level, used as a global environmental
/// factor rather than a per-edge depth.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FloodObservation {
    /// River gauge reading with its alert thresholds (meters).
    RiverLevel {
        station_name: String,
        water_level_m: f64,
        alert_level_m: f64,
        alarm_level_m: f64,
        critical_level_m: f64,
        timestamp: DateTime<Utc>,
    },
    /// Point rainfall accumulation.
    WeatherPoint {
        rainfall_1h_mm: f64,
        rainfall_3h_mm: f64,
        intensity: RainfallIntensity,
        timestamp: DateTime<Utc>,
    },
    /// Reservoir level against its normal high water level.
    DamLevel {
        name: String,
        rwl_m: f64,
        nhwl_m: f64,
        deviation_m: f64,
        timestamp: DateTime<Utc>,
    },
}

impl FloodObservation {
    /// Label the observation groups under in the short-term cache.
    pub fn label(&self) -> &str {
        match self {
            FloodObservation::RiverLevel { station_name, .. } => station_name,
            FloodObservation::WeatherPoint { .. } => "weather",
            FloodObservation::DamLevel { name, .. } => name,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            FloodObservation::RiverLevel { timestamp, .. }
            | FloodObservation::WeatherPoint { timestamp, .. }
            | FloodObservation::DamLevel { timestamp, .. } => *timestamp,
        }
    }

    /// Check plausibility; `Err` carries the reason for the drop log.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            FloodObservation::RiverLevel {
                station_name,
                water_level_m,
                alert_level_m,
                critical_level_m,
                ..
            } => {
                if station_name.trim().is_empty() {
                    return Err("river reading has empty station name".into());
                }
                if !(0.0..=MAX_WATER_LEVEL_M).contains(water_level_m) {
                    return Err(format!(
                        "water level {} m outside [0, {}]",
                        water_level_m, MAX_WATER_LEVEL_M
                    ));
                }
                if critical_level_m <= alert_level_m {
                    return Err(format!(
                        "station '{}' thresholds inverted (alert {}, critical {})",
                        station_name, alert_level_m, critical_level_m
                    ));
                }
                Ok(())
            }
            FloodObservation::WeatherPoint {
                rainfall_1h_mm,
                rainfall_3h_mm,
                ..
            } => {
                for rain in [rainfall_1h_mm, rainfall_3h_mm] {
                    if !(0.0..=MAX_RAINFALL_MM).contains(rain) {
                        return Err(format!("rainfall {} mm outside [0, {}]", rain, MAX_RAINFALL_MM));
                    }
                }
                Ok(())
            }
            FloodObservation::DamLevel { name, rwl_m, .. } => {
                if name.trim().is_empty() {
                    return Err("dam reading has empty name".into());
                }
                if !rwl_m.is_finite() || *rwl_m < 0.0 {
                    return Err(format!("dam water level {} m implausible", rwl_m));
                }
                Ok(())
            }
        }
    }

    /// Severity of this observation on a [0, 1] scale, for the global
    /// environmental factor.
    pub fn severity(&self) -> f64 {
        match self {
            FloodObservation::RiverLevel {
                water_level_m,
                alert_level_m,
                critical_level_m,
                ..
            } => {
                // Below alert contributes a small proportional share; alert to
                // critical sweeps the remaining range.
                if *water_level_m < *alert_level_m {
                    0.3 * (water_level_m / alert_level_m).clamp(0.0, 1.0)
                } else {
                    let span = critical_level_m - alert_level_m;
                    (0.3 + 0.7 * (water_level_m - alert_level_m) / span).clamp(0.0, 1.0)
                }
            }
            FloodObservation::WeatherPoint {
                rainfall_1h_mm,
                intensity,
                ..
            } => {
                // 30 mm/h is already torrential-class rain
                intensity.severity().max((rainfall_1h_mm / 30.0).clamp(0.0, 1.0))
            }
            FloodObservation::DamLevel { deviation_m, .. } => {
                // Positive deviation above NHWL; 2 m over is treated as critical
                (deviation_m / 2.0).clamp(0.0, 1.0)
            }
        }
    }
}

/// Kind of crowdsourced report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportType {
    #[default]
    Observation,
    Warning,
    Evacuation,
}

/// A validated crowdsourced observation of flood conditions.
///
/// Reports without coordinates still contribute through label-keyed fusion
/// but cannot drive spatial decay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoutReport {
    pub location_label: String,
    /// Flood severity estimate in [0, 1]
    pub severity: f64,
    /// Reporter/model confidence in [0, 1]
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    /// (lat, lon) when the report was geocoded
    #[serde(default)]
    pub coordinates: Option<(f64, f64)>,
    #[serde(default)]
    pub report_type: ReportType,
    #[serde(default)]
    pub source_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

fn default_confidence() -> f64 {
    1.0
}

impl ScoutReport {
    pub fn new(label: impl Into<String>, severity: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            location_label: label.into(),
            severity,
            confidence: 1.0,
            coordinates: None,
            report_type: ReportType::Observation,
            source_id: None,
            timestamp,
        }
    }

    pub fn with_coordinates(mut self, lat: f64, lon: f64) -> Self {
        self.coordinates = Some((lat, lon));
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    /// Intake validation; `Err` carries the reason for the drop log.
    pub fn validate(&self) -> Result<(), String> {
        if self.location_label.trim().is_empty() {
            return Err("scout report has empty location label".into());
        }
        if !(0.0..=1.0).contains(&self.severity) {
            return Err(format!("severity {} outside [0, 1]", self.severity));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(format!("confidence {} outside [0, 1]", self.confidence));
        }
        if let Some((lat, lon)) = self.coordinates {
            if !valid_coordinates(lat, lon) {
                return Err(format!("coordinates ({}, {}) implausible", lat, lon));
            }
        }
        Ok(())
    }

    /// Canonical key for O(1) duplicate rejection. Coordinates round to
    /// ~1 m (5 decimals), severity to 3, so re-ingesting the same report from
    /// a replayed bus batch never double-counts.
    pub fn dedup_key(&self) -> ScoutKey {
        ScoutKey {
            label: self.location_label.clone(),
            lat_e5: self.coordinates.map(|(lat, _)| (lat * 1e5).round() as i64),
            lon_e5: self.coordinates.map(|(_, lon)| (lon * 1e5).round() as i64),
            timestamp_ms: self.timestamp.timestamp_millis(),
            severity_e3: (self.severity * 1e3).round() as i64,
        }
    }
}

/// See [`ScoutReport::dedup_key`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScoutKey {
    label: String,
    lat_e5: Option<i64>,
    lon_e5: Option<i64>,
    timestamp_ms: i64,
    severity_e3: i64,
}
