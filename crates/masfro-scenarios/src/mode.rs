//! Simulation flood scenario modes.

use serde::{Deserialize, Serialize};

use masfro_core::{MasfroError, MasfroResult};
use masfro_geo::ReturnPeriod;

/// Flood scenario severity selecting which raster series drives fusion and
/// how quickly evacuation centers fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimulationMode {
    /// 2-year return period
    Light,
    /// 5-year return period
    Medium,
    /// 25-year return period
    Heavy,
}

impl SimulationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SimulationMode::Light => "light",
            SimulationMode::Medium => "medium",
            SimulationMode::Heavy => "heavy",
        }
    }

    pub fn parse(s: &str) -> MasfroResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "light" => Ok(SimulationMode::Light),
            "medium" => Ok(SimulationMode::Medium),
            "heavy" => Ok(SimulationMode::Heavy),
            other => Err(MasfroError::InvalidMode(other.to_string())),
        }
    }

    /// Raster series the mode maps onto.
    pub fn return_period(&self) -> ReturnPeriod {
        match self {
            SimulationMode::Light => ReturnPeriod::Rr01,
            SimulationMode::Medium => ReturnPeriod::Rr02,
            SimulationMode::Heavy => ReturnPeriod::Rr04,
        }
    }

    /// Evacuation arrival rate multiplier: heavier floods move more people.
    pub fn arrival_multiplier(&self) -> f64 {
        match self {
            SimulationMode::Light => 1.0,
            SimulationMode::Medium => 2.0,
            SimulationMode::Heavy => 3.5,
        }
    }
}

impl std::fmt::Display for SimulationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parse() {
        assert_eq!(SimulationMode::parse("light").unwrap(), SimulationMode::Light);
        assert_eq!(SimulationMode::parse("HEAVY").unwrap(), SimulationMode::Heavy);
        assert!(matches!(
            SimulationMode::parse("storm").unwrap_err(),
            MasfroError::InvalidMode(_)
        ));
    }

    #[test]
    fn test_mode_return_periods() {
        assert_eq!(SimulationMode::Light.return_period(), ReturnPeriod::Rr01);
        assert_eq!(SimulationMode::Medium.return_period(), ReturnPeriod::Rr02);
        assert_eq!(SimulationMode::Heavy.return_period(), ReturnPeriod::Rr04);
    }

    #[test]
    fn test_arrival_multipliers() {
        assert_eq!(SimulationMode::Light.arrival_multiplier(), 1.0);
        assert_eq!(SimulationMode::Heavy.arrival_multiplier(), 3.5);
    }
}
