//! Summary options.

use crate::error::{Result, SummaryError};
use std::str::FromStr;

/// How node heights of the summary tree are set.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum HeightSummary {
    /// Keep the target tree's own heights.
    Keep,
    /// Posterior mean height of each clade.
    #[default]
    Mean,
    /// Posterior median height of each clade.
    Median,
    /// Common-ancestor heights (Heled & Bouckaert 2013).
    CommonAncestor,
}

/// How the summary topology is chosen.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum TargetTopology {
    /// Maximum clade credibility: maximize `Σ ln(credibility)`.
    #[default]
    MaxCladeCredibility,
    /// Maximum sum of clade credibilities.
    MaxSumCladeCredibility,
}

impl FromStr for HeightSummary {
    type Err = SummaryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "keep" => Ok(HeightSummary::Keep),
            "mean" => Ok(HeightSummary::Mean),
            "median" => Ok(HeightSummary::Median),
            "ca" => Ok(HeightSummary::CommonAncestor),
            other => Err(SummaryError::Configuration(format!(
                "unknown heights '{other}', expected keep, mean, median or ca"
            ))),
        }
    }
}

impl FromStr for TargetTopology {
    type Err = SummaryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mcc" => Ok(TargetTopology::MaxCladeCredibility),
            "mscc" => Ok(TargetTopology::MaxSumCladeCredibility),
            other => Err(SummaryError::Configuration(format!(
                "unknown topology '{other}', expected mcc or mscc"
            ))),
        }
    }
}

impl TargetTopology {
    pub fn uses_sum_credibility(self) -> bool {
        matches!(self, TargetTopology::MaxSumCladeCredibility)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SummaryConfig {
    pub heights: HeightSummary,
    pub topology: TargetTopology,
    /// Nodes with posterior support below this are flagged as filtered.
    pub posterior_limit: f64,
    pub hpd_mass: f64,
    pub hpd2d_mass: f64,
    pub process_sampled_ancestors: bool,
    /// Joint 2D HPD regions for two-component attributes.
    pub process_bivariate: bool,
    /// Treat integral numeric attributes as discrete labels.
    pub discrete_integers: bool,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        SummaryConfig {
            heights: HeightSummary::default(),
            topology: TargetTopology::default(),
            posterior_limit: 0.0,
            hpd_mass: 0.95,
            hpd2d_mass: 0.80,
            process_sampled_ancestors: true,
            process_bivariate: true,
            discrete_integers: false,
        }
    }
}

impl SummaryConfig {
    /// Rejects incompatible options before any pass over the posterior.
    pub fn validate(&self) -> Result<()> {
        if self.heights == HeightSummary::CommonAncestor && self.process_sampled_ancestors {
            return Err(SummaryError::Configuration(
                "common-ancestor heights are undefined for sampled-ancestor trees; disable sampled-ancestor processing".to_string(),
            ));
        }
        for (name, mass) in [("HPD mass", self.hpd_mass), ("2D HPD mass", self.hpd2d_mass)] {
            if !(mass > 0.0 && mass < 1.0) {
                return Err(SummaryError::Configuration(format!(
                    "{name} must lie in (0, 1), got {mass}"
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.posterior_limit) {
            return Err(SummaryError::Configuration(format!(
                "posterior limit must lie in [0, 1], got {}",
                self.posterior_limit
            )));
        }
        Ok(())
    }

    /// Output suffix for the 1D interval, e.g. `95%_HPD`.
    pub fn hpd_label(&self) -> String {
        format!("{}%_HPD", (self.hpd_mass * 100.0).round() as i64)
    }

    /// Output infix for the 2D region, e.g. `80%HPD`.
    pub fn hpd2d_label(&self) -> String {
        format!("{}%HPD", (self.hpd2d_mass * 100.0).round() as i64)
    }
}
