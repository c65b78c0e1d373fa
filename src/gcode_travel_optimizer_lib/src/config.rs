//! Tunables for the optimizer. Every field has a built-in default, so an empty JSON object is a
//! complete config.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{OptimizeError, Result};
use crate::travel::TourBudget;
use crate::Mm;

/// Upper bounds for feed rates the optimizer writes itself. Feed rates copied from the input are
/// never changed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeedLimits {
    pub max_travel_feed_rate: Mm,
    pub max_print_feed_rate: Mm,
}

/// Number of decimals written for each kind of value in synthesized commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Decimals {
    pub coordinate: usize,
    pub extrusion: usize,
    pub feed_rate: usize,
}

impl Default for Decimals {
    fn default() -> Self {
        Self { coordinate: 3, extrusion: 5, feed_rate: 0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Feed rate (mm/min) of inserted travel moves.
    pub travel_feed_rate: Mm,

    /// Feed rate restored before a moved segment that relied on a modal feed rate the input never
    /// set.
    pub extrude_feed_rate: Mm,

    /// A segment start further than this from the nozzle on any axis gets a travel move.
    pub positional_tolerance: Mm,

    /// Per-axis tolerance for treating a move as going nowhere.
    pub redundant_move_tolerance: Mm,

    /// Minimum saving for a 2-opt reversal to be taken.
    pub improvement_epsilon: Mm,

    /// Minimum extruder increase for a move to count as depositing.
    pub deposit_epsilon: Mm,

    /// Z difference that starts a new layer when the input has no layer comments.
    pub layer_z_tolerance: Mm,

    /// Maximum 2-opt passes per feature block. 0 keeps the nearest-neighbour order.
    pub max_2opt_passes: usize,

    /// Wall-clock cap on 2-opt per feature block.
    pub time_budget_ms: Option<u64>,

    pub feed_limits: Option<FeedLimits>,

    /// Re-establish the extruder position with G92 when a moved segment expects a different
    /// absolute E than the nozzle has.
    pub resync_extruder: bool,

    pub filter_redundant_moves: bool,

    pub decimals: Decimals,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            travel_feed_rate: 3000.0,
            extrude_feed_rate: 1200.0,
            positional_tolerance: 1e-3,
            redundant_move_tolerance: 1e-4,
            improvement_epsilon: 1e-5,
            deposit_epsilon: 1e-5,
            layer_z_tolerance: 1e-3,
            max_2opt_passes: 100,
            time_budget_ms: None,
            feed_limits: None,
            resync_extruder: true,
            filter_redundant_moves: true,
            decimals: Decimals::default(),
        }
    }
}

impl OptimizerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(OptimizeError::io(path))?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: OptimizerConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_travel_feed_rate(mut self, feed_rate: Mm) -> Self {
        self.travel_feed_rate = feed_rate;
        self
    }

    pub fn with_max_2opt_passes(mut self, passes: usize) -> Self {
        self.max_2opt_passes = passes;
        self
    }

    pub fn with_time_budget_ms(mut self, millis: u64) -> Self {
        self.time_budget_ms = Some(millis);
        self
    }

    pub fn with_feed_limits(mut self, limits: FeedLimits) -> Self {
        self.feed_limits = Some(limits);
        self
    }

    pub fn with_resync_extruder(mut self, resync: bool) -> Self {
        self.resync_extruder = resync;
        self
    }

    pub fn with_filter_redundant_moves(mut self, filter: bool) -> Self {
        self.filter_redundant_moves = filter;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let tolerances = [
            ("positional_tolerance", self.positional_tolerance),
            ("redundant_move_tolerance", self.redundant_move_tolerance),
            ("improvement_epsilon", self.improvement_epsilon),
            ("deposit_epsilon", self.deposit_epsilon),
            ("layer_z_tolerance", self.layer_z_tolerance),
        ];
        for (name, value) in tolerances {
            if !value.is_finite() || value < 0.0 {
                return Err(OptimizeError::InvalidConfig(format!("{} must be finite and >= 0, got {}", name, value)));
            }
        }
        let mut feed_rates = vec![("travel_feed_rate", self.travel_feed_rate), ("extrude_feed_rate", self.extrude_feed_rate)];
        if let Some(limits) = &self.feed_limits {
            feed_rates.push(("feed_limits.max_travel_feed_rate", limits.max_travel_feed_rate));
            feed_rates.push(("feed_limits.max_print_feed_rate", limits.max_print_feed_rate));
        }
        for (name, value) in feed_rates {
            if !value.is_finite() || value <= 0.0 {
                return Err(OptimizeError::InvalidConfig(format!("{} must be finite and > 0, got {}", name, value)));
            }
        }
        Ok(())
    }

    pub fn tour_budget(&self) -> TourBudget {
        TourBudget {
            max_passes: self.max_2opt_passes,
            time_limit: self.time_budget_ms.map(Duration::from_millis),
            improvement_epsilon: self.improvement_epsilon,
        }
    }

    pub fn travel_feed(&self) -> Mm {
        match &self.feed_limits {
            Some(limits) => self.travel_feed_rate.min(limits.max_travel_feed_rate),
            None => self.travel_feed_rate,
        }
    }

    /// Clamps a print feed rate the optimizer is about to write.
    pub fn print_feed(&self, feed_rate: Mm) -> Mm {
        match &self.feed_limits {
            Some(limits) => feed_rate.min(limits.max_print_feed_rate),
            None => feed_rate,
        }
    }
}
