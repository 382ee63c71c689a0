//! Scoring policies
//!
//! Two interchangeable strategies rank admitted nodes:
//! - [`WeightedUsage`] blends spreading and packing of post-placement
//!   utilization with per-dimension weights
//! - [`DominantShare`] prefers the node on which the request's largest
//!   share of free capacity is smallest

use crate::models::{DemandVector, Dimension, NodeResourceState};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Default upper bound of a score
pub const DEFAULT_MAX_SCORE: i64 = 100;

/// A node desirability function for one request
pub trait ScoringPolicy: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Score in `[0, max_score]`, higher is better
    fn score(&self, demand: &DemandVector, node: &NodeResourceState) -> i64;

    fn max_score(&self) -> i64;

    /// Whether scores should be rescaled across nodes after scoring
    fn normalizes(&self) -> bool {
        false
    }
}

/// Per-dimension weights of [`WeightedUsage`]
pub fn usage_weight(dim: Dimension) -> f64 {
    match dim {
        Dimension::Cpu => 0.4,
        Dimension::Memory => 0.3,
        Dimension::DiskRead | Dimension::DiskWrite | Dimension::NetUp | Dimension::NetDown => 0.075,
    }
}

/// Utilization after placing `demand`, clamped to [0, 1].
///
/// A dimension with no capacity counts as unused.
pub fn post_placement_usage(demand: f64, free: f64, total: f64) -> f64 {
    if total <= 0.0 {
        return 0.0;
    }
    ((total - free + demand) / total).clamp(0.0, 1.0)
}

/// Weighted blend of spreading and packing.
///
/// `alpha < 0.5` leans towards spreading (low usage scores high),
/// `alpha >= 0.5` towards packing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightedUsage {
    alpha: f64,
    max_score: i64,
}

impl WeightedUsage {
    pub fn new(alpha: f64, max_score: i64) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            max_score,
        }
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Blend of `1 - usage` and `usage`, linear in alpha on each side of 0.5
    pub fn blend(&self, usage: f64) -> f64 {
        let spread = 1.0 - usage;
        let pack = usage;
        if self.alpha < 0.5 {
            spread * (1.0 - 2.0 * self.alpha) + pack * (2.0 * self.alpha)
        } else {
            spread * (2.0 - 2.0 * self.alpha) + pack * (2.0 * self.alpha - 1.0)
        }
    }
}

impl ScoringPolicy for WeightedUsage {
    fn name(&self) -> &'static str {
        "weighted-usage"
    }

    fn score(&self, demand: &DemandVector, node: &NodeResourceState) -> i64 {
        let total: f64 = Dimension::ALL
            .iter()
            .map(|dim| {
                let usage = post_placement_usage(demand.get(*dim), node.free(*dim), node.total(*dim));
                self.blend(usage) * usage_weight(*dim)
            })
            .sum();

        ((total * self.max_score as f64) as i64).clamp(0, self.max_score)
    }

    fn max_score(&self) -> i64 {
        self.max_score
    }

    fn normalizes(&self) -> bool {
        true
    }
}

/// `max_score * (1 - max(demand_i / free_i))` over nonzero demands
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DominantShare {
    max_score: i64,
}

impl DominantShare {
    pub fn new(max_score: i64) -> Self {
        Self { max_score }
    }

    /// Largest demand to free ratio over tracked dimensions.
    ///
    /// `None` when no nonzero demand falls on a dimension the node tracks.
    pub fn dominant_share(demand: &DemandVector, node: &NodeResourceState) -> Option<f64> {
        Dimension::ALL
            .iter()
            .filter(|dim| demand.get(**dim) > 0.0 && node.total(**dim) > 0.0)
            .map(|dim| {
                let free = node.free(*dim);
                if free <= 0.0 {
                    f64::INFINITY
                } else {
                    demand.get(*dim) / free
                }
            })
            .fold(None, |acc: Option<f64>, share| {
                Some(acc.map_or(share, |a| a.max(share)))
            })
    }
}

impl ScoringPolicy for DominantShare {
    fn name(&self) -> &'static str {
        "dominant-share"
    }

    fn score(&self, demand: &DemandVector, node: &NodeResourceState) -> i64 {
        if demand.is_zero() {
            return self.max_score;
        }
        match Self::dominant_share(demand, node) {
            None => self.max_score / 2,
            Some(share) => {
                let score = self.max_score as f64 * (1.0 - share);
                if score.is_nan() || score < 0.0 {
                    0
                } else {
                    score as i64
                }
            }
        }
    }

    fn max_score(&self) -> i64 {
        self.max_score
    }
}

/// Which policy a front end uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScoringMode {
    WeightedUsage,
    #[default]
    DominantShare,
}

impl ScoringMode {
    pub fn build(&self, alpha: f64, max_score: i64) -> Arc<dyn ScoringPolicy> {
        match self {
            ScoringMode::WeightedUsage => Arc::new(WeightedUsage::new(alpha, max_score)),
            ScoringMode::DominantShare => Arc::new(DominantShare::new(max_score)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScoringMode::WeightedUsage => "weighted-usage",
            ScoringMode::DominantShare => "dominant-share",
        }
    }
}

impl FromStr for ScoringMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "weighted-usage" | "weighted" | "balanced" => Ok(ScoringMode::WeightedUsage),
            "dominant-share" | "dominant" | "drf" => Ok(ScoringMode::DominantShare),
            other => Err(format!("unknown scoring mode: {}", other)),
        }
    }
}

/// Rescale `scores` linearly onto `[0, max_score]` using the observed
/// minimum and maximum.
///
/// When every score is equal the slice is left untouched, even if the
/// common value lies outside the range.
pub fn normalize_scores(scores: &mut [i64], max_score: i64) {
    let (Some(lo), Some(hi)) = (scores.iter().min().copied(), scores.iter().max().copied()) else {
        return;
    };
    if hi == lo {
        return;
    }
    for score in scores.iter_mut() {
        *score = (*score - lo) * max_score / (hi - lo);
    }
}
