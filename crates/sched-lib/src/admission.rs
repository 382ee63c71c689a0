//! Admission filter
//!
//! A pure predicate over a demand vector and a node state. Dimensions are
//! checked in [`Dimension::ALL`] order and the first failure is reported.

use crate::models::{DemandVector, Dimension, NodeResourceState};
use serde::Serialize;
use std::fmt;

/// Why a dimension rejected the request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RejectionKind {
    /// Demand exceeds free capacity
    Capacity,
    /// Projected utilization exceeds the ceiling
    Utilization,
}

impl RejectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionKind::Capacity => "capacity",
            RejectionKind::Utilization => "utilization",
        }
    }
}

/// The first dimension that failed admission
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Rejection {
    pub dimension: Dimension,
    pub kind: RejectionKind,
    pub demand: f64,
    pub free: f64,
    pub total: f64,
    /// Ceiling in force when `kind` is `Utilization`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ceiling: Option<f64>,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            RejectionKind::Capacity => write!(
                f,
                "insufficient {}: requested {:.2}, free {:.2}",
                self.dimension, self.demand, self.free
            ),
            RejectionKind::Utilization => write!(
                f,
                "{} utilization would reach {:.2}, above ceiling {:.2}",
                self.dimension,
                projected_utilization(self.demand, self.free, self.total),
                self.ceiling.unwrap_or(1.0)
            ),
        }
    }
}

/// Result of an admission check
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    Admit,
    Reject(Rejection),
}

impl Verdict {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Verdict::Admit)
    }

    pub fn failing_dimension(&self) -> Option<Dimension> {
        match self {
            Verdict::Admit => None,
            Verdict::Reject(r) => Some(r.dimension),
        }
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Verdict::Admit => None,
            Verdict::Reject(r) => Some(r),
        }
    }
}

/// `1 - (free - demand) / total`
pub fn projected_utilization(demand: f64, free: f64, total: f64) -> f64 {
    if total <= 0.0 {
        return 1.0;
    }
    1.0 - (free - demand) / total
}

/// Decide whether `node` can take `demand`.
///
/// With a `ceiling`, a dimension is also rejected when its projected
/// utilization would exceed it. Zero-demand dimensions always pass.
pub fn admits(demand: &DemandVector, node: &NodeResourceState, ceiling: Option<f64>) -> Verdict {
    for dim in Dimension::ALL {
        let requested = demand.get(dim);
        if requested <= 0.0 {
            continue;
        }

        let free = node.free(dim);
        let total = node.total(dim);
        let mut rejection = Rejection {
            dimension: dim,
            kind: RejectionKind::Capacity,
            demand: requested,
            free,
            total,
            ceiling: None,
        };

        if requested > free {
            return Verdict::Reject(rejection);
        }

        if let Some(ceiling) = ceiling {
            if projected_utilization(requested, free, total) > ceiling {
                rejection.kind = RejectionKind::Utilization;
                rejection.ceiling = Some(ceiling);
                return Verdict::Reject(rejection);
            }
        }
    }

    Verdict::Admit
}

/// Admission filter with an optional utilization ceiling
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AdmissionFilter {
    ceiling: Option<f64>,
}

impl AdmissionFilter {
    /// Hard capacity checks only
    pub fn capacity_only() -> Self {
        Self { ceiling: None }
    }

    /// Hard checks plus a projected utilization ceiling, clamped to [0, 1]
    pub fn with_ceiling(ceiling: f64) -> Self {
        Self {
            ceiling: Some(ceiling.clamp(0.0, 1.0)),
        }
    }

    pub fn ceiling(&self) -> Option<f64> {
        self.ceiling
    }

    pub fn check(&self, demand: &DemandVector, node: &NodeResourceState) -> Verdict {
        admits(demand, node, self.ceiling)
    }
}
