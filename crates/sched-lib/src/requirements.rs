//! Requirement extraction
//!
//! Converts a placement request into a [`DemandVector`]. CPU and memory
//! come from the summed container requests. Disk and network demand come
//! from annotations, with gaps filled by the configured [`IoEstimate`].

use crate::models::{DemandVector, Dimension, WorkloadSpec};
use crate::quantity::parse_throughput;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::debug;

const MIB: f64 = 1024.0 * 1024.0;
const GIB: f64 = MIB * 1024.0;

/// Annotation keys carrying explicit I/O demand
pub mod annotations {
    pub const DISK_READ: &str = "scheduler.extender/disk-read";
    pub const DISK_WRITE: &str = "scheduler.extender/disk-write";
    pub const NET_UP: &str = "scheduler.extender/net-up";
    pub const NET_DOWN: &str = "scheduler.extender/net-down";
}

/// Heuristic constants for [`IoEstimate::Heuristic`].
///
/// All rates are bytes/sec. Every rule only ever raises an estimate.
pub mod heuristic {
    use super::{GIB, MIB};

    pub const BASE_DISK_READ: f64 = 10.0 * MIB;
    pub const BASE_DISK_WRITE: f64 = 5.0 * MIB;
    pub const BASE_NET_UP: f64 = 1.0 * MIB;
    pub const BASE_NET_DOWN: f64 = 2.0 * MIB;

    /// Image substrings of storage engines
    pub const DATABASE_IMAGES: &[&str] = &["mysql", "postgres", "mongo", "redis"];
    pub const DATABASE_DISK_READ: f64 = 50.0 * MIB;
    pub const DATABASE_DISK_WRITE: f64 = 20.0 * MIB;

    /// Image substrings of web and API servers
    pub const WEB_IMAGES: &[&str] = &["nginx", "apache", "node", "tomcat"];
    pub const WEB_NET_UP: f64 = 20.0 * MIB;
    pub const WEB_NET_DOWN: f64 = 40.0 * MIB;

    /// CPU tiers raise disk demand: (min cores, disk read, disk write)
    pub const CPU_TIERS: &[(f64, f64, f64)] = &[
        (4.0, 100.0 * MIB, 50.0 * MIB),
        (2.0, 50.0 * MIB, 25.0 * MIB),
    ];

    /// Memory tiers raise network demand: (min bytes, net up, net down)
    pub const MEM_TIERS: &[(f64, f64, f64)] = &[
        (4.0 * GIB, 50.0 * MIB, 100.0 * MIB),
        (1.0 * GIB, 20.0 * MIB, 40.0 * MIB),
    ];
}

/// Per requested core rates for [`IoEstimate::PerCore`] (bytes/sec)
pub mod per_core {
    use super::MIB;

    pub const DISK_READ: f64 = 10.0 * MIB;
    pub const DISK_WRITE: f64 = 5.0 * MIB;
    pub const NET_UP: f64 = 5.0 * MIB;
    pub const NET_DOWN: f64 = 10.0 * MIB;
}

/// How unannotated I/O demand is estimated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IoEstimate {
    /// Base rates raised by image name and request size tiers
    #[default]
    Heuristic,
    /// Fixed rate per requested CPU core
    PerCore,
    /// No I/O demand unless annotated
    Zero,
}

impl FromStr for IoEstimate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "heuristic" => Ok(IoEstimate::Heuristic),
            "per-core" | "percore" | "per_core" => Ok(IoEstimate::PerCore),
            "zero" | "none" => Ok(IoEstimate::Zero),
            other => Err(format!("unknown I/O estimate mode: {}", other)),
        }
    }
}

/// Builds demand vectors from placement requests
#[derive(Debug, Clone, Copy, Default)]
pub struct RequirementExtractor {
    estimate: IoEstimate,
}

impl RequirementExtractor {
    pub fn new(estimate: IoEstimate) -> Self {
        Self { estimate }
    }

    pub fn estimate(&self) -> IoEstimate {
        self.estimate
    }

    /// Extract the demand vector of a workload
    pub fn extract(&self, spec: &WorkloadSpec) -> DemandVector {
        let cpu: f64 = spec
            .containers
            .iter()
            .map(|c| c.cpu_request.max(0.0))
            .sum();
        let mem: f64 = spec
            .containers
            .iter()
            .map(|c| c.mem_request.max(0.0))
            .sum();

        let estimated = self.estimate_io(spec, cpu, mem);
        let annotated = |key: &str| spec.annotations.get(key).and_then(|v| parse_throughput(v));

        let demand = DemandVector {
            cpu,
            mem,
            disk_read: annotated(annotations::DISK_READ).unwrap_or(estimated.disk_read),
            disk_write: annotated(annotations::DISK_WRITE).unwrap_or(estimated.disk_write),
            net_up: annotated(annotations::NET_UP).unwrap_or(estimated.net_up),
            net_down: annotated(annotations::NET_DOWN).unwrap_or(estimated.net_down),
            priority: spec.priority.unwrap_or(0),
        };

        debug!(
            workload = %spec.qualified_name(),
            cpu_cores = demand.cpu,
            mem_gib = demand.mem / GIB,
            disk_read_mib = demand.disk_read / MIB,
            disk_write_mib = demand.disk_write / MIB,
            net_up_mib = demand.net_up / MIB,
            net_down_mib = demand.net_down / MIB,
            priority = demand.priority,
            "Extracted workload requirements"
        );

        demand
    }

    fn estimate_io(&self, spec: &WorkloadSpec, cpu: f64, mem: f64) -> IoRates {
        match self.estimate {
            IoEstimate::Zero => IoRates::default(),
            IoEstimate::PerCore => IoRates {
                disk_read: cpu * per_core::DISK_READ,
                disk_write: cpu * per_core::DISK_WRITE,
                net_up: cpu * per_core::NET_UP,
                net_down: cpu * per_core::NET_DOWN,
            },
            IoEstimate::Heuristic => heuristic_rates(spec, cpu, mem),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct IoRates {
    disk_read: f64,
    disk_write: f64,
    net_up: f64,
    net_down: f64,
}

impl IoRates {
    fn raise(&mut self, dim: Dimension, floor: f64) {
        let slot = match dim {
            Dimension::DiskRead => &mut self.disk_read,
            Dimension::DiskWrite => &mut self.disk_write,
            Dimension::NetUp => &mut self.net_up,
            Dimension::NetDown => &mut self.net_down,
            Dimension::Cpu | Dimension::Memory => return,
        };
        *slot = slot.max(floor);
    }
}

fn heuristic_rates(spec: &WorkloadSpec, cpu: f64, mem: f64) -> IoRates {
    let mut rates = IoRates {
        disk_read: heuristic::BASE_DISK_READ,
        disk_write: heuristic::BASE_DISK_WRITE,
        net_up: heuristic::BASE_NET_UP,
        net_down: heuristic::BASE_NET_DOWN,
    };

    for container in &spec.containers {
        let image = container.image.to_lowercase();
        if heuristic::DATABASE_IMAGES.iter().any(|p| image.contains(p)) {
            rates.raise(Dimension::DiskRead, heuristic::DATABASE_DISK_READ);
            rates.raise(Dimension::DiskWrite, heuristic::DATABASE_DISK_WRITE);
        }
        if heuristic::WEB_IMAGES.iter().any(|p| image.contains(p)) {
            rates.raise(Dimension::NetUp, heuristic::WEB_NET_UP);
            rates.raise(Dimension::NetDown, heuristic::WEB_NET_DOWN);
        }
    }

    // Only the highest matching tier applies
    if let Some((_, read, write)) = heuristic::CPU_TIERS.iter().find(|(min, _, _)| cpu >= *min) {
        rates.raise(Dimension::DiskRead, *read);
        rates.raise(Dimension::DiskWrite, *write);
    }
    if let Some((_, up, down)) = heuristic::MEM_TIERS.iter().find(|(min, _, _)| mem >= *min) {
        rates.raise(Dimension::NetUp, *up);
        rates.raise(Dimension::NetDown, *down);
    }

    rates
}
