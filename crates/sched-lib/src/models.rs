//! Core data models for the scheduling core

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A schedulable resource dimension.
///
/// The declaration order is the fixed order in which admission checks
/// dimensions and in which failures are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Dimension {
    Cpu,
    Memory,
    DiskRead,
    DiskWrite,
    NetUp,
    NetDown,
}

impl Dimension {
    /// All dimensions in admission order
    pub const ALL: [Dimension; 6] = [
        Dimension::Cpu,
        Dimension::Memory,
        Dimension::DiskRead,
        Dimension::DiskWrite,
        Dimension::NetUp,
        Dimension::NetDown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Cpu => "cpu",
            Dimension::Memory => "mem",
            Dimension::DiskRead => "diskRead",
            Dimension::DiskWrite => "diskWrite",
            Dimension::NetUp => "netUp",
            Dimension::NetDown => "netDown",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last known resource capacity and availability of a node.
///
/// CPU is in cores, memory in bytes, disk and network in bytes/sec.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeResourceState {
    pub cpu_total: f64,
    pub cpu_free: f64,
    pub mem_total: f64,
    pub mem_free: f64,
    pub disk_read_total: f64,
    pub disk_read_free: f64,
    pub disk_write_total: f64,
    pub disk_write_free: f64,
    pub net_up_total: f64,
    pub net_up_free: f64,
    pub net_down_total: f64,
    pub net_down_free: f64,
}

impl NodeResourceState {
    pub fn total(&self, dim: Dimension) -> f64 {
        match dim {
            Dimension::Cpu => self.cpu_total,
            Dimension::Memory => self.mem_total,
            Dimension::DiskRead => self.disk_read_total,
            Dimension::DiskWrite => self.disk_write_total,
            Dimension::NetUp => self.net_up_total,
            Dimension::NetDown => self.net_down_total,
        }
    }

    pub fn free(&self, dim: Dimension) -> f64 {
        match dim {
            Dimension::Cpu => self.cpu_free,
            Dimension::Memory => self.mem_free,
            Dimension::DiskRead => self.disk_read_free,
            Dimension::DiskWrite => self.disk_write_free,
            Dimension::NetUp => self.net_up_free,
            Dimension::NetDown => self.net_down_free,
        }
    }

    /// Set both capacity and availability of one dimension
    pub fn set(&mut self, dim: Dimension, total: f64, free: f64) {
        let (t, f) = match dim {
            Dimension::Cpu => (&mut self.cpu_total, &mut self.cpu_free),
            Dimension::Memory => (&mut self.mem_total, &mut self.mem_free),
            Dimension::DiskRead => (&mut self.disk_read_total, &mut self.disk_read_free),
            Dimension::DiskWrite => (&mut self.disk_write_total, &mut self.disk_write_free),
            Dimension::NetUp => (&mut self.net_up_total, &mut self.net_up_free),
            Dimension::NetDown => (&mut self.net_down_total, &mut self.net_down_free),
        };
        *t = total;
        *f = free;
    }

    /// Enforce `0 <= free <= total` on every dimension.
    ///
    /// Negative or NaN values collapse to zero.
    pub fn clamped(mut self) -> Self {
        for dim in Dimension::ALL {
            let total = non_negative(self.total(dim));
            let free = non_negative(self.free(dim)).min(total);
            self.set(dim, total, free);
        }
        self
    }
}

fn non_negative(v: f64) -> f64 {
    if v.is_nan() || v < 0.0 {
        0.0
    } else {
        v
    }
}

/// Normalized multi-dimensional demand of one placement request
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DemandVector {
    pub cpu: f64,
    pub mem: f64,
    pub disk_read: f64,
    pub disk_write: f64,
    pub net_up: f64,
    pub net_down: f64,
    /// Higher is more important
    pub priority: i32,
}

impl DemandVector {
    pub fn get(&self, dim: Dimension) -> f64 {
        match dim {
            Dimension::Cpu => self.cpu,
            Dimension::Memory => self.mem,
            Dimension::DiskRead => self.disk_read,
            Dimension::DiskWrite => self.disk_write,
            Dimension::NetUp => self.net_up,
            Dimension::NetDown => self.net_down,
        }
    }

    /// True when no dimension carries a positive demand
    pub fn is_zero(&self) -> bool {
        Dimension::ALL.iter().all(|d| self.get(*d) <= 0.0)
    }
}

/// Reduced projection of a workload currently bound to a node, used
/// only when evaluating preemption candidates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunningWorkload {
    pub id: String,
    pub namespace: String,
    pub cpu_request: f64,
    pub mem_request: f64,
    #[serde(default)]
    pub disk_read_request: f64,
    #[serde(default)]
    pub disk_write_request: f64,
    #[serde(default)]
    pub net_up_request: f64,
    #[serde(default)]
    pub net_down_request: f64,
    pub priority: i32,
}

impl RunningWorkload {
    /// Request of this workload on a dimension (zero when not tracked)
    pub fn request(&self, dim: Dimension) -> f64 {
        match dim {
            Dimension::Cpu => self.cpu_request,
            Dimension::Memory => self.mem_request,
            Dimension::DiskRead => self.disk_read_request,
            Dimension::DiskWrite => self.disk_write_request,
            Dimension::NetUp => self.net_up_request,
            Dimension::NetDown => self.net_down_request,
        }
    }

    /// `namespace/id` for logs and failure reports
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.namespace, self.id)
    }
}

/// A container of a placement request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// Requested CPU in cores
    pub cpu_request: f64,
    /// Requested memory in bytes
    pub mem_request: f64,
}

/// Placement request as seen by the scheduling core
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSpec {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub containers: Vec<ContainerSpec>,
    #[serde(default)]
    pub priority: Option<i32>,
}

impl WorkloadSpec {
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}
