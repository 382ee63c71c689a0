//! Node name to metrics instance label matching

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

/// Port node-exporter listens on
pub const NODE_EXPORTER_PORT: u16 = 9100;

/// What to do when no instance label can be attributed to a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchPolicy {
    /// Treat the node as absent from the metrics source
    #[default]
    FailClosed,
    /// Borrow the first sample in label order. Can attribute one node's
    /// metrics to another.
    AnyAvailable,
}

impl FromStr for MatchPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail-closed" | "failclosed" | "strict" => Ok(MatchPolicy::FailClosed),
            "any-available" | "anyavailable" | "any" => Ok(MatchPolicy::AnyAvailable),
            other => Err(format!("unknown match policy: {}", other)),
        }
    }
}

/// How a sample was attributed to a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    ExporterPort,
    HostPart,
    Substring,
    /// Taken under [`MatchPolicy::AnyAvailable`] without any name match
    Borrowed,
}

/// Attributes samples keyed by instance label to node names
#[derive(Debug, Clone, Copy, Default)]
pub struct InstanceMatcher {
    policy: MatchPolicy,
}

impl InstanceMatcher {
    pub fn new(policy: MatchPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> MatchPolicy {
        self.policy
    }

    /// Find the sample for `node`.
    ///
    /// Candidates are tried in this order: exact label, `<node>:9100`,
    /// host part of a `host:port` label, then substring containment in
    /// either direction. Labels are scanned in sorted order.
    pub fn find(&self, node: &str, samples: &HashMap<String, f64>) -> Option<(f64, MatchKind)> {
        if samples.is_empty() {
            return None;
        }
        if let Some(v) = samples.get(node) {
            return Some((*v, MatchKind::Exact));
        }
        if let Some(v) = samples.get(&format!("{}:{}", node, NODE_EXPORTER_PORT)) {
            return Some((*v, MatchKind::ExporterPort));
        }

        let mut labels: Vec<&String> = samples.keys().collect();
        labels.sort();

        if let Some(label) = labels.iter().find(|l| host_part(l) == node) {
            return Some((samples[*label], MatchKind::HostPart));
        }

        let substring = labels.iter().find(|l| {
            let host = host_part(l);
            l.contains(node) || (!host.is_empty() && node.contains(host))
        });
        if let Some(label) = substring {
            return Some((samples[*label], MatchKind::Substring));
        }

        match self.policy {
            MatchPolicy::FailClosed => None,
            MatchPolicy::AnyAvailable => labels
                .first()
                .map(|label| (samples[*label], MatchKind::Borrowed)),
        }
    }
}

/// `host` of a `host:port` instance label
pub fn host_part(label: &str) -> &str {
    label.split(':').next().unwrap_or(label)
}
