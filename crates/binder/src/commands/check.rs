//! Dry-run a hypothetical request against the cluster

use anyhow::{anyhow, Result};
use colored::Colorize;
use sched_lib::{
    quantity::{parse_quantity, parse_throughput},
    DemandVector, NodeEvaluation, PlaceError,
};
use serde::Serialize;
use tabled::Tabled;

use crate::context::{tunables, GlobalOptions, SchedulerContext};
use crate::output::{
    color_verdict, format_bytes, format_cpu, format_rate, print_error, print_json, print_success,
    print_table, print_warning, OutputFormat,
};

/// Flags of `mrsched check`
pub struct CheckRequest {
    pub cpu: f64,
    pub mem: String,
    pub disk_read: String,
    pub disk_write: String,
    pub net_up: String,
    pub net_down: String,
    pub priority: i32,
    pub node: Option<String>,
    pub preempt: bool,
}

impl CheckRequest {
    pub fn demand(&self) -> Result<DemandVector> {
        if !self.cpu.is_finite() || self.cpu < 0.0 {
            return Err(anyhow!("invalid cpu request: {}", self.cpu));
        }
        let mem = parse_quantity(&self.mem)
            .ok_or_else(|| anyhow!("invalid memory quantity: {}", self.mem))?;
        let rate = |flag: &str, raw: &str| {
            parse_throughput(raw).ok_or_else(|| anyhow!("invalid {flag} throughput: {raw}"))
        };

        Ok(DemandVector {
            cpu: self.cpu,
            mem,
            disk_read: rate("disk-read", &self.disk_read)?,
            disk_write: rate("disk-write", &self.disk_write)?,
            net_up: rate("net-up", &self.net_up)?,
            net_down: rate("net-down", &self.net_down)?,
            priority: self.priority,
        })
    }
}

#[derive(Tabled, Serialize)]
#[serde(rename_all = "camelCase")]
struct EvaluationRow {
    #[tabled(rename = "Node")]
    node: String,
    #[tabled(rename = "Verdict")]
    verdict: String,
    #[tabled(rename = "Score")]
    score: i64,
    #[tabled(rename = "CPU Free")]
    cpu_free: String,
    #[tabled(rename = "Mem Free")]
    mem_free: String,
    #[tabled(rename = "Net Up Free")]
    net_up_free: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

impl EvaluationRow {
    fn from_evaluation(eval: &NodeEvaluation, colored: bool) -> Self {
        let verdict = if eval.admitted() { "admit" } else { "reject" };
        let unknown = || "-".to_string();
        Self {
            node: eval.node.clone(),
            verdict: if colored {
                color_verdict(eval.admitted(), verdict)
            } else {
                verdict.to_string()
            },
            score: eval.score,
            cpu_free: eval.state.map_or_else(unknown, |s| format_cpu(s.cpu_free)),
            mem_free: eval.state.map_or_else(unknown, |s| format_bytes(s.mem_free)),
            net_up_free: eval.state.map_or_else(unknown, |s| format_rate(s.net_up_free)),
            reason: eval.reason.clone().unwrap_or_default(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PlacementReport {
    node: String,
    score: i64,
    evicted: Vec<String>,
}

/// Evaluate the request on every candidate node
pub async fn check(
    options: &GlobalOptions<'_>,
    request: CheckRequest,
    format: OutputFormat,
) -> Result<()> {
    let demand = request.demand()?;
    let mut tunables = tunables(options)?;
    tunables.preemption_enabled = request.preempt;

    let ctx = SchedulerContext::build(options, tunables, None).await?;
    let service = ctx.service(request.preempt);
    let nodes = ctx.candidate_nodes(request.node.as_deref()).await?;

    if request.preempt {
        return place(&service, &demand, &nodes, format).await;
    }

    let evaluations = service.evaluate(&demand, &nodes).await;
    match format {
        OutputFormat::Json => {
            let rows: Vec<_> = evaluations
                .iter()
                .map(|e| EvaluationRow::from_evaluation(e, false))
                .collect();
            print_json(&rows)?;
        }
        OutputFormat::Table => {
            let rows: Vec<_> = evaluations
                .iter()
                .map(|e| EvaluationRow::from_evaluation(e, true))
                .collect();
            print_table(&rows);
            let admitted = evaluations.iter().filter(|e| e.admitted()).count();
            println!();
            println!(
                "{} of {} nodes admit the request",
                admitted.to_string().bold(),
                nodes.len()
            );
        }
    }

    Ok(())
}

async fn place(
    service: &sched_lib::SchedulingService,
    demand: &DemandVector,
    nodes: &[String],
    format: OutputFormat,
) -> Result<()> {
    match service.place_demand("mrsched/check", demand, nodes).await {
        Ok(placement) => {
            let report = PlacementReport {
                node: placement.node,
                score: placement.score,
                evicted: placement.evicted.iter().map(|w| w.qualified_name()).collect(),
            };
            match format {
                OutputFormat::Json => print_json(&report)?,
                OutputFormat::Table => {
                    print_success(&format!(
                        "Request fits on {} (score {})",
                        report.node, report.score
                    ));
                    for victim in &report.evicted {
                        print_warning(&format!("Evicted {victim}"));
                    }
                }
            }
            Ok(())
        }
        Err(PlaceError::NoFeasibleNode { reasons }) => {
            if let OutputFormat::Json = format {
                print_json(&reasons)?;
            } else {
                for (node, reason) in &reasons {
                    print_error(&format!("{node}: {reason}"));
                }
            }
            Err(anyhow!("0/{} nodes are available", reasons.len()))
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CheckRequest {
        CheckRequest {
            cpu: 1.5,
            mem: "512Mi".to_string(),
            disk_read: "0".to_string(),
            disk_write: "10M".to_string(),
            net_up: "0".to_string(),
            net_down: "1G".to_string(),
            priority: 10,
            node: None,
            preempt: false,
        }
    }

    #[test]
    fn test_demand_from_flags() {
        let demand = request().demand().unwrap();

        assert_eq!(demand.cpu, 1.5);
        assert_eq!(demand.mem, 512.0 * 1024.0 * 1024.0);
        assert_eq!(demand.disk_read, 0.0);
        assert_eq!(demand.disk_write, 10.0 * 1024.0 * 1024.0);
        assert_eq!(demand.net_down, 1024.0 * 1024.0 * 1024.0);
        assert_eq!(demand.priority, 10);
    }

    #[test]
    fn test_demand_rejects_bad_quantities() {
        let mut bad_mem = request();
        bad_mem.mem = "lots".to_string();
        assert!(bad_mem.demand().is_err());

        let mut bad_cpu = request();
        bad_cpu.cpu = -1.0;
        assert!(bad_cpu.demand().is_err());
    }

    #[test]
    fn test_row_for_unknown_node() {
        let eval = NodeEvaluation {
            node: "node-x".to_string(),
            state: None,
            verdict: None,
            score: 0,
            reason: Some("failed to get stats for node node-x".to_string()),
        };
        let row = EvaluationRow::from_evaluation(&eval, false);

        assert_eq!(row.verdict, "reject");
        assert_eq!(row.cpu_free, "-");
        assert_eq!(row.reason, "failed to get stats for node node-x");
    }
}
