//! Show the resource state the scheduler sees for each node

use anyhow::Result;
use colored::Colorize;
use sched_lib::cache::CachedNode;
use tabled::Tabled;

use crate::context::{tunables, GlobalOptions, SchedulerContext};
use crate::output::{
    color_free, format_bytes, format_cpu, format_pair, format_rate, print_json, print_table,
    OutputFormat,
};

#[derive(Tabled)]
struct NodeRow {
    #[tabled(rename = "Node")]
    node: String,
    #[tabled(rename = "CPU")]
    cpu: String,
    #[tabled(rename = "Memory")]
    memory: String,
    #[tabled(rename = "Disk Read")]
    disk_read: String,
    #[tabled(rename = "Disk Write")]
    disk_write: String,
    #[tabled(rename = "Net Up")]
    net_up: String,
    #[tabled(rename = "Net Down")]
    net_down: String,
    #[tabled(rename = "Fallback")]
    fallback: String,
}

impl NodeRow {
    fn new(node: &str, cached: &CachedNode) -> Self {
        let s = &cached.state;
        let rate = |free: f64, total: f64| {
            color_free(free, total, format_pair(format_rate(free), format_rate(total)))
        };
        Self {
            node: node.to_string(),
            cpu: color_free(
                s.cpu_free,
                s.cpu_total,
                format_pair(format_cpu(s.cpu_free), format_cpu(s.cpu_total)),
            ),
            memory: color_free(
                s.mem_free,
                s.mem_total,
                format_pair(format_bytes(s.mem_free), format_bytes(s.mem_total)),
            ),
            disk_read: rate(s.disk_read_free, s.disk_read_total),
            disk_write: rate(s.disk_write_free, s.disk_write_total),
            net_up: rate(s.net_up_free, s.net_up_total),
            net_down: rate(s.net_down_free, s.net_down_total),
            fallback: cached
                .fallbacks
                .iter()
                .map(|d| d.as_str())
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

/// Refresh every node once and print the snapshot
pub async fn show_nodes(options: &GlobalOptions<'_>, format: OutputFormat) -> Result<()> {
    let ctx = SchedulerContext::build(options, tunables(options)?, None).await?;
    let summary = ctx.cache.refresh_all().await;
    let snapshot = ctx.cache.snapshot().await;

    match format {
        OutputFormat::Json => print_json(&snapshot)?,
        OutputFormat::Table => {
            let rows: Vec<_> = snapshot
                .iter()
                .map(|(node, cached)| NodeRow::new(node, cached))
                .collect();
            print_table(&rows);
            println!();
            println!(
                "{} refreshed, {} degraded, {} unknown",
                summary.refreshed.to_string().green(),
                summary.degraded.to_string().yellow(),
                summary.unknown.to_string().red()
            );
        }
    }

    Ok(())
}
