//! Multi-resource scheduler CLI
//!
//! Runs the watch-and-bind loop for pods addressed to the multi-resource
//! scheduler, and offers read-only views of how the scheduler sees the
//! cluster.

mod commands;
mod context;
mod kube_cluster;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{check, nodes, run};
use context::GlobalOptions;
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Multi-resource scheduler CLI
#[derive(Parser)]
#[command(name = "mrsched")]
#[command(author, version, about = "CLI for the multi-resource scheduler", long_about = None)]
pub struct Cli {
    /// Path to kubeconfig file (uses default if not specified)
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<String>,

    /// Prometheus base URL (overrides PROMETHEUS_URL)
    #[arg(long)]
    pub prometheus_url: Option<String>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    /// Enable verbose output
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Bind pending pods until interrupted
    Run {
        /// Seconds between polls when nothing is pending
        #[arg(long, default_value_t = 1)]
        poll_interval_secs: u64,

        /// Never evict running pods
        #[arg(long)]
        no_preemption: bool,
    },

    /// Check which nodes would admit a request
    Check {
        /// CPU request in cores
        #[arg(long, default_value_t = 1.0)]
        cpu: f64,

        /// Memory request as a Kubernetes quantity
        #[arg(long, default_value = "1Gi")]
        mem: String,

        /// Disk read throughput (e.g. 50M)
        #[arg(long, default_value = "0")]
        disk_read: String,

        /// Disk write throughput
        #[arg(long, default_value = "0")]
        disk_write: String,

        /// Network upload throughput
        #[arg(long, default_value = "0")]
        net_up: String,

        /// Network download throughput
        #[arg(long, default_value = "0")]
        net_down: String,

        /// Request priority
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        priority: i32,

        /// Only check this node
        #[arg(long, short)]
        node: Option<String>,

        /// Place the request, evicting lower-priority pods if needed
        #[arg(long)]
        preempt: bool,
    },

    /// Show the resource state of every node
    Nodes,
}

fn init_tracing(cli: &Cli) {
    let bind_loop = matches!(cli.command, Commands::Run { .. });
    let default = match (bind_loop, cli.verbose) {
        (_, true) => "debug",
        (true, false) => "info",
        (false, false) => "warn",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // The bind loop logs JSON like the extender; one-shot commands log to stderr
    if bind_loop {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    let options = GlobalOptions {
        kubeconfig: cli.kubeconfig.as_deref(),
        prometheus_url: cli.prometheus_url.as_deref(),
    };

    match cli.command {
        Commands::Run {
            poll_interval_secs,
            no_preemption,
        } => {
            let interval = Duration::from_secs(poll_interval_secs.max(1));
            run::run(&options, interval, no_preemption).await?;
        }
        Commands::Check {
            cpu,
            mem,
            disk_read,
            disk_write,
            net_up,
            net_down,
            priority,
            node,
            preempt,
        } => {
            let request = check::CheckRequest {
                cpu,
                mem,
                disk_read,
                disk_write,
                net_up,
                net_down,
                priority,
                node,
                preempt,
            };
            check::check(&options, request, cli.format).await?;
        }
        Commands::Nodes => {
            nodes::show_nodes(&options, cli.format).await?;
        }
    }

    Ok(())
}
