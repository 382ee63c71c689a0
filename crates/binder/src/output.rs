//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print a table from a list of items
pub fn print_table<T: Tabled>(items: &[T]) {
    if items.is_empty() {
        println!("{}", "No items found".yellow());
        return;
    }
    let table = Table::new(items).with(Style::rounded()).to_string();
    println!("{}", table);
}

/// Print any serializable value as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: f64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    if bytes >= GB {
        format!("{:.2}Gi", bytes / GB)
    } else if bytes >= MB {
        format!("{:.2}Mi", bytes / MB)
    } else if bytes >= KB {
        format!("{:.2}Ki", bytes / KB)
    } else {
        format!("{:.0}B", bytes)
    }
}

/// Format a throughput in bytes per second
pub fn format_rate(bytes_per_sec: f64) -> String {
    format!("{}/s", format_bytes(bytes_per_sec))
}

/// Format cores as a quantity, millicores below one core
pub fn format_cpu(cores: f64) -> String {
    if cores >= 1.0 {
        format!("{:.1}", cores)
    } else {
        format!("{:.0}m", cores * 1000.0)
    }
}

/// `free / total`
pub fn format_pair(free: String, total: String) -> String {
    format!("{} / {}", free, total)
}

/// Color a verdict string
pub fn color_verdict(admitted: bool, text: &str) -> String {
    if admitted {
        text.green().to_string()
    } else {
        text.red().to_string()
    }
}

/// Color a free fraction: green with headroom, red when nearly exhausted
pub fn color_free(free: f64, total: f64, text: String) -> String {
    if total <= 0.0 {
        return text;
    }
    let fraction = free / total;
    if fraction >= 0.5 {
        text.green().to_string()
    } else if fraction >= 0.2 {
        text.yellow().to_string()
    } else {
        text.red().to_string()
    }
}
