//! Snapshot command implementation.
//!
//! Runs one or more refresh passes and prints the last one.

use std::time::Instant;
use taskshare::engine::{Engine, Snapshot};
use taskshare::process::{ProcessRecord, ProcessState, SortKey};

use crate::cli::OutputFormat;
use crate::config::Config;

fn mb(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

fn format_cpu(record: &ProcessRecord) -> String {
    let secs = record.total_time.as_secs();
    let hundredths = record.total_time.subsec_millis() / 10;
    format!("{}:{:02}.{:02}", secs / 60, secs % 60, hundredths)
}

/// Formats the records of a snapshot as a fixed-width table.
pub fn render_table(snapshot: &Snapshot, sort: SortKey, limit: usize) -> String {
    let mut rows: Vec<&ProcessRecord> = snapshot.records.iter().collect();
    sort.sort(&mut rows);
    if limit > 0 {
        rows.truncate(limit);
    }

    let mut out = String::new();
    out.push_str(&format!(
        "{:>6} {:<16} {:>1} {:>10} {:>10} {:>10} {:>10} {:>5} {:>6} {:>10}\n",
        "PID", "COMMAND", "S", "PRIV(MB)", "SHRD(MB)", "ALIAS(MB)", "VSIZE(MB)", "THR", "PORTS", "TIME"
    ));
    for r in rows {
        out.push_str(&format!(
            "{:>6} {:<16} {:>1} {:>10.1} {:>10.1} {:>10.1} {:>10.1} {:>5} {:>6} {:>10}\n",
            r.pid,
            r.command,
            r.state.letter(),
            mb(r.private_bytes),
            mb(r.shared_bytes),
            mb(r.aliased_bytes),
            mb(r.virtual_size),
            r.threads,
            r.ports.map(|p| p.to_string()).unwrap_or_else(|| "-".into()),
            format_cpu(r)
        ));
    }
    out
}

/// Runs refresh passes and prints the result.
pub fn command_snapshot(
    iterations: usize,
    limit: usize,
    sort: SortKey,
    format: OutputFormat,
    config: &Config,
) -> Result<(), Box<dyn std::error::Error>> {
    let kernel = crate::build_kernel(config)?;
    let mut engine = Engine::new(config.engine_options());
    let iterations = iterations.max(1);
    let table_output = matches!(format, OutputFormat::Table);

    if table_output {
        println!("🧪 taskshare - Snapshot Mode");
        println!("============================");
    }

    let mut last = None;
    for iteration in 1..=iterations {
        let start = Instant::now();
        let snapshot = engine.refresh(kernel.as_ref())?;
        if table_output {
            println!(
                "\n🔄 Pass {}/{}: {} processes in {:.2}ms ({} alias entries)",
                iteration,
                iterations,
                snapshot.totals.processes,
                start.elapsed().as_secs_f64() * 1000.0,
                engine.alias_table().len()
            );
        }
        last = Some(snapshot);
    }

    let Some(snapshot) = last else {
        return Ok(());
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&snapshot)?),
        OutputFormat::Yaml => println!("{}", serde_yaml::to_string(&snapshot)?),
        OutputFormat::Table => {
            let totals = &snapshot.totals;
            println!(
                "   📈 Memory totals: private {:.1} MB, shared {:.1} MB, aliased {:.1} MB, framework private {:.1} MB",
                mb(totals.private_bytes),
                mb(totals.shared_bytes),
                mb(totals.aliased_bytes),
                mb(totals.framework_private_bytes)
            );
            let states: Vec<String> = ProcessState::ALL
                .iter()
                .filter(|s| snapshot.count(**s) > 0)
                .map(|s| format!("{} {}", snapshot.count(*s), s.name()))
                .collect();
            println!(
                "   📊 {} processes, {} threads: {}",
                totals.processes,
                totals.threads,
                states.join(", ")
            );
            let counters = &snapshot.counters;
            println!(
                "   ⚠️  {} skipped, {} zombies, {} command fallbacks, {} truncated walks",
                counters.skipped_tasks,
                counters.zombies,
                counters.command_fallbacks,
                counters.truncated_walks
            );
            println!();
            print!("{}", render_table(&snapshot, sort, limit));
            println!("\n✅ Snapshot completed successfully");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskshare::engine::EngineOptions;
    use taskshare::kernel::simulated::{HostSnapshot, SimProcess, SimRegion};
    use taskshare::kernel::{ShareMode, SimulatedKernel};

    #[test]
    fn test_table_respects_sort_and_limit() {
        let kernel = SimulatedKernel::new(HostSnapshot::with_processes(vec![
            SimProcess::new(10, "small")
                .with_region(SimRegion::new(0x1000, 4096, ShareMode::Private).resident(1, 0)),
            SimProcess::new(20, "large")
                .with_region(SimRegion::new(0x1000, 40960, ShareMode::Private).resident(10, 0)),
        ]));
        let snapshot = Engine::new(EngineOptions {
            recover_commands: false,
            ..EngineOptions::default()
        })
        .refresh(&kernel)
        .expect("refresh");

        let table = render_table(&snapshot, SortKey::Private, 1);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains("large"));
    }
}
