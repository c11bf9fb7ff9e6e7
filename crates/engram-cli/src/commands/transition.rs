//! Transition command - run or inspect hot-to-warm transitions.

use crate::app::App;
use engram_core::transition::RunStatus;
use engram_core::Config;

#[allow(clippy::too_many_arguments)]
pub fn run(
    mut config: Config,
    stats_only: bool,
    age_hours: Option<u32>,
    batch_size: Option<usize>,
    max_batches: Option<u32>,
    snapshots: bool,
) -> anyhow::Result<()> {
    if let Some(age) = age_hours {
        config.tiers.age_threshold_hours = age;
    }
    if let Some(size) = batch_size {
        config.tiers.batch_size = size;
    }
    if let Some(batches) = max_batches {
        config.tiers.max_batches = batches;
    }
    config.validate().map_err(anyhow::Error::from)?;

    let app = App::new(config)?;
    let manager = app.transition_manager(snapshots)?;

    if stats_only {
        let stats = manager.stats()?;
        println!("Transition Status: {}", stats.status);
        println!();
        println!("Hot tier:");
        println!("  Total activities:      {}", stats.hot_total);
        println!("  Transition ready:      {}", stats.hot_transition_ready);
        println!("  Already transitioned:  {}", stats.hot_already_transitioned);
        println!();
        println!("Warm tier:");
        println!("  Total records:         {}", stats.warm_total);
        println!("  Aggregated:            {}", stats.warm_aggregated);
        println!("  Individual:            {}", stats.warm_individual);
        println!("  Source events covered: {}", stats.warm_represented);
        return Ok(());
    }

    let report = manager.run();
    if report.status == RunStatus::NotReady {
        anyhow::bail!("transition manager not ready: backing store unreachable");
    }

    println!("Transition run complete.");
    println!(
        "  Batches: {}  Found: {}  Transitioned: {}",
        report.batches.len(),
        report.total_found,
        report.total_transitioned
    );
    for batch in &report.batches {
        println!(
            "  Batch {:>2}: found {:>5}, transitioned {:>5} in {} ms",
            batch.batch_number, batch.found, batch.transitioned, batch.duration_ms
        );
    }
    Ok(())
}
