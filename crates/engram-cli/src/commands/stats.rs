//! Stats command - tier statistics and storage efficiency.

use crate::app::App;
use engram_core::Config;

/// Estimated on-disk footprint of a full-fidelity hot record.
const AVG_HOT_RECORD_BYTES: u64 = 2048;

/// Estimated footprint of a compacted warm record.
const AVG_WARM_RECORD_BYTES: u64 = 1024;

pub fn run(config: Config) -> anyhow::Result<()> {
    let app = App::new(config)?;

    let hot = app.hot.statistics()?;
    let warm = app.warm.statistics()?;

    println!("Engram Tier Statistics");
    println!("======================");
    println!();
    println!("Hot tier ({} day TTL):", hot.ttl_days);
    println!("  Total activities:  {}", hot.total_count);
    println!("  Transitioned:      {}", hot.transitioned_count);
    if !hot.by_type.is_empty() {
        println!("  By type:");
        for (kind, count) in &hot.by_type {
            println!("    {:<18} {}", kind, count);
        }
    }
    if !hot.by_importance.is_empty() {
        println!("  By importance bucket:");
        for (bucket, count) in &hot.by_importance {
            println!("    {:<18} {}", bucket, count);
        }
    }

    println!();
    println!("Warm tier ({} day TTL):", warm.ttl_days);
    println!("  Total records:     {}", warm.total_count);
    println!("  Aggregated:        {}", warm.aggregated_count);
    println!("  Individual:        {}", warm.individual_count);
    if warm.aggregated_count > 0 {
        println!(
            "  Aggregation sizes: sum {}, avg {:.1}, min {}, max {}",
            warm.count_sum, warm.count_avg, warm.count_min, warm.count_max
        );
    }

    print_storage_efficiency(&hot, &warm);
    Ok(())
}

/// Estimated footprint comparison between the tiers.
fn print_storage_efficiency(
    hot: &engram_core::hot::HotTierStatistics,
    warm: &engram_core::warm::WarmTierStatistics,
) {
    let hot_storage = hot.total_count * AVG_HOT_RECORD_BYTES;
    let warm_storage = warm.total_count * AVG_WARM_RECORD_BYTES;
    // What the warm tier's content would cost at hot-tier fidelity.
    let represented = warm.individual_count + warm.count_sum;
    let equivalent_hot = represented * AVG_HOT_RECORD_BYTES;

    println!();
    println!("Storage efficiency (estimated):");
    println!("  Hot tier footprint:   {}", format_bytes(hot_storage));
    println!("  Warm tier footprint:  {}", format_bytes(warm_storage));
    println!("  Equivalent hot size:  {}", format_bytes(equivalent_hot));

    if warm_storage > 0 && equivalent_hot > 0 {
        let ratio = equivalent_hot as f64 / warm_storage as f64;
        let saved = equivalent_hot.saturating_sub(warm_storage);
        println!(
            "  Compression ratio:    {:.2}x ({} saved)",
            ratio,
            format_bytes(saved)
        );
    }
    if warm.aggregated_count > 0 && warm.count_sum > 0 {
        println!(
            "  Aggregation ratio:    {:.2} events per record",
            warm.count_sum as f64 / warm.aggregated_count as f64
        );
    }
}

fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;
    const GIB: u64 = 1024 * MIB;
    match bytes {
        b if b < KIB => format!("{} B", b),
        b if b < MIB => format!("{:.2} KB", b as f64 / KIB as f64),
        b if b < GIB => format!("{:.2} MB", b as f64 / MIB as f64),
        b => format!("{:.2} GB", b as f64 / GIB as f64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_formatting() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.00 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.00 MB");
    }
}
