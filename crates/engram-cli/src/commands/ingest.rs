//! Ingest command - load a JSONL activity capture.

use crate::app::App;
use engram_core::Config;
use std::path::Path;

pub fn run(config: Config, file: &Path) -> anyhow::Result<()> {
    let app = App::new(config)?;

    let report = app.hot.ingest_jsonl(file)?;
    println!(
        "Imported {} activities from {} ({} failures).",
        report.stored.len(),
        file.display(),
        report.failed
    );

    Ok(())
}
