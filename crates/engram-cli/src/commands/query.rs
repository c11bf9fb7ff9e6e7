//! Query command - inspect recorded activity.

use crate::app::App;
use engram_core::types::{ActivityKind, HotRecord};
use engram_core::Config;
use uuid::Uuid;

#[allow(clippy::too_many_arguments)]
pub fn run(
    config: Config,
    hours: u32,
    entity: Option<Uuid>,
    activity_type: Option<String>,
    limit: usize,
    offset: usize,
    mark_hit: bool,
    json: bool,
) -> anyhow::Result<()> {
    let app = App::new(config)?;

    let records: Vec<HotRecord> = if let Some(entity_id) = entity {
        if let Some(record) = app.resolver.get(entity_id)? {
            println!(
                "Entity {} ({}){}",
                record.label,
                record.properties.file_path,
                if record.properties.deleted { " [deleted]" } else { "" }
            );
        }
        app.hot.activities_by_entity(entity_id, limit, offset)?
    } else if let Some(kind_name) = &activity_type {
        let kind = parse_kind(kind_name)?;
        app.hot.activities_by_type(kind, limit, offset)?
    } else {
        app.hot.recent_activities(hours, limit, offset)?
    };

    if records.is_empty() {
        println!("No matching activity.");
        return Ok(());
    }

    for record in &records {
        if json {
            println!("{}", serde_json::to_string(record)?);
        } else {
            println!(
                "{}  {:<16} {:.2}  {}",
                record.event.timestamp.format("%Y-%m-%d %H:%M:%S"),
                record.event.activity_type.as_str(),
                record.importance_score,
                record.event.file_path
            );
        }
    }

    if mark_hit {
        // Search feedback: raise hit counters so future scoring reflects
        // the interest. Entity queries go through the full feedback hook,
        // which also boosts the entity itself.
        if let Some(entity_id) = entity {
            app.hot.mark_entity_searched(entity_id)?;
            println!("Recorded search feedback for entity {}.", entity_id);
        } else {
            for record in &records {
                app.hot.increment_search_hit(record.event.activity_id)?;
            }
            println!("Marked {} activities as search hits.", records.len());
        }
    }

    Ok(())
}

fn parse_kind(name: &str) -> anyhow::Result<ActivityKind> {
    serde_json::from_value(serde_json::Value::String(name.to_ascii_lowercase()))
        .map_err(|_| anyhow::anyhow!("unknown activity type: {}", name))
}
