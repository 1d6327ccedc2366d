//! Status command implementation.

use docsync_session::{EventName, EventRecord, JsonFileStore, StatusLog, StatusStore};
use std::collections::BTreeMap;
use std::path::Path;

/// Prints the persisted session activity log.
pub async fn run(dir: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let log = JsonFileStore::new(dir)
        .load_status()
        .await?
        .unwrap_or_default();

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&log)?),
        _ => print_text_output(&log),
    }
    Ok(())
}

fn print_text_output(log: &StatusLog) {
    println!("Session Status");
    println!("==============");
    println!("Pending local changes: {}", log.local_change_count);
    print_stream("Local changes", &log.change_events);
    print_stream("Replication to remote", &log.replication_to_events);
    print_stream("Replication from remote", &log.replication_from_events);
}

fn print_stream(title: &str, events: &BTreeMap<EventName, EventRecord>) {
    println!();
    println!("{title}:");
    if events.is_empty() {
        println!("  (no events)");
        return;
    }
    for (name, record) in events {
        println!(
            "  {:<9} {}  {}",
            name.as_str(),
            record.occurred_at.to_rfc3339(),
            record.payload
        );
    }
}
