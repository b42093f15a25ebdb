//! studiolink-sweep: expire stale suggestions and print pattern statistics.
//!
//! Runs against the configured database (`~/.studiolink/studiolink.db` unless
//! `config.json` overrides it). Safe to run next to a live engine: expiry is
//! a guarded status transition and never touches target records.
//!
//! Usage: `studiolink-sweep [--json] [--inactive]`

use std::process::ExitCode;

use chrono::Utc;
use serde::Serialize;

use studiolink::db::patterns::PatternFilter;
use studiolink::db::SuggestionDb;
use studiolink::learning::{self, PatternView};
use studiolink::lifecycle;
use studiolink::state::{database_path, load_config};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SweepOutput {
    expired: usize,
    patterns: Vec<PatternView>,
}

fn run(json: bool, include_inactive: bool) -> Result<(), String> {
    let config = load_config()?;
    let path = database_path(&config)?;
    let db = SuggestionDb::open_at(path.clone()).map_err(|e| format!("Failed to open {}: {}", path.display(), e))?;

    let expired = lifecycle::expire_stale(&db, Utc::now()).map_err(|e| e.to_string())?;

    let filter = PatternFilter {
        active: if include_inactive { None } else { Some(true) },
        ..Default::default()
    };
    let patterns = learning::list_patterns(&db, &config.learning, &filter).map_err(|e| e.to_string())?;

    if json {
        let output = SweepOutput { expired, patterns };
        let text = serde_json::to_string_pretty(&output).map_err(|e| e.to_string())?;
        println!("{}", text);
        return Ok(());
    }

    println!("Expired {} stale suggestions", expired);
    println!();
    println!(
        "{:<20} {:<32} {:<24} {:>6} {:>5} {:>5} {:>6} {:>5}",
        "TYPE", "KEY", "TARGET", "CONF", "USED", "OK", "RATE", "AUTO"
    );
    for view in &patterns {
        let p = &view.pattern;
        println!(
            "{:<20} {:<32} {:<24} {:>6.3} {:>5} {:>5} {:>6.2} {:>5}{}",
            p.pattern_type,
            p.pattern_key,
            p.target.to_string(),
            p.confidence,
            p.times_used,
            p.times_correct,
            view.approval_rate,
            if view.eligible { "yes" } else { "no" },
            if p.active { "" } else { "  (inactive)" }
        );
    }
    let eligible = patterns.iter().filter(|v| v.eligible).count();
    println!();
    println!("{} patterns, {} auto-apply eligible", patterns.len(), eligible);
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let json = args.iter().any(|a| a == "--json");
    let include_inactive = args.iter().any(|a| a == "--inactive");
    if let Some(unknown) = args.iter().find(|a| *a != "--json" && *a != "--inactive") {
        eprintln!("Unknown argument: {}", unknown);
        eprintln!("Usage: studiolink-sweep [--json] [--inactive]");
        return ExitCode::from(2);
    }

    match run(json, include_inactive) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("Sweep failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
