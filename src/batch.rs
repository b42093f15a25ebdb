//! Resumable batch candidate generation.
//!
//! Signals are pulled from the provider in bounded chunks. Within a chunk,
//! generation fans out over scoped worker threads, each with its own
//! read-only connection; scoring, dedup and creation then run serially on
//! the engine. The checkpoint advances only after a whole chunk is recorded,
//! so a crash or cancel replays at most one chunk, and dedup makes the replay
//! harmless.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::candidates::Generation;
use crate::db::timestamp;
use crate::engine::SuggestionEngine;
use crate::error::SuggestError;
use crate::signal::{Signal, SignalCursor, SignalProvider};
use crate::types::BatchConfig;

/// Shared cancel flag. Checked between chunks.
#[derive(Debug, Clone, Default)]
pub struct BatchCancellation {
    flag: Arc<AtomicBool>,
}

impl BatchCancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Checkpoint key; reruns with the same name resume.
    pub batch_name: String,
    pub chunk_size: usize,
    pub workers: usize,
}

impl BatchOptions {
    pub fn from_config(batch_name: &str, config: &BatchConfig) -> Self {
        Self {
            batch_name: batch_name.to_string(),
            chunk_size: config.chunk_size.max(1),
            workers: config.workers.max(1),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub batch_name: String,
    pub processed: usize,
    pub created: usize,
    pub suppressed: usize,
    /// Malformed candidates and candidates for vanished targets.
    pub rejected: usize,
    pub strategy_failures: usize,
    pub timeouts: usize,
    pub chunks: usize,
    pub cancelled: bool,
    pub resumed_from: Option<SignalCursor>,
    pub last_cursor: Option<SignalCursor>,
}

/// Run (or resume) a named batch over everything the provider has after the
/// stored checkpoint.
///
/// A fatal error halts the batch without advancing the checkpoint past the
/// current chunk.
pub fn run_batch(
    engine: &SuggestionEngine,
    provider: &dyn SignalProvider,
    options: &BatchOptions,
    cancel: &BatchCancellation,
) -> Result<BatchReport, SuggestError> {
    let resume = engine.with_db(|db| db.load_checkpoint(&options.batch_name))?;
    let mut report = BatchReport {
        batch_name: options.batch_name.clone(),
        resumed_from: resume.clone(),
        last_cursor: resume.clone(),
        ..Default::default()
    };
    log::info!(
        "Batch {}: started{}",
        options.batch_name,
        resume
            .as_ref()
            .map(|c| format!(" after {}", c.signal_id))
            .unwrap_or_default()
    );

    let mut signals = provider.list_unprocessed(resume.as_ref())?;
    loop {
        if cancel.is_cancelled() {
            report.cancelled = true;
            log::info!("Batch {}: cancelled after {} signals", options.batch_name, report.processed);
            break;
        }

        let chunk: Vec<Signal> = signals.by_ref().take(options.chunk_size.max(1)).collect();
        let Some(last) = chunk.last() else {
            break;
        };
        let cursor = SignalCursor::of(last);

        let generations = generate_chunk(engine, &chunk, options.workers)?;
        let now = Utc::now();
        for (signal, generation) in chunk.iter().zip(generations) {
            report.strategy_failures += generation.failures.len();
            report.timeouts += generation.failures.iter().filter(|f| f.timed_out).count();

            let outcome = match engine.record(signal, generation, now) {
                Ok(outcome) => outcome,
                Err(e) => {
                    if e.is_fatal() {
                        log::error!(
                            "FATAL: batch {} halted at signal {}: {}",
                            options.batch_name,
                            signal.id,
                            e
                        );
                    } else {
                        log::error!(
                            "Batch {} stopped at signal {}: {}",
                            options.batch_name,
                            signal.id,
                            e
                        );
                    }
                    return Err(e);
                }
            };
            report.created += outcome.created.len();
            report.suppressed += outcome.suppressed.len();
            report.rejected += outcome.rejected;
        }

        let now_ts = timestamp(Utc::now());
        engine.with_db(|db| db.save_checkpoint(&options.batch_name, &cursor, chunk.len(), &now_ts))?;
        report.processed += chunk.len();
        report.chunks += 1;
        report.last_cursor = Some(cursor);
        log::debug!(
            "Batch {}: chunk {} done ({} signals so far)",
            options.batch_name,
            report.chunks,
            report.processed
        );
    }

    log::info!(
        "Batch {}: {} signals, {} suggestions, {} suppressed, {} strategy failures ({} timeouts)",
        options.batch_name,
        report.processed,
        report.created,
        report.suppressed,
        report.strategy_failures,
        report.timeouts
    );
    Ok(report)
}

/// Generate candidates for a chunk on up to `workers` threads. Results come
/// back in signal order.
fn generate_chunk(
    engine: &SuggestionEngine,
    chunk: &[Signal],
    workers: usize,
) -> Result<Vec<Generation>, SuggestError> {
    let per_worker = chunk.len().div_ceil(workers.max(1)).max(1);

    std::thread::scope(|scope| {
        let handles: Vec<_> = chunk
            .chunks(per_worker)
            .map(|slice| {
                scope.spawn(move || -> Result<Vec<Generation>, SuggestError> {
                    let reader = engine.open_reader()?;
                    Ok(slice.iter().map(|signal| engine.generate(&reader, signal)).collect())
                })
            })
            .collect();

        let mut generations = Vec::with_capacity(chunk.len());
        for handle in handles {
            match handle.join() {
                Ok(result) => generations.extend(result?),
                Err(_) => {
                    return Err(SuggestError::Strategy {
                        strategy: "batch".to_string(),
                        message: "generation worker panicked".into(),
                    })
                }
            }
        }
        Ok(generations)
    })
}
