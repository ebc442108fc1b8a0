//! Offline replay: raw exchange messages on stdin, bars and quality events on
//! stdout.
//!
//! Usage: `shadow-replay [config.json] < messages.jsonl`
//!
//! Each input line is one JSON message. Output is one JSON document per line,
//! `{"bar": ...}` or `{"event": ...}`.

use serde_json::{json, Value};
use shadow_core::{logging, Bar, Config, ProcessEnv, Result};
use shadow_ingestion::{BarAggregator, TickNormalizer};
use shadow_quality::QualityMonitor;
use std::collections::BTreeMap;
use std::io::{self, BufRead, Write};
use std::process::ExitCode;
use tracing::{error, info, warn};

fn main() -> ExitCode {
    if let Err(e) = logging::init_tracing("info") {
        eprintln!("failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.is_safety_violation() => {
            error!(error = %e, "startup refused");
            ExitCode::from(2)
        }
        Err(e) => {
            error!(error = %e, "replay failed");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(&path)?,
        None => Config::default(),
    };
    shadow_core::assert_startup_allowed(&ProcessEnv, &config)?;

    let normalizer = TickNormalizer::new(config.feed.exchange.as_str());
    let aggregator = BarAggregator::new(config.feed.parsed_timeframe()?);
    let monitor = QualityMonitor::new(config.shadow.quality.clone())?;

    let mut messages = Vec::new();
    for (line_no, line) in io::stdin().lock().lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(&line) {
            Ok(value) => messages.push(value),
            Err(e) => warn!(line = line_no + 1, error = %e, "skipping unparsable line"),
        }
    }

    let ticks = normalizer.normalize_batch(&messages);
    let bars = aggregator.ingest_batch(&ticks)?;
    info!(
        messages = messages.len(),
        ticks = ticks.len(),
        bars = bars.len(),
        timeframe = %aggregator.timeframe(),
        "replay aggregated"
    );

    let mut by_symbol: BTreeMap<&str, Vec<Bar>> = BTreeMap::new();
    for bar in &bars {
        by_symbol.entry(bar.symbol()).or_default().push(bar.clone());
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for bar in &bars {
        writeln!(out, "{}", json!({ "bar": bar }))?;
    }
    for (symbol, symbol_bars) in &by_symbol {
        let events = monitor.check(symbol_bars);
        if !events.is_empty() {
            info!(symbol, events = events.len(), "quality events");
        }
        for event in &events {
            writeln!(out, "{}", json!({ "event": event }))?;
        }
    }
    out.flush()?;
    Ok(())
}
