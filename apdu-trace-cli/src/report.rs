//! Report generation
//!
//! Writes the completed transaction history as plain text or JSON.

use crate::config::{OutputConfig, OutputFormat};
use anyhow::{bail, Result};
use apdu_trace_decoder::{CorrelatorStats, IsoCase, RenderMode, Timestamp, Transaction};
use chrono::format::{Item, StrftimeItems};
use serde::Serialize;
use std::io::Write;
use std::sync::Arc;

/// One transaction as it appears in the JSON report
#[derive(Debug, Serialize)]
struct TransactionRecord {
    index: usize,
    case: IsoCase,
    started_at: Timestamp,
    completed_at: Timestamp,
    command: String,
    response: String,
    status_word: String,
}

#[derive(Debug, Serialize)]
struct JsonReport {
    mode: RenderMode,
    stats: CorrelatorStats,
    transactions: Vec<TransactionRecord>,
}

/// Check that a timestamp pattern is valid chrono strftime syntax
pub fn validate_time_format(pattern: &str) -> Result<()> {
    if StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error)) {
        bail!("Invalid time format: {:?}", pattern);
    }
    Ok(())
}

/// Write the report in the configured format
pub fn write_report<W: Write>(
    out: &mut W,
    transactions: &[Arc<Transaction>],
    stats: CorrelatorStats,
    options: &OutputConfig,
) -> Result<()> {
    match options.format {
        OutputFormat::Txt => write_txt(out, transactions, options),
        OutputFormat::Json => write_json(out, transactions, stats, options.mode),
    }
}

fn write_txt<W: Write>(
    out: &mut W,
    transactions: &[Arc<Transaction>],
    options: &OutputConfig,
) -> Result<()> {
    let time_items: Vec<Item> = StrftimeItems::new(&options.time_format).collect();

    for (i, tx) in transactions.iter().enumerate() {
        if options.timestamps {
            writeln!(
                out,
                "#{} [{}] {}",
                i + 1,
                tx.case(),
                tx.started_at().format_with_items(time_items.iter())
            )?;
        } else {
            writeln!(out, "#{} [{}]", i + 1, tx.case())?;
        }
        writeln!(out, "  > {}", tx.command_string(options.mode))?;
        writeln!(out, "  < {}", tx.response_string(options.mode))?;
    }
    Ok(())
}

fn write_json<W: Write>(
    out: &mut W,
    transactions: &[Arc<Transaction>],
    stats: CorrelatorStats,
    mode: RenderMode,
) -> Result<()> {
    let report = JsonReport {
        mode,
        stats,
        transactions: transactions
            .iter()
            .enumerate()
            .map(|(i, tx)| TransactionRecord {
                index: i + 1,
                case: tx.case(),
                started_at: tx.started_at(),
                completed_at: tx.completed_at(),
                command: tx.command_string(mode),
                response: tx.response_string(mode),
                status_word: format!("{:04X}", tx.response().status_word()),
            })
            .collect(),
    };

    serde_json::to_writer_pretty(&mut *out, &report)?;
    writeln!(out)?;
    Ok(())
}
