//! Batched scrape execution: one transport read per planned interval.

use std::collections::HashMap;

use tracing::debug;

use crate::decode::parse_value;
use crate::def::{BlockedRange, MetricDef, MetricKind};
use crate::error::ScrapeError;
use crate::plan::{PlannedInterval, plan};
use crate::transport::ModbusClient;

/// One decoded observation, ready for the exposition sink.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub name: String,
    pub help: String,
    /// Definition labels plus the injected `module` label.
    pub labels: HashMap<String, String>,
    pub value: f64,
    pub kind: MetricKind,
}

/// Scrape every definition of a module through an open client.
///
/// A transport failure on any read aborts the whole scrape: callers get
/// either the complete sample list or an error, never both. A partially
/// scraped device usually indicates a connectivity problem affecting all of
/// its registers equally.
pub async fn run_scrape(
    client: &mut dyn ModbusClient,
    module: &str,
    defs: &[MetricDef],
    sensitivity: u16,
    blocked: &[BlockedRange],
) -> Result<Vec<Sample>, ScrapeError> {
    let planned = plan(defs, sensitivity, blocked)?;

    let mut samples = Vec::with_capacity(defs.len());
    for intervals in planned.values() {
        for interval in intervals {
            read_interval(client, module, interval, &mut samples).await?;
        }
    }

    // Definitions excluded from batching get one read each.
    for def in defs.iter().filter(|def| def.no_batch) {
        let interval = PlannedInterval::single(def)?;
        read_interval(client, module, &interval, &mut samples).await?;
    }

    Ok(samples)
}

async fn read_interval(
    client: &mut dyn ModbusClient,
    module: &str,
    interval: &PlannedInterval<'_>,
    samples: &mut Vec<Sample>,
) -> Result<(), ScrapeError> {
    let bytes = client
        .read(interval.function, interval.first_offset, interval.span)
        .await?;

    debug!(
        "read {} {} register(s) at offset {} covering {} definition(s)",
        interval.span,
        interval.function,
        interval.first_offset,
        interval.defs.len()
    );

    for placed in &interval.defs {
        let start = usize::from(placed.offset - interval.first_offset) * 2;
        let end = start + usize::from(placed.def.data_type.register_span()) * 2;
        let slice = bytes.get(start..end).ok_or(ScrapeError::InsufficientData {
            data_type: placed.def.data_type,
            expected: end - start,
            actual: bytes.len().saturating_sub(start),
        })?;

        let value = parse_value(placed.def, slice)?;
        samples.push(sample_for(placed.def, module, value));
    }

    Ok(())
}

fn sample_for(def: &MetricDef, module: &str, value: f64) -> Sample {
    let mut labels = def.labels.clone();
    labels.insert("module".to_string(), module.to_string());
    Sample {
        name: def.name.clone(),
        help: def.help.clone(),
        labels,
        value,
        kind: def.kind,
    }
}
