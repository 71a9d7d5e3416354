//! Grouping metric definitions into batched register reads.
//!
//! Round trips are expensive on serial links, so definitions close to each
//! other are fetched in one read. The planner bridges gaps up to a
//! configurable sensitivity, caps every read at the transport's maximum
//! span and never bridges an operator-declared blocked range.

use std::collections::BTreeMap;

use crate::def::{BlockedRange, MetricDef, ModbusFunction};
use crate::error::ScrapeError;

/// The transport's maximum read size, in 16-bit registers.
pub const MAX_INTERVAL_SPAN: u16 = 2000;

/// A definition placed inside an interval, with its decoded offset.
#[derive(Debug, Clone, Copy)]
pub struct PlannedDef<'a> {
    pub def: &'a MetricDef,
    pub offset: u16,
}

/// One contiguous batched read covering a run of definitions.
#[derive(Debug, Clone)]
pub struct PlannedInterval<'a> {
    pub function: ModbusFunction,
    pub first_offset: u16,
    /// Registers to request, `(last offset - first offset) + span(last)`.
    pub span: u16,
    pub defs: Vec<PlannedDef<'a>>,
}

impl<'a> PlannedInterval<'a> {
    /// An interval reading a single definition on its own.
    pub fn single(def: &'a MetricDef) -> Result<Self, ScrapeError> {
        let (function, offset) = def.address.decode()?;
        Ok(PlannedInterval {
            function,
            first_offset: offset,
            span: def.data_type.register_span(),
            defs: vec![PlannedDef { def, offset }],
        })
    }
}

struct ResolvedBlock {
    function: ModbusFunction,
    start: u16,
    end: u16,
}

/// Plan the minimum set of batched reads for `defs`.
///
/// Definitions flagged `no_batch` are left out; the scraper reads those
/// individually. A malformed address anywhere aborts the whole plan since it
/// indicates a configuration defect.
pub fn plan<'a>(
    defs: &'a [MetricDef],
    sensitivity: u16,
    blocked: &[BlockedRange],
) -> Result<BTreeMap<ModbusFunction, Vec<PlannedInterval<'a>>>, ScrapeError> {
    let blocked = blocked
        .iter()
        .map(|range| {
            let (function, start, end) = range.resolve()?;
            Ok(ResolvedBlock {
                function,
                start,
                end,
            })
        })
        .collect::<Result<Vec<_>, ScrapeError>>()?;

    let mut groups: BTreeMap<ModbusFunction, Vec<PlannedDef<'a>>> = BTreeMap::new();
    for def in defs.iter().filter(|def| !def.no_batch) {
        let (function, offset) = def.address.decode()?;
        groups.entry(function).or_default().push(PlannedDef { def, offset });
    }

    let mut plan = BTreeMap::new();
    for (function, mut group) in groups {
        // stable sort keeps definition order on equal offsets
        group.sort_by_key(|placed| placed.offset);

        let mut intervals: Vec<PlannedInterval<'a>> = Vec::new();
        let mut current: Option<PlannedInterval<'a>> = None;
        let mut last_offset = 0u16;

        for placed in group {
            let span = placed.def.data_type.register_span();

            let extend = current.as_ref().is_some_and(|interval| {
                let total = u32::from(placed.offset - interval.first_offset) + u32::from(span);
                placed.offset - last_offset <= sensitivity
                    && total <= u32::from(MAX_INTERVAL_SPAN)
                    && !crosses_blocked(&blocked, function, last_offset, placed.offset)
            });

            if extend {
                if let Some(interval) = current.as_mut() {
                    interval.span = (placed.offset - interval.first_offset) + span;
                    interval.defs.push(placed);
                }
            } else {
                if let Some(done) = current.take() {
                    intervals.push(done);
                }
                current = Some(PlannedInterval {
                    function,
                    first_offset: placed.offset,
                    span,
                    defs: vec![placed],
                });
            }
            last_offset = placed.offset;
        }
        if let Some(done) = current.take() {
            intervals.push(done);
        }
        plan.insert(function, intervals);
    }

    Ok(plan)
}

/// Would bridging the gap between two neighbouring offsets read across a
/// blocked range?
fn crosses_blocked(
    blocked: &[ResolvedBlock],
    function: ModbusFunction,
    last_offset: u16,
    next_offset: u16,
) -> bool {
    blocked.iter().any(|range| {
        range.function == function && last_offset < range.end && next_offset > range.start
    })
}
