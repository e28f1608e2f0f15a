//! Splitting a tick query over contiguous tick ranges.
//!
//! Every partition is an independent decode of the same bytes that only
//! emits rows inside its range, so running them in any order or on any
//! thread and concatenating gives the single pass result.

use std::ops::Range;

use itertools::Itertools;
use rayon::prelude::*;

use super::{CollectedTicks, TickCollector, TickQuery, TickTable};
use crate::errors::Result;
use crate::parsing::{DecodeState, DemoParser};
use crate::types::DemoTick;

#[derive(Debug, Clone)]
pub struct TickRange {
    pub start: DemoTick,
    /// Exclusive.
    pub end: DemoTick,
    /// Checkpoint to start decoding from instead of the file start.
    pub resume: Option<DecodeState>,
}

impl TickRange {
    pub fn ticks(&self) -> Range<DemoTick> {
        self.start..self.end
    }
}

#[derive(Debug, Clone, Default)]
pub struct PartitionPlan {
    pub ranges: Vec<TickRange>,
}

impl PartitionPlan {
    /// `n` ranges of about equal length covering `first..=last`. The last
    /// range is open ended so ticks past the header count are not lost.
    pub fn split(first: DemoTick, last: DemoTick, n: usize) -> Self {
        let n = n.max(1) as u64;
        let span = u64::from(last.saturating_sub(first)) + 1;
        let step = span.div_ceil(n).max(1);
        let starts: Vec<DemoTick> = (0..n)
            .map(|i| first as u64 + i * step)
            .take_while(|start| *start <= u64::from(last))
            .map(|start| start as DemoTick)
            .collect();
        Self::from_starts(&starts)
    }

    /// Ranges starting at each of `starts`; the first one is stretched back
    /// to tick 0.
    pub fn from_starts(starts: &[DemoTick]) -> Self {
        let mut starts: Vec<DemoTick> = starts.to_vec();
        starts.sort_unstable();
        starts.dedup();
        match starts.first_mut() {
            Some(first) => *first = 0,
            None => starts.push(0),
        }
        let ranges = starts
            .iter()
            .zip(starts.iter().skip(1).map(Some).chain(std::iter::once(None)))
            .map(|(&start, end)| TickRange {
                start,
                end: end.copied().unwrap_or(DemoTick::MAX),
                resume: None,
            })
            .collect();
        PartitionPlan { ranges }
    }

    /// Attaches checkpoints so later partitions skip decoding the prefix.
    pub fn with_checkpoints(mut self, bytes: &[u8]) -> Result<Self> {
        let starts: Vec<DemoTick> = self.ranges.iter().map(|range| range.start).collect();
        let states = crate::checkpoints(bytes, &starts)?;
        for (range, state) in self.ranges.iter_mut().zip(states) {
            // the file start needs no checkpoint
            if range.start > 0 {
                range.resume = Some(state);
            }
        }
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

/// What one partition produced.
pub type PartialOutput = CollectedTicks;

/// The bytes and query every partition of one run shares.
#[derive(Debug, Clone, Copy)]
pub struct PartitionJob<'a> {
    pub bytes: &'a [u8],
    pub query: &'a TickQuery,
}

impl<'a> PartitionJob<'a> {
    pub fn run_partition(&self, range: &TickRange) -> Result<PartialOutput> {
        log::debug!("decoding partition {:?}", range.ticks());
        let collector = TickCollector::for_range(self.query, range.ticks());
        let parser = match &range.resume {
            Some(state) => DemoParser::resume(self.bytes, state, collector),
            None => DemoParser::new(self.bytes, collector),
        };
        let (_, output) = parser.parse()?;
        Ok(output)
    }
}

/// Execution strategy for a partition plan. Outputs come back in plan
/// order whatever order they ran in.
pub trait PartitionRunner {
    fn run_all(&self, job: PartitionJob<'_>, ranges: &[TickRange]) -> Result<Vec<PartialOutput>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SingleThreaded;

impl PartitionRunner for SingleThreaded {
    fn run_all(&self, job: PartitionJob<'_>, ranges: &[TickRange]) -> Result<Vec<PartialOutput>> {
        ranges.iter().map(|range| job.run_partition(range)).collect()
    }
}

/// Runs partitions on a rayon pool, one parser state per task.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pooled {
    /// Dedicated pool size; `None` uses the global pool.
    pub threads: Option<usize>,
}

impl Pooled {
    pub fn with_threads(threads: usize) -> Self {
        Pooled { threads: Some(threads) }
    }
}

impl PartitionRunner for Pooled {
    fn run_all(&self, job: PartitionJob<'_>, ranges: &[TickRange]) -> Result<Vec<PartialOutput>> {
        let run = || -> Result<Vec<PartialOutput>> {
            ranges.par_iter().map(|range| job.run_partition(range)).collect()
        };
        match self.threads {
            Some(threads) => match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
                Ok(pool) => pool.install(run),
                Err(err) => {
                    log::warn!("could not build a {threads} thread pool, using the global one: {err}");
                    run()
                }
            },
            None => run(),
        }
    }
}

/// Concatenates partition outputs in range order.
pub fn merge(partials: Vec<PartialOutput>, query: &TickQuery) -> TickTable {
    let mut merged = CollectedTicks::default();
    let mut diagnostics = Vec::new();
    for (index, partial) in partials.into_iter().enumerate() {
        if index == 0 {
            merged.props = partial.props;
            merged.unresolved = partial.unresolved;
        }
        merged.rows.extend(partial.rows);
        diagnostics.extend(partial.diagnostics);
        merged.last_tick = merged.last_tick.max(partial.last_tick);
    }
    // every partition decodes the file start, so they report the same things
    merged.diagnostics = diagnostics.into_iter().unique().collect();
    merged.into_table(query.layout, query.order)
}

pub fn run_plan<R: PartitionRunner + ?Sized>(
    bytes: &[u8],
    query: &TickQuery,
    plan: &PartitionPlan,
    runner: &R,
) -> Result<TickTable> {
    let partials = runner.run_all(PartitionJob { bytes, query }, &plan.ranges)?;
    Ok(merge(partials, query))
}
