//! Source engine demo decoding and queries over its ticks and events.
//!
//! Every entry point takes the raw demo bytes and decodes them in one
//! forward pass:
//!
//! - [`parse_header`] for the file header,
//! - [`list_game_events`], [`parse_event`] and [`parse_events`] for game events,
//! - [`parse_grenades`] for projectile trajectories,
//! - [`parse_player_info`] for the players in the recording,
//! - [`parse_ticks`] and [`parse_ticks_partitioned`] for per tick player props.
//!
//! Lower level access goes through [`parsing::DemoParser`] with a custom
//! [`parsing::MessageHandler`].

pub mod errors;
pub mod parsing;
pub mod query;
pub mod types;

use crate::parsing::cursor::Cursor;
use crate::parsing::datacollection::{EventCollector, GrenadeCollector};
use crate::parsing::header::read_header;
use crate::parsing::internals::{EventGatherer, PlayerGatherer};
use crate::parsing::{DemoParser, NullHandler};
use crate::query::partition::{run_plan, PartitionPlan, PartitionRunner};
use crate::query::TickCollector;

pub use crate::errors::{DecodeError, Diagnostic, ErrorKind, Result};
pub use crate::parsing::datacollection::{EventOutput, EventQuery};
pub use crate::parsing::DecodeState;
pub use crate::query::{OutputLayout, RowOrder, TickQuery, TickTable};
pub use crate::types::demo::Header;
pub use crate::types::entities::{GrenadeRecord, PlayerInfo};
pub use crate::types::events::{EventInstance, EventListing};
pub use crate::types::{DemoTick, PropValue};

pub fn parse_header(bytes: &[u8]) -> Result<Header> {
    read_header(&mut Cursor::new(bytes)).map_err(|kind| DecodeError::new(kind, 0, 0))
}

/// Every event type the demo describes, with how often it occurs.
pub fn list_game_events(bytes: &[u8]) -> Result<Vec<EventListing>> {
    let (_, listing) = DemoParser::new(bytes, EventGatherer::default()).parse()?;
    Ok(listing)
}

pub fn parse_event(bytes: &[u8], name: &str, query: &EventQuery) -> Result<EventOutput> {
    parse_events(bytes, &[name], query)
}

/// Decodes the named events; an empty list decodes all of them.
pub fn parse_events<S: AsRef<str>>(bytes: &[u8], names: &[S], query: &EventQuery) -> Result<EventOutput> {
    let (_, output) = DemoParser::new(bytes, EventCollector::new(names, query.clone())).parse()?;
    Ok(output)
}

pub fn parse_grenades(bytes: &[u8]) -> Result<Vec<GrenadeRecord>> {
    let (_, grenades) = DemoParser::new(bytes, GrenadeCollector::new()).parse()?;
    Ok(grenades)
}

pub fn parse_player_info(bytes: &[u8]) -> Result<Vec<PlayerInfo>> {
    let (_, players) = DemoParser::new(bytes, PlayerGatherer::default()).parse()?;
    Ok(players)
}

/// Samples the query's props in one pass, optionally continuing from a
/// checkpoint taken by [`checkpoints`].
pub fn parse_ticks(bytes: &[u8], query: &TickQuery, resume: Option<&DecodeState>) -> Result<TickTable> {
    let collector = TickCollector::new(query);
    let parser = match resume {
        Some(state) => DemoParser::resume(bytes, state, collector),
        None => DemoParser::new(bytes, collector),
    };
    let (_, collected) = parser.parse()?;
    Ok(collected.into_table(query.layout, query.order))
}

/// Same result as [`parse_ticks`], decoded as `partitions` tick ranges by
/// `runner`.
pub fn parse_ticks_partitioned<R: PartitionRunner + ?Sized>(
    bytes: &[u8],
    query: &TickQuery,
    runner: &R,
    partitions: usize,
) -> Result<TickTable> {
    let header = parse_header(bytes)?;
    let last = match query.wanted_ticks.as_ref().and_then(|ticks| ticks.iter().max()) {
        Some(last) => *last,
        None => header.ticks,
    };
    let plan = PartitionPlan::split(0, last, partitions).with_checkpoints(bytes)?;
    run_plan(bytes, query, &plan, runner)
}

/// Decode states right before the first command at or after each tick.
///
/// Ticks past the end of the demo get the state at the end.
pub fn checkpoints(bytes: &[u8], ticks: &[DemoTick]) -> Result<Vec<DecodeState>> {
    let mut order: Vec<usize> = (0..ticks.len()).collect();
    order.sort_by_key(|&i| ticks[i]);

    let (_, mut ticker) = DemoParser::new(bytes, NullHandler).ticker()?;
    let mut states: Vec<Option<DecodeState>> = vec![None; ticks.len()];
    let mut pending = order.into_iter().peekable();

    while let Some(&index) = pending.peek() {
        let reached = ticker.peek_tick().map_or(true, |next| next >= ticks[index]);
        if reached {
            states[index] = Some(ticker.checkpoint());
            pending.next();
        } else if !ticker.tick()? {
            // the end state stands in for everything after it
            let end = ticker.checkpoint();
            for index in pending.by_ref() {
                states[index] = Some(end.clone());
            }
        }
    }

    Ok(states.into_iter().flatten().collect())
}
