//! # Query
//!
//! Per tick property snapshots of players.
//!
//! A [`TickQuery`] names the props, ticks and players wanted. The
//! [`TickCollector`] handler resolves the names once the schema arrives and
//! samples the entity state at every tick boundary. [`projector`] lays the
//! rows out and [`partition`] splits the work over a thread pool.

pub mod partition;
pub mod projector;
pub mod resolve;

use std::ops::Range;

use serde::Serialize;

use crate::errors::{Diagnostic, ReadResult};
use crate::parsing::datatable::Schema;
use crate::parsing::message::MessageType;
use crate::parsing::state::ParserState;
use crate::parsing::MessageHandler;
use crate::types::{DemoTick, PropValue};

pub use self::projector::{TickColumns, TickData, TickRow, TickTable};
pub use self::resolve::ResolvedProp;

#[derive(Serialize, Default, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputLayout {
    /// One record per (tick, player).
    #[default]
    RowMajor,
    /// One array per prop, index aligned with the tick/player arrays.
    ColumnMajor,
}

#[derive(Serialize, Default, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOrder {
    /// Tick, then entity index.
    #[default]
    Stream,
    /// Tick, then SteamID64. Players without one go last.
    ByPlayerId,
}

#[derive(Default, Debug, Clone)]
pub struct TickQuery {
    pub wanted_props: Vec<String>,
    /// `None` samples every tick that carried a command.
    pub wanted_ticks: Option<Vec<DemoTick>>,
    /// SteamID64s.
    pub wanted_players: Option<Vec<u64>>,
    /// Only keep rows where each named prop equals the value.
    pub wanted_prop_states: Vec<(String, PropValue)>,
    pub layout: OutputLayout,
    pub order: RowOrder,
}

impl TickQuery {
    pub fn new<S: Into<String>>(props: impl IntoIterator<Item = S>) -> Self {
        TickQuery {
            wanted_props: props.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_ticks(mut self, ticks: impl IntoIterator<Item = DemoTick>) -> Self {
        self.wanted_ticks = Some(ticks.into_iter().collect());
        self
    }

    pub fn with_players(mut self, players: impl IntoIterator<Item = u64>) -> Self {
        self.wanted_players = Some(players.into_iter().collect());
        self
    }

    pub fn with_layout(mut self, layout: OutputLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_order(mut self, order: RowOrder) -> Self {
        self.order = order;
        self
    }
}

/// Rows of one decode pass, before layout.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectedTicks {
    pub props: Vec<String>,
    pub rows: Vec<TickRow>,
    pub diagnostics: Vec<Diagnostic>,
    pub unresolved: Vec<String>,
    pub last_tick: Option<DemoTick>,
}

impl CollectedTicks {
    pub fn into_table(self, layout: OutputLayout, order: RowOrder) -> TickTable {
        TickTable::build(self, layout, order)
    }
}

/// Samples wanted props of player entities at tick boundaries.
#[derive(Debug, Clone)]
pub struct TickCollector {
    wanted_props: Vec<String>,
    wanted_ticks: Option<Vec<DemoTick>>,
    wanted_players: Option<Vec<u64>>,
    wanted_prop_states: Vec<(String, PropValue)>,
    range: Range<DemoTick>,

    props: Vec<ResolvedProp>,
    state_props: Vec<(ResolvedProp, PropValue)>,
    resolved: bool,

    rows: Vec<TickRow>,
    diagnostics: Vec<Diagnostic>,
    last_tick: Option<DemoTick>,
    done: bool,
}

impl TickCollector {
    pub fn new(query: &TickQuery) -> Self {
        Self::for_range(query, 0..DemoTick::MAX)
    }

    /// Only emits rows for ticks inside `range`.
    pub fn for_range(query: &TickQuery, range: Range<DemoTick>) -> Self {
        let wanted_ticks = query.wanted_ticks.as_ref().map(|ticks| {
            let mut ticks = ticks.clone();
            ticks.sort_unstable();
            ticks.dedup();
            ticks
        });
        TickCollector {
            wanted_props: query.wanted_props.clone(),
            wanted_ticks,
            wanted_players: query.wanted_players.clone(),
            wanted_prop_states: query.wanted_prop_states.clone(),
            range,
            props: Vec::new(),
            state_props: Vec::new(),
            resolved: false,
            rows: Vec::new(),
            diagnostics: Vec::new(),
            last_tick: None,
            done: false,
        }
    }

    fn resolve(&mut self, schema: &Schema) {
        let props: Vec<ResolvedProp> = self
            .wanted_props
            .iter()
            .map(|name| ResolvedProp::resolve(schema, name))
            .collect();
        for prop in props.iter().filter(|prop| !prop.is_resolved()) {
            let diagnostic = Diagnostic::UnresolvedProperty { name: prop.name.clone() };
            if !self.diagnostics.contains(&diagnostic) {
                self.diagnostics.push(diagnostic);
            }
        }
        self.props = props;
        self.state_props = self
            .wanted_prop_states
            .iter()
            .map(|(name, value)| (ResolvedProp::resolve(schema, name), value.clone()))
            .collect();
        self.resolved = true;
    }

    /// Ticks to sample when `tick` closes and `next` opens.
    fn ticks_between(&self, tick: DemoTick, next: Option<DemoTick>) -> Vec<DemoTick> {
        let ticks = match &self.wanted_ticks {
            None => vec![tick],
            Some(wanted) => {
                let end = next.unwrap_or(tick.saturating_add(1));
                wanted.iter().copied().filter(|t| *t >= tick && *t < end).collect()
            }
        };
        ticks.into_iter().filter(|t| self.range.contains(t)).collect()
    }

    /// First tick nothing is wanted at any more.
    fn end_tick(&self) -> DemoTick {
        match self.wanted_ticks.as_ref().and_then(|ticks| ticks.last()) {
            Some(last) => self.range.end.min(last.saturating_add(1)),
            None => self.range.end,
        }
    }

    fn sample(&mut self, tick: DemoTick, state: &ParserState) {
        let resource = self.props.iter().find_map(|prop| prop.resource_entity(state));

        for entity in state.entities.iter() {
            let Some(player) = state.player_info(entity.index) else {
                continue;
            };
            if let Some(wanted) = &self.wanted_players {
                match player.steamid {
                    Some(steamid) if wanted.contains(&steamid) => {}
                    _ => continue,
                }
            }
            let matches_states = self
                .state_props
                .iter()
                .all(|(prop, expected)| prop.read_with(state, entity, resource).loosely_equals(expected));
            if !matches_states {
                continue;
            }

            let values = self
                .props
                .iter()
                .filter(|prop| prop.is_resolved())
                .map(|prop| prop.read_with(state, entity, resource))
                .collect();
            self.rows.push(TickRow {
                tick,
                entity_id: entity.index,
                steamid: player.steamid,
                name: player.name.clone(),
                values,
            });
        }
    }
}

impl MessageHandler for TickCollector {
    type Output = CollectedTicks;

    fn does_handle(_message_type: MessageType) -> bool {
        false
    }

    fn handle_data_tables(&mut self, schema: &Schema, _state: &ParserState) {
        self.resolve(schema);
    }

    fn handle_tick_end(&mut self, tick: DemoTick, next_tick: Option<DemoTick>, state: &ParserState) -> ReadResult<()> {
        // a partition resumed past everything it wants
        if tick >= self.end_tick() {
            self.done = true;
            return Ok(());
        }
        self.last_tick = Some(tick);
        if !self.resolved {
            return Ok(());
        }
        for sample_tick in self.ticks_between(tick, next_tick) {
            self.sample(sample_tick, state);
        }
        if next_tick.map_or(true, |next| next >= self.end_tick()) {
            self.done = true;
        }
        Ok(())
    }

    fn handle_diagnostic(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    fn is_done(&self) -> bool {
        self.done
    }

    fn into_output(mut self, state: &ParserState) -> Self::Output {
        if !self.resolved {
            match state.schema() {
                Ok(schema) => self.resolve(schema),
                // never saw the data tables, nothing can resolve
                Err(_) => self.resolve(&Schema::default()),
            }
        }
        let (props, unresolved): (Vec<_>, Vec<_>) = self.props.iter().partition(|prop| prop.is_resolved());
        CollectedTicks {
            props: props.into_iter().map(|prop| prop.name.clone()).collect(),
            unresolved: unresolved.into_iter().map(|prop| prop.name.clone()).collect(),
            rows: self.rows,
            diagnostics: self.diagnostics,
            last_tick: self.last_tick,
        }
    }
}
