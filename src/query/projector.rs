//! Output layouts for tick query results.

use serde::Serialize;
use serde_json::{json, Map, Value};

use super::{CollectedTicks, OutputLayout, RowOrder};
use crate::errors::Diagnostic;
use crate::types::{DemoTick, EntityId, PropValue};

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct TickRow {
    pub tick: DemoTick,
    pub entity_id: EntityId,
    pub steamid: Option<u64>,
    pub name: String,
    /// Same order as [`TickTable::props`].
    pub values: Vec<PropValue>,
}

/// Struct of arrays: every vector has one entry per row.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct TickColumns {
    pub tick: Vec<DemoTick>,
    pub entity_id: Vec<EntityId>,
    pub steamid: Vec<Option<u64>>,
    pub name: Vec<String>,
    /// One column per prop.
    pub columns: Vec<Vec<PropValue>>,
}

impl TickColumns {
    pub fn from_rows(rows: Vec<TickRow>, prop_count: usize) -> Self {
        let mut out = TickColumns {
            columns: vec![Vec::with_capacity(rows.len()); prop_count],
            ..Default::default()
        };
        for row in rows {
            out.tick.push(row.tick);
            out.entity_id.push(row.entity_id);
            out.steamid.push(row.steamid);
            out.name.push(row.name);
            for (column, value) in out.columns.iter_mut().zip(row.values) {
                column.push(value);
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.tick.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tick.is_empty()
    }

    pub fn into_rows(self) -> Vec<TickRow> {
        let TickColumns {
            tick,
            entity_id,
            steamid,
            name,
            columns,
        } = self;
        let mut columns: Vec<_> = columns.into_iter().map(Vec::into_iter).collect();
        tick.into_iter()
            .zip(entity_id)
            .zip(steamid)
            .zip(name)
            .map(|(((tick, entity_id), steamid), name)| TickRow {
                tick,
                entity_id,
                steamid,
                name,
                values: columns.iter_mut().map(|c| c.next().unwrap_or_default()).collect(),
            })
            .collect()
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "layout", content = "data", rename_all = "snake_case")]
pub enum TickData {
    Rows(Vec<TickRow>),
    Columns(TickColumns),
}

impl Default for TickData {
    fn default() -> Self {
        TickData::Rows(Vec::new())
    }
}

impl TickData {
    pub fn len(&self) -> usize {
        match self {
            TickData::Rows(rows) => rows.len(),
            TickData::Columns(columns) => columns.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_rows(self) -> Vec<TickRow> {
        match self {
            TickData::Rows(rows) => rows,
            TickData::Columns(columns) => columns.into_rows(),
        }
    }
}

/// Result of a tick query.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct TickTable {
    /// Resolved prop names, in the order values appear.
    pub props: Vec<String>,
    pub data: TickData,
    pub diagnostics: Vec<Diagnostic>,
    /// Requested names no class defines.
    pub unresolved: Vec<String>,
    /// Last tick the decode reached.
    pub last_tick: Option<DemoTick>,
}

pub fn sort_rows(rows: &mut [TickRow], order: RowOrder) {
    match order {
        RowOrder::Stream => rows.sort_by_key(|row| (row.tick, row.entity_id)),
        // stable, ties keep stream order; no steamid sorts last
        RowOrder::ByPlayerId => rows.sort_by_key(|row| (row.tick, row.steamid.is_none(), row.steamid)),
    }
}

impl TickTable {
    pub fn build(collected: CollectedTicks, layout: OutputLayout, order: RowOrder) -> Self {
        let CollectedTicks {
            props,
            mut rows,
            diagnostics,
            unresolved,
            last_tick,
        } = collected;
        sort_rows(&mut rows, order);
        let data = match layout {
            OutputLayout::RowMajor => TickData::Rows(rows),
            OutputLayout::ColumnMajor => TickData::Columns(TickColumns::from_rows(rows, props.len())),
        };
        TickTable {
            props,
            data,
            diagnostics,
            unresolved,
            last_tick,
        }
    }

    /// The open representation handed to callers: rows become objects keyed
    /// by prop name, columns become one array per prop.
    pub fn to_json(&self) -> Value {
        let data = match &self.data {
            TickData::Rows(rows) => Value::Array(
                rows.iter()
                    .map(|row| {
                        let mut object = Map::new();
                        object.insert("tick".into(), json!(row.tick));
                        object.insert("entity_id".into(), json!(row.entity_id));
                        object.insert("steamid".into(), json!(row.steamid));
                        object.insert("name".into(), json!(row.name));
                        for (prop, value) in self.props.iter().zip(&row.values) {
                            object.insert(prop.clone(), json!(value));
                        }
                        Value::Object(object)
                    })
                    .collect(),
            ),
            TickData::Columns(columns) => {
                let mut object = Map::new();
                object.insert("tick".into(), json!(columns.tick));
                object.insert("entity_id".into(), json!(columns.entity_id));
                object.insert("steamid".into(), json!(columns.steamid));
                object.insert("name".into(), json!(columns.name));
                for (prop, column) in self.props.iter().zip(&columns.columns) {
                    object.insert(prop.clone(), json!(column));
                }
                Value::Object(object)
            }
        };
        json!({
            "props": self.props,
            "data": data,
            "unresolved": self.unresolved,
            "diagnostics": self.diagnostics,
            "last_tick": self.last_tick,
        })
    }
}
