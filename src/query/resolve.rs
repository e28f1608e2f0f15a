//! Name based property lookup across every class of a schema.

use std::collections::HashMap;

use crate::parsing::datatable::{ClassDescriptor, Schema};
use crate::parsing::entities::Entity;
use crate::parsing::sendprop::SendPropType;
use crate::parsing::state::ParserState;
use crate::types::{ClassId, PropValue};

/// Friendly names and the raw props they stand for, tried in order.
const ALIASES: &[(&str, &[&str])] = &[
    ("health", &["m_iHealth"]),
    ("max_health", &["m_iMaxHealth"]),
    ("team_num", &["m_iTeamNum", "m_iTeam"]),
    ("life_state", &["m_lifeState"]),
    ("origin", &["m_vecOrigin"]),
    ("origin_z", &["m_vecOrigin[2]"]),
    ("pitch", &["m_angEyeAngles[0]"]),
    ("yaw", &["m_angEyeAngles[1]"]),
    ("player_class", &["m_iClass", "m_iPlayerClass"]),
    ("ping", &["m_iPing"]),
    ("score", &["m_iScore", "m_iTotalScore"]),
    ("simulation_time", &["m_flSimulationTime"]),
    ("ubercharge", &["m_flChargeLevel", "m_iChargeLevel"]),
    ("deaths", &["m_iDeaths"]),
    ("damage", &["m_iDamage"]),
];

pub fn alias_targets(name: &str) -> Option<&'static [&'static str]> {
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == name)
        .map(|(_, targets)| *targets)
}

/// One way of reading a name off a class: a flattened prop index, plus a
/// component when the name was `prop[n]` and only `prop` exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Candidate {
    index: usize,
    component: Option<usize>,
}

/// A wanted property name resolved against a schema.
#[derive(Debug, Clone, Default)]
pub struct ResolvedProp {
    pub name: String,
    targets: Vec<String>,
    by_class: HashMap<ClassId, Vec<Candidate>>,
    resource_classes: Vec<ClassId>,
    in_resource: bool,
}

/// `m_angEyeAngles[1]` -> (`m_angEyeAngles`, 1)
fn split_component(target: &str) -> Option<(&str, usize)> {
    let open = target.rfind('[')?;
    let inner = target[open + 1..].strip_suffix(']')?;
    Some((&target[..open], inner.parse().ok()?))
}

fn candidates(class: &ClassDescriptor, target: &str) -> Vec<Candidate> {
    let direct = class.lookup(target);
    if !direct.is_empty() {
        return direct
            .into_iter()
            .map(|index| Candidate { index, component: None })
            .collect();
    }
    match split_component(target) {
        Some((base, component)) => class
            .lookup(base)
            .into_iter()
            .map(|index| Candidate {
                index,
                component: Some(component),
            })
            .collect(),
        None => Vec::new(),
    }
}

fn is_player_resource(class: &ClassDescriptor) -> bool {
    class.name.ends_with("PlayerResource")
}

fn component_of(value: &PropValue, component: usize) -> PropValue {
    match (value, component) {
        (PropValue::Vector(v), 0) => PropValue::Float(v.x),
        (PropValue::Vector(v), 1) => PropValue::Float(v.y),
        (PropValue::Vector(v), 2) => PropValue::Float(v.z),
        (PropValue::VectorXY(v), 0) => PropValue::Float(v.x),
        (PropValue::VectorXY(v), 1) => PropValue::Float(v.y),
        (PropValue::Array(values), index) => values.get(index).cloned().unwrap_or_default(),
        _ => PropValue::Absent,
    }
}

impl ResolvedProp {
    pub fn resolve(schema: &Schema, name: &str) -> Self {
        let targets: Vec<String> = match alias_targets(name) {
            Some(targets) => targets.iter().map(|t| t.to_string()).collect(),
            None => vec![name.to_string()],
        };

        let mut by_class = HashMap::new();
        let mut resource_classes = Vec::new();
        let mut in_resource = false;
        for class in schema.classes() {
            let found: Vec<Candidate> = targets.iter().flat_map(|t| candidates(class, t)).collect();
            if !found.is_empty() {
                by_class.insert(class.id, found);
            }
            if is_player_resource(class) {
                resource_classes.push(class.id);
                in_resource |= class
                    .props
                    .iter()
                    .any(|prop| targets.iter().any(|t| prop.table == *t || prop.name == *t));
            }
        }

        if by_class.is_empty() && !in_resource {
            log::warn!("property {name:?} is not defined by any class");
        }

        ResolvedProp {
            name: name.to_string(),
            targets,
            by_class,
            resource_classes,
            in_resource,
        }
    }

    /// Resolves against the state's schema, if it has one yet.
    pub fn resolve_on(state: &ParserState, name: &str) -> Option<Self> {
        state.schema().ok().map(|schema| Self::resolve(schema, name))
    }

    pub fn is_resolved(&self) -> bool {
        !self.by_class.is_empty() || self.in_resource
    }

    /// Classes the name resolves against directly.
    pub fn classes(&self) -> impl Iterator<Item = ClassId> + '_ {
        self.by_class.keys().copied()
    }

    /// The player resource entity, if one is live.
    pub fn resource_entity<'s>(&self, state: &'s ParserState) -> Option<&'s Entity> {
        if !self.in_resource {
            return None;
        }
        state
            .entities
            .iter()
            .find(|entity| self.resource_classes.contains(&entity.class_id))
    }

    pub fn read(&self, state: &ParserState, entity: &Entity) -> PropValue {
        self.read_with(state, entity, self.resource_entity(state))
    }

    /// Reads the value for `entity`, falling back to its slot in the player
    /// resource arrays when the entity itself has nothing.
    pub fn read_with(&self, state: &ParserState, entity: &Entity, resource: Option<&Entity>) -> PropValue {
        if let Some(found) = self.by_class.get(&entity.class_id) {
            for candidate in found {
                let raw = entity.prop(candidate.index);
                let value = match candidate.component {
                    Some(component) => component_of(raw, component),
                    None => raw.clone(),
                };
                if !value.is_absent() {
                    return value;
                }
            }
        }

        match resource {
            Some(resource) if resource.index != entity.index => self.read_resource(state, resource, entity.index as usize),
            _ => PropValue::Absent,
        }
    }

    fn read_resource(&self, state: &ParserState, resource: &Entity, slot: usize) -> PropValue {
        let Ok(class) = state.class_of(resource) else {
            return PropValue::Absent;
        };
        for target in &self.targets {
            // arrays of data tables flatten to `<array>.<index>`
            if let Some(index) = class.index_of_path(&format!("{target}.{slot:03}")) {
                let value = resource.prop(index);
                if !value.is_absent() {
                    return value.clone();
                }
            }
            for &index in class.indices_named(target) {
                let is_array = class.props.get(index).map(|p| p.kind == SendPropType::Array).unwrap_or(false);
                if !is_array {
                    continue;
                }
                let value = component_of(resource.prop(index), slot);
                if !value.is_absent() {
                    return value;
                }
            }
        }
        PropValue::Absent
    }
}
