//! Send tables, server classes and the flattened per class property lists.
//!
//! The schema is built once from the data tables command and is read only
//! after that; parser states share it through an `Arc`.

use std::collections::HashMap;

use serde::Serialize;

use super::cursor::Cursor;
use super::sendprop::{PropertyDescriptor, RawSendProp, SendPropFlags, SendPropType};
use crate::errors::{ErrorKind, ReadResult, SchemaViolation};
use crate::types::ClassId;

/// Send tables nest a couple of levels deep in practice; anything past this
/// is a reference cycle.
const MAX_TABLE_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct SendTable {
    pub name: String,
    pub needs_decoder: bool,
    pub props: Vec<RawSendProp>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ServerClassDef {
    pub id: ClassId,
    pub name: String,
    pub table: String,
}

/// Reads the body of a data tables command.
pub fn read_data_tables(cursor: &mut Cursor) -> ReadResult<(Vec<SendTable>, Vec<ServerClassDef>)> {
    let mut tables = Vec::new();
    while cursor.read_bool()? {
        let needs_decoder = cursor.read_bool()?;
        let name = cursor.read_cstring()?;
        let prop_count = cursor.read_bits(10)?;
        let props = (0..prop_count)
            .map(|_| RawSendProp::read(cursor))
            .collect::<ReadResult<Vec<_>>>()?;
        tables.push(SendTable {
            name,
            needs_decoder,
            props,
        });
    }

    let class_count = cursor.read_u16()?;
    let mut classes = Vec::with_capacity(usize::from(class_count));
    for _ in 0..class_count {
        classes.push(ServerClassDef {
            id: cursor.read_u16()?,
            name: cursor.read_cstring()?,
            table: cursor.read_cstring()?,
        });
    }

    Ok((tables, classes))
}

#[derive(Debug, Clone)]
pub struct ClassDescriptor {
    pub id: ClassId,
    pub name: String,
    pub table: String,
    /// Table names reached through `baseclass` props, most derived first.
    pub inheritance: Vec<String>,
    pub props: Vec<PropertyDescriptor>,
    by_path: HashMap<String, usize>,
    by_name: HashMap<String, Vec<usize>>,
}

impl ClassDescriptor {
    pub fn new(def: &ServerClassDef, inheritance: Vec<String>, props: Vec<PropertyDescriptor>) -> Self {
        let mut by_path = HashMap::with_capacity(props.len());
        let mut by_name: HashMap<String, Vec<usize>> = HashMap::new();
        for (index, prop) in props.iter().enumerate() {
            by_path.entry(prop.path.clone()).or_insert(index);
            by_name.entry(prop.name.clone()).or_default().push(index);
        }
        ClassDescriptor {
            id: def.id,
            name: def.name.clone(),
            table: def.table.clone(),
            inheritance,
            props,
            by_path,
            by_name,
        }
    }

    pub fn prop(&self, index: usize) -> ReadResult<&PropertyDescriptor> {
        self.props.get(index).ok_or_else(|| {
            SchemaViolation::PropertyIndexOutOfRange {
                class: self.id,
                index,
                count: self.props.len(),
            }
            .into()
        })
    }

    pub fn index_of_path(&self, path: &str) -> Option<usize> {
        self.by_path.get(path).copied()
    }

    /// Every flattened prop with this bare name, in flattened order.
    pub fn indices_named(&self, name: &str) -> &[usize] {
        self.by_name.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Dotted paths resolve exactly, bare names to every prop of that name.
    pub fn lookup(&self, name: &str) -> Vec<usize> {
        match self.index_of_path(name) {
            Some(index) => vec![index],
            None => self.indices_named(name).to_vec(),
        }
    }

    pub fn derives_from(&self, table: &str) -> bool {
        self.inheritance.iter().any(|t| t == table)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Schema {
    classes: Vec<Option<ClassDescriptor>>,
    by_name: HashMap<String, ClassId>,
    tables: HashMap<String, SendTable>,
    class_count: usize,
}

impl Schema {
    pub fn build(tables: Vec<SendTable>, classes: Vec<ServerClassDef>) -> ReadResult<Schema> {
        let mut schema = Schema {
            tables: tables.into_iter().map(|table| (table.name.clone(), table)).collect(),
            ..Default::default()
        };
        for def in classes {
            schema.register_class(def)?;
        }
        log::debug!(
            "built schema: {} send tables, {} server classes",
            schema.tables.len(),
            schema.class_count
        );
        Ok(schema)
    }

    pub fn register_class(&mut self, def: ServerClassDef) -> ReadResult<ClassId> {
        let root = self
            .tables
            .get(&def.table)
            .ok_or_else(|| SchemaViolation::UnknownSendTable(def.table.clone()))?;

        let flattener = Flattener::new(&self.tables, root)?;
        let props = flattener.flatten(root)?;
        let inheritance = self.inheritance(root)?;

        let id = def.id;
        let slot = usize::from(id);
        if self.classes.len() <= slot {
            self.classes.resize(slot + 1, None);
        }
        if self.classes[slot].is_none() {
            self.class_count += 1;
        }
        self.by_name.insert(def.name.clone(), id);
        self.classes[slot] = Some(ClassDescriptor::new(&def, inheritance, props));
        Ok(id)
    }

    fn inheritance(&self, root: &SendTable) -> ReadResult<Vec<String>> {
        let mut chain = vec![root.name.clone()];
        let mut current = root;
        while let Some(base) = current
            .props
            .iter()
            .find(|prop| prop.kind == SendPropType::DataTable && prop.name == "baseclass")
        {
            let name = base.table_name.clone().unwrap_or_default();
            if chain.len() > MAX_TABLE_DEPTH {
                return Err(ErrorKind::MalformedMessage(format!("send table {} nests too deep", root.name)));
            }
            current = self
                .tables
                .get(&name)
                .ok_or_else(|| SchemaViolation::UnknownSendTable(name.clone()))?;
            chain.push(name);
        }
        Ok(chain)
    }

    pub fn class(&self, id: ClassId) -> ReadResult<&ClassDescriptor> {
        self.classes
            .get(usize::from(id))
            .and_then(Option::as_ref)
            .ok_or_else(|| SchemaViolation::UnknownClass(id).into())
    }

    pub fn class_by_name(&self, name: &str) -> Option<&ClassDescriptor> {
        self.by_name.get(name).and_then(|id| self.class(*id).ok())
    }

    pub fn classes(&self) -> impl Iterator<Item = &ClassDescriptor> {
        self.classes.iter().flatten()
    }

    pub fn class_count(&self) -> usize {
        self.class_count
    }

    /// Bits used to encode a class id in entity enter records.
    pub fn class_bits(&self) -> usize {
        let count = self.classes.len() as u32;
        ((u32::BITS - count.leading_zeros()) as usize).max(1)
    }

    pub fn send_table(&self, name: &str) -> Option<&SendTable> {
        self.tables.get(name)
    }

    /// Index of a property by dotted path, or the first prop with that bare
    /// name.
    pub fn resolve_property(&self, class_id: ClassId, path: &str) -> ReadResult<Option<usize>> {
        Ok(self.class(class_id)?.lookup(path).first().copied())
    }

    /// Classes that have at least one prop matching `name` (path or bare).
    pub fn classes_defining(&self, name: &str) -> Vec<ClassId> {
        self.classes()
            .filter(|class| !class.lookup(name).is_empty())
            .map(|class| class.id)
            .collect()
    }
}

struct Flattener<'s> {
    tables: &'s HashMap<String, SendTable>,
    excludes: Vec<(String, String)>,
}

impl<'s> Flattener<'s> {
    fn new(tables: &'s HashMap<String, SendTable>, root: &SendTable) -> ReadResult<Self> {
        let mut flattener = Flattener {
            tables,
            excludes: Vec::new(),
        };
        flattener.gather_excludes(root, 0)?;
        Ok(flattener)
    }

    fn table(&self, prop: &RawSendProp, depth: usize) -> ReadResult<&'s SendTable> {
        if depth > MAX_TABLE_DEPTH {
            return Err(ErrorKind::MalformedMessage(format!(
                "send table nesting too deep at {}",
                prop.name
            )));
        }
        let name = prop.table_name.as_deref().unwrap_or_default();
        self.tables
            .get(name)
            .ok_or_else(|| SchemaViolation::UnknownSendTable(name.to_string()).into())
    }

    fn gather_excludes(&mut self, table: &SendTable, depth: usize) -> ReadResult<()> {
        for prop in &table.props {
            if prop.is_excluded() {
                self.excludes
                    .push((prop.table_name.clone().unwrap_or_default(), prop.name.clone()));
            } else if prop.kind == SendPropType::DataTable {
                let sub = self.table(prop, depth + 1)?;
                self.gather_excludes(sub, depth + 1)?;
            }
        }
        Ok(())
    }

    fn is_excluded(&self, table: &str, prop: &str) -> bool {
        self.excludes.iter().any(|(t, p)| t == table && p == prop)
    }

    fn flatten(&self, root: &SendTable) -> ReadResult<Vec<PropertyDescriptor>> {
        let mut props = Vec::new();
        self.gather(root, &mut props, 0)?;

        // Changes-often props go first, by swapping rather than a stable
        // sort; entity deltas index into exactly this order.
        let mut start = 0;
        for index in 0..props.len() {
            if props[index].flags.contains(SendPropFlags::CHANGES_OFTEN) {
                props.swap(index, start);
                start += 1;
            }
        }
        Ok(props)
    }

    fn gather(&self, table: &SendTable, out: &mut Vec<PropertyDescriptor>, depth: usize) -> ReadResult<()> {
        let mut local = Vec::new();
        self.iterate(table, &mut local, out, depth)?;
        out.extend(local);
        Ok(())
    }

    fn iterate(
        &self,
        table: &SendTable,
        local: &mut Vec<PropertyDescriptor>,
        out: &mut Vec<PropertyDescriptor>,
        depth: usize,
    ) -> ReadResult<()> {
        for (index, prop) in table.props.iter().enumerate() {
            if prop.is_inside_array() || prop.is_excluded() || self.is_excluded(&table.name, &prop.name) {
                continue;
            }
            match prop.kind {
                SendPropType::DataTable => {
                    let sub = self.table(prop, depth + 1)?;
                    if prop.flags.contains(SendPropFlags::COLLAPSIBLE) {
                        self.iterate(sub, local, out, depth + 1)?;
                    } else {
                        self.gather(sub, out, depth + 1)?;
                    }
                }
                SendPropType::Array => {
                    let element = index
                        .checked_sub(1)
                        .and_then(|previous| table.props.get(previous))
                        .filter(|previous| previous.is_inside_array())
                        .ok_or_else(|| {
                            SchemaViolation::ArrayWithoutElement(format!("{}.{}", table.name, prop.name))
                        })?;
                    let mut descriptor = PropertyDescriptor::from_raw(&table.name, prop);
                    descriptor.element = Some(Box::new(PropertyDescriptor::from_raw(&table.name, element)));
                    local.push(descriptor);
                }
                _ => local.push(PropertyDescriptor::from_raw(&table.name, prop)),
            }
        }
        Ok(())
    }
}
