//! Declarative message body structures

use secs_core::{Item, ItemKind, SecsError, SecsResult, Value};
use std::collections::HashMap;
use std::fmt;

/// Resolves data item names used in structures
pub trait DataItemLookup {
    /// Allowed kinds of a named data item, preferred kind first
    fn kinds_of(&self, name: &str) -> Option<Vec<ItemKind>>;
}

impl DataItemLookup for HashMap<String, Vec<ItemKind>> {
    fn kinds_of(&self, name: &str) -> Option<Vec<ItemKind>> {
        self.get(name).cloned()
    }
}

/// Shape of a stream function body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Structure {
    /// A single data item placeholder, e.g. `<MDLN>`
    DataItem(String),
    /// Fixed list, one entry per child
    List(Vec<Structure>),
    /// List of any length whose entries all have the shape of `element`
    OpenList { name: String, element: Box<Structure> },
}

impl Structure {
    /// Check that `item` has this shape
    pub fn validate(&self, item: &Item, items: &dyn DataItemLookup) -> SecsResult<()> {
        match self {
            Structure::DataItem(name) => {
                let kinds = lookup(items, name)?;
                let accepted = kinds.contains(&item.kind())
                    || (item.kind() == ItemKind::List && kinds.contains(&ItemKind::List));
                if accepted {
                    Ok(())
                } else {
                    Err(SecsError::Validation(format!(
                        "{} expects one of {}, got {}",
                        name,
                        join_kinds(&kinds),
                        item.kind()
                    )))
                }
            }
            Structure::List(children) => {
                let list = expect_list(item)?;
                if list.len() != children.len() {
                    return Err(SecsError::Validation(format!(
                        "list of {} items expected, got {}",
                        children.len(),
                        list.len()
                    )));
                }
                children
                    .iter()
                    .zip(list)
                    .try_for_each(|(child, entry)| child.validate(entry, items))
            }
            Structure::OpenList { element, .. } => expect_list(item)?
                .iter()
                .try_for_each(|entry| element.validate(entry, items)),
        }
    }

    /// Build an item of this shape from a generic value
    ///
    /// Data items try their allowed kinds in order and take the first one
    /// the value fits into.
    pub fn build(&self, value: &Value, items: &dyn DataItemLookup) -> SecsResult<Item> {
        match self {
            Structure::DataItem(name) => {
                let kinds = lookup(items, name)?;
                let mut first_error = None;
                for kind in kinds {
                    match Item::with_kind(kind, value) {
                        Ok(item) => return Ok(item),
                        Err(e) => {
                            first_error.get_or_insert(e);
                        }
                    }
                }
                Err(first_error.unwrap_or_else(|| {
                    SecsError::Validation(format!("data item {} has no kinds", name))
                }))
            }
            Structure::List(children) => {
                let values = value_list(value)?;
                if values.len() != children.len() {
                    return Err(SecsError::Validation(format!(
                        "list of {} values expected, got {}",
                        children.len(),
                        values.len()
                    )));
                }
                Ok(Item::List(
                    children
                        .iter()
                        .zip(values)
                        .map(|(child, v)| child.build(v, items))
                        .collect::<SecsResult<_>>()?,
                ))
            }
            Structure::OpenList { element, .. } => Ok(Item::List(
                value_list(value)?
                    .iter()
                    .map(|v| element.build(v, items))
                    .collect::<SecsResult<_>>()?,
            )),
        }
    }

    /// Names of all data items referenced, depth first
    pub fn data_items(&self) -> Vec<&str> {
        match self {
            Structure::DataItem(name) => vec![name.as_str()],
            Structure::List(children) => children.iter().flat_map(Structure::data_items).collect(),
            Structure::OpenList { element, .. } => element.data_items(),
        }
    }

    fn write(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        let pad = " ".repeat(indent);
        match self {
            Structure::DataItem(name) => write!(f, "{}<{}>", pad, name),
            Structure::List(children) if children.is_empty() => write!(f, "{}<L>", pad),
            Structure::List(children) => {
                writeln!(f, "{}<L", pad)?;
                for child in children {
                    child.write(f, indent + 2)?;
                    writeln!(f)?;
                }
                write!(f, "{}>", pad)
            }
            Structure::OpenList { name, element } => {
                writeln!(f, "{}<L [{}]", pad, name)?;
                element.write(f, indent + 2)?;
                writeln!(f)?;
                write!(f, "{}>", pad)
            }
        }
    }
}

impl fmt::Display for Structure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write(f, 0)
    }
}

fn lookup(items: &dyn DataItemLookup, name: &str) -> SecsResult<Vec<ItemKind>> {
    items
        .kinds_of(name)
        .ok_or_else(|| SecsError::Validation(format!("unknown data item {}", name)))
}

fn expect_list(item: &Item) -> SecsResult<&[Item]> {
    item.as_list()
        .ok_or_else(|| SecsError::Validation(format!("list expected, got {}", item.kind())))
}

fn value_list(value: &Value) -> SecsResult<&[Value]> {
    value.as_list().ok_or_else(|| {
        SecsError::Validation(format!("list value expected, got {}", value.type_name()))
    })
}

fn join_kinds(kinds: &[ItemKind]) -> String {
    kinds
        .iter()
        .map(ItemKind::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
