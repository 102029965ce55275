//! Data item catalog
//!
//! A data item names a field of a stream function body together with the
//! item kinds it may be sent as. Structure definitions refer to data items by
//! name; the catalog resolves them.

use secs_codec::DataItemLookup;
use secs_core::ItemKind;
use std::collections::HashMap;

/// Kinds used by identifiers such as SVID, CEID or RPTID
const ID_KINDS: &[ItemKind] = &[
    ItemKind::U4,
    ItemKind::U1,
    ItemKind::U2,
    ItemKind::U8,
    ItemKind::I1,
    ItemKind::I2,
    ItemKind::I4,
    ItemKind::I8,
    ItemKind::Ascii,
];

/// Kinds accepted by free-form values such as SV or V
const ANY_KINDS: &[ItemKind] = &[
    ItemKind::List,
    ItemKind::Ascii,
    ItemKind::Binary,
    ItemKind::Boolean,
    ItemKind::Jis8,
    ItemKind::U4,
    ItemKind::U1,
    ItemKind::U2,
    ItemKind::U8,
    ItemKind::I4,
    ItemKind::I1,
    ItemKind::I2,
    ItemKind::I8,
    ItemKind::F8,
    ItemKind::F4,
];

/// COMMACK values (S1F14)
pub mod commack {
    pub const ACCEPTED: u8 = 0;
    pub const DENIED: u8 = 1;
}

/// OFLACK values (S1F16)
pub mod oflack {
    pub const ACKNOWLEDGE: u8 = 0;
}

/// ONLACK values (S1F18)
pub mod onlack {
    pub const ACCEPTED: u8 = 0;
    pub const NOT_ALLOWED: u8 = 1;
    pub const ALREADY_ONLINE: u8 = 2;
}

/// ACKC6 values (S6F12)
pub mod ackc6 {
    pub const ACCEPTED: u8 = 0;
}

/// A named body field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataItemDefinition {
    pub name: String,
    /// Allowed kinds, preferred kind first
    pub kinds: Vec<ItemKind>,
    pub description: String,
}

impl DataItemDefinition {
    pub fn new(name: impl Into<String>, kinds: &[ItemKind], description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kinds: kinds.to_vec(),
            description: description.into(),
        }
    }

    pub fn accepts(&self, kind: ItemKind) -> bool {
        self.kinds.contains(&kind)
    }
}

/// Registry of data items by name
#[derive(Debug, Clone, Default)]
pub struct DataItemCatalog {
    items: HashMap<String, DataItemDefinition>,
}

impl DataItemCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// The data items used by the built-in stream functions
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        let entries: [(&str, &[ItemKind], &str); 14] = [
            ("MDLN", &[ItemKind::Ascii], "equipment model type"),
            ("SOFTREV", &[ItemKind::Ascii], "software revision"),
            ("COMMACK", &[ItemKind::Binary], "establish communications acknowledge"),
            ("OFLACK", &[ItemKind::Binary], "offline acknowledge"),
            ("ONLACK", &[ItemKind::Binary], "online acknowledge"),
            ("ACKC6", &[ItemKind::Binary], "event report acknowledge"),
            ("MHEAD", &[ItemKind::Binary], "header of the offending message"),
            ("SHEAD", &[ItemKind::Binary], "header of the timed out message"),
            ("SVID", ID_KINDS, "status variable id"),
            ("SV", ANY_KINDS, "status variable value"),
            ("DATAID", ID_KINDS, "data id"),
            ("CEID", ID_KINDS, "collection event id"),
            ("RPTID", ID_KINDS, "report id"),
            ("V", ANY_KINDS, "variable data"),
        ];
        for (name, kinds, description) in entries {
            catalog.register(DataItemDefinition::new(name, kinds, description));
        }
        catalog
    }

    /// Add or replace a definition
    pub fn register(&mut self, definition: DataItemDefinition) {
        self.items.insert(definition.name.clone(), definition);
    }

    pub fn lookup(&self, name: &str) -> Option<&DataItemDefinition> {
        self.items.get(name)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl DataItemLookup for DataItemCatalog {
    fn kinds_of(&self, name: &str) -> Option<Vec<ItemKind>> {
        self.lookup(name).map(|definition| definition.kinds.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookup() {
        let catalog = DataItemCatalog::builtin();
        let mdln = catalog.lookup("MDLN").unwrap();
        assert_eq!(mdln.kinds, vec![ItemKind::Ascii]);
        assert!(catalog.lookup("CEID").unwrap().accepts(ItemKind::U2));
        assert!(catalog.lookup("V").unwrap().accepts(ItemKind::List));
        assert!(catalog.lookup("NOPE").is_none());
        assert_eq!(catalog.kinds_of("COMMACK"), Some(vec![ItemKind::Binary]));
    }

    #[test]
    fn test_register_replaces() {
        let mut catalog = DataItemCatalog::builtin();
        let before = catalog.len();
        catalog.register(DataItemDefinition::new("MDLN", &[ItemKind::Jis8], "custom"));
        catalog.register(DataItemDefinition::new("PPID", &[ItemKind::Ascii], "process program id"));
        assert_eq!(catalog.len(), before + 1);
        assert_eq!(catalog.lookup("MDLN").unwrap().kinds, vec![ItemKind::Jis8]);
    }
}
