//! Stream function catalog
//!
//! Every stream function the GEM layer sends or understands is declared
//! here with its name, whether a reply is expected and the accepted body
//! shapes in SFDL.

use crate::data_items::DataItemCatalog;
use secs_codec::{Structure, parse_sfdl};
use secs_core::{Item, SecsError, SecsResult, Value};
use std::collections::HashMap;
use std::fmt;

/// Stream and function number pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamFunction {
    pub stream: u8,
    pub function: u8,
}

impl StreamFunction {
    pub const fn new(stream: u8, function: u8) -> Self {
        Self { stream, function }
    }

    /// Odd functions are primary messages
    pub fn is_primary(&self) -> bool {
        self.function % 2 == 1
    }

    /// The secondary answering this primary
    pub fn reply(&self) -> StreamFunction {
        Self::new(self.stream, self.function.wrapping_add(1))
    }

    /// Function 0 of this stream, the transaction abort
    pub fn abort(&self) -> StreamFunction {
        Self::new(self.stream, 0)
    }
}

impl fmt::Display for StreamFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}F{}", self.stream, self.function)
    }
}

/// Declaration of one stream function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionDefinition {
    pub stream_function: StreamFunction,
    pub name: String,
    /// Whether the primary is sent with the W-bit
    pub require_response: bool,
    /// Accepted body shapes; empty for header-only messages
    pub bodies: Vec<Structure>,
}

impl FunctionDefinition {
    pub fn new(stream: u8, function: u8, name: impl Into<String>, require_response: bool) -> Self {
        Self {
            stream_function: StreamFunction::new(stream, function),
            name: name.into(),
            require_response,
            bodies: Vec::new(),
        }
    }

    pub fn with_body(mut self, structure: Structure) -> Self {
        self.bodies.push(structure);
        self
    }

    pub fn has_body(&self) -> bool {
        !self.bodies.is_empty()
    }

    /// Function number of the expected reply
    pub fn reply_function(&self) -> Option<u8> {
        self.require_response
            .then(|| self.stream_function.reply().function)
    }

    /// Check a decoded body against the declared shapes
    pub fn validate(&self, item: Option<&Item>, items: &DataItemCatalog) -> SecsResult<()> {
        match (item, self.bodies.first()) {
            (None, None) => Ok(()),
            (Some(_), None) => Err(SecsError::Validation(format!(
                "{} ({}) has no body",
                self.stream_function, self.name
            ))),
            (None, Some(_)) => Err(SecsError::Validation(format!(
                "{} ({}) requires a body",
                self.stream_function, self.name
            ))),
            (Some(item), Some(_)) => {
                let mut first_error = None;
                for structure in &self.bodies {
                    match structure.validate(item, items) {
                        Ok(()) => return Ok(()),
                        Err(e) => {
                            first_error.get_or_insert(e);
                        }
                    }
                }
                Err(self.invalid(first_error))
            }
        }
    }

    /// Build a body from a generic value using the first shape that fits
    pub fn build(&self, value: &Value, items: &DataItemCatalog) -> SecsResult<Item> {
        let mut first_error = None;
        for structure in &self.bodies {
            match structure.build(value, items) {
                Ok(item) => return Ok(item),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        Err(self.invalid(first_error))
    }

    fn invalid(&self, cause: Option<SecsError>) -> SecsError {
        match cause {
            Some(e) => SecsError::Validation(format!("{} ({}): {}", self.stream_function, self.name, e)),
            None => SecsError::Validation(format!(
                "{} ({}) has no body",
                self.stream_function, self.name
            )),
        }
    }
}

impl fmt::Display for FunctionDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{} {}",
            self.stream_function,
            if self.require_response { " W" } else { "" },
            self.name
        )?;
        for body in &self.bodies {
            write!(f, "\n{}", body)?;
        }
        Ok(())
    }
}

const ONLINE_DATA: &str = "<L [2] <MDLN> <SOFTREV>>";
const EMPTY_LIST: &str = "<L [0]>";

/// Registry of stream functions keyed by stream and function
#[derive(Debug, Clone, Default)]
pub struct FunctionCatalog {
    functions: HashMap<StreamFunction, FunctionDefinition>,
    data_items: DataItemCatalog,
}

impl FunctionCatalog {
    pub fn new(data_items: DataItemCatalog) -> Self {
        Self {
            functions: HashMap::new(),
            data_items,
        }
    }

    /// The stream functions needed by the communication and control logic
    pub fn builtin() -> SecsResult<Self> {
        let mut catalog = Self::new(DataItemCatalog::builtin());
        catalog.define(1, 0, "Abort Transaction", false, &[])?;
        catalog.define(1, 1, "Are You There Request", true, &[])?;
        catalog.define(1, 2, "On Line Data", false, &[ONLINE_DATA, EMPTY_LIST])?;
        catalog.define(1, 3, "Selected Equipment Status Request", true, &["<L [SVID] <SVID>>"])?;
        catalog.define(1, 4, "Selected Equipment Status Data", false, &["<L [SV] <SV>>"])?;
        catalog.define(1, 13, "Establish Communications Request", true, &[ONLINE_DATA, EMPTY_LIST])?;
        catalog.define(
            1,
            14,
            "Establish Communications Request Acknowledge",
            false,
            &[
                "<L [2] <COMMACK> <L [2] <MDLN> <SOFTREV>>>",
                "<L [2] <COMMACK> <L [0]>>",
            ],
        )?;
        catalog.define(1, 15, "Request OFF-LINE", true, &[])?;
        catalog.define(1, 16, "OFF-LINE Acknowledge", false, &["<OFLACK>"])?;
        catalog.define(1, 17, "Request ON-LINE", true, &[])?;
        catalog.define(1, 18, "ON-LINE Acknowledge", false, &["<ONLACK>"])?;
        catalog.define(2, 0, "Abort Transaction", false, &[])?;
        catalog.define(5, 0, "Abort Transaction", false, &[])?;
        catalog.define(6, 0, "Abort Transaction", false, &[])?;
        catalog.define(
            6,
            11,
            "Event Report Send",
            true,
            &["<L [3] <DATAID> <CEID> <L [REPORTS] <L [2] <RPTID> <L [VALUES] <V>>>>>"],
        )?;
        catalog.define(6, 12, "Event Report Acknowledge", false, &["<ACKC6>"])?;
        catalog.define(9, 1, "Unrecognized Device ID", false, &["<MHEAD>"])?;
        catalog.define(9, 3, "Unrecognized Stream Type", false, &["<MHEAD>"])?;
        catalog.define(9, 5, "Unrecognized Function Type", false, &["<MHEAD>"])?;
        catalog.define(9, 7, "Illegal Data", false, &["<MHEAD>"])?;
        catalog.define(9, 9, "Transaction Timer Timeout", false, &["<SHEAD>"])?;
        catalog.define(9, 11, "Data Too Long", false, &["<MHEAD>"])?;
        Ok(catalog)
    }

    /// Declare a stream function from SFDL body definitions
    pub fn define(
        &mut self,
        stream: u8,
        function: u8,
        name: &str,
        require_response: bool,
        bodies: &[&str],
    ) -> SecsResult<()> {
        let mut definition = FunctionDefinition::new(stream, function, name, require_response);
        for text in bodies {
            definition = definition.with_body(parse_sfdl(text, &self.data_items)?);
        }
        self.register(definition);
        Ok(())
    }

    /// Add or replace a definition
    pub fn register(&mut self, definition: FunctionDefinition) {
        self.functions.insert(definition.stream_function, definition);
    }

    pub fn lookup(&self, stream: u8, function: u8) -> Option<&FunctionDefinition> {
        self.functions.get(&StreamFunction::new(stream, function))
    }

    /// Whether any function of `stream` is declared
    pub fn knows_stream(&self, stream: u8) -> bool {
        self.functions.keys().any(|sf| sf.stream == stream)
    }

    pub fn data_items(&self) -> &DataItemCatalog {
        &self.data_items
    }

    pub fn data_items_mut(&mut self) -> &mut DataItemCatalog {
        &mut self.data_items
    }

    /// Validate a body; undeclared functions pass unchecked
    pub fn validate(&self, stream: u8, function: u8, item: Option<&Item>) -> SecsResult<()> {
        match self.lookup(stream, function) {
            Some(definition) => definition.validate(item, &self.data_items),
            None => Ok(()),
        }
    }

    /// Build the body of a declared function from a generic value
    pub fn build(&self, stream: u8, function: u8, value: &Value) -> SecsResult<Item> {
        self.lookup(stream, function)
            .ok_or_else(|| {
                SecsError::InvalidData(format!("{} is not declared", StreamFunction::new(stream, function)))
            })?
            .build(value, &self.data_items)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}
