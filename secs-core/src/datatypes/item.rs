//! SECS-II item: the typed value node carried in message bodies

use crate::datatypes::kind::ItemKind;
use crate::datatypes::value::Value;
use crate::error::{SecsError, SecsResult};
use serde::{Deserialize, Serialize};

/// A SECS-II data item
///
/// A list holds child items of arbitrary depth; every other kind holds a
/// flat array of values of that kind (a "scalar" is an array of length 1).
///
/// Variants are public so items can be pattern matched. The checked
/// constructors (`ascii`, `from_ints`, `from_value`, ...) are the way to
/// build items from untrusted input; `validate` re-checks an item built by
/// hand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Item {
    List(Vec<Item>),
    Binary(#[serde(with = "serde_bytes")] Vec<u8>),
    Boolean(Vec<bool>),
    /// 7-bit ASCII bytes
    Ascii(#[serde(with = "serde_bytes")] Vec<u8>),
    /// JIS-8 bytes
    Jis8(#[serde(with = "serde_bytes")] Vec<u8>),
    I1(Vec<i8>),
    I2(Vec<i16>),
    I4(Vec<i32>),
    I8(Vec<i64>),
    U1(Vec<u8>),
    U2(Vec<u16>),
    U4(Vec<u32>),
    U8(Vec<u64>),
    F4(Vec<f32>),
    F8(Vec<f64>),
}

impl Item {
    /// Get the kind of this item
    pub fn kind(&self) -> ItemKind {
        match self {
            Item::List(_) => ItemKind::List,
            Item::Binary(_) => ItemKind::Binary,
            Item::Boolean(_) => ItemKind::Boolean,
            Item::Ascii(_) => ItemKind::Ascii,
            Item::Jis8(_) => ItemKind::Jis8,
            Item::I1(_) => ItemKind::I1,
            Item::I2(_) => ItemKind::I2,
            Item::I4(_) => ItemKind::I4,
            Item::I8(_) => ItemKind::I8,
            Item::U1(_) => ItemKind::U1,
            Item::U2(_) => ItemKind::U2,
            Item::U4(_) => ItemKind::U4,
            Item::U8(_) => ItemKind::U8,
            Item::F4(_) => ItemKind::F4,
            Item::F8(_) => ItemKind::F8,
        }
    }

    /// Number of children (list) or elements (everything else)
    pub fn len(&self) -> usize {
        match self {
            Item::List(v) => v.len(),
            Item::Binary(v) | Item::Ascii(v) | Item::Jis8(v) | Item::U1(v) => v.len(),
            Item::Boolean(v) => v.len(),
            Item::I1(v) => v.len(),
            Item::I2(v) => v.len(),
            Item::I4(v) => v.len(),
            Item::I8(v) => v.len(),
            Item::U2(v) => v.len(),
            Item::U4(v) => v.len(),
            Item::U8(v) => v.len(),
            Item::F4(v) => v.len(),
            Item::F8(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Constructs a list item
    pub fn list(items: Vec<Item>) -> Self {
        Item::List(items)
    }

    /// Constructs a binary item
    pub fn binary(bytes: impl Into<Vec<u8>>) -> Self {
        Item::Binary(bytes.into())
    }

    /// Constructs a single-element boolean item
    pub fn boolean(value: bool) -> Self {
        Item::Boolean(vec![value])
    }

    /// Constructs an ASCII item
    ///
    /// # Errors
    ///
    /// Returns a validation error if any byte is above 127
    pub fn ascii(text: impl AsRef<[u8]>) -> SecsResult<Self> {
        let bytes = text.as_ref();
        check_ascii(bytes)?;
        Ok(Item::Ascii(bytes.to_vec()))
    }

    /// Constructs a JIS-8 item
    pub fn jis8(bytes: impl Into<Vec<u8>>) -> Self {
        Item::Jis8(bytes.into())
    }

    pub fn u1(value: u8) -> Self {
        Item::U1(vec![value])
    }

    pub fn u2(value: u16) -> Self {
        Item::U2(vec![value])
    }

    pub fn u4(value: u32) -> Self {
        Item::U4(vec![value])
    }

    pub fn i4(value: i32) -> Self {
        Item::I4(vec![value])
    }

    /// Constructs an array item of an integral kind from wide integers
    ///
    /// Works for every kind with an integer range (binary, boolean, text
    /// bytes and the I/U kinds) and for the float kinds.
    ///
    /// # Errors
    ///
    /// Returns a validation error naming the first value outside the kind's
    /// range, or if `kind` is a list.
    pub fn from_ints(kind: ItemKind, values: &[i128]) -> SecsResult<Self> {
        for value in values {
            kind.check_integer(*value)?;
        }

        // Ranges are checked above, the narrowing casts are lossless
        let item = match kind {
            ItemKind::List => {
                return Err(SecsError::Validation(
                    "a list can't be built from integers".to_string(),
                ));
            }
            ItemKind::Binary => Item::Binary(values.iter().map(|v| *v as u8).collect()),
            ItemKind::Boolean => Item::Boolean(values.iter().map(|v| *v != 0).collect()),
            ItemKind::Ascii => Item::Ascii(values.iter().map(|v| *v as u8).collect()),
            ItemKind::Jis8 => Item::Jis8(values.iter().map(|v| *v as u8).collect()),
            ItemKind::I1 => Item::I1(values.iter().map(|v| *v as i8).collect()),
            ItemKind::I2 => Item::I2(values.iter().map(|v| *v as i16).collect()),
            ItemKind::I4 => Item::I4(values.iter().map(|v| *v as i32).collect()),
            ItemKind::I8 => Item::I8(values.iter().map(|v| *v as i64).collect()),
            ItemKind::U1 => Item::U1(values.iter().map(|v| *v as u8).collect()),
            ItemKind::U2 => Item::U2(values.iter().map(|v| *v as u16).collect()),
            ItemKind::U4 => Item::U4(values.iter().map(|v| *v as u32).collect()),
            ItemKind::U8 => Item::U8(values.iter().map(|v| *v as u64).collect()),
            ItemKind::F4 => Item::F4(values.iter().map(|v| *v as f32).collect()),
            ItemKind::F8 => Item::F8(values.iter().map(|v| *v as f64).collect()),
        };
        Ok(item)
    }

    /// Constructs an F4 or F8 item
    ///
    /// # Errors
    ///
    /// Returns a validation error if `kind` is not a float kind or a value
    /// doesn't fit into F4
    pub fn from_floats(kind: ItemKind, values: &[f64]) -> SecsResult<Self> {
        for value in values {
            kind.check_float(*value)?;
        }
        match kind {
            ItemKind::F4 => Ok(Item::F4(values.iter().map(|v| *v as f32).collect())),
            ItemKind::F8 => Ok(Item::F8(values.to_vec())),
            _ => Err(SecsError::Validation(format!(
                "{} can't be built from floating point values",
                kind
            ))),
        }
    }

    /// Infer an item from a generic value tree
    ///
    /// - list: `L`, children inferred recursively
    /// - bool: `BOOLEAN`
    /// - bytes: `B`
    /// - text: `A` (must be 7-bit)
    /// - int: the narrowest fitting kind, `U1`, `U2`, `U4`, `U8` for
    ///   non-negative values and `I1`, `I2`, `I4`, `I8` for negative ones
    /// - float: `F4` when the value survives the round trip through `f32`,
    ///   `F8` otherwise
    pub fn from_value(value: &Value) -> SecsResult<Self> {
        match value {
            Value::List(values) => Ok(Item::List(
                values.iter().map(Item::from_value).collect::<SecsResult<_>>()?,
            )),
            Value::Bool(b) => Ok(Item::Boolean(vec![*b])),
            Value::Bytes(bytes) => Ok(Item::Binary(bytes.clone())),
            Value::Text(text) => Item::ascii(text),
            Value::Int(int) => {
                let candidates: &[ItemKind] = if *int >= 0 {
                    &[ItemKind::U1, ItemKind::U2, ItemKind::U4, ItemKind::U8]
                } else {
                    &[ItemKind::I1, ItemKind::I2, ItemKind::I4, ItemKind::I8]
                };
                let kind = candidates
                    .iter()
                    .copied()
                    .find(|kind| kind.check_integer(*int).is_ok())
                    .unwrap_or(candidates[candidates.len() - 1]);
                Item::from_ints(kind, &[*int])
            }
            Value::Float(float) => {
                if float.is_nan() || (*float as f32) as f64 == *float {
                    Ok(Item::F4(vec![*float as f32]))
                } else {
                    Ok(Item::F8(vec![*float]))
                }
            }
        }
    }

    /// Build an item of a declared kind from a generic value
    ///
    /// A scalar value becomes a one-element array, a list of scalars becomes
    /// an array. For `L` every child is inferred with [`Item::from_value`].
    /// Text and bytes fill the byte-oriented kinds directly.
    pub fn with_kind(kind: ItemKind, value: &Value) -> SecsResult<Self> {
        if kind == ItemKind::List {
            return match value {
                Value::List(_) => Item::from_value(value),
                other => Err(invalid_for_kind(other, kind)),
            };
        }

        match (kind, value) {
            (ItemKind::Ascii, Value::Text(text)) => return Item::ascii(text),
            (ItemKind::Ascii, Value::Bytes(bytes)) => return Item::ascii(bytes),
            (ItemKind::Jis8, Value::Text(text)) => return Ok(Item::Jis8(text.as_bytes().to_vec())),
            (ItemKind::Jis8 | ItemKind::Binary | ItemKind::U1, Value::Bytes(bytes)) => {
                return Item::from_ints(kind, &bytes.iter().map(|b| *b as i128).collect::<Vec<_>>());
            }
            _ => {}
        }

        let scalars: Vec<&Value> = match value {
            Value::List(values) => values.iter().collect(),
            other => vec![other],
        };

        if kind.is_float() {
            let mut floats = Vec::with_capacity(scalars.len());
            for scalar in scalars {
                match scalar {
                    Value::Float(f) => floats.push(*f),
                    Value::Int(i) => floats.push(*i as f64),
                    other => return Err(invalid_for_kind(other, kind)),
                }
            }
            return Item::from_floats(kind, &floats);
        }

        let mut ints = Vec::with_capacity(scalars.len());
        for scalar in scalars {
            match scalar {
                Value::Int(i) => ints.push(*i),
                Value::Bool(b) => ints.push(*b as i128),
                other => return Err(invalid_for_kind(other, kind)),
            }
        }
        Item::from_ints(kind, &ints)
    }

    /// Re-check every element against its kind's range
    ///
    /// Only ASCII can hold out-of-range bytes, every other variant is bounded
    /// by its element type.
    pub fn validate(&self) -> SecsResult<()> {
        match self {
            Item::Ascii(bytes) => check_ascii(bytes),
            Item::List(items) => items.iter().try_for_each(Item::validate),
            _ => Ok(()),
        }
    }

    /// Children of a list item
    pub fn as_list(&self) -> Option<&[Item]> {
        match self {
            Item::List(items) => Some(items),
            _ => None,
        }
    }

    /// Child of a list item by index
    pub fn get(&self, index: usize) -> Option<&Item> {
        self.as_list().and_then(|items| items.get(index))
    }

    /// Raw bytes of the byte-oriented kinds (B, A, J, U1)
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Item::Binary(b) | Item::Ascii(b) | Item::Jis8(b) | Item::U1(b) => Some(b),
            _ => None,
        }
    }

    /// Text of an A or J item
    pub fn as_str(&self) -> Option<String> {
        match self {
            Item::Ascii(b) | Item::Jis8(b) => Some(String::from_utf8_lossy(b).into_owned()),
            _ => None,
        }
    }

    /// Elements of an integral item widened to `i128`
    pub fn as_ints(&self) -> Option<Vec<i128>> {
        let ints = match self {
            Item::Binary(v) | Item::U1(v) => v.iter().map(|x| *x as i128).collect(),
            Item::Boolean(v) => v.iter().map(|x| *x as i128).collect(),
            Item::I1(v) => v.iter().map(|x| *x as i128).collect(),
            Item::I2(v) => v.iter().map(|x| *x as i128).collect(),
            Item::I4(v) => v.iter().map(|x| *x as i128).collect(),
            Item::I8(v) => v.iter().map(|x| *x as i128).collect(),
            Item::U2(v) => v.iter().map(|x| *x as i128).collect(),
            Item::U4(v) => v.iter().map(|x| *x as i128).collect(),
            Item::U8(v) => v.iter().map(|x| *x as i128).collect(),
            _ => return None,
        };
        Some(ints)
    }

    /// First element of an integral item
    ///
    /// Convenient for the many single-value acknowledge codes (COMMACK,
    /// ONLACK, ...).
    pub fn first_int(&self) -> Option<i128> {
        self.as_ints().and_then(|ints| ints.first().copied())
    }

    /// Elements of a float item
    pub fn as_floats(&self) -> Option<Vec<f64>> {
        match self {
            Item::F4(v) => Some(v.iter().map(|x| *x as f64).collect()),
            Item::F8(v) => Some(v.clone()),
            _ => None,
        }
    }

    /// Convert back into a generic value tree
    ///
    /// Single-element arrays become scalars, everything else a list.
    pub fn to_value(&self) -> Value {
        fn collapse(mut values: Vec<Value>) -> Value {
            if values.len() == 1 {
                values.remove(0)
            } else {
                Value::List(values)
            }
        }

        match self {
            Item::List(items) => Value::List(items.iter().map(Item::to_value).collect()),
            Item::Binary(bytes) => Value::Bytes(bytes.clone()),
            Item::Ascii(_) | Item::Jis8(_) => Value::Text(self.as_str().unwrap_or_default()),
            Item::Boolean(v) => collapse(v.iter().map(|b| Value::Bool(*b)).collect()),
            Item::F4(_) | Item::F8(_) => collapse(
                self.as_floats()
                    .unwrap_or_default()
                    .into_iter()
                    .map(Value::Float)
                    .collect(),
            ),
            _ => collapse(
                self.as_ints()
                    .unwrap_or_default()
                    .into_iter()
                    .map(Value::Int)
                    .collect(),
            ),
        }
    }
}

fn check_ascii(bytes: &[u8]) -> SecsResult<()> {
    match bytes.iter().find(|b| **b > 127) {
        Some(b) => ItemKind::Ascii.check_integer(*b as i128),
        None => Ok(()),
    }
}

fn invalid_for_kind(value: &Value, kind: ItemKind) -> SecsError {
    SecsError::Validation(format!(
        "{} value {:?} can't be stored in {}",
        value.type_name(),
        value,
        kind
    ))
}
