//! SECS-II item kinds, format codes and value ranges

use crate::error::{SecsError, SecsResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a SECS-II item
///
/// The discriminant is the 6-bit format code as transmitted in the top bits
/// of the item header byte (octal notation in SEMI E5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ItemKind {
    List = 0o00,
    Binary = 0o10,
    Boolean = 0o11,
    Ascii = 0o20,
    Jis8 = 0o21,
    I8 = 0o30,
    I1 = 0o31,
    I2 = 0o32,
    I4 = 0o34,
    F8 = 0o40,
    F4 = 0o44,
    U8 = 0o50,
    U1 = 0o51,
    U2 = 0o52,
    U4 = 0o54,
}

impl ItemKind {
    /// Every kind, in format code order
    pub const ALL: [ItemKind; 15] = [
        ItemKind::List,
        ItemKind::Binary,
        ItemKind::Boolean,
        ItemKind::Ascii,
        ItemKind::Jis8,
        ItemKind::I8,
        ItemKind::I1,
        ItemKind::I2,
        ItemKind::I4,
        ItemKind::F8,
        ItemKind::F4,
        ItemKind::U8,
        ItemKind::U1,
        ItemKind::U2,
        ItemKind::U4,
    ];

    /// Get the format code
    pub fn format_code(self) -> u8 {
        self as u8
    }

    /// Get the kind for a format code
    pub fn from_format_code(code: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.format_code() == code)
    }

    /// Name used in SML text (`L`, `B`, `BOOLEAN`, `A`, `J`, `I1`, ...)
    pub fn sml_name(self) -> &'static str {
        match self {
            ItemKind::List => "L",
            ItemKind::Binary => "B",
            ItemKind::Boolean => "BOOLEAN",
            ItemKind::Ascii => "A",
            ItemKind::Jis8 => "J",
            ItemKind::I8 => "I8",
            ItemKind::I1 => "I1",
            ItemKind::I2 => "I2",
            ItemKind::I4 => "I4",
            ItemKind::F8 => "F8",
            ItemKind::F4 => "F4",
            ItemKind::U8 => "U8",
            ItemKind::U1 => "U1",
            ItemKind::U2 => "U2",
            ItemKind::U4 => "U4",
        }
    }

    /// Look up a kind by its SML name (case-insensitive)
    pub fn from_sml_name(name: &str) -> Option<Self> {
        let upper = name.to_ascii_uppercase();
        Self::ALL.iter().copied().find(|kind| kind.sml_name() == upper)
    }

    /// Width in bytes of one element, `None` for lists
    pub fn element_size(self) -> Option<usize> {
        match self {
            ItemKind::List => None,
            ItemKind::Binary | ItemKind::Boolean | ItemKind::Ascii | ItemKind::Jis8 => Some(1),
            ItemKind::I1 | ItemKind::U1 => Some(1),
            ItemKind::I2 | ItemKind::U2 => Some(2),
            ItemKind::I4 | ItemKind::U4 | ItemKind::F4 => Some(4),
            ItemKind::I8 | ItemKind::U8 | ItemKind::F8 => Some(8),
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            ItemKind::I1
                | ItemKind::I2
                | ItemKind::I4
                | ItemKind::I8
                | ItemKind::U1
                | ItemKind::U2
                | ItemKind::U4
                | ItemKind::U8
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, ItemKind::F4 | ItemKind::F8)
    }

    pub fn is_text(self) -> bool {
        matches!(self, ItemKind::Ascii | ItemKind::Jis8)
    }

    /// Closed integer range of one element
    ///
    /// Defined for every kind whose elements are integral (binary, boolean,
    /// text bytes and the integer kinds). Lists and floats return `None`.
    pub fn integer_range(self) -> Option<(i128, i128)> {
        match self {
            ItemKind::Binary | ItemKind::Jis8 | ItemKind::U1 => Some((0, u8::MAX as i128)),
            ItemKind::Boolean => Some((0, 1)),
            ItemKind::Ascii => Some((0, 127)),
            ItemKind::I1 => Some((i8::MIN as i128, i8::MAX as i128)),
            ItemKind::I2 => Some((i16::MIN as i128, i16::MAX as i128)),
            ItemKind::I4 => Some((i32::MIN as i128, i32::MAX as i128)),
            ItemKind::I8 => Some((i64::MIN as i128, i64::MAX as i128)),
            ItemKind::U2 => Some((0, u16::MAX as i128)),
            ItemKind::U4 => Some((0, u32::MAX as i128)),
            ItemKind::U8 => Some((0, u64::MAX as i128)),
            ItemKind::List | ItemKind::F4 | ItemKind::F8 => None,
        }
    }

    /// Verify an integral value against the kind's range
    pub fn check_integer(self, value: i128) -> SecsResult<()> {
        match self.integer_range() {
            Some((min, max)) if value >= min && value <= max => Ok(()),
            Some((min, max)) => Err(out_of_range(value, self, min, max)),
            None if self.is_float() => self.check_float(value as f64),
            None => Err(SecsError::Validation(format!(
                "{} can't hold the integer value {}",
                self, value
            ))),
        }
    }

    /// Verify a floating point value against the kind's range
    ///
    /// NaN and the infinities are representable in both float kinds; finite
    /// values beyond `f32::MAX` don't fit into F4.
    pub fn check_float(self, value: f64) -> SecsResult<()> {
        match self {
            ItemKind::F8 => Ok(()),
            ItemKind::F4 if !value.is_finite() || value.abs() <= f32::MAX as f64 => Ok(()),
            ItemKind::F4 => Err(out_of_range(value, self, f32::MIN, f32::MAX)),
            _ => Err(SecsError::Validation(format!(
                "{} can't hold the floating point value {}",
                self, value
            ))),
        }
    }
}

fn out_of_range(value: impl fmt::Display, kind: ItemKind, min: impl fmt::Display, max: impl fmt::Display) -> SecsError {
    SecsError::Validation(format!(
        "value {} out of range for {} ({} to {})",
        value, kind, min, max
    ))
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sml_name())
    }
}
