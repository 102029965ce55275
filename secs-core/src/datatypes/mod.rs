//! SECS-II data model

pub mod item;
pub mod kind;
pub mod value;

pub use item::Item;
pub use kind::ItemKind;
pub use value::Value;
