pub mod entity;
pub mod record;

pub use entity::{EntityDef, EntityKind, FieldDef, FieldDefault, FieldType};
pub use record::{FieldValue, Record};
