//! Schema - handler ごとの output スキーマ
//!
//! - **registry**: handler_name → HandlerSchema
//! - **constraint**: フィールド値に対する述語

pub mod constraint;
pub mod registry;

pub use self::constraint::Constraint;
pub use self::registry::{HandlerSchema, SchemaRegistry};
