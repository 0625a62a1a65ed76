//! SchemaRegistry - handler ごとの output スキーマの登録と参照
//!
//! # 設計
//! - 起動時に構築（mutable）
//! - 実行時は Arc 越しに共有（immutable）
//!
//! ロック不要で、並行する dispatch から同時に読めます。

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use super::constraint::Constraint;
use crate::domain::errors::RegistryError;

/// Output schema of one handler.
#[derive(Debug, Clone)]
pub struct HandlerSchema {
    pub handler_name: String,

    /// Ordered so missing-field reports are deterministic.
    pub required_fields: BTreeSet<String>,

    /// Checked in field-name order; the first violation wins.
    pub field_constraints: BTreeMap<String, Constraint>,
}

impl HandlerSchema {
    pub fn new(handler_name: impl Into<String>) -> Self {
        Self {
            handler_name: handler_name.into(),
            required_fields: BTreeSet::new(),
            field_constraints: BTreeMap::new(),
        }
    }

    pub fn require(mut self, field: impl Into<String>) -> Self {
        self.required_fields.insert(field.into());
        self
    }

    pub fn constrain(mut self, field: impl Into<String>, constraint: Constraint) -> Self {
        self.field_constraints.insert(field.into(), constraint);
        self
    }

    /// `"a, b, c"`, as used in clarifying notes.
    pub fn required_fields_list(&self) -> String {
        self.required_fields
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// SchemaRegistry は handler_name → HandlerSchema を管理
///
/// # 使用例
/// ```ignore
/// let mut registry = SchemaRegistry::new();
/// registry.register("code-analyzer", ["complexity_metrics", "recommendations"], [])?;
/// let schema = registry.lookup("code-analyzer")?;
/// ```
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, Arc<HandlerSchema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self {
            schemas: HashMap::new(),
        }
    }

    pub fn register<F, C, K>(
        &mut self,
        handler_name: impl Into<String>,
        required_fields: F,
        field_constraints: C,
    ) -> Result<(), RegistryError>
    where
        F: IntoIterator,
        F::Item: Into<String>,
        C: IntoIterator<Item = (K, Constraint)>,
        K: Into<String>,
    {
        let schema = HandlerSchema {
            handler_name: handler_name.into(),
            required_fields: required_fields.into_iter().map(Into::into).collect(),
            field_constraints: field_constraints
                .into_iter()
                .map(|(k, c)| (k.into(), c))
                .collect(),
        };
        self.register_schema(schema)
    }

    pub fn register_schema(&mut self, schema: HandlerSchema) -> Result<(), RegistryError> {
        if self.schemas.contains_key(&schema.handler_name) {
            return Err(RegistryError::DuplicateHandler(schema.handler_name));
        }
        self.schemas
            .insert(schema.handler_name.clone(), Arc::new(schema));
        Ok(())
    }

    pub fn lookup(&self, handler_name: &str) -> Result<Arc<HandlerSchema>, RegistryError> {
        self.schemas
            .get(handler_name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownHandler(handler_name.to_string()))
    }

    pub fn contains(&self, handler_name: &str) -> bool {
        self.schemas.contains_key(handler_name)
    }

    /// Sorted.
    pub fn handler_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.schemas.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}
