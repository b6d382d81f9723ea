use std::{fmt, sync::Arc};

use indexmap::IndexSet;
use query_expr::{Record, Value};
use serde::ser::SerializeMap;

use crate::{ConfigurationError, ConfigurationResult};

/// Row type of the data source: an ordered list of fields, some of which make up
/// the identity of a row.
#[derive(Debug, PartialEq, Eq)]
pub struct EntityDefinition {
    name: Arc<str>,
    fields: IndexSet<Arc<str>>,
    identity: Vec<usize>,
}

impl EntityDefinition {
    pub fn new<'a>(
        name: &str,
        fields: impl IntoIterator<Item = &'a str>,
        identity: impl IntoIterator<Item = &'a str>,
    ) -> ConfigurationResult<Arc<Self>> {
        let fields: IndexSet<Arc<str>> = fields.into_iter().map(Arc::from).collect();
        let identity = identity
            .into_iter()
            .map(|field| {
                fields.get_index_of(field).ok_or_else(|| ConfigurationError::UnknownField {
                    entity: name.to_string(),
                    field: field.to_string(),
                })
            })
            .collect::<ConfigurationResult<Vec<_>>>()?;

        if identity.is_empty() {
            return Err(ConfigurationError::MissingIdentity {
                entity: name.to_string(),
            });
        }

        Ok(Arc::new(EntityDefinition {
            name: name.into(),
            fields,
            identity,
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> impl ExactSizeIterator<Item = &str> + '_ {
        self.fields.iter().map(|field| &**field)
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.get_index_of(name)
    }

    pub fn field_name(&self, index: usize) -> Option<&Arc<str>> {
        self.fields.get_index(index)
    }

    pub fn identity(&self) -> impl Iterator<Item = &str> + '_ {
        self.identity.iter().filter_map(|index| self.fields.get_index(*index)).map(|field| &**field)
    }

    pub fn check_field(&self, field: &str) -> ConfigurationResult<usize> {
        self.field_index(field).ok_or_else(|| ConfigurationError::UnknownField {
            entity: self.name.to_string(),
            field: field.to_string(),
        })
    }

    /// Builds a row from named values; fields left out are null.
    pub fn row<'a>(self: &Arc<Self>, values: impl IntoIterator<Item = (&'a str, Value)>) -> ConfigurationResult<Arc<Row>> {
        let mut row = vec![Value::Null; self.fields.len()];
        for (field, value) in values {
            row[self.check_field(field)?] = value;
        }
        Ok(Arc::new(Row {
            entity: self.clone(),
            values: row,
        }))
    }
}

/// A full row of some entity, as stored by the data source.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    entity: Arc<EntityDefinition>,
    values: Vec<Value>,
}

impl Row {
    pub fn entity(&self) -> &Arc<EntityDefinition> {
        &self.entity
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(self.entity.field_index(field)?)
    }

    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Single identity field value, or a list of them for composite identities.
    pub fn identity(&self) -> Value {
        identity_value(self.entity.identity.iter().filter_map(|index| self.values.get(*index)))
    }
}

pub(super) fn identity_value<'a>(values: impl IntoIterator<Item = &'a Value>) -> Value {
    let mut values: Vec<Value> = values.into_iter().cloned().collect();
    if values.len() == 1 {
        values.pop().unwrap_or_default()
    } else {
        Value::List(values)
    }
}

impl Record for Row {
    fn field(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }
}

impl serde::Serialize for Row {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (field, value) in self.entity.fields.iter().zip(&self.values) {
            map.serialize_entry(&**field, value)?;
        }
        map.end()
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {{", self.entity.name)?;
        for (i, (field, value)) in self.entity.fields.iter().zip(&self.values).enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, " {field}: {value}")?;
        }
        f.write_str(" }")
    }
}
