use crate::access::value::DataType;

/// One field of a schema: a type plus an optional, purely cosmetic name.
#[derive(Debug, Clone)]
pub struct Field {
    pub data_type: DataType,
    pub name: Option<String>,
}

/// Describes the fixed-width layout of a tuple.
///
/// Equality is structural by field types only; names do not participate.
#[derive(Debug, Clone)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    /// Builds a schema with anonymous fields of the given types.
    pub fn from_types(types: &[DataType]) -> Self {
        Self {
            fields: types
                .iter()
                .map(|&data_type| Field {
                    data_type,
                    name: None,
                })
                .collect(),
        }
    }

    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    pub fn field_type(&self, i: usize) -> Option<DataType> {
        self.fields.get(i).map(|f| f.data_type)
    }

    pub fn field_name(&self, i: usize) -> Option<&str> {
        self.fields.get(i).and_then(|f| f.name.as_deref())
    }

    /// Index of the first field with the given name.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|f| f.name.as_deref() == Some(name))
    }

    pub fn field_types(&self) -> impl Iterator<Item = DataType> + '_ {
        self.fields.iter().map(|f| f.data_type)
    }

    /// The fixed size in bytes of tuples with this schema.
    pub fn tuple_size(&self) -> usize {
        self.fields.iter().map(|f| f.data_type.size()).sum()
    }
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.fields.len() == other.fields.len()
            && self
                .fields
                .iter()
                .zip(other.fields.iter())
                .all(|(a, b)| a.data_type == b.data_type)
    }
}

impl Eq for Schema {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::value::TEXT_MAX_LEN;

    #[test]
    fn test_tuple_size() {
        let schema = Schema::from_types(&[DataType::Int, DataType::Int, DataType::Text]);
        assert_eq!(schema.tuple_size(), 4 + 4 + 4 + TEXT_MAX_LEN);
    }

    #[test]
    fn test_equality_ignores_names() {
        let anonymous = Schema::from_types(&[DataType::Int, DataType::Text]);
        let named = Schema::new(vec![
            Field {
                data_type: DataType::Int,
                name: Some("id".to_string()),
            },
            Field {
                data_type: DataType::Text,
                name: Some("body".to_string()),
            },
        ]);
        assert_eq!(anonymous, named);
    }

    #[test]
    fn test_equality_by_types() {
        let a = Schema::from_types(&[DataType::Int, DataType::Text]);
        let b = Schema::from_types(&[DataType::Text, DataType::Int]);
        let c = Schema::from_types(&[DataType::Int]);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_field_lookup() {
        let schema = Schema::new(vec![
            Field {
                data_type: DataType::Int,
                name: Some("id".to_string()),
            },
            Field {
                data_type: DataType::Text,
                name: None,
            },
        ]);
        assert_eq!(schema.field_index("id"), Some(0));
        assert_eq!(schema.field_index("missing"), None);
        assert_eq!(schema.field_type(1), Some(DataType::Text));
        assert_eq!(schema.field_name(1), None);
    }
}
