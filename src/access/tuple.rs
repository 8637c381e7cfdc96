use crate::access::schema::Schema;
use crate::access::value::Value;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::PageId;

/// Location of a stored tuple: page plus slot index within that page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TupleId {
    pub page_id: PageId,
    pub slot: u16,
}

impl TupleId {
    pub fn new(page_id: PageId, slot: u16) -> Self {
        Self { page_id, slot }
    }
}

/// An ordered sequence of typed field values matching a schema.
///
/// The location is set once the tuple is stored in a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tuple {
    values: Vec<Value>,
    location: Option<TupleId>,
}

impl Tuple {
    pub fn new(values: Vec<Value>) -> Self {
        Self {
            values,
            location: None,
        }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn location(&self) -> Option<TupleId> {
        self.location
    }

    pub fn set_location(&mut self, location: Option<TupleId>) {
        self.location = location;
    }

    /// Whether this tuple's value types match `schema` field for field.
    pub fn matches_schema(&self, schema: &Schema) -> bool {
        self.values.len() == schema.num_fields()
            && self
                .values
                .iter()
                .enumerate()
                .all(|(i, v)| schema.field_type(i) == Some(v.data_type()))
    }

    /// Fixed-width encoding of the values in schema order.
    pub fn encode(&self) -> StorageResult<Vec<u8>> {
        let mut out = Vec::new();
        for value in &self.values {
            value.encode(&mut out)?;
        }
        Ok(out)
    }

    /// Decodes a tuple of `schema` from exactly `schema.tuple_size()` bytes.
    pub fn decode(schema: &Schema, bytes: &[u8]) -> StorageResult<Tuple> {
        if bytes.len() != schema.tuple_size() {
            return Err(StorageError::Corrupted(format!(
                "tuple slot holds {} bytes, schema needs {}",
                bytes.len(),
                schema.tuple_size()
            )));
        }
        let mut input = bytes;
        let mut values = Vec::with_capacity(schema.num_fields());
        for data_type in schema.field_types() {
            values.push(Value::decode(data_type, &mut input)?);
        }
        Ok(Tuple::new(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::value::DataType;
    use crate::catalog::TableId;

    #[test]
    fn test_schema_match() {
        let schema = Schema::from_types(&[DataType::Int, DataType::Text]);
        let good = Tuple::new(vec![Value::Int(1), Value::Text("a".to_string())]);
        let wrong_arity = Tuple::new(vec![Value::Int(1)]);
        let wrong_type = Tuple::new(vec![Value::Text("a".to_string()), Value::Int(1)]);

        assert!(good.matches_schema(&schema));
        assert!(!wrong_arity.matches_schema(&schema));
        assert!(!wrong_type.matches_schema(&schema));
    }

    #[test]
    fn test_encode_decode() -> StorageResult<()> {
        let schema = Schema::from_types(&[DataType::Int, DataType::Text, DataType::Int]);
        let tuple = Tuple::new(vec![
            Value::Int(7),
            Value::Text("seven".to_string()),
            Value::Int(-7),
        ]);

        let bytes = tuple.encode()?;
        assert_eq!(bytes.len(), schema.tuple_size());

        let decoded = Tuple::decode(&schema, &bytes)?;
        assert_eq!(decoded.values(), tuple.values());
        Ok(())
    }

    #[test]
    fn test_location_starts_unset() {
        let mut tuple = Tuple::new(vec![Value::Int(1)]);
        assert!(tuple.location().is_none());

        let location = TupleId::new(PageId::new(TableId(1), 0), 3);
        tuple.set_location(Some(location));
        assert_eq!(tuple.location(), Some(location));
    }
}
