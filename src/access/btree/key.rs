use crate::access::value::{
    compare_serialized, deserialize_values, encoded_len, serialize_values, DataType, Value,
};
use crate::storage::PAGE_SIZE;
use anyhow::{bail, Result};
use std::cmp::Ordering;

/// A serialized index key. Fixed width for a given [`KeyManager`] and only
/// meaningful when compared through it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GenericKey {
    data: Vec<u8>,
}

impl GenericKey {
    pub fn from_bytes(data: &[u8]) -> Self {
        Self {
            data: data.to_vec(),
        }
    }

    /// Get the serialized key data
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl AsRef<[u8]> for GenericKey {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

/// Knows the column layout of one index's keys: turns values into
/// fixed-width [`GenericKey`]s and orders them with typed comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyManager {
    schema: Vec<DataType>,
    key_size: usize,
}

impl KeyManager {
    pub fn new(schema: Vec<DataType>) -> Result<Self> {
        if schema.is_empty() {
            bail!("Index key needs at least one column");
        }
        let key_size = encoded_len(&schema);
        if key_size > PAGE_SIZE {
            bail!(
                "Index key is {} bytes, wider than a {} byte page",
                key_size,
                PAGE_SIZE
            );
        }
        Ok(Self { schema, key_size })
    }

    pub fn schema(&self) -> &[DataType] {
        &self.schema
    }

    pub fn key_size(&self) -> usize {
        self.key_size
    }

    pub fn serialize(&self, values: &[Value]) -> Result<GenericKey> {
        Ok(GenericKey {
            data: serialize_values(values, &self.schema)?,
        })
    }

    pub fn deserialize(&self, key: &[u8]) -> Result<Vec<Value>> {
        deserialize_values(key, &self.schema)
    }

    pub fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        compare_serialized(a, b, &self.schema)
    }

    /// Human readable rendering used by tree dumps.
    pub fn display(&self, key: &[u8]) -> String {
        match self.deserialize(key) {
            Ok(values) if values.len() == 1 => format_value(&values[0]),
            Ok(values) => {
                let parts: Vec<String> = values.iter().map(format_value).collect();
                format!("({})", parts.join(", "))
            }
            Err(_) => format!("{:02x?}", key),
        }
    }
}

fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Int32(i) => i.to_string(),
        Value::Float32(f) => f.to_string(),
        Value::String(s) => format!("'{}'", s),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_wider_than_page_rejected() {
        assert!(KeyManager::new(vec![DataType::Char(5000)]).is_err());
        assert!(KeyManager::new(vec![DataType::Char(2000), DataType::Char(2100)]).is_err());
        assert!(KeyManager::new(vec![DataType::Char(4000)]).is_ok());
    }

    #[test]
    fn test_key_manager_from_values() -> Result<()> {
        let km = KeyManager::new(vec![DataType::Int32, DataType::Char(8)])?;
        assert_eq!(km.key_size(), 5 + 11);

        let values = vec![Value::Int32(42), Value::String("hello".to_string())];
        let key = km.serialize(&values)?;
        assert_eq!(key.len(), km.key_size());
        assert_eq!(km.deserialize(key.data())?, values);
        Ok(())
    }

    #[test]
    fn test_key_comparison_int32() -> Result<()> {
        let km = KeyManager::new(vec![DataType::Int32])?;

        let key1 = km.serialize(&[Value::Int32(1)])?;
        let key256 = km.serialize(&[Value::Int32(256)])?;
        let key512 = km.serialize(&[Value::Int32(512)])?;

        // Verify correct integer ordering
        assert_eq!(km.compare(key1.data(), key256.data()), Ordering::Less);
        assert_eq!(km.compare(key256.data(), key512.data()), Ordering::Less);

        let key1_dup = km.serialize(&[Value::Int32(1)])?;
        assert_eq!(key1, key1_dup);
        assert_eq!(km.compare(key1.data(), key1_dup.data()), Ordering::Equal);
        Ok(())
    }

    #[test]
    fn test_key_null_handling() -> Result<()> {
        let km = KeyManager::new(vec![DataType::Int32])?;

        let key_null = km.serialize(&[Value::Null])?;
        let key_neg = km.serialize(&[Value::Int32(-100)])?;

        // NULL should be less than any value
        assert_eq!(km.compare(key_null.data(), key_neg.data()), Ordering::Less);
        Ok(())
    }

    #[test]
    fn test_key_composite() -> Result<()> {
        let km = KeyManager::new(vec![DataType::Char(4), DataType::Int32])?;

        let key1 = km.serialize(&[Value::String("a".to_string()), Value::Int32(1)])?;
        let key2 = km.serialize(&[Value::String("a".to_string()), Value::Int32(2)])?;
        let key3 = km.serialize(&[Value::String("b".to_string()), Value::Int32(1)])?;

        // First column takes precedence
        assert_eq!(km.compare(key1.data(), key2.data()), Ordering::Less);
        assert_eq!(km.compare(key2.data(), key3.data()), Ordering::Less);
        Ok(())
    }

    #[test]
    fn test_schema_mismatch() -> Result<()> {
        let km = KeyManager::new(vec![DataType::Char(4)])?;
        assert!(km.serialize(&[Value::Int32(42)]).is_err());
        assert!(KeyManager::new(vec![]).is_err());
        Ok(())
    }

    #[test]
    fn test_display() -> Result<()> {
        let km = KeyManager::new(vec![DataType::Int32])?;
        assert_eq!(km.display(km.serialize(&[Value::Int32(7)])?.data()), "7");

        let km = KeyManager::new(vec![DataType::Int32, DataType::Char(2)])?;
        let key = km.serialize(&[Value::Null, Value::String("x".to_string())])?;
        assert_eq!(km.display(key.data()), "(NULL, 'x')");
        Ok(())
    }
}
