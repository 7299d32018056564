use anyhow::{bail, Result};
use byteorder::{ByteOrder, LittleEndian};
use std::cmp::Ordering;

/// Column types an index key can be built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Boolean,
    Int32,
    Float32,
    /// Fixed-capacity string of at most `n` bytes.
    Char(u16),
}

impl DataType {
    /// Bytes one column occupies inside a serialized key: a null flag
    /// followed by the payload.
    pub fn encoded_size(&self) -> usize {
        1 + match self {
            DataType::Boolean => 1,
            DataType::Int32 | DataType::Float32 => 4,
            DataType::Char(n) => 2 + *n as usize,
        }
    }
}

/// Values that can appear in a key column
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Int32(i32),
    Float32(f32),
    String(String),
}

impl Value {
    /// Check if this value is compatible with the given data type
    pub fn is_compatible_with(&self, data_type: DataType) -> bool {
        match (self, data_type) {
            (Value::Null, _) => true,
            (Value::Boolean(_), DataType::Boolean) => true,
            (Value::Int32(_), DataType::Int32) => true,
            (Value::Float32(_), DataType::Float32) => true,
            (Value::String(s), DataType::Char(n)) => s.len() <= n as usize,
            _ => false,
        }
    }

    /// Total order used by index keys. NULL sorts before everything else;
    /// floats use IEEE total ordering.
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Int32(a), Value::Int32(b)) => a.cmp(b),
            (Value::Float32(a), Value::Float32(b)) => a.total_cmp(b),
            (Value::String(a), Value::String(b)) => a.as_bytes().cmp(b.as_bytes()),
            // Mixed types never share a column; fall back to a stable order.
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Boolean(_) => 1,
            Value::Int32(_) => 2,
            Value::Float32(_) => 3,
            Value::String(_) => 4,
        }
    }
}

/// Serialize values into the fixed-width column layout of `schema`.
pub fn serialize_values(values: &[Value], schema: &[DataType]) -> Result<Vec<u8>> {
    if values.len() != schema.len() {
        bail!(
            "Value count {} doesn't match schema length {}",
            values.len(),
            schema.len()
        );
    }

    let mut data = vec![0u8; encoded_len(schema)];
    let mut offset = 0;
    for (value, data_type) in values.iter().zip(schema.iter()) {
        if !value.is_compatible_with(*data_type) {
            bail!(
                "Value {:?} is not compatible with type {:?}",
                value,
                data_type
            );
        }

        let column = &mut data[offset..offset + data_type.encoded_size()];
        match value {
            // Payload of a NULL stays zeroed so equal keys are byte-equal.
            Value::Null => column[0] = 1,
            Value::Boolean(b) => column[1] = u8::from(*b),
            Value::Int32(i) => LittleEndian::write_i32(&mut column[1..], *i),
            Value::Float32(f) => LittleEndian::write_f32(&mut column[1..], *f),
            Value::String(s) => {
                let bytes = s.as_bytes();
                LittleEndian::write_u16(&mut column[1..], bytes.len() as u16);
                column[3..3 + bytes.len()].copy_from_slice(bytes);
            }
        }
        offset += data_type.encoded_size();
    }

    Ok(data)
}

/// Deserialize bytes written by [`serialize_values`].
pub fn deserialize_values(data: &[u8], schema: &[DataType]) -> Result<Vec<Value>> {
    if data.len() < encoded_len(schema) {
        bail!(
            "Key data too short: {} bytes for a {} byte layout",
            data.len(),
            encoded_len(schema)
        );
    }

    let mut values = Vec::with_capacity(schema.len());
    let mut offset = 0;
    for data_type in schema {
        values.push(decode_column(
            &data[offset..offset + data_type.encoded_size()],
            *data_type,
        )?);
        offset += data_type.encoded_size();
    }
    Ok(values)
}

/// Compare two serialized keys column by column without allocating.
pub fn compare_serialized(a: &[u8], b: &[u8], schema: &[DataType]) -> Ordering {
    let mut offset = 0;
    for data_type in schema {
        let width = data_type.encoded_size();
        let ordering = compare_column(
            &a[offset..offset + width],
            &b[offset..offset + width],
            *data_type,
        );
        if ordering != Ordering::Equal {
            return ordering;
        }
        offset += width;
    }
    Ordering::Equal
}

pub fn encoded_len(schema: &[DataType]) -> usize {
    schema.iter().map(DataType::encoded_size).sum()
}

fn decode_column(column: &[u8], data_type: DataType) -> Result<Value> {
    if column[0] != 0 {
        return Ok(Value::Null);
    }
    let value = match data_type {
        DataType::Boolean => Value::Boolean(column[1] != 0),
        DataType::Int32 => Value::Int32(LittleEndian::read_i32(&column[1..])),
        DataType::Float32 => Value::Float32(LittleEndian::read_f32(&column[1..])),
        DataType::Char(n) => {
            let len = LittleEndian::read_u16(&column[1..]) as usize;
            if len > n as usize {
                bail!("Invalid string value: length {} exceeds CHAR({})", len, n);
            }
            Value::String(String::from_utf8(column[3..3 + len].to_vec())?)
        }
    };
    Ok(value)
}

fn compare_column(a: &[u8], b: &[u8], data_type: DataType) -> Ordering {
    match (a[0] != 0, b[0] != 0) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        (false, false) => {}
    }
    match data_type {
        DataType::Boolean => a[1].cmp(&b[1]),
        DataType::Int32 => LittleEndian::read_i32(&a[1..]).cmp(&LittleEndian::read_i32(&b[1..])),
        DataType::Float32 => {
            LittleEndian::read_f32(&a[1..]).total_cmp(&LittleEndian::read_f32(&b[1..]))
        }
        DataType::Char(_) => {
            let a_len = LittleEndian::read_u16(&a[1..]) as usize;
            let b_len = LittleEndian::read_u16(&b[1..]) as usize;
            a[3..3 + a_len].cmp(&b[3..3 + b_len])
        }
    }
}
