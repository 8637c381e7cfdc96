use crate::storage::error::{StorageError, StorageResult};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Read;

/// Maximum byte length of a `Text` value. Text fields are stored at this
/// fixed width so every tuple of a schema has the same size.
pub const TEXT_MAX_LEN: usize = 128;

/// Data types supported by the storage engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Int,
    Text,
}

impl DataType {
    /// The fixed on-disk size of a value of this type, in bytes.
    pub fn size(&self) -> usize {
        match self {
            DataType::Int => 4,
            // 4-byte length prefix followed by TEXT_MAX_LEN payload bytes.
            DataType::Text => 4 + TEXT_MAX_LEN,
        }
    }
}

/// A single field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i32),
    Text(String),
}

impl Value {
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Int(_) => DataType::Int,
            Value::Text(_) => DataType::Text,
        }
    }

    /// Appends the fixed-width encoding of this value to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) -> StorageResult<()> {
        match self {
            Value::Int(v) => {
                out.write_i32::<LittleEndian>(*v)?;
            }
            Value::Text(s) => {
                let bytes = s.as_bytes();
                if bytes.len() > TEXT_MAX_LEN {
                    return Err(StorageError::TextTooLong {
                        len: bytes.len(),
                        max: TEXT_MAX_LEN,
                    });
                }
                out.write_u32::<LittleEndian>(bytes.len() as u32)?;
                out.extend_from_slice(bytes);
                out.resize(out.len() + (TEXT_MAX_LEN - bytes.len()), 0);
            }
        }
        Ok(())
    }

    /// Decodes one value of `data_type` from `input`, consuming its fixed width.
    pub fn decode(data_type: DataType, input: &mut &[u8]) -> StorageResult<Value> {
        match data_type {
            DataType::Int => Ok(Value::Int(input.read_i32::<LittleEndian>()?)),
            DataType::Text => {
                let len = input.read_u32::<LittleEndian>()? as usize;
                if len > TEXT_MAX_LEN {
                    return Err(StorageError::Corrupted(format!(
                        "text length {} exceeds maximum {}",
                        len, TEXT_MAX_LEN
                    )));
                }
                let mut buf = vec![0u8; TEXT_MAX_LEN];
                input.read_exact(&mut buf)?;
                buf.truncate(len);
                let s = String::from_utf8(buf)
                    .map_err(|e| StorageError::Corrupted(format!("invalid utf8: {}", e)))?;
                Ok(Value::Text(s))
            }
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}
