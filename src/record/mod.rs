//! Record serialization.
//!
//! A record is the serialized form of one row: a header listing one
//! serial type per column, then the column bodies in schema order.
//!
//! ```text
//! [header_size u32 | serial_type_0 u32 | ... | body]
//! ```
//!
//! Serial types: 0 = NULL (no body bytes), 1 = INTEGER (4-byte i32),
//! 2 = REAL (4-byte f32), 3 = BOOL (1 byte), `4 + n` = variable
//! payload of `n` bytes, read back as TEXT or BLOB according to the
//! schema column. All integers little-endian.
//!
//! Cells wrap a record for storage in a leaf:
//! `[key i32 | value_size u32 | record bytes]`.

pub mod schema;
pub mod value;

pub use schema::{Column, DataType, Schema};
pub use value::Value;

use crate::error::{Result, StorageError};
use crate::types::{CELL_HEADER_SIZE, MAX_RECORD_SIZE};

const SERIAL_NULL: u32 = 0;
const SERIAL_INTEGER: u32 = 1;
const SERIAL_REAL: u32 = 2;
const SERIAL_BOOL: u32 = 3;
/// Codes `>= SERIAL_VAR_BASE` encode a payload of `code - 4` bytes.
const SERIAL_VAR_BASE: u32 = 4;

/// Encode one row under its schema.
///
/// Fails with `SchemaMismatch` on arity, type, or not-null
/// violations and with `TooLarge` when the encoding exceeds the
/// single-cell limit.
pub fn serialize_record(schema: &Schema, values: &[Value]) -> Result<Vec<u8>> {
    if values.len() != schema.len() {
        return Err(StorageError::schema_mismatch(format!(
            "expected {} values, got {}",
            schema.len(),
            values.len()
        )));
    }

    let mut types = Vec::with_capacity(schema.len());
    let mut body = Vec::new();
    for (col, value) in schema.columns().iter().zip(values) {
        match (col.datatype, value) {
            (_, Value::Null) => {
                if col.not_null {
                    return Err(StorageError::schema_mismatch(format!(
                        "null in not-null column {:?}",
                        col.name
                    )));
                }
                types.push(SERIAL_NULL);
            }
            (DataType::Integer, Value::Integer(i)) => {
                types.push(SERIAL_INTEGER);
                body.extend_from_slice(&i.to_le_bytes());
            }
            (DataType::Real, Value::Real(r)) => {
                types.push(SERIAL_REAL);
                body.extend_from_slice(&r.to_le_bytes());
            }
            (DataType::Bool, Value::Bool(b)) => {
                types.push(SERIAL_BOOL);
                body.push(*b as u8);
            }
            (DataType::Text, Value::Text(s)) => {
                types.push(SERIAL_VAR_BASE + s.len() as u32);
                body.extend_from_slice(s.as_bytes());
            }
            (DataType::Blob, Value::Blob(b)) => {
                types.push(SERIAL_VAR_BASE + b.len() as u32);
                body.extend_from_slice(b);
            }
            (dt, v) => {
                return Err(StorageError::schema_mismatch(format!(
                    "column {:?} is {:?}, got {}",
                    col.name, dt, v
                )));
            }
        }
    }

    let header_size = 4 * (1 + types.len());
    let mut out = Vec::with_capacity(header_size + body.len());
    out.extend_from_slice(&(header_size as u32).to_le_bytes());
    for t in &types {
        out.extend_from_slice(&t.to_le_bytes());
    }
    out.extend_from_slice(&body);

    if out.len() > MAX_RECORD_SIZE {
        return Err(StorageError::TooLarge {
            size: out.len(),
            max: MAX_RECORD_SIZE,
        });
    }
    Ok(out)
}

/// Decode a record under its schema.
///
/// Any structural disagreement with the schema — wrong column count,
/// serial type vs. datatype mismatch, truncated or trailing body
/// bytes — is a `SchemaMismatch`.
pub fn deserialize_record(schema: &Schema, bytes: &[u8]) -> Result<Vec<Value>> {
    if bytes.len() < 4 {
        return Err(StorageError::schema_mismatch("record shorter than header"));
    }
    let header_size = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    if header_size < 4 || header_size > bytes.len() || header_size % 4 != 0 {
        return Err(StorageError::schema_mismatch(format!(
            "bad header size {}",
            header_size
        )));
    }
    let ncols = header_size / 4 - 1;
    if ncols != schema.len() {
        return Err(StorageError::schema_mismatch(format!(
            "record has {} columns, schema has {}",
            ncols,
            schema.len()
        )));
    }

    fn take<'a>(body: &'a [u8], offset: &mut usize, n: usize) -> Result<&'a [u8]> {
        if *offset + n > body.len() {
            return Err(StorageError::schema_mismatch("truncated record body"));
        }
        let slice = &body[*offset..*offset + n];
        *offset += n;
        Ok(slice)
    }

    let body = &bytes[header_size..];
    let mut offset = 0;
    let mut values = Vec::with_capacity(ncols);
    for (i, col) in schema.columns().iter().enumerate() {
        let code_off = 4 + i * 4;
        let code = u32::from_le_bytes([
            bytes[code_off],
            bytes[code_off + 1],
            bytes[code_off + 2],
            bytes[code_off + 3],
        ]);
        let value = match (code, col.datatype) {
            (SERIAL_NULL, _) => {
                if col.not_null {
                    return Err(StorageError::schema_mismatch(format!(
                        "null stored in not-null column {:?}",
                        col.name
                    )));
                }
                Value::Null
            }
            (SERIAL_INTEGER, DataType::Integer) => {
                let b = take(body, &mut offset, 4)?;
                Value::Integer(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            }
            (SERIAL_REAL, DataType::Real) => {
                let b = take(body, &mut offset, 4)?;
                Value::Real(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            }
            (SERIAL_BOOL, DataType::Bool) => match take(body, &mut offset, 1)?[0] {
                0 => Value::Bool(false),
                1 => Value::Bool(true),
                b => {
                    return Err(StorageError::schema_mismatch(format!(
                        "bad bool byte {:#04x} in column {:?}",
                        b, col.name
                    )));
                }
            },
            (code, DataType::Text) if code >= SERIAL_VAR_BASE => {
                let len = (code - SERIAL_VAR_BASE) as usize;
                let b = take(body, &mut offset, len)?;
                let s = std::str::from_utf8(b).map_err(|_| {
                    StorageError::schema_mismatch(format!(
                        "invalid utf-8 in text column {:?}",
                        col.name
                    ))
                })?;
                Value::Text(s.to_string())
            }
            (code, DataType::Blob) if code >= SERIAL_VAR_BASE => {
                let len = (code - SERIAL_VAR_BASE) as usize;
                Value::Blob(take(body, &mut offset, len)?.to_vec())
            }
            (code, dt) => {
                return Err(StorageError::schema_mismatch(format!(
                    "serial type {} does not fit column {:?} ({:?})",
                    code, col.name, dt
                )));
            }
        };
        values.push(value);
    }

    if offset != body.len() {
        return Err(StorageError::schema_mismatch(format!(
            "{} trailing bytes after record body",
            body.len() - offset
        )));
    }
    Ok(values)
}

/// Wrap a record into a cell.
pub fn make_cell(key: i32, record: &[u8]) -> Vec<u8> {
    let mut cell = Vec::with_capacity(CELL_HEADER_SIZE + record.len());
    cell.extend_from_slice(&key.to_le_bytes());
    cell.extend_from_slice(&(record.len() as u32).to_le_bytes());
    cell.extend_from_slice(record);
    cell
}

/// Read the key without touching the record.
pub fn cell_key(cell: &[u8]) -> i32 {
    i32::from_le_bytes([cell[0], cell[1], cell[2], cell[3]])
}

/// Total cell size (header + record).
pub fn cell_size(cell: &[u8]) -> usize {
    CELL_HEADER_SIZE + u32::from_le_bytes([cell[4], cell[5], cell[6], cell[7]]) as usize
}

/// The record bytes inside a cell.
pub fn cell_value(cell: &[u8]) -> &[u8] {
    &cell[CELL_HEADER_SIZE..cell_size(cell)]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fruits() -> Schema {
        Schema::new(vec![
            Column::new("id", DataType::Integer).primary(),
            Column::new("name", DataType::Text).not_null(),
            Column::new("avg_weight", DataType::Real),
        ])
        .unwrap()
    }

    #[test]
    fn test_roundtrip() {
        let schema = fruits();
        let row = vec![Value::Integer(1), Value::from("apple"), Value::Real(4.2)];
        let bytes = serialize_record(&schema, &row).unwrap();
        assert_eq!(deserialize_record(&schema, &bytes).unwrap(), row);
    }

    #[test]
    fn test_null_occupies_no_body_bytes() {
        let schema = fruits();
        let with_null = serialize_record(
            &schema,
            &[Value::Integer(1), Value::from("a"), Value::Null],
        )
        .unwrap();
        let with_real = serialize_record(
            &schema,
            &[Value::Integer(1), Value::from("a"), Value::Real(0.0)],
        )
        .unwrap();
        assert_eq!(with_real.len() - with_null.len(), 4);

        let values = deserialize_record(&schema, &with_null).unwrap();
        assert_eq!(values[2], Value::Null);
    }

    #[test]
    fn test_bool_and_blob() {
        let schema = Schema::new(vec![
            Column::new("id", DataType::Integer).primary(),
            Column::new("flag", DataType::Bool),
            Column::new("payload", DataType::Blob),
        ])
        .unwrap();
        let row = vec![
            Value::Integer(9),
            Value::Bool(true),
            Value::Blob(vec![0, 159, 146, 150]),
        ];
        let bytes = serialize_record(&schema, &row).unwrap();
        assert_eq!(deserialize_record(&schema, &bytes).unwrap(), row);
    }

    #[test]
    fn test_rejects_type_mismatch() {
        let schema = fruits();
        let err = serialize_record(
            &schema,
            &[Value::Integer(1), Value::Integer(2), Value::Null],
        )
        .unwrap_err();
        assert!(matches!(err, StorageError::SchemaMismatch(_)));
    }

    #[test]
    fn test_rejects_null_in_not_null() {
        let schema = fruits();
        let err =
            serialize_record(&schema, &[Value::Integer(1), Value::Null, Value::Null]).unwrap_err();
        assert!(matches!(err, StorageError::SchemaMismatch(_)));
    }

    #[test]
    fn test_rejects_wrong_arity() {
        let schema = fruits();
        let err = serialize_record(&schema, &[Value::Integer(1)]).unwrap_err();
        assert!(matches!(err, StorageError::SchemaMismatch(_)));
    }

    #[test]
    fn test_rejects_oversized_record() {
        let schema = fruits();
        let big = "x".repeat(MAX_RECORD_SIZE);
        let err = serialize_record(
            &schema,
            &[Value::Integer(1), Value::Text(big), Value::Null],
        )
        .unwrap_err();
        assert!(matches!(err, StorageError::TooLarge { .. }));
    }

    #[test]
    fn test_deserialize_rejects_column_count_mismatch() {
        let schema = fruits();
        let other = Schema::new(vec![Column::new("id", DataType::Integer).primary()]).unwrap();
        let bytes = serialize_record(&other, &[Value::Integer(1)]).unwrap();
        let err = deserialize_record(&schema, &bytes).unwrap_err();
        assert!(matches!(err, StorageError::SchemaMismatch(_)));
    }

    #[test]
    fn test_deserialize_rejects_trailing_garbage() {
        let schema = fruits();
        let mut bytes = serialize_record(
            &schema,
            &[Value::Integer(1), Value::from("a"), Value::Null],
        )
        .unwrap();
        bytes.push(0xFF);
        let err = deserialize_record(&schema, &bytes).unwrap_err();
        assert!(matches!(err, StorageError::SchemaMismatch(_)));
    }

    #[test]
    fn test_deserialize_rejects_truncation() {
        let schema = fruits();
        let bytes = serialize_record(
            &schema,
            &[Value::Integer(1), Value::from("apple"), Value::Real(4.2)],
        )
        .unwrap();
        let err = deserialize_record(&schema, &bytes[..bytes.len() - 2]).unwrap_err();
        assert!(matches!(err, StorageError::SchemaMismatch(_)));
    }

    #[test]
    fn test_cell_helpers() {
        let record = serialize_record(
            &fruits(),
            &[Value::Integer(-7), Value::from("kiwi"), Value::Null],
        )
        .unwrap();
        let cell = make_cell(-7, &record);

        assert_eq!(cell_key(&cell), -7);
        assert_eq!(cell_size(&cell), cell.len());
        assert_eq!(cell_value(&cell), &record[..]);
    }
}
