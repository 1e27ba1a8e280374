/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The dynamically-typed [`Value`], which is what blocks carry in their `data` field.
//!
//! Table rows are [`Value::Map`]s whose keys are column names. Other block kinds encode their payloads
//! as values too (see [`crate::types::payloads`]), so that every block can be stored, hashed, and sent
//! over the wire in the same way.

use borsh::{BorshDeserialize, BorshSerialize};
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::io::{self, ErrorKind, Read, Write};

/// A single row of the table: column name to value.
pub type Row = BTreeMap<String, Value>;

/// How many lists and maps may nest inside one another in a single value. Values are decoded from
/// frames sent by unauthenticated peers, so decoding must not recurse without bound.
pub const MAX_NESTING: usize = 64;

/// Encoded as a one-byte variant tag followed by the variant's Borsh encoding. Lists and maps are
/// prefixed with their `u32` length, and maps are written in key order.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(int) => Some(*int),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(list) => Some(list),
            _ => None,
        }
    }

    /// Numeric view of the value, used by aggregations. Integers are widened to floats.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(int) => Some(*int as f64),
            Value::Float(float) => Some(*float),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Name of the variant, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    /// Whether the value survives being written into a block. NaN floats have no portable encoding,
    /// and no replica decodes lists and maps nested deeper than [`MAX_NESTING`].
    pub fn is_storable(&self) -> bool {
        self.is_storable_at(0)
    }

    fn is_storable_at(&self, depth: usize) -> bool {
        match self {
            Value::Float(float) => !float.is_nan(),
            Value::List(_) | Value::Map(_) if depth >= MAX_NESTING => false,
            Value::List(list) => list.iter().all(|value| value.is_storable_at(depth + 1)),
            Value::Map(map) => map.values().all(|value| value.is_storable_at(depth + 1)),
            _ => true,
        }
    }

    fn serialize_at<W: Write>(&self, writer: &mut W, depth: usize) -> io::Result<()> {
        if matches!(self, Value::List(_) | Value::Map(_)) && depth >= MAX_NESTING {
            return Err(too_deep());
        }

        match self {
            Value::Null => TAG_NULL.serialize(writer),
            Value::Bool(bool) => {
                TAG_BOOL.serialize(writer)?;
                bool.serialize(writer)
            }
            Value::Int(int) => {
                TAG_INT.serialize(writer)?;
                int.serialize(writer)
            }
            Value::Float(float) if float.is_nan() => {
                Err(io::Error::new(ErrorKind::InvalidInput, "NaN cannot be stored"))
            }
            Value::Float(float) => {
                TAG_FLOAT.serialize(writer)?;
                float.serialize(writer)
            }
            Value::Text(text) => {
                TAG_TEXT.serialize(writer)?;
                text.serialize(writer)
            }
            Value::Bytes(bytes) => {
                TAG_BYTES.serialize(writer)?;
                bytes.serialize(writer)
            }
            Value::List(list) => {
                TAG_LIST.serialize(writer)?;
                encoded_len(list.len())?.serialize(writer)?;
                for value in list {
                    value.serialize_at(writer, depth + 1)?;
                }
                Ok(())
            }
            Value::Map(map) => {
                TAG_MAP.serialize(writer)?;
                encoded_len(map.len())?.serialize(writer)?;
                for (key, value) in map {
                    key.serialize(writer)?;
                    value.serialize_at(writer, depth + 1)?;
                }
                Ok(())
            }
        }
    }

    fn deserialize_at<R: Read>(reader: &mut R, depth: usize) -> io::Result<Value> {
        let tag = u8::deserialize_reader(reader)?;
        if (tag == TAG_LIST || tag == TAG_MAP) && depth >= MAX_NESTING {
            return Err(too_deep());
        }

        match tag {
            TAG_NULL => Ok(Value::Null),
            TAG_BOOL => Ok(Value::Bool(bool::deserialize_reader(reader)?)),
            TAG_INT => Ok(Value::Int(i64::deserialize_reader(reader)?)),
            TAG_FLOAT => Ok(Value::Float(f64::deserialize_reader(reader)?)),
            TAG_TEXT => Ok(Value::Text(String::deserialize_reader(reader)?)),
            TAG_BYTES => Ok(Value::Bytes(Vec::<u8>::deserialize_reader(reader)?)),
            TAG_LIST => {
                let len = u32::deserialize_reader(reader)?;
                // The length is untrusted, so the list grows as its elements actually arrive.
                let mut list = Vec::new();
                for _ in 0..len {
                    list.push(Value::deserialize_at(reader, depth + 1)?);
                }
                Ok(Value::List(list))
            }
            TAG_MAP => {
                let len = u32::deserialize_reader(reader)?;
                let mut map = BTreeMap::new();
                for _ in 0..len {
                    let key = String::deserialize_reader(reader)?;
                    if map.keys().next_back().map_or(false, |last: &String| *last >= key) {
                        return Err(io::Error::new(ErrorKind::InvalidData, "map keys are not in strictly increasing order"));
                    }
                    let value = Value::deserialize_at(reader, depth + 1)?;
                    map.insert(key, value);
                }
                Ok(Value::Map(map))
            }
            tag => Err(io::Error::new(ErrorKind::InvalidData, format!("invalid value tag {}", tag))),
        }
    }
}

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_FLOAT: u8 = 3;
const TAG_TEXT: u8 = 4;
const TAG_BYTES: u8 = 5;
const TAG_LIST: u8 = 6;
const TAG_MAP: u8 = 7;

fn too_deep() -> io::Error {
    io::Error::new(
        ErrorKind::InvalidData,
        format!("value nests lists and maps deeper than {} levels", MAX_NESTING),
    )
}

fn encoded_len(len: usize) -> io::Result<u32> {
    u32::try_from(len).map_err(|_| io::Error::new(ErrorKind::InvalidInput, "too many elements"))
}

impl BorshSerialize for Value {
    fn serialize<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        self.serialize_at(writer, 0)
    }
}

impl BorshDeserialize for Value {
    fn deserialize_reader<R: Read>(reader: &mut R) -> io::Result<Self> {
        Value::deserialize_at(reader, 0)
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(bool) => write!(f, "{}", bool),
            Value::Int(int) => write!(f, "{}", int),
            Value::Float(float) => write!(f, "{}", float),
            Value::Text(text) => write!(f, "{:?}", text),
            Value::Bytes(bytes) => write!(f, "<{} bytes>", bytes.len()),
            Value::List(list) => {
                write!(f, "[")?;
                for (i, value) in list.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", value)?;
                }
                write!(f, "]")
            }
            Value::Map(map) => {
                write!(f, "{{")?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{:?}: {}", key, value)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(bool: bool) -> Self {
        Value::Bool(bool)
    }
}

impl From<i64> for Value {
    fn from(int: i64) -> Self {
        Value::Int(int)
    }
}

impl From<i32> for Value {
    fn from(int: i32) -> Self {
        Value::Int(int as i64)
    }
}

impl From<f64> for Value {
    fn from(float: f64) -> Self {
        Value::Float(float)
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Value::Text(text.to_string())
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Value::Text(text)
    }
}

impl From<Vec<Value>> for Value {
    fn from(list: Vec<Value>) -> Self {
        Value::List(list)
    }
}

impl From<Row> for Value {
    fn from(row: Row) -> Self {
        Value::Map(row)
    }
}

impl<V: Into<Value>> From<Option<V>> for Value {
    fn from(option: Option<V>) -> Self {
        option.map_or(Value::Null, Into::into)
    }
}

/// Build a [`Row`] from `(column, value)` pairs.
///
/// ```
/// # use tablechain::types::value::{row, Value};
/// let row = row([("name", Value::from("alice")), ("age", Value::from(31))]);
/// assert_eq!(row.len(), 2);
/// ```
pub fn row<K: Into<String>>(columns: impl IntoIterator<Item = (K, Value)>) -> Row {
    columns
        .into_iter()
        .map(|(column, value)| (column.into(), value))
        .collect()
}
