use parley_store::Row;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::Result;

pub(crate) fn decode<T: DeserializeOwned>(row: Row) -> Result<T> {
    Ok(serde_json::from_value(Value::Object(row))?)
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Row> {
    match serde_json::to_value(value)? {
        Value::Object(row) => Ok(row),
        other => Err(<serde_json::Error as serde::ser::Error>::custom(format!(
            "expected an object, got {other}"
        ))
        .into()),
    }
}
