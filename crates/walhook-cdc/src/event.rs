//! Change events
//!
//! A [`ChangeEvent`] is one decoded row-level WAL record, with row images
//! rendered as JSON using the relation's column type OIDs. Events are
//! immutable and are not persisted by the subscriber.

use crate::protocol::{DeleteBody, InsertBody, RelationBody, Tuple, TupleData, UpdateBody};
use serde_json::{Map, Value};

/// Row-level operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

impl ChangeOp {
    /// SQL spelling, matching the registry's `event_name` values.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeOp::Insert => "INSERT",
            ChangeOp::Update => "UPDATE",
            ChangeOp::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One decoded row change.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    /// Operation kind
    pub op: ChangeOp,
    /// Schema (namespace) of the changed table
    pub schema: String,
    /// Table name
    pub table: String,
    /// New row image (INSERT/UPDATE)
    pub new_row: Option<Value>,
    /// Full prior row image (UPDATE/DELETE with replica identity FULL)
    pub old_row: Option<Value>,
    /// Replica-identity key columns, when only those were logged
    pub key: Option<Value>,
    /// WAL position of the record
    pub lsn: u64,
}

impl ChangeEvent {
    pub fn from_insert(rel: &RelationBody, body: &InsertBody, lsn: u64) -> Self {
        Self {
            op: ChangeOp::Insert,
            schema: rel.namespace.clone(),
            table: rel.name.clone(),
            new_row: Some(tuple_to_json(&body.new_tuple, rel)),
            old_row: None,
            key: None,
            lsn,
        }
    }

    pub fn from_update(rel: &RelationBody, body: &UpdateBody, lsn: u64) -> Self {
        Self {
            op: ChangeOp::Update,
            schema: rel.namespace.clone(),
            table: rel.name.clone(),
            new_row: Some(tuple_to_json(&body.new_tuple, rel)),
            old_row: body.old_tuple.as_ref().map(|t| tuple_to_json(t, rel)),
            key: body.key_tuple.as_ref().map(|t| tuple_to_json(t, rel)),
            lsn,
        }
    }

    pub fn from_delete(rel: &RelationBody, body: &DeleteBody, lsn: u64) -> Self {
        Self {
            op: ChangeOp::Delete,
            schema: rel.namespace.clone(),
            table: rel.name.clone(),
            new_row: None,
            old_row: body.old_tuple.as_ref().map(|t| tuple_to_json(t, rel)),
            key: body.key_tuple.as_ref().map(|t| tuple_to_json(t, rel)),
            lsn,
        }
    }
}

/// Render an LSN in PostgreSQL's `X/X` notation.
pub fn format_lsn(lsn: u64) -> String {
    format!("{:X}/{:X}", (lsn >> 32) as u32, lsn as u32)
}

/// Convert a tuple to a JSON object keyed by column name.
///
/// Values arrive as text; the relation's type OIDs decide which become
/// JSON numbers/booleans/objects instead of strings.
pub fn tuple_to_json(tuple: &Tuple, rel: &RelationBody) -> Value {
    let mut map = Map::new();
    for (i, col_data) in tuple.0.iter().enumerate() {
        let Some(col) = rel.columns.get(i) else {
            continue;
        };
        let value = match col_data {
            TupleData::Null => Value::Null,
            // unchanged TOASTed value; the real content was not logged
            TupleData::Toast => Value::Null,
            TupleData::Text(bytes) => text_to_json(col.type_id, bytes),
        };
        map.insert(col.name.clone(), value);
    }
    Value::Object(map)
}

/// Decode one text-format column value using its type OID.
///
/// Reference: <https://www.postgresql.org/docs/current/datatype.html>
fn text_to_json(type_oid: i32, bytes: &[u8]) -> Value {
    let text = String::from_utf8_lossy(bytes);
    match type_oid {
        // boolean
        16 => match text.as_ref() {
            "t" => Value::Bool(true),
            "f" => Value::Bool(false),
            _ => Value::String(text.into_owned()),
        },

        // smallint, integer, bigint, oid
        20 | 21 | 23 | 26 => text
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(text.into_owned())),

        // real, double precision, numeric (numeric falls back to the text
        // form when it does not round-trip through f64)
        700 | 701 | 1700 => {
            if let Ok(n) = text.parse::<i64>() {
                Value::from(n)
            } else {
                match text.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
                    Some(n) => Value::Number(n),
                    None => Value::String(text.into_owned()),
                }
            }
        }

        // json, jsonb
        114 | 3802 => serde_json::from_slice(bytes)
            .unwrap_or_else(|_| Value::String(text.into_owned())),

        // everything else keeps PostgreSQL's text representation
        _ => Value::String(text.into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Column;
    use bytes::Bytes;
    use serde_json::json;

    fn orders_relation() -> RelationBody {
        RelationBody {
            id: 16385,
            namespace: "public".into(),
            name: "orders".into(),
            replica_identity: b'f',
            columns: vec![
                Column {
                    flags: 1,
                    name: "id".into(),
                    type_id: 23,
                    type_mode: -1,
                },
                Column {
                    flags: 0,
                    name: "total".into(),
                    type_id: 1700,
                    type_mode: -1,
                },
                Column {
                    flags: 0,
                    name: "note".into(),
                    type_id: 25,
                    type_mode: -1,
                },
            ],
        }
    }

    fn text_tuple(values: &[Option<&str>]) -> Tuple {
        Tuple(
            values
                .iter()
                .map(|v| match v {
                    Some(s) => TupleData::Text(Bytes::copy_from_slice(s.as_bytes())),
                    None => TupleData::Null,
                })
                .collect(),
        )
    }

    #[test]
    fn test_tuple_to_json_types() {
        let rel = orders_relation();
        let tuple = text_tuple(&[Some("1"), Some("9.99"), Some("first")]);
        let row = tuple_to_json(&tuple, &rel);
        assert_eq!(row, json!({"id": 1, "total": 9.99, "note": "first"}));
    }

    #[test]
    fn test_tuple_to_json_null() {
        let rel = orders_relation();
        let tuple = text_tuple(&[Some("2"), None, None]);
        let row = tuple_to_json(&tuple, &rel);
        assert_eq!(row, json!({"id": 2, "total": null, "note": null}));
    }

    #[test]
    fn test_bool_and_json_columns() {
        assert_eq!(text_to_json(16, b"t"), json!(true));
        assert_eq!(text_to_json(16, b"f"), json!(false));
        assert_eq!(
            text_to_json(3802, br#"{"a": [1, 2]}"#),
            json!({"a": [1, 2]})
        );
    }

    #[test]
    fn test_bigint_larger_than_f64() {
        assert_eq!(
            text_to_json(20, b"9007199254740993"),
            json!(9007199254740993i64)
        );
    }

    #[test]
    fn test_insert_event() {
        let rel = orders_relation();
        let body = InsertBody {
            relation_id: rel.id,
            new_tuple: text_tuple(&[Some("1"), Some("9.99"), None]),
        };
        let event = ChangeEvent::from_insert(&rel, &body, 42);

        assert_eq!(event.op, ChangeOp::Insert);
        assert_eq!(event.schema, "public");
        assert_eq!(event.table, "orders");
        assert!(event.old_row.is_none());
        assert!(event.key.is_none());
        assert_eq!(event.lsn, 42);
    }

    #[test]
    fn test_update_event_separates_old_and_key() {
        let rel = orders_relation();
        let body = UpdateBody {
            relation_id: rel.id,
            old_tuple: Some(text_tuple(&[Some("1"), Some("9.99"), None])),
            key_tuple: None,
            new_tuple: text_tuple(&[Some("1"), Some("19.99"), None]),
        };
        let event = ChangeEvent::from_update(&rel, &body, 43);
        assert!(event.old_row.is_some());
        assert!(event.key.is_none());
        assert_eq!(event.new_row.as_ref().unwrap()["total"], json!(19.99));
    }

    #[test]
    fn test_delete_event_with_key_only() {
        let rel = orders_relation();
        let body = DeleteBody {
            relation_id: rel.id,
            old_tuple: None,
            key_tuple: Some(text_tuple(&[Some("1")])),
        };
        let event = ChangeEvent::from_delete(&rel, &body, 44);
        assert!(event.old_row.is_none());
        assert_eq!(event.key.as_ref().unwrap()["id"], json!(1));
    }

    #[test]
    fn test_op_display_is_uppercase() {
        assert_eq!(ChangeOp::Insert.to_string(), "INSERT");
        assert_eq!(ChangeOp::Update.to_string(), "UPDATE");
        assert_eq!(ChangeOp::Delete.to_string(), "DELETE");
    }

    #[test]
    fn test_format_lsn() {
        assert_eq!(format_lsn(0x0000000A0000_0BFF), "A/BFF");
        assert_eq!(format_lsn(0), "0/0");
    }
}
