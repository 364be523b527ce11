//! pgoutput decoder
//!
//! Decodes the binary pgoutput stream (protocol version 1) into
//! [`PgOutputMessage`] values. Unknown message tags produce a
//! [`DecodeError::UnknownTag`], which the subscriber treats as a skip,
//! not a stream abort.

use super::message::*;
use bytes::{Buf, Bytes};
use thiserror::Error;

/// Decoder errors
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Not enough data")]
    NotEnoughData,
    #[error("Unknown message tag: {0:#04x}")]
    UnknownTag(u8),
    #[error("UTF8 error: {0}")]
    Utf8Error(#[from] std::str::Utf8Error),
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Decode one pgoutput message from a WAL data payload.
pub fn decode(data: &mut Bytes) -> Result<PgOutputMessage, DecodeError> {
    if !data.has_remaining() {
        return Err(DecodeError::NotEnoughData);
    }

    let tag = data.get_u8();
    match tag {
        b'B' => decode_begin(data).map(PgOutputMessage::Begin),
        b'C' => decode_commit(data).map(PgOutputMessage::Commit),
        b'O' => decode_origin(data).map(PgOutputMessage::Origin),
        b'R' => decode_relation(data).map(PgOutputMessage::Relation),
        b'Y' => decode_type(data).map(PgOutputMessage::Type),
        b'I' => decode_insert(data).map(PgOutputMessage::Insert),
        b'U' => decode_update(data).map(PgOutputMessage::Update),
        b'D' => decode_delete(data).map(PgOutputMessage::Delete),
        b'T' => decode_truncate(data).map(PgOutputMessage::Truncate),
        t => Err(DecodeError::UnknownTag(t)),
    }
}

fn ensure(buf: &Bytes, n: usize) -> Result<(), DecodeError> {
    if buf.remaining() < n {
        return Err(DecodeError::NotEnoughData);
    }
    Ok(())
}

fn decode_begin(buf: &mut Bytes) -> Result<BeginBody, DecodeError> {
    ensure(buf, 20)?;
    Ok(BeginBody {
        final_lsn: buf.get_u64(),
        timestamp: buf.get_i64(),
        xid: buf.get_u32(),
    })
}

fn decode_commit(buf: &mut Bytes) -> Result<CommitBody, DecodeError> {
    ensure(buf, 25)?;
    Ok(CommitBody {
        flags: buf.get_u8(),
        commit_lsn: buf.get_u64(),
        end_lsn: buf.get_u64(),
        timestamp: buf.get_i64(),
    })
}

fn decode_origin(buf: &mut Bytes) -> Result<OriginBody, DecodeError> {
    ensure(buf, 8)?;
    let commit_lsn = buf.get_u64();
    let name = read_cstring(buf)?;
    Ok(OriginBody { commit_lsn, name })
}

fn decode_relation(buf: &mut Bytes) -> Result<RelationBody, DecodeError> {
    ensure(buf, 4)?;
    let id = buf.get_u32();
    let namespace = read_cstring(buf)?;
    let name = read_cstring(buf)?;
    ensure(buf, 3)?;
    let replica_identity = buf.get_u8();
    let num_columns = buf.get_u16();

    let mut columns = Vec::with_capacity(num_columns as usize);
    for _ in 0..num_columns {
        ensure(buf, 1)?;
        let flags = buf.get_u8();
        let col_name = read_cstring(buf)?;
        ensure(buf, 8)?;
        let type_id = buf.get_i32();
        let type_mode = buf.get_i32();
        columns.push(Column {
            flags,
            name: col_name,
            type_id,
            type_mode,
        });
    }

    Ok(RelationBody {
        id,
        namespace,
        name,
        replica_identity,
        columns,
    })
}

fn decode_type(buf: &mut Bytes) -> Result<TypeBody, DecodeError> {
    ensure(buf, 4)?;
    let id = buf.get_u32();
    let namespace = read_cstring(buf)?;
    let name = read_cstring(buf)?;
    Ok(TypeBody {
        id,
        namespace,
        name,
    })
}

fn decode_insert(buf: &mut Bytes) -> Result<InsertBody, DecodeError> {
    ensure(buf, 5)?;
    let relation_id = buf.get_u32();
    let tag = buf.get_u8();
    if tag != b'N' {
        return Err(DecodeError::Protocol(format!(
            "Expected new tuple tag 'N' in insert, got {:#04x}",
            tag
        )));
    }
    let new_tuple = decode_tuple(buf)?;
    Ok(InsertBody {
        relation_id,
        new_tuple,
    })
}

fn decode_update(buf: &mut Bytes) -> Result<UpdateBody, DecodeError> {
    ensure(buf, 5)?;
    let relation_id = buf.get_u32();
    let tag = buf.get_u8();

    let (old_tuple, key_tuple, new_tuple) = match tag {
        b'O' => {
            let old = decode_tuple(buf)?;
            expect_new_tag(buf)?;
            (Some(old), None, decode_tuple(buf)?)
        }
        b'K' => {
            let key = decode_tuple(buf)?;
            expect_new_tag(buf)?;
            (None, Some(key), decode_tuple(buf)?)
        }
        b'N' => (None, None, decode_tuple(buf)?),
        t => {
            return Err(DecodeError::Protocol(format!(
                "Unexpected tuple tag {:#04x} in update",
                t
            )))
        }
    };

    Ok(UpdateBody {
        relation_id,
        old_tuple,
        key_tuple,
        new_tuple,
    })
}

fn decode_delete(buf: &mut Bytes) -> Result<DeleteBody, DecodeError> {
    ensure(buf, 5)?;
    let relation_id = buf.get_u32();
    let tag = buf.get_u8();

    let (old_tuple, key_tuple) = match tag {
        b'O' => (Some(decode_tuple(buf)?), None),
        b'K' => (None, Some(decode_tuple(buf)?)),
        t => {
            return Err(DecodeError::Protocol(format!(
                "Unexpected tuple tag {:#04x} in delete",
                t
            )))
        }
    };

    Ok(DeleteBody {
        relation_id,
        old_tuple,
        key_tuple,
    })
}

fn decode_truncate(buf: &mut Bytes) -> Result<TruncateBody, DecodeError> {
    ensure(buf, 5)?;
    let num_rels = buf.get_u32();
    let options = buf.get_u8();
    let mut relation_ids = Vec::with_capacity(num_rels as usize);
    for _ in 0..num_rels {
        ensure(buf, 4)?;
        relation_ids.push(buf.get_u32());
    }
    Ok(TruncateBody {
        options,
        relation_ids,
    })
}

fn expect_new_tag(buf: &mut Bytes) -> Result<(), DecodeError> {
    ensure(buf, 1)?;
    let tag = buf.get_u8();
    if tag != b'N' {
        return Err(DecodeError::Protocol(format!(
            "Expected new tuple tag 'N' after old/key tuple, got {:#04x}",
            tag
        )));
    }
    Ok(())
}

fn read_cstring(buf: &mut Bytes) -> Result<String, DecodeError> {
    let n = buf
        .iter()
        .position(|&b| b == 0)
        .ok_or(DecodeError::NotEnoughData)?;
    let s_bytes = buf.copy_to_bytes(n);
    buf.advance(1); // null terminator
    Ok(std::str::from_utf8(&s_bytes)?.to_string())
}

fn decode_tuple(buf: &mut Bytes) -> Result<Tuple, DecodeError> {
    ensure(buf, 2)?;
    let num_cols = buf.get_u16();
    let mut columns = Vec::with_capacity(num_cols as usize);

    for _ in 0..num_cols {
        ensure(buf, 1)?;
        let data = match buf.get_u8() {
            b'n' => TupleData::Null,
            b'u' => TupleData::Toast,
            b't' => {
                ensure(buf, 4)?;
                let len = buf.get_u32() as usize;
                ensure(buf, len)?;
                TupleData::Text(buf.copy_to_bytes(len))
            }
            t => return Err(DecodeError::UnknownTag(t)),
        };
        columns.push(data);
    }

    Ok(Tuple(columns))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{BufMut, BytesMut};

    fn put_cstring(buf: &mut BytesMut, s: &str) {
        buf.put_slice(s.as_bytes());
        buf.put_u8(0);
    }

    fn put_text_tuple(buf: &mut BytesMut, values: &[Option<&str>]) {
        buf.put_u16(values.len() as u16);
        for v in values {
            match v {
                Some(text) => {
                    buf.put_u8(b't');
                    buf.put_u32(text.len() as u32);
                    buf.put_slice(text.as_bytes());
                }
                None => buf.put_u8(b'n'),
            }
        }
    }

    fn relation_message() -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(b'R');
        buf.put_u32(16385);
        put_cstring(&mut buf, "public");
        put_cstring(&mut buf, "orders");
        buf.put_u8(b'f'); // replica identity FULL
        buf.put_u16(2);
        for (name, oid) in [("id", 23), ("total", 1700)] {
            buf.put_u8(0);
            put_cstring(&mut buf, name);
            buf.put_i32(oid);
            buf.put_i32(-1);
        }
        buf.freeze()
    }

    #[test]
    fn test_decode_begin() {
        let mut buf = BytesMut::new();
        buf.put_u8(b'B');
        buf.put_u64(0x0000000100000000);
        buf.put_i64(1705000000000000);
        buf.put_u32(771);

        let mut bytes = buf.freeze();
        match decode(&mut bytes).unwrap() {
            PgOutputMessage::Begin(body) => {
                assert_eq!(body.final_lsn, 0x0000000100000000);
                assert_eq!(body.xid, 771);
            }
            other => panic!("expected Begin, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_relation() {
        let mut bytes = relation_message();
        match decode(&mut bytes).unwrap() {
            PgOutputMessage::Relation(rel) => {
                assert_eq!(rel.id, 16385);
                assert_eq!(rel.namespace, "public");
                assert_eq!(rel.name, "orders");
                assert_eq!(rel.replica_identity, b'f');
                assert_eq!(rel.columns.len(), 2);
                assert_eq!(rel.columns[0].name, "id");
                assert_eq!(rel.columns[1].type_id, 1700);
            }
            other => panic!("expected Relation, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_insert() {
        let mut buf = BytesMut::new();
        buf.put_u8(b'I');
        buf.put_u32(16385);
        buf.put_u8(b'N');
        put_text_tuple(&mut buf, &[Some("1"), Some("9.99")]);

        let mut bytes = buf.freeze();
        match decode(&mut bytes).unwrap() {
            PgOutputMessage::Insert(ins) => {
                assert_eq!(ins.relation_id, 16385);
                assert_eq!(ins.new_tuple.0.len(), 2);
            }
            other => panic!("expected Insert, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_update_with_full_old_row() {
        let mut buf = BytesMut::new();
        buf.put_u8(b'U');
        buf.put_u32(16385);
        buf.put_u8(b'O');
        put_text_tuple(&mut buf, &[Some("1"), Some("9.99")]);
        buf.put_u8(b'N');
        put_text_tuple(&mut buf, &[Some("1"), Some("19.99")]);

        let mut bytes = buf.freeze();
        match decode(&mut bytes).unwrap() {
            PgOutputMessage::Update(upd) => {
                assert!(upd.old_tuple.is_some());
                assert!(upd.key_tuple.is_none());
            }
            other => panic!("expected Update, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_update_with_key_only() {
        let mut buf = BytesMut::new();
        buf.put_u8(b'U');
        buf.put_u32(16385);
        buf.put_u8(b'K');
        put_text_tuple(&mut buf, &[Some("1")]);
        buf.put_u8(b'N');
        put_text_tuple(&mut buf, &[Some("1"), Some("19.99")]);

        let mut bytes = buf.freeze();
        match decode(&mut bytes).unwrap() {
            PgOutputMessage::Update(upd) => {
                assert!(upd.old_tuple.is_none());
                assert!(upd.key_tuple.is_some());
            }
            other => panic!("expected Update, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_delete_with_null_column() {
        let mut buf = BytesMut::new();
        buf.put_u8(b'D');
        buf.put_u32(16385);
        buf.put_u8(b'O');
        put_text_tuple(&mut buf, &[Some("1"), None]);

        let mut bytes = buf.freeze();
        match decode(&mut bytes).unwrap() {
            PgOutputMessage::Delete(del) => {
                let old = del.old_tuple.unwrap();
                assert!(matches!(old.0[1], TupleData::Null));
            }
            other => panic!("expected Delete, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_tag_is_reported() {
        let mut bytes = Bytes::from_static(&[b'Z', 0, 0]);
        assert!(matches!(
            decode(&mut bytes),
            Err(DecodeError::UnknownTag(b'Z'))
        ));
    }

    #[test]
    fn test_truncated_message() {
        let mut bytes = Bytes::from_static(&[b'B', 0, 1]);
        assert!(matches!(
            decode(&mut bytes),
            Err(DecodeError::NotEnoughData)
        ));
    }
}
