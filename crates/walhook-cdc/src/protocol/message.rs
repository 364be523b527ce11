//! pgoutput protocol messages
//!
//! Typed representations of the logical replication messages walhook
//! consumes (protocol version 1).

use bytes::Bytes;

/// A decoded pgoutput message.
#[derive(Debug, Clone)]
pub enum PgOutputMessage {
    /// Transaction begin
    Begin(BeginBody),
    /// Transaction commit
    Commit(CommitBody),
    /// Replication origin
    Origin(OriginBody),
    /// Relation (table) definition; sent before the first row change of a
    /// relation and again whenever its schema changes
    Relation(RelationBody),
    /// Custom type definition
    Type(TypeBody),
    /// Row insert
    Insert(InsertBody),
    /// Row update
    Update(UpdateBody),
    /// Row delete
    Delete(DeleteBody),
    /// Table truncate
    Truncate(TruncateBody),
}

/// BEGIN message
#[derive(Debug, Clone)]
pub struct BeginBody {
    pub final_lsn: u64,
    pub timestamp: i64,
    pub xid: u32,
}

/// COMMIT message
#[derive(Debug, Clone)]
pub struct CommitBody {
    pub flags: u8,
    pub commit_lsn: u64,
    pub end_lsn: u64,
    pub timestamp: i64,
}

/// ORIGIN message
#[derive(Debug, Clone)]
pub struct OriginBody {
    pub commit_lsn: u64,
    pub name: String,
}

/// RELATION message (table definition)
#[derive(Debug, Clone)]
pub struct RelationBody {
    pub id: u32,
    pub namespace: String,
    pub name: String,
    pub replica_identity: u8,
    pub columns: Vec<Column>,
}

/// Column definition within a relation
#[derive(Debug, Clone)]
pub struct Column {
    pub flags: u8,
    pub name: String,
    pub type_id: i32,
    pub type_mode: i32,
}

/// TYPE message
#[derive(Debug, Clone)]
pub struct TypeBody {
    pub id: u32,
    pub namespace: String,
    pub name: String,
}

/// INSERT message
#[derive(Debug, Clone)]
pub struct InsertBody {
    pub relation_id: u32,
    pub new_tuple: Tuple,
}

/// UPDATE message
///
/// `old_tuple` carries the complete prior row image and is only present
/// when the relation has replica identity FULL (`'O'` tag). `key_tuple`
/// (`'K'` tag) carries just the replica-identity key columns.
#[derive(Debug, Clone)]
pub struct UpdateBody {
    pub relation_id: u32,
    pub old_tuple: Option<Tuple>,
    pub key_tuple: Option<Tuple>,
    pub new_tuple: Tuple,
}

/// DELETE message
///
/// Same `'O'`/`'K'` distinction as [`UpdateBody`].
#[derive(Debug, Clone)]
pub struct DeleteBody {
    pub relation_id: u32,
    pub old_tuple: Option<Tuple>,
    pub key_tuple: Option<Tuple>,
}

/// TRUNCATE message
#[derive(Debug, Clone)]
pub struct TruncateBody {
    pub relation_ids: Vec<u32>,
    pub options: u8,
}

/// Row tuple
#[derive(Debug, Clone)]
pub struct Tuple(pub Vec<TupleData>);

/// Column data within a tuple
#[derive(Debug, Clone)]
pub enum TupleData {
    /// NULL value
    Null,
    /// Unchanged TOASTed value
    Toast,
    /// Text representation of the value
    Text(Bytes),
}
