//! Streaming replication protocol
//!
//! - [`client`]: TCP client (auth, START_REPLICATION, status updates)
//! - [`decoder`]: binary pgoutput decoder
//! - [`message`]: typed pgoutput messages
//! - [`scram`]: SCRAM-SHA-256 SASL exchange

pub mod client;
pub mod decoder;
pub mod message;
pub mod scram;

pub use client::{ReplicationClient, ReplicationStream};
pub use decoder::{decode, DecodeError};
pub use message::{
    BeginBody, Column, CommitBody, DeleteBody, InsertBody, OriginBody, PgOutputMessage,
    RelationBody, Tuple, TupleData, TypeBody, UpdateBody,
};
