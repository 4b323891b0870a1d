//! RPC message types (spec §6's wire grammar).
//!
//! Serialization format is explicitly a Non-goal (spec §1); the `Serialize`/
//! `Deserialize` derives here are ambient plumbing matching the teacher's
//! `raft.rs` message types, not a commitment to a specific wire encoding — the
//! `RpcClient` implementation chosen by an embedder picks the actual codec.

use bytes::Bytes;
use serde::Deserialize;
use serde::Serialize;

use crate::GroupId;
use crate::LogIndex;
use crate::NodeId;
use crate::Term;

/// One log entry's metadata, carried alongside raw entry bytes per spec §6
/// ("each entry contributes an `EntryMeta` ... plus raw bytes appended to the
/// request's `data` blob in request order").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMeta {
    pub term: Term,
    pub entry_type: EntryType,
    pub data_len: u64,
    pub peers: Option<Vec<NodeId>>,
    pub old_peers: Option<Vec<NodeId>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryType {
    Normal,
    ConfigChange,
    NoOp,
}

/// A single log entry as sent on the wire: metadata plus its raw payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub index: LogIndex,
    pub meta: EntryMeta,
    pub data: Bytes,
}

/// An RPC sent by the leader to replicate log entries, or as a zero-entry probe /
/// heartbeat (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesRequest {
    pub term: Term,
    pub group_id: GroupId,
    pub server_id: NodeId,
    pub peer_id: NodeId,
    pub prev_log_index: LogIndex,
    pub prev_log_term: Term,
    pub committed_index: LogIndex,
    pub entries: Vec<Entry>,
    /// Raw payload blob; in an implementation that packs entry bytes
    /// contiguously rather than inline on `Entry`, this is where they'd live.
    /// Kept empty when entries are self-contained, as here.
    pub data: Bytes,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesResponse {
    pub term: Term,
    pub success: bool,
    pub last_log_index: LogIndex,
}

/// An RPC sent by the leader to install a snapshot, identified by a URI the
/// follower fetches out-of-band (spec §6, §4.1 "Snapshot reader ownership").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallSnapshotRequest {
    pub term: Term,
    pub group_id: GroupId,
    pub server_id: NodeId,
    pub peer_id: NodeId,
    pub meta: SnapshotMeta,
    pub uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallSnapshotResponse {
    pub term: Term,
    pub success: bool,
}

/// Metadata describing a snapshot: the last log entry it covers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub last_included_index: LogIndex,
    pub last_included_term: Term,
}

/// An RPC instructing the follower to begin an election immediately, used for
/// leadership transfer (spec §4.8, glossary).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutNowRequest {
    pub term: Term,
    pub group_id: GroupId,
    pub server_id: NodeId,
    pub peer_id: NodeId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutNowResponse {
    pub term: Term,
    pub success: bool,
}
