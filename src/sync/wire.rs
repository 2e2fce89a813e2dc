//! Push/pull wire types (spec §6 "Protocol").
//!
//! Mirrors the request/response shapes a Replicache-style sync endpoint
//! expects: push is fire-and-forget (the server acknowledges mutations by
//! advancing `lastMutationID`, not via the push response itself), pull
//! returns a cookie-addressed patch relative to the client's last-seen
//! cookie.

use crate::mutation::Mutation;
use serde_derive::{Deserialize, Serialize};
use serde_json::Value;

/// Bumped whenever the push wire format changes incompatibly (spec §6).
pub const PUSH_VERSION: u32 = 1;
/// Bumped whenever the pull wire format changes incompatibly (spec §6).
pub const PULL_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    pub push_version: u32,
    pub client_id: String,
    pub schema_version: String,
    pub mutations: Vec<Mutation>,
}

/// One rejected mutation from a push (spec §6): only mutations the server
/// didn't apply show up here at all, and `error` describes why. Advisory
/// only -- the mutation still counts as delivered and stays in the pending
/// log; only a later pull's `lastMutationID` retires it (spec §4.3 pt 3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationInfo {
    pub id: u64,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    #[serde(default)]
    pub mutation_infos: Vec<MutationInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    pub pull_version: u32,
    pub client_id: String,
    pub schema_version: String,
    pub cookie: Value,
    pub last_mutation_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    pub cookie: Value,
    pub last_mutation_id: u64,
    pub patch: Vec<PatchOp>,
}

/// One operation in a pull patch, applied in order against the client's
/// base content (spec §4.3 "Patch application"). Clear-all isn't a
/// distinct op on the wire: it's a `del` with an empty key (spec §4.3,
/// §6 `Op = put | del`), applied before the ops that follow it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOp {
    Put { key: String, value: Value },
    Del { key: String },
}
