//! The pending mutation log (spec §3 "Mutation", §4.3 "Push path").

use serde_derive::{Deserialize, Serialize};
use serde_json::Value;

/// A named mutator invocation with its arguments, identified by a
/// strictly monotonic per-client id. Persisted until the server
/// acknowledges `id <= lastMutationID` on a subsequent pull.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mutation {
    pub id: u64,
    pub name: String,
    pub args: Value,
}
