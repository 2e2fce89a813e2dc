//! Push/pull sync (spec §4.3).

pub mod engine;
pub mod puller;
pub mod pusher;
pub mod wire;

pub use engine::SyncEngine;
pub use puller::{HttpPuller, Puller};
pub use pusher::{HttpPusher, Pusher};
