//! `synckv` replicates a key-value store to a client for offline-first use.
//! Applications register named mutators; invocations run locally against a
//! transactional store, are persisted as a pending mutation log, and are
//! replayed against a server over a push channel. A pull channel returns
//! an authoritative patch relative to a cookie, and pending mutations are
//! rebased on top of it. Subscriptions re-run their query whenever a
//! commit's write set could have changed the result.
//!
//! ## Getting started
//!
//! ```rust
//! use serde_json::json;
//! use synckv::config::Options;
//! use synckv::error::Error;
//! use synckv::store::Store;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let store = Store::open(&Options::memory("demo"))?;
//!     store.register("put", |tx, args| {
//!         tx.put(args["key"].as_str().unwrap(), args["value"].clone())
//!     });
//!
//!     store.mutate("put", json!({"key": "a", "value": 1})).await?;
//!     let value = store.read_tx(|tx| tx.get("a")).await?;
//!     assert_eq!(value, Some(json!(1)));
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod client;
pub mod commit;
pub mod config;
pub mod error;
pub mod index;
pub mod keyspace;
pub mod loop_;
pub mod mutation;
pub mod overlay;
pub mod scan;
pub mod store;
pub mod subscription;
pub mod sync;
pub mod txn;
pub mod value;
