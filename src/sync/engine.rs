//! Drives one push or one pull cycle against a [`Store`] (spec §4.3).
//! Reauthentication is handled here: a 401 triggers the configured
//! refresher and a retry, capped at eight attempts per cycle so a
//! refresher that always hands back an already-expired credential can't
//! spin forever.

use crate::error::{CResult, Error};
use crate::store::{PullOutcome, Store};
use crate::sync::puller::Puller;
use crate::sync::pusher::Pusher;
use crate::sync::wire::{PullRequest, PushRequest, PULL_VERSION, PUSH_VERSION};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

const MAX_REAUTH_ATTEMPTS: u32 = 8;

pub type AuthRefresher = Arc<dyn Fn() -> CResult<String> + Send + Sync>;

pub struct SyncEngine<P, U> {
    store: Arc<Store>,
    puller: P,
    pusher: U,
    pull_url: Option<String>,
    push_url: Option<String>,
    schema_version: String,
    pull_auth: AsyncMutex<Option<String>>,
    push_auth: AsyncMutex<Option<String>>,
    pull_refresher: Option<AuthRefresher>,
    push_refresher: Option<AuthRefresher>,
}

impl<P: Puller, U: Pusher> SyncEngine<P, U> {
    pub fn new(store: Arc<Store>, puller: P, pusher: U) -> Self {
        SyncEngine {
            store,
            puller,
            pusher,
            pull_url: None,
            push_url: None,
            schema_version: String::new(),
            pull_auth: AsyncMutex::new(None),
            push_auth: AsyncMutex::new(None),
            pull_refresher: None,
            push_refresher: None,
        }
    }

    pub fn with_pull_url(mut self, url: impl Into<String>) -> Self {
        self.pull_url = Some(url.into());
        self
    }

    pub fn with_push_url(mut self, url: impl Into<String>) -> Self {
        self.push_url = Some(url.into());
        self
    }

    pub fn with_schema_version(mut self, version: impl Into<String>) -> Self {
        self.schema_version = version.into();
        self
    }

    pub fn with_pull_auth(mut self, initial: Option<String>, refresher: Option<AuthRefresher>) -> Self {
        self.pull_auth = AsyncMutex::new(initial);
        self.pull_refresher = refresher;
        self
    }

    pub fn with_push_auth(mut self, initial: Option<String>, refresher: Option<AuthRefresher>) -> Self {
        self.push_auth = AsyncMutex::new(initial);
        self.push_refresher = refresher;
        self
    }

    pub async fn pull(&self) -> CResult<PullOutcome> {
        let url = self.pull_url.as_deref().ok_or_else(|| Error::Internal("pull_url not configured".into()))?;
        let snapshot = self.store.begin_pull().await;
        let mut auth = self.pull_auth.lock().await.clone();
        let mut attempts = 0u32;

        loop {
            let req = PullRequest {
                pull_version: PULL_VERSION,
                client_id: self.store.client_id().to_string(),
                schema_version: self.schema_version.clone(),
                cookie: snapshot.cookie.clone(),
                last_mutation_id: snapshot.last_mutation_id,
            };
            match self.puller.pull(url, auth.as_deref(), req).await {
                Ok(resp) => {
                    return self.store.end_pull(&snapshot, resp.cookie, resp.last_mutation_id, resp.patch).await;
                }
                Err(Error::Unauthorized) => {
                    attempts += 1;
                    if attempts > MAX_REAUTH_ATTEMPTS {
                        return Err(Error::ReauthLimit);
                    }
                    let refresher = self.pull_refresher.as_ref().ok_or(Error::Unauthorized)?;
                    let fresh = refresher()?;
                    *self.pull_auth.lock().await = Some(fresh.clone());
                    auth = Some(fresh);
                    log::debug!("pull reauthenticated (attempt {attempts})");
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn push(&self) -> CResult<()> {
        let url = self.push_url.as_deref().ok_or_else(|| Error::Internal("push_url not configured".into()))?;
        let mutations = self.store.pending_mutations().await;
        if mutations.is_empty() {
            return Ok(());
        }
        let mut auth = self.push_auth.lock().await.clone();
        let mut attempts = 0u32;

        loop {
            let req = PushRequest {
                push_version: PUSH_VERSION,
                client_id: self.store.client_id().to_string(),
                schema_version: self.schema_version.clone(),
                mutations: mutations.clone(),
            };
            match self.pusher.push(url, auth.as_deref(), req).await {
                Ok(resp) => {
                    // Per-mutation errors are advisory (spec §4.3 pt 3): the
                    // server still accepted the push, so mutations stay
                    // pending until a pull acknowledges them. Only logged,
                    // never surfaced as a cycle failure.
                    for info in &resp.mutation_infos {
                        log::warn!("mutation {} rejected by server: {}", info.id, info.error);
                    }
                    return Ok(());
                }
                Err(Error::Unauthorized) => {
                    attempts += 1;
                    if attempts > MAX_REAUTH_ATTEMPTS {
                        return Err(Error::ReauthLimit);
                    }
                    let refresher = self.push_refresher.as_ref().ok_or(Error::Unauthorized)?;
                    let fresh = refresher()?;
                    *self.push_auth.lock().await = Some(fresh.clone());
                    auth = Some(fresh);
                    log::debug!("push reauthenticated (attempt {attempts})");
                }
                Err(e) => return Err(e),
            }
        }
    }
}
