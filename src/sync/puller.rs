//! The pull side of the sync protocol (spec §4.3). A trait, not a bare
//! `reqwest::Client` call, so the engine's rebase logic can be exercised
//! against a fake transport in tests.

use crate::error::{CResult, Error};
use crate::sync::wire::{PullRequest, PullResponse};
use std::future::Future;
use std::pin::Pin;

pub trait Puller: Send + Sync {
    fn pull<'a>(&'a self, url: &'a str, auth: Option<&'a str>, req: PullRequest) -> Pin<Box<dyn Future<Output = CResult<PullResponse>> + Send + 'a>>;
}

pub struct HttpPuller {
    client: reqwest::Client,
}

impl HttpPuller {
    pub fn new() -> Self {
        HttpPuller { client: reqwest::Client::new() }
    }
}

impl Default for HttpPuller {
    fn default() -> Self {
        Self::new()
    }
}

impl Puller for HttpPuller {
    fn pull<'a>(&'a self, url: &'a str, auth: Option<&'a str>, req: PullRequest) -> Pin<Box<dyn Future<Output = CResult<PullResponse>> + Send + 'a>> {
        Box::pin(async move {
            let mut builder = self.client.post(url).json(&req);
            if let Some(auth) = auth {
                builder = builder.header("Authorization", auth);
            }
            let resp = builder.send().await.map_err(|e| Error::Transport(e.to_string()))?;
            let status = resp.status();
            if status.as_u16() == 401 {
                return Err(Error::Unauthorized);
            }
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(Error::HttpError(status.as_u16(), body));
            }
            resp.json::<PullResponse>().await.map_err(|e| Error::ProtocolError(e.to_string()))
        })
    }
}
