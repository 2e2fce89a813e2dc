//! The push side of the sync protocol (spec §4.3).

use crate::error::{CResult, Error};
use crate::sync::wire::{PushRequest, PushResponse};
use std::future::Future;
use std::pin::Pin;

pub trait Pusher: Send + Sync {
    fn push<'a>(&'a self, url: &'a str, auth: Option<&'a str>, req: PushRequest) -> Pin<Box<dyn Future<Output = CResult<PushResponse>> + Send + 'a>>;
}

pub struct HttpPusher {
    client: reqwest::Client,
}

impl HttpPusher {
    pub fn new() -> Self {
        HttpPusher { client: reqwest::Client::new() }
    }
}

impl Default for HttpPusher {
    fn default() -> Self {
        Self::new()
    }
}

impl Pusher for HttpPusher {
    fn push<'a>(&'a self, url: &'a str, auth: Option<&'a str>, req: PushRequest) -> Pin<Box<dyn Future<Output = CResult<PushResponse>> + Send + 'a>> {
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
            resp.json::<PushResponse>().await.map_err(|e| Error::ProtocolError(e.to_string()))
        })
    }
}
