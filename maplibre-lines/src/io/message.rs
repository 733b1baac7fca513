//! Request/response contract of the message channel which resolves glyphs, icons and tiles
//! while buckets are built.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::{coords::WorldTileCoords, render::atlas::ImagePosition};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    GetGlyphs,
    GetIcons,
    GetTile,
}

impl Action {
    pub fn name(self) -> &'static str {
        match self {
            Action::GetGlyphs => "get-glyphs",
            Action::GetIcons => "get-icons",
            Action::GetTile => "get-tile",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResourceRequest {
    /// Glyph ids per font stack.
    Glyphs { stacks: BTreeMap<String, Vec<u32>> },
    /// Image names, sorted and deduplicated.
    Icons { icons: Vec<String> },
    Tile { coords: WorldTileCoords },
}

impl ResourceRequest {
    pub fn action(&self) -> Action {
        match self {
            ResourceRequest::Glyphs { .. } => Action::GetGlyphs,
            ResourceRequest::Icons { .. } => Action::GetIcons,
            ResourceRequest::Tile { .. } => Action::GetTile,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResourceResponse {
    /// Glyph ids per font stack which are available in the glyph atlas.
    Glyphs(BTreeMap<String, Vec<u32>>),
    /// Atlas positions of the requested images. Images which do not exist are absent.
    Icons(HashMap<String, ImagePosition>),
    Tile(Vec<u8>),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("message channel is closed")]
    Closed,
    #[error("request was dropped before a response was sent")]
    Dropped,
    #[error("responder failed: {0}")]
    Remote(String),
    #[error("unexpected response to {0}")]
    UnexpectedResponse(Action),
}

/// Asynchronous bridge to the thread which owns glyphs, images and tile sources.
///
/// Responses can be delayed arbitrarily and distinct requests complete in any order.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    async fn send(&self, request: ResourceRequest) -> Result<ResourceResponse, ChannelError>;
}

type Responder = oneshot::Sender<Result<ResourceResponse, ChannelError>>;

/// A request waiting for its response at the [`MessageEndpoint`].
#[derive(Debug)]
pub struct PendingRequest {
    request: ResourceRequest,
    respond_to: Responder,
}

impl PendingRequest {
    pub fn request(&self) -> &ResourceRequest {
        &self.request
    }

    /// Sends the response. Returns `false` if the requester is gone.
    pub fn respond(self, response: Result<ResourceResponse, ChannelError>) -> bool {
        self.respond_to.send(response).is_ok()
    }
}

/// Sending half of a tokio based message channel.
#[derive(Debug, Clone)]
pub struct TokioMessageChannel {
    sender: mpsc::UnboundedSender<PendingRequest>,
}

/// Receiving half of a tokio based message channel.
#[derive(Debug)]
pub struct MessageEndpoint {
    receiver: mpsc::UnboundedReceiver<PendingRequest>,
}

/// Creates a connected channel and endpoint.
pub fn channel() -> (TokioMessageChannel, MessageEndpoint) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (TokioMessageChannel { sender }, MessageEndpoint { receiver })
}

#[async_trait]
impl MessageChannel for TokioMessageChannel {
    async fn send(&self, request: ResourceRequest) -> Result<ResourceResponse, ChannelError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(PendingRequest {
                request,
                respond_to,
            })
            .map_err(|_| ChannelError::Closed)?;
        response.await.map_err(|_| ChannelError::Dropped)?
    }
}

impl MessageEndpoint {
    /// Waits for the next request. `None` once every channel handle is dropped.
    pub async fn next(&mut self) -> Option<PendingRequest> {
        self.receiver.recv().await
    }

    pub fn try_next(&mut self) -> Option<PendingRequest> {
        self.receiver.try_recv().ok()
    }

    /// Answers requests with `handler` until every channel handle is dropped.
    pub async fn serve<F>(mut self, mut handler: F)
    where
        F: FnMut(&ResourceRequest) -> Result<ResourceResponse, ChannelError>,
    {
        while let Some(pending) = self.next().await {
            let response = handler(pending.request());
            if !pending.respond(response) {
                tracing::debug!("requester dropped before response");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn responses_reach_the_requester() {
        let (channel, endpoint) = channel();
        tokio::spawn(endpoint.serve(|request| match request {
            ResourceRequest::Tile { .. } => Ok(ResourceResponse::Tile(vec![1, 2, 3])),
            other => Err(ChannelError::UnexpectedResponse(other.action())),
        }));

        let response = channel
            .send(ResourceRequest::Tile {
                coords: WorldTileCoords::default(),
            })
            .await;
        assert_eq!(response, Ok(ResourceResponse::Tile(vec![1, 2, 3])));

        let response = channel
            .send(ResourceRequest::Icons { icons: vec![] })
            .await;
        assert_eq!(
            response,
            Err(ChannelError::UnexpectedResponse(Action::GetIcons))
        );
    }

    #[tokio::test]
    async fn dropped_request_fails() {
        let (channel, mut endpoint) = channel();
        let request = tokio::spawn(async move {
            channel
                .send(ResourceRequest::Icons {
                    icons: vec!["dot".to_string()],
                })
                .await
        });

        let pending = endpoint.next().await.unwrap();
        assert_eq!(pending.request().action().name(), "get-icons");
        drop(pending);

        assert_eq!(request.await.unwrap(), Err(ChannelError::Dropped));
    }

    #[tokio::test]
    async fn closed_endpoint_fails() {
        let (channel, endpoint) = channel();
        drop(endpoint);

        let response = channel
            .send(ResourceRequest::Icons { icons: vec![] })
            .await;
        assert_eq!(response, Err(ChannelError::Closed));
    }
}
