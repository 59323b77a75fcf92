#![forbid(unsafe_code)]

use crate::control::protocol::codec;
use crate::control::{FailureKind, Request, Response, StatusReport};
use crate::error::Error;
use futures::{SinkExt, StreamExt};
use std::path::Path;
use tokio::net::UnixStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::debug;

/// Attempts at listing before giving up on a list that keeps growing.
const LIST_ATTEMPTS: usize = 3;

/// Connection to a running guard's control socket.
pub struct ControlClient {
    framed: Framed<UnixStream, LengthDelimitedCodec>,
}

impl ControlClient {
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self, Error> {
        let stream = UnixStream::connect(path.as_ref()).await?;
        Ok(Self {
            framed: Framed::new(stream, codec()),
        })
    }

    /// Send one request and wait for its response. A `Failed` response
    /// becomes [`Error::Remote`].
    pub async fn call(&mut self, request: &Request) -> Result<Response, Error> {
        self.framed.send(request.encode()?).await?;
        let frame = self.framed.next().await.ok_or(Error::ChannelClosed)??;
        match Response::decode(&frame)? {
            Response::Failed { kind, message } => Err(Error::Remote { kind, message }),
            response => Ok(response),
        }
    }

    pub async fn count(&mut self) -> Result<u64, Error> {
        match self.call(&Request::Count).await? {
            Response::Count(count) => Ok(count),
            other => Err(unexpected(&other)),
        }
    }

    /// The serialized pattern list, sized with a preceding count.
    pub async fn list(&mut self) -> Result<Vec<u8>, Error> {
        let mut attempt = 1;
        loop {
            let capacity = self.count().await?;
            match self.call(&Request::List { capacity }).await {
                Ok(Response::Patterns(patterns)) => return Ok(patterns),
                Ok(other) => return Err(unexpected(&other)),
                Err(Error::Remote {
                    kind: FailureKind::BufferTooSmall,
                    ..
                }) if attempt < LIST_ATTEMPTS => {
                    debug!(attempt, "pattern list grew while listing, retrying");
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    pub async fn add(&mut self, pattern: &[u8]) -> Result<(), Error> {
        let request = Request::Add {
            pattern: pattern.to_vec(),
        };
        match self.call(&request).await? {
            Response::Added => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    /// Remove a pattern and return the guard's new removal count.
    pub async fn remove(&mut self, pattern: &[u8]) -> Result<u64, Error> {
        let request = Request::Remove {
            pattern: pattern.to_vec(),
        };
        match self.call(&request).await? {
            Response::Removed { removal_count } => Ok(removal_count),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn flush(&mut self) -> Result<(), Error> {
        match self.call(&Request::Flush).await? {
            Response::Flushed => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn status(&mut self) -> Result<StatusReport, Error> {
        match self.call(&Request::Status).await? {
            Response::Status(report) => Ok(report),
            other => Err(unexpected(&other)),
        }
    }
}

fn unexpected(response: &Response) -> Error {
    Error::Codec(format!("unexpected response: {response:?}"))
}
