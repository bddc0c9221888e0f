//! Peer transport: fetching chains and pushing blocks and transactions.

use crate::block::Block;
use crate::transaction::LedgerTransaction;
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Failures talking to a peer.
#[derive(Debug, Error)]
pub enum PeerError {
    /// The request could not be sent or the response could not be read.
    #[error("request to {peer} failed: {reason}")]
    Request {
        /// Peer base URL.
        peer: String,
        /// Underlying failure.
        reason: String,
    },
    /// The peer answered with a non-success status.
    #[error("peer {peer} answered {status}: {body}")]
    Status {
        /// Peer base URL.
        peer: String,
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },
    /// The response body did not decode as a chain.
    #[error("peer {peer} sent an undecodable chain: {reason}")]
    Decode {
        /// Peer base URL.
        peer: String,
        /// Decoder message.
        reason: String,
    },
    /// The peer did not answer within the configured timeout.
    #[error("peer {0} timed out")]
    Timeout(String),
    /// The transport is not available.
    #[error("peer {0} is unreachable")]
    Unreachable(String),
}

/// Operations a node needs from its peers.
pub trait PeerTransport: Send + Sync {
    /// Downloads the full chain served by `peer`.
    fn fetch_chain<'a>(&'a self, peer: &'a str) -> BoxFuture<'a, Result<Vec<Block>, PeerError>>;

    /// Announces a freshly sealed block.
    fn push_block<'a>(
        &'a self,
        peer: &'a str,
        block: &'a Block,
    ) -> BoxFuture<'a, Result<(), PeerError>>;

    /// Relays an admitted transaction.
    fn push_transaction<'a>(
        &'a self,
        peer: &'a str,
        tx: &'a LedgerTransaction,
    ) -> BoxFuture<'a, Result<(), PeerError>>;
}

/// JSON over HTTP: `GET {peer}/chain`, `POST {peer}/blocks`,
/// `POST {peer}/transactions`.
#[derive(Debug, Clone)]
pub struct HttpPeerTransport {
    client: Client,
}

impl HttpPeerTransport {
    /// Builds a client whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, PeerError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| PeerError::Request {
                peer: "-".to_string(),
                reason: err.to_string(),
            })?;
        Ok(Self { client })
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        peer: &str,
        path: &str,
        body: &T,
    ) -> Result<(), PeerError> {
        let resp = self
            .client
            .post(endpoint(peer, path))
            .json(body)
            .send()
            .await
            .map_err(|err| request_error(peer, err))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(PeerError::Status {
                peer: peer.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    async fn get_chain(&self, peer: &str) -> Result<Vec<Block>, PeerError> {
        let resp = self
            .client
            .get(endpoint(peer, "chain"))
            .send()
            .await
            .map_err(|err| request_error(peer, err))?;
        let status = resp.status();
        let text = resp.text().await.map_err(|err| request_error(peer, err))?;
        if !status.is_success() {
            return Err(PeerError::Status {
                peer: peer.to_string(),
                status: status.as_u16(),
                body: text,
            });
        }
        serde_json::from_str(&text).map_err(|err| PeerError::Decode {
            peer: peer.to_string(),
            reason: err.to_string(),
        })
    }
}

impl PeerTransport for HttpPeerTransport {
    fn fetch_chain<'a>(&'a self, peer: &'a str) -> BoxFuture<'a, Result<Vec<Block>, PeerError>> {
        self.get_chain(peer).boxed()
    }

    fn push_block<'a>(
        &'a self,
        peer: &'a str,
        block: &'a Block,
    ) -> BoxFuture<'a, Result<(), PeerError>> {
        self.post(peer, "blocks", block).boxed()
    }

    fn push_transaction<'a>(
        &'a self,
        peer: &'a str,
        tx: &'a LedgerTransaction,
    ) -> BoxFuture<'a, Result<(), PeerError>> {
        self.post(peer, "transactions", tx).boxed()
    }
}

fn endpoint(peer: &str, path: &str) -> String {
    format!("{}/{}", peer.trim_end_matches('/'), path)
}

fn request_error(peer: &str, err: reqwest::Error) -> PeerError {
    if err.is_timeout() {
        PeerError::Timeout(peer.to_string())
    } else {
        PeerError::Request {
            peer: peer.to_string(),
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_paths() {
        assert_eq!(endpoint("http://a:1/", "chain"), "http://a:1/chain");
        assert_eq!(endpoint("http://a:1", "blocks"), "http://a:1/blocks");
    }

    #[test]
    fn test_http_transport_builds() {
        assert!(HttpPeerTransport::new(Duration::from_millis(250)).is_ok());
    }
}
