//! In-process implementation of the [`ListBus`] port.
//!
//! A broadcast channel per list; every hub holding a clone of the bus sees
//! every published frame, which makes multi-hub fanout testable in one
//! process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;

use crate::domain::ports::{BusError, BusStream, ListBus};

/// Frames buffered per channel before slow subscribers start lagging.
const CHANNEL_CAPACITY: usize = 256;

/// Broadcast-backed bus for single-process deployments and tests.
#[derive(Clone, Default)]
pub struct MemoryListBus {
    channels: Arc<Mutex<HashMap<i64, broadcast::Sender<Bytes>>>>,
}

impl MemoryListBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, list_id: i64) -> broadcast::Sender<Bytes> {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(list_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl ListBus for MemoryListBus {
    async fn publish(&self, list_id: i64, payload: Bytes) -> Result<(), BusError> {
        // A send with no live subscribers is not a failure; the frame is
        // simply dropped, as with a pub/sub broker.
        let _ = self.sender(list_id).send(payload);
        Ok(())
    }

    async fn subscribe(&self, list_id: i64) -> Result<BusStream, BusError> {
        let receiver = self.sender(list_id).subscribe();
        let stream = futures_util::stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(payload) => return Some((payload, receiver)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(Box::pin(stream))
    }
}
