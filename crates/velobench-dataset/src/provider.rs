//! Conversation pool, samplers, and the dataset service

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;
use velobench_bus::{rpc_channel, Caller, Request};
use velobench_service::{Service, ServiceContext};
use velobench_core::context::derive_rng;
use velobench_core::types::{Conversation, ConversationId};
use velobench_core::{Error, Result};

/// The frozen conversation set. Single writer at build time, read-only
/// afterwards.
pub struct DatasetPool {
    conversations: Vec<Conversation>,
    by_id: HashMap<ConversationId, usize>,
}

impl DatasetPool {
    pub fn new(conversations: Vec<Conversation>) -> Self {
        let by_id = conversations
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id.clone(), i))
            .collect();
        Self {
            conversations,
            by_id,
        }
    }

    pub fn get(&self, id: &str) -> Result<&Conversation> {
        self.by_id
            .get(id)
            .map(|&i| &self.conversations[i])
            .ok_or_else(|| Error::ConversationNotFound(id.to_string()))
    }

    pub fn count(&self) -> usize {
        self.conversations.len()
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    /// `(conversation id, timestamp_ms)` pairs sorted by timestamp, for
    /// fixed-schedule replay.
    pub fn scheduled(&self) -> Vec<(ConversationId, u64)> {
        let mut entries: Vec<(ConversationId, u64)> = self
            .conversations
            .iter()
            .filter_map(|c| c.timestamp_ms.map(|ts| (c.id.clone(), ts)))
            .collect();
        entries.sort_by_key(|(_, ts)| *ts);
        entries
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleStrategy {
    Random,
    Sequential,
    Shuffle,
}

/// Seeded sampling over the pool. Random samples with replacement,
/// sequential wraps around, shuffle deals the pool out like a deck and
/// reshuffles when it empties.
pub struct DatasetSampler {
    strategy: SampleStrategy,
    rng: StdRng,
    cursor: usize,
    deck: Vec<usize>,
}

impl DatasetSampler {
    pub fn new(strategy: SampleStrategy, seed: u64) -> Self {
        Self {
            strategy,
            rng: derive_rng(seed, "dataset.sampler"),
            cursor: 0,
            deck: Vec::new(),
        }
    }

    pub fn next_index(&mut self, len: usize) -> usize {
        debug_assert!(len > 0);
        match self.strategy {
            SampleStrategy::Random => self.rng.random_range(0..len),
            SampleStrategy::Sequential => {
                let index = self.cursor % len;
                self.cursor += 1;
                index
            }
            SampleStrategy::Shuffle => {
                if self.deck.is_empty() {
                    self.deck = (0..len).collect();
                    self.deck.shuffle(&mut self.rng);
                }
                self.deck.pop().unwrap_or(0)
            }
        }
    }
}

/// Dataset lookups carried over the request/reply channel.
#[derive(Debug, Clone)]
pub enum DatasetQuery {
    GetById(ConversationId),
    SampleNext,
    Count,
    Scheduled,
}

#[derive(Debug, Clone)]
pub enum DatasetReply {
    Conversation(Box<Conversation>),
    Count(usize),
    Scheduled(Vec<(ConversationId, u64)>),
    NotFound(ConversationId),
}

/// Client handle to the dataset service.
#[derive(Clone)]
pub struct DatasetHandle {
    caller: Caller<DatasetQuery, DatasetReply>,
}

impl DatasetHandle {
    pub async fn get_by_id(&self, id: &str) -> Result<Conversation> {
        match self.caller.call(DatasetQuery::GetById(id.to_string())).await? {
            DatasetReply::Conversation(c) => Ok(*c),
            DatasetReply::NotFound(id) => Err(Error::ConversationNotFound(id)),
            other => Err(Error::Internal(format!("unexpected dataset reply {other:?}"))),
        }
    }

    pub async fn sample_next(&self) -> Result<Conversation> {
        match self.caller.call(DatasetQuery::SampleNext).await? {
            DatasetReply::Conversation(c) => Ok(*c),
            other => Err(Error::Internal(format!("unexpected dataset reply {other:?}"))),
        }
    }

    pub async fn count(&self) -> Result<usize> {
        match self.caller.call(DatasetQuery::Count).await? {
            DatasetReply::Count(n) => Ok(n),
            other => Err(Error::Internal(format!("unexpected dataset reply {other:?}"))),
        }
    }

    pub async fn scheduled(&self) -> Result<Vec<(ConversationId, u64)>> {
        match self.caller.call(DatasetQuery::Scheduled).await? {
            DatasetReply::Scheduled(entries) => Ok(entries),
            other => Err(Error::Internal(format!("unexpected dataset reply {other:?}"))),
        }
    }
}

/// Serves the pool over request/reply for the lifetime of the run.
pub struct DatasetService {
    pool: Arc<DatasetPool>,
    sampler: DatasetSampler,
    requests: mpsc::Receiver<Request<DatasetQuery, DatasetReply>>,
}

impl DatasetService {
    pub fn new(pool: Arc<DatasetPool>, strategy: SampleStrategy, seed: u64) -> (Self, DatasetHandle) {
        let (caller, requests) = rpc_channel("dataset", 64);
        (
            Self {
                pool,
                sampler: DatasetSampler::new(strategy, seed),
                requests,
            },
            DatasetHandle { caller },
        )
    }

    fn serve(&mut self, query: &DatasetQuery) -> DatasetReply {
        match query {
            DatasetQuery::GetById(id) => match self.pool.get(id) {
                Ok(c) => DatasetReply::Conversation(Box::new(c.clone())),
                Err(_) => DatasetReply::NotFound(id.clone()),
            },
            DatasetQuery::SampleNext => {
                let index = self.sampler.next_index(self.pool.count());
                DatasetReply::Conversation(Box::new(self.pool.conversations()[index].clone()))
            }
            DatasetQuery::Count => DatasetReply::Count(self.pool.count()),
            DatasetQuery::Scheduled => DatasetReply::Scheduled(self.pool.scheduled()),
        }
    }
}

#[async_trait]
impl Service for DatasetService {
    fn name(&self) -> &'static str {
        "dataset"
    }

    async fn run(&mut self, ctx: ServiceContext) -> Result<()> {
        debug!(conversations = self.pool.count(), "dataset service serving");
        loop {
            tokio::select! {
                request = self.requests.recv() => match request {
                    Some(request) => {
                        let reply = self.serve(request.payload());
                        request.respond(reply);
                    }
                    None => return Ok(()),
                },
                _ = ctx.shutdown.cancelled() => return Ok(()),
            }
        }
    }
}
