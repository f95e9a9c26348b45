//! Request dispatch: a bounded queue between the network boundary and the
//! storage engine.
//!
//! The network layer enqueues [`RequestEnvelope`]s onto a depth-100
//! channel; a single consumer drains it and spawns one worker per request.
//! Each worker runs the matching [`VectorStore`] method, wraps the outcome
//! in a [`ResponseEnvelope`], and sends it to the envelope's response
//! channel without blocking — an abandoned receiver just drops the reply.
//!
//! The envelope types are serde-derived; the server serializes them
//! directly onto its length-prefixed wire.

use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Sender, TrySendError};
use serde::{Deserialize, Serialize};

use crate::block::{Block, CollectionConfig, KeywordMode, SearchFilter, SearchHit};
use crate::config::DISPATCH_QUEUE_DEPTH;
use crate::error::{Result, StoreError};
use crate::hnsw::DistanceMetric;
use crate::storage::VectorStore;

/// Tagged union of every operation the store exposes on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Operation {
    CreateCollection {
        name: String,
        dimensions: u32,
        metric: DistanceMetric,
    },
    DeleteCollection {
        collection: String,
    },
    ListCollections,
    AppendBlock {
        collection: String,
        key: String,
        block: Block,
    },
    BatchAppend {
        collection: String,
        items: Vec<(String, Block)>,
    },
    GetBlock {
        collection: String,
        key: String,
        index: u32,
    },
    GetVector {
        collection: String,
        key: String,
        index: u32,
    },
    GetKey {
        collection: String,
        key: String,
    },
    GetKeyLength {
        collection: String,
        key: String,
    },
    DeleteKey {
        collection: String,
        key: String,
    },
    ListKeys {
        collection: String,
    },
    ContainsKey {
        collection: String,
        key: String,
    },
    Search {
        collection: String,
        query: Vec<f32>,
        top_k: u32,
        filter: SearchFilter,
    },
    SearchMoreLikeThis {
        collection: String,
        key: String,
        index: u32,
        top_k: u32,
    },
    SearchInKey {
        collection: String,
        key: String,
        query: Vec<f32>,
        top_k: u32,
    },
    KeywordSearch {
        collection: String,
        keywords: Vec<String>,
        mode: KeywordMode,
        max_distance: u32,
    },
    UpdateBlock {
        collection: String,
        key: String,
        index: u32,
        block: Block,
    },
    ReplaceBlock {
        collection: String,
        key: String,
        index: u32,
        block: Block,
    },
    SnapshotCollection {
        collection: String,
    },
    CompactCollection {
        collection: String,
    },
    GetRelativeBlocks {
        collection: String,
        key: String,
        index: u32,
        before: u32,
        after: u32,
    },
}

/// Result payload variants carried by a successful response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResponseData {
    Length(u64),
    KeyList(Vec<String>),
    CollectionList(Vec<CollectionConfig>),
    SearchList(Vec<SearchHit>),
    Block(Block),
    BlockList(Vec<Block>),
    BatchResult(Vec<bool>),
    Vector(Vec<f32>),
}

/// Wire-visible request: an id plus the operation to run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub request_id: String,
    pub operation: Operation,
}

/// Wire-visible response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub request_id: String,
    pub success: bool,
    pub error_message: String,
    pub result: Option<ResponseData>,
}

impl ResponseEnvelope {
    fn ok(request_id: String, result: Option<ResponseData>) -> Self {
        Self {
            request_id,
            success: true,
            error_message: String::new(),
            result,
        }
    }

    fn err(request_id: String, error: &StoreError) -> Self {
        Self {
            request_id,
            success: false,
            error_message: error.to_string(),
            result: None,
        }
    }
}

/// A queued request with its response channel.
pub struct RequestEnvelope {
    pub request_id: String,
    pub operation: Operation,
    pub respond_to: Sender<ResponseEnvelope>,
}

/// Handle to the running dispatch loop.
#[derive(Clone)]
pub struct Dispatcher {
    tx: Sender<RequestEnvelope>,
}

impl Dispatcher {
    /// Spawn the consumer thread and return the submit handle.
    pub fn start(store: Arc<VectorStore>) -> Self {
        let (tx, rx) = bounded::<RequestEnvelope>(DISPATCH_QUEUE_DEPTH);
        thread::spawn(move || {
            for envelope in rx {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    let response =
                        execute(&store, envelope.request_id.clone(), envelope.operation);
                    if let Err(TrySendError::Disconnected(_)) =
                        envelope.respond_to.try_send(response)
                    {
                        tracing::debug!(
                            request_id = %envelope.request_id,
                            "response channel abandoned"
                        );
                    }
                });
            }
        });
        Self { tx }
    }

    /// Enqueue a request, blocking while the queue is full.
    pub fn submit(&self, envelope: RequestEnvelope) -> Result<()> {
        self.tx
            .send(envelope)
            .map_err(|_| StoreError::Io(std::io::Error::other("dispatcher stopped")))
    }

    /// Submit a request and wait for its response.
    pub fn dispatch(&self, request_id: String, operation: Operation) -> Result<ResponseEnvelope> {
        let (respond_to, response_rx) = bounded(1);
        self.submit(RequestEnvelope {
            request_id,
            operation,
            respond_to,
        })?;
        response_rx
            .recv()
            .map_err(|_| StoreError::Io(std::io::Error::other("response channel closed")))
    }
}

/// Run one operation against the store and wrap the outcome.
fn execute(store: &VectorStore, request_id: String, operation: Operation) -> ResponseEnvelope {
    use Operation::*;

    let outcome: Result<Option<ResponseData>> = match operation {
        CreateCollection {
            name,
            dimensions,
            metric,
        } => store
            .create_collection(CollectionConfig {
                name,
                dimensions,
                metric,
            })
            .map(|()| None),
        DeleteCollection { collection } => store.delete_collection(&collection).map(|()| None),
        ListCollections => Ok(Some(ResponseData::CollectionList(store.list_collections()))),
        AppendBlock {
            collection,
            key,
            block,
        } => store
            .append_block(&collection, &key, &block)
            .map(|index| Some(ResponseData::Length(index as u64))),
        BatchAppend { collection, items } => store
            .batch_append_blocks(&collection, &items)
            .map(|ok| Some(ResponseData::BatchResult(ok))),
        GetBlock {
            collection,
            key,
            index,
        } => store
            .get_block(&collection, &key, index)
            .map(|block| Some(ResponseData::Block(block))),
        GetVector {
            collection,
            key,
            index,
        } => store
            .get_vector(&collection, &key, index)
            .map(|v| Some(ResponseData::Vector(v))),
        GetKey { collection, key } => store
            .get_key(&collection, &key)
            .map(|blocks| Some(ResponseData::BlockList(blocks))),
        GetKeyLength { collection, key } => store
            .get_key_length(&collection, &key)
            .map(|len| Some(ResponseData::Length(len as u64))),
        DeleteKey { collection, key } => store.delete_key(&collection, &key).map(|()| None),
        ListKeys { collection } => store
            .list_keys(&collection)
            .map(|keys| Some(ResponseData::KeyList(keys))),
        ContainsKey { collection, key } => {
            // Mirrors the wire contract: existence is the success flag.
            match store.contains_key(&collection, &key) {
                Ok(exists) => {
                    return ResponseEnvelope {
                        request_id,
                        success: exists,
                        error_message: String::new(),
                        result: None,
                    };
                }
                Err(e) => Err(e),
            }
        }
        Search {
            collection,
            query,
            top_k,
            filter,
        } => store
            .search(&collection, &query, top_k, &filter)
            .map(|hits| Some(ResponseData::SearchList(hits))),
        SearchMoreLikeThis {
            collection,
            key,
            index,
            top_k,
        } => store
            .search_more_like_this(&collection, &key, index, top_k)
            .map(|hits| Some(ResponseData::SearchList(hits))),
        SearchInKey {
            collection,
            key,
            query,
            top_k,
        } => store
            .search_in_key(&collection, &key, &query, top_k)
            .map(|hits| Some(ResponseData::SearchList(hits))),
        KeywordSearch {
            collection,
            keywords,
            mode,
            max_distance,
        } => store
            .keyword_search(&collection, &keywords, mode, max_distance)
            .map(|keys| Some(ResponseData::KeyList(keys))),
        UpdateBlock {
            collection,
            key,
            index,
            block,
        } => store
            .update_block(&collection, &key, index, &block)
            .map(|()| None),
        ReplaceBlock {
            collection,
            key,
            index,
            block,
        } => store
            .replace_block(&collection, &key, index, &block)
            .map(|()| None),
        SnapshotCollection { collection } => store
            .snapshot_collection(&collection)
            .map(|path| Some(ResponseData::KeyList(vec![path]))),
        CompactCollection { collection } => store.compact_collection(&collection).map(|()| None),
        GetRelativeBlocks {
            collection,
            key,
            index,
            before,
            after,
        } => store
            .get_relative_blocks(&collection, &key, index, before, after)
            .map(|blocks| Some(ResponseData::BlockList(blocks))),
    };

    match outcome {
        Ok(result) => ResponseEnvelope::ok(request_id, result),
        Err(e) => {
            tracing::debug!(request_id = %request_id, error = %e, "operation failed");
            ResponseEnvelope::err(request_id, &e)
        }
    }
}
