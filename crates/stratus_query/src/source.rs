//! Data-access collaborator.
//!
//! The [`DataSource`] trait abstracts the request/response path to the
//! backend. Implementations translate a [`Query`] into a backend request;
//! the live-query engine and one-shot execution only depend on this trait.

use crate::builder::Query;
use crate::error::FetchError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use stratus_codec::Row;
use tokio::sync::watch;

/// Rows returned by one fetch.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FetchResponse {
    /// Returned rows, in backend order.
    pub rows: Vec<Row>,
    /// Row count, when the backend reports one.
    pub count: Option<u64>,
    /// Highest change sequence the rows reflect, when the backend reports
    /// one.
    pub sequence: Option<u64>,
}

impl FetchResponse {
    /// Creates a response with rows and nothing else.
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            rows,
            count: None,
            sequence: None,
        }
    }

    /// Sets the reported row count.
    pub fn with_count(mut self, count: u64) -> Self {
        self.count = Some(count);
        self
    }

    /// Sets the sequence the rows reflect.
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = Some(sequence);
        self
    }
}

/// Performs request/response reads against the backend.
///
/// Implementations filter and order by the query's predicate, skip its
/// offset and return at most [`Query::request_limit`] rows.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Fetches the rows matching a query.
    async fn fetch(&self, query: &Query) -> Result<FetchResponse, FetchError>;
}

#[async_trait]
impl<T: DataSource + ?Sized> DataSource for Arc<T> {
    async fn fetch(&self, query: &Query) -> Result<FetchResponse, FetchError> {
        (**self).fetch(query).await
    }
}

/// Scripted data source for tests.
///
/// Queued results are returned first, in order; after that the fallback
/// response is returned. Fetches can be held open with
/// [`hold`](MockDataSource::hold) to simulate a slow backend.
pub struct MockDataSource {
    queued: Mutex<VecDeque<Result<FetchResponse, FetchError>>>,
    fallback: Mutex<FetchResponse>,
    requests: Mutex<Vec<Query>>,
    gate: watch::Sender<bool>,
}

impl MockDataSource {
    /// Creates a mock that returns empty responses.
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            queued: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(FetchResponse::default()),
            requests: Mutex::new(Vec::new()),
            gate,
        }
    }

    /// Sets the response returned once the queue is empty.
    pub fn set_response(&self, response: FetchResponse) {
        *self.fallback.lock() = response;
    }

    /// Queues a response for the next fetch.
    pub fn push_response(&self, response: FetchResponse) {
        self.queued.lock().push_back(Ok(response));
    }

    /// Queues an error for the next fetch.
    pub fn push_error(&self, error: FetchError) {
        self.queued.lock().push_back(Err(error));
    }

    /// Makes subsequent fetches wait until [`release`](Self::release).
    pub fn hold(&self) {
        self.gate.send_replace(false);
    }

    /// Lets held fetches complete.
    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    /// Number of fetches started so far.
    pub fn fetch_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Queries received so far.
    pub fn requests(&self) -> Vec<Query> {
        self.requests.lock().clone()
    }
}

impl Default for MockDataSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataSource for MockDataSource {
    async fn fetch(&self, query: &Query) -> Result<FetchResponse, FetchError> {
        self.requests.lock().push(query.clone());

        let mut gate = self.gate.subscribe();
        let opened = gate.wait_for(|open| *open).await.is_ok();
        if !opened {
            return Err(FetchError::transport_fatal("mock data source dropped"));
        }

        // Taken after the gate so a held fetch sees responses queued while
        // it waited.
        let next = self.queued.lock().pop_front();
        match next {
            Some(result) => result,
            None => Ok(self.fallback.lock().clone()),
        }
    }
}
