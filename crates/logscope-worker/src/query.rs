use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use logscope_logs::{QueryError, extract_all_keys, query};
use logscope_types::{Entry, QueryRequest, QueryResult, SharedEntry};

use crate::error::{Result, WorkerError};
use crate::message::{Envelope, QueryCommand, QueryEvent};

/// Handle to a running query worker.
///
/// Requests are answered strictly in order, so [`QueryWorker::request`]
/// matches responses by correlation id and skips anything older.
pub struct QueryWorker {
    tx: mpsc::UnboundedSender<Envelope<QueryCommand>>,
    events: mpsc::UnboundedReceiver<Envelope<QueryEvent>>,
    next_request_id: u64,
    task: JoinHandle<()>,
}

impl QueryWorker {
    pub fn spawn() -> Self {
        let (tx, inbox) = mpsc::unbounded_channel();
        let (outbox, events) = mpsc::unbounded_channel();

        let actor = QueryActor {
            entries: Vec::new(),
            inbox,
            outbox,
        };
        let task = tokio::spawn(actor.run());

        Self {
            tx,
            events,
            next_request_id: 0,
            task,
        }
    }

    /// Replace the loaded record set (INIT). No response is sent.
    pub fn load(&self, entries: Vec<Entry>) -> Result<()> {
        self.tx
            .send(Envelope::new(QueryCommand::Init { entries }))
            .map_err(|_| WorkerError::Closed)
    }

    /// Send a command and wait for its response
    pub async fn request(&mut self, command: QueryCommand) -> Result<QueryEvent> {
        self.next_request_id += 1;
        let id = self.next_request_id;
        self.tx
            .send(Envelope::with_id(id, command))
            .map_err(|_| WorkerError::Closed)?;

        while let Some(envelope) = self.events.recv().await {
            if envelope.request_id == Some(id) {
                return Ok(envelope.body);
            }
            tracing::trace!(request_id = ?envelope.request_id, "skipping stale response");
        }
        Err(WorkerError::Closed)
    }

    /// Run one query. The outer error means the worker is gone; the inner
    /// one is a `QUERY_ERROR` for this request only.
    pub async fn query(
        &mut self,
        request: QueryRequest,
    ) -> Result<std::result::Result<QueryResult, String>> {
        match self.request(QueryCommand::Query(request)).await? {
            QueryEvent::QueryResult(result) => Ok(Ok(result)),
            QueryEvent::QueryError { error } => Ok(Err(error)),
            QueryEvent::KeysResult { .. } => Ok(Err("unexpected KEYS_RESULT".to_string())),
        }
    }

    pub async fn extract_keys(&mut self) -> Result<Vec<String>> {
        match self.request(QueryCommand::ExtractKeys).await? {
            QueryEvent::KeysResult { keys } => Ok(keys),
            _ => Ok(Vec::new()),
        }
    }

    /// Close the inbox and wait for queued commands to drain
    pub async fn shutdown(self) {
        drop(self.tx);
        let _ = self.task.await;
    }
}

struct QueryActor {
    entries: Vec<SharedEntry>,
    inbox: mpsc::UnboundedReceiver<Envelope<QueryCommand>>,
    outbox: mpsc::UnboundedSender<Envelope<QueryEvent>>,
}

impl QueryActor {
    async fn run(mut self) {
        while let Some(Envelope { request_id, body }) = self.inbox.recv().await {
            let response = match body {
                QueryCommand::Init { entries } => {
                    tracing::info!(entries = entries.len(), "query worker loaded");
                    self.entries = entries.into_iter().map(Arc::new).collect();
                    None
                }
                QueryCommand::Query(request) => Some(match run_query(&self.entries, &request) {
                    Ok(result) => {
                        tracing::debug!(
                            total_entries = result.total_entries,
                            page = result.page,
                            "query answered"
                        );
                        QueryEvent::QueryResult(result)
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "query failed");
                        QueryEvent::QueryError {
                            error: e.to_string(),
                        }
                    }
                }),
                QueryCommand::ExtractKeys => Some(QueryEvent::KeysResult {
                    keys: extract_all_keys(self.entries.iter().map(|e| &**e)),
                }),
            };

            if let Some(body) = response {
                if self.outbox.send(Envelope { request_id, body }).is_err() {
                    break;
                }
            }
        }
        tracing::debug!("query worker stopped");
    }
}

/// A panicking query only fails its own request
fn run_query(
    entries: &[SharedEntry],
    request: &QueryRequest,
) -> std::result::Result<QueryResult, QueryError> {
    catch_unwind(AssertUnwindSafe(|| query(entries, request)))
        .unwrap_or_else(|payload| Err(QueryError::Internal(panic_message(&*payload))))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message() {
        let payload = catch_unwind(|| panic!("bad page")).unwrap_err();
        assert_eq!(panic_message(&*payload), "bad page");

        let payload = catch_unwind(|| std::panic::panic_any(42u8)).unwrap_err();
        assert_eq!(panic_message(&*payload), "panic");
    }
}
