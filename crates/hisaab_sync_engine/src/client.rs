//! Retrying push/pull client over a [`SyncTransport`].

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use hisaab_sync_protocol::sanitize::sanitize_payload;
use hisaab_sync_protocol::{
    ApiEnvelope, EntityKind, PullQuery, PushRequest, PushResult, RemoteRecord, SyncRecord,
    Timestamp,
};
use std::future::Future;
use tracing::{debug, warn};

/// Progress of a pull, reported after each page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageProgress {
    /// 1-based page just fetched.
    pub page: u32,
    /// Records fetched so far.
    pub fetched: u64,
    /// Total the server reported, or `fetched` if it reported none.
    pub total: u64,
}

/// Pushes and pulls records of one entity kind at a time.
///
/// Retryable transport failures are retried with backoff per
/// [`RetryConfig`](crate::RetryConfig) before they surface.
pub struct RemoteSyncClient<T: SyncTransport> {
    transport: T,
    config: SyncConfig,
}

impl<T: SyncTransport> RemoteSyncClient<T> {
    /// Creates a client.
    pub fn new(transport: T, config: SyncConfig) -> Self {
        Self { transport, config }
    }

    /// Returns the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Splits `records` into push batches of `push_batch_size`.
    pub fn batches<'r>(&self, records: &'r [SyncRecord]) -> std::slice::Chunks<'r, SyncRecord> {
        records.chunks(self.config.push_batch_size.max(1) as usize)
    }

    /// Pushes `records` in batches of `push_batch_size`.
    ///
    /// String fields are sanitized before sending. Per-record rejections are
    /// returned in the result, not as an error.
    ///
    /// # Errors
    ///
    /// A transport or server failure for any batch aborts the push, and the
    /// results of the batches before it are lost even though the server
    /// applied them. Callers that stamp assigned slugs locally should drive
    /// [`push_batch`](Self::push_batch) over [`batches`](Self::batches)
    /// and apply each result as it arrives.
    pub async fn push(
        &self,
        kind: EntityKind,
        business_id: &str,
        records: &[SyncRecord],
    ) -> SyncResult<PushResult> {
        push_endpoint(kind)?;
        let mut result = PushResult::default();
        for batch in self.batches(records) {
            result.merge(self.push_batch(kind, business_id, batch).await?);
        }
        Ok(result)
    }

    /// Pushes one batch in a single request, retrying transient failures.
    pub async fn push_batch(
        &self,
        kind: EntityKind,
        business_id: &str,
        batch: &[SyncRecord],
    ) -> SyncResult<PushResult> {
        let endpoint = push_endpoint(kind)?;
        let request = &sanitized_request(batch);
        debug!(entity = %kind, records = batch.len(), "pushing batch");

        let response = self
            .with_retry(kind, "push", || async move {
                let response = self.transport.push(endpoint, business_id, request).await?;
                check_status(&response)?;
                Ok(response)
            })
            .await?;

        let data = response.data.unwrap_or_default();
        Ok(PushResult::from_data(data, response.timestamp))
    }

    /// Pulls every record of `kind` updated after `since`, exhausting all
    /// pages before returning.
    ///
    /// `on_page` runs after each page. Returning an error from it (for
    /// example `Cancelled`) stops the pull with that error.
    ///
    /// Records missing a slug or update time are skipped with a warning.
    pub async fn pull<F>(
        &self,
        kind: EntityKind,
        business_id: &str,
        since: Timestamp,
        mut on_page: F,
    ) -> SyncResult<Vec<RemoteRecord>>
    where
        F: FnMut(PageProgress) -> SyncResult<()> + Send,
    {
        let endpoint = kind.pull_endpoint();
        let limit = self.config.pull_page_size.max(1);
        let mut query = PullQuery::first(since, limit);
        let mut records = Vec::new();
        let mut fetched: u64 = 0;

        loop {
            let current = &query;
            let response = self
                .with_retry(kind, "pull", || async move {
                    let response = self.transport.pull(endpoint, business_id, current).await?;
                    check_status(&response)?;
                    Ok(response)
                })
                .await?;

            let data = response.data.unwrap_or_default();
            let page_len = data.list.len() as u64;
            fetched += page_len;
            let reported = data.result_count.map(|c| c.0);

            for wire in data.list {
                match wire.into_remote(kind) {
                    Ok(remote) => records.push(remote),
                    Err(e) => warn!(entity = %kind, error = %e, "skipping malformed pulled record"),
                }
            }

            debug!(entity = %kind, page = query.page, records = page_len, "pulled page");
            on_page(PageProgress {
                page: query.page,
                fetched,
                total: reported.unwrap_or(fetched).max(fetched),
            })?;

            let done = match reported {
                Some(total) => page_len == 0 || fetched >= total,
                None => page_len < u64::from(limit),
            };
            if done {
                break;
            }
            query = query.next_page();
        }

        Ok(records)
    }

    async fn with_retry<R, F, Fut>(&self, kind: EntityKind, op: &str, mut f: F) -> SyncResult<R>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SyncResult<R>>,
    {
        let retry = &self.config.retry;
        let max_attempts = retry.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt + 1 < max_attempts => {
                    let delay = retry.delay_for_attempt(attempt);
                    warn!(
                        entity = %kind,
                        op,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying after transient failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn push_endpoint(kind: EntityKind) -> SyncResult<&'static str> {
    kind.push_endpoint()
        .ok_or_else(|| SyncError::Protocol(format!("{kind} is pull-only")))
}

fn sanitized_request(batch: &[SyncRecord]) -> PushRequest {
    let cleaned: Vec<SyncRecord> = batch
        .iter()
        .map(|record| {
            let mut record = record.clone();
            let dropped = sanitize_payload(&mut record.payload);
            if dropped > 0 {
                debug!(entity = %record.entity, dropped, "dropped empty fields before push");
            }
            record
        })
        .collect();
    PushRequest::from_records(&cleaned)
}

fn check_status<D>(response: &ApiEnvelope<D>) -> SyncResult<()> {
    if response.is_success() {
        return Ok(());
    }
    let message = response
        .message
        .clone()
        .unwrap_or_else(|| "request failed".into());
    match response.status {
        Some(status) => Err(SyncError::from_status(status, message)),
        None => Err(SyncError::Protocol(format!(
            "response without status: {message}"
        ))),
    }
}
