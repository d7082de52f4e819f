//! Batch request builder.
//!
//! Turns (messages, k) pairs into addressable requests. Correlation ids are
//! `request-N` from a counter that starts at 1 and never resets within one
//! builder. Every request gets a manifest line naming its source record, and
//! the manifest is written beside the request file.

use crate::artifact::write_jsonl;
use crate::models::{CompletionRequest, ManifestEntry, Message, RequestBody, Result, SamplingParams};
use std::path::{Path, PathBuf};
use tracing::info;

/// Requests plus their manifest.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    pub requests: Vec<CompletionRequest>,
    pub manifest: Vec<ManifestEntry>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Write requests to `path` and the manifest to [`manifest_path`]`(path)`.
    pub fn write(&self, path: &Path) -> Result<PathBuf> {
        write_jsonl(path, &self.requests)?;
        let manifest = manifest_path(path);
        write_jsonl(&manifest, &self.manifest)?;
        info!(
            requests = self.requests.len(),
            path = %path.display(),
            manifest = %manifest.display(),
            "Wrote request batch"
        );
        Ok(manifest)
    }
}

/// Manifest file that belongs to a request file: `x.jsonl` -> `x.manifest.jsonl`.
pub fn manifest_path(requests: &Path) -> PathBuf {
    requests.with_extension("manifest.jsonl")
}

/// Builds one batch with monotonically assigned correlation ids.
#[derive(Debug)]
pub struct BatchRequestBuilder {
    sampling: SamplingParams,
    counter: usize,
    batch: Batch,
}

impl BatchRequestBuilder {
    pub fn new(sampling: SamplingParams) -> Self {
        Self {
            sampling,
            counter: 0,
            batch: Batch::default(),
        }
    }

    /// Build a flat batch from `(messages, k)` pairs; pair `i` is record `i`.
    pub fn build(
        sampling: SamplingParams,
        items: impl IntoIterator<Item = (Vec<Message>, usize)>,
    ) -> Batch {
        let mut builder = Self::new(sampling);
        for (record, (messages, k)) in items.into_iter().enumerate() {
            builder.push(record, &messages, k);
        }
        builder.finish()
    }

    fn next_id(&mut self) -> String {
        self.counter += 1;
        format!("request-{}", self.counter)
    }

    /// Add `k` replicas of `messages` for source record `record`.
    pub fn push(&mut self, record: usize, messages: &[Message], k: usize) {
        for replica in 0..k {
            self.push_replica(record, replica, messages.to_vec());
        }
    }

    /// Add a single request with an explicit ordinal (e.g. a constraint index).
    pub fn push_replica(&mut self, record: usize, replica: usize, messages: Vec<Message>) {
        let custom_id = self.next_id();
        self.batch.manifest.push(ManifestEntry {
            custom_id: custom_id.clone(),
            record,
            replica,
        });
        self.batch.requests.push(CompletionRequest::new(
            custom_id,
            RequestBody::new(messages, &self.sampling),
        ));
    }

    /// Add a request under an id assigned by an earlier stage's manifest.
    ///
    /// Used when a stage issues exactly one follow-up request per earlier
    /// request (judging each sampled response) and joins on the same id.
    pub fn push_correlated(&mut self, entry: ManifestEntry, messages: Vec<Message>) {
        self.batch.requests.push(CompletionRequest::new(
            entry.custom_id.clone(),
            RequestBody::new(messages, &self.sampling),
        ));
        self.batch.manifest.push(entry);
    }

    pub fn len(&self) -> usize {
        self.batch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    pub fn finish(self) -> Batch {
        self.batch
    }
}
