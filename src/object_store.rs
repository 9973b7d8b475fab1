//! Remote object store collaborator boundary.
//!
//! The cloud bucket itself, along with the cloud function that post-processes uploaded windows,
//! is an external collaborator this crate only talks to through a trait. This module models the
//! boundary the uploader calls through, with a real HTTP-backed implementation and an
//! in-memory double for tests.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub trait ObjectStore: Send {
    /// Upload `bytes` to `path_in_bucket`, optionally attaching opaque string metadata.
    fn upload(
        &self,
        path_in_bucket: &str,
        bytes: &[u8],
        metadata: Option<&HashMap<String, String>>,
    ) -> Result<()>;
}

/// Uploads objects to a bucket reachable over HTTP(S) using a signed/authenticated base URL.
pub struct HttpObjectStore {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl HttpObjectStore {
    pub fn new(bucket_base_url: String, upload_timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(upload_timeout)
            .build()
            .context("failed to build upload HTTP client")?;
        Ok(Self {
            client,
            base_url: bucket_base_url,
        })
    }
}

impl ObjectStore for HttpObjectStore {
    fn upload(
        &self,
        path_in_bucket: &str,
        bytes: &[u8],
        metadata: Option<&HashMap<String, String>>,
    ) -> Result<()> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), path_in_bucket);
        let mut request = self
            .client
            .put(&url)
            .header("content-type", "application/json")
            .body(bytes.to_vec());

        if let Some(metadata) = metadata {
            for (key, value) in metadata {
                request = request.header(format!("x-goog-meta-{key}"), value.clone());
            }
        }

        let response = request.send().with_context(|| format!("upload to {url} failed"))?;
        if !response.status().is_success() {
            anyhow::bail!("upload to {url} returned status {}", response.status());
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryObjectStore {
    objects: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    fail_paths: Arc<Mutex<std::collections::HashSet<String>>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test hook: make the next upload to `path` fail.
    pub fn fail_next(&self, path: &str) {
        self.fail_paths.lock().unwrap().insert(path.to_string());
    }

    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(path).cloned()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.objects.lock().unwrap().contains_key(path)
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn upload(
        &self,
        path_in_bucket: &str,
        bytes: &[u8],
        _metadata: Option<&HashMap<String, String>>,
    ) -> Result<()> {
        if self.fail_paths.lock().unwrap().remove(path_in_bucket) {
            anyhow::bail!("simulated upload failure for {path_in_bucket}");
        }
        self.objects
            .lock()
            .unwrap()
            .insert(path_in_bucket.to_string(), bytes.to_vec());
        Ok(())
    }
}
