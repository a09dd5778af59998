//! Transcript artifact parsing and fetching.
//!
//! Transcripts are newline-delimited JSON records of speaker-tagged
//! utterances with millisecond timestamps. Items are derived data: only the
//! aggregate summary is ever persisted.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// One line of a parsed transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptItem {
    pub speaker_id: String,
    pub text: String,
    pub start_ts: i64,
    pub stop_ts: i64,
}

/// A transcript item annotated with a resolved display name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakerTranscriptItem {
    pub speaker_id: String,
    pub speaker_name: String,
    pub text: String,
    pub start_ts: i64,
    pub stop_ts: i64,
}

/// Parse a JSONL body into transcript items.
///
/// A malformed document yields an empty transcript instead of an error; the
/// pipeline treats "could not parse" the same as "nothing was said" and
/// falls back accordingly.
pub fn parse_jsonl(body: &str) -> Vec<TranscriptItem> {
    let mut items = Vec::new();

    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match serde_json::from_str::<TranscriptItem>(line) {
            Ok(item) => items.push(item),
            Err(e) => {
                warn!("Failed to parse transcript line, treating transcript as empty: {}", e);
                return Vec::new();
            }
        }
    }

    debug!("Parsed {} transcript items", items.len());
    items
}

/// Downloads transcript artifacts. A trait seam so the pipeline can be
/// tested without network access.
#[async_trait]
pub trait TranscriptFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}

/// Plain HTTP fetcher.
pub struct HttpTranscriptFetcher {
    client: reqwest::Client,
}

impl HttpTranscriptFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpTranscriptFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TranscriptFetcher for HttpTranscriptFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            anyhow::bail!(
                "Failed to fetch transcript: {} {}",
                response.status().as_u16(),
                response.status().canonical_reason().unwrap_or("")
            );
        }

        Ok(response.text().await?)
    }
}
