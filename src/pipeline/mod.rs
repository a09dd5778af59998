//! Transcript processing pipeline.
//!
//! Turns an ended meeting's transcript artifact into a persisted summary:
//! wait for the artifact URL, download, parse, enrich with speaker names,
//! summarize, save. Every step's result is checkpointed per job so a
//! restarted job resumes instead of redoing completed work, and every
//! failure path degrades to a fallback rather than leaving the meeting
//! stuck in processing.

pub mod summarizer;
pub mod transcript;

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::db::{
    AgentRepository, CheckpointRepository, Db, JobRecord, MeetingRepository, UserRepository,
};
use crate::providers::LlmClient;

pub use transcript::{HttpTranscriptFetcher, SpeakerTranscriptItem, TranscriptFetcher, TranscriptItem};

pub struct ProcessingPipeline {
    db: Db,
    fetcher: Arc<dyn TranscriptFetcher>,
    llm: Option<Arc<dyn LlmClient>>,
    tuning: PipelineConfig,
}

impl ProcessingPipeline {
    pub fn new(
        db: Db,
        fetcher: Arc<dyn TranscriptFetcher>,
        llm: Option<Arc<dyn LlmClient>>,
        tuning: PipelineConfig,
    ) -> Self {
        Self {
            db,
            fetcher,
            llm,
            tuning,
        }
    }

    /// Run the pipeline for one job.
    ///
    /// The meeting always ends up completed: if any step error escapes the
    /// per-step fallbacks, the meeting is force-completed with a summary
    /// describing the failure and the error is still returned so the job
    /// runner records it.
    pub async fn run(&self, job: &JobRecord) -> Result<()> {
        info!("Processing meeting {} (job {})", job.meeting_id, job.id);

        match self.run_steps(job).await {
            Ok(()) => {
                info!("Completed processing for meeting {}", job.meeting_id);
                Ok(())
            }
            Err(err) => {
                error!("Processing failed for meeting {}: {:#}", job.meeting_id, err);

                let summary = format!("Processing failed: {err:#}");
                let meeting_id = job.meeting_id.clone();
                if let Err(write_err) = self
                    .db
                    .with(|conn| {
                        MeetingRepository::complete_with_summary(conn, &meeting_id, &summary)
                    })
                    .await
                {
                    error!(
                        "Failed to force-complete meeting {}: {:#}",
                        job.meeting_id, write_err
                    );
                }

                Err(err)
            }
        }
    }

    async fn run_steps(&self, job: &JobRecord) -> Result<()> {
        let transcript_url: Option<String> = self
            .step(&job.id, "wait-for-transcript-url", self.wait_for_transcript_url(job))
            .await?;

        let raw: String = self
            .step(
                &job.id,
                "fetch-transcript",
                self.fetch_transcript(transcript_url.as_deref(), job.regenerate),
            )
            .await?;

        let parsed: Vec<TranscriptItem> = self
            .step(&job.id, "parse-transcript", async {
                Ok(transcript::parse_jsonl(&raw))
            })
            .await?;

        let recovered: Vec<TranscriptItem> = self
            .step(
                &job.id,
                "recover-empty-transcript",
                self.recover_empty_transcript(job, parsed),
            )
            .await?;

        let enriched: Vec<SpeakerTranscriptItem> = self
            .step(&job.id, "add-speakers", self.add_speakers(recovered))
            .await?;

        let summary: String = self
            .step(&job.id, "generate-summary", async {
                Ok(summarizer::summarize(self.llm.as_deref(), &enriched).await)
            })
            .await?;

        let meeting_id = job.meeting_id.clone();
        self.step(&job.id, "save-summary", async move {
            self.db
                .with(|conn| MeetingRepository::complete_with_summary(conn, &meeting_id, &summary))
                .await?;
            Ok(true)
        })
        .await?;

        Ok(())
    }

    /// Run a step, replaying the checkpointed result when one exists.
    async fn step<T, Fut>(&self, job_id: &str, name: &str, fut: Fut) -> Result<T>
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
        Fut: Future<Output = Result<T>>,
    {
        let stored = self
            .db
            .with(|conn| CheckpointRepository::get(conn, job_id, name))
            .await?;

        if let Some(json) = stored {
            match serde_json::from_str(&json) {
                Ok(value) => {
                    debug!("Replaying checkpoint for job {} step {}", job_id, name);
                    return Ok(value);
                }
                Err(e) => {
                    warn!(
                        "Discarding unreadable checkpoint for job {} step {}: {}",
                        job_id, name, e
                    );
                }
            }
        }

        let value = fut.await.with_context(|| format!("Step {name} failed"))?;

        let json = serde_json::to_string(&value)
            .with_context(|| format!("Failed to serialize result of step {name}"))?;
        self.db
            .with(|conn| CheckpointRepository::put(conn, job_id, name, &json))
            .await?;

        Ok(value)
    }

    /// Step 1: resolve the transcript URL, polling the meeting record while
    /// the transcript-ready event may still be in flight.
    async fn wait_for_transcript_url(&self, job: &JobRecord) -> Result<Option<String>> {
        if let Some(url) = &job.transcript_url {
            if !url.is_empty() {
                return Ok(Some(url.clone()));
            }
        }

        let attempts = if job.regenerate { 1 } else { self.tuning.poll_attempts.max(1) };

        for attempt in 1..=attempts {
            let meeting_id = job.meeting_id.clone();
            let meeting = self
                .db
                .with(|conn| MeetingRepository::get(conn, &meeting_id))
                .await?;

            if let Some(url) = meeting.and_then(|m| m.transcript_url) {
                if !url.is_empty() {
                    return Ok(Some(url));
                }
            }

            if attempt < attempts {
                let delay = Duration::from_secs(self.tuning.poll_backoff_secs * attempt as u64);
                debug!(
                    "Transcript URL not ready for meeting {} (attempt {}/{}), waiting {:?}",
                    job.meeting_id, attempt, attempts, delay
                );
                sleep(delay).await;
            }
        }

        warn!(
            "No transcript URL for meeting {} after waiting, proceeding with empty transcript",
            job.meeting_id
        );
        Ok(None)
    }

    /// Step 2: download the artifact; exhausting retries yields an empty
    /// body rather than failing the job.
    async fn fetch_transcript(&self, url: Option<&str>, single_attempt: bool) -> Result<String> {
        let Some(url) = url else {
            return Ok(String::new());
        };

        let attempts = if single_attempt { 1 } else { self.tuning.fetch_attempts.max(1) };

        for attempt in 1..=attempts {
            match self.fetcher.fetch(url).await {
                Ok(body) => return Ok(body),
                Err(e) => {
                    warn!(
                        "Transcript fetch failed (attempt {}/{}): {:#}",
                        attempt, attempts, e
                    );
                    if attempt < attempts {
                        let delay =
                            Duration::from_secs(self.tuning.fetch_backoff_secs * attempt as u64);
                        sleep(delay).await;
                    }
                }
            }
        }

        warn!("All transcript fetch attempts failed for {}, proceeding with empty body", url);
        Ok(String::new())
    }

    /// Step 4: the artifact may still be propagating when the first fetch
    /// lands; retry the whole read-fetch-parse sequence a bounded number of
    /// times before accepting an empty transcript.
    async fn recover_empty_transcript(
        &self,
        job: &JobRecord,
        items: Vec<TranscriptItem>,
    ) -> Result<Vec<TranscriptItem>> {
        if !items.is_empty() || job.regenerate {
            return Ok(items);
        }

        for round in 1..=self.tuning.empty_retry_attempts {
            sleep(Duration::from_secs(self.tuning.empty_retry_backoff_secs)).await;

            let meeting_id = job.meeting_id.clone();
            let url = self
                .db
                .with(|conn| MeetingRepository::get(conn, &meeting_id))
                .await?
                .and_then(|m| m.transcript_url);

            let Some(url) = url.filter(|u| !u.is_empty()) else {
                debug!(
                    "Empty-transcript retry {}/{}: still no URL for meeting {}",
                    round, self.tuning.empty_retry_attempts, job.meeting_id
                );
                continue;
            };

            match self.fetcher.fetch(&url).await {
                Ok(body) => {
                    let parsed = transcript::parse_jsonl(&body);
                    if !parsed.is_empty() {
                        info!(
                            "Recovered {} transcript items on retry {} for meeting {}",
                            parsed.len(),
                            round,
                            job.meeting_id
                        );
                        return Ok(parsed);
                    }
                }
                Err(e) => {
                    warn!(
                        "Empty-transcript retry {}/{} fetch failed: {:#}",
                        round, self.tuning.empty_retry_attempts, e
                    );
                }
            }
        }

        Ok(items)
    }

    /// Step 5: resolve speaker ids against users and agents.
    async fn add_speakers(
        &self,
        items: Vec<TranscriptItem>,
    ) -> Result<Vec<SpeakerTranscriptItem>> {
        let mut speaker_ids: Vec<String> = Vec::new();
        for item in &items {
            if !speaker_ids.contains(&item.speaker_id) {
                speaker_ids.push(item.speaker_id.clone());
            }
        }

        let names: HashMap<String, String> = self
            .db
            .with(|conn| {
                let mut names = HashMap::new();
                for id in &speaker_ids {
                    if let Some(user) = UserRepository::get(conn, id)? {
                        names.insert(id.clone(), user.name);
                    } else if let Some(agent) = AgentRepository::get(conn, id)? {
                        names.insert(id.clone(), agent.name);
                    }
                }
                Ok(names)
            })
            .await?;

        Ok(items
            .into_iter()
            .map(|item| {
                let speaker_name = names
                    .get(&item.speaker_id)
                    .cloned()
                    .unwrap_or_else(|| "Unknown".to_string());
                SpeakerTranscriptItem {
                    speaker_id: item.speaker_id,
                    speaker_name,
                    text: item.text,
                    start_ts: item.start_ts,
                    stop_ts: item.stop_ts,
                }
            })
            .collect())
    }
}
