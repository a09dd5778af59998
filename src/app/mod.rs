use crate::api::{ApiServer, AppState};
use crate::config::Config;
use crate::db::Db;
use crate::jobs::{JobQueue, JobWorker};
use crate::lifecycle::{ConnectLockRegistry, LifecycleReconciler};
use crate::pipeline::{HttpTranscriptFetcher, ProcessingPipeline, TranscriptFetcher};
use crate::providers::{
    ChatApiProvider, ChatProvider, LlmClient, OpenAiClient, VideoApiProvider, VideoProvider,
};
use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

pub async fn run_service() -> Result<()> {
    info!("Starting Huddle service");

    let config = Config::load()?;

    if config.webhook.secret.is_empty() {
        warn!("webhook.secret is empty; inbound events will fail signature verification");
    }

    let db_path = match &config.server.db_path {
        Some(path) => std::path::PathBuf::from(path),
        None => crate::global::db_file()?,
    };
    let db = Db::open(&db_path)?;
    info!("Database ready at {:?}", db_path);

    let llm = build_llm(&config);
    let video = build_video(&config);
    let chat = build_chat(&config);

    let (jobs, wake_rx) = JobQueue::new(db.clone());

    let fetcher: Arc<dyn TranscriptFetcher> = Arc::new(HttpTranscriptFetcher::new());
    let pipeline = Arc::new(ProcessingPipeline::new(
        db.clone(),
        fetcher,
        llm.clone(),
        config.pipeline.clone(),
    ));
    JobWorker::new(db.clone(), pipeline, wake_rx).spawn();

    let reconciler = Arc::new(LifecycleReconciler::new(
        db.clone(),
        video,
        chat,
        llm,
        jobs.clone(),
    ));

    let state = AppState {
        db,
        reconciler,
        locks: ConnectLockRegistry::default(),
        jobs,
        webhook_secret: config.webhook.secret.clone().into(),
    };

    info!("Huddle is ready!");

    ApiServer::new(config.server.port, state).start().await
}

fn build_llm(config: &Config) -> Option<Arc<dyn LlmClient>> {
    let api_key = config.llm.api_key.clone().filter(|k| !k.is_empty())?;
    Some(Arc::new(OpenAiClient::new(
        api_key,
        config.llm.model.clone(),
        config.llm.endpoint.clone(),
    )))
}

fn build_video(config: &Config) -> Arc<dyn VideoProvider> {
    let endpoint = config.video.endpoint.clone().unwrap_or_default();
    if endpoint.is_empty() {
        warn!("video.endpoint is not configured; call operations will fail");
    }
    Arc::new(VideoApiProvider::new(
        endpoint,
        config.video.api_key.clone().unwrap_or_default(),
    ))
}

fn build_chat(config: &Config) -> Arc<dyn ChatProvider> {
    let endpoint = config.chat.endpoint.clone().unwrap_or_default();
    if endpoint.is_empty() {
        warn!("chat.endpoint is not configured; chat operations will fail");
    }
    Arc::new(ChatApiProvider::new(
        endpoint,
        config.chat.api_key.clone().unwrap_or_default(),
    ))
}
