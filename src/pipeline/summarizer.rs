//! Meeting summarization.
//!
//! Prefers an LLM completion with a fixed two-section markdown structure;
//! any failure falls back to a deterministic summary aggregated locally
//! from the transcript. The fallback path never fails.

use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::providers::{LlmClient, LlmMessage};

use super::transcript::SpeakerTranscriptItem;

pub const SUMMARY_SYSTEM_PROMPT: &str = r#"You are an expert summarizer. You write readable, concise, simple content. You are given a transcript of a meeting and you need to summarize it.

Use the following markdown structure for every output:

### Overview
Provide a detailed, engaging summary of the session's content. Focus on major features, user workflows, and any key takeaways. Write in a narrative style, using full sentences. Highlight unique or powerful aspects of the product, platform, or discussion.

### Notes
Break down key content into thematic sections with timestamp ranges. Use the readable time format (e.g., "2:30 - 4:15") from the start_time and stop_time fields. Each section should summarize key points, actions, or demos in bullet format.

Example:
#### Section Name (2:30 - 4:15)
- Main point or demo shown here
- Another key insight or interaction
- Follow-up tool or explanation provided

#### Next Section (4:15 - 6:45)
- Feature X automatically does Y
- Mention of integration with Z

IMPORTANT: Always use the readable time format (start_time - stop_time) when referencing timestamps, not the raw timestamp values."#;

/// Convert milliseconds to a "m:ss" display format.
pub fn format_timestamp(timestamp_ms: i64) -> String {
    let total_seconds = (timestamp_ms.max(0)) / 1000;
    let minutes = total_seconds / 60;
    let seconds = total_seconds % 60;
    format!("{}:{:02}", minutes, seconds)
}

#[derive(Debug, Serialize)]
struct FormattedItem<'a> {
    speaker: &'a str,
    text: &'a str,
    start_time: String,
    stop_time: String,
    duration_seconds: i64,
}

fn format_for_llm(transcript: &[SpeakerTranscriptItem]) -> Vec<FormattedItem<'_>> {
    transcript
        .iter()
        .map(|item| FormattedItem {
            speaker: &item.speaker_name,
            text: &item.text,
            start_time: format_timestamp(item.start_ts),
            stop_time: format_timestamp(item.stop_ts),
            duration_seconds: ((item.stop_ts - item.start_ts) as f64 / 1000.0).round() as i64,
        })
        .collect()
}

/// Summarize a transcript, preferring the LLM and falling back to the
/// deterministic local summary on any failure.
pub async fn summarize(
    llm: Option<&dyn LlmClient>,
    transcript: &[SpeakerTranscriptItem],
) -> String {
    let Some(llm) = llm else {
        warn!("No LLM credential configured, using fallback summary");
        return fallback_summary(transcript);
    };

    let formatted = format_for_llm(transcript);
    let payload = match serde_json::to_string(&formatted) {
        Ok(json) => json,
        Err(e) => {
            warn!("Failed to serialize transcript for summarization: {}", e);
            return fallback_summary(transcript);
        }
    };

    let messages = [
        LlmMessage::system(SUMMARY_SYSTEM_PROMPT),
        LlmMessage::user(format!("Summarize the following transcript: {payload}")),
    ];

    match llm.chat(&messages).await {
        Ok(content) if !content.trim().is_empty() => {
            info!("Generated LLM summary: {} chars", content.len());
            content
        }
        Ok(_) => {
            warn!("LLM returned empty summary content, using fallback");
            fallback_summary(transcript)
        }
        Err(e) => {
            warn!("LLM summarization failed, using fallback: {}", e);
            fallback_summary(transcript)
        }
    }
}

/// Deterministic summary built purely from local aggregation: participant
/// list, message count, approximate duration, per-speaker excerpts.
pub fn fallback_summary(transcript: &[SpeakerTranscriptItem]) -> String {
    if transcript.is_empty() {
        return "No transcript data available for summarization.".to_string();
    }

    let mut speakers: Vec<&str> = Vec::new();
    let mut speaker_groups: BTreeMap<&str, Vec<&SpeakerTranscriptItem>> = BTreeMap::new();
    for item in transcript {
        if !speakers.contains(&item.speaker_name.as_str()) {
            speakers.push(&item.speaker_name);
        }
        speaker_groups
            .entry(&item.speaker_name)
            .or_default()
            .push(item);
    }

    let total_messages = transcript.len();
    let duration_minutes = {
        let first = transcript[0].start_ts;
        let last = transcript[transcript.len() - 1].stop_ts;
        ((last - first) as f64 / 1000.0 / 60.0).round() as i64
    };

    let mut notes_section = String::from("### Notes\n");
    for speaker in &speakers {
        let messages = &speaker_groups[*speaker];
        let start_time = format_timestamp(messages[0].start_ts);
        let end_time = format_timestamp(messages[messages.len() - 1].stop_ts);

        notes_section.push_str(&format!("#### {} ({} - {})\n", speaker, start_time, end_time));
        for msg in messages.iter().take(3) {
            let excerpt: String = msg.text.chars().take(100).collect();
            let ellipsis = if msg.text.chars().count() > 100 { "..." } else { "" };
            notes_section.push_str(&format!("- {}{}\n", excerpt, ellipsis));
        }
        if messages.len() > 3 {
            notes_section.push_str(&format!("- ... and {} more messages\n", messages.len() - 3));
        }
        notes_section.push('\n');
    }

    format!(
        "### Overview\n\
         This meeting involved {} participant(s): {}. The session lasted approximately \
         {} minutes with {} total messages exchanged.\n\n\
         {}\n\
         #### Meeting Summary\n\
         - **Duration**: {} minutes\n\
         - **Participants**: {}\n\
         - **Total Messages**: {}\n\
         - **Status**: Meeting completed successfully\n\n\
         *Note: For AI-powered summarization, please configure an LLM API key.*",
        speakers.len(),
        speakers.join(", "),
        duration_minutes,
        total_messages,
        notes_section,
        duration_minutes,
        speakers.join(", "),
        total_messages,
    )
}
