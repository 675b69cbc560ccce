//! Batch request lines.
//!
//! Each prompt becomes one JSONL line addressed to `/chat/completions` and
//! tagged with a `custom_id`. Results come back in arbitrary order, so the
//! id is the only link back to the prompt.

use crate::models::{AzChatError, Message, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::debug;

/// Target path for every request line.
pub const CHAT_COMPLETIONS_URL: &str = "/chat/completions";

/// Stable id for the prompt at `index`.
pub fn custom_id(index: usize) -> String {
    format!("task-{index}")
}

/// One line of a batch input file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequestEntry {
    pub custom_id: String,
    pub method: String,
    pub url: String,
    pub body: BatchRequestBody,
}

/// Chat completion body inside a request line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequestBody {
    /// Batch deployment name
    pub model: String,
    pub messages: Vec<Message>,
}

/// Build one request line per prompt, ids in input order.
pub fn build_requests<S: AsRef<str>>(
    deployment: &str,
    prompts: &[S],
    system_prompt: Option<&str>,
) -> Vec<BatchRequestEntry> {
    let system = system_prompt
        .filter(|s| !s.is_empty())
        .map(Message::system);

    prompts
        .iter()
        .enumerate()
        .map(|(i, prompt)| {
            let mut messages = Vec::with_capacity(2);
            messages.extend(system.clone());
            messages.push(Message::user(prompt.as_ref()));

            BatchRequestEntry {
                custom_id: custom_id(i),
                method: "POST".to_string(),
                url: CHAT_COMPLETIONS_URL.to_string(),
                body: BatchRequestBody {
                    model: deployment.to_string(),
                    messages,
                },
            }
        })
        .collect()
}

/// Serialize entries as newline-delimited JSON.
pub fn to_jsonl(entries: &[BatchRequestEntry]) -> Result<String> {
    let mut out = String::new();
    for entry in entries {
        let line = serde_json::to_string(entry)
            .map_err(|e| AzChatError::Internal(format!("Failed to serialize request: {e}")))?;
        out.push_str(&line);
        out.push('\n');
    }
    Ok(out)
}

/// Write entries to a JSONL file.
pub fn write_jsonl(path: &Path, entries: &[BatchRequestEntry]) -> Result<()> {
    let file = File::create(path).map_err(|e| AzChatError::io("creating batch input file", e))?;
    let mut writer = BufWriter::new(file);

    for entry in entries {
        let json = serde_json::to_string(entry)
            .map_err(|e| AzChatError::Internal(format!("Failed to serialize request: {e}")))?;
        writeln!(writer, "{json}").map_err(|e| AzChatError::io("writing batch input", e))?;
    }

    writer
        .flush()
        .map_err(|e| AzChatError::io("flushing batch input", e))?;

    debug!(path = %path.display(), lines = entries.len(), "Wrote batch input");
    Ok(())
}
