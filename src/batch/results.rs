//! Batch output parsing and correlation.
//!
//! Output lines are keyed by `custom_id` and arrive in no particular order.
//! A bad line is logged and skipped; a prompt whose id never shows up is
//! reported as [`BatchReply::Missing`].

use crate::batch::custom_id;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use tracing::warn;

/// Placeholder shown for prompts without a result.
pub const MISSING_REPLY: &str = "<missing>";

/// Reply for one prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchReply {
    Reply(String),
    Missing,
}

impl BatchReply {
    pub fn is_missing(&self) -> bool {
        matches!(self, BatchReply::Missing)
    }

    /// Reply text, or [`MISSING_REPLY`].
    pub fn as_str(&self) -> &str {
        match self {
            BatchReply::Reply(text) => text,
            BatchReply::Missing => MISSING_REPLY,
        }
    }
}

impl fmt::Display for BatchReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A prompt and its reply, in input order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    pub index: usize,
    pub custom_id: String,
    pub prompt: String,
    pub reply: BatchReply,
}

/// Parse an output file into `custom_id → reply text`.
///
/// The reply is `response.body.choices[0].message.content`; when that is
/// absent or empty the raw response body is kept instead.
pub fn parse_output(text: &str) -> HashMap<String, String> {
    let mut replies = HashMap::new();

    for (line_num, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let value: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                warn!(line = line_num + 1, error = %e, "Skipping unparseable result line");
                continue;
            }
        };

        let Some(id) = value.get("custom_id").and_then(Value::as_str) else {
            warn!(line = line_num + 1, "Skipping result line without custom_id");
            continue;
        };

        let response = value.get("response");
        if response.is_some_and(|r| !r.is_object()) {
            warn!(
                line = line_num + 1,
                custom_id = id,
                "Skipping result line without a response object"
            );
            continue;
        }

        let body = response.and_then(|r| r.get("body"));
        let content = body
            .and_then(|b| b.pointer("/choices/0/message/content"))
            .and_then(Value::as_str)
            .filter(|c| !c.is_empty())
            .map(str::to_string);

        let reply = content.unwrap_or_else(|| body.unwrap_or(&Value::Null).to_string());
        replies.insert(id.to_string(), reply);
    }

    replies
}

/// Map replies back onto prompts by `custom_id`.
pub fn correlate<S: AsRef<str>>(
    prompts: &[S],
    replies: &HashMap<String, String>,
) -> Vec<BatchOutcome> {
    prompts
        .iter()
        .enumerate()
        .map(|(index, prompt)| {
            let id = custom_id(index);
            let reply = match replies.get(&id) {
                Some(text) => BatchReply::Reply(text.clone()),
                None => BatchReply::Missing,
            };
            BatchOutcome {
                index,
                custom_id: id,
                prompt: prompt.as_ref().to_string(),
                reply,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(id: &str, content: &str) -> String {
        serde_json::json!({
            "custom_id": id,
            "response": {"status_code": 200, "body": {"choices": [{"message": {"content": content}}]}}
        })
        .to_string()
    }

    #[test]
    fn test_parse_output_out_of_order() {
        let text = [line("task-2", "C"), line("task-0", "A"), line("task-1", "B")].join("\n");
        let replies = parse_output(&text);

        assert_eq!(replies.len(), 3);
        assert_eq!(replies["task-0"], "A");
        assert_eq!(replies["task-2"], "C");
    }

    #[test]
    fn test_parse_output_skips_bad_lines() {
        let text = format!(
            "{}\nnot json\n\n{{\"response\": {{}}}}\n{}\n",
            line("task-0", "A"),
            line("task-1", "B")
        );
        let replies = parse_output(&text);

        assert_eq!(replies.len(), 2);
        assert_eq!(replies["task-1"], "B");
    }

    #[test]
    fn test_parse_output_falls_back_to_body() {
        let text = r#"{"custom_id":"task-0","response":{"status_code":400,"body":{"error":{"code":"bad"}}}}"#;
        let replies = parse_output(text);
        assert_eq!(replies["task-0"], r#"{"error":{"code":"bad"}}"#);

        let text = r#"{"custom_id":"task-1"}"#;
        assert_eq!(parse_output(text)["task-1"], "null");
    }

    #[test]
    fn test_failed_request_line_is_missing() {
        let text = r#"{"custom_id":"task-0","response":null,"error":{"code":"server_error","message":"boom"}}"#;
        let replies = parse_output(text);
        assert!(replies.is_empty());

        let outcomes = correlate(&["a"], &replies);
        assert_eq!(outcomes[0].reply, BatchReply::Missing);
    }

    #[test]
    fn test_correlate_marks_missing() {
        let replies = parse_output(&[line("task-0", "A"), line("task-2", "C")].join("\n"));
        let outcomes = correlate(&["a", "b", "c"], &replies);

        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0].reply, BatchReply::Reply("A".to_string()));
        assert!(outcomes[1].reply.is_missing());
        assert_eq!(outcomes[1].reply.to_string(), "<missing>");
        assert_eq!(outcomes[1].prompt, "b");
        assert_eq!(outcomes[2].custom_id, "task-2");
        assert_eq!(outcomes[2].reply.as_str(), "C");
    }
}
