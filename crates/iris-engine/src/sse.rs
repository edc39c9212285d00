use std::io::BufRead;

use serde_json::Value;

use crate::service::ServiceError;

const DONE_SENTINEL: &str = "[DONE]";

/// Reads a chat-completions event stream and yields each `delta.content`.
///
/// Events are separated by blank lines and may carry several `data:` lines.
/// Chunks that are not JSON are skipped; an `error` object ends the stream.
pub struct ChatCompletionFragments<R> {
    reader: R,
    done: bool,
}

impl<R: BufRead> ChatCompletionFragments<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            done: false,
        }
    }

    /// Next complete event payload, or `None` at end of input.
    fn next_event(&mut self) -> Result<Option<String>, ServiceError> {
        let mut data = String::new();
        let mut saw_data = false;
        let mut line = String::new();
        loop {
            line.clear();
            let read = self
                .reader
                .read_line(&mut line)
                .map_err(|err| ServiceError::Stream(format!("stream read failed: {err}")))?;
            if read == 0 {
                return Ok(saw_data.then_some(data));
            }
            let line = line.trim_end_matches(&['\r', '\n'][..]);
            if line.is_empty() {
                if saw_data {
                    return Ok(Some(data));
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            if field == "data" {
                if saw_data {
                    data.push('\n');
                }
                data.push_str(value);
                saw_data = true;
            }
        }
    }
}

impl<R: BufRead> Iterator for ChatCompletionFragments<R> {
    type Item = Result<String, ServiceError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let data = match self.next_event() {
                Ok(Some(data)) => data,
                Ok(None) => {
                    self.done = true;
                    return None;
                }
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            };
            let data = data.trim();
            if data.is_empty() {
                continue;
            }
            if data == DONE_SENTINEL {
                self.done = true;
                return None;
            }
            let Ok(chunk) = serde_json::from_str::<Value>(data) else {
                tracing::debug!("skipping non-JSON stream chunk");
                continue;
            };
            if let Some(error) = chunk.get("error") {
                self.done = true;
                return Some(Err(ServiceError::Stream(error_message(error))));
            }
            return Some(Ok(delta_content(&chunk)));
        }
        None
    }
}

fn delta_content(chunk: &Value) -> String {
    chunk
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("delta"))
        .and_then(|delta| delta.get("content"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn error_message(error: &Value) -> String {
    error
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| error.to_string())
}
