use std::time::Duration;

use async_trait::async_trait;
use futures_util::{future, stream, StreamExt};
use ibms_types::{LlmRequest, ModelOptions};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{LlmEngine, LlmError, LlmToken, TokenStream};

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaMessage<'a>>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize, Default)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    repeat_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

impl From<&ModelOptions> for OllamaOptions {
    fn from(o: &ModelOptions) -> Self {
        Self {
            temperature: o.temperature,
            top_p: o.top_p,
            top_k: o.top_k,
            repeat_penalty: o.repeat_penalty,
            num_predict: o.num_predict,
        }
    }
}

/// Both the single response and every streamed line share this shape.
#[derive(Deserialize)]
struct OllamaChatChunk {
    #[serde(default)]
    message: Option<OllamaReply>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct OllamaReply {
    #[serde(default)]
    content: String,
}

/// LLM engine that calls an Ollama server's `/api/chat` endpoint.
pub struct HttpOllamaEngine {
    client: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
}

impl HttpOllamaEngine {
    pub fn new(base_url: String, request_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            request_timeout,
        }
    }

    async fn send(&self, req: &LlmRequest, stream: bool) -> Result<reqwest::Response, LlmError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = OllamaChatRequest {
            model: &req.model,
            messages: req
                .messages
                .iter()
                .map(|m| OllamaMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            stream,
            options: OllamaOptions::from(&req.options),
        };
        debug!(model = %req.model, stream, "ollama chat request");

        let mut builder = self.client.post(&url).json(&body);
        // A whole-body timeout would cut off long narrations mid-stream.
        if !stream {
            builder = builder.timeout(self.request_timeout);
        }
        let resp = builder
            .send()
            .await
            .map_err(|e| LlmError::new(format!("HTTP error: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let detail = resp
                .json::<OllamaChatChunk>()
                .await
                .ok()
                .and_then(|c| c.error)
                .unwrap_or_default();
            return Err(LlmError::new(format!("HTTP status: {status} {detail}")));
        }
        Ok(resp)
    }
}

#[async_trait]
impl LlmEngine for HttpOllamaEngine {
    async fn complete(&self, req: LlmRequest) -> Result<String, LlmError> {
        let resp = self.send(&req, false).await?;
        let chunk: OllamaChatChunk = resp
            .json()
            .await
            .map_err(|e| LlmError::new(format!("malformed response: {e}")))?;
        if let Some(err) = chunk.error {
            return Err(LlmError::new(format!("model error: {err}")));
        }
        chunk
            .message
            .map(|m| m.content)
            .ok_or_else(|| LlmError::new("response carried no message"))
    }

    async fn stream(&self, req: LlmRequest) -> Result<TokenStream, LlmError> {
        let resp = self.send(&req, true).await?;
        // `None` marks end of body so a last line without `\n` is still parsed.
        let tokens = resp
            .bytes_stream()
            .map(Some)
            .chain(stream::once(future::ready(None)))
            .scan(NdjsonBuffer::default(), |buf, chunk| {
                let items = match chunk {
                    Some(Ok(bytes)) => buf.push(&bytes),
                    Some(Err(e)) => vec![Err(LlmError::new(format!("stream error: {e}")))],
                    None => buf.finish(),
                };
                future::ready(Some(stream::iter(items)))
            })
            .flatten();
        Ok(Box::pin(tokens))
    }
}

/// Reassembles newline-delimited JSON across HTTP chunk boundaries.
///
/// Bytes are buffered rather than text so a multi-byte character split between
/// two chunks is decoded intact.
#[derive(Default)]
struct NdjsonBuffer {
    pending: Vec<u8>,
    next_id: u32,
}

impl NdjsonBuffer {
    fn push(&mut self, bytes: &[u8]) -> Vec<Result<LlmToken, LlmError>> {
        self.pending.extend_from_slice(bytes);
        let mut out = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            self.parse_line(&raw, &mut out);
        }
        out
    }

    /// Parse whatever is left once the body has ended.
    fn finish(&mut self) -> Vec<Result<LlmToken, LlmError>> {
        let raw = std::mem::take(&mut self.pending);
        let mut out = Vec::new();
        self.parse_line(&raw, &mut out);
        out
    }

    fn parse_line(&mut self, raw: &[u8], out: &mut Vec<Result<LlmToken, LlmError>>) {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        match serde_json::from_str::<OllamaChatChunk>(line) {
            Ok(chunk) => {
                if let Some(err) = chunk.error {
                    out.push(Err(LlmError::new(format!("model error: {err}"))));
                    return;
                }
                if let Some(msg) = chunk.message {
                    if !msg.content.is_empty() {
                        out.push(Ok(LlmToken {
                            token_id: self.next_id,
                            text: msg.content,
                        }));
                        self.next_id += 1;
                    }
                }
            }
            Err(e) => out.push(Err(LlmError::new(format!("malformed stream chunk: {e}")))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(items: Vec<Result<LlmToken, LlmError>>) -> Vec<String> {
        items.into_iter().map(|t| t.unwrap().text).collect()
    }

    #[test]
    fn buffer_reassembles_split_lines() {
        let mut buf = NdjsonBuffer::default();
        let first = buf.push(br#"{"message":{"role":"assistant","content":"Hel"#);
        assert!(first.is_empty());
        let second = buf.push(b"lo\"},\"done\":false}\n{\"message\":{\"content\":\" world\"},\"done\":false}\n");
        assert_eq!(texts(second), vec!["Hello", " world"]);
    }

    #[test]
    fn buffer_keeps_multibyte_chars_intact() {
        let line = "{\"message\":{\"content\":\"é\"}}\n".as_bytes();
        let split = line.iter().position(|b| *b == 0xC3).unwrap() + 1;
        let mut buf = NdjsonBuffer::default();
        assert!(buf.push(&line[..split]).is_empty());
        assert_eq!(texts(buf.push(&line[split..])), vec!["é"]);
    }

    #[test]
    fn buffer_skips_empty_content_and_numbers_tokens() {
        let mut buf = NdjsonBuffer::default();
        let out = buf.push(b"{\"message\":{\"content\":\"a\"}}\n{\"message\":{\"content\":\"\"},\"done\":true}\n{\"message\":{\"content\":\"b\"}}\n");
        let ids: Vec<u32> = out.into_iter().map(|t| t.unwrap().token_id).collect();
        assert_eq!(ids, vec![0, 1]);
    }

    #[test]
    fn finish_flushes_unterminated_last_line() {
        let mut buf = NdjsonBuffer::default();
        let out = buf.push(b"{\"message\":{\"content\":\"a\"}}\n{\"message\":{\"content\":\"b\"},\"done\":true}");
        assert_eq!(texts(out), vec!["a"]);
        let rest = buf.finish();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].as_ref().unwrap().token_id, 1);
        assert_eq!(texts(rest), vec!["b"]);
        assert!(buf.finish().is_empty());
    }

    #[test]
    fn finish_ignores_trailing_whitespace() {
        let mut buf = NdjsonBuffer::default();
        assert_eq!(texts(buf.push(b"{\"message\":{\"content\":\"a\"}}\n  ")), vec!["a"]);
        assert!(buf.finish().is_empty());
    }

    #[test]
    fn buffer_surfaces_backend_errors() {
        let mut buf = NdjsonBuffer::default();
        let out = buf.push(b"{\"error\":\"model not found\"}\n");
        let err = out.into_iter().next().unwrap().unwrap_err();
        assert!(err.message.contains("model not found"));
    }

    #[test]
    fn options_skip_unset_fields() {
        let opts = OllamaOptions::from(&ModelOptions::deterministic(10));
        let json = serde_json::to_value(&opts).unwrap();
        assert_eq!(json, serde_json::json!({"temperature": 0.0, "num_predict": 10}));
    }
}
