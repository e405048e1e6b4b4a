use anyhow::{Result, anyhow};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::stream::{
    ChatTurn, ChunkStream, ModelAdapter, StreamChunk, StreamRequest, TurnPart, TurnRole,
};
use crate::glimpse::models::TokenUsage;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Model adapter speaking the Gemini `streamGenerateContent` REST API.
///
/// The wire protocol yields text deltas; the core contract is cumulative
/// content chunks, so this adapter accumulates deltas before yielding.
pub struct GeminiAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl GeminiAdapter {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

impl Default for GeminiAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileData {
    #[serde(rename = "fileUri")]
    file_uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    FileData {
        #[serde(rename = "fileData")]
        file_data: FileData,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Clone, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Clone, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(rename = "finishReason", default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata", default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiError {
    message: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiErrorResponse {
    error: ApiError,
}

fn content_from_turn(turn: &ChatTurn) -> Content {
    let role = match turn.role {
        TurnRole::User => "user",
        TurnRole::Model => "model",
    };
    let parts = turn
        .parts
        .iter()
        .map(|part| match part {
            TurnPart::Text(text) => Part::Text { text: text.clone() },
            TurnPart::Video(url) => Part::FileData {
                file_data: FileData {
                    file_uri: url.clone(),
                },
            },
        })
        .collect();
    Content {
        role: Some(role.to_string()),
        parts,
    }
}

fn build_request(request: &StreamRequest) -> GenerateContentRequest {
    let system_instruction = request
        .system_prompt
        .as_ref()
        .filter(|prompt| !prompt.trim().is_empty())
        .map(|prompt| Content {
            role: None,
            parts: vec![Part::Text {
                text: prompt.clone(),
            }],
        });

    GenerateContentRequest {
        contents: request.history.iter().map(content_from_turn).collect(),
        system_instruction,
        generation_config: GenerationConfig {
            temperature: request.temperature,
            top_p: request.top_p,
            max_output_tokens: request.max_tokens,
        },
    }
}

/// Running state of one SSE exchange
#[derive(Default)]
struct StreamAccumulator {
    text: String,
    finish_reason: Option<String>,
    usage: Option<TokenUsage>,
}

impl StreamAccumulator {
    /// Fold one wire event into the accumulator. Returns a cumulative
    /// content chunk when the event carried new text.
    fn absorb(&mut self, event: GenerateContentResponse) -> Option<StreamChunk> {
        if let Some(usage) = event.usage_metadata {
            self.usage = Some(TokenUsage {
                prompt_tokens: usage.prompt_token_count,
                completion_tokens: usage.candidates_token_count,
                total_tokens: usage.total_token_count,
            });
        }

        let mut grew = false;
        if let Some(candidate) = event.candidates.into_iter().next() {
            if let Some(reason) = candidate.finish_reason {
                self.finish_reason = Some(reason);
            }
            if let Some(content) = candidate.content {
                for part in content.parts {
                    if let Part::Text { text } = part {
                        self.text.push_str(&text);
                        grew = true;
                    }
                }
            }
        }

        grew.then(|| StreamChunk::Content {
            text: self.text.clone(),
        })
    }

    fn into_done(self) -> StreamChunk {
        StreamChunk::Done {
            finish_reason: self.finish_reason,
            usage: self.usage,
        }
    }
}

/// Byte-level line splitter for the SSE body.
///
/// Network chunks can cut a multi-byte UTF-8 character in half, so decoding
/// happens per complete line: `\n` is an ASCII boundary, which makes every
/// extracted line a whole number of characters.
#[derive(Default)]
struct LineBuffer {
    bytes: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
    }

    /// Pop the next complete line, without its `\n` or `\r\n` terminator
    fn next_line(&mut self) -> Option<String> {
        let newline = self.bytes.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.bytes.drain(..=newline).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}

/// Extract the JSON payload of one SSE line, if it carries one
fn sse_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data: ")
        .or_else(|| line.strip_prefix("data:"))
        .map(str::trim)
        .filter(|payload| !payload.is_empty())
}

/// Pull a human-readable message out of an API error body
fn error_message(status: reqwest::StatusCode, body: &str) -> String {
    serde_json::from_str::<ApiErrorResponse>(body)
        .map(|response| response.error.message)
        .unwrap_or_else(|_| format!("Gemini request failed with status {}", status))
}

#[async_trait]
impl ModelAdapter for GeminiAdapter {
    async fn open_stream(&self, credential: &str, request: StreamRequest) -> Result<ChunkStream> {
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.base_url, request.model
        );
        let body = build_request(&request);
        let cancel = request.cancel.clone();

        debug!(model = %request.model, turns = request.history.len(), "Opening Gemini stream");

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", credential)
            .json(&body)
            .send()
            .await
            .map_err(|e| anyhow!("Failed to reach Gemini: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = error_message(status, &body);
            warn!(%status, "Gemini stream rejected");
            return Ok(Box::pin(futures::stream::once(async move {
                Ok(StreamChunk::Error { message })
            })));
        }

        let mut bytes = response.bytes_stream();

        Ok(Box::pin(async_stream::stream! {
            let mut accumulator = StreamAccumulator::default();
            let mut buffer = LineBuffer::default();

            'receive: loop {
                let Some(chunk) = bytes.next().await else {
                    break 'receive;
                };
                if cancel.is_cancelled() {
                    debug!("Gemini stream cancelled, stopping consumption");
                    return;
                }
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Ok(StreamChunk::Error {
                            message: format!("Stream transport error: {}", e),
                        });
                        return;
                    }
                };
                buffer.push(&chunk);

                // Process complete lines, keep the trailing partial line buffered
                while let Some(line) = buffer.next_line() {
                    let Some(payload) = sse_payload(&line) else {
                        continue;
                    };
                    match serde_json::from_str::<GenerateContentResponse>(payload) {
                        Ok(event) => {
                            if let Some(content) = accumulator.absorb(event) {
                                yield Ok(content);
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "Skipping malformed Gemini event");
                        }
                    }
                }
            }

            if cancel.is_cancelled() {
                return;
            }
            yield Ok(accumulator.into_done());
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::glimpse::services::stream::CancelToken;

    #[test]
    fn test_request_serialization_with_video_part() {
        let request = StreamRequest {
            model: "gemini-2.5-flash".to_string(),
            history: vec![ChatTurn {
                role: TurnRole::User,
                parts: vec![
                    TurnPart::Text("What happens here?".to_string()),
                    TurnPart::Video("https://youtu.be/abc".to_string()),
                ],
            }],
            system_prompt: Some("Be brief.".to_string()),
            temperature: 0.75,
            top_p: 0.5,
            max_tokens: 1024,
            cancel: CancelToken::new(),
        };

        let json = serde_json::to_value(build_request(&request)).unwrap();
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["contents"][0]["parts"][0]["text"], "What happens here?");
        assert_eq!(
            json["contents"][0]["parts"][1]["fileData"]["fileUri"],
            "https://youtu.be/abc"
        );
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "Be brief.");
        assert_eq!(json["generationConfig"]["topP"], 0.5);
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 1024);
    }

    #[test]
    fn test_blank_system_prompt_is_omitted() {
        let request = StreamRequest {
            model: "gemini-2.5-flash".to_string(),
            history: Vec::new(),
            system_prompt: Some("   ".to_string()),
            temperature: 1.0,
            top_p: 0.95,
            max_tokens: 4096,
            cancel: CancelToken::new(),
        };
        let json = serde_json::to_value(build_request(&request)).unwrap();
        assert!(json.get("systemInstruction").is_none());
    }

    #[test]
    fn test_accumulator_folds_deltas_into_cumulative_chunks() {
        let mut accumulator = StreamAccumulator::default();

        let first: GenerateContentResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Hi"}]}}]}"#,
        )
        .unwrap();
        let second: GenerateContentResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"role":"model","parts":[{"text":" there"}]},
                "finishReason":"STOP"}],
                "usageMetadata":{"promptTokenCount":1,"candidatesTokenCount":2,"totalTokenCount":3}}"#,
        )
        .unwrap();

        let chunk = accumulator.absorb(first).unwrap();
        assert!(matches!(chunk, StreamChunk::Content { ref text } if text == "Hi"));

        let chunk = accumulator.absorb(second).unwrap();
        assert!(matches!(chunk, StreamChunk::Content { ref text } if text == "Hi there"));

        match accumulator.into_done() {
            StreamChunk::Done {
                finish_reason,
                usage,
            } => {
                assert_eq!(finish_reason.as_deref(), Some("STOP"));
                assert_eq!(usage.unwrap().total_tokens, 3);
            }
            other => panic!("expected Done, got {:?}", other),
        }
    }

    #[test]
    fn test_event_without_text_yields_no_chunk() {
        let mut accumulator = StreamAccumulator::default();
        let event: GenerateContentResponse =
            serde_json::from_str(r#"{"candidates":[{"finishReason":"STOP"}]}"#).unwrap();
        assert!(accumulator.absorb(event).is_none());
    }

    #[test]
    fn test_line_buffer_reassembles_utf8_split_across_chunks() {
        let line = "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"caf\u{e9} \u{2026}\"}]}}]}\n";
        let bytes = line.as_bytes();

        // Cut inside the three-byte ellipsis so neither chunk is valid UTF-8
        // on its own
        let split = line.find('\u{2026}').unwrap() + 1;
        assert!(std::str::from_utf8(&bytes[..split]).is_err());

        let mut buffer = LineBuffer::default();
        buffer.push(&bytes[..split]);
        assert!(buffer.next_line().is_none());

        buffer.push(&bytes[split..]);
        let line = buffer.next_line().unwrap();
        assert!(!line.contains('\u{fffd}'));

        let event: GenerateContentResponse =
            serde_json::from_str(sse_payload(&line).unwrap()).unwrap();
        let mut accumulator = StreamAccumulator::default();
        match accumulator.absorb(event).unwrap() {
            StreamChunk::Content { text } => assert_eq!(text, "caf\u{e9} \u{2026}"),
            other => panic!("expected Content, got {:?}", other),
        }
    }

    #[test]
    fn test_line_buffer_strips_crlf_and_keeps_partial_tail() {
        let mut buffer = LineBuffer::default();
        buffer.push(b"data: one\r\ndata: tw");
        assert_eq!(buffer.next_line().as_deref(), Some("data: one"));
        assert!(buffer.next_line().is_none());

        buffer.push(b"o\n");
        assert_eq!(buffer.next_line().as_deref(), Some("data: two"));
    }

    #[test]
    fn test_sse_payload_extraction() {
        assert_eq!(sse_payload("data: {\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(sse_payload("data:{\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(sse_payload(": keep-alive"), None);
        assert_eq!(sse_payload(""), None);
        assert_eq!(sse_payload("data: "), None);
    }

    #[test]
    fn test_error_message_falls_back_to_status() {
        let message = error_message(
            reqwest::StatusCode::BAD_REQUEST,
            r#"{"error":{"message":"API key not valid."}}"#,
        );
        assert_eq!(message, "API key not valid.");

        let message = error_message(reqwest::StatusCode::INTERNAL_SERVER_ERROR, "not json");
        assert!(message.contains("500"));
    }
}
