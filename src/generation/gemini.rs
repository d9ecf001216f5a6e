//! Gemini `generateContent` / `streamGenerateContent` client.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::{GenerationError, GenerationRequest, GenerationResult, TextGenerator};

pub struct GeminiGenerator {
    client: Client,
    base_url: String,
    model: String,
    temperature: f32,
    max_output_tokens: u32,
}

impl GeminiGenerator {
    pub fn new(
        api_key: &str,
        base_url: &str,
        model: &str,
        temperature: f32,
        max_output_tokens: u32,
        timeout: Duration,
    ) -> GenerationResult<Self> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(GenerationError::Config("missing Gemini API key".to_string()));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-goog-api-key",
            HeaderValue::from_str(api_key)
                .map_err(|e| GenerationError::Config(format!("invalid Gemini API key: {e}")))?,
        );
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.trim_start_matches("models/").to_string(),
            temperature,
            max_output_tokens,
        })
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/v1beta/models/{}:{method}", self.base_url, self.model)
    }

    fn body<'a>(&self, request: &'a GenerationRequest) -> GenerateContentRequest<'a> {
        GenerateContentRequest {
            system_instruction: (!request.system_prompt.is_empty()).then(|| SystemInstruction {
                parts: [Part {
                    text: &request.system_prompt,
                }],
            }),
            contents: [UserContent {
                role: "user",
                parts: [Part {
                    text: &request.user_prompt,
                }],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_output_tokens,
            },
        }
    }
}

async fn check_status(response: Response) -> GenerationResult<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<body unavailable>".to_string());
    Err(GenerationError::Api { status, body })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction<'a>>,
    contents: [UserContent<'a>; 1],
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct SystemInstruction<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct UserContent<'a> {
    role: &'static str,
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

impl GenerateContentResponse {
    /// Concatenated text of the first candidate.
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Incremental decoder for `text/event-stream` bodies.
///
/// Collects the `data:` payloads of complete lines; partial lines are kept
/// until the next push.
#[derive(Default)]
struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\r', '\n']);
            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim_start();
                if !data.is_empty() {
                    events.push(data.to_string());
                }
            }
        }
        events
    }

    /// Payload of an unterminated final line, if any.
    fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let line = String::from_utf8_lossy(&rest);
        line.trim()
            .strip_prefix("data:")
            .map(|d| d.trim_start().to_string())
            .filter(|d| !d.is_empty())
    }
}

fn parse_event(data: &str) -> GenerationResult<String> {
    let parsed: GenerateContentResponse = serde_json::from_str(data)
        .map_err(|e| GenerationError::Response(format!("invalid stream event: {e}")))?;
    Ok(parsed.text())
}

#[async_trait]
impl TextGenerator for GeminiGenerator {
    async fn generate(&self, request: &GenerationRequest) -> GenerationResult<String> {
        let response = self
            .client
            .post(self.endpoint("generateContent"))
            .json(&self.body(request))
            .send()
            .await?;
        let response = check_status(response).await?;

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Response(e.to_string()))?;
        if parsed.candidates.is_empty() {
            return Err(GenerationError::Response("no candidates returned".to_string()));
        }
        Ok(parsed.text())
    }

    async fn generate_stream(
        &self,
        request: &GenerationRequest,
        sink: mpsc::Sender<String>,
    ) -> GenerationResult<()> {
        let response = self
            .client
            .post(format!("{}?alt=sse", self.endpoint("streamGenerateContent")))
            .json(&self.body(request))
            .send()
            .await?;
        let response = check_status(response).await?;

        let mut decoder = SseDecoder::default();
        let mut stream = response.bytes_stream();
        while let Some(bytes) = stream.next().await {
            let bytes = bytes?;
            for event in decoder.push(&bytes) {
                let text = parse_event(&event)?;
                if text.is_empty() {
                    continue;
                }
                if sink.send(text).await.is_err() {
                    tracing::debug!(target: "generation", "stream receiver dropped, stopping");
                    return Ok(());
                }
            }
        }

        if let Some(event) = decoder.finish() {
            let text = parse_event(&event)?;
            if !text.is_empty() {
                let _ = sink.send(text).await;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator() -> GeminiGenerator {
        GeminiGenerator::new(
            "key",
            "https://generativelanguage.googleapis.com/",
            "gemini-2.0-flash",
            0.2,
            256,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_request_body_uses_system_instruction() {
        let request = GenerationRequest {
            system_prompt: "Answer from context.".to_string(),
            user_prompt: "What is a heap?".to_string(),
        };
        let generator = generator();
        let json = serde_json::to_value(generator.body(&request)).unwrap();

        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "Answer from context.");
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["contents"][0]["parts"][0]["text"], "What is a heap?");
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 256);
        assert_eq!(
            generator.endpoint("generateContent"),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent"
        );
    }

    #[test]
    fn test_empty_system_prompt_omitted() {
        let request = GenerationRequest {
            system_prompt: String::new(),
            user_prompt: "hi".to_string(),
        };
        let json = serde_json::to_value(generator().body(&request)).unwrap();
        assert!(json.get("systemInstruction").is_none());
    }

    #[test]
    fn test_response_text_joins_parts() {
        let raw = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"A heap "},{"text":"is a tree."}]}}]}"#;
        let parsed: GenerateContentResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.text(), "A heap is a tree.");
    }

    #[test]
    fn test_sse_decoder_handles_split_lines() {
        let mut decoder = SseDecoder::default();
        let first = decoder.push(b"data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Hel");
        assert!(first.is_empty());

        let second = decoder.push(b"lo\"}]}}]}\r\n\r\ndata: {\"candidates\":[]}\n");
        assert_eq!(second.len(), 2);
        assert_eq!(parse_event(&second[0]).unwrap(), "Hello");
        assert_eq!(parse_event(&second[1]).unwrap(), "");
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn test_sse_decoder_flushes_unterminated_line() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b": keep-alive\ndata: {\"candidates\":[]}").is_empty());
        assert_eq!(decoder.finish().as_deref(), Some("{\"candidates\":[]}"));
    }

    #[test]
    fn test_invalid_event_is_an_error() {
        assert!(matches!(parse_event("not json"), Err(GenerationError::Response(_))));
    }
}
