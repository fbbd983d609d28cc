use crate::categories::{CategorySet, ExtractedCategories, EXTRACTION_SYSTEM_PROMPT};
use crate::config::Config;
use crate::models::*;
use anyhow::{anyhow, Context, Result};
use futures::stream::{self, BoxStream, StreamExt};
use regex::Regex;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;

const RERANK_MAX_TOKENS: u32 = 1000;

pub struct OpenAiService {
    client: Client,
    api_key: String,
    base_url: String,
    extraction_model: String,
    embedding_model: String,
    rerank_model: String,
    chat_model: String,
    code_fence: Regex,
}

impl OpenAiService {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            client: Client::new(),
            api_key: config.openai_api_key.clone(),
            base_url: config.openai_base_url.clone(),
            extraction_model: config.extraction_model.clone(),
            embedding_model: config.embedding_model.clone(),
            rerank_model: config.rerank_model.clone(),
            chat_model: config.chat_model.clone(),
            code_fence: Regex::new(r"(?s)^\s*```[a-zA-Z]*\s*(.*?)\s*```\s*$")?,
        })
    }

    pub async fn extract_categories(
        &self,
        data: &str,
        categories: &CategorySet,
    ) -> Result<ExtractedCategories> {
        log::debug!("Extracting categories with {}", self.extraction_model);

        let request = ChatCompletionRequest {
            model: self.extraction_model.clone(),
            messages: vec![
                ChatMessage::system(EXTRACTION_SYSTEM_PROMPT),
                ChatMessage::user(categories.extraction_prompt(data)),
            ],
            response_format: Some(categories.response_format()),
            max_tokens: None,
            stream: None,
        };

        let content = self.complete(&request).await?;
        let extracted = ExtractedCategories::parse(&content, categories)?;
        log::debug!("Extracted {} categories", extracted.len());
        Ok(extracted)
    }

    /// Embeds `inputs` in one request. The result is in input order.
    pub async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: self.embedding_model.clone(),
            input: inputs.to_vec(),
        };

        let response: EmbeddingResponse = self
            .post("embeddings", &request)
            .await?
            .json()
            .await
            .context("invalid embeddings response")?;

        let mut data = response.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }

    /// Asks the model which candidates best answer `query`, most relevant first.
    ///
    /// Only ids from `candidates` survive, each once, with the candidate's own text.
    pub async fn rank_candidates(
        &self,
        query: &str,
        candidates: &[Candidate],
    ) -> Result<Vec<Candidate>> {
        log::info!("Re-ranking {} candidates with {}", candidates.len(), self.rerank_model);

        let request = ChatCompletionRequest {
            model: self.rerank_model.clone(),
            messages: vec![ChatMessage::user(build_rerank_prompt(query, candidates)?)],
            response_format: None,
            max_tokens: Some(RERANK_MAX_TOKENS),
            stream: None,
        };

        let content = self.complete(&request).await?;
        self.parse_ranking(&content, candidates)
    }

    /// Streams the model's reply to a single user message, one content delta per item.
    pub async fn stream_chat(&self, message: &str) -> Result<BoxStream<'static, Result<String>>> {
        let request = ChatCompletionRequest {
            model: self.chat_model.clone(),
            messages: vec![ChatMessage::user(message)],
            response_format: None,
            max_tokens: None,
            stream: Some(true),
        };

        let response = self.post("chat/completions", &request).await?;
        let mut decoder = SseDecoder::default();

        let deltas = response
            .bytes_stream()
            .map(move |chunk| {
                let bytes = chunk.context("chat stream interrupted")?;
                decoder.push(&bytes)
            })
            .flat_map(|batch| {
                let items: Vec<Result<String>> = match batch {
                    Ok(deltas) => deltas.into_iter().map(Ok).collect(),
                    Err(e) => vec![Err(e)],
                };
                stream::iter(items)
            });

        Ok(deltas.boxed())
    }

    async fn complete(&self, request: &ChatCompletionRequest) -> Result<String> {
        let response: ChatCompletionResponse = self
            .post("chat/completions", request)
            .await?
            .json()
            .await
            .context("invalid chat completion response")?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("OpenAI returned no choices"))
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<reqwest::Response> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .with_context(|| format!("request to {} failed", url))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("OpenAI API error ({}): {}", status, error_text));
        }

        Ok(response)
    }

    fn parse_ranking(&self, content: &str, candidates: &[Candidate]) -> Result<Vec<Candidate>> {
        let body = match self.code_fence.captures(content) {
            Some(caps) => caps.get(1).map(|m| m.as_str()).unwrap_or(content),
            None => content,
        };

        let value: Value = serde_json::from_str(body.trim())
            .map_err(|e| anyhow!("ranking reply is not JSON: {} ({})", e, content))?;

        let items = match value {
            Value::Array(items) => items,
            Value::Object(map) => map
                .into_iter()
                .find_map(|(_, v)| match v {
                    Value::Array(items) => Some(items),
                    _ => None,
                })
                .ok_or_else(|| anyhow!("ranking reply has no array: {}", content))?,
            _ => return Err(anyhow!("ranking reply is not an array: {}", content)),
        };

        let mut seen = HashSet::new();
        let ranked = items
            .iter()
            .filter_map(|item| entity_id(item.get("id")?))
            .filter_map(|id| candidates.iter().find(|c| c.id == id))
            .filter(|c| seen.insert(c.id))
            .cloned()
            .collect();

        Ok(ranked)
    }
}

fn entity_id(value: &Value) -> Option<usize> {
    match value {
        Value::Number(n) => n.as_u64().map(|n| n as usize).or_else(|| {
            let f = n.as_f64()?;
            (f >= 0.0 && f.fract() == 0.0).then_some(f as usize)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn build_rerank_prompt(query: &str, candidates: &[Candidate]) -> Result<String> {
    let candidates_json = serde_json::to_string(candidates)?;
    Ok(format!(
        r#"User query:

"{query}"

Among the following candidates, identify those who match the user's query the most, and return their 'id' and 'text':
Candidates:
{candidates_json}

Please provide the matching candidates as a JSON array of objects with keys 'id' and 'text'."#
    ))
}

/// Reassembles `data:` lines of a chat completion event stream across chunk boundaries.
#[derive(Default)]
struct SseDecoder {
    buffer: Vec<u8>,
    done: bool,
}

impl SseDecoder {
    /// Frames after `data: [DONE]` are ignored.
    fn push(&mut self, bytes: &[u8]) -> Result<Vec<String>> {
        let mut deltas = Vec::new();
        if self.done {
            return Ok(deltas);
        }
        self.buffer.extend_from_slice(bytes);

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = std::str::from_utf8(&line).context("chat stream is not UTF-8")?;
            let line = line.trim_end_matches(['\n', '\r']);

            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim_start();
            if data == "[DONE]" {
                self.done = true;
                self.buffer.clear();
                break;
            }
            if data.is_empty() {
                continue;
            }

            let chunk: ChatCompletionChunk = serde_json::from_str(data)
                .with_context(|| format!("failed to parse stream data: {}", data))?;
            if let Some(content) = chunk
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.delta.content)
            {
                if !content.is_empty() {
                    deltas.push(content);
                }
            }
        }

        Ok(deltas)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: &str) -> Config {
        Config::from_lookup(|key| match key {
            "OPENAI_API_KEY" => Some("sk-test".to_string()),
            "OPENAI_BASE_URL" => Some(base_url.to_string()),
            "PINECONE_API_KEY" => Some("pc-test".to_string()),
            "PINECONE_HOST" => Some("http://localhost:1".to_string()),
            _ => None,
        })
        .unwrap()
    }

    fn candidates() -> Vec<Candidate> {
        vec![
            Candidate { id: 0, text: "name: Crocin".to_string() },
            Candidate { id: 3, text: "name: Dolo 650".to_string() },
        ]
    }

    fn service() -> OpenAiService {
        OpenAiService::new(&test_config("http://localhost:1")).unwrap()
    }

    fn completion(content: &str) -> Value {
        json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": content },
                "finish_reason": "stop"
            }]
        })
    }

    #[test]
    fn ranking_keeps_known_ids_in_model_order() {
        let reply = r#"[{"id": 3, "text": "whatever"}, {"id": "0", "text": "x"}, {"id": 9, "text": "y"}, {"id": 3}]"#;
        let ranked = service().parse_ranking(reply, &candidates()).unwrap();
        assert_eq!(ranked.iter().map(|c| c.id).collect::<Vec<_>>(), vec![3, 0]);
        assert_eq!(ranked[0].text, "name: Dolo 650");
    }

    #[test]
    fn ranking_accepts_whole_number_float_ids() {
        let reply = r#"[{"id": 3.0, "text": "a"}, {"id": 0.5, "text": "b"}, {"id": 0.0, "text": "c"}]"#;
        let ranked = service().parse_ranking(reply, &candidates()).unwrap();
        assert_eq!(ranked.iter().map(|c| c.id).collect::<Vec<_>>(), vec![3, 0]);
    }

    #[test]
    fn ranking_unwraps_code_fences() {
        let reply = "```json\n[{\"id\": 0, \"text\": \"name: Crocin\"}]\n```";
        let ranked = service().parse_ranking(reply, &candidates()).unwrap();
        assert_eq!(ranked, vec![candidates()[0].clone()]);
    }

    #[test]
    fn ranking_rejects_prose() {
        assert!(service()
            .parse_ranking("The best match is Crocin.", &candidates())
            .is_err());
    }

    #[test]
    fn rerank_prompt_embeds_query_and_candidates() {
        let prompt = build_rerank_prompt("mild fever", &candidates()).unwrap();
        assert!(prompt.contains("\"mild fever\""));
        assert!(prompt.contains(r#"{"id":3,"text":"name: Dolo 650"}"#));
        assert!(prompt.ends_with("with keys 'id' and 'text'."));
    }

    #[test]
    fn sse_decoder_joins_split_frames() {
        let mut decoder = SseDecoder::default();
        let first = decoder
            .push(b"data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\ndata: {\"choi")
            .unwrap();
        assert_eq!(first, vec!["Hel"]);

        let second = decoder
            .push(b"ces\":[{\"delta\":{\"content\":\"lo\"}}]}\r\n\ndata: [DONE]\n\n")
            .unwrap();
        assert_eq!(second, vec!["lo"]);
    }

    #[test]
    fn sse_decoder_stops_at_done() {
        let mut decoder = SseDecoder::default();
        let deltas = decoder
            .push(b"data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\ndata: [DONE]\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n\n")
            .unwrap();
        assert_eq!(deltas, vec!["Hi"]);

        let after = decoder
            .push(b"data: {\"choices\":[{\"delta\":{\"content\":\"again\"}}]}\n\n")
            .unwrap();
        assert!(after.is_empty());
    }

    #[test]
    fn sse_decoder_skips_role_only_deltas() {
        let mut decoder = SseDecoder::default();
        let deltas = decoder
            .push(b": keep-alive\ndata: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n")
            .unwrap();
        assert!(deltas.is_empty());
    }

    #[tokio::test]
    async fn extract_categories_sends_schema() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "gpt-4o",
                "response_format": { "type": "json_schema" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(
                r#"{"sideEffects": "Nausea", "uses": "Pain relief", "substitutes": "Calpol"}"#,
            )))
            .expect(1)
            .mount(&server)
            .await;

        let service = OpenAiService::new(&test_config(&server.uri())).unwrap();
        let extracted = service
            .extract_categories("name: Crocin", &CategorySet::medicine())
            .await
            .unwrap();

        assert_eq!(extracted.len(), 3);
        assert_eq!(extracted.iter().next(), Some(("sideEffects", "Nausea")));
    }

    #[tokio::test]
    async fn embed_orders_by_index() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "object": "list",
                "data": [
                    { "object": "embedding", "index": 1, "embedding": [0.0, 1.0] },
                    { "object": "embedding", "index": 0, "embedding": [1.0, 0.0] }
                ],
                "model": "text-embedding-ada-002"
            })))
            .mount(&server)
            .await;

        let service = OpenAiService::new(&test_config(&server.uri())).unwrap();
        let vectors = service
            .embed(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();

        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[tokio::test]
    async fn api_errors_carry_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let service = OpenAiService::new(&test_config(&server.uri())).unwrap();
        let err = service
            .rank_candidates("fever", &candidates())
            .await
            .unwrap_err()
            .to_string();

        assert!(err.contains("429"));
        assert!(err.contains("rate limited"));
    }

    #[tokio::test]
    async fn empty_choices_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
            .mount(&server)
            .await;

        let service = OpenAiService::new(&test_config(&server.uri())).unwrap();
        let err = service
            .extract_categories("name: Crocin", &CategorySet::medicine())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no choices"));
    }

    #[tokio::test]
    async fn stream_chat_yields_deltas() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Take \"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"rest.\"}}]}\n\n",
            "data: [DONE]\n\n"
        );
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({ "stream": true, "model": "gpt-4o-mini" })))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;

        let service = OpenAiService::new(&test_config(&server.uri())).unwrap();
        let deltas: Vec<String> = service
            .stream_chat("I have a headache")
            .await
            .unwrap()
            .map(|d| d.unwrap())
            .collect()
            .await;

        assert_eq!(deltas, vec!["Take ", "rest."]);
    }
}
