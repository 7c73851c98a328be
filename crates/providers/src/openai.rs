use crate::{
    ChatProvider, ChatRequest, ChatResponse, EmbedResponse, EmbeddingProvider, ProviderError,
    TokenSink, ToolCall,
};
use futures_util::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub embedding_model: String,
    pub chat_model: String,
}

#[derive(Clone)]
pub struct OpenAiProvider {
    client: Client,
    cfg: Arc<OpenAiConfig>,
}

impl OpenAiProvider {
    pub fn new(cfg: OpenAiConfig) -> Self {
        Self {
            client: Client::new(),
            cfg: Arc::new(cfg),
        }
    }
}

#[derive(Deserialize)]
struct EmbeddingApiResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[async_trait::async_trait]
impl EmbeddingProvider for OpenAiProvider {
    async fn embed(&self, texts: &[String]) -> Result<EmbedResponse, ProviderError> {
        #[derive(serde::Serialize)]
        struct EmbedRequest<'a> {
            model: &'a str,
            input: &'a [String],
        }

        let body = EmbedRequest {
            model: &self.cfg.embedding_model,
            input: texts,
        };

        let resp = self
            .client
            .post(format!("{}/v1/embeddings", self.cfg.base_url))
            .bearer_auth(&self.cfg.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;

        let parsed: EmbeddingApiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;

        Ok(EmbedResponse {
            vectors: parsed.data.into_iter().map(|d| d.embedding).collect(),
        })
    }
}

#[derive(serde::Serialize)]
struct ApiToolSpec<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: &'a crate::ToolSpec,
}

#[derive(serde::Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [crate::ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ApiToolSpec<'a>>,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatApiResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize, Default)]
struct ChoiceMessage {
    content: Option<String>,
    refusal: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ApiToolCall>,
}

#[derive(Deserialize)]
struct ApiToolCall {
    function: ApiFunction,
}

#[derive(Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[async_trait::async_trait]
impl ChatProvider for OpenAiProvider {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let body = ChatCompletionRequest {
            model: &self.cfg.chat_model,
            messages: &req.messages,
            temperature: req.temperature,
            tools: req
                .tools
                .iter()
                .map(|t| ApiToolSpec {
                    kind: "function",
                    function: t,
                })
                .collect(),
            stream: req.stream_to.is_some(),
        };

        let builder = self
            .client
            .post(format!("{}/v1/chat/completions", self.cfg.base_url))
            .bearer_auth(&self.cfg.api_key)
            .json(&body);

        if let Some(sink) = req.stream_to {
            return stream_chat(builder, sink).await;
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;

        let parsed: ChatApiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;

        let message = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .unwrap_or_default();

        Ok(ChatResponse {
            content: message.content,
            tool_calls: message
                .tool_calls
                .into_iter()
                .map(|tc| ToolCall {
                    name: tc.function.name,
                    arguments: tc.function.arguments,
                })
                .collect(),
            refusal: message.refusal,
        })
    }
}

/// Consume an OpenAI-style SSE stream, forwarding content deltas to the sink
/// while aggregating the full reply. Sink send errors are ignored.
async fn stream_chat(
    builder: reqwest::RequestBuilder,
    sink: TokenSink,
) -> Result<ChatResponse, ProviderError> {
    let resp = builder
        .send()
        .await
        .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
    if !resp.status().is_success() {
        return Err(ProviderError::RequestFailed(format!(
            "status {}",
            resp.status()
        )));
    }

    let mut stream = resp.bytes_stream();
    let mut buffer = String::new();
    let mut content = String::new();
    let mut refusal: Option<String> = None;

    'outer: while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        buffer.push_str(&String::from_utf8_lossy(&chunk));

        while let Some(pos) = buffer.find('\n') {
            let line = buffer[..pos].trim().to_string();
            buffer.drain(..=pos);

            let Some(data) = line.strip_prefix("data: ") else {
                continue;
            };
            if data == "[DONE]" {
                break 'outer;
            }
            let Ok(evt) = serde_json::from_str::<serde_json::Value>(data) else {
                continue;
            };
            let delta = &evt["choices"][0]["delta"];
            if let Some(token) = delta["content"].as_str() {
                if !token.is_empty() {
                    content.push_str(token);
                    let _ = sink.send(token.to_string());
                }
            }
            if let Some(r) = delta["refusal"].as_str() {
                refusal.get_or_insert_with(String::new).push_str(r);
            }
        }
    }

    Ok(ChatResponse {
        content: (!content.is_empty()).then_some(content),
        tool_calls: Vec::new(),
        refusal,
    })
}
