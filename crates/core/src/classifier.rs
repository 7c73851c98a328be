//! Search-type classification: one chat call with a closed two-capability
//! schema decides which retrieval path answers the query, or asks the user
//! for more information.

use crate::error::PipelineError;
use crate::models::Turn;
use anyhow::{anyhow, Context};
use providers::{ChatMessage, ChatProvider, ChatRequest, ChatResponse, ToolSpec};
use serde::Deserialize;

const SYSTEM_INSTRUCTION: &str = "You are a helpful assistant. First, summarize the \
conversation history. Then determine if the user's query is location-based, \
direct-answer, or requires more information. Provide the summary explicitly.";

pub const DIRECT_TOOL: &str = "search_direct_questions";
pub const LOCATION_TOOL: &str = "search_location_questions";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchKind {
    Direct,
    Location,
}

/// Outcome of classification. `Clarify` carries the assistant's free-text
/// follow-up; `Route` carries the summarized, self-contained query that
/// replaces the raw utterance downstream.
#[derive(Debug, Clone)]
pub enum Decision {
    Clarify(String),
    Route {
        kind: SearchKind,
        conversation_id: Option<String>,
        query: String,
    },
}

pub async fn classify(
    chat: &dyn ChatProvider,
    history: &[Turn],
    query: &str,
) -> Result<Decision, PipelineError> {
    let mut messages = vec![ChatMessage::system(SYSTEM_INSTRUCTION)];
    for turn in history {
        messages.push(ChatMessage {
            role: turn.role.as_chat_role().to_string(),
            content: turn.content.clone(),
        });
    }
    messages.push(ChatMessage::user(query));

    let resp = chat
        .chat(ChatRequest {
            messages,
            tools: tool_specs(),
            temperature: None,
            stream_to: None,
        })
        .await?;

    decision_from_response(resp)
}

fn tool_specs() -> Vec<ToolSpec> {
    let parameters = serde_json::json!({
        "type": "object",
        "properties": {
            "id": {
                "type": "string",
                "description": "The conversation id. For new conversations, this will be null, however for existing conversations, this will be passed in by the user to continue that conversation"
            },
            "query": {
                "type": "string",
                "description": "The question the user is trying to find an answer for"
            }
        },
        "required": ["id", "query"],
        "additionalProperties": false
    });

    vec![
        ToolSpec {
            name: DIRECT_TOOL.to_string(),
            description: "Retrieve a direct answer from the knowledge base based on a \
                user question. Call this whenever you get a direct question that should \
                be answered without a specific location. For example when a user asks \
                'newborn nutritional advice' or 'birth control alternatives'"
                .to_string(),
            parameters: parameters.clone(),
        },
        ToolSpec {
            name: LOCATION_TOOL.to_string(),
            description: "Retrieve a location from the locations table based on a user \
                question. Call this whenever you get a question that should be answered \
                with a specific location. For example when a user asks 'mental health \
                support in Bryan, Texas' or 'Where can I get a root canal in Corpus \
                Christi'"
                .to_string(),
            parameters,
        },
    ]
}

#[derive(Deserialize)]
struct RouteArguments {
    id: Option<String>,
    query: String,
}

fn decision_from_response(resp: ChatResponse) -> Result<Decision, PipelineError> {
    if let Some(reason) = resp.refusal {
        return Err(PipelineError::ClassificationRefused(reason));
    }

    // If multiple capabilities were somehow selected, only the first is honored.
    let Some(call) = resp.tool_calls.into_iter().next() else {
        return Ok(Decision::Clarify(resp.content.unwrap_or_default()));
    };

    let kind = match call.name.as_str() {
        DIRECT_TOOL => SearchKind::Direct,
        LOCATION_TOOL => SearchKind::Location,
        other => return Err(anyhow!("unknown capability selected: {}", other).into()),
    };

    let args: RouteArguments = serde_json::from_str(&call.arguments)
        .with_context(|| format!("malformed arguments for {}", call.name))?;

    Ok(Decision::Route {
        kind,
        conversation_id: args.id,
        query: args.query,
    })
}
