use async_trait::async_trait;
use carefinder_core::error::PipelineError;
use carefinder_core::history;
use carefinder_core::locations::TableColumnRetriever;
use carefinder_core::models::{ResponseType, RetrievedDocument, Role};
use carefinder_core::pipeline::SearchPipeline;
use carefinder_core::retriever::Retriever;
use providers::{
    ChatProvider, ChatRequest, ChatResponse, EmbedResponse, EmbeddingProvider, ProviderError,
    ToolCall,
};
use sqlx::{Row, SqlitePool};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Chat double that replays a fixed script and records every request.
struct ScriptedChat {
    responses: Mutex<VecDeque<ChatResponse>>,
    seen: Mutex<Vec<ChatRequest>>,
}

impl ScriptedChat {
    fn new(responses: Vec<ChatResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            seen: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatProvider for ScriptedChat {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let resp = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ProviderError::RequestFailed("script exhausted".into()))?;
        if let Some(sink) = &req.stream_to {
            if let Some(content) = &resp.content {
                for token in content.split_inclusive(' ') {
                    let _ = sink.send(token.to_string());
                }
            }
        }
        self.seen.lock().unwrap().push(req);
        Ok(resp)
    }
}

struct FixedEmbedder(Vec<f32>);

#[async_trait]
impl EmbeddingProvider for FixedEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<EmbedResponse, ProviderError> {
        Ok(EmbedResponse {
            vectors: vec![self.0.clone(); texts.len()],
        })
    }
}

struct StaticRetriever(Vec<RetrievedDocument>);

#[async_trait]
impl Retriever for StaticRetriever {
    async fn retrieve(&self, _query: &str) -> anyhow::Result<Vec<RetrievedDocument>> {
        Ok(self.0.clone())
    }
}

fn content(text: &str) -> ChatResponse {
    ChatResponse {
        content: Some(text.to_string()),
        ..Default::default()
    }
}

fn tool_call(name: &str, arguments: &str) -> ChatResponse {
    ChatResponse {
        tool_calls: vec![ToolCall {
            name: name.to_string(),
            arguments: arguments.to_string(),
        }],
        ..Default::default()
    }
}

async fn test_pool(name: &str) -> SqlitePool {
    let url = format!("sqlite://file:{}?mode=memory&cache=shared", name);
    let pool = storage::connect(&url).await.unwrap();
    storage::migrate(&pool).await.unwrap();
    pool
}

async fn message_count(pool: &SqlitePool, session_id: &str) -> i64 {
    sqlx::query("SELECT COUNT(*) FROM messages WHERE session_id = ?")
        .bind(session_id)
        .fetch_one(pool)
        .await
        .unwrap()
        .get(0)
}

async fn insert_location(pool: &SqlitePool, id: &str, name: &str, embedding: &str) {
    sqlx::query(
        "INSERT INTO locations (id, name, address, city, state, country, zip_code, \
         latitude, longitude, description, phone, sunday_hours, monday_hours, \
         tuesday_hours, wednesday_hours, thursday_hours, friday_hours, saturday_hours, \
         rating, address_link, website, resource_type, county, embedding) \
         VALUES (?, ?, '100 Main St', 'Corpus Christi', 'TX', 'USA', '78401', \
         27.8, -97.4, 'Community clinic', '361-555-0100', 'Closed', '8am-5pm', \
         '8am-5pm', '8am-5pm', '8am-5pm', '8am-3pm', 'Closed', \
         '4.0', 'https://maps.example.com', 'https://example.com', 'dental', 'Nueces', ?)",
    )
    .bind(id)
    .bind(name)
    .bind(embedding)
    .execute(pool)
    .await
    .unwrap();
}

fn direct_pipeline(chat: Arc<ScriptedChat>, docs: Vec<RetrievedDocument>, pool: SqlitePool) -> SearchPipeline {
    SearchPipeline::new(
        chat,
        Arc::new(StaticRetriever(docs)),
        Arc::new(StaticRetriever(Vec::new())),
        pool,
    )
}

#[tokio::test]
async fn direct_question_returns_answer_without_locations() {
    let pool = test_pool("direct_question").await;
    let chat = Arc::new(ScriptedChat::new(vec![
        tool_call(
            "search_direct_questions",
            r#"{"id": null, "query": "Newborn nutritional advice"}"#,
        ),
        content(r#"{"sufficient": true}"#),
        content("Feed newborns every two to three hours."),
    ]));
    let docs = vec![RetrievedDocument::new(
        "Newborns typically feed 8-12 times in 24 hours.",
        "knowledge_base",
    )];
    let pipeline = direct_pipeline(chat.clone(), docs, pool.clone());

    let resp = pipeline
        .answer("Newborn nutritional advice", Some("conv-a"), false, None)
        .await
        .unwrap();

    assert_eq!(resp.response_type, ResponseType::Direct);
    assert!(resp.locations.is_empty());
    assert_eq!(resp.response, "Feed newborns every two to three hours.");
    assert_eq!(resp.user_query, "Newborn nutritional advice");
    assert_eq!(chat.calls(), 3);
    // Exchange persisted: summarized query + answer.
    assert_eq!(message_count(&pool, "conv-a").await, 2);
}

#[tokio::test]
async fn location_question_returns_ranked_records() {
    let pool = test_pool("location_question").await;
    // Query embedding is [1, 0]; similarity orders these as B, C, A.
    insert_location(&pool, "loc-a", "Far Clinic", "[0.0, 1.0]").await;
    insert_location(&pool, "loc-b", "Coastal Dental", "[1.0, 0.0]").await;
    insert_location(&pool, "loc-c", "Bayside Dental", "[0.6, 0.8]").await;

    let embedder = Arc::new(FixedEmbedder(vec![1.0, 0.0]));
    let location = TableColumnRetriever::build(&pool, embedder, 5)
        .await
        .unwrap();
    assert_eq!(location.len(), 3);

    let chat = Arc::new(ScriptedChat::new(vec![
        tool_call(
            "search_location_questions",
            r#"{"id": "conv-b", "query": "Dental services in Corpus Christi"}"#,
        ),
        content(r#"{"sufficient": true}"#),
        content("Here are dental providers near you."),
    ]));
    let pipeline = SearchPipeline::new(
        chat.clone(),
        Arc::new(StaticRetriever(Vec::new())),
        Arc::new(location),
        pool.clone(),
    );

    let resp = pipeline
        .answer("Dental services in Corpus Christi", Some("conv-b"), false, None)
        .await
        .unwrap();

    assert_eq!(resp.response_type, ResponseType::Location);
    assert_eq!(resp.locations.len(), 3);
    assert_eq!(resp.locations[0]["name"], "Coastal Dental");
    assert_eq!(resp.locations[1]["name"], "Bayside Dental");
    assert_eq!(resp.locations[2]["name"], "Far Clinic");
    assert_eq!(
        resp.locations[0]["address"],
        "100 Main St, Corpus Christi, TX 78401"
    );
}

#[tokio::test]
async fn clarification_appends_two_turns_and_short_circuits() {
    let pool = test_pool("clarification").await;
    let chat = Arc::new(ScriptedChat::new(vec![content(
        "Could you tell me which city you are in?",
    )]));
    let pipeline = direct_pipeline(chat.clone(), Vec::new(), pool.clone());

    let resp = pipeline
        .answer("I need help", Some("conv-c"), true, None)
        .await
        .unwrap();

    assert_eq!(resp.response, "Could you tell me which city you are in?");
    assert_eq!(resp.response_type, ResponseType::Direct);
    assert!(resp.locations.is_empty());
    // Only the classification call ran.
    assert_eq!(chat.calls(), 1);

    let turns = history::reconstruct(&pool, "conv-c").await.unwrap();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].role, Role::User);
    assert_eq!(turns[0].content, "I need help");
    assert_eq!(turns[1].role, Role::Assistant);
    assert_eq!(turns[1].content, "Could you tell me which city you are in?");
}

#[tokio::test]
async fn refusal_is_a_distinct_error_with_no_persistence() {
    let pool = test_pool("refusal").await;
    let chat = Arc::new(ScriptedChat::new(vec![ChatResponse {
        refusal: Some("safety policy".to_string()),
        ..Default::default()
    }]));
    let pipeline = direct_pipeline(chat, Vec::new(), pool.clone());

    let err = pipeline
        .answer("unsafe question", Some("conv-d"), false, None)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::ClassificationRefused(_)));
    assert_eq!(message_count(&pool, "conv-d").await, 0);
}

#[tokio::test]
async fn history_reconstruction_preserves_order_and_handles_unknown_ids() {
    let pool = test_pool("history_order").await;
    storage::append_messages(
        &pool,
        "conv-e",
        &[("human", "first"), ("ai", "second"), ("human", "third")],
    )
    .await
    .unwrap();

    let turns = history::reconstruct(&pool, "conv-e").await.unwrap();
    let contents: Vec<&str> = turns.iter().map(|t| t.content.as_str()).collect();
    assert_eq!(contents, vec!["first", "second", "third"]);

    let empty = history::reconstruct(&pool, "never-seen").await.unwrap();
    assert!(empty.is_empty());
}

#[tokio::test]
async fn unrecognized_role_label_fails_loudly() {
    let pool = test_pool("bad_role").await;
    storage::append_messages(&pool, "conv-f", &[("robot", "hello")])
        .await
        .unwrap();
    assert!(history::reconstruct(&pool, "conv-f").await.is_err());
}

#[tokio::test]
async fn streamed_tokens_match_the_final_answer() {
    let pool = test_pool("streaming").await;
    let chat = Arc::new(ScriptedChat::new(vec![
        tool_call(
            "search_direct_questions",
            r#"{"id": null, "query": "mastitis treatment"}"#,
        ),
        content(r#"{"sufficient": true}"#),
        content("Warm compresses and frequent feeding help."),
    ]));
    let docs = vec![RetrievedDocument::new("Mastitis care basics.", "knowledge_base")];
    let pipeline = direct_pipeline(chat, docs, pool);

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let resp = pipeline
        .answer("mastitis treatment", None, false, Some(tx))
        .await
        .unwrap();

    let mut streamed = String::new();
    while let Ok(token) = rx.try_recv() {
        streamed.push_str(&token);
    }
    assert_eq!(streamed, resp.response);
}
