//! Integration tests for the LLM client.
//!
//! These tests make real API calls to an OpenAI-compatible endpoint.
//! Run with: API_KEY=your_key API_BASE_URL=https://... cargo test --test llm_integration -- --ignored

use std::time::Duration;

use pkg_mender::llm::{
    GenerationRequest, LlmProvider, Message, OpenAiCompatProvider, ToolDefinition,
};

fn get_test_api_key() -> String {
    std::env::var("API_KEY").expect("API_KEY environment variable must be set for integration tests")
}

fn get_test_base_url() -> String {
    std::env::var("API_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".to_string())
}

fn get_test_model() -> String {
    std::env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-5".to_string())
}

fn create_test_client() -> OpenAiCompatProvider {
    OpenAiCompatProvider::new(
        get_test_api_key(),
        get_test_base_url(),
        get_test_model(),
        Duration::from_secs(120),
    )
    .expect("client should build")
}

#[tokio::test]
#[ignore] // Run with: cargo test --test llm_integration -- --ignored
async fn test_simple_generation() {
    let client = create_test_client();

    let request = GenerationRequest::new(
        "",
        vec![
            Message::system("You are a helpful assistant. Reply concisely."),
            Message::user("What is 2 + 2? Reply with just the number."),
        ],
    );

    let response = client.generate(request).await;
    assert!(response.is_ok(), "Generation failed: {:?}", response.err());

    let response = response.expect("Should have response");
    let choice = response.first_choice().expect("Should have a choice");
    assert!(
        choice.message.text().contains('4'),
        "Response should contain '4', got: {}",
        choice.message.text()
    );
}

#[tokio::test]
#[ignore]
async fn test_model_requests_tool_call() {
    let client = create_test_client();

    let tool = ToolDefinition::function(
        "get_file_content",
        "Read a file from the package workspace",
        serde_json::json!({
            "type": "object",
            "properties": {"file_path": {"type": "string"}},
            "required": ["file_path"]
        }),
    );
    let request = GenerationRequest::new(
        "",
        vec![
            Message::system("Use the tools to answer."),
            Message::user("Show me the contents of zlib.spec."),
        ],
    )
    .with_tools(vec![tool]);

    let response = client
        .generate(request)
        .await
        .expect("Generation should succeed");
    let choice = response.first_choice().expect("Should have a choice");

    assert!(choice.has_pending_tool_calls(), "Expected a tool call");
    let call = &choice.tool_calls()[0];
    assert_eq!(call.function.name, "get_file_content");
    assert_eq!(call.parsed_arguments()["file_path"], "zlib.spec");
}

#[tokio::test]
async fn test_unreachable_endpoint_fails() {
    let client = OpenAiCompatProvider::new(
        "invalid-key".to_string(),
        "http://127.0.0.1:9".to_string(),
        "test-model".to_string(),
        Duration::from_secs(2),
    )
    .expect("client should build");

    let request = GenerationRequest::new("", vec![Message::user("test")]).with_max_tokens(5);

    let response = client.generate(request).await;
    assert!(response.is_err(), "Should fail against a closed port");
}
