//! Integration tests against a live generation backend.
//!
//! These tests make real API calls to OpenRouter.
//! Run with: OPENROUTER_API_KEY=your_key cargo test --test llm_integration -- --ignored

use flowforge::generator::{GenerationInput, StructuredGenerator};
use flowforge::llm::{GenerationRequest, LiteLlmClient, LlmProvider, Message};
use flowforge::normalize::normalize;
use flowforge::pipeline::GeneratorConfig;

fn get_test_api_key() -> String {
    std::env::var("OPENROUTER_API_KEY")
        .expect("OPENROUTER_API_KEY environment variable must be set for integration tests")
}

fn test_config() -> GeneratorConfig {
    GeneratorConfig {
        credential: Some(get_test_api_key()),
        temperature: 0.0,
        ..GeneratorConfig::default()
    }
}

#[tokio::test]
#[ignore] // Run with: cargo test --test llm_integration -- --ignored
async fn test_simple_generation() {
    let config = test_config();
    let client = LiteLlmClient::new(config.backend_endpoint, config.credential, config.model)
        .expect("client should build");

    let request = GenerationRequest::new(
        "",
        vec![
            Message::system("You are a helpful assistant. Reply concisely."),
            Message::user("What is 2 + 2? Reply with just the number."),
        ],
    )
    .with_max_tokens(10)
    .with_temperature(0.0);

    let response = client.generate(request).await;
    assert!(response.is_ok(), "Generation failed: {:?}", response.err());

    let response = response.expect("Should have response");
    let content = response.first_content().expect("Should have content");
    assert!(content.contains('4'), "Response should contain '4', got: {}", content);
}

#[tokio::test]
#[ignore]
async fn test_goal_without_periodicity_has_no_schedule() {
    let generator = StructuredGenerator::from_config(test_config()).expect("generator");

    let artifact = generator
        .generate(&GenerationInput::goal("show me the ETH price once"))
        .await
        .expect("generation should succeed");

    assert!(artifact.schedule.is_none());
    let normalized = normalize(artifact).expect("generated source should validate");
    assert!(normalized.contents.contains("@flow"));
}

#[tokio::test]
#[ignore]
async fn test_goal_with_periodicity_has_schedule() {
    let generator = StructuredGenerator::from_config(test_config()).expect("generator");

    let artifact = generator
        .generate(&GenerationInput::goal(
            "I want to see the price of ETH in USD every 5 minutes.",
        ))
        .await
        .expect("generation should succeed");

    let schedule = artifact.schedule.expect("schedule should be set");
    assert_eq!(schedule.cron, "*/5 * * * *");
}

#[tokio::test]
#[ignore]
async fn test_script_conversion_keeps_computation() {
    let generator = StructuredGenerator::from_config(test_config()).expect("generator");

    let input = GenerationInput::script(
        "scripts/answer.py",
        "x = 6 * 7\nprint(f\"The answer is {x}\")\n",
    );
    let artifact = generator.generate(&input).await.expect("generation should succeed");

    assert!(artifact.source_text.contains("6 * 7"));
    assert!(artifact.schedule.is_none());
    normalize(artifact).expect("generated source should validate");
}
