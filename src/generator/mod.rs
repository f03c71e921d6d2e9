//! Structured generation of artifacts from a goal or an existing script.
//!
//! One request goes to the generation backend, constrained by the artifact
//! JSON Schema. The answer is checked field by field and then put through
//! schedule discipline: a recurrence survives only when the input asked for
//! one.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use flowforge::generator::{GenerationInput, StructuredGenerator};
//! use flowforge::pipeline::GeneratorConfig;
//!
//! let generator = StructuredGenerator::from_config(GeneratorConfig::default())?;
//! let artifact = generator
//!     .generate(&GenerationInput::goal("print the ETH price every 5 minutes"))
//!     .await?;
//! assert_eq!(artifact.schedule.map(|s| s.cron), Some("*/5 * * * *".into()));
//! ```

pub mod prompts;
pub mod schema;

pub use prompts::{goal_prompt, script_prompt, SYSTEM_PROMPT};
pub use schema::{artifact_from_json, RawArtifact, SchemaVersion};

use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::artifact::Artifact;
use crate::error::{DeployError, DeployResult};
use crate::llm::{GenerationRequest, LiteLlmClient, LlmProvider, Message, ResponseFormat};
use crate::pipeline::GeneratorConfig;
use crate::schedule::{detect_interval, mentions_recurrence};
use crate::utils::json_extraction::try_extract_json_object;

/// What the generator is asked to turn into an artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationInput {
    /// A natural-language description of the desired outcome.
    Goal(String),
    /// An existing script whose behaviour must be preserved.
    Script { path: PathBuf, source: String },
}

impl GenerationInput {
    pub fn goal(goal: impl Into<String>) -> Self {
        GenerationInput::Goal(goal.into())
    }

    pub fn script(path: impl Into<PathBuf>, source: impl Into<String>) -> Self {
        GenerationInput::Script {
            path: path.into(),
            source: source.into(),
        }
    }

    /// Reads a script from disk.
    pub async fn from_script_file(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let source = tokio::fs::read_to_string(path).await?;
        Ok(Self::script(path, source))
    }

    /// Text scanned for periodicity language.
    ///
    /// A goal is scanned whole. For a script only its full-line comments are
    /// scanned, never code, strings or URLs.
    pub fn periodicity_text(&self) -> Cow<'_, str> {
        match self {
            GenerationInput::Goal(goal) => Cow::Borrowed(goal.as_str()),
            GenerationInput::Script { source, .. } => Cow::Owned(
                source
                    .lines()
                    .filter_map(|line| line.trim_start().strip_prefix('#'))
                    .map(str::trim)
                    .collect::<Vec<_>>()
                    .join("\n"),
            ),
        }
    }

    /// Short label for logs.
    pub fn mode(&self) -> &'static str {
        match self {
            GenerationInput::Goal(_) => "goal",
            GenerationInput::Script { .. } => "script",
        }
    }

    fn user_prompt(&self) -> String {
        match self {
            GenerationInput::Goal(goal) => goal_prompt(goal),
            GenerationInput::Script { path, source } => {
                let file_name = path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "script.py".to_string());
                script_prompt(&file_name, source)
            }
        }
    }
}

/// Turns a [`GenerationInput`] into a checked [`Artifact`].
pub struct StructuredGenerator {
    provider: Arc<dyn LlmProvider>,
    config: GeneratorConfig,
}

impl std::fmt::Debug for StructuredGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StructuredGenerator")
            .field("model", &self.config.model)
            .field("schema_version", &self.config.schema_version)
            .finish_non_exhaustive()
    }
}

impl StructuredGenerator {
    pub fn new(provider: Arc<dyn LlmProvider>, config: GeneratorConfig) -> Self {
        Self { provider, config }
    }

    /// Builds a generator talking to the configured OpenAI-compatible backend.
    pub fn from_config(config: GeneratorConfig) -> DeployResult<Self> {
        let client = LiteLlmClient::new(
            config.backend_endpoint.clone(),
            config.credential.clone(),
            config.model.clone(),
        )?;
        Ok(Self::new(Arc::new(client), config))
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Builds the schema-constrained request for `input`.
    pub fn build_request(&self, input: &GenerationInput) -> GenerationRequest {
        let version = self.config.schema_version;
        GenerationRequest::new(
            self.config.model.clone(),
            vec![
                Message::system(SYSTEM_PROMPT),
                Message::user(input.user_prompt()),
            ],
        )
        .with_temperature(self.config.temperature)
        .with_max_tokens(self.config.max_tokens)
        .with_response_format(ResponseFormat::json_schema(
            version.schema_name(),
            version.json_schema(),
        ))
    }

    /// Makes exactly one backend call and returns the checked artifact.
    pub async fn generate(&self, input: &GenerationInput) -> DeployResult<Artifact> {
        tracing::debug!(
            mode = input.mode(),
            model = %self.config.model,
            schema = %self.config.schema_version,
            "Requesting structured generation"
        );

        let response = self.provider.generate(self.build_request(input)).await?;

        let content = response
            .first_content()
            .ok_or_else(|| DeployError::InvalidGeneration("empty response".to_string()))?;

        let json = try_extract_json_object(content)
            .into_result()
            .map_err(|e| DeployError::InvalidGeneration(e.to_string()))?;

        let artifact = artifact_from_json(&json).map_err(DeployError::InvalidGeneration)?;

        Ok(apply_schedule_discipline(artifact, &input.periodicity_text()))
    }
}

/// Keeps a schedule only when `input_text` describes a recurring need.
///
/// A model schedule without periodicity language is cleared. Periodicity
/// language without a model schedule is filled from [`detect_interval`].
pub fn apply_schedule_discipline(mut artifact: Artifact, input_text: &str) -> Artifact {
    let recurring = mentions_recurrence(input_text);

    match (&artifact.schedule, recurring) {
        (Some(schedule), false) => {
            tracing::warn!(
                name = %artifact.name,
                cron = %schedule.cron,
                "Clearing schedule the input did not ask for"
            );
            artifact.schedule = None;
        }
        (None, true) => {
            if let Some(detected) = detect_interval(input_text) {
                tracing::info!(
                    name = %artifact.name,
                    cron = %detected.cron,
                    "Using schedule detected in the input"
                );
                artifact.schedule = Some(detected);
            }
        }
        _ => {}
    }

    artifact
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::llm::{Choice, GenerationResponse, Usage};
    use crate::schedule::CronSchedule;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    struct MockLlmProvider {
        response: Mutex<String>,
        requests: Mutex<Vec<GenerationRequest>>,
    }

    impl MockLlmProvider {
        fn new(response: &str) -> Self {
            Self {
                response: Mutex::new(response.to_string()),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn request_count(&self) -> usize {
            self.requests.lock().expect("lock poisoned").len()
        }
    }

    #[async_trait]
    impl LlmProvider for MockLlmProvider {
        async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
            self.requests.lock().expect("lock poisoned").push(request);
            let content = self.response.lock().expect("lock poisoned").clone();
            Ok(GenerationResponse {
                id: "test-id".to_string(),
                model: "test-model".to_string(),
                choices: vec![Choice {
                    index: 0,
                    message: Message::assistant(content),
                    finish_reason: "stop".to_string(),
                }],
                usage: Usage::default(),
            })
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl LlmProvider for FailingProvider {
        async fn generate(&self, _request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
            Err(LlmError::RequestFailed("connection refused".to_string()))
        }
    }

    fn artifact_json(schedule: serde_json::Value) -> String {
        json!({
            "name": "eth-price",
            "function_identifier": "eth_price",
            "description": "Prints the ETH price in USD.",
            "source_text": "def eth_price():\n    import httpx\n    print(httpx.get('https://example.com').json())\n",
            "schedule": schedule,
            "parameters": []
        })
        .to_string()
    }

    fn generator(provider: Arc<MockLlmProvider>) -> StructuredGenerator {
        StructuredGenerator::new(provider, GeneratorConfig::default())
    }

    #[tokio::test]
    async fn test_one_shot_goal_has_no_schedule() {
        let provider = Arc::new(MockLlmProvider::new(&artifact_json(json!(null))));
        let artifact = generator(provider.clone())
            .generate(&GenerationInput::goal("show me the ETH price once"))
            .await
            .expect("generation should succeed");

        assert_eq!(artifact.name, "eth-price");
        assert!(artifact.schedule.is_none());
        assert_eq!(provider.request_count(), 1);
    }

    #[tokio::test]
    async fn test_invented_schedule_is_cleared() {
        let provider = Arc::new(MockLlmProvider::new(&artifact_json(
            json!({"cron": "0 * * * *", "timezone": null}),
        )));
        let artifact = generator(provider)
            .generate(&GenerationInput::goal("show me the ETH price once"))
            .await
            .expect("generation should succeed");
        assert!(artifact.schedule.is_none());
    }

    #[tokio::test]
    async fn test_requested_schedule_is_kept() {
        let provider = Arc::new(MockLlmProvider::new(&artifact_json(
            json!({"cron": "*/5 * * * *", "timezone": "UTC"}),
        )));
        let artifact = generator(provider)
            .generate(&GenerationInput::goal("print the ETH price every 5 minutes"))
            .await
            .expect("generation should succeed");
        let schedule = artifact.schedule.expect("schedule");
        assert_eq!(schedule.cron, "*/5 * * * *");
        assert_eq!(schedule.timezone.as_deref(), Some("UTC"));
    }

    #[tokio::test]
    async fn test_missing_schedule_is_detected_from_input() {
        let provider = Arc::new(MockLlmProvider::new(&artifact_json(json!(null))));
        let artifact = generator(provider)
            .generate(&GenerationInput::goal("print the ETH price every 5 minutes"))
            .await
            .expect("generation should succeed");
        assert_eq!(
            artifact.schedule,
            Some(CronSchedule::new("*/5 * * * *").expect("valid cron"))
        );
    }

    #[tokio::test]
    async fn test_fenced_response_is_accepted() {
        let fenced = format!("Here you go:\n```json\n{}\n```", artifact_json(json!(null)));
        let provider = Arc::new(MockLlmProvider::new(&fenced));
        let artifact = generator(provider)
            .generate(&GenerationInput::goal("show me the ETH price"))
            .await
            .expect("generation should succeed");
        assert_eq!(artifact.function_identifier, "eth_price");
    }

    #[tokio::test]
    async fn test_non_conforming_response_is_invalid_generation() {
        for response in [
            "I cannot help with that.",
            r#"{"name": "eth-price"}"#,
            r#"{"name": "ETH Price", "description": "x", "source_text": "def f():\n    pass\n"}"#,
        ] {
            let provider = Arc::new(MockLlmProvider::new(response));
            let err = generator(provider)
                .generate(&GenerationInput::goal("show me the ETH price"))
                .await
                .unwrap_err();
            assert_eq!(err.kind(), "InvalidGenerationError", "response: {}", response);
        }
    }

    #[tokio::test]
    async fn test_backend_failure_is_propagated() {
        let generator = StructuredGenerator::new(Arc::new(FailingProvider), GeneratorConfig::default());
        let err = generator
            .generate(&GenerationInput::goal("anything"))
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::GenerationBackend(_)));
    }

    #[test]
    fn test_request_is_schema_constrained() {
        let provider = Arc::new(MockLlmProvider::new(""));
        let request = generator(provider).build_request(&GenerationInput::script(
            "scripts/get_eth_price.py",
            "print(42)\n",
        ));

        let format = request.response_format.expect("response format");
        assert_eq!(format.format_type, "json_schema");
        let schema = format.json_schema.expect("json schema");
        assert!(schema.strict);
        assert_eq!(schema.name, "prefect_deployment_v1");
        assert_eq!(request.messages.len(), 2);
        assert!(request.messages[1].content.contains("get_eth_price.py"));
        assert!(request.messages[1].content.contains("print(42)"));
    }

    #[tokio::test]
    async fn test_from_script_file() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("get_eth_price.py");
        tokio::fs::write(&path, "print(1 + 1)\n").await.expect("write");

        let input = GenerationInput::from_script_file(&path).await.expect("read");
        assert_eq!(input.mode(), "script");
        assert!(matches!(input, GenerationInput::Script { ref source, .. } if source == "print(1 + 1)\n"));
    }

    const DAILY_QUERY_SCRIPT: &str = "import httpx\n\nresp = httpx.get('https://api.example.com/v1/prices?symbol=ETH&interval=daily')\nprint(resp.json())\n";

    #[tokio::test]
    async fn test_script_code_does_not_add_schedule() {
        let provider = Arc::new(MockLlmProvider::new(&artifact_json(json!(null))));
        let artifact = generator(provider)
            .generate(&GenerationInput::script("scripts/eth_daily.py", DAILY_QUERY_SCRIPT))
            .await
            .expect("generation should succeed");
        assert!(artifact.schedule.is_none());

        let input = GenerationInput::script("scripts/eth_daily.py", DAILY_QUERY_SCRIPT);
        assert_eq!(input.periodicity_text(), "");
    }

    #[tokio::test]
    async fn test_script_comment_can_request_schedule() {
        let source = format!("# Run every 10 minutes.\n{}", DAILY_QUERY_SCRIPT);
        let provider = Arc::new(MockLlmProvider::new(&artifact_json(json!(null))));
        let artifact = generator(provider)
            .generate(&GenerationInput::script("scripts/eth_daily.py", source))
            .await
            .expect("generation should succeed");
        assert_eq!(artifact.schedule.expect("schedule").cron, "*/10 * * * *");
    }

    #[test]
    fn test_schedule_discipline_edge_inputs() {
        let hourly = CronSchedule::new("0 * * * *").expect("valid cron");
        let base = Artifact::new("eth-price", "Prints the ETH price.", "def eth_price():\n    pass\n");

        let artifact = apply_schedule_discipline(
            base.clone().with_schedule(hourly.clone()),
            "list every pokemon heavier than 100kg",
        );
        assert!(artifact.schedule.is_none());

        let artifact = apply_schedule_discipline(
            base.clone(),
            "show me the ETH closing price for every day of last week, once",
        );
        assert!(artifact.schedule.is_none());

        let artifact = apply_schedule_discipline(
            base.with_schedule(hourly.clone()),
            "post the ETH price every hour",
        );
        assert_eq!(artifact.schedule, Some(hourly));
    }
}
