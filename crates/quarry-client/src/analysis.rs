use std::time::Duration;

use quarry_core::error::AppError;
use quarry_core::models::ExtractionRequest;
use quarry_core::traits::{Analysis, AnalysisOutcome, TextAnalyzer};
use reqwest::Client;
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_ANALYSIS_TIMEOUT: Duration = Duration::from_secs(120);
/// Longer texts are cut before being sent, to bound token usage.
const MAX_ANALYZED_CHARS: usize = 12_000;
const DEFAULT_SYSTEM_PROMPT: &str = "You review articles for a media-monitoring team. Given an article and the subject it is expected to cover, rate how relevant it is from 0 to 10, classify its sentiment towards the subject as positive, neutral, negative or mixed, and summarise it in at most three sentences. Respond ONLY with JSON matching the requested schema.";

/// OpenAI-compatible client scoring accepted text for relevance and sentiment.
///
/// Works with any OpenAI-compatible API, including:
/// - OpenAI directly (`https://api.openai.com/v1`)
/// - Gemini via compatibility layer (`https://generativelanguage.googleapis.com/v1beta/openai`)
#[derive(Clone)]
pub struct OpenAiAnalyzer {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout_secs: u64,
    system_prompt: String,
}

impl OpenAiAnalyzer {
    pub fn new(api_key: &str) -> Result<Self, AppError> {
        Self::with_base_url(api_key, DEFAULT_MODEL, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: &str, model: &str, base_url: &str) -> Result<Self, AppError> {
        Self::build(api_key, model, base_url, DEFAULT_ANALYSIS_TIMEOUT)
    }

    pub fn with_timeout(self, timeout: Duration) -> Result<Self, AppError> {
        Self::build(&self.api_key, &self.model, &self.base_url, timeout)
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    fn build(
        api_key: &str,
        model: &str,
        base_url: &str,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            timeout_secs: timeout.as_secs(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        })
    }

    fn user_prompt(text: &str, request: &ExtractionRequest) -> String {
        let text: String = text.chars().take(MAX_ANALYZED_CHARS).collect();
        let mut prompt = format!("Expected subject: {}\n", request.subject_phrase());
        if let Some(author) = request.author() {
            prompt.push_str(&format!("Expected author: {author}\n"));
        }
        prompt.push_str(&format!("Source: {}\n\nArticle:\n\n{text}", request.url()));
        prompt
    }
}

fn analysis_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "relevance": {"type": "integer", "minimum": 0, "maximum": 10},
            "sentiment": {"type": "string", "enum": ["positive", "neutral", "negative", "mixed"]},
            "summary": {"type": "string"}
        },
        "required": ["relevance", "sentiment", "summary"],
        "additionalProperties": false
    })
}

// ---- OpenAI API types ----

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
    json_schema: JsonSchemaWrapper,
}

#[derive(Serialize)]
struct JsonSchemaWrapper {
    name: String,
    strict: bool,
    schema: serde_json::Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

impl TextAnalyzer for OpenAiAnalyzer {
    async fn analyze(
        &self,
        text: &str,
        request: &ExtractionRequest,
    ) -> Result<AnalysisOutcome, AppError> {
        if text.trim().is_empty() {
            return Ok(AnalysisOutcome::Unavailable {
                reason: "no text to analyze".into(),
            });
        }

        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: self.system_prompt.clone(),
                },
                Message {
                    role: "user".to_string(),
                    content: Self::user_prompt(text, request),
                },
            ],
            response_format: ResponseFormat {
                format_type: "json_schema".to_string(),
                json_schema: JsonSchemaWrapper {
                    name: "analysis".to_string(),
                    strict: true,
                    schema: analysis_schema(),
                },
            },
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout(self.timeout_secs)
                } else if e.is_connect() {
                    AppError::NetworkError(format!("Connection failed: {e}"))
                } else {
                    AppError::HttpError(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let status_code = status.as_u16();
            let body = response.text().await.unwrap_or_default();

            if status_code == 429 {
                return Err(AppError::RateLimitExceeded);
            }

            let message = serde_json::from_str::<ApiError>(&body)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| format!("HTTP {status_code}: {body}"));

            return Err(AppError::ProviderError {
                provider: "analysis".into(),
                message,
                status_code,
                retryable: status_code >= 500,
            });
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| AppError::ParseError(format!("Failed to parse analysis response: {e}")))?;

        let Some(content) = chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
        else {
            return Ok(AnalysisOutcome::Unavailable {
                reason: "empty response from model".into(),
            });
        };

        match serde_json::from_str::<Analysis>(&content) {
            Ok(mut analysis) => {
                analysis.relevance = analysis.relevance.min(10);
                Ok(AnalysisOutcome::Available(analysis))
            }
            Err(e) => {
                tracing::warn!(error = %e, "Model returned malformed analysis");
                Ok(AnalysisOutcome::Unavailable {
                    reason: format!("malformed analysis: {e}"),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn request() -> ExtractionRequest {
        ExtractionRequest::builder("https://example.com/cx-5")
            .subjects(["Mazda", "CX-5"])
            .build()
            .unwrap()
    }

    fn chat_reply(content: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"content": content}}]
        }))
    }

    #[tokio::test]
    async fn parses_structured_analysis() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(chat_reply(
                r#"{"relevance": 9, "sentiment": "positive", "summary": "Praises the CX-5."}"#,
            ))
            .mount(&server)
            .await;

        let analyzer = OpenAiAnalyzer::with_base_url("sk-test", "m", &server.uri()).unwrap();
        let outcome = analyzer.analyze("Some article text", &request()).await.unwrap();
        assert_eq!(
            outcome,
            AnalysisOutcome::Available(Analysis {
                relevance: 9,
                sentiment: "positive".into(),
                summary: "Praises the CX-5.".into(),
            })
        );
    }

    #[tokio::test]
    async fn malformed_reply_is_unavailable_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(chat_reply("I cannot help with that."))
            .mount(&server)
            .await;

        let analyzer = OpenAiAnalyzer::with_base_url("k", "m", &server.uri()).unwrap();
        let outcome = analyzer.analyze("text", &request()).await.unwrap();
        assert!(matches!(outcome, AnalysisOutcome::Unavailable { .. }));
    }

    #[tokio::test]
    async fn rate_limit_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let analyzer = OpenAiAnalyzer::with_base_url("k", "m", &server.uri()).unwrap();
        let err = analyzer.analyze("text", &request()).await.unwrap_err();
        assert!(matches!(err, AppError::RateLimitExceeded));
    }

    #[tokio::test]
    async fn empty_text_skips_the_call() {
        let analyzer = OpenAiAnalyzer::with_base_url("k", "m", "http://127.0.0.1:9").unwrap();
        let outcome = analyzer.analyze("   ", &request()).await.unwrap();
        assert!(matches!(outcome, AnalysisOutcome::Unavailable { .. }));
    }
}
