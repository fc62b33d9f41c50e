//! `search_google`: web search through the Serper.dev Google API.
//!
//! Requires an API key (`SERPER_API_KEY` or `[search] api_key`). Without
//! one the function is still advertised but every call fails with a clear
//! message the model can relay.

use async_trait::async_trait;
use concierge_config::SearchConfig;
use concierge_core::error::ExecutionError;
use concierge_core::function::{Arguments, FunctionHandler};
use concierge_core::schema::{FunctionDefinition, ParameterSpec};
use concierge_core::value::Value;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const NAME: &str = "search_google";

const LANGUAGES: [&str; 5] = ["es-419", "en", "fr", "de", "it"];
const COUNTRIES: [&str; 7] = ["mx", "us", "es", "ar", "co", "pe", "cl"];
const MAX_RESULTS: usize = 10;

pub struct WebSearchFunction {
    client: reqwest::Client,
    api_key: Option<String>,
    api_url: String,
    default_language: String,
    default_country: String,
    default_num_results: i64,
}

impl WebSearchFunction {
    pub fn new(config: &SearchConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        if config.api_key.is_none() {
            warn!("Serper.dev API key not configured, search_google will fail");
        }

        Self {
            client,
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            api_url: config.api_url.trim_end_matches('/').to_string(),
            default_language: config.default_language.clone(),
            default_country: config.default_country.clone(),
            default_num_results: i64::from(config.default_num_results),
        }
    }

    pub fn definition() -> FunctionDefinition {
        FunctionDefinition::new(
            NAME,
            "Search Google for up-to-date information on any topic or question.",
        )
        .param(ParameterSpec::string("query", "Search terms or question").required())
        .param(
            ParameterSpec::string("language", "Result language code").one_of(LANGUAGES),
        )
        .param(ParameterSpec::string("country", "Country code for localized results").one_of(COUNTRIES))
        .param(
            ParameterSpec::integer("num_results", "Number of results to return (1-10)")
                .range(1.0, MAX_RESULTS as f64),
        )
    }
}

#[async_trait]
impl FunctionHandler for WebSearchFunction {
    async fn call(&self, args: Arguments) -> Result<Value, ExecutionError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ExecutionError::new("search is not configured (missing Serper.dev API key)"))?;

        let query = args.require_str("query")?;
        let language = args.str("language").unwrap_or(&self.default_language);
        let country = args.str("country").unwrap_or(&self.default_country);
        let num = args
            .i64("num_results")
            .unwrap_or(self.default_num_results)
            .clamp(1, MAX_RESULTS as i64);

        info!(%query, %language, %country, num, "Searching Google");

        let response = self
            .client
            .post(format!("{}/search", self.api_url))
            .header("X-API-KEY", api_key)
            .json(&serde_json::json!({
                "q": query,
                "gl": country,
                "hl": language,
                "num": num,
            }))
            .send()
            .await
            .map_err(|e| ExecutionError::new(format!("search service unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "Serper.dev returned error");
            return Err(ExecutionError::new(format!(
                "search service error: {status}"
            )));
        }

        let raw: ApiSearch = response
            .json()
            .await
            .map_err(|e| ExecutionError::new(format!("unexpected search response: {e}")))?;

        debug!(organic = raw.organic.len(), "Search completed");
        Ok(format_results(raw, query))
    }
}

fn format_results(raw: ApiSearch, query: &str) -> Value {
    let organic: Vec<Value> = raw
        .organic
        .into_iter()
        .take(MAX_RESULTS)
        .map(|r| {
            Value::map([
                ("title", Value::from(r.title)),
                ("link", Value::from(r.link)),
                ("snippet", Value::from(r.snippet)),
                ("position", Value::from(r.position)),
            ])
        })
        .collect();

    let knowledge_graph = raw.knowledge_graph.map(|kg| {
        let attributes: BTreeMap<String, Value> = kg
            .attributes
            .into_iter()
            .map(|(k, v)| (k, Value::from(v)))
            .collect();
        Value::map([
            ("title", Value::from(kg.title)),
            ("type", Value::from(kg.kind)),
            ("description", Value::from(kg.description)),
            ("attributes", Value::from(attributes)),
        ])
    });

    let answer_box = raw.answer_box.map(|ab| {
        Value::map([
            ("title", Value::from(ab.title)),
            ("answer", Value::from(ab.answer)),
            ("snippet", Value::from(ab.snippet)),
        ])
    });

    Value::map([
        ("query", Value::from(query)),
        ("organic", Value::from(organic)),
        ("knowledge_graph", Value::from(knowledge_graph)),
        ("answer_box", Value::from(answer_box)),
    ])
}

// --- Serper.dev API types (internal) ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiSearch {
    #[serde(default)]
    organic: Vec<ApiOrganic>,
    #[serde(default)]
    knowledge_graph: Option<ApiKnowledgeGraph>,
    #[serde(default)]
    answer_box: Option<ApiAnswerBox>,
}

#[derive(Debug, Deserialize)]
struct ApiOrganic {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    position: i64,
}

#[derive(Debug, Deserialize)]
struct ApiKnowledgeGraph {
    #[serde(default)]
    title: String,
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    attributes: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ApiAnswerBox {
    #[serde(default)]
    title: String,
    #[serde(default)]
    answer: String,
    #[serde(default)]
    snippet: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn args(json: serde_json::Value) -> Arguments {
        WebSearchFunction::definition().validate(&json).unwrap()
    }

    fn search(server: &MockServer) -> WebSearchFunction {
        WebSearchFunction::new(&SearchConfig {
            api_key: Some("serper-key".into()),
            api_url: server.uri(),
            ..SearchConfig::default()
        })
    }

    #[tokio::test]
    async fn missing_api_key_fails() {
        let search = WebSearchFunction::new(&SearchConfig::default());
        let err = search
            .call(args(serde_json::json!({"query": "rust"})))
            .await
            .unwrap_err();
        assert!(err.message.contains("not configured"));
    }

    #[tokio::test]
    async fn sends_serper_payload_and_formats_results() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .and(header("x-api-key", "serper-key"))
            .and(body_json(serde_json::json!({
                "q": "clima madrid",
                "gl": "es",
                "hl": "es-419",
                "num": 3
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "organic": [
                    {"title": "AEMET", "link": "https://aemet.es", "snippet": "Prediccion", "position": 1},
                    {"title": "Meteored", "link": "https://meteored.com", "snippet": "Tiempo", "position": 2}
                ],
                "answerBox": {"title": "Madrid", "answer": "18°C"},
                "knowledgeGraph": {"title": "Madrid", "type": "City", "attributes": {"Population": "3.3M"}}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let out = search(&server)
            .call(args(serde_json::json!({
                "query": "clima madrid",
                "country": "es",
                "num_results": 3
            })))
            .await
            .unwrap();

        let organic = out.get("organic").and_then(Value::as_list).unwrap();
        assert_eq!(organic.len(), 2);
        assert_eq!(organic[0].get("title").and_then(Value::as_str), Some("AEMET"));
        assert_eq!(
            out.get("answer_box").and_then(|a| a.get("answer")).and_then(Value::as_str),
            Some("18°C")
        );
        assert_eq!(
            out.get("knowledge_graph").and_then(|k| k.get("type")).and_then(Value::as_str),
            Some("City")
        );
    }

    #[tokio::test]
    async fn absent_sections_are_null() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let out = search(&server)
            .call(args(serde_json::json!({"query": "nada"})))
            .await
            .unwrap();
        assert_eq!(out.get("knowledge_graph"), Some(&Value::Null));
        assert_eq!(out.get("organic"), Some(&Value::List(vec![])));
    }

    #[tokio::test]
    async fn http_error_is_execution_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let err = search(&server)
            .call(args(serde_json::json!({"query": "rust"})))
            .await
            .unwrap_err();
        assert!(err.message.contains("403"));
    }

    #[test]
    fn schema_bounds_num_results() {
        let err = WebSearchFunction::definition()
            .validate(&serde_json::json!({"query": "rust", "num_results": 50}))
            .unwrap_err();
        assert!(err.to_string().contains("num_results"));
    }
}
