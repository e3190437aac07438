//! BigQuery REST implementation of the query engine.
//!
//! Authenticates with a service-account key: a signed RS256 JWT is
//! exchanged for a bearer token, which is cached until shortly before
//! expiry. Queries go through the synchronous `queries` endpoint.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::debug;

use super::{QueryEngine, QueryError, QueryResult, Row};

const BIGQUERY_SCOPE: &str = "https://www.googleapis.com/auth/bigquery";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

#[derive(Serialize)]
struct TokenClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

pub struct BigQueryEngine {
    client: Client,
    project_id: String,
    key: ServiceAccountKey,
    token: Arc<RwLock<Option<CachedToken>>>,
}

impl BigQueryEngine {
    pub fn new(project_id: &str, key_json: &str) -> Result<Self> {
        let key: ServiceAccountKey =
            serde_json::from_str(key_json).context("failed to parse service account key")?;
        let client = Client::builder()
            .user_agent("funnelboard/0.1.0")
            .build()
            .context("failed to build HTTP client for BigQuery")?;

        Ok(Self {
            client,
            project_id: project_id.to_string(),
            key,
            token: Arc::new(RwLock::new(None)),
        })
    }

    async fn access_token(&self) -> Result<String> {
        {
            let guard = self.token.read().await;
            if let Some(token) = guard.as_ref() {
                if token.expires_at > Instant::now() + TOKEN_EXPIRY_MARGIN {
                    return Ok(token.access_token.clone());
                }
            }
        }

        let token = self.mint_token().await?;
        let access_token = token.access_token.clone();
        let mut guard = self.token.write().await;
        *guard = Some(token);
        Ok(access_token)
    }

    async fn mint_token(&self) -> Result<CachedToken> {
        debug!("Minting new BigQuery access token");

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .context("system clock before unix epoch")?
            .as_secs();
        let claims = TokenClaims {
            iss: &self.key.client_email,
            scope: BIGQUERY_SCOPE,
            aud: &self.key.token_uri,
            iat: now,
            exp: now + 3600,
        };

        let encoding_key = EncodingKey::from_rsa_pem(self.key.private_key.as_bytes())
            .context("service account private key is not valid RSA PEM")?;
        let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &encoding_key)
            .context("failed to sign token assertion")?;

        let response = self
            .client
            .post(&self.key.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await
            .context("token exchange request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("token exchange returned {status}: {body}"));
        }

        let token: TokenResponse = response
            .json()
            .await
            .context("failed to decode token response")?;

        Ok(CachedToken {
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
            access_token: token.access_token,
        })
    }
}

#[async_trait]
impl QueryEngine for BigQueryEngine {
    async fn execute(&self, sql: &str) -> QueryResult<Vec<Row>> {
        let token = self.access_token().await.map_err(QueryError::Other)?;

        let url = format!(
            "https://bigquery.googleapis.com/bigquery/v2/projects/{}/queries",
            self.project_id
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&json!({ "query": sql, "useLegacySql": false }))
            .send()
            .await
            .map_err(|e| QueryError::Execution(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(QueryError::Execution(format!("{status}: {body}")));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| QueryError::Execution(format!("malformed response: {e}")))?;

        if let Some(errors) = body.get("errors").and_then(Value::as_array) {
            if !errors.is_empty() {
                return Err(QueryError::Execution(errors[0].to_string()));
            }
        }

        Ok(decode_rows(&body))
    }
}

/// Decode BigQuery's `schema.fields` + `rows[].f[].v` wire format into
/// name→value maps, parsing numeric types out of their string encoding.
fn decode_rows(body: &Value) -> Vec<Row> {
    let fields: Vec<(String, String)> = body
        .pointer("/schema/fields")
        .and_then(Value::as_array)
        .map(|fields| {
            fields
                .iter()
                .map(|f| {
                    (
                        f.get("name").and_then(Value::as_str).unwrap_or("").to_string(),
                        f.get("type").and_then(Value::as_str).unwrap_or("STRING").to_string(),
                    )
                })
                .collect()
        })
        .unwrap_or_default();

    let Some(rows) = body.get("rows").and_then(Value::as_array) else {
        return Vec::new();
    };

    rows.iter()
        .map(|row| {
            let mut decoded = Row::new();
            let cells = row.get("f").and_then(Value::as_array);
            for (i, (name, field_type)) in fields.iter().enumerate() {
                let cell = cells
                    .and_then(|c| c.get(i))
                    .and_then(|c| c.get("v"))
                    .cloned()
                    .unwrap_or(Value::Null);
                decoded.insert(name.clone(), decode_cell(cell, field_type));
            }
            decoded
        })
        .collect()
}

fn decode_cell(value: Value, field_type: &str) -> Value {
    let Value::String(text) = value else {
        return value;
    };
    match field_type {
        "INTEGER" | "INT64" => text.parse::<i64>().map(Value::from).unwrap_or(Value::String(text)),
        "FLOAT" | "FLOAT64" | "NUMERIC" | "BIGNUMERIC" => {
            text.parse::<f64>().map(Value::from).unwrap_or(Value::String(text))
        }
        "BOOLEAN" | "BOOL" => match text.as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::String(text),
        },
        _ => Value::String(text),
    }
}
