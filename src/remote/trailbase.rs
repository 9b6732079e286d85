// remote/trailbase.rs - HTTP remote adapter (spec.md §4.7)
//
// Grounded on the teacher's `trailbase/client.rs` (bearer-token REST
// client, `get`/`post`/`put`/`delete` helpers) and `trailbase/sync.rs`
// (entity sync over plain REST). TrailBase's REST surface has no server
// push, so `stream_aggregate`/`stream_changes` poll on an interval and
// adapt that into a `Stream`, the way `bredmond1019-workflow-engine-rs`
// wraps its own polling loops with `async-stream`.

use async_stream::stream;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::model::{CurrentStreakData, CurrentXPData, ProgressItem, StreakEvent, StreakFreeze, XPEvent};
use crate::remote::{ProgressRemote, StreakRemote, XPRemote};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Clone)]
pub struct TrailBaseRemote {
    base_url: String,
    bearer_token: Option<String>,
    http_client: reqwest::Client,
    poll_interval: Duration,
}

impl TrailBaseRemote {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Network(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bearer_token: None,
            http_client,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn build_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(token) = &self.bearer_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| Error::Network(format!("invalid bearer token: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }
        Ok(headers)
    }

    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_else(|_| "<no body>".to_string());
            return Err(Error::Network(format!("request failed with status {status}: {body}")));
        }
        response.json::<T>().await.map_err(Error::from)
    }

    async fn get<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, endpoint);
        let response = self.http_client.get(&url).headers(self.build_headers()?).send().await?;
        self.handle_response(response).await
    }

    async fn get_optional<T: DeserializeOwned>(&self, endpoint: &str) -> Result<Option<T>> {
        let url = format!("{}{}", self.base_url, endpoint);
        let response = self.http_client.get(&url).headers(self.build_headers()?).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        self.handle_response(response).await.map(Some)
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(&self, endpoint: &str, body: &B) -> Result<T> {
        let url = format!("{}{}", self.base_url, endpoint);
        let response = self
            .http_client
            .post(&url)
            .headers(self.build_headers()?)
            .json(body)
            .send()
            .await?;
        self.handle_response(response).await
    }

    async fn put<B: Serialize + ?Sized, T: DeserializeOwned>(&self, endpoint: &str, body: &B) -> Result<T> {
        let url = format!("{}{}", self.base_url, endpoint);
        let response = self
            .http_client
            .put(&url)
            .headers(self.build_headers()?)
            .json(body)
            .send()
            .await?;
        self.handle_response(response).await
    }

    async fn delete(&self, endpoint: &str) -> Result<()> {
        let url = format!("{}{}", self.base_url, endpoint);
        let response = self.http_client.delete(&url).headers(self.build_headers()?).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_else(|_| "<no body>".to_string());
            return Err(Error::Network(format!("DELETE failed with status {status}: {body}")));
        }
        Ok(())
    }
}

#[async_trait]
impl StreakRemote for TrailBaseRemote {
    async fn append_event(&self, streak_key: &str, event: &StreakEvent) -> Result<()> {
        self.post::<_, serde_json::Value>(&format!("/api/streaks/{streak_key}/events"), event)
            .await?;
        Ok(())
    }

    async fn list_events(&self, streak_key: &str) -> Result<Vec<StreakEvent>> {
        self.get(&format!("/api/streaks/{streak_key}/events")).await
    }

    async fn delete_all_events(&self, streak_key: &str) -> Result<()> {
        self.delete(&format!("/api/streaks/{streak_key}/events")).await
    }

    async fn list_freezes(&self, streak_key: &str) -> Result<Vec<StreakFreeze>> {
        self.get(&format!("/api/streaks/{streak_key}/freezes")).await
    }

    async fn add_freeze(&self, streak_key: &str, freeze: &StreakFreeze) -> Result<()> {
        self.post::<_, serde_json::Value>(&format!("/api/streaks/{streak_key}/freezes"), freeze)
            .await?;
        Ok(())
    }

    async fn mark_freeze_used(&self, streak_key: &str, freeze_id: &str) -> Result<()> {
        self.put::<_, serde_json::Value>(
            &format!("/api/streaks/{streak_key}/freezes/{freeze_id}/use"),
            &serde_json::json!({}),
        )
        .await?;
        Ok(())
    }

    async fn write_aggregate(&self, data: &CurrentStreakData) -> Result<()> {
        self.put::<_, serde_json::Value>(&format!("/api/streaks/{}/aggregate", data.streak_key), data)
            .await?;
        Ok(())
    }

    async fn request_server_calculation(&self, streak_key: &str) -> Result<CurrentStreakData> {
        self.post(&format!("/api/streaks/{streak_key}/calculate"), &serde_json::json!({}))
            .await
    }

    fn stream_aggregate(&self, streak_key: &str) -> BoxStream<'static, Result<CurrentStreakData>> {
        let client = self.clone();
        let streak_key = streak_key.to_string();
        let interval = self.poll_interval;
        Box::pin(stream! {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                yield client.request_server_calculation(&streak_key).await;
            }
        })
    }
}

#[async_trait]
impl XPRemote for TrailBaseRemote {
    async fn append_event(&self, experience_key: &str, event: &XPEvent) -> Result<()> {
        self.post::<_, serde_json::Value>(&format!("/api/xp/{experience_key}/events"), event)
            .await?;
        Ok(())
    }

    async fn list_events(&self, experience_key: &str) -> Result<Vec<XPEvent>> {
        self.get(&format!("/api/xp/{experience_key}/events")).await
    }

    async fn delete_all_events(&self, experience_key: &str) -> Result<()> {
        self.delete(&format!("/api/xp/{experience_key}/events")).await
    }

    async fn write_aggregate(&self, data: &CurrentXPData) -> Result<()> {
        self.put::<_, serde_json::Value>(&format!("/api/xp/{}/aggregate", data.experience_key), data)
            .await?;
        Ok(())
    }

    async fn request_server_calculation(&self, experience_key: &str) -> Result<CurrentXPData> {
        self.post(&format!("/api/xp/{experience_key}/calculate"), &serde_json::json!({}))
            .await
    }

    fn stream_aggregate(&self, experience_key: &str) -> BoxStream<'static, Result<CurrentXPData>> {
        let client = self.clone();
        let experience_key = experience_key.to_string();
        let interval = self.poll_interval;
        Box::pin(stream! {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                yield client.request_server_calculation(&experience_key).await;
            }
        })
    }
}

#[async_trait]
impl ProgressRemote for TrailBaseRemote {
    async fn list_items(&self, progress_key: &str) -> Result<Vec<ProgressItem>> {
        self.get(&format!("/api/progress/{progress_key}/items")).await
    }

    async fn get_item(&self, progress_key: &str, id: &str) -> Result<Option<ProgressItem>> {
        self.get_optional(&format!("/api/progress/{progress_key}/items/{id}")).await
    }

    async fn upsert_item(&self, item: &ProgressItem) -> Result<()> {
        self.put::<_, serde_json::Value>(
            &format!("/api/progress/{}/items/{}", item.progress_key, item.id),
            item,
        )
        .await?;
        Ok(())
    }

    async fn delete_item(&self, progress_key: &str, id: &str) -> Result<()> {
        self.delete(&format!("/api/progress/{progress_key}/items/{id}")).await
    }

    async fn delete_all_items(&self, progress_key: &str) -> Result<()> {
        self.delete(&format!("/api/progress/{progress_key}/items")).await
    }

    fn stream_changes(&self, progress_key: &str) -> BoxStream<'static, Result<ProgressItem>> {
        let client = self.clone();
        let progress_key = progress_key.to_string();
        let interval = self.poll_interval;
        Box::pin(stream! {
            let mut ticker = tokio::time::interval(interval);
            let mut seen: std::collections::HashMap<String, chrono::DateTime<chrono::Utc>> = std::collections::HashMap::new();
            loop {
                ticker.tick().await;
                match client.list_items(&progress_key).await {
                    Ok(items) => {
                        for item in items {
                            let changed = seen
                                .get(&item.id)
                                .map(|last| item.date_modified > *last)
                                .unwrap_or(true);
                            if changed {
                                seen.insert(item.id.clone(), item.date_modified);
                                yield Ok(item);
                            }
                        }
                    }
                    Err(e) => yield Err(e),
                }
            }
        })
    }
}
