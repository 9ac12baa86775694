//! This module provides a client to a hosted REST backend (PostgREST dialect)

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use reqwest::{RequestBuilder, Response};
use serde::Serialize;
use url::Url;

use crate::config::{BackendConfig, PRODUCT_NAME};
use crate::error::BackendError;
use crate::task::{Task, TaskId};
use crate::traits::{TaskBackend, TokenSource};


/// The columns this crate writes. Timestamps are always left to the backend
#[derive(Serialize)]
struct TaskRowWrite<'a> {
    id: &'a str,
    task: &'a str,
    is_done: bool,
    owner_id: Option<&'a str>,
}

impl<'a> From<&'a Task> for TaskRowWrite<'a> {
    fn from(task: &'a Task) -> Self {
        Self {
            id: task.id().as_str(),
            task: task.text(),
            is_done: task.is_done(),
            owner_id: task.owner_id(),
        }
    }
}


/// A [`TaskBackend`] that talks to a hosted backend over HTTP
pub struct Client {
    url: Url,
    anon_key: String,
    collection: String,
    token_source: Option<Arc<dyn TokenSource>>,
    http: reqwest::Client,
}

impl Client {
    /// Create a client. This does not start a connection
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            url: config.url.clone(),
            anon_key: config.anon_key.clone(),
            collection: config.collection.clone(),
            token_source: None,
            http: reqwest::Client::new(),
        }
    }

    /// Authenticate requests with the tokens of `token_source`
    pub fn with_token_source(mut self, token_source: Arc<dyn TokenSource>) -> Self {
        self.token_source = Some(token_source);
        self
    }

    /// The URL of the collection endpoint, with the given query parameters
    fn collection_url(&self, query: &[(&str, String)]) -> Url {
        let mut url = self.url.clone();
        let path = format!("{}/rest/v1/{}", self.url.path().trim_end_matches('/'), self.collection);
        url.set_path(&path);
        url.set_query(None);
        if query.is_empty() == false {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        url
    }

    async fn authenticated(&self, request: RequestBuilder) -> RequestBuilder {
        let token = match &self.token_source {
            None => None,
            Some(source) => source.bearer_token().await,
        };
        let token = token.filter(|t| t.is_empty() == false).unwrap_or_else(|| self.anon_key.clone());
        let product = PRODUCT_NAME.lock().unwrap().clone();

        request
            .header("apikey", &self.anon_key)
            .bearer_auth(token)
            .header(USER_AGENT, product)
    }
}

/// Turn a non-successful response into a `BackendError`, using the error object in its body if any
async fn check_status(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(error_from_body(status.as_u16(), &body))
}

fn error_from_body(status: u16, body: &str) -> BackendError {
    match serde_json::from_str::<BackendError>(body) {
        Ok(err) if err.message.is_empty() == false => err,
        _ => BackendError::new(format!("Unexpected HTTP status code {}", status))
            .with_code(status)
    }
}

fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[async_trait]
impl TaskBackend for Client {
    async fn fetch_tasks(&self, since: Option<DateTime<Utc>>) -> Result<Vec<Task>, BackendError> {
        let mut query = vec![
            ("select", "*".to_string()),
            ("order", "updated_at.asc".to_string()),
        ];
        if let Some(since) = since {
            query.push(("updated_at", format!("gt.{}", format_timestamp(&since))));
        }
        let url = self.collection_url(&query);
        log::debug!("Fetching tasks from {}", url);

        let request = self.authenticated(self.http.get(url)).await;
        let response = check_status(request.send().await?).await?;
        let rows = response.json::<Vec<Task>>().await?;
        Ok(rows)
    }

    async fn upsert_tasks(&self, tasks: &[Task]) -> Result<Vec<Task>, BackendError> {
        let body: Vec<TaskRowWrite> = tasks.iter().map(TaskRowWrite::from).collect();
        let url = self.collection_url(&[("on_conflict", "id".to_string())]);
        log::debug!("Upserting {} task(s) to {}", tasks.len(), url);

        let request = self.http.post(url)
            .header(CONTENT_TYPE, "application/json")
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .json(&body);
        let response = check_status(self.authenticated(request).await.send().await?).await?;
        let rows = response.json::<Vec<Task>>().await?;
        Ok(rows)
    }

    async fn delete_task(&self, id: &TaskId) -> Result<(), BackendError> {
        let url = self.collection_url(&[("id", format!("eq.{}", id))]);
        log::debug!("Deleting task {}", id);

        let request = self.authenticated(self.http.delete(url)).await;
        check_status(request.send().await?).await?;
        Ok(())
    }
}
