use log::debug;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use url::Url;

use crate::error::{ApiErrorBody, StoreError};

/// Request builder for a single table under `/rest/v1/`.
///
/// Covers exactly the query surface the sync core uses: column selection,
/// equality / case-insensitive / membership filters, ordering, limits, and
/// the four row verbs. Filters accumulate as PostgREST query parameters.
pub struct TableQuery {
    base_url: String,
    table: String,
    http_client: Client,
    headers: HeaderMap,
    query_params: Vec<(String, String)>,
}

impl TableQuery {
    pub fn new(base_url: &str, api_key: &str, table: &str, http_client: Client) -> Self {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(api_key) {
            headers.insert("apikey", value);
        }
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            table: table.to_string(),
            http_client,
            headers,
            query_params: Vec::new(),
        }
    }

    /// Attach a bearer token so row-level security sees the caller.
    pub fn with_auth(mut self, token: &str) -> Result<Self, StoreError> {
        let value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| StoreError::InvalidParameters("invalid auth token".to_string()))?;
        self.headers.insert("Authorization", value);
        Ok(self)
    }

    pub fn select(mut self, columns: &str) -> Self {
        self.query_params.push(("select".to_string(), columns.to_string()));
        self
    }

    pub fn eq(mut self, column: &str, value: &str) -> Self {
        self.query_params.push((column.to_string(), format!("eq.{}", value)));
        self
    }

    /// Case-insensitive match. Without wildcards this is an exact match
    /// modulo case, which is how invite codes are looked up.
    pub fn ilike(mut self, column: &str, pattern: &str) -> Self {
        self.query_params.push((column.to_string(), format!("ilike.{}", pattern)));
        self
    }

    pub fn in_list(mut self, column: &str, values: &[String]) -> Self {
        self.query_params
            .push((column.to_string(), format!("in.({})", values.join(","))));
        self
    }

    pub fn order_desc(mut self, column: &str) -> Self {
        self.query_params.push(("order".to_string(), format!("{}.desc", column)));
        self
    }

    pub fn limit(mut self, count: i32) -> Self {
        self.query_params.push(("limit".to_string(), count.to_string()));
        self
    }

    fn build_url(&self) -> Result<String, StoreError> {
        let mut url = Url::parse(&format!("{}/rest/v1/{}", self.base_url, self.table))?;
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &self.query_params {
                pairs.append_pair(key, value);
            }
        }
        Ok(url.into())
    }

    async fn error_from(response: reqwest::Response) -> StoreError {
        let status = response.status();
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "failed to read error response".to_string());
        let message = match serde_json::from_str::<ApiErrorBody>(&error_text) {
            Ok(body) => body.to_string(),
            Err(_) => error_text,
        };
        StoreError::Api { message, status }
    }

    /// GET the filtered rows.
    pub async fn execute<T: DeserializeOwned>(&self) -> Result<Vec<T>, StoreError> {
        let url = self.build_url()?;
        debug!("store GET {}", url);

        let response = self
            .http_client
            .get(&url)
            .headers(self.headers.clone())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        let rows = response.json::<Vec<T>>().await?;
        Ok(rows)
    }

    /// POST new rows, returning the stored representation.
    pub async fn insert<T: Serialize>(&self, values: &T) -> Result<Vec<Value>, StoreError> {
        let url = self.build_url()?;
        debug!("store POST {}", url);

        let mut headers = self.headers.clone();
        headers.insert("Prefer", HeaderValue::from_static("return=representation"));

        let response = self
            .http_client
            .post(&url)
            .headers(headers)
            .json(values)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        let body_text = response.text().await?;
        if body_text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let value = serde_json::from_str::<Value>(&body_text)?;
        match value {
            Value::Array(rows) => Ok(rows),
            single => Ok(vec![single]),
        }
    }

    /// PATCH the filtered rows.
    pub async fn update<T: Serialize>(&self, values: &T) -> Result<(), StoreError> {
        let url = self.build_url()?;
        debug!("store PATCH {}", url);

        let response = self
            .http_client
            .patch(&url)
            .headers(self.headers.clone())
            .json(values)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        Ok(())
    }

    /// DELETE the filtered rows.
    pub async fn delete(&self) -> Result<(), StoreError> {
        let url = self.build_url()?;
        debug!("store DELETE {}", url);

        let response = self
            .http_client
            .delete(&url)
            .headers(self.headers.clone())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_carries_filters_in_order() {
        let query = TableQuery::new(
            "http://localhost:54321/",
            "anon",
            "grocery_items",
            Client::new(),
        )
        .select("*")
        .eq("pantry_id", "p1")
        .order_desc("created_at");

        let url = query.build_url().unwrap();
        assert!(url.starts_with("http://localhost:54321/rest/v1/grocery_items?"));
        assert!(url.contains("select=*"));
        assert!(url.contains("pantry_id=eq.p1"));
        assert!(url.contains("order=created_at.desc"));
    }

    #[test]
    fn in_list_filter_joins_values() {
        let query = TableQuery::new("http://localhost", "anon", "profiles", Client::new())
            .in_list("id", &["a".to_string(), "b".to_string()]);
        let url = query.build_url().unwrap();
        assert!(url.contains("id=in.%28a%2Cb%29"));
    }
}
