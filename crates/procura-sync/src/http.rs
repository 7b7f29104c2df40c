//! HTTP client for the registry's paginated contract search.
//!
//! The search endpoint is a DataTables backend: every page is a POST of the
//! full table state (`draw`, `start`, `length`, column list, ordering) plus a
//! grant-date window. The first page reports `recordsFiltered`, which fixes
//! the page count for the rest of the pull.

use std::time::Duration;

use chrono::NaiveDate;
use procura_core::{RawRow, raw_row_from_json};
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{info, warn};

pub const DEFAULT_BASE_URL: &str = "https://consultacontratos.ocpr.gov.pr";
const SEARCH_PATH: &str = "/contract/search";
const TOKEN_HEADER: &str = "__RequestVerificationToken";

/// Registry fields in search-table column order.
pub const REGISTRY_FIELDS: [&str; 9] = [
    "ContractNumber",
    "Contractors",
    "DateOfGrant",
    "EffectiveDateFrom",
    "EffectiveDateTo",
    "AmountToPay",
    "Service",
    "EntityId",
    "CancellationDate",
];

/// Index of `DateOfGrant` in the column payload (after the leading blank column).
const ORDER_COLUMN: usize = 3;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Server { status: u16, body: String },
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid grant window: {from} is after {to}")]
    Window { from: NaiveDate, to: NaiveDate },
}

/// Connection and pacing settings for one pull.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub base_url: String,
    pub page_length: usize,
    pub timeout: Duration,
    /// Attempts per page, including the first.
    pub max_retries: u32,
    /// Wait before the second attempt; each later wait is multiplied by `retry_backoff`.
    pub retry_initial: Duration,
    pub retry_backoff: f64,
    /// Pause between successful pages.
    pub request_delay: Duration,
    /// Anti-forgery token copied from a browser session, if the site demands one.
    pub token: Option<String>,
    /// Raw `Cookie` header value from the same session.
    pub cookie: Option<String>,
    pub user_agent: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            page_length: 10_000,
            timeout: Duration::from_secs(60),
            max_retries: 4,
            retry_initial: Duration::from_secs(1),
            retry_backoff: 2.0,
            request_delay: Duration::from_millis(250),
            token: None,
            cookie: None,
            user_agent: concat!("procura/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[derive(Deserialize)]
struct SearchPage {
    #[serde(rename = "recordsTotal", default)]
    records_total: Option<u64>,
    #[serde(rename = "recordsFiltered", default)]
    records_filtered: Option<u64>,
    #[serde(default)]
    data: Vec<Value>,
}

impl SearchPage {
    fn rows(&self) -> Vec<RawRow> {
        self.data
            .iter()
            .filter_map(Value::as_object)
            .filter(|obj| !obj.is_empty())
            .map(raw_row_from_json)
            .collect()
    }
}

/// Client for the registry's contract search endpoint.
pub struct RegistryClient {
    client: reqwest::Client,
    config: RegistryConfig,
}

impl RegistryClient {
    pub fn new(mut config: RegistryConfig) -> Result<Self, SyncError> {
        config.base_url = config.base_url.trim_end_matches('/').to_string();
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Every listing granted within `[from, to]`, in registry order.
    pub async fn fetch_window(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<RawRow>, SyncError> {
        if from > to {
            return Err(SyncError::Window { from, to });
        }
        let length = self.config.page_length.max(1);
        info!(%from, %to, length, "registry pull started");

        let first = self.post_page(1, 0, from, to).await?;
        let total = first
            .records_filtered
            .or(first.records_total)
            .unwrap_or(0) as usize;
        let pages = total.div_ceil(length).max(1);
        info!(total, pages, "registry reported result size");

        let mut rows = first.rows();
        let mut last_len = first.data.len();
        for page in 1..pages {
            if last_len < length {
                break;
            }
            tokio::time::sleep(self.config.request_delay).await;
            let body = self
                .post_page(page as u64 + 1, page * length, from, to)
                .await?;
            last_len = body.data.len();
            info!(page = page + 1, pages, rows = last_len, "fetched page");
            rows.extend(body.rows());
        }
        info!(rows = rows.len(), "registry pull complete");
        Ok(rows)
    }

    /// POST one page, retrying with exponential backoff.
    async fn post_page(
        &self,
        draw: u64,
        start: usize,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<SearchPage, SyncError> {
        let payload = search_payload(draw, start, self.config.page_length, from, to);
        let mut wait = self.config.retry_initial;
        let mut attempt = 1;
        loop {
            match self.try_post(&payload).await {
                Ok(page) => return Ok(page),
                Err(e) if attempt >= self.config.max_retries => return Err(e),
                Err(e) => {
                    warn!(start, attempt, error = %e, "page request failed, retrying");
                    tokio::time::sleep(wait).await;
                    wait = wait.mul_f64(self.config.retry_backoff);
                    attempt += 1;
                }
            }
        }
    }

    async fn try_post(&self, payload: &Value) -> Result<SearchPage, SyncError> {
        let url = format!("{}{SEARCH_PATH}", self.config.base_url);
        let mut req = self
            .client
            .post(&url)
            .header("Accept", "application/json, text/javascript, */*; q=0.01")
            .header("X-Requested-With", "XMLHttpRequest")
            .header("Referer", format!("{}/", self.config.base_url))
            .json(payload);
        if let Some(token) = &self.config.token {
            req = req.header(TOKEN_HEADER, token);
        }
        if let Some(cookie) = &self.config.cookie {
            req = req.header("Cookie", cookie);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SyncError::Server {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }
        let text = resp.text().await?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Full DataTables request body for one page.
fn search_payload(draw: u64, start: usize, length: usize, from: NaiveDate, to: NaiveDate) -> Value {
    let column = |data: Value, enabled: bool| {
        json!({
            "data": data,
            "name": "",
            "searchable": enabled,
            "orderable": enabled,
            "search": {"value": "", "regex": false},
        })
    };
    let mut columns = vec![column(Value::Null, false)];
    columns.extend(REGISTRY_FIELDS.iter().map(|f| column(json!(f), true)));
    columns.push(column(Value::Null, false));

    json!({
        "draw": draw,
        "columns": columns,
        "order": [{"column": ORDER_COLUMN, "dir": "asc"}],
        "start": start,
        "length": length,
        "search": {"value": "", "regex": false},
        "EntityId": null,
        "ContractNumber": null,
        "ContractorName": null,
        "DateOfGrantFrom": from.format("%d/%m/%Y").to_string(),
        "DateOfGrantTo": to.format("%d/%m/%Y").to_string(),
        "EffectiveDateFrom": null,
        "EffectiveDateTo": null,
        "AmountFrom": null,
        "AmountTo": null,
        "ServiceGroupId": null,
        "ServiceId": null,
        "FundId": null,
        "ContractingFormId": null,
        "PCONumber": null,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn test_config(base_url: String) -> RegistryConfig {
        RegistryConfig {
            base_url,
            retry_initial: Duration::ZERO,
            request_delay: Duration::ZERO,
            ..RegistryConfig::default()
        }
    }

    fn listing(id: &str) -> Value {
        json!({
            "ContractId": id,
            "AmountToPay": 1500.0,
            "Contractors": [{"Name": "ACME CORP"}],
            "CancellationDate": null,
        })
    }

    #[test]
    fn payload_shape() {
        let p = search_payload(3, 20_000, 10_000, d("2023-01-01"), d("2023-12-31"));
        assert_eq!(p["draw"], 3);
        assert_eq!(p["start"], 20_000);
        assert_eq!(p["DateOfGrantFrom"], "01/01/2023");
        assert_eq!(p["DateOfGrantTo"], "31/12/2023");
        let columns = p["columns"].as_array().unwrap();
        assert_eq!(columns.len(), REGISTRY_FIELDS.len() + 2);
        assert_eq!(columns[ORDER_COLUMN]["data"], "DateOfGrant");
        assert!(columns[0]["data"].is_null());
    }

    #[test]
    fn trims_trailing_slash() {
        let client = RegistryClient::new(test_config("http://localhost:4000/".into())).unwrap();
        assert_eq!(client.config().base_url, "http://localhost:4000");
    }

    #[tokio::test]
    async fn single_page_pull() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path(SEARCH_PATH)
                    .header(TOKEN_HEADER, "tok");
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(json!({
                        "recordsTotal": 2,
                        "recordsFiltered": 2,
                        "data": [listing("A"), listing("B")],
                    }));
            })
            .await;

        let mut config = test_config(server.base_url());
        config.token = Some("tok".into());
        let client = RegistryClient::new(config).unwrap();
        let rows = client
            .fetch_window(d("2023-01-01"), d("2023-12-31"))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["ContractId"], "A");
        assert_eq!(rows[0]["AmountToPay"], "1500.0");
        assert_eq!(rows[0]["Contractors"], r#"[{"Name":"ACME CORP"}]"#);
        assert!(!rows[0].contains_key("CancellationDate"));
    }

    #[tokio::test]
    async fn pages_follow_records_filtered() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path(SEARCH_PATH);
                then.status(200).json_body(json!({
                    "recordsFiltered": 4,
                    "data": [listing("A"), listing("B")],
                }));
            })
            .await;

        let mut config = test_config(server.base_url());
        config.page_length = 2;
        let client = RegistryClient::new(config).unwrap();
        let rows = client
            .fetch_window(d("2023-01-01"), d("2023-01-31"))
            .await
            .unwrap();

        mock.assert_calls_async(2).await;
        assert_eq!(rows.len(), 4);
    }

    #[tokio::test]
    async fn server_errors_exhaust_retries() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path(SEARCH_PATH);
                then.status(500).body("upstream down");
            })
            .await;

        let client = RegistryClient::new(test_config(server.base_url())).unwrap();
        let err = client
            .fetch_window(d("2023-01-01"), d("2023-01-31"))
            .await
            .unwrap_err();

        mock.assert_calls_async(4).await;
        assert!(matches!(err, SyncError::Server { status: 500, .. }));
    }

    #[tokio::test]
    async fn reversed_window_is_rejected() {
        let client = RegistryClient::new(RegistryConfig::default()).unwrap();
        let err = client
            .fetch_window(d("2023-02-01"), d("2023-01-01"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Window { .. }));
    }
}
