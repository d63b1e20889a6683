use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;
use serde::Deserialize;

use crate::config::AppConfig;
use crate::error::{ScanError, ScanResult};

pub const VM_SERVICE_NAME: &str = "Virtual Machines";

/// Filter constraints for one fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceQuery {
    pub currency_code: String,
    pub api_version: Option<String>,
    pub filter: String,
}

impl PriceQuery {
    /// All VM meters, narrowed to one ARM region when given.
    pub fn virtual_machines(
        currency_code: &str,
        api_version: Option<&str>,
        region: Option<&str>,
    ) -> Self {
        let mut filter = format!("serviceName eq '{VM_SERVICE_NAME}'");
        if let Some(region) = region {
            filter.push_str(&format!(" and armRegionName eq '{region}'"));
        }
        Self {
            currency_code: currency_code.to_string(),
            api_version: api_version.map(str::to_string),
            filter,
        }
    }

    pub fn query_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("currencyCode", self.currency_code.clone()),
            ("$filter", self.filter.clone()),
        ];
        if let Some(version) = &self.api_version {
            params.push(("api-version", version.clone()));
        }
        params
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageRequest {
    First(PriceQuery),
    /// Continuation link exactly as returned by the previous page.
    Next(String),
}

/// Transport seam for the paginated catalog endpoint.
#[allow(async_fn_in_trait)]
pub trait PriceApi {
    async fn get_page(&self, request: &PageRequest) -> Result<RetailPricePage, PageError>;
}

/// Failure of a single page request, before it is attributed to a filter set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageError {
    pub status: Option<u16>,
    pub message: String,
    pub transient: bool,
}

impl PageError {
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let snippet: String = body.chars().take(200).collect();
        Self {
            status: Some(status.as_u16()),
            message: format!("retail prices returned status {status}: {snippet}"),
            transient: status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error(),
        }
    }

    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        Self {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
            transient: err.is_timeout() || err.is_connect() || err.is_body(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetailPricesClient {
    base_url: String,
    http: reqwest::Client,
}

impl RetailPricesClient {
    pub fn new(base_url: String, http: reqwest::Client) -> Self {
        Self { base_url, http }
    }

    pub fn from_config(cfg: &AppConfig) -> ScanResult<Self> {
        let mut headers = HeaderMap::new();
        if let Some(key) = cfg.keys.api_key.as_deref().map(str::trim) {
            if !key.is_empty() {
                let name = HeaderName::from_bytes(cfg.keys.api_key_header.as_bytes())
                    .map_err(|e| ScanError::Config(format!("keys.api_key_header: {e}")))?;
                let mut value = HeaderValue::from_str(key)
                    .map_err(|e| ScanError::Config(format!("keys.api_key: {e}")))?;
                value.set_sensitive(true);
                headers.insert(name, value);
            }
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.scanner.timeout_s))
            .user_agent(cfg.scanner.user_agent.clone())
            .default_headers(headers)
            .build()?;
        Ok(Self::new(cfg.scanner.api_url.clone(), http))
    }
}

impl PriceApi for RetailPricesClient {
    async fn get_page(&self, request: &PageRequest) -> Result<RetailPricePage, PageError> {
        let builder = match request {
            PageRequest::First(query) => self
                .http
                .get(self.base_url.as_str())
                .query(&query.query_params()),
            PageRequest::Next(link) => self.http.get(link.as_str()),
        };

        let resp = builder
            .send()
            .await
            .map_err(|e| PageError::from_reqwest(&e))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(PageError::from_status(status, &body));
        }

        let bytes = resp.bytes().await.map_err(|e| PageError::from_reqwest(&e))?;
        serde_json::from_slice::<RetailPricePage>(&bytes).map_err(|e| PageError {
            status: Some(status.as_u16()),
            message: format!("failed to decode retail prices page: {e}"),
            transient: false,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RetailPricePage {
    #[serde(default)]
    pub billing_currency: Option<String>,
    #[serde(default)]
    pub items: Vec<RawPriceItem>,
    #[serde(default)]
    pub next_page_link: Option<String>,
    #[serde(default)]
    pub count: Option<u64>,
}

impl RetailPricePage {
    /// Continuation link if present; an empty link ends pagination.
    pub fn continuation(&self) -> Option<&str> {
        self.next_page_link.as_deref().filter(|link| !link.is_empty())
    }

    /// False only when the page states a billing currency other than `expected`.
    pub fn billing_currency_matches(&self, expected: &str) -> bool {
        self.billing_currency
            .as_deref()
            .map_or(true, |c| c.trim().eq_ignore_ascii_case(expected))
    }
}

/// One catalog meter as returned by the API. Every field is optional so a
/// single odd item never fails the page.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPriceItem {
    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub retail_price: Option<f64>,
    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub unit_price: Option<f64>,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub currency_code: Option<String>,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub arm_region_name: Option<String>,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub effective_start_date: Option<String>,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub meter_id: Option<String>,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub meter_name: Option<String>,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub product_name: Option<String>,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub sku_name: Option<String>,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub arm_sku_name: Option<String>,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub service_name: Option<String>,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub unit_of_measure: Option<String>,
    #[serde(default, rename = "type", deserialize_with = "de_lenient_string")]
    pub price_type: Option<String>,
}

/// Numbers or numeric strings; anything else reads as missing.
fn de_lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Number(num) => num.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    })
}

fn de_lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Number(num) => Some(num.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    })
}
