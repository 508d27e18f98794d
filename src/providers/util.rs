use crate::core::cache::TtlCache;
use crate::core::model::Sourced;
use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

pub const USER_AGENT: &str = "subnet-treasury/0.1";

/// Enforces a minimum spacing between outbound requests, across all callers
/// sharing the limiter.
pub struct RateLimiter {
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request: Mutex::new(None),
        }
    }

    /// Waits until a request may be sent and reserves the slot.
    pub async fn wait(&self) {
        // Held across the sleep so concurrent callers queue up behind it.
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                let pause = self.min_interval - elapsed;
                debug!(?pause, "Rate limiting outbound request");
                tokio::time::sleep(pause).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// HTTP GETs memoized by request key, with stale-on-error fallback.
///
/// Bodies are cached only after they decode and pass their check, so a
/// malformed or error response never replaces a good entry.
#[derive(Clone)]
pub struct CachedHttp {
    client: reqwest::Client,
    cache: Arc<TtlCache<String, String>>,
    limiter: Option<Arc<RateLimiter>>,
}

impl CachedHttp {
    pub fn new(client: reqwest::Client, cache: Arc<TtlCache<String, String>>) -> Self {
        Self {
            client,
            cache,
            limiter: None,
        }
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Fetches and decodes JSON. `key` identifies the request and must not
    /// contain secrets.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        key: &str,
        request: RequestBuilder,
    ) -> Result<T> {
        self.get_json_checked(key, request, |_: &T| Ok(())).await
    }

    /// Like [`CachedHttp::get_json`], but `check` can reject a body that
    /// parses yet reports an upstream error. Rejected bodies are not cached.
    pub async fn get_json_checked<T, C>(
        &self,
        key: &str,
        request: RequestBuilder,
        check: C,
    ) -> Result<T>
    where
        T: DeserializeOwned,
        C: Fn(&T) -> Result<()>,
    {
        self.fetch(key, request, |body| {
            let value = serde_json::from_str::<T>(body)
                .with_context(|| format!("Failed to parse JSON response for {key}"))?;
            check(&value)?;
            Ok(value)
        })
        .await
    }

    pub async fn get_text(&self, key: &str, request: RequestBuilder) -> Result<String> {
        self.fetch(key, request, |body| Ok(body.to_string())).await
    }

    async fn fetch<T, F>(&self, key: &str, request: RequestBuilder, decode: F) -> Result<T>
    where
        F: Fn(&str) -> Result<T>,
    {
        let cache_key = key.to_string();
        if let Some(body) = self.cache.get(&cache_key).await {
            return decode(&body);
        }

        let fresh = async {
            let body = self.send(key, request).await?;
            let value = decode(&body)?;
            Ok::<_, anyhow::Error>((body, value))
        }
        .await;

        match fresh {
            Ok((body, value)) => {
                self.cache.put(cache_key, body).await;
                Ok(value)
            }
            Err(e) => match self.cache.get_stale(&cache_key).await {
                Some(body) => {
                    warn!(error = %e, key, "Upstream request failed, serving stale cache");
                    decode(&body)
                }
                None => Err(e),
            },
        }
    }

    async fn send(&self, key: &str, request: RequestBuilder) -> Result<String> {
        if let Some(limiter) = &self.limiter {
            limiter.wait().await;
        }
        debug!(key, "Requesting upstream data");

        let response = request
            .send()
            .await
            .map_err(|e| anyhow!("Request error: {} for {}", e, key))?;

        if !response.status().is_success() {
            return Err(anyhow!("HTTP error: {} for {}", response.status(), key));
        }

        response
            .text()
            .await
            .with_context(|| format!("Failed to get response text for {key}"))
    }
}

/// Builds the HTTP client shared by all adapters.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .context("Failed to build HTTP client")
}

/// Turns an adapter result into a boundary value, zero-filling on error.
pub fn or_unavailable<T: Default>(result: Result<T>, what: &str) -> Sourced<T> {
    match result {
        Ok(value) => Sourced::ok(value),
        Err(e) => {
            error!(error = %e, "Error fetching {what}, using empty value");
            Sourced::unavailable()
        }
    }
}

/// Reads a number out of a JSON number or a numeric string, defaulting to 0.
///
/// Strings may carry `$`, thousands separators and surrounding whitespace.
/// Non-finite results are treated as malformed.
pub fn coerce_f64(value: &Value) -> f64 {
    let number = match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => parse_amount(s),
        _ => 0.0,
    };
    if number.is_finite() { number } else { 0.0 }
}

/// Parses `"$10,000"`-style text. Unparsable input is 0.
pub fn parse_amount(text: &str) -> f64 {
    let cleaned: String = text
        .chars()
        .filter(|c| !matches!(c, '$' | ',') && !c.is_whitespace())
        .collect();
    match cleaned.parse::<f64>() {
        Ok(n) if n.is_finite() => n,
        _ => 0.0,
    }
}

/// Clamps a monetary quantity to a finite, non-negative value.
pub fn non_negative(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

/// `deserialize_with` helper for numeric fields that may be strings, null or
/// missing (combine with `#[serde(default)]`).
pub fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().map(coerce_f64).unwrap_or(0.0))
}

/// Returns the first present, non-null value.
pub fn first_present<'a>(candidates: &[&'a Option<Value>]) -> Option<&'a Value> {
    candidates
        .iter()
        .filter_map(|v| v.as_ref())
        .find(|v| !v.is_null())
}

/// Extracts an address that may be given as a plain string or `{ "ss58": … }`.
pub fn address_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .get("ss58")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        _ => String::new(),
    }
}

/// Parses an upstream timestamp into Unix milliseconds, 0 when unparsable.
///
/// Accepts RFC 3339 strings, naive `YYYY-MM-DD[ HH:MM:SS]` strings (UTC) and
/// numbers, where values below 1e12 are taken as seconds.
pub fn timestamp_millis(value: &Value) -> i64 {
    match value {
        Value::Number(n) => {
            let raw = n.as_f64().unwrap_or(0.0);
            if !raw.is_finite() || raw <= 0.0 {
                0
            } else if raw < 1e12 {
                (raw * 1000.0) as i64
            } else {
                raw as i64
            }
        }
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return dt.timestamp_millis();
            }
            for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
                if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
                    return dt.and_utc().timestamp_millis();
                }
            }
            if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                return date
                    .and_hms_opt(0, 0, 0)
                    .map(|dt| dt.and_utc().timestamp_millis())
                    .unwrap_or(0);
            }
            s.parse::<f64>()
                .map(|n| timestamp_millis(&Value::from(n)))
                .unwrap_or(0)
        }
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, Respond, ResponseTemplate};

    #[test]
    fn test_coerce_numbers_and_strings() {
        assert_eq!(coerce_f64(&json!(12.5)), 12.5);
        assert_eq!(coerce_f64(&json!("150000000000")), 150_000_000_000.0);
        assert_eq!(coerce_f64(&json!("$10,000")), 10_000.0);
        assert_eq!(coerce_f64(&json!("not a number")), 0.0);
        assert_eq!(coerce_f64(&json!(null)), 0.0);
        assert_eq!(coerce_f64(&json!({"nested": 1})), 0.0);
        assert_eq!(coerce_f64(&json!("inf")), 0.0);
    }

    #[test]
    fn test_non_negative() {
        assert_eq!(non_negative(-3.0), 0.0);
        assert_eq!(non_negative(f64::NAN), 0.0);
        assert_eq!(non_negative(f64::INFINITY), 0.0);
        assert_eq!(non_negative(4.5), 4.5);
    }

    #[test]
    fn test_lenient_field_deserialization() {
        #[derive(Deserialize)]
        struct Row {
            #[serde(default, deserialize_with = "lenient_f64")]
            price: f64,
            #[serde(default, deserialize_with = "lenient_f64")]
            missing: f64,
        }

        let row: Row = serde_json::from_str(r#"{"price": "412.5"}"#).unwrap();
        assert_eq!(row.price, 412.5);
        assert_eq!(row.missing, 0.0);

        let row: Row = serde_json::from_str(r#"{"price": null}"#).unwrap();
        assert_eq!(row.price, 0.0);
    }

    #[test]
    fn test_address_of() {
        assert_eq!(address_of(&json!("5Abc")), "5Abc");
        assert_eq!(address_of(&json!({"ss58": "5Def", "hex": "0x1"})), "5Def");
        assert_eq!(address_of(&json!(null)), "");
    }

    #[test]
    fn test_timestamp_millis() {
        assert_eq!(
            timestamp_millis(&json!("2025-01-15T12:00:00Z")),
            1_736_942_400_000
        );
        assert_eq!(
            timestamp_millis(&json!("2025-01-15T12:00:00.000")),
            1_736_942_400_000
        );
        assert_eq!(timestamp_millis(&json!(1_736_942_400)), 1_736_942_400_000);
        assert_eq!(
            timestamp_millis(&json!(1_736_942_400_000i64)),
            1_736_942_400_000
        );
        assert_eq!(timestamp_millis(&json!("garbage")), 0);
    }

    struct CountingResponder {
        calls: Arc<AtomicUsize>,
        template: ResponseTemplate,
    }

    impl Respond for CountingResponder {
        fn respond(&self, _: &wiremock::Request) -> ResponseTemplate {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.template.clone()
        }
    }

    #[tokio::test]
    async fn test_fresh_cache_hit_skips_request() {
        let server = MockServer::start().await;
        let calls = Arc::new(AtomicUsize::new(0));
        Mock::given(method("GET"))
            .and(path("/data"))
            .respond_with(CountingResponder {
                calls: Arc::clone(&calls),
                template: ResponseTemplate::new(200).set_body_string(r#"{"n": 1}"#),
            })
            .mount(&server)
            .await;

        let http = CachedHttp::new(
            reqwest::Client::new(),
            Arc::new(TtlCache::new(Duration::from_secs(60))),
        );
        let url = format!("{}/data", server.uri());

        for _ in 0..3 {
            let value: Value = http.get_json("/data", http.client().get(&url)).await.unwrap();
            assert_eq!(value["n"], 1);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stale_cache_served_when_upstream_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"n": 7}"#))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/data"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let cache = Arc::new(TtlCache::new(Duration::from_millis(0)));
        let http = CachedHttp::new(reqwest::Client::new(), cache);
        let url = format!("{}/data", server.uri());

        let first: Value = http.get_json("/data", http.client().get(&url)).await.unwrap();
        assert_eq!(first["n"], 7);

        // TTL of zero makes every entry stale; the 429 falls back to it
        let second: Value = http.get_json("/data", http.client().get(&url)).await.unwrap();
        assert_eq!(second["n"], 7);
    }

    #[tokio::test]
    async fn test_error_without_cache_is_returned() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let http = CachedHttp::new(
            reqwest::Client::new(),
            Arc::new(TtlCache::new(Duration::from_secs(60))),
        );
        let url = format!("{}/data", server.uri());

        let result = http.get_json::<Value>("/data", http.client().get(&url)).await;
        assert_eq!(
            result.unwrap_err().to_string(),
            "HTTP error: 500 Internal Server Error for /data"
        );
    }

    #[tokio::test]
    async fn test_malformed_body_is_not_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let cache = Arc::new(TtlCache::new(Duration::from_secs(60)));
        let http = CachedHttp::new(reqwest::Client::new(), Arc::clone(&cache));
        let url = format!("{}/data", server.uri());

        let result = http.get_json::<Value>("/data", http.client().get(&url)).await;
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to parse JSON response for /data")
        );
        assert!(cache.get_stale(&"/data".to_string()).await.is_none());
    }

    #[tokio::test]
    async fn test_rate_limiter_spaces_requests() {
        let limiter = RateLimiter::new(Duration::from_millis(50));
        let start = Instant::now();
        limiter.wait().await;
        limiter.wait().await;
        limiter.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(100));
    }
}
