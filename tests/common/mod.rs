use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{json, Value};

use demand_forecast::{
    config::AppConfig, errors::ApiError, models::ForecastRecord, services::ForecastApi, AppState,
};

/// One call seen by [`MockForecastApi`].
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct RecordedCall {
    pub method: &'static str,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

/// In-memory transport with scripted responses per path.
///
/// Each path answers from its queue first and repeats its fallback once the
/// queue is drained. Unknown paths answer 404.
#[derive(Default)]
pub struct MockForecastApi {
    scripted: Mutex<HashMap<String, VecDeque<Result<Value, ApiError>>>>,
    fallback: Mutex<HashMap<String, Result<Value, ApiError>>>,
    calls: Mutex<Vec<RecordedCall>>,
    count: AtomicUsize,
    delay: Duration,
}

#[allow(dead_code)]
impl MockForecastApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn respond(self, path: &str, response: Result<Value, ApiError>) -> Self {
        self.fallback
            .lock()
            .unwrap()
            .insert(path.to_string(), response);
        self
    }

    pub fn then(self, path: &str, response: Result<Value, ApiError>) -> Self {
        self.scripted
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back(response);
        self
    }

    pub fn call_count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    fn answer(&self, call: RecordedCall) -> Result<Value, ApiError> {
        self.count.fetch_add(1, Ordering::SeqCst);
        let path = call.path.clone();
        self.calls.lock().unwrap().push(call);

        if let Some(next) = self
            .scripted
            .lock()
            .unwrap()
            .get_mut(&path)
            .and_then(VecDeque::pop_front)
        {
            return next;
        }
        self.fallback
            .lock()
            .unwrap()
            .get(&path)
            .cloned()
            .unwrap_or_else(|| Err(ApiError::from_status(404, format!("no route for {}", path))))
    }
}

#[async_trait]
impl ForecastApi for MockForecastApi {
    async fn get(&self, path: &[&str], query: &[(String, String)]) -> Result<Value, ApiError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.answer(RecordedCall {
            method: "GET",
            path: path.join("/"),
            query: query.to_vec(),
            body: None,
        })
    }

    async fn post(&self, path: &[&str], body: &Value) -> Result<Value, ApiError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.answer(RecordedCall {
            method: "POST",
            path: path.join("/"),
            query: Vec::new(),
            body: Some(body.clone()),
        })
    }
}

/// Application state over `api` with a fast retry schedule.
#[allow(dead_code)]
pub fn test_state(api: Arc<MockForecastApi>) -> AppState {
    let mut cfg = AppConfig::new("http://forecast.test");
    cfg.retry.max_attempts = 3;
    cfg.retry.delay_ms = 10;
    AppState::with_api(cfg, api)
}

#[allow(dead_code)]
pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[allow(dead_code)]
pub fn record(brick: &str, site: &str, week: NaiveDate, qty: f64) -> ForecastRecord {
    ForecastRecord::new(site, week, qty).with_brick(brick)
}

/// `GET /forecast/` payload holding `records`.
#[allow(dead_code)]
pub fn page_of(records: &[ForecastRecord]) -> Value {
    json!({
        "data": records,
        "total_records": records.len(),
        "page": 1,
        "page_size": 1000,
        "has_next": false,
    })
}
