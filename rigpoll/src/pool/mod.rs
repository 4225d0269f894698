//! Pool tasks: account statistics from mining pool HTTP APIs.
//!
//! A pool task issues one GET per poll and reports, for every worker it
//! expects to see on the account, whether the pool knows about it.

pub mod api;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use time::UtcOffset;

use crate::device::{parse_port, parse_timeout};
use crate::dispatch::{PollTask, Spec};
use crate::error::TaskError;
use crate::exchange::{ErrorKind, ErrorObject, Exchange};
use crate::normalize::Present;
use crate::record::{Metric, MetricValue, Record};
use crate::tracing::prelude::*;
use crate::vendor::ShapingError;

pub use api::{PoolKind, QueryArgs};

fn default_port() -> i64 {
    443
}

fn default_timeout() -> i64 {
    5
}

fn default_tls() -> bool {
    true
}

/// The query a pool task runs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoolRequest {
    pub name: String,
    #[serde(default)]
    pub args: QueryArgs,
}

/// A pool account as configured, before validation.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoolSpec {
    pub id: String,
    pub pool: String,
    #[serde(default)]
    pub coin: Option<String>,
    /// Pool default when absent.
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_port")]
    pub port: i64,
    #[serde(default = "default_timeout")]
    pub timeout: i64,
    pub account: String,
    pub request: PoolRequest,
    #[serde(default)]
    pub workers: Vec<String>,
    #[serde(default = "default_tls")]
    pub tls: bool,
    #[serde(default)]
    pub description: Option<String>,
}

impl Spec for PoolSpec {
    type Task = PoolTask;
    type Context = ();

    fn id(&self) -> &str {
        &self.id
    }

    fn validate(&self, _: &()) -> Result<PoolTask, TaskError> {
        let kind: PoolKind = self
            .pool
            .parse()
            .map_err(|_| TaskError::UnknownPool(self.pool.clone()))?;
        let port = parse_port(self.port)?;
        let timeout = parse_timeout(self.timeout)?;
        let path = kind.path(
            self.coin.as_deref(),
            &self.account,
            &self.request.name,
            &self.request.args,
        )?;

        let host = self
            .host
            .clone()
            .unwrap_or_else(|| kind.default_host().to_string());
        let scheme = if self.tls { "https" } else { "http" };
        let url = format!("{}://{}:{}{}", scheme, host, port, path);

        // Pools are reached directly, never through an environment proxy.
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()
            .map_err(|e| TaskError::Client(e.to_string()))?;

        Ok(PoolTask {
            id: self.id.clone(),
            kind,
            coin: self.coin.clone(),
            host,
            port,
            timeout,
            account: self.account.clone(),
            query: self.request.name.clone(),
            paths: vec![path],
            url,
            workers: self.workers.clone(),
            description: self.description.clone(),
            client,
        })
    }
}

/// A validated pool account query.
#[derive(Debug)]
pub struct PoolTask {
    id: String,
    kind: PoolKind,
    coin: Option<String>,
    host: String,
    port: u16,
    timeout: Duration,
    account: String,
    query: String,
    paths: Vec<String>,
    url: String,
    workers: Vec<String>,
    description: Option<String>,
    client: reqwest::Client,
}

impl PoolTask {
    pub fn kind(&self) -> PoolKind {
        self.kind
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn workers(&self) -> &[String] {
        &self.workers
    }

    /// Whether the pool reported success in its answer.
    fn answer_ok(&self, answer: &Value) -> Result<bool, ShapingError> {
        let status = answer
            .get("status")
            .ok_or_else(|| ShapingError::MissingKey("status".into()))?;
        Ok(match self.kind {
            PoolKind::FlyPool => status.as_str() == Some("OK"),
            PoolKind::NanoPool => match status {
                Value::Bool(b) => *b,
                Value::Null => false,
                Value::Number(n) => n.as_f64().is_some_and(|x| x != 0.0),
                Value::String(s) => !s.is_empty(),
                _ => true,
            },
        })
    }

    /// Hashrate the pool reports for `worker`, if it lists the worker.
    fn worker_hashrate<'a>(&self, answer: &'a Value, worker: &str) -> Result<Option<&'a Value>, ShapingError> {
        let listed = answer
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| ShapingError::MissingKey("data".into()))?;
        let (name, hashrate_key) = match self.kind {
            PoolKind::FlyPool => (worker.to_lowercase(), "reportedHashrate"),
            PoolKind::NanoPool => (worker.to_string(), "hashrate"),
        };
        Ok(listed
            .iter()
            .find(|item| item.get("worker").and_then(Value::as_str) == Some(name.as_str()))
            .map(|item| item.get(hashrate_key).unwrap_or(&Value::Null)))
    }

    fn answer<'a>(&self, exchanges: &'a [Exchange]) -> Result<&'a Value, ShapingError> {
        exchanges
            .iter()
            .map(Exchange::response)
            .next()
            .ok_or(ShapingError::MissingResponse("pool"))
    }
}

impl Serialize for PoolTask {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Settings<'a> {
            host: &'a str,
            port: u16,
            pool: PoolKind,
            #[serde(skip_serializing_if = "Option::is_none")]
            coin: Option<&'a str>,
            account: &'a str,
            request: &'a str,
            workers: &'a [String],
            #[serde(skip_serializing_if = "Option::is_none")]
            description: Option<&'a str>,
        }

        Settings {
            host: &self.host,
            port: self.port,
            pool: self.kind,
            coin: self.coin.as_deref(),
            account: &self.account,
            request: &self.query,
            workers: &self.workers,
            description: self.description.as_deref(),
        }
        .serialize(serializer)
    }
}

#[async_trait::async_trait]
impl PollTask for PoolTask {
    type Request = String;

    fn id(&self) -> &str {
        &self.id
    }

    fn requests(&self) -> &[String] {
        &self.paths
    }

    async fn exchange(&self, path: &String) -> Exchange {
        let request = json!(path);
        trace!(url = %self.url, "Querying pool");

        let network = |e: reqwest::Error| {
            let message = if e.is_timeout() {
                format!("timed out after {:?}", self.timeout)
            } else {
                e.to_string()
            };
            ErrorObject::new(ErrorKind::NetworkError, "", message)
        };

        let response = match self.client.get(&self.url).send().await {
            Ok(response) => response,
            Err(e) => return Exchange::failure(request, network(e)),
        };
        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return Exchange::failure(request, network(e)),
        };

        match serde_json::from_str::<Value>(&body) {
            Ok(answer) => Exchange::success(request, answer),
            Err(e) => Exchange::failure(
                request,
                ErrorObject::new(ErrorKind::ParseError, format!("{}: {}", status, body), e.to_string()),
            ),
        }
    }
}

impl Present for PoolTask {
    fn group(&self) -> String {
        self.kind.to_string()
    }

    fn label(&self) -> String {
        format!("{} - {}:{}", self.id, self.host, self.port)
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn table(&self, exchanges: &[Exchange], _: UtcOffset) -> Result<Record, ShapingError> {
        let answer = self.answer(exchanges)?;
        let mut record = Record::new();
        record.insert("Pool", self.kind.to_string());
        record.insert("Account", self.account.as_str());
        record.insert("Status", answer.get("status").cloned().unwrap_or(Value::Null));

        if self.answer_ok(answer)? {
            for worker in &self.workers {
                let hashrate = self
                    .worker_hashrate(answer, worker)?
                    .cloned()
                    .unwrap_or_else(|| Value::from("offline"));
                record.insert(worker.as_str(), hashrate);
            }
        }
        Ok(record)
    }

    fn metrics(&self, exchanges: &[Exchange]) -> Result<Vec<Metric>, ShapingError> {
        let answer = self.answer(exchanges)?;
        let ok = self.answer_ok(answer)?;
        let mut metrics = Vec::new();

        for worker in &self.workers {
            let worker = worker.as_str();
            metrics.push(Metric::new(worker, "pool.status", 1i64));
            if !ok {
                metrics.push(Metric::new(worker, "pool.answer.status", 0i64));
                continue;
            }
            metrics.push(Metric::new(worker, "pool.answer.status", 1i64));
            match self.worker_hashrate(answer, worker)? {
                Some(hashrate) => {
                    metrics.push(Metric::new(worker, "miner.pool.status", 1i64));
                    metrics.push(Metric::new(
                        worker,
                        "miner.pool.hashrate",
                        MetricValue::from_json(hashrate),
                    ));
                }
                None => metrics.push(Metric::new(worker, "miner.pool.status", 0i64)),
            }
        }
        Ok(metrics)
    }

    fn down(&self) -> Vec<Metric> {
        self.workers
            .iter()
            .map(|worker| Metric::new(worker.as_str(), "pool.status", 0i64))
            .collect()
    }
}
