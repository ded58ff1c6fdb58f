//! InfluxSink - InfluxDB v1 HTTP `/write` endpoint

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use contracts::{ContractError, DataSink, Precision, Record};
use tracing::{debug, error, instrument, warn};

use super::line_protocol;

const DEFAULT_MAX_PENDING: usize = 10_000;

/// Configuration for InfluxSink
#[derive(Debug, Clone)]
pub struct InfluxSinkConfig {
    /// Server base URL, e.g. `http://localhost:8086`
    pub url: String,
    /// Target database
    pub database: String,
    /// Retention policy (server default when unset)
    pub retention_policy: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Lines buffered before a write request is sent; 1 writes every record immediately
    pub batch_size: usize,
    /// Lines kept for retry after failed requests; the oldest go first beyond this
    pub max_pending: usize,
    /// Per-request timeout
    pub timeout: Duration,
}

impl InfluxSinkConfig {
    /// Create config from params map
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self, String> {
        let url = params
            .get("url")
            .ok_or_else(|| "missing 'url' parameter".to_string())?;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(format!("invalid url '{}': expected http:// or https://", url));
        }

        let database = params
            .get("db")
            .filter(|db| !db.is_empty())
            .ok_or_else(|| "missing 'db' parameter".to_string())?;

        let batch_size = match params.get("batch_size") {
            Some(raw) => raw
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| format!("invalid batch_size '{}'", raw))?,
            None => 1,
        };

        let max_pending = match params.get("max_pending") {
            Some(raw) => raw
                .parse::<usize>()
                .map_err(|_| format!("invalid max_pending '{}'", raw))?,
            None => DEFAULT_MAX_PENDING,
        }
        .max(batch_size);

        let timeout_secs = params
            .get("timeout_secs")
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);

        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            database: database.clone(),
            retention_policy: params.get("rp").cloned(),
            username: params.get("username").cloned(),
            password: params.get("password").cloned(),
            batch_size,
            max_pending,
            timeout: Duration::from_secs(timeout_secs),
        })
    }

    fn write_url(&self) -> String {
        format!("{}/write", self.url)
    }

    fn query(&self, precision: Precision) -> Vec<(&'static str, &str)> {
        let mut query = vec![("db", self.database.as_str()), ("precision", precision.as_str())];
        if let Some(rp) = &self.retention_policy {
            query.push(("rp", rp.as_str()));
        }
        if let Some(user) = &self.username {
            query.push(("u", user.as_str()));
        }
        if let Some(password) = &self.password {
            query.push(("p", password.as_str()));
        }
        query
    }
}

/// Sink that writes line protocol batches over HTTP
pub struct InfluxSink {
    name: String,
    config: InfluxSinkConfig,
    http: reqwest::Client,
    /// Pending lines grouped by precision; one request per precision
    pending: BTreeMap<Precision, Vec<String>>,
}

impl InfluxSink {
    /// Create a new InfluxSink
    pub fn new(name: impl Into<String>, config: InfluxSinkConfig) -> Result<Self, ContractError> {
        let name = name.into();
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ContractError::sink_connection(&name, format!("HTTP client: {e}")))?;

        Ok(Self {
            name,
            config,
            http,
            pending: BTreeMap::new(),
        })
    }

    /// Create from params map (for factory)
    pub fn from_params(
        name: impl Into<String>,
        params: &HashMap<String, String>,
    ) -> Result<Self, ContractError> {
        let name = name.into();
        let config = InfluxSinkConfig::from_params(params)
            .map_err(|e| ContractError::sink_connection(&name, e))?;
        Self::new(name, config)
    }

    /// Lines waiting for the next request
    pub fn pending_len(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    async fn send(&self, precision: Precision, body: String) -> Result<(), ContractError> {
        let resp = self
            .http
            .post(self.config.write_url())
            .query(&self.config.query(precision))
            .body(body)
            .send()
            .await
            .map_err(|e| ContractError::sink_write(&self.name, format!("request: {e}")))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }

        let body = resp.text().await.unwrap_or_default();
        error!(sink = %self.name, status = %status, body = %body, "Write rejected");
        Err(ContractError::sink_write(
            &self.name,
            format!("server returned {status}: {body}"),
        ))
    }

    /// Send every pending batch
    ///
    /// Failed batches stay pending and go out with the next request. The first
    /// error is returned.
    async fn send_pending(&mut self) -> Result<(), ContractError> {
        let pending = std::mem::take(&mut self.pending);
        let mut first_error = None;

        for (precision, lines) in pending {
            match self.send(precision, lines.join("\n")).await {
                Ok(()) => debug!(sink = %self.name, lines = lines.len(), "Batch written"),
                Err(e) => {
                    warn!(sink = %self.name, lines = lines.len(), "Batch kept for retry");
                    self.pending.insert(precision, lines);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => {
                self.trim_pending();
                Err(e)
            }
            None => Ok(()),
        }
    }

    /// Drop the oldest lines beyond `max_pending`
    fn trim_pending(&mut self) {
        let mut excess = self.pending_len().saturating_sub(self.config.max_pending);
        if excess == 0 {
            return;
        }

        error!(
            sink = %self.name,
            dropped = excess,
            max_pending = self.config.max_pending,
            "Retry buffer full, oldest lines dropped"
        );
        for lines in self.pending.values_mut() {
            let n = excess.min(lines.len());
            lines.drain(..n);
            excess -= n;
            if excess == 0 {
                break;
            }
        }
        self.pending.retain(|_, lines| !lines.is_empty());
    }
}

impl DataSink for InfluxSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "influx_sink_write",
        skip(self, record),
        fields(sink = %self.name, series = %record.series)
    )]
    async fn write(&mut self, record: &Record) -> Result<(), ContractError> {
        let Some(line) = line_protocol::encode(record) else {
            debug!(sink = %self.name, "Nothing encodable, skipped");
            return Ok(());
        };

        self.pending.entry(record.precision).or_default().push(line);

        if self.pending_len() >= self.config.batch_size {
            self.send_pending().await?;
        }
        Ok(())
    }

    #[instrument(name = "influx_sink_flush", skip(self))]
    async fn flush(&mut self) -> Result<(), ContractError> {
        self.send_pending().await
    }

    #[instrument(name = "influx_sink_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        let result = self.send_pending().await;
        debug!(sink = %self.name, "InfluxSink closed");
        result
    }
}
