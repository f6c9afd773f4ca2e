//! InfluxDB 1.x HTTP adapter
//!
//! Reads through `/query` (InfluxQL, JSON response) and writes line
//! protocol through `/write`. The HTTP client lives in an
//! `InfluxConnection` that is acquired once per run and released when the
//! last handle drops, on success and error paths alike.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use super::{DataSource, DbSettings, Sink};
use crate::error::EngineError;
use crate::models::{Classification, Sample, SelectorGroup};
use crate::observability::LogContext;
use crate::timeparse::{influx_duration_literal, parse_instant};

/// Lines per `/write` request
const WRITE_BATCH: usize = 5000;

#[derive(Debug, Deserialize)]
struct InfluxQLResponse {
    #[serde(default)]
    results: Vec<InfluxQLResult>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InfluxQLResult {
    #[serde(default)]
    series: Option<Vec<InfluxQLSeries>>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InfluxQLSeries {
    #[allow(dead_code)]
    name: String,
    columns: Vec<String>,
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
    #[serde(default)]
    tags: Option<HashMap<String, String>>,
}

/// Owned HTTP session with one InfluxDB server
pub struct InfluxConnection {
    client: Client,
    base_url: Url,
    settings: DbSettings,
}

impl InfluxConnection {
    pub fn connect(settings: &DbSettings) -> Result<Self> {
        let base_url = base_url(settings)?;
        info!(
            server = %base_url,
            database = %settings.database,
            "Connecting to InfluxDB"
        );

        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .danger_accept_invalid_certs(settings.ssl && !settings.verify_ssl)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url,
            settings: settings.clone(),
        })
    }

    pub fn settings(&self) -> &DbSettings {
        &self.settings
    }

    /// Release the connection now instead of at end of scope
    pub fn close(self) {
        drop(self);
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        if let Some(token) = &self.settings.token {
            return request.header("Authorization", format!("Token {}", token));
        }
        match &self.settings.username {
            Some(user) => request.basic_auth(user, self.settings.password.as_deref()),
            None => request,
        }
    }

    async fn query(&self, database: &str, query: &str) -> Result<InfluxQLResponse> {
        let url = self.base_url.join("query").context("Invalid query path")?;
        debug!(database = %database, query = %query, "Executing InfluxQL");

        let response = self
            .authorize(self.client.get(url))
            .query(&[("db", database), ("q", query)])
            .header("Accept", "application/json")
            .send()
            .await
            .context("Failed to send request to InfluxDB")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("InfluxDB query failed with status {}: {}", status, body.trim());
        }

        let data = response
            .json::<InfluxQLResponse>()
            .await
            .context("Failed to parse InfluxDB response")?;

        if let Some(error) = &data.error {
            anyhow::bail!("InfluxDB query error: {}", error);
        }
        if let Some(error) = data.results.iter().find_map(|r| r.error.as_ref()) {
            anyhow::bail!("InfluxDB query error: {}", error);
        }

        Ok(data)
    }

    pub async fn create_database(&self, database: &str) -> Result<()> {
        let url = self.base_url.join("query").context("Invalid query path")?;
        let statement = format!("CREATE DATABASE {}", quote_ident(database));

        let response = self
            .authorize(self.client.post(url))
            .query(&[("q", statement.as_str())])
            .send()
            .await
            .context("Failed to send CREATE DATABASE to InfluxDB")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("CREATE DATABASE failed with status {}: {}", status, body.trim());
        }
        Ok(())
    }

    pub async fn write_lines(&self, database: &str, lines: &[String]) -> Result<()> {
        let url = self.base_url.join("write").context("Invalid write path")?;

        for batch in lines.chunks(WRITE_BATCH) {
            let response = self
                .authorize(self.client.post(url.clone()))
                .query(&[("db", database), ("precision", "ns")])
                .body(batch.join("\n"))
                .send()
                .await
                .context("Failed to send points to InfluxDB")?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                anyhow::bail!("InfluxDB write failed with status {}: {}", status, body.trim());
            }
        }
        Ok(())
    }
}

impl Drop for InfluxConnection {
    fn drop(&mut self) {
        debug!(server = %self.base_url, "Closing InfluxDB connection");
    }
}

fn base_url(settings: &DbSettings) -> Result<Url> {
    let raw = if settings.host.contains("://") {
        settings.host.clone()
    } else {
        let scheme = if settings.ssl { "https" } else { "http" };
        format!("{}://{}:{}", scheme, settings.host, settings.port)
    };

    let mut url = Url::parse(&raw)
        .map_err(|e| EngineError::config(format!("invalid database host '{}': {}", raw, e)))?;
    if url.port().is_none() && url.set_port(Some(settings.port)).is_err() {
        return Err(EngineError::config(format!("cannot set port on '{}'", raw)).into());
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// How the metric is laid out in the measurement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schema {
    /// Every metric is its own field column
    Icinga { target_column: String },
    /// A tag column names the metric, a shared field column holds the value
    Telegraf {
        kpi_column: String,
        target_kpi: String,
        value_column: String,
    },
}

/// What to read: measurement, metric layout, capacity column and filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTarget {
    pub measurement: String,
    pub schema: Schema,
    pub capacity_column: Option<String>,
    /// Extra InfluxQL condition ANDed into every WHERE clause
    pub filter: Option<String>,
}

impl QueryTarget {
    pub fn new(measurement: impl Into<String>, schema: Schema) -> Self {
        Self {
            measurement: measurement.into(),
            schema,
            capacity_column: None,
            filter: None,
        }
    }

    pub fn with_capacity_column(mut self, column: impl Into<String>) -> Self {
        self.capacity_column = Some(column.into());
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        let filter = filter.into();
        self.filter = if filter.trim().is_empty() {
            None
        } else {
            Some(filter)
        };
        self
    }

    fn value_column(&self) -> &str {
        match &self.schema {
            Schema::Icinga { target_column } => target_column,
            Schema::Telegraf { value_column, .. } => value_column,
        }
    }

    fn select_clause(&self) -> String {
        let mut clause = format!("{} AS \"value\"", quote_ident(self.value_column()));
        if let Some(capacity) = &self.capacity_column {
            clause.push_str(&format!(", {} AS \"capacity\"", quote_ident(capacity)));
        }
        clause
    }

    fn where_clause(&self, window_secs: f64, selector: Option<&SelectorGroup>) -> String {
        let mut conditions = vec![format!("time > now() - {}", influx_duration_literal(window_secs))];
        if let Schema::Telegraf {
            kpi_column,
            target_kpi,
            ..
        } = &self.schema
        {
            conditions.push(format!("{} = {}", quote_ident(kpi_column), quote_literal(target_kpi)));
        }
        if let Some(selector) = selector {
            for (column, value) in selector.iter() {
                conditions.push(format!("{} = {}", quote_ident(column), quote_literal(value)));
            }
        }
        if let Some(filter) = &self.filter {
            conditions.push(format!("({})", filter));
        }
        conditions.join(" AND ")
    }

    pub fn samples_query(&self, selector: &SelectorGroup, window_secs: f64) -> String {
        format!(
            "SELECT {} FROM {} WHERE {}",
            self.select_clause(),
            quote_ident(&self.measurement),
            self.where_clause(window_secs, Some(selector))
        )
    }

    pub fn combinations_query(&self, selector_columns: &[String], window_secs: f64) -> String {
        let group_by: Vec<String> = selector_columns.iter().map(|c| quote_ident(c)).collect();
        format!(
            "SELECT last({}) FROM {} WHERE {} GROUP BY {}",
            quote_ident(self.value_column()),
            quote_ident(&self.measurement),
            self.where_clause(window_secs, None),
            group_by.join(", ")
        )
    }
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('\\', "\\\\").replace('"', "\\\""))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// `DataSource` backed by an InfluxDB database
pub struct InfluxDataSource {
    connection: Arc<InfluxConnection>,
    database: String,
    target: QueryTarget,
}

impl InfluxDataSource {
    pub fn new(connection: Arc<InfluxConnection>, target: QueryTarget) -> Self {
        let database = connection.settings().database.clone();
        Self {
            connection,
            database,
            target,
        }
    }

    async fn fetch_samples(&self, selector: &SelectorGroup, window_secs: f64) -> Result<Vec<Sample>> {
        let query = self.target.samples_query(selector, window_secs);
        let response = self.connection.query(&self.database, &query).await?;

        let mut samples = Vec::new();
        let mut skipped = 0usize;
        for series in response.results.iter().filter_map(|r| r.series.as_ref()).flatten() {
            let column = |name: &str| series.columns.iter().position(|c| c == name);
            let time_idx = column("time").unwrap_or(0);
            let value_idx = column("value").unwrap_or(1);
            let capacity_idx = column("capacity");

            for row in &series.values {
                let value = row.get(value_idx).and_then(serde_json::Value::as_f64);
                let Some(value) = value else {
                    skipped += 1;
                    continue;
                };
                let timestamp = match row.get(time_idx) {
                    Some(serde_json::Value::String(text)) => parse_instant(text)?,
                    Some(serde_json::Value::Number(number)) => parse_instant(&number.to_string())?,
                    other => {
                        return Err(EngineError::parse("timestamp", format!("{:?}", other)).into())
                    }
                };
                let capacity = capacity_idx
                    .and_then(|idx| row.get(idx))
                    .and_then(serde_json::Value::as_f64);

                samples.push(Sample {
                    timestamp,
                    value,
                    capacity,
                });
            }
        }

        if skipped > 0 {
            warn!(skipped = skipped, "Dropped rows without a numeric value");
        }
        Ok(samples)
    }
}

#[async_trait]
impl DataSource for InfluxDataSource {
    async fn fetch_selector_combinations(
        &self,
        selector_columns: &[String],
        window_secs: f64,
    ) -> Result<Vec<SelectorGroup>> {
        if selector_columns.is_empty() {
            return Ok(vec![SelectorGroup::new()]);
        }

        let query = self.target.combinations_query(selector_columns, window_secs);
        let response = self.connection.query(&self.database, &query).await?;

        let mut groups: Vec<SelectorGroup> = response
            .results
            .iter()
            .filter_map(|r| r.series.as_ref())
            .flatten()
            .map(|series| {
                let tags = series.tags.clone().unwrap_or_default();
                selector_columns
                    .iter()
                    .map(|column| (column.clone(), tags.get(column).cloned().unwrap_or_default()))
                    .collect::<SelectorGroup>()
            })
            .collect();
        groups.sort();
        groups.dedup();
        Ok(groups)
    }

    async fn fetch_training_window(
        &self,
        selector: &SelectorGroup,
        training_timeframe_secs: f64,
    ) -> Result<Vec<Sample>> {
        self.fetch_samples(selector, training_timeframe_secs)
            .await
            .with_context(|| format!("Failed to fetch training data for {}", selector))
    }

    async fn fetch_live_window(&self, selector: &SelectorGroup, window_secs: f64) -> Result<Vec<Sample>> {
        self.fetch_samples(selector, window_secs)
            .await
            .with_context(|| format!("Failed to fetch live data for {}", selector))
    }
}

/// `Sink` that writes classifications back to InfluxDB
pub struct InfluxSink {
    connection: Arc<InfluxConnection>,
    database: String,
    measurement: String,
}

impl InfluxSink {
    pub fn new(
        connection: Arc<InfluxConnection>,
        database: impl Into<String>,
        measurement: impl Into<String>,
    ) -> Self {
        Self {
            connection,
            database: database.into(),
            measurement: measurement.into(),
        }
    }
}

#[async_trait]
impl Sink for InfluxSink {
    fn name(&self) -> &'static str {
        "influxdb"
    }

    async fn write(
        &self,
        group: &SelectorGroup,
        classifications: &[Classification],
        log: &LogContext,
    ) -> Result<()> {
        let lines: Vec<String> = classifications
            .iter()
            .filter_map(|c| line_protocol(&self.measurement, group, c))
            .collect();

        self.connection.create_database(&self.database).await?;
        self.connection.write_lines(&self.database, &lines).await?;
        log.log_written(self.name(), lines.len());
        Ok(())
    }
}

fn escape_key(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
}

fn escape_measurement(text: &str) -> String {
    text.replace('\\', "\\\\").replace(',', "\\,").replace(' ', "\\ ")
}

/// One line of line protocol; `None` when the timestamp cannot be expressed
/// in nanoseconds
fn line_protocol(measurement: &str, group: &SelectorGroup, c: &Classification) -> Option<String> {
    let nanos = c.timestamp.timestamp_nanos_opt()?;

    let mut line = escape_measurement(measurement);
    for (key, value) in group.iter().filter(|(_, v)| !v.is_empty()) {
        line.push_str(&format!(",{}={}", escape_key(key), escape_key(value)));
    }

    let mut fields = vec![
        format!("warning={}i", c.is_warning as u8),
        format!("anomaly={}i", c.is_anomaly as u8),
    ];
    let floats = [
        ("value", Some(c.value)),
        ("warn_threshold", Some(c.warning_threshold)),
        ("anom_threshold", Some(c.anomaly_threshold)),
        ("lower_warn_threshold", c.lower_warning_threshold),
        ("lower_anom_threshold", c.lower_anomaly_threshold),
    ];
    for (name, value) in floats {
        if let Some(v) = value.filter(|v| v.is_finite()) {
            fields.push(format!("{}={}", name, v));
        }
    }

    line.push(' ');
    line.push_str(&fields.join(","));
    line.push_str(&format!(" {}", nanos));
    Some(line)
}
