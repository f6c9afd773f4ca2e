//! Sinks that never touch the output database

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::Sink;
use crate::models::{Classification, SelectorGroup};
use crate::observability::LogContext;

/// One classified point as it appears in a dump file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedRecord {
    pub measurement: String,
    pub tags: SelectorGroup,
    #[serde(flatten)]
    pub classification: Classification,
}

/// Writes each group's classifications to
/// `{dir}/{output_database}.{output_measurement}.{slug}.json`
pub struct FileSink {
    dir: PathBuf,
    output_database: String,
    output_measurement: String,
}

impl FileSink {
    pub fn new(
        dir: impl Into<PathBuf>,
        output_database: impl Into<String>,
        output_measurement: impl Into<String>,
    ) -> Self {
        Self {
            dir: dir.into(),
            output_database: output_database.into(),
            output_measurement: output_measurement.into(),
        }
    }

    pub fn path_for(&self, group: &SelectorGroup) -> PathBuf {
        let slug = if group.is_empty() {
            "all".to_string()
        } else {
            group.slug()
        };
        self.dir.join(format!(
            "{}.{}.{}.json",
            self.output_database, self.output_measurement, slug
        ))
    }
}

#[async_trait]
impl Sink for FileSink {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn write(
        &self,
        group: &SelectorGroup,
        classifications: &[Classification],
        log: &LogContext,
    ) -> Result<()> {
        let records: Vec<ClassifiedRecord> = classifications
            .iter()
            .map(|c| ClassifiedRecord {
                measurement: self.output_measurement.clone(),
                tags: group.clone(),
                classification: c.clone(),
            })
            .collect();

        let path = self.path_for(group);
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;
        let json = serde_json::to_vec_pretty(&records)?;
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        log.log_written(self.name(), records.len());
        Ok(())
    }
}

/// Logs what would have been written and discards it
#[derive(Debug, Default)]
pub struct DryRunSink;

#[async_trait]
impl Sink for DryRunSink {
    fn name(&self) -> &'static str {
        "dry-run"
    }

    async fn write(
        &self,
        group: &SelectorGroup,
        classifications: &[Classification],
        log: &LogContext,
    ) -> Result<()> {
        let flagged = classifications
            .iter()
            .filter(|c| !c.is_normal())
            .count();
        let _guard = log.span().enter();
        info!(
            group = %group,
            points = classifications.len(),
            flagged = flagged,
            "Dry run, nothing written"
        );
        Ok(())
    }
}
