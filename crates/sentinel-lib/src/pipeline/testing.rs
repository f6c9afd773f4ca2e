//! In-memory collaborators for pipeline tests

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Classification, Sample, SelectorGroup};
use crate::observability::LogContext;
use crate::source::{DataSource, Sink};

#[derive(Default)]
pub struct FakeSource {
    groups: Vec<SelectorGroup>,
    training: BTreeMap<SelectorGroup, Vec<Sample>>,
    live: BTreeMap<SelectorGroup, Vec<Sample>>,
    broken: HashSet<SelectorGroup>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_group(mut self, group: SelectorGroup) -> Self {
        self.groups.push(group);
        self
    }

    pub fn with_training(mut self, group: SelectorGroup, samples: Vec<Sample>) -> Self {
        self.training.insert(group, samples);
        self
    }

    pub fn with_live(mut self, group: SelectorGroup, samples: Vec<Sample>) -> Self {
        self.live.insert(group, samples);
        self
    }

    /// Every fetch for `group` fails like a dropped connection
    pub fn with_broken(mut self, group: SelectorGroup) -> Self {
        self.broken.insert(group);
        self
    }
}

#[async_trait]
impl DataSource for FakeSource {
    async fn fetch_selector_combinations(
        &self,
        _selector_columns: &[String],
        _window_secs: f64,
    ) -> Result<Vec<SelectorGroup>> {
        Ok(self.groups.clone())
    }

    async fn fetch_training_window(
        &self,
        selector: &SelectorGroup,
        _training_timeframe_secs: f64,
    ) -> Result<Vec<Sample>> {
        if self.broken.contains(selector) {
            anyhow::bail!("connection reset while reading {}", selector);
        }
        Ok(self.training.get(selector).cloned().unwrap_or_default())
    }

    async fn fetch_live_window(&self, selector: &SelectorGroup, _window_secs: f64) -> Result<Vec<Sample>> {
        if self.broken.contains(selector) {
            anyhow::bail!("connection reset while reading {}", selector);
        }
        Ok(self.live.get(selector).cloned().unwrap_or_default())
    }
}

/// Records everything written, in write order
#[derive(Default)]
pub struct RecordingSink {
    pub written: Mutex<Vec<(SelectorGroup, Vec<Classification>)>>,
}

#[async_trait]
impl Sink for RecordingSink {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn write(
        &self,
        group: &SelectorGroup,
        classifications: &[Classification],
        _log: &LogContext,
    ) -> Result<()> {
        self.written
            .lock()
            .unwrap()
            .push((group.clone(), classifications.to_vec()));
        Ok(())
    }
}
