/*!
 * Pipeline orchestration.
 *
 * A pipeline is an immutable, ordered list of resolved steps. `run` threads
 * a batch through every step in declared order with no skipping and no
 * caching between calls.
 */

use log::{debug, trace};
use serde::Deserialize;
use std::path::Path;
use std::time::Instant;

use super::step::{Batch, Step, StepContext, StepSpec};
use crate::errors::{ConfigError, PipelineError};

/// Ordered step specs as stored on disk
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum PipelineConfig {
    /// `{"steps": [...]}`
    Wrapped { steps: Vec<StepSpec> },
    /// `[...]`
    Plain(Vec<StepSpec>),
}

impl PipelineConfig {
    /// Read a pipeline config file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::MissingFile(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// The step specs in order
    pub fn steps(&self) -> &[StepSpec] {
        match self {
            Self::Wrapped { steps } | Self::Plain(steps) => steps,
        }
    }
}

/// An ordered sequence of steps bound to one model and direction
#[derive(Debug)]
pub struct Pipeline {
    name: String,
    steps: Vec<Step>,
}

impl Pipeline {
    /// Resolve every spec; the first bad spec aborts construction
    pub fn new(name: &str, specs: &[StepSpec], context: &StepContext) -> Result<Self, ConfigError> {
        let steps = specs
            .iter()
            .map(|spec| Step::from_spec(spec, context))
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            "Pipeline '{}' ready: [{}]",
            name,
            steps.iter().map(Step::name).collect::<Vec<_>>().join(", ")
        );

        Ok(Self {
            name: name.to_string(),
            steps,
        })
    }

    /// Load a pipeline config file and resolve it
    pub fn from_file(name: &str, path: &Path, context: &StepContext) -> Result<Self, ConfigError> {
        let config = PipelineConfig::from_file(path)?;
        Self::new(name, config.steps(), context)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Apply every step in declared order
    pub async fn run(&self, batch: Batch) -> Result<Batch, PipelineError> {
        let start = Instant::now();
        let mut batch = batch;

        for step in &self.steps {
            let step_start = Instant::now();
            let lines_in = batch.len();
            batch = step.apply(batch).await?;

            debug!(
                "[{}] {}: {} -> {} lines in {:?}",
                self.name,
                step.name(),
                lines_in,
                batch.len(),
                step_start.elapsed()
            );
            for line in &batch {
                trace!("[{}] {}", self.name, line);
            }
        }

        debug!("[{}] finished in {:?}", self.name, start.elapsed());
        Ok(batch)
    }
}
