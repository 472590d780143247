use log::info;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::decoder::DecoderConfig;
use crate::errors::ConfigError;
use crate::language_utils::LanguagePair;
use crate::translation::pipeline::{Pipeline, StepContext};

/// Pre-processing pipeline config inside a model directory
pub const PREPROCESS_FILE: &str = "preprocess.json";

/// Post-processing pipeline config inside a model directory
pub const POSTPROCESS_FILE: &str = "postprocess.json";

/// Engine launch settings inside a model directory
pub const DECODER_FILE: &str = "decoder.json";

/// One loaded model: its directory, direction, pipelines and engine settings.
///
/// Created once per loaded model and shared read-only by every translation
/// slot.
#[derive(Debug)]
pub struct ModelSession {
    model_dir: PathBuf,
    languages: LanguagePair,
    preprocess: Pipeline,
    postprocess: Pipeline,
    decoder: DecoderConfig,
}

impl ModelSession {
    /// Load `<root>/<model>`, where `model` names the language pair (`de-en`)
    pub fn load(root: &Path, model: &str) -> Result<Self, ConfigError> {
        let start = Instant::now();
        let languages: LanguagePair = model.parse()?;
        let model_dir = root.join(model);

        if !model_dir.is_dir() {
            return Err(ConfigError::MissingFile(model_dir));
        }

        let context = StepContext::new(&model_dir, languages.clone());
        let preprocess = Pipeline::from_file("preprocess", &model_dir.join(PREPROCESS_FILE), &context)?;
        let postprocess = Pipeline::from_file("postprocess", &model_dir.join(POSTPROCESS_FILE), &context)?;

        let decoder_file = model_dir.join(DECODER_FILE);
        let decoder = if decoder_file.exists() {
            DecoderConfig::from_file(&decoder_file)?
        } else {
            DecoderConfig::default()
        };
        decoder.validate()?;

        info!(
            "Loaded model {} from {} ({} pre / {} post steps) in {:?}",
            languages,
            model_dir.display(),
            preprocess.len(),
            postprocess.len(),
            start.elapsed()
        );

        Ok(Self::from_parts(model_dir, languages, preprocess, postprocess, decoder))
    }

    /// Assemble a session from already built parts
    pub fn from_parts(
        model_dir: PathBuf,
        languages: LanguagePair,
        preprocess: Pipeline,
        postprocess: Pipeline,
        decoder: DecoderConfig,
    ) -> Self {
        Self {
            model_dir,
            languages,
            preprocess,
            postprocess,
            decoder,
        }
    }

    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    pub fn languages(&self) -> &LanguagePair {
        &self.languages
    }

    pub fn source_language(&self) -> &str {
        &self.languages.source
    }

    pub fn target_language(&self) -> &str {
        &self.languages.target
    }

    pub fn preprocess(&self) -> &Pipeline {
        &self.preprocess
    }

    pub fn postprocess(&self) -> &Pipeline {
        &self.postprocess
    }

    pub fn decoder(&self) -> &DecoderConfig {
        &self.decoder
    }
}
