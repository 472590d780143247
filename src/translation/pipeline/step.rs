/*!
 * Pipeline steps.
 *
 * One entry of `preprocess.json` / `postprocess.json` is a [`StepSpec`]:
 * `{"action": <kind>, "command"?: <filter>, ...parameters}`. Specs are
 * resolved once into a [`Step`] carrying a closed [`StepKind`]; unknown
 * actions, unusable parameters and missing model files fail here and never
 * at run time.
 */

use log::debug;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use unicode_normalization::UnicodeNormalization;

use super::external::ExternalFilter;
use super::punctuation::{PunctFix, PunctuationNormalizer, RegexRules};
use super::sentences::{SentenceSplitter, SplitBackend};
use super::subword::{DeSubword, SubwordSegmenter};
use super::truecaser::Truecaser;
use crate::database::TruecaseDictionary;
use crate::errors::{ConfigError, PipelineError};
use crate::language_utils::LanguagePair;

/// Ordered sentences flowing through a pipeline
pub type Batch = Vec<String>;

/// Declarative description of one step, as read from the model directory
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StepSpec {
    /// Step kind
    pub action: String,

    /// Filter command; when present the step runs as an external process
    #[serde(default)]
    pub command: Option<String>,

    /// Kind-specific parameters
    #[serde(flatten)]
    pub parameters: Map<String, Value>,
}

impl StepSpec {
    /// Create a spec without parameters
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            command: None,
            parameters: Map::new(),
        }
    }

    /// Builder-style parameter setter
    pub fn with_parameter(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.to_string(), value.into());
        self
    }

    /// Builder-style command setter
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    /// Whether this step is delegated to an external filter process
    pub fn is_external(&self) -> bool {
        self.command.is_some()
    }

    fn parameters_as<T: DeserializeOwned>(&self) -> Result<T, ConfigError> {
        serde_json::from_value(Value::Object(self.parameters.clone())).map_err(|e| {
            ConfigError::InvalidParameter {
                parameter: self.action.clone(),
                message: e.to_string(),
            }
        })
    }
}

/// What a step needs from the loaded model to resolve itself
#[derive(Debug, Clone)]
pub struct StepContext {
    /// Directory holding the model files
    pub model_dir: PathBuf,
    /// Translation direction
    pub languages: LanguagePair,
}

impl StepContext {
    /// Create a context for a model directory and direction
    pub fn new(model_dir: impl Into<PathBuf>, languages: LanguagePair) -> Self {
        Self {
            model_dir: model_dir.into(),
            languages,
        }
    }

    /// Resolve a model file relative to the model directory; it must exist
    pub fn resolve_file(&self, file: &str) -> Result<PathBuf, ConfigError> {
        let path = self.resolve_path(&self.expand(file));
        if path.exists() {
            Ok(path)
        } else {
            Err(ConfigError::MissingFile(path))
        }
    }

    /// Resolve a path relative to the model directory without checking it
    pub fn resolve_path(&self, file: &str) -> PathBuf {
        let path = Path::new(file);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.model_dir.join(path)
        }
    }

    /// Substitute `{model}`, `{src}` and `{trg}` in a template
    pub fn expand(&self, template: &str) -> String {
        template
            .replace("{model}", &self.model_dir.to_string_lossy())
            .replace("{src}", &self.languages.source)
            .replace("{trg}", &self.languages.target)
    }
}

/// The closed set of actions a spec may name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction {
    NormalizeUnicode,
    SplitSentences,
    Truecase,
    SubwordSegment,
    DeSubwordSegment,
    FixEndOfSentenceSpacing,
    FixQuotes,
    GenericRegex,
    ExternalCommand,
    NormalizePunctuation,
    NormalizeWhitespace,
    SplitDates,
}

impl FromStr for StepAction {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Legacy spellings from older model directories are accepted too.
        match s.trim() {
            "normalize-unicode" | "normalize_unicode" => Ok(Self::NormalizeUnicode),
            "split-sentences" | "split_sentences" => Ok(Self::SplitSentences),
            "truecase" => Ok(Self::Truecase),
            "subword-segment" | "bpe" => Ok(Self::SubwordSegment),
            "de-subword-segment" | "de-bpe" => Ok(Self::DeSubwordSegment),
            "fix-end-of-sentence-spacing" | "fix-eos" => Ok(Self::FixEndOfSentenceSpacing),
            "fix-quotes" => Ok(Self::FixQuotes),
            "generic-regex" | "apply-regex" => Ok(Self::GenericRegex),
            "external-command" | "command" => Ok(Self::ExternalCommand),
            "normalize-punctuation" => Ok(Self::NormalizePunctuation),
            "normalize-whitespace" => Ok(Self::NormalizeWhitespace),
            "split-dates" => Ok(Self::SplitDates),
            other => Err(ConfigError::UnknownStepKind(other.to_string())),
        }
    }
}

/// Unicode normalization form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnicodeForm {
    Nfc,
    Nfd,
    Nfkc,
    Nfkd,
}

impl UnicodeForm {
    /// Normalize one line
    pub fn normalize(&self, line: &str) -> String {
        match self {
            Self::Nfc => line.nfc().collect(),
            Self::Nfd => line.nfd().collect(),
            Self::Nfkc => line.nfkc().collect(),
            Self::Nfkd => line.nfkd().collect(),
        }
    }
}

impl FromStr for UnicodeForm {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "NFC" => Ok(Self::Nfc),
            "NFD" => Ok(Self::Nfd),
            "NFKC" => Ok(Self::Nfkc),
            "NFKD" => Ok(Self::Nfkd),
            other => Err(ConfigError::InvalidParameter {
                parameter: "form".to_string(),
                message: format!("unknown normalization form '{}'", other),
            }),
        }
    }
}

/// A resolved step with its kind-specific state
pub enum StepKind {
    NormalizeUnicode(UnicodeForm),
    SplitSentences(SentenceSplitter),
    Truecase(Truecaser),
    SubwordSegment(SubwordSegmenter),
    DeSubwordSegment(DeSubword),
    FixEndOfSentenceSpacing(PunctFix),
    Regex(RegexRules),
    NormalizePunctuation(PunctuationNormalizer),
    NormalizeWhitespace,
    External(ExternalFilter),
}

impl fmt::Debug for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::NormalizeUnicode(form) => return write!(f, "NormalizeUnicode({:?})", form),
            Self::SplitSentences(_) => "SplitSentences",
            Self::Truecase(_) => "Truecase",
            Self::SubwordSegment(_) => "SubwordSegment",
            Self::DeSubwordSegment(_) => "DeSubwordSegment",
            Self::FixEndOfSentenceSpacing(_) => "FixEndOfSentenceSpacing",
            Self::Regex(_) => "Regex",
            Self::NormalizePunctuation(_) => "NormalizePunctuation",
            Self::NormalizeWhitespace => "NormalizeWhitespace",
            Self::External(filter) => return write!(f, "External({})", filter.command_line()),
        };
        f.write_str(kind)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct NormalizeUnicodeParams {
    #[serde(default = "default_form")]
    form: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct SplitSentencesParams {
    #[serde(default, deserialize_with = "lenient_usize")]
    max_sentence_length: usize,
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct TruecaseParams {
    model: String,
    #[serde(default)]
    asr: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct SubwordParams {
    codes: String,
    #[serde(default)]
    vocabulary: Option<String>,
    #[serde(default, deserialize_with = "lenient_usize")]
    vocabulary_threshold: usize,
    #[serde(default = "default_separator")]
    separator: String,
    #[serde(default)]
    merges: Option<Value>,
    #[serde(default)]
    glossaries: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct DeSubwordParams {
    #[serde(default)]
    pattern: Option<String>,
    #[serde(default)]
    separator: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct FixEosParams {
    #[serde(default = "default_quote")]
    quote: String,
}

#[derive(Deserialize)]
struct RegexRuleSpec {
    pattern: String,
    #[serde(default)]
    replacement: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct GenericRegexParams {
    #[serde(default)]
    pattern: Option<String>,
    #[serde(default)]
    replacement: Option<String>,
    #[serde(default)]
    rules: Vec<RegexRuleSpec>,
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct NormalizePunctuationParams {
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    penn: bool,
}

fn default_form() -> String {
    "NFC".to_string()
}

fn default_separator() -> String {
    "@@".to_string()
}

fn default_quote() -> String {
    "&quot;".to_string()
}

/// Accept both `40` and `"40"` for numeric parameters
fn lenient_usize<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_u64()
            .map(|n| n as usize)
            .ok_or_else(|| serde::de::Error::custom(format!("expected a non-negative integer, got {}", n))),
        Value::String(s) => s.trim().parse().map_err(serde::de::Error::custom),
        Value::Null => Ok(0),
        other => Err(serde::de::Error::custom(format!("expected an integer, got {}", other))),
    }
}

/// Parse the `merges` parameter: a count, `"30K"`, or -1 for all merges
pub fn parse_merges(value: Option<&Value>) -> Result<Option<usize>, ConfigError> {
    let invalid = |message: String| ConfigError::InvalidParameter {
        parameter: "merges".to_string(),
        message,
    };

    let count: i64 = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .ok_or_else(|| invalid(format!("not an integer: {}", n)))?,
        Some(Value::String(s)) => s
            .trim()
            .replace(['K', 'k'], "000")
            .parse()
            .map_err(|_| invalid(format!("not an integer: '{}'", s)))?,
        Some(other) => return Err(invalid(format!("unexpected value {}", other))),
    };

    Ok(usize::try_from(count).ok())
}

/// One resolved pipeline step
#[derive(Debug)]
pub struct Step {
    name: String,
    kind: StepKind,
}

impl Step {
    /// Resolve a spec against a model
    pub fn from_spec(spec: &StepSpec, context: &StepContext) -> Result<Self, ConfigError> {
        let action: StepAction = spec.action.parse()?;
        let name = spec.action.clone();

        let kind = match (action, spec.command.as_deref()) {
            (StepAction::SplitSentences, command) => {
                let params: SplitSentencesParams = spec.parameters_as()?;
                let backend = match command {
                    Some(command) => SplitBackend::External(ExternalFilter::new(&name, command, context)?),
                    None => SplitBackend::Rules,
                };
                StepKind::SplitSentences(SentenceSplitter::new(backend, params.max_sentence_length))
            }
            (_, Some(command)) => StepKind::External(ExternalFilter::new(&name, command, context)?),
            (StepAction::ExternalCommand, None) => {
                return Err(ConfigError::MissingParameter {
                    step: name,
                    parameter: "command".to_string(),
                });
            }
            (StepAction::NormalizeUnicode, None) => {
                let params: NormalizeUnicodeParams = spec.parameters_as()?;
                StepKind::NormalizeUnicode(params.form.parse()?)
            }
            (StepAction::Truecase, None) => {
                let params: TruecaseParams = spec.parameters_as()?;
                let model = context.resolve_path(&context.expand(&params.model));
                let dictionary = TruecaseDictionary::open_or_build(&model).map_err(|e| match e {
                    crate::errors::DictionaryError::SourceNotFound(path) => ConfigError::MissingFile(path),
                    other => ConfigError::Dictionary(other),
                })?;
                StepKind::Truecase(Truecaser::new(dictionary).with_asr(params.asr))
            }
            (StepAction::SubwordSegment, None) => {
                let params: SubwordParams = spec.parameters_as()?;
                let codes = context.resolve_file(&params.codes)?;
                let vocabulary = params
                    .vocabulary
                    .as_deref()
                    .map(|file| context.resolve_file(file))
                    .transpose()?;
                let merges = parse_merges(params.merges.as_ref())?;
                let segmenter = SubwordSegmenter::from_files(
                    &codes,
                    merges,
                    &params.separator,
                    vocabulary.as_deref(),
                    params.vocabulary_threshold,
                    params.glossaries,
                )?;
                StepKind::SubwordSegment(segmenter)
            }
            (StepAction::DeSubwordSegment, None) => {
                let params: DeSubwordParams = spec.parameters_as()?;
                StepKind::DeSubwordSegment(DeSubword::new(
                    params.pattern.as_deref(),
                    params.separator.as_deref(),
                )?)
            }
            (StepAction::FixEndOfSentenceSpacing, None) => {
                let params: FixEosParams = spec.parameters_as()?;
                StepKind::FixEndOfSentenceSpacing(PunctFix::new(&params.quote)?)
            }
            (StepAction::FixQuotes, None) => StepKind::Regex(RegexRules::fix_quotes()?),
            (StepAction::SplitDates, None) => StepKind::Regex(RegexRules::split_dates()?),
            (StepAction::GenericRegex, None) => {
                let params: GenericRegexParams = spec.parameters_as()?;
                let mut pairs: Vec<(String, String)> = Vec::new();
                if let Some(pattern) = params.pattern {
                    pairs.push((pattern, params.replacement.unwrap_or_default()));
                }
                pairs.extend(params.rules.into_iter().map(|r| (r.pattern, r.replacement)));
                if pairs.is_empty() {
                    return Err(ConfigError::MissingParameter {
                        step: name,
                        parameter: "pattern".to_string(),
                    });
                }
                StepKind::Regex(RegexRules::from_pairs(&pairs)?)
            }
            (StepAction::NormalizePunctuation, None) => {
                let params: NormalizePunctuationParams = spec.parameters_as()?;
                let language = params
                    .language
                    .unwrap_or_else(|| context.languages.source.clone());
                StepKind::NormalizePunctuation(PunctuationNormalizer::new(&language, params.penn)?)
            }
            (StepAction::NormalizeWhitespace, None) => StepKind::NormalizeWhitespace,
        };

        debug!("Resolved step '{}' as {:?}", name, kind);
        Ok(Self { name, kind })
    }

    /// Step name (the action as written in the spec)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolved kind
    pub fn kind(&self) -> &StepKind {
        &self.kind
    }

    /// Whether the step pipes text through an external process
    pub fn is_external(&self) -> bool {
        match &self.kind {
            StepKind::External(_) => true,
            StepKind::SplitSentences(splitter) => splitter.is_external(),
            _ => false,
        }
    }

    /// Whether the step maps each input line to exactly one output line
    pub fn is_per_line(&self) -> bool {
        !matches!(self.kind, StepKind::External(_) | StepKind::SplitSentences(_))
    }

    /// Apply the step to a batch of lines
    pub async fn apply(&self, batch: Batch) -> Result<Batch, PipelineError> {
        match &self.kind {
            StepKind::External(filter) => filter.run(&batch).await,
            StepKind::SplitSentences(splitter) => splitter.split(&batch).await,
            StepKind::NormalizeUnicode(form) => Ok(per_line(&batch, |l| form.normalize(l))),
            StepKind::SubwordSegment(segmenter) => Ok(per_line(&batch, |l| segmenter.segment_line(l))),
            StepKind::DeSubwordSegment(desegmenter) => Ok(per_line(&batch, |l| desegmenter.apply(l))),
            StepKind::FixEndOfSentenceSpacing(fix) => Ok(per_line(&batch, |l| fix.apply(l))),
            StepKind::Regex(rules) => Ok(per_line(&batch, |l| rules.apply(l))),
            StepKind::NormalizePunctuation(normalizer) => Ok(per_line(&batch, |l| normalizer.apply(l))),
            StepKind::NormalizeWhitespace => Ok(per_line(&batch, squeeze_whitespace)),
            StepKind::Truecase(truecaser) => batch
                .iter()
                .map(|line| truecaser.apply(line).map(|l| l.trim().to_string()))
                .collect(),
        }
    }

    /// Apply the step to a single line
    pub async fn apply_line(&self, line: &str) -> Result<Batch, PipelineError> {
        self.apply(vec![line.to_string()]).await
    }
}

fn per_line<F>(batch: &[String], f: F) -> Batch
where
    F: Fn(&str) -> String,
{
    batch.iter().map(|line| f(line).trim().to_string()).collect()
}

/// Collapse whitespace runs to a single space and trim
pub fn squeeze_whitespace(line: &str) -> String {
    line.split_whitespace().collect::<Vec<_>>().join(" ")
}
