/*!
 * Tests for pipeline steps and their orchestration
 */

use mtworker::errors::ConfigError;
use mtworker::language_utils::LanguagePair;
use mtworker::translation::pipeline::sentences::force_split;
use mtworker::translation::pipeline::{Pipeline, StepContext, StepSpec};

fn context() -> StepContext {
    StepContext::new("/tmp", LanguagePair::new("de", "en"))
}

fn per_line_pipeline() -> Pipeline {
    let specs = vec![
        StepSpec::new("normalize-unicode").with_parameter("form", "NFKC"),
        StepSpec::new("normalize-whitespace"),
        StepSpec::new("normalize-punctuation"),
        StepSpec::new("split-dates"),
        StepSpec::new("fix-quotes"),
        StepSpec::new("generic-regex")
            .with_parameter("pattern", "ß")
            .with_parameter("replacement", "ss"),
        StepSpec::new("de-subword-segment"),
    ];
    Pipeline::new("preprocess", &specs, &context()).unwrap()
}

/// Per-line steps never change the number or order of lines
#[tokio::test]
async fn test_run_withPerLineSteps_shouldPreserveLineCountAndOrder() {
    let pipeline = per_line_pipeline();
    assert!(pipeline.steps().iter().all(|step| step.is_per_line()));

    let batches: Vec<Vec<String>> = vec![
        vec![],
        vec![String::new()],
        vec!["Am 3.10.1990 war er „hier“ .".to_string()],
        vec![
            "  Straße   eins ".to_string(),
            String::new(),
            "zwei@@ teile".to_string(),
            "\u{FF21}\u{FF22} drei".to_string(),
            "\" vier \"".to_string(),
        ],
    ];

    for batch in batches {
        let output = pipeline.run(batch.clone()).await.unwrap();
        assert_eq!(output.len(), batch.len());

        // each line is processed independently, so order is preserved
        for (line, out) in batch.iter().zip(&output) {
            let single = pipeline.run(vec![line.clone()]).await.unwrap();
            assert_eq!(&single[0], out);
        }
    }
}

/// Sentence splitting with a maximum never yields an over-long sentence
#[tokio::test]
async fn test_splitSentences_withMaximum_shouldNeverExceedIt() {
    for max in 1..=6usize {
        let spec = StepSpec::new("split-sentences").with_parameter("max-sentence-length", max as u64);
        let pipeline = Pipeline::new("preprocess", &[spec], &context()).unwrap();

        let input = vec![
            "Das ist ein sehr langer Satz mit vielen Wörtern darin. Kurz!".to_string(),
            "eins zwei drei vier fünf sechs sieben acht neun zehn elf zwölf dreizehn".to_string(),
        ];
        let output = pipeline.run(input.clone()).await.unwrap();

        assert!(output.iter().all(|s| s.split_whitespace().count() <= max));

        let words_in: Vec<&str> = input.iter().flat_map(|s| s.split_whitespace()).collect();
        let words_out: Vec<&str> = output.iter().flat_map(|s| s.split_whitespace()).collect();
        assert_eq!(words_in, words_out);
    }
}

#[test]
fn test_forceSplit_shouldUseCeilingPieceCount() {
    let sentence = "a b c d e f g".to_string();
    let pieces = force_split(vec![sentence], 3);
    assert_eq!(pieces, vec!["a b c", "d e", "f g"]);
}

#[test]
fn test_new_withUnknownStepKind_shouldFailAtConstruction() {
    let specs = vec![StepSpec::new("normalize-whitespace"), StepSpec::new("translate-magic")];
    assert!(matches!(
        Pipeline::new("preprocess", &specs, &context()),
        Err(ConfigError::UnknownStepKind(kind)) if kind == "translate-magic"
    ));
}

#[test]
fn test_new_withMissingModelFile_shouldFailAtConstruction() {
    let root = tempfile::tempdir().unwrap();
    let context = StepContext::new(root.path(), LanguagePair::new("de", "en"));
    let specs = vec![StepSpec::new("truecase").with_parameter("model", "truecase-model.{src}")];

    assert!(matches!(
        Pipeline::new("preprocess", &specs, &context),
        Err(ConfigError::MissingFile(_))
    ));
}

#[test]
fn test_fromFile_withMissingFile_shouldFail() {
    let root = tempfile::tempdir().unwrap();
    let result = Pipeline::from_file("preprocess", &root.path().join("preprocess.json"), &context());
    assert!(result.is_err());
}

#[cfg(unix)]
#[tokio::test]
async fn test_run_withExternalCommand_shouldPipeThroughFilter() {
    let specs = vec![StepSpec::new("external-command").with_command("tr a-z A-Z")];
    let pipeline = Pipeline::new("preprocess", &specs, &context()).unwrap();
    let output = pipeline
        .run(vec!["hallo".to_string(), "welt".to_string()])
        .await
        .unwrap();
    assert_eq!(output, vec!["HALLO", "WELT"]);
}

/// A command turns any known step kind into an external filter
#[cfg(unix)]
#[tokio::test]
async fn test_run_withCommandOnLocalKind_shouldUseTheCommand() {
    let specs = vec![StepSpec::new("normalize-punctuation").with_command("tr a-z A-Z")];
    let pipeline = Pipeline::new("preprocess", &specs, &context()).unwrap();
    assert!(pipeline.steps()[0].is_external());

    let output = pipeline.run(vec!["„hallo“".to_string()]).await.unwrap();
    assert_eq!(output, vec!["„HALLO“"]);
}
