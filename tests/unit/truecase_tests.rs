/*!
 * Tests for the truecase dictionary and the truecase step
 */

use mtworker::database::TruecaseDictionary;
use mtworker::language_utils::LanguagePair;
use mtworker::translation::pipeline::{Pipeline, StepContext, StepSpec};

use crate::common;

const FREQUENCIES: &str = "Panama (5/6) panama (1/6)\nschön (9/10) Schön (1/10)\nOh (2/3) oh (1/3)\n";

/// Rebuilding from the same source opens the existing database with identical lookups
#[test]
fn test_openOrBuild_twice_shouldBeIdempotent() {
    let dir = common::create_temp_dir().unwrap();
    let source = common::create_test_file(dir.path(), "truecase-model.de", FREQUENCIES).unwrap();

    let first = TruecaseDictionary::open_or_build(&source).unwrap();
    let words = ["panama", "Panama", "schön", "Schön", "oh", "unbekannt"];
    let first_lookups: Vec<Option<String>> = words.iter().map(|w| first.canonical_form(w).unwrap()).collect();
    drop(first);

    let modified = std::fs::metadata(source.with_extension("de.db")).unwrap().modified().unwrap();

    let second = TruecaseDictionary::open_or_build(&source).unwrap();
    assert!(second.is_read_only());
    let second_lookups: Vec<Option<String>> = words.iter().map(|w| second.canonical_form(w).unwrap()).collect();

    assert_eq!(first_lookups, second_lookups);
    assert_eq!(first_lookups[0], Some("Panama".to_string()));
    assert_eq!(
        std::fs::metadata(second.path()).unwrap().modified().unwrap(),
        modified
    );
}

/// Sentence-initial words map through the dictionary; sentence ends reset that behaviour
#[tokio::test]
async fn test_truecaseStep_shouldRestoreCaseAtSentenceStarts() {
    let dir = common::create_temp_dir().unwrap();
    common::create_test_file(dir.path(), "truecase-model.de", FREQUENCIES).unwrap();

    let context = StepContext::new(dir.path(), LanguagePair::new("de", "en"));
    let specs = vec![StepSpec::new("truecase").with_parameter("model", "truecase-model.{src}")];
    let pipeline = Pipeline::new("preprocess", &specs, &context).unwrap();

    let output = pipeline
        .run(vec![
            "oh wie schön ist panama .".to_string(),
            "OH wie Schön ! panama ?".to_string(),
        ])
        .await
        .unwrap();

    assert_eq!(output[0], "Oh wie schön ist panama .");
    assert_eq!(output[1], "Oh wie Schön ! Panama ?");
}

#[test]
fn test_resolvePaths_shouldPairSourceAndDatabase() {
    let (source, db) = TruecaseDictionary::resolve_paths(std::path::Path::new("/m/truecase-model.de"));
    assert_eq!(source, std::path::PathBuf::from("/m/truecase-model.de"));
    assert_eq!(db, std::path::PathBuf::from("/m/truecase-model.de.db"));
}
