/*!
 * Integration tests for application lifecycle
 */

use anyhow::Result;
use serde_json::{Value, json};
use std::fs;

use mtworker::app_config::Config;
use mtworker::app_controller::Controller;
use mtworker::database::TruecaseDictionary;
use mtworker::task::TaskData;

use crate::common::{self, ReverseConnector};

fn remote_config(root: &std::path::Path) -> Config {
    let mut config = Config::new(root, "de-en");
    config.engine.url = Some("ws://localhost:9000/translate".to_string());
    config
}

/// A model directory with both pipelines loads and talks to a remote engine
#[test]
fn test_controller_withRemoteEngine_shouldInitialize() -> Result<()> {
    let root = common::create_temp_dir()?;
    common::create_test_model(root.path())?;

    let controller = Controller::with_config(remote_config(root.path()))?;

    assert!(!controller.manages_engine());
    assert_eq!(controller.session().source_language(), "de");
    assert_eq!(controller.session().target_language(), "en");
    Ok(())
}

/// A model without a postprocessing pipeline is refused at startup
#[test]
fn test_controller_withoutPostprocess_shouldFail() -> Result<()> {
    let root = common::create_temp_dir()?;
    let model = common::create_test_model(root.path())?;
    fs::remove_file(model.join("postprocess.json"))?;

    assert!(Controller::with_config(remote_config(root.path())).is_err());
    Ok(())
}

/// Model names that are not a language pair are refused before anything is loaded
#[test]
fn test_controller_withBadModelName_shouldFail() -> Result<()> {
    let root = common::create_temp_dir()?;
    common::create_test_model(root.path())?;

    let mut config = remote_config(root.path());
    config.model = "german".to_string();
    assert!(Controller::with_config(config).is_err());
    Ok(())
}

/// A task file runs through the whole handler and yields the reply
#[test]
fn test_runTask_withDocument_shouldAppendTargetInstance() -> Result<()> {
    let root = common::create_temp_dir()?;
    common::create_test_model(root.path())?;
    let controller = Controller::with_config(remote_config(root.path()))?.with_connector(ReverseConnector::new());

    let body = common::test_document("de", &["Guten Tag ."]).to_string();
    let reply = tokio_test::block_on(async { controller.run_task(body.as_bytes()).await })?;

    let TaskData::Document(document) = reply.result_data else {
        panic!("expected a document reply");
    };
    let document = serde_json::to_value(document)?;
    let instances = document["instances"].as_array().unwrap();
    assert_eq!(instances.len(), 2);
    assert_eq!(instances[1]["metadata"]["language"], "en");

    let words: Vec<&str> = instances[1]["body"]["sentences"][0]["tokens"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|t| t["token"]["token"].as_str())
        .collect();
    assert_eq!(words, vec![".", "Tag", "Guten"]);
    Ok(())
}

/// Plain text input is translated line by line and JSON input as a document
#[tokio::test]
async fn test_translateInput_shouldHandleTextAndDocuments() -> Result<()> {
    let root = common::create_temp_dir()?;
    common::create_test_model(root.path())?;
    let controller = Controller::with_config(remote_config(root.path()))?.with_connector(ReverseConnector::new());
    let mut translator = controller.translator().await?;

    let text = Controller::translate_input(translator.as_mut(), "eins zwei\n\ndrei vier", true).await?;
    assert_eq!(text, "zwei eins\n\nvier drei");

    let document = json!({"instances": [{"metadata": {"language": "de"}, "body": {"sentences": []}}]});
    let output = Controller::translate_input(translator.as_mut(), &document.to_string(), false).await?;
    let output: Value = serde_json::from_str(&output)?;
    assert_eq!(output["instances"].as_array().unwrap().len(), 2);
    Ok(())
}

/// The truecase database is built once next to its frequency list
#[test]
fn test_buildTruecase_shouldCreateDatabaseOnce() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let source = common::create_test_file(dir.path(), "truecase-model.de", "Haus (3/4) haus (1/4)\n")?;

    let db_path = Controller::build_truecase(&source)?;
    assert_eq!(db_path, dir.path().join("truecase-model.de.db"));
    assert!(db_path.exists());

    let again = Controller::build_truecase(&source)?;
    assert_eq!(again, db_path);

    let dictionary = TruecaseDictionary::open_or_build(&db_path)?;
    assert_eq!(dictionary.canonical_form("haus")?, Some("Haus".to_string()));
    Ok(())
}

/// A missing frequency list is reported
#[test]
fn test_buildTruecase_withMissingSource_shouldFail() {
    let dir = common::create_temp_dir().unwrap();
    assert!(Controller::build_truecase(&dir.path().join("truecase-model.xx")).is_err());
}
