/*!
 * Tests for job documents and the document codec
 */

use mtworker::translation::{Document, DocumentCodec};

use crate::common;

fn document(sentences: &[&str]) -> Document {
    serde_json::from_value(common::test_document("de", sentences)).unwrap()
}

/// Encoding extracted text keeps token texts and per-sentence token counts
#[test]
fn test_encodeExtract_withoutParagraphMarkers_shouldPreserveTokens() {
    let codec = DocumentCodec::default();
    let document = document(&["Das ist ein Test .", "Zweiter Satz", "Ein"]);
    let instance = &document.instances[0];

    let lines = codec.extract(instance);
    assert_eq!(lines, vec!["Das ist ein Test .", "Zweiter Satz", "Ein"]);

    let sentences = codec.encode_all(&lines);
    assert_eq!(sentences.len(), instance.body.sentences.len());
    for (original, encoded) in instance.body.sentences.iter().zip(&sentences) {
        assert_eq!(original.tokens.len(), encoded.tokens.len());
        assert!(original.words().eq(encoded.words()));
    }
}

#[test]
fn test_extract_withParagraphMarkers_shouldStartNewSegments() {
    let codec = DocumentCodec::default();
    let document = document(&["Erster Absatz <p> Zweiter Absatz", "<p> Dritter"]);

    let lines = codec.extract(&document.instances[0]);
    assert_eq!(lines, vec!["Erster Absatz", "Zweiter Absatz", "Dritter"]);
}

#[test]
fn test_encode_shouldNumberTokensFromZero() {
    let sentence = DocumentCodec::default().encode("  a  b c ");
    let offsets: Vec<usize> = sentence.tokens.iter().map(|t| t.token.offset).collect();
    assert_eq!(offsets, vec![0, 1, 2]);
}

/// Unknown fields survive a round trip through the document model
#[test]
fn test_document_shouldCarryUnknownFields() {
    let value = serde_json::json!({
        "id": "doc-7",
        "instances": [{
            "metadata": {"language": "de", "source": "feed"},
            "body": {"sentences": [], "title": "x"},
            "extra": true
        }]
    });
    let document: Document = serde_json::from_value(value.clone()).unwrap();
    assert_eq!(serde_json::to_value(&document).unwrap(), value);
}

#[test]
fn test_instancesIn_shouldMatchTwoAndThreeLetterCodes() {
    let document = document(&["Hallo"]);
    assert_eq!(document.instances_in("deu").count(), 1);
    assert_eq!(document.instances_in("de").count(), 1);
    assert_eq!(document.instances_in("en").count(), 0);
}
