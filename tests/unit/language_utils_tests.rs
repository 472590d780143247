/*!
 * Tests for language code utilities
 */

use mtworker::errors::ConfigError;
use mtworker::language_utils::{LanguagePair, get_language_name, language_codes_match, normalize_to_part2t};

#[test]
fn test_normalizeToPart2t_withVariousCodes_shouldNormalize() {
    assert_eq!(normalize_to_part2t("de"), Some("deu".to_string()));
    assert_eq!(normalize_to_part2t("ger"), Some("deu".to_string()));
    assert_eq!(normalize_to_part2t("DEU"), Some("deu".to_string()));
    assert_eq!(normalize_to_part2t("german"), None);
}

#[test]
fn test_languageCodesMatch_acrossCodeFormats_shouldMatch() {
    assert!(language_codes_match("de", "deu"));
    assert!(language_codes_match("fre", "fr"));
    assert!(!language_codes_match("de", "en"));
    assert!(!language_codes_match("", "en"));
}

#[test]
fn test_getLanguageName_shouldReturnEnglishName() {
    assert_eq!(get_language_name("de"), Some("German".to_string()));
    assert_eq!(get_language_name("xx"), None);
}

#[test]
fn test_languagePair_parse_shouldRequireTwoIsoCodes() {
    let pair: LanguagePair = "DE-en".parse().unwrap();
    assert_eq!(pair.source, "de");
    assert_eq!(pair.target, "en");
    assert_eq!(pair.to_string(), "de-en");

    assert!(matches!("deu-eng".parse::<LanguagePair>(), Err(ConfigError::InvalidLanguagePair(_))));
    assert!(matches!("de".parse::<LanguagePair>(), Err(ConfigError::InvalidLanguagePair(_))));
}
