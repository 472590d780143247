/*!
 * Regex-driven punctuation repairs.
 *
 * - [`PunctFix`]: repairs `word . next` sentence joins left by the decoder
 * - [`RegexRules`]: ordered pattern/replacement pairs (fix-quotes, split-dates,
 *   generic rules from the model directory)
 * - [`PunctuationNormalizer`]: Moses-style punctuation normalization
 */

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use unicode_normalization::UnicodeNormalization;

use crate::errors::ConfigError;

static BACKREFERENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\(\d+)").expect("valid backreference pattern"));

fn compile(pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(pattern).map_err(|e| ConfigError::InvalidParameter {
        parameter: "pattern".to_string(),
        message: e.to_string(),
    })
}

/// Convert a `\1`-style replacement into `regex` crate syntax
pub fn convert_replacement(replacement: &str) -> String {
    let escaped = replacement.replace('$', "$$");
    BACKREFERENCE.replace_all(&escaped, "$${$1}").into_owned()
}

/// Fix spacing and capitalization at sentence joins: ` .new` → `. New`
#[derive(Debug)]
pub struct PunctFix {
    pattern: Regex,
    quote: String,
}

impl PunctFix {
    /// `quote` is the quotation token emitted by the tokenizer
    pub fn new(quote: &str) -> Result<Self, ConfigError> {
        let pattern = compile(&format!(r"(\s)([.!?](?:\s*{})?)\s*(\w+)", regex::escape(quote)))?;
        Ok(Self {
            pattern,
            quote: quote.to_string(),
        })
    }

    pub fn apply(&self, line: &str) -> String {
        self.pattern
            .replace_all(line, |caps: &Captures| {
                let space = &caps[1];
                let mut punct = caps[2].to_string();
                let mut word = capitalize(&caps[3]);

                if let Some(stripped) = punct.strip_suffix(self.quote.as_str()) {
                    word = format!("{} {}", self.quote, word);
                    punct = stripped.trim().to_string();
                }
                format!("{}{}{}", punct, space, word)
            })
            .into_owned()
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Ordered pattern/replacement pairs
#[derive(Debug)]
pub struct RegexRules {
    rules: Vec<(Regex, String)>,
}

impl RegexRules {
    /// Compile pairs whose replacements use `\1` backreferences
    pub fn from_pairs(pairs: &[(String, String)]) -> Result<Self, ConfigError> {
        let rules = pairs
            .iter()
            .map(|(pattern, replacement)| Ok((compile(pattern)?, convert_replacement(replacement))))
            .collect::<Result<Vec<_>, ConfigError>>()?;
        Ok(Self { rules })
    }

    /// `" word "` → `"word"`
    pub fn fix_quotes() -> Result<Self, ConfigError> {
        Self::from_pairs(&[(r#"" (.*?) ""#.to_string(), r#""\1""#.to_string())])
    }

    /// Legacy date rewrite `1.2.2018` → `1 . 2 . 2018`
    pub fn split_dates() -> Result<Self, ConfigError> {
        Self::from_pairs(&[(r"(\d+)\.(\d+)\.(\d+)".to_string(), r"\1 . \2 . \3".to_string())])
    }

    pub fn apply(&self, line: &str) -> String {
        self.rules
            .iter()
            .fold(line.to_string(), |text, (pattern, replacement)| {
                pattern.replace_all(&text, replacement.as_str()).into_owned()
            })
    }
}

type ReplaceFn = fn(&Captures) -> String;

#[derive(Debug)]
enum Replacement {
    Template(String),
    Function(ReplaceFn),
}

/// Moses-style punctuation normalizer.
///
/// Input is NFKC-normalized first. Several rules reproduce long-standing
/// heuristics (quote/comma order, digit grouping, guillemets) exactly.
#[derive(Debug)]
pub struct PunctuationNormalizer {
    rules: Vec<(Regex, Replacement)>,
}

impl PunctuationNormalizer {
    pub fn new(language: &str, penn: bool) -> Result<Self, ConfigError> {
        let mut rules: Vec<(&str, Replacement)> = Vec::new();
        let mut literal = |pattern: &'static str, replacement: &str| {
            rules.push((pattern, Replacement::Template(replacement.to_string())));
        };

        literal(r"\r", "");
        literal("，", ",");
        literal("。 *", ". ");
        literal("、", ",");
        literal("”", "\"");
        literal("“", "\"");
        literal("∶", ":");
        literal("：", ":");
        literal("？", "?");
        literal("《", "\"");
        literal("》", "\"");
        literal("）", ")");
        literal("！", "!");
        literal("（", "(");
        literal("；", ";");
        literal("１", "\"");
        literal("」", "\"");
        literal("「", "\"");
        literal("０", "0");
        literal("３", "3");
        literal("２", "2");
        literal("５", "5");
        literal("６", "6");
        literal("９", "9");
        literal("７", "7");
        literal("８", "8");
        literal("４", "4");
        literal("． *", ". ");
        literal("～", "~");
        literal("’", "'");
        literal("…", "...");
        literal("━", "-");
        literal("〈", "<");
        literal("〉", ">");
        literal("【", "[");
        literal("】", "]");
        literal("％", "%");

        // parentheses: space after ')' unless punctuation follows
        literal(r" *\( *", " (");
        literal(r" *\) *([^.!:?;,]|$)", ") ${1}");
        literal(r" *\) +([.!:?;,])", ")${1}");

        literal(r"(\d) %", "${1}%");
        literal(r" ([:;])", "${1}");

        if !penn {
            literal("`", "'");
            literal("''", " \" ");
        }

        literal("[„“”]", "\"");
        literal("–", "-");
        literal("—", " - ");
        literal("´", "'");
        literal(r"(\p{L})[‘’](\p{L})", "${1}'${2}");
        literal("[‘‚’]", "\"");
        literal("''", "\"");
        literal("´´", "\"");
        literal("…", "...");

        rules.push((r"(\x{A0}*)«\x{A0}*", Replacement::Function(open_guillemet)));
        rules.push((r"\x{A0}*»(\x{A0}*)", Replacement::Function(close_guillemet)));

        let mut literal = |pattern: &'static str, replacement: &str| {
            rules.push((pattern, Replacement::Template(replacement.to_string())));
        };

        literal(r"\x{A0}%", "%");
        literal(r"nº\x{A0}", "nº ");
        literal(r"\x{A0}:", ":");
        literal(r"\x{A0}ºC", " ºC");
        literal(r"\x{A0}cm", " cm");
        literal(r"\x{A0}\?", "?");
        literal(r"\x{A0}!", "!");
        literal(r"\x{A0};", ";");
        literal(r",\x{A0}", ", ");

        match language {
            // American style: punctuation inside the quotes
            "en" => literal(r#""([,.]+)"#, "${1}\""),
            "cs" | "cz" => {}
            _ => {
                literal(r#",""#, "\",");
                literal(r#"(\.+)"(\s*[^<])"#, "\"${1}${2}");
            }
        }

        if matches!(language, "de" | "es" | "cz" | "cs" | "fr") {
            literal(r"(\d)\x{A0}(\d)", "${1},${2}");
        } else {
            literal(r"(\d)\x{A0}(\d)", "${1}.${2}");
        }

        literal(r"\s+", " ");

        let rules = rules
            .into_iter()
            .map(|(pattern, replacement)| Ok((compile(pattern)?, replacement)))
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self { rules })
    }

    pub fn apply(&self, line: &str) -> String {
        let normalized: String = line.nfkc().collect();
        let result = self.rules.iter().fold(normalized, |text, (pattern, replacement)| {
            match replacement {
                Replacement::Template(template) => pattern.replace_all(&text, template.as_str()).into_owned(),
                Replacement::Function(f) => pattern.replace_all(&text, |caps: &Captures| f(caps)).into_owned(),
            }
        });
        result.trim().to_string()
    }
}

fn open_guillemet(caps: &Captures) -> String {
    let quote = if caps[1].is_empty() { "\"" } else { " \"" };
    quote.to_string()
}

fn close_guillemet(caps: &Captures) -> String {
    let quote = if caps[1].is_empty() { "\"" } else { "\" " };
    quote.to_string()
}
