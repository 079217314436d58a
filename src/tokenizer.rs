/// Normalizes raw log lines into token sequences for the pattern tree.
///
/// Rules are compiled once at construction, so a malformed pattern fails
/// there instead of on every line. Rules run in declaration order and each
/// one rewrites the output of the previous one.
use crate::error::{MinerError, MinerResult};
use crate::miner_config::{MinerConfig, TokenRule};
use crate::pattern_tree::WILDCARD;
use regex::Regex;

/// What a raw `<*>` token is rewritten to, keeping the marker reserved for the tree.
pub const ESCAPED_WILDCARD: &str = r"<\*>";

#[derive(Debug, Clone)]
struct CompiledRule {
    regex: Regex,
    label: String,
}

#[derive(Debug, Clone)]
pub struct Tokenizer {
    rules: Vec<CompiledRule>,
    max_tokens: usize,
}

impl Tokenizer {
    pub fn new(rules: &[TokenRule], max_tokens: usize) -> MinerResult<Self> {
        let rules = rules
            .iter()
            .map(|rule| {
                Regex::new(&rule.pattern)
                    .map(|regex| CompiledRule {
                        regex,
                        label: rule.label.clone(),
                    })
                    .map_err(|source| MinerError::InvalidPattern {
                        pattern: rule.pattern.clone(),
                        source,
                    })
            })
            .collect::<MinerResult<Vec<_>>>()?;

        Ok(Self { rules, max_tokens })
    }

    pub fn from_config(config: &MinerConfig) -> MinerResult<Self> {
        Self::new(&config.rules, config.max_tokens)
    }

    /// Apply every rule, split on whitespace and keep the first `max_tokens` tokens.
    pub fn tokenize(&self, line: &str) -> Vec<String> {
        let normalized = self.normalize(line);

        normalized
            .split_whitespace()
            .take(self.max_tokens)
            .map(|token| {
                if token == WILDCARD {
                    ESCAPED_WILDCARD.to_string()
                } else {
                    token.to_string()
                }
            })
            .collect()
    }

    /// Cumulative rewrite of `line` through all rules.
    pub fn normalize(&self, line: &str) -> String {
        let mut text = line.to_string();
        for rule in &self.rules {
            text = rule.regex.replace_all(&text, rule.label.as_str()).into_owned();
        }
        text
    }
}
