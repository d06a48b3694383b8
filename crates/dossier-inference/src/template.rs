//! Prompt templates with `{{ name }}` placeholders.

use std::collections::HashMap;

use regex::Regex;

use dossier_core::{Error, Result};

const PLACEHOLDER_PATTERN: &str = r"\{\{\s*([A-Za-z_][A-Za-z0-9_.]*)\s*\}\}";

/// A parsed prompt template.
#[derive(Debug, Clone)]
pub struct PromptText {
    source: String,
    pattern: Regex,
    placeholders: Vec<String>,
}

impl PromptText {
    /// Parse `source`, rejecting malformed placeholders.
    pub fn parse(source: &str) -> Result<Self> {
        let pattern = Regex::new(PLACEHOLDER_PATTERN)
            .map_err(|e| Error::Internal(format!("placeholder pattern: {}", e)))?;

        let placeholders: Vec<String> = pattern
            .captures_iter(source)
            .map(|caps| caps[1].to_string())
            .collect();

        if source.matches("{{").count() != placeholders.len() {
            return Err(Error::Template(
                "malformed placeholder: expected {{ name }}".to_string(),
            ));
        }

        Ok(Self {
            source: source.to_string(),
            pattern,
            placeholders,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Placeholder names in order of appearance.
    pub fn placeholders(&self) -> &[String] {
        &self.placeholders
    }

    /// Substitute every placeholder; an unknown name is an error.
    pub fn render(&self, vars: &HashMap<&str, String>) -> Result<String> {
        if let Some(missing) = self
            .placeholders
            .iter()
            .find(|name| !vars.contains_key(name.as_str()))
        {
            return Err(Error::Template(format!(
                "no value for placeholder {{{{ {} }}}}",
                missing
            )));
        }

        Ok(self
            .pattern
            .replace_all(&self.source, |caps: &regex::Captures| {
                vars.get(&caps[1]).cloned().unwrap_or_default()
            })
            .into_owned())
    }
}
