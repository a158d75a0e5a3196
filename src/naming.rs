//! Output file naming: stem/extension splitting and rename templates.
//!
//! ## Templates
//!
//! A rename template is plain text with two placeholders:
//!
//! - `{originalName}` — the current file name without its extension
//! - `{index}` — the image's index (see [`crate::operations::rename`])
//!
//! `{{` and `}}` stand for literal braces.
//!
//! The extension of the current file name is always carried over, so the
//! output keeps its container format:
//!
//! - `"{originalName}_{index}"` on `cat.png`, index 3 → `cat_3.png`
//! - `"IMG_{index}"` on `cat.png`, index 3 → `IMG_3.png`
//! - [`custom_template`]`("Trip")` → `"Trip_{index}"` → `Trip_3.png`

use thiserror::Error;

/// Default template: original stem, underscore, index.
pub const ORIGINAL_INDEX_TEMPLATE: &str = "{originalName}_{index}";

/// Camera-style template.
pub const IMG_INDEX_TEMPLATE: &str = "IMG_{index}";

/// Base name used by [`custom_template`] when the supplied text is blank.
pub const DEFAULT_CUSTOM_TEXT: &str = "Image";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("rename template is empty")]
    Empty,
    #[error("rename template has unknown placeholder {{{0}}}")]
    UnknownPlaceholder(String),
    #[error("rename template has an unclosed '{{'")]
    Unclosed,
    #[error("rename template must contain {{originalName}} or {{index}}")]
    NoPlaceholder,
    #[error("rename template must not contain path separators")]
    PathSeparator,
}

/// Split a file name into stem and extension (with its leading dot).
///
/// Follows `std::path` rules: `"a.tar.gz"` → `("a.tar", ".gz")`,
/// `".hidden"` → `(".hidden", "")`, `"README"` → `("README", "")`.
pub fn split_file_name(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(0) | None => (name, ""),
        Some(pos) => name.split_at(pos),
    }
}

/// `"<text>_{index}"`, falling back to [`DEFAULT_CUSTOM_TEXT`] for blank text.
///
/// Braces in `text` are escaped and come out literally. Path separators are
/// still rejected when the template is parsed.
pub fn custom_template(text: &str) -> String {
    let text = text.trim();
    let base = if text.is_empty() {
        DEFAULT_CUSTOM_TEXT
    } else {
        text
    };
    let escaped = base.replace('{', "{{").replace('}', "}}");
    format!("{escaped}_{{index}}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    OriginalName,
    Index,
}

/// A parsed, validated rename template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameTemplate {
    source: String,
    parts: Vec<Part>,
}

impl RenameTemplate {
    pub fn parse(template: &str) -> Result<Self, TemplateError> {
        if template.trim().is_empty() {
            return Err(TemplateError::Empty);
        }
        if template.contains(['/', '\\']) {
            return Err(TemplateError::PathSeparator);
        }

        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut rest = template;
        while let Some(pos) = rest.find(['{', '}']) {
            literal.push_str(&rest[..pos]);
            let after = &rest[pos + 1..];
            if rest[pos..].starts_with('}') {
                // `}}` and a lone `}` are both a literal brace.
                literal.push('}');
                rest = after.strip_prefix('}').unwrap_or(after);
                continue;
            }
            if let Some(escaped) = after.strip_prefix('{') {
                literal.push('{');
                rest = escaped;
                continue;
            }
            let close = after.find('}').ok_or(TemplateError::Unclosed)?;
            let placeholder = match &after[..close] {
                "originalName" => Part::OriginalName,
                "index" => Part::Index,
                other => return Err(TemplateError::UnknownPlaceholder(other.to_string())),
            };
            if !literal.is_empty() {
                parts.push(Part::Literal(std::mem::take(&mut literal)));
            }
            parts.push(placeholder);
            rest = &after[close + 1..];
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            parts.push(Part::Literal(literal));
        }

        if !parts.iter().any(|p| !matches!(p, Part::Literal(_))) {
            return Err(TemplateError::NoPlaceholder);
        }
        Ok(Self {
            source: template.to_string(),
            parts,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Render a new file name for `current` (extension preserved).
    pub fn render(&self, current: &str, index: u64) -> String {
        let (stem, ext) = split_file_name(current);
        let mut out = String::with_capacity(self.source.len() + current.len());
        for part in &self.parts {
            match part {
                Part::Literal(text) => out.push_str(text),
                Part::OriginalName => out.push_str(stem),
                Part::Index => out.push_str(&index.to_string()),
            }
        }
        out.push_str(ext);
        out
    }
}
