//! Markup capability: `{{ key }}` templating over HTML.

use super::{push_unique, Capability, CapabilityError, CapabilityInput, CapabilityOutput};
use crate::resource::ModuleKind;
use regex_lite::Regex;
use std::sync::OnceLock;

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_][\w.]*)\s*\}\}").expect("placeholder pattern is valid")
    })
}

fn reference_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"\b(?:src|href)\s*=\s*["'](\.\.?/[^"']+)["']"#).expect("reference pattern is valid")
    })
}

fn comment_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?s)<!--.*?-->").expect("comment pattern is valid"))
}

fn gap_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r">\s+<").expect("gap pattern is valid"))
}

/// Elements whose content is whitespace-sensitive.
fn preserved_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?is)<pre\b.*?</pre\s*>|<textarea\b.*?</textarea\s*>|<script\b.*?</script\s*>|<style\b.*?</style\s*>")
            .expect("preserved pattern is valid")
    })
}

/// Substitute `{{ key }}` placeholders from `data`. Dotted keys walk nested
/// objects; missing or null values render as an empty string.
#[must_use]
pub fn render(template: &str, data: &serde_json::Value) -> String {
    placeholder_pattern()
        .replace_all(template, |caps: &regex_lite::Captures<'_>| {
            let mut value = data;
            for part in caps[1].split('.') {
                match value.get(part) {
                    Some(next) => value = next,
                    None => return String::new(),
                }
            }
            match value {
                serde_json::Value::Null => String::new(),
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            }
        })
        .into_owned()
}

/// Relative `src` and `href` references in order of appearance.
#[must_use]
pub fn scan_references(html: &str) -> Vec<String> {
    let mut deps = Vec::new();
    for caps in reference_pattern().captures_iter(html) {
        push_unique(&mut deps, &caps[1]);
    }
    deps
}

/// Drop comments and whitespace between tags. The contents of `<pre>`,
/// `<textarea>`, `<script>` and `<style>` are kept verbatim.
#[must_use]
pub fn minify(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut last = 0;
    for block in preserved_pattern().find_iter(html) {
        out.push_str(&collapse(&html[last..block.start()], last > 0, true));
        out.push_str(block.as_str());
        last = block.end();
    }
    out.push_str(&collapse(&html[last..], last > 0, false));
    out.trim().to_string()
}

/// Minify markup between preserved blocks. Whitespace next to a block is
/// dropped only where it separates two tags.
fn collapse(segment: &str, after_block: bool, before_block: bool) -> String {
    let without_comments = comment_pattern().replace_all(segment, "");
    let collapsed = gap_pattern().replace_all(&without_comments, "><");
    let mut text: &str = &collapsed;
    if after_block && before_block && text.trim().is_empty() {
        return String::new();
    }
    if after_block && text.trim_start().starts_with('<') {
        text = text.trim_start();
    }
    if before_block && text.trim_end().ends_with('>') {
        text = text.trim_end();
    }
    text.to_string()
}

/// Built-in `markup` capability.
///
/// Options: `data` (object of template values), `minify` (bool).
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkupCapability;

impl Capability for MarkupCapability {
    fn name(&self) -> &str {
        "markup"
    }

    fn kind(&self) -> ModuleKind {
        ModuleKind::Markup
    }

    fn compile(&self, input: &CapabilityInput<'_>) -> Result<CapabilityOutput, CapabilityError> {
        let source = input.text()?;
        let data = input.options.get("data").unwrap_or(&serde_json::Value::Null);

        let mut html = render(source, data);
        let dependencies = scan_references(&html);
        if input.flag("minify") {
            html = minify(&html);
        }

        Ok(CapabilityOutput {
            code: html.into_bytes(),
            dependencies,
        })
    }
}
