//! §4.2 Sanitizer: strict HTML cleanse and attribute/URL escaping, built on
//! `ammonia` (a teacher dependency, previously declared but unused in the
//! reference Tauri binary — it is exactly the allow-list HTML sanitizer
//! this component needs).
//!
//! Contract (§4.2, invariant 3 in §8): `sanitize(sanitize(x)) == sanitize(x)`;
//! sanitised output never contains `<script>`, `<style>`, `<iframe>`, any
//! `on*` attribute, or a `javascript:` URL substring.

use ammonia::Builder;
use std::borrow::Cow;
use std::collections::HashSet;

fn allowed_tags() -> HashSet<&'static str> {
    [
        "a", "abbr", "article", "aside", "b", "blockquote", "br", "button", "caption", "code",
        "col", "colgroup", "dd", "del", "details", "div", "dl", "dt", "em", "fieldset", "figcaption",
        "figure", "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "i", "img",
        "input", "label", "legend", "li", "main", "mark", "nav", "ol", "optgroup", "option", "p",
        "pre", "progress", "section", "select", "small", "span", "strong", "sub", "summary", "sup",
        "table", "tbody", "td", "textarea", "tfoot", "th", "thead", "time", "tr", "u", "ul",
    ]
    .into_iter()
    .collect()
}

fn allowed_generic_attributes() -> HashSet<&'static str> {
    [
        "class",
        "id",
        "name",
        "title",
        "role",
        "data-command",
        "data-slot",
        "data-script-panel-id",
        "data-state-key",
        "aria-label",
        "aria-hidden",
        "aria-live",
        "type",
        "value",
        "placeholder",
        "checked",
        "disabled",
        "required",
        "readonly",
        "selected",
        "multiple",
        "min",
        "max",
        "step",
        "maxlength",
        "pattern",
        "for",
        "alt",
        "colspan",
        "rowspan",
        "scope",
    ]
    .into_iter()
    .collect()
}

/// Tags whose content (not just the tag) must be dropped entirely: the
/// spec names these explicitly (§4.2: "Drops `<script>`, `<style>`,
/// `<iframe>`, SVG `<foreignObject>`").
fn clean_content_tags() -> HashSet<&'static str> {
    ["script", "style", "iframe", "foreignobject", "svg"]
        .into_iter()
        .collect()
}

fn is_javascript_scheme(value: &str) -> bool {
    let trimmed = value.trim();
    let lower = trimmed.to_ascii_lowercase();
    lower.starts_with("javascript:")
}

fn attribute_filter<'a>(element: &str, attribute: &str, value: &'a str) -> Option<Cow<'a, str>> {
    if (attribute == "href" || attribute == "src") && is_javascript_scheme(value) {
        return Some(Cow::Borrowed("#"));
    }
    // Belt-and-suspenders: ammonia already strips unknown attributes, but
    // an explicit on* rejection keeps the contract obvious and testable
    // independent of the allow-list above.
    if attribute.starts_with("on") {
        return None;
    }
    let _ = element;
    Some(Cow::Borrowed(value))
}

fn builder() -> Builder<'static> {
    let mut builder = Builder::default();
    builder
        .tags(allowed_tags())
        .clean_content_tags(clean_content_tags())
        .generic_attributes(allowed_generic_attributes())
        .link_rel(Some("noopener noreferrer"))
        .attribute_filter(attribute_filter);
    builder
}

/// Strict HTML cleanse. Idempotent (§8 invariant 3).
pub fn sanitize(html: &str) -> String {
    builder().clean(html).to_string()
}

/// Escapes `&<>"'` for inline interpolation into component templates
/// (§4.2: "used for every dynamic string interpolation in component
/// templates"). Distinct from `sanitize`, which cleans whole documents.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
