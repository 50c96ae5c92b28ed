//! Sanitize creative markup before it touches the host page.
//!
//! This is a predictable, attribute-oriented transform rather than a full HTML
//! parser. Unknown tags (`<embed>`, `<object>`, `<svg>` ...) are left in place;
//! only executable content inside them is neutralized:
//!
//! 1. `<script>` elements are removed (repeated, bounded passes)
//! 2. inline event handler attributes (any `on<letter>...` name) are dropped
//! 3. `href` values with a denylisted scheme become `#`, such `src`, `action`
//!    and `formaction` attributes are removed
//! 4. `style` values lose `expression(`, `javascript:`, `behavior:` and
//!    `url(...)` targets with a denylisted scheme
//! 5. a configured CSP nonce is stamped on remaining `<style>`/`<script>` tags
//!
//! Comments, declarations and processing instructions are dropped, end tags
//! lose their attributes, and `<` inside raw-text elements (`<style>`,
//! `<textarea>`, `<title>` ...) is escaped, so no markup can hide in a
//! construct the browser tokenizes differently. A final context-free pass
//! defangs any `on<name>=` left in text.

use crate::validate::{validate_csp_nonce, ValidationError, DANGEROUS_SCHEMES};
use base64::Engine;
use rand::RngCore;

/// Maximum script-stripping passes (catches `<scr<script></script>ipt>` tricks)
const MAX_SCRIPT_PASSES: usize = 5;

/// Tags the SDK may emit when it builds markup itself
pub const SAFE_TAGS: &[&str] = &[
    "a", "abbr", "acronym", "address", "area", "article", "aside", "audio",
    "b", "bdi", "bdo", "blockquote", "body", "br", "button",
    "canvas", "caption", "cite", "code", "col", "colgroup",
    "data", "datalist", "dd", "del", "details", "dfn", "dialog", "div", "dl", "dt",
    "em", "embed",
    "fieldset", "figcaption", "figure", "footer", "form",
    "h1", "h2", "h3", "h4", "h5", "h6", "head", "header", "hgroup", "hr", "html",
    "i", "iframe", "img", "input", "ins",
    "kbd",
    "label", "legend", "li", "link",
    "main", "map", "mark", "menu", "menuitem", "meta", "meter",
    "nav", "noscript",
    "object", "ol", "optgroup", "option", "output",
    "p", "param", "picture", "pre", "progress",
    "q",
    "rp", "rt", "ruby",
    "s", "samp", "section", "select", "small", "source", "span", "strong", "style",
    "sub", "summary", "sup",
    "table", "tbody", "td", "template", "textarea", "tfoot", "th", "thead", "time",
    "title", "tr", "track",
    "u", "ul",
    "var", "video",
    "wbr",
];

/// Attributes the SDK may emit when it builds markup itself
pub const SAFE_ATTRIBUTES: &[&str] = &[
    "abbr", "accept", "accept-charset", "accesskey", "action", "align", "alt", "async",
    "autocomplete", "autofocus", "autoplay", "autosave",
    "background", "bgcolor", "border", "buffered",
    "challenge", "charset", "checked", "cite", "class", "code", "codebase", "color",
    "cols", "colspan", "content", "contenteditable", "contextmenu", "controls", "coords",
    "data", "datetime", "default", "defer", "dir", "dirname", "disabled", "download",
    "draggable", "dropzone", "enctype",
    "for", "form", "formaction", "formenctype", "formmethod", "formnovalidate", "formtarget",
    "headers", "height", "hidden", "high", "href", "hreflang", "http-equiv",
    "icon", "id", "ismap", "itemprop",
    "keytype",
    "kind", "label", "lang", "language", "list", "loop", "low",
    "manifest", "max", "maxlength", "media", "method", "min", "multiple", "muted",
    "name", "novalidate",
    "open", "optimum",
    "pattern", "ping", "placeholder", "poster", "preload", "pubdate",
    "radiogroup", "readonly", "rel", "required", "reversed", "rows", "rowspan",
    "sandbox", "scope", "scoped", "seamless", "selected", "shape", "size", "sizes", "span",
    "spellcheck", "src", "srcdoc", "srclang", "srcset", "start", "step", "style", "summary",
    "tabindex", "target", "title", "type",
    "usemap",
    "value",
    "width", "wmode",
    "wrap",
];

/// Elements whose content the browser never parses as markup
const RAW_TEXT_ELEMENTS: &[&str] = &[
    "iframe", "noembed", "noframes", "noscript", "style", "textarea", "title", "xmp",
];

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta",
    "param", "source", "track", "wbr",
];

/// Creative sanitizer, optionally stamping a CSP nonce.
#[derive(Debug, Clone, Default)]
pub struct Sanitizer {
    nonce: Option<String>,
}

impl Sanitizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sanitizer that stamps `nonce` on surviving `<style>`/`<script>` tags.
    ///
    /// # Errors
    /// Returns an error if the nonce fails [`validate_csp_nonce`].
    pub fn with_nonce(nonce: &str) -> Result<Self, ValidationError> {
        validate_csp_nonce(nonce)?;
        Ok(Self {
            nonce: (!nonce.is_empty()).then(|| nonce.to_string()),
        })
    }

    pub fn nonce(&self) -> Option<&str> {
        self.nonce.as_deref()
    }

    /// Run the full pipeline over `html`. Never fails; empty in, empty out.
    pub fn sanitize(&self, html: &str) -> String {
        if html.is_empty() {
            return String::new();
        }

        let stripped = strip_script_tags(html);
        let rewritten = rewrite_tags(&stripped, self.nonce.as_deref());
        strip_inline_handlers(&rewritten)
    }
}

/// Sanitize `html` without a CSP nonce.
pub fn sanitize_html(html: &str) -> String {
    Sanitizer::new().sanitize(html)
}

/// Generate a random CSP nonce (URL-safe base64, always a valid nonce).
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

// ============================================================================
// Script elements
// ============================================================================

/// Remove every `<script>` element, then neutralize any opener a nested
/// construction could still leave behind after the bounded passes.
pub fn strip_script_tags(html: &str) -> String {
    let mut current = html.to_string();
    for _ in 0..MAX_SCRIPT_PASSES {
        let next = strip_script_pass(&current);
        if next.len() == current.len() {
            break;
        }
        current = next;
    }

    let lower = current.to_ascii_lowercase();
    if find_script_open(&lower, 0).is_none() {
        return current;
    }

    let mut out = String::with_capacity(current.len() + 8);
    let mut cursor = 0;
    while let Some(start) = find_script_open(&lower, cursor) {
        out.push_str(&current[cursor..start]);
        out.push_str("&lt;");
        cursor = start + 1;
    }
    out.push_str(&current[cursor..]);
    out
}

fn strip_script_pass(html: &str) -> String {
    let lower = html.to_ascii_lowercase();
    let mut out = String::with_capacity(html.len());
    let mut cursor = 0;

    while let Some(start) = find_script_open(&lower, cursor) {
        out.push_str(&html[cursor..start]);
        let body = start + "<script".len();
        // An unclosed script swallows the rest of the document, as a browser would
        cursor = match lower[body..].find("</script") {
            Some(offset) => {
                let close = body + offset;
                match lower[close..].find('>') {
                    Some(gt) => close + gt + 1,
                    None => html.len(),
                }
            }
            None => html.len(),
        };
    }

    out.push_str(&html[cursor..]);
    out
}

/// Position of the next `<script` that is a whole tag name (not `<scripts`).
fn find_script_open(lower: &str, from: usize) -> Option<usize> {
    let mut pos = from;
    while let Some(offset) = lower[pos..].find("<script") {
        let start = pos + offset;
        let after = start + "<script".len();
        match lower.as_bytes().get(after) {
            Some(b) if b.is_ascii_alphanumeric() || *b == b'_' => pos = after,
            _ => return Some(start),
        }
    }
    None
}

// ============================================================================
// Tag attributes
// ============================================================================

struct Attr<'a> {
    /// Whitespace (and stray `/`) before the attribute name
    lead: &'a str,
    /// The attribute exactly as written, without `lead`
    raw: &'a str,
    name: String,
    value: Option<AttrValue<'a>>,
}

struct AttrValue<'a> {
    quote: Option<char>,
    text: &'a str,
}

struct Tag<'a> {
    name: &'a str,
    attrs: Vec<Attr<'a>>,
    /// Everything after the last attribute, including `>` when present
    tail: &'a str,
    end: usize,
}

fn is_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r' | b'\x0c')
}

fn parse_tag(html: &str, start: usize) -> Tag<'_> {
    let bytes = html.as_bytes();
    let len = bytes.len();

    let name_start = start + 1;
    let mut pos = name_start;
    while pos < len && !is_space(bytes[pos]) && bytes[pos] != b'/' && bytes[pos] != b'>' {
        pos += 1;
    }
    let name = &html[name_start..pos];

    let mut attrs = Vec::new();
    loop {
        let lead_start = pos;
        while pos < len && (is_space(bytes[pos]) || bytes[pos] == b'/') {
            pos += 1;
        }

        if pos >= len || bytes[pos] == b'>' {
            let end = if pos < len { pos + 1 } else { len };
            return Tag {
                name,
                attrs,
                tail: &html[lead_start..end],
                end,
            };
        }

        let attr_start = pos;
        // Always consume at least one byte so `<a =x>` makes progress
        pos += 1;
        while pos < len
            && !is_space(bytes[pos])
            && !matches!(bytes[pos], b'/' | b'>' | b'=')
        {
            pos += 1;
        }
        let name = html[attr_start..pos].to_ascii_lowercase();

        let mut lookahead = pos;
        while lookahead < len && is_space(bytes[lookahead]) {
            lookahead += 1;
        }

        let mut value = None;
        if lookahead < len && bytes[lookahead] == b'=' {
            pos = lookahead + 1;
            while pos < len && is_space(bytes[pos]) {
                pos += 1;
            }

            if pos < len && (bytes[pos] == b'"' || bytes[pos] == b'\'') {
                let quote = bytes[pos];
                let text_start = pos + 1;
                let text_end = html[text_start..]
                    .find(quote as char)
                    .map(|i| text_start + i)
                    .unwrap_or(len);
                value = Some(AttrValue {
                    quote: Some(quote as char),
                    text: &html[text_start..text_end],
                });
                pos = (text_end + 1).min(len);
            } else {
                let text_start = pos;
                while pos < len && !is_space(bytes[pos]) && bytes[pos] != b'>' {
                    pos += 1;
                }
                value = Some(AttrValue {
                    quote: None,
                    text: &html[text_start..pos],
                });
            }
        }

        attrs.push(Attr {
            lead: &html[lead_start..attr_start],
            raw: &html[attr_start..pos],
            name,
            value,
        });
    }
}

/// Walk the markup the way the browser tokenizes it and neutralize every tag.
fn rewrite_tags(html: &str, nonce: Option<&str>) -> String {
    let lower = html.to_ascii_lowercase();
    let bytes = html.as_bytes();
    let mut out = String::with_capacity(html.len());
    let mut copied = 0;
    let mut pos = 0;

    while pos < bytes.len() {
        if bytes[pos] != b'<' {
            pos += 1;
            continue;
        }

        out.push_str(&html[copied..pos]);
        match bytes.get(pos + 1).copied() {
            Some(b) if b.is_ascii_alphabetic() => {
                let tag = parse_tag(html, pos);
                render_tag(&tag, nonce, &mut out);
                pos = tag.end;

                let name = tag.name.to_ascii_lowercase();
                let raw_end = if name == "plaintext" {
                    Some(bytes.len())
                } else if RAW_TEXT_ELEMENTS.contains(&name.as_str()) {
                    Some(find_end_tag(&lower, pos, &name).unwrap_or(bytes.len()))
                } else {
                    None
                };
                if let Some(raw_end) = raw_end {
                    out.push_str(&html[pos..raw_end].replace('<', "&lt;"));
                    pos = raw_end;
                }
            }
            Some(b'/') if bytes.get(pos + 2).is_some_and(|b| b.is_ascii_alphabetic()) => {
                // End tags are tokenized with attributes, which are then ignored
                let tag = parse_tag(html, pos + 1);
                if tag.tail.ends_with('>') {
                    out.push_str("</");
                    out.push_str(tag.name);
                    out.push('>');
                }
                pos = tag.end;
            }
            Some(b'!' | b'?' | b'/') => pos = markup_declaration_end(&lower, pos),
            _ => {
                out.push_str("&lt;");
                pos += 1;
            }
        }
        copied = pos;
    }

    out.push_str(&html[copied..]);
    out
}

/// End of a comment (`<!-- -->`), declaration, processing instruction or
/// bogus end tag starting at `start`. Never later than where a browser ends it.
fn markup_declaration_end(lower: &str, start: usize) -> usize {
    if lower[start..].starts_with("<!--") {
        // `<!-->` and `<!--->` close immediately
        let body = start + 2;
        return ["-->", "--!>"]
            .iter()
            .filter_map(|close| lower[body..].find(close).map(|i| body + i + close.len()))
            .min()
            .unwrap_or(lower.len());
    }

    lower[start..]
        .find('>')
        .map_or(lower.len(), |i| start + i + 1)
}

/// Position of the `</name` that closes a raw-text element.
fn find_end_tag(lower: &str, from: usize, name: &str) -> Option<usize> {
    let needle = format!("</{}", name);
    let mut pos = from;
    while let Some(offset) = lower[pos..].find(&needle) {
        let start = pos + offset;
        let after = start + needle.len();
        match lower.as_bytes().get(after) {
            Some(&b) if is_space(b) || b == b'/' || b == b'>' => return Some(start),
            _ => pos = after,
        }
    }
    None
}

fn render_tag(tag: &Tag<'_>, nonce: Option<&str>, out: &mut String) {
    out.push('<');
    out.push_str(tag.name);

    let tag_name = tag.name.to_ascii_lowercase();
    let stamp = nonce.filter(|_| tag_name == "style" || tag_name == "script");
    if let Some(nonce) = stamp {
        out.push_str(&format!(" nonce=\"{}\"", nonce));
    }

    for attr in &tag.attrs {
        if is_event_handler(&attr.name) || (stamp.is_some() && attr.name == "nonce") {
            continue;
        }

        match (attr.name.as_str(), &attr.value) {
            ("href" | "xlink:href", Some(value)) if has_dangerous_scheme(value.text) => {
                out.push_str(attr.lead);
                out.push_str(&attr.name);
                out.push_str("=\"#\"");
            }
            ("src" | "action" | "formaction", Some(value)) if has_dangerous_scheme(value.text) => {}
            ("style", Some(value)) => {
                let style = sanitize_style_attribute(value.text);
                if !style.is_empty() {
                    let quote = value.quote.unwrap_or('"');
                    out.push_str(attr.lead);
                    out.push_str("style=");
                    out.push(quote);
                    if quote == '"' {
                        out.push_str(&style.replace('"', "&quot;"));
                    } else {
                        out.push_str(&style);
                    }
                    out.push(quote);
                }
            }
            _ => {
                out.push_str(attr.lead);
                out.push_str(attr.raw);
            }
        }
    }

    out.push_str(tag.tail);
}

/// `on` followed by a letter: the shape of every inline event handler.
fn is_event_handler(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() > 2 && bytes[..2].eq_ignore_ascii_case(b"on") && bytes[2].is_ascii_alphabetic()
}

/// Span of the next `on<letters>\s*=` that follows whitespace, `/` or a quote,
/// as `(name_start, after_equals)`.
fn find_inline_handler(lower: &str, from: usize) -> Option<(usize, usize)> {
    let bytes = lower.as_bytes();
    let mut pos = from;
    while let Some(offset) = lower[pos..].find("on") {
        let start = pos + offset;
        pos = start + 2;

        let separated = start > 0
            && (is_space(bytes[start - 1]) || matches!(bytes[start - 1], b'/' | b'"' | b'\''));
        if !separated {
            continue;
        }

        let mut end = start + 2;
        while end < bytes.len() && bytes[end].is_ascii_alphabetic() {
            end += 1;
        }
        if end == start + 2 {
            continue;
        }
        while end < bytes.len() && is_space(bytes[end]) {
            end += 1;
        }
        if bytes.get(end) == Some(&b'=') {
            return Some((start, end + 1));
        }
    }
    None
}

/// Remove every `on<name>=` assignment regardless of context. Only the name
/// and `=` go, so quoting and tag structure are left as they were.
fn strip_inline_handlers(html: &str) -> String {
    let mut current = html.to_string();
    loop {
        let lower = current.to_ascii_lowercase();
        let mut out = String::with_capacity(current.len());
        let mut cursor = 0;
        while let Some((start, end)) = find_inline_handler(&lower, cursor) {
            out.push_str(&current[cursor..start]);
            cursor = end;
        }

        if cursor == 0 {
            return current;
        }
        out.push_str(&current[cursor..]);
        // Removal can splice a new handler name together
        current = out;
    }
}

/// Decode the character references attackers use to hide a scheme
/// (`&#106;avascript:`, `javascript&colon;`).
fn decode_char_refs(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];

        let decoded = if let Some(num) = rest.strip_prefix("&#") {
            let (digits, radix, skip) = match num.strip_prefix(['x', 'X']) {
                Some(hex) => (
                    hex.chars().take_while(|c| c.is_ascii_hexdigit()).collect::<String>(),
                    16,
                    3,
                ),
                None => (
                    num.chars().take_while(|c| c.is_ascii_digit()).collect::<String>(),
                    10,
                    2,
                ),
            };
            u32::from_str_radix(&digits, radix)
                .ok()
                .and_then(char::from_u32)
                .map(|c| {
                    let mut consumed = skip + digits.len();
                    if rest[consumed..].starts_with(';') {
                        consumed += 1;
                    }
                    (c, consumed)
                })
        } else {
            let lower = rest.to_ascii_lowercase();
            [("&colon;", ':'), ("&tab;", '\t'), ("&newline;", '\n')]
                .iter()
                .find(|(name, _)| lower.starts_with(name))
                .map(|(name, c)| (*c, name.len()))
        };

        match decoded {
            Some((c, consumed)) => {
                out.push(c);
                rest = &rest[consumed..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }

    out.push_str(rest);
    out
}

/// True if the URL-ish value resolves to a denylisted scheme once entities,
/// whitespace and control characters are removed.
fn has_dangerous_scheme(value: &str) -> bool {
    let normalized: String = decode_char_refs(value)
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .take(32)
        .collect::<String>()
        .to_ascii_lowercase();
    DANGEROUS_SCHEMES
        .iter()
        .any(|scheme| normalized.starts_with(scheme))
}

// ============================================================================
// URL and style values
// ============================================================================

/// True for a non-empty URL without a denylisted scheme.
pub fn is_safe_url(url: &str) -> bool {
    !url.is_empty() && !has_dangerous_scheme(url)
}

/// `href` value: trimmed, or `#` when dangerous.
pub fn sanitize_href_attribute(href: &str) -> String {
    let trimmed = href.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    if !is_safe_url(trimmed) {
        return "#".to_string();
    }
    trimmed.to_string()
}

/// `src` value: trimmed, or empty when dangerous.
pub fn sanitize_src_attribute(src: &str) -> String {
    let trimmed = src.trim();
    if !is_safe_url(trimmed) {
        return String::new();
    }
    trimmed.to_string()
}

/// Strip dangerous CSS from a `style` attribute value.
pub fn sanitize_style_attribute(style: &str) -> String {
    let mut sanitized = rewrite_css_urls(style);
    for (word, terminator) in [("expression", '('), ("javascript", ':'), ("behavior", ':')] {
        sanitized = remove_css_construct(&sanitized, word, terminator);
    }
    sanitized.trim().to_string()
}

/// Remove every `word\s*terminator` occurrence, case-insensitively, until none
/// are left (removal can splice a new one together).
fn remove_css_construct(style: &str, word: &str, terminator: char) -> String {
    let mut current = style.to_string();
    loop {
        let lower = current.to_ascii_lowercase();
        let mut found = None;
        let mut from = 0;
        while let Some(offset) = lower[from..].find(word) {
            let start = from + offset;
            let after = &lower[start + word.len()..];
            let trimmed = after.trim_start();
            if trimmed.starts_with(terminator) {
                let end = start + word.len() + (after.len() - trimmed.len()) + 1;
                found = Some((start, end));
                break;
            }
            from = start + word.len();
        }

        match found {
            Some((start, end)) => current.replace_range(start..end, ""),
            None => return current,
        }
    }
}

/// Replace `url(...)` references with a denylisted scheme by `url(about:blank)`.
fn rewrite_css_urls(style: &str) -> String {
    let lower = style.to_ascii_lowercase();
    let mut out = String::with_capacity(style.len());
    let mut cursor = 0;
    let mut from = 0;

    while let Some(offset) = lower[from..].find("url") {
        let start = from + offset;
        let after = &lower[start + 3..];
        let trimmed = after.trim_start();
        if !trimmed.starts_with('(') {
            from = start + 3;
            continue;
        }

        let open = start + 3 + (after.len() - trimmed.len());
        let inner = &lower[open + 1..];
        let inner_trimmed = inner.trim_start();
        // A quoted target may itself contain ')'
        let search_from = match inner_trimmed.chars().next() {
            Some(quote @ ('\'' | '"')) => {
                let quote_at = open + 1 + (inner.len() - inner_trimmed.len());
                match lower[quote_at + 1..].find(quote) {
                    Some(i) => quote_at + 1 + i + 1,
                    None => break,
                }
            }
            _ => open,
        };
        let Some(close_offset) = lower[search_from..].find(')') else {
            break;
        };
        let close = search_from + close_offset;
        let target = style[open + 1..close]
            .trim()
            .trim_matches(|c| c == '\'' || c == '"');

        if !is_safe_url(target) {
            out.push_str(&style[cursor..start]);
            out.push_str("url(about:blank)");
            cursor = close + 1;
        }
        from = close + 1;
    }

    out.push_str(&style[cursor..]);
    out
}

// ============================================================================
// Markup built by the SDK itself
// ============================================================================

/// Escape text for use in HTML content or a double-quoted attribute.
pub fn escape_html(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Build an element from allowlisted parts.
///
/// Returns an empty string for a tag outside [`SAFE_TAGS`]. Attributes outside
/// [`SAFE_ATTRIBUTES`] are skipped; `href`, `src` and `style` values are
/// sanitized and every value is escaped. `content` goes through
/// [`sanitize_html`].
pub fn create_safe_element(tag_name: &str, attributes: &[(&str, &str)], content: &str) -> String {
    let tag = tag_name.to_ascii_lowercase();
    if !SAFE_TAGS.contains(&tag.as_str()) {
        return String::new();
    }

    let mut html = format!("<{}", tag);
    for (key, value) in attributes {
        let key = key.to_ascii_lowercase();
        if !SAFE_ATTRIBUTES.contains(&key.as_str()) {
            continue;
        }

        let value = match key.as_str() {
            "href" => sanitize_href_attribute(value),
            "src" => sanitize_src_attribute(value),
            "style" => sanitize_style_attribute(value),
            _ => value.to_string(),
        };

        if !value.is_empty() {
            html.push_str(&format!(" {}=\"{}\"", key, escape_html(&value)));
        }
    }
    html.push('>');

    if !content.is_empty() {
        html.push_str(&sanitize_html(content));
    }

    if !VOID_ELEMENTS.contains(&tag.as_str()) {
        html.push_str(&format!("</{}>", tag));
    }

    html
}

/// Heuristic check that markup carries no obvious executable content.
pub fn is_safe_html(html: &str) -> bool {
    let lower = html.to_ascii_lowercase();

    if find_script_open(&lower, 0).is_some() {
        return false;
    }

    if find_inline_handler(&lower, 0).is_some() {
        return false;
    }

    for attr in ["href", "src", "action"] {
        let mut from = 0;
        while let Some(offset) = lower[from..].find(attr) {
            let end = from + offset + attr.len();
            if let Some(value) = lower[end..].trim_start().strip_prefix('=') {
                let value = value.trim_start().trim_start_matches(['"', '\'']);
                if value.starts_with("javascript:") || value.starts_with("data:") {
                    return false;
                }
            }
            from = end;
        }
    }

    true
}
