use ammonia::Builder;
use chrono::{ DateTime, Utc };
use std::collections::HashSet;

use crate::mail::RawMessage;

// The whitespace collapse below removes line wrapping again, so this
// only affects where html2text breaks lines internally.
const TEXT_WRAP_WIDTH: usize = 130;

#[derive(Debug, Clone)]
pub struct NormalizedEmail {
    pub from: String,
    pub subject: String,
    pub date: DateTime<Utc>,
    pub body_html: String,
    pub body_text: String,
}

/// Allow-list HTML policy for stored message bodies. Built once and
/// shared; the document store only ever sees HTML that went through it.
pub struct SanitizePolicy {
    builder: Builder<'static>,
}

impl SanitizePolicy {
    pub fn new() -> Self {
        let mut builder = Builder::default();
        builder
            .add_tags(["img"])
            .url_schemes(HashSet::from(["http", "https", "mailto"]))
            .add_tag_attributes("a", ["href", "name", "target"])
            .add_tag_attributes("img", ["src", "alt", "title", "width", "height"])
            .add_generic_attributes(["style"]);
        Self { builder }
    }

    pub fn clean(&self, html: &str) -> String {
        self.builder.clean(html).to_string()
    }
}

impl Default for SanitizePolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Pure and infallible: malformed input yields a best-effort document,
/// missing headers get defaults, and `body_text` never contains markup.
pub fn normalize(policy: &SanitizePolicy, raw: &RawMessage) -> NormalizedEmail {
    let body_html = policy.clean(&raw.body_html);
    let body_text = html_to_text(&body_html);

    NormalizedEmail {
        from: raw.from.clone().unwrap_or_default(),
        subject: raw.subject.clone().unwrap_or_default(),
        date: raw.date.unwrap_or_else(Utc::now),
        body_html,
        body_text,
    }
}

fn html_to_text(html: &str) -> String {
    let rendered = html2text::from_read(html.as_bytes(), TEXT_WRAP_WIDTH).unwrap_or_default();
    rendered.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn raw(body_html: &str) -> RawMessage {
        RawMessage {
            uid: 1,
            from: Some("Alice <alice@example.com>".to_string()),
            subject: Some("hello".to_string()),
            date: Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()),
            body_html: body_html.to_string(),
        }
    }

    #[test]
    fn strips_script_and_style_entirely() {
        let policy = SanitizePolicy::new();
        let out = normalize(
            &policy,
            &raw("<p>hi</p><script>alert('x')</script><style>p{color:red}</style>")
        );
        assert!(!out.body_html.contains("<script"));
        assert!(!out.body_html.contains("alert"));
        assert!(!out.body_html.contains("<style"));
        assert!(out.body_html.contains("<p>hi</p>"));
    }

    #[test]
    fn keeps_img_with_allowed_attributes() {
        let policy = SanitizePolicy::new();
        let out = normalize(
            &policy,
            &raw("<img src=\"https://example.com/a.png\" alt=\"logo\" onerror=\"alert(1)\">")
        );
        assert!(out.body_html.contains("<img"));
        assert!(out.body_html.contains("src="));
        assert!(out.body_html.contains("alt="));
        assert!(!out.body_html.contains("onerror"));
    }

    #[test]
    fn drops_disallowed_uri_schemes() {
        let policy = SanitizePolicy::new();
        let out = normalize(&policy, &raw("<a href=\"javascript:alert(1)\">x</a>"));
        assert!(!out.body_html.contains("javascript:"));

        let ok = normalize(&policy, &raw("<a href=\"https://example.com\">x</a>"));
        assert!(ok.body_html.contains("https://example.com"));
    }

    #[test]
    fn body_text_has_no_markup_and_collapsed_whitespace() {
        let policy = SanitizePolicy::new();
        let out = normalize(&policy, &raw("<p>Fish &amp; chips</p>\n\n<p>tomorrow   at\tnoon</p>"));
        assert!(!out.body_text.contains('<'));
        assert!(out.body_text.contains("Fish & chips"));
        assert!(out.body_text.contains("tomorrow at noon"));
        assert_eq!(out.body_text, out.body_text.trim());
    }

    #[test]
    fn missing_headers_get_defaults() {
        let policy = SanitizePolicy::new();
        let out = normalize(&policy, &(RawMessage {
            uid: 9,
            from: None,
            subject: None,
            date: None,
            body_html: String::new(),
        }));
        assert_eq!(out.from, "");
        assert_eq!(out.subject, "");
        // date defaulted to "now", not some epoch sentinel
        assert!(out.date > Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    }
}
