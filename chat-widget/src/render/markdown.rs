//! A deliberately small markdown subset rendered into a typed node tree.
//!
//! The tree never carries markup: text is text, and the only URLs that
//! survive are absolute http(s) links. Escaping happens once, at display.

use crate::security::events::{SecurityEvent, SecurityEventKind, SecurityEventSink};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::sync::Arc;
use url::Url;

static LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\]]+)\]\(([^)]+)\)").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DisplayNode {
    Header { level: u8, text: String },
    Paragraph { inline: Vec<InlineNode> },
    ListItem { inline: Vec<InlineNode> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InlineNode {
    Text { text: String },
    Bold { text: String },
    Link { text: String, url: String },
}

impl InlineNode {
    pub fn text(text: impl Into<String>) -> Self {
        InlineNode::Text { text: text.into() }
    }

    pub fn bold(text: impl Into<String>) -> Self {
        InlineNode::Bold { text: text.into() }
    }

    pub fn link(text: impl Into<String>, url: impl Into<String>) -> Self {
        InlineNode::Link {
            text: text.into(),
            url: url.into(),
        }
    }
}

/// Renders bot replies. Rejected link targets are reported to the sink.
#[derive(Clone, Default)]
pub struct MarkdownRenderer {
    sink: Option<Arc<dyn SecurityEventSink>>,
}

impl MarkdownRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn SecurityEventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn render(&self, text: &str) -> Vec<DisplayNode> {
        let mut nodes = Vec::new();

        for line in text.lines() {
            if line.trim().is_empty() {
                continue;
            }

            if let Some((level, rest)) = header(line) {
                nodes.push(DisplayNode::Header {
                    level,
                    text: rest.to_string(),
                });
            } else if let Some(rest) = line.strip_prefix("- ") {
                if rest.trim().is_empty() {
                    continue;
                }
                nodes.push(DisplayNode::ListItem {
                    inline: self.inline(rest),
                });
            } else {
                nodes.push(DisplayNode::Paragraph {
                    inline: self.inline(line),
                });
            }
        }

        nodes
    }

    /// Bold spans are found first; links are only recognised outside them.
    fn inline(&self, text: &str) -> Vec<InlineNode> {
        let mut out = Vec::new();
        let mut rest = text;

        while let Some(open) = rest.find("**") {
            let after_open = &rest[open + 2..];
            let Some(close) = after_open.find("**") else {
                break;
            };
            let inner = &after_open[..close];
            if inner.is_empty() {
                self.links(&rest[..open + 4], &mut out);
            } else {
                self.links(&rest[..open], &mut out);
                out.push(InlineNode::bold(inner));
            }
            rest = &after_open[close + 2..];
        }
        self.links(rest, &mut out);

        coalesce(out)
    }

    fn links(&self, segment: &str, out: &mut Vec<InlineNode>) {
        let mut last = 0;
        for caps in LINK.captures_iter(segment) {
            let (Some(whole), Some(label), Some(target)) = (caps.get(0), caps.get(1), caps.get(2))
            else {
                continue;
            };
            let Some(href) = safe_url(target.as_str()) else {
                self.report_rejected_url(target.as_str());
                continue;
            };
            if whole.start() > last {
                out.push(InlineNode::text(&segment[last..whole.start()]));
            }
            out.push(InlineNode::link(label.as_str(), href));
            last = whole.end();
        }
        if last < segment.len() {
            out.push(InlineNode::text(&segment[last..]));
        }
    }

    fn report_rejected_url(&self, target: &str) {
        if let Some(sink) = &self.sink {
            sink.record(&SecurityEvent::new(
                SecurityEventKind::UrlValidationFailed,
                target,
            ));
        }
    }
}

/// Render with no event reporting.
pub fn render(text: &str) -> Vec<DisplayNode> {
    MarkdownRenderer::new().render(text)
}

/// The href for a link target, or `None` unless it parses as an absolute
/// http or https URL.
///
/// The href is the parsed URL, so it is exactly what was checked. The root
/// slash the parser adds to a bare host is left off.
pub fn safe_url(candidate: &str) -> Option<String> {
    let candidate = candidate.trim();
    let url = Url::parse(candidate).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }

    let href = url.as_str();
    let bare_host = url.path() == "/"
        && url.query().is_none()
        && url.fragment().is_none()
        && !candidate.ends_with('/');
    match href.strip_suffix('/') {
        Some(trimmed) if bare_host => Some(trimmed.to_string()),
        _ => Some(href.to_string()),
    }
}

fn header(line: &str) -> Option<(u8, &str)> {
    if let Some(rest) = line.strip_prefix("### ") {
        Some((3, rest))
    } else if let Some(rest) = line.strip_prefix("## ") {
        Some((2, rest))
    } else {
        line.strip_prefix("# ").map(|rest| (1, rest))
    }
}

fn coalesce(nodes: Vec<InlineNode>) -> Vec<InlineNode> {
    let mut out: Vec<InlineNode> = Vec::with_capacity(nodes.len());
    for node in nodes {
        if let InlineNode::Text { text } = &node {
            if text.is_empty() {
                continue;
            }
            if let Some(InlineNode::Text { text: prev }) = out.last_mut() {
                prev.push_str(text);
                continue;
            }
        }
        out.push(node);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn paragraph(inline: Vec<InlineNode>) -> DisplayNode {
        DisplayNode::Paragraph { inline }
    }

    #[test]
    fn headers_by_level() {
        assert_eq!(
            render("## Title"),
            vec![DisplayNode::Header {
                level: 2,
                text: "Title".to_string()
            }]
        );
        assert_eq!(
            render("# A\n### C"),
            vec![
                DisplayNode::Header {
                    level: 1,
                    text: "A".to_string()
                },
                DisplayNode::Header {
                    level: 3,
                    text: "C".to_string()
                },
            ]
        );
    }

    #[test]
    fn bold_then_link() {
        assert_eq!(
            render("**bold** and [a](https://e.com)"),
            vec![paragraph(vec![
                InlineNode::bold("bold"),
                InlineNode::text(" and "),
                InlineNode::link("a", "https://e.com"),
            ])]
        );
    }

    #[test]
    fn link_href_is_the_parsed_url() {
        assert_eq!(
            render("[x](https:e.com)"),
            vec![paragraph(vec![InlineNode::link("x", "https://e.com")])]
        );
        assert_eq!(
            render("[x]( HTTPS://E.com/a b?q=1 )"),
            vec![paragraph(vec![InlineNode::link("x", "https://e.com/a%20b?q=1")])]
        );
        assert_eq!(safe_url("https://e.com/").as_deref(), Some("https://e.com/"));
        assert_eq!(safe_url("http://e.com:80/x").as_deref(), Some("http://e.com/x"));
        assert_eq!(safe_url("https:/\t/e.com"), safe_url("https://e.com"));
        assert_eq!(safe_url("mailto:a@e.com"), None);
    }

    #[test]
    fn unsafe_links_stay_literal() {
        assert_eq!(
            render("[x](javascript:alert(1))"),
            vec![paragraph(vec![InlineNode::text("[x](javascript:alert(1))")])]
        );
        assert_eq!(
            render("see [file](ftp://host/f) now"),
            vec![paragraph(vec![InlineNode::text("see [file](ftp://host/f) now")])]
        );
        assert_eq!(
            render("[rel](/relative/path)"),
            vec![paragraph(vec![InlineNode::text("[rel](/relative/path)")])]
        );
    }

    #[test]
    fn blank_lines_produce_nothing() {
        assert!(render("").is_empty());
        assert!(render("\n\n   \n").is_empty());
        assert_eq!(render("one\n\ntwo").len(), 2);
    }

    #[test]
    fn list_items() {
        assert_eq!(
            render("- first\n- **second**"),
            vec![
                DisplayNode::ListItem {
                    inline: vec![InlineNode::text("first")]
                },
                DisplayNode::ListItem {
                    inline: vec![InlineNode::bold("second")]
                },
            ]
        );
    }

    #[test]
    fn markup_is_kept_as_text() {
        assert_eq!(
            render("<b>hi</b> & bye"),
            vec![paragraph(vec![InlineNode::text("<b>hi</b> & bye")])]
        );
    }

    #[test]
    fn unclosed_and_empty_bold_are_literal() {
        assert_eq!(
            render("**open ended"),
            vec![paragraph(vec![InlineNode::text("**open ended")])]
        );
        assert_eq!(
            render("a **** b"),
            vec![paragraph(vec![InlineNode::text("a **** b")])]
        );
    }

    #[test]
    fn links_inside_bold_are_not_links() {
        assert_eq!(
            render("**[a](https://e.com)**"),
            vec![paragraph(vec![InlineNode::bold("[a](https://e.com)")])]
        );
    }

    #[test]
    fn crlf_lines_are_split() {
        assert_eq!(render("# T\r\nbody").len(), 2);
    }

    #[test]
    fn nodes_serialize_with_a_type_tag() {
        let json = serde_json::to_value(render("**b**")).unwrap();
        assert_eq!(json[0]["type"], "paragraph");
        assert_eq!(json[0]["inline"][0]["type"], "bold");
        assert_eq!(json[0]["inline"][0]["text"], "b");
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<SecurityEventKind>>);

    impl SecurityEventSink for Recorder {
        fn record(&self, event: &SecurityEvent) {
            self.0.lock().unwrap().push(event.kind);
        }
    }

    #[test]
    fn rejected_links_are_reported() {
        let recorder = Arc::new(Recorder::default());
        let renderer = MarkdownRenderer::new().with_event_sink(recorder.clone());
        renderer.render("[ok](https://e.com) [bad](data:text/html,x)");
        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec![SecurityEventKind::UrlValidationFailed]
        );
    }
}
