//! Template-facing projection of the node tree.
//!
//! Templates only see plain fields; every string is auto-escaped on output.

use super::markdown::{DisplayNode, InlineNode, MarkdownRenderer};
use crate::models::{Message, Sender};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InlineKind {
    Text,
    Bold,
    Link,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineView {
    pub kind: InlineKind,
    pub text: String,
    pub href: String,
}

impl InlineView {
    pub fn is_bold(&self) -> bool {
        self.kind == InlineKind::Bold
    }

    pub fn is_link(&self) -> bool {
        self.kind == InlineKind::Link
    }
}

impl From<&InlineNode> for InlineView {
    fn from(node: &InlineNode) -> Self {
        match node {
            InlineNode::Text { text } => InlineView {
                kind: InlineKind::Text,
                text: text.clone(),
                href: String::new(),
            },
            InlineNode::Bold { text } => InlineView {
                kind: InlineKind::Bold,
                text: text.clone(),
                href: String::new(),
            },
            InlineNode::Link { text, url } => InlineView {
                kind: InlineKind::Link,
                text: text.clone(),
                href: url.clone(),
            },
        }
    }
}

/// A block element. Lists carry their items in `items`, everything else in
/// `inline`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockView {
    pub tag: &'static str,
    pub inline: Vec<InlineView>,
    pub items: Vec<Vec<InlineView>>,
}

impl BlockView {
    pub fn is_list(&self) -> bool {
        self.tag == "ul"
    }

    fn leaf(tag: &'static str, inline: Vec<InlineView>) -> Self {
        Self {
            tag,
            inline,
            items: Vec::new(),
        }
    }
}

/// Consecutive list items are grouped under a single `ul`.
pub fn blocks(nodes: &[DisplayNode]) -> Vec<BlockView> {
    let mut out: Vec<BlockView> = Vec::new();

    for node in nodes {
        match node {
            DisplayNode::Header { level, text } => {
                let tag = match level {
                    1 => "h3",
                    2 => "h4",
                    _ => "h5",
                };
                let title = InlineView::from(&InlineNode::text(text.clone()));
                out.push(BlockView::leaf(tag, vec![title]));
            }
            DisplayNode::Paragraph { inline } => {
                out.push(BlockView::leaf("p", inline.iter().map(InlineView::from).collect()));
            }
            DisplayNode::ListItem { inline } => {
                let item: Vec<InlineView> = inline.iter().map(InlineView::from).collect();
                if out.last().is_some_and(BlockView::is_list) {
                    if let Some(list) = out.last_mut() {
                        list.items.push(item);
                    }
                } else {
                    out.push(BlockView {
                        tag: "ul",
                        inline: Vec::new(),
                        items: vec![item],
                    });
                }
            }
        }
    }

    out
}

/// One message bubble ready for the template.
#[derive(Debug, Clone)]
pub struct MessageView {
    pub id: String,
    pub sender: &'static str,
    pub is_bot: bool,
    pub is_error: bool,
    /// Plain text body, used for user messages and error bubbles.
    pub text: String,
    /// Rendered body of ordinary bot replies.
    pub blocks: Vec<BlockView>,
    pub time: String,
}

impl MessageView {
    pub fn new(message: &Message, renderer: &MarkdownRenderer) -> Self {
        let is_bot = message.sender == Sender::Bot;
        let rendered = is_bot && !message.is_error;
        Self {
            id: message.id.clone(),
            sender: message.sender.as_str(),
            is_bot,
            is_error: message.is_error,
            text: if rendered {
                String::new()
            } else {
                message.content.clone()
            },
            blocks: if rendered {
                blocks(&renderer.render(&message.content))
            } else {
                Vec::new()
            },
            time: message.timestamp.format("%H:%M").to_string(),
        }
    }

    pub fn is_rendered(&self) -> bool {
        self.is_bot && !self.is_error
    }
}
