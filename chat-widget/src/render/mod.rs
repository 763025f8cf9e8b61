pub mod markdown;
pub mod view;

pub use markdown::{safe_url, render, DisplayNode, InlineNode, MarkdownRenderer};
pub use view::{blocks, BlockView, InlineView, MessageView};
