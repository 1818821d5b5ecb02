//! Markdown → Telegram HTML.
//!
//! Telegram's HTML parse mode understands only a handful of tags:
//! `<b>`, `<i>`, `<s>`, `<code>`, `<pre>`, `<a href>` and `<blockquote>`.
//! Everything else is flattened to text.

use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag, TagEnd};

/// Convert agent Markdown into the HTML subset Telegram accepts.
pub fn markdown_to_html(text: &str) -> String {
    let parser = Parser::new_ext(text, Options::ENABLE_STRIKETHROUGH);

    let mut html = String::with_capacity(text.len() + 128);
    // Next item number for each open list; None for bullet lists.
    let mut lists: Vec<Option<u64>> = Vec::new();

    for event in parser {
        match event {
            Event::Start(tag) => match tag {
                Tag::Heading { .. } => html.push_str("<b>"),
                Tag::Strong => html.push_str("<b>"),
                Tag::Emphasis => html.push_str("<i>"),
                Tag::Strikethrough => html.push_str("<s>"),
                Tag::BlockQuote(_) => html.push_str("<blockquote>"),
                Tag::CodeBlock(CodeBlockKind::Fenced(lang)) if !lang.is_empty() => {
                    html.push_str(&format!(
                        "<pre><code class=\"language-{}\">",
                        escape(&lang)
                    ));
                }
                Tag::CodeBlock(_) => html.push_str("<pre><code>"),
                Tag::Link { dest_url, .. } => {
                    html.push_str(&format!("<a href=\"{}\">", escape(&dest_url)));
                }
                Tag::List(start) => lists.push(start),
                Tag::Item => {
                    let indent = "  ".repeat(lists.len().saturating_sub(1));
                    html.push_str(&indent);
                    match lists.last_mut() {
                        Some(Some(n)) => {
                            html.push_str(&format!("{n}. "));
                            *n += 1;
                        }
                        _ => html.push_str("• "),
                    }
                }
                _ => {}
            },
            Event::End(tag) => match tag {
                TagEnd::Heading(_) => html.push_str("</b>\n\n"),
                TagEnd::Paragraph => html.push_str("\n\n"),
                TagEnd::Strong => html.push_str("</b>"),
                TagEnd::Emphasis => html.push_str("</i>"),
                TagEnd::Strikethrough => html.push_str("</s>"),
                TagEnd::BlockQuote(_) => html.push_str("</blockquote>\n"),
                TagEnd::CodeBlock => html.push_str("</code></pre>\n\n"),
                TagEnd::Link => html.push_str("</a>"),
                TagEnd::Item => {
                    if !html.ends_with('\n') {
                        html.push('\n');
                    }
                }
                TagEnd::List(_) => {
                    lists.pop();
                    if lists.is_empty() {
                        html.push('\n');
                    }
                }
                _ => {}
            },
            Event::Text(t) => html.push_str(&escape(&t)),
            Event::Code(code) => {
                html.push_str("<code>");
                html.push_str(&escape(&code));
                html.push_str("</code>");
            }
            Event::SoftBreak | Event::HardBreak => html.push('\n'),
            Event::Rule => html.push_str("———\n\n"),
            Event::Html(raw) | Event::InlineHtml(raw) => html.push_str(&escape(&raw)),
            _ => {}
        }
    }

    html.trim().to_string()
}

/// Escape the three characters Telegram's HTML mode treats specially.
pub fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
