//! Plain-text fallback for messages whose `text` is empty: Block Kit blocks first,
//! then legacy attachments.
//!
//! Everything is lowered to mention [`Segment`]s so user and channel references in
//! rich text go through the same batched label resolution as `<@U…>` markup.

use crate::core::models::{
    Block, ContextElement, Message, MessageAttachment, RichTextBlockElement, RichTextElement,
    TextObject,
};
use crate::utils::mentions::{Segment, parse};

/// Segments to display for a message.
#[must_use]
pub fn message_segments(message: &Message) -> Vec<Segment> {
    let text = parse(&message.text);
    if !is_blank(&text) {
        return text;
    }
    let blocks = blocks_segments(&message.blocks);
    if !is_blank(&blocks) {
        return blocks;
    }
    let attachments = attachments_segments(&message.attachments);
    if !is_blank(&attachments) {
        return attachments;
    }
    text
}

fn is_blank(segments: &[Segment]) -> bool {
    segments.iter().all(|segment| match segment {
        Segment::Text(text) | Segment::Verbatim(text) => text.trim().is_empty(),
        _ => false,
    })
}

fn text(s: impl Into<String>) -> Segment {
    Segment::Text(s.into())
}

/// Join non-blank parts with `separator`.
fn join(parts: Vec<Vec<Segment>>, separator: &str) -> Vec<Segment> {
    let mut out = Vec::new();
    for part in parts.into_iter().filter(|p| !is_blank(p)) {
        if !out.is_empty() {
            out.push(text(separator));
        }
        out.extend(part);
    }
    out
}

fn inline(element: &RichTextElement) -> Option<Segment> {
    Some(match element {
        RichTextElement::Text { text: t } => text(t.as_str()),
        RichTextElement::User { user_id } => Segment::User {
            id: user_id.clone(),
            label: None,
        },
        RichTextElement::Channel { channel_id } => Segment::Channel {
            id: channel_id.clone(),
            fallback: None,
        },
        RichTextElement::Link { url, text: Some(label) } if !label.is_empty() => {
            text(format!("{label} ({url})"))
        }
        RichTextElement::Link { url, .. } => Segment::Link {
            url: url.clone(),
            label: None,
        },
        RichTextElement::Emoji { name } => text(format!(":{name}:")),
        RichTextElement::Broadcast { range } => Segment::Broadcast(range.clone()),
        RichTextElement::Usergroup { usergroup_id } => Segment::Subteam {
            id: usergroup_id.clone(),
            label: None,
        },
        RichTextElement::Unsupported => return None,
    })
}

fn inlines(elements: &[RichTextElement]) -> Vec<Segment> {
    elements.iter().filter_map(inline).collect()
}

/// Prefix every line of the segments' literal text with `prefix`.
fn prefix_lines(segments: Vec<Segment>, prefix: &str) -> Vec<Segment> {
    let mut out = vec![text(prefix)];
    for segment in segments {
        match segment {
            Segment::Text(t) => out.push(Segment::Text(t.replace('\n', &format!("\n{prefix}")))),
            other => out.push(other),
        }
    }
    out
}

fn rich_text_element(element: &RichTextBlockElement) -> Vec<Segment> {
    match element {
        RichTextBlockElement::RichTextSection { elements } => inlines(elements),
        RichTextBlockElement::RichTextList {
            style,
            indent,
            elements,
        } => {
            let pad = "  ".repeat(usize::try_from(*indent).unwrap_or(0));
            let ordered = style.as_deref() == Some("ordered");
            let items = elements
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    let bullet = if ordered {
                        format!("{pad}{}. ", i + 1)
                    } else {
                        format!("{pad}- ")
                    };
                    let mut line = vec![text(bullet)];
                    line.extend(rich_text_element(item));
                    line
                })
                .collect();
            join(items, "\n")
        }
        RichTextBlockElement::RichTextQuote { elements } => prefix_lines(inlines(elements), "> "),
        RichTextBlockElement::RichTextPreformatted { elements } => {
            let mut out = vec![text("```\n")];
            out.extend(inlines(elements));
            out.push(text("\n```"));
            out
        }
        RichTextBlockElement::Unsupported => Vec::new(),
    }
}

fn text_object(object: Option<&TextObject>) -> Vec<Segment> {
    object.map(|o| parse(&o.text)).unwrap_or_default()
}

fn block(block: &Block) -> Vec<Segment> {
    match block {
        Block::RichText { elements } => join(elements.iter().map(rich_text_element).collect(), "\n"),
        Block::Section { text: body, fields } => {
            let mut parts = vec![text_object(body.as_ref())];
            parts.extend(fields.iter().map(|f| parse(&f.text)));
            join(parts, "\n")
        }
        Block::Header { text: body } => {
            let title = text_object(body.as_ref());
            if is_blank(&title) {
                return Vec::new();
            }
            let mut out = vec![text("## ")];
            out.extend(title);
            out
        }
        Block::Context { elements } => join(
            elements
                .iter()
                .map(|element| match element {
                    ContextElement::PlainText { text: t } | ContextElement::Mrkdwn { text: t } => {
                        parse(t)
                    }
                    ContextElement::Image { alt_text } => {
                        vec![text(format!("[{}]", alt_text.as_deref().unwrap_or("image")))]
                    }
                    ContextElement::Unsupported => Vec::new(),
                })
                .collect(),
            " | ",
        ),
        Block::Image { alt_text, title } => {
            let name = title
                .as_ref()
                .map(|t| t.text.as_str())
                .filter(|t| !t.is_empty())
                .or(alt_text.as_deref())
                .unwrap_or("image");
            vec![text(format!("[Image: {name}]"))]
        }
        Block::Divider => vec![text("---")],
        Block::Unsupported => Vec::new(),
    }
}

/// Render a list of blocks, one per line.
#[must_use]
pub fn blocks_segments(blocks: &[Block]) -> Vec<Segment> {
    join(blocks.iter().map(block).collect(), "\n")
}

fn attachment(attachment: &MessageAttachment) -> Vec<Segment> {
    let mut parts: Vec<Vec<Segment>> = Vec::new();
    if let Some(title) = attachment.title.as_deref().filter(|t| !t.is_empty()) {
        parts.push(vec![text(match attachment.title_link.as_deref() {
            Some(link) if !link.is_empty() => format!("{title} ({link})"),
            _ => title.to_string(),
        })]);
    }
    if let Some(author) = attachment.author_name.as_deref().filter(|a| !a.is_empty()) {
        parts.push(vec![text(format!("by {author}"))]);
    }
    if let Some(pretext) = &attachment.pretext {
        parts.push(parse(pretext));
    }
    let body = attachment
        .text
        .as_deref()
        .filter(|t| !t.is_empty())
        .or(attachment.fallback.as_deref());
    if let Some(body) = body {
        parts.push(parse(body));
    }
    for field in &attachment.fields {
        let mut line = Vec::new();
        if !field.title.is_empty() && !field.value.is_empty() {
            line.push(text(format!("{}: ", field.title)));
        }
        line.extend(parse(&field.value));
        parts.push(line);
    }
    parts.push(blocks_segments(&attachment.blocks));
    if let Some(url) = attachment.from_url.as_deref().filter(|u| !u.is_empty()) {
        let shown = attachment.title_link.as_deref() == Some(url);
        if !shown {
            parts.push(vec![text(url)]);
        }
    }
    join(parts, "\n")
}

/// Render attachments, separated by a `---` line.
#[must_use]
pub fn attachments_segments(attachments: &[MessageAttachment]) -> Vec<Segment> {
    join(attachments.iter().map(attachment).collect(), "\n---\n")
}
