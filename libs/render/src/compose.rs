//! Notification message composition for update frames.

use leasewatch_snapshot::{Item, UpdateFrame};
use rand::Rng;
use thiserror::Error;

use crate::{RenderError, Renderer};

/// Upper bound for the byte length of a detail message before a new one
/// is started. Single lines longer than the limit are sent as-is.
pub const MESSAGE_CHUNK_LIMIT: usize = 3500;

/// One outbound chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedMessage {
    pub text: String,

    /// Whether the text should be sent with Markdown parse mode.
    pub markdown: bool,
}

impl ComposedMessage {
    /// A message sent without parse mode.
    pub fn plain(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            text,
            markdown: false,
        }
    }

    fn markdown(text: String) -> Self {
        Self {
            text,
            markdown: true,
        }
    }
}

/// Per-subscriber composition settings.
#[derive(Debug, Clone, Copy)]
pub struct MessageOptions<'a> {
    /// Rendered against the whole frame.
    pub summary_template: &'a str,

    /// Rendered once per added or removed item.
    pub detail_template: &'a str,

    /// Send only the summary.
    pub ignore_details: bool,

    /// Leave removed items out of the detail messages.
    pub ignore_removed: bool,
}

/// Errors from composing test messages.
#[derive(Debug, Error)]
pub enum ComposeError {
    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("no data yet")]
    NoData,
}

/// Compose the messages announcing `frame`: one summary followed by the
/// detail messages, chunked at [`MESSAGE_CHUNK_LIMIT`].
pub fn compose_messages(
    renderer: &dyn Renderer,
    frame: &UpdateFrame,
    options: &MessageOptions<'_>,
) -> Result<Vec<ComposedMessage>, RenderError> {
    let added = render_details(renderer, &frame.added, options.detail_template)?;
    let removed = render_details(renderer, &frame.removed, options.detail_template)?;
    compose(renderer, frame, options, added, removed)
}

/// Compose messages for a test notification.
///
/// Both detail sections are padded to at least `pad_to` lines with items
/// drawn at random from the frame's current list.
pub fn compose_test_messages(
    renderer: &dyn Renderer,
    frame: &UpdateFrame,
    options: &MessageOptions<'_>,
    pad_to: usize,
    rng: &mut impl Rng,
) -> Result<Vec<ComposedMessage>, ComposeError> {
    let mut added = render_details(renderer, &frame.added, options.detail_template)?;
    let mut removed = render_details(renderer, &frame.removed, options.detail_template)?;

    for lines in [&mut added, &mut removed] {
        if lines.len() >= pad_to {
            continue;
        }
        if frame.current.is_empty() {
            return Err(ComposeError::NoData);
        }
        while lines.len() < pad_to {
            let item = &frame.current[rng.random_range(0..frame.current.len())];
            lines.push(render_detail(renderer, item, options.detail_template)?);
        }
    }

    Ok(compose(renderer, frame, options, added, removed)?)
}

fn compose(
    renderer: &dyn Renderer,
    frame: &UpdateFrame,
    options: &MessageOptions<'_>,
    added: Vec<String>,
    removed: Vec<String>,
) -> Result<Vec<ComposedMessage>, RenderError> {
    let summary = renderer.render(options.summary_template, &frame.to_template_data())?;
    let mut messages = vec![ComposedMessage::plain(summary)];

    if options.ignore_details {
        return Ok(messages);
    }

    let mut chunker = Chunker::default();
    if !added.is_empty() {
        chunker.header("Added:\n");
        for line in &added {
            chunker.line(line);
        }
    }
    if !removed.is_empty() && !options.ignore_removed {
        if !added.is_empty() {
            chunker.header("\n");
        }
        chunker.header("Removed:\n");
        for line in &removed {
            chunker.line(line);
        }
    }

    messages.extend(chunker.finish().into_iter().map(ComposedMessage::markdown));
    Ok(messages)
}

fn render_details(
    renderer: &dyn Renderer,
    items: &[Item],
    template: &str,
) -> Result<Vec<String>, RenderError> {
    items
        .iter()
        .map(|item| render_detail(renderer, item, template))
        .collect()
}

fn render_detail(renderer: &dyn Renderer, item: &Item, template: &str) -> Result<String, RenderError> {
    let data = serde_json::to_value(item).map_err(|e| RenderError::eval(e.to_string()))?;
    renderer.render(template, &data)
}

#[derive(Default)]
struct Chunker {
    buffer: String,
    chunks: Vec<String>,
}

impl Chunker {
    fn header(&mut self, text: &str) {
        self.buffer.push_str(text);
    }

    fn line(&mut self, line: &str) {
        if !self.buffer.is_empty() && self.buffer.len() + line.len() > MESSAGE_CHUNK_LIMIT {
            self.chunks.push(std::mem::take(&mut self.buffer));
        }
        self.buffer.push_str(line);
        self.buffer.push('\n');
    }

    fn finish(mut self) -> Vec<String> {
        if !self.buffer.is_empty() {
            self.chunks.push(self.buffer);
        }
        self.chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TemplateEngine;
    use chrono::Utc;
    use leasewatch_id::ItemId;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const SUMMARY: &str =
        "{{ len .previous }} -> {{ len .current }} (+{{ len .added }}, -{{ len .removed }})";
    const DETAIL: &str = "{{ .id }}";

    fn item(id: &str) -> Item {
        Item::bare(ItemId::new(id).unwrap())
    }

    fn options() -> MessageOptions<'static> {
        MessageOptions {
            summary_template: SUMMARY,
            detail_template: DETAIL,
            ignore_details: false,
            ignore_removed: false,
        }
    }

    fn frame(previous: &[&str], current: &[&str]) -> UpdateFrame {
        let now = Utc::now();
        UpdateFrame::empty()
            .advance(previous.iter().map(|id| item(id)).collect(), now)
            .advance(current.iter().map(|id| item(id)).collect(), now)
    }

    #[test]
    fn test_summary_and_details() {
        let messages = compose_messages(&TemplateEngine, &frame(&["1", "2"], &["2", "3"]), &options()).unwrap();

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], ComposedMessage::plain("2 -> 2 (+1, -1)".to_string()));
        assert_eq!(messages[1].text, "Added:\n3\n\nRemoved:\n1\n");
        assert!(messages[1].markdown);
    }

    #[test]
    fn test_ignore_details() {
        let opts = MessageOptions {
            ignore_details: true,
            ..options()
        };
        let messages = compose_messages(&TemplateEngine, &frame(&["1"], &["2"]), &opts).unwrap();
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn test_ignore_removed() {
        let opts = MessageOptions {
            ignore_removed: true,
            ..options()
        };
        let messages = compose_messages(&TemplateEngine, &frame(&["1"], &[]), &opts).unwrap();
        assert_eq!(messages.len(), 1, "no detail message when only removals exist");

        let messages = compose_messages(&TemplateEngine, &frame(&["1"], &["2"]), &opts).unwrap();
        assert_eq!(messages[1].text, "Added:\n2\n");
    }

    #[test]
    fn test_details_are_chunked() {
        let current: Vec<String> = (0..400).map(|i| format!("item-number-{i:04}")).collect();
        let current: Vec<&str> = current.iter().map(String::as_str).collect();
        let messages = compose_messages(&TemplateEngine, &frame(&[], &current), &options()).unwrap();

        assert!(messages.len() > 2);
        for message in &messages[1..] {
            assert!(message.text.len() <= MESSAGE_CHUNK_LIMIT + "item-number-0000\n".len());
        }
        let lines: usize = messages[1..]
            .iter()
            .map(|m| m.text.lines().filter(|l| l.starts_with("item-")).count())
            .sum();
        assert_eq!(lines, 400);
    }

    #[test]
    fn test_render_error_propagates() {
        let opts = MessageOptions {
            detail_template: "{{ .id ",
            ..options()
        };
        assert!(compose_messages(&TemplateEngine, &frame(&[], &["1"]), &opts).is_err());
    }

    #[test]
    fn test_test_messages_pad_both_sections() {
        let mut rng = StdRng::seed_from_u64(7);
        let messages =
            compose_test_messages(&TemplateEngine, &frame(&["1"], &["1"]), &options(), 3, &mut rng)
                .unwrap();
        let details = &messages[1].text;
        assert_eq!(details, "Added:\n1\n1\n1\n\nRemoved:\n1\n1\n1\n");
    }

    #[test]
    fn test_test_messages_without_data() {
        let mut rng = StdRng::seed_from_u64(7);
        let err = compose_test_messages(&TemplateEngine, &UpdateFrame::empty(), &options(), 2, &mut rng)
            .unwrap_err();
        assert!(matches!(err, ComposeError::NoData));
        assert_eq!(err.to_string(), "no data yet");
    }
}
