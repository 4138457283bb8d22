use std::sync::Arc;

use memchr::memmem;

/// Sentinel pair delimiting model-internal reasoning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThinkingTags {
    pub open: Arc<str>,
    pub close: Arc<str>,
}

impl ThinkingTags {
    #[must_use]
    pub fn new(open: &str, close: &str) -> Self {
        Self {
            open: Arc::from(open),
            close: Arc::from(close),
        }
    }
}

impl Default for ThinkingTags {
    fn default() -> Self {
        Self::new("<thinking>", "</thinking>")
    }
}

/// Streaming scrubber that hides everything between the sentinel tags.
///
/// One instance per logical stream. Text that might be the start of a tag
/// split across chunks is held back until the next chunk decides it, so the
/// output never contains partial sentinel text.
#[derive(Debug)]
pub struct ThinkingFilter {
    tags: ThinkingTags,
    inside_thinking: bool,
    pending_tail: String,
}

impl ThinkingFilter {
    #[must_use]
    pub fn new(tags: ThinkingTags) -> Self {
        Self {
            tags,
            inside_thinking: false,
            pending_tail: String::new(),
        }
    }

    #[must_use]
    pub fn is_inside_thinking(&self) -> bool {
        self.inside_thinking
    }

    /// Consume one chunk and return the text that may be shown.
    pub fn process(&mut self, chunk: &str) -> String {
        let mut buffer = std::mem::take(&mut self.pending_tail);
        buffer.push_str(chunk);

        let mut visible = String::with_capacity(buffer.len());
        let mut rest = buffer.as_str();
        loop {
            let tag: &str = if self.inside_thinking {
                &self.tags.close
            } else {
                &self.tags.open
            };

            if let Some(pos) = memmem::find(rest.as_bytes(), tag.as_bytes()) {
                if !self.inside_thinking {
                    visible.push_str(&rest[..pos]);
                }
                rest = &rest[pos + tag.len()..];
                self.inside_thinking = !self.inside_thinking;
                continue;
            }

            let split = rest.len() - partial_tag_len(rest, tag);
            if !self.inside_thinking {
                visible.push_str(&rest[..split]);
            }
            self.pending_tail.push_str(&rest[split..]);
            return visible;
        }
    }

    /// Resolve whatever is still held back once the stream has ended.
    ///
    /// A withheld tail is shown when outside a thinking block and dropped
    /// when inside one.
    #[must_use]
    pub fn finish(self) -> String {
        if self.inside_thinking {
            String::new()
        } else {
            self.pending_tail
        }
    }
}

/// Length of the longest suffix of `text` that is a proper prefix of `tag`.
///
/// The matched suffix starts with the tag's first byte, which is never a
/// UTF-8 continuation byte, so `text.len() - result` is a char boundary.
fn partial_tag_len(text: &str, tag: &str) -> usize {
    let text = text.as_bytes();
    let tag = tag.as_bytes();
    let longest = tag.len().saturating_sub(1).min(text.len());
    (1..=longest)
        .rev()
        .find(|&len| text.ends_with(&tag[..len]))
        .unwrap_or(0)
}
