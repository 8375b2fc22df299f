//! Terminal rendering for chat turns.
//!
//! Two observers implement the session's `TurnObserver`:
//! - [`RawObserver`] echoes every streamed token decoded, wire markers and
//!   all, after printing the rendered prompt once at startup.
//! - [`FormattedObserver`] prints labelled message headers, streams content
//!   deltas through the citation rewriter, and summarizes tool output.

use std::io::Write;

use colloquy_core::encoding::{decode, Token};
use colloquy_core::{Message, Role};
use colloquy_session::TurnObserver;

/// Rewrites `【{cursor}†{title}】` citation markers in streamed text to
/// `({title})`. A marker may span several deltas, so an unclosed `【` is
/// held back until its `】` arrives.
#[derive(Default)]
pub struct CitationFilter {
    pending: String,
}

impl CitationFilter {
    pub fn push(&mut self, delta: &str) -> String {
        self.pending.push_str(delta);
        let mut out = String::new();
        loop {
            match self.pending.find('【') {
                Some(start) => match self.pending[start..].find('】') {
                    Some(end) => {
                        out.push_str(&self.pending[..start]);
                        let inner = &self.pending[start + '【'.len_utf8()..start + end];
                        let title = inner.rsplit('†').next().unwrap_or(inner);
                        if !title.is_empty() {
                            out.push_str(&format!("({title})"));
                        }
                        self.pending = self.pending[start + end + '】'.len_utf8()..].to_string();
                    }
                    None => {
                        out.push_str(&self.pending[..start]);
                        self.pending = self.pending[start..].to_string();
                        break;
                    }
                },
                None => {
                    out.push_str(&self.pending);
                    self.pending.clear();
                    break;
                }
            }
        }
        out
    }

    /// Release anything held back (an unterminated marker at stream end).
    pub fn finish(&mut self) -> String {
        std::mem::take(&mut self.pending)
    }
}

/// Echoes decoded tokens as they stream.
pub struct RawObserver;

impl TurnObserver for RawObserver {
    fn on_token(&mut self, token: Token) {
        print!("{}", decode(&[token]));
        let _ = std::io::stdout().flush();
    }

    fn on_message_complete(&mut self, message: &Message) {
        // Streamed assistant tokens were already echoed; tool results were
        // not streamed, so render them the way the wire would.
        if message.role() == Role::Tool {
            let tokens = colloquy_core::encoding::render_message(message);
            print!("{}", decode(&tokens));
            let _ = std::io::stdout().flush();
        }
    }
}

/// Prints labelled headers and filtered content.
pub struct FormattedObserver {
    filter: CitationFilter,
    filter_citations: bool,
    show_browser_results: bool,
}

impl FormattedObserver {
    pub fn new(filter_citations: bool, show_browser_results: bool) -> Self {
        Self {
            filter: CitationFilter::default(),
            filter_citations,
            show_browser_results,
        }
    }
}

impl TurnObserver for FormattedObserver {
    fn on_message_start(&mut self, channel: Option<&str>, recipient: Option<&str>) {
        let channel = channel.unwrap_or("?");
        match recipient {
            Some(recipient) => println!("Assistant → {recipient} ({channel}):"),
            None => println!("Assistant ({channel}):"),
        }
    }

    fn on_content_delta(&mut self, delta: &str) {
        let text = if self.filter_citations {
            self.filter.push(delta)
        } else {
            delta.to_string()
        };
        print!("{text}");
        let _ = std::io::stdout().flush();
    }

    fn on_message_complete(&mut self, message: &Message) {
        let tail = self.filter.finish();
        if !tail.is_empty() {
            print!("{tail}");
        }

        if message.role() == Role::Tool {
            let name = message.author.header_name().to_string();
            println!("{name} output:");
            if name.starts_with("browser.") && !self.show_browser_results {
                println!("[Search results fed to the model]");
            } else {
                println!("{}", message.text());
            }
        } else {
            println!();
        }
        let _ = std::io::stdout().flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn citation_filter_rewrites_complete_marker() {
        let mut filter = CitationFilter::default();
        assert_eq!(filter.push("see 【3†Example】 here"), "see (Example) here");
    }

    #[test]
    fn citation_filter_rewrites_line_citation() {
        let mut filter = CitationFilter::default();
        assert_eq!(filter.push("fact【6†L9-L11】."), "fact(L9-L11).");
    }

    #[test]
    fn citation_filter_holds_partial_marker() {
        let mut filter = CitationFilter::default();
        assert_eq!(filter.push("see 【3†Exam"), "see ");
        assert_eq!(filter.push("ple】 here"), "(Example) here");
    }

    #[test]
    fn citation_filter_flushes_unterminated_marker() {
        let mut filter = CitationFilter::default();
        assert_eq!(filter.push("text 【dangling"), "text ");
        assert_eq!(filter.finish(), "【dangling");
    }

    #[test]
    fn plain_text_passes_through() {
        let mut filter = CitationFilter::default();
        assert_eq!(filter.push("no markers at all"), "no markers at all");
        assert_eq!(filter.finish(), "");
    }
}
