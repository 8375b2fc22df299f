//! System and developer message assembly.
//!
//! The system message establishes identity, date, reasoning effort, the
//! enabled built-in tools, and the valid-channels rule. The developer
//! message carries operator instructions and, when patch application is
//! enabled, the patch-format document plus a function declaration the model
//! calls as `functions.apply_patch`.

use chrono::Utc;
use colloquy_core::Message;

/// What the prompt should advertise.
#[derive(Debug, Clone, Default)]
pub struct PromptOptions {
    /// Reasoning effort: low, medium, high
    pub reasoning: String,
    pub browser: bool,
    pub python: bool,
    pub apply_patch: bool,
    /// Operator-provided developer instructions
    pub developer_instructions: Option<String>,
}

const BROWSER_INSTRUCTIONS: &str = r#"## browser

// Tool for browsing.
// The `cursor` appears in brackets before each browsing display: `[{cursor}]`.
// Cite information from the tool using the following format:
// `【{cursor}†L{line_start}(-L{line_end})?】`, for example: `【6†L9-L11】`.
// Do not quote more than 10 words directly from the tool output.
namespace browser {

// Searches for information related to `query` and displays `topn` results.
type search = (_: { query: string, topn?: number }) => any;

// Opens the link `id` from the page indicated by `cursor` starting at line
// number `loc`, showing `num_lines` lines. If `id` is a string, it is
// treated as a fully qualified URL. Use this function without `id` to
// scroll to a new location of an opened page.
type open = (_: { id?: number | string, cursor?: number, loc?: number, num_lines?: number }) => any;

// Finds exact matches of `pattern` in the current page, or the page given by `cursor`.
type find = (_: { pattern: string, cursor?: number }) => any;

} // namespace browser"#;

const PYTHON_INSTRUCTIONS: &str = r#"## python

Use this tool to execute Python code. The code is run in a stateless sandbox
and anything written to stdout or stderr is returned to you. Address the
tool by sending the script as the message content to recipient `python` on
the commentary channel."#;

/// The patch format document injected into the developer message when patch
/// application is enabled.
pub const PATCH_INSTRUCTIONS: &str = r#"To edit files, use the apply_patch function. A patch is a single document
wrapped in an envelope:

*** Begin Patch
[one or more file sections]
*** End Patch

Each file section starts with one of:

*** Add File: <path>     - create a new file; every following line starts with `+`
*** Delete File: <path>  - remove an existing file; no body follows
*** Update File: <path>  - edit an existing file in place
                           (optionally followed by `*** Move to: <new path>`)

Update sections contain one or more hunks. Each hunk starts with `@@`,
optionally followed by an anchor naming the enclosing context (for example
`@@ def main`). Hunk body lines are prefixed with a space (context), `-`
(remove), or `+` (add). Include three lines of context above and below each
change where the file allows it.

Example:

*** Begin Patch
*** Update File: pygorithm/searching/binary_search.py
@@ def binary_search(arr, target):
-    low = 0
+    low = 1
*** End Patch"#;

/// Build the session's system message.
pub fn build_system_message(options: &PromptOptions) -> Message {
    let date = Utc::now().format("%Y-%m-%d");
    let mut text = format!(
        "You are Colloquy, a large language model.\n\
         Knowledge cutoff: 2024-06\n\
         Current date: {date}\n\n\
         Reasoning: {}\n",
        options.reasoning
    );

    if options.browser || options.python {
        text.push_str("\n# Tools\n");
        if options.browser {
            text.push('\n');
            text.push_str(BROWSER_INSTRUCTIONS);
            text.push('\n');
        }
        if options.python {
            text.push('\n');
            text.push_str(PYTHON_INSTRUCTIONS);
            text.push('\n');
        }
    }

    text.push_str(
        "\n# Valid channels: analysis, commentary, final. \
         Channel must be included for every message.",
    );

    Message::system(text)
}

/// Build the developer message, if any content warrants one.
pub fn build_developer_message(options: &PromptOptions) -> Option<Message> {
    if !options.apply_patch && options.developer_instructions.is_none() {
        return None;
    }

    let mut text = String::from("# Instructions\n\n");
    if let Some(instructions) = &options.developer_instructions {
        text.push_str(instructions);
        text.push('\n');
    }
    if options.apply_patch {
        if options.developer_instructions.is_some() {
            text.push('\n');
        }
        text.push_str(PATCH_INSTRUCTIONS);
        text.push_str(
            "\n\n# Tools\n\n## functions\n\nnamespace functions {\n\n\
             // Patch a file\n\
             type apply_patch = (string) => any;\n\n\
             } // namespace functions",
        );
    }

    Some(Message::developer(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> PromptOptions {
        PromptOptions {
            reasoning: "low".into(),
            ..PromptOptions::default()
        }
    }

    #[test]
    fn system_message_has_date_effort_and_channels() {
        let msg = build_system_message(&options());
        let text = msg.text();
        assert!(text.contains("Current date: "));
        assert!(text.contains("Reasoning: low"));
        assert!(text.contains("# Valid channels: analysis, commentary, final."));
        assert!(!text.contains("# Tools"));
    }

    #[test]
    fn enabled_tools_appear_in_system_message() {
        let mut opts = options();
        opts.browser = true;
        opts.python = true;
        let text = build_system_message(&opts).text();
        assert!(text.contains("# Tools"));
        assert!(text.contains("namespace browser"));
        assert!(text.contains("## python"));
    }

    #[test]
    fn no_developer_message_without_content() {
        assert!(build_developer_message(&options()).is_none());
    }

    #[test]
    fn developer_instructions_only() {
        let mut opts = options();
        opts.developer_instructions = Some("Answer in French.".into());
        let text = build_developer_message(&opts).unwrap().text();
        assert!(text.starts_with("# Instructions"));
        assert!(text.contains("Answer in French."));
        assert!(!text.contains("apply_patch"));
    }

    #[test]
    fn apply_patch_injects_document_and_namespace() {
        let mut opts = options();
        opts.apply_patch = true;
        let text = build_developer_message(&opts).unwrap().text();
        assert!(text.contains("*** Begin Patch"));
        assert!(text.contains("namespace functions"));
        assert!(text.contains("type apply_patch = (string) => any;"));
    }
}
