//! Patch application tool (`functions.apply_patch`).
//!
//! Applies a patch envelope to files under a workspace root:
//!
//! ```text
//! *** Begin Patch
//! *** Add File: path        (followed by `+` lines)
//! *** Delete File: path
//! *** Update File: path     (optional `*** Move to: newpath`, then `@@` hunks)
//! *** End Patch
//! ```
//!
//! Hunks carry ` ` context, `-` removals, and `+` additions; context is
//! matched exactly first, then with trailing whitespace ignored. Function
//! calls often arrive JSON-wrapped (`{"input": "*** Begin Patch..."}`);
//! the capability unwraps a single embedded value before parsing.
//!
//! Every failure mode degrades to textual output: the model reads the
//! error and emits a corrected patch.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use colloquy_core::{Message, ToolCapability, ToolClass, ToolError};

pub struct ApplyPatchCapability {
    root: PathBuf,
}

impl ApplyPatchCapability {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ToolCapability for ApplyPatchCapability {
    fn class(&self) -> ToolClass {
        ToolClass::ApplyPatch
    }

    async fn invoke(&self, call: &Message) -> Result<Vec<String>, ToolError> {
        let text = call.text();
        let patch = match unwrap_json_payload(&text) {
            Ok(p) => p,
            Err(e) => return Ok(vec![format!("Error parsing JSON: {e}")]),
        };

        let output = match apply_patch(&patch, &self.root) {
            Ok(()) => "Done!".to_string(),
            Err(e) => {
                warn!(error = %e, "Patch application failed");
                format!("Error applying patch: {e}")
            }
        };
        Ok(vec![output])
    }
}

/// Function-call content that starts with `{` is a JSON object wrapping the
/// patch text as its single value; anything else is the patch itself.
fn unwrap_json_payload(text: &str) -> Result<String, String> {
    if !text.trim_start().starts_with('{') {
        return Ok(text.to_string());
    }
    let value: serde_json::Value =
        serde_json::from_str(text.trim()).map_err(|e| e.to_string())?;
    let serde_json::Value::Object(map) = value else {
        return Err("expected a JSON object".into());
    };
    match map.into_iter().last() {
        Some((_, serde_json::Value::String(patch))) => Ok(patch),
        Some((key, _)) => Err(format!("value of '{key}' is not a string")),
        None => Err("empty JSON object".into()),
    }
}

/// Apply a patch envelope to files under `root`.
pub fn apply_patch(patch: &str, root: &Path) -> Result<(), String> {
    let lines: Vec<&str> = patch.lines().collect();
    let mut i = 0;

    while i < lines.len() && lines[i].trim().is_empty() {
        i += 1;
    }
    if lines.get(i).map(|l| l.trim()) != Some("*** Begin Patch") {
        return Err("patch must start with *** Begin Patch".into());
    }
    i += 1;

    while i < lines.len() {
        let line = lines[i];
        if line.trim() == "*** End Patch" {
            return Ok(());
        }

        if let Some(path) = line.strip_prefix("*** Add File: ") {
            i += 1;
            let mut content = String::new();
            while i < lines.len() {
                let Some(added) = lines[i].strip_prefix('+') else {
                    break;
                };
                content.push_str(added);
                content.push('\n');
                i += 1;
            }
            add_file(&root.join(path.trim()), &content)?;
        } else if let Some(path) = line.strip_prefix("*** Delete File: ") {
            i += 1;
            let target = root.join(path.trim());
            debug!(path = %target.display(), "Deleting file");
            std::fs::remove_file(&target)
                .map_err(|e| format!("cannot delete {}: {e}", path.trim()))?;
        } else if let Some(path) = line.strip_prefix("*** Update File: ") {
            i += 1;
            let mut move_to = None;
            if let Some(new_path) = lines.get(i).and_then(|l| l.strip_prefix("*** Move to: ")) {
                move_to = Some(new_path.trim().to_string());
                i += 1;
            }
            let (hunks, consumed) = parse_hunks(&lines[i..])?;
            i += consumed;
            update_file(root, path.trim(), move_to.as_deref(), &hunks)?;
        } else {
            return Err(format!("unexpected line in patch: {line}"));
        }
    }

    Err("patch is missing *** End Patch".into())
}

/// One `@@` hunk: an optional anchor plus ordered context/remove/add lines.
struct Hunk {
    anchor: Option<String>,
    old: Vec<String>,
    new: Vec<String>,
}

fn parse_hunks(lines: &[&str]) -> Result<(Vec<Hunk>, usize), String> {
    let mut hunks = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        if line.starts_with("*** End of File") {
            i += 1;
            continue;
        }
        if line.starts_with("*** ") {
            break;
        }
        let Some(rest) = line.strip_prefix("@@") else {
            return Err(format!("expected @@ hunk header, found: {line}"));
        };
        let anchor = {
            let anchor = rest.trim();
            if anchor.is_empty() {
                None
            } else {
                Some(anchor.to_string())
            }
        };
        i += 1;

        let mut old = Vec::new();
        let mut new = Vec::new();
        while i < lines.len() {
            let body = lines[i];
            if body.starts_with("@@") || body.starts_with("*** ") {
                break;
            }
            if let Some(ctx) = body.strip_prefix(' ') {
                old.push(ctx.to_string());
                new.push(ctx.to_string());
            } else if let Some(removed) = body.strip_prefix('-') {
                old.push(removed.to_string());
            } else if let Some(added) = body.strip_prefix('+') {
                new.push(added.to_string());
            } else if body.is_empty() {
                // An empty line is context with the leading space dropped
                old.push(String::new());
                new.push(String::new());
            } else {
                return Err(format!("malformed hunk line: {body}"));
            }
            i += 1;
        }
        if old.is_empty() && new.is_empty() {
            return Err("empty hunk".into());
        }
        hunks.push(Hunk { anchor, old, new });
    }

    Ok((hunks, i))
}

fn add_file(path: &Path, content: &str) -> Result<(), String> {
    debug!(path = %path.display(), "Adding file");
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("cannot create {}: {e}", parent.display()))?;
    }
    std::fs::write(path, content).map_err(|e| format!("cannot write {}: {e}", path.display()))
}

fn update_file(
    root: &Path,
    path: &str,
    move_to: Option<&str>,
    hunks: &[Hunk],
) -> Result<(), String> {
    let source = root.join(path);
    let content =
        std::fs::read_to_string(&source).map_err(|e| format!("cannot read {path}: {e}"))?;
    let had_trailing_newline = content.ends_with('\n');
    let mut file_lines: Vec<String> = content.lines().map(str::to_string).collect();

    let mut position = 0;
    for hunk in hunks {
        if let Some(anchor) = &hunk.anchor {
            position = file_lines[position..]
                .iter()
                .position(|l| l.contains(anchor.as_str()))
                .map(|off| position + off)
                .ok_or_else(|| format!("anchor not found in {path}: {anchor}"))?;
        }
        let at = find_context(&file_lines, &hunk.old, position)
            .ok_or_else(|| format!("context not found in {path}: {:?}", hunk.old.first()))?;
        file_lines.splice(at..at + hunk.old.len(), hunk.new.iter().cloned());
        position = at + hunk.new.len();
    }

    let mut updated = file_lines.join("\n");
    if had_trailing_newline && !updated.is_empty() {
        updated.push('\n');
    }

    let target = match move_to {
        Some(new_path) => {
            let target = root.join(new_path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| format!("cannot create {}: {e}", parent.display()))?;
            }
            std::fs::remove_file(&source).map_err(|e| format!("cannot move {path}: {e}"))?;
            target
        }
        None => source,
    };

    debug!(path = %target.display(), hunks = hunks.len(), "Updating file");
    std::fs::write(&target, updated).map_err(|e| format!("cannot write {}: {e}", target.display()))
}

/// Locate the hunk's old lines in the file: exact match first, then with
/// trailing whitespace ignored, then fully trimmed.
fn find_context(file_lines: &[String], old: &[String], from: usize) -> Option<usize> {
    if old.is_empty() {
        return Some(from);
    }
    let matches = |eq: &dyn Fn(&str, &str) -> bool| {
        (from..=file_lines.len().checked_sub(old.len())?).find(|&i| {
            old.iter()
                .enumerate()
                .all(|(j, o)| eq(file_lines[i + j].as_str(), o.as_str()))
        })
    };
    matches(&|a, b| a == b)
        .or_else(|| matches(&|a, b| a.trim_end() == b.trim_end()))
        .or_else(|| matches(&|a, b| a.trim() == b.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(text: &str) -> Message {
        Message::assistant(text)
            .with_channel("commentary")
            .with_recipient("functions.apply_patch")
    }

    #[tokio::test]
    async fn add_file_via_patch() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ApplyPatchCapability::new(dir.path());
        let patch = "*** Begin Patch\n*** Add File: notes/hello.txt\n+hello\n+world\n*** End Patch\n";
        let outputs = tool.invoke(&call(patch)).await.unwrap();
        assert_eq!(outputs, vec!["Done!".to_string()]);
        let written = std::fs::read_to_string(dir.path().join("notes/hello.txt")).unwrap();
        assert_eq!(written, "hello\nworld\n");
    }

    #[tokio::test]
    async fn json_wrapped_patch_is_unwrapped() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ApplyPatchCapability::new(dir.path());
        let patch = "*** Begin Patch\n*** Add File: a.txt\n+content\n*** End Patch\n";
        let wrapped = serde_json::json!({ "input": patch }).to_string();
        let outputs = tool.invoke(&call(&wrapped)).await.unwrap();
        assert_eq!(outputs, vec!["Done!".to_string()]);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("a.txt")).unwrap(),
            "content\n"
        );
    }

    #[tokio::test]
    async fn malformed_json_becomes_error_text() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ApplyPatchCapability::new(dir.path());
        let outputs = tool.invoke(&call("{not valid json")).await.unwrap();
        assert!(outputs[0].starts_with("Error parsing JSON:"));
    }

    #[tokio::test]
    async fn bad_patch_becomes_error_text() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ApplyPatchCapability::new(dir.path());
        let outputs = tool.invoke(&call("not a patch at all")).await.unwrap();
        assert!(outputs[0].starts_with("Error applying patch:"));
    }

    #[test]
    fn delete_file_via_patch() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("old.txt"), "bye\n").unwrap();
        let patch = "*** Begin Patch\n*** Delete File: old.txt\n*** End Patch\n";
        apply_patch(patch, dir.path()).unwrap();
        assert!(!dir.path().join("old.txt").exists());
    }

    #[test]
    fn update_file_with_context_hunk() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.py"), "a = 1\nb = 2\nc = 3\n").unwrap();
        let patch = "*** Begin Patch\n\
                     *** Update File: main.py\n\
                     @@\n \
                     a = 1\n\
                     -b = 2\n\
                     +b = 20\n \
                     c = 3\n\
                     *** End Patch\n";
        apply_patch(patch, dir.path()).unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("main.py")).unwrap(),
            "a = 1\nb = 20\nc = 3\n"
        );
    }

    #[test]
    fn update_with_anchor_header() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("lib.rs"),
            "fn one() {\n    1\n}\n\nfn two() {\n    1\n}\n",
        )
        .unwrap();
        // Both functions contain the same body line; the anchor picks the second.
        let patch = "*** Begin Patch\n\
                     *** Update File: lib.rs\n\
                     @@ fn two\n\
                     -    1\n\
                     +    2\n\
                     *** End Patch\n";
        apply_patch(patch, dir.path()).unwrap();
        let updated = std::fs::read_to_string(dir.path().join("lib.rs")).unwrap();
        assert_eq!(updated, "fn one() {\n    1\n}\n\nfn two() {\n    2\n}\n");
    }

    #[test]
    fn update_matches_context_with_trailing_whitespace() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "keep   \nchange\n").unwrap();
        let patch = "*** Begin Patch\n\
                     *** Update File: f.txt\n\
                     @@\n \
                     keep\n\
                     -change\n\
                     +changed\n\
                     *** End Patch\n";
        apply_patch(patch, dir.path()).unwrap();
        let updated = std::fs::read_to_string(dir.path().join("f.txt")).unwrap();
        assert!(updated.contains("changed"));
    }

    #[test]
    fn update_with_move_renames_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("before.txt"), "line\n").unwrap();
        let patch = "*** Begin Patch\n\
                     *** Update File: before.txt\n\
                     *** Move to: after.txt\n\
                     @@\n\
                     -line\n\
                     +line!\n\
                     *** End Patch\n";
        apply_patch(patch, dir.path()).unwrap();
        assert!(!dir.path().join("before.txt").exists());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("after.txt")).unwrap(),
            "line!\n"
        );
    }

    #[test]
    fn missing_context_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "alpha\n").unwrap();
        let patch = "*** Begin Patch\n\
                     *** Update File: f.txt\n\
                     @@\n\
                     -omega\n\
                     +gamma\n\
                     *** End Patch\n";
        let err = apply_patch(patch, dir.path()).unwrap_err();
        assert!(err.contains("context not found"));
    }

    #[test]
    fn truncated_envelope_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = apply_patch("*** Begin Patch\n*** Delete File: x\n", dir.path());
        assert!(err.is_err());
        assert!(apply_patch("no envelope", dir.path()).is_err());
    }

    #[test]
    fn unwrap_plain_text_passthrough() {
        assert_eq!(
            unwrap_json_payload("*** Begin Patch").unwrap(),
            "*** Begin Patch"
        );
    }
}
