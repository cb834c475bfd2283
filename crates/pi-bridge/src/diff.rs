//! Aggregated unified-diff state for the current turn.

/// Ordered unified-diff fragments, reset at turn start. Each file-change tool
/// result appends one fragment; the joined form is pushed to the client via
/// `turn/diff/updated` after every append, so successive payloads extend the
/// previous one.
#[derive(Debug, Default)]
pub struct DiffAccumulator {
    fragments: Vec<String>,
}

const FRAGMENT_SEPARATOR: &str = "\n\n";

impl DiffAccumulator {
    pub fn reset(&mut self) {
        self.fragments.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Append a diff body reported by the agent, prefixed with file headers.
    pub fn append_edit(&mut self, path: &str, body: &str) {
        self.fragments
            .push(format!("--- a/{path}\n+++ b/{path}\n{body}"));
    }

    /// Synthesize a full-addition diff for a newly created file.
    pub fn append_created_file(&mut self, path: &str, content: &str) {
        let line_count = content.lines().count();
        let mut fragment = format!("--- /dev/null\n+++ b/{path}\n@@ -0,0 +1,{line_count} @@\n");
        let mut lines = content.lines().peekable();
        while let Some(line) = lines.next() {
            fragment.push('+');
            fragment.push_str(line);
            if lines.peek().is_some() {
                fragment.push('\n');
            }
        }
        self.fragments.push(fragment);
    }

    /// All fragments joined with the canonical blank-line separator.
    pub fn joined(&self) -> String {
        self.fragments.join(FRAGMENT_SEPARATOR)
    }
}
