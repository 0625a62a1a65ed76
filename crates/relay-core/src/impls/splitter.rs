//! ParagraphSplitter - 空行区切りで description を分割

use crate::ports::TaskSplitter;

/// Splits on blank lines; each non-empty paragraph becomes one sub-task.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParagraphSplitter;

impl TaskSplitter for ParagraphSplitter {
    fn split(&self, description: &str) -> Vec<String> {
        let mut parts = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        for line in description.lines() {
            if line.trim().is_empty() {
                if !current.is_empty() {
                    parts.push(current.join("\n"));
                    current.clear();
                }
            } else {
                current.push(line.trim_end());
            }
        }
        if !current.is_empty() {
            parts.push(current.join("\n"));
        }
        parts
    }
}
