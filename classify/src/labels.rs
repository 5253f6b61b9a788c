use std::fs;
use std::path::Path;

use crate::errors::*;

/// Loads a label table, one label per line, in class index order.
pub fn load_labels(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| ClassifyError::Resource(format!("reading labels from {path:?}")))?;
    let labels = parse_labels(&content);
    if labels.is_empty() {
        bail!(ClassifyError::InvalidArgument(format!("no labels in {path:?}")))
    }
    debug!("loaded {} labels from {:?}", labels.len(), path);
    Ok(labels)
}

pub fn parse_labels(content: &str) -> Vec<String> {
    let mut labels: Vec<String> =
        content.lines().map(|l| l.trim_end_matches('\r').to_string()).collect();
    while labels.last().is_some_and(|l| l.trim().is_empty()) {
        labels.pop();
    }
    labels
}
