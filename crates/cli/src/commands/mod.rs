pub mod health;
pub mod onboard;
pub mod optimize;
pub mod pricing;
pub mod profile;

use std::path::Path;

use serde::Deserialize;
use tokenwise_agent::RetrievedDocument;
use tokenwise_core::{Message, Role};

/// One message in a history file.
#[derive(Debug, Deserialize)]
struct HistoryEntry {
    role: Role,
    content: String,
}

/// Read a JSON array of `{"role", "content"}` objects.
pub fn read_history(path: &Path) -> Result<Vec<Message>, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
    let messages = parse_history(&raw)
        .map_err(|e| format!("invalid history file {}: {e}", path.display()))?;
    tracing::debug!(path = %path.display(), messages = messages.len(), "Loaded history");
    Ok(messages)
}

/// Read a JSON array of `{"title", "content", "metadata"}` documents.
pub fn read_documents(path: &Path) -> Result<Vec<RetrievedDocument>, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
    let documents: Vec<RetrievedDocument> = serde_json::from_str(&raw)
        .map_err(|e| format!("invalid documents file {}: {e}", path.display()))?;
    tracing::debug!(path = %path.display(), documents = documents.len(), "Loaded documents");
    Ok(documents)
}

fn parse_history(raw: &str) -> Result<Vec<Message>, serde_json::Error> {
    let entries: Vec<HistoryEntry> = serde_json::from_str(raw)?;
    Ok(entries
        .into_iter()
        .map(|e| Message::new(e.role, e.content))
        .collect())
}
