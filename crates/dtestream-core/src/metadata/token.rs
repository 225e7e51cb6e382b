use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::error::{StreamError, StreamResult};

#[derive(Deserialize)]
struct TokenFile {
    user_key: String,
}

/// Read a bearer token from disk. Accepts either a JSON document with a `user_key`
/// field on its first line or a file holding the bare token.
pub fn load_token(path: &Path) -> StreamResult<String> {
    let content = std::fs::read_to_string(path)?;
    let first_line = content.lines().next().unwrap_or_default().trim();

    let token = if first_line.starts_with('{') {
        let parsed: TokenFile = serde_json::from_str(first_line).map_err(|e| {
            StreamError::InvalidMetadata(format!("token file {}: {e}", path.display()))
        })?;
        parsed.user_key
    } else {
        first_line.to_string()
    };

    if token.is_empty() {
        return Err(StreamError::InvalidMetadata(format!(
            "token file {} is empty",
            path.display()
        )));
    }

    debug!(?path, "loaded bearer token");
    Ok(token)
}
