//! Output formatting for streamed messages

use logstream_core::{Message, MessageKind};

/// Render one message for stdout
///
/// In JSON mode every message is printed as one compact JSON object.
/// Otherwise protocol chatter (`pong`, subscription acknowledgements) is
/// suppressed and everything else becomes a single human-readable line.
pub fn format_message(message: &Message, json: bool) -> Option<String> {
    if json {
        return Some(serde_json::to_string(message).unwrap_or_else(|_| message.display_line()));
    }

    let kind = message.kind();
    if kind.is_control() {
        return None;
    }

    let line = message.display_line();
    let line = line.trim_end_matches(['\r', '\n']);
    match kind {
        MessageKind::Generic | MessageKind::Log => Some(line.to_string()),
        MessageKind::Error => Some(format!("[error] {line}")),
        _ => Some(format!("[{}] {line}", message.message_type)),
    }
}
