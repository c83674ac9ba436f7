//! System prompt injection
//!
//! Guarantees that a configured system prompt sits at position 0 of the
//! conversation sent upstream.

use super::{Message, Role};

/// Ensure `messages[0]` is the configured system prompt
///
/// - No prompt (or an empty one): `messages` is returned untouched.
/// - Empty conversation: a single system message is returned.
/// - Leading system message: its content is replaced.
/// - Otherwise: a system message is prepended.
///
/// When a prompt is applied, system messages after position 0 are removed so the
/// injected prompt is the only instruction the backend sees. The relative order of
/// every other message is preserved.
pub fn inject(mut messages: Vec<Message>, system_prompt: Option<&str>) -> Vec<Message> {
    let Some(prompt) = system_prompt.filter(|p| !p.is_empty()) else {
        return messages;
    };

    match messages.first_mut() {
        Some(first) if first.role() == Role::System => first.set_content(prompt),
        _ => messages.insert(0, Message::system(prompt)),
    }

    let mut position = 0;
    messages.retain(|message| {
        let keep = position == 0 || message.role() != Role::System;
        position += 1;
        keep
    });

    messages
}
