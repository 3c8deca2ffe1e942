//! Merge-by-identity of message sequences.
//!
//! A later message with an `id` already present replaces the earlier entry in
//! its slot; unseen ids are appended in arrival order. Identities are never
//! invented here.

use crate::message::{Message, MessageBatch};

/// Merges `incoming` onto `base` and returns the combined sequence.
///
/// Absent arguments are treated as empty.
pub fn merge(base: Option<&MessageBatch>, incoming: Option<&MessageBatch>) -> Vec<Message> {
    let mut merged = base.map(|b| b.messages().to_vec()).unwrap_or_default();
    if let Some(incoming) = incoming {
        merge_into(&mut merged, incoming.messages());
    }
    merged
}

/// In-place form of [`merge`].
///
/// Linear scan per incoming message; fine at conversation scale.
pub fn merge_into(messages: &mut Vec<Message>, incoming: &[Message]) {
    for message in incoming {
        match messages.iter_mut().find(|existing| existing.id == message.id) {
            Some(slot) => *slot = message.clone(),
            None => messages.push(message.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageContent;
    use std::collections::HashSet;

    fn ai(id: &str, text: &str) -> Message {
        Message::ai(id, text)
    }

    fn ids(messages: &[Message]) -> Vec<&str> {
        messages.iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn replaces_in_place() {
        let base = MessageBatch::from(vec![ai("1", "a")]);
        let incoming = MessageBatch::from(vec![ai("1", "ab")]);
        assert_eq!(merge(Some(&base), Some(&incoming)), vec![ai("1", "ab")]);
    }

    #[test]
    fn appends_new_ids() {
        let base = MessageBatch::from(vec![ai("1", "")]);
        let incoming = MessageBatch::from(vec![ai("2", "")]);
        assert_eq!(
            ids(&merge(Some(&base), Some(&incoming))),
            vec!["1", "2"]
        );
    }

    #[test]
    fn replacement_is_whole_message() {
        let base = MessageBatch::from(vec![
            ai("1", "calling").with_tool_calls(vec![]),
        ]);
        let incoming = MessageBatch::from(vec![ai("1", "done")]);
        let merged = merge(Some(&base), Some(&incoming));
        assert_eq!(merged[0].tool_calls, None);
        assert_eq!(merged[0].content, Some(MessageContent::Text("done".into())));
    }

    #[test]
    fn merging_a_sequence_with_itself_is_identity() {
        let a = MessageBatch::from(vec![ai("1", "x"), ai("2", "y"), ai("3", "z")]);
        assert_eq!(merge(Some(&a), Some(&a)), a.messages());
    }

    #[test]
    fn absent_arguments_are_empty() {
        let a = MessageBatch::from(vec![ai("1", "x")]);
        assert!(merge(None, None).is_empty());
        assert_eq!(merge(Some(&a), None), a.messages());
        assert_eq!(merge(None, Some(&a)), a.messages());
    }

    #[test]
    fn wrapped_and_bare_batches_merge_alike() {
        let base = MessageBatch::Wrapped {
            messages: vec![ai("1", "a")],
        };
        let incoming = MessageBatch::from(vec![ai("2", "b"), ai("1", "a2")]);
        assert_eq!(
            merge(Some(&base), Some(&incoming)),
            vec![ai("1", "a2"), ai("2", "b")]
        );
    }

    #[test]
    fn duplicate_ids_inside_incoming_collapse_to_last() {
        let incoming = MessageBatch::from(vec![ai("1", "a"), ai("2", "b"), ai("1", "c")]);
        assert_eq!(
            merge(None, Some(&incoming)),
            vec![ai("1", "c"), ai("2", "b")]
        );
    }

    #[test]
    fn identity_and_order_hold_over_mixed_batches() {
        let base = vec![ai("a", "1"), ai("b", "1"), ai("c", "1"), ai("d", "1")];
        let incoming = vec![ai("c", "2"), ai("e", "1"), ai("a", "2"), ai("f", "1")];
        let merged = merge(
            Some(&MessageBatch::from(base.clone())),
            Some(&MessageBatch::from(incoming.clone())),
        );

        let unique: HashSet<&str> = merged.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(unique.len(), merged.len());
        let expected: HashSet<&str> = base
            .iter()
            .chain(incoming.iter())
            .map(|m| m.id.as_str())
            .collect();
        assert_eq!(unique, expected);

        // untouched entries keep their relative order, new ones land at the end
        assert_eq!(ids(&merged), vec!["a", "b", "c", "d", "e", "f"]);
        assert_eq!(merged[0].text(), "2");
        assert_eq!(merged[2].text(), "2");
        assert_eq!(merged[1].text(), "1");
    }
}
