//! Upstream message assembly from a loaded [`ChatContext`].

use cs_domain::tool::Message;
use cs_domain::turn::{ChatContext, TurnRole};

const MEMORY_HEADER: &str = "Things you remember about the user:";

/// System prompt followed by the memory block (when any snippets exist).
pub fn system_message(ctx: &ChatContext, snippet_limit: usize) -> Message {
    let snippets: Vec<&str> = ctx
        .memory_snippets
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .take(snippet_limit)
        .collect();

    if snippets.is_empty() {
        return Message::system(ctx.system_prompt.clone());
    }

    let mut text = ctx.system_prompt.trim_end().to_string();
    text.push_str("\n\n");
    text.push_str(MEMORY_HEADER);
    for snippet in snippets {
        text.push_str("\n- ");
        text.push_str(snippet);
    }
    Message::system(text)
}

/// Replay prior turns then append the new user message.
pub fn build_messages(ctx: &ChatContext, user_content: &str, snippet_limit: usize) -> Vec<Message> {
    let mut messages = Vec::with_capacity(ctx.prior_turns.len() + 2);
    messages.push(system_message(ctx, snippet_limit));

    for turn in &ctx.prior_turns {
        match turn.role {
            TurnRole::User => messages.push(Message::user(turn.content.clone())),
            TurnRole::Assistant => {
                let calls = turn.parsed_tool_calls();
                if calls.is_empty() {
                    messages.push(Message::assistant(turn.content.clone()));
                } else {
                    messages.push(Message::assistant_with_tools(&turn.content, &calls));
                }
            }
            TurnRole::Tool => match &turn.tool_call_id {
                Some(id) => messages.push(Message::tool_result(id.clone(), turn.content.clone())),
                None => tracing::debug!("skipping tool turn without a tool_call_id"),
            },
        }
    }

    messages.push(Message::user(user_content));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use cs_domain::tool::{ContentPart, MessageContent, Role, ToolCall};
    use cs_domain::turn::ConversationTurn;
    use serde_json::json;

    fn ctx() -> ChatContext {
        ChatContext {
            system_prompt: "You are helpful.".into(),
            ..Default::default()
        }
    }

    #[test]
    fn memory_block_follows_prompt() {
        let mut c = ctx();
        c.memory_snippets = vec!["Name is Sam".into(), " ".into(), "Likes tea".into()];
        let msg = system_message(&c, 10);
        assert_eq!(
            msg.content.text(),
            Some("You are helpful.\n\nThings you remember about the user:\n- Name is Sam\n- Likes tea")
        );
    }

    #[test]
    fn snippet_limit_applies() {
        let mut c = ctx();
        c.memory_snippets = vec!["a".into(), "b".into(), "c".into()];
        let msg = system_message(&c, 1);
        assert!(msg.content.extract_all_text().ends_with("- a"));
    }

    #[test]
    fn no_snippets_means_plain_prompt() {
        assert_eq!(system_message(&ctx(), 10).content.text(), Some("You are helpful."));
    }

    #[test]
    fn prior_turns_replay_in_order() {
        let call = ToolCall::new("call_1", "calculator", json!({"expression": "1+1"}));
        let mut c = ctx();
        c.prior_turns = vec![
            ConversationTurn::user("what is 1+1"),
            ConversationTurn::assistant("", "", &[call]).unwrap(),
            ConversationTurn::tool("call_1", "calculator", "1+1 = 2"),
            ConversationTurn::assistant("It is 2.", "", &[]).unwrap(),
        ];
        let messages = build_messages(&c, "thanks", 10);

        let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::Tool, Role::Assistant, Role::User]
        );
        match &messages[2].content {
            MessageContent::Parts(parts) => {
                assert!(matches!(&parts[0], ContentPart::ToolUse { id, .. } if id == "call_1"));
            }
            MessageContent::Text(_) => panic!("expected tool-use parts"),
        }
        assert_eq!(messages[5].content.text(), Some("thanks"));
    }
}
