//! Prompt assembly.
//!
//! Every turn the model sees, in order:
//! 1. the base system prompt, extended with a transcript of other agents'
//!    recent ring entries
//! 2. this agent's own history
//! 3. the new user turn

use agentbus_core::message::Turn;
use agentbus_core::ring::RingEntry;

/// Header placed between the base prompt and the shared transcript.
pub const SHARED_CONTEXT_HEADER: &str = "Recent activity from other agents:";

/// Append the `[agentId/role]: content` transcript of `context` to `base`.
///
/// With no context the base prompt is returned unchanged.
pub fn build_system_prompt(base: &str, context: &[RingEntry]) -> String {
    if context.is_empty() {
        return base.to_string();
    }
    let transcript: Vec<String> = context.iter().map(RingEntry::transcript_line).collect();
    format!("{base}\n\n{SHARED_CONTEXT_HEADER}\n{}", transcript.join("\n"))
}

pub fn assemble_turns(system_prompt: String, history: &[Turn], content: &str) -> Vec<Turn> {
    let mut turns = Vec::with_capacity(history.len() + 2);
    turns.push(Turn::system(system_prompt));
    turns.extend_from_slice(history);
    turns.push(Turn::user(content));
    turns
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentbus_core::message::Role;
    use agentbus_core::ring::MAX_CONTENT_CHARS;

    #[test]
    fn no_context_keeps_base_prompt() {
        assert_eq!(build_system_prompt("Be brief.", &[]), "Be brief.");
    }

    #[test]
    fn context_is_appended_in_order() {
        let entries = vec![
            RingEntry::new("a2", Turn::user("find flights"), MAX_CONTENT_CHARS),
            RingEntry::new("a2", Turn::assistant("found 3\nflights"), MAX_CONTENT_CHARS),
        ];
        let prompt = build_system_prompt("Be brief.", &entries);
        assert_eq!(
            prompt,
            "Be brief.\n\nRecent activity from other agents:\n\
             [a2/user]: find flights\n\
             [a2/assistant]: found 3 flights"
        );
    }

    #[test]
    fn turns_are_system_history_user() {
        let history = vec![Turn::user("hi"), Turn::assistant("hello")];
        let turns = assemble_turns("sys".into(), &history, "again");
        let roles: Vec<Role> = turns.iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant, Role::User]);
        assert_eq!(turns.last().unwrap().content, "again");
    }
}
