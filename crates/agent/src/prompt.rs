//! Per-turn prompt construction.
//!
//! The model never sees conversation history. Every turn gets the system
//! prompt, the question, the compressed report R_t and the latest
//! observation summary O_t, and nothing else.

use veritas_core::message::Message;

pub const SYSTEM_PROMPT: &str = "\
You are a careful research agent. Answer the question using evidence you gather with tools.

Rules:
- Look locally first: search the code and read files before reaching for papers or delegates.
- Every factual claim must cite its evidence as path:line (or path:start-end) or as a URL.
- A claim needs two independent sources, or a definition site plus a usage site, to count as verified.
- To call a tool, reply with JSON: {\"tool\": \"<name>\", \"parameters\": {...}}. Several calls may appear in one reply; they run in order.
- The report below is all you remember from earlier turns. Do not repeat searches it already covers.
- When you are done, reply with a line starting with \"Final Answer:\" followed by the answer and its citations.
- If sources disagree, say so explicitly and cite both sides.";

/// Messages for one turn. Empty report and observation sections are omitted.
pub fn build_messages(
    system: &str,
    question: &str,
    report: &str,
    observation: &str,
    remaining_budget: u32,
) -> Vec<Message> {
    let mut messages = vec![
        Message::system(system),
        Message::user(format!(
            "Question: {question}\n\nTool calls remaining: {remaining_budget}"
        )),
    ];
    if !report.trim().is_empty() {
        messages.push(Message::user(format!("Report so far:\n{report}")));
    }
    if !observation.trim().is_empty() {
        messages.push(Message::user(format!("Latest observations:\n{observation}")));
    }
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use veritas_core::message::Role;

    #[test]
    fn first_turn_has_only_system_and_question() {
        let msgs = build_messages(SYSTEM_PROMPT, "Where is retry configured?", "", "  ", 128);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].role, Role::System);
        assert!(msgs[1].content.starts_with("Question: Where is retry configured?"));
        assert!(msgs[1].content.ends_with("Tool calls remaining: 128"));
    }

    #[test]
    fn report_and_observation_follow_the_question() {
        let msgs = build_messages("sys", "q", "- [verified] a (x.rs:1)", "search_code: 3 hits", 5);
        assert_eq!(msgs.len(), 4);
        assert!(msgs[2].content.starts_with("Report so far:\n- [verified]"));
        assert!(msgs[3].content.starts_with("Latest observations:\n"));
        assert!(msgs.iter().skip(1).all(|m| m.role == Role::User));
    }

    #[test]
    fn system_prompt_names_the_protocol() {
        assert!(SYSTEM_PROMPT.contains("Final Answer:"));
        assert!(SYSTEM_PROMPT.contains("\"tool\""));
        assert!(SYSTEM_PROMPT.contains("path:line"));
    }
}
