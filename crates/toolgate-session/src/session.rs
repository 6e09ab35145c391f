use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use toolgate_types::{Message, Role};

/// One conversation's working set: the message ring the router reads plus
/// per-tool usage counters. Messages are persisted separately from the rest
/// of the state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    pub messages: Vec<Message>,
    /// Per-tool usage counter for this session
    #[serde(default)]
    pub tool_usage: HashMap<String, u64>,
    /// Distinct tools in order of most recent use, newest last
    #[serde(default)]
    pub recent_tools: Vec<String>,
    /// Summary of the archived message prefix, if any
    #[serde(default)]
    pub archive_summary: Option<String>,
}

impl Session {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
            tool_usage: HashMap::new(),
            recent_tools: Vec::new(),
            archive_summary: None,
        }
    }

    pub fn add_message(&mut self, role: Role, content: impl Into<String>) -> &Message {
        self.messages.push(Message::new(role, content));
        self.updated_at = Utc::now();
        self.messages.last().expect("just pushed")
    }

    pub fn record_tool_use(&mut self, tool_name: &str) {
        *self.tool_usage.entry(tool_name.to_string()).or_insert(0) += 1;
        self.recent_tools.retain(|t| t != tool_name);
        self.recent_tools.push(tool_name.to_string());
        self.updated_at = Utc::now();
    }

    pub fn usage_count(&self, tool_name: &str) -> u64 {
        self.tool_usage.get(tool_name).copied().unwrap_or(0)
    }

    /// The `n` most recently used distinct tools, newest last.
    pub fn recently_used(&self, n: usize) -> &[String] {
        let start = self.recent_tools.len().saturating_sub(n);
        &self.recent_tools[start..]
    }

    pub fn recent_messages(&self, n: usize) -> &[Message] {
        let start = self.messages.len().saturating_sub(n);
        &self.messages[start..]
    }

    /// Concatenated recent user/assistant messages, role-prefixed, for the
    /// router's retrieval query.
    pub fn context_for_routing(&self, n_messages: usize) -> String {
        self.recent_messages(n_messages)
            .iter()
            .filter(|m| matches!(m.role, Role::User | Role::Assistant))
            .map(|m| format!("{}: {}", m.role.as_str(), m.content))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Collapse all but the `keep_recent` newest messages into one synthetic
    /// system message. Returns the summary text, or None if nothing was
    /// archived.
    pub fn archive_messages(&mut self, keep_recent: usize) -> Option<String> {
        if self.messages.len() <= keep_recent {
            return None;
        }

        let split = self.messages.len() - keep_recent;
        let archived: Vec<Message> = self.messages.drain(..split).collect();

        let mut tools_used: Vec<&str> = archived
            .iter()
            .filter_map(|m| m.tool_name.as_deref())
            .collect();
        tools_used.sort();
        tools_used.dedup();

        let mut parts = Vec::new();
        if !tools_used.is_empty() {
            parts.push(format!("Tools used: {}", tools_used.join(", ")));
        }
        parts.push(format!("{} messages archived", archived.len()));
        let summary = parts.join(" | ");

        let mut marker = Message::new(Role::System, format!("[Archived context] {}", summary));
        // The summary stands in for the oldest history; keep it first.
        marker.timestamp = archived
            .first()
            .map(|m| m.timestamp)
            .unwrap_or(marker.timestamp);
        self.messages.insert(0, marker);
        self.archive_summary = Some(summary.clone());
        self.updated_at = Utc::now();

        Some(summary)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_for_routing_skips_system_and_tool() {
        let mut session = Session::new();
        session.add_message(Role::System, "boot");
        session.add_message(Role::User, "send an email");
        session.add_message(Role::Tool, "raw tool output");
        session.add_message(Role::Assistant, "which address?");

        let context = session.context_for_routing(10);
        assert_eq!(context, "user: send an email\nassistant: which address?");
    }

    #[test]
    fn test_context_for_routing_limits_window() {
        let mut session = Session::new();
        for i in 0..10 {
            session.add_message(Role::User, format!("message {}", i));
        }
        let context = session.context_for_routing(3);
        assert!(!context.contains("message 6"));
        assert!(context.contains("message 7"));
        assert!(context.contains("message 9"));
    }

    #[test]
    fn test_record_tool_use_counts() {
        let mut session = Session::new();
        session.record_tool_use("email.send");
        session.record_tool_use("email.send");
        assert_eq!(session.usage_count("email.send"), 2);
        assert_eq!(session.usage_count("other"), 0);
    }

    #[test]
    fn test_recently_used_ordering() {
        let mut session = Session::new();
        session.record_tool_use("a");
        session.record_tool_use("b");
        session.record_tool_use("c");
        session.record_tool_use("a");

        assert_eq!(session.recently_used(2), &["c".to_string(), "a".to_string()]);
        assert_eq!(session.recently_used(10).len(), 3);
    }

    #[test]
    fn test_archive_keeps_recent_plus_summary() {
        let mut session = Session::new();
        for i in 0..101 {
            session.add_message(Role::User, format!("message {}", i));
        }

        let summary = session.archive_messages(50).unwrap();
        assert_eq!(session.messages.len(), 51);
        assert!(summary.contains("51 messages archived"));
        assert_eq!(session.messages[0].role, Role::System);
        assert!(session.messages[0].content.contains("[Archived context]"));
        assert_eq!(session.messages.last().unwrap().content, "message 100");
    }

    #[test]
    fn test_archive_mentions_tools() {
        let mut session = Session::new();
        for i in 0..30 {
            session.add_message(Role::Tool, format!("result {}", i));
            session.messages.last_mut().unwrap().tool_name = Some("email.send".to_string());
        }

        let summary = session.archive_messages(10).unwrap();
        assert!(summary.contains("Tools used: email.send"));
    }

    #[test]
    fn test_archive_noop_under_bound() {
        let mut session = Session::new();
        session.add_message(Role::User, "hi");
        assert!(session.archive_messages(50).is_none());
        assert_eq!(session.messages.len(), 1);
    }
}
