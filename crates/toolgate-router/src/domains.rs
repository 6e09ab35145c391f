use once_cell::sync::Lazy;

/// Keyword table for coarse domain detection over the routing context.
static DOMAIN_KEYWORDS: Lazy<Vec<(&'static str, Vec<&'static str>)>> = Lazy::new(|| {
    vec![
        ("email", vec!["email", "mail", "inbox", "send", "reply", "forward", "gmail", "outlook"]),
        ("calendar", vec!["calendar", "schedule", "meeting", "event", "appointment", "book", "time"]),
        ("code", vec!["code", "git", "github", "commit", "branch", "pull request", "merge", "repo"]),
        ("files", vec!["file", "document", "folder", "drive", "upload", "download", "save", "open"]),
        ("database", vec!["database", "sql", "query", "table", "insert", "update", "delete", "db"]),
        ("web", vec!["browse", "search", "website", "url", "fetch", "scrape", "http"]),
        ("finance", vec!["pay", "invoice", "charge", "refund", "stripe", "payment", "transaction"]),
        ("communication", vec!["slack", "message", "chat", "notify", "alert", "send"]),
    ]
});

/// Domains whose keywords appear in the context, in table order.
pub fn detect_domains(context: &str) -> Vec<&'static str> {
    let lower = context.to_lowercase();
    DOMAIN_KEYWORDS
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(domain, _)| *domain)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_email_domain() {
        let domains = detect_domains("Send an email to my boss");
        assert!(domains.contains(&"email"));
    }

    #[test]
    fn test_detects_multiple_domains() {
        let domains = detect_domains("schedule a meeting and notify the team on slack");
        assert!(domains.contains(&"calendar"));
        assert!(domains.contains(&"communication"));
    }

    #[test]
    fn test_no_domains_in_neutral_text() {
        assert!(detect_domains("the weather is nice today").is_empty());
    }

    #[test]
    fn test_multiword_keyword() {
        let domains = detect_domains("open a pull request please");
        assert!(domains.contains(&"code"));
    }
}
