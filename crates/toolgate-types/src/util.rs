use serde_json::Value;
use sha2::{Digest, Sha256};

/// First 16 hex chars of the SHA-256 of `content`. Used for stable vector
/// ids and privacy-preserving query hashes.
pub fn short_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hex[..16].to_string()
}

/// Rough token count for a JSON schema: serialized length over four.
/// Good enough for budgeting; the router only needs relative sizes.
pub fn estimate_schema_tokens(schema: &Value) -> usize {
    let serialized = schema.to_string();
    serialized.len().div_ceil(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_short_hash_stable() {
        let a = short_hash("send an email to my boss");
        let b = short_hash("send an email to my boss");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_short_hash_distinguishes() {
        assert_ne!(short_hash("query a"), short_hash("query b"));
    }

    #[test]
    fn test_estimate_schema_tokens() {
        assert_eq!(estimate_schema_tokens(&json!({})), 1);
        let schema = json!({"type": "object", "properties": {"to": {"type": "string"}}});
        let estimate = estimate_schema_tokens(&schema);
        assert!(estimate >= 10);
    }
}
