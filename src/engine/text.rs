// ── Pilot Engine: Text Helpers ──────────────────────────────────────────────

/// Truncate to at most `max_bytes`, backing off to a char boundary.
pub fn truncate_str(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        s
    } else {
        let mut end = max_bytes;
        while end > 0 && !s.is_char_boundary(end) {
            end -= 1;
        }
        &s[..end]
    }
}

/// Split a long reply into chunks for platforms with a per-message limit.
/// Prefers newline then space boundaries.
pub fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }
    let mut chunks = Vec::new();
    let mut remaining = text;
    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }
        let window = truncate_str(remaining, max_len);
        let split_at = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .filter(|&i| i > 0)
            .unwrap_or(window.len().max(1));
        let split_at = if remaining.is_char_boundary(split_at) {
            split_at
        } else {
            remaining.char_indices().nth(1).map_or(remaining.len(), |(i, _)| i)
        };
        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_str("héllo", 2), "h");
        assert_eq!(truncate_str("abc", 10), "abc");
    }

    #[test]
    fn split_prefers_whitespace() {
        let chunks = split_message("aaaa bbbb cccc", 9);
        assert_eq!(chunks, vec!["aaaa".to_string(), "bbbb cccc".to_string()]);
    }

    #[test]
    fn split_handles_multibyte() {
        let text = "é".repeat(10);
        let chunks = split_message(&text, 5);
        assert!(chunks.iter().all(|c| c.len() <= 5));
        assert_eq!(chunks.concat(), text);
    }
}
