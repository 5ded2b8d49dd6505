//! Per-channel reply formatting.

pub const TELEGRAM_MAX_CHARS: usize = 4096;
pub const PUSH_MAX_CHARS: usize = 1024;

/// Split (and for some channels, simplify) a reply into sendable chunks.
///
/// Whitespace-only input yields no chunks.
pub fn format_reply(channel_type: &str, text: &str) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    match channel_type {
        "telegram" => chunk(text, TELEGRAM_MAX_CHARS),
        "push" => chunk(&strip_markdown(text), PUSH_MAX_CHARS),
        _ => vec![text.to_string()],
    }
}

/// Split into pieces of at most `max` chars, preferring line breaks, then
/// spaces, then a hard cut.
fn chunk(text: &str, max: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut rest = text;
    while rest.chars().count() > max {
        let hard = rest
            .char_indices()
            .nth(max)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let window = &rest[..hard];
        let cut = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .filter(|&i| i > 0)
            .unwrap_or(hard);
        let (head, tail) = rest.split_at(cut);
        chunks.push(head.trim_end().to_string());
        rest = tail.trim_start();
    }
    if !rest.is_empty() {
        chunks.push(rest.to_string());
    }
    chunks
}

/// Drop the markdown markers that push clients would show literally.
fn strip_markdown(text: &str) -> String {
    let mut out = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") {
            continue;
        }
        let line = strip_heading(trimmed);
        let line = line.replace("**", "").replace("__", "").replace('`', "");
        out.push(unlink(&line));
    }
    out.join("\n")
}

/// `## Title` → `Title`. A `#` run glued to text (`#hashtag`) is kept.
fn strip_heading(line: &str) -> &str {
    let body = line.trim_start_matches('#');
    if body.len() < line.len() && (body.is_empty() || body.starts_with([' ', '\t'])) {
        body.trim_start()
    } else {
        line
    }
}

/// `[label](url)` → `label (url)`.
fn unlink(line: &str) -> String {
    let mut result = String::with_capacity(line.len());
    let mut rest = line;
    while let Some(open) = rest.find('[') {
        let after = &rest[open + 1..];
        let Some(close) = after.find("](") else {
            break;
        };
        let Some(end) = after[close + 2..].find(')') else {
            break;
        };
        let label = &after[..close];
        let url = &after[close + 2..close + 2 + end];
        result.push_str(&rest[..open]);
        result.push_str(&format!("{label} ({url})"));
        rest = &after[close + 2 + end + 1..];
    }
    result.push_str(rest);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_reply_is_one_chunk() {
        assert_eq!(format_reply("telegram", "  hi  "), vec!["hi".to_string()]);
        assert!(format_reply("telegram", "   ").is_empty());
    }

    #[test]
    fn test_telegram_chunks_respect_limit() {
        let line = "x".repeat(100);
        let text = vec![line; 90].join("\n");
        let chunks = format_reply("telegram", &text);
        assert!(chunks.len() >= 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= TELEGRAM_MAX_CHARS));
        assert!(chunks.iter().all(|c| !c.starts_with('\n')));
    }

    #[test]
    fn test_hard_cut_without_whitespace() {
        let text = "é".repeat(2500);
        let chunks = format_reply("push", &text);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].chars().count(), PUSH_MAX_CHARS);
    }

    #[test]
    fn test_push_strips_markdown() {
        let text = "# Title\n**bold** and `code`\n```\nlet x = 1;\n```\nsee [docs](https://x.dev)";
        let chunks = format_reply("push", text);
        assert_eq!(
            chunks,
            vec!["Title\nbold and code\nlet x = 1;\nsee docs (https://x.dev)".to_string()]
        );
    }

    #[test]
    fn test_push_keeps_hashtags() {
        let text = "## Heading\n#hashtag stays\n###\n  # indented";
        assert_eq!(
            format_reply("push", text),
            vec!["Heading\n#hashtag stays\n\nindented".to_string()]
        );
    }

    #[test]
    fn test_webchat_passes_through() {
        let text = "**keep** markdown";
        assert_eq!(format_reply("webchat", text), vec![text.to_string()]);
    }
}
