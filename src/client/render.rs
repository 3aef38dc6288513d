use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref CODE_FENCE: Regex = Regex::new(r"(?s)```(\w+)?\n(.*?)```").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Code {
        language: String,
        code: String,
    },
}

/// Splits assistant text into prose and fenced code blocks, in order.
pub fn parse_segments(text: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut last = 0;

    for caps in CODE_FENCE.captures_iter(text) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        push_text(&mut segments, &text[last..whole.start()]);
        segments.push(Segment::Code {
            language: caps.get(1).map_or("text", |m| m.as_str()).to_string(),
            code: caps.get(2).map_or("", |m| m.as_str()).to_string(),
        });
        last = whole.end();
    }

    if last == 0 {
        return vec![Segment::Text(text.to_string())];
    }
    push_text(&mut segments, &text[last..]);
    segments
}

fn push_text(segments: &mut Vec<Segment>, text: &str) {
    if !text.trim().is_empty() {
        segments.push(Segment::Text(text.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_one_segment() {
        assert_eq!(parse_segments("just words"), vec![Segment::Text("just words".into())]);
        assert_eq!(parse_segments(""), vec![Segment::Text(String::new())]);
    }

    #[test]
    fn splits_prose_and_code() {
        let text = "Here:\n```rust\nfn main() {}\n```\nDone.";
        assert_eq!(
            parse_segments(text),
            vec![
                Segment::Text("Here:\n".into()),
                Segment::Code { language: "rust".into(), code: "fn main() {}\n".into() },
                Segment::Text("\nDone.".into())
            ]
        );
    }

    #[test]
    fn missing_language_defaults_to_text() {
        let segments = parse_segments("```\nls -la\n```");
        assert_eq!(segments, vec![Segment::Code { language: "text".into(), code: "ls -la\n".into() }]);
    }

    #[test]
    fn whitespace_between_fences_is_dropped() {
        let segments = parse_segments("```a\n1\n```\n\n```b\n2\n```");
        assert_eq!(segments.len(), 2);
        assert!(segments.iter().all(|s| matches!(s, Segment::Code { .. })));
    }

    #[test]
    fn unterminated_fence_stays_text() {
        let text = "partial ```py\nprint(1)";
        assert_eq!(parse_segments(text), vec![Segment::Text(text.into())]);
    }
}
