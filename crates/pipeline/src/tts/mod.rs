//! Text-to-speech
//!
//! Replies are split into sentences and synthesized one by one, so the first
//! sentence can start playing while the rest are still being produced.

mod http;

pub use http::{HttpSynthesisClient, SynthesisConfig};

/// Sentence-final punctuation, full width and ASCII
const SENTENCE_DELIMITERS: [char; 6] = ['。', '！', '？', '.', '!', '?'];

fn is_delimiter(c: char) -> bool {
    SENTENCE_DELIMITERS.contains(&c)
}

/// Split a reply into sentences for incremental synthesis
///
/// Each segment keeps its trailing punctuation; runs like `?!` or `...`
/// stay together. A `.` between two digits is part of a number, not a
/// sentence end. Segments are trimmed; blank or punctuation-only ones are
/// dropped.
pub fn split_segments(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        current.push(c);

        let decimal_point = c == '.'
            && i > 0
            && chars[i - 1].is_ascii_digit()
            && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit());

        if is_delimiter(c) && !decimal_point {
            while let Some(&next) = chars.get(i + 1) {
                if !is_delimiter(next) {
                    break;
                }
                current.push(next);
                i += 1;
            }
            push_segment(&mut segments, &mut current);
        }
        i += 1;
    }
    push_segment(&mut segments, &mut current);

    segments
}

fn push_segment(segments: &mut Vec<String>, current: &mut String) {
    let segment = current.trim();
    if segment.chars().any(|c| !c.is_whitespace() && !is_delimiter(c)) {
        segments.push(segment.to_string());
    }
    current.clear();
}
