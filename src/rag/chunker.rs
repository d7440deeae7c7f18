//! Overlapping character-window chunker.
//!
//! Windows are `chunk_size` characters long. Inside the last 20% of a window
//! the chunker looks for a paragraph break, then a sentence end, and cuts
//! there; otherwise it cuts hard at the window edge. The next window starts
//! `overlap` characters before the previous cut, so no text at a boundary is
//! lost and the input can be rebuilt from the chunks.

use serde::Serialize;

use crate::core::config::ChunkingSettings;
use crate::core::errors::RagError;

const SENTENCE_TERMINATORS: [char; 6] = ['.', '!', '?', '。', '！', '？'];

/// A chunk of text with its position in the source document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextChunk {
    /// Zero-based position within the document.
    pub index: usize,
    /// Character offset (inclusive) in the original text.
    pub start: usize,
    /// Character offset (exclusive) in the original text.
    pub end: usize,
    pub text: String,
}

#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
}

impl Chunker {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self, RagError> {
        if chunk_size == 0 {
            return Err(RagError::configuration("chunk_size must be greater than zero"));
        }
        if overlap >= chunk_size {
            return Err(RagError::Configuration(format!(
                "overlap ({}) must be smaller than chunk_size ({})",
                overlap, chunk_size
            )));
        }
        Ok(Self { chunk_size, overlap })
    }

    pub fn from_settings(settings: &ChunkingSettings) -> Result<Self, RagError> {
        Self::new(settings.chunk_size, settings.overlap)
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    pub fn split(&self, text: &str) -> Vec<TextChunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();
        let mut chunks = Vec::new();
        let mut start = 0;

        loop {
            let limit = (start + self.chunk_size).min(total);
            let end = if limit == total {
                total
            } else {
                self.find_cut(&chars, start, limit).unwrap_or(limit)
            };

            chunks.push(TextChunk {
                index: chunks.len(),
                start,
                end,
                text: chars[start..end].iter().collect(),
            });

            if end == total {
                break;
            }
            start = end - self.overlap;
        }

        chunks
    }

    /// Best cut position (exclusive end) within the lookback window, if any.
    fn find_cut(&self, chars: &[char], start: usize, limit: usize) -> Option<usize> {
        let lookback = (self.chunk_size / 5).max(1);
        // Keep the window longer than the overlap so the next start advances.
        let earliest = (limit.saturating_sub(lookback)).max(start + self.overlap + 1);
        if earliest > limit {
            return None;
        }

        let paragraph = (earliest..=limit)
            .rev()
            .find(|&pos| pos >= 2 && chars[pos - 1] == '\n' && chars[pos - 2] == '\n');
        if paragraph.is_some() {
            return paragraph;
        }

        (earliest..=limit).rev().find(|&pos| {
            SENTENCE_TERMINATORS.contains(&chars[pos - 1])
                && chars.get(pos).map_or(true, |next| next.is_whitespace())
        })
    }
}

/// Split `text` into overlapping chunks of at most `chunk_size` characters.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<TextChunk>, RagError> {
    Ok(Chunker::new(chunk_size, overlap)?.split(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reassemble(chunks: &[TextChunk], overlap: usize) -> String {
        let mut text = String::new();
        for (i, chunk) in chunks.iter().enumerate() {
            if i == 0 {
                text.push_str(&chunk.text);
            } else {
                text.extend(chunk.text.chars().skip(overlap));
            }
        }
        text
    }

    fn unpunctuated(len: usize) -> String {
        "lorem ipsum dolor sit amet consectetur "
            .chars()
            .cycle()
            .take(len)
            .collect()
    }

    #[test]
    fn rejects_invalid_parameters() {
        assert!(matches!(
            chunk_text("abc", 0, 0),
            Err(RagError::Configuration(_))
        ));
        assert!(matches!(
            chunk_text("abc", 100, 100),
            Err(RagError::Configuration(_))
        ));
        assert!(matches!(
            chunk_text("abc", 100, 150),
            Err(RagError::Configuration(_))
        ));
    }

    #[test]
    fn blank_input_produces_no_chunks() {
        assert!(chunk_text("", 100, 10).unwrap().is_empty());
        assert!(chunk_text("  \n\t \n", 100, 10).unwrap().is_empty());
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        let chunks = chunk_text("One short note.", 100, 10).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "One short note.");
        assert_eq!((chunks[0].start, chunks[0].end), (0, 15));
    }

    #[test]
    fn five_thousand_chars_with_hard_cuts() {
        let text = unpunctuated(5000);
        let chunks = chunk_text(&text, 1000, 200).unwrap();

        // ceil((5000 - 200) / 800) windows when no boundary is found.
        assert_eq!(chunks.len(), 6);
        for chunk in &chunks {
            assert!(chunk.text.chars().count() <= 1000);
        }
        for pair in chunks.windows(2) {
            let tail: String = pair[0].text.chars().skip(pair[0].text.chars().count() - 200).collect();
            let head: String = pair[1].text.chars().take(200).collect();
            assert_eq!(tail, head);
        }
        assert_eq!(chunks.last().unwrap().end, 5000);
    }

    #[test]
    fn prefers_sentence_boundaries() {
        let text: String = (0..200)
            .map(|i| format!("Sentence number {i} talks about the budget. "))
            .collect();
        let chunks = chunk_text(&text, 500, 50).unwrap();

        assert!(chunks.len() > 1);
        for chunk in &chunks[..chunks.len() - 1] {
            assert!(chunk.text.ends_with('.'), "chunk {} ends mid-sentence", chunk.index);
            assert!(chunk.text.chars().count() <= 500);
        }
    }

    #[test]
    fn prefers_paragraph_over_sentence_break() {
        let mut text = "a".repeat(85);
        text.push_str("\n\n");
        text.push_str("Next part. More words here. ");
        text.push_str(&"b".repeat(200));
        let chunks = chunk_text(&text, 100, 10).unwrap();

        assert!(chunks[0].text.ends_with("\n\n"));
        assert_eq!(chunks[0].end, 87);
    }

    #[test]
    fn round_trip_reconstructs_input() {
        let text: String = (0..120)
            .map(|i| match i % 3 {
                0 => format!("Paragraph {i} opens the section.\n\n"),
                1 => format!("Item {i}: the council approved the motion! "),
                _ => format!("会議の議事録 {i}。"),
            })
            .collect();

        for (size, overlap) in [(200, 0), (300, 40), (512, 128), (1000, 200)] {
            let chunks = chunk_text(&text, size, overlap).unwrap();
            assert_eq!(reassemble(&chunks, overlap), text, "size={size} overlap={overlap}");
            for (i, chunk) in chunks.iter().enumerate() {
                assert_eq!(chunk.index, i);
            }
        }
    }

    #[test]
    fn chunking_is_deterministic() {
        let text = unpunctuated(3210) + ". Closing remarks follow.";
        let first = chunk_text(&text, 700, 120).unwrap();
        let second = chunk_text(&text, 700, 120).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn counts_characters_not_bytes() {
        let text = "é".repeat(250);
        let chunks = chunk_text(&text, 100, 20).unwrap();
        assert!(chunks.iter().all(|c| c.text.chars().count() <= 100));
        assert_eq!(reassemble(&chunks, 20), text);
    }
}
