use crate::error::IngestError;
use crate::models::{Chunk, PageDocument};

/// Split points tried in order before falling back to character boundaries.
pub const SEPARATORS: [&str; 4] = ["\n\n", "\n", ". ", " "];

/// Sizes are counted in characters, not bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.chunk_size == 0 {
            return Err(IngestError::InvalidConfig(
                "chunk_size must be at least 1".to_string(),
            ));
        }
        if self.overlap >= self.chunk_size {
            return Err(IngestError::InvalidConfig(format!(
                "overlap ({}) must be smaller than chunk_size ({})",
                self.overlap, self.chunk_size
            )));
        }
        Ok(())
    }

    /// New characters each window may add after the carried overlap.
    fn stride(&self) -> usize {
        self.chunk_size.saturating_sub(self.overlap).max(1)
    }
}

pub fn chunk_pages(
    pages: &[PageDocument],
    config: ChunkingConfig,
) -> Result<Vec<Chunk>, IngestError> {
    config.validate()?;

    let mut chunks = Vec::new();
    for page in pages {
        let texts = split_text(&page.text, config);
        chunks.extend(texts.into_iter().enumerate().map(|(chunk_index, text)| Chunk {
            text,
            source: page.source.clone(),
            page: page.page,
            chunk_index,
        }));
    }

    Ok(chunks)
}

/// Splits one page of text. Consecutive windows share exactly
/// `config.overlap` characters. Expects a validated config.
pub fn split_text(text: &str, config: ChunkingConfig) -> Vec<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let pieces = split_recursive(trimmed, config.stride(), &SEPARATORS);
    merge_with_overlap(&pieces, config)
}

/// Breaks `text` into pieces of at most `limit` characters. Separators stay
/// attached to the piece they end, so the pieces concatenate back to `text`.
fn split_recursive<'a>(text: &'a str, limit: usize, separators: &[&str]) -> Vec<&'a str> {
    if char_len(text) <= limit {
        return vec![text];
    }

    let Some(position) = separators.iter().position(|sep| text.contains(sep)) else {
        return split_by_chars(text, limit);
    };
    let separator = separators[position];
    let finer = &separators[position + 1..];

    let mut pieces = Vec::new();
    for piece in text.split_inclusive(separator) {
        if char_len(piece) <= limit {
            pieces.push(piece);
        } else {
            pieces.extend(split_recursive(piece, limit, finer));
        }
    }
    pieces
}

fn split_by_chars(text: &str, limit: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut count = 0;

    for (offset, _) in text.char_indices() {
        if count == limit {
            pieces.push(&text[start..offset]);
            start = offset;
            count = 0;
        }
        count += 1;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }

    pieces
}

fn merge_with_overlap(pieces: &[&str], config: ChunkingConfig) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;
    // Overlap the current window started with, i.e. the tail of the last
    // emitted chunk.
    let mut carried = String::new();

    for piece in pieces {
        let piece_len = char_len(piece);
        // Every piece fits in `stride`, so a flushed window always holds
        // more than `overlap` characters and the carry is exact.
        if current_len > 0 && current_len + piece_len > config.chunk_size {
            if current.trim().is_empty() {
                // Whitespace-only window: dropped, restart from the last carry.
                current.clone_from(&carried);
            } else {
                carried = tail_chars(&current, config.overlap).to_string();
                chunks.push(std::mem::replace(&mut current, carried.clone()));
            }
            current_len = char_len(&current);
        }
        current.push_str(piece);
        current_len += piece_len;
    }

    if !current.trim().is_empty() {
        chunks.push(current);
    }

    chunks
}

fn tail_chars(text: &str, count: usize) -> &str {
    if count == 0 {
        return "";
    }
    match text.char_indices().rev().nth(count - 1) {
        Some((offset, _)) => &text[offset..],
        None => text,
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(text: String, page: u32) -> PageDocument {
        PageDocument {
            text,
            source: "review.pdf".to_string(),
            page,
        }
    }

    fn words(len: usize) -> String {
        "abcd ".repeat(len / 5 + 1).chars().take(len).collect()
    }

    fn shared_prefix_suffix(previous: &str, next: &str, overlap: usize) -> bool {
        let tail: String = previous.chars().skip(char_len(previous) - overlap).collect();
        next.starts_with(&tail)
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk_size() {
        let config = ChunkingConfig {
            chunk_size: 100,
            overlap: 100,
        };
        let result = chunk_pages(&[page(words(50), 1)], config);
        assert!(matches!(result, Err(IngestError::InvalidConfig(_))));
    }

    #[test]
    fn short_page_yields_single_chunk() {
        let config = ChunkingConfig {
            chunk_size: 1_000,
            overlap: 200,
        };
        let chunks = chunk_pages(&[page("Primary endpoint met.".to_string(), 4)], config).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Primary endpoint met.");
        assert_eq!(chunks[0].page, 4);
        assert_eq!(chunks[0].chunk_index, 0);
    }

    #[test]
    fn whitespace_page_yields_nothing() {
        let config = ChunkingConfig {
            chunk_size: 50,
            overlap: 10,
        };
        let chunks = chunk_pages(&[page(" \n\t ".to_string(), 1)], config).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn three_page_document_chunks_per_page() {
        let config = ChunkingConfig {
            chunk_size: 1_000,
            overlap: 200,
        };
        let pages = vec![page(words(1_500), 1), page(words(400), 2), page(words(1_500), 3)];
        let chunks = chunk_pages(&pages, config).unwrap();

        let on_page = |number: u32| chunks.iter().filter(|c| c.page == number).collect::<Vec<_>>();
        let first = on_page(1);
        let second = on_page(2);
        let third = on_page(3);

        assert_eq!(first.len(), 2);
        assert_eq!(first[0].chunk_index, 0);
        assert_eq!(first[1].chunk_index, 1);
        assert!(shared_prefix_suffix(&first[0].text, &first[1].text, 200));
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].chunk_index, 0);
        assert_eq!(third.len(), 2);

        // Page 2 starts fresh: nothing from page 1 is carried over.
        assert_eq!(second[0].text, words(400).trim());
    }

    #[test]
    fn chunks_respect_size_and_exact_overlap() {
        let text = "Adverse events were mild.\n\nThe sponsor reported 12 serious events. \
                    Most resolved without treatment.\nReviewer noted hepatic signals in two \
                    patients. "
            .repeat(40);

        for (chunk_size, overlap) in [(50, 0), (80, 10), (120, 40), (300, 299), (7, 3)] {
            let config = ChunkingConfig { chunk_size, overlap };
            let pieces = split_text(&text, config);
            assert!(pieces.len() > 1);

            for piece in &pieces {
                assert!(!piece.is_empty());
                assert!(char_len(piece) <= chunk_size, "{chunk_size}/{overlap}");
            }
            for pair in pieces.windows(2) {
                assert!(
                    shared_prefix_suffix(&pair[0], &pair[1], overlap),
                    "{chunk_size}/{overlap}"
                );
            }
        }
    }

    #[test]
    fn newline_runs_never_become_chunks() {
        let text = "aaaaaaaa\n\n\n\n\n\nbbbbbbbb";

        let config = ChunkingConfig {
            chunk_size: 10,
            overlap: 0,
        };
        assert_eq!(
            split_text(text, config),
            vec!["aaaaaaaa\n\n".to_string(), "bbbbbbbb".to_string()]
        );

        let config = ChunkingConfig {
            chunk_size: 10,
            overlap: 2,
        };
        let pieces = split_text(text, config);
        assert_eq!(
            pieces,
            vec!["aaaaaaaa\n\n".to_string(), "\n\nbbbbbbbb".to_string()]
        );
        for pair in pieces.windows(2) {
            assert!(shared_prefix_suffix(&pair[0], &pair[1], 2));
        }
    }

    #[test]
    fn extracted_page_layout_yields_only_text_chunks() {
        let text = "Section 4.2 Clinical pharmacology\n\n\n\n\n\n\n\n\n\n\n\n\
                    Exposure increased with dose.\n\n\n\n\n\n\n\n\nTable 3"
            .repeat(10);

        for (chunk_size, overlap) in [(12, 0), (20, 4), (40, 10)] {
            let config = ChunkingConfig { chunk_size, overlap };
            let pieces = split_text(&text, config);
            assert!(pieces.len() > 1);
            for piece in &pieces {
                assert!(!piece.trim().is_empty(), "{chunk_size}/{overlap}: {piece:?}");
                assert!(char_len(piece) <= chunk_size);
            }
            for pair in pieces.windows(2) {
                assert!(
                    shared_prefix_suffix(&pair[0], &pair[1], overlap),
                    "{chunk_size}/{overlap}"
                );
            }
        }
    }

    #[test]
    fn separator_free_text_is_cut_at_characters() {
        let config = ChunkingConfig {
            chunk_size: 10,
            overlap: 3,
        };
        let pieces = split_text(&"x".repeat(25), config);
        let lengths = pieces.iter().map(|piece| char_len(piece)).collect::<Vec<_>>();
        assert_eq!(lengths, vec![7, 10, 10, 7]);
    }

    #[test]
    fn paragraph_breaks_are_preferred() {
        let config = ChunkingConfig {
            chunk_size: 15,
            overlap: 0,
        };
        let pieces = split_text("para one.\n\npara two.", config);
        assert_eq!(pieces, vec!["para one.\n\n".to_string(), "para two.".to_string()]);
    }

    #[test]
    fn multibyte_text_is_counted_in_characters() {
        let config = ChunkingConfig {
            chunk_size: 6,
            overlap: 2,
        };
        let pieces = split_text("éééééééééé", config);
        assert!(pieces.iter().all(|piece| char_len(piece) <= 6));
        for pair in pieces.windows(2) {
            assert!(shared_prefix_suffix(&pair[0], &pair[1], 2));
        }
    }

    #[test]
    fn chunking_is_deterministic() {
        let config = ChunkingConfig {
            chunk_size: 90,
            overlap: 15,
        };
        let pages = vec![page(words(700), 1), page(words(333), 5)];
        assert_eq!(chunk_pages(&pages, config).unwrap(), chunk_pages(&pages, config).unwrap());
    }
}
