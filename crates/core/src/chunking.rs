use crate::error::IngestError;
use crate::models::Chunk;

pub const DEFAULT_CHUNK_SIZE: usize = 1_000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub separator: char,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            separator: '\n',
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.chunk_size == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk size must be positive".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap {} must be smaller than chunk size {}",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// Splits `text` into overlapping chunks of at most `chunk_size` characters.
///
/// Text that already fits is returned as a single chunk, untouched. Longer
/// text is broken at the separator and the pieces are merged back up to the
/// size limit; a piece with no separator inside the limit is hard-cut.
pub fn split_text(text: &str, config: ChunkingConfig) -> Vec<Chunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    if char_len(text) <= config.chunk_size {
        return vec![Chunk {
            index: 0,
            text: text.to_string(),
        }];
    }

    let mut pieces = Vec::new();
    for piece in text.split(config.separator).filter(|piece| !piece.is_empty()) {
        if char_len(piece) > config.chunk_size {
            pieces.extend(hard_cut(piece, config));
        } else {
            pieces.push(piece.to_string());
        }
    }

    merge_pieces(&pieces, config)
        .into_iter()
        .enumerate()
        .map(|(index, text)| Chunk { index, text })
        .collect()
}

fn hard_cut(piece: &str, config: ChunkingConfig) -> Vec<String> {
    let chars: Vec<char> = piece.chars().collect();
    let step = config.chunk_size.saturating_sub(config.chunk_overlap).max(1);
    let mut windows = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + config.chunk_size).min(chars.len());
        windows.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }
    windows
}

fn merge_pieces(pieces: &[String], config: ChunkingConfig) -> Vec<String> {
    let separator = config.separator.to_string();
    let separator_len = 1;

    let mut chunks = Vec::new();
    let mut current: Vec<(&str, usize)> = Vec::new();
    let mut total = 0usize;
    let mut head = 0usize;

    for piece in pieces {
        let len = char_len(piece);
        let joiner = |active: usize| if active > 0 { separator_len } else { 0 };

        if total + len + joiner(current.len() - head) > config.chunk_size && current.len() > head {
            push_joined(&mut chunks, &current[head..], &separator);

            while head < current.len()
                && (total > config.chunk_overlap
                    || total + len + joiner(current.len() - head) > config.chunk_size)
            {
                let dropped = current[head].1;
                let active = current.len() - head;
                total -= dropped + if active > 1 { separator_len } else { 0 };
                head += 1;
            }
        }

        current.push((piece.as_str(), len));
        total += len + if current.len() - head > 1 { separator_len } else { 0 };
    }

    push_joined(&mut chunks, &current[head..], &separator);
    chunks
}

fn push_joined(chunks: &mut Vec<String>, pieces: &[(&str, usize)], separator: &str) {
    let joined = pieces
        .iter()
        .map(|(piece, _)| *piece)
        .collect::<Vec<_>>()
        .join(separator);
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(chunks: &[Chunk]) -> Vec<&str> {
        chunks.iter().map(|chunk| chunk.text.as_str()).collect()
    }

    #[test]
    fn blank_text_has_no_chunks() {
        assert!(split_text("", ChunkingConfig::default()).is_empty());
        assert!(split_text(" \n\t ", ChunkingConfig::default()).is_empty());
    }

    #[test]
    fn short_text_is_a_single_identical_chunk() {
        let input = "Invoice Total: $42.00\n\nThank you for your business.";
        let chunks = split_text(input, ChunkingConfig::default());
        assert_eq!(texts(&chunks), vec![input]);
        assert_eq!(chunks[0].index, 0);
    }

    #[test]
    fn long_text_without_breaks_uses_a_sliding_window() {
        for length in [1_001usize, 1_800, 2_500, 4_321] {
            let text: String = (0..length)
                .map(|i| char::from(b'a' + (i % 26) as u8))
                .collect();
            let chunks = split_text(&text, ChunkingConfig::default());

            let expected = (length - 200).div_ceil(800);
            assert_eq!(chunks.len(), expected, "length {length}");
            assert!(chunks.iter().all(|chunk| chunk.text.chars().count() <= 1_000));

            for pair in chunks.windows(2) {
                let previous: Vec<char> = pair[0].text.chars().collect();
                let tail: String = previous[previous.len() - 200..].iter().collect();
                assert!(pair[1].text.starts_with(&tail), "length {length}");
            }

            let last = &chunks[chunks.len() - 1].text;
            assert!(text.ends_with(last.as_str()));
        }
    }

    #[test]
    fn lines_are_merged_up_to_the_limit_with_overlap() {
        let lines: Vec<String> = (0..12u8)
            .map(|i| char::from(b'a' + i).to_string().repeat(150))
            .collect();
        let text = lines.join("\n");
        let chunks = split_text(&text, ChunkingConfig::default());

        // Six lines plus five separators fill 905 characters; a seventh would overflow.
        assert_eq!(chunks[0].text.chars().count(), 905);
        assert!(chunks.iter().all(|chunk| chunk.text.chars().count() <= 1_000));
        assert!(chunks.len() > 1);

        let first_lines: Vec<&str> = chunks[0].text.split('\n').collect();
        let second_lines: Vec<&str> = chunks[1].text.split('\n').collect();
        assert_eq!(first_lines.last(), second_lines.first());
    }

    #[test]
    fn chunks_never_start_or_end_with_whitespace() {
        let text = format!("{}\n\n\n{}\n   \n{}", "a".repeat(700), "b".repeat(700), "c".repeat(50));
        let chunks = split_text(&text, ChunkingConfig::default());
        assert!(!chunks.is_empty());
        for chunk in &chunks {
            assert_eq!(chunk.text.trim(), chunk.text);
            assert!(!chunk.text.is_empty());
        }
        let indexes: Vec<usize> = chunks.iter().map(|chunk| chunk.index).collect();
        assert_eq!(indexes, (0..chunks.len()).collect::<Vec<_>>());
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk_size() {
        let config = ChunkingConfig {
            chunk_size: 100,
            chunk_overlap: 100,
            separator: '\n',
        };
        assert!(matches!(
            config.validate(),
            Err(IngestError::InvalidChunkConfig(_))
        ));
        assert!(ChunkingConfig::default().validate().is_ok());
    }
}
