//! Transcript chunking: overlapping bounded-size segments on sentence
//! boundaries.

use tilth_core::defaults;

/// Chunking parameters.
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Target characters per chunk.
    pub target_chars: usize,
    /// Characters of trailing context carried into the next chunk.
    pub overlap_chars: usize,
    /// A final chunk shorter than this merges into its predecessor.
    pub min_chars: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            target_chars: defaults::CHUNK_TARGET_CHARS,
            overlap_chars: defaults::CHUNK_OVERLAP_CHARS,
            min_chars: defaults::CHUNK_MIN_CHARS,
        }
    }
}

/// Split text into sentences, keeping terminators attached.
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') {
            // Sentence ends when the terminator is followed by whitespace
            // (or end of input); "3.5" stays intact.
            match chars.peek() {
                Some(next) if next.is_whitespace() => {
                    sentences.push(current.trim().to_string());
                    current.clear();
                }
                None => {}
                _ => {}
            }
        }
    }
    let rest = current.trim();
    if !rest.is_empty() {
        sentences.push(rest.to_string());
    }
    sentences.retain(|s| !s.is_empty());
    sentences
}

/// Trailing `overlap` characters of a chunk, advanced to the next word
/// boundary so overlaps never start mid-word.
fn overlap_tail(chunk: &str, overlap: usize) -> String {
    let chars: Vec<char> = chunk.chars().collect();
    if chars.len() <= overlap {
        return chunk.to_string();
    }
    let tail: String = chars[chars.len() - overlap..].iter().collect();
    match tail.find(char::is_whitespace) {
        Some(pos) => tail[pos..].trim_start().to_string(),
        None => tail,
    }
}

/// Hard-split an oversized sentence at character boundaries with overlap.
fn split_oversized(sentence: &str, config: &ChunkerConfig, out: &mut Vec<String>) {
    let chars: Vec<char> = sentence.chars().collect();
    let step = config.target_chars.saturating_sub(config.overlap_chars).max(1);
    let mut start = 0;
    while start < chars.len() {
        let end = (start + config.target_chars).min(chars.len());
        out.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }
}

/// Split text into overlapping chunks of roughly `target_chars` characters,
/// preferring sentence boundaries.
pub fn chunk_text(text: &str, config: &ChunkerConfig) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    if text.chars().count() <= config.target_chars {
        return vec![text.to_string()];
    }

    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();

    for sentence in split_sentences(text) {
        if sentence.chars().count() > config.target_chars {
            if !current.is_empty() {
                chunks.push(current.clone());
                current.clear();
            }
            split_oversized(&sentence, config, &mut chunks);
            if let Some(last) = chunks.last() {
                current = overlap_tail(last, config.overlap_chars);
            }
            continue;
        }

        let projected = current.chars().count() + 1 + sentence.chars().count();
        if !current.is_empty() && projected > config.target_chars {
            chunks.push(current.clone());
            current = overlap_tail(&current, config.overlap_chars);
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&sentence);
    }

    if !current.is_empty() {
        // An overlap-only remainder adds nothing new.
        let is_residue = chunks
            .last()
            .map(|last| last.ends_with(current.as_str()))
            .unwrap_or(false);
        if !is_residue {
            match chunks.last_mut() {
                Some(last) if current.chars().count() < config.min_chars => {
                    last.push(' ');
                    last.push_str(&current);
                }
                _ => chunks.push(current),
            }
        }
    }

    chunks
}
