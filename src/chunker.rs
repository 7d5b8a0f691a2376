//! Sentence-aware text splitting for chunked synthesis.
//!
//! Text is cut at sentence terminators first, then sentences are packed
//! greedily into chunks of at most `max_chars` characters. A single sentence
//! longer than the limit is split at its last soft break (comma, colon,
//! space) inside the window, or hard at the limit when there is none.

use crate::sanitizer::text_units;

/// Default upper bound on chunk length, in characters.
pub const DEFAULT_CHUNK_MAX_CHARS: usize = 200;

/// One piece of a chunked request. `index` fixes its position in the merged
/// output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub index: usize,
    pub content: String,
}

impl TextChunk {
    pub fn new(index: usize, content: impl Into<String>) -> Self {
        Self {
            index,
            content: content.into(),
        }
    }

    pub fn char_count(&self) -> usize {
        text_units(&self.content)
    }
}

/// Split `text` into ordered chunks of at most `max_chars` characters.
///
/// Whitespace-only input yields no chunks.
pub fn split_into_chunks(text: &str, max_chars: usize) -> Vec<TextChunk> {
    let max_chars = max_chars.max(1);

    let mut pieces = Vec::new();
    for sentence in split_sentences(text) {
        if text_units(&sentence) <= max_chars {
            pieces.push(sentence);
        } else {
            log::debug!(
                "Sentence of {} chars exceeds chunk limit {max_chars}, splitting",
                text_units(&sentence)
            );
            pieces.extend(split_long_sentence(&sentence, max_chars));
        }
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    for piece in pieces {
        let joiner = needs_space(&current, &piece);
        let joined_len = text_units(&current) + text_units(&piece) + usize::from(joiner);
        if !current.is_empty() && joined_len > max_chars {
            chunks.push(std::mem::take(&mut current));
        } else if joiner {
            current.push(' ');
        }
        current.push_str(&piece);
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
        .into_iter()
        .enumerate()
        .map(|(index, content)| TextChunk::new(index, content))
        .collect()
}

fn is_terminator(ch: char) -> bool {
    matches!(ch, '。' | '！' | '？' | '!' | '?' | '；' | ';' | '…')
}

fn is_closing_quote(ch: char) -> bool {
    matches!(ch, '”' | '’' | '"' | '\'' | '」' | '』' | ')' | '）')
}

fn is_soft_break(ch: char) -> bool {
    matches!(ch, '，' | ',' | '、' | '：' | ':' | ' ')
}

/// Split on sentence terminators and line breaks. A `.` between two digits
/// is a decimal point, not a terminator.
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '\n' || ch == '\r' {
            flush_sentence(&mut sentences, &mut current);
            continue;
        }

        let prev = current.chars().next_back();
        current.push(ch);

        let boundary = match ch {
            '.' => !(prev.is_some_and(|p| p.is_ascii_digit())
                && chars.peek().is_some_and(|n| n.is_ascii_digit())),
            c => is_terminator(c),
        };
        if boundary {
            while let Some(&next) = chars.peek() {
                if is_terminator(next) || next == '.' || is_closing_quote(next) {
                    current.push(next);
                    chars.next();
                } else {
                    break;
                }
            }
            flush_sentence(&mut sentences, &mut current);
        }
    }
    flush_sentence(&mut sentences, &mut current);
    sentences
}

fn flush_sentence(sentences: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }
    current.clear();
}

fn split_long_sentence(sentence: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = sentence.chars().collect();
    let mut parts = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let end = (start + max_chars).min(chars.len());
        if end == chars.len() {
            parts.push(chars[start..end].iter().collect());
            break;
        }

        let split = chars[start..end]
            .iter()
            .enumerate()
            .rev()
            .find(|(i, &c)| *i > 0 && is_soft_break(c))
            .map(|(i, _)| start + i + 1)
            .unwrap_or(end);

        parts.push(chars[start..split].iter().collect());
        start = split;
    }

    parts
        .into_iter()
        .map(|p: String| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

/// Latin sentences lose their separating space when trimmed; put it back.
fn needs_space(current: &str, next: &str) -> bool {
    match (current.chars().next_back(), next.chars().next()) {
        (Some(a), Some(b)) => a.is_ascii() && !a.is_ascii_whitespace() && b.is_ascii_alphanumeric(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::{split_into_chunks, split_sentences, TextChunk};

    #[test]
    fn splits_chinese_sentences() {
        assert_eq!(
            split_sentences("第一句。第二句！第三句？"),
            vec!["第一句。", "第二句！", "第三句？"]
        );
    }

    #[test]
    fn keeps_decimals_and_closing_quotes() {
        assert_eq!(
            split_sentences("Version 2.5 is out. He said \"wow!\" Then left"),
            vec!["Version 2.5 is out.", "He said \"wow!\"", "Then left"]
        );
    }

    #[test]
    fn line_breaks_end_sentences() {
        assert_eq!(
            split_sentences("每日资讯简报\n1、第一条\n\n2、第二条"),
            vec!["每日资讯简报", "1、第一条", "2、第二条"]
        );
    }

    #[test]
    fn packs_sentences_up_to_limit() {
        let chunks = split_into_chunks("一二三。四五六。七八九。", 8);
        assert_eq!(
            chunks,
            vec![TextChunk::new(0, "一二三。四五六。"), TextChunk::new(1, "七八九。")]
        );
    }

    #[test]
    fn restores_space_between_latin_sentences() {
        let chunks = split_into_chunks("Hello there. General Kenobi.", 200);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "Hello there. General Kenobi.");
    }

    #[test]
    fn long_sentence_prefers_soft_breaks() {
        let sentence = format!("{}，{}。", "甲".repeat(6), "乙".repeat(6));
        let chunks = split_into_chunks(&sentence, 10);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].content, format!("{}，", "甲".repeat(6)));
        assert_eq!(chunks[1].content, format!("{}。", "乙".repeat(6)));
    }

    #[test]
    fn long_sentence_without_breaks_is_cut_at_limit() {
        let chunks = split_into_chunks(&"字".repeat(25), 10);
        let lens: Vec<usize> = chunks.iter().map(|c| c.char_count()).collect();
        assert_eq!(lens, vec![10, 10, 5]);
    }

    #[test]
    fn chunks_respect_limit_and_keep_order() {
        let text = "女子离婚嫁妆纠纷案：法院判决仅支持部分诉求。网红猫又又去世，粉丝悼念。\
                    小女孩跳科目三扭伤：医生提醒儿童舞蹈需谨慎。河南高速车祸现场：多车相撞致拥堵。";
        let chunks = split_into_chunks(text, 30);
        assert!(chunks.len() > 1);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
            assert!(chunk.char_count() <= 30, "{chunk:?}");
        }
        let rejoined: String = chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(rejoined, text);
    }

    #[test]
    fn blank_text_has_no_chunks() {
        assert!(split_into_chunks(" \n\n ", 50).is_empty());
        assert!(split_into_chunks("", 50).is_empty());
    }
}
