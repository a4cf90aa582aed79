use crate::chunk::Chunk;

pub struct ChunkerConfig {
    pub target_tokens_max: usize,
    pub overlap_tokens: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            target_tokens_max: 900,
            overlap_tokens: 100,
        }
    }
}

pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    /// Split a document into chunks numbered from 0 in reading order.
    pub fn chunk_text(&self, doc_id: &str, text: &str) -> Vec<Chunk> {
        let mut pieces = Vec::new();

        for section in self.split_by_headings(text) {
            // Small sections become one chunk
            if estimate_tokens(&section) <= self.config.target_tokens_max {
                if !section.trim().is_empty() {
                    pieces.push(section.trim().to_string());
                }
                continue;
            }

            let mut buffer = String::new();
            for para in self.split_by_paragraphs(&section) {
                let buffer_tokens = estimate_tokens(&buffer);
                let para_tokens = estimate_tokens(&para);

                if buffer_tokens + para_tokens > self.config.target_tokens_max
                    && !buffer.trim().is_empty()
                {
                    pieces.push(buffer.trim().to_string());
                    buffer = self.get_overlap(&buffer, self.config.overlap_tokens);
                    if !buffer.is_empty() {
                        buffer.push_str("\n\n");
                    }
                }

                buffer.push_str(&para);
                buffer.push_str("\n\n");
            }

            if !buffer.trim().is_empty() {
                pieces.push(buffer.trim().to_string());
            }
        }

        pieces
            .into_iter()
            .enumerate()
            .map(|(position, text)| Chunk::for_document(doc_id, position, text))
            .collect()
    }

    fn split_by_headings(&self, text: &str) -> Vec<String> {
        let mut sections = Vec::new();
        let mut current_section = String::new();

        for line in text.lines() {
            if line.trim_start().starts_with('#') && !current_section.trim().is_empty() {
                sections.push(std::mem::take(&mut current_section));
            }
            current_section.push_str(line);
            current_section.push('\n');
        }

        if !current_section.is_empty() {
            sections.push(current_section);
        }

        sections
    }

    fn split_by_paragraphs(&self, text: &str) -> Vec<String> {
        text.split("\n\n")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    fn get_overlap(&self, text: &str, target_tokens: usize) -> String {
        if target_tokens == 0 {
            return String::new();
        }

        let words: Vec<&str> = text.split_whitespace().collect();
        let target_words = ((target_tokens as f64 / 1.3) as usize).max(1);

        if words.len() <= target_words {
            return words.join(" ");
        }

        words[words.len() - target_words..].join(" ")
    }
}

/// Rough token estimate: 1.3 tokens per whitespace word, plus one token per
/// CJK character since those scripts do not separate words with spaces.
pub fn estimate_tokens(text: &str) -> usize {
    let word_count = text.split_whitespace().count();
    let cjk_count = text.chars().filter(|c| is_cjk(*c)).count();
    (word_count as f64 * 1.3) as usize + cjk_count
}

fn is_cjk(c: char) -> bool {
    matches!(c as u32, 0x4E00..=0x9FFF | 0x3400..=0x4DBF | 0xF900..=0xFAFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_chunking() {
        let chunker = Chunker::new(ChunkerConfig::default());
        let text = "This is a test paragraph.\n\nThis is another paragraph.";
        let chunks = chunker.chunk_text("test-doc", text);

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].id, "test-doc_0");
        assert_eq!(chunks[0].position, 0);
    }

    #[test]
    fn test_headings_split_sections() {
        let chunker = Chunker::new(ChunkerConfig::default());
        let text = "# One\nalpha beta\n# Two\ngamma delta\n";
        let chunks = chunker.chunk_text("doc", text);

        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].text.contains("alpha"));
        assert!(chunks[1].text.contains("gamma"));
        assert_eq!(chunks[1].id, "doc_1");
    }

    #[test]
    fn test_long_section_is_split_with_overlap() {
        let chunker = Chunker::new(ChunkerConfig {
            target_tokens_max: 10,
            overlap_tokens: 2,
        });
        let text = "one two three four five\n\nsix seven eight nine ten\n\neleven twelve thirteen";
        let chunks = chunker.chunk_text("doc", text);

        assert!(chunks.len() >= 2);
        assert!(chunks[1].text.starts_with("five"));
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.position, i);
        }
    }

    #[test]
    fn test_cjk_tokens_counted_per_character() {
        assert_eq!(estimate_tokens("松材线虫"), 4);
    }
}
