//! Outbound text shaping: chunking for the chat transport's message size
//! limit and bounded display of large tool inputs.

/// Splits `text` into chunks of at most `max_len` characters.
///
/// Splitting prefers line boundaries; a single line longer than `max_len`
/// is split on raw character boundaries. Joining the chunks with newlines
/// restores the original text (modulo trailing whitespace per chunk).
pub fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.chars().count() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for line in text.split('\n') {
        let line_len = line.chars().count();

        if line_len > max_len {
            if !current.is_empty() {
                chunks.push(current.trim().to_string());
                current.clear();
                current_len = 0;
            }
            let cs: Vec<char> = line.chars().collect();
            for piece in cs.chunks(max_len) {
                chunks.push(piece.iter().collect());
            }
        } else if current_len + line_len + 1 > max_len {
            if !current.is_empty() {
                chunks.push(current.trim().to_string());
            }
            current = format!("{line}\n");
            current_len = line_len + 1;
        } else {
            current.push_str(line);
            current.push('\n');
            current_len += line_len + 1;
        }
    }

    if !current.is_empty() {
        chunks.push(current.trim().to_string());
    }

    chunks
}

/// Truncates `input` to `cap` characters, appending a `...` marker when
/// anything was cut. Total output length is at most `cap + 3`.
pub fn truncate_for_display(input: &str, cap: usize) -> String {
    if input.chars().count() <= cap {
        return input.to_string();
    }
    let truncated: String = input.chars().take(cap).collect();
    format!("{truncated}...")
}

#[cfg(test)]
mod tests {
    use super::{split_message, truncate_for_display};

    #[test]
    fn short_message_is_a_single_chunk() {
        let chunks = split_message("hello\nworld", 4000);
        assert_eq!(chunks, vec!["hello\nworld".to_string()]);
    }

    #[test]
    fn five_thousand_chars_of_fifty_char_lines_make_two_chunks() {
        let line = "x".repeat(50);
        let text = vec![line; 100].join("\n");
        assert_eq!(text.chars().count(), 5099);

        let chunks = split_message(&text, 4000);
        assert_eq!(chunks.len(), 2);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 4000);
        }
        // Restoring the line break between chunks reproduces the input.
        assert_eq!(chunks.join("\n"), text);
    }

    #[test]
    fn oversized_single_line_splits_on_character_boundaries() {
        let text = "y".repeat(9000);
        let chunks = split_message(&text, 4000);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 4000);
        assert_eq!(chunks[1].len(), 4000);
        assert_eq!(chunks[2].len(), 1000);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn mixed_long_line_flushes_pending_chunk_first() {
        let text = format!("short\n{}\ntail", "z".repeat(5000));
        let chunks = split_message(&text, 4000);
        assert_eq!(chunks[0], "short");
        assert_eq!(chunks[1].len(), 4000);
        assert_eq!(chunks[2].len(), 1000);
        assert_eq!(chunks[3], "tail");
    }

    #[test]
    fn tool_input_display_is_capped_with_marker() {
        let input = "a".repeat(1000);
        let shown = truncate_for_display(&input, 400);
        assert_eq!(shown.chars().count(), 403);
        assert!(shown.starts_with(&"a".repeat(400)));
        assert!(shown.ends_with("..."));
    }

    #[test]
    fn short_tool_input_is_untouched() {
        assert_eq!(truncate_for_display("ls -la", 400), "ls -la");
    }

    #[test]
    fn truncation_respects_multibyte_boundaries() {
        let input = "é".repeat(500);
        let shown = truncate_for_display(&input, 400);
        assert_eq!(shown.chars().count(), 403);
    }
}
