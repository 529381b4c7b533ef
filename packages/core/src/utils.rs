// ABOUTME: Shared utility functions for Conduit
// ABOUTME: Bounded text helpers for captured process output

/// Truncate `input` to at most `max_bytes`, respecting char boundaries.
///
/// `total_bytes` is how much the producer wrote, which can exceed `input` when
/// capture stopped early. A marker noting that size is appended when anything
/// was cut.
pub fn truncate_output(input: &str, total_bytes: usize, max_bytes: usize) -> String {
    let total_bytes = total_bytes.max(input.len());
    if total_bytes <= max_bytes {
        return input.to_string();
    }
    let mut end = max_bytes.min(input.len());
    while end > 0 && !input.is_char_boundary(end) {
        end -= 1;
    }
    format!(
        "{}\n... [truncated, total_bytes={}]",
        &input[..end],
        total_bytes
    )
}
