//! Section cost.
//!
//! Costs are estimated at four bytes per token, rounded up. Every section,
//! note and budget in the system uses this one unit.

/// Estimated cost of `text` in tokens. Empty text is free.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_rounds_up_per_four_bytes() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("note"), 1);
        assert_eq!(estimate_tokens("notes"), 2);
        assert_eq!(estimate_tokens(&"x".repeat(4096)), 1024);
    }

    #[test]
    fn cost_counts_bytes_not_chars() {
        // Three two-byte characters.
        assert_eq!(estimate_tokens("äöü"), 2);
    }
}
