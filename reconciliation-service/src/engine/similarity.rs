use std::collections::HashSet;

/// Scores how alike two free-text descriptions are, in [0, 1].
pub trait DescriptionSimilarity: Send + Sync {
    fn similarity(&self, a: &str, b: &str) -> f64;
}

/// Jaccard overlap of lower-cased alphanumeric tokens.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenOverlap;

impl TokenOverlap {
    fn tokens(text: &str) -> HashSet<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase())
            .collect()
    }
}

impl DescriptionSimilarity for TokenOverlap {
    fn similarity(&self, a: &str, b: &str) -> f64 {
        let left = Self::tokens(a);
        let right = Self::tokens(b);
        if left.is_empty() || right.is_empty() {
            return 0.0;
        }
        let shared = left.intersection(&right).count();
        let union = left.len() + right.len() - shared;
        shared as f64 / union as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_text_scores_one() {
        let s = TokenOverlap.similarity("PIX Recebido Joao", "pix recebido JOAO");
        assert!((s - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn partial_overlap() {
        // {pix, joao} shared out of {pix, joao, silva, recebido}
        let s = TokenOverlap.similarity("PIX - Joao Silva", "pix recebido joao");
        assert!((s - 0.5).abs() < 1e-9);
    }

    #[test]
    fn empty_text_scores_zero() {
        assert_eq!(TokenOverlap.similarity("", "anything"), 0.0);
        assert_eq!(TokenOverlap.similarity("--", "--"), 0.0);
    }
}
