//! Text normalization shared by the vectorizer and the model artifacts.

/// Lowercase and strip everything except ASCII letters and whitespace.
pub fn clean(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_ascii_alphabetic() || c.is_whitespace())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Split into lowercase word tokens of at least two alphanumeric characters.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|token| token.chars().count() >= 2)
        .map(|token| token.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean() {
        assert_eq!(clean("I have an issue, with my LOAN #42!"), "i have an issue with my loan ");
        assert_eq!(clean(""), "");
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokenize("I have an issue with my Loan."),
            vec!["have", "an", "issue", "with", "my", "loan"]
        );
        assert!(tokenize("a b c").is_empty());
    }
}
