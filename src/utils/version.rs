use std::cmp::Ordering;

#[derive(Debug, PartialEq, Eq)]
enum Token {
    Number(u64),
    Text(String),
}

fn tokenize(version: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    for segment in version
        .trim()
        .trim_start_matches(['v', 'V'])
        .split(['.', '-', '+', '_', ' '])
        .filter(|segment| !segment.is_empty())
    {
        let mut run = String::new();
        let mut run_is_digit = false;
        for ch in segment.chars() {
            let is_digit = ch.is_ascii_digit();
            if !run.is_empty() && is_digit != run_is_digit {
                tokens.push(finish_run(&run, run_is_digit));
                run.clear();
            }
            run_is_digit = is_digit;
            run.push(ch);
        }
        if !run.is_empty() {
            tokens.push(finish_run(&run, run_is_digit));
        }
    }
    tokens
}

fn finish_run(run: &str, is_digit: bool) -> Token {
    if is_digit {
        if let Ok(value) = run.parse::<u64>() {
            return Token::Number(value);
        }
    }
    Token::Text(run.to_ascii_lowercase())
}

/// Numeric-aware comparison: digit runs compare as numbers, everything else
/// case-insensitively. A trailing text run (`-beta`, `-rc1`) sorts below the
/// bare release.
pub fn compare_versions(left: &str, right: &str) -> Ordering {
    let left_tokens = tokenize(left);
    let right_tokens = tokenize(right);

    for (a, b) in left_tokens.iter().zip(right_tokens.iter()) {
        let ordering = match (a, b) {
            (Token::Number(x), Token::Number(y)) => x.cmp(y),
            (Token::Text(x), Token::Text(y)) => x.cmp(y),
            (Token::Number(_), Token::Text(_)) => Ordering::Greater,
            (Token::Text(_), Token::Number(_)) => Ordering::Less,
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    let shared = left_tokens.len().min(right_tokens.len());
    match (left_tokens.get(shared), right_tokens.get(shared)) {
        (Some(Token::Text(_)), None) => Ordering::Less,
        (Some(Token::Number(_)), None) => Ordering::Greater,
        (None, Some(Token::Text(_))) => Ordering::Greater,
        (None, Some(Token::Number(_))) => Ordering::Less,
        _ => Ordering::Equal,
    }
}

pub fn is_newer(candidate: &str, current: &str) -> bool {
    compare_versions(candidate, current) == Ordering::Greater
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_runs_compare_by_value() {
        assert_eq!(compare_versions("0.15.11", "0.15.9"), Ordering::Greater);
        assert_eq!(compare_versions("20.4.237", "20.4.80"), Ordering::Greater);
        assert_eq!(compare_versions("47.2.0", "47.2.0"), Ordering::Equal);
        assert_eq!(compare_versions("v1.2", "1.2"), Ordering::Equal);
    }

    #[test]
    fn prerelease_sorts_below_release() {
        assert_eq!(compare_versions("1.0.0-beta", "1.0.0"), Ordering::Less);
        assert_eq!(compare_versions("1.0.0-rc2", "1.0.0-rc10"), Ordering::Less);
        assert_eq!(compare_versions("1.0.0.1", "1.0.0"), Ordering::Greater);
    }

    #[test]
    fn newer_is_strict() {
        assert!(is_newer("0.16.0", "0.15.11"));
        assert!(!is_newer("0.15.11", "0.15.11"));
        assert!(!is_newer("0.14.0", "0.15.11"));
    }
}
