//! Name and date normalization for indexing.
//!
//! All of this is pure string processing: the same input always produces
//! the same output, in deterministic order, so re-indexing an unchanged
//! entity yields a byte-identical document.

use std::collections::BTreeSet;

use rphonetic::{
    Encoder,
    Metaphone,
};
use unicode_normalization::UnicodeNormalization;

/// Fold a name to lowercase ASCII: decompose, transliterate, drop case.
pub fn fold_text(text: &str) -> String {
    let decomposed: String = text.nfkd().collect();
    any_ascii::any_ascii(&decomposed).to_lowercase()
}

fn tokenize(name: &str) -> Vec<String> {
    fold_text(name)
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

/// Tokenized name components across all names: folded, split on anything
/// that is not a letter or digit, single characters dropped.
pub fn index_name_parts<'a>(names: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut parts = BTreeSet::new();
    for name in names {
        for token in tokenize(name) {
            if token.len() > 1 {
                parts.insert(token);
            }
        }
    }
    parts.into_iter().collect()
}

/// Order-invariant fingerprint per name: the sorted tokens, concatenated.
/// Used for name-block hashing, so "Putin, Vladimir" and "Vladimir PUTIN"
/// collapse to the same key.
pub fn index_name_keys<'a>(names: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut keys = BTreeSet::new();
    for name in names {
        let mut tokens = tokenize(name);
        if tokens.is_empty() {
            continue;
        }
        tokens.sort();
        keys.insert(tokens.concat());
    }
    keys.into_iter().collect()
}

/// Metaphone codes over name parts. Purely numeric tokens and very short
/// ones carry no phonetic signal and are skipped.
pub fn phonetic_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let metaphone = Metaphone::new(None);
    let mut codes = BTreeSet::new();
    for name in names {
        for token in tokenize(name) {
            if token.len() < 3 || !token.chars().all(|c| c.is_ascii_alphabetic()) {
                continue;
            }
            let code = metaphone.encode(&token);
            if !code.is_empty() {
                codes.insert(code);
            }
        }
    }
    codes.into_iter().collect()
}

/// Expand ISO dates so that partial-date queries hit: a `YYYY-MM-DD` value
/// is indexed as itself, its year and its year-month; partial dates emit
/// whichever prefixes they carry.
pub fn expand_dates<'a>(dates: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut expanded = BTreeSet::new();
    for date in dates {
        let date = date.trim();
        if date.is_empty() {
            continue;
        }
        let bytes = date.as_bytes();
        if bytes.len() >= 4 && bytes[..4].iter().all(u8::is_ascii_digit) {
            expanded.insert(date[..4].to_string());
            if bytes.len() >= 7 && bytes[4] == b'-' && bytes[5..7].iter().all(u8::is_ascii_digit) {
                expanded.insert(date[..7].to_string());
            }
        }
        expanded.insert(date.to_string());
    }
    expanded.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use crate::text::{
        expand_dates,
        fold_text,
        index_name_keys,
        index_name_parts,
        phonetic_names,
    };

    #[test]
    fn test_fold_text() {
        assert_eq!(fold_text("Şahin ÖZTÜRK"), "sahin ozturk");
        assert_eq!(fold_text("Müller-Lüdenscheidt"), "muller-ludenscheidt");
    }

    #[test]
    fn test_name_parts() {
        assert_eq!(
            index_name_parts(["Vladimir Putin", "PUTIN, Vladimir V."]),
            vec!["putin", "vladimir"]
        );
    }

    #[test]
    fn test_name_keys_are_order_invariant() {
        let keys = index_name_keys(["Vladimir Putin", "Putin, Vladimir"]);
        assert_eq!(keys, vec!["putinvladimir"]);
    }

    #[test]
    fn test_phonetic_names() {
        let codes = phonetic_names(["Vladimir Putin"]);
        assert_eq!(codes, vec!["FLTMR", "PTN"]);
        // Numeric and short tokens are skipped.
        assert!(phonetic_names(["A4 12345"]).is_empty());
    }

    #[test]
    fn test_expand_dates() {
        assert_eq!(
            expand_dates(["1952-10-07"]),
            vec!["1952", "1952-10", "1952-10-07"]
        );
        assert_eq!(expand_dates(["1952-10"]), vec!["1952", "1952-10"]);
        assert_eq!(expand_dates(["1952"]), vec!["1952"]);
        // Expansion of an already expanded list is a fixed point.
        let once = expand_dates(["1952-10-07"]);
        let twice = expand_dates(once.iter().map(|s| s.as_str()));
        assert_eq!(once, twice);
    }
}
