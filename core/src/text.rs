//! Text folding shared by header matching and chat intent detection.

use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

/// Lowercase and strip diacritics: "Graduação" -> "graduacao".
pub fn fold(input: &str) -> String {
    input
        .trim()
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .collect()
}

/// `fold` plus removal of everything that is not a letter or digit, so
/// "Clientes Ativos", "clientes_ativos" and "clientesAtivos" compare equal.
pub fn header_key(input: &str) -> String {
    fold(input).chars().filter(|c| c.is_alphanumeric()).collect()
}

/// Split folded text into words on anything that is not alphanumeric.
pub fn words(input: &str) -> Vec<String> {
    fold(input)
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}
