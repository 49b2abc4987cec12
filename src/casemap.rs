//! RFC1459 case folding.
//!
//! Nicks, channel names and server names are case-insensitive on the wire,
//! with the RFC1459 quirk that `[]\^` are the uppercase forms of `{}|~`.
//! The state store folds every key once at entry; lookups fold their input
//! and compare exactly.

/// Fold a string to its RFC1459 lowercase form.
pub fn to_lower(s: &str) -> String {
    s.chars().map(fold_char).collect()
}

/// Compare two strings under RFC1459 folding without allocating.
pub fn eq_ci(a: &str, b: &str) -> bool {
    a.len() == b.len()
        && a.chars()
            .zip(b.chars())
            .all(|(ca, cb)| fold_char(ca) == fold_char(cb))
}

fn fold_char(c: char) -> char {
    match c {
        '[' => '{',
        ']' => '}',
        '\\' => '|',
        '^' => '~',
        'A'..='Z' => c.to_ascii_lowercase(),
        _ => c,
    }
}
