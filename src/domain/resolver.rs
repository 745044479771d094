//! Name resolution shared by devices, services and characteristics.
//!
//! A token is either a literal display name or `#NN`, a zero-based index into
//! the candidate list as the caller presents it.

use crate::domain::models::Named;

/// Resolve `token` against `candidates`, returning the candidate's own name.
pub fn resolve<T: Named>(candidates: &[T], token: &str) -> Option<String> {
    if let Some(index) = parse_ordinal(token) {
        return candidates.get(index).map(|c| c.name().to_string());
    }

    candidates
        .iter()
        .find(|c| c.name() == token)
        .map(|c| c.name().to_string())
}

/// Resolve and return the candidate itself
pub fn find<'a, T: Named>(candidates: &'a [T], token: &str) -> Option<&'a T> {
    let name = resolve(candidates, token)?;
    candidates.iter().find(|c| c.name() == name)
}

fn parse_ordinal(token: &str) -> Option<usize> {
    let digits = token.strip_prefix('#')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    // Out of usize range can never index a list anyway
    Some(digits.parse().unwrap_or(usize::MAX))
}

/// Case-insensitive substring match used for the acquisition filters
pub fn name_contains(name: &str, pattern: &str) -> bool {
    name.to_lowercase().contains(&pattern.to_lowercase())
}
