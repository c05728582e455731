//! Decides whether a stored entry holds the same credential as a previous copy.

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MatchInput<'a> {
    pub stored_access: Option<&'a str>,
    pub stored_refresh: Option<&'a str>,
    pub previous_access: Option<&'a str>,
    pub previous_refresh: Option<&'a str>,
    pub label: Option<&'a str>,
    pub stored_label: Option<&'a str>,
}

/// Refresh tokens decide when both sides have one; otherwise access tokens
/// when both sides have one; labels only when neither side holds a token.
pub fn tokens_match(input: MatchInput<'_>) -> bool {
    let stored_refresh = present(input.stored_refresh);
    let previous_refresh = present(input.previous_refresh);
    if let (Some(stored), Some(previous)) = (stored_refresh, previous_refresh) {
        return stored == previous;
    }

    let stored_access = present(input.stored_access);
    let previous_access = present(input.previous_access);
    if let (Some(stored), Some(previous)) = (stored_access, previous_access) {
        return stored == previous;
    }

    let stored_empty = stored_refresh.is_none() && stored_access.is_none();
    let previous_empty = previous_refresh.is_none() && previous_access.is_none();
    if !(stored_empty && previous_empty) {
        return false;
    }
    match (present(input.label), present(input.stored_label)) {
        (Some(label), Some(stored_label)) => label == stored_label,
        _ => false,
    }
}
