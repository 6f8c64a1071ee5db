/// Matches `name` against a search pattern as defined in §4.3: `*` matches
/// one or more characters (greedy), and every other character — including
/// `-` — is matched literally.
///
/// This is intentionally narrower than a general-purpose glob: there is no
/// `?`, no character classes, and `*` can never match an empty string.
pub fn glob_match(pattern: &str, name: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let name: Vec<char> = name.chars().collect();
    match_from(&pattern, &name)
}

fn match_from(pattern: &[char], name: &[char]) -> bool {
    match pattern.first() {
        None => name.is_empty(),
        Some('*') => {
            // `*` must consume at least one character.
            for split in 1..=name.len() {
                if match_from(&pattern[1..], &name[split..]) {
                    return true;
                }
            }
            false
        }
        Some(&c) => name.first() == Some(&c) && match_from(&pattern[1..], &name[1..]),
    }
}

/// Filters `items` to those whose name (as extracted by `key`) matches
/// `pattern`.
pub fn glob_filter<'a, T, F>(items: &'a [T], pattern: &str, key: F) -> Vec<&'a T>
where
    F: Fn(&T) -> &str,
{
    items
        .iter()
        .filter(|item| glob_match(pattern, key(item)))
        .collect()
}
