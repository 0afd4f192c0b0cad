//! Line predicates shared by the build-time source lints.

/// Whether `line` has an underscore-prefixed identifier in code, that is
/// outside string and char literals and before any trailing comment.
pub fn underscore_identifier_in_code(line: &str) -> bool {
    let chars: Vec<char> = line.chars().collect();
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    let mut in_string = false;
    let mut index = 0;
    while index < chars.len() {
        let c = chars[index];
        if in_string {
            match c {
                '\\' => index += 1,
                '"' => in_string = false,
                _ => {}
            }
        } else if c == '\'' && chars.get(index + 2) == Some(&'\'') {
            index += 2;
        } else if c == '\'' && chars.get(index + 1) == Some(&'\\') {
            while index + 1 < chars.len() && chars[index + 1] != '\'' {
                index += 1;
            }
            index += 1;
        } else if c == '"' {
            in_string = true;
        } else if c == '/' && chars.get(index + 1) == Some(&'/') {
            return false;
        } else if c == '_'
            && (index == 0 || !is_word(chars[index - 1]))
            && chars.get(index + 1).is_some_and(|&next| is_word(next))
        {
            return true;
        }
        index += 1;
    }
    false
}

/// Text of the comment on `line`, if it has one.
pub fn comment_text(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    for prefix in ["///", "//!", "//"] {
        if let Some(rest) = trimmed.strip_prefix(prefix) {
            return Some(rest.trim());
        }
    }
    let start = line.find("/*")? + 2;
    let rest = &line[start..];
    Some(rest.find("*/").map_or(rest, |end| &rest[..end]).trim())
}
