//! Markdown cleanup for generated text.

/// Remove fenced code blocks that wrap the entire text
///
/// The fence must open on the first line (an optional info string such as
/// `markdown` is allowed) and close on the last. Fences in between must
/// pair up: one with an info string opens a nested block, a bare one closes
/// the innermost open block. A bare fence with nothing open would close the
/// wrapper early, so such text is left alone. Wrappers are stripped until
/// none remain, so `sanitize(sanitize(t)) == sanitize(t)`.
pub fn sanitize(text: &str) -> String {
    let mut current = text.to_string();
    while let Some(inner) = strip_outer_fence(&current) {
        current = inner;
    }
    current
}

fn strip_outer_fence(text: &str) -> Option<String> {
    let trimmed = text.trim();
    let lines: Vec<&str> = trimmed.lines().collect();
    if lines.len() < 2 {
        return None;
    }

    let opener = fence_info(lines[0])?;
    if opener.contains('`') {
        return None;
    }
    if !fence_info(lines[lines.len() - 1])?.is_empty() {
        return None;
    }

    let body = &lines[1..lines.len() - 1];
    let mut depth = 0usize;
    for line in body {
        if let Some(info) = fence_info(line) {
            if !info.is_empty() {
                depth += 1;
            } else if depth > 0 {
                depth -= 1;
            } else {
                return None;
            }
        }
    }
    if depth != 0 {
        return None;
    }

    Some(body.join("\n").trim().to_string())
}

/// Info string of a fence line, or `None` if the line isn't a fence
fn fence_info(line: &str) -> Option<&str> {
    line.trim().strip_prefix("```").map(str::trim)
}

/// Replace straight double quotes with alternating curly quotes
pub fn normalize_quotes(text: &str) -> String {
    let mut open = true;
    text.chars()
        .map(|c| {
            if c == '"' {
                let quote = if open { '\u{201C}' } else { '\u{201D}' };
                open = !open;
                quote
            } else {
                c
            }
        })
        .collect()
}
