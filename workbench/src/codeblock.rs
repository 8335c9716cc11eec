//! Fenced code block extraction from markdown responses

/// Body of the **last** ```` ```<language> ```` block in `text`.
///
/// The language tag must be followed by a line break. A block only counts once
/// its closing fence is on its own line. Returns `None` when no such block
/// exists or the body is blank.
pub fn extract_last_block(text: &str, language: &str) -> Option<String> {
    let opening = format!("```{}", language);
    let mut last = None;
    let mut cursor = 0;

    while let Some(found) = text[cursor..].find(&opening) {
        let tag_end = cursor + found + opening.len();
        let rest = &text[tag_end..];

        // ```python3 or ```pythonic are different tags
        let Some(body_offset) = body_start(rest) else {
            cursor = tag_end;
            continue;
        };
        let body_start = tag_end + body_offset;

        match closing_fence(&text[body_start..]) {
            Some((body_len, fence_len)) => {
                let body = &text[body_start..body_start + body_len];
                if !body.trim().is_empty() {
                    last = Some(body.to_string());
                }
                cursor = body_start + body_len + fence_len;
            }
            None => break,
        }
    }

    last
}

/// Offset of the block body: skips trailing spaces on the tag line and the
/// line break(s) after it
fn body_start(rest: &str) -> Option<usize> {
    let after_spaces = rest.trim_start_matches([' ', '\t', '\r']);
    if !after_spaces.starts_with('\n') {
        return None;
    }
    let after_breaks = after_spaces.trim_start_matches(['\n', '\r']);
    Some(rest.len() - after_breaks.len())
}

/// Length of the body and of the closing fence (`\n` + ```` ``` ````), which
/// must end the line or the text
fn closing_fence(body: &str) -> Option<(usize, usize)> {
    let mut search = 0;
    while let Some(found) = body[search..].find("\n```") {
        let start = search + found;
        let after = &body[start + 4..];
        if after.is_empty() || after.starts_with('\n') || after.starts_with("\r\n") {
            return Some((start, 4));
        }
        search = start + 4;
    }
    None
}
