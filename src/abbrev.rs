#[inline]
fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        s.len()
    } else {
        let lower_bound = index.saturating_sub(3);
        s.as_bytes()[lower_bound..=index]
            .iter()
            .rposition(|b| is_utf8_char_boundary(*b))
            .map_or(0, |i| lower_bound + i)
    }
}

#[inline]
fn ceil_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        s.len()
    } else {
        (index..s.len())
            .find(|i| s.is_char_boundary(*i))
            .unwrap_or(s.len())
    }
}

#[inline]
fn is_utf8_char_boundary(c: u8) -> bool {
    // This is bit magic equivalent to: b < 128 || b >= 192
    (c as i8) >= -0x40
}

const PLACEHOLDER_HEAD: usize = 8;
const PLACEHOLDER_TAIL: usize = 4;

/// Stand-in name for an author whose metadata we don't have (yet)
pub fn placeholder_name(author: &str) -> String {
    if author.len() <= PLACEHOLDER_HEAD + PLACEHOLDER_TAIL {
        return author.to_owned();
    }

    let head = floor_char_boundary(author, PLACEHOLDER_HEAD);
    let tail = ceil_char_boundary(author, author.len() - PLACEHOLDER_TAIL);
    format!("{}:{}", &author[..head], &author[tail..])
}

pub fn abbreviate(text: &str, len: usize) -> &str {
    let closest = floor_char_boundary(text, len);
    &text[..closest]
}

/// Single line preview of note content
pub fn preview(text: &str, len: usize) -> String {
    let line = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if line.len() > len {
        format!("{}…", abbreviate(&line, len))
    } else {
        line
    }
}
