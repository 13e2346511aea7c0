//! `%s` / `%Ns` template expansion against a checksum.
//!
//! Templates are used for cache locations (`/cache/%2s/%2s/%s`), search path
//! directories and URL templates (`http://host/md5/%s`). Placeholders consume
//! the checksum from left to right:
//! - `%s` inserts everything not consumed yet
//! - `%Ns` inserts the next `N` characters (clamped to what remains)
//! - any other `%x` is copied through literally
//!
//! Whatever is left of the checksum after the template is exhausted is
//! appended as a final path segment.

/// Expand `template` against `checksum`, returning a newly allocated path.
pub fn expand(template: &str, checksum: &str) -> String {
    let mut out = String::with_capacity(template.len() + checksum.len() + 1);
    let mut rest = template;
    let mut remaining = checksum;

    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(tail) = after.strip_prefix('s') {
            out.push_str(remaining);
            remaining = "";
            rest = tail;
            continue;
        }

        let digits = after.bytes().take_while(u8::is_ascii_digit).count();
        if digits > 0 && after[digits..].starts_with('s') {
            // An absurd width simply consumes the whole remainder.
            let width = after[..digits].parse::<usize>().unwrap_or(usize::MAX);
            let (head, tail) = split_prefix(remaining, width);
            out.push_str(head);
            remaining = tail;
            rest = &after[digits + 1..];
            continue;
        }

        out.push('%');
        match after.chars().next() {
            Some(c) => {
                out.push(c);
                rest = &after[c.len_utf8()..];
            }
            None => rest = after,
        }
    }

    out.push_str(rest);
    if !remaining.is_empty() {
        if !out.is_empty() && !out.ends_with('/') {
            out.push('/');
        }
        out.push_str(remaining);
    }
    out
}

fn split_prefix(s: &str, width: usize) -> (&str, &str) {
    let mut at = width.min(s.len());
    while !s.is_char_boundary(at) {
        at -= 1;
    }
    s.split_at(at)
}
