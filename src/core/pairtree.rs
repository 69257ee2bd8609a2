//! Pairtree path encoding per the Pairtree specification.
//!
//! A key is escaped in two steps (hex escapes for the awkward characters,
//! then the single-character substitutions `/`→`=`, `:`→`+`, `.`→`,`) and
//! split into two-character shards so no directory fans out unboundedly.

const STEP_ONE: &[(char, &str)] = &[
    (' ', "^20"),
    ('"', "^22"),
    ('<', "^3c"),
    ('\\', "^5c"),
    ('*', "^2a"),
    ('=', "^3d"),
    ('^', "^5e"),
    ('+', "^2b"),
    ('>', "^3e"),
    ('|', "^7c"),
    (',', "^2c"),
    ('?', "^3f"),
];

fn char_encode(src: &str) -> Vec<char> {
    let mut out: Vec<char> = Vec::with_capacity(src.len());
    for c in src.chars() {
        match STEP_ONE.iter().find(|(ch, _)| *ch == c) {
            Some((_, esc)) => out.extend(esc.chars()),
            None => out.push(c),
        }
    }
    for c in out.iter_mut() {
        *c = match *c {
            '/' => '=',
            ':' => '+',
            '.' => ',',
            other => other,
        };
    }
    out
}

fn char_decode(s: &str) -> String {
    // Step two first: its substitutions never appear inside a hex escape.
    let mut s = s.replace('=', "/").replace('+', ":").replace(',', ".");
    for (c, esc) in STEP_ONE {
        if s.contains(esc) {
            s = s.replace(esc, &c.to_string());
        }
    }
    s
}

/// Encode a key as a pairtree path (`/`-separated, trailing separator).
pub fn encode(key: &str) -> String {
    let chars = char_encode(key);
    let mut out = String::with_capacity(chars.len() * 2);
    for shard in chars.chunks(2) {
        if !out.is_empty() {
            out.push('/');
        }
        out.extend(shard.iter());
    }
    if !out.is_empty() {
        out.push('/');
    }
    out
}

/// Decode a pairtree path back to the original key.
pub fn decode(path: &str) -> String {
    let joined: String = path.chars().filter(|c| *c != '/').collect();
    char_decode(&joined)
}
