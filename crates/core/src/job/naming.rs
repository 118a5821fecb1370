//! On-disk artifact naming.

use rand::Rng;

const TAG_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const TAG_LEN: usize = 4;
const MAX_NAME_LEN: usize = 200;
const FALLBACK_NAME: &str = "download";

/// Random short tag that keeps artifact names collision-resistant.
pub fn generate_tag() -> String {
    let mut rng = rand::rng();
    (0..TAG_LEN)
        .map(|_| TAG_CHARSET[rng.random_range(0..TAG_CHARSET.len())] as char)
        .collect()
}

/// Make an untrusted name safe to use as a single path component.
///
/// Path separators and control characters become `_`, leading dots are
/// stripped, and the result is capped in length (keeping the extension).
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.').trim();

    if cleaned.is_empty() {
        return FALLBACK_NAME.to_string();
    }

    if cleaned.chars().count() <= MAX_NAME_LEN {
        return cleaned.to_string();
    }

    // Keep a short extension if there is one.
    let ext = cleaned
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty() && ext.chars().count() <= 10);
    match ext {
        Some(ext) => {
            let keep = MAX_NAME_LEN - ext.chars().count() - 1;
            let stem: String = cleaned.chars().take(keep).collect();
            format!("{}.{}", stem, ext)
        }
        None => cleaned.chars().take(MAX_NAME_LEN).collect(),
    }
}

/// `<prefix>_<TAG>-<sanitized original>`
pub fn compose_filename(prefix: &str, tag: &str, original: &str) -> String {
    format!("{}_{}-{}", prefix, tag, sanitize_filename(original))
}
