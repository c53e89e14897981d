//! Tape name to file name normalization.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Turn a tape name into a file-system friendly key.
///
/// Diacritics are stripped (NFD decomposition, combining marks dropped),
/// every run of characters that are not alphanumeric becomes a single `_`,
/// and leading/trailing underscores are trimmed. Applying it twice yields
/// the same result as applying it once.
pub fn sanitize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_separator = false;

    for c in name.nfd().filter(|c| !is_combining_mark(*c)) {
        if c.is_alphanumeric() {
            if pending_separator && !out.is_empty() {
                out.push('_');
            }
            pending_separator = false;
            out.push(c);
        } else {
            pending_separator = true;
        }
    }

    out
}
