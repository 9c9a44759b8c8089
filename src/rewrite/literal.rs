use crate::edit::rewrite_file;
use crate::report::ItemOutcome;
use std::borrow::Cow;
use std::path::Path;

/// Swap every occurrence of `token` for `replacement` in one file.
///
/// Best-effort: a missing or unreadable file becomes a skipped outcome. A
/// file without the token is left byte-identical.
pub fn rewrite_literal(
    path: &Path,
    token: &str,
    replacement: &str,
    match_line_endings: bool,
) -> ItemOutcome {
    let result = rewrite_file(path, |content| {
        replace_literal(content, token, replacement, match_line_endings)
    });
    ItemOutcome::from_edit(path, result)
}

/// Pure form of [`rewrite_literal`]; `None` when the token does not occur.
pub fn replace_literal(
    content: &str,
    token: &str,
    replacement: &str,
    match_line_endings: bool,
) -> Option<String> {
    let crlf = match_line_endings && content.contains("\r\n");
    let token = with_line_endings(token, crlf);
    let replacement = with_line_endings(replacement, crlf);

    if token.is_empty() || !content.contains(token.as_ref()) {
        return None;
    }
    Some(content.replace(token.as_ref(), replacement.as_ref()))
}

fn with_line_endings(text: &str, crlf: bool) -> Cow<'_, str> {
    if crlf && text.contains('\n') {
        Cow::Owned(text.replace("\r\n", "\n").replace('\n', "\r\n"))
    } else {
        Cow::Borrowed(text)
    }
}
