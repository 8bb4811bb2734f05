/// Characters with meaning in Telegram Markdown. Backslash comes first so
/// escapes inserted for later characters are not escaped again.
const SPECIAL: [char; 14] = [
    '\\', '*', '_', '[', ']', '(', ')', '~', '`', '>', '#', '|', '{', '}',
];

/// Backslash-escape markup characters in interpolated text.
/// `+ - = . !` pass through; they don't break the legacy Markdown parser.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if SPECIAL.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Remove emphasis and code markers for a plain-text resend.
pub fn strip_markup(text: &str) -> String {
    text.replace("**", "").replace(|c: char| c == '*' || c == '`', "")
}
