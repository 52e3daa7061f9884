/// Maps byte offsets to 1-based `(line, column)` pairs.
pub struct LineIndex {
    line_starts: Vec<usize>,
}

impl LineIndex {
    pub fn new(source: &str) -> Self {
        let mut line_starts = vec![0];
        for (i, b) in source.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i + 1);
            }
        }
        LineIndex { line_starts }
    }

    pub fn locate(&self, offset: usize) -> (u32, u32) {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        ((line + 1) as u32, (offset - self.line_starts[line] + 1) as u32)
    }
}

/// Parses the text of a numeric literal token (decimal, hex, binary or octal,
/// with optional `_` separators).
pub fn parse_numeric_literal(text: &str) -> Option<f64> {
    let cleaned: String = text.chars().filter(|c| *c != '_').collect();
    let radix = if cleaned.len() > 2 && cleaned.starts_with('0') {
        match cleaned.as_bytes()[1] {
            b'x' | b'X' => Some(16),
            b'b' | b'B' => Some(2),
            b'o' | b'O' => Some(8),
            _ => None,
        }
    } else {
        None
    };
    match radix {
        Some(radix) => {
            let mut value = 0f64;
            for c in cleaned[2..].chars() {
                value = value * radix as f64 + c.to_digit(radix)? as f64;
            }
            Some(value)
        }
        None => cleaned.parse::<f64>().ok(),
    }
}

/// Resolves escape sequences in the body of a string literal.
pub fn unescape_string_literal(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            'b' => out.push('\u{8}'),
            'f' => out.push('\u{c}'),
            'v' => out.push('\u{b}'),
            '0' => out.push('\0'),
            '\n' => {}
            'x' => {
                let hex: String = chars.by_ref().take(2).collect();
                out.push(char::from_u32(u32::from_str_radix(&hex, 16).ok()?)?);
            }
            'u' => {
                let code = if chars.peek() == Some(&'{') {
                    chars.next();
                    let hex: String = chars.by_ref().take_while(|c| *c != '}').collect();
                    u32::from_str_radix(&hex, 16).ok()?
                } else {
                    let hex: String = chars.by_ref().take(4).collect();
                    u32::from_str_radix(&hex, 16).ok()?
                };
                if (0xD800..0xDC00).contains(&code) {
                    // High surrogate: pair it with a following \uXXXX low surrogate.
                    let mut lookahead = chars.clone();
                    if lookahead.next() == Some('\\') && lookahead.next() == Some('u') {
                        let hex: String = lookahead.by_ref().take(4).collect();
                        if let Ok(low) = u32::from_str_radix(&hex, 16) {
                            if (0xDC00..0xE000).contains(&low) {
                                chars = lookahead;
                                let combined = 0x10000 + ((code - 0xD800) << 10) + (low - 0xDC00);
                                out.push(char::from_u32(combined)?);
                                continue;
                            }
                        }
                    }
                    out.push('\u{FFFD}');
                } else {
                    out.push(char::from_u32(code).unwrap_or('\u{FFFD}'));
                }
            }
            other => out.push(other),
        }
    }
    Some(out)
}
