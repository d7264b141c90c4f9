//! Multi-value field parsing.
//!
//! Source rows encode lists either as comma-delimited text (`"Action,Indie"`) or as
//! list literals (`"['English', 'French']"`). Parsing never fails: a literal that
//! cannot be read degrades to a plain comma split when the text contains a comma,
//! and to an empty list otherwise.

const SEPARATOR: char = ',';

/// Placeholders that upstream exports write for a missing value.
const NULL_MARKERS: [&str; 4] = ["None", "null", "nan", "NaN"];

/// Parse a raw multi-value field into trimmed, non-empty values in source order.
pub fn normalize_multi(raw: Option<&str>) -> Vec<String> {
    let Some(text) = raw.map(str::trim).filter(|t| !t.is_empty()) else {
        return Vec::new();
    };
    if NULL_MARKERS.contains(&text) {
        return Vec::new();
    }

    if text.starts_with('[') || text.starts_with('\'') || text.starts_with('"') {
        return match parse_literal(text) {
            Some(items) => clean(items),
            None => degrade(text),
        };
    }

    clean(text.split(SEPARATOR).map(str::to_string))
}

fn clean<I>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Best-effort recovery for a literal that failed to parse.
fn degrade(text: &str) -> Vec<String> {
    if !text.contains(SEPARATOR) {
        return Vec::new();
    }
    text.split(SEPARATOR)
        .map(|piece| {
            piece
                .trim()
                .trim_matches(|c: char| matches!(c, '[' | ']' | '\'' | '"') || c.is_whitespace())
                .to_string()
        })
        .filter(|s| !s.is_empty())
        .collect()
}

/// Reads either a bracketed list of quoted strings or a single quoted string.
fn parse_literal(text: &str) -> Option<Vec<String>> {
    let mut chars = text.chars().peekable();
    match chars.peek()? {
        '\'' | '"' => {
            let single = parse_quoted(&mut chars)?;
            skip_ws(&mut chars);
            return chars.next().is_none().then(|| vec![single]);
        }
        '[' => {
            chars.next();
        }
        _ => return None,
    }

    let mut items = Vec::new();
    loop {
        skip_ws(&mut chars);
        match chars.peek()? {
            ']' => {
                chars.next();
                break;
            }
            '\'' | '"' => items.push(parse_quoted(&mut chars)?),
            _ => return None,
        }
        skip_ws(&mut chars);
        match chars.next()? {
            ',' => continue,
            ']' => break,
            _ => return None,
        }
    }
    skip_ws(&mut chars);
    chars.next().is_none().then_some(items)
}

fn parse_quoted<I>(chars: &mut std::iter::Peekable<I>) -> Option<String>
where
    I: Iterator<Item = char>,
{
    let quote = chars.next()?;
    let mut out = String::new();
    loop {
        match chars.next()? {
            '\\' => match chars.next()? {
                'n' => out.push('\n'),
                't' => out.push('\t'),
                'r' => out.push('\r'),
                c @ ('\\' | '\'' | '"') => out.push(c),
                other => {
                    out.push('\\');
                    out.push(other);
                }
            },
            c if c == quote => return Some(out),
            c => out.push(c),
        }
    }
}

fn skip_ws<I>(chars: &mut std::iter::Peekable<I>)
where
    I: Iterator<Item = char>,
{
    while chars.peek().is_some_and(|c| c.is_whitespace()) {
        chars.next();
    }
}
