// ABOUTME: Reader turning UTF-8 source text into raw syntactic forms

use crate::error::LispError;
use nom::{
    bytes::complete::take_while1,
    character::complete::char,
    IResult,
};

/// Raw syntactic tree. Everything here is shape, not meaning: special forms,
/// destructuring, and placeholders are resolved later by the analyzer.
#[derive(Debug, Clone, PartialEq)]
pub enum Form {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Keyword(String),
    Symbol(String),
    /// `ns/name` — the first slash splits; any further slashes stay in name.
    NsSymbol { ns: String, name: String },
    List(Vec<Form>),
    Vector(Vec<Form>),
    /// Flat key/value alternation, evaluation resolves duplicates later-wins.
    MapForm(Vec<Form>),
    SetForm(Vec<Form>),
    /// `#(...)` — body forms of a short anonymous function.
    ShortFn(Vec<Form>),
}

impl Form {
    pub fn describe(&self) -> String {
        match self {
            Form::Nil => "nil".to_string(),
            Form::Bool(b) => b.to_string(),
            Form::Int(n) => n.to_string(),
            Form::Float(f) => f.to_string(),
            Form::Str(_) => "a string".to_string(),
            Form::Keyword(k) => format!(":{}", k),
            Form::Symbol(s) => s.clone(),
            Form::NsSymbol { ns, name } => format!("{}/{}", ns, name),
            Form::List(_) => "a list".to_string(),
            Form::Vector(_) => "a vector".to_string(),
            Form::MapForm(_) => "a map".to_string(),
            Form::SetForm(_) => "a set".to_string(),
            Form::ShortFn(_) => "#(...)".to_string(),
        }
    }
}

// ============================================================================
// Position bookkeeping
// ============================================================================

fn line_col(src: &str, rest: &str) -> (usize, usize) {
    let consumed = src.len() - rest.len();
    let upto = &src[..consumed];
    let line = upto.matches('\n').count() + 1;
    let col = consumed - upto.rfind('\n').map(|i| i + 1).unwrap_or(0) + 1;
    (line, col)
}

fn snippet(rest: &str) -> String {
    let line = rest.lines().next().unwrap_or("");
    let cut: String = line.chars().take(24).collect();
    if cut.is_empty() {
        "<end of input>".to_string()
    } else {
        cut
    }
}

fn parse_error(src: &str, rest: &str, message: &str) -> LispError {
    let (line, col) = line_col(src, rest);
    LispError::Parse(format!(
        "parse error at {}:{}: {} (near '{}')",
        line,
        col,
        message,
        snippet(rest)
    ))
}

// ============================================================================
// Token-level parsers (nom)
// ============================================================================

fn is_ws(c: char) -> bool {
    c.is_whitespace() || c == ','
}

fn is_token_char(c: char) -> bool {
    !is_ws(c) && !matches!(c, '(' | ')' | '[' | ']' | '{' | '}' | '"' | ';')
}

/// Skip whitespace (commas included) and `;` line comments.
fn skip_ws(mut input: &str) -> &str {
    loop {
        let trimmed = input.trim_start_matches(is_ws);
        if let Some(rest) = trimmed.strip_prefix(';') {
            input = match rest.find('\n') {
                Some(pos) => &rest[pos + 1..],
                None => "",
            };
        } else if trimmed.len() == input.len() {
            return input;
        } else {
            input = trimmed;
        }
    }
}

fn token(input: &str) -> IResult<&str, &str> {
    take_while1(is_token_char)(input)
}

fn open(c: char) -> impl Fn(&str) -> IResult<&str, char> {
    move |input| char(c)(input)
}

// ============================================================================
// Atom classification
// ============================================================================

fn looks_numeric(tok: &str) -> bool {
    let mut chars = tok.chars();
    match chars.next() {
        Some(c) if c.is_ascii_digit() => true,
        Some('-') | Some('+') | Some('.') => chars.next().is_some_and(|c| c.is_ascii_digit()),
        _ => false,
    }
}

fn classify(src: &str, at: &str, tok: &str) -> Result<Form, LispError> {
    match tok {
        "nil" => return Ok(Form::Nil),
        "true" => return Ok(Form::Bool(true)),
        "false" => return Ok(Form::Bool(false)),
        _ => {}
    }

    if let Some(name) = tok.strip_prefix(':') {
        if name.is_empty() {
            return Err(parse_error(src, at, "empty keyword"));
        }
        return Ok(Form::Keyword(name.to_string()));
    }

    if looks_numeric(tok) {
        if !tok.contains(['.', 'e', 'E']) {
            return tok
                .parse::<i64>()
                .map(Form::Int)
                .map_err(|_| parse_error(src, at, "malformed integer"));
        }
        return tok
            .parse::<f64>()
            .map(Form::Float)
            .map_err(|_| parse_error(src, at, "malformed number"));
    }

    if tok.starts_with('#') {
        return Err(parse_error(src, at, "unsupported dispatch form"));
    }

    if tok.len() > 1 && tok.contains('/') {
        let (ns, name) = tok.split_once('/').expect("contains slash");
        if ns.is_empty() || name.is_empty() {
            return Err(parse_error(src, at, "malformed namespaced symbol"));
        }
        return Ok(Form::NsSymbol {
            ns: ns.to_string(),
            name: name.to_string(),
        });
    }

    Ok(Form::Symbol(tok.to_string()))
}

// ============================================================================
// Strings
// ============================================================================

fn read_string<'a>(src: &str, input: &'a str) -> Result<(Form, &'a str), LispError> {
    debug_assert!(input.starts_with('"'));
    let mut rest = &input[1..];
    let mut out = String::new();

    loop {
        let mut chars = rest.char_indices();
        match chars.next() {
            None => return Err(parse_error(src, input, "unterminated string")),
            Some((_, '"')) => return Ok((Form::Str(out), &rest[1..])),
            Some((_, '\n')) => {
                return Err(parse_error(src, input, "string literals are single-line"))
            }
            Some((_, '\\')) => match chars.next() {
                Some((i, esc)) => {
                    match esc {
                        'n' => out.push('\n'),
                        't' => out.push('\t'),
                        'r' => out.push('\r'),
                        '\\' => out.push('\\'),
                        '"' => out.push('"'),
                        other => {
                            return Err(parse_error(
                                src,
                                rest,
                                &format!("unknown escape \\{}", other),
                            ))
                        }
                    }
                    rest = &rest[i + esc.len_utf8()..];
                }
                None => return Err(parse_error(src, input, "unterminated string")),
            },
            Some((i, c)) => {
                out.push(c);
                rest = &rest[i + c.len_utf8()..];
            }
        }
    }
}

// ============================================================================
// Collections and the driver
// ============================================================================

fn read_until<'a>(
    src: &str,
    mut input: &'a str,
    closer: char,
    what: &str,
) -> Result<(Vec<Form>, &'a str), LispError> {
    let opened_at = input;
    let mut items = Vec::new();
    loop {
        input = skip_ws(input);
        if let Ok((rest, _)) = open(closer)(input) {
            return Ok((items, rest));
        }
        if input.is_empty() {
            return Err(parse_error(
                src,
                opened_at,
                &format!("unclosed {}", what),
            ));
        }
        if input.starts_with([')', ']', '}']) {
            return Err(parse_error(
                src,
                input,
                &format!("mismatched delimiter inside {}", what),
            ));
        }
        let (form, rest) = read_form(src, input)?;
        items.push(form);
        input = rest;
    }
}

fn read_form<'a>(src: &str, input: &'a str) -> Result<(Form, &'a str), LispError> {
    let input = skip_ws(input);

    if let Some(rest) = input.strip_prefix("#{") {
        let (items, rest) = read_until(src, rest, '}', "set literal #{")?;
        return Ok((Form::SetForm(items), rest));
    }
    if let Some(rest) = input.strip_prefix("#(") {
        let (items, rest) = read_until(src, rest, ')', "short fn #(")?;
        return Ok((Form::ShortFn(items), rest));
    }
    if input.starts_with("#\"") {
        return Err(parse_error(
            src,
            input,
            "regex literals are not supported; build one with (re-pattern \"...\")",
        ));
    }

    if let Ok((rest, _)) = open('(')(input) {
        let (items, rest) = read_until(src, rest, ')', "list (")?;
        return Ok((Form::List(items), rest));
    }
    if let Ok((rest, _)) = open('[')(input) {
        let (items, rest) = read_until(src, rest, ']', "vector [")?;
        return Ok((Form::Vector(items), rest));
    }
    if let Ok((rest, _)) = open('{')(input) {
        let (items, rest) = read_until(src, rest, '}', "map {")?;
        if items.len() % 2 != 0 {
            return Err(parse_error(
                src,
                input,
                "map literal requires an even number of forms",
            ));
        }
        return Ok((Form::MapForm(items), rest));
    }

    if input.starts_with('"') {
        return read_string(src, input);
    }

    if input.starts_with([')', ']', '}']) {
        return Err(parse_error(src, input, "unexpected closing delimiter"));
    }

    match token(input) {
        Ok((rest, tok)) => {
            let form = classify(src, input, tok)?;
            Ok((form, rest))
        }
        Err(_) => Err(parse_error(src, input, "expected a form")),
    }
}

/// Parse a whole program: a sequence of top-level forms.
///
/// Extra unmatched closing delimiters at the end of the input are tolerated
/// and ignored (LLMs emit them); anything else after them is an error.
pub fn parse(src: &str) -> Result<Vec<Form>, LispError> {
    let mut input = skip_ws(src);
    let mut forms = Vec::new();

    while !input.is_empty() {
        if input.starts_with([')', ']', '}']) {
            // Tolerated only when nothing but closers remains
            let mut rest = input;
            loop {
                let next = skip_ws(rest.trim_start_matches([')', ']', '}']));
                if next.len() == rest.len() {
                    break;
                }
                rest = next;
            }
            if rest.is_empty() {
                break;
            }
            return Err(parse_error(src, input, "unexpected closing delimiter"));
        }
        let (form, rest) = read_form(src, input)?;
        forms.push(form);
        input = skip_ws(rest);
    }

    Ok(forms)
}
