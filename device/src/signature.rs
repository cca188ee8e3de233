//! OpenCL C kernel signature scanner.
//!
//! Recovers, for every `kernel` function in a source, the ordered parameter
//! metadata a driver would otherwise obtain from the compiled binary:
//! address space, declared type spelling, pointer-ness, and a static
//! element count when the declaration carries one. The scanner reads
//! declarations only; it never evaluates the kernel body beyond checking
//! that braces balance.

use cldrive_dtype::AddrSpace;

use crate::error::{BuildSnafu, Result};

/// One scanned kernel parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamDecl {
    pub index: usize,
    pub addr_space: AddrSpace,
    /// The type spelling as written, qualifiers and stars removed
    /// (e.g. `float4`, `unsigned char`).
    pub type_name: String,
    pub is_pointer: bool,
    /// Static element count from an array-style declaration (`float a[64]`).
    pub declared_elems: Option<usize>,
    pub name: String,
}

/// One scanned kernel: entry point name plus ordered parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelDecl {
    pub name: String,
    pub params: Vec<ParamDecl>,
}

/// Scan a source for kernel declarations, in source order.
///
/// Malformed declarations are build errors: the returned diagnostic names
/// the offending parameter, the way a compiler log would.
pub fn scan(source: &str) -> Result<Vec<KernelDecl>> {
    let text = strip_comments_and_directives(source);
    let chars: Vec<char> = text.chars().collect();

    let mut decls = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let Some(start) = find_word(&chars, i, &["kernel", "__kernel"]) else {
            break;
        };
        i = start.1;

        // The qualifier must be followed by the void return type, then the
        // kernel name, then the parameter list.
        let Some((word, next)) = next_word(&chars, i) else { continue };
        if word != "void" {
            continue;
        }
        let Some((name, next)) = next_word(&chars, next) else { continue };
        let Some(open) = next_non_space(&chars, next) else { continue };
        if chars[open] != '(' {
            continue;
        }

        let close = matching_paren(&chars, open).ok_or_else(|| {
            BuildSnafu { log: format!("syntax error: unterminated parameter list for kernel '{name}'") }.build()
        })?;

        let param_text: String = chars[open + 1..close].iter().collect();
        let params = parse_params(&name, &param_text)?;
        decls.push(KernelDecl { name, params });

        i = close + 1;
    }

    Ok(decls)
}

/// Check that braces balance over the comment-stripped source. The
/// simulator uses this as its one whole-program syntax diagnostic.
pub fn braces_balanced(source: &str) -> bool {
    let text = strip_comments_and_directives(source);
    let mut depth: i64 = 0;
    for c in text.chars() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

fn strip_comments_and_directives(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = ' ';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
                out.push(' ');
            }
            '/' if chars.peek() == Some(&'/') => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            _ => out.push(c),
        }
    }

    // Preprocessor lines are not declarations; drop them wholesale.
    out.lines().filter(|line| !line.trim_start().starts_with('#')).collect::<Vec<_>>().join("\n")
}

const fn is_ident(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Find the next standalone occurrence of any of `words`, returning
/// (start index, index past the word).
fn find_word(chars: &[char], mut from: usize, words: &[&str]) -> Option<(usize, usize)> {
    while from < chars.len() {
        if is_ident(chars[from]) && (from == 0 || !is_ident(chars[from - 1])) {
            let mut end = from;
            while end < chars.len() && is_ident(chars[end]) {
                end += 1;
            }
            let word: String = chars[from..end].iter().collect();
            if words.contains(&word.as_str()) {
                return Some((from, end));
            }
            from = end;
        } else {
            from += 1;
        }
    }
    None
}

fn next_non_space(chars: &[char], mut from: usize) -> Option<usize> {
    while from < chars.len() {
        if !chars[from].is_whitespace() {
            return Some(from);
        }
        from += 1;
    }
    None
}

fn next_word(chars: &[char], from: usize) -> Option<(String, usize)> {
    let start = next_non_space(chars, from)?;
    if !is_ident(chars[start]) {
        return None;
    }
    let mut end = start;
    while end < chars.len() && is_ident(chars[end]) {
        end += 1;
    }
    Some((chars[start..end].iter().collect(), end))
}

fn matching_paren(chars: &[char], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, &c) in chars.iter().enumerate().skip(open) {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_params(kernel: &str, text: &str) -> Result<Vec<ParamDecl>> {
    let mut params = Vec::new();

    for (index, raw) in split_top_level(text).into_iter().enumerate() {
        let raw = raw.trim();
        if raw.is_empty() || raw == "void" {
            continue;
        }
        params.push(parse_param(kernel, index, raw)?);
    }

    Ok(params)
}

/// Split at commas outside parentheses and brackets.
fn split_top_level(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();

    for c in text.chars() {
        match c {
            '(' | '[' => {
                depth += 1;
                current.push(c);
            }
            ')' | ']' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current);
    }

    parts
}

fn parse_param(kernel: &str, index: usize, raw: &str) -> Result<ParamDecl> {
    let mut is_pointer = raw.contains('*');
    let mut declared_elems = None;

    // An array-style declaration decays to a pointer and carries a static
    // element count when the bound is a literal. The closing bracket must
    // follow the opening one; anything else is malformed source, not a
    // reason to panic.
    let mut body = raw.replace('*', " ");
    if let Some(bracket) = body.find('[') {
        let Some(close) = body[bracket..].find(']') else {
            return BuildSnafu { log: format!("syntax error: malformed parameter {index} of kernel '{kernel}': '{raw}'") }
                .fail();
        };
        let end = bracket + close;
        let bound = body[bracket + 1..end].trim();
        declared_elems = bound.parse::<usize>().ok();
        is_pointer = true;
        body.replace_range(bracket..=end, " ");
    }

    let mut addr_space = None;
    let mut tokens: Vec<&str> = Vec::new();

    for token in body.split_whitespace() {
        if matches!(
            token,
            "const"
                | "restrict"
                | "volatile"
                | "__restrict"
                | "__restrict__"
                | "read_only"
                | "write_only"
                | "read_write"
                | "__read_only"
                | "__write_only"
                | "__read_write"
        ) {
            continue;
        }
        if let Some(space) = AddrSpace::parse(token) {
            // First qualifier wins; a second is a declaration error we let
            // slide rather than reject.
            addr_space.get_or_insert(space);
            continue;
        }
        tokens.push(token);
    }

    if tokens.is_empty() {
        return BuildSnafu { log: format!("syntax error: malformed parameter {index} of kernel '{kernel}': '{raw}'") }
            .fail();
    }

    // Multi-word types ("unsigned char") keep everything but the trailing
    // identifier; a lone token is an unnamed parameter's type.
    let (type_tokens, name) = match tokens.split_last() {
        Some((name, rest)) if !rest.is_empty() => (rest, (*name).to_string()),
        _ => (&tokens[..], String::new()),
    };

    let addr_space = addr_space.unwrap_or(if is_pointer { AddrSpace::Global } else { AddrSpace::Private });

    Ok(ParamDecl { index, addr_space, type_name: type_tokens.join(" "), is_pointer, declared_elems, name })
}
