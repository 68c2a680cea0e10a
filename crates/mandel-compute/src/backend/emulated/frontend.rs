//! Source checks performed by the emulated compiler.
//!
//! This is not a C compiler. It rejects what a real front-end would reject
//! before code generation could matter for the host: unterminated comments,
//! unbalanced delimiters, malformed `__kernel` signatures and parameter types
//! a host cannot bind. Diagnostics use clang's `file:line:col: error:` shape.
//!
//! Kernels run as host implementations, so a program that passes those checks
//! must still match the OpenCL C of a built-in kernel token for token
//! ([`conform`]). Whitespace and comments may differ, nothing else may.

use std::fmt;

const SOURCE_NAME: &str = "<program source>";
const HOST_ONLY: &str = "the emulated device runs only its built-in kernels, use the OpenCL backend for other kernel source";

const QUALIFIERS: &[&str] = &["const", "__private", "private", "restrict", "volatile"];
const ADDRESS_SPACES: &[&str] = &["__global", "global", "__constant", "constant", "__local", "local"];

/// Host-visible kind of a kernel parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ParamKind {
    Pointer,
    Int,
    Float,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct KernelSignature {
    pub name: String,
    pub params: Vec<ParamKind>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Diagnostic {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}: error: {}", SOURCE_NAME, self.line, self.column, self.message)
    }
}

/// Render diagnostics as a build log.
pub(crate) fn format_log(diags: &[Diagnostic]) -> String {
    let mut log = String::new();
    for d in diags {
        log.push_str(&d.to_string());
        log.push('\n');
    }
    let n = diags.len();
    log.push_str(&format!("{} error{} generated.\n", n, if n == 1 { "" } else { "s" }));
    log
}

/// Check `source` and collect its kernel signatures.
pub(crate) fn compile(source: &str) -> Result<Vec<KernelSignature>, Vec<Diagnostic>> {
    let code = strip_comments(source).map_err(|d| vec![d])?;
    if let Some(d) = check_delimiters(&code) {
        return Err(vec![d]);
    }
    parse_kernels(&code)
}

fn diagnostic(text: &str, offset: usize, message: impl Into<String>) -> Diagnostic {
    let (line, column) = position(text, offset);
    Diagnostic { line, column, message: message.into() }
}

/// 1-based line and column of a byte offset.
fn position(text: &str, offset: usize) -> (usize, usize) {
    let before = &text[..offset];
    let line = before.matches('\n').count() + 1;
    let column = before.rfind('\n').map_or(offset, |nl| offset - nl - 1) + 1;
    (line, column)
}

/// Blank out comments byte for byte so offsets stay valid.
fn strip_comments(source: &str) -> Result<String, Diagnostic> {
    let bytes = source.as_bytes();
    let mut out = bytes.to_vec();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    out[i] = b' ';
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                let start = i;
                i += 2;
                loop {
                    if i + 1 >= bytes.len() {
                        return Err(diagnostic(source, start, "unterminated /* comment"));
                    }
                    if bytes[i] == b'*' && bytes[i + 1] == b'/' {
                        i += 2;
                        break;
                    }
                    i += 1;
                }
                for b in &mut out[start..i] {
                    if *b != b'\n' {
                        *b = b' ';
                    }
                }
            }
            b'"' => {
                i += 1;
                while i < bytes.len() && bytes[i] != b'"' {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
                i += 1;
            }
            _ => i += 1,
        }
    }

    Ok(String::from_utf8_lossy(&out).into_owned())
}

fn closing(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}

fn opening(close: char) -> char {
    match close {
        ')' => '(',
        ']' => '[',
        _ => '{',
    }
}

fn check_delimiters(code: &str) -> Option<Diagnostic> {
    let mut stack: Vec<(char, usize)> = Vec::new();

    for (offset, c) in code.char_indices() {
        match c {
            '(' | '[' | '{' => stack.push((c, offset)),
            ')' | ']' | '}' => match stack.pop() {
                Some((open, _)) if open == opening(c) => {}
                Some((open, at)) => {
                    let (line, column) = position(code, at);
                    return Some(diagnostic(
                        code,
                        offset,
                        format!("expected '{}' to match '{}' at {}:{}", closing(open), open, line, column),
                    ));
                }
                None => return Some(diagnostic(code, offset, format!("extraneous closing '{c}'"))),
            },
            _ => {}
        }
    }

    stack.pop().map(|(open, at)| {
        let (line, column) = position(code, at);
        diagnostic(
            code,
            code.len(),
            format!("expected '{}' at end of input to match '{}' at {}:{}", closing(open), open, line, column),
        )
    })
}

fn identifiers(code: &str) -> Vec<(usize, &str)> {
    let mut out = Vec::new();
    let mut start = None;
    for (i, c) in code.char_indices() {
        let ident = c == '_' || c.is_ascii_alphanumeric();
        match (start, ident) {
            (None, true) => start = Some(i),
            (Some(s), false) => {
                out.push((s, &code[s..i]));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        out.push((s, &code[s..]));
    }
    out
}

/// Tokens for comparison. Runs of identifier characters and `.` stay whole so
/// `2.0f` is one token; any other non-blank character is a token of its own.
fn tokens(code: &str) -> Vec<(usize, &str)> {
    let mut out = Vec::new();
    let mut start = None;
    for (i, c) in code.char_indices() {
        let word = c == '_' || c == '.' || c.is_ascii_alphanumeric();
        if let Some(s) = start {
            if word {
                continue;
            }
            out.push((s, &code[s..i]));
            start = None;
        }
        if word {
            start = Some(i);
        } else if !c.is_whitespace() {
            out.push((i, &code[i..i + c.len_utf8()]));
        }
    }
    if let Some(s) = start {
        out.push((s, &code[s..]));
    }
    out
}

/// Accept `source` only if it is `reference` up to whitespace and comments.
///
/// The first differing token is reported at the end of the last token both
/// agree on, where a missing `;` or operand would have to go.
pub(crate) fn conform(source: &str, reference: &str) -> Result<(), Diagnostic> {
    let code = strip_comments(source)?;
    let expected = strip_comments(reference)?;
    let got = tokens(&code);
    let want = tokens(&expected);

    let at = got
        .iter()
        .zip(&want)
        .position(|(g, w)| g.1 != w.1)
        .unwrap_or(got.len().min(want.len()));
    let after = at.checked_sub(1).map_or(0, |i| got[i].0 + got[i].1.len());

    let (offset, message) = match (got.get(at), want.get(at)) {
        (None, None) => return Ok(()),
        (Some(&(_, g)), Some(&(_, w))) => (after, format!("expected '{w}' before '{g}'")),
        (None, Some(&(_, w))) => (after, format!("expected '{w}' at end of input")),
        (Some(&(offset, g)), None) => (offset, format!("unexpected '{g}' after the end of the kernel")),
    };
    Err(diagnostic(&code, offset, format!("{message}; {HOST_ONLY}")))
}

fn parse_kernels(code: &str) -> Result<Vec<KernelSignature>, Vec<Diagnostic>> {
    let mut kernels: Vec<KernelSignature> = Vec::new();
    let mut diags = Vec::new();

    for (offset, word) in identifiers(code) {
        if word != "__kernel" && word != "kernel" {
            continue;
        }
        match parse_signature(code, offset + word.len()) {
            Ok(sig) if kernels.iter().any(|k| k.name == sig.name) => {
                diags.push(diagnostic(code, offset, format!("redefinition of '{}'", sig.name)));
            }
            Ok(sig) => kernels.push(sig),
            Err(d) => diags.push(d),
        }
    }

    if diags.is_empty() { Ok(kernels) } else { Err(diags) }
}

struct Scanner<'a> {
    code: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn peek(&self) -> Option<char> {
        self.code[self.pos..].chars().next()
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.peek() {
            if !c.is_whitespace() {
                break;
            }
            self.pos += c.len_utf8();
        }
    }

    fn ident(&mut self) -> Option<&'a str> {
        self.skip_ws();
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c != '_' && !c.is_ascii_alphanumeric() {
                break;
            }
            self.pos += 1;
        }
        (self.pos > start).then(|| &self.code[start..self.pos])
    }

    fn expect(&mut self, c: char) -> bool {
        self.skip_ws();
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Offset of the `)` closing a group whose `(` was just consumed.
    fn close_group(&mut self) -> usize {
        let mut depth = 1usize;
        for (i, c) in self.code[self.pos..].char_indices() {
            match c {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        let close = self.pos + i;
                        self.pos = close + 1;
                        return close;
                    }
                }
                _ => {}
            }
        }
        self.pos = self.code.len();
        self.code.len()
    }

    fn error(&self, message: impl Into<String>) -> Diagnostic {
        diagnostic(self.code, self.pos, message)
    }
}

fn parse_signature(code: &str, from: usize) -> Result<KernelSignature, Diagnostic> {
    let mut s = Scanner { code, pos: from };

    let mut ret = s.ident();
    while ret == Some("__attribute__") {
        if !s.expect('(') {
            return Err(s.error("expected '(' after '__attribute__'"));
        }
        s.close_group();
        ret = s.ident();
    }
    match ret {
        Some("void") => {}
        Some(other) => {
            return Err(s.error(format!("kernel functions must have 'void' return type, found '{other}'")));
        }
        None => return Err(s.error("expected return type after '__kernel'")),
    }

    let name = s.ident().ok_or_else(|| s.error("expected kernel name"))?.to_string();
    if !s.expect('(') {
        return Err(s.error(format!("expected '(' after kernel name '{name}'")));
    }
    let params_start = s.pos;
    let params_end = s.close_group();
    if !s.expect('{') {
        return Err(s.error(format!("expected '{{' to begin the body of kernel '{name}'")));
    }

    let text = &code[params_start..params_end];
    let mut params = Vec::new();
    if !matches!(text.trim(), "" | "void") {
        let mut offset = params_start;
        for param in text.split(',') {
            let kind = classify_param(param).map_err(|msg| {
                let lead = param.len() - param.trim_start().len();
                diagnostic(code, offset + lead, msg)
            })?;
            params.push(kind);
            offset += param.len() + 1;
        }
    }

    Ok(KernelSignature { name, params })
}

fn classify_param(param: &str) -> Result<ParamKind, String> {
    let words: Vec<&str> = param
        .split(|c: char| c.is_whitespace() || c == '*')
        .filter(|w| !w.is_empty())
        .collect();

    if param.contains('*') {
        if !words.iter().any(|w| ADDRESS_SPACES.contains(w)) {
            return Err(
                "pointer arguments to kernel functions must be declared in the '__global', '__constant' or '__local' address space"
                    .to_string(),
            );
        }
        return Ok(ParamKind::Pointer);
    }

    let ty = words
        .iter()
        .find(|w| !QUALIFIERS.contains(w))
        .ok_or_else(|| "expected parameter declaration".to_string())?;
    match *ty {
        "int" | "uint" | "unsigned" => Ok(ParamKind::Int),
        "float" => Ok(ParamKind::Float),
        other => Err(format!("unsupported kernel parameter type '{other}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANDELBROT: &str = include_str!("../../../kernels/mandelbrot.cl");

    #[test]
    fn bundled_kernel_compiles() {
        let kernels = compile(MANDELBROT).unwrap();
        assert_eq!(kernels.len(), 1);
        assert_eq!(kernels[0].name, "solve_mandelbrot");
        assert_eq!(
            kernels[0].params,
            vec![ParamKind::Pointer, ParamKind::Int, ParamKind::Int, ParamKind::Int, ParamKind::Float]
        );
    }

    #[test]
    fn missing_brace_reports_position() {
        let src = "__kernel void k(__global uchar *out)\n{\n    out[0] = 1;\n";
        let diags = compile(src).unwrap_err();
        assert_eq!(diags.len(), 1);
        assert!(diags[0].message.contains("expected '}'"), "{}", diags[0].message);
        assert!(diags[0].message.contains("2:1"));
    }

    #[test]
    fn mismatched_delimiter() {
        let src = "__kernel void k(__global uchar *out)\n{\n    out[0) = 1;\n}\n";
        let diags = compile(src).unwrap_err();
        assert_eq!((diags[0].line, diags[0].column), (3, 10));
        assert!(diags[0].message.starts_with("expected ']'"));
    }

    #[test]
    fn unterminated_comment() {
        let diags = compile("/* never closed\n__kernel void k() {}").unwrap_err();
        assert_eq!(diags[0].message, "unterminated /* comment");
        assert_eq!((diags[0].line, diags[0].column), (1, 1));
    }

    #[test]
    fn comments_hide_delimiters() {
        let src = "// { (\n/* ] */ __kernel void k(const int n) { }";
        let kernels = compile(src).unwrap();
        assert_eq!(kernels[0].params, vec![ParamKind::Int]);
    }

    #[test]
    fn non_void_kernel_rejected() {
        let diags = compile("__kernel int k() { return 0; }").unwrap_err();
        assert!(diags[0].message.contains("'void' return type"));
    }

    #[test]
    fn private_pointer_rejected() {
        let diags = compile("__kernel void k(uchar *out) { }").unwrap_err();
        assert!(diags[0].message.contains("address space"));
        assert_eq!(diags[0].column, 17);
    }

    #[test]
    fn unsupported_scalar_type() {
        let diags = compile("__kernel void k(const double x) { }").unwrap_err();
        assert_eq!(diags[0].message, "unsupported kernel parameter type 'double'");
    }

    #[test]
    fn duplicate_kernel_names() {
        let diags = compile("__kernel void k() { }\n__kernel void k() { }").unwrap_err();
        assert!(diags[0].message.contains("redefinition of 'k'"));
        assert_eq!(diags[0].line, 2);
    }

    #[test]
    fn attributes_are_skipped() {
        let src = "__kernel __attribute__((reqd_work_group_size(64, 1, 1))) void k(void) { }";
        let kernels = compile(src).unwrap();
        assert!(kernels[0].params.is_empty());
    }

    #[test]
    fn bundled_kernel_conforms_to_itself() {
        assert_eq!(conform(MANDELBROT, MANDELBROT), Ok(()));
    }

    #[test]
    fn layout_and_comments_may_differ() {
        let reformatted = format!("// tuned copy\n{}", MANDELBROT.replace("    ", "\t").replace(" * ", "*"));
        assert_eq!(conform(&reformatted, MANDELBROT), Ok(()));
    }

    #[test]
    fn missing_semicolon_is_reported_where_it_belongs() {
        let src = MANDELBROT.replacen("get_global_id(0);", "get_global_id(0)", 1);
        assert!(compile(&src).is_ok());

        let d = conform(&src, MANDELBROT).unwrap_err();
        assert!(d.message.starts_with("expected ';' before 'if'"), "{}", d.message);
        assert_eq!((d.line, d.column), (13, 37));
    }

    #[test]
    fn different_body_is_rejected() {
        let src = "__kernel void solve_mandelbrot(__global uchar *image, const int height, const int width,\n\
                   const int max_iter, const float max_abs)\n{\n    image[4 * get_global_id(0)] = 0;\n}\n";
        let d = conform(src, MANDELBROT).unwrap_err();
        assert_eq!(d.line, 3);
        assert!(d.message.contains("before 'image'"), "{}", d.message);
        assert!(d.message.ends_with("use the OpenCL backend for other kernel source"));
    }

    #[test]
    fn trailing_code_is_rejected() {
        let src = format!("{MANDELBROT}\n__kernel void extra(void) {{ }}\n");
        let d = conform(&src, MANDELBROT).unwrap_err();
        assert!(d.message.starts_with("unexpected '__kernel' after the end of the kernel"), "{}", d.message);
    }

    #[test]
    fn log_has_summary_line() {
        let diags = compile("__kernel void k() {").unwrap_err();
        let log = format_log(&diags);
        assert!(log.starts_with("<program source>:1:20: error:"));
        assert!(log.ends_with("1 error generated.\n"));
    }
}
