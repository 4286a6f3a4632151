//! Tokenizer for the cell language.
//!
//! Produces an indentation-aware token stream: `Indent`/`Dedent` around
//! blocks and one `Newline` per logical line. Newlines inside brackets are
//! ignored.

use crate::error::ScriptError;

/// Token kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),
    /// Body of an f-string, escapes already processed.
    FStr(String),
    Op(&'static str),
    Newline,
    Indent,
    Dedent,
    Eof,
}

/// A token with the line it starts on.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: usize,
}

const TAB_WIDTH: usize = 8;

// Longest operators first so `**=` wins over `**` and `*`.
const OPERATORS: &[&str] = &[
    "**=", "//=", "==", "!=", "<=", ">=", "+=", "-=", "*=", "/=", "%=", "**", "//", "->", "+",
    "-", "*", "/", "%", "<", ">", "=", "(", ")", "[", "]", "{", "}", ",", ":", ".", ";",
];

/// Tokenize source text.
///
/// # Errors
/// Returns a `SyntaxError` or `IndentationError` for malformed input.
pub fn tokenize(src: &str) -> Result<Vec<Token>, ScriptError> {
    Lexer::new(src).run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    depth: usize,
    at_line_start: bool,
    indents: Vec<usize>,
    tokens: Vec<Token>,
}

impl Lexer {
    fn new(src: &str) -> Self {
        Self {
            chars: src.chars().collect(),
            pos: 0,
            line: 1,
            depth: 0,
            at_line_start: true,
            indents: vec![0],
            tokens: Vec::new(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn push(&mut self, tok: Tok, line: usize) {
        self.tokens.push(Token { tok, line });
    }

    fn run(mut self) -> Result<Vec<Token>, ScriptError> {
        loop {
            if self.at_line_start && self.depth == 0 && !self.indentation()? {
                continue;
            }
            let Some(c) = self.peek() else { break };
            match c {
                '\n' => {
                    if self.depth == 0 {
                        self.end_logical_line();
                        self.at_line_start = true;
                    }
                    self.line += 1;
                    self.pos += 1;
                }
                ' ' | '\t' | '\r' | '\x0c' => self.pos += 1,
                '\\' if self.peek_at(1) == Some('\n') => {
                    self.pos += 2;
                    self.line += 1;
                }
                '#' => self.skip_comment(),
                '"' | '\'' => {
                    let line = self.line;
                    let text = self.string(false)?;
                    self.push(Tok::Str(text), line);
                }
                c if c.is_ascii_digit()
                    || (c == '.' && self.peek_at(1).is_some_and(|d| d.is_ascii_digit())) =>
                {
                    self.number()?;
                }
                c if c.is_alphabetic() || c == '_' => self.word()?,
                _ => self.operator()?,
            }
        }

        self.end_logical_line();
        let line = self.line;
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(Tok::Dedent, line);
        }
        self.push(Tok::Eof, line);
        Ok(self.tokens)
    }

    fn end_logical_line(&mut self) {
        if matches!(
            self.tokens.last(),
            Some(Token {
                tok: Tok::Newline | Tok::Indent | Tok::Dedent,
                ..
            }) | None
        ) {
            return;
        }
        let line = self.line;
        self.push(Tok::Newline, line);
    }

    /// Measure leading whitespace. Returns `false` when the line was blank
    /// and has been consumed.
    fn indentation(&mut self) -> Result<bool, ScriptError> {
        let mut width = 0;
        while let Some(c) = self.peek() {
            match c {
                ' ' => width += 1,
                '\t' => width = (width / TAB_WIDTH + 1) * TAB_WIDTH,
                '\x0c' | '\r' => {}
                _ => break,
            }
            self.pos += 1;
        }

        match self.peek() {
            None => {
                self.at_line_start = false;
                return Ok(true);
            }
            Some('\n') => {
                self.pos += 1;
                self.line += 1;
                return Ok(false);
            }
            Some('#') => {
                self.skip_comment();
                return Ok(false);
            }
            Some(_) => {}
        }

        self.at_line_start = false;
        let current = self.indents.last().copied().unwrap_or(0);
        if width > current {
            self.indents.push(width);
            let line = self.line;
            self.push(Tok::Indent, line);
        } else if width < current {
            while self.indents.last().is_some_and(|&w| w > width) {
                self.indents.pop();
                let line = self.line;
                self.push(Tok::Dedent, line);
            }
            if self.indents.last().copied() != Some(width) {
                return Err(ScriptError::indentation(
                    "unindent does not match any outer indentation level",
                    self.line,
                ));
            }
        }
        Ok(true)
    }

    fn skip_comment(&mut self) {
        while self.peek().is_some_and(|c| c != '\n') {
            self.pos += 1;
        }
    }

    fn word(&mut self) -> Result<(), ScriptError> {
        let line = self.line;
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || c == '_')
        {
            self.pos += 1;
        }
        let word: String = self.chars[start..self.pos].iter().collect();

        if matches!(self.peek(), Some('"' | '\'')) {
            let lower = word.to_ascii_lowercase();
            match lower.as_str() {
                "f" => {
                    let text = self.string(false)?;
                    self.push(Tok::FStr(text), line);
                    return Ok(());
                }
                "r" => {
                    let text = self.string(true)?;
                    self.push(Tok::Str(text), line);
                    return Ok(());
                }
                "rf" | "fr" => {
                    let text = self.string(true)?;
                    self.push(Tok::FStr(text), line);
                    return Ok(());
                }
                _ => {}
            }
        }

        self.push(Tok::Name(word), line);
        Ok(())
    }

    fn number(&mut self) -> Result<(), ScriptError> {
        let line = self.line;
        let mut text = String::new();
        let mut is_float = false;

        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                text.push(c);
            } else if c == '_' {
                // digit separator
            } else if c == '.' && !is_float && self.peek_at(1).is_none_or(|d| d != '.') {
                is_float = true;
                text.push(c);
            } else if c == 'e' || c == 'E' {
                let sign = self.peek_at(1);
                let has_digits = match sign {
                    Some('+' | '-') => self.peek_at(2).is_some_and(|d| d.is_ascii_digit()),
                    Some(d) => d.is_ascii_digit(),
                    None => false,
                };
                if !has_digits {
                    break;
                }
                is_float = true;
                text.push('e');
                self.pos += 1;
                if let Some(s @ ('+' | '-')) = self.peek() {
                    text.push(s);
                    self.pos += 1;
                }
                continue;
            } else {
                break;
            }
            self.pos += 1;
        }

        if self
            .peek()
            .is_some_and(|c| c.is_alphabetic() || c == '_')
        {
            return Err(ScriptError::syntax("invalid decimal literal", line));
        }

        let tok = if is_float {
            text.parse::<f64>()
                .map(Tok::Float)
                .map_err(|_| ScriptError::syntax("invalid float literal", line))?
        } else {
            text.parse::<i64>()
                .map(Tok::Int)
                .map_err(|_| ScriptError::syntax("integer literal too large", line))?
        };
        self.push(tok, line);
        Ok(())
    }

    fn string(&mut self, raw: bool) -> Result<String, ScriptError> {
        let line = self.line;
        let Some(quote) = self.peek() else {
            return Err(ScriptError::syntax("unexpected end of input", line));
        };
        let triple = self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote);
        self.pos += if triple { 3 } else { 1 };

        let mut out = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(ScriptError::syntax("unterminated string literal", line));
            };
            if c == quote {
                if !triple {
                    self.pos += 1;
                    return Ok(out);
                }
                if self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote) {
                    self.pos += 3;
                    return Ok(out);
                }
            }
            if c == '\n' {
                if !triple {
                    return Err(ScriptError::syntax("unterminated string literal", line));
                }
                self.line += 1;
            }
            if c == '\\' && !raw {
                let Some(next) = self.peek_at(1) else {
                    return Err(ScriptError::syntax("unterminated string literal", line));
                };
                self.pos += 2;
                match next {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    '0' => out.push('\0'),
                    '\\' => out.push('\\'),
                    '\'' => out.push('\''),
                    '"' => out.push('"'),
                    '\n' => self.line += 1,
                    other => {
                        out.push('\\');
                        out.push(other);
                    }
                }
                continue;
            }
            out.push(c);
            self.pos += 1;
        }
    }

    fn operator(&mut self) -> Result<(), ScriptError> {
        let line = self.line;
        for op in OPERATORS {
            let len = op.chars().count();
            let matches = op
                .chars()
                .enumerate()
                .all(|(i, ch)| self.peek_at(i) == Some(ch));
            if matches {
                self.pos += len;
                match *op {
                    "(" | "[" | "{" => self.depth += 1,
                    ")" | "]" | "}" => self.depth = self.depth.saturating_sub(1),
                    _ => {}
                }
                self.push(Tok::Op(op), line);
                return Ok(());
            }
        }
        let c = self.peek().unwrap_or(' ');
        Err(ScriptError::syntax(format!("invalid character '{c}'"), line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Tok> {
        tokenize(src).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn test_simple_assignment() {
        assert_eq!(
            kinds("x = 1"),
            vec![
                Tok::Name("x".into()),
                Tok::Op("="),
                Tok::Int(1),
                Tok::Newline,
                Tok::Eof
            ]
        );
    }

    #[test]
    fn test_indent_and_dedent() {
        let toks = kinds("if x:\n    y = 2\nz = 3\n");
        assert!(toks.contains(&Tok::Indent));
        assert!(toks.contains(&Tok::Dedent));
        let dedent = toks.iter().position(|t| *t == Tok::Dedent).unwrap();
        assert_eq!(toks[dedent + 1], Tok::Name("z".into()));
    }

    #[test]
    fn test_blank_lines_and_comments_are_skipped() {
        let toks = kinds("\n# header\n\nx = 1  # trailing\n\n");
        assert_eq!(toks.iter().filter(|t| **t == Tok::Newline).count(), 1);
    }

    #[test]
    fn test_newlines_inside_brackets_are_ignored() {
        let toks = kinds("f(1,\n  2)\n");
        assert_eq!(toks.iter().filter(|t| **t == Tok::Newline).count(), 1);
        assert!(!toks.contains(&Tok::Indent));
    }

    #[test]
    fn test_strings_and_escapes() {
        assert_eq!(kinds(r#"'a\nb'"#)[0], Tok::Str("a\nb".into()));
        assert_eq!(kinds(r#"r'a\nb'"#)[0], Tok::Str("a\\nb".into()));
        assert_eq!(kinds("f\"x={x}\"")[0], Tok::FStr("x={x}".into()));
        assert_eq!(kinds("\"\"\"a\nb\"\"\"")[0], Tok::Str("a\nb".into()));
    }

    #[test]
    fn test_numbers() {
        assert_eq!(kinds("1_000")[0], Tok::Int(1000));
        assert_eq!(kinds("2.5")[0], Tok::Float(2.5));
        assert_eq!(kinds("1e3")[0], Tok::Float(1000.0));
        assert_eq!(kinds(".5")[0], Tok::Float(0.5));
    }

    #[test]
    fn test_longest_operator_wins() {
        assert_eq!(kinds("a **= 2")[1], Tok::Op("**="));
        assert_eq!(kinds("a // b")[1], Tok::Op("//"));
    }

    #[test]
    fn test_bad_dedent_is_indentation_error() {
        let err = tokenize("if x:\n    a = 1\n  b = 2\n").unwrap_err();
        assert_eq!(err.kind, "IndentationError");
    }

    #[test]
    fn test_unterminated_string() {
        let err = tokenize("x = 'abc\n").unwrap_err();
        assert_eq!(err.kind, "SyntaxError");
        assert!(err.message.contains("line 1"));
    }
}
