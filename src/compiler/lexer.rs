//! Stream-of-chars → token stream (spec §4.4).
//!
//! Grounded on the teacher crate's `compiler::parser::lua_tokenize`
//! structure (a `Reader` cursor plus a `lex()` dispatch on the current
//! char), simplified to the one-token lookahead spec.md actually needs
//! instead of producing a whole pre-tokenized `Vec`.

use crate::compiler::error::CompileError;
use crate::compiler::reader::{drain, Reader};
use crate::compiler::token::Token;
use crate::gc::ObjectStore;

pub struct Lexer {
    source: Vec<char>,
    pos: usize,
    line: u32,
    pub source_name: String,
    buf: String,
}

impl Lexer {
    pub fn new(reader: &mut dyn Reader, source_name: &str) -> Self {
        let text = drain(reader);
        Self {
            source: text.chars().collect(),
            pos: 0,
            line: 1,
            source_name: source_name.to_string(),
            buf: String::new(),
        }
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    fn peek(&self) -> char {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> char {
        self.source.get(self.pos + offset).copied().unwrap_or('\0')
    }

    fn at_eof(&self) -> bool {
        self.pos >= self.source.len()
    }

    fn bump(&mut self) -> char {
        let c = self.peek();
        self.pos += 1;
        c
    }

    fn err(&self, what: impl Into<String>, lexeme: &str) -> CompileError {
        CompileError::new(self.source_name.clone(), self.line, what.into(), lexeme.to_string())
    }

    /// Produce the next token, interning identifiers/string contents as it
    /// goes (spec §4.4: "Identifiers and string contents are interned
    /// before being returned in tokens").
    pub fn next_token(&mut self, store: &mut ObjectStore) -> Result<(Token, u32), CompileError> {
        self.buf.clear();
        loop {
            if self.at_eof() {
                return Ok((Token::Eof, self.line));
            }
            let c = self.peek();
            match c {
                '\n' | '\r' => {
                    self.skip_newline();
                    continue;
                }
                ' ' | '\t' | '\x0b' | '\x0c' => {
                    self.bump();
                    continue;
                }
                '-' if self.peek_at(1) == '-' => {
                    self.bump();
                    self.bump();
                    self.skip_comment()?;
                    continue;
                }
                _ => break,
            }
        }

        let line = self.line;
        let c = self.peek();

        if c.is_ascii_digit() || (c == '.' && self.peek_at(1).is_ascii_digit()) {
            return Ok((self.lex_number()?, line));
        }
        if c.is_alphabetic() || c == '_' {
            return Ok((self.lex_name(store), line));
        }
        if c == '"' || c == '\'' {
            return Ok((self.lex_short_string(store)?, line));
        }

        self.bump();
        let tok = match c {
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '%' => Token::Percent,
            '^' => Token::Caret,
            '#' => Token::Hash,
            '(' => Token::LParen,
            ')' => Token::RParen,
            '{' => Token::LBrace,
            '}' => Token::RBrace,
            ']' => Token::RBracket,
            ';' => Token::Semi,
            ',' => Token::Comma,
            ':' => Token::Colon,
            '=' => {
                if self.peek() == '=' {
                    self.bump();
                    Token::Eq
                } else {
                    Token::Assign
                }
            }
            '~' => {
                if self.peek() == '=' {
                    self.bump();
                    Token::Ne
                } else {
                    return Err(self.err("unexpected symbol", "~"));
                }
            }
            '<' => {
                if self.peek() == '=' {
                    self.bump();
                    Token::Le
                } else {
                    Token::Lt
                }
            }
            '>' => {
                if self.peek() == '=' {
                    self.bump();
                    Token::Ge
                } else {
                    Token::Gt
                }
            }
            '.' => {
                if self.peek() == '.' {
                    self.bump();
                    if self.peek() == '.' {
                        self.bump();
                        Token::Ellipsis
                    } else {
                        Token::Concat
                    }
                } else {
                    Token::Dot
                }
            }
            '[' => {
                if self.peek() == '[' || self.peek() == '=' {
                    if let Some(level) = self.try_long_bracket_open() {
                        return Ok((self.lex_long_string(store, level)?, line));
                    }
                }
                Token::LBracket
            }
            other => return Err(self.err("unexpected symbol", &other.to_string())),
        };
        Ok((tok, line))
    }

    fn skip_newline(&mut self) {
        let c = self.bump();
        let other = if c == '\n' { '\r' } else { '\n' };
        if self.peek() == other {
            self.bump();
        }
        self.line += 1;
    }

    fn skip_comment(&mut self) -> Result<(), CompileError> {
        if self.peek() == '[' {
            let save = self.pos;
            self.bump();
            if let Some(level) = self.try_long_bracket_open() {
                self.lex_long_string_raw(level)?;
                return Ok(());
            }
            self.pos = save;
        }
        while !self.at_eof() && self.peek() != '\n' && self.peek() != '\r' {
            self.bump();
        }
        Ok(())
    }

    /// At a `[`, check for `[=*[` and consume it if present, returning the
    /// `=` level. Leaves position unchanged (caller already consumed `[`)
    /// if it's not actually a long-bracket opener.
    fn try_long_bracket_open(&mut self) -> Option<usize> {
        let save = self.pos;
        let mut level = 0;
        while self.peek() == '=' {
            self.bump();
            level += 1;
        }
        if self.peek() == '[' {
            self.bump();
            Some(level)
        } else {
            self.pos = save;
            None
        }
    }

    fn lex_long_string_raw(&mut self, level: usize) -> Result<String, CompileError> {
        // Lua skips one leading newline immediately inside a long bracket.
        if self.peek() == '\n' || self.peek() == '\r' {
            self.skip_newline();
        }
        let mut out = String::new();
        loop {
            if self.at_eof() {
                return Err(self.err("unfinished long string/comment", "<eof>"));
            }
            if self.peek() == ']' {
                let save = self.pos;
                self.bump();
                let mut close_level = 0;
                while self.peek() == '=' {
                    self.bump();
                    close_level += 1;
                }
                if close_level == level && self.peek() == ']' {
                    self.bump();
                    return Ok(out);
                }
                self.pos = save;
                out.push(self.bump());
                continue;
            }
            if self.peek() == '\n' || self.peek() == '\r' {
                self.skip_newline();
                out.push('\n');
                continue;
            }
            out.push(self.bump());
        }
    }

    fn lex_long_string(&mut self, store: &mut ObjectStore, level: usize) -> Result<Token, CompileError> {
        let s = self.lex_long_string_raw(level)?;
        Ok(Token::Str(store.intern(&s)))
    }

    fn lex_name(&mut self, store: &mut ObjectStore) -> Token {
        let start = self.pos;
        while self.peek().is_alphanumeric() || self.peek() == '_' {
            self.bump();
        }
        let word: String = self.source[start..self.pos].iter().collect();
        if let Some(kw) = Token::keyword_from_str(&word) {
            return kw;
        }
        Token::Name(store.intern(&word))
    }

    fn lex_short_string(&mut self, store: &mut ObjectStore) -> Result<Token, CompileError> {
        let quote = self.bump();
        let mut out = String::new();
        loop {
            if self.at_eof() {
                return Err(self.err("unfinished string", &out));
            }
            let c = self.peek();
            if c == quote {
                self.bump();
                break;
            }
            if c == '\n' || c == '\r' {
                return Err(self.err("unfinished string", &out));
            }
            if c == '\\' {
                self.bump();
                let esc = self.bump();
                match esc {
                    '0' => out.push('\0'),
                    'a' => out.push('\u{7}'),
                    'b' => out.push('\u{8}'),
                    'f' => out.push('\u{c}'),
                    'n' => out.push('\n'),
                    'r' => out.push('\r'),
                    't' => out.push('\t'),
                    'v' => out.push('\u{b}'),
                    '"' => out.push('"'),
                    '\'' => out.push('\''),
                    '\\' => out.push('\\'),
                    '\n' | '\r' => {
                        self.line += 1;
                        out.push('\n');
                    }
                    d if d.is_ascii_digit() => {
                        let mut val = d.to_digit(10).unwrap();
                        for _ in 0..2 {
                            if self.peek().is_ascii_digit() {
                                val = val * 10 + self.bump().to_digit(10).unwrap();
                            } else {
                                break;
                            }
                        }
                        out.push(val as u8 as char);
                    }
                    other => {
                        return Err(self.err("invalid escape sequence", &format!("\\{other}")));
                    }
                }
                continue;
            }
            out.push(self.bump());
        }
        Ok(Token::Str(store.intern(&out)))
    }

    fn lex_number(&mut self) -> Result<Token, CompileError> {
        let start = self.pos;
        if self.peek() == '0' && (self.peek_at(1) == 'x' || self.peek_at(1) == 'X') {
            self.bump();
            self.bump();
            while self.peek().is_ascii_hexdigit() {
                self.bump();
            }
            let text: String = self.source[start + 2..self.pos].iter().collect();
            let value = i64::from_str_radix(&text, 16)
                .map_err(|_| self.err("malformed number", &text))? as f64;
            return Ok(Token::Number(value));
        }

        while self.peek().is_ascii_digit() {
            self.bump();
        }
        if self.peek() == '.' {
            self.bump();
            while self.peek().is_ascii_digit() {
                self.bump();
            }
        }
        if self.peek() == 'e' || self.peek() == 'E' {
            self.bump();
            if self.peek() == '+' || self.peek() == '-' {
                self.bump();
            }
            while self.peek().is_ascii_digit() {
                self.bump();
            }
        }
        let text: String = self.source[start..self.pos].iter().collect();
        text.parse::<f64>()
            .map(Token::Number)
            .map_err(|_| self.err("malformed number", &text))
    }
}
