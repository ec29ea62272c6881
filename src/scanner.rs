use std::iter::Peekable;
use std::str::Chars;

use crate::error::{SyntaxErrorKind, SyntaxFault};

#[derive(Clone)]
struct LocationTracking<I> {
    iter: I,
    line: u32,
}

impl<I> Iterator for LocationTracking<I>
where
    I: Iterator<Item = char>,
{
    type Item = (u32, <I as Iterator>::Item);

    #[inline]
    fn next(&mut self) -> Option<(u32, <I as Iterator>::Item)> {
        self.iter.next().map(|a| {
            let nl = a == '\n';
            let ret = (self.line, a);
            // Possible undefined overflow.
            if nl {
                self.line += 1;
            }
            ret
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind {
    Ident,
    Number,
    /// String or character literal, quotes included
    Literal,
    Punct,
    /// Horizontal whitespace; never contains a newline
    Whitespace,
    Newline,
    /// Line or block comment, delimiters included
    Comment,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,

    /// Line on which the token starts
    pub line: u32,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, line: u32) -> Self {
        Token {
            kind,
            text: text.into(),
            line,
        }
    }

    /// Whitespace and comments, which separate tokens but carry no meaning
    pub fn is_trivia(&self) -> bool {
        matches!(self.kind, TokenKind::Whitespace | TokenKind::Comment)
    }

    pub fn is_punct(&self, punct: &str) -> bool {
        self.kind == TokenKind::Punct && self.text == punct
    }

    pub fn is_ident(&self, ident: &str) -> bool {
        self.kind == TokenKind::Ident && self.text == ident
    }
}

/// Index of the first non-trivia token at or after `from`
pub fn skip_trivia(tokens: &[Token], mut from: usize) -> usize {
    while tokens.get(from).map_or(false, Token::is_trivia) {
        from += 1;
    }
    from
}

/// One logical line: tokens up to and including the terminating newline.
/// Block comments may carry embedded newlines, so a logical line can span
/// several physical ones.
#[derive(Debug)]
pub struct Line {
    pub tokens: Vec<Token>,
    pub line: u32,
}

/// A line starting with `#`, split into the directive name and its operands
pub struct Directive<'a> {
    /// `None` for the null directive (a lone `#`)
    pub name: Option<&'a Token>,
    pub rest: &'a [Token],
    pub line: u32,
}

impl Line {
    pub fn directive(&self) -> Option<Directive<'_>> {
        let hash = skip_trivia(&self.tokens, 0);
        if !self.tokens.get(hash)?.is_punct("#") {
            return None;
        }

        let end = match self.tokens.last() {
            Some(last) if last.kind == TokenKind::Newline => self.tokens.len() - 1,
            _ => self.tokens.len(),
        };

        let name_idx = skip_trivia(&self.tokens[..end], hash + 1);
        let name = self.tokens[..end].get(name_idx);
        let rest = if name.is_some() {
            &self.tokens[name_idx + 1..end]
        } else {
            &self.tokens[end..end]
        };

        Some(Directive {
            name,
            rest,
            line: self.line,
        })
    }
}

const TWO_CHAR_PUNCTS: &[&str] = &["##", "&&", "||", "==", "!=", "<=", ">=", "<<", ">>", "->"];

// Inspired by JayKickliter/monkey
pub struct Scanner<'a> {
    input_iter: Peekable<LocationTracking<Chars<'a>>>,
}

impl<'a> Scanner<'a> {
    pub fn new(input: &'a str) -> Scanner<'a> {
        Scanner {
            input_iter: LocationTracking {
                iter: input.chars(),
                line: 1,
            }
            .peekable(),
        }
    }

    /// Backslash-newline pairs join physical lines; drop them before anything looks at the input.
    fn skip_line_splices(&mut self) {
        while let Some(&(_, '\\')) = self.input_iter.peek() {
            let mut peek_next = self.input_iter.clone();
            let _ = peek_next.next();

            match peek_next.next() {
                Some((_, '\n')) => {}
                Some((_, '\r')) if matches!(peek_next.peek(), Some(&(_, '\n'))) => {
                    let _ = peek_next.next();
                }
                _ => break,
            }

            self.input_iter = peek_next;
        }
    }

    fn read_char(&mut self) -> Option<(u32, char)> {
        self.skip_line_splices();
        self.input_iter.next()
    }

    fn peek_char(&mut self) -> Option<char> {
        self.skip_line_splices();
        self.input_iter.peek().map(|&(_, c)| c)
    }

    fn peek_second_char(&mut self) -> Option<char> {
        self.skip_line_splices();
        let mut next_peek = Scanner {
            input_iter: self.input_iter.clone(),
        };
        let _ = next_peek.input_iter.next();
        next_peek.peek_char()
    }

    fn read_while(&mut self, text: &mut String, pred: impl Fn(char) -> bool) {
        while let Some(c) = self.peek_char() {
            if !pred(c) {
                break;
            }
            text.push(c);
            let _ = self.read_char();
        }
    }

    fn read_block_comment(&mut self, line: u32) -> Result<String, SyntaxFault> {
        let mut s = String::from("/*");

        while let Some((_, c)) = self.read_char() {
            s.push(c);
            if c == '*' && self.peek_char() == Some('/') {
                let _ = self.read_char();
                s.push('/');
                return Ok(s);
            }
        }

        Err(SyntaxFault::new(SyntaxErrorKind::UnterminatedComment, line))
    }

    fn read_literal(&mut self, delim: char) -> String {
        let mut s = String::new();
        s.push(delim);

        while let Some(c) = self.peek_char() {
            if c == '\n' {
                // Unterminated; leave the newline to end the line.
                break;
            }

            let _ = self.read_char();
            s.push(c);

            if c == '\\' {
                if let Some(escaped) = self.peek_char() {
                    if escaped != '\n' {
                        let _ = self.read_char();
                        s.push(escaped);
                    }
                }
            } else if c == delim {
                break;
            }
        }

        s
    }

    fn read_number(&mut self, first: char) -> String {
        let mut s = String::new();
        s.push(first);

        while let Some(c) = self.peek_char() {
            let exponent_sign = (c == '+' || c == '-')
                && matches!(s.chars().last(), Some('e' | 'E' | 'p' | 'P'))
                && !s.starts_with("0x")
                && !s.starts_with("0X");

            if c.is_alphanumeric() || c == '_' || c == '.' || exponent_sign {
                s.push(c);
                let _ = self.read_char();
            } else {
                break;
            }
        }

        s
    }

    fn read_punct(&mut self, first: char) -> String {
        let mut s = String::new();
        s.push(first);

        if first == '.' && self.peek_char() == Some('.') && self.peek_second_char() == Some('.') {
            let _ = self.read_char();
            let _ = self.read_char();
            s.push_str("..");
            return s;
        }

        if let Some(next) = self.peek_char() {
            s.push(next);
            if TWO_CHAR_PUNCTS.contains(&s.as_str()) {
                let _ = self.read_char();
            } else {
                s.pop();
            }
        }

        s
    }

    pub fn next_token(&mut self) -> Result<Option<Token>, SyntaxFault> {
        let (line, c) = match self.read_char() {
            Some(c) => c,
            None => return Ok(None),
        };

        let token = match c {
            '\n' => Token::new(TokenKind::Newline, "\n", line),
            '/' if self.peek_char() == Some('/') => {
                let mut s = String::from("/");
                self.read_while(&mut s, |c| c != '\n');
                Token::new(TokenKind::Comment, s, line)
            }
            '/' if self.peek_char() == Some('*') => {
                let _ = self.read_char();
                Token::new(TokenKind::Comment, self.read_block_comment(line)?, line)
            }
            '"' | '\'' => Token::new(TokenKind::Literal, self.read_literal(c), line),
            c if c.is_whitespace() => {
                let mut s = String::new();
                s.push(c);
                self.read_while(&mut s, |c| c != '\n' && c.is_whitespace());
                Token::new(TokenKind::Whitespace, s, line)
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut s = String::new();
                s.push(c);
                self.read_while(&mut s, |c| c.is_alphanumeric() || c == '_');
                Token::new(TokenKind::Ident, s, line)
            }
            c if c.is_ascii_digit() => Token::new(TokenKind::Number, self.read_number(c), line),
            '.' if self.peek_char().map_or(false, |c| c.is_ascii_digit()) => {
                Token::new(TokenKind::Number, self.read_number(c), line)
            }
            _ => Token::new(TokenKind::Punct, self.read_punct(c), line),
        };

        Ok(Some(token))
    }

    pub fn next_line(&mut self) -> Result<Option<Line>, SyntaxFault> {
        let mut tokens = Vec::new();

        while let Some(token) = self.next_token()? {
            let end_of_line = token.kind == TokenKind::Newline;
            tokens.push(token);
            if end_of_line {
                break;
            }
        }

        Ok(tokens.first().map(|first| first.line).map(|line| Line { tokens, line }))
    }
}
