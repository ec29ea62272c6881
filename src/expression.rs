//! Integer evaluation of `#if` / `#elif` conditions.
//!
//! Operands arrive already macro-expanded, with `defined` resolved to `0`/`1`.
//! Identifiers that survive expansion evaluate to `0`, as in C.

use crate::error::{SyntaxErrorKind, SyntaxFault};
use crate::scanner::{Token, TokenKind};

pub fn evaluate(tokens: &[Token], line: u32) -> Result<i64, SyntaxFault> {
    let tokens: Vec<&Token> = tokens
        .iter()
        .filter(|t| !t.is_trivia() && t.kind != TokenKind::Newline)
        .collect();

    if tokens.is_empty() {
        return Err(SyntaxFault::new(SyntaxErrorKind::InvalidExpression, line));
    }

    let mut parser = Parser {
        tokens,
        pos: 0,
        line,
        evaluating: true,
    };
    let value = parser.conditional()?;

    if parser.pos != parser.tokens.len() {
        return Err(parser.fault(SyntaxErrorKind::UnexpectedToken));
    }

    Ok(value)
}

fn binary_precedence(op: &str) -> Option<u8> {
    Some(match op {
        "||" => 1,
        "&&" => 2,
        "|" => 3,
        "^" => 4,
        "&" => 5,
        "==" | "!=" => 6,
        "<" | ">" | "<=" | ">=" => 7,
        "<<" | ">>" => 8,
        "+" | "-" => 9,
        "*" | "/" | "%" => 10,
        _ => return None,
    })
}

struct Parser<'t> {
    tokens: Vec<&'t Token>,
    pos: usize,
    line: u32,

    /// Cleared while parsing an operand that short-circuiting discards, so its
    /// arithmetic errors are not raised
    evaluating: bool,
}

impl<'t> Parser<'t> {
    fn fault(&self, kind: SyntaxErrorKind) -> SyntaxFault {
        SyntaxFault::new(kind, self.line)
    }

    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos).copied()
    }

    fn eat_punct(&mut self, punct: &str) -> bool {
        if self.peek().map_or(false, |t| t.is_punct(punct)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, punct: &str) -> Result<(), SyntaxFault> {
        if self.eat_punct(punct) {
            Ok(())
        } else {
            Err(self.fault(SyntaxErrorKind::InvalidExpression))
        }
    }

    fn conditional(&mut self) -> Result<i64, SyntaxFault> {
        let condition = self.binary(1)?;
        if !self.eat_punct("?") {
            return Ok(condition);
        }

        let if_true = self.unevaluated_unless(condition != 0, Self::conditional)?;
        self.expect_punct(":")?;
        let if_false = self.unevaluated_unless(condition == 0, Self::conditional)?;

        Ok(if condition != 0 { if_true } else { if_false })
    }

    /// Parse with `parse`, suppressing evaluation errors unless `live`.
    fn unevaluated_unless(
        &mut self,
        live: bool,
        parse: impl FnOnce(&mut Self) -> Result<i64, SyntaxFault>,
    ) -> Result<i64, SyntaxFault> {
        let outer = self.evaluating;
        self.evaluating = outer && live;
        let value = parse(self);
        self.evaluating = outer;
        value
    }

    fn binary(&mut self, min_precedence: u8) -> Result<i64, SyntaxFault> {
        let mut lhs = self.unary()?;

        while let Some(op) = self.peek().filter(|t| t.kind == TokenKind::Punct) {
            let precedence = match binary_precedence(&op.text) {
                Some(p) if p >= min_precedence => p,
                _ => break,
            };
            self.pos += 1;

            let live = match op.text.as_str() {
                "&&" => lhs != 0,
                "||" => lhs == 0,
                _ => true,
            };
            let rhs = self.unevaluated_unless(live, |p| p.binary(precedence + 1))?;
            lhs = self.apply(&op.text, lhs, rhs)?;
        }

        Ok(lhs)
    }

    fn apply(&self, op: &str, lhs: i64, rhs: i64) -> Result<i64, SyntaxFault> {
        Ok(match op {
            "||" => ((lhs != 0) || (rhs != 0)) as i64,
            "&&" => ((lhs != 0) && (rhs != 0)) as i64,
            "|" => lhs | rhs,
            "^" => lhs ^ rhs,
            "&" => lhs & rhs,
            "==" => (lhs == rhs) as i64,
            "!=" => (lhs != rhs) as i64,
            "<" => (lhs < rhs) as i64,
            ">" => (lhs > rhs) as i64,
            "<=" => (lhs <= rhs) as i64,
            ">=" => (lhs >= rhs) as i64,
            "<<" => lhs.wrapping_shl(rhs as u32),
            ">>" => lhs.wrapping_shr(rhs as u32),
            "+" => lhs.wrapping_add(rhs),
            "-" => lhs.wrapping_sub(rhs),
            "*" => lhs.wrapping_mul(rhs),
            "/" | "%" if rhs == 0 && !self.evaluating => 0,
            "/" | "%" if rhs == 0 => return Err(self.fault(SyntaxErrorKind::DivisionByZero)),
            "/" => lhs.wrapping_div(rhs),
            "%" => lhs.wrapping_rem(rhs),
            _ => return Err(self.fault(SyntaxErrorKind::InvalidExpression)),
        })
    }

    fn unary(&mut self) -> Result<i64, SyntaxFault> {
        if self.eat_punct("!") {
            Ok((self.unary()? == 0) as i64)
        } else if self.eat_punct("~") {
            Ok(!self.unary()?)
        } else if self.eat_punct("-") {
            Ok(self.unary()?.wrapping_neg())
        } else if self.eat_punct("+") {
            self.unary()
        } else {
            self.primary()
        }
    }

    fn primary(&mut self) -> Result<i64, SyntaxFault> {
        let token = self
            .peek()
            .ok_or_else(|| self.fault(SyntaxErrorKind::InvalidExpression))?;
        self.pos += 1;

        match token.kind {
            TokenKind::Number => {
                parse_integer(&token.text).ok_or_else(|| self.fault(SyntaxErrorKind::InvalidExpression))
            }
            TokenKind::Literal if token.text.starts_with('\'') => parse_char(&token.text)
                .ok_or_else(|| self.fault(SyntaxErrorKind::InvalidExpression)),
            TokenKind::Ident => Ok((token.text == "true") as i64),
            TokenKind::Punct if token.text == "(" => {
                let value = self.conditional()?;
                self.expect_punct(")")?;
                Ok(value)
            }
            _ => Err(self.fault(SyntaxErrorKind::InvalidExpression)),
        }
    }
}

fn parse_integer(text: &str) -> Option<i64> {
    let digits = text.trim_end_matches(|c| matches!(c, 'u' | 'U' | 'l' | 'L'));

    let (digits, radix) = if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        (hex, 16)
    } else if digits.len() > 1 && digits.starts_with('0') {
        (&digits[1..], 8)
    } else {
        (digits, 10)
    };

    u64::from_str_radix(digits, radix).ok().map(|v| v as i64)
}

fn parse_char(text: &str) -> Option<i64> {
    let inner = text.strip_prefix('\'')?.strip_suffix('\'')?;
    let mut chars = inner.chars();

    let value = match chars.next()? {
        '\\' => match chars.next()? {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            '0' => '\0',
            c => c,
        },
        c => c,
    };

    if chars.next().is_some() {
        return None;
    }

    Some(value as i64)
}
