//! Macro table and expansion: object-like and function-like macros, `#` stringizing,
//! `##` pasting and variadic arguments.

use std::collections::HashMap;

use crate::error::{SyntaxErrorKind, SyntaxFault};
use crate::scanner::{skip_trivia, Token, TokenKind};

const VA_ARGS: &str = "__VA_ARGS__";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MacroDef {
    /// `None` for object-like macros
    pub params: Option<Vec<String>>,
    pub variadic: bool,
    pub body: Vec<Token>,
}

impl MacroDef {
    fn param_index(&self, token: &Token) -> Option<usize> {
        if token.kind != TokenKind::Ident {
            return None;
        }

        let params = self.params.as_ref()?;
        params
            .iter()
            .position(|p| *p == token.text)
            .or_else(|| (self.variadic && token.text == VA_ARGS).then(|| params.len()))
    }
}

/// Parse the operands of a `#define` directive into a macro name and definition.
pub fn parse_define(rest: &[Token], line: u32) -> Result<(String, MacroDef), SyntaxFault> {
    let invalid = || SyntaxFault::new(SyntaxErrorKind::InvalidMacroDefinition, line);

    let mut i = skip_trivia(rest, 0);
    let name = match rest.get(i) {
        Some(t) if t.kind == TokenKind::Ident => t.text.clone(),
        _ => return Err(invalid()),
    };
    i += 1;

    let mut params = None;
    let mut variadic = false;

    // Function-like only when the paren directly follows the name.
    if rest.get(i).map_or(false, |t| t.is_punct("(")) {
        let mut list: Vec<String> = Vec::new();
        i = skip_trivia(rest, i + 1);

        if rest.get(i).map_or(false, |t| t.is_punct(")")) {
            i += 1;
        } else {
            loop {
                i = skip_trivia(rest, i);
                match rest.get(i) {
                    Some(t) if t.kind == TokenKind::Ident && !list.contains(&t.text) => {
                        list.push(t.text.clone())
                    }
                    Some(t) if t.is_punct("...") => variadic = true,
                    _ => return Err(invalid()),
                }

                i = skip_trivia(rest, i + 1);
                match rest.get(i) {
                    Some(t) if t.is_punct(",") && !variadic => i += 1,
                    Some(t) if t.is_punct(")") => {
                        i += 1;
                        break;
                    }
                    _ => return Err(invalid()),
                }
            }
        }

        params = Some(list);
    }

    let mut body: Vec<Token> = rest[i..]
        .iter()
        .map(|t| match t.kind {
            TokenKind::Comment => Token::new(TokenKind::Whitespace, " ", t.line),
            _ => t.clone(),
        })
        .collect();

    while body.first().map_or(false, Token::is_trivia) {
        body.remove(0);
    }
    while body.last().map_or(false, Token::is_trivia) {
        body.pop();
    }

    if body.first().map_or(false, |t| t.is_punct("##"))
        || body.last().map_or(false, |t| t.is_punct("##"))
    {
        return Err(invalid());
    }

    let def = MacroDef {
        params,
        variadic,
        body,
    };

    if def.params.is_some() {
        for (idx, token) in def.body.iter().enumerate() {
            if token.is_punct("#") {
                let operand = def.body.get(skip_trivia(&def.body, idx + 1));
                if operand.and_then(|t| def.param_index(t)).is_none() {
                    return Err(SyntaxFault::new(
                        SyntaxErrorKind::IncorrectStringifyOperatorUsage,
                        line,
                    ));
                }
            }
        }
    }

    Ok((name, def))
}

#[derive(Clone, Debug, Default)]
pub struct MacroTable {
    macros: HashMap<String, MacroDef>,
}

impl MacroTable {
    pub fn define(&mut self, name: String, def: MacroDef) {
        self.macros.insert(name, def);
    }

    pub fn undefine(&mut self, name: &str) -> bool {
        self.macros.remove(name).is_some()
    }

    pub fn is_defined(&self, name: &str) -> bool {
        name == "__LINE__" || name == "__FILE__" || self.macros.contains_key(name)
    }

    /// Fully macro-expand `tokens`. `file` is what `__FILE__` expands to.
    pub fn expand(&self, tokens: &[Token], file: &str) -> Result<Vec<Token>, SyntaxFault> {
        let mut active = Vec::new();
        self.expand_with(tokens, file, &mut active)
    }

    fn expand_with(
        &self,
        tokens: &[Token],
        file: &str,
        active: &mut Vec<String>,
    ) -> Result<Vec<Token>, SyntaxFault> {
        let mut out = Vec::with_capacity(tokens.len());
        let mut i = 0;

        while i < tokens.len() {
            let token = &tokens[i];
            i += 1;

            if token.kind != TokenKind::Ident || active.contains(&token.text) {
                out.push(token.clone());
                continue;
            }

            match token.text.as_str() {
                "__LINE__" => {
                    out.push(Token::new(TokenKind::Number, token.line.to_string(), token.line));
                    continue;
                }
                "__FILE__" => {
                    out.push(Token::new(TokenKind::Literal, quote(file), token.line));
                    continue;
                }
                _ => {}
            }

            let def = match self.macros.get(&token.text) {
                Some(def) => def,
                None => {
                    out.push(token.clone());
                    continue;
                }
            };

            let replacement = match &def.params {
                None => paste(&relocate(&def.body, token.line)),
                Some(params) => {
                    let mut open = i;
                    while tokens
                        .get(open)
                        .map_or(false, |t| t.is_trivia() || t.kind == TokenKind::Newline)
                    {
                        open += 1;
                    }

                    if !tokens.get(open).map_or(false, |t| t.is_punct("(")) {
                        // A function-like macro name without arguments is left alone.
                        out.push(token.clone());
                        continue;
                    }

                    let (args, close) = collect_args(tokens, open + 1, token.line)?;
                    i = close + 1;
                    self.substitute(def, params.len(), args, token.line, file, active)?
                }
            };

            active.push(token.text.clone());
            let expanded = self.expand_with(&replacement, file, active);
            active.pop();
            out.extend(expanded?);
        }

        Ok(out)
    }

    fn substitute(
        &self,
        def: &MacroDef,
        param_count: usize,
        mut args: Vec<Vec<Token>>,
        line: u32,
        file: &str,
        active: &mut Vec<String>,
    ) -> Result<Vec<Token>, SyntaxFault> {
        let arity = || SyntaxFault::new(SyntaxErrorKind::InconsistentMacroArity, line);

        if param_count == 0 && !def.variadic && args.len() == 1 && args[0].is_empty() {
            args.clear();
        }

        if def.variadic {
            if args.len() < param_count {
                return Err(arity());
            }

            let mut variadic_args = Vec::new();
            for (idx, arg) in args.split_off(param_count).into_iter().enumerate() {
                if idx > 0 {
                    variadic_args.push(Token::new(TokenKind::Punct, ",", line));
                }
                variadic_args.extend(arg);
            }
            args.push(variadic_args);
        } else if args.len() != param_count {
            return Err(arity());
        }

        let body = relocate(&def.body, line);
        let mut out: Vec<Token> = Vec::with_capacity(body.len());
        let mut j = 0;

        while j < body.len() {
            let token = &body[j];

            if token.is_punct("#") {
                let operand = skip_trivia(&body, j + 1);
                if let Some(idx) = body.get(operand).and_then(|t| def.param_index(t)) {
                    out.push(stringize(&args[idx], line));
                    j = operand + 1;
                    continue;
                }
            }

            if let Some(idx) = def.param_index(token) {
                let pasted_left = out
                    .iter()
                    .rev()
                    .find(|t| !t.is_trivia())
                    .map_or(false, |t| t.is_punct("##"));
                let pasted_right = body
                    .get(skip_trivia(&body, j + 1))
                    .map_or(false, |t| t.is_punct("##"));

                if pasted_left || pasted_right {
                    out.extend(args[idx].iter().cloned());
                } else {
                    out.extend(self.expand_with(&args[idx], file, active)?);
                }
            } else {
                out.push(token.clone());
            }

            j += 1;
        }

        Ok(paste(&out))
    }
}

/// Split macro call arguments at top-level commas, starting just after the opening paren.
/// Returns the arguments and the index of the closing paren.
fn collect_args(
    tokens: &[Token],
    start: usize,
    line: u32,
) -> Result<(Vec<Vec<Token>>, usize), SyntaxFault> {
    let mut args = Vec::new();
    let mut current = Vec::new();
    let mut depth = 0usize;

    for (idx, token) in tokens.iter().enumerate().skip(start) {
        if token.is_punct("(") {
            depth += 1;
        } else if token.is_punct(")") {
            if depth == 0 {
                args.push(trim(current));
                return Ok((args, idx));
            }
            depth -= 1;
        } else if token.is_punct(",") && depth == 0 {
            args.push(trim(std::mem::take(&mut current)));
            continue;
        }

        match token.kind {
            TokenKind::Comment => {}
            TokenKind::Newline => current.push(Token::new(TokenKind::Whitespace, " ", token.line)),
            _ => current.push(token.clone()),
        }
    }

    Err(SyntaxFault::new(SyntaxErrorKind::UnterminatedMacroCall, line))
}

fn trim(mut tokens: Vec<Token>) -> Vec<Token> {
    while tokens.last().map_or(false, Token::is_trivia) {
        tokens.pop();
    }
    let lead = skip_trivia(&tokens, 0);
    tokens.split_off(lead)
}

fn relocate(tokens: &[Token], line: u32) -> Vec<Token> {
    tokens
        .iter()
        .map(|t| Token::new(t.kind, t.text.clone(), line))
        .collect()
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

fn stringize(arg: &[Token], line: u32) -> Token {
    let mut text = String::new();
    for token in arg {
        match token.kind {
            TokenKind::Whitespace | TokenKind::Newline | TokenKind::Comment => {
                if !text.is_empty() && !text.ends_with(' ') {
                    text.push(' ');
                }
            }
            TokenKind::Literal => {
                for c in token.text.chars() {
                    if c == '"' || c == '\\' {
                        text.push('\\');
                    }
                    text.push(c);
                }
            }
            _ => text.push_str(&token.text),
        }
    }

    Token::new(TokenKind::Literal, format!("\"{}\"", text.trim_end()), line)
}

fn paste(tokens: &[Token]) -> Vec<Token> {
    let mut out: Vec<Token> = Vec::with_capacity(tokens.len());
    let mut i = 0;

    while i < tokens.len() {
        if !tokens[i].is_punct("##") {
            out.push(tokens[i].clone());
            i += 1;
            continue;
        }

        while out.last().map_or(false, Token::is_trivia) {
            out.pop();
        }

        let right = skip_trivia(tokens, i + 1);
        match (out.pop(), tokens.get(right)) {
            (Some(left), Some(right)) => {
                let text = format!("{}{}", left.text, right.text);
                out.push(Token::new(classify(&text), text, left.line));
            }
            (Some(left), None) => out.push(left),
            (None, Some(right)) => out.push(right.clone()),
            (None, None) => {}
        }

        i = right + 1;
    }

    out
}

fn classify(text: &str) -> TokenKind {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {
            if chars.all(|c| c.is_alphanumeric() || c == '_') {
                TokenKind::Ident
            } else {
                TokenKind::Punct
            }
        }
        Some(c) if c.is_ascii_digit() => TokenKind::Number,
        _ => TokenKind::Punct,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::Scanner;

    fn tokens(s: &str) -> Vec<Token> {
        let mut scanner = Scanner::new(s);
        let mut out = Vec::new();
        while let Some(token) = scanner.next_token().unwrap() {
            out.push(token);
        }
        out
    }

    fn table(defines: &[&str]) -> MacroTable {
        let mut table = MacroTable::default();
        for define in defines {
            let (name, def) = parse_define(&tokens(define), 1).unwrap();
            table.define(name, def);
        }
        table
    }

    fn expand(table: &MacroTable, s: &str) -> String {
        table
            .expand(&tokens(s), "test.wgsl")
            .unwrap()
            .iter()
            .map(|t| t.text.as_str())
            .collect()
    }

    #[test]
    fn object_like() {
        let table = table(&["PI 3.14159", "TAU (2.0 * PI)", "EMPTY"]);
        assert_eq!(expand(&table, "let x = TAU;"), "let x = (2.0 * 3.14159);");
        assert_eq!(expand(&table, "a EMPTY b"), "a  b");
    }

    #[test]
    fn function_like() {
        let table = table(&["ADD(a, b) ((a) + (b))", "TWICE(x) ADD(x, x)", "F() 1"]);
        assert_eq!(expand(&table, "ADD(1, 2)"), "((1) + (2))");
        assert_eq!(expand(&table, "TWICE(y)"), "((y) + (y))");
        assert_eq!(expand(&table, "ADD((1, 2), f(3, 4))"), "(((1, 2)) + (f(3, 4)))");
        assert_eq!(expand(&table, "F()"), "1");
        assert_eq!(expand(&table, "ADD + 1"), "ADD + 1");
    }

    #[test]
    fn call_spanning_lines() {
        let table = table(&["ADD(a, b) a+b"]);
        assert_eq!(expand(&table, "ADD(1,\n 2)"), "1+2");
    }

    #[test]
    fn self_reference_stops() {
        let table = table(&["FOO FOO + 1", "A B", "B A"]);
        assert_eq!(expand(&table, "FOO"), "FOO + 1");
        assert_eq!(expand(&table, "A"), "A");
    }

    #[test]
    fn stringize_and_paste() {
        let table = table(&[
            "STR(x) #x",
            "GLUE(a, b) a ## b",
            "FIELD(n) value_ ## n",
            "NAME light",
        ]);
        assert_eq!(expand(&table, "STR(hello   world)"), "\"hello world\"");
        assert_eq!(expand(&table, "STR(\"q\")"), "\"\\\"q\\\"\"");
        assert_eq!(expand(&table, "GLUE(vec, 4)"), "vec4");
        assert_eq!(expand(&table, "FIELD(NAME)"), "value_NAME");
        assert_eq!(expand(&table, "GLUE(, x)"), "x");
    }

    #[test]
    fn variadic() {
        let table = table(&["CALL(f, ...) f(__VA_ARGS__)", "LIST(...) [__VA_ARGS__]"]);
        assert_eq!(expand(&table, "CALL(g, 1, 2, 3)"), "g(1,2,3)");
        assert_eq!(expand(&table, "CALL(g)"), "g()");
        assert_eq!(expand(&table, "LIST()"), "[]");
    }

    #[test]
    fn builtins() {
        let table = MacroTable::default();
        assert_eq!(expand(&table, "__FILE__ __LINE__"), "\"test.wgsl\" 1");
        assert!(table.is_defined("__LINE__"));
    }

    #[test]
    fn arity_errors() {
        let table = table(&["ADD(a, b) a + b", "CALL(f, g, ...) f(g, __VA_ARGS__)"]);
        for s in &["ADD(1)", "ADD(1, 2, 3)", "CALL(x)"] {
            match table.expand(&tokens(s), "") {
                Err(SyntaxFault {
                    kind: SyntaxErrorKind::InconsistentMacroArity,
                    ..
                }) => (),
                val => panic!("{}: {:?}", s, val),
            }
        }

        match table.expand(&tokens("ADD(1, 2"), "") {
            Err(SyntaxFault {
                kind: SyntaxErrorKind::UnterminatedMacroCall,
                ..
            }) => (),
            val => panic!("{:?}", val),
        }
    }

    #[test]
    fn invalid_definitions() {
        for s in &["", "123 x", "F(a, a) a", "F(a b) a", "F(a, ...,) a", "X ## y", "X y ##"] {
            match parse_define(&tokens(s), 1) {
                Err(SyntaxFault {
                    kind: SyntaxErrorKind::InvalidMacroDefinition,
                    ..
                }) => (),
                val => panic!("{}: {:?}", s, val),
            }
        }

        match parse_define(&tokens("S(x) #y"), 1) {
            Err(SyntaxFault {
                kind: SyntaxErrorKind::IncorrectStringifyOperatorUsage,
                ..
            }) => (),
            val => panic!("{:?}", val),
        }
    }

    #[test]
    fn object_like_keeps_paren_after_space() {
        let (_, def) = parse_define(&tokens("X (1)"), 1).unwrap();
        assert!(def.params.is_none());
        let text: String = def.body.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(text, "(1)");
    }
}
