//! Directive processing: conditionals, `#define`/`#undef`, `#include` through an
//! [`IncludeResolver`], and macro expansion of everything else.

use crate::error::{PrepperError, SyntaxErrorKind, SyntaxFault};
use crate::expression;
use crate::macros::{parse_define, MacroTable};
use crate::scanner::{skip_trivia, Directive, Scanner, Token, TokenKind};

/// How many times a file may be re-entered while it is still open. One re-entry
/// lets include guards skip the body; the next one is reported as recursion.
const MAX_REENTRY: usize = 1;

const MEMORY_FILE: &str = "<memory>";

pub struct ResolvedInclude {
    /// Identifies the file for recursion tracking, `__FILE__` and error reports
    pub key: String,
    pub source: String,
}

pub trait IncludeResolver {
    fn resolve_include(
        &mut self,
        path: &str,
        is_system: bool,
    ) -> Result<ResolvedInclude, PrepperError>;
}

struct Conditional {
    /// Whether the enclosing block emits anything
    parent_active: bool,
    /// Whether some branch of this block has already been taken
    taken: bool,
    active: bool,
    seen_else: bool,
}

pub struct Expander<'r> {
    resolver: &'r mut dyn IncludeResolver,
    macros: MacroTable,
    strip_comments: bool,
    include_stack: Vec<String>,
    output: String,
}

impl<'r> Expander<'r> {
    pub fn new(resolver: &'r mut dyn IncludeResolver, strip_comments: bool) -> Self {
        Expander {
            resolver,
            macros: MacroTable::default(),
            strip_comments,
            include_stack: Vec::new(),
            output: String::new(),
        }
    }

    /// Expand `source`, which came from `file` if it has a path.
    pub fn process(mut self, source: &str, file: Option<&str>) -> Result<String, PrepperError> {
        if let Some(file) = file {
            self.include_stack.push(file.to_owned());
        }
        self.process_file(source, file)?;
        Ok(self.output)
    }

    fn process_file(&mut self, source: &str, file: Option<&str>) -> Result<(), PrepperError> {
        let mut scanner = Scanner::new(source);
        let mut conditionals: Vec<Conditional> = Vec::new();
        let mut open_lines: Vec<u32> = Vec::new();
        let mut pending: Vec<Token> = Vec::new();

        while let Some(line) = scanner.next_line().map_err(|e| e.in_file(file))? {
            let active = conditionals.last().map_or(true, |c| c.active);

            let directive = match line.directive() {
                Some(directive) => directive,
                None => {
                    if active {
                        pending.extend(line.tokens.iter().cloned());
                    }
                    continue;
                }
            };

            // Text collected so far must be expanded with the macros in effect before this line.
            self.flush(&mut pending, file)?;

            let name = match directive.name {
                Some(name) => name,
                None => continue,
            };

            match name.text.as_str() {
                "if" | "ifdef" | "ifndef" => {
                    let taken = active && self.condition(&name.text, &directive, file)?;
                    conditionals.push(Conditional {
                        parent_active: active,
                        taken,
                        active: taken,
                        seen_else: false,
                    });
                    open_lines.push(directive.line);
                }
                "elif" => {
                    let cond = conditionals.last().ok_or_else(|| {
                        fault(SyntaxErrorKind::UnexpectedToken, directive.line, file)
                    })?;
                    if cond.seen_else {
                        return Err(fault(
                            SyntaxErrorKind::ElifBlockAfterElseFound,
                            directive.line,
                            file,
                        ));
                    }

                    let take = cond.parent_active
                        && !cond.taken
                        && self.condition("if", &directive, file)?;

                    if let Some(cond) = conditionals.last_mut() {
                        cond.active = take;
                        cond.taken |= take;
                    }
                }
                "else" => {
                    let cond = conditionals.last_mut().ok_or_else(|| {
                        fault(SyntaxErrorKind::UnexpectedToken, directive.line, file)
                    })?;
                    if cond.seen_else {
                        return Err(fault(
                            SyntaxErrorKind::AnotherElseBlockFound,
                            directive.line,
                            file,
                        ));
                    }

                    cond.active = cond.parent_active && !cond.taken;
                    cond.taken = true;
                    cond.seen_else = true;
                }
                "endif" => {
                    if conditionals.pop().is_none() {
                        return Err(fault(SyntaxErrorKind::UnbalancedEndif, directive.line, file));
                    }
                    open_lines.pop();
                }
                _ if !active => {}
                "define" => {
                    let (macro_name, def) =
                        parse_define(directive.rest, directive.line).map_err(|e| e.in_file(file))?;
                    self.macros.define(macro_name, def);
                }
                "undef" => {
                    let idx = skip_trivia(directive.rest, 0);
                    match directive.rest.get(idx) {
                        Some(t) if t.kind == TokenKind::Ident => {
                            self.macros.undefine(&t.text);
                        }
                        _ => {
                            return Err(fault(
                                SyntaxErrorKind::UnexpectedToken,
                                directive.line,
                                file,
                            ))
                        }
                    }
                }
                "include" => self.include(&directive, file)?,
                "pragma" => self.emit(&line.tokens),
                "error" => {
                    return Err(PrepperError::ErrorDirective {
                        message: join_text(directive.rest).trim().to_owned(),
                        line: directive.line as usize,
                    })
                }
                _ => {
                    return Err(fault(
                        SyntaxErrorKind::UndefinedDirective,
                        directive.line,
                        file,
                    ))
                }
            }
        }

        self.flush(&mut pending, file)?;

        if let Some(&line) = open_lines.first() {
            return Err(fault(SyntaxErrorKind::UnterminatedConditional, line, file));
        }

        Ok(())
    }

    fn condition(
        &self,
        kind: &str,
        directive: &Directive<'_>,
        file: Option<&str>,
    ) -> Result<bool, PrepperError> {
        let line = directive.line;

        if kind == "ifdef" || kind == "ifndef" {
            let idx = skip_trivia(directive.rest, 0);
            let defined = match directive.rest.get(idx) {
                Some(t) if t.kind == TokenKind::Ident => self.macros.is_defined(&t.text),
                _ => return Err(fault(SyntaxErrorKind::UnexpectedToken, line, file)),
            };
            return Ok(defined == (kind == "ifdef"));
        }

        let resolved = self
            .replace_defined(directive.rest, line)
            .map_err(|e| e.in_file(file))?;
        let expanded = self
            .macros
            .expand(&resolved, file.unwrap_or(MEMORY_FILE))
            .map_err(|e| e.in_file(file))?;

        expression::evaluate(&expanded, line)
            .map(|value| value != 0)
            .map_err(|e| e.in_file(file))
    }

    /// Replace `defined X` and `defined(X)` with `1` or `0` ahead of macro expansion.
    fn replace_defined(&self, tokens: &[Token], line: u32) -> Result<Vec<Token>, SyntaxFault> {
        let invalid = || SyntaxFault::new(SyntaxErrorKind::InvalidExpression, line);
        let mut out = Vec::with_capacity(tokens.len());
        let mut i = 0;

        while i < tokens.len() {
            if !tokens[i].is_ident("defined") {
                out.push(tokens[i].clone());
                i += 1;
                continue;
            }

            let mut j = skip_trivia(tokens, i + 1);
            let parenthesized = tokens.get(j).map_or(false, |t| t.is_punct("("));
            if parenthesized {
                j = skip_trivia(tokens, j + 1);
            }

            let name = match tokens.get(j) {
                Some(t) if t.kind == TokenKind::Ident => &t.text,
                _ => return Err(invalid()),
            };

            if parenthesized {
                j = skip_trivia(tokens, j + 1);
                if !tokens.get(j).map_or(false, |t| t.is_punct(")")) {
                    return Err(invalid());
                }
            }

            let value = if self.macros.is_defined(name) { "1" } else { "0" };
            out.push(Token::new(TokenKind::Number, value, line));
            i = j + 1;
        }

        Ok(out)
    }

    fn include(&mut self, directive: &Directive<'_>, file: Option<&str>) -> Result<(), PrepperError> {
        let target = match parse_include_target(directive.rest) {
            Some(target) => Some(target),
            None => {
                let expanded = self
                    .macros
                    .expand(directive.rest, file.unwrap_or(MEMORY_FILE))
                    .map_err(|e| e.in_file(file))?;
                parse_include_target(&expanded)
            }
        };

        let (path, is_system) = target.ok_or_else(|| {
            fault(SyntaxErrorKind::InvalidIncludeDirective, directive.line, file)
        })?;

        let resolved = self.resolver.resolve_include(&path, is_system)?;

        let reentries = self
            .include_stack
            .iter()
            .filter(|open| **open == resolved.key)
            .count();
        if reentries > MAX_REENTRY {
            return Err(PrepperError::RecursiveInclude {
                file: path,
                from: file.unwrap_or(MEMORY_FILE).to_owned(),
                from_line: directive.line as usize,
            });
        }

        log::trace!("expanding include `{}` from {}", path, resolved.key);

        self.include_stack.push(resolved.key.clone());
        let result = self.process_file(&resolved.source, Some(&resolved.key));
        self.include_stack.pop();
        result
    }

    fn flush(&mut self, pending: &mut Vec<Token>, file: Option<&str>) -> Result<(), PrepperError> {
        if pending.is_empty() {
            return Ok(());
        }

        let expanded = self
            .macros
            .expand(pending, file.unwrap_or(MEMORY_FILE))
            .map_err(|e| e.in_file(file))?;
        pending.clear();
        self.emit(&expanded);
        Ok(())
    }

    fn emit(&mut self, tokens: &[Token]) {
        for token in tokens {
            if token.kind == TokenKind::Comment && self.strip_comments {
                let newlines = token.text.matches('\n').count();
                if newlines > 0 {
                    self.output.extend(std::iter::repeat('\n').take(newlines));
                } else if token.text.starts_with("/*") {
                    self.output.push(' ');
                }
            } else {
                self.output.push_str(&token.text);
            }
        }
    }
}

fn fault(kind: SyntaxErrorKind, line: u32, file: Option<&str>) -> PrepperError {
    SyntaxFault::new(kind, line).in_file(file)
}

fn join_text(tokens: &[Token]) -> String {
    tokens.iter().map(|t| t.text.as_str()).collect()
}

/// Extract the path and "is system include" flag from `"path"` or `<path>`.
fn parse_include_target(tokens: &[Token]) -> Option<(String, bool)> {
    let text: String = tokens
        .iter()
        .filter(|t| t.kind != TokenKind::Comment)
        .map(|t| t.text.as_str())
        .collect();
    let text = text.trim();

    let (right_delim, is_system) = match text.chars().next() {
        Some('"') => ('"', false),
        Some('<') => ('>', true),
        _ => return None,
    };

    let inner = &text[1..];
    let end = inner.find(right_delim)?;
    let path = &inner[..end];

    if path.is_empty() || !inner[end + 1..].trim().is_empty() {
        return None;
    }

    Some((path.to_owned(), is_system))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    struct MapResolver(HashMap<&'static str, &'static str>);

    impl IncludeResolver for MapResolver {
        fn resolve_include(
            &mut self,
            path: &str,
            _is_system: bool,
        ) -> Result<ResolvedInclude, PrepperError> {
            self.0
                .get(path)
                .map(|source| ResolvedInclude {
                    key: path.to_owned(),
                    source: source.to_string(),
                })
                .ok_or_else(|| PrepperError::IncludeNotFound {
                    file: path.to_owned(),
                })
        }
    }

    fn expand_with(files: &[(&'static str, &'static str)], s: &str) -> Result<String, PrepperError> {
        let mut resolver = MapResolver(files.iter().cloned().collect());
        Expander::new(&mut resolver, true).process(s, Some("main.wgsl"))
    }

    fn expand(s: &str) -> String {
        match expand_with(&[], s) {
            Ok(r) => r,
            val => panic!("{:?}", val),
        }
    }

    fn syntax_error(s: &str) -> (SyntaxErrorKind, usize) {
        match expand_with(&[], s) {
            Err(PrepperError::Syntax { kind, line, .. }) => (kind, line),
            val => panic!("{:?}", val),
        }
    }

    #[test]
    fn ignore_unrecognized() {
        assert_eq!(expand("*/ */ \t/ /"), "*/ */ \t/ /");
        assert_eq!(expand("fn main() {}"), "fn main() {}");
    }

    #[test]
    fn directives_produce_no_output() {
        assert_eq!(expand("#define A 1\nA\n#undef A\nA\n"), "1\nA\n");
        assert_eq!(expand("#\nx"), "x");
    }

    #[test]
    fn conditionals() {
        let s = "#define B 2\n#if B > 1\nyes\n#else\nno\n#endif\n";
        assert_eq!(expand(s), "yes\n");

        let s = "#ifdef MISSING\na\n#elif defined(B) || 1\nb\n#elif 1\nc\n#else\nd\n#endif\n";
        assert_eq!(expand(s), "b\n");

        let s = "#ifndef G\n#define G\nonce\n#endif\n#ifndef G\ntwice\n#endif\n";
        assert_eq!(expand(s), "once\n");
    }

    #[test]
    fn nested_inactive_blocks_are_skipped() {
        let s = "#if 0\n#if 1\nhidden\n#else\nalso hidden\n#endif\n#bogus\n#else\nshown\n#endif\n";
        assert_eq!(expand(s), "shown\n");
    }

    #[test]
    fn comments() {
        assert_eq!(expand("foo /* bar */ baz"), "foo   baz");
        assert_eq!(expand("foo // baz\nbar"), "foo \nbar");
        assert_eq!(expand("a /* x\ny */ b"), "a \n b");

        let mut resolver = MapResolver(HashMap::new());
        let kept = Expander::new(&mut resolver, false)
            .process("foo // FOO\n", None)
            .unwrap();
        assert_eq!(kept, "foo // FOO\n");
    }

    #[test]
    fn no_expansion_in_comments_or_strings() {
        assert_eq!(
            expand("#define X 1\n// X\n\"X\" X\n"),
            "\n\"X\" 1\n"
        );
    }

    #[test]
    fn pragma_passes_through() {
        assert_eq!(expand("#pragma something\nx"), "#pragma something\nx");
    }

    #[test]
    fn basic_include() {
        let files = [("foo", "[foo]"), ("foo/bar/baz", "[baz]")];
        assert_eq!(expand_with(&files, r#"#include"foo""#).unwrap(), "[foo]");
        assert_eq!(expand_with(&files, r#"#include "foo""#).unwrap(), "[foo]");
        assert_eq!(expand_with(&files, "#include <foo>").unwrap(), "[foo]");
        assert_eq!(expand_with(&files, "#include <foo/bar/baz>").unwrap(), "[baz]");
        assert_eq!(expand_with(&files, "#include <foo>//\n").unwrap(), "[foo]");
        assert_eq!(expand_with(&files, "# include <foo>").unwrap(), "[foo]");
        assert_eq!(expand_with(&files, "#/**/include <foo>").unwrap(), "[foo]");
        assert_eq!(expand_with(&files, "#include /**/ <foo>").unwrap(), "[foo]");
        assert_eq!(expand_with(&files, "#inc\\\nlude <foo>").unwrap(), "[foo]");
        assert_eq!(
            expand_with(&files, "#define TARGET \"foo\"\n#include TARGET").unwrap(),
            "[foo]"
        );
    }

    #[test]
    fn multi_level_include() {
        let files = [
            (
                "foo",
                "double rainbow;\n#include <bar>\nint spam;\n#include <baz>\nvoid ham();",
            ),
            ("bar", "int bar;\n"),
            ("baz", "int baz;\n"),
        ];

        assert_eq!(
            expand_with(&files, "#include <foo>").unwrap(),
            "double rainbow;\nint bar;\nint spam;\nint baz;\nvoid ham();"
        );
    }

    #[test]
    fn include_shares_macro_context() {
        let files = [("defs", "#define SIZE 4\n"), ("use", "array<f32, SIZE>\n")];
        assert_eq!(
            expand_with(&files, "#include \"defs\"\n#include \"use\"\n").unwrap(),
            "array<f32, 4>\n"
        );
    }

    #[test]
    fn include_err() {
        for s in &["#include", "#include @", "#include <foo", "#include \"\""] {
            match expand_with(&[("foo", "")], s) {
                Err(PrepperError::Syntax {
                    kind: SyntaxErrorKind::InvalidIncludeDirective,
                    line: 1,
                    ..
                }) => (),
                val => panic!("{:?}", val),
            }
        }

        match expand_with(&[], "#include <nope>") {
            Err(PrepperError::IncludeNotFound { file }) if file == "nope" => (),
            val => panic!("{:?}", val),
        }
    }

    #[test]
    fn recursive_include() {
        let files = [
            ("foo", "#include <bar>"),
            ("bar", "#include <baz>"),
            ("baz", "#include <foo>"),
        ];

        match &expand_with(&files, "#include <foo>") {
            Err(PrepperError::RecursiveInclude {
                file: fname,
                from: fsrc,
                from_line: 1,
            }) if fname == "foo" && fsrc == "baz" => (),
            val => panic!("{:?}", val),
        }
    }

    #[test]
    fn guarded_reentry_is_allowed() {
        let files = [
            ("a", "#ifndef A\n#define A\n#include <b>\na\n#endif\n"),
            ("b", "#include <a>\nb\n"),
        ];
        assert_eq!(expand_with(&files, "#include <a>\n").unwrap(), "b\na\n");
    }

    #[test]
    fn error_lines() {
        assert_eq!(
            syntax_error("a\n#endif\n"),
            (SyntaxErrorKind::UnbalancedEndif, 2)
        );
        assert_eq!(
            syntax_error("\n\n#if 1\nx\n"),
            (SyntaxErrorKind::UnterminatedConditional, 3)
        );
        assert_eq!(
            syntax_error("#if 1\n#else\n#else\n#endif\n"),
            (SyntaxErrorKind::AnotherElseBlockFound, 3)
        );
        assert_eq!(
            syntax_error("#if 1\n#else\n#elif 1\n#endif\n"),
            (SyntaxErrorKind::ElifBlockAfterElseFound, 3)
        );
        assert_eq!(
            syntax_error("#frobnicate\n"),
            (SyntaxErrorKind::UndefinedDirective, 1)
        );
        assert_eq!(
            syntax_error("#if defined(\n#endif\n"),
            (SyntaxErrorKind::InvalidExpression, 1)
        );
        assert_eq!(
            syntax_error("#define\n"),
            (SyntaxErrorKind::InvalidMacroDefinition, 1)
        );
    }

    #[test]
    fn error_directive() {
        match expand_with(&[], "#if 0\n#error hidden\n#endif\n#error  out of range \n") {
            Err(PrepperError::ErrorDirective { message, line: 4 }) if message == "out of range" => {}
            val => panic!("{:?}", val),
        }
    }

    #[test]
    fn error_in_include_names_the_file() {
        match expand_with(&[("inner", "ok\n#endif\n")], "\n#include \"inner\"\n") {
            Err(PrepperError::Syntax {
                kind: SyntaxErrorKind::UnbalancedEndif,
                line: 2,
                file: Some(file),
            }) if file == "inner" => {}
            val => panic!("{:?}", val),
        }
    }
}
