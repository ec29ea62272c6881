use std::fmt;

/// Kind of a malformed directive or expansion failure, as reported by the expander.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SyntaxErrorKind {
    UnexpectedToken,
    UnbalancedEndif,
    UnterminatedConditional,
    InvalidMacroDefinition,
    InconsistentMacroArity,
    InvalidIncludeDirective,
    AnotherElseBlockFound,
    ElifBlockAfterElseFound,
    UndefinedDirective,
    InvalidExpression,
    DivisionByZero,
    IncorrectStringifyOperatorUsage,
    UnterminatedComment,
    UnterminatedMacroCall,
}

impl SyntaxErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SyntaxErrorKind::UnexpectedToken => "Unexpected token",
            SyntaxErrorKind::UnbalancedEndif => "Unbalanced endif",
            SyntaxErrorKind::UnterminatedConditional => "Unterminated conditional block",
            SyntaxErrorKind::InvalidMacroDefinition => "Invalid macro definition",
            SyntaxErrorKind::InconsistentMacroArity => "Inconsistent macro arity",
            SyntaxErrorKind::InvalidIncludeDirective => "Invalid include directive",
            SyntaxErrorKind::AnotherElseBlockFound => "Another else block found",
            SyntaxErrorKind::ElifBlockAfterElseFound => "Elif block after else found",
            SyntaxErrorKind::UndefinedDirective => "Undefined directive",
            SyntaxErrorKind::InvalidExpression => "Invalid expression",
            SyntaxErrorKind::DivisionByZero => "Division by zero",
            SyntaxErrorKind::IncorrectStringifyOperatorUsage => {
                "Incorrect stringify operator usage"
            }
            SyntaxErrorKind::UnterminatedComment => "Unterminated comment",
            SyntaxErrorKind::UnterminatedMacroCall => "Unterminated macro call",
        }
    }
}

impl fmt::Display for SyntaxErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PrepperError {
    /// An `#include` target was not found by any resolution tier
    #[error("Included file `{file}` could not be found!")]
    IncludeNotFound { file: String },

    /// A file passed resolution (or was requested directly) but could not be read
    #[error("Failed to open file `{file}`... does it exist?")]
    FileOpen {
        file: String,
        #[source]
        source: std::io::Error,
    },

    /// Malformed directive or macro expansion failure
    #[error("{kind} on line: {line}")]
    Syntax {
        kind: SyntaxErrorKind,

        /// 1-based line in the stream being expanded; for the top-level source
        /// this counts the prepended define block
        line: usize,

        /// File the stream came from, if it has a path
        file: Option<String>,
    },

    /// An `#error` directive was reached in an active branch
    #[error("#error on line: {line}: {message}")]
    ErrorDirective { message: String, line: usize },

    /// Recursively included file, along with information about where it was encountered
    #[error("file {file:?} is recursively included; triggered in {from:?} ({from_line:?})")]
    RecursiveInclude {
        /// File which was included recursively
        file: String,

        /// File which included the recursively included one
        from: String,

        /// Line in the `from` file on which the include happened
        from_line: usize,
    },
}

/// Syntax problem found by the scanner or macro engine, before it is attributed to a file
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct SyntaxFault {
    pub kind: SyntaxErrorKind,
    pub line: u32,
}

impl SyntaxFault {
    pub fn new(kind: SyntaxErrorKind, line: u32) -> Self {
        SyntaxFault { kind, line }
    }

    pub fn in_file(self, file: Option<&str>) -> PrepperError {
        PrepperError::Syntax {
            kind: self.kind,
            line: self.line as usize,
            file: file.map(str::to_owned),
        }
    }
}
