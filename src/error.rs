/// The pointer position.
#[derive(Copy, Clone, Default, Debug)]
#[non_exhaustive]
pub struct Mark {
    /// The position index.
    pub index: u64,
    /// The position line.
    pub line: u64,
    /// The position column.
    pub column: u64,
}

impl std::fmt::Display for Mark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {} column {}", self.line, self.column)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    #[error("{problem}")]
    Problem {
        problem: &'static str,
        offset: usize,
        value: i32,
    },
    #[error("input stream produced an invalid byte order marker")]
    InvalidBom,
    #[error("invalid UTF-8 byte at offset: {value:x}")]
    InvalidUtf8 { value: u8 },
    #[error("invalid UTF-16 unpaired surrogate: {value:x}")]
    InvalidUtf16 { value: u16 },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ScannerError {
    #[error("{}:{}: {} {} ({}:{})", problem_mark.line, problem_mark.column, problem, context, context_mark.line, context_mark.column)]
    Problem {
        context: &'static str,
        context_mark: Mark,
        problem: &'static str,
        problem_mark: Mark,
    },
    #[error(transparent)]
    Reader(#[from] ReaderError),
}

#[derive(Debug, thiserror::Error)]
pub enum ParserError {
    #[error("no more tokens")]
    UnexpectedEof,
    #[error("{}:{}: {}", mark.line, mark.column, problem)]
    Problem { problem: &'static str, mark: Mark },
    #[error("{}:{}: {} {} ({}:{})", mark.line, mark.column, problem, context, context_mark.line, context_mark.column)]
    ProblemWithContext {
        context: &'static str,
        context_mark: Mark,
        problem: &'static str,
        mark: Mark,
    },
    #[error(transparent)]
    Scanner(#[from] ScannerError),
}

#[derive(Debug, thiserror::Error)]
pub enum ComposerError {
    #[error("{}:{}: {}", mark.line, mark.column, problem)]
    Problem { problem: &'static str, mark: Mark },
    #[error("{}:{}: {} {} ({}:{})", mark.line, mark.column, problem, context, context_mark.line, context_mark.column)]
    ProblemWithContext {
        context: &'static str,
        context_mark: Mark,
        problem: &'static str,
        mark: Mark,
    },
    #[error("{}:{}: found duplicate key {key:?} in mapping", mark.line, mark.column)]
    DuplicateKey { key: String, mark: Mark },
    #[error(transparent)]
    Parser(#[from] ParserError),
}

/// Structural and path-compilation errors raised by the anchor/alias
/// resolver and the walker.
///
/// Reference loops are reported through `check_ref_loop`'s `Ok(bool)`
/// return value rather than this enum, since a cycle is an expected,
/// non-fatal outcome of a walk rather than a structural failure.
#[derive(Debug, thiserror::Error)]
pub enum WalkError {
    /// The traversal exceeded its configured maximum depth.
    #[error("maximum walk depth {max_depth} exceeded")]
    DepthExceeded { max_depth: u32 },
    /// The path string could not be compiled.
    #[error("invalid path syntax: {problem}")]
    InvalidSyntax { problem: &'static str },
    /// A simple-result component was found after a multi-result component
    /// without `WalkConfig::allow_simple_after_multi`.
    #[error("simple component after multi-result component is ambiguous")]
    SimpleAfterMulti,
    /// A caller tried to set a marker bit reserved for the system
    /// (`VISIT_MARKER`/`REF_MARKER`) or beyond `WalkConfig::user_marker_bits`.
    #[error("marker bit {bit} is out of the caller-usable range")]
    MarkerOutOfRange { bit: u8 },
    /// Under `WalkConfig::strict`, a component found nothing to select
    /// (missing key, out-of-range index) where a non-strict walk would
    /// simply shrink the result set.
    #[error("path execution failed: {problem}")]
    Execution { problem: &'static str },
}
