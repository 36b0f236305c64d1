//! Configuration surface for the parser, document builder, and walker.

/// Parse-time configuration flags.
///
/// Threaded through [`Parser::set_config`](crate::Parser::set_config) and
/// consulted by the scanner, parser, and document builder.
#[derive(Copy, Clone, Debug)]
#[non_exhaustive]
pub struct ParserConfig {
    /// Restrict the grammar to the JSON-compatible subset: flow style only,
    /// no directives/anchors/aliases/tags, unquoted scalars must match a
    /// JSON lexeme.
    pub json_mode: bool,
    /// Allow a mapping to carry more than one pair with an equal key. When
    /// `false`, the second occurrence of a key fails the document.
    pub allow_duplicate_keys: bool,
    /// Allow an alias to reference an anchor declared later in the same
    /// document. When `false` (the default), forward references fail.
    pub allow_forward_aliases: bool,
    /// Retain the last scanned comment for attachment to the next token.
    pub preserve_comments: bool,
    /// Allow the document builder to build a mapping accelerator once a
    /// mapping's pair count passes the implementation threshold.
    pub accelerator_enable: bool,
    /// Accepted for API parity with the original; diagnostic formatting
    /// (and therefore colorization) is out of scope for this crate.
    pub color_diagnostics: bool,
    /// Accepted for API parity with the original's manual recycling lists.
    /// This implementation always uses the global allocator, so this flag
    /// is a no-op.
    pub suppress_recycling: bool,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            json_mode: false,
            allow_duplicate_keys: true,
            allow_forward_aliases: false,
            preserve_comments: false,
            accelerator_enable: true,
            color_diagnostics: false,
            suppress_recycling: false,
        }
    }
}

/// Walk-time configuration flags.
///
/// Passed to [`Node::walk_with_config`](crate::Node::walk_with_config) and
/// [`check_ref_loop`](crate::check_ref_loop).
#[derive(Copy, Clone, Debug)]
#[non_exhaustive]
pub struct WalkConfig {
    /// Number of caller-usable marker bits, below the two reserved system
    /// bits (`VISIT_MARKER`, `REF_MARKER`). Attempting to set a bit at or
    /// above this count (other than the system bits) is rejected.
    pub user_marker_bits: u8,
    /// Maximum traversal depth before a structural error is raised.
    pub max_depth: u32,
    /// Allow a simple-result component (e.g. a map-key lookup) to follow a
    /// multi-result component (`/*`, `/**`, `/**$`) in a compiled path, as in
    /// `/a/**/c`. Defaults to `true`, since applying a key/index lookup to
    /// each node of a recursive expansion is the ordinary case; set to
    /// `false` to reject such paths at compile time instead.
    pub allow_simple_after_multi: bool,
    /// When set, a path-execution failure (missing key, out-of-range index)
    /// surfaces as [`WalkError::Execution`](crate::WalkError::Execution)
    /// instead of silently shrinking the result set.
    pub strict: bool,
}

impl Default for WalkConfig {
    fn default() -> Self {
        Self {
            user_marker_bits: 6,
            max_depth: 1000,
            allow_simple_after_multi: true,
            strict: false,
        }
    }
}
