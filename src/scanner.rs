use std::collections::VecDeque;

use crate::macros::{is_blankz, is_break};
use crate::reader::Reader;
use crate::{Encoding, Mark, ReaderError, ScannerError, Token, TokenData};

/// Information about a potential simple key, one per open flow level.
#[derive(Copy, Clone)]
struct SimpleKey {
    possible: bool,
    required: bool,
    token_number: usize,
    mark: Mark,
}

const MAX_NUMBER_LENGTH: usize = 9;

/// Converts the input stream into a queue of [`Token`]s.
///
/// Owns a [`Reader`] plus the scanner's own stacks: the block-indentation
/// stack, the per-flow-level simple-key candidates, and the current flow
/// nesting depth. [`Parser`](crate::Parser) drives this one token at a time.
#[non_exhaustive]
pub struct Scanner<'r> {
    reader: Reader<'r>,
    pub(crate) tokens: VecDeque<Token>,
    pub(crate) tokens_parsed: usize,
    pub(crate) token_available: bool,
    pub(crate) stream_start_produced: bool,
    pub(crate) stream_end_produced: bool,
    flow_level: i64,
    indent: i64,
    indents: Vec<i64>,
    simple_key_allowed: bool,
    simple_keys: Vec<SimpleKey>,
    json_mode: bool,
}

impl<'r> Default for Scanner<'r> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'r> Scanner<'r> {
    /// Create a new scanner with no input set.
    pub fn new() -> Self {
        Scanner {
            reader: Reader::new(),
            tokens: VecDeque::new(),
            tokens_parsed: 0,
            token_available: false,
            stream_start_produced: false,
            stream_end_produced: false,
            flow_level: 0,
            indent: -1,
            indents: Vec::new(),
            simple_key_allowed: false,
            simple_keys: Vec::new(),
            json_mode: false,
        }
    }

    /// Set a string input.
    pub fn set_input_string(&mut self, input: &'r mut &[u8]) {
        self.reader.set_input_string(input);
    }

    /// Set a generic input handler.
    pub fn set_input(&mut self, input: &'r mut dyn std::io::BufRead) {
        self.reader.set_input(input);
    }

    /// Set the input encoding. By default, the encoding is detected from the
    /// byte order marker, falling back to UTF-8.
    pub fn set_encoding(&mut self, encoding: Encoding) {
        self.reader.set_encoding(encoding);
    }

    pub(crate) fn set_json_mode(&mut self, json_mode: bool) {
        self.json_mode = json_mode;
        self.reader.set_json_mode(json_mode);
    }

    fn cache(&mut self, length: usize) -> Result<(), ReaderError> {
        self.reader.ensure_lookahead(length)
    }

    fn skip(&mut self) {
        self.reader.skip();
    }

    fn skip_line(&mut self) {
        self.reader.skip_line();
    }

    fn read_string(&mut self, string: &mut String) {
        string.push(self.reader.skip());
    }

    fn read_line_string(&mut self, string: &mut String) {
        if self.reader.buffer.len() >= 2 && self.reader.buffer[0] == '\r' && self.reader.buffer[1] == '\n'
        {
            string.push('\n');
            self.reader.advance(2);
        } else if let Some(front) = self.reader.buffer.front().copied() {
            if is_break(Some(front)) {
                let char_len = front.len_utf8();
                self.reader.skip();
                if char_len == 3 {
                    string.push(front);
                } else {
                    string.push('\n');
                }
            }
        }
    }

    fn mark(&self) -> Mark {
        self.reader.get_mark()
    }

    /// Pull the next token from the queue, producing STREAM-END forever once
    /// the stream has finished.
    pub fn scan(&mut self) -> Result<Token, ScannerError> {
        if self.stream_end_produced {
            return Ok(Token {
                data: TokenData::StreamEnd,
                start_mark: self.mark(),
                end_mark: self.mark(),
            });
        }
        if !self.token_available {
            self.fetch_more_tokens()?;
        }
        let token = self.tokens.pop_front().expect("no more tokens");
        self.token_available = false;
        self.tokens_parsed = self.tokens_parsed.wrapping_add(1);
        if let TokenData::StreamEnd = &token.data {
            self.stream_end_produced = true;
        }
        Ok(token)
    }

    fn set_scanner_error<T>(
        &self,
        context: &'static str,
        context_mark: Mark,
        problem: &'static str,
    ) -> Result<T, ScannerError> {
        Err(ScannerError::Problem {
            context,
            context_mark,
            problem,
            problem_mark: self.mark(),
        })
    }

    pub(crate) fn fetch_more_tokens(&mut self) -> Result<(), ScannerError> {
        loop {
            let mut need_more_tokens = false;
            if self.tokens.is_empty() {
                need_more_tokens = true;
            } else {
                self.stale_simple_keys()?;
                for simple_key in &self.simple_keys {
                    if simple_key.possible && simple_key.token_number == self.tokens_parsed {
                        need_more_tokens = true;
                        break;
                    }
                }
            }
            if !need_more_tokens {
                break;
            }
            self.fetch_next_token()?;
            if let Some(token) = self.tokens.back() {
                log::trace!("fetched token {:?}", token.data);
            }
        }
        self.token_available = true;
        Ok(())
    }

    fn fetch_next_token(&mut self) -> Result<(), ScannerError> {
        self.cache(1)?;
        if !self.stream_start_produced {
            self.fetch_stream_start();
            return Ok(());
        }
        self.scan_to_next_token()?;
        self.stale_simple_keys()?;
        self.unroll_indent(self.mark().column as i64);
        self.cache(4)?;

        let buffer = &self.reader.buffer;
        if IS_Z!(buffer) {
            return self.fetch_stream_end();
        }
        let column = self.mark().column;
        if column == 0 && CHECK_AT!(buffer, '%', 0) {
            return self.fetch_directive();
        }
        if column == 0
            && CHECK_AT!(buffer, '-', 0)
            && CHECK_AT!(buffer, '-', 1)
            && CHECK_AT!(buffer, '-', 2)
            && is_blankz(buffer.get(3).copied())
        {
            return self.fetch_document_indicator(TokenData::DocumentStart);
        }
        if column == 0
            && CHECK_AT!(buffer, '.', 0)
            && CHECK_AT!(buffer, '.', 1)
            && CHECK_AT!(buffer, '.', 2)
            && is_blankz(buffer.get(3).copied())
        {
            return self.fetch_document_indicator(TokenData::DocumentEnd);
        }
        if CHECK!(buffer, '[') {
            return self.fetch_flow_collection_start(TokenData::FlowSequenceStart);
        }
        if CHECK!(buffer, '{') {
            return self.fetch_flow_collection_start(TokenData::FlowMappingStart);
        }
        if CHECK!(buffer, ']') {
            return self.fetch_flow_collection_end(TokenData::FlowSequenceEnd);
        }
        if CHECK!(buffer, '}') {
            return self.fetch_flow_collection_end(TokenData::FlowMappingEnd);
        }
        if CHECK!(buffer, ',') {
            return self.fetch_flow_entry();
        }
        if CHECK!(buffer, '-') && IS_BLANKZ_AT!(buffer, 1) {
            return self.fetch_block_entry();
        }
        if CHECK!(buffer, '?') && (self.flow_level != 0 || IS_BLANKZ_AT!(buffer, 1)) {
            return self.fetch_key();
        }
        if CHECK!(buffer, ':') && (self.flow_level != 0 || IS_BLANKZ_AT!(buffer, 1)) {
            return self.fetch_value();
        }
        if CHECK!(buffer, '*') {
            return self.fetch_anchor(true);
        }
        if CHECK!(buffer, '&') {
            return self.fetch_anchor(false);
        }
        if CHECK!(buffer, '!') {
            return self.fetch_tag();
        }
        if CHECK!(buffer, '|') && self.flow_level == 0 {
            return self.fetch_block_scalar(true);
        }
        if CHECK!(buffer, '>') && self.flow_level == 0 {
            return self.fetch_block_scalar(false);
        }
        if CHECK!(buffer, '\'') {
            return self.fetch_flow_scalar(true);
        }
        if CHECK!(buffer, '"') {
            return self.fetch_flow_scalar(false);
        }
        if !(IS_BLANKZ!(buffer)
            || CHECK!(buffer, '-')
            || CHECK!(buffer, '?')
            || CHECK!(buffer, ':')
            || CHECK!(buffer, ',')
            || CHECK!(buffer, '[')
            || CHECK!(buffer, ']')
            || CHECK!(buffer, '{')
            || CHECK!(buffer, '}')
            || CHECK!(buffer, '#')
            || CHECK!(buffer, '&')
            || CHECK!(buffer, '*')
            || CHECK!(buffer, '!')
            || CHECK!(buffer, '|')
            || CHECK!(buffer, '>')
            || CHECK!(buffer, '\'')
            || CHECK!(buffer, '"')
            || CHECK!(buffer, '%')
            || CHECK!(buffer, '@')
            || CHECK!(buffer, '`'))
            || CHECK!(buffer, '-') && !IS_BLANK_AT!(buffer, 1)
            || self.flow_level == 0
                && (CHECK!(buffer, '?') || CHECK!(buffer, ':'))
                && !IS_BLANKZ_AT!(buffer, 1)
        {
            return self.fetch_plain_scalar();
        }
        self.set_scanner_error(
            "while scanning for the next token",
            self.mark(),
            "found character that cannot start any token",
        )
    }

    fn stale_simple_keys(&mut self) -> Result<(), ScannerError> {
        let current_mark = self.mark();
        for simple_key in &mut self.simple_keys {
            let mark = simple_key.mark;
            if simple_key.possible
                && (mark.line < current_mark.line || mark.index + 1024 < current_mark.index)
            {
                if simple_key.required {
                    return Err(ScannerError::Problem {
                        context: "while scanning a simple key",
                        context_mark: mark,
                        problem: "could not find expected ':'",
                        problem_mark: current_mark,
                    });
                }
                simple_key.possible = false;
            }
        }
        Ok(())
    }

    fn save_simple_key(&mut self) -> Result<(), ScannerError> {
        let mark = self.mark();
        let required = self.flow_level == 0 && self.indent == mark.column as i64;
        if self.simple_key_allowed {
            let simple_key = SimpleKey {
                possible: true,
                required,
                token_number: self.tokens_parsed + self.tokens.len(),
                mark,
            };
            self.remove_simple_key()?;
            *self.simple_keys.last_mut().unwrap() = simple_key;
            log::debug!("simple key committed at {mark}");
        }
        Ok(())
    }

    fn remove_simple_key(&mut self) -> Result<(), ScannerError> {
        let simple_key = self.simple_keys.last_mut().unwrap();
        if simple_key.possible {
            let mark = simple_key.mark;
            if simple_key.required {
                return Err(ScannerError::Problem {
                    context: "while scanning a simple key",
                    context_mark: mark,
                    problem: "could not find expected ':'",
                    problem_mark: mark,
                });
            }
            log::debug!("simple key discarded at {mark}");
        }
        simple_key.possible = false;
        Ok(())
    }

    fn increase_flow_level(&mut self) {
        self.simple_keys.push(SimpleKey {
            possible: false,
            required: false,
            token_number: 0,
            mark: Mark::default(),
        });
        self.flow_level += 1;
    }

    fn decrease_flow_level(&mut self) {
        if self.flow_level != 0 {
            self.flow_level -= 1;
            let _ = self.simple_keys.pop();
        }
    }

    fn roll_indent(
        &mut self,
        column: i64,
        number: i64,
        data: TokenData,
        mark: Mark,
    ) -> Result<(), ScannerError> {
        if self.flow_level != 0 {
            return Ok(());
        }
        if self.indent < column {
            self.indents.push(self.indent);
            self.indent = column;
            log::debug!("indent pushed to column {column} at {mark}");
            let token = Token {
                data,
                start_mark: mark,
                end_mark: mark,
            };
            if number == -1 {
                self.tokens.push_back(token);
            } else {
                let idx = (number as usize).wrapping_sub(self.tokens_parsed);
                self.tokens.insert(idx, token);
            }
        }
        Ok(())
    }

    fn unroll_indent(&mut self, column: i64) {
        if self.flow_level != 0 {
            return;
        }
        while self.indent > column {
            let mark = self.mark();
            self.tokens.push_back(Token {
                data: TokenData::BlockEnd,
                start_mark: mark,
                end_mark: mark,
            });
            self.indent = self.indents.pop().unwrap();
            log::debug!("indent popped to column {} at {mark}", self.indent);
        }
    }

    fn fetch_stream_start(&mut self) {
        self.simple_keys.push(SimpleKey {
            possible: false,
            required: false,
            token_number: 0,
            mark: Mark::default(),
        });
        self.indent = -1;
        self.simple_key_allowed = true;
        self.stream_start_produced = true;
        let mark = self.mark();
        self.tokens.push_back(Token {
            data: TokenData::StreamStart {
                encoding: self.reader.encoding,
            },
            start_mark: mark,
            end_mark: mark,
        });
    }

    fn fetch_stream_end(&mut self) -> Result<(), ScannerError> {
        if self.mark().column != 0 {
            self.reader.mark.column = 0;
            self.reader.mark.line += 1;
        }
        self.unroll_indent(-1);
        self.remove_simple_key()?;
        self.simple_key_allowed = false;
        let mark = self.mark();
        self.tokens.push_back(Token {
            data: TokenData::StreamEnd,
            start_mark: mark,
            end_mark: mark,
        });
        Ok(())
    }

    fn fetch_directive(&mut self) -> Result<(), ScannerError> {
        if self.json_mode {
            return self.set_scanner_error(
                "while scanning a directive",
                self.mark(),
                "directives are not allowed in JSON mode",
            );
        }
        self.unroll_indent(-1);
        self.remove_simple_key()?;
        self.simple_key_allowed = false;
        let token = self.scan_directive()?;
        self.tokens.push_back(token);
        Ok(())
    }

    fn fetch_document_indicator(&mut self, data: TokenData) -> Result<(), ScannerError> {
        self.unroll_indent(-1);
        self.remove_simple_key()?;
        self.simple_key_allowed = false;
        let start_mark = self.mark();
        self.skip();
        self.skip();
        self.skip();
        let end_mark = self.mark();
        self.tokens.push_back(Token {
            data,
            start_mark,
            end_mark,
        });
        Ok(())
    }

    fn fetch_flow_collection_start(&mut self, data: TokenData) -> Result<(), ScannerError> {
        if self.json_mode && matches!(data, TokenData::FlowMappingStart) {
            // JSON objects are allowed; nothing extra to enforce here beyond
            // flow-only scanning, which this scanner always does in this branch.
        }
        self.save_simple_key()?;
        self.increase_flow_level();
        self.simple_key_allowed = true;
        let start_mark = self.mark();
        self.skip();
        let end_mark = self.mark();
        self.tokens.push_back(Token {
            data,
            start_mark,
            end_mark,
        });
        Ok(())
    }

    fn fetch_flow_collection_end(&mut self, data: TokenData) -> Result<(), ScannerError> {
        self.remove_simple_key()?;
        self.decrease_flow_level();
        self.simple_key_allowed = false;
        let start_mark = self.mark();
        self.skip();
        let end_mark = self.mark();
        self.tokens.push_back(Token {
            data,
            start_mark,
            end_mark,
        });
        Ok(())
    }

    fn fetch_flow_entry(&mut self) -> Result<(), ScannerError> {
        self.remove_simple_key()?;
        self.simple_key_allowed = true;
        let start_mark = self.mark();
        self.skip();
        let end_mark = self.mark();
        self.tokens.push_back(Token {
            data: TokenData::FlowEntry,
            start_mark,
            end_mark,
        });
        Ok(())
    }

    fn fetch_block_entry(&mut self) -> Result<(), ScannerError> {
        if self.json_mode {
            return self.set_scanner_error(
                "while scanning a block entry",
                self.mark(),
                "block sequences are not allowed in JSON mode",
            );
        }
        if self.flow_level == 0 {
            if !self.simple_key_allowed {
                return self.set_scanner_error(
                    "",
                    self.mark(),
                    "block sequence entries are not allowed in this context",
                );
            }
            let column = self.mark().column as i64;
            let mark = self.mark();
            self.roll_indent(column, -1, TokenData::BlockSequenceStart, mark)?;
        }
        self.remove_simple_key()?;
        self.simple_key_allowed = true;
        let start_mark = self.mark();
        self.skip();
        let end_mark = self.mark();
        self.tokens.push_back(Token {
            data: TokenData::BlockEntry,
            start_mark,
            end_mark,
        });
        Ok(())
    }

    fn fetch_key(&mut self) -> Result<(), ScannerError> {
        if self.flow_level == 0 {
            if !self.simple_key_allowed {
                return self.set_scanner_error(
                    "",
                    self.mark(),
                    "mapping keys are not allowed in this context",
                );
            }
            let column = self.mark().column as i64;
            let mark = self.mark();
            self.roll_indent(column, -1, TokenData::BlockMappingStart, mark)?;
        }
        self.remove_simple_key()?;
        self.simple_key_allowed = self.flow_level == 0;
        let start_mark = self.mark();
        self.skip();
        let end_mark = self.mark();
        self.tokens.push_back(Token {
            data: TokenData::Key,
            start_mark,
            end_mark,
        });
        Ok(())
    }

    fn fetch_value(&mut self) -> Result<(), ScannerError> {
        let simple_key = *self.simple_keys.last().unwrap();
        if simple_key.possible {
            let token = Token {
                data: TokenData::Key,
                start_mark: simple_key.mark,
                end_mark: simple_key.mark,
            };
            let idx = simple_key
                .token_number
                .wrapping_sub(self.tokens_parsed);
            self.tokens.insert(idx, token);
            self.simple_keys.last_mut().unwrap().possible = false;
            self.roll_indent(
                simple_key.mark.column as i64,
                simple_key.token_number as i64,
                TokenData::BlockMappingStart,
                simple_key.mark,
            )?;
            self.simple_key_allowed = false;
        } else {
            if self.flow_level == 0 {
                if !self.simple_key_allowed {
                    return self.set_scanner_error(
                        "",
                        self.mark(),
                        "mapping values are not allowed in this context",
                    );
                }
                let column = self.mark().column as i64;
                let mark = self.mark();
                self.roll_indent(column, -1, TokenData::BlockMappingStart, mark)?;
            }
            self.simple_key_allowed = self.flow_level == 0;
        }
        let start_mark = self.mark();
        self.skip();
        let end_mark = self.mark();
        self.tokens.push_back(Token {
            data: TokenData::Value,
            start_mark,
            end_mark,
        });
        Ok(())
    }

    fn fetch_anchor(&mut self, alias: bool) -> Result<(), ScannerError> {
        if self.json_mode {
            return self.set_scanner_error(
                if alias {
                    "while scanning an alias"
                } else {
                    "while scanning an anchor"
                },
                self.mark(),
                "anchors and aliases are not allowed in JSON mode",
            );
        }
        self.save_simple_key()?;
        self.simple_key_allowed = false;
        let token = self.scan_anchor(alias)?;
        self.tokens.push_back(token);
        Ok(())
    }

    fn fetch_tag(&mut self) -> Result<(), ScannerError> {
        if self.json_mode {
            return self.set_scanner_error(
                "while scanning a tag",
                self.mark(),
                "tags are not allowed in JSON mode",
            );
        }
        self.save_simple_key()?;
        self.simple_key_allowed = false;
        let token = self.scan_tag()?;
        self.tokens.push_back(token);
        Ok(())
    }

    fn fetch_block_scalar(&mut self, literal: bool) -> Result<(), ScannerError> {
        self.remove_simple_key()?;
        self.simple_key_allowed = true;
        let token = self.scan_block_scalar(literal)?;
        self.tokens.push_back(token);
        Ok(())
    }

    fn fetch_flow_scalar(&mut self, single: bool) -> Result<(), ScannerError> {
        self.save_simple_key()?;
        self.simple_key_allowed = false;
        let token = self.scan_flow_scalar(single)?;
        self.tokens.push_back(token);
        Ok(())
    }

    fn fetch_plain_scalar(&mut self) -> Result<(), ScannerError> {
        self.save_simple_key()?;
        self.simple_key_allowed = false;
        let token = self.scan_plain_scalar()?;
        self.tokens.push_back(token);
        Ok(())
    }

    fn scan_to_next_token(&mut self) -> Result<(), ScannerError> {
        loop {
            self.cache(1)?;
            if self.mark().column == 0 && IS_BOM!(self.reader.buffer) {
                self.skip();
            }
            self.cache(1)?;
            while CHECK!(self.reader.buffer, ' ')
                || (self.flow_level != 0 || !self.simple_key_allowed)
                    && CHECK!(self.reader.buffer, '\t')
            {
                self.skip();
                self.cache(1)?;
            }
            if CHECK!(self.reader.buffer, '#') {
                while !IS_BREAKZ!(self.reader.buffer) {
                    self.skip();
                    self.cache(1)?;
                }
            }
            if !IS_BREAK!(self.reader.buffer) {
                break;
            }
            self.cache(2)?;
            self.skip_line();
            if self.flow_level == 0 {
                self.simple_key_allowed = true;
            }
        }
        Ok(())
    }

    fn scan_directive(&mut self) -> Result<Token, ScannerError> {
        let start_mark = self.mark();
        self.skip();
        let name = self.scan_directive_name(start_mark)?;
        let mut token;
        if name == "YAML" {
            let (major, minor) = self.scan_version_directive_value(start_mark)?;
            token = Token {
                data: TokenData::VersionDirective { major, minor },
                start_mark,
                end_mark: self.mark(),
            };
        } else if name == "TAG" {
            let (handle, prefix) = self.scan_tag_directive_value(start_mark)?;
            token = Token {
                data: TokenData::TagDirective { handle, prefix },
                start_mark,
                end_mark: self.mark(),
            };
        } else {
            return self.set_scanner_error(
                "while scanning a directive",
                start_mark,
                "found unknown directive name",
            );
        }
        self.cache(1)?;
        while IS_BLANK!(self.reader.buffer) {
            self.skip();
            self.cache(1)?;
        }
        if CHECK!(self.reader.buffer, '#') {
            while !IS_BREAKZ!(self.reader.buffer) {
                self.skip();
                self.cache(1)?;
            }
        }
        if !IS_BREAKZ!(self.reader.buffer) {
            return self.set_scanner_error(
                "while scanning a directive",
                start_mark,
                "did not find expected comment or line break",
            );
        }
        if IS_BREAK!(self.reader.buffer) {
            self.cache(2)?;
            self.skip_line();
        }
        token.end_mark = self.mark();
        Ok(token)
    }

    fn scan_directive_name(&mut self, start_mark: Mark) -> Result<String, ScannerError> {
        let mut string = String::new();
        self.cache(1)?;
        while IS_ALPHA!(self.reader.buffer) {
            self.read_string(&mut string);
            self.cache(1)?;
        }
        if string.is_empty() {
            self.set_scanner_error(
                "while scanning a directive",
                start_mark,
                "could not find expected directive name",
            )
        } else if !IS_BLANKZ!(self.reader.buffer) {
            self.set_scanner_error(
                "while scanning a directive",
                start_mark,
                "found unexpected non-alphabetical character",
            )
        } else {
            Ok(string)
        }
    }

    fn scan_version_directive_value(
        &mut self,
        start_mark: Mark,
    ) -> Result<(i32, i32), ScannerError> {
        self.cache(1)?;
        while IS_BLANK!(self.reader.buffer) {
            self.skip();
            self.cache(1)?;
        }
        let major = self.scan_version_directive_number(start_mark)?;
        if !CHECK!(self.reader.buffer, '.') {
            return self.set_scanner_error(
                "while scanning a %YAML directive",
                start_mark,
                "did not find expected digit or '.' character",
            );
        }
        self.skip();
        let minor = self.scan_version_directive_number(start_mark)?;
        Ok((major, minor))
    }

    fn scan_version_directive_number(&mut self, start_mark: Mark) -> Result<i32, ScannerError> {
        let mut value: i32 = 0;
        let mut length = 0;
        self.cache(1)?;
        while IS_DIGIT!(self.reader.buffer) {
            length += 1;
            if length > MAX_NUMBER_LENGTH {
                return self.set_scanner_error(
                    "while scanning a %YAML directive",
                    start_mark,
                    "found extremely long version number",
                );
            }
            value = value * 10 + AS_DIGIT!(self.reader.buffer) as i32;
            self.skip();
            self.cache(1)?;
        }
        if length == 0 {
            return self.set_scanner_error(
                "while scanning a %YAML directive",
                start_mark,
                "did not find expected version number",
            );
        }
        Ok(value)
    }

    fn scan_tag_directive_value(
        &mut self,
        start_mark: Mark,
    ) -> Result<(String, String), ScannerError> {
        self.cache(1)?;
        loop {
            if IS_BLANK!(self.reader.buffer) {
                self.skip();
                self.cache(1)?;
            } else {
                let handle = self.scan_tag_handle(true, start_mark)?;
                self.cache(1)?;
                if !IS_BLANK!(self.reader.buffer) {
                    return self.set_scanner_error(
                        "while scanning a %TAG directive",
                        start_mark,
                        "did not find expected whitespace",
                    );
                }
                while IS_BLANK!(self.reader.buffer) {
                    self.skip();
                    self.cache(1)?;
                }
                let prefix = self.scan_tag_uri(true, true, None, start_mark)?;
                self.cache(1)?;
                if !IS_BLANKZ!(self.reader.buffer) {
                    return self.set_scanner_error(
                        "while scanning a %TAG directive",
                        start_mark,
                        "did not find expected whitespace or line break",
                    );
                }
                return Ok((handle, prefix));
            }
        }
    }

    fn scan_anchor(&mut self, alias: bool) -> Result<Token, ScannerError> {
        let mut length = 0;
        let mut string = String::new();
        let start_mark = self.mark();
        self.skip();
        self.cache(1)?;
        while IS_ALPHA!(self.reader.buffer) {
            self.read_string(&mut string);
            self.cache(1)?;
            length += 1;
        }
        let end_mark = self.mark();
        let buffer = &self.reader.buffer;
        if length == 0
            || !(IS_BLANKZ!(buffer)
                || CHECK!(buffer, '?')
                || CHECK!(buffer, ':')
                || CHECK!(buffer, ',')
                || CHECK!(buffer, ']')
                || CHECK!(buffer, '}')
                || CHECK!(buffer, '%')
                || CHECK!(buffer, '@')
                || CHECK!(buffer, '`'))
        {
            self.set_scanner_error(
                if alias {
                    "while scanning an alias"
                } else {
                    "while scanning an anchor"
                },
                start_mark,
                "did not find expected alphabetic or numeric character",
            )
        } else {
            Ok(Token {
                data: if alias {
                    TokenData::Alias { value: string }
                } else {
                    TokenData::Anchor { value: string }
                },
                start_mark,
                end_mark,
            })
        }
    }

    fn scan_tag(&mut self) -> Result<Token, ScannerError> {
        let start_mark = self.mark();
        let mut handle;
        let suffix;
        self.cache(2)?;
        if CHECK_AT!(self.reader.buffer, '<', 1) {
            handle = String::new();
            self.skip();
            self.skip();
            suffix = self.scan_tag_uri(true, false, None, start_mark)?;
            if !CHECK!(self.reader.buffer, '>') {
                return self.set_scanner_error(
                    "while scanning a tag",
                    start_mark,
                    "did not find the expected '>'",
                );
            }
            self.skip();
        } else {
            handle = self.scan_tag_handle(false, start_mark)?;
            if handle.starts_with('!') && handle.len() > 1 && handle.ends_with('!') {
                suffix = self.scan_tag_uri(false, false, None, start_mark)?;
            } else {
                let mut tag_suffix = self.scan_tag_uri(false, false, Some(&handle), start_mark)?;
                handle = String::from("!");
                if tag_suffix.is_empty() {
                    std::mem::swap(&mut handle, &mut tag_suffix);
                }
                suffix = tag_suffix;
            }
        }
        self.cache(1)?;
        if !IS_BLANKZ!(self.reader.buffer) && !(self.flow_level != 0 && CHECK!(self.reader.buffer, ',')) {
            return self.set_scanner_error(
                "while scanning a tag",
                start_mark,
                "did not find expected whitespace or line break",
            );
        }
        let end_mark = self.mark();
        Ok(Token {
            data: TokenData::Tag { handle, suffix },
            start_mark,
            end_mark,
        })
    }

    fn scan_tag_handle(&mut self, directive: bool, start_mark: Mark) -> Result<String, ScannerError> {
        let mut string = String::new();
        self.cache(1)?;
        if !CHECK!(self.reader.buffer, '!') {
            return self.set_scanner_error(
                if directive {
                    "while scanning a tag directive"
                } else {
                    "while scanning a tag"
                },
                start_mark,
                "did not find expected '!'",
            );
        }
        self.read_string(&mut string);
        self.cache(1)?;
        while IS_ALPHA!(self.reader.buffer) {
            self.read_string(&mut string);
            self.cache(1)?;
        }
        if CHECK!(self.reader.buffer, '!') {
            self.read_string(&mut string);
        } else if directive && string != "!" {
            return self.set_scanner_error(
                "while parsing a tag directive",
                start_mark,
                "did not find expected '!'",
            );
        }
        Ok(string)
    }

    fn scan_tag_uri(
        &mut self,
        uri_char: bool,
        directive: bool,
        head: Option<&str>,
        start_mark: Mark,
    ) -> Result<String, ScannerError> {
        let head = head.unwrap_or("");
        let mut length = head.len();
        let mut string = String::new();
        if length > 1 {
            string = String::from(&head[1..]);
        }
        self.cache(1)?;
        loop {
            let buffer = &self.reader.buffer;
            let matches = IS_ALPHA!(buffer)
                || CHECK!(buffer, ';')
                || CHECK!(buffer, '/')
                || CHECK!(buffer, '?')
                || CHECK!(buffer, ':')
                || CHECK!(buffer, '@')
                || CHECK!(buffer, '&')
                || CHECK!(buffer, '=')
                || CHECK!(buffer, '+')
                || CHECK!(buffer, '$')
                || CHECK!(buffer, '.')
                || CHECK!(buffer, '%')
                || CHECK!(buffer, '!')
                || CHECK!(buffer, '~')
                || CHECK!(buffer, '*')
                || CHECK!(buffer, '\'')
                || CHECK!(buffer, '(')
                || CHECK!(buffer, ')')
                || uri_char
                    && (CHECK!(buffer, ',') || CHECK!(buffer, '[') || CHECK!(buffer, ']'));
            if !matches {
                break;
            }
            if CHECK!(self.reader.buffer, '%') {
                self.scan_uri_escapes(directive, start_mark, &mut string)?;
            } else {
                self.read_string(&mut string);
            }
            length += 1;
            self.cache(1)?;
        }
        if length == 0 {
            self.set_scanner_error(
                if directive {
                    "while parsing a %TAG directive"
                } else {
                    "while parsing a tag"
                },
                start_mark,
                "did not find expected tag URI",
            )
        } else {
            Ok(string)
        }
    }

    fn scan_uri_escapes(
        &mut self,
        directive: bool,
        start_mark: Mark,
        string: &mut String,
    ) -> Result<(), ScannerError> {
        let mut width = 0;
        loop {
            self.cache(3)?;
            let buffer = &self.reader.buffer;
            if !(CHECK!(buffer, '%') && IS_HEX_AT!(buffer, 1) && IS_HEX_AT!(buffer, 2)) {
                return self.set_scanner_error(
                    if directive {
                        "while parsing a %TAG directive"
                    } else {
                        "while parsing a tag"
                    },
                    start_mark,
                    "did not find URI escaped octet",
                );
            }
            let octet = ((AS_HEX_AT!(buffer, 1) << 4) + AS_HEX_AT!(buffer, 2)) as u8;
            if width == 0 {
                width = if octet & 0x80 == 0 {
                    1
                } else if octet & 0xE0 == 0xC0 {
                    2
                } else if octet & 0xF0 == 0xE0 {
                    3
                } else if octet & 0xF8 == 0xF0 {
                    4
                } else {
                    0
                };
                if width == 0 {
                    return self.set_scanner_error(
                        if directive {
                            "while parsing a %TAG directive"
                        } else {
                            "while parsing a tag"
                        },
                        start_mark,
                        "found an incorrect leading UTF-8 octet",
                    );
                }
            } else if octet & 0xC0 != 0x80 {
                return self.set_scanner_error(
                    if directive {
                        "while parsing a %TAG directive"
                    } else {
                        "while parsing a tag"
                    },
                    start_mark,
                    "found an incorrect trailing UTF-8 octet",
                );
            }
            string.push(char::from_u32(octet as u32).expect("octet fits in a char"));
            self.skip();
            self.skip();
            self.skip();
            width -= 1;
            if width == 0 {
                break;
            }
        }
        Ok(())
    }

    fn scan_block_scalar(&mut self, literal: bool) -> Result<Token, ScannerError> {
        let mut string = String::new();
        let mut leading_break = String::new();
        let mut trailing_breaks = String::new();
        let mut chomping: i32 = 0;
        let mut increment: i64 = 0;
        let mut indent: i64 = 0;
        let mut leading_blank = false;
        let start_mark = self.mark();
        self.skip();
        self.cache(1)?;

        if CHECK!(self.reader.buffer, '+') || CHECK!(self.reader.buffer, '-') {
            chomping = if CHECK!(self.reader.buffer, '+') { 1 } else { -1 };
            self.skip();
            self.cache(1)?;
            if IS_DIGIT!(self.reader.buffer) {
                if CHECK!(self.reader.buffer, '0') {
                    return self.set_scanner_error(
                        "while scanning a block scalar",
                        start_mark,
                        "found an indentation indicator equal to 0",
                    );
                }
                increment = AS_DIGIT!(self.reader.buffer) as i64;
                self.skip();
            }
        } else if IS_DIGIT!(self.reader.buffer) {
            if CHECK!(self.reader.buffer, '0') {
                return self.set_scanner_error(
                    "while scanning a block scalar",
                    start_mark,
                    "found an indentation indicator equal to 0",
                );
            }
            increment = AS_DIGIT!(self.reader.buffer) as i64;
            self.skip();
            self.cache(1)?;
            if CHECK!(self.reader.buffer, '+') || CHECK!(self.reader.buffer, '-') {
                chomping = if CHECK!(self.reader.buffer, '+') { 1 } else { -1 };
                self.skip();
            }
        }

        self.cache(1)?;
        while IS_BLANK!(self.reader.buffer) {
            self.skip();
            self.cache(1)?;
        }
        if CHECK!(self.reader.buffer, '#') {
            while !IS_BREAKZ!(self.reader.buffer) {
                self.skip();
                self.cache(1)?;
            }
        }
        if !IS_BREAKZ!(self.reader.buffer) {
            return self.set_scanner_error(
                "while scanning a block scalar",
                start_mark,
                "did not find expected comment or line break",
            );
        }
        if IS_BREAK!(self.reader.buffer) {
            self.cache(2)?;
            self.skip_line();
        }

        let mut end_mark = self.mark();
        if increment != 0 {
            indent = if self.indent >= 0 {
                self.indent + increment
            } else {
                increment
            };
        }
        self.scan_block_scalar_breaks(&mut indent, &mut trailing_breaks, start_mark, &mut end_mark)?;

        self.cache(1)?;
        loop {
            if !(self.mark().column as i64 == indent && !IS_Z!(self.reader.buffer)) {
                break;
            }
            let trailing_blank = IS_BLANK!(self.reader.buffer);
            if !literal && leading_break.starts_with('\n') && !leading_blank && !trailing_blank {
                if trailing_breaks.is_empty() {
                    string.push(' ');
                }
                leading_break.clear();
            } else {
                string.push_str(&leading_break);
                leading_break.clear();
            }
            string.push_str(&trailing_breaks);
            trailing_breaks.clear();
            leading_blank = IS_BLANK!(self.reader.buffer);
            while !IS_BREAKZ!(self.reader.buffer) {
                self.read_string(&mut string);
                self.cache(1)?;
            }
            self.cache(2)?;
            self.read_line_string(&mut leading_break);
            self.scan_block_scalar_breaks(
                &mut indent,
                &mut trailing_breaks,
                start_mark,
                &mut end_mark,
            )?;
        }

        if chomping != -1 {
            string.push_str(&leading_break);
        }
        if chomping == 1 {
            string.push_str(&trailing_breaks);
        }

        Ok(Token {
            data: TokenData::Scalar {
                value: string,
                style: if literal {
                    crate::ScalarStyle::Literal
                } else {
                    crate::ScalarStyle::Folded
                },
            },
            start_mark,
            end_mark,
        })
    }

    fn scan_block_scalar_breaks(
        &mut self,
        indent: &mut i64,
        breaks: &mut String,
        start_mark: Mark,
        end_mark: &mut Mark,
    ) -> Result<(), ScannerError> {
        let mut max_indent = 0;
        *end_mark = self.mark();
        loop {
            self.cache(1)?;
            while (*indent == 0 || (self.mark().column as i64) < *indent) && IS_SPACE!(self.reader.buffer)
            {
                self.skip();
                self.cache(1)?;
            }
            if self.mark().column as i64 > max_indent {
                max_indent = self.mark().column as i64;
            }
            if (*indent == 0 || (self.mark().column as i64) < *indent) && IS_TAB!(self.reader.buffer) {
                return self.set_scanner_error(
                    "while scanning a block scalar",
                    start_mark,
                    "found a tab character where an indentation space is expected",
                );
            }
            if !IS_BREAK!(self.reader.buffer) {
                break;
            }
            self.cache(2)?;
            self.read_line_string(breaks);
            *end_mark = self.mark();
        }
        if *indent == 0 {
            *indent = max_indent;
            if *indent < self.indent + 1 {
                *indent = self.indent + 1;
            }
            if *indent < 1 {
                *indent = 1;
            }
        }
        Ok(())
    }

    fn scan_flow_scalar(&mut self, single: bool) -> Result<Token, ScannerError> {
        let mut string = String::new();
        let mut leading_break = String::new();
        let mut trailing_breaks = String::new();
        let mut whitespaces = String::new();
        let mut leading_blanks;
        let start_mark = self.mark();
        self.skip();
        loop {
            self.cache(4)?;
            let buffer = &self.reader.buffer;
            if self.mark().column == 0
                && (CHECK_AT!(buffer, '-', 0) && CHECK_AT!(buffer, '-', 1) && CHECK_AT!(buffer, '-', 2)
                    || CHECK_AT!(buffer, '.', 0)
                        && CHECK_AT!(buffer, '.', 1)
                        && CHECK_AT!(buffer, '.', 2))
                && IS_BLANKZ_AT!(buffer, 3)
            {
                return self.set_scanner_error(
                    "while scanning a quoted scalar",
                    start_mark,
                    "found unexpected document indicator",
                );
            }
            if IS_Z!(self.reader.buffer) {
                return self.set_scanner_error(
                    "while scanning a quoted scalar",
                    start_mark,
                    "found unexpected end of stream",
                );
            }
            self.cache(2)?;
            leading_blanks = false;
            while !IS_BLANKZ!(self.reader.buffer) {
                if single
                    && CHECK_AT!(self.reader.buffer, '\'', 0)
                    && CHECK_AT!(self.reader.buffer, '\'', 1)
                {
                    string.push('\'');
                    self.skip();
                    self.skip();
                } else {
                    if CHECK!(self.reader.buffer, if single { '\'' } else { '"' }) {
                        break;
                    }
                    if !single && CHECK!(self.reader.buffer, '\\') && IS_BREAK_AT!(self.reader.buffer, 1)
                    {
                        self.cache(3)?;
                        self.skip();
                        self.skip_line();
                        leading_blanks = true;
                        break;
                    } else if !single && CHECK!(self.reader.buffer, '\\') {
                        let mut code_length: usize = 0;
                        match self.reader.buffer.get(1).copied().unwrap() {
                            '0' => string.push('\0'),
                            'a' => string.push('\x07'),
                            'b' => string.push('\x08'),
                            't' | '\t' => string.push('\t'),
                            'n' => string.push('\n'),
                            'v' => string.push('\x0B'),
                            'f' => string.push('\x0C'),
                            'r' => string.push('\r'),
                            'e' => string.push('\x1B'),
                            ' ' => string.push(' '),
                            '"' => string.push('"'),
                            '/' => string.push('/'),
                            '\\' => string.push('\\'),
                            'N' => string.push('\u{0085}'),
                            '_' => string.push('\u{00a0}'),
                            'L' => string.push('\u{2028}'),
                            'P' => string.push('\u{2029}'),
                            'x' => code_length = 2,
                            'u' => code_length = 4,
                            'U' => code_length = 8,
                            _ => {
                                return self.set_scanner_error(
                                    "while parsing a quoted scalar",
                                    start_mark,
                                    "found unknown escape character",
                                );
                            }
                        }
                        self.skip();
                        self.skip();
                        if code_length != 0 {
                            let mut value: u32 = 0;
                            self.cache(code_length)?;
                            for k in 0..code_length {
                                if !IS_HEX_AT!(self.reader.buffer, k) {
                                    return self.set_scanner_error(
                                        "while parsing a quoted scalar",
                                        start_mark,
                                        "did not find expected hexdecimal number",
                                    );
                                }
                                value = (value << 4) + AS_HEX_AT!(self.reader.buffer, k);
                            }
                            if let Some(ch) = char::from_u32(value) {
                                string.push(ch);
                            } else {
                                return self.set_scanner_error(
                                    "while parsing a quoted scalar",
                                    start_mark,
                                    "found invalid Unicode character escape code",
                                );
                            }
                            for _ in 0..code_length {
                                self.skip();
                            }
                        }
                    } else {
                        self.read_string(&mut string);
                    }
                }
                self.cache(2)?;
            }
            self.cache(1)?;
            if CHECK!(self.reader.buffer, if single { '\'' } else { '"' }) {
                break;
            }
            self.cache(1)?;
            while IS_BLANK!(self.reader.buffer) || IS_BREAK!(self.reader.buffer) {
                if IS_BLANK!(self.reader.buffer) {
                    if !leading_blanks {
                        self.read_string(&mut whitespaces);
                    } else {
                        self.skip();
                    }
                } else {
                    self.cache(2)?;
                    if !leading_blanks {
                        whitespaces.clear();
                        self.read_line_string(&mut leading_break);
                        leading_blanks = true;
                    } else {
                        self.read_line_string(&mut trailing_breaks);
                    }
                }
                self.cache(1)?;
            }
            if leading_blanks {
                if leading_break.starts_with('\n') {
                    if trailing_breaks.is_empty() {
                        string.push(' ');
                    } else {
                        string.push_str(&trailing_breaks);
                        trailing_breaks.clear();
                    }
                    leading_break.clear();
                } else {
                    string.push_str(&leading_break);
                    string.push_str(&trailing_breaks);
                    leading_break.clear();
                    trailing_breaks.clear();
                }
            } else {
                string.push_str(&whitespaces);
                whitespaces.clear();
            }
        }

        self.skip();
        let end_mark = self.mark();
        Ok(Token {
            data: TokenData::Scalar {
                value: string,
                style: if single {
                    crate::ScalarStyle::SingleQuoted
                } else {
                    crate::ScalarStyle::DoubleQuoted
                },
            },
            start_mark,
            end_mark,
        })
    }

    fn scan_plain_scalar(&mut self) -> Result<Token, ScannerError> {
        let mut string = String::new();
        let mut leading_break = String::new();
        let mut trailing_breaks = String::new();
        let mut whitespaces = String::new();
        let mut leading_blanks = false;
        let indent = self.indent + 1;
        let mut end_mark = self.mark();
        let start_mark = end_mark;
        loop {
            self.cache(4)?;
            let buffer = &self.reader.buffer;
            if self.mark().column == 0
                && (CHECK_AT!(buffer, '-', 0) && CHECK_AT!(buffer, '-', 1) && CHECK_AT!(buffer, '-', 2)
                    || CHECK_AT!(buffer, '.', 0)
                        && CHECK_AT!(buffer, '.', 1)
                        && CHECK_AT!(buffer, '.', 2))
                && IS_BLANKZ_AT!(buffer, 3)
            {
                break;
            }
            if CHECK!(buffer, '#') {
                break;
            }
            while !IS_BLANKZ!(self.reader.buffer) {
                if self.flow_level != 0
                    && CHECK!(self.reader.buffer, ':')
                    && (CHECK_AT!(self.reader.buffer, ',', 1)
                        || CHECK_AT!(self.reader.buffer, '?', 1)
                        || CHECK_AT!(self.reader.buffer, '[', 1)
                        || CHECK_AT!(self.reader.buffer, ']', 1)
                        || CHECK_AT!(self.reader.buffer, '{', 1)
                        || CHECK_AT!(self.reader.buffer, '}', 1))
                {
                    return self.set_scanner_error(
                        "while scanning a plain scalar",
                        start_mark,
                        "found unexpected ':'",
                    );
                }
                if CHECK!(self.reader.buffer, ':') && IS_BLANKZ_AT!(self.reader.buffer, 1)
                    || self.flow_level != 0
                        && (CHECK!(self.reader.buffer, ',')
                            || CHECK!(self.reader.buffer, '[')
                            || CHECK!(self.reader.buffer, ']')
                            || CHECK!(self.reader.buffer, '{')
                            || CHECK!(self.reader.buffer, '}'))
                {
                    break;
                }
                if leading_blanks || !whitespaces.is_empty() {
                    if leading_blanks {
                        if leading_break.starts_with('\n') {
                            if trailing_breaks.is_empty() {
                                string.push(' ');
                            } else {
                                string.push_str(&trailing_breaks);
                                trailing_breaks.clear();
                            }
                            leading_break.clear();
                        } else {
                            string.push_str(&leading_break);
                            string.push_str(&trailing_breaks);
                            leading_break.clear();
                            trailing_breaks.clear();
                        }
                        leading_blanks = false;
                    } else {
                        string.push_str(&whitespaces);
                        whitespaces.clear();
                    }
                }
                self.read_string(&mut string);
                end_mark = self.mark();
                self.cache(2)?;
            }
            if !(IS_BLANK!(self.reader.buffer) || IS_BREAK!(self.reader.buffer)) {
                break;
            }
            self.cache(1)?;
            while IS_BLANK!(self.reader.buffer) || IS_BREAK!(self.reader.buffer) {
                if IS_BLANK!(self.reader.buffer) {
                    if leading_blanks
                        && (self.mark().column as i64) < indent
                        && IS_TAB!(self.reader.buffer)
                    {
                        return self.set_scanner_error(
                            "while scanning a plain scalar",
                            start_mark,
                            "found a tab character that violates indentation",
                        );
                    } else if !leading_blanks {
                        self.read_string(&mut whitespaces);
                    } else {
                        self.skip();
                    }
                } else {
                    self.cache(2)?;
                    if !leading_blanks {
                        whitespaces.clear();
                        self.read_line_string(&mut leading_break);
                        leading_blanks = true;
                    } else {
                        self.read_line_string(&mut trailing_breaks);
                    }
                }
                self.cache(1)?;
            }
            if self.flow_level == 0 && (self.mark().column as i64) < indent {
                break;
            }
        }

        if leading_blanks {
            self.simple_key_allowed = true;
        }

        Ok(Token {
            data: TokenData::Scalar {
                value: string,
                style: crate::ScalarStyle::Plain,
            },
            start_mark,
            end_mark,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan_all(input: &mut &[u8]) -> Vec<TokenData> {
        let mut scanner = Scanner::new();
        scanner.set_input_string(input);
        let mut out = Vec::new();
        loop {
            let token = scanner.scan().unwrap();
            let is_end = matches!(token.data, TokenData::StreamEnd);
            out.push(token.data);
            if is_end {
                break;
            }
        }
        out
    }

    #[test]
    fn scans_stream_start_and_end() {
        let mut input: &[u8] = b"";
        let tokens = scan_all(&mut input);
        assert!(matches!(tokens[0], TokenData::StreamStart { .. }));
        assert!(matches!(tokens.last().unwrap(), TokenData::StreamEnd));
    }

    #[test]
    fn scans_plain_scalar() {
        let mut input: &[u8] = b"hello";
        let tokens = scan_all(&mut input);
        assert!(tokens.iter().any(
            |t| matches!(t, TokenData::Scalar { value, .. } if value == "hello")
        ));
    }

    #[test]
    fn scans_flow_sequence() {
        let mut input: &[u8] = b"[1, 2, 3]";
        let tokens = scan_all(&mut input);
        assert!(tokens
            .iter()
            .any(|t| matches!(t, TokenData::FlowSequenceStart)));
        assert!(tokens
            .iter()
            .any(|t| matches!(t, TokenData::FlowSequenceEnd)));
    }

    #[test]
    fn rejects_tag_in_json_mode() {
        let mut input: &[u8] = b"!!str foo";
        let mut scanner = Scanner::new();
        scanner.set_input_string(&mut input);
        scanner.set_json_mode(true);
        let mut saw_error = false;
        loop {
            match scanner.scan() {
                Ok(token) => {
                    if matches!(token.data, TokenData::StreamEnd) {
                        break;
                    }
                }
                Err(_) => {
                    saw_error = true;
                    break;
                }
            }
        }
        assert!(saw_error);
    }
}
