// Copyright (c) The phpunit-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Building test suites out of a PHP token stream.
//!
//! The parser only tracks what test discovery needs: namespaces, class declarations and their
//! bodies, and the methods and docblocks inside them. Everything else is skipped by balancing
//! braces.

use super::{
    CaseId, LineRange, SuiteId, TestCase, TestSuite,
    lexer::{Token, TokenKind, tokenize},
};
use crate::errors::{DiscoveryParseError, DiscoveryParseErrorKind};
use camino::Utf8Path;
use itertools::Itertools;
use regex::Regex;
use std::{
    collections::BTreeMap,
    mem,
    sync::{Arc, LazyLock},
};
use tracing::debug;

static DOC_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^@([A-Za-z]+)(?:\s+(.+))?$").unwrap());

/// Parses PHP source text into the test suites it declares.
///
/// Returns `None` if the text declares no test classes, which marks the file as not being a test
/// file. Syntax errors are logged and also produce `None`.
pub fn parse(source: &str, fs_path: &Utf8Path) -> Option<Vec<Arc<TestSuite>>> {
    match try_parse(source, fs_path) {
        Ok(suites) if suites.is_empty() => None,
        Ok(suites) => Some(suites),
        Err(error) => {
            debug!("skipping `{fs_path}` for test discovery: {error}");
            None
        }
    }
}

/// Parses PHP source text into the test suites it declares, returning syntax errors.
///
/// Unlike [`parse`], a file without test classes produces an empty list.
pub fn try_parse(
    source: &str,
    fs_path: &Utf8Path,
) -> Result<Vec<Arc<TestSuite>>, DiscoveryParseError> {
    let tokens = tokenize(source)?;
    DeclParser::new(&tokens, fs_path).parse_file()
}

/// Modifiers, attributes and the docblock that precede a declaration.
#[derive(Debug, Default)]
struct PendingDecl<'a> {
    start: Option<u32>,
    doc: Option<&'a str>,
    is_abstract: bool,
    is_hidden: bool,
    annotations: BTreeMap<String, Vec<String>>,
}

impl PendingDecl<'_> {
    fn mark_start(&mut self, line: u32) {
        self.start.get_or_insert(line);
    }
}

#[derive(Debug)]
struct MethodDecl<'a> {
    name: &'a str,
    range: LineRange,
    is_abstract: bool,
    is_hidden: bool,
    annotations: BTreeMap<String, Vec<String>>,
}

impl MethodDecl<'_> {
    fn is_test(&self) -> bool {
        !self.is_abstract
            && !self.is_hidden
            && (self.name.starts_with("test") || self.annotations.contains_key("test"))
    }
}

struct DeclParser<'a, 't> {
    tokens: &'t [Token<'a>],
    pos: usize,
    fs_path: &'t Utf8Path,
    namespace: String,
}

impl<'a, 't> DeclParser<'a, 't> {
    fn new(tokens: &'t [Token<'a>], fs_path: &'t Utf8Path) -> Self {
        Self {
            tokens,
            pos: 0,
            fs_path,
            namespace: String::new(),
        }
    }

    fn parse_file(mut self) -> Result<Vec<Arc<TestSuite>>, DiscoveryParseError> {
        let mut suites = Vec::new();
        let mut decl = PendingDecl::default();

        while let Some(token) = self.bump() {
            let kind = token.kind;
            match kind {
                TokenKind::DocComment(text) => decl.doc = Some(text),
                TokenKind::AttributeOpen => {
                    decl.mark_start(token.line);
                    self.parse_attribute_group(&mut decl.annotations);
                }
                _ if kind.is_keyword("abstract") => {
                    decl.mark_start(token.line);
                    decl.is_abstract = true;
                }
                _ if kind.is_keyword("final") || kind.is_keyword("readonly") => {
                    decl.mark_start(token.line);
                }
                _ if kind.is_keyword("namespace") && !self.follows_member_access() => {
                    self.parse_namespace()?;
                    decl = PendingDecl::default();
                }
                _ if kind.is_keyword("class") && !self.follows_member_access() => {
                    let decl = mem::take(&mut decl);
                    if self.previous().is_some_and(|prev| prev.is_keyword("new")) {
                        // Anonymous classes can't be addressed by the runner.
                        continue;
                    }
                    if let Some(suite) = self.parse_class(decl, token.line)? {
                        suites.push(Arc::new(suite));
                    }
                }
                _ if ["interface", "trait", "enum"]
                    .iter()
                    .any(|keyword| kind.is_keyword(keyword))
                    && !self.follows_member_access() =>
                {
                    self.skip_declaration_body();
                    decl = PendingDecl::default();
                }
                _ => decl = PendingDecl::default(),
            }
        }

        Ok(suites)
    }

    fn parse_namespace(&mut self) -> Result<(), DiscoveryParseError> {
        match self.bump().map(|token| token.kind) {
            Some(TokenKind::Name(name)) => {
                self.namespace = name.trim_start_matches('\\').to_owned();
                // Either `;` or the `{` of a braced namespace. The braced body is scanned like the
                // rest of the file.
                self.bump();
                Ok(())
            }
            Some(TokenKind::Punct('{')) => {
                self.namespace.clear();
                Ok(())
            }
            _ => Err(self.error("namespace name")),
        }
    }

    fn parse_class(
        &mut self,
        decl: PendingDecl<'a>,
        class_line: u32,
    ) -> Result<Option<TestSuite>, DiscoveryParseError> {
        let name = self.expect_name("class name")?;
        let mut base = None;
        if self.eat_keyword("extends") {
            base = Some(self.expect_name("base class name")?);
        }
        if self.eat_keyword("implements") {
            loop {
                self.expect_name("interface name")?;
                if !self.eat_punct(',') {
                    break;
                }
            }
        }
        self.expect_punct('{', "class body")?;

        let (methods, end) = self.parse_class_body()?;

        let is_test_class = !decl.is_abstract
            && (name.ends_with("Test")
                || base.is_some_and(|base| last_segment(base).ends_with("TestCase")));
        if !is_test_class {
            return Ok(None);
        }

        let id = qualify(&self.namespace, name);
        let suite_id = SuiteId::new(id.as_str());
        let children = methods
            .into_iter()
            .unique_by(|method| method.name)
            .filter(MethodDecl::is_test)
            .enumerate()
            .map(|(sort_index, method)| {
                Arc::new(TestCase {
                    id: CaseId::new(method.name),
                    suite_id: suite_id.clone(),
                    method: method.name.to_owned(),
                    fs_path: self.fs_path.to_owned(),
                    range: method.range,
                    sort_index,
                    annotations: method.annotations,
                })
            })
            .collect();

        Ok(Some(TestSuite {
            id: suite_id,
            qualified_class: id,
            fs_path: self.fs_path.to_owned(),
            range: LineRange {
                start: decl.start.unwrap_or(class_line),
                end,
            },
            children,
        }))
    }

    /// Parses members up to and including the closing `}` of a class body, returning the methods
    /// and the line of the closing brace.
    fn parse_class_body(&mut self) -> Result<(Vec<MethodDecl<'a>>, u32), DiscoveryParseError> {
        let mut methods = Vec::new();
        let mut member = PendingDecl::default();

        loop {
            let Some(token) = self.bump() else {
                return Err(self.error("`}`"));
            };
            let kind = token.kind;
            match kind {
                TokenKind::Punct('}') => return Ok((methods, token.line)),
                TokenKind::DocComment(text) => member.doc = Some(text),
                TokenKind::AttributeOpen => {
                    member.mark_start(token.line);
                    self.parse_attribute_group(&mut member.annotations);
                }
                _ if kind.is_keyword("abstract") => {
                    member.mark_start(token.line);
                    member.is_abstract = true;
                }
                _ if kind.is_keyword("private") || kind.is_keyword("protected") => {
                    member.mark_start(token.line);
                    member.is_hidden = true;
                }
                _ if ["public", "static", "final", "readonly", "var"]
                    .iter()
                    .any(|keyword| kind.is_keyword(keyword)) =>
                {
                    member.mark_start(token.line);
                }
                _ if kind.is_keyword("function") => {
                    member.mark_start(token.line);
                    let method = self.parse_method(mem::take(&mut member))?;
                    methods.push(method);
                }
                _ => {
                    self.skip_statement(token);
                    member = PendingDecl::default();
                }
            }
        }
    }

    fn parse_method(
        &mut self,
        mut member: PendingDecl<'a>,
    ) -> Result<MethodDecl<'a>, DiscoveryParseError> {
        self.eat_punct('&');
        let name = self.expect_name("method name")?;
        self.expect_punct('(', "parameter list")?;
        self.skip_balanced();

        // Skip the return type, then the body (or the `;` of an abstract method).
        let end = loop {
            let Some(token) = self.bump() else {
                return Err(self.error("method body"));
            };
            match token.kind {
                TokenKind::Punct('{') => break self.skip_balanced(),
                TokenKind::Punct(';') => break token.line,
                TokenKind::Punct('(' | '[') | TokenKind::AttributeOpen => {
                    self.skip_balanced();
                }
                TokenKind::Punct('}') => {
                    return Err(DiscoveryParseError {
                        line: token.line,
                        kind: DiscoveryParseErrorKind::UnexpectedToken {
                            expected: "method body",
                        },
                    });
                }
                _ => {}
            }
        };

        if let Some(doc) = member.doc {
            parse_doc_tags(doc, &mut member.annotations);
        }
        let start = member.start.unwrap_or(end);

        Ok(MethodDecl {
            name,
            range: LineRange { start, end },
            is_abstract: member.is_abstract,
            is_hidden: member.is_hidden,
            annotations: member.annotations,
        })
    }

    /// Parses the rest of an attribute group after its `#[`, recording recognized attributes.
    fn parse_attribute_group(&mut self, annotations: &mut BTreeMap<String, Vec<String>>) {
        while let Some(token) = self.bump() {
            match token.kind {
                TokenKind::Punct(']') => return,
                TokenKind::Name(name) => {
                    let args = if self.eat_punct('(') {
                        self.attribute_args()
                    } else {
                        Vec::new()
                    };
                    if let Some(tag) = annotation_tag(last_segment(name)) {
                        annotations.entry(tag.to_owned()).or_default().extend(args);
                    }
                }
                TokenKind::Punct('(' | '[' | '{') | TokenKind::AttributeOpen => {
                    self.skip_balanced();
                }
                _ => {}
            }
        }
    }

    /// Collects the literal arguments of an attribute, consuming the closing `)`.
    fn attribute_args(&mut self) -> Vec<String> {
        let mut depth = 1;
        let mut args = Vec::new();
        while let Some(token) = self.bump() {
            match token.kind {
                TokenKind::Punct('(' | '[' | '{') | TokenKind::AttributeOpen => depth += 1,
                TokenKind::Punct(')' | ']' | '}') => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                TokenKind::Literal(text) if depth == 1 => args.push(unquote(text)),
                _ => {}
            }
        }
        args
    }

    /// Skips an interface, trait or enum declaration through the end of its body.
    fn skip_declaration_body(&mut self) {
        while let Some(token) = self.bump() {
            match token.kind {
                TokenKind::Punct('{') => {
                    self.skip_balanced();
                    return;
                }
                TokenKind::Punct(';' | '}') => return,
                _ => {}
            }
        }
    }

    /// Skips the rest of a statement that began with `first`.
    ///
    /// Stops after a `;` at the current nesting level or after a `{ ... }` block. A `}` that closes
    /// the enclosing body is left in place.
    fn skip_statement(&mut self, first: Token<'a>) {
        let mut token = first;
        loop {
            match token.kind {
                TokenKind::Punct(';') => return,
                TokenKind::Punct('{') => {
                    self.skip_balanced();
                    return;
                }
                TokenKind::Punct('(' | '[') | TokenKind::AttributeOpen => {
                    self.skip_balanced();
                }
                _ => {}
            }
            if matches!(self.peek_kind(), Some(TokenKind::Punct('}'))) {
                return;
            }
            match self.bump() {
                Some(next) => token = next,
                None => return,
            }
        }
    }

    /// Skips to the delimiter that closes the opener just consumed, returning the closer's line.
    fn skip_balanced(&mut self) -> u32 {
        let mut depth = 1usize;
        while let Some(token) = self.bump() {
            match token.kind {
                TokenKind::Punct('{' | '(' | '[') | TokenKind::AttributeOpen => depth += 1,
                TokenKind::Punct('}' | ')' | ']') => {
                    depth -= 1;
                    if depth == 0 {
                        return token.line;
                    }
                }
                _ => {}
            }
        }
        self.last_line()
    }

    fn bump(&mut self) -> Option<Token<'a>> {
        let token = self.tokens.get(self.pos).copied();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn peek_kind(&self) -> Option<TokenKind<'a>> {
        self.tokens.get(self.pos).map(|token| token.kind)
    }

    /// Returns the token before the one most recently consumed.
    fn previous(&self) -> Option<TokenKind<'a>> {
        let idx = self.pos.checked_sub(2)?;
        self.tokens.get(idx).map(|token| token.kind)
    }

    /// Returns true if the token just consumed follows `::` or `->`, as in `Foo::class`.
    fn follows_member_access(&self) -> bool {
        matches!(
            self.previous(),
            Some(TokenKind::Punct(':')) | Some(TokenKind::Punct('>'))
        )
    }

    fn eat_punct(&mut self, c: char) -> bool {
        if self.peek_kind() == Some(TokenKind::Punct(c)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.peek_kind().is_some_and(|kind| kind.is_keyword(keyword)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, c: char, expected: &'static str) -> Result<(), DiscoveryParseError> {
        if self.eat_punct(c) {
            Ok(())
        } else {
            Err(self.error(expected))
        }
    }

    fn expect_name(&mut self, expected: &'static str) -> Result<&'a str, DiscoveryParseError> {
        match self.peek_kind() {
            Some(TokenKind::Name(name)) => {
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.error(expected)),
        }
    }

    fn error(&self, expected: &'static str) -> DiscoveryParseError {
        let line = self
            .tokens
            .get(self.pos)
            .map_or_else(|| self.last_line(), |token| token.line);
        DiscoveryParseError {
            line,
            kind: DiscoveryParseErrorKind::UnexpectedToken { expected },
        }
    }

    fn last_line(&self) -> u32 {
        self.tokens.last().map_or(0, |token| token.line)
    }
}

fn qualify(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_owned()
    } else {
        format!("{namespace}\\{name}")
    }
}

fn last_segment(name: &str) -> &str {
    name.rsplit('\\').next().unwrap_or(name)
}

/// Maps a docblock tag or attribute name onto the annotation key it is recorded under.
fn annotation_tag(name: &str) -> Option<&'static str> {
    let tag = match name.to_ascii_lowercase().as_str() {
        "test" => "test",
        "dataprovider" => "dataProvider",
        "depends" => "depends",
        "group" => "group",
        "testdox" => "testdox",
        _ => return None,
    };
    Some(tag)
}

fn parse_doc_tags(doc: &str, annotations: &mut BTreeMap<String, Vec<String>>) {
    for line in doc.lines() {
        let line = line.trim();
        let line = line.strip_prefix("/**").unwrap_or(line);
        let line = line.strip_suffix("*/").unwrap_or(line);
        let line = line.trim().trim_start_matches('*').trim();

        let Some(captures) = DOC_TAG.captures(line) else {
            continue;
        };
        let Some(tag) = annotation_tag(&captures[1]) else {
            continue;
        };
        let values = annotations.entry(tag.to_owned()).or_default();
        if let Some(value) = captures.get(2) {
            values.push(value.as_str().trim().to_owned());
        }
    }
}

fn unquote(literal: &str) -> String {
    let quoted = literal.len() >= 2
        && (literal.starts_with('\'') && literal.ends_with('\'')
            || literal.starts_with('"') && literal.ends_with('"'));
    if quoted {
        literal[1..literal.len() - 1]
            .replace("\\'", "'")
            .replace("\\\"", "\"")
    } else {
        literal.to_owned()
    }
}
