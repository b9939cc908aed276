// Copyright (c) The phpunit-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tokenizer for the subset of PHP needed to find test declarations.
//!
//! Whitespace and ordinary comments are dropped. Doc comments are kept, since test annotations
//! live in them. String literals, heredocs and nowdocs are kept as opaque [`TokenKind::Literal`]s
//! so that braces inside them don't confuse the declaration parser.

use crate::errors::{DiscoveryParseError, DiscoveryParseErrorKind};
use winnow::{
    ModalResult, Parser,
    combinator::{alt, opt, preceded, repeat},
    token::{any, one_of, take_till, take_until, take_while},
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct Token<'a> {
    pub(crate) kind: TokenKind<'a>,
    /// The 0-based line the token starts on.
    pub(crate) line: u32,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum TokenKind<'a> {
    /// A `/** ... */` comment, including delimiters.
    DocComment(&'a str),
    /// An identifier, keyword or (possibly qualified) name such as `Foo\Bar`.
    Name(&'a str),
    /// A variable such as `$foo`, including the `$`.
    Variable(&'a str),
    /// A string, heredoc, nowdoc or number literal, including delimiters.
    Literal(&'a str),
    /// The `#[` that opens an attribute group.
    AttributeOpen,
    Punct(char),
}

impl TokenKind<'_> {
    /// Returns true if this is a name equal to `keyword`, ignoring ASCII case.
    pub(crate) fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self, TokenKind::Name(name) if name.eq_ignore_ascii_case(keyword))
    }
}

enum Lexeme<'a> {
    Token(TokenKind<'a>),
    Trivia,
    CloseTag,
}

/// Splits `source` into tokens, then checks that delimiters are balanced.
///
/// Text before the first `<?php` (or `<?=`) open tag is inline HTML and is skipped. Source without
/// any open tag is treated as PHP code in its entirety.
pub(crate) fn tokenize(source: &str) -> Result<Vec<Token<'_>>, DiscoveryParseError> {
    let lines = LineIndex::new(source);
    let mut input = match find_open_tag(source) {
        Some(end) => &source[end..],
        None => source,
    };

    let mut tokens = Vec::new();
    while !input.is_empty() {
        let line = lines.line_of(source.len() - input.len());
        match lex_one(&mut input) {
            Ok(Lexeme::Token(kind)) => tokens.push(Token { kind, line }),
            Ok(Lexeme::Trivia) => {}
            Ok(Lexeme::CloseTag) => {
                // `?>` terminates a statement, and everything up to the next open tag is HTML.
                tokens.push(Token {
                    kind: TokenKind::Punct(';'),
                    line,
                });
                input = match find_open_tag(input) {
                    Some(end) => &input[end..],
                    None => "",
                };
            }
            Err(kind) => return Err(DiscoveryParseError { line, kind }),
        }
    }

    check_delimiters(&tokens)?;
    Ok(tokens)
}

fn lex_one<'i>(input: &mut &'i str) -> Result<Lexeme<'i>, DiscoveryParseErrorKind> {
    let rest = *input;

    if rest.starts_with("/**") && !rest.starts_with("/**/") {
        return block_comment
            .parse_next(input)
            .map(|text| Lexeme::Token(TokenKind::DocComment(text)))
            .map_err(|_| DiscoveryParseErrorKind::UnterminatedComment);
    }
    if rest.starts_with("/*") {
        return block_comment
            .parse_next(input)
            .map(|_| Lexeme::Trivia)
            .map_err(|_| DiscoveryParseErrorKind::UnterminatedComment);
    }
    if rest.starts_with("#[") {
        *input = &rest[2..];
        return Ok(Lexeme::Token(TokenKind::AttributeOpen));
    }
    if rest.starts_with("//") || rest.starts_with('#') {
        *input = line_comment(rest);
        return Ok(Lexeme::Trivia);
    }
    if rest.starts_with("?>") {
        *input = &rest[2..];
        return Ok(Lexeme::CloseTag);
    }
    if rest.starts_with("<<<") {
        return heredoc(input).map(|text| Lexeme::Token(TokenKind::Literal(text)));
    }

    let Some(c) = rest.chars().next() else {
        return Ok(Lexeme::Trivia);
    };
    if c.is_whitespace() {
        let _: ModalResult<&str> = take_while(1.., char::is_whitespace).parse_next(input);
        return Ok(Lexeme::Trivia);
    }

    let kind = match c {
        '\'' | '"' | '`' => quoted(c)
            .parse_next(input)
            .map(TokenKind::Literal)
            .map_err(|_| DiscoveryParseErrorKind::UnterminatedString)?,
        '$' => match variable.parse_next(input) {
            Ok(text) => TokenKind::Variable(text),
            Err(_) => punct(input),
        },
        c if c == '\\' || is_ident_start(c) => match name.parse_next(input) {
            Ok(text) => TokenKind::Name(text),
            Err(_) => punct(input),
        },
        c if c.is_ascii_digit() => {
            let text: ModalResult<&str> = take_while(1.., |c: char| {
                c.is_ascii_alphanumeric() || c == '.' || c == '_'
            })
            .parse_next(input);
            TokenKind::Literal(text.unwrap_or_default())
        }
        _ => punct(input),
    };

    Ok(Lexeme::Token(kind))
}

fn punct(input: &mut &str) -> TokenKind<'static> {
    let c: ModalResult<char> = any.parse_next(input);
    TokenKind::Punct(c.unwrap_or(' '))
}

fn block_comment<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    ("/*", take_until(0.., "*/"), "*/").take().parse_next(input)
}

fn line_comment(input: &str) -> &str {
    // A line comment ends at the end of the line, or just before a `?>` close tag.
    let end = input.find(['\n', '\r']).unwrap_or(input.len());
    let end = input[..end].find("?>").unwrap_or(end);
    &input[end..]
}

fn quoted<'i>(quote: char) -> impl FnMut(&mut &'i str) -> ModalResult<&'i str> {
    move |input: &mut &'i str| {
        (
            quote,
            repeat::<_, _, (), _, _>(
                0..,
                alt((
                    preceded('\\', any).void(),
                    take_till(1.., (quote, '\\')).void(),
                )),
            ),
            quote,
        )
            .take()
            .parse_next(input)
    }
}

fn ident<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    (one_of(is_ident_start), take_while(0.., is_ident_continue))
        .take()
        .parse_next(input)
}

fn name<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    (
        opt('\\'),
        ident,
        repeat::<_, _, (), _, _>(0.., ('\\', ident)),
    )
        .take()
        .parse_next(input)
}

fn variable<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    ('$', ident).take().parse_next(input)
}

fn heredoc<'i>(input: &mut &'i str) -> Result<&'i str, DiscoveryParseErrorKind> {
    let start = *input;
    let label: ModalResult<&str> = (
        "<<<",
        take_while(0.., (' ', '\t')),
        opt(one_of(('\'', '"'))),
        ident,
        opt(one_of(('\'', '"'))),
        opt('\r'),
        '\n',
    )
        .map(|(_, _, _, label, _, _, _)| label)
        .parse_next(input);
    let label = label.map_err(|_| DiscoveryParseErrorKind::UnexpectedToken {
        expected: "heredoc label",
    })?;

    // The closing label may be indented, and must not be followed by an identifier character.
    loop {
        if input.is_empty() {
            return Err(DiscoveryParseErrorKind::UnterminatedHeredoc {
                label: label.to_owned(),
            });
        }
        let line_end = input.find('\n').map_or(input.len(), |idx| idx + 1);
        let line = &input[..line_end];
        let trimmed = line.trim_start_matches([' ', '\t']);
        if let Some(after) = trimmed.strip_prefix(label)
            && !after.starts_with(is_ident_continue)
        {
            *input = &input[line.len() - after.len()..];
            return Ok(&start[..start.len() - input.len()]);
        }
        *input = &input[line_end..];
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || !c.is_ascii()
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || !c.is_ascii()
}

/// Returns the byte offset just past the first open tag in `input`.
fn find_open_tag(input: &str) -> Option<usize> {
    let mut from = 0;
    while let Some(idx) = input[from..].find("<?") {
        let at = from + idx;
        let rest = &input[at + 2..];
        if rest.get(..3).is_some_and(|tag| tag.eq_ignore_ascii_case("php")) {
            return Some(at + 5);
        }
        if rest.starts_with('=') {
            return Some(at + 3);
        }
        from = at + 2;
    }
    None
}

fn check_delimiters(tokens: &[Token<'_>]) -> Result<(), DiscoveryParseError> {
    let mut stack: Vec<(char, u32)> = Vec::new();
    for token in tokens {
        let open = match token.kind {
            TokenKind::Punct(c @ ('{' | '(' | '[')) => Some(c),
            TokenKind::AttributeOpen => Some('['),
            _ => None,
        };
        if let Some(open) = open {
            stack.push((open, token.line));
            continue;
        }

        let TokenKind::Punct(close @ ('}' | ')' | ']')) = token.kind else {
            continue;
        };
        let expected = match stack.pop() {
            Some((open, _)) => closing(open),
            None => {
                return Err(DiscoveryParseError {
                    line: token.line,
                    kind: DiscoveryParseErrorKind::UnexpectedClose(close),
                });
            }
        };
        if expected != close {
            return Err(DiscoveryParseError {
                line: token.line,
                kind: DiscoveryParseErrorKind::MismatchedClose {
                    expected,
                    found: close,
                },
            });
        }
    }

    match stack.pop() {
        Some((open, line)) => Err(DiscoveryParseError {
            line,
            kind: DiscoveryParseErrorKind::UnclosedDelimiter(open),
        }),
        None => Ok(()),
    }
}

fn closing(open: char) -> char {
    match open {
        '{' => '}',
        '(' => ')',
        _ => ']',
    }
}

struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(source: &str) -> Self {
        let starts = std::iter::once(0)
            .chain(source.match_indices('\n').map(|(idx, _)| idx + 1))
            .collect();
        Self { starts }
    }

    fn line_of(&self, offset: usize) -> u32 {
        let line = self.starts.partition_point(|&start| start <= offset) - 1;
        u32::try_from(line).unwrap_or(u32::MAX)
    }
}
