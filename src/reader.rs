//! Turns source text into data. This is the only place that knows about
//! concrete syntax; everything downstream works on [`Value`]s.
use std::ops::Range;

use icu_casemap::CaseMapper;
use logos::SpannedIter;

use crate::{
    lexer::{Directive, LexerError, Token},
    num::Number,
    world::{symbol::Symbol, value::Value},
};

/// An ordered sequence of top-level data
pub type Program = Vec<Value>;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("expected {expected} but {found} found at line {line}, column {column}")]
pub struct SyntaxError {
    pub offset: usize,
    pub line: usize,
    pub column: usize,
    pub expected: String,
    pub found: String,
}

impl SyntaxError {
    /// The input stopped in the middle of a datum (a REPL should ask for more).
    pub fn is_incomplete(&self) -> bool {
        self.found == END_OF_INPUT
    }

    pub fn span(&self) -> Range<usize> {
        self.offset..self.offset + 1
    }
}

const END_OF_INPUT: &str = "end of input";

/// Parses every datum of `text`.
pub fn parse(text: &str) -> Result<Program, SyntaxError> {
    parse_with(text, false)
}

/// Like [`parse`], with `#!fold-case` already in effect when `fold_case` is set.
pub fn parse_with(text: &str, fold_case: bool) -> Result<Program, SyntaxError> {
    let mut reader = Reader {
        source: text,
        tokens: Token::lexer(text).spanned(),
        fold_case,
    };
    let mut program = vec![];
    while let Some(datum) = reader.datum()? {
        program.push(datum);
    }
    Ok(program)
}

struct Reader<'s> {
    source: &'s str,
    tokens: SpannedIter<'s, Token>,
    fold_case: bool,
}

impl<'s> Reader<'s> {
    fn error(&self, offset: usize, expected: impl Into<String>, found: impl Into<String>) -> SyntaxError {
        let before = &self.source[..offset.min(self.source.len())];
        let line = before.matches('\n').count() + 1;
        let column = before.rsplit('\n').next().map_or(0, |l| l.chars().count()) + 1;
        SyntaxError {
            offset,
            line,
            column,
            expected: expected.into(),
            found: found.into(),
        }
    }

    fn end_error(&self, expected: impl Into<String>) -> SyntaxError {
        self.error(self.source.len(), expected, END_OF_INPUT)
    }

    // next meaningful token, skipping whitespace, comments and directives
    fn next_token(&mut self) -> Result<Option<(Token, Range<usize>)>, SyntaxError> {
        loop {
            let Some((token, span)) = self.tokens.next() else {
                return Ok(None);
            };
            match token {
                Ok(Token::IntralineWhitespace | Token::LineEnding | Token::Comment | Token::NestedComment) => {}
                Ok(Token::DatumComment) => {
                    if self.datum()?.is_none() {
                        return Err(self.end_error("a datum after #;"));
                    }
                }
                Ok(Token::Directive(Directive::FoldCase)) => self.fold_case = true,
                Ok(Token::Directive(Directive::NoFoldCase)) => self.fold_case = false,
                Ok(token) => return Ok(Some((token, span))),
                Err(LexerError::UnterminatedComment) => {
                    return Err(self.error(span.start, "`|#` closing the comment", END_OF_INPUT))
                }
                Err(error) => {
                    let text = &self.source[span.clone()];
                    return Err(self.error(span.start, "a token", format!("{error} `{text}`")));
                }
            }
        }
    }

    fn datum(&mut self) -> Result<Option<Value>, SyntaxError> {
        let Some((token, span)) = self.next_token()? else {
            return Ok(None);
        };
        self.datum_from(token, span).map(Some)
    }

    fn required_datum(&mut self, after: &str) -> Result<Value, SyntaxError> {
        self.datum()?
            .ok_or_else(|| self.end_error(format!("a datum after {after}")))
    }

    fn datum_from(&mut self, token: Token, span: Range<usize>) -> Result<Value, SyntaxError> {
        Ok(match token {
            Token::LParen => self.list(span.start)?,
            Token::StartVector => self.vector(span.start)?,
            Token::Quote => self.abbreviation("quote", "'")?,
            Token::Quasiquote => self.abbreviation("quasiquote", "`")?,
            Token::Unquote => self.abbreviation("unquote", ",")?,
            Token::UnquoteSplicing => self.abbreviation("unquote-splicing", ",@")?,
            Token::Boolean(b) => Value::Boolean(b),
            Token::Character(c) => Value::Character(c),
            Token::String(s) => Value::string(s.as_ref()),
            Token::Number(n) => Value::number(n),
            Token::PipedIdentifier(name) => Value::Symbol(Symbol::intern(&name)),
            Token::Atom(text) => match Number::parse(&text, 10) {
                Some(n) => Value::number(n),
                None => Value::Symbol(self.identifier(&text)),
            },
            Token::RParen => return Err(self.error(span.start, "a datum", "`)`")),
            Token::Dot => return Err(self.error(span.start, "a datum", "`.`")),
            Token::IntralineWhitespace
            | Token::LineEnding
            | Token::Comment
            | Token::NestedComment
            | Token::DatumComment
            | Token::Directive(_) => return Err(self.error(span.start, "a datum", "a comment")),
        })
    }

    fn identifier(&self, text: &str) -> Symbol {
        if self.fold_case {
            Symbol::intern(&CaseMapper::new().fold_string(text))
        } else {
            Symbol::intern(text)
        }
    }

    fn abbreviation(&mut self, name: &str, written: &str) -> Result<Value, SyntaxError> {
        let datum = self.required_datum(written)?;
        Ok(Value::list([Value::Symbol(Symbol::intern(name)), datum]))
    }

    fn list(&mut self, start: usize) -> Result<Value, SyntaxError> {
        let mut items = vec![];
        loop {
            let Some((token, span)) = self.next_token()? else {
                return Err(self.end_error(format!("`)` closing the list opened at {start}")));
            };
            match token {
                Token::RParen => return Ok(Value::list(items)),
                Token::Dot if !items.is_empty() => {
                    let tail = self.required_datum(".")?;
                    return match self.next_token()? {
                        Some((Token::RParen, _)) => Ok(Value::list_with_tail(items, tail)),
                        Some((_, span)) => Err(self.error(span.start, "`)` after the dotted tail", "another datum")),
                        None => Err(self.end_error("`)` after the dotted tail")),
                    };
                }
                token => items.push(self.datum_from(token, span)?),
            }
        }
    }

    fn vector(&mut self, start: usize) -> Result<Value, SyntaxError> {
        let mut items = vec![];
        loop {
            let Some((token, span)) = self.next_token()? else {
                return Err(self.end_error(format!("`)` closing the vector opened at {start}")));
            };
            match token {
                Token::RParen => return Ok(Value::vector(items)),
                token => items.push(self.datum_from(token, span)?),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{parse, parse_with};
    use assert2::{check, let_assert};

    fn written(text: &str) -> Vec<String> {
        let_assert!(Ok(program) = parse(text));
        program.iter().map(|d| d.to_string()).collect()
    }

    #[test]
    fn reads_data() {
        check!(written("(a b . c) #(1 2) \"s\\n\" #\\x") == ["(a b . c)", "#(1 2)", r#""s\n""#, r"#\x"]);
        check!(written("'a `(b ,c ,@d)") == ["(quote a)", "(quasiquote (b (unquote c) (unquote-splicing d)))"]);
        check!(written("1/2 -0.5 +i |two words| ...") == ["1/2", "-0.5", "+1i", "|two words|", "..."]);
        check!(written("#t #false ()") == ["#t", "#f", "()"]);
    }

    #[test]
    fn skips_comments() {
        check!(written("; line\n a #| outer #| inner |# |# b #;(ignored) c") == ["a", "b", "c"]);
        check!(written("a #| x |# b") == ["a", "b"]);
        let_assert!(Err(error) = parse("a #| never closed"));
        check!(error.is_incomplete());
    }

    #[test]
    fn fold_case() {
        check!(written("#!fold-case HELLO #!no-fold-case HELLO") == ["hello", "HELLO"]);
        let_assert!(Ok(program) = parse_with("ABC", true));
        check!(program[0].to_string() == "abc");
    }

    #[test]
    fn reports_positions() {
        let_assert!(Err(error) = parse("(a\n  b))"));
        check!(error.line == 2);
        check!(error.column == 5);
        check!(error.to_string() == "expected a datum but `)` found at line 2, column 5");

        let_assert!(Err(error) = parse("(a (b"));
        check!(error.is_incomplete());

        let_assert!(Err(error) = parse("(. a)"));
        check!(error.found == "`.`");
    }
}
