use std::{collections::HashMap, sync::LazyLock};

pub use logos::Span;
use logos::{Lexer, Logos};

use crate::num::Number;

fn process_piped_ident(lexer: &mut Lexer<Token>) -> Result<Box<str>, LexerError> {
    let mut built_ident = String::new();

    // Skip the | at the beginning
    let mut chars = lexer.slice().chars().skip(1).peekable();
    while let Some(chr) = chars.next() {
        match chr {
            '\\' => match chars.peek() {
                Some('x' | 'X') => {
                    built_ident.push(read_hex_escape(&mut chars, || {
                        LexerError::MalformedIdentifier
                    })?);
                }
                Some(&escaped) => {
                    built_ident.push(mnemonic_escape(escaped).ok_or(LexerError::MalformedIdentifier)?);
                    _ = chars.next(); // consume
                }
                None => Err(LexerError::MalformedIdentifier)?,
            },
            // Stop consuming at the ending pipe
            '|' => break,
            c => built_ident.push(c),
        }
    }

    Ok(Box::from(built_ident.as_str()))
}

fn mnemonic_escape(chr: char) -> Option<char> {
    match chr {
        'a' => Some('\x07'),
        'b' => Some('\x08'),
        't' => Some('\t'),
        'n' => Some('\n'),
        'r' => Some('\r'),
        '\\' | '"' | '|' => Some(chr),
        _ => None,
    }
}

pub(crate) static NAMED_CHARACTERS: LazyLock<HashMap<&str, char>> = LazyLock::new(|| {
    let mut named_map = HashMap::new();
    named_map.insert("alarm", '\x07');
    named_map.insert("backspace", '\x08');
    named_map.insert("delete", '\x7f');
    named_map.insert("escape", '\x1b');
    named_map.insert("newline", '\n');
    named_map.insert("null", '\x00');
    named_map.insert("return", '\r');
    named_map.insert("space", ' ');
    named_map.insert("tab", '\t');
    // Non-standard codes
    named_map.insert("lambda", '\u{03bb}');
    named_map.insert("Lambda", '\u{039b}');
    named_map
});

fn process_named_character(lexer: &mut Lexer<Token>) -> Result<char, LexerError> {
    // skip the #\ at the front
    let name = &lexer.slice()[2..];
    NAMED_CHARACTERS
        .get(name)
        .copied()
        .ok_or_else(|| LexerError::InvalidCharacterName(Box::from(name)))
}

fn process_hex_character(lexer: &mut Lexer<Token>) -> Result<char, LexerError> {
    let mut value = 0u32;

    // Skip the #\x
    for digit in lexer.slice().chars().skip(3).filter_map(|c| c.to_digit(16)) {
        value = value
            .checked_mul(16)
            .and_then(|v| v.checked_add(digit))
            .ok_or(LexerError::CharacterTooBig)?;
    }

    char::from_u32(value).ok_or(LexerError::InvalidCodepoint(value))
}

// reads hex escapes in the form `x[0-9a-fA-F]+;` and outputs the corresponding character
fn read_hex_escape<F>(
    iter: &mut std::iter::Peekable<impl Iterator<Item = char>>,
    on_malformed: F,
) -> Result<char, LexerError>
where
    F: Fn() -> LexerError,
{
    // consume the x
    let _ = iter.next();

    let mut char_code = 0u32;
    while let Some(c) = iter.peek() {
        if *c == ';' {
            break;
        }
        let digit = c.to_digit(16).ok_or_else(&on_malformed)?;
        char_code = char_code
            .checked_mul(16)
            .and_then(|v| v.checked_add(digit))
            .ok_or(LexerError::CharacterTooBig)?;
        _ = iter.next();
    }
    if iter.next() != Some(';') {
        return Err(on_malformed());
    }
    char::from_u32(char_code).ok_or(LexerError::InvalidCodepoint(char_code))
}

fn process_string(lexer: &mut Lexer<Token>) -> Result<Box<str>, LexerError> {
    // Our string syntax is described by /"([^\\"]|\\[abtnr"\\]|\\[ \t]*(\r|\n|\r\n)[ \t]*|\\x[0-9a-fA-f]+;)*"/
    // We use a more permissive version of this on the Logos side, so that errors are neater.

    let mut string = String::new();

    let mut chars = lexer.slice().chars().skip(1).peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' => break,
            '\\' => match chars.peek() {
                Some(' ' | '\t' | '\r' | '\n') => {
                    let _ = chars.next();
                    while let Some(' ' | '\t' | '\r' | '\n') = chars.peek() {
                        _ = chars.next();
                    }
                }
                Some('x' | 'X') => {
                    string.push(read_hex_escape(&mut chars, || LexerError::MalformedString)?)
                }
                Some(&escaped) => {
                    string.push(mnemonic_escape(escaped).ok_or(LexerError::MalformedString)?);
                    _ = chars.next(); // consume
                }
                None => Err(LexerError::MalformedString)?,
            },
            c => string.push(c),
        }
    }

    Ok(Box::from(string.as_str()))
}

// `#|` has been read: bump past the matching `|#`, counting the pairs in between
fn skip_nested_comment(lexer: &mut Lexer<Token>) -> Result<(), LexerError> {
    let remainder = lexer.remainder();
    let mut depth = 1usize;
    let mut chars = remainder.char_indices().peekable();
    while let Some((at, c)) = chars.next() {
        match (c, chars.peek()) {
            ('#', Some((_, '|'))) => {
                chars.next();
                depth += 1;
            }
            ('|', Some((_, '#'))) => {
                chars.next();
                depth -= 1;
                if depth == 0 {
                    lexer.bump(at + 2);
                    return Ok(());
                }
            }
            _ => {}
        }
    }
    lexer.bump(remainder.len());
    Err(LexerError::UnterminatedComment)
}

fn process_prefixed_number(lexer: &mut Lexer<Token>) -> Result<Number, LexerError> {
    Number::parse(lexer.slice(), 10).ok_or(LexerError::MalformedNumber)
}

#[derive(thiserror::Error, Debug, PartialEq, Clone, Default)]
pub enum LexerError {
    #[default]
    #[error("invalid token")]
    Invalid,
    #[error("malformed identifier")]
    MalformedIdentifier,
    #[error("character literal too big")]
    CharacterTooBig,
    #[error("invalid Unicode codepoint {0}")]
    InvalidCodepoint(u32),
    #[error("invalid directive {0}")]
    InvalidDirective(Box<str>),
    #[error("invalid character name {0}")]
    InvalidCharacterName(Box<str>),
    #[error("malformed string")]
    MalformedString,
    #[error("malformed number")]
    MalformedNumber,
    #[error("unterminated block comment")]
    UnterminatedComment,
}

#[derive(Debug, Clone, Copy, PartialEq, Hash)]
pub enum Directive {
    FoldCase,
    NoFoldCase,
}

/// Tokens are lexed from some source. Unprefixed atoms are not split into numbers
/// and identifiers here: the reader decides, since `1+`, `+i` and `...` all share a
/// character class.
#[derive(Debug, Clone, PartialEq, Logos)]
#[logos(error = LexerError)]
pub enum Token {
    #[regex("[ \t\x0C]+")]
    IntralineWhitespace,
    #[token("\n")]
    #[token("\r\n")]
    #[token("\r")]
    LineEnding,
    #[regex(r";[^\n]*")]
    Comment,
    // Nested comments are not regex-friendly, so the callback eats the whole body
    #[token("#|", skip_nested_comment)]
    NestedComment,
    #[token("#;")]
    DatumComment,
    #[regex("(?i)#!fold-case", |_| Directive::FoldCase)]
    #[regex("(?i)#!no-fold-case", |_| Directive::NoFoldCase)]
    #[regex(r"(?i)#![a-z0-9\-]+", |l| Err(LexerError::InvalidDirective(Box::from(&l.slice()[2..]))))]
    Directive(Directive),

    #[token("(")]
    #[token("[")]
    LParen,
    #[token(")")]
    #[token("]")]
    RParen,
    #[token(".", priority = 10)]
    Dot,
    #[token("'")]
    Quote,
    #[token("`")]
    Quasiquote,
    #[token(",")]
    Unquote,
    #[token(",@")]
    UnquoteSplicing,
    #[token("#(")]
    StartVector,
    #[regex(r#"\|([^|\\]|\\[^\n])*\|"#, process_piped_ident)]
    PipedIdentifier(Box<str>),
    #[regex(r#"[^ \t\x0C\r\n()\[\]";'`,|#][^ \t\x0C\r\n()\[\]";'`,|]*"#, |l| Box::from(l.slice()))]
    Atom(Box<str>),
    #[regex("(?i)#t(rue)?", |_| true)]
    #[regex("(?i)#f(alse)?", |_| false)]
    Boolean(bool),
    #[regex(r"#\\.", callback = |l| l.slice().chars().nth(2).ok_or(LexerError::Invalid))] // Regex FTW
    #[regex(r"#\\[a-zA-Z]+", priority = 2, callback = process_named_character)]
    #[regex(r"(?i)#\\x[0-9a-f]+", callback = process_hex_character)]
    Character(char),
    #[regex(r#""([^\\"]|\\[^\r\n]|\\\r?\n)*""#, process_string)]
    String(Box<str>),
    #[regex(r#"#[eEiIxXbBoOdD][^ \t\x0C\r\n()\[\]";'`,|]*"#, process_prefixed_number)]
    Number(Number),
}

impl Token {
    pub fn lexer(source: &str) -> Lexer<Self> {
        <Self as Logos>::lexer(source)
    }
}

#[cfg(test)]
mod tests {
    use super::{Directive, LexerError, Token};
    use crate::num::Number;
    use assert2::{assert, check, let_assert};

    #[test]
    fn test_identifier_and_piped_identifier() {
        let_assert!(Some(Ok(Token::Atom(plain))) = Token::lexer("Hello").next());
        let_assert!(Some(Ok(Token::PipedIdentifier(piped))) = Token::lexer(r"|H\x65;llo|").next());
        assert!(plain == piped);
    }

    #[test]
    fn atom_checklist() {
        macro_rules! test_atom {
            ($source:literal) => {{
                let mut lexer = Token::lexer($source);
                let_assert!(Some(Ok(Token::Atom(_))) = lexer.next());
                assert!(lexer.slice() == $source);
            }};
        }

        // Taken from the reference as examples of valid identifiers
        test_atom!("...");
        test_atom!("<=?");
        test_atom!("+");
        test_atom!("+soup+");
        test_atom!("->string");
        test_atom!("a34kTMNs");
        test_atom!("lambda");
        test_atom!("V17a");
        test_atom!("the-word-recursion-has-many-meanings");
        // numbers are atoms until the reader looks at them
        test_atom!("1/2");
        test_atom!("-1.5e10");
        test_atom!("+inf.0");
        test_atom!("1+2i");
    }

    #[test]
    fn dot_is_not_an_atom() {
        check!(Token::lexer(".").next() == Some(Ok(Token::Dot)));
        let mut lexer = Token::lexer("(a . b)");
        let tokens: Vec<_> = lexer.by_ref().collect();
        check!(tokens.contains(&Ok(Token::Dot)));
    }

    #[test]
    fn syntax_insensitivity() {
        check!(Token::lexer("#!fold-case").next() == Some(Ok(Token::Directive(Directive::FoldCase))));
        check!(Token::lexer("#!NO-FOLD-CASE").next() == Some(Ok(Token::Directive(Directive::NoFoldCase))));
        check!(Token::lexer("#t").next() == Token::lexer("#T").next());
        check!(Token::lexer("#true").next() == Token::lexer("#TrUe").next());
        check!(Token::lexer("#false").next() == Token::lexer("#FaLsE").next());
        let_assert!(Some(Err(LexerError::InvalidDirective(_))) = Token::lexer("#!wat").next());
    }

    #[test]
    fn test_character() {
        check!(Token::lexer(r"#\a").next() == Some(Ok(Token::Character('a'))));
        check!(Token::lexer(r"#\alarm").next() == Some(Ok(Token::Character('\u{7}'))));
        check!(Token::lexer(r"#\space").next() == Some(Ok(Token::Character(' '))));
        check!(Token::lexer(r"#\0").next() == Some(Ok(Token::Character('0'))));
        check!(Token::lexer(r"#\xa").next() == Some(Ok(Token::Character('\n'))));
        check!(Token::lexer(r"#\x03bb").next() == Some(Ok(Token::Character('\u{03bb}'))));
        check!(Token::lexer(r"#\(").next() == Some(Ok(Token::Character('('))));
    }

    #[test]
    fn test_string() {
        macro_rules! verify_string {
            ($source:literal as $target:literal) => {
                let source = format!("\"{}\"", $source);
                let_assert!(Some(Ok(Token::String(bs))) = Token::lexer(&source).next());
                check!(bs.as_ref() == $target);
            };
        }

        verify_string!(r#"apple"# as "apple");
        verify_string!(r#"\xea;\n\"\a"# as "\u{ea}\n\"\u{7}");
        verify_string!("one \\\n    two" as "one two");
        let_assert!(Some(Err(LexerError::MalformedString)) = Token::lexer(r#""\q""#).next());
    }

    #[test]
    fn prefixed_numbers() {
        let_assert!(Some(Ok(Token::Number(n))) = Token::lexer("#xff").next());
        check!(n == Number::from(255i64));
        let_assert!(Some(Ok(Token::Number(n))) = Token::lexer("#e1.5").next());
        check!(n.to_string() == "3/2");
        let_assert!(Some(Ok(Token::Number(n))) = Token::lexer("#i1/4").next());
        check!(n.to_string() == "0.25");
        let_assert!(Some(Err(LexerError::MalformedNumber)) = Token::lexer("#b102").next());
    }

    #[test]
    fn comments() {
        let tokens: Vec<_> = Token::lexer("; hi\n#| x #| |y| |# |# b #;").collect();
        check!(
            tokens
                == vec![
                    Ok(Token::Comment),
                    Ok(Token::LineEnding),
                    Ok(Token::NestedComment),
                    Ok(Token::IntralineWhitespace),
                    Ok(Token::Atom(Box::from("b"))),
                    Ok(Token::IntralineWhitespace),
                    Ok(Token::DatumComment),
                ]
        );
        let_assert!(Some(Err(LexerError::UnterminatedComment)) = Token::lexer("#| open #| |#").next());
    }
}
