//! Lexer for query source text.
//!
//! Converts a generator-expression source into a sequence of tokens with
//! span information.

use chumsky::prelude::*;

/// A token of the query language.
#[derive(Debug, Clone, PartialEq)]
pub enum Token<'src> {
    Name(&'src str),
    Int(&'src str),
    Float(&'src str),
    /// String literal with escapes already resolved.
    Str(String),

    // Keywords
    For,
    In,
    If,
    Else,
    Not,
    And,
    Or,
    Is,
    Lambda,
    True,
    False,
    None,

    // Punctuation
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Dot,
    Colon,
    Assign,

    // Operators
    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    Percent,
    LShift,
    RShift,
    Amp,
    Pipe,
    Caret,
    Tilde,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl<'src> std::fmt::Display for Token<'src> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Name(s) | Token::Int(s) | Token::Float(s) => write!(f, "{}", s),
            Token::Str(s) => write!(f, "{:?}", s),
            Token::For => write!(f, "for"),
            Token::In => write!(f, "in"),
            Token::If => write!(f, "if"),
            Token::Else => write!(f, "else"),
            Token::Not => write!(f, "not"),
            Token::And => write!(f, "and"),
            Token::Or => write!(f, "or"),
            Token::Is => write!(f, "is"),
            Token::Lambda => write!(f, "lambda"),
            Token::True => write!(f, "True"),
            Token::False => write!(f, "False"),
            Token::None => write!(f, "None"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::Comma => write!(f, ","),
            Token::Dot => write!(f, "."),
            Token::Colon => write!(f, ":"),
            Token::Assign => write!(f, "="),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::DoubleStar => write!(f, "**"),
            Token::Slash => write!(f, "/"),
            Token::DoubleSlash => write!(f, "//"),
            Token::Percent => write!(f, "%"),
            Token::LShift => write!(f, "<<"),
            Token::RShift => write!(f, ">>"),
            Token::Amp => write!(f, "&"),
            Token::Pipe => write!(f, "|"),
            Token::Caret => write!(f, "^"),
            Token::Tilde => write!(f, "~"),
            Token::EqEq => write!(f, "=="),
            Token::NotEq => write!(f, "!="),
            Token::Lt => write!(f, "<"),
            Token::Le => write!(f, "<="),
            Token::Gt => write!(f, ">"),
            Token::Ge => write!(f, ">="),
        }
    }
}

fn keyword_or_name(s: &str) -> Token<'_> {
    match s {
        "for" => Token::For,
        "in" => Token::In,
        "if" => Token::If,
        "else" => Token::Else,
        "not" => Token::Not,
        "and" => Token::And,
        "or" => Token::Or,
        "is" => Token::Is,
        "lambda" => Token::Lambda,
        "True" => Token::True,
        "False" => Token::False,
        "None" => Token::None,
        _ => Token::Name(s),
    }
}

/// Create the lexer.
pub fn lexer<'src>(
) -> impl Parser<'src, &'src str, Vec<(Token<'src>, SimpleSpan)>, extra::Err<Rich<'src, char>>> {
    let name = text::ident().map(keyword_or_name);

    // Integers, decimals and exponent forms; the slice decides the kind.
    let fraction = just('.').then(text::digits(10));
    let exponent = one_of("eE")
        .then(one_of("+-").or_not())
        .then(text::digits(10));
    let number = text::int(10)
        .then(fraction.or_not())
        .then(exponent.or_not())
        .to_slice()
        .map(|s: &str| {
            if s.contains(['.', 'e', 'E']) {
                Token::Float(s)
            } else {
                Token::Int(s)
            }
        });

    let escape = just('\\').ignore_then(choice((
        just('\\'),
        just('\''),
        just('"'),
        just('n').to('\n'),
        just('t').to('\t'),
        just('r').to('\r'),
        just('0').to('\0'),
    )));
    let double_quoted = just('"')
        .ignore_then(
            none_of("\\\"")
                .or(escape.clone())
                .repeated()
                .collect::<String>(),
        )
        .then_ignore(just('"'));
    let single_quoted = just('\'')
        .ignore_then(none_of("\\'").or(escape).repeated().collect::<String>())
        .then_ignore(just('\''));
    let string_lit = double_quoted.or(single_quoted).map(Token::Str);

    // Multi-char operators first
    let long_op = choice((
        just("**").to(Token::DoubleStar),
        just("//").to(Token::DoubleSlash),
        just("<<").to(Token::LShift),
        just(">>").to(Token::RShift),
        just("<=").to(Token::Le),
        just(">=").to(Token::Ge),
        just("==").to(Token::EqEq),
        just("!=").to(Token::NotEq),
        just("<>").to(Token::NotEq),
    ));
    let short_op = choice((
        just('(').to(Token::LParen),
        just(')').to(Token::RParen),
        just('[').to(Token::LBracket),
        just(']').to(Token::RBracket),
        just('{').to(Token::LBrace),
        just('}').to(Token::RBrace),
        just(',').to(Token::Comma),
        just('.').to(Token::Dot),
        just(':').to(Token::Colon),
        just('=').to(Token::Assign),
        just('+').to(Token::Plus),
        just('-').to(Token::Minus),
        just('*').to(Token::Star),
        just('/').to(Token::Slash),
        just('%').to(Token::Percent),
        just('&').to(Token::Amp),
        just('|').to(Token::Pipe),
        just('^').to(Token::Caret),
        just('~').to(Token::Tilde),
        just('<').to(Token::Lt),
        just('>').to(Token::Gt),
    ));

    let token = choice((name, number, string_lit, long_op, short_op))
        .map_with(|tok, e| (tok, e.span()));

    token.padded().repeated().collect().padded().then_ignore(end())
}

/// Lex a source string into tokens.
pub fn lex(source: &str) -> Result<Vec<(Token<'_>, SimpleSpan)>, Vec<Rich<'_, char>>> {
    let (tokens, errs) = lexer().parse(source).into_output_errors();
    if errs.is_empty() {
        Ok(tokens.unwrap_or_default())
    } else {
        Err(errs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens_only(tokens: Vec<(Token<'_>, SimpleSpan)>) -> Vec<Token<'_>> {
        tokens.into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn test_lex_generator() {
        let tokens = tokens_only(lex("s for s in Student if s.gpa > 3.0").unwrap());
        assert_eq!(
            tokens,
            vec![
                Token::Name("s"),
                Token::For,
                Token::Name("s"),
                Token::In,
                Token::Name("Student"),
                Token::If,
                Token::Name("s"),
                Token::Dot,
                Token::Name("gpa"),
                Token::Gt,
                Token::Float("3.0"),
            ]
        );
    }

    #[test]
    fn test_lex_operators_longest_first() {
        let tokens = tokens_only(lex("a ** b // c <> d <= e").unwrap());
        assert_eq!(
            tokens,
            vec![
                Token::Name("a"),
                Token::DoubleStar,
                Token::Name("b"),
                Token::DoubleSlash,
                Token::Name("c"),
                Token::NotEq,
                Token::Name("d"),
                Token::Le,
                Token::Name("e"),
            ]
        );
    }

    #[test]
    fn test_lex_strings_and_escapes() {
        let tokens = tokens_only(lex(r#"'it\'s' "a\"b" 'x\ny'"#).unwrap());
        assert_eq!(
            tokens,
            vec![
                Token::Str("it's".into()),
                Token::Str("a\"b".into()),
                Token::Str("x\ny".into()),
            ]
        );
    }

    #[test]
    fn test_lex_numbers() {
        let tokens = tokens_only(lex("1 2.5 1e3 7.0E-2").unwrap());
        assert_eq!(
            tokens,
            vec![
                Token::Int("1"),
                Token::Float("2.5"),
                Token::Float("1e3"),
                Token::Float("7.0E-2"),
            ]
        );
    }

    #[test]
    fn test_lex_error_on_unknown_char() {
        assert!(lex("a $ b").is_err());
    }
}
