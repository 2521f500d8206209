use super::*;

fn kinds(src: &str) -> Vec<TokenKind> {
    let tokens = tokenize(src);
    tokens.cursor().map(|t| tokens.kind(t)).collect()
}

#[test]
fn keywords_and_idents() {
    use TokenKind::*;

    assert_eq!(
        kinds("var x = new Counter()"),
        [Var, Ident, Eq, New, Ident, ParenL, ParenR]
    );
    assert_eq!(
        kinds("foreach k, v in d { }"),
        [Foreach, Ident, Comma, Ident, In, Ident, BraceL, BraceR]
    );
}

#[test]
fn operators() {
    use TokenKind::*;

    assert_eq!(
        kinds("a += b * c <= d && !e"),
        [Ident, PlusEq, Ident, Star, Ident, Le, Ident, AndAnd, Bang, Ident]
    );
    assert_eq!(kinds("0..10"), [Integer, DotDot, Integer]);
    assert_eq!(kinds("a.b"), [Ident, Dot, Ident]);
}

#[test]
fn literals() {
    use TokenKind::*;

    assert_eq!(
        kinds(r#"1 2.5 "hi\n" true false null"#),
        [Integer, Float, String, True, False, Null]
    );
}

#[test]
fn comments_are_skipped() {
    use TokenKind::*;

    assert_eq!(kinds("1 # trailing comment\n2"), [Integer, Integer]);
}

#[test]
fn lexemes_and_spans() {
    let tokens = tokenize("var answer = 42");
    let all: Vec<_> = tokens.cursor().collect();
    assert_eq!(tokens.lexeme(all[1]), "answer");
    assert_eq!(tokens.span(all[3]), Span::from(13u32..15));
}

#[test]
fn unknown_character_is_error() {
    assert!(kinds("var ? = 1").contains(&TokenKind::Error));
}

#[test]
fn cursor_past_end_yields_eof() {
    let tokens = tokenize("x");
    let mut cursor = tokens.cursor();
    cursor.advance();
    assert_eq!(cursor.kind(cursor.current()), TokenKind::Eof);
}
