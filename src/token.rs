use logos::Logos as _;

use crate::span::Span;

pub fn tokenize(src: &str) -> Tokens<'_> {
    let mut tokens = Tokens::new(src);

    for (kind, span) in TokenKind::lexer(src).spanned() {
        let kind = kind.unwrap_or(TokenKind::Error);
        tokens.append(kind, span.into());
    }

    tokens
}

pub struct Tokens<'src> {
    src: &'src str,
    kind: Vec<TokenKind>,
    span: Vec<Span>,
}

impl<'src> Tokens<'src> {
    fn new(src: &'src str) -> Self {
        // shrug
        let capacity = src.len() / 7;
        Self {
            src,
            kind: Vec::with_capacity(capacity),
            span: Vec::with_capacity(capacity),
        }
    }

    fn append(&mut self, kind: TokenKind, span: Span) {
        self.kind.push(kind);
        self.span.push(span);
    }

    #[inline]
    pub fn src(&self) -> &'src str {
        self.src
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.kind.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.kind.is_empty()
    }

    #[inline]
    pub fn cursor<'tokens>(&'tokens self) -> TokenCursor<'src, 'tokens> {
        TokenCursor {
            tokens: self,
            index: 0,
        }
    }

    #[inline]
    pub fn kind(&self, token: Token) -> TokenKind {
        if token.index() >= self.kind.len() {
            return TokenKind::Eof;
        }

        self.kind[token.index()]
    }

    #[inline]
    pub fn span(&self, token: Token) -> Span {
        if token.index() >= self.span.len() {
            return Span::from(self.src.len()..self.src.len());
        }

        self.span[token.index()]
    }

    #[inline]
    pub fn lexeme(&self, token: Token) -> &'src str {
        &self.src[self.span(token)]
    }
}

impl std::fmt::Debug for Tokens<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut list = f.debug_list();
        for token in self.cursor() {
            let kind = self.kind(token);
            let span = self.span(token);
            let lexeme = self.lexeme(token);
            list.entry(&format_args!("{kind:?}({lexeme:?}, {span})"));
        }
        list.finish()
    }
}

pub struct TokenCursor<'src, 'tokens> {
    tokens: &'tokens Tokens<'src>,
    index: usize,
}

impl<'src, 'tokens> TokenCursor<'src, 'tokens> {
    #[inline]
    pub fn kind(&self, token: Token) -> TokenKind {
        self.tokens.kind(token)
    }

    #[inline]
    pub fn lexeme(&self, token: Token) -> &'src str {
        self.tokens.lexeme(token)
    }

    #[inline]
    pub fn span(&self, token: Token) -> Span {
        self.tokens.span(token)
    }

    #[inline]
    pub fn advance(&mut self) {
        let _ = self.next();
    }

    #[inline]
    pub fn current(&self) -> Token {
        Token(self.index as u32)
    }

    #[inline]
    pub fn peek(&self) -> Token {
        Token((self.index + 1) as u32)
    }

    #[inline]
    pub fn prev(&self) -> Token {
        Token(self.index.saturating_sub(1) as u32)
    }
}

impl Iterator for TokenCursor<'_, '_> {
    type Item = Token;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        if self.index == self.tokens.len() {
            return None;
        }

        let token = self.current();
        self.index += 1;
        Some(token)
    }
}

#[derive(Clone, Copy)]
pub struct Token(u32);

impl Token {
    #[inline]
    fn index(&self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, logos::Logos)]
pub enum TokenKind {
    #[token("var")]
    Var,
    #[token("fn")]
    Fn,
    #[token("class")]
    Class,
    #[token("new")]
    New,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("while")]
    While,
    #[token("for")]
    For,
    #[token("foreach")]
    Foreach,
    #[token("in")]
    In,
    #[token("break")]
    Break,
    #[token("continue")]
    Continue,
    #[token("return")]
    Return,
    #[token("try")]
    Try,
    #[token("catch")]
    Catch,
    #[token("raise")]
    Raise,
    #[token("assert")]
    Assert,
    #[token("this")]
    This,
    #[token("not")]
    Not,

    #[token("(")]
    ParenL,
    #[token(")")]
    ParenR,
    #[token("{")]
    BraceL,
    #[token("}")]
    BraceR,
    #[token("[")]
    BracketL,
    #[token("]")]
    BracketR,
    #[token(".")]
    Dot,
    #[token("..")]
    DotDot,
    #[token(",")]
    Comma,
    #[token(":")]
    Colon,
    #[token(";")]
    Semi,

    #[token("=")]
    Eq,
    #[token("+=")]
    PlusEq,
    #[token("-=")]
    MinusEq,
    #[token("*=")]
    StarEq,
    #[token("/=")]
    SlashEq,
    #[token("%=")]
    PercentEq,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token(">")]
    Gt,
    #[token(">=")]
    Ge,
    #[token("<")]
    Lt,
    #[token("<=")]
    Le,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("!")]
    Bang,

    #[regex(r"[a-zA-Z_][a-zA-Z_0-9]*")]
    Ident,
    #[regex(r"[0-9]+", priority = 100)]
    Integer,
    #[regex(r"[0-9]+\.[0-9]+([Ee][+-]?[0-9]+)?", priority = 10)]
    Float,
    #[regex(r#""([^"\\]|\\.)*""#)]
    String,
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("null")]
    Null,

    #[regex(r"[ \t\r\n\f]+", logos::skip)]
    Whitespace,
    #[regex(r"#[^\n]*", logos::skip)]
    Comment,

    Error,
    Eof,
}

impl TokenKind {
    /// Canonical lexeme for fixed tokens, used in parse error messages.
    pub fn bare_lexeme(self) -> &'static str {
        match self {
            TokenKind::Var => "var",
            TokenKind::Fn => "fn",
            TokenKind::Class => "class",
            TokenKind::New => "new",
            TokenKind::If => "if",
            TokenKind::Else => "else",
            TokenKind::While => "while",
            TokenKind::For => "for",
            TokenKind::Foreach => "foreach",
            TokenKind::In => "in",
            TokenKind::Break => "break",
            TokenKind::Continue => "continue",
            TokenKind::Return => "return",
            TokenKind::Try => "try",
            TokenKind::Catch => "catch",
            TokenKind::Raise => "raise",
            TokenKind::Assert => "assert",
            TokenKind::This => "this",
            TokenKind::Not => "not",
            TokenKind::ParenL => "(",
            TokenKind::ParenR => ")",
            TokenKind::BraceL => "{",
            TokenKind::BraceR => "}",
            TokenKind::BracketL => "[",
            TokenKind::BracketR => "]",
            TokenKind::Dot => ".",
            TokenKind::DotDot => "..",
            TokenKind::Comma => ",",
            TokenKind::Colon => ":",
            TokenKind::Semi => ";",
            TokenKind::Eq => "=",
            TokenKind::PlusEq => "+=",
            TokenKind::MinusEq => "-=",
            TokenKind::StarEq => "*=",
            TokenKind::SlashEq => "/=",
            TokenKind::PercentEq => "%=",
            TokenKind::EqEq => "==",
            TokenKind::NotEq => "!=",
            TokenKind::Gt => ">",
            TokenKind::Ge => ">=",
            TokenKind::Lt => "<",
            TokenKind::Le => "<=",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Percent => "%",
            TokenKind::AndAnd => "&&",
            TokenKind::OrOr => "||",
            TokenKind::Bang => "!",
            TokenKind::Ident => "identifier",
            TokenKind::Integer => "integer",
            TokenKind::Float => "float",
            TokenKind::String => "string",
            TokenKind::True => "true",
            TokenKind::False => "false",
            TokenKind::Null => "null",
            TokenKind::Whitespace | TokenKind::Comment | TokenKind::Error => "",
            TokenKind::Eof => "end of input",
        }
    }
}

#[rustfmt::skip]
macro_rules! t {
    (var) => ($crate::token::TokenKind::Var);
    (fn) => ($crate::token::TokenKind::Fn);
    (class) => ($crate::token::TokenKind::Class);
    (new) => ($crate::token::TokenKind::New);
    (if) => ($crate::token::TokenKind::If);
    (else) => ($crate::token::TokenKind::Else);
    (while) => ($crate::token::TokenKind::While);
    (for) => ($crate::token::TokenKind::For);
    (foreach) => ($crate::token::TokenKind::Foreach);
    (in) => ($crate::token::TokenKind::In);
    (break) => ($crate::token::TokenKind::Break);
    (continue) => ($crate::token::TokenKind::Continue);
    (return) => ($crate::token::TokenKind::Return);
    (try) => ($crate::token::TokenKind::Try);
    (catch) => ($crate::token::TokenKind::Catch);
    (raise) => ($crate::token::TokenKind::Raise);
    (assert) => ($crate::token::TokenKind::Assert);
    (this) => ($crate::token::TokenKind::This);
    (not) => ($crate::token::TokenKind::Not);
    ("(") => ($crate::token::TokenKind::ParenL);
    (")") => ($crate::token::TokenKind::ParenR);
    ("{") => ($crate::token::TokenKind::BraceL);
    ("}") => ($crate::token::TokenKind::BraceR);
    ("[") => ($crate::token::TokenKind::BracketL);
    ("]") => ($crate::token::TokenKind::BracketR);
    (.) => ($crate::token::TokenKind::Dot);
    (..) => ($crate::token::TokenKind::DotDot);
    (,) => ($crate::token::TokenKind::Comma);
    (:) => ($crate::token::TokenKind::Colon);
    (;) => ($crate::token::TokenKind::Semi);
    (=) => ($crate::token::TokenKind::Eq);
    (+=) => ($crate::token::TokenKind::PlusEq);
    (-=) => ($crate::token::TokenKind::MinusEq);
    (*=) => ($crate::token::TokenKind::StarEq);
    (/=) => ($crate::token::TokenKind::SlashEq);
    (%=) => ($crate::token::TokenKind::PercentEq);
    (==) => ($crate::token::TokenKind::EqEq);
    (!=) => ($crate::token::TokenKind::NotEq);
    (>) => ($crate::token::TokenKind::Gt);
    (>=) => ($crate::token::TokenKind::Ge);
    (<) => ($crate::token::TokenKind::Lt);
    (<=) => ($crate::token::TokenKind::Le);
    (+) => ($crate::token::TokenKind::Plus);
    (-) => ($crate::token::TokenKind::Minus);
    (*) => ($crate::token::TokenKind::Star);
    (/) => ($crate::token::TokenKind::Slash);
    (%) => ($crate::token::TokenKind::Percent);
    (&&) => ($crate::token::TokenKind::AndAnd);
    (||) => ($crate::token::TokenKind::OrOr);
    (!) => ($crate::token::TokenKind::Bang);

    (ident) => ($crate::token::TokenKind::Ident);
    (int) => ($crate::token::TokenKind::Integer);
    (float) => ($crate::token::TokenKind::Float);
    (str) => ($crate::token::TokenKind::String);
    (true) => ($crate::token::TokenKind::True);
    (false) => ($crate::token::TokenKind::False);
    (null) => ($crate::token::TokenKind::Null);

    (EOF) => ($crate::token::TokenKind::Eof);
}

#[cfg(test)]
mod tests;
