//! Token stream producer.
//!
//! The lexer is logically a separate collaborator with a fixed output
//! shape. This module supplies a real
//! implementation of that shape so the crate is a complete, runnable
//! pipeline: it does no semantic work beyond classification, leaving every
//! grammar decision to the parser.

use crate::pool::StrSpan;

/// The closed set of token kinds the parser consumes. Keyword-like
/// variants that carry an inline name (`VarInt`, `Identifier`, ...) still
/// get their text via the token's `span`; `kind` alone disambiguates role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    // Literals
    Number,
    Float,
    SolidNumber,
    String,
    True,
    False,

    // Identifiers / typed variable forms
    Identifier,
    Var,
    VarInt,
    VarFloat,
    VarString,
    VarBool,
    VarSolid,
    VarChar,
    Const,

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
    Semicolon,
    At,
    Pipe,
    Slash,
    Backslash,
    Minus,
    Underscore,
    Question,

    // Arithmetic
    Plus,
    Star,
    Percent,
    StarStar,
    // Minus and division both share their arithmetic role with a
    // punctuation token above (`Minus`, `Slash`) rather than getting a
    // separate arithmetic-context spelling — there's no second lexeme to
    // give them.

    // Comparison
    Lt,
    Gt,
    Le,
    Ge,
    EqEq,
    NotEq,
    BlazeCmpGt, // *>
    BlazeCmpLt, // *_<
    BlazeCmpNe, // *!=

    // Logical
    AndAnd,
    OrOr,
    Bang,

    // Bitwise
    // `|` and `^` reuse the `Pipe`/`JumpMarker` tokens rather than getting
    // dedicated bitwise spellings — see their use in `parser.rs`'s level-3
    // precedence climbing.
    Amp,
    Tilde,
    Shl,
    Shr,

    // Assignment / compound assignment
    Assign,
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    PercentEq,
    StarStarEq,

    // Increment / decrement
    PlusPlus,
    MinusMinus,

    // Control keywords
    If,
    Else,
    While,
    For,
    Return,
    Break,
    Continue,
    Switch,
    Case,
    Default,
    InCase,
    FIf,
    FWhl,
    FEns,
    FChk,
    FTry,
    FGrd,
    FUnl,
    FUnt,
    FVer,
    FMsr,

    // Output
    Print,
    Txt,
    Out,
    Fmt,
    Dyn,

    // Structural
    DoSlash,      // do/
    ForwardConn,  // \>|
    BackwardConn, // \<|
    BlockEnd,     // :>
    // A block-opening `<` (function/conditional body) lexes as the ordinary
    // `Lt` token — there's no distinct lexeme to give it, so the parser
    // disambiguates by position instead of token kind.

    // Timing
    // `<<`/`>>` as timing markers lex as the ordinary `Shl`/`Shr` tokens
    // (same reasoning as block-opening `<` above); the parser tells them
    // apart from the binary shift operators by position (see
    // `parse_primary`).
    TimingBoth, // <>
    Before,
    After,

    // Others
    Asm,
    MathDot,    // math.
    Array4d,    // array.4d
    DeclareSlash, // declare/
    JumpMarker, // ^
    ParamToken, // {@param:name}

    Eof,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: StrSpan,
}

impl Token {
    pub fn new(kind: TokenKind, offset: u32, len: u32) -> Self {
        Token {
            kind,
            span: StrSpan { offset, len },
        }
    }

    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        let start = self.span.offset as usize;
        let end = start + self.span.len as usize;
        &source[start..end]
    }
}

/// Hand-written scanner over the source text. Produces a flat `Vec<Token>`
/// terminated by a single `Eof` token; lexical errors are reported as
/// `Error` tokens so the parser can surface a diagnostic at the right
/// position rather than the lexer aborting outright — a lex error
/// surfaces to the parser as an error-typed token.
pub struct Lexer<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

const KEYWORDS: &[(&str, TokenKind)] = &[
    ("true", TokenKind::True),
    ("false", TokenKind::False),
    ("var", TokenKind::Var),
    ("var.int", TokenKind::VarInt),
    ("var.float", TokenKind::VarFloat),
    ("var.string", TokenKind::VarString),
    ("var.bool", TokenKind::VarBool),
    ("var.solid", TokenKind::VarSolid),
    ("var.char", TokenKind::VarChar),
    ("const", TokenKind::Const),
    ("if", TokenKind::If),
    ("else", TokenKind::Else),
    ("while", TokenKind::While),
    ("for", TokenKind::For),
    ("return", TokenKind::Return),
    ("break", TokenKind::Break),
    ("continue", TokenKind::Continue),
    ("switch", TokenKind::Switch),
    ("case", TokenKind::Case),
    ("default", TokenKind::Default),
    ("incase", TokenKind::InCase),
    ("f.if", TokenKind::FIf),
    ("f.whl", TokenKind::FWhl),
    ("f.ens", TokenKind::FEns),
    ("f.chk", TokenKind::FChk),
    ("f.try", TokenKind::FTry),
    ("f.grd", TokenKind::FGrd),
    ("f.unl", TokenKind::FUnl),
    ("f.unt", TokenKind::FUnt),
    ("f.ver", TokenKind::FVer),
    ("f.msr", TokenKind::FMsr),
    ("print", TokenKind::Print),
    ("txt", TokenKind::Txt),
    ("out", TokenKind::Out),
    ("fmt", TokenKind::Fmt),
    ("dyn", TokenKind::Dyn),
    ("asm", TokenKind::Asm),
    ("math.", TokenKind::MathDot),
    ("array.4d", TokenKind::Array4d),
    ("before", TokenKind::Before),
    ("after", TokenKind::After),
];

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Lexer {
            source,
            bytes: source.as_bytes(),
            pos: 0,
        }
    }

    pub fn tokenize(mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace_and_comments();
            if self.pos >= self.bytes.len() {
                tokens.push(Token::new(TokenKind::Eof, self.pos as u32, 0));
                break;
            }
            tokens.push(self.next_token());
        }
        tokens
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_whitespace() {
                self.pos += 1;
            }
            if self.starts_with("//") {
                while self.pos < self.bytes.len() && self.bytes[self.pos] != b'\n' {
                    self.pos += 1;
                }
                continue;
            }
            break;
        }
    }

    fn starts_with(&self, s: &str) -> bool {
        self.source[self.pos..].starts_with(s)
    }

    fn next_token(&mut self) -> Token {
        let start = self.pos;
        let c = self.bytes[self.pos];

        if c == b'"' {
            return self.lex_string(start);
        }
        if c.is_ascii_digit() {
            return self.lex_number(start);
        }
        if is_ident_start(c) {
            return self.lex_word(start);
        }

        // Multi-char structural/operator tokens, longest match first.
        let multi: &[(&str, TokenKind)] = &[
            ("do/", TokenKind::DoSlash),
            ("declare/", TokenKind::DeclareSlash),
            (":>", TokenKind::BlockEnd),
            ("\\>|", TokenKind::ForwardConn),
            ("\\<|", TokenKind::BackwardConn),
            ("<>", TokenKind::TimingBoth),
            ("*_<", TokenKind::BlazeCmpLt),
            ("*!=", TokenKind::BlazeCmpNe),
            ("**=", TokenKind::StarStarEq),
            ("**", TokenKind::StarStar),
            ("<=", TokenKind::Le),
            (">=", TokenKind::Ge),
            ("==", TokenKind::EqEq),
            ("!=", TokenKind::NotEq),
            ("&&", TokenKind::AndAnd),
            ("||", TokenKind::OrOr),
            ("<<", TokenKind::Shl),
            (">>", TokenKind::Shr),
            ("++", TokenKind::PlusPlus),
            ("--", TokenKind::MinusMinus),
            ("+=", TokenKind::PlusEq),
            ("-=", TokenKind::MinusEq),
            // `*=` is listed under both compound-assignment and "Blaze
            // compare" in the grammar; compound-assign wins the lexical
            // collision since it's the form ordinary arithmetic code
            // actually writes; `*>` below is unambiguous and stays a
            // Blaze-compare token.
            ("*=", TokenKind::StarEq),
            ("*>", TokenKind::BlazeCmpGt),
            ("/=", TokenKind::SlashEq),
            ("%=", TokenKind::PercentEq),
        ];
        for (lexeme, kind) in multi {
            if self.starts_with(lexeme) {
                self.pos += lexeme.len();
                return Token::new(*kind, start as u32, lexeme.len() as u32);
            }
        }
        if self.starts_with("{@param:") {
            let rest = &self.source[self.pos..];
            if let Some(end) = rest.find('}') {
                self.pos += end + 1;
                return Token::new(TokenKind::ParamToken, start as u32, (end + 1) as u32);
            }
        }

        let kind = match c {
            b'(' => TokenKind::LParen,
            b')' => TokenKind::RParen,
            b'[' => TokenKind::LBracket,
            b']' => TokenKind::RBracket,
            b'{' => TokenKind::LBrace,
            b'}' => TokenKind::RBrace,
            b',' => TokenKind::Comma,
            b'.' => TokenKind::Dot,
            b':' => TokenKind::Colon,
            b';' => TokenKind::Semicolon,
            b'@' => TokenKind::At,
            b'|' => TokenKind::Pipe,
            b'/' => TokenKind::Slash,
            b'\\' => TokenKind::Backslash,
            b'-' => TokenKind::Minus,
            b'_' => TokenKind::Underscore,
            b'?' => TokenKind::Question,
            b'+' => TokenKind::Plus,
            b'*' => TokenKind::Star,
            b'%' => TokenKind::Percent,
            b'<' => TokenKind::Lt,
            b'>' => TokenKind::Gt,
            b'!' => TokenKind::Bang,
            b'&' => TokenKind::Amp,
            b'^' => TokenKind::JumpMarker,
            b'~' => TokenKind::Tilde,
            b'=' => TokenKind::Assign,
            _ => {
                self.pos += 1;
                return Token::new(TokenKind::Error, start as u32, 1);
            }
        };
        self.pos += 1;
        Token::new(kind, start as u32, (self.pos - start) as u32)
    }

    fn lex_string(&mut self, start: usize) -> Token {
        self.pos += 1; // opening quote
        while self.pos < self.bytes.len() && self.bytes[self.pos] != b'"' {
            if self.bytes[self.pos] == b'\\' && self.pos + 1 < self.bytes.len() {
                self.pos += 2;
            } else {
                self.pos += 1;
            }
        }
        if self.pos >= self.bytes.len() {
            // Unclosed string: report as an error token covering what we saw.
            return Token::new(TokenKind::Error, start as u32, (self.pos - start) as u32);
        }
        self.pos += 1; // closing quote
        Token::new(
            TokenKind::String,
            start as u32,
            (self.pos - start) as u32,
        )
    }

    fn lex_number(&mut self, start: usize) -> Token {
        while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_digit() {
            self.pos += 1;
        }
        let mut is_float = false;
        if self.pos < self.bytes.len()
            && self.bytes[self.pos] == b'.'
            && self
                .bytes
                .get(self.pos + 1)
                .is_some_and(|b| b.is_ascii_digit())
        {
            is_float = true;
            self.pos += 1;
            while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_digit() {
                self.pos += 1;
            }
        }
        // Solid-number literal: trailing `~` marks an extended-precision
        // literal Solid variant; parsed-not-lowered.
        if self.pos < self.bytes.len() && self.bytes[self.pos] == b'~' {
            self.pos += 1;
            return Token::new(
                TokenKind::SolidNumber,
                start as u32,
                (self.pos - start) as u32,
            );
        }
        let kind = if is_float {
            TokenKind::Float
        } else {
            TokenKind::Number
        };
        Token::new(kind, start as u32, (self.pos - start) as u32)
    }

    fn lex_word(&mut self, start: usize) -> Token {
        while self.pos < self.bytes.len() && is_ident_continue(self.bytes[self.pos]) {
            self.pos += 1;
        }
        let text = &self.source[start..self.pos];
        for (lexeme, kind) in KEYWORDS {
            if *lexeme == text {
                return Token::new(*kind, start as u32, (self.pos - start) as u32);
            }
        }
        Token::new(
            TokenKind::Identifier,
            start as u32,
            (self.pos - start) as u32,
        )
    }
}

fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

fn is_ident_continue(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_' || c == b'-' || c == b'.'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src).tokenize().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn lexes_var_decl() {
        let ks = kinds("var x = 41");
        assert_eq!(
            ks,
            vec![
                TokenKind::Var,
                TokenKind::Identifier,
                TokenKind::Assign,
                TokenKind::Number,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn lexes_string_literal() {
        let toks = Lexer::new("\"hello\\n\"").tokenize();
        assert_eq!(toks[0].kind, TokenKind::String);
    }

    #[test]
    fn unclosed_string_is_error_token() {
        let toks = Lexer::new("\"oops").tokenize();
        assert_eq!(toks[0].kind, TokenKind::Error);
    }

    #[test]
    fn lexes_float_literal() {
        let ks = kinds("2.5");
        assert_eq!(ks, vec![TokenKind::Float, TokenKind::Eof]);
    }

    #[test]
    fn lexes_power_operator_before_star() {
        let ks = kinds("x ** 2");
        assert_eq!(
            ks,
            vec![
                TokenKind::Identifier,
                TokenKind::StarStar,
                TokenKind::Number,
                TokenKind::Eof
            ]
        );
    }
}
