use crate::{
    source::{SourceOffset, SourceSpan},
    SourceReference,
};
use derive_new::new;
use miette::Diagnostic;
use strum::EnumDiscriminants;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum LexError {
    #[error("Unexpected character: {character:?}")]
    UnexpectedChar {
        character: char,
        #[label("Character found here")]
        at: SourceOffset,
        #[source_code]
        source_code: SourceReference,
    },
    #[error("Unterminated text literal")]
    UnterminatedText {
        #[label("Text literal starts here and is never closed")]
        at: SourceOffset,
        #[source_code]
        source_code: SourceReference,
    },
}

impl LexError {
    pub fn offset(&self) -> SourceOffset {
        match self {
            Self::UnexpectedChar { at, .. } | Self::UnterminatedText { at, .. } => *at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, new)]
pub struct Token {
    pub token_type: TokenType,
    pub lexeme: String,
    pub span: SourceSpan,
}

#[derive(Debug, Clone, PartialEq, EnumDiscriminants)]
#[strum_discriminants(name(TokenTypeName))]
pub enum TokenType {
    // block families: start / chain / end
    StmtBlockStart,
    StmtBlockChain,
    StmtBlockEnd,
    ExprBlockStart,
    ExprBlockChain,
    ExprBlockEnd,
    FnBlockStart,
    FnBlockChain,
    FnBlockEnd,
    BranchBlockStart,
    BranchBlockChain,
    BranchBlockEnd,
    ArrayBlockStart,
    ArrayBlockChain,
    ArrayBlockEnd,
    // colon family
    Has,
    Bind,
    Present,
    Cast,
    Colon,
    // comparison
    EqualEqual,
    BangEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    // logical
    And,
    Or,
    Not,
    // arithmetic
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    // flow
    Pipe,
    ArrowRight,
    ArrowLeft,
    // define
    Equal,
    DefineEmpty,
    Guard,
    // punctuation
    OpenParen,
    CloseParen,
    Comma,
    Semicolon,
    // literals
    Integer,
    Decimal,
    Text(String),
    Identifier(String),
    // keywords
    NumType,
    DecType,
    TextType,
    Void,
    Fn,
    Ret,
    Loc,
    Eof,
}

impl TokenType {
    pub fn is_block_start(&self) -> bool {
        use TokenType::*;
        matches!(
            self,
            StmtBlockStart | ExprBlockStart | FnBlockStart | BranchBlockStart | ArrayBlockStart
        )
    }
    pub fn is_segment_boundary(&self) -> bool {
        use TokenType::*;
        matches!(
            self,
            StmtBlockChain
                | StmtBlockEnd
                | ExprBlockChain
                | ExprBlockEnd
                | FnBlockChain
                | FnBlockEnd
                | BranchBlockChain
                | BranchBlockEnd
                | ArrayBlockChain
                | ArrayBlockEnd
        )
    }
    pub fn is_block_end(&self) -> bool {
        use TokenType::*;
        matches!(
            self,
            StmtBlockEnd | ExprBlockEnd | FnBlockEnd | BranchBlockEnd | ArrayBlockEnd
        )
    }
}

/// Two-character tokens. Every compound is tried before the single
/// character it starts with, so `::` never splits into `:` `:` and `}{`
/// never splits into `}` `{`.
fn match_compound(first: char, second: char) -> Option<TokenType> {
    use TokenType::*;
    Some(match (first, second) {
        // block families
        (':', '{') => StmtBlockStart,
        ('}', '{') => StmtBlockChain,
        ('}', ':') => StmtBlockEnd,
        (':', '[') => ExprBlockStart,
        (']', '[') => ExprBlockChain,
        (']', ':') => ExprBlockEnd,
        (':', '(') => FnBlockStart,
        (')', '(') => FnBlockChain,
        (')', ':') => FnBlockEnd,
        (':', '|') => BranchBlockStart,
        ('|', '|') => BranchBlockChain,
        ('|', ':') => BranchBlockEnd,
        (':', '<') => ArrayBlockStart,
        ('>', '<') => ArrayBlockChain,
        ('>', ':') => ArrayBlockEnd,
        // colon family
        (':', ':') => Has,
        (':', '=') => Bind,
        (':', '?') => Present,
        (':', '>') => Cast,
        // comparison
        ('=', '=') => EqualEqual,
        ('!', '=') => BangEqual,
        ('<', '=') => LessEqual,
        ('>', '=') => GreaterEqual,
        // logical
        ('&', '?') => And,
        ('|', '?') => Or,
        ('!', '?') => Not,
        // flow
        ('|', '>') => Pipe,
        ('-', '>') => ArrowRight,
        ('<', '-') => ArrowLeft,
        // define / guard
        ('=', ';') => DefineEmpty,
        ('?', '=') => Guard,
        _ => return None,
    })
}

fn match_single(ch: char) -> Option<TokenType> {
    use TokenType::*;
    Some(match ch {
        ':' => Colon,
        '<' => Less,
        '>' => Greater,
        '+' => Plus,
        '-' => Minus,
        '*' => Star,
        '/' => Slash,
        '%' => Percent,
        '=' => Equal,
        '(' => OpenParen,
        ')' => CloseParen,
        ',' => Comma,
        ';' => Semicolon,
        _ => return None,
    })
}

fn match_keyword(word: &str) -> Option<TokenType> {
    use TokenType::*;
    Some(match word {
        "num" => NumType,
        "dec" => DecType,
        "text" => TextType,
        "void" => Void,
        "fn" => Fn,
        "ret" => Ret,
        "loc" => Loc,
        _ => return None,
    })
}

fn is_word_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_'
}

/// Single pass, no backtracking. Yields tokens up to and including `Eof`, or
/// stops for good after the first error.
pub struct Scanner<'a> {
    source: &'a str,
    source_reference: SourceReference,
    offset: usize,
    token_start: usize,
    at_end: bool,
}

impl<'a> Scanner<'a> {
    pub fn new(source: &'a str, source_reference: SourceReference) -> Self {
        Self {
            source,
            source_reference,
            offset: 0,
            token_start: 0,
            at_end: false,
        }
    }

    /// Scans a whole source text, failing on the first lexical error.
    pub fn scan(source: &str) -> Result<Vec<Token>, LexError> {
        Scanner::new(source, SourceReference::anonymous(source)).collect()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek(1)?;
        self.offset += ch.len_utf8();
        Some(ch)
    }

    fn advance_while<F: Fn(char) -> bool>(&mut self, check: F) {
        while matches!(self.peek(1), Some(ch) if check(ch)) {
            self.advance();
        }
    }

    fn peek(&self, offset: usize) -> Option<char> {
        assert!(offset > 0);
        self.source[self.offset..].chars().nth(offset - 1)
    }

    fn begin_token(&mut self) {
        self.token_start = self.offset;
    }

    fn yield_token(&self, token_type: TokenType) -> Token {
        Token::new(
            token_type,
            self.source[self.token_start..self.offset].to_string(),
            (self.token_start..self.offset).into(),
        )
    }

    fn unexpected_char(&self, character: char, at: usize) -> LexError {
        LexError::UnexpectedChar {
            character,
            at: at.into(),
            source_code: self.source_reference.clone(),
        }
    }

    fn scan_word(&mut self) -> Result<Token, LexError> {
        self.advance_while(is_word_char);
        let source = self.source;
        let word = &source[self.token_start..self.offset];
        if !word.bytes().all(|b| b.is_ascii_digit()) {
            return Ok(match match_keyword(word) {
                Some(keyword) => self.yield_token(keyword),
                None => self.yield_token(TokenType::Identifier(word.to_string())),
            });
        }

        if self.peek(1) != Some('.') {
            return Ok(self.yield_token(TokenType::Integer));
        }
        // digits '.' digits, and nothing word-like or dotted right after
        let dot_at = self.offset;
        if !matches!(self.peek(2), Some(ch) if ch.is_ascii_digit()) {
            return Err(self.unexpected_char('.', dot_at));
        }
        self.advance();
        self.advance_while(|ch| ch.is_ascii_digit());
        match self.peek(1) {
            Some(ch) if ch == '.' || is_word_char(ch) => Err(self.unexpected_char(ch, self.offset)),
            _ => Ok(self.yield_token(TokenType::Decimal)),
        }
    }

    fn scan_text(&mut self) -> Result<Token, LexError> {
        self.advance_while(|ch| ch != '"');
        if self.advance().is_none() {
            return Err(LexError::UnterminatedText {
                at: self.token_start.into(),
                source_code: self.source_reference.clone(),
            });
        }
        let contents = &self.source[self.token_start + 1..self.offset - 1];
        Ok(self.yield_token(TokenType::Text(contents.to_string())))
    }
}

impl<'a> Iterator for Scanner<'a> {
    type Item = Result<Token, LexError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.at_end {
            return None;
        }

        self.advance_while(char::is_whitespace);
        self.begin_token();

        let ch = match self.advance() {
            None => {
                self.at_end = true;
                return Some(Ok(self.yield_token(TokenType::Eof)));
            }
            Some(ch) => ch,
        };

        let result = if is_word_char(ch) {
            self.scan_word()
        } else if ch == '"' {
            self.scan_text()
        } else if let Some(token_type) = self.peek(1).and_then(|next| match_compound(ch, next)) {
            self.advance();
            Ok(self.yield_token(token_type))
        } else if let Some(token_type) = match_single(ch) {
            Ok(self.yield_token(token_type))
        } else {
            Err(self.unexpected_char(ch, self.token_start))
        };

        if result.is_err() {
            self.at_end = true;
        }
        Some(result)
    }
}
