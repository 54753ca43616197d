use std::fmt;

use crate::GmbcError;
use crate::instruction::OpCode;
use crate::types::{ComparisonType, DataType, InstanceType, VariableType};

/// Keyword and punctuation tokens. Variants of one category are contiguous,
/// and [`TokenType::category`] relies on that order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum TokenType {
    Colon,
    Newline,

    Conv,
    Mul,
    Div,
    Rem,
    Mod,
    Add,
    Sub,
    And,
    Or,
    Xor,
    Neg,
    Not,
    Shl,
    Shr,
    Clt,
    Cle,
    Ceq,
    Cne,
    Cge,
    Cgt,
    Set,
    Dup,
    Ret,
    Exit,
    Pop,
    Br,
    Brt,
    Brf,
    PushEnv,
    PopEnv,
    Push,
    Call,
    Break,
    Cmp,
    PushCst,
    PushLoc,
    PushGlb,
    PushVar,
    PushI16,

    Double,
    Single,
    Int16,
    Int32,
    Int64,
    Bool,
    Var,
    String,
    Inst,

    Stog,
    SelfInst,
    Other,
    All,
    Noone,
    Global,
    Unknown,
    Local,

    Array,
    StackTop,

    Lt,
    Le,
    Eq,
    Ne,
    Ge,
    Gt,

    Magic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenCategory {
    Other,
    OpCode,
    DataType,
    InstanceType,
    VariableType,
    Comparison,
}

impl TokenType {
    pub fn category(self) -> TokenCategory {
        match self {
            t if t <= TokenType::Newline || t == TokenType::Magic => TokenCategory::Other,
            t if t <= TokenType::PushI16 => TokenCategory::OpCode,
            t if t <= TokenType::Inst => TokenCategory::DataType,
            t if t <= TokenType::Local => TokenCategory::InstanceType,
            t if t <= TokenType::StackTop => TokenCategory::VariableType,
            _ => TokenCategory::Comparison,
        }
    }

    pub fn keyword(word: &str) -> Option<TokenType> {
        use TokenType::*;
        Some(match word.to_ascii_lowercase().as_str() {
            "conv" => Conv,
            "mul" => Mul,
            "div" => Div,
            "rem" => Rem,
            "mod" => Mod,
            "add" => Add,
            "sub" => Sub,
            "and" => And,
            "or" => Or,
            "xor" => Xor,
            "neg" => Neg,
            "not" => Not,
            "shl" => Shl,
            "shr" => Shr,
            "clt" => Clt,
            "cle" => Cle,
            "ceq" => Ceq,
            "cne" => Cne,
            "cge" => Cge,
            "cgt" => Cgt,
            "set" => Set,
            "dup" => Dup,
            "ret" => Ret,
            "exit" => Exit,
            "pop" => Pop,
            "br" => Br,
            "brt" => Brt,
            "brf" => Brf,
            "pushenv" => PushEnv,
            "popenv" => PopEnv,
            "push" => Push,
            "call" => Call,
            "break" => Break,
            "cmp" => Cmp,
            "push.cst" => PushCst,
            "push.loc" => PushLoc,
            "push.glb" => PushGlb,
            "push.var" => PushVar,
            "push.i16" => PushI16,

            "double" => Double,
            "single" => Single,
            "int16" => Int16,
            "int32" => Int32,
            "int64" => Int64,
            "bool" | "boolean" => Bool,
            "var" | "variable" => Var,
            "string" => String,
            "inst" => Inst,

            "stog" => Stog,
            "self" => SelfInst,
            "other" => Other,
            "all" => All,
            "noone" => Noone,
            "global" => Global,
            "unknown" => Unknown,
            "local" => Local,

            "[]" => Array,
            "*" => StackTop,

            "<" => Lt,
            "<=" => Le,
            "==" => Eq,
            "!=" => Ne,
            ">=" => Ge,
            ">" => Gt,

            "!magic" => Magic,
            _ => return None,
        })
    }

    pub fn opcode(self) -> Option<OpCode> {
        use TokenType::*;
        Some(match self {
            Conv => OpCode::Conv,
            Mul => OpCode::Mul,
            Div => OpCode::Div,
            Rem => OpCode::Rem,
            Mod => OpCode::Mod,
            Add => OpCode::Add,
            Sub => OpCode::Sub,
            And => OpCode::And,
            Or => OpCode::Or,
            Xor => OpCode::Xor,
            Neg => OpCode::Neg,
            Not => OpCode::Not,
            Shl => OpCode::Shl,
            Shr => OpCode::Shr,
            Clt => OpCode::Clt,
            Cle => OpCode::Cle,
            Ceq => OpCode::Ceq,
            Cne => OpCode::Cne,
            Cge => OpCode::Cge,
            Cgt => OpCode::Cgt,
            Set => OpCode::Set,
            Dup => OpCode::Dup,
            Ret => OpCode::Ret,
            Exit => OpCode::Exit,
            Pop => OpCode::Pop,
            Br => OpCode::Br,
            Brt => OpCode::Brt,
            Brf => OpCode::Brf,
            PushEnv => OpCode::PushEnv,
            PopEnv => OpCode::PopEnv,
            Push => OpCode::Push,
            Call => OpCode::Call,
            Break => OpCode::Break,
            Cmp => OpCode::Cmp,
            PushCst => OpCode::PushCst,
            PushLoc => OpCode::PushLoc,
            PushGlb => OpCode::PushGlb,
            PushVar => OpCode::PushVar,
            PushI16 => OpCode::PushI16,
            _ => return None,
        })
    }

    pub fn data_type(self) -> Option<DataType> {
        Some(match self {
            TokenType::Double => DataType::Double,
            TokenType::Single => DataType::Single,
            TokenType::Int16 => DataType::Int16,
            TokenType::Int32 => DataType::Int32,
            TokenType::Int64 => DataType::Int64,
            TokenType::Bool => DataType::Boolean,
            TokenType::Var => DataType::Variable,
            TokenType::String => DataType::String,
            TokenType::Inst => DataType::Instance,
            _ => return None,
        })
    }

    pub fn instance(self) -> Option<InstanceType> {
        Some(match self {
            TokenType::Stog => InstanceType::StackTopOrGlobal,
            TokenType::SelfInst => InstanceType::SelfInstance,
            TokenType::Other => InstanceType::Other,
            TokenType::All => InstanceType::All,
            TokenType::Noone => InstanceType::Noone,
            TokenType::Global => InstanceType::Global,
            TokenType::Unknown => InstanceType::Unknown,
            TokenType::Local => InstanceType::Local,
            _ => return None,
        })
    }

    pub fn variable_type(self) -> Option<VariableType> {
        match self {
            TokenType::Array => Some(VariableType::Array),
            TokenType::StackTop => Some(VariableType::StackTop),
            _ => None,
        }
    }

    pub fn comparison(self) -> Option<ComparisonType> {
        Some(match self {
            TokenType::Lt | TokenType::Clt => ComparisonType::LowerThan,
            TokenType::Le | TokenType::Cle => ComparisonType::LowerOrEqual,
            TokenType::Eq | TokenType::Ceq => ComparisonType::Equal,
            TokenType::Ne | TokenType::Cne => ComparisonType::NotEqual,
            TokenType::Ge | TokenType::Cge => ComparisonType::GreaterOrEqual,
            TokenType::Gt | TokenType::Cgt => ComparisonType::GreaterThan,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenValue {
    Int(i64),
    Float(f64),
    String(String),
    Word(String),
    Normal(TokenType),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub value: TokenValue,
    /// Source text as written.
    pub text: String,
    pub line: usize,
    pub column: usize,
}

impl Token {
    pub fn token_type(&self) -> Option<TokenType> {
        match self.value {
            TokenValue::Normal(t) => Some(t),
            _ => None,
        }
    }

    pub fn is(&self, t: TokenType) -> bool {
        self.token_type() == Some(t)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            TokenValue::Normal(TokenType::Newline) => f.write_str("end of line"),
            _ => write!(f, "'{}'", self.text),
        }
    }
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some('b') => out.push('\u{8}'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn parse_int(word: &str) -> Option<i64> {
    let (negative, digits) = match word.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, word),
    };
    // magnitude as u64 so that i64::MIN is reachable
    let magnitude = match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<u64>().ok()?,
    };
    if negative { 0i64.checked_sub_unsigned(magnitude) } else { i64::try_from(magnitude).ok() }
}

fn parse_float(word: &str) -> Option<f64> {
    let first = word.chars().next()?;
    if !(first.is_ascii_digit() || matches!(first, '-' | '+' | '.')) {
        return None;
    }
    word.parse::<f64>().ok()
}

struct Scanner {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    line_start: usize,
}

impl Scanner {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.chars.get(self.pos + n).copied()
    }

    fn column(&self) -> usize {
        self.pos - self.line_start + 1
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.line_start = self.pos;
        }
        Some(c)
    }

    fn at_comment(&self) -> bool {
        match (self.peek(), self.peek_at(1)) {
            (Some(';'), _) => true,
            (Some('/'), Some('/' | '*')) => true,
            _ => false,
        }
    }

    fn skip_comment(&mut self) {
        if self.peek() == Some('/') && self.peek_at(1) == Some('*') {
            self.pos += 2;
            while self.peek().is_some() && !(self.peek() == Some('*') && self.peek_at(1) == Some('/')) {
                self.bump();
            }
            self.pos = (self.pos + 2).min(self.chars.len());
        } else {
            while self.peek().is_some_and(|c| c != '\n') {
                self.pos += 1;
            }
        }
    }

    fn at_word_end(&self) -> bool {
        match self.peek() {
            None => true,
            Some(c) if c.is_whitespace() => true,
            Some(':' | '*' | '"') => true,
            Some('[') => self.peek_at(1) == Some(']'),
            _ => self.at_comment(),
        }
    }
}

/// Splits assembly text into tokens. Line breaks are kept as `Newline`
/// tokens, other whitespace and comments are dropped.
pub fn tokenize(source: &str) -> Result<Vec<Token>, GmbcError> {
    let normalized = source.replace("\r\n", "\n").replace('\r', "\n");
    let mut s = Scanner { chars: normalized.chars().collect(), pos: 0, line: 1, line_start: 0 };
    let mut tokens = Vec::new();

    while let Some(c) = s.peek() {
        let (line, column, start) = (s.line, s.column(), s.pos);
        let normal = |t: TokenType, text: &str| Token {
            value: TokenValue::Normal(t),
            text: text.to_string(),
            line,
            column,
        };

        if c == '\n' {
            s.bump();
            tokens.push(normal(TokenType::Newline, "\n"));
        } else if c.is_whitespace() {
            s.bump();
        } else if s.at_comment() {
            s.skip_comment();
        } else if c == ':' {
            s.bump();
            tokens.push(normal(TokenType::Colon, ":"));
        } else if c == '*' {
            s.bump();
            tokens.push(normal(TokenType::StackTop, "*"));
        } else if c == '[' && s.peek_at(1) == Some(']') {
            s.pos += 2;
            tokens.push(normal(TokenType::Array, "[]"));
        } else if c == '"' {
            s.bump();
            let mut escaped = false;
            loop {
                match s.bump() {
                    None | Some('\n') => {
                        return Err(GmbcError::Grammar { line, column, message: "unterminated string".into() });
                    }
                    Some('"') if !escaped => break,
                    Some(ch) => escaped = ch == '\\' && !escaped,
                }
            }
            let text: String = s.chars[start..s.pos].iter().collect();
            let inner = unescape(&text[1..text.len() - 1]);
            tokens.push(Token { value: TokenValue::String(inner), text, line, column });
        } else {
            while !s.at_word_end() {
                s.pos += 1;
            }
            let word: String = s.chars[start..s.pos].iter().collect();
            let value = if let Some(t) = TokenType::keyword(&word) {
                TokenValue::Normal(t)
            } else if let Some(v) = parse_int(&word) {
                TokenValue::Int(v)
            } else if let Some(v) = parse_float(&word) {
                TokenValue::Float(v)
            } else {
                TokenValue::Word(word.clone())
            };
            tokens.push(Token { value, text: word, line, column });
        }
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn values(src: &str) -> Vec<TokenValue> {
        tokenize(src).unwrap().into_iter().map(|t| t.value).collect()
    }

    use TokenValue::{Float, Int, Normal, Word};

    #[test]
    fn set_line_tokens() {
        assert_eq!(
            values("set int32:variable self:foo\n"),
            vec![
                Normal(TokenType::Set),
                Normal(TokenType::Int32),
                Normal(TokenType::Colon),
                Normal(TokenType::Var),
                Normal(TokenType::SelfInst),
                Normal(TokenType::Colon),
                Word("foo".into()),
                Normal(TokenType::Newline),
            ]
        );
    }

    #[test]
    fn categories_follow_ranges() {
        let cases = [
            (TokenType::Colon, TokenCategory::Other),
            (TokenType::Magic, TokenCategory::Other),
            (TokenType::Conv, TokenCategory::OpCode),
            (TokenType::PushI16, TokenCategory::OpCode),
            (TokenType::Double, TokenCategory::DataType),
            (TokenType::Inst, TokenCategory::DataType),
            (TokenType::Stog, TokenCategory::InstanceType),
            (TokenType::Local, TokenCategory::InstanceType),
            (TokenType::Array, TokenCategory::VariableType),
            (TokenType::StackTop, TokenCategory::VariableType),
            (TokenType::Lt, TokenCategory::Comparison),
            (TokenType::Gt, TokenCategory::Comparison),
        ];
        for (t, want) in cases {
            assert_eq!(t.category(), want, "Failed for input: {:?}", t);
        }
    }

    #[test]
    fn keywords_are_case_insensitive() {
        assert_eq!(
            values("PUSH.CST Int16 5\nCall int32:2 Foo[]"),
            vec![
                Normal(TokenType::PushCst),
                Normal(TokenType::Int16),
                Int(5),
                Normal(TokenType::Newline),
                Normal(TokenType::Call),
                Normal(TokenType::Int32),
                Normal(TokenType::Colon),
                Int(2),
                Word("Foo".into()),
                Normal(TokenType::Array),
            ]
        );
    }

    #[test]
    fn special_tokens_abut_words() {
        assert_eq!(
            values("[obj_player]:y* 0x1C: -3 1.5 !magic"),
            vec![
                Word("[obj_player]".into()),
                Normal(TokenType::Colon),
                Word("y".into()),
                Normal(TokenType::StackTop),
                Int(0x1C),
                Normal(TokenType::Colon),
                Int(-3),
                Float(1.5),
                Normal(TokenType::Magic),
            ]
        );
    }

    #[test]
    fn comments_and_line_endings() {
        let toks = tokenize("exit int16 ; trailing\r\n// whole line\r/* block\n */ ret var").unwrap();
        let got: Vec<TokenValue> = toks.iter().map(|t| t.value.clone()).collect();
        assert_eq!(
            got,
            vec![
                Normal(TokenType::Exit),
                Normal(TokenType::Int16),
                Normal(TokenType::Newline),
                Normal(TokenType::Newline),
                Normal(TokenType::Ret),
                Normal(TokenType::Var),
            ]
        );
        assert_eq!((toks[4].line, toks[4].column), (4, 5));
    }

    #[test]
    fn strings_are_unescaped() {
        let toks = tokenize(r#"push.cst string "a \"b\": c;\n\\""#).unwrap();
        assert_eq!(toks[2].value, TokenValue::String("a \"b\": c;\n\\".into()));
        assert_eq!(toks.len(), 3);
    }

    #[test]
    fn integer_extremes() {
        let cases = [
            ("-9223372036854775808", TokenValue::Int(i64::MIN)),
            ("9223372036854775807", TokenValue::Int(i64::MAX)),
            ("-0x8000000000000000", TokenValue::Int(i64::MIN)),
            ("0x7FFFFFFFFFFFFFFF", TokenValue::Int(i64::MAX)),
            ("-32768", TokenValue::Int(-32768)),
            ("9223372036854775808", TokenValue::Float(9_223_372_036_854_775_808.0)),
        ];
        for (input, expected) in cases {
            let toks = tokenize(input).unwrap();
            assert_eq!(toks[0].value, expected, "Failed for input: {}", input);
        }
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let err = tokenize("push.cst string \"abc\n").unwrap_err();
        assert!(matches!(err, GmbcError::Grammar { line: 1, column: 17, .. }));
    }
}
