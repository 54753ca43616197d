use crate::GmbcError;
use crate::instruction::{InstructionKind, OpCode, uses_f_table};
use crate::recomp::tokenizer::{Token, TokenCategory, TokenType, TokenValue};
use crate::types::{ComparisonType, DataType, InstanceType, VariableType};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LabelValue {
    /// Raw byte address relative to the code start.
    Int(i64),
    Name(String),
}

/// Opcode to encode for E and F table versions respectively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpPair {
    pub e: OpCode,
    pub f: OpCode,
}

impl OpPair {
    fn same(op: OpCode) -> Self {
        Self { e: op, f: op }
    }

    pub fn for_version(self, version: u32) -> OpCode {
        if uses_f_table(version) { self.f } else { self.e }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Owner {
    Instance(InstanceType),
    /// `[name]`, resolved against the object table when assembling.
    Object(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub owner: Owner,
    pub name: String,
    pub var_type: VariableType,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Constant {
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Single(f32),
    Double(f64),
    Boolean(u32),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Single { ty: DataType, extra: u16 },
    Double { ty1: DataType, ty2: DataType, comparison: Option<ComparisonType> },
    /// `None` is the `!magic` target.
    Branch(Option<LabelValue>),
    Set { ty1: DataType, ty2: DataType, dest: Variable },
    MagicSet,
    PushConst(Constant),
    PushString(String),
    PushVariable(Variable),
    Call { ret: DataType, argc: u16, name: String, var_type: VariableType },
    Break { ty: DataType, signal: i16 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedInstruction {
    pub op: OpPair,
    pub operand: Operand,
    pub line: usize,
    pub column: usize,
}

impl ParsedInstruction {
    pub fn kind(&self) -> InstructionKind {
        self.op.f.kind()
    }

    /// Declared type of a push, used for sizing.
    pub fn push_type(&self) -> Option<DataType> {
        Some(match &self.operand {
            Operand::PushConst(c) => match c {
                Constant::Int16(_) => DataType::Int16,
                Constant::Int32(_) => DataType::Int32,
                Constant::Int64(_) => DataType::Int64,
                Constant::Single(_) => DataType::Single,
                Constant::Double(_) => DataType::Double,
                Constant::Boolean(_) => DataType::Boolean,
            },
            Operand::PushString(_) => DataType::String,
            Operand::PushVariable(_) => DataType::Variable,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Label(LabelValue),
    Instruction(ParsedInstruction),
}

struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
}

impl<'t> Parser<'t> {
    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos)
    }

    fn peek_type(&self) -> Option<TokenType> {
        self.peek().and_then(Token::token_type)
    }

    fn error_at(&self, tok: Option<&Token>, message: String) -> GmbcError {
        let (line, column) = match tok.or(self.tokens.last()) {
            Some(t) => (t.line, t.column),
            None => (1, 1),
        };
        GmbcError::Grammar { line, column, message }
    }

    fn next(&mut self, expected: &str) -> Result<&'t Token, GmbcError> {
        match self.tokens.get(self.pos) {
            Some(t) => {
                self.pos += 1;
                Ok(t)
            }
            None => Err(self.error_at(None, format!("expected {expected}, found end of input"))),
        }
    }

    fn unexpected(&self, tok: &Token, expected: &str) -> GmbcError {
        self.error_at(Some(tok), format!("expected {expected}, found {tok}"))
    }

    fn expect(&mut self, t: TokenType, expected: &str) -> Result<(), GmbcError> {
        let tok = self.next(expected)?;
        if tok.is(t) { Ok(()) } else { Err(self.unexpected(tok, expected)) }
    }

    fn skip_newlines(&mut self) {
        while self.peek_type() == Some(TokenType::Newline) {
            self.pos += 1;
        }
    }

    fn data_type(&mut self) -> Result<DataType, GmbcError> {
        let tok = self.next("a data type")?;
        tok.token_type().and_then(TokenType::data_type).ok_or_else(|| self.unexpected(tok, "a data type"))
    }

    fn type_pair(&mut self) -> Result<(DataType, DataType), GmbcError> {
        let ty1 = self.data_type()?;
        self.expect(TokenType::Colon, "':'")?;
        Ok((ty1, self.data_type()?))
    }

    fn int(&mut self, expected: &str) -> Result<(i64, &'t Token), GmbcError> {
        let tok = self.next(expected)?;
        match tok.value {
            TokenValue::Int(v) => Ok((v, tok)),
            _ => Err(self.unexpected(tok, expected)),
        }
    }

    fn int_in<T: TryFrom<i64>>(&mut self, expected: &str) -> Result<T, GmbcError> {
        let (v, tok) = self.int(expected)?;
        T::try_from(v).map_err(|_| self.error_at(Some(tok), format!("{v} is out of range for {expected}")))
    }

    fn owner(&mut self) -> Result<Owner, GmbcError> {
        const EXPECTED: &str = "an instance type or object name";
        let tok = self.next(EXPECTED)?;
        match &tok.value {
            TokenValue::Normal(t) => t.instance().map(Owner::Instance).ok_or_else(|| self.unexpected(tok, EXPECTED)),
            TokenValue::Word(w) if w.len() > 2 && w.starts_with('[') && w.ends_with(']') => {
                Ok(Owner::Object(w[1..w.len() - 1].to_string()))
            }
            TokenValue::Int(v) => i16::try_from(*v)
                .map(|v| Owner::Instance(InstanceType::from(v)))
                .map_err(|_| self.error_at(Some(tok), format!("instance {v} is out of range"))),
            _ => Err(self.unexpected(tok, EXPECTED)),
        }
    }

    /// Identifier plus its optional variable type suffix.
    fn identifier(&mut self) -> Result<(String, VariableType), GmbcError> {
        let tok = self.next("an identifier")?;
        let name = match &tok.value {
            TokenValue::Word(w) => w.clone(),
            TokenValue::Normal(t) if t.category() != TokenCategory::Other => tok.text.clone(),
            _ => return Err(self.unexpected(tok, "an identifier")),
        };
        if let Some(vt) = self.peek_type().and_then(TokenType::variable_type) {
            self.pos += 1;
            return Ok((name, vt));
        }
        match name.strip_suffix('?') {
            Some(stripped) if !stripped.is_empty() => Ok((stripped.to_string(), VariableType::Unknown)),
            _ => Ok((name, VariableType::Normal)),
        }
    }

    fn variable(&mut self) -> Result<Variable, GmbcError> {
        let owner = self.owner()?;
        self.expect(TokenType::Colon, "':'")?;
        let (name, var_type) = self.identifier()?;
        Ok(Variable { owner, name, var_type })
    }

    fn float(&mut self, ty: DataType) -> Result<f64, GmbcError> {
        let tok = self.next("a number")?;
        match &tok.value {
            TokenValue::Float(v) => Ok(*v),
            TokenValue::Int(v) => Ok(*v as f64),
            TokenValue::Word(w) if matches!(w.as_str(), "inf" | "-inf" | "NaN") => {
                w.parse::<f64>().map_err(|_| self.unexpected(tok, "a number"))
            }
            _ => Err(self.unexpected(tok, &format!("a {ty} literal"))),
        }
    }

    fn constant(&mut self, ty: DataType) -> Result<Operand, GmbcError> {
        Ok(match ty {
            DataType::Int16 => Operand::PushConst(Constant::Int16(self.int_in("an int16 literal")?)),
            DataType::Int32 => Operand::PushConst(Constant::Int32(self.int_in("an int32 literal")?)),
            DataType::Int64 => Operand::PushConst(Constant::Int64(self.int("an int64 literal")?.0)),
            DataType::Double => Operand::PushConst(Constant::Double(self.float(ty)?)),
            DataType::Single => Operand::PushConst(Constant::Single(self.float(ty)? as f32)),
            DataType::Boolean => {
                let tok = self.next("a bool literal")?;
                let v = match &tok.value {
                    TokenValue::Word(w) if w.eq_ignore_ascii_case("true") => 1,
                    TokenValue::Word(w) if w.eq_ignore_ascii_case("false") => 0,
                    TokenValue::Int(v) => u32::try_from(*v)
                        .map_err(|_| self.error_at(Some(tok), format!("{v} is out of range for a bool literal")))?,
                    _ => return Err(self.unexpected(tok, "a bool literal")),
                };
                Operand::PushConst(Constant::Boolean(v))
            }
            DataType::String => {
                let tok = self.next("a string literal")?;
                match &tok.value {
                    TokenValue::String(s) => Operand::PushString(s.clone()),
                    _ => return Err(self.unexpected(tok, "a string literal")),
                }
            }
            DataType::Variable => Operand::PushVariable(self.variable()?),
            DataType::Instance => {
                let tok = &self.tokens[self.pos - 1];
                return Err(self.error_at(Some(tok), "instances cannot be pushed".into()));
            }
        })
    }

    fn branch_target(&mut self) -> Result<Option<LabelValue>, GmbcError> {
        const EXPECTED: &str = "a label or !magic";
        let tok = self.next(EXPECTED)?;
        match &tok.value {
            TokenValue::Int(v) => Ok(Some(LabelValue::Int(*v))),
            TokenValue::Word(w) => Ok(Some(LabelValue::Name(w.clone()))),
            TokenValue::Normal(TokenType::Magic) => Ok(None),
            _ => Err(self.unexpected(tok, EXPECTED)),
        }
    }

    fn instruction(&mut self) -> Result<ParsedInstruction, GmbcError> {
        let tok = self.next("an instruction")?;
        let (line, column) = (tok.line, tok.column);
        let Some((t, op)) = tok.token_type().and_then(|t| Some((t, t.opcode()?))) else {
            return Err(self.unexpected(tok, "an instruction"));
        };

        let (pair, operand) = match t {
            TokenType::Cmp => {
                let ctok = self.next("a comparison")?;
                let comparison = ctok
                    .token_type()
                    .filter(|t| t.category() == TokenCategory::Comparison)
                    .and_then(TokenType::comparison)
                    .ok_or_else(|| self.unexpected(ctok, "a comparison"))?;
                let (ty1, ty2) = self.type_pair()?;
                let pair = OpPair { e: OpCode::for_comparison(comparison), f: OpCode::Cmp };
                (pair, Operand::Double { ty1, ty2, comparison: Some(comparison) })
            }
            TokenType::Clt | TokenType::Cle | TokenType::Ceq | TokenType::Cne | TokenType::Cge | TokenType::Cgt => {
                let (ty1, ty2) = self.type_pair()?;
                (OpPair { e: op, f: OpCode::Cmp }, Operand::Double { ty1, ty2, comparison: t.comparison() })
            }
            TokenType::Dup => {
                let ty = self.data_type()?;
                let extra = match self.peek().map(|t| &t.value) {
                    Some(TokenValue::Int(_)) => self.int_in("a dup size")?,
                    _ => 0,
                };
                (OpPair::same(op), Operand::Single { ty, extra })
            }
            TokenType::Set => {
                let (ty1, ty2) = self.type_pair()?;
                if self.peek_type() == Some(TokenType::Magic) {
                    if (ty1, ty2) != (DataType::Int16, DataType::Variable) {
                        return Err(self.error_at(self.peek(), "a magic set must be int16:var".into()));
                    }
                    self.pos += 1;
                    (OpPair::same(op), Operand::MagicSet)
                } else {
                    (OpPair::same(op), Operand::Set { ty1, ty2, dest: self.variable()? })
                }
            }
            TokenType::Push
            | TokenType::PushCst
            | TokenType::PushLoc
            | TokenType::PushGlb
            | TokenType::PushVar
            | TokenType::PushI16 => {
                let ty = self.data_type()?;
                let operand = self.constant(ty)?;
                let f = if t == TokenType::Push { generic_push(ty, &operand) } else { op };
                (OpPair { e: OpCode::Push, f }, operand)
            }
            TokenType::Call => {
                let ret = self.data_type()?;
                self.expect(TokenType::Colon, "':'")?;
                let argc = self.int_in("an argument count")?;
                let (name, var_type) = self.identifier()?;
                (OpPair::same(op), Operand::Call { ret, argc, name, var_type })
            }
            TokenType::Break => {
                let ty = self.data_type()?;
                (OpPair::same(op), Operand::Break { ty, signal: self.int_in("a break signal")? })
            }
            _ => match op.kind() {
                InstructionKind::DoubleType => {
                    let (ty1, ty2) = self.type_pair()?;
                    (OpPair::same(op), Operand::Double { ty1, ty2, comparison: None })
                }
                InstructionKind::SingleType => (OpPair::same(op), Operand::Single { ty: self.data_type()?, extra: 0 }),
                InstructionKind::Goto => (OpPair::same(op), Operand::Branch(self.branch_target()?)),
                _ => return Err(self.error_at(Some(tok), format!("unsupported instruction {tok}"))),
            },
        };

        Ok(ParsedInstruction { op: pair, operand, line, column })
    }
}

fn generic_push(ty: DataType, operand: &Operand) -> OpCode {
    match (ty, operand) {
        (DataType::Int16, _) => OpCode::PushI16,
        (_, Operand::PushVariable(v)) => match v.owner {
            Owner::Instance(InstanceType::Global) => OpCode::PushGlb,
            Owner::Instance(InstanceType::Local) => OpCode::PushLoc,
            Owner::Instance(i) if i.raw() <= InstanceType::Other.raw() => OpCode::PushVar,
            _ => OpCode::PushCst,
        },
        _ => OpCode::PushCst,
    }
}

/// Parses a token stream into labels and instructions. Every instruction
/// must end its line.
pub fn parse(tokens: &[Token]) -> Result<Vec<Item>, GmbcError> {
    let mut p = Parser { tokens, pos: 0 };
    let mut items = Vec::new();

    p.skip_newlines();
    while let Some(tok) = p.peek() {
        let label = match &tok.value {
            TokenValue::Int(v) => Some(LabelValue::Int(*v)),
            TokenValue::Word(w) => Some(LabelValue::Name(w.clone())),
            _ => None,
        };
        if let Some(label) = label {
            p.pos += 1;
            p.expect(TokenType::Colon, "':' after label")?;
            items.push(Item::Label(label));
            p.skip_newlines();
            continue;
        }

        items.push(Item::Instruction(p.instruction()?));
        match p.peek() {
            None => break,
            Some(t) if t.is(TokenType::Newline) => p.skip_newlines(),
            Some(t) => return Err(p.unexpected(t, "end of line")),
        }
    }

    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recomp::tokenizer::tokenize;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    fn parse_str(src: &str) -> Result<Vec<Item>, GmbcError> {
        parse(&tokenize(src)?)
    }

    fn instr(item: &Item) -> &ParsedInstruction {
        match item {
            Item::Instruction(i) => i,
            other => panic!("expected instruction, got {other:?}"),
        }
    }

    #[test]
    fn parses_labels_and_instructions() {
        let items = parse_str(indoc! {"
            push.i16 int16 5
            brf end
            loop:
            0x00000C:
            br loop
            end:
        "})
        .unwrap();
        assert_eq!(items.len(), 6);
        assert_eq!(instr(&items[0]).operand, Operand::PushConst(Constant::Int16(5)));
        assert_eq!(instr(&items[1]).operand, Operand::Branch(Some(LabelValue::Name("end".into()))));
        assert_eq!(items[2], Item::Label(LabelValue::Name("loop".into())));
        assert_eq!(items[3], Item::Label(LabelValue::Int(0xC)));
        assert_eq!(items[5], Item::Label(LabelValue::Name("end".into())));
        assert_eq!((instr(&items[4]).line, instr(&items[4]).column), (5, 1));
    }

    #[test]
    fn set_and_variable_push() {
        let items = parse_str("set int32:var [obj_player]:y*\npush.var var other:speed?\n").unwrap();
        assert_eq!(
            instr(&items[0]).operand,
            Operand::Set {
                ty1: DataType::Int32,
                ty2: DataType::Variable,
                dest: Variable {
                    owner: Owner::Object("obj_player".into()),
                    name: "y".into(),
                    var_type: VariableType::StackTop
                },
            }
        );
        assert_eq!(
            instr(&items[1]).operand,
            Operand::PushVariable(Variable {
                owner: Owner::Instance(InstanceType::Other),
                name: "speed".into(),
                var_type: VariableType::Unknown,
            })
        );
    }

    #[test]
    fn comparisons_pick_per_table_opcode() {
        let items = parse_str("cmp >= int32:double\nclt var:var\n").unwrap();
        let a = instr(&items[0]);
        assert_eq!(a.op, OpPair { e: OpCode::Cge, f: OpCode::Cmp });
        assert_eq!(
            a.operand,
            Operand::Double { ty1: DataType::Int32, ty2: DataType::Double, comparison: Some(ComparisonType::GreaterOrEqual) }
        );
        let b = instr(&items[1]);
        assert_eq!(b.op.for_version(0xE), OpCode::Clt);
        assert_eq!(b.op.for_version(0x10), OpCode::Cmp);
    }

    #[test]
    fn generic_push_selects_mnemonic() {
        let cases = [
            ("push int16 3", OpCode::PushI16),
            ("push var global:score", OpCode::PushGlb),
            ("push var local:i", OpCode::PushLoc),
            ("push var other:x", OpCode::PushVar),
            ("push var self:x", OpCode::PushCst),
            ("push string \"a\"", OpCode::PushCst),
            ("push.var var self:x", OpCode::PushVar),
        ];
        for (src, want) in cases {
            let items = parse_str(src).unwrap();
            assert_eq!(instr(&items[0]).op.f, want, "Failed for input: {}", src);
            assert_eq!(instr(&items[0]).op.e, OpCode::Push, "Failed for input: {}", src);
        }
    }

    #[test]
    fn literals_and_misc_forms() {
        let items = parse_str(indoc! {r#"
            push.cst double 1.5
            push.cst single 2
            push.cst bool true
            push.cst int64 -9
            push.cst string "hi"
            dup int32 1
            call int32:2 show[]
            break int16 -1
            set int16:var !magic
            popenv !magic
            neg int32
        "#})
        .unwrap();
        let ops: Vec<Operand> = items.iter().map(|i| instr(i).operand.clone()).collect();
        assert_eq!(
            ops,
            vec![
                Operand::PushConst(Constant::Double(1.5)),
                Operand::PushConst(Constant::Single(2.0)),
                Operand::PushConst(Constant::Boolean(1)),
                Operand::PushConst(Constant::Int64(-9)),
                Operand::PushString("hi".into()),
                Operand::Single { ty: DataType::Int32, extra: 1 },
                Operand::Call { ret: DataType::Int32, argc: 2, name: "show".into(), var_type: VariableType::Array },
                Operand::Break { ty: DataType::Int16, signal: -1 },
                Operand::MagicSet,
                Operand::Branch(None),
                Operand::Single { ty: DataType::Int32, extra: 0 },
            ]
        );
    }

    #[test]
    fn errors_carry_position() {
        let cases = [
            ("push.i16 int16 70000", 1, 16),
            ("add int32 int32", 1, 11),
            ("ret int32 extra", 1, 11),
            ("exit int16\nset int32:var self", 2, 15),
            ("push.cst string 5", 1, 17),
            ("set int32:var !magic", 1, 15),
            ("nonsense int32", 1, 10),
        ];
        for (src, line, column) in cases {
            match parse_str(src) {
                Err(GmbcError::Grammar { line: l, column: c, .. }) => {
                    assert_eq!((l, c), (line, column), "Failed for input: {}", src)
                }
                other => panic!("Failed for input: {src}: {other:?}"),
            }
        }
    }

    #[test]
    fn keywords_work_as_identifiers() {
        let items = parse_str("push.var var self:string\n").unwrap();
        match &instr(&items[0]).operand {
            Operand::PushVariable(v) => assert_eq!(v.name, "string"),
            other => panic!("unexpected operand {other:?}"),
        }
    }
}
