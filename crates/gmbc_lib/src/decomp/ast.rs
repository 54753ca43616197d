use std::fmt;
use std::rc::Rc;

use crate::types::{BranchType, ComparisonType, DataType, InstanceType, VariableType};

/// Shared handle to an expression node. Sharing only happens for values
/// duplicated on the operand stack.
pub type ExprRef = Rc<Expression>;

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Single(f32),
    Double(f64),
    Boolean(bool),
    String(String),
}

impl Literal {
    pub fn data_type(&self) -> DataType {
        match self {
            Literal::Int16(_) => DataType::Int16,
            Literal::Int32(_) => DataType::Int32,
            Literal::Int64(_) => DataType::Int64,
            Literal::Single(_) => DataType::Single,
            Literal::Double(_) => DataType::Double,
            Literal::Boolean(_) => DataType::Boolean,
            Literal::String(_) => DataType::String,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Int16(v) => write!(f, "{v}s"),
            Literal::Int32(v) => write!(f, "{v}"),
            Literal::Int64(v) => write!(f, "{v}L"),
            Literal::Single(v) => write!(f, "{v}f"),
            Literal::Double(v) => write!(f, "{v}d"),
            Literal::Boolean(v) => write!(f, "{v}"),
            Literal::String(s) => write!(f, "\"{}\"", escape(s)),
        }
    }
}

pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\u{8}' => out.push_str("\\b"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Complement,
    Convert,
    /// Marks a duplicated value whose expression must not be evaluated twice.
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Mod,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Compare(Option<ComparisonType>),
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "rem",
            BinaryOp::Mod => "%",
            BinaryOp::And => "&",
            BinaryOp::Or => "|",
            BinaryOp::Xor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::Compare(Some(c)) => c.symbol(),
            BinaryOp::Compare(None) => "cmp",
        }
    }
}

/// Owner of a variable with a fixed instance. `name` is set for resolvable
/// object indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner {
    pub instance: InstanceType,
    pub name: Option<String>,
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(n) => write!(f, "[{n}]"),
            None => write!(f, "{}", self.instance),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(Literal),
    Variable {
        owner: Owner,
        name: String,
        var_type: VariableType,
        ty: DataType,
        indices: Option<Vec<ExprRef>>,
    },
    /// Variable read through an owner taken from the stack.
    Member {
        owner: ExprRef,
        name: String,
        var_type: VariableType,
        ty: DataType,
        indices: Option<Vec<ExprRef>>,
    },
    Unary {
        op: UnaryOp,
        input: ExprRef,
        ty: DataType,
        original: DataType,
    },
    Binary {
        op: BinaryOp,
        lhs: ExprRef,
        rhs: ExprRef,
        ty: DataType,
        original: DataType,
    },
    Call {
        name: String,
        var_type: VariableType,
        ty: DataType,
        args: Vec<ExprRef>,
    },
    Assert {
        signal: i16,
        ty: DataType,
        expr: ExprRef,
    },
    /// A value popped from an empty stack.
    Popped,
}

impl Expression {
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Expression::Literal(l) => Some(l.data_type()),
            Expression::Variable { ty, .. }
            | Expression::Member { ty, .. }
            | Expression::Unary { ty, .. }
            | Expression::Binary { ty, .. }
            | Expression::Call { ty, .. }
            | Expression::Assert { ty, .. } => Some(*ty),
            Expression::Popped => None,
        }
    }

    pub fn contains_call(&self) -> bool {
        let any = |v: &[ExprRef]| v.iter().any(|e| e.contains_call());
        match self {
            Expression::Call { .. } => true,
            Expression::Literal(_) | Expression::Popped => false,
            Expression::Variable { indices, .. } => indices.as_deref().is_some_and(any),
            Expression::Member { owner, indices, .. } => owner.contains_call() || indices.as_deref().is_some_and(any),
            Expression::Unary { input, .. } => input.contains_call(),
            Expression::Binary { lhs, rhs, .. } => lhs.contains_call() || rhs.contains_call(),
            Expression::Assert { expr, .. } => expr.contains_call(),
        }
    }
}

fn write_indices(f: &mut fmt::Formatter<'_>, indices: &[ExprRef]) -> fmt::Result {
    f.write_str("[")?;
    for (i, e) in indices.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{e}")?;
    }
    f.write_str("]")
}

fn write_access(
    f: &mut fmt::Formatter<'_>,
    var_type: VariableType,
    indices: &Option<Vec<ExprRef>>,
    suffix_otherwise: bool,
) -> fmt::Result {
    match indices {
        Some(ix) if var_type == VariableType::Array => write_indices(f, ix),
        _ if suffix_otherwise => f.write_str(var_type.suffix()),
        _ => Ok(()),
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Literal(l) => write!(f, "{l}"),
            Expression::Variable { owner, name, var_type, indices, .. } => {
                write!(f, "{owner}.{name}")?;
                write_access(f, *var_type, indices, true)
            }
            Expression::Member { owner, name, var_type, indices, .. } => {
                write!(f, "{owner}:{name}")?;
                write_access(f, *var_type, indices, false)
            }
            Expression::Unary { op: UnaryOp::Duplicate, ty, .. } => write!(f, "(dup {ty})"),
            Expression::Unary { op, input, ty, .. } => {
                let sym = match op {
                    UnaryOp::Negate => "-",
                    UnaryOp::Complement => "~",
                    UnaryOp::Convert | UnaryOp::Duplicate => ty.pretty(),
                };
                write!(f, "({sym} {input})")
            }
            Expression::Binary { op, lhs, rhs, .. } => write!(f, "({} {lhs} {rhs})", op.symbol()),
            Expression::Call { name, var_type, ty, args } => {
                write!(f, "({name}{}:{ty}", var_type.suffix())?;
                for a in args {
                    write!(f, " {a}")?;
                }
                f.write_str(")")
            }
            Expression::Assert { signal, ty, expr } => write!(f, "(assert_neq:{ty} {signal} {expr})"),
            Expression::Popped => f.write_str("pop"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetStatement {
    pub owner: Owner,
    pub name: String,
    pub var_type: VariableType,
    pub ty: DataType,
    pub original: DataType,
    pub indices: Option<Vec<ExprRef>>,
    pub value: ExprRef,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Set(SetStatement),
    /// Array set whose size operand is implicit.
    MagicSet { ty1: DataType, ty2: DataType },
    Call(ExprRef),
    Branch {
        kind: BranchType,
        condition: Option<ExprRef>,
        target: Option<i64>,
    },
    Return { ty: DataType, value: ExprRef },
    Exit,
    PushEnv { parent: ExprRef, target: Option<i64> },
    PopEnv { target: Option<i64> },
    Push(ExprRef),
    Pop,
    Dup(ExprRef),
}

fn write_target(f: &mut fmt::Formatter<'_>, target: Option<i64>) -> fmt::Result {
    match target {
        Some(t) => write!(f, "0x{t:06X}"),
        None => f.write_str("!magic"),
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Set(s) => {
                write!(f, "{}.{}", s.owner, s.name)?;
                write_access(f, s.var_type, &s.indices, true)?;
                write!(f, " = {}", s.value)
            }
            Statement::MagicSet { ty1, ty2 } => write!(f, "magic_set {ty1}:{ty2}"),
            Statement::Call(c) => write!(f, "call {c}"),
            Statement::Branch { kind, condition, target } => {
                match (kind, condition) {
                    (BranchType::IfFalse, Some(c)) => write!(f, "if !{c} ")?,
                    (BranchType::IfTrue, Some(c)) => write!(f, "if {c} ")?,
                    _ => {}
                }
                f.write_str("goto ")?;
                write_target(f, *target)
            }
            Statement::Return { ty, value } => write!(f, "ret {ty} {value}"),
            Statement::Exit => f.write_str("exit"),
            Statement::PushEnv { parent, target } => {
                write!(f, "pushenv {parent} ")?;
                write_target(f, *target)
            }
            Statement::PopEnv { target } => {
                f.write_str("popenv ")?;
                write_target(f, *target)
            }
            Statement::Push(e) => write!(f, "push {e}"),
            Statement::Pop => f.write_str("pop"),
            Statement::Dup(_) => f.write_str("dup"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lit(l: Literal) -> ExprRef {
        Rc::new(Expression::Literal(l))
    }

    #[test]
    fn literals_render_with_suffixes() {
        let cases = [
            (Literal::Int16(5), "5s"),
            (Literal::Int32(-3), "-3"),
            (Literal::Int64(7), "7L"),
            (Literal::Double(1.5), "1.5d"),
            (Literal::Single(2.0), "2f"),
            (Literal::Boolean(true), "true"),
            (Literal::String("a\"b\n".into()), "\"a\\\"b\\n\""),
        ];
        for (l, want) in cases {
            assert_eq!(l.to_string(), want, "Failed for input: {:?}", l);
        }
    }

    #[test]
    fn expressions_render_prefix_style() {
        let x = Rc::new(Expression::Variable {
            owner: Owner { instance: InstanceType::SelfInstance, name: None },
            name: "x".into(),
            var_type: VariableType::Normal,
            ty: DataType::Variable,
            indices: None,
        });
        let sum = Expression::Binary {
            op: BinaryOp::Add,
            lhs: x.clone(),
            rhs: lit(Literal::Int16(1)),
            ty: DataType::Variable,
            original: DataType::Int16,
        };
        assert_eq!(sum.to_string(), "(+ self.x 1s)");

        let call = Expression::Call {
            name: "show".into(),
            var_type: VariableType::Normal,
            ty: DataType::Variable,
            args: vec![x.clone(), lit(Literal::String("hi".into()))],
        };
        assert_eq!(call.to_string(), "(show:var self.x \"hi\")");
        assert!(call.contains_call());
        assert!(!sum.contains_call());

        let arr = Expression::Variable {
            owner: Owner { instance: InstanceType::Object(3), name: Some("obj_player".into()) },
            name: "grid".into(),
            var_type: VariableType::Array,
            ty: DataType::Variable,
            indices: Some(vec![lit(Literal::Int16(1)), lit(Literal::Int16(2))]),
        };
        assert_eq!(arr.to_string(), "[obj_player].grid[1s, 2s]");
    }

    #[test]
    fn statements_render() {
        let cond = lit(Literal::Boolean(false));
        let cases = [
            (
                Statement::Branch { kind: BranchType::IfFalse, condition: Some(cond.clone()), target: Some(0x10) },
                "if !false goto 0x000010",
            ),
            (Statement::Branch { kind: BranchType::Unconditional, condition: None, target: Some(0x24) }, "goto 0x000024"),
            (Statement::Return { ty: DataType::Int32, value: lit(Literal::Int16(5)) }, "ret int32 5s"),
            (Statement::PopEnv { target: None }, "popenv !magic"),
            (Statement::Exit, "exit"),
        ];
        for (s, want) in cases {
            assert_eq!(s.to_string(), want, "Failed for input: {:?}", s);
        }
    }
}
