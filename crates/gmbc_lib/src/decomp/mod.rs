//! Symbolic execution of a code entry's operand stack, block by block, into
//! statements and expression trees.

pub mod ast;

use std::ops::Range;
use std::rc::Rc;

use tracing::debug;

use self::ast::{BinaryOp, ExprRef, Expression, Literal, Owner, SetStatement, Statement, UnaryOp};
use crate::Context;
use crate::cfg::Graph;
use crate::disasm::CodeInfo;
use crate::instruction::{GeneralOp, Instruction, PushInstr, PushValue};
use crate::types::{BranchType, DataType, InstanceType, VariableType};

/// Row stride the compiler uses to flatten two-dimensional array indices.
pub const ARRAY_STRIDE: i32 = 32000;

const INDICATOR_2D: i16 = -1;
const INDICATOR_1D: i16 = -5;

/// Statements recovered from one CFG vertex.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub label: i64,
    pub statements: Vec<Statement>,
}

/// Operand stack and dup targets shared by every block of one code entry.
pub struct Decompiler<'c, 'a> {
    ctx: &'c Context<'a>,
    code: &'c CodeInfo,
    absolute: bool,
    stack: Vec<ExprRef>,
    dup_targets: Vec<ExprRef>,
    out: Vec<Statement>,
}

impl<'c, 'a> Decompiler<'c, 'a> {
    pub fn new(code: &'c CodeInfo, ctx: &'c Context<'a>, absolute: bool) -> Self {
        Self { ctx, code, absolute, stack: Vec::new(), dup_targets: Vec::new(), out: Vec::new() }
    }

    fn base(&self) -> i64 {
        if self.absolute { self.code.base_offset as i64 } else { 0 }
    }

    /// Values left on the stack, bottom first.
    pub fn stack(&self) -> &[ExprRef] {
        &self.stack
    }

    /// Runs the instructions of `range` and returns the statements they
    /// produced. Whatever is left on the stack is flushed afterwards.
    pub fn block(&mut self, range: Range<usize>) -> Vec<Statement> {
        let code = self.code;
        for i in range.clone() {
            let next = if i + 1 < range.end { code.instructions.get(i + 1) } else { None };
            self.step(i, next);
        }
        self.flush();
        std::mem::take(&mut self.out)
    }

    fn pop(&mut self) -> ExprRef {
        match self.stack.pop() {
            Some(e) => e,
            None => {
                debug!(code = %self.code.name, "operand stack underflow");
                Rc::new(Expression::Popped)
            }
        }
    }

    fn is_dup_target(&self, e: &ExprRef) -> bool {
        self.dup_targets.iter().any(|d| Rc::ptr_eq(d, e))
    }

    /// Materializes stack residue as statements. Dup targets stay on the stack
    /// since a later instruction consumes their second reference.
    fn flush(&mut self) {
        for e in std::mem::take(&mut self.stack) {
            if self.is_dup_target(&e) {
                self.stack.push(e);
                continue;
            }
            match &*e {
                Expression::Popped => {}
                Expression::Unary { op: UnaryOp::Duplicate, .. } => self.out.push(Statement::Dup(e.clone())),
                _ => self.out.push(Statement::Push(e.clone())),
            }
        }
    }

    fn add(&mut self, statement: Statement) {
        self.flush();
        self.out.push(statement);
    }

    fn owner(&self, instance: InstanceType) -> Owner {
        Owner { instance, name: self.ctx.object_name(instance) }
    }

    /// Pops the index operands of an array access. A 16-bit `-1` indicator
    /// marks a two-dimensional access, `-5` a one-dimensional one. Anything
    /// else is pushed back and the access is treated as a plain one.
    fn try_get_indices(&mut self, var_type: VariableType) -> Option<Vec<ExprRef>> {
        if var_type != VariableType::Array {
            return None;
        }
        let index = self.pop();
        let indicator = self.pop();
        let two_dimensional = match &*indicator {
            Expression::Literal(Literal::Int16(INDICATOR_2D)) => true,
            Expression::Literal(Literal::Int16(INDICATOR_1D)) => false,
            _ => {
                self.stack.push(indicator);
                self.stack.push(index);
                return None;
            }
        };
        if two_dimensional {
            if let Some((row, column)) = split_2d(&index) {
                return Some(vec![row, column]);
            }
        }
        Some(vec![index])
    }

    fn dup(&mut self, ty: DataType, next: Option<&Instruction>) {
        let array_push = matches!(
            next,
            Some(Instruction::Push(PushInstr { value: PushValue::Variable { reference, .. }, .. }))
                if reference.var_type == VariableType::Array
        );
        if array_push && self.stack.len() > 1 {
            // array compound assignment: owner and index are needed twice
            for _ in 0..2 {
                let second = self.stack[self.stack.len() - 2].clone();
                self.stack.push(second);
            }
            return;
        }

        let elem = match self.stack.last() {
            Some(e) => e.clone(),
            None => {
                let p = Rc::new(Expression::Popped);
                self.stack.push(p.clone());
                p
            }
        };
        if !self.is_dup_target(&elem) {
            self.dup_targets.push(elem.clone());
        }
        if elem.contains_call() {
            let original = elem.data_type().unwrap_or(ty);
            self.stack.push(Rc::new(Expression::Unary { op: UnaryOp::Duplicate, input: elem, ty, original }));
        } else {
            self.stack.push(elem);
        }
    }

    fn discard(&mut self) {
        if matches!(self.stack.last().map(|e| &**e), Some(Expression::Call { .. })) {
            let call = self.pop();
            self.add(Statement::Call(call));
        } else {
            self.add(Statement::Pop);
        }
    }

    fn unary(&mut self, op: UnaryOp, original: DataType, ty: DataType) {
        let input = self.pop();
        self.stack.push(Rc::new(Expression::Unary { op, input, ty, original }));
    }

    fn step(&mut self, i: usize, next: Option<&Instruction>) {
        let code = self.code;
        let address = code.addresses[i];
        let reference_offset = code.base_offset + address;

        match &code.instructions[i] {
            Instruction::SingleType(st) => match st.op.general() {
                GeneralOp::Dup => self.dup(st.ty, next),
                GeneralOp::Pop => self.discard(),
                GeneralOp::Ret => {
                    let value = self.pop();
                    self.add(Statement::Return { ty: st.ty, value });
                }
                GeneralOp::Exit => self.add(Statement::Exit),
                GeneralOp::Neg => self.unary(UnaryOp::Negate, st.ty, st.ty),
                other => debug!(?other, address, "single-type operation without stack effect"),
            },
            Instruction::DoubleType(dt) => {
                let op = match dt.op.general() {
                    GeneralOp::Conv => return self.unary(UnaryOp::Convert, dt.ty1, dt.ty2),
                    GeneralOp::Not => return self.unary(UnaryOp::Complement, dt.ty1, dt.ty2),
                    GeneralOp::Neg => return self.unary(UnaryOp::Negate, dt.ty1, dt.ty2),
                    GeneralOp::Mul => BinaryOp::Mul,
                    GeneralOp::Div => BinaryOp::Div,
                    GeneralOp::Rem => BinaryOp::Rem,
                    GeneralOp::Mod => BinaryOp::Mod,
                    GeneralOp::Add => BinaryOp::Add,
                    GeneralOp::Sub => BinaryOp::Sub,
                    GeneralOp::And => BinaryOp::And,
                    GeneralOp::Or => BinaryOp::Or,
                    GeneralOp::Xor => BinaryOp::Xor,
                    GeneralOp::Shl => BinaryOp::Shl,
                    GeneralOp::Shr => BinaryOp::Shr,
                    GeneralOp::Cmp => BinaryOp::Compare(dt.comparison_type()),
                    other => {
                        debug!(?other, address, "double-type operation without stack effect");
                        return;
                    }
                };
                let rhs = self.pop();
                let lhs = self.pop();
                self.stack.push(Rc::new(Expression::Binary { op, lhs, rhs, ty: dt.ty2, original: dt.ty1 }));
            }
            Instruction::Goto(g) => {
                let target = g.target(address).map(|t| t + self.base());
                match g.op.general() {
                    GeneralOp::PushEnv => {
                        let parent = self.pop();
                        self.add(Statement::PushEnv { parent, target });
                    }
                    GeneralOp::PopEnv => self.add(Statement::PopEnv { target }),
                    _ => {
                        let kind = g.branch_type();
                        let condition = (kind != BranchType::Unconditional).then(|| self.pop());
                        self.add(Statement::Branch { kind, condition, target });
                    }
                }
            }
            Instruction::Set(s) => match s.dest {
                None => self.add(Statement::MagicSet { ty1: s.ty1, ty2: s.ty2 }),
                Some(dest) => {
                    // indices sit above the value
                    let indices = self.try_get_indices(dest.var_type);
                    let value = self.pop();
                    let indices = indices.or_else(|| self.try_get_indices(dest.var_type));
                    let set = SetStatement {
                        owner: self.owner(s.instance),
                        name: self.ctx.variable_name(reference_offset),
                        var_type: dest.var_type,
                        ty: s.ty2,
                        original: s.ty1,
                        indices,
                        value,
                    };
                    self.add(Statement::Set(set));
                }
            },
            Instruction::Push(p) => {
                let expr = match p.value {
                    PushValue::Variable { instance, reference } => {
                        let name = self.ctx.variable_name(reference_offset);
                        let var_type = reference.var_type;
                        if instance == InstanceType::StackTopOrGlobal {
                            let owner = self.pop();
                            let indices = self.try_get_indices(var_type);
                            Expression::Member { owner, name, var_type, ty: DataType::Variable, indices }
                        } else {
                            let indices = self.try_get_indices(var_type);
                            let owner = self.owner(instance);
                            Expression::Variable { owner, name, var_type, ty: DataType::Variable, indices }
                        }
                    }
                    PushValue::Int16(v) => Expression::Literal(Literal::Int16(v)),
                    PushValue::Int32(v) => Expression::Literal(Literal::Int32(v)),
                    PushValue::Int64(v) => Expression::Literal(Literal::Int64(v)),
                    PushValue::Single(v) => Expression::Literal(Literal::Single(v)),
                    PushValue::Double(v) => Expression::Literal(Literal::Double(v)),
                    PushValue::Boolean(v) => Expression::Literal(Literal::Boolean(v != 0)),
                    PushValue::String(idx) => {
                        let s = match self.ctx.resolver.resolve_string(idx) {
                            Some(s) => s.to_string(),
                            None => format!("<string:{idx}>"),
                        };
                        Expression::Literal(Literal::String(s))
                    }
                };
                self.stack.push(Rc::new(expr));
            }
            Instruction::Call(c) => {
                let mut args: Vec<ExprRef> = (0..c.argc).map(|_| self.pop()).collect();
                args.reverse();
                let name = self.ctx.function_name(reference_offset);
                self.stack.push(Rc::new(Expression::Call { name, var_type: c.func.var_type, ty: c.ret, args }));
            }
            Instruction::Break(b) => {
                let expr = self.pop();
                self.stack.push(Rc::new(Expression::Assert { signal: b.signal, ty: b.ty, expr }));
            }
        }
    }
}

/// Matches `row * 32000 + column`.
fn split_2d(index: &Expression) -> Option<(ExprRef, ExprRef)> {
    let Expression::Binary { op: BinaryOp::Add, lhs, rhs: column, .. } = index else {
        return None;
    };
    let Expression::Binary { op: BinaryOp::Mul, lhs: row, rhs: stride, .. } = &**lhs else {
        return None;
    };
    match &**stride {
        Expression::Literal(Literal::Int32(ARRAY_STRIDE)) => Some((row.clone(), column.clone())),
        _ => None,
    }
}

/// Decompiles every vertex of `graph` in order.
pub fn decompile(code: &CodeInfo, graph: &Graph, ctx: &Context<'_>, absolute: bool) -> Vec<Block> {
    let mut d = Decompiler::new(code, ctx, absolute);
    graph
        .vertices
        .iter()
        .map(|v| Block { label: code.addresses[v.start] as i64 + d.base(), statements: d.block(v.range()) })
        .collect()
}

/// Pseudocode listing: one label per vertex, then the closing `exit` at the
/// code size.
pub fn decompile_code(code: &CodeInfo, graph: &Graph, ctx: &Context<'_>, absolute: bool) -> String {
    if code.is_empty() {
        return String::new();
    }
    let base = if absolute { code.base_offset as i64 } else { 0 };

    let mut out = String::new();
    for block in decompile(code, graph, ctx, absolute) {
        out.push_str(&format!("0x{:06X}:\n", block.label));
        for s in &block.statements {
            out.push_str(&format!("    {s}\n"));
        }
    }
    out.push_str(&format!("0x{:06X}:\n    exit\n", code.size as i64 + base));
    out
}
