//! LLVM-flavoured register IR. Operand stack slots become numbered
//! temporaries, variable accesses become explicit address computations.

use std::collections::BTreeSet;
use std::fmt;
use std::ops::Range;

use crate::Context;
use crate::cfg::Graph;
use crate::decomp::ast::escape;
use crate::disasm::CodeInfo;
use crate::instruction::{GeneralOp, Instruction, PushValue};
use crate::types::{ComparisonType, DataType, InstanceType, VariableType};

pub fn ir_type(ty: DataType) -> &'static str {
    match ty {
        DataType::Double => "double",
        DataType::Single => "float",
        DataType::Int32 | DataType::Instance => "i32",
        DataType::Int64 => "i64",
        DataType::Boolean => "i1",
        DataType::Variable | DataType::String => "i8*",
        DataType::Int16 => "i16",
    }
}

fn condition(c: Option<ComparisonType>) -> &'static str {
    match c {
        Some(ComparisonType::LowerThan) => "slt",
        Some(ComparisonType::LowerOrEqual) => "sle",
        Some(ComparisonType::Equal) => "eq",
        Some(ComparisonType::NotEqual) => "ne",
        Some(ComparisonType::GreaterOrEqual) => "sge",
        Some(ComparisonType::GreaterThan) => "sgt",
        None => "",
    }
}

#[derive(Debug, Clone)]
struct Value {
    ty: DataType,
    text: String,
    /// Set for 16-bit constants, which double as instance ids.
    short: Option<i16>,
}

impl Value {
    fn constant(ty: DataType, text: String) -> Self {
        Self { ty, text, short: None }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", ir_type(self.ty), self.text)
    }
}

fn label(address: u32) -> String {
    format!("{address:06X}")
}

struct Emitter<'c, 'a> {
    ctx: &'c Context<'a>,
    code: &'c CodeInfo,
    next_reg: usize,
    out: String,
}

impl<'c, 'a> Emitter<'c, 'a> {
    fn reg(&mut self, ty: DataType) -> Value {
        let v = Value { ty, text: format!("%{}", self.next_reg), short: None };
        self.next_reg += 1;
        v
    }

    fn line(&mut self, s: &str) {
        self.out.push_str("    ");
        self.out.push_str(s);
        self.out.push('\n');
    }

    /// Pops a value; an empty stack yields a fresh register owed by a
    /// predecessor block.
    fn pop(&mut self, stack: &mut Vec<Value>) -> Value {
        match stack.pop() {
            Some(v) => v,
            None => self.reg(DataType::Variable),
        }
    }

    fn address(&mut self, instance: InstanceType, name: &str, owner: Option<&Value>, index: Option<&Value>) -> String {
        let base = match instance {
            InstanceType::Global => return format!("@{name}"),
            InstanceType::Local => return format!("%{name}"),
            InstanceType::SelfInstance => "i8* %self".to_string(),
            InstanceType::StackTopOrGlobal => match owner {
                Some(o) if o.short != Some(InstanceType::SelfInstance.raw()) => o.to_string(),
                _ => "i8* %self".to_string(),
            },
            InstanceType::Object(id) => match self.ctx.object_name(instance) {
                Some(n) => format!("i8* @{n}"),
                None => format!("i8* @object.{id}"),
            },
            other => match other.keyword() {
                Some(k) => format!("i8* %{k}"),
                None => format!("i8* %instance.{}", other.raw()),
            },
        };
        let addr = self.reg(DataType::Variable);
        let index = index.map(|i| format!(", {i}")).unwrap_or_default();
        self.line(&format!("{} = getelementptr i8, {base}, i32 0, \"{}\"{index}", addr.text, escape(name)));
        addr.text
    }

    /// Owner and index operands of a variable access.
    fn access_operands(&mut self, stack: &mut Vec<Value>, var_type: VariableType) -> (Option<Value>, Option<Value>) {
        match var_type {
            VariableType::Array => {
                let index = self.pop(stack);
                let owner = self.pop(stack);
                (Some(owner), Some(index))
            }
            VariableType::StackTop => (Some(self.pop(stack)), None),
            _ => (None, None),
        }
    }

    fn block(&mut self, range: Range<usize>) {
        let code = self.code;
        let mut stack: Vec<Value> = Vec::new();

        for i in range.clone() {
            let address = code.addresses[i];
            let reference_offset = code.base_offset + address;
            let ins = &code.instructions[i];
            let op = ins.op();

            match ins {
                Instruction::SingleType(st) => match op.general() {
                    GeneralOp::Pop => {
                        self.pop(&mut stack);
                    }
                    GeneralOp::Dup => {
                        let top = self.pop(&mut stack);
                        stack.push(top.clone());
                        stack.push(top);
                    }
                    GeneralOp::Ret => {
                        let v = self.pop(&mut stack);
                        self.line(&format!("ret {} {}", ir_type(st.ty), v.text));
                    }
                    GeneralOp::Exit => self.line("ret void"),
                    _ => {
                        let arg = self.pop(&mut stack);
                        let dest = self.reg(st.ty);
                        self.line(&format!("{} = {} {} {}", dest.text, op.name(), ir_type(st.ty), arg.text));
                        stack.push(dest);
                    }
                },
                Instruction::DoubleType(dt) => {
                    let unary = matches!(op.general(), GeneralOp::Conv | GeneralOp::Not);
                    let rhs = if unary { None } else { Some(self.pop(&mut stack)) };
                    let lhs = self.pop(&mut stack);
                    let dest = self.reg(dt.ty2);
                    let mnemonic = if op.general() == GeneralOp::Cmp {
                        format!("cmp {}", condition(dt.comparison_type()))
                    } else {
                        op.name().to_string()
                    };
                    let mut s = format!("{} = {mnemonic} {} {}", dest.text, ir_type(dt.ty2), lhs.text);
                    if let Some(rhs) = rhs {
                        s.push_str(&format!(", {}", rhs.text));
                    }
                    self.line(&s);
                    stack.push(dest);
                }
                Instruction::Goto(g) => {
                    let target = g.target(address).and_then(|t| u32::try_from(t).ok()).map(label);
                    let next = label(address + 4);
                    match (op.general(), target) {
                        (GeneralOp::PushEnv, _) => {
                            let parent = self.pop(&mut stack);
                            self.line(&format!("pushenv {parent}"));
                        }
                        (GeneralOp::PopEnv, _) => self.line("popenv"),
                        (GeneralOp::Br, Some(t)) => self.line(&format!("br label %{t}")),
                        (general @ (GeneralOp::Brt | GeneralOp::Brf), Some(t)) => {
                            let cond = self.pop(&mut stack);
                            let (yes, no) = if general == GeneralOp::Brf { (next, t) } else { (t, next) };
                            self.line(&format!("br {cond}, label %{yes}, label %{no}"));
                        }
                        _ => self.line(&format!("br label %{next}")),
                    }
                }
                Instruction::Set(s) => match s.dest {
                    None => self.line(&format!("magic_set {}:{}", s.ty1, s.ty2)),
                    Some(dest) => {
                        let (owner, index) = self.access_operands(&mut stack, dest.var_type);
                        let value = self.pop(&mut stack);
                        let name = self.ctx.variable_name(reference_offset);
                        let addr = self.address(s.instance, &name, owner.as_ref(), index.as_ref());
                        self.line(&format!("store {value}, i8* {addr}"));
                    }
                },
                Instruction::Push(p) => {
                    let value = match p.value {
                        PushValue::Variable { instance, reference } => {
                            let (owner, index) = self.access_operands(&mut stack, reference.var_type);
                            let name = self.ctx.variable_name(reference_offset);
                            let addr = self.address(instance, &name, owner.as_ref(), index.as_ref());
                            let dest = self.reg(DataType::Variable);
                            self.line(&format!("{} = load i8*, i8* {addr}", dest.text));
                            dest
                        }
                        PushValue::Int16(v) => Value { ty: DataType::Int16, text: v.to_string(), short: Some(v) },
                        PushValue::Int32(v) => Value::constant(DataType::Int32, v.to_string()),
                        PushValue::Int64(v) => Value::constant(DataType::Int64, v.to_string()),
                        PushValue::Single(v) => Value::constant(DataType::Single, format!("{v:?}")),
                        PushValue::Double(v) => Value::constant(DataType::Double, format!("{v:?}")),
                        PushValue::Boolean(v) => Value::constant(DataType::Boolean, (v != 0).to_string()),
                        PushValue::String(idx) => {
                            let text = match self.ctx.resolver.resolve_string(idx) {
                                Some(s) => format!("\"{}\"", escape(s)),
                                None => format!("<string:{idx}>"),
                            };
                            Value::constant(DataType::String, text)
                        }
                    };
                    stack.push(value);
                }
                Instruction::Call(c) => {
                    let mut args: Vec<Value> = (0..c.argc).map(|_| self.pop(&mut stack)).collect();
                    args.reverse();
                    let name = self.ctx.function_name(reference_offset);
                    let dest = self.reg(c.ret);
                    let args: Vec<String> = args.iter().map(ToString::to_string).collect();
                    self.line(&format!("{} = call {} @{name}({})", dest.text, ir_type(c.ret), args.join(", ")));
                    stack.push(dest);
                }
                Instruction::Break(b) => self.line(&format!("break {} {}", b.ty, b.signal)),
            }
        }

        if let Some(last) = range.clone().last() {
            let ins = &code.instructions[last];
            let terminates = ins.as_goto().is_some() || matches!(ins.op().general(), GeneralOp::Ret | GeneralOp::Exit);
            if !terminates {
                let end = code.addresses[last] + ins.word_len() as u32 * 4;
                self.line(&format!("br label %{}", label(end)));
            }
        }
    }
}

/// Names of the local variables the code touches.
fn locals(code: &CodeInfo, ctx: &Context<'_>) -> BTreeSet<String> {
    code.iter()
        .filter_map(|(address, ins)| {
            let instance = match ins {
                Instruction::Set(s) if s.dest.is_some() => s.instance,
                Instruction::Push(p) => match p.value {
                    PushValue::Variable { instance, .. } => instance,
                    _ => return None,
                },
                _ => return None,
            };
            (instance == InstanceType::Local).then(|| ctx.variable_name(code.base_offset + address))
        })
        .collect()
}

pub fn emit_ir(code: &CodeInfo, graph: &Graph, ctx: &Context<'_>) -> String {
    let return_type = code
        .instructions
        .iter()
        .filter_map(|ins| match ins {
            Instruction::SingleType(st) if st.op.general() == GeneralOp::Ret => Some(ir_type(st.ty)),
            _ => None,
        })
        .last()
        .unwrap_or("void");

    let mut e = Emitter { ctx, code, next_reg: 0, out: String::new() };
    e.out.push_str(&format!("define {return_type} @{}(i8* %self) {{\n", code.name));

    let locals = locals(code, ctx);
    if !locals.is_empty() {
        e.out.push_str("alloca:\n");
        for name in &locals {
            e.line(&format!("%{name} = alloca i8"));
        }
    }

    for v in &graph.vertices {
        e.out.push_str(&format!("{}:\n", label(code.addresses[v.start])));
        e.block(v.range());
    }

    if return_type == "void" {
        e.out.push_str(&format!("{}:\n", label(code.size)));
        e.line("ret void");
    }
    e.out.push_str("}\n");
    e.out
}
