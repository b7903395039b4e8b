//! Condition compiler and evaluator.
//!
//! Grammar (lowest to highest precedence):
//!
//! ```text
//! or      := and ( "||" and )*
//! and     := eq ( "&&" eq )*
//! eq      := cmp ( ( "==" | "!=" ) cmp )*
//! cmp     := sum ( ( "<" | "<=" | ">" | ">=" ) sum )*
//! sum     := product ( ( "+" | "-" ) product )*
//! product := unary ( ( "*" | "/" ) unary )*
//! unary   := ( "!" | "-" ) unary | primary
//! primary := "true" | "false" | int | float | identifier | "(" or ")"
//! ```
//!
//! Identifiers name declared inputs or the built-ins `time` (seconds spent in the source state)
//! and `length` (the source state's clip length). Text is compiled once into a postfix
//! [`Program`] bound to input-buffer offsets; evaluating it touches no names and allocates
//! nothing.

use crate::error::ConditionError;
use crate::inputs::{read_value, InputSlot, InputType, InputValue};

/// Maximum operand stack depth of a compiled program.
pub const MAX_STACK: usize = 32;

/// Maximum nesting of parentheses and unary operators accepted by the parser.
const MAX_NESTING: usize = 64;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

/// One postfix instruction.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Op {
    Push(InputValue),
    Load { offset: u32, ty: InputType },
    Time,
    Length,
    ToFloat,
    Not,
    Neg,
    Arith(ArithOp),
    Compare(CompareOp),
    And,
    Or,
}

/// Values a program may read besides constants.
#[derive(Copy, Clone, Debug)]
pub struct EvalContext<'a> {
    pub inputs: &'a [u8],
    /// Seconds the source state has been active.
    pub time: f32,
    /// Clip length of the source state (0 when unknown).
    pub length: f32,
}

impl<'a> EvalContext<'a> {
    pub fn new(inputs: &'a [u8]) -> Self {
        Self {
            inputs,
            time: 0.0,
            length: 0.0,
        }
    }
}

/// A compiled condition. The default program is always false.
#[derive(Clone, Debug, PartialEq)]
pub struct Program {
    ops: Vec<Op>,
}

impl Default for Program {
    fn default() -> Self {
        Self::always_false()
    }
}

impl Program {
    pub fn always_false() -> Self {
        Self {
            ops: vec![Op::Push(InputValue::Bool(false))],
        }
    }

    pub fn is_always_false(&self) -> bool {
        self.ops == [Op::Push(InputValue::Bool(false))]
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    /// Compile `text` against the given input slots.
    pub fn compile(text: &str, inputs: &[InputSlot]) -> Result<Program, ConditionError> {
        let tokens = lex(text)?;
        if tokens.len() == 1 {
            return Err(ConditionError::Empty);
        }
        let mut parser = Parser {
            tokens: &tokens,
            pos: 0,
            inputs,
            nesting: 0,
        };
        let Typed { ty, ops } = parser.parse_or()?;
        let tail = parser.peek();
        if tail.tok != Tok::Eof {
            return Err(ConditionError::Syntax {
                pos: tail.pos,
                message: format!("unexpected {}", tail.tok.describe()),
            });
        }
        if ty != InputType::Bool {
            return Err(ConditionError::TypeMismatch(format!(
                "condition must be bool, found {}",
                type_name(ty)
            )));
        }
        if stack_depth(&ops) > MAX_STACK {
            return Err(ConditionError::TooDeep(MAX_STACK));
        }
        Ok(Program { ops })
    }

    /// Evaluate against an input buffer. Pure: reads `ctx` only.
    pub fn evaluate(&self, ctx: &EvalContext<'_>) -> bool {
        let mut stack = [InputValue::Bool(false); MAX_STACK];
        let mut sp = 0usize;
        for op in &self.ops {
            match *op {
                Op::Push(_) | Op::Load { .. } | Op::Time | Op::Length => {
                    if sp == MAX_STACK {
                        return false;
                    }
                    stack[sp] = match *op {
                        Op::Push(v) => v,
                        Op::Load { offset, ty } => read_value(ctx.inputs, offset, ty),
                        Op::Time => InputValue::Float(ctx.time),
                        _ => InputValue::Float(ctx.length),
                    };
                    sp += 1;
                }
                Op::ToFloat | Op::Not | Op::Neg => {
                    if sp == 0 {
                        return false;
                    }
                    let top = &mut stack[sp - 1];
                    *top = match (*op, *top) {
                        (Op::ToFloat, v) => InputValue::Float(v.as_float()),
                        (Op::Not, v) => InputValue::Bool(!v.as_bool()),
                        (_, InputValue::Int(i)) => InputValue::Int(i.wrapping_neg()),
                        (_, v) => InputValue::Float(-v.as_float()),
                    };
                }
                Op::Arith(_) | Op::Compare(_) | Op::And | Op::Or => {
                    if sp < 2 {
                        return false;
                    }
                    let rhs = stack[sp - 1];
                    let lhs = stack[sp - 2];
                    sp -= 1;
                    stack[sp - 1] = match *op {
                        Op::Arith(arith) => apply_arith(arith, lhs, rhs),
                        Op::Compare(cmp) => InputValue::Bool(apply_compare(cmp, lhs, rhs)),
                        Op::And => InputValue::Bool(lhs.as_bool() && rhs.as_bool()),
                        _ => InputValue::Bool(lhs.as_bool() || rhs.as_bool()),
                    };
                }
            }
        }
        sp == 1 && stack[0].as_bool()
    }
}

fn apply_arith(op: ArithOp, lhs: InputValue, rhs: InputValue) -> InputValue {
    match (lhs, rhs) {
        (InputValue::Int(a), InputValue::Int(b)) => InputValue::Int(match op {
            ArithOp::Add => a.wrapping_add(b),
            ArithOp::Sub => a.wrapping_sub(b),
            ArithOp::Mul => a.wrapping_mul(b),
            ArithOp::Div => a.checked_div(b).unwrap_or(0),
        }),
        _ => {
            let (a, b) = (lhs.as_float(), rhs.as_float());
            InputValue::Float(match op {
                ArithOp::Add => a + b,
                ArithOp::Sub => a - b,
                ArithOp::Mul => a * b,
                ArithOp::Div => a / b,
            })
        }
    }
}

fn apply_compare(op: CompareOp, lhs: InputValue, rhs: InputValue) -> bool {
    match (lhs, rhs) {
        (InputValue::Int(a), InputValue::Int(b)) => compare(op, a, b),
        (InputValue::Bool(a), InputValue::Bool(b)) => compare(op, a, b),
        _ => compare(op, lhs.as_float(), rhs.as_float()),
    }
}

fn compare<T: PartialOrd>(op: CompareOp, a: T, b: T) -> bool {
    match op {
        CompareOp::Lt => a < b,
        CompareOp::Le => a <= b,
        CompareOp::Gt => a > b,
        CompareOp::Ge => a >= b,
        CompareOp::Eq => a == b,
        CompareOp::Ne => a != b,
    }
}

fn stack_depth(ops: &[Op]) -> usize {
    let mut depth = 0usize;
    let mut max = 0usize;
    for op in ops {
        match op {
            Op::Push(_) | Op::Load { .. } | Op::Time | Op::Length => depth += 1,
            Op::ToFloat | Op::Not | Op::Neg => {}
            Op::Arith(_) | Op::Compare(_) | Op::And | Op::Or => depth = depth.saturating_sub(1),
        }
        max = max.max(depth);
    }
    max
}

/// Source text plus its compiled program.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Condition {
    source: String,
    program: Program,
}

impl Condition {
    /// Uncompiled condition; evaluates to false until compiled.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            program: Program::always_false(),
        }
    }

    pub fn compile(
        source: impl Into<String>,
        inputs: &[InputSlot],
    ) -> Result<Self, ConditionError> {
        let source = source.into();
        let program = Program::compile(&source, inputs)?;
        Ok(Self { source, program })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Replace the text. On failure the text is kept for editing but the previously compiled
    /// program stays active.
    pub fn set_source(
        &mut self,
        source: impl Into<String>,
        inputs: &[InputSlot],
    ) -> Result<(), ConditionError> {
        self.source = source.into();
        self.program = Program::compile(&self.source, inputs)?;
        Ok(())
    }

    /// Recompile the current text. On failure the program degrades to always-false.
    pub fn recompile(&mut self, inputs: &[InputSlot]) -> Result<(), ConditionError> {
        match Program::compile(&self.source, inputs) {
            Ok(program) => {
                self.program = program;
                Ok(())
            }
            Err(err) => {
                self.program = Program::always_false();
                Err(err)
            }
        }
    }

    #[inline]
    pub fn evaluate(&self, ctx: &EvalContext<'_>) -> bool {
        self.program.evaluate(ctx)
    }
}

// --- lexing -------------------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
enum Tok {
    Ident(String),
    Int(i32),
    Float(f32),
    LParen,
    RParen,
    Bang,
    Minus,
    Plus,
    Star,
    Slash,
    AndAnd,
    OrOr,
    Lt,
    Le,
    Gt,
    Ge,
    EqEq,
    Ne,
    Eof,
}

impl Tok {
    fn describe(&self) -> String {
        match self {
            Tok::Ident(name) => format!("identifier '{name}'"),
            Tok::Int(v) => format!("number {v}"),
            Tok::Float(v) => format!("number {v}"),
            Tok::Eof => "end of condition".to_string(),
            other => format!("'{}'", other.symbol()),
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Tok::LParen => "(",
            Tok::RParen => ")",
            Tok::Bang => "!",
            Tok::Minus => "-",
            Tok::Plus => "+",
            Tok::Star => "*",
            Tok::Slash => "/",
            Tok::AndAnd => "&&",
            Tok::OrOr => "||",
            Tok::Lt => "<",
            Tok::Le => "<=",
            Tok::Gt => ">",
            Tok::Ge => ">=",
            Tok::EqEq => "==",
            Tok::Ne => "!=",
            _ => "?",
        }
    }
}

#[derive(Clone, Debug)]
struct Token {
    tok: Tok,
    pos: usize,
}

fn lex(text: &str) -> Result<Vec<Token>, ConditionError> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0usize;
    while i < bytes.len() {
        let c = bytes[i];
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        let start = i;
        let two = bytes.get(i + 1).copied();
        let tok = match c {
            b'(' => Tok::LParen,
            b')' => Tok::RParen,
            b'+' => Tok::Plus,
            b'-' => Tok::Minus,
            b'*' => Tok::Star,
            b'/' => Tok::Slash,
            b'&' if two == Some(b'&') => Tok::AndAnd,
            b'|' if two == Some(b'|') => Tok::OrOr,
            b'=' if two == Some(b'=') => Tok::EqEq,
            b'!' if two == Some(b'=') => Tok::Ne,
            b'!' => Tok::Bang,
            b'<' if two == Some(b'=') => Tok::Le,
            b'<' => Tok::Lt,
            b'>' if two == Some(b'=') => Tok::Ge,
            b'>' => Tok::Gt,
            b'0'..=b'9' | b'.' => {
                while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                    i += 1;
                }
                let literal = &text[start..i];
                let tok = if literal.contains('.') {
                    literal.parse::<f32>().map(Tok::Float).ok()
                } else {
                    literal.parse::<i32>().map(Tok::Int).ok()
                };
                let tok = tok.ok_or_else(|| ConditionError::Syntax {
                    pos: start,
                    message: format!("invalid number '{literal}'"),
                })?;
                tokens.push(Token { tok, pos: start });
                continue;
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                tokens.push(Token {
                    tok: Tok::Ident(text[start..i].to_string()),
                    pos: start,
                });
                continue;
            }
            _ => {
                let ch = text[start..].chars().next().unwrap_or('?');
                return Err(ConditionError::Syntax {
                    pos: start,
                    message: format!("unexpected character '{ch}'"),
                });
            }
        };
        i += match tok {
            Tok::AndAnd | Tok::OrOr | Tok::EqEq | Tok::Ne | Tok::Le | Tok::Ge => 2,
            _ => 1,
        };
        tokens.push(Token { tok, pos: start });
    }
    tokens.push(Token {
        tok: Tok::Eof,
        pos: text.len(),
    });
    Ok(tokens)
}

// --- parsing and lowering -----------------------------------------------------------------------

/// Type-checked postfix code for one subexpression.
#[derive(Debug)]
struct Typed {
    ty: InputType,
    ops: Vec<Op>,
}

impl Typed {
    fn leaf(ty: InputType, op: Op) -> Self {
        Self { ty, ops: vec![op] }
    }
}

/// Recursive-descent parser that emits postfix code as it goes. Binary chains are folded in a
/// loop, so recursion only grows with parentheses and unary operators.
struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    inputs: &'a [InputSlot],
    nesting: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &'a Token {
        // the token list always ends with Eof
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn bump(&mut self) -> &'a Token {
        let token = self.peek();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn enter(&mut self) -> Result<(), ConditionError> {
        self.nesting += 1;
        if self.nesting > MAX_NESTING {
            return Err(ConditionError::TooDeep(MAX_NESTING));
        }
        Ok(())
    }

    fn parse_or(&mut self) -> Result<Typed, ConditionError> {
        let mut lhs = self.parse_and()?;
        while self.peek().tok == Tok::OrOr {
            self.bump();
            let rhs = self.parse_and()?;
            lhs = logical(Op::Or, "'||'", lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Typed, ConditionError> {
        let mut lhs = self.parse_eq()?;
        while self.peek().tok == Tok::AndAnd {
            self.bump();
            let rhs = self.parse_eq()?;
            lhs = logical(Op::And, "'&&'", lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn parse_eq(&mut self) -> Result<Typed, ConditionError> {
        let mut lhs = self.parse_cmp()?;
        loop {
            let op = match self.peek().tok {
                Tok::EqEq => CompareOp::Eq,
                Tok::Ne => CompareOp::Ne,
                _ => return Ok(lhs),
            };
            self.bump();
            let rhs = self.parse_cmp()?;
            lhs = comparison(op, lhs, rhs)?;
        }
    }

    fn parse_cmp(&mut self) -> Result<Typed, ConditionError> {
        let mut lhs = self.parse_sum()?;
        loop {
            let op = match self.peek().tok {
                Tok::Lt => CompareOp::Lt,
                Tok::Le => CompareOp::Le,
                Tok::Gt => CompareOp::Gt,
                Tok::Ge => CompareOp::Ge,
                _ => return Ok(lhs),
            };
            self.bump();
            let rhs = self.parse_sum()?;
            lhs = comparison(op, lhs, rhs)?;
        }
    }

    fn parse_sum(&mut self) -> Result<Typed, ConditionError> {
        let mut lhs = self.parse_product()?;
        loop {
            let op = match self.peek().tok {
                Tok::Plus => ArithOp::Add,
                Tok::Minus => ArithOp::Sub,
                _ => return Ok(lhs),
            };
            self.bump();
            let rhs = self.parse_product()?;
            lhs = arithmetic(op, lhs, rhs)?;
        }
    }

    fn parse_product(&mut self) -> Result<Typed, ConditionError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek().tok {
                Tok::Star => ArithOp::Mul,
                Tok::Slash => ArithOp::Div,
                _ => return Ok(lhs),
            };
            self.bump();
            let rhs = self.parse_unary()?;
            lhs = arithmetic(op, lhs, rhs)?;
        }
    }

    fn parse_unary(&mut self) -> Result<Typed, ConditionError> {
        let op = match self.peek().tok {
            Tok::Bang => Op::Not,
            Tok::Minus => Op::Neg,
            _ => return self.parse_primary(),
        };
        self.bump();
        self.enter()?;
        let mut inner = self.parse_unary()?;
        self.nesting -= 1;
        if op == Op::Not && inner.ty != InputType::Bool {
            return Err(mismatch("'!'", "bool", inner.ty));
        }
        if op == Op::Neg && !is_numeric(inner.ty) {
            return Err(mismatch("unary '-'", "a number", inner.ty));
        }
        inner.ops.push(op);
        Ok(inner)
    }

    fn parse_primary(&mut self) -> Result<Typed, ConditionError> {
        let token = self.bump();
        match &token.tok {
            Tok::Int(v) => Ok(Typed::leaf(InputType::Int, Op::Push(InputValue::Int(*v)))),
            Tok::Float(v) => Ok(Typed::leaf(InputType::Float, Op::Push(InputValue::Float(*v)))),
            Tok::Ident(name) => self.resolve(name),
            Tok::LParen => {
                self.enter()?;
                let inner = self.parse_or()?;
                self.nesting -= 1;
                let close = self.bump();
                if close.tok != Tok::RParen {
                    return Err(ConditionError::Syntax {
                        pos: close.pos,
                        message: format!("expected ')', found {}", close.tok.describe()),
                    });
                }
                Ok(inner)
            }
            other => Err(ConditionError::Syntax {
                pos: token.pos,
                message: format!("expected a value, found {}", other.describe()),
            }),
        }
    }

    fn resolve(&self, name: &str) -> Result<Typed, ConditionError> {
        match name {
            "true" => return Ok(Typed::leaf(InputType::Bool, Op::Push(InputValue::Bool(true)))),
            "false" => return Ok(Typed::leaf(InputType::Bool, Op::Push(InputValue::Bool(false)))),
            "time" => return Ok(Typed::leaf(InputType::Float, Op::Time)),
            "length" => return Ok(Typed::leaf(InputType::Float, Op::Length)),
            _ => {}
        }
        self.inputs
            .iter()
            .find(|slot| slot.name == name)
            .map(|slot| {
                Typed::leaf(
                    slot.ty,
                    Op::Load {
                        offset: slot.offset,
                        ty: slot.ty,
                    },
                )
            })
            .ok_or_else(|| ConditionError::UnknownIdentifier(name.to_string()))
    }
}

// --- type checking ------------------------------------------------------------------------------

fn type_name(ty: InputType) -> &'static str {
    match ty {
        InputType::Bool => "bool",
        InputType::Int => "int",
        InputType::Float => "float",
    }
}

fn is_numeric(ty: InputType) -> bool {
    matches!(ty, InputType::Int | InputType::Float)
}

fn logical(op: Op, name: &str, lhs: Typed, rhs: Typed) -> Result<Typed, ConditionError> {
    for ty in [lhs.ty, rhs.ty] {
        if ty != InputType::Bool {
            return Err(mismatch(name, "bool", ty));
        }
    }
    let mut ops = lhs.ops;
    ops.extend(rhs.ops);
    ops.push(op);
    Ok(Typed {
        ty: InputType::Bool,
        ops,
    })
}

fn arithmetic(op: ArithOp, lhs: Typed, rhs: Typed) -> Result<Typed, ConditionError> {
    for ty in [lhs.ty, rhs.ty] {
        if !is_numeric(ty) {
            return Err(mismatch("arithmetic", "numbers", ty));
        }
    }
    let (lt, rt) = (lhs.ty, rhs.ty);
    let (mut lops, mut rops) = (lhs.ops, rhs.ops);
    let ty = if lt == rt {
        lt
    } else {
        promote(lt, &mut lops);
        promote(rt, &mut rops);
        InputType::Float
    };
    lops.extend(rops);
    lops.push(Op::Arith(op));
    Ok(Typed { ty, ops: lops })
}

fn comparison(op: CompareOp, lhs: Typed, rhs: Typed) -> Result<Typed, ConditionError> {
    let (lt, rt) = (lhs.ty, rhs.ty);
    let (mut lops, mut rops) = (lhs.ops, rhs.ops);
    let equality = matches!(op, CompareOp::Eq | CompareOp::Ne);
    if lt == InputType::Bool || rt == InputType::Bool {
        if !(equality && lt == rt) {
            return Err(ConditionError::TypeMismatch(format!(
                "cannot compare {} with {}",
                type_name(lt),
                type_name(rt)
            )));
        }
    } else if lt != rt {
        promote(lt, &mut lops);
        promote(rt, &mut rops);
    }
    lops.extend(rops);
    lops.push(Op::Compare(op));
    Ok(Typed {
        ty: InputType::Bool,
        ops: lops,
    })
}

fn promote(ty: InputType, ops: &mut Vec<Op>) {
    if ty == InputType::Int {
        ops.push(Op::ToFloat);
    }
}

fn mismatch(what: &str, expected: &str, found: InputType) -> ConditionError {
    ConditionError::TypeMismatch(format!(
        "{what} expects {expected}, found {}",
        type_name(found)
    ))
}
