//! Integer expressions inside cell arrays, e.g. `<(1 << 4) (0x10 + 2)>`.
//!
//! Expressions are evaluated while they are parsed, in 64-bit unsigned wrapping arithmetic.
//! Comparison and logical operators yield 0 or 1. Evaluation runs on explicit operand and
//! operator stacks, so parentheses and unary operators may nest to any depth.

use thiserror::Error;

use crate::lexer::Symbol;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    BitNot,
    LogicalNot,
}

impl UnaryOp {
    pub fn from_symbol(symbol: Symbol) -> Option<Self> {
        match symbol {
            Symbol::Minus => Some(UnaryOp::Neg),
            Symbol::Tilde => Some(UnaryOp::BitNot),
            Symbol::Bang => Some(UnaryOp::LogicalNot),
            _ => None,
        }
    }

    fn apply(self, value: u64) -> u64 {
        match self {
            UnaryOp::Neg => value.wrapping_neg(),
            UnaryOp::BitNot => !value,
            UnaryOp::LogicalNot => (value == 0) as u64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Mul,
    Div,
    Mod,
    Add,
    Sub,
    Shl,
    Shr,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    BitAnd,
    BitXor,
    BitOr,
    And,
    Or,
}

impl BinaryOp {
    pub fn from_symbol(symbol: Symbol) -> Option<Self> {
        Some(match symbol {
            Symbol::Star => BinaryOp::Mul,
            Symbol::Slash => BinaryOp::Div,
            Symbol::Percent => BinaryOp::Mod,
            Symbol::Plus => BinaryOp::Add,
            Symbol::Minus => BinaryOp::Sub,
            Symbol::Shl => BinaryOp::Shl,
            Symbol::Shr => BinaryOp::Shr,
            Symbol::LAngle => BinaryOp::Lt,
            Symbol::RAngle => BinaryOp::Gt,
            Symbol::Le => BinaryOp::Le,
            Symbol::Ge => BinaryOp::Ge,
            Symbol::EqEq => BinaryOp::Eq,
            Symbol::Ne => BinaryOp::Ne,
            Symbol::Ampersand => BinaryOp::BitAnd,
            Symbol::Caret => BinaryOp::BitXor,
            Symbol::Pipe => BinaryOp::BitOr,
            Symbol::AndAnd => BinaryOp::And,
            Symbol::OrOr => BinaryOp::Or,
            _ => return None,
        })
    }

    /// Binding strength, higher binds tighter. Follows C.
    pub fn precedence(self) -> u8 {
        match self {
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => 10,
            BinaryOp::Add | BinaryOp::Sub => 9,
            BinaryOp::Shl | BinaryOp::Shr => 8,
            BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge => 7,
            BinaryOp::Eq | BinaryOp::Ne => 6,
            BinaryOp::BitAnd => 5,
            BinaryOp::BitXor => 4,
            BinaryOp::BitOr => 3,
            BinaryOp::And => 2,
            BinaryOp::Or => 1,
        }
    }

    fn apply(self, lhs: u64, rhs: u64) -> Result<u64, EvalError> {
        let shift = |f: fn(u64, u32) -> u64| {
            if rhs >= 64 {
                0
            } else {
                f(lhs, rhs as u32)
            }
        };

        Ok(match self {
            BinaryOp::Mul => lhs.wrapping_mul(rhs),
            BinaryOp::Div => lhs.checked_div(rhs).ok_or(EvalError::DivisionByZero)?,
            BinaryOp::Mod => lhs.checked_rem(rhs).ok_or(EvalError::DivisionByZero)?,
            BinaryOp::Add => lhs.wrapping_add(rhs),
            BinaryOp::Sub => lhs.wrapping_sub(rhs),
            BinaryOp::Shl => shift(|l, r| l << r),
            BinaryOp::Shr => shift(|l, r| l >> r),
            BinaryOp::Lt => (lhs < rhs) as u64,
            BinaryOp::Gt => (lhs > rhs) as u64,
            BinaryOp::Le => (lhs <= rhs) as u64,
            BinaryOp::Ge => (lhs >= rhs) as u64,
            BinaryOp::Eq => (lhs == rhs) as u64,
            BinaryOp::Ne => (lhs != rhs) as u64,
            BinaryOp::BitAnd => lhs & rhs,
            BinaryOp::BitXor => lhs ^ rhs,
            BinaryOp::BitOr => lhs | rhs,
            BinaryOp::And => (lhs != 0 && rhs != 0) as u64,
            BinaryOp::Or => (lhs != 0 || rhs != 0) as u64,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("division by zero")]
    DivisionByZero,
}

/// Operator waiting on the [`Evaluator`] stack for its operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    Unary(UnaryOp),
    Binary(BinaryOp),
    /// An open parenthesis.
    Group,
    /// `?` still waiting for its `:`.
    Condition,
    /// `:` of a conditional, reduced once the alternative is complete.
    Alternative,
}

/// How a closing parenthesis matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Closed {
    /// It closed a nested group.
    Group,
    /// It closed the whole expression; [`Evaluator::value`] holds the result.
    Outermost,
    /// A `?` inside the group has no `:`.
    Unbalanced,
}

/// Operator-precedence evaluator fed one token at a time, in source order.
///
/// The caller alternates between operands (literals, preceded by any number of unary operators
/// and open parentheses) and operators. Both branches of a conditional are evaluated, so a
/// division by zero in the branch not taken is still reported.
#[derive(Debug, Default)]
pub struct Evaluator {
    operands: Vec<u64>,
    operators: Vec<Pending>,
}

impl Evaluator {
    pub fn operand(&mut self, value: u64) {
        self.operands.push(value);
    }

    pub fn unary(&mut self, op: UnaryOp) {
        self.operators.push(Pending::Unary(op));
    }

    pub fn open(&mut self) {
        self.operators.push(Pending::Group);
    }

    pub fn binary(&mut self, op: BinaryOp) -> Result<(), EvalError> {
        self.reduce(|pending| match pending {
            Pending::Binary(prev) => prev.precedence() >= op.precedence(),
            _ => matches!(pending, Pending::Unary(_)),
        })?;
        self.operators.push(Pending::Binary(op));
        Ok(())
    }

    /// `?` of a conditional. Conditionals associate to the right.
    pub fn condition(&mut self) -> Result<(), EvalError> {
        self.reduce(|pending| !matches!(pending, Pending::Alternative))?;
        self.operators.push(Pending::Condition);
        Ok(())
    }

    /// `:` of a conditional. Returns `false` when no `?` is waiting for it.
    pub fn alternative(&mut self) -> Result<bool, EvalError> {
        self.reduce(|_| true)?;
        if self.operators.last() != Some(&Pending::Condition) {
            return Ok(false);
        }

        self.operators.pop();
        self.operators.push(Pending::Alternative);
        Ok(true)
    }

    pub fn close(&mut self) -> Result<Closed, EvalError> {
        self.reduce(|_| true)?;

        Ok(match self.operators.last() {
            Some(Pending::Group) => {
                self.operators.pop();
                Closed::Group
            }
            None => Closed::Outermost,
            Some(_) => Closed::Unbalanced,
        })
    }

    /// Value of the expression once [`Evaluator::close`] returned [`Closed::Outermost`].
    pub fn value(&self) -> u64 {
        self.operands.last().copied().unwrap_or_default()
    }

    /// Applies pending operators from the top of the stack while `applies` holds. Groups and
    /// unanswered conditions always stop the reduction.
    fn reduce(&mut self, applies: impl Fn(Pending) -> bool) -> Result<(), EvalError> {
        while let Some(&top) = self.operators.last() {
            if matches!(top, Pending::Group | Pending::Condition) || !applies(top) {
                break;
            }
            self.operators.pop();

            let value = match top {
                Pending::Unary(op) => op.apply(self.pop()),
                Pending::Binary(op) => {
                    let rhs = self.pop();
                    let lhs = self.pop();
                    op.apply(lhs, rhs)?
                }
                Pending::Alternative => {
                    let else_ = self.pop();
                    let then = self.pop();
                    if self.pop() != 0 {
                        then
                    } else {
                        else_
                    }
                }
                Pending::Group | Pending::Condition => continue,
            };
            self.operands.push(value);
        }

        Ok(())
    }

    /// Operands are balanced as long as the caller alternates operands and operators.
    fn pop(&mut self) -> u64 {
        self.operands.pop().unwrap_or_default()
    }
}
