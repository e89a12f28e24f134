use std::fmt;

/// Variables the render engine binds per frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Var {
    /// Timestamp in seconds (`t`)
    Time,
    /// Input frame number (`n`)
    Frame,
    /// Output frame number, used by zoompan (`on`)
    OutputFrame,
}

impl Var {
    pub fn symbol(&self) -> &'static str {
        match self {
            Var::Time => "t",
            Var::Frame => "n",
            Var::OutputFrame => "on",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    fn symbol(&self) -> char {
        match self {
            BinaryOp::Add => '+',
            BinaryOp::Sub => '-',
            BinaryOp::Mul => '*',
            BinaryOp::Div => '/',
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            BinaryOp::Add | BinaryOp::Sub => 1,
            BinaryOp::Mul | BinaryOp::Div => 2,
        }
    }
}

/// Engine functions the synthesizer emits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Sin,
    Abs,
    Min,
    Max,
    /// `between(x, lo, hi)`: 1 when `lo <= x <= hi`
    Between,
    /// `gte(x, y)`: 1 when `x >= y`
    Gte,
    /// `if(cond, then, else)`
    If,
}

impl Func {
    fn name(&self) -> &'static str {
        match self {
            Func::Sin => "sin",
            Func::Abs => "abs",
            Func::Min => "min",
            Func::Max => "max",
            Func::Between => "between",
            Func::Gte => "gte",
            Func::If => "if",
        }
    }

    fn arity(&self) -> usize {
        match self {
            Func::Sin | Func::Abs => 1,
            Func::Min | Func::Max | Func::Gte => 2,
            Func::Between | Func::If => 3,
        }
    }
}

/// Expression tree serialized to the engine's expression syntax
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Const(f64),
    Pi,
    Var(Var),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call {
        func: Func,
        args: Vec<Expr>,
    },
}

/// Values bound to the variables during evaluation
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Bindings {
    pub t: f64,
    pub n: f64,
    pub on: f64,
}

impl Bindings {
    /// Bindings for a frame index at a frame rate; `n` and `on` coincide
    pub fn at_frame(frame: u64, fps: f64) -> Self {
        Self {
            t: frame as f64 / fps,
            n: frame as f64,
            on: frame as f64,
        }
    }

    fn get(&self, var: Var) -> f64 {
        match var {
            Var::Time => self.t,
            Var::Frame => self.n,
            Var::OutputFrame => self.on,
        }
    }
}

impl Expr {
    pub fn num(v: f64) -> Self {
        Expr::Const(v)
    }

    pub fn var(v: Var) -> Self {
        Expr::Var(v)
    }

    fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    fn call(func: Func, args: Vec<Expr>) -> Self {
        debug_assert_eq!(args.len(), func.arity());
        Expr::Call { func, args }
    }

    pub fn add(self, rhs: Expr) -> Self {
        Self::binary(BinaryOp::Add, self, rhs)
    }

    pub fn sub(self, rhs: Expr) -> Self {
        Self::binary(BinaryOp::Sub, self, rhs)
    }

    pub fn mul(self, rhs: Expr) -> Self {
        Self::binary(BinaryOp::Mul, self, rhs)
    }

    pub fn div(self, rhs: Expr) -> Self {
        Self::binary(BinaryOp::Div, self, rhs)
    }

    pub fn sin(self) -> Self {
        Self::call(Func::Sin, vec![self])
    }

    pub fn abs(self) -> Self {
        Self::call(Func::Abs, vec![self])
    }

    pub fn min(self, other: Expr) -> Self {
        Self::call(Func::Min, vec![self, other])
    }

    pub fn max(self, other: Expr) -> Self {
        Self::call(Func::Max, vec![self, other])
    }

    pub fn gte(self, other: Expr) -> Self {
        Self::call(Func::Gte, vec![self, other])
    }

    /// `if(between(var, lo, hi), then, otherwise)`
    pub fn if_between(var: Var, lo: f64, hi: f64, then: Expr, otherwise: Expr) -> Self {
        let cond = Self::call(Func::Between, vec![Expr::Var(var), Expr::Const(lo), Expr::Const(hi)]);
        Self::call(Func::If, vec![cond, then, otherwise])
    }

    /// Left-folded sum; an empty iterator yields `0`
    pub fn sum(terms: impl IntoIterator<Item = Expr>) -> Self {
        terms
            .into_iter()
            .reduce(|acc, term| acc.add(term))
            .unwrap_or(Expr::Const(0.0))
    }

    /// Evaluate with the engine's semantics
    pub fn eval(&self, env: &Bindings) -> f64 {
        match self {
            Expr::Const(v) => *v,
            Expr::Pi => std::f64::consts::PI,
            Expr::Var(v) => env.get(*v),
            Expr::Binary { op, left, right } => {
                let (l, r) = (left.eval(env), right.eval(env));
                match op {
                    BinaryOp::Add => l + r,
                    BinaryOp::Sub => l - r,
                    BinaryOp::Mul => l * r,
                    BinaryOp::Div => l / r,
                }
            }
            Expr::Call { func, args } => {
                let arg = |i: usize| args[i].eval(env);
                let truth = |b: bool| if b { 1.0 } else { 0.0 };
                match func {
                    Func::Sin => arg(0).sin(),
                    Func::Abs => arg(0).abs(),
                    Func::Min => arg(0).min(arg(1)),
                    Func::Max => arg(0).max(arg(1)),
                    Func::Between => {
                        let x = arg(0);
                        truth(x >= arg(1) && x <= arg(2))
                    }
                    Func::Gte => truth(arg(0) >= arg(1)),
                    Func::If => {
                        if arg(0) != 0.0 {
                            arg(1)
                        } else {
                            arg(2)
                        }
                    }
                }
            }
        }
    }

    /// Number of calls to `func` anywhere in the tree
    pub fn count_calls(&self, func: Func) -> usize {
        match self {
            Expr::Binary { left, right, .. } => left.count_calls(func) + right.count_calls(func),
            Expr::Call { func: f, args } => {
                usize::from(*f == func) + args.iter().map(|a| a.count_calls(func)).sum::<usize>()
            }
            _ => 0,
        }
    }

    /// Nesting depth of the tree
    pub fn depth(&self) -> usize {
        match self {
            Expr::Binary { left, right, .. } => 1 + left.depth().max(right.depth()),
            Expr::Call { args, .. } => 1 + args.iter().map(Expr::depth).max().unwrap_or(0),
            _ => 1,
        }
    }

    /// Whether every constant in the tree is finite
    pub fn is_finite(&self) -> bool {
        match self {
            Expr::Const(v) => v.is_finite(),
            Expr::Binary { left, right, .. } => left.is_finite() && right.is_finite(),
            Expr::Call { args, .. } => args.iter().all(Expr::is_finite),
            _ => true,
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            Expr::Binary { op, .. } => op.precedence(),
            _ => 3,
        }
    }

    fn fmt_operand(&self, f: &mut fmt::Formatter<'_>, min_prec: u8) -> fmt::Result {
        if self.precedence() < min_prec {
            write!(f, "({})", self)
        } else {
            write!(f, "{}", self)
        }
    }
}

/// Constants are printed with at most four decimals and no trailing zeros
fn format_number(v: f64) -> String {
    let rounded = (v * 10_000.0).round() / 10_000.0;
    let rounded = if rounded == 0.0 { 0.0 } else { rounded };
    let mut s = format!("{:.4}", rounded);
    if s.contains('.') {
        let trimmed = s.trim_end_matches('0').trim_end_matches('.').len();
        s.truncate(trimmed);
    }
    if rounded < 0.0 {
        format!("({})", s)
    } else {
        s
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Const(v) => f.write_str(&format_number(*v)),
            Expr::Pi => f.write_str("PI"),
            Expr::Var(v) => f.write_str(v.symbol()),
            Expr::Binary { op, left, right } => {
                let prec = op.precedence();
                left.fmt_operand(f, prec)?;
                write!(f, "{}", op.symbol())?;
                // Right operands of non-associative ops need strictly tighter binding
                let right_prec = match op {
                    BinaryOp::Sub | BinaryOp::Div => prec + 1,
                    _ => prec,
                };
                right.fmt_operand(f, right_prec)
            }
            Expr::Call { func, args } => {
                write!(f, "{}(", func.name())?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}", arg)?;
                }
                f.write_str(")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_formatting() {
        assert_eq!(format_number(0.5), "0.5");
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(0.123456), "0.1235");
        assert_eq!(format_number(-0.25), "(-0.25)");
        assert_eq!(format_number(-0.00001), "0");
    }

    #[test]
    fn test_precedence_parentheses() {
        let n = || Expr::var(Var::Frame);
        let e = Expr::num(3.0).add(Expr::num(15.0)).mul(n().sin().abs());
        assert_eq!(e.to_string(), "(3+15)*abs(sin(n))");

        let e = n().sub(Expr::num(2.0).sub(Expr::num(1.0)));
        assert_eq!(e.to_string(), "n-(2-1)");
        assert_eq!(e.eval(&Bindings::at_frame(10, 30.0)), 9.0);

        let e = n().div(Expr::num(2.0).mul(Expr::num(4.0)));
        assert_eq!(e.to_string(), "n/(2*4)");
    }

    #[test]
    fn test_if_between_eval_and_syntax() {
        let e = Expr::if_between(Var::Time, 1.0, 2.0, Expr::num(1.0), Expr::num(0.0));
        assert_eq!(e.to_string(), "if(between(t,1,2),1,0)");
        assert_eq!(e.eval(&Bindings { t: 1.0, ..Default::default() }), 1.0);
        assert_eq!(e.eval(&Bindings { t: 2.0, ..Default::default() }), 1.0);
        assert_eq!(e.eval(&Bindings { t: 2.1, ..Default::default() }), 0.0);
        assert_eq!(e.count_calls(Func::If), 1);
        assert_eq!(e.depth(), 3);
    }

    #[test]
    fn test_sum_and_gte() {
        assert_eq!(Expr::sum(Vec::new()).to_string(), "0");
        let e = Expr::sum(vec![
            Expr::var(Var::Frame).gte(Expr::num(5.0)),
            Expr::var(Var::Frame).gte(Expr::num(10.0)),
        ]);
        assert_eq!(e.to_string(), "gte(n,5)+gte(n,10)");
        assert_eq!(e.eval(&Bindings::at_frame(7, 30.0)), 1.0);
        assert_eq!(e.eval(&Bindings::at_frame(12, 30.0)), 2.0);
    }

    #[test]
    fn test_is_finite() {
        assert!(Expr::num(1.0).add(Expr::Pi).is_finite());
        assert!(!Expr::num(f64::NAN).is_finite());
    }
}
