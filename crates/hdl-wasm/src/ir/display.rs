use std::fmt;

use super::{BinaryOp, DataType, Expr, TernaryOp, UnaryOp};

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Logic { signed, .. } => {
                if *signed {
                    write!(f, "logic signed[{}:0]", self.width() - 1)
                } else {
                    write!(f, "logic[{}:0]", self.width() - 1)
                }
            }
            DataType::Array { subtype, low, high } => {
                write!(f, "{subtype}[{low}:{high}]")
            }
        }
    }
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UnaryOp::Not => "not",
            UnaryOp::Negate => "negate",
            UnaryOp::Extends => "extends",
            UnaryOp::Ccast => "ccast",
            UnaryOp::Redxor => "redxor",
            UnaryOp::Creset => "creset",
            UnaryOp::Creturn => "creturn",
        };
        f.write_str(name)
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::MulS => "muls",
            BinaryOp::Div => "div",
            BinaryOp::DivS => "divs",
            BinaryOp::Moddiv => "moddiv",
            BinaryOp::ModdivS => "moddivs",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Xor => "xor",
            BinaryOp::Shl => "shiftl",
            BinaryOp::Shr => "shiftr",
            BinaryOp::ShrS => "shiftrs",
            BinaryOp::Eq => "eq",
            BinaryOp::Neq => "neq",
            BinaryOp::Lt => "lt",
            BinaryOp::LtS => "lts",
            BinaryOp::Gt => "gt",
            BinaryOp::GtS => "gts",
            BinaryOp::Lte => "lte",
            BinaryOp::LteS => "ltes",
            BinaryOp::Gte => "gte",
            BinaryOp::GteS => "gtes",
            BinaryOp::Assign => "assign",
            BinaryOp::AssignPre => "assignpre",
            BinaryOp::AssignDly => "assigndly",
            BinaryOp::AssignPost => "assignpost",
            BinaryOp::ContAssign => "contassign",
            BinaryOp::ArraySel => "arraysel",
            BinaryOp::WordSel => "wordsel",
            BinaryOp::ChangeDet => "changedet",
        };
        f.write_str(name)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Const(c) => match &c.bigvalue {
                Some(big) => write!(f, "{}'h{:x}", c.dtype.width(), big),
                None => write!(f, "{}'h{:x}", c.dtype.width(), c.cvalue),
            },
            Expr::VarRef { name } => f.write_str(name),
            Expr::VarDecl { def } => write!(f, "(decl {} : {})", def.name, def.dtype),
            Expr::Unop { kind, arg, .. } => write!(f, "({kind} {arg})"),
            Expr::Binop {
                kind, left, right, ..
            } => write!(f, "({kind} {left} {right})"),
            Expr::Triop {
                kind: TernaryOp::If,
                cond,
                left,
                right,
                ..
            } => match right {
                Some(r) => write!(f, "(if {cond} {left} {r})"),
                None => write!(f, "(if {cond} {left})"),
            },
            Expr::Triop {
                kind: TernaryOp::Cond,
                cond,
                left,
                right,
                ..
            } => match right {
                Some(r) => write!(f, "(cond {cond} {left} {r})"),
                None => write!(f, "(cond {cond} {left})"),
            },
            Expr::While { loopcond, body, .. } => write!(f, "(while {loopcond} {body})"),
            Expr::FuncCall { name, args, .. } => {
                write!(f, "({name}")?;
                for a in args {
                    write!(f, " {a}")?;
                }
                f.write_str(")")
            }
            Expr::Block { name, exprs } => {
                match name {
                    Some(n) => write!(f, "(block {n}")?,
                    None => f.write_str("(block")?,
                }
                for e in exprs {
                    write!(f, " {e}")?;
                }
                f.write_str(")")
            }
        }
    }
}
