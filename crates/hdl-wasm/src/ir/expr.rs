//! IR expression tree consumed from the HDL frontend.
//!
//! The frontend flattens an elaborated design into per-module variable
//! definitions plus named blocks of expressions, one block per evaluation
//! phase (`_ctor_var_reset`, `_eval_initial`, `_eval_settle`, `_eval`,
//! `_change_request`) and one per user function. Operators keep their
//! frontend names on the wire; in Rust they are enums dispatched by `match`.

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use super::DataType;

/// A constant leaf. `cvalue` always holds the low 64 bits; constants wider
/// than 64 bits additionally carry the full value in `bigvalue`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstExpr {
    pub dtype: DataType,
    #[serde(default)]
    pub cvalue: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bigvalue: Option<BigUint>,
}

impl ConstExpr {
    #[must_use]
    pub fn new(dtype: DataType, cvalue: u64) -> Self {
        Self {
            dtype,
            cvalue,
            bigvalue: None,
        }
    }

    /// Little-endian 32-bit chunks, padded or truncated to `n`.
    #[must_use]
    pub fn chunks(&self, n: u32) -> Vec<u32> {
        let mut digits = match &self.bigvalue {
            Some(big) => big.to_u32_digits(),
            None => vec![self.cvalue as u32, (self.cvalue >> 32) as u32],
        };
        digits.resize(n as usize, 0);
        digits
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnaryOp {
    Not,
    Negate,
    Extends,
    Ccast,
    Redxor,
    Creset,
    Creturn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinaryOp {
    // === Arithmetic ===
    Add,
    Sub,
    Mul,
    #[serde(rename = "muls")]
    MulS,
    Div,
    #[serde(rename = "divs")]
    DivS,
    Moddiv,
    #[serde(rename = "moddivs")]
    ModdivS,

    // === Bitwise ===
    And,
    Or,
    Xor,

    // === Shifts ===
    #[serde(rename = "shiftl")]
    Shl,
    #[serde(rename = "shiftr")]
    Shr,
    #[serde(rename = "shiftrs")]
    ShrS,

    // === Comparisons ===
    Eq,
    Neq,
    Lt,
    #[serde(rename = "lts")]
    LtS,
    Gt,
    #[serde(rename = "gts")]
    GtS,
    Lte,
    #[serde(rename = "ltes")]
    LteS,
    Gte,
    #[serde(rename = "gtes")]
    GteS,

    // === Assignments (timing variants are identical here) ===
    Assign,
    AssignPre,
    AssignDly,
    AssignPost,
    ContAssign,

    // === Indexing / change detection ===
    ArraySel,
    WordSel,
    ChangeDet,
}

impl BinaryOp {
    #[must_use]
    pub fn is_assign(self) -> bool {
        matches!(
            self,
            BinaryOp::Assign
                | BinaryOp::AssignPre
                | BinaryOp::AssignDly
                | BinaryOp::AssignPost
                | BinaryOp::ContAssign
        )
    }

    #[must_use]
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::Neq
                | BinaryOp::Lt
                | BinaryOp::LtS
                | BinaryOp::Gt
                | BinaryOp::GtS
                | BinaryOp::Lte
                | BinaryOp::LteS
                | BinaryOp::Gte
                | BinaryOp::GteS
        )
    }

    /// Comparison/arithmetic variants that interpret operands as signed.
    #[must_use]
    pub fn is_signed(self) -> bool {
        matches!(
            self,
            BinaryOp::MulS
                | BinaryOp::DivS
                | BinaryOp::ModdivS
                | BinaryOp::ShrS
                | BinaryOp::LtS
                | BinaryOp::GtS
                | BinaryOp::LteS
                | BinaryOp::GteS
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TernaryOp {
    /// Statement-level conditional; no result value.
    If,
    /// Value-producing conditional, lowered to `select`.
    Cond,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Expr {
    Const(ConstExpr),
    VarRef {
        name: String,
    },
    VarDecl {
        def: VarDef,
    },
    Unop {
        kind: UnaryOp,
        dtype: DataType,
        /// Source bit width for `extends`; unused by other unops.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from_width: Option<u32>,
        arg: Box<Expr>,
    },
    Binop {
        kind: BinaryOp,
        dtype: DataType,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Triop {
        kind: TernaryOp,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dtype: Option<DataType>,
        cond: Box<Expr>,
        left: Box<Expr>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        right: Option<Box<Expr>>,
    },
    While {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        precond: Option<Box<Expr>>,
        loopcond: Box<Expr>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        inc: Option<Box<Expr>>,
        body: Box<Expr>,
    },
    FuncCall {
        name: String,
        #[serde(default)]
        args: Vec<Expr>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        line: Option<u32>,
    },
    Block {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        exprs: Vec<Expr>,
    },
}

impl Expr {
    #[must_use]
    pub fn var(name: impl Into<String>) -> Self {
        Expr::VarRef { name: name.into() }
    }

    #[must_use]
    pub fn constant(dtype: DataType, value: u64) -> Self {
        Expr::Const(ConstExpr::new(dtype, value))
    }
}

/// One element of an array-shaped initial value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitEntry {
    pub index: u32,
    pub value: ConstExpr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarDef {
    pub name: String,
    pub dtype: DataType,
    #[serde(default)]
    pub is_input: bool,
    #[serde(default)]
    pub is_output: bool,
    #[serde(default)]
    pub is_param: bool,
    /// Reset-time value, applied by the runtime before `_ctor_var_reset`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_value: Option<Vec<InitEntry>>,
    /// Present iff the variable is a compile-time constant. A constant zero
    /// is still `Some`; absence means "not a constant".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub const_value: Option<ConstExpr>,
}

impl VarDef {
    #[must_use]
    pub fn new(name: impl Into<String>, dtype: DataType) -> Self {
        Self {
            name: name.into(),
            dtype,
            is_input: false,
            is_output: false,
            is_param: false,
            init_value: None,
            const_value: None,
        }
    }
}

/// A named list of expressions; the unit of function emission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockDef {
    pub name: String,
    pub exprs: Vec<Expr>,
}

/// One elaborated module: its variables and its evaluation blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleDef {
    pub name: String,
    pub vardefs: Vec<VarDef>,
    pub blocks: Vec<BlockDef>,
}

impl ModuleDef {
    #[must_use]
    pub fn vardef(&self, name: &str) -> Option<&VarDef> {
        self.vardefs.iter().find(|v| v.name == name)
    }

    #[must_use]
    pub fn block(&self, name: &str) -> Option<&BlockDef> {
        self.blocks.iter().find(|b| b.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_json_round_trip() {
        let module = ModuleDef {
            name: "adder".to_owned(),
            vardefs: vec![
                {
                    let mut v = VarDef::new("a", DataType::logic(8));
                    v.is_input = true;
                    v
                },
                {
                    let mut v = VarDef::new("sum", DataType::logic(8));
                    v.is_output = true;
                    v
                },
            ],
            blocks: vec![BlockDef {
                name: "_eval".to_owned(),
                exprs: vec![Expr::Binop {
                    kind: BinaryOp::Assign,
                    dtype: DataType::logic(1),
                    left: Box::new(Expr::var("sum")),
                    right: Box::new(Expr::Binop {
                        kind: BinaryOp::Add,
                        dtype: DataType::logic(8),
                        left: Box::new(Expr::var("a")),
                        right: Box::new(Expr::constant(DataType::logic(8), 1)),
                    }),
                }],
            }],
        };
        let json = serde_json::to_string(&module).unwrap();
        let back: ModuleDef = serde_json::from_str(&json).unwrap();
        assert_eq!(module, back);
    }

    #[test]
    fn expressions_keep_frontend_op_names() {
        let json = r#"{
            "op": "binop",
            "kind": "shiftrs",
            "dtype": { "kind": "logic", "left": 15, "signed": true },
            "left": { "op": "varref", "name": "x" },
            "right": { "op": "const", "dtype": { "kind": "logic", "left": 31 }, "cvalue": 2 }
        }"#;
        let expr: Expr = serde_json::from_str(json).unwrap();
        let Expr::Binop { kind, dtype, .. } = expr else {
            panic!("expected a binop");
        };
        assert_eq!(kind, BinaryOp::ShrS);
        assert_eq!(dtype.width(), 16);
        assert!(dtype.is_signed());
    }
}
