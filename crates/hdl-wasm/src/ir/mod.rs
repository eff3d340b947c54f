pub mod datatype;
pub mod display;
pub mod expr;

pub use datatype::{DataType, NativeType};
pub use expr::{
    BinaryOp, BlockDef, ConstExpr, Expr, InitEntry, ModuleDef, TernaryOp, UnaryOp, VarDef,
};
