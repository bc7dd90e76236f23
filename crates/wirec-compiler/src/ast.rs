//! Input AST for the conversion front end.
//!
//! The source format-description language is parsed elsewhere; this crate
//! receives the tree as a JSON container and deserializes it with serde.
//! Shapes here mirror that external contract, not the instruction model.

use serde::Deserialize;
use thiserror::Error;

/// Error from loading the JSON AST container.
#[derive(Debug, Error)]
pub enum AstError {
    #[error("malformed AST container: {0}")]
    Json(#[from] serde_json::Error),
}

/// Deserialize an AST from its JSON text form.
pub fn load(text: &str) -> Result<Ast, AstError> {
    Ok(serde_json::from_str(text)?)
}

/// Root of the input tree.
#[derive(Clone, Debug, Deserialize)]
pub struct Ast {
    pub programs: Vec<Program>,
}

/// One program block: a named group of top-level declarations.
#[derive(Clone, Debug, Deserialize)]
pub struct Program {
    pub name: String,
    pub elements: Vec<Decl>,
}

/// Top-level declaration.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Decl {
    Format(FormatDecl),
    Enum(EnumDecl),
    State(StateDecl),
}

/// A wire format definition.
#[derive(Clone, Debug, Deserialize)]
pub struct FormatDecl {
    pub name: String,
    /// Default byte order for integer fields without an explicit one.
    #[serde(default)]
    pub endian: Option<EndianSpec>,
    /// Persistent state variables carried across encode/decode calls.
    #[serde(default)]
    pub state: Vec<FieldDecl>,
    pub members: Vec<Member>,
}

/// Member of a format body.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Member {
    Field(FieldDecl),
    BitField {
        name: String,
        fields: Vec<FieldDecl>,
    },
    Union {
        name: String,
        variants: Vec<UnionVariant>,
    },
    Property(PropertyDecl),
    Function(FunctionDecl),
}

/// A plain field: name plus declared type.
#[derive(Clone, Debug, Deserialize)]
pub struct FieldDecl {
    pub name: String,
    pub ty: TypeExpr,
    #[serde(default)]
    pub endian: Option<EndianSpec>,
}

/// One branch of a union.
#[derive(Clone, Debug, Deserialize)]
pub struct UnionVariant {
    pub name: String,
    pub fields: Vec<FieldDecl>,
}

/// A property: conditional fields, possibly nested.
#[derive(Clone, Debug, Deserialize)]
pub struct PropertyDecl {
    pub name: String,
    pub members: Vec<PropertyMember>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PropertyMember {
    Conditional { cond: Expr, field: FieldDecl },
    Property(PropertyDecl),
}

/// An explicit encoder/decoder or helper function.
#[derive(Clone, Debug, Deserialize)]
pub struct FunctionDecl {
    pub name: String,
    pub role: FunctionRole,
    #[serde(default)]
    pub params: Vec<FieldDecl>,
    pub body: Vec<Stmt>,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FunctionRole {
    Encode,
    Decode,
    Helper,
}

/// An enum definition with an optional wire base type.
#[derive(Clone, Debug, Deserialize)]
pub struct EnumDecl {
    pub name: String,
    #[serde(default)]
    pub base: Option<TypeExpr>,
    pub members: Vec<EnumMember>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct EnumMember {
    pub name: String,
    pub value: u64,
}

/// A free-standing state block.
#[derive(Clone, Debug, Deserialize)]
pub struct StateDecl {
    pub name: String,
    pub vars: Vec<FieldDecl>,
}

/// Statement inside a function body.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Stmt {
    /// Transfer one declared field according to its type.
    Encode { field: String },
    Decode { field: String },
    If {
        cond: Expr,
        then: Vec<Stmt>,
        #[serde(default)]
        elifs: Vec<ElifArm>,
        #[serde(default)]
        r#else: Option<Vec<Stmt>>,
    },
    Match {
        target: Expr,
        #[serde(default)]
        exhaustive: bool,
        cases: Vec<CaseArm>,
    },
    Loop {
        #[serde(default)]
        cond: Option<Expr>,
        body: Vec<Stmt>,
    },
    Break {},
    Continue {},
    Return {
        #[serde(default)]
        value: Option<Expr>,
    },
    Let {
        name: String,
        ty: TypeExpr,
        value: Expr,
    },
    Assign {
        target: Expr,
        value: Expr,
    },
    Assert {
        cond: Expr,
    },
    Error {
        message: String,
    },
}

#[derive(Clone, Debug, Deserialize)]
pub struct ElifArm {
    pub cond: Expr,
    pub body: Vec<Stmt>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CaseArm {
    /// Absent for the default case.
    #[serde(default)]
    pub cond: Option<Expr>,
    pub body: Vec<Stmt>,
}

/// Expression tree.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expr {
    Ident { name: String },
    Int { value: u64 },
    Bool { value: bool },
    Binary {
        op: String,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: String,
        operand: Box<Expr>,
    },
    Member {
        base: Box<Expr>,
        name: String,
    },
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
    },
    Cast {
        ty: TypeExpr,
        operand: Box<Expr>,
    },
    ArraySize {
        array: Box<Expr>,
    },
}

/// Type expression.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TypeExpr {
    Uint { bits: u64 },
    Int { bits: u64 },
    Float { bits: u64 },
    Bool {},
    Array { len: u64, elem: Box<TypeExpr> },
    Vector {
        elem: Box<TypeExpr>,
        /// Field holding the element count; absent means read until EOF.
        #[serde(default)]
        len: Option<Box<Expr>>,
    },
    Named { name: String },
}

/// Byte order in the source language.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EndianSpec {
    Big {},
    Little {},
    Native {},
    /// Order decided at run time by an expression: 1 means little, 2 means
    /// the platform order, anything else big.
    Dynamic { selector: Expr },
}
