//! Single forward conversion from the input AST to an instruction module.
//!
//! The converter appends instructions in source order, interning names as
//! it goes. Identifiers resolve through a scope chain to their base
//! declaration; unresolved names get an ephemeral fresh id. Every DEFINE_*
//! appended registers its defining stream index, which later passes rely
//! on.

use std::collections::HashMap;

use thiserror::Error;

use wirec_ir::code::{BinOp, Code, Endian, EndianExpr, FunctionKind, UnOp};
use wirec_ir::ids::ObjectId;
use wirec_ir::module::Module;
use wirec_ir::storage::{Storage, StorageKind, Storages};

use crate::ast::{
    Ast, CaseArm, Decl, EndianSpec, Expr, FieldDecl, FormatDecl, FunctionDecl, FunctionRole,
    Member, PropertyDecl, PropertyMember, Stmt, TypeExpr,
};

#[cfg(test)]
mod convert_tests;

/// Error from AST conversion.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("unknown binary operator {0:?}")]
    UnknownBinaryOp(String),
    #[error("unknown unary operator {0:?}")]
    UnknownUnaryOp(String),
    #[error("unknown field {field:?} in format {format:?}")]
    UnknownField { format: String, field: String },
}

/// Direction of a synthesized wire transfer.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Dir {
    Encode,
    Decode,
}

/// Kind of a top-level declaration, for Named type resolution.
#[derive(Clone, Copy)]
enum TopKind {
    Format,
    /// Enum with its wire base width.
    Enum(u64),
    State,
}

/// Convert an AST root into a fresh module.
pub fn convert(ast: &Ast) -> Result<Module, ConvertError> {
    let mut converter = Converter::new();
    converter.predeclare(ast);
    for program in &ast.programs {
        converter.program(program)?;
    }
    Ok(converter.module)
}

struct Converter {
    module: Module,
    /// Innermost scope last.
    scopes: Vec<HashMap<String, ObjectId>>,
    top_kinds: HashMap<String, TopKind>,
}

impl Converter {
    fn new() -> Converter {
        Converter {
            module: Module::new(),
            scopes: vec![HashMap::new()],
            top_kinds: HashMap::new(),
        }
    }

    /// Register every top-level name first so cross-references (including
    /// forward ones) resolve to the same id as the definition.
    fn predeclare(&mut self, ast: &Ast) {
        for program in &ast.programs {
            for decl in &program.elements {
                let (name, kind) = match decl {
                    Decl::Format(f) => (f.name.as_str(), TopKind::Format),
                    Decl::Enum(e) => {
                        let bits = match &e.base {
                            Some(TypeExpr::Uint { bits }) | Some(TypeExpr::Int { bits }) => *bits,
                            _ => 8,
                        };
                        (e.name.as_str(), TopKind::Enum(bits))
                    }
                    Decl::State(s) => (s.name.as_str(), TopKind::State),
                };
                let id = self.module.intern_ident(name);
                self.scopes[0].insert(name.to_string(), id);
                self.top_kinds.insert(name.to_string(), kind);
            }
        }
    }

    /// Resolve a name through the scope chain, allocating an ephemeral
    /// fresh id when nothing declares it.
    fn lookup_ident(&mut self, name: &str) -> ObjectId {
        for scope in self.scopes.iter().rev() {
            if let Some(&id) = scope.get(name) {
                return id;
            }
        }
        let id = self.module.new_object_id();
        self.module.register_ident(id, name);
        id
    }

    /// Declare a name in the innermost scope.
    fn declare(&mut self, name: &str) -> ObjectId {
        let id = self.module.intern_ident(name);
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), id);
        }
        id
    }

    fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn fresh(&mut self, hint: &str) -> ObjectId {
        let id = self.module.new_object_id();
        self.module.register_ident(id, hint);
        id
    }

    // --- declarations ---------------------------------------------------

    fn program(&mut self, program: &crate::ast::Program) -> Result<(), ConvertError> {
        let ident = self.declare(&program.name);
        self.module.push(Code::DefineProgram { ident });
        for decl in &program.elements {
            match decl {
                Decl::Format(format) => self.format(format)?,
                Decl::Enum(decl) => self.enum_decl(decl)?,
                Decl::State(decl) => self.state_decl(decl)?,
            }
        }
        self.module.push(Code::EndProgram {});
        Ok(())
    }

    fn enum_decl(&mut self, decl: &crate::ast::EnumDecl) -> Result<(), ConvertError> {
        let ident = self.declare(&decl.name);
        let base = match &decl.base {
            Some(ty) => self.storage_ref(ty),
            None => wirec_ir::ids::StorageRef::NULL,
        };
        self.module.push(Code::DefineEnum { ident, base });
        self.push_scope();
        for member in &decl.members {
            let member_ident = self.declare(&member.name);
            self.module.push(Code::DefineEnumMember {
                ident: member_ident,
                value: member.value,
            });
        }
        self.pop_scope();
        self.module.push(Code::EndEnum {});
        Ok(())
    }

    fn state_decl(&mut self, decl: &crate::ast::StateDecl) -> Result<(), ConvertError> {
        let ident = self.declare(&decl.name);
        self.module.push(Code::DefineState { ident });
        for var in &decl.vars {
            let var_ident = self.declare(&var.name);
            let storage = self.storage_ref(&var.ty);
            self.module.push(Code::DefineField {
                ident: var_ident,
                belong: ident,
                storage,
            });
        }
        self.module.push(Code::EndState {});
        Ok(())
    }

    fn format(&mut self, format: &FormatDecl) -> Result<(), ConvertError> {
        let ident = self.declare(&format.name);
        self.module.push(Code::DefineFormat { ident });
        self.push_scope();

        if !format.state.is_empty() {
            let state_ident = self.fresh(&format!("{}.state", format.name));
            self.module.push(Code::DefineState { ident: state_ident });
            for var in &format.state {
                let var_ident = self.declare(&var.name);
                let storage = self.storage_ref(&var.ty);
                self.module.push(Code::DefineField {
                    ident: var_ident,
                    belong: state_ident,
                    storage,
                });
            }
            self.module.push(Code::EndState {});
        }

        let mut has_encoder = false;
        let mut has_decoder = false;
        for member in &format.members {
            if let Member::Function(f) = member {
                match f.role {
                    FunctionRole::Encode => has_encoder = true,
                    FunctionRole::Decode => has_decoder = true,
                    FunctionRole::Helper => {}
                }
            }
        }

        for member in &format.members {
            match member {
                Member::Field(field) => {
                    let field_ident = self.declare(&field.name);
                    let storage = self.storage_ref(&field.ty);
                    self.module.push(Code::DefineField {
                        ident: field_ident,
                        belong: ident,
                        storage,
                    });
                }
                Member::BitField { name, fields } => {
                    self.bit_field(ident, name, fields);
                }
                Member::Union { name, variants } => {
                    let union_ident = self.declare(name);
                    self.module.push(Code::DefineUnion { ident: union_ident });
                    for variant in variants {
                        let member_ident = self.declare(&variant.name);
                        self.module.push(Code::DefineUnionMember {
                            ident: member_ident,
                            belong: union_ident,
                        });
                        for field in &variant.fields {
                            let field_ident = self.declare(&field.name);
                            let storage = self.storage_ref(&field.ty);
                            self.module.push(Code::DefineField {
                                ident: field_ident,
                                belong: member_ident,
                                storage,
                            });
                        }
                        self.module.push(Code::EndUnionMember {});
                    }
                    self.module.push(Code::EndUnion {});
                }
                Member::Property(property) => {
                    self.property(ident, property)?;
                }
                Member::Function(function) => {
                    self.function(format, ident, function)?;
                }
            }
        }

        if !has_encoder {
            self.synthesize_coder(format, ident, Dir::Encode)?;
        }
        if !has_decoder {
            self.synthesize_coder(format, ident, Dir::Decode)?;
        }

        self.pop_scope();
        self.module.push(Code::EndFormat {});
        Ok(())
    }

    fn bit_field(&mut self, belong: ObjectId, name: &str, fields: &[FieldDecl]) {
        let ident = self.declare(name);
        // Declared shape is the concatenation of field shapes; the deriver
        // pass rewrites it to a single uint of the computed total width.
        let mut elements = Vec::new();
        for field in fields {
            elements.extend(self.storages_for(&field.ty).0);
        }
        let storage = self.module.get_storage_ref(Storages(elements));
        self.module.push(Code::DefineBitField { ident, belong, storage });
        for field in fields {
            let field_ident = self.declare(&field.name);
            let field_storage = self.storage_ref(&field.ty);
            self.module.push(Code::DefineField {
                ident: field_ident,
                belong: ident,
                storage: field_storage,
            });
        }
        self.module.push(Code::EndBitField {});
    }

    fn property(&mut self, belong: ObjectId, property: &PropertyDecl) -> Result<(), ConvertError> {
        let ident = self.declare(&property.name);
        self.module.push(Code::DefineProperty { ident, belong });
        self.push_scope();
        for member in &property.members {
            match member {
                PropertyMember::Conditional { cond, field } => {
                    let cond_id = self.expr(cond)?;
                    let field_ident = self.declare(&field.name);
                    let storage = self.storage_ref(&field.ty);
                    self.module.push(Code::DefineField {
                        ident: field_ident,
                        belong: ident,
                        storage,
                    });
                    let record = self.fresh(&format!("{}.cond", field.name));
                    self.module.push(Code::ConditionalField {
                        ident: record,
                        cond: cond_id,
                        field: field_ident,
                        belong: ident,
                    });
                }
                PropertyMember::Property(nested) => {
                    self.property(ident, nested)?;
                }
            }
        }
        self.pop_scope();
        self.module.push(Code::EndProperty {});
        Ok(())
    }

    fn function(
        &mut self,
        format: &FormatDecl,
        belong: ObjectId,
        function: &FunctionDecl,
    ) -> Result<(), ConvertError> {
        let ident = self.declare(&function.name);
        let kind = match function.role {
            FunctionRole::Encode => FunctionKind::Encode,
            FunctionRole::Decode => FunctionKind::Decode,
            FunctionRole::Helper => FunctionKind::Free,
        };
        self.module.push(Code::DefineFunction { ident, belong, kind });
        self.push_scope();
        for param in &function.params {
            let param_ident = self.declare(&param.name);
            let storage = self.storage_ref(&param.ty);
            self.module.push(Code::DefineParameter { ident: param_ident, storage });
        }
        let dir = match function.role {
            FunctionRole::Decode => Dir::Decode,
            _ => Dir::Encode,
        };
        let mut ctx = FnCtx::default();
        for stmt in &function.body {
            self.stmt(format, dir, &mut ctx, stmt)?;
        }
        self.pop_scope();
        self.module.push(Code::EndFunction {});
        Ok(())
    }

    /// Derive an encoder or decoder from the field declarations, in order.
    fn synthesize_coder(
        &mut self,
        format: &FormatDecl,
        belong: ObjectId,
        dir: Dir,
    ) -> Result<(), ConvertError> {
        let suffix = match dir {
            Dir::Encode => "encode",
            Dir::Decode => "decode",
        };
        let ident = self.declare(&format!("{}.{suffix}", format.name));
        let kind = match dir {
            Dir::Encode => FunctionKind::Encode,
            Dir::Decode => FunctionKind::Decode,
        };
        self.module.push(Code::DefineFunction { ident, belong, kind });
        self.push_scope();
        let mut ctx = FnCtx::default();
        for member in &format.members {
            match member {
                Member::Field(field) => {
                    self.transfer_field(format, dir, &mut ctx, field)?;
                }
                Member::BitField { name, fields } => {
                    let target = self.lookup_ident(name);
                    let bits = fields.iter().map(|f| literal_bits(&f.ty)).sum();
                    let endian = self.endian_expr(format, &mut ctx, None)?;
                    self.push_int_transfer(dir, target, bits, endian);
                }
                // Unions and properties transfer through explicit
                // functions or conditional properties, not here.
                Member::Union { .. } | Member::Property(_) | Member::Function(_) => {}
            }
        }
        self.pop_scope();
        self.module.push(Code::EndFunction {});
        Ok(())
    }

    // --- statements -----------------------------------------------------

    fn stmt(
        &mut self,
        format: &FormatDecl,
        dir: Dir,
        ctx: &mut FnCtx,
        stmt: &Stmt,
    ) -> Result<(), ConvertError> {
        match stmt {
            Stmt::Encode { field } => {
                let decl = find_field(format, field).ok_or_else(|| ConvertError::UnknownField {
                    format: format.name.clone(),
                    field: field.clone(),
                })?;
                self.transfer_field(format, Dir::Encode, ctx, &decl)?;
            }
            Stmt::Decode { field } => {
                let decl = find_field(format, field).ok_or_else(|| ConvertError::UnknownField {
                    format: format.name.clone(),
                    field: field.clone(),
                })?;
                self.transfer_field(format, Dir::Decode, ctx, &decl)?;
            }
            Stmt::If { cond, then, elifs, r#else } => {
                let cond_id = self.expr(cond)?;
                self.module.push(Code::If { cond: cond_id });
                for inner in then {
                    self.stmt(format, dir, ctx, inner)?;
                }
                for arm in elifs {
                    let arm_cond = self.expr(&arm.cond)?;
                    self.module.push(Code::Elif { cond: arm_cond });
                    for inner in &arm.body {
                        self.stmt(format, dir, ctx, inner)?;
                    }
                }
                if let Some(body) = r#else {
                    self.module.push(Code::Else {});
                    for inner in body {
                        self.stmt(format, dir, ctx, inner)?;
                    }
                }
                self.module.push(Code::EndIf {});
            }
            Stmt::Match { target, exhaustive, cases } => {
                let target_id = self.expr(target)?;
                if *exhaustive {
                    self.module.push(Code::ExhaustiveMatch { target: target_id });
                } else {
                    self.module.push(Code::Match { target: target_id });
                }
                for case in cases {
                    self.case(format, dir, ctx, case)?;
                }
                self.module.push(Code::EndMatch {});
            }
            Stmt::Loop { cond, body } => {
                match cond {
                    Some(cond) => {
                        let cond_id = self.expr(cond)?;
                        self.module.push(Code::LoopCondition { cond: cond_id });
                    }
                    None => self.module.push(Code::LoopInfinite {}),
                }
                for inner in body {
                    self.stmt(format, dir, ctx, inner)?;
                }
                self.module.push(Code::EndLoop {});
            }
            Stmt::Break {} => self.module.push(Code::Break {}),
            Stmt::Continue {} => self.module.push(Code::Continue {}),
            Stmt::Return { value } => {
                let value = match value {
                    Some(expr) => self.expr(expr)?,
                    None => ObjectId::NULL,
                };
                self.module.push(Code::Ret { value });
            }
            Stmt::Let { name, ty, value } => {
                let init = self.expr(value)?;
                let ident = self.declare(name);
                let storage = self.storage_ref(ty);
                self.module.push(Code::DefineVariable { ident, init, storage });
            }
            Stmt::Assign { target, value } => {
                let left = self.expr(target)?;
                let right = self.expr(value)?;
                self.module.push(Code::Assign { left, right });
            }
            Stmt::Assert { cond } => {
                let cond_id = self.expr(cond)?;
                self.module.push(Code::Assert { cond: cond_id });
            }
            Stmt::Error { message } => {
                let message = self.module.intern_string(message);
                self.module.push(Code::ExplicitError { message });
            }
        }
        Ok(())
    }

    fn case(
        &mut self,
        format: &FormatDecl,
        dir: Dir,
        ctx: &mut FnCtx,
        case: &CaseArm,
    ) -> Result<(), ConvertError> {
        match &case.cond {
            Some(cond) => {
                let cond_id = self.expr(cond)?;
                self.module.push(Code::Case { cond: cond_id });
            }
            None => self.module.push(Code::DefaultCase {}),
        }
        for inner in &case.body {
            self.stmt(format, dir, ctx, inner)?;
        }
        self.module.push(Code::EndCase {});
        Ok(())
    }

    // --- wire transfers -------------------------------------------------

    /// Emit the abstract transfer for one declared field.
    fn transfer_field(
        &mut self,
        format: &FormatDecl,
        dir: Dir,
        ctx: &mut FnCtx,
        field: &FieldDecl,
    ) -> Result<(), ConvertError> {
        let target = self.lookup_ident(&field.name);
        match &field.ty {
            TypeExpr::Uint { bits } | TypeExpr::Int { bits } | TypeExpr::Float { bits } => {
                let endian = self.endian_expr(format, ctx, field.endian.as_ref())?;
                self.push_int_transfer(dir, target, *bits, endian);
            }
            TypeExpr::Bool {} => {
                let endian = self.endian_expr(format, ctx, field.endian.as_ref())?;
                self.push_int_transfer(dir, target, 8, endian);
            }
            TypeExpr::Array { len, elem } => match elem.as_ref() {
                TypeExpr::Named { name } => {
                    self.struct_seq_transfer(dir, target, SeqLen::Fixed(*len), name)?;
                }
                elem => {
                    let endian = self.endian_expr(format, ctx, field.endian.as_ref())?;
                    let bits = literal_bits(elem);
                    match dir {
                        Dir::Encode => self.module.push(Code::EncodeIntVectorFixed {
                            target,
                            count: *len,
                            bit_size: bits,
                            endian,
                            fallback: ObjectId::NULL,
                        }),
                        Dir::Decode => self.module.push(Code::DecodeIntVectorFixed {
                            target,
                            count: *len,
                            bit_size: bits,
                            endian,
                            fallback: ObjectId::NULL,
                        }),
                    }
                }
            },
            TypeExpr::Vector { elem, len } => match elem.as_ref() {
                TypeExpr::Named { name } => {
                    let len = match len {
                        Some(expr) => SeqLen::Dynamic(self.expr(expr)?),
                        None => SeqLen::UntilEof,
                    };
                    self.struct_seq_transfer(dir, target, len, name)?;
                }
                elem => {
                    let endian = self.endian_expr(format, ctx, field.endian.as_ref())?;
                    let bits = literal_bits(elem);
                    match (dir, len) {
                        (Dir::Encode, Some(expr)) => {
                            let len = self.expr(expr)?;
                            self.module.push(Code::EncodeIntVector {
                                target,
                                len,
                                bit_size: bits,
                                endian,
                                fallback: ObjectId::NULL,
                            });
                        }
                        (Dir::Encode, None) => {
                            let len = self.fresh(&format!("{}.len", field.name));
                            self.module.push(Code::ArraySize { ident: len, array: target });
                            self.module.push(Code::EncodeIntVector {
                                target,
                                len,
                                bit_size: bits,
                                endian,
                                fallback: ObjectId::NULL,
                            });
                        }
                        (Dir::Decode, Some(expr)) => {
                            let len = self.expr(expr)?;
                            self.module.push(Code::DecodeIntVector {
                                target,
                                len,
                                bit_size: bits,
                                endian,
                                fallback: ObjectId::NULL,
                            });
                        }
                        (Dir::Decode, None) => {
                            self.module.push(Code::DecodeIntVectorUntilEof {
                                target,
                                bit_size: bits,
                                endian,
                                fallback: ObjectId::NULL,
                            });
                        }
                    }
                }
            },
            TypeExpr::Named { name } => match self.top_kinds.get(name).copied() {
                Some(TopKind::Enum(bits)) => {
                    let endian = self.endian_expr(format, ctx, field.endian.as_ref())?;
                    self.push_int_transfer(dir, target, bits, endian);
                }
                _ => {
                    let callee = self.lookup_ident(name);
                    match dir {
                        Dir::Encode => self.module.push(Code::CallEncode {
                            target: callee,
                            obj: target,
                            size_surplus: 0,
                        }),
                        Dir::Decode => self.module.push(Code::CallDecode {
                            target: callee,
                            obj: target,
                            size_surplus: 0,
                        }),
                    }
                }
            },
        }
        Ok(())
    }

    fn push_int_transfer(&mut self, dir: Dir, target: ObjectId, bits: u64, endian: EndianExpr) {
        match dir {
            Dir::Encode => self.module.push(Code::EncodeInt {
                target,
                bit_size: bits,
                endian,
                fallback: ObjectId::NULL,
            }),
            Dir::Decode => self.module.push(Code::DecodeInt {
                target,
                bit_size: bits,
                endian,
                fallback: ObjectId::NULL,
            }),
        }
    }

    /// Per-element coder calls for sequences of struct elements.
    fn struct_seq_transfer(
        &mut self,
        dir: Dir,
        target: ObjectId,
        len: SeqLen,
        elem_name: &str,
    ) -> Result<(), ConvertError> {
        let callee = self.lookup_ident(elem_name);
        let len_id = match len {
            SeqLen::Fixed(count) => {
                let id = self.fresh("len");
                self.module.push(Code::ImmediateInt { ident: id, value: count });
                id
            }
            SeqLen::Dynamic(id) => id,
            SeqLen::UntilEof => {
                let id = self.fresh("len");
                self.module.push(Code::ArraySize { ident: id, array: target });
                id
            }
        };
        let zero = self.fresh("zero");
        self.module.push(Code::ImmediateInt { ident: zero, value: 0 });
        let one = self.fresh("one");
        self.module.push(Code::ImmediateInt { ident: one, value: 1 });
        let counter = self.fresh("i");
        let index_storage = self.module.get_storage_ref(Storages::uint(64));
        self.module.push(Code::DefineVariable {
            ident: counter,
            init: zero,
            storage: index_storage,
        });
        let cond = self.fresh("cond");
        self.module.push(Code::Binary {
            ident: cond,
            op: BinOp::Lt,
            left: counter,
            right: len_id,
        });
        self.module.push(Code::LoopCondition { cond });
        let elem = self.fresh("elem");
        self.module.push(Code::Index { ident: elem, base: target, index: counter });
        match dir {
            Dir::Encode => self.module.push(Code::CallEncode {
                target: callee,
                obj: elem,
                size_surplus: 0,
            }),
            Dir::Decode => self.module.push(Code::CallDecode {
                target: callee,
                obj: elem,
                size_surplus: 0,
            }),
        }
        let next = self.fresh("next");
        self.module.push(Code::Binary {
            ident: next,
            op: BinOp::Add,
            left: counter,
            right: one,
        });
        self.module.push(Code::Assign { left: counter, right: next });
        self.module.push(Code::EndLoop {});
        Ok(())
    }

    /// Resolve the effective byte order for one transfer, synthesizing the
    /// dynamic-endian site on first use within the current function.
    fn endian_expr(
        &mut self,
        format: &FormatDecl,
        ctx: &mut FnCtx,
        field_endian: Option<&EndianSpec>,
    ) -> Result<EndianExpr, ConvertError> {
        let spec = field_endian.or(format.endian.as_ref());
        Ok(match spec {
            None | Some(EndianSpec::Big {}) => EndianExpr::fixed(Endian::Big),
            Some(EndianSpec::Little {}) => EndianExpr::fixed(Endian::Little),
            Some(EndianSpec::Native {}) => EndianExpr::fixed(Endian::Native),
            Some(EndianSpec::Dynamic { selector }) => {
                let site = match ctx.dynamic_site {
                    Some(site) => site,
                    None => {
                        let selector_id = self.expr(selector)?;
                        let site = self.fresh("endian");
                        self.module.push(Code::DynamicEndian {
                            ident: site,
                            selector: selector_id,
                            fallback: ObjectId::NULL,
                        });
                        ctx.dynamic_site = Some(site);
                        site
                    }
                };
                EndianExpr::dynamic(site)
            }
        })
    }

    // --- expressions ----------------------------------------------------

    /// Emit instructions for an expression, returning the producing id.
    fn expr(&mut self, expr: &Expr) -> Result<ObjectId, ConvertError> {
        Ok(match expr {
            Expr::Ident { name } => self.lookup_ident(name),
            Expr::Int { value } => {
                let ident = self.fresh("imm");
                self.module.push(Code::ImmediateInt { ident, value: *value });
                ident
            }
            Expr::Bool { value } => {
                let ident = self.fresh("imm");
                if *value {
                    self.module.push(Code::ImmediateTrue { ident });
                } else {
                    self.module.push(Code::ImmediateFalse { ident });
                }
                ident
            }
            Expr::Binary { op, left, right } => {
                let left = self.expr(left)?;
                let right = self.expr(right)?;
                let op = bin_op(op)?;
                let ident = self.fresh("bin");
                self.module.push(Code::Binary { ident, op, left, right });
                ident
            }
            Expr::Unary { op, operand } => {
                let operand = self.expr(operand)?;
                let op = un_op(op)?;
                let ident = self.fresh("un");
                self.module.push(Code::Unary { ident, op, operand });
                ident
            }
            Expr::Member { base, name } => {
                let base = self.expr(base)?;
                let member = self.lookup_ident(name);
                let ident = self.fresh("member");
                self.module.push(Code::Access { ident, base, member });
                ident
            }
            Expr::Index { base, index } => {
                let base = self.expr(base)?;
                let index = self.expr(index)?;
                let ident = self.fresh("index");
                self.module.push(Code::Index { ident, base, index });
                ident
            }
            Expr::Cast { ty, operand } => {
                let operand = self.expr(operand)?;
                let storage = self.storage_ref(ty);
                let ident = self.fresh("cast");
                self.module.push(Code::Cast { ident, storage, operand });
                ident
            }
            Expr::ArraySize { array } => {
                let array = self.expr(array)?;
                let ident = self.fresh("len");
                self.module.push(Code::ArraySize { ident, array });
                ident
            }
        })
    }

    // --- types ----------------------------------------------------------

    fn storages_for(&mut self, ty: &TypeExpr) -> Storages {
        let mut elements = Vec::new();
        self.collect_storage(ty, &mut elements);
        Storages(elements)
    }

    fn storage_ref(&mut self, ty: &TypeExpr) -> wirec_ir::ids::StorageRef {
        let storages = self.storages_for(ty);
        self.module.get_storage_ref(storages)
    }

    fn collect_storage(&mut self, ty: &TypeExpr, out: &mut Vec<Storage>) {
        match ty {
            TypeExpr::Uint { bits } => out.push(Storage::sized(StorageKind::Uint, *bits)),
            TypeExpr::Int { bits } => out.push(Storage::sized(StorageKind::Int, *bits)),
            TypeExpr::Float { bits } => out.push(Storage::sized(StorageKind::Float, *bits)),
            TypeExpr::Bool {} => out.push(Storage::bare(StorageKind::Bool)),
            TypeExpr::Array { len, elem } => {
                out.push(Storage::sized(StorageKind::Array, *len));
                self.collect_storage(elem, out);
            }
            TypeExpr::Vector { elem, .. } => {
                out.push(Storage::bare(StorageKind::Vector));
                self.collect_storage(elem, out);
            }
            TypeExpr::Named { name } => {
                let reference = self.lookup_ident(name);
                match self.top_kinds.get(name) {
                    Some(TopKind::Enum(_)) => {
                        out.push(Storage::reference(StorageKind::Enum, reference));
                    }
                    _ => out.push(Storage::struct_ref(reference)),
                }
            }
        }
    }
}

/// Per-function conversion state.
#[derive(Default)]
struct FnCtx {
    /// Dynamic-endian site already emitted in this function body.
    dynamic_site: Option<ObjectId>,
}

/// Sequence length source for struct-element transfers.
enum SeqLen {
    Fixed(u64),
    Dynamic(ObjectId),
    UntilEof,
}

/// Literal bit width of an integer-like element, 0 when unknown.
fn literal_bits(ty: &TypeExpr) -> u64 {
    match ty {
        TypeExpr::Uint { bits } | TypeExpr::Int { bits } | TypeExpr::Float { bits } => *bits,
        TypeExpr::Bool {} => 8,
        _ => 0,
    }
}

fn find_field(format: &FormatDecl, name: &str) -> Option<FieldDecl> {
    for member in &format.members {
        match member {
            Member::Field(field) if field.name == name => return Some(field.clone()),
            Member::BitField { fields, .. } => {
                if let Some(field) = fields.iter().find(|f| f.name == name) {
                    return Some(field.clone());
                }
            }
            _ => {}
        }
    }
    None
}

fn bin_op(op: &str) -> Result<BinOp, ConvertError> {
    Ok(match op {
        "+" => BinOp::Add,
        "-" => BinOp::Sub,
        "*" => BinOp::Mul,
        "/" => BinOp::Div,
        "%" => BinOp::Mod,
        "<<" => BinOp::Shl,
        ">>" => BinOp::Shr,
        "&" => BinOp::BitAnd,
        "|" => BinOp::BitOr,
        "^" => BinOp::BitXor,
        "==" => BinOp::Eq,
        "!=" => BinOp::Ne,
        "<" => BinOp::Lt,
        "<=" => BinOp::Le,
        ">" => BinOp::Gt,
        ">=" => BinOp::Ge,
        "&&" => BinOp::LogicalAnd,
        "||" => BinOp::LogicalOr,
        other => return Err(ConvertError::UnknownBinaryOp(other.to_string())),
    })
}

fn un_op(op: &str) -> Result<UnOp, ConvertError> {
    Ok(match op {
        "!" => UnOp::Not,
        "~" => UnOp::BitNot,
        "-" => UnOp::Neg,
        other => return Err(ConvertError::UnknownUnaryOp(other.to_string())),
    })
}
