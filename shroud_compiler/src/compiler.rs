//! AST to 3.11 bytecode compiler.
//!
//! The compiler runs in two phases:
//!
//! 1. **Scope analysis**: [`SymbolTable::build`] resolves every name.
//! 2. **Code generation**: each scope becomes a unit whose labeled
//!    instructions are assembled into a [`CodeUnit`] when the scope closes.
//!
//! Exception handling follows the table-driven model: every instruction
//! records its active handler, and the handler's stack depth is derived from
//! the frame blocks (loops, `with`, handlers) that are open around the
//! statement being compiled.

use crate::assemble::{Handler, Instr, InstrArg, InstrSeq, Label, assemble};
use crate::bytecode::{
    BinaryOpArg, CodeFlags, CodeHeader, CodeUnit, CompareOpArg, Constant, Encoder, Opcode,
    make_function,
};
use crate::symtable::{Binding, CLASS_CELL, ScopeKind, SymbolTable};
use shroud_core::{ShroudError, ShroudResult, Span};
use shroud_parser::ast::{
    Arguments, BinOp, BoolOp, CmpOp, Comprehension, ExceptHandler, Expr, ExprContext, ExprKind,
    Keyword, Module, Stmt, StmtKind, UnaryOp, WithItem,
};
use smallvec::SmallVec;

/// Frame blocks open in one unit. Nesting rarely goes past a handful.
type FBlockStack<'a> = SmallVec<[FBlock<'a>; 8]>;

// =============================================================================
// Frame blocks
// =============================================================================

#[derive(Debug, Clone, Copy)]
enum FBlockKind<'a> {
    WhileLoop { cont: Label, brk: Label },
    ForLoop { cont: Label, brk: Label },
    TryExcept,
    FinallyTry { body: &'a [Stmt] },
    FinallyEnd,
    With,
    HandlerCleanup { name: Option<&'a str> },
    PopValue,
}

impl FBlockKind<'_> {
    /// Values this block keeps on the stack while its body runs.
    const fn stack_items(self) -> u32 {
        match self {
            Self::ForLoop { .. } | Self::With | Self::HandlerCleanup { .. } | Self::PopValue => 1,
            Self::FinallyEnd => 2,
            Self::WhileLoop { .. } | Self::TryExcept | Self::FinallyTry { .. } => 0,
        }
    }

    const fn is_loop(self) -> bool {
        matches!(self, Self::WhileLoop { .. } | Self::ForLoop { .. })
    }
}

#[derive(Debug, Clone, Copy)]
struct FBlock<'a> {
    kind: FBlockKind<'a>,
    /// Handler active before the block was entered.
    outer: Option<Handler>,
}

// =============================================================================
// Units
// =============================================================================

struct Unit<'a> {
    scope: usize,
    seq: InstrSeq,
    encoder: Encoder,
    header: CodeHeader,
    localsplus: Vec<String>,
    fblocks: FBlockStack<'a>,
    handler: Option<Handler>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Access {
    Fast,
    Deref,
    ClassDeref,
    Global,
    Name,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Collection {
    Tuple,
    List,
    Set,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum CompKind {
    List,
    Set,
    Dict,
    Generator,
}

enum TryBody<'a> {
    Plain(&'a [Stmt]),
    Except {
        body: &'a [Stmt],
        handlers: &'a [ExceptHandler],
        orelse: &'a [Stmt],
    },
}

// =============================================================================
// Compiler
// =============================================================================

/// Bytecode compiler.
pub struct Compiler<'a> {
    table: SymbolTable,
    filename: String,
    units: Vec<Unit<'a>>,
}

impl<'a> Compiler<'a> {
    /// Compile a module into its top-level code unit.
    pub fn compile_module(module: &'a Module, filename: &str) -> ShroudResult<CodeUnit> {
        let table = SymbolTable::build(module)?;
        let mut compiler = Compiler {
            table,
            filename: filename.to_string(),
            units: Vec::new(),
        };
        compiler.enter_unit(0, Span::point(1, 0), None)?;

        let mut body = module.body.as_slice();
        if let Some(doc) = docstring(body) {
            compiler.load_const(Constant::Str(doc.to_string()))?;
            compiler.name_op("__doc__", ExprContext::Store)?;
            body = &body[1..];
        }
        compiler.compile_body(body)?;
        compiler.return_none()?;
        let code = compiler.leave_unit()?;
        tracing::debug!(file = filename, units = code.nested().len() + 1, "compiled module");
        Ok(code)
    }

    // =========================================================================
    // Unit management
    // =========================================================================

    fn enter_unit(&mut self, scope_index: usize, span: Span, args: Option<&Arguments>) -> ShroudResult<()> {
        let scope = self.table.scope(scope_index);
        let mut flags = CodeFlags::NONE;
        let mut header = CodeHeader {
            filename: self.filename.clone(),
            name: scope.name.clone(),
            qualname: scope.qualname.clone(),
            firstlineno: span.line().max(1),
            cellvars: scope.cellvars.clone(),
            freevars: scope.freevars.clone(),
            ..CodeHeader::default()
        };
        let mut encoder = Encoder::new();
        let mut localsplus = Vec::new();

        if scope.kind.is_function_like() {
            flags |= CodeFlags::OPTIMIZED | CodeFlags::NEWLOCALS;
            if scope.nested {
                flags |= CodeFlags::NESTED;
            }
            if scope.is_generator {
                flags |= CodeFlags::GENERATOR;
            }
            let varnames = scope.varnames();
            for name in &varnames {
                encoder.add_varname(name)?;
            }
            localsplus.extend(varnames.iter().cloned());
            for cell in &scope.cellvars {
                if !varnames.contains(cell) {
                    localsplus.push(cell.clone());
                }
            }
            localsplus.extend(scope.freevars.iter().cloned());
        } else {
            localsplus.extend(scope.cellvars.iter().cloned());
            localsplus.extend(scope.freevars.iter().cloned());
        }
        match args {
            Some(args) => {
                header.posonlyargcount = args.posonlyargs.len() as u32;
                header.argcount = (args.posonlyargs.len() + args.args.len()) as u32;
                header.kwonlyargcount = args.kwonlyargs.len() as u32;
                if args.vararg.is_some() {
                    flags |= CodeFlags::VARARGS;
                }
                if args.kwarg.is_some() {
                    flags |= CodeFlags::VARKEYWORDS;
                }
            }
            None if scope.kind == ScopeKind::Comprehension => header.argcount = 1,
            None => {}
        }
        header.flags = flags;

        let is_generator = scope.is_generator;
        let cells = scope.cellvars.clone();
        let nfree = scope.freevars.len() as u32;
        self.units.push(Unit {
            scope: scope_index,
            seq: InstrSeq::new(),
            encoder,
            header,
            localsplus,
            fblocks: FBlockStack::new(),
            handler: None,
        });

        if nfree > 0 {
            self.emit(Opcode::CopyFreeVars, nfree)?;
        }
        for cell in &cells {
            let slot = self.slot(cell)?;
            self.emit(Opcode::MakeCell, slot)?;
        }
        if is_generator {
            self.op(Opcode::ReturnGenerator)?;
            self.op(Opcode::PopTop)?;
        }
        self.emit(Opcode::Resume, 0)
    }

    fn leave_unit(&mut self) -> ShroudResult<CodeUnit> {
        let unit = self
            .units
            .pop()
            .ok_or_else(|| ShroudError::internal("no code unit to close"))?;
        assemble(&unit.seq, unit.encoder, unit.header)
    }

    fn unit(&self) -> ShroudResult<&Unit<'a>> {
        self.units
            .last()
            .ok_or_else(|| ShroudError::internal("no active code unit"))
    }

    fn unit_mut(&mut self) -> ShroudResult<&mut Unit<'a>> {
        self.units
            .last_mut()
            .ok_or_else(|| ShroudError::internal("no active code unit"))
    }

    fn scope_kind(&self) -> ShroudResult<ScopeKind> {
        Ok(self.table.scope(self.unit()?.scope).kind)
    }

    fn slot(&self, name: &str) -> ShroudResult<u32> {
        self.unit()?
            .localsplus
            .iter()
            .position(|n| n == name)
            .map(|i| i as u32)
            .ok_or_else(|| ShroudError::internal(format!("no local slot for '{name}'")))
    }

    // =========================================================================
    // Emission
    // =========================================================================

    fn emit(&mut self, op: Opcode, arg: u32) -> ShroudResult<()> {
        let unit = self.unit_mut()?;
        let arg = if op.has_arg() {
            InstrArg::Value(arg)
        } else {
            InstrArg::None
        };
        let handler = unit.handler;
        unit.seq.push(Instr { op, arg, handler });
        Ok(())
    }

    fn op(&mut self, op: Opcode) -> ShroudResult<()> {
        self.emit(op, 0)
    }

    fn jump(&mut self, op: Opcode, label: Label) -> ShroudResult<()> {
        let unit = self.unit_mut()?;
        let handler = unit.handler;
        unit.seq.push(Instr {
            op,
            arg: InstrArg::Jump(label),
            handler,
        });
        Ok(())
    }

    fn new_label(&mut self) -> ShroudResult<Label> {
        Ok(self.unit_mut()?.seq.new_label())
    }

    fn bind(&mut self, label: Label) -> ShroudResult<()> {
        self.unit_mut()?.seq.bind(label)
    }

    fn set_handler(&mut self, handler: Option<Handler>) -> ShroudResult<()> {
        self.unit_mut()?.handler = handler;
        Ok(())
    }

    fn handler(&self) -> ShroudResult<Option<Handler>> {
        Ok(self.unit()?.handler)
    }

    fn load_const(&mut self, value: Constant) -> ShroudResult<()> {
        let index = self.unit_mut()?.encoder.add_const(value)?;
        self.emit(Opcode::LoadConst, index)
    }

    fn name_index(&mut self, name: &str) -> ShroudResult<u32> {
        self.unit_mut()?.encoder.add_name(name)
    }

    fn return_none(&mut self) -> ShroudResult<()> {
        self.load_const(Constant::None)?;
        self.op(Opcode::ReturnValue)
    }

    fn call(&mut self, argc: u32) -> ShroudResult<()> {
        self.emit(Opcode::Precall, argc)?;
        self.emit(Opcode::Call, argc)
    }

    fn ends_with_terminator(&self) -> ShroudResult<bool> {
        Ok(self.unit()?.seq.ends_with_terminator())
    }

    // =========================================================================
    // Frame blocks
    // =========================================================================

    fn depth(&self) -> ShroudResult<u32> {
        Ok(self.unit()?.fblocks.iter().map(|b| b.kind.stack_items()).sum())
    }

    fn push_fblock(&mut self, kind: FBlockKind<'a>, outer: Option<Handler>) -> ShroudResult<()> {
        self.unit_mut()?.fblocks.push(FBlock { kind, outer });
        Ok(())
    }

    fn pop_fblock(&mut self) -> ShroudResult<()> {
        self.unit_mut()?
            .fblocks
            .pop()
            .map(|_| ())
            .ok_or_else(|| ShroudError::internal("frame block stack underflow"))
    }

    /// Emit the exit code of every frame block at index `keep` and above,
    /// innermost first. The block stack is restored afterwards; the active
    /// handler is left at the one outside the outermost unwound block so the
    /// caller's final jump or return is covered correctly. Returns the
    /// handler to restore once that instruction is emitted.
    fn unwind_to(&mut self, keep: usize, preserve_tos: bool) -> ShroudResult<Option<Handler>> {
        let saved_handler = self.handler()?;
        let saved: FBlockStack<'a> = self.unit()?.fblocks.clone();
        for i in (keep..saved.len()).rev() {
            let block = saved[i];
            self.unit_mut()?.fblocks.truncate(i);
            self.set_handler(block.outer)?;
            self.unwind_block(block, preserve_tos)?;
        }
        self.unit_mut()?.fblocks = saved;
        Ok(saved_handler)
    }

    fn unwind_block(&mut self, block: FBlock<'a>, preserve_tos: bool) -> ShroudResult<()> {
        match block.kind {
            FBlockKind::WhileLoop { .. } | FBlockKind::TryExcept => Ok(()),
            FBlockKind::ForLoop { .. } | FBlockKind::PopValue => {
                if preserve_tos {
                    self.emit(Opcode::Swap, 2)?;
                }
                self.op(Opcode::PopTop)
            }
            FBlockKind::FinallyTry { body } => {
                if preserve_tos {
                    self.push_fblock(FBlockKind::PopValue, block.outer)?;
                }
                self.compile_body(body)?;
                if preserve_tos {
                    self.pop_fblock()?;
                }
                Ok(())
            }
            FBlockKind::FinallyEnd => {
                if preserve_tos {
                    self.emit(Opcode::Swap, 2)?;
                }
                self.op(Opcode::PopTop)?;
                if preserve_tos {
                    self.emit(Opcode::Swap, 2)?;
                }
                self.op(Opcode::PopExcept)
            }
            FBlockKind::With => {
                if preserve_tos {
                    self.emit(Opcode::Swap, 2)?;
                }
                self.call_exit_with_nones()?;
                self.op(Opcode::PopTop)
            }
            FBlockKind::HandlerCleanup { name } => {
                if preserve_tos {
                    self.emit(Opcode::Swap, 2)?;
                }
                self.op(Opcode::PopExcept)?;
                if let Some(name) = name {
                    self.clear_name(name)?;
                }
                Ok(())
            }
        }
    }

    fn call_exit_with_nones(&mut self) -> ShroudResult<()> {
        for _ in 0..3 {
            self.load_const(Constant::None)?;
        }
        self.call(2)
    }

    fn clear_name(&mut self, name: &str) -> ShroudResult<()> {
        self.load_const(Constant::None)?;
        self.name_op(name, ExprContext::Store)?;
        self.name_op(name, ExprContext::Del)
    }

    // =========================================================================
    // Names
    // =========================================================================

    fn access(&self, name: &str) -> ShroudResult<Access> {
        let scope = self.table.scope(self.unit()?.scope);
        let function_like = scope.kind.is_function_like();
        Ok(match scope.binding(name) {
            Binding::GlobalExplicit => Access::Global,
            Binding::Local if function_like => Access::Fast,
            Binding::Cell | Binding::Free if function_like => Access::Deref,
            Binding::GlobalImplicit if function_like => Access::Global,
            Binding::Free if scope.kind == ScopeKind::Class => Access::ClassDeref,
            _ => Access::Name,
        })
    }

    fn name_op(&mut self, name: &str, ctx: ExprContext) -> ShroudResult<()> {
        let access = self.access(name)?;
        match access {
            Access::Fast | Access::Deref | Access::ClassDeref => {
                let slot = self.slot(name)?;
                let op = match (access, ctx) {
                    (Access::Fast, ExprContext::Load) => Opcode::LoadFast,
                    (Access::Fast, ExprContext::Store) => Opcode::StoreFast,
                    (Access::Fast, ExprContext::Del) => Opcode::DeleteFast,
                    (Access::ClassDeref, ExprContext::Load) => Opcode::LoadClassderef,
                    (_, ExprContext::Load) => Opcode::LoadDeref,
                    (_, ExprContext::Store) => Opcode::StoreDeref,
                    (_, ExprContext::Del) => Opcode::DeleteDeref,
                };
                self.emit(op, slot)
            }
            Access::Global => {
                let index = self.name_index(name)?;
                match ctx {
                    ExprContext::Load => self.emit(Opcode::LoadGlobal, index << 1),
                    ExprContext::Store => self.emit(Opcode::StoreGlobal, index),
                    ExprContext::Del => self.emit(Opcode::DeleteGlobal, index),
                }
            }
            Access::Name => {
                let index = self.name_index(name)?;
                let op = match ctx {
                    ExprContext::Load => Opcode::LoadName,
                    ExprContext::Store => Opcode::StoreName,
                    ExprContext::Del => Opcode::DeleteName,
                };
                self.emit(op, index)
            }
        }
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn compile_body(&mut self, body: &'a [Stmt]) -> ShroudResult<()> {
        for stmt in body {
            self.compile_stmt(stmt)?;
        }
        Ok(())
    }

    fn compile_stmt(&mut self, stmt: &'a Stmt) -> ShroudResult<()> {
        match &stmt.kind {
            StmtKind::FunctionDef {
                name,
                args,
                body,
                decorator_list,
                returns,
                ..
            } => self.compile_function_def(stmt, name, args, body, decorator_list, returns.as_deref()),
            StmtKind::ClassDef {
                name,
                bases,
                keywords,
                body,
                decorator_list,
            } => self.compile_class_def(stmt, name, bases, keywords, body, decorator_list),
            StmtKind::Return(value) => self.compile_return(stmt.span, value.as_deref()),
            StmtKind::Delete(targets) => {
                for target in targets {
                    self.compile_delete(target)?;
                }
                Ok(())
            }
            StmtKind::Assign { targets, value } => {
                self.compile_expr(value)?;
                for (i, target) in targets.iter().enumerate() {
                    if i + 1 < targets.len() {
                        self.emit(Opcode::Copy, 1)?;
                    }
                    self.compile_store(target)?;
                }
                Ok(())
            }
            StmtKind::AugAssign { target, op, value } => self.compile_aug_assign(target, *op, value),
            StmtKind::AnnAssign { target, value, .. } => match value {
                Some(value) => {
                    self.compile_expr(value)?;
                    self.compile_store(target)
                }
                None => Ok(()),
            },
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
                ..
            } => self.compile_for(target, iter, body, orelse),
            StmtKind::While { test, body, orelse } => self.compile_while(test, body, orelse),
            StmtKind::If { test, body, orelse } => self.compile_if(test, body, orelse),
            StmtKind::With { items, body, .. } => self.compile_with(items, body),
            StmtKind::Raise { exc, cause } => {
                let mut argc = 0;
                if let Some(exc) = exc {
                    self.compile_expr(exc)?;
                    argc = 1;
                    if let Some(cause) = cause {
                        self.compile_expr(cause)?;
                        argc = 2;
                    }
                }
                self.emit(Opcode::RaiseVarargs, argc)
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                let inner = if handlers.is_empty() {
                    TryBody::Plain(body)
                } else {
                    TryBody::Except {
                        body,
                        handlers,
                        orelse,
                    }
                };
                if finalbody.is_empty() {
                    self.compile_try_body(inner)
                } else {
                    self.compile_try_finally(inner, finalbody)
                }
            }
            StmtKind::Assert { test, msg } => {
                let end = self.new_label()?;
                self.compile_expr(test)?;
                self.jump(Opcode::PopJumpForwardIfTrue, end)?;
                self.op(Opcode::LoadAssertionError)?;
                if let Some(msg) = msg {
                    self.compile_expr(msg)?;
                    self.call(0)?;
                }
                self.emit(Opcode::RaiseVarargs, 1)?;
                self.bind(end)
            }
            StmtKind::Import(aliases) => {
                for alias in aliases {
                    self.load_const(Constant::Int(0))?;
                    self.load_const(Constant::None)?;
                    let index = self.name_index(&alias.name)?;
                    self.emit(Opcode::ImportName, index)?;
                    match &alias.asname {
                        Some(asname) => {
                            let parts: Vec<&str> = alias.name.split('.').collect();
                            if parts.len() > 1 {
                                for (i, part) in parts[1..].iter().enumerate() {
                                    let index = self.name_index(part)?;
                                    self.emit(Opcode::ImportFrom, index)?;
                                    if i + 2 < parts.len() {
                                        self.emit(Opcode::Swap, 2)?;
                                        self.op(Opcode::PopTop)?;
                                    }
                                }
                                self.name_op(asname, ExprContext::Store)?;
                                self.op(Opcode::PopTop)?;
                            } else {
                                self.name_op(asname, ExprContext::Store)?;
                            }
                        }
                        None => {
                            let top = alias.name.split('.').next().unwrap_or(&alias.name);
                            self.name_op(top, ExprContext::Store)?;
                        }
                    }
                }
                Ok(())
            }
            StmtKind::ImportFrom {
                module,
                names,
                level,
            } => {
                self.load_const(Constant::Int(i64::from(*level)))?;
                let fromlist = names.iter().map(|a| Constant::Str(a.name.clone())).collect();
                self.load_const(Constant::Tuple(fromlist))?;
                let index = self.name_index(module.as_deref().unwrap_or(""))?;
                self.emit(Opcode::ImportName, index)?;
                if names.first().is_some_and(|a| a.name == "*") {
                    return self.op(Opcode::ImportStar);
                }
                for alias in names {
                    let index = self.name_index(&alias.name)?;
                    self.emit(Opcode::ImportFrom, index)?;
                    self.name_op(alias.asname.as_deref().unwrap_or(&alias.name), ExprContext::Store)?;
                }
                self.op(Opcode::PopTop)
            }
            StmtKind::Global(_) | StmtKind::Nonlocal(_) | StmtKind::Pass => Ok(()),
            StmtKind::Expr(value) => {
                self.compile_expr(value)?;
                self.op(Opcode::PopTop)
            }
            StmtKind::Break => self.compile_break(stmt.span),
            StmtKind::Continue => self.compile_continue(stmt.span),
            StmtKind::Match { .. } => Err(ShroudError::compile(
                "match statements are not supported",
                Some(stmt.span),
            )),
            StmtKind::TryStar { .. } => Err(ShroudError::compile("'except*' is not supported", Some(stmt.span))),
        }
    }

    fn compile_return(&mut self, span: Span, value: Option<&'a Expr>) -> ShroudResult<()> {
        if !self.scope_kind()?.is_function_like() {
            return Err(ShroudError::compile("'return' outside function", Some(span)));
        }
        if let Some(value) = value {
            self.compile_expr(value)?;
        }
        let restore = self.unwind_to(0, value.is_some())?;
        if value.is_none() {
            self.load_const(Constant::None)?;
        }
        self.op(Opcode::ReturnValue)?;
        self.set_handler(restore)
    }

    fn innermost_loop(&self, span: Span, what: &str) -> ShroudResult<(usize, FBlockKind<'a>)> {
        self.unit()?
            .fblocks
            .iter()
            .enumerate()
            .rev()
            .find(|(_, b)| b.kind.is_loop())
            .map(|(i, b)| (i, b.kind))
            .ok_or_else(|| ShroudError::compile(format!("'{what}' outside loop"), Some(span)))
    }

    fn compile_break(&mut self, span: Span) -> ShroudResult<()> {
        let (index, kind) = self.innermost_loop(span, "break")?;
        let restore = self.unwind_to(index + 1, false)?;
        let target = match kind {
            FBlockKind::ForLoop { brk, .. } => {
                self.op(Opcode::PopTop)?;
                brk
            }
            FBlockKind::WhileLoop { brk, .. } => brk,
            _ => return Err(ShroudError::internal("loop block expected")),
        };
        self.jump(Opcode::JumpForward, target)?;
        self.set_handler(restore)
    }

    fn compile_continue(&mut self, span: Span) -> ShroudResult<()> {
        let (index, kind) = self.innermost_loop(span, "continue")?;
        let restore = self.unwind_to(index + 1, false)?;
        let target = match kind {
            FBlockKind::ForLoop { cont, .. } | FBlockKind::WhileLoop { cont, .. } => cont,
            _ => return Err(ShroudError::internal("loop block expected")),
        };
        self.jump(Opcode::JumpBackward, target)?;
        self.set_handler(restore)
    }

    fn compile_if(&mut self, test: &'a Expr, body: &'a [Stmt], orelse: &'a [Stmt]) -> ShroudResult<()> {
        let otherwise = self.new_label()?;
        self.compile_expr(test)?;
        self.jump(Opcode::PopJumpForwardIfFalse, otherwise)?;
        self.compile_body(body)?;
        if orelse.is_empty() {
            return self.bind(otherwise);
        }
        let end = self.new_label()?;
        if !self.ends_with_terminator()? {
            self.jump(Opcode::JumpForward, end)?;
        }
        self.bind(otherwise)?;
        self.compile_body(orelse)?;
        self.bind(end)
    }

    fn compile_while(&mut self, test: &'a Expr, body: &'a [Stmt], orelse: &'a [Stmt]) -> ShroudResult<()> {
        let start = self.new_label()?;
        let anchor = self.new_label()?;
        let end = self.new_label()?;
        self.bind(start)?;
        self.compile_expr(test)?;
        self.jump(Opcode::PopJumpForwardIfFalse, anchor)?;
        let outer = self.handler()?;
        self.push_fblock(FBlockKind::WhileLoop { cont: start, brk: end }, outer)?;
        self.compile_body(body)?;
        self.pop_fblock()?;
        self.jump(Opcode::JumpBackward, start)?;
        self.bind(anchor)?;
        self.compile_body(orelse)?;
        self.bind(end)
    }

    fn compile_for(
        &mut self,
        target: &'a Expr,
        iter: &'a Expr,
        body: &'a [Stmt],
        orelse: &'a [Stmt],
    ) -> ShroudResult<()> {
        let start = self.new_label()?;
        let cleanup = self.new_label()?;
        let end = self.new_label()?;
        self.compile_expr(iter)?;
        self.op(Opcode::GetIter)?;
        self.bind(start)?;
        self.jump(Opcode::ForIter, cleanup)?;
        let outer = self.handler()?;
        self.push_fblock(FBlockKind::ForLoop { cont: start, brk: end }, outer)?;
        self.compile_store(target)?;
        self.compile_body(body)?;
        self.pop_fblock()?;
        self.jump(Opcode::JumpBackward, start)?;
        self.bind(cleanup)?;
        self.compile_body(orelse)?;
        self.bind(end)
    }

    fn compile_with(&mut self, items: &'a [WithItem], body: &'a [Stmt]) -> ShroudResult<()> {
        let Some((item, rest)) = items.split_first() else {
            return self.compile_body(body);
        };
        let depth = self.depth()?;
        let outer = self.handler()?;
        let on_error = self.new_label()?;
        let cleanup = self.new_label()?;
        let suppress = self.new_label()?;
        let exit = self.new_label()?;

        self.compile_expr(&item.context_expr)?;
        self.op(Opcode::BeforeWith)?;
        self.set_handler(Some(Handler {
            label: on_error,
            depth: depth + 1,
            lasti: true,
        }))?;
        self.push_fblock(FBlockKind::With, outer)?;
        match &item.optional_vars {
            Some(target) => self.compile_store(target)?,
            None => self.op(Opcode::PopTop)?,
        }
        self.compile_with(rest, body)?;
        self.pop_fblock()?;
        self.set_handler(outer)?;
        self.call_exit_with_nones()?;
        self.op(Opcode::PopTop)?;
        self.jump(Opcode::JumpForward, exit)?;

        let cleanup_handler = Some(Handler {
            label: cleanup,
            depth: depth + 3,
            lasti: true,
        });
        self.bind(on_error)?;
        self.set_handler(cleanup_handler)?;
        self.op(Opcode::PushExcInfo)?;
        self.op(Opcode::WithExceptStart)?;
        self.jump(Opcode::PopJumpForwardIfTrue, suppress)?;
        self.emit(Opcode::Reraise, 2)?;

        self.bind(cleanup)?;
        self.set_handler(outer)?;
        self.pop_except_and_reraise()?;

        self.bind(suppress)?;
        self.set_handler(cleanup_handler)?;
        self.op(Opcode::PopTop)?;
        self.set_handler(outer)?;
        self.op(Opcode::PopExcept)?;
        self.op(Opcode::PopTop)?;
        self.op(Opcode::PopTop)?;
        self.bind(exit)
    }

    fn pop_except_and_reraise(&mut self) -> ShroudResult<()> {
        self.emit(Opcode::Copy, 3)?;
        self.op(Opcode::PopExcept)?;
        self.emit(Opcode::Reraise, 1)
    }

    fn compile_try_body(&mut self, inner: TryBody<'a>) -> ShroudResult<()> {
        match inner {
            TryBody::Plain(body) => self.compile_body(body),
            TryBody::Except {
                body,
                handlers,
                orelse,
            } => self.compile_try_except(body, handlers, orelse),
        }
    }

    fn compile_try_finally(&mut self, inner: TryBody<'a>, finalbody: &'a [Stmt]) -> ShroudResult<()> {
        let depth = self.depth()?;
        let outer = self.handler()?;
        let on_error = self.new_label()?;
        let cleanup = self.new_label()?;
        let end = self.new_label()?;

        self.push_fblock(FBlockKind::FinallyTry { body: finalbody }, outer)?;
        self.set_handler(Some(Handler {
            label: on_error,
            depth,
            lasti: false,
        }))?;
        self.compile_try_body(inner)?;
        self.pop_fblock()?;
        self.set_handler(outer)?;
        self.compile_body(finalbody)?;
        self.jump(Opcode::JumpForward, end)?;

        self.bind(on_error)?;
        self.set_handler(Some(Handler {
            label: cleanup,
            depth: depth + 1,
            lasti: true,
        }))?;
        self.op(Opcode::PushExcInfo)?;
        self.push_fblock(FBlockKind::FinallyEnd, outer)?;
        self.compile_body(finalbody)?;
        self.pop_fblock()?;
        self.emit(Opcode::Reraise, 0)?;

        self.bind(cleanup)?;
        self.set_handler(outer)?;
        self.pop_except_and_reraise()?;
        self.bind(end)
    }

    fn compile_try_except(
        &mut self,
        body: &'a [Stmt],
        handlers: &'a [ExceptHandler],
        orelse: &'a [Stmt],
    ) -> ShroudResult<()> {
        let depth = self.depth()?;
        let outer = self.handler()?;
        let dispatch = self.new_label()?;
        let cleanup = self.new_label()?;
        let end = self.new_label()?;
        let cleanup_handler = Some(Handler {
            label: cleanup,
            depth: depth + 1,
            lasti: true,
        });

        self.push_fblock(FBlockKind::TryExcept, outer)?;
        self.set_handler(Some(Handler {
            label: dispatch,
            depth,
            lasti: false,
        }))?;
        self.compile_body(body)?;
        self.pop_fblock()?;
        self.set_handler(outer)?;
        self.compile_body(orelse)?;
        self.jump(Opcode::JumpForward, end)?;

        self.bind(dispatch)?;
        self.set_handler(cleanup_handler)?;
        self.op(Opcode::PushExcInfo)?;
        for (i, handler) in handlers.iter().enumerate() {
            let next = self.new_label()?;
            match &handler.typ {
                Some(typ) => {
                    self.compile_expr(typ)?;
                    self.op(Opcode::CheckExcMatch)?;
                    self.jump(Opcode::PopJumpForwardIfFalse, next)?;
                }
                None if i + 1 < handlers.len() => {
                    return Err(ShroudError::compile(
                        "default 'except:' must be last",
                        Some(handler.span),
                    ));
                }
                None => {}
            }
            match &handler.name {
                Some(name) => {
                    let cleanup_body = self.new_label()?;
                    self.name_op(name, ExprContext::Store)?;
                    self.set_handler(Some(Handler {
                        label: cleanup_body,
                        depth: depth + 1,
                        lasti: true,
                    }))?;
                    self.push_fblock(FBlockKind::HandlerCleanup { name: Some(name.as_str()) }, outer)?;
                    self.compile_body(&handler.body)?;
                    self.pop_fblock()?;
                    self.set_handler(outer)?;
                    self.op(Opcode::PopExcept)?;
                    self.clear_name(name)?;
                    self.jump(Opcode::JumpForward, end)?;

                    self.bind(cleanup_body)?;
                    self.set_handler(cleanup_handler)?;
                    self.clear_name(name)?;
                    self.emit(Opcode::Reraise, 1)?;
                }
                None => {
                    self.op(Opcode::PopTop)?;
                    self.push_fblock(FBlockKind::HandlerCleanup { name: None }, outer)?;
                    self.compile_body(&handler.body)?;
                    self.pop_fblock()?;
                    self.set_handler(outer)?;
                    self.op(Opcode::PopExcept)?;
                    self.jump(Opcode::JumpForward, end)?;
                }
            }
            self.bind(next)?;
            self.set_handler(cleanup_handler)?;
        }
        self.emit(Opcode::Reraise, 0)?;

        self.bind(cleanup)?;
        self.set_handler(outer)?;
        self.pop_except_and_reraise()?;
        self.bind(end)
    }

    fn compile_aug_assign(&mut self, target: &'a Expr, op: BinOp, value: &'a Expr) -> ShroudResult<()> {
        let arg = binary_op_arg(op) as u32 + BinaryOpArg::INPLACE;
        match &target.kind {
            ExprKind::Name { id, .. } => {
                self.name_op(id, ExprContext::Load)?;
                self.compile_expr(value)?;
                self.emit(Opcode::BinaryOp, arg)?;
                self.name_op(id, ExprContext::Store)
            }
            ExprKind::Attribute { value: object, attr } => {
                let index = self.name_index(attr)?;
                self.compile_expr(object)?;
                self.emit(Opcode::Copy, 1)?;
                self.emit(Opcode::LoadAttr, index)?;
                self.compile_expr(value)?;
                self.emit(Opcode::BinaryOp, arg)?;
                self.emit(Opcode::Swap, 2)?;
                self.emit(Opcode::StoreAttr, index)
            }
            ExprKind::Subscript { value: object, slice } => {
                self.compile_expr(object)?;
                self.compile_expr(slice)?;
                self.emit(Opcode::Copy, 2)?;
                self.emit(Opcode::Copy, 2)?;
                self.op(Opcode::BinarySubscr)?;
                self.compile_expr(value)?;
                self.emit(Opcode::BinaryOp, arg)?;
                self.emit(Opcode::Swap, 3)?;
                self.emit(Opcode::Swap, 2)?;
                self.op(Opcode::StoreSubscr)
            }
            _ => Err(ShroudError::compile(
                "illegal expression for augmented assignment",
                Some(target.span),
            )),
        }
    }

    fn compile_store(&mut self, target: &'a Expr) -> ShroudResult<()> {
        match &target.kind {
            ExprKind::Name { id, .. } => self.name_op(id, ExprContext::Store),
            ExprKind::Attribute { value, attr } => {
                self.compile_expr(value)?;
                let index = self.name_index(attr)?;
                self.emit(Opcode::StoreAttr, index)
            }
            ExprKind::Subscript { value, slice } => {
                self.compile_expr(value)?;
                self.compile_expr(slice)?;
                self.op(Opcode::StoreSubscr)
            }
            ExprKind::Tuple(elts) | ExprKind::List(elts) => {
                let starred: Vec<usize> = elts
                    .iter()
                    .enumerate()
                    .filter(|(_, e)| matches!(e.kind, ExprKind::Starred(_)))
                    .map(|(i, _)| i)
                    .collect();
                match starred.as_slice() {
                    [] => self.emit(Opcode::UnpackSequence, elts.len() as u32)?,
                    [at] => {
                        let before = *at as u32;
                        let after = (elts.len() - at - 1) as u32;
                        if before > 0xFF {
                            return Err(ShroudError::compile(
                                "too many expressions in star-unpacking assignment",
                                Some(target.span),
                            ));
                        }
                        self.emit(Opcode::UnpackEx, before | (after << 8))?;
                    }
                    _ => {
                        return Err(ShroudError::compile(
                            "multiple starred expressions in assignment",
                            Some(target.span),
                        ));
                    }
                }
                for elt in elts {
                    match &elt.kind {
                        ExprKind::Starred(inner) => self.compile_store(inner)?,
                        _ => self.compile_store(elt)?,
                    }
                }
                Ok(())
            }
            _ => Err(ShroudError::compile("cannot assign to expression", Some(target.span))),
        }
    }

    fn compile_delete(&mut self, target: &'a Expr) -> ShroudResult<()> {
        match &target.kind {
            ExprKind::Name { id, .. } => self.name_op(id, ExprContext::Del),
            ExprKind::Attribute { value, attr } => {
                self.compile_expr(value)?;
                let index = self.name_index(attr)?;
                self.emit(Opcode::DeleteAttr, index)
            }
            ExprKind::Subscript { value, slice } => {
                self.compile_expr(value)?;
                self.compile_expr(slice)?;
                self.op(Opcode::DeleteSubscr)
            }
            ExprKind::Tuple(elts) | ExprKind::List(elts) => {
                for elt in elts {
                    self.compile_delete(elt)?;
                }
                Ok(())
            }
            _ => Err(ShroudError::compile("cannot delete expression", Some(target.span))),
        }
    }

    // =========================================================================
    // Functions and classes
    // =========================================================================

    /// Push defaults, keyword defaults and annotations; returns the
    /// `MAKE_FUNCTION` flags they require.
    fn function_prelude(&mut self, args: &'a Arguments, returns: Option<&'a Expr>) -> ShroudResult<u32> {
        let mut flags = 0;
        if !args.defaults.is_empty() {
            for default in &args.defaults {
                self.compile_expr(default)?;
            }
            self.emit(Opcode::BuildTuple, args.defaults.len() as u32)?;
            flags |= make_function::DEFAULTS;
        }

        let mut kwdefaults = 0;
        for (arg, default) in args.kwonlyargs.iter().zip(&args.kw_defaults) {
            if let Some(default) = default {
                self.load_const(Constant::Str(arg.arg.clone()))?;
                self.compile_expr(default)?;
                kwdefaults += 1;
            }
        }
        if kwdefaults > 0 {
            self.emit(Opcode::BuildMap, kwdefaults)?;
            flags |= make_function::KWDEFAULTS;
        }

        let mut annotations = 0;
        for arg in args.all_args() {
            if let Some(annotation) = &arg.annotation {
                self.load_const(Constant::Str(arg.arg.clone()))?;
                self.compile_expr(annotation)?;
                annotations += 2;
            }
        }
        if let Some(returns) = returns {
            self.load_const(Constant::Str("return".to_string()))?;
            self.compile_expr(returns)?;
            annotations += 2;
        }
        if annotations > 0 {
            self.emit(Opcode::BuildTuple, annotations)?;
            flags |= make_function::ANNOTATIONS;
        }
        Ok(flags)
    }

    /// Push a function object for `code`, capturing its free variables.
    fn make_closure(&mut self, code: CodeUnit, mut flags: u32) -> ShroudResult<()> {
        if !code.freevars.is_empty() {
            for name in &code.freevars {
                let slot = self.slot(name)?;
                self.emit(Opcode::LoadClosure, slot)?;
            }
            self.emit(Opcode::BuildTuple, code.freevars.len() as u32)?;
            flags |= make_function::CLOSURE;
        }
        self.load_const(Constant::Code(Box::new(code)))?;
        self.emit(Opcode::MakeFunction, flags)
    }

    fn apply_decorators(&mut self, count: usize) -> ShroudResult<()> {
        for _ in 0..count {
            self.call(0)?;
        }
        Ok(())
    }

    fn compile_function_def(
        &mut self,
        stmt: &'a Stmt,
        name: &'a str,
        args: &'a Arguments,
        body: &'a [Stmt],
        decorators: &'a [Expr],
        returns: Option<&'a Expr>,
    ) -> ShroudResult<()> {
        for decorator in decorators {
            self.compile_expr(decorator)?;
        }
        let flags = self.function_prelude(args, returns)?;
        let scope = self.table.scope_of(stmt)?;
        self.enter_unit(scope, stmt.span, Some(args))?;

        let doc = docstring(body);
        let first = doc.map_or(Constant::None, |d| Constant::Str(d.to_string()));
        self.unit_mut()?.encoder.add_const(first)?;
        let body = if doc.is_some() { &body[1..] } else { body };
        self.compile_body(body)?;
        self.return_none()?;

        let code = self.leave_unit()?;
        self.make_closure(code, flags)?;
        self.apply_decorators(decorators.len())?;
        self.name_op(name, ExprContext::Store)
    }

    fn compile_class_def(
        &mut self,
        stmt: &'a Stmt,
        name: &'a str,
        bases: &'a [Expr],
        keywords: &'a [Keyword],
        body: &'a [Stmt],
        decorators: &'a [Expr],
    ) -> ShroudResult<()> {
        for decorator in decorators {
            self.compile_expr(decorator)?;
        }
        self.op(Opcode::PushNull)?;
        self.op(Opcode::LoadBuildClass)?;

        let scope = self.table.scope_of(stmt)?;
        let qualname = self.table.scope(scope).qualname.clone();
        self.enter_unit(scope, stmt.span, None)?;
        self.name_op("__name__", ExprContext::Load)?;
        self.name_op("__module__", ExprContext::Store)?;
        self.load_const(Constant::Str(qualname))?;
        self.name_op("__qualname__", ExprContext::Store)?;
        let mut body = body;
        if let Some(doc) = docstring(body) {
            self.load_const(Constant::Str(doc.to_string()))?;
            self.name_op("__doc__", ExprContext::Store)?;
            body = &body[1..];
        }
        self.compile_body(body)?;
        if self.table.scope(scope).cellvars.iter().any(|c| c == CLASS_CELL) {
            // type.__new__ reads the cell back from the namespace to fill it.
            let slot = self.slot(CLASS_CELL)?;
            self.emit(Opcode::LoadClosure, slot)?;
            self.emit(Opcode::Copy, 1)?;
            self.name_op("__classcell__", ExprContext::Store)?;
            self.op(Opcode::ReturnValue)?;
        } else {
            self.return_none()?;
        }
        let code = self.leave_unit()?;

        self.make_closure(code, 0)?;
        self.load_const(Constant::Str(name.to_string()))?;
        self.compile_call_args(2, bases, keywords)?;
        self.apply_decorators(decorators.len())?;
        self.name_op(name, ExprContext::Store)
    }

    fn compile_lambda(&mut self, expr: &'a Expr, args: &'a Arguments, body: &'a Expr) -> ShroudResult<()> {
        let flags = self.function_prelude(args, None)?;
        let scope = self.table.scope_of(expr)?;
        let is_generator = self.table.scope(scope).is_generator;
        self.enter_unit(scope, expr.span, Some(args))?;
        self.unit_mut()?.encoder.add_const(Constant::None)?;
        self.compile_expr(body)?;
        if is_generator {
            self.op(Opcode::PopTop)?;
            self.return_none()?;
        } else {
            self.op(Opcode::ReturnValue)?;
        }
        let code = self.leave_unit()?;
        self.make_closure(code, flags)
    }

    fn compile_comprehension(
        &mut self,
        expr: &'a Expr,
        kind: CompKind,
        generators: &'a [Comprehension],
        elt: &'a Expr,
        value: Option<&'a Expr>,
    ) -> ShroudResult<()> {
        let Some(first) = generators.first() else {
            return Err(ShroudError::compile("comprehension without a for clause", Some(expr.span)));
        };
        let scope = self.table.scope_of(expr)?;
        self.enter_unit(scope, expr.span, None)?;
        match kind {
            CompKind::List => self.emit(Opcode::BuildList, 0)?,
            CompKind::Set => self.emit(Opcode::BuildSet, 0)?,
            CompKind::Dict => self.emit(Opcode::BuildMap, 0)?,
            CompKind::Generator => {}
        }

        let mut loops: SmallVec<[(Label, Label); 4]> = SmallVec::new();
        for (i, generator) in generators.iter().enumerate() {
            if i == 0 {
                self.emit(Opcode::LoadFast, 0)?;
            } else {
                self.compile_expr(&generator.iter)?;
                self.op(Opcode::GetIter)?;
            }
            let start = self.new_label()?;
            let anchor = self.new_label()?;
            self.bind(start)?;
            self.jump(Opcode::ForIter, anchor)?;
            self.compile_store(&generator.target)?;
            for cond in &generator.ifs {
                self.compile_expr(cond)?;
                self.jump(Opcode::PopJumpBackwardIfFalse, start)?;
            }
            loops.push((start, anchor));
        }

        let depth = generators.len() as u32 + 1;
        match (kind, value) {
            (CompKind::List, _) => {
                self.compile_expr(elt)?;
                self.emit(Opcode::ListAppend, depth)?;
            }
            (CompKind::Set, _) => {
                self.compile_expr(elt)?;
                self.emit(Opcode::SetAdd, depth)?;
            }
            (CompKind::Dict, Some(value)) => {
                self.compile_expr(elt)?;
                self.compile_expr(value)?;
                self.emit(Opcode::MapAdd, depth)?;
            }
            (CompKind::Dict, None) => return Err(ShroudError::internal("dict comprehension without value")),
            (CompKind::Generator, _) => {
                self.compile_expr(elt)?;
                self.op(Opcode::YieldValue)?;
                self.emit(Opcode::Resume, 1)?;
                self.op(Opcode::PopTop)?;
            }
        }
        for (start, anchor) in loops.into_iter().rev() {
            self.jump(Opcode::JumpBackward, start)?;
            self.bind(anchor)?;
        }
        if kind == CompKind::Generator {
            self.return_none()?;
        } else {
            self.op(Opcode::ReturnValue)?;
        }
        let code = self.leave_unit()?;

        self.make_closure(code, 0)?;
        self.compile_expr(&first.iter)?;
        self.op(Opcode::GetIter)?;
        self.call(0)
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    fn compile_expr(&mut self, expr: &'a Expr) -> ShroudResult<()> {
        match &expr.kind {
            ExprKind::Int(v) => self.load_const(Constant::Int(*v)),
            ExprKind::BigInt(digits) => self.load_const(Constant::BigInt(digits.clone())),
            ExprKind::Float(v) => self.load_const(Constant::Float(*v)),
            ExprKind::Complex { real, imag } => self.load_const(Constant::Complex {
                real: *real,
                imag: *imag,
            }),
            ExprKind::String(s) => self.load_const(Constant::Str(s.clone())),
            ExprKind::Bytes(b) => self.load_const(Constant::Bytes(b.clone())),
            ExprKind::Bool(b) => self.load_const(Constant::Bool(*b)),
            ExprKind::None => self.load_const(Constant::None),
            ExprKind::Ellipsis => self.load_const(Constant::Ellipsis),
            ExprKind::Name { id, .. } => self.name_op(id, ExprContext::Load),
            ExprKind::Attribute { value, attr } => {
                self.compile_expr(value)?;
                let index = self.name_index(attr)?;
                self.emit(Opcode::LoadAttr, index)
            }
            ExprKind::Subscript { value, slice } => {
                self.compile_expr(value)?;
                self.compile_expr(slice)?;
                self.op(Opcode::BinarySubscr)
            }
            ExprKind::Slice { lower, upper, step } => {
                for part in [lower, upper] {
                    match part {
                        Some(part) => self.compile_expr(part)?,
                        None => self.load_const(Constant::None)?,
                    }
                }
                match step {
                    Some(step) => {
                        self.compile_expr(step)?;
                        self.emit(Opcode::BuildSlice, 3)
                    }
                    None => self.emit(Opcode::BuildSlice, 2),
                }
            }
            ExprKind::BinOp { left, op, right } => {
                self.compile_expr(left)?;
                self.compile_expr(right)?;
                self.emit(Opcode::BinaryOp, binary_op_arg(*op) as u32)
            }
            ExprKind::UnaryOp { op, operand } => {
                self.compile_expr(operand)?;
                self.op(match op {
                    UnaryOp::Invert => Opcode::UnaryInvert,
                    UnaryOp::Not => Opcode::UnaryNot,
                    UnaryOp::UAdd => Opcode::UnaryPositive,
                    UnaryOp::USub => Opcode::UnaryNegative,
                })
            }
            ExprKind::BoolOp { op, values } => {
                let end = self.new_label()?;
                let jump = match op {
                    BoolOp::And => Opcode::JumpIfFalseOrPop,
                    BoolOp::Or => Opcode::JumpIfTrueOrPop,
                };
                let Some((last, rest)) = values.split_last() else {
                    return Err(ShroudError::compile("empty boolean operation", Some(expr.span)));
                };
                for value in rest {
                    self.compile_expr(value)?;
                    self.jump(jump, end)?;
                }
                self.compile_expr(last)?;
                self.bind(end)
            }
            ExprKind::Compare {
                left,
                ops,
                comparators,
            } => self.compile_compare(expr.span, left, ops, comparators),
            ExprKind::IfExp { test, body, orelse } => {
                let otherwise = self.new_label()?;
                let end = self.new_label()?;
                self.compile_expr(test)?;
                self.jump(Opcode::PopJumpForwardIfFalse, otherwise)?;
                self.compile_expr(body)?;
                self.jump(Opcode::JumpForward, end)?;
                self.bind(otherwise)?;
                self.compile_expr(orelse)?;
                self.bind(end)
            }
            ExprKind::Call { func, args, keywords } => self.compile_call(func, args, keywords),
            ExprKind::Tuple(elts) => self.compile_sequence(0, elts, Collection::Tuple),
            ExprKind::List(elts) => self.compile_sequence(0, elts, Collection::List),
            ExprKind::Set(elts) => self.compile_sequence(0, elts, Collection::Set),
            ExprKind::Dict { keys, values } => self.compile_dict(keys, values),
            ExprKind::ListComp { elt, generators } => {
                self.compile_comprehension(expr, CompKind::List, generators, elt, None)
            }
            ExprKind::SetComp { elt, generators } => {
                self.compile_comprehension(expr, CompKind::Set, generators, elt, None)
            }
            ExprKind::DictComp {
                key,
                value,
                generators,
            } => self.compile_comprehension(expr, CompKind::Dict, generators, key, Some(value)),
            ExprKind::GeneratorExp { elt, generators } => {
                self.compile_comprehension(expr, CompKind::Generator, generators, elt, None)
            }
            ExprKind::Lambda { args, body } => self.compile_lambda(expr, args, body),
            ExprKind::NamedExpr { target, value } => {
                self.compile_expr(value)?;
                self.emit(Opcode::Copy, 1)?;
                self.compile_store(target)
            }
            ExprKind::Yield(value) => {
                if !self.scope_kind()?.is_function_like() {
                    return Err(ShroudError::compile("'yield' outside function", Some(expr.span)));
                }
                match value {
                    Some(value) => self.compile_expr(value)?,
                    None => self.load_const(Constant::None)?,
                }
                self.op(Opcode::YieldValue)?;
                self.emit(Opcode::Resume, 1)
            }
            ExprKind::YieldFrom(value) => {
                if !self.scope_kind()?.is_function_like() {
                    return Err(ShroudError::compile("'yield from' outside function", Some(expr.span)));
                }
                self.compile_expr(value)?;
                self.op(Opcode::GetYieldFromIter)?;
                self.load_const(Constant::None)?;
                let send = self.new_label()?;
                let exit = self.new_label()?;
                self.bind(send)?;
                self.jump(Opcode::Send, exit)?;
                self.op(Opcode::YieldValue)?;
                self.emit(Opcode::Resume, 2)?;
                self.jump(Opcode::JumpBackwardNoInterrupt, send)?;
                self.bind(exit)
            }
            ExprKind::Await(_) => Err(ShroudError::compile("'await' is not supported", Some(expr.span))),
            ExprKind::JoinedStr(parts) => {
                if let [single] = parts.as_slice()
                    && let ExprKind::String(s) = &single.kind
                {
                    return self.load_const(Constant::Str(s.clone()));
                }
                if parts.is_empty() {
                    return self.load_const(Constant::Str(String::new()));
                }
                for part in parts {
                    self.compile_expr(part)?;
                }
                if parts.len() > 1 {
                    self.emit(Opcode::BuildString, parts.len() as u32)?;
                }
                Ok(())
            }
            ExprKind::FormattedValue {
                value,
                conversion,
                format_spec,
            } => {
                self.compile_expr(value)?;
                let mut flags = match conversion {
                    Some('s') => 1,
                    Some('r') => 2,
                    Some('a') => 3,
                    _ => 0,
                };
                if let Some(spec) = format_spec {
                    self.compile_expr(spec)?;
                    flags |= 0x04;
                }
                self.emit(Opcode::FormatValue, flags)
            }
            ExprKind::Starred(_) => Err(ShroudError::compile(
                "can't use starred expression here",
                Some(expr.span),
            )),
        }
    }

    fn compile_compare(
        &mut self,
        span: Span,
        left: &'a Expr,
        ops: &[CmpOp],
        comparators: &'a [Expr],
    ) -> ShroudResult<()> {
        if ops.is_empty() || ops.len() != comparators.len() {
            return Err(ShroudError::compile("malformed comparison", Some(span)));
        }
        self.compile_expr(left)?;
        if ops.len() == 1 {
            self.compile_expr(&comparators[0])?;
            return self.compare_op(ops[0]);
        }
        let cleanup = self.new_label()?;
        let end = self.new_label()?;
        let last = ops.len() - 1;
        for (op, comparator) in ops[..last].iter().zip(comparators) {
            self.compile_expr(comparator)?;
            self.emit(Opcode::Swap, 2)?;
            self.emit(Opcode::Copy, 2)?;
            self.compare_op(*op)?;
            self.jump(Opcode::JumpIfFalseOrPop, cleanup)?;
        }
        self.compile_expr(&comparators[last])?;
        self.compare_op(ops[last])?;
        self.jump(Opcode::JumpForward, end)?;
        self.bind(cleanup)?;
        self.emit(Opcode::Swap, 2)?;
        self.op(Opcode::PopTop)?;
        self.bind(end)
    }

    fn compare_op(&mut self, op: CmpOp) -> ShroudResult<()> {
        match op {
            CmpOp::Eq => self.emit(Opcode::CompareOp, CompareOpArg::Eq as u32),
            CmpOp::NotEq => self.emit(Opcode::CompareOp, CompareOpArg::Ne as u32),
            CmpOp::Lt => self.emit(Opcode::CompareOp, CompareOpArg::Lt as u32),
            CmpOp::LtE => self.emit(Opcode::CompareOp, CompareOpArg::Le as u32),
            CmpOp::Gt => self.emit(Opcode::CompareOp, CompareOpArg::Gt as u32),
            CmpOp::GtE => self.emit(Opcode::CompareOp, CompareOpArg::Ge as u32),
            CmpOp::Is => self.emit(Opcode::IsOp, 0),
            CmpOp::IsNot => self.emit(Opcode::IsOp, 1),
            CmpOp::In => self.emit(Opcode::ContainsOp, 0),
            CmpOp::NotIn => self.emit(Opcode::ContainsOp, 1),
        }
    }

    fn compile_call(&mut self, func: &'a Expr, args: &'a [Expr], keywords: &'a [Keyword]) -> ShroudResult<()> {
        if let ExprKind::Attribute { value, attr } = &func.kind
            && !needs_unpacking(args, keywords)
        {
            self.compile_expr(value)?;
            let index = self.name_index(attr)?;
            self.emit(Opcode::LoadMethod, index)?;
            return self.compile_call_args(0, args, keywords);
        }
        // A global callee carries the NULL in the low bit of its oparg.
        if let ExprKind::Name { id, .. } = &func.kind
            && self.access(id)? == Access::Global
        {
            let index = self.name_index(id)?;
            self.emit(Opcode::LoadGlobal, (index << 1) | 1)?;
            return self.compile_call_args(0, args, keywords);
        }
        self.op(Opcode::PushNull)?;
        self.compile_expr(func)?;
        self.compile_call_args(0, args, keywords)
    }

    /// Emit the arguments and the call itself. `pushed` positional
    /// arguments are already on the stack.
    fn compile_call_args(&mut self, pushed: u32, args: &'a [Expr], keywords: &'a [Keyword]) -> ShroudResult<()> {
        if needs_unpacking(args, keywords) {
            self.compile_sequence(pushed, args, Collection::Tuple)?;
            if keywords.is_empty() {
                return self.emit(Opcode::CallFunctionEx, 0);
            }
            self.compile_keyword_dict(keywords)?;
            return self.emit(Opcode::CallFunctionEx, 1);
        }
        for arg in args {
            self.compile_expr(arg)?;
        }
        let mut names = Vec::with_capacity(keywords.len());
        for keyword in keywords {
            self.compile_expr(&keyword.value)?;
            if let Some(name) = &keyword.arg {
                names.push(Constant::Str(name.clone()));
            }
        }
        let argc = pushed + (args.len() + keywords.len()) as u32;
        if !names.is_empty() {
            let index = self.unit_mut()?.encoder.add_const(Constant::Tuple(names))?;
            self.emit(Opcode::KwNames, index)?;
        }
        self.call(argc)
    }

    fn compile_keyword_dict(&mut self, keywords: &'a [Keyword]) -> ShroudResult<()> {
        let mut have_dict = false;
        let mut pending = 0;
        for keyword in keywords {
            match &keyword.arg {
                Some(name) => {
                    self.load_const(Constant::Str(name.clone()))?;
                    self.compile_expr(&keyword.value)?;
                    pending += 1;
                }
                None => {
                    if pending > 0 {
                        self.emit(Opcode::BuildMap, pending)?;
                        if have_dict {
                            self.emit(Opcode::DictMerge, 1)?;
                        }
                        have_dict = true;
                        pending = 0;
                    }
                    if !have_dict {
                        self.emit(Opcode::BuildMap, 0)?;
                        have_dict = true;
                    }
                    self.compile_expr(&keyword.value)?;
                    self.emit(Opcode::DictMerge, 1)?;
                }
            }
        }
        if pending > 0 {
            self.emit(Opcode::BuildMap, pending)?;
            if have_dict {
                self.emit(Opcode::DictMerge, 1)?;
            }
        }
        Ok(())
    }

    fn compile_dict(&mut self, keys: &'a [Option<Expr>], values: &'a [Expr]) -> ShroudResult<()> {
        let mut have_dict = false;
        let mut pending = 0;
        for (key, value) in keys.iter().zip(values) {
            match key {
                Some(key) => {
                    self.compile_expr(key)?;
                    self.compile_expr(value)?;
                    pending += 1;
                }
                None => {
                    if pending > 0 || !have_dict {
                        self.emit(Opcode::BuildMap, pending)?;
                        if have_dict {
                            self.emit(Opcode::DictUpdate, 1)?;
                        }
                        have_dict = true;
                        pending = 0;
                    }
                    self.compile_expr(value)?;
                    self.emit(Opcode::DictUpdate, 1)?;
                }
            }
        }
        if pending > 0 || !have_dict {
            self.emit(Opcode::BuildMap, pending)?;
            if have_dict {
                self.emit(Opcode::DictUpdate, 1)?;
            }
        }
        Ok(())
    }

    /// Build a tuple, list or set from `elts`, splicing starred items.
    /// `pushed` leading items are already on the stack.
    fn compile_sequence(&mut self, pushed: u32, elts: &'a [Expr], kind: Collection) -> ShroudResult<()> {
        let (build, extend, append) = match kind {
            Collection::Tuple | Collection::List => (Opcode::BuildList, Opcode::ListExtend, Opcode::ListAppend),
            Collection::Set => (Opcode::BuildSet, Opcode::SetUpdate, Opcode::SetAdd),
        };
        let mut pending = pushed;
        let mut spliced = false;
        for elt in elts {
            match &elt.kind {
                ExprKind::Starred(inner) => {
                    if !spliced {
                        self.emit(build, pending)?;
                        spliced = true;
                    }
                    self.compile_expr(inner)?;
                    self.emit(extend, 1)?;
                }
                _ => {
                    self.compile_expr(elt)?;
                    if spliced {
                        self.emit(append, 1)?;
                    } else {
                        pending += 1;
                    }
                }
            }
        }
        if !spliced {
            let op = match kind {
                Collection::Tuple => Opcode::BuildTuple,
                Collection::List => Opcode::BuildList,
                Collection::Set => Opcode::BuildSet,
            };
            return self.emit(op, pending);
        }
        if kind == Collection::Tuple {
            self.op(Opcode::ListToTuple)?;
        }
        Ok(())
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn docstring(body: &[Stmt]) -> Option<&str> {
    match &body.first()?.kind {
        StmtKind::Expr(value) => match &value.kind {
            ExprKind::String(s) => Some(s),
            _ => None,
        },
        _ => None,
    }
}

fn needs_unpacking(args: &[Expr], keywords: &[Keyword]) -> bool {
    args.iter().any(|a| matches!(a.kind, ExprKind::Starred(_))) || keywords.iter().any(|k| k.arg.is_none())
}

const fn binary_op_arg(op: BinOp) -> BinaryOpArg {
    match op {
        BinOp::Add => BinaryOpArg::Add,
        BinOp::Sub => BinaryOpArg::Subtract,
        BinOp::Mult => BinaryOpArg::Multiply,
        BinOp::MatMult => BinaryOpArg::MatrixMultiply,
        BinOp::Div => BinaryOpArg::TrueDivide,
        BinOp::Mod => BinaryOpArg::Remainder,
        BinOp::Pow => BinaryOpArg::Power,
        BinOp::LShift => BinaryOpArg::Lshift,
        BinOp::RShift => BinaryOpArg::Rshift,
        BinOp::BitOr => BinaryOpArg::Or,
        BinOp::BitXor => BinaryOpArg::Xor,
        BinOp::BitAnd => BinaryOpArg::And,
        BinOp::FloorDiv => BinaryOpArg::FloorDivide,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shroud_parser::parse;

    fn compile(source: &str) -> CodeUnit {
        let module = parse(source).unwrap();
        Compiler::compile_module(&module, "test.py").unwrap()
    }

    fn ops(code: &CodeUnit) -> Vec<Opcode> {
        let mut out = Vec::new();
        let mut i = 0;
        while i + 1 < code.code.len() {
            let op = Opcode::from_u8(code.code[i]).unwrap();
            out.push(op);
            i += 2 + 2 * op.cache_entries();
        }
        out
    }

    #[test]
    fn test_compile_assignment() {
        let code = compile("x = 1\n");
        assert_eq!(
            ops(&code),
            [
                Opcode::Resume,
                Opcode::LoadConst,
                Opcode::StoreName,
                Opcode::LoadConst,
                Opcode::ReturnValue
            ]
        );
        assert_eq!(code.consts, [Constant::Int(1), Constant::None]);
        assert_eq!(code.names, ["x"]);
        assert_eq!(code.stacksize, 1);
        assert_eq!(code.flags, CodeFlags::NONE);
    }

    #[test]
    fn test_compile_call_with_keywords() {
        let code = compile("f(1, k=2)\n");
        let ops = ops(&code);
        assert!(ops.contains(&Opcode::KwNames));
        assert_eq!(
            code.consts[2],
            Constant::Tuple(vec![Constant::Str("k".into())])
        );
        assert_eq!(code.stacksize, 4);
    }

    #[test]
    fn test_compile_method_call_uses_load_method() {
        let code = compile("obj.m(1)\n");
        assert!(ops(&code).contains(&Opcode::LoadMethod));
        assert!(!ops(&code).contains(&Opcode::PushNull));
    }

    #[test]
    fn test_global_callee_sets_null_bit() {
        let code = compile("def f():\n    print(1)\n");
        let f = code.nested()[0];
        assert!(!ops(f).contains(&Opcode::PushNull));
        assert_eq!(f.code[2..4], [Opcode::LoadGlobal.as_u8(), 1]);
    }

    #[test]
    fn test_compile_star_call() {
        let code = compile("f(*a, **k)\n");
        let ops = ops(&code);
        assert!(ops.contains(&Opcode::ListExtend));
        assert!(ops.contains(&Opcode::ListToTuple));
        assert!(ops.contains(&Opcode::DictMerge));
        assert!(ops.contains(&Opcode::CallFunctionEx));
    }

    #[test]
    fn test_function_locals_are_fast() {
        let code = compile("def f(a, *args, b=1, **kw):\n    c = a\n    return c\n");
        let f = code.consts.iter().find_map(Constant::as_code).unwrap();
        assert_eq!(code.consts[0], Constant::Str("b".into()));
        assert_eq!(f.argcount, 1);
        assert_eq!(f.kwonlyargcount, 1);
        assert_eq!(f.varnames, ["a", "b", "args", "kw", "c"]);
        assert!(f.flags.contains(CodeFlags::OPTIMIZED | CodeFlags::NEWLOCALS));
        assert!(f.flags.contains(CodeFlags::VARARGS | CodeFlags::VARKEYWORDS));
        assert_eq!(f.consts[0], Constant::None);
        let ops = ops(f);
        assert!(ops.contains(&Opcode::LoadFast));
        assert!(ops.contains(&Opcode::StoreFast));
    }

    #[test]
    fn test_closure_prologue() {
        let code = compile("def f():\n    x = 1\n    def g():\n        return x\n    return g\n");
        let f = code.consts.iter().find_map(Constant::as_code).unwrap();
        assert_eq!(f.cellvars, ["x"]);
        assert_eq!(ops(f)[..2], [Opcode::MakeCell, Opcode::Resume]);
        let g = f.consts.iter().find_map(Constant::as_code).unwrap();
        assert_eq!(g.freevars, ["x"]);
        assert_eq!(ops(g)[..2], [Opcode::CopyFreeVars, Opcode::Resume]);
        assert!(g.flags.contains(CodeFlags::NESTED));
        assert!(ops(f).contains(&Opcode::LoadClosure));
    }

    #[test]
    fn test_generator_prologue() {
        let code = compile("def f():\n    yield 1\n");
        let f = code.consts.iter().find_map(Constant::as_code).unwrap();
        assert!(f.flags.contains(CodeFlags::GENERATOR));
        assert_eq!(ops(f)[..3], [Opcode::ReturnGenerator, Opcode::PopTop, Opcode::Resume]);
    }

    #[test]
    fn test_comprehension_unit() {
        let code = compile("ys = [x for x in xs if x]\n");
        let comp = code.consts.iter().find_map(Constant::as_code).unwrap();
        assert_eq!(comp.name, "<listcomp>");
        assert_eq!(comp.argcount, 1);
        assert_eq!(comp.varnames, [".0", "x"]);
        let ops = ops(comp);
        assert!(ops.contains(&Opcode::ForIter));
        assert!(ops.contains(&Opcode::ListAppend));
        assert!(ops.contains(&Opcode::PopJumpBackwardIfFalse));
    }

    #[test]
    fn test_try_except_has_exception_table() {
        let code = compile("try:\n    f()\nexcept ValueError as e:\n    g(e)\n");
        let entries = crate::bytecode::decode_table(&code.exceptiontable).unwrap();
        assert!(entries.len() >= 3);
        assert_eq!(entries[0].depth, 0);
        assert!(!entries[0].lasti);
        assert!(entries.iter().any(|e| e.depth == 1 && e.lasti));
        let ops = ops(&code);
        assert!(ops.contains(&Opcode::PushExcInfo));
        assert!(ops.contains(&Opcode::CheckExcMatch));
        assert!(ops.contains(&Opcode::PopExcept));
    }

    #[test]
    fn test_with_handler_depth() {
        let code = compile("with open(p) as fh:\n    fh.read()\n");
        let entries = crate::bytecode::decode_table(&code.exceptiontable).unwrap();
        assert_eq!(entries[0].depth, 1);
        assert!(entries[0].lasti);
        assert!(entries.iter().any(|e| e.depth == 3));
    }

    #[test]
    fn test_return_inside_for_pops_iterator() {
        let code = compile("def f(xs):\n    for x in xs:\n        return x\n");
        let f = code.consts.iter().find_map(Constant::as_code).unwrap();
        let ops = ops(f);
        let ret = ops.iter().position(|op| *op == Opcode::ReturnValue).unwrap();
        assert_eq!(ops[ret - 2..ret], [Opcode::Swap, Opcode::PopTop]);
    }

    #[test]
    fn test_break_outside_loop_error() {
        let module = parse("break\n").unwrap();
        assert!(Compiler::compile_module(&module, "t.py").is_err());
    }

    #[test]
    fn test_return_outside_function_error() {
        let module = parse("return 1\n").unwrap();
        assert!(Compiler::compile_module(&module, "t.py").is_err());
    }

    #[test]
    fn test_compile_class() {
        let code = compile("class C(B):\n    '''doc'''\n    def m(self):\n        return 1\n");
        let body = code.consts.iter().find_map(Constant::as_code).unwrap();
        assert_eq!(body.name, "C");
        assert_eq!(body.flags, CodeFlags::NONE);
        assert!(body.names.iter().any(|n| n == "__qualname__"));
        assert!(body.names.iter().any(|n| n == "__doc__"));
        let m = body.consts.iter().find_map(Constant::as_code).unwrap();
        assert_eq!(m.qualname, "C.m");
        assert!(ops(&code).contains(&Opcode::LoadBuildClass));
    }

    #[test]
    fn test_chained_compare() {
        let code = compile("r = a < b < c\n");
        let ops = ops(&code);
        assert!(ops.contains(&Opcode::JumpIfFalseOrPop));
        assert_eq!(ops.iter().filter(|op| **op == Opcode::CompareOp).count(), 2);
    }
}
