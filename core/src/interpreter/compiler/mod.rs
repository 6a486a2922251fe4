//! Script compiler
//!
//! One forward pass turns script text into a [`CompiledProgram`]: a flat
//! instruction list plus the conditional, loop and subroutine arenas that
//! give every control-flow instruction its jump targets.
//!
//! Each line is classified by its leading token:
//! - an opcode keyword (case-insensitive),
//! - `-name args` (option escape, checked against the [`OptionTable`]),
//! - `name op expr` with `op` in `= += -= *= /= %=` (becomes SET).

pub mod lexer;
mod signatures;


use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::{ErrorKind, ResultExt, ScriptError, ScriptResult};
use crate::host::OptionTable;
use crate::interpreter::expressions::{Formula, NumKind};
use crate::interpreter::types::{
    BlockRef, CmpOp, CompiledProgram, CondBlock, CondId, Condition, Data, DataType, Expr, Index,
    IndexPart, Instruction, LoopDef, LoopId, LoopKind, Opcode, StartupLine, SubDef, SubId, Value,
    VarRef,
};
use crate::interpreter::variables::ReservedVars;
use lexer::Token;

/* ===================== Public API ===================== */

#[derive(Debug, Clone)]
pub struct CompileOptions {
    pub name: String,
    /// Collect every error instead of stopping at the first
    pub check_only: bool,
    pub options: OptionTable,
}

impl CompileOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            check_only: false,
            options: OptionTable::default(),
        }
    }

    pub fn check_only(mut self) -> Self {
        self.check_only = true;
        self
    }

    pub fn with_options(mut self, options: OptionTable) -> Self {
        self.options = options;
        self
    }
}

#[derive(Debug)]
pub struct CompileReport {
    pub program: CompiledProgram,
    pub errors: Vec<ScriptError>,
}

impl CompileReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_result(self) -> ScriptResult<CompiledProgram> {
        match self.errors.into_iter().next() {
            Some(err) => Err(err),
            None => Ok(self.program),
        }
    }
}

/// Compile with default options, failing on the first error
pub fn compile(source: &str, name: &str) -> ScriptResult<CompiledProgram> {
    compile_with(source, &CompileOptions::new(name)).into_result()
}

pub fn compile_with(source: &str, options: &CompileOptions) -> CompileReport {
    let mut compiler = Compiler::new(&options.options);
    compiler.program.name = options.name.clone();
    compiler.program.source_hash = hash_source(source);

    let mut errors = Vec::new();
    for (n, raw) in source.lines().enumerate() {
        let line = n + 1;
        if let Err(err) = compiler.compile_line(line, raw) {
            let err = err.at_line(line);
            debug!(line, error = %err, "compile error");
            errors.push(err);
            if !options.check_only {
                break;
            }
        }
    }

    if errors.is_empty() || options.check_only {
        errors.extend(compiler.finish());
    }

    info!(
        script = %options.name,
        instructions = compiler.program.len(),
        errors = errors.len(),
        "compiled script"
    );

    CompileReport {
        program: compiler.program,
        errors,
    }
}

fn hash_source(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    format!("{:x}", hasher.finalize())
}

/* ===================== Compiler State ===================== */

struct Compiler<'a> {
    options: &'a OptionTable,
    program: CompiledProgram,
    /// Subroutine whose body is being compiled
    owner: Option<SubId>,
    cond_stack: Vec<CondId>,
    loop_stack: Vec<LoopId>,
    after_main: bool,
    /// Line of an open STARTUP
    startup: Option<usize>,
    /// GOSUB instruction index, target name, line
    pending_calls: Vec<(usize, String, usize)>,
}

impl<'a> Compiler<'a> {
    fn new(options: &'a OptionTable) -> Self {
        Self {
            options,
            program: CompiledProgram::default(),
            owner: None,
            cond_stack: Vec::new(),
            loop_stack: Vec::new(),
            after_main: false,
            startup: None,
            pending_calls: Vec::new(),
        }
    }

    fn emit(&mut self, ins: Instruction) -> usize {
        let idx = self.program.instructions.len();
        self.program.line_index.entry(ins.line).or_insert(idx);
        self.program.instructions.push(ins);
        idx
    }

    fn next_index(&self) -> usize {
        self.program.instructions.len()
    }

    fn compile_line(&mut self, line: usize, raw: &str) -> ScriptResult<()> {
        let text = lexer::strip_comment(raw).trim();
        if text.is_empty() {
            return Ok(());
        }

        if self.startup.is_some() {
            if text.eq_ignore_ascii_case("ENDSTARTUP") {
                self.startup = None;
            } else {
                self.program.startup.push(StartupLine {
                    line,
                    text: text.to_string(),
                });
            }
            return Ok(());
        }
        if text.eq_ignore_ascii_case("STARTUP") {
            self.startup = Some(line);
            return Ok(());
        }
        if text.eq_ignore_ascii_case("ENDSTARTUP") {
            return Err(ScriptError::nesting("ENDSTARTUP without STARTUP"));
        }

        let tokens = lexer::tokenize(text)?;

        if let [Token::Word(word), rest @ ..] = tokens.as_slice() {
            if let Some(op) = Opcode::from_keyword(word) {
                return self.compile_opcode(line, op, rest);
            }
        }

        match tokens.as_slice() {
            [Token::Arith('-'), Token::Word(name), args @ ..] => {
                self.compile_option(line, name, args)
            }
            [target @ (Token::Word(_) | Token::Var(_)), Token::Assign(op), rhs @ ..] => {
                self.compile_set(line, target, op, rhs)
            }
            [first, ..] => Err(ErrorKind::UnknownCommand(first.to_string()).into()),
            [] => Ok(()),
        }
    }

    /// Everything still open at end of input, plus unresolved GOSUBs
    fn finish(&mut self) -> Vec<ScriptError> {
        let mut errors = Vec::new();

        if let Some(line) = self.startup {
            errors.push(ScriptError::nesting("STARTUP without ENDSTARTUP").at_line(line));
        }
        for id in &self.cond_stack {
            let start = self.program.conditionals[*id].start;
            errors.push(ScriptError::nesting("IF without ENDIF").at_line(self.line_at(start)));
        }
        for id in &self.loop_stack {
            let start = self.program.loops[*id].start;
            errors.push(ScriptError::nesting("FOR without NEXT").at_line(self.line_at(start)));
        }
        if let Some(id) = self.owner {
            let sub = &self.program.subroutines[id];
            errors.push(
                ScriptError::nesting(format!("SUB {} without ENDSUB", sub.name))
                    .at_line(self.line_at(sub.start)),
            );
        }

        for (idx, name, line) in std::mem::take(&mut self.pending_calls) {
            match self.program.sub_by_name(&name) {
                Some(id) => self.program.instructions[idx].block = Some(BlockRef::Sub(id)),
                None => errors.push(
                    ScriptError::syntax(format!("unknown subroutine '{}'", name)).at_line(line),
                ),
            }
        }

        errors
    }

    fn line_at(&self, idx: usize) -> usize {
        self.program.line_of(idx).unwrap_or(0)
    }

    /* ===================== Opcodes ===================== */

    /// After ENDMAIN only SUB blocks may appear
    fn check_placement(&self, op: Opcode) -> ScriptResult<()> {
        if self.after_main && self.owner.is_none() && op != Opcode::Sub {
            return Err(ScriptError::nesting(format!(
                "{} after ENDMAIN; only SUB blocks may follow",
                op
            )));
        }
        Ok(())
    }

    fn compile_opcode(&mut self, line: usize, op: Opcode, args: &[Token]) -> ScriptResult<()> {
        self.check_placement(op)?;

        let result = match op {
            _ if op.declared_type().is_some() => self.compile_declaration(line, op, args),
            Opcode::Set => match args {
                [target, Token::Assign(assign), rhs @ ..] => {
                    self.compile_set(line, target, assign, rhs)
                }
                _ => Err(ScriptError::syntax("expected 'SET name op value'")),
            },
            Opcode::Filter => self.compile_filter(line, args),
            Opcode::Pop => self.compile_pop(line, args),
            _ if op.is_array_mutator() => self.compile_mutator(line, op, args),

            Opcode::If => self.compile_if(line, args),
            Opcode::ElseIf => self.compile_elseif(line, args),
            Opcode::Else => self.compile_else(line, args),
            Opcode::EndIf => self.compile_endif(line, args),

            Opcode::For => self.compile_for(line, args),
            Opcode::Next => self.compile_next(line, args),
            Opcode::Break | Opcode::Skip => {
                no_args(op, args)?;
                let id = self.innermost_loop(op)?;
                self.emit(Instruction::new(line, op, Vec::new()).with_block(BlockRef::Loop(id)));
                Ok(())
            }
            Opcode::BreakIf | Opcode::SkipIf => {
                let id = self.innermost_loop(op)?;
                let cond = self.condition_value(args)?;
                self.emit(Instruction::new(line, op, vec![cond]).with_block(BlockRef::Loop(id)));
                Ok(())
            }

            Opcode::Sub => self.compile_sub(line, args),
            Opcode::EndSub => self.compile_endsub(line, args),
            Opcode::Return => self.compile_return(line, args),
            Opcode::GoSub => {
                let name = match args {
                    [Token::Word(name)] => name.clone(),
                    _ => return Err(ScriptError::syntax("expected 'GOSUB name'")),
                };
                let idx = self.emit(Instruction::new(line, op, vec![Value::str(name.clone())]));
                self.pending_calls.push((idx, name, line));
                Ok(())
            }
            Opcode::EndMain => {
                no_args(op, args)?;
                if !self.cond_stack.is_empty() || !self.loop_stack.is_empty() {
                    return Err(ScriptError::nesting("ENDMAIN inside an open IF or FOR"));
                }
                if self.owner.is_some() {
                    return Err(ScriptError::nesting("ENDMAIN inside SUB"));
                }
                self.after_main = true;
                self.emit(Instruction::new(line, op, Vec::new()));
                Ok(())
            }

            _ => self.compile_call(line, op, args),
        };
        result.with_context(|| op.keyword().to_string())
    }

    fn compile_declaration(&mut self, line: usize, op: Opcode, args: &[Token]) -> ScriptResult<()> {
        let ty = op
            .declared_type()
            .ok_or_else(|| ScriptError::syntax(format!("{} does not declare", op)))?;

        let (target, init) = match args {
            [target] => (target, None),
            [target, Token::Assign(a), rhs @ ..] if a == "=" && !rhs.is_empty() => {
                (target, Some(rhs))
            }
            _ => {
                return Err(ScriptError::syntax(format!(
                    "expected '{} name [= value]'",
                    op
                )))
            }
        };
        let name = target_name(target)?;

        let value = match init {
            Some(rhs) => {
                let value = self.compile_value(rhs, Some(ty))?;
                check_assignable(value.static_type(), ty)?;
                Some(value)
            }
            None => None,
        };

        self.declare(&name, ty)?;
        let mut params = vec![Value::Reference(typed_ref(&name, ty))];
        params.extend(value);
        self.emit(Instruction::new(line, op, params));
        Ok(())
    }

    fn compile_set(
        &mut self,
        line: usize,
        target: &Token,
        op: &str,
        rhs: &[Token],
    ) -> ScriptResult<()> {
        self.check_placement(Opcode::Set)?;
        let name = target_name(target)?;
        if rhs.is_empty() {
            return Err(ScriptError::syntax(format!("missing value for '{}'", name)));
        }
        if ReservedVars::is_reserved(&name) {
            return Err(ErrorKind::ReadOnly(name).into());
        }

        let ty = match self.program.declared_type(self.owner, &name) {
            Some(ty) => ty,
            None if op == "=" => {
                let ty = self.infer_type(rhs)?;
                self.declare(&name, ty)?;
                ty
            }
            None => return Err(ScriptError::unknown_variable(name)),
        };

        let source = if op == "=" {
            rhs.to_vec()
        } else {
            compound_source(&name, ty, op, rhs)?
        };

        let value = self
            .compile_value(&source, Some(ty))
            .with_context(|| format!("assigning '{}'", name))?;
        check_assignable(value.static_type(), ty)?;

        self.emit(Instruction::new(
            line,
            Opcode::Set,
            vec![Value::Reference(typed_ref(&name, ty)), value],
        ));
        Ok(())
    }

    /// SET target type for an undeclared name
    fn infer_type(&self, rhs: &[Token]) -> ScriptResult<DataType> {
        if rhs.first() == Some(&Token::LBrace) {
            let list = self.compile_value(rhs, None)?;
            return Ok(list.static_type().unwrap_or(DataType::IntArray));
        }
        if is_condition(rhs) || matches!(rhs, [Token::Word(w)] if bool_word(w).is_some()) {
            return Ok(DataType::Bool);
        }
        if rhs.iter().any(|t| matches!(t, Token::Str(_))) {
            return Ok(DataType::Str);
        }
        Ok(match rhs {
            [Token::Var(r)] => self
                .resolve_ref(r)?
                .resolved_type()
                .unwrap_or(DataType::Int),
            [Token::Hex(_)] => DataType::UInt,
            formula => infer_kind(formula).data_type(),
        })
    }

    /* ===================== Array Mutators ===================== */

    /// Resolve an array mutator target; RESPONSE is only open to FILTER/RESET
    fn array_target(&self, token: &Token, op: Opcode) -> ScriptResult<VarRef> {
        let name = target_name(token)?;
        if ReservedVars::is_reserved(&name)
            && !(name == crate::interpreter::variables::RESPONSE
                && matches!(op, Opcode::Filter | Opcode::Reset))
        {
            return Err(ErrorKind::ReadOnly(name).into());
        }

        let target = self.resolve_ref(&VarRef::named(name))?;
        match target.ty {
            Some(ty) if ty.is_array() => Ok(target),
            Some(ty) => Err(ScriptError::type_mismatch("IntArray or StrArray", ty)
                .context(target.to_string())),
            None => Err(ScriptError::unknown_variable(target.name)),
        }
    }

    fn compile_mutator(&mut self, line: usize, op: Opcode, args: &[Token]) -> ScriptResult<()> {
        let (target, rest) = args
            .split_first()
            .ok_or_else(|| ScriptError::syntax("missing target array"))?;
        let target = self.array_target(target, op)?;
        let element = target.ty.and_then(DataType::element);

        let sig = signatures::for_opcode(op)
            .ok_or_else(|| ScriptError::syntax(format!("{} has no signature", op)))?;
        let groups = split_params(rest);
        sig.check_count(groups.len())?;

        let mut values = Vec::with_capacity(groups.len());
        for (pos, group) in groups.iter().enumerate() {
            let kind = sig.kind_at(pos);
            let expected = match kind.and_then(|k| k.expected_type()) {
                Some(ty) => Some(ty),
                None => element,
            };
            let value = self.compile_value(group, expected)?;
            if kind.and_then(|k| k.expected_type()).is_none() {
                if let Some(element) = element {
                    check_assignable(value.static_type(), element)?;
                }
            }
            values.push(value);
        }
        sig.check(&values)?;

        let mut params = vec![Value::Reference(target)];
        params.extend(values);
        self.emit(Instruction::new(line, op, params));
        Ok(())
    }

    /// `POP $list [$into]`
    fn compile_pop(&mut self, line: usize, args: &[Token]) -> ScriptResult<()> {
        let (target, dest) = match args {
            [target] => (target, None),
            [target, dest] => (target, Some(dest)),
            _ => return Err(ScriptError::arity("1 to 2", args.len())),
        };
        let target = self.array_target(target, Opcode::Pop)?;

        let mut params = vec![Value::Reference(target.clone())];
        if let Some(dest) = dest {
            let name = target_name(dest)?;
            if ReservedVars::is_reserved(&name) {
                return Err(ErrorKind::ReadOnly(name).into());
            }
            let dest = self.resolve_ref(&VarRef::named(name))?;
            if let (Some(element), Some(ty)) = (target.ty.and_then(DataType::element), dest.ty) {
                check_assignable(Some(element), ty)?;
            }
            params.push(Value::Reference(dest));
        }

        self.emit(Instruction::new(line, Opcode::Pop, params));
        Ok(())
    }

    /// `FILTER $list [NOT] op value`, stored as [target, op, value, negate]
    fn compile_filter(&mut self, line: usize, args: &[Token]) -> ScriptResult<()> {
        let (target, rest) = args
            .split_first()
            .ok_or_else(|| ScriptError::syntax("missing target array"))?;
        let target = self.array_target(target, Opcode::Filter)?;

        let (negate, rest) = strip_not(rest);
        let (op_token, rhs) = rest
            .split_first()
            .ok_or_else(|| ScriptError::syntax("expected 'FILTER $list op value'"))?;
        let op = comparison_of(op_token).ok_or_else(|| {
            ScriptError::syntax(format!("expected a comparison, found '{}'", op_token))
        })?;
        if rhs.is_empty() {
            return Err(ScriptError::syntax("missing filter value"));
        }

        let element = target.ty.and_then(DataType::element);
        let value = self.compile_value(rhs, element)?;

        self.emit(Instruction::new(
            line,
            Opcode::Filter,
            vec![
                Value::Reference(target),
                Value::str(op.to_string()),
                value,
                Value::Literal(Data::Bool(negate)),
            ],
        ));
        Ok(())
    }

    /* ===================== Collaborators ===================== */

    fn compile_call(&mut self, line: usize, op: Opcode, args: &[Token]) -> ScriptResult<()> {
        let sig = signatures::for_opcode(op)
            .ok_or_else(|| ErrorKind::UnknownCommand(op.keyword().to_string()))?;
        let groups = split_params(args);
        sig.check_count(groups.len())?;

        let values = groups
            .iter()
            .enumerate()
            .map(|(pos, group)| {
                let expected = sig.kind_at(pos).and_then(|k| k.expected_type());
                self.compile_value(group, expected)
            })
            .collect::<ScriptResult<Vec<_>>>()?;
        sig.check(&values)?;

        self.emit(Instruction::new(line, op, values));
        Ok(())
    }

    fn compile_option(&mut self, line: usize, name: &str, args: &[Token]) -> ScriptResult<()> {
        self.check_placement(Opcode::Option)?;
        let kinds = self
            .options
            .signature(name)
            .ok_or_else(|| ErrorKind::UnknownCommand(format!("-{}", name)))?
            .to_vec();

        let groups = split_params(args);
        if groups.len() != kinds.len() {
            return Err(ScriptError::arity(kinds.len().to_string(), groups.len())
                .context(format!("-{}", name)));
        }

        let mut values = Vec::with_capacity(kinds.len());
        for (pos, (group, kind)) in groups.iter().zip(&kinds).enumerate() {
            let value = self.compile_value(group, kind.expected_type())?;
            if let Some(ty) = value.static_type() {
                if !kind.accepts(ty) {
                    return Err(ScriptError::type_mismatch(format!("{:?}", kind).to_lowercase(), ty)
                        .context(format!("-{} argument {}", name, pos + 1)));
                }
            }
            values.push(value);
        }

        let mut ins = Instruction::new(line, Opcode::Option, values);
        ins.option = Some(name.to_ascii_lowercase());
        self.emit(ins);
        Ok(())
    }

    /* ===================== Conditionals ===================== */

    fn compile_if(&mut self, line: usize, args: &[Token]) -> ScriptResult<()> {
        let cond = self.condition_value(args)?;
        let id = self.program.conditionals.len();
        self.program.conditionals.push(CondBlock {
            start: self.next_index(),
            branches: Vec::new(),
            has_else: false,
            end: 0,
            loop_depth: self.loop_stack.len(),
            owner: self.owner,
        });
        self.cond_stack.push(id);
        self.emit(Instruction::new(line, Opcode::If, vec![cond]).with_block(BlockRef::Cond(id)));
        Ok(())
    }

    /// Innermost IF, which must be at the current loop depth and owner
    fn open_cond(&self, op: Opcode) -> ScriptResult<CondId> {
        let id = *self
            .cond_stack
            .last()
            .ok_or_else(|| ScriptError::nesting(format!("{} without IF", op)))?;
        let block = &self.program.conditionals[id];
        if block.loop_depth != self.loop_stack.len() {
            return Err(ScriptError::nesting(format!("{} crosses an open FOR", op)));
        }
        if block.owner != self.owner {
            return Err(ScriptError::nesting(format!("{} crosses a SUB boundary", op)));
        }
        Ok(id)
    }

    fn compile_elseif(&mut self, line: usize, args: &[Token]) -> ScriptResult<()> {
        let id = self.open_cond(Opcode::ElseIf)?;
        if self.program.conditionals[id].has_else {
            return Err(ScriptError::nesting("ELSEIF after ELSE"));
        }
        let cond = self.condition_value(args)?;
        let idx = self.emit(
            Instruction::new(line, Opcode::ElseIf, vec![cond]).with_block(BlockRef::Cond(id)),
        );
        self.program.conditionals[id].branches.push(idx);
        Ok(())
    }

    fn compile_else(&mut self, line: usize, args: &[Token]) -> ScriptResult<()> {
        no_args(Opcode::Else, args)?;
        let id = self.open_cond(Opcode::Else)?;
        if self.program.conditionals[id].has_else {
            return Err(ScriptError::nesting("second ELSE"));
        }
        let idx = self
            .emit(Instruction::new(line, Opcode::Else, Vec::new()).with_block(BlockRef::Cond(id)));
        let block = &mut self.program.conditionals[id];
        block.branches.push(idx);
        block.has_else = true;
        Ok(())
    }

    fn compile_endif(&mut self, line: usize, args: &[Token]) -> ScriptResult<()> {
        no_args(Opcode::EndIf, args)?;
        let id = self.open_cond(Opcode::EndIf)?;
        self.cond_stack.pop();
        let idx = self
            .emit(Instruction::new(line, Opcode::EndIf, Vec::new()).with_block(BlockRef::Cond(id)));
        self.program.conditionals[id].end = idx;
        Ok(())
    }

    /* ===================== Loops ===================== */

    fn compile_for(&mut self, line: usize, args: &[Token]) -> ScriptResult<()> {
        let (var, kind, inclusive, params) = match args {
            [] => {
                let var = generated_loop_var(line);
                (var.clone(), LoopKind::Infinite, false, Vec::new())
            }
            [target, Token::Assign(a), rest @ ..] if a == "=" => {
                let name = target_name(target)?;
                let (inclusive, params) = self.compile_range(&name, rest)?;
                (name, LoopKind::Range, inclusive, params)
            }
            count => {
                let value = self.compile_value(count, Some(DataType::Int))?;
                check_numeric(&value)?;
                (generated_loop_var(line), LoopKind::Counted, false, vec![value])
            }
        };

        if kind != LoopKind::Range {
            self.declare(&var, DataType::Int)?;
        }
        let var_ty = self
            .program
            .declared_type(self.owner, &var)
            .unwrap_or(DataType::Int);

        let mut all = vec![Value::Reference(typed_ref(&var, var_ty))];
        all.extend(params);

        let id = self.program.loops.len();
        self.program.loops.push(LoopDef {
            var,
            kind,
            inclusive,
            start: self.next_index(),
            next: 0,
            end: 0,
            if_depth: self.cond_stack.len(),
            owner: self.owner,
        });
        self.loop_stack.push(id);
        self.emit(Instruction::new(line, Opcode::For, all).with_block(BlockRef::Loop(id)));
        Ok(())
    }

    /// `a TO|UPTO b [STEP s]` for loop variable `name`
    fn compile_range(&mut self, name: &str, rest: &[Token]) -> ScriptResult<(bool, Vec<Value>)> {
        let to = rest
            .iter()
            .position(|t| t.is_word("TO") || t.is_word("UPTO"))
            .ok_or_else(|| ScriptError::syntax("expected TO or UPTO"))?;
        let inclusive = rest[to].is_word("TO");
        let (start, tail) = (&rest[..to], &rest[to + 1..]);
        let (end, step) = match tail.iter().position(|t| t.is_word("STEP")) {
            Some(p) => (&tail[..p], Some(&tail[p + 1..])),
            None => (tail, None),
        };

        if ReservedVars::is_reserved(name) {
            return Err(ErrorKind::ReadOnly(name.to_string()).into());
        }
        match self.program.declared_type(self.owner, name) {
            Some(ty) if !ty.is_numeric() => {
                return Err(ScriptError::type_mismatch("Integer", ty)
                    .context(format!("loop variable '{}'", name)))
            }
            Some(_) => {}
            None => self.declare(name, DataType::Int)?,
        }

        let start = self.compile_value(start, Some(DataType::Int))?;
        let end = self.compile_value(end, Some(DataType::Int))?;
        let step = match step {
            Some(tokens) => self.compile_value(tokens, Some(DataType::Int))?,
            None => Value::int(1),
        };
        for value in [&start, &end, &step] {
            check_numeric(value)?;
        }

        Ok((inclusive, vec![start, end, step]))
    }

    fn compile_next(&mut self, line: usize, args: &[Token]) -> ScriptResult<()> {
        let id = *self
            .loop_stack
            .last()
            .ok_or_else(|| ScriptError::nesting("NEXT without FOR"))?;
        let def = &self.program.loops[id];
        if def.if_depth != self.cond_stack.len() {
            return Err(ScriptError::nesting("NEXT crosses an open IF"));
        }
        if def.owner != self.owner {
            return Err(ScriptError::nesting("NEXT crosses a SUB boundary"));
        }
        match args {
            [] => {}
            [name] => {
                let name = target_name(name)?;
                if name != def.var {
                    return Err(ScriptError::nesting(format!(
                        "NEXT {} does not match FOR {}",
                        name, def.var
                    )));
                }
            }
            _ => return Err(ScriptError::syntax("expected 'NEXT [name]'")),
        }

        self.loop_stack.pop();
        let next = self
            .emit(Instruction::new(line, Opcode::Next, Vec::new()).with_block(BlockRef::Loop(id)));
        let end = self
            .emit(Instruction::new(line, Opcode::EndFor, Vec::new()).with_block(BlockRef::Loop(id)));
        let def = &mut self.program.loops[id];
        def.next = next;
        def.end = end;
        Ok(())
    }

    fn innermost_loop(&self, op: Opcode) -> ScriptResult<LoopId> {
        self.loop_stack
            .last()
            .copied()
            .filter(|id| self.program.loops[*id].owner == self.owner)
            .ok_or_else(|| ScriptError::nesting(format!("{} outside FOR", op)))
    }

    /* ===================== Subroutines ===================== */

    fn compile_sub(&mut self, line: usize, args: &[Token]) -> ScriptResult<()> {
        let name = match args {
            [Token::Word(name)] => name.clone(),
            _ => return Err(ScriptError::syntax("expected 'SUB name'")),
        };
        if self.owner.is_some() {
            return Err(ScriptError::nesting("SUB cannot nest"));
        }
        if !self.cond_stack.is_empty() || !self.loop_stack.is_empty() {
            return Err(ScriptError::nesting("SUB inside an open IF or FOR"));
        }
        if self.program.sub_by_name(&name).is_some() {
            return Err(ScriptError::syntax(format!("duplicate SUB '{}'", name)));
        }

        let id = self.program.subroutines.len();
        self.program.subroutines.push(SubDef {
            name: name.clone(),
            start: self.next_index(),
            end: 0,
            locals: Default::default(),
        });
        self.owner = Some(id);
        self.emit(Instruction::new(line, Opcode::Sub, vec![Value::str(name)]).with_block(BlockRef::Sub(id)));
        Ok(())
    }

    fn compile_endsub(&mut self, line: usize, args: &[Token]) -> ScriptResult<()> {
        no_args(Opcode::EndSub, args)?;
        let id = self
            .owner
            .ok_or_else(|| ScriptError::nesting("ENDSUB without SUB"))?;
        if !self.cond_stack.is_empty() || !self.loop_stack.is_empty() {
            return Err(ScriptError::nesting("ENDSUB inside an open IF or FOR"));
        }
        let idx = self
            .emit(Instruction::new(line, Opcode::EndSub, Vec::new()).with_block(BlockRef::Sub(id)));
        self.program.subroutines[id].end = idx;
        self.owner = None;
        Ok(())
    }

    fn compile_return(&mut self, line: usize, args: &[Token]) -> ScriptResult<()> {
        let id = self
            .owner
            .ok_or_else(|| ScriptError::nesting("RETURN outside SUB"))?;
        let params = if args.is_empty() {
            Vec::new()
        } else {
            let value = self.compile_value(args, Some(DataType::Int))?;
            check_numeric(&value)?;
            vec![value]
        };
        self.emit(Instruction::new(line, Opcode::Return, params).with_block(BlockRef::Sub(id)));
        Ok(())
    }

    /* ===================== Declarations ===================== */

    fn declare(&mut self, name: &str, ty: DataType) -> ScriptResult<()> {
        if ReservedVars::is_reserved(name) {
            return Err(ErrorKind::ReadOnly(name.to_string()).into());
        }
        let scope = match self.owner {
            Some(id) => &mut self.program.subroutines[id].locals,
            None => &mut self.program.globals,
        };
        match scope.get(name) {
            Some(existing) if *existing != ty => Err(ScriptError::type_mismatch(*existing, ty)
                .context(format!("redeclaring '{}'", name))),
            Some(_) => Ok(()),
            None => {
                scope.insert(name.to_string(), ty);
                Ok(())
            }
        }
    }

    fn lookup_type(&self, name: &str) -> Option<DataType> {
        self.program
            .declared_type(self.owner, name)
            .or_else(|| ReservedVars::type_of(name))
    }

    /// Fill in the declared type, checking index variables and suffix use
    fn resolve_ref(&self, var: &VarRef) -> ScriptResult<VarRef> {
        let ty = self
            .lookup_type(&var.name)
            .ok_or_else(|| ScriptError::unknown_variable(&var.name))?;

        let parts: Vec<&IndexPart> = match &var.index {
            Some(Index::At(p)) => vec![p],
            Some(Index::Range(a, b)) => vec![a, b],
            None => Vec::new(),
        };
        for part in parts {
            if let IndexPart::Var(name) = part {
                let index_ty = self
                    .lookup_type(name)
                    .ok_or_else(|| ScriptError::unknown_variable(name))?;
                if !index_ty.is_numeric() {
                    return Err(ScriptError::type_mismatch("Integer", index_ty)
                        .context(format!("index of {}", var)));
                }
            }
        }

        var.project_type(ty).context(var.to_string())?;
        let mut resolved = var.clone();
        resolved.ty = Some(ty);
        Ok(resolved)
    }

    /* ===================== Values ===================== */

    fn compile_value(&self, tokens: &[Token], expected: Option<DataType>) -> ScriptResult<Value> {
        let Some(first) = tokens.first() else {
            return Err(ScriptError::syntax("missing value"));
        };

        if tokens.len() == 1 {
            return self.compile_atom(first);
        }
        if let [Token::Arith('-'), Token::Num(n)] = tokens {
            return Ok(Value::int(-n));
        }
        if *first == Token::LBrace {
            return self.compile_list(tokens, expected);
        }
        if is_condition(tokens) || expected == Some(DataType::Bool) {
            let cond = self.compile_condition(tokens)?;
            return Ok(Value::Expression(Expr::Compare {
                cond: Box::new(cond),
            }));
        }
        if expected == Some(DataType::Str) || tokens.iter().any(|t| matches!(t, Token::Str(_))) {
            return self.compile_concat(tokens);
        }
        self.compile_formula(tokens, expected)
    }

    fn compile_atom(&self, token: &Token) -> ScriptResult<Value> {
        match token {
            Token::Num(n) => Ok(Value::int(*n)),
            Token::Hex(h) => Ok(Value::Literal(Data::UInt(*h))),
            Token::Str(s) => Ok(Value::str(s.clone())),
            Token::Var(r) => Ok(Value::Reference(self.resolve_ref(r)?)),
            Token::Word(w) => bool_word(w)
                .map(|b| Value::Literal(Data::Bool(b)))
                .ok_or_else(|| ScriptError::syntax(format!("unexpected word '{}'", w))),
            other => Err(ScriptError::syntax(format!("unexpected '{}'", other))),
        }
    }

    /// `{a, b, c}`
    fn compile_list(&self, tokens: &[Token], expected: Option<DataType>) -> ScriptResult<Value> {
        let inner = match tokens {
            [Token::LBrace, inner @ .., Token::RBrace] => inner,
            _ => return Err(ScriptError::syntax("array literal must end with '}'")),
        };
        let element = expected.and_then(DataType::element);
        let items = if inner.is_empty() {
            Vec::new()
        } else {
            split_top(inner, |t| *t == Token::Comma)
                .into_iter()
                .map(|item| self.compile_value(item, element))
                .collect::<ScriptResult<Vec<_>>>()?
        };

        for item in &items {
            if let Some(ty) = item.static_type() {
                if ty.is_array() {
                    return Err(ScriptError::type_mismatch("array element", ty));
                }
            }
        }

        let ty = match expected {
            Some(ty) if ty.is_array() => ty,
            _ if items
                .iter()
                .all(|i| i.static_type().map_or(false, DataType::is_numeric)) =>
            {
                DataType::IntArray
            }
            _ => DataType::StrArray,
        };
        if let Some(element) = ty.element() {
            for item in &items {
                check_assignable(item.static_type(), element)?;
            }
        }

        Ok(Value::Expression(Expr::List { items, ty }))
    }

    /// `"text" + $value + ...`
    fn compile_concat(&self, tokens: &[Token]) -> ScriptResult<Value> {
        let parts = split_top(tokens, |t| *t == Token::Arith('+'));
        if parts.len() == 1 {
            if tokens.iter().any(|t| matches!(t, Token::Str(_))) {
                return match strip_parens(tokens) {
                    Some(inner) => self.compile_value(inner, Some(DataType::Str)),
                    None => Err(ScriptError::syntax("expected '+' between string parts")),
                };
            }
            return self.compile_formula(tokens, None);
        }

        let parts = parts
            .into_iter()
            .map(|part| match strip_parens(part) {
                Some(inner) if inner.iter().any(|t| matches!(t, Token::Str(_))) => {
                    self.compile_value(inner, Some(DataType::Str))
                }
                _ => self.compile_value(part, None),
            })
            .collect::<ScriptResult<Vec<_>>>()?;
        Ok(Value::Expression(Expr::Concat { parts }))
    }

    fn compile_formula(&self, tokens: &[Token], expected: Option<DataType>) -> ScriptResult<Value> {
        let tokens = tokens
            .iter()
            .map(|t| match t {
                Token::Var(r) => self.resolve_ref(r).map(Token::Var),
                other => Ok(other.clone()),
            })
            .collect::<ScriptResult<Vec<_>>>()?;

        let kind = expected
            .and_then(NumKind::for_type)
            .unwrap_or_else(|| infer_kind(&tokens));
        let formula = Formula::from_tokens(&tokens, kind)?;
        Ok(Value::Expression(Expr::Calc { formula }))
    }

    /// `[NOT] lhs [op rhs]`; a single comparison, never compound
    fn compile_condition(&self, tokens: &[Token]) -> ScriptResult<Condition> {
        let (negate, rest) = strip_not(tokens);
        if rest.is_empty() {
            return Err(ScriptError::syntax("missing condition"));
        }

        let Some((pos, op)) = comparison_at(rest) else {
            let lhs = self.compile_value(rest, None)?;
            if let Some(ty) = lhs.static_type() {
                if ty != DataType::Bool {
                    return Err(ScriptError::type_mismatch(DataType::Bool, ty)
                        .context("condition without comparison"));
                }
            }
            return Ok(Condition {
                negate,
                lhs,
                test: None,
            });
        };

        let (lhs, rhs) = (&rest[..pos], &rest[pos + 1..]);
        if comparison_at(rhs).is_some() || rhs.first().map_or(false, |t| t.is_word("NOT")) {
            return Err(ScriptError::syntax("compound conditions are not supported"));
        }
        let lhs = self.compile_value(lhs, None)?;
        let rhs = self.compile_value(rhs, None)?;
        if let (Some(l), Some(r)) = (lhs.static_type(), rhs.static_type()) {
            check_comparable(op, l, r)?;
        }

        Ok(Condition {
            negate,
            lhs,
            test: Some((op, rhs)),
        })
    }

    fn condition_value(&self, tokens: &[Token]) -> ScriptResult<Value> {
        let cond = self.compile_condition(tokens)?;
        Ok(Value::Expression(Expr::Compare {
            cond: Box::new(cond),
        }))
    }
}

/* ===================== Token Helpers ===================== */

fn no_args(op: Opcode, args: &[Token]) -> ScriptResult<()> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(ScriptError::arity("0", args.len()).context(op.keyword().to_string()))
    }
}

fn target_name(token: &Token) -> ScriptResult<String> {
    match token {
        Token::Word(w) if bool_word(w).is_none() => Ok(w.clone()),
        Token::Var(r) if r.is_plain() => Ok(r.name.clone()),
        other => Err(ScriptError::syntax(format!(
            "expected a variable name, found '{}'",
            other
        ))),
    }
}

fn typed_ref(name: &str, ty: DataType) -> VarRef {
    let mut r = VarRef::named(name);
    r.ty = Some(ty);
    r
}

fn generated_loop_var(line: usize) -> String {
    format!("_FOR{}", line)
}

fn bool_word(word: &str) -> Option<bool> {
    if word.eq_ignore_ascii_case("true") {
        Some(true)
    } else if word.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

fn is_operator_word(word: &str) -> bool {
    matches!(
        word.to_ascii_uppercase().as_str(),
        "AND" | "OR" | "XOR" | "ROR" | "ROL" | "NOT" | "CONTAINS" | "STARTSWITH" | "ENDSWITH"
    )
}

fn comparison_of(token: &Token) -> Option<CmpOp> {
    match token {
        Token::Cmp(sym) => CmpOp::parse(sym),
        Token::Assign(sym) if sym == "=" => Some(CmpOp::Eq),
        Token::Word(w) => CmpOp::parse(w),
        _ => None,
    }
}

/// First comparison outside parentheses
fn comparison_at(tokens: &[Token]) -> Option<(usize, CmpOp)> {
    let mut depth = 0usize;
    for (i, token) in tokens.iter().enumerate() {
        match token {
            Token::LParen | Token::LBrace => depth += 1,
            Token::RParen | Token::RBrace => depth = depth.saturating_sub(1),
            _ if depth == 0 => {
                if let Some(op) = comparison_of(token) {
                    return Some((i, op));
                }
            }
            _ => {}
        }
    }
    None
}

fn is_condition(tokens: &[Token]) -> bool {
    tokens.first().map_or(false, |t| t.is_word("NOT")) || comparison_at(tokens).is_some()
}

fn strip_not(tokens: &[Token]) -> (bool, &[Token]) {
    match tokens.split_first() {
        Some((first, rest)) if first.is_word("NOT") => (true, rest),
        _ => (false, tokens),
    }
}

/// Inner tokens when the whole slice is one parenthesised group
fn strip_parens(tokens: &[Token]) -> Option<&[Token]> {
    let [Token::LParen, inner @ .., Token::RParen] = tokens else {
        return None;
    };
    let mut depth = 0i32;
    for token in inner {
        match token {
            Token::LParen => depth += 1,
            Token::RParen => {
                depth -= 1;
                if depth < 0 {
                    return None;
                }
            }
            _ => {}
        }
    }
    (depth == 0).then_some(inner)
}

/// Split on separators outside parentheses and braces
fn split_top(tokens: &[Token], is_sep: impl Fn(&Token) -> bool) -> Vec<&[Token]> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, token) in tokens.iter().enumerate() {
        match token {
            Token::LParen | Token::LBrace => depth += 1,
            Token::RParen | Token::RBrace => depth = depth.saturating_sub(1),
            t if depth == 0 && is_sep(t) => {
                parts.push(&tokens[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&tokens[start..]);
    parts
}

fn ends_value(token: &Token) -> bool {
    match token {
        Token::Num(_) | Token::Hex(_) | Token::Str(_) | Token::Var(_) => true,
        Token::RParen | Token::RBrace => true,
        Token::Word(w) => !is_operator_word(w),
        _ => false,
    }
}

fn starts_value(token: &Token) -> bool {
    match token {
        Token::Num(_) | Token::Hex(_) | Token::Str(_) | Token::Var(_) => true,
        Token::LParen | Token::LBrace | Token::Bang => true,
        Token::Word(w) => !is_operator_word(w),
        _ => false,
    }
}

/// Split whitespace-separated parameters: a new one starts wherever a
/// value directly follows another value at the top level.
fn split_params(tokens: &[Token]) -> Vec<&[Token]> {
    if tokens.is_empty() {
        return Vec::new();
    }
    let mut groups = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for i in 0..tokens.len() {
        if i > start && depth == 0 && ends_value(&tokens[i - 1]) && starts_value(&tokens[i]) {
            groups.push(&tokens[start..i]);
            start = i;
        }
        match tokens[i] {
            Token::LParen | Token::LBrace => depth += 1,
            Token::RParen | Token::RBrace => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    groups.push(&tokens[start..]);
    groups
}

/// Result kind for a formula with no expected type
fn infer_kind(tokens: &[Token]) -> NumKind {
    let bitwise = tokens.iter().any(|t| {
        matches!(t, Token::Bang)
            || t.word().map_or(false, |w| {
                matches!(
                    w.to_ascii_uppercase().as_str(),
                    "AND" | "OR" | "XOR" | "ROR" | "ROL"
                )
            })
    });
    if bitwise {
        return NumKind::Unsigned;
    }
    let array = tokens.iter().any(|t| match t {
        Token::Var(r) => r.resolved_type() == Some(DataType::IntArray),
        _ => false,
    });
    if array {
        NumKind::IntArray
    } else {
        NumKind::Signed
    }
}

/// `x op= rhs` as the right-hand side of `x = ...`
fn compound_source(name: &str, ty: DataType, op: &str, rhs: &[Token]) -> ScriptResult<Vec<Token>> {
    let arith = op
        .chars()
        .next()
        .ok_or_else(|| ScriptError::syntax("empty assignment operator"))?;

    let mut tokens = vec![Token::Var(VarRef::named(name)), Token::Arith(arith)];
    if ty == DataType::Str {
        if arith != '+' {
            return Err(ScriptError::type_mismatch("Integer", ty).context(format!("'{}'", op)));
        }
        tokens.extend_from_slice(rhs);
    } else {
        tokens.push(Token::LParen);
        tokens.extend_from_slice(rhs);
        tokens.push(Token::RParen);
    }
    Ok(tokens)
}

/* ===================== Type Checks ===================== */

fn check_assignable(from: Option<DataType>, to: DataType) -> ScriptResult<()> {
    let Some(from) = from else {
        return Ok(());
    };
    let ok = from == to
        || (from.is_numeric() && to.is_numeric())
        || (to == DataType::Str && !from.is_array())
        || (from == DataType::IntArray && to == DataType::StrArray);
    if ok {
        Ok(())
    } else {
        Err(ScriptError::type_mismatch(to, from))
    }
}

fn check_numeric(value: &Value) -> ScriptResult<()> {
    match value.static_type() {
        Some(ty) if !ty.is_numeric() => Err(ScriptError::type_mismatch(DataType::Int, ty)),
        _ => Ok(()),
    }
}

fn check_comparable(op: CmpOp, l: DataType, r: DataType) -> ScriptResult<()> {
    let ok = match op {
        CmpOp::Contains | CmpOp::StartsWith | CmpOp::EndsWith => {
            l == DataType::Str && r == DataType::Str
        }
        CmpOp::Eq | CmpOp::Ne => (l.is_numeric() && r.is_numeric()) || (l == r && !l.is_array()),
        _ => (l.is_numeric() && r.is_numeric()) || (l == DataType::Str && r == DataType::Str),
    };
    if ok {
        Ok(())
    } else {
        Err(ScriptError::type_mismatch(l, r).context(format!("comparison {}", op)))
    }
}
