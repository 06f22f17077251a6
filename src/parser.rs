//! Textual IR parser (spec.md 6.1): a line-based lexer feeding a two-pass
//! construction -- an AST pass that resolves nothing, then an IR pass that
//! creates every function signature first (so forward calls resolve),
//! then per function builds blocks up front (so forward branches resolve)
//! and defers Phi incoming values that reference a not-yet-seen name until
//! the whole function has been walked.

use std::collections::HashMap;
use std::rc::Rc;
use std::cell::RefCell;

use crate::context::Context;
use crate::error::{IrError, Result};
use crate::function::FuncId;
use crate::instr::{BinaryOp, CastKind, IntPredicate, UnaryOp};
use crate::module::Module;
use crate::types::TypeId;
use crate::value::{BlockId, ValueRef};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Number(String),
    Punct(char),
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
    col: usize,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Lexer { chars: src.chars().peekable(), line: 1, col: 1 }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next();
        if let Some(c) = c {
            if c == '\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
        }
        c
    }

    fn tokenize(mut self) -> Result<Vec<(Token, usize, usize)>> {
        let mut out = Vec::new();
        loop {
            while matches!(self.chars.peek(), Some(c) if c.is_whitespace()) {
                self.bump();
            }
            match self.chars.peek() {
                None => break,
                Some('/') => {
                    let (line, col) = (self.line, self.col);
                    self.bump();
                    match self.chars.peek() {
                        Some('/') => {
                            while !matches!(self.chars.peek(), None | Some('\n')) {
                                self.bump();
                            }
                        }
                        Some('*') => {
                            self.bump();
                            loop {
                                match self.bump() {
                                    None => return Err(IrError::Parse { line, col, message: "unterminated block comment".into() }),
                                    Some('*') if self.chars.peek() == Some(&'/') => {
                                        self.bump();
                                        break;
                                    }
                                    _ => {}
                                }
                            }
                        }
                        _ => return Err(IrError::Parse { line, col, message: "unexpected '/'".into() }),
                    }
                }
                Some(c) if c.is_ascii_digit() => {
                    let (line, col) = (self.line, self.col);
                    let mut s = String::new();
                    while matches!(self.chars.peek(), Some(c) if c.is_ascii_alphanumeric()) {
                        s.push(self.bump().unwrap());
                    }
                    out.push((Token::Number(s), line, col));
                }
                Some(c) if c.is_alphabetic() || *c == '_' || *c == '@' => {
                    let (line, col) = (self.line, self.col);
                    let mut s = String::new();
                    while matches!(self.chars.peek(), Some(c) if c.is_alphanumeric() || *c == '_' || *c == '@') {
                        s.push(self.bump().unwrap());
                    }
                    out.push((Token::Ident(s), line, col));
                }
                Some(&c) if "(){}:;,=*[]".contains(c) => {
                    let (line, col) = (self.line, self.col);
                    self.bump();
                    out.push((Token::Punct(c), line, col));
                }
                Some(&c) => {
                    return Err(IrError::Parse { line: self.line, col: self.col, message: format!("unexpected character '{c}'") });
                }
            }
        }
        Ok(out)
    }
}

struct TokenStream {
    tokens: Vec<(Token, usize, usize)>,
    pos: usize,
}

impl TokenStream {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _, _)| t)
    }

    fn pos_info(&self) -> (usize, usize) {
        self.tokens.get(self.pos).map(|(_, l, c)| (*l, *c)).unwrap_or((0, 0))
    }

    fn next(&mut self) -> Result<Token> {
        let (l, c) = self.pos_info();
        let t = self.tokens.get(self.pos).cloned().ok_or(IrError::Parse { line: l, col: c, message: "unexpected end of input".into() })?;
        self.pos += 1;
        Ok(t.0)
    }

    fn expect_punct(&mut self, p: char) -> Result<()> {
        let (line, col) = self.pos_info();
        match self.next()? {
            Token::Punct(c) if c == p => Ok(()),
            other => Err(IrError::Parse { line, col, message: format!("expected '{p}', found {other:?}") }),
        }
    }

    fn expect_ident(&mut self) -> Result<String> {
        let (line, col) = self.pos_info();
        match self.next()? {
            Token::Ident(s) => Ok(s),
            other => Err(IrError::Parse { line, col, message: format!("expected identifier, found {other:?}") }),
        }
    }

    fn at_punct(&self, p: char) -> bool {
        matches!(self.peek(), Some(Token::Punct(c)) if *c == p)
    }

    fn at_ident(&self, s: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(i)) if i == s)
    }
}

fn parse_type(stream: &mut TokenStream, context: &Rc<RefCell<Context>>) -> Result<TypeId> {
    let (line, col) = stream.pos_info();
    let name = stream.expect_ident()?;
    let mut ty = {
        let ctx = context.borrow();
        match name.as_str() {
            "void" => ctx.void_ty(),
            "i1" => ctx.i1_ty(),
            "i8" => ctx.i8_ty(),
            "i16" => ctx.i16_ty(),
            "i32" => ctx.i32_ty(),
            "i64" => ctx.i64_ty(),
            other => return Err(IrError::UnknownType(format!("{other} ({line}:{col})"))),
        }
    };
    let mut indirection = 0;
    while stream.at_punct('*') {
        stream.expect_punct('*')?;
        indirection += 1;
    }
    if indirection > 0 {
        ty = context.borrow_mut().pointer_type(ty, indirection);
    }
    Ok(ty)
}

struct ParamSig {
    ty: TypeId,
    name: String,
}

struct FunctionSig {
    name: String,
    ret_ty: TypeId,
    params: Vec<ParamSig>,
    is_extern: bool,
}

/// Raw instruction text, deferred until block-name and value-name tables
/// for the whole function exist.
struct InstrLine {
    result: Option<String>,
    tokens: Vec<Token>,
    line: usize,
}

struct BlockAst {
    label: String,
    instructions: Vec<InstrLine>,
}

/// Parses an entire module's source text, registering every function
/// signature up front and then building each body.
pub fn parse_module(source: &str, context: &Rc<RefCell<Context>>) -> Result<Module> {
    let tokens = Lexer::new(source).tokenize()?;
    let mut stream = TokenStream { tokens, pos: 0 };

    let mut sigs: Vec<FunctionSig> = Vec::new();
    let mut bodies: Vec<Option<Vec<BlockAst>>> = Vec::new();

    while stream.peek().is_some() {
        let is_extern = stream.at_ident("extern");
        if is_extern {
            stream.next()?;
        }
        let ret_ty = parse_type(&mut stream, context)?;
        let name = stream.expect_ident()?;
        stream.expect_punct('(')?;

        let mut params = Vec::new();
        while !stream.at_punct(')') {
            let pty = parse_type(&mut stream, context)?;
            let pname = if !is_extern { stream.expect_ident()? } else { format!("a{}", params.len()) };
            params.push(ParamSig { ty: pty, name: pname });
            if stream.at_punct(',') {
                stream.expect_punct(',')?;
            }
        }
        stream.expect_punct(')')?;

        if is_extern {
            stream.expect_punct(';')?;
            sigs.push(FunctionSig { name, ret_ty, params, is_extern: true });
            bodies.push(None);
            continue;
        }

        stream.expect_punct('{')?;
        let mut blocks = Vec::new();
        while !stream.at_punct('}') {
            let label = stream.expect_ident()?;
            stream.expect_punct(':')?;
            let mut instructions = Vec::new();
            loop {
                if stream.at_punct('}') {
                    break;
                }
                // A new label starts the next block: ident followed by ':'.
                if let Some(Token::Ident(_)) = stream.peek() {
                    let save = stream.pos;
                    let maybe_label = stream.expect_ident()?;
                    if stream.at_punct(':') {
                        stream.pos = save;
                        break;
                    }
                    stream.pos = save;
                    let _ = maybe_label;
                }
                let (line, _) = stream.pos_info();
                let (result, tokens) = parse_instruction_line(&mut stream)?;
                instructions.push(InstrLine { result, tokens, line });
            }
            blocks.push(BlockAst { label, instructions });
        }
        stream.expect_punct('}')?;

        sigs.push(FunctionSig { name, ret_ty, params, is_extern: false });
        bodies.push(Some(blocks));
    }

    let mut module = Module::new(context.clone());
    let mut func_ids: Vec<FuncId> = Vec::new();
    for sig in &sigs {
        let param_types: Vec<TypeId> = sig.params.iter().map(|p| p.ty).collect();
        let id = module.create_function(sig.name.clone(), sig.ret_ty, &param_types)?;
        func_ids.push(id);
    }

    for (i, body) in bodies.into_iter().enumerate() {
        let Some(blocks) = body else { continue };
        build_function_body(&mut module, func_ids[i], &sigs[i], blocks, context)?;
    }

    Ok(module)
}

/// Collects one instruction's tokens up to (not including) the next
/// newline-terminated boundary -- in practice up to the next `;`-free
/// line, approximated here by reading tokens until we would cross into a
/// new label or the closing brace (the lexer discards newlines, so the
/// grammar relies on one instruction per source line; we instead read a
/// fixed-shape line by splitting on the optional `=` and otherwise
/// consuming until a token sequence that can only start a new statement).
fn parse_instruction_line(stream: &mut TokenStream) -> Result<(Option<String>, Vec<Token>)> {
    let mut result = None;
    let save = stream.pos;
    if let Some(Token::Ident(name)) = stream.peek().cloned() {
        let after = stream.pos + 1;
        if matches!(stream.tokens.get(after), Some((Token::Punct('='), _, _))) {
            stream.pos = after + 1;
            result = Some(name);
        } else {
            stream.pos = save;
        }
    }

    let mut tokens = Vec::new();
    let mnemonic_line = stream.pos_info().0;
    loop {
        match stream.peek() {
            None => break,
            Some(Token::Punct('}')) => break,
            Some(_) => {
                let (line, _) = stream.pos_info();
                if line != mnemonic_line && tokens_end_statement(&tokens) {
                    break;
                }
                tokens.push(stream.next()?);
            }
        }
    }
    Ok((result, tokens))
}

/// A statement ends once we've consumed a balanced set of brackets and the
/// mnemonic's argument list; since this grammar has no semicolons inside
/// bodies, a conservative heuristic is used: a line is "done" once bracket
/// nesting returns to zero and at least one token has been read.
fn tokens_end_statement(tokens: &[Token]) -> bool {
    if tokens.is_empty() {
        return false;
    }
    let mut depth: i32 = 0;
    for t in tokens {
        match t {
            Token::Punct('(') | Token::Punct('[') => depth += 1,
            Token::Punct(')') | Token::Punct(']') => depth -= 1,
            _ => {}
        }
    }
    depth <= 0
}

struct FunctionBuilder<'a> {
    module: &'a mut Module,
    func: FuncId,
    context: Rc<RefCell<Context>>,
    values: HashMap<String, ValueRef>,
    blocks: HashMap<String, BlockId>,
    deferred_phi_operands: Vec<(crate::value::InstrId, usize, String)>,
}

fn build_function_body(
    module: &mut Module,
    func: FuncId,
    sig: &FunctionSig,
    blocks_ast: Vec<BlockAst>,
    context: &Rc<RefCell<Context>>,
) -> Result<()> {
    let mut values = HashMap::new();
    {
        let f = module.function_mut(func);
        for (i, p) in sig.params.iter().enumerate() {
            values.insert(p.name.clone(), ValueRef::Param(crate::value::ParamId(i as u32)));
        }
        let mut block_map = HashMap::new();
        for b in &blocks_ast {
            let id = f.create_block();
            block_map.insert(b.label.clone(), id);
        }

        let mut builder = FunctionBuilder {
            module,
            func,
            context: context.clone(),
            values,
            blocks: block_map,
            deferred_phi_operands: Vec::new(),
        };

        for b in &blocks_ast {
            let block_id = builder.blocks[&b.label];
            for line in &b.instructions {
                builder.build_instruction(block_id, line)?;
            }
        }

        builder.resolve_deferred_phis()?;
        return Ok(());
    }
}

impl<'a> FunctionBuilder<'a> {
    fn func_mut(&mut self) -> &mut crate::function::Function {
        self.module.function_mut(self.func)
    }

    fn resolve_value(&self, name: &str) -> Result<ValueRef> {
        if let Some(&v) = self.values.get(name) {
            return Ok(v);
        }
        if name == "true" {
            let ty = self.context.borrow().i1_ty();
            return Ok(ValueRef::Const(self.context.borrow_mut().get_constant(ty, 1)));
        }
        if name == "false" {
            let ty = self.context.borrow().i1_ty();
            return Ok(ValueRef::Const(self.context.borrow_mut().get_constant(ty, 0)));
        }
        Err(IrError::UnknownValue(name.to_string()))
    }

    fn resolve_operand(&mut self, tokens: &[Token], idx: &mut usize, ty_hint: Option<TypeId>) -> Result<ValueRef> {
        match &tokens[*idx] {
            Token::Ident(name) if name == "null" => {
                *idx += 1;
                let ty = ty_hint.expect("null requires a pointer type hint");
                Ok(ValueRef::Const(self.context.borrow_mut().get_constant(ty, 0)))
            }
            Token::Ident(name) if name == "undef" => {
                *idx += 1;
                let ty = ty_hint.expect("undef requires a type hint");
                Ok(ValueRef::Undef(self.context.borrow_mut().get_undef(ty)))
            }
            Token::Ident(name) if self.blocks.contains_key(name) => {
                *idx += 1;
                Ok(ValueRef::Block(self.blocks[name]))
            }
            Token::Ident(name) => {
                *idx += 1;
                self.resolve_value(name)
            }
            Token::Number(n) => {
                *idx += 1;
                let ty = ty_hint.unwrap_or_else(|| self.context.borrow().i32_ty());
                let value: u64 = n.parse().unwrap_or(0);
                Ok(ValueRef::Const(self.context.borrow_mut().get_constant(ty, value)))
            }
            other => Err(IrError::Parse { line: 0, col: 0, message: format!("expected operand, found {other:?}") }),
        }
    }

    fn build_instruction(&mut self, block: BlockId, line: &InstrLine) -> Result<()> {
        let mut idx = 0;
        let Token::Ident(mnemonic) = &line.tokens[idx] else {
            return Err(IrError::Parse { line: line.line, col: 0, message: "expected mnemonic".into() });
        };
        let mnemonic = mnemonic.clone();
        idx += 1;

        let id = match mnemonic.as_str() {
            "neg" | "not" => {
                let op = if mnemonic == "neg" { UnaryOp::Neg } else { UnaryOp::Not };
                let ty = self.parse_type_token(&line.tokens, &mut idx)?;
                let value = self.resolve_operand(&line.tokens, &mut idx, Some(ty))?;
                let data = self.func_mut().make_unary(op, value);
                self.func_mut().push_back(block, data)
            }
            "add" | "sub" | "mul" | "udiv" | "sdiv" | "umod" | "smod" | "shr" | "shl" | "sar" | "and" | "or" | "xor" => {
                let op = binary_op_from_mnemonic(&mnemonic);
                let ty = self.parse_type_token(&line.tokens, &mut idx)?;
                let lhs = self.resolve_operand(&line.tokens, &mut idx, Some(ty))?;
                self.expect_comma(&line.tokens, &mut idx)?;
                let rhs = self.resolve_operand(&line.tokens, &mut idx, Some(ty))?;
                let data = self.func_mut().make_binary(lhs, op, rhs);
                self.func_mut().push_back(block, data)
            }
            "cmp" => {
                let Token::Ident(pred_name) = &line.tokens[idx] else {
                    return Err(IrError::Parse { line: line.line, col: 0, message: "expected compare predicate".into() });
                };
                let pred = predicate_from_mnemonic(pred_name)?;
                idx += 1;
                let ty = self.parse_type_token(&line.tokens, &mut idx)?;
                let lhs = self.resolve_operand(&line.tokens, &mut idx, Some(ty))?;
                self.expect_comma(&line.tokens, &mut idx)?;
                let rhs = self.resolve_operand(&line.tokens, &mut idx, Some(ty))?;
                let data = self.func_mut().make_int_compare(lhs, pred, rhs);
                self.func_mut().push_back(block, data)
            }
            "load" => {
                let address = self.resolve_operand(&line.tokens, &mut idx, None)?;
                let data = self.func_mut().make_load(address);
                self.func_mut().push_back(block, data)
            }
            "store" => {
                let address = self.resolve_operand(&line.tokens, &mut idx, None)?;
                self.expect_comma(&line.tokens, &mut idx)?;
                let ty_hint = self.func_mut().value_type(address);
                let pointee = self.context.borrow_mut().deref_pointer(ty_hint);
                let value = self.resolve_operand(&line.tokens, &mut idx, Some(pointee))?;
                let data = self.func_mut().make_store(address, value);
                self.func_mut().push_back(block, data)
            }
            "call" => {
                let ret_ty = self.parse_type_token(&line.tokens, &mut idx)?;
                let Token::Ident(callee_name) = &line.tokens[idx] else {
                    return Err(IrError::Parse { line: line.line, col: 0, message: "expected callee name".into() });
                };
                let callee_name = callee_name.clone();
                idx += 1;
                let callee = self.module.find_function(&callee_name).ok_or_else(|| IrError::UnknownValue(callee_name.clone()))?;
                if !matches!(line.tokens.get(idx), Some(Token::Punct('('))) {
                    return Err(IrError::Parse { line: line.line, col: 0, message: "expected '(' in call".into() });
                }
                idx += 1;
                let mut args = Vec::new();
                while !matches!(line.tokens.get(idx), Some(Token::Punct(')'))) {
                    let arg_ty = self.parse_type_token(&line.tokens, &mut idx)?;
                    let arg = self.resolve_operand(&line.tokens, &mut idx, Some(arg_ty))?;
                    args.push(arg);
                    if matches!(line.tokens.get(idx), Some(Token::Punct(','))) {
                        idx += 1;
                    }
                }
                let data = self.func_mut().make_call(callee, ret_ty, args);
                self.func_mut().push_back(block, data)
            }
            "branch" => {
                let target_name = self.ident_at(&line.tokens, idx)?;
                idx += 1;
                let target = self.blocks[&target_name];
                let data = self.func_mut().make_branch(target);
                self.func_mut().push_back(block, data)
            }
            "bcond" => {
                let _i1 = self.parse_type_token(&line.tokens, &mut idx)?;
                let cond = self.resolve_operand(&line.tokens, &mut idx, None)?;
                self.expect_comma(&line.tokens, &mut idx)?;
                let t_name = self.ident_at(&line.tokens, idx)?;
                idx += 1;
                self.expect_comma(&line.tokens, &mut idx)?;
                let f_name = self.ident_at(&line.tokens, idx)?;
                idx += 1;
                let t = self.blocks[&t_name];
                let fa = self.blocks[&f_name];
                let data = self.func_mut().make_cond_branch(cond, t, fa);
                self.func_mut().push_back(block, data)
            }
            "stackalloc" => {
                let element_ty = self.parse_type_token(&line.tokens, &mut idx)?;
                let mut size = 1usize;
                if matches!(line.tokens.get(idx), Some(Token::Punct(','))) {
                    idx += 1;
                    if let Some(Token::Number(n)) = line.tokens.get(idx) {
                        size = n.parse().unwrap_or(1);
                        idx += 1;
                    }
                }
                let data = self.func_mut().make_stack_alloc(element_ty, size);
                self.func_mut().push_back(block, data)
            }
            "ret" => {
                if matches!(line.tokens.get(idx), Some(Token::Ident(v)) if v == "void") {
                    let data = self.func_mut().make_ret(None);
                    self.func_mut().push_back(block, data)
                } else {
                    let ty = self.parse_type_token(&line.tokens, &mut idx)?;
                    let value = self.resolve_operand(&line.tokens, &mut idx, Some(ty))?;
                    let data = self.func_mut().make_ret(Some(value));
                    self.func_mut().push_back(block, data)
                }
            }
            "offset" => {
                let ty = self.parse_type_token(&line.tokens, &mut idx)?;
                let base = self.resolve_operand(&line.tokens, &mut idx, Some(ty))?;
                self.expect_comma(&line.tokens, &mut idx)?;
                let index = self.resolve_operand(&line.tokens, &mut idx, None)?;
                let data = self.func_mut().make_offset(base, index);
                self.func_mut().push_back(block, data)
            }
            "zext" | "sext" | "trunc" | "bitcast" => {
                let kind = cast_kind_from_mnemonic(&mnemonic);
                let src_ty = self.parse_type_token(&line.tokens, &mut idx)?;
                let value = self.resolve_operand(&line.tokens, &mut idx, Some(src_ty))?;
                if !matches!(line.tokens.get(idx), Some(Token::Ident(w)) if w == "to") {
                    return Err(IrError::Parse { line: line.line, col: 0, message: "expected 'to' in cast".into() });
                }
                idx += 1;
                let dst_ty = self.parse_type_token(&line.tokens, &mut idx)?;
                let data = self.func_mut().make_cast(kind, value, dst_ty);
                self.func_mut().push_back(block, data)
            }
            "select" => {
                let cond = self.resolve_operand(&line.tokens, &mut idx, None)?;
                self.expect_comma(&line.tokens, &mut idx)?;
                let t = self.resolve_operand(&line.tokens, &mut idx, None)?;
                self.expect_comma(&line.tokens, &mut idx)?;
                let fa = self.resolve_operand(&line.tokens, &mut idx, None)?;
                let data = self.func_mut().make_select(cond, t, fa);
                self.func_mut().push_back(block, data)
            }
            "phi" => {
                let ty = self.parse_type_token(&line.tokens, &mut idx)?;
                if !matches!(line.tokens.get(idx), Some(Token::Punct('['))) {
                    return Err(IrError::Parse { line: line.line, col: 0, message: "expected '[' in phi".into() });
                }
                idx += 1;
                let mut incoming = Vec::new();
                let mut pending_names = Vec::new();
                while !matches!(line.tokens.get(idx), Some(Token::Punct(']'))) {
                    let block_name = self.ident_at(&line.tokens, idx)?;
                    idx += 1;
                    if !matches!(line.tokens.get(idx), Some(Token::Punct(':'))) {
                        return Err(IrError::Parse { line: line.line, col: 0, message: "expected ':' in phi incoming".into() });
                    }
                    idx += 1;
                    let incoming_block = self.blocks[&block_name];
                    let value_name = self.ident_at(&line.tokens, idx);
                    let placeholder = self.context.borrow_mut().get_undef(ty);
                    match value_name {
                        Ok(name) if !self.values.contains_key(&name) && !matches!(name.as_str(), "true" | "false" | "null" | "undef") => {
                            idx += 1;
                            pending_names.push((incoming.len(), name));
                            incoming.push((incoming_block, ValueRef::Undef(placeholder)));
                        }
                        _ => {
                            let v = self.resolve_operand(&line.tokens, &mut idx, Some(ty))?;
                            incoming.push((incoming_block, v));
                        }
                    }
                    if matches!(line.tokens.get(idx), Some(Token::Punct(','))) {
                        idx += 1;
                    }
                }
                let data = self.func_mut().make_phi(ty, incoming);
                let id = self.func_mut().push_back(block, data);
                for (operand_pos, name) in pending_names {
                    self.deferred_phi_operands.push((id, operand_pos, name));
                }
                id
            }
            other => return Err(IrError::Parse { line: line.line, col: 0, message: format!("unknown mnemonic '{other}'") }),
        };

        if let Some(name) = &line.result {
            self.values.insert(name.clone(), ValueRef::Instr(id));
        }
        Ok(())
    }

    fn resolve_deferred_phis(&mut self) -> Result<()> {
        let pending = std::mem::take(&mut self.deferred_phi_operands);
        for (phi, operand_pos, name) in pending {
            let value = self.resolve_value(&name)?;
            let operand_index = operand_pos * 2 + 1;
            self.func_mut().set_operand(phi, operand_index, value);
        }
        Ok(())
    }

    fn parse_type_token(&mut self, tokens: &[Token], idx: &mut usize) -> Result<TypeId> {
        let Token::Ident(name) = &tokens[*idx] else {
            return Err(IrError::Parse { line: 0, col: 0, message: "expected type".into() });
        };
        let name = name.clone();
        *idx += 1;
        let mut ty = {
            let ctx = self.context.borrow();
            match name.as_str() {
                "void" => ctx.void_ty(),
                "i1" => ctx.i1_ty(),
                "i8" => ctx.i8_ty(),
                "i16" => ctx.i16_ty(),
                "i32" => ctx.i32_ty(),
                "i64" => ctx.i64_ty(),
                other => return Err(IrError::UnknownType(other.to_string())),
            }
        };
        let mut indirection = 0;
        while matches!(tokens.get(*idx), Some(Token::Punct('*'))) {
            *idx += 1;
            indirection += 1;
        }
        if indirection > 0 {
            ty = self.context.borrow_mut().pointer_type(ty, indirection);
        }
        Ok(ty)
    }

    fn expect_comma(&self, tokens: &[Token], idx: &mut usize) -> Result<()> {
        match tokens.get(*idx) {
            Some(Token::Punct(',')) => {
                *idx += 1;
                Ok(())
            }
            other => Err(IrError::Parse { line: 0, col: 0, message: format!("expected ',', found {other:?}") }),
        }
    }

    fn ident_at(&self, tokens: &[Token], idx: usize) -> Result<String> {
        match tokens.get(idx) {
            Some(Token::Ident(s)) => Ok(s.clone()),
            other => Err(IrError::Parse { line: 0, col: 0, message: format!("expected identifier, found {other:?}") }),
        }
    }
}

fn binary_op_from_mnemonic(m: &str) -> BinaryOp {
    match m {
        "add" => BinaryOp::Add,
        "sub" => BinaryOp::Sub,
        "mul" => BinaryOp::Mul,
        "udiv" => BinaryOp::DivU,
        "sdiv" => BinaryOp::DivS,
        "umod" => BinaryOp::ModU,
        "smod" => BinaryOp::ModS,
        "shr" => BinaryOp::Shr,
        "shl" => BinaryOp::Shl,
        "sar" => BinaryOp::Sar,
        "and" => BinaryOp::And,
        "or" => BinaryOp::Or,
        "xor" => BinaryOp::Xor,
        _ => unreachable!(),
    }
}

fn predicate_from_mnemonic(m: &str) -> Result<IntPredicate> {
    Ok(match m {
        "eq" => IntPredicate::Equal,
        "ne" => IntPredicate::NotEqual,
        "ugt" => IntPredicate::GtU,
        "ugte" => IntPredicate::GteU,
        "sgt" => IntPredicate::GtS,
        "sgte" => IntPredicate::GteS,
        "ult" => IntPredicate::LtU,
        "ulte" => IntPredicate::LteU,
        "slt" => IntPredicate::LtS,
        "slte" => IntPredicate::LteS,
        other => return Err(IrError::Parse { line: 0, col: 0, message: format!("unknown predicate '{other}'") }),
    })
}

fn cast_kind_from_mnemonic(m: &str) -> CastKind {
    match m {
        "zext" => CastKind::ZeroExtend,
        "sext" => CastKind::SignExtend,
        "trunc" => CastKind::Truncate,
        "bitcast" => CastKind::Bitcast,
        _ => unreachable!(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::printer::print_function;

    #[test]
    fn parses_diamond_function() {
        let src = r#"
            i32 f(i32 a, i32 b) {
            entry:
              v0 = add i32 a, b
              v1 = cmp slt i32 v0, 0
              bcond i1 v1, block_2, block_3
            block_2:
              ret i32 v0
            block_3:
              ret i32 0
            }
        "#;
        let ctx = Context::new();
        let module = parse_module(src, &ctx).expect("parses");
        assert_eq!(module.function_count(), 1);
        let id = module.find_function("f").unwrap();
        let printed = print_function(module.function(id));
        assert!(printed.contains("add i32"));
        assert!(printed.contains("bcond i1"));
    }

    #[test]
    fn parses_extern_and_call() {
        let src = r#"
            extern i32 helper(i32 a);
            i32 f(i32 a) {
            entry:
              v0 = call i32 helper(i32 a)
              ret i32 v0
            }
        "#;
        let ctx = Context::new();
        let module = parse_module(src, &ctx).expect("parses");
        assert_eq!(module.function_count(), 2);
    }

    #[test]
    fn parses_phi_with_forward_value() {
        let src = r#"
            i32 f(i32 a) {
            entry:
              branch loop
            loop:
              v0 = phi i32 [entry: 0, loop: v1]
              v1 = add i32 v0, a
              v2 = cmp slt i32 v1, 10
              bcond i1 v2, loop, exit
            exit:
              ret i32 v1
            }
        "#;
        let ctx = Context::new();
        let module = parse_module(src, &ctx).expect("parses");
        let id = module.find_function("f").unwrap();
        let printed = print_function(module.function(id));
        assert!(printed.contains("phi i32"));
    }
}
