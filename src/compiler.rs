//! Single-pass Pratt-parser compiler: source text straight to bytecode, no
//! intermediate AST. Structure kept from the teacher's `compiler.rs` — a
//! `Parser` driving a stack of `Compiler`s (one per function body, standing
//! in for C's linked `enclosing` pointers), a `const` `RULES` table indexed
//! by token-kind discriminant, and `Precedence`-climbing `parse_precedence`.
//! Expanded with class compilation (`this`/`super`, method tables,
//! `OP_INHERIT`), list/map literals and indexing, and `INVOKE`/`SUPER_INVOKE`
//! fusion at call sites.

use crate::chunk::{Chunk, OpCode};
use crate::config;
use crate::error::CompileError;
use crate::objects::object::Object;
use crate::objects::object_function::ObjectFunction;
use crate::scanner::{Scanner, Token, TokenType};
use crate::value::Value;
use crate::vm::Vm;

pub struct Parser<'a> {
    current: Token<'a>,
    previous: Token<'a>,
    scanner: Scanner<'a>,
    has_error: bool,
    panic_mode: bool,
    compilers: Vec<Compiler<'a>>,
    class_compilers: Vec<ClassCompilerInfo>,
    /// Allocations made while compiling (interned strings, adopted nested
    /// functions) go through the VM so they share its GC threshold and
    /// byte accounting instead of bypassing it.
    vm: &'a mut Vm,
    /// Upvalues of the function `end_compiler` just popped, handed off so
    /// the enclosing call site can emit them right after `OP_CLOSURE`.
    pending_upvalues: Vec<Upvalue>,
}

struct Local<'a> {
    name: Token<'a>,
    depth: i32,
    is_captured: bool,
}

#[derive(Clone, Copy)]
struct Upvalue {
    index: usize,
    is_local: bool,
}

#[derive(PartialEq, Eq, Clone, Copy)]
enum FunctionType {
    Function,
    Script,
    Method,
    Initializer,
}

struct Compiler<'a> {
    function: Box<ObjectFunction>,
    function_type: FunctionType,
    locals: Vec<Local<'a>>,
    upvalues: Vec<Upvalue>,
    scope_depth: i32,
}

impl<'a> Compiler<'a> {
    fn new(function_type: FunctionType) -> Self {
        let slot_zero_name = if matches!(function_type, FunctionType::Method | FunctionType::Initializer) {
            "this"
        } else {
            ""
        };
        Compiler {
            function: Box::new(ObjectFunction::new(0, String::new())),
            function_type,
            locals: vec![Local {
                name: Token { token_type: TokenType::Identifier, value: slot_zero_name, line: 0 },
                depth: 0,
                is_captured: false,
            }],
            upvalues: vec![],
            scope_depth: 0,
        }
    }
}

/// Threads nested class bodies so `this`/`super` resolve against the
/// innermost enclosing class, and `super` is rejected outside any class or
/// in a class with no superclass. No data beyond that is needed because
/// method lookup itself has no compile-time representation — it's all
/// `OP_METHOD`/`OP_INHERIT` at runtime.
struct ClassCompilerInfo {
    has_superclass: bool,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
enum Precedence {
    None,
    Assignment, // =
    Or,
    And,
    Equality,   // == !=
    Comparison, // < > <= >=
    Term,       // + -
    Factor,     // * /
    Unary,      // ! -
    Call,       // . () [] invoke
    Primary,
}

impl From<u8> for Precedence {
    fn from(value: u8) -> Self {
        match value {
            0 => Precedence::None,
            1 => Precedence::Assignment,
            2 => Precedence::Or,
            3 => Precedence::And,
            4 => Precedence::Equality,
            5 => Precedence::Comparison,
            6 => Precedence::Term,
            7 => Precedence::Factor,
            8 => Precedence::Unary,
            9 => Precedence::Call,
            10 => Precedence::Primary,
            _ => unreachable!("invalid precedence value: {value}"),
        }
    }
}

type ParseFn = fn(&mut Parser<'_>, can_assign: bool);

#[derive(Clone, Copy)]
struct ParseRule {
    prefix: Option<ParseFn>,
    infix: Option<ParseFn>,
    precedence: Precedence,
}

impl ParseRule {
    const fn new(prefix: Option<ParseFn>, infix: Option<ParseFn>, precedence: Precedence) -> Self {
        ParseRule { prefix, infix, precedence }
    }
}

const RULE_COUNT: usize = TokenType::Eof as usize + 1;

const RULES: [ParseRule; RULE_COUNT] = {
    let mut rules = [ParseRule::new(None, None, Precedence::None); RULE_COUNT];

    rules[TokenType::LeftParen as usize] =
        ParseRule::new(Some(|p, _| p.grouping()), Some(|p, ca| p.call(ca)), Precedence::Call);
    rules[TokenType::LeftBracket as usize] = ParseRule::new(
        Some(|p, ca| p.list_literal(ca)),
        Some(|p, ca| p.index(ca)),
        Precedence::Call,
    );
    rules[TokenType::LeftBrace as usize] =
        ParseRule::new(Some(|p, ca| p.map_literal(ca)), None, Precedence::None);
    rules[TokenType::Dot as usize] = ParseRule::new(None, Some(|p, ca| p.dot(ca)), Precedence::Call);
    rules[TokenType::Minus as usize] =
        ParseRule::new(Some(|p, _| p.unary()), Some(|p, _| p.binary()), Precedence::Term);
    rules[TokenType::Plus as usize] = ParseRule::new(None, Some(|p, _| p.binary()), Precedence::Term);
    rules[TokenType::Slash as usize] = ParseRule::new(None, Some(|p, _| p.binary()), Precedence::Factor);
    rules[TokenType::Star as usize] = ParseRule::new(None, Some(|p, _| p.binary()), Precedence::Factor);
    rules[TokenType::Number as usize] = ParseRule::new(Some(|p, _| p.number()), None, Precedence::None);
    rules[TokenType::String as usize] = ParseRule::new(Some(|p, _| p.string()), None, Precedence::None);
    rules[TokenType::False as usize] = ParseRule::new(Some(|p, _| p.literal()), None, Precedence::None);
    rules[TokenType::True as usize] = ParseRule::new(Some(|p, _| p.literal()), None, Precedence::None);
    rules[TokenType::Nil as usize] = ParseRule::new(Some(|p, _| p.literal()), None, Precedence::None);
    rules[TokenType::Bang as usize] = ParseRule::new(Some(|p, _| p.unary()), None, Precedence::None);
    rules[TokenType::BangEqual as usize] =
        ParseRule::new(None, Some(|p, _| p.binary()), Precedence::Equality);
    rules[TokenType::EqualEqual as usize] =
        ParseRule::new(None, Some(|p, _| p.binary()), Precedence::Equality);
    rules[TokenType::Greater as usize] =
        ParseRule::new(None, Some(|p, _| p.binary()), Precedence::Comparison);
    rules[TokenType::GreaterEqual as usize] =
        ParseRule::new(None, Some(|p, _| p.binary()), Precedence::Comparison);
    rules[TokenType::Less as usize] = ParseRule::new(None, Some(|p, _| p.binary()), Precedence::Comparison);
    rules[TokenType::LessEqual as usize] =
        ParseRule::new(None, Some(|p, _| p.binary()), Precedence::Comparison);
    rules[TokenType::Identifier as usize] =
        ParseRule::new(Some(|p, ca| p.variable(ca)), None, Precedence::None);
    rules[TokenType::This as usize] = ParseRule::new(Some(|p, _| p.this_expr()), None, Precedence::None);
    rules[TokenType::Super as usize] = ParseRule::new(Some(|p, ca| p.super_(ca)), None, Precedence::None);
    rules[TokenType::And as usize] = ParseRule::new(None, Some(|p, _| p.and()), Precedence::And);
    rules[TokenType::Or as usize] = ParseRule::new(None, Some(|p, _| p.or()), Precedence::Or);

    rules
};

impl<'a> Parser<'a> {
    pub fn new(vm: &'a mut Vm, source: &'a str) -> Self {
        let eof = Token { token_type: TokenType::Eof, value: "", line: 0 };
        let mut parser = Parser {
            current: eof.clone(),
            previous: eof,
            scanner: Scanner::new(source),
            has_error: false,
            panic_mode: false,
            compilers: vec![],
            class_compilers: vec![],
            vm,
            pending_upvalues: vec![],
        };
        parser.compilers.push(Compiler::new(FunctionType::Script));
        parser
    }

    /// Every function currently being compiled, innermost last, as raw
    /// pointers suitable for `GarbageCollector::mark_roots`. None of these
    /// are registered with the VM's allocation list yet (they're plain
    /// `Box<ObjectFunction>` owned by `Compiler`), but `mark_object`
    /// queues unregistered pointers for tracing anyway, so passing them
    /// here is enough to keep every constant a still-building function
    /// already holds (nested functions, interned strings) alive across a
    /// GC cycle triggered mid-compile.
    fn live_compiler_roots(&self) -> Vec<*mut ObjectFunction> {
        self.compilers
            .iter()
            .map(|compiler| &*compiler.function as *const ObjectFunction as *mut ObjectFunction)
            .collect()
    }

    /// Drives the whole compilation. Returns `None` if any error was
    /// reported (the teacher's panic-mode recovery keeps parsing to surface
    /// as many errors as possible in one pass rather than bailing early).
    pub fn compile(mut self) -> Option<Box<ObjectFunction>> {
        self.advance();
        while !self.match_token(TokenType::Eof) {
            self.declaration();
        }
        self.consume(TokenType::Eof, "end of expression");
        let function = self.end_compiler();
        if self.has_error {
            None
        } else {
            Some(function)
        }
    }

    fn current_compiler(&self) -> &Compiler<'a> {
        self.compilers.last().expect("no active compiler")
    }

    fn current_compiler_mut(&mut self) -> &mut Compiler<'a> {
        self.compilers.last_mut().expect("no active compiler")
    }

    fn current_function_mut(&mut self) -> &mut ObjectFunction {
        &mut self.current_compiler_mut().function
    }

    fn current_chunk(&self) -> &Chunk {
        &self.current_compiler().function.chunk
    }

    fn current_chunk_mut(&mut self) -> &mut Chunk {
        &mut self.current_compiler_mut().function.chunk
    }

    fn advance(&mut self) {
        self.previous = self.current.clone();
        loop {
            self.current = self.scanner.scan_token();
            if self.current.token_type != TokenType::Error {
                break;
            }
            let text = self.current.value.to_string();
            self.error_at_current(CompileError::Lexical(text));
        }
    }

    fn match_token(&mut self, token_type: TokenType) -> bool {
        if !self.check(token_type) {
            return false;
        }
        self.advance();
        true
    }

    fn check(&self, token_type: TokenType) -> bool {
        self.current.token_type == token_type
    }

    fn consume(&mut self, token_type: TokenType, expected: &'static str) {
        if self.current.token_type == token_type {
            self.advance();
            return;
        }
        self.error_at_current(CompileError::UnexpectedToken { expected, found: self.found_text() });
    }

    fn found_text(&self) -> String {
        match self.current.token_type {
            TokenType::Eof => "end of input".to_string(),
            _ => self.current.value.to_string(),
        }
    }

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line as u32;
        self.current_chunk_mut().write(byte, line);
    }

    fn emit_op(&mut self, op: OpCode) {
        self.emit_byte(op.to_byte());
    }

    fn emit_bytes(&mut self, byte1: u8, byte2: u8) {
        self.emit_byte(byte1);
        self.emit_byte(byte2);
    }

    fn emit_op_byte(&mut self, op: OpCode, byte: u8) {
        self.emit_bytes(op.to_byte(), byte);
    }

    fn emit_constant(&mut self, value: Value) {
        let index = self.make_constant(value);
        self.emit_op_byte(OpCode::Constant, index);
    }

    fn emit_return(&mut self) {
        if self.current_compiler().function_type == FunctionType::Initializer {
            // `init` always returns the instance, in slot 0.
            self.emit_op_byte(OpCode::GetLocal, 0);
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.emit_op(OpCode::Return);
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        let index = self.current_chunk_mut().add_constant(value);
        if index > u8::MAX as usize {
            self.error(CompileError::TooManyConstants);
            return 0;
        }
        index as u8
    }

    fn identifier_constant(&mut self, name: &str) -> u8 {
        let roots = self.live_compiler_roots();
        let ptr = self.vm.compiler_alloc_string(name, &roots);
        self.make_constant(Value::Obj(ptr as *mut Object))
    }

    fn number(&mut self) {
        let value = self.previous.value.parse::<f64>().unwrap_or(0.0);
        self.emit_constant(Value::Number(value));
    }

    fn string(&mut self) {
        let content = &self.previous.value[1..self.previous.value.len() - 1];
        let roots = self.live_compiler_roots();
        let ptr = self.vm.compiler_alloc_string(content, &roots);
        self.emit_constant(Value::Obj(ptr as *mut Object));
    }

    fn declaration(&mut self) {
        if self.match_token(TokenType::Class) {
            self.class_declaration();
        } else if self.match_token(TokenType::Fun) {
            self.function_declaration();
        } else if self.match_token(TokenType::Var) {
            self.variable_declaration();
        } else {
            self.statement();
        }

        if self.panic_mode {
            self.synchronize();
        }
    }

    fn class_declaration(&mut self) {
        self.consume(TokenType::Identifier, "class name");
        let class_name = self.previous.clone();
        let name_constant = self.identifier_constant(class_name.value);
        self.declare_variable();

        self.emit_op_byte(OpCode::Class, name_constant);
        self.define_variable(name_constant);

        self.class_compilers.push(ClassCompilerInfo { has_superclass: false });

        if self.match_token(TokenType::Less) {
            self.consume(TokenType::Identifier, "superclass name");
            self.variable(false);
            if Self::identifier_equal(&class_name, &self.previous) {
                self.error(CompileError::SelfInheritance);
            }

            self.begin_scope();
            self.add_local(Self::synthetic_token("super"));
            self.define_variable(0);

            self.named_variable(class_name.clone(), false);
            self.emit_op(OpCode::Inherit);
            self.class_compilers.last_mut().unwrap().has_superclass = true;
        }

        self.named_variable(class_name, false);
        self.consume(TokenType::LeftBrace, "'{' before class body");
        while !self.check(TokenType::RightBrace) && !self.check(TokenType::Eof) {
            self.method();
        }
        self.consume(TokenType::RightBrace, "'}' after class body");
        self.emit_op(OpCode::Pop);

        if self.class_compilers.last().unwrap().has_superclass {
            self.end_scope();
        }
        self.class_compilers.pop();
    }

    fn method(&mut self) {
        self.consume(TokenType::Identifier, "method name");
        let name = self.previous.value.to_string();
        let constant = self.identifier_constant(&name);

        let function_type = if name == "init" { FunctionType::Initializer } else { FunctionType::Method };
        self.function(function_type);
        self.emit_op_byte(OpCode::Method, constant);
    }

    fn this_expr(&mut self) {
        if self.class_compilers.is_empty() {
            self.error(CompileError::ThisOutsideClass);
            return;
        }
        self.variable(false);
    }

    fn super_(&mut self, _can_assign: bool) {
        match self.class_compilers.last() {
            None => {
                self.error(CompileError::SuperOutsideClass);
                return;
            }
            Some(info) if !info.has_superclass => {
                self.error(CompileError::SuperWithoutSuperclass);
                return;
            }
            _ => {}
        }

        self.consume(TokenType::Dot, "'.' after 'super'");
        self.consume(TokenType::Identifier, "superclass method name");
        let method_name = self.previous.value.to_string();
        let name_constant = self.identifier_constant(&method_name);

        self.named_variable(Self::synthetic_token("this"), false);
        if self.match_token(TokenType::LeftParen) {
            let argument_count = self.argument_list();
            self.named_variable(Self::synthetic_token("super"), false);
            self.emit_op_byte(OpCode::SuperInvoke, name_constant);
            self.emit_byte(argument_count);
        } else {
            self.named_variable(Self::synthetic_token("super"), false);
            self.emit_op_byte(OpCode::GetSuper, name_constant);
        }
    }

    fn synthetic_token(text: &'static str) -> Token<'static> {
        Token { token_type: TokenType::Identifier, value: text, line: 0 }
    }

    fn variable_declaration(&mut self) {
        let global = self.parse_variable("variable name");

        if self.match_token(TokenType::Equal) {
            self.expression();
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.consume(TokenType::Semicolon, "';' after variable declaration");
        self.define_variable(global);
    }

    fn parse_variable(&mut self, expected: &'static str) -> u8 {
        self.consume(TokenType::Identifier, expected);
        self.declare_variable();
        if self.current_compiler().scope_depth > 0 {
            return 0;
        }
        let name = self.previous.value.to_string();
        self.identifier_constant(&name)
    }

    fn declare_variable(&mut self) {
        if self.current_compiler().scope_depth == 0 {
            return;
        }

        let variable_name = self.previous.clone();
        let scope_depth = self.current_compiler().scope_depth;
        let mut duplicate = false;
        for local in self.current_compiler().locals.iter().rev() {
            if local.depth != -1 && local.depth < scope_depth {
                break;
            }
            if Self::identifier_equal(&variable_name, &local.name) {
                duplicate = true;
                break;
            }
        }
        if duplicate {
            self.error(CompileError::DuplicateLocalInScope(variable_name.value.to_string()));
        }
        self.add_local(variable_name);
    }

    fn add_local(&mut self, name: Token<'a>) {
        if self.current_compiler().locals.len() >= config::LOCALS_MAX {
            self.error(CompileError::TooManyLocals);
            return;
        }
        self.current_compiler_mut().locals.push(Local { name, depth: -1, is_captured: false });
    }

    fn function_declaration(&mut self) {
        let global = self.parse_variable("function name");
        self.mark_initialized();
        self.function(FunctionType::Function);
        self.define_variable(global);
    }

    fn function(&mut self, function_type: FunctionType) {
        if function_type != FunctionType::Script {
            let name = self.previous.value.to_string();
            self.compilers.push(Compiler::new(function_type));
            self.current_function_mut().name = name;
        } else {
            self.compilers.push(Compiler::new(function_type));
        }

        self.begin_scope();
        self.consume(TokenType::LeftParen, "'(' after function name");
        if !self.check(TokenType::RightParen) {
            loop {
                let arity = self.current_function_mut().arity;
                if arity as usize >= config::PARAMS_MAX {
                    self.error(CompileError::TooManyParameters);
                } else {
                    self.current_function_mut().arity += 1;
                }
                let constant = self.parse_variable("parameter name");
                self.define_variable(constant);

                if !self.match_token(TokenType::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenType::RightParen, "')' after parameters");
        self.consume(TokenType::LeftBrace, "'{' before function body");
        self.block();

        let function = self.end_compiler();
        let upvalues = self.pending_upvalues.clone();
        // `function` just came off `self.compilers`, so it isn't covered by
        // `live_compiler_roots` anymore; add it explicitly so anything it
        // already references (nested functions, interned strings) stays
        // reachable for the one allocation (`adopt_function` itself) that
        // happens before it's re-rooted as a constant in the enclosing chunk.
        let mut roots = self.live_compiler_roots();
        roots.push(&*function as *const ObjectFunction as *mut ObjectFunction);
        let function_ptr = self.vm.compiler_adopt_function(function, &roots);
        let constant = self.make_constant(Value::Obj(function_ptr as *mut Object));
        self.emit_op_byte(OpCode::Closure, constant);
        for upvalue in &upvalues {
            self.emit_byte(if upvalue.is_local { 1 } else { 0 });
            self.emit_byte(upvalue.index as u8);
        }
    }

    fn end_compiler(&mut self) -> Box<ObjectFunction> {
        self.emit_return();
        let compiler = self.compilers.pop().expect("no active compiler");
        self.pending_upvalues = compiler.upvalues;

        #[cfg(feature = "debug_print_code")]
        if !self.has_error {
            let name = if compiler.function.name.is_empty() { "<script>" } else { &compiler.function.name };
            crate::debug::disassemble_chunk(&compiler.function.chunk, name);
        }

        compiler.function
    }

    fn argument_list(&mut self) -> u8 {
        let mut count: u32 = 0;
        if !self.check(TokenType::RightParen) {
            loop {
                self.expression();
                if count >= config::PARAMS_MAX as u32 {
                    self.error(CompileError::TooManyArguments);
                }
                count += 1;
                if !self.match_token(TokenType::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenType::RightParen, "')' after arguments");
        count as u8
    }

    fn define_variable(&mut self, global: u8) {
        if self.current_compiler().scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_op_byte(OpCode::DefineGlobal, global);
    }

    fn mark_initialized(&mut self) {
        let scope_depth = self.current_compiler().scope_depth;
        if scope_depth == 0 {
            return;
        }
        self.current_compiler_mut().locals.last_mut().unwrap().depth = scope_depth;
    }

    fn variable(&mut self, can_assign: bool) {
        self.named_variable(self.previous.clone(), can_assign);
    }

    fn named_variable(&mut self, name: Token<'a>, can_assign: bool) {
        let compiler_index = self.compilers.len() - 1;
        let (mut get_op, mut set_op) = (OpCode::GetLocal, OpCode::SetLocal);
        let mut index = self.resolve_local(compiler_index, &name);
        if index < 0 {
            index = self.resolve_upvalue(compiler_index, &name);
            if index < 0 {
                index = self.identifier_constant(name.value) as i32;
                get_op = OpCode::GetGlobal;
                set_op = OpCode::SetGlobal;
            } else {
                get_op = OpCode::GetUpvalue;
                set_op = OpCode::SetUpvalue;
            }
        }

        if can_assign && self.match_token(TokenType::Equal) {
            self.expression();
            self.emit_op_byte(set_op, index as u8);
        } else {
            self.emit_op_byte(get_op, index as u8);
        }
    }

    fn resolve_local(&mut self, compiler_index: usize, name: &Token) -> i32 {
        let compiler = &self.compilers[compiler_index];
        for (index, local) in compiler.locals.iter().enumerate().rev() {
            if Self::identifier_equal(name, &local.name) {
                if local.depth == -1 {
                    self.error(CompileError::LocalReadInOwnInitializer(name.value.to_string()));
                }
                return index as i32;
            }
        }
        -1
    }

    fn identifier_equal(left: &Token, right: &Token) -> bool {
        left.value == right.value
    }

    fn resolve_upvalue(&mut self, compiler_index: usize, name: &Token) -> i32 {
        if compiler_index == 0 {
            return -1;
        }
        let local = self.resolve_local(compiler_index - 1, name);
        if local != -1 {
            self.compilers[compiler_index - 1].locals[local as usize].is_captured = true;
            return self.add_upvalue(compiler_index, local as usize, true) as i32;
        }
        let upvalue = self.resolve_upvalue(compiler_index - 1, name);
        if upvalue != -1 {
            return self.add_upvalue(compiler_index, upvalue as usize, false) as i32;
        }
        -1
    }

    fn add_upvalue(&mut self, compiler_index: usize, index: usize, is_local: bool) -> usize {
        let compiler = &mut self.compilers[compiler_index];
        for (i, upvalue) in compiler.upvalues.iter().enumerate() {
            if upvalue.is_local == is_local && upvalue.index == index {
                return i;
            }
        }
        if compiler.upvalues.len() >= config::UPVALUES_MAX {
            self.error(CompileError::TooManyUpvalues);
            return 0;
        }
        compiler.upvalues.push(Upvalue { index, is_local });
        compiler.function.upvalue_count = compiler.upvalues.len();
        compiler.upvalues.len() - 1
    }

    fn and(&mut self) {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or(&mut self) {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        let end_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(else_jump);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn statement(&mut self) {
        if self.match_token(TokenType::Print) {
            self.print_statement();
        } else if self.match_token(TokenType::If) {
            self.if_statement();
        } else if self.match_token(TokenType::Return) {
            self.return_statement();
        } else if self.match_token(TokenType::While) {
            self.while_statement();
        } else if self.match_token(TokenType::For) {
            self.for_statement();
        } else if self.match_token(TokenType::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenType::Semicolon, "';' after value");
        self.emit_op(OpCode::Print);
    }

    fn if_statement(&mut self) {
        self.consume(TokenType::LeftParen, "'(' after 'if'");
        self.expression();
        self.consume(TokenType::RightParen, "')' after condition");

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();

        let else_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(then_jump);
        self.emit_op(OpCode::Pop);

        if self.match_token(TokenType::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn return_statement(&mut self) {
        if self.current_compiler().function_type == FunctionType::Script {
            self.error(CompileError::ReturnFromTopLevel);
        }

        if self.match_token(TokenType::Semicolon) {
            self.emit_return();
        } else {
            if self.current_compiler().function_type == FunctionType::Initializer {
                self.error(CompileError::ReturnValueFromInitializer);
            }
            self.expression();
            self.consume(TokenType::Semicolon, "';' after return value");
            self.emit_op(OpCode::Return);
        }
    }

    fn while_statement(&mut self) {
        let loop_start = self.current_chunk().len();
        self.consume(TokenType::LeftParen, "'(' after 'while'");
        self.expression();
        self.consume(TokenType::RightParen, "')' after condition");

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_op(OpCode::Pop);
    }

    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenType::LeftParen, "'(' after 'for'");
        if self.match_token(TokenType::Semicolon) {
            // no initializer
        } else if self.match_token(TokenType::Var) {
            self.variable_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.current_chunk().len();
        let mut exit_jump: Option<usize> = None;
        if !self.match_token(TokenType::Semicolon) {
            self.expression();
            self.consume(TokenType::Semicolon, "';' after loop condition");
            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit_op(OpCode::Pop);
        }

        if !self.match_token(TokenType::RightParen) {
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.current_chunk().len();
            self.expression();
            self.emit_op(OpCode::Pop);
            self.consume(TokenType::RightParen, "')' after for clauses");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
            self.emit_op(OpCode::Pop);
        }
        self.end_scope();
    }

    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        self.emit_byte(0xff);
        self.emit_byte(0xff);
        self.current_chunk().len() - 2
    }

    fn patch_jump(&mut self, offset: usize) {
        let jump = self.current_chunk().len() - offset - 2;
        if jump > config::JUMP_MAX {
            self.error(CompileError::JumpTooLarge);
        }
        let chunk = self.current_chunk_mut();
        chunk.patch_byte(offset, ((jump >> 8) & 0xff) as u8);
        chunk.patch_byte(offset + 1, (jump & 0xff) as u8);
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(OpCode::Loop);
        let offset = self.current_chunk().len() - loop_start + 2;
        if offset > config::JUMP_MAX {
            self.error(CompileError::LoopBodyTooLarge);
        }
        self.emit_byte(((offset >> 8) & 0xff) as u8);
        self.emit_byte((offset & 0xff) as u8);
    }

    fn begin_scope(&mut self) {
        self.current_compiler_mut().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.current_compiler_mut().scope_depth -= 1;
        let scope_depth = self.current_compiler().scope_depth;
        while let Some(local) = self.current_compiler().locals.last() {
            if local.depth <= scope_depth {
                break;
            }
            if local.is_captured {
                self.emit_op(OpCode::CloseUpvalue);
            } else {
                self.emit_op(OpCode::Pop);
            }
            self.current_compiler_mut().locals.pop();
        }
    }

    fn block(&mut self) {
        while !self.check(TokenType::RightBrace) && !self.check(TokenType::Eof) {
            self.declaration();
        }
        self.consume(TokenType::RightBrace, "'}' after block");
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenType::Semicolon, "';' after expression");
        self.emit_op(OpCode::Pop);
    }

    fn grouping(&mut self) {
        self.expression();
        self.consume(TokenType::RightParen, "')' after expression");
    }

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn unary(&mut self) {
        let operator = self.previous.token_type;
        self.parse_precedence(Precedence::Unary);
        match operator {
            TokenType::Bang => self.emit_op(OpCode::Not),
            TokenType::Minus => self.emit_op(OpCode::Negate),
            _ => unreachable!("unexpected unary operator"),
        }
    }

    fn binary(&mut self) {
        let operator = self.previous.token_type;
        let rule = RULES[operator as usize];
        self.parse_precedence(Precedence::from(rule.precedence as u8 + 1));

        match operator {
            TokenType::BangEqual => {
                self.emit_op(OpCode::Equal);
                self.emit_op(OpCode::Not);
            }
            TokenType::EqualEqual => self.emit_op(OpCode::Equal),
            TokenType::Greater => self.emit_op(OpCode::Greater),
            TokenType::GreaterEqual => {
                self.emit_op(OpCode::Less);
                self.emit_op(OpCode::Not);
            }
            TokenType::Less => self.emit_op(OpCode::Less),
            TokenType::LessEqual => {
                self.emit_op(OpCode::Greater);
                self.emit_op(OpCode::Not);
            }
            TokenType::Plus => self.emit_op(OpCode::Add),
            TokenType::Minus => self.emit_op(OpCode::Subtract),
            TokenType::Star => self.emit_op(OpCode::Multiply),
            TokenType::Slash => self.emit_op(OpCode::Divide),
            _ => unreachable!("unexpected binary operator"),
        }
    }

    fn literal(&mut self) {
        match self.previous.token_type {
            TokenType::False => self.emit_op(OpCode::False),
            TokenType::True => self.emit_op(OpCode::True),
            TokenType::Nil => self.emit_op(OpCode::Nil),
            _ => unreachable!("unexpected literal"),
        }
    }

    fn call(&mut self, _can_assign: bool) {
        let argument_count = self.argument_list();
        self.emit_op_byte(OpCode::Call, argument_count);
    }

    fn dot(&mut self, can_assign: bool) {
        self.consume(TokenType::Identifier, "property name after '.'");
        let name = self.previous.value.to_string();
        let name_constant = self.identifier_constant(&name);

        if can_assign && self.match_token(TokenType::Equal) {
            self.expression();
            self.emit_op_byte(OpCode::SetProperty, name_constant);
        } else if self.match_token(TokenType::LeftParen) {
            let argument_count = self.argument_list();
            self.emit_op_byte(OpCode::Invoke, name_constant);
            self.emit_byte(argument_count);
        } else {
            self.emit_op_byte(OpCode::GetProperty, name_constant);
        }
    }

    fn index(&mut self, can_assign: bool) {
        self.expression();
        self.consume(TokenType::RightBracket, "']' after index");
        if can_assign && self.match_token(TokenType::Equal) {
            self.expression();
            self.emit_op(OpCode::SetIndex);
        } else {
            self.emit_op(OpCode::GetIndex);
        }
    }

    fn list_literal(&mut self, _can_assign: bool) {
        self.emit_op(OpCode::ListInit);
        if !self.check(TokenType::RightBracket) {
            loop {
                self.expression();
                self.emit_op(OpCode::ListData);
                if !self.match_token(TokenType::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenType::RightBracket, "']' after list literal");
    }

    fn map_literal(&mut self, _can_assign: bool) {
        self.emit_op(OpCode::MapInit);
        if !self.check(TokenType::RightBrace) {
            loop {
                self.expression();
                self.consume(TokenType::Colon, "':' after map key");
                self.expression();
                self.emit_op(OpCode::MapData);
                if !self.match_token(TokenType::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenType::RightBrace, "'}' after map literal");
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let can_assign = precedence <= Precedence::Assignment;

        match RULES[self.previous.token_type as usize].prefix {
            Some(prefix) => prefix(self, can_assign),
            None => {
                self.error(CompileError::Lexical("Expect expression.".to_string()));
                return;
            }
        }

        while precedence as u8 <= RULES[self.current.token_type as usize].precedence as u8 {
            self.advance();
            match RULES[self.previous.token_type as usize].infix {
                Some(infix) => infix(self, can_assign),
                None => unreachable!("token with a precedence but no infix rule"),
            }
        }

        if can_assign && self.match_token(TokenType::Equal) {
            self.error(CompileError::InvalidAssignmentTarget);
        }
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.token_type != TokenType::Eof {
            if self.previous.token_type == TokenType::Semicolon {
                return;
            }
            if matches!(
                self.current.token_type,
                TokenType::Class
                    | TokenType::Fun
                    | TokenType::Var
                    | TokenType::For
                    | TokenType::If
                    | TokenType::While
                    | TokenType::Print
                    | TokenType::Return
            ) {
                return;
            }
            self.advance();
        }
    }

    fn error(&mut self, err: CompileError) {
        let token = self.previous.clone();
        self.error_at(&token, err);
    }

    fn error_at_current(&mut self, err: CompileError) {
        let token = self.current.clone();
        self.error_at(&token, err);
    }

    fn error_at(&mut self, token: &Token, err: CompileError) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.has_error = true;

        let location = match token.token_type {
            TokenType::Eof => " at end".to_string(),
            TokenType::Error => String::new(),
            _ => format!(" at '{}'", token.value),
        };
        eprintln!("[line {}] Error{}: {}", token.line, location, err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(source: &str) -> Option<Box<ObjectFunction>> {
        let mut vm = Vm::new();
        let parser = Parser::new(&mut vm, source);
        parser.compile()
    }

    #[test]
    fn compiles_simple_expression_statement() {
        let function = compile("print 1 + 2;").expect("should compile");
        assert!(function.chunk.code.contains(&OpCode::Add.to_byte()));
        assert!(function.chunk.code.contains(&OpCode::Print.to_byte()));
    }

    #[test]
    fn reports_error_for_unterminated_assignment_target() {
        assert!(compile("1 + 2 = 3;").is_none());
    }

    #[test]
    fn compiles_class_with_method_and_inheritance() {
        let source = "class A { greet() { return \"hi\"; } }\nclass B < A {}\nvar b = B();\nprint b.greet();";
        let function = compile(source).expect("should compile");
        assert!(function.chunk.code.contains(&OpCode::Class.to_byte()));
        assert!(function.chunk.code.contains(&OpCode::Inherit.to_byte()));
    }

    #[test]
    fn compiles_list_and_map_literals() {
        let function = compile("var l = [1, 2, 3]; var m = {\"a\": 1};").expect("should compile");
        assert!(function.chunk.code.contains(&OpCode::ListInit.to_byte()));
        assert!(function.chunk.code.contains(&OpCode::MapInit.to_byte()));
    }

    #[test]
    fn resolves_closures_through_upvalues() {
        let source = "fun outer() { var x = 1; fun inner() { return x; } return inner; }";
        let function = compile(source).expect("should compile");
        assert!(function.chunk.code.contains(&OpCode::Closure.to_byte()));
    }
}
