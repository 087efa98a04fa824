//! Single-pass Pratt compiler: tokens go in, a compiled [`FunctionObj`] comes
//! out. There is no intermediate AST — each grammar production emits
//! bytecode directly as it recognizes it.

use crate::common::byte_block::ByteBlock;
use crate::common::opcode::Opcode;
use crate::common::value::{FunctionObj, Value};
use crate::lexer::{Lexer, Token, TokenKind};

/// Local variable slots are capped so a slot index always fits in the
/// 1-byte operand the VM's `GetLocal`/`SetLocal` expect.
const MAX_LOCALS: usize = 256;

/// Precedence levels, lowest to highest. `Precedence::next` is how binary
/// operator emission achieves left-associativity: the right operand of an
/// infix op is always parsed one level above the operator's own precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
    None,
    Assign,
    Or,
    And,
    Equality,
    Comparison,
    Term,
    Factor,
    Unary,
    Call,
    Atom,
}

impl Precedence {
    fn next(self) -> Precedence {
        use Precedence::*;
        match self {
            None => Assign,
            Assign => Or,
            Or => And,
            And => Equality,
            Equality => Comparison,
            Comparison => Term,
            Term => Factor,
            Factor => Unary,
            Unary => Call,
            Call => Atom,
            Atom => Atom,
        }
    }
}

type ParseFn<'src> = fn(&mut Compiler<'src>, bool);

/// A prefix/infix handler pair plus the precedence used to decide whether an
/// infix rule binds. Plain `fn` pointers, not boxed closures: the set of
/// parse actions is fixed at compile time, so a `match`-built table is
/// enough and keeps every call monomorphic.
#[derive(Clone, Copy)]
struct ParseRule<'src> {
    prefix: Option<ParseFn<'src>>,
    infix: Option<ParseFn<'src>>,
    precedence: Precedence,
}

fn get_rule<'src>(kind: &TokenKind) -> ParseRule<'src> {
    use TokenKind::*;
    let none = ParseRule {
        prefix: None,
        infix: None,
        precedence: Precedence::None,
    };
    match kind {
        LeftParen => ParseRule {
            prefix: Some(Compiler::grouping),
            ..none
        },
        Minus => ParseRule {
            prefix: Some(Compiler::unary),
            infix: Some(Compiler::binary),
            precedence: Precedence::Term,
        },
        Plus => ParseRule {
            infix: Some(Compiler::binary),
            precedence: Precedence::Term,
            ..none
        },
        Slash | Star => ParseRule {
            infix: Some(Compiler::binary),
            precedence: Precedence::Factor,
            ..none
        },
        Bang => ParseRule {
            prefix: Some(Compiler::unary),
            ..none
        },
        BangEqual | EqualEqual => ParseRule {
            infix: Some(Compiler::binary),
            precedence: Precedence::Equality,
            ..none
        },
        Less | LessEqual | Greater | GreaterEqual => ParseRule {
            infix: Some(Compiler::binary),
            precedence: Precedence::Comparison,
            ..none
        },
        Ident => ParseRule {
            prefix: Some(Compiler::variable),
            ..none
        },
        String => ParseRule {
            prefix: Some(Compiler::string),
            ..none
        },
        Number => ParseRule {
            prefix: Some(Compiler::number),
            ..none
        },
        Char => ParseRule {
            prefix: Some(Compiler::char_literal),
            ..none
        },
        True | False | Null => ParseRule {
            prefix: Some(Compiler::literal),
            ..none
        },
        And => ParseRule {
            infix: Some(Compiler::and_),
            precedence: Precedence::And,
            ..none
        },
        Or => ParseRule {
            infix: Some(Compiler::or_),
            precedence: Precedence::Or,
            ..none
        },
        _ => none,
    }
}

struct Local<'src> {
    name: &'src str,
    /// `-1` marks a local that has been declared but not yet initialized
    /// (its own initializer expression is still being compiled).
    depth: i32,
}

/// Owns the whole single-pass compile: parser state, the in-progress
/// function, and the scope/locals bookkeeping needed to resolve variables
/// without a second pass.
pub struct Compiler<'src> {
    lexer: Lexer<'src>,
    previous: Token<'src>,
    current: Token<'src>,
    had_error: bool,
    panic_mode: bool,
    locals: Vec<Local<'src>>,
    scope_depth: i32,
    function: FunctionObj,
    file: String,
    last_error: Option<String>,
}

impl<'src> Compiler<'src> {
    /// Compiles `source` (attributed to `file` in diagnostics) into a
    /// top-level script function, or returns the first rendered compile
    /// error encountered.
    pub fn compile(file: &str, source: &'src str) -> Result<FunctionObj, String> {
        log::debug!("compiling '{}' ({} bytes)", file, source.len());
        let source_lines = source.lines().map(|s| s.to_string()).collect();
        let dummy = Token {
            kind: TokenKind::Eof,
            lexeme: "",
            line: 0,
            col: 0,
        };
        let mut compiler = Compiler {
            lexer: Lexer::new(source),
            previous: dummy.clone(),
            current: dummy,
            had_error: false,
            panic_mode: false,
            // Slot 0 is a sentinel representing the enclosing function itself.
            locals: vec![Local { name: "", depth: 0 }],
            scope_depth: 0,
            function: FunctionObj::script(ByteBlock::new(source_lines)),
            file: file.to_string(),
            last_error: None,
        };

        compiler.advance();
        while !compiler.check(&TokenKind::Eof) {
            compiler.declaration();
        }
        compiler.consume(TokenKind::Eof, "expected end of expression");
        compiler.emit_op(Opcode::Return);

        if compiler.had_error {
            log::debug!("compile failed for '{}'", compiler.file);
            Err(compiler
                .last_error
                .unwrap_or_else(|| "unknown compile error".to_string()))
        } else {
            log::debug!("compile succeeded for '{}'", compiler.file);
            Ok(compiler.function)
        }
    }

    // ---- token stream -------------------------------------------------

    fn advance(&mut self) {
        self.previous = self.current.clone();
        loop {
            self.current = self.lexer.scan_token();
            if let TokenKind::Error(msg) = self.current.kind.clone() {
                self.error_at_current(&msg);
            } else {
                break;
            }
        }
    }

    fn check(&self, kind: &TokenKind) -> bool {
        &self.current.kind == kind
    }

    fn match_token(&mut self, kind: TokenKind) -> bool {
        if !self.check(&kind) {
            return false;
        }
        self.advance();
        true
    }

    fn consume(&mut self, kind: TokenKind, msg: &str) {
        if self.check(&kind) {
            self.advance();
        } else {
            self.error_at_current(msg);
        }
    }

    // ---- error handling -------------------------------------------------

    fn error_at_current(&mut self, msg: &str) {
        let token = self.current.clone();
        self.error_at(&token, msg);
    }

    fn error_at_previous(&mut self, msg: &str) {
        let token = self.previous.clone();
        self.error_at(&token, msg);
    }

    fn error_at(&mut self, token: &Token<'src>, msg: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;
        let where_ = match &token.kind {
            TokenKind::Eof => "at end".to_string(),
            TokenKind::Error(_) => String::new(),
            _ => format!("at '{}'", token.lexeme),
        };
        let rendered = format!(
            "{}:{}:{} Compiler Error {}: {}",
            self.file, token.col, token.line, where_, msg
        );
        log::debug!("{}", rendered);
        self.last_error = Some(rendered);
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Struct
                | TokenKind::Fun
                | TokenKind::Let
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => {}
            }
            self.advance();
        }
    }

    // ---- bytecode emission ---------------------------------------------

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        self.function.block.write_byte(byte, line);
    }

    fn emit_bytes(&mut self, a: u8, b: u8) {
        self.emit_byte(a);
        self.emit_byte(b);
    }

    fn emit_op(&mut self, op: Opcode) {
        self.emit_byte(op as u8);
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        match self.function.block.add_constant(value) {
            Ok(idx) => idx,
            Err(_) => {
                self.error_at_previous("too many constants in one block");
                0
            }
        }
    }

    fn emit_constant(&mut self, value: Value) {
        let idx = self.make_constant(value);
        self.emit_bytes(Opcode::PushConstant as u8, idx);
    }

    fn emit_jump(&mut self, op: Opcode) -> usize {
        self.emit_op(op);
        self.emit_byte(0xff);
        self.emit_byte(0xff);
        self.function.block.len() - 2
    }

    fn patch_jump(&mut self, offset: usize) {
        let jump = self.function.block.len() - offset - 2;
        if jump > u16::MAX as usize {
            self.error_at_previous("too much code to jump over");
            return;
        }
        let jump = jump as u16;
        self.function.block.bytes[offset] = (jump >> 8) as u8;
        self.function.block.bytes[offset + 1] = (jump & 0xff) as u8;
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(Opcode::Loop);
        let offset = self.function.block.len() - loop_start + 2;
        if offset > u16::MAX as usize {
            self.error_at_previous("loop body too large");
            return;
        }
        let offset = offset as u16;
        self.emit_byte((offset >> 8) as u8);
        self.emit_byte((offset & 0xff) as u8);
    }

    // ---- expressions ----------------------------------------------------

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assign);
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let prefix_rule = get_rule::<'src>(&self.previous.kind).prefix;
        let prefix_rule = match prefix_rule {
            Some(f) => f,
            None => {
                self.error_at_previous("expected expression");
                return;
            }
        };

        let can_assign = precedence <= Precedence::Assign;
        prefix_rule(self, can_assign);

        while precedence <= get_rule::<'src>(&self.current.kind).precedence {
            self.advance();
            let infix_rule = get_rule::<'src>(&self.previous.kind)
                .infix
                .expect("current token's precedence implies an infix rule");
            infix_rule(self, can_assign);
        }

        if can_assign && self.match_token(TokenKind::Equal) {
            self.error_at_previous("invalid assignment target");
        }
    }

    fn grouping(&mut self, _can_assign: bool) {
        self.expression();
        self.consume(TokenKind::RightParen, "expected ')' after expression");
    }

    fn unary(&mut self, _can_assign: bool) {
        let op_kind = self.previous.kind.clone();
        self.parse_precedence(Precedence::Unary);
        match op_kind {
            TokenKind::Minus => self.emit_op(Opcode::Negate),
            TokenKind::Bang => self.emit_op(Opcode::Not),
            _ => unreachable!("unary() invoked for a non-unary operator token"),
        }
    }

    fn binary(&mut self, _can_assign: bool) {
        let op_kind = self.previous.kind.clone();
        let rule = get_rule::<'src>(&op_kind);
        self.parse_precedence(rule.precedence.next());
        match op_kind {
            TokenKind::Plus => self.emit_op(Opcode::Add),
            TokenKind::Minus => self.emit_op(Opcode::Sub),
            TokenKind::Star => self.emit_op(Opcode::Mul),
            TokenKind::Slash => self.emit_op(Opcode::Div),
            TokenKind::EqualEqual => self.emit_op(Opcode::Equal),
            TokenKind::BangEqual => {
                self.emit_op(Opcode::Equal);
                self.emit_op(Opcode::Not);
            }
            TokenKind::Greater => self.emit_op(Opcode::Greater),
            TokenKind::GreaterEqual => {
                self.emit_op(Opcode::Less);
                self.emit_op(Opcode::Not);
            }
            TokenKind::Less => self.emit_op(Opcode::Less),
            TokenKind::LessEqual => {
                self.emit_op(Opcode::Greater);
                self.emit_op(Opcode::Not);
            }
            _ => unreachable!("binary() invoked for a non-binary operator token"),
        }
    }

    fn literal(&mut self, _can_assign: bool) {
        match self.previous.kind {
            TokenKind::True => self.emit_op(Opcode::True),
            TokenKind::False => self.emit_op(Opcode::False),
            TokenKind::Null => self.emit_op(Opcode::Null),
            _ => unreachable!("literal() invoked for a non-literal token"),
        }
    }

    fn number(&mut self, _can_assign: bool) {
        // `_` and `'` are accepted as literal separators by the lexer; the
        // compiler is responsible for stripping them before parsing.
        let text: String = self
            .previous
            .lexeme
            .chars()
            .filter(|c| *c != '_' && *c != '\'')
            .collect();
        match text.parse::<f64>() {
            Ok(n) => self.emit_constant(Value::Number(n)),
            Err(_) => self.error_at_previous("invalid number literal"),
        }
    }

    fn string(&mut self, _can_assign: bool) {
        let lexeme = self.previous.lexeme;
        let content = &lexeme[1..lexeme.len() - 1];
        self.emit_constant(Value::string(content));
    }

    fn char_literal(&mut self, _can_assign: bool) {
        let lexeme = self.previous.lexeme;
        let content = &lexeme[1..lexeme.len() - 1];
        match content.chars().next() {
            Some(c) => self.emit_constant(Value::Char(c)),
            None => self.error_at_previous("empty character literal"),
        }
    }

    fn and_(&mut self, _can_assign: bool) {
        let end_jump = self.emit_jump(Opcode::Jz);
        self.emit_op(Opcode::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or_(&mut self, _can_assign: bool) {
        let else_jump = self.emit_jump(Opcode::Jz);
        let end_jump = self.emit_jump(Opcode::Jmp);
        self.patch_jump(else_jump);
        self.emit_op(Opcode::Pop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn variable(&mut self, can_assign: bool) {
        let name = self.previous.clone();
        self.named_variable(&name, can_assign);
    }

    // ---- variables -------------------------------------------------------

    fn identifier_constant(&mut self, name: &str) -> u8 {
        self.make_constant(Value::string(name))
    }

    fn parse_variable(&mut self, errmsg: &str) -> u8 {
        self.consume(TokenKind::Ident, errmsg);
        let name = self.previous.clone();
        self.declare_variable(&name);
        if self.scope_depth > 0 {
            return 0;
        }
        self.identifier_constant(name.lexeme)
    }

    fn declare_variable(&mut self, name: &Token<'src>) {
        if self.scope_depth == 0 {
            return;
        }
        for local in self.locals.iter().rev() {
            if local.depth != -1 && local.depth < self.scope_depth {
                break;
            }
            if local.name == name.lexeme {
                self.error_at_previous(&format!(
                    "variable '{}' has multiple definitions",
                    name.lexeme
                ));
                return;
            }
        }
        self.add_local(name.lexeme);
    }

    fn add_local(&mut self, name: &'src str) {
        if self.locals.len() >= MAX_LOCALS {
            self.error_at_previous("too many local variables in one block");
            return;
        }
        self.locals.push(Local { name, depth: -1 });
    }

    fn mark_initialized(&mut self) {
        if let Some(local) = self.locals.last_mut() {
            local.depth = self.scope_depth;
        }
    }

    fn define_variable(&mut self, global: u8) {
        if self.scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_bytes(Opcode::DefineGlobal as u8, global);
    }

    fn resolve_local(&mut self, name: &str) -> Option<i32> {
        for (i, local) in self.locals.iter().enumerate().rev() {
            if local.name == name {
                if local.depth == -1 {
                    self.error_at_previous(&format!(
                        "uninitialized local variable '{}' used",
                        name
                    ));
                }
                return Some(i as i32);
            }
        }
        None
    }

    fn named_variable(&mut self, name: &Token<'src>, can_assign: bool) {
        let (get_op, set_op, arg) = match self.resolve_local(name.lexeme) {
            Some(idx) => (Opcode::GetLocal, Opcode::SetLocal, idx as u8),
            None => {
                let idx = self.identifier_constant(name.lexeme);
                (Opcode::GetGlobal, Opcode::SetGlobal, idx)
            }
        };

        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_bytes(set_op as u8, arg);
        } else {
            self.emit_bytes(get_op as u8, arg);
        }
    }

    // ---- scopes -----------------------------------------------------------

    fn begin_scope(&mut self) {
        self.scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.scope_depth -= 1;
        while let Some(local) = self.locals.last() {
            if local.depth > self.scope_depth {
                self.emit_op(Opcode::Pop);
                self.locals.pop();
            } else {
                break;
            }
        }
    }

    // ---- declarations and statements --------------------------------------

    fn declaration(&mut self) {
        if self.match_token(TokenKind::Let) {
            self.let_declaration();
        } else {
            self.statement();
        }
        if self.panic_mode {
            self.synchronize();
        }
    }

    fn let_declaration(&mut self) {
        let global = self.parse_variable("expected variable name");
        if self.match_token(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit_op(Opcode::Null);
        }
        self.consume(
            TokenKind::Semicolon,
            "expected ';' after variable declaration",
        );
        self.define_variable(global);
    }

    fn statement(&mut self) {
        if self.match_token(TokenKind::Print) {
            self.print_statement();
        } else if self.match_token(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else if self.match_token(TokenKind::If) {
            self.if_statement();
        } else if self.match_token(TokenKind::While) {
            self.while_statement();
        } else if self.match_token(TokenKind::For) {
            self.for_statement();
        } else {
            self.expression_statement();
        }
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "expected ';' after value");
        self.emit_op(Opcode::Print);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "expected ';' after expression");
        self.emit_op(Opcode::Pop);
    }

    fn block(&mut self) {
        while !self.check(&TokenKind::RightBrace) && !self.check(&TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "expected '}' after block");
    }

    fn if_statement(&mut self) {
        self.expression();
        let then_jump = self.emit_jump(Opcode::Jz);
        self.emit_op(Opcode::Pop);
        self.statement();

        let else_jump = self.emit_jump(Opcode::Jmp);
        self.patch_jump(then_jump);
        self.emit_op(Opcode::Pop);

        if self.match_token(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.function.block.len();
        self.expression();

        let exit_jump = self.emit_jump(Opcode::Jz);
        self.emit_op(Opcode::Pop);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_op(Opcode::Pop);
    }

    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "expected '(' after 'for'");

        if self.match_token(TokenKind::Semicolon) {
            // no initializer clause
        } else if self.match_token(TokenKind::Let) {
            self.let_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.function.block.len();
        let mut exit_jump: Option<usize> = None;
        if !self.match_token(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "expected ';' after loop condition");
            exit_jump = Some(self.emit_jump(Opcode::Jz));
            self.emit_op(Opcode::Pop);
        }

        if !self.match_token(TokenKind::RightParen) {
            let body_jump = self.emit_jump(Opcode::Jmp);
            let increment_start = self.function.block.len();
            self.expression();
            self.emit_op(Opcode::Pop);
            self.consume(TokenKind::RightParen, "expected ')' after for clauses");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
            self.emit_op(Opcode::Pop);
        }

        self.end_scope();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::opcode::Opcode;

    fn compile_ok(src: &str) -> FunctionObj {
        Compiler::compile("test", src).expect("expected successful compile")
    }

    #[test]
    fn precedence_mul_binds_tighter_than_add() {
        let f = compile_ok("print 1 + 2 * 3;");
        // PushConstant(1) PushConstant(2) PushConstant(3) Mul Add Print Return
        assert_eq!(
            f.block.bytes,
            vec![
                Opcode::PushConstant as u8,
                0,
                Opcode::PushConstant as u8,
                1,
                Opcode::PushConstant as u8,
                2,
                Opcode::Mul as u8,
                Opcode::Add as u8,
                Opcode::Print as u8,
                Opcode::Return as u8,
            ]
        );
    }

    #[test]
    fn duplicate_local_in_same_scope_is_a_compile_error() {
        let result = Compiler::compile("test", "{ let x = 1; let x = 2; }");
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("multiple definitions"));
    }

    #[test]
    fn uninitialized_local_self_reference_is_a_compile_error() {
        let result = Compiler::compile("test", "{ let x = x; }");
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("uninitialized local"));
    }

    #[test]
    fn bang_equal_synthesizes_equal_then_not() {
        let f = compile_ok("print 1 != 2;");
        assert!(f
            .block
            .bytes
            .windows(2)
            .any(|w| w == [Opcode::Equal as u8, Opcode::Not as u8]));
    }

    #[test]
    fn global_roundtrips_through_define_and_get() {
        let f = compile_ok("let x = 1; print x;");
        assert!(f.block.bytes.contains(&(Opcode::DefineGlobal as u8)));
        assert!(f.block.bytes.contains(&(Opcode::GetGlobal as u8)));
    }

    #[test]
    fn invalid_assignment_target_is_rejected() {
        let result = Compiler::compile("test", "1 = 2;");
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("invalid assignment target"));
    }
}
