//! Recursive-descent parser.
//!
//! Expressions use operator-precedence climbing; statements are parsed by
//! direct dispatch on the leading token. Automatic semicolon insertion
//! inserts a missing `;` at a line terminator, before `}`, and at end of
//! input, exactly when the next token cannot continue the production.

use std::rc::Rc;

use crate::ast::*;
use crate::error::{ParseError, ParseResult};
use crate::lexer::Lexer;
use crate::token::{Keyword, Punct, Token, TokenKind};

/// The parser.
pub struct Parser {
    lexer: Lexer,
    current: Token,
    peeked: Option<Token>,
    strict_stack: Vec<bool>,
    hint_stack: Vec<OptimizationHints>,
    /// Suppresses the `in` operator inside a `for` head.
    no_in: bool,
}

impl Parser {
    /// Create a parser over `source`.
    pub fn new(source: &str) -> ParseResult<Self> {
        let mut lexer = Lexer::new(source);
        let current = lexer.next_token()?;
        Ok(Self {
            lexer,
            current,
            peeked: None,
            strict_stack: vec![false],
            hint_stack: vec![OptimizationHints::default()],
            no_in: false,
        })
    }

    /// Parse a whole script.
    pub fn parse_script(mut self, strict_by_default: bool) -> ParseResult<Script> {
        *self.strict_stack.last_mut().unwrap() = strict_by_default;
        let (statements, strict) = self.parse_body(None)?;
        self.expect_end()?;
        Ok(Script {
            statements,
            strict,
            hints: self.hint_stack.pop().unwrap(),
        })
    }

    /// Parse source as a single expression statement (the `evaluate` entry).
    pub fn parse_expression_script(mut self, strict_by_default: bool) -> ParseResult<Script> {
        *self.strict_stack.last_mut().unwrap() = strict_by_default;
        let pos = self.position();
        let expression = self.parse_expression()?;
        self.expect_end()?;
        Ok(Script {
            statements: vec![Statement::Expression { expression, pos }],
            strict: strict_by_default,
            hints: self.hint_stack.pop().unwrap(),
        })
    }

    // ==================== Token plumbing ====================

    fn position(&self) -> SourcePosition {
        SourcePosition::new(self.current.line, self.current.column)
    }

    fn strict(&self) -> bool {
        *self.strict_stack.last().unwrap()
    }

    fn hints_mut(&mut self) -> &mut OptimizationHints {
        self.hint_stack.last_mut().unwrap()
    }

    fn advance(&mut self) -> ParseResult<Token> {
        let next = match self.peeked.take() {
            Some(tok) => tok,
            None => self.lexer.next_token()?,
        };
        Ok(std::mem::replace(&mut self.current, next))
    }

    fn peek_next(&mut self) -> ParseResult<&Token> {
        if self.peeked.is_none() {
            self.peeked = Some(self.lexer.next_token()?);
        }
        Ok(self.peeked.as_ref().unwrap())
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(message, self.current.line, self.current.column)
    }

    fn error_at(&self, message: impl Into<String>, pos: SourcePosition) -> ParseError {
        ParseError::new(message, pos.line, pos.column)
    }

    fn expect_punct(&mut self, p: Punct) -> ParseResult<()> {
        if self.current.is_punct(p) {
            self.advance()?;
            Ok(())
        } else {
            Err(self.error(format!("expected '{p:?}', found {}", self.current.kind)))
        }
    }

    fn eat_punct(&mut self, p: Punct) -> ParseResult<bool> {
        if self.current.is_punct(p) {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect_keyword(&mut self, k: Keyword) -> ParseResult<()> {
        if self.current.is_keyword(k) {
            self.advance()?;
            Ok(())
        } else {
            Err(self.error(format!("expected '{}', found {}", k.as_str(), self.current.kind)))
        }
    }

    fn expect_identifier(&mut self) -> ParseResult<String> {
        match &self.current.kind {
            TokenKind::Identifier(name) => {
                let name = name.clone();
                self.advance()?;
                Ok(name)
            }
            other => Err(self.error(format!("expected identifier, found {other}"))),
        }
    }

    fn expect_end(&mut self) -> ParseResult<()> {
        if self.current.kind == TokenKind::EndOfInput {
            Ok(())
        } else {
            Err(self.error(format!("unexpected {}", self.current.kind)))
        }
    }

    /// Consume a statement terminator, inserting one where ASI allows.
    fn expect_semicolon(&mut self) -> ParseResult<()> {
        if self.current.is_punct(Punct::Semicolon) {
            self.advance()?;
            return Ok(());
        }
        if self.current.newline_before
            || self.current.is_punct(Punct::RBrace)
            || self.current.kind == TokenKind::EndOfInput
        {
            return Ok(());
        }
        Err(self.error(format!("unexpected {}", self.current.kind)))
    }

    // ==================== Statements ====================

    /// Parse a statement list with a directive prologue. Returns the
    /// statements and whether strict mode is in force for them.
    fn parse_body(&mut self, terminator: Option<Punct>) -> ParseResult<(Vec<Statement>, bool)> {
        let mut statements = Vec::new();
        // Directive prologue: leading expression statements that are a
        // single string literal.
        loop {
            let at_end = match terminator {
                Some(p) => self.current.is_punct(p),
                None => self.current.kind == TokenKind::EndOfInput,
            };
            if at_end {
                break;
            }
            let TokenKind::Str {
                value,
                legacy_octal_escape,
            } = self.current.kind.clone()
            else {
                break;
            };
            // Only a directive when the string is the whole statement.
            let continues = {
                let next = self.peek_next()?;
                !(next.is_punct(Punct::Semicolon)
                    || next.is_punct(Punct::RBrace)
                    || next.kind == TokenKind::EndOfInput
                    || next.newline_before)
            };
            if continues {
                break;
            }
            let pos = self.position();
            if value == "use strict" {
                if legacy_octal_escape {
                    return Err(self.error("octal escape in strict-mode directive"));
                }
                *self.strict_stack.last_mut().unwrap() = true;
            }
            self.advance()?;
            self.expect_semicolon()?;
            statements.push(Statement::Expression {
                expression: Expression::Literal {
                    value: LiteralValue::Str(value),
                    pos,
                },
                pos,
            });
        }

        loop {
            let at_end = match terminator {
                Some(p) => self.current.is_punct(p),
                None => self.current.kind == TokenKind::EndOfInput,
            };
            if at_end {
                break;
            }
            statements.push(self.parse_statement()?);
        }
        Ok((statements, self.strict()))
    }

    fn parse_statement(&mut self) -> ParseResult<Statement> {
        let pos = self.position();
        match &self.current.kind {
            TokenKind::Punct(Punct::LBrace) => {
                self.advance()?;
                let mut statements = Vec::new();
                while !self.current.is_punct(Punct::RBrace) {
                    if self.current.kind == TokenKind::EndOfInput {
                        return Err(self.error("unexpected end of input, expected '}'"));
                    }
                    statements.push(self.parse_statement()?);
                }
                self.advance()?;
                Ok(Statement::Block { statements, pos })
            }
            TokenKind::Punct(Punct::Semicolon) => {
                self.advance()?;
                Ok(Statement::Empty { pos })
            }
            TokenKind::Keyword(Keyword::Var) => self.parse_declaration(DeclarationKind::Var),
            TokenKind::Keyword(Keyword::Let) => self.parse_declaration(DeclarationKind::Let),
            TokenKind::Keyword(Keyword::Const) => self.parse_declaration(DeclarationKind::Const),
            TokenKind::Keyword(Keyword::Function) => {
                let function = self.parse_function(true)?;
                Ok(Statement::FunctionDeclaration { function, pos })
            }
            TokenKind::Keyword(Keyword::If) => self.parse_if(),
            TokenKind::Keyword(Keyword::For) => self.parse_for(),
            TokenKind::Keyword(Keyword::While) => self.parse_while(),
            TokenKind::Keyword(Keyword::Do) => self.parse_do_while(),
            TokenKind::Keyword(Keyword::Switch) => self.parse_switch(),
            TokenKind::Keyword(Keyword::Throw) => {
                self.advance()?;
                if self.current.newline_before {
                    return Err(self.error("newline not allowed after 'throw'"));
                }
                let argument = self.parse_expression()?;
                self.expect_semicolon()?;
                Ok(Statement::Throw { argument, pos })
            }
            TokenKind::Keyword(Keyword::Try) => self.parse_try(),
            TokenKind::Keyword(Keyword::Break) => {
                self.advance()?;
                let label = self.parse_jump_label()?;
                self.expect_semicolon()?;
                Ok(Statement::Break { label, pos })
            }
            TokenKind::Keyword(Keyword::Continue) => {
                self.advance()?;
                let label = self.parse_jump_label()?;
                self.expect_semicolon()?;
                Ok(Statement::Continue { label, pos })
            }
            TokenKind::Keyword(Keyword::Return) => {
                self.advance()?;
                let argument = if self.current.newline_before
                    || self.current.is_punct(Punct::Semicolon)
                    || self.current.is_punct(Punct::RBrace)
                    || self.current.kind == TokenKind::EndOfInput
                {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.expect_semicolon()?;
                Ok(Statement::Return { argument, pos })
            }
            TokenKind::Keyword(Keyword::With) => Err(self.error("'with' is not supported")),
            TokenKind::Identifier(name) => {
                // A labelled statement needs two tokens of lookahead.
                let label = name.clone();
                if self.peek_next()?.is_punct(Punct::Colon) {
                    self.advance()?;
                    self.advance()?;
                    let body = Box::new(self.parse_statement()?);
                    return Ok(Statement::Labelled { label, body, pos });
                }
                self.parse_expression_statement()
            }
            _ => self.parse_expression_statement(),
        }
    }

    fn parse_jump_label(&mut self) -> ParseResult<Option<String>> {
        if self.current.newline_before {
            return Ok(None);
        }
        match &self.current.kind {
            TokenKind::Identifier(name) => {
                let name = name.clone();
                self.advance()?;
                Ok(Some(name))
            }
            _ => Ok(None),
        }
    }

    fn parse_expression_statement(&mut self) -> ParseResult<Statement> {
        let pos = self.position();
        let expression = self.parse_expression()?;
        self.expect_semicolon()?;
        Ok(Statement::Expression { expression, pos })
    }

    fn parse_declaration(&mut self, kind: DeclarationKind) -> ParseResult<Statement> {
        let pos = self.position();
        self.advance()?;
        let declarations = self.parse_declarators(kind)?;
        self.expect_semicolon()?;
        Ok(Statement::Declaration {
            kind,
            declarations,
            pos,
        })
    }

    fn parse_declarators(
        &mut self,
        kind: DeclarationKind,
    ) -> ParseResult<Vec<(String, Option<Expression>)>> {
        let mut declarations = Vec::new();
        loop {
            let pos = self.position();
            let name = self.expect_identifier()?;
            self.check_binding_name(&name, pos)?;
            let init = if self.eat_punct(Punct::Assign)? {
                Some(self.parse_assignment()?)
            } else {
                if kind == DeclarationKind::Const {
                    return Err(self.error_at("missing initializer in const declaration", pos));
                }
                None
            };
            declarations.push((name, init));
            if !self.eat_punct(Punct::Comma)? {
                break;
            }
        }
        Ok(declarations)
    }

    fn check_binding_name(&self, name: &str, pos: SourcePosition) -> ParseResult<()> {
        if self.strict() && (name == "eval" || name == "arguments") {
            return Err(self.error_at(
                format!("'{name}' cannot be bound in strict mode"),
                pos,
            ));
        }
        Ok(())
    }

    fn parse_if(&mut self) -> ParseResult<Statement> {
        let pos = self.position();
        self.advance()?;
        self.expect_punct(Punct::LParen)?;
        let test = self.parse_expression()?;
        self.expect_punct(Punct::RParen)?;
        let consequent = Box::new(self.parse_statement()?);
        let alternate = if self.current.is_keyword(Keyword::Else) {
            self.advance()?;
            Some(Box::new(self.parse_statement()?))
        } else {
            None
        };
        Ok(Statement::If {
            test,
            consequent,
            alternate,
            pos,
        })
    }

    fn parse_while(&mut self) -> ParseResult<Statement> {
        let pos = self.position();
        self.advance()?;
        self.expect_punct(Punct::LParen)?;
        let test = self.parse_expression()?;
        self.expect_punct(Punct::RParen)?;
        let body = Box::new(self.parse_statement()?);
        Ok(Statement::While { test, body, pos })
    }

    fn parse_do_while(&mut self) -> ParseResult<Statement> {
        let pos = self.position();
        self.advance()?;
        let body = Box::new(self.parse_statement()?);
        self.expect_keyword(Keyword::While)?;
        self.expect_punct(Punct::LParen)?;
        let test = self.parse_expression()?;
        self.expect_punct(Punct::RParen)?;
        // ASI always applies after do-while.
        self.eat_punct(Punct::Semicolon)?;
        Ok(Statement::DoWhile { body, test, pos })
    }

    fn parse_for(&mut self) -> ParseResult<Statement> {
        let pos = self.position();
        self.advance()?;
        self.expect_punct(Punct::LParen)?;

        // Empty initializer.
        if self.eat_punct(Punct::Semicolon)? {
            return self.parse_for_tail(None, pos);
        }

        // Declaration head.
        let decl_kind = match &self.current.kind {
            TokenKind::Keyword(Keyword::Var) => Some(DeclarationKind::Var),
            TokenKind::Keyword(Keyword::Let) => Some(DeclarationKind::Let),
            TokenKind::Keyword(Keyword::Const) => Some(DeclarationKind::Const),
            _ => None,
        };
        if let Some(kind) = decl_kind {
            let decl_pos = self.position();
            self.advance()?;
            self.no_in = true;
            let declarations = self.parse_declarators(kind)?;
            self.no_in = false;
            if self.current.is_keyword(Keyword::In) {
                if declarations.len() != 1 || declarations[0].1.is_some() {
                    return Err(self.error("invalid for-in declaration head"));
                }
                self.advance()?;
                let object = self.parse_expression()?;
                self.expect_punct(Punct::RParen)?;
                let body = Box::new(self.parse_statement()?);
                return Ok(Statement::ForIn {
                    target: ForInTarget::Declaration(kind, declarations[0].0.clone()),
                    object,
                    body,
                    pos,
                });
            }
            self.expect_punct(Punct::Semicolon)?;
            let init = Some(Box::new(Statement::Declaration {
                kind,
                declarations,
                pos: decl_pos,
            }));
            return self.parse_for_tail(init, pos);
        }

        // Expression head.
        let init_pos = self.position();
        self.no_in = true;
        let init_expr = self.parse_expression()?;
        self.no_in = false;
        if self.current.is_keyword(Keyword::In) {
            self.check_assignment_target(&init_expr)?;
            self.advance()?;
            let object = self.parse_expression()?;
            self.expect_punct(Punct::RParen)?;
            let body = Box::new(self.parse_statement()?);
            return Ok(Statement::ForIn {
                target: ForInTarget::Expression(Box::new(init_expr)),
                object,
                body,
                pos,
            });
        }
        self.expect_punct(Punct::Semicolon)?;
        let init = Some(Box::new(Statement::Expression {
            expression: init_expr,
            pos: init_pos,
        }));
        self.parse_for_tail(init, pos)
    }

    fn parse_for_tail(
        &mut self,
        init: Option<Box<Statement>>,
        pos: SourcePosition,
    ) -> ParseResult<Statement> {
        let test = if self.current.is_punct(Punct::Semicolon) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect_punct(Punct::Semicolon)?;
        let update = if self.current.is_punct(Punct::RParen) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect_punct(Punct::RParen)?;
        let body = Box::new(self.parse_statement()?);
        Ok(Statement::For {
            init,
            test,
            update,
            body,
            pos,
        })
    }

    fn parse_switch(&mut self) -> ParseResult<Statement> {
        let pos = self.position();
        self.advance()?;
        self.expect_punct(Punct::LParen)?;
        let discriminant = self.parse_expression()?;
        self.expect_punct(Punct::RParen)?;
        self.expect_punct(Punct::LBrace)?;
        let mut cases = Vec::new();
        let mut seen_default = false;
        while !self.eat_punct(Punct::RBrace)? {
            let test = if self.current.is_keyword(Keyword::Case) {
                self.advance()?;
                let test = self.parse_expression()?;
                Some(test)
            } else if self.current.is_keyword(Keyword::Default) {
                if seen_default {
                    return Err(self.error("more than one default clause"));
                }
                seen_default = true;
                self.advance()?;
                None
            } else {
                return Err(self.error(format!(
                    "expected 'case' or 'default', found {}",
                    self.current.kind
                )));
            };
            self.expect_punct(Punct::Colon)?;
            let mut body = Vec::new();
            while !self.current.is_keyword(Keyword::Case)
                && !self.current.is_keyword(Keyword::Default)
                && !self.current.is_punct(Punct::RBrace)
            {
                body.push(self.parse_statement()?);
            }
            cases.push(SwitchCase { test, body });
        }
        Ok(Statement::Switch {
            discriminant,
            cases,
            pos,
        })
    }

    fn parse_try(&mut self) -> ParseResult<Statement> {
        let pos = self.position();
        self.advance()?;
        self.expect_punct(Punct::LBrace)?;
        let mut block = Vec::new();
        while !self.eat_punct(Punct::RBrace)? {
            block.push(self.parse_statement()?);
        }
        let handler = if self.current.is_keyword(Keyword::Catch) {
            self.advance()?;
            self.expect_punct(Punct::LParen)?;
            let param_pos = self.position();
            let param = self.expect_identifier()?;
            self.check_binding_name(&param, param_pos)?;
            self.expect_punct(Punct::RParen)?;
            self.expect_punct(Punct::LBrace)?;
            let mut body = Vec::new();
            while !self.eat_punct(Punct::RBrace)? {
                body.push(self.parse_statement()?);
            }
            Some(CatchClause { param, body })
        } else {
            None
        };
        let finalizer = if self.current.is_keyword(Keyword::Finally) {
            self.advance()?;
            self.expect_punct(Punct::LBrace)?;
            let mut body = Vec::new();
            while !self.eat_punct(Punct::RBrace)? {
                body.push(self.parse_statement()?);
            }
            Some(body)
        } else {
            None
        };
        if handler.is_none() && finalizer.is_none() {
            return Err(self.error("missing catch or finally after try"));
        }
        Ok(Statement::Try {
            block,
            handler,
            finalizer,
            pos,
        })
    }

    // ==================== Functions ====================

    fn parse_function(&mut self, name_required: bool) -> ParseResult<Rc<FunctionNode>> {
        let pos = self.position();
        self.expect_keyword(Keyword::Function)?;
        let name = match &self.current.kind {
            TokenKind::Identifier(n) => {
                let n = n.clone();
                self.advance()?;
                Some(n)
            }
            _ if name_required => {
                return Err(self.error("function declaration requires a name"));
            }
            _ => None,
        };

        self.expect_punct(Punct::LParen)?;
        let mut params = Vec::new();
        if !self.current.is_punct(Punct::RParen) {
            loop {
                params.push(self.expect_identifier()?);
                if !self.eat_punct(Punct::Comma)? {
                    break;
                }
            }
        }
        self.expect_punct(Punct::RParen)?;

        self.hints_mut().has_nested_functions = true;
        self.strict_stack.push(self.strict());
        self.hint_stack.push(OptimizationHints::default());

        self.expect_punct(Punct::LBrace)?;
        let (body, strict) = self.parse_body(Some(Punct::RBrace))?;
        self.expect_punct(Punct::RBrace)?;

        let hints = self.hint_stack.pop().unwrap();
        self.strict_stack.pop();

        if strict {
            for (i, p) in params.iter().enumerate() {
                if p == "eval" || p == "arguments" {
                    return Err(self.error_at(
                        format!("'{p}' cannot be a parameter name in strict mode"),
                        pos,
                    ));
                }
                if params[..i].contains(p) {
                    return Err(self.error_at(
                        format!("duplicate parameter name '{p}' in strict mode"),
                        pos,
                    ));
                }
            }
            if let Some(n) = &name
                && (n == "eval" || n == "arguments")
            {
                return Err(self.error_at(
                    format!("'{n}' cannot be a function name in strict mode"),
                    pos,
                ));
            }
        }

        Ok(Rc::new(FunctionNode {
            name,
            params,
            body,
            strict,
            hints,
            pos,
        }))
    }

    // ==================== Expressions ====================

    /// Parse a full expression (including the comma operator).
    pub fn parse_expression(&mut self) -> ParseResult<Expression> {
        let pos = self.position();
        let first = self.parse_assignment()?;
        if !self.current.is_punct(Punct::Comma) {
            return Ok(first);
        }
        let mut expressions = vec![first];
        while self.eat_punct(Punct::Comma)? {
            expressions.push(self.parse_assignment()?);
        }
        Ok(Expression::Sequence { expressions, pos })
    }

    fn parse_assignment(&mut self) -> ParseResult<Expression> {
        let pos = self.position();
        let lhs = self.parse_conditional()?;

        let op = match &self.current.kind {
            TokenKind::Punct(Punct::Assign) => Some(AssignOp::Assign),
            TokenKind::Punct(Punct::PlusAssign) => Some(AssignOp::Compound(BinaryOp::Add)),
            TokenKind::Punct(Punct::MinusAssign) => Some(AssignOp::Compound(BinaryOp::Sub)),
            TokenKind::Punct(Punct::StarAssign) => Some(AssignOp::Compound(BinaryOp::Mul)),
            TokenKind::Punct(Punct::SlashAssign) => Some(AssignOp::Compound(BinaryOp::Div)),
            TokenKind::Punct(Punct::PercentAssign) => Some(AssignOp::Compound(BinaryOp::Mod)),
            TokenKind::Punct(Punct::AndAssign) => Some(AssignOp::Compound(BinaryOp::BitAnd)),
            TokenKind::Punct(Punct::OrAssign) => Some(AssignOp::Compound(BinaryOp::BitOr)),
            TokenKind::Punct(Punct::XorAssign) => Some(AssignOp::Compound(BinaryOp::BitXor)),
            TokenKind::Punct(Punct::ShlAssign) => Some(AssignOp::Compound(BinaryOp::Shl)),
            TokenKind::Punct(Punct::ShrAssign) => Some(AssignOp::Compound(BinaryOp::Shr)),
            TokenKind::Punct(Punct::UshrAssign) => Some(AssignOp::Compound(BinaryOp::Ushr)),
            _ => None,
        };
        let Some(op) = op else {
            return Ok(lhs);
        };

        self.check_assignment_target(&lhs)?;
        self.advance()?;
        let value = self.parse_assignment()?;
        Ok(Expression::Assignment {
            op,
            target: Box::new(lhs),
            value: Box::new(value),
            pos,
        })
    }

    fn check_assignment_target(&self, expr: &Expression) -> ParseResult<()> {
        match expr {
            Expression::Identifier { name, pos } => {
                if self.strict() && (name == "eval" || name == "arguments") {
                    return Err(self.error_at(
                        format!("assignment to '{name}' is not allowed in strict mode"),
                        *pos,
                    ));
                }
                Ok(())
            }
            Expression::Member { .. } | Expression::Index { .. } => Ok(()),
            other => Err(self.error_at("invalid assignment target", other.position())),
        }
    }

    fn parse_conditional(&mut self) -> ParseResult<Expression> {
        let pos = self.position();
        let test = self.parse_binary(0)?;
        if !self.eat_punct(Punct::Question)? {
            return Ok(test);
        }
        let saved_no_in = std::mem::replace(&mut self.no_in, false);
        let consequent = self.parse_assignment()?;
        self.no_in = saved_no_in;
        self.expect_punct(Punct::Colon)?;
        let alternate = self.parse_assignment()?;
        Ok(Expression::Conditional {
            test: Box::new(test),
            consequent: Box::new(consequent),
            alternate: Box::new(alternate),
            pos,
        })
    }

    /// Binary operator precedence; `None` for non-binary tokens.
    fn binary_op(&self) -> Option<(BinaryOpOrLogical, u8)> {
        use BinaryOpOrLogical::*;
        Some(match &self.current.kind {
            TokenKind::Punct(Punct::LogicalOr) => (Logical(LogicalOp::Or), 1),
            TokenKind::Punct(Punct::LogicalAnd) => (Logical(LogicalOp::And), 2),
            TokenKind::Punct(Punct::BitOr) => (Binary(BinaryOp::BitOr), 3),
            TokenKind::Punct(Punct::BitXor) => (Binary(BinaryOp::BitXor), 4),
            TokenKind::Punct(Punct::BitAnd) => (Binary(BinaryOp::BitAnd), 5),
            TokenKind::Punct(Punct::Equal) => (Binary(BinaryOp::Equal), 6),
            TokenKind::Punct(Punct::NotEqual) => (Binary(BinaryOp::NotEqual), 6),
            TokenKind::Punct(Punct::StrictEqual) => (Binary(BinaryOp::StrictEqual), 6),
            TokenKind::Punct(Punct::StrictNotEqual) => (Binary(BinaryOp::StrictNotEqual), 6),
            TokenKind::Punct(Punct::Less) => (Binary(BinaryOp::Less), 7),
            TokenKind::Punct(Punct::LessEqual) => (Binary(BinaryOp::LessEqual), 7),
            TokenKind::Punct(Punct::Greater) => (Binary(BinaryOp::Greater), 7),
            TokenKind::Punct(Punct::GreaterEqual) => (Binary(BinaryOp::GreaterEqual), 7),
            TokenKind::Keyword(Keyword::InstanceOf) => (Binary(BinaryOp::InstanceOf), 7),
            TokenKind::Keyword(Keyword::In) if !self.no_in => (Binary(BinaryOp::In), 7),
            TokenKind::Punct(Punct::Shl) => (Binary(BinaryOp::Shl), 8),
            TokenKind::Punct(Punct::Shr) => (Binary(BinaryOp::Shr), 8),
            TokenKind::Punct(Punct::Ushr) => (Binary(BinaryOp::Ushr), 8),
            TokenKind::Punct(Punct::Plus) => (Binary(BinaryOp::Add), 9),
            TokenKind::Punct(Punct::Minus) => (Binary(BinaryOp::Sub), 9),
            TokenKind::Punct(Punct::Star) => (Binary(BinaryOp::Mul), 10),
            TokenKind::Punct(Punct::Slash) => (Binary(BinaryOp::Div), 10),
            TokenKind::Punct(Punct::Percent) => (Binary(BinaryOp::Mod), 10),
            _ => return None,
        })
    }

    fn parse_binary(&mut self, min_prec: u8) -> ParseResult<Expression> {
        let mut lhs = self.parse_unary()?;
        while let Some((op, prec)) = self.binary_op() {
            if prec < min_prec {
                break;
            }
            let pos = self.position();
            self.advance()?;
            let rhs = self.parse_binary(prec + 1)?;
            lhs = match op {
                BinaryOpOrLogical::Binary(op) => Expression::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                    pos,
                },
                BinaryOpOrLogical::Logical(op) => Expression::Logical {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                    pos,
                },
            };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> ParseResult<Expression> {
        let pos = self.position();
        let op = match &self.current.kind {
            TokenKind::Punct(Punct::Minus) => Some(UnaryOp::Minus),
            TokenKind::Punct(Punct::Plus) => Some(UnaryOp::Plus),
            TokenKind::Punct(Punct::Not) => Some(UnaryOp::Not),
            TokenKind::Punct(Punct::BitNot) => Some(UnaryOp::BitNot),
            TokenKind::Keyword(Keyword::TypeOf) => Some(UnaryOp::TypeOf),
            TokenKind::Keyword(Keyword::Void) => Some(UnaryOp::Void),
            TokenKind::Keyword(Keyword::Delete) => Some(UnaryOp::Delete),
            _ => None,
        };
        if let Some(op) = op {
            self.advance()?;
            let operand = self.parse_unary()?;
            if op == UnaryOp::Delete
                && self.strict()
                && matches!(operand, Expression::Identifier { .. })
            {
                return Err(self.error_at(
                    "delete of an unqualified identifier in strict mode",
                    pos,
                ));
            }
            return Ok(Expression::Unary {
                op,
                operand: Box::new(operand),
                pos,
            });
        }

        if matches!(
            self.current.kind,
            TokenKind::Punct(Punct::PlusPlus) | TokenKind::Punct(Punct::MinusMinus)
        ) {
            let op = if self.current.is_punct(Punct::PlusPlus) {
                UpdateOp::Increment
            } else {
                UpdateOp::Decrement
            };
            self.advance()?;
            let target = self.parse_unary()?;
            self.check_assignment_target(&target)?;
            return Ok(Expression::Update {
                op,
                prefix: true,
                target: Box::new(target),
                pos,
            });
        }

        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> ParseResult<Expression> {
        let expr = self.parse_left_hand_side()?;
        if !self.current.newline_before
            && matches!(
                self.current.kind,
                TokenKind::Punct(Punct::PlusPlus) | TokenKind::Punct(Punct::MinusMinus)
            )
        {
            let pos = self.position();
            let op = if self.current.is_punct(Punct::PlusPlus) {
                UpdateOp::Increment
            } else {
                UpdateOp::Decrement
            };
            self.advance()?;
            self.check_assignment_target(&expr)?;
            return Ok(Expression::Update {
                op,
                prefix: false,
                target: Box::new(expr),
                pos,
            });
        }
        Ok(expr)
    }

    fn parse_left_hand_side(&mut self) -> ParseResult<Expression> {
        let expr = if self.current.is_keyword(Keyword::New) {
            self.parse_new()?
        } else {
            self.parse_primary()?
        };
        self.parse_call_tail(expr)
    }

    fn parse_new(&mut self) -> ParseResult<Expression> {
        let pos = self.position();
        self.expect_keyword(Keyword::New)?;
        let callee = if self.current.is_keyword(Keyword::New) {
            self.parse_new()?
        } else {
            let primary = self.parse_primary()?;
            self.parse_member_tail(primary)?
        };
        let arguments = if self.current.is_punct(Punct::LParen) {
            self.parse_arguments()?
        } else {
            Vec::new()
        };
        Ok(Expression::New {
            callee: Box::new(callee),
            arguments,
            pos,
        })
    }

    /// Member accesses only (no calls); binds tighter than `new`'s
    /// argument list.
    fn parse_member_tail(&mut self, mut expr: Expression) -> ParseResult<Expression> {
        loop {
            let pos = self.position();
            if self.eat_punct(Punct::Dot)? {
                let name = self.expect_property_name()?;
                expr = Expression::Member {
                    object: Box::new(expr),
                    name,
                    pos,
                };
            } else if self.eat_punct(Punct::LBracket)? {
                let index = self.parse_expression()?;
                self.expect_punct(Punct::RBracket)?;
                expr = Expression::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                    pos,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_call_tail(&mut self, mut expr: Expression) -> ParseResult<Expression> {
        loop {
            let pos = self.position();
            if self.current.is_punct(Punct::LParen) {
                let arguments = self.parse_arguments()?;
                expr = Expression::Call {
                    callee: Box::new(expr),
                    arguments,
                    pos,
                };
            } else if self.eat_punct(Punct::Dot)? {
                let name = self.expect_property_name()?;
                expr = Expression::Member {
                    object: Box::new(expr),
                    name,
                    pos,
                };
            } else if self.eat_punct(Punct::LBracket)? {
                let index = self.parse_expression()?;
                self.expect_punct(Punct::RBracket)?;
                expr = Expression::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                    pos,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    /// A property name after `.`: identifiers and reserved words.
    fn expect_property_name(&mut self) -> ParseResult<String> {
        match &self.current.kind {
            TokenKind::Identifier(name) => {
                let name = name.clone();
                self.advance()?;
                Ok(name)
            }
            TokenKind::Keyword(k) => {
                let name = k.as_str().to_string();
                self.advance()?;
                Ok(name)
            }
            other => Err(self.error(format!("expected property name, found {other}"))),
        }
    }

    fn parse_arguments(&mut self) -> ParseResult<Vec<Expression>> {
        self.expect_punct(Punct::LParen)?;
        let mut arguments = Vec::new();
        if !self.current.is_punct(Punct::RParen) {
            let saved_no_in = std::mem::replace(&mut self.no_in, false);
            loop {
                arguments.push(self.parse_assignment()?);
                if !self.eat_punct(Punct::Comma)? {
                    break;
                }
            }
            self.no_in = saved_no_in;
        }
        self.expect_punct(Punct::RParen)?;
        Ok(arguments)
    }

    fn parse_primary(&mut self) -> ParseResult<Expression> {
        let pos = self.position();
        match self.current.kind.clone() {
            TokenKind::Number {
                value,
                legacy_octal,
            } => {
                if legacy_octal && self.strict() {
                    return Err(self.error_at("octal literals are not allowed in strict mode", pos));
                }
                self.advance()?;
                Ok(Expression::Literal {
                    value: LiteralValue::Number(value),
                    pos,
                })
            }
            TokenKind::Str {
                value,
                legacy_octal_escape,
            } => {
                if legacy_octal_escape && self.strict() {
                    return Err(self.error_at("octal escapes are not allowed in strict mode", pos));
                }
                self.advance()?;
                Ok(Expression::Literal {
                    value: LiteralValue::Str(value),
                    pos,
                })
            }
            TokenKind::Regex { pattern, flags } => {
                self.advance()?;
                Ok(Expression::Literal {
                    value: LiteralValue::Regex { pattern, flags },
                    pos,
                })
            }
            TokenKind::Keyword(Keyword::True) => {
                self.advance()?;
                Ok(Expression::Literal {
                    value: LiteralValue::Bool(true),
                    pos,
                })
            }
            TokenKind::Keyword(Keyword::False) => {
                self.advance()?;
                Ok(Expression::Literal {
                    value: LiteralValue::Bool(false),
                    pos,
                })
            }
            TokenKind::Keyword(Keyword::Null) => {
                self.advance()?;
                Ok(Expression::Literal {
                    value: LiteralValue::Null,
                    pos,
                })
            }
            TokenKind::Keyword(Keyword::This) => {
                self.advance()?;
                self.hints_mut().reads_this = true;
                Ok(Expression::This { pos })
            }
            TokenKind::Keyword(Keyword::Function) => {
                let function = self.parse_function(false)?;
                Ok(Expression::Function { function, pos })
            }
            TokenKind::Identifier(name) => {
                self.advance()?;
                match name.as_str() {
                    "eval" => self.hints_mut().has_eval = true,
                    "arguments" => self.hints_mut().has_arguments = true,
                    _ => {}
                }
                Ok(Expression::Identifier { name, pos })
            }
            TokenKind::Punct(Punct::LParen) => {
                self.advance()?;
                let saved_no_in = std::mem::replace(&mut self.no_in, false);
                let expr = self.parse_expression()?;
                self.no_in = saved_no_in;
                self.expect_punct(Punct::RParen)?;
                Ok(expr)
            }
            TokenKind::Punct(Punct::LBracket) => self.parse_array_literal(),
            TokenKind::Punct(Punct::LBrace) => self.parse_object_literal(),
            other => Err(self.error(format!("unexpected {other}"))),
        }
    }

    fn parse_array_literal(&mut self) -> ParseResult<Expression> {
        let pos = self.position();
        self.expect_punct(Punct::LBracket)?;
        let mut elements = Vec::new();
        loop {
            if self.eat_punct(Punct::RBracket)? {
                break;
            }
            if self.eat_punct(Punct::Comma)? {
                // Elision.
                elements.push(None);
                continue;
            }
            elements.push(Some(self.parse_assignment()?));
            if self.eat_punct(Punct::RBracket)? {
                break;
            }
            self.expect_punct(Punct::Comma)?;
            if self.eat_punct(Punct::RBracket)? {
                // Trailing comma adds no element.
                break;
            }
            // Further commas after the separator are holes; handled by the
            // loop head.
            while self.current.is_punct(Punct::Comma) {
                elements.push(None);
                self.advance()?;
            }
        }
        Ok(Expression::Array { elements, pos })
    }

    fn parse_object_literal(&mut self) -> ParseResult<Expression> {
        let pos = self.position();
        self.expect_punct(Punct::LBrace)?;
        let mut properties: Vec<ObjectProperty> = Vec::new();
        loop {
            if self.eat_punct(Punct::RBrace)? {
                break;
            }
            let name_pos = self.position();
            let name = match self.current.kind.clone() {
                TokenKind::Identifier(n) => {
                    self.advance()?;
                    n
                }
                TokenKind::Keyword(k) => {
                    self.advance()?;
                    k.as_str().to_string()
                }
                TokenKind::Str { value, .. } => {
                    self.advance()?;
                    value
                }
                TokenKind::Number { value, .. } => {
                    self.advance()?;
                    number_property_name(value)
                }
                other => {
                    return Err(self.error(format!("expected property name, found {other}")));
                }
            };
            self.expect_punct(Punct::Colon)?;
            let value = self.parse_assignment()?;
            if self.strict() && properties.iter().any(|p| p.name == name) {
                return Err(self.error_at(
                    format!("duplicate data property '{name}' in strict mode"),
                    name_pos,
                ));
            }
            properties.push(ObjectProperty { name, value });
            if !self.eat_punct(Punct::Comma)? {
                self.expect_punct(Punct::RBrace)?;
                break;
            }
        }
        Ok(Expression::Object { properties, pos })
    }
}

/// Canonical property-name spelling of a numeric literal.
fn number_property_name(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 2_147_483_648.0 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

enum BinaryOpOrLogical {
    Binary(BinaryOp),
    Logical(LogicalOp),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Script {
        Parser::new(source).unwrap().parse_script(false).unwrap()
    }

    fn parse_err(source: &str) -> ParseError {
        Parser::new(source).unwrap().parse_script(false).unwrap_err()
    }

    #[test]
    fn test_precedence() {
        let script = parse("x = 1 + 2 * 3;");
        let Statement::Expression { expression, .. } = &script.statements[0] else {
            panic!("expected expression statement");
        };
        let Expression::Assignment { value, .. } = expression else {
            panic!("expected assignment");
        };
        let Expression::Binary { op: BinaryOp::Add, rhs, .. } = value.as_ref() else {
            panic!("expected addition at the top");
        };
        assert!(matches!(
            rhs.as_ref(),
            Expression::Binary { op: BinaryOp::Mul, .. }
        ));
    }

    #[test]
    fn test_asi_inserts_at_newline() {
        let script = parse("var a = 1\nvar b = 2");
        assert_eq!(script.statements.len(), 2);
    }

    #[test]
    fn test_asi_rejects_same_line() {
        let err = parse_err("var a = 1 var b = 2");
        assert!(err.message.contains("unexpected"));
    }

    #[test]
    fn test_return_with_newline_has_no_argument() {
        let script = parse("function f() { return\n1; }");
        let Statement::FunctionDeclaration { function, .. } = &script.statements[0] else {
            panic!("expected function declaration");
        };
        assert!(matches!(
            &function.body[0],
            Statement::Return { argument: None, .. }
        ));
    }

    #[test]
    fn test_labelled_statement() {
        let script = parse("outer: for (;;) { break outer; }");
        assert!(matches!(
            &script.statements[0],
            Statement::Labelled { label, .. } if label == "outer"
        ));
    }

    #[test]
    fn test_for_in_declaration_head() {
        let script = parse("for (var k in o) {}");
        let Statement::ForIn { target, .. } = &script.statements[0] else {
            panic!("expected for-in");
        };
        assert!(matches!(
            target,
            ForInTarget::Declaration(DeclarationKind::Var, name) if name == "k"
        ));
    }

    #[test]
    fn test_use_strict_directive_enables_strict_errors() {
        let err = parse_err("\"use strict\"; var x = 010;");
        assert!(err.message.contains("octal"));
        // Without the directive the same literal is fine.
        parse("var x = 010;");
    }

    #[test]
    fn test_strict_duplicate_parameters() {
        let err = parse_err("function f(a, a) { \"use strict\"; }");
        assert!(err.message.contains("duplicate parameter"));
        parse("function f(a, a) {}");
    }

    #[test]
    fn test_strict_delete_identifier() {
        let err = parse_err("\"use strict\"; delete x;");
        assert!(err.message.contains("delete"));
        parse("delete x;");
    }

    #[test]
    fn test_strict_assignment_to_eval() {
        let err = parse_err("\"use strict\"; eval = 1;");
        assert!(err.message.contains("eval"));
    }

    #[test]
    fn test_with_is_rejected() {
        let err = parse_err("with (o) { x; }");
        assert!(err.message.contains("with"));
    }

    #[test]
    fn test_hints() {
        let script = parse("function f() { return this && arguments && eval; }");
        let Statement::FunctionDeclaration { function, .. } = &script.statements[0] else {
            panic!("expected function declaration");
        };
        assert!(function.hints.reads_this);
        assert!(function.hints.has_arguments);
        assert!(function.hints.has_eval);
        assert!(script.hints.has_nested_functions);
        assert!(!script.hints.reads_this);
    }

    #[test]
    fn test_new_binds_member_access() {
        let script = parse("new a.b(1);");
        let Statement::Expression { expression, .. } = &script.statements[0] else {
            panic!("expected expression statement");
        };
        let Expression::New { callee, arguments, .. } = expression else {
            panic!("expected new expression");
        };
        assert!(matches!(callee.as_ref(), Expression::Member { .. }));
        assert_eq!(arguments.len(), 1);
    }

    #[test]
    fn test_array_holes() {
        let script = parse("var a = [1, , 2, ];");
        let Statement::Declaration { declarations, .. } = &script.statements[0] else {
            panic!("expected declaration");
        };
        let Some(Expression::Array { elements, .. }) = &declarations[0].1 else {
            panic!("expected array literal");
        };
        assert_eq!(elements.len(), 3);
        assert!(elements[0].is_some());
        assert!(elements[1].is_none());
        assert!(elements[2].is_some());
    }

    #[test]
    fn test_object_literal_keys() {
        let script = parse("var o = { a: 1, \"b c\": 2, 3: 4, if: 5 };");
        let Statement::Declaration { declarations, .. } = &script.statements[0] else {
            panic!("expected declaration");
        };
        let Some(Expression::Object { properties, .. }) = &declarations[0].1 else {
            panic!("expected object literal");
        };
        let names: Vec<&str> = properties.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b c", "3", "if"]);
    }

    #[test]
    fn test_const_requires_initializer() {
        let err = parse_err("const x;");
        assert!(err.message.contains("initializer"));
    }

    #[test]
    fn test_in_operator_suppressed_in_for_head() {
        // `in` inside a parenthesised for-init is fine.
        parse("for (var i = (\"a\" in o) ? 0 : 1; i < 2; i++) {}");
        // And as a plain binary operator elsewhere.
        parse("var x = \"a\" in o;");
    }

    #[test]
    fn test_error_position() {
        let err = parse_err("var\n  = 1;");
        assert_eq!(err.line, 2);
    }
}
