//! Recursive-descent parser.
//!
//! Statements are separated by newlines or `;`. Inside brackets, parens and
//! map literals newlines are insignificant.

use std::sync::Arc;

use super::ast::{BinaryOp, Expr, FnDecl, Stmt, UnaryOp};
use super::lexer::{Spanned, Token};
use super::ScriptError;

/// Parser over a token vector produced by [`tokenize`](super::lexer::tokenize).
pub struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    /// Create a parser positioned at the first token.
    #[must_use]
    pub fn new(tokens: Vec<Spanned>) -> Self {
        Self { tokens, pos: 0 }
    }

    /// Parse the complete token stream as a program.
    ///
    /// # Errors
    ///
    /// Returns [`ScriptError::Syntax`] at the first unexpected token.
    pub fn parse_program(&mut self) -> Result<Vec<Stmt>, ScriptError> {
        let body = self.statements(None)?;
        if let Some(token) = self.peek() {
            return Err(self.error(format!("unexpected {}", describe(token))));
        }
        Ok(body)
    }

    // ── Statements ───────────────────────────────────────────────────────────

    /// Parse statements until `end` (or EOF when `end` is `None`). The
    /// terminator itself is not consumed.
    fn statements(&mut self, end: Option<&Token>) -> Result<Vec<Stmt>, ScriptError> {
        let mut body = Vec::new();
        loop {
            self.skip_separators();
            match self.peek() {
                None => break,
                Some(token) if Some(token) == end => break,
                Some(_) => {}
            }
            body.push(self.statement()?);
            match self.peek() {
                None | Some(Token::Newline | Token::Semicolon) => {}
                Some(token) if Some(token) == end => {}
                Some(token) => {
                    return Err(self.error(format!(
                        "expected end of statement, found {}",
                        describe(token)
                    )));
                }
            }
        }
        Ok(body)
    }

    fn block(&mut self) -> Result<Vec<Stmt>, ScriptError> {
        self.expect(&Token::LeftBrace, "'{'")?;
        let body = self.statements(Some(&Token::RightBrace))?;
        self.expect(&Token::RightBrace, "'}'")?;
        Ok(body)
    }

    fn statement(&mut self) -> Result<Stmt, ScriptError> {
        let line = self.line();
        match self.peek() {
            Some(Token::Let) => {
                self.advance();
                let name = self.ident()?;
                self.expect(&Token::Assign, "'='")?;
                let value = self.expression()?;
                Ok(Stmt::Let { name, value })
            }
            Some(Token::Fn) => {
                self.advance();
                self.function()
            }
            Some(Token::Return) => {
                self.advance();
                let value = match self.peek() {
                    None | Some(Token::Newline | Token::Semicolon | Token::RightBrace) => None,
                    Some(_) => Some(self.expression()?),
                };
                Ok(Stmt::Return { value, line })
            }
            Some(Token::While) => {
                self.advance();
                let cond = self.expression()?;
                let body = self.block()?;
                Ok(Stmt::While { cond, body })
            }
            Some(Token::For) => {
                self.advance();
                let var = self.ident()?;
                self.expect(&Token::In, "'in'")?;
                let iterable = self.expression()?;
                let body = self.block()?;
                Ok(Stmt::For {
                    var,
                    iterable,
                    body,
                    line,
                })
            }
            Some(Token::Break) => {
                self.advance();
                Ok(Stmt::Break { line })
            }
            Some(Token::Continue) => {
                self.advance();
                Ok(Stmt::Continue { line })
            }
            _ => {
                let expr = self.expression()?;
                if self.peek() != Some(&Token::Assign) {
                    return Ok(Stmt::Expr(expr));
                }
                self.advance();
                if !matches!(expr, Expr::Var { .. } | Expr::Index { .. }) {
                    return Err(ScriptError::Syntax {
                        line,
                        message: "cannot assign to expression".into(),
                    });
                }
                let value = self.expression()?;
                Ok(Stmt::Assign {
                    target: expr,
                    value,
                    line,
                })
            }
        }
    }

    fn function(&mut self) -> Result<Stmt, ScriptError> {
        let name = self.ident()?;
        self.expect(&Token::LeftParen, "'('")?;
        let mut params = Vec::new();
        self.skip_newlines();
        while self.peek() != Some(&Token::RightParen) {
            let param = self.ident()?;
            if params.contains(&param) {
                return Err(self.error(format!("duplicate parameter '{param}'")));
            }
            params.push(param);
            self.skip_newlines();
            if !self.eat(&Token::Comma) {
                break;
            }
            self.skip_newlines();
        }
        self.expect(&Token::RightParen, "')'")?;
        let body = self.block()?;
        Ok(Stmt::Fn(Arc::new(FnDecl { name, params, body })))
    }

    // ── Expressions ──────────────────────────────────────────────────────────

    /// Parse one expression.
    ///
    /// # Errors
    ///
    /// Returns [`ScriptError::Syntax`] when the tokens do not form one.
    pub fn expression(&mut self) -> Result<Expr, ScriptError> {
        self.or()
    }

    fn or(&mut self) -> Result<Expr, ScriptError> {
        let mut lhs = self.and()?;
        while self.eat(&Token::Or) {
            let rhs = self.and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr, ScriptError> {
        let mut lhs = self.not()?;
        while self.eat(&Token::And) {
            let rhs = self.not()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn not(&mut self) -> Result<Expr, ScriptError> {
        let line = self.line();
        if self.eat(&Token::Not) {
            let operand = self.not()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
                line,
            });
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ScriptError> {
        let mut lhs = self.additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::Eq) => BinaryOp::Eq,
                Some(Token::NotEq) => BinaryOp::NotEq,
                Some(Token::Lt) => BinaryOp::Lt,
                Some(Token::LtEq) => BinaryOp::LtEq,
                Some(Token::Gt) => BinaryOp::Gt,
                Some(Token::GtEq) => BinaryOp::GtEq,
                _ => return Ok(lhs),
            };
            lhs = self.binary_tail(lhs, op, Self::additive)?;
        }
    }

    fn additive(&mut self) -> Result<Expr, ScriptError> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            lhs = self.binary_tail(lhs, op, Self::multiplicative)?;
        }
    }

    fn multiplicative(&mut self) -> Result<Expr, ScriptError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => return Ok(lhs),
            };
            lhs = self.binary_tail(lhs, op, Self::unary)?;
        }
    }

    fn binary_tail(
        &mut self,
        lhs: Expr,
        op: BinaryOp,
        operand: fn(&mut Self) -> Result<Expr, ScriptError>,
    ) -> Result<Expr, ScriptError> {
        let line = self.line();
        self.advance();
        let rhs = operand(self)?;
        Ok(Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
            line,
        })
    }

    fn unary(&mut self) -> Result<Expr, ScriptError> {
        let line = self.line();
        if self.eat(&Token::Minus) {
            let operand = self.unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(operand),
                line,
            });
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, ScriptError> {
        let mut expr = self.primary()?;
        loop {
            let line = self.line();
            if self.eat(&Token::LeftParen) {
                let args = self.list_items(&Token::RightParen)?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                    line,
                };
            } else if self.eat(&Token::LeftBracket) {
                self.skip_newlines();
                let index = self.expression()?;
                self.skip_newlines();
                self.expect(&Token::RightBracket, "']'")?;
                expr = Expr::Index {
                    target: Box::new(expr),
                    index: Box::new(index),
                    line,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, ScriptError> {
        let line = self.line();
        let Some(token) = self.peek().cloned() else {
            return Err(self.error("unexpected end of script".into()));
        };
        self.advance();
        match token {
            Token::Null => Ok(Expr::Null),
            Token::True => Ok(Expr::Bool(true)),
            Token::False => Ok(Expr::Bool(false)),
            Token::Int(value) => Ok(Expr::Int(value)),
            Token::Float(value) => Ok(Expr::Float(value)),
            Token::Str(value) => Ok(Expr::Str(value)),
            Token::Ident(name) => Ok(Expr::Var { name, line }),
            Token::LeftParen => {
                self.skip_newlines();
                let inner = self.expression()?;
                self.skip_newlines();
                self.expect(&Token::RightParen, "')'")?;
                Ok(inner)
            }
            Token::LeftBracket => Ok(Expr::List(self.list_items(&Token::RightBracket)?)),
            Token::LeftBrace => self.map_literal(),
            Token::If => self.if_expression(),
            other => Err(ScriptError::Syntax {
                line,
                message: format!("unexpected {}", describe(&other)),
            }),
        }
    }

    /// Comma-separated expressions up to and including `close`; the opening
    /// delimiter has already been consumed.
    fn list_items(&mut self, close: &Token) -> Result<Vec<Expr>, ScriptError> {
        let mut items = Vec::new();
        self.skip_newlines();
        while self.peek() != Some(close) {
            items.push(self.expression()?);
            self.skip_newlines();
            if !self.eat(&Token::Comma) {
                break;
            }
            self.skip_newlines();
        }
        self.expect(close, &describe(close))?;
        Ok(items)
    }

    fn map_literal(&mut self) -> Result<Expr, ScriptError> {
        let mut entries = Vec::new();
        self.skip_newlines();
        while self.peek() != Some(&Token::RightBrace) {
            let key = self.expression()?;
            self.skip_newlines();
            self.expect(&Token::Colon, "':'")?;
            self.skip_newlines();
            let value = self.expression()?;
            entries.push((key, value));
            self.skip_newlines();
            if !self.eat(&Token::Comma) {
                break;
            }
            self.skip_newlines();
        }
        self.expect(&Token::RightBrace, "'}'")?;
        Ok(Expr::Map(entries))
    }

    fn if_expression(&mut self) -> Result<Expr, ScriptError> {
        let cond = self.expression()?;
        let then = self.block()?;
        let otherwise = if self.eat(&Token::Else) {
            if self.eat(&Token::If) {
                Some(vec![Stmt::Expr(self.if_expression()?)])
            } else {
                Some(self.block()?)
            }
        } else {
            None
        };
        Ok(Expr::If {
            cond: Box::new(cond),
            then,
            otherwise,
        })
    }

    // ── Token helpers ────────────────────────────────────────────────────────

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or(1, |s| s.line)
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token, what: &str) -> Result<(), ScriptError> {
        if self.eat(token) {
            return Ok(());
        }
        let found = self.peek().map_or_else(|| "end of script".to_owned(), describe);
        Err(self.error(format!("expected {what}, found {found}")))
    }

    fn ident(&mut self) -> Result<String, ScriptError> {
        if let Some(Token::Ident(name)) = self.peek() {
            let name = name.clone();
            self.advance();
            return Ok(name);
        }
        let found = self.peek().map_or_else(|| "end of script".to_owned(), describe);
        Err(self.error(format!("expected identifier, found {found}")))
    }

    fn skip_newlines(&mut self) {
        while self.eat(&Token::Newline) {}
    }

    fn skip_separators(&mut self) {
        while matches!(self.peek(), Some(Token::Newline | Token::Semicolon)) {
            self.advance();
        }
    }

    fn error(&self, message: String) -> ScriptError {
        ScriptError::Syntax {
            line: self.line(),
            message,
        }
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Ident(name) => format!("identifier '{name}'"),
        Token::Int(value) => format!("number {value}"),
        Token::Float(value) => format!("number {value}"),
        Token::Str(_) => "string".into(),
        Token::Newline => "end of line".into(),
        Token::LeftBrace => "'{'".into(),
        Token::RightBrace => "'}'".into(),
        Token::LeftParen => "'('".into(),
        Token::RightParen => "')'".into(),
        Token::LeftBracket => "'['".into(),
        Token::RightBracket => "']'".into(),
        other => format!("{other:?}").to_lowercase(),
    }
}
