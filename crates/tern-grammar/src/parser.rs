//! Module for the parser implementation.
//!
//! The parser consumes a token stream from a lexer and produces an
//! expression tree, recovering from errors where it can so that the checker
//! can still report downstream diagnostics against a best-effort tree.

use crate::Diagnostic;
use crate::Span;
use crate::ast::Ast;
use crate::ast::BinaryOp;
use crate::ast::Comprehension;
use crate::ast::ExprId;
use crate::ast::ExprKind;
use crate::ast::FieldInit;
use crate::ast::Literal;
use crate::ast::MapEntry;
use crate::ast::UnaryOp;
use crate::lexer::Lexer;
use crate::lexer::Token;
use crate::lexer::decode_literal;

/// The name of the accumulator variable bound by macro expansion.
pub const ACCUMULATOR_VAR: &str = "__result__";

/// The name of the internal function used as a comprehension loop condition.
///
/// The function is non-strict: it yields `false` only for a `false` operand,
/// and `true` for everything else, so that an errored or unknown accumulator
/// keeps the loop running and a later determining value can absorb it.
pub const NOT_STRICTLY_FALSE: &str = "@not_strictly_false";

/// The names of the macros expanded by the parser.
pub const MACROS: &[&str] = &["has", "all", "exists", "exists_one", "map", "filter"];

/// Represents the options to the parser.
#[derive(Debug, Clone)]
pub struct ParserOptions {
    /// The maximum expression nesting depth.
    ///
    /// Exceeding the limit is a fatal parse error.
    pub max_nesting_depth: usize,
    /// The maximum number of expression nodes in a parse, including nodes
    /// synthesized by macro expansion.
    ///
    /// A limit of zero means the program size is unbounded.
    pub max_nodes: usize,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            max_nesting_depth: 100,
            max_nodes: 0,
        }
    }
}

/// Represents the result of a parse.
#[derive(Debug)]
pub struct ParseResult {
    /// The parsed tree.
    ///
    /// The tree is best-effort when diagnostics were emitted.
    pub ast: Ast,
    /// The diagnostics emitted during the parse.
    pub diagnostics: Vec<Diagnostic>,
}

/// Parses the given source with default options.
pub fn parse(source: &str) -> ParseResult {
    parse_with_options(source, &ParserOptions::default())
}

/// Parses the given source with the given options.
pub fn parse_with_options(source: &str, options: &ParserOptions) -> ParseResult {
    let mut parser = Parser::new(source, options);
    let root = parser.parse_root();
    let Parser {
        mut ast,
        diagnostics,
        ..
    } = parser;
    ast.set_root(root);
    ParseResult { ast, diagnostics }
}

/// Creates an "expected, but found" diagnostic error.
fn expected_found(expected: &str, found: Option<&str>, span: Span) -> Diagnostic {
    let found = found.unwrap_or("end of input");
    Diagnostic::error(format!("expected {expected}, but found {found}"))
        .with_label(format!("unexpected {found}"), span)
}

/// Implements the Tern expression parser.
struct Parser<'a> {
    /// The trivia-stripped token stream.
    tokens: Vec<(Token, Span)>,
    /// The source text being parsed.
    source: &'a str,
    /// The current position in the token stream.
    pos: usize,
    /// The tree under construction.
    ast: Ast,
    /// The diagnostics accumulated so far.
    diagnostics: Vec<Diagnostic>,
    /// The current expression nesting depth.
    depth: usize,
    /// Set when a fatal condition stops the parse.
    fatal: bool,
    /// The parser options.
    options: &'a ParserOptions,
}

impl<'a> Parser<'a> {
    /// Creates a new parser for the given source.
    fn new(source: &'a str, options: &'a ParserOptions) -> Self {
        let mut tokens = Vec::new();
        let mut diagnostics = Vec::new();
        for (result, span) in Lexer::new(source) {
            match result {
                Ok(token) if token.is_trivia() => {}
                Ok(Token::UnterminatedString) => {
                    diagnostics
                        .push(Diagnostic::error("unterminated string literal").with_label(
                            "this quote is not matched",
                            Span::new(span.start(), 1),
                        ));
                    tokens.push((Token::UnterminatedString, span));
                }
                Ok(token) => tokens.push((token, span)),
                Err(_) => {
                    let text = &source[span.start()..span.end()];
                    diagnostics.push(
                        Diagnostic::error(format!("unexpected character `{text}`"))
                            .with_highlight(span),
                    );
                }
            }
        }

        Self {
            tokens,
            source,
            pos: 0,
            ast: Ast::new(),
            diagnostics,
            depth: 0,
            fatal: false,
            options,
        }
    }

    /// Parses the root expression, requiring the entire input is consumed.
    fn parse_root(&mut self) -> ExprId {
        let root = self.parse_expr();
        if !self.fatal
            && let Some((token, span)) = self.peek()
        {
            self.diagnostics.push(expected_found(
                "end of input",
                Some(token.describe()),
                span,
            ));
        }

        root
    }

    /// Peeks at the current token.
    fn peek(&self) -> Option<(Token, Span)> {
        self.tokens.get(self.pos).copied()
    }

    /// Peeks at the token `n` positions ahead of the current token.
    fn peek_nth(&self, n: usize) -> Option<(Token, Span)> {
        self.tokens.get(self.pos + n).copied()
    }

    /// Consumes and returns the current token.
    fn next(&mut self) -> Option<(Token, Span)> {
        let token = self.tokens.get(self.pos).copied();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Determines if the current token is the given token.
    fn at(&self, token: Token) -> bool {
        matches!(self.peek(), Some((t, _)) if t == token)
    }

    /// Consumes the current token if it is the given token.
    fn eat(&mut self, token: Token) -> Option<Span> {
        if self.at(token) {
            return self.next().map(|(_, s)| s);
        }

        None
    }

    /// Consumes the current token, requiring it to be the given token.
    ///
    /// Emits a diagnostic and returns `None` if the token does not match.
    fn expect(&mut self, token: Token) -> Option<Span> {
        match self.peek() {
            Some((t, s)) if t == token => {
                self.pos += 1;
                Some(s)
            }
            found => {
                let diagnostic = expected_found(
                    token.describe(),
                    found.map(|(t, _)| t.describe()),
                    found.map(|(_, s)| s).unwrap_or_else(|| self.eof_span()),
                );
                self.report(diagnostic);
                None
            }
        }
    }

    /// Records a diagnostic unless the parse has already fatally stopped.
    ///
    /// This avoids a cascade of spurious end-of-input diagnostics while the
    /// recursive descent unwinds after an abort.
    fn report(&mut self, diagnostic: Diagnostic) {
        if !self.fatal {
            self.diagnostics.push(diagnostic);
        }
    }

    /// Gets an empty span at the end of the input.
    fn eof_span(&self) -> Span {
        Span::new(self.source.len(), 0)
    }

    /// Gets the span of the current token, or an empty span at the end of
    /// the input.
    fn current_span(&self) -> Span {
        self.peek().map(|(_, s)| s).unwrap_or_else(|| self.eof_span())
    }

    /// Gets the source text of the given span.
    fn text(&self, span: Span) -> &'a str {
        &self.source[span.start()..span.end()]
    }

    /// Allocates a new node, enforcing the program size limit.
    fn alloc(&mut self, kind: ExprKind, span: Span) -> ExprId {
        if self.options.max_nodes > 0 && self.ast.len() >= self.options.max_nodes && !self.fatal {
            self.diagnostics.push(
                Diagnostic::error(format!(
                    "expression exceeds the maximum program size of {max} nodes",
                    max = self.options.max_nodes
                ))
                .with_highlight(span),
            );
            self.abort();
        }

        self.ast.alloc(kind, span)
    }

    /// Stops the parse by exhausting the token stream.
    fn abort(&mut self) {
        self.fatal = true;
        self.pos = self.tokens.len();
    }

    /// Enters a nesting level, enforcing the depth limit.
    ///
    /// Returns `false` if the limit was exceeded.
    fn enter(&mut self) -> bool {
        self.depth += 1;
        if self.depth > self.options.max_nesting_depth {
            if !self.fatal {
                self.diagnostics.push(
                    Diagnostic::error(format!(
                        "expression exceeds the maximum nesting depth of {max}",
                        max = self.options.max_nesting_depth
                    ))
                    .with_highlight(self.current_span()),
                );
                self.abort();
            }

            return false;
        }

        true
    }

    /// Exits a nesting level.
    fn exit(&mut self) {
        self.depth -= 1;
    }

    /// Parses an expression (the ternary conditional level).
    fn parse_expr(&mut self) -> ExprId {
        if !self.enter() {
            let span = self.current_span();
            return self.alloc(ExprKind::Invalid, span);
        }

        let condition = self.parse_or();
        let expr = if self.eat(Token::QuestionMark).is_some() {
            let truthy = self.parse_or();
            self.expect(Token::Colon);
            let falsy = self.parse_expr();
            let span = self.span_of(condition, falsy);
            self.alloc(
                ExprKind::Ternary {
                    condition,
                    truthy,
                    falsy,
                },
                span,
            )
        } else {
            condition
        };

        self.exit();
        expr
    }

    /// Gets a span covering the given expressions.
    fn span_of(&self, start: ExprId, end: ExprId) -> Span {
        let start = self.ast.span(start).start();
        let end = self.ast.span(end).end();
        Span::new(start, end.saturating_sub(start))
    }

    /// Parses a logical `||` chain.
    fn parse_or(&mut self) -> ExprId {
        let mut lhs = self.parse_and();
        while self.eat(Token::LogicalOr).is_some() {
            let rhs = self.parse_and();
            let span = self.span_of(lhs, rhs);
            lhs = self.alloc(
                ExprKind::Binary {
                    op: BinaryOp::Or,
                    lhs,
                    rhs,
                },
                span,
            );
        }

        lhs
    }

    /// Parses a logical `&&` chain.
    fn parse_and(&mut self) -> ExprId {
        let mut lhs = self.parse_relation();
        while self.eat(Token::LogicalAnd).is_some() {
            let rhs = self.parse_relation();
            let span = self.span_of(lhs, rhs);
            lhs = self.alloc(
                ExprKind::Binary {
                    op: BinaryOp::And,
                    lhs,
                    rhs,
                },
                span,
            );
        }

        lhs
    }

    /// Parses a relational operator chain.
    fn parse_relation(&mut self) -> ExprId {
        let mut lhs = self.parse_addition();
        loop {
            let op = match self.peek() {
                Some((Token::Less, _)) => BinaryOp::Less,
                Some((Token::LessEqual, _)) => BinaryOp::LessEqual,
                Some((Token::Greater, _)) => BinaryOp::Greater,
                Some((Token::GreaterEqual, _)) => BinaryOp::GreaterEqual,
                Some((Token::Equal, _)) => BinaryOp::Equal,
                Some((Token::NotEqual, _)) => BinaryOp::NotEqual,
                Some((Token::InKeyword, _)) => BinaryOp::In,
                _ => break,
            };

            self.next();
            let rhs = self.parse_addition();
            let span = self.span_of(lhs, rhs);
            lhs = self.alloc(ExprKind::Binary { op, lhs, rhs }, span);
        }

        lhs
    }

    /// Parses an additive operator chain.
    fn parse_addition(&mut self) -> ExprId {
        let mut lhs = self.parse_multiplication();
        loop {
            let op = match self.peek() {
                Some((Token::Plus, _)) => BinaryOp::Add,
                Some((Token::Minus, _)) => BinaryOp::Subtract,
                _ => break,
            };

            self.next();
            let rhs = self.parse_multiplication();
            let span = self.span_of(lhs, rhs);
            lhs = self.alloc(ExprKind::Binary { op, lhs, rhs }, span);
        }

        lhs
    }

    /// Parses a multiplicative operator chain.
    fn parse_multiplication(&mut self) -> ExprId {
        let mut lhs = self.parse_unary();
        loop {
            let op = match self.peek() {
                Some((Token::Asterisk, _)) => BinaryOp::Multiply,
                Some((Token::Slash, _)) => BinaryOp::Divide,
                Some((Token::Percent, _)) => BinaryOp::Remainder,
                _ => break,
            };

            self.next();
            let rhs = self.parse_unary();
            let span = self.span_of(lhs, rhs);
            lhs = self.alloc(ExprKind::Binary { op, lhs, rhs }, span);
        }

        lhs
    }

    /// Parses a unary expression.
    fn parse_unary(&mut self) -> ExprId {
        match self.peek() {
            Some((Token::Exclamation, start)) => {
                let mut count = 0;
                while self.eat(Token::Exclamation).is_some() {
                    count += 1;
                }

                let mut operand = self.parse_member();
                for _ in 0..count {
                    let span = Span::new(
                        start.start(),
                        self.ast.span(operand).end().saturating_sub(start.start()),
                    );
                    operand = self.alloc(
                        ExprKind::Unary {
                            op: UnaryOp::Not,
                            operand,
                        },
                        span,
                    );
                }

                operand
            }
            Some((Token::Minus, start)) => {
                let mut count = 0;
                while self.eat(Token::Minus).is_some() {
                    count += 1;
                }

                // A single minus directly applied to a numeric literal is
                // folded into the literal so that the most negative integer
                // can be written directly.
                if count == 1
                    && let Some((token @ (Token::Integer | Token::Double), span)) = self.peek()
                {
                    self.next();
                    let full = Span::new(start.start(), span.end() - start.start());
                    return self.parse_number(token, span, true, full);
                }

                let mut operand = self.parse_member();
                for _ in 0..count {
                    let span = Span::new(
                        start.start(),
                        self.ast.span(operand).end().saturating_sub(start.start()),
                    );
                    operand = self.alloc(
                        ExprKind::Unary {
                            op: UnaryOp::Negate,
                            operand,
                        },
                        span,
                    );
                }

                operand
            }
            _ => self.parse_member(),
        }
    }

    /// Parses a member expression: selections, indexes, and receiver calls
    /// applied to a primary expression.
    fn parse_member(&mut self) -> ExprId {
        let mut expr = self.parse_primary();
        loop {
            match self.peek() {
                Some((Token::Dot, _)) => {
                    self.next();
                    let optional = self.eat(Token::QuestionMark).is_some();
                    let Some(name_span) = self.expect(Token::Ident) else {
                        let span = self.ast.span(expr);
                        return self.alloc(ExprKind::Invalid, span);
                    };

                    let name = self.text(name_span).to_string();
                    if !optional && self.at(Token::OpenParen) {
                        expr = self.parse_receiver_call(expr, name);
                    } else {
                        let span = Span::new(
                            self.ast.span(expr).start(),
                            name_span.end() - self.ast.span(expr).start(),
                        );
                        expr = self.alloc(
                            ExprKind::Select {
                                operand: expr,
                                field: name,
                                optional,
                                test: false,
                            },
                            span,
                        );
                    }
                }
                Some((Token::OpenBracket, _)) => {
                    self.next();
                    let optional = self.eat(Token::QuestionMark).is_some();
                    let index = self.parse_expr();
                    let end = self
                        .expect(Token::CloseBracket)
                        .unwrap_or_else(|| self.current_span());
                    let span = Span::new(
                        self.ast.span(expr).start(),
                        end.end().saturating_sub(self.ast.span(expr).start()),
                    );
                    expr = self.alloc(
                        ExprKind::Index {
                            operand: expr,
                            index,
                            optional,
                        },
                        span,
                    );
                }
                _ => break,
            }
        }

        expr
    }

    /// Parses a primary expression.
    fn parse_primary(&mut self) -> ExprId {
        match self.peek() {
            Some((token @ (Token::Integer | Token::Double), span)) => {
                self.next();
                self.parse_number(token, span, false, span)
            }
            Some((Token::UnsignedInteger, span)) => {
                self.next();
                let text = self.text(span);
                let digits = &text[..text.len() - 1];
                let value = if let Some(hex) = digits.strip_prefix("0x").or_else(|| {
                    digits.strip_prefix("0X")
                }) {
                    u64::from_str_radix(hex, 16)
                } else {
                    digits.parse()
                };
                match value {
                    Ok(value) => self.alloc(ExprKind::Literal(Literal::Uint(value)), span),
                    Err(_) => {
                        self.diagnostics.push(
                            Diagnostic::error("unsigned integer literal is out of range")
                                .with_highlight(span),
                        );
                        self.alloc(ExprKind::Invalid, span)
                    }
                }
            }
            Some((Token::StringLiteral, span)) => {
                self.next();
                match decode_literal(self.text(span)) {
                    Ok(crate::lexer::Decoded::Text(value)) => {
                        self.alloc(ExprKind::Literal(Literal::String(value)), span)
                    }
                    Ok(crate::lexer::Decoded::Bytes(value)) => {
                        self.alloc(ExprKind::Literal(Literal::Bytes(value)), span)
                    }
                    Err(e) => {
                        self.diagnostics.push(Diagnostic::error(e.message).with_highlight(
                            Span::new(span.start() + e.offset, 1),
                        ));
                        self.alloc(ExprKind::Invalid, span)
                    }
                }
            }
            Some((Token::UnterminatedString, span)) => {
                // Already diagnosed during lexing
                self.next();
                self.alloc(ExprKind::Invalid, span)
            }
            Some((Token::TrueKeyword, span)) => {
                self.next();
                self.alloc(ExprKind::Literal(Literal::Bool(true)), span)
            }
            Some((Token::FalseKeyword, span)) => {
                self.next();
                self.alloc(ExprKind::Literal(Literal::Bool(false)), span)
            }
            Some((Token::NullKeyword, span)) => {
                self.next();
                self.alloc(ExprKind::Literal(Literal::Null), span)
            }
            Some((Token::OpenParen, _)) => {
                self.next();
                let expr = self.parse_expr();
                self.expect(Token::CloseParen);
                expr
            }
            Some((Token::OpenBracket, span)) => {
                self.next();
                let elements = self.parse_separated(Token::CloseBracket, Self::parse_expr);
                let end = self
                    .expect(Token::CloseBracket)
                    .unwrap_or_else(|| self.current_span());
                self.alloc(
                    ExprKind::List { elements },
                    Span::new(span.start(), end.end().saturating_sub(span.start())),
                )
            }
            Some((Token::OpenBrace, span)) => {
                self.next();
                let entries = self.parse_separated(Token::CloseBrace, Self::parse_map_entry);
                let end = self
                    .expect(Token::CloseBrace)
                    .unwrap_or_else(|| self.current_span());
                self.alloc(
                    ExprKind::Map { entries },
                    Span::new(span.start(), end.end().saturating_sub(span.start())),
                )
            }
            Some((Token::Dot, span)) => {
                self.next();
                match self.peek() {
                    Some((Token::Ident, _)) => self.parse_name(true, span),
                    found => {
                        let diagnostic = expected_found(
                            "identifier",
                            found.map(|(t, _)| t.describe()),
                            found.map(|(_, s)| s).unwrap_or_else(|| self.eof_span()),
                        );
                        self.report(diagnostic);
                        self.alloc(ExprKind::Invalid, span)
                    }
                }
            }
            Some((Token::Ident, span)) => self.parse_name(false, span),
            Some((Token::ReservedKeyword, span)) => {
                self.next();
                let text = self.text(span);
                self.diagnostics.push(
                    Diagnostic::error(format!(
                        "`{text}` is a reserved word and cannot be used as an identifier"
                    ))
                    .with_highlight(span),
                );
                self.alloc(ExprKind::Invalid, span)
            }
            found => {
                let diagnostic = expected_found(
                    "an expression",
                    found.map(|(t, _)| t.describe()),
                    found.map(|(_, s)| s).unwrap_or_else(|| self.eof_span()),
                );
                self.report(diagnostic);
                // Consume the offending token to guarantee progress
                let span = self.current_span();
                self.next();
                self.alloc(ExprKind::Invalid, span)
            }
        }
    }

    /// Parses an integer or double literal token.
    fn parse_number(&mut self, token: Token, span: Span, negate: bool, full: Span) -> ExprId {
        let text = self.text(span);
        match token {
            Token::Integer => {
                let value = if let Some(hex) =
                    text.strip_prefix("0x").or_else(|| text.strip_prefix("0X"))
                {
                    let mut digits = String::new();
                    if negate {
                        digits.push('-');
                    }
                    digits.push_str(hex);
                    i64::from_str_radix(&digits, 16)
                } else if negate {
                    format!("-{text}").parse()
                } else {
                    text.parse()
                };
                match value {
                    Ok(value) => self.alloc(ExprKind::Literal(Literal::Int(value)), full),
                    Err(_) => {
                        self.diagnostics.push(
                            Diagnostic::error("integer literal is out of range")
                                .with_highlight(full),
                        );
                        self.alloc(ExprKind::Invalid, full)
                    }
                }
            }
            Token::Double => {
                // The token's lexical grammar guarantees a parseable double
                let value: f64 = text.parse().expect("double literal should parse");
                let value = if negate { -value } else { value };
                self.alloc(ExprKind::Literal(Literal::Double(value)), full)
            }
            _ => unreachable!("caller should pass a numeric token"),
        }
    }

    /// Parses a comma-separated sequence until the given closing token.
    ///
    /// The closing token itself is not consumed.
    fn parse_separated<T>(
        &mut self,
        close: Token,
        mut element: impl FnMut(&mut Self) -> T,
    ) -> Vec<T> {
        let mut elements = Vec::new();
        if self.at(close) {
            return elements;
        }

        loop {
            if self.fatal || self.peek().is_none() {
                break;
            }

            elements.push(element(self));
            match self.eat(Token::Comma) {
                Some(span) => {
                    if self.at(close) {
                        self.diagnostics.push(
                            Diagnostic::error("a trailing comma is not permitted")
                                .with_highlight(span),
                        );
                        break;
                    }
                }
                None => break,
            }
        }

        elements
    }

    /// Parses a map literal entry.
    fn parse_map_entry(&mut self) -> MapEntry {
        let key = self.parse_expr();
        self.expect(Token::Colon);
        let value = self.parse_expr();
        MapEntry { key, value }
    }

    /// Parses a message literal field initializer.
    fn parse_field_init(&mut self) -> Option<FieldInit> {
        let name_span = self.expect(Token::Ident)?;
        let name = self.text(name_span).to_string();
        self.expect(Token::Colon);
        let value = self.parse_expr();
        Some(FieldInit {
            name,
            name_span,
            value,
        })
    }

    /// Parses an expression starting at an identifier.
    ///
    /// This handles plain identifiers, global calls, macro invocations, and
    /// message literals with dotted type names. `leading_dot` marks names
    /// resolved absolutely; `start` is the span of the leading `.` when
    /// present, otherwise the identifier's span.
    fn parse_name(&mut self, leading_dot: bool, start: Span) -> ExprId {
        // Scan ahead for a dotted identifier chain ending in `{`, which is a
        // message literal; otherwise member parsing handles any selections.
        let mut chain = 1;
        loop {
            match (self.peek_nth(chain * 2 - 1), self.peek_nth(chain * 2)) {
                (Some((Token::Dot, _)), Some((Token::Ident, _))) => chain += 1,
                _ => break,
            }
        }

        if matches!(self.peek_nth(chain * 2 - 1), Some((Token::OpenBrace, _))) {
            return self.parse_message_literal(leading_dot, start, chain);
        }

        let (_, name_span) = self.next().expect("caller should peek an identifier");
        let mut name = String::new();
        if leading_dot {
            name.push('.');
        }
        name.push_str(self.text(name_span));

        if self.at(Token::OpenParen) {
            if !leading_dot && name == "has" {
                return self.parse_has_macro(start);
            }

            self.next();
            let args = self.parse_separated(Token::CloseParen, Self::parse_expr);
            let end = self
                .expect(Token::CloseParen)
                .unwrap_or_else(|| self.current_span());
            return self.alloc(
                ExprKind::Call {
                    target: None,
                    function: name,
                    args,
                },
                Span::new(start.start(), end.end().saturating_sub(start.start())),
            );
        }

        self.alloc(
            ExprKind::Ident(name),
            Span::new(start.start(), name_span.end() - start.start()),
        )
    }

    /// Parses a message literal whose type name is a chain of `chain`
    /// identifiers starting at the current token.
    fn parse_message_literal(&mut self, leading_dot: bool, start: Span, chain: usize) -> ExprId {
        let mut type_name = String::new();
        if leading_dot {
            type_name.push('.');
        }

        for i in 0..chain {
            if i > 0 {
                self.next();
                type_name.push('.');
            }

            let (_, span) = self.next().expect("scan should have validated the chain");
            type_name.push_str(self.text(span));
        }

        self.next();
        let fields = self
            .parse_separated(Token::CloseBrace, Self::parse_field_init)
            .into_iter()
            .flatten()
            .collect();
        let end = self
            .expect(Token::CloseBrace)
            .unwrap_or_else(|| self.current_span());
        self.alloc(
            ExprKind::Message { type_name, fields },
            Span::new(start.start(), end.end().saturating_sub(start.start())),
        )
    }

    /// Parses a `has(...)` macro invocation, with the macro name consumed.
    fn parse_has_macro(&mut self, start: Span) -> ExprId {
        self.next();
        let args = self.parse_separated(Token::CloseParen, Self::parse_expr);
        let end = self
            .expect(Token::CloseParen)
            .unwrap_or_else(|| self.current_span());
        let span = Span::new(start.start(), end.end().saturating_sub(start.start()));

        if args.len() != 1 {
            self.diagnostics.push(
                Diagnostic::error("has() requires exactly one argument").with_highlight(span),
            );
            return self.alloc(ExprKind::Invalid, span);
        }

        let arg = args[0];
        match self.ast.kind(arg) {
            ExprKind::Select {
                optional: false,
                test: false,
                ..
            } => {
                self.ast.make_test_select(arg);
                self.ast.set_macro_origin(arg, "has");
                arg
            }
            _ => {
                self.diagnostics.push(
                    Diagnostic::error("the argument to has() must be a field selection")
                        .with_highlight(self.ast.span(arg)),
                );
                self.alloc(ExprKind::Invalid, span)
            }
        }
    }

    /// Parses a receiver-style call, expanding comprehension macros.
    fn parse_receiver_call(&mut self, target: ExprId, name: String) -> ExprId {
        self.next();
        let args = self.parse_separated(Token::CloseParen, Self::parse_expr);
        let end = self
            .expect(Token::CloseParen)
            .unwrap_or_else(|| self.current_span());
        let span = Span::new(
            self.ast.span(target).start(),
            end.end().saturating_sub(self.ast.span(target).start()),
        );

        match name.as_str() {
            "all" | "exists" | "exists_one" | "filter" => {
                if args.len() != 2 {
                    self.diagnostics.push(
                        Diagnostic::error(format!("{name}() requires exactly two arguments"))
                            .with_highlight(span),
                    );
                    return self.alloc(ExprKind::Invalid, span);
                }

                self.expand_macro(target, &name, args[0], None, args[1], span)
            }
            "map" => {
                match args.len() {
                    2 => self.expand_macro(target, &name, args[0], None, args[1], span),
                    3 => self.expand_macro(target, &name, args[0], Some(args[1]), args[2], span),
                    _ => {
                        self.diagnostics.push(
                            Diagnostic::error("map() requires two or three arguments")
                                .with_highlight(span),
                        );
                        self.alloc(ExprKind::Invalid, span)
                    }
                }
            }
            _ => self.alloc(
                ExprKind::Call {
                    target: Some(target),
                    function: name,
                    args,
                },
                span,
            ),
        }
    }

    /// Expands a comprehension macro into a comprehension node.
    ///
    /// For `map`, `filter` is the optional filtering predicate and `expr`
    /// the transform; for the predicate macros `expr` is the predicate.
    fn expand_macro(
        &mut self,
        range: ExprId,
        name: &str,
        iter: ExprId,
        filter: Option<ExprId>,
        expr: ExprId,
        span: Span,
    ) -> ExprId {
        let iter_var = match self.ast.kind(iter) {
            ExprKind::Ident(name) if !name.starts_with('.') => name.clone(),
            _ => {
                self.diagnostics.push(
                    Diagnostic::error(format!(
                        "the first argument of {name}() must be a simple identifier"
                    ))
                    .with_highlight(self.ast.span(iter)),
                );
                return self.alloc(ExprKind::Invalid, span);
            }
        };

        if iter_var == ACCUMULATOR_VAR {
            self.diagnostics.push(
                Diagnostic::error(format!(
                    "the iteration variable may not be named `{ACCUMULATOR_VAR}`"
                ))
                .with_highlight(self.ast.span(iter)),
            );
            return self.alloc(ExprKind::Invalid, span);
        }

        let accu = |parser: &mut Self| {
            parser.alloc(ExprKind::Ident(ACCUMULATOR_VAR.to_string()), span)
        };
        let not_strictly_false = |parser: &mut Self, operand: ExprId| {
            parser.alloc(
                ExprKind::Call {
                    target: None,
                    function: NOT_STRICTLY_FALSE.to_string(),
                    args: vec![operand],
                },
                span,
            )
        };

        let (origin, init, condition, step, result) = match name {
            "all" => {
                let init = self.alloc(ExprKind::Literal(Literal::Bool(true)), span);
                let operand = accu(self);
                let condition = not_strictly_false(self, operand);
                let lhs = accu(self);
                let step = self.alloc(
                    ExprKind::Binary {
                        op: BinaryOp::And,
                        lhs,
                        rhs: expr,
                    },
                    span,
                );
                let result = accu(self);
                ("all", init, condition, step, result)
            }
            "exists" => {
                let init = self.alloc(ExprKind::Literal(Literal::Bool(false)), span);
                let operand = accu(self);
                let negated = self.alloc(
                    ExprKind::Unary {
                        op: UnaryOp::Not,
                        operand,
                    },
                    span,
                );
                let condition = not_strictly_false(self, negated);
                let lhs = accu(self);
                let step = self.alloc(
                    ExprKind::Binary {
                        op: BinaryOp::Or,
                        lhs,
                        rhs: expr,
                    },
                    span,
                );
                let result = accu(self);
                ("exists", init, condition, step, result)
            }
            "exists_one" => {
                let init = self.alloc(ExprKind::Literal(Literal::Int(0)), span);
                let condition = self.alloc(ExprKind::Literal(Literal::Bool(true)), span);
                let lhs = accu(self);
                let one = self.alloc(ExprKind::Literal(Literal::Int(1)), span);
                let incremented = self.alloc(
                    ExprKind::Binary {
                        op: BinaryOp::Add,
                        lhs,
                        rhs: one,
                    },
                    span,
                );
                let falsy = accu(self);
                let step = self.alloc(
                    ExprKind::Ternary {
                        condition: expr,
                        truthy: incremented,
                        falsy,
                    },
                    span,
                );
                let result_lhs = accu(self);
                let result_one = self.alloc(ExprKind::Literal(Literal::Int(1)), span);
                let result = self.alloc(
                    ExprKind::Binary {
                        op: BinaryOp::Equal,
                        lhs: result_lhs,
                        rhs: result_one,
                    },
                    span,
                );
                ("exists_one", init, condition, step, result)
            }
            "map" | "filter" => {
                let init = self.alloc(ExprKind::List { elements: vec![] }, span);
                let condition = self.alloc(ExprKind::Literal(Literal::Bool(true)), span);
                let element = if name == "filter" {
                    self.alloc(ExprKind::Ident(iter_var.clone()), span)
                } else {
                    expr
                };
                let single = self.alloc(
                    ExprKind::List {
                        elements: vec![element],
                    },
                    span,
                );
                let lhs = accu(self);
                let appended = self.alloc(
                    ExprKind::Binary {
                        op: BinaryOp::Add,
                        lhs,
                        rhs: single,
                    },
                    span,
                );
                let step = match (name, filter) {
                    ("filter", _) => {
                        let falsy = accu(self);
                        self.alloc(
                            ExprKind::Ternary {
                                condition: expr,
                                truthy: appended,
                                falsy,
                            },
                            span,
                        )
                    }
                    ("map", Some(filter)) => {
                        let falsy = accu(self);
                        self.alloc(
                            ExprKind::Ternary {
                                condition: filter,
                                truthy: appended,
                                falsy,
                            },
                            span,
                        )
                    }
                    _ => appended,
                };
                let result = accu(self);
                (if name == "map" { "map" } else { "filter" }, init, condition, step, result)
            }
            _ => unreachable!("caller should pass a macro name"),
        };

        let id = self.alloc(
            ExprKind::Comprehension(Box::new(Comprehension {
                iter_var,
                range,
                accu_var: ACCUMULATOR_VAR.to_string(),
                init,
                condition,
                step,
                result,
            })),
            span,
        );
        self.ast.set_macro_origin(id, origin);
        id
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    /// Parses the source and asserts no diagnostics were produced.
    fn parse_ok(source: &str) -> ParseResult {
        let result = parse(source);
        assert_eq!(
            result
                .diagnostics
                .iter()
                .map(|d| d.message().to_string())
                .collect::<Vec<_>>(),
            Vec::<String>::new(),
            "expected no diagnostics parsing `{source}`"
        );
        result
    }

    #[test]
    fn parses_precedence() {
        let result = parse_ok("1 + 2 * 3");
        let root = result.ast.root().expect("should have a root");
        match result.ast.kind(root) {
            ExprKind::Binary {
                op: BinaryOp::Add,
                rhs,
                ..
            } => match result.ast.kind(*rhs) {
                ExprKind::Binary {
                    op: BinaryOp::Multiply,
                    ..
                } => {}
                kind => panic!("expected multiplication on the right, found {kind:?}"),
            },
            kind => panic!("expected addition at the root, found {kind:?}"),
        }
    }

    #[test]
    fn parses_ternary_right_associative() {
        let result = parse_ok("a ? b : c ? d : e");
        let root = result.ast.root().expect("should have a root");
        match result.ast.kind(root) {
            ExprKind::Ternary { falsy, .. } => {
                assert!(matches!(
                    result.ast.kind(*falsy),
                    ExprKind::Ternary { .. }
                ));
            }
            kind => panic!("expected a ternary at the root, found {kind:?}"),
        }
    }

    #[test]
    fn folds_negative_literals() {
        let result = parse_ok("-9223372036854775808");
        let root = result.ast.root().expect("should have a root");
        assert_eq!(
            *result.ast.kind(root),
            ExprKind::Literal(Literal::Int(i64::MIN))
        );
    }

    #[test]
    fn parses_message_literals() {
        let result = parse_ok("pkg.Msg{field: 1}");
        let root = result.ast.root().expect("should have a root");
        match result.ast.kind(root) {
            ExprKind::Message { type_name, fields } => {
                assert_eq!(type_name, "pkg.Msg");
                assert_eq!(fields.len(), 1);
                assert_eq!(fields[0].name, "field");
            }
            kind => panic!("expected a message literal at the root, found {kind:?}"),
        }
    }

    #[test]
    fn expands_the_has_macro() {
        let result = parse_ok("has(a.b)");
        let root = result.ast.root().expect("should have a root");
        match result.ast.kind(root) {
            ExprKind::Select { field, test, .. } => {
                assert_eq!(field, "b");
                assert!(*test);
            }
            kind => panic!("expected a test selection at the root, found {kind:?}"),
        }
        assert_eq!(result.ast.macro_origin(root), Some("has"));
    }

    #[test]
    fn expands_comprehension_macros() {
        let result = parse_ok("[1, 2].all(x, x > 0)");
        let root = result.ast.root().expect("should have a root");
        match result.ast.kind(root) {
            ExprKind::Comprehension(c) => {
                assert_eq!(c.iter_var, "x");
                assert_eq!(c.accu_var, ACCUMULATOR_VAR);
            }
            kind => panic!("expected a comprehension at the root, found {kind:?}"),
        }
        assert_eq!(result.ast.macro_origin(root), Some("all"));
    }

    #[test]
    fn reports_trailing_commas() {
        let result = parse("[1, 2,]");
        assert_eq!(result.diagnostics.len(), 1);
        assert_eq!(
            result.diagnostics[0].message(),
            "a trailing comma is not permitted"
        );
    }

    #[test]
    fn reports_reserved_words() {
        let result = parse("while");
        assert_eq!(result.diagnostics.len(), 1);
        assert!(result.diagnostics[0].message().contains("reserved word"));
    }

    #[test]
    fn enforces_the_nesting_limit() {
        let source = format!("{}1{}", "(".repeat(200), ")".repeat(200));
        let result = parse(&source);
        assert!(
            result
                .diagnostics
                .iter()
                .any(|d| d.message().contains("maximum nesting depth")),
            "expected a nesting depth diagnostic"
        );
    }

    #[test]
    fn recovers_after_errors() {
        let result = parse("1 + * 2");
        assert!(!result.diagnostics.is_empty());
        assert!(result.ast.root().is_some());
    }
}
