use std::collections::BTreeMap;

use thiserror::Error;

use crate::{
    frontend::{
        SourceFile,
        intern::Symbol,
        lexer::{Keyword, Lexer, Span, Token, TokenKind},
    },
    index::Index,
    middle::{
        scalar::ScalarKind,
        shape::Shape,
        ssa::{BlockId, FunctionBody, Instruction, Literal, Module, Operand, Parameter},
        ty::{TypeError, VariableType},
    },
};

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{location}: {kind}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub span: Span,
    /// `file:line:column` of the start of the span
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseErrorKind {
    #[error("expected {expected} but found `{found}`")]
    Unexpected { expected: String, found: String },
    #[error("expected {expected} but reached end of file")]
    UnexpectedEof { expected: String },
    #[error("block label #{found} is out of order, expected #{expected}")]
    BlockOutOfOrder { expected: usize, found: usize },
    #[error("instruction appears before the first block label")]
    MissingBlockLabel,
    #[error("unknown scalar type `{0}`")]
    UnknownScalarKind(String),
    #[error("invalid number `{0}`")]
    InvalidNumber(String),
    #[error(transparent)]
    Type(#[from] TypeError),
}

#[derive(Debug)]
pub struct Parser<'source> {
    lexer: Lexer<'source>,
}

impl<'source> Parser<'source> {
    pub fn new(source_file: &'source SourceFile) -> Self {
        Self {
            lexer: Lexer::new(source_file),
        }
    }

    pub fn parse_module(source_file: &'source SourceFile) -> Result<Module, ParseError> {
        let mut parser = Self::new(source_file);
        let mut module = Module::default();

        while parser.lexer.peek().is_some() {
            module.functions.push(parser.parse_function()?);
        }

        Ok(module)
    }

    /// Parses a standalone type such as `double[1, ?]`
    pub fn parse_type_annotation(source_file: &'source SourceFile) -> Result<VariableType, ParseError> {
        let mut parser = Self::new(source_file);
        let ty = parser.parse_type()?;

        match parser.lexer.next() {
            Some(token) => Err(parser.unexpected(token, "end of type")),
            None => Ok(ty),
        }
    }

    fn error(&self, span: Span, kind: ParseErrorKind) -> ParseError {
        let source = self.lexer.source();
        let (line, column) = source.line_column_for_position(span.start);

        ParseError {
            kind,
            span,
            location: format!("{}:{line}:{column}", source.origin),
        }
    }

    fn unexpected(&self, token: Token, expected: &str) -> ParseError {
        self.error(
            token.span,
            ParseErrorKind::Unexpected {
                expected: expected.to_owned(),
                found: self.lexer.source().value_of_span(token.span).to_owned(),
            },
        )
    }

    fn eof(&self, expected: &str) -> ParseError {
        let position = self.lexer.position();

        self.error(
            Span::new(position, position),
            ParseErrorKind::UnexpectedEof {
                expected: expected.to_owned(),
            },
        )
    }

    fn expect_peek(&mut self, expecting: &str) -> Result<Token, ParseError> {
        self.lexer.peek().ok_or_else(|| self.eof(expecting))
    }

    fn expect_next(&mut self, expecting: &str) -> Result<Token, ParseError> {
        self.lexer.next().ok_or_else(|| self.eof(expecting))
    }

    fn expect_next_to_be(&mut self, kind: TokenKind, expecting: &str) -> Result<Token, ParseError> {
        let token = self.expect_next(expecting)?;

        if token.kind != kind {
            return Err(self.unexpected(token, expecting));
        }

        Ok(token)
    }

    fn expect_keyword(&mut self, keyword: Keyword, expecting: &str) -> Result<Token, ParseError> {
        self.expect_next_to_be(TokenKind::Keyword(keyword), expecting)
    }

    fn next_is(&mut self, kind: TokenKind) -> bool {
        self.lexer.peek().is_some_and(|t| t.kind == kind)
    }

    /// Consumes the next token if it is of the given kind
    fn eat(&mut self, kind: TokenKind) -> bool {
        let matches = self.next_is(kind);
        if matches {
            self.lexer.next();
        }

        matches
    }

    fn text(&self, token: Token) -> &'source str {
        self.lexer.source().value_of_span(token.span)
    }

    /// function [y, z] = name(a: int32, b)
    ///     blocks
    /// end
    fn parse_function(&mut self) -> Result<FunctionBody, ParseError> {
        self.expect_keyword(Keyword::Function, "function definition")?;

        let mut outputs = Vec::new();
        if self.next_is(TokenKind::OpenBracket) {
            outputs = self.parse_bracketed_identifiers()?;
            self.expect_next_to_be(TokenKind::Equals, "`=` after function outputs")?;
        } else if self
            .lexer
            .peek_nth(1)
            .is_some_and(|t| t.kind == TokenKind::Equals)
        {
            outputs.push(self.parse_identifier()?);
            self.expect_next_to_be(TokenKind::Equals, "`=` after function output")?;
        }

        let name = self.parse_identifier()?;
        let parameters = self.parse_parameters()?;
        let mut function = FunctionBody::new(name, parameters, outputs);

        loop {
            let token = self.expect_peek("block label or `end`")?;

            match token.kind {
                TokenKind::Keyword(Keyword::End) => {
                    self.lexer.next();
                    break;
                }
                TokenKind::Hash => self.parse_block(&mut function)?,
                _ => {
                    return Err(self.error(token.span, ParseErrorKind::MissingBlockLabel));
                }
            }
        }

        Ok(function)
    }

    /// (a: int32, b)
    fn parse_parameters(&mut self) -> Result<Vec<Parameter>, ParseError> {
        self.expect_next_to_be(TokenKind::OpenParen, "parameter list")?;

        let mut parameters = Vec::new();
        if self.eat(TokenKind::CloseParen) {
            return Ok(parameters);
        }

        loop {
            let name = self.parse_identifier()?;
            let ty = if self.eat(TokenKind::Colon) {
                Some(self.parse_type()?)
            } else {
                None
            };

            parameters.push(Parameter { name, ty });

            if !self.eat(TokenKind::Comma) {
                break;
            }
        }

        self.expect_next_to_be(TokenKind::CloseParen, "`)` after parameters")?;

        Ok(parameters)
    }

    /// #3: instructions
    fn parse_block(&mut self, function: &mut FunctionBody) -> Result<(), ParseError> {
        let label = self.parse_block_reference()?;
        self.expect_next_to_be(TokenKind::Colon, "`:` after block label")?;

        let expected = function.blocks.next_index();
        if label != expected {
            let token_span = Span::new(self.lexer.position(), self.lexer.position());
            return Err(self.error(
                token_span,
                ParseErrorKind::BlockOutOfOrder {
                    expected: expected.index(),
                    found: label.index(),
                },
            ));
        }

        let block = function.add_block();

        while let Some(token) = self.lexer.peek() {
            if matches!(
                token.kind,
                TokenKind::Hash | TokenKind::Keyword(Keyword::End)
            ) {
                break;
            }

            let instruction = self.parse_instruction()?;
            function.block_mut(block).push(instruction);
        }

        Ok(())
    }

    fn parse_instruction(&mut self) -> Result<Instruction, ParseError> {
        let token = self.expect_next("instruction")?;

        match token.kind {
            TokenKind::OpenBracket => {
                let destinations = self.parse_identifier_list(TokenKind::CloseBracket)?;
                self.expect_next_to_be(TokenKind::CloseBracket, "`]` after destinations")?;
                self.expect_next_to_be(TokenKind::Equals, "`=` after destinations")?;
                self.expect_keyword(Keyword::Call, "`call` with several destinations")?;
                self.parse_call(destinations)
            }
            TokenKind::Identifier => {
                let destination = Symbol::new(self.text(token));
                self.expect_next_to_be(TokenKind::Equals, "`=` after destination")?;
                self.parse_definition(destination)
            }
            TokenKind::Keyword(Keyword::Call) => self.parse_call(Vec::new()),
            TokenKind::Keyword(Keyword::Branch) => {
                let condition = self.parse_identifier()?;
                let [then_block, else_block, end_block] = self.parse_block_references()?;

                Ok(Instruction::Branch {
                    condition,
                    then_block,
                    else_block,
                    end_block,
                })
            }
            TokenKind::Keyword(Keyword::For) => {
                let induction = self.parse_identifier()?;
                self.expect_next_to_be(TokenKind::Equals, "`=` after induction variable")?;
                let start = self.parse_identifier()?;
                self.expect_next_to_be(TokenKind::Comma, "`,` after loop start")?;
                let interval = self.parse_identifier()?;
                self.expect_next_to_be(TokenKind::Comma, "`,` after loop interval")?;
                let end = self.parse_identifier()?;
                let [body, exit] = self.parse_block_references()?;

                Ok(Instruction::For {
                    induction,
                    start,
                    interval,
                    end,
                    body,
                    exit,
                })
            }
            TokenKind::Keyword(Keyword::While) => {
                let body = self.parse_block_reference()?;
                self.expect_next_to_be(TokenKind::Comma, "`,` after loop body")?;
                let exit = self.parse_block_reference()?;

                Ok(Instruction::While { body, exit })
            }
            TokenKind::Keyword(Keyword::Break) => Ok(Instruction::Break),
            TokenKind::Keyword(Keyword::Continue) => Ok(Instruction::Continue),
            TokenKind::Keyword(Keyword::ValidateTrue) => Ok(Instruction::ValidateTrue {
                condition: self.parse_identifier()?,
            }),
            _ => Err(self.unexpected(token, "instruction")),
        }
    }

    /// Right hand side of `destination = ...`
    fn parse_definition(&mut self, destination: Symbol) -> Result<Instruction, ParseError> {
        let token = self.expect_next("definition")?;

        match token.kind {
            TokenKind::IntegerLiteral | TokenKind::FloatLiteral => Ok(Instruction::Assign {
                destination,
                source: Operand::Literal(self.parse_literal(token)?),
            }),
            TokenKind::Identifier => Ok(Instruction::Assign {
                destination,
                source: Operand::Variable(Symbol::new(self.text(token))),
            }),
            TokenKind::Bang => {
                let word = self.expect_next_to_be(TokenKind::Identifier, "`undefined`")?;
                if self.text(word) != "undefined" {
                    return Err(self.unexpected(word, "`undefined`"));
                }

                Ok(Instruction::Undefined { destination })
            }
            TokenKind::Keyword(Keyword::Call) => self.parse_call(vec![destination]),
            TokenKind::Keyword(Keyword::Phi) => {
                let mut sources = BTreeMap::new();

                loop {
                    let block = self.parse_block_reference()?;
                    self.expect_next_to_be(TokenKind::Colon, "`:` in phi source")?;
                    sources.insert(block, self.parse_identifier()?);

                    if !self.eat(TokenKind::Comma) {
                        break;
                    }
                }

                Ok(Instruction::Phi {
                    destination,
                    sources,
                })
            }
            TokenKind::Keyword(keyword @ (Keyword::Get | Keyword::SimpleGet)) => {
                let (matrix, indices) = self.parse_access()?;

                Ok(match keyword {
                    Keyword::Get => Instruction::MatrixGet {
                        destination,
                        matrix,
                        indices,
                    },
                    _ => Instruction::SimpleGet {
                        destination,
                        matrix,
                        indices,
                    },
                })
            }
            TokenKind::Keyword(keyword @ (Keyword::Set | Keyword::SimpleSet)) => {
                let (matrix, indices) = self.parse_access()?;
                self.expect_next_to_be(TokenKind::Comma, "`,` before the stored value")?;
                let value = self.parse_identifier()?;

                Ok(match keyword {
                    Keyword::Set => Instruction::MatrixSet {
                        destination,
                        matrix,
                        indices,
                        value,
                    },
                    _ => Instruction::SimpleSet {
                        destination,
                        matrix,
                        indices,
                        value,
                    },
                })
            }
            TokenKind::Keyword(Keyword::End) => {
                let matrix = self.parse_identifier()?;
                self.expect_next_to_be(TokenKind::Comma, "`,` after matrix")?;
                let index = self.parse_usize()?;
                self.expect_next_to_be(TokenKind::Comma, "`,` after index position")?;
                let num_indices = self.parse_usize()?;

                Ok(Instruction::End {
                    destination,
                    matrix,
                    index,
                    num_indices,
                })
            }
            _ => Err(self.unexpected(token, "definition")),
        }
    }

    /// call f(a, b)
    fn parse_call(&mut self, destinations: Vec<Symbol>) -> Result<Instruction, ParseError> {
        let function = self.parse_identifier()?;
        self.expect_next_to_be(TokenKind::OpenParen, "`(` after function name")?;
        let arguments = self.parse_identifier_list(TokenKind::CloseParen)?;
        self.expect_next_to_be(TokenKind::CloseParen, "`)` after arguments")?;

        Ok(Instruction::Call {
            destinations,
            function,
            arguments,
        })
    }

    /// A(i, j)
    fn parse_access(&mut self) -> Result<(Symbol, Vec<Symbol>), ParseError> {
        let matrix = self.parse_identifier()?;
        self.expect_next_to_be(TokenKind::OpenParen, "`(` after matrix")?;
        let indices = self.parse_identifier_list(TokenKind::CloseParen)?;
        self.expect_next_to_be(TokenKind::CloseParen, "`)` after indices")?;

        Ok((matrix, indices))
    }

    fn parse_identifier(&mut self) -> Result<Symbol, ParseError> {
        let token = self.expect_next_to_be(TokenKind::Identifier, "identifier")?;

        Ok(Symbol::new(self.text(token)))
    }

    /// Comma separated identifiers up to, but excluding, `terminator`
    fn parse_identifier_list(&mut self, terminator: TokenKind) -> Result<Vec<Symbol>, ParseError> {
        let mut identifiers = Vec::new();

        if self.next_is(terminator) {
            return Ok(identifiers);
        }

        loop {
            identifiers.push(self.parse_identifier()?);

            if !self.eat(TokenKind::Comma) {
                return Ok(identifiers);
            }
        }
    }

    fn parse_bracketed_identifiers(&mut self) -> Result<Vec<Symbol>, ParseError> {
        self.expect_next_to_be(TokenKind::OpenBracket, "`[`")?;
        let identifiers = self.parse_identifier_list(TokenKind::CloseBracket)?;
        self.expect_next_to_be(TokenKind::CloseBracket, "`]`")?;

        Ok(identifiers)
    }

    fn parse_block_reference(&mut self) -> Result<BlockId, ParseError> {
        self.expect_next_to_be(TokenKind::Hash, "block reference")?;

        Ok(BlockId::new(self.parse_usize()?))
    }

    /// , #1, #2 ...
    fn parse_block_references<const N: usize>(&mut self) -> Result<[BlockId; N], ParseError> {
        let mut blocks = [BlockId::ENTRY; N];

        for block in &mut blocks {
            self.expect_next_to_be(TokenKind::Comma, "`,` before block reference")?;
            *block = self.parse_block_reference()?;
        }

        Ok(blocks)
    }

    fn parse_usize(&mut self) -> Result<usize, ParseError> {
        let token = self.expect_next_to_be(TokenKind::IntegerLiteral, "integer")?;

        self.text(token).parse().map_err(|_| {
            self.error(
                token.span,
                ParseErrorKind::InvalidNumber(self.text(token).to_owned()),
            )
        })
    }

    fn parse_literal(&self, token: Token) -> Result<Literal, ParseError> {
        let text = self.text(token);
        let invalid = || self.error(token.span, ParseErrorKind::InvalidNumber(text.to_owned()));

        if token.kind == TokenKind::IntegerLiteral {
            if let Ok(value) = text.parse() {
                return Ok(Literal::Integer(value));
            }
        }

        text.parse().map(Literal::Float).map_err(|_| invalid())
    }

    fn parse_number(&mut self) -> Result<f64, ParseError> {
        let token = self.expect_next("number")?;

        match token.kind {
            TokenKind::IntegerLiteral | TokenKind::FloatLiteral => {
                Ok(self.parse_literal(token)?.value())
            }
            _ => Err(self.unexpected(token, "number")),
        }
    }

    fn parse_scalar_kind(&mut self) -> Result<ScalarKind, ParseError> {
        let token = self.expect_next_to_be(TokenKind::Identifier, "scalar type")?;

        self.text(token).parse().map_err(|_| {
            self.error(
                token.span,
                ParseErrorKind::UnknownScalarKind(self.text(token).to_owned()),
            )
        })
    }

    /// int32, int32 (3), complex<double>, double[2, ?], static int8[2, 2]
    fn parse_type(&mut self) -> Result<VariableType, ParseError> {
        let first = self.expect_peek("type")?;
        let is_static = first.kind == TokenKind::Keyword(Keyword::Static);
        if is_static {
            self.lexer.next();
        }

        let token = self.expect_peek("type")?;
        if !is_static && token.kind == TokenKind::Identifier && self.text(token) == "complex" {
            self.lexer.next();
            self.expect_next_to_be(TokenKind::LessThan, "`<` after complex")?;
            let kind = self.parse_scalar_kind()?;
            self.expect_next_to_be(TokenKind::GreaterThan, "`>` after complex element type")?;

            return Ok(VariableType::complex(kind));
        }

        let kind = self.parse_scalar_kind()?;

        if !self.next_is(TokenKind::OpenBracket) {
            if is_static {
                let token = self.expect_peek("shape of static matrix")?;
                return Err(self.unexpected(token, "shape of static matrix"));
            }

            if self.eat(TokenKind::OpenParen) {
                let value = self.parse_number()?;
                self.expect_next_to_be(TokenKind::CloseParen, "`)` after constant")?;

                return Ok(VariableType::scalar_constant(kind, value));
            }

            return Ok(VariableType::scalar(kind));
        }

        let start = self.expect_peek("shape")?.span;
        let shape = self.parse_shape()?;

        if is_static {
            return VariableType::static_matrix(kind, shape)
                .map_err(|e| self.error(start, ParseErrorKind::Type(e)));
        }

        Ok(VariableType::dynamic_matrix(kind, shape))
    }

    /// [*], [1d], [square], [2, ?], [2, 2] {1, 2, 3, 4}
    fn parse_shape(&mut self) -> Result<Shape, ParseError> {
        let open = self.expect_next_to_be(TokenKind::OpenBracket, "shape")?;
        let token = self.expect_peek("shape dimensions")?;

        let special = match token.kind {
            TokenKind::Asterisk => Some(Shape::undefined()),
            TokenKind::Identifier if self.text(token) == "square" => {
                Some(Shape::undefined_square())
            }
            TokenKind::IntegerLiteral
                if self.text(token) == "1"
                    && self.lexer.peek_nth(1).is_some_and(|next| {
                        next.kind == TokenKind::Identifier
                            && next.span.start == token.span.end
                            && self.text(next) == "d"
                    }) =>
            {
                self.lexer.next();
                Some(Shape::new_1d())
            }
            _ => None,
        };

        if let Some(shape) = special {
            self.lexer.next();
            self.expect_next_to_be(TokenKind::CloseBracket, "`]` after shape")?;
            return Ok(shape);
        }

        let mut dims = Vec::new();
        loop {
            if self.eat(TokenKind::Question) {
                dims.push(None);
            } else {
                dims.push(Some(self.parse_usize()?));
            }

            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.expect_next_to_be(TokenKind::CloseBracket, "`]` after dimensions")?;

        if !self.eat(TokenKind::OpenBrace) {
            return Ok(Shape::from_dims(dims));
        }

        let mut values = Vec::new();
        loop {
            values.push(self.parse_number()?);

            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.expect_next_to_be(TokenKind::CloseBrace, "`}` after values")?;

        let literal_dims = dims.iter().copied().collect::<Option<Vec<_>>>().unwrap_or_default();
        Shape::with_values(&literal_dims, values)
            .map_err(|e| self.error(open.span, ParseErrorKind::Type(e.into())))
    }
}
