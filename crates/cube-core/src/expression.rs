//! Query expressions: the compiler seam and the default grammar.
//!
//! The query engine only needs three things from a compiled expression:
//! the event type, extra predicates for the range filter, and the payload
//! fields to project. [`ExpressionCompiler`] is the seam; [`DefaultCompiler`]
//! implements this grammar:
//!
//! ```text
//! expression := type [ "(" field { "," field } ")" ] { "." filter }
//! filter     := op "(" field "," literal ")"
//! op         := eq | ne | lt | le | gt | ge | re | in
//! field      := identifier { "." identifier }
//! literal    := JSON literal
//! ```
//!
//! For example `request(path, status).eq(method, "GET").ge(status, 500)`.

use cube_types::{CompareOp, FieldPath, Predicate, Projection, RangeFilter, TypeName};
use serde_json::Value;

/// A malformed expression, with the byte offset where parsing failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} at position {position}")]
pub struct ExpressionError {
    /// Byte offset into the source.
    pub position: usize,
    /// What was wrong.
    pub message: String,
}

impl ExpressionError {
    fn at(position: usize, message: impl Into<String>) -> Self {
        Self {
            position,
            message: message.into(),
        }
    }
}

/// The result of compiling an expression.
pub trait CompiledExpression: Send + Sync + 'static {
    /// The event type to query.
    fn event_type(&self) -> &TypeName;

    /// Add the expression's predicates to `filter`.
    fn augment_filter(&self, filter: &mut RangeFilter);

    /// Add the expression's projected fields to `projection`.
    fn declare_fields(&self, projection: &mut Projection);
}

/// Turns expression source into a [`CompiledExpression`].
pub trait ExpressionCompiler: Send + Sync + 'static {
    /// The compiled form.
    type Compiled: CompiledExpression;

    /// Compile `source`.
    ///
    /// # Errors
    ///
    /// Returns [`ExpressionError`] if the expression is malformed.
    fn compile(&self, source: &str) -> Result<Self::Compiled, ExpressionError>;
}

/// An expression compiled by [`DefaultCompiler`].
#[derive(Debug, Clone, PartialEq)]
pub struct EventExpression {
    event_type: TypeName,
    fields: Vec<FieldPath>,
    predicates: Vec<Predicate>,
}

impl EventExpression {
    /// Declared projection fields, in source order.
    pub fn fields(&self) -> &[FieldPath] {
        &self.fields
    }

    /// Filter predicates, in source order.
    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }
}

impl CompiledExpression for EventExpression {
    fn event_type(&self) -> &TypeName {
        &self.event_type
    }

    fn augment_filter(&self, filter: &mut RangeFilter) {
        for predicate in &self.predicates {
            filter.push(predicate.clone());
        }
    }

    fn declare_fields(&self, projection: &mut Projection) {
        for field in &self.fields {
            projection.add(field.clone());
        }
    }
}

/// Compiler for the built-in expression grammar.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCompiler;

impl ExpressionCompiler for DefaultCompiler {
    type Compiled = EventExpression;

    fn compile(&self, source: &str) -> Result<EventExpression, ExpressionError> {
        Parser::new(source).expression()
    }
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    const fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        self.src.get(self.pos..).unwrap_or_default()
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self, c: char) {
        self.pos = self.pos.saturating_add(c.len_utf8());
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.peek() {
            if !c.is_whitespace() {
                break;
            }
            self.bump(c);
        }
    }

    fn eat(&mut self, expected: char) -> bool {
        self.skip_ws();
        if self.peek() == Some(expected) {
            self.bump(expected);
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), ExpressionError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("`{expected}`")))
        }
    }

    fn unexpected(&self, wanted: &str) -> ExpressionError {
        match self.peek() {
            Some(c) => ExpressionError::at(self.pos, format!("expected {wanted}, found `{c}`")),
            None => ExpressionError::at(self.pos, format!("expected {wanted}, found end of input")),
        }
    }

    fn identifier(&mut self) -> Result<(usize, &'a str), ExpressionError> {
        self.skip_ws();
        let start = self.pos;
        while let Some(c) = self.peek() {
            let ok = if self.pos == start {
                c.is_ascii_alphabetic() || c == '_'
            } else {
                c.is_ascii_alphanumeric() || c == '_'
            };
            if !ok {
                break;
            }
            self.bump(c);
        }
        if self.pos == start {
            return Err(self.unexpected("an identifier"));
        }
        let ident = self.src.get(start..self.pos).unwrap_or_default();
        Ok((start, ident))
    }

    fn field(&mut self) -> Result<FieldPath, ExpressionError> {
        let mut path = vec![self.identifier()?.1.to_owned()];
        while self.peek() == Some('.') {
            self.bump('.');
            path.push(self.identifier()?.1.to_owned());
        }
        Ok(path)
    }

    fn literal(&mut self) -> Result<Value, ExpressionError> {
        self.skip_ws();
        let start = self.pos;
        let mut depth = 0_usize;
        let mut in_string = false;
        let mut escaped = false;

        while let Some(c) = self.peek() {
            if in_string {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == '"' {
                    in_string = false;
                }
            } else {
                match c {
                    '"' => in_string = true,
                    '[' | '{' => depth = depth.saturating_add(1),
                    ']' | '}' => depth = depth.saturating_sub(1),
                    ')' if depth == 0 => break,
                    _ => {}
                }
            }
            self.bump(c);
        }

        let text = self.src.get(start..self.pos).unwrap_or_default().trim();
        if text.is_empty() {
            return Err(self.unexpected("a literal"));
        }
        serde_json::from_str(text)
            .map_err(|e| ExpressionError::at(start, format!("invalid literal `{text}`: {e}")))
    }

    fn expression(mut self) -> Result<EventExpression, ExpressionError> {
        let (start, raw_type) = self.identifier()?;
        let event_type = TypeName::parse(raw_type)
            .map_err(|e| ExpressionError::at(start, e.to_string()))?;

        let mut fields = Vec::new();
        if self.eat('(') {
            loop {
                fields.push(self.field()?);
                if self.eat(',') {
                    continue;
                }
                self.expect(')')?;
                break;
            }
        }

        let mut predicates = Vec::new();
        loop {
            self.skip_ws();
            if self.peek().is_none() {
                break;
            }
            self.expect('.')?;
            let (op_start, op_name) = self.identifier()?;
            let op = CompareOp::from_name(op_name).ok_or_else(|| {
                ExpressionError::at(op_start, format!("unknown filter `{op_name}`"))
            })?;
            self.expect('(')?;
            let path = self.field()?;
            self.expect(',')?;
            let value = self.literal()?;
            self.expect(')')?;
            let predicate = Predicate::new(path, op, value)
                .map_err(|e| ExpressionError::at(op_start, e.to_string()))?;
            predicates.push(predicate);
        }

        Ok(EventExpression {
            event_type,
            fields,
            predicates,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use serde_json::json;

    use super::*;

    fn compile(src: &str) -> Result<EventExpression, ExpressionError> {
        DefaultCompiler.compile(src)
    }

    fn path(s: &str) -> FieldPath {
        s.split('.').map(str::to_owned).collect()
    }

    #[test]
    fn bare_type() {
        let expr = compile("click").unwrap();
        assert_eq!(expr.event_type().as_str(), "click");
        assert!(expr.fields().is_empty());
        assert!(expr.predicates().is_empty());
    }

    #[test]
    fn fields_and_filters() {
        let expr =
            compile(r#" request(path, user.id).eq(method, "GET").ge(status, 500).in(host, ["a", "b"]) "#)
                .unwrap();
        assert_eq!(expr.fields(), &[path("path"), path("user.id")]);
        let ops: Vec<CompareOp> = expr.predicates().iter().map(|p| p.op).collect();
        assert_eq!(ops, vec![CompareOp::Eq, CompareOp::Ge, CompareOp::In]);
        assert_eq!(expr.predicates()[1].value, json!(500));
        assert_eq!(expr.predicates()[2].value, json!(["a", "b"]));
    }

    #[test]
    fn literal_with_parens_inside_string() {
        let expr = compile(r#"log.re(message, "^err(or)?\\)")"#).unwrap();
        assert_eq!(expr.predicates()[0].value, json!("^err(or)?\\)"));
    }

    #[test]
    fn augment_and_declare() {
        let expr = compile("click(x).gt(x, 0)").unwrap();
        let mut filter = RangeFilter::new(
            cube_types::Timestamp::from_timestamp_millis(0).unwrap(),
            cube_types::Timestamp::from_timestamp_millis(1).unwrap(),
        );
        let mut projection = Projection::new();
        expr.augment_filter(&mut filter);
        expr.declare_fields(&mut projection);
        assert_eq!(filter.predicates.len(), 1);
        assert!(!projection.is_whole_payload());
    }

    #[test]
    fn errors_carry_positions() {
        let err = compile("Click").unwrap_err();
        assert_eq!(err.position, 0);

        let err = compile("click.between(x, 1)").unwrap_err();
        assert_eq!(err.position, 6);
        assert!(err.message.contains("between"));

        let err = compile("click(x").unwrap_err();
        assert_eq!(err.position, 7);

        let err = compile("click.eq(x, nope)").unwrap_err();
        assert_eq!(err.position, 12);

        let err = compile("click.re(x, \"(\")").unwrap_err();
        assert_eq!(err.position, 6);

        assert!(compile("").is_err());
        assert!(compile("click.in(x, 3)").is_err());
    }
}
