//! Query transpiler: a restricted Python-style expression language lowered
//! to backend filter documents.
//!
//! Accepted subset: comparisons (`== < <= > >=`), membership (`in`),
//! logical `and`/`or` with parentheses, literals (int, float, string,
//! bool, None, list, dict), dotted field paths with subscripts,
//! `regex(field, pattern)` / `exists(field, bool)`, and arithmetic
//! (`+ - * / %`) inside comparisons. `not` and `!=` are rejected: their
//! missing-field semantics would be ambiguous between negated-match and
//! complement-match readings.

use std::collections::BTreeSet;

use serde_json::{json, Map, Value};

use crate::error::ApiError;

#[derive(Debug, thiserror::Error)]
pub enum TranspileError {
    /// The input is not parseable at all.
    #[error("Syntax error: {0}")]
    Syntax(String),
    /// The input parses but uses an unsupported construct.
    #[error("Value error: {0}")]
    Value(String),
}

impl From<TranspileError> for ApiError {
    fn from(err: TranspileError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

/// Transpile a filter expression into a backend filter document.
pub fn transpile_query(input: &str) -> Result<Value, TranspileError> {
    let tokens = lex(input)?;
    if tokens.is_empty() {
        return Err(TranspileError::Value("Empty query expression".to_string()));
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_or()?;
    if let Some(tok) = parser.peek() {
        // A complete expression followed by more input. Python-level
        // syntax like `18 is age` lands here; report it as an
        // unsupported construct rather than a parse failure.
        return Err(TranspileError::Value(format!(
            "Unsupported trailing input near {:?}",
            tok
        )));
    }
    lower_bool(&expr)
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Lt,
    Le,
    Gt,
    Ge,
    EqEq,
    NotEq,
    And,
    Or,
    Not,
    In,
    Is,
    True,
    False,
    NoneLit,
}

fn lex(input: &str) -> Result<Vec<Token>, TranspileError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '{' => {
                tokens.push(Token::LBrace);
                i += 1;
            }
            '}' => {
                tokens.push(Token::RBrace);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            ':' => {
                tokens.push(Token::Colon);
                i += 1;
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '%' => {
                tokens.push(Token::Percent);
                i += 1;
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Le);
                    i += 2;
                } else {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ge);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::EqEq);
                    i += 2;
                } else {
                    return Err(TranspileError::Syntax(
                        "Single '=' is not a comparison; use '=='".to_string(),
                    ));
                }
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::NotEq);
                    i += 2;
                } else {
                    return Err(TranspileError::Syntax("Unexpected character '!'".to_string()));
                }
            }
            '\'' | '"' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => {
                            return Err(TranspileError::Syntax(
                                "Unterminated string literal".to_string(),
                            ))
                        }
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some('\\') => {
                            let escaped = chars.get(i + 1).ok_or_else(|| {
                                TranspileError::Syntax("Unterminated escape".to_string())
                            })?;
                            s.push(match escaped {
                                'n' => '\n',
                                't' => '\t',
                                'r' => '\r',
                                '\\' => '\\',
                                '\'' => '\'',
                                '"' => '"',
                                other => *other,
                            });
                            i += 2;
                        }
                        Some(&ch) => {
                            s.push(ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(s));
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let mut is_float = false;
                if i < chars.len()
                    && chars[i] == '.'
                    && chars.get(i + 1).map(|c| c.is_ascii_digit()).unwrap_or(false)
                {
                    is_float = true;
                    i += 1;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
                let text: String = chars[start..i].iter().collect();
                if is_float {
                    let n: f64 = text.parse().map_err(|_| {
                        TranspileError::Syntax(format!("Invalid number: {}", text))
                    })?;
                    tokens.push(Token::Float(n));
                } else {
                    let n: i64 = text.parse().map_err(|_| {
                        TranspileError::Syntax(format!("Invalid number: {}", text))
                    })?;
                    tokens.push(Token::Int(n));
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "in" => Token::In,
                    "is" => Token::Is,
                    "True" => Token::True,
                    "False" => Token::False,
                    "None" => Token::NoneLit,
                    _ => Token::Ident(word),
                });
            }
            other => {
                return Err(TranspileError::Syntax(format!(
                    "Unexpected character {:?}",
                    other
                )))
            }
        }
    }

    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    /// Mirror the operator for a flipped operand order.
    fn flipped(self) -> CmpOp {
        match self {
            CmpOp::Lt => CmpOp::Gt,
            CmpOp::Le => CmpOp::Ge,
            CmpOp::Gt => CmpOp::Lt,
            CmpOp::Ge => CmpOp::Le,
            other => other,
        }
    }

    fn mongo_op(self) -> &'static str {
        match self {
            CmpOp::Eq => "$eq",
            CmpOp::Ne => "$ne",
            CmpOp::Lt => "$lt",
            CmpOp::Le => "$lte",
            CmpOp::Gt => "$gt",
            CmpOp::Ge => "$gte",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl ArithOp {
    fn mongo_op(self) -> &'static str {
        match self {
            ArithOp::Add => "$add",
            ArithOp::Sub => "$subtract",
            ArithOp::Mul => "$multiply",
            ArithOp::Div => "$divide",
            ArithOp::Mod => "$mod",
        }
    }
}

#[derive(Debug, Clone)]
enum Expr {
    Literal(Value),
    Field(String),
    Binary {
        op: ArithOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Compare {
        op: CmpOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    In {
        item: Box<Expr>,
        list: Box<Expr>,
    },
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Call {
        name: String,
        args: Vec<Expr>,
    },
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, expected: &Token) -> Result<(), TranspileError> {
        match self.bump() {
            Some(ref tok) if tok == expected => Ok(()),
            Some(tok) => Err(TranspileError::Syntax(format!(
                "Expected {:?}, found {:?}",
                expected, tok
            ))),
            None => Err(TranspileError::Syntax(format!(
                "Expected {:?}, found end of input",
                expected
            ))),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, TranspileError> {
        let mut terms = vec![self.parse_and()?];
        while self.peek() == Some(&Token::Or) {
            self.bump();
            terms.push(self.parse_and()?);
        }
        if terms.len() == 1 {
            Ok(terms.pop().unwrap())
        } else {
            Ok(Expr::Or(terms))
        }
    }

    fn parse_and(&mut self) -> Result<Expr, TranspileError> {
        let mut terms = vec![self.parse_comparison()?];
        while self.peek() == Some(&Token::And) {
            self.bump();
            terms.push(self.parse_comparison()?);
        }
        if terms.len() == 1 {
            Ok(terms.pop().unwrap())
        } else {
            Ok(Expr::And(terms))
        }
    }

    fn comparison_op(&self) -> Option<CmpOp> {
        match self.peek() {
            Some(Token::EqEq) => Some(CmpOp::Eq),
            Some(Token::NotEq) => Some(CmpOp::Ne),
            Some(Token::Lt) => Some(CmpOp::Lt),
            Some(Token::Le) => Some(CmpOp::Le),
            Some(Token::Gt) => Some(CmpOp::Gt),
            Some(Token::Ge) => Some(CmpOp::Ge),
            _ => None,
        }
    }

    fn parse_comparison(&mut self) -> Result<Expr, TranspileError> {
        if self.peek() == Some(&Token::Not) {
            return Err(TranspileError::Value(
                "'not' is not supported: negated filters are ambiguous for missing fields"
                    .to_string(),
            ));
        }

        let left = self.parse_additive()?;

        if self.peek() == Some(&Token::Is) {
            return Err(TranspileError::Value(
                "'is' comparisons are not supported".to_string(),
            ));
        }

        if self.peek() == Some(&Token::In) {
            self.bump();
            let list = self.parse_additive()?;
            return Ok(Expr::In {
                item: Box::new(left),
                list: Box::new(list),
            });
        }

        if let Some(op) = self.comparison_op() {
            self.bump();
            let right = self.parse_additive()?;
            if self.comparison_op().is_some() || self.peek() == Some(&Token::In) {
                return Err(TranspileError::Value(
                    "Chained comparisons are not supported".to_string(),
                ));
            }
            return Ok(Expr::Compare {
                op,
                left: Box::new(left),
                right: Box::new(right),
            });
        }

        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, TranspileError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => ArithOp::Add,
                Some(Token::Minus) => ArithOp::Sub,
                _ => break,
            };
            self.bump();
            let right = self.parse_multiplicative()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, TranspileError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => ArithOp::Mul,
                Some(Token::Slash) => ArithOp::Div,
                Some(Token::Percent) => ArithOp::Mod,
                _ => break,
            };
            self.bump();
            let right = self.parse_unary()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, TranspileError> {
        if self.peek() == Some(&Token::Minus) {
            self.bump();
            let inner = self.parse_unary()?;
            return match inner {
                Expr::Literal(Value::Number(n)) => {
                    if let Some(i) = n.as_i64() {
                        Ok(Expr::Literal(json!(-i)))
                    } else {
                        Ok(Expr::Literal(json!(-n.as_f64().unwrap_or(0.0))))
                    }
                }
                _ => Err(TranspileError::Value(
                    "Unary minus is only supported on numeric literals".to_string(),
                )),
            };
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, TranspileError> {
        match self.bump() {
            Some(Token::Int(n)) => Ok(Expr::Literal(json!(n))),
            Some(Token::Float(n)) => Ok(Expr::Literal(json!(n))),
            Some(Token::Str(s)) => Ok(Expr::Literal(json!(s))),
            Some(Token::True) => Ok(Expr::Literal(json!(true))),
            Some(Token::False) => Ok(Expr::Literal(json!(false))),
            Some(Token::NoneLit) => Ok(Expr::Literal(Value::Null)),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                self.eat(&Token::RParen)?;
                Ok(inner)
            }
            Some(Token::LBracket) => self.parse_list_literal(),
            Some(Token::LBrace) => self.parse_dict_literal(),
            Some(Token::Ident(name)) => self.parse_path_or_call(name),
            Some(tok) => Err(TranspileError::Syntax(format!(
                "Unexpected token {:?}",
                tok
            ))),
            None => Err(TranspileError::Syntax("Unexpected end of input".to_string())),
        }
    }

    fn parse_list_literal(&mut self) -> Result<Expr, TranspileError> {
        let mut items = Vec::new();
        if self.peek() == Some(&Token::RBracket) {
            self.bump();
            return Ok(Expr::Literal(Value::Array(items)));
        }
        loop {
            let element = self.parse_or()?;
            items.push(expr_to_literal(&element)?);
            match self.bump() {
                Some(Token::Comma) => continue,
                Some(Token::RBracket) => break,
                other => {
                    return Err(TranspileError::Syntax(format!(
                        "Expected ',' or ']' in list, found {:?}",
                        other
                    )))
                }
            }
        }
        Ok(Expr::Literal(Value::Array(items)))
    }

    fn parse_dict_literal(&mut self) -> Result<Expr, TranspileError> {
        let mut map = Map::new();
        if self.peek() == Some(&Token::RBrace) {
            self.bump();
            return Ok(Expr::Literal(Value::Object(map)));
        }
        loop {
            let key = match self.bump() {
                Some(Token::Str(s)) => s,
                other => {
                    return Err(TranspileError::Value(format!(
                        "Dict keys must be string literals, found {:?}",
                        other
                    )))
                }
            };
            self.eat(&Token::Colon)?;
            let value = self.parse_or()?;
            map.insert(key, expr_to_literal(&value)?);
            match self.bump() {
                Some(Token::Comma) => continue,
                Some(Token::RBrace) => break,
                other => {
                    return Err(TranspileError::Syntax(format!(
                        "Expected ',' or '}}' in dict, found {:?}",
                        other
                    )))
                }
            }
        }
        Ok(Expr::Literal(Value::Object(map)))
    }

    fn parse_path_or_call(&mut self, name: String) -> Result<Expr, TranspileError> {
        // Bare identifier followed by '(' is a function call.
        if self.peek() == Some(&Token::LParen) {
            self.bump();
            let mut args = Vec::new();
            if self.peek() == Some(&Token::RParen) {
                self.bump();
                return Ok(Expr::Call { name, args });
            }
            loop {
                args.push(self.parse_or()?);
                match self.bump() {
                    Some(Token::Comma) => continue,
                    Some(Token::RParen) => break,
                    other => {
                        return Err(TranspileError::Syntax(format!(
                            "Expected ',' or ')' in call, found {:?}",
                            other
                        )))
                    }
                }
            }
            return Ok(Expr::Call { name, args });
        }

        // Dotted path with optional subscripts; both forms lower to the
        // same dotted path.
        let mut path = name;
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.bump();
                    match self.bump() {
                        Some(Token::Ident(seg)) => {
                            path.push('.');
                            path.push_str(&seg);
                        }
                        // `a.in` etc. would be keyword tokens; reject.
                        other => {
                            return Err(TranspileError::Syntax(format!(
                                "Expected field name after '.', found {:?}",
                                other
                            )))
                        }
                    }
                }
                Some(Token::LBracket) => {
                    self.bump();
                    let segment = match self.bump() {
                        Some(Token::Int(n)) => n.to_string(),
                        Some(Token::Str(s)) => s,
                        other => {
                            return Err(TranspileError::Value(format!(
                                "Subscripts must be integer or string literals, found {:?}",
                                other
                            )))
                        }
                    };
                    self.eat(&Token::RBracket)?;
                    path.push('.');
                    path.push_str(&segment);
                }
                _ => break,
            }
        }
        Ok(Expr::Field(path))
    }
}

fn expr_to_literal(expr: &Expr) -> Result<Value, TranspileError> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        _ => Err(TranspileError::Value(
            "Container literals may only contain literals".to_string(),
        )),
    }
}

// ---------------------------------------------------------------------------
// Lowering
// ---------------------------------------------------------------------------

fn lower_bool(expr: &Expr) -> Result<Value, TranspileError> {
    match expr {
        Expr::And(terms) => {
            let lowered: Vec<Value> = terms.iter().map(lower_bool).collect::<Result<_, _>>()?;
            Ok(json!({ "$and": lowered }))
        }
        Expr::Or(terms) => {
            let lowered: Vec<Value> = terms.iter().map(lower_bool).collect::<Result<_, _>>()?;
            Ok(json!({ "$or": lowered }))
        }
        Expr::In { item, list } => {
            let field = match item.as_ref() {
                Expr::Field(path) => path,
                _ => {
                    return Err(TranspileError::Value(
                        "Left side of 'in' must be a field".to_string(),
                    ))
                }
            };
            let list = match list.as_ref() {
                Expr::Literal(Value::Array(items)) => items.clone(),
                _ => {
                    return Err(TranspileError::Value(
                        "Right side of 'in' must be a list literal".to_string(),
                    ))
                }
            };
            Ok(json!({ field.as_str(): { "$in": list } }))
        }
        Expr::Call { name, args } => lower_call(name, args),
        Expr::Compare { op, left, right } => lower_compare(*op, left, right),
        Expr::Field(path) => Err(TranspileError::Value(format!(
            "Bare field reference '{}' is not a filter; compare it to something",
            path
        ))),
        Expr::Literal(_) | Expr::Binary { .. } => Err(TranspileError::Value(
            "Expression must be a comparison or logical combination".to_string(),
        )),
    }
}

fn lower_call(name: &str, args: &[Expr]) -> Result<Value, TranspileError> {
    match name {
        "regex" => {
            let [field, pattern] = args else {
                return Err(TranspileError::Value(format!(
                    "regex() takes exactly two arguments, got {}",
                    args.len()
                )));
            };
            let field = match field {
                Expr::Field(path) => path,
                _ => {
                    return Err(TranspileError::Value(
                        "regex() first argument must be a field".to_string(),
                    ))
                }
            };
            let pattern = match pattern {
                Expr::Literal(Value::String(s)) => s,
                _ => {
                    return Err(TranspileError::Value(
                        "regex() second argument must be a string literal".to_string(),
                    ))
                }
            };
            Ok(json!({ field.as_str(): { "$regex": pattern.as_str() } }))
        }
        "exists" => {
            let (field, wanted) = match args {
                [Expr::Field(path)] => (path, true),
                [Expr::Field(path), Expr::Literal(Value::Bool(b))] => (path, *b),
                _ => {
                    return Err(TranspileError::Value(
                        "exists() takes a field and an optional boolean".to_string(),
                    ))
                }
            };
            Ok(json!({ field.as_str(): { "$exists": wanted } }))
        }
        other => Err(TranspileError::Value(format!(
            "Unknown function: {}",
            other
        ))),
    }
}

fn lower_compare(op: CmpOp, left: &Expr, right: &Expr) -> Result<Value, TranspileError> {
    if op == CmpOp::Ne {
        return Err(TranspileError::Value(
            "'!=' is not supported: its missing-field semantics are ambiguous".to_string(),
        ));
    }

    // Simple field-vs-literal comparisons stay as index-friendly documents;
    // the reversed order is normalized by flipping the operator.
    match (left, right) {
        (Expr::Field(path), Expr::Literal(lit)) => return Ok(simple_compare(path, op, lit)),
        (Expr::Literal(lit), Expr::Field(path)) => {
            return Ok(simple_compare(path, op.flipped(), lit))
        }
        _ => {}
    }

    // Everything else (field-vs-field, arithmetic) becomes $expr with
    // $exists guards on every referenced field so that missing fields
    // never satisfy arithmetic predicates.
    let mut fields = BTreeSet::new();
    let lowered_left = lower_operand(left, &mut fields)?;
    let lowered_right = lower_operand(right, &mut fields)?;
    let expr = json!({ "$expr": { op.mongo_op(): [lowered_left, lowered_right] } });

    let mut guarded_paths = BTreeSet::new();
    for field in &fields {
        let mut prefix = String::new();
        for segment in field.split('.') {
            if !prefix.is_empty() {
                prefix.push('.');
            }
            prefix.push_str(segment);
            guarded_paths.insert(prefix.clone());
        }
    }

    if guarded_paths.is_empty() {
        return Ok(expr);
    }

    let mut clauses: Vec<Value> = guarded_paths
        .into_iter()
        .map(|path| json!({ path.as_str(): { "$exists": true } }))
        .collect();
    clauses.push(expr);
    Ok(json!({ "$and": clauses }))
}

fn simple_compare(path: &str, op: CmpOp, lit: &Value) -> Value {
    match op {
        CmpOp::Eq => json!({ path: lit }),
        other => json!({ path: { other.mongo_op(): lit } }),
    }
}

fn lower_operand(expr: &Expr, fields: &mut BTreeSet<String>) -> Result<Value, TranspileError> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Field(path) => {
            fields.insert(path.clone());
            Ok(Value::String(format!("${}", path)))
        }
        Expr::Binary { op, left, right } => {
            let l = lower_operand(left, fields)?;
            let r = lower_operand(right, fields)?;
            Ok(json!({ op.mongo_op(): [l, r] }))
        }
        _ => Err(TranspileError::Value(
            "Unsupported construct inside a comparison operand".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_comparisons() {
        assert_eq!(transpile_query("age > 18").unwrap(), json!({"age": {"$gt": 18}}));
        assert_eq!(transpile_query("age >= 18").unwrap(), json!({"age": {"$gte": 18}}));
        assert_eq!(transpile_query("age < 18").unwrap(), json!({"age": {"$lt": 18}}));
        assert_eq!(
            transpile_query("args.age <= 18").unwrap(),
            json!({"args.age": {"$lte": 18}})
        );
        assert_eq!(transpile_query("age == 18").unwrap(), json!({"age": 18}));
    }

    #[test]
    fn reversed_operand_order_is_normalized() {
        assert_eq!(transpile_query("18 < age").unwrap(), json!({"age": {"$gt": 18}}));
        assert_eq!(transpile_query("18 == age").unwrap(), json!({"age": 18}));
        assert_eq!(
            transpile_query("18 < age.foo").unwrap(),
            json!({"age.foo": {"$gt": 18}})
        );
    }

    #[test]
    fn string_bool_none_literals() {
        assert_eq!(
            transpile_query("name == 'John'").unwrap(),
            json!({"name": "John"})
        );
        assert_eq!(
            transpile_query("active == True").unwrap(),
            json!({"active": true})
        );
        assert_eq!(
            transpile_query("active == False").unwrap(),
            json!({"active": false})
        );
        assert_eq!(
            transpile_query("value == None").unwrap(),
            json!({"value": null})
        );
    }

    #[test]
    fn list_and_dict_literals() {
        assert_eq!(
            transpile_query("tags == ['python', 'mongodb']").unwrap(),
            json!({"tags": ["python", "mongodb"]})
        );
        assert_eq!(
            transpile_query("info == {'name': 'John', 'age': 18}").unwrap(),
            json!({"info": {"name": "John", "age": 18}})
        );
    }

    #[test]
    fn logical_operators() {
        assert_eq!(
            transpile_query("age > 18 and 'John' == name.first").unwrap(),
            json!({"$and": [{"age": {"$gt": 18}}, {"name.first": "John"}]})
        );
        assert_eq!(
            transpile_query("age < 18 or name.first == 'John'").unwrap(),
            json!({"$or": [{"age": {"$lt": 18}}, {"name.first": "John"}]})
        );
    }

    #[test]
    fn multi_term_and_nested_logic() {
        assert_eq!(
            transpile_query("age.a > 18 and 65 > age.b and status == 'active'").unwrap(),
            json!({"$and": [
                {"age.a": {"$gt": 18}},
                {"age.b": {"$lt": 65}},
                {"status": "active"},
            ]})
        );
        assert_eq!(
            transpile_query("(age > 18 and age < 65) or status == 'special'").unwrap(),
            json!({"$or": [
                {"$and": [{"age": {"$gt": 18}}, {"age": {"$lt": 65}}]},
                {"status": "special"},
            ]})
        );
    }

    #[test]
    fn membership() {
        assert_eq!(
            transpile_query("status in ['active', 'pending']").unwrap(),
            json!({"status": {"$in": ["active", "pending"]}})
        );
        assert_eq!(
            transpile_query("tags in []").unwrap(),
            json!({"tags": {"$in": []}})
        );
    }

    #[test]
    fn regex_and_exists() {
        assert_eq!(
            transpile_query("regex(name, '^J.*')").unwrap(),
            json!({"name": {"$regex": "^J.*"}})
        );
        assert_eq!(
            transpile_query("exists(email)").unwrap(),
            json!({"email": {"$exists": true}})
        );
        assert_eq!(
            transpile_query("exists(foo.bar, False)").unwrap(),
            json!({"foo.bar": {"$exists": false}})
        );
        assert_eq!(
            transpile_query("regex(name, '^J.*') and exists(email)").unwrap(),
            json!({"$and": [
                {"name": {"$regex": "^J.*"}},
                {"email": {"$exists": true}},
            ]})
        );
    }

    #[test]
    fn field_vs_field_gets_exists_guards() {
        assert_eq!(
            transpile_query("foo > bar").unwrap(),
            json!({"$and": [
                {"bar": {"$exists": true}},
                {"foo": {"$exists": true}},
                {"$expr": {"$gt": ["$foo", "$bar"]}},
            ]})
        );
    }

    #[test]
    fn nested_field_guards_include_prefixes() {
        assert_eq!(
            transpile_query("foo.a > bar.b").unwrap(),
            json!({"$and": [
                {"bar": {"$exists": true}},
                {"bar.b": {"$exists": true}},
                {"foo": {"$exists": true}},
                {"foo.a": {"$exists": true}},
                {"$expr": {"$gt": ["$foo.a", "$bar.b"]}},
            ]})
        );
    }

    #[test]
    fn arithmetic_lowered_to_expr() {
        assert_eq!(
            transpile_query("args.foo + args.bar == 15").unwrap(),
            json!({"$and": [
                {"args": {"$exists": true}},
                {"args.bar": {"$exists": true}},
                {"args.foo": {"$exists": true}},
                {"$expr": {"$eq": [{"$add": ["$args.foo", "$args.bar"]}, 15]}},
            ]})
        );
        assert_eq!(
            transpile_query("quantity * price > 1000").unwrap(),
            json!({"$and": [
                {"price": {"$exists": true}},
                {"quantity": {"$exists": true}},
                {"$expr": {"$gt": [{"$multiply": ["$quantity", "$price"]}, 1000]}},
            ]})
        );
    }

    #[test]
    fn arithmetic_precedence_and_parentheses() {
        assert_eq!(
            transpile_query("a + b * c > 100").unwrap(),
            json!({"$and": [
                {"a": {"$exists": true}},
                {"b": {"$exists": true}},
                {"c": {"$exists": true}},
                {"$expr": {"$gt": [{"$add": ["$a", {"$multiply": ["$b", "$c"]}]}, 100]}},
            ]})
        );
        assert_eq!(
            transpile_query("(a + b) * c > 100").unwrap(),
            json!({"$and": [
                {"a": {"$exists": true}},
                {"b": {"$exists": true}},
                {"c": {"$exists": true}},
                {"$expr": {"$gt": [{"$multiply": [{"$add": ["$a", "$b"]}, "$c"]}, 100]}},
            ]})
        );
    }

    #[test]
    fn subscripts_lower_to_dotted_paths() {
        assert_eq!(
            transpile_query("a[2] == 1").unwrap(),
            json!({"a.2": 1})
        );
        assert_eq!(
            transpile_query("a['k'] == 1").unwrap(),
            json!({"a.k": 1})
        );
        assert_eq!(
            transpile_query("a['k'].b == 1").unwrap(),
            json!({"a.k.b": 1})
        );
    }

    #[test]
    fn whitespace_insensitive() {
        assert_eq!(
            transpile_query("age>18").unwrap(),
            transpile_query("age > 18").unwrap()
        );
        assert_eq!(
            transpile_query("age>18 and name=='John'").unwrap(),
            transpile_query("age > 18 and name == 'John'").unwrap()
        );
        let multiline = "(\n  age > 18 and\n  name == 'John'\n)";
        assert_eq!(
            transpile_query(multiline).unwrap(),
            transpile_query("(age > 18 and name == 'John')").unwrap()
        );
    }

    #[test]
    fn escaped_and_unicode_strings() {
        assert_eq!(
            transpile_query("name == '\u{4f60}\u{597d}'").unwrap(),
            json!({"name": "你好"})
        );
        assert_eq!(
            transpile_query(r"path == 'C:\\Users\\John'").unwrap(),
            json!({"path": "C:\\Users\\John"})
        );
    }

    #[test]
    fn value_errors() {
        // recognized Python syntax, unsupported constructs
        assert!(matches!(
            transpile_query("18 is age"),
            Err(TranspileError::Value(_))
        ));
        assert!(matches!(
            transpile_query("18 < age < 65"),
            Err(TranspileError::Value(_))
        ));
        assert!(matches!(
            transpile_query("unknown_function(field, 1)"),
            Err(TranspileError::Value(_))
        ));
        assert!(matches!(
            transpile_query("regex(name)"),
            Err(TranspileError::Value(_))
        ));
        assert!(matches!(transpile_query(""), Err(TranspileError::Value(_))));
        assert!(matches!(
            transpile_query("foo.bar"),
            Err(TranspileError::Value(_))
        ));
        assert!(matches!(
            transpile_query("'a string'"),
            Err(TranspileError::Value(_))
        ));
        assert!(matches!(
            transpile_query("not age > 18"),
            Err(TranspileError::Value(_))
        ));
        assert!(matches!(
            transpile_query("age != 18"),
            Err(TranspileError::Value(_))
        ));
    }

    #[test]
    fn syntax_errors() {
        assert!(matches!(
            transpile_query("foo.bar - < ,"),
            Err(TranspileError::Syntax(_))
        ));
        assert!(matches!(
            transpile_query("name == 'unterminated"),
            Err(TranspileError::Syntax(_))
        ));
        assert!(matches!(
            transpile_query("(age > 18"),
            Err(TranspileError::Syntax(_))
        ));
    }
}
