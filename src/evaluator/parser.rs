use crate::error::{AssistantError, Result};
use crate::evaluator::lexer::Token;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    BitAnd,
    BitOr,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Invert,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    None,
    Name(String),
    List(Vec<Expr>),
    Attr {
        target: Box<Expr>,
        name: String,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
    },
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

/// Recursive-descent parser using Python operator precedence, lowest first:
/// `or`, `and`, `not`, comparisons, `|`, `&`, `+ -`, `* / %`, unary, postfix.
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    pub fn parse(mut self) -> Result<Expr> {
        if self.tokens.is_empty() {
            return Err(syntax("empty expression"));
        }
        let expr = self.parse_or()?;
        if let Some(token) = self.peek() {
            return Err(syntax(&format!("unexpected token {:?}", token)));
        }
        Ok(expr)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        if self.eat(&expected) {
            Ok(())
        } else {
            Err(syntax(&format!("expected {:?}, found {:?}", expected, self.peek())))
        }
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while self.eat(&Token::Or) {
            let right = self.parse_and()?;
            left = binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_not()?;
        while self.eat(&Token::And) {
            let right = self.parse_not()?;
            left = binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr> {
        if self.eat(&Token::Not) {
            let operand = self.parse_not()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let left = self.parse_bitor()?;
        let op = match self.peek() {
            Some(Token::EqEq) => BinaryOp::Eq,
            Some(Token::NotEq) => BinaryOp::NotEq,
            Some(Token::Lt) => BinaryOp::Lt,
            Some(Token::Le) => BinaryOp::Le,
            Some(Token::Gt) => BinaryOp::Gt,
            Some(Token::Ge) => BinaryOp::Ge,
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.parse_bitor()?;
        if matches!(
            self.peek(),
            Some(Token::EqEq | Token::NotEq | Token::Lt | Token::Le | Token::Gt | Token::Ge)
        ) {
            return Err(syntax("chained comparisons are not supported; use parentheses with & or |"));
        }
        Ok(binary(op, left, right))
    }

    fn parse_bitor(&mut self) -> Result<Expr> {
        let mut left = self.parse_bitand()?;
        while self.eat(&Token::Pipe) {
            let right = self.parse_bitand()?;
            left = binary(BinaryOp::BitOr, left, right);
        }
        Ok(left)
    }

    fn parse_bitand(&mut self) -> Result<Expr> {
        let mut left = self.parse_arith()?;
        while self.eat(&Token::Amp) {
            let right = self.parse_arith()?;
            left = binary(BinaryOp::BitAnd, left, right);
        }
        Ok(left)
    }

    fn parse_arith(&mut self) -> Result<Expr> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_term()?;
            left = binary(op, left, right);
        }
    }

    fn parse_term(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Mod,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_unary()?;
            left = binary(op, left, right);
        }
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        let op = match self.peek() {
            Some(Token::Minus) => UnaryOp::Neg,
            Some(Token::Tilde) => UnaryOp::Invert,
            Some(Token::Plus) => {
                self.pos += 1;
                return self.parse_unary();
            }
            _ => return self.parse_postfix(),
        };
        self.pos += 1;
        let operand = self.parse_unary()?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let mut expr = self.parse_atom()?;
        loop {
            if self.eat(&Token::Dot) {
                match self.advance() {
                    Some(Token::Ident(name)) => {
                        expr = Expr::Attr {
                            target: Box::new(expr),
                            name,
                        }
                    }
                    other => return Err(syntax(&format!("expected attribute name, found {:?}", other))),
                }
            } else if self.eat(&Token::LParen) {
                let (args, kwargs) = self.parse_arguments()?;
                expr = Expr::Call {
                    func: Box::new(expr),
                    args,
                    kwargs,
                };
            } else if self.eat(&Token::LBracket) {
                let index = self.parse_or()?;
                let index = if self.peek() == Some(&Token::Comma) {
                    let mut items = vec![index];
                    while self.eat(&Token::Comma) {
                        if self.peek() == Some(&Token::RBracket) {
                            break;
                        }
                        items.push(self.parse_or()?);
                    }
                    Expr::List(items)
                } else {
                    index
                };
                self.expect(Token::RBracket)?;
                expr = Expr::Index {
                    target: Box::new(expr),
                    index: Box::new(index),
                };
            } else {
                return Ok(expr);
            }
        }
    }

    /// Arguments after an opening parenthesis, through the closing one.
    fn parse_arguments(&mut self) -> Result<(Vec<Expr>, Vec<(String, Expr)>)> {
        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok((args, kwargs));
        }
        loop {
            let kwarg_name = match (self.peek(), self.peek_at(1)) {
                (Some(Token::Ident(name)), Some(Token::Assign)) => Some(name.clone()),
                _ => None,
            };
            if let Some(name) = kwarg_name {
                self.pos += 2;
                kwargs.push((name, self.parse_or()?));
            } else {
                if !kwargs.is_empty() {
                    return Err(syntax("positional argument follows keyword argument"));
                }
                args.push(self.parse_or()?);
            }
            if self.eat(&Token::RParen) {
                return Ok((args, kwargs));
            }
            self.expect(Token::Comma)?;
            if self.eat(&Token::RParen) {
                return Ok((args, kwargs));
            }
        }
    }

    fn parse_atom(&mut self) -> Result<Expr> {
        match self.advance() {
            Some(Token::Int(v)) => Ok(Expr::Int(v)),
            Some(Token::Float(v)) => Ok(Expr::Float(v)),
            Some(Token::Str(s)) => {
                let mut text = s;
                // adjacent literals concatenate
                while let Some(Token::Str(next)) = self.peek().cloned() {
                    text.push_str(&next);
                    self.pos += 1;
                }
                Ok(Expr::Str(text))
            }
            Some(Token::True) => Ok(Expr::Bool(true)),
            Some(Token::False) => Ok(Expr::Bool(false)),
            Some(Token::None) => Ok(Expr::None),
            Some(Token::Ident(name)) => Ok(Expr::Name(name)),
            Some(Token::LParen) => {
                if self.eat(&Token::RParen) {
                    return Ok(Expr::List(Vec::new()));
                }
                let first = self.parse_or()?;
                if self.eat(&Token::RParen) {
                    return Ok(first);
                }
                let mut items = vec![first];
                while self.eat(&Token::Comma) {
                    if self.peek() == Some(&Token::RParen) {
                        break;
                    }
                    items.push(self.parse_or()?);
                }
                self.expect(Token::RParen)?;
                Ok(Expr::List(items))
            }
            Some(Token::LBracket) => {
                let mut items = Vec::new();
                if self.eat(&Token::RBracket) {
                    return Ok(Expr::List(items));
                }
                loop {
                    items.push(self.parse_or()?);
                    if self.eat(&Token::RBracket) {
                        return Ok(Expr::List(items));
                    }
                    self.expect(Token::Comma)?;
                    if self.eat(&Token::RBracket) {
                        return Ok(Expr::List(items));
                    }
                }
            }
            other => Err(syntax(&format!("unexpected token {:?}", other))),
        }
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn syntax(message: &str) -> AssistantError {
    AssistantError::Evaluation(format!("invalid syntax: {}", message))
}

pub fn parse_expression(source: &str) -> Result<Expr> {
    let tokens = crate::evaluator::lexer::tokenize(source)?;
    Parser::new(tokens).parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitwise_binds_tighter_than_comparison() {
        let expr = parse_expression("(df['a'] > 1) & (df['b'] == 'x')").unwrap();
        match expr {
            Expr::Binary { op, .. } => assert_eq!(op, BinaryOp::BitAnd),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_method_call_with_kwargs() {
        let expr = parse_expression("df['Name'].str.contains('riya', case=False)").unwrap();
        match expr {
            Expr::Call { func, args, kwargs } => {
                assert_eq!(args, vec![Expr::Str("riya".into())]);
                assert_eq!(kwargs, vec![("case".to_string(), Expr::Bool(false))]);
                assert!(matches!(*func, Expr::Attr { ref name, .. } if name == "contains"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_column_list_index() {
        let expr = parse_expression("df[['Name', 'City']]").unwrap();
        match expr {
            Expr::Index { index, .. } => assert!(matches!(*index, Expr::List(ref items) if items.len() == 2)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_syntax_errors() {
        assert!(parse_expression("").is_err());
        assert!(parse_expression("df[").is_err());
        assert!(parse_expression("1 < 2 < 3").is_err());
        assert!(parse_expression("len(x=1, 2)").is_err());
        assert!(parse_expression("df df").is_err());
    }
}
