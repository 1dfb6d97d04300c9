//! Recursive-descent parser for matcher expressions (§4.2).
//!
//! Grammar:
//! ```text
//! expr   := and_expr ( "||" and_expr )*
//! and_expr := unary ( "&&" unary )*
//! unary  := "(" expr ")" | "TRUE" | "FALSE" | cmp
//! cmp    := lhs op rhs
//! lhs    := header_name | "Fields" "[" ident "]" ( "[" number "]" ( "[" number "]" )? )?
//! rhs    := string | number | "TRUE" | "FALSE"
//! ```

use regex::Regex;

use super::lexer::{Spanned, Token};
use super::MatcherError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderRef {
    Uuid,
    Timestamp,
    Type,
    Logger,
    Severity,
    Payload,
    EnvVersion,
    Pid,
    Hostname,
}

impl HeaderRef {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "Uuid" => HeaderRef::Uuid,
            "Timestamp" => HeaderRef::Timestamp,
            "Type" => HeaderRef::Type,
            "Logger" => HeaderRef::Logger,
            "Severity" => HeaderRef::Severity,
            "Payload" => HeaderRef::Payload,
            "EnvVersion" => HeaderRef::EnvVersion,
            "Pid" => HeaderRef::Pid,
            "Hostname" => HeaderRef::Hostname,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone)]
pub enum Lhs {
    Header(HeaderRef),
    Field {
        name: String,
        field_index: usize,
        array_index: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    RegexMatch,
    RegexNotMatch,
}

#[derive(Debug, Clone)]
pub enum Rhs {
    Str(String),
    Num(f64),
    Bool(bool),
    Regex(Regex),
}

#[derive(Debug)]
pub struct Cmp {
    pub lhs: Lhs,
    pub op: Op,
    pub rhs: Rhs,
}

#[derive(Debug)]
pub enum Node {
    True,
    False,
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
    Cmp(Cmp),
}

struct Parser<'a> {
    tokens: &'a [Spanned],
    pos: usize,
}

pub fn parse(tokens: &[Spanned]) -> Result<Node, MatcherError> {
    let mut parser = Parser { tokens, pos: 0 };
    let node = parser.parse_or()?;
    if parser.pos != parser.tokens.len() {
        let (tok, pos) = parser.describe(parser.pos);
        return Err(MatcherError::UnexpectedToken(tok, pos));
    }
    Ok(node)
}

impl<'a> Parser<'a> {
    fn parse_or(&mut self) -> Result<Node, MatcherError> {
        let mut lhs = self.parse_and()?;
        while self.eat(&Token::Or) {
            let rhs = self.parse_and()?;
            lhs = Node::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Node, MatcherError> {
        let mut lhs = self.parse_unary()?;
        while self.eat(&Token::And) {
            let rhs = self.parse_unary()?;
            lhs = Node::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Node, MatcherError> {
        if self.eat(&Token::LParen) {
            let node = self.parse_or()?;
            self.expect(&Token::RParen)?;
            return Ok(node);
        }

        if let Some(Token::Ident(name)) = self.peek_token() {
            if name == "TRUE" {
                self.pos += 1;
                return Ok(Node::True);
            }
            if name == "FALSE" {
                self.pos += 1;
                return Ok(Node::False);
            }
        }

        self.parse_cmp()
    }

    fn parse_cmp(&mut self) -> Result<Node, MatcherError> {
        let lhs = self.parse_lhs()?;
        let op = self.parse_op()?;
        let rhs = self.parse_rhs(op)?;
        Ok(Node::Cmp(Cmp { lhs, op, rhs }))
    }

    fn parse_lhs(&mut self) -> Result<Lhs, MatcherError> {
        let name = self.expect_ident()?;
        if name == "Fields" {
            self.expect(&Token::LBracket)?;
            let field_name = self.expect_ident_or_string()?;
            self.expect(&Token::RBracket)?;

            let mut field_index = 0usize;
            let mut array_index = 0usize;
            if self.eat(&Token::LBracket) {
                field_index = self.expect_number()? as usize;
                self.expect(&Token::RBracket)?;
                if self.eat(&Token::LBracket) {
                    array_index = self.expect_number()? as usize;
                    self.expect(&Token::RBracket)?;
                }
            }
            return Ok(Lhs::Field {
                name: field_name,
                field_index,
                array_index,
            });
        }

        match HeaderRef::from_name(&name) {
            Some(h) => Ok(Lhs::Header(h)),
            None => Err(MatcherError::BadFieldAccess(name)),
        }
    }

    fn parse_op(&mut self) -> Result<Op, MatcherError> {
        let (tok, pos) = self.advance()?;
        Ok(match tok {
            Token::Eq => Op::Eq,
            Token::Ne => Op::Ne,
            Token::Lt => Op::Lt,
            Token::Le => Op::Le,
            Token::Gt => Op::Gt,
            Token::Ge => Op::Ge,
            Token::RegexMatch => Op::RegexMatch,
            Token::RegexNotMatch => Op::RegexNotMatch,
            other => return Err(MatcherError::UnexpectedToken(format!("{:?}", other), pos)),
        })
    }

    fn parse_rhs(&mut self, op: Op) -> Result<Rhs, MatcherError> {
        let (tok, pos) = self.advance()?;
        match (op, tok) {
            (Op::RegexMatch | Op::RegexNotMatch, Token::String(s)) => {
                Ok(Rhs::Regex(Regex::new(&s)?))
            }
            (_, Token::String(s)) => Ok(Rhs::Str(s)),
            (_, Token::Number(n)) => Ok(Rhs::Num(n)),
            (_, Token::Ident(name)) if name == "TRUE" => Ok(Rhs::Bool(true)),
            (_, Token::Ident(name)) if name == "FALSE" => Ok(Rhs::Bool(false)),
            (_, other) => Err(MatcherError::UnexpectedToken(format!("{:?}", other), pos)),
        }
    }

    fn peek_token(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek_token() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<(), MatcherError> {
        if self.eat(expected) {
            Ok(())
        } else {
            let (tok, pos) = self.describe(self.pos);
            Err(MatcherError::UnexpectedToken(tok, pos))
        }
    }

    fn advance(&mut self) -> Result<(Token, usize), MatcherError> {
        let spanned = self.tokens.get(self.pos).ok_or(MatcherError::UnexpectedEof)?;
        self.pos += 1;
        Ok((spanned.token.clone(), spanned.pos))
    }

    fn expect_ident(&mut self) -> Result<String, MatcherError> {
        let (tok, pos) = self.advance()?;
        match tok {
            Token::Ident(s) => Ok(s),
            other => Err(MatcherError::UnexpectedToken(format!("{:?}", other), pos)),
        }
    }

    fn expect_ident_or_string(&mut self) -> Result<String, MatcherError> {
        let (tok, pos) = self.advance()?;
        match tok {
            Token::Ident(s) => Ok(s),
            Token::String(s) => Ok(s),
            other => Err(MatcherError::UnexpectedToken(format!("{:?}", other), pos)),
        }
    }

    fn expect_number(&mut self) -> Result<f64, MatcherError> {
        let (tok, pos) = self.advance()?;
        match tok {
            Token::Number(n) => Ok(n),
            other => Err(MatcherError::UnexpectedToken(format!("{:?}", other), pos)),
        }
    }

    fn describe(&self, pos: usize) -> (String, usize) {
        match self.tokens.get(pos) {
            Some(s) => (format!("{:?}", s.token), s.pos),
            None => ("<eof>".to_owned(), self.tokens.last().map(|s| s.pos + 1).unwrap_or(0)),
        }
    }
}
