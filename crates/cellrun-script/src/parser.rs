//! Recursive-descent parser for the cell language.

use std::rc::Rc;

use crate::{
    ast::{
        Alias, BinOp, CmpOp, Const, Expr, FPart, FunctionDef, LogicalOp, Param, Program, Stmt,
        StmtKind, Target, UnaryOp,
    },
    error::ScriptError,
    lexer::{Tok, Token, tokenize},
};

const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "break", "continue", "def", "elif", "else",
    "for", "from", "global", "if", "import", "in", "is", "not", "or", "pass", "raise", "return",
    "while",
];

/// Recognised but not part of the cell language.
const UNSUPPORTED: &[&str] = &[
    "async", "await", "class", "del", "except", "finally", "lambda", "nonlocal", "try", "with",
    "yield",
];

/// Bracket nesting accepted in one expression.
const MAX_BRACKETS: usize = 200;

/// Bound on nested expressions and blocks, so evaluating a parsed tree
/// cannot exhaust the worker's stack.
const MAX_NESTING: usize = 500;

/// Parse source text into a program. Never evaluates anything.
///
/// # Errors
/// Returns a `SyntaxError` (or `IndentationError`) describing the first problem.
pub fn parse(src: &str) -> Result<Program, ScriptError> {
    let tokens = tokenize(src)?;
    Parser::new(tokens).program()
}

type PResult<T> = Result<T, ScriptError>;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    loop_depth: usize,
    fn_depth: usize,
    brackets: usize,
    nesting: usize,
}

impl Parser {
    const fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            loop_depth: 0,
            fn_depth: 0,
            brackets: 0,
            nesting: 0,
        }
    }

    fn peek(&self) -> &Tok {
        self.tokens
            .get(self.pos)
            .map_or(&Tok::Eof, |t| &t.tok)
    }

    fn peek_next(&self) -> &Tok {
        self.tokens
            .get(self.pos + 1)
            .map_or(&Tok::Eof, |t| &t.tok)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or(1, |t| t.line)
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn error<T>(&self, message: impl AsRef<str>) -> PResult<T> {
        Err(ScriptError::syntax(message, self.line()))
    }

    fn at_op(&self, op: &str) -> bool {
        matches!(self.peek(), Tok::Op(o) if *o == op)
    }

    fn at_kw(&self, kw: &str) -> bool {
        matches!(self.peek(), Tok::Name(n) if n == kw)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.at_op(op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_kw(&mut self, kw: &str) -> bool {
        if self.at_kw(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: &str) -> PResult<()> {
        if self.eat_op(op) {
            Ok(())
        } else {
            self.error(format!("expected '{op}'"))
        }
    }

    fn expect_kw(&mut self, kw: &str) -> PResult<()> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            self.error(format!("expected '{kw}'"))
        }
    }

    fn identifier(&mut self) -> PResult<String> {
        match self.peek() {
            Tok::Name(name) if !KEYWORDS.contains(&name.as_str()) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => self.error("expected a name"),
        }
    }

    fn expect_newline(&mut self) -> PResult<()> {
        match self.peek() {
            Tok::Newline => {
                self.pos += 1;
                Ok(())
            }
            Tok::Eof => Ok(()),
            _ => self.error("invalid syntax"),
        }
    }

    /// Parsing stops at the first error, so only successful exits unwind
    /// the counters.
    fn descend(&mut self) -> PResult<()> {
        self.nesting += 1;
        if self.nesting > MAX_NESTING {
            return self.error("too many nested expressions");
        }
        Ok(())
    }

    fn bracketed<T>(&mut self, inner: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        self.brackets += 1;
        if self.brackets > MAX_BRACKETS {
            return self.error("too many nested parentheses");
        }
        self.descend()?;
        let out = inner(self)?;
        self.nesting -= 1;
        self.brackets -= 1;
        Ok(out)
    }

    fn program(mut self) -> PResult<Program> {
        let mut body = Vec::new();
        loop {
            match self.peek() {
                Tok::Eof => break,
                Tok::Newline => {
                    self.pos += 1;
                }
                Tok::Indent => {
                    return Err(ScriptError::indentation("unexpected indent", self.line()));
                }
                _ => body.extend(self.statement()?),
            }
        }
        Ok(Program { body })
    }

    fn statement(&mut self) -> PResult<Vec<Stmt>> {
        if let Tok::Name(word) = self.peek() {
            if UNSUPPORTED.contains(&word.as_str()) {
                let word = word.clone();
                return self.error(format!("'{word}' is not supported"));
            }
            match word.as_str() {
                "if" => return Ok(vec![self.if_stmt()?]),
                "while" => return Ok(vec![self.while_stmt()?]),
                "for" => return Ok(vec![self.for_stmt()?]),
                "def" => return Ok(vec![self.def_stmt()?]),
                _ => {}
            }
        }
        self.simple_line()
    }

    /// `simple (';' simple)* NEWLINE`
    fn simple_line(&mut self) -> PResult<Vec<Stmt>> {
        let mut stmts = vec![self.simple_stmt()?];
        while self.eat_op(";") {
            if matches!(self.peek(), Tok::Newline | Tok::Eof) {
                break;
            }
            stmts.push(self.simple_stmt()?);
        }
        self.expect_newline()?;
        Ok(stmts)
    }

    fn block(&mut self) -> PResult<Vec<Stmt>> {
        self.expect_op(":")?;
        if !matches!(self.peek(), Tok::Newline) {
            return self.simple_line();
        }
        self.pos += 1;
        if !matches!(self.peek(), Tok::Indent) {
            return Err(ScriptError::indentation(
                "expected an indented block",
                self.line(),
            ));
        }
        self.pos += 1;
        self.descend()?;
        let mut body = Vec::new();
        loop {
            match self.peek() {
                Tok::Dedent => {
                    self.pos += 1;
                    break;
                }
                Tok::Eof => break,
                Tok::Newline => {
                    self.pos += 1;
                }
                _ => body.extend(self.statement()?),
            }
        }
        self.nesting -= 1;
        Ok(body)
    }

    fn if_stmt(&mut self) -> PResult<Stmt> {
        let line = self.line();
        // Called at `if` or `elif`.
        self.advance();
        let test = self.expression()?;
        let body = self.block()?;
        let orelse = if self.at_kw("elif") {
            self.descend()?;
            let elif = self.if_stmt()?;
            self.nesting -= 1;
            vec![elif]
        } else if self.eat_kw("else") {
            self.block()?
        } else {
            Vec::new()
        };
        Ok(Stmt {
            kind: StmtKind::If { test, body, orelse },
            line,
        })
    }

    fn while_stmt(&mut self) -> PResult<Stmt> {
        let line = self.line();
        self.expect_kw("while")?;
        let test = self.expression()?;
        self.loop_depth += 1;
        let body = self.block();
        self.loop_depth -= 1;
        Ok(Stmt {
            kind: StmtKind::While { test, body: body? },
            line,
        })
    }

    fn for_stmt(&mut self) -> PResult<Stmt> {
        let line = self.line();
        self.expect_kw("for")?;
        let target = self.identifier()?;
        if self.at_op(",") {
            return self.error("tuple unpacking is not supported");
        }
        self.expect_kw("in")?;
        let iter = self.expression()?;
        self.loop_depth += 1;
        let body = self.block();
        self.loop_depth -= 1;
        Ok(Stmt {
            kind: StmtKind::For {
                target,
                iter,
                body: body?,
            },
            line,
        })
    }

    fn def_stmt(&mut self) -> PResult<Stmt> {
        let line = self.line();
        self.expect_kw("def")?;
        let name = self.identifier()?;
        self.expect_op("(")?;
        let mut params: Vec<Param> = Vec::new();
        while !self.at_op(")") {
            let pname = self.identifier()?;
            if params.iter().any(|p| p.name == pname) {
                return self.error(format!("duplicate argument '{pname}' in function definition"));
            }
            if self.eat_op(":") {
                self.expression()?;
            }
            let default = if self.eat_op("=") {
                Some(self.expression()?)
            } else {
                if params.iter().any(|p| p.default.is_some()) {
                    return self.error("non-default argument follows default argument");
                }
                None
            };
            params.push(Param {
                name: pname,
                default,
            });
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(")")?;
        if self.eat_op("->") {
            self.expression()?;
        }

        let saved_loops = std::mem::take(&mut self.loop_depth);
        self.fn_depth += 1;
        let body = self.block();
        self.fn_depth -= 1;
        self.loop_depth = saved_loops;

        Ok(Stmt {
            kind: StmtKind::FunctionDef(Rc::new(FunctionDef {
                name,
                params,
                body: body?,
            })),
            line,
        })
    }

    fn simple_stmt(&mut self) -> PResult<Stmt> {
        let line = self.line();
        let kind = match self.peek() {
            Tok::Name(word) => match word.as_str() {
                "pass" => {
                    self.pos += 1;
                    StmtKind::Pass
                }
                "break" => {
                    if self.loop_depth == 0 {
                        return self.error("'break' outside loop");
                    }
                    self.pos += 1;
                    StmtKind::Break
                }
                "continue" => {
                    if self.loop_depth == 0 {
                        return self.error("'continue' not properly in loop");
                    }
                    self.pos += 1;
                    StmtKind::Continue
                }
                "return" => {
                    if self.fn_depth == 0 {
                        return self.error("'return' outside function");
                    }
                    self.pos += 1;
                    let value = if self.at_end_of_simple() {
                        None
                    } else {
                        Some(self.expression()?)
                    };
                    StmtKind::Return(value)
                }
                "raise" => {
                    self.pos += 1;
                    let value = if self.at_end_of_simple() {
                        None
                    } else {
                        Some(self.expression()?)
                    };
                    StmtKind::Raise(value)
                }
                "assert" => {
                    self.pos += 1;
                    let test = self.expression()?;
                    let msg = if self.eat_op(",") {
                        Some(self.expression()?)
                    } else {
                        None
                    };
                    StmtKind::Assert { test, msg }
                }
                "global" => {
                    self.pos += 1;
                    let mut names = vec![self.identifier()?];
                    while self.eat_op(",") {
                        names.push(self.identifier()?);
                    }
                    StmtKind::Global(names)
                }
                "import" => {
                    self.pos += 1;
                    StmtKind::Import(self.aliases()?)
                }
                "from" => {
                    self.pos += 1;
                    let module = self.dotted_name()?;
                    self.expect_kw("import")?;
                    let parenthesized = self.eat_op("(");
                    let names = self.aliases()?;
                    if parenthesized {
                        self.eat_op(",");
                        self.expect_op(")")?;
                    }
                    StmtKind::ImportFrom { module, names }
                }
                _ => self.expression_stmt()?,
            },
            _ => self.expression_stmt()?,
        };
        Ok(Stmt { kind, line })
    }

    fn at_end_of_simple(&self) -> bool {
        matches!(self.peek(), Tok::Newline | Tok::Eof) || self.at_op(";")
    }

    fn dotted_name(&mut self) -> PResult<String> {
        let mut name = self.identifier()?;
        while self.eat_op(".") {
            name.push('.');
            name.push_str(&self.identifier()?);
        }
        Ok(name)
    }

    fn aliases(&mut self) -> PResult<Vec<Alias>> {
        let mut out = Vec::new();
        loop {
            let name = self.dotted_name()?;
            let asname = if self.eat_kw("as") {
                Some(self.identifier()?)
            } else {
                None
            };
            out.push(Alias { name, asname });
            if !self.at_op(",") || matches!(self.peek_next(), Tok::Op(")")) {
                break;
            }
            self.pos += 1;
        }
        Ok(out)
    }

    fn expression_stmt(&mut self) -> PResult<StmtKind> {
        let first = self.expression()?;
        if self.at_op(",") {
            return self.error("tuples are not supported");
        }

        if self.eat_op(":") {
            let target = self.to_target(first)?;
            let annotation = self.expression()?;
            let value = if self.eat_op("=") {
                Some(self.expression()?)
            } else {
                None
            };
            return Ok(StmtKind::AnnAssign {
                target,
                annotation,
                value,
            });
        }

        let aug = match self.peek() {
            Tok::Op("+=") => Some(BinOp::Add),
            Tok::Op("-=") => Some(BinOp::Sub),
            Tok::Op("*=") => Some(BinOp::Mul),
            Tok::Op("/=") => Some(BinOp::Div),
            Tok::Op("//=") => Some(BinOp::FloorDiv),
            Tok::Op("%=") => Some(BinOp::Mod),
            Tok::Op("**=") => Some(BinOp::Pow),
            _ => None,
        };
        if let Some(op) = aug {
            self.pos += 1;
            let target = self.to_target(first)?;
            let value = self.expression()?;
            return Ok(StmtKind::AugAssign { target, op, value });
        }

        if self.at_op("=") {
            let mut exprs = vec![first];
            while self.eat_op("=") {
                exprs.push(self.expression()?);
                if self.at_op(",") {
                    return self.error("tuples are not supported");
                }
            }
            let value = exprs.pop().unwrap_or(Expr::Const(Const::None));
            let targets = exprs
                .into_iter()
                .map(|e| self.to_target(e))
                .collect::<PResult<Vec<_>>>()?;
            return Ok(StmtKind::Assign { targets, value });
        }

        Ok(StmtKind::Expr(first))
    }

    fn to_target(&self, expr: Expr) -> PResult<Target> {
        match expr {
            Expr::Name(name) => Ok(Target::Name(name)),
            Expr::Subscript { value, index } => Ok(Target::Subscript {
                value: *value,
                index: *index,
            }),
            Expr::Attribute { value, attr } => Ok(Target::Attribute {
                value: *value,
                attr,
            }),
            Expr::Call { .. } => self.error("cannot assign to function call"),
            Expr::Const(_) => self.error("cannot assign to literal"),
            _ => self.error("cannot assign to expression"),
        }
    }

    // ---- expressions -------------------------------------------------------

    fn expression(&mut self) -> PResult<Expr> {
        let body = self.or_test()?;
        if self.eat_kw("if") {
            let test = self.or_test()?;
            self.expect_kw("else")?;
            self.descend()?;
            let orelse = self.expression()?;
            self.nesting -= 1;
            return Ok(Expr::IfExp {
                test: Box::new(test),
                body: Box::new(body),
                orelse: Box::new(orelse),
            });
        }
        Ok(body)
    }

    fn or_test(&mut self) -> PResult<Expr> {
        let mut left = self.and_test()?;
        let mut chained = 0;
        while self.eat_kw("or") {
            self.descend()?;
            chained += 1;
            let right = self.and_test()?;
            left = Expr::Logical {
                op: LogicalOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        self.nesting -= chained;
        Ok(left)
    }

    fn and_test(&mut self) -> PResult<Expr> {
        let mut left = self.not_test()?;
        let mut chained = 0;
        while self.eat_kw("and") {
            self.descend()?;
            chained += 1;
            let right = self.not_test()?;
            left = Expr::Logical {
                op: LogicalOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        self.nesting -= chained;
        Ok(left)
    }

    fn not_test(&mut self) -> PResult<Expr> {
        if self.eat_kw("not") {
            self.descend()?;
            let operand = self.not_test()?;
            self.nesting -= 1;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.comparison()
    }

    fn comparison(&mut self) -> PResult<Expr> {
        let left = self.arith()?;
        let mut rest = Vec::new();
        loop {
            let op = match self.peek() {
                Tok::Op("==") => CmpOp::Eq,
                Tok::Op("!=") => CmpOp::NotEq,
                Tok::Op("<") => CmpOp::Lt,
                Tok::Op("<=") => CmpOp::LtE,
                Tok::Op(">") => CmpOp::Gt,
                Tok::Op(">=") => CmpOp::GtE,
                Tok::Name(n) if n == "in" => CmpOp::In,
                Tok::Name(n) if n == "is" => {
                    if matches!(self.peek_next(), Tok::Name(m) if m == "not") {
                        self.pos += 1;
                        CmpOp::IsNot
                    } else {
                        CmpOp::Is
                    }
                }
                Tok::Name(n)
                    if n == "not" && matches!(self.peek_next(), Tok::Name(m) if m == "in") =>
                {
                    self.pos += 1;
                    CmpOp::NotIn
                }
                _ => break,
            };
            self.pos += 1;
            rest.push((op, self.arith()?));
        }
        if rest.is_empty() {
            Ok(left)
        } else {
            Ok(Expr::Compare {
                left: Box::new(left),
                rest,
            })
        }
    }

    fn arith(&mut self) -> PResult<Expr> {
        let mut left = self.term()?;
        let mut chained = 0;
        loop {
            let op = match self.peek() {
                Tok::Op("+") => BinOp::Add,
                Tok::Op("-") => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            self.descend()?;
            chained += 1;
            let right = self.term()?;
            left = binary(op, left, right);
        }
        self.nesting -= chained;
        Ok(left)
    }

    fn term(&mut self) -> PResult<Expr> {
        let mut left = self.factor()?;
        let mut chained = 0;
        loop {
            let op = match self.peek() {
                Tok::Op("*") => BinOp::Mul,
                Tok::Op("/") => BinOp::Div,
                Tok::Op("//") => BinOp::FloorDiv,
                Tok::Op("%") => BinOp::Mod,
                _ => break,
            };
            self.pos += 1;
            self.descend()?;
            chained += 1;
            let right = self.factor()?;
            left = binary(op, left, right);
        }
        self.nesting -= chained;
        Ok(left)
    }

    fn factor(&mut self) -> PResult<Expr> {
        let op = match self.peek() {
            Tok::Op("-") => Some(UnaryOp::Neg),
            Tok::Op("+") => Some(UnaryOp::Pos),
            _ => None,
        };
        if let Some(op) = op {
            self.pos += 1;
            self.descend()?;
            let operand = self.factor()?;
            self.nesting -= 1;
            return Ok(Expr::Unary {
                op,
                operand: Box::new(operand),
            });
        }
        self.power()
    }

    fn power(&mut self) -> PResult<Expr> {
        let base = self.postfix()?;
        if self.eat_op("**") {
            self.descend()?;
            let exponent = self.factor()?;
            self.nesting -= 1;
            return Ok(binary(BinOp::Pow, base, exponent));
        }
        Ok(base)
    }

    fn postfix(&mut self) -> PResult<Expr> {
        let mut expr = self.atom()?;
        let mut chained = 0;
        loop {
            if self.eat_op("(") {
                let (args, kwargs) = self.bracketed(Self::call_args)?;
                expr = Expr::Call {
                    func: Box::new(expr),
                    args,
                    kwargs,
                };
            } else if self.eat_op(".") {
                let attr = self.identifier()?;
                expr = Expr::Attribute {
                    value: Box::new(expr),
                    attr,
                };
            } else if self.eat_op("[") {
                let index = self.bracketed(|p| {
                    let index = p.expression()?;
                    if p.at_op(":") {
                        return p.error("slices are not supported");
                    }
                    p.expect_op("]")?;
                    Ok(index)
                })?;
                expr = Expr::Subscript {
                    value: Box::new(expr),
                    index: Box::new(index),
                };
            } else {
                break;
            }
            self.descend()?;
            chained += 1;
        }
        self.nesting -= chained;
        Ok(expr)
    }

    fn call_args(&mut self) -> PResult<(Vec<Expr>, Vec<(String, Expr)>)> {
        let mut args = Vec::new();
        let mut kwargs: Vec<(String, Expr)> = Vec::new();
        while !self.at_op(")") {
            let is_keyword = matches!(self.peek(), Tok::Name(_))
                && matches!(self.peek_next(), Tok::Op("="));
            if is_keyword {
                let name = self.identifier()?;
                self.pos += 1;
                if kwargs.iter().any(|(k, _)| *k == name) {
                    return self.error(format!("keyword argument repeated: {name}"));
                }
                kwargs.push((name, self.expression()?));
            } else {
                if !kwargs.is_empty() {
                    return self.error("positional argument follows keyword argument");
                }
                args.push(self.expression()?);
            }
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(")")?;
        Ok((args, kwargs))
    }

    fn atom(&mut self) -> PResult<Expr> {
        let line = self.line();
        match self.advance() {
            Tok::Int(i) => Ok(Expr::Const(Const::Int(i))),
            Tok::Float(f) => Ok(Expr::Const(Const::Float(f))),
            tok @ (Tok::Str(_) | Tok::FStr(_)) => self.strings(tok, line),
            Tok::Name(name) => match name.as_str() {
                "None" => Ok(Expr::Const(Const::None)),
                "True" => Ok(Expr::Const(Const::Bool(true))),
                "False" => Ok(Expr::Const(Const::Bool(false))),
                n if UNSUPPORTED.contains(&n) => {
                    Err(ScriptError::syntax(format!("'{n}' is not supported"), line))
                }
                n if KEYWORDS.contains(&n) => Err(ScriptError::syntax("invalid syntax", line)),
                _ => Ok(Expr::Name(name)),
            },
            Tok::Op("(") => self.bracketed(Self::parenthesized),
            Tok::Op("[") => self.bracketed(Self::list_display),
            Tok::Op("{") => self.bracketed(Self::dict_display),
            Tok::Indent => Err(ScriptError::indentation("unexpected indent", line)),
            Tok::Newline | Tok::Eof | Tok::Dedent => {
                Err(ScriptError::syntax("unexpected end of input", line))
            }
            Tok::Op(_) => Err(ScriptError::syntax("invalid syntax", line)),
        }
    }

    fn parenthesized(&mut self) -> PResult<Expr> {
        let inner = self.expression()?;
        if self.at_op(",") {
            return self.error("tuples are not supported");
        }
        self.expect_op(")")?;
        Ok(inner)
    }

    fn list_display(&mut self) -> PResult<Expr> {
        let mut items = Vec::new();
        while !self.at_op("]") {
            items.push(self.expression()?);
            if self.at_kw("for") {
                return self.error("comprehensions are not supported");
            }
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op("]")?;
        Ok(Expr::List(items))
    }

    fn dict_display(&mut self) -> PResult<Expr> {
        let mut items = Vec::new();
        while !self.at_op("}") {
            let key = self.expression()?;
            if !self.eat_op(":") {
                return self.error("sets are not supported");
            }
            let value = self.expression()?;
            items.push((key, value));
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op("}")?;
        Ok(Expr::Dict(items))
    }

    /// Adjacent string literals concatenate; any f-string makes the whole
    /// run an f-string.
    fn strings(&mut self, first: Tok, line: usize) -> PResult<Expr> {
        let mut pieces = vec![first];
        while matches!(self.peek(), Tok::Str(_) | Tok::FStr(_)) {
            pieces.push(self.advance());
        }

        if pieces.iter().all(|t| matches!(t, Tok::Str(_))) {
            let text: String = pieces
                .into_iter()
                .filter_map(|t| match t {
                    Tok::Str(s) => Some(s),
                    _ => None,
                })
                .collect();
            return Ok(Expr::Const(Const::Str(Rc::from(text))));
        }

        let mut parts = Vec::new();
        for piece in pieces {
            match piece {
                Tok::Str(s) => push_lit(&mut parts, &s),
                Tok::FStr(body) => parse_fstring(&body, line, &mut parts)?,
                _ => {}
            }
        }
        Ok(Expr::FString(parts))
    }
}

fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn push_lit(parts: &mut Vec<FPart>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(FPart::Lit(last)) = parts.last_mut() {
        last.push_str(text);
    } else {
        parts.push(FPart::Lit(text.to_owned()));
    }
}

fn parse_fstring(body: &str, line: usize, parts: &mut Vec<FPart>) -> PResult<()> {
    let chars: Vec<char> = body.chars().collect();
    let mut lit = String::new();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '{' if chars.get(i + 1) == Some(&'{') => {
                lit.push('{');
                i += 2;
            }
            '}' if chars.get(i + 1) == Some(&'}') => {
                lit.push('}');
                i += 2;
            }
            '}' => {
                return Err(ScriptError::syntax(
                    "f-string: single '}' is not allowed",
                    line,
                ));
            }
            '{' => {
                push_lit(parts, &lit);
                lit.clear();
                let (end, field) = fstring_field(&chars, i + 1, line)?;
                parts.push(field);
                i = end + 1;
            }
            c => {
                lit.push(c);
                i += 1;
            }
        }
    }
    push_lit(parts, &lit);
    Ok(())
}

/// Parse one `{expr[!conv][:spec]}` replacement field starting after `{`.
/// Returns the index of the closing `}`.
fn fstring_field(chars: &[char], start: usize, line: usize) -> PResult<(usize, FPart)> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut expr_end = None;
    let mut conversion = None;
    let mut spec_start = None;
    let mut i = start;

    while i < chars.len() {
        let c = chars[i];
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        match c {
            '\'' | '"' if spec_start.is_none() => quote = Some(c),
            '(' | '[' | '{' if spec_start.is_none() => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            '}' if depth > 0 && spec_start.is_none() => depth -= 1,
            '}' => {
                let expr_text: String = chars[start..expr_end.unwrap_or(i)].iter().collect();
                if expr_text.trim().is_empty() {
                    return Err(ScriptError::syntax(
                        "f-string: empty expression not allowed",
                        line,
                    ));
                }
                let expr = parse_embedded(&expr_text, line)?;
                let spec = spec_start.map(|s: usize| chars[s..i].iter().collect::<String>());
                return Ok((
                    i,
                    FPart::Expr {
                        expr,
                        conversion,
                        spec,
                    },
                ));
            }
            '!' if depth == 0 && spec_start.is_none() && chars.get(i + 1) != Some(&'=') => {
                let conv = chars.get(i + 1).copied();
                if !matches!(conv, Some('r' | 's')) {
                    return Err(ScriptError::syntax(
                        "f-string: invalid conversion character",
                        line,
                    ));
                }
                expr_end.get_or_insert(i);
                conversion = conv;
                i += 2;
                continue;
            }
            ':' if depth == 0 && spec_start.is_none() => {
                expr_end.get_or_insert(i);
                spec_start = Some(i + 1);
            }
            _ => {}
        }
        i += 1;
    }
    Err(ScriptError::syntax("f-string: expecting '}'", line))
}

fn parse_embedded(text: &str, line: usize) -> PResult<Expr> {
    let tokens = tokenize(text.trim()).map_err(|e| ScriptError::syntax(e.message, line))?;
    let mut parser = Parser::new(tokens);
    let expr = parser.expression()?;
    if !matches!(parser.peek(), Tok::Newline | Tok::Eof) {
        return Err(ScriptError::syntax("f-string: invalid syntax", line));
    }
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Parse on a thread with room for the full descent, as the engine's
    /// worker does.
    fn parse_deep(src: String) -> Result<(), ScriptError> {
        std::thread::Builder::new()
            .stack_size(64 * 1024 * 1024)
            .spawn(move || parse(&src).map(drop))
            .unwrap()
            .join()
            .unwrap()
    }

    fn body(src: &str) -> Vec<StmtKind> {
        parse(src).unwrap().body.into_iter().map(|s| s.kind).collect()
    }

    #[test]
    fn test_chained_assignment_targets() {
        let stmts = body("a = b = f()");
        let StmtKind::Assign { targets, value } = &stmts[0] else {
            panic!("expected assignment");
        };
        assert_eq!(
            targets,
            &vec![Target::Name("a".into()), Target::Name("b".into())]
        );
        assert!(matches!(value, Expr::Call { .. }));
    }

    #[test]
    fn test_annotated_assignment() {
        let stmts = body("s: Session = Session(headless=True)");
        let StmtKind::AnnAssign { target, value, .. } = &stmts[0] else {
            panic!("expected annotated assignment");
        };
        assert_eq!(target, &Target::Name("s".into()));
        let Some(Expr::Call { kwargs, .. }) = value else {
            panic!("expected call");
        };
        assert_eq!(kwargs[0].0, "headless");
    }

    #[test]
    fn test_elif_nests_in_orelse() {
        let stmts = body("if a:\n    x = 1\nelif b:\n    x = 2\nelse:\n    x = 3\n");
        let StmtKind::If { orelse, .. } = &stmts[0] else {
            panic!("expected if");
        };
        assert_eq!(orelse.len(), 1);
        assert!(matches!(orelse[0].kind, StmtKind::If { .. }));
    }

    #[test]
    fn test_precedence() {
        let stmts = body("x = 1 + 2 * 3");
        let StmtKind::Assign { value, .. } = &stmts[0] else {
            panic!("expected assignment");
        };
        let Expr::Binary { op, right, .. } = value else {
            panic!("expected binary");
        };
        assert_eq!(*op, BinOp::Add);
        assert!(matches!(**right, Expr::Binary { op: BinOp::Mul, .. }));
    }

    #[test]
    fn test_not_in_and_is_not() {
        let stmts = body("a not in b\nc is not None");
        let StmtKind::Expr(Expr::Compare { rest, .. }) = &stmts[0] else {
            panic!("expected compare");
        };
        assert_eq!(rest[0].0, CmpOp::NotIn);
        let StmtKind::Expr(Expr::Compare { rest, .. }) = &stmts[1] else {
            panic!("expected compare");
        };
        assert_eq!(rest[0].0, CmpOp::IsNot);
    }

    #[test]
    fn test_fstring_parts() {
        let stmts = body("f'a{x!r}b{y:.2f}{{c}}'");
        let StmtKind::Expr(Expr::FString(parts)) = &stmts[0] else {
            panic!("expected f-string");
        };
        assert_eq!(parts.len(), 5);
        assert_eq!(parts[0], FPart::Lit("a".into()));
        assert!(matches!(&parts[1], FPart::Expr { conversion: Some('r'), .. }));
        assert!(matches!(&parts[3], FPart::Expr { spec: Some(s), .. } if s == ".2f"));
        assert_eq!(parts[4], FPart::Lit("{c}".into()));
    }

    #[test]
    fn test_semicolons_and_single_line_blocks() {
        let stmts = body("a = 1; b = 2\nif a: b = 3\n");
        assert_eq!(stmts.len(), 3);
    }

    #[test]
    fn test_imports() {
        let stmts = body("import sys, time as t\nfrom os import getenv");
        let StmtKind::Import(aliases) = &stmts[0] else {
            panic!("expected import");
        };
        assert_eq!(aliases[1].binding(), "t");
        assert!(matches!(&stmts[1], StmtKind::ImportFrom { module, .. } if module == "os"));
    }

    #[test]
    fn test_syntax_errors() {
        for src in [
            "x = ",
            "break",
            "return 1",
            "f() = 1",
            "try:\n    pass",
            "x = (1, 2)",
            "def f(a=1, b):\n    pass",
            "if x:\npass",
        ] {
            let err = parse(src).unwrap_err();
            assert!(
                err.kind == "SyntaxError" || err.kind == "IndentationError",
                "{src:?} gave {err}"
            );
        }
    }

    #[test]
    fn test_deeply_nested_brackets_are_rejected() {
        let depth = 5000;
        let src = format!("x = {}1{}", "(".repeat(depth), ")".repeat(depth));
        let err = parse_deep(src).unwrap_err();
        assert_eq!(err.kind, "SyntaxError");
        assert!(err.message.starts_with("too many nested parentheses"), "{err}");

        let src = format!("x = {}1{}", "[".repeat(MAX_BRACKETS), "]".repeat(MAX_BRACKETS));
        assert!(parse_deep(src).is_ok());
    }

    #[test]
    fn test_long_operator_chains_are_bounded() {
        assert!(parse_deep(format!("x = {}1", "-".repeat(100_000))).is_err());
        assert!(parse_deep(format!("x = {}True", "not ".repeat(100_000))).is_err());
        assert!(parse_deep(format!("x = 1{}", " + 1".repeat(100_000))).is_err());
        assert!(parse_deep(format!("x = 1{}", " + 1".repeat(100))).is_ok());
    }

    #[test]
    fn test_deeply_nested_blocks_are_rejected() {
        let src: String = (0..1000)
            .map(|level| format!("{}if True:\n", " ".repeat(level)))
            .chain(std::iter::once(format!("{}pass\n", " ".repeat(1000))))
            .collect();
        let err = parse_deep(src).unwrap_err();
        assert_eq!(err.kind, "SyntaxError");
    }

    #[test]
    fn test_break_inside_function_inside_loop_is_rejected() {
        assert!(parse("while True:\n    def f():\n        break\n").is_err());
    }
}
