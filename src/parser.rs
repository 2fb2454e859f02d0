//! Recursive-descent parser with precedence-climbing expressions.
//!
//! The parser owns a single mutable cursor over the token stream and the
//! pools it populates; there is no process-wide parser state, and no
//! module-level singleton.

use crate::ast::{
    BarrierKind, BinOp, Chain, ConditionalKind, Node, OutputKind, TerminalKind, TimingKind, UnOp,
    VarType,
};
use crate::error::CompileError;
use crate::pool::{NodeIndex, NodePool, StringPool, NODE_POOL_CAPACITY};
use crate::token::{Lexer, Token, TokenKind};

pub struct ParseOutput {
    pub root: NodeIndex,
    pub nodes: NodePool<Node>,
    pub strings: StringPool,
    /// Non-fatal parse errors recovered from by skipping to the next
/// statement. Pool exhaustion never appears
    /// here: it aborts `parse` immediately instead.
    pub errors: Vec<CompileError>,
}

pub struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    nodes: NodePool<Node>,
    strings: StringPool,
    in_declare_block: bool,
    errors: Vec<CompileError>,
}

type PResult<T> = Result<T, CompileError>;

impl<'a> Parser<'a> {
    pub fn new(source: &'a str) -> Self {
        Self::with_capacity(source, NODE_POOL_CAPACITY)
    }

    pub fn with_capacity(source: &'a str, capacity: usize) -> Self {
        let tokens = Lexer::new(source).tokenize();
        Parser {
            source,
            tokens,
            pos: 0,
            nodes: NodePool::with_capacity(capacity),
            strings: StringPool::new(),
            in_declare_block: false,
            errors: Vec::new(),
        }
    }

    pub fn parse(mut self) -> PResult<ParseOutput> {
        let mut head = NodeIndex::NONE;
        let mut tail: Option<NodeIndex> = None;
        while !self.is_eof() {
            match self.parse_statement() {
                Ok(stmt) => {
                    if stmt.is_some() {
                        self.link(&mut head, &mut tail, stmt);
                    }
                }
                Err(e) => {
                    self.errors.push(e);
                    self.recover_to_next_line();
                }
            }
        }
        let root = self.alloc(Node::Program { first: head })?;
        Ok(ParseOutput {
            root,
            nodes: self.nodes,
            strings: self.strings,
            errors: self.errors,
        })
    }

    // ---- cursor helpers ----------------------------------------------

    fn peek(&self) -> Token {
        self.tokens[self.pos]
    }

    fn peek_at(&self, ahead: usize) -> Token {
        self.tokens[(self.pos + ahead).min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().kind
    }

    fn is_eof(&self) -> bool {
        self.peek_kind() == TokenKind::Eof
    }

    fn advance(&mut self) -> Token {
        let t = self.peek();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        t
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> PResult<Token> {
        if self.at(kind) {
            Ok(self.advance())
        } else {
            Err(CompileError::parse(
                self.peek().span.offset,
                format!("expected {}", what),
            ))
        }
    }

    fn current_offset(&self) -> u32 {
        self.peek().span.offset
    }

    fn token_text(&self, tok: Token) -> &'a str {
        tok.text(self.source)
    }

    fn alloc(&mut self, node: Node) -> PResult<NodeIndex> {
        self.nodes
            .alloc(node)
            .map_err(|e| CompileError::parse(self.current_offset(), e.to_string()))
    }

    fn link(&mut self, head: &mut NodeIndex, tail: &mut Option<NodeIndex>, new_node: NodeIndex) {
        if head.is_none() {
            *head = new_node;
        } else if let Some(t) = *tail {
            self.nodes.get_mut(t).set_next_sibling(new_node);
        }
        *tail = Some(new_node);
    }

    /// Skip tokens through the end of the line containing the current
    /// (error) token, landing on the first token of the next line, or EOF.
    fn recover_to_next_line(&mut self) {
        let cur = self.current_offset() as usize;
        let newline_pos = self.source[cur.min(self.source.len())..]
            .find('\n')
            .map(|i| cur + i)
            .unwrap_or(self.source.len());
        while !self.is_eof() && (self.peek().span.offset as usize) <= newline_pos {
            self.advance();
        }
    }

    // ---- statements -----------------------------------------------------

    /// `NodeIndex::NONE` is never actually produced here; kept as a `Result`
    /// uniformly so error recovery has one call shape.
    fn parse_statement(&mut self) -> PResult<NodeIndex> {
        let stmt = match self.peek_kind() {
            TokenKind::DeclareSlash => self.parse_declare_block(),
            TokenKind::DoSlash => self.parse_action_block(),
            TokenKind::Var
            | TokenKind::VarInt
            | TokenKind::VarFloat
            | TokenKind::VarString
            | TokenKind::VarBool
            | TokenKind::VarSolid
            | TokenKind::VarChar
            | TokenKind::Const => self.parse_var_def(),
            TokenKind::Pipe if self.looks_like_func_def() => self.parse_func_def(),
            TokenKind::If
            | TokenKind::FIf
            | TokenKind::FEns
            | TokenKind::FChk
            | TokenKind::FTry
            | TokenKind::FGrd
            | TokenKind::FUnl
            | TokenKind::FUnt
            | TokenKind::FVer
            | TokenKind::FMsr => self.parse_conditional(),
            TokenKind::While | TokenKind::FWhl => self.parse_while_loop(),
            TokenKind::For => self.parse_for_loop(),
            TokenKind::Switch => self.parse_switch(),
            TokenKind::Break => {
                self.advance();
                self.alloc(Node::Break {
                    chain: Chain::default(),
                })
            }
            TokenKind::Continue => {
                self.advance();
                self.alloc(Node::Continue {
                    chain: Chain::default(),
                })
            }
            TokenKind::Return => self.parse_return(),
            TokenKind::Print | TokenKind::Txt | TokenKind::Out | TokenKind::Fmt
            | TokenKind::Dyn => self.parse_output(),
            TokenKind::Asm => self.parse_inline_asm(),
            TokenKind::Array4d => self.parse_array4d_def(),
            _ => self.parse_expr(),
        }?;
        self.eat(TokenKind::Semicolon);
        Ok(stmt)
    }

    fn looks_like_func_def(&self) -> bool {
        self.peek_at(1).kind == TokenKind::Identifier && self.peek_at(2).kind == TokenKind::Pipe
    }

    fn parse_statements_until(&mut self, terminator: TokenKind) -> PResult<NodeIndex> {
        let mut head = NodeIndex::NONE;
        let mut tail: Option<NodeIndex> = None;
        while !self.is_eof() && !self.at(terminator) {
            match self.parse_statement() {
                Ok(stmt) => {
                    if stmt.is_some() {
                        self.link(&mut head, &mut tail, stmt);
                    }
                }
                Err(e) => {
                    self.errors.push(e);
                    self.recover_to_next_line();
                }
            }
        }
        Ok(head)
    }

    fn parse_action_block(&mut self) -> PResult<NodeIndex> {
        self.expect(TokenKind::DoSlash, "'do/'")?;
        let first = self.parse_statements_until(TokenKind::Backslash)?;
        self.expect(TokenKind::Backslash, "'\\' to close action block")?;
        self.alloc(Node::ActionBlock {
            first,
            chain: Chain::default(),
        })
    }

    fn parse_declare_block(&mut self) -> PResult<NodeIndex> {
        self.expect(TokenKind::DeclareSlash, "'declare/'")?;
        let was_declaring = self.in_declare_block;
        self.in_declare_block = true;
        let first = self.parse_statements_until(TokenKind::Backslash);
        self.in_declare_block = was_declaring;
        let first = first?;
        self.expect(TokenKind::Backslash, "'\\' to close declare block")?;
        self.alloc(Node::DeclareBlock {
            first,
            chain: Chain::default(),
        })
    }

    fn var_type_for(&self, kind: TokenKind) -> VarType {
        match kind {
            TokenKind::VarInt => VarType::Int,
            TokenKind::VarFloat => VarType::Float,
            TokenKind::VarString => VarType::String,
            TokenKind::VarBool => VarType::Bool,
            TokenKind::VarSolid => VarType::Solid,
            TokenKind::VarChar => VarType::Char,
            _ => VarType::Inferred,
        }
    }

    fn parse_var_def(&mut self) -> PResult<NodeIndex> {
        let head_kind = self.advance().kind;
        let var_type = self.var_type_for(head_kind);
        let name_tok = self.expect(TokenKind::Identifier, "variable name")?;
        let name = self.strings.intern(self.token_text(name_tok));

        let init = if self.eat(TokenKind::LBracket) {
            let expr = self.parse_expr()?;
            self.expect(TokenKind::RBracket, "']' after variable initializer")?;
            expr
        } else if self.eat(TokenKind::Assign) {
            self.parse_expr()?
        } else {
            NodeIndex::NONE
        };

        self.alloc(Node::VarDef {
            name,
            var_type,
            init,
            chain: Chain::default(),
        })
    }

    fn parse_func_def(&mut self) -> PResult<NodeIndex> {
        self.expect(TokenKind::Pipe, "'|' to start function definition")?;
        let name_tok = self.expect(TokenKind::Identifier, "function name")?;
        let name = self.strings.intern(self.token_text(name_tok));
        self.expect(TokenKind::Pipe, "closing '|' after function name")?;

        // Optional method-dispatch suffix: `.dispatch-name`
        if self.at(TokenKind::Dot) {
            self.advance();
            self.expect(TokenKind::Identifier, "method-dispatch name")?;
        }

        // Parameter list: zero or more bare identifiers before the body opens.
        let mut params_head = NodeIndex::NONE;
        let mut params_tail: Option<NodeIndex> = None;
        while self.at(TokenKind::Identifier) {
            let ptok = self.advance();
            let pname = self.strings.intern(self.token_text(ptok));
            let pnode = self.alloc(Node::Identifier {
                name: pname,
                chain: Chain::default(),
            })?;
            self.link(&mut params_head, &mut params_tail, pnode);
        }

        self.expect(TokenKind::Lt, "'<' to open function body")?;
        let body = self.parse_action_block()?;
        self.expect(TokenKind::BlockEnd, "':>' to close function definition")?;

        self.alloc(Node::FuncDef {
            name,
            body,
            params: params_head,
            declared: self.in_declare_block,
            chain: Chain::default(),
        })
    }

    fn conditional_kind(&self, kind: TokenKind) -> ConditionalKind {
        match kind {
            TokenKind::FEns => ConditionalKind::Ensure,
            TokenKind::FChk => ConditionalKind::Check,
            TokenKind::FTry => ConditionalKind::Try,
            TokenKind::FGrd => ConditionalKind::Guard,
            TokenKind::FUnl | TokenKind::FUnt => ConditionalKind::Until,
            TokenKind::FVer => ConditionalKind::Verify,
            TokenKind::FMsr => ConditionalKind::Measure,
            _ => ConditionalKind::If,
        }
    }

    fn parse_condition_paren(&mut self) -> PResult<NodeIndex> {
        self.expect(TokenKind::LParen, "'(' before condition")?;
        let cond = self.parse_expr()?;
        self.expect(TokenKind::RParen, "')' after condition")?;
        Ok(cond)
    }

    /// A conditional/loop body is either a `do/ ... \` block or a single
    /// bare statement (e.g. `if (1 < 2) print "yes"`).
    fn parse_body(&mut self) -> PResult<NodeIndex> {
        if self.at(TokenKind::DoSlash) {
            self.parse_action_block()
        } else {
            self.parse_statement()
        }
    }

    fn parse_conditional(&mut self) -> PResult<NodeIndex> {
        let head_kind = self.advance().kind;
        let kind = self.conditional_kind(head_kind);
        let cond = self.parse_condition_paren()?;
        let body = self.parse_body()?;
        let else_body = if self.eat(TokenKind::Else) {
            self.parse_body()?
        } else {
            NodeIndex::NONE
        };
        self.alloc(Node::Conditional {
            kind,
            cond,
            body,
            else_body,
            chain: Chain::default(),
        })
    }

    fn parse_while_loop(&mut self) -> PResult<NodeIndex> {
        self.advance(); // while | f.whl
        let cond = self.parse_condition_paren()?;
        let body = self.parse_body()?;
        self.alloc(Node::WhileLoop {
            cond,
            body,
            chain: Chain::default(),
        })
    }

    fn parse_for_loop(&mut self) -> PResult<NodeIndex> {
        self.advance(); // for
        self.expect(TokenKind::LParen, "'(' after 'for'")?;
        let init = if self.at(TokenKind::Semicolon) {
            NodeIndex::NONE
        } else {
            self.parse_for_header_clause()?
        };
        self.expect(TokenKind::Semicolon, "';' after for-loop init")?;
        let cond = if self.at(TokenKind::Semicolon) {
            NodeIndex::NONE
        } else {
            self.parse_expr()?
        };
        self.expect(TokenKind::Semicolon, "';' after for-loop condition")?;
        let incr = if self.at(TokenKind::RParen) {
            NodeIndex::NONE
        } else {
            self.parse_for_header_clause()?
        };
        self.expect(TokenKind::RParen, "')' after for-loop header")?;
        let body = self.parse_body()?;
        self.alloc(Node::ForLoop {
            init,
            cond,
            incr,
            body,
            chain: Chain::default(),
        })
    }

    /// A for-header clause: var-def or bare expression, without consuming a
    /// trailing `;` or `)` (the caller does that).
    fn parse_for_header_clause(&mut self) -> PResult<NodeIndex> {
        match self.peek_kind() {
            TokenKind::Var
            | TokenKind::VarInt
            | TokenKind::VarFloat
            | TokenKind::VarString
            | TokenKind::VarBool
            | TokenKind::VarSolid
            | TokenKind::VarChar
            | TokenKind::Const => self.parse_var_def(),
            _ => self.parse_expr(),
        }
    }

    fn parse_switch(&mut self) -> PResult<NodeIndex> {
        self.advance(); // switch
        self.expect(TokenKind::LParen, "'(' after 'switch'")?;
        let value = self.parse_expr()?;
        self.expect(TokenKind::RParen, "')' after switch value")?;
        self.expect(TokenKind::LBrace, "'{' to open switch body")?;

        let mut case_head = NodeIndex::NONE;
        let mut case_tail: Option<NodeIndex> = None;
        let mut default = NodeIndex::NONE;

        while !self.is_eof() && !self.at(TokenKind::RBrace) {
            match self.peek_kind() {
                TokenKind::Case => {
                    self.advance();
                    let value = self.parse_expr()?;
                    self.expect(TokenKind::Colon, "':' after case value")?;
                    let body = self.parse_statements_until_case_boundary()?;
                    let node = self.alloc(Node::Case {
                        value,
                        body,
                        chain: Chain::default(),
                    })?;
                    self.link(&mut case_head, &mut case_tail, node);
                }
                TokenKind::InCase => {
                    self.advance();
                    self.expect(TokenKind::Colon, "':' after incase")?;
                    let body = self.parse_statements_until_case_boundary()?;
                    let node = self.alloc(Node::InCase {
                        body,
                        chain: Chain::default(),
                    })?;
                    self.link(&mut case_head, &mut case_tail, node);
                }
                TokenKind::Default => {
                    self.advance();
                    self.expect(TokenKind::Colon, "':' after default")?;
                    let body = self.parse_statements_until_case_boundary()?;
                    default = self.alloc(Node::Default {
                        body,
                        chain: Chain::default(),
                    })?;
                }
                _ => {
                    return Err(CompileError::parse(
                        self.current_offset(),
                        "expected 'case', 'incase' or 'default' in switch body",
                    ));
                }
            }
        }
        self.expect(TokenKind::RBrace, "'}' to close switch body")?;

        self.alloc(Node::Switch {
            value,
            first_case: case_head,
            default,
            chain: Chain::default(),
        })
    }

    fn parse_statements_until_case_boundary(&mut self) -> PResult<NodeIndex> {
        let mut head = NodeIndex::NONE;
        let mut tail: Option<NodeIndex> = None;
        while !self.is_eof()
            && !matches!(
                self.peek_kind(),
                TokenKind::Case | TokenKind::InCase | TokenKind::Default | TokenKind::RBrace
            )
        {
            match self.parse_statement() {
                Ok(stmt) => {
                    if stmt.is_some() {
                        self.link(&mut head, &mut tail, stmt);
                    }
                }
                Err(e) => {
                    self.errors.push(e);
                    self.recover_to_next_line();
                }
            }
        }
        Ok(head)
    }

    fn parse_return(&mut self) -> PResult<NodeIndex> {
        self.advance(); // return
        let value = if matches!(
            self.peek_kind(),
            TokenKind::Semicolon | TokenKind::Backslash | TokenKind::Eof | TokenKind::RBrace
        ) {
            NodeIndex::NONE
        } else {
            self.parse_expr()?
        };
        self.alloc(Node::Return {
            value,
            chain: Chain::default(),
        })
    }

    fn output_kind(&self, kind: TokenKind) -> OutputKind {
        match kind {
            TokenKind::Txt => OutputKind::Txt,
            TokenKind::Out => OutputKind::Out,
            TokenKind::Fmt => OutputKind::Fmt,
            TokenKind::Dyn => OutputKind::Dyn,
            _ => OutputKind::Print,
        }
    }

    fn parse_output(&mut self) -> PResult<NodeIndex> {
        let head_kind = self.advance().kind;
        let kind = self.output_kind(head_kind);
        let content = self.parse_expr()?;
        self.alloc(Node::Output {
            kind,
            content,
            chain: Chain::default(),
        })
    }

    fn parse_inline_asm(&mut self) -> PResult<NodeIndex> {
        self.advance(); // asm
        let tok = self.expect(TokenKind::String, "assembly source string after 'asm'")?;
        let raw = self.token_text(tok);
        let unescaped = unescape_string_literal(raw);
        let text = self.strings.intern_bytes(&unescaped);
        self.alloc(Node::InlineAsm {
            text,
            chain: Chain::default(),
        })
    }

    fn parse_array4d_def(&mut self) -> PResult<NodeIndex> {
        self.advance(); // array.4d
        let name_tok = self.expect(TokenKind::Identifier, "array name")?;
        let name = self.strings.intern(self.token_text(name_tok));
        let dims = self.parse_four_brackets()?;
        self.alloc(Node::Array4dDef {
            name,
            dims,
            chain: Chain::default(),
        })
    }

    fn parse_four_brackets(&mut self) -> PResult<[NodeIndex; 4]> {
        let mut dims = [NodeIndex::NONE; 4];
        for slot in dims.iter_mut() {
            self.expect(TokenKind::LBracket, "'[' in array.4d dimension list")?;
            *slot = self.parse_expr()?;
            self.expect(TokenKind::RBracket, "']' in array.4d dimension list")?;
        }
        Ok(dims)
    }

    // ---- expressions: precedence climbing ------------------

    fn parse_expr(&mut self) -> PResult<NodeIndex> {
        self.parse_level1()
    }

    /// Level 1: `||`, assignment/compound-assignment (right-assoc), ternary `?:`.
    fn parse_level1(&mut self) -> PResult<NodeIndex> {
        let mut left = self.parse_or_chain()?;

        if let Some(op) = assignment_op(self.peek_kind()) {
            self.advance();
            let right = self.parse_level1()?;
            left = self.alloc(Node::BinaryOp {
                op,
                left,
                right,
                chain: Chain::default(),
            })?;
            return Ok(left);
        }

        if self.eat(TokenKind::Question) {
            let then_branch = self.parse_level1()?;
            self.expect(TokenKind::Colon, "':' in ternary expression")?;
            let else_branch = self.parse_level1()?;
            left = self.alloc(Node::Conditional {
                kind: ConditionalKind::If,
                cond: left,
                body: then_branch,
                else_body: else_branch,
                chain: Chain::default(),
            })?;
        }
        Ok(left)
    }

    fn parse_or_chain(&mut self) -> PResult<NodeIndex> {
        let mut left = self.parse_level2()?;
        while self.eat(TokenKind::OrOr) {
            let right = self.parse_level2()?;
            left = self.alloc(Node::BinaryOp {
                op: BinOp::Or,
                left,
                right,
                chain: Chain::default(),
            })?;
        }
        Ok(left)
    }

    /// Level 2: `&&`.
    fn parse_level2(&mut self) -> PResult<NodeIndex> {
        let mut left = self.parse_level3()?;
        while self.eat(TokenKind::AndAnd) {
            let right = self.parse_level3()?;
            left = self.alloc(Node::BinaryOp {
                op: BinOp::And,
                left,
                right,
                chain: Chain::default(),
            })?;
        }
        Ok(left)
    }

    /// Level 3: `==`, `!=`, `&`, `^`, `|` (plus the Blaze `*!=` spelling;
    /// `*=` itself lexes as compound multiply-assign, see `token.rs`).
    fn parse_level3(&mut self) -> PResult<NodeIndex> {
        let mut left = self.parse_level4()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::EqEq => BinOp::Eq,
                TokenKind::NotEq | TokenKind::BlazeCmpNe => BinOp::Ne,
                TokenKind::Amp => BinOp::BitAnd,
                // `^` and `|` double as the (unimplemented) jump-marker and
                // function-definition/parenthesization delimiters
                // elsewhere in the grammar; in infix position — after an
                // operand has already been parsed — neither reading
                // applies, so here they unambiguously mean bitwise xor/or.
                TokenKind::JumpMarker => BinOp::BitXor,
                TokenKind::Pipe => BinOp::BitOr,
                _ => break,
            };
            self.advance();
            let right = self.parse_level4()?;
            left = self.alloc(Node::BinaryOp {
                op,
                left,
                right,
                chain: Chain::default(),
            })?;
        }
        Ok(left)
    }

    /// Level 4: `<`, `>`, `<=`, `>=`, `<<`, `>>` (shifts tagged at this
    /// level), plus the Blaze `*>`/`*_<` spellings.
    fn parse_level4(&mut self) -> PResult<NodeIndex> {
        let mut left = self.parse_level5()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Lt => BinOp::Lt,
                TokenKind::Gt | TokenKind::BlazeCmpGt => BinOp::Gt,
                TokenKind::BlazeCmpLt => BinOp::Lt,
                TokenKind::Le => BinOp::Le,
                TokenKind::Ge => BinOp::Ge,
                TokenKind::Shl => BinOp::Shl,
                TokenKind::Shr => BinOp::Shr,
                _ => break,
            };
            self.advance();
            let right = self.parse_level5()?;
            left = self.alloc(Node::BinaryOp {
                op,
                left,
                right,
                chain: Chain::default(),
            })?;
        }
        Ok(left)
    }

    /// Level 5: `+`, `-`.
    fn parse_level5(&mut self) -> PResult<NodeIndex> {
        let mut left = self.parse_level6()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_level6()?;
            left = self.alloc(Node::BinaryOp {
                op,
                left,
                right,
                chain: Chain::default(),
            })?;
        }
        Ok(left)
    }

    /// Level 6: `*`, `/`, `%`.
    fn parse_level6(&mut self) -> PResult<NodeIndex> {
        let mut left = self.parse_level7()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                TokenKind::Percent => BinOp::Rem,
                _ => break,
            };
            self.advance();
            let right = self.parse_level7()?;
            left = self.alloc(Node::BinaryOp {
                op,
                left,
                right,
                chain: Chain::default(),
            })?;
        }
        Ok(left)
    }

    /// Level 7: `**`, right-associative.
    fn parse_level7(&mut self) -> PResult<NodeIndex> {
        let left = self.parse_unary()?;
        if self.eat(TokenKind::StarStar) {
            let right = self.parse_level7()?;
            return self.alloc(Node::BinaryOp {
                op: BinOp::Pow,
                left,
                right,
                chain: Chain::default(),
            });
        }
        Ok(left)
    }

    /// Unary prefix `-`, `!`, `~` bind tighter than any binary operator.
    fn parse_unary(&mut self) -> PResult<NodeIndex> {
        let op = match self.peek_kind() {
            TokenKind::Minus => Some(UnOp::Neg),
            TokenKind::Bang => Some(UnOp::Not),
            TokenKind::Tilde => Some(UnOp::BitNot),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.parse_unary()?;
            return self.alloc(Node::UnaryOp {
                op,
                operand,
                chain: Chain::default(),
            });
        }
        self.parse_postfix()
    }

    /// Level 8: postfix `++`, `--`.
    fn parse_postfix(&mut self) -> PResult<NodeIndex> {
        let mut node = self.parse_primary()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::PlusPlus => UnOp::PostIncr,
                TokenKind::MinusMinus => UnOp::PostDecr,
                _ => break,
            };
            self.advance();
            node = self.alloc(Node::UnaryOp {
                op,
                operand: node,
                chain: Chain::default(),
            })?;
        }
        Ok(node)
    }

    fn parse_primary(&mut self) -> PResult<NodeIndex> {
        match self.peek_kind() {
            TokenKind::Number => {
                let tok = self.advance();
                let text = self.token_text(tok);
                let value: i64 = text.parse().map_err(|_| {
                    CompileError::parse(
                        tok.span.offset,
                        format!("invalid integer literal '{}'", text),
                    )
                })?;
                self.alloc(Node::Number {
                    value,
                    chain: Chain::default(),
                })
            }
            TokenKind::Float => {
                let tok = self.advance();
                let text = self.token_text(tok);
                let value: f64 = text.parse().map_err(|_| {
                    CompileError::parse(
                        tok.span.offset,
                        format!("invalid float literal '{}'", text),
                    )
                })?;
                self.alloc(Node::Float {
                    value,
                    chain: Chain::default(),
                })
            }
            TokenKind::SolidNumber => {
                let tok = self.advance();
                let text = self.token_text(tok);
                let digits = text.trim_end_matches('~');
                let known_digits = self.strings.intern(digits);
                self.alloc(Node::Solid {
                    known_digits,
                    barrier: BarrierKind::Indeterminate,
                    barrier_magnitude: 0,
                    confidence_permille: 0,
                    terminal_digits: crate::pool::StrSpan::EMPTY,
                    terminal: TerminalKind::None,
                    chain: Chain::default(),
                })
            }
            TokenKind::True => {
                self.advance();
                self.alloc(Node::Bool {
                    value: true,
                    chain: Chain::default(),
                })
            }
            TokenKind::False => {
                self.advance();
                self.alloc(Node::Bool {
                    value: false,
                    chain: Chain::default(),
                })
            }
            TokenKind::String => {
                let tok = self.advance();
                let raw = self.token_text(tok);
                let unescaped = unescape_string_literal(raw);
                let text = self.strings.intern_bytes(&unescaped);
                self.alloc(Node::String {
                    text,
                    chain: Chain::default(),
                })
            }
            TokenKind::Identifier => self.parse_identifier_or_call(),
            TokenKind::Array4d => self.parse_array4d_access(),
            TokenKind::MathDot => self.parse_math_call(),
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_expr()?;
                self.expect(TokenKind::RParen, "')' to close parenthesized expression")?;
                Ok(expr)
            }
            TokenKind::Pipe => {
                self.advance();
                let expr = self.parse_expr()?;
                self.expect(TokenKind::Pipe, "'|' to close parenthesized expression")?;
                Ok(expr)
            }
            TokenKind::ParamToken => {
                let tok = self.advance();
                let raw = self.token_text(tok);
                let name = raw.trim_start_matches("{@param:").trim_end_matches('}');
                let span = self.strings.intern(name);
                self.alloc(Node::Identifier {
                    name: span,
                    chain: Chain::default(),
                })
            }
            // `<<`/`>>` can only be a binary shift operator in infix
            // position, which parse_primary is never called from directly —
            // seen here (starting a new operand) they unambiguously open a
            // timing marker instead.
            TokenKind::Shl
            | TokenKind::Shr
            | TokenKind::TimingBoth
            | TokenKind::Before
            | TokenKind::After => self.parse_timing_op(),
            other => Err(CompileError::parse(
                self.current_offset(),
                format!("unexpected token {:?} in expression", other),
            )),
        }
    }

    fn parse_identifier_or_call(&mut self) -> PResult<NodeIndex> {
        let tok = self.advance();
        let name = self.strings.intern(self.token_text(tok));
        if self.eat(TokenKind::LParen) {
            let args = self.parse_call_args()?;
            self.expect(TokenKind::RParen, "')' to close call arguments")?;
            return self.alloc(Node::FuncCall {
                callee: name,
                args,
                chain: Chain::default(),
            });
        }
        self.alloc(Node::Identifier {
            name,
            chain: Chain::default(),
        })
    }

    fn parse_math_call(&mut self) -> PResult<NodeIndex> {
        self.advance(); // math.
        let name_tok = self.expect(TokenKind::Identifier, "function name after 'math.'")?;
        let mut qualified = String::from("math.");
        qualified.push_str(self.token_text(name_tok));
        let callee = self.strings.intern(&qualified);
        let args = if self.eat(TokenKind::LParen) {
            let args = self.parse_call_args()?;
            self.expect(TokenKind::RParen, "')' to close call arguments")?;
            args
        } else {
            NodeIndex::NONE
        };
        self.alloc(Node::FuncCall {
            callee,
            args,
            chain: Chain::default(),
        })
    }

    fn parse_call_args(&mut self) -> PResult<NodeIndex> {
        let mut head = NodeIndex::NONE;
        let mut tail: Option<NodeIndex> = None;
        if self.at(TokenKind::RParen) {
            return Ok(head);
        }
        loop {
            let arg = self.parse_expr()?;
            self.link(&mut head, &mut tail, arg);
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        Ok(head)
    }

    fn parse_array4d_access(&mut self) -> PResult<NodeIndex> {
        self.advance(); // array.4d
        let name_tok = self.expect(TokenKind::Identifier, "array name")?;
        let name = self.strings.intern(self.token_text(name_tok));
        let indices = self.parse_four_brackets()?;
        self.alloc(Node::Array4dAccess {
            name,
            indices,
            chain: Chain::default(),
        })
    }

    fn parse_timing_op(&mut self) -> PResult<NodeIndex> {
        let head_kind = self.advance().kind;
        let kind = match head_kind {
            TokenKind::Shl => TimingKind::Onto,
            TokenKind::Shr => TimingKind::Into,
            TokenKind::TimingBoth => TimingKind::Both,
            TokenKind::Before => TimingKind::Before,
            TokenKind::After => TimingKind::After,
            _ => unreachable!(),
        };
        // Optional signed temporal offset literal immediately following the marker.
        let offset = if self.at(TokenKind::Number) {
            let tok = self.advance();
            self.token_text(tok).parse().unwrap_or(0)
        } else if self.at(TokenKind::Minus) && self.peek_at(1).kind == TokenKind::Number {
            self.advance();
            let tok = self.advance();
            -self.token_text(tok).parse::<i64>().unwrap_or(0)
        } else {
            0
        };
        let expr = self.parse_unary()?;
        self.alloc(Node::TimingOp {
            kind,
            expr,
            offset,
            chain: Chain::default(),
        })
    }
}

fn assignment_op(kind: TokenKind) -> Option<BinOp> {
    Some(match kind {
        TokenKind::Assign => BinOp::Assign,
        TokenKind::PlusEq => BinOp::AddAssign,
        TokenKind::MinusEq => BinOp::SubAssign,
        TokenKind::StarEq => BinOp::MulAssign,
        TokenKind::SlashEq => BinOp::DivAssign,
        TokenKind::PercentEq => BinOp::RemAssign,
        TokenKind::StarStarEq => BinOp::PowAssign,
        _ => return None,
    })
}

/// Process the standard backslash escapes inside a lexed string literal's
/// quotes. The lexer hands us the raw source span including the quotes.
fn unescape_string_literal(raw: &str) -> Vec<u8> {
    let inner = &raw[1..raw.len().saturating_sub(1)];
    let mut out = Vec::with_capacity(inner.len());
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            let mut buf = [0u8; 4];
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        match chars.next() {
            Some('n') => out.push(b'\n'),
            Some('t') => out.push(b'\t'),
            Some('r') => out.push(b'\r'),
            Some('0') => out.push(0),
            Some('\\') => out.push(b'\\'),
            Some('"') => out.push(b'"'),
            Some(other) => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(other.encode_utf8(&mut buf).as_bytes());
            }
            None => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(src: &str) -> ParseOutput {
        let out = Parser::new(src).parse().expect("fatal parse error");
        assert!(out.errors.is_empty(), "parse errors: {:?}", out.errors);
        out
    }

    fn program_first(out: &ParseOutput) -> NodeIndex {
        match out.nodes.get(out.root) {
            Node::Program { first } => *first,
            _ => panic!("expected Program node"),
        }
    }

    #[test]
    fn parses_empty_program() {
        let out = parse_ok("");
        assert!(program_first(&out).is_none());
    }

    #[test]
    fn parses_var_def_and_print() {
        let out = parse_ok("var x = 41\nprint x");
        let first = program_first(&out);
        match out.nodes.get(first) {
            Node::VarDef { var_type, .. } => assert_eq!(*var_type, VarType::Inferred),
            other => panic!("expected VarDef, got {:?}", other),
        }
    }

    #[test]
    fn precedence_climbing_prefers_mul_over_add() {
        let out = parse_ok("print 1 + 2 * 3");
        let first = program_first(&out);
        let content = match out.nodes.get(first) {
            Node::Output { content, .. } => *content,
            _ => panic!(),
        };
        match out.nodes.get(content) {
            Node::BinaryOp {
                op: BinOp::Add,
                right,
                ..
            } => match out.nodes.get(*right) {
                Node::BinaryOp { op: BinOp::Mul, .. } => {}
                other => panic!("expected nested Mul, got {:?}", other),
            },
            other => panic!("expected top-level Add, got {:?}", other),
        }
    }

    #[test]
    fn pow_is_right_associative() {
        // 2 ** 3 ** 2 should parse as 2 ** (3 ** 2).
        let out = parse_ok("print 2 ** 3 ** 2");
        let first = program_first(&out);
        let content = match out.nodes.get(first) {
            Node::Output { content, .. } => *content,
            _ => panic!(),
        };
        match out.nodes.get(content) {
            Node::BinaryOp {
                op: BinOp::Pow,
                right,
                ..
            } => match out.nodes.get(*right) {
                Node::BinaryOp { op: BinOp::Pow, .. } => {}
                other => panic!("expected nested Pow on the right, got {:?}", other),
            },
            other => panic!("expected top-level Pow, got {:?}", other),
        }
    }

    #[test]
    fn parses_if_else_with_action_blocks() {
        let out = parse_ok("if (1 < 2) do/ print \"yes\" \\ else do/ print \"no\" \\");
        let first = program_first(&out);
        match out.nodes.get(first) {
            Node::Conditional {
                kind: ConditionalKind::If,
                else_body,
                ..
            } => assert!(else_body.is_some()),
            other => panic!("expected Conditional, got {:?}", other),
        }
    }

    #[test]
    fn parses_while_loop() {
        let out = parse_ok("var i = 0\nwhile (i < 3) do/ i = i + 1 \\");
        let first = program_first(&out);
        let while_node = out.nodes.get(first).next_sibling();
        match out.nodes.get(while_node) {
            Node::WhileLoop { .. } => {}
            other => panic!("expected WhileLoop, got {:?}", other),
        }
    }

    #[test]
    fn parses_func_def_with_params_and_call() {
        let out = parse_ok("|add| a b < do/ return a + b \\ :>\nprint add(1, 2)");
        let first = program_first(&out);
        match out.nodes.get(first) {
            Node::FuncDef { declared, .. } => assert!(!declared),
            other => panic!("expected FuncDef, got {:?}", other),
        }
    }

    #[test]
    fn declare_block_marks_func_def_declared() {
        let out = parse_ok("declare/ |helper| < do/ return 1 \\ :> \\");
        let first = program_first(&out);
        match out.nodes.get(first) {
            Node::DeclareBlock { first, .. } => match out.nodes.get(*first) {
                Node::FuncDef { declared, .. } => assert!(*declared),
                other => panic!("expected FuncDef inside declare block, got {:?}", other),
            },
            other => panic!("expected DeclareBlock, got {:?}", other),
        }
    }

    #[test]
    fn parses_switch_with_default() {
        let out = parse_ok("switch (x) { case 1: print \"one\" default: print \"other\" }");
        let first = program_first(&out);
        match out.nodes.get(first) {
            Node::Switch {
                first_case,
                default,
                ..
            } => {
                assert!(first_case.is_some());
                assert!(default.is_some());
            }
            other => panic!("expected Switch, got {:?}", other),
        }
    }

    #[test]
    fn string_literal_escapes_are_resolved() {
        let out = parse_ok("print \"hi\\n\"");
        let first = program_first(&out);
        let content = match out.nodes.get(first) {
            Node::Output { content, .. } => *content,
            _ => panic!(),
        };
        match out.nodes.get(content) {
            Node::String { text, .. } => {
                assert_eq!(out.strings.get_bytes(*text), b"hi\n");
            }
            other => panic!("expected String, got {:?}", other),
        }
    }

    #[test]
    fn star_eq_is_compound_multiply_not_blaze_equality() {
        let out = parse_ok("var x = 2\nx *= 3");
        let assign = out.nodes.get(program_first(&out)).next_sibling();
        match out.nodes.get(assign) {
            Node::BinaryOp {
                op: BinOp::MulAssign,
                ..
            } => {}
            other => panic!("expected MulAssign, got {:?}", other),
        }
    }

    #[test]
    fn shl_in_operand_position_is_a_timing_marker() {
        let out = parse_ok("print << 5");
        let first = program_first(&out);
        let content = match out.nodes.get(first) {
            Node::Output { content, .. } => *content,
            _ => panic!(),
        };
        match out.nodes.get(content) {
            Node::TimingOp {
                kind: TimingKind::Onto,
                ..
            } => {}
            other => panic!("expected TimingOp(Onto), got {:?}", other),
        }
    }

    #[test]
    fn pipe_in_infix_position_is_bitwise_or() {
        let out = parse_ok("print 1 | 2");
        let first = program_first(&out);
        let content = match out.nodes.get(first) {
            Node::Output { content, .. } => *content,
            _ => panic!(),
        };
        match out.nodes.get(content) {
            Node::BinaryOp { op: BinOp::BitOr, .. } => {}
            other => panic!("expected BitOr, got {:?}", other),
        }
    }

    #[test]
    fn caret_in_infix_position_is_bitwise_xor() {
        let out = parse_ok("print 1 ^ 2");
        let first = program_first(&out);
        let content = match out.nodes.get(first) {
            Node::Output { content, .. } => *content,
            _ => panic!(),
        };
        match out.nodes.get(content) {
            Node::BinaryOp { op: BinOp::BitXor, .. } => {}
            other => panic!("expected BitXor, got {:?}", other),
        }
    }

    #[test]
    fn pipe_still_opens_parenthesization_at_primary_position() {
        let out = parse_ok("print |1 + 2|");
        let first = program_first(&out);
        let content = match out.nodes.get(first) {
            Node::Output { content, .. } => *content,
            _ => panic!(),
        };
        match out.nodes.get(content) {
            Node::BinaryOp { op: BinOp::Add, .. } => {}
            other => panic!("expected parenthesized Add, got {:?}", other),
        }
    }

    #[test]
    fn shl_in_infix_position_is_still_a_shift() {
        let out = parse_ok("print 1 << 2");
        let first = program_first(&out);
        let content = match out.nodes.get(first) {
            Node::Output { content, .. } => *content,
            _ => panic!(),
        };
        match out.nodes.get(content) {
            Node::BinaryOp { op: BinOp::Shl, .. } => {}
            other => panic!("expected Shl, got {:?}", other),
        }
    }

    #[test]
    fn recovers_after_parse_error() {
        let out = Parser::new("var = ;\nprint 1").parse().unwrap();
        assert!(!out.errors.is_empty());
    }

    #[test]
    fn pool_exhaustion_is_fatal() {
        let err = Parser::with_capacity("print 1", 2).parse().unwrap_err();
        assert_eq!(err.phase, crate::error::Phase::Parse);
    }
}
