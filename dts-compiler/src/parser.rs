//! Syntactic analysis.
//!
//! [`parse`] consumes the tokens of a source file, with the tokens of every included file spliced
//! in at the point of inclusion, and builds the [`Tree`] they describe. Blocks that amend a node
//! by reference (`&label { ... };`) cannot be resolved before the whole input is known, so they
//! are parsed into detached subtrees and returned as pending [`Edit`]s for the validator.
//!
//! Nested blocks are parsed with an explicit frame stack, so nesting depth is bounded only by
//! memory.

use std::collections::{HashSet, VecDeque};

use thiserror::Error;
use tracing::{debug, trace};

use crate::{
    error::{Error, Position},
    expr::{BinaryOp, Closed, EvalError, Evaluator, UnaryOp},
    lexer::{Directive, LexError, Lexer, Symbol, Token, TokenKind},
    source::{SourceId, SourceMap},
    tree::{
        Cell, CellWidth, Deletion, Event, MemReserve, NodeId, Property, Reference, Tree, Value,
    },
};

/// Fatal error raised while parsing the token stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseErrorKind {
    #[error("unexpected {found}, expected {expected}")]
    UnexpectedToken {
        found: String,
        expected: &'static str,
    },
    #[error("missing `;` after {after}")]
    MissingSemicolon { after: &'static str },
    #[error("mismatched brace")]
    MismatchedBrace,
    #[error("duplicate property `{0}`")]
    DuplicateProperty(String),
    #[error("invalid cell width {0}, expected 8, 16, 32 or 64")]
    InvalidCellWidth(u64),
    #[error("invalid expression: {0}")]
    InvalidExpression(EvalError),
    #[error("recursive inclusion of \"{0}\"")]
    RecursiveInclude(String),
    #[error("included file \"{0}\" not found")]
    IncludeNotFound(String),
}

/// A top-level item that targets a node by reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Edit {
    /// `&target { ... };`, whose contents were parsed into the detached subtree `node`.
    Amend {
        target: Reference,
        node: NodeId,
        position: Position,
    },
    /// `/delete-node/ &target;`
    Delete {
        target: Reference,
        position: Position,
    },
    /// `/omit-if-no-ref/ &target;`
    OmitIfNoRef {
        target: Reference,
        position: Position,
    },
}

impl Edit {
    pub fn target(&self) -> &Reference {
        match self {
            Edit::Amend { target, .. }
            | Edit::Delete { target, .. }
            | Edit::OmitIfNoRef { target, .. } => target,
        }
    }

    pub fn position(&self) -> Position {
        match self {
            Edit::Amend { position, .. }
            | Edit::Delete { position, .. }
            | Edit::OmitIfNoRef { position, .. } => *position,
        }
    }
}

/// Output of the parser: the tree built from the input and the edits still to be applied to it.
#[derive(Debug, Clone)]
pub struct ParsedTree {
    pub tree: Tree,
    /// Edits in source order.
    pub edits: Vec<Edit>,
}

impl ParsedTree {
    /// Every reference in the input, including edit targets, in no particular order.
    pub fn references(&self) -> Vec<&Reference> {
        let amendments = self.edits.iter().filter_map(|edit| match edit {
            Edit::Amend { node, .. } => Some(*node),
            _ => None,
        });

        let mut references: Vec<&Reference> = self.edits.iter().map(Edit::target).collect();
        for start in std::iter::once(self.tree.root()).chain(amendments) {
            for id in self.tree.walk_from(start).filter_map(entered) {
                for property in self.tree.node(id).properties.values() {
                    references.extend(property.references());
                }
            }
        }
        references
    }
}

fn entered(event: Event) -> Option<NodeId> {
    match event {
        Event::Enter(id) => Some(id),
        Event::Leave(_) => None,
    }
}

/// Parse the source file `source` and everything it includes.
pub fn parse(sources: &mut SourceMap, source: SourceId) -> Result<ParsedTree, Error> {
    let mut parser = Parser::new(sources, source);
    parser.file()?;

    debug!(
        tokens = parser.tokens.consumed,
        nodes = parser.tree.len(),
        edits = parser.edits.len(),
        "parsed {}",
        parser.tokens.sources.path(source).display()
    );

    Ok(ParsedTree {
        tree: parser.tree,
        edits: parser.edits,
    })
}

/* === Token stream === */

enum Entry {
    Token(Token),
    Failed(LexError),
    Leave(SourceId),
}

/// Tokens still to be parsed, with included files spliced in.
///
/// A lexical error is queued in place of the token it prevented, so that errors are reported in
/// source order.
struct TokenStream<'m> {
    sources: &'m mut SourceMap,
    pending: VecDeque<Entry>,
    /// Files currently being read, outermost first.
    active: Vec<SourceId>,
    /// Position of the last consumed token.
    last: Position,
    consumed: usize,
}

impl<'m> TokenStream<'m> {
    fn new(sources: &'m mut SourceMap, source: SourceId) -> Self {
        let pending = lex(sources.text(source), source);

        Self {
            sources,
            pending,
            active: vec![source],
            last: Position::new(source, 1, 1),
            consumed: 0,
        }
    }

    fn peek(&mut self) -> Result<Option<&Token>, Error> {
        loop {
            match self.pending.front() {
                Some(Entry::Leave(id)) => {
                    debug_assert_eq!(self.active.last(), Some(id));
                    self.active.pop();
                    self.pending.pop_front();
                }
                Some(Entry::Failed(e)) => return Err(e.clone().into()),
                Some(Entry::Token(_)) | None => break,
            }
        }

        Ok(match self.pending.front() {
            Some(Entry::Token(token)) => Some(token),
            _ => None,
        })
    }

    fn next(&mut self) -> Result<Option<Token>, Error> {
        self.peek()?;

        match self.pending.pop_front() {
            Some(Entry::Token(token)) => {
                self.last = token.position;
                self.consumed += 1;
                Ok(Some(token))
            }
            _ => Ok(None),
        }
    }

    /// Splices the tokens of the file named by an include directive at `position`.
    fn include(&mut self, name: &str, position: Position) -> Result<(), Error> {
        let path = self
            .sources
            .find_include(position.source, name)
            .ok_or_else(|| parse_error(ParseErrorKind::IncludeNotFound(name.into()), position))?;

        let id = self.sources.load(&path)?;
        if self.active.contains(&id) {
            return Err(parse_error(
                ParseErrorKind::RecursiveInclude(name.into()),
                position,
            ));
        }

        trace!("including {}", path.display());

        let mut spliced = lex(self.sources.text(id), id);
        spliced.push_back(Entry::Leave(id));
        spliced.append(&mut self.pending);
        self.pending = spliced;
        self.active.push(id);

        Ok(())
    }
}

fn lex(text: &str, source: SourceId) -> VecDeque<Entry> {
    Lexer::new(text, source)
        .map(|token| match token {
            Ok(token) => Entry::Token(token),
            Err(e) => Entry::Failed(e),
        })
        .collect()
}

/* === Parser === */

/// An open `{ ... }` block.
struct Frame {
    node: NodeId,
    /// Position of the opening brace.
    open: Position,
    /// The node existed before this block: children merge by name and properties overwrite.
    amending: bool,
    /// The node belongs to a detached amendment subtree: deletions are recorded for later.
    detached: bool,
    /// Properties declared in this block.
    declared: HashSet<String>,
}

impl Frame {
    fn new(node: NodeId, open: Position, amending: bool, detached: bool) -> Self {
        Self {
            node,
            open,
            amending,
            detached,
            declared: HashSet::new(),
        }
    }
}

struct Parser<'m> {
    tokens: TokenStream<'m>,
    tree: Tree,
    edits: Vec<Edit>,
    root_seen: bool,
}

impl<'m> Parser<'m> {
    fn new(sources: &'m mut SourceMap, source: SourceId) -> Self {
        Self {
            tokens: TokenStream::new(sources, source),
            tree: Tree::new(Position::new(source, 1, 1)),
            edits: Vec::new(),
            root_seen: false,
        }
    }

    /// Parse a whole source file.
    fn file(&mut self) -> Result<(), Error> {
        while let Some(token) = self.tokens.next()? {
            let position = token.position;

            match token.kind {
                TokenKind::Directive(Directive::Version) => self.semicolon("`/dts-v1/`")?,
                TokenKind::Directive(Directive::MemReserve) => {
                    let address = self.integer()?;
                    let size = self.integer()?;
                    self.semicolon("`/memreserve/`")?;
                    self.tree.memreserves.push(MemReserve { address, size });
                }
                TokenKind::Directive(Directive::Include) => self.include(position)?,
                TokenKind::Directive(Directive::DeleteNode) => {
                    let target = self.reference()?;
                    self.semicolon("`/delete-node/`")?;
                    self.edits.push(Edit::Delete { target, position });
                }
                TokenKind::Directive(Directive::OmitIfNoRef) => {
                    let target = self.reference()?;
                    self.semicolon("`/omit-if-no-ref/`")?;
                    self.edits.push(Edit::OmitIfNoRef { target, position });
                }
                TokenKind::Symbol(Symbol::RBrace) => {
                    return Err(parse_error(ParseErrorKind::MismatchedBrace, position))
                }
                TokenKind::Label(_)
                | TokenKind::Symbol(Symbol::Slash)
                | TokenKind::Ref(_)
                | TokenKind::Ident(_) => self.top_level_node(token)?,
                _ => return Err(unexpected(&token, "a top-level item")),
            }
        }

        Ok(())
    }

    /// Parse a top-level node definition: the root node, an amendment of a referenced node, or a
    /// child of the root.
    fn top_level_node(&mut self, first: Token) -> Result<(), Error> {
        let mut labels = Vec::new();
        let mut token = first;
        loop {
            match token.kind {
                TokenKind::Label(label) => {
                    labels.push(label);
                    token = self.expect_any("a node")?;
                }
                kind => {
                    token = Token { kind, ..token };
                    break;
                }
            }
        }

        let position = token.position;
        match token.kind {
            TokenKind::Symbol(Symbol::Slash) => {
                let root = self.tree.root();
                if !self.root_seen {
                    self.tree.node_mut(root).position = position;
                }
                let amending = self.root_seen;
                self.root_seen = true;

                self.add_labels(root, labels);
                self.body(root, amending, false)
            }
            TokenKind::Ref(target) => {
                let node = self.tree.add_node("", position);
                self.add_labels(node, labels);
                self.edits.push(Edit::Amend {
                    target,
                    node,
                    position,
                });
                self.body(node, false, true)
            }
            TokenKind::Ident(name) => {
                let root = self.tree.root();
                let (node, amending) = match self.tree.child_named(root, &name) {
                    Some(existing) => (existing, true),
                    None => (self.tree.add_child(root, name, position), false),
                };

                self.add_labels(node, labels);
                self.body(node, amending, false)
            }
            _ => Err(unexpected(&token, "`/`, a reference or a node name")),
        }
    }

    /// Parse a node body `{ ... };` into `node`.
    fn body(&mut self, node: NodeId, amending: bool, detached: bool) -> Result<(), Error> {
        let open = self.expect(Symbol::LBrace, "`{`")?;
        let mut stack = vec![Frame::new(node, open, amending, detached)];

        while let Some(frame) = stack.last_mut() {
            let Some(token) = self.tokens.next()? else {
                return Err(parse_error(ParseErrorKind::MismatchedBrace, frame.open));
            };
            let position = token.position;

            match token.kind {
                TokenKind::Symbol(Symbol::RBrace) => {
                    self.semicolon("node")?;
                    stack.pop();
                }
                TokenKind::Directive(Directive::Include) => self.include(position)?,
                TokenKind::Directive(Directive::DeleteProperty) => {
                    let name = self.name("a property name")?;
                    self.semicolon("`/delete-property/`")?;
                    self.delete_property(frame, name);
                }
                TokenKind::Directive(Directive::DeleteNode) => {
                    let name = self.name("a node name")?;
                    self.semicolon("`/delete-node/`")?;
                    self.delete_node(frame, name);
                }
                TokenKind::Directive(Directive::OmitIfNoRef)
                | TokenKind::Label(_)
                | TokenKind::Ident(_) => {
                    if let Some(child) = self.entry(frame, token)? {
                        stack.push(child);
                    }
                }
                _ => return Err(unexpected(&token, "a property, a child node or `}`")),
            }
        }

        Ok(())
    }

    /// Parse a property or the head of a child node. Returns the frame of the child node, whose
    /// opening brace has been consumed.
    fn entry(&mut self, frame: &mut Frame, first: Token) -> Result<Option<Frame>, Error> {
        let mut labels = Vec::new();
        let mut omit_if_no_ref = false;
        let mut token = first;

        let (name, position) = loop {
            match token.kind {
                TokenKind::Label(label) => labels.push(label),
                TokenKind::Directive(Directive::OmitIfNoRef) => omit_if_no_ref = true,
                TokenKind::Ident(name) => break (name, token.position),
                kind => return Err(unexpected(&Token { kind, ..token }, "a property or node name")),
            }
            token = self.expect_any("a property or node name")?;
        };

        let token = self.expect_any("`=`, `;` or `{`")?;
        match token.kind {
            TokenKind::Symbol(Symbol::LBrace) => {
                let existing = if frame.amending {
                    self.tree.child_named(frame.node, &name)
                } else {
                    None
                };
                let child = match existing {
                    Some(child) => child,
                    None => self.tree.add_child(frame.node, name, position),
                };

                self.add_labels(child, labels);
                if omit_if_no_ref {
                    self.tree.node_mut(child).omit_if_no_ref = true;
                }

                Ok(Some(Frame::new(
                    child,
                    token.position,
                    existing.is_some(),
                    frame.detached,
                )))
            }
            _ if omit_if_no_ref => Err(unexpected(&token, "`{`")),
            TokenKind::Symbol(Symbol::Equals) => {
                let values = self.values()?;
                self.semicolon("property value")?;
                self.define_property(frame, Property::new(name, values, position))?;
                Ok(None)
            }
            TokenKind::Symbol(Symbol::Semicolon) => {
                self.define_property(frame, Property::new(name, Vec::new(), position))?;
                Ok(None)
            }
            _ => Err(parse_error(
                ParseErrorKind::MissingSemicolon { after: "property" },
                token.position,
            )),
        }
    }

    fn define_property(&mut self, frame: &mut Frame, property: Property) -> Result<(), Error> {
        if !frame.declared.insert(property.name.clone()) {
            return Err(parse_error(
                ParseErrorKind::DuplicateProperty(property.name),
                property.position,
            ));
        }

        self.tree
            .node_mut(frame.node)
            .properties
            .insert(property.name.clone(), property);
        Ok(())
    }

    fn delete_property(&mut self, frame: &mut Frame, name: String) {
        frame.declared.remove(&name);

        let node = self.tree.node_mut(frame.node);
        node.properties.shift_remove(&name);
        if frame.detached {
            node.deletions.push(Deletion::Property(name));
        }
    }

    fn delete_node(&mut self, frame: &mut Frame, name: String) {
        if let Some(child) = self.tree.child_named(frame.node, &name) {
            self.tree.detach(child);
        } else if !frame.detached {
            trace!("ignoring deletion of missing node `{name}`");
        }

        if frame.detached {
            self.tree
                .node_mut(frame.node)
                .deletions
                .push(Deletion::Node(name));
        }
    }

    fn add_labels(&mut self, node: NodeId, labels: Vec<String>) {
        let node = self.tree.node_mut(node);
        for label in labels {
            if !node.labels.contains(&label) {
                node.labels.push(label);
            }
        }
    }

    /// Parse the comma-separated values of a property.
    fn values(&mut self) -> Result<Vec<Value>, Error> {
        let mut values = vec![self.value()?];
        while self.eat(Symbol::Comma)? {
            values.push(self.value()?);
        }
        Ok(values)
    }

    fn value(&mut self) -> Result<Value, Error> {
        let token = self.expect_any("a property value")?;

        match token.kind {
            TokenKind::Str(s) => Ok(Value::Str(s)),
            TokenKind::Bytes(bytes) => Ok(Value::Bytes(bytes)),
            TokenKind::Ref(reference) => Ok(Value::Ref(reference)),
            TokenKind::Num(n) => Ok(Value::Cells {
                width: CellWidth::W32,
                cells: vec![Cell::Lit(n)],
            }),
            TokenKind::Symbol(Symbol::LAngle) => self.cells(CellWidth::W32),
            TokenKind::Directive(Directive::Bits) => {
                let bits = self.integer()?;
                let width = CellWidth::from_bits(bits).ok_or_else(|| {
                    parse_error(ParseErrorKind::InvalidCellWidth(bits), token.position)
                })?;
                self.expect(Symbol::LAngle, "`<`")?;
                self.cells(width)
            }
            _ => Err(unexpected(&token, "a property value")),
        }
    }

    /// Parse the cells of a cell array, after the opening `<`.
    fn cells(&mut self, width: CellWidth) -> Result<Value, Error> {
        let mut cells = Vec::new();

        loop {
            let token = self.expect_any("a cell or `>`")?;
            let cell = match token.kind {
                TokenKind::Symbol(Symbol::RAngle) => break,
                TokenKind::Num(n) => Cell::Lit(n),
                TokenKind::Char(c) => Cell::Lit(c as u64),
                TokenKind::Ref(reference) if width == CellWidth::W32 => Cell::Ref(reference),
                TokenKind::Symbol(Symbol::LParen) => Cell::Lit(self.parenthesized(token.position)?),
                _ if width != CellWidth::W32 => {
                    return Err(unexpected(&token, "an integer cell"));
                }
                _ => return Err(unexpected(&token, "a cell or `>`")),
            };
            cells.push(cell);
        }

        Ok(Value::Cells { width, cells })
    }

    /// Parse an integer literal or a parenthesized expression.
    fn integer(&mut self) -> Result<u64, Error> {
        let token = self.expect_any("an integer")?;

        match token.kind {
            TokenKind::Num(n) => Ok(n),
            TokenKind::Symbol(Symbol::LParen) => self.parenthesized(token.position),
            _ => Err(unexpected(&token, "an integer")),
        }
    }

    /// Parse and evaluate an expression, after its opening parenthesis at `open`.
    ///
    /// Tokens alternate between operand position (literals, unary operators, open parentheses)
    /// and operator position (binary operators, `?`, `:`, closing parentheses) until the
    /// parenthesis at `open` is closed.
    fn parenthesized(&mut self, open: Position) -> Result<u64, Error> {
        let invalid = |e| parse_error(ParseErrorKind::InvalidExpression(e), open);
        let mut eval = Evaluator::default();

        loop {
            let token = self.expect_any("an operand")?;
            match token.kind {
                TokenKind::Num(n) => eval.operand(n),
                TokenKind::Char(c) => eval.operand(c as u64),
                TokenKind::Symbol(Symbol::LParen) => {
                    eval.open();
                    continue;
                }
                TokenKind::Symbol(symbol) => match UnaryOp::from_symbol(symbol) {
                    Some(op) => {
                        eval.unary(op);
                        continue;
                    }
                    None => return Err(unexpected(&token, "an operand")),
                },
                _ => return Err(unexpected(&token, "an operand")),
            }

            loop {
                let token = self.expect_any("an operator or `)`")?;
                match token.kind {
                    TokenKind::Symbol(Symbol::RParen) => match eval.close().map_err(invalid)? {
                        Closed::Group => continue,
                        Closed::Outermost => return Ok(eval.value()),
                        Closed::Unbalanced => return Err(unexpected(&token, "`:`")),
                    },
                    TokenKind::Symbol(Symbol::Question) => eval.condition().map_err(invalid)?,
                    TokenKind::Symbol(Symbol::Colon) => {
                        if !eval.alternative().map_err(invalid)? {
                            return Err(unexpected(&token, "an operator or `)`"));
                        }
                    }
                    TokenKind::Symbol(symbol) => match BinaryOp::from_symbol(symbol) {
                        Some(op) => eval.binary(op).map_err(invalid)?,
                        None => return Err(unexpected(&token, "an operator or `)`")),
                    },
                    _ => return Err(unexpected(&token, "an operator or `)`")),
                }
                break;
            }
        }
    }

    fn include(&mut self, directive: Position) -> Result<(), Error> {
        let token = self.expect_any("a quoted file name")?;
        match token.kind {
            TokenKind::Str(name) => self.tokens.include(&name, directive),
            _ => Err(unexpected(&token, "a quoted file name")),
        }
    }

    fn reference(&mut self) -> Result<Reference, Error> {
        let token = self.expect_any("a node reference")?;
        match token.kind {
            TokenKind::Ref(reference) => Ok(reference),
            _ => Err(unexpected(&token, "a node reference")),
        }
    }

    fn name(&mut self, expected: &'static str) -> Result<String, Error> {
        let token = self.expect_any(expected)?;
        match token.kind {
            TokenKind::Ident(name) => Ok(name),
            _ => Err(unexpected(&token, expected)),
        }
    }

    /* === Low-level helpers === */

    /// Consume the statement terminator.
    fn semicolon(&mut self, after: &'static str) -> Result<(), Error> {
        match self.tokens.next()? {
            Some(Token {
                kind: TokenKind::Symbol(Symbol::Semicolon),
                ..
            }) => Ok(()),
            Some(token) => Err(parse_error(
                ParseErrorKind::MissingSemicolon { after },
                token.position,
            )),
            None => Err(parse_error(
                ParseErrorKind::MissingSemicolon { after },
                self.tokens.last,
            )),
        }
    }

    /// Consume `symbol`, returning its position.
    fn expect(&mut self, symbol: Symbol, expected: &'static str) -> Result<Position, Error> {
        let token = self.expect_any(expected)?;
        match token.kind {
            TokenKind::Symbol(s) if s == symbol => Ok(token.position),
            _ => Err(unexpected(&token, expected)),
        }
    }

    /// Consume the next token, failing at the end of the input.
    fn expect_any(&mut self, expected: &'static str) -> Result<Token, Error> {
        self.tokens.next()?.ok_or_else(|| {
            parse_error(
                ParseErrorKind::UnexpectedToken {
                    found: "end of input".into(),
                    expected,
                },
                self.tokens.last,
            )
        })
    }

    /// Consume `symbol` if it is the next token.
    fn eat(&mut self, symbol: Symbol) -> Result<bool, Error> {
        let found = matches!(
            self.tokens.peek()?,
            Some(Token { kind: TokenKind::Symbol(s), .. }) if *s == symbol
        );
        if found {
            self.tokens.next()?;
        }
        Ok(found)
    }
}

fn parse_error(kind: ParseErrorKind, position: Position) -> Error {
    Error::Parse(ParseError { kind, position })
}

fn unexpected(token: &Token, expected: &'static str) -> Error {
    parse_error(
        ParseErrorKind::UnexpectedToken {
            found: token.kind.to_string(),
            expected,
        },
        token.position,
    )
}

/* === Unit Tests === */

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;

    fn parse_str(input: &str) -> Result<ParsedTree, Error> {
        let mut sources = SourceMap::default();
        let id = sources.add("test.dts", input);
        parse(&mut sources, id)
    }

    fn parse_error_kind(input: &str) -> ParseErrorKind {
        match parse_str(dbg!(input)) {
            Err(Error::Parse(e)) => e.kind,
            other => panic!("unexpected result {other:?}"),
        }
    }

    fn property(input: &str) -> Vec<Value> {
        let parsed = parse_str(&format!("/ {{ {input} }};")).unwrap();
        let root = parsed.tree.node(parsed.tree.root());
        root.properties[0].values.clone()
    }

    fn cells(cells: Vec<Cell>) -> Value {
        Value::Cells {
            width: CellWidth::W32,
            cells,
        }
    }

    #[test]
    fn parse_properties() {
        use Cell::Lit;

        for (input, expected) in [
            (r#"device_type = "cpu";"#, vec![Value::Str("cpu".into())]),
            (
                r#"compatible = "ns16550", "ns8250";"#,
                vec![Value::Str("ns16550".into()), Value::Str("ns8250".into())],
            ),
            (
                r#"example = <&mpic 0xf00f0000 19>, "a strange property format";"#,
                vec![
                    cells(vec![
                        Cell::Ref(Reference::Label("mpic".into())),
                        Lit(0xf00f_0000),
                        Lit(19),
                    ]),
                    Value::Str("a strange property format".into()),
                ],
            ),
            ("reg = <0>;", vec![cells(vec![Lit(0)])]),
            ("cache-unified;", vec![]),
            ("interrupts = <17 0xc 'A'>;", vec![cells(vec![Lit(17), Lit(0xc), Lit(65)])]),
            (
                "serial0 = &usart3;",
                vec![Value::Ref(Reference::Label("usart3".into()))],
            ),
            (
                "cpu = <&{/cpus/cpu@0}>;",
                vec![cells(vec![Cell::Ref(Reference::Path("/cpus/cpu@0".into()))])],
            ),
            ("pinctrl-0 = <>;", vec![cells(vec![])]),
            ("x = 5;", vec![cells(vec![Lit(5)])]),
            ("mac = [00 11 22];", vec![Value::Bytes(vec![0, 0x11, 0x22])]),
            (
                "w = /bits/ 8 <1 2>, /bits/ 64 <3>;",
                vec![
                    Value::Cells {
                        width: CellWidth::W8,
                        cells: vec![Lit(1), Lit(2)],
                    },
                    Value::Cells {
                        width: CellWidth::W64,
                        cells: vec![Lit(3)],
                    },
                ],
            ),
            ("label: x = <1>;", vec![cells(vec![Lit(1)])]),
        ] {
            assert_eq!(property(dbg!(input)), expected);
        }
    }

    #[test]
    fn parse_expressions() {
        for (input, expected) in [
            ("(1 << 4)", 16),
            ("(0x10 + 2)", 0x12),
            ("(1 + 2 * 3)", 7),
            ("((1 + 2) * 3)", 9),
            ("(10 - 2 - 3)", 5),
            ("(-1)", u64::MAX),
            ("(~0 & 0xff)", 0xff),
            ("(!0)", 1),
            ("(1 < 2)", 1),
            ("(2 >= 3)", 0),
            ("(1 ? 2 : 3)", 2),
            ("(0 ? 2 : 0 ? 3 : 4)", 4),
            ("(1 | 2 ^ 3 & 4)", 1 | (2 ^ (3 & 4))),
            ("(1 == 1 && 2 != 2 || 1)", 1),
            ("('a' + 1)", 98),
        ] {
            assert_eq!(
                property(&format!("x = <{input}>;")),
                vec![cells(vec![Cell::Lit(expected)])],
                "{input}"
            );
        }
    }

    #[test]
    fn parse_nodes() {
        let parsed = parse_str(
            r#"
/dts-v1/;
/memreserve/ 0x1000 0x2000;

/ {
    #address-cells = <1>;
    cpus {
        cpu@0 { reg = <0>; };
        L2: L2_1: cache@1 { compatible = "cache"; };
    };
};
"#,
        )
        .unwrap();

        let tree = &parsed.tree;
        assert_eq!(
            tree.memreserves,
            vec![MemReserve {
                address: 0x1000,
                size: 0x2000
            }]
        );

        let cache = tree.find_path("/cpus/cache@1").unwrap();
        assert_eq!(tree.node(cache).labels, vec!["L2", "L2_1"]);
        assert_eq!(tree.node(cache).position.line, 9);
        assert!(tree.find_path("/cpus/cpu@0").is_some());
        assert!(parsed.edits.is_empty());
    }

    #[test]
    fn repeated_root_blocks_merge() {
        let parsed = parse_str(
            r#"
/ { a { x = <1>; y; }; b { }; };
/ { a { x = <2>; }; model = "m"; };
"#,
        )
        .unwrap();

        let tree = &parsed.tree;
        let root = tree.node(tree.root());
        assert_eq!(root.children.len(), 2);
        assert!(root.property("model").is_some());

        let a = tree.node(tree.find_path("/a").unwrap());
        assert_eq!(a.properties.keys().collect::<Vec<_>>(), vec!["x", "y"]);
        assert_eq!(a.properties["x"].values, vec![cells(vec![Cell::Lit(2)])]);
    }

    #[test]
    fn siblings_may_share_a_name() {
        let parsed = parse_str("/ { a { }; a { }; };").unwrap();
        assert_eq!(parsed.tree.node(parsed.tree.root()).children.len(), 2);
    }

    #[test]
    fn top_level_shorthand_nodes() {
        let parsed = parse_str("a { x = <1>; }; a { y; };").unwrap();
        let tree = &parsed.tree;

        let a = tree.find_path("/a").unwrap();
        assert_eq!(tree.node(tree.root()).children, vec![a]);
        assert_eq!(tree.node(a).properties.len(), 2);
    }

    #[test]
    fn deletions() {
        let parsed = parse_str(
            r#"
/ {
    a { };
    b { x; y; };
    /delete-node/ a;
};
/ { b { /delete-property/ x; }; };
"#,
        )
        .unwrap();

        let tree = &parsed.tree;
        assert!(tree.find_path("/a").is_none());
        let b = tree.node(tree.find_path("/b").unwrap());
        assert_eq!(b.properties.keys().collect::<Vec<_>>(), vec!["y"]);
    }

    #[test]
    fn edits() {
        let parsed = parse_str(
            r#"
/ { uart: serial { }; };
&uart { status = "okay"; /delete-property/ clocks; };
/delete-node/ &{/serial};
/omit-if-no-ref/ &uart;
"#,
        )
        .unwrap();

        let kinds: Vec<_> = parsed
            .edits
            .iter()
            .map(|edit| match edit {
                Edit::Amend { .. } => "amend",
                Edit::Delete { .. } => "delete",
                Edit::OmitIfNoRef { .. } => "omit",
            })
            .collect();
        assert_eq!(kinds, vec!["amend", "delete", "omit"]);

        let Edit::Amend { node, target, .. } = &parsed.edits[0] else {
            unreachable!()
        };
        assert_eq!(target, &Reference::Label("uart".into()));

        let amendment = parsed.tree.node(*node);
        assert!(amendment.parent.is_none());
        assert!(amendment.property("status").is_some());
        assert_eq!(
            amendment.deletions,
            vec![Deletion::Property("clocks".into())]
        );
    }

    #[test]
    fn references_are_listed() {
        let parsed = parse_str(
            r#"
/ { a { p = <&x 1 &{/b}>; q = &y; }; };
&z { r = <&w>; };
"#,
        )
        .unwrap();

        let mut names: Vec<_> = parsed.references().iter().map(|r| r.to_string()).collect();
        names.sort();
        assert_eq!(names, vec!["&w", "&x", "&y", "&z", "&{/b}"]);
    }

    #[test]
    fn omit_if_no_ref_nodes() {
        let parsed = parse_str("/ { /omit-if-no-ref/ a: x { }; y { }; };").unwrap();
        let tree = &parsed.tree;

        assert!(tree.node(tree.find_path("/x").unwrap()).omit_if_no_ref);
        assert!(!tree.node(tree.find_path("/y").unwrap()).omit_if_no_ref);
    }

    #[test]
    fn syntax_errors() {
        use ParseErrorKind::*;

        for (input, expected) in [
            ("a { x = 1; x = 2; };", DuplicateProperty("x".into())),
            ("/ { x; x = <1>; };", DuplicateProperty("x".into())),
            ("/ { x = <1> };", MissingSemicolon { after: "property value" }),
            ("/ { x = <1>; }", MissingSemicolon { after: "node" }),
            ("/ { a { };", MismatchedBrace),
            ("};", MismatchedBrace),
            ("/dts-v1/", MissingSemicolon { after: "`/dts-v1/`" }),
            ("/ { x = /bits/ 7 <1>; };", InvalidCellWidth(7)),
            ("/ { x = <(1 / 0)>; };", InvalidExpression(EvalError::DivisionByZero)),
            ("/ { x = <(1 % (2 - 2))>; };", InvalidExpression(EvalError::DivisionByZero)),
            ("/include/ \"missing.dtsi\"", IncludeNotFound("missing.dtsi".into())),
        ] {
            assert_eq!(parse_error_kind(input), expected);
        }
    }

    #[test]
    fn unexpected_tokens() {
        for input in [
            "/ { = };",
            "/ { x = ; };",
            "/ { x = <1 \"s\">; };",
            "/ { x = /bits/ 8 <&a>; };",
            "/ { x = <(1 +)>; };",
            "/ { /omit-if-no-ref/ x; };",
            "\"str\";",
            "/ { x = <1",
            "#include <a.dtsi>",
        ] {
            assert!(matches!(
                parse_error_kind(input),
                ParseErrorKind::UnexpectedToken { .. }
            ));
        }
    }

    #[test]
    fn error_positions() {
        match parse_str("/ {\n  a {\n    x;\n    x;\n  };\n};") {
            Err(Error::Parse(e)) => assert_eq!((e.position.line, e.position.column), (4, 5)),
            other => panic!("unexpected result {other:?}"),
        }

        match parse_str("/ {\n  a {\n") {
            Err(Error::Parse(e)) => {
                assert_eq!(e.kind, ParseErrorKind::MismatchedBrace);
                assert_eq!((e.position.line, e.position.column), (2, 5));
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn lex_errors_are_reported_in_order() {
        assert!(matches!(
            parse_str("/ { x = <1> }; \"unterminated"),
            Err(Error::Parse(_))
        ));
        assert!(matches!(
            parse_str("/ { x = \"unterminated"),
            Err(Error::Lex(_))
        ));
    }

    #[test]
    fn deep_nesting() {
        let depth = 10_000;
        let input = format!("/ {{ {} {} }};", "n { ".repeat(depth), "}; ".repeat(depth));
        let parsed = parse_str(&input).unwrap();

        assert_eq!(parsed.tree.len(), depth + 1);
    }

    #[test]
    fn deeply_nested_expressions() {
        let depth = 20_000;

        for (input, expected) in [
            (format!("x = <{}1{}>;", "(".repeat(depth), ")".repeat(depth)), 1),
            (format!("x = <({}1)>;", "~".repeat(depth)), 1),
            (format!("x = <({}1)>;", "1 + ".repeat(depth)), depth as u64 + 1),
        ] {
            assert_eq!(property(&input), vec![cells(vec![Cell::Lit(expected)])]);
        }
    }

    #[test]
    fn malformed_expressions() {
        for input in [
            "/ { x = <(1 ? 2)>; };",
            "/ { x = <(1 : 2)>; };",
            "/ { x = <(1 2)>; };",
            "/ { x = <((1)>; };",
            "/ { x = <(*1)>; };",
        ] {
            assert!(
                matches!(parse_error_kind(dbg!(input)), ParseErrorKind::UnexpectedToken { .. }),
                "{input}"
            );
        }
    }

    #[test]
    fn includes() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("soc.dtsi"),
            "/ { soc { uart: serial { }; }; };\n",
        )
        .unwrap();
        fs::write(dir.path().join("props.dtsi"), "model = \"board\";").unwrap();
        fs::write(
            dir.path().join("board.dts"),
            "#include \"soc.dtsi\"\n/ { /include/ \"props.dtsi\"\n compatible = \"c\"; };\n",
        )
        .unwrap();

        let mut sources = SourceMap::default();
        let board = sources.load(&dir.path().join("board.dts")).unwrap();
        let parsed = parse(&mut sources, board).unwrap();

        let tree = &parsed.tree;
        let root = tree.node(tree.root());
        assert_eq!(
            root.properties.keys().collect::<Vec<_>>(),
            vec!["model", "compatible"]
        );
        assert_eq!(tree.find_label("uart"), tree.find_path("/soc/serial"));
        assert_eq!(sources.len(), 3);
    }

    #[test]
    fn errors_in_included_files_point_into_them() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bad.dtsi"), "\n\n/ { x = ; };").unwrap();
        fs::write(dir.path().join("board.dts"), "/include/ \"bad.dtsi\"").unwrap();

        let mut sources = SourceMap::default();
        let board = sources.load(&dir.path().join("board.dts")).unwrap();

        match parse(&mut sources, board) {
            Err(Error::Parse(e)) => {
                assert!(sources.path(e.position.source).ends_with("bad.dtsi"));
                assert_eq!(e.position.line, 3);
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn recursive_includes() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.dtsi"), "/include/ \"b.dtsi\"").unwrap();
        fs::write(dir.path().join("b.dtsi"), "/include/ \"a.dtsi\"").unwrap();

        let mut sources = SourceMap::default();
        let a = sources.load(&dir.path().join("a.dtsi")).unwrap();

        match parse(&mut sources, a) {
            Err(Error::Parse(e)) => {
                assert_eq!(e.kind, ParseErrorKind::RecursiveInclude("a.dtsi".into()))
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn same_file_may_be_included_twice_in_sequence() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("n.dtsi"), "/ { n { }; };").unwrap();
        fs::write(
            dir.path().join("board.dts"),
            "/include/ \"n.dtsi\"\n/include/ \"n.dtsi\"",
        )
        .unwrap();

        let mut sources = SourceMap::default();
        let board = sources.load(&dir.path().join("board.dts")).unwrap();
        let parsed = parse(&mut sources, board).unwrap();

        // The second copy amends the first root block, so `n` merges.
        assert_eq!(parsed.tree.node(parsed.tree.root()).children.len(), 1);
    }
}
