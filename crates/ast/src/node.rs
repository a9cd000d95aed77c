use qry_common::{ErrorKind, SemanticError};
use serde::{Deserialize, Serialize};

use crate::token::TokenKind;

/// One immutable parse-tree node: a token kind, its text, an optional
/// source position, and ordered children.
///
/// Nodes are built once by the parser (or by embedding hosts through
/// [`crate::build`]) and never mutated during analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AstNode {
    kind: TokenKind,
    text: String,
    line: u32,
    col: u32,
    children: Vec<AstNode>,
}

impl AstNode {
    /// An interior node for an imaginary token; its text is the grammar
    /// name of the kind.
    pub fn node(kind: TokenKind, children: Vec<AstNode>) -> Self {
        AstNode {
            kind,
            text: kind
                .operator_text()
                .unwrap_or_else(|| kind.name())
                .to_string(),
            line: 0,
            col: 0,
            children,
        }
    }

    /// A leaf carrying lexer text.
    pub fn leaf(kind: TokenKind, text: impl Into<String>) -> Self {
        AstNode {
            kind,
            text: text.into(),
            line: 0,
            col: 0,
            children: Vec::new(),
        }
    }

    /// Attach a source position.
    pub fn at(mut self, line: u32, col: u32) -> Self {
        self.line = line;
        self.col = col;
        self
    }

    pub fn kind(&self) -> TokenKind {
        self.kind
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn col(&self) -> u32 {
        self.col
    }

    pub fn children(&self) -> &[AstNode] {
        &self.children
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    pub fn child(&self, i: usize) -> Option<&AstNode> {
        self.children.get(i)
    }

    /// Child `i`, or an `InvalidPath` error naming this node. For shapes
    /// the grammar guarantees.
    pub fn expect_child(&self, i: usize) -> qry_common::Result<&AstNode> {
        self.children.get(i).ok_or_else(|| {
            ErrorKind::InvalidPath
                .with(format!("node {} has no child {}", self.text, i))
        })
    }

    /// Canonical structural text: leaves render their text, interior nodes
    /// render `(text child...)`. Two subtrees are structurally equal iff
    /// their canonical texts match, which is how aggregation subtrees and
    /// pre-computed expressions are deduplicated.
    pub fn string_tree(&self) -> String {
        if self.children.is_empty() {
            return self.text.clone();
        }
        let mut out = String::from("(");
        out.push_str(&self.text);
        for c in &self.children {
            out.push(' ');
            out.push_str(&c.string_tree());
        }
        out.push(')');
        out
    }

    /// Line of the leftmost leaf under this node.
    pub fn leftmost_line(&self) -> u32 {
        match self.children.first() {
            Some(c) => c.leftmost_line(),
            None => self.line,
        }
    }

    /// Column of the leftmost leaf under this node.
    pub fn leftmost_col(&self) -> u32 {
        match self.children.first() {
            Some(c) => c.leftmost_col(),
            None => self.col,
        }
    }

    /// Text of the rightmost leaf under this node, used when pointing an
    /// error message at a subtree.
    pub fn rightmost_text(&self) -> &str {
        match self.children.last() {
            Some(c) => c.rightmost_text(),
            None => &self.text,
        }
    }

    /// An error of `kind` positioned at this node.
    pub fn error(&self, kind: ErrorKind) -> SemanticError {
        kind.error()
            .at(self.leftmost_line(), self.leftmost_col(), self.rightmost_text())
    }
}

#[cfg(test)]
mod tests {
    use super::AstNode;
    use crate::token::TokenKind;

    #[test]
    fn string_tree_is_structural() {
        let f = AstNode::node(
            TokenKind::Function,
            vec![
                AstNode::leaf(TokenKind::Identifier, "count"),
                AstNode::node(
                    TokenKind::ColRef,
                    vec![
                        AstNode::leaf(TokenKind::Identifier, "t"),
                        AstNode::leaf(TokenKind::Identifier, "x"),
                    ],
                ),
            ],
        );
        assert_eq!(f.string_tree(), "(TOK_FUNCTION count (TOK_COLREF t x))");
    }

    #[test]
    fn error_points_at_leftmost_leaf() {
        let col = AstNode::node(
            TokenKind::ColRef,
            vec![AstNode::leaf(TokenKind::Identifier, "bad").at(4, 9)],
        );
        let err = col.error(qry_common::ErrorKind::InvalidColumn);
        assert!(err.to_string().starts_with("line 4:9 "));
        assert!(err.to_string().contains("bad"));
    }
}
