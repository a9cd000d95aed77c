use serde::{Deserialize, Serialize};

/// Token kind of a parse-tree node.
///
/// Covers the grammar surface the compiler consumes: query structure
/// tokens, clause tokens, source references, expression tokens, and the
/// literal/operator kinds produced by the lexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenKind {
    // Query structure
    Query,
    Insert,
    Destination,
    Select,
    SelectDi,
    SelExpr,
    From,
    Where,
    GroupBy,
    ClusterBy,
    DistributeBy,
    SortBy,
    Limit,
    Union,

    // Sources
    Join,
    LeftOuterJoin,
    RightOuterJoin,
    FullOuterJoin,
    TabRef,
    Subquery,
    TableSample,

    // Destinations
    Tab,
    Dir,
    LocalDir,
    TmpFile,
    PartVal,

    // Select items
    ColRef,
    AllColRef,
    Function,
    FunctionDi,
    Transform,
    AliasList,
    SortColNameAsc,
    SortColNameDesc,

    // Literals
    Null,
    Number,
    StringLiteral,
    CharsetLiteral,
    Identifier,
    KwTrue,
    KwFalse,

    // Operators
    KwAnd,
    KwOr,
    KwNot,
    KwIf,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Ampersand,
    Dot,
    Index,
}

impl TokenKind {
    /// Grammar name of this kind, used by the rule dispatchers and as the
    /// default node text for imaginary tokens.
    pub fn name(self) -> &'static str {
        match self {
            TokenKind::Query => "TOK_QUERY",
            TokenKind::Insert => "TOK_INSERT",
            TokenKind::Destination => "TOK_DESTINATION",
            TokenKind::Select => "TOK_SELECT",
            TokenKind::SelectDi => "TOK_SELECTDI",
            TokenKind::SelExpr => "TOK_SELEXPR",
            TokenKind::From => "TOK_FROM",
            TokenKind::Where => "TOK_WHERE",
            TokenKind::GroupBy => "TOK_GROUPBY",
            TokenKind::ClusterBy => "TOK_CLUSTERBY",
            TokenKind::DistributeBy => "TOK_DISTRIBUTEBY",
            TokenKind::SortBy => "TOK_SORTBY",
            TokenKind::Limit => "TOK_LIMIT",
            TokenKind::Union => "TOK_UNION",
            TokenKind::Join => "TOK_JOIN",
            TokenKind::LeftOuterJoin => "TOK_LEFTOUTERJOIN",
            TokenKind::RightOuterJoin => "TOK_RIGHTOUTERJOIN",
            TokenKind::FullOuterJoin => "TOK_FULLOUTERJOIN",
            TokenKind::TabRef => "TOK_TABREF",
            TokenKind::Subquery => "TOK_SUBQUERY",
            TokenKind::TableSample => "TOK_TABLESAMPLE",
            TokenKind::Tab => "TOK_TAB",
            TokenKind::Dir => "TOK_DIR",
            TokenKind::LocalDir => "TOK_LOCAL_DIR",
            TokenKind::TmpFile => "TOK_TMP_FILE",
            TokenKind::PartVal => "TOK_PARTVAL",
            TokenKind::ColRef => "TOK_COLREF",
            TokenKind::AllColRef => "TOK_ALLCOLREF",
            TokenKind::Function => "TOK_FUNCTION",
            TokenKind::FunctionDi => "TOK_FUNCTIONDI",
            TokenKind::Transform => "TOK_TRANSFORM",
            TokenKind::AliasList => "TOK_ALIASLIST",
            TokenKind::SortColNameAsc => "TOK_SORTCOLNAMEASC",
            TokenKind::SortColNameDesc => "TOK_SORTCOLNAMEDESC",
            TokenKind::Null => "TOK_NULL",
            TokenKind::Number => "Number",
            TokenKind::StringLiteral => "StringLiteral",
            TokenKind::CharsetLiteral => "TOK_CHARSETLITERAL",
            TokenKind::Identifier => "Identifier",
            TokenKind::KwTrue => "KW_TRUE",
            TokenKind::KwFalse => "KW_FALSE",
            TokenKind::KwAnd => "KW_AND",
            TokenKind::KwOr => "KW_OR",
            TokenKind::KwNot => "KW_NOT",
            TokenKind::KwIf => "KW_IF",
            TokenKind::Equal => "EQUAL",
            TokenKind::NotEqual => "NOTEQUAL",
            TokenKind::Less => "LESSTHAN",
            TokenKind::LessEqual => "LESSTHANOREQUALTO",
            TokenKind::Greater => "GREATERTHAN",
            TokenKind::GreaterEqual => "GREATERTHANOREQUALTO",
            TokenKind::Plus => "PLUS",
            TokenKind::Minus => "MINUS",
            TokenKind::Star => "STAR",
            TokenKind::Slash => "DIVIDE",
            TokenKind::Percent => "MOD",
            TokenKind::Ampersand => "BITWISEAND",
            TokenKind::Dot => "DOT",
            TokenKind::Index => "LSQUARE",
        }
    }

    /// Whether this kind is one of the four join tokens.
    pub fn is_join(self) -> bool {
        matches!(
            self,
            TokenKind::Join
                | TokenKind::LeftOuterJoin
                | TokenKind::RightOuterJoin
                | TokenKind::FullOuterJoin
        )
    }

    /// Default text this operator kind carries when used as a function
    /// name, `None` for non-operator kinds.
    pub fn operator_text(self) -> Option<&'static str> {
        Some(match self {
            TokenKind::KwAnd => "and",
            TokenKind::KwOr => "or",
            TokenKind::KwNot => "not",
            TokenKind::Equal => "=",
            TokenKind::NotEqual => "<>",
            TokenKind::Less => "<",
            TokenKind::LessEqual => "<=",
            TokenKind::Greater => ">",
            TokenKind::GreaterEqual => ">=",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Percent => "%",
            TokenKind::Ampersand => "&",
            _ => return None,
        })
    }
}
