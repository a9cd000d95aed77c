use std::fmt;

use thiserror::Error;

/// Classification of every failure the compiler can report.
///
/// The kinds mirror the checks performed during analysis: name resolution,
/// type checking, join shape restrictions, clause conflicts, sampling and
/// pruning constraints. Metastore/IO failures are wrapped as
/// [`ErrorKind::Generic`] with the upstream error attached as cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Generic,
    InvalidTable,
    InvalidColumn,
    AmbiguousColumn,
    AmbiguousTableAlias,
    InvalidTableAlias,
    NoSubqueryAlias,
    NoInsertInSubquery,
    InvalidFunction,
    InvalidFunctionSignature,
    InvalidOperatorSignature,
    /// Both left and right aliases encountered in one join term.
    InvalidJoinCondition1,
    /// Neither left nor right aliases encountered in a join term.
    InvalidJoinCondition2,
    /// OR at the top of a join condition.
    InvalidJoinCondition3,
    InvalidTransform,
    DuplicateGroupByKey,
    UnsupportedMultipleDistincts,
    NonKeyExprInGroupBy,
    InvalidXpath,
    InvalidPath,
    InvalidNumericalConstant,
    InvalidArrayIndexConstant,
    InvalidMapIndexConstant,
    InvalidMapIndexType,
    NonCollectionType,
    SelectDistinctWithGroupBy,
    ColumnRepeatedInPartitioningCols,
    DuplicateColumnNames,
    ColumnRepeatedInClusterSort,
    SampleRestriction,
    SampleColumnNotFound,
    NoPartitionPredicate,
    InvalidDot,
    InvalidTblDdlSerde,
    TargetTableColumnMismatch,
    TableAliasNotAllowed,
    ClusterByDistributeByConflict,
    ClusterBySortByConflict,
    UnionNotInSubquery,
    InvalidInputFormatType,
    InvalidOutputFormatType,
    NonBucketedTable,
}

impl ErrorKind {
    /// Human-readable message for this kind.
    pub fn msg(self) -> &'static str {
        match self {
            ErrorKind::Generic => "exception while processing",
            ErrorKind::InvalidTable => "table not found",
            ErrorKind::InvalidColumn => "invalid column reference",
            ErrorKind::AmbiguousColumn => "ambiguous column reference",
            ErrorKind::AmbiguousTableAlias => "ambiguous table alias",
            ErrorKind::InvalidTableAlias => "invalid table alias",
            ErrorKind::NoSubqueryAlias => "no alias for subquery",
            ErrorKind::NoInsertInSubquery => "cannot insert in a subquery",
            ErrorKind::InvalidFunction => "invalid function",
            ErrorKind::InvalidFunctionSignature => "function argument type mismatch",
            ErrorKind::InvalidOperatorSignature => "operator argument type mismatch",
            ErrorKind::InvalidJoinCondition1 => {
                "both left and right aliases encountered in join"
            }
            ErrorKind::InvalidJoinCondition2 => {
                "neither left nor right aliases encountered in join"
            }
            ErrorKind::InvalidJoinCondition3 => "OR not supported in join",
            ErrorKind::InvalidTransform => "TRANSFORM with other select columns not supported",
            ErrorKind::DuplicateGroupByKey => "repeated key in group by",
            ErrorKind::UnsupportedMultipleDistincts => {
                "DISTINCT on different columns not supported"
            }
            ErrorKind::NonKeyExprInGroupBy => "expression not in group by key",
            ErrorKind::InvalidXpath => "general . and [] operators are not supported",
            ErrorKind::InvalidPath => "invalid path",
            ErrorKind::InvalidNumericalConstant => "invalid numerical constant",
            ErrorKind::InvalidArrayIndexConstant => {
                "non-constant expressions for array indexes not supported"
            }
            ErrorKind::InvalidMapIndexConstant => {
                "non-constant expression for map indexes not supported"
            }
            ErrorKind::InvalidMapIndexType => "map key type does not match index expression type",
            ErrorKind::NonCollectionType => "[] not valid on non-collection types",
            ErrorKind::SelectDistinctWithGroupBy => {
                "SELECT DISTINCT and GROUP BY can not be in the same query"
            }
            ErrorKind::ColumnRepeatedInPartitioningCols => {
                "column repeated in partitioning columns"
            }
            ErrorKind::DuplicateColumnNames => "duplicate column names",
            ErrorKind::ColumnRepeatedInClusterSort => {
                "same column cannot appear in cluster and sort by"
            }
            ErrorKind::SampleRestriction => "cannot sample on more than two columns",
            ErrorKind::SampleColumnNotFound => "sample column not found",
            ErrorKind::NoPartitionPredicate => "no partition predicate found",
            ErrorKind::InvalidDot => {
                ". operator is only supported on struct or list of struct types"
            }
            ErrorKind::InvalidTblDdlSerde => {
                "either list of columns or a custom serializer should be specified"
            }
            ErrorKind::TargetTableColumnMismatch => {
                "cannot insert into target table because column number/types are different"
            }
            ErrorKind::TableAliasNotAllowed => "table alias not allowed in sampling clause",
            ErrorKind::ClusterByDistributeByConflict => {
                "cannot have both cluster by and distribute by clauses"
            }
            ErrorKind::ClusterBySortByConflict => {
                "cannot have both cluster by and sort by clauses"
            }
            ErrorKind::UnionNotInSubquery => {
                "top level union is not supported; use a subquery for the union"
            }
            ErrorKind::InvalidInputFormatType => "unusable table input format",
            ErrorKind::InvalidOutputFormatType => "unusable table output format",
            ErrorKind::NonBucketedTable => "sampling expression needed for non-bucketed table",
        }
    }

    /// Build an error of this kind with no position or detail.
    pub fn error(self) -> SemanticError {
        SemanticError {
            kind: self,
            pos: None,
            detail: None,
            cause: None,
        }
    }

    /// Build an error of this kind with a free-form detail suffix.
    pub fn with(self, detail: impl Into<String>) -> SemanticError {
        SemanticError {
            kind: self,
            pos: None,
            detail: Some(detail.into()),
            cause: None,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.msg())
    }
}

/// Source position attached to an error: line, column, and the token text
/// the message points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePos {
    pub line: u32,
    pub col: u32,
    pub text: String,
}

/// The single error type of the compiler.
///
/// Every analysis failure aborts the current compilation; no partial plan
/// is emitted. Renders as `line L:C <kind message> <token>: <detail>` with
/// the position and detail parts present only when known.
#[derive(Debug, Error)]
#[error("{}", self.render())]
pub struct SemanticError {
    kind: ErrorKind,
    pos: Option<SourcePos>,
    detail: Option<String>,
    #[source]
    cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl SemanticError {
    /// Wrap an upstream failure (metastore, IO) as a generic error.
    pub fn generic(cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        SemanticError {
            kind: ErrorKind::Generic,
            pos: None,
            detail: Some(cause.to_string()),
            cause: Some(Box::new(cause)),
        }
    }

    /// Attach a source position.
    pub fn at(mut self, line: u32, col: u32, text: impl Into<String>) -> Self {
        self.pos = Some(SourcePos {
            line,
            col,
            text: text.into(),
        });
        self
    }

    /// Attach or replace the detail suffix.
    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn pos(&self) -> Option<&SourcePos> {
        self.pos.as_ref()
    }

    fn render(&self) -> String {
        let mut out = String::new();
        if let Some(p) = &self.pos {
            out.push_str(&format!("line {}:{} ", p.line, p.col));
        }
        out.push_str(self.kind.msg());
        if let Some(p) = &self.pos {
            if !p.text.is_empty() {
                out.push(' ');
                out.push_str(&p.text);
            }
        }
        if let Some(d) = &self.detail {
            out.push_str(": ");
            out.push_str(d);
        }
        out
    }
}

/// Standard compiler result alias.
pub type Result<T> = std::result::Result<T, SemanticError>;
