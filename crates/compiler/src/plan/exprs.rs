//! Typed expression descriptors.

use arrow_schema::DataType;
use qry_common::Datum;
use qry_functions::UdfDescriptor;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A compiled expression: the typed, name-resolved form the operator
/// descriptors carry. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprDesc {
    /// Untyped null, produced for bare NULL literals; rewritten to a typed
    /// constant before reaching a descriptor that needs a type.
    Null,
    /// Literal constant.
    Constant { data_type: DataType, value: Datum },
    /// Reference to a column of the input row by internal name.
    Column { data_type: DataType, column: String },
    /// Bound function call: function name, dispatch method, arguments.
    Func {
        data_type: DataType,
        udf: String,
        method: String,
        args: Vec<ExprDesc>,
    },
    /// Struct field access; `is_list` marks access through a list of
    /// structs.
    Field {
        data_type: DataType,
        parent: Box<ExprDesc>,
        field: String,
        is_list: bool,
    },
}

impl ExprDesc {
    pub fn column(data_type: DataType, column: impl Into<String>) -> Self {
        ExprDesc::Column {
            data_type,
            column: column.into(),
        }
    }

    pub fn constant(data_type: DataType, value: Datum) -> Self {
        ExprDesc::Constant { data_type, value }
    }

    pub fn int32(v: i32) -> Self {
        ExprDesc::constant(DataType::Int32, Datum::Int32(v))
    }

    pub fn string(v: impl Into<String>) -> Self {
        ExprDesc::constant(DataType::Utf8, Datum::Str(v.into()))
    }

    /// A call through a resolved descriptor.
    pub fn call(udf: &UdfDescriptor, args: Vec<ExprDesc>) -> Self {
        ExprDesc::Func {
            data_type: udf.return_type.clone(),
            udf: udf.name.clone(),
            method: udf.method.clone(),
            args,
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            ExprDesc::Null => DataType::Null,
            ExprDesc::Constant { data_type, .. }
            | ExprDesc::Column { data_type, .. }
            | ExprDesc::Func { data_type, .. }
            | ExprDesc::Field { data_type, .. } => data_type.clone(),
        }
    }

    /// Internal names of every column this expression reads.
    pub fn cols(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_cols(&mut out);
        out
    }

    fn collect_cols(&self, out: &mut Vec<String>) {
        match self {
            ExprDesc::Column { column, .. } => {
                if !out.contains(column) {
                    out.push(column.clone());
                }
            }
            ExprDesc::Func { args, .. } => {
                for a in args {
                    a.collect_cols(out);
                }
            }
            ExprDesc::Field { parent, .. } => parent.collect_cols(out),
            ExprDesc::Null | ExprDesc::Constant { .. } => {}
        }
    }
}

impl fmt::Display for ExprDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExprDesc::Null => write!(f, "null"),
            ExprDesc::Constant { value, .. } => write!(f, "{value}"),
            ExprDesc::Column { column, .. } => write!(f, "col[{column}]"),
            ExprDesc::Func { udf, args, .. } => {
                write!(f, "{udf}(")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, ")")
            }
            ExprDesc::Field { parent, field, .. } => write!(f, "{parent}.{field}"),
        }
    }
}
