//! Expression compiler: turns expression subtrees into typed
//! [`ExprDesc`]s against a row resolver, applying implicit coercion
//! through the function registry.
//!
//! Dispatch is rule-driven: each node of a depth-first walk is matched by
//! regex over the walk stack of token-kind names, and the closest rule's
//! processor runs. Everything without a dedicated rule is a function or
//! operator application handled by the default processor.

use std::sync::OnceLock;

use arrow_schema::{DataType, Field};
use qry_ast::{AstNode, TokenKind};
use qry_common::{Datum, ErrorKind, Result};
use qry_functions::Registry;

use crate::plan::exprs::ExprDesc;
use crate::rowres::RowResolver;
use crate::rules::{dispatch, stack_string, Rule};

fn expr_rules() -> &'static [Rule] {
    static RULES: OnceLock<Vec<Rule>> = OnceLock::new();
    RULES.get_or_init(|| {
        vec![
            Rule::new("R1", "TOK_NULL%$"),
            Rule::new("R2", "Number%$"),
            Rule::new(
                "R3",
                "Identifier%$|StringLiteral%$|KW_IF%$|TOK_CHARSETLITERAL%$",
            ),
            Rule::new("R4", "KW_TRUE%$|KW_FALSE%$"),
            Rule::new("R5", "TOK_COLREF%$"),
        ]
    })
}

/// Compile one expression subtree against `rr`.
///
/// A subtree whose canonical text is already bound in the resolver (an
/// aggregation or group key computed upstream) compiles to a reference to
/// that column instead of being recompiled.
pub fn gen_expr_desc(node: &AstNode, rr: &RowResolver, registry: &Registry) -> Result<ExprDesc> {
    let mut stack: Vec<&'static str> = Vec::new();
    walk(node, &mut stack, rr, registry)
}

fn walk(
    node: &AstNode,
    stack: &mut Vec<&'static str>,
    rr: &RowResolver,
    registry: &Registry,
) -> Result<ExprDesc> {
    if let Some(info) = rr.get("", &node.string_tree()) {
        return Ok(ExprDesc::column(
            info.data_type.clone(),
            info.internal_name.clone(),
        ));
    }

    stack.push(node.kind().name());
    let mut child_descs = Vec::with_capacity(node.child_count());
    for c in node.children() {
        child_descs.push(walk(c, stack, rr, registry)?);
    }
    let out = match dispatch(expr_rules(), &stack_string(stack.iter().copied())) {
        Some(0) => Ok(ExprDesc::Null),
        Some(1) => num_processor(node),
        Some(2) => str_processor(node),
        Some(3) => Ok(ExprDesc::constant(
            DataType::Boolean,
            Datum::Boolean(node.kind() == TokenKind::KwTrue),
        )),
        Some(4) => column_processor(node, rr),
        _ => default_processor(node, child_descs, rr, registry),
    };
    stack.pop();
    out
}

/// Numeric literal: smallest fitting type among int, bigint, double.
fn num_processor(node: &AstNode) -> Result<ExprDesc> {
    let text = node.text();
    if let Ok(v) = text.parse::<i32>() {
        return Ok(ExprDesc::constant(DataType::Int32, Datum::Int32(v)));
    }
    if let Ok(v) = text.parse::<i64>() {
        return Ok(ExprDesc::constant(DataType::Int64, Datum::Int64(v)));
    }
    if let Ok(v) = text.parse::<f64>() {
        return Ok(ExprDesc::constant(DataType::Float64, Datum::Float64(v)));
    }
    Err(node.error(ErrorKind::InvalidNumericalConstant))
}

fn str_processor(node: &AstNode) -> Result<ExprDesc> {
    let text = match node.kind() {
        // charset literal: (charset, value)
        TokenKind::CharsetLiteral => node.expect_child(1)?.text().to_string(),
        _ => node.text().to_string(),
    };
    Ok(ExprDesc::string(text))
}

fn column_processor(node: &AstNode, rr: &RowResolver) -> Result<ExprDesc> {
    let info = if node.child_count() == 2 {
        let tab = node.expect_child(0)?.text();
        let col = node.expect_child(1)?.text();
        if !rr.has_table_alias(tab) {
            return Err(node.error(ErrorKind::InvalidTableAlias));
        }
        rr.get(tab, col)
    } else {
        let col = node.expect_child(0)?.text();
        rr.get_unqualified(col).map_err(|e| {
            e.at(node.leftmost_line(), node.leftmost_col(), node.rightmost_text())
        })?
    };
    let info = info.ok_or_else(|| node.error(ErrorKind::InvalidColumn))?;
    Ok(ExprDesc::column(
        info.data_type.clone(),
        info.internal_name.clone(),
    ))
}

fn default_processor(
    node: &AstNode,
    child_descs: Vec<ExprDesc>,
    _rr: &RowResolver,
    registry: &Registry,
) -> Result<ExprDesc> {
    match node.kind() {
        TokenKind::Dot => field_access(node, child_descs),
        TokenKind::Index => index_access(node, child_descs),
        TokenKind::Function | TokenKind::FunctionDi => {
            let name = node.expect_child(0)?.text().to_lowercase();
            let args = child_descs.into_iter().skip(1).collect();
            bind_function(node, &name, args, registry, true)
        }
        kind => {
            let name = kind
                .operator_text()
                .map(|s| s.to_string())
                .unwrap_or_else(|| node.text().to_lowercase());
            bind_function(node, &name, child_descs, registry, false)
        }
    }
}

fn field_access(node: &AstNode, mut child_descs: Vec<ExprDesc>) -> Result<ExprDesc> {
    if child_descs.len() != 2 {
        return Err(node.error(ErrorKind::InvalidXpath));
    }
    let field_name = node.expect_child(1)?.text().to_string();
    let parent = child_descs.remove(0);
    match parent.data_type() {
        DataType::Struct(fields) => {
            let field = fields
                .iter()
                .find(|f| f.name().eq_ignore_ascii_case(&field_name))
                .ok_or_else(|| node.error(ErrorKind::InvalidColumn))?;
            Ok(ExprDesc::Field {
                data_type: field.data_type().clone(),
                parent: Box::new(parent),
                field: field_name,
                is_list: false,
            })
        }
        DataType::List(item) => match item.data_type() {
            DataType::Struct(fields) => {
                let field = fields
                    .iter()
                    .find(|f| f.name().eq_ignore_ascii_case(&field_name))
                    .ok_or_else(|| node.error(ErrorKind::InvalidColumn))?;
                let elem = Field::new(field.name(), field.data_type().clone(), true);
                Ok(ExprDesc::Field {
                    data_type: DataType::List(elem.into()),
                    parent: Box::new(parent),
                    field: field_name,
                    is_list: true,
                })
            }
            _ => Err(node.error(ErrorKind::InvalidDot)),
        },
        _ => Err(node.error(ErrorKind::InvalidDot)),
    }
}

fn index_access(node: &AstNode, mut child_descs: Vec<ExprDesc>) -> Result<ExprDesc> {
    if child_descs.len() != 2 {
        return Err(node.error(ErrorKind::NonCollectionType));
    }
    let index = child_descs.remove(1);
    let parent = child_descs.remove(0);
    let out_type = match parent.data_type() {
        DataType::List(item) => {
            match &index {
                ExprDesc::Constant { data_type, .. }
                    if matches!(
                        data_type,
                        DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64
                    ) => {}
                _ => return Err(node.error(ErrorKind::InvalidArrayIndexConstant)),
            }
            item.data_type().clone()
        }
        DataType::Map(entries, _) => {
            let (key_type, value_type) = match entries.data_type() {
                DataType::Struct(fs) if fs.len() == 2 => {
                    (fs[0].data_type().clone(), fs[1].data_type().clone())
                }
                _ => return Err(node.error(ErrorKind::NonCollectionType)),
            };
            match &index {
                ExprDesc::Constant { data_type, .. } => {
                    if *data_type != key_type {
                        return Err(node.error(ErrorKind::InvalidMapIndexType));
                    }
                }
                _ => return Err(node.error(ErrorKind::InvalidMapIndexConstant)),
            }
            value_type
        }
        _ => return Err(node.error(ErrorKind::NonCollectionType)),
    };
    Ok(ExprDesc::Func {
        data_type: out_type,
        udf: "index".to_string(),
        method: "evaluate".to_string(),
        args: vec![parent, index],
    })
}

fn bind_function(
    node: &AstNode,
    name: &str,
    args: Vec<ExprDesc>,
    registry: &Registry,
    is_function_node: bool,
) -> Result<ExprDesc> {
    let arg_types: Vec<DataType> = args.iter().map(|a| a.data_type()).collect();
    let udf = registry.get_udf(name, &arg_types).ok_or_else(|| {
        if !registry.is_udf(name) {
            node.error(ErrorKind::InvalidFunction)
        } else if is_function_node {
            node.error(ErrorKind::InvalidFunctionSignature)
                .detail(format!("{name}({arg_types:?})"))
        } else {
            node.error(ErrorKind::InvalidOperatorSignature)
                .detail(format!("{name}({arg_types:?})"))
        }
    })?;
    let coerced = coerce_args(args, &udf.arg_types, registry)?;
    Ok(ExprDesc::call(&udf, coerced))
}

/// Coerce `args` to the formal parameter types: nulls become typed null
/// constants, mismatched primitives go through a conversion call.
pub fn coerce_args(
    args: Vec<ExprDesc>,
    formals: &[DataType],
    registry: &Registry,
) -> Result<Vec<ExprDesc>> {
    let mut out = Vec::with_capacity(args.len());
    for (arg, formal) in args.into_iter().zip(formals.iter()) {
        if matches!(arg, ExprDesc::Null) {
            out.push(ExprDesc::constant(formal.clone(), Datum::Null));
            continue;
        }
        let actual = arg.data_type();
        if actual == *formal {
            out.push(arg);
            continue;
        }
        let conv = registry
            .get_conversion_udf(formal, &actual)
            .ok_or_else(|| {
                ErrorKind::InvalidFunctionSignature
                    .with(format!("cannot convert {actual:?} to {formal:?}"))
            })?;
        out.push(ExprDesc::call(&conv, vec![arg]));
    }
    Ok(out)
}

/// Resolve and apply a function by name over already-compiled arguments.
/// Used wherever the planner synthesizes calls (sample predicates, write
/// conversions, join-key unification).
pub fn get_func_expr_desc(
    registry: &Registry,
    name: &str,
    args: Vec<ExprDesc>,
) -> Result<ExprDesc> {
    let arg_types: Vec<DataType> = args.iter().map(|a| a.data_type()).collect();
    let udf = registry.get_udf(name, &arg_types).ok_or_else(|| {
        if !registry.is_udf(name) {
            ErrorKind::InvalidFunction.with(name.to_string())
        } else {
            ErrorKind::InvalidFunctionSignature.with(format!("{name}({arg_types:?})"))
        }
    })?;
    let coerced = coerce_args(args, &udf.arg_types, registry)?;
    Ok(ExprDesc::call(&udf, coerced))
}

#[cfg(test)]
mod tests {
    use arrow_schema::DataType;
    use qry_ast::build;
    use qry_ast::TokenKind;
    use qry_common::ErrorKind;
    use qry_functions::Registry;

    use crate::plan::exprs::ExprDesc;
    use crate::rowres::{ColumnInfo, RowResolver};

    use super::gen_expr_desc;

    fn base_rr() -> RowResolver {
        let mut rr = RowResolver::new();
        rr.put("t", "key", ColumnInfo::new("key", DataType::Utf8));
        rr.put("t", "value", ColumnInfo::new("value", DataType::Int32));
        rr
    }

    #[test]
    fn numeric_constant_takes_smallest_type() {
        let rr = base_rr();
        let r = Registry::with_builtins();
        let small = gen_expr_desc(&build::number("7"), &rr, &r).expect("int");
        assert_eq!(small.data_type(), DataType::Int32);
        let big = gen_expr_desc(&build::number("8589934592"), &rr, &r).expect("long");
        assert_eq!(big.data_type(), DataType::Int64);
        let fp = gen_expr_desc(&build::number("1.5"), &rr, &r).expect("double");
        assert_eq!(fp.data_type(), DataType::Float64);
    }

    #[test]
    fn bad_numeric_constant_is_rejected() {
        let rr = base_rr();
        let r = Registry::with_builtins();
        let err = gen_expr_desc(&build::number("1x"), &rr, &r).expect_err("bad number");
        assert_eq!(err.kind(), ErrorKind::InvalidNumericalConstant);
    }

    #[test]
    fn column_resolution_and_unknown_column() {
        let rr = base_rr();
        let r = Registry::with_builtins();
        let col = gen_expr_desc(&build::col_ref(Some("t"), "KEY"), &rr, &r).expect("col");
        assert!(matches!(col, ExprDesc::Column { .. }));
        let err =
            gen_expr_desc(&build::col_ref(Some("t"), "missing"), &rr, &r).expect_err("unknown");
        assert_eq!(err.kind(), ErrorKind::InvalidColumn);
        let err = gen_expr_desc(&build::col_ref(Some("x"), "key"), &rr, &r).expect_err("alias");
        assert_eq!(err.kind(), ErrorKind::InvalidTableAlias);
    }

    #[test]
    fn comparison_coerces_int_to_double() {
        let rr = base_rr();
        let r = Registry::with_builtins();
        let e = build::binary(
            TokenKind::Greater,
            build::col_ref(Some("t"), "value"),
            build::number("1.5"),
        );
        let desc = gen_expr_desc(&e, &rr, &r).expect("compare");
        assert_eq!(desc.data_type(), DataType::Boolean);
        // left side int32 is wrapped in a conversion to double
        match desc {
            ExprDesc::Func { args, .. } => match &args[0] {
                ExprDesc::Func { udf, .. } => assert_eq!(udf, "double"),
                other => panic!("expected conversion wrap, got {other:?}"),
            },
            other => panic!("expected func, got {other:?}"),
        }
    }

    #[test]
    fn precomputed_expression_is_reused() {
        let mut rr = RowResolver::expr_resolver();
        let agg = build::func("count", false, vec![build::number("1")]);
        rr.put("", &agg.string_tree(), ColumnInfo::new("VALUE.0", DataType::Int64));
        let r = Registry::with_builtins();
        let desc = gen_expr_desc(&agg, &rr, &r).expect("reuse");
        match desc {
            ExprDesc::Column { column, .. } => assert_eq!(column, "VALUE.0"),
            other => panic!("expected reuse column, got {other:?}"),
        }
    }

    #[test]
    fn unknown_function_is_invalid() {
        let rr = base_rr();
        let r = Registry::with_builtins();
        let err = gen_expr_desc(
            &build::func("frobnicate", false, vec![build::number("1")]),
            &rr,
            &r,
        )
        .expect_err("unknown fn");
        assert_eq!(err.kind(), ErrorKind::InvalidFunction);
    }
}
