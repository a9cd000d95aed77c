//! Metadata binding: resolve table aliases and destinations against the
//! metastore and cache the results on the query block.

use indexmap::IndexMap;
use qry_ast::TokenKind;
use qry_common::{ErrorKind, Result, SemanticError};
use qry_metastore::{is_known_format, Metastore, MetastoreError, Partition};
use tracing::info;

use crate::context::Context;
use crate::qb::{Dest, QBExpr, QBExprKind, QB};

/// Bind a QB expression, recursing into union branches.
pub fn get_metadata_qbexpr(
    qbexpr: &mut QBExpr,
    metastore: &dyn Metastore,
    ctx: &mut Context,
) -> Result<()> {
    match &mut qbexpr.kind {
        QBExprKind::Query(qb) => get_metadata(qb, metastore, ctx),
        QBExprKind::Union(left, right) => {
            get_metadata_qbexpr(left, metastore, ctx)?;
            get_metadata_qbexpr(right, metastore, ctx)
        }
    }
}

/// Bind every source alias and destination of one query block.
pub fn get_metadata(qb: &mut QB, metastore: &dyn Metastore, ctx: &mut Context) -> Result<()> {
    info!(qb = qb.id().unwrap_or("<top>"), "binding source tables");

    let aliases: Vec<String> = qb.tab_aliases().map(|a| a.to_string()).collect();
    for alias in aliases {
        let tab_name = qb
            .tab_name_for_alias(&alias)
            .expect("alias recorded in phase 1")
            .to_string();
        let table = match metastore.get_table(&tab_name) {
            Ok(t) => t,
            Err(MetastoreError::InvalidTable(_)) => {
                return Err(src_error(qb, &alias, ErrorKind::InvalidTable));
            }
            Err(e) => return Err(SemanticError::generic(e)),
        };
        if !is_known_format(&table.input_format) {
            return Err(src_error(qb, &alias, ErrorKind::InvalidInputFormatType));
        }
        qb.metadata_mut().set_src_for_alias(&alias, table);
    }

    let subq_aliases = qb.subq_alias_names();
    for alias in subq_aliases {
        let qbexpr = qb.subq_for_alias_mut(&alias).expect("subquery alias");
        get_metadata_qbexpr(qbexpr, metastore, ctx)?;
    }

    info!(qb = qb.id().unwrap_or("<top>"), "binding destinations");
    let dest_names: Vec<String> = qb
        .parse_info()
        .clause_names_for_dest()
        .map(|s| s.to_string())
        .collect();
    for name in dest_names {
        let target = qb
            .parse_info()
            .dest(&name)
            .expect("destination recorded in phase 1")
            .clone();
        match target.kind() {
            TokenKind::Tab => {
                let tab_name = target.expect_child(0)?.text().to_string();
                let table = match metastore.get_table(&tab_name) {
                    Ok(t) => t,
                    Err(MetastoreError::InvalidTable(_)) => {
                        return Err(target.error(ErrorKind::InvalidTable));
                    }
                    Err(e) => return Err(SemanticError::generic(e)),
                };
                if !is_known_format(&table.output_format) {
                    return Err(target.error(ErrorKind::InvalidOutputFormatType));
                }

                let mut part_spec: IndexMap<String, String> = IndexMap::new();
                for pv in target.children().iter().skip(1) {
                    if pv.kind() == TokenKind::PartVal {
                        part_spec.insert(
                            pv.expect_child(0)?.text().to_string(),
                            pv.expect_child(1)?.text().to_string(),
                        );
                    }
                }

                if part_spec.is_empty() {
                    qb.metadata_mut().set_dest(&name, Dest::Table(table));
                } else {
                    let partition = find_or_synthesize_partition(metastore, &table, &part_spec)?;
                    qb.metadata_mut()
                        .set_dest(&name, Dest::Partition { table, partition });
                }
            }
            TokenKind::Dir | TokenKind::LocalDir => {
                let is_dfs = target.kind() == TokenKind::Dir;
                let inner = target.expect_child(0)?;
                let path = if inner.kind() == TokenKind::TmpFile {
                    let path = ctx.make_scratch_path(&name);
                    if !qb.parse_info().is_subquery() {
                        ctx.set_res_dir(path.clone());
                        qb.set_is_query(true);
                    }
                    path
                } else {
                    inner.text().to_string()
                };
                qb.metadata_mut()
                    .set_dest(&name, Dest::File { path, is_dfs });
            }
            other => {
                return Err(target
                    .error(ErrorKind::Generic)
                    .detail(format!("unknown destination token {}", other.name())));
            }
        }
    }
    Ok(())
}

/// Destination partitions may not exist yet for an insert; a missing one
/// is described from its spec so the move step can create it.
fn find_or_synthesize_partition(
    metastore: &dyn Metastore,
    table: &qry_metastore::Table,
    spec: &IndexMap<String, String>,
) -> Result<Partition> {
    let partitions = metastore
        .list_partitions(table)
        .map_err(SemanticError::generic)?;
    if let Some(p) = partitions.iter().find(|p| {
        spec.iter()
            .all(|(k, v)| p.value(k).map(|pv| pv == v).unwrap_or(false))
            && p.spec.len() == spec.len()
    }) {
        return Ok(p.clone());
    }
    let mut synthesized = Partition {
        spec: spec.clone(),
        location: String::new(),
        files: Vec::new(),
    };
    synthesized.location = format!("{}/{}", table.location, synthesized.name());
    Ok(synthesized)
}

fn src_error(qb: &QB, alias: &str, kind: ErrorKind) -> SemanticError {
    match qb.parse_info().src_for_alias(alias) {
        Some(node) => node.error(kind),
        None => kind.with(alias.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use arrow_schema::{DataType, Field};
    use qry_ast::build;
    use qry_common::{CompilerConfig, ErrorKind, SessionId};
    use qry_functions::Registry;
    use qry_metastore::{MemMetastore, Table};

    use crate::context::Context;
    use crate::phase1::{do_phase1, init_phase1_ctx};
    use crate::qb::{Dest, QB};

    use super::get_metadata;

    fn test_ctx() -> Context {
        Context::with_session_id(CompilerConfig::default(), SessionId(1))
    }

    #[test]
    fn missing_table_reports_invalid_table() {
        let ast = build::query(
            build::from(build::tabref("absent", None, None)),
            vec![build::insert(
                build::dest_tmp_file(),
                build::select(false, vec![build::sel_expr(build::all_col_ref(None), None)]),
                vec![],
            )],
        );
        let registry = Registry::with_builtins();
        let mut qb = QB::new(None, None, false);
        do_phase1(&ast, &mut qb, &mut init_phase1_ctx(), &registry).expect("phase1");
        let ms = MemMetastore::new();
        let err = get_metadata(&mut qb, &ms, &mut test_ctx()).expect_err("missing table");
        assert_eq!(err.kind(), ErrorKind::InvalidTable);
    }

    #[test]
    fn tmp_file_destination_marks_query_and_allocates_scratch() {
        let ast = build::query(
            build::from(build::tabref("src", None, None)),
            vec![build::insert(
                build::dest_tmp_file(),
                build::select(false, vec![build::sel_expr(build::all_col_ref(None), None)]),
                vec![],
            )],
        );
        let registry = Registry::with_builtins();
        let mut qb = QB::new(None, None, false);
        do_phase1(&ast, &mut qb, &mut init_phase1_ctx(), &registry).expect("phase1");
        let mut ms = MemMetastore::new();
        ms.register_table(Table::new(
            "src",
            vec![Field::new("key", DataType::Utf8, true)],
            "/warehouse/src",
        ));
        let mut ctx = test_ctx();
        get_metadata(&mut qb, &ms, &mut ctx).expect("bind");
        assert!(qb.is_query());
        match qb.metadata().dest("insclause-0").expect("dest") {
            Dest::File { path, is_dfs } => {
                assert!(path.contains("insclause-0"), "path={path}");
                assert!(*is_dfs);
            }
            other => panic!("expected file dest, got {other:?}"),
        }
        assert_eq!(ctx.res_dir(), qb_res_dir(&qb).as_deref());
    }

    fn qb_res_dir(qb: &QB) -> Option<String> {
        match qb.metadata().dest("insclause-0") {
            Some(Dest::File { path, .. }) => Some(path.clone()),
            _ => None,
        }
    }
}
