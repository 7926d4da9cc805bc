use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use proptest::prelude::*;

use hiveql::models::enums::{BinaryOp, DialectKind, ScalarType};
use hiveql::models::structs::{ColumnType, Value};
use hiveql::query_ast::ast::{
    AliasArena, ColumnDeclaration, ColumnExpression, Expr, ExprRef, OrderExpression,
    SelectExpression,
};
use hiveql::query_ast::compile;
use hiveql::query_ast::executor::QueryExecutor;
use hiveql::query_ast::executors::{Dataset, MemoryExecutor};
use hiveql::query_ast::language::get_language;
use hiveql::query_ast::rewrite::column_mapper::ColumnMapper;
use hiveql::query_ast::rewrite::named_values::NamedValueGatherer;

const ROWS: i64 = 10;

fn bigint() -> ColumnType {
    ColumnType::new("BIGINT", ScalarType::Int64)
}

/// `SELECT c0..cN FROM wide WHERE c0 > <bound>`, optionally with a nested select in FROM.
fn wide_select(arena: &mut AliasArena, width: usize, bound: Option<i64>, nested: bool) -> ExprRef {
    let t = arena.fresh();
    let column = |i: usize| {
        ColumnExpression::new(ScalarType::Int64, bigint(), t, format!("c{}", i)).into_expr()
    };
    let mut from = Expr::table(t, "wide");
    if nested {
        from = SelectExpression::new(
            t,
            (0..width)
                .map(|i| ColumnDeclaration::new(format!("c{}", i), Expr::constant(i as i64), bigint()))
                .collect(),
            None,
            None,
        )
        .into_expr();
    }
    SelectExpression::new(
        arena.fresh(),
        (0..width)
            .map(|i| ColumnDeclaration::new(format!("c{}", i), column(i), bigint()))
            .collect(),
        Some(from),
        bound.map(|b| Expr::binary(BinaryOp::GreaterThan, column(0), Expr::constant(b))),
    )
    .into_expr()
}

/// `lo <= key AND key <= hi AND ...`, one comparison per name.
fn parameter_filter(names: &[&str]) -> Option<ExprRef> {
    let key = ColumnExpression::new(ScalarType::Int64, bigint(), AliasArena::new().fresh(), "key")
        .into_expr();
    names
        .iter()
        .map(|name| {
            Expr::binary(
                BinaryOp::LessThanOrEqual,
                key.clone(),
                Expr::named_value(*name, ScalarType::Int64),
            )
        })
        .reduce(Expr::and)
}

fn paged(arena: &mut AliasArena, skip: i64, take: Option<i64>) -> ExprRef {
    let t = arena.fresh();
    let key = ColumnExpression::new(ScalarType::Int64, bigint(), t, "key").into_expr();
    SelectExpression::new(
        arena.fresh(),
        vec![ColumnDeclaration::new("key", key.clone(), bigint())],
        Some(Expr::table(t, "numbers")),
        None,
    )
    .set_order_by(vec![OrderExpression::asc(key)])
    .set_skip(Some(Expr::constant(skip)))
    .set_take(take.map(Expr::constant))
    .into_expr()
}

/// Any skip within the table, with a take that may run past its end.
fn window() -> impl Strategy<Value = (i64, Option<i64>)> {
    (0..=ROWS, proptest::option::of(0..=ROWS))
}

proptest! {
    #[test]
    fn mapping_unowned_aliases_keeps_identity(
        width in 1usize..6,
        bound in proptest::option::of(-5i64..5),
        nested in any::<bool>(),
        stray_count in 0usize..3,
    ) {
        let mut arena = AliasArena::new();
        let tree = wide_select(&mut arena, width, bound, nested);
        let stray: HashSet<_> = (0..stray_count).map(|_| arena.fresh()).collect();
        let target = arena.fresh();
        prop_assert!(Arc::ptr_eq(&tree, &ColumnMapper::map(&tree, target, &stray)));
    }

    #[test]
    fn parameters_are_gathered_once_in_first_order(
        picks in proptest::collection::vec(0usize..4, 1..12),
    ) {
        let pool = ["low", "high", "kind", "region"];
        let names: Vec<&str> = picks.iter().map(|i| pool[*i]).collect();
        let Some(filter) = parameter_filter(&names) else {
            return Ok(());
        };
        let gathered: Vec<String> = NamedValueGatherer::gather(&filter)
            .into_iter()
            .map(|v| v.name)
            .collect();

        let mut expected: Vec<String> = Vec::new();
        for name in &names {
            if !expected.iter().any(|e| e == name) {
                expected.push(name.to_string());
            }
        }
        prop_assert_eq!(gathered, expected);
    }

    #[test]
    fn paging_strategies_agree_with_slicing((skip, take) in window()) {
        let all: Vec<i64> = (1..=ROWS).collect();
        let end = take.map_or(all.len(), |t| ((skip + t) as usize).min(all.len()));
        let sliced = all[skip as usize..end].to_vec();
        // Nested LIMITs keep the last `take` of the first `skip + take` rows.
        let last_of_first = match take {
            Some(t) => all[end.saturating_sub(t as usize)..end].to_vec(),
            None => sliced.clone(),
        };

        for (kind, expected) in [
            (DialectKind::Hive, &last_of_first),
            (DialectKind::HiveWindowing, &sliced),
        ] {
            let language = get_language(kind);
            let mut arena = AliasArena::new();
            let tree = paged(&mut arena, skip, take);
            let compiled = compile(&mut arena, &tree, language.as_ref()).unwrap();
            let dataset = Dataset::new().with_table(
                "numbers",
                &["key"],
                all.iter().map(|k| vec![Value::from(*k)]).collect(),
            );
            let rows = MemoryExecutor::new(dataset)
                .execute(&compiled.tree, &HashMap::new())
                .unwrap()
                .1;
            let keys: Vec<i64> = rows.iter().filter_map(|row| row[0].as_i64()).collect();
            prop_assert_eq!(&keys, expected, "{:?}", kind);
        }
        if skip + take.unwrap_or(0) <= ROWS {
            prop_assert_eq!(&sliced, &last_of_first);
        }
    }
}
