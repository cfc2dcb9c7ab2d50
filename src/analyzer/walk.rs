//! pg_query AST walk
//!
//! Converts the PostgreSQL parse tree into a `ParsedQuery`. The walk
//! propagates a context (root, where, join, order-by, from) to every column
//! reference it meets; only where/join/order-by references are collected.
//! The statement is never executed, optimised, or rewritten.

use crate::analyzer::query::{ParsedQuery, PredicateRole};
use crate::error::{Error, Result, statement_fingerprint};
use pg_query::NodeEnum;
use pg_query::protobuf::{self, AExpr, ColumnRef, Node, SelectStmt};
use std::collections::BTreeSet;


/// Context a column reference is encountered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Context {
    Root,
    Where,
    Join,
    OrderBy,
    From,
}

/// Parse a single SQL statement into a `ParsedQuery`.
///
/// Multi-statement input is accepted; all statements contribute to the same
/// query shape, which matches how the plan inspector sees the input (one
/// explain round-trip per call).
pub fn parse_statement(sql: &str) -> Result<ParsedQuery> {
    let result = pg_query::parse(sql).map_err(|e| Error::UnparseableStatement {
        fingerprint: statement_fingerprint(sql),
        reason: e.to_string(),
    })?;

    let mut walker = Walker::default();
    let mut saw_statement = false;

    for raw_stmt in &result.protobuf.stmts {
        if let Some(node) = raw_stmt.stmt.as_ref().and_then(|s| s.node.as_ref()) {
            walker.walk_root(node);
            saw_statement = true;
        }
    }

    if !saw_statement {
        return Err(Error::UnparseableStatement {
            fingerprint: statement_fingerprint(sql),
            reason: "statement list is empty".to_string(),
        });
    }

    Ok(walker.query)
}

#[derive(Default)]
struct Walker {
    query: ParsedQuery,
    /// Names introduced by WITH clauses. References to these are derived
    /// relations, not base tables.
    cte_names: BTreeSet<String>,
}

impl Walker {
    fn walk_root(&mut self, node: &NodeEnum) {
        match node {
            NodeEnum::SelectStmt(select) => self.walk_select(select),
            NodeEnum::UpdateStmt(update) => {
                if let Some(with) = &update.with_clause {
                    self.walk_with(with);
                }
                if let Some(rel) = &update.relation {
                    self.register_range_var(rel);
                }
                for item in &update.from_clause {
                    self.walk_from(item);
                }
                if let Some(where_clause) = &update.where_clause {
                    self.walk_predicate(where_clause, Context::Where);
                }
            }
            NodeEnum::DeleteStmt(delete) => {
                if let Some(with) = &delete.with_clause {
                    self.walk_with(with);
                }
                if let Some(rel) = &delete.relation {
                    self.register_range_var(rel);
                }
                for item in &delete.using_clause {
                    self.walk_from(item);
                }
                if let Some(where_clause) = &delete.where_clause {
                    self.walk_predicate(where_clause, Context::Where);
                }
            }
            NodeEnum::InsertStmt(insert) => {
                if let Some(rel) = &insert.relation {
                    self.register_range_var(rel);
                }
                if let Some(select) = &insert.select_stmt
                    && let Some(inner) = select.node.as_ref()
                {
                    self.walk_root(inner);
                }
            }
            NodeEnum::ExplainStmt(explain) => {
                if let Some(query) = &explain.query
                    && let Some(inner) = query.node.as_ref()
                {
                    self.walk_root(inner);
                }
            }
            // Parsed fine, but carries no query shape worth extracting.
            _ => {}
        }
    }

    fn walk_select(&mut self, select: &SelectStmt) {
        if let Some(with) = &select.with_clause {
            self.walk_with(with);
        }
        // Set operations: both arms contribute.
        if let Some(larg) = &select.larg {
            self.walk_select(larg);
        }
        if let Some(rarg) = &select.rarg {
            self.walk_select(rarg);
        }
        for item in &select.from_clause {
            self.walk_from(item);
        }
        // Root-context references (the select list) are ignored by rule, but
        // subqueries inside them still contribute their own shape.
        for target in &select.target_list {
            if let Some(NodeEnum::ResTarget(res)) = target.node.as_ref()
                && let Some(val) = &res.val
            {
                self.collect_columns(val, Context::Root, PredicateRole::Other);
            }
        }
        if let Some(where_clause) = &select.where_clause {
            self.walk_predicate(where_clause, Context::Where);
        }
        for sort in &select.sort_clause {
            if let Some(NodeEnum::SortBy(sort_by)) = sort.node.as_ref()
                && let Some(expr) = &sort_by.node
            {
                self.collect_columns(expr, Context::OrderBy, PredicateRole::OrderBy);
            }
        }
    }

    fn walk_with(&mut self, with: &protobuf::WithClause) {
        for cte in &with.ctes {
            if let Some(NodeEnum::CommonTableExpr(cte)) = cte.node.as_ref() {
                self.cte_names.insert(cte.ctename.clone());
                if let Some(query) = &cte.ctequery
                    && let Some(inner) = query.node.as_ref()
                {
                    self.walk_root(inner);
                }
            }
        }
    }

    fn walk_from(&mut self, node: &Node) {
        match node.node.as_ref() {
            Some(NodeEnum::RangeVar(rv)) => self.register_range_var(rv),
            Some(NodeEnum::JoinExpr(join)) => {
                if let Some(larg) = &join.larg {
                    self.walk_from(larg);
                }
                if let Some(rarg) = &join.rarg {
                    self.walk_from(rarg);
                }
                if let Some(quals) = &join.quals {
                    self.walk_predicate(quals, Context::Join);
                }
                // USING (a, b) constrains both sides by equality. The column
                // belongs to two tables at once, so binding goes through the
                // unqualified path and disambiguation decides.
                for item in &join.using_clause {
                    if let Some(NodeEnum::String(s)) = item.node.as_ref() {
                        self.record_column(&s.sval, None, Context::Join, PredicateRole::Equality);
                    }
                }
            }
            Some(NodeEnum::RangeSubselect(sub)) => {
                if let Some(subquery) = &sub.subquery
                    && let Some(inner) = subquery.node.as_ref()
                {
                    self.walk_root(inner);
                }
            }
            Some(NodeEnum::RangeFunction(func)) => {
                // Table functions expose no base table; their argument
                // references sit in from context and are dropped.
                for f in &func.functions {
                    self.collect_columns(f, Context::From, PredicateRole::Other);
                }
            }
            _ => {}
        }
    }

    fn register_range_var(&mut self, rv: &protobuf::RangeVar) {
        // A schema-less reference to a WITH name is a derived relation.
        if rv.schemaname.is_empty() && self.cte_names.contains(&rv.relname) {
            return;
        }
        let alias = rv.alias.as_ref().map(|a| a.aliasname.as_str());
        self.query.register_table(&rv.relname, alias);
    }

    // -----------------------------------------------------------------------
    // Predicate classification
    // -----------------------------------------------------------------------

    fn walk_predicate(&mut self, node: &Node, ctx: Context) {
        match node.node.as_ref() {
            Some(NodeEnum::BoolExpr(bool_expr)) => {
                for arg in &bool_expr.args {
                    self.walk_predicate(arg, ctx);
                }
            }
            Some(NodeEnum::AExpr(expr)) => self.walk_aexpr(expr, ctx),
            Some(NodeEnum::NullTest(test)) => {
                if let Some(arg) = &test.arg {
                    self.collect_columns(arg, ctx, PredicateRole::Other);
                }
            }
            Some(NodeEnum::BooleanTest(test)) => {
                if let Some(arg) = &test.arg {
                    self.collect_columns(arg, ctx, PredicateRole::Other);
                }
            }
            Some(NodeEnum::SubLink(sublink)) => {
                if let Some(test) = &sublink.testexpr {
                    self.collect_columns(test, ctx, PredicateRole::Other);
                }
                if let Some(subselect) = &sublink.subselect
                    && let Some(inner) = subselect.node.as_ref()
                {
                    self.walk_root(inner);
                }
            }
            Some(NodeEnum::ColumnRef(column_ref)) => {
                // A bare column used as a boolean predicate.
                self.record_column_ref(column_ref, ctx, PredicateRole::Other);
            }
            _ => self.collect_columns(node, ctx, PredicateRole::Other),
        }
    }

    fn walk_aexpr(&mut self, expr: &AExpr, ctx: Context) {
        use protobuf::AExprKind;

        let role = match expr.kind() {
            AExprKind::AexprOp => match operator_name(expr).as_deref() {
                Some("=") => PredicateRole::Equality,
                Some("<") | Some(">") | Some("<=") | Some(">=") => PredicateRole::Range,
                _ => PredicateRole::Other,
            },
            AExprKind::AexprBetween
            | AExprKind::AexprNotBetween
            | AExprKind::AexprBetweenSym
            | AExprKind::AexprNotBetweenSym => PredicateRole::Range,
            _ => PredicateRole::Other,
        };

        if let Some(lexpr) = &expr.lexpr {
            self.collect_columns(lexpr, ctx, role);
        }
        if let Some(rexpr) = &expr.rexpr {
            self.collect_columns(rexpr, ctx, role);
        }

        // Equality against a literal constant feeds partial-index detection.
        if role == PredicateRole::Equality {
            let pair = match (
                expr.lexpr.as_deref().and_then(simple_column_name),
                expr.rexpr.as_deref().and_then(render_const),
            ) {
                (Some(column), Some(literal)) => Some((column, literal)),
                _ => match (
                    expr.rexpr.as_deref().and_then(simple_column_name),
                    expr.lexpr.as_deref().and_then(render_const),
                ) {
                    (Some(column), Some(literal)) => Some((column, literal)),
                    _ => None,
                },
            };
            if let Some((column, literal)) = pair {
                self.query.equality_literals.insert(column, literal);
            }
        }
    }

    /// Recursively collect column references under a fixed role. Nested
    /// predicate forms re-enter classification; function arguments weaken
    /// to `other` because an index on the bare column cannot serve them
    /// directly.
    fn collect_columns(&mut self, node: &Node, ctx: Context, role: PredicateRole) {
        match node.node.as_ref() {
            Some(NodeEnum::ColumnRef(column_ref)) => {
                self.record_column_ref(column_ref, ctx, role);
            }
            Some(NodeEnum::TypeCast(cast)) => {
                if let Some(arg) = &cast.arg {
                    self.collect_columns(arg, ctx, role);
                }
            }
            Some(NodeEnum::List(list)) => {
                for item in &list.items {
                    self.collect_columns(item, ctx, role);
                }
            }
            Some(NodeEnum::FuncCall(func)) => {
                for arg in &func.args {
                    self.collect_columns(arg, ctx, PredicateRole::Other);
                }
            }
            Some(NodeEnum::CoalesceExpr(coalesce)) => {
                for arg in &coalesce.args {
                    self.collect_columns(arg, ctx, PredicateRole::Other);
                }
            }
            Some(NodeEnum::CaseExpr(case)) => {
                if let Some(arg) = &case.arg {
                    self.collect_columns(arg, ctx, PredicateRole::Other);
                }
                for when in &case.args {
                    self.collect_columns(when, ctx, PredicateRole::Other);
                }
                if let Some(def) = &case.defresult {
                    self.collect_columns(def, ctx, PredicateRole::Other);
                }
            }
            Some(NodeEnum::CaseWhen(when)) => {
                if let Some(expr) = &when.expr {
                    self.collect_columns(expr, ctx, PredicateRole::Other);
                }
                if let Some(result) = &when.result {
                    self.collect_columns(result, ctx, PredicateRole::Other);
                }
            }
            Some(NodeEnum::AExpr(_))
            | Some(NodeEnum::BoolExpr(_))
            | Some(NodeEnum::NullTest(_))
            | Some(NodeEnum::BooleanTest(_))
            | Some(NodeEnum::SubLink(_)) => self.walk_predicate(node, ctx),
            _ => {}
        }
    }

    fn record_column_ref(&mut self, column_ref: &ColumnRef, ctx: Context, role: PredicateRole) {
        let mut fields = Vec::new();
        for field in &column_ref.fields {
            match field.node.as_ref() {
                Some(NodeEnum::String(s)) => fields.push(s.sval.as_str()),
                // `t.*` or bare `*` reference no single column.
                Some(NodeEnum::AStar(_)) => return,
                _ => return,
            }
        }
        let Some((column, qualifiers)) = fields.split_last() else {
            return;
        };
        let qualifier = qualifiers.last().copied();
        self.record_column(column, qualifier, ctx, role);
    }

    fn record_column(
        &mut self,
        column: &str,
        qualifier: Option<&str>,
        ctx: Context,
        role: PredicateRole,
    ) {
        match ctx {
            Context::Root | Context::From => return,
            Context::Where => {
                self.query.where_columns.insert(column.to_string());
            }
            Context::Join => {
                self.query.join_columns.insert(column.to_string());
            }
            Context::OrderBy => {
                self.query.order_by_columns.insert(column.to_string());
            }
        }

        let table = match qualifier {
            Some(q) => Some(self.query.resolve_qualifier(q)),
            None if self.query.tables.len() == 1 => Some(self.query.tables[0].clone()),
            None => None,
        };
        self.query.bind_column(column, table);
        self.query.upgrade_role(column, role);
    }
}

// ---------------------------------------------------------------------------
// Expression helpers
// ---------------------------------------------------------------------------

/// Last string element of the operator name list: "=", "<", "~~", …
fn operator_name(expr: &AExpr) -> Option<String> {
    expr.name.iter().rev().find_map(|n| match n.node.as_ref() {
        Some(NodeEnum::String(s)) => Some(s.sval.clone()),
        _ => None,
    })
}

/// Bare column name of an operand, unwrapping a single cast. Qualified
/// references still resolve to their column name.
fn simple_column_name(node: &Node) -> Option<String> {
    match node.node.as_ref() {
        Some(NodeEnum::ColumnRef(column_ref)) => {
            match column_ref.fields.last().and_then(|f| f.node.as_ref()) {
                Some(NodeEnum::String(s)) => Some(s.sval.clone()),
                _ => None,
            }
        }
        Some(NodeEnum::TypeCast(cast)) => cast.arg.as_deref().and_then(simple_column_name),
        _ => None,
    }
}

/// Render a constant operand as SQL literal text, unwrapping a single cast.
/// Non-constant operands (params, expressions) yield `None` and never form
/// partial predicates.
fn render_const(node: &Node) -> Option<String> {
    match node.node.as_ref() {
        Some(NodeEnum::AConst(c)) => {
            if c.isnull {
                return None;
            }
            match c.val.as_ref() {
                Some(protobuf::a_const::Val::Ival(i)) => Some(i.ival.to_string()),
                Some(protobuf::a_const::Val::Fval(f)) => Some(f.fval.clone()),
                Some(protobuf::a_const::Val::Sval(s)) => {
                    Some(format!("'{}'", s.sval.replace('\'', "''")))
                }
                Some(protobuf::a_const::Val::Boolval(b)) => {
                    Some(if b.boolval { "TRUE" } else { "FALSE" }.to_string())
                }
                _ => None,
            }
        }
        Some(NodeEnum::TypeCast(cast)) => cast.arg.as_deref().and_then(render_const),
        _ => None,
    }
}
