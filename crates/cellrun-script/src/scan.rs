//! Static scans over parsed programs.
//!
//! Nothing here evaluates code.

use std::collections::VecDeque;

use crate::ast::{Expr, Program, Stmt, StmtKind, Target};

/// Find the last name bound by an assignment whose value is a direct call
/// to `callee`, e.g. `s = Session()` or `s: Session = Session(...)`.
///
/// Statements are visited breadth-first: every top-level statement before
/// any nested one, and `elif` branches one level below their `if`. Only
/// plain-name callees and plain-name targets count.
#[must_use]
pub fn last_call_assignment(program: &Program, callee: &str) -> Option<String> {
    let mut queue: VecDeque<&Stmt> = program.body.iter().collect();
    let mut last = None;

    while let Some(stmt) = queue.pop_front() {
        match &stmt.kind {
            StmtKind::Assign { targets, value } if is_call_to(value, callee) => {
                for target in targets {
                    if let Target::Name(name) = target {
                        last = Some(name.clone());
                    }
                }
            }
            StmtKind::AnnAssign {
                target: Target::Name(name),
                value: Some(value),
                ..
            } if is_call_to(value, callee) => {
                last = Some(name.clone());
            }
            _ => {}
        }
        queue.extend(children(stmt));
    }

    last
}

fn is_call_to(expr: &Expr, callee: &str) -> bool {
    matches!(expr, Expr::Call { func, .. } if matches!(func.as_ref(), Expr::Name(n) if n == callee))
}

fn children(stmt: &Stmt) -> impl Iterator<Item = &Stmt> {
    let (first, second): (&[Stmt], &[Stmt]) = match &stmt.kind {
        StmtKind::If { body, orelse, .. } => (body.as_slice(), orelse.as_slice()),
        StmtKind::While { body, .. } | StmtKind::For { body, .. } => (body.as_slice(), &[]),
        StmtKind::FunctionDef(def) => (def.body.as_slice(), &[]),
        _ => (&[], &[]),
    };
    first.iter().chain(second.iter())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;

    fn scan(src: &str) -> Option<String> {
        last_call_assignment(&parse(src).unwrap(), "Session")
    }

    #[test]
    fn test_no_constructor_call() {
        assert_eq!(scan("x = 1\nprint(x)"), None);
        assert_eq!(scan("Session()"), None);
        assert_eq!(scan("s = make_session()"), None);
    }

    #[test]
    fn test_last_top_level_wins() {
        assert_eq!(scan("a = Session()\nb = Session()"), Some("b".into()));
    }

    #[test]
    fn test_chained_targets_take_last() {
        assert_eq!(scan("a = b = Session()"), Some("b".into()));
    }

    #[test]
    fn test_annotated_assignment_counts() {
        assert_eq!(scan("s: Session = Session(headless=True)"), Some("s".into()));
        assert_eq!(scan("s: Session"), None);
    }

    #[test]
    fn test_attribute_callee_and_targets_are_ignored() {
        assert_eq!(scan("s = automation.Session()"), None);
        assert_eq!(scan("obj.s = Session()"), None);
        assert_eq!(scan("xs[0] = Session()"), None);
    }

    #[test]
    fn test_nested_is_visited_after_top_level() {
        let src = "if flag:\n    inner = Session()\nouter = Session()\n";
        assert_eq!(scan(src), Some("inner".into()));
    }

    #[test]
    fn test_function_bodies_are_scanned() {
        let src = "def open():\n    s = Session()\n    return s\n";
        assert_eq!(scan(src), Some("s".into()));
    }

    #[test]
    fn test_elif_is_deeper_than_if_body() {
        let src = "if a:\n    x = Session()\nelif b:\n    y = Session()\n";
        assert_eq!(scan(src), Some("y".into()));
    }
}
