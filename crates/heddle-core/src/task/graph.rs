//! Reachability over the live dependency graph.
//!
//! Edges live on the tasks themselves (weakly held), so there is no central
//! graph object: walks follow `Task::dependencies()` and skip tasks that have
//! been dropped.

use std::collections::{HashMap, HashSet};

use super::task::Task;
use crate::domain::TaskId;

/// Does `task` (transitively) depend on `target`?
///
/// Iterative DFS with a visited set, so diamonds are explored once.
pub(crate) fn depends_on(task: &Task, target: &Task) -> bool {
    dependency_path(task, target).is_some()
}

/// Path of ids `task -> .. -> target` through dependency edges, if any.
pub fn dependency_path(task: &Task, target: &Task) -> Option<Vec<TaskId>> {
    let mut stack = vec![task.clone()];
    let mut visited: HashSet<TaskId> = HashSet::from([task.id()]);
    let mut prev: HashMap<TaskId, TaskId> = HashMap::new();

    while let Some(node) = stack.pop() {
        for dep in node.dependencies() {
            if !visited.insert(dep.id()) {
                continue;
            }
            prev.insert(dep.id(), node.id());
            if dep == *target {
                return Some(follow_path(target.id(), &prev));
            }
            stack.push(dep);
        }
    }
    None
}

fn follow_path(end: TaskId, prev: &HashMap<TaskId, TaskId>) -> Vec<TaskId> {
    let mut path = vec![end];
    let mut current = end;
    while let Some(&p) = prev.get(&current) {
        path.push(p);
        current = p;
    }
    path.reverse();
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_edges_no_path() {
        let a = Task::noop("a");
        let b = Task::noop("b");
        assert!(!depends_on(&a, &b));
        assert!(!depends_on(&b, &a));
    }

    #[test]
    fn chain_is_reachable_one_way() {
        let a = Task::noop("a");
        let b = Task::noop("b");
        let c = Task::noop("c");
        b.add_dependency(&a).unwrap();
        c.add_dependency(&b).unwrap();

        assert!(depends_on(&c, &a));
        assert!(!depends_on(&a, &c));
        assert_eq!(
            dependency_path(&c, &a),
            Some(vec![c.id(), b.id(), a.id()])
        );
    }

    #[test]
    fn diamond_is_walked_once() {
        //     a
        //    / \
        //   b   c
        //    \ /
        //     d
        let a = Task::noop("a");
        let b = Task::noop("b");
        let c = Task::noop("c");
        let d = Task::noop("d");
        b.add_dependency(&a).unwrap();
        c.add_dependency(&a).unwrap();
        d.add_dependency(&b).unwrap();
        d.add_dependency(&c).unwrap();

        assert!(depends_on(&d, &a));
        assert!(!depends_on(&b, &c));

        let path = dependency_path(&d, &a).unwrap();
        assert_eq!(path.first(), Some(&d.id()));
        assert_eq!(path.last(), Some(&a.id()));
        assert_eq!(path.len(), 3);
    }

    #[test]
    fn dropped_tasks_break_the_path() {
        let a = Task::noop("a");
        let c = Task::noop("c");
        {
            let b = Task::noop("b");
            b.add_dependency(&a).unwrap();
            c.add_dependency(&b).unwrap();
            assert!(depends_on(&c, &a));
        }
        assert!(!depends_on(&c, &a));
    }
}
