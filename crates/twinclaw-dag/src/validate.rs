//! Static validation of a submitted graph before anything is persisted or
//! scheduled (spec §4.4 invariants: no duplicate ids, every dependency
//! must resolve, no cycles, bounded node count and chain depth).

use crate::error::{DagError, DagResult};
use crate::NodeSpec;
use std::collections::{HashMap, HashSet};

pub fn validate(nodes: &[NodeSpec], max_nodes: usize, max_depth: usize) -> DagResult<()> {
    if nodes.len() > max_nodes {
        return Err(DagError::TooManyNodes(nodes.len(), max_nodes));
    }

    let mut seen = HashSet::new();
    for node in nodes {
        if !seen.insert(node.id.as_str()) {
            return Err(DagError::DuplicateNode(node.id.clone()));
        }
    }

    let by_id: HashMap<&str, &NodeSpec> = nodes.iter().map(|n| (n.id.as_str(), n)).collect();
    for node in nodes {
        for dep in &node.depends_on {
            if !by_id.contains_key(dep.as_str()) {
                return Err(DagError::MissingDependency(node.id.clone(), dep.clone()));
            }
        }
    }

    detect_cycle(nodes, &by_id)?;
    check_depth(nodes, &by_id, max_depth)?;

    Ok(())
}

fn detect_cycle(nodes: &[NodeSpec], by_id: &HashMap<&str, &NodeSpec>) -> DagResult<()> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done,
    }

    let mut marks: HashMap<&str, Mark> = nodes.iter().map(|n| (n.id.as_str(), Mark::Unvisited)).collect();

    fn visit<'a>(
        id: &'a str,
        by_id: &HashMap<&'a str, &'a NodeSpec>,
        marks: &mut HashMap<&'a str, Mark>,
    ) -> DagResult<()> {
        if marks.get(id) == Some(&Mark::Done) {
            return Ok(());
        }
        marks.insert(id, Mark::InProgress);
        for dep in &by_id[id].depends_on {
            match marks.get(dep.as_str()) {
                Some(Mark::InProgress) => {
                    return Err(DagError::Cycle(id.to_string(), dep.clone()));
                }
                Some(Mark::Done) => continue,
                _ => visit(dep.as_str(), by_id, marks)?,
            }
        }
        marks.insert(id, Mark::Done);
        Ok(())
    }

    for node in nodes {
        visit(node.id.as_str(), by_id, &mut marks)?;
    }
    Ok(())
}

fn check_depth(nodes: &[NodeSpec], by_id: &HashMap<&str, &NodeSpec>, max_depth: usize) -> DagResult<()> {
    fn depth_of<'a>(id: &'a str, by_id: &HashMap<&'a str, &'a NodeSpec>, memo: &mut HashMap<&'a str, usize>) -> usize {
        if let Some(d) = memo.get(id) {
            return *d;
        }
        let node = by_id[id];
        let d = node
            .depends_on
            .iter()
            .map(|dep| depth_of(dep.as_str(), by_id, memo) + 1)
            .max()
            .unwrap_or(0);
        memo.insert(id, d);
        d
    }

    let mut memo = HashMap::new();
    let deepest = nodes
        .iter()
        .map(|n| depth_of(n.id.as_str(), by_id, &mut memo))
        .max()
        .unwrap_or(0);

    if deepest > max_depth {
        return Err(DagError::TooDeep(deepest, max_depth));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(id: &str, deps: &[&str]) -> NodeSpec {
        NodeSpec {
            id: id.to_string(),
            brief: format!("do {id}"),
            depends_on: deps.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn accepts_a_valid_diamond() {
        let nodes = vec![
            spec("a", &[]),
            spec("b", &["a"]),
            spec("c", &["a"]),
            spec("d", &["b", "c"]),
        ];
        assert!(validate(&nodes, 64, 16).is_ok());
    }

    #[test]
    fn rejects_duplicate_ids() {
        let nodes = vec![spec("a", &[]), spec("a", &[])];
        assert!(matches!(validate(&nodes, 64, 16), Err(DagError::DuplicateNode(_))));
    }

    #[test]
    fn rejects_missing_dependency() {
        let nodes = vec![spec("a", &["ghost"])];
        assert!(matches!(
            validate(&nodes, 64, 16),
            Err(DagError::MissingDependency(_, _))
        ));
    }

    #[test]
    fn rejects_a_cycle() {
        let nodes = vec![spec("a", &["b"]), spec("b", &["a"])];
        assert!(matches!(validate(&nodes, 64, 16), Err(DagError::Cycle(_, _))));
    }

    #[test]
    fn rejects_a_chain_deeper_than_the_limit() {
        let nodes = vec![spec("a", &[]), spec("b", &["a"]), spec("c", &["b"])];
        assert!(matches!(validate(&nodes, 64, 1), Err(DagError::TooDeep(_, _))));
    }

    #[test]
    fn rejects_too_many_nodes() {
        let nodes = vec![spec("a", &[]), spec("b", &[])];
        assert!(matches!(validate(&nodes, 1, 16), Err(DagError::TooManyNodes(_, _))));
    }
}
