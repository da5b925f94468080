//! Graphviz export for diagnostics. Walks the DAG once and emits
//! one `digraph` node per DD node plus a synthetic root edge, labeling
//! edges with their weight so a rendered graph can be checked by eye
//! against a hand-worked example.

use rustc_hash::FxHashMap;

use crate::error::QmddResult;
use crate::node::{Edge, NodeId, NodeTable, Target};
use crate::weight::WeightStore;

/// Render `edge` and everything reachable from it as a Graphviz `dot`
/// source string.
pub fn to_dot(edge: Edge, store: &WeightStore, table: &NodeTable) -> QmddResult<String> {
    let mut out = String::from("digraph qmdd {\n    rankdir=TB;\n    node [shape=circle];\n");
    let mut ids: FxHashMap<NodeId, usize> = FxHashMap::default();

    out.push_str("    root [shape=point];\n    terminal [shape=box, label=\"1\"];\n");
    walk(edge.target, store, table, &mut ids, &mut out)?;
    out.push_str(&format!(
        "    root -> {} [label=\"{}\"];\n",
        target_label(edge.target, &ids),
        fmt_weight(edge, store)
    ));
    out.push_str("}\n");
    Ok(out)
}

fn walk(
    target: Target,
    store: &WeightStore,
    table: &NodeTable,
    ids: &mut FxHashMap<NodeId, usize>,
    out: &mut String,
) -> QmddResult<()> {
    let Target::Node(id) = target else { return Ok(()) };
    if ids.contains_key(&id) {
        return Ok(());
    }
    let index = ids.len();
    ids.insert(id, index);

    let node = table.get(id)?;
    out.push_str(&format!("    n{index} [label=\"q{}\"];\n", node.var));

    walk(node.low.target, store, table, ids, out)?;
    walk(node.high.target, store, table, ids, out)?;

    out.push_str(&format!(
        "    n{index} -> {} [label=\"{}\", style=dashed];\n",
        target_label(node.low.target, ids),
        fmt_weight(node.low, store)
    ));
    out.push_str(&format!(
        "    n{index} -> {} [label=\"{}\"];\n",
        target_label(node.high.target, ids),
        fmt_weight(node.high, store)
    ));
    Ok(())
}

fn target_label(target: Target, ids: &FxHashMap<NodeId, usize>) -> String {
    match target {
        Target::Terminal => "terminal".to_string(),
        Target::Node(id) => format!("n{}", ids[&id]),
    }
}

fn fmt_weight(edge: Edge, store: &WeightStore) -> String {
    let c = store.get(edge.weight);
    if c.im == 0.0 {
        format!("{:.4}", c.re)
    } else {
        format!("{:.4}{:+.4}i", c.re, c.im)
    }
}
