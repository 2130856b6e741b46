// ==========================================
// Molecular data portal - table dependency resolver
// ==========================================
// Edge (A, B): A references B, so B is inserted first.
// Kahn's algorithm over the reference graph; a leftover edge set is a cycle
// and a fatal configuration error.
// ==========================================

use crate::importer::error::{ImportError, ImportResult};
use std::collections::{BTreeSet, HashSet};

/// Orders `tables` so that every referenced table precedes its referrers.
///
/// # Arguments
/// - tables: every table to insert
/// - edges: `(from, to)` pairs, "from references to"
///
/// # Returns
/// - Ok(order): each table exactly once
/// - Err(CyclicReference): the tables left on unresolved edges
pub fn order_tables(tables: &[String], edges: &[(String, String)]) -> ImportResult<Vec<String>> {
    let mut remaining: Vec<(String, String)> = Vec::new();
    for edge in edges {
        if !remaining.contains(edge) {
            remaining.push(edge.clone());
        }
    }

    let connected: BTreeSet<&str> = edges
        .iter()
        .flat_map(|(a, b)| [a.as_str(), b.as_str()])
        .collect();
    let targets: HashSet<&str> = edges.iter().map(|(_, b)| b.as_str()).collect();

    // Start nodes: never referenced by anyone
    let mut start: Vec<String> = connected
        .iter()
        .filter(|n| !targets.contains(*n))
        .map(|n| n.to_string())
        .collect();

    let mut order: Vec<String> = Vec::with_capacity(tables.len());
    while let Some(node) = start.pop() {
        let (outgoing, rest): (Vec<_>, Vec<_>) =
            remaining.into_iter().partition(|(from, _)| *from == node);
        remaining = rest;

        for (_, to) in outgoing {
            let still_referenced = remaining.iter().any(|(_, b)| *b == to);
            if !still_referenced && !start.contains(&to) {
                start.push(to);
            }
        }
        order.push(node);
    }

    if !remaining.is_empty() {
        let names: BTreeSet<String> = remaining
            .into_iter()
            .flat_map(|(a, b)| [a, b])
            .collect();
        return Err(ImportError::CyclicReference {
            remaining: names.into_iter().collect(),
        });
    }

    for table in tables {
        if !connected.contains(table.as_str()) && !order.contains(table) {
            order.push(table.clone());
        }
    }

    order.reverse();
    Ok(order)
}
