//! Weight-merge engine: set operations over candidate-node lists.
//!
//! Every operation returns fresh copies; the input lists are never
//! touched. Node identity is the node id, never the list position.

use std::cmp::Ordering;

use hapolicy_core::Score;

use crate::node::Node;

/// Combine two weights. Any negative input makes the result `-1`;
/// otherwise the larger weight wins.
pub fn merge_weights(a: Score, b: Score) -> Score {
    if a < 0 || b < 0 { -1 } else { a.max(b) }
}

pub fn find_node<'a>(list: &'a [Node], id: &str) -> Option<&'a Node> {
    list.iter().find(|n| n.id() == id)
}

pub fn find_node_mut<'a>(list: &'a mut [Node], id: &str) -> Option<&'a mut Node> {
    list.iter_mut().find(|n| n.id() == id)
}

/// Copy a list, optionally dropping negative-weight entries.
pub fn dup(list: &[Node], filter: bool) -> Vec<Node> {
    list.iter()
        .filter(|n| !filter || n.weight >= 0)
        .map(Node::copy)
        .collect()
}

/// Nodes present in both lists, in `list1` order, with merged weights.
pub fn intersect(list1: &[Node], list2: &[Node], filter: bool) -> Vec<Node> {
    let mut result = Vec::new();
    for node in list1 {
        let Some(other) = find_node(list2, node.id()) else {
            continue;
        };
        let mut copy = node.copy();
        copy.weight = merge_weights(node.weight, other.weight);
        if filter && copy.weight < 0 {
            continue;
        }
        result.push(copy);
    }
    result
}

/// Everything in `list1` (filtered) plus whatever `list2` adds.
///
/// Nodes already present get their weights merged in place; new ones
/// are appended when they pass the filter.
pub fn union(list1: &[Node], list2: &[Node], filter: bool) -> Vec<Node> {
    let mut result = dup(list1, filter);
    for node in list2 {
        match find_node_mut(&mut result, node.id()) {
            Some(existing) => existing.weight = merge_weights(existing.weight, node.weight),
            None if !filter || node.weight >= 0 => result.push(node.copy()),
            None => {}
        }
    }
    result
}

/// Nodes of `list1` whose identity does not appear in `list2`.
pub fn difference(list1: &[Node], list2: &[Node], filter: bool) -> Vec<Node> {
    list1
        .iter()
        .filter(|n| !filter || n.weight >= 0)
        .filter(|n| find_node(list2, n.id()).is_none())
        .map(Node::copy)
        .collect()
}

/// Nodes present in exactly one of the two lists.
pub fn symmetric_difference(list1: &[Node], list2: &[Node], filter: bool) -> Vec<Node> {
    let mut result = difference(list1, list2, filter);
    result.extend(difference(list2, list1, filter));
    result
}

/// Equality under filter, checked in both directions.
pub fn lists_equal(list1: &[Node], list2: &[Node], filter: bool) -> bool {
    covered_by(list1, list2, filter) && covered_by(list2, list1, filter)
}

fn covered_by(list: &[Node], other: &[Node], filter: bool) -> bool {
    list.iter()
        .filter(|n| !filter || n.weight >= 0)
        .all(|n| find_node(other, n.id()).is_some_and(|o| o.weight >= 0))
}

/// Higher weight first; a missing node sorts last.
pub fn compare_node_weight(a: Option<&Node>, b: Option<&Node>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => b.weight.cmp(&a.weight),
    }
}

/// Stable sort by weight, highest first. Input order breaks ties.
pub fn sort_by_weight(list: &mut [Node]) {
    list.sort_by(|a, b| compare_node_weight(Some(a), Some(b)));
}

/// Pull weights from `other` into `list`, scaled by `factor`.
///
/// Nodes missing from `other` are left alone unless `factor` is
/// positive, in which case they become ineligible.
pub fn update_from(list: &mut [Node], other: &[Node], factor: i32) {
    for node in list.iter_mut().filter(|n| !n.fixed) {
        match find_node(other, node.id()) {
            Some(o) => node.weight = merge_weights(o.weight.saturating_mul(factor), node.weight),
            None if factor > 0 => node.weight = -1,
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use hapolicy_core::{INFINITY, NodeRecord};

    use super::*;
    use crate::node::NodeDetails;

    fn make_node(id: &str, weight: Score) -> Node {
        let record = NodeRecord {
            id: id.to_string(),
            uname: None,
            online: true,
            unclean: false,
            standby: false,
            shutdown: false,
            attributes: Default::default(),
        };
        Node::new(Arc::new(NodeDetails::from_record(&record)), weight)
    }

    fn ids(list: &[Node]) -> Vec<&str> {
        list.iter().map(Node::id).collect()
    }

    fn weight_of(list: &[Node], id: &str) -> Score {
        find_node(list, id).map(|n| n.weight).unwrap()
    }

    #[test]
    fn merge_negative_is_sticky() {
        assert_eq!(merge_weights(5, 10), 10);
        assert_eq!(merge_weights(10, 5), 10);
        assert_eq!(merge_weights(-5, 10), -1);
        assert_eq!(merge_weights(10, -INFINITY), -1);
        assert_eq!(merge_weights(0, 0), 0);
    }

    #[test]
    fn merge_sign_law() {
        let samples = [-INFINITY, -100, -1, 0, 1, 100, INFINITY];
        for x in samples {
            for y in samples {
                assert_eq!(merge_weights(x, y) < 0, x < 0 || y < 0, "x={x} y={y}");
            }
        }
    }

    #[test]
    fn intersect_keeps_common_nodes_in_first_list_order() {
        let a = vec![make_node("n1", 5), make_node("n2", 3), make_node("n3", 1)];
        let b = vec![make_node("n3", 9), make_node("n1", 2)];

        let result = intersect(&a, &b, false);
        assert_eq!(ids(&result), vec!["n1", "n3"]);
        assert_eq!(weight_of(&result, "n1"), 5);
        assert_eq!(weight_of(&result, "n3"), 9);
    }

    #[test]
    fn intersect_is_symmetric_under_identity() {
        let a = vec![make_node("n1", 5), make_node("n2", -3), make_node("n3", 1)];
        let b = vec![make_node("n3", 9), make_node("n2", 2), make_node("n4", 0)];

        let ab = intersect(&a, &b, false);
        let ba = intersect(&b, &a, false);

        let mut ab_ids = ids(&ab);
        let mut ba_ids = ids(&ba);
        ab_ids.sort();
        ba_ids.sort();
        assert_eq!(ab_ids, ba_ids);
        for id in ab_ids {
            assert_eq!(weight_of(&ab, id), weight_of(&ba, id));
        }
    }

    #[test]
    fn intersect_filter_drops_negative_merges() {
        let a = vec![make_node("n1", 5), make_node("n2", 3)];
        let b = vec![make_node("n1", -INFINITY), make_node("n2", 0)];

        assert_eq!(ids(&intersect(&a, &b, true)), vec!["n2"]);
        assert_eq!(ids(&intersect(&a, &b, false)), vec!["n1", "n2"]);
    }

    #[test]
    fn union_is_superset_of_both_inputs() {
        let a = vec![make_node("n1", 5), make_node("n2", -1)];
        let b = vec![make_node("n2", 4), make_node("n3", 7)];

        let result = union(&a, &b, false);
        for node in a.iter().chain(b.iter()) {
            assert!(find_node(&result, node.id()).is_some(), "missing {}", node.id());
        }
        assert_eq!(ids(&result), vec!["n1", "n2", "n3"]);
        assert_eq!(weight_of(&result, "n2"), -1);
        assert_eq!(weight_of(&result, "n3"), 7);
    }

    #[test]
    fn union_with_filter_skips_negative_newcomers() {
        let a = vec![make_node("n1", 5)];
        let b = vec![make_node("n2", -10), make_node("n3", 1)];

        assert_eq!(ids(&union(&a, &b, true)), vec!["n1", "n3"]);
    }

    #[test]
    fn difference_and_symmetric_difference() {
        let a = vec![make_node("n1", 1), make_node("n2", 1), make_node("n3", -1)];
        let b = vec![make_node("n2", 1), make_node("n4", 1)];

        assert_eq!(ids(&difference(&a, &b, false)), vec!["n1", "n3"]);
        assert_eq!(ids(&difference(&a, &b, true)), vec!["n1"]);
        assert_eq!(ids(&symmetric_difference(&a, &b, false)), vec!["n1", "n3", "n4"]);
    }

    #[test]
    fn equality_requires_non_negative_counterparts() {
        let a = vec![make_node("n1", 1), make_node("n2", 5)];
        let b = vec![make_node("n2", 0), make_node("n1", 3)];
        assert!(lists_equal(&a, &b, false));

        let c = vec![make_node("n1", 1), make_node("n2", -1)];
        assert!(!lists_equal(&a, &c, false));
        assert!(!lists_equal(&a, &[make_node("n1", 1)], true));
    }

    #[test]
    fn results_are_independent_copies() {
        let a = vec![make_node("n1", 1)];
        let mut result = dup(&a, false);
        result[0].weight = 50;
        assert_eq!(a[0].weight, 1);
    }

    #[test]
    fn sort_is_stable_and_descending() {
        let mut list = vec![
            make_node("n1", 5),
            make_node("n2", 9),
            make_node("n3", 5),
            make_node("n4", -2),
        ];
        sort_by_weight(&mut list);
        assert_eq!(ids(&list), vec!["n2", "n1", "n3", "n4"]);
    }

    #[test]
    fn missing_nodes_sort_last() {
        let n = make_node("n1", -5);
        assert_eq!(compare_node_weight(Some(&n), None), Ordering::Less);
        assert_eq!(compare_node_weight(None, Some(&n)), Ordering::Greater);
        assert_eq!(compare_node_weight(None, None), Ordering::Equal);
    }

    #[test]
    fn update_from_pulls_preferences() {
        let mut list = vec![make_node("n1", 0), make_node("n2", 0), make_node("n3", 0)];
        let other = vec![make_node("n1", 10), make_node("n2", -INFINITY)];

        update_from(&mut list, &other, 1);
        assert_eq!(weight_of(&list, "n1"), 10);
        assert_eq!(weight_of(&list, "n2"), -1);
        assert_eq!(weight_of(&list, "n3"), -1);
    }

    #[test]
    fn update_from_negative_factor_repels() {
        let mut list = vec![make_node("n1", 0), make_node("n2", 0)];
        let other = vec![make_node("n1", 10)];

        update_from(&mut list, &other, -1);
        assert_eq!(weight_of(&list, "n1"), -1);
        assert_eq!(weight_of(&list, "n2"), 0);
    }
}
