//! Threaded comment construction.
//!
//! Records are laid out in an index table first; nested nodes are only
//! produced at the end, bottom-up, so no step recurses over the thread.

use std::collections::{HashMap, HashSet};

use crate::models::{CommentId, CommentNode, CommentRecord};

/// Deepest level at which the UI still offers a reply box.
pub const DEFAULT_MAX_DEPTH: usize = 3;

/// Builds the comment forest for one post.
///
/// Children keep arrival order. A record whose parent cannot be found is a
/// root. Nothing is ever dropped: the node count equals the number of records,
/// including records nested under `replies`. `max_depth` only decides
/// `can_reply`; deeper threads are still built in full.
pub fn build_tree(records: &[CommentRecord], max_depth: usize) -> Vec<CommentNode> {
    let flat = unnest(records);
    let layout = Layout::new(&flat);

    let mut built: Vec<Option<CommentNode>> = vec![None; flat.len()];
    for &(index, depth) in layout.preorder.iter().rev() {
        let children: Vec<CommentNode> = layout
            .children
            .get(&index)
            .map(|kids| kids.iter().filter_map(|k| built[*k].take()).collect())
            .unwrap_or_default();

        let record = &flat[index];
        built[index] = Some(CommentNode {
            id: record.id.clone(),
            parent_id: record.parent_id.clone(),
            author_id: record.author_id.clone(),
            content: record.content.clone(),
            score: record.score,
            own_vote: record.own_vote,
            is_accepted: record.is_accepted,
            is_deleted: record.is_deleted,
            created_at: record.created_at,
            depth,
            can_reply: depth < max_depth,
            children,
        });
    }

    layout
        .roots
        .iter()
        .filter_map(|r| built[*r].take())
        .collect()
}

/// Pre-order copy of the forest as flat records (replies emptied).
pub fn flatten(forest: &[CommentNode]) -> Vec<CommentRecord> {
    walk(forest).map(CommentNode::to_record).collect()
}

pub fn count(forest: &[CommentNode]) -> usize {
    walk(forest).count()
}

/// Nodes in the order a threaded view draws them.
pub fn render_order(forest: &[CommentNode]) -> Vec<&CommentNode> {
    walk(forest).collect()
}

pub fn find<'a>(forest: &'a [CommentNode], id: &CommentId) -> Option<&'a CommentNode> {
    walk(forest).find(|node| &node.id == id)
}

pub fn walk(forest: &[CommentNode]) -> Walk<'_> {
    Walk {
        stack: forest.iter().rev().collect(),
    }
}

/// Depth-first, pre-order traversal.
pub struct Walk<'a> {
    stack: Vec<&'a CommentNode>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = &'a CommentNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}

pub(crate) fn for_each_mut(forest: &mut [CommentNode], f: &mut impl FnMut(&mut CommentNode)) {
    let mut stack: Vec<&mut CommentNode> = forest.iter_mut().collect();
    while let Some(node) = stack.pop() {
        f(node);
        stack.extend(node.children.iter_mut());
    }
}

/// Unnests `replies`, pointing each nested record at its enclosing parent.
/// Flat input comes back unchanged.
pub fn unnest(records: &[CommentRecord]) -> Vec<CommentRecord> {
    let mut out = Vec::with_capacity(records.len());
    let mut stack: Vec<(&CommentRecord, Option<&CommentId>)> =
        records.iter().rev().map(|r| (r, None)).collect();

    while let Some((record, enclosing)) = stack.pop() {
        let mut flat = record.clone();
        flat.replies = Vec::new();
        if let Some(parent) = enclosing {
            flat.parent_id = Some(parent.clone());
        }
        out.push(flat);
        stack.extend(record.replies.iter().rev().map(|r| (r, Some(&record.id))));
    }

    out
}

struct Layout {
    roots: Vec<usize>,
    children: HashMap<usize, Vec<usize>>,
    /// (index, depth) in pre-order.
    preorder: Vec<(usize, usize)>,
}

impl Layout {
    fn new(flat: &[CommentRecord]) -> Self {
        let mut first_seen: HashMap<&CommentId, usize> = HashMap::with_capacity(flat.len());
        for (i, record) in flat.iter().enumerate() {
            first_seen.entry(&record.id).or_insert(i);
        }

        let mut parent_of: Vec<Option<usize>> = vec![None; flat.len()];
        let mut children: HashMap<usize, Vec<usize>> = HashMap::new();
        let mut roots = Vec::new();

        for (i, record) in flat.iter().enumerate() {
            let parent = record
                .parent_id
                .as_ref()
                .and_then(|p| first_seen.get(p).copied())
                .filter(|p| *p != i);
            match parent {
                Some(p) => {
                    parent_of[i] = Some(p);
                    children.entry(p).or_default().push(i);
                }
                None => roots.push(i),
            }
        }

        let mut reached = vec![false; flat.len()];
        for &root in &roots {
            mark_reached(root, &children, &mut reached);
        }

        // Whatever is left hangs off a parent cycle. Cut the cycle itself, at
        // the first cycle member above the earliest unreached record.
        while let Some(orphan) = reached.iter().position(|r| !*r) {
            let cut = cycle_entry(orphan, &parent_of);
            if let Some(p) = parent_of[cut].take() {
                if let Some(kids) = children.get_mut(&p) {
                    kids.retain(|k| *k != cut);
                }
            }
            roots.push(cut);
            mark_reached(cut, &children, &mut reached);
        }
        roots.sort_unstable();

        let mut preorder = Vec::with_capacity(flat.len());
        let mut stack: Vec<(usize, usize)> = roots.iter().rev().map(|r| (*r, 0)).collect();
        while let Some((index, depth)) = stack.pop() {
            preorder.push((index, depth));
            if let Some(kids) = children.get(&index) {
                stack.extend(kids.iter().rev().map(|k| (*k, depth + 1)));
            }
        }

        Self {
            roots,
            children,
            preorder,
        }
    }
}

/// Follows parent links from `start` until a record repeats.
fn cycle_entry(start: usize, parent_of: &[Option<usize>]) -> usize {
    let mut seen = HashSet::new();
    let mut at = start;
    while seen.insert(at) {
        match parent_of[at] {
            Some(p) => at = p,
            None => return at,
        }
    }
    at
}

fn mark_reached(start: usize, children: &HashMap<usize, Vec<usize>>, reached: &mut [bool]) {
    let mut stack = vec![start];
    while let Some(index) = stack.pop() {
        if reached[index] {
            continue;
        }
        reached[index] = true;
        if let Some(kids) = children.get(&index) {
            stack.extend(kids.iter().copied());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserId;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn record(id: &str, parent: Option<&str>) -> CommentRecord {
        CommentRecord {
            id: CommentId::new_unchecked(id.into()),
            parent_id: parent.map(|p| CommentId::new_unchecked(p.into())),
            author_id: UserId::new_unchecked(format!("author-{id}")),
            content: format!("body of {id}"),
            score: 0,
            own_vote: Default::default(),
            is_accepted: false,
            is_deleted: false,
            created_at: None,
            replies: Vec::new(),
        }
    }

    fn ids(nodes: &[&CommentNode]) -> Vec<String> {
        nodes.iter().map(|n| n.id.to_string()).collect()
    }

    /// (id, parent id, depth) for every node, pre-order.
    fn shape(forest: &[CommentNode]) -> Vec<(String, Option<String>, usize)> {
        walk(forest)
            .map(|n| {
                (
                    n.id.to_string(),
                    n.parent_id.as_ref().map(|p| p.to_string()),
                    n.depth,
                )
            })
            .collect()
    }

    fn random_forest_records(rng: &mut StdRng, size: usize) -> Vec<CommentRecord> {
        let mut records: Vec<CommentRecord> = Vec::with_capacity(size);
        for i in 0..size {
            let parent = if i == 0 || rng.gen_bool(0.3) {
                None
            } else {
                Some(format!("c{}", rng.gen_range(0..i)))
            };
            records.push(record(&format!("c{i}"), parent.as_deref()));
        }
        records
    }

    #[test]
    fn attaches_replies_in_arrival_order() {
        let records = vec![
            record("a", None),
            record("b", None),
            record("a2", Some("a")),
            record("a1", Some("a")),
            record("a2x", Some("a2")),
        ];
        let forest = build_tree(&records, DEFAULT_MAX_DEPTH);

        assert_eq!(forest.len(), 2);
        assert_eq!(
            ids(&render_order(&forest)),
            vec!["a", "a2", "a2x", "a1", "b"]
        );
        let a2x = find(&forest, &CommentId::new_unchecked("a2x".into())).expect("present");
        assert_eq!(a2x.depth, 2);
    }

    #[test]
    fn reply_arriving_before_parent_still_nests() {
        let records = vec![record("child", Some("parent")), record("parent", None)];
        let forest = build_tree(&records, DEFAULT_MAX_DEPTH);
        assert_eq!(forest.len(), 1);
        assert_eq!(forest[0].id.as_str(), "parent");
        assert_eq!(forest[0].children[0].depth, 1);
    }

    #[test]
    fn unresolved_parent_becomes_root() {
        let records = vec![record("a", None), record("lost", Some("gone"))];
        let forest = build_tree(&records, DEFAULT_MAX_DEPTH);
        assert_eq!(forest.len(), 2);
        assert_eq!(forest[1].depth, 0);
        assert_eq!(
            forest[1].parent_id.as_ref().map(|p| p.as_str()),
            Some("gone")
        );
    }

    #[test]
    fn self_parent_and_cycles_are_kept() {
        let records = vec![
            record("root", None),
            record("self", Some("self")),
            record("x", Some("y")),
            record("y", Some("x")),
            record("z", Some("y")),
        ];
        let forest = build_tree(&records, DEFAULT_MAX_DEPTH);
        assert_eq!(count(&forest), records.len());
        assert_eq!(ids(&forest.iter().collect::<Vec<_>>()), vec!["root", "self", "x"]);
        assert_eq!(
            ids(&render_order(&forest)),
            vec!["root", "self", "x", "y", "z"]
        );
    }

    #[test]
    fn branch_below_a_cycle_keeps_its_parent() {
        let records = vec![
            record("z", Some("y")),
            record("x", Some("y")),
            record("y", Some("x")),
        ];
        let forest = build_tree(&records, DEFAULT_MAX_DEPTH);
        assert_eq!(count(&forest), 3);
        assert_eq!(ids(&forest.iter().collect::<Vec<_>>()), vec!["y"]);
        assert_eq!(ids(&render_order(&forest)), vec!["y", "z", "x"]);

        let z = find(&forest, &CommentId::new_unchecked("z".into())).expect("kept");
        assert_eq!(z.depth, 1);
        assert_eq!(z.parent_id.as_ref().map(|p| p.as_str()), Some("y"));
    }

    #[test]
    fn duplicate_ids_do_not_duplicate_children() {
        let records = vec![
            record("a", None),
            record("a", None),
            record("b", Some("a")),
        ];
        let forest = build_tree(&records, DEFAULT_MAX_DEPTH);
        assert_eq!(count(&forest), 3);
        assert_eq!(forest[0].children.len(), 1);
        assert!(forest[1].children.is_empty());
    }

    #[test]
    fn depth_cap_only_limits_reply_affordance() {
        let records = vec![
            record("d0", None),
            record("d1", Some("d0")),
            record("d2", Some("d1")),
            record("d3", Some("d2")),
            record("d4", Some("d3")),
        ];
        let forest = build_tree(&records, 3);
        let order = render_order(&forest);
        assert_eq!(order.len(), 5);
        let depths: Vec<usize> = order.iter().map(|n| n.depth).collect();
        assert_eq!(depths, vec![0, 1, 2, 3, 4]);
        let can_reply: Vec<bool> = order.iter().map(|n| n.can_reply).collect();
        assert_eq!(can_reply, vec![true, true, true, false, false]);
    }

    #[test]
    fn nested_input_is_idempotent() {
        let mut a = record("a", None);
        let mut b = record("b", None);
        b.replies.push(record("c", None));
        a.replies.push(b);
        a.replies.push(record("d", None));

        let forest = build_tree(&[a], DEFAULT_MAX_DEPTH);
        assert_eq!(
            shape(&forest),
            vec![
                ("a".into(), None, 0),
                ("b".into(), Some("a".into()), 1),
                ("c".into(), Some("b".into()), 2),
                ("d".into(), Some("a".into()), 1),
            ]
        );
    }

    #[test]
    fn never_drops_records() {
        let mut rng = StdRng::seed_from_u64(0x7ee5);
        for size in 0..60 {
            let mut records = random_forest_records(&mut rng, size);
            // Scramble arrival order and sprinkle dangling parents.
            for i in (1..records.len()).rev() {
                let j = rng.gen_range(0..=i);
                records.swap(i, j);
            }
            if size > 3 {
                records[1].parent_id = Some(CommentId::new_unchecked("missing".into()));
            }
            let forest = build_tree(&records, DEFAULT_MAX_DEPTH);
            assert_eq!(count(&forest), records.len());
        }
    }

    #[test]
    fn flatten_then_build_round_trips() {
        let mut rng = StdRng::seed_from_u64(42);
        for size in 1..40 {
            let records = random_forest_records(&mut rng, size);
            let forest = build_tree(&records, DEFAULT_MAX_DEPTH);
            let rebuilt = build_tree(&flatten(&forest), DEFAULT_MAX_DEPTH);
            assert_eq!(rebuilt, forest);
            assert_eq!(shape(&rebuilt), shape(&forest));
        }
    }

    #[test]
    fn depth_is_parent_depth_plus_one() {
        let mut rng = StdRng::seed_from_u64(7);
        let records = random_forest_records(&mut rng, 80);
        let forest = build_tree(&records, DEFAULT_MAX_DEPTH);
        for node in walk(&forest) {
            for child in &node.children {
                assert_eq!(child.depth, node.depth + 1);
            }
        }
        assert!(forest.iter().all(|root| root.depth == 0));
    }
}
