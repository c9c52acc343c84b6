use std::collections::{HashMap, HashSet};

use draftloom::outline::node::NodeKind;
use draftloom::outline::{NewNode, TreeError, create_node, delete_node, move_node};
use draftloom::snapshot::{NewSnapshot, content_hash, create_snapshot, reconstruct, snapshot_chain};
use draftloom::store::Store;

const PROJECT: &str = "novel";

fn assert_sibling_orders_unique(store: &Store) {
    let nodes = store.list_project_nodes(PROJECT).expect("project nodes");
    let mut by_parent: HashMap<Option<String>, Vec<i64>> = HashMap::new();
    for node in &nodes {
        assert!(node.order >= 0, "negative order on `{}`", node.id);
        by_parent
            .entry(node.parent_id.clone())
            .or_default()
            .push(node.order);
    }
    for (parent, orders) in by_parent {
        let distinct: HashSet<_> = orders.iter().copied().collect();
        assert_eq!(
            distinct.len(),
            orders.len(),
            "duplicate order under {parent:?}: {orders:?}"
        );
    }
}

fn sibling_orders(store: &Store, parent: &str) -> Vec<i64> {
    store
        .list_children(PROJECT, Some(parent))
        .expect("children")
        .iter()
        .map(|node| node.order)
        .collect()
}

fn assert_acyclic(store: &Store) {
    let nodes = store.list_project_nodes(PROJECT).expect("project nodes");
    let parents: HashMap<String, Option<String>> = nodes
        .iter()
        .map(|node| (node.id.clone(), node.parent_id.clone()))
        .collect();
    for node in &nodes {
        let mut seen = HashSet::new();
        let mut cursor = node.parent_id.clone();
        while let Some(id) = cursor {
            assert!(seen.insert(id.clone()), "cycle through `{id}`");
            cursor = parents
                .get(&id)
                .unwrap_or_else(|| panic!("dangling parent `{id}`"))
                .clone();
        }
    }
}

#[test]
fn orders_stay_contiguous_through_mixed_operations() {
    let store = Store::open_in_memory().expect("sqlite");
    let book = create_node(&store, NewNode::new(PROJECT, NodeKind::Book, None, "Book"))
        .expect("book");
    let volume_a = create_node(
        &store,
        NewNode::new(PROJECT, NodeKind::Volume, Some(&book.id), "Vol A"),
    )
    .expect("volume a");
    let volume_b = create_node(
        &store,
        NewNode::new(PROJECT, NodeKind::Volume, Some(&book.id), "Vol B"),
    )
    .expect("volume b");

    let mut chapters = Vec::new();
    for index in 0..6 {
        let chapter = create_node(
            &store,
            NewNode::new(
                PROJECT,
                NodeKind::Chapter,
                Some(&volume_a.id),
                &format!("Chapter {index}"),
            ),
        )
        .expect("chapter");
        chapters.push(chapter.id);
    }
    assert_eq!(sibling_orders(&store, &volume_a.id), vec![0, 1, 2, 3, 4, 5]);

    // Same-parent moves renumber the affected range and stay contiguous.
    move_node(&store, &chapters[1], Some(&volume_a.id), 4).expect("forward");
    assert_eq!(sibling_orders(&store, &volume_a.id), vec![0, 1, 2, 3, 4, 5]);
    move_node(&store, &chapters[5], Some(&volume_a.id), 0).expect("backward");
    assert_eq!(sibling_orders(&store, &volume_a.id), vec![0, 1, 2, 3, 4, 5]);

    // Cross-parent moves open a slot at the destination and may leave a gap
    // at the source; orders stay unique either way.
    move_node(&store, &chapters[2], Some(&volume_b.id), 0).expect("cross-parent");
    assert_sibling_orders_unique(&store);
    move_node(&store, &chapters[3], Some(&volume_b.id), 0).expect("cross-parent front");
    assert_sibling_orders_unique(&store);
    assert_eq!(sibling_orders(&store, &volume_b.id), vec![0, 1]);

    let removed = delete_node(&store, &chapters[0]).expect("delete");
    assert_eq!(removed, 1);
    assert_sibling_orders_unique(&store);
    assert_acyclic(&store);
}

#[test]
fn tree_stays_acyclic_under_rejected_and_accepted_moves() {
    let store = Store::open_in_memory().expect("sqlite");
    let book = create_node(&store, NewNode::new(PROJECT, NodeKind::Book, None, "Book"))
        .expect("book");
    let volume = create_node(
        &store,
        NewNode::new(PROJECT, NodeKind::Volume, Some(&book.id), "Vol"),
    )
    .expect("volume");
    let chapter = create_node(
        &store,
        NewNode::new(PROJECT, NodeKind::Chapter, Some(&volume.id), "Ch"),
    )
    .expect("chapter");
    let scene = create_node(
        &store,
        NewNode::new(PROJECT, NodeKind::Scene, Some(&chapter.id), "Sc"),
    )
    .expect("scene");

    for (id, target) in [
        (&book.id, &volume.id),
        (&book.id, &scene.id),
        (&volume.id, &chapter.id),
        (&chapter.id, &chapter.id),
    ] {
        let err = move_node(&store, id, Some(target), 0).expect_err("cycle");
        assert!(matches!(err, TreeError::CyclicMove(_)), "{err}");
    }
    assert_acyclic(&store);

    // A legal re-parent still holds the invariant.
    move_node(&store, &scene.id, Some(&volume.id), 0).expect("re-parent");
    assert_acyclic(&store);
    assert_sibling_orders_unique(&store);
}

#[test]
fn snapshot_chains_replay_to_their_recorded_hashes() {
    let store = Store::open_in_memory().expect("sqlite");
    let chapter = create_node(
        &store,
        NewNode::new(PROJECT, NodeKind::Chapter, None, "Departure"),
    )
    .expect("chapter");

    let revisions = [
        "The road was empty.",
        "The road was empty, and cold.",
        "The road was cold.",
        "",
        "A fresh start after a blank page.",
    ];
    let mut parent: Option<String> = None;
    let mut expected = Vec::new();
    for (index, content) in revisions.iter().enumerate() {
        let snapshot = create_snapshot(
            &store,
            NewSnapshot {
                chapter_id: &chapter.id,
                project_id: PROJECT,
                content,
                summary: &format!("rev {index}"),
                parent_snapshot_id: parent.as_deref(),
            },
        )
        .expect("snapshot");
        assert_eq!(snapshot.content_hash, content_hash(content));
        expected.push((snapshot.id.clone(), content.to_string()));
        parent = Some(snapshot.id);
    }

    // Every link points at the previous revision and replays exactly.
    let chain = snapshot_chain(&store, &chapter.id).expect("chain");
    assert_eq!(chain.len(), revisions.len());
    for pair in chain.windows(2) {
        assert_eq!(pair[0].parent_snapshot_id.as_deref(), Some(pair[1].id.as_str()));
    }
    assert_eq!(chain.last().expect("root").parent_snapshot_id, None);

    for (id, content) in &expected {
        assert_eq!(&reconstruct(&store, id).expect("reconstruct"), content);
    }
}
