//! Structure placement driven through element saves, moves and deletes.

mod common;

use assert_matches::assert_matches;
use common::{entry, harness, saved, Harness, ENTRY_STRUCTURE};
use vellum_core::element::Element;
use vellum_core::structure::{Placement, StructureMode, StructureNode};
use vellum_core::types::DbId;
use vellum_pipeline::{ElementError, SaveOptions, UnitOfWork};

async fn child_of(h: &Harness, parent: &Element, title: &str) -> Element {
    let mut child = entry(title);
    child.new_parent_id = parent.id;
    saved(h, child).await
}

fn node(nodes: &[StructureNode], element: &Element) -> StructureNode {
    *nodes
        .iter()
        .find(|n| n.element_id == element.id)
        .expect("element is in the structure")
}

fn order(h: &Harness) -> Vec<DbId> {
    h.store
        .structure_nodes(ENTRY_STRUCTURE)
        .iter()
        .filter_map(|n| n.element_id)
        .collect()
}

#[tokio::test]
async fn test_new_elements_append_to_the_root() {
    let h = harness();
    let a = saved(&h, entry("A")).await;
    let b = saved(&h, entry("B")).await;

    assert_eq!(order(&h), vec![a.id.unwrap(), b.id.unwrap()]);
    let position = b.position.unwrap();
    assert_eq!(position.level, 1);
    assert_eq!((position.lft, position.rgt), (4, 5));
}

#[tokio::test]
async fn test_new_parent_places_the_element_under_it() {
    let h = harness();
    let parent = saved(&h, entry("Parent")).await;
    let child = child_of(&h, &parent, "Child").await;

    let nodes = h.store.structure_nodes(ENTRY_STRUCTURE);
    let parent_node = node(&nodes, &parent);
    let child_node = node(&nodes, &child);
    assert_eq!(child_node.level, 2);
    assert!(parent_node.lft < child_node.lft && child_node.rgt < parent_node.rgt);
    assert!(child.new_parent_id.is_none());
}

#[tokio::test]
async fn test_deleting_a_node_lifts_its_children_into_its_slot() {
    let h = harness();
    let parent = saved(&h, entry("Parent")).await;
    let first = child_of(&h, &parent, "First").await;
    let second = child_of(&h, &parent, "Second").await;
    let after = saved(&h, entry("After")).await;

    let levels_before = {
        let nodes = h.store.structure_nodes(ENTRY_STRUCTURE);
        (node(&nodes, &first).level, node(&nodes, &second).level)
    };

    let deleted = h
        .service
        .delete(&mut UnitOfWork::new(), &parent, false)
        .await
        .unwrap();
    assert!(deleted);

    let nodes = h.store.structure_nodes(ENTRY_STRUCTURE);
    let first_node = node(&nodes, &first);
    let second_node = node(&nodes, &second);
    assert_eq!(first_node.level, levels_before.0 - 1);
    assert_eq!(second_node.level, levels_before.1 - 1);
    assert_eq!((first_node.lft, first_node.rgt), (2, 3));
    assert_eq!((second_node.lft, second_node.rgt), (4, 5));
    assert_eq!(node(&nodes, &after).lft, 6);
    assert_eq!(
        order(&h),
        vec![first.id.unwrap(), second.id.unwrap(), after.id.unwrap()]
    );
}

#[tokio::test]
async fn test_move_before_a_sibling() {
    let h = harness();
    let a = saved(&h, entry("A")).await;
    let b = saved(&h, entry("B")).await;
    let mut c = saved(&h, entry("C")).await;

    let moved = h
        .service
        .move_element(
            &mut UnitOfWork::new(),
            &mut c,
            Placement::Before(a.id.unwrap()),
            StructureMode::Update,
        )
        .await
        .unwrap();

    assert!(moved);
    assert_eq!(order(&h), vec![c.id.unwrap(), a.id.unwrap(), b.id.unwrap()]);
    assert_eq!(c.position.unwrap().lft, 2);
}

#[tokio::test]
async fn test_move_with_subtree() {
    let h = harness();
    let a = saved(&h, entry("A")).await;
    let mut b = saved(&h, entry("B")).await;
    let b_child = child_of(&h, &b, "B child").await;

    h.service
        .move_element(
            &mut UnitOfWork::new(),
            &mut b,
            Placement::LastChildOf(a.id),
            StructureMode::Auto,
        )
        .await
        .unwrap();

    let nodes = h.store.structure_nodes(ENTRY_STRUCTURE);
    assert_eq!(node(&nodes, &b).level, 2);
    assert_eq!(node(&nodes, &b_child).level, 3);
    assert_eq!(node(&nodes, &a).rgt, 7);
}

#[tokio::test]
async fn test_insert_mode_leaves_placed_elements_alone() {
    let h = harness();
    let a = saved(&h, entry("A")).await;
    let mut b = saved(&h, entry("B")).await;

    let moved = h
        .service
        .move_element(
            &mut UnitOfWork::new(),
            &mut b,
            Placement::Before(a.id.unwrap()),
            StructureMode::Insert,
        )
        .await
        .unwrap();
    assert!(!moved);
    assert_eq!(order(&h), vec![a.id.unwrap(), b.id.unwrap()]);
}

#[tokio::test]
async fn test_max_levels_rejects_the_whole_save() {
    let h = harness();
    let one = saved(&h, entry("One")).await;
    let two = child_of(&h, &one, "Two").await;
    let three = child_of(&h, &two, "Three").await;
    let before = h.store.element_ids().len();

    let mut four = entry("Four");
    four.new_parent_id = three.id;
    let err = h
        .service
        .save(&mut UnitOfWork::new(), &mut four, SaveOptions::default())
        .await
        .unwrap_err();

    assert_matches!(err, ElementError::StructuralInconsistency(_));
    assert_eq!(h.store.element_ids().len(), before);
    assert!(four.id.is_none());
}
