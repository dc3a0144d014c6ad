//! End-to-end checks through the public API.

use ssrle_tree::run::{decode, encode, estimate_size};
use ssrle_tree::{
    IndexedTree, LeafNode, LeafStream, NodeStore, PackedSequenceBlock, StreamKind, SymbolRun, TreeConfig,
};

fn symbol_leaves(config: &TreeConfig, pieces: &[Vec<u8>]) -> Vec<LeafNode> {
    pieces
        .iter()
        .map(|p| {
            let block = PackedSequenceBlock::from_symbols(config.leaf_block_bytes, p).unwrap();
            LeafNode::from_streams(vec![LeafStream::Symbols(block)])
        })
        .collect()
}

fn two_run_block() -> PackedSequenceBlock {
    PackedSequenceBlock::from_runs(256, [SymbolRun::new(0b1, 1, 3), SymbolRun::new(0b0, 1, 2)]).unwrap()
}

#[test]
fn literal_run_fits_two_bytes() {
    let run = SymbolRun::new(0b10110, 5, 0);
    assert_eq!(estimate_size(&run), 2);
    let back = decode(encode(&run));
    assert_eq!(back, run);
    assert_eq!(back.pattern(), 0b10110);
    assert_eq!(back.symbols().collect::<Vec<u8>>(), vec![0, 1, 1, 0, 1]);
}

#[test]
fn block_rank_and_select() {
    let block = two_run_block();
    assert_eq!(block.iter().collect::<Vec<u8>>(), vec![1, 1, 1, 1, 0, 0, 0]);
    assert_eq!(block.rank(7, 1), 4);
    assert_eq!(block.select_fw(3, 1), Some(3));
}

#[test]
fn block_insert_grows_rank() {
    let mut block = two_run_block();
    block.insert_symbols(2, 2, 1).unwrap();
    assert_eq!(block.size(), 9);
    assert_eq!(block.rank(9, 1), 6);
}

#[test]
fn skip_to_last_symbol_then_no_next_leaf() {
    let config = TreeConfig::default().with_branch_fanout(4);
    let pieces: Vec<Vec<u8>> = (0..16)
        .map(|i| {
            let len = if i < 8 { 63 } else { 62 };
            (0..len).map(|j| u8::from((i * 7 + j) % 3 == 0)).collect()
        })
        .collect();
    let model: Vec<u8> = pieces.concat();
    let leaves = symbol_leaves(&config, &pieces);
    let tree = IndexedTree::from_leaves(vec![StreamKind::Symbols], config, leaves).unwrap();
    assert_eq!(tree.height(), 3);
    assert_eq!(tree.size(0).unwrap(), 1_000);
    tree.check().unwrap();

    let start = tree.seek(0, 0).unwrap();
    let last = tree.skip_forward(&start, 999).unwrap();
    assert_eq!(last.pos(), 999);
    assert_eq!(last.leaf_index(), 61);
    assert_eq!(tree.symbol_at(&last).unwrap(), Some(model[999]));
    assert!(tree.next_sibling_leaf(last.path()).unwrap().is_none());
    assert!(tree.previous_sibling_leaf(last.path()).unwrap().is_some());
}

#[test]
fn emptied_leaf_zeroes_only_its_row() {
    let config = TreeConfig::default();
    let pieces = vec![vec![1u8; 10], vec![0, 1, 1, 0, 1], vec![0u8; 7]];
    let leaves = symbol_leaves(&config, &pieces);
    let mut tree = IndexedTree::from_leaves(vec![StreamKind::Symbols], config, leaves).unwrap();

    let rows = |tree: &IndexedTree| -> Vec<Vec<u64>> {
        let root = tree.store().get(tree.root()).unwrap().as_branch().unwrap();
        let agg = root.aggregates(0).unwrap();
        (0..agg.len()).map(|i| agg.aggregate_of(i).unwrap().to_vec()).collect()
    };
    let before = rows(&tree);
    assert_eq!(before[1], vec![5, 2, 3]);

    tree.remove_symbols(0, 10, 5).unwrap();
    let after = rows(&tree);
    assert_eq!(after[1], vec![0, 0, 0]);
    assert_eq!(after[0], before[0]);
    assert_eq!(after[2], before[2]);

    let middle = tree.next_sibling_leaf(&tree.first_leaf().unwrap()).unwrap().unwrap();
    assert!(tree.leaf(&middle).unwrap().symbols(0).unwrap().is_empty());
    tree.check().unwrap();
    assert_eq!(tree.rank(0, 17, 1).unwrap(), 10);
    let all: Vec<u8> = tree.symbols(0).unwrap().map(|s| s.unwrap()).collect();
    assert_eq!(all, [vec![1u8; 10], vec![0u8; 7]].concat());
}
