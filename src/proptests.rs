use super::*;

use crate::bits::{Hardware, Portable};
use crate::run::{decode, encode, estimate_size, max_pattern_length, max_run_length, try_decode};
use proptest::prelude::*;

fn small_config() -> TreeConfig {
    TreeConfig::default()
        .with_branch_fanout(3)
        .with_leaf_block_bytes(64)
        .with_leaf_key_capacity(4)
        .with_max_split_retries(8)
}

/// Full invariant check plus a leaf-by-leaf walk in both directions.
fn validate_tree(t: &IndexedTree, stream: usize) {
    t.check().unwrap();

    let mut leaves = vec![t.first_leaf().unwrap()];
    while let Some(next) = t.next_sibling_leaf(leaves.last().unwrap()).unwrap() {
        leaves.push(next);
    }
    let total: u64 = leaves
        .iter()
        .map(|p| t.leaf(p).unwrap().size(stream).unwrap())
        .sum();
    assert_eq!(total, t.size(stream).unwrap(), "leaf sizes must add up to the stream size");
    assert!(t.store().live_nodes() >= leaves.len(), "every leaf must be a live node");

    for pair in leaves.windows(2) {
        let back = t.previous_sibling_leaf(&pair[1]).unwrap().unwrap();
        assert!(back.same_leaf(&pair[0]), "previous(next(p)) must be p");
    }
    assert!(t.previous_sibling_leaf(&leaves[0]).unwrap().is_none());
}

fn model_rank(model: &[u8], pos: usize, symbol: u8) -> u64 {
    model[..pos].iter().filter(|&&s| s == symbol).count() as u64
}

// =============================================================================
// Runs
// =============================================================================

fn run_strategy() -> impl Strategy<Value = SymbolRun> {
    (0..=max_pattern_length()).prop_flat_map(|pl| {
        (any::<u64>(), 0..=max_run_length(pl)).prop_map(move |(pattern, rl)| SymbolRun::new(pattern, pl, rl))
    })
}

fn short_run_strategy() -> impl Strategy<Value = SymbolRun> {
    (0..=max_pattern_length(), any::<u64>(), 0u64..200)
        .prop_map(|(pl, pattern, rl)| SymbolRun::new(pattern, pl, rl))
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_shrink_iters: 50_000,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_run_codec(run in run_strategy()) {
        let unit = encode(&run);
        prop_assert_eq!(decode(unit), run);
        prop_assert_eq!(try_decode(unit), Some(run));
        prop_assert!(estimate_size(&run) <= 8);
    }

    #[test]
    fn prop_run_rank_select(run in short_run_strategy(), symbol in 0u8..2) {
        let symbols: Vec<u8> = run.symbols().collect();
        prop_assert_eq!(symbols.len() as u64, run.len());
        prop_assert_eq!(run.count(symbol), model_rank(&symbols, symbols.len(), symbol));

        for i in 0..symbols.len() {
            prop_assert_eq!(run.symbol(i as u64), symbols[i]);
            prop_assert_eq!(run.rank(i as u64, symbol), model_rank(&symbols, i, symbol));

            let r = model_rank(&symbols, i + 1, symbol);
            if r > 0 {
                let at = run.select_fw(r - 1, symbol).unwrap();
                prop_assert!(at <= i as u64);
                prop_assert_eq!(at == i as u64, symbols[i] == symbol);
                prop_assert_eq!(run.select_fw_with::<Portable>(r - 1, symbol), Some(at));
            }
        }
        prop_assert_eq!(run.select_fw(run.count(symbol), symbol), None);
    }

    #[test]
    fn prop_run_split_concat(run in short_run_strategy(), at_seed in any::<u64>()) {
        let at = at_seed % (run.len() + 1);
        let (left, right) = run.split(at);
        prop_assert_eq!(left.len(), at);
        let joined: Vec<u8> = left.symbols().chain(right.symbols()).collect();
        let expected: Vec<u8> = run.symbols().collect();
        prop_assert_eq!(joined, expected.clone());
        if let Some(merged) = left.concat(&right) {
            prop_assert_eq!(merged.symbols().collect::<Vec<u8>>(), expected);
        }
    }
}

// =============================================================================
// Blocks
// =============================================================================

#[derive(Clone, Debug)]
enum BlockOp {
    Insert { pos: usize, len: u64, symbol: u8 },
    Remove { pos: usize, len: usize },
    SplitAppend { pos: usize },
}

fn block_ops_strategy() -> impl Strategy<Value = Vec<BlockOp>> {
    let op = prop_oneof![
        60 => (any::<usize>(), 1u64..80, 0u8..2)
            .prop_map(|(pos, len, symbol)| BlockOp::Insert { pos, len, symbol }),
        30 => (any::<usize>(), 1usize..40).prop_map(|(pos, len)| BlockOp::Remove { pos, len }),
        10 => any::<usize>().prop_map(|pos| BlockOp::SplitAppend { pos }),
    ];
    prop::collection::vec(op, 0..=300)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_shrink_iters: 50_000,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_block_equivalence(ops in block_ops_strategy()) {
        let mut block = PackedSequenceBlock::new(256);
        let mut model: Vec<u8> = Vec::new();

        for op in ops {
            match op {
                BlockOp::Insert { pos, len, symbol } => {
                    let pos = pos % (model.len() + 1);
                    let before = block.clone();
                    match block.insert_symbols(pos as u64, len, symbol) {
                        Ok(()) => {
                            model.splice(pos..pos, std::iter::repeat(symbol).take(len as usize));
                        }
                        Err(_) => prop_assert_eq!(&block, &before),
                    }
                }
                BlockOp::Remove { pos, len } => {
                    if model.is_empty() {
                        continue;
                    }
                    let pos = pos % model.len();
                    let len = len.min(model.len() - pos);
                    let before = block.clone();
                    match block.remove_symbols(pos as u64, len as u64) {
                        Ok(()) => {
                            model.drain(pos..pos + len);
                        }
                        Err(_) => prop_assert_eq!(&block, &before),
                    }
                }
                BlockOp::SplitAppend { pos } => {
                    let pos = pos % (model.len() + 1);
                    let whole = block.clone();
                    let right = block.split_off(pos as u64);
                    prop_assert_eq!(block.size(), pos as u64);
                    prop_assert_eq!(right.iter().collect::<Vec<u8>>(), model[pos..].to_vec());
                    if block.append(&right).is_err() {
                        block = whole;
                    }
                }
            }

            prop_assert_eq!(block.size(), model.len() as u64);
            prop_assert!(block.byte_size() <= block.capacity());
        }

        block.check().unwrap();
        prop_assert_eq!(block.iter().collect::<Vec<u8>>(), model.clone());
        for symbol in 0..2u8 {
            prop_assert_eq!(block.count(symbol), model_rank(&model, model.len(), symbol));
            for i in 0..model.len() {
                let r = model_rank(&model, i + 1, symbol);
                if r == 0 {
                    continue;
                }
                let at = block.select_fw(r - 1, symbol).unwrap();
                prop_assert!(at <= i as u64);
                prop_assert_eq!(at == i as u64, model[i] == symbol);
                prop_assert_eq!(block.select_fw_with::<Portable>(r - 1, symbol), Some(at));
                prop_assert_eq!(block.select_fw_with::<Hardware>(r - 1, symbol), Some(at));
            }
        }
    }
}

// =============================================================================
// Trees
// =============================================================================

#[derive(Clone, Debug)]
enum Op {
    Insert { pos: usize, len: u64, symbol: u8 },
    Remove { pos: usize, len: usize },
    Rank { pos: usize, symbol: u8 },
    Select { rank: u64, symbol: u8 },
    Skip { pos: usize, n: usize },
    Merge { pos: usize },
}

fn ops_strategy() -> impl Strategy<Value = Vec<Op>> {
    let op = prop_oneof![
        40 => (any::<usize>(), 1u64..12, 0u8..2).prop_map(|(pos, len, symbol)| Op::Insert { pos, len, symbol }),
        15 => (any::<usize>(), 1usize..30).prop_map(|(pos, len)| Op::Remove { pos, len }),
        15 => (any::<usize>(), 0u8..2).prop_map(|(pos, symbol)| Op::Rank { pos, symbol }),
        10 => (any::<u64>(), 0u8..2).prop_map(|(rank, symbol)| Op::Select { rank, symbol }),
        15 => (any::<usize>(), any::<usize>()).prop_map(|(pos, n)| Op::Skip { pos, n }),
        5 => any::<usize>().prop_map(|pos| Op::Merge { pos }),
    ];
    prop::collection::vec(op, 0..=400)
}

#[derive(Clone, Debug)]
enum KeyOp {
    Insert { pos: usize, key: u64 },
    Remove { pos: usize, len: usize },
    Find { target: u64 },
}

fn key_ops_strategy() -> impl Strategy<Value = Vec<KeyOp>> {
    let op = prop_oneof![
        50 => (any::<usize>(), 0u64..20).prop_map(|(pos, key)| KeyOp::Insert { pos, key }),
        20 => (any::<usize>(), 1usize..6).prop_map(|(pos, len)| KeyOp::Remove { pos, len }),
        30 => (0u64..400).prop_map(|target| KeyOp::Find { target }),
    ];
    prop::collection::vec(op, 0..=300)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_shrink_iters: 50_000,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_tree_equivalence(ops in ops_strategy()) {
        let mut t = IndexedTree::new(vec![StreamKind::Symbols], small_config()).unwrap();
        let mut m: Vec<u8> = Vec::new();

        for op in ops {
            match op {
                Op::Insert { pos, len, symbol } => {
                    let pos = pos % (m.len() + 1);
                    t.insert_symbols(0, pos as u64, len, symbol).unwrap();
                    m.splice(pos..pos, std::iter::repeat(symbol).take(len as usize));
                }
                Op::Remove { pos, len } => {
                    if m.is_empty() {
                        continue;
                    }
                    let pos = pos % m.len();
                    let len = len.min(m.len() - pos);
                    t.remove_symbols(0, pos as u64, len as u64).unwrap();
                    m.drain(pos..pos + len);
                }
                Op::Rank { pos, symbol } => {
                    let pos = pos % (m.len() + 1);
                    prop_assert_eq!(t.rank(0, pos as u64, symbol).unwrap(), model_rank(&m, pos, symbol));
                }
                Op::Select { rank, symbol } => {
                    let count = model_rank(&m, m.len(), symbol);
                    let rank = rank % (count + 1);
                    let got = t.select_forward(0, rank, symbol).unwrap().map(|c| c.pos());
                    let expected = m
                        .iter()
                        .enumerate()
                        .filter(|&(_, &s)| s == symbol)
                        .nth(rank as usize)
                        .map(|(i, _)| i as u64);
                    prop_assert_eq!(got, expected);
                }
                Op::Skip { pos, n } => {
                    let p = pos % (m.len() + 1);
                    let n = n % (m.len() - p + 1);
                    let origin = t.seek(0, p as u64).unwrap();
                    let there = t.skip_forward(&origin, n as u64).unwrap();
                    prop_assert_eq!(there.pos(), (p + n) as u64);
                    prop_assert_eq!(t.symbol_at(&there).unwrap(), m.get(p + n).copied());
                    let back = t.skip_backward(&there, n as u64).unwrap();
                    prop_assert_eq!(back.pos(), p as u64);
                    prop_assert_eq!(back.leaf(), origin.leaf());
                    prop_assert_eq!(back.leaf_index(), origin.leaf_index());
                }
                Op::Merge { pos } => {
                    if m.is_empty() {
                        continue;
                    }
                    let path = t.seek(0, (pos % m.len()) as u64).unwrap().path().clone();
                    t.merge_with_next(&path).unwrap();
                }
            }

            prop_assert_eq!(t.size(0).unwrap(), m.len() as u64);
        }

        validate_tree(&t, 0);
        let got: Vec<u8> = t.symbols(0).unwrap().map(|s| s.unwrap()).collect();
        prop_assert_eq!(got, m);
    }

    #[test]
    fn prop_sum_keys_equivalence(ops in key_ops_strategy()) {
        let mut t = IndexedTree::new(vec![StreamKind::Keys(AggregateOrdering::Sum)], small_config()).unwrap();
        let mut m: Vec<u64> = Vec::new();

        for op in ops {
            match op {
                KeyOp::Insert { pos, key } => {
                    let pos = pos % (m.len() + 1);
                    t.insert_keys(0, pos as u64, &[key]).unwrap();
                    m.insert(pos, key);
                }
                KeyOp::Remove { pos, len } => {
                    if m.is_empty() {
                        continue;
                    }
                    let pos = pos % m.len();
                    let len = len.min(m.len() - pos);
                    t.remove_keys(0, pos as u64, len as u64).unwrap();
                    m.drain(pos..pos + len);
                }
                KeyOp::Find { target } => {
                    let mut prefix = 0u64;
                    let mut expected = None;
                    for (i, &k) in m.iter().enumerate() {
                        if target < prefix + k {
                            expected = Some((i as u64, k, prefix));
                            break;
                        }
                        prefix += k;
                    }
                    let got = t
                        .find(0, target)
                        .unwrap()
                        .map(|found| (found.cursor.pos(), found.key, found.prefix));
                    prop_assert_eq!(got, expected);
                }
            }

            prop_assert_eq!(t.size(0).unwrap(), m.len() as u64);
        }

        validate_tree(&t, 0);
    }
}

// =============================================================================
// Exhaustive
// =============================================================================

fn for_each_permutation<T: Clone>(items: &[T], mut f: impl FnMut(Vec<T>)) {
    fn rec<T: Clone>(items: &[T], used: &mut [bool], out: &mut Vec<T>, f: &mut impl FnMut(Vec<T>)) {
        if out.len() == items.len() {
            f(out.clone());
            return;
        }
        for i in 0..items.len() {
            if used[i] {
                continue;
            }
            used[i] = true;
            out.push(items[i].clone());
            rec(items, used, out, f);
            out.pop();
            used[i] = false;
        }
    }

    let mut used = vec![false; items.len()];
    let mut out = Vec::with_capacity(items.len());
    rec(items, &mut used, &mut out, &mut f);
}

fn pieces_tree(pieces: &[Vec<u8>]) -> IndexedTree {
    let config = small_config();
    let leaves: Vec<LeafNode> = pieces
        .iter()
        .map(|p| {
            let block = PackedSequenceBlock::from_symbols(config.leaf_block_bytes, p).unwrap();
            LeafNode::from_streams(vec![LeafStream::Symbols(block)])
        })
        .collect();
    IndexedTree::from_leaves(vec![StreamKind::Symbols], config, leaves).unwrap()
}

#[test]
fn exhaustive_removal_order_across_leaves() {
    let pieces: Vec<Vec<u8>> = vec![
        vec![0; 40],
        (0..30).map(|i| (i % 2) as u8).collect(),
        vec![1; 25],
        (0..35).map(|i| (i / 3 % 2) as u8).collect(),
        vec![0, 1, 1, 0, 0, 0, 1],
        vec![1; 60],
    ];
    let base = pieces_tree(&pieces);
    validate_tree(&base, 0);
    assert_eq!(base.height(), 3);

    let order: Vec<usize> = (0..pieces.len()).collect();
    for_each_permutation(&order, |perm| {
        let mut t = pieces_tree(&pieces);
        let mut live: Vec<usize> = (0..pieces.len()).collect();
        for piece in perm {
            let idx = live.iter().position(|&p| p == piece).unwrap();
            let start: usize = live[..idx].iter().map(|&p| pieces[p].len()).sum();
            t.remove_symbols(0, start as u64, pieces[piece].len() as u64).unwrap();
            live.remove(idx);

            let expected: Vec<u8> = live.iter().flat_map(|&p| pieces[p].iter().copied()).collect();
            assert_eq!(t.size(0).unwrap(), expected.len() as u64);
            let got: Vec<u8> = t.symbols(0).unwrap().map(|s| s.unwrap()).collect();
            assert_eq!(got, expected);
        }
        validate_tree(&t, 0);
        assert_eq!(t.rank(0, 0, 1).unwrap(), 0);
    });
}
