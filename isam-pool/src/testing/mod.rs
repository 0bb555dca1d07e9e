//! Helpers shared by unit tests.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::key::KeyPool;
use crate::tree::TreePool;
use crate::types::{Handle, KeyId, KeyNumber, RowNumber, TreeId};

/// Install a fmt subscriber filtered by `RUST_LOG` (default `warn`). Safe
/// to call from every test; only the first call installs it.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "isam_pool=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

/// Acquire a node and chain `count` fresh keys into it, in order.
///
/// A node with no keys is left unbound.
pub fn grow(
    trees: &mut TreePool,
    keys: &mut KeyPool,
    index: (Handle, KeyNumber),
    count: usize,
) -> TreeId {
    let (tree, _) = trees.acquire(index.0).expect("acquire tree");
    let mut previous: Option<KeyId> = None;
    for row in 0..count {
        let (key_id, _) = keys.acquire(index.0, index.1).expect("acquire key");
        {
            let key = keys.get_mut(key_id).expect("live key");
            key.row_number = RowNumber(row as u64);
            key.node = Some(tree);
            key.prev = previous;
        }
        if let Some(previous) = previous {
            keys.get_mut(previous).expect("live key").next = Some(key_id);
        }
        let node = trees.get_mut(tree).expect("live tree");
        if node.first.is_none() {
            node.first = Some(key_id);
        }
        node.last = Some(key_id);
        node.key_count += 1;
        node.binding = Some(index);
        previous = Some(key_id);
    }
    tree
}

/// Make `child` the subtree owned by `owner`.
pub fn adopt(trees: &mut TreePool, keys: &mut KeyPool, owner: KeyId, child: TreeId) {
    let key = keys.get_mut(owner).expect("live key");
    key.child = Some(child);
    let parent = key.node;
    let node = trees.get_mut(child).expect("live tree");
    node.owner = Some(owner);
    node.parent = parent;
}

/// The keys chained under `tree`, front to back.
pub fn chain_of(trees: &TreePool, keys: &KeyPool, tree: TreeId) -> Vec<KeyId> {
    let mut chain = Vec::new();
    let mut cursor = trees.get(tree).expect("live tree").first();
    while let Some(key_id) = cursor {
        chain.push(key_id);
        cursor = keys.get(key_id).expect("live key").next();
    }
    chain
}
