// Copyright 2019 The Nimble Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use nimble_store as store;

use crate::store::prune_list::PruneList;

#[test]
fn test_is_pruned() {
	let mut pl = PruneList::new();

	assert_eq!(pl.len(), 0);
	assert_eq!(pl.is_pruned(1), false);
	assert_eq!(pl.is_pruned(2), false);
	assert_eq!(pl.is_pruned(3), false);

	pl.add(2);
	pl.flush().unwrap();

	assert_eq!(pl.to_vec(), vec![2]);
	assert_eq!(pl.is_pruned(1), false);
	assert_eq!(pl.is_pruned(2), true);
	assert_eq!(pl.is_pruned(3), false);

	// Pruning the sibling leaf rolls both up into their parent.
	pl.add(2);
	pl.add(1);
	pl.flush().unwrap();

	assert_eq!(pl.len(), 1);
	assert_eq!(pl.to_vec(), [3]);
	assert_eq!(pl.is_pruned(1), true);
	assert_eq!(pl.is_pruned(2), true);
	assert_eq!(pl.is_pruned(3), true);
	assert_eq!(pl.is_pruned_root(3), true);
	assert_eq!(pl.is_pruned(4), false);

	// The invariant: every pruned root is pruned, every child of a pruned
	// node is pruned.
	pl.add(4);
	pl.flush().unwrap();

	assert_eq!(pl.len(), 2);
	assert_eq!(pl.to_vec(), [3, 4]);
	for pos in pl.to_vec() {
		assert!(pl.is_pruned(pos));
		assert!(pl.is_pruned_root(pos));
	}
	assert_eq!(pl.is_pruned(5), false);
}

#[test]
fn test_get_shift() {
	let mut pl = PruneList::new();
	assert!(pl.is_empty());
	assert_eq!(pl.get_shift(1), 0);

	// Pruning a single leaf shifts nothing, the leaf remains a root in the
	// prune list and keeps its hash-file slot.
	pl.add(1);
	pl.flush().unwrap();

	assert_eq!(pl.get_shift(1), 0);
	assert_eq!(pl.get_shift(2), 0);
	assert_eq!(pl.get_shift(3), 0);

	// Pruning both siblings prunes the parent at 3, and the two leaves
	// beneath it are compacted away: shift of 2 for everything at and after
	// the root.
	pl.add(1);
	pl.add(2);
	pl.flush().unwrap();

	assert_eq!(pl.to_vec(), [3]);
	assert_eq!(pl.get_shift(1), 0);
	assert_eq!(pl.get_shift(2), 0);
	assert_eq!(pl.get_shift(3), 2);
	assert_eq!(pl.get_shift(4), 2);
	assert_eq!(pl.get_total_shift(), 2);

	// Pruning leaves 4 and 5 rolls everything up into the height 2 root at
	// pos 7. Two height-1 subtrees of shift 2 each merge into a root
	// shifting 2 * (2^2 - 1) = 6.
	pl.add(4);
	pl.add(5);
	pl.flush().unwrap();

	assert_eq!(pl.to_vec(), [7]);
	assert_eq!(pl.get_shift(6), 0);
	assert_eq!(pl.get_shift(7), 6);
	assert_eq!(pl.get_shift(8), 6);
	assert_eq!(pl.get_total_shift(), 6);
	assert_eq!(pl.get_leaf_shift(7), 4);
	assert_eq!(pl.get_total_leaf_shift(), 4);
}

#[test]
fn test_get_leaf_shift() {
	let mut pl = PruneList::new();

	// start with an empty prune list (nothing shifted)
	assert_eq!(pl.len(), 0);
	assert_eq!(pl.get_leaf_shift(1), 0);
	assert_eq!(pl.get_leaf_shift(4), 0);

	// now add a single leaf pos to the prune list
	// leaves will not shift anything
	// we only start shifting after pruning a parent
	pl.add(1);
	pl.flush().unwrap();

	assert_eq!(pl.to_vec(), vec![1]);
	assert_eq!(pl.get_leaf_shift(1), 0);
	assert_eq!(pl.get_leaf_shift(2), 0);

	// now add the sibling leaf pos (pos 1 and pos 2) which will prune the
	// parent at pos 3, this in turn will "leaf shift" everything from the
	// root onward by 2
	pl.add(2);
	pl.flush().unwrap();

	assert_eq!(pl.len(), 1);
	assert_eq!(pl.get_leaf_shift(1), 0);
	assert_eq!(pl.get_leaf_shift(2), 0);
	assert_eq!(pl.get_leaf_shift(3), 2);
	assert_eq!(pl.get_leaf_shift(4), 2);
	assert_eq!(pl.get_leaf_shift(5), 2);

	// now prune an additional leaf at pos 4
	// leaf offset of subsequent pos will be 2
	pl.add(4);
	pl.flush().unwrap();

	assert_eq!(pl.len(), 2);
	assert_eq!(pl.to_vec(), [3, 4]);
	assert_eq!(pl.get_leaf_shift(4), 2);
	assert_eq!(pl.get_leaf_shift(8), 2);

	// now prune the sibling at pos 5
	// the two smaller subtrees (pos 3 and pos 6) are rolled up to larger
	// subtree (pos 7), the leaf offset is now 4 to cover the entire subtree
	// containing the first 4 leaves
	pl.add(5);
	pl.flush().unwrap();

	assert_eq!(pl.len(), 1);
	assert_eq!(pl.to_vec(), [7]);
	assert_eq!(pl.get_leaf_shift(6), 0);
	assert_eq!(pl.get_leaf_shift(7), 4);
	assert_eq!(pl.get_leaf_shift(9), 4);

	// now check we can prune some unconnected nodes in arbitrary order
	// and that leaf_shift is correct for various pos
	let mut pl = PruneList::new();
	pl.add(5);
	pl.add(11);
	pl.add(12);
	pl.add(4);
	pl.flush().unwrap();

	assert_eq!(pl.len(), 2);
	assert_eq!(pl.to_vec(), [6, 13]);
	assert_eq!(pl.get_leaf_shift(2), 0);
	assert_eq!(pl.get_leaf_shift(4), 0);
	assert_eq!(pl.get_leaf_shift(8), 2);
	assert_eq!(pl.get_leaf_shift(13), 4);
	assert_eq!(pl.get_leaf_shift(14), 4);
}
