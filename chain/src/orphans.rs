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

//! Bounded pools of blocks and headers waiting for a missing parent.

use std::collections::{BTreeMap, HashMap};

use lru_cache::LruCache;

use crate::core::core::hash::{Hash, Hashed};
use crate::core::core::{Block, BlockHeader};
use crate::types::Options;
use crate::util::RwLock;

/// Maximum number of orphan blocks kept around. Blocks are full bodies, this
/// bounds memory held hostage by a peer feeding us disconnected blocks.
pub const MAX_ORPHAN_BLOCKS: usize = 100;

/// Maximum number of orphan headers kept around.
pub const MAX_ORPHAN_HEADERS: usize = 64;

/// A block stashed away until its parent shows up, with the options it was
/// originally submitted under.
#[derive(Debug, Clone)]
pub struct Orphan {
	/// The orphaned block.
	pub block: Block,
	/// Processing options from the original submission.
	pub opts: Options,
}

/// Pool of blocks we cannot process yet, indexed by hash with a secondary
/// height index so fork walks can look blocks up by (height, hash).
pub struct OrphanBlockPool {
	// blocks indexed by their hash
	orphans: RwLock<HashMap<Hash, Orphan>>,
	// additional index of height -> hashes
	// so we can efficiently look up orphans by height or evict the furthest
	height_idx: RwLock<BTreeMap<u64, Vec<Hash>>>,
}

impl OrphanBlockPool {
	/// Create a new empty pool.
	pub fn new() -> OrphanBlockPool {
		OrphanBlockPool {
			orphans: RwLock::new(HashMap::new()),
			height_idx: RwLock::new(BTreeMap::new()),
		}
	}

	/// Number of orphans in the pool.
	pub fn len(&self) -> usize {
		self.orphans.read().len()
	}

	/// Add an orphan to the pool. Evicts the orphan at the greatest height
	/// when full, the one least likely to connect soon.
	pub fn add(&self, orphan: Orphan) {
		let hash = orphan.block.hash();
		let height = orphan.block.header.height;
		{
			let mut orphans = self.orphans.write();
			let mut height_idx = self.height_idx.write();
			if orphans.insert(hash, orphan).is_none() {
				height_idx.entry(height).or_insert_with(Vec::new).push(hash);
			}
		}

		if self.len() > MAX_ORPHAN_BLOCKS {
			let evict = {
				let height_idx = self.height_idx.read();
				height_idx
					.iter()
					.next_back()
					.and_then(|(_, hashes)| hashes.first().cloned())
			};
			if let Some(hash) = evict {
				self.remove(&hash);
			}
		}
	}

	/// Remove the orphan with the given hash from the pool, returning it.
	pub fn remove(&self, hash: &Hash) -> Option<Orphan> {
		let mut orphans = self.orphans.write();
		let mut height_idx = self.height_idx.write();
		let orphan = orphans.remove(hash)?;
		let height = orphan.block.header.height;
		if let Some(hashes) = height_idx.get_mut(&height) {
			hashes.retain(|x| x != hash);
			if hashes.is_empty() {
				height_idx.remove(&height);
			}
		}
		Some(orphan)
	}

	/// Does the pool contain a block with the given hash?
	pub fn contains(&self, hash: &Hash) -> bool {
		self.orphans.read().contains_key(hash)
	}

	/// Get a clone of the orphan block with the given hash.
	pub fn get(&self, hash: &Hash) -> Option<Block> {
		self.orphans.read().get(hash).map(|x| x.block.clone())
	}

	/// All orphans whose parent is the given block hash, candidates for
	/// processing once that block is accepted.
	pub fn get_by_previous(&self, hash: &Hash) -> Vec<Orphan> {
		self.orphans
			.read()
			.values()
			.filter(|x| x.block.header.prev_hash == *hash)
			.cloned()
			.collect()
	}
}

impl Default for OrphanBlockPool {
	fn default() -> OrphanBlockPool {
		OrphanBlockPool::new()
	}
}

/// LRU cache of headers whose parent we have not seen yet. Bounded small,
/// headers are cheap to re-request.
pub struct OrphanHeaderCache {
	headers: RwLock<LruCache<Hash, BlockHeader>>,
}

impl OrphanHeaderCache {
	/// Create a new cache with the default capacity.
	pub fn new() -> OrphanHeaderCache {
		OrphanHeaderCache {
			headers: RwLock::new(LruCache::new(MAX_ORPHAN_HEADERS)),
		}
	}

	/// Stash an orphan header.
	pub fn add(&self, header: &BlockHeader) {
		let mut headers = self.headers.write();
		headers.insert(header.hash(), header.clone());
	}

	/// Get a clone of the orphan header with the given hash.
	pub fn get(&self, hash: &Hash) -> Option<BlockHeader> {
		let mut headers = self.headers.write();
		headers.get_mut(hash).cloned()
	}

	/// Does the cache contain a header with the given hash?
	pub fn contains(&self, hash: &Hash) -> bool {
		let mut headers = self.headers.write();
		headers.get_mut(hash).is_some()
	}
}

impl Default for OrphanHeaderCache {
	fn default() -> OrphanHeaderCache {
		OrphanHeaderCache::new()
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::core::core::BlockHeader;
	use crate::core::global;
	use crate::core::pow::Proof;

	// Note: the header hash is derived from the pow proof, so test blocks
	// need distinct proofs to get distinct hashes.
	fn block_at(height: u64) -> Block {
		let mut header = BlockHeader::default();
		header.height = height;
		header.pow.proof = Proof::random(global::proofsize());
		Block::with_header(header)
	}

	#[test]
	fn add_remove_evict() {
		global::set_mining_mode(global::ChainTypes::AutomatedTesting);
		let pool = OrphanBlockPool::new();
		for i in 0..MAX_ORPHAN_BLOCKS as u64 {
			pool.add(Orphan {
				block: block_at(i),
				opts: Options::NONE,
			});
		}
		assert_eq!(pool.len(), MAX_ORPHAN_BLOCKS);

		// adding one more evicts the orphan with the greatest height
		let far_block = block_at(1_000_000);
		let far_hash = far_block.hash();
		pool.add(Orphan {
			block: far_block,
			opts: Options::NONE,
		});
		assert_eq!(pool.len(), MAX_ORPHAN_BLOCKS);
		assert!(!pool.contains(&far_hash));

		// re-adding a known block does not grow the pool
		let b = block_at(1);
		pool.add(Orphan {
			block: b.clone(),
			opts: Options::NONE,
		});
		pool.add(Orphan {
			block: b.clone(),
			opts: Options::NONE,
		});
		assert!(pool.len() <= MAX_ORPHAN_BLOCKS + 1);

		let removed = pool.remove(&b.hash()).unwrap();
		assert_eq!(removed.block.hash(), b.hash());
		assert!(!pool.contains(&b.hash()));
	}
}
