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

//! Minimal transaction pool. Holds validated transactions so compact blocks
//! can be hydrated from kernel short ids, and reconciles itself against
//! accepted blocks. Fee policies, eviction and stem routing live with the
//! network layer.

use std::collections::HashSet;

use crate::core::core::hash::{Hash, Hashed};
use crate::core::core::id::{ShortId, ShortIdentifiable};
use crate::core::core::{Block, Transaction};
use crate::util::RwLock;

/// Which pool a transaction is submitted to. Stem transactions are
/// Dandelion-routed before they fluff into the regular pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolType {
	/// The regular transaction pool.
	Txpool,
	/// The stem pool.
	Stempool,
}

/// The pool itself, a flat list of transactions with kernel-based lookup.
pub struct TransactionPool {
	txs: RwLock<Vec<Transaction>>,
}

impl TransactionPool {
	/// Create a new empty pool.
	pub fn new() -> TransactionPool {
		TransactionPool {
			txs: RwLock::new(vec![]),
		}
	}

	/// Number of transactions in the pool.
	pub fn len(&self) -> usize {
		self.txs.read().len()
	}

	/// Add a transaction to the pool. The caller is responsible for having
	/// validated it. Duplicate kernels are rejected silently.
	pub fn add(&self, tx: Transaction, _pool_type: PoolType) {
		let mut txs = self.txs.write();
		let known: HashSet<Hash> = txs
			.iter()
			.flat_map(|t| t.kernels().iter().map(|k| k.hash()))
			.collect();
		if tx.kernels().iter().any(|k| known.contains(&k.hash())) {
			return;
		}
		txs.push(tx);
	}

	/// Query the tx pool for all known txs based on kernel short_ids from
	/// the provided compact block.
	/// Note: does not validate that we return the full set of required txs.
	/// The caller will need to validate that themselves.
	pub fn retrieve_transactions(
		&self,
		hash: Hash,
		nonce: u64,
		kern_ids: &[ShortId],
	) -> (Vec<Transaction>, Vec<ShortId>) {
		let txs = self.txs.read();

		let mut found_txs = vec![];
		let mut found_ids = HashSet::new();

		for tx in txs.iter() {
			for kernel in tx.kernels() {
				// rehash each kernel to compare against the kern_ids
				let short_id = kernel.short_id(&hash, nonce);
				if kern_ids.contains(&short_id) && !found_ids.contains(&short_id) {
					found_ids.insert(short_id.clone());
					found_txs.push(tx.clone());
					break;
				}
			}
		}

		let missing_ids = kern_ids
			.iter()
			.filter(|id| !found_ids.contains(id))
			.cloned()
			.collect();

		(found_txs, missing_ids)
	}

	/// Remove from the pool any transaction with a kernel now included in
	/// the given confirmed block.
	pub fn reconcile_block(&self, block: &Block) {
		let block_kernels: HashSet<Hash> =
			block.kernels().iter().map(|k| k.hash()).collect();
		let mut txs = self.txs.write();
		txs.retain(|tx| {
			!tx.kernels()
				.iter()
				.any(|k| block_kernels.contains(&k.hash()))
		});
	}
}

impl Default for TransactionPool {
	fn default() -> TransactionPool {
		TransactionPool::new()
	}
}
