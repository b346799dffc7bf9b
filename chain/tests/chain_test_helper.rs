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

//! Common test helpers for the chain integration tests: building valid
//! blocks with real coinbase outputs, header MMR roots and simple spending
//! transactions.

use nimble_chain as chain;
use nimble_core as core;
use nimble_util as util;

use chrono::Duration;
use rand::thread_rng;

use self::chain::{Chain, Options};
use self::core::core::hash::Hashed;
use self::core::core::pmmr::{VecBackend, PMMR};
use self::core::core::{
	Block, BlockHeader, Input, KernelFeatures, Output, OutputFeatures, Transaction, TxKernel,
};
use self::core::libtx::{aggsig, kernel_sig_msg, proof, reward};
use self::core::pow::Difficulty;
use self::core::{consensus, genesis};
use self::util::secp::key::SecretKey;
use self::util::secp::Message;
use self::util::static_secp_instance;

/// The secret key blinding an output in the test chain.
pub fn random_key() -> SecretKey {
	let secp = static_secp_instance();
	let secp = secp.lock();
	SecretKey::new(&secp, &mut thread_rng())
}

/// Compute the header MMR root over the given ancestry, which is what the
/// next header's prev_root must commit to.
pub fn header_root(headers: &[BlockHeader]) -> core::core::hash::Hash {
	let mut backend = VecBackend::<BlockHeader>::new();
	let mut pmmr = PMMR::new(&mut backend);
	for header in headers {
		pmmr.push(header).unwrap();
	}
	pmmr.root()
}

/// Initialize a chain in the given directory with a dev genesis block.
pub fn init_chain(dir: &str) -> (Chain, Block) {
	let gen = genesis::genesis_dev();
	let chain = Chain::init(
		dir.to_string(),
		gen.clone(),
		core::pow::verify_size,
	)
	.unwrap();
	(chain, gen)
}

/// Build a block on the provided ancestry (genesis first, parent last) with
/// the given transactions and difficulty increment, coinbase blinded with
/// the provided key. The txhashset roots are computed by the chain itself,
/// assuming the parent is the current confirmed tip.
pub fn prepare_block_with_key(
	chain: &Chain,
	ancestry: &[BlockHeader],
	diff: u64,
	txs: Vec<Transaction>,
	key: &SecretKey,
) -> Block {
	let mut b = build_block_skeleton(ancestry, diff, txs, key);
	chain.set_txhashset_roots(&mut b).unwrap();
	b
}

/// As above with a throwaway coinbase key.
pub fn prepare_block(
	chain: &Chain,
	ancestry: &[BlockHeader],
	diff: u64,
	txs: Vec<Transaction>,
) -> Block {
	prepare_block_with_key(chain, ancestry, diff, txs, &random_key())
}

/// Build a block extending a fork: the txhashset state is reconstructed by
/// rewinding to the fork ancestor (on the confirmed chain) and re-applying
/// the earlier fork blocks.
pub fn prepare_fork_block(
	chain: &Chain,
	ancestry: &[BlockHeader],
	fork_ancestor: &BlockHeader,
	fork_blocks: &[Block],
	diff: u64,
	txs: Vec<Transaction>,
) -> Block {
	let mut b = build_block_skeleton(ancestry, diff, txs, &random_key());
	chain
		.set_txhashset_roots_forked(&mut b, fork_ancestor, fork_blocks)
		.unwrap();
	b
}

// Shared skeleton: everything except the txhashset roots and sizes.
fn build_block_skeleton(
	ancestry: &[BlockHeader],
	diff: u64,
	txs: Vec<Transaction>,
	key: &SecretKey,
) -> Block {
	let prev = ancestry.last().expect("ancestry includes parent");

	let fees: u64 = txs.iter().map(|tx| tx.fee()).sum();
	let reward_out = reward::output(key, fees).unwrap();
	let mut b = Block::new(prev, txs, Difficulty::from_num(diff), reward_out).unwrap();

	// deterministic, strictly monotonic timestamps
	b.header.timestamp = prev.timestamp + Duration::seconds(consensus::BLOCK_TIME_SEC as i64);
	b.header.prev_root = header_root(ancestry);
	b
}

/// Mine n empty blocks onto the chain, returning the headers and the
/// coinbase keys (indexed per block).
pub fn mine_some_on_top(
	chain: &Chain,
	gen: &Block,
	n: u64,
) -> (Vec<BlockHeader>, Vec<SecretKey>) {
	let mut ancestry = vec![gen.header.clone()];
	let mut keys = vec![];

	for i in 0..n {
		let key = random_key();
		let b = prepare_block_with_key(chain, &ancestry, 10 + i, vec![], &key);
		let header = b.header.clone();
		let (tip, status) = chain.process_block(b, Options::SKIP_POW).unwrap();
		assert_eq!(status, chain::ProcessStatus::Success);
		assert!(tip.is_some());
		ancestry.push(header);
		keys.push(key);
	}
	(ancestry, keys)
}

/// Build a transaction spending a single (coinbase) output of the given
/// value, producing one output of value minus fee, summing the blinding
/// factors directly through secp.
pub fn build_spending_tx(
	spent_value: u64,
	spent_key: &SecretKey,
	fee: u64,
	recipient_key: &SecretKey,
) -> Transaction {
	let secp = static_secp_instance();
	let secp = secp.lock();

	let out_value = spent_value - fee;

	let input_commit = secp.commit(spent_value, spent_key.clone()).unwrap();
	let output_commit = secp.commit(out_value, recipient_key.clone()).unwrap();
	let output_proof = proof::create(&secp, out_value, recipient_key, None).unwrap();

	// kernel excess commits to the sum of output blinding minus input
	// blinding, the values cancel against the fee
	let excess_key = secp
		.blind_sum(vec![recipient_key.clone()], vec![spent_key.clone()])
		.unwrap();
	let excess = secp.commit(0, excess_key.clone()).unwrap();

	let msg = Message::from_slice(&kernel_sig_msg(fee, 0)).unwrap();
	let excess_sig = aggsig::sign_from_key_id(&secp, &msg, &excess_key).unwrap();

	let kernel = TxKernel {
		features: KernelFeatures::DEFAULT_KERNEL,
		fee,
		lock_height: 0,
		excess,
		excess_sig,
	};

	let input = Input::new(OutputFeatures::COINBASE_OUTPUT, input_commit);
	let output = Output {
		features: OutputFeatures::DEFAULT_OUTPUT,
		commit: output_commit,
		proof: output_proof,
	};

	Transaction::new(vec![input], vec![output], vec![kernel])
}

/// Remove a test chain data directory, ignoring errors.
pub fn clean_output_dir(dir: &str) {
	let _ = std::fs::remove_dir_all(dir);
}
