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

mod chain_test_helper;

use nimble_chain as chain;
use nimble_core as core;
use nimble_util as util;

use chrono::Duration;

use self::chain::{ChainType, Options, ProcessStatus};
use self::chain_test_helper::*;
use self::core::consensus;
use self::core::core::hash::Hashed;
use self::core::core::{Block, BlockHeader};
use self::core::global;
use self::core::pow::Difficulty;
use self::util::init_test_logger;

// Build a bare header chain (no bodies) of the given per-header difficulty
// increments on top of the provided ancestry.
fn build_headers(ancestry: &mut Vec<BlockHeader>, diffs: &[u64]) -> Vec<BlockHeader> {
	let mut new_headers = vec![];
	for diff in diffs {
		let prev = ancestry.last().unwrap().clone();
		let mut header = BlockHeader::default();
		header.height = prev.height + 1;
		header.prev_hash = prev.hash();
		header.prev_root = header_root(ancestry);
		header.timestamp =
			prev.timestamp + Duration::seconds(consensus::BLOCK_TIME_SEC as i64);
		header.pow.proof = core::pow::Proof::random(global::proofsize());
		header.pow.total_difficulty =
			prev.pow.total_difficulty + Difficulty::from_num(*diff);
		// empty chain state carried over, no bodies involved
		header.output_mmr_size = prev.output_mmr_size;
		header.kernel_mmr_size = prev.kernel_mmr_size;
		header.output_root = prev.output_root;
		header.range_proof_root = prev.range_proof_root;
		header.kernel_root = prev.kernel_root;

		ancestry.push(header.clone());
		new_headers.push(header);
	}
	new_headers
}

#[test]
fn sync_header_batches_and_fork() {
	init_test_logger();
	global::set_mining_mode(global::ChainTypes::AutomatedTesting);
	let dir = ".nimble_sync_headers";
	clean_output_dir(dir);
	{
		let (chain, gen) = init_chain(dir);

		// 64 headers on branch a
		let mut ancestry_a = vec![gen.header.clone()];
		let headers_a = build_headers(&mut ancestry_a, &vec![10; 64]);

		let status = chain
			.sync_block_headers(&headers_a, Options::SKIP_POW)
			.unwrap();
		assert_eq!(status, ProcessStatus::Success);
		assert_eq!(chain.get_height(ChainType::Candidate), 64);
		assert_eq!(chain.get_height(ChainType::Sync), 64);
		// no block bodies, confirmed stays at genesis
		assert_eq!(chain.get_height(ChainType::Confirmed), 0);

		// re-sending the same batch changes nothing
		let status = chain
			.sync_block_headers(&headers_a, Options::SKIP_POW)
			.unwrap();
		assert_eq!(status, ProcessStatus::AlreadyExists);

		// 64 headers on branch b, forking at height 32, with strictly more
		// cumulative work
		let mut ancestry_b = ancestry_a[..33].to_vec();
		let headers_b = build_headers(&mut ancestry_b, &vec![25; 32]);

		let status = chain
			.sync_block_headers(&headers_b, Options::SKIP_POW)
			.unwrap();
		assert_eq!(status, ProcessStatus::Success);

		// candidate follows the heavier fork
		assert_eq!(chain.get_height(ChainType::Candidate), 64);
		assert_eq!(
			chain.header_head().unwrap().last_block_h,
			ancestry_b.last().unwrap().hash()
		);

		// the chains agree up to the fork point and disagree above it
		let common = chain
			.get_header_by_height(32, ChainType::Candidate)
			.unwrap();
		assert_eq!(common.hash(), ancestry_a[32].hash());
		let above = chain
			.get_header_by_height(33, ChainType::Candidate)
			.unwrap();
		assert_ne!(above.hash(), ancestry_a[33].hash());

		// a weaker fork does not displace the candidate chain
		let mut ancestry_c = ancestry_a[..17].to_vec();
		let headers_c = build_headers(&mut ancestry_c, &vec![1; 4]);
		let status = chain
			.sync_block_headers(&headers_c, Options::SKIP_POW)
			.unwrap();
		assert_eq!(status, ProcessStatus::Success);
		assert_eq!(
			chain.header_head().unwrap().last_block_h,
			ancestry_b.last().unwrap().hash()
		);
		// and the sync chain is back on the candidate chain
		assert_eq!(chain.get_height(ChainType::Sync), 64);
	}
	clean_output_dir(dir);
}

#[test]
fn headers_not_connecting_return_unknown() {
	init_test_logger();
	global::set_mining_mode(global::ChainTypes::AutomatedTesting);
	let dir = ".nimble_sync_disconnected";
	clean_output_dir(dir);
	{
		let (chain, gen) = init_chain(dir);

		let mut ancestry = vec![gen.header.clone()];
		let headers = build_headers(&mut ancestry, &vec![10; 8]);

		// drop the first few headers, the rest cannot connect yet
		let status = chain
			.sync_block_headers(&headers[4..], Options::SKIP_POW)
			.unwrap();
		assert_eq!(status, ProcessStatus::UnknownError);
		assert_eq!(chain.get_height(ChainType::Candidate), 0);
	}
	clean_output_dir(dir);
}

#[test]
fn block_beyond_horizon_rejected() {
	init_test_logger();
	global::set_mining_mode(global::ChainTypes::AutomatedTesting);
	let dir = ".nimble_horizon";
	clean_output_dir(dir);
	{
		let (chain, gen) = init_chain(dir);

		// push the candidate chain past the testing horizon (70) with bare
		// headers
		let depth = global::cut_through_horizon() as u64 + 10;
		let mut ancestry = vec![gen.header.clone()];
		let headers = build_headers(&mut ancestry, &vec![10; depth as usize]);
		let status = chain
			.sync_block_headers(&headers, Options::SKIP_POW)
			.unwrap();
		assert_eq!(status, ProcessStatus::Success);

		// a block body beneath the horizon is refused outright, before any
		// state is touched
		let horizon_height =
			chain.get_height(ChainType::Candidate) - global::cut_through_horizon() as u64;
		let old_header = ancestry[(horizon_height - 1) as usize].clone();
		let old_block = Block::with_header(old_header);
		assert_eq!(
			chain.add_block(old_block, Options::SKIP_POW),
			ProcessStatus::Invalid
		);
		assert_eq!(chain.get_height(ChainType::Confirmed), 0);
	}
	clean_output_dir(dir);
}
