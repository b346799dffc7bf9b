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

use self::chain::{ChainType, Options, ProcessStatus};
use self::chain_test_helper::*;
use self::core::consensus;
use self::core::core::hash::Hashed;
use self::core::global;
use self::util::init_test_logger;

#[test]
fn genesis_only() {
	init_test_logger();
	global::set_mining_mode(global::ChainTypes::AutomatedTesting);
	let dir = ".nimble_genesis_only";
	clean_output_dir(dir);
	{
		let (chain, gen) = init_chain(dir);

		assert_eq!(chain.get_height(ChainType::Confirmed), 0);
		assert_eq!(chain.get_height(ChainType::Candidate), 0);
		assert_eq!(chain.get_height(ChainType::Sync), 0);
		assert_eq!(chain.head().unwrap().last_block_h, gen.hash());
		assert_eq!(
			chain.get_total_difficulty(ChainType::Confirmed).unwrap(),
			gen.header.total_difficulty()
		);
	}
	clean_output_dir(dir);
}

#[test]
fn mine_empty_chain() {
	init_test_logger();
	global::set_mining_mode(global::ChainTypes::AutomatedTesting);
	let dir = ".nimble_mine_empty";
	clean_output_dir(dir);
	{
		let (chain, gen) = init_chain(dir);
		let (ancestry, _) = mine_some_on_top(&chain, &gen, 4);

		assert_eq!(chain.get_height(ChainType::Confirmed), 4);
		assert_eq!(chain.get_height(ChainType::Candidate), 4);
		assert_eq!(
			chain.head().unwrap().last_block_h,
			ancestry.last().unwrap().hash()
		);

		// every confirmed block has its header, body and sums in the db
		for header in ancestry.iter().skip(1) {
			let from_db = chain.get_block_header(&header.hash()).unwrap();
			assert_eq!(from_db.height, header.height);
			assert!(chain.get_block(&header.hash()).is_ok());
		}

		// duplicate submission changes nothing
		let dup = chain.get_block(&ancestry[2].hash()).unwrap();
		assert_eq!(
			chain.add_block(dup, Options::SKIP_POW),
			ProcessStatus::AlreadyExists
		);
	}
	clean_output_dir(dir);
}

#[test]
fn mine_block_with_spend() {
	init_test_logger();
	global::set_mining_mode(global::ChainTypes::AutomatedTesting);
	let dir = ".nimble_mine_spend";
	clean_output_dir(dir);
	{
		let (chain, gen) = init_chain(dir);

		// mine 4 blocks so the first coinbase matures (maturity is 3 in
		// automated testing mode)
		let (mut ancestry, keys) = mine_some_on_top(&chain, &gen, 4);

		// spend the coinbase of block 1 in block 5
		let fee = 2 * consensus::MILLI_NIM;
		let recipient = random_key();
		let tx = build_spending_tx(consensus::reward(0), &keys[0], fee, &recipient);
		assert!(tx.validate().is_ok());

		let b = prepare_block(&chain, &ancestry, 20, vec![tx]);
		let header = b.header.clone();
		let (tip, status) = chain.process_block(b, Options::SKIP_POW).unwrap();
		assert_eq!(status, ProcessStatus::Success);
		assert_eq!(tip.unwrap().height, 5);
		ancestry.push(header);

		// the new output is indexed under the block that introduced it
		let secp = util::static_secp_instance();
		let out_commit = {
			let secp = secp.lock();
			secp.commit(consensus::reward(0) - fee, recipient.clone())
				.unwrap()
		};
		let introduced_in = chain.get_header_for_output(&out_commit).unwrap();
		assert_eq!(introduced_in.height, 5);

		// roots at the tip reflect the spend
		let roots = chain.get_txhashset_roots();
		assert_eq!(roots.output_root, ancestry.last().unwrap().output_root);
	}
	clean_output_dir(dir);
}

#[test]
fn spend_rejected_before_maturity() {
	init_test_logger();
	global::set_mining_mode(global::ChainTypes::AutomatedTesting);
	let dir = ".nimble_immature_spend";
	clean_output_dir(dir);
	{
		let (chain, gen) = init_chain(dir);
		let (ancestry, keys) = mine_some_on_top(&chain, &gen, 2);

		// coinbase from block 1 is not mature at height 3
		let tx = build_spending_tx(
			consensus::reward(0),
			&keys[0],
			consensus::MILLI_NIM,
			&random_key(),
		);
		let b = prepare_block(&chain, &ancestry, 20, vec![tx]);
		assert_eq!(
			chain.add_block(b, Options::SKIP_POW),
			ProcessStatus::Invalid
		);
		assert_eq!(chain.get_height(ChainType::Confirmed), 2);
	}
	clean_output_dir(dir);
}

#[test]
fn mine_forks_and_reorg() {
	init_test_logger();
	global::set_mining_mode(global::ChainTypes::AutomatedTesting);
	let dir = ".nimble_mine_forks";
	clean_output_dir(dir);
	{
		let (chain, gen) = init_chain(dir);

		// the "a" chain: 4 blocks
		let (ancestry_a, _) = mine_some_on_top(&chain, &gen, 4);
		let a_tip = chain.head().unwrap();
		assert_eq!(a_tip.height, 4);

		// build a competing fork from height 2, with more cumulative work
		// only once the last block lands. the intermediate fork blocks are
		// orphaned until the final one tips the scales.
		let fork_ancestor = ancestry_a[2].clone();
		let mut ancestry_b = ancestry_a[..3].to_vec();
		let fork_diffs = [5u64, 6, 40];
		let mut fork_blocks: Vec<core::core::Block> = vec![];
		let mut statuses = vec![];
		for diff in fork_diffs.iter() {
			let b = prepare_fork_block(
				&chain,
				&ancestry_b,
				&fork_ancestor,
				&fork_blocks,
				*diff,
				vec![],
			);
			ancestry_b.push(b.header.clone());
			fork_blocks.push(b.clone());
			statuses.push(chain.add_block(b, Options::SKIP_POW));
		}

		// first two fork blocks could not displace the tip
		assert_eq!(statuses[0], ProcessStatus::Orphaned);
		assert_eq!(statuses[1], ProcessStatus::Orphaned);
		// the last one rewired everything
		assert_eq!(statuses[2], ProcessStatus::Success);

		let new_tip = chain.head().unwrap();
		assert_eq!(new_tip.height, 5);
		assert_eq!(new_tip.last_block_h, ancestry_b.last().unwrap().hash());

		// the confirmed chain now follows the fork
		for (height, header) in ancestry_b.iter().enumerate().skip(1) {
			let on_chain = chain
				.get_header_by_height(height as u64, ChainType::Confirmed)
				.unwrap();
			assert_eq!(on_chain.hash(), header.hash());
		}

		// txhashset roots match the new tip header
		let roots = chain.get_txhashset_roots();
		let tip_header = chain.head_header().unwrap();
		assert_eq!(roots.output_root, tip_header.output_root);
		assert_eq!(roots.rproof_root, tip_header.range_proof_root);
		assert_eq!(roots.kernel_root, tip_header.kernel_root);

		// the blocks mined on the "a" side beyond the fork point are no
		// longer reachable by height
		let a_block_3 = chain
			.get_header_by_height(3, ChainType::Confirmed)
			.unwrap();
		assert_ne!(a_block_3.hash(), ancestry_a[3].hash());
	}
	clean_output_dir(dir);
}

#[test]
fn reorg_cleans_output_index() {
	init_test_logger();
	global::set_mining_mode(global::ChainTypes::AutomatedTesting);
	let dir = ".nimble_reorg_index";
	clean_output_dir(dir);
	{
		let (chain, gen) = init_chain(dir);
		let (mut ancestry, keys) = mine_some_on_top(&chain, &gen, 4);

		// block 5a spends the first coinbase into a fresh output
		let recipient = random_key();
		let fee = consensus::MILLI_NIM;
		let tx = build_spending_tx(consensus::reward(0), &keys[0], fee, &recipient);
		let b5a = prepare_block(&chain, &ancestry, 20, vec![tx]);
		let b5a_header = b5a.header.clone();
		assert_eq!(
			chain.add_block(b5a, Options::SKIP_POW),
			ProcessStatus::Success
		);

		let spent_commit = {
			let secp = util::static_secp_instance();
			let secp = secp.lock();
			secp.commit(consensus::reward(0) - fee, recipient.clone())
				.unwrap()
		};
		assert!(chain.get_header_for_output(&spent_commit).is_ok());

		// now a heavier fork without the spend reorgs 5a away. the first
		// fork block alone has less work than the spent tip so it waits in
		// the orphan pool.
		let fork_ancestor = ancestry.last().unwrap().clone();
		let b5b = prepare_fork_block(&chain, &ancestry, &fork_ancestor, &[], 5, vec![]);
		ancestry.push(b5b.header.clone());
		let b6b = prepare_fork_block(
			&chain,
			&ancestry,
			&fork_ancestor,
			&[b5b.clone()],
			30,
			vec![],
		);

		assert_eq!(
			chain.add_block(b5b, Options::SKIP_POW),
			ProcessStatus::Orphaned
		);
		assert_eq!(
			chain.add_block(b6b, Options::SKIP_POW),
			ProcessStatus::Success
		);

		assert_eq!(chain.head().unwrap().height, 6);
		assert_ne!(
			chain
				.get_header_by_height(5, ChainType::Confirmed)
				.unwrap()
				.hash(),
			b5a_header.hash()
		);

		// every commitment introduced only on the losing branch lost its
		// position index entry, the re-orged coinbase kept its own
		assert!(chain.get_header_for_output(&spent_commit).is_err());
	}
	clean_output_dir(dir);
}
