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

use std::io::{Read, Write};

use nimble_chain as chain;
use nimble_core as core;
use nimble_util as util;

use self::chain::{ChainType, NoStatus, Options, ProcessStatus};
use self::chain_test_helper::*;
use self::core::consensus;
use self::core::core::hash::Hashed;
use self::core::global;
use self::util::init_test_logger;

// Full fast-sync round trip: one node mines a chain with real spends, a
// second node receives the headers plus a snapshot archive and ends up at
// the same confirmed state.
#[test]
fn txhashset_archive_roundtrip() {
	init_test_logger();
	global::set_mining_mode(global::ChainTypes::AutomatedTesting);
	let source_dir = ".nimble_archive_source";
	let target_dir = ".nimble_archive_target";
	clean_output_dir(source_dir);
	clean_output_dir(target_dir);
	{
		let (source, gen) = init_chain(source_dir);

		// a few empty blocks, then one spending the first coinbase
		let (mut ancestry, keys) = mine_some_on_top(&source, &gen, 5);
		let tx = build_spending_tx(
			consensus::reward(0),
			&keys[0],
			consensus::MILLI_NIM,
			&random_key(),
		);
		let b6 = prepare_block(&source, &ancestry, 20, vec![tx]);
		ancestry.push(b6.header.clone());
		let (_, status) = source.process_block(b6, Options::SKIP_POW).unwrap();
		assert_eq!(status, ProcessStatus::Success);

		let snapshot_header = ancestry.last().unwrap().clone();
		assert_eq!(source.head().unwrap().height, 6);

		// build the snapshot archive from the source node
		let mut archive = source.snapshot_txhashset(&snapshot_header).unwrap();
		let archive_path = format!("{}/snapshot.zip", target_dir);
		std::fs::create_dir_all(target_dir).unwrap();
		{
			let mut buf = vec![];
			archive.read_to_end(&mut buf).unwrap();
			let mut out = std::fs::File::create(&archive_path).unwrap();
			out.write_all(&buf).unwrap();
		}

		// the target node knows the headers but has no block bodies
		let target_chain_dir = format!("{}/chain_data", target_dir);
		let (target, _) = init_chain(&target_chain_dir);
		let headers: Vec<_> = ancestry[1..].to_vec();
		let status = target
			.sync_block_headers(&headers, Options::SKIP_POW)
			.unwrap();
		assert_eq!(status, ProcessStatus::Success);
		assert_eq!(target.get_height(ChainType::Candidate), 6);
		assert_eq!(target.get_height(ChainType::Confirmed), 0);

		// ingest the snapshot: extract, rewind, full validation (hashes,
		// roots, kernel history, sums, rangeproofs, signatures), install
		let status = target.process_txhashset(
			snapshot_header.hash(),
			std::path::Path::new(&archive_path),
			&NoStatus,
		);
		assert_eq!(status, ProcessStatus::Success);

		// confirmed chain promoted onto the candidate chain up to the
		// snapshot block
		assert_eq!(target.get_height(ChainType::Confirmed), 6);
		assert_eq!(
			target.head().unwrap().last_block_h,
			snapshot_header.hash()
		);

		// both nodes agree on the txhashset roots
		let source_roots = source.get_txhashset_roots();
		let target_roots = target.get_txhashset_roots();
		assert_eq!(source_roots.output_root, target_roots.output_root);
		assert_eq!(source_roots.rproof_root, target_roots.rproof_root);
		assert_eq!(source_roots.kernel_root, target_roots.kernel_root);

		// the commitment index on the target covers the snapshot outputs
		let coinbase_commit = {
			let secp = util::static_secp_instance();
			let secp = secp.lock();
			secp.commit(consensus::reward(0), keys[1].clone()).unwrap()
		};
		let header_for_output = target.get_header_for_output(&coinbase_commit).unwrap();
		assert_eq!(header_for_output.height, 2);
	}
	clean_output_dir(source_dir);
	clean_output_dir(target_dir);
}
