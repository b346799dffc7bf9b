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

//! Definition of the genesis block. Placeholder for now.

use chrono::prelude::{TimeZone, Utc};

use crate::core;
use crate::global;
use crate::pow::{Difficulty, Proof, ProofOfWork};

/// Genesis block definition for development networks. The proof of work size
/// is small enough to mine it on the fly, so it does not contain its own
/// proof of work solution. Can also be easily mutated for different tests.
pub fn genesis_dev() -> core::Block {
	core::Block::with_header(core::BlockHeader {
		height: 0,
		timestamp: Utc.ymd(1997, 8, 4).and_hms(0, 0, 0),
		pow: ProofOfWork {
			nonce: 0,
			..Default::default()
		},
		..Default::default()
	})
}

/// Placeholder for the mainnet genesis block. Will be finalized at launch
/// with a real proof of work and a published timestamp.
pub fn genesis_main() -> core::Block {
	core::Block::with_header(core::BlockHeader {
		height: 0,
		timestamp: Utc.ymd(2019, 1, 15).and_hms(12, 0, 0),
		pow: ProofOfWork {
			total_difficulty: Difficulty::from_num(global::initial_block_difficulty()),
			secondary_scaling: global::initial_graph_weight(),
			nonce: 1,
			proof: Proof::zero(global::proofsize()),
		},
		..Default::default()
	})
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::core::hash::Hashed;
	use crate::ser;

	// Verify the genesis block serializes and hashes deterministically.
	#[test]
	fn genesis_stable_hash() {
		global::set_mining_mode(global::ChainTypes::UserTesting);
		let gen = genesis_dev();
		let gen2 = genesis_dev();
		assert_eq!(gen.header.hash(), gen2.header.hash());

		let ser1 = ser::ser_vec(&gen).unwrap();
		let ser2 = ser::ser_vec(&gen2).unwrap();
		assert_eq!(ser1, ser2);
	}
}
