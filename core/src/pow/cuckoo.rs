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

//! Implementation of Cuckoo Cycle designed by John Tromp. Only the verifier
//! side is implemented here, a node never mines its own proofs. A proof is a
//! cycle of PROOFSIZE increasing edge nonces in a bipartite graph seeded from
//! the header's pre-PoW bytes.

use blake2_rfc::blake2b::blake2b;
use byteorder::{ByteOrder, LittleEndian};

use crate::pow::siphash::siphash24;
use crate::pow::{Error, Proof};

/// Cuckoo cycle context, with the siphash keys seeded from a block header.
pub struct Cuckoo {
	mask: u64,
	num_edges: u64,
	v: [u64; 4],
}

impl Cuckoo {
	/// Initializes a new Cuckoo Cycle setup, using the provided byte array to
	/// generate a seed. In practice for PoW applications the byte array is a
	/// serialized block header.
	pub fn new(header: &[u8], edge_bits: u8) -> Cuckoo {
		let hashed = blake2b(32, &[], header);
		let hashed = hashed.as_bytes();

		let mut v = [0u64; 4];
		for (i, item) in v.iter_mut().enumerate() {
			*item = LittleEndian::read_u64(&hashed[i * 8..(i + 1) * 8]);
		}

		let num_edges = 1u64 << edge_bits;
		Cuckoo {
			v,
			num_edges,
			// nodes on each side of the bipartite graph
			mask: num_edges / 2 - 1,
		}
	}

	/// Generates a node in the cuckoo graph generated from our seed. A node is
	/// simply materialized as a u64 from a nonce and an offset (generally 0 or
	/// 1).
	fn new_node(&self, nonce: u64, uorv: u64) -> u64 {
		((siphash24(&self.v, 2 * nonce + uorv) & self.mask) << 1) | uorv
	}

	/// Assuming increasing nonces all smaller than the edge count, verifies
	/// the nonces form a cycle in the Cuckoo graph. Each nonce generates an
	/// edge, we build the nodes on both side of that edge and count the
	/// connections.
	pub fn verify(&self, proof: &Proof) -> Result<(), Error> {
		let nonces = &proof.nonces;
		let proof_size = proof.proof_size();
		let mut us = vec![0; proof_size];
		let mut vs = vec![0; proof_size];
		for n in 0..proof_size {
			if nonces[n] >= self.num_edges {
				return Err(Error::Verification("edge nonce too large".to_owned()));
			}
			if n != 0 && nonces[n] <= nonces[n - 1] {
				return Err(Error::Verification("edge nonces not increasing".to_owned()));
			}
			us[n] = self.new_node(nonces[n], 0);
			vs[n] = self.new_node(nonces[n], 1);
		}
		let mut i = 0;
		let mut count = proof_size;
		loop {
			let mut j = i;
			for k in 0..proof_size {
				// find unique other j with same vs[j]
				if k != i && vs[k] == vs[i] {
					if j != i {
						return Err(Error::Verification("branch in cycle".to_owned()));
					}
					j = k;
				}
			}
			if j == i {
				return Err(Error::Verification("cycle dead ends".to_owned()));
			}
			i = j;
			for k in 0..proof_size {
				// find unique other i with same us[i]
				if k != j && us[k] == us[j] {
					if i != j {
						return Err(Error::Verification("branch in cycle".to_owned()));
					}
					i = k;
				}
			}
			if i == j {
				return Err(Error::Verification("cycle dead ends".to_owned()));
			}
			count -= 2;
			if i == 0 {
				break;
			}
		}
		if count == 0 {
			Ok(())
		} else {
			Err(Error::Verification("cycle too short".to_owned()))
		}
	}
}
