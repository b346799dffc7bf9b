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

//! Rangeproof library functions

use crate::libtx::error::{Error, ErrorKind};
use crate::util::secp::key::SecretKey;
use crate::util::secp::pedersen::{Commitment, ProofMessage, RangeProof};
use crate::util::secp::Secp256k1;

/// Create a bulletproof for the provided value using the blinding factor.
/// The same key doubles as the rewind nonce so a wallet can recognize and
/// unwind its own outputs, a concern that lives outside the chain core.
pub fn create(
	secp: &Secp256k1,
	amount: u64,
	skey: &SecretKey,
	extra_data: Option<Vec<u8>>,
) -> Result<RangeProof, Error> {
	let nonce = skey.clone();
	let message = ProofMessage::empty();
	let proof = secp.bullet_proof(
		amount,
		skey.clone(),
		nonce.clone(),
		nonce,
		extra_data,
		Some(message),
	);
	Ok(proof)
}

/// Verify a single proof for the given commitment
pub fn verify(
	secp: &Secp256k1,
	commit: Commitment,
	proof: RangeProof,
	extra_data: Option<Vec<u8>>,
) -> Result<(), Error> {
	let result = secp.verify_bullet_proof(commit, proof, extra_data);
	match result {
		Ok(_) => Ok(()),
		Err(e) => Err(ErrorKind::RangeProof(format!("{}", e)).into()),
	}
}
