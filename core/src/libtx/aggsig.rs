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

//! Aggregated Schnorr signature functions used in the creation of kernel
//! signatures. Thin wrappers around the secp aggsig module so the rest of
//! the codebase never deals with its raw parameter soup.

use crate::libtx::error::{Error, ErrorKind};
use crate::util::secp::key::{PublicKey, SecretKey};
use crate::util::secp::pedersen::Commitment;
use crate::util::secp::{self, aggsig, Message, Secp256k1, Signature};

/// Creates a single-signer aggsig signature from a msg and a secret key.
/// Used to sign a kernel over its excess.
pub fn sign_single(
	secp: &Secp256k1,
	msg: &Message,
	skey: &SecretKey,
	blind_sum: Option<&PublicKey>,
) -> Result<Signature, Error> {
	let sig = aggsig::sign_single(secp, &msg, skey, None, None, None, blind_sum, None)
		.map_err(|e| ErrorKind::Signature(format!("single-signer sign failed: {}", e)))?;
	Ok(sig)
}

/// Simple verification of a single signature from a commitment instead of a
/// public key. The commitment must be a valid curve point (which the excess
/// of a correctly balanced kernel always is).
pub fn verify_single_from_commit(
	secp: &Secp256k1,
	sig: &Signature,
	msg: &Message,
	commit: &Commitment,
) -> bool {
	if let Ok(pubkey) = commit.to_pubkey(secp) {
		aggsig::verify_single(secp, sig, msg, None, &pubkey, Some(&pubkey), None, false)
	} else {
		false
	}
}

/// Verifies a completed (summed) signature, which must be valid with the sum
/// of all public nonces and public keys.
pub fn verify_completed_sig(
	secp: &Secp256k1,
	sig: &Signature,
	pubkey: &PublicKey,
	pubkey_sum: Option<&PublicKey>,
	msg: &Message,
) -> Result<(), Error> {
	if !aggsig::verify_single(secp, sig, msg, None, pubkey, pubkey_sum, None, true) {
		return Err(ErrorKind::Signature("signature validation error".to_string()).into());
	}
	Ok(())
}

/// Just a simple sig, creates its own nonce
pub fn sign_from_key_id(
	secp: &Secp256k1,
	msg: &Message,
	skey: &SecretKey,
) -> Result<Signature, Error> {
	let pubkey = PublicKey::from_secret_key(secp, skey)
		.map_err(|e: secp::Error| ErrorKind::Signature(format!("{}", e)))?;
	let sig = aggsig::sign_single(secp, &msg, skey, None, None, None, Some(&pubkey), None)
		.map_err(|e| ErrorKind::Signature(format!("single-signer sign failed: {}", e)))?;
	Ok(sig)
}
