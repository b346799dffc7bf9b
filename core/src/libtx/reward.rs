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

//! Builds the blinded coinbase output and kernel for a block.

use crate::consensus::reward;
use crate::core::transaction::{KernelFeatures, Output, OutputFeatures, TxKernel};
use crate::libtx::error::Error;
use crate::libtx::{aggsig, kernel_sig_msg, proof};
use crate::util::secp::key::SecretKey;
use crate::util::secp::Message;
use crate::util::static_secp_instance;

/// Output a reward output and kernel for the given secret key and block fees.
/// The secret key stands in for the wallet's derived key, which is out of
/// scope here.
pub fn output(skey: &SecretKey, fees: u64) -> Result<(Output, TxKernel), Error> {
	let value = reward(fees);

	let secp = static_secp_instance();
	let secp = secp.lock();

	let commit = secp.commit(value, skey.clone())?;

	trace!("Block reward - Pedersen Commit is: {:?}", commit);

	let rproof = proof::create(&secp, value, skey, None)?;

	let output = Output {
		features: OutputFeatures::COINBASE_OUTPUT,
		commit,
		proof: rproof,
	};

	let over_commit = secp.commit_value(value)?;
	let out_commit = output.commitment();
	let excess = secp.commit_sum(vec![out_commit], vec![over_commit])?;

	// NOTE: Remember we sign the fee *and* the lock_height.
	// For a coinbase output the fee is 0 and the lock_height is 0
	let msg = Message::from_slice(&kernel_sig_msg(0, 0))?;
	let excess_sig = aggsig::sign_from_key_id(&secp, &msg, skey)?;

	let proof = TxKernel {
		features: KernelFeatures::COINBASE_KERNEL,
		excess,
		excess_sig,
		fee: 0,
		// lock_height of 0 for coinbase headers, the maturity rule is
		// enforced when the output is spent
		lock_height: 0,
	};
	Ok((output, proof))
}
