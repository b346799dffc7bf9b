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

//! Serialize then deserialize must be the identity for every on-wire type.

use nimble_core as core;
use nimble_util as util;

use rand::thread_rng;

use self::core::core::hash::Hashed;
use self::core::core::{
	Block, BlockHeader, CompactBlock, KernelFeatures, Transaction, TxKernel,
};
use self::core::libtx::{aggsig, kernel_sig_msg, reward};
use self::core::pow::Difficulty;
use self::core::ser::{self, FixedLength};
use self::core::{genesis, global};
use self::util::secp::key::SecretKey;
use self::util::secp::Message;
use self::util::static_secp_instance;

fn random_key() -> SecretKey {
	let secp = static_secp_instance();
	let secp = secp.lock();
	SecretKey::new(&secp, &mut thread_rng())
}

fn sample_block() -> Block {
	global::set_mining_mode(global::ChainTypes::UserTesting);
	let gen = genesis::genesis_dev();
	let key = random_key();
	let reward_out = reward::output(&key, 0).unwrap();
	Block::new(
		&gen.header,
		vec![],
		Difficulty::from_num(10),
		reward_out,
	)
	.unwrap()
}

#[test]
fn header_roundtrip() {
	let b = sample_block();
	let vec = ser::ser_vec(&b.header).unwrap();
	let header: BlockHeader = ser::deserialize(&mut &vec[..]).unwrap();
	assert_eq!(header, b.header);
	assert_eq!(header.hash(), b.header.hash());
}

#[test]
fn block_roundtrip() {
	let b = sample_block();
	let vec = ser::ser_vec(&b).unwrap();
	let b2: Block = ser::deserialize(&mut &vec[..]).unwrap();
	assert_eq!(b2.header, b.header);
	assert_eq!(b2.outputs(), b.outputs());
	assert_eq!(b2.kernels(), b.kernels());
	assert_eq!(b2.hash(), b.hash());
}

#[test]
fn compact_block_roundtrip() {
	let b = sample_block();
	let cb: CompactBlock = b.clone().into();
	let vec = ser::ser_vec(&cb).unwrap();
	let cb2: CompactBlock = ser::deserialize(&mut &vec[..]).unwrap();
	assert_eq!(cb2.header, cb.header);
	assert_eq!(cb2.nonce, cb.nonce);
	assert_eq!(cb2.out_full(), cb.out_full());
	assert_eq!(cb2.kern_full(), cb.kern_full());
	assert_eq!(cb2.kern_ids(), cb.kern_ids());

	// an empty compact block hydrates back to the original (coinbase only)
	let hydrated = Block::hydrate_from(cb, vec![]).unwrap();
	assert_eq!(hydrated.outputs(), b.outputs());
	assert_eq!(hydrated.kernels(), b.kernels());
}

#[test]
fn kernel_roundtrip_and_len() {
	global::set_mining_mode(global::ChainTypes::UserTesting);
	let secp = static_secp_instance();

	let key = random_key();
	let (excess, excess_sig) = {
		let secp = secp.lock();
		let excess = secp.commit(0, key.clone()).unwrap();
		let msg = Message::from_slice(&kernel_sig_msg(7, 100)).unwrap();
		let sig = aggsig::sign_from_key_id(&secp, &msg, &key).unwrap();
		(excess, sig)
	};

	let kernel = TxKernel {
		features: KernelFeatures::DEFAULT_KERNEL,
		fee: 7,
		lock_height: 100,
		excess,
		excess_sig,
	};
	assert!(kernel.verify().is_ok());

	let vec = ser::ser_vec(&kernel).unwrap();
	// the kernel serialization is the fixed-width MMR leaf record
	assert_eq!(vec.len(), TxKernel::LEN);

	let kernel2: TxKernel = ser::deserialize(&mut &vec[..]).unwrap();
	assert_eq!(kernel2, kernel);
	assert!(kernel2.verify().is_ok());

	// a kernel with a tampered fee no longer verifies
	let mut bad = kernel;
	bad.fee = 8;
	assert!(bad.verify().is_err());
}

#[test]
fn transaction_roundtrip() {
	global::set_mining_mode(global::ChainTypes::UserTesting);

	// borrow the coinbase machinery to make a well-formed output, then wrap
	// it in a (not balanced, but deserializable) transaction
	let key = random_key();
	let (out, kern) = reward::output(&key, 0).unwrap();
	let mut out = out;
	out.features = self::core::core::OutputFeatures::DEFAULT_OUTPUT;
	let mut kern = kern;
	kern.features = KernelFeatures::DEFAULT_KERNEL;

	let tx = Transaction::new(vec![], vec![out], vec![kern]);
	let vec = ser::ser_vec(&tx).unwrap();
	let tx2: Transaction = ser::deserialize(&mut &vec[..]).unwrap();
	assert_eq!(tx2, tx);
}

#[test]
fn output_identifier_len() {
	use self::core::core::OutputIdentifier;
	use self::util::secp::pedersen::RangeProof;

	// the three MMR leaf records have the widths the data files assume
	assert_eq!(OutputIdentifier::LEN, 34);
	assert_eq!(TxKernel::LEN, 114);
	assert_eq!(RangeProof::LEN, 683);
}
