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

//! Blocks and block headers

use chrono::naive::{MAX_DATE, MIN_DATE};
use chrono::prelude::{DateTime, NaiveDateTime, Utc};
use chrono::Duration;
use failure::Fail;

use crate::consensus::reward;
use crate::core::committed::{self, BlindingFactor, Committed};
use crate::core::compact_block::CompactBlock;
use crate::core::hash::{Hash, Hashed, ZERO_HASH};
use crate::core::transaction::{
	self, Error as TransactionError, Input, KernelFeatures, Output, Transaction, TransactionBody,
	TxKernel,
};
use crate::global;
use crate::pow::{Difficulty, Proof, ProofOfWork};
use crate::ser::{self, FixedLength, PMMRable, Readable, Reader, Writeable, Writer};
use crate::util::secp::pedersen::Commitment;
use crate::util::{secp, static_secp_instance};

/// Errors thrown by Block validation
#[derive(Debug, Clone, Eq, PartialEq, Fail)]
pub enum Error {
	/// The sum of output minus input commitments does not
	/// match the sum of kernel commitments
	#[fail(display = "Kernel sum mismatch")]
	KernelSumMismatch,
	/// The total kernel sum on the block header is wrong
	#[fail(display = "Invalid total kernel sum")]
	InvalidTotalKernelSum,
	/// Same as above but for the coinbase part of a block, including reward
	#[fail(display = "Coinbase sum mismatch")]
	CoinbaseSumMismatch,
	/// Restrict block total weight.
	#[fail(display = "Block is too heavy")]
	TooHeavy,
	/// Block version is invalid for a given block height
	#[fail(display = "Invalid block version {}", _0)]
	InvalidBlockVersion(u16),
	/// Block time is invalid
	#[fail(display = "Invalid block time")]
	InvalidBlockTime,
	/// Invalid POW
	#[fail(display = "Invalid POW")]
	InvalidPow,
	/// Kernel not valid due to lock_height exceeding block header height
	#[fail(display = "Kernel lock height {}", _0)]
	KernelLockHeight(u64),
	/// Underlying tx related error
	#[fail(display = "Invalid transaction {}", _0)]
	Transaction(TransactionError),
	/// Underlying Secp256k1 error (signature validation or invalid public key
	/// typically)
	#[fail(display = "Secp error")]
	Secp(secp::Error),
	/// Underlying serialization error.
	#[fail(display = "Serialization error {}", _0)]
	Serialization(ser::Error),
	/// Underlying committed error.
	#[fail(display = "Committed error {}", _0)]
	Committed(committed::Error),
	/// Other unspecified error condition
	#[fail(display = "Other block error {}", _0)]
	Other(String),
}

impl From<committed::Error> for Error {
	fn from(e: committed::Error) -> Error {
		Error::Committed(e)
	}
}

impl From<TransactionError> for Error {
	fn from(e: TransactionError) -> Error {
		Error::Transaction(e)
	}
}

impl From<ser::Error> for Error {
	fn from(e: ser::Error) -> Error {
		Error::Serialization(e)
	}
}

impl From<secp::Error> for Error {
	fn from(e: secp::Error) -> Error {
		Error::Secp(e)
	}
}

/// The fixed-size entry stored in the header MMR data file for each header.
/// The MMR commits to header hashes, full headers stay in the db.
#[derive(Clone, Debug, PartialEq)]
pub struct HeaderEntry {
	hash: Hash,
}

impl HeaderEntry {
	/// Hash of the header this entry points at.
	pub fn hash(&self) -> Hash {
		self.hash
	}
}

impl FixedLength for HeaderEntry {
	const LEN: usize = Hash::LEN;
}

impl Readable for HeaderEntry {
	fn read(reader: &mut dyn Reader) -> Result<HeaderEntry, ser::Error> {
		Ok(HeaderEntry {
			hash: Hash::read(reader)?,
		})
	}
}

impl Writeable for HeaderEntry {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.hash.write(writer)
	}
}

/// Block header, fairly standard compared to other blockchains.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockHeader {
	/// Version of the block
	pub version: u16,
	/// Height of this block since the genesis block (height 0)
	pub height: u64,
	/// Hash of the block previous to this in the chain.
	pub prev_hash: Hash,
	/// Root hash of the header MMR at the previous header.
	pub prev_root: Hash,
	/// Timestamp at which the block was built.
	pub timestamp: DateTime<Utc>,
	/// Merklish root of all the commitments in the TxHashSet
	pub output_root: Hash,
	/// Merklish root of all range proofs in the TxHashSet
	pub range_proof_root: Hash,
	/// Merklish root of all transaction kernels in the TxHashSet
	pub kernel_root: Hash,
	/// Total accumulated sum of kernel offsets since genesis block.
	/// We can derive the kernel offset sum for *this* block from
	/// the total kernel offset of the previous block header.
	pub total_kernel_offset: BlindingFactor,
	/// Total size of the output MMR after applying this block
	pub output_mmr_size: u64,
	/// Total size of the kernel MMR after applying this block
	pub kernel_mmr_size: u64,
	/// Proof of work and related
	pub pow: ProofOfWork,
}

impl Default for BlockHeader {
	fn default() -> BlockHeader {
		BlockHeader {
			version: 1,
			height: 0,
			timestamp: DateTime::<Utc>::from_utc(NaiveDateTime::from_timestamp(0, 0), Utc),
			prev_hash: ZERO_HASH,
			prev_root: ZERO_HASH,
			output_root: ZERO_HASH,
			range_proof_root: ZERO_HASH,
			kernel_root: ZERO_HASH,
			total_kernel_offset: BlindingFactor::zero(),
			output_mmr_size: 0,
			kernel_mmr_size: 0,
			pow: ProofOfWork::default(),
		}
	}
}

impl PMMRable for BlockHeader {
	type E = HeaderEntry;

	fn as_elmt(&self) -> Self::E {
		HeaderEntry { hash: self.hash() }
	}
}

/// Serialization of a block header
impl Writeable for BlockHeader {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		if writer.serialization_mode() != ser::SerializationMode::Hash {
			self.write_pre_pow(writer)?;
		}
		self.pow.write(writer)?;
		Ok(())
	}
}

/// Deserialization of a block header
impl Readable for BlockHeader {
	fn read(reader: &mut dyn Reader) -> Result<BlockHeader, ser::Error> {
		let (version, height, timestamp) =
			(reader.read_u16()?, reader.read_u64()?, reader.read_i64()?);
		let prev_hash = Hash::read(reader)?;
		let prev_root = Hash::read(reader)?;
		let output_root = Hash::read(reader)?;
		let range_proof_root = Hash::read(reader)?;
		let kernel_root = Hash::read(reader)?;
		let total_kernel_offset = BlindingFactor::read(reader)?;
		let (output_mmr_size, kernel_mmr_size) = (reader.read_u64()?, reader.read_u64()?);
		let pow = ProofOfWork::read(reader)?;

		if timestamp > MAX_DATE.and_hms(0, 0, 0).timestamp()
			|| timestamp < MIN_DATE.and_hms(0, 0, 0).timestamp()
		{
			return Err(ser::Error::CorruptedData);
		}

		Ok(BlockHeader {
			version,
			height,
			timestamp: DateTime::<Utc>::from_utc(NaiveDateTime::from_timestamp(timestamp, 0), Utc),
			prev_hash,
			prev_root,
			output_root,
			range_proof_root,
			kernel_root,
			total_kernel_offset,
			output_mmr_size,
			kernel_mmr_size,
			pow,
		})
	}
}

impl BlockHeader {
	/// Write the pre-hash portion of the header
	pub fn write_pre_pow<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u16(self.version)?;
		writer.write_u64(self.height)?;
		writer.write_i64(self.timestamp.timestamp())?;
		self.prev_hash.write(writer)?;
		self.prev_root.write(writer)?;
		self.output_root.write(writer)?;
		self.range_proof_root.write(writer)?;
		self.kernel_root.write(writer)?;
		self.total_kernel_offset.write(writer)?;
		writer.write_u64(self.output_mmr_size)?;
		writer.write_u64(self.kernel_mmr_size)?;
		Ok(())
	}

	/// Return the pre-pow, unhashed
	/// Let the cuck(at)oo miner/verifier handle the hashing
	/// for consistency with how this call is performed everywhere
	/// else
	pub fn pre_pow(&self) -> Vec<u8> {
		let mut header_buf = vec![];
		{
			let mut writer = ser::BinWriter::new(&mut header_buf);
			self.write_pre_pow(&mut writer).unwrap();
			self.pow.write_pre_pow(&mut writer).unwrap();
			writer.write_u64(self.pow.nonce).unwrap();
		}
		header_buf
	}

	/// Total difficulty accumulated by the proof of work on this header
	pub fn total_difficulty(&self) -> Difficulty {
		self.pow.total_difficulty
	}

	/// The "overage" to use when verifying the kernel sums.
	/// For a block header the overage is 0 - reward.
	pub fn overage(&self) -> i64 {
		(reward(0) as i64).checked_neg().unwrap_or(0)
	}

	/// The "total overage" to use when verifying the kernel sums for a full
	/// chain state. For a full chain state this is 0 - (height * reward).
	pub fn total_overage(&self, genesis_had_reward: bool) -> i64 {
		let mut reward_count = self.height;
		if genesis_had_reward {
			reward_count += 1;
		}

		((reward_count * reward(0)) as i64).checked_neg().unwrap_or(0)
	}

	/// Total kernel offset for the chain state up to and including this block.
	pub fn total_kernel_offset(&self) -> BlindingFactor {
		self.total_kernel_offset
	}
}

/// A block as expressed in the Mimblewimble protocol. The reward is
/// non-explicit, assumed to be deducible from block height (similar to
/// bitcoin's schedule) and expressed as a global transaction fee (added v.H),
/// additive to the total of fees ever collected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
	/// The header with metadata and commitments to the rest of the data
	pub header: BlockHeader,
	/// The body - inputs/outputs/kernels
	body: TransactionBody,
}

/// Implementation of Writeable for a block, defines how to write the block to a
/// binary writer. Differentiates between writing the block for the purpose of
/// full serialization and the one of just extracting a hash.
impl Writeable for Block {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.header.write(writer)?;

		if writer.serialization_mode() != ser::SerializationMode::Hash {
			self.body.write(writer)?;
		}
		Ok(())
	}
}

/// Implementation of Readable for a block, defines how to read a full block
/// from a binary stream.
impl Readable for Block {
	fn read(reader: &mut dyn Reader) -> Result<Block, ser::Error> {
		let header = BlockHeader::read(reader)?;

		let body = TransactionBody::read(reader)?;

		// Now "lightweight" validation of the block.
		// Treat any validation issues as data corruption.
		// An example of this would be reading a block
		// that exceeded the allowed number of inputs.
		body.validate_read(true).map_err(|_| ser::Error::CorruptedData)?;

		Ok(Block { header, body })
	}
}

/// Provides all information from a block that allows the calculation of total
/// Pedersen commitment.
impl Committed for Block {
	fn inputs_committed(&self) -> Vec<Commitment> {
		self.body.inputs_committed()
	}

	fn outputs_committed(&self) -> Vec<Commitment> {
		self.body.outputs_committed()
	}

	fn kernels_committed(&self) -> Vec<Commitment> {
		self.body.kernels_committed()
	}
}

/// Default properties of a block, everything zeroed out and empty vectors.
impl Default for Block {
	fn default() -> Block {
		Block {
			header: Default::default(),
			body: Default::default(),
		}
	}
}

impl Block {
	/// Builds a new block from the header of the previous block, a vector of
	/// transactions and the private key that will receive the reward. Checks
	/// that all transactions are valid and calculates the Merkle tree.
	pub fn new(
		prev: &BlockHeader,
		txs: Vec<Transaction>,
		difficulty: Difficulty,
		reward_output: (Output, TxKernel),
	) -> Result<Block, Error> {
		let mut block =
			Block::from_reward(prev, txs, reward_output.0, reward_output.1, difficulty)?;

		// Now set the pow on the header so block hashing works as expected.
		{
			let proof_size = global::proofsize();
			block.header.pow.proof = Proof::random(proof_size);
		}

		Ok(block)
	}

	/// Hydrate a block from a compact block.
	/// Note: caller must validate the block themselves, we do not validate it
	/// here.
	pub fn hydrate_from(cb: CompactBlock, txs: Vec<Transaction>) -> Result<Block, Error> {
		trace!("block: hydrate_from: {}, {} txs", cb.hash(), txs.len());

		let header = cb.header.clone();

		let mut inputs = vec![];
		let mut outputs = vec![];
		let mut kernels = vec![];

		// collect all the inputs, outputs and kernels from the txs
		for tx in txs {
			let tb: TransactionBody = tx.body().clone();
			inputs.extend(tb.inputs);
			outputs.extend(tb.outputs);
			kernels.extend(tb.kernels);
		}

		// include the coinbase output(s) and kernel(s) from the compact_block
		{
			let body: TransactionBody = cb.into();
			outputs.extend(body.outputs);
			kernels.extend(body.kernels);
		}

		// dedup all the elements via their hashes
		inputs.sort_unstable_by_key(|x| x.hash());
		inputs.dedup_by_key(|x| x.hash());
		outputs.sort_unstable_by_key(|x| x.hash());
		outputs.dedup_by_key(|x| x.hash());
		kernels.sort_unstable_by_key(|x| x.hash());
		kernels.dedup_by_key(|x| x.hash());

		// Initialize a tx body and sort everything.
		let body = TransactionBody::init(inputs, outputs, kernels, false)?;

		// Finally return the full block.
		// Note: we have not actually validated the block here,
		// caller must validate the block.
		Ok(Block { header, body })
	}

	/// Build a new empty block from a specified header
	pub fn with_header(header: BlockHeader) -> Block {
		Block {
			header,
			..Default::default()
		}
	}

	/// Builds a new block ready to mine from the header of the previous block,
	/// a vector of transactions and the reward information. Checks
	/// that all transactions are valid and calculates the Merkle tree.
	pub fn from_reward(
		prev: &BlockHeader,
		txs: Vec<Transaction>,
		reward_out: Output,
		reward_kern: TxKernel,
		difficulty: Difficulty,
	) -> Result<Block, Error> {
		// A block is just a big transaction, aggregate and add the reward.
		let mut inputs = vec![];
		let mut outputs = vec![];
		let mut kernels = vec![];
		let mut offsets = vec![];
		for tx in txs {
			offsets.push(tx.offset);
			let tb = tx.body().clone();
			inputs.extend(tb.inputs);
			outputs.extend(tb.outputs);
			kernels.extend(tb.kernels);
		}
		outputs.push(reward_out);
		kernels.push(reward_kern);

		// Apply cut-through across the aggregated tx set.
		transaction::cut_through(&mut inputs, &mut outputs)?;

		let body = TransactionBody::init(inputs, outputs, kernels, false)?;

		// Now add the kernel offsets of the txs to the previous
		// total kernel offset in the block header.
		let total_kernel_offset =
			committed::sum_kernel_offsets(
				{
					let mut res = offsets;
					res.push(prev.total_kernel_offset);
					res
				},
				vec![],
			)?;

		let now = Utc::now().timestamp();
		let timestamp = DateTime::<Utc>::from_utc(NaiveDateTime::from_timestamp(now, 0), Utc);

		// Now build the block with all the above information.
		// Note: We have not validated the block here.
		// Caller must validate the block as necessary.
		Ok(Block {
			header: BlockHeader {
				height: prev.height + 1,
				timestamp,
				prev_hash: prev.hash(),
				total_kernel_offset,
				pow: ProofOfWork {
					total_difficulty: difficulty + prev.pow.total_difficulty,
					..Default::default()
				},
				..Default::default()
			},
			body,
		})
	}

	/// Get inputs
	pub fn inputs(&self) -> &Vec<Input> {
		&self.body.inputs
	}

	/// Get inputs mutable
	pub fn inputs_mut(&mut self) -> &mut Vec<Input> {
		&mut self.body.inputs
	}

	/// Get outputs
	pub fn outputs(&self) -> &Vec<Output> {
		&self.body.outputs
	}

	/// Get outputs mutable
	pub fn outputs_mut(&mut self) -> &mut Vec<Output> {
		&mut self.body.outputs
	}

	/// Get kernels
	pub fn kernels(&self) -> &Vec<TxKernel> {
		&self.body.kernels
	}

	/// The body of the block.
	pub fn body(&self) -> &TransactionBody {
		&self.body
	}

	/// Sum of all fees (inputs less outputs) in the block
	pub fn total_fees(&self) -> u64 {
		self.body.fee()
	}

	/// "Lightweight" validation that we can perform quickly during
	/// read/deserialization. Subset of full validation that skips expensive
	/// verification steps, specifically rangeproof and signature verification.
	pub fn validate_read(&self) -> Result<(), Error> {
		self.body.validate_read(true)?;
		self.verify_kernel_lock_heights()?;
		Ok(())
	}

	/// Validates all the elements in a block that can be checked without
	/// additional data. Includes commitment sums and kernels, Merkle
	/// trees, reward, etc.
	pub fn validate(&self, prev_kernel_offset: &BlindingFactor) -> Result<Commitment, Error> {
		self.body.validate_read(true)?;
		self.verify_kernel_lock_heights()?;
		self.verify_coinbase()?;

		// take the kernel offset for this block (block offset minus previous)
		// and verify body inputs/outputs against the kernel sums
		let block_kernel_offset = if self.header.total_kernel_offset() == *prev_kernel_offset {
			// special case when the sum hasn't changed (typically an empty
			// block), zero isn't a valid private key but it's a valid
			// blinding factor
			BlindingFactor::zero()
		} else {
			committed::sum_kernel_offsets(
				vec![self.header.total_kernel_offset()],
				vec![*prev_kernel_offset],
			)?
		};
		let (_utxo_sum, kernel_sum) =
			self.verify_kernel_sums(self.header.overage(), block_kernel_offset)?;

		// Verify the rangeproofs and kernel signatures.
		self.body.validate(true)?;

		Ok(kernel_sum)
	}

	/// Validate the coinbase outputs generated by miners.
	/// Check the sum of coinbase-marked outputs match
	/// the sum of coinbase-marked kernels accounting for fees.
	pub fn verify_coinbase(&self) -> Result<(), Error> {
		let cb_outs = self
			.body
			.outputs
			.iter()
			.filter(|out| out.is_coinbase())
			.collect::<Vec<&Output>>();

		let cb_kerns = self
			.body
			.kernels
			.iter()
			.filter(|kernel| kernel.features.contains(KernelFeatures::COINBASE_KERNEL))
			.collect::<Vec<&TxKernel>>();

		{
			let secp = static_secp_instance();
			let secp = secp.lock();
			let over_commit = secp.commit_value(reward(self.total_fees()))?;

			let out_adjust_sum = secp.commit_sum(
				cb_outs.iter().map(|x| x.commitment()).collect(),
				vec![over_commit],
			)?;

			let kerns_sum = secp.commit_sum(cb_kerns.iter().map(|x| x.excess).collect(), vec![])?;

			// Verify the kernel sum equals the output sum accounting for
			// block fees.
			if kerns_sum != out_adjust_sum {
				return Err(Error::CoinbaseSumMismatch);
			}
		}

		Ok(())
	}

	fn verify_kernel_lock_heights(&self) -> Result<(), Error> {
		for k in &self.body.kernels {
			// check we have no kernels with lock_heights greater than current
			// height no tx can be included in a block earlier than its
			// lock_height
			if k.lock_height > self.header.height {
				return Err(Error::KernelLockHeight(k.lock_height));
			}
		}
		Ok(())
	}
}
