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

//! Implements storage primitives required by the chain: persistent maps from
//! hashes to headers, blocks, block sums and input bitmaps, plus the
//! commitment to MMR position index.

use std::sync::Arc;

use croaring::Bitmap;

use crate::store::lmdb_zero as lmdb;

use crate::core::consensus::HeaderInfo;
use crate::core::core::hash::{Hash, Hashed};
use crate::core::core::{Block, BlockHeader, BlockSums};
use crate::core::pow::Difficulty;
use crate::core::ser::{self, Readable, Reader, Writeable, Writer};
use crate::store::{option_to_not_found, to_key, Error, SerIterator};
use crate::util::secp::pedersen::Commitment;

const STORE_SUBPATH: &str = "chain";

const BLOCK_HEADER_PREFIX: u8 = b'h';
const BLOCK_PREFIX: u8 = b'b';
const BLOCK_SUMS_PREFIX: u8 = b'M';
const COMMIT_POS_PREFIX: u8 = b'c';
const BLOCK_INPUT_BITMAP_PREFIX: u8 = b'B';
const DB_VERSION_KEY: u8 = b'v';

/// The current supported version of our db schema.
/// v1: initial.
/// v2: commitment to position index needs rebuilding from the txhashset.
/// v3: block bodies re-encoded.
pub const DB_VERSION: u8 = 3;

/// Position and block height of an output commitment in the output MMR.
/// Enables O(1) spend lookups and coinbase maturity checks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutputPos {
	/// Position in the output MMR (1-indexed).
	pub pos: u64,
	/// Height of the block that introduced the output.
	pub height: u64,
}

impl Writeable for OutputPos {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u64(self.pos)?;
		writer.write_u64(self.height)
	}
}

impl Readable for OutputPos {
	fn read(reader: &mut dyn Reader) -> Result<OutputPos, ser::Error> {
		Ok(OutputPos {
			pos: reader.read_u64()?,
			height: reader.read_u64()?,
		})
	}
}

/// All chain-related database operations.
pub struct ChainStore {
	db: crate::store::Store,
}

impl ChainStore {
	/// Create new chain store.
	pub fn new(db_env: Arc<lmdb::Environment>) -> Result<ChainStore, Error> {
		let db = crate::store::Store::open(db_env, STORE_SUBPATH);
		Ok(ChainStore { db })
	}

	/// Get full block.
	pub fn get_block(&self, h: &Hash) -> Result<Block, Error> {
		option_to_not_found(
			self.db.get_ser(&to_key(BLOCK_PREFIX, &mut h.to_vec())),
			&format!("BLOCK: {}", h),
		)
	}

	/// Does this full block exist?
	pub fn block_exists(&self, h: &Hash) -> Result<bool, Error> {
		self.db.exists(&to_key(BLOCK_PREFIX, &mut h.to_vec()))
	}

	/// Get block header.
	pub fn get_block_header(&self, h: &Hash) -> Result<BlockHeader, Error> {
		option_to_not_found(
			self.db
				.get_ser(&to_key(BLOCK_HEADER_PREFIX, &mut h.to_vec())),
			&format!("BLOCK HEADER: {}", h),
		)
	}

	/// Does the header exist?
	pub fn header_exists(&self, h: &Hash) -> Result<bool, Error> {
		self.db
			.exists(&to_key(BLOCK_HEADER_PREFIX, &mut h.to_vec()))
	}

	/// Get block sums for the block hash.
	pub fn get_block_sums(&self, h: &Hash) -> Result<BlockSums, Error> {
		option_to_not_found(
			self.db.get_ser(&to_key(BLOCK_SUMS_PREFIX, &mut h.to_vec())),
			&format!("Block sums for block: {}", h),
		)
	}

	/// Get the position and height of the output with the given commitment.
	pub fn get_output_pos(&self, commit: &Commitment) -> Result<OutputPos, Error> {
		option_to_not_found(
			self.db
				.get_ser(&to_key(COMMIT_POS_PREFIX, &mut commit.as_ref().to_vec())),
			&format!("Output position for: {:?}", commit),
		)
	}

	/// Get the previous header.
	pub fn get_previous_header(&self, header: &BlockHeader) -> Result<BlockHeader, Error> {
		self.get_block_header(&header.prev_hash)
	}

	/// Current schema version of the db contents.
	pub fn get_db_version(&self) -> Result<u8, Error> {
		let res: Result<Option<u8>, Error> = self.db.get_ser(&[DB_VERSION_KEY]);
		// A missing version key means a db created before versioning, v1.
		Ok(res?.unwrap_or(1))
	}

	/// Builds a new batch to be used with this store.
	pub fn batch(&self) -> Result<Batch<'_>, Error> {
		Ok(Batch {
			db: self.db.batch()?,
		})
	}
}

/// An atomic batch in which all changes can be committed all at once or
/// discarded on error.
pub struct Batch<'a> {
	db: crate::store::Batch<'a>,
}

impl<'a> Batch<'a> {
	/// Get full block.
	pub fn get_block(&self, h: &Hash) -> Result<Block, Error> {
		option_to_not_found(
			self.db.get_ser(&to_key(BLOCK_PREFIX, &mut h.to_vec())),
			&format!("Block with hash: {}", h),
		)
	}

	/// Does the block exist?
	pub fn block_exists(&self, h: &Hash) -> Result<bool, Error> {
		self.db.exists(&to_key(BLOCK_PREFIX, &mut h.to_vec()))
	}

	/// Save the block to the db.
	/// Note: the block header is not saved to the db here, assumes this has
	/// already been done.
	pub fn save_block(&self, b: &Block) -> Result<(), Error> {
		self.db
			.put_ser(&to_key(BLOCK_PREFIX, &mut b.hash().to_vec())[..], b)?;
		Ok(())
	}

	/// Delete a full block. Does not delete any record associated with a
	/// block header.
	pub fn delete_block(&self, bh: &Hash) -> Result<(), Error> {
		self.db.delete(&to_key(BLOCK_PREFIX, &mut bh.to_vec())[..])?;
		Ok(())
	}

	/// Save the block header.
	pub fn save_block_header(&self, header: &BlockHeader) -> Result<(), Error> {
		let hash = header.hash();
		self.db.put_ser(
			&to_key(BLOCK_HEADER_PREFIX, &mut hash.to_vec())[..],
			header,
		)?;
		Ok(())
	}

	/// Save a batch of block headers.
	pub fn save_block_headers(&self, headers: &[BlockHeader]) -> Result<(), Error> {
		for header in headers {
			self.save_block_header(header)?;
		}
		Ok(())
	}

	/// Get the block header.
	pub fn get_block_header(&self, h: &Hash) -> Result<BlockHeader, Error> {
		option_to_not_found(
			self.db
				.get_ser(&to_key(BLOCK_HEADER_PREFIX, &mut h.to_vec())),
			&format!("BLOCK HEADER: {}", h),
		)
	}

	/// Does the header exist?
	pub fn header_exists(&self, h: &Hash) -> Result<bool, Error> {
		self.db
			.exists(&to_key(BLOCK_HEADER_PREFIX, &mut h.to_vec()))
	}

	/// Get the previous header.
	pub fn get_previous_header(&self, header: &BlockHeader) -> Result<BlockHeader, Error> {
		self.get_block_header(&header.prev_hash)
	}

	/// Save block sums for the block hash.
	pub fn save_block_sums(&self, h: &Hash, sums: &BlockSums) -> Result<(), Error> {
		self.db
			.put_ser(&to_key(BLOCK_SUMS_PREFIX, &mut h.to_vec())[..], sums)?;
		Ok(())
	}

	/// Get block sums for the block hash.
	pub fn get_block_sums(&self, h: &Hash) -> Result<BlockSums, Error> {
		option_to_not_found(
			self.db.get_ser(&to_key(BLOCK_SUMS_PREFIX, &mut h.to_vec())),
			&format!("Block sums for block: {}", h),
		)
	}

	/// Save the provided commitment to MMR position and block height.
	pub fn save_output_pos(&self, commit: &Commitment, pos: OutputPos) -> Result<(), Error> {
		self.db.put_ser(
			&to_key(COMMIT_POS_PREFIX, &mut commit.as_ref().to_vec())[..],
			&pos,
		)?;
		Ok(())
	}

	/// Get the position and height of the output with the given commitment.
	pub fn get_output_pos(&self, commit: &Commitment) -> Result<OutputPos, Error> {
		option_to_not_found(
			self.db
				.get_ser(&to_key(COMMIT_POS_PREFIX, &mut commit.as_ref().to_vec())),
			&format!("Output position for: {:?}", commit),
		)
	}

	/// Delete a set of output positions by commitment (outputs made
	/// irrelevant by a reorg).
	pub fn delete_output_positions(&self, commits: &[Commitment]) -> Result<(), Error> {
		for commit in commits {
			self.db
				.delete(&to_key(COMMIT_POS_PREFIX, &mut commit.as_ref().to_vec()))?;
		}
		Ok(())
	}

	/// Clear the entire output position index. Used when rebuilding it from
	/// the txhashset after fast-sync or a schema migration.
	pub fn clear_output_pos(&self) -> Result<(), Error> {
		let iter: SerIterator<OutputPos> = self.db.iter(&[COMMIT_POS_PREFIX])?;
		for (key, _) in iter {
			self.db.delete(&key)?;
		}
		Ok(())
	}

	/// Save the bitmap of output MMR positions spent by the given block.
	pub fn save_block_input_bitmap(&self, bh: &Hash, bm: &Bitmap) -> Result<(), Error> {
		self.db.put(
			&to_key(BLOCK_INPUT_BITMAP_PREFIX, &mut bh.to_vec())[..],
			&bm.serialize(),
		)?;
		Ok(())
	}

	/// Get the block input bitmap for the given block hash.
	pub fn get_block_input_bitmap(&self, bh: &Hash) -> Result<Bitmap, Error> {
		if let Some(bytes) = self
			.db
			.get(&to_key(BLOCK_INPUT_BITMAP_PREFIX, &mut bh.to_vec()))?
		{
			Ok(Bitmap::deserialize(&bytes))
		} else {
			Err(Error::NotFoundErr(format!("Block input bitmap: {}", bh)))
		}
	}

	/// Current schema version of the db contents.
	pub fn get_db_version(&self) -> Result<u8, Error> {
		let res: Result<Option<u8>, Error> = self.db.get_ser(&[DB_VERSION_KEY]);
		Ok(res?.unwrap_or(1))
	}

	/// Stamp the db with a schema version.
	pub fn save_db_version(&self, version: u8) -> Result<(), Error> {
		self.db.put_ser(&[DB_VERSION_KEY], &version)?;
		Ok(())
	}

	/// An iterator over all full blocks in the db.
	/// Used by the v3 migration to re-encode block bodies.
	pub fn blocks_iter(&self) -> Result<SerIterator<Block>, Error> {
		self.db.iter(&[BLOCK_PREFIX])
	}

	/// Commits this batch. If it's a child batch, it will be merged with the
	/// parent, otherwise the batch is written to db.
	pub fn commit(self) -> Result<(), Error> {
		self.db.commit()?;
		Ok(())
	}

	/// Creates a child of this batch. It will be merged with its parent on
	/// commit, abandoned otherwise.
	pub fn child(&mut self) -> Result<Batch<'_>, Error> {
		Ok(Batch {
			db: self.db.child()?,
		})
	}
}

/// An iterator on blocks, from latest to earliest, specialized to return
/// information pertaining to block difficulty calculation (timestamp and
/// previous difficulties). Mostly used by the consensus next difficulty
/// calculation.
pub struct DifficultyIter<'a> {
	start: Hash,
	store: Option<Arc<ChainStore>>,
	batch: Option<&'a Batch<'a>>,

	// maintain state for both the "next" header in this iteration
	// and its previous header in the chain ("next next" in the iteration)
	// so we effectively read-ahead as we iterate through the chain back
	// toward the genesis block (while maintaining current state)
	header: Option<BlockHeader>,
	prev_header: Option<BlockHeader>,
}

impl<'a> DifficultyIter<'a> {
	/// Build a new iterator using the provided chain store and starting from
	/// the provided block hash.
	pub fn from(start: Hash, store: Arc<ChainStore>) -> DifficultyIter<'a> {
		DifficultyIter {
			start,
			store: Some(store),
			batch: None,
			header: None,
			prev_header: None,
		}
	}

	/// Build a new iterator using the provided chain store batch and
	/// starting from the provided block hash.
	pub fn from_batch(start: Hash, batch: &'a Batch<'a>) -> DifficultyIter<'a> {
		DifficultyIter {
			start,
			store: None,
			batch: Some(batch),
			header: None,
			prev_header: None,
		}
	}

	fn get_header(&self, hash: &Hash) -> Option<BlockHeader> {
		if let Some(ref batch) = self.batch {
			batch.get_block_header(hash).ok()
		} else if let Some(ref store) = self.store {
			store.get_block_header(hash).ok()
		} else {
			None
		}
	}
}

impl<'a> Iterator for DifficultyIter<'a> {
	type Item = HeaderInfo;

	fn next(&mut self) -> Option<Self::Item> {
		// Get both header and previous_header if this is the initial iteration.
		// Otherwise move prev_header to header and get the next prev_header.
		self.header = if self.header.is_none() {
			self.get_header(&self.start)
		} else {
			self.prev_header.clone()
		};

		// If we have a header we can do this iteration.
		// Otherwise we are done.
		if let Some(header) = self.header.clone() {
			self.prev_header = self.get_header(&header.prev_hash);

			let prev_difficulty = self
				.prev_header
				.clone()
				.map_or(Difficulty::zero(), |x| x.total_difficulty());
			let difficulty = header.total_difficulty() - prev_difficulty;
			let scaling = header.pow.secondary_scaling;

			Some(HeaderInfo::new(
				header.timestamp.timestamp() as u64,
				difficulty,
				scaling,
				header.pow.is_secondary(),
			))
		} else {
			None
		}
	}
}
