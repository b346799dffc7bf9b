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

//! The sync, candidate and confirmed chains, sharing a single pool of block
//! indices. An index knows which chains it belongs to via a membership
//! bitmask and is evicted from the pool once no chain references it.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};

use crate::core::core::hash::Hash;
use crate::core::ser::{BinReader, BinWriter, Readable, Reader, Writeable, Writer};
use crate::error::{Error, ErrorKind};
use crate::store::save_via_temp_file;

/// The named chains tracked by the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainType {
	/// Provisional chain used while batches of headers are downloaded and
	/// validated.
	Sync,
	/// The most-work chain of fully validated headers.
	Candidate,
	/// The chain of blocks whose full bodies have been validated and applied
	/// to the txhashset.
	Confirmed,
}

impl ChainType {
	fn mask(self) -> u8 {
		match self {
			ChainType::Sync => 0b001,
			ChainType::Candidate => 0b010,
			ChainType::Confirmed => 0b100,
		}
	}

	fn file_name(self) -> &'static str {
		match self {
			ChainType::Sync => "sync.chain",
			ChainType::Candidate => "candidate.chain",
			ChainType::Confirmed => "confirmed.chain",
		}
	}
}

/// A block index in the shared pool: its hash, height and the set of chains
/// it is currently a member of. Safe to evict only when no chain holds it.
#[derive(Debug, Clone)]
struct BlockIndex {
	height: u64,
	mask: u8,
}

/// An ordered sequence of block hashes indexed by height, backed by its own
/// file on disk. hashes[i] is the block at height i, hashes[0] is genesis.
struct Chain {
	chain_type: ChainType,
	path: PathBuf,
	hashes: Vec<Hash>,
	// last flushed image, restored on discard
	hashes_bak: Vec<Hash>,
}

impl Chain {
	fn new(chain_type: ChainType, chain_dir: &Path, genesis_hash: Hash) -> Chain {
		Chain {
			chain_type,
			path: chain_dir.join(chain_type.file_name()),
			hashes: vec![genesis_hash],
			hashes_bak: vec![genesis_hash],
		}
	}

	/// Load the (height -> hash) list from this chain's file, if it exists.
	fn load(&mut self) -> io::Result<()> {
		if !self.path.exists() {
			return Ok(());
		}
		let file = File::open(&self.path)?;
		let mut reader = BufReader::new(file);
		let mut bin_reader = BinReader::new(&mut reader);

		let to_io_err = |e| io::Error::new(io::ErrorKind::InvalidData, format!("{}", e));

		let count = bin_reader.read_u64().map_err(to_io_err)?;
		let mut hashes = Vec::with_capacity(count as usize);
		for _ in 0..count {
			hashes.push(Hash::read(&mut bin_reader).map_err(to_io_err)?);
		}
		if !hashes.is_empty() {
			self.hashes = hashes.clone();
			self.hashes_bak = hashes;
		}
		Ok(())
	}

	/// Write the (height -> hash) list out to this chain's file.
	fn flush(&mut self) -> io::Result<()> {
		let hashes = &self.hashes;
		save_via_temp_file(&self.path, ".tmp", |w| {
			let mut writer = BufWriter::new(w);
			let mut bin_writer = BinWriter::new(&mut writer);
			bin_writer
				.write_u64(hashes.len() as u64)
				.map_err(|e| io::Error::new(io::ErrorKind::Other, format!("{}", e)))?;
			for hash in hashes.iter() {
				hash.write(&mut bin_writer)
					.map_err(|e| io::Error::new(io::ErrorKind::Other, format!("{}", e)))?;
			}
			Ok(())
		})?;
		self.hashes_bak = self.hashes.clone();
		Ok(())
	}

	fn discard(&mut self) {
		self.hashes = self.hashes_bak.clone();
	}

	fn tip_height(&self) -> u64 {
		(self.hashes.len() - 1) as u64
	}

	fn tip_hash(&self) -> Hash {
		*self.hashes.last().expect("chain never empty")
	}

	fn get_hash(&self, height: u64) -> Option<Hash> {
		self.hashes.get(height as usize).cloned()
	}
}

/// The three chains over the shared pool of block indices. All mutation goes
/// through here so membership masks stay consistent with chain contents.
pub struct ChainSet {
	indices: HashMap<Hash, BlockIndex>,
	sync: Chain,
	candidate: Chain,
	confirmed: Chain,
}

impl ChainSet {
	/// Create the three chains rooted at the genesis hash, loading any
	/// previously flushed chain files from the provided directory.
	pub fn new(chain_dir: &Path, genesis_hash: Hash) -> Result<ChainSet, Error> {
		std::fs::create_dir_all(chain_dir)?;

		let mut sync = Chain::new(ChainType::Sync, chain_dir, genesis_hash);
		let mut candidate = Chain::new(ChainType::Candidate, chain_dir, genesis_hash);
		let mut confirmed = Chain::new(ChainType::Confirmed, chain_dir, genesis_hash);

		sync.load()?;
		candidate.load()?;
		confirmed.load()?;

		let mut set = ChainSet {
			indices: HashMap::new(),
			sync,
			candidate,
			confirmed,
		};
		set.rebuild_indices();
		Ok(set)
	}

	// Build the index pool from the three loaded chains.
	fn rebuild_indices(&mut self) {
		self.indices.clear();
		for chain_type in &[ChainType::Sync, ChainType::Candidate, ChainType::Confirmed] {
			let chain = self.chain(*chain_type);
			let entries: Vec<(Hash, u64)> = chain
				.hashes
				.iter()
				.enumerate()
				.map(|(height, hash)| (*hash, height as u64))
				.collect();
			for (hash, height) in entries {
				let entry = self
					.indices
					.entry(hash)
					.or_insert(BlockIndex { height, mask: 0 });
				entry.mask |= chain_type.mask();
			}
		}
	}

	fn chain(&self, chain_type: ChainType) -> &Chain {
		match chain_type {
			ChainType::Sync => &self.sync,
			ChainType::Candidate => &self.candidate,
			ChainType::Confirmed => &self.confirmed,
		}
	}

	fn chain_mut(&mut self, chain_type: ChainType) -> &mut Chain {
		match chain_type {
			ChainType::Sync => &mut self.sync,
			ChainType::Candidate => &mut self.candidate,
			ChainType::Confirmed => &mut self.confirmed,
		}
	}

	/// Height of the tip of the given chain.
	pub fn height(&self, chain_type: ChainType) -> u64 {
		self.chain(chain_type).tip_height()
	}

	/// Hash of the tip of the given chain.
	pub fn tip_hash(&self, chain_type: ChainType) -> Hash {
		self.chain(chain_type).tip_hash()
	}

	/// Hash at the given height on the given chain, if the chain reaches
	/// that far.
	pub fn get_hash(&self, chain_type: ChainType, height: u64) -> Option<Hash> {
		self.chain(chain_type).get_hash(height)
	}

	/// Is the given (hash, height) pair a member of the given chain?
	pub fn is_on_chain(&self, chain_type: ChainType, hash: Hash, height: u64) -> bool {
		self.chain(chain_type).get_hash(height) == Some(hash)
	}

	/// Append a new block index to the given chain. The new index must chain
	/// onto the current tip.
	pub fn extend(
		&mut self,
		chain_type: ChainType,
		hash: Hash,
		height: u64,
	) -> Result<(), Error> {
		let chain = self.chain_mut(chain_type);
		if height != chain.tip_height() + 1 {
			return Err(ErrorKind::Other(format!(
				"cannot extend {:?} chain at height {}, tip at {}",
				chain_type,
				height,
				chain.tip_height()
			))
			.into());
		}
		chain.hashes.push(hash);

		let entry = self
			.indices
			.entry(hash)
			.or_insert(BlockIndex { height, mask: 0 });
		entry.mask |= chain_type.mask();
		Ok(())
	}

	/// Copy the block at the given height from the source chain onto the tip
	/// of the destination chain. Requires the destination tip to sit directly
	/// beneath it.
	pub fn copy_block(
		&mut self,
		source: ChainType,
		destination: ChainType,
		height: u64,
	) -> Result<(), Error> {
		let hash = self
			.chain(source)
			.get_hash(height)
			.ok_or_else(|| ErrorKind::Other(format!("no block at height {}", height)))?;
		if self.chain(destination).tip_height() + 1 != height {
			return Err(ErrorKind::Other(format!(
				"destination {:?} tip not at height {}",
				destination,
				height - 1
			))
			.into());
		}
		self.extend(destination, hash, height)
	}

	/// Truncate the given chain back to the provided height. Indices whose
	/// membership mask becomes empty are evicted from the pool.
	pub fn rewind(&mut self, chain_type: ChainType, height: u64) -> Result<(), Error> {
		let removed: Vec<Hash> = {
			let chain = self.chain_mut(chain_type);
			if chain.tip_height() < height {
				return Err(ErrorKind::Other(format!(
					"cannot rewind {:?} chain to height {}, tip at {}",
					chain_type,
					height,
					chain.tip_height()
				))
				.into());
			}
			chain.hashes.split_off((height + 1) as usize)
		};

		for hash in removed {
			if let Some(entry) = self.indices.get_mut(&hash) {
				entry.mask &= !chain_type.mask();
				if entry.mask == 0 {
					self.indices.remove(&hash);
				}
			}
		}
		Ok(())
	}

	/// Find the height of the highest common block of the two chains, walking
	/// both downward from the lower of the two tips until the hashes match.
	pub fn find_common_height(&self, a: ChainType, b: ChainType) -> u64 {
		let chain_a = self.chain(a);
		let chain_b = self.chain(b);

		let mut height = std::cmp::min(chain_a.tip_height(), chain_b.tip_height());
		while height > 0 {
			if chain_a.get_hash(height) == chain_b.get_hash(height) {
				break;
			}
			height -= 1;
		}
		height
	}

	/// Reorganize the destination chain onto the source chain up to the given
	/// height: rewind the destination to the common ancestor then copy the
	/// source blocks over.
	pub fn reorg(
		&mut self,
		source: ChainType,
		destination: ChainType,
		height: u64,
	) -> Result<(), Error> {
		if self.chain(source).tip_height() < height {
			return Err(ErrorKind::Other(format!(
				"{:?} chain too short for reorg to {}",
				source, height
			))
			.into());
		}

		let common_height = self.find_common_height(source, destination);
		self.rewind(destination, common_height)?;
		for h in (common_height + 1)..=height {
			self.copy_block(source, destination, h)?;
		}
		Ok(())
	}

	/// Persist all three chains to their files.
	pub fn flush(&mut self) -> Result<(), Error> {
		self.sync.flush()?;
		self.candidate.flush()?;
		self.confirmed.flush()?;
		Ok(())
	}

	/// Discard any unflushed changes, restoring the last flushed image.
	pub fn discard(&mut self) {
		self.sync.discard();
		self.candidate.discard();
		self.confirmed.discard();
		self.rebuild_indices();
	}

	/// Number of entries in the shared index pool, for sanity checks.
	pub fn index_count(&self) -> usize {
		self.indices.len()
	}

	/// Height of the index with the given hash, if any chain references it.
	pub fn index_height(&self, hash: &Hash) -> Option<u64> {
		self.indices.get(hash).map(|x| x.height)
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::core::core::hash::Hashed;
	use tempfile::TempDir;

	fn hash_for(n: u64) -> Hash {
		n.hash()
	}

	fn chain_set(dir: &Path) -> ChainSet {
		ChainSet::new(dir, hash_for(0)).unwrap()
	}

	#[test]
	fn extend_and_rewind() {
		let dir = TempDir::new().unwrap();
		let mut set = chain_set(dir.path());

		assert_eq!(set.height(ChainType::Candidate), 0);
		set.extend(ChainType::Candidate, hash_for(1), 1).unwrap();
		set.extend(ChainType::Candidate, hash_for(2), 2).unwrap();
		assert_eq!(set.height(ChainType::Candidate), 2);
		assert_eq!(set.tip_hash(ChainType::Candidate), hash_for(2));

		// cannot skip a height
		assert!(set.extend(ChainType::Candidate, hash_for(4), 4).is_err());

		// indices for blocks on a single chain are evicted on rewind
		assert_eq!(set.index_count(), 3);
		set.rewind(ChainType::Candidate, 0).unwrap();
		assert_eq!(set.index_count(), 1);
		assert_eq!(set.height(ChainType::Candidate), 0);
	}

	#[test]
	fn shared_indices_survive_single_chain_rewind() {
		let dir = TempDir::new().unwrap();
		let mut set = chain_set(dir.path());

		set.extend(ChainType::Candidate, hash_for(1), 1).unwrap();
		set.extend(ChainType::Sync, hash_for(1), 1).unwrap();
		assert_eq!(set.index_count(), 2);

		// the index is still held by the sync chain after the candidate
		// rewind
		set.rewind(ChainType::Candidate, 0).unwrap();
		assert_eq!(set.index_count(), 2);
		assert!(set.is_on_chain(ChainType::Sync, hash_for(1), 1));

		set.rewind(ChainType::Sync, 0).unwrap();
		assert_eq!(set.index_count(), 1);
	}

	#[test]
	fn reorg_and_reorg_back() {
		let dir = TempDir::new().unwrap();
		let mut set = chain_set(dir.path());

		// candidate: genesis, a1, a2; confirmed: genesis, a1
		set.extend(ChainType::Candidate, hash_for(11), 1).unwrap();
		set.extend(ChainType::Candidate, hash_for(12), 2).unwrap();
		set.extend(ChainType::Confirmed, hash_for(11), 1).unwrap();

		// move the candidate to a competing fork b1, b2, b3
		set.rewind(ChainType::Candidate, 0).unwrap();
		set.extend(ChainType::Candidate, hash_for(21), 1).unwrap();
		set.extend(ChainType::Candidate, hash_for(22), 2).unwrap();
		set.extend(ChainType::Candidate, hash_for(23), 3).unwrap();

		// common ancestor of the two chains is genesis
		assert_eq!(
			set.find_common_height(ChainType::Candidate, ChainType::Confirmed),
			0
		);

		// reorg confirmed onto the candidate fork
		set.reorg(ChainType::Candidate, ChainType::Confirmed, 3)
			.unwrap();
		assert_eq!(set.height(ChainType::Confirmed), 3);
		assert_eq!(set.tip_hash(ChainType::Confirmed), hash_for(23));
		assert!(!set.is_on_chain(ChainType::Confirmed, hash_for(11), 1));

		// reorg in the other direction leaves both chains identical
		set.reorg(ChainType::Confirmed, ChainType::Candidate, 3)
			.unwrap();
		assert_eq!(set.tip_hash(ChainType::Candidate), hash_for(23));
		assert_eq!(
			set.find_common_height(ChainType::Candidate, ChainType::Confirmed),
			3
		);
	}

	#[test]
	fn flush_reload_discard() {
		let dir = TempDir::new().unwrap();
		{
			let mut set = chain_set(dir.path());
			set.extend(ChainType::Candidate, hash_for(1), 1).unwrap();
			set.flush().unwrap();

			// unflushed changes disappear on discard
			set.extend(ChainType::Candidate, hash_for(2), 2).unwrap();
			set.discard();
			assert_eq!(set.height(ChainType::Candidate), 1);
		}

		// reload from the flushed files
		let set = chain_set(dir.path());
		assert_eq!(set.height(ChainType::Candidate), 1);
		assert_eq!(set.tip_hash(ChainType::Candidate), hash_for(1));
		assert_eq!(set.height(ChainType::Confirmed), 0);
	}
}
