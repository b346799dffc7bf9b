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

//! Persistent MMR over block header hashes. Each header commits to the root
//! of the MMR of all previous headers via its prev_root, so this structure
//! is what header validation checks prev_root against. It is rewound and
//! re-extended freely while headers sync, independently of the txhashset.

use std::path::Path;

use croaring::Bitmap;

use crate::core::core::hash::Hash;
use crate::core::core::pmmr::{self, ReadonlyPMMR, PMMR};
use crate::core::core::BlockHeader;
use crate::error::{Error, ErrorKind};
use crate::store::pmmr::PMMRBackend;

const HEADER_SUBDIR: &str = "header";

/// MMR size for the given number of leaves (headers).
fn mmr_size(num_headers: u64) -> u64 {
	if num_headers == 0 {
		return 0;
	}
	2 * num_headers - num_headers.count_ones() as u64
}

/// The persistent header MMR. Non-prunable, every header hash since genesis
/// is a leaf.
pub struct HeaderMMR {
	backend: PMMRBackend<BlockHeader>,
	last_pos: u64,
}

impl HeaderMMR {
	/// Open (or create) the header MMR under the given root directory.
	pub fn open<P: AsRef<Path>>(root_dir: P) -> Result<HeaderMMR, Error> {
		let path = root_dir.as_ref().join(HEADER_SUBDIR);
		std::fs::create_dir_all(&path)?;
		let backend = PMMRBackend::new(&path, false, None)?;
		let last_pos = backend.unpruned_size();
		Ok(HeaderMMR { backend, last_pos })
	}

	/// Current size of the MMR (in positions, not headers).
	pub fn size(&self) -> u64 {
		self.last_pos
	}

	/// Number of headers currently in the MMR.
	pub fn num_headers(&self) -> u64 {
		pmmr::n_leaves(self.last_pos)
	}

	/// Append a header to the MMR.
	pub fn apply_header(&mut self, header: &BlockHeader) -> Result<(), Error> {
		let mut pmmr = PMMR::at(&mut self.backend, self.last_pos);
		pmmr.push(header)
			.map_err(|e| ErrorKind::TxHashSetErr(e))?;
		self.last_pos = pmmr.unpruned_size();
		Ok(())
	}

	/// Rewind the MMR so it contains exactly the headers up to and including
	/// the given height.
	pub fn rewind_to_height(&mut self, height: u64) -> Result<(), Error> {
		let pos = pmmr::insertion_to_pmmr_index(height + 1);
		let mut pmmr: PMMR<'_, BlockHeader, _> = PMMR::at(&mut self.backend, self.last_pos);
		pmmr.rewind(pos, &Bitmap::create())
			.map_err(|e| ErrorKind::TxHashSetErr(e))?;
		self.last_pos = pmmr.unpruned_size();
		Ok(())
	}

	/// Root of the MMR in its current state. This is what the prev_root of a
	/// header extending the current chain must equal.
	pub fn root(&self) -> Hash {
		ReadonlyPMMR::<'_, BlockHeader, _>::at(&self.backend, self.last_pos).root()
	}

	/// Root of the MMR as it was when it contained exactly the headers
	/// 0..=height. Requires the MMR to currently reach at least that far.
	pub fn root_at_height(&self, height: u64) -> Result<Hash, Error> {
		let size = mmr_size(height + 1);
		if size > self.last_pos {
			return Err(ErrorKind::Other(format!(
				"header mmr too short for root at height {}",
				height
			))
			.into());
		}
		Ok(ReadonlyPMMR::<'_, BlockHeader, _>::at(&self.backend, size).root())
	}

	/// Hash of the header at the given height, straight from the MMR data
	/// file.
	pub fn get_header_hash(&self, height: u64) -> Option<Hash> {
		let pos = pmmr::insertion_to_pmmr_index(height + 1);
		ReadonlyPMMR::<'_, BlockHeader, _>::at(&self.backend, self.last_pos)
			.get_data(pos)
			.map(|entry| entry.hash())
	}

	/// Flush the MMR files to disk, making all appended headers permanent.
	pub fn commit(&mut self) -> Result<(), Error> {
		self.backend.sync()?;
		Ok(())
	}

	/// Discard any uncommitted changes, restoring the last committed state.
	pub fn rollback(&mut self) {
		self.backend.discard();
		self.last_pos = self.backend.unpruned_size();
	}

	/// Truncate the MMR back to empty, then re-apply every header hash on
	/// the provided chain. Used by chain resync and header-MMR rebuilds.
	pub fn rebuild(&mut self, headers: &[BlockHeader]) -> Result<(), Error> {
		debug!("header_mmr: rebuilding from {} headers", headers.len());

		let mut pmmr: PMMR<'_, BlockHeader, _> = PMMR::at(&mut self.backend, self.last_pos);
		pmmr.truncate().map_err(|e| ErrorKind::TxHashSetErr(e))?;
		self.last_pos = 0;

		for header in headers {
			self.apply_header(header)?;
		}
		self.commit()?;
		Ok(())
	}

	/// Validate the prev_root of the header against the current root of the
	/// MMR. The genesis header has no prev_root.
	pub fn validate_prev_root(&self, header: &BlockHeader) -> Result<(), Error> {
		if header.height == 0 {
			return Ok(());
		}
		if self.root() != header.prev_root {
			return Err(ErrorKind::InvalidRoot.into());
		}
		Ok(())
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn test_mmr_size() {
		assert_eq!(mmr_size(0), 0);
		assert_eq!(mmr_size(1), 1);
		assert_eq!(mmr_size(2), 3);
		assert_eq!(mmr_size(3), 4);
		assert_eq!(mmr_size(4), 7);
		assert_eq!(mmr_size(8), 15);
	}
}
