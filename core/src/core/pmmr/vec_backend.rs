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

//! Simple in-memory backend, mostly for testing the MMR without dragging
//! file storage in.

use std::convert::TryFrom;

use croaring::Bitmap;

use crate::core::hash::Hash;
use crate::core::pmmr::{self, Backend};
use crate::core::BlockHeader;
use crate::ser::PMMRable;

/// Simple/minimal/naive MMR backend implementation backed by Vec<T> and
/// Vec<Hash>. Removed pos are maintained in a HashSet<u64>.
#[derive(Clone, Debug)]
pub struct VecBackend<T: PMMRable> {
	/// Backend elements
	pub data: Vec<T::E>,
	/// Backend hashes (all positions, including parents)
	pub hashes: Vec<Hash>,
	/// Positions of removed elements
	pub removed: Vec<u64>,
}

impl<T: PMMRable> Backend<T> for VecBackend<T> {
	fn append(&mut self, data: &T, hashes: Vec<Hash>) -> Result<(), String> {
		self.data.push(data.as_elmt());
		self.hashes.extend(hashes);
		Ok(())
	}

	fn get_hash(&self, position: u64) -> Option<Hash> {
		if self.removed.contains(&position) {
			None
		} else {
			self.get_from_file(position)
		}
	}

	fn get_data(&self, position: u64) -> Option<T::E> {
		if self.removed.contains(&position) {
			None
		} else {
			self.get_data_from_file(position)
		}
	}

	fn get_from_file(&self, position: u64) -> Option<Hash> {
		let idx = usize::try_from(position).unwrap();
		self.hashes.get(idx - 1).cloned()
	}

	fn get_data_from_file(&self, position: u64) -> Option<T::E> {
		let idx = usize::try_from(pmmr::n_leaves(position)).unwrap();
		self.data.get(idx - 1).cloned()
	}

	fn remove(&mut self, position: u64) -> Result<(), String> {
		self.removed.push(position);
		Ok(())
	}

	fn rewind(&mut self, position: u64, _rewind_rm_pos: &Bitmap) -> Result<(), String> {
		let idx = pmmr::n_leaves(position);
		self.data.truncate(idx as usize);
		self.hashes.truncate(position as usize);
		self.removed.retain(|&pos| pos <= position);
		Ok(())
	}

	fn leaf_pos_iter(&self) -> Box<dyn Iterator<Item = u64> + '_> {
		Box::new(
			(1..=self.hashes.len() as u64)
				.filter(move |x| pmmr::is_leaf(*x) && !self.removed.contains(x)),
		)
	}

	fn n_unpruned_leaves(&self) -> u64 {
		self.leaf_pos_iter().count() as u64
	}

	fn snapshot(&self, _header: &BlockHeader) -> Result<(), String> {
		Ok(())
	}

	fn dump_stats(&self) {}
}

impl<T: PMMRable> VecBackend<T> {
	/// Instantiates a new empty vec backend.
	pub fn new() -> VecBackend<T> {
		VecBackend {
			data: vec![],
			hashes: vec![],
			removed: vec![],
		}
	}

	/// Current number of hashes in the backend (i.e. the MMR size).
	pub fn size(&self) -> u64 {
		self.hashes.len() as u64
	}
}
