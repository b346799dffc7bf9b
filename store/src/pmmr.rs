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

//! Implementation of the persistent Backend for the prunable MMR tree.

use std::path::{Path, PathBuf};
use std::{fs, io};

use croaring::Bitmap;

use crate::core::core::hash::{Hash, Hashed};
use crate::core::core::pmmr::{self, family, Backend};
use crate::core::core::BlockHeader;
use crate::core::ser::PMMRable;
use crate::leaf_set::LeafSet;
use crate::prune_list::PruneList;
use crate::types::DataFile;

const PMMR_HASH_FILE: &str = "pmmr_hash.bin";
const PMMR_DATA_FILE: &str = "pmmr_data.bin";
const PMMR_LEAF_FILE: &str = "pmmr_leaf.bin";
const PMMR_PRUN_FILE: &str = "pmmr_prun.bin";

/// PMMR persistent backend implementation. Relies on multiple facilities to
/// handle writing, reading and pruning.
///
/// * A main storage file appends Hash instances as they come.
/// This AppendOnlyFile is also backed by a mmap for reads.
/// * An in-memory backend buffers the latest batch of writes to ensure the
/// PMMR can always read recent values even if they haven't been flushed to
/// disk yet.
/// * A leaf_set tracks unpruned (unremoved) leaf positions in the MMR.
/// * A prune_list tracks the positions of pruned (and compacted) roots in
/// the MMR.
pub struct PMMRBackend<T: PMMRable> {
	data_dir: PathBuf,
	prunable: bool,
	hash_file: DataFile<Hash>,
	data_file: DataFile<T::E>,
	leaf_set: LeafSet,
	prune_list: PruneList,
}

impl<T: PMMRable> Backend<T> for PMMRBackend<T> {
	/// Append the provided data and hashes to the backend storage.
	/// Add the new leaf pos to our leaf_set if this is a prunable MMR.
	fn append(&mut self, data: &T, hashes: Vec<Hash>) -> Result<(), String> {
		let size = self
			.data_file
			.append(&data.as_elmt())
			.map_err(|e| format!("Failed to append data to file. {}", e))?;

		for h in &hashes {
			self.hash_file
				.append(h)
				.map_err(|e| format!("Failed to append hash to file. {}", e))?;
		}

		if self.prunable {
			// (Re)calculate the latest pos given updated size of data file
			// and the total leaf_shift, and add to our leaf_set.
			let pos =
				pmmr::insertion_to_pmmr_index(size + self.prune_list.get_total_leaf_shift());
			self.leaf_set.add(pos);
		}

		Ok(())
	}

	fn get_from_file(&self, position: u64) -> Option<Hash> {
		if self.is_compacted(position) {
			return None;
		}
		let shift = self.prune_list.get_shift(position);
		self.hash_file.read(position - shift)
	}

	fn get_data_from_file(&self, position: u64) -> Option<T::E> {
		if !pmmr::is_leaf(position) {
			return None;
		}
		if self.is_compacted(position) {
			return None;
		}
		let flatfile_pos = pmmr::n_leaves(position);
		let shift = self.prune_list.get_leaf_shift(position);
		self.data_file.read(flatfile_pos - shift)
	}

	/// Get the hash at pos.
	/// Return None if pos is a leaf and it has been removed (or pruned or
	/// compacted).
	fn get_hash(&self, pos: u64) -> Option<Hash> {
		if self.prunable && pmmr::is_leaf(pos) && !self.leaf_set.includes(pos) {
			return None;
		}
		self.get_from_file(pos)
	}

	/// Get the data at pos.
	/// Return None if it has been removed or if pos is not a leaf node.
	fn get_data(&self, pos: u64) -> Option<T::E> {
		if !pmmr::is_leaf(pos) {
			return None;
		}
		if self.prunable && !self.leaf_set.includes(pos) {
			return None;
		}
		self.get_data_from_file(pos)
	}

	/// Rewind the PMMR backend to the given position.
	fn rewind(&mut self, position: u64, rewind_rm_pos: &Bitmap) -> Result<(), String> {
		// First rewind the leaf_set with the necessary added and removed
		// positions.
		if self.prunable {
			self.leaf_set.rewind(position, rewind_rm_pos);
		}

		// Rewind the hash file accounting for pruned/compacted pos
		let shift = self.prune_list.get_shift(position);
		self.hash_file.rewind(position - shift);

		// Rewind the data file accounting for pruned/compacted pos
		let leaf_shift = self.prune_list.get_leaf_shift(position);
		let flatfile_pos = pmmr::n_leaves(position);
		self.data_file.rewind(flatfile_pos - leaf_shift);

		Ok(())
	}

	/// Remove by insertion position.
	fn remove(&mut self, pos: u64) -> Result<(), String> {
		assert!(self.prunable, "Remove on non-prunable MMR");
		self.leaf_set.remove(pos);
		Ok(())
	}

	/// Returns an iterator over all the leaf positions.
	/// For a prunable PMMR this is just the leaf_set bitmap.
	fn leaf_pos_iter(&self) -> Box<dyn Iterator<Item = u64> + '_> {
		if self.prunable {
			Box::new(self.leaf_set.iter())
		} else {
			let size = self.unpruned_size();
			Box::new((1..=size).filter(|x| pmmr::is_leaf(*x)))
		}
	}

	fn n_unpruned_leaves(&self) -> u64 {
		if self.prunable {
			self.leaf_set.len() as u64
		} else {
			pmmr::n_leaves(self.unpruned_size())
		}
	}

	/// Rewind the leaf file to a previous state and write it out under the
	/// block hash derived name, for inclusion in the fast-sync archive.
	fn snapshot(&self, header: &BlockHeader) -> Result<(), String> {
		self.leaf_set
			.snapshot(header)
			.map_err(|_| format!("Failed to save copy of leaf_set for {}", header.hash()))?;
		Ok(())
	}

	fn dump_stats(&self) {
		debug!(
			"pmmr backend: unpruned: {}, hashes: {}, data: {}, leaf_set: {}, prune_list: {}",
			self.unpruned_size(),
			self.hash_size(),
			self.data_size(),
			self.leaf_set.len(),
			self.prune_list.len(),
		);
	}
}

impl<T: PMMRable> PMMRBackend<T> {
	/// Instantiates a new PMMR backend.
	/// If a header is provided, the leaf file is first replaced with the
	/// snapshot file tagged with that header's hash (fast-sync ingest).
	pub fn new<P: AsRef<Path>>(
		data_dir: P,
		prunable: bool,
		header: Option<&BlockHeader>,
	) -> io::Result<PMMRBackend<T>> {
		let data_dir = data_dir.as_ref().to_path_buf();

		// Are we dealing with a new file or an existing one?
		if let Some(header) = header {
			// Rewind the leaf file to the provided header, replacing the
			// main leaf file with the rewound snapshot copy.
			let leaf_snapshot_path =
				format!("{}.{}", data_dir.join(PMMR_LEAF_FILE).display(), header.hash());
			LeafSet::copy_snapshot(
				data_dir.join(PMMR_LEAF_FILE),
				PathBuf::from(leaf_snapshot_path),
			)?;
		}

		let hash_file = DataFile::open(data_dir.join(PMMR_HASH_FILE))?;
		let data_file = DataFile::open(data_dir.join(PMMR_DATA_FILE))?;
		let leaf_set = LeafSet::open(data_dir.join(PMMR_LEAF_FILE))?;
		let prune_list = PruneList::open(data_dir.join(PMMR_PRUN_FILE))?;

		Ok(PMMRBackend {
			data_dir,
			prunable,
			hash_file,
			data_file,
			leaf_set,
			prune_list,
		})
	}

	fn is_pruned(&self, pos: u64) -> bool {
		self.prune_list.is_pruned(pos)
	}

	fn is_pruned_root(&self, pos: u64) -> bool {
		self.prune_list.is_pruned_root(pos)
	}

	fn is_compacted(&self, pos: u64) -> bool {
		self.is_pruned(pos) && !self.is_pruned_root(pos)
	}

	/// Total size of the PMMR, accounting for any pruning that has occurred
	/// (pruned and compacted nodes still count toward the size).
	pub fn unpruned_size(&self) -> u64 {
		self.hash_size() + self.prune_list.get_total_shift()
	}

	/// Number of hashes in the hash file (unflushed included).
	pub fn hash_size(&self) -> u64 {
		self.hash_file.size_unsync()
	}

	/// Number of elements in the data file (unflushed included).
	pub fn data_size(&self) -> u64 {
		self.data_file.size_unsync()
	}

	/// Syncs all files to disk. A call to sync is required to ensure all the
	/// data has been successfully written to disk.
	pub fn sync(&mut self) -> io::Result<()> {
		self.hash_file.flush()?;
		self.data_file.flush()?;
		if self.prunable {
			self.leaf_set.flush()?;
		}
		Ok(())
	}

	/// Discard the current, non synced state of the backend.
	pub fn discard(&mut self) {
		self.hash_file.discard();
		self.data_file.discard();
		if self.prunable {
			self.leaf_set.discard();
		}
	}

	/// Release underlying file handles.
	pub fn release_files(&mut self) {
		self.hash_file.release();
		self.data_file.release();
	}

	/// Number of elements in the underlying data file.
	pub fn data_file_size(&self) -> u64 {
		self.data_file.size()
	}

	/// Data file path of the underlying file.
	pub fn data_file_path(&self) -> &Path {
		self.data_file.path()
	}

	/// Directory holding this backend's set of files.
	pub fn data_dir(&self) -> &Path {
		&self.data_dir
	}

	/// Checks the length of the remove log to see if it should get compacted.
	/// If so, the remove log is flushed into the pruned list, which itself
	/// gets saved, and the hash and data files are rewritten, cutting the
	/// removed data.
	///
	/// A cutoff position limits compaction on recent data.
	/// This will be the last position of a particular block to keep the
	/// ability to roll back a few blocks.
	pub fn check_compact(&mut self, cutoff_pos: u64, rewind_rm_pos: &Bitmap) -> io::Result<bool> {
		assert!(self.prunable, "Trying to compact a non-prunable PMMR");

		// Calculate the sets of leaf positions and node positions to remove
		// based on the cutoff_pos provided.
		let (leaves_removed, pos_to_rm) = self.pos_to_rm(cutoff_pos, rewind_rm_pos);

		// 1. Save compact copy of the hash file, skipping removed hashes.
		{
			let renumbered: Vec<u64> = pos_to_rm
				.iter()
				.map(|pos| {
					let shift = self.prune_list.get_shift(pos as u64);
					pos as u64 - shift
				})
				.collect();
			self.hash_file.save_prune(&renumbered)?;
		}

		// 2. Save compact copy of the data file, skipping removed leaves.
		{
			let leaf_pos_to_rm: Vec<u64> = pos_to_rm
				.iter()
				.map(|x| x as u64)
				.filter(|x| pmmr::is_leaf(*x))
				.collect();

			let renumbered: Vec<u64> = leaf_pos_to_rm
				.iter()
				.map(|&pos| {
					let flat_pos = pmmr::n_leaves(pos);
					let shift = self.prune_list.get_leaf_shift(pos);
					flat_pos - shift
				})
				.collect();
			self.data_file.save_prune(&renumbered)?;
		}

		// 3. Update the prune list and write to disk.
		{
			for pos in leaves_removed.iter() {
				self.prune_list.add(pos as u64);
			}
			self.prune_list.flush()?;
		}

		// 4. Write the leaf_set to disk.
		// Optimize the bitmap storage in the process.
		self.leaf_set.flush()?;

		Ok(true)
	}

	fn pos_to_rm(&self, cutoff_pos: u64, rewind_rm_pos: &Bitmap) -> (Bitmap, Bitmap) {
		let mut expanded = Bitmap::create();

		let leaf_pos_to_rm =
			self.leaf_set
				.removed_pre_cutoff(cutoff_pos, rewind_rm_pos, &self.prune_list);

		for x in leaf_pos_to_rm.iter() {
			expanded.add(x);
			let mut current = x as u64;
			loop {
				let (parent, sibling) = family(current);
				let sibling_pruned = self.is_pruned_root(sibling);

				// if sibling previously pruned
				// push it back onto list of pos to remove
				// so we can remove it and traverse up to parent
				if sibling_pruned {
					expanded.add(sibling as u32);
				}

				if sibling_pruned || expanded.contains(sibling as u32) {
					expanded.add(parent as u32);
					current = parent;
				} else {
					break;
				}
			}
		}
		(leaf_pos_to_rm, removed_excl_roots(&expanded))
	}
}

/// Filter the provided set of positions down to the ones with a parent in the
/// set, i.e. excluding the roots of the newly pruned subtrees (those stay on
/// disk).
fn removed_excl_roots(removed: &Bitmap) -> Bitmap {
	removed
		.iter()
		.filter(|pos| {
			let (parent_pos, _) = family(*pos as u64);
			removed.contains(parent_pos as u32)
		})
		.collect()
}

/// Deletes stale snapshot/temp files in the provided directory matching the
/// given prefix and older than the max age in seconds.
pub fn clean_files_by_prefix<P: AsRef<Path>>(
	path: P,
	prefix_to_delete: &str,
	max_age_seconds: u64,
) -> io::Result<u32> {
	let now = std::time::SystemTime::now();
	let mut removed = 0;
	for entry in fs::read_dir(path)? {
		let entry = entry?;
		if !entry.file_type()?.is_file() {
			continue;
		}
		let f_name = entry.file_name();
		let f_name = f_name.to_string_lossy();
		if !f_name.starts_with(prefix_to_delete) {
			continue;
		}
		let modified = entry.metadata()?.modified()?;
		if let Ok(age) = now.duration_since(modified) {
			if age.as_secs() > max_age_seconds {
				if fs::remove_file(entry.path()).is_ok() {
					removed += 1;
				}
			}
		}
	}
	Ok(removed)
}
