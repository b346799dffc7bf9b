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

//! Utility structs to handle the 3 MMRs (output, rangeproof, kernel) along
//! with the state they represent, conveniently and transactionally.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use croaring::Bitmap;
use crossbeam_utils::thread;

use crate::chain_store::{Batch, ChainStore, OutputPos};
use crate::core::core::committed::Committed;
use crate::core::core::hash::{Hash, Hashed};
use crate::core::core::pmmr::{self, ReadonlyPMMR, PMMR};
use crate::core::core::{
	Block, BlockHeader, Input, Output, OutputIdentifier, TxKernel,
};
use crate::core::global;
use crate::core::ser::{PMMRIndexHashable, PMMRable};
use crate::error::{Error, ErrorKind};
use crate::store::pmmr::PMMRBackend;
use crate::types::{Tip, TxHashSetRoots, TxHashsetWriteStatus};
use crate::util::secp::pedersen::{Commitment, RangeProof};
use crate::util::{file, secp_static, zip};

const TXHASHSET_SUBDIR: &str = "txhashset";

const OUTPUT_SUBDIR: &str = "output";
const RANGE_PROOF_SUBDIR: &str = "rangeproof";
const KERNEL_SUBDIR: &str = "kernel";

const TXHASHSET_ZIP: &str = "txhashset_snapshot";

/// Rangeproofs are batch verified in chunks of this size.
const RPROOF_BATCH_SIZE: usize = 1_000;

/// Kernel signatures are batch verified in chunks of this size.
const KERNEL_BATCH_SIZE: usize = 2_000;

struct PMMRHandle<T: PMMRable> {
	backend: PMMRBackend<T>,
	last_pos: u64,
}

impl<T: PMMRable> PMMRHandle<T> {
	fn new(
		root_dir: &Path,
		sub_dir: &str,
		prunable: bool,
		header: Option<&BlockHeader>,
	) -> Result<PMMRHandle<T>, Error> {
		let path = root_dir.join(TXHASHSET_SUBDIR).join(sub_dir);
		fs::create_dir_all(&path)?;
		let backend = PMMRBackend::new(&path, prunable, header)?;
		let last_pos = backend.unpruned_size();
		Ok(PMMRHandle { backend, last_pos })
	}
}

/// An easy to manipulate structure holding the 3 MMRs necessary to validate
/// blocks and capturing the output set, the range proofs and the kernels.
/// Also handles the index of commitments to positions in the output and
/// range proof MMRs.
///
/// Note that the index is never authoritative, only the trees are guaranteed
/// to indicate whether an output is spent or not. The index may have
/// commitments that have already been spent, even with pruning enabled.
pub struct TxHashSet {
	output_pmmr_h: PMMRHandle<Output>,
	rproof_pmmr_h: PMMRHandle<RangeProof>,
	kernel_pmmr_h: PMMRHandle<TxKernel>,

	// Header of the last block applied (and committed) to the MMRs.
	head_header: BlockHeader,

	// chain store used as index of commitments to MMR positions
	commit_index: Arc<ChainStore>,
}

impl TxHashSet {
	/// Open an existing or new set of backends for the TxHashSet.
	/// When opening from a freshly extracted snapshot archive, the snapshot
	/// header selects the rewound leaf files to install.
	pub fn open(
		root_dir: &Path,
		commit_index: Arc<ChainStore>,
		head_header: BlockHeader,
		snapshot_header: Option<&BlockHeader>,
	) -> Result<TxHashSet, Error> {
		Ok(TxHashSet {
			output_pmmr_h: PMMRHandle::new(root_dir, OUTPUT_SUBDIR, true, snapshot_header)?,
			rproof_pmmr_h: PMMRHandle::new(root_dir, RANGE_PROOF_SUBDIR, true, snapshot_header)?,
			kernel_pmmr_h: PMMRHandle::new(root_dir, KERNEL_SUBDIR, false, None)?,
			head_header,
			commit_index,
		})
	}

	/// Close all backend file handles.
	pub fn release_backend_files(&mut self) {
		self.output_pmmr_h.backend.release_files();
		self.rproof_pmmr_h.backend.release_files();
		self.kernel_pmmr_h.backend.release_files();
	}

	/// Header of the last block committed to this TxHashSet.
	pub fn head_header(&self) -> &BlockHeader {
		&self.head_header
	}

	/// Check if an output is unspent.
	/// We look in the index to find the output MMR pos.
	/// Then we check the entry in the output MMR and confirm the hash matches.
	pub fn is_unspent(&self, output_id: &OutputIdentifier) -> Result<(Hash, u64), Error> {
		match self.commit_index.get_output_pos(&output_id.commit) {
			Ok(output_pos) => {
				let output_pmmr: ReadonlyPMMR<'_, Output, _> =
					ReadonlyPMMR::at(&self.output_pmmr_h.backend, self.output_pmmr_h.last_pos);
				if let Some(hash) = output_pmmr.get_hash(output_pos.pos) {
					if hash == output_id.hash_with_index(output_pos.pos - 1) {
						Ok((hash, output_pos.pos))
					} else {
						Err(ErrorKind::TxHashSetErr("txhashset hash mismatch".to_owned()).into())
					}
				} else {
					Err(ErrorKind::OutputNotFound.into())
				}
			}
			Err(crate::store::Error::NotFoundErr(_)) => Err(ErrorKind::OutputNotFound.into()),
			Err(e) => Err(ErrorKind::StoreErr(e, "txhashset unspent check".to_owned()).into()),
		}
	}

	/// Returns the last N leaves inserted into the output MMR.
	pub fn last_n_output(&self, distance: u64) -> Vec<(Hash, OutputIdentifier)> {
		ReadonlyPMMR::at(&self.output_pmmr_h.backend, self.output_pmmr_h.last_pos)
			.get_last_n_insertions(distance)
	}

	/// As above, for range proofs.
	pub fn last_n_rangeproof(&self, distance: u64) -> Vec<(Hash, RangeProof)> {
		ReadonlyPMMR::at(&self.rproof_pmmr_h.backend, self.rproof_pmmr_h.last_pos)
			.get_last_n_insertions(distance)
	}

	/// As above, for kernels.
	pub fn last_n_kernel(&self, distance: u64) -> Vec<(Hash, TxKernel)> {
		ReadonlyPMMR::at(&self.kernel_pmmr_h.backend, self.kernel_pmmr_h.last_pos)
			.get_last_n_insertions(distance)
	}

	/// Returns outputs from the given insertion (leaf) index up to the
	/// specified limit. Also returns the last index actually populated.
	pub fn outputs_by_insertion_index(
		&self,
		start_index: u64,
		max_count: u64,
	) -> (u64, Vec<OutputIdentifier>) {
		ReadonlyPMMR::at(&self.output_pmmr_h.backend, self.output_pmmr_h.last_pos)
			.elements_from_insertion_index(start_index, max_count)
	}

	/// Highest output insertion index available.
	pub fn highest_output_insertion_index(&self) -> u64 {
		pmmr::n_leaves(self.output_pmmr_h.last_pos)
	}

	/// As above, for range proofs.
	pub fn rangeproofs_by_insertion_index(
		&self,
		start_index: u64,
		max_count: u64,
	) -> (u64, Vec<RangeProof>) {
		ReadonlyPMMR::at(&self.rproof_pmmr_h.backend, self.rproof_pmmr_h.last_pos)
			.elements_from_insertion_index(start_index, max_count)
	}

	/// Get the current MMR roots.
	pub fn roots(&self) -> TxHashSetRoots {
		let output_pmmr =
			ReadonlyPMMR::at(&self.output_pmmr_h.backend, self.output_pmmr_h.last_pos);
		let rproof_pmmr =
			ReadonlyPMMR::at(&self.rproof_pmmr_h.backend, self.rproof_pmmr_h.last_pos);
		let kernel_pmmr =
			ReadonlyPMMR::at(&self.kernel_pmmr_h.backend, self.kernel_pmmr_h.last_pos);

		TxHashSetRoots {
			output_root: output_pmmr.root(),
			rproof_root: rproof_pmmr.root(),
			kernel_root: kernel_pmmr.root(),
		}
	}

	/// Sizes of each of the MMRs (output, rangeproof, kernel).
	pub fn sizes(&self) -> (u64, u64, u64) {
		(
			self.output_pmmr_h.last_pos,
			self.rproof_pmmr_h.last_pos,
			self.kernel_pmmr_h.last_pos,
		)
	}

	/// Rewind the MMR backends straight to the sizes the given header
	/// declares, with nothing to re-add to the leaf sets. Only used when
	/// installing a snapshot, where the leaf sets arrive pre-rewound.
	pub fn rewind_to_header_sizes(&mut self, header: &BlockHeader) -> Result<(), Error> {
		{
			let mut output_pmmr: PMMR<'_, Output, _> =
				PMMR::at(&mut self.output_pmmr_h.backend, self.output_pmmr_h.last_pos);
			output_pmmr
				.rewind(header.output_mmr_size, &Bitmap::create())
				.map_err(ErrorKind::TxHashSetErr)?;
			self.output_pmmr_h.last_pos = output_pmmr.unpruned_size();
		}
		{
			let mut rproof_pmmr: PMMR<'_, RangeProof, _> =
				PMMR::at(&mut self.rproof_pmmr_h.backend, self.rproof_pmmr_h.last_pos);
			rproof_pmmr
				.rewind(header.output_mmr_size, &Bitmap::create())
				.map_err(ErrorKind::TxHashSetErr)?;
			self.rproof_pmmr_h.last_pos = rproof_pmmr.unpruned_size();
		}
		{
			let mut kernel_pmmr: PMMR<'_, TxKernel, _> =
				PMMR::at(&mut self.kernel_pmmr_h.backend, self.kernel_pmmr_h.last_pos);
			kernel_pmmr
				.rewind(header.kernel_mmr_size, &Bitmap::create())
				.map_err(ErrorKind::TxHashSetErr)?;
			self.kernel_pmmr_h.last_pos = kernel_pmmr.unpruned_size();
		}

		self.output_pmmr_h.backend.sync()?;
		self.rproof_pmmr_h.backend.sync()?;
		self.kernel_pmmr_h.backend.sync()?;

		self.head_header = header.clone();
		Ok(())
	}

	/// Efficient way to rebuild the commitment to position index from the
	/// output MMR contents of a single block: walks the output MMR leaves
	/// between the previous header's output MMR size and this header's size.
	pub fn save_output_positions(
		&self,
		prev_output_mmr_size: u64,
		header: &BlockHeader,
		batch: &Batch<'_>,
	) -> Result<(), Error> {
		for pos in (prev_output_mmr_size + 1)..=header.output_mmr_size {
			if !pmmr::is_leaf(pos) {
				continue;
			}
			if let Some(out) = self.output_pmmr_h.backend.get_data_from_file(pos) {
				batch.save_output_pos(
					&out.commit,
					OutputPos {
						pos,
						height: header.height,
					},
				)?;
			}
		}
		Ok(())
	}

	/// Compact the MMR data files and flush the rm logs
	pub fn compact(
		&mut self,
		horizon_header: &BlockHeader,
		batch: &Batch<'_>,
	) -> Result<(), Error> {
		debug!("txhashset: starting compaction...");

		let head_header = self.head_header.clone();
		let rewind_rm_pos = input_pos_to_rewind(horizon_header, &head_header, batch)?;

		debug!("txhashset: check_compact output mmr backend...");
		self.output_pmmr_h
			.backend
			.check_compact(horizon_header.output_mmr_size, &rewind_rm_pos)?;

		debug!("txhashset: check_compact rangeproof mmr backend...");
		self.rproof_pmmr_h
			.backend
			.check_compact(horizon_header.output_mmr_size, &rewind_rm_pos)?;

		debug!("txhashset: ... compaction finished");

		Ok(())
	}
}

/// Raw backend access for the pipeline: the data needed for chain state
/// checks that don't warrant a full extension.
impl TxHashSet {
	/// Get output data by MMR position, spent or unspent, as long as it has
	/// not been compacted away.
	pub fn get_output_by_pos(&self, pos: u64) -> Option<OutputIdentifier> {
		self.output_pmmr_h.backend.get_data_from_file(pos)
	}
}

/// Starts a new unit of work to extend (or rewind) the chain with additional
/// blocks. Accepts a closure that will operate within that unit of work.
/// The closure has access to an Extension object that allows the addition
/// of blocks to the txhashset and the checking of the current tree roots.
///
/// The unit of work is always discarded (always rollback) as this is read-only.
pub fn extending_readonly<F, T>(trees: &mut TxHashSet, inner: F) -> Result<T, Error>
where
	F: FnOnce(&mut Extension<'_>) -> Result<T, Error>,
{
	let commit_index = trees.commit_index.clone();
	let batch = commit_index.batch()?;

	trace!("Starting new txhashset (readonly) extension.");

	let res = {
		let mut extension = Extension::new(trees, &batch);
		extension.force_rollback();
		inner(&mut extension)
	};

	trace!("Rollbacking txhashset (readonly) extension.");

	trees.output_pmmr_h.backend.discard();
	trees.rproof_pmmr_h.backend.discard();
	trees.kernel_pmmr_h.backend.discard();

	trace!("TxHashSet (readonly) extension done.");

	res
}

/// Starts a new unit of work to extend the chain with additional blocks,
/// accepting a closure that will work within that unit of work. The closure
/// has access to an Extension object that allows the addition of blocks to
/// the txhashset and the checking of the current tree roots.
///
/// If the closure returns an error, modifications are canceled and the unit
/// of work is abandoned. Otherwise, the unit of work is permanently applied.
pub fn extending<'a, F, T>(
	trees: &'a mut TxHashSet,
	batch: &'a mut Batch<'_>,
	inner: F,
) -> Result<T, Error>
where
	F: FnOnce(&mut Extension<'_>) -> Result<T, Error>,
{
	let sizes: (u64, u64, u64);
	let res: Result<T, Error>;
	let rollback: bool;
	let head_header: BlockHeader;

	// create a child transaction so if the state is rolled back by itself, all
	// index saving can be undone
	let child_batch = batch.child()?;
	{
		trace!("Starting new txhashset extension.");

		let mut extension = Extension::new(trees, &child_batch);
		res = inner(&mut extension);

		rollback = extension.rollback;
		sizes = extension.sizes();
		head_header = extension.header.clone();
	}

	match res {
		Err(e) => {
			debug!("Error returned, discarding txhashset extension: {}", e);
			trees.output_pmmr_h.backend.discard();
			trees.rproof_pmmr_h.backend.discard();
			trees.kernel_pmmr_h.backend.discard();
			Err(e)
		}
		Ok(r) => {
			if rollback {
				trace!("Rollbacking txhashset extension. sizes {:?}", sizes);
				trees.output_pmmr_h.backend.discard();
				trees.rproof_pmmr_h.backend.discard();
				trees.kernel_pmmr_h.backend.discard();
			} else {
				trace!("Committing txhashset extension. sizes {:?}", sizes);
				child_batch.commit()?;
				trees.output_pmmr_h.backend.sync()?;
				trees.rproof_pmmr_h.backend.sync()?;
				trees.kernel_pmmr_h.backend.sync()?;
				trees.output_pmmr_h.last_pos = sizes.0;
				trees.rproof_pmmr_h.last_pos = sizes.1;
				trees.kernel_pmmr_h.last_pos = sizes.2;
				trees.head_header = head_header;
			}

			trace!("TxHashSet extension done.");
			Ok(r)
		}
	}
}

/// Allows the application of new blocks on top of the txhashset in a
/// reversible manner within a unit of work provided by the `extending`
/// function.
pub struct Extension<'a> {
	header: BlockHeader,

	output_pmmr: PMMR<'a, Output, PMMRBackend<Output>>,
	rproof_pmmr: PMMR<'a, RangeProof, PMMRBackend<RangeProof>>,
	kernel_pmmr: PMMR<'a, TxKernel, PMMRBackend<TxKernel>>,

	/// Rollback flag.
	rollback: bool,

	/// Batch in which the extension occurs, public so it can be used within
	/// an `extending` closure. Just be careful using it that way as it will
	/// get rolled back with the extension (i.e on a losing fork).
	pub batch: &'a Batch<'a>,
}

impl<'a> Committed for Extension<'a> {
	fn inputs_committed(&self) -> Vec<Commitment> {
		vec![]
	}

	fn outputs_committed(&self) -> Vec<Commitment> {
		let mut commitments = vec![];
		for pos in self.output_pmmr.leaf_pos_iter() {
			if let Some(out) = self.output_pmmr.get_data(pos) {
				commitments.push(out.commit);
			}
		}
		commitments
	}

	fn kernels_committed(&self) -> Vec<Commitment> {
		let mut commitments = vec![];
		for n in 1..self.kernel_pmmr.unpruned_size() + 1 {
			if pmmr::is_leaf(n) {
				if let Some(kernel) = self.kernel_pmmr.get_data(n) {
					commitments.push(kernel.excess());
				}
			}
		}
		commitments
	}
}

impl<'a> Extension<'a> {
	fn new(trees: &'a mut TxHashSet, batch: &'a Batch<'_>) -> Extension<'a> {
		Extension {
			header: trees.head_header.clone(),
			output_pmmr: PMMR::at(
				&mut trees.output_pmmr_h.backend,
				trees.output_pmmr_h.last_pos,
			),
			rproof_pmmr: PMMR::at(
				&mut trees.rproof_pmmr_h.backend,
				trees.rproof_pmmr_h.last_pos,
			),
			kernel_pmmr: PMMR::at(
				&mut trees.kernel_pmmr_h.backend,
				trees.kernel_pmmr_h.last_pos,
			),
			rollback: false,
			batch,
		}
	}

	/// The header of the last block applied within this extension.
	pub fn head_header(&self) -> &BlockHeader {
		&self.header
	}

	/// The tip representing the furthest extent of the current extension.
	pub fn head(&self) -> Tip {
		Tip::from_header(&self.header)
	}

	/// Apply a new block to the existing state.
	///
	/// Applies the following -
	///   * inputs (recording the spent positions in the block input bitmap)
	///   * outputs
	///   * kernels
	///
	pub fn apply_block(&mut self, b: &Block) -> Result<(), Error> {
		// A bitmap of output positions spent by this block. Stored per block
		// so rewind can flip the exact set of leaves back to unspent.
		let mut input_bitmap = Bitmap::create();

		for input in b.inputs() {
			let pos = self.apply_input(input)?;
			input_bitmap.add(pos as u32);
		}

		for out in b.outputs() {
			let pos = self.apply_output(out)?;
			// Update the output_pos index for the new output.
			self.batch.save_output_pos(
				&out.commitment(),
				OutputPos {
					pos,
					height: b.header.height,
				},
			)?;
		}

		for kernel in b.kernels() {
			self.apply_kernel(kernel)?;
		}

		self.batch.save_block_input_bitmap(&b.hash(), &input_bitmap)?;

		// Update the header of the extension to reflect the block we just
		// applied.
		self.header = b.header.clone();

		Ok(())
	}

	/// Contextual coinbase maturity check: every coinbase-flagged input must
	/// spend an output buried at least COINBASE_MATURITY blocks deep.
	pub fn verify_coinbase_maturity(&self, b: &Block) -> Result<(), Error> {
		for input in b.inputs() {
			if input.is_coinbase() {
				let output_pos = self.batch.get_output_pos(&input.commitment())?;
				if output_pos.height + global::coinbase_maturity() > b.header.height {
					return Err(ErrorKind::ImmatureCoinbase.into());
				}
			}
		}
		Ok(())
	}

	fn apply_input(&mut self, input: &Input) -> Result<u64, Error> {
		let commit = input.commitment();
		let pos_res = self.batch.get_output_pos(&commit);
		if let Ok(output_pos) = pos_res {
			// First check this input corresponds to an existing entry in the
			// output MMR.
			if let Some(hash) = self.output_pmmr.get_hash(output_pos.pos) {
				if hash != input.hash_with_index(output_pos.pos - 1) {
					return Err(
						ErrorKind::TxHashSetErr("output pmmr hash mismatch".to_owned()).into(),
					);
				}
			}

			// Now prune the output_pmmr, rproof_pmmr and their storage.
			// Input is not valid if we cannot prune successfully (to spend an
			// unspent output).
			match self.output_pmmr.prune(output_pos.pos) {
				Ok(true) => {
					self.rproof_pmmr
						.prune(output_pos.pos)
						.map_err(ErrorKind::TxHashSetErr)?;
					Ok(output_pos.pos)
				}
				Ok(false) => Err(ErrorKind::AlreadySpent(commit).into()),
				Err(e) => Err(ErrorKind::TxHashSetErr(e).into()),
			}
		} else {
			Err(ErrorKind::AlreadySpent(commit).into())
		}
	}

	fn apply_output(&mut self, out: &Output) -> Result<u64, Error> {
		let commit = out.commitment();

		if let Ok(output_pos) = self.batch.get_output_pos(&commit) {
			if let Some(out_mmr) = self.output_pmmr.get_data(output_pos.pos) {
				if out_mmr.commitment() == commit {
					return Err(ErrorKind::DuplicateCommitment(commit).into());
				}
			}
		}
		// push the new output to the MMR.
		let output_pos = self
			.output_pmmr
			.push(out)
			.map_err(&ErrorKind::TxHashSetErr)?;

		// push the rangeproof to the MMR.
		let rproof_pos = self
			.rproof_pmmr
			.push(&out.proof)
			.map_err(&ErrorKind::TxHashSetErr)?;

		// The output and rproof MMRs should be exactly the same size
		// and we should have inserted to both in exactly the same pos.
		{
			if self.output_pmmr.unpruned_size() != self.rproof_pmmr.unpruned_size() {
				return Err(
					ErrorKind::Other("output vs rproof MMRs different sizes".to_owned()).into(),
				);
			}

			if output_pos != rproof_pos {
				return Err(
					ErrorKind::Other("output vs rproof MMRs different pos".to_owned()).into(),
				);
			}
		}

		Ok(output_pos)
	}

	/// Push kernel onto MMR (hash and data files).
	fn apply_kernel(&mut self, kernel: &TxKernel) -> Result<(), Error> {
		self.kernel_pmmr
			.push(kernel)
			.map_err(&ErrorKind::TxHashSetErr)?;
		Ok(())
	}

	/// Rewinds the MMRs to the provided block, rewinding to the last output
	/// pos and last kernel pos of that block.
	pub fn rewind(&mut self, header: &BlockHeader) -> Result<(), Error> {
		debug!("Rewind extension to {} at {}", header.hash(), header.height);

		// We need to build bitmaps of added and removed output positions
		// so we can correctly rewind all operations applied to the output MMR
		// after the position we are rewinding to (these operations will be
		// undone during rewind).
		// Rewound output pos will be removed from the MMR.
		// Rewound input (spent) pos will be added back to the MMR.
		let head_header = self.header.clone();
		let rewind_rm_pos = input_pos_to_rewind(header, &head_header, self.batch)?;

		// Drop the pos index entries for the outputs that only exist on the
		// branch being rewound away. Read from the file directly as some of
		// those outputs may already be spent on this branch.
		let mut commits = vec![];
		for pos in (header.output_mmr_size + 1)..=self.output_pmmr.unpruned_size() {
			if pmmr::is_leaf(pos) {
				if let Some(out) = self.output_pmmr.get_data_from_file(pos) {
					commits.push(out.commit);
				}
			}
		}
		self.batch.delete_output_positions(&commits)?;

		self.output_pmmr
			.rewind(header.output_mmr_size, &rewind_rm_pos)
			.map_err(&ErrorKind::TxHashSetErr)?;
		self.rproof_pmmr
			.rewind(header.output_mmr_size, &rewind_rm_pos)
			.map_err(&ErrorKind::TxHashSetErr)?;
		self.kernel_pmmr
			.rewind(header.kernel_mmr_size, &Bitmap::create())
			.map_err(&ErrorKind::TxHashSetErr)?;

		// Update our header to reflect the one we rewound to.
		self.header = header.clone();

		Ok(())
	}

	/// Current root hashes for the output, range proof and kernel MMRs.
	pub fn roots(&self) -> TxHashSetRoots {
		TxHashSetRoots {
			output_root: self.output_pmmr.root(),
			rproof_root: self.rproof_pmmr.root(),
			kernel_root: self.kernel_pmmr.root(),
		}
	}

	/// Validate the MMR roots against the provided header.
	pub fn validate_roots(&self, header: &BlockHeader) -> Result<(), Error> {
		// If we are validating the genesis block then we have no outputs or
		// kernels. So we are done here.
		if header.height == 0 {
			return Ok(());
		}
		let roots = self.roots();
		if roots.output_root != header.output_root
			|| roots.rproof_root != header.range_proof_root
			|| roots.kernel_root != header.kernel_root
		{
			Err(ErrorKind::InvalidRoot.into())
		} else {
			Ok(())
		}
	}

	/// Validate the output and kernel MMR sizes against the block header.
	pub fn validate_sizes(&self, header: &BlockHeader) -> Result<(), Error> {
		// If we are validating the genesis block then we have no outputs or
		// kernels. So we are done here.
		if header.height == 0 {
			return Ok(());
		}

		let (output_mmr_size, rproof_mmr_size, kernel_mmr_size) = self.sizes();
		if output_mmr_size != header.output_mmr_size {
			Err(ErrorKind::InvalidMMRSize.into())
		} else if kernel_mmr_size != header.kernel_mmr_size {
			Err(ErrorKind::InvalidMMRSize.into())
		} else if output_mmr_size != rproof_mmr_size {
			Err(ErrorKind::InvalidMMRSize.into())
		} else {
			Ok(())
		}
	}

	/// Rebuild every parent hash from its children, confirming the files
	/// were not tampered with. The three walks are independent, so they run
	/// on their own worker threads and are joined before returning.
	fn validate_mmrs(&self) -> Result<(), Error> {
		let now = Instant::now();

		let output_pmmr = &self.output_pmmr;
		let rproof_pmmr = &self.rproof_pmmr;
		let kernel_pmmr = &self.kernel_pmmr;

		// validate all hashes and sums within the trees
		let res = thread::scope(|s| {
			let output_h = s.spawn(move |_| output_pmmr.validate());
			let rproof_h = s.spawn(move |_| rproof_pmmr.validate());
			let kernel_h = s.spawn(move |_| kernel_pmmr.validate());

			let mut results = vec![];
			results.push(output_h.join());
			results.push(rproof_h.join());
			results.push(kernel_h.join());
			results
		})
		.map_err(|_| Error::from(ErrorKind::Other("mmr validation panicked".to_owned())))?;

		for join_res in res {
			let validate_res =
				join_res.map_err(|_| Error::from(ErrorKind::Other("mmr walk panicked".to_owned())))?;
			if let Err(e) = validate_res {
				return Err(ErrorKind::InvalidTxHashSet(e).into());
			}
		}

		debug!(
			"txhashset: validated the output {}, rproof {}, kernel {} mmrs, took {}s",
			self.output_pmmr.unpruned_size(),
			self.rproof_pmmr.unpruned_size(),
			self.kernel_pmmr.unpruned_size(),
			now.elapsed().as_secs(),
		);

		Ok(())
	}

	/// The kernel MMR is append only, so the kernel root as of each historic
	/// block header must be reproducible from the MMR today. Walk every
	/// ancestor and confirm.
	fn validate_kernel_history(&self, header: &BlockHeader) -> Result<(), Error> {
		let now = Instant::now();

		let mut current = header.clone();
		while current.height > 0 {
			let kernel_pmmr = self
				.kernel_pmmr
				.readonly_pmmr_at(current.kernel_mmr_size);
			if kernel_pmmr.root() != current.kernel_root {
				return Err(ErrorKind::InvalidTxHashSet(format!(
					"kernel root mismatch for header at {}",
					current.height
				))
				.into());
			}
			current = self.batch.get_previous_header(&current)?;
		}

		debug!(
			"txhashset: validated kernel history to height {}, took {}s",
			header.height,
			now.elapsed().as_secs(),
		);

		Ok(())
	}

	/// Validate full kernel sums against the provided header (for overage and
	/// kernel_offset). This is an expensive operation as we need to retrieve
	/// all the UTXOs and kernels from the respective MMRs.
	pub fn validate_kernel_sums(
		&self,
		header: &BlockHeader,
		genesis: &BlockHeader,
	) -> Result<(Commitment, Commitment), Error> {
		let now = Instant::now();

		let genesis_had_reward = genesis.kernel_mmr_size > 0;
		let (utxo_sum, kernel_sum) = self.verify_kernel_sums(
			header.total_overage(genesis_had_reward),
			header.total_kernel_offset(),
		)?;

		debug!(
			"txhashset: validated total kernel sums, took {}s",
			now.elapsed().as_secs(),
		);

		Ok((utxo_sum, kernel_sum))
	}

	/// Validate the txhashset state against the provided block header.
	/// A "fast validation" will skip rangeproof verification and kernel
	/// signature verification.
	pub fn validate(
		&self,
		header: &BlockHeader,
		genesis: &BlockHeader,
		fast_validation: bool,
		status: &dyn TxHashsetWriteStatus,
	) -> Result<(Commitment, Commitment), Error> {
		self.validate_sizes(header)?;
		self.validate_mmrs()?;
		self.validate_roots(header)?;
		self.validate_kernel_history(header)?;

		if header.height == 0 {
			let zero_commit = secp_static::commit_to_zero_value();
			return Ok((zero_commit, zero_commit));
		}

		// The real magicking happens here. Sum of kernel excesses should
		// equal sum of unspent outputs minus total supply.
		let (output_sum, kernel_sum) = self.validate_kernel_sums(header, genesis)?;

		// These are expensive verification steps (skipped for "fast
		// validation").
		if !fast_validation {
			// Verify the rangeproof associated with each unspent output.
			self.verify_rangeproofs(status)?;

			// Verify all the kernel signatures.
			self.verify_kernel_signatures(status)?;
		}

		Ok((output_sum, kernel_sum))
	}

	/// Force the rollback of this extension, no matter the result.
	pub fn force_rollback(&mut self) {
		self.rollback = true;
	}

	/// Saves a snapshot of the output and rangeproof MMR leaf sets to disk,
	/// tagged with the current block hash. Needed for fast-sync: the
	/// receiving node installs the rewound leaf files from these.
	pub fn snapshot(&mut self) -> Result<(), Error> {
		let header = self.header.clone();
		self.output_pmmr
			.snapshot(&header)
			.map_err(ErrorKind::Other)?;
		self.rproof_pmmr
			.snapshot(&header)
			.map_err(ErrorKind::Other)?;
		Ok(())
	}

	/// Sizes of each of the MMRs.
	pub fn sizes(&self) -> (u64, u64, u64) {
		(
			self.output_pmmr.unpruned_size(),
			self.rproof_pmmr.unpruned_size(),
			self.kernel_pmmr.unpruned_size(),
		)
	}

	fn verify_kernel_signatures(&self, status: &dyn TxHashsetWriteStatus) -> Result<(), Error> {
		let now = Instant::now();

		let mut kernels = Vec::with_capacity(KERNEL_BATCH_SIZE);
		let mut kern_count = 0;
		let total_kernels = pmmr::n_leaves(self.kernel_pmmr.unpruned_size());
		for n in 1..self.kernel_pmmr.unpruned_size() + 1 {
			if pmmr::is_leaf(n) {
				let kernel = self
					.kernel_pmmr
					.get_data(n)
					.ok_or_else(|| Error::from(ErrorKind::TxKernelNotFound))?;
				kernels.push(kernel);

				if kernels.len() >= KERNEL_BATCH_SIZE {
					TxKernel::batch_sig_verify(&kernels)?;
					kern_count += kernels.len() as u64;
					kernels.clear();
					status.on_validation(kern_count, total_kernels, 0, 0);
					debug!(
						"txhashset: verify_kernel_signatures: verified {} signatures",
						kern_count,
					);
				}
			}
		}

		// remaining part which not full of batch size
		if !kernels.is_empty() {
			TxKernel::batch_sig_verify(&kernels)?;
			kern_count += kernels.len() as u64;
			status.on_validation(kern_count, total_kernels, 0, 0);
		}

		debug!(
			"txhashset: verified {} kernel signatures, pmmr size {}, took {}s",
			kern_count,
			self.kernel_pmmr.unpruned_size(),
			now.elapsed().as_secs(),
		);

		Ok(())
	}

	fn verify_rangeproofs(&self, status: &dyn TxHashsetWriteStatus) -> Result<(), Error> {
		let now = Instant::now();

		let mut commits: Vec<Commitment> = Vec::with_capacity(RPROOF_BATCH_SIZE);
		let mut proofs: Vec<RangeProof> = Vec::with_capacity(RPROOF_BATCH_SIZE);

		let mut proof_count = 0;
		let total_rproofs = self.output_pmmr.n_unpruned_leaves();
		for pos in self.output_pmmr.leaf_pos_iter() {
			let output = self.output_pmmr.get_data(pos);
			let proof = self.rproof_pmmr.get_data(pos);

			// Output and corresponding rangeproof *must* exist.
			// It is invalid for either to be missing and we fail immediately
			// in this case.
			match (output, proof) {
				(None, _) => return Err(ErrorKind::OutputNotFound.into()),
				(_, None) => return Err(ErrorKind::RangeproofNotFound.into()),
				(Some(output), Some(proof)) => {
					commits.push(output.commit);
					proofs.push(proof);
				}
			}

			proof_count += 1;

			if proofs.len() >= RPROOF_BATCH_SIZE {
				Output::batch_verify_proofs(&commits, &proofs)?;
				commits.clear();
				proofs.clear();
				status.on_validation(0, 0, proof_count, total_rproofs);
				debug!(
					"txhashset: verify_rangeproofs: verified {} rangeproofs",
					proof_count,
				);
			}
		}

		// remaining part which not full of batch size
		if !proofs.is_empty() {
			Output::batch_verify_proofs(&commits, &proofs)?;
			commits.clear();
			proofs.clear();
			status.on_validation(0, 0, proof_count, total_rproofs);
		}

		debug!(
			"txhashset: verified {} rangeproofs, pmmr size {}, took {}s",
			proof_count,
			self.rproof_pmmr.unpruned_size(),
			now.elapsed().as_secs(),
		);
		Ok(())
	}
}

/// Packages the txhashset data files into a zip and returns a Read to the
/// resulting file.
pub fn zip_read(root_dir: &Path, header: &BlockHeader) -> Result<File, Error> {
	let txhashset_zip = format!("{}_{}.zip", TXHASHSET_ZIP, header.hash());

	let txhashset_path = root_dir.join(TXHASHSET_SUBDIR);
	let zip_path = root_dir.join(txhashset_zip);

	// if file exist, just re-use it
	let zip_file = File::open(zip_path.clone());
	if let Ok(zip) = zip_file {
		return Ok(zip);
	} else {
		// clean up old zips. These are not small files, we only keep the
		// last day's worth around.
		let pattern = format!("{}_", TXHASHSET_ZIP);
		if let Ok(n) =
			crate::store::pmmr::clean_files_by_prefix(root_dir, &pattern, 24 * 60 * 60)
		{
			debug!("{} zip files have been cleaned up in {:?}", n, root_dir);
		}
	}

	// otherwise, create the zip archive
	let path_to_be_cleanup = {
		// Temp txhashset directory
		let temp_txhashset_path =
			root_dir.join(format!("{}_zip_{}", TXHASHSET_SUBDIR, header.hash()));
		// Remove temp dir if it exist
		if temp_txhashset_path.exists() {
			fs::remove_dir_all(&temp_txhashset_path)?;
		}
		// Copy file to another dir
		file::copy_dir_to(&txhashset_path, &temp_txhashset_path)?;

		let zip_file = File::create(zip_path.clone())?;

		// Explicit list of files to add to our zip archive.
		let files = file_list(header);

		zip::create_zip(&zip_file, &temp_txhashset_path, files)?;

		temp_txhashset_path
	};

	// open it again to read it back
	let zip_file = File::open(zip_path.clone())?;

	// clean-up temp txhashset directory.
	if let Err(e) = fs::remove_dir_all(&path_to_be_cleanup) {
		warn!(
			"txhashset zip file: {:?} fail to remove, err: {}",
			zip_path.to_str(),
			e
		);
	}
	Ok(zip_file)
}

// Explicit list of files to extract from our zip archive.
// We include *only* these files when building the txhashset zip.
// We extract *only* these files when receiving a txhashset zip.
// Everything else will be safely ignored.
// Return Vec<PathBuf> as some of these are dynamic (specifically the
// "rewound" leaf files).
fn file_list(header: &BlockHeader) -> Vec<PathBuf> {
	vec![
		// kernel MMR
		PathBuf::from("kernel/pmmr_data.bin"),
		PathBuf::from("kernel/pmmr_hash.bin"),
		// output MMR
		PathBuf::from("output/pmmr_data.bin"),
		PathBuf::from("output/pmmr_hash.bin"),
		PathBuf::from("output/pmmr_prun.bin"),
		// rangeproof MMR
		PathBuf::from("rangeproof/pmmr_data.bin"),
		PathBuf::from("rangeproof/pmmr_hash.bin"),
		PathBuf::from("rangeproof/pmmr_prun.bin"),
		// Header specific "rewound" leaf files for output and rangeproof MMR.
		PathBuf::from(format!("output/pmmr_leaf.bin.{}", header.hash())),
		PathBuf::from(format!("rangeproof/pmmr_leaf.bin.{}", header.hash())),
	]
}

/// Extract the txhashset data from a zip file and writes the content into the
/// txhashset storage dir.
pub fn zip_write(
	root_dir: &Path,
	txhashset_data: File,
	header: &BlockHeader,
) -> Result<(), Error> {
	debug!("zip_write on path: {:?}", root_dir);
	let txhashset_path = root_dir.join(TXHASHSET_SUBDIR);
	fs::create_dir_all(&txhashset_path)?;

	// Explicit list of files to extract from our zip archive.
	let files = file_list(header);

	// We expect to see *exactly* the paths listed above.
	// No attempt is made to be permissive or forgiving with "alternative"
	// paths. These are the *only* files we will attempt to extract from the
	// zip file. If any of these are missing we will attempt to continue as
	// some are potentially optional.
	zip::extract_files(txhashset_data, &txhashset_path, files)?;
	Ok(())
}

/// Clean the txhashset folder, so a fresh snapshot can be installed in its
/// place.
pub fn clean_txhashset_folder(root_dir: &Path) {
	let txhashset_path = root_dir.join(TXHASHSET_SUBDIR);
	if txhashset_path.exists() {
		if let Err(e) = fs::remove_dir_all(txhashset_path.clone()) {
			warn!(
				"clean_txhashset_folder: fail on {:?}. err: {}",
				txhashset_path, e
			);
		}
	}
}

/// Given a block header to rewind to and the block header at the head of
/// the current chain state, we need to calculate the positions of all
/// inputs (spent outputs) we need to "undo" during a rewind.
/// We do this by leveraging the "block_input_bitmap" cache and OR'ing the
/// set of bitmaps together for the set of blocks being rewound.
pub fn input_pos_to_rewind(
	block_header: &BlockHeader,
	head_header: &BlockHeader,
	batch: &Batch<'_>,
) -> Result<Bitmap, Error> {
	if head_header.height < block_header.height {
		debug!(
			"input_pos_to_rewind: {} < {}, nothing to rewind",
			head_header.height, block_header.height
		);
		return Ok(Bitmap::create());
	}

	// Batching up the block input bitmaps, and running fast_or() on every
	// batch of 256 bitmaps. so to avoid maintaining a huge vec of bitmaps.
	let bitmap_fast_or = |b_res, block_input_bitmaps: &mut Vec<Bitmap>| -> Option<Bitmap> {
		if let Some(b) = b_res {
			block_input_bitmaps.push(b);
			if block_input_bitmaps.len() < 256 {
				return None;
			}
		}
		let bitmap = Bitmap::fast_or(&block_input_bitmaps.iter().collect::<Vec<&Bitmap>>());
		block_input_bitmaps.clear();
		block_input_bitmaps.push(bitmap.clone());
		Some(bitmap)
	};

	let mut block_input_bitmaps: Vec<Bitmap> = vec![];

	let mut current = head_header.clone();
	while current.hash() != block_header.hash() {
		if current.height < 1 {
			break;
		}

		// I/O should be minimized or eliminated here for most
		// rewind scenarios.
		if let Ok(b_res) = batch.get_block_input_bitmap(&current.hash()) {
			bitmap_fast_or(Some(b_res), &mut block_input_bitmaps);
		}
		current = batch.get_previous_header(&current)?;
	}

	bitmap_fast_or(None, &mut block_input_bitmaps).ok_or_else(|| ErrorKind::Bitmap.into())
}
