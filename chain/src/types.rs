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

//! Base types that the block chain pipeline requires.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::core::core::hash::{Hash, Hashed, ZERO_HASH};
use crate::core::core::BlockHeader;
use crate::core::pow::Difficulty;
use crate::core::ser::{self, Readable, Reader, Writeable, Writer};

bitflags! {
	/// Options for block validation
	pub struct Options: u32 {
		/// No flags
		const NONE = 0b0000_0001;
		/// Runs without checking the Proof of Work, mostly to make testing easier.
		const SKIP_POW = 0b0000_0010;
		/// Adds block while in syncing mode.
		const SYNC = 0b0000_0100;
		/// Block validation on a block we mined ourselves
		const MINE = 0b0000_1000;
	}
}

/// Status returned by every ingest operation on the chain API. This is what
/// the network layer acts on: banning the peer, requesting more data or
/// moving on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
	/// Data was accepted and the chain state advanced.
	Success,
	/// We already knew about this one, nothing was changed.
	AlreadyExists,
	/// Parent data is missing, stashed until it shows up.
	Orphaned,
	/// A compact block could not be hydrated from the local tx pool.
	TransactionsMissing,
	/// Peer-attributable protocol or consensus violation.
	Invalid,
	/// An io or db failure on our side.
	StoreError,
	/// Anything else that prevented processing, typically still syncing.
	UnknownError,
}

/// The tip of a fork. A handle to the fork ancestry from its leaf in the
/// blockchain tree. References the max height and the latest and previous
/// blocks for convenience.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Tip {
	/// Height of the tip (max height of the fork)
	pub height: u64,
	/// Last block pushed to the fork
	pub last_block_h: Hash,
	/// Previous block
	pub prev_block_h: Hash,
	/// Total difficulty accumulated on that fork
	pub total_difficulty: Difficulty,
}

impl Tip {
	/// Creates a new tip based on provided header.
	pub fn from_header(header: &BlockHeader) -> Tip {
		Tip {
			height: header.height,
			last_block_h: header.hash(),
			prev_block_h: header.prev_hash,
			total_difficulty: header.total_difficulty(),
		}
	}
}

impl Default for Tip {
	fn default() -> Tip {
		Tip {
			height: 0,
			last_block_h: ZERO_HASH,
			prev_block_h: ZERO_HASH,
			total_difficulty: Difficulty::min(),
		}
	}
}

/// Serialization of a tip, required to save to datastore.
impl Writeable for Tip {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u64(self.height)?;
		writer.write_fixed_bytes(&self.last_block_h)?;
		writer.write_fixed_bytes(&self.prev_block_h)?;
		self.total_difficulty.write(writer)
	}
}

impl Readable for Tip {
	fn read(reader: &mut dyn Reader) -> Result<Tip, ser::Error> {
		let height = reader.read_u64()?;
		let last = Hash::read(reader)?;
		let prev = Hash::read(reader)?;
		let diff = Difficulty::read(reader)?;
		Ok(Tip {
			height,
			last_block_h: last,
			prev_block_h: prev,
			total_difficulty: diff,
		})
	}
}

/// The output, rangeproof and kernel MMR roots that a block header commits
/// to.
#[derive(Debug, Clone, PartialEq)]
pub struct TxHashSetRoots {
	/// Output root
	pub output_root: Hash,
	/// Range Proof root
	pub rproof_root: Hash,
	/// Kernel root
	pub kernel_root: Hash,
}

/// Trait the chain pipeline requires an implementor for in order to process
/// a txhashset archive download and validation. Implementors surface
/// progress to the user (and the network layer's sync status).
pub trait TxHashsetWriteStatus {
	/// First setup of the txhashset
	fn on_setup(&self);
	/// Starting validation
	fn on_validation(&self, kernels: u64, kernel_total: u64, rproofs: u64, rproof_total: u64);
	/// Starting to save the txhashset and related data
	fn on_save(&self);
	/// Done writing a new txhashset
	fn on_done(&self);
}

/// Do-nothing implementation of TxHashsetWriteStatus, for tests and one-off
/// calls.
pub struct NoStatus;

impl TxHashsetWriteStatus for NoStatus {
	fn on_setup(&self) {}
	fn on_validation(&self, _ks: u64, _kts: u64, _rs: u64, _rt: u64) {}
	fn on_save(&self) {}
	fn on_done(&self) {}
}

/// Cooperative shutdown flag. Processors poll it at batch boundaries and
/// bail out promptly; nothing is abortable mid-batch without a rollback.
pub struct StopState {
	stopped: AtomicBool,
}

impl StopState {
	/// A new, running, stop state.
	pub fn new() -> StopState {
		StopState {
			stopped: AtomicBool::new(false),
		}
	}

	/// Request a stop.
	pub fn stop(&self) {
		self.stopped.store(true, Ordering::Relaxed);
	}

	/// Has a stop been requested?
	pub fn is_stopped(&self) -> bool {
		self.stopped.load(Ordering::Relaxed)
	}
}

impl Default for StopState {
	fn default() -> StopState {
		StopState::new()
	}
}

/// Simple sync state tracker with atomic progress counters, polled by the
/// network layer while long-running validation is under way.
pub struct SyncState {
	kernels: AtomicU64,
	kernels_total: AtomicU64,
	rproofs: AtomicU64,
	rproofs_total: AtomicU64,
}

impl SyncState {
	/// A new sync state with zeroed counters.
	pub fn new() -> SyncState {
		SyncState {
			kernels: AtomicU64::new(0),
			kernels_total: AtomicU64::new(0),
			rproofs: AtomicU64::new(0),
			rproofs_total: AtomicU64::new(0),
		}
	}

	/// Current progress as ((kernels, total), (rproofs, total)).
	pub fn validation_progress(&self) -> ((u64, u64), (u64, u64)) {
		(
			(
				self.kernels.load(Ordering::Relaxed),
				self.kernels_total.load(Ordering::Relaxed),
			),
			(
				self.rproofs.load(Ordering::Relaxed),
				self.rproofs_total.load(Ordering::Relaxed),
			),
		)
	}
}

impl Default for SyncState {
	fn default() -> SyncState {
		SyncState::new()
	}
}

impl TxHashsetWriteStatus for SyncState {
	fn on_setup(&self) {
		self.kernels.store(0, Ordering::Relaxed);
		self.rproofs.store(0, Ordering::Relaxed);
	}

	fn on_validation(&self, kernels: u64, kernel_total: u64, rproofs: u64, rproof_total: u64) {
		if kernels > 0 {
			self.kernels.store(kernels, Ordering::Relaxed);
			self.kernels_total.store(kernel_total, Ordering::Relaxed);
		}
		if rproofs > 0 {
			self.rproofs.store(rproofs, Ordering::Relaxed);
			self.rproofs_total.store(rproof_total, Ordering::Relaxed);
		}
	}

	fn on_save(&self) {}

	fn on_done(&self) {
		debug!("txhashset validation and save done");
	}
}
