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

//! Facade and handler for the rest of the blockchain implementation and
//! mostly the chain pipeline. Owns the locks: queries take read locks, every
//! mutating entry point serializes on the chain lock and commits or discards
//! all underlying stores together.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::chain_store::{ChainStore, DB_VERSION};
use crate::chains::{ChainSet, ChainType};
use crate::core::core::hash::{Hash, Hashed};
use crate::core::core::{Block, BlockHeader, BlockSums, CompactBlock, Committed, Transaction};
use crate::core::global;
use crate::core::pow::{self, Difficulty};
use crate::error::{Error, ErrorKind};
use crate::header_mmr::HeaderMMR;
use crate::orphans::{Orphan, OrphanBlockPool, OrphanHeaderCache};
use crate::pipe::{self, BlockContext};
use crate::store;
use crate::txhashset::{self, TxHashSet};
use crate::txpool::{PoolType, TransactionPool};
use crate::types::{Options, ProcessStatus, StopState, Tip, TxHashsetWriteStatus};
use crate::util::{Mutex, RwLock};

/// Facade to the blockchain block processing pipeline and storage. Provides
/// the current view of the chain state according to the three chains and
/// maintains locking for the pipeline to avoid conflicting processing.
pub struct Chain {
	db_root: PathBuf,
	store: Arc<ChainStore>,
	chains: Arc<RwLock<ChainSet>>,
	header_mmr: Arc<RwLock<HeaderMMR>>,
	txhashset: Arc<RwLock<TxHashSet>>,
	orphans: Arc<OrphanBlockPool>,
	orphan_headers: Arc<OrphanHeaderCache>,
	tx_pool: Arc<TransactionPool>,
	// POW verification function
	pow_verifier: fn(&BlockHeader) -> Result<(), pow::Error>,
	genesis: BlockHeader,
	// Serializes every state-mutating call (add_header, add_block,
	// process_txhashset). Queries go through the rwlocks directly.
	chain_lock: Arc<Mutex<()>>,
	stop_state: Arc<StopState>,
}

impl Chain {
	/// Initializes the blockchain and returns a new Chain instance. Does a
	/// check on the current chain head to make sure it exists and creates one
	/// based on the genesis block if necessary.
	pub fn init(
		db_root: String,
		genesis: Block,
		pow_verifier: fn(&BlockHeader) -> Result<(), pow::Error>,
	) -> Result<Chain, Error> {
		let db_root = PathBuf::from(db_root);
		std::fs::create_dir_all(&db_root)?;

		let db_env = Arc::new(store::new_env(db_root.to_string_lossy().into_owned()));
		let chain_store = Arc::new(ChainStore::new(db_env)?);

		// Refuse to open a db written by a newer schema.
		let db_version = chain_store.get_db_version()?;
		if db_version > DB_VERSION {
			return Err(ErrorKind::Other(format!(
				"db schema version {} is newer than supported ({})",
				db_version, DB_VERSION
			))
			.into());
		}

		let fresh_db = !chain_store.header_exists(&genesis.hash())?;

		// Save the genesis header, block and sums if this is a new db.
		if fresh_db {
			let batch = chain_store.batch()?;
			batch.save_block_header(&genesis.header)?;
			batch.save_block(&genesis)?;

			let genesis_sums = if genesis.kernels().is_empty() {
				BlockSums::default()
			} else {
				let (utxo_sum, kernel_sum) = (BlockSums::default(), &genesis as &dyn Committed)
					.verify_kernel_sums(
						genesis.header.overage(),
						genesis.header.total_kernel_offset(),
					)?;
				BlockSums {
					utxo_sum,
					kernel_sum,
				}
			};
			batch.save_block_sums(&genesis.hash(), &genesis_sums)?;
			batch.save_db_version(DB_VERSION)?;
			batch.commit()?;

			info!(
				"chain: init: saved genesis: {:?}, nonce: {:?}, pow: {:?}",
				genesis.hash(),
				genesis.header.pow.nonce,
				genesis.header.pow.proof,
			);
		}

		// The three chains, all rooted at genesis.
		let mut chains = ChainSet::new(&db_root.join("chain"), genesis.hash())?;

		// The header MMR needs at least the genesis header.
		let mut header_mmr = HeaderMMR::open(&db_root)?;
		if header_mmr.num_headers() == 0 {
			header_mmr.apply_header(&genesis.header)?;
			header_mmr.commit()?;
		}

		// Open the txhashset at the confirmed tip.
		let head_hash = chains.tip_hash(ChainType::Confirmed);
		let head_header = chain_store.get_block_header(&head_hash)?;
		let mut txhashset =
			TxHashSet::open(&db_root, chain_store.clone(), head_header, None)?;

		// Apply the genesis block body if it carries outputs or kernels and
		// the txhashset is still empty.
		if fresh_db && !genesis.kernels().is_empty() {
			let mut batch = chain_store.batch()?;
			txhashset::extending(&mut txhashset, &mut batch, |ext| ext.apply_block(&genesis))?;
			batch.commit()?;
		}

		// Run any pending schema migrations on an existing db.
		if !fresh_db {
			Chain::migrate_db(&chain_store, &chains, &txhashset, db_version)?;
		}

		// Make sure the chain files reflect whatever we just set up.
		chains.flush()?;

		info!(
			"chain: init: confirmed {} @ {}, candidate {} @ {}",
			chains.tip_hash(ChainType::Confirmed),
			chains.height(ChainType::Confirmed),
			chains.tip_hash(ChainType::Candidate),
			chains.height(ChainType::Candidate),
		);

		Ok(Chain {
			db_root,
			store: chain_store,
			chains: Arc::new(RwLock::new(chains)),
			header_mmr: Arc::new(RwLock::new(header_mmr)),
			txhashset: Arc::new(RwLock::new(txhashset)),
			orphans: Arc::new(OrphanBlockPool::new()),
			orphan_headers: Arc::new(OrphanHeaderCache::new()),
			tx_pool: Arc::new(TransactionPool::new()),
			pow_verifier,
			genesis: genesis.header,
			chain_lock: Arc::new(Mutex::new(())),
			stop_state: Arc::new(StopState::new()),
		})
	}

	/// The shared stop flag. Flipping it makes in-flight processors return
	/// at the next batch boundary and refuses further mutating calls.
	pub fn stop_state(&self) -> Arc<StopState> {
		self.stop_state.clone()
	}

	// Schema migrations: v1 -> v2 rebuilds the output position index from
	// the txhashset, v2 -> v3 re-encodes stored blocks.
	fn migrate_db(
		store: &ChainStore,
		chains: &ChainSet,
		txhashset: &TxHashSet,
		from_version: u8,
	) -> Result<(), Error> {
		if from_version >= DB_VERSION {
			return Ok(());
		}
		info!(
			"chain: migrating db from schema v{} to v{}",
			from_version, DB_VERSION
		);

		let batch = store.batch()?;

		if from_version < 2 {
			// Rebuild the commitment -> position index by replaying every
			// candidate-chain header over the output MMR.
			batch.clear_output_pos()?;
			let mut prev_size = 0;
			for height in 0..=chains.height(ChainType::Candidate) {
				let hash = chains
					.get_hash(ChainType::Candidate, height)
					.ok_or_else(|| Error::from(ErrorKind::Other("bad candidate chain".into())))?;
				let header = batch.get_block_header(&hash)?;
				txhashset.save_output_positions(prev_size, &header, &batch)?;
				prev_size = header.output_mmr_size;
			}
		}

		if from_version < 3 {
			// Blocks get decoded with the current rules and re-encoded.
			let blocks: Vec<Block> = batch.blocks_iter()?.map(|(_, b)| b).collect();
			for block in blocks {
				batch.save_block(&block)?;
			}
		}

		batch.save_db_version(DB_VERSION)?;
		batch.commit()?;
		Ok(())
	}

	/// Height of the tip of the given chain.
	pub fn get_height(&self, chain_type: ChainType) -> u64 {
		self.chains.read().height(chain_type)
	}

	/// Total difficulty at the tip of the given chain.
	pub fn get_total_difficulty(&self, chain_type: ChainType) -> Result<Difficulty, Error> {
		let tip_hash = self.chains.read().tip_hash(chain_type);
		let header = self.store.get_block_header(&tip_hash)?;
		Ok(header.total_difficulty())
	}

	/// Tip of the confirmed chain.
	pub fn head(&self) -> Result<Tip, Error> {
		let tip_hash = self.chains.read().tip_hash(ChainType::Confirmed);
		let header = self.store.get_block_header(&tip_hash)?;
		Ok(Tip::from_header(&header))
	}

	/// Block header for the confirmed chain head.
	pub fn head_header(&self) -> Result<BlockHeader, Error> {
		let tip_hash = self.chains.read().tip_hash(ChainType::Confirmed);
		Ok(self.store.get_block_header(&tip_hash)?)
	}

	/// Tip of the candidate header chain.
	pub fn header_head(&self) -> Result<Tip, Error> {
		let tip_hash = self.chains.read().tip_hash(ChainType::Candidate);
		let header = self.store.get_block_header(&tip_hash)?;
		Ok(Tip::from_header(&header))
	}

	/// Attempt to add a new block to the chain. Returns the new chain tip if
	/// it has been added to the longest chain or None if it has not extended
	/// the confirmed chain.
	pub fn process_block(
		&self,
		b: Block,
		opts: Options,
	) -> Result<(Option<Tip>, ProcessStatus), Error> {
		let hash = b.hash();
		let res = self.process_block_single(b, opts);
		if let Ok((Some(_), _)) = res {
			// We accepted a block extending the confirmed chain, some
			// orphans may now be processable.
			self.check_orphans(hash);
		}
		res
	}

	// Attempt to add a single block, without trying to chain orphans onto
	// it afterwards.
	fn process_block_single(
		&self,
		b: Block,
		opts: Options,
	) -> Result<(Option<Tip>, ProcessStatus), Error> {
		let _lock = self.chain_lock.lock();

		let mut chains = self.chains.write();
		let mut header_mmr = self.header_mmr.write();
		let mut txhashset = self.txhashset.write();
		let batch = self.store.batch()?;

		let mut ctx = BlockContext {
			opts,
			pow_verifier: self.pow_verifier,
			batch,
			chains: &mut *chains,
			header_mmr: &mut *header_mmr,
			txhashset: &mut *txhashset,
			orphans: self.orphans.clone(),
			orphan_headers: self.orphan_headers.clone(),
			stop_state: self.stop_state.clone(),
		};

		let res = pipe::process_block(&b, &mut ctx);

		match res {
			Ok((tip, status)) => {
				let BlockContext { batch, .. } = ctx;
				batch.commit()?;
				chains.flush()?;
				header_mmr.commit()?;

				self.orphans.remove(&b.hash());
				self.tx_pool.reconcile_block(&b);

				debug!(
					"chain: processed block {} at {}: {:?}",
					b.hash(),
					b.header.height,
					status
				);
				Ok((tip, status))
			}
			Err(e) => {
				drop(ctx);
				chains.discard();
				header_mmr.rollback();

				if let ErrorKind::Orphan = e.kind() {
					let block_hash = b.hash();
					self.orphans.add(Orphan { block: b, opts });
					debug!(
						"chain: process_block: orphan {} ({} in pool)",
						block_hash,
						self.orphans.len()
					);
				}
				Err(e)
			}
		}
	}

	// Check the orphan pool for blocks that chain onto the newly accepted
	// block (transitively) and process them.
	fn check_orphans(&self, hash: Hash) {
		let mut parents = vec![hash];
		while let Some(parent) = parents.pop() {
			for orphan in self.orphans.get_by_previous(&parent) {
				let orphan_hash = orphan.block.hash();
				self.orphans.remove(&orphan_hash);
				if let Ok((Some(_), _)) = self.process_block_single(orphan.block, orphan.opts) {
					parents.push(orphan_hash);
				}
			}
		}
	}

	/// Attempt to add a new block to the chain, mapping the outcome onto the
	/// status enum the network layer acts on.
	pub fn add_block(&self, b: Block, opts: Options) -> ProcessStatus {
		match self.process_block(b, opts) {
			Ok((_, status)) => status,
			Err(e) => status_from_error(&e),
		}
	}

	/// Attempt to hydrate and add a block from its compact form. Returns
	/// TransactionsMissing when the local tx pool cannot supply the short
	/// ids, so the caller can request the full block.
	pub fn add_compact_block(&self, cb: CompactBlock, opts: Options) -> ProcessStatus {
		let cb_hash = cb.hash();
		if cb.kern_ids().is_empty() {
			let block = match Block::hydrate_from(cb, vec![]) {
				Ok(block) => block,
				Err(_) => return ProcessStatus::Invalid,
			};
			return self.add_block(block, opts);
		}

		let (txs, missing) =
			self.tx_pool
				.retrieve_transactions(cb_hash, cb.nonce, cb.kern_ids());
		if !missing.is_empty() {
			debug!(
				"chain: add_compact_block: {} of {} txs missing for {}",
				missing.len(),
				cb.kern_ids().len(),
				cb_hash
			);
			return ProcessStatus::TransactionsMissing;
		}

		let block = match Block::hydrate_from(cb, txs) {
			Ok(block) => block,
			Err(_) => return ProcessStatus::TransactionsMissing,
		};

		match self.add_block(block, opts) {
			// A hydration mismatch shows up as an invalid block. Our tx pool
			// had different data than the block, request it in full.
			ProcessStatus::Invalid => ProcessStatus::TransactionsMissing,
			status => status,
		}
	}

	/// Process a single block header received from a peer.
	pub fn process_block_header(
		&self,
		header: &BlockHeader,
		opts: Options,
	) -> Result<ProcessStatus, Error> {
		let _lock = self.chain_lock.lock();

		let mut chains = self.chains.write();
		let mut header_mmr = self.header_mmr.write();
		let mut txhashset = self.txhashset.write();
		let batch = self.store.batch()?;

		let mut ctx = BlockContext {
			opts,
			pow_verifier: self.pow_verifier,
			batch,
			chains: &mut *chains,
			header_mmr: &mut *header_mmr,
			txhashset: &mut *txhashset,
			orphans: self.orphans.clone(),
			orphan_headers: self.orphan_headers.clone(),
			stop_state: self.stop_state.clone(),
		};

		let res = pipe::process_block_header(header, &mut ctx);

		match res {
			Ok(status) => {
				let BlockContext { batch, .. } = ctx;
				batch.commit()?;
				chains.flush()?;
				header_mmr.commit()?;
				Ok(status)
			}
			Err(e) => {
				drop(ctx);
				chains.discard();
				header_mmr.rollback();
				Err(e)
			}
		}
	}

	/// Add a single header to the chain, status form.
	pub fn add_header(&self, header: &BlockHeader, opts: Options) -> ProcessStatus {
		match self.process_block_header(header, opts) {
			Ok(status) => status,
			Err(e) => status_from_error(&e),
		}
	}

	/// Process a batch of headers during sync.
	pub fn sync_block_headers(
		&self,
		headers: &[BlockHeader],
		opts: Options,
	) -> Result<ProcessStatus, Error> {
		let _lock = self.chain_lock.lock();

		let mut chains = self.chains.write();
		let mut header_mmr = self.header_mmr.write();
		let mut txhashset = self.txhashset.write();
		let batch = self.store.batch()?;

		let mut ctx = BlockContext {
			opts,
			pow_verifier: self.pow_verifier,
			batch,
			chains: &mut *chains,
			header_mmr: &mut *header_mmr,
			txhashset: &mut *txhashset,
			orphans: self.orphans.clone(),
			orphan_headers: self.orphan_headers.clone(),
			stop_state: self.stop_state.clone(),
		};

		let res = pipe::sync_block_headers(headers, &mut ctx);

		match res {
			Ok(status) => {
				let BlockContext { batch, .. } = ctx;
				batch.commit()?;
				chains.flush()?;
				// the header MMR commit/rollback decision was made per chunk
				// against the candidate chain, nothing further to do here
				Ok(status)
			}
			Err(e) => {
				drop(ctx);
				chains.discard();
				header_mmr.rollback();
				Err(e)
			}
		}
	}

	/// Add a batch of headers, status form.
	pub fn add_headers(&self, headers: &[BlockHeader], opts: Options) -> ProcessStatus {
		match self.sync_block_headers(headers, opts) {
			Ok(status) => status,
			Err(e) => status_from_error(&e),
		}
	}

	/// Add a transaction to the pool (after validating it), so compact
	/// blocks referencing it can be hydrated.
	pub fn add_transaction(&self, tx: Transaction, pool_type: PoolType) -> ProcessStatus {
		if tx.validate().is_err() {
			return ProcessStatus::Invalid;
		}
		self.tx_pool.add(tx, pool_type);
		ProcessStatus::Success
	}

	/// Check if hash is for a known orphan.
	pub fn is_orphan(&self, hash: &Hash) -> bool {
		self.orphans.contains(hash)
	}

	/// Gets a block header by hash.
	pub fn get_block_header(&self, h: &Hash) -> Result<BlockHeader, Error> {
		Ok(self.store.get_block_header(h)?)
	}

	/// Gets the block header at the provided height on the given chain.
	pub fn get_header_by_height(
		&self,
		height: u64,
		chain_type: ChainType,
	) -> Result<BlockHeader, Error> {
		let hash = self
			.chains
			.read()
			.get_hash(chain_type, height)
			.ok_or_else(|| {
				Error::from(ErrorKind::Other(format!("no header at height {}", height)))
			})?;
		Ok(self.store.get_block_header(&hash)?)
	}

	/// Gets the block header for the output with the given commitment, via
	/// the output position index.
	pub fn get_header_for_output(
		&self,
		commit: &crate::util::secp::pedersen::Commitment,
	) -> Result<BlockHeader, Error> {
		let output_pos = self.store.get_output_pos(commit)?;
		self.get_header_by_height(output_pos.height, ChainType::Confirmed)
	}

	/// Gets a block by hash.
	pub fn get_block(&self, h: &Hash) -> Result<Block, Error> {
		Ok(self.store.get_block(h)?)
	}

	/// Gets the block at the provided height on the confirmed chain.
	pub fn get_block_by_height(&self, height: u64) -> Result<Block, Error> {
		let header = self.get_header_by_height(height, ChainType::Confirmed)?;
		Ok(self.store.get_block(&header.hash())?)
	}

	/// Gets the block containing the output with the given commitment.
	pub fn get_block_for_output(
		&self,
		commit: &crate::util::secp::pedersen::Commitment,
	) -> Result<Block, Error> {
		let header = self.get_header_for_output(commit)?;
		Ok(self.store.get_block(&header.hash())?)
	}

	/// The (height, hash) pairs of blocks the candidate chain has validated
	/// headers for but whose bodies the confirmed chain still needs, capped
	/// at max. Orphans we already hold are skipped.
	pub fn get_blocks_needed(&self, max: u64) -> Vec<(u64, Hash)> {
		let chains = self.chains.read();
		let confirmed_height = chains.height(ChainType::Confirmed);
		let candidate_height = chains.height(ChainType::Candidate);

		let mut needed = vec![];
		for height in (confirmed_height + 1)..=candidate_height {
			if let Some(hash) = chains.get_hash(ChainType::Candidate, height) {
				if !self.orphans.contains(&hash) {
					needed.push((height, hash));
				}
			}
			if needed.len() as u64 >= max {
				break;
			}
		}
		needed
	}

	/// Sets the txhashset roots and MMR sizes on a brand new block by
	/// applying the block on the current txhashset state.
	pub fn set_txhashset_roots(&self, b: &mut Block) -> Result<(), Error> {
		let mut txhashset = self.txhashset.write();
		let (roots, sizes) = txhashset::extending_readonly(&mut txhashset, |ext| {
			ext.apply_block(b)?;
			Ok((ext.roots(), ext.sizes()))
		})?;

		b.header.output_root = roots.output_root;
		b.header.range_proof_root = roots.rproof_root;
		b.header.kernel_root = roots.kernel_root;
		b.header.output_mmr_size = sizes.0;
		b.header.kernel_mmr_size = sizes.2;
		Ok(())
	}

	/// As above but for a block extending a fork: the txhashset is rewound
	/// to the fork ancestor (which must be on the confirmed chain) and the
	/// intermediate fork blocks are re-applied before the new block.
	pub fn set_txhashset_roots_forked(
		&self,
		b: &mut Block,
		fork_ancestor: &BlockHeader,
		fork_blocks: &[Block],
	) -> Result<(), Error> {
		let mut txhashset = self.txhashset.write();
		let (roots, sizes) = txhashset::extending_readonly(&mut txhashset, |ext| {
			ext.rewind(fork_ancestor)?;
			for fork_block in fork_blocks {
				ext.apply_block(fork_block)?;
			}
			ext.apply_block(b)?;
			Ok((ext.roots(), ext.sizes()))
		})?;

		b.header.output_root = roots.output_root;
		b.header.range_proof_root = roots.rproof_root;
		b.header.kernel_root = roots.kernel_root;
		b.header.output_mmr_size = sizes.0;
		b.header.kernel_mmr_size = sizes.2;
		Ok(())
	}

	/// Ingest a txhashset snapshot archive for the block with the given
	/// hash: extract, rewind, fully validate, rebuild the output index and
	/// promote the confirmed chain (§fast-sync).
	pub fn txhashset_write(
		&self,
		h: Hash,
		txhashset_data: File,
		status: &dyn TxHashsetWriteStatus,
	) -> Result<(), Error> {
		let _lock = self.chain_lock.lock();

		status.on_setup();

		let header = self.get_block_header(&h)?;

		// The snapshot must be for a block on the candidate chain, otherwise
		// we'd be installing state we have no validated headers for.
		{
			let chains = self.chains.read();
			if !chains.is_on_chain(ChainType::Candidate, header.hash(), header.height) {
				return Err(ErrorKind::SyncError(format!(
					"snapshot block {} not on candidate chain",
					header.hash()
				))
				.into());
			}
		}

		// Close the live txhashset and replace its files with the archive
		// contents.
		{
			let mut txhashset_ref = self.txhashset.write();
			txhashset_ref.release_backend_files();
		}
		txhashset::clean_txhashset_folder(&self.db_root);
		txhashset::zip_write(&self.db_root, txhashset_data, &header)?;

		// Open the snapshot, installing the rewound leaf files, and trim the
		// MMRs to the sizes the snapshot header declares.
		let mut new_txhashset = TxHashSet::open(
			&self.db_root,
			self.store.clone(),
			header.clone(),
			Some(&header),
		)?;
		new_txhashset.rewind_to_header_sizes(&header)?;

		// Validate the full state: hashes, roots, kernel history, sums,
		// rangeproofs, signatures.
		let (utxo_sum, kernel_sum) = txhashset::extending_readonly(&mut new_txhashset, |ext| {
			ext.validate(&header, &self.genesis, false, status)
		})?;

		status.on_save();

		let batch = self.store.batch()?;
		batch.save_block_sums(
			&header.hash(),
			&BlockSums {
				utxo_sum,
				kernel_sum,
			},
		)?;

		// Replay every candidate header's outputs so the commitment index is
		// complete up to the snapshot block.
		{
			let chains = self.chains.read();
			let mut prev_size = 0;
			for height in 0..=header.height {
				let hash = chains
					.get_hash(ChainType::Candidate, height)
					.ok_or_else(|| {
						Error::from(ErrorKind::SyncError("candidate chain too short".into()))
					})?;
				let h = batch.get_block_header(&hash)?;
				new_txhashset.save_output_positions(prev_size, &h, &batch)?;
				prev_size = h.output_mmr_size;
			}
		}
		batch.commit()?;

		// Install the new txhashset and promote the confirmed chain onto the
		// candidate chain up through the snapshot block.
		{
			let mut txhashset_ref = self.txhashset.write();
			*txhashset_ref = new_txhashset;
		}
		{
			let mut chains = self.chains.write();
			chains.reorg(ChainType::Candidate, ChainType::Confirmed, header.height)?;
			chains.flush()?;
		}

		status.on_done();
		Ok(())
	}

	/// Ingest a txhashset snapshot archive from a file on disk, status form
	/// (the API surface exposed to the network layer).
	pub fn process_txhashset(
		&self,
		h: Hash,
		archive_path: &Path,
		status: &dyn TxHashsetWriteStatus,
	) -> ProcessStatus {
		let file = match File::open(archive_path) {
			Ok(file) => file,
			Err(_) => return ProcessStatus::StoreError,
		};
		match self.txhashset_write(h, file, status) {
			Ok(()) => ProcessStatus::Success,
			Err(e) => {
				error!("chain: process_txhashset: failed: {}", e);
				status_from_error(&e)
			}
		}
	}

	/// Builds (or fetches from cache) a txhashset snapshot archive rewound
	/// to the given header, for serving to a fast-syncing peer. The header
	/// must be within the cut-through horizon, older states have been
	/// compacted away.
	pub fn snapshot_txhashset(&self, header: &BlockHeader) -> Result<File, Error> {
		let horizon = self
			.get_height(ChainType::Confirmed)
			.saturating_sub(global::cut_through_horizon() as u64);
		if header.height < horizon {
			return Err(ErrorKind::Unfit("snapshot beyond cut-through horizon".to_owned()).into());
		}

		{
			let mut txhashset = self.txhashset.write();
			txhashset::extending_readonly(&mut txhashset, |ext| {
				ext.rewind(header)?;
				ext.snapshot()?;
				Ok(())
			})?;
		}

		txhashset::zip_read(&self.db_root, header)
	}

	/// Rewind the confirmed chain back to genesis, rebuild the header MMR
	/// from the candidate chain and trim the sync chain to the candidate
	/// chain. The node then re-downloads and re-validates block bodies.
	pub fn resync_chain(&self) -> Result<(), Error> {
		let _lock = self.chain_lock.lock();

		let mut chains = self.chains.write();
		let mut header_mmr = self.header_mmr.write();
		let mut txhashset = self.txhashset.write();

		// Roll the txhashset state back to genesis so block bodies can be
		// re-applied as they arrive.
		let genesis = self.genesis.clone();
		let mut batch = self.store.batch()?;
		txhashset::extending(&mut txhashset, &mut batch, |ext| ext.rewind(&genesis))?;
		batch.commit()?;

		chains.rewind(ChainType::Confirmed, 0)?;

		let candidate_height = chains.height(ChainType::Candidate);
		chains.reorg(ChainType::Candidate, ChainType::Sync, candidate_height)?;

		// Rebuild the header MMR to match the candidate chain exactly.
		let mut headers = Vec::with_capacity(candidate_height as usize + 1);
		for height in 0..=candidate_height {
			let hash = chains
				.get_hash(ChainType::Candidate, height)
				.ok_or_else(|| Error::from(ErrorKind::Other("bad candidate chain".into())))?;
			headers.push(self.store.get_block_header(&hash)?);
		}
		header_mmr.rebuild(&headers)?;

		chains.flush()?;
		Ok(())
	}

	/// Compact the underlying MMR files beyond the horizon and have the
	/// prune list absorb the spent positions.
	pub fn compact(&self) -> Result<(), Error> {
		let _lock = self.chain_lock.lock();

		let horizon_height = self
			.get_height(ChainType::Confirmed)
			.saturating_sub(global::cut_through_horizon() as u64);
		let horizon_header = self.get_header_by_height(horizon_height, ChainType::Confirmed)?;

		let mut txhashset = self.txhashset.write();
		let batch = self.store.batch()?;
		txhashset.compact(&horizon_header, &batch)?;
		batch.commit()?;
		Ok(())
	}

	/// Access to the transaction pool.
	pub fn tx_pool(&self) -> Arc<TransactionPool> {
		self.tx_pool.clone()
	}

	/// Number of orphans in the pool.
	pub fn orphans_len(&self) -> usize {
		self.orphans.len()
	}

	/// An (unverified) view of the current txhashset roots.
	pub fn get_txhashset_roots(&self) -> crate::types::TxHashSetRoots {
		self.txhashset.read().roots()
	}
}

/// Map internal pipeline errors onto the status enum handed to the network
/// layer: bad data means the peer gets banned, store errors are ours, the
/// rest leaves the peer alone.
pub fn status_from_error(e: &Error) -> ProcessStatus {
	match e.kind() {
		ErrorKind::Orphan | ErrorKind::OrphanHeader => ProcessStatus::Orphaned,
		ErrorKind::StoreErr(_, _) => ProcessStatus::StoreError,
		ErrorKind::TransactionsMissing => ProcessStatus::TransactionsMissing,
		ErrorKind::Unfit(_) => ProcessStatus::Invalid,
		_ => {
			if e.is_bad_data() {
				ProcessStatus::Invalid
			} else {
				ProcessStatus::UnknownError
			}
		}
	}
}
