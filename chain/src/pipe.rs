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

//! Implementation of the chain block acceptance (or refusal) pipeline.

use std::sync::Arc;

use chrono::prelude::Utc;
use chrono::Duration;

use crate::chain_store::{Batch, DifficultyIter};
use crate::chains::{ChainSet, ChainType};
use crate::core::consensus;
use crate::core::core::hash::Hashed;
use crate::core::core::{Block, BlockHeader, BlockSums, Committed};
use crate::core::global;
use crate::core::pow;
use crate::error::{Error, ErrorKind};
use crate::header_mmr::HeaderMMR;
use crate::orphans::{OrphanBlockPool, OrphanHeaderCache};
use crate::txhashset::{self, Extension, TxHashSet};
use crate::types::{Options, ProcessStatus, StopState, Tip};

/// Number of headers validated and applied per chunk during header sync.
const SYNC_BATCH_SIZE: usize = 32;

/// Contextual information required to process a new block or header. Bundles
/// the batch-write scope over every store the pipeline touches: the block
/// db batch, the three chains, the header MMR and the txhashset. On success
/// the caller commits them all, on failure it discards them all.
pub struct BlockContext<'a> {
	/// The options
	pub opts: Options,
	/// The pow verifier to use when processing a block.
	pub pow_verifier: fn(&BlockHeader) -> Result<(), pow::Error>,
	/// The active batch to use for block processing.
	pub batch: Batch<'a>,
	/// The sync, candidate and confirmed chains.
	pub chains: &'a mut ChainSet,
	/// The header MMR.
	pub header_mmr: &'a mut HeaderMMR,
	/// The active txhashset (output, rangeproof, kernel MMRs).
	pub txhashset: &'a mut TxHashSet,
	/// Blocks waiting on a missing parent.
	pub orphans: Arc<OrphanBlockPool>,
	/// Headers waiting on a missing parent.
	pub orphan_headers: Arc<OrphanHeaderCache>,
	/// Cooperative shutdown flag, polled at batch boundaries.
	pub stop_state: Arc<StopState>,
}

// Classification of an incoming block relative to the confirmed chain.
enum BlockStatus {
	// Block extends the confirmed tip directly.
	NextBlock,
	// Block connects through the provided sequence of ancestor fork blocks.
	Reorg(Vec<Block>),
	// Block (or one of its ancestors) cannot be connected yet.
	Orphan,
}

/// Process a single header received from a peer. Chains it onto the
/// candidate chain when it fits, walks fork ancestry when it claims more
/// work, stashes it as an orphan otherwise.
pub fn process_block_header(
	header: &BlockHeader,
	ctx: &mut BlockContext<'_>,
) -> Result<ProcessStatus, Error> {
	debug!(
		"pipe: process_block_header: {} at {}",
		header.hash(),
		header.height
	);

	if header.height == 0 {
		return Err(ErrorKind::InvalidBlockHeight.into());
	}

	// Check if this header is already part of the candidate chain.
	if ctx
		.chains
		.is_on_chain(ChainType::Candidate, header.hash(), header.height)
	{
		return Ok(ProcessStatus::AlreadyExists);
	}

	let candidate_tip_hash = ctx.chains.tip_hash(ChainType::Candidate);
	if candidate_tip_hash != header.prev_hash {
		// Not the next candidate header. If it does not claim more total
		// work than our candidate tip it can only be an orphan.
		let candidate_head = ctx.batch.get_block_header(&candidate_tip_hash)?;
		if header.total_difficulty() > candidate_head.total_difficulty() {
			// Walk the alternate chain backward through the orphan header
			// cache and the db. If every ancestor down to the candidate
			// chain is known we can process the fork as a header reorg.
			let mut fork_headers = vec![header.clone()];
			let mut current = header.clone();
			loop {
				let prev_hash = current.prev_hash;
				let prev = match ctx.orphan_headers.get(&prev_hash) {
					Some(h) => h,
					None => match ctx.batch.get_block_header(&prev_hash) {
						Ok(h) => h,
						Err(_) => {
							// Missing ancestor, stash and wait for it.
							ctx.orphan_headers.add(header);
							return Ok(ProcessStatus::Orphaned);
						}
					},
				};
				if ctx
					.chains
					.is_on_chain(ChainType::Candidate, prev.hash(), prev.height)
				{
					// All ancestors are known, reorg onto the fork.
					fork_headers.reverse();
					return process_header_chunk(&fork_headers, ctx);
				}
				fork_headers.push(prev.clone());
				current = prev;
			}
		}

		debug!(
			"pipe: process_block_header: {} at {} is an orphan header",
			header.hash(),
			header.height
		);
		ctx.orphan_headers.add(header);
		return Ok(ProcessStatus::Orphaned);
	}

	// Next candidate header, validate and append.
	let prev = ctx.batch.get_block_header(&header.prev_hash)?;
	validate_header(header, &prev, ctx)?;

	ctx.batch.save_block_header(header)?;
	ctx.header_mmr.apply_header(header)?;

	// The sync chain tracks the candidate chain whenever it can, it only
	// diverges while header batches are in flight.
	if ctx.chains.tip_hash(ChainType::Sync) == header.prev_hash {
		ctx.chains
			.extend(ChainType::Sync, header.hash(), header.height)?;
	}
	ctx.chains
		.extend(ChainType::Candidate, header.hash(), header.height)?;

	Ok(ProcessStatus::Success)
}

/// Process a batch of headers during sync, in chunks of SYNC_BATCH_SIZE.
pub fn sync_block_headers(
	headers: &[BlockHeader],
	ctx: &mut BlockContext<'_>,
) -> Result<ProcessStatus, Error> {
	if headers.is_empty() {
		return Ok(ProcessStatus::Success);
	}

	if headers[0].height == 0 {
		return Err(ErrorKind::InvalidBlockHeight.into());
	}

	debug!(
		"pipe: sync_block_headers: {} headers from {}",
		headers.len(),
		headers[0].height
	);

	let mut all_known = true;
	for chunk in headers.chunks(SYNC_BATCH_SIZE) {
		if ctx.stop_state.is_stopped() {
			return Err(ErrorKind::Stopped.into());
		}
		let status = process_header_chunk(chunk, ctx)?;
		match status {
			ProcessStatus::Success => all_known = false,
			ProcessStatus::AlreadyExists => (),
			other => return Ok(other),
		}
	}
	if all_known {
		Ok(ProcessStatus::AlreadyExists)
	} else {
		Ok(ProcessStatus::Success)
	}
}

// Validate a chunk of headers against the sync chain, extending it and
// promoting the result to the candidate chain when total work increases.
fn process_header_chunk(
	headers: &[BlockHeader],
	ctx: &mut BlockContext<'_>,
) -> Result<ProcessStatus, Error> {
	// Filter out headers that are already part of the sync chain.
	let new_headers: Vec<&BlockHeader> = headers
		.iter()
		.filter(|h| {
			!ctx.chains
				.is_on_chain(ChainType::Sync, h.hash(), h.height)
		})
		.collect();

	if new_headers.is_empty() {
		return Ok(ProcessStatus::AlreadyExists);
	}

	let first = new_headers[0];

	// The first new header must chain onto the sync chain at the height
	// beneath it, otherwise we are missing headers and still syncing.
	if ctx.chains.get_hash(ChainType::Sync, first.height - 1) != Some(first.prev_hash) {
		info!(
			"pipe: process_header_chunk: headers do not connect to the sync chain, still syncing?"
		);
		return Ok(ProcessStatus::UnknownError);
	}

	// Rewind the header MMR so it contains exactly the headers beneath the
	// first new one.
	ctx.header_mmr.rewind_to_height(first.height - 1)?;

	// Rewind the sync chain too if the new headers fork beneath its tip.
	if ctx.chains.tip_hash(ChainType::Sync) != first.prev_hash {
		ctx.chains.rewind(ChainType::Sync, first.height - 1)?;
	}

	// Validate each header against the one before it, extending the MMR,
	// the header db and the sync chain as we go.
	let mut prev = ctx.batch.get_block_header(&first.prev_hash)?;
	for header in &new_headers {
		validate_header(header, &prev, ctx)?;
		ctx.header_mmr.apply_header(header)?;
		ctx.batch.save_block_header(header)?;
		ctx.chains
			.extend(ChainType::Sync, header.hash(), header.height)?;
		prev = (*header).clone();
	}

	// If the sync chain now claims more total work than the candidate chain,
	// promote it. Otherwise the candidate keeps the tip and the sync chain
	// (and header MMR) move back onto it.
	let sync_head = prev;
	let candidate_tip_hash = ctx.chains.tip_hash(ChainType::Candidate);
	let candidate_head = ctx.batch.get_block_header(&candidate_tip_hash)?;

	if sync_head.total_difficulty() > candidate_head.total_difficulty() {
		ctx.chains
			.reorg(ChainType::Sync, ChainType::Candidate, sync_head.height)?;
		ctx.header_mmr.commit()?;
	} else {
		ctx.header_mmr.rollback();
		let candidate_height = ctx.chains.height(ChainType::Candidate);
		ctx.chains
			.reorg(ChainType::Candidate, ChainType::Sync, candidate_height)?;
	}

	Ok(ProcessStatus::Success)
}

/// First level of block validation that only needs to act on the block
/// header to make it as cheap as possible. The different validations are
/// arranged by order of cost to have as little DoS surface as possible.
fn validate_header(
	header: &BlockHeader,
	prev: &BlockHeader,
	ctx: &mut BlockContext<'_>,
) -> Result<(), Error> {
	// check the height
	if header.height != prev.height + 1 {
		return Err(ErrorKind::InvalidBlockHeight.into());
	}

	// check the version against the scheduled hard forks
	if !consensus::valid_header_version(header.height, header.version) {
		error!(
			"Invalid block header version received ({}), maybe update nimble?",
			header.version
		);
		return Err(ErrorKind::InvalidBlockVersion(header.version).into());
	}

	// check the timestamps, monotonic and not too far in the future
	if header.timestamp <= prev.timestamp {
		return Err(ErrorKind::InvalidBlockTime.into());
	}
	if header.timestamp
		> Utc::now() + Duration::seconds(12 * consensus::BLOCK_TIME_SEC as i64)
	{
		// refuse blocks more than 12 block intervals in the future
		return Err(ErrorKind::InvalidBlockTime.into());
	}

	if !ctx.opts.contains(Options::SKIP_POW) {
		if header.pow.edge_bits() < global::min_edge_bits() {
			return Err(ErrorKind::LowEdgebits.into());
		}
		if (ctx.pow_verifier)(header).is_err() {
			error!(
				"pipe: error validating header with cuckoo edge_bits {}",
				header.pow.edge_bits()
			);
			return Err(ErrorKind::InvalidPow.into());
		}
	}

	// verify the total difficulty increased and by exactly the target
	// difficulty for the window
	if header.total_difficulty() <= prev.total_difficulty() {
		return Err(ErrorKind::DifficultyTooLow.into());
	}

	if !ctx.opts.contains(Options::SKIP_POW) {
		let target_difficulty = header.total_difficulty() - prev.total_difficulty();

		// The proof itself must reach the target difficulty.
		if header.pow.to_difficulty(header.height) < target_difficulty {
			return Err(ErrorKind::DifficultyTooLow.into());
		}

		// explicit check to ensure total_difficulty has increased by exactly
		// the _network_ difficulty of the previous block
		// (during testnet1 we use _block_ difficulty here)
		let child_batch = &ctx.batch;
		let diff_iter = DifficultyIter::from_batch(header.prev_hash, child_batch);
		let next_header_info = consensus::next_difficulty(header.height, diff_iter);
		if target_difficulty != next_header_info.difficulty {
			info!(
				"validate_header: header target difficulty {} != {}",
				target_difficulty.to_num(),
				next_header_info.difficulty.to_num()
			);
			return Err(ErrorKind::WrongTotalDifficulty.into());
		}
		// check the secondary PoW scaling factor if applicable
		if header.pow.secondary_scaling != next_header_info.secondary_scaling {
			info!(
				"validate_header: header secondary scaling {} != {}",
				header.pow.secondary_scaling, next_header_info.secondary_scaling
			);
			return Err(ErrorKind::InvalidScaling.into());
		}
	}

	// The header must commit to the root of the header MMR as it stood at
	// the previous header.
	ctx.header_mmr.validate_prev_root(header)?;

	Ok(())
}

/// Runs the block processing pipeline, including validation and finding a
/// place for the new block in the chain.
/// Returns the new chain tip (when the confirmed chain advanced) along with
/// the resulting status.
pub fn process_block(
	b: &Block,
	ctx: &mut BlockContext<'_>,
) -> Result<(Option<Tip>, ProcessStatus), Error> {
	debug!(
		"pipe: process_block {} at {} [in/out/kern: {}/{}/{}]",
		b.hash(),
		b.header.height,
		b.inputs().len(),
		b.outputs().len(),
		b.kernels().len(),
	);

	if ctx.stop_state.is_stopped() {
		return Err(ErrorKind::Stopped.into());
	}

	// Blocks beneath the cut-through horizon can no longer reorg the chain,
	// reject them before touching any state.
	let candidate_height = ctx.chains.height(ChainType::Candidate);
	let horizon = candidate_height.saturating_sub(global::cut_through_horizon() as u64);
	if b.header.height <= horizon && b.header.height > 0 {
		return Err(ErrorKind::Unfit("block beyond cut-through horizon".to_owned()).into());
	}

	// Make sure the header is processed and valid before the block body.
	// An orphaned header is fine, the body classification below will stash
	// the block in the orphan pool too.
	process_block_header(&b.header, ctx)?;

	// Check if we already know about this full block.
	if ctx
		.chains
		.is_on_chain(ChainType::Confirmed, b.hash(), b.header.height)
	{
		return Ok((None, ProcessStatus::AlreadyExists));
	}

	// Quick self-consistency check before any heavier processing: ordering,
	// uniqueness, cut-through, weight, kernel lock heights.
	b.validate_read()?;

	// Where does this block fit relative to the confirmed chain?
	let status = determine_block_status(b, ctx)?;

	match status {
		BlockStatus::Orphan => {
			// A valid-looking block we cannot connect yet. The caller stashes
			// it in the orphan pool.
			Err(ErrorKind::Orphan.into())
		}
		BlockStatus::NextBlock => {
			let tip = process_next_block(b, ctx)?;
			Ok((Some(tip), ProcessStatus::Success))
		}
		BlockStatus::Reorg(fork_blocks) => {
			let tip = process_fork_block(b, fork_blocks, ctx)?;
			Ok((tip, ProcessStatus::Success))
		}
	}
}

// Classify the block relative to the confirmed chain, collecting the fork
// ancestry when a reorg is needed.
fn determine_block_status(
	b: &Block,
	ctx: &mut BlockContext<'_>,
) -> Result<BlockStatus, Error> {
	let header = &b.header;

	// Orphan if the block is not on the candidate chain (its header was
	// orphaned or lost a fork race).
	if !ctx
		.chains
		.is_on_chain(ChainType::Candidate, header.hash(), header.height)
	{
		return Ok(BlockStatus::Orphan);
	}

	// Next block if it chains straight onto the confirmed tip.
	let confirmed_height = ctx.chains.height(ChainType::Confirmed);
	if ctx.chains.tip_hash(ChainType::Confirmed) == header.prev_hash
		&& confirmed_height + 1 == header.height
	{
		return Ok(BlockStatus::NextBlock);
	}

	// Otherwise this is a fork. Collect the candidate-chain blocks between
	// the fork point and this block; if any is missing (from both the orphan
	// pool and the block db) we cannot reorg yet.
	let fork_point = ctx
		.chains
		.find_common_height(ChainType::Candidate, ChainType::Confirmed);

	debug!(
		"pipe: determine_block_status: fork detected at height {}",
		fork_point + 1
	);

	let mut fork_blocks = vec![];
	for height in (fork_point + 1)..header.height {
		let hash = ctx
			.chains
			.get_hash(ChainType::Candidate, height)
			.ok_or_else(|| Error::from(ErrorKind::Other("candidate chain too short".to_owned())))?;
		let block = match ctx.orphans.get(&hash) {
			Some(block) => block,
			None => match ctx.batch.get_block(&hash) {
				Ok(block) => block,
				Err(_) => return Ok(BlockStatus::Orphan),
			},
		};
		fork_blocks.push(block);
	}

	Ok(BlockStatus::Reorg(fork_blocks))
}

// The happy path: apply the block on top of the confirmed tip and extend the
// confirmed chain.
fn process_next_block(b: &Block, ctx: &mut BlockContext<'_>) -> Result<Tip, Error> {
	// The block body is persisted in the outer batch, so it survives even
	// when the txhashset extension gets discarded.
	ctx.batch.save_block(b)?;

	// Extend the confirmed chain up front. The in-memory chain state is
	// discarded wholesale when anything below fails, so the extension's file
	// sync stays the single point of no return.
	ctx.chains
		.copy_block(ChainType::Candidate, ChainType::Confirmed, b.header.height)?;

	txhashset::extending(ctx.txhashset, &mut ctx.batch, |ext| {
		validate_and_add_block(b, ext)
	})?;

	Ok(Tip::from_header(&b.header))
}

// Fork handling: rewind the txhashset to the common ancestor, re-apply the
// fork blocks and the new block, then move the confirmed chain over if the
// fork wins on total difficulty.
fn process_fork_block(
	b: &Block,
	fork_blocks: Vec<Block>,
	ctx: &mut BlockContext<'_>,
) -> Result<Option<Tip>, Error> {
	let fork_point = ctx
		.chains
		.find_common_height(ChainType::Candidate, ChainType::Confirmed);
	let fork_hash = ctx
		.chains
		.get_hash(ChainType::Candidate, fork_point)
		.ok_or_else(|| Error::from(ErrorKind::Other("no fork point hash".to_owned())))?;
	let fork_header = ctx.batch.get_block_header(&fork_hash)?;

	let confirmed_tip_hash = ctx.chains.tip_hash(ChainType::Confirmed);
	let confirmed_head = ctx.batch.get_block_header(&confirmed_tip_hash)?;

	// Persist the new block itself in the outer batch; fork ancestors came
	// out of the orphan pool or are already persisted.
	ctx.batch.save_block(b)?;
	for block in &fork_blocks {
		if !ctx.batch.block_exists(&block.hash())? {
			ctx.batch.save_block(block)?;
		}
	}

	let fork_wins = b.header.total_difficulty() > confirmed_head.total_difficulty();

	// Move the confirmed chain first so a failure anywhere below discards
	// everything together.
	if fork_wins {
		ctx.chains
			.reorg(ChainType::Candidate, ChainType::Confirmed, b.header.height)?;
	}

	txhashset::extending(ctx.txhashset, &mut ctx.batch, |ext| {
		// Rewind to the common ancestor, restoring spent outputs.
		ext.rewind(&fork_header)?;

		// Apply and validate every block along the fork.
		for block in &fork_blocks {
			validate_and_add_block(block, ext)?;
		}
		validate_and_add_block(b, ext)?;

		if !fork_wins {
			// Valid fork, but it does not beat the current confirmed tip.
			// The blocks stay persisted (no re-validation later), the state
			// change is thrown away.
			debug!(
				"pipe: process_fork_block: fork at {} does not beat confirmed tip",
				b.header.height
			);
			ext.force_rollback();
		}
		Ok(())
	})?;

	if fork_wins {
		// The fork blocks are confirmed now, they are no longer orphans.
		for block in &fork_blocks {
			ctx.orphans.remove(&block.hash());
		}
		Ok(Some(Tip::from_header(&b.header)))
	} else {
		Ok(None)
	}
}

// Validate the block against the chain state and apply it to the txhashset,
// saving the resulting block sums. Called within an extension, so any
// failure unwinds cleanly.
fn validate_and_add_block(b: &Block, ext: &mut Extension<'_>) -> Result<(), Error> {
	// Full stateless validation: coinbase rules, kernel signatures,
	// rangeproofs and the block-level kernel sum.
	let prev = ext.batch.get_block_header(&b.header.prev_hash)?;
	b.validate(&prev.total_kernel_offset)?;

	// Contextual validation: coinbase-flagged inputs must spend sufficiently
	// mature outputs.
	ext.verify_coinbase_maturity(b)?;

	// Apply to the MMRs: spends inputs, appends outputs and kernels, records
	// the input bitmap and output positions.
	ext.apply_block(b)?;

	// The resulting state must match what the header committed to.
	ext.validate_roots(&b.header)?;
	ext.validate_sizes(&b.header)?;

	// Kernel sums must balance as a delta from the previous block's sums.
	let sums = verify_block_sums(b, ext.batch)?;
	ext.batch.save_block_sums(&b.hash(), &sums)?;

	Ok(())
}

/// Verify the block against the previous block's sums, returning the new
/// cumulative sums: sum of outputs minus sum of kernel excesses, accounting
/// for the reward overage and the cumulative kernel offset, must balance.
pub fn verify_block_sums(b: &Block, batch: &Batch<'_>) -> Result<BlockSums, Error> {
	// Retrieve the block_sums for the previous block.
	let block_sums = batch.get_block_sums(&b.header.prev_hash)?;

	// Overage is based purely on the new block.
	// Previous block_sums have taken all previous overage into account.
	let overage = b.header.overage();

	// Offset on the other hand is the total kernel offset of the new block.
	let offset = b.header.total_kernel_offset();

	// Verify the kernel sums for the block_sums with the new block applied.
	let (utxo_sum, kernel_sum) =
		(block_sums, b as &dyn Committed).verify_kernel_sums(overage, offset)?;

	Ok(BlockSums {
		utxo_sum,
		kernel_sum,
	})
}
