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

//! The chain-state engine: accepts headers and blocks from the network,
//! validates them against consensus rules and maintains the sync, candidate
//! and confirmed chains along with the TxHashSet they commit to.

#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]
#![warn(missing_docs)]

#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate log;
#[macro_use]
extern crate serde_derive;

use nimble_core as core;
use nimble_store as store;
use nimble_util as util;

mod chain;
mod chains;
pub mod error;
mod header_mmr;
mod orphans;
pub mod pipe;
pub mod chain_store;
pub mod txhashset;
pub mod txpool;
pub mod types;

// Re-export the base interface the chain exposes
pub use crate::chain::Chain;
pub use crate::chain_store::{ChainStore, OutputPos};
pub use crate::chains::{ChainSet, ChainType};
pub use crate::error::{Error, ErrorKind};
pub use crate::header_mmr::HeaderMMR;
pub use crate::orphans::{Orphan, OrphanBlockPool, OrphanHeaderCache};
pub use crate::txpool::{PoolType, TransactionPool};
pub use crate::types::{
	NoStatus, Options, ProcessStatus, StopState, SyncState, Tip, TxHashSetRoots,
	TxHashsetWriteStatus,
};
