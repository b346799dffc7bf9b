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

//! Library containing lower level transaction building functions needed by
//! all wallets. Verification-side helpers live here too so the chain and the
//! wallet agree on signature messages and proof construction.

use byteorder::{BigEndian, ByteOrder};

pub mod aggsig;
pub mod error;
pub mod proof;
pub mod reward;

pub use crate::libtx::error::{Error, ErrorKind};

/// Builds the message to be signed by a transaction kernel. Consists of the
/// fee and the lock_height, which are all a kernel commits to.
pub fn kernel_sig_msg(fee: u64, lock_height: u64) -> [u8; 32] {
	let mut bytes = [0; 32];
	BigEndian::write_u64(&mut bytes[16..24], fee);
	BigEndian::write_u64(&mut bytes[24..], lock_height);
	bytes
}
