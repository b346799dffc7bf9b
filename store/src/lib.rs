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

//! Storage facilities for the nimble chain: an LMDB-backed key-value store
//! with atomic batches, append-only files for the MMRs and the bitmap-based
//! leaf set and prune list.

#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]
#![warn(missing_docs)]

#[macro_use]
extern crate failure_derive;
#[macro_use]
extern crate log;

use nimble_core as core;

pub mod leaf_set;
pub mod lmdb;
pub mod pmmr;
pub mod prune_list;
pub mod types;

pub use crate::lmdb::*;

// Re-export so consumers don't need their own lmdb dependency to hold an
// environment handle.
pub use lmdb_zero;

use croaring::Bitmap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;

/// Build a db key from a prefix and a byte vector identifier.
pub fn to_key(prefix: u8, k: &mut Vec<u8>) -> Vec<u8> {
	let mut res = Vec::with_capacity(k.len() + 2);
	res.push(prefix);
	res.push(b':');
	res.append(k);
	res
}

/// Read a roaring bitmap from the given file, in its portable serialized
/// form.
pub fn read_bitmap<P: AsRef<Path>>(file_path: P) -> io::Result<Bitmap> {
	let mut bitmap_file = File::open(file_path)?;
	let mut buffer = vec![];
	bitmap_file.read_to_end(&mut buffer)?;
	Ok(Bitmap::deserialize(&buffer))
}

/// Writes a file to disk via a temp file and a rename, so an interrupted
/// write never leaves a half-written file behind.
pub fn save_via_temp_file<F, P, E>(path: P, temp_suffix: E, write_fn: F) -> io::Result<()>
where
	F: FnOnce(Box<dyn Write>) -> io::Result<()>,
	P: AsRef<Path>,
	E: AsRef<Path>,
{
	let temp_suffix = temp_suffix.as_ref();
	assert!(!temp_suffix.as_os_str().is_empty());

	let original = path.as_ref();
	let mut _temp_path = original.to_path_buf();
	let temp_path = {
		let mut file_name = _temp_path
			.file_name()
			.expect("no filename")
			.to_os_string();
		file_name.push(temp_suffix);
		_temp_path.with_file_name(file_name)
	};

	// Write the new file under the temp name.
	{
		let file = File::create(&temp_path)?;
		let writer = BufWriter::new(file);
		write_fn(Box::new(writer))?;
	}

	// Move the temp file in place of the original.
	fs::rename(&temp_path, original)?;

	Ok(())
}
