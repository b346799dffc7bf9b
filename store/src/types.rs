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

//! Common storage-related types
use memmap;

use crate::core::ser::{self, FixedLength, Readable, Writeable};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Write};
use std::marker;
use std::path::{Path, PathBuf};

/// Data file (MMR) wrapper around an append-only file, tracking elements of a
/// fixed serialized width so positions translate directly to byte offsets.
pub struct DataFile<T> {
	file: AppendOnlyFile,
	_marker: marker::PhantomData<T>,
}

impl<T> DataFile<T>
where
	T: FixedLength + Readable + Writeable,
{
	/// Open (or create) a file at the provided path on disk.
	pub fn open<P: AsRef<Path>>(path: P) -> io::Result<DataFile<T>> {
		let file = AppendOnlyFile::open(path)?;
		Ok(DataFile {
			file,
			_marker: marker::PhantomData,
		})
	}

	/// Append an element to the file.
	/// Will not be written to disk until flush() is subsequently called.
	/// Alternatively discard() may be called to discard any pending changes.
	pub fn append(&mut self, data: &T) -> io::Result<u64> {
		let bytes = ser::ser_vec(data)
			.map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, format!("{}", e)))?;
		self.file.append(&bytes);
		Ok(self.size_unsync())
	}

	/// Read an element from the file by position (1-indexed, the way the MMR
	/// addresses things).
	/// Assumes caller has already "shifted" the position to account for
	/// pruned data.
	pub fn read(&self, position: u64) -> Option<T> {
		// The MMR starts at 1, the backing file at 0.
		let pos = position.checked_sub(1)?;
		let data = self.file.read(pos * T::LEN as u64, T::LEN as u64);
		if data.len() != T::LEN {
			return None;
		}
		match ser::deserialize(&mut &data[..]) {
			Ok(x) => Some(x),
			Err(e) => {
				error!(
					"Corrupted storage, could not read an entry from data file: {:?}",
					e
				);
				None
			}
		}
	}

	/// Rewind the backend file to the specified element count.
	pub fn rewind(&mut self, position: u64) {
		self.file.rewind(position * T::LEN as u64)
	}

	/// Flush unsynced changes to the file to disk.
	pub fn flush(&mut self) -> io::Result<()> {
		self.file.flush()
	}

	/// Discard any unsynced changes to the file.
	pub fn discard(&mut self) {
		self.file.discard()
	}

	/// Size of the file in number of elements (not bytes).
	/// Only includes flushed data.
	pub fn size(&self) -> u64 {
		self.file.size() / T::LEN as u64
	}

	/// Size of the file in elements including any unflushed data.
	pub fn size_unsync(&self) -> u64 {
		self.file.size_unsync() / T::LEN as u64
	}

	/// Path of the underlying file.
	pub fn path(&self) -> &Path {
		self.file.path()
	}

	/// Drop underlying file handles.
	pub fn release(&mut self) {
		self.file.release();
	}

	/// Write the file out to disk, pruning removed elements. The provided
	/// positions are 1-indexed (and already shifted for data removed by
	/// prior compaction rounds).
	pub fn save_prune(&mut self, prune_pos: &[u64]) -> io::Result<()> {
		// Convert from 1-index to 0-index.
		let prune_idx: Vec<_> = prune_pos.iter().map(|x| x - 1).collect();
		self.file.save_prune(prune_idx.as_slice(), T::LEN as u64)
	}
}

/// Wrapper for a file that can be read at any position (random read) but for
/// which writes are append only. Reads are backed by a memory map (mmap(2)),
/// relying on the operating system for fast access and caching. The memory
/// map is reallocated to expand it when new writes are flushed.
///
/// Despite being append-only, the file can still be pruned and truncated. The
/// former simply happens by rewriting it, ignoring some of the data. The
/// latter by truncating the underlying file and re-creating the mmap.
pub struct AppendOnlyFile {
	path: PathBuf,
	file: Option<File>,
	mmap: Option<memmap::Mmap>,

	// Buffer of unsynced bytes. These bytes will be appended to the file
	// when flushed.
	buffer: Vec<u8>,
	buffer_start_pos: u64,
	buffer_start_pos_bak: u64,
}

impl AppendOnlyFile {
	/// Open a file (existing or not) as append-only, backed by a mmap.
	pub fn open<P: AsRef<Path>>(path: P) -> io::Result<AppendOnlyFile> {
		let mut aof = AppendOnlyFile {
			file: None,
			path: path.as_ref().to_path_buf(),
			mmap: None,
			buffer: vec![],
			buffer_start_pos: 0,
			buffer_start_pos_bak: 0,
		};
		aof.init()?;
		Ok(aof)
	}

	/// (Re)init an underlying file and its associated memmap.
	fn init(&mut self) -> io::Result<()> {
		self.file = Some(
			OpenOptions::new()
				.read(true)
				.append(true)
				.create(true)
				.open(self.path.clone())?,
		);

		// If we have a non-empty file then mmap it.
		let sz = self.size();
		if sz > 0 {
			self.buffer_start_pos = sz;
			self.mmap = Some(unsafe { memmap::Mmap::map(self.file.as_ref().unwrap())? });
		} else {
			self.buffer_start_pos = 0;
		}

		Ok(())
	}

	/// Append data to the file. Until the append-only file is synced, data is
	/// only written to memory.
	pub fn append(&mut self, bytes: &[u8]) {
		self.buffer.extend_from_slice(bytes);
	}

	/// Rewinds the data file back to a previous position.
	/// We simply "rewind" the buffer_start_pos to the specified position.
	/// Note: We do not currently support rewinding within the buffer itself.
	pub fn rewind(&mut self, pos: u64) {
		if self.buffer_start_pos_bak == 0 {
			self.buffer_start_pos_bak = self.buffer_start_pos;
		}
		self.buffer_start_pos = pos;
		self.buffer.clear();
	}

	/// Syncs all writes (fsync), reallocating the memory map to make the newly
	/// written data accessible.
	pub fn flush(&mut self) -> io::Result<()> {
		if self.buffer_start_pos_bak > 0 {
			// Flushing a rewound state, truncate via set_len() before
			// appending. Drop and recreate the mmap or windows throws an
			// access error.
			self.mmap = None;
			self.file = None;
			{
				let file = OpenOptions::new()
					.read(true)
					.create(true)
					.write(true)
					.open(&self.path)?;
				file.set_len(self.buffer_start_pos)?;
			}
			let file = OpenOptions::new()
				.read(true)
				.create(true)
				.append(true)
				.open(&self.path)?;
			self.file = Some(file);
			self.buffer_start_pos_bak = 0;
		}

		self.file.as_mut().unwrap().write_all(&self.buffer[..])?;
		self.file.as_mut().unwrap().sync_all()?;

		self.buffer.clear();
		self.buffer_start_pos = self.size();

		// Note: file must be non-empty to memory map it
		if self.buffer_start_pos == 0 {
			self.mmap = None;
		} else {
			self.mmap = Some(unsafe { memmap::Mmap::map(self.file.as_ref().unwrap())? });
		}

		Ok(())
	}

	/// Discard the current non-flushed data.
	pub fn discard(&mut self) {
		if self.buffer_start_pos_bak > 0 {
			// discarding a rewound state, restore the buffer start
			self.buffer_start_pos = self.buffer_start_pos_bak;
			self.buffer_start_pos_bak = 0;
		}
		self.buffer = vec![];
	}

	/// Read length bytes of data at offset from the file.
	/// Leverages the memory map.
	pub fn read(&self, offset: u64, length: u64) -> Vec<u8> {
		if offset >= self.buffer_start_pos {
			let buffer_offset = (offset - self.buffer_start_pos) as usize;
			return self.read_from_buffer(buffer_offset, length as usize);
		}
		if let Some(mmap) = &self.mmap {
			let offset = offset as usize;
			let length = length as usize;
			if mmap.len() < (offset + length) {
				return vec![];
			}
			(&mmap[offset..(offset + length)]).to_vec()
		} else {
			vec![]
		}
	}

	// Read length bytes from the buffer, from offset (relative to the start
	// of the buffer).
	fn read_from_buffer(&self, offset: usize, length: usize) -> Vec<u8> {
		if self.buffer.len() < (offset + length) {
			vec![]
		} else {
			self.buffer[offset..(offset + length)].to_vec()
		}
	}

	/// Saves a copy of the current file content, skipping data at the
	/// provided prune offsets (0-indexed element positions). The element
	/// width is needed to translate positions to byte ranges.
	pub fn save_prune(&mut self, prune_offs: &[u64], record_len: u64) -> io::Result<()> {
		if prune_offs.is_empty() {
			return Ok(());
		}

		let tmp_path = self.path.with_extension("tmp");

		{
			let reader = File::open(&self.path)?;
			let mut buf_reader = BufReader::new(reader);
			let mut buf_writer = BufWriter::new(File::create(&tmp_path)?);

			let mut buf = vec![0; record_len as usize];
			let mut current_pos = 0;
			let mut prune_offs = prune_offs;
			loop {
				use std::io::Read;
				match buf_reader.read_exact(&mut buf) {
					Ok(()) => (),
					Err(ref e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
					Err(e) => return Err(e),
				}
				if !prune_offs.is_empty() && prune_offs[0] == current_pos {
					// Pruned position, skip it in the compact copy.
					prune_offs = &prune_offs[1..];
				} else {
					buf_writer.write_all(&buf)?;
				}
				current_pos += 1;
			}
			buf_writer.flush()?;
		}

		// Replace the underlying file -
		// pmmr_data.tmp -> pmmr_data.bin
		self.release();
		fs::remove_file(&self.path)?;
		fs::rename(&tmp_path, &self.path)?;

		// Now (re)init the file so everything is consistent.
		self.init()?;

		Ok(())
	}

	/// Release underlying file handles.
	pub fn release(&mut self) {
		self.mmap = None;
		self.file = None;
	}

	/// Current size of the file in bytes.
	pub fn size(&self) -> u64 {
		fs::metadata(&self.path).map(|md| md.len()).unwrap_or(0)
	}

	/// Current size of the file in bytes, including the unflushed buffer.
	pub fn size_unsync(&self) -> u64 {
		self.buffer_start_pos + self.buffer.len() as u64
	}

	/// Path of the underlying file.
	pub fn path(&self) -> &Path {
		&self.path
	}
}
