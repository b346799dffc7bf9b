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

//! Wrappers around the `zip-rs` library to create and extract zip archives
//! from an explicit list of files. Anything not in the list is ignored on
//! both ends, so a peer cannot smuggle unexpected files into our data dir.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::panic;
use std::path::{Path, PathBuf};

use self::zip_rs::result::ZipError;
use self::zip_rs::write::FileOptions;
use zip as zip_rs;

/// Create a zip archive from the provided list of files (relative to the
/// source directory). Missing files are skipped silently as some (the
/// rewound leaf files in particular) are optional.
pub fn create_zip(dst_file: &File, src_dir: &Path, files: Vec<PathBuf>) -> io::Result<()> {
	let mut writer = {
		let zip = zip_rs::ZipWriter::new(dst_file);
		BufWriter::new(zip)
	};

	let options = FileOptions::default()
		.compression_method(zip_rs::CompressionMethod::Stored)
		.unix_permissions(0o644);

	for x in &files {
		let file_path = src_dir.join(x);
		if let Ok(file) = File::open(file_path.clone()) {
			info!("compress: {:?} -> {:?}", file_path, x);
			writer.get_mut().start_file_from_path(x, options)?;
			io::copy(&mut BufReader::new(file), &mut writer)?;
			// Flush the BufWriter after each file so we start then next one
			// at the right offset.
			writer.flush()?;
		}
	}
	writer.into_inner()?.finish()?;
	dst_file.sync_all()?;
	Ok(())
}

/// Extract a set of files (and only those files) from the provided zip
/// archive into the destination directory.
pub fn extract_files(from_archive: File, dest: &Path, files: Vec<PathBuf>) -> io::Result<()> {
	// The zip reader panics on malformed archives, catch this here so a bad
	// peer cannot take the node down with a mangled snapshot.
	let res = panic::catch_unwind(panic::AssertUnwindSafe(move || {
		extract_files_impl(from_archive, dest, files)
	}));
	match res {
		Ok(inner) => inner,
		Err(e) => {
			error!("failed to extract files from zip: {:?}", e);
			Err(io::Error::new(
				io::ErrorKind::Other,
				"failed to extract files from zip",
			))
		}
	}
}

fn extract_files_impl(from_archive: File, dest: &Path, files: Vec<PathBuf>) -> io::Result<()> {
	let mut archive = zip_rs::ZipArchive::new(from_archive)
		.map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("{}", e)))?;

	for x in files {
		let file = match archive.by_name(&x.to_string_lossy()) {
			Ok(file) => file,
			// Some files in the list are optional, keep going.
			Err(ZipError::FileNotFound) => continue,
			Err(e) => {
				return Err(io::Error::new(io::ErrorKind::InvalidData, format!("{}", e)));
			}
		};

		let path = dest.join(file.sanitized_name());
		let parent_dir = path
			.parent()
			.ok_or_else(|| io::Error::new(io::ErrorKind::Other, "invalid parent dir"))?;
		fs::create_dir_all(&parent_dir)?;

		let mut outfile = BufWriter::new(fs::File::create(&path)?);
		io::copy(&mut BufReader::new(file), &mut outfile)?;
		outfile.flush()?;

		info!("extract_files: {:?}", path);

		// Set file permissions to "644" (Unix only).
		#[cfg(unix)]
		{
			use std::os::unix::fs::PermissionsExt;
			let mode = fs::Permissions::from_mode(0o644);
			fs::set_permissions(&path, mode)?;
		}
	}
	Ok(())
}
