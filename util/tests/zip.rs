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

use nimble_util as util;

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::util::zip;

#[test]
fn zip_unzip() {
	let root = Path::new("./target/tmp");
	let zip_name = "./target/tmp/zipped.zip";

	let _ = fs::remove_dir_all(root);
	fs::create_dir_all(root.join("./to_zip/sub")).unwrap();
	write_files(&root).unwrap();

	let zip_file = File::create(zip_name).unwrap();
	let files = vec![
		PathBuf::from("foo.txt"),
		PathBuf::from("bar.txt"),
		PathBuf::from("sub/lorem"),
		// in the list but not on disk, quietly skipped
		PathBuf::from("optional.bin"),
	];
	zip::create_zip(&zip_file, &root.join("./to_zip"), files.clone()).unwrap();

	let zip_path = Path::new(zip_name);
	assert!(zip_path.exists());
	assert!(zip_path.is_file());
	assert!(zip_path.metadata().unwrap().len() > 200);

	fs::create_dir_all(root.join("./dezipped")).unwrap();
	let zip_file = File::open(zip_name).unwrap();
	zip::extract_files(zip_file, &root.join("./dezipped"), files).unwrap();

	assert!(root.join("dezipped/foo.txt").is_file());
	assert!(root.join("dezipped/bar.txt").is_file());
	assert!(root.join("dezipped/sub").is_dir());
	let lorem = root.join("dezipped/sub/lorem");
	assert!(lorem.is_file());
	assert_eq!(lorem.metadata().unwrap().len(), 55);
	// the optional file stays absent on both ends
	assert!(!root.join("dezipped/optional.bin").exists());
}

#[test]
fn extract_ignores_unlisted_files() {
	let root = Path::new("./target/tmp_unlisted");
	let zip_name = "./target/tmp_unlisted/zipped.zip";

	let _ = fs::remove_dir_all(root);
	fs::create_dir_all(root.join("./to_zip")).unwrap();
	let mut file = File::create(root.join("to_zip/wanted.txt")).unwrap();
	file.write_all(b"wanted").unwrap();
	let mut file = File::create(root.join("to_zip/smuggled.txt")).unwrap();
	file.write_all(b"smuggled").unwrap();

	let zip_file = File::create(zip_name).unwrap();
	zip::create_zip(
		&zip_file,
		&root.join("./to_zip"),
		vec![
			PathBuf::from("wanted.txt"),
			PathBuf::from("smuggled.txt"),
		],
	)
	.unwrap();

	// Only extract the explicitly wanted file.
	fs::create_dir_all(root.join("./dezipped")).unwrap();
	let zip_file = File::open(zip_name).unwrap();
	zip::extract_files(
		zip_file,
		&root.join("./dezipped"),
		vec![PathBuf::from("wanted.txt")],
	)
	.unwrap();

	assert!(root.join("dezipped/wanted.txt").is_file());
	assert!(!root.join("dezipped/smuggled.txt").exists());
}

fn write_files(root: &Path) -> io::Result<()> {
	let mut file = File::create(root.join("to_zip/foo.txt"))?;
	file.write_all(b"Hello, world!")?;
	let mut file = File::create(root.join("to_zip/bar.txt"))?;
	file.write_all(b"Goodbye, world!")?;
	let mut file = File::create(root.join("to_zip/sub/lorem"))?;
	file.write_all(b"Lorem ipsum dolor sit amet, consectetur adipiscing elit")?;
	Ok(())
}
