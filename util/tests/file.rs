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
use std::path::Path;

use crate::util::file;

#[test]
fn copy_dir() {
	let root = Path::new("./target/tmp2");
	let _ = fs::remove_dir_all(root);
	fs::create_dir_all(root.join("./original/sub")).unwrap();
	fs::create_dir_all(root.join("./original/sub2")).unwrap();
	write_files("original".to_string(), &root).unwrap();

	let original_path = root.join("original");
	let copy_path = root.join("copy");
	let copied = file::copy_dir_to(&original_path, &copy_path).unwrap();
	assert_eq!(copied, 3);

	assert!(copy_path.join("foo.txt").is_file());
	assert!(copy_path.join("bar.txt").is_file());
	assert!(copy_path.join("sub").is_dir());
	assert!(copy_path.join("sub/lorem").is_file());
	assert!(copy_path.join("sub2").is_dir());
	assert_eq!(
		copy_path.join("sub/lorem").metadata().unwrap().len(),
		original_path.join("sub/lorem").metadata().unwrap().len()
	);

	fs::remove_dir_all(root).unwrap();
}

#[test]
fn delete_file_and_dir() {
	let root = Path::new("./target/tmp3");
	let _ = fs::remove_dir_all(root);
	fs::create_dir_all(root.join("dir/sub")).unwrap();
	let mut f = File::create(root.join("dir/file.txt")).unwrap();
	f.write_all(b"data").unwrap();

	file::delete(root.join("dir/file.txt").to_path_buf()).unwrap();
	assert!(!root.join("dir/file.txt").exists());

	file::delete(root.join("dir").to_path_buf()).unwrap();
	assert!(!root.join("dir").exists());

	// deleting something that isn't there is not an error
	file::delete(root.join("nope").to_path_buf()).unwrap();

	fs::remove_dir_all(root).unwrap();
}

fn write_files(dir_name: String, root: &Path) -> io::Result<()> {
	let mut file = File::create(root.join(dir_name.clone() + "/foo.txt"))?;
	file.write_all(b"Hello, world!")?;
	let mut file = File::create(root.join(dir_name.clone() + "/bar.txt"))?;
	file.write_all(b"Goodbye, world!")?;
	let mut file = File::create(root.join(dir_name + "/sub/lorem"))?;
	file.write_all(b"Lorem ipsum dolor sit amet, consectetur adipiscing elit")?;
	Ok(())
}
