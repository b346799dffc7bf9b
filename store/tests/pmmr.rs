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

use nimble_core as core;
use nimble_store as store;

use croaring::Bitmap;
use tempfile::TempDir;

use crate::core::core::pmmr::{Backend, PMMR};
use crate::core::ser::{
	Error as SerError, FixedLength, PMMRable, Readable, Reader, Writeable, Writer,
};
use crate::store::pmmr::PMMRBackend;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct TestElem(u32);

impl FixedLength for TestElem {
	const LEN: usize = 4;
}

impl PMMRable for TestElem {
	type E = Self;

	fn as_elmt(&self) -> Self::E {
		*self
	}
}

impl Writeable for TestElem {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), SerError> {
		writer.write_u32(self.0)
	}
}

impl Readable for TestElem {
	fn read(reader: &mut dyn Reader) -> Result<TestElem, SerError> {
		Ok(TestElem(reader.read_u32()?))
	}
}

fn load(pmmr: &mut PMMRBackend<TestElem>, elems: &[TestElem]) -> u64 {
	let mut last_pos = pmmr.unpruned_size();
	{
		let mut pmmr = PMMR::at(pmmr, last_pos);
		for elem in elems {
			pmmr.push(elem).unwrap();
		}
		last_pos = pmmr.unpruned_size();
	}
	last_pos
}

fn eight_elements() -> Vec<TestElem> {
	(0..8).map(TestElem).collect()
}

#[test]
fn pmmr_append_and_reload() {
	let data_dir = TempDir::new().unwrap();

	let root = {
		let mut backend = PMMRBackend::new(data_dir.path(), true, None).unwrap();
		let mmr_size = load(&mut backend, &eight_elements());
		assert_eq!(mmr_size, 15);
		backend.sync().unwrap();

		PMMR::at(&mut backend, mmr_size).root()
	};

	// Reopen the backend from disk and confirm the exact same state.
	{
		let mut backend: PMMRBackend<TestElem> =
			PMMRBackend::new(data_dir.path(), true, None).unwrap();
		assert_eq!(backend.unpruned_size(), 15);
		let pmmr = PMMR::at(&mut backend, 15);
		assert_eq!(pmmr.root(), root);
		assert_eq!(pmmr.get_data(1), Some(TestElem(0)));
		assert_eq!(pmmr.get_data(11), Some(TestElem(5)));
	}
}

#[test]
fn pmmr_rewind_then_reapply() {
	let data_dir = TempDir::new().unwrap();
	let mut backend = PMMRBackend::new(data_dir.path(), true, None).unwrap();

	let mmr_size = load(&mut backend, &eight_elements());
	backend.sync().unwrap();
	let root_at_8 = PMMR::at(&mut backend, mmr_size).root();

	// Push a couple more leaves, then rewind back to the 8-leaf state.
	let new_size = load(&mut backend, &[TestElem(8), TestElem(9)]);
	assert_eq!(new_size, 18);
	backend.sync().unwrap();

	{
		let mut pmmr: PMMR<'_, TestElem, _> = PMMR::at(&mut backend, new_size);
		pmmr.rewind(15, &Bitmap::create()).unwrap();
		assert_eq!(pmmr.unpruned_size(), 15);
		assert_eq!(pmmr.root(), root_at_8);
	}
	backend.sync().unwrap();
	assert_eq!(backend.unpruned_size(), 15);

	// Roots are a function of the leaf sequence alone, the rewound history
	// leaves no trace.
	assert_eq!(PMMR::at(&mut backend, 15).root(), root_at_8);
}

#[test]
fn pmmr_prune_compact() {
	let data_dir = TempDir::new().unwrap();
	let mut backend = PMMRBackend::new(data_dir.path(), true, None).unwrap();

	let mmr_size = load(&mut backend, &eight_elements());
	backend.sync().unwrap();
	let root = PMMR::at(&mut backend, mmr_size).root();

	// Spend the first two pairs of leaves (pos 1, 2 and 4, 5).
	{
		let mut pmmr: PMMR<'_, TestElem, _> = PMMR::at(&mut backend, mmr_size);
		assert!(pmmr.prune(1).unwrap());
		assert!(pmmr.prune(2).unwrap());
		assert!(pmmr.prune(4).unwrap());
		assert!(pmmr.prune(5).unwrap());
		// pruning an already pruned leaf is a no-op
		assert_eq!(pmmr.prune(4).unwrap(), false);
	}
	backend.sync().unwrap();

	// The root is unchanged by pruning, only the leaf set shrank.
	assert_eq!(PMMR::at(&mut backend, mmr_size).root(), root);
	assert_eq!(backend.n_unpruned_leaves(), 4);

	// Now compact the on-disk files.
	backend.check_compact(mmr_size, &Bitmap::create()).unwrap();
	backend.sync().unwrap();

	// The whole left subtree rolled up into the pruned root at pos 7.
	// Everything under it is compacted away, the root hash itself stays.
	assert_eq!(backend.unpruned_size(), 15);
	assert_eq!(backend.get_from_file(7).is_some(), true);
	assert_eq!(backend.get_from_file(3), None);
	assert_eq!(backend.get_from_file(6), None);
	assert_eq!(backend.get_hash(1), None);
	assert_eq!(backend.get_data(2), None);

	// 6 of 15 hash positions compacted away (the height-2 subtree minus its
	// root), 4 of 8 data positions gone.
	assert_eq!(backend.hash_size(), 9);
	assert_eq!(backend.data_size(), 4);

	// Untouched leaves still resolve through the shifted accessors.
	assert_eq!(backend.get_data(8), Some(TestElem(4)));
	assert_eq!(backend.get_data(11), Some(TestElem(5)));

	// And the root is still the root.
	assert_eq!(PMMR::at(&mut backend, mmr_size).root(), root);
}

#[test]
fn pmmr_compact_then_reload() {
	let data_dir = TempDir::new().unwrap();

	let root = {
		let mut backend = PMMRBackend::new(data_dir.path(), true, None).unwrap();
		let mmr_size = load(&mut backend, &eight_elements());
		backend.sync().unwrap();
		let root = PMMR::at(&mut backend, mmr_size).root();

		{
			let mut pmmr: PMMR<'_, TestElem, _> = PMMR::at(&mut backend, mmr_size);
			pmmr.prune(1).unwrap();
			pmmr.prune(2).unwrap();
		}
		backend.sync().unwrap();
		backend.check_compact(mmr_size, &Bitmap::create()).unwrap();
		backend.sync().unwrap();
		root
	};

	// Reopen the compacted state and make sure the shifts were persisted.
	{
		let mut backend: PMMRBackend<TestElem> =
			PMMRBackend::new(data_dir.path(), true, None).unwrap();
		assert_eq!(backend.unpruned_size(), 15);
		assert_eq!(backend.get_from_file(1), None);
		assert_eq!(backend.get_from_file(2), None);
		assert!(backend.get_from_file(3).is_some());
		assert_eq!(PMMR::at(&mut backend, 15).root(), root);
	}
}

#[test]
fn pmmr_reappend_after_compact() {
	let data_dir = TempDir::new().unwrap();
	let mut backend = PMMRBackend::new(data_dir.path(), true, None).unwrap();

	let mmr_size = load(&mut backend, &eight_elements());
	backend.sync().unwrap();

	{
		let mut pmmr: PMMR<'_, TestElem, _> = PMMR::at(&mut backend, mmr_size);
		pmmr.prune(1).unwrap();
		pmmr.prune(2).unwrap();
	}
	backend.sync().unwrap();
	backend.check_compact(mmr_size, &Bitmap::create()).unwrap();
	backend.sync().unwrap();

	// Appends still land at the correct positions after compaction.
	let new_size = load(&mut backend, &[TestElem(8)]);
	assert_eq!(new_size, 16);
	backend.sync().unwrap();
	assert_eq!(backend.get_data(16), Some(TestElem(8)));
	assert_eq!(backend.unpruned_size(), 16);
}
