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

//! MMR laws checked over the in-memory vec backend.

use nimble_core as core;

use croaring::Bitmap;

use self::core::core::pmmr::{self, VecBackend, PMMR};
use self::core::ser::{self, FixedLength, PMMRable, Readable, Reader, Writeable, Writer};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct TestElem(u64);

impl FixedLength for TestElem {
	const LEN: usize = 8;
}

impl PMMRable for TestElem {
	type E = Self;

	fn as_elmt(&self) -> Self::E {
		*self
	}
}

impl Writeable for TestElem {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u64(self.0)
	}
}

impl Readable for TestElem {
	fn read(reader: &mut dyn Reader) -> Result<TestElem, ser::Error> {
		Ok(TestElem(reader.read_u64()?))
	}
}

fn build(n: u64) -> (VecBackend<TestElem>, u64) {
	let mut backend = VecBackend::new();
	{
		let mut pmmr = PMMR::new(&mut backend);
		for i in 0..n {
			pmmr.push(&TestElem(i)).unwrap();
		}
	}
	let size = backend.size();
	(backend, size)
}

#[test]
fn roots_are_deterministic() {
	// the root depends only on the leaf sequence, however it was reached
	let (mut backend_a, size_a) = build(17);
	let root_a = PMMR::at(&mut backend_a, size_a).root();

	let (mut backend_b, size_b) = build(20);
	{
		let mut pmmr: PMMR<'_, TestElem, _> = PMMR::at(&mut backend_b, size_b);
		// rewind the extra 3 leaves away (pos of 17th leaf is 33)
		pmmr.rewind(pmmr::insertion_to_pmmr_index(17), &Bitmap::create())
			.unwrap();
		assert_eq!(pmmr.unpruned_size(), size_a);
		assert_eq!(pmmr.root(), root_a);
	}
}

#[test]
fn roots_differ_by_sequence() {
	let (mut backend_a, size_a) = build(8);
	let root_a = PMMR::at(&mut backend_a, size_a).root();

	// same number of leaves, different content
	let mut backend_b = VecBackend::new();
	{
		let mut pmmr = PMMR::new(&mut backend_b);
		for i in 0..8 {
			pmmr.push(&TestElem(i + 1)).unwrap();
		}
	}
	let root_b = PMMR::at(&mut backend_b, size_a).root();
	assert_ne!(root_a, root_b);
}

#[test]
fn validate_after_append() {
	for n in 1..64 {
		let (mut backend, size) = build(n);
		let pmmr: PMMR<'_, TestElem, _> = PMMR::at(&mut backend, size);
		pmmr.validate().unwrap();
	}
}

#[test]
fn empty_root_is_zero() {
	let mut backend: VecBackend<TestElem> = VecBackend::new();
	let pmmr: PMMR<'_, TestElem, _> = PMMR::new(&mut backend);
	assert_eq!(pmmr.root(), core::core::hash::ZERO_HASH);
}

#[test]
fn prune_keeps_root() {
	let (mut backend, size) = build(11);
	let root = PMMR::at(&mut backend, size).root();
	{
		let mut pmmr: PMMR<'_, TestElem, _> = PMMR::at(&mut backend, size);
		pmmr.prune(1).unwrap();
		pmmr.prune(4).unwrap();
		assert_eq!(pmmr.root(), root);
		// non-leaf positions cannot be pruned
		assert!(pmmr.prune(3).is_err());
	}
}
