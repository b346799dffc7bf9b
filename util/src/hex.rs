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

//! Simple hex encoding and decoding. Small enough that pulling in a
//! dedicated crate isn't warranted.

use std::fmt::Write;
use std::num::ParseIntError;

/// Encode the provided bytes into a hex string
pub fn to_hex(bytes: Vec<u8>) -> String {
	let mut s = String::with_capacity(bytes.len() * 2);
	for byte in bytes {
		write!(&mut s, "{:02x}", byte).expect("Unable to write");
	}
	s
}

/// Decode a hex string (optionally "0x" prefixed) into bytes.
pub fn from_hex(hex_str: String) -> Result<Vec<u8>, ParseIntError> {
	let hex_trim = if hex_str.starts_with("0x") {
		hex_str[2..].to_owned()
	} else {
		hex_str
	};
	let hex_trim = hex_trim.trim();
	if hex_trim.len() % 2 == 1 {
		// force a parse error for an odd number of nibbles
		u8::from_str_radix("zz", 16)?;
	}
	(0..hex_trim.len() / 2)
		.map(|i| u8::from_str_radix(&hex_trim[2 * i..2 * i + 2], 16))
		.collect()
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn test_to_hex() {
		assert_eq!(to_hex(vec![0, 0, 0, 0]), "00000000");
		assert_eq!(to_hex(vec![10, 11, 12, 13]), "0a0b0c0d");
		assert_eq!(to_hex(vec![0, 0, 0, 255]), "000000ff");
	}

	#[test]
	fn test_from_hex() {
		assert_eq!(from_hex("00000000".to_string()).unwrap(), vec![0, 0, 0, 0]);
		assert_eq!(
			from_hex("0a0b0c0d".to_string()).unwrap(),
			vec![10, 11, 12, 13]
		);
		assert_eq!(
			from_hex("0x000000ff".to_string()).unwrap(),
			vec![0, 0, 0, 255]
		);
		assert!(from_hex("abc".to_string()).is_err());
	}
}
