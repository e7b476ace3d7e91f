/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! K-sortable identifiers for job keys, update keys, and day-index entries.
//!
//! Keys are ULIDs: 48 bits of millisecond timestamp followed by 80 bits of
//! randomness, encoded as 26 characters of Crockford Base32. The timestamp
//! prefix makes keys sort lexicographically in creation order, and report
//! aggregation recovers the embedded timestamp to window entries by key.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use ulid::{Generator, Ulid};

/// Process-wide generator so keys created within the same millisecond still
/// sort in creation order.
static GENERATOR: Lazy<Mutex<Generator>> = Lazy::new(|| Mutex::new(Generator::new()));

/// Generates a fresh K-sortable key.
pub fn new_key() -> String {
    let mut generator = GENERATOR.lock();
    // The monotonic generator only fails when the random component overflows
    // within one millisecond; a plain ULID is still time-ordered across calls.
    match generator.generate() {
        Ok(ulid) => ulid.to_string(),
        Err(_) => Ulid::new().to_string(),
    }
}

/// Extracts the creation timestamp embedded in a key.
///
/// Returns `None` when the key is not a valid ULID or its timestamp is out
/// of range for `DateTime<Utc>`.
pub fn timestamp(key: &str) -> Option<DateTime<Utc>> {
    let ulid = Ulid::from_string(key).ok()?;
    DateTime::<Utc>::from_timestamp_millis(ulid.timestamp_ms() as i64)
}
