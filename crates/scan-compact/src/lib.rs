// SPDX-License-Identifier: MIT OR Apache-2.0
//! Post-scan compaction and hierarchization.
//!
//! Two independent passes, run once per context after every call has
//! settled: [`compact::compact_map`] strips paginator bookkeeping and
//! uninformative fields (or is skipped entirely under `Opts::raw`), then
//! [`hier::hierarchize`] re-groups the result into the nested document the
//! CLI writes out. [`build_document`] drives both passes across every
//! context in a scan and merges the results into one root document.
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod compact;
mod hier;

pub use compact::compact_map;
pub use hier::{flatten, hierarchize, merge_documents};

use scan_core::{Map, Opts};
use scan_registry::Registry;
use std::collections::HashMap;
use std::sync::Arc;

/// Run compaction (unless [`Opts::raw`]) and hierarchization over every
/// context's [`Map`], merging the results into one document.
///
/// `registries` supplies, per service name, the compiled registry used to
/// look up paginator metadata during compaction.
#[must_use]
pub fn build_document(maps: &[Map], registries: &HashMap<String, Arc<Registry>>, opts: &Opts) -> serde_json::Value {
    let mut doc = serde_json::Value::Object(serde_json::Map::new());
    for map in maps {
        let processed = if opts.raw {
            map.clone()
        } else {
            match registries.get(&map.service) {
                Some(registry) => compact_map(map, registry),
                None => map.clone(),
            }
        };
        let partial = hierarchize(&processed, &opts.hier, opts.stats);
        doc = merge_documents(doc, partial);
    }
    doc
}
