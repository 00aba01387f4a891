// SPDX-License-Identifier: MIT OR Apache-2.0
//! The set of services this binary can schedule, by name.
//!
//! `scan-services` ships worked examples rather than the ~30 real adapters
//! a production build would carry; `cyclic` is deliberately left out of
//! this catalogue since it exists only to exercise the registry's
//! cycle-detection failure path and can never complete a scan.

use scan_registry::ServiceDef;

/// One entry in the catalogue: a stable name plus a constructor for a
/// fresh [`ServiceDef`].
pub struct CatalogueEntry {
    /// Name as selected via `--services`.
    pub name: &'static str,
    /// Builds the service's definition.
    pub build: fn() -> ServiceDef,
}

/// Every service this binary knows how to run, in catalogue order.
pub const CATALOGUE: &[CatalogueEntry] = &[
    CatalogueEntry { name: "iam", build: scan_services::iam_service },
    CatalogueEntry { name: "diamond", build: scan_services::diamond_service },
];

/// Look up a catalogue entry by name.
#[must_use]
pub fn find(name: &str) -> Option<&'static CatalogueEntry> {
    CATALOGUE.iter().find(|e| e.name == name)
}

/// Names of every catalogued service, in catalogue order.
#[must_use]
pub fn names() -> Vec<&'static str> {
    CATALOGUE.iter().map(|e| e.name).collect()
}
