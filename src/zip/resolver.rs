//! Selecting directory entries by name pattern.

use std::collections::HashSet;
use tracing::warn;

use super::glob::Pattern;
use super::structures::CentralDirectoryEntry;
use crate::error::{Error, Result};

/// A user-supplied wildcard pattern matched against entry names.
#[derive(Debug, Clone)]
pub struct MatchSpec {
    source: String,
    pattern: Pattern,
}

impl MatchSpec {
    pub fn new(pattern: impl Into<String>) -> Self {
        let source = pattern.into();
        Self {
            pattern: Pattern::new(&source),
            source,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Names are matched in their decoded form, which maps one-to-one onto
    /// the stored name bytes.
    pub fn matches(&self, entry: &CentralDirectoryEntry) -> bool {
        self.pattern.matches(&entry.file_name)
    }
}

/// What the resolved entries will be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    List,
    Extract,
}

/// How entries sharing a name are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateNames {
    /// Every entry with a matching name is selected.
    KeepAll,
    /// Only the last entry with a given name in directory order is selected.
    MostRecent,
}

/// The outcome of resolving a set of specs.
#[derive(Debug)]
pub struct Resolution<'a> {
    /// Selected entries: grouped by spec in the order the specs were given,
    /// directory order within each spec. An entry picked by two specs
    /// appears twice.
    pub selected: Vec<&'a CentralDirectoryEntry>,
    /// Specs that matched nothing.
    pub unmatched: Vec<String>,
}

/// Filters an entry table down to the entries a caller asked for.
pub struct EntryResolver<'a> {
    entries: &'a [CentralDirectoryEntry],
    exclude: Vec<MatchSpec>,
    duplicates: DuplicateNames,
}

impl<'a> EntryResolver<'a> {
    pub fn new(entries: &'a [CentralDirectoryEntry]) -> Self {
        Self {
            entries,
            exclude: Vec::new(),
            duplicates: DuplicateNames::MostRecent,
        }
    }

    pub fn duplicates(mut self, policy: DuplicateNames) -> Self {
        self.duplicates = policy;
        self
    }

    /// Entries matching any of these specs are never selected.
    pub fn exclude(mut self, specs: Vec<MatchSpec>) -> Self {
        self.exclude = specs;
        self
    }

    fn candidates(&self) -> impl Iterator<Item = &'a CentralDirectoryEntry> + '_ {
        self.entries
            .iter()
            .filter(|e| !self.exclude.iter().any(|x| x.matches(e)))
    }

    /// Every entry that is not excluded, with the duplicate policy applied.
    pub fn all(&self) -> Vec<&'a CentralDirectoryEntry> {
        self.apply_duplicates(self.candidates().collect())
    }

    fn apply_duplicates(
        &self,
        matched: Vec<&'a CentralDirectoryEntry>,
    ) -> Vec<&'a CentralDirectoryEntry> {
        match self.duplicates {
            DuplicateNames::KeepAll => matched,
            DuplicateNames::MostRecent => most_recent(matched),
        }
    }

    pub fn resolve(&self, specs: &[MatchSpec], mode: Mode) -> Result<Resolution<'a>> {
        if specs.is_empty() {
            return match mode {
                Mode::List => Ok(Resolution {
                    selected: self.candidates().collect(),
                    unmatched: Vec::new(),
                }),
                Mode::Extract => Err(Error::NoTargetSpecified),
            };
        }

        let mut selected = Vec::new();
        let mut unmatched = Vec::new();

        for spec in specs {
            let matched =
                self.apply_duplicates(self.candidates().filter(|e| spec.matches(e)).collect());

            if matched.is_empty() {
                warn!("no entry matches '{}'", spec.as_str());
                unmatched.push(spec.as_str().to_string());
            }
            selected.extend(matched);
        }

        if mode == Mode::Extract && specs.len() == 1 && selected.is_empty() {
            return Err(Error::NoMatch {
                pattern: specs[0].as_str().to_string(),
            });
        }

        Ok(Resolution {
            selected,
            unmatched,
        })
    }
}

/// Keep the last occurrence of each name, in directory order.
fn most_recent<'a>(entries: Vec<&'a CentralDirectoryEntry>) -> Vec<&'a CentralDirectoryEntry> {
    let mut seen = HashSet::new();
    let mut kept: Vec<_> = entries
        .into_iter()
        .rev()
        .filter(|&e| seen.insert(e.raw_name.as_slice()))
        .collect();
    kept.reverse();
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zip::structures::CompressionMethod;

    fn entry(name: &str, offset: u64) -> CentralDirectoryEntry {
        CentralDirectoryEntry {
            raw_name: name.as_bytes().to_vec(),
            file_name: name.to_string(),
            compression_method: CompressionMethod::Stored,
            compressed_size: 1,
            uncompressed_size: 1,
            crc32: 0,
            lfh_offset: offset,
            flags: 0,
            version_made_by: 0,
            version_needed: 0,
            internal_attributes: 0,
            external_attributes: 0,
            last_mod_time: 0,
            last_mod_date: 0,
            unix_mtime: None,
            unix_uid: None,
            unix_gid: None,
            is_directory: name.ends_with('/'),
            unsupported: None,
        }
    }

    fn names(resolution: &Resolution<'_>) -> Vec<(String, u64)> {
        resolution
            .selected
            .iter()
            .map(|e| (e.file_name.clone(), e.lfh_offset))
            .collect()
    }

    fn table() -> Vec<CentralDirectoryEntry> {
        vec![
            entry("small1.bin", 0),
            entry("small2.bin", 10),
            entry("notes.txt", 20),
            entry("small3.bin", 30),
            entry("notes.txt", 40),
            entry("small4.bin", 50),
        ]
    }

    #[test]
    fn no_specs_lists_everything_but_cannot_extract() {
        let entries = table();
        let resolver = EntryResolver::new(&entries);
        assert_eq!(resolver.resolve(&[], Mode::List).unwrap().selected.len(), 6);
        assert!(matches!(
            resolver.resolve(&[], Mode::Extract),
            Err(Error::NoTargetSpecified)
        ));
    }

    #[test]
    fn wildcards_select_in_directory_order() {
        let entries = table();
        let resolver = EntryResolver::new(&entries);
        let r = resolver.resolve(&[MatchSpec::new("small?.bin")], Mode::Extract).unwrap();
        assert_eq!(
            names(&r),
            vec![
                ("small1.bin".to_string(), 0),
                ("small2.bin".to_string(), 10),
                ("small3.bin".to_string(), 30),
                ("small4.bin".to_string(), 50),
            ]
        );
        let r = resolver.resolve(&[MatchSpec::new("small3.bin")], Mode::Extract).unwrap();
        assert_eq!(names(&r), vec![("small3.bin".to_string(), 30)]);
    }

    #[test]
    fn duplicate_names_resolve_to_the_last_entry() {
        let entries = table();
        let spec = [MatchSpec::new("notes.txt")];

        let latest = EntryResolver::new(&entries).resolve(&spec, Mode::Extract).unwrap();
        assert_eq!(names(&latest), vec![("notes.txt".to_string(), 40)]);

        let all = EntryResolver::new(&entries)
            .duplicates(DuplicateNames::KeepAll)
            .resolve(&spec, Mode::Extract)
            .unwrap();
        assert_eq!(
            names(&all),
            vec![("notes.txt".to_string(), 20), ("notes.txt".to_string(), 40)]
        );
    }

    #[test]
    fn selecting_everything_applies_the_duplicate_policy() {
        let entries = table();
        let latest = EntryResolver::new(&entries).all();
        let offsets: Vec<_> = latest.iter().map(|e| e.lfh_offset).collect();
        assert_eq!(offsets, [0, 10, 30, 40, 50]);

        let all = EntryResolver::new(&entries)
            .duplicates(DuplicateNames::KeepAll)
            .exclude(vec![MatchSpec::new("small*")])
            .all();
        let offsets: Vec<_> = all.iter().map(|e| e.lfh_offset).collect();
        assert_eq!(offsets, [20, 40]);
    }

    #[test]
    fn most_recent_scales_to_large_directories() {
        let mut entries: Vec<_> = (0..200_000u64)
            .map(|i| entry(&format!("dir/file-{i:06}.txt"), i))
            .collect();
        entries.push(entry("dir/file-000007.txt", 200_000));

        let started = std::time::Instant::now();
        let r = EntryResolver::new(&entries)
            .resolve(&[MatchSpec::new("*")], Mode::Extract)
            .unwrap();
        assert!(started.elapsed() < std::time::Duration::from_secs(10));
        assert_eq!(r.selected.len(), 200_000);
        assert_eq!(r.selected[7].lfh_offset, 8);
        assert_eq!(r.selected.last().map(|e| e.lfh_offset), Some(200_000));
    }

    #[test]
    fn overlapping_specs_are_not_deduplicated() {
        let entries = table();
        let r = EntryResolver::new(&entries)
            .resolve(
                &[MatchSpec::new("small1.bin"), MatchSpec::new("small[12].bin")],
                Mode::Extract,
            )
            .unwrap();
        assert_eq!(
            names(&r),
            vec![
                ("small1.bin".to_string(), 0),
                ("small1.bin".to_string(), 0),
                ("small2.bin".to_string(), 10),
            ]
        );
    }

    #[test]
    fn unmatched_specs_are_warnings_unless_alone() {
        let entries = table();
        let resolver = EntryResolver::new(&entries);

        let err = resolver
            .resolve(&[MatchSpec::new("missing.bin")], Mode::Extract)
            .unwrap_err();
        assert!(matches!(err, Error::NoMatch { ref pattern } if pattern == "missing.bin"));

        let r = resolver
            .resolve(
                &[MatchSpec::new("missing.bin"), MatchSpec::new("small4.bin")],
                Mode::Extract,
            )
            .unwrap();
        assert_eq!(r.unmatched, vec!["missing.bin".to_string()]);
        assert_eq!(r.selected.len(), 1);

        let listed = resolver.resolve(&[MatchSpec::new("missing.bin")], Mode::List).unwrap();
        assert!(listed.selected.is_empty());
        assert_eq!(listed.unmatched.len(), 1);
    }

    #[test]
    fn exclusions_apply_before_matching() {
        let entries = table();
        let r = EntryResolver::new(&entries)
            .exclude(vec![MatchSpec::new("small[24].bin")])
            .resolve(&[MatchSpec::new("small*")], Mode::Extract)
            .unwrap();
        assert_eq!(
            names(&r),
            vec![("small1.bin".to_string(), 0), ("small3.bin".to_string(), 30)]
        );
    }

    #[test]
    fn literal_names_match_raw_bytes() {
        let mut latin1 = entry("", 0);
        latin1.raw_name = b"caf\xe9.txt".to_vec();
        latin1.file_name = crate::zip::structures::decode_name(&latin1.raw_name, false);
        let entries = vec![latin1];
        let r = EntryResolver::new(&entries)
            .resolve(&[MatchSpec::new("caf?.txt")], Mode::Extract)
            .unwrap();
        assert_eq!(r.selected.len(), 1);
        assert!(MatchSpec::new("café.txt").matches(&entries[0]));
    }
}
