// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Revocation lists kept on disk for the vendor library, one file per source.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use kalkan_core::codes::{self, RawCode};
use tempfile::TempDir;

/// One file per CRL source in a private temp directory. Reloading a source
/// overwrites its file.
#[derive(Default)]
pub(crate) struct CrlFiles {
    dir: Option<TempDir>,
    files: BTreeMap<String, PathBuf>,
}

impl CrlFiles {
    pub(crate) fn store(&mut self, source: &str, crl: &[u8]) -> io::Result<&Path> {
        if self.dir.is_none() {
            self.dir = Some(tempfile::Builder::new().prefix("kalkan-crl").tempdir()?);
        }
        let Some(dir) = &self.dir else {
            return Err(io::Error::other("CRL directory unavailable"));
        };
        let next = self.files.len();
        let file = self
            .files
            .entry(source.to_string())
            .or_insert_with(|| dir.path().join(format!("crl-{next}.crl")));
        std::fs::write(&*file, crl)?;
        Ok(file.as_path())
    }

    pub(crate) fn paths(&self) -> Vec<PathBuf> {
        self.files.values().cloned().collect()
    }

    pub(crate) fn clear(&mut self) {
        self.files.clear();
        self.dir = None;
    }
}

/// Run `validate` against every list, stopping at the first failure.
pub(crate) fn validate_each<F>(paths: &[PathBuf], mut validate: F) -> RawCode
where
    F: FnMut(&Path) -> RawCode,
{
    let mut rc = codes::KCR_OK;
    for path in paths {
        rc = validate(path);
        if rc != codes::KCR_OK {
            break;
        }
    }
    rc
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files_on_disk(crls: &CrlFiles) -> usize {
        let dir = crls.dir.as_ref().unwrap().path();
        std::fs::read_dir(dir).unwrap().count()
    }

    #[test]
    fn reloading_a_source_overwrites_its_file() {
        let mut crls = CrlFiles::default();
        for round in 0..6 {
            crls.store("http://ca/gost.crl", format!("GOST {round}").as_bytes()).unwrap();
            crls.store("http://ca/rsa.crl", format!("RSA {round}").as_bytes()).unwrap();
        }
        assert_eq!(files_on_disk(&crls), 2);

        let contents: Vec<String> = crls
            .paths()
            .iter()
            .map(|p| std::fs::read_to_string(p).unwrap())
            .collect();
        assert_eq!(contents, ["GOST 5", "RSA 5"]);
    }

    #[test]
    fn clear_removes_the_directory() {
        let mut crls = CrlFiles::default();
        let path = crls.store("a", b"list").unwrap().to_path_buf();
        crls.clear();
        assert!(!path.exists());
        assert!(crls.paths().is_empty());
    }

    #[test]
    fn every_list_is_consulted_until_one_fails() {
        let paths = vec![PathBuf::from("gost.crl"), PathBuf::from("rsa.crl")];

        let mut seen = Vec::new();
        let rc = validate_each(&paths, |p| {
            seen.push(p.to_path_buf());
            codes::KCR_OK
        });
        assert_eq!(rc, codes::KCR_OK);
        assert_eq!(seen, paths);

        let mut seen = 0;
        let rc = validate_each(&paths, |p| {
            seen += 1;
            if p.ends_with("gost.crl") {
                codes::KCR_CHECKCHAINERROR
            } else {
                codes::KCR_OK
            }
        });
        assert_eq!(rc, codes::KCR_CHECKCHAINERROR);
        assert_eq!(seen, 1);
    }

    #[test]
    fn no_lists_means_nothing_to_reject() {
        assert_eq!(validate_each(&[], |_| codes::KCR_CHECKCHAINERROR), codes::KCR_OK);
    }
}
