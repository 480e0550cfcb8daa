//! PE section table to runtime-address mapping.
//!
//! A relocatable PE image keeps section addresses relative to its (unknown at
//! link time) load base. Given the base observed at runtime, this module walks
//! the file's section table and produces the absolute address of every
//! section, which is exactly what `add-symbol-file` wants to be told.

use anyhow::{bail, Context, Result};
use memmap2::Mmap;
use object::read::pe::{PeFile32, PeFile64};
use object::{FileKind, LittleEndian as LE};
use std::fs::File;
use std::path::Path;

/// Section name to absolute runtime address, in on-disk section table order.
///
/// Duplicate names (malformed or unusual files) are last-write-wins, keeping
/// the first occurrence's position. Built fresh per command invocation, never
/// cached.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SectionMap {
    entries: Vec<(String, u64)>,
}

impl SectionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: String, address: u64) {
        match self.entries.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => *slot = address,
            None => self.entries.push((name, address)),
        }
    }

    pub fn get(&self, name: &str) -> Option<u64> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|&(_, address)| address)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.entries.iter().map(|(name, address)| (name.as_str(), *address))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Map every section of a PE image to its absolute runtime address.
///
/// Section names are fixed-width null-padded byte strings; trailing padding is
/// stripped. Names starting with `/` are string-table references for long
/// section names and are skipped, they are not usable symbol-load targets.
pub fn parse_sections(data: &[u8], base: u64) -> Result<SectionMap> {
    let kind = FileKind::parse(data).context("failed to identify executable format")?;
    let table = match kind {
        FileKind::Pe32 => PeFile32::parse(data)
            .context("failed to parse PE32 image")?
            .section_table(),
        FileKind::Pe64 => PeFile64::parse(data)
            .context("failed to parse PE32+ image")?
            .section_table(),
        other => bail!("unsupported executable format {:?}, expected a PE image", other),
    };

    let mut sections = SectionMap::new();
    for section in table.iter() {
        let raw = section.raw_name();
        let end = raw.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
        let name = String::from_utf8_lossy(&raw[..end]).into_owned();
        if name.starts_with('/') {
            continue;
        }
        let address = u64::from(section.virtual_address.get(LE)) + base;
        tracing::info!("  section {}: {:#x}", name, address);
        sections.insert(name, address);
    }
    Ok(sections)
}

/// Open a PE image on disk and map its sections against `base`.
pub fn read_sections(path: &Path, base: u64) -> Result<SectionMap> {
    let file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mmap = unsafe { Mmap::map(&file) }
        .with_context(|| format!("failed to map {}", path.display()))?;
    parse_sections(&mmap, base)
}


#[cfg(test)]
mod tests {
    use super::testing::minimal_pe64;
    use super::*;

    #[test]
    fn maps_sections_against_base() {
        let image = minimal_pe64(&[
            (*b".text\0\0\0", 0x1000),
            (*b".data\0\0\0", 0x5000),
        ]);
        let sections = parse_sections(&image, 0x7FFF_0000).unwrap();
        assert_eq!(sections.get(".text"), Some(0x7FFF_1000));
        assert_eq!(sections.get(".data"), Some(0x7FFF_5000));
        assert_eq!(sections.len(), 2);
    }

    #[test]
    fn preserves_on_disk_order() {
        let image = minimal_pe64(&[
            (*b".data\0\0\0", 0x5000),
            (*b".text\0\0\0", 0x1000),
            (*b".rdata\0\0", 0x3000),
        ]);
        let sections = parse_sections(&image, 0).unwrap();
        let names: Vec<&str> = sections.iter().map(|(name, _)| name).collect();
        assert_eq!(names, [".data", ".text", ".rdata"]);
    }

    #[test]
    fn skips_string_table_references() {
        let image = minimal_pe64(&[
            (*b".text\0\0\0", 0x1000),
            (*b"/4\0\0\0\0\0\0", 0x9000),
        ]);
        let sections = parse_sections(&image, 0x1000).unwrap();
        assert_eq!(sections.get("/4"), None);
        assert_eq!(sections.len(), 1);
    }

    #[test]
    fn strips_trailing_name_padding() {
        let image = minimal_pe64(&[(*b".reloc\0\0", 0x8000)]);
        let sections = parse_sections(&image, 0).unwrap();
        assert_eq!(sections.get(".reloc"), Some(0x8000));
    }

    #[test]
    fn duplicate_names_are_last_write_wins() {
        let image = minimal_pe64(&[
            (*b".text\0\0\0", 0x1000),
            (*b".data\0\0\0", 0x2000),
            (*b".text\0\0\0", 0x3000),
        ]);
        let sections = parse_sections(&image, 0).unwrap();
        assert_eq!(sections.len(), 2);
        assert_eq!(sections.get(".text"), Some(0x3000));
        let names: Vec<&str> = sections.iter().map(|(name, _)| name).collect();
        assert_eq!(names, [".text", ".data"]);
    }

    #[test]
    fn rejects_non_pe_input() {
        assert!(parse_sections(b"\x7fELF\x02\x01\x01\0", 0).is_err());
        assert!(parse_sections(b"not an executable at all", 0).is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        let error = read_sections(Path::new("/nonexistent/loader.efi"), 0).unwrap_err();
        assert!(error.to_string().contains("/nonexistent/loader.efi"));
    }
}
