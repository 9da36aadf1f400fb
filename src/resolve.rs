//! Class resolution for exported annotations
//!
//! Maps raw EPPO codes onto the class catalog and decides which
//! plant-stem-emergence-zone (PSEZ) boxes are kept.

use indexmap::IndexSet;
use log::debug;
use std::collections::HashSet;

use crate::config::DatasetConfig;
use crate::types::{AnnotationRecord, ImageGroup};

// Cotyledon sentinels written by the annotation tool
pub const COTYLEDON_DICOT: i32 = -100;
pub const COTYLEDON_MONOCOT: i32 = -101;

/// Ordered, de-duplicated class codes. The position of a code is its class index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassCatalog {
    codes: IndexSet<String>,
}

impl ClassCatalog {
    /// Later duplicates are ignored; the first occurrence keeps its position.
    pub fn new<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            codes: codes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn index_of(&self, code: &str) -> Option<usize> {
        self.codes.get_index_of(code)
    }

    /// Rewrite a suffixed variant such as `SOLTU2` to its catalog code.
    ///
    /// The catalog is scanned in order and the first entry that prefixes
    /// `code` wins, even when a longer entry would also match.
    pub fn normalize<'a>(&'a self, code: &'a str) -> &'a str {
        self.codes
            .iter()
            .find(|entry| code.starts_with(entry.as_str()))
            .map(String::as_str)
            .unwrap_or(code)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.codes.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }
}

/// Outcome of mapping one record onto the catalog.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ClassResolution {
    Resolved(usize),
    Unresolved,
}

impl ClassResolution {
    pub fn index(self) -> Option<usize> {
        match self {
            ClassResolution::Resolved(index) => Some(index),
            ClassResolution::Unresolved => None,
        }
    }
}

/// Resolves class codes against a catalog, with the cotyledon fallback.
#[derive(Debug, Clone)]
pub struct ClassResolver {
    catalog: ClassCatalog,
    dicot: Option<usize>,
    monocot: Option<usize>,
}

impl ClassResolver {
    pub fn new(catalog: ClassCatalog, dicot_code: &str, monocot_code: &str) -> Self {
        let dicot = catalog.index_of(dicot_code);
        let monocot = catalog.index_of(monocot_code);
        Self {
            catalog,
            dicot,
            monocot,
        }
    }

    pub fn from_config(config: &DatasetConfig) -> Self {
        Self::new(
            ClassCatalog::new(config.classes.iter().cloned()),
            &config.dicot_code,
            &config.monocot_code,
        )
    }

    pub fn catalog(&self) -> &ClassCatalog {
        &self.catalog
    }

    pub fn resolve(&self, record: &AnnotationRecord) -> ClassResolution {
        let Some(code) = record.class_code.as_deref() else {
            return ClassResolution::Unresolved;
        };

        let fallback = match record.cotyledon_id {
            Some(COTYLEDON_DICOT) => self.dicot,
            Some(COTYLEDON_MONOCOT) => self.monocot,
            _ => None,
        };

        match self.catalog.index_of(self.catalog.normalize(code)).or(fallback) {
            Some(index) => ClassResolution::Resolved(index),
            None => ClassResolution::Unresolved,
        }
    }
}

/// Whether the center of `inner` lies inside `outer`, edges included.
///
/// Boxes are `(min_x, min_y, max_x, max_y)`.
pub fn center_enclosed(inner: (f64, f64, f64, f64), outer: (f64, f64, f64, f64)) -> bool {
    let center_x = (inner.0 + inner.2) / 2.0;
    let center_y = (inner.1 + inner.3) / 2.0;

    (outer.0..=outer.2).contains(&center_x) && (outer.1..=outer.3).contains(&center_y)
}

/// Keeps PSEZ boxes only when they sit on a host crop.
#[derive(Debug, Clone)]
pub struct PsezFilter {
    psez_code: String,
    host_crops: HashSet<String>,
}

/// Records of one image after PSEZ filtering.
#[derive(Debug)]
pub struct PsezOutcome {
    pub kept: Vec<AnnotationRecord>,
    pub skipped: usize,
}

impl PsezFilter {
    pub fn new<I, S>(psez_code: impl Into<String>, host_crops: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            psez_code: psez_code.into(),
            host_crops: host_crops.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_config(config: &DatasetConfig) -> Self {
        Self::new(config.psez_code.clone(), config.host_crops.iter().cloned())
    }

    fn is_psez(&self, record: &AnnotationRecord) -> bool {
        record.class_code.as_deref() == Some(self.psez_code.as_str())
    }

    fn is_host(&self, record: &AnnotationRecord) -> bool {
        record
            .class_code
            .as_deref()
            .is_some_and(|code| self.host_crops.contains(code))
    }

    /// First host crop, in record order, that encloses the center of `psez`.
    pub fn find_host<'a>(
        &self,
        psez: &AnnotationRecord,
        candidates: &'a [AnnotationRecord],
    ) -> Option<&'a AnnotationRecord> {
        candidates.iter().find(|other| {
            other.id != psez.id && self.is_host(other) && center_enclosed(psez.bbox(), other.bbox())
        })
    }

    /// Drop the PSEZ records of `group` without an enclosing host crop.
    ///
    /// Every other record passes through in its original order.
    pub fn apply(&self, group: ImageGroup) -> PsezOutcome {
        let records = group.into_records();
        let mut kept = Vec::with_capacity(records.len());
        let mut skipped = 0;

        for record in &records {
            if !self.is_psez(record) {
                kept.push(record.clone());
                continue;
            }
            match self.find_host(record, &records) {
                Some(host) => {
                    debug!(
                        "{} ({}) --> {} ({})",
                        record.id,
                        self.psez_code,
                        host.id,
                        host.class_code.as_deref().unwrap_or_default()
                    );
                    kept.push(record.clone());
                }
                None => {
                    debug!("Skip PSEZ: {} on image {}", record.id, record.image_id);
                    skipped += 1;
                }
            }
        }

        PsezOutcome { kept, skipped }
    }
}
