//! Turns raw log entries into subject common names.

use crate::log::entry::{LeafEntry, LogEntry};
use std::sync::Arc;
use x509_parser::prelude::{FromDer, TbsCertificate, X509Certificate, X509Name};

/// Common name harvested from one log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestedName {
    pub log_id: Arc<str>,
    pub index: u64,
    pub name: String,
}

/// Pure extraction step. Entries that cannot be decoded, or that carry no
/// usable common name, yield `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryExtractor {
    include_precertificates: bool,
}

impl EntryExtractor {
    pub fn new(include_precertificates: bool) -> Self {
        Self {
            include_precertificates,
        }
    }

    pub fn include_precertificates(&self) -> bool {
        self.include_precertificates
    }

    pub fn extract(&self, log_id: &Arc<str>, entry: &LogEntry) -> Option<HarvestedName> {
        let name = self.common_name(entry)?;
        Some(HarvestedName {
            log_id: Arc::clone(log_id),
            index: entry.index,
            name,
        })
    }

    /// First non-empty subject CN of the certificate carried by `entry`.
    pub fn common_name(&self, entry: &LogEntry) -> Option<String> {
        let leaf = match entry.decode_leaf() {
            Ok(leaf) => leaf,
            Err(err) => {
                tracing::trace!(index = entry.index, error = %err, "skipping undecodable leaf");
                return None;
            }
        };

        match leaf.entry {
            LeafEntry::X509 { certificate } => match X509Certificate::from_der(certificate) {
                Ok((_, cert)) => subject_common_name(&cert.tbs_certificate.subject),
                Err(err) => {
                    tracing::trace!(index = entry.index, error = %err, "skipping malformed certificate");
                    None
                }
            },
            LeafEntry::Precert {
                tbs_certificate, ..
            } if self.include_precertificates => match TbsCertificate::from_der(tbs_certificate) {
                Ok((_, tbs)) => subject_common_name(&tbs.subject),
                Err(err) => {
                    tracing::trace!(index = entry.index, error = %err, "skipping malformed precertificate");
                    None
                }
            },
            LeafEntry::Precert { .. } => None,
        }
    }
}

fn subject_common_name(subject: &X509Name<'_>) -> Option<String> {
    subject
        .iter_common_name()
        .filter_map(|attr| attr.as_str().ok())
        .map(str::trim)
        .find(|name| !name.is_empty())
        .map(str::to_owned)
}
