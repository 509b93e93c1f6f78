//! The authoritative zone: a flat set of records loaded once at
//! startup from a master file.

pub mod deserialise;

use std::collections::HashSet;
use std::fmt;
use std::io;
use std::path::Path;

use crate::protocol::types::{DomainName, ResourceRecord};

/// The records this server is authoritative for.  Immutable after
/// load.
#[derive(Debug, Clone)]
pub struct ZoneStore {
    records: Vec<ResourceRecord>,
    names: HashSet<DomainName>,
}

impl ZoneStore {
    /// Read and parse a master file.
    ///
    /// # Errors
    ///
    /// If the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, LoadError> {
        let data = std::fs::read_to_string(path).map_err(LoadError::Io)?;
        let records = deserialise::parse(&data).map_err(LoadError::Parse)?;
        Ok(Self::from_records(records))
    }

    pub fn from_records(records: Vec<ResourceRecord>) -> Self {
        let names = records.iter().map(|rr| rr.name.clone()).collect();
        Self { records, names }
    }

    /// The set of owner names appearing in the zone.
    pub fn local_names(&self) -> &HashSet<DomainName> {
        &self.names
    }

    /// Every record loaded from the zone file.
    pub fn all_records(&self) -> &[ResourceRecord] {
        &self.records
    }

    /// True if this server answers authoritatively for the name: it
    /// equals, or sits below, some owner name in the zone.
    pub fn is_local(&self, name: &DomainName) -> bool {
        self.names.iter().any(|local| name.is_subdomain_of(local))
    }
}

/// Errors that can arise when loading a zone at startup.  Both are
/// fatal.
#[derive(Debug)]
pub enum LoadError {
    Io(io::Error),
    Parse(deserialise::Error),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LoadError::Io(error) => write!(f, "could not read zone file: {error}"),
            LoadError::Parse(error) => write!(f, "could not parse zone file: {error}"),
        }
    }
}

impl std::error::Error for LoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LoadError::Io(error) => Some(error),
            LoadError::Parse(error) => Some(error),
        }
    }
}
