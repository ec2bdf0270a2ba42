pub mod ca_qtl;
pub mod h_qtl;

use std::path::PathBuf;

use crate::models::{Dataset, DatasetKind};

pub use ca_qtl::CaQtlDataset;
pub use h_qtl::HQtlDataset;

/// Loader for `kind` reading from `path`.
pub fn dataset_for(kind: DatasetKind, path: PathBuf) -> Box<dyn Dataset> {
    match kind {
        DatasetKind::CaQtls => Box::new(CaQtlDataset { path }),
        DatasetKind::HQtls => Box::new(HQtlDataset { path }),
    }
}
