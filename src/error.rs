//! CLI-layer errors: conditions that occur before a compiler or VM even
//! exists. Distinct from, and layered outside, `CompileError`/`RuntimeError`.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DynamixError {
    #[error("could not read '{}': {source}", path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("'{}' is not valid UTF-8", path.display())]
    NotUtf8 { path: PathBuf },
}
