use super::{ResultSink, SinkLocation};
use crate::config::{render_template, PipelineConfig};
use crate::error::{PipelineError, Result};
use polars::prelude::*;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Writes each device's table to `<output_dir>/<file_template>`, with
/// `{device}` in the template replaced by the device id.
#[derive(Debug, Clone)]
pub struct CsvDirectorySink {
    output_dir: PathBuf,
    file_template: String,
}

impl CsvDirectorySink {
    pub fn new(output_dir: impl Into<PathBuf>, file_template: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            file_template: file_template.into(),
        }
    }

    /// Sink writing where the configuration says outputs go.
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(&config.output_dir, &config.output_file_template)
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn path_for(&self, device_id: &str) -> PathBuf {
        self.output_dir
            .join(render_template(&self.file_template, device_id))
    }
}

impl ResultSink for CsvDirectorySink {
    fn write(&self, device_id: &str, df: &mut DataFrame) -> Result<SinkLocation> {
        fs::create_dir_all(&self.output_dir).map_err(|e| {
            PipelineError::SinkFailed(format!(
                "cannot create {}: {}",
                self.output_dir.display(),
                e
            ))
        })?;

        let path = self.path_for(device_id);
        let staging = staging_path(&path);

        if let Err(e) = write_csv(&staging, df).and_then(|()| {
            fs::rename(&staging, &path).map_err(|e| {
                PipelineError::SinkFailed(format!("cannot replace {}: {}", path.display(), e))
            })
        }) {
            // leave any previous output untouched
            let _ = fs::remove_file(&staging);
            return Err(e.with_context(format!("Failed to write {}", path.display())));
        }

        debug!("Wrote {} rows to {}", df.height(), path.display());
        Ok(SinkLocation::File(path))
    }
}

/// Sibling of `path` that receives the table before it replaces `path`.
fn staging_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.tmp", file_name))
}

fn write_csv(path: &Path, df: &mut DataFrame) -> Result<()> {
    let mut file = File::create(path)
        .map_err(|e| PipelineError::SinkFailed(format!("cannot create {}: {}", path.display(), e)))?;

    CsvWriter::new(&mut file)
        .include_header(true)
        .with_separator(b',')
        .with_quote_char(b'"')
        .finish(df)?;

    file.sync_all()?;
    Ok(())
}
