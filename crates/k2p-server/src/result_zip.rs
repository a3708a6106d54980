use std::io::{Seek as _, SeekFrom, Write as _};
use std::path::Path;

use anyhow::{Context as _, Result};
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::ZipWriter;

/// Zips every regular file under `results_dir` into a spilled temp file and
/// rewinds it for streaming (spec §6 `GET /jobs/{id}/result.zip`), the same
/// role the original's `SpooledTemporaryFile` plays.
pub fn build_result_zip(results_dir: &Path) -> Result<std::fs::File> {
    let mut file = tempfile::tempfile().context("creating spooled zip buffer")?;
    {
        let mut writer = ZipWriter::new(&mut file);
        let options = FileOptions::default();
        for entry in WalkDir::new(results_dir).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry.path().strip_prefix(results_dir).context("relativizing artifact path")?;
            let name = rel.to_string_lossy().replace('\\', "/");
            writer.start_file(name, options).context("starting zip entry")?;
            let contents = std::fs::read(entry.path()).context("reading artifact")?;
            writer.write_all(&contents).context("writing zip entry")?;
        }
        writer.finish().context("finishing zip archive")?;
    }
    file.seek(SeekFrom::Start(0)).context("rewinding zip buffer")?;
    Ok(file)
}
