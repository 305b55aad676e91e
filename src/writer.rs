use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
    sync::mpsc::Receiver,
};

use log::warn;

use crate::{BusBuddyError, source::RawFix};

/// Writes every fix received on `fix_receiver` to `file`, one JSON object per
/// line, until all senders are gone. The output can be replayed with `--replay`.
pub fn write_fixes(file: &Path, fix_receiver: Receiver<RawFix>) -> Result<usize, BusBuddyError> {
    let fix_file = File::create(file).map_err(|e| BusBuddyError::WriterError { source: e })?;
    let mut fix_file_writer = BufWriter::new(fix_file);
    let mut written = 0;
    for fix in &fix_receiver {
        let line = match serde_json::to_string(&fix) {
            Ok(line) => line,
            Err(e) => {
                warn!("Could not serialize fix: {}", e);
                continue;
            }
        };
        match writeln!(fix_file_writer, "{}", line) {
            Ok(()) => written += 1,
            Err(e) => warn!("Error while writing fix to output file: {}", e),
        }
    }
    fix_file_writer
        .flush()
        .map_err(|e| BusBuddyError::WriterError { source: e })?;
    Ok(written)
}
