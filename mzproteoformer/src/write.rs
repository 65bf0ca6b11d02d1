use std::fs;
use std::io::{self, prelude::*, BufReader, BufWriter};
use std::path::Path;

use crossbeam_channel::Receiver;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use mzproteoform::{CommunityInput, CommunityParams, FdrSummary, ProteoformCommunity, SkipReport};

use crate::driver::MZProteoformerError;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// The document written for a completed build
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunityReport {
    pub params: CommunityParams,
    pub skipped: SkipReport,
    pub community: ProteoformCommunity,
    pub fdr: FdrSummary,
}

impl From<ProteoformCommunity> for CommunityReport {
    fn from(community: ProteoformCommunity) -> Self {
        Self {
            params: *community.params(),
            skipped: community.skipped().clone(),
            fdr: community.fdr().clone(),
            community,
        }
    }
}

fn is_stdio(path: &Path) -> bool {
    path.as_os_str() == "-"
}

/// Parse an input document from any buffered stream, decompressing it if it is gzipped
pub fn read_input_from<R: BufRead>(mut reader: R) -> Result<CommunityInput, MZProteoformerError> {
    let is_gzipped = reader.fill_buf()?.starts_with(&GZIP_MAGIC);
    let input = if is_gzipped {
        debug!("Reading gzip compressed input");
        serde_json::from_reader(BufReader::new(GzDecoder::new(reader)))?
    } else {
        serde_json::from_reader(reader)?
    };
    Ok(input)
}

/// Read an input document from `path`, or from STDIN when `path` is `-`
pub fn read_input(path: &Path) -> Result<CommunityInput, MZProteoformerError> {
    if is_stdio(path) {
        info!("Reading input from STDIN");
        read_input_from(io::stdin().lock())
    } else {
        info!("Reading input from {}", path.display());
        read_input_from(BufReader::new(fs::File::open(path)?))
    }
}

fn open_output(path: &Path) -> io::Result<Box<dyn Write + Send>> {
    if is_stdio(path) {
        return Ok(Box::new(BufWriter::new(io::stdout())));
    }
    let handle = BufWriter::new(fs::File::create(path)?);
    if path.extension().is_some_and(|ext| ext == "gz") {
        Ok(Box::new(GzEncoder::new(handle, Compression::best())))
    } else {
        Ok(Box::new(handle))
    }
}

pub fn write_report<W: Write>(mut writer: W, report: &CommunityReport) -> Result<(), MZProteoformerError> {
    serde_json::to_writer(&mut writer, report)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

/// Write every report received on `receiver` to `path`, gzip compressing when the
/// path ends in `.gz`. Returns the number of reports written.
pub(crate) fn write_output(
    path: &Path,
    receiver: Receiver<CommunityReport>,
) -> Result<usize, MZProteoformerError> {
    let mut written = 0;
    for report in receiver.iter() {
        let writer = open_output(path)?;
        write_report(writer, &report)?;
        written += 1;
    }
    debug!("Wrote {written} reports");
    Ok(written)
}

#[cfg(test)]
mod test {
    use super::*;

    const DOCUMENT: &str = r#"{
        "observations": [
            {"id": "o1", "source": "run1", "mass": 10000.0, "intensity": 10.0, "rt": 30.0}
        ],
        "theoreticals": [
            {"accession": "T1", "name": "T1", "begin": 1, "end": 90, "unmodified_mass": 9984.005}
        ],
        "decoys": {"decoy_0": []}
    }"#;

    #[test]
    fn test_read_plain_and_gzipped() {
        let plain = read_input_from(DOCUMENT.as_bytes()).unwrap();
        assert_eq!(plain.observations.len(), 1);
        assert_eq!(plain.theoreticals.len(), 1);
        assert_eq!(plain.theoreticals[0].lysine_count, None);
        assert!(plain.decoys["decoy_0"].is_empty());
        assert!(plain.light_observations.is_none());

        let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(DOCUMENT.as_bytes()).unwrap();
        let compressed = encoder.finish().unwrap();
        let gzipped = read_input_from(compressed.as_slice()).unwrap();
        assert_eq!(plain, gzipped);
    }

    #[test]
    fn test_read_malformed() {
        let err = read_input_from(&b"{\"observations\": 12}"[..]).unwrap_err();
        assert!(matches!(err, MZProteoformerError::SerializationError(_)));
    }
}
