//! Export encodings

use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;

use super::Output;
use crate::error::{AnalysisError, AnalysisResult};
use crate::request::Encoding;

/// An encoded output ready to be written out
#[derive(Debug, Clone, PartialEq)]
pub struct Export {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
    /// Suggested file name
    pub file_name: String,
}

/// Encode an output, optionally GZIP-wrapped
pub fn encode(output: &Output, encoding: Encoding, gzip: bool) -> AnalysisResult<Export> {
    let (bytes, content_type) = match encoding {
        Encoding::Csv => (to_csv(output)?, "text/csv"),
        Encoding::Json => (
            serde_json::to_vec_pretty(output)
                .map_err(|e| AnalysisError::Computation(format!("JSON export failed: {}", e)))?,
            "application/json",
        ),
        Encoding::Xls | Encoding::Xlsx => {
            return Err(AnalysisError::Config(format!(
                "{} export is not supported",
                encoding.extension()
            )))
        }
    };

    let mut file_name = format!("{}.{}", output.info.job_id, encoding.extension());
    if !gzip {
        return Ok(Export {
            bytes,
            content_type,
            file_name,
        });
    }

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&bytes)
        .and_then(|_| encoder.finish())
        .map(|compressed| {
            file_name.push_str(".gz");
            Export {
                bytes: compressed,
                content_type: "application/gzip",
                file_name,
            }
        })
        .map_err(|e| AnalysisError::Computation(format!("GZIP export failed: {}", e)))
}

fn to_csv(output: &Output) -> AnalysisResult<Vec<u8>> {
    let failed = |e: csv::Error| AnalysisError::Computation(format!("CSV export failed: {}", e));
    let (names, rows) = output.grid();

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(&names).map_err(failed)?;
    for row in &rows {
        writer.write_record(row).map_err(failed)?;
    }
    writer
        .into_inner()
        .map_err(|e| AnalysisError::Computation(format!("CSV export failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{Body, OutputInfo};
    use flate2::read::GzDecoder;
    use std::io::Read;

    fn output() -> Output {
        Output {
            info: OutputInfo {
                job_id: "j1".into(),
                from_cache: false,
                executed_at: None,
                complete: true,
                total_size: 2,
                start_index: 0,
            },
            header: vec![],
            body: Body::Transpose {
                categories: vec!["France".into(), "Spain, North".into()],
                series: vec![crate::output::Series {
                    name: "Revenue".into(),
                    values: vec![serde_json::json!(150), serde_json::Value::Null],
                }],
            },
        }
    }

    #[test]
    fn test_csv_export() {
        let export = encode(&output(), Encoding::Csv, false).unwrap();
        assert_eq!(export.file_name, "j1.csv");
        let text = String::from_utf8(export.bytes).unwrap();
        assert_eq!(text, ",France,\"Spain, North\"\nRevenue,150,\n");
    }

    #[test]
    fn test_gzip_wraps_any_encoding() {
        let export = encode(&output(), Encoding::Json, true).unwrap();
        assert_eq!(export.file_name, "j1.json.gz");
        let mut decoded = String::new();
        GzDecoder::new(export.bytes.as_slice())
            .read_to_string(&mut decoded)
            .unwrap();
        let json: serde_json::Value = serde_json::from_str(&decoded).unwrap();
        assert_eq!(json["layout"], "transpose");
    }

    #[test]
    fn test_spreadsheets_rejected() {
        let err = encode(&output(), Encoding::Xlsx, false).unwrap_err();
        assert!(matches!(err, AnalysisError::Config(_)));
    }
}
