use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::error::{GradebookError, GradebookResult};

/// One data row keyed by trimmed header. Empty cells are `""`.
pub type Row = BTreeMap<String, String>;

const XLSX_WORKBOOK_ENTRY: &str = "xl/workbook.xml";

/// Reader over an uploaded grade sheet, picked by file extension.
#[derive(Debug, Clone, PartialEq)]
pub enum SpreadsheetReader {
    /// Comma-separated text with one header row.
    TabularText(PathBuf),
    /// Office Open XML workbook. Recognised, never parsed.
    SpreadsheetBinary(PathBuf),
}

impl SpreadsheetReader {
    /// Selects the variant for `path`. Does not touch the filesystem.
    pub fn for_path(path: impl Into<PathBuf>) -> GradebookResult<Self> {
        let path = path.into();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("csv") => Ok(Self::TabularText(path)),
            Some("xlsx") | Some("xls") => Ok(Self::SpreadsheetBinary(path)),
            _ => Err(GradebookError::validation(format!(
                "Invalid file type: {} (expected .csv or .xlsx)",
                path.file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default()
            ))),
        }
    }

    /// Confirms the content matches the extension. Text files pass as long as
    /// they are readable; workbooks must be zip packages with a workbook part.
    pub fn verify_content(&self) -> GradebookResult<()> {
        match self {
            Self::TabularText(p) => {
                File::open(p)?;
                Ok(())
            }
            Self::SpreadsheetBinary(p) => {
                let file = File::open(p)?;
                let mut archive = zip::ZipArchive::new(file).map_err(|_| {
                    GradebookError::validation("Invalid file type: not an xlsx workbook")
                })?;
                if archive.by_name(XLSX_WORKBOOK_ENTRY).is_err() {
                    return Err(GradebookError::validation(
                        "Invalid file type: workbook part missing",
                    ));
                }
                Ok(())
            }
        }
    }

    /// Header names in file order, trimmed.
    pub fn columns(&self) -> GradebookResult<Vec<String>> {
        match self {
            Self::TabularText(p) => {
                let mut rdr = csv_reader(p)?;
                Ok(clean_headers(rdr.headers()?))
            }
            Self::SpreadsheetBinary(_) => Err(GradebookError::Unimplemented(
                "Not implemented: xlsx column discovery".to_string(),
            )),
        }
    }

    /// Every data row. A header-only or empty file yields no rows.
    pub fn process(&self) -> GradebookResult<Vec<Row>> {
        match self {
            Self::TabularText(p) => {
                let mut rdr = csv_reader(p)?;
                let headers = clean_headers(rdr.headers()?);
                let mut rows = Vec::new();
                for record in rdr.records() {
                    let record = record?;
                    if record.iter().all(|cell| cell.is_empty()) {
                        continue;
                    }
                    let row = headers
                        .iter()
                        .enumerate()
                        .map(|(i, h)| (h.clone(), record.get(i).unwrap_or("").to_string()))
                        .collect();
                    rows.push(row);
                }
                Ok(rows)
            }
            Self::SpreadsheetBinary(_) => Err(GradebookError::Unimplemented(
                "Method not implemented yet: xlsx processing".to_string(),
            )),
        }
    }
}

fn csv_reader(path: &Path) -> GradebookResult<csv::Reader<File>> {
    let file = File::open(path)?;
    Ok(csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(file))
}

fn clean_headers(record: &csv::StringRecord) -> Vec<String> {
    record
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
        .collect()
}

/// Hex SHA-256 of the file's bytes.
pub fn file_sha256(path: &Path) -> GradebookResult<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_file(name: &str, contents: &[u8]) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "gradebookd-sheet-{}",
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        let p = dir.join(name);
        std::fs::write(&p, contents).expect("write temp file");
        p
    }

    const GRADES: &str = "cpf, Requirements ,Configuration Management,\
Project Management,Design,Refactoring,Tests\n\
11111111111,MPA,MA,MA,MA,MA,MA\n\
55555555555,MANA,MPA,MPA,MPA,MPA,MPA\n\
22222222222,MA,,,,,\n";

    #[test]
    fn picks_variant_by_extension() {
        assert!(matches!(
            SpreadsheetReader::for_path("grades.CSV").unwrap(),
            SpreadsheetReader::TabularText(_)
        ));
        assert!(matches!(
            SpreadsheetReader::for_path("test.xlsx").unwrap(),
            SpreadsheetReader::SpreadsheetBinary(_)
        ));
        let e = SpreadsheetReader::for_path("notes.txt").unwrap_err();
        assert!(matches!(e, GradebookError::Validation(_)));
        assert!(e.to_string().contains("Invalid file type"));
    }

    #[test]
    fn columns_are_trimmed_and_ordered() {
        let p = temp_file("grades.csv", GRADES.as_bytes());
        let cols = SpreadsheetReader::for_path(&p).unwrap().columns().unwrap();
        assert_eq!(
            cols,
            vec![
                "cpf",
                "Requirements",
                "Configuration Management",
                "Project Management",
                "Design",
                "Refactoring",
                "Tests"
            ]
        );
    }

    #[test]
    fn rows_keep_empty_cells_as_empty_strings() {
        let p = temp_file("grades.csv", GRADES.as_bytes());
        let rows = SpreadsheetReader::for_path(&p).unwrap().process().unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0]["cpf"], "11111111111");
        assert_eq!(rows[0]["Requirements"], "MPA");
        assert_eq!(rows[1]["Requirements"], "MANA");
        let sparse = rows.iter().find(|r| r["cpf"] == "22222222222").unwrap();
        assert_eq!(sparse["Requirements"], "MA");
        assert_eq!(sparse["Configuration Management"], "");
        assert_eq!(sparse["Tests"], "");
    }

    #[test]
    fn short_rows_are_padded() {
        let p = temp_file("short.csv", b"cpf,Design,Tests\n11111111111,MA\n");
        let rows = SpreadsheetReader::for_path(&p).unwrap().process().unwrap();
        assert_eq!(rows[0]["Tests"], "");
    }

    #[test]
    fn empty_and_header_only_files_yield_no_rows() {
        let empty = temp_file("empty.csv", b"");
        assert!(SpreadsheetReader::for_path(&empty).unwrap().process().unwrap().is_empty());

        let headers = temp_file("headers.csv", b"col1,col2,col3\n");
        let reader = SpreadsheetReader::for_path(&headers).unwrap();
        assert!(reader.process().unwrap().is_empty());
        assert_eq!(reader.columns().unwrap(), vec!["col1", "col2", "col3"]);
    }

    #[test]
    fn missing_file_fails() {
        let reader = SpreadsheetReader::for_path("/nonexistent/dir/non_existent.csv").unwrap();
        assert!(matches!(reader.columns().unwrap_err(), GradebookError::Io(_)));
        assert!(reader.process().is_err());
    }

    #[test]
    fn xlsx_is_a_permanent_gap() {
        let reader = SpreadsheetReader::for_path("test.xlsx").unwrap();
        let e = reader.process().unwrap_err();
        assert!(matches!(e, GradebookError::Unimplemented(_)));
        assert!(e.to_string().contains("Method not implemented yet"));
        let e = reader.columns().unwrap_err();
        assert!(e.to_string().contains("Not implemented"));
    }

    #[test]
    fn mislabelled_workbook_is_rejected() {
        let p = temp_file("fake.xlsx", b"cpf,Design\n");
        let e = SpreadsheetReader::for_path(&p).unwrap().verify_content().unwrap_err();
        assert!(matches!(e, GradebookError::Validation(_)));
    }

    #[test]
    fn real_workbook_package_passes_sniffing() {
        let p = temp_file("book.xlsx", b"");
        {
            let file = File::create(&p).expect("create xlsx");
            let mut zip = zip::ZipWriter::new(file);
            zip.start_file(XLSX_WORKBOOK_ENTRY, zip::write::FileOptions::default())
                .expect("start entry");
            zip.write_all(b"<workbook/>").expect("write entry");
            zip.finish().expect("finish zip");
        }
        let reader = SpreadsheetReader::for_path(&p).unwrap();
        reader.verify_content().expect("sniff");
        assert!(matches!(reader.columns().unwrap_err(), GradebookError::Unimplemented(_)));
    }

    #[test]
    fn digest_is_stable_hex() {
        let p = temp_file("digest.csv", b"abc");
        assert_eq!(
            file_sha256(&p).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
