use std::fmt::Display;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::info;
use ndarray::ArrayView2;

use crate::error::Result;
use crate::solver::{Action, IterationObserver, Phase};

/// Write a table as CSV. The first column is cars at site #1, the header
/// row holds cars at site #2.
fn write_table<W: io::Write, T: Display>(
    writer: W,
    table: &ArrayView2<T>,
    corner: &str,
    precision: Option<usize>,
) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    let mut header = vec![corner.to_string()];
    header.extend((0..table.ncols()).map(|n2| n2.to_string()));
    wtr.write_record(&header)?;

    for (n1, row) in table.rows().into_iter().enumerate() {
        let mut record = vec![n1.to_string()];
        record.extend(row.iter().map(|v| match precision {
            Some(p) => format!("{v:.p$}"),
            None => v.to_string(),
        }));
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Write the value table as CSV with four decimal places.
pub fn write_value_table<W: io::Write>(writer: W, values: &ArrayView2<f64>) -> Result<()> {
    write_table(writer, values, "n1\\n2", Some(4))
}

/// Write the policy as CSV.
pub fn write_policy<W: io::Write>(writer: W, policy: &ArrayView2<Action>) -> Result<()> {
    write_table(writer, policy, "n1\\n2", None)
}

/// Save the value table and policy as `values.csv` and `policy.csv` in `dir`.
pub fn save_solution(
    dir: &Path,
    values: &ArrayView2<f64>,
    policy: &ArrayView2<Action>,
) -> Result<()> {
    fs::create_dir_all(dir)?;
    write_value_table(fs::File::create(dir.join("values.csv"))?, values)?;
    write_policy(fs::File::create(dir.join("policy.csv"))?, policy)?;
    info!("Saved value table and policy to {}", dir.display());
    Ok(())
}

/// Observer that saves a CSV pair for every stage of policy iteration,
/// named `values_<round>_<phase>.csv` and `policy_<round>_<phase>.csv`.
pub struct CsvSnapshots {
    dir: PathBuf,
}

impl CsvSnapshots {
    pub fn new(dir: &Path) -> Result<CsvSnapshots> {
        fs::create_dir_all(dir)?;
        Ok(CsvSnapshots { dir: dir.to_path_buf() })
    }
}

impl IterationObserver for CsvSnapshots {
    fn observe(
        &mut self,
        round: usize,
        phase: Phase,
        values: ArrayView2<f64>,
        policy: ArrayView2<Action>,
    ) -> Result<()> {
        let values_path = self.dir.join(format!("values_{round}_{phase}.csv"));
        let policy_path = self.dir.join(format!("policy_{round}_{phase}.csv"));
        write_value_table(fs::File::create(values_path)?, &values)?;
        write_policy(fs::File::create(policy_path)?, &policy)?;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn policy_csv_layout() {
        // Arrange
        let policy: ndarray::Array2<Action> = array![[0, -1], [2, 0]];
        let mut buf = Vec::new();
        // Act
        write_policy(&mut buf, &policy.view()).unwrap();
        // Assert
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text, "n1\\n2,0,1\n0,0,-1\n1,2,0\n");
    }

    #[test]
    fn value_csv_precision() {
        let values = array![[1.0, 2.5], [0.123456, 10.0]];
        let mut buf = Vec::new();
        write_value_table(&mut buf, &values.view()).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[1], "0,1.0000,2.5000");
        assert_eq!(lines[2], "1,0.1235,10.0000");
    }

    #[test]
    fn snapshots_written_per_phase() {
        // Arrange
        let dir = std::env::temp_dir().join(format!("rustcar-snapshots-{}", std::process::id()));
        let mut snapshots = CsvSnapshots::new(&dir).unwrap();
        let values = ndarray::Array2::<f64>::zeros((3, 3));
        let policy = ndarray::Array2::<Action>::zeros((3, 3));
        // Act
        snapshots.observe(1, Phase::Evaluated, values.view(), policy.view()).unwrap();
        // Assert
        assert!(dir.join("values_1_evaluated.csv").exists());
        assert!(dir.join("policy_1_evaluated.csv").exists());
        fs::remove_dir_all(&dir).unwrap();
    }
}
