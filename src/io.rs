//! File formats: `.npy` volumes, JSON tables and the two-column noise table.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use ndarray_npy::{read_npy, write_npy};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::ConfigError;
use crate::volume::Volume;
use crate::wedge::ShellBand;

pub fn read_volume(path: impl AsRef<Path>) -> Result<Volume> {
    let path = path.as_ref();
    read_npy(path).map_err(|e| anyhow!("Failed to read volume {:?}: {}", path, e))
}

pub fn write_volume(path: impl AsRef<Path>, volume: &Volume) -> Result<()> {
    let path = path.as_ref();
    write_npy(path, volume).map_err(|e| anyhow!("Failed to write volume {:?}: {}", path, e))
}

pub fn read_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse JSON {:?}", path))
}

pub fn write_json<T: Serialize + ?Sized>(path: impl AsRef<Path>, value: &T) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
    let mut out = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut out, value)
        .with_context(|| format!("Failed to write JSON {:?}", path))?;
    writeln!(out)?;
    out.flush()?;
    Ok(())
}

/// Read a `shell value` noise table. Blank lines and `#` comments are
/// skipped; every shell below `band.max` must be present.
pub fn read_sigma2(path: impl AsRef<Path>, band: ShellBand) -> Result<Vec<f64>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    parse_sigma2(&text, band).with_context(|| format!("Invalid noise table {:?}", path))
}

fn parse_sigma2(text: &str, band: ShellBand) -> Result<Vec<f64>> {
    let mut sigma2 = vec![None; band.nr_shells()];
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split_whitespace();
        let (Some(shell), Some(value)) = (fields.next(), fields.next()) else {
            return Err(anyhow!("line {}: expected 'shell value'", lineno + 1));
        };
        let shell: usize = shell
            .parse()
            .with_context(|| format!("line {}: bad shell index", lineno + 1))?;
        let value: f64 = value
            .parse()
            .with_context(|| format!("line {}: bad value", lineno + 1))?;
        // shells beyond the band are ignored
        if let Some(slot) = sigma2.get_mut(shell) {
            *slot = Some(value);
        }
    }
    let found = sigma2.iter().filter(|s| s.is_some()).count();
    if found != sigma2.len() {
        return Err(ConfigError::TableLength {
            what: "noise table",
            found,
            expected: sigma2.len(),
        }
        .into());
    }
    Ok(sigma2.into_iter().flatten().collect())
}

pub fn write_sigma2(path: impl AsRef<Path>, sigma2: &[f64]) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
    let mut out = BufWriter::new(file);
    for (shell, value) in sigma2.iter().enumerate() {
        writeln!(out, "{} {}", shell, value)?;
    }
    out.flush()?;
    Ok(())
}
