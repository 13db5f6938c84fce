//! ESRI ASCII grid (`.asc`) decoding.
//!
//! The format is a six-line header (`ncols`, `nrows`, `xllcorner`,
//! `yllcorner`, `cellsize`, `NODATA_value`) followed by `nrows` rows of
//! whitespace-separated cell values, first row northernmost. Nodata cells are
//! stored as `f32::NAN` after decoding so every consumer gets one sentinel.

use std::fs;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};

/// A decoded row-major grid of f32 cells with its header fields.
#[derive(Debug, Clone)]
pub struct AsciiGrid {
    pub ncols: usize,
    pub nrows: usize,
    /// Lower-left corner x (header units; unused by the manual flood mapping)
    pub xllcorner: f64,
    /// Lower-left corner y
    pub yllcorner: f64,
    /// Cell size in header units (degrees for WGS84-referenced grids)
    pub cellsize: f64,
    /// Nodata sentinel as declared in the header
    pub nodata: Option<f64>,
    /// Row-major values, row 0 northernmost; nodata already replaced by NaN
    data: Vec<f32>,
}

impl AsciiGrid {
    /// Parse a grid from a file.
    pub fn open(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading grid '{}'", path.display()))?;
        Self::parse(&text).with_context(|| format!("decoding grid '{}'", path.display()))
    }

    /// Parse a grid from header + body text.
    pub fn parse(text: &str) -> Result<Self> {
        let mut tokens = text.split_whitespace();

        let mut ncols = None;
        let mut nrows = None;
        let mut xllcorner = None;
        let mut yllcorner = None;
        let mut cellsize = None;
        let mut nodata = None;

        // Header keys come in any order; the body starts at the first token
        // that is not a known key.
        let first_value = loop {
            let Some(key) = tokens.next() else {
                bail!("grid has no data rows");
            };
            let lower = key.to_ascii_lowercase();
            let known = matches!(
                lower.as_str(),
                "ncols" | "nrows" | "xllcorner" | "yllcorner" | "cellsize" | "nodata_value"
            );
            if !known {
                break key;
            }
            let value = tokens
                .next()
                .ok_or_else(|| anyhow!("header key '{}' has no value", key))?;
            let parsed: f64 = value
                .parse()
                .with_context(|| format!("parsing header '{} {}'", key, value))?;
            match lower.as_str() {
                "ncols" => ncols = Some(parsed as usize),
                "nrows" => nrows = Some(parsed as usize),
                "xllcorner" => xllcorner = Some(parsed),
                "yllcorner" => yllcorner = Some(parsed),
                "cellsize" => cellsize = Some(parsed),
                "nodata_value" => nodata = Some(parsed),
                _ => unreachable!(),
            }
        };

        let ncols = ncols.ok_or_else(|| anyhow!("header missing ncols"))?;
        let nrows = nrows.ok_or_else(|| anyhow!("header missing nrows"))?;
        let cellsize = cellsize.ok_or_else(|| anyhow!("header missing cellsize"))?;
        if ncols == 0 || nrows == 0 {
            bail!("grid has zero extent ({}x{})", ncols, nrows);
        }
        if cellsize <= 0.0 {
            bail!("cellsize must be positive, got {}", cellsize);
        }

        let expected = ncols * nrows;
        let mut data = Vec::with_capacity(expected);
        data.push(parse_cell(first_value, nodata)?);
        for token in tokens {
            if data.len() == expected {
                bail!("grid has more than {} cells", expected);
            }
            data.push(parse_cell(token, nodata)?);
        }
        if data.len() != expected {
            bail!("grid has {} cells, expected {}", data.len(), expected);
        }

        Ok(Self {
            ncols,
            nrows,
            xllcorner: xllcorner.unwrap_or(0.0),
            yllcorner: yllcorner.unwrap_or(0.0),
            cellsize,
            nodata,
            data,
        })
    }

    /// Cell value at (row, col); `None` outside the grid or on a nodata cell.
    pub fn value(&self, row: usize, col: usize) -> Option<f32> {
        if row >= self.nrows || col >= self.ncols {
            return None;
        }
        let v = self.data[row * self.ncols + col];
        if v.is_nan() {
            None
        } else {
            Some(v)
        }
    }

    /// Raw cell value including the NaN nodata sentinel; panics out of range.
    pub fn raw(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.ncols + col]
    }

    /// All cells in row-major order (NaN = nodata).
    pub fn cells(&self) -> &[f32] {
        &self.data
    }

    /// Build a grid directly from parts. Used by synthetic grids in tests.
    pub fn from_parts(
        ncols: usize,
        nrows: usize,
        xllcorner: f64,
        yllcorner: f64,
        cellsize: f64,
        data: Vec<f32>,
    ) -> Result<Self> {
        if data.len() != ncols * nrows {
            bail!(
                "data length {} does not match {}x{}",
                data.len(),
                ncols,
                nrows
            );
        }
        Ok(Self {
            ncols,
            nrows,
            xllcorner,
            yllcorner,
            cellsize,
            nodata: None,
            data,
        })
    }
}

fn parse_cell(token: &str, nodata: Option<f64>) -> Result<f32> {
    let v: f64 = token
        .parse()
        .with_context(|| format!("parsing cell value '{}'", token))?;
    let is_nodata = nodata.map(|nd| (v - nd).abs() < 1e-9).unwrap_or(false);
    Ok(if is_nodata { f32::NAN } else { v as f32 })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
ncols 3
nrows 2
xllcorner 121.07
yllcorner 14.62
cellsize 0.01
NODATA_value -9999
0.0 0.5 1.2
-9999 0.0 2.5
";

    #[test]
    fn test_parse_header_and_values() {
        let grid = AsciiGrid::parse(SAMPLE).unwrap();
        assert_eq!(grid.ncols, 3);
        assert_eq!(grid.nrows, 2);
        assert_eq!(grid.cellsize, 0.01);
        assert_eq!(grid.value(0, 1), Some(0.5));
        assert_eq!(grid.value(1, 2), Some(2.5));
    }

    #[test]
    fn test_nodata_becomes_none() {
        let grid = AsciiGrid::parse(SAMPLE).unwrap();
        assert_eq!(grid.value(1, 0), None);
        assert!(grid.raw(1, 0).is_nan());
    }

    #[test]
    fn test_out_of_range_is_none() {
        let grid = AsciiGrid::parse(SAMPLE).unwrap();
        assert_eq!(grid.value(2, 0), None);
        assert_eq!(grid.value(0, 3), None);
    }

    #[test]
    fn test_truncated_body_rejected() {
        let text = "ncols 3\nnrows 2\ncellsize 0.01\n0.0 0.5\n";
        let err = AsciiGrid::parse(text).unwrap_err();
        assert!(err.to_string().contains("cells"));
    }

    #[test]
    fn test_garbage_value_rejected() {
        let text = "ncols 2\nnrows 1\ncellsize 0.01\n0.0 abc\n";
        assert!(AsciiGrid::parse(text).is_err());
    }

    #[test]
    fn test_missing_header_rejected() {
        let text = "ncols 2\n0.0 1.0\n";
        assert!(AsciiGrid::parse(text).is_err());
    }
}
