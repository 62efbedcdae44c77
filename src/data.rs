//! Data sets and file loaders.
//!
//! [`DataSet`] stores feature and target rows contiguously, row-major, the
//! way the minibatch gather and the evaluation workspaces consume them.
//!
//! # Formats
//!
//! - Training set text: line 1 is the row count, line 2 the comma-separated
//!   layer widths, then one row per line with `input_width` features
//!   followed by `output_width` targets.
//! - Weight vector text: comma-separated floats over any number of lines,
//!   either the weights alone or the weights followed by the biases.
//! - MNIST: the four idx files of the standard distribution.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::error::{FlatnetError, FlatnetResult};
use crate::topology::NetworkTopology;

/// Pixels per MNIST image.
pub const MNIST_PIXELS: usize = 28 * 28;
/// MNIST label classes.
pub const MNIST_CLASSES: usize = 10;
/// Files expected in an MNIST directory.
pub const MNIST_FILES: [&str; 4] = [
    "train-images-idx3-ubyte",
    "train-labels-idx1-ubyte",
    "t10k-images-idx3-ubyte",
    "t10k-labels-idx1-ubyte",
];

/// Values per line when writing a weight vector.
const WEIGHTS_PER_LINE: usize = 16;

/// Feature rows and target rows of equal count.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSet {
    layers: Vec<usize>,
    rows: usize,
    inputs: Vec<f32>,
    targets: Vec<f32>,
}

impl DataSet {
    /// Builds a data set from flat row-major arrays.
    ///
    /// The declared layer widths default to `[input_width, output_width]`.
    pub fn from_flat(
        inputs: Vec<f32>,
        targets: Vec<f32>,
        input_width: usize,
        output_width: usize,
    ) -> FlatnetResult<Self> {
        if input_width == 0 || output_width == 0 {
            return Err(FlatnetError::data_mismatch("row widths must be > 0"));
        }
        if inputs.len() % input_width != 0 {
            return Err(FlatnetError::data_mismatch(format!(
                "inputs length {} is not divisible by input width {}",
                inputs.len(),
                input_width
            )));
        }
        let rows = inputs.len() / input_width;
        if targets.len() != rows * output_width {
            return Err(FlatnetError::data_mismatch(format!(
                "{} input rows but {} target values (expected {})",
                rows,
                targets.len(),
                rows * output_width
            )));
        }
        if rows == 0 {
            return Err(FlatnetError::data_mismatch("data set has no rows"));
        }
        Ok(Self {
            layers: vec![input_width, output_width],
            rows,
            inputs,
            targets,
        })
    }

    /// Attaches the full layer widths declared by the source file.
    pub fn with_layers(mut self, layers: Vec<usize>) -> FlatnetResult<Self> {
        let topology = NetworkTopology::new(layers)?;
        if topology.input_width() != self.input_width() || topology.output_width() != self.output_width() {
            return Err(FlatnetError::data_mismatch(format!(
                "layers {:?} do not match rows of {} inputs and {} targets",
                topology.layers(),
                self.input_width(),
                self.output_width()
            )));
        }
        self.layers = topology.layers().to_vec();
        Ok(self)
    }

    /// Layer widths declared by the source.
    pub fn layers(&self) -> &[usize] {
        &self.layers
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn input_width(&self) -> usize {
        self.layers[0]
    }

    #[inline]
    pub fn output_width(&self) -> usize {
        self.layers[self.layers.len() - 1]
    }

    pub fn inputs(&self) -> &[f32] {
        &self.inputs
    }

    pub fn targets(&self) -> &[f32] {
        &self.targets
    }

    #[inline]
    pub fn input_row(&self, row: usize) -> &[f32] {
        let w = self.input_width();
        &self.inputs[row * w..(row + 1) * w]
    }

    #[inline]
    pub fn target_row(&self, row: usize) -> &[f32] {
        let w = self.output_width();
        &self.targets[row * w..(row + 1) * w]
    }

    /// Whether rows of this set fit a network with `topology`.
    pub fn fits(&self, topology: &NetworkTopology) -> bool {
        topology.input_width() == self.input_width() && topology.output_width() == self.output_width()
    }
}

fn parse_row(line: &str, source_name: &str, line_no: usize) -> FlatnetResult<Vec<f32>> {
    line.split(',')
        .map(str::trim)
        .filter(|tok| !tok.is_empty())
        .map(|tok| {
            tok.parse::<f32>()
                .map_err(|e| FlatnetError::parse(source_name, line_no, format!("'{}': {}", tok, e)))
        })
        .collect()
}

/// Parses a training set from `reader`. `source_name` labels errors.
pub fn parse_training_set<R: BufRead>(reader: R, source_name: &str) -> FlatnetResult<DataSet> {
    let mut lines = reader.lines();

    let header = lines
        .next()
        .ok_or_else(|| FlatnetError::parse(source_name, 1, "missing row count"))??;
    let rows: usize = header
        .trim()
        .parse()
        .map_err(|e| FlatnetError::parse(source_name, 1, format!("row count: {}", e)))?;
    if rows == 0 {
        return Err(FlatnetError::parse(source_name, 1, "row count must be > 0"));
    }

    let layer_line = lines
        .next()
        .ok_or_else(|| FlatnetError::parse(source_name, 2, "missing layer widths"))??;
    let layers = layer_line
        .split(',')
        .map(str::trim)
        .filter(|tok| !tok.is_empty())
        .map(|tok| {
            tok.parse::<usize>()
                .map_err(|e| FlatnetError::parse(source_name, 2, format!("layer width '{}': {}", tok, e)))
        })
        .collect::<FlatnetResult<Vec<usize>>>()?;
    let topology = NetworkTopology::new(layers)?;
    let input_width = topology.input_width();
    let output_width = topology.output_width();
    let cols = input_width + output_width;

    let mut inputs = Vec::with_capacity(rows * input_width);
    let mut targets = Vec::with_capacity(rows * output_width);
    let mut read = 0;
    for (idx, line) in lines.enumerate() {
        if read == rows {
            break;
        }
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let line_no = idx + 3;
        let values = parse_row(&line, source_name, line_no)?;
        if values.len() != cols {
            return Err(FlatnetError::parse(
                source_name,
                line_no,
                format!("expected {} columns, got {}", cols, values.len()),
            ));
        }
        inputs.extend_from_slice(&values[..input_width]);
        targets.extend_from_slice(&values[input_width..]);
        read += 1;
    }
    if read != rows {
        return Err(FlatnetError::data_mismatch(format!(
            "{}: declared {} rows, found {}",
            source_name, rows, read
        )));
    }

    DataSet::from_flat(inputs, targets, input_width, output_width)?.with_layers(topology.layers().to_vec())
}

/// Loads a training (or test) set file.
pub fn load_training_set<P: AsRef<Path>>(path: P) -> FlatnetResult<DataSet> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let data = parse_training_set(BufReader::new(file), &path.display().to_string())?;
    log::info!(
        "Loaded {} rows of {} -> {} from {}",
        data.rows(),
        data.input_width(),
        data.output_width(),
        path.display()
    );
    Ok(data)
}

/// Parses a weight vector, reading every value in the stream.
pub fn parse_weights<R: BufRead>(reader: R, source_name: &str) -> FlatnetResult<Vec<f32>> {
    let mut values = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        values.extend(parse_row(&line, source_name, idx + 1)?);
    }
    Ok(values)
}

/// Loads a weight vector file.
pub fn load_weights<P: AsRef<Path>>(path: P) -> FlatnetResult<Vec<f32>> {
    let path = path.as_ref();
    let file = File::open(path)?;
    parse_weights(BufReader::new(file), &path.display().to_string())
}

/// Writes `values` as comma-separated lines.
pub fn write_weights<W: Write>(mut writer: W, values: &[f32]) -> FlatnetResult<()> {
    for chunk in values.chunks(WEIGHTS_PER_LINE) {
        let line = chunk
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(",");
        writeln!(writer, "{}", line)?;
    }
    writer.flush()?;
    Ok(())
}

/// Saves a weight vector file.
pub fn save_weights<P: AsRef<Path>>(path: P, values: &[f32]) -> FlatnetResult<()> {
    let file = File::create(path.as_ref())?;
    write_weights(BufWriter::new(file), values)
}

/// Loads the MNIST training and test sets from `dir`.
///
/// Pixels are scaled to `[0, 1]`; labels become one-hot rows of 10.
pub fn load_mnist<P: AsRef<Path>>(dir: P) -> FlatnetResult<(DataSet, DataSet)> {
    let dir = dir.as_ref();
    for name in MNIST_FILES {
        if !dir.join(name).is_file() {
            return Err(FlatnetError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} not found in {}", name, dir.display()),
            )));
        }
    }
    let base = dir
        .to_str()
        .ok_or_else(|| FlatnetError::data_mismatch(format!("non UTF-8 path {}", dir.display())))?;
    let base = format!("{}/", base.trim_end_matches('/'));

    let mnist::Mnist {
        trn_img,
        trn_lbl,
        tst_img,
        tst_lbl,
        ..
    } = mnist::MnistBuilder::new()
        .base_path(&base)
        .label_format_digit()
        .training_set_length(60_000)
        .test_set_length(10_000)
        .finalize();

    let train = mnist_set(&trn_img, &trn_lbl)?;
    let test = mnist_set(&tst_img, &tst_lbl)?;
    log::info!(
        "Loaded MNIST from {}: {} training rows, {} test rows",
        dir.display(),
        train.rows(),
        test.rows()
    );
    Ok((train, test))
}

fn mnist_set(images: &[u8], labels: &[u8]) -> FlatnetResult<DataSet> {
    if images.len() != labels.len() * MNIST_PIXELS {
        return Err(FlatnetError::data_mismatch(format!(
            "{} image bytes for {} labels",
            images.len(),
            labels.len()
        )));
    }
    let inputs = images.iter().map(|&p| p as f32 / 255.0).collect();
    let mut targets = vec![0.0; labels.len() * MNIST_CLASSES];
    for (row, &label) in labels.iter().enumerate() {
        let label = label as usize;
        if label >= MNIST_CLASSES {
            return Err(FlatnetError::data_mismatch(format!("label {} out of range", label)));
        }
        targets[row * MNIST_CLASSES + label] = 1.0;
    }
    DataSet::from_flat(inputs, targets, MNIST_PIXELS, MNIST_CLASSES)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const XOR: &str = "4\n2,3,1\n0,0,0\n0,1,1\n1,0,1\n1,1,0\n";

    #[test]
    fn test_parse_training_set() {
        let data = parse_training_set(Cursor::new(XOR), "xor").unwrap();
        assert_eq!(data.rows(), 4);
        assert_eq!(data.layers(), &[2, 3, 1]);
        assert_eq!(data.input_row(2), &[1.0, 0.0]);
        assert_eq!(data.target_row(3), &[0.0]);
    }

    #[test]
    fn test_parse_stops_at_declared_rows() {
        let src = "1\n1,1\n0.5,1\n0.25,0\n";
        let data = parse_training_set(Cursor::new(src), "short").unwrap();
        assert_eq!(data.rows(), 1);
        assert_eq!(data.inputs(), &[0.5]);
    }

    #[test]
    fn test_parse_undersized_file() {
        let src = "3\n1,1\n0.5,1\n";
        let err = parse_training_set(Cursor::new(src), "under").unwrap_err();
        assert!(matches!(err, FlatnetError::DataMismatch(_)));
    }

    #[test]
    fn test_parse_wrong_column_count() {
        let src = "1\n2,1\n0.5,1\n";
        let err = parse_training_set(Cursor::new(src), "cols").unwrap_err();
        assert!(matches!(err, FlatnetError::Parse { line: 3, .. }));
    }

    #[test]
    fn test_parse_bad_float() {
        let src = "1\n1,1\nabc,1\n";
        assert!(matches!(
            parse_training_set(Cursor::new(src), "float"),
            Err(FlatnetError::Parse { .. })
        ));
    }

    #[test]
    fn test_weights_roundtrip_text() {
        let values: Vec<f32> = (0..40).map(|i| i as f32 * 0.125 - 2.0).collect();
        let mut out = Vec::new();
        write_weights(&mut out, &values).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 3);
        let parsed = parse_weights(Cursor::new(text), "w").unwrap();
        assert_eq!(parsed, values);
    }

    #[test]
    fn test_from_flat_mismatch() {
        assert!(DataSet::from_flat(vec![0.0; 6], vec![0.0; 2], 2, 1).is_err());
        assert!(DataSet::from_flat(vec![0.0; 5], vec![0.0; 2], 2, 1).is_err());
    }

    #[test]
    fn test_mnist_missing_files() {
        let err = load_mnist("/nonexistent/mnist").unwrap_err();
        assert!(matches!(err, FlatnetError::Io(_)));
    }

    #[test]
    fn test_mnist_one_hot() {
        let images = vec![255u8; 2 * MNIST_PIXELS];
        let set = mnist_set(&images, &[3, 9]).unwrap();
        assert_eq!(set.rows(), 2);
        assert_eq!(set.input_row(0)[0], 1.0);
        assert_eq!(set.target_row(0)[3], 1.0);
        assert_eq!(set.target_row(1)[9], 1.0);
        assert_eq!(set.target_row(1).iter().sum::<f32>(), 1.0);
    }
}
