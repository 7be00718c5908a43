use super::{LayerRecord, LayerRowSink};
use crate::metrics::OpKind;
use itertools::Itertools;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use tracing::{error, info};

const COMMON_HEADER: [&str; 6] = [
    "index",
    "layer_name",
    "layer_number",
    "timestamp_power_reading",
    "avg_power_usage",
    "execution time",
];

const POOL_COLUMNS: [&str; 16] = [
    "N", "H", "W", "C", "ksizeH", "ksizeW", "zPadHLeft", "zPadHRight", "zPadWLeft", "zPadWRight",
    "strideH", "strideW", "N1", "imgH", "imgW", "C1",
];

fn file_name(kind: OpKind) -> Option<&'static str> {
    Some(match kind {
        OpKind::Conv => "conv_output.csv",
        OpKind::Relu => "relu_output.csv",
        OpKind::MaxPool => "maxpool_output.csv",
        OpKind::AvgPool => "avgpool_output.csv",
        OpKind::MatMul => "matmul_output.csv",
        OpKind::BatchNorm => "batchnorm_output.csv",
        OpKind::ArgMax => "argmax_output.csv",
        OpKind::Truncation => return None,
    })
}

/// Header line of the CSV file for `kind`. Shape columns are prefixed with the layer name.
pub fn header(kind: OpKind) -> String {
    let columns: &[&str] = match kind {
        OpKind::Conv => &[
            "N", "H", "W", "CI", "FH", "FW", "CO", "zPadHLeft", "zPadHRight", "zPadWLeft",
            "zPadWRight", "strideH", "strideW",
        ],
        OpKind::Relu => &["coeff"],
        OpKind::MaxPool | OpKind::AvgPool => &POOL_COLUMNS,
        OpKind::MatMul => &["s1", "s2", "s3"],
        OpKind::BatchNorm => &["size"],
        OpKind::ArgMax => &["s1", "s2"],
        OpKind::Truncation => &[],
    };
    let prefix = kind.to_string();
    COMMON_HEADER
        .iter()
        .map(|c| c.to_string())
        .chain(columns.iter().map(|c| format!("{prefix}_{c}")))
        .join(",")
}

/// Writes one CSV file per layer kind into a directory. Files are created on first use.
pub struct CsvRowSink {
    dir: PathBuf,
    files: HashMap<OpKind, BufWriter<File>>,
}

impl CsvRowSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        info!(dir = %dir.display(), "Writing layer telemetry");
        Self {
            dir,
            files: HashMap::new(),
        }
    }

    fn writer(&mut self, kind: OpKind) -> io::Result<Option<&mut BufWriter<File>>> {
        let Some(name) = file_name(kind) else {
            return Ok(None);
        };
        if !self.files.contains_key(&kind) {
            std::fs::create_dir_all(&self.dir)?;
            let mut writer = BufWriter::new(File::create(self.dir.join(name))?);
            writeln!(writer, "{}", header(kind))?;
            self.files.insert(kind, writer);
        }
        Ok(self.files.get_mut(&kind))
    }

    fn try_write(&mut self, record: &LayerRecord<'_>) -> io::Result<()> {
        let kind = record.shape.kind();
        let Some(writer) = self.writer(kind)? else {
            return Ok(());
        };
        let shape = record.shape.values().iter().join(",");
        let execution_s = record.execution_ms as f64 / 1000.0;
        for (idx, reading) in record.readings.iter().enumerate() {
            writeln!(
                writer,
                "{idx},{kind},{},{},{},{execution_s},{shape}",
                record.layer_number,
                reading.timestamp_ms,
                reading.value as f64 / 1e6,
            )?;
        }
        writer.flush()
    }
}

impl LayerRowSink for CsvRowSink {
    fn write_layer(&mut self, record: &LayerRecord<'_>) {
        if let Err(err) = self.try_write(record) {
            error!(%err, kind = %record.shape.kind(), "Unable to write telemetry row");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reshape::{ConvParams, Padding};
    use crate::telemetry::{LayerShape, PowerReading};

    #[test]
    fn conv_header() {
        assert_eq!(
            header(OpKind::Conv),
            "index,layer_name,layer_number,timestamp_power_reading,avg_power_usage,execution time,\
             Conv_N,Conv_H,Conv_W,Conv_CI,Conv_FH,Conv_FW,Conv_CO,Conv_zPadHLeft,Conv_zPadHRight,\
             Conv_zPadWLeft,Conv_zPadWRight,Conv_strideH,Conv_strideW"
        );
        assert!(header(OpKind::AvgPool).ends_with("AvgPool_imgW,AvgPool_C1"));
        assert!(header(OpKind::Relu).ends_with("Relu_coeff"));
    }

    #[test]
    fn one_row_per_reading() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CsvRowSink::new(dir.path());
        let shape = LayerShape::Conv(ConvParams {
            n: 1,
            h: 4,
            w: 4,
            ci: 1,
            fh: 2,
            fw: 2,
            co: 1,
            pad: Padding::uniform(0),
            stride_h: 1,
            stride_w: 1,
        });
        let readings = [
            PowerReading {
                value: 2_000_000,
                timestamp_ms: 10,
            },
            PowerReading {
                value: 3_000_000,
                timestamp_ms: 20,
            },
        ];
        sink.write_layer(&LayerRecord {
            shape: &shape,
            layer_number: 1,
            execution_ms: 1500,
            readings: &readings,
        });
        let content = std::fs::read_to_string(dir.path().join("conv_output.csv")).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "0,Conv,1,10,2,1.5,1,4,4,1,2,2,1,0,0,0,0,1,1");
        assert!(lines[2].starts_with("1,Conv,1,20,3,"));
    }
}
