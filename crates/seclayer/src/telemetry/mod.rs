//! Power sampling and per layer CSV output.
//!
//! Telemetry never interrupts a computation: failures to read the power source or to write a
//! row are logged and otherwise ignored.
use crate::metrics::OpKind;
use crate::reshape::{ConvParams, PoolParams};
use std::time::{SystemTime, UNIX_EPOCH};

mod csv;
mod power;

pub use csv::{header as csv_header, CsvRowSink};
pub use power::{PowerMeasurement, PowerReading, PowerSampler, DEFAULT_SAMPLE_INTERVAL};

/// Milliseconds since the unix epoch, 0 if the system clock is before it.
pub fn unix_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Shape parameters of a layer call as they appear in the telemetry output.
#[derive(Clone, Debug)]
pub enum LayerShape {
    Conv(ConvParams),
    Relu { size: usize },
    MaxPool(PoolParams),
    AvgPool(PoolParams),
    MatMul { s1: usize, s2: usize, s3: usize },
    BatchNorm { size: usize },
    ArgMax { s1: usize, s2: usize },
}

impl LayerShape {
    pub fn kind(&self) -> OpKind {
        match self {
            LayerShape::Conv(_) => OpKind::Conv,
            LayerShape::Relu { .. } => OpKind::Relu,
            LayerShape::MaxPool(_) => OpKind::MaxPool,
            LayerShape::AvgPool(_) => OpKind::AvgPool,
            LayerShape::MatMul { .. } => OpKind::MatMul,
            LayerShape::BatchNorm { .. } => OpKind::BatchNorm,
            LayerShape::ArgMax { .. } => OpKind::ArgMax,
        }
    }

    fn values(&self) -> Vec<usize> {
        match self {
            LayerShape::Conv(p) => vec![
                p.n,
                p.h,
                p.w,
                p.ci,
                p.fh,
                p.fw,
                p.co,
                p.pad.top,
                p.pad.bottom,
                p.pad.left,
                p.pad.right,
                p.stride_h,
                p.stride_w,
            ],
            LayerShape::MaxPool(p) | LayerShape::AvgPool(p) => vec![
                p.n,
                p.out_h(),
                p.out_w(),
                p.c,
                p.ksize_h,
                p.ksize_w,
                p.pad.top,
                p.pad.bottom,
                p.pad.left,
                p.pad.right,
                p.stride_h,
                p.stride_w,
                p.n,
                p.img_h,
                p.img_w,
                p.c,
            ],
            LayerShape::Relu { size } | LayerShape::BatchNorm { size } => vec![*size],
            LayerShape::MatMul { s1, s2, s3 } => vec![*s1, *s2, *s3],
            LayerShape::ArgMax { s1, s2 } => vec![*s1, *s2],
        }
    }
}

/// A finished layer call together with the power readings taken while it ran.
#[derive(Debug)]
pub struct LayerRecord<'a> {
    pub shape: &'a LayerShape,
    pub layer_number: u64,
    pub execution_ms: u64,
    pub readings: &'a [PowerReading],
}

/// Destination for per layer telemetry rows.
pub trait LayerRowSink: Send {
    fn write_layer(&mut self, record: &LayerRecord<'_>);
}
