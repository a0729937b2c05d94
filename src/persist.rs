// Parameter persistence
//
// Binary layout, all fields little-endian, written in chain order:
//
//   Per parametric layer:
//     tag:     u32  = 0xC000_0000 | kind id
//     version: u32  = 0x200
//     radius:  u32  (0 for layers without a kernel)
//     in:      [u32; 3]  width, height, depth
//     out:     [u32; 3]  width, height, depth
//     weights: [f32; n]
//     biases:  [f32; m]  (omitted when the layer has none)
//
//   Parameter-free layers (pooling, resampling, filters) write nothing.
//
//   Optional network info block, written before the chain:
//     magic:   u32 = 0x4E53_4E49
//     version: [u32; 3]  crate major, minor, patch
//     epochs, train_time_secs, unique_samples: u64
//     err_min, err_max, err_avg: f64
//
// Optimizer state and deltas are never persisted.

use std::io::{Read, Write};

use crate::error::{Error, Result};
use crate::layers::LayerKind;

/// Format version written after every layer tag.
pub const FORMAT_VERSION: u32 = 0x200;

/// High bits shared by every layer tag.
pub const TAG_FLAGS: u32 = 0xC000_0000;

/// Magic number opening a [`crate::network::NetworkInfo`] block.
pub const INFO_MAGIC: u32 = 0x4E53_4E49;

// ============================================================================
// Primitive encoding
// ============================================================================

pub fn write_u32(w: &mut dyn Write, v: u32) -> std::io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn write_u64(w: &mut dyn Write, v: u64) -> std::io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn write_f64(w: &mut dyn Write, v: f64) -> std::io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn read_u32(r: &mut dyn Read) -> std::io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

pub fn read_u64(r: &mut dyn Read) -> std::io::Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

pub fn read_f64(r: &mut dyn Read) -> std::io::Result<f64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(f64::from_le_bytes(buf))
}

/// Write a parameter buffer as consecutive f32 LE values.
pub fn write_f32_slice(w: &mut dyn Write, values: &[f32]) -> std::io::Result<()> {
    let mut bytes = Vec::with_capacity(values.len() * 4);
    for v in values {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    w.write_all(&bytes)
}

/// Fill `values` from consecutive f32 LE values.
///
/// On a short read `values` is left untouched.
pub fn read_f32_slice(r: &mut dyn Read, values: &mut [f32]) -> std::io::Result<()> {
    let mut bytes = vec![0u8; values.len() * 4];
    r.read_exact(&mut bytes)?;
    for (v, chunk) in values.iter_mut().zip(bytes.chunks_exact(4)) {
        *v = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    Ok(())
}

// ============================================================================
// Layer header
// ============================================================================

/// Spatial extent of a layer's input or output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dims {
    pub width: usize,
    pub height: usize,
    pub depth: usize,
}

impl Dims {
    pub const fn new(width: usize, height: usize, depth: usize) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    /// A flat vector of `len` values.
    pub const fn flat(len: usize) -> Self {
        Self::new(len, 1, 1)
    }

    pub const fn len(&self) -> usize {
        self.width * self.height * self.depth
    }

    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Identity and shape record written ahead of a layer's parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerHeader {
    pub kind: LayerKind,
    pub radius: usize,
    pub input: Dims,
    pub output: Dims,
}

impl LayerHeader {
    pub fn write(&self, w: &mut dyn Write) -> Result<()> {
        write_u32(w, TAG_FLAGS | self.kind.id())?;
        write_u32(w, FORMAT_VERSION)?;
        write_u32(w, self.radius as u32)?;
        for dims in [self.input, self.output] {
            write_u32(w, dims.width as u32)?;
            write_u32(w, dims.height as u32)?;
            write_u32(w, dims.depth as u32)?;
        }
        Ok(())
    }

    /// Read a header from `r` and compare it field by field with `self`.
    ///
    /// Fails on the first field that differs; the stream position after a
    /// failure is unspecified.
    pub fn verify(&self, r: &mut dyn Read) -> Result<()> {
        let component = self.kind.name();
        expect(r, component, "tag", TAG_FLAGS | self.kind.id())?;
        expect(r, component, "version", FORMAT_VERSION)?;
        expect(r, component, "radius", self.radius as u32)?;
        expect(r, component, "input width", self.input.width as u32)?;
        expect(r, component, "input height", self.input.height as u32)?;
        expect(r, component, "input depth", self.input.depth as u32)?;
        expect(r, component, "output width", self.output.width as u32)?;
        expect(r, component, "output height", self.output.height as u32)?;
        expect(r, component, "output depth", self.output.depth as u32)?;
        Ok(())
    }
}

fn expect(r: &mut dyn Read, component: &'static str, field: &'static str, expected: u32) -> Result<()> {
    let got = read_u32(r)?;
    if got != expected {
        return Err(Error::LoadMismatch {
            component,
            field,
            expected: expected as u64,
            got: got as u64,
        });
    }
    Ok(())
}
