//! Streaming node record writer.

use std::io::Write;

use super::varint::write_varint;
use crate::error::CodecError;
use crate::types::{NodeData, PropertyValue};

/// Count/length sentinel marking end-of-stream or a null string
pub const SENTINEL: i32 = -1;

/// Writes [`NodeData`] records; [`finish`](Self::finish) appends the end-of-stream sentinel.
pub struct NodeStreamWriter<W: Write> {
    out: W,
    records: u64,
}

impl<W: Write> NodeStreamWriter<W> {
    /// Wrap an output
    pub fn new(out: W) -> Self {
        Self { out, records: 0 }
    }

    /// Records written so far
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Append one record
    pub fn write_node(&mut self, node: &NodeData) -> Result<(), CodecError> {
        write_count(&mut self.out, node.path.len())?;
        for element in &node.path {
            write_string(&mut self.out, Some(element))?;
        }
        write_count(&mut self.out, node.properties.len())?;
        for property in &node.properties {
            write_string(&mut self.out, Some(&property.name))?;
            self.out.write_all(&[property.value_type.ordinal()])?;
            match &property.value {
                PropertyValue::Multi(values) => {
                    self.out.write_all(&[1])?;
                    write_count(&mut self.out, values.len())?;
                    for value in values {
                        write_string(&mut self.out, value.as_deref())?;
                    }
                }
                PropertyValue::Single(value) => {
                    self.out.write_all(&[0])?;
                    write_string(&mut self.out, value.as_deref())?;
                }
            }
        }
        self.records += 1;
        Ok(())
    }

    /// Write the end-of-stream sentinel, flush, and hand back the output
    pub fn finish(mut self) -> Result<W, CodecError> {
        write_varint(&mut self.out, SENTINEL)?;
        self.out.flush()?;
        Ok(self.out)
    }

    /// Access the underlying output
    pub fn get_ref(&self) -> &W {
        &self.out
    }
}

fn write_count<W: Write>(out: &mut W, count: usize) -> Result<(), CodecError> {
    let count = i32::try_from(count).map_err(|_| CodecError::TooLarge(count))?;
    write_varint(out, count)?;
    Ok(())
}

fn write_string<W: Write>(out: &mut W, value: Option<&str>) -> Result<(), CodecError> {
    match value {
        None => write_varint(out, SENTINEL)?,
        Some(s) => {
            write_count(out, s.len())?;
            out.write_all(s.as_bytes())?;
        }
    }
    Ok(())
}
