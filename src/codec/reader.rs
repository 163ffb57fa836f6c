//! Streaming node record reader.

use std::io::Read;

use super::varint::{read_byte, read_varint};
use super::writer::SENTINEL;
use crate::error::CodecError;
use crate::types::{NodeData, NodeProperty, PropertyValue, ValueType};

/// Initial size of the per-reader scratch buffer
const INITIAL_SCRATCH: usize = 1024;

/// Pull-based reader of [`NodeData`] records.
///
/// Returns `Ok(None)` only after the end-of-stream sentinel. Any input that
/// ends before the sentinel is [`CodecError::Truncated`].
pub struct NodeStreamReader<R: Read> {
    input: R,
    scratch: Vec<u8>,
    records: u64,
    done: bool,
}

impl<R: Read> NodeStreamReader<R> {
    /// Wrap an input
    pub fn new(input: R) -> Self {
        Self {
            input,
            scratch: Vec::with_capacity(INITIAL_SCRATCH),
            records: 0,
            done: false,
        }
    }

    /// Records decoded so far
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Whether the end-of-stream sentinel has been read
    pub fn is_finished(&self) -> bool {
        self.done
    }

    /// Read the next record, or `None` at end-of-stream
    pub fn read_node(&mut self) -> Result<Option<NodeData>, CodecError> {
        if self.done {
            return Ok(None);
        }
        let path_len = read_varint(&mut self.input).map_err(|e| with_context(e, "record header"))?;
        if path_len < 0 {
            self.done = true;
            return Ok(None);
        }

        let mut path = Vec::with_capacity(capacity_hint(path_len));
        for _ in 0..path_len {
            match self.read_string("path element")? {
                Some(element) => path.push(element),
                // node paths have no null elements; only property values may be null
                None => return Err(CodecError::NullPathElement),
            }
        }

        let property_count = read_count(&mut self.input, "property count")?;
        let mut properties = Vec::with_capacity(capacity_hint(property_count));
        for _ in 0..property_count {
            let name = self
                .read_string("property name")?
                .ok_or(CodecError::NullPropertyName)?;
            let value_type = ValueType::from_ordinal(read_byte(&mut self.input, "value type")?)?;
            let value = match read_byte(&mut self.input, "multi-valued flag")? {
                1 => {
                    let count = read_count(&mut self.input, "value count")?;
                    let mut values = Vec::with_capacity(capacity_hint(count));
                    for _ in 0..count {
                        values.push(self.read_string("value")?);
                    }
                    PropertyValue::Multi(values)
                }
                0 => PropertyValue::Single(self.read_string("value")?),
                other => return Err(CodecError::InvalidMultiValueFlag(other)),
            };
            properties.push(NodeProperty {
                name,
                value_type,
                value,
            });
        }

        self.records += 1;
        Ok(Some(NodeData { path, properties }))
    }

    fn read_string(&mut self, context: &'static str) -> Result<Option<String>, CodecError> {
        let len = read_varint(&mut self.input).map_err(|e| with_context(e, context))?;
        if len == SENTINEL {
            return Ok(None);
        }
        if len < 0 {
            return Err(CodecError::InvalidLength(len));
        }
        let len = len as usize;
        self.scratch.clear();
        // grows the buffer as bytes arrive rather than trusting the declared length
        let read = (&mut self.input)
            .take(len as u64)
            .read_to_end(&mut self.scratch)
            .map_err(CodecError::Io)?;
        if read != len {
            return Err(CodecError::Truncated { context });
        }
        Ok(Some(std::str::from_utf8(&self.scratch)?.to_owned()))
    }

    /// Consume the reader and return the input
    pub fn into_inner(self) -> R {
        self.input
    }
}

impl<R: Read> Iterator for NodeStreamReader<R> {
    type Item = Result<NodeData, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read_node() {
            Ok(Some(node)) => Some(Ok(node)),
            Ok(None) => None,
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

fn read_count<R: Read>(input: &mut R, context: &'static str) -> Result<i32, CodecError> {
    let count = read_varint(input).map_err(|e| with_context(e, context))?;
    if count < 0 {
        return Err(CodecError::InvalidLength(count));
    }
    Ok(count)
}

fn with_context(err: CodecError, context: &'static str) -> CodecError {
    match err {
        CodecError::Truncated { .. } => CodecError::Truncated { context },
        other => other,
    }
}

fn capacity_hint(count: i32) -> usize {
    (count as usize).min(64)
}
