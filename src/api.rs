//! One-shot convenience surface over the encode/decode sessions.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::decoder::ObjectDecoder;
use crate::encoder::ObjectEncoder;
use crate::error::Result;
use crate::rt::GraphClass;
use crate::value::Value;

/// The main entry point for one-shot serialization.
#[derive(Debug)]
pub struct Gravec;

impl Gravec {
    /// Saves one typed root to a file.
    ///
    /// # Arguments
    /// * `path`: Destination file path.
    /// * `root`: The root of the graph. Must derive `GraphClass`.
    pub fn save<T, P>(path: P, root: &T) -> Result<()>
    where
        T: GraphClass,
        P: AsRef<Path>,
    {
        let writer = BufWriter::new(File::create(path)?);
        let mut encoder = ObjectEncoder::new(writer)?;
        encoder.encode_root(root)?;
        encoder.flush()
    }

    /// Reads one typed root from a file.
    pub fn read<T, P>(path: P) -> Result<T>
    where
        T: GraphClass,
        P: AsRef<Path>,
    {
        let reader = BufReader::new(File::open(path)?);
        let mut decoder = ObjectDecoder::new(reader)?;
        decoder.decode_root()
    }

    /// Encodes one value graph into a fresh byte buffer.
    pub fn to_bytes(value: &Value) -> Result<Vec<u8>> {
        let mut encoder = ObjectEncoder::new(Vec::new())?;
        encoder.encode(value)?;
        encoder.into_inner()
    }

    /// Decodes one value graph from a byte slice.
    pub fn from_bytes(bytes: &[u8]) -> Result<Value> {
        let mut decoder = ObjectDecoder::new(bytes)?;
        decoder.decode()
    }
}
